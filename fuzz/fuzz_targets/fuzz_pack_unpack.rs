//! Fuzz target for super-k-mer pack/unpack and the on-disk frame roundtrip.
//!
//! Tests that packing a run of bases and serializing it to bytes, then
//! reparsing, reproduces the same bases and that every k-length window
//! extracted from it matches the corresponding slice of the original run.

#![no_main]

use kmerust::superkmer::SuperKmer;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.is_empty() || data.len() > 512 {
        return;
    }
    for &byte in data {
        if !matches!(byte, b'A' | b'C' | b'G' | b'T') {
            return;
        }
    }

    let sk = SuperKmer::pack(data);
    assert_eq!(sk.len(), data.len());

    let bytes = sk.to_bytes();
    let parsed = SuperKmer::from_bytes(std::path::Path::new("fuzz"), 0, &bytes).expect("roundtrip parse");
    assert_eq!(parsed, sk, "super-k-mer frame roundtrip mismatch");

    for k in [8usize, 16, 31].into_iter().filter(|&k| k <= data.len()) {
        assert_eq!(sk.num_kmers(k), data.len() - k + 1);
        let first = sk.kmer_at(0, k).unwrap();
        assert_eq!(first.to_ascii(), &data[0..k]);
    }
});
