//! Fuzz target for `Kmer::from_ascii`.
//!
//! Tests that `from_ascii` handles arbitrary byte input gracefully, either
//! accepting valid DNA sequences or rejecting invalid ones without panicking.

#![no_main]

use kmerust::kmer::{Kmer, K_MAX, MIN_K};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() < MIN_K || data.len() > K_MAX {
        return;
    }

    match Kmer::from_ascii(data) {
        Ok(kmer) => {
            assert_eq!(kmer.k(), data.len());
            let normalized: Vec<u8> = data.iter().map(u8::to_ascii_uppercase).collect();
            assert_eq!(kmer.to_ascii(), normalized, "from_ascii did not preserve bases");
        }
        Err(_) => {
            // Rejection is only valid if the run really does contain a
            // non-ACGT byte somewhere.
            assert!(Kmer::find_invalid(data).is_some());
        }
    }
});
