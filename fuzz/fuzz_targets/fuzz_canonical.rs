//! Fuzz target for canonical k-mer computation.
//!
//! Tests that canonical form has the expected properties:
//! 1. Is idempotent
//! 2. A k-mer and its reverse complement share the same canonical form

#![no_main]

use kmerust::kmer::{Kmer, K_MAX, MIN_K};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() < MIN_K || data.len() > K_MAX {
        return;
    }
    if Kmer::find_invalid(data).is_some() {
        return;
    }

    let kmer = Kmer::from_ascii(data).expect("validated above");
    let canonical = kmer.canonical();

    // Property 1: idempotent.
    let canonical2 = canonical.canonical();
    assert_eq!(canonical.to_ascii(), canonical2.to_ascii(), "canonical is not idempotent");

    // Property 2: k-mer and its reverse complement agree on canonical form.
    let rc_canonical = kmer.reverse_complement().canonical();
    assert_eq!(
        canonical.to_ascii(),
        rc_canonical.to_ascii(),
        "kmer and its reverse complement disagree on canonical form"
    );
});
