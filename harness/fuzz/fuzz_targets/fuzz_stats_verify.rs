// SPDX-License-Identifier: AGPL-3.0-or-later
#![no_main]
use libfuzzer_sys::fuzz_target;
use stencil_harness::stats::summarize;
use stencil_harness::verify::compare;

fuzz_target!(|data: &[u8]| {
    // Arbitrary bit patterns: NaN, infinities and subnormals included
    let values: Vec<f64> = data
        .chunks_exact(8)
        .map(|c| f64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
        .collect();

    if let Some(s) = summarize(&values) {
        assert_eq!(s.count, values.len());
        assert!(s.stddev.is_nan() || s.stddev >= 0.0);
    }

    let (a, b) = values.split_at(values.len() / 2);
    let tol = a.first().copied().unwrap_or(0.0).abs();
    let n = a.len().max(b.len());
    let v = compare(a, b, n, tol);
    assert_eq!(v.passed, v.mismatches == 0);
    assert!(v.mismatches <= n);
    if tol.is_nan() {
        assert_eq!(v.mismatches, n);
    }
});
