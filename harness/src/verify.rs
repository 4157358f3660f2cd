// SPDX-License-Identifier: AGPL-3.0-or-later
//! Elementwise absolute-tolerance comparison of two variant outputs.
//!
//! An element passes when `|a[i] − b[i]| <= tol`. The check is symmetric in
//! `a` and `b`, NaN never passes (in either array or as the tolerance), and
//! a slice shorter than `n` fails.

use crate::device::{Device, DeviceField};
use crate::error::Result;

/// Outcome of [`compare`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Verification {
    /// Every element within tolerance.
    pub passed: bool,
    /// Largest `|a[i] − b[i]|` seen; NaN if any difference was NaN.
    pub max_abs_diff: f64,
    /// Index of `max_abs_diff`, if any element was compared.
    pub worst_index: Option<usize>,
    /// Elements out of tolerance, counting those missing from a short slice.
    pub mismatches: usize,
}

/// Compare the first `n` elements of `a` and `b` within `tol`.
#[must_use]
pub fn compare(a: &[f64], b: &[f64], n: usize, tol: f64) -> Verification {
    let checked = n.min(a.len()).min(b.len());
    let mut max_abs_diff = 0.0_f64;
    let mut worst_index = None;
    let mut mismatches = n - checked;

    for (i, (x, y)) in a[..checked].iter().zip(&b[..checked]).enumerate() {
        let d = (x - y).abs();
        if d.is_nan() || tol.is_nan() || d > tol {
            mismatches += 1;
        }
        if worst_index.is_none() || d > max_abs_diff || (d.is_nan() && !max_abs_diff.is_nan()) {
            max_abs_diff = d;
            worst_index = Some(i);
        }
    }

    Verification {
        passed: mismatches == 0,
        max_abs_diff,
        worst_index,
        mismatches,
    }
}

/// Pass/fail of [`compare`].
#[must_use]
pub fn verify(a: &[f64], b: &[f64], n: usize, tol: f64) -> bool {
    compare(a, b, n, tol).passed
}

/// Read two device fields back and compare them in full.
///
/// Fields of different length fail, with the missing tail counted as
/// mismatches.
///
/// # Errors
///
/// Propagates readback errors.
pub fn verify_fields<D: Device>(
    device: &D,
    a: &D::Field,
    b: &D::Field,
    tol: f64,
) -> Result<Verification> {
    let n = a.len().max(b.len());
    let a = device.read(a)?;
    let b = device.read(b)?;
    Ok(compare(&a, &b, n, tol))
}
