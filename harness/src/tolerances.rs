// SPDX-License-Identifier: AGPL-3.0-or-later
//! Centralized parity tolerances for variant-vs-variant verification.
//!
//! Every threshold the harness compares against lives here, with its basis.
//!
//! # Tolerance categories
//!
//! | Category | Basis | Value |
//! |----------|-------|-------|
//! | Exact | IEEE 754 f64, same evaluation order | 0.0 |
//! | Variant parity | f64 sums reassociated across stages | 1e-12 |

/// Outputs computed in the same evaluation order must agree bit for bit.
pub const EXACT: f64 = 0.0;

/// Inlined vs sequential outputs of the same neighbour-chain reduction.
///
/// Inputs are uniform in `[0, 1)`; chain reductions sum at most a few dozen
/// such values, so the magnitude stays below ~100 and 1e-12 leaves roughly
/// two digits of headroom over f64 rounding when a fused kernel and a staged
/// kernel associate the sums differently.
pub const VARIANT_PARITY_F64: f64 = 1e-12;
