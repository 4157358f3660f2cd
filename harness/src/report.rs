// SPDX-License-Identifier: AGPL-3.0-or-later
//! Report lines and process exit status.
//!
//! stdout carries exactly one summary line per case, followed by a failure
//! line when that case's outputs disagree. Timing data is always printed
//! before the verdict affects the exit status.
//!
//! Exit codes follow the validation-binary convention: 0 = all passed,
//! 1 = at least one verification failed (strict policy), 2 = skipped,
//! 3 = the run aborted before every case could report.

use crate::config::ExitPolicy;
use crate::error::Result;
use crate::stats::{RunStatistics, Summary};
use crate::verify::Verification;

/// All cases passed, or the policy ignores mismatches.
pub const EXIT_OK: i32 = 0;
/// At least one case failed verification under [`ExitPolicy::Strict`].
pub const EXIT_FAILED: i32 = 1;
/// The requested backend is unavailable; nothing was measured.
pub const EXIT_SKIPPED: i32 = 2;
/// Bad configuration, no matching case, or an error that stopped the run.
pub const EXIT_ABORTED: i32 = 3;

/// Literal line printed after a case whose outputs disagree.
pub const FAILURE_LINE: &str = "[FAIL] Failed Verification!";

/// Result of one finished benchmark case.
#[derive(Debug, Clone)]
pub struct BenchReport {
    /// Variant-pair label, e.g. `E > C > V`.
    pub label: String,
    /// Device the case ran on.
    pub device: String,
    /// Inlined (variant A) samples.
    pub inlined: RunStatistics,
    /// Sequential (variant B) samples.
    pub sequential: RunStatistics,
    /// Summary of `inlined`.
    pub inlined_summary: Summary,
    /// Summary of `sequential`.
    pub sequential_summary: Summary,
    /// Output comparison over the final buffers.
    pub verification: Verification,
}

impl BenchReport {
    /// `"{label}: seq {mean} {sd} inl {mean} {sd}"` in scientific notation
    /// with six mantissa digits.
    ///
    /// The exponent is Rust's: no sign on positive exponents and no zero
    /// padding, so `0.1617284` prints as `1.617284e-1` where printf `%e`
    /// would give `1.617284e-01`.
    #[must_use]
    pub fn summary_line(&self) -> String {
        format!(
            "{}: seq {:.6e} {:.6e} inl {:.6e} {:.6e}",
            self.label,
            self.sequential_summary.mean,
            self.sequential_summary.stddev,
            self.inlined_summary.mean,
            self.inlined_summary.stddev,
        )
    }

    /// [`FAILURE_LINE`] if verification failed.
    #[must_use]
    pub const fn failure_line(&self) -> Option<&'static str> {
        if self.verification.passed {
            None
        } else {
            Some(FAILURE_LINE)
        }
    }

    /// Summary line, then the failure line if any.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        let mut out = vec![self.summary_line()];
        out.extend(self.failure_line().map(String::from));
        out
    }

    /// Print [`BenchReport::lines`] to stdout.
    pub fn print(&self) {
        for line in self.lines() {
            println!("{line}");
        }
    }

    /// Exit status this case alone maps to.
    #[must_use]
    pub const fn exit_code(&self, policy: ExitPolicy) -> i32 {
        match policy {
            ExitPolicy::Strict if !self.verification.passed => EXIT_FAILED,
            ExitPolicy::Strict | ExitPolicy::ReportOnly => EXIT_OK,
        }
    }
}

/// Exit status for a whole run.
#[must_use]
pub fn exit_status(reports: &[BenchReport], policy: ExitPolicy) -> i32 {
    reports
        .iter()
        .map(|r| r.exit_code(policy))
        .max()
        .unwrap_or(EXIT_OK)
}

/// Exit status for a run that may have aborted; an error never maps to
/// [`EXIT_FAILED`], so a crash is distinguishable from a mismatch.
#[must_use]
pub fn run_status(outcome: &Result<Vec<BenchReport>>, policy: ExitPolicy) -> i32 {
    match outcome {
        Ok(reports) => exit_status(reports, policy),
        Err(_) => EXIT_ABORTED,
    }
}

/// Print why the run was skipped and exit with [`EXIT_SKIPPED`].
pub fn exit_skipped(reason: &str) -> ! {
    println!("  SKIP: {reason}");
    println!("  (exit 2 = skipped, not a failure)");
    std::process::exit(EXIT_SKIPPED)
}
