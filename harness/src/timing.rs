// SPDX-License-Identifier: AGPL-3.0-or-later
//! Timing engine: one marker pair around one kernel launch.

use std::fmt;

use crate::device::Stream;
use crate::error::{Error, Result};

/// One kernel duration in milliseconds; always finite and non-negative.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct TimingSample(f64);

impl TimingSample {
    /// Validate a raw elapsed time.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Marker`] if `ms` is negative, NaN or infinite.
    pub fn new(ms: f64) -> Result<Self> {
        if ms.is_finite() && ms >= 0.0 {
            Ok(Self(ms))
        } else {
            Err(Error::Marker(format!("elapsed time {ms} ms is not a duration")))
        }
    }

    /// Duration in milliseconds.
    #[must_use]
    pub const fn ms(self) -> f64 {
        self.0
    }
}

impl fmt::Display for TimingSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.4} ms", self.0)
    }
}

/// Time one launch on `stream`.
///
/// Both markers are created before the start marker is recorded and
/// dropped after the elapsed time is read, so their host-side cost stays
/// outside the measured interval. The launch must only enqueue work on
/// `stream`; the call blocks until the stop marker completes.
///
/// # Errors
///
/// Any marker failure or launch error is returned as is; there are no
/// retries.
pub fn run_and_time<S, F>(stream: &S, launch: F) -> Result<TimingSample>
where
    S: Stream,
    F: FnOnce() -> Result<()>,
{
    let mut start = stream.create_marker()?;
    let mut stop = stream.create_marker()?;

    stream.record(&mut start)?;
    launch()?;
    stream.record(&mut stop)?;
    stream.synchronize(&stop)?;

    let sample = TimingSample::new(stream.elapsed_ms(&start, &stop)?)?;
    drop((start, stop));
    Ok(sample)
}
