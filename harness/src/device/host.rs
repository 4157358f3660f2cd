// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-process reference backend.
//!
//! Fields are host vectors and kernels run to completion on the issuing
//! thread, so a marker recorded after a launch already sits behind all of
//! its work. Markers capture a monotonic [`Instant`]. An optional memory
//! limit lets tests exercise the allocation-failure path.

use std::cell::{Cell, Ref, RefCell, RefMut};
use std::time::Instant;

use super::{Device, DeviceField, Stream, ELEMENT_BYTES};
use crate::error::{Error, Result};

/// Host-memory field.
#[derive(Debug)]
pub struct HostField {
    label: String,
    len: usize,
    data: RefCell<Vec<f64>>,
}

impl HostField {
    /// Debug label given at allocation.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Borrow the values for reading.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Kernel`] if the field is currently borrowed mutably
    /// (the same field passed as input and output).
    pub fn values(&self) -> Result<Ref<'_, Vec<f64>>> {
        self.data
            .try_borrow()
            .map_err(|_| Error::Kernel(format!("field '{}' is aliased", self.label)))
    }

    /// Borrow the values for writing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Kernel`] if the field is already borrowed.
    pub fn values_mut(&self) -> Result<RefMut<'_, Vec<f64>>> {
        self.data
            .try_borrow_mut()
            .map_err(|_| Error::Kernel(format!("field '{}' is aliased", self.label)))
    }
}

impl DeviceField for HostField {
    fn len(&self) -> usize {
        self.len
    }
}

/// Reference device backed by host memory.
#[derive(Debug)]
pub struct HostDevice {
    limit_bytes: Option<u64>,
    reserved_bytes: Cell<u64>,
}

impl Default for HostDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl HostDevice {
    /// Device without a memory limit beyond what the allocator grants.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            limit_bytes: None,
            reserved_bytes: Cell::new(0),
        }
    }

    /// Device that refuses allocations past `limit_bytes` in total.
    #[must_use]
    pub const fn with_memory_limit(limit_bytes: u64) -> Self {
        Self {
            limit_bytes: Some(limit_bytes),
            reserved_bytes: Cell::new(0),
        }
    }

    /// Bytes handed out so far.
    #[must_use]
    pub fn reserved_bytes(&self) -> u64 {
        self.reserved_bytes.get()
    }
}

impl Device for HostDevice {
    type Field = HostField;
    type Stream = HostStream;

    fn name(&self) -> String {
        String::from("host reference")
    }

    fn allocate(&self, len: usize, label: &str) -> Result<HostField> {
        let requested_bytes = len as u64 * ELEMENT_BYTES;
        let total = self.reserved_bytes.get() + requested_bytes;
        if let Some(limit) = self.limit_bytes {
            if total > limit {
                return Err(Error::Allocation {
                    requested_bytes,
                    reason: format!(
                        "'{label}' would bring the host device to {total} of {limit} bytes"
                    ),
                });
            }
        }
        let mut data = Vec::new();
        data.try_reserve_exact(len)
            .map_err(|e| Error::Allocation {
                requested_bytes,
                reason: format!("'{label}': {e}"),
            })?;
        data.resize(len, 0.0);
        self.reserved_bytes.set(total);
        Ok(HostField {
            label: label.to_string(),
            len,
            data: RefCell::new(data),
        })
    }

    fn upload(&self, field: &HostField, data: &[f64]) -> Result<()> {
        let mut dst = field.values_mut()?;
        if dst.len() != data.len() {
            return Err(Error::ShapeMismatch {
                expected: dst.len(),
                actual: data.len(),
            });
        }
        dst.copy_from_slice(data);
        Ok(())
    }

    fn copy(&self, dst: &HostField, src: &HostField) -> Result<()> {
        let src = src.values()?;
        let mut dst = dst.values_mut()?;
        if dst.len() != src.len() {
            return Err(Error::ShapeMismatch {
                expected: dst.len(),
                actual: src.len(),
            });
        }
        dst.copy_from_slice(&src);
        Ok(())
    }

    fn read(&self, field: &HostField) -> Result<Vec<f64>> {
        Ok(field.values()?.clone())
    }

    fn stream(&self) -> Result<HostStream> {
        Ok(HostStream { _private: () })
    }
}

/// Stream on the host device; work completes at issue time.
#[derive(Debug)]
pub struct HostStream {
    _private: (),
}

/// Host marker: the instant it was recorded, if it has been.
#[derive(Debug, Default)]
pub struct HostMarker {
    at: Option<Instant>,
}

impl HostMarker {
    fn instant(&self) -> Result<Instant> {
        self.at
            .ok_or_else(|| Error::Marker("marker was never recorded".into()))
    }
}

impl Stream for HostStream {
    type Marker = HostMarker;

    fn create_marker(&self) -> Result<HostMarker> {
        Ok(HostMarker::default())
    }

    fn record(&self, marker: &mut HostMarker) -> Result<()> {
        marker.at = Some(Instant::now());
        Ok(())
    }

    fn synchronize(&self, marker: &HostMarker) -> Result<()> {
        marker.instant().map(|_| ())
    }

    fn elapsed_ms(&self, start: &HostMarker, stop: &HostMarker) -> Result<f64> {
        let (start, stop) = (start.instant()?, stop.instant()?);
        let elapsed = stop.checked_duration_since(start).ok_or_else(|| {
            Error::Marker("stop marker was recorded before start marker".into())
        })?;
        Ok(elapsed.as_secs_f64() * 1e3)
    }
}
