// SPDX-License-Identifier: AGPL-3.0-or-later
//! Device execution primitives the harness is written against.
//!
//! A [`Device`] owns memory and hands out [`Stream`]s. A stream is an
//! ordered queue of asynchronous work on which markers can be recorded;
//! the elapsed time between two recorded markers covers only the device
//! work issued between them.
//!
//! Two backends implement these traits:
//! - [`HostDevice`]: in-process reference backend, always available.
//! - `WgpuDevice` (feature `gpu`): wgpu storage buffers and timestamp queries.

mod host;
#[cfg(feature = "gpu")]
mod gpu;
#[cfg(feature = "gpu")]
pub mod probe;

pub use host::{HostDevice, HostField, HostMarker, HostStream};
#[cfg(feature = "gpu")]
pub(crate) use gpu::scoped;
#[cfg(feature = "gpu")]
pub use gpu::{WgpuDevice, WgpuField, WgpuMarker, WgpuStream};

use crate::error::Result;

/// Size in bytes of one field element.
pub const ELEMENT_BYTES: u64 = std::mem::size_of::<f64>() as u64;

/// A device-resident array of f64.
pub trait DeviceField {
    /// Number of f64 elements.
    fn len(&self) -> usize;

    /// Whether the field holds no elements.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Size in bytes.
    fn size_bytes(&self) -> u64 {
        self.len() as u64 * ELEMENT_BYTES
    }
}

/// Ordered queue of device work supporting timing markers.
pub trait Stream {
    /// Point-in-time event; released on drop.
    type Marker;

    /// Create an unrecorded marker.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::Error::Marker`] if the backend cannot create one.
    fn create_marker(&self) -> Result<Self::Marker>;

    /// Enqueue `marker` behind all work issued so far.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::Error::Marker`] on backend failure.
    fn record(&self, marker: &mut Self::Marker) -> Result<()>;

    /// Block the calling thread until the work preceding `marker` completes.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::Error::Marker`] if the marker was never recorded.
    fn synchronize(&self, marker: &Self::Marker) -> Result<()>;

    /// Device time between two completed markers, in fractional milliseconds.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::Error::Marker`] if either marker is incomplete.
    fn elapsed_ms(&self, start: &Self::Marker, stop: &Self::Marker) -> Result<f64>;
}

/// Memory owner and stream factory.
pub trait Device {
    /// Field type of this backend.
    type Field: DeviceField;
    /// Stream type of this backend.
    type Stream: Stream;

    /// Human-readable device name for reports.
    fn name(&self) -> String;

    /// Reserve `len` elements, zero-initialized.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::Error::Allocation`] if memory is exhausted.
    fn allocate(&self, len: usize, label: &str) -> Result<Self::Field>;

    /// Copy host values into `field`; `data` must match its length.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::Error::ShapeMismatch`] or a device error.
    fn upload(&self, field: &Self::Field, data: &[f64]) -> Result<()>;

    /// Exact device-to-device copy of `src` into `dst`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::Error::ShapeMismatch`] if lengths differ.
    fn copy(&self, dst: &Self::Field, src: &Self::Field) -> Result<()>;

    /// Read `field` back to the host, waiting for pending work.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::Error::Device`] if readback fails.
    fn read(&self, field: &Self::Field) -> Result<Vec<f64>>;

    /// Open an execution stream.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::Error::Device`] if the backend cannot time work.
    fn stream(&self) -> Result<Self::Stream>;
}
