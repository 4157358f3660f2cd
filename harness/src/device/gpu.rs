// SPDX-License-Identifier: AGPL-3.0-or-later
//! wgpu backend: f64 storage buffers and GPU timestamp markers.
//!
//! A marker is a one-slot timestamp query set. Recording writes the
//! timestamp from its own command encoder, resolves it and copies the tick
//! into a mappable staging buffer, then submits. Queue order places it
//! behind every kernel submitted before it.

use std::sync::{mpsc, Arc};

use super::{Device, DeviceField, Stream, ELEMENT_BYTES};
use crate::config::BackendChoice;
use crate::error::{Error, Result};

/// Features the harness cannot run without.
pub const REQUIRED_FEATURES: wgpu::Features = wgpu::Features::SHADER_F64
    .union(wgpu::Features::TIMESTAMP_QUERY)
    .union(wgpu::Features::TIMESTAMP_QUERY_INSIDE_ENCODERS);

/// Storage buffers the chain-stencil pipelines bind at once.
pub const STORAGE_BINDINGS: u32 = 9;

const TICK_BYTES: u64 = std::mem::size_of::<u64>() as u64;

/// Map `choice` to the wgpu backend set.
///
/// # Errors
///
/// Returns [`Error::InvalidConfig`] for [`BackendChoice::Host`].
pub fn backends_for(choice: BackendChoice) -> Result<wgpu::Backends> {
    match choice {
        BackendChoice::Gpu => Ok(wgpu::Backends::all()),
        BackendChoice::Vulkan => Ok(wgpu::Backends::VULKAN),
        BackendChoice::Metal => Ok(wgpu::Backends::METAL),
        BackendChoice::Dx12 => Ok(wgpu::Backends::DX12),
        BackendChoice::Host => Err(Error::InvalidConfig(
            "host backend has no wgpu adapter".into(),
        )),
    }
}

/// wgpu device with f64 shaders and timestamp queries.
pub struct WgpuDevice {
    /// Adapter name (e.g. "NVIDIA RTX 4070").
    pub adapter_name: String,
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    max_buffer_size: u64,
}

impl std::fmt::Debug for WgpuDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WgpuDevice")
            .field("adapter_name", &self.adapter_name)
            .field("max_buffer_size", &self.max_buffer_size)
            .finish_non_exhaustive()
    }
}

impl WgpuDevice {
    /// Open the high-performance adapter of `choice`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Device`] if no adapter is found, the adapter lacks
    /// [`REQUIRED_FEATURES`] or enough storage bindings, or device creation
    /// fails.
    pub async fn new(choice: BackendChoice) -> Result<Self> {
        let backends = backends_for(choice)?;
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends,
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| Error::Device(format!("no {choice:?} adapter found")))?;

        let info = adapter.get_info();
        let missing = REQUIRED_FEATURES - adapter.features();
        if !missing.is_empty() {
            return Err(Error::Device(format!(
                "{} lacks required features {missing:?}",
                info.name
            )));
        }
        let limits = adapter.limits();
        if limits.max_storage_buffers_per_shader_stage < STORAGE_BINDINGS {
            return Err(Error::Device(format!(
                "{} binds {} storage buffers per stage, need {STORAGE_BINDINGS}",
                info.name, limits.max_storage_buffers_per_shader_stage
            )));
        }

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("stencil harness f64 device"),
                    required_features: REQUIRED_FEATURES,
                    required_limits: wgpu::Limits {
                        max_storage_buffer_binding_size: limits
                            .max_storage_buffer_binding_size
                            .min(1024 * 1024 * 1024),
                        max_buffer_size: limits.max_buffer_size.min(2 * 1024 * 1024 * 1024),
                        max_storage_buffers_per_shader_stage: limits
                            .max_storage_buffers_per_shader_stage
                            .min(16),
                        ..wgpu::Limits::default()
                    },
                    memory_hints: wgpu::MemoryHints::Performance,
                },
                None,
            )
            .await
            .map_err(|e| Error::Device(format!("device creation: {e}")))?;

        let max_buffer_size = device
            .limits()
            .max_buffer_size
            .min(u64::from(device.limits().max_storage_buffer_binding_size));
        tracing::info!(
            adapter = %info.name,
            backend = ?info.backend,
            max_buffer_size,
            "opened wgpu device"
        );

        Ok(Self {
            adapter_name: info.name,
            device: Arc::new(device),
            queue: Arc::new(queue),
            max_buffer_size,
        })
    }

    fn submit_copy(&self, src: &wgpu::Buffer, dst: &wgpu::Buffer, bytes: u64) {
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("field copy"),
            });
        encoder.copy_buffer_to_buffer(src, 0, dst, 0, bytes);
        self.queue.submit(Some(encoder.finish()));
    }
}

/// Storage buffer of f64.
#[derive(Debug)]
pub struct WgpuField {
    buffer: wgpu::Buffer,
    len: usize,
}

impl WgpuField {
    pub(crate) const fn buffer(&self) -> &wgpu::Buffer {
        &self.buffer
    }
}

impl DeviceField for WgpuField {
    fn len(&self) -> usize {
        self.len
    }
}

impl Device for WgpuDevice {
    type Field = WgpuField;
    type Stream = WgpuStream;

    fn name(&self) -> String {
        self.adapter_name.clone()
    }

    fn allocate(&self, len: usize, label: &str) -> Result<WgpuField> {
        let requested_bytes = len as u64 * ELEMENT_BYTES;
        if requested_bytes == 0 || requested_bytes > self.max_buffer_size {
            return Err(Error::Allocation {
                requested_bytes,
                reason: format!(
                    "'{label}' outside (0, {}] bytes per buffer",
                    self.max_buffer_size
                ),
            });
        }
        // wgpu zero-initialises new buffers
        let (buffer, oom) = scoped(&self.device, wgpu::ErrorFilter::OutOfMemory, || {
            self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size: requested_bytes,
                usage: wgpu::BufferUsages::STORAGE
                    | wgpu::BufferUsages::COPY_SRC
                    | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        });
        if let Some(e) = oom {
            return Err(Error::Allocation {
                requested_bytes,
                reason: format!("'{label}': {e}"),
            });
        }
        Ok(WgpuField { buffer, len })
    }

    fn upload(&self, field: &WgpuField, data: &[f64]) -> Result<()> {
        if field.len != data.len() {
            return Err(Error::ShapeMismatch {
                expected: field.len,
                actual: data.len(),
            });
        }
        self.queue
            .write_buffer(&field.buffer, 0, bytemuck::cast_slice(data));
        Ok(())
    }

    fn copy(&self, dst: &WgpuField, src: &WgpuField) -> Result<()> {
        if dst.len != src.len {
            return Err(Error::ShapeMismatch {
                expected: dst.len,
                actual: src.len,
            });
        }
        self.submit_copy(&src.buffer, &dst.buffer, src.size_bytes());
        Ok(())
    }

    fn read(&self, field: &WgpuField) -> Result<Vec<f64>> {
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("field readback"),
            size: field.size_bytes(),
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        self.submit_copy(&field.buffer, &staging, field.size_bytes());
        let bytes = map_read(&self.device, &staging)?;
        Ok(bytes
            .chunks_exact(std::mem::size_of::<f64>())
            .map(bytemuck::pod_read_unaligned::<f64>)
            .collect())
    }

    fn stream(&self) -> Result<WgpuStream> {
        let period_ns = self.queue.get_timestamp_period();
        if !(period_ns.is_finite() && period_ns > 0.0) {
            return Err(Error::Device(format!(
                "invalid timestamp period {period_ns} ns"
            )));
        }
        Ok(WgpuStream {
            device: Arc::clone(&self.device),
            queue: Arc::clone(&self.queue),
            period_ns,
        })
    }
}

/// Run `f` inside an error scope of `filter` and return what it caught.
///
/// Errors raised inside the scope go to the caller instead of the
/// device's uncaptured-error handler, which panics.
pub(crate) fn scoped<T>(
    device: &wgpu::Device,
    filter: wgpu::ErrorFilter,
    f: impl FnOnce() -> T,
) -> (T, Option<wgpu::Error>) {
    device.push_error_scope(filter);
    let value = f();
    let caught = pollster::block_on(device.pop_error_scope());
    (value, caught)
}

/// Map `buffer` for reading, wait, and copy its bytes out.
fn map_read(device: &wgpu::Device, buffer: &wgpu::Buffer) -> Result<Vec<u8>> {
    let slice = buffer.slice(..);
    let (tx, rx) = mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |r| {
        // receiver outlives the poll below
        let _ = tx.send(r);
    });
    device.poll(wgpu::Maintain::Wait);
    rx.recv()
        .map_err(|e| Error::Device(format!("readback channel closed: {e}")))?
        .map_err(|e| Error::Device(format!("buffer map failed: {e}")))?;
    let bytes = slice.get_mapped_range().to_vec();
    buffer.unmap();
    Ok(bytes)
}

/// The device queue seen as an ordered stream.
pub struct WgpuStream {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    period_ns: f32,
}

impl std::fmt::Debug for WgpuStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WgpuStream")
            .field("period_ns", &self.period_ns)
            .finish_non_exhaustive()
    }
}

impl WgpuStream {
    pub(crate) fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub(crate) fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    fn read_tick(&self, marker: &WgpuMarker) -> Result<u64> {
        if marker.submission.is_none() {
            return Err(Error::Marker("marker was never recorded".into()));
        }
        let bytes = map_read(&self.device, &marker.staging)
            .map_err(|e| Error::Marker(format!("timestamp readback: {e}")))?;
        bytes
            .get(..std::mem::size_of::<u64>())
            .map(bytemuck::pod_read_unaligned::<u64>)
            .ok_or_else(|| Error::Marker("short timestamp readback".into()))
    }
}

/// One-slot timestamp query and its readback buffers.
#[derive(Debug)]
pub struct WgpuMarker {
    query_set: wgpu::QuerySet,
    resolve: wgpu::Buffer,
    staging: wgpu::Buffer,
    submission: Option<wgpu::SubmissionIndex>,
}

impl Stream for WgpuStream {
    type Marker = WgpuMarker;

    fn create_marker(&self) -> Result<WgpuMarker> {
        let query_set = self.device.create_query_set(&wgpu::QuerySetDescriptor {
            label: Some("timing marker"),
            ty: wgpu::QueryType::Timestamp,
            count: 1,
        });
        let resolve = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("timing marker resolve"),
            size: TICK_BYTES,
            usage: wgpu::BufferUsages::QUERY_RESOLVE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("timing marker staging"),
            size: TICK_BYTES,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        Ok(WgpuMarker {
            query_set,
            resolve,
            staging,
            submission: None,
        })
    }

    fn record(&self, marker: &mut WgpuMarker) -> Result<()> {
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("timing marker"),
            });
        encoder.write_timestamp(&marker.query_set, 0);
        encoder.resolve_query_set(&marker.query_set, 0..1, &marker.resolve, 0);
        encoder.copy_buffer_to_buffer(&marker.resolve, 0, &marker.staging, 0, TICK_BYTES);
        marker.submission = Some(self.queue.submit(Some(encoder.finish())));
        Ok(())
    }

    fn synchronize(&self, marker: &WgpuMarker) -> Result<()> {
        let index = marker
            .submission
            .clone()
            .ok_or_else(|| Error::Marker("marker was never recorded".into()))?;
        self.device
            .poll(wgpu::Maintain::WaitForSubmissionIndex(index));
        Ok(())
    }

    fn elapsed_ms(&self, start: &WgpuMarker, stop: &WgpuMarker) -> Result<f64> {
        let t0 = self.read_tick(start)?;
        let t1 = self.read_tick(stop)?;
        let ticks = t1.checked_sub(t0).ok_or_else(|| {
            Error::Marker(format!("stop tick {t1} precedes start tick {t0}"))
        })?;
        #[allow(clippy::cast_precision_loss)]
        let ns = ticks as f64 * f64::from(self.period_ns);
        Ok(ns / 1e6)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    async fn open() -> Option<WgpuDevice> {
        WgpuDevice::new(BackendChoice::Gpu).await.ok()
    }

    #[test]
    fn host_choice_has_no_backend_set() {
        assert!(backends_for(BackendChoice::Host).is_err());
        assert_eq!(
            backends_for(BackendChoice::Vulkan).unwrap(),
            wgpu::Backends::VULKAN
        );
    }

    #[tokio::test]
    async fn upload_copy_read() {
        let Some(dev) = open().await else { return };
        let a = dev.allocate(4, "a").unwrap();
        let b = dev.allocate(4, "b").unwrap();
        dev.upload(&a, &[1.0, -2.5, 3.25, 0.1]).unwrap();
        dev.copy(&b, &a).unwrap();
        let out = dev.read(&b).unwrap();
        assert_eq!(out, vec![1.0, -2.5, 3.25, 0.1]);
    }

    #[tokio::test]
    async fn zero_length_allocation_fails() {
        let Some(dev) = open().await else { return };
        assert!(matches!(
            dev.allocate(0, "empty"),
            Err(Error::Allocation { .. })
        ));
    }

    #[tokio::test]
    async fn error_scope_captures_instead_of_panicking() {
        let Some(dev) = open().await else { return };
        // MAP_READ may only pair with COPY_DST
        let (_buffer, caught) = scoped(&dev.device, wgpu::ErrorFilter::Validation, || {
            dev.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("invalid usage"),
                size: 64,
                usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::STORAGE,
                mapped_at_creation: false,
            })
        });
        assert!(matches!(caught, Some(wgpu::Error::Validation { .. })));

        let (_field, clean) = scoped(&dev.device, wgpu::ErrorFilter::OutOfMemory, || {
            dev.allocate(16, "fits")
        });
        assert!(clean.is_none());
    }

    #[tokio::test]
    async fn marker_pair_yields_finite_time() {
        let Some(dev) = open().await else { return };
        let stream = dev.stream().unwrap();
        let mut start = stream.create_marker().unwrap();
        let mut stop = stream.create_marker().unwrap();
        stream.record(&mut start).unwrap();
        stream.record(&mut stop).unwrap();
        stream.synchronize(&stop).unwrap();
        let ms = stream.elapsed_ms(&start, &stop).unwrap();
        assert!(ms.is_finite() && ms >= 0.0);
    }
}
