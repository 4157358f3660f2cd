// SPDX-License-Identifier: AGPL-3.0-or-later
//! GPU adapter discovery for the startup log.
//!
//! Lists every non-CPU wgpu adapter with the capabilities the harness cares
//! about, so a run that falls back or skips says why.

use super::gpu::{backends_for, REQUIRED_FEATURES};
use crate::config::BackendChoice;

/// What one adapter offers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterReport {
    /// Adapter name.
    pub name: String,
    /// Backend API, e.g. `Vulkan`.
    pub backend: String,
    /// Driver name and version.
    pub driver: String,
    /// `SHADER_F64` support.
    pub has_f64: bool,
    /// `TIMESTAMP_QUERY` plus `TIMESTAMP_QUERY_INSIDE_ENCODERS`.
    pub has_timestamps: bool,
}

impl AdapterReport {
    /// Whether the harness can time f64 kernels on this adapter.
    #[must_use]
    pub const fn usable(&self) -> bool {
        self.has_f64 && self.has_timestamps
    }
}

/// Enumerate hardware adapters reachable through `choice`.
///
/// Returns an empty list for [`BackendChoice::Host`].
#[must_use]
pub fn probe_adapters(choice: BackendChoice) -> Vec<AdapterReport> {
    let Ok(backends) = backends_for(choice) else {
        return Vec::new();
    };
    let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
        backends,
        ..Default::default()
    });

    instance
        .enumerate_adapters(backends)
        .into_iter()
        .filter_map(|adapter| {
            let info = adapter.get_info();
            if info.device_type == wgpu::DeviceType::Cpu {
                return None;
            }
            let features = adapter.features();
            let timestamps = wgpu::Features::TIMESTAMP_QUERY
                | wgpu::Features::TIMESTAMP_QUERY_INSIDE_ENCODERS;
            let report = AdapterReport {
                name: info.name.clone(),
                backend: format!("{:?}", info.backend),
                driver: format!("{} ({})", info.driver, info.driver_info),
                has_f64: features.contains(wgpu::Features::SHADER_F64),
                has_timestamps: features.contains(timestamps),
            };
            debug_assert_eq!(report.usable(), features.contains(REQUIRED_FEATURES));
            Some(report)
        })
        .collect()
}

/// Log every adapter found and return whether any is usable.
pub fn log_adapters(choice: BackendChoice) -> bool {
    let adapters = probe_adapters(choice);
    if adapters.is_empty() {
        tracing::info!(?choice, "no hardware GPU adapters found");
    }
    for a in &adapters {
        tracing::info!(
            name = %a.name,
            backend = %a.backend,
            driver = %a.driver,
            f64 = a.has_f64,
            timestamps = a.has_timestamps,
            "GPU adapter"
        );
    }
    adapters.iter().any(AdapterReport::usable)
}
