// SPDX-License-Identifier: AGPL-3.0-or-later
//! Benchmark driver: Setup → Measure → Report.
//!
//! Each phase consumes the previous one's state, so a phase cannot be
//! skipped, repeated or reordered. Any error during setup or measurement
//! aborts the case. A verification mismatch is not an error; it is part of
//! the [`BenchReport`].
//!
//! ```no_run
//! use stencil_harness::cases::REGISTRY;
//! use stencil_harness::config::BenchmarkConfig;
//! use stencil_harness::device::HostDevice;
//! use stencil_harness::driver::Benchmark;
//!
//! let device = HostDevice::new();
//! let config = BenchmarkConfig::default();
//! let report = Benchmark::setup(&device, &config, &REGISTRY[0])?
//!     .measure()?
//!     .report()?;
//! report.print();
//! # Ok::<(), stencil_harness::error::Error>(())
//! ```

use crate::buffers::{BufferManager, FieldSet};
use crate::cases::Case;
use crate::config::BenchmarkConfig;
use crate::device::Device;
use crate::error::{Error, Result};
use crate::kernels::{ChainStencil, KernelVariant, StencilBackend};
use crate::mesh::Mesh;
use crate::report::BenchReport;
use crate::stats::RunStatistics;
use crate::timing::run_and_time;
use crate::verify::verify_fields;

/// Boxed variant on device `D`.
pub type Variant<D> = Box<dyn KernelVariant<D>>;

/// Entry point of the phase chain.
#[derive(Debug)]
pub struct Benchmark;

impl Benchmark {
    /// Set up a registered case with the device's own variant pair.
    ///
    /// # Errors
    ///
    /// See [`Benchmark::setup_with`].
    pub fn setup<'d, D: StencilBackend>(
        device: &'d D,
        config: &BenchmarkConfig,
        case: &Case,
    ) -> Result<Prepared<'d, D>> {
        Self::setup_with(
            device,
            config,
            case.label,
            case.stencil,
            device.inlined(case.stencil),
            device.sequential(case.stencil),
        )
    }

    /// Set up an arbitrary variant pair over `stencil`.
    ///
    /// Loads the mesh, applies the splitters, allocates and fills every
    /// field (the sequential input is a device copy of the inlined one),
    /// then runs both variants' one-time setup.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for a bad config or a splitter
    /// outside the mesh, [`Error::Mesh`] if the mesh cannot be built, and
    /// allocation or device errors as they occur.
    pub fn setup_with<'d, D: Device>(
        device: &'d D,
        config: &BenchmarkConfig,
        label: &str,
        stencil: ChainStencil,
        mut inlined: Variant<D>,
        mut sequential: Variant<D>,
    ) -> Result<Prepared<'d, D>> {
        config.validate()?;
        let levels = config.level_count;
        tracing::info!(label, device = %device.name(), levels, "setup");

        let mesh = config.mesh.load()?;
        let mut topology = mesh.topology()?;
        topology.apply_splitters(&config.splitters.as_array())?;

        let stream = device.stream()?;
        let mut buffers = BufferManager::new(device, config.seed);
        let fields = buffers.field_set(&stencil, &topology, levels)?;

        inlined.setup(&topology, levels, &stream)?;
        sequential.setup(&topology, levels, &stream)?;

        Ok(Prepared {
            device,
            label: label.to_string(),
            repetitions: config.repetition_count,
            tolerance: config.absolute_tolerance,
            stream,
            fields,
            inlined,
            sequential,
        })
    }
}

/// Fields allocated, variants set up; nothing timed yet.
pub struct Prepared<'d, D: Device> {
    device: &'d D,
    label: String,
    repetitions: usize,
    tolerance: f64,
    stream: D::Stream,
    fields: FieldSet<D::Field>,
    inlined: Variant<D>,
    sequential: Variant<D>,
}

impl<'d, D: Device> Prepared<'d, D> {
    /// Case label.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Fields the variants will read and write.
    #[must_use]
    pub const fn fields(&self) -> &FieldSet<D::Field> {
        &self.fields
    }

    /// Time the inlined then the sequential variant, `repetition_count` times.
    ///
    /// Every launch is synchronised before the next is issued.
    ///
    /// # Errors
    ///
    /// The first kernel or marker error aborts the loop.
    pub fn measure(self) -> Result<Measured<'d, D>> {
        let reps = self.repetitions;
        let step = (reps / 10).max(1);
        let mut inlined = RunStatistics::with_capacity(reps);
        let mut sequential = RunStatistics::with_capacity(reps);
        tracing::info!(label = %self.label, repetitions = reps, "measure");

        {
            let args_a = self.fields.inlined_args();
            let args_b = self.fields.sequential_args();
            for rep in 0..reps {
                inlined.record(run_and_time(&self.stream, || {
                    self.inlined.run(&args_a, &self.stream)
                })?);
                sequential.record(run_and_time(&self.stream, || {
                    self.sequential.run(&args_b, &self.stream)
                })?);
                if (rep + 1) % step == 0 {
                    tracing::debug!(label = %self.label, done = rep + 1, total = reps, "progress");
                }
            }
        }

        Ok(Measured {
            prepared: self,
            inlined,
            sequential,
        })
    }
}

/// All samples collected; outputs hold the last iteration's results.
pub struct Measured<'d, D: Device> {
    prepared: Prepared<'d, D>,
    inlined: RunStatistics,
    sequential: RunStatistics,
}

impl<'d, D: Device> Measured<'d, D> {
    /// Samples of the inlined and the sequential variant.
    #[must_use]
    pub const fn samples(&self) -> (&RunStatistics, &RunStatistics) {
        (&self.inlined, &self.sequential)
    }

    /// Read back the final inlined and sequential outputs.
    ///
    /// # Errors
    ///
    /// Returns a device error if readback fails.
    pub fn outputs(&self) -> Result<(Vec<f64>, Vec<f64>)> {
        let p = &self.prepared;
        Ok((
            p.device.read(&p.fields.output_inlined)?,
            p.device.read(&p.fields.output_sequential)?,
        ))
    }

    /// Summarise both sequences and compare the final outputs.
    ///
    /// # Errors
    ///
    /// Returns a device error if the outputs cannot be read back.
    pub fn report(self) -> Result<BenchReport> {
        let p = &self.prepared;
        let no_samples = || Error::InvalidConfig(format!("{}: no samples recorded", p.label));
        let inlined_summary = self.inlined.summarize().ok_or_else(no_samples)?;
        let sequential_summary = self.sequential.summarize().ok_or_else(no_samples)?;

        let verification = verify_fields(
            p.device,
            &p.fields.output_inlined,
            &p.fields.output_sequential,
            p.tolerance,
        )?;
        if verification.passed {
            tracing::info!(
                label = %p.label,
                max_abs_diff = verification.max_abs_diff,
                "variant outputs agree"
            );
        } else {
            tracing::warn!(
                label = %p.label,
                max_abs_diff = verification.max_abs_diff,
                worst_index = ?verification.worst_index,
                mismatches = verification.mismatches,
                tolerance = p.tolerance,
                "variant outputs disagree"
            );
        }

        Ok(BenchReport {
            label: p.label.clone(),
            device: p.device.name(),
            inlined: self.inlined,
            sequential: self.sequential,
            inlined_summary,
            sequential_summary,
            verification,
        })
    }
}

/// Run one registered case end to end with its reference level count,
/// unless the config pins the level count.
///
/// # Errors
///
/// Propagates setup, measurement and readback errors.
pub fn run_case<D: StencilBackend>(
    device: &D,
    config: &BenchmarkConfig,
    case: &Case,
) -> Result<BenchReport> {
    Benchmark::setup(device, &config.for_case(case.levels), case)?
        .measure()?
        .report()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::cases::REGISTRY;
    use crate::config::{MeshSource, Splitters};
    use crate::device::HostDevice;
    use crate::mesh::SplitterIndices;

    fn small_config() -> BenchmarkConfig {
        BenchmarkConfig {
            level_count: 3,
            repetition_count: 5,
            mesh: MeshSource::Structured { nx: 6, ny: 4 },
            splitters: Splitters {
                cells: SplitterIndices::new(2, 40),
                edges: SplitterIndices::new(3, 70),
                vertices: SplitterIndices::new(1, 22),
            },
            ..BenchmarkConfig::default()
        }
    }

    #[test]
    fn phases_produce_equal_length_samples() {
        let dev = HostDevice::new();
        let cfg = small_config();
        let measured = Benchmark::setup(&dev, &cfg, &REGISTRY[0])
            .unwrap()
            .measure()
            .unwrap();
        let (a, b) = measured.samples();
        assert_eq!(a.len(), 5);
        assert_eq!(b.len(), 5);
        let report = measured.report().unwrap();
        assert!(report.verification.passed);
        assert_eq!(report.label, "E > C > V");
    }

    #[test]
    fn splitter_outside_mesh_fails_setup() {
        let dev = HostDevice::new();
        let mut cfg = small_config();
        cfg.splitters.vertices = SplitterIndices::new(0, 25);
        let err = Benchmark::setup(&dev, &cfg, &REGISTRY[0]).err().unwrap();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn bad_mesh_fails_setup() {
        let dev = HostDevice::new();
        let mut cfg = small_config();
        cfg.mesh = MeshSource::Structured { nx: 2, ny: 2 };
        assert!(matches!(
            Benchmark::setup(&dev, &cfg, &REGISTRY[0]).err().unwrap(),
            Error::Mesh(_)
        ));
    }

    #[test]
    fn run_case_uses_case_levels() {
        let dev = HostDevice::new();
        let mut cfg = small_config();
        cfg.repetition_count = 1;
        let case = REGISTRY.iter().find(|c| c.levels == 65).unwrap();
        let report = run_case(&dev, &cfg, case).unwrap();
        assert_eq!(report.inlined.len(), 1);
        assert!(report.verification.passed);
    }
}
