// SPDX-License-Identifier: AGPL-3.0-or-later
//! End-to-end benchmark runs on the host backend.

#![allow(clippy::unwrap_used)]

use stencil_harness::cases::{self, REGISTRY};
use stencil_harness::config::{BenchmarkConfig, ExitPolicy, MeshSource, Splitters};
use stencil_harness::device::{HostDevice, HostField, HostStream};
use stencil_harness::driver::{run_case, Benchmark, Variant};
use stencil_harness::error::Result;
use stencil_harness::kernels::{KernelArgs, KernelVariant, StencilBackend};
use stencil_harness::mesh::{SplitterIndices, Topology};
use stencil_harness::report::{self, FAILURE_LINE};

fn small_config() -> BenchmarkConfig {
    BenchmarkConfig {
        level_count: 4,
        repetition_count: 20,
        mesh: MeshSource::Structured { nx: 8, ny: 6 },
        splitters: Splitters {
            cells: SplitterIndices::new(4, 90),
            edges: SplitterIndices::new(6, 140),
            vertices: SplitterIndices::new(2, 45),
        },
        levels_pinned: true,
        ..BenchmarkConfig::default()
    }
}

/// Wraps a correct variant and nudges one written output element.
struct Perturbed {
    inner: Variant<HostDevice>,
    index: usize,
    delta: f64,
}

impl KernelVariant<HostDevice> for Perturbed {
    fn name(&self) -> &'static str {
        "perturbed"
    }

    fn setup(
        &mut self,
        topology: &Topology,
        level_count: usize,
        stream: &HostStream,
    ) -> Result<()> {
        self.inner.setup(topology, level_count, stream)
    }

    fn run(&self, args: &KernelArgs<'_, HostField>, stream: &HostStream) -> Result<()> {
        self.inner.run(args, stream)?;
        args.output.values_mut()?[self.index] += self.delta;
        Ok(())
    }
}

fn parse_summary(line: &str) -> Vec<f64> {
    let (_, rest) = line.split_once(": seq ").unwrap();
    rest.split_whitespace()
        .filter(|t| *t != "inl")
        .map(|t| t.parse().unwrap())
        .collect()
}

#[test]
fn every_registered_case_runs_and_agrees() {
    let dev = HostDevice::new();
    let cfg = small_config();
    for case in REGISTRY {
        let report = run_case(&dev, &cfg, case).unwrap();
        assert_eq!(report.inlined.len(), cfg.repetition_count, "{}", case.label);
        assert_eq!(report.sequential.len(), cfg.repetition_count);
        for &ms in report.inlined.samples().iter().chain(report.sequential.samples()) {
            assert!(ms.is_finite() && ms >= 0.0);
        }
        assert!(report.verification.passed, "{}: {:?}", case.label, report.verification);
        assert!(report.failure_line().is_none());

        let line = report.summary_line();
        assert!(line.starts_with(case.label));
        let nums = parse_summary(&line);
        assert_eq!(nums.len(), 4, "{line}");
        assert!(nums.iter().all(|&x| x.is_finite() && x >= 0.0), "{line}");
    }
}

#[test]
fn perturbed_variant_fails_but_still_reports_timings() {
    let dev = HostDevice::new();
    let cfg = small_config();
    let case = cases::select(Some("V > C > V"))[0];
    let perturbed = Perturbed {
        inner: dev.sequential(case.stencil),
        // first vertex in the compute range, level 0
        index: cfg.splitters.vertices.nudging_lower,
        delta: 1e-9,
    };
    let report = Benchmark::setup_with(
        &dev,
        &cfg,
        case.label,
        case.stencil,
        dev.inlined(case.stencil),
        Box::new(perturbed),
    )
    .unwrap()
    .measure()
    .unwrap()
    .report()
    .unwrap();

    assert!(!report.verification.passed);
    assert_eq!(report.verification.mismatches, 1);
    assert_eq!(report.verification.worst_index, Some(cfg.splitters.vertices.nudging_lower));
    assert!((report.verification.max_abs_diff - 1e-9).abs() < 1e-12);
    assert_eq!(report.inlined.len(), cfg.repetition_count);
    assert_eq!(report.sequential.len(), cfg.repetition_count);

    let lines = report.lines();
    assert_eq!(lines.len(), 2);
    assert_eq!(parse_summary(&lines[0]).len(), 4);
    assert_eq!(lines[1], FAILURE_LINE);

    // both readings of a mismatch
    let reports = [report];
    assert_eq!(report::exit_status(&reports, ExitPolicy::Strict), report::EXIT_FAILED);
    assert_eq!(report::exit_status(&reports, ExitPolicy::ReportOnly), report::EXIT_OK);
}

#[test]
fn perturbation_within_tolerance_passes() {
    let dev = HostDevice::new();
    let mut cfg = small_config();
    cfg.absolute_tolerance = 1e-6;
    let case = &REGISTRY[0];
    let perturbed = Perturbed {
        inner: dev.inlined(case.stencil),
        index: cfg.splitters.edges.nudging_lower,
        delta: 1e-9,
    };
    let report = Benchmark::setup_with(
        &dev,
        &cfg,
        case.label,
        case.stencil,
        Box::new(perturbed),
        dev.sequential(case.stencil),
    )
    .unwrap()
    .measure()
    .unwrap()
    .report()
    .unwrap();
    assert!(report.verification.passed);
    assert_eq!(report::exit_status(&[report], ExitPolicy::Strict), report::EXIT_OK);
}

#[test]
fn outputs_outside_compute_range_stay_zero() {
    let dev = HostDevice::new();
    let cfg = small_config();
    let case = cases::select(Some("C > E > V"))[0];
    let measured = Benchmark::setup(&dev, &cfg, case)
        .unwrap()
        .measure()
        .unwrap();
    let (inl, seq) = measured.outputs().unwrap();
    let n_cells = 2 * 8 * 6;
    let range = cfg.splitters.cells.nudging_lower..cfg.splitters.cells.halo_upper;
    for k in 0..cfg.level_count {
        for i in 0..n_cells {
            let (a, b) = (inl[k * n_cells + i], seq[k * n_cells + i]);
            if range.contains(&i) {
                assert!(a != 0.0 && b != 0.0);
            } else {
                assert_eq!(a.to_bits(), 0);
                assert_eq!(b.to_bits(), 0);
            }
        }
    }
}

#[test]
fn allocation_failure_aborts_setup() {
    let dev = HostDevice::with_memory_limit(1024);
    let err = Benchmark::setup(&dev, &small_config(), &REGISTRY[0]).err().unwrap();
    assert!(matches!(err, stencil_harness::error::Error::Allocation { .. }));
}

#[test]
fn splitter_past_entity_count_aborts_setup() {
    let dev = HostDevice::new();
    let mut cfg = small_config();
    cfg.splitters.edges = SplitterIndices::new(0, 145);
    assert!(Benchmark::setup(&dev, &cfg, &REGISTRY[0]).is_err());
}
