// SPDX-License-Identifier: AGPL-3.0-or-later
//! Inlined vs sequential chain-stencil benchmark.
//!
//! Runs every registered case (or those matching `STENCIL_BENCH_CASE`) and
//! prints one line per case:
//!
//! ```text
//! E > C > V: seq 1.234568e-1 3.456789e-3 inl 9.876543e-2 2.109876e-3
//! ```
//!
//! followed by `[FAIL] Failed Verification!` when the two outputs differ by
//! more than the tolerance. Logs go to stderr (`RUST_LOG`, default `info`).
//!
//! | Variable | Meaning | Default |
//! |----------|---------|---------|
//! | `STENCIL_BENCH_BACKEND` | `host`, `gpu`, `vulkan`, `metal`, `dx12` | `host` |
//! | `STENCIL_BENCH_LEVELS` | vertical levels, overrides per-case values | per case |
//! | `STENCIL_BENCH_REPETITIONS` | timed runs per variant | 100000 |
//! | `STENCIL_BENCH_TOLERANCE` | absolute parity tolerance | 1e-12 |
//! | `STENCIL_BENCH_SEED` | input fill seed | 42 |
//! | `STENCIL_BENCH_MESH` | periodic mesh `NXxNY` | `128x82` |
//! | `STENCIL_BENCH_CASE` | label substring filter | all |
//! | `STENCIL_BENCH_EXIT_POLICY` | `strict` or `report-only` | `strict` |
//!
//! Exit: 0 = all cases agree, 1 = a case disagrees (strict), 2 = the GPU
//! backend was requested but is unavailable, 3 = bad configuration, no
//! matching case, or the run aborted on an error.
//!
//! ```text
//! cargo run --release --bin bench_variant_pairs
//! STENCIL_BENCH_BACKEND=gpu cargo run --release --features gpu --bin bench_variant_pairs
//! ```

use std::process::ExitCode;

use stencil_harness::cases::{self, Case};
use stencil_harness::config::BenchmarkConfig;
use stencil_harness::device::HostDevice;
use stencil_harness::driver::run_case;
use stencil_harness::error::Result;
use stencil_harness::kernels::StencilBackend;
use stencil_harness::report::{self, BenchReport};
use tracing_subscriber::EnvFilter;

fn run_all<D: StencilBackend>(
    device: &D,
    config: &BenchmarkConfig,
    selected: &[&Case],
) -> Result<Vec<BenchReport>> {
    let mut reports = Vec::with_capacity(selected.len());
    for case in selected {
        let report = run_case(device, config, case)?;
        report.print();
        reports.push(report);
    }
    Ok(reports)
}

#[cfg(feature = "gpu")]
async fn run_gpu(config: &BenchmarkConfig, selected: &[&Case]) -> Result<Vec<BenchReport>> {
    use stencil_harness::device::{probe, WgpuDevice};

    if !probe::log_adapters(config.backend) {
        report::exit_skipped("no GPU adapter with SHADER_F64 and timestamp queries");
    }
    let device = match WgpuDevice::new(config.backend).await {
        Ok(d) => d,
        Err(e) => {
            tracing::error!(error = %e, "GPU unavailable");
            report::exit_skipped("GPU device could not be opened");
        }
    };
    run_all(&device, config, selected)
}

#[cfg(not(feature = "gpu"))]
#[allow(clippy::unused_async)]
async fn run_gpu(_config: &BenchmarkConfig, _selected: &[&Case]) -> Result<Vec<BenchReport>> {
    report::exit_skipped("built without the `gpu` feature")
}

#[tokio::main]
async fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = match BenchmarkConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "bad configuration");
            return exit(report::EXIT_ABORTED);
        }
    };
    let selected = cases::select(config.case_filter.as_deref());
    if selected.is_empty() {
        tracing::error!(filter = ?config.case_filter, "no registered case matches");
        return exit(report::EXIT_ABORTED);
    }
    tracing::info!(
        cases = selected.len(),
        backend = ?config.backend,
        repetitions = config.repetition_count,
        "starting"
    );

    let outcome = if config.backend.is_gpu() {
        run_gpu(&config, &selected).await
    } else {
        run_all(&HostDevice::new(), &config, &selected)
    };

    if let Err(e) = &outcome {
        tracing::error!(error = %e, "benchmark aborted");
    }
    exit(report::run_status(&outcome, config.exit_policy))
}

fn exit(status: i32) -> ExitCode {
    ExitCode::from(u8::try_from(status).unwrap_or(u8::MAX))
}
