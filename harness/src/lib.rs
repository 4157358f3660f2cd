// SPDX-License-Identifier: AGPL-3.0-or-later

#![forbid(unsafe_code)]
#![deny(clippy::expect_used, clippy::unwrap_used)]

//! Stencil harness: timing and parity of inlined vs sequential
//! unstructured-mesh kernels.
//!
//! Two implementations of the same neighbour-chain reduction (a fused
//! *inlined* kernel and a staged *sequential* kernel) are set up once, timed
//! alternately many times on one device stream, and their final outputs are
//! compared elementwise within an absolute tolerance.
//!
//! # Architecture
//!
//! ```text
//!    ┌────────────┐   ┌──────────┐
//!    │  config    │   │  cases   │  what to run
//!    └─────┬──────┘   └────┬─────┘
//!          └───────┬───────┘
//!    ┌─────────────▼─────────────┐
//!    │  driver                   │  Setup → Measure → Report
//!    └──┬──────┬──────┬──────┬───┘
//!       │      │      │      │
//!   buffers timing  stats  verify
//!       │      │
//!    ┌──▼──────▼──┐  ┌──────────┐
//!    │  device    │◄─┤ kernels  │  host loops / WGSL
//!    └────────────┘  └────┬─────┘
//!                    ┌────▼─────┐
//!                    │  mesh    │  entities, neighbour tables, splitters
//!                    └──────────┘
//! ```
//!
//! The host backend is always available. The wgpu backend and its WGSL
//! kernels need `--features gpu`.

pub mod buffers;
pub mod cases;
pub mod config;
pub mod device;
pub mod driver;
pub mod error;
pub mod kernels;
pub mod mesh;
pub mod report;
pub mod stats;
pub mod timing;
pub mod tolerances;
pub mod verify;
