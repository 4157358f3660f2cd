// SPDX-License-Identifier: AGPL-3.0-or-later
//! Neighbour-chain stencils and the two variants the harness compares.
//!
//! A chain `L0 > L1 > L2` reduces a field on `L2` over the `L1` neighbours
//! of every `L0` entity, and over the `L2` neighbours of each of those:
//!
//! | Reduction      | per `L1` entity `j`          | per `L0` entity `i`         |
//! |----------------|------------------------------|-----------------------------|
//! | `Plain`        | `t = Σ_m in(m)`              | `out = Σ_j t`               |
//! | `Weighted`     | `t = w_k(j)·w(j)·Σ_m in(m)`  | `out = Σ_j t`               |
//! | `Interpolated` | `t = Σ_n c(j,n)·in(N(j,n))`  | `out = s0 + s1·u + s2·u²`   |
//!
//! where `u = Σ_j t` for the interpolated row.
//!
//! The **inlined** variant evaluates this in one fused pass; the
//! **sequential** variant materialises `t` for all `L1` entities into a
//! temporary, then reduces. Both give the same value up to summation
//! order. Only `L0` entities in the splitter compute range are written.
//!
//! Fields are level-major: dense `k·count + i`, sparse
//! `(k·fan + n)·count + j`. Level-free fields are `count` long.

pub mod host;
#[cfg(feature = "gpu")]
pub mod gpu;

use std::fmt;
use std::ops::Range;

use crate::device::{Device, DeviceField};
use crate::error::{Error, Result};
use crate::mesh::{Connectivity, EntityKind, Topology};

/// What the chain computes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reduction {
    /// Nested sum.
    Plain,
    /// Nested sum scaled by a level-resolved and a level-free weight on `L1`.
    Weighted,
    /// Sparse-coefficient interpolation followed by a quadratic in the sum.
    Interpolated,
}

impl Reduction {
    /// Auxiliary fields the kernels expect, in argument order.
    #[must_use]
    pub const fn aux_count(self) -> usize {
        match self {
            Self::Plain => 0,
            Self::Weighted => 2,
            Self::Interpolated => 4,
        }
    }

    /// Shader mode constant.
    #[must_use]
    pub const fn mode(self) -> u32 {
        match self {
            Self::Plain => 0,
            Self::Weighted => 1,
            Self::Interpolated => 2,
        }
    }
}

/// Shape of one auxiliary field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuxShape {
    /// Debug label.
    pub label: &'static str,
    /// Element count.
    pub len: usize,
}

/// A chain `L0 > L1 > L2` with its reduction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainStencil {
    /// `[outer, middle, inner]` entity kinds.
    pub chain: [EntityKind; 3],
    /// Reduction applied along the chain.
    pub reduction: Reduction,
}

impl ChainStencil {
    /// Stencil over `chain`.
    #[must_use]
    pub const fn new(chain: [EntityKind; 3], reduction: Reduction) -> Self {
        Self { chain, reduction }
    }

    /// Kind the output lives on.
    #[must_use]
    pub const fn outer(&self) -> EntityKind {
        self.chain[0]
    }

    /// Kind of the intermediate `t`.
    #[must_use]
    pub const fn mid(&self) -> EntityKind {
        self.chain[1]
    }

    /// Kind the input lives on.
    #[must_use]
    pub const fn inner(&self) -> EntityKind {
        self.chain[2]
    }

    /// Input field length.
    #[must_use]
    pub const fn input_len(&self, topology: &Topology, levels: usize) -> usize {
        topology.count(self.inner()) * levels
    }

    /// Output field length.
    #[must_use]
    pub const fn output_len(&self, topology: &Topology, levels: usize) -> usize {
        topology.count(self.outer()) * levels
    }

    /// Auxiliary field shapes in argument order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Mesh`] if the `L1 → L2` table is missing.
    pub fn aux_shapes(&self, topology: &Topology, levels: usize) -> Result<Vec<AuxShape>> {
        let n_outer = topology.count(self.outer());
        let n_mid = topology.count(self.mid());
        Ok(match self.reduction {
            Reduction::Plain => Vec::new(),
            Reduction::Weighted => vec![
                AuxShape {
                    label: "weight per level",
                    len: n_mid * levels,
                },
                AuxShape {
                    label: "weight per column",
                    len: n_mid,
                },
            ],
            Reduction::Interpolated => {
                let fan = topology.connectivity(self.mid(), self.inner())?.fan_out;
                let coefficient = AuxShape {
                    label: "interpolation coefficients",
                    len: n_mid * fan * levels,
                };
                let dense = |label| AuxShape {
                    label,
                    len: n_outer * levels,
                };
                vec![coefficient, dense("s0"), dense("s1"), dense("s2")]
            }
        })
    }
}

impl fmt::Display for ChainStencil {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c] = self.chain;
        write!(f, "{} > {} > {}", a.letter(), b.letter(), c.letter())
    }
}

/// Borrowed argument list shared by every variant.
#[derive(Debug)]
pub struct KernelArgs<'a, F> {
    /// Field on `L2`.
    pub input: &'a F,
    /// Auxiliary fields, [`Reduction::aux_count`] of them.
    pub aux: &'a [F],
    /// Field on `L0`; entities outside the compute range are left alone.
    pub output: &'a F,
}

/// One implementation strategy of a [`ChainStencil`].
pub trait KernelVariant<D: Device> {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// One-time setup: upload topology, size temporaries, build pipelines.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Mesh`] if the topology lacks a needed table, or a
    /// device error.
    fn setup(&mut self, topology: &Topology, level_count: usize, stream: &D::Stream) -> Result<()>;

    /// Issue the kernel on `stream`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Kernel`] if setup has not run or the arguments do
    /// not match the planned shapes.
    fn run(&self, args: &KernelArgs<'_, D::Field>, stream: &D::Stream) -> Result<()>;
}

/// A device that can build both variants of any stencil.
pub trait StencilBackend: Device + Sized + 'static {
    /// Fused single-pass variant.
    fn inlined(&self, stencil: ChainStencil) -> Box<dyn KernelVariant<Self>>;

    /// Staged variant with an intermediate on `L1`.
    fn sequential(&self, stencil: ChainStencil) -> Box<dyn KernelVariant<Self>>;
}

/// Host copy of everything a variant needs from the topology.
#[derive(Debug, Clone)]
pub(crate) struct ChainPlan {
    pub stencil: ChainStencil,
    pub levels: usize,
    pub n_outer: usize,
    pub n_mid: usize,
    pub n_inner: usize,
    pub range: Range<usize>,
    /// `L0 → L1`
    pub outer_nbr: Connectivity,
    /// `L1 → L2`
    pub inner_nbr: Connectivity,
    pub aux: Vec<AuxShape>,
}

impl ChainPlan {
    pub fn new(stencil: ChainStencil, topology: &Topology, levels: usize) -> Result<Self> {
        if levels == 0 {
            return Err(Error::Kernel("level count must be >= 1".into()));
        }
        Ok(Self {
            stencil,
            levels,
            n_outer: topology.count(stencil.outer()),
            n_mid: topology.count(stencil.mid()),
            n_inner: topology.count(stencil.inner()),
            range: topology.compute_range(stencil.outer()),
            outer_nbr: topology.connectivity(stencil.outer(), stencil.mid())?.clone(),
            inner_nbr: topology.connectivity(stencil.mid(), stencil.inner())?.clone(),
            aux: stencil.aux_shapes(topology, levels)?,
        })
    }

    /// Reject an argument list that does not match the planned shapes.
    pub fn check_args<F: DeviceField>(&self, args: &KernelArgs<'_, F>) -> Result<()> {
        let expect = |what: &str, want: usize, got: usize| {
            if want == got {
                Ok(())
            } else {
                Err(Error::Kernel(format!(
                    "{}: {what} has {got} elements, expected {want}",
                    self.stencil
                )))
            }
        };
        expect("input", self.n_inner * self.levels, args.input.len())?;
        expect("output", self.n_outer * self.levels, args.output.len())?;
        expect("aux count", self.aux.len(), args.aux.len())?;
        for (shape, field) in self.aux.iter().zip(args.aux) {
            expect(shape.label, shape.len, field.len())?;
        }
        Ok(())
    }
}

pub(crate) fn not_set_up(variant: &str, stencil: ChainStencil) -> Error {
    Error::Kernel(format!("{variant} {stencil}: run before setup"))
}
