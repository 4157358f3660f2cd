// SPDX-License-Identifier: AGPL-3.0-or-later
//! Host loops for both chain-stencil variants.

use std::cell::RefCell;

use super::{
    not_set_up, ChainPlan, ChainStencil, KernelArgs, KernelVariant, Reduction, StencilBackend,
};
use crate::device::{HostDevice, HostField, HostStream};
use crate::error::Result;
use crate::mesh::Topology;

/// Fused single pass over the compute range.
#[derive(Debug)]
pub struct HostInlined {
    stencil: ChainStencil,
    plan: Option<ChainPlan>,
}

impl HostInlined {
    /// Variant for `stencil`; call `setup` before `run`.
    #[must_use]
    pub const fn new(stencil: ChainStencil) -> Self {
        Self {
            stencil,
            plan: None,
        }
    }
}

impl KernelVariant<HostDevice> for HostInlined {
    fn name(&self) -> &'static str {
        "inlined"
    }

    fn setup(
        &mut self,
        topology: &Topology,
        level_count: usize,
        _stream: &HostStream,
    ) -> Result<()> {
        self.plan = Some(ChainPlan::new(self.stencil, topology, level_count)?);
        Ok(())
    }

    fn run(&self, args: &KernelArgs<'_, HostField>, _stream: &HostStream) -> Result<()> {
        let plan = self
            .plan
            .as_ref()
            .ok_or_else(|| not_set_up(self.name(), self.stencil))?;
        plan.check_args(args)?;

        let input = args.input.values()?;
        let aux = args
            .aux
            .iter()
            .map(HostField::values)
            .collect::<Result<Vec<_>>>()?;
        let mut out = args.output.values_mut()?;

        let (n_outer, n_mid, n_inner) = (plan.n_outer, plan.n_mid, plan.n_inner);
        let fan_inner = plan.inner_nbr.fan_out;
        for k in 0..plan.levels {
            let level_in = &input[k * n_inner..(k + 1) * n_inner];
            for i in plan.range.clone() {
                let mut acc = 0.0;
                for &j in plan.outer_nbr.neighbors(i) {
                    let j = j as usize;
                    let nbrs = plan.inner_nbr.neighbors(j);
                    match plan.stencil.reduction {
                        Reduction::Plain => {
                            for &m in nbrs {
                                acc += level_in[m as usize];
                            }
                        }
                        Reduction::Weighted => {
                            let w = aux[0][k * n_mid + j] * aux[1][j];
                            for &m in nbrs {
                                acc += w * level_in[m as usize];
                            }
                        }
                        Reduction::Interpolated => {
                            for (n, &m) in nbrs.iter().enumerate() {
                                let c = aux[0][(k * fan_inner + n) * n_mid + j];
                                acc += c * level_in[m as usize];
                            }
                        }
                    }
                }
                let o = k * n_outer + i;
                out[o] = match plan.stencil.reduction {
                    Reduction::Interpolated => aux[1][o] + aux[2][o] * acc + aux[3][o] * acc * acc,
                    Reduction::Plain | Reduction::Weighted => acc,
                };
            }
        }
        Ok(())
    }
}

/// Two stages through an `L1` temporary sized in `setup`.
#[derive(Debug)]
pub struct HostSequential {
    stencil: ChainStencil,
    plan: Option<ChainPlan>,
    tmp: RefCell<Vec<f64>>,
}

impl HostSequential {
    /// Variant for `stencil`; call `setup` before `run`.
    #[must_use]
    pub const fn new(stencil: ChainStencil) -> Self {
        Self {
            stencil,
            plan: None,
            tmp: RefCell::new(Vec::new()),
        }
    }
}

impl KernelVariant<HostDevice> for HostSequential {
    fn name(&self) -> &'static str {
        "sequential"
    }

    fn setup(
        &mut self,
        topology: &Topology,
        level_count: usize,
        _stream: &HostStream,
    ) -> Result<()> {
        let plan = ChainPlan::new(self.stencil, topology, level_count)?;
        *self.tmp.get_mut() = vec![0.0; plan.n_mid * plan.levels];
        self.plan = Some(plan);
        Ok(())
    }

    fn run(&self, args: &KernelArgs<'_, HostField>, _stream: &HostStream) -> Result<()> {
        let plan = self
            .plan
            .as_ref()
            .ok_or_else(|| not_set_up(self.name(), self.stencil))?;
        plan.check_args(args)?;

        let input = args.input.values()?;
        let aux = args
            .aux
            .iter()
            .map(HostField::values)
            .collect::<Result<Vec<_>>>()?;
        let mut out = args.output.values_mut()?;
        let mut tmp = self.tmp.borrow_mut();

        let (n_outer, n_mid, n_inner) = (plan.n_outer, plan.n_mid, plan.n_inner);
        let fan_inner = plan.inner_nbr.fan_out;

        // stage 1: every L1 entity
        for k in 0..plan.levels {
            let level_in = &input[k * n_inner..(k + 1) * n_inner];
            for j in 0..n_mid {
                let nbrs = plan.inner_nbr.neighbors(j);
                let t = match plan.stencil.reduction {
                    Reduction::Plain => nbrs.iter().map(|&m| level_in[m as usize]).sum(),
                    Reduction::Weighted => {
                        let s: f64 = nbrs.iter().map(|&m| level_in[m as usize]).sum();
                        aux[0][k * n_mid + j] * aux[1][j] * s
                    }
                    Reduction::Interpolated => nbrs
                        .iter()
                        .enumerate()
                        .map(|(n, &m)| {
                            aux[0][(k * fan_inner + n) * n_mid + j] * level_in[m as usize]
                        })
                        .sum(),
                };
                tmp[k * n_mid + j] = t;
            }
        }

        // stage 2: compute range of L0
        for k in 0..plan.levels {
            let level_tmp = &tmp[k * n_mid..(k + 1) * n_mid];
            for i in plan.range.clone() {
                let u: f64 = plan
                    .outer_nbr
                    .neighbors(i)
                    .iter()
                    .map(|&j| level_tmp[j as usize])
                    .sum();
                let o = k * n_outer + i;
                out[o] = match plan.stencil.reduction {
                    Reduction::Interpolated => aux[1][o] + (aux[2][o] + aux[3][o] * u) * u,
                    Reduction::Plain | Reduction::Weighted => u,
                };
            }
        }
        Ok(())
    }
}

impl StencilBackend for HostDevice {
    fn inlined(&self, stencil: ChainStencil) -> Box<dyn KernelVariant<Self>> {
        Box::new(HostInlined::new(stencil))
    }

    fn sequential(&self, stencil: ChainStencil) -> Box<dyn KernelVariant<Self>> {
        Box::new(HostSequential::new(stencil))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::device::{Device, DeviceField};
    use crate::error::Error;
    use crate::mesh::{EntityKind, Mesh, Subdomain, TriMesh};

    const LEVELS: usize = 3;

    struct Case {
        dev: HostDevice,
        topo: Topology,
        input: HostField,
        aux: Vec<HostField>,
    }

    fn case(stencil: ChainStencil) -> Case {
        let dev = HostDevice::new();
        let topo = TriMesh::structured(4, 3).unwrap().topology().unwrap();
        let input = dev.allocate(stencil.input_len(&topo, LEVELS), "in").unwrap();
        let data: Vec<f64> = (0..input.len()).map(|x| (x % 7) as f64 * 0.25).collect();
        dev.upload(&input, &data).unwrap();
        let aux = stencil
            .aux_shapes(&topo, LEVELS)
            .unwrap()
            .iter()
            .enumerate()
            .map(|(a, s)| {
                let f = dev.allocate(s.len, s.label).unwrap();
                let v: Vec<f64> = (0..s.len).map(|x| ((x + a) % 5) as f64 * 0.5 + 0.5).collect();
                dev.upload(&f, &v).unwrap();
                f
            })
            .collect();
        Case {
            dev,
            topo,
            input,
            aux,
        }
    }

    fn run_both(stencil: ChainStencil, c: &Case) -> (Vec<f64>, Vec<f64>) {
        let stream = c.dev.stream().unwrap();
        let mut a = c.dev.inlined(stencil);
        let mut b = c.dev.sequential(stencil);
        a.setup(&c.topo, LEVELS, &stream).unwrap();
        b.setup(&c.topo, LEVELS, &stream).unwrap();
        let n = stencil.output_len(&c.topo, LEVELS);
        let out_a = c.dev.allocate(n, "out a").unwrap();
        let out_b = c.dev.allocate(n, "out b").unwrap();
        a.run(
            &KernelArgs {
                input: &c.input,
                aux: &c.aux,
                output: &out_a,
            },
            &stream,
        )
        .unwrap();
        b.run(
            &KernelArgs {
                input: &c.input,
                aux: &c.aux,
                output: &out_b,
            },
            &stream,
        )
        .unwrap();
        (c.dev.read(&out_a).unwrap(), c.dev.read(&out_b).unwrap())
    }

    #[test]
    fn plain_chain_of_ones_counts_paths() {
        // every vertex has 6 cells, every cell 3 edges: 18 paths
        let s = ChainStencil::new(
            [EntityKind::Vertex, EntityKind::Cell, EntityKind::Edge],
            Reduction::Plain,
        );
        let c = case(s);
        c.dev.upload(&c.input, &vec![1.0; c.input.len()]).unwrap();
        let (a, b) = run_both(s, &c);
        assert!(a.iter().all(|&v| v == 18.0));
        assert_eq!(a, b);
    }

    #[test]
    fn variants_agree_for_every_reduction() {
        for reduction in [Reduction::Plain, Reduction::Weighted, Reduction::Interpolated] {
            let s = ChainStencil::new(
                [EntityKind::Edge, EntityKind::Cell, EntityKind::Vertex],
                reduction,
            );
            let c = case(s);
            let (a, b) = run_both(s, &c);
            for (x, y) in a.iter().zip(&b) {
                assert!((x - y).abs() <= 1e-12, "{reduction:?}: {x} vs {y}");
            }
            assert!(a.iter().any(|&v| v != 0.0));
        }
    }

    #[test]
    fn interpolation_applies_quadratic() {
        let s = ChainStencil::new(
            [EntityKind::Cell, EntityKind::Edge, EntityKind::Vertex],
            Reduction::Interpolated,
        );
        let c = case(s);
        // zero input: u = 0, out = s0
        c.dev.upload(&c.input, &vec![0.0; c.input.len()]).unwrap();
        let (a, _) = run_both(s, &c);
        let s0 = c.dev.read(&c.aux[1]).unwrap();
        assert_eq!(a, s0);
    }

    #[test]
    fn only_compute_range_is_written() {
        let s = ChainStencil::new(
            [EntityKind::Cell, EntityKind::Vertex, EntityKind::Cell],
            Reduction::Weighted,
        );
        let mut c = case(s);
        c.topo
            .set_splitter_index_lower(EntityKind::Cell, Subdomain::Nudging, 5)
            .unwrap();
        c.topo
            .set_splitter_index_upper(EntityKind::Cell, Subdomain::Halo, 20)
            .unwrap();
        let (a, b) = run_both(s, &c);
        let n_cells = c.topo.count(EntityKind::Cell);
        for k in 0..LEVELS {
            for i in 0..n_cells {
                let v = a[k * n_cells + i];
                if (5..20).contains(&i) {
                    assert!(v > 0.0);
                } else {
                    assert_eq!(v, 0.0);
                    assert_eq!(b[k * n_cells + i], 0.0);
                }
            }
        }
    }

    #[test]
    fn run_before_setup_fails() {
        let s = ChainStencil::new(
            [EntityKind::Edge, EntityKind::Cell, EntityKind::Vertex],
            Reduction::Plain,
        );
        let c = case(s);
        let stream = c.dev.stream().unwrap();
        let out = c.dev.allocate(s.output_len(&c.topo, LEVELS), "out").unwrap();
        let v = HostInlined::new(s);
        let err = v
            .run(
                &KernelArgs {
                    input: &c.input,
                    aux: &c.aux,
                    output: &out,
                },
                &stream,
            )
            .unwrap_err();
        assert!(matches!(err, Error::Kernel(_)));
    }

    #[test]
    fn wrong_shape_is_rejected() {
        let s = ChainStencil::new(
            [EntityKind::Edge, EntityKind::Cell, EntityKind::Vertex],
            Reduction::Plain,
        );
        let c = case(s);
        let stream = c.dev.stream().unwrap();
        let mut v = HostSequential::new(s);
        v.setup(&c.topo, LEVELS, &stream).unwrap();
        let short = c.dev.allocate(4, "short").unwrap();
        let err = v
            .run(
                &KernelArgs {
                    input: &c.input,
                    aux: &c.aux,
                    output: &short,
                },
                &stream,
            )
            .unwrap_err();
        assert!(err.to_string().contains("output"));
    }
}
