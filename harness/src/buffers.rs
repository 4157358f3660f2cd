// SPDX-License-Identifier: AGPL-3.0-or-later
//! Device buffer manager: allocation, deterministic fill, exact duplication.
//!
//! All fields of a run are allocated once during setup and live until the
//! manager's owner drops them at teardown. The sequential variant's input
//! is always a device-to-device copy of the inlined variant's input, never
//! a second fill, so both variants start from identical bits.

use crate::device::{Device, DeviceField};
use crate::error::{Error, Result};
use crate::kernels::{ChainStencil, KernelArgs};
use crate::mesh::Topology;

/// 64-bit linear congruential generator (Knuth MMIX constants).
#[derive(Debug, Clone)]
pub struct Lcg64 {
    state: u64,
}

impl Lcg64 {
    const MULT: u64 = 6_364_136_223_846_793_005;
    const INC: u64 = 1_442_695_040_888_963_407;

    /// Generator seeded with `seed`.
    #[must_use]
    pub const fn new(seed: u64) -> Self {
        Self {
            state: seed.wrapping_mul(Self::MULT).wrapping_add(Self::INC),
        }
    }

    /// Next raw state.
    pub fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_mul(Self::MULT).wrapping_add(Self::INC);
        self.state
    }

    /// Uniform in `[0, 1)` from the top 53 bits.
    #[allow(clippy::cast_precision_loss)]
    pub fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / ((1_u64 << 53) as f64)
    }
}

/// Allocates and initialises the fields of one benchmark.
pub struct BufferManager<'d, D: Device> {
    device: &'d D,
    rng: Lcg64,
    reserved_bytes: u64,
}

impl<'d, D: Device> BufferManager<'d, D> {
    /// Manager over `device` whose fills derive from `seed`.
    pub const fn new(device: &'d D, seed: u64) -> Self {
        Self {
            device,
            rng: Lcg64::new(seed),
            reserved_bytes: 0,
        }
    }

    /// Bytes allocated through this manager so far.
    pub const fn reserved_bytes(&self) -> u64 {
        self.reserved_bytes
    }

    /// Reserve a zeroed field of `len` elements.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for `len == 0` and
    /// [`Error::Allocation`] if the device is out of memory.
    pub fn allocate(&mut self, len: usize, label: &str) -> Result<D::Field> {
        if len == 0 {
            return Err(Error::InvalidConfig(format!(
                "field '{label}' would be empty"
            )));
        }
        let field = self.device.allocate(len, label)?;
        self.reserved_bytes += field.size_bytes();
        tracing::debug!(
            label,
            len,
            total_bytes = self.reserved_bytes,
            "allocated field"
        );
        Ok(field)
    }

    /// Overwrite `field` with uniform values in `[0, 1)` from the seeded stream.
    ///
    /// # Errors
    ///
    /// Propagates device upload errors.
    pub fn fill_random(&mut self, field: &D::Field) -> Result<()> {
        let values: Vec<f64> = (0..field.len()).map(|_| self.rng.next_f64()).collect();
        self.device.upload(field, &values)
    }

    /// Exact device-to-device copy of `src` into `dst`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShapeMismatch`] if the lengths differ.
    pub fn duplicate(&self, dst: &D::Field, src: &D::Field) -> Result<()> {
        if dst.len() != src.len() {
            return Err(Error::ShapeMismatch {
                expected: dst.len(),
                actual: src.len(),
            });
        }
        self.device.copy(dst, src)
    }

    /// Allocate and initialise every field `stencil` needs.
    ///
    /// # Errors
    ///
    /// Propagates allocation, fill and topology errors.
    pub fn field_set(
        &mut self,
        stencil: &ChainStencil,
        topology: &Topology,
        levels: usize,
    ) -> Result<FieldSet<D::Field>> {
        let in_len = stencil.input_len(topology, levels);
        let out_len = stencil.output_len(topology, levels);

        let input_inlined = self.allocate(in_len, "input (inlined)")?;
        self.fill_random(&input_inlined)?;
        let input_sequential = self.allocate(in_len, "input (sequential)")?;
        self.duplicate(&input_sequential, &input_inlined)?;

        let mut aux = Vec::new();
        for shape in stencil.aux_shapes(topology, levels)? {
            let field = self.allocate(shape.len, shape.label)?;
            self.fill_random(&field)?;
            aux.push(field);
        }

        let output_inlined = self.allocate(out_len, "output (inlined)")?;
        let output_sequential = self.allocate(out_len, "output (sequential)")?;
        tracing::info!(
            stencil = %stencil,
            fields = 4 + aux.len(),
            bytes = self.reserved_bytes,
            "fields allocated"
        );
        Ok(FieldSet {
            input_inlined,
            input_sequential,
            aux,
            output_inlined,
            output_sequential,
        })
    }
}

/// Every field of one benchmark case.
#[derive(Debug)]
pub struct FieldSet<F> {
    /// Input read by the inlined variant.
    pub input_inlined: F,
    /// Bit-identical copy read by the sequential variant.
    pub input_sequential: F,
    /// Read-only auxiliary fields, shared.
    pub aux: Vec<F>,
    /// Written by the inlined variant.
    pub output_inlined: F,
    /// Written by the sequential variant.
    pub output_sequential: F,
}

impl<F> FieldSet<F> {
    /// Argument list of the inlined variant.
    pub fn inlined_args(&self) -> KernelArgs<'_, F> {
        KernelArgs {
            input: &self.input_inlined,
            aux: &self.aux,
            output: &self.output_inlined,
        }
    }

    /// Argument list of the sequential variant.
    pub fn sequential_args(&self) -> KernelArgs<'_, F> {
        KernelArgs {
            input: &self.input_sequential,
            aux: &self.aux,
            output: &self.output_sequential,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::device::HostDevice;
    use crate::kernels::Reduction;
    use crate::mesh::{EntityKind, Mesh, TriMesh};

    #[test]
    fn lcg_is_reproducible_and_in_unit_interval() {
        let mut a = Lcg64::new(42);
        let mut b = Lcg64::new(42);
        for _ in 0..1000 {
            let x = a.next_f64();
            assert_eq!(x.to_bits(), b.next_f64().to_bits());
            assert!((0.0..1.0).contains(&x));
        }
        assert_ne!(Lcg64::new(1).next_u64(), Lcg64::new(2).next_u64());
    }

    #[test]
    fn zero_length_is_rejected() {
        let dev = HostDevice::new();
        let mut mgr = BufferManager::new(&dev, 0);
        assert!(matches!(mgr.allocate(0, "x"), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn duplicate_checks_shape() {
        let dev = HostDevice::new();
        let mut mgr = BufferManager::new(&dev, 0);
        let a = mgr.allocate(3, "a").unwrap();
        let b = mgr.allocate(4, "b").unwrap();
        assert!(matches!(
            mgr.duplicate(&b, &a),
            Err(Error::ShapeMismatch {
                expected: 4,
                actual: 3
            })
        ));
        assert_eq!(mgr.reserved_bytes(), 56);
    }

    #[test]
    fn allocation_failure_propagates() {
        let dev = HostDevice::with_memory_limit(64);
        let mut mgr = BufferManager::new(&dev, 0);
        assert!(matches!(
            mgr.allocate(9, "too big"),
            Err(Error::Allocation { .. })
        ));
    }

    #[test]
    fn field_set_inputs_are_bit_identical() {
        let dev = HostDevice::new();
        let topo = TriMesh::structured(5, 4).unwrap().topology().unwrap();
        let s = ChainStencil::new(
            [EntityKind::Edge, EntityKind::Cell, EntityKind::Vertex],
            Reduction::Interpolated,
        );
        let mut mgr = BufferManager::new(&dev, 7);
        let set = mgr.field_set(&s, &topo, 3).unwrap();

        let a = dev.read(&set.input_inlined).unwrap();
        let b = dev.read(&set.input_sequential).unwrap();
        assert_eq!(a.len(), 20 * 3);
        assert!(a.iter().zip(&b).all(|(x, y)| x.to_bits() == y.to_bits()));
        assert_eq!(set.aux.len(), 4);
        assert!(dev
            .read(&set.output_inlined)
            .unwrap()
            .iter()
            .all(|&v| v == 0.0));
        assert_eq!(set.inlined_args().aux.len(), set.sequential_args().aux.len());
    }

    #[test]
    fn same_seed_same_fill() {
        let dev = HostDevice::new();
        let fill = |seed| {
            let mut mgr = BufferManager::new(&dev, seed);
            let f = mgr.allocate(16, "f").unwrap();
            mgr.fill_random(&f).unwrap();
            dev.read(&f).unwrap()
        };
        assert_eq!(fill(3), fill(3));
        assert_ne!(fill(3), fill(4));
    }
}
