// SPDX-License-Identifier: AGPL-3.0-or-later
//! Unstructured-mesh adapter: entity kinds, neighbour tables and splitters.
//!
//! The harness only needs two things from a mesh: how many entities of each
//! kind it has, and a [`Topology`] that kernel variants can upload during
//! their one-time setup. Any mesh source (generated, file-backed) plugs in
//! through the [`Mesh`] trait.

mod tri;

pub use tri::TriMesh;

use std::collections::HashMap;
use std::fmt;
use std::ops::Range;

use crate::error::{Error, Result};

/// Location an unstructured field lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    /// Primary entities (triangles).
    Cell,
    /// Secondary entities.
    Edge,
    /// Tertiary entities (nodes).
    Vertex,
}

impl EntityKind {
    /// All kinds, in primary/secondary/tertiary order.
    pub const ALL: [Self; 3] = [Self::Cell, Self::Edge, Self::Vertex];

    /// Dense index in [`EntityKind::ALL`].
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Cell => 0,
            Self::Edge => 1,
            Self::Vertex => 2,
        }
    }

    /// One-letter tag used in chain labels (`E > C > V`).
    #[must_use]
    pub const fn letter(self) -> char {
        match self {
            Self::Cell => 'C',
            Self::Edge => 'E',
            Self::Vertex => 'V',
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cell => write!(f, "cells"),
            Self::Edge => write!(f, "edges"),
            Self::Vertex => write!(f, "vertices"),
        }
    }
}

/// Named zone of a horizontal index range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subdomain {
    /// Lateral boundary relaxation zone; its lower index starts the compute range.
    Nudging,
    /// Halo exchange zone; its upper index ends the compute range.
    Halo,
}

/// Source → target neighbour table with uniform fan-out.
///
/// Stored row-major: neighbour `n` of entity `i` is `table[i * fan_out + n]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connectivity {
    /// Entity kind the rows belong to.
    pub from: EntityKind,
    /// Entity kind the neighbours belong to.
    pub to: EntityKind,
    /// Neighbours per row (the sparse dimension of fields on `from`).
    pub fan_out: usize,
    /// Flattened `[rows × fan_out]` neighbour indices.
    pub table: Vec<u32>,
}

impl Connectivity {
    /// Number of rows (source entities).
    #[must_use]
    pub fn rows(&self) -> usize {
        if self.fan_out == 0 {
            0
        } else {
            self.table.len() / self.fan_out
        }
    }

    /// Neighbours of source entity `i`.
    #[must_use]
    pub fn neighbors(&self, i: usize) -> &[u32] {
        &self.table[i * self.fan_out..(i + 1) * self.fan_out]
    }

    /// Reverse the table (`to → from`), which must come out with uniform fan-out.
    ///
    /// Rows of the result list source entities in ascending order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Mesh`] if a neighbour index is out of range or the
    /// reversed fan-out is not the same for every target entity.
    pub fn invert(&self, target_count: usize) -> Result<Self> {
        let mut rows: Vec<Vec<u32>> = vec![Vec::new(); target_count];
        for i in 0..self.rows() {
            let src = u32::try_from(i)
                .map_err(|_| Error::Mesh(format!("{} index {i} exceeds u32", self.from)))?;
            for &t in self.neighbors(i) {
                let row = rows.get_mut(t as usize).ok_or_else(|| {
                    Error::Mesh(format!(
                        "{} → {} neighbour {t} out of range ({target_count})",
                        self.from, self.to
                    ))
                })?;
                row.push(src);
            }
        }
        let fan_out = rows.first().map_or(0, Vec::len);
        if let Some(bad) = rows.iter().position(|r| r.len() != fan_out) {
            return Err(Error::Mesh(format!(
                "{} → {} is irregular: entity {bad} has {} neighbours, expected {fan_out}",
                self.to,
                self.from,
                rows[bad].len()
            )));
        }
        Ok(Self {
            from: self.to,
            to: self.from,
            fan_out,
            table: rows.into_iter().flatten().collect(),
        })
    }
}

/// Lower (nudging) and upper (halo) splitter index of one entity kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitterIndices {
    /// First index of the nudging zone.
    pub nudging_lower: usize,
    /// One past the last index of the halo zone.
    pub halo_upper: usize,
}

impl SplitterIndices {
    /// Construct a `[lower, upper)` pair.
    #[must_use]
    pub const fn new(nudging_lower: usize, halo_upper: usize) -> Self {
        Self {
            nudging_lower,
            halo_upper,
        }
    }
}

/// Host-side description of a mesh that kernel variants upload in `setup`.
#[derive(Debug, Clone)]
pub struct Topology {
    counts: [usize; 3],
    tables: HashMap<(EntityKind, EntityKind), Connectivity>,
    splitters: [SplitterIndices; 3],
}

impl Topology {
    /// Build a topology from entity counts and neighbour tables.
    ///
    /// Splitters default to the full extent of each kind.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Mesh`] if a table's row count disagrees with its
    /// source entity count.
    pub fn new(counts: [usize; 3], tables: Vec<Connectivity>) -> Result<Self> {
        let mut map = HashMap::with_capacity(tables.len());
        for conn in tables {
            let expected = counts[conn.from.index()];
            if conn.rows() != expected {
                return Err(Error::Mesh(format!(
                    "{} → {} has {} rows, mesh has {expected} {}",
                    conn.from,
                    conn.to,
                    conn.rows(),
                    conn.from
                )));
            }
            map.insert((conn.from, conn.to), conn);
        }
        let splitters = counts.map(|n| SplitterIndices::new(0, n));
        Ok(Self {
            counts,
            tables: map,
            splitters,
        })
    }

    /// Number of entities of `kind`.
    #[must_use]
    pub const fn count(&self, kind: EntityKind) -> usize {
        self.counts[kind.index()]
    }

    /// Neighbour table `from → to`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Mesh`] if the mesh provides no such table.
    pub fn connectivity(&self, from: EntityKind, to: EntityKind) -> Result<&Connectivity> {
        self.tables
            .get(&(from, to))
            .ok_or_else(|| Error::Mesh(format!("no {from} → {to} connectivity")))
    }

    /// Set the lower splitter index of `kind` for `subdomain`.
    ///
    /// Only the nudging zone carries a lower bound the harness uses.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for a subdomain other than
    /// [`Subdomain::Nudging`] or an index past the entity count.
    pub fn set_splitter_index_lower(
        &mut self,
        kind: EntityKind,
        subdomain: Subdomain,
        index: usize,
    ) -> Result<()> {
        if subdomain != Subdomain::Nudging {
            return Err(Error::InvalidConfig(format!(
                "lower splitter of {kind} must be set on the nudging zone, got {subdomain:?}"
            )));
        }
        self.check_bound(kind, index)?;
        self.splitters[kind.index()].nudging_lower = index;
        Ok(())
    }

    /// Set the upper splitter index of `kind` for `subdomain`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for a subdomain other than
    /// [`Subdomain::Halo`] or an index past the entity count.
    pub fn set_splitter_index_upper(
        &mut self,
        kind: EntityKind,
        subdomain: Subdomain,
        index: usize,
    ) -> Result<()> {
        if subdomain != Subdomain::Halo {
            return Err(Error::InvalidConfig(format!(
                "upper splitter of {kind} must be set on the halo zone, got {subdomain:?}"
            )));
        }
        self.check_bound(kind, index)?;
        self.splitters[kind.index()].halo_upper = index;
        Ok(())
    }

    /// Apply one `[lower, upper)` pair per kind.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if any bound exceeds its entity count
    /// or a lower bound exceeds its upper bound.
    pub fn apply_splitters(&mut self, splitters: &[SplitterIndices; 3]) -> Result<()> {
        for kind in EntityKind::ALL {
            let s = splitters[kind.index()];
            if s.nudging_lower > s.halo_upper {
                return Err(Error::InvalidConfig(format!(
                    "{kind}: nudging lower {} > halo upper {}",
                    s.nudging_lower, s.halo_upper
                )));
            }
            self.set_splitter_index_lower(kind, Subdomain::Nudging, s.nudging_lower)?;
            self.set_splitter_index_upper(kind, Subdomain::Halo, s.halo_upper)?;
        }
        Ok(())
    }

    /// Entities of `kind` a kernel writes: `[nudging lower, halo upper)`.
    #[must_use]
    pub const fn compute_range(&self, kind: EntityKind) -> Range<usize> {
        let s = self.splitters[kind.index()];
        s.nudging_lower..s.halo_upper
    }

    fn check_bound(&self, kind: EntityKind, index: usize) -> Result<()> {
        let n = self.count(kind);
        if index > n {
            return Err(Error::InvalidConfig(format!(
                "splitter index {index} exceeds {n} {kind}"
            )));
        }
        Ok(())
    }
}

/// A mesh the harness can size fields from and derive a topology of.
pub trait Mesh {
    /// Number of entities of `kind`.
    fn entity_count(&self, kind: EntityKind) -> usize;

    /// Convert to the neighbour-table form kernel variants consume.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Mesh`] if the mesh cannot be expressed with uniform
    /// fan-out tables.
    fn topology(&self) -> Result<Topology>;
}
