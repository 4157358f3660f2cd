// SPDX-License-Identifier: AGPL-3.0-or-later
//! Doubly periodic structured triangle mesh.
//!
//! Vertex `(x, y)` has index `y * nx + x`. Every vertex owns three edges
//! (horizontal, diagonal, vertical, in that order) and every quad
//! `(x, y)` splits into a lower and an upper triangle:
//!
//! ```text
//!  (x,y+1) ──h── (x+1,y+1)
//!     │  upper  ╱   │
//!     v       d     v
//!     │   ╱  lower  │
//!  (x,y)  ──h── (x+1,y)
//! ```
//!
//! Periodicity makes every fan-out uniform (C→V 3, C→E 3, E→V 2, E→C 2,
//! V→C 6, V→E 6), which is what fixed-shape sparse fields need.

use super::{Connectivity, EntityKind, Mesh, Topology};
use crate::error::{Error, Result};

/// Periodic `nx × ny` triangulated grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriMesh {
    nx: usize,
    ny: usize,
}

impl TriMesh {
    /// Smallest extent for which periodic neighbours stay distinct.
    pub const MIN_EXTENT: usize = 3;

    /// Build an `nx × ny` periodic grid.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Mesh`] if either extent is below
    /// [`TriMesh::MIN_EXTENT`] or the edge count would not fit in `u32`.
    pub fn structured(nx: usize, ny: usize) -> Result<Self> {
        if nx < Self::MIN_EXTENT || ny < Self::MIN_EXTENT {
            return Err(Error::Mesh(format!(
                "structured mesh needs nx, ny >= {}, got {nx} x {ny}",
                Self::MIN_EXTENT
            )));
        }
        let edges = nx
            .checked_mul(ny)
            .and_then(|v| v.checked_mul(3))
            .filter(|&e| u32::try_from(e).is_ok());
        if edges.is_none() {
            return Err(Error::Mesh(format!("{nx} x {ny} mesh exceeds u32 indexing")));
        }
        Ok(Self { nx, ny })
    }

    // bounded by the u32 check in `structured`
    #[allow(clippy::cast_possible_truncation)]
    fn vertex(&self, x: usize, y: usize) -> u32 {
        ((y % self.ny) * self.nx + (x % self.nx)) as u32
    }

    fn edge(&self, x: usize, y: usize, orientation: u32) -> u32 {
        3 * self.vertex(x, y) + orientation
    }

    fn cell_to_vertex(&self) -> Connectivity {
        let mut table = Vec::with_capacity(self.nx * self.ny * 6);
        for y in 0..self.ny {
            for x in 0..self.nx {
                // lower, then upper
                table.extend([
                    self.vertex(x, y),
                    self.vertex(x + 1, y),
                    self.vertex(x + 1, y + 1),
                ]);
                table.extend([
                    self.vertex(x, y),
                    self.vertex(x + 1, y + 1),
                    self.vertex(x, y + 1),
                ]);
            }
        }
        Connectivity {
            from: EntityKind::Cell,
            to: EntityKind::Vertex,
            fan_out: 3,
            table,
        }
    }

    fn cell_to_edge(&self) -> Connectivity {
        const H: u32 = 0;
        const D: u32 = 1;
        const V: u32 = 2;
        let mut table = Vec::with_capacity(self.nx * self.ny * 6);
        for y in 0..self.ny {
            for x in 0..self.nx {
                table.extend([self.edge(x, y, H), self.edge(x + 1, y, V), self.edge(x, y, D)]);
                table.extend([self.edge(x, y, D), self.edge(x, y + 1, H), self.edge(x, y, V)]);
            }
        }
        Connectivity {
            from: EntityKind::Cell,
            to: EntityKind::Edge,
            fan_out: 3,
            table,
        }
    }

    fn edge_to_vertex(&self) -> Connectivity {
        let mut table = Vec::with_capacity(self.nx * self.ny * 6);
        for y in 0..self.ny {
            for x in 0..self.nx {
                let origin = self.vertex(x, y);
                table.extend([origin, self.vertex(x + 1, y)]);
                table.extend([origin, self.vertex(x + 1, y + 1)]);
                table.extend([origin, self.vertex(x, y + 1)]);
            }
        }
        Connectivity {
            from: EntityKind::Edge,
            to: EntityKind::Vertex,
            fan_out: 2,
            table,
        }
    }
}

impl Mesh for TriMesh {
    fn entity_count(&self, kind: EntityKind) -> usize {
        let v = self.nx * self.ny;
        match kind {
            EntityKind::Cell => 2 * v,
            EntityKind::Edge => 3 * v,
            EntityKind::Vertex => v,
        }
    }

    fn topology(&self) -> Result<Topology> {
        let counts = EntityKind::ALL.map(|k| self.entity_count(k));
        let n_cells = counts[EntityKind::Cell.index()];
        let n_edges = counts[EntityKind::Edge.index()];
        let n_verts = counts[EntityKind::Vertex.index()];

        let c2v = self.cell_to_vertex();
        let c2e = self.cell_to_edge();
        let e2v = self.edge_to_vertex();
        let v2c = c2v.invert(n_verts)?;
        let e2c = c2e.invert(n_edges)?;
        let v2e = e2v.invert(n_verts)?;

        tracing::debug!(
            cells = n_cells,
            edges = n_edges,
            vertices = n_verts,
            "built periodic triangle topology"
        );
        Topology::new(counts, vec![c2v, c2e, e2v, v2c, e2c, v2e])
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn rejects_degenerate_extent() {
        assert!(TriMesh::structured(2, 8).is_err());
        assert!(TriMesh::structured(8, 0).is_err());
    }

    #[test]
    fn counts_follow_euler_on_torus() {
        let mesh = TriMesh::structured(5, 4).unwrap();
        let v = mesh.entity_count(EntityKind::Vertex);
        let e = mesh.entity_count(EntityKind::Edge);
        let c = mesh.entity_count(EntityKind::Cell);
        assert_eq!((v, e, c), (20, 60, 40));
        // V - E + F = 0 on a torus
        assert_eq!(v + c, e);
    }

    #[test]
    fn all_fan_outs_are_uniform() {
        let topo = TriMesh::structured(4, 3).unwrap().topology().unwrap();
        let expect = [
            (EntityKind::Cell, EntityKind::Vertex, 3),
            (EntityKind::Cell, EntityKind::Edge, 3),
            (EntityKind::Edge, EntityKind::Vertex, 2),
            (EntityKind::Edge, EntityKind::Cell, 2),
            (EntityKind::Vertex, EntityKind::Cell, 6),
            (EntityKind::Vertex, EntityKind::Edge, 6),
        ];
        for (from, to, fan) in expect {
            let conn = topo.connectivity(from, to).unwrap();
            assert_eq!(conn.fan_out, fan, "{from} → {to}");
            assert_eq!(conn.rows(), topo.count(from));
        }
    }

    #[test]
    fn cell_edges_join_cell_vertices() {
        let topo = TriMesh::structured(4, 5).unwrap().topology().unwrap();
        let c2v = topo.connectivity(EntityKind::Cell, EntityKind::Vertex).unwrap();
        let c2e = topo.connectivity(EntityKind::Cell, EntityKind::Edge).unwrap();
        let e2v = topo.connectivity(EntityKind::Edge, EntityKind::Vertex).unwrap();
        for c in 0..topo.count(EntityKind::Cell) {
            let corners: HashSet<u32> = c2v.neighbors(c).iter().copied().collect();
            assert_eq!(corners.len(), 3);
            for &e in c2e.neighbors(c) {
                for &v in e2v.neighbors(e as usize) {
                    assert!(corners.contains(&v), "cell {c} edge {e} leaves the cell");
                }
            }
        }
    }

    #[test]
    fn neighbours_are_distinct() {
        let topo = TriMesh::structured(3, 3).unwrap().topology().unwrap();
        let v2c = topo.connectivity(EntityKind::Vertex, EntityKind::Cell).unwrap();
        for v in 0..topo.count(EntityKind::Vertex) {
            let set: HashSet<u32> = v2c.neighbors(v).iter().copied().collect();
            assert_eq!(set.len(), 6);
        }
    }
}
