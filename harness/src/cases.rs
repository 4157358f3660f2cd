// SPDX-License-Identifier: AGPL-3.0-or-later
//! Registered variant-pair benchmarks.
//!
//! One generic benchmark is instantiated per row: the chain fixes the
//! entity counts and the sparse dimension, the reduction fixes the
//! auxiliary fields, and the level count is the one each case was
//! originally tuned with.

use crate::kernels::{ChainStencil, Reduction};
use crate::mesh::EntityKind::{Cell as C, Edge as E, Vertex as V};

/// One registered benchmark.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Case {
    /// Label printed at the start of the summary line.
    pub label: &'static str,
    /// Chain and reduction both variants implement.
    pub stencil: ChainStencil,
    /// Reference vertical level count.
    pub levels: usize,
}

/// Every case the benchmark binary knows.
pub const REGISTRY: &[Case] = &[
    Case {
        label: "E > C > V",
        stencil: ChainStencil::new([E, C, V], Reduction::Plain),
        levels: 80,
    },
    Case {
        label: "C > V > C",
        stencil: ChainStencil::new([C, V, C], Reduction::Weighted),
        levels: 80,
    },
    Case {
        label: "V > C > V",
        stencil: ChainStencil::new([V, C, V], Reduction::Weighted),
        levels: 80,
    },
    Case {
        label: "C > E > V",
        stencil: ChainStencil::new([C, E, V], Reduction::Interpolated),
        levels: 65,
    },
    Case {
        label: "E > C > V int",
        stencil: ChainStencil::new([E, C, V], Reduction::Interpolated),
        levels: 65,
    },
    Case {
        label: "V > E > C",
        stencil: ChainStencil::new([V, E, C], Reduction::Interpolated),
        levels: 65,
    },
];

/// Cases whose label contains `filter` (case-insensitive); all when `None`.
#[must_use]
pub fn select(filter: Option<&str>) -> Vec<&'static Case> {
    let needle = filter.map(str::to_ascii_lowercase);
    REGISTRY
        .iter()
        .filter(|c| {
            needle
                .as_deref()
                .map_or(true, |n| c.label.to_ascii_lowercase().contains(n))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn labels_are_unique() {
        let labels: HashSet<_> = REGISTRY.iter().map(|c| c.label).collect();
        assert_eq!(labels.len(), REGISTRY.len());
    }

    #[test]
    fn labels_start_with_chain() {
        for c in REGISTRY {
            assert!(c.label.starts_with(&c.stencil.to_string()), "{}", c.label);
        }
    }

    #[test]
    fn chains_never_repeat_adjacent_kinds() {
        for c in REGISTRY {
            let [a, b, d] = c.stencil.chain;
            assert!(a != b && b != d, "{}", c.label);
        }
    }

    #[test]
    fn filter_selects_by_substring() {
        assert_eq!(select(None).len(), REGISTRY.len());
        let int: Vec<_> = select(Some("INT")).iter().map(|c| c.label).collect();
        assert_eq!(int, vec!["E > C > V int"]);
        assert_eq!(select(Some("E > C > V")).len(), 2);
        assert!(select(Some("nope")).is_empty());
    }
}
