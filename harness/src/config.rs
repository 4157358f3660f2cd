// SPDX-License-Identifier: AGPL-3.0-or-later
//! Run configuration, fixed for the lifetime of a benchmark process.
//!
//! [`BenchmarkConfig::default`] reproduces the constants the reference
//! benchmarks were built with. The process entry takes no arguments;
//! individual values can be overridden through `STENCIL_BENCH_*`
//! environment variables. Parsing is separated from the process
//! environment ([`BenchmarkConfig::from_lookup`]) so it can be tested
//! without mutating global state.

use std::str::FromStr;

use crate::error::{Error, Result};
use crate::mesh::{EntityKind, SplitterIndices, TriMesh};
use crate::tolerances;

/// Environment variable prefix for all overrides.
pub const ENV_PREFIX: &str = "STENCIL_BENCH_";

/// Where the mesh comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeshSource {
    /// Generated periodic triangle grid of `nx × ny` vertices.
    Structured {
        /// Vertices along x.
        nx: usize,
        /// Vertices along y.
        ny: usize,
    },
}

impl MeshSource {
    /// Materialize the mesh.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Mesh`] if the mesh cannot be built.
    pub fn load(&self) -> Result<TriMesh> {
        match *self {
            Self::Structured { nx, ny } => TriMesh::structured(nx, ny),
        }
    }
}

impl FromStr for MeshSource {
    type Err = Error;

    /// Parse `NXxNY`, e.g. `128x82`.
    fn from_str(s: &str) -> Result<Self> {
        let (nx, ny) = s
            .split_once(['x', 'X'])
            .ok_or_else(|| Error::InvalidConfig(format!("mesh '{s}' is not NXxNY")))?;
        Ok(Self::Structured {
            nx: parse_number("mesh nx", nx.trim())?,
            ny: parse_number("mesh ny", ny.trim())?,
        })
    }
}

/// How a verification mismatch maps onto the process exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExitPolicy {
    /// Exit 1 when any case fails verification.
    #[default]
    Strict,
    /// Report the mismatch on stdout but exit 0.
    ReportOnly,
}

impl FromStr for ExitPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "report-only" | "report_only" => Ok(Self::ReportOnly),
            other => Err(Error::InvalidConfig(format!(
                "exit policy '{other}' (expected strict | report-only)"
            ))),
        }
    }
}

/// Which device backend executes the kernels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendChoice {
    /// In-process reference backend.
    #[default]
    Host,
    /// wgpu, any native backend.
    Gpu,
    /// wgpu restricted to Vulkan.
    Vulkan,
    /// wgpu restricted to Metal.
    Metal,
    /// wgpu restricted to DirectX 12.
    Dx12,
}

impl BackendChoice {
    /// Whether this choice needs a GPU adapter.
    #[must_use]
    pub const fn is_gpu(self) -> bool {
        !matches!(self, Self::Host)
    }
}

impl FromStr for BackendChoice {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "host" | "cpu" => Ok(Self::Host),
            "gpu" => Ok(Self::Gpu),
            "vulkan" => Ok(Self::Vulkan),
            "metal" => Ok(Self::Metal),
            "dx12" => Ok(Self::Dx12),
            other => Err(Error::InvalidConfig(format!(
                "backend '{other}' (expected host | gpu | vulkan | metal | dx12)"
            ))),
        }
    }
}

/// Subdomain splitter indices, one `[nudging lower, halo upper)` pair per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Splitters {
    /// Primary entities.
    pub cells: SplitterIndices,
    /// Secondary entities.
    pub edges: SplitterIndices,
    /// Tertiary entities.
    pub vertices: SplitterIndices,
}

impl Splitters {
    /// Pair for `kind`.
    #[must_use]
    pub const fn get(&self, kind: EntityKind) -> SplitterIndices {
        match kind {
            EntityKind::Cell => self.cells,
            EntityKind::Edge => self.edges,
            EntityKind::Vertex => self.vertices,
        }
    }

    /// Pairs indexed by [`EntityKind::index`].
    #[must_use]
    pub const fn as_array(&self) -> [SplitterIndices; 3] {
        [self.cells, self.edges, self.vertices]
    }
}

impl Default for Splitters {
    fn default() -> Self {
        Self {
            cells: SplitterIndices::new(3160, 20_339),
            edges: SplitterIndices::new(5134, 30_714),
            vertices: SplitterIndices::new(1209, 10_375),
        }
    }
}

/// Everything a benchmark run needs, supplied once at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct BenchmarkConfig {
    /// Vertical levels every dense field is replicated across.
    pub level_count: usize,
    /// Timed invocations per variant.
    pub repetition_count: usize,
    /// Maximum elementwise `|inlined - sequential|` that still passes.
    pub absolute_tolerance: f64,
    /// Compute range of each entity kind.
    pub splitters: Splitters,
    /// Mesh the fields are sized from.
    pub mesh: MeshSource,
    /// Seed of the input fill; fixed so the verdict is reproducible.
    pub seed: u64,
    /// Exit status on verification failure.
    pub exit_policy: ExitPolicy,
    /// Run only cases whose label contains this string.
    pub case_filter: Option<String>,
    /// Device backend.
    pub backend: BackendChoice,
    /// `level_count` was set explicitly and overrides per-case defaults.
    pub levels_pinned: bool,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            level_count: 80,
            repetition_count: 100_000,
            absolute_tolerance: tolerances::VARIANT_PARITY_F64,
            splitters: Splitters::default(),
            mesh: MeshSource::Structured { nx: 128, ny: 82 },
            seed: 42,
            exit_policy: ExitPolicy::Strict,
            case_filter: None,
            backend: BackendChoice::Host,
            levels_pinned: false,
        }
    }
}

impl BenchmarkConfig {
    /// Defaults overridden by `STENCIL_BENCH_*` variables of this process.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if a variable does not parse or the
    /// resulting config fails [`BenchmarkConfig::validate`].
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each
    /// `STENCIL_BENCH_*` key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] on an unparsable value or a config
    /// that fails validation.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));
        let mut cfg = Self::default();

        if let Some(v) = get("LEVELS") {
            cfg.level_count = parse_number("LEVELS", &v)?;
            cfg.levels_pinned = true;
        }
        if let Some(v) = get("REPETITIONS") {
            cfg.repetition_count = parse_number("REPETITIONS", &v)?;
        }
        if let Some(v) = get("TOLERANCE") {
            cfg.absolute_tolerance = parse_number("TOLERANCE", &v)?;
        }
        if let Some(v) = get("SEED") {
            cfg.seed = parse_number("SEED", &v)?;
        }
        if let Some(v) = get("MESH") {
            cfg.mesh = v.parse()?;
        }
        if let Some(v) = get("EXIT_POLICY") {
            cfg.exit_policy = v.parse()?;
        }
        if let Some(v) = get("BACKEND") {
            cfg.backend = v.parse()?;
        }
        cfg.case_filter = get("CASE").filter(|v| !v.trim().is_empty());

        cfg.validate()?;
        Ok(cfg)
    }

    /// Check values that do not depend on the mesh.
    ///
    /// Splitter bounds against entity counts are checked during setup.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] describing the first bad value.
    pub fn validate(&self) -> Result<()> {
        if self.level_count == 0 {
            return Err(Error::InvalidConfig("level_count must be >= 1".into()));
        }
        if self.repetition_count == 0 {
            return Err(Error::InvalidConfig("repetition_count must be >= 1".into()));
        }
        if !self.absolute_tolerance.is_finite() || self.absolute_tolerance < 0.0 {
            return Err(Error::InvalidConfig(format!(
                "absolute_tolerance must be finite and >= 0, got {}",
                self.absolute_tolerance
            )));
        }
        for kind in EntityKind::ALL {
            let s = self.splitters.get(kind);
            if s.nudging_lower > s.halo_upper {
                return Err(Error::InvalidConfig(format!(
                    "{kind}: nudging lower {} > halo upper {}",
                    s.nudging_lower, s.halo_upper
                )));
            }
        }
        Ok(())
    }

    /// Copy of this config with a different level count.
    #[must_use]
    pub fn with_levels(&self, level_count: usize) -> Self {
        Self {
            level_count,
            ..self.clone()
        }
    }

    /// Config for a case whose reference level count is `case_levels`,
    /// unless the level count was pinned.
    #[must_use]
    pub fn for_case(&self, case_levels: usize) -> Self {
        if self.levels_pinned {
            self.clone()
        } else {
            self.with_levels(case_levels)
        }
    }
}

fn parse_number<T: FromStr>(name: &str, raw: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| Error::InvalidConfig(format!("{name} = '{raw}': {e}")))
}
