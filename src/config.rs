//! Engine configuration, loaded from TOML.
//!
//! ```toml
//! [pool]
//! num_workers = 8
//! worker_budget_bytes = 4294967296
//! task_timeout_secs = 90
//!
//! [loader]
//! max_retries = 5
//! concurrency = 16
//! priority_regions = ["TX", "CA"]
//! cache_root = "/var/cache/topology"
//! ```

use std::{path::{Path, PathBuf}, time::Duration};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sysinfo::System;

/// Environment variable overriding `loader.cache_root`.
pub const CACHE_DIR_ENV: &str = "TOPOLOGY_CACHE_DIRECTORY";

/// Largest regions first, by dataset size.
pub const DEFAULT_PRIORITY_REGIONS: [&str; 10] = ["TX", "CA", "PA", "FL", "NC", "MO", "NY", "IL", "TN", "VA"];

const GIB: u64 = 1 << 30;

/// Memory held back for the host process outside the worker pool.
const RESERVED_BYTES: u64 = 3 * GIB;

/// Per-worker budget used when detection leaves nothing.
const MIN_WORKER_BUDGET: u64 = GIB / 2;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub pool: PoolConfig,
    pub loader: LoaderConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub num_workers: usize,
    /// Resident-data budget per worker; detected from host memory if unset.
    pub worker_budget_bytes: Option<u64>,
    pub task_timeout_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self { num_workers: num_cpus::get().max(1), worker_budget_bytes: None, task_timeout_secs: 90 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    pub max_retries: u32,
    /// Regions loaded at once during preload.
    pub concurrency: usize,
    /// Region codes preloaded first, in this order.
    pub priority_regions: Vec<String>,
    /// Local topology cache directory; no disk cache if unset.
    pub cache_root: Option<PathBuf>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            concurrency: 2 * num_cpus::get().max(1),
            priority_regions: DEFAULT_PRIORITY_REGIONS.iter().map(|s| s.to_string()).collect(),
            cache_root: None,
        }
    }
}

impl EngineConfig {
    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("[config] Failed to read {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("[config] Invalid config file {}", path.display()))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("[config] Failed to parse TOML")
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).context("[config] Failed to serialize TOML")
    }

    /// Apply environment overrides.
    pub fn with_env(mut self) -> Self {
        if let Some(dir) = std::env::var_os(CACHE_DIR_ENV).filter(|dir| !dir.is_empty()) {
            self.loader.cache_root = Some(PathBuf::from(dir));
        }
        self
    }

    /// Per-worker budget, detecting host memory when not configured.
    pub fn worker_budget(&self) -> u64 {
        self.pool.worker_budget_bytes
            .unwrap_or_else(|| MemoryBudget::detect().per_worker(self.pool.num_workers))
    }

    pub fn task_timeout(&self) -> Duration { Duration::from_secs(self.pool.task_timeout_secs) }
}

// ---------------------------------------------------------------------------
// Memory detection
// ---------------------------------------------------------------------------

/// Memory visible to the process: host total and container limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryBudget {
    pub host_bytes: Option<u64>,
    pub cgroup_bytes: Option<u64>,
}

impl MemoryBudget {
    pub fn detect() -> Self {
        let mut sys = System::new();
        sys.refresh_memory();
        let host_bytes = Some(sys.total_memory()).filter(|&total| total > 0);
        let cgroup_bytes = sys.cgroup_limits().map(|limits| limits.total_memory);
        tracing::debug!(host_bytes, cgroup_bytes, "detected memory");
        Self { host_bytes, cgroup_bytes }
    }

    /// The smaller of the host total and the container limit.
    pub fn available(&self) -> Option<u64> {
        match (self.host_bytes, self.cgroup_bytes) {
            (Some(h), Some(c)) => Some(h.min(c)),
            (h, c) => h.or(c),
        }
    }

    /// Half the available memory, less a fixed reserve, split across
    /// `num_workers`.
    pub fn per_worker(&self, num_workers: usize) -> u64 {
        let pool = self.available()
            .map_or(0, |available| (available / 2).saturating_sub(RESERVED_BYTES));
        (pool / num_workers.max(1) as u64).max(MIN_WORKER_BUDGET)
    }
}
