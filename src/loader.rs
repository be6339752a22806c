//! Region dataset loading and caching.
//!
//! Every region's dataset is loaded at most once: concurrent callers share
//! one in-flight load, and the outcome (dataset or failure) stays cached for
//! the life of the process.  Failed fetches are retried in sequence; when
//! retries run out a `FatalLoad` is sent to the supervisor channel returned
//! by `TopologyCache::new`.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex, PoisonError},
};

use anyhow::Context;
use serde::Serialize;
use thiserror::Error;
use tokio::{
    sync::{mpsc, OnceCell, Semaphore},
    task::JoinSet,
};
use tracing::{debug, error, info, warn};

use crate::{
    attributes::AttributeTables,
    config::LoaderConfig,
    metadata::{LevelOrder, StaticMetadata, STATIC_METADATA_FILE, TOPOLOGY_FILE},
    region::Region,
    source::RegionSource,
    store::{decode_topology, TopologySource},
};

/// Everything a worker needs to serve requests for one region.
#[derive(Debug)]
pub struct Dataset {
    pub region: Region,
    pub metadata: StaticMetadata,
    /// Levels coarsest to finest.
    pub order: LevelOrder,
    pub topology: TopologySource,
    pub tables: Arc<AttributeTables>,
}

impl Dataset {
    /// Bytes the scheduler charges a worker for holding this region.
    pub fn resident_size(&self) -> u64 {
        if self.region.size_bytes > 0 { return self.region.size_bytes }
        let topology = match &self.topology {
            TopologySource::Encoded(bytes) => bytes.len(),
            TopologySource::Stripped(topology) => topology.approx_bytes(),
        };
        (topology + self.tables.approx_bytes()) as u64
    }

    #[inline] pub fn is_archived(&self) -> bool { matches!(self.topology, TopologySource::Stripped(_)) }
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum LoadError {
    #[error("failed to load region {region} after {attempts} attempts: {message}")]
    Exhausted { region: String, attempts: u32, message: String },

    #[error("load of region {region} was cancelled: {message}")]
    Cancelled { region: String, message: String },
}

/// Sent to the supervisor when a region cannot be loaded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FatalLoad {
    pub region: String,
    pub attempts: u32,
    pub error: String,
}

/// Load state of a region, as reported by `TopologyCache::layers`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerStatus {
    Pending,
    Loaded,
    Failed,
}

/// Outcome of `preload_all`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PreloadReport {
    pub loaded: usize,
    pub failed: Vec<String>,
}

type Slot = Arc<OnceCell<Result<Arc<Dataset>, LoadError>>>;

pub struct TopologyCache {
    source: Arc<dyn RegionSource>,
    config: LoaderConfig,
    layers: Mutex<HashMap<String, Slot>>,
    fatal: mpsc::UnboundedSender<FatalLoad>,
}

impl TopologyCache {
    /// A cache over `source`, plus the receiving end of its fatal-load
    /// channel.
    pub fn new(source: Arc<dyn RegionSource>, config: LoaderConfig) -> (Arc<Self>, mpsc::UnboundedReceiver<FatalLoad>) {
        let (fatal, supervisor) = mpsc::unbounded_channel();
        let cache = Arc::new(Self { source, config, layers: Mutex::new(HashMap::new()), fatal });
        (cache, supervisor)
    }

    fn slot(&self, key: &str) -> Slot {
        let mut layers = self.layers.lock().unwrap_or_else(PoisonError::into_inner);
        layers.entry(key.to_string()).or_default().clone()
    }

    /// The dataset for `region`, loading it on first use.
    pub async fn get(&self, region: &Region) -> Result<Arc<Dataset>, LoadError> {
        let slot = self.slot(region.key());
        slot.get_or_init(|| self.load_with_retries(region)).await.clone()
    }

    /// Load every region, named priority regions first, a bounded number at
    /// a time.
    pub async fn preload_all(self: &Arc<Self>, mut regions: Vec<Region>) -> PreloadReport {
        let priority = |region: &Region| {
            self.config.priority_regions.iter()
                .position(|code| *code == region.region_code)
                .unwrap_or(usize::MAX)
        };
        regions.sort_by_key(|region| priority(region));

        // Register everything up front so `layers` reports queued regions.
        for region in &regions {
            self.slot(region.key());
        }

        info!(regions = regions.len(), concurrency = self.config.concurrency, "preloading regions");
        let window = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut tasks = JoinSet::new();
        for region in regions {
            let Ok(permit) = window.clone().acquire_owned().await else { break };
            let cache = self.clone();
            tasks.spawn(async move {
                let _permit = permit;
                let result = cache.get(&region).await;
                (region.location, result.is_ok())
            });
        }

        let mut report = PreloadReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, true)) => report.loaded += 1,
                Ok((location, false)) => report.failed.push(location),
                Err(e) => warn!(error = %e, "preload task failed"),
            }
        }
        info!(loaded = report.loaded, failed = report.failed.len(), "preload finished");
        report
    }

    /// Every known region and its load state.
    pub fn layers(&self) -> BTreeMap<String, LayerStatus> {
        let layers = self.layers.lock().unwrap_or_else(PoisonError::into_inner);
        layers.iter()
            .map(|(key, slot)| {
                let status = match slot.get() {
                    None => LayerStatus::Pending,
                    Some(Ok(_)) => LayerStatus::Loaded,
                    Some(Err(_)) => LayerStatus::Failed,
                };
                (key.clone(), status)
            })
            .collect()
    }

    async fn load_with_retries(&self, region: &Region) -> Result<Arc<Dataset>, LoadError> {
        let attempts = self.config.max_retries + 1;
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            let (source, owned) = (self.source.clone(), region.clone());
            match tokio::task::spawn_blocking(move || fetch_layer(source.as_ref(), &owned)).await {
                Ok(Ok(dataset)) => {
                    debug!(region = %region.key(), attempt, archived = dataset.is_archived(), "region loaded");
                    return Ok(Arc::new(dataset));
                }
                Ok(Err(e)) => {
                    warn!(region = %region.key(), attempt, error = %format!("{e:#}"), "failed to load region");
                    last_error = format!("{e:#}");
                }
                Err(e) => {
                    return Err(LoadError::Cancelled { region: region.key().to_string(), message: e.to_string() });
                }
            }
        }

        error!(region = %region.key(), attempts, error = %last_error, "giving up on region");
        let _ = self.fatal.send(FatalLoad { region: region.key().to_string(), attempts, error: last_error.clone() });
        Err(LoadError::Exhausted { region: region.key().to_string(), attempts, message: last_error })
    }
}

/// Fetch and assemble one region's dataset.  Archived regions are decoded
/// here and kept without geometries.
pub fn fetch_layer(source: &dyn RegionSource, region: &Region) -> anyhow::Result<Dataset> {
    let topology = source.get(region, TOPOLOGY_FILE)?;
    let metadata = StaticMetadata::from_json(&source.get(region, STATIC_METADATA_FILE)?)
        .with_context(|| format!("[loader] region {}", region.key()))?;
    let tables = AttributeTables::load(&metadata, |file| source.get(region, &file.file_name))
        .with_context(|| format!("[loader] region {}", region.key()))?;

    let topology = if region.archived {
        TopologySource::Stripped(Arc::new(decode_topology(&topology)?.strip_geometries()))
    } else {
        TopologySource::Encoded(topology)
    };

    Ok(Dataset {
        region: region.clone(),
        order: metadata.level_order(),
        metadata,
        topology,
        tables: Arc::new(tables),
    })
}
