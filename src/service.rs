//! Service facade tying the topology cache to the worker pool.

use std::sync::Arc;

use ahash::AHashMap;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::info;

use crate::{
    assignment::{DistrictsDefinition, InvalidAssignment},
    config::EngineConfig,
    io::csv::{read_assignments_csv, write_assignments_csv},
    loader::{Dataset, FatalLoad, LoadError, TopologyCache},
    merge::{Chamber, Creator, DistrictFeatureCollection, PlanInfo},
    pool::{PoolError, WorkerPool},
    region::Region,
    source::{DiskCache, RegionSource},
    worker::{RegionWorker, WorkerRequest, WorkerResponse},
};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Invalid(#[from] InvalidAssignment),

    #[error("region {0} is archived and cannot be merged")]
    Archived(String),

    #[error("invalid CSV: {0:#}")]
    Csv(anyhow::Error),

    #[error("worker returned an unexpected response")]
    UnexpectedResponse,
}

impl ServiceError {
    /// Whether the error was caused by the caller's input rather than the
    /// service.
    pub fn is_client_error(&self) -> bool {
        matches!(self, ServiceError::Invalid(_) | ServiceError::Archived(_) | ServiceError::Csv(_))
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

pub struct MergeService {
    cache: Arc<TopologyCache>,
    pool: WorkerPool<RegionWorker>,
}

impl MergeService {
    pub fn new(cache: Arc<TopologyCache>, pool: WorkerPool<RegionWorker>) -> Self {
        Self { cache, pool }
    }

    /// Build the cache and pool described by `config` over `source`.  The
    /// topology file is cached on disk when `loader.cache_root` is set.
    pub fn from_config(
        config: &EngineConfig,
        source: Arc<dyn RegionSource>,
    ) -> (Self, mpsc::UnboundedReceiver<FatalLoad>) {
        let source: Arc<dyn RegionSource> = match &config.loader.cache_root {
            Some(root) => {
                info!(cache_root = %root.display(), "caching topologies on disk");
                Arc::new(DiskCache::new(source, root))
            }
            None => source,
        };
        let (cache, fatal) = TopologyCache::new(source, config.loader.clone());
        let pool = WorkerPool::new(
            config.pool.num_workers,
            config.worker_budget(),
            config.task_timeout(),
            |index| Ok(RegionWorker::new(index)),
        );
        (Self::new(cache, pool), fatal)
    }

    #[inline] pub fn cache(&self) -> &Arc<TopologyCache> { &self.cache }

    #[inline] pub fn pool(&self) -> &WorkerPool<RegionWorker> { &self.pool }

    async fn dataset(&self, region: &Region) -> ServiceResult<Arc<Dataset>> {
        Ok(self.cache.get(region).await?)
    }

    async fn run(&self, dataset: &Dataset, request: WorkerRequest) -> ServiceResult<WorkerResponse> {
        Ok(self.pool.run(dataset.region.key(), dataset.resident_size(), request).await?)
    }

    /// Merge `definition` into one feature per district `0..=num_districts`.
    pub async fn merge(
        &self,
        region: &Region,
        definition: DistrictsDefinition,
        num_districts: u32,
        creator: Creator,
        chamber: Option<Chamber>,
    ) -> ServiceResult<DistrictFeatureCollection> {
        let dataset = self.dataset(region).await?;
        if dataset.is_archived() {
            return Err(ServiceError::Archived(region.key().to_string()));
        }
        let info = PlanInfo { num_districts, creator, chamber, region: region.identity() };
        let request = WorkerRequest::Merge { dataset: dataset.clone(), definition, info };
        match self.run(&dataset, request).await? {
            WorkerResponse::Merged(result) => Ok(result?),
            _ => Err(ServiceError::UnexpectedResponse),
        }
    }

    /// Build a definition from a `{BASE}ID,DISTRICT` CSV.
    pub async fn import_csv(&self, region: &Region, csv: &[u8]) -> ServiceResult<DistrictsDefinition> {
        let assignments: AHashMap<String, u32> = read_assignments_csv(csv)
            .map_err(ServiceError::Csv)?
            .into_iter()
            .collect();
        let dataset = self.dataset(region).await?;
        let request = WorkerRequest::ImportCsv { dataset: dataset.clone(), assignments };
        match self.run(&dataset, request).await? {
            WorkerResponse::Imported(definition) => Ok(definition),
            _ => Err(ServiceError::UnexpectedResponse),
        }
    }

    /// Flatten `definition` to base-unit rows.
    pub async fn export_assignments(&self, region: &Region, definition: DistrictsDefinition) -> ServiceResult<Vec<(String, u32)>> {
        let dataset = self.dataset(region).await?;
        let request = WorkerRequest::ExportCsv { dataset: dataset.clone(), definition };
        match self.run(&dataset, request).await? {
            WorkerResponse::Exported(rows) => Ok(rows?),
            _ => Err(ServiceError::UnexpectedResponse),
        }
    }

    /// Flatten `definition` to a `{BASE}ID,DISTRICT` CSV.
    pub async fn export_csv(&self, region: &Region, definition: DistrictsDefinition) -> ServiceResult<Vec<u8>> {
        let dataset = self.dataset(region).await?;
        let rows = self.export_assignments(region, definition).await?;
        let base = dataset.order.base().unwrap_or_default();
        write_assignments_csv(&rows, base).map_err(ServiceError::Csv)
    }

    /// Whether the worker routed for `region` has its topology decoded.
    pub async fn has_resident(&self, region: &Region) -> ServiceResult<bool> {
        let dataset = self.dataset(region).await?;
        let request = WorkerRequest::HasResident { key: region.key().to_string() };
        match self.run(&dataset, request).await? {
            WorkerResponse::Resident(resident) => Ok(resident),
            _ => Err(ServiceError::UnexpectedResponse),
        }
    }

    /// Per-level geometry properties; available for archived regions too.
    pub async fn topology_properties(&self, region: &Region) -> ServiceResult<Value> {
        let dataset = self.dataset(region).await?;
        let request = WorkerRequest::TopologyProperties { dataset: dataset.clone() };
        match self.run(&dataset, request).await? {
            WorkerResponse::Properties(value) => Ok(value),
            _ => Err(ServiceError::UnexpectedResponse),
        }
    }

    pub fn shutdown(&self) {
        self.pool.shutdown();
    }
}
