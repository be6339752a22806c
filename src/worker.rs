//! The region worker: the handler each pool thread runs.

use std::sync::Arc;

use ahash::AHashMap;
use anyhow::{bail, Context, Result};
use arcgraph::{GeoKey, Topology};
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::{
    assignment::{DistrictsDefinition, InvalidAssignment},
    hierarchy,
    loader::Dataset,
    merge::{merge, DistrictFeatureCollection, PlanInfo},
    plan::{export_assignments, import_assignments},
    pool::WorkerHandler,
    store::GeometryStore,
};

/// Requests served by `RegionWorker`.
#[derive(Debug)]
pub enum WorkerRequest {
    Merge { dataset: Arc<Dataset>, definition: DistrictsDefinition, info: PlanInfo },
    ImportCsv { dataset: Arc<Dataset>, assignments: AHashMap<String, u32> },
    ExportCsv { dataset: Arc<Dataset>, definition: DistrictsDefinition },
    HasResident { key: String },
    TopologyProperties { dataset: Arc<Dataset> },
}

/// Replies from `RegionWorker`.  Invalid client input is carried as a value
/// so that it does not count as a worker failure.
#[derive(Debug)]
pub enum WorkerResponse {
    Merged(Result<DistrictFeatureCollection, InvalidAssignment>),
    Imported(DistrictsDefinition),
    Exported(Result<Vec<(String, u32)>, InvalidAssignment>),
    Resident(bool),
    Properties(Value),
}

/// Serves region requests against a worker-local geometry store.
#[derive(Debug, Default)]
pub struct RegionWorker {
    index: usize,
    store: GeometryStore,
}

impl RegionWorker {
    pub fn new(index: usize) -> Self {
        Self { index, store: GeometryStore::new() }
    }

    fn topology(&mut self, dataset: &Dataset) -> Result<Arc<Topology>> {
        self.store.get_or_decode(dataset.region.key(), &dataset.topology)
    }

    fn base_level(dataset: &Dataset) -> Result<&str> {
        dataset.order.base().context("[worker] region has no geo levels")
    }
}

impl WorkerHandler for RegionWorker {
    type Request = WorkerRequest;
    type Response = WorkerResponse;

    fn handle(&mut self, request: WorkerRequest) -> Result<WorkerResponse> {
        match request {
            WorkerRequest::Merge { dataset, definition, info } => {
                let topology = self.topology(&dataset)?;
                if !topology.has_geometries() {
                    bail!("[worker] region {} has no geometries to merge", dataset.region.key());
                }
                let trees = hierarchy::build(&topology, &dataset.order)?;
                debug!(worker = self.index, region = %dataset.region.key(), "merging districts");
                Ok(WorkerResponse::Merged(merge(&definition, &trees, &topology, &dataset.tables, &info)))
            }
            WorkerRequest::ImportCsv { dataset, assignments } => {
                let topology = self.topology(&dataset)?;
                let trees = hierarchy::build(&topology, &dataset.order)?;
                let base = Self::base_level(&dataset)?;
                Ok(WorkerResponse::Imported(import_assignments(&assignments, &trees, base)))
            }
            WorkerRequest::ExportCsv { dataset, definition } => {
                let topology = self.topology(&dataset)?;
                let trees = hierarchy::build(&topology, &dataset.order)?;
                let base = Self::base_level(&dataset)?;
                Ok(WorkerResponse::Exported(export_assignments(&definition, &trees, base)))
            }
            WorkerRequest::HasResident { key } => Ok(WorkerResponse::Resident(self.store.has_resident(&key))),
            WorkerRequest::TopologyProperties { dataset } => {
                let topology = self.topology(&dataset)?;
                Ok(WorkerResponse::Properties(properties_json(&topology)))
            }
        }
    }
}

/// Per-level geometry properties: `{ level: [{ name: key, .. }, ..] }`.
pub fn properties_json(topology: &Topology) -> Value {
    let levels: Map<String, Value> = topology.levels.iter()
        .map(|level| {
            let geometries: Vec<Value> = level.geometries.iter()
                .map(|geometry| {
                    let properties: Map<String, Value> = geometry.properties.iter()
                        .map(|(name, key)| (name.to_string(), key_json(key)))
                        .collect();
                    Value::Object(properties)
                })
                .collect();
            (level.name.to_string(), Value::Array(geometries))
        })
        .collect();
    Value::Object(levels)
}

fn key_json(key: &GeoKey) -> Value {
    match key {
        GeoKey::Int(i) => json!(i),
        GeoKey::Str(s) => json!(s.as_ref()),
    }
}
