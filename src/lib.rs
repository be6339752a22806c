#![doc = "Region-affinity worker pool and shared-arc district merge engine"]
pub mod assignment;
pub mod attributes;
pub mod config;
pub mod hierarchy;
pub mod io;
pub mod loader;
pub mod merge;
pub mod metadata;
pub mod plan;
pub mod pool;
pub mod region;
pub mod service;
pub mod source;
pub mod store;
pub mod worker;

#[doc(inline)]
pub use assignment::{DistrictAssignment, DistrictsDefinition, InvalidAssignment};

#[doc(inline)]
pub use config::{EngineConfig, LoaderConfig, MemoryBudget, PoolConfig};

#[doc(inline)]
pub use loader::{Dataset, FatalLoad, LayerStatus, LoadError, PreloadReport, TopologyCache};

#[doc(inline)]
pub use merge::{Chamber, Contiguity, Creator, DistrictFeature, DistrictFeatureCollection, PlanInfo};

#[doc(inline)]
pub use pool::{PoolError, PoolResult, PoolSnapshot, WorkerHandler, WorkerPool};

#[doc(inline)]
pub use region::{Region, RegionIdentity};

#[doc(inline)]
pub use service::{MergeService, ServiceError, ServiceResult};

#[doc(inline)]
pub use source::{DirSource, DiskCache, MemSource, RegionSink, RegionSource};

#[cfg(feature = "download")]
#[doc(inline)]
pub use source::HttpSource;

#[doc(inline)]
pub use worker::{RegionWorker, WorkerRequest, WorkerResponse};
