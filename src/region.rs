use serde::{Deserialize, Serialize};

/// A region whose dataset can be scheduled and merged.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Region {
    pub id: String,
    pub name: String,
    /// Short code such as a state abbreviation; drives preload priority.
    pub region_code: String,
    pub country_code: String,
    /// Dataset location understood by the configured `RegionSource`.
    /// Also the key under which the dataset is cached.
    pub location: String,
    /// Monotonically increasing dataset version.
    #[serde(default)]
    pub version: u64,
    /// Archived regions keep only attribute tables and geometry properties.
    #[serde(default)]
    pub archived: bool,
    /// Estimated resident size of the decoded dataset, used by the scheduler.
    #[serde(default)]
    pub size_bytes: u64,
}

impl Region {
    /// Key identifying this region's dataset in caches and routing tables.
    #[inline] pub fn key(&self) -> &str { &self.location }

    /// Identity recorded in merge output metadata.
    pub fn identity(&self) -> RegionIdentity {
        RegionIdentity {
            id: self.id.clone(),
            name: self.name.clone(),
            region_code: self.region_code.clone(),
            country_code: self.country_code.clone(),
            location: self.location.clone(),
        }
    }
}

/// Subset of `Region` written into merge output.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionIdentity {
    pub id: String,
    pub name: String,
    pub region_code: String,
    pub country_code: String,
    pub location: String,
}
