use std::sync::Arc;

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

/// File name of the per-region metadata descriptor.
pub const STATIC_METADATA_FILE: &str = "static-metadata.json";

/// File name of the per-region topology.
pub const TOPOLOGY_FILE: &str = "topology.bin";

/// A fixed-width numeric array stored as its own file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaticFile {
    pub id: String,
    pub file_name: String,
    /// Element width in bytes: 1, 2 or 4.
    pub bytes_per_element: u8,
    #[serde(default = "default_unsigned")]
    pub unsigned: bool,
}

fn default_unsigned() -> bool { true }

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeoLevelInfo {
    pub id: String,
}

/// Descriptor of a region dataset, stored as `static-metadata.json`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaticMetadata {
    /// Geographic levels, finest first.
    pub geo_level_hierarchy: Vec<GeoLevelInfo>,
    pub demographics: Vec<StaticFile>,
    /// One file per entry of `geo_level_hierarchy`, in the same order,
    /// mapping each base unit to its containing unit at that level.
    pub geo_levels: Vec<StaticFile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voting: Option<Vec<StaticFile>>,
}

impl StaticMetadata {
    /// Parse and validate a metadata descriptor.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let metadata: Self = serde_json::from_slice(bytes)
            .context("[metadata] Failed to parse static metadata")?;
        metadata.validate()?;
        Ok(metadata)
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(self).context("[metadata] Failed to serialize static metadata")
    }

    fn validate(&self) -> Result<()> {
        ensure!(!self.geo_level_hierarchy.is_empty(), "[metadata] geoLevelHierarchy is empty");
        ensure!(
            self.geo_levels.len() == self.geo_level_hierarchy.len(),
            "[metadata] {} geoLevels files for {} hierarchy levels",
            self.geo_levels.len(),
            self.geo_level_hierarchy.len()
        );
        for file in self.files() {
            ensure!(
                matches!(file.bytes_per_element, 1 | 2 | 4),
                "[metadata] {}: unsupported bytesPerElement {}",
                file.file_name,
                file.bytes_per_element
            );
        }
        Ok(())
    }

    /// Every static file the region declares.
    pub fn files(&self) -> impl Iterator<Item = &StaticFile> {
        self.demographics.iter()
            .chain(&self.geo_levels)
            .chain(self.voting.iter().flatten())
    }

    /// Levels ordered coarsest to finest.
    pub fn level_order(&self) -> LevelOrder {
        LevelOrder::new(self.geo_level_hierarchy.iter().rev().map(|level| level.id.as_str()))
    }
}

/// Geographic level names from coarsest to finest.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LevelOrder(Arc<[Arc<str>]>);

impl LevelOrder {
    pub fn new<'a>(levels: impl IntoIterator<Item = &'a str>) -> Self {
        Self(levels.into_iter().map(Arc::from).collect())
    }

    #[inline] pub fn levels(&self) -> &[Arc<str>] { &self.0 }

    #[inline] pub fn len(&self) -> usize { self.0.len() }

    #[inline] pub fn is_empty(&self) -> bool { self.0.is_empty() }

    /// The finest level, whose units every other level is made of.
    pub fn base(&self) -> Option<&str> { self.0.last().map(|level| level.as_ref()) }

    /// Depth of `level`, 0 being the coarsest.
    pub fn depth(&self, level: &str) -> Option<usize> {
        self.0.iter().position(|name| name.as_ref() == level)
    }
}
