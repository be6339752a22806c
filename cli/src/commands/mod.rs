pub mod export_csv;
pub mod import_csv;
pub mod merge;
pub mod preload;

use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use topomerge::{DirSource, DistrictsDefinition, EngineConfig, MergeService, Region};

use crate::cli::Cli;

/// Engine configuration from `--config`, or defaults, with environment
/// overrides applied.
pub fn engine_config(cli: &Cli) -> Result<EngineConfig> {
    let config = match &cli.config {
        Some(path) => EngineConfig::from_path(path)?,
        None => EngineConfig::default(),
    };
    Ok(config.with_env())
}

/// The region stored in `dir`.  `dir/region.json` describes it when present;
/// otherwise the directory name serves as id, name and location.
pub fn read_region(dir: &Path) -> Result<(PathBuf, Region)> {
    let dir = dir.canonicalize()
        .with_context(|| format!("[cli] region directory {} not found", dir.display()))?;
    let location = dir.file_name()
        .and_then(|name| name.to_str())
        .with_context(|| format!("[cli] invalid region directory {}", dir.display()))?
        .to_string();
    let root = dir.parent().map(Path::to_path_buf).unwrap_or_default();

    let descriptor = dir.join("region.json");
    let mut region: Region = if descriptor.exists() {
        serde_json::from_slice(&fs::read(&descriptor)?)
            .with_context(|| format!("[cli] invalid region descriptor {}", descriptor.display()))?
    } else {
        Region {
            id: location.clone(),
            name: location.clone(),
            region_code: String::new(),
            country_code: String::new(),
            location: location.clone(),
            version: 0,
            archived: false,
            size_bytes: 0,
        }
    };
    region.location = location;
    Ok((root, region))
}

/// A single-region service over the dataset in `dir`.
pub fn open_region(cli: &Cli, dir: &Path) -> Result<(MergeService, Region)> {
    let (root, region) = read_region(dir)?;
    let config = engine_config(cli)?;
    let (service, _fatal) = MergeService::from_config(&config, Arc::new(DirSource::new(root)));
    Ok((service, region))
}

pub fn read_definition(path: &Path) -> Result<DistrictsDefinition> {
    let bytes = fs::read(path).with_context(|| format!("[cli] Failed to read {}", path.display()))?;
    Ok(DistrictsDefinition::from_json(&bytes)?)
}

/// Write `bytes` to `output`, or stdout when no path is given.
pub fn write_output(output: Option<&Path>, bytes: &[u8]) -> Result<()> {
    match output {
        Some(path) => fs::write(path, bytes).with_context(|| format!("[cli] Failed to write {}", path.display())),
        None => {
            use std::io::Write;
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(bytes)?;
            Ok(stdout.flush()?)
        }
    }
}
