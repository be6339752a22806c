use std::{fs, sync::Arc};

use anyhow::{bail, Context, Result};
use topomerge::{DirSource, Region, RegionSource, TopologyCache};
use tracing::error;

use super::engine_config;

pub async fn run(cli: &crate::cli::Cli, args: &crate::cli::PreloadArgs) -> Result<()> {
    let config = engine_config(cli)?;
    let regions: Vec<Region> = serde_json::from_slice(&fs::read(&args.regions)?)
        .with_context(|| format!("[preload] invalid region list {}", args.regions.display()))?;

    let source: Arc<dyn RegionSource> = match (&args.root, &args.url) {
        (_, Some(url)) => http_source(url)?,
        (Some(root), None) => Arc::new(DirSource::new(root)),
        (None, None) => Arc::new(DirSource::new(".")),
    };
    let source: Arc<dyn RegionSource> = match &config.loader.cache_root {
        Some(root) => Arc::new(topomerge::DiskCache::new(source, root)),
        None => source,
    };

    let (cache, mut fatal) = TopologyCache::new(source, config.loader.clone());
    let supervisor = tokio::spawn(async move {
        while let Some(load) = fatal.recv().await {
            error!(region = %load.region, attempts = load.attempts, error = %load.error, "region failed to load");
        }
    });

    let report = cache.preload_all(regions).await;
    for (region, status) in cache.layers() {
        println!("{region}\t{}", serde_json::to_string(&status)?.trim_matches('"'));
    }
    drop(cache);
    supervisor.abort();

    if !report.failed.is_empty() {
        bail!("[preload] {} of {} regions failed to load", report.failed.len(), report.failed.len() + report.loaded);
    }
    Ok(())
}

#[cfg(feature = "download")]
fn http_source(url: &str) -> Result<Arc<dyn RegionSource>> {
    Ok(Arc::new(topomerge::HttpSource::new(url)?))
}

#[cfg(not(feature = "download"))]
fn http_source(_url: &str) -> Result<Arc<dyn RegionSource>> {
    bail!("[preload] built without the download feature")
}
