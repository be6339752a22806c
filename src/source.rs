use std::{
    collections::HashMap,
    io::Write,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{anyhow, Context, Result};
use tempfile::NamedTempFile;

use crate::{metadata::TOPOLOGY_FILE, region::Region};

/// Read-only access to a region's dataset files by file name, e.g.
/// "topology.bin", "static-metadata.json", "population.u32".
pub trait RegionSource: Send + Sync {
    fn get(&self, region: &Region, file: &str) -> Result<Arc<[u8]>>;
    fn has(&self, region: &Region, file: &str) -> bool;
}

/// Write access to a region's dataset files.
/// Used by dataset tooling and in-memory fixtures.
pub trait RegionSink: Send + Sync {
    fn put(&mut self, region: &Region, file: &str, bytes: &[u8]) -> Result<()>;
}

impl<S: RegionSource + ?Sized> RegionSource for Arc<S> {
    fn get(&self, region: &Region, file: &str) -> Result<Arc<[u8]>> { (**self).get(region, file) }

    fn has(&self, region: &Region, file: &str) -> bool { (**self).has(region, file) }
}

// ---------------------------------------------------------------------------
// Local directory
// ---------------------------------------------------------------------------

/// Datasets laid out as `root/<location>/<file>`.
pub struct DirSource {
    root: PathBuf,
}

impl DirSource {
    pub fn new(root: impl Into<PathBuf>) -> Self { Self { root: root.into() } }

    fn full(&self, region: &Region, file: &str) -> PathBuf { self.root.join(&region.location).join(file) }
}

impl RegionSource for DirSource {
    fn get(&self, region: &Region, file: &str) -> Result<Arc<[u8]>> {
        let path = self.full(region, file);
        let bytes = std::fs::read(&path)
            .with_context(|| format!("[source] Failed to read {}", path.display()))?;
        Ok(Arc::from(bytes))
    }

    fn has(&self, region: &Region, file: &str) -> bool { self.full(region, file).exists() }
}

impl RegionSink for DirSource {
    fn put(&mut self, region: &Region, file: &str, bytes: &[u8]) -> Result<()> {
        write_atomic(&self.full(region, file), bytes)
    }
}

// ---------------------------------------------------------------------------
// In memory
// ---------------------------------------------------------------------------

/// Simple in-memory source.
/// Keys are `<location>/<file>`.
#[derive(Default, Clone)]
pub struct MemSource {
    pub(crate) files: HashMap<String, Arc<[u8]>>,
}

impl MemSource {
    pub fn new() -> Self { Self::default() }

    fn key(region: &Region, file: &str) -> String { format!("{}/{file}", region.location) }
}

impl RegionSource for MemSource {
    fn get(&self, region: &Region, file: &str) -> Result<Arc<[u8]>> {
        self.files.get(&Self::key(region, file)).cloned()
            .ok_or_else(|| anyhow!("[source] missing file: {}", Self::key(region, file)))
    }

    fn has(&self, region: &Region, file: &str) -> bool { self.files.contains_key(&Self::key(region, file)) }
}

impl RegionSink for MemSource {
    fn put(&mut self, region: &Region, file: &str, bytes: &[u8]) -> Result<()> {
        self.files.insert(Self::key(region, file), Arc::from(bytes));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// HTTP
// ---------------------------------------------------------------------------

/// Datasets served over HTTP at `<base_url>/<location>/<file>`.  A location
/// that is already an absolute URL is used as is.
#[cfg(feature = "download")]
pub struct HttpSource {
    base_url: String,
    client: reqwest::blocking::Client,
}

#[cfg(feature = "download")]
impl HttpSource {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("topomerge/", env!("CARGO_PKG_VERSION")))
            .redirect(reqwest::redirect::Policy::limited(10))
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .context("[source] Failed to build HTTP client")?;
        Ok(Self { base_url: base_url.into().trim_end_matches('/').to_string(), client })
    }

    fn url(&self, region: &Region, file: &str) -> String {
        let location = region.location.trim_end_matches('/');
        if location.starts_with("http://") || location.starts_with("https://") {
            format!("{location}/{file}")
        } else {
            format!("{}/{location}/{file}", self.base_url)
        }
    }
}

#[cfg(feature = "download")]
impl RegionSource for HttpSource {
    fn get(&self, region: &Region, file: &str) -> Result<Arc<[u8]>> {
        let url = self.url(region, file);
        let bytes = self.client.get(&url).send()
            .with_context(|| format!("[source] GET {url}"))?
            .error_for_status()
            .with_context(|| format!("[source] GET {url} returned error status"))?
            .bytes()
            .with_context(|| format!("[source] GET {url} body"))?;
        Ok(Arc::from(bytes.as_ref()))
    }

    fn has(&self, region: &Region, file: &str) -> bool {
        self.client.head(self.url(region, file)).send()
            .is_ok_and(|resp| resp.status().is_success())
    }
}

// ---------------------------------------------------------------------------
// Disk cache
// ---------------------------------------------------------------------------

/// Caches topology files from another source on local disk, at
/// `{root}/{region id}/{version}/topology.bin`.  Other files pass through.
pub struct DiskCache<S> {
    inner: S,
    root: PathBuf,
}

impl<S: RegionSource> DiskCache<S> {
    pub fn new(inner: S, root: impl Into<PathBuf>) -> Self { Self { inner, root: root.into() } }

    pub fn path(&self, region: &Region) -> PathBuf {
        self.root.join(&region.id).join(region.version.to_string()).join(TOPOLOGY_FILE)
    }
}

impl<S: RegionSource> RegionSource for DiskCache<S> {
    fn get(&self, region: &Region, file: &str) -> Result<Arc<[u8]>> {
        if file != TOPOLOGY_FILE { return self.inner.get(region, file) }

        let path = self.path(region);
        if let Ok(bytes) = std::fs::read(&path) {
            tracing::debug!(region = %region.id, path = %path.display(), "topology cache hit");
            return Ok(Arc::from(bytes));
        }

        let bytes = self.inner.get(region, file)?;
        match write_atomic(&path, &bytes) {
            Ok(()) => tracing::debug!(region = %region.id, path = %path.display(), "topology cached"),
            Err(e) => tracing::warn!(region = %region.id, error = %e, "failed to cache topology"),
        }
        Ok(bytes)
    }

    fn has(&self, region: &Region, file: &str) -> bool {
        (file == TOPOLOGY_FILE && self.path(region).exists()) || self.inner.has(region, file)
    }
}

/// Write through a temp file in the target directory, then rename.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or(Path::new("."));
    std::fs::create_dir_all(dir)
        .with_context(|| format!("[source] create dir {}", dir.display()))?;
    let mut tmp = NamedTempFile::new_in(dir).context("[source] create temp file")?;
    tmp.write_all(bytes).with_context(|| format!("[source] write {}", path.display()))?;
    tmp.persist(path).with_context(|| format!("[source] rename to {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn region() -> Region {
        Region {
            id: "r1".into(),
            name: "Texas".into(),
            region_code: "TX".into(),
            country_code: "US".into(),
            location: "us/tx".into(),
            version: 3,
            archived: false,
            size_bytes: 0,
        }
    }

    #[test]
    fn dir_source_reads_what_it_wrote() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = DirSource::new(dir.path());
        source.put(&region(), "static-metadata.json", b"{}").unwrap();
        assert!(source.has(&region(), "static-metadata.json"));
        assert!(dir.path().join("us/tx/static-metadata.json").exists());
        assert_eq!(&*source.get(&region(), "static-metadata.json").unwrap(), b"{}");
        assert!(source.get(&region(), "missing.bin").is_err());
    }

    #[test]
    fn mem_source_reports_missing_files() {
        let mut source = MemSource::new();
        source.put(&region(), TOPOLOGY_FILE, b"abc").unwrap();
        assert!(source.has(&region(), TOPOLOGY_FILE));
        assert!(!source.has(&region(), "other"));
        assert!(source.get(&region(), "other").unwrap_err().to_string().contains("us/tx/other"));
    }

    struct Counting {
        inner: MemSource,
        fetches: AtomicUsize,
    }

    impl RegionSource for Counting {
        fn get(&self, region: &Region, file: &str) -> Result<Arc<[u8]>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            self.inner.get(region, file)
        }

        fn has(&self, region: &Region, file: &str) -> bool { self.inner.has(region, file) }
    }

    #[test]
    fn disk_cache_fetches_topology_once_per_version() {
        let dir = tempfile::tempdir().unwrap();
        let mut inner = MemSource::new();
        inner.put(&region(), TOPOLOGY_FILE, b"topology").unwrap();
        inner.put(&region(), "population.u32", b"data").unwrap();
        let cache = DiskCache::new(Counting { inner, fetches: AtomicUsize::new(0) }, dir.path());

        assert_eq!(&*cache.get(&region(), TOPOLOGY_FILE).unwrap(), b"topology");
        assert_eq!(&*cache.get(&region(), TOPOLOGY_FILE).unwrap(), b"topology");
        assert_eq!(cache.inner.fetches.load(Ordering::SeqCst), 1);
        assert!(dir.path().join("r1/3/topology.bin").exists());

        // Other files are never cached.
        cache.get(&region(), "population.u32").unwrap();
        cache.get(&region(), "population.u32").unwrap();
        assert_eq!(cache.inner.fetches.load(Ordering::SeqCst), 3);

        // A new version misses the cache.
        let newer = Region { version: 4, ..region() };
        cache.get(&newer, TOPOLOGY_FILE).unwrap();
        assert_eq!(cache.inner.fetches.load(Ordering::SeqCst), 4);
    }
}
