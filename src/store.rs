use std::{io::Read, sync::Arc};

use ahash::AHashMap;
use anyhow::{Context, Result};
use arcgraph::Topology;
use flate2::read::GzDecoder;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// A region's topology as held by the loader: either the encoded buffer,
/// decoded lazily inside a worker, or an already-stripped topology for
/// archived regions.
#[derive(Clone, Debug)]
pub enum TopologySource {
    Encoded(Arc<[u8]>),
    Stripped(Arc<Topology>),
}

/// Decode a topology buffer, inflating it first if it is gzip-compressed.
pub fn decode_topology(bytes: &[u8]) -> Result<Topology> {
    if bytes.starts_with(&GZIP_MAGIC) {
        let mut inflated = Vec::new();
        GzDecoder::new(bytes).read_to_end(&mut inflated)
            .context("[store] Failed to inflate gzip topology")?;
        return arcgraph::decode(&inflated).context("[store] Failed to decode topology");
    }
    arcgraph::decode(bytes).context("[store] Failed to decode topology")
}

/// Per-worker memo of decoded topologies, keyed by region.
#[derive(Debug, Default)]
pub struct GeometryStore {
    decoded: AHashMap<String, Arc<Topology>>,
}

impl GeometryStore {
    pub fn new() -> Self { Self::default() }

    /// The decoded topology for `key`, decoding `source` on first use.
    /// A decode failure leaves the memo untouched.
    pub fn get_or_decode(&mut self, key: &str, source: &TopologySource) -> Result<Arc<Topology>> {
        let bytes = match source {
            TopologySource::Stripped(topology) => return Ok(topology.clone()),
            TopologySource::Encoded(bytes) => bytes,
        };
        if let Some(topology) = self.decoded.get(key) {
            return Ok(topology.clone());
        }

        let topology = Arc::new(decode_topology(bytes).with_context(|| format!("[store] region {key}"))?);
        self.decoded.insert(key.to_string(), topology.clone());
        Ok(topology)
    }

    /// Whether a decoded topology for `key` is resident.
    pub fn has_resident(&self, key: &str) -> bool { self.decoded.contains_key(key) }

    pub fn clear(&mut self) { self.decoded.clear() }

    pub fn len(&self) -> usize { self.decoded.len() }

    pub fn is_empty(&self) -> bool { self.decoded.is_empty() }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use arcgraph::{Shape, TopoGeometry, TopologyBuilder, Transform};
    use flate2::{write::GzEncoder, Compression};

    use super::*;

    fn encoded() -> Vec<u8> {
        let mut builder = TopologyBuilder::new(Transform::default());
        let arc = builder.arc([(0, 0), (1, 0), (1, 1), (0, 0)]);
        let level = builder.level("block");
        builder.geometry(level, TopoGeometry { index: Some(0), shape: Shape::Polygon(vec![vec![arc]]), ..Default::default() });
        arcgraph::encode(&builder.build()).unwrap()
    }

    #[test]
    fn second_decode_hits_the_memo() {
        let mut store = GeometryStore::new();
        let source = TopologySource::Encoded(Arc::from(encoded()));
        assert!(!store.has_resident("tx"));
        let first = store.get_or_decode("tx", &source).unwrap();
        let second = store.get_or_decode("tx", &source).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(store.has_resident("tx"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn malformed_input_does_not_poison_the_cache() {
        let mut store = GeometryStore::new();
        let good = TopologySource::Encoded(Arc::from(encoded()));
        store.get_or_decode("tx", &good).unwrap();

        let bad = TopologySource::Encoded(Arc::from(&b"not a topology"[..]));
        assert!(store.get_or_decode("ca", &bad).is_err());
        assert!(!store.has_resident("ca"));
        assert!(store.has_resident("tx"));
    }

    #[test]
    fn inflates_gzip_input() {
        let mut gz = GzEncoder::new(Vec::new(), Compression::default());
        gz.write_all(&encoded()).unwrap();
        let compressed = gz.finish().unwrap();
        let topology = decode_topology(&compressed).unwrap();
        assert_eq!(topology.levels[0].len(), 1);
    }

    #[test]
    fn stripped_topologies_pass_through() {
        let mut store = GeometryStore::new();
        let stripped = Arc::new(decode_topology(&encoded()).unwrap().strip_geometries());
        let out = store.get_or_decode("pa", &TopologySource::Stripped(stripped.clone())).unwrap();
        assert!(Arc::ptr_eq(&out, &stripped));
        assert!(!store.has_resident("pa"));
    }

    #[test]
    fn clear_drops_everything() {
        let mut store = GeometryStore::new();
        store.get_or_decode("tx", &TopologySource::Encoded(Arc::from(encoded()))).unwrap();
        store.clear();
        assert!(store.is_empty());
    }
}
