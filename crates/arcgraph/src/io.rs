//! Binary topology format.
//!
//! All integers are little-endian.
//!
//! ```text
//! magic "TOPB" | u32 version
//! f64 scale_x | f64 scale_y | f64 translate_x | f64 translate_y
//! u32 num_arcs
//!   u32 num_points, num_points × (i32 dx, i32 dy)      delta-encoded
//! u32 num_levels
//!   str name | u32 num_geometries
//!     u8 has_index [u32 index]
//!     u8 kind (0 empty, 1 polygon, 2 multipolygon) + rings
//!     u32 num_properties, (str level, u8 tag, i64 | str)
//! str = u16 byte length + UTF-8
//! ```

use std::{fmt, sync::Arc};

use crate::topology::{
    arc_index, ArcRef, GeoKey, GeometryCollection, QPoint, Shape, TopoGeometry, Topology,
    Transform,
};

/// Magic bytes at the start of every topology file.
pub const MAGIC: &[u8; 4] = b"TOPB";

/// Current file format version.
pub const VERSION: u32 = 1;

const KIND_EMPTY: u8 = 0;
const KIND_POLYGON: u8 = 1;
const KIND_MULTIPOLYGON: u8 = 2;

const TAG_INT: u8 = 0;
const TAG_STR: u8 = 1;

/// Errors that can occur while decoding a topology buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum IoError {
    /// Buffer does not start with the expected magic bytes.
    InvalidMagic,
    /// Buffer was written by a newer or incompatible version.
    UnsupportedVersion(u32),
    /// Buffer ended while reading the named field.
    Truncated(&'static str),
    /// Buffer contents are structurally invalid.
    InvalidData(String),
}

impl fmt::Display for IoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IoError::InvalidMagic => write!(f, "invalid topology magic: expected {:?}", MAGIC),
            IoError::UnsupportedVersion(v) => write!(f, "unsupported topology version {v}"),
            IoError::Truncated(what) => write!(f, "topology truncated while reading {what}"),
            IoError::InvalidData(msg) => write!(f, "invalid topology: {msg}"),
        }
    }
}

impl std::error::Error for IoError {}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize, what: &'static str) -> Result<&'a [u8], IoError> {
        let end = self.pos.checked_add(n).filter(|&end| end <= self.bytes.len())
            .ok_or(IoError::Truncated(what))?;
        let out = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn array<const N: usize>(&mut self, what: &'static str) -> Result<[u8; N], IoError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N, what)?);
        Ok(out)
    }

    fn u8(&mut self, what: &'static str) -> Result<u8, IoError> { Ok(self.array::<1>(what)?[0]) }
    fn u16(&mut self, what: &'static str) -> Result<u16, IoError> { Ok(u16::from_le_bytes(self.array(what)?)) }
    fn u32(&mut self, what: &'static str) -> Result<u32, IoError> { Ok(u32::from_le_bytes(self.array(what)?)) }
    fn i32(&mut self, what: &'static str) -> Result<i32, IoError> { Ok(i32::from_le_bytes(self.array(what)?)) }
    fn i64(&mut self, what: &'static str) -> Result<i64, IoError> { Ok(i64::from_le_bytes(self.array(what)?)) }
    fn f64(&mut self, what: &'static str) -> Result<f64, IoError> { Ok(f64::from_le_bytes(self.array(what)?)) }

    /// Read a `u32` element count, rejecting counts that cannot possibly fit
    /// in the remaining bytes.
    fn count(&mut self, min_elem_size: usize, what: &'static str) -> Result<usize, IoError> {
        let n = self.u32(what)? as usize;
        if n.saturating_mul(min_elem_size) > self.bytes.len() - self.pos {
            return Err(IoError::Truncated(what));
        }
        Ok(n)
    }

    fn str(&mut self, what: &'static str) -> Result<Arc<str>, IoError> {
        let len = self.u16(what)? as usize;
        let bytes = self.take(len, what)?;
        std::str::from_utf8(bytes)
            .map(Arc::from)
            .map_err(|e| IoError::InvalidData(format!("{what} is not valid UTF-8: {e}")))
    }
}

/// Decode a topology buffer.
pub fn decode(bytes: &[u8]) -> Result<Topology, IoError> {
    let mut reader = Reader { bytes, pos: 0 };

    if &reader.array::<4>("magic")? != MAGIC { return Err(IoError::InvalidMagic) }
    let version = reader.u32("version")?;
    if version != VERSION { return Err(IoError::UnsupportedVersion(version)) }

    let transform = Transform::new(
        [reader.f64("scale")?, reader.f64("scale")?],
        [reader.f64("translate")?, reader.f64("translate")?],
    );

    let num_arcs = reader.count(4, "arc count")?;
    let mut arcs = Vec::with_capacity(num_arcs);
    for _ in 0..num_arcs {
        let n = reader.count(8, "arc length")?;
        let (mut x, mut y) = (0i32, 0i32);
        let mut points = Vec::with_capacity(n);
        for _ in 0..n {
            let (dx, dy) = (reader.i32("arc position")?, reader.i32("arc position")?);
            x = x.checked_add(dx).ok_or_else(|| IoError::InvalidData("arc position overflow".into()))?;
            y = y.checked_add(dy).ok_or_else(|| IoError::InvalidData("arc position overflow".into()))?;
            points.push(QPoint::new(x, y));
        }
        arcs.push(points);
    }

    let num_levels = reader.count(6, "level count")?;
    let mut levels = Vec::with_capacity(num_levels);
    for _ in 0..num_levels {
        let name = reader.str("level name")?;
        let num_geometries = reader.count(6, "geometry count")?;
        let mut geometries = Vec::with_capacity(num_geometries);
        for _ in 0..num_geometries {
            geometries.push(read_geometry(&mut reader, arcs.len())?);
        }
        levels.push(GeometryCollection { name, geometries });
    }

    if reader.pos != bytes.len() {
        return Err(IoError::InvalidData(format!("{} trailing bytes", bytes.len() - reader.pos)));
    }

    Ok(Topology { transform, arcs, levels })
}

fn read_geometry(reader: &mut Reader, num_arcs: usize) -> Result<TopoGeometry, IoError> {
    let index = match reader.u8("index flag")? {
        0 => None,
        _ => Some(reader.u32("index")?),
    };

    let shape = match reader.u8("shape kind")? {
        KIND_EMPTY => Shape::Empty,
        KIND_POLYGON => Shape::Polygon(read_polygon(reader, num_arcs)?),
        KIND_MULTIPOLYGON => {
            let n = reader.count(4, "polygon count")?;
            let polygons = (0..n)
                .map(|_| read_polygon(reader, num_arcs))
                .collect::<Result<Vec<_>, _>>()?;
            Shape::MultiPolygon(polygons)
        }
        kind => return Err(IoError::InvalidData(format!("unknown shape kind {kind}"))),
    };

    let num_properties = reader.count(3, "property count")?;
    let mut properties = Vec::with_capacity(num_properties);
    for _ in 0..num_properties {
        let level = reader.str("property name")?;
        let key = match reader.u8("property tag")? {
            TAG_INT => GeoKey::Int(reader.i64("property value")?),
            TAG_STR => GeoKey::Str(reader.str("property value")?),
            tag => return Err(IoError::InvalidData(format!("unknown property tag {tag}"))),
        };
        properties.push((level, key));
    }

    Ok(TopoGeometry { index, shape, properties })
}

fn read_polygon(reader: &mut Reader, num_arcs: usize) -> Result<Vec<Vec<ArcRef>>, IoError> {
    let num_rings = reader.count(4, "ring count")?;
    let mut rings = Vec::with_capacity(num_rings);
    for _ in 0..num_rings {
        let n = reader.count(4, "ring length")?;
        let mut ring = Vec::with_capacity(n);
        for _ in 0..n {
            let r = reader.i32("arc reference")?;
            if arc_index(r) >= num_arcs {
                return Err(IoError::InvalidData(format!("arc reference {r} out of range ({num_arcs} arcs)")));
            }
            ring.push(r);
        }
        rings.push(ring);
    }
    Ok(rings)
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Encode a topology into the binary format read by [`decode`].
///
/// Fails when a level name, property name, or string key exceeds
/// `u16::MAX` bytes, or when consecutive arc points are too far apart for
/// an `i32` delta.
pub fn encode(topology: &Topology) -> Result<Vec<u8>, IoError> {
    let mut out = Vec::new();
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&VERSION.to_le_bytes());
    for v in topology.transform.scale.iter().chain(&topology.transform.translate) {
        out.extend_from_slice(&v.to_le_bytes());
    }

    out.extend_from_slice(&(topology.arcs.len() as u32).to_le_bytes());
    for arc in &topology.arcs {
        out.extend_from_slice(&(arc.len() as u32).to_le_bytes());
        let mut prev = QPoint::new(0, 0);
        for &p in arc {
            let delta = |a: i32, b: i32| a.checked_sub(b)
                .ok_or_else(|| IoError::InvalidData(format!("arc delta overflow between {prev:?} and {p:?}")));
            out.extend_from_slice(&delta(p.x, prev.x)?.to_le_bytes());
            out.extend_from_slice(&delta(p.y, prev.y)?.to_le_bytes());
            prev = p;
        }
    }

    out.extend_from_slice(&(topology.levels.len() as u32).to_le_bytes());
    for level in &topology.levels {
        write_str(&mut out, &level.name)?;
        out.extend_from_slice(&(level.geometries.len() as u32).to_le_bytes());
        for geometry in &level.geometries {
            write_geometry(&mut out, geometry)?;
        }
    }
    Ok(out)
}

fn write_geometry(out: &mut Vec<u8>, geometry: &TopoGeometry) -> Result<(), IoError> {
    match geometry.index {
        Some(index) => { out.push(1); out.extend_from_slice(&index.to_le_bytes()); }
        None => out.push(0),
    }

    match &geometry.shape {
        Shape::Empty => out.push(KIND_EMPTY),
        Shape::Polygon(rings) => { out.push(KIND_POLYGON); write_polygon(out, rings); }
        Shape::MultiPolygon(polygons) => {
            out.push(KIND_MULTIPOLYGON);
            out.extend_from_slice(&(polygons.len() as u32).to_le_bytes());
            polygons.iter().for_each(|rings| write_polygon(out, rings));
        }
    }

    out.extend_from_slice(&(geometry.properties.len() as u32).to_le_bytes());
    for (level, key) in &geometry.properties {
        write_str(out, level)?;
        match key {
            GeoKey::Int(i) => { out.push(TAG_INT); out.extend_from_slice(&i.to_le_bytes()); }
            GeoKey::Str(s) => { out.push(TAG_STR); write_str(out, s)?; }
        }
    }
    Ok(())
}

fn write_polygon(out: &mut Vec<u8>, rings: &[Vec<ArcRef>]) {
    out.extend_from_slice(&(rings.len() as u32).to_le_bytes());
    for ring in rings {
        out.extend_from_slice(&(ring.len() as u32).to_le_bytes());
        ring.iter().for_each(|r| out.extend_from_slice(&r.to_le_bytes()));
    }
}

fn write_str(out: &mut Vec<u8>, s: &str) -> Result<(), IoError> {
    let len = u16::try_from(s.len())
        .map_err(|_| IoError::InvalidData(format!("string of {} bytes is too long", s.len())))?;
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(s.as_bytes());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::TopologyBuilder;

    fn sample() -> Topology {
        let mut builder = TopologyBuilder::new(Transform::new([1e-3, 1e-3], [-90.0, 30.0]));
        let a = builder.arc([(0, 0), (10, 0), (10, 10)]);
        let b = builder.arc([(10, 10), (0, 10), (0, 0)]);
        let county = builder.level("county");
        builder.geometry(county, TopoGeometry {
            index: Some(0),
            shape: Shape::MultiPolygon(vec![vec![vec![a, b]]]),
            properties: vec![(Arc::from("county"), GeoKey::Int(17))],
        });
        let block = builder.level("block");
        builder.geometry(block, TopoGeometry {
            index: None,
            shape: Shape::Polygon(vec![vec![!b, !a]]),
            properties: vec![
                (Arc::from("county"), GeoKey::Int(17)),
                (Arc::from("block"), GeoKey::from("170010001")),
            ],
        });
        builder.geometry(block, TopoGeometry::default());
        builder.build()
    }

    #[test]
    fn decode_reads_back_encoded_topology() {
        let topology = sample();
        assert_eq!(decode(&encode(&topology).unwrap()).unwrap(), topology);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = encode(&sample()).unwrap();
        bytes[0] = b'X';
        assert_eq!(decode(&bytes), Err(IoError::InvalidMagic));
    }

    #[test]
    fn rejects_unknown_version() {
        let mut bytes = encode(&sample()).unwrap();
        bytes[4..8].copy_from_slice(&7u32.to_le_bytes());
        assert_eq!(decode(&bytes), Err(IoError::UnsupportedVersion(7)));
    }

    #[test]
    fn rejects_truncated_buffer() {
        let bytes = encode(&sample()).unwrap();
        for cut in [3, 20, bytes.len() / 2, bytes.len() - 1] {
            assert!(decode(&bytes[..cut]).is_err(), "cut at {cut} should fail");
        }
    }

    #[test]
    fn rejects_trailing_bytes() {
        let mut bytes = encode(&sample()).unwrap();
        bytes.push(0);
        assert!(matches!(decode(&bytes), Err(IoError::InvalidData(_))));
    }

    #[test]
    fn rejects_dangling_arc_reference() {
        let mut topology = sample();
        topology.levels[0].geometries[0].shape = Shape::Polygon(vec![vec![0, 9]]);
        assert!(matches!(decode(&encode(&topology).unwrap()), Err(IoError::InvalidData(_))));
    }

    #[test]
    fn encode_rejects_oversized_names() {
        let mut topology = sample();
        topology.levels[0].name = Arc::from("x".repeat(70_000).as_str());
        assert!(encode(&topology).is_err());
    }

    #[test]
    fn encode_rejects_unrepresentable_arc_deltas() {
        let mut topology = sample();
        topology.arcs[0] = vec![QPoint::new(i32::MIN, 0), QPoint::new(i32::MAX, 0)];
        assert!(matches!(encode(&topology), Err(IoError::InvalidData(_))));

        topology.arcs[0] = vec![QPoint::new(-5, i32::MAX), QPoint::new(5, i32::MAX - 1)];
        assert!(encode(&topology).is_ok());
    }

    #[test]
    fn huge_counts_do_not_allocate() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&VERSION.to_le_bytes());
        bytes.extend_from_slice(&[0u8; 32]);
        bytes.extend_from_slice(&u32::MAX.to_le_bytes());
        assert_eq!(decode(&bytes), Err(IoError::Truncated("arc count")));
    }
}
