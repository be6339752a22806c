//! Shared-arc topology: a planar graph in which every border between two
//! adjacent shapes is stored exactly once, as an **arc**, and shapes are
//! described as rings of arc references.
//!
//! # Arc references
//!
//! A ring is a sequence of signed arc references.  A non-negative reference
//! `i` traverses arc `i` from its first point to its last; a negative
//! reference `r` traverses arc `!r` backwards.  Consecutive arcs in a ring
//! share their junction point.
//!
//! # Quantization
//!
//! Arc positions are stored as absolute integer grid positions (`QPoint`).
//! Two arcs meet exactly when their endpoint `QPoint`s are equal, which makes
//! stitching exact.  The `Transform` maps grid positions back to lon/lat.

use std::{fmt, sync::Arc};

use geo::Coord;

// ---------------------------------------------------------------------------
// Positions
// ---------------------------------------------------------------------------

/// An absolute position on the quantization grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QPoint {
    pub x: i32,
    pub y: i32,
}

impl QPoint {
    #[inline] pub fn new(x: i32, y: i32) -> Self { Self { x, y } }
}

/// Affine mapping from grid positions to coordinates: `x * scale + translate`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform {
    pub scale: [f64; 2],
    pub translate: [f64; 2],
}

impl Default for Transform {
    fn default() -> Self {
        Self { scale: [1.0, 1.0], translate: [0.0, 0.0] }
    }
}

impl Transform {
    pub fn new(scale: [f64; 2], translate: [f64; 2]) -> Self { Self { scale, translate } }

    /// Dequantize a grid position.
    #[inline]
    pub fn apply(&self, p: QPoint) -> Coord<f64> {
        Coord {
            x: p.x as f64 * self.scale[0] + self.translate[0],
            y: p.y as f64 * self.scale[1] + self.translate[1],
        }
    }
}

// ---------------------------------------------------------------------------
// Arc references
// ---------------------------------------------------------------------------

/// Signed arc reference; negative values traverse arc `!r` in reverse.
pub type ArcRef = i32;

/// Index of the arc an `ArcRef` points at, regardless of direction.
#[inline]
pub fn arc_index(r: ArcRef) -> usize {
    if r < 0 { (!r) as usize } else { r as usize }
}

// ---------------------------------------------------------------------------
// Geometries
// ---------------------------------------------------------------------------

/// Stable identifier of a geographic unit at one level, e.g. a county FIPS
/// code.  Properties keep whichever form the source data used.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GeoKey {
    Int(i64),
    Str(Arc<str>),
}

impl From<i64> for GeoKey {
    fn from(value: i64) -> Self { GeoKey::Int(value) }
}

impl From<&str> for GeoKey {
    fn from(value: &str) -> Self { GeoKey::Str(Arc::from(value)) }
}

impl fmt::Display for GeoKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GeoKey::Int(i) => write!(f, "{i}"),
            GeoKey::Str(s) => f.write_str(s),
        }
    }
}

/// Shape of a geometry as rings of arc references.  Each polygon is a list
/// of rings; the first ring is the exterior and the rest are holes.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Shape {
    #[default]
    Empty,
    Polygon(Vec<Vec<ArcRef>>),
    MultiPolygon(Vec<Vec<Vec<ArcRef>>>),
}

impl Shape {
    /// Iterate over the polygons of this shape (zero, one, or many).
    pub fn polygons(&self) -> impl Iterator<Item = &[Vec<ArcRef>]> + '_ {
        let (single, multi): (Option<&[Vec<ArcRef>]>, &[Vec<Vec<ArcRef>>]) = match self {
            Shape::Empty => (None, &[]),
            Shape::Polygon(rings) => (Some(rings.as_slice()), &[]),
            Shape::MultiPolygon(polygons) => (None, polygons.as_slice()),
        };
        single.into_iter().chain(multi.iter().map(|rings| rings.as_slice()))
    }

    /// Iterate over every arc reference in the shape.
    pub fn arc_refs(&self) -> impl Iterator<Item = ArcRef> + '_ {
        self.polygons().flat_map(|rings| rings.iter().flatten().copied())
    }

    #[inline] pub fn is_empty(&self) -> bool { self.polygons().next().is_none() }
}

/// One geographic unit within a level.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TopoGeometry {
    /// Position of the unit within its level; addresses per-level tables.
    /// Units without an index contribute no statistics.
    pub index: Option<u32>,
    pub shape: Shape,
    /// Identifiers keyed by level name: the unit's own key under its level
    /// name, and its ancestors' keys under theirs.
    pub properties: Vec<(Arc<str>, GeoKey)>,
}

impl TopoGeometry {
    /// Look up the identifier recorded for `level`.
    pub fn property(&self, level: &str) -> Option<&GeoKey> {
        self.properties.iter()
            .find(|(name, _)| name.as_ref() == level)
            .map(|(_, key)| key)
    }
}

/// All units of one geographic level.
#[derive(Clone, Debug, PartialEq)]
pub struct GeometryCollection {
    pub name: Arc<str>,
    pub geometries: Vec<TopoGeometry>,
}

impl GeometryCollection {
    #[inline] pub fn len(&self) -> usize { self.geometries.len() }

    #[inline] pub fn is_empty(&self) -> bool { self.geometries.is_empty() }
}

// ---------------------------------------------------------------------------
// Topology
// ---------------------------------------------------------------------------

/// A decoded shared-arc topology with one geometry collection per level.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Topology {
    pub transform: Transform,
    pub arcs: Vec<Vec<QPoint>>,
    pub levels: Vec<GeometryCollection>,
}

impl Topology {
    /// The collection for `name`, if the topology has one.
    pub fn level(&self, name: &str) -> Option<&GeometryCollection> {
        self.levels.iter().find(|level| level.name.as_ref() == name)
    }

    /// Whether any geometry still carries arcs.  Stripped topologies keep
    /// only properties.
    pub fn has_geometries(&self) -> bool {
        !self.arcs.is_empty()
    }

    /// Grid positions of `r` in traversal order.
    pub fn arc_points(&self, r: ArcRef) -> Box<dyn Iterator<Item = QPoint> + '_> {
        let points = self.arcs[arc_index(r)].iter().copied();
        if r < 0 { Box::new(points.rev()) } else { Box::new(points) }
    }

    /// First and last grid position of `r` in traversal order.
    pub fn arc_endpoints(&self, r: ArcRef) -> Option<(QPoint, QPoint)> {
        let arc = &self.arcs[arc_index(r)];
        let (first, last) = (*arc.first()?, *arc.last()?);
        Some(if r < 0 { (last, first) } else { (first, last) })
    }

    /// Drop arcs and shapes, keeping every level's indices and properties.
    pub fn strip_geometries(mut self) -> Self {
        self.arcs = Vec::new();
        for level in &mut self.levels {
            for geometry in &mut level.geometries {
                geometry.shape = Shape::Empty;
            }
        }
        self
    }

    /// Rough resident size in bytes, used for memory accounting.
    pub fn approx_bytes(&self) -> usize {
        let arcs: usize = self.arcs.iter()
            .map(|arc| arc.len() * std::mem::size_of::<QPoint>())
            .sum();
        let shapes: usize = self.levels.iter()
            .flat_map(|level| level.geometries.iter())
            .map(|geometry| {
                geometry.shape.arc_refs().count() * std::mem::size_of::<ArcRef>()
                    + geometry.properties.len() * 32
            })
            .sum();
        arcs + shapes
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Incremental constructor for `Topology`, used by dataset tooling and
/// fixtures.
#[derive(Debug, Default)]
pub struct TopologyBuilder {
    topology: Topology,
}

impl TopologyBuilder {
    pub fn new(transform: Transform) -> Self {
        Self { topology: Topology { transform, ..Topology::default() } }
    }

    /// Append an arc and return a forward reference to it.
    pub fn arc(&mut self, points: impl IntoIterator<Item = (i32, i32)>) -> ArcRef {
        self.topology.arcs.push(points.into_iter().map(|(x, y)| QPoint::new(x, y)).collect());
        (self.topology.arcs.len() - 1) as ArcRef
    }

    /// Append an empty level and return its position.
    pub fn level(&mut self, name: &str) -> usize {
        self.topology.levels.push(GeometryCollection { name: Arc::from(name), geometries: Vec::new() });
        self.topology.levels.len() - 1
    }

    /// Append a geometry to the level at position `level`.
    pub fn geometry(&mut self, level: usize, geometry: TopoGeometry) -> &mut Self {
        self.topology.levels[level].geometries.push(geometry);
        self
    }

    pub fn build(self) -> Topology { self.topology }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> Topology {
        let mut builder = TopologyBuilder::new(Transform::default());
        let a = builder.arc([(0, 0), (1, 0), (1, 1)]);
        let b = builder.arc([(1, 1), (0, 1), (0, 0)]);
        let level = builder.level("block");
        builder.geometry(level, TopoGeometry {
            index: Some(0),
            shape: Shape::Polygon(vec![vec![a, b]]),
            properties: vec![(Arc::from("block"), GeoKey::from("b0"))],
        });
        builder.build()
    }

    #[test]
    fn arc_index_handles_reversed_refs() {
        assert_eq!(arc_index(0), 0);
        assert_eq!(arc_index(3), 3);
        assert_eq!(arc_index(!0), 0);
        assert_eq!(arc_index(!5), 5);
    }

    #[test]
    fn reversed_arc_points_run_backwards() {
        let topology = square();
        let forward: Vec<_> = topology.arc_points(0).collect();
        let backward: Vec<_> = topology.arc_points(!0).collect();
        assert_eq!(forward.len(), 3);
        assert_eq!(backward, forward.into_iter().rev().collect::<Vec<_>>());
        assert_eq!(topology.arc_endpoints(!0), Some((QPoint::new(1, 1), QPoint::new(0, 0))));
    }

    #[test]
    fn strip_keeps_properties() {
        let stripped = square().strip_geometries();
        assert!(!stripped.has_geometries());
        let block = stripped.level("block").unwrap();
        assert_eq!(block.geometries[0].shape, Shape::Empty);
        assert_eq!(block.geometries[0].property("block"), Some(&GeoKey::from("b0")));
    }

    #[test]
    fn shape_polygons() {
        assert_eq!(Shape::Empty.polygons().count(), 0);
        assert_eq!(Shape::Polygon(vec![vec![0]]).polygons().count(), 1);
        assert_eq!(Shape::MultiPolygon(vec![vec![vec![0]], vec![vec![1]]]).polygons().count(), 2);
        assert_eq!(Shape::MultiPolygon(vec![vec![vec![0, !1]], vec![vec![2]]]).arc_refs().count(), 3);
    }

    #[test]
    fn transform_dequantizes() {
        let transform = Transform::new([0.5, 0.25], [10.0, -5.0]);
        assert_eq!(transform.apply(QPoint::new(2, 4)), Coord { x: 11.0, y: -4.0 });
    }

    #[test]
    fn geo_key_display() {
        assert_eq!(GeoKey::Int(42).to_string(), "42");
        assert_eq!(GeoKey::from("06001").to_string(), "06001");
    }
}
