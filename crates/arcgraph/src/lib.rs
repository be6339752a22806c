pub mod io;
pub mod measure;
pub mod merge;
pub mod topology;

pub use io::{decode, encode, IoError};
pub use measure::{measure, polsby_popper, Measurement};
pub use merge::merge_arcs;
pub use topology::{
    arc_index, ArcRef, GeoKey, GeometryCollection, QPoint, Shape, TopoGeometry, Topology,
    TopologyBuilder, Transform,
};
