//! Shared fixture: three counties side by side, each split into a lower and
//! an upper block.
//!
//! ```text
//!   y=2 +-----+-----+-----+
//!       | b01 | b11 | b21 |
//!   y=1 +-----+-----+-----+
//!       | b00 | b10 | b20 |
//!   y=0 +-----+-----+-----+
//!       x=0   x=1   x=2   x=3
//!        c0    c1    c2
//! ```
//!
//! Block `b{x}{y}` has index `2x + y` and population `10 * (index + 1)`.
#![allow(dead_code)]

use std::{path::Path, sync::Arc};

use ahash::AHashMap;
use arcgraph::{ArcRef, GeoKey, Shape, TopoGeometry, Topology, TopologyBuilder, Transform};
use topomerge::{
    metadata::{GeoLevelInfo, StaticFile, StaticMetadata, STATIC_METADATA_FILE, TOPOLOGY_FILE},
    MemSource, Region, RegionSink,
};

pub const COUNTIES: i32 = 3;

/// Grid cells are a millidegree on a side.
pub fn transform() -> Transform {
    Transform::new([1e-3, 1e-3], [0.0, 0.0])
}

pub fn region(location: &str) -> Region {
    Region {
        id: format!("{location}-id"),
        name: location.to_uppercase(),
        region_code: location.to_uppercase(),
        country_code: "US".into(),
        location: location.into(),
        version: 1,
        archived: false,
        size_bytes: 0,
    }
}

pub fn topology() -> Topology {
    let mut builder = TopologyBuilder::new(transform());
    let mut horizontal: AHashMap<(i32, i32), ArcRef> = AHashMap::new();
    let mut vertical: AHashMap<(i32, i32), ArcRef> = AHashMap::new();
    for x in 0..COUNTIES {
        for y in 0..=2 {
            horizontal.insert((x, y), builder.arc([(x, y), (x + 1, y)]));
        }
    }
    for x in 0..=COUNTIES {
        for y in 0..2 {
            vertical.insert((x, y), builder.arc([(x, y), (x, y + 1)]));
        }
    }
    let h = |x, y| horizontal[&(x, y)];
    let v = |x, y| vertical[&(x, y)];

    let county_level = builder.level("county");
    for x in 0..COUNTIES {
        let ring = vec![h(x, 0), v(x + 1, 0), v(x + 1, 1), !h(x, 2), !v(x, 1), !v(x, 0)];
        builder.geometry(county_level, TopoGeometry {
            index: Some(x as u32),
            shape: Shape::Polygon(vec![ring]),
            properties: vec![(Arc::from("county"), county_key(x))],
        });
    }

    let block_level = builder.level("block");
    for x in 0..COUNTIES {
        for y in 0..2 {
            let ring = vec![h(x, y), v(x + 1, y), !h(x, y + 1), !v(x, y)];
            builder.geometry(block_level, TopoGeometry {
                index: Some((2 * x + y) as u32),
                shape: Shape::Polygon(vec![ring]),
                properties: vec![(Arc::from("county"), county_key(x)), (Arc::from("block"), block_key(x, y))],
            });
        }
    }
    builder.build()
}

pub fn county_key(x: i32) -> GeoKey { GeoKey::from(format!("c{x}").as_str()) }

pub fn block_key(x: i32, y: i32) -> GeoKey { GeoKey::from(format!("b{x}{y}").as_str()) }

fn file(id: &str, file_name: &str, bytes_per_element: u8) -> StaticFile {
    StaticFile { id: id.into(), file_name: file_name.into(), bytes_per_element, unsigned: true }
}

pub fn metadata(with_voting: bool) -> StaticMetadata {
    StaticMetadata {
        geo_level_hierarchy: vec![GeoLevelInfo { id: "block".into() }, GeoLevelInfo { id: "county".into() }],
        demographics: vec![file("population", "population.u16", 2)],
        geo_levels: vec![file("block", "block.u8", 1), file("county", "county.u8", 1)],
        voting: with_voting.then(|| vec![file("votes", "votes.u8", 1)]),
    }
}

pub fn population() -> Vec<u16> { (1..=6).map(|i| 10 * i).collect() }

/// Every file of the fixture dataset, by file name.
pub fn files(with_voting: bool) -> Vec<(&'static str, Vec<u8>)> {
    let topology = arcgraph::encode(&topology()).unwrap();
    let mut files = vec![
        (TOPOLOGY_FILE, topology),
        (STATIC_METADATA_FILE, metadata(with_voting).to_json().unwrap()),
        ("population.u16", population().iter().flat_map(|p| p.to_le_bytes()).collect()),
        ("block.u8", vec![0, 1, 2, 3, 4, 5]),
        ("county.u8", vec![0, 0, 1, 1, 2, 2]),
    ];
    if with_voting {
        files.push(("votes.u8", vec![1, 1, 1, 1, 1, 1]));
    }
    files
}

pub fn mem_source(regions: &[&Region], with_voting: bool) -> MemSource {
    let mut source = MemSource::new();
    for region in regions {
        for (name, bytes) in files(with_voting) {
            source.put(region, name, &bytes).unwrap();
        }
    }
    source
}

/// Write the dataset under `root/<location>/`.
pub fn write_dir(root: &Path, region: &Region, with_voting: bool) {
    let dir = root.join(&region.location);
    std::fs::create_dir_all(&dir).unwrap();
    for (name, bytes) in files(with_voting) {
        std::fs::write(dir.join(name), bytes).unwrap();
    }
}
