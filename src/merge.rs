//! District merge engine.
//!
//! Walks a district definition and the region hierarchy in lockstep,
//! buckets every collapsed subtree by district and depth, then merges each
//! district's units into one outline and sums its attribute tables over
//! the base units it covers.

use arcgraph::{measure, merge_arcs, polsby_popper, TopoGeometry, Topology};
use geo::MultiPolygon;
use serde::{Deserialize, Serialize};

use crate::{
    assignment::{walk, DistrictsDefinition, InvalidAssignment},
    attributes::{AttributeTables, Totals},
    hierarchy::HierarchyNode,
    region::RegionIdentity,
};

/// Who requested the merge.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Creator {
    pub id: String,
    pub name: String,
}

/// Legislative chamber the plan is drawn for.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chamber {
    pub id: String,
    pub name: String,
    pub number_of_districts: u32,
}

/// Everything about a merge request other than the definition itself.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanInfo {
    pub num_districts: u32,
    pub creator: Creator,
    #[serde(default)]
    pub chamber: Option<Chamber>,
    pub region: RegionIdentity,
}

/// Number of separate parts a district outline has.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Contiguity {
    #[serde(rename = "contiguous")]
    Contiguous,
    #[serde(rename = "non-contiguous")]
    NonContiguous,
    /// The district has no units.
    #[serde(rename = "")]
    Empty,
}

impl Contiguity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Contiguity::Contiguous => "contiguous",
            Contiguity::NonContiguous => "non-contiguous",
            Contiguity::Empty => "",
        }
    }
}

/// One merged district.
#[derive(Clone, Debug, PartialEq)]
pub struct DistrictFeature {
    /// District id; 0 collects unassigned units.
    pub id: u32,
    pub geometry: MultiPolygon<f64>,
    pub demographics: Totals,
    /// Present only when the region declares voting files.
    pub voting: Option<Totals>,
    pub compactness: f64,
    pub contiguity: Contiguity,
}

/// Top-level information attached to a merge result.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MergeMetadata {
    /// True when no unit is left unassigned.
    pub completed: bool,
    pub chamber: Option<Chamber>,
    pub creator: Creator,
    pub region: RegionIdentity,
}

/// One feature per district id `0..=num_districts`.
#[derive(Clone, Debug, PartialEq)]
pub struct DistrictFeatureCollection {
    pub features: Vec<DistrictFeature>,
    pub metadata: MergeMetadata,
}

/// Merge `definition` against the region hierarchy.
///
/// Returns `InvalidAssignment` when the definition does not mirror the
/// hierarchy or names a district above `info.num_districts`.
pub fn merge(
    definition: &DistrictsDefinition,
    trees: &[HierarchyNode<'_>],
    topology: &Topology,
    tables: &AttributeTables,
    info: &PlanInfo,
) -> Result<DistrictFeatureCollection, InvalidAssignment> {
    let num_features = info.num_districts as usize + 1;
    // buckets[district][depth]
    let mut buckets: Vec<Vec<Vec<&TopoGeometry>>> = vec![Vec::new(); num_features];
    walk(definition, trees, Some(info.num_districts), |node, depth, district| {
        let levels = &mut buckets[district as usize];
        if levels.len() <= depth {
            levels.resize_with(depth + 1, Vec::new);
        }
        levels[depth].push(node.geometry);
    })?;

    let features: Vec<DistrictFeature> = buckets.iter().enumerate()
        .map(|(id, levels)| district_feature(id as u32, levels, topology, tables))
        .collect();

    let completed = features.first().is_some_and(|unassigned| unassigned.geometry.0.is_empty());
    Ok(DistrictFeatureCollection {
        features,
        metadata: MergeMetadata {
            completed,
            chamber: info.chamber.clone(),
            creator: info.creator.clone(),
            region: info.region.clone(),
        },
    })
}

fn district_feature(
    id: u32,
    levels: &[Vec<&TopoGeometry>],
    topology: &Topology,
    tables: &AttributeTables,
) -> DistrictFeature {
    let geometry = merge_arcs(topology, levels.iter().flatten().copied());

    let mut base_units = Vec::new();
    for (depth, geometries) in levels.iter().enumerate() {
        tables.base_index.expand(depth, geometries.iter().filter_map(|g| g.index), &mut base_units);
    }
    let (demographics, voting) = tables.totals(&base_units);

    let (compactness, contiguity) = compactness(&geometry);
    DistrictFeature { id, geometry, demographics, voting, compactness, contiguity }
}

/// Polsby-Popper score and contiguity of a district outline.  Only
/// single-part outlines are scored; the rest score 0.
pub fn compactness(geometry: &MultiPolygon<f64>) -> (f64, Contiguity) {
    match geometry.0.len() {
        0 => (0.0, Contiguity::Empty),
        1 => {
            let m = measure(geometry);
            (polsby_popper(m.area_m2, m.perimeter_m), Contiguity::Contiguous)
        }
        _ => (0.0, Contiguity::NonContiguous),
    }
}

#[cfg(test)]
mod tests {
    use std::f64::consts::PI;

    use geo::{polygon, MultiPolygon};

    use super::*;

    #[test]
    fn contiguity_by_part_count() {
        let square = |x: f64| polygon![(x: x, y: 0.0), (x: x + 1e-3, y: 0.0), (x: x + 1e-3, y: 1e-3), (x: x, y: 1e-3)];

        assert_eq!(compactness(&MultiPolygon(vec![])), (0.0, Contiguity::Empty));
        assert_eq!(compactness(&MultiPolygon(vec![square(0.0), square(1.0)])), (0.0, Contiguity::NonContiguous));

        let (score, contiguity) = compactness(&MultiPolygon(vec![square(0.0)]));
        assert_eq!(contiguity, Contiguity::Contiguous);
        assert!((score - PI / 4.0).abs() < 1e-6);
    }

    #[test]
    fn contiguity_serializes_as_markers() {
        assert_eq!(serde_json::to_string(&Contiguity::NonContiguous).unwrap(), "\"non-contiguous\"");
        assert_eq!(serde_json::to_string(&Contiguity::Empty).unwrap(), "\"\"");
        assert_eq!(Contiguity::Contiguous.as_str(), "contiguous");
    }
}
