//! Conversion between district definitions and flat base-unit assignments.

use ahash::AHashMap;

use crate::{
    assignment::{walk, DistrictAssignment, DistrictsDefinition, InvalidAssignment},
    hierarchy::HierarchyNode,
};

/// Flatten `definition` to one `(base unit id, district)` row per base unit,
/// in hierarchy order.
pub fn export_assignments(
    definition: &DistrictsDefinition,
    trees: &[HierarchyNode<'_>],
    base_level: &str,
) -> Result<Vec<(String, u32)>, InvalidAssignment> {
    let mut rows = Vec::new();
    walk(definition, trees, None, |node, _, district| {
        rows.extend(
            node.leaves()
                .filter_map(|leaf| leaf.geometry.property(base_level))
                .map(|key| (key.to_string(), district)),
        );
    })?;
    Ok(rows)
}

/// Build a definition from base-unit assignments.  Units missing from
/// `assignments` are unassigned (district 0), and every subtree whose units
/// share one district collapses to that district, bottom-up.
pub fn import_assignments(
    assignments: &AHashMap<String, u32>,
    trees: &[HierarchyNode<'_>],
    base_level: &str,
) -> DistrictsDefinition {
    DistrictsDefinition(trees.iter().map(|node| collapse(node, assignments, base_level)).collect())
}

fn collapse(node: &HierarchyNode<'_>, assignments: &AHashMap<String, u32>, base_level: &str) -> DistrictAssignment {
    if node.children.is_empty() {
        let district = node.geometry.property(base_level)
            .and_then(|key| assignments.get(&key.to_string()))
            .copied()
            .unwrap_or(0);
        return DistrictAssignment::District(district);
    }

    let children: Vec<DistrictAssignment> = node.children.iter()
        .map(|child| collapse(child, assignments, base_level))
        .collect();
    match children.first() {
        Some(&DistrictAssignment::District(first))
            if children.iter().all(|c| *c == DistrictAssignment::District(first)) =>
        {
            DistrictAssignment::District(first)
        }
        _ => DistrictAssignment::Split(children),
    }
}
