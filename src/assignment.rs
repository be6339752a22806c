use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::hierarchy::HierarchyNode;

/// Recursive district assignment: either one district for a whole subtree,
/// or one assignment per child.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DistrictAssignment {
    District(u32),
    Split(Vec<DistrictAssignment>),
}

/// One assignment per unit of the coarsest level.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DistrictsDefinition(pub Vec<DistrictAssignment>);

impl DistrictsDefinition {
    /// Parse a JSON definition; anything that is not nested arrays of
    /// non-negative integers is invalid.
    pub fn from_json(bytes: &[u8]) -> Result<Self, InvalidAssignment> {
        serde_json::from_slice(bytes).map_err(|e| InvalidAssignment::new(Vec::new(), e.to_string()))
    }

    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> { serde_json::to_vec(self) }
}

/// A definition that does not fit the region's hierarchy.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("invalid district assignment at {}: {reason}", display_path(.path))]
pub struct InvalidAssignment {
    /// Child positions from the top level down to the offending node.
    pub path: Vec<usize>,
    pub reason: String,
}

impl InvalidAssignment {
    pub fn new(path: Vec<usize>, reason: impl Into<String>) -> Self {
        Self { path, reason: reason.into() }
    }
}

fn display_path(path: &[usize]) -> String {
    if path.is_empty() { return "root".to_string() }
    path.iter().map(|i| format!("[{i}]")).collect()
}

/// Walk `definition` and `trees` in lockstep, calling `visit(node, depth,
/// district)` for every collapsed subtree.  District ids above
/// `max_district` are invalid when a maximum is given.
pub fn walk<'h, 'a>(
    definition: &DistrictsDefinition,
    trees: &'h [HierarchyNode<'a>],
    max_district: Option<u32>,
    mut visit: impl FnMut(&'h HierarchyNode<'a>, usize, u32),
) -> Result<(), InvalidAssignment> {
    if definition.0.len() != trees.len() {
        return Err(InvalidAssignment::new(
            Vec::new(),
            format!("expected {} top-level entries, found {}", trees.len(), definition.0.len()),
        ));
    }
    let mut path = Vec::new();
    for (i, (assignment, node)) in definition.0.iter().zip(trees).enumerate() {
        path.push(i);
        walk_node(assignment, node, 0, max_district, &mut path, &mut visit)?;
        path.pop();
    }
    Ok(())
}

fn walk_node<'h, 'a>(
    assignment: &DistrictAssignment,
    node: &'h HierarchyNode<'a>,
    depth: usize,
    max_district: Option<u32>,
    path: &mut Vec<usize>,
    visit: &mut impl FnMut(&'h HierarchyNode<'a>, usize, u32),
) -> Result<(), InvalidAssignment> {
    match assignment {
        DistrictAssignment::District(district) => {
            if let Some(max) = max_district.filter(|&max| *district > max) {
                return Err(InvalidAssignment::new(path.clone(), format!("district {district} exceeds {max}")));
            }
            visit(node, depth, *district);
        }
        DistrictAssignment::Split(children) => {
            if children.len() != node.children.len() {
                return Err(InvalidAssignment::new(
                    path.clone(),
                    format!("expected {} children, found {}", node.children.len(), children.len()),
                ));
            }
            for (i, (child, child_node)) in children.iter().zip(&node.children).enumerate() {
                path.push(i);
                walk_node(child, child_node, depth + 1, max_district, path, visit)?;
                path.pop();
            }
        }
    }
    Ok(())
}
