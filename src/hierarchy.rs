//! Tree of geographic units mirroring how each level nests in the next.

use ahash::AHashMap;
use anyhow::{Result, bail, ensure};
use arcgraph::{GeoKey, TopoGeometry, Topology};

use crate::metadata::LevelOrder;

/// A unit and the units of the next finer level it contains.
#[derive(Clone, Debug, PartialEq)]
pub struct HierarchyNode<'a> {
    pub geometry: &'a TopoGeometry,
    pub children: Vec<HierarchyNode<'a>>,
}

impl<'a> HierarchyNode<'a> {
    /// Depth-first iteration over the finest-level descendants of this node.
    pub fn leaves(&self) -> Box<dyn Iterator<Item = &HierarchyNode<'a>> + '_> {
        if self.children.is_empty() {
            Box::new(std::iter::once(self))
        } else {
            Box::new(self.children.iter().flat_map(|child| child.leaves()))
        }
    }
}

/// Build one tree per unit of the coarsest level.
///
/// Children are grouped by the property naming their parent level in a
/// single pass per level pair, then attached top-down.  Children keep
/// topology order within their parent.
pub fn build<'a>(topology: &'a Topology, order: &LevelOrder) -> Result<Vec<HierarchyNode<'a>>> {
    ensure!(!order.is_empty(), "[hierarchy] level order is empty");

    let collections = order.levels().iter()
        .map(|name| match topology.level(name) {
            Some(collection) => Ok(collection),
            None => bail!("[hierarchy] topology has no level {name}"),
        })
        .collect::<Result<Vec<_>>>()?;

    // groups[d] maps a depth-d unit key to its depth-(d+1) children.
    let mut groups: Vec<AHashMap<&GeoKey, Vec<&TopoGeometry>>> = Vec::with_capacity(order.len());
    for (depth, parents) in collections.iter().enumerate() {
        let level = &order.levels()[depth];
        let mut by_parent: AHashMap<&GeoKey, Vec<&TopoGeometry>> = AHashMap::with_capacity(parents.len());
        for geometry in &parents.geometries {
            let Some(key) = geometry.property(level) else {
                bail!("[hierarchy] unit of level {level} has no {level} key")
            };
            ensure!(by_parent.insert(key, Vec::new()).is_none(), "[hierarchy] duplicate {level} key {key}");
        }

        if let Some(children) = collections.get(depth + 1) {
            for child in &children.geometries {
                let Some(key) = child.property(level) else {
                    bail!("[hierarchy] unit of level {} has no {level} key", children.name)
                };
                match by_parent.get_mut(key) {
                    Some(siblings) => siblings.push(child),
                    None => bail!("[hierarchy] unit of level {} references unknown {level} {key}", children.name),
                }
            }
        }
        groups.push(by_parent);
    }

    Ok(collections[0].geometries.iter()
        .map(|geometry| attach(geometry, 0, order, &mut groups))
        .collect())
}

fn attach<'a>(
    geometry: &'a TopoGeometry,
    depth: usize,
    order: &LevelOrder,
    groups: &mut [AHashMap<&'a GeoKey, Vec<&'a TopoGeometry>>],
) -> HierarchyNode<'a> {
    let children = geometry.property(&order.levels()[depth])
        .and_then(|key| groups[depth].remove(key))
        .unwrap_or_default();
    HierarchyNode {
        geometry,
        children: children.into_iter()
            .map(|child| attach(child, depth + 1, order, groups))
            .collect(),
    }
}
