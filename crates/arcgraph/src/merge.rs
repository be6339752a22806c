//! Shared-arc merging.
//!
//! Algorithm:
//! 1. Split every input shape into its polygons.
//! 2. Union polygons that share at least one arc into connected components.
//! 3. Within each component, keep the arcs referenced exactly once. Arcs
//!    referenced twice are interior borders between merged polygons.
//! 4. Stitch the remaining directed arcs end-to-start into closed rings.
//! 5. The ring with the largest area becomes the component's exterior; the
//!    others become its holes.

use ahash::AHashMap;
use geo::{Coord, LineString, MultiPolygon, Polygon};

use crate::topology::{arc_index, ArcRef, QPoint, TopoGeometry, Topology};

/// Merge the given geometries into one multipolygon, with one polygon per
/// arc-connected component.  Borders shared between merged geometries are
/// removed.
pub fn merge_arcs<'a>(
    topology: &Topology,
    geometries: impl IntoIterator<Item = &'a TopoGeometry>,
) -> MultiPolygon<f64> {
    let polygons: Vec<&[Vec<ArcRef>]> = geometries.into_iter()
        .flat_map(|geometry| geometry.shape.polygons())
        .filter(|rings| rings.iter().any(|ring| !ring.is_empty()))
        .collect();

    let polygons_out = components(&polygons).into_iter()
        .filter_map(|component| {
            let boundary = boundary_arcs(component.iter().map(|&p| polygons[p]));
            let rings = stitch(topology, &boundary);
            assemble(topology, rings)
        })
        .collect();

    MultiPolygon(polygons_out)
}

// ---------------------------------------------------------------------------
// Components
// ---------------------------------------------------------------------------

fn find(parent: &mut [usize], mut i: usize) -> usize {
    while parent[i] != i {
        parent[i] = parent[parent[i]];
        i = parent[i];
    }
    i
}

/// Group polygon positions into components of polygons that share an arc.
/// Components and their members keep first-appearance order.
fn components(polygons: &[&[Vec<ArcRef>]]) -> Vec<Vec<usize>> {
    let mut parent: Vec<usize> = (0..polygons.len()).collect();
    let mut owner: AHashMap<usize, usize> = AHashMap::new();

    for (p, rings) in polygons.iter().enumerate() {
        for &r in rings.iter().flatten() {
            match owner.get(&arc_index(r)) {
                Some(&q) => {
                    let (a, b) = (find(&mut parent, p), find(&mut parent, q));
                    if a != b { parent[a.max(b)] = a.min(b) }
                }
                None => { owner.insert(arc_index(r), p); }
            }
        }
    }

    let mut slot: AHashMap<usize, usize> = AHashMap::new();
    let mut groups: Vec<Vec<usize>> = Vec::new();
    for p in 0..polygons.len() {
        let root = find(&mut parent, p);
        let g = *slot.entry(root).or_insert_with(|| { groups.push(Vec::new()); groups.len() - 1 });
        groups[g].push(p);
    }
    groups
}

/// Directed arc references that appear exactly once within the component,
/// in ring order.
fn boundary_arcs<'a>(polygons: impl Iterator<Item = &'a [Vec<ArcRef>]> + Clone) -> Vec<ArcRef> {
    let mut counts: AHashMap<usize, u32> = AHashMap::new();
    for &r in polygons.clone().flat_map(|rings| rings.iter().flatten()) {
        *counts.entry(arc_index(r)).or_insert(0) += 1;
    }
    polygons
        .flat_map(|rings| rings.iter().flatten().copied())
        .filter(|&r| counts[&arc_index(r)] == 1)
        .collect()
}

// ---------------------------------------------------------------------------
// Stitching
// ---------------------------------------------------------------------------

/// Chain directed arcs end-to-start into closed rings of grid positions.
/// Chains that cannot be closed are closed with a straight segment.
fn stitch(topology: &Topology, arcs: &[ArcRef]) -> Vec<Vec<QPoint>> {
    let endpoints: Vec<Option<(QPoint, QPoint)>> = arcs.iter()
        .map(|&r| topology.arc_endpoints(r))
        .collect();

    let mut by_start: AHashMap<QPoint, Vec<usize>> = AHashMap::new();
    for (i, ends) in endpoints.iter().enumerate() {
        if let Some((start, _)) = ends { by_start.entry(*start).or_default().push(i) }
    }

    let mut used = vec![false; arcs.len()];
    let mut rings = Vec::new();

    for first in 0..arcs.len() {
        let Some((ring_start, mut end)) = endpoints[first] else { continue };
        if used[first] { continue }
        used[first] = true;

        let mut ring: Vec<QPoint> = topology.arc_points(arcs[first]).collect();
        while end != ring_start {
            let next = by_start.get(&end)
                .and_then(|candidates| candidates.iter().copied().find(|&j| !used[j]));
            let Some(j) = next else { break };
            used[j] = true;
            ring.extend(topology.arc_points(arcs[j]).skip(1));
            end = endpoints[j].map_or(end, |(_, e)| e);
        }

        if ring.first() != ring.last() {
            ring.push(ring[0]);
        }
        if ring.len() >= 4 {
            rings.push(ring);
        }
    }

    rings
}

/// Twice the signed area of a closed ring of grid positions
/// (positive for counter-clockwise).
fn signed_area2(ring: &[QPoint]) -> f64 {
    ring.windows(2)
        .map(|w| w[0].x as f64 * w[1].y as f64 - w[1].x as f64 * w[0].y as f64)
        .sum()
}

/// Build a polygon from stitched rings: the largest ring is the exterior
/// (counter-clockwise), the rest are holes (clockwise).
fn assemble(topology: &Topology, mut rings: Vec<Vec<QPoint>>) -> Option<Polygon<f64>> {
    if rings.is_empty() { return None }

    let areas: Vec<f64> = rings.iter().map(|ring| signed_area2(ring)).collect();
    let largest = areas.iter().enumerate()
        .max_by(|(_, a), (_, b)| a.abs().total_cmp(&b.abs()))
        .map(|(i, _)| i)?;
    rings.swap(0, largest);

    let orient = |ring: &mut Vec<QPoint>, ccw: bool| {
        if (signed_area2(ring) > 0.0) != ccw { ring.reverse() }
    };

    let mut iter = rings.into_iter();
    let mut exterior = iter.next()?;
    orient(&mut exterior, true);
    let holes = iter
        .map(|mut hole| { orient(&mut hole, false); to_line_string(topology, &hole) })
        .collect();

    Some(Polygon::new(to_line_string(topology, &exterior), holes))
}

fn to_line_string(topology: &Topology, ring: &[QPoint]) -> LineString<f64> {
    LineString(ring.iter().map(|&p| topology.transform.apply(p)).collect::<Vec<Coord<f64>>>())
}
