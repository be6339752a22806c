use std::f64::consts::PI;

use geo::{Area, BoundingRect, Coord, MapCoords, MultiPolygon};

/// Mean Earth radius in meters.
const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Area and perimeter of a lon/lat shape, in square meters and meters.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Measurement {
    pub area_m2: f64,
    pub perimeter_m: f64,
}

/// Measure a lon/lat multipolygon on a local equirectangular projection
/// centred on its bounding box.  Perimeter includes hole boundaries.
pub fn measure(shape: &MultiPolygon<f64>) -> Measurement {
    let Some(bounds) = shape.bounding_rect() else { return Measurement::default() };

    let k = EARTH_RADIUS_M * PI / 180.0;
    let kx = k * bounds.center().y.to_radians().cos();
    let projected = shape.map_coords(|Coord { x, y }| Coord { x: x * kx, y: y * k });

    let perimeter_m = projected.0.iter()
        .flat_map(|polygon| std::iter::once(polygon.exterior()).chain(polygon.interiors()))
        .flat_map(|ring| ring.lines())
        .map(|line| (line.end.x - line.start.x).hypot(line.end.y - line.start.y))
        .sum();

    Measurement { area_m2: projected.unsigned_area(), perimeter_m }
}

/// Polsby-Popper compactness score.
/// Formula: 4 * pi * area / (perimeter^2)
/// If the perimeter is zero, returns zero.
pub fn polsby_popper(area: f64, perimeter: f64) -> f64 {
    if perimeter == 0.0 { return 0.0 }
    4.0 * PI * area / (perimeter * perimeter)
}

#[cfg(test)]
mod tests {
    use geo::{polygon, MultiPolygon};

    use super::*;

    #[test]
    fn small_square_scores_pi_over_four() {
        let d = 1e-3;
        let square = MultiPolygon(vec![polygon![(x: 0.0, y: 0.0), (x: d, y: 0.0), (x: d, y: d), (x: 0.0, y: d)]]);
        let m = measure(&square);
        assert!((polsby_popper(m.area_m2, m.perimeter_m) - PI / 4.0).abs() < 1e-6);
    }

    #[test]
    fn square_side_is_about_111_meters_per_millidegree() {
        let d = 1e-3;
        let square = MultiPolygon(vec![polygon![(x: 0.0, y: 0.0), (x: d, y: 0.0), (x: d, y: d), (x: 0.0, y: d)]]);
        let m = measure(&square);
        assert!((m.perimeter_m / 4.0 - 111.19).abs() < 0.1);
    }

    #[test]
    fn longitude_shrinks_away_from_equator() {
        let d = 1e-3;
        let at = |lat: f64| measure(&MultiPolygon(vec![polygon![
            (x: 0.0, y: lat), (x: d, y: lat), (x: d, y: lat + d), (x: 0.0, y: lat + d)
        ]])).area_m2;
        assert!(at(60.0) < at(0.0) * 0.51);
    }

    #[test]
    fn empty_shape_measures_zero() {
        let m = measure(&MultiPolygon(vec![]));
        assert_eq!(m, Measurement::default());
        assert_eq!(polsby_popper(m.area_m2, m.perimeter_m), 0.0);
    }

    #[test]
    fn elongated_rectangle_scores_below_square() {
        let rect = MultiPolygon(vec![polygon![(x: 0.0, y: 0.0), (x: 0.01, y: 0.0), (x: 0.01, y: 0.001), (x: 0.0, y: 0.001)]]);
        let m = measure(&rect);
        assert!(polsby_popper(m.area_m2, m.perimeter_m) < 0.5);
    }
}
