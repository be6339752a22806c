//! GeoJSON rendering of merge results.

use anyhow::{Context, Result};
use geo::{LineString, MultiPolygon};
use serde_json::{json, Map, Value};

use crate::{
    attributes::Totals,
    merge::{DistrictFeature, DistrictFeatureCollection},
};

fn ring_coords(ring: &LineString<f64>) -> Value {
    Value::Array(ring.coords().map(|c| json!([c.x, c.y])).collect())
}

/// GeoJSON `MultiPolygon` geometry object.
pub fn multipolygon_to_geojson(shape: &MultiPolygon<f64>) -> Value {
    let polygons: Vec<Value> = shape.0.iter()
        .map(|polygon| {
            let rings: Vec<Value> = std::iter::once(polygon.exterior())
                .chain(polygon.interiors())
                .map(ring_coords)
                .collect();
            Value::Array(rings)
        })
        .collect();
    json!({ "type": "MultiPolygon", "coordinates": polygons })
}

fn totals_to_json(totals: &Totals) -> Value {
    Value::Object(totals.iter().map(|(id, total)| (id.to_string(), json!(total))).collect::<Map<_, _>>())
}

fn feature_to_geojson(feature: &DistrictFeature) -> Value {
    let mut properties = Map::new();
    properties.insert("demographics".into(), totals_to_json(&feature.demographics));
    if let Some(voting) = &feature.voting {
        properties.insert("voting".into(), totals_to_json(voting));
    }
    properties.insert("compactness".into(), json!(feature.compactness));
    properties.insert("contiguity".into(), json!(feature.contiguity.as_str()));

    json!({
        "type": "Feature",
        "id": feature.id,
        "geometry": multipolygon_to_geojson(&feature.geometry),
        "properties": properties,
    })
}

impl DistrictFeatureCollection {
    /// Render as a GeoJSON `FeatureCollection`.  Plan-level data lives in a
    /// top-level `metadata` member since feature collections carry no
    /// properties of their own.
    pub fn to_geojson(&self) -> Value {
        json!({
            "type": "FeatureCollection",
            "metadata": self.metadata,
            "features": self.features.iter().map(feature_to_geojson).collect::<Vec<_>>(),
        })
    }

    pub fn to_geojson_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(&self.to_geojson()).context("[io::geojson] Failed to serialize GeoJSON to bytes")
    }
}

#[cfg(test)]
mod tests {
    use geo::polygon;

    use super::*;
    use crate::{
        merge::{Contiguity, Creator, MergeMetadata},
        region::RegionIdentity,
    };

    fn collection(voting: Option<Totals>) -> DistrictFeatureCollection {
        let square = polygon![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0), (x: 1.0, y: 1.0), (x: 0.0, y: 1.0)];
        DistrictFeatureCollection {
            features: vec![DistrictFeature {
                id: 1,
                geometry: MultiPolygon(vec![square]),
                demographics: vec![("population".into(), 42)],
                voting,
                compactness: 0.5,
                contiguity: Contiguity::Contiguous,
            }],
            metadata: MergeMetadata {
                completed: true,
                chamber: None,
                creator: Creator { id: "u1".into(), name: "Ada".into() },
                region: RegionIdentity {
                    id: "r1".into(),
                    name: "Texas".into(),
                    region_code: "TX".into(),
                    country_code: "US".into(),
                    location: "tx".into(),
                },
            },
        }
    }

    #[test]
    fn renders_feature_collection_with_metadata() {
        let value = collection(None).to_geojson();
        assert_eq!(value["type"], "FeatureCollection");
        assert_eq!(value["metadata"]["completed"], true);
        assert_eq!(value["metadata"]["region"]["regionCode"], "TX");

        let feature = &value["features"][0];
        assert_eq!(feature["id"], 1);
        assert_eq!(feature["geometry"]["type"], "MultiPolygon");
        assert_eq!(feature["geometry"]["coordinates"][0][0].as_array().unwrap().len(), 5);
        assert_eq!(feature["properties"]["demographics"]["population"], 42);
        assert_eq!(feature["properties"]["contiguity"], "contiguous");
        assert!(feature["properties"].get("voting").is_none());
    }

    #[test]
    fn voting_appears_when_declared() {
        let value = collection(Some(vec![("dem".into(), 7)])).to_geojson();
        assert_eq!(value["features"][0]["properties"]["voting"]["dem"], 7);
    }
}
