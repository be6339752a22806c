pub mod csv;
pub mod geojson;
