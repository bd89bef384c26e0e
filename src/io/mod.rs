//! Reading source layers from disk and serializing derived ones.
//!
//! GeoJSON is the interchange format in both directions; ESRI shapefiles
//! are read-only, for ingesting cadastral exports.

pub mod geojson;
pub mod shapefile;
