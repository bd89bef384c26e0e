//! Read-only ESRI shapefile ingestion.
//!
//! Shapefile rings are CW-exterior/CCW-hole; exteriors are detected by
//! orientation and grouped with the holes that follow them. Attribute
//! lookups go through dbase records by field name.

use std::path::Path;

use anyhow::{Context, Result};
use geo::{Coord, LineString, MultiPolygon, Polygon};
use shapefile::dbase::{FieldValue, Record};
use shapefile::{Reader, Shape};

use crate::geometry::split_multipart;
use crate::layer::{Building, BuildingLayer, StreetLayer, StreetSegment};
use crate::types::{Crs, NetworkId, UniqueId};

fn numeric_field(record: &Record, name: &str) -> Option<f64> {
    match record.get(name) {
        Some(FieldValue::Numeric(v)) => *v,
        Some(FieldValue::Integer(v)) => Some(f64::from(*v)),
        Some(FieldValue::Double(v)) => Some(*v),
        _ => None,
    }
}

fn character_field(record: &Record, name: &str) -> Option<String> {
    match record.get(name) {
        Some(FieldValue::Character(v)) => v.clone(),
        _ => None,
    }
}

fn close_ring(coords: &mut Vec<Coord<f64>>) {
    if !coords.is_empty() && coords[0] != coords[coords.len() - 1] {
        coords.push(coords[0]);
    }
}

fn ring_signed_area(coords: &[Coord<f64>]) -> f64 {
    let mut area = 0.0;
    for w in coords.windows(2) {
        area += w[0].x * w[1].y - w[1].x * w[0].y;
    }
    area / 2.0
}

/// Shapefile polygon to geo, grouping each CW exterior with the holes
/// that follow it.
fn polygon_to_geo(polygon: &shapefile::Polygon) -> MultiPolygon<f64> {
    let mut polygons: Vec<Polygon<f64>> = Vec::new();
    let mut exterior: Option<LineString<f64>> = None;
    let mut holes: Vec<LineString<f64>> = Vec::new();

    for ring in polygon.rings() {
        let mut coords: Vec<Coord<f64>> =
            ring.points().iter().map(|p| Coord { x: p.x, y: p.y }).collect();
        close_ring(&mut coords);
        let is_exterior = ring_signed_area(&coords) < 0.0;
        let ring = LineString(coords);
        if is_exterior {
            if let Some(previous) = exterior.take() {
                polygons.push(Polygon::new(previous, std::mem::take(&mut holes)));
            }
            exterior = Some(ring);
        } else {
            holes.push(ring);
        }
    }
    if let Some(previous) = exterior {
        polygons.push(Polygon::new(previous, holes));
    }
    MultiPolygon(polygons)
}

/// Read building footprints from a `.shp` file. Multi-part footprints are
/// split into one building per part; if any record lacks a numeric `uID`
/// or was split, the whole layer is renumbered sequentially.
pub fn read_buildings(path: &Path, crs: &Crs) -> Result<BuildingLayer> {
    let mut reader = Reader::from_path(path)
        .with_context(|| format!("failed to open shapefile: {}", path.display()))?;

    let mut parts: Vec<(Option<u64>, Polygon<f64>)> = Vec::new();
    for result in reader.iter_shapes_and_records() {
        let (shape, record) = result.context("error reading shape and record")?;
        let polygons = match &shape {
            Shape::Polygon(p) => polygon_to_geo(p),
            Shape::NullShape => continue,
            other => anyhow::bail!("expected polygon shapes, found {}", other.shapetype()),
        };
        let id = numeric_field(&record, "uID")
            .filter(|_| polygons.0.len() == 1)
            .map(|v| v as u64);
        for (id, polygon) in split_multipart([(id, polygons)]) {
            if polygon.exterior().0.len() < 4 {
                continue;
            }
            parts.push((id, polygon));
        }
    }

    let keep_ids = parts.iter().all(|(id, _)| id.is_some());
    let buildings = parts
        .into_iter()
        .enumerate()
        .map(|(i, (id, polygon))| {
            let id = if keep_ids {
                UniqueId(id.unwrap_or_default())
            } else {
                UniqueId(i as u64 + 1)
            };
            Building::new(id, polygon)
        })
        .collect();
    Ok(BuildingLayer::new(crs.clone(), buildings))
}

/// Read a street network from a `.shp` file. Each polyline part becomes
/// its own segment with a fresh sequential id; `name` is carried from the
/// attribute table when present.
pub fn read_streets(path: &Path, crs: &Crs) -> Result<StreetLayer> {
    let mut reader = Reader::from_path(path)
        .with_context(|| format!("failed to open shapefile: {}", path.display()))?;

    let mut segments: Vec<StreetSegment> = Vec::new();
    for result in reader.iter_shapes_and_records() {
        let (shape, record) = result.context("error reading shape and record")?;
        let polyline = match &shape {
            Shape::Polyline(p) => p,
            Shape::NullShape => continue,
            other => anyhow::bail!("expected polyline shapes, found {}", other.shapetype()),
        };
        let name = character_field(&record, "name");
        for part in polyline.parts() {
            let points: Vec<Coord<f64>> =
                part.iter().map(|p| Coord { x: p.x, y: p.y }).collect();
            if points.len() < 2 {
                continue;
            }
            segments.push(StreetSegment {
                id: NetworkId(segments.len() as u64 + 1),
                name: name.clone(),
                line: LineString(points),
            });
        }
    }
    Ok(StreetLayer::new(crs.clone(), segments))
}

#[cfg(test)]
mod tests {
    use super::*;
    use shapefile::dbase::TableWriterBuilder;
    use shapefile::{Point, Polygon as ShpPolygon, PolygonRing, Polyline, Writer};

    fn crs() -> Crs {
        Crs::new("EPSG:3857")
    }

    #[test]
    fn reads_polygons_with_ids() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("buildings.shp");
        let table = TableWriterBuilder::new()
            .add_numeric_field("uID".try_into().unwrap(), 10, 0);
        let mut writer = Writer::from_path(&path, table).unwrap();

        let square = ShpPolygon::new(PolygonRing::Outer(vec![
            Point::new(0.0, 0.0),
            Point::new(0.0, 2.0),
            Point::new(2.0, 2.0),
            Point::new(2.0, 0.0),
            Point::new(0.0, 0.0),
        ]));
        let mut record = Record::default();
        record.insert("uID".to_string(), FieldValue::Numeric(Some(42.0)));
        writer.write_shape_and_record(&square, &record).unwrap();
        drop(writer);

        let layer = read_buildings(&path, &crs()).unwrap();
        assert_eq!(layer.len(), 1);
        assert_eq!(layer.buildings[0].id, UniqueId(42));
        assert_eq!(layer.buildings[0].footprint.exterior().0.len(), 5);
    }

    #[test]
    fn polyline_parts_become_separate_segments() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("streets.shp");
        let table = TableWriterBuilder::new()
            .add_character_field("name".try_into().unwrap(), 32);
        let mut writer = Writer::from_path(&path, table).unwrap();

        let polyline = Polyline::with_parts(vec![
            vec![Point::new(0.0, 0.0), Point::new(5.0, 0.0)],
            vec![Point::new(0.0, 3.0), Point::new(5.0, 3.0)],
        ]);
        let mut record = Record::default();
        record.insert("name".to_string(), FieldValue::Character(Some("Main".to_string())));
        writer.write_shape_and_record(&polyline, &record).unwrap();
        drop(writer);

        let layer = read_streets(&path, &crs()).unwrap();
        assert_eq!(layer.len(), 2);
        assert_eq!(layer.segments[0].id, NetworkId(1));
        assert_eq!(layer.segments[1].id, NetworkId(2));
        assert!(layer.segments.iter().all(|s| s.name.as_deref() == Some("Main")));
    }
}
