//! GeoJSON serialization of every layer.
//!
//! Feature properties use the short attribute names carried through the
//! whole pipeline: `uID` (building), `bID` (block), `eID` (edge), `nID`
//! (street segment). Missing assignments serialize as JSON null.

use anyhow::{Context, Result, anyhow, bail};
use geo::{Coord, LineString, MultiPolygon, Polygon};
use serde_json::{Value, json};

use crate::geometry::split_multipart;
use crate::layer::{
    BlockLayer, Building, BuildingLayer, EdgeLayer, StreetLayer, StreetSegment, Tessellation,
};
use crate::types::{Crs, NetworkId, UniqueId};

fn ring_json(ring: &LineString<f64>) -> Value {
    let coords: Vec<Vec<f64>> = ring.coords().map(|c| vec![c.x, c.y]).collect();
    json!(coords)
}

fn polygon_geometry(polygon: &Polygon<f64>) -> Value {
    let mut rings = vec![ring_json(polygon.exterior())];
    rings.extend(polygon.interiors().iter().map(ring_json));
    json!({ "type": "Polygon", "coordinates": rings })
}

fn line_geometry(line: &LineString<f64>) -> Value {
    json!({ "type": "LineString", "coordinates": line.coords().map(|c| vec![c.x, c.y]).collect::<Vec<_>>() })
}

fn collection(crs: &Crs, features: Vec<Value>) -> Result<Vec<u8>> {
    let collection = json!({
        "type": "FeatureCollection",
        "crs": { "type": "name", "properties": { "name": crs.as_str() } },
        "features": features,
    });
    serde_json::to_vec(&collection).context("failed to serialize GeoJSON")
}

fn opt_id(id: Option<u64>) -> Value {
    match id {
        Some(id) => json!(id),
        None => Value::Null,
    }
}

pub fn write_buildings(layer: &BuildingLayer) -> Result<Vec<u8>> {
    let features = layer
        .buildings
        .iter()
        .map(|b| {
            json!({
                "type": "Feature",
                "geometry": polygon_geometry(&b.footprint),
                "properties": {
                    "uID": b.id.0,
                    "bID": opt_id(b.block_id.map(|v| v.0)),
                    "eID": opt_id(b.edge_id.map(|v| v.0)),
                    "nID": opt_id(b.network_id.map(|v| v.0)),
                },
            })
        })
        .collect();
    collection(&layer.crs, features)
}

pub fn write_tessellation(layer: &Tessellation) -> Result<Vec<u8>> {
    let features = layer
        .cells
        .iter()
        .map(|c| {
            json!({
                "type": "Feature",
                "geometry": polygon_geometry(&c.polygon),
                "properties": {
                    "uID": c.building_id.0,
                    "bID": opt_id(c.block_id.map(|v| v.0)),
                    "eID": opt_id(c.edge_id.map(|v| v.0)),
                    "nID": opt_id(c.network_id.map(|v| v.0)),
                },
            })
        })
        .collect();
    collection(&layer.crs, features)
}

pub fn write_blocks(layer: &BlockLayer) -> Result<Vec<u8>> {
    let features = layer
        .blocks
        .iter()
        .map(|b| {
            json!({
                "type": "Feature",
                "geometry": polygon_geometry(&b.polygon),
                "properties": { "bID": b.id.0 },
            })
        })
        .collect();
    collection(&layer.crs, features)
}

pub fn write_edges(layer: &EdgeLayer) -> Result<Vec<u8>> {
    let features = layer
        .edges
        .iter()
        .map(|e| {
            json!({
                "type": "Feature",
                "geometry": polygon_geometry(&e.polygon),
                "properties": { "eID": e.id.0, "bID": e.block_id.0 },
            })
        })
        .collect();
    collection(&layer.crs, features)
}

pub fn write_streets(layer: &StreetLayer) -> Result<Vec<u8>> {
    let features = layer
        .segments
        .iter()
        .map(|s| {
            json!({
                "type": "Feature",
                "geometry": line_geometry(&s.line),
                "properties": {
                    "nID": s.id.0,
                    "name": s.name.as_deref().map(Value::from).unwrap_or(Value::Null),
                },
            })
        })
        .collect();
    collection(&layer.crs, features)
}

fn parse_ring(coords: &[Value]) -> Result<LineString<f64>> {
    let mut points = Vec::with_capacity(coords.len());
    for pair in coords {
        let pair = pair.as_array().ok_or_else(|| anyhow!("coordinate is not an array"))?;
        if pair.len() < 2 {
            bail!("coordinate has fewer than two components");
        }
        let x = pair[0].as_f64().ok_or_else(|| anyhow!("x is not a number"))?;
        let y = pair[1].as_f64().ok_or_else(|| anyhow!("y is not a number"))?;
        points.push(Coord { x, y });
    }
    if !points.is_empty() && points[0] != points[points.len() - 1] {
        points.push(points[0]);
    }
    Ok(LineString(points))
}

fn parse_polygon(rings: &[Value]) -> Result<Polygon<f64>> {
    let mut parsed = rings.iter().map(|r| {
        r.as_array()
            .ok_or_else(|| anyhow!("ring is not an array"))
            .and_then(|r| parse_ring(r))
    });
    let exterior = parsed.next().ok_or_else(|| anyhow!("polygon has no rings"))??;
    let interiors = parsed.collect::<Result<Vec<_>>>()?;
    Ok(Polygon::new(exterior, interiors))
}

/// Polygon parts of a feature geometry; a MultiPolygon contributes one
/// part per member.
fn polygon_parts(geometry: &Value) -> Result<Vec<Polygon<f64>>> {
    let coords = geometry["coordinates"]
        .as_array()
        .ok_or_else(|| anyhow!("geometry has no coordinates"))?;
    match geometry["type"].as_str() {
        Some("Polygon") => Ok(vec![parse_polygon(coords)?]),
        Some("MultiPolygon") => coords
            .iter()
            .map(|p| {
                p.as_array()
                    .ok_or_else(|| anyhow!("MultiPolygon member is not an array"))
                    .and_then(|p| parse_polygon(p))
            })
            .collect(),
        other => bail!("expected polygonal geometry, found {other:?}"),
    }
}

fn parse_crs(value: &Value, fallback: &Crs) -> Crs {
    value["crs"]["properties"]["name"]
        .as_str()
        .map(Crs::new)
        .unwrap_or_else(|| fallback.clone())
}

/// Read a building layer from GeoJSON bytes. Multi-part footprints are
/// split into one building per part; features without a numeric `uID`
/// force a sequential renumbering of the whole layer so ids stay unique.
pub fn read_buildings(bytes: &[u8], default_crs: &Crs) -> Result<BuildingLayer> {
    let value: Value = serde_json::from_slice(bytes).context("failed to parse GeoJSON")?;
    let features = value["features"]
        .as_array()
        .ok_or_else(|| anyhow!("not a FeatureCollection"))?;

    let mut parts: Vec<(Option<u64>, Polygon<f64>)> = Vec::new();
    for feature in features {
        let footprint = MultiPolygon(polygon_parts(&feature["geometry"])?);
        let id = feature["properties"]["uID"].as_u64().filter(|_| footprint.0.len() == 1);
        for (id, polygon) in split_multipart([(id, footprint)]) {
            if polygon.exterior().0.len() < 4 {
                continue; // degenerate footprint, drop
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
    Ok(BuildingLayer::new(parse_crs(&value, default_crs), buildings))
}

/// Read a street layer from GeoJSON bytes. Segment ids are always
/// reassigned sequentially; `name` is carried when present.
pub fn read_streets(bytes: &[u8], default_crs: &Crs) -> Result<StreetLayer> {
    let value: Value = serde_json::from_slice(bytes).context("failed to parse GeoJSON")?;
    let features = value["features"]
        .as_array()
        .ok_or_else(|| anyhow!("not a FeatureCollection"))?;

    let mut segments = Vec::new();
    for feature in features {
        let geometry = &feature["geometry"];
        let coords = geometry["coordinates"]
            .as_array()
            .ok_or_else(|| anyhow!("geometry has no coordinates"))?;
        let lines: Vec<&[Value]> = match geometry["type"].as_str() {
            Some("LineString") => vec![coords.as_slice()],
            Some("MultiLineString") => coords
                .iter()
                .map(|l| {
                    l.as_array()
                        .map(Vec::as_slice)
                        .ok_or_else(|| anyhow!("MultiLineString member is not an array"))
                })
                .collect::<Result<_>>()?,
            other => bail!("expected line geometry, found {other:?}"),
        };
        let name = feature["properties"]["name"].as_str().map(str::to_string);
        for line in lines {
            let mut points = Vec::with_capacity(line.len());
            for pair in line {
                let pair =
                    pair.as_array().ok_or_else(|| anyhow!("coordinate is not an array"))?;
                if pair.len() < 2 {
                    bail!("coordinate has fewer than two components");
                }
                let x = pair[0].as_f64().ok_or_else(|| anyhow!("x is not a number"))?;
                let y = pair[1].as_f64().ok_or_else(|| anyhow!("y is not a number"))?;
                points.push(Coord { x, y });
            }
            if points.len() < 2 {
                continue; // degenerate line, drop
            }
            segments.push(StreetSegment {
                id: NetworkId(segments.len() as u64 + 1),
                name: name.clone(),
                line: LineString(points),
            });
        }
    }
    Ok(StreetLayer::new(parse_crs(&value, default_crs), segments))
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::polygon;

    fn crs() -> Crs {
        Crs::new("EPSG:3857")
    }

    #[test]
    fn buildings_round_trip() {
        let layer = BuildingLayer::new(
            crs(),
            vec![Building::new(
                UniqueId(7),
                polygon![(x: 0.0, y: 0.0), (x: 2.0, y: 0.0), (x: 2.0, y: 2.0), (x: 0.0, y: 2.0)],
            )],
        );
        let bytes = write_buildings(&layer).unwrap();
        let back = read_buildings(&bytes, &crs()).unwrap();
        assert_eq!(back.len(), 1);
        assert_eq!(back.buildings[0].id, UniqueId(7));
        assert_eq!(back.crs, crs());
        assert_eq!(
            back.buildings[0].footprint.exterior().0,
            layer.buildings[0].footprint.exterior().0
        );
    }

    #[test]
    fn multipart_footprint_splits_and_renumbers() {
        let bytes = serde_json::to_vec(&serde_json::json!({
            "type": "FeatureCollection",
            "features": [{
                "type": "Feature",
                "geometry": {
                    "type": "MultiPolygon",
                    "coordinates": [
                        [[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0], [0.0, 0.0]]],
                        [[[5.0, 0.0], [6.0, 0.0], [6.0, 1.0], [5.0, 1.0], [5.0, 0.0]]]
                    ]
                },
                "properties": { "uID": 3 }
            }]
        }))
        .unwrap();
        let layer = read_buildings(&bytes, &crs()).unwrap();
        assert_eq!(layer.len(), 2);
        assert_eq!(layer.buildings[0].id, UniqueId(1));
        assert_eq!(layer.buildings[1].id, UniqueId(2));
    }

    #[test]
    fn streets_round_trip_with_names() {
        let layer = StreetLayer::new(
            crs(),
            vec![StreetSegment {
                id: NetworkId(1),
                name: Some("Main".to_string()),
                line: LineString(vec![Coord { x: 0.0, y: 0.0 }, Coord { x: 5.0, y: 0.0 }]),
            }],
        );
        let bytes = write_streets(&layer).unwrap();
        let back = read_streets(&bytes, &crs()).unwrap();
        assert_eq!(back.len(), 1);
        assert_eq!(back.segments[0].name.as_deref(), Some("Main"));
        assert_eq!(back.segments[0].line.0, layer.segments[0].line.0);
    }

    #[test]
    fn unclosed_rings_are_closed_on_read() {
        let bytes = serde_json::to_vec(&serde_json::json!({
            "type": "FeatureCollection",
            "features": [{
                "type": "Feature",
                "geometry": {
                    "type": "Polygon",
                    "coordinates": [[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]]]
                },
                "properties": { "uID": 1 }
            }]
        }))
        .unwrap();
        let layer = read_buildings(&bytes, &crs()).unwrap();
        let ring = &layer.buildings[0].footprint.exterior().0;
        assert_eq!(ring.first(), ring.last());
    }
}
