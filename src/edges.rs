//! Street-edge segmentation: cells of one block facing the same named
//! street, dissolved into edge polygons.

use std::collections::BTreeMap;

use ahash::AHashMap;
use anyhow::Result;
use geo::{Area, BooleanOps, Centroid, Intersects, Line, Polygon};

use crate::cancel::CancelToken;
use crate::diagnostics::Diagnostics;
use crate::geometry::{dissolve, line_rect, ordered_parts, project_point_to_segment, rect_around};
use crate::index::BoxIndex;
use crate::layer::{BuildingLayer, Edge, EdgeLayer, StreetLayer, Tessellation};
use crate::types::{BlockId, EdgeId, NetworkId, UniqueId};

/// Streets with no name attribute still form edges, under this label.
pub const UNNAMED_STREET: &str = "unassigned";

/// Tunables of the edge segmenter.
#[derive(Clone, Debug)]
pub struct EdgeParams {
    /// Half-width of the square search window around a building centroid.
    /// The window is a fixed box, not a growing radius, so a street just
    /// outside it is never matched; widen this for sparse networks.
    pub min_size: f64,
    pub verbose: u8,
}

impl Default for EdgeParams {
    fn default() -> Self {
        Self { min_size: 100.0, verbose: 0 }
    }
}

struct SubSegment {
    line: Line<f64>,
    name: String,
    network_id: NetworkId,
}

/// Break every street polyline into two-point pieces, each carrying the
/// street's name and id.
fn decompose(streets: &StreetLayer) -> Vec<SubSegment> {
    let mut pieces = Vec::new();
    for segment in &streets.segments {
        let name = segment.name.clone().unwrap_or_else(|| UNNAMED_STREET.to_string());
        for line in segment.line.lines() {
            pieces.push(SubSegment { line, name: name.clone(), network_id: segment.id });
        }
    }
    pieces
}

/// Assign every building its facing street, join that onto its cell, group
/// cells by street name within each block, and dissolve the groups into
/// edge polygons. Cells and buildings get `network_id` and `edge_id`
/// written in place.
pub fn segment(
    tessellation: &mut Tessellation,
    buildings: &mut BuildingLayer,
    streets: &StreetLayer,
    params: &EdgeParams,
    cancel: &CancelToken,
) -> Result<(EdgeLayer, Diagnostics)> {
    tessellation.crs.ensure_matches(&buildings.crs)?;
    tessellation.crs.ensure_matches(&streets.crs)?;
    let mut diagnostics = Diagnostics::default();

    let pieces = decompose(streets);
    let piece_index = BoxIndex::bulk(
        pieces
            .iter()
            .enumerate()
            .map(|(i, p)| (i, line_rect(p.line))),
    );
    if params.verbose > 0 {
        eprintln!(
            "[edges] matching {} buildings against {} street pieces",
            buildings.len(),
            pieces.len()
        );
    }

    // Nearest piece within the fixed window around the building centroid;
    // ties break on distance, then street name, then network id. The cell
    // centroid is no use here: an asymmetric cell can sit much closer to a
    // different street than the building it belongs to.
    let mut matched_by_building: AHashMap<UniqueId, usize> =
        AHashMap::with_capacity(buildings.len());
    for building in &buildings.buildings {
        cancel.check()?;
        let Some(centroid) = building.footprint.centroid() else {
            diagnostics.unmatched_streets.push(building.id);
            continue;
        };
        let window = rect_around(centroid.0, params.min_size);
        let best = piece_index
            .query(&window)
            .min_by(|&a, &b| {
                let (_, da) = project_point_to_segment(centroid.0, pieces[a].line);
                let (_, db) = project_point_to_segment(centroid.0, pieces[b].line);
                da.total_cmp(&db)
                    .then_with(|| pieces[a].name.cmp(&pieces[b].name))
                    .then_with(|| pieces[a].network_id.cmp(&pieces[b].network_id))
            });
        match best {
            Some(p) => {
                matched_by_building.insert(building.id, p);
            }
            None => diagnostics.unmatched_streets.push(building.id),
        }
    }

    // Each cell inherits the match of its building.
    let matched: Vec<Option<usize>> = tessellation
        .cells
        .iter()
        .map(|cell| matched_by_building.get(&cell.building_id).copied())
        .collect();
    for (cell, piece) in tessellation.cells.iter_mut().zip(&matched) {
        cell.network_id = piece.map(|p| pieces[p].network_id);
    }

    // Group matched cells by (street name, block); only cells inside a
    // block participate in an edge.
    let mut groups: BTreeMap<(&str, BlockId), Vec<usize>> = BTreeMap::new();
    for (i, cell) in tessellation.cells.iter().enumerate() {
        if let (Some(piece), Some(block)) = (matched[i], cell.block_id) {
            groups.entry((pieces[piece].name.as_str(), block)).or_default().push(i);
        }
    }

    let mut edges = Vec::new();
    let mut cell_edges: Vec<Option<EdgeId>> = vec![None; tessellation.len()];
    let mut next = 1u64;
    for ((_, block), members) in &groups {
        cancel.check()?;
        let polygons: Vec<Polygon<f64>> =
            members.iter().map(|&i| tessellation.cells[i].polygon.clone()).collect();
        let parts = ordered_parts(dissolve(&polygons));
        let mut group_edges: Vec<(EdgeId, Polygon<f64>)> = Vec::with_capacity(parts.len());
        for part in parts {
            let id = EdgeId(next);
            next += 1;
            edges.push(Edge {
                id,
                block_id: *block,
                polygon: Polygon::new(part.exterior().clone(), vec![]),
            });
            group_edges.push((id, part));
        }

        // A cell belongs to the part holding its centroid; a centroid
        // pushed outside by the dissolve falls back to largest overlap
        // within the same group.
        for &i in members {
            let cell = &tessellation.cells[i];
            let by_centroid = cell.polygon.centroid().and_then(|c| {
                group_edges.iter().find(|(_, p)| p.intersects(&c)).map(|(id, _)| *id)
            });
            cell_edges[i] = by_centroid.or_else(|| {
                group_edges
                    .iter()
                    .max_by(|(_, a), (_, b)| {
                        a.intersection(&cell.polygon)
                            .unsigned_area()
                            .total_cmp(&b.intersection(&cell.polygon).unsigned_area())
                    })
                    .map(|(id, _)| *id)
            });
        }
    }
    for (cell, edge) in tessellation.cells.iter_mut().zip(&cell_edges) {
        cell.edge_id = *edge;
    }

    // Buildings keep their own street match; the edge comes from the cell.
    let by_building = tessellation.index_by_building();
    for building in &mut buildings.buildings {
        building.network_id =
            matched_by_building.get(&building.id).map(|&p| pieces[p].network_id);
        if let Some(&i) = by_building.get(&building.id) {
            building.edge_id = tessellation.cells[i].edge_id;
        }
    }

    if params.verbose > 0 {
        eprintln!("[edges] segmented {} edges", edges.len());
    }
    Ok((EdgeLayer::new(tessellation.crs.clone(), edges), diagnostics))
}
