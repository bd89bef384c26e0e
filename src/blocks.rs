//! Block delineation: the built-up area minus the street corridor, split
//! into connected parts and dissolved back along tessellation cells.

use std::collections::BTreeMap;

use anyhow::Result;
use geo::{BooleanOps, BoundingRect, Centroid, Intersects, Polygon};

use crate::cancel::CancelToken;
use crate::diagnostics::Diagnostics;
use crate::geometry::{dissolve, offset::buffer_line, ordered_parts};
use crate::index::BoxIndex;
use crate::layer::{Block, BlockLayer, BuildingLayer, StreetLayer, Tessellation};
use crate::types::BlockId;

/// Tunables of the block delineator.
#[derive(Clone, Debug)]
pub struct BlockParams {
    /// Half-width of the corridor carved out around each street line.
    pub street_buffer: f64,
    pub verbose: u8,
}

impl Default for BlockParams {
    fn default() -> Self {
        Self { street_buffer: 0.1, verbose: 0 }
    }
}

/// Carve the street corridor out of the built-up area, assign every
/// building the enclosing part via its centroid, and dissolve the
/// tessellation cells of each part into a block. Cells and buildings get
/// their `block_id` written in place.
pub fn delineate(
    tessellation: &mut Tessellation,
    buildings: &mut BuildingLayer,
    streets: &StreetLayer,
    params: &BlockParams,
    cancel: &CancelToken,
) -> Result<(BlockLayer, Diagnostics)> {
    tessellation.crs.ensure_matches(&buildings.crs)?;
    tessellation.crs.ensure_matches(&streets.crs)?;
    let mut diagnostics = Diagnostics::default();

    let built_up = dissolve(
        &tessellation.cells.iter().map(|c| c.polygon.clone()).collect::<Vec<_>>(),
    );
    let corridor: Vec<Polygon<f64>> = streets
        .segments
        .iter()
        .flat_map(|s| buffer_line(&s.line, params.street_buffer).0)
        .collect();
    let corridor = dissolve(&corridor);
    let open = built_up.difference(&corridor);
    let parts = ordered_parts(open);
    if params.verbose > 0 {
        eprintln!("[blocks] street corridor splits the built-up area into {} parts", parts.len());
    }

    let part_index = BoxIndex::bulk(
        parts
            .iter()
            .enumerate()
            .filter_map(|(i, p)| p.bounding_rect().map(|r| (i, r))),
    );

    // Building centroid decides the part; a centroid on a shared boundary
    // goes to the lowest-numbered part.
    let mut assignment: Vec<Option<usize>> = Vec::with_capacity(buildings.len());
    for building in &buildings.buildings {
        cancel.check()?;
        let candidate = building.footprint.centroid().and_then(|centroid| {
            part_index
                .query_point(centroid.0, 0.0)
                .filter(|&k| parts[k].intersects(&centroid))
                .min()
        });
        if candidate.is_none() {
            diagnostics.blockless_buildings.push(building.id);
        }
        assignment.push(candidate);
    }

    // Cells inherit the part of their building, then each part's cells are
    // dissolved into the block footprint. A group whose cells are not
    // contiguous dissolves into several parts; each part becomes its own
    // block so no cell area leaves the block layer. Enclosed holes are not
    // block boundaries; only the outer ring survives.
    let building_slot = buildings.index_by_id();
    let mut grouped: BTreeMap<usize, Vec<Polygon<f64>>> = BTreeMap::new();
    for cell in &tessellation.cells {
        let part = building_slot
            .get(&cell.building_id)
            .and_then(|&i| assignment[i]);
        if let Some(part) = part {
            grouped.entry(part).or_default().push(cell.polygon.clone());
        }
    }

    let mut blocks = Vec::with_capacity(grouped.len());
    let mut next = 1u64;
    for polygons in grouped.into_values() {
        cancel.check()?;
        for merged in ordered_parts(dissolve(&polygons)) {
            blocks.push(Block {
                id: BlockId(next),
                polygon: Polygon::new(merged.exterior().clone(), vec![]),
            });
            next += 1;
        }
    }

    // Final membership is re-derived against the finished block polygons
    // rather than carried over from the street-cut parts, since the cell
    // dissolve and hole removal can move the boundary.
    let block_index = BoxIndex::bulk(
        blocks
            .iter()
            .enumerate()
            .filter_map(|(i, b)| b.polygon.bounding_rect().map(|r| (i, r))),
    );
    for building in &mut buildings.buildings {
        cancel.check()?;
        let assigned = building.footprint.centroid().and_then(|centroid| {
            let mut hits: Vec<BlockId> = block_index
                .query_point(centroid.0, 0.0)
                .filter(|&k| blocks[k].polygon.intersects(&centroid))
                .map(|k| blocks[k].id)
                .collect();
            hits.sort_unstable();
            if hits.len() > 1 {
                diagnostics.ambiguous_assignments += 1;
            }
            hits.first().copied()
        });
        building.block_id = assigned;
        if assigned.is_none() && !diagnostics.blockless_buildings.contains(&building.id) {
            diagnostics.blockless_buildings.push(building.id);
        }
    }
    for cell in &mut tessellation.cells {
        cell.block_id = building_slot
            .get(&cell.building_id)
            .and_then(|&i| buildings.buildings[i].block_id);
    }

    if params.verbose > 0 {
        eprintln!("[blocks] delineated {} blocks", blocks.len());
    }
    Ok((BlockLayer::new(tessellation.crs.clone(), blocks), diagnostics))
}
