//! Morphological tessellation: a Voronoi-based partition of the study area
//! assigning every point to exactly one building.
//!
//! Buildings are shrunk inward to resolve shared walls, densified, and fed
//! as Voronoi sites together with the convex-hull boundary of the expanded
//! study area. Finite Voronoi regions are attributed to buildings through
//! their generating sites; regions left without a building are resolved by
//! a shared-boundary vote among already-joined neighbors. Cells are then
//! dissolved per building and clipped to the study extent.

pub mod voronoi;

use ahash::{AHashMap, AHashSet};
use anyhow::{Result, bail};
use geo::{
    Area, BooleanOps, BoundingRect, ConvexHull, Coord, MultiPoint, MultiPolygon, Polygon, Rect,
    SimplifyVwPreserve,
};

use crate::cancel::CancelToken;
use crate::diagnostics::Diagnostics;
use crate::geometry::{
    boundary_segments, densify_polygon, dissolve, largest_part, line_rect,
    offset::offset_polygon, ordered_parts, shared_boundary_length,
};
use crate::index::BoxIndex;
use crate::layer::{BuildingLayer, Cell, Tessellation};
use crate::types::UniqueId;

use self::voronoi::{Site, VoronoiCell};

/// Tunables of the tessellation builder. Distances are in the units of the
/// input coordinate reference system.
#[derive(Clone, Debug)]
pub struct TessellationParams {
    /// Inward offset applied to every footprint to resolve shared walls.
    pub inner_buffer: f64,
    /// Topology-preserving simplification tolerance applied after the
    /// offset, bounding the Voronoi input vertex count.
    pub simplify_tolerance: f64,
    /// Spacing of the vertices inserted along footprint boundaries before
    /// the Voronoi diagram is built.
    pub segment_spacing: f64,
    /// Outward expansion of the footprints defining the study extent.
    pub edge_buffer: f64,
    /// Width of the square quadrats used to localize boundary clipping.
    pub quadrat_width: f64,
    pub verbose: u8,
}

impl Default for TessellationParams {
    fn default() -> Self {
        Self {
            inner_buffer: 0.5,
            simplify_tolerance: 0.25,
            segment_spacing: 2.0,
            edge_buffer: 50.0,
            quadrat_width: 100.0,
            verbose: 0,
        }
    }
}

/// Per-building geometry prepared for site generation, plus the clipped
/// study extent and the hull bounding the diagram.
struct Prepared {
    /// `(building position, shrunk+simplified footprint)`.
    shapes: Vec<(usize, Polygon<f64>)>,
    study_area: MultiPolygon<f64>,
    hull: Polygon<f64>,
    collapsed: Vec<UniqueId>,
}

fn prepare(buildings: &BuildingLayer, params: &TessellationParams) -> Result<Prepared> {
    let mut shapes = Vec::with_capacity(buildings.len());
    let mut collapsed = Vec::new();
    for (i, building) in buildings.buildings.iter().enumerate() {
        let shrunk = match offset_polygon(&building.footprint, -params.inner_buffer) {
            Some(poly) => poly,
            None => {
                // Footprint too small for the offset: fall back to the
                // unshrunk boundary so the building still gets a cell.
                collapsed.push(building.id);
                building.footprint.clone()
            }
        };
        shapes.push((i, shrunk.simplify_vw_preserve(&params.simplify_tolerance)));
    }

    let expanded: Vec<Polygon<f64>> = shapes
        .iter()
        .filter_map(|(_, poly)| offset_polygon(poly, params.edge_buffer))
        .collect();
    if expanded.is_empty() {
        bail!("no footprint survived study-extent expansion");
    }
    let study_area = dissolve(&expanded);

    let hull_points: MultiPoint<f64> = expanded
        .iter()
        .flat_map(|p| p.exterior().0.iter().copied())
        .map(geo::Point::from)
        .collect();
    let hull = hull_points.convex_hull();
    let hull = offset_polygon(&hull, params.edge_buffer).unwrap_or(hull);

    Ok(Prepared { shapes, study_area, hull, collapsed })
}

/// The clipped study extent: the union of all footprints (shrunk and
/// simplified as for site generation) expanded by `edge_buffer`. The
/// tessellation partitions exactly this region.
pub fn study_extent(
    buildings: &BuildingLayer,
    params: &TessellationParams,
) -> Result<MultiPolygon<f64>> {
    Ok(prepare(buildings, params)?.study_area)
}

fn validate(buildings: &BuildingLayer) -> Result<()> {
    if buildings.is_empty() {
        bail!("building layer is empty");
    }
    let mut seen: AHashSet<UniqueId> = AHashSet::with_capacity(buildings.len());
    for building in &buildings.buildings {
        if !seen.insert(building.id) {
            bail!("duplicate building id {}", building.id);
        }
        if building.footprint.exterior().0.len() < 4 {
            bail!("building {} has a degenerate exterior ring", building.id);
        }
        let finite = building
            .footprint
            .exterior()
            .0
            .iter()
            .chain(building.footprint.interiors().iter().flat_map(|r| r.0.iter()))
            .all(|c| c.x.is_finite() && c.y.is_finite());
        if !finite {
            bail!("building {} has non-finite coordinates", building.id);
        }
    }
    Ok(())
}

/// Generate Voronoi input sites: densified boundary vertices of every
/// prepared footprint, plus the hull-boundary vertices. Exact duplicates
/// keep their first owner so the assignment stays deterministic.
fn generate_sites(
    buildings: &BuildingLayer,
    prepared: &Prepared,
    spacing: f64,
) -> Vec<Site> {
    let mut sites = Vec::new();
    let mut seen: AHashSet<(u64, u64)> = AHashSet::new();
    let mut push = |sites: &mut Vec<Site>, point: Coord<f64>, owner: Option<UniqueId>| {
        if seen.insert((point.x.to_bits(), point.y.to_bits())) {
            sites.push(Site { point, owner });
        }
    };

    for (i, shape) in &prepared.shapes {
        let owner = Some(buildings.buildings[*i].id);
        let dense = densify_polygon(shape, spacing);
        for ring in std::iter::once(dense.exterior()).chain(dense.interiors()) {
            let coords = &ring.0;
            let open = if coords.len() > 1 && coords.first() == coords.last() {
                &coords[..coords.len() - 1]
            } else {
                &coords[..]
            };
            for &c in open {
                push(&mut sites, c, owner);
            }
        }
    }

    // The hull ring is densified too; a corner-only hull gives the outer
    // bisectors too much reach into the extent.
    let hull = densify_polygon(&prepared.hull, spacing);
    let hull_coords = &hull.exterior().0;
    let open = if hull_coords.len() > 1 && hull_coords.first() == hull_coords.last() {
        &hull_coords[..hull_coords.len() - 1]
    } else {
        &hull_coords[..]
    };
    for &c in open {
        push(&mut sites, c, None);
    }
    sites
}

/// Resolve cells the Voronoi construction left without a building: vote by
/// shared-boundary length against each neighboring building's union of
/// already-joined cells, tie-broken by smallest building id. The vote only
/// reads the initially-joined state, never earlier vote results.
fn resolve_unjoined(
    joined: &mut AHashMap<UniqueId, Vec<Polygon<f64>>>,
    unjoined: Vec<Polygon<f64>>,
    diagnostics: &mut Diagnostics,
    cancel: &CancelToken,
) -> Result<()> {
    if unjoined.is_empty() {
        return Ok(());
    }

    // Flat view of the joined cells for the neighbor query.
    let flat: Vec<(UniqueId, &Polygon<f64>)> = joined
        .iter()
        .flat_map(|(id, polys)| polys.iter().map(move |p| (*id, p)))
        .collect();
    let index = BoxIndex::bulk(
        flat.iter()
            .enumerate()
            .filter_map(|(i, (_, p))| p.bounding_rect().map(|r| (i, r))),
    );
    let mut unions: AHashMap<UniqueId, MultiPolygon<f64>> = AHashMap::new();

    let mut assignments: Vec<(UniqueId, Polygon<f64>)> = Vec::new();
    for cell in unjoined {
        cancel.check()?;
        let Some(rect) = cell.bounding_rect() else {
            diagnostics.unjoined_cells_dropped += 1;
            continue;
        };
        let mut candidates: Vec<UniqueId> =
            index.query(&rect).map(|i| flat[i].0).collect();
        candidates.sort_unstable();
        candidates.dedup();

        let cell_multi = MultiPolygon(vec![cell.clone()]);
        let mut best: Option<(f64, UniqueId)> = None;
        let mut tied = false;
        for id in candidates {
            let union = unions.entry(id).or_insert_with(|| {
                dissolve(joined.get(&id).map(Vec::as_slice).unwrap_or(&[]))
            });
            let share = shared_boundary_length(&cell_multi, union);
            if share <= 0.0 {
                continue;
            }
            match best {
                None => best = Some((share, id)),
                Some((best_share, best_id)) => {
                    if (share - best_share).abs() <= 1e-9 {
                        tied = true;
                        if id < best_id {
                            best = Some((share, id));
                        }
                    } else if share > best_share {
                        best = Some((share, id));
                    }
                }
            }
        }
        match best {
            Some((_, id)) => {
                if tied {
                    diagnostics.ambiguous_assignments += 1;
                }
                assignments.push((id, cell));
            }
            None => diagnostics.unjoined_cells_dropped += 1,
        }
    }
    for (id, cell) in assignments {
        joined.entry(id).or_default().push(cell);
    }
    Ok(())
}

/// Clip per-building cell geometry to the study extent. Only cells found
/// near the boundary by the quadrat pass are intersected; multi-part
/// intersections keep their largest part downstream.
fn clip_to_extent(
    groups: &mut [(UniqueId, MultiPolygon<f64>)],
    study_area: &MultiPolygon<f64>,
    quadrat_width: f64,
    cancel: &CancelToken,
) -> Result<()> {
    let segments = boundary_segments(study_area);
    let segment_index =
        BoxIndex::bulk(segments.iter().enumerate().map(|(i, l)| (i, line_rect(*l))));
    let cell_index = BoxIndex::bulk(
        groups
            .iter()
            .enumerate()
            .filter_map(|(i, (_, mp))| mp.bounding_rect().map(|r| (i, r))),
    );
    let Some(bbox) = study_area.bounding_rect() else {
        return Ok(());
    };

    // Quadrat cut: visit the boundary in fixed-width squares and collect
    // the cells whose boxes meet a square containing boundary geometry.
    let mut marked: AHashSet<usize> = AHashSet::new();
    let cols = ((bbox.width() / quadrat_width).ceil() as usize).max(1);
    let rows = ((bbox.height() / quadrat_width).ceil() as usize).max(1);
    for row in 0..rows {
        cancel.check()?;
        for col in 0..cols {
            let min = Coord {
                x: bbox.min().x + col as f64 * quadrat_width,
                y: bbox.min().y + row as f64 * quadrat_width,
            };
            let quadrat = Rect::new(
                min,
                Coord { x: min.x + quadrat_width, y: min.y + quadrat_width },
            );
            if segment_index.query(&quadrat).next().is_some() {
                marked.extend(cell_index.query(&quadrat));
            }
        }
    }

    let mut marked: Vec<usize> = marked.into_iter().collect();
    marked.sort_unstable();
    for i in marked {
        cancel.check()?;
        let clipped = groups[i].1.intersection(study_area);
        groups[i].1 = clipped;
    }
    Ok(())
}

/// Patch parts of the study extent no cell reached. Cells whose generating
/// regions were unbounded get discarded by the Voronoi walk, which can
/// leave slivers and corner wedges of the extent uncovered; each such part
/// is voted into the neighboring building with the longest shared boundary,
/// tie-broken by smallest building id.
fn repair_coverage(
    groups: &mut [(UniqueId, MultiPolygon<f64>)],
    study_area: &MultiPolygon<f64>,
    diagnostics: &mut Diagnostics,
    cancel: &CancelToken,
) -> Result<()> {
    let all: Vec<Polygon<f64>> = groups
        .iter()
        .flat_map(|(_, mp)| mp.0.iter().cloned())
        .collect();
    let covered = dissolve(&all);
    let remainder = study_area.difference(&covered);
    if remainder.0.is_empty() {
        return Ok(());
    }

    let index = BoxIndex::bulk(
        groups
            .iter()
            .enumerate()
            .filter_map(|(i, (_, mp))| mp.bounding_rect().map(|r| (i, r))),
    );
    for part in ordered_parts(remainder) {
        cancel.check()?;
        if part.unsigned_area() <= f64::EPSILON {
            continue;
        }
        let Some(rect) = part.bounding_rect() else { continue };
        let part_multi = MultiPolygon(vec![part]);
        let mut candidates: Vec<usize> = index.query(&rect).collect();
        candidates.sort_unstable();

        let mut best: Option<(f64, usize)> = None;
        for i in candidates {
            let share = shared_boundary_length(&part_multi, &groups[i].1);
            if share <= 0.0 {
                continue;
            }
            best = match best {
                None => Some((share, i)),
                Some((best_share, best_i)) => {
                    if (share - best_share).abs() <= 1e-9 {
                        if groups[i].0 < groups[best_i].0 {
                            Some((share, i))
                        } else {
                            Some((best_share, best_i))
                        }
                    } else if share > best_share {
                        Some((share, i))
                    } else {
                        Some((best_share, best_i))
                    }
                }
            };
        }
        match best {
            Some((_, i)) => groups[i].1 = groups[i].1.union(&part_multi),
            None => diagnostics.unjoined_cells_dropped += 1,
        }
    }
    Ok(())
}

/// Build the morphological tessellation of `buildings`.
///
/// Returns one cell per assigned building; buildings that produced no cell
/// are reported in the diagnostics, not silently dropped.
pub fn build(
    buildings: &BuildingLayer,
    params: &TessellationParams,
    cancel: &CancelToken,
) -> Result<(Tessellation, Diagnostics)> {
    validate(buildings)?;
    let mut diagnostics = Diagnostics::default();

    if params.verbose > 0 {
        eprintln!("[tessellation] preparing {} footprints", buildings.len());
    }
    let prepared = prepare(buildings, params)?;
    diagnostics.collapsed_offsets = prepared.collapsed.clone();

    let sites = generate_sites(buildings, &prepared, params.segment_spacing);
    if params.verbose > 0 {
        eprintln!("[tessellation] voronoi over {} sites", sites.len());
    }
    cancel.check()?;
    let cells = voronoi::bounded_cells(&sites)?;

    let mut joined: AHashMap<UniqueId, Vec<Polygon<f64>>> = AHashMap::new();
    let mut unjoined: Vec<Polygon<f64>> = Vec::new();
    for VoronoiCell { polygon, owner } in cells {
        match owner {
            Some(id) => joined.entry(id).or_default().push(polygon),
            None => unjoined.push(polygon),
        }
    }
    if params.verbose > 0 {
        eprintln!(
            "[tessellation] joined {} buildings, {} cells unjoined",
            joined.len(),
            unjoined.len()
        );
    }
    resolve_unjoined(&mut joined, unjoined, &mut diagnostics, cancel)?;

    // Dissolve fragments per building, in input order for determinism.
    let mut groups: Vec<(UniqueId, MultiPolygon<f64>)> = Vec::with_capacity(joined.len());
    for building in &buildings.buildings {
        if let Some(polys) = joined.remove(&building.id) {
            groups.push((building.id, dissolve(&polys)));
        }
    }

    if params.verbose > 0 {
        eprintln!("[tessellation] clipping {} cells to the study extent", groups.len());
    }
    clip_to_extent(&mut groups, &prepared.study_area, params.quadrat_width, cancel)?;
    repair_coverage(&mut groups, &prepared.study_area, &mut diagnostics, cancel)?;

    let mut by_id: AHashMap<UniqueId, Polygon<f64>> = AHashMap::with_capacity(groups.len());
    for (id, mp) in groups {
        match largest_part(mp) {
            Some(poly) if poly.unsigned_area() > f64::EPSILON => {
                by_id.insert(id, poly);
            }
            _ => diagnostics.degenerate_cells.push(id),
        }
    }

    let mut cells = Vec::with_capacity(by_id.len());
    for building in &buildings.buildings {
        match by_id.remove(&building.id) {
            Some(polygon) => cells.push(Cell::new(building.id, polygon)),
            None => {
                if !diagnostics.degenerate_cells.contains(&building.id) {
                    diagnostics.unassigned_buildings.push(building.id);
                }
            }
        }
    }
    if params.verbose > 0 && !diagnostics.unassigned_buildings.is_empty() {
        eprintln!(
            "[tessellation] warning: {} buildings produced no cell",
            diagnostics.unassigned_buildings.len()
        );
    }

    Ok((Tessellation { crs: buildings.crs.clone(), cells }, diagnostics))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::Building;
    use crate::types::Crs;
    use geo::polygon;

    fn square(cx: f64, cy: f64, half: f64) -> Polygon<f64> {
        polygon![
            (x: cx - half, y: cy - half),
            (x: cx + half, y: cy - half),
            (x: cx + half, y: cy + half),
            (x: cx - half, y: cy + half),
        ]
    }

    fn layer(buildings: Vec<Building>) -> BuildingLayer {
        BuildingLayer::new(Crs::new("EPSG:3857"), buildings)
    }

    #[test]
    fn one_cell_per_building() {
        let buildings = layer(vec![
            Building::new(UniqueId(1), square(0.0, 0.0, 2.0)),
            Building::new(UniqueId(2), square(12.0, 0.0, 2.0)),
            Building::new(UniqueId(3), square(0.0, 12.0, 2.0)),
        ]);
        let params = TessellationParams { edge_buffer: 10.0, ..Default::default() };
        let (tess, diagnostics) = build(&buildings, &params, &CancelToken::new()).unwrap();
        assert_eq!(tess.len(), 3);
        assert!(diagnostics.unassigned_buildings.is_empty());
        let ids: Vec<UniqueId> = tess.cells.iter().map(|c| c.building_id).collect();
        assert_eq!(ids, vec![UniqueId(1), UniqueId(2), UniqueId(3)]);
    }

    #[test]
    fn cells_partition_the_study_extent() {
        let buildings = layer(vec![
            Building::new(UniqueId(1), square(0.0, 0.0, 2.0)),
            Building::new(UniqueId(2), square(10.0, 0.0, 2.0)),
        ]);
        let params = TessellationParams { edge_buffer: 8.0, ..Default::default() };
        let (tess, _) = build(&buildings, &params, &CancelToken::new()).unwrap();

        let union = dissolve(&tess.cells.iter().map(|c| c.polygon.clone()).collect::<Vec<_>>());
        let sum: f64 = tess.cells.iter().map(|c| c.polygon.unsigned_area()).sum();
        // pairwise overlap is ~0 when the union area equals the area sum
        assert!((union.unsigned_area() - sum).abs() / sum < 1e-6);

        let extent = study_extent(&buildings, &params).unwrap();
        assert!((union.unsigned_area() - extent.unsigned_area()).abs() / extent.unsigned_area() < 1e-3);
        // nothing of the extent is left unassigned, corner wedges included
        let leftover = extent.difference(&union);
        assert!(leftover.unsigned_area() / extent.unsigned_area() < 1e-6);
    }

    #[test]
    fn duplicate_ids_are_fatal() {
        let buildings = layer(vec![
            Building::new(UniqueId(1), square(0.0, 0.0, 2.0)),
            Building::new(UniqueId(1), square(10.0, 0.0, 2.0)),
        ]);
        let result = build(&buildings, &TessellationParams::default(), &CancelToken::new());
        assert!(result.is_err());
    }

    #[test]
    fn empty_layer_is_fatal() {
        let buildings = layer(vec![]);
        assert!(build(&buildings, &TessellationParams::default(), &CancelToken::new()).is_err());
    }

    #[test]
    fn tiny_footprint_falls_back_to_unshrunk_boundary() {
        let buildings = layer(vec![
            Building::new(UniqueId(1), square(0.0, 0.0, 0.4)), // collapses under -0.5
            Building::new(UniqueId(2), square(10.0, 0.0, 2.0)),
        ]);
        let params = TessellationParams { edge_buffer: 8.0, ..Default::default() };
        let (tess, diagnostics) = build(&buildings, &params, &CancelToken::new()).unwrap();
        assert_eq!(tess.len(), 2);
        assert_eq!(diagnostics.collapsed_offsets, vec![UniqueId(1)]);
    }

    #[test]
    fn cancellation_aborts_the_stage() {
        let buildings = layer(vec![
            Building::new(UniqueId(1), square(0.0, 0.0, 2.0)),
            Building::new(UniqueId(2), square(10.0, 0.0, 2.0)),
        ]);
        let cancel = CancelToken::new();
        cancel.cancel();
        assert!(build(&buildings, &TessellationParams::default(), &cancel).is_err());
    }
}
