//! Street-network topology repair: closes dangling segment endpoints by
//! directional extrapolation.
//!
//! Segments are processed in input order and extensions are written back
//! immediately, so a later segment's connectivity test observes every
//! earlier segment's finished extension. The spatial index keeps the
//! original envelopes; exact tests always run against the live geometry.

use anyhow::{Result, bail};
use geo::line_intersection::{LineIntersection, line_intersection};
use geo::{BoundingRect, Coord, Intersects, Line, LineString, Point};
use smallvec::SmallVec;

use crate::cancel::CancelToken;
use crate::diagnostics::Diagnostics;
use crate::geometry::{boundary_segments, dissolve, distance, extrapolate, line_rect};
use crate::index::BoxIndex;
use crate::layer::{BuildingLayer, StreetLayer, StreetSegment, Tessellation};

/// Tunables of the network repairer.
#[derive(Clone, Debug)]
pub struct SnapParams {
    /// Probe length for closing a gap against another street segment.
    pub tolerance_street: f64,
    /// Probe length for the fallback against the tessellation boundary.
    pub tolerance_edge: f64,
    pub verbose: u8,
}

impl Default for SnapParams {
    fn default() -> Self {
        Self { tolerance_street: 20.0, tolerance_edge: 70.0, verbose: 0 }
    }
}

/// Endpoints closer than this are treated as coincident when choosing the
/// extrapolation direction.
const COINCIDENT_TOLERANCE: f64 = 1e-3;

enum Extension {
    Extended(Coord<f64>),
    RejectedByBuilding,
    NoCandidate,
}

/// Candidate intersection points between a probe and a set of segments,
/// nearest-first and deterministic under ties.
fn probe_hits(probe: Line<f64>, segments: impl Iterator<Item = Line<f64>>) -> Vec<Coord<f64>> {
    let mut hits: SmallVec<[Coord<f64>; 8]> = SmallVec::new();
    for seg in segments {
        match line_intersection(probe, seg) {
            Some(LineIntersection::SinglePoint { intersection, .. }) => hits.push(intersection),
            Some(LineIntersection::Collinear { intersection }) => {
                hits.push(intersection.start);
                hits.push(intersection.end);
            }
            None => {}
        }
    }
    let origin = probe.start;
    let mut hits: Vec<Coord<f64>> = hits.into_vec();
    hits.sort_by(|a, b| {
        distance(origin, *a)
            .total_cmp(&distance(origin, *b))
            .then(a.x.total_cmp(&b.x))
            .then(a.y.total_cmp(&b.y))
    });
    hits
}

/// The last two distinct coordinates of the polyline, used as the
/// extrapolation direction at its tail.
fn tail_direction(coords: &[Coord<f64>]) -> (Coord<f64>, Coord<f64>) {
    let n = coords.len();
    if n >= 3 && distance(coords[n - 2], coords[n - 1]) <= COINCIDENT_TOLERANCE {
        (coords[n - 3], coords[n - 2])
    } else {
        (coords[n - 2], coords[n - 1])
    }
}

struct Repairer<'a> {
    lines: Vec<LineString<f64>>,
    street_index: BoxIndex,
    buildings: &'a BuildingLayer,
    building_index: BoxIndex,
    boundary: Vec<Line<f64>>,
    boundary_index: BoxIndex,
    params: &'a SnapParams,
}

impl Repairer<'_> {
    /// True iff `point` lies on some other segment's current geometry.
    fn connected(&self, point: Coord<f64>, skip: usize) -> bool {
        self.street_index
            .query_point(point, COINCIDENT_TOLERANCE)
            .filter(|&j| j != skip)
            .any(|j| self.lines[j].intersects(&Point::from(point)))
    }

    /// Would appending `candidate` cross any building footprint?
    fn crosses_building(&self, endpoint: Coord<f64>, candidate: Coord<f64>) -> bool {
        let extension = Line::new(endpoint, candidate);
        self.building_index
            .query(&line_rect(extension))
            .any(|b| self.buildings.buildings[b].footprint.intersects(&extension))
    }

    /// Extend the tail of `coords` toward the nearest street intersection
    /// within `tolerance_street`, falling back to the tessellation boundary
    /// within `tolerance_edge`.
    fn extend_tail(&self, coords: &mut Vec<Coord<f64>>, skip: usize) -> Extension {
        let endpoint = coords[coords.len() - 1];
        let (p1, p2) = tail_direction(coords);

        // Street-to-street attempt.
        if let Ok(probe) = extrapolate(p1, p2, self.params.tolerance_street) {
            let candidates: SmallVec<[usize; 8]> = self
                .street_index
                .query(&line_rect(probe))
                .filter(|&j| j != skip)
                .collect();
            let hits = probe_hits(
                probe,
                candidates.iter().flat_map(|&j| self.lines[j].lines()),
            );
            if let Some(&hit) = hits.first() {
                if self.crosses_building(endpoint, hit) {
                    return Extension::RejectedByBuilding;
                }
                coords.push(hit);
                return Extension::Extended(hit);
            }
        }

        // Fallback: snap to the dissolved tessellation boundary.
        if let Ok(probe) = extrapolate(p1, p2, self.params.tolerance_edge) {
            let candidates: SmallVec<[usize; 8]> =
                self.boundary_index.query(&line_rect(probe)).collect();
            let hits = probe_hits(probe, candidates.iter().map(|&s| self.boundary[s]));
            if let Some(&hit) = hits.first() {
                if self.crosses_building(endpoint, hit) {
                    return Extension::RejectedByBuilding;
                }
                coords.push(hit);
                return Extension::Extended(hit);
            }
        }
        Extension::NoCandidate
    }
}

fn validate(streets: &StreetLayer) -> Result<()> {
    for segment in &streets.segments {
        if segment.line.0.len() < 2 {
            bail!("street segment {} has fewer than two points", segment.id);
        }
        if segment.line.0.iter().any(|c| !c.x.is_finite() || !c.y.is_finite()) {
            bail!("street segment {} has non-finite coordinates", segment.id);
        }
    }
    Ok(())
}

/// Close dangling endpoints of the street network. Returns a new layer
/// with extended polylines under the same segment ids; endpoints that
/// could not be closed are reported as a count, never an error.
pub fn repair(
    streets: &StreetLayer,
    buildings: &BuildingLayer,
    tessellation: &Tessellation,
    params: &SnapParams,
    cancel: &CancelToken,
) -> Result<(StreetLayer, Diagnostics)> {
    streets.crs.ensure_matches(&buildings.crs)?;
    streets.crs.ensure_matches(&tessellation.crs)?;
    validate(streets)?;
    let mut diagnostics = Diagnostics::default();

    let built_up = dissolve(
        &tessellation.cells.iter().map(|c| c.polygon.clone()).collect::<Vec<_>>(),
    );
    let boundary = boundary_segments(&built_up);

    let mut repairer = Repairer {
        lines: streets.segments.iter().map(|s| s.line.clone()).collect(),
        street_index: BoxIndex::bulk(
            streets
                .segments
                .iter()
                .enumerate()
                .filter_map(|(i, s)| s.line.bounding_rect().map(|r| (i, r))),
        ),
        buildings,
        building_index: BoxIndex::bulk(
            buildings
                .buildings
                .iter()
                .enumerate()
                .filter_map(|(i, b)| b.footprint.bounding_rect().map(|r| (i, r))),
        ),
        boundary_index: BoxIndex::bulk(
            boundary.iter().enumerate().map(|(i, l)| (i, line_rect(*l))),
        ),
        boundary,
        params,
    };

    if params.verbose > 0 {
        eprintln!("[network] snapping {} segments", repairer.lines.len());
    }

    for i in 0..repairer.lines.len() {
        cancel.check()?;
        let mut coords = repairer.lines[i].0.clone();
        let start_connected = repairer.connected(coords[0], i);
        let end_connected = repairer.connected(coords[coords.len() - 1], i);
        if start_connected && end_connected {
            continue;
        }

        let mut changed = false;
        let mut record = |outcome: Extension, diagnostics: &mut Diagnostics| match outcome {
            Extension::Extended(_) => true,
            Extension::RejectedByBuilding => {
                diagnostics.rejected_extensions.push(streets.segments[i].id);
                false
            }
            Extension::NoCandidate => {
                diagnostics.dangling_endpoints += 1;
                false
            }
        };

        // Start first, then end, over the possibly-already-extended list.
        if !start_connected {
            coords.reverse();
            let outcome = repairer.extend_tail(&mut coords, i);
            changed |= record(outcome, &mut diagnostics);
            coords.reverse();
        }
        if !end_connected {
            let outcome = repairer.extend_tail(&mut coords, i);
            changed |= record(outcome, &mut diagnostics);
        }
        if changed {
            repairer.lines[i] = LineString(coords);
        }
    }

    if params.verbose > 0 && diagnostics.dangling_endpoints > 0 {
        eprintln!(
            "[network] {} endpoints left dangling",
            diagnostics.dangling_endpoints
        );
    }

    let segments = streets
        .segments
        .iter()
        .zip(repairer.lines)
        .map(|(s, line)| StreetSegment { id: s.id, name: s.name.clone(), line })
        .collect();
    Ok((StreetLayer::new(streets.crs.clone(), segments), diagnostics))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::{Building, Cell};
    use crate::types::{Crs, NetworkId, UniqueId};
    use geo::polygon;

    fn crs() -> Crs {
        Crs::new("EPSG:3857")
    }

    fn segment(id: u64, coords: &[(f64, f64)]) -> StreetSegment {
        StreetSegment {
            id: NetworkId(id),
            name: None,
            line: LineString(coords.iter().map(|&(x, y)| Coord { x, y }).collect()),
        }
    }

    fn far_tessellation() -> Tessellation {
        Tessellation {
            crs: crs(),
            cells: vec![Cell::new(
                UniqueId(1),
                polygon![
                    (x: 1000.0, y: 1000.0),
                    (x: 1001.0, y: 1000.0),
                    (x: 1001.0, y: 1001.0),
                    (x: 1000.0, y: 1001.0),
                ],
            )],
        }
    }

    fn no_buildings() -> BuildingLayer {
        BuildingLayer::new(crs(), vec![])
    }

    #[test]
    fn gap_closes_against_another_street() {
        let streets = StreetLayer::new(
            crs(),
            vec![
                segment(1, &[(0.0, 0.0), (5.0, 0.0)]),
                segment(2, &[(6.0, -5.0), (6.0, 5.0)]),
            ],
        );
        let params = SnapParams { tolerance_street: 2.0, tolerance_edge: 2.0, verbose: 0 };
        let (repaired, diagnostics) =
            repair(&streets, &no_buildings(), &far_tessellation(), &params, &CancelToken::new())
                .unwrap();

        let last = *repaired.segments[0].line.0.last().unwrap();
        assert!((last.x - 6.0).abs() < 1e-9 && last.y.abs() < 1e-9);
        // segment 1 start plus both ends of segment 2 stay dangling
        assert_eq!(diagnostics.dangling_endpoints, 3);
    }

    #[test]
    fn extension_rejected_when_crossing_a_building() {
        let streets = StreetLayer::new(
            crs(),
            vec![
                segment(1, &[(0.0, 0.0), (5.0, 0.0)]),
                segment(2, &[(6.0, -5.0), (6.0, 5.0)]),
            ],
        );
        let blocker = BuildingLayer::new(
            crs(),
            vec![Building::new(
                UniqueId(9),
                polygon![
                    (x: 5.2, y: -0.3),
                    (x: 5.8, y: -0.3),
                    (x: 5.8, y: 0.3),
                    (x: 5.2, y: 0.3),
                ],
            )],
        );
        let params = SnapParams { tolerance_street: 2.0, tolerance_edge: 2.0, verbose: 0 };
        let (repaired, diagnostics) =
            repair(&streets, &blocker, &far_tessellation(), &params, &CancelToken::new()).unwrap();

        assert_eq!(repaired.segments[0].line.0.len(), 2); // unchanged
        assert!(diagnostics.rejected_extensions.contains(&NetworkId(1)));
    }

    #[test]
    fn connected_segments_are_untouched() {
        let streets = StreetLayer::new(
            crs(),
            vec![
                segment(1, &[(0.0, 0.0), (5.0, 0.0)]),
                segment(2, &[(5.0, 0.0), (5.0, 5.0)]),
                segment(3, &[(0.0, 0.0), (0.0, 5.0)]),
                segment(4, &[(0.0, 5.0), (5.0, 5.0)]),
            ],
        );
        let params = SnapParams::default();
        let (repaired, diagnostics) =
            repair(&streets, &no_buildings(), &far_tessellation(), &params, &CancelToken::new())
                .unwrap();
        for (before, after) in streets.segments.iter().zip(&repaired.segments) {
            assert_eq!(before.line.0, after.line.0);
        }
        assert_eq!(diagnostics.dangling_endpoints, 0);
    }

    #[test]
    fn fallback_snaps_to_tessellation_boundary() {
        let streets = StreetLayer::new(crs(), vec![segment(1, &[(0.0, 0.0), (5.0, 0.0)])]);
        // built-up area whose boundary sits at x = 5.5
        let tessellation = Tessellation {
            crs: crs(),
            cells: vec![Cell::new(
                UniqueId(1),
                polygon![
                    (x: -1.0, y: -3.0),
                    (x: 5.5, y: -3.0),
                    (x: 5.5, y: 3.0),
                    (x: -1.0, y: 3.0),
                ],
            )],
        };
        let params = SnapParams { tolerance_street: 2.0, tolerance_edge: 2.0, verbose: 0 };
        let (repaired, _) =
            repair(&streets, &no_buildings(), &tessellation, &params, &CancelToken::new()).unwrap();

        let last = *repaired.segments[0].line.0.last().unwrap();
        assert!((last.x - 5.5).abs() < 1e-9 && last.y.abs() < 1e-9);
    }
}
