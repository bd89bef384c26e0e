//! Finite-region extraction from a planar Voronoi diagram.
//!
//! Sites are inserted into a Delaunay triangulation (`spade`) and each
//! site's Voronoi face is polygonized from the circumcenters of its
//! adjacent Delaunay faces. Faces touching the unbounded hull are
//! discarded; the tessellation builder surrounds the buildings with hull
//! sites so every cell it cares about is finite.

use anyhow::{Result, anyhow};
use geo::{Area, Coord, LineString, Polygon};
use spade::handles::VoronoiVertex;
use spade::{DelaunayTriangulation, Point2, Triangulation};

use crate::types::UniqueId;

/// An input point of the Voronoi diagram. Points densified from a building
/// boundary carry that building's id; hull points carry none.
#[derive(Clone, Copy, Debug)]
pub struct Site {
    pub point: Coord<f64>,
    pub owner: Option<UniqueId>,
}

/// A finite Voronoi region, keyed by the site that generated it.
#[derive(Clone, Debug)]
pub struct VoronoiCell {
    pub polygon: Polygon<f64>,
    pub owner: Option<UniqueId>,
}

/// Compute all bounded Voronoi cells of `sites`. Cells with an unbounded
/// (infinite) edge are dropped, as are zero-area degenerates.
pub fn bounded_cells(sites: &[Site]) -> Result<Vec<VoronoiCell>> {
    let mut triangulation: DelaunayTriangulation<Point2<f64>> = DelaunayTriangulation::new();
    let mut owners: Vec<Option<UniqueId>> = Vec::with_capacity(sites.len());

    for site in sites {
        let handle = triangulation
            .insert(Point2::new(site.point.x, site.point.y))
            .map_err(|e| anyhow!("voronoi site insertion failed: {e:?}"))?;
        // Duplicate coordinates reuse the existing vertex; first owner wins.
        if handle.index() == owners.len() {
            owners.push(site.owner);
        }
    }

    let mut cells = Vec::new();
    for vertex in triangulation.vertices() {
        let owner = owners[vertex.fix().index()];
        let mut ring: Vec<Coord<f64>> = Vec::new();
        let mut bounded = true;
        for edge in vertex.as_voronoi_face().adjacent_edges() {
            match edge.from() {
                VoronoiVertex::Inner(face) => {
                    let c = face.circumcenter();
                    ring.push(Coord { x: c.x, y: c.y });
                }
                VoronoiVertex::Outer(_) => {
                    bounded = false;
                    break;
                }
            }
        }
        if !bounded || ring.len() < 3 {
            continue;
        }
        ring.push(ring[0]);
        let polygon = Polygon::new(LineString(ring), vec![]);
        if polygon.unsigned_area() <= f64::EPSILON {
            continue;
        }
        cells.push(VoronoiCell { polygon, owner });
    }
    Ok(cells)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_center_gets_a_unit_cell() {
        // 3x3 unit grid: only the center site has a bounded cell.
        let mut sites = Vec::new();
        for x in 0..3 {
            for y in 0..3 {
                let owner = (x == 1 && y == 1).then_some(UniqueId(42));
                sites.push(Site {
                    point: Coord { x: x as f64, y: y as f64 },
                    owner,
                });
            }
        }
        let cells = bounded_cells(&sites).unwrap();
        assert_eq!(cells.len(), 1);
        assert_eq!(cells[0].owner, Some(UniqueId(42)));
        assert!((cells[0].polygon.unsigned_area() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn duplicate_sites_keep_first_owner() {
        let mut sites = Vec::new();
        for x in 0..3 {
            for y in 0..3 {
                sites.push(Site {
                    point: Coord { x: x as f64, y: y as f64 },
                    owner: (x == 1 && y == 1).then_some(UniqueId(1)),
                });
            }
        }
        // same center point again with a different owner
        sites.push(Site { point: Coord { x: 1.0, y: 1.0 }, owner: Some(UniqueId(2)) });
        let cells = bounded_cells(&sites).unwrap();
        assert_eq!(cells.len(), 1);
        assert_eq!(cells[0].owner, Some(UniqueId(1)));
    }

    #[test]
    fn too_few_sites_yield_no_cells() {
        let sites = vec![
            Site { point: Coord { x: 0.0, y: 0.0 }, owner: None },
            Site { point: Coord { x: 1.0, y: 0.0 }, owner: None },
        ];
        assert!(bounded_cells(&sites).unwrap().is_empty());
    }
}
