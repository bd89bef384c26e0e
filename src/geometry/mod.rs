//! Pure geometric helpers shared by every pipeline stage.
//!
//! Everything here is a function of its inputs; no shared state. The
//! distance/projection math follows the standard parametric form, and the
//! dissolve is a balanced binary union so large groups stay tractable.

pub mod offset;

use anyhow::{Result, bail};
use geo::{
    Area, BooleanOps, BoundingRect, Coord, Line, LineString, MultiPolygon, Polygon, Rect,
};

/// Euclidean distance between two coordinates.
pub fn distance(a: Coord<f64>, b: Coord<f64>) -> f64 {
    (a.x - b.x).hypot(a.y - b.y)
}

/// Total length of a polyline.
pub fn line_length(line: &LineString<f64>) -> f64 {
    line.0.windows(2).map(|w| distance(w[0], w[1])).sum()
}

/// Sum of ring lengths of a polygon (exterior plus holes).
pub fn perimeter(poly: &Polygon<f64>) -> f64 {
    line_length(poly.exterior()) + poly.interiors().iter().map(line_length).sum::<f64>()
}

fn multi_perimeter(mp: &MultiPolygon<f64>) -> f64 {
    mp.0.iter().map(perimeter).sum()
}

/// Signed area of a coordinate ring; positive for CCW winding.
pub fn signed_ring_area(coords: &[Coord<f64>]) -> f64 {
    let mut a = 0.0;
    for w in coords.windows(2) {
        a += w[0].x * w[1].y - w[1].x * w[0].y;
    }
    a / 2.0
}

/// Insert vertices on every segment longer than `max_segment_length` so the
/// boundary carries points at most that far apart. Existing vertices are
/// kept unchanged.
pub fn densify_line(line: &LineString<f64>, max_segment_length: f64) -> LineString<f64> {
    assert!(max_segment_length > 0.0, "densify spacing must be positive");
    let mut out: Vec<Coord<f64>> = Vec::with_capacity(line.0.len());
    for w in line.0.windows(2) {
        let (a, b) = (w[0], w[1]);
        out.push(a);
        let len = distance(a, b);
        if len > max_segment_length {
            let pieces = (len / max_segment_length).ceil() as usize;
            for k in 1..pieces {
                let t = k as f64 / pieces as f64;
                out.push(Coord { x: a.x + t * (b.x - a.x), y: a.y + t * (b.y - a.y) });
            }
        }
    }
    if let Some(&last) = line.0.last() {
        out.push(last);
    }
    LineString(out)
}

/// Densify every ring of a polygon.
pub fn densify_polygon(poly: &Polygon<f64>, max_segment_length: f64) -> Polygon<f64> {
    Polygon::new(
        densify_line(poly.exterior(), max_segment_length),
        poly.interiors().iter().map(|r| densify_line(r, max_segment_length)).collect(),
    )
}

/// Decompose multi-part polygons into single parts, duplicating the
/// attribute value onto each part.
pub fn split_multipart<A: Clone>(
    items: impl IntoIterator<Item = (A, MultiPolygon<f64>)>,
) -> impl Iterator<Item = (A, Polygon<f64>)> {
    items
        .into_iter()
        .flat_map(|(attr, mp)| mp.0.into_iter().map(move |poly| (attr.clone(), poly)))
}

/// Closest point on a segment to `point`, and the distance to it. The
/// projection parameter is clamped to the segment's endpoints.
pub fn project_point_to_segment(point: Coord<f64>, segment: Line<f64>) -> (Coord<f64>, f64) {
    let (b, c) = (segment.start, segment.end);
    let len2 = (c.x - b.x).powi(2) + (c.y - b.y).powi(2);
    if len2 == 0.0 {
        return (b, distance(point, b));
    }
    let t = ((point.x - b.x) * (c.x - b.x) + (point.y - b.y) * (c.y - b.y)) / len2;
    let t = t.clamp(0.0, 1.0);
    let proj = Coord { x: b.x + t * (c.x - b.x), y: b.y + t * (c.y - b.y) };
    (proj, distance(point, proj))
}

/// Segment starting at `p2`, continuing in the direction `p1 -> p2`, of the
/// given length. Fails on a zero-length direction instead of dividing by
/// zero.
pub fn extrapolate(p1: Coord<f64>, p2: Coord<f64>, length: f64) -> Result<Line<f64>> {
    let d = distance(p1, p2);
    if d <= f64::EPSILON {
        bail!("degenerate geometry: cannot extrapolate from coincident points");
    }
    let (ux, uy) = ((p2.x - p1.x) / d, (p2.y - p1.y) / d);
    Ok(Line::new(p2, Coord { x: p2.x + ux * length, y: p2.y + uy * length }))
}

/// Largest-area part of a multi-polygon; the smaller parts of a clipped
/// cell are numerical artifacts.
pub fn largest_part(mp: MultiPolygon<f64>) -> Option<Polygon<f64>> {
    mp.0.into_iter()
        .max_by(|a, b| a.unsigned_area().total_cmp(&b.unsigned_area()))
}

/// Parts of a multi-polygon in envelope order, so numbering derived from
/// the order is stable across runs.
pub fn ordered_parts(mp: MultiPolygon<f64>) -> Vec<Polygon<f64>> {
    let mut parts: Vec<Polygon<f64>> = mp.0;
    parts.sort_by(|a, b| {
        match (a.bounding_rect(), b.bounding_rect()) {
            (Some(ra), Some(rb)) => ra
                .min()
                .x
                .total_cmp(&rb.min().x)
                .then(ra.min().y.total_cmp(&rb.min().y))
                .then(ra.max().x.total_cmp(&rb.max().x))
                .then(ra.max().y.total_cmp(&rb.max().y)),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        }
    });
    parts
}

/// Union a group of polygons into one multi-polygon via balanced pairwise
/// merging (n log n unions rather than a linear fold).
pub fn dissolve(polys: &[Polygon<f64>]) -> MultiPolygon<f64> {
    if polys.is_empty() {
        return MultiPolygon(vec![]);
    }
    let mut level: Vec<MultiPolygon<f64>> =
        polys.iter().map(|p| MultiPolygon(vec![p.clone()])).collect();
    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        let mut iter = level.into_iter();
        while let Some(a) = iter.next() {
            match iter.next() {
                Some(b) => next.push(a.union(&b)),
                None => next.push(a),
            }
        }
        level = next;
    }
    level.pop().unwrap_or_else(|| MultiPolygon(vec![]))
}

/// Length of the boundary shared by two multi-polygons, via the perimeter
/// identity: shared = (perim(a) + perim(b) - perim(a ∪ b)) / 2.
pub fn shared_boundary_length(a: &MultiPolygon<f64>, b: &MultiPolygon<f64>) -> f64 {
    let shared = (multi_perimeter(a) + multi_perimeter(b) - multi_perimeter(&a.union(b))) / 2.0;
    if shared > 1e-9 { shared } else { 0.0 }
}

/// All boundary segments of a multi-polygon (exterior and interior rings).
pub fn boundary_segments(mp: &MultiPolygon<f64>) -> Vec<Line<f64>> {
    let mut out = Vec::new();
    for poly in &mp.0 {
        for ring in std::iter::once(poly.exterior()).chain(poly.interiors()) {
            out.extend(ring.lines());
        }
    }
    out
}

/// Axis-aligned square of half-width `half` centered on `c`.
pub fn rect_around(c: Coord<f64>, half: f64) -> Rect<f64> {
    Rect::new(
        Coord { x: c.x - half, y: c.y - half },
        Coord { x: c.x + half, y: c.y + half },
    )
}

/// Bounding rectangle of a segment.
pub fn line_rect(line: Line<f64>) -> Rect<f64> {
    line.bounding_rect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::polygon;

    #[test]
    fn densify_keeps_existing_vertices_and_spacing() {
        let line = LineString(vec![
            Coord { x: 0.0, y: 0.0 },
            Coord { x: 10.0, y: 0.0 },
        ]);
        let dense = densify_line(&line, 2.0);
        assert_eq!(dense.0.first(), line.0.first());
        assert_eq!(dense.0.last(), line.0.last());
        assert_eq!(dense.0.len(), 6); // 0, 2, 4, 6, 8, 10
        for w in dense.0.windows(2) {
            assert!(distance(w[0], w[1]) <= 2.0 + 1e-12);
        }
    }

    #[test]
    fn densify_leaves_short_segments_alone() {
        let line = LineString(vec![
            Coord { x: 0.0, y: 0.0 },
            Coord { x: 1.0, y: 1.0 },
        ]);
        assert_eq!(densify_line(&line, 2.0).0.len(), 2);
    }

    #[test]
    fn projection_interior_and_clamped() {
        let seg = Line::new(Coord { x: 0.0, y: 0.0 }, Coord { x: 10.0, y: 0.0 });
        let (p, d) = project_point_to_segment(Coord { x: 5.0, y: 3.0 }, seg);
        assert!((p.x - 5.0).abs() < 1e-12 && p.y.abs() < 1e-12);
        assert!((d - 3.0).abs() < 1e-12);

        // beyond the end: clamp to the endpoint
        let (p, d) = project_point_to_segment(Coord { x: 14.0, y: 3.0 }, seg);
        assert_eq!(p, Coord { x: 10.0, y: 0.0 });
        assert!((d - 5.0).abs() < 1e-12);
    }

    #[test]
    fn extrapolation_has_exact_length_and_direction() {
        let line = extrapolate(
            Coord { x: 0.0, y: 0.0 },
            Coord { x: 3.0, y: 4.0 },
            10.0,
        )
        .unwrap();
        assert_eq!(line.start, Coord { x: 3.0, y: 4.0 });
        assert!((distance(line.start, line.end) - 10.0).abs() < 1e-9);
        // collinear with p1 -> p2
        let cross = 3.0 * (line.end.y - 4.0) - 4.0 * (line.end.x - 3.0);
        assert!(cross.abs() < 1e-9);
    }

    #[test]
    fn extrapolation_rejects_coincident_points() {
        let p = Coord { x: 1.0, y: 1.0 };
        assert!(extrapolate(p, p, 5.0).is_err());
    }

    #[test]
    fn split_multipart_duplicates_attributes() {
        let mp = MultiPolygon(vec![
            polygon![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0), (x: 1.0, y: 1.0)],
            polygon![(x: 5.0, y: 5.0), (x: 6.0, y: 5.0), (x: 6.0, y: 6.0)],
        ]);
        let parts: Vec<(&str, Polygon<f64>)> = split_multipart(vec![("a", mp)]).collect();
        assert_eq!(parts.len(), 2);
        assert!(parts.iter().all(|(attr, _)| *attr == "a"));
    }

    #[test]
    fn dissolve_is_idempotent() {
        let a = polygon![(x: 0.0, y: 0.0), (x: 2.0, y: 0.0), (x: 2.0, y: 2.0), (x: 0.0, y: 2.0)];
        let b = polygon![(x: 2.0, y: 0.0), (x: 4.0, y: 0.0), (x: 4.0, y: 2.0), (x: 2.0, y: 2.0)];
        let once = dissolve(&[a, b]);
        let twice = dissolve(&once.0);
        assert_eq!(once.0.len(), twice.0.len());
        assert!((once.unsigned_area() - twice.unsigned_area()).abs() < 1e-9);
        assert!((once.unsigned_area() - 8.0).abs() < 1e-9);
    }

    #[test]
    fn shared_boundary_of_adjacent_squares() {
        let a = MultiPolygon(vec![
            polygon![(x: 0.0, y: 0.0), (x: 2.0, y: 0.0), (x: 2.0, y: 2.0), (x: 0.0, y: 2.0)],
        ]);
        let b = MultiPolygon(vec![
            polygon![(x: 2.0, y: 0.0), (x: 4.0, y: 0.0), (x: 4.0, y: 2.0), (x: 2.0, y: 2.0)],
        ]);
        assert!((shared_boundary_length(&a, &b) - 2.0).abs() < 1e-6);

        let far = MultiPolygon(vec![
            polygon![(x: 10.0, y: 0.0), (x: 12.0, y: 0.0), (x: 12.0, y: 2.0), (x: 10.0, y: 2.0)],
        ]);
        assert_eq!(shared_boundary_length(&a, &far), 0.0);
    }

    #[test]
    fn largest_part_picks_by_area() {
        let small = polygon![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0), (x: 1.0, y: 1.0), (x: 0.0, y: 1.0)];
        let big = polygon![(x: 5.0, y: 5.0), (x: 9.0, y: 5.0), (x: 9.0, y: 9.0), (x: 5.0, y: 9.0)];
        let picked = largest_part(MultiPolygon(vec![small, big.clone()])).unwrap();
        assert!((picked.unsigned_area() - big.unsigned_area()).abs() < 1e-12);
    }
}
