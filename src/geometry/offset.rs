//! Mitred-join polygon offsetting and square-cap line buffering.
//!
//! The tessellation shrinks footprints inward to resolve shared walls, the
//! study extent grows them outward, and the block delineator buffers street
//! polylines into a corridor polygon. All three reduce to offsetting ring
//! edges along their outward normal and joining neighbors with a mitre.

use geo::{Area, Coord, LineString, MultiPolygon, Polygon};

use super::{dissolve, distance, signed_ring_area};

/// Mitre joins longer than `MITRE_LIMIT * |distance|` are bevelled instead.
const MITRE_LIMIT: f64 = 5.0;

/// Offset a closed ring by `distance` along its outward normal (positive
/// grows the enclosed region). Returns `None` when the ring collapses or
/// the result is numerically unusable.
fn offset_ring(ring: &LineString<f64>, offset: f64) -> Option<LineString<f64>> {
    // Work on an open CCW coordinate list.
    let mut coords: Vec<Coord<f64>> = ring.0.clone();
    if coords.len() >= 2 && coords.first() == coords.last() {
        coords.pop();
    }
    // Drop consecutive duplicates; they carry no direction.
    coords.dedup();
    if coords.len() < 3 {
        return None;
    }
    let mut closed = coords.clone();
    closed.push(coords[0]);
    if signed_ring_area(&closed) < 0.0 {
        coords.reverse();
    }

    let n = coords.len();
    // Offset copy of every edge: (start, end) shifted by the outward normal.
    let mut edges: Vec<(Coord<f64>, Coord<f64>)> = Vec::with_capacity(n);
    for i in 0..n {
        let a = coords[i];
        let b = coords[(i + 1) % n];
        let len = distance(a, b);
        if len <= f64::EPSILON {
            continue;
        }
        // Outward normal of a CCW ring edge.
        let nx = (b.y - a.y) / len;
        let ny = -(b.x - a.x) / len;
        edges.push((
            Coord { x: a.x + nx * offset, y: a.y + ny * offset },
            Coord { x: b.x + nx * offset, y: b.y + ny * offset },
        ));
    }
    if edges.len() < 3 {
        return None;
    }

    // Join consecutive offset edges with a mitre (intersection of the two
    // infinite offset lines), bevelling when the mitre shoots too far.
    // `joins[i]` keeps the first and last point emitted for the join of
    // edges i and i+1, bracketing each edge's surviving portion.
    let m = edges.len();
    let mut out: Vec<Coord<f64>> = Vec::with_capacity(m + 1);
    let mut joins: Vec<(Coord<f64>, Coord<f64>)> = Vec::with_capacity(m);
    for i in 0..m {
        let (a1, b1) = edges[i];
        let (a2, b2) = edges[(i + 1) % m];
        let u = Coord { x: b1.x - a1.x, y: b1.y - a1.y };
        let v = Coord { x: b2.x - a2.x, y: b2.y - a2.y };
        let denom = u.x * v.y - u.y * v.x;
        if denom.abs() < 1e-12 {
            // Parallel edges: the offset endpoints coincide (or nearly do).
            out.push(b1);
            joins.push((b1, b1));
            continue;
        }
        let w = Coord { x: a2.x - a1.x, y: a2.y - a1.y };
        let t = (w.x * v.y - w.y * v.x) / denom;
        let mitre = Coord { x: a1.x + t * u.x, y: a1.y + t * u.y };
        if distance(mitre, b1) > MITRE_LIMIT * offset.abs() {
            out.push(b1);
            out.push(a2);
            joins.push((b1, a2));
        } else {
            out.push(mitre);
            joins.push((mitre, mitre));
        }
    }
    if out.iter().any(|c| !c.x.is_finite() || !c.y.is_finite()) {
        return None;
    }
    // An over-shrunk ring inverts through a point reflection, which keeps
    // the winding, so the signed area alone cannot see it. But inversion
    // flips every surviving edge against its source direction.
    for i in 0..m {
        let (a, b) = edges[i];
        let from = joins[(i + m - 1) % m].1;
        let to = joins[i].0;
        if (to.x - from.x) * (b.x - a.x) + (to.y - from.y) * (b.y - a.y) < 0.0 {
            return None;
        }
    }
    out.push(out[0]);
    if signed_ring_area(&out) <= 0.0 {
        return None; // collapsed under a shrink
    }
    Some(LineString(out))
}

/// Offset a polygon by `distance`: positive grows the solid, negative
/// shrinks it. Exterior and holes move in opposite senses; holes that
/// collapse are dropped, a collapsed exterior yields `None`.
///
/// Square-cap, mitred-join semantics. Strongly non-convex rings shrunk by
/// large distances can self-intersect; callers treat a degenerate result
/// (no area, or shrink gaining area) as a dropped geometry.
pub fn offset_polygon(poly: &Polygon<f64>, offset: f64) -> Option<Polygon<f64>> {
    let exterior = offset_ring(poly.exterior(), offset)?;
    let holes: Vec<LineString<f64>> = poly
        .interiors()
        .iter()
        .filter_map(|hole| offset_ring(hole, -offset))
        .collect();
    let result = Polygon::new(exterior, holes);
    if offset < 0.0 && result.unsigned_area() >= poly.unsigned_area() {
        return None; // shrink inverted the ring
    }
    Some(result)
}

/// Buffer a polyline by `width` on both sides with square caps: one
/// rectangle per segment, extended by `width` past each endpoint, unioned
/// into a corridor.
pub fn buffer_line(line: &LineString<f64>, width: f64) -> MultiPolygon<f64> {
    let mut boxes: Vec<Polygon<f64>> = Vec::new();
    for seg in line.lines() {
        let (a, b) = (seg.start, seg.end);
        let len = distance(a, b);
        if len <= f64::EPSILON {
            continue;
        }
        let (ux, uy) = ((b.x - a.x) / len, (b.y - a.y) / len);
        let (nx, ny) = (uy, -ux);
        // Square caps: push both ends outward along the axis.
        let a = Coord { x: a.x - ux * width, y: a.y - uy * width };
        let b = Coord { x: b.x + ux * width, y: b.y + uy * width };
        boxes.push(Polygon::new(
            LineString(vec![
                Coord { x: a.x + nx * width, y: a.y + ny * width },
                Coord { x: b.x + nx * width, y: b.y + ny * width },
                Coord { x: b.x - nx * width, y: b.y - ny * width },
                Coord { x: a.x - nx * width, y: a.y - ny * width },
                Coord { x: a.x + nx * width, y: a.y + ny * width },
            ]),
            vec![],
        ));
    }
    dissolve(&boxes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::polygon;

    #[test]
    fn shrink_square_by_half() {
        let square = polygon![
            (x: 0.0, y: 0.0), (x: 4.0, y: 0.0), (x: 4.0, y: 4.0), (x: 0.0, y: 4.0),
        ];
        let shrunk = offset_polygon(&square, -0.5).unwrap();
        assert!((shrunk.unsigned_area() - 9.0).abs() < 1e-9);
    }

    #[test]
    fn grow_square() {
        let square = polygon![
            (x: 0.0, y: 0.0), (x: 2.0, y: 0.0), (x: 2.0, y: 2.0), (x: 0.0, y: 2.0),
        ];
        let grown = offset_polygon(&square, 1.0).unwrap();
        // mitred square grows to 4x4
        assert!((grown.unsigned_area() - 16.0).abs() < 1e-9);
    }

    #[test]
    fn over_shrink_collapses() {
        let square = polygon![
            (x: 0.0, y: 0.0), (x: 1.0, y: 0.0), (x: 1.0, y: 1.0), (x: 0.0, y: 1.0),
        ];
        assert!(offset_polygon(&square, -0.5).is_none());
        assert!(offset_polygon(&square, -2.0).is_none());
    }

    #[test]
    fn inverted_shrink_is_rejected() {
        // Shrinking past the incircle mirrors the ring through its center,
        // leaving a small CCW square that area checks alone would accept.
        let square = polygon![
            (x: 0.0, y: 0.0), (x: 0.8, y: 0.0), (x: 0.8, y: 0.8), (x: 0.0, y: 0.8),
        ];
        assert!(offset_polygon(&square, -0.5).is_none());
    }

    #[test]
    fn orientation_does_not_matter() {
        let cw = Polygon::new(
            LineString(vec![
                Coord { x: 0.0, y: 0.0 },
                Coord { x: 0.0, y: 4.0 },
                Coord { x: 4.0, y: 4.0 },
                Coord { x: 4.0, y: 0.0 },
                Coord { x: 0.0, y: 0.0 },
            ]),
            vec![],
        );
        let shrunk = offset_polygon(&cw, -1.0).unwrap();
        assert!((shrunk.unsigned_area() - 4.0).abs() < 1e-9);
    }

    #[test]
    fn line_buffer_covers_segment() {
        use geo::{Contains, Point};
        let line = LineString(vec![
            Coord { x: 0.0, y: 0.0 },
            Coord { x: 10.0, y: 0.0 },
        ]);
        let corridor = buffer_line(&line, 0.1);
        assert_eq!(corridor.0.len(), 1);
        assert!(corridor.contains(&Point::new(5.0, 0.0)));
        assert!(corridor.contains(&Point::new(5.0, 0.09)));
        assert!(!corridor.contains(&Point::new(5.0, 0.2)));
        // square cap extends past the endpoint
        assert!(corridor.contains(&Point::new(10.05, 0.0)));
    }

    #[test]
    fn bent_line_buffer_is_connected() {
        let line = LineString(vec![
            Coord { x: 0.0, y: 0.0 },
            Coord { x: 5.0, y: 0.0 },
            Coord { x: 5.0, y: 5.0 },
        ]);
        let corridor = buffer_line(&line, 0.1);
        assert_eq!(corridor.0.len(), 1);
    }
}
