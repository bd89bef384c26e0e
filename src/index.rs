//! Bounding-box spatial index shared by every pipeline stage.
//!
//! Strategy: an R*-tree (`rstar`) bulk-loaded once per stage, giving
//! near-linear construction and cheap box queries. There is no linear-scan
//! fallback for small inputs; `rstar` already degrades gracefully there.
//! The index is never mutated after loading: stages that conceptually
//! replace geometries (network repair) keep the original envelopes and
//! re-test exact geometry against the live collection.

use geo::{Coord, Rect};
use rstar::{AABB, RTree, RTreeObject};

/// Entry of a [`BoxIndex`]: the position of the item in its source
/// collection plus its bounding rectangle.
#[derive(Clone, Debug)]
pub struct IndexedBox {
    idx: usize,
    bbox: Rect<f64>,
}

impl RTreeObject for IndexedBox {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners(self.bbox.min().into(), self.bbox.max().into())
    }
}

/// Box-range index over an external collection, addressed by position.
#[derive(Clone, Debug)]
pub struct BoxIndex {
    tree: RTree<IndexedBox>,
}

impl BoxIndex {
    /// Bulk load from `(position, bbox)` pairs.
    pub fn bulk(items: impl IntoIterator<Item = (usize, Rect<f64>)>) -> Self {
        Self {
            tree: RTree::bulk_load(
                items.into_iter().map(|(idx, bbox)| IndexedBox { idx, bbox }).collect(),
            ),
        }
    }

    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    /// Positions of all items whose bounding box intersects `rect`.
    pub fn query(&self, rect: &Rect<f64>) -> impl Iterator<Item = usize> + '_ {
        let search = AABB::from_corners(rect.min().into(), rect.max().into());
        self.tree.locate_in_envelope_intersecting(&search).map(|b| b.idx)
    }

    /// Positions of all items whose bounding box contains `point` (padded
    /// by `pad` to survive exact-touch cases).
    pub fn query_point(&self, point: Coord<f64>, pad: f64) -> impl Iterator<Item = usize> + '_ {
        let search = AABB::from_corners(
            [point.x - pad, point.y - pad],
            [point.x + pad, point.y + pad],
        );
        self.tree.locate_in_envelope_intersecting(&search).map(|b| b.idx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rect(x0: f64, y0: f64, x1: f64, y1: f64) -> Rect<f64> {
        Rect::new(Coord { x: x0, y: y0 }, Coord { x: x1, y: y1 })
    }

    #[test]
    fn query_returns_overlapping_boxes_only() {
        let index = BoxIndex::bulk(vec![
            (0, rect(0.0, 0.0, 1.0, 1.0)),
            (1, rect(5.0, 5.0, 6.0, 6.0)),
            (2, rect(0.5, 0.5, 2.0, 2.0)),
        ]);
        let mut hits: Vec<usize> = index.query(&rect(0.8, 0.8, 1.2, 1.2)).collect();
        hits.sort_unstable();
        assert_eq!(hits, vec![0, 2]);
    }

    #[test]
    fn point_query_hits_touching_boxes() {
        let index = BoxIndex::bulk(vec![(7, rect(0.0, 0.0, 1.0, 1.0))]);
        let hits: Vec<usize> = index.query_point(Coord { x: 1.0, y: 1.0 }, 1e-9).collect();
        assert_eq!(hits, vec![7]);
    }
}
