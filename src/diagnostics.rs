use serde::Serialize;

use crate::types::{NetworkId, UniqueId};

/// Per-stage report of everything that was recovered, skipped, or resolved
/// by a tie-break rather than failing the stage.
///
/// Fatal input problems abort a stage with an error before any output is
/// produced; everything here is non-fatal and left to the caller to act on
/// (typically by widening tolerances and re-running).
#[derive(Clone, Debug, Default, Serialize)]
pub struct Diagnostics {
    /// Buildings whose footprint produced no Voronoi cell at all.
    pub unassigned_buildings: Vec<UniqueId>,
    /// Buildings whose inward offset collapsed; the unshrunk footprint was
    /// used for point generation instead.
    pub collapsed_offsets: Vec<UniqueId>,
    /// Tessellation cells dropped because they ended up with zero area.
    pub degenerate_cells: Vec<UniqueId>,
    /// Voronoi cells that could not be attributed to any building, even by
    /// the neighbor-boundary vote, and were dropped.
    pub unjoined_cells_dropped: usize,
    /// Street segment endpoints left dangling after both the street and the
    /// tessellation-boundary extension failed.
    pub dangling_endpoints: usize,
    /// Segments whose accepted extension was rejected for crossing a
    /// building footprint.
    pub rejected_extensions: Vec<NetworkId>,
    /// Buildings whose centroid fell inside no block (street corridor).
    pub blockless_buildings: Vec<UniqueId>,
    /// Buildings with no street sub-segment inside the fixed search box.
    pub unmatched_streets: Vec<UniqueId>,
    /// Assignments that hit a tie and were resolved by the documented
    /// deterministic rule.
    pub ambiguous_assignments: usize,
}

impl Diagnostics {
    /// Fold another stage's report into this one.
    pub fn merge(&mut self, other: Diagnostics) {
        self.unassigned_buildings.extend(other.unassigned_buildings);
        self.collapsed_offsets.extend(other.collapsed_offsets);
        self.degenerate_cells.extend(other.degenerate_cells);
        self.unjoined_cells_dropped += other.unjoined_cells_dropped;
        self.dangling_endpoints += other.dangling_endpoints;
        self.rejected_extensions.extend(other.rejected_extensions);
        self.blockless_buildings.extend(other.blockless_buildings);
        self.unmatched_streets.extend(other.unmatched_streets);
        self.ambiguous_assignments += other.ambiguous_assignments;
    }

    /// True when every stage ran without recoveries or tie-breaks.
    pub fn is_clean(&self) -> bool {
        self.unassigned_buildings.is_empty()
            && self.collapsed_offsets.is_empty()
            && self.degenerate_cells.is_empty()
            && self.unjoined_cells_dropped == 0
            && self.dangling_endpoints == 0
            && self.rejected_extensions.is_empty()
            && self.blockless_buildings.is_empty()
            && self.unmatched_streets.is_empty()
            && self.ambiguous_assignments == 0
    }
}
