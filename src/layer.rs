use ahash::AHashMap;
use geo::{LineString, Polygon};

use crate::types::{BlockId, Crs, EdgeId, NetworkId, UniqueId};

/// A building footprint. Source of truth for the whole pipeline; the
/// geometry is immutable once loaded. Only the derived assignments
/// (`block_id`, `edge_id`, `network_id`) are filled in by later stages,
/// each exactly once.
#[derive(Clone, Debug)]
pub struct Building {
    pub id: UniqueId,
    pub footprint: Polygon<f64>,
    pub block_id: Option<BlockId>,
    pub edge_id: Option<EdgeId>,
    pub network_id: Option<NetworkId>,
}

impl Building {
    pub fn new(id: UniqueId, footprint: Polygon<f64>) -> Self {
        Self { id, footprint, block_id: None, edge_id: None, network_id: None }
    }
}

#[derive(Clone, Debug)]
pub struct BuildingLayer {
    pub crs: Crs,
    pub buildings: Vec<Building>,
}

impl BuildingLayer {
    pub fn new(crs: Crs, buildings: Vec<Building>) -> Self {
        Self { crs, buildings }
    }

    pub fn len(&self) -> usize {
        self.buildings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buildings.is_empty()
    }

    /// Map from building id to position in `buildings`.
    pub fn index_by_id(&self) -> AHashMap<UniqueId, usize> {
        self.buildings.iter().enumerate().map(|(i, b)| (b.id, i)).collect()
    }
}

/// One street network segment. Topology repair replaces the polyline of a
/// segment with an extended one under the same `NetworkId`; names are
/// carried through untouched.
#[derive(Clone, Debug)]
pub struct StreetSegment {
    pub id: NetworkId,
    pub name: Option<String>,
    pub line: LineString<f64>,
}

#[derive(Clone, Debug)]
pub struct StreetLayer {
    pub crs: Crs,
    pub segments: Vec<StreetSegment>,
}

impl StreetLayer {
    pub fn new(crs: Crs, segments: Vec<StreetSegment>) -> Self {
        Self { crs, segments }
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

/// A morphological tessellation cell: the region of the study area closer
/// to its building than to any other. Exactly one cell per assigned
/// building.
#[derive(Clone, Debug)]
pub struct Cell {
    pub building_id: UniqueId,
    pub polygon: Polygon<f64>,
    pub block_id: Option<BlockId>,
    pub edge_id: Option<EdgeId>,
    pub network_id: Option<NetworkId>,
}

impl Cell {
    pub fn new(building_id: UniqueId, polygon: Polygon<f64>) -> Self {
        Self { building_id, polygon, block_id: None, edge_id: None, network_id: None }
    }
}

#[derive(Clone, Debug)]
pub struct Tessellation {
    pub crs: Crs,
    pub cells: Vec<Cell>,
}

impl Tessellation {
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Map from building id to cell position.
    pub fn index_by_building(&self) -> AHashMap<UniqueId, usize> {
        self.cells.iter().enumerate().map(|(i, c)| (c.building_id, i)).collect()
    }
}

/// A street-bounded block, dissolved from tessellation cells sharing a
/// block id. Holes are removed; only the outer boundary is kept.
#[derive(Clone, Debug)]
pub struct Block {
    pub id: BlockId,
    pub polygon: Polygon<f64>,
}

#[derive(Clone, Debug)]
pub struct BlockLayer {
    pub crs: Crs,
    pub blocks: Vec<Block>,
}

impl BlockLayer {
    pub fn new(crs: Crs, blocks: Vec<Block>) -> Self {
        Self { crs, blocks }
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

/// A street edge: cells of one block facing the same named street,
/// dissolved into a single polygon.
#[derive(Clone, Debug)]
pub struct Edge {
    pub id: EdgeId,
    pub block_id: BlockId,
    pub polygon: Polygon<f64>,
}

#[derive(Clone, Debug)]
pub struct EdgeLayer {
    pub crs: Crs,
    pub edges: Vec<Edge>,
}

impl EdgeLayer {
    pub fn new(crs: Crs, edges: Vec<Edge>) -> Self {
        Self { crs, edges }
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}
