//! End-to-end derivation of morphological elements from raw buildings and
//! streets.
//!
//! The stages run in a fixed order because each consumes the previous
//! one's output: tessellation, then network repair against the built-up
//! boundary, then blocks, then edges. Diagnostics accumulate across
//! stages; none of the recoverable conditions abort the run.

use anyhow::Result;

use crate::blocks::{self, BlockParams};
use crate::cancel::CancelToken;
use crate::diagnostics::Diagnostics;
use crate::edges::{self, EdgeParams};
use crate::layer::{BlockLayer, BuildingLayer, EdgeLayer, StreetLayer, Tessellation};
use crate::network::{self, SnapParams};
use crate::tessellation::{self, TessellationParams};

/// Per-stage tunables of the full pipeline.
#[derive(Clone, Debug, Default)]
pub struct PipelineParams {
    pub tessellation: TessellationParams,
    pub snap: SnapParams,
    pub blocks: BlockParams,
    pub edges: EdgeParams,
}

impl PipelineParams {
    /// Propagate one verbosity level to every stage.
    pub fn with_verbose(mut self, verbose: u8) -> Self {
        self.tessellation.verbose = verbose;
        self.snap.verbose = verbose;
        self.blocks.verbose = verbose;
        self.edges.verbose = verbose;
        self
    }
}

/// Everything the pipeline produces. Buildings come back with their
/// derived assignments filled in; streets come back topologically
/// repaired.
#[derive(Clone, Debug)]
pub struct DerivedElements {
    pub buildings: BuildingLayer,
    pub streets: StreetLayer,
    pub tessellation: Tessellation,
    pub blocks: BlockLayer,
    pub edges: EdgeLayer,
    pub diagnostics: Diagnostics,
}

/// Run the four stages over a building and street layer.
pub fn generate_elements(
    mut buildings: BuildingLayer,
    streets: StreetLayer,
    params: &PipelineParams,
    cancel: &CancelToken,
) -> Result<DerivedElements> {
    buildings.crs.ensure_matches(&streets.crs)?;
    let mut diagnostics = Diagnostics::default();

    let (mut tessellation, stage) =
        tessellation::build(&buildings, &params.tessellation, cancel)?;
    diagnostics.merge(stage);

    let (streets, stage) =
        network::repair(&streets, &buildings, &tessellation, &params.snap, cancel)?;
    diagnostics.merge(stage);

    let (blocks, stage) =
        blocks::delineate(&mut tessellation, &mut buildings, &streets, &params.blocks, cancel)?;
    diagnostics.merge(stage);

    let (edges, stage) =
        edges::segment(&mut tessellation, &mut buildings, &streets, &params.edges, cancel)?;
    diagnostics.merge(stage);

    Ok(DerivedElements { buildings, streets, tessellation, blocks, edges, diagnostics })
}
