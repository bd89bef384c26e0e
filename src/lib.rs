#![doc = "Morphological element generation: tessellation, blocks, and street edges from building footprints and street networks"]
mod blocks;
mod cancel;
mod diagnostics;
mod edges;
mod geometry;
mod index;
mod layer;
mod network;
mod pipeline;
mod tessellation;
mod types;

pub mod io;

#[doc(inline)]
pub use layer::{
    Block, BlockLayer, Building, BuildingLayer, Cell, Edge, EdgeLayer, StreetLayer,
    StreetSegment, Tessellation,
};

#[doc(inline)]
pub use types::{BlockId, Crs, EdgeId, NetworkId, UniqueId};

#[doc(inline)]
pub use pipeline::{DerivedElements, PipelineParams, generate_elements};

#[doc(inline)]
pub use blocks::{BlockParams, delineate};

#[doc(inline)]
pub use edges::{EdgeParams, UNNAMED_STREET, segment};

#[doc(inline)]
pub use network::{SnapParams, repair};

#[doc(inline)]
pub use tessellation::{TessellationParams, build, study_extent};

#[doc(inline)]
pub use cancel::CancelToken;

#[doc(inline)]
pub use diagnostics::Diagnostics;
