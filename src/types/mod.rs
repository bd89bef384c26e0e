mod crs;
mod ids;

pub use crs::Crs;
pub use ids::{BlockId, EdgeId, NetworkId, UniqueId};
