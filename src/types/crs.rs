use std::fmt;
use std::sync::Arc;

use anyhow::{Result, bail};

/// Coordinate reference system carried explicitly by every geometry layer.
///
/// Keep the original authority text (e.g. "EPSG:5514") but avoid repeated
/// owned Strings. The pipeline never reprojects; it only asserts that layers
/// being joined agree.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Crs(Arc<str>);

impl Crs {
    pub fn new(definition: &str) -> Self {
        Self(Arc::from(definition))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Fail if `other` is a different reference system. Called at every
    /// join/merge between layers instead of inferring the CRS positionally.
    pub fn ensure_matches(&self, other: &Crs) -> Result<()> {
        if self != other {
            bail!("coordinate reference mismatch: {} vs {}", self.0, other.0);
        }
        Ok(())
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
