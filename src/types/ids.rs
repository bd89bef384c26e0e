use std::fmt;

use serde::Serialize;

/// Generate a strongly-typed identifier wrapper around `u64`.
///
/// IDs are by-value keys shared across pipeline stages; output elements
/// reference input elements through these, never through pointers.
macro_rules! id_type {
    ($name:ident, $tag:literal) => {
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}{}", $tag, self.0)
            }
        }
    };
}

id_type!(UniqueId, "uID:");
id_type!(BlockId, "bID:");
id_type!(EdgeId, "eID:");
id_type!(NetworkId, "nID:");
