//! Structured chunk keys.

use std::fmt;
use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Identifier of a remote array (dataset path, URI, or a derived slice name).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ResourceId(Arc<str>);

impl ResourceId {
    /// Creates a resource identifier.
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    /// Returns the identifier text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Derive a child identifier, e.g. one unit's slice of a flat dataset.
    #[must_use]
    pub fn child(&self, suffix: impl fmt::Display) -> Self {
        Self::new(format!("{}/{suffix}", self.0))
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ResourceId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Identifies one fixed-size slice of a remote array.
///
/// `factor` is the downsample factor of the pre-aggregated array the chunk
/// belongs to (1 for full resolution).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ChunkKey {
    /// Remote array the chunk belongs to.
    pub resource: ResourceId,
    /// Downsample factor.
    pub factor: u32,
    /// Chunk index along the first dimension.
    pub index: u64,
}

impl ChunkKey {
    /// Creates a key for a chunk of the full-resolution array.
    pub fn new(resource: ResourceId, index: u64) -> Self {
        Self {
            resource,
            factor: 1,
            index,
        }
    }

    /// Creates a key for a chunk of a downsampled array.
    pub fn with_factor(resource: ResourceId, factor: u32, index: u64) -> Self {
        Self {
            resource,
            factor,
            index,
        }
    }

    /// Key of the following chunk of the same array.
    #[must_use]
    pub fn next(&self) -> Self {
        Self {
            resource: self.resource.clone(),
            factor: self.factor,
            index: self.index.saturating_add(1),
        }
    }
}

impl fmt::Display for ChunkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}#{}", self.resource, self.factor, self.index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn keys_differ_by_every_component() {
        let a = ResourceId::new("/units/spike_times");
        let b = ResourceId::new("/units/spike_times_ds");
        let mut set = HashSet::new();
        set.insert(ChunkKey::new(a.clone(), 1));
        set.insert(ChunkKey::with_factor(a.clone(), 10, 1));
        set.insert(ChunkKey::new(b, 1));
        set.insert(ChunkKey::new(a.clone(), 11));
        // "1" + "1" vs "11" style collisions cannot happen with structured keys
        assert_eq!(set.len(), 4);
        assert!(set.contains(&ChunkKey::new(a, 1)));
    }

    #[test]
    fn display_and_child() {
        let r = ResourceId::new("/units/spike_times");
        assert_eq!(r.child("unit3").as_str(), "/units/spike_times/unit3");
        let k = ChunkKey::with_factor(r, 10, 4);
        assert_eq!(k.to_string(), "/units/spike_times@10#4");
        assert_eq!(k.next().index, 5);
    }
}
