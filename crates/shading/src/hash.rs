//! Content hashing and hash-driven ("soft") updates of the shading graph.
//!
//! Every cacheable node can report two hashes: `get_hash()`, a pure digest of
//! its current inputs, and `cached_hash()`, the digest recorded at its last
//! recomputation. [`soft_update`] walks the graph leaves-first and recomputes
//! only the nodes whose inputs actually moved.

use std::fmt;

use xxhash_rust::xxh3::Xxh3;

use crate::types::NodeId;

/// 64-bit structural digest of a node's inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct ContentHash(u64);

impl ContentHash {
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Incremental xxh3 digest over tagged, length-prefixed fields.
pub(crate) struct HashBuilder {
    state: Xxh3,
}

impl HashBuilder {
    /// Starts a digest; `tag` keeps different node kinds from colliding.
    pub fn new(tag: &str) -> Self {
        let mut state = Xxh3::new();
        state.update(tag.as_bytes());
        state.update(&[0xff]);
        Self { state }
    }

    pub fn u8(mut self, value: u8) -> Self {
        self.state.update(&[value]);
        self
    }

    pub fn u32(mut self, value: u32) -> Self {
        self.state.update(&value.to_le_bytes());
        self
    }

    pub fn u64(mut self, value: u64) -> Self {
        self.state.update(&value.to_le_bytes());
        self
    }

    pub fn f32(self, value: f32) -> Self {
        self.u32(value.to_bits())
    }

    pub fn bytes(mut self, bytes: &[u8]) -> Self {
        self = self.u64(bytes.len() as u64);
        self.state.update(bytes);
        self
    }

    pub fn child(self, hash: ContentHash) -> Self {
        self.u64(hash.0)
    }

    pub fn finish(self) -> ContentHash {
        ContentHash(self.state.digest())
    }
}

/// A node of the shading graph whose output is cached behind a content hash.
pub trait Cacheable {
    fn node_id(&self) -> NodeId;

    /// Digest of the node's current inputs. Pure: no recomputation happens.
    fn get_hash(&self) -> ContentHash;

    /// Digest recorded when the cached output was last recomputed.
    fn cached_hash(&self) -> ContentHash;

    /// Recomputes the cached output and records the new hash.
    fn update(&self);

    /// Calls `visit` for every cacheable input of this node.
    fn visit_children(&self, _visit: &mut dyn FnMut(&dyn Cacheable)) {}

    fn is_stale(&self) -> bool {
        self.cached_hash() != self.get_hash()
    }
}

/// Brings `node` and its subgraph up to date and reports whether anything
/// was recomputed.
///
/// Children are always visited (no short-circuit), so a change deep in one
/// branch never hides a change in a sibling. A node recomputes when its own
/// hash is stale or any child changed.
pub fn soft_update(node: &dyn Cacheable) -> bool {
    let mut child_changed = false;
    node.visit_children(&mut |child| {
        if soft_update(child) {
            child_changed = true;
        }
    });

    if child_changed || node.is_stale() {
        tracing::trace!(node = %node.node_id(), "soft update recomputing node");
        node.update();
        true
    } else {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_bits_distinguish_nearby_values() {
        let a = HashBuilder::new("x").f32(0.5).finish();
        let b = HashBuilder::new("x").f32(0.500_000_06).finish();
        assert_ne!(a, b);
    }

    #[test]
    fn tags_separate_node_kinds() {
        let a = HashBuilder::new("channel").u32(1).finish();
        let b = HashBuilder::new("mix").u32(1).finish();
        assert_ne!(a, b);
    }

    #[test]
    fn length_prefix_separates_byte_runs() {
        let a = HashBuilder::new("t").bytes(b"ab").bytes(b"c").finish();
        let b = HashBuilder::new("t").bytes(b"a").bytes(b"bc").finish();
        assert_ne!(a, b);
    }

    #[test]
    fn identical_inputs_hash_identically() {
        let a = HashBuilder::new("t").u32(7).child(ContentHash(9)).finish();
        let b = HashBuilder::new("t").u32(7).child(ContentHash(9)).finish();
        assert_eq!(a, b);
    }
}
