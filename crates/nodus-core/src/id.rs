use std::fmt;

use petgraph::stable_graph::NodeIndex;
use serde::{Deserialize, Serialize};

/// Identity of a single node in the hash-consed graph: a type, a literal, a
/// primop, a parameter, or a continuation. Stable across `cleanup` sweeps as
/// long as the node itself survives (`StableGraph` never reuses a live
/// index).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DefId(pub u32);

impl fmt::Display for DefId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

impl From<NodeIndex<u32>> for DefId {
    fn from(idx: NodeIndex<u32>) -> Self {
        DefId(idx.index() as u32)
    }
}

impl From<DefId> for NodeIndex<u32> {
    fn from(id: DefId) -> Self {
        NodeIndex::new(id.0 as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_through_node_index() {
        let idx = NodeIndex::<u32>::new(42);
        let id: DefId = idx.into();
        let back: NodeIndex<u32> = id.into();
        assert_eq!(idx, back);
    }

    #[test]
    fn displays_with_percent_sigil() {
        assert_eq!(DefId(7).to_string(), "%7");
    }

    #[test]
    fn serde_roundtrip() {
        let id = DefId(123);
        let json = serde_json::to_string(&id).unwrap();
        let back: DefId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }
}
