//! A numbered view of a [`Scope`]'s continuations suitable for the
//! dominator-tree and loop-nesting algorithms, which want dense integer
//! indices rather than `DefId`s. Forward and backward orientations share
//! the same node numbering; only which edge direction `succs`/`preds`
//! exposes differs.

use std::collections::HashMap;

use nodus_core::{DefId, World};

use crate::scope::Scope;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CfgNode(pub usize);

pub struct Cfg {
    order: Vec<DefId>,
    index: HashMap<DefId, CfgNode>,
    succs: Vec<Vec<CfgNode>>,
    preds: Vec<Vec<CfgNode>>,
}

impl Cfg {
    /// Builds the forward CFG: node 0 is the scope's entry, numbered in
    /// reverse post-order (the order every dominator-tree implementation in
    /// this crate assumes).
    pub fn forward(world: &World, scope: &Scope) -> Cfg {
        let order = scope.rpo(world);
        Self::from_order(world, scope, order)
    }

    /// Builds the backward CFG used for post-dominance: same node
    /// numbering as the forward CFG (callers are expected to share one
    /// `Cfg::forward` node numbering when relating the two), edges
    /// reversed, with a synthetic virtual exit (`CfgNode(order.len())`)
    /// joining every scope exit so post-dominance is well-defined even with
    /// multiple returns.
    pub fn backward_from(forward: &Cfg) -> Cfg {
        let n = forward.order.len();
        let mut preds = vec![Vec::new(); n + 1];
        let mut succs = vec![Vec::new(); n + 1];
        for (i, outs) in forward.succs.iter().enumerate() {
            for &s in outs {
                succs[s.0].push(CfgNode(i));
                preds[i].push(s);
            }
        }
        let virtual_exit = CfgNode(n);
        for i in 0..n {
            if forward.succs[i].is_empty() {
                succs[i].push(virtual_exit);
                preds[virtual_exit.0].push(CfgNode(i));
            }
        }
        Cfg {
            order: forward.order.clone(),
            index: forward.index.clone(),
            succs,
            preds,
        }
    }

    fn from_order(world: &World, scope: &Scope, order: Vec<DefId>) -> Cfg {
        let index: HashMap<DefId, CfgNode> = order.iter().enumerate().map(|(i, &d)| (d, CfgNode(i))).collect();
        let mut succs = vec![Vec::new(); order.len()];
        let mut preds = vec![Vec::new(); order.len()];
        for (i, &cont) in order.iter().enumerate() {
            for s in scope.succs(world, cont) {
                if let Some(&sn) = index.get(&s) {
                    succs[i].push(sn);
                    preds[sn.0].push(CfgNode(i));
                }
            }
        }
        Cfg { order, index, succs, preds }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn entry(&self) -> CfgNode {
        CfgNode(0)
    }

    /// The synthetic virtual exit node, present only on a backward CFG
    /// built with more than one real exit (or always present — index
    /// `len()` is reserved for it regardless, callers check `node_def`).
    pub fn virtual_exit(&self) -> CfgNode {
        CfgNode(self.order.len())
    }

    pub fn node_of(&self, id: DefId) -> Option<CfgNode> {
        self.index.get(&id).copied()
    }

    pub fn def_of(&self, node: CfgNode) -> Option<DefId> {
        self.order.get(node.0).copied()
    }

    pub fn succs(&self, node: CfgNode) -> &[CfgNode] {
        &self.succs[node.0]
    }

    pub fn preds(&self, node: CfgNode) -> &[CfgNode] {
        &self.preds[node.0]
    }

    pub fn nodes(&self) -> impl Iterator<Item = CfgNode> {
        (0..self.succs.len()).map(CfgNode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodus_core::{ContinuationFlags, PrimTy, WorldConfig};

    #[test]
    fn forward_and_backward_agree_on_node_count() {
        let mut w = World::new(WorldConfig::default());
        let i32_ty = w.prim_ty(PrimTy::I32);
        let ret = w.pi(vec![i32_ty]);
        let entry = w.continuation(vec![ret], ContinuationFlags { is_external: true, ..Default::default() });
        let block2 = w.continuation(vec![i32_ty], Default::default());
        let k = w.param(entry, 0);
        let one = w.literal(nodus_core::ConstValue::I32(1));
        w.jump(entry, block2, vec![one]).unwrap();
        let p = w.param(block2, 0);
        w.jump(block2, k, vec![p]).unwrap();

        let scope = Scope::new(&w, entry).unwrap();
        let fwd = Cfg::forward(&w, &scope);
        assert_eq!(fwd.len(), 2);
        let bwd = Cfg::backward_from(&fwd);
        assert_eq!(bwd.preds(bwd.virtual_exit()).len(), 1);
    }
}
