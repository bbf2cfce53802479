//! Loop nesting via back-edge detection on the dominator tree: an edge
//! `u -> v` is a back edge when `v` dominates `u`; its natural loop is `v`
//! plus every node that can reach `u` without passing through `v` again.
//! A node's loop depth is the number of natural loops (one per distinct
//! header) that contain it, which is exactly the "nesting depth" the
//! placement pass minimizes over.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::cfg::{Cfg, CfgNode};
use crate::dominators::DomTree;

pub struct LoopTree {
    depth: HashMap<CfgNode, u32>,
    headers: HashMap<CfgNode, HashSet<CfgNode>>,
}

impl LoopTree {
    pub fn build(cfg: &Cfg, dom: &DomTree) -> LoopTree {
        let mut bodies: HashMap<CfgNode, HashSet<CfgNode>> = HashMap::new();

        for u in cfg.nodes() {
            for &v in cfg.succs(u) {
                if dom.dominates(v, u) {
                    let body = natural_loop_body(cfg, u, v);
                    bodies.entry(v).or_default().extend(body);
                }
            }
        }

        let mut depth: HashMap<CfgNode, u32> = HashMap::new();
        for node in cfg.nodes() {
            let d = bodies.values().filter(|body| body.contains(&node)).count() as u32;
            depth.insert(node, d);
        }

        LoopTree { depth, headers: bodies }
    }

    pub fn depth(&self, node: CfgNode) -> u32 {
        self.depth.get(&node).copied().unwrap_or(0)
    }

    pub fn is_loop_header(&self, node: CfgNode) -> bool {
        self.headers.contains_key(&node)
    }

    pub fn loop_body(&self, header: CfgNode) -> Option<&HashSet<CfgNode>> {
        self.headers.get(&header)
    }
}

/// `v` is the loop header dominating back-edge source `u`; walk backward
/// from `u` collecting everything that reaches `u` without re-entering
/// through `v`.
fn natural_loop_body(cfg: &Cfg, u: CfgNode, v: CfgNode) -> HashSet<CfgNode> {
    let mut body = HashSet::new();
    body.insert(v);
    body.insert(u);
    let mut queue = VecDeque::new();
    if u != v {
        queue.push_back(u);
    }
    while let Some(n) = queue.pop_front() {
        for &p in cfg.preds(n) {
            if body.insert(p) {
                queue.push_back(p);
            }
        }
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::Scope;
    use nodus_core::{ArithOp, ConstValue, ContinuationFlags, PrimTy, World, WorldConfig};

    #[test]
    fn self_loop_header_has_depth_one() {
        let mut w = World::new(WorldConfig::default());
        let i32_ty = w.prim_ty(PrimTy::I32);
        let ret = w.pi(vec![i32_ty]);
        let entry = w.continuation(vec![i32_ty, ret], ContinuationFlags { is_external: true, ..Default::default() });
        let header = w.continuation(vec![i32_ty], Default::default());
        let start = w.param(entry, 0);
        w.jump(entry, header, vec![start]).unwrap();

        let i = w.param(header, 0);
        let one = w.literal(ConstValue::I32(1));
        let next = w.arith(ArithOp::Add, i, one);
        // Loop back to itself unconditionally (a trivial infinite loop,
        // sufficient to exercise back-edge detection without a branch
        // primop).
        w.jump(header, header, vec![next]).ok();

        let scope = Scope::new(&w, entry).unwrap();
        let cfg = Cfg::forward(&w, &scope);
        let dom = DomTree::forward(&cfg);
        let tree = LoopTree::build(&cfg, &dom);
        let header_node = cfg.node_of(header).unwrap();
        assert_eq!(tree.depth(header_node), 1);
        assert!(tree.is_loop_header(header_node));
    }
}
