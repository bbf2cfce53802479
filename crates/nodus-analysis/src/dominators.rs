//! Iterative dominator-tree construction (Cooper/Harvey/Kennedy, "A Simple,
//! Fast Dominance Algorithm") over a [`Cfg`], used for both the forward
//! (dominator) and backward (post-dominator) direction. `placement.rs`
//! calls `lca` on the forward tree to compute the latest legal schedule
//! point for a value with multiple users.

use std::collections::HashMap;

use crate::cfg::{Cfg, CfgNode};

pub struct DomTree {
    root: CfgNode,
    /// Position of each reachable node in reverse post-order from `root`;
    /// absence means unreachable.
    number: HashMap<CfgNode, usize>,
    idom: HashMap<CfgNode, CfgNode>,
}

impl DomTree {
    pub fn forward(cfg: &Cfg) -> DomTree {
        Self::build(cfg.entry(), cfg.nodes().collect(), |n| cfg.succs(n), |n| cfg.preds(n))
    }

    /// `cfg` here must be a backward `Cfg` (see `Cfg::backward_from`); the
    /// root is its virtual exit.
    pub fn backward(cfg: &Cfg) -> DomTree {
        let root = cfg.virtual_exit();
        let mut all: Vec<CfgNode> = cfg.nodes().collect();
        all.push(root);
        Self::build(root, all, |n| cfg.succs(n), |n| cfg.preds(n))
    }

    fn build<'a>(
        root: CfgNode,
        all_nodes: Vec<CfgNode>,
        succs: impl Fn(CfgNode) -> &'a [CfgNode],
        preds: impl Fn(CfgNode) -> &'a [CfgNode],
    ) -> DomTree {
        let rpo = reverse_postorder(root, &all_nodes, &succs);
        let number: HashMap<CfgNode, usize> = rpo.iter().enumerate().map(|(i, &n)| (n, i)).collect();

        let mut idom: HashMap<CfgNode, CfgNode> = HashMap::new();
        idom.insert(root, root);

        let mut changed = true;
        while changed {
            changed = false;
            for &node in rpo.iter().skip(1) {
                let processed_preds: Vec<CfgNode> = preds(node).iter().copied().filter(|p| idom.contains_key(p)).collect();
                let Some((&first, rest)) = processed_preds.split_first() else { continue };
                let mut new_idom = first;
                for &p in rest {
                    new_idom = intersect(&idom, &number, new_idom, p);
                }
                if idom.get(&node) != Some(&new_idom) {
                    idom.insert(node, new_idom);
                    changed = true;
                }
            }
        }

        DomTree { root, number, idom }
    }

    pub fn idom(&self, node: CfgNode) -> Option<CfgNode> {
        if node == self.root {
            return None;
        }
        self.idom.get(&node).copied()
    }

    pub fn is_reachable(&self, node: CfgNode) -> bool {
        self.number.contains_key(&node)
    }

    pub fn dominates(&self, a: CfgNode, b: CfgNode) -> bool {
        if !self.number.contains_key(&a) || !self.number.contains_key(&b) {
            return false;
        }
        let mut cur = b;
        loop {
            if cur == a {
                return true;
            }
            if cur == self.root {
                return a == self.root;
            }
            match self.idom.get(&cur) {
                Some(&next) if next != cur => cur = next,
                _ => return false,
            }
        }
    }

    /// Lowest common ancestor of `a` and `b` in the dominator tree: the
    /// deepest continuation that dominates every user when called
    /// pairwise-folded over a whole user set, as `placement.rs`'s late-phase
    /// does.
    pub fn lca(&self, a: CfgNode, b: CfgNode) -> CfgNode {
        intersect(&self.idom, &self.number, a, b)
    }

    pub fn root(&self) -> CfgNode {
        self.root
    }
}

fn intersect(idom: &HashMap<CfgNode, CfgNode>, number: &HashMap<CfgNode, usize>, a: CfgNode, b: CfgNode) -> CfgNode {
    let mut a = a;
    let mut b = b;
    while a != b {
        while number[&a] > number[&b] {
            a = idom[&a];
        }
        while number[&b] > number[&a] {
            b = idom[&b];
        }
    }
    a
}

fn reverse_postorder<'a>(root: CfgNode, all_nodes: &[CfgNode], succs: &impl Fn(CfgNode) -> &'a [CfgNode]) -> Vec<CfgNode> {
    let mut visited = vec![false; all_nodes.len() + 1];
    let mut post = Vec::new();
    let mut stack: Vec<(CfgNode, usize)> = vec![(root, 0)];
    let get = |n: CfgNode, v: &Vec<bool>| v.get(n.0).copied().unwrap_or(false);
    if get(root, &visited) {
        return Vec::new();
    }
    mark(root, &mut visited);
    while let Some((node, mut i)) = stack.pop() {
        let outs = succs(node);
        let mut pushed_child = false;
        while i < outs.len() {
            let next = outs[i];
            i += 1;
            if !get(next, &visited) {
                mark(next, &mut visited);
                stack.push((node, i));
                stack.push((next, 0));
                pushed_child = true;
                break;
            }
        }
        if !pushed_child {
            post.push(node);
        }
    }
    post.reverse();
    post
}

fn mark(n: CfgNode, visited: &mut Vec<bool>) {
    if n.0 >= visited.len() {
        visited.resize(n.0 + 1, false);
    }
    visited[n.0] = true;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::Scope;
    use nodus_core::{ContinuationFlags, PrimTy, World, WorldConfig};

    #[test]
    fn straight_line_cfg_dominance() {
        let mut w = World::new(WorldConfig::default());
        let i32_ty = w.prim_ty(PrimTy::I32);
        let ret = w.pi(vec![i32_ty]);
        let entry = w.continuation(vec![i32_ty, ret], ContinuationFlags { is_external: true, ..Default::default() });
        let mid = w.continuation(vec![], Default::default());
        let join = w.continuation(vec![i32_ty], Default::default());

        let k = w.param(entry, 1);
        w.jump(entry, mid, vec![]).unwrap();
        let one = w.literal(nodus_core::ConstValue::I32(1));
        w.jump(mid, join, vec![one]).unwrap();
        let jp = w.param(join, 0);
        w.jump(join, k, vec![jp]).unwrap();

        let scope = Scope::new(&w, entry).unwrap();
        let cfg = crate::cfg::Cfg::forward(&w, &scope);
        let dom = DomTree::forward(&cfg);
        let entry_node = cfg.node_of(entry).unwrap();
        let mid_node = cfg.node_of(mid).unwrap();
        let join_node = cfg.node_of(join).unwrap();
        assert_eq!(dom.idom(entry_node), None);
        assert!(dom.dominates(entry_node, join_node));
        assert_eq!(dom.idom(join_node), Some(mid_node));
    }
}
