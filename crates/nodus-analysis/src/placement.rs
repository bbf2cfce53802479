//! Two-phase instruction scheduling: late (latest legal position, the LCA
//! of every user on the dominator tree) then early (walk the dominator
//! chain from the late point back toward the point dictated by the
//! primop's own operands, picking the position with the lowest loop
//! nesting depth). `SlotAddr`/`Enter` are pinned to their earliest legal
//! position, `Leave` to its latest, matching the reference scheduler's
//! `visit_early`/`place_late`/`place_early` split.

use std::collections::HashMap;

use nodus_core::{DefId, DefKind, PrimOpKind, World};

use crate::cfg::{Cfg, CfgNode};
use crate::dominators::DomTree;
use crate::looptree::LoopTree;
use crate::scope::Scope;

pub struct Placement {
    places: HashMap<DefId, DefId>,
}

impl Placement {
    pub fn place_of(&self, def: DefId) -> Option<DefId> {
        self.places.get(&def).copied()
    }
}

struct Ctx<'a> {
    world: &'a World,
    scope: &'a Scope,
    cfg: &'a Cfg,
    dom: &'a DomTree,
    loops: &'a LoopTree,
    late: HashMap<DefId, CfgNode>,
    final_pos: HashMap<DefId, CfgNode>,
}

pub fn place(world: &World, scope: &Scope) -> Placement {
    let cfg = Cfg::forward(world, scope);
    let dom = DomTree::forward(&cfg);
    let loops = LoopTree::build(&cfg, &dom);

    let mut ctx = Ctx {
        world,
        scope,
        cfg: &cfg,
        dom: &dom,
        loops: &loops,
        late: HashMap::new(),
        final_pos: HashMap::new(),
    };

    let mut schedulable: Vec<DefId> = scope
        .defs()
        .filter(|&id| matches!(world.def(id).kind, DefKind::PrimOp(_)))
        .collect();
    schedulable.sort_by_key(|&id| world.def(id).gid);

    for &def in &schedulable {
        ctx.late(def);
    }
    for &def in &schedulable {
        ctx.finalize(def);
    }

    let places = schedulable.into_iter().filter_map(|id| ctx.final_pos.get(&id).map(|&n| (id, cfg.def_of(n).unwrap()))).collect();
    Placement { places }
}

impl<'a> Ctx<'a> {
    fn late(&mut self, def: DefId) -> CfgNode {
        if let Some(&n) = self.late.get(&def) {
            return n;
        }
        // Placeholder to guard against revisiting during recursion on a
        // malformed (cyclic) operand graph; hash-consed value defs never
        // actually cycle, so this only protects against a logic bug.
        self.late.insert(def, self.cfg.entry());

        let mut candidates: Vec<CfgNode> = Vec::new();
        for user in self.world.uses(def) {
            if !self.scope.contains(user) {
                continue;
            }
            if self.world.def(user).kind.is_continuation() {
                if let Some(n) = self.cfg.node_of(user) {
                    candidates.push(n);
                }
            } else if matches!(self.world.def(user).kind, DefKind::PrimOp(_)) {
                candidates.push(self.late(user));
            }
        }

        let result = candidates
            .into_iter()
            .reduce(|a, b| self.dom.lca(a, b))
            .unwrap_or_else(|| self.cfg.entry());
        self.late.insert(def, result);
        result
    }

    /// The deepest point every operand's own final placement has already
    /// reached; a primop can never be hoisted above this without breaking
    /// the invariant that operands are computed before their users.
    fn operand_bound(&mut self, def: DefId) -> CfgNode {
        let ops = self.world.def(def).ops_vec();
        let mut candidates = Vec::new();
        for op in ops {
            match self.world.def(op).kind {
                DefKind::Param { cont, .. } => {
                    if let Some(n) = self.cfg.node_of(cont) {
                        candidates.push(n);
                    }
                }
                DefKind::PrimOp(_) => {
                    if let Some(&n) = self.final_pos.get(&op) {
                        candidates.push(n);
                    }
                }
                _ => {} // constants and types float freely
            }
        }
        candidates.into_iter().reduce(|a, b| lowest_common_dominated(self.dom, a, b)).unwrap_or_else(|| self.cfg.entry())
    }

    fn finalize(&mut self, def: DefId) -> CfgNode {
        if let Some(&n) = self.final_pos.get(&def) {
            return n;
        }
        let kind = match self.world.def(def).kind {
            DefKind::PrimOp(k) => k,
            _ => unreachable!("finalize called on a non-primop"),
        };
        let late = self.late[&def];

        if kind.is_pinned_late() {
            self.final_pos.insert(def, late);
            return late;
        }

        let bound = self.operand_bound(def);
        if kind.is_pinned_early() {
            self.final_pos.insert(def, bound);
            return bound;
        }

        let mut best = late;
        let mut cur = late;
        while cur != bound {
            let Some(next) = self.dom.idom(cur) else { break };
            cur = next;
            if self.loops.depth(cur) < self.loops.depth(best) {
                best = cur;
            }
            if cur == self.dom.root() {
                break;
            }
        }
        self.final_pos.insert(def, best);
        best
    }
}

/// The dominator-tree node dominated by both `a` and `b`'s placements is
/// their LCA's *descendant*, not ancestor — for an "earliest point both
/// operands are ready" query we actually want whichever of the two is
/// deeper (dominated by the other), since both must have already run.
/// If neither dominates the other the graph is malformed for this operand
/// pair (two incomparable placements can't both precede one schedule
/// point); fall back to their LCA as the least-bad legal approximation.
fn lowest_common_dominated(dom: &DomTree, a: CfgNode, b: CfgNode) -> CfgNode {
    if dom.dominates(a, b) {
        b
    } else if dom.dominates(b, a) {
        a
    } else {
        dom.lca(a, b)
    }
}
