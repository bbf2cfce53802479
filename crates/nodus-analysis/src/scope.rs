//! A `Scope` is the transitive closure of Defs reachable from a single
//! entry continuation: its own params, everything its jump depends on, and
//! — following jump edges — every continuation reached from it, recursively.
//! It does not cross into Defs that are independent of the entry's params
//! (e.g. unrelated top-level functions never get pulled in just because
//! they happen to be hash-consed defs somewhere in the same `World`).
//!
//! Grounded on `thorin`'s `Scope::post_order_walk`: a lambda queue plus a
//! def stack, where encountering a lambda operand enqueues it rather than
//! recursing into its body directly.

use std::collections::VecDeque;

use indexmap::IndexSet;
use nodus_core::{DefId, DefKind, PrimOpKind, World};

use crate::error::{AnalysisError, AnalysisResult};

pub struct Scope {
    entry: DefId,
    /// Continuations belonging to this scope, in discovery order (not yet
    /// RPO — `rpo()` computes that on demand from `succs`).
    conts: IndexSet<DefId>,
    /// Every Def (continuations included) transitively reachable from
    /// `entry`.
    defs: IndexSet<DefId>,
}

impl Scope {
    pub fn new(world: &World, entry: DefId) -> AnalysisResult<Scope> {
        if !world.def(entry).kind.is_continuation() {
            return Err(AnalysisError::NotAContinuation(entry));
        }
        let mut conts = IndexSet::new();
        let mut defs = IndexSet::new();
        let mut cont_queue = VecDeque::new();
        cont_queue.push_back(entry);

        while let Some(c) = cont_queue.pop_front() {
            if !conts.insert(c) {
                continue;
            }
            defs.insert(c);
            let data = world.continuation_data(c);
            let params = data.params.clone();
            for p in params {
                defs.insert(p);
            }
            if let Some(jump) = data.jump.clone() {
                walk_def(world, jump.callee, &mut defs, &mut cont_queue);
                for a in jump.args {
                    walk_def(world, a, &mut defs, &mut cont_queue);
                }
            }
        }

        Ok(Scope { entry, conts, defs })
    }

    pub fn entry(&self) -> DefId {
        self.entry
    }

    /// Continuations with no in-scope successor among the jump graph, i.e.
    /// they return control to a continuation outside the scope (typically
    /// the scope's free "return" parameter).
    pub fn exits(&self, world: &World) -> Vec<DefId> {
        self.conts
            .iter()
            .copied()
            .filter(|&c| self.succs(world, c).is_empty())
            .collect()
    }

    pub fn defs(&self) -> impl Iterator<Item = DefId> + '_ {
        self.defs.iter().copied()
    }

    pub fn continuations(&self) -> impl Iterator<Item = DefId> + '_ {
        self.conts.iter().copied()
    }

    pub fn contains(&self, id: DefId) -> bool {
        self.defs.contains(&id)
    }

    pub fn contains_cont(&self, id: DefId) -> bool {
        self.conts.contains(&id)
    }

    /// Successor continuations of `cont` that are themselves in this scope
    /// (i.e. excludes jumping out to a free/return parameter). A jump whose
    /// callee is a `Select` between two continuations is a genuine
    /// conditional branch: both arms count as successors, not the `Select`
    /// itself (which never appears in `conts`, only in `defs`).
    pub fn succs(&self, world: &World, cont: DefId) -> Vec<DefId> {
        let data = world.continuation_data(cont);
        let Some(jump) = &data.jump else { return Vec::new() };
        let mut out = Vec::new();
        if let Some(targets) = branch_targets(world, jump.callee) {
            for t in targets {
                if self.conts.contains(&t) {
                    out.push(t);
                }
            }
        } else if world.def(jump.callee).kind.is_continuation() && self.conts.contains(&jump.callee) {
            out.push(jump.callee);
        }
        for &a in &jump.args {
            if world.def(a).kind.is_continuation() && self.conts.contains(&a) {
                out.push(a);
            }
        }
        out
    }

    /// Predecessor continuations of `cont` within this scope.
    pub fn preds(&self, world: &World, cont: DefId) -> Vec<DefId> {
        self.conts
            .iter()
            .copied()
            .filter(|&c| self.succs(world, c).contains(&cont))
            .collect()
    }

    /// Reverse post-order over the scope's continuations starting at
    /// `entry`, following `succs`.
    pub fn rpo(&self, world: &World) -> Vec<DefId> {
        let mut visited = IndexSet::new();
        let mut post_order = Vec::new();
        self.post_order_visit(world, self.entry, &mut visited, &mut post_order);
        post_order.reverse();
        post_order
    }

    fn post_order_visit(&self, world: &World, cont: DefId, visited: &mut IndexSet<DefId>, out: &mut Vec<DefId>) {
        if !visited.insert(cont) {
            return;
        }
        for succ in self.succs(world, cont) {
            self.post_order_visit(world, succ, visited, out);
        }
        out.push(cont);
    }

    /// Params used within the scope whose owning continuation is not part
    /// of this scope: the closure-conversion-relevant free variables.
    pub fn free_params(&self, world: &World) -> Vec<DefId> {
        self.defs
            .iter()
            .copied()
            .filter(|&id| matches!(world.def(id).kind, nodus_core::DefKind::Param { cont, .. } if !self.conts.contains(&cont)))
            .collect()
    }

    pub fn free(&self, world: &World) -> Vec<DefId> {
        self.free_params(world)
    }

    pub fn is_top_level(&self, world: &World) -> bool {
        self.free_params(world).is_empty()
    }
}

/// If `callee` is a `Select` between two continuations, returns them as
/// `[tval, fval]` — the two statically possible targets of a conditional
/// branch encoded as a computed jump target, as `vectorize` (and any other
/// CFG-based pass) needs to see both arms rather than treating the jump as
/// having no statically known successor.
fn branch_targets(world: &World, callee: DefId) -> Option<[DefId; 2]> {
    if let DefKind::PrimOp(PrimOpKind::Select) = world.def(callee).kind {
        let t = world.def(callee).op(1);
        let f = world.def(callee).op(2);
        if world.def(t).kind.is_continuation() && world.def(f).kind.is_continuation() {
            return Some([t, f]);
        }
    }
    None
}

fn walk_def(world: &World, id: DefId, defs: &mut IndexSet<DefId>, cont_queue: &mut VecDeque<DefId>) {
    if !defs.insert(id) {
        return;
    }
    if world.def(id).kind.is_continuation() {
        cont_queue.push_back(id);
        return;
    }
    for op in world.def(id).ops_vec() {
        walk_def(world, op, defs, cont_queue);
    }
}

/// Every top-level scope (no free params) in `world`, one per external or
/// intrinsic continuation, mirroring `Scope::for_each` in the reference
/// implementation.
pub fn top_level_scopes(world: &World) -> Vec<Scope> {
    world
        .all_defs()
        .filter(|&id| matches!(&world.def(id).kind, nodus_core::DefKind::Continuation(d) if d.flags.is_external || d.flags.is_intrinsic))
        .filter_map(|id| Scope::new(world, id).ok())
        .filter(|s| s.is_top_level(world))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodus_core::{ContinuationFlags, PrimTy, WorldConfig};

    #[test]
    fn scope_contains_entry_and_its_jump_operands() {
        let mut w = World::new(WorldConfig::default());
        let i32_ty = w.prim_ty(PrimTy::I32);
        let ret = w.pi(vec![i32_ty]);
        let entry = w.continuation(
            vec![i32_ty, ret],
            ContinuationFlags { is_external: true, ..Default::default() },
        );
        let x = w.param(entry, 0);
        let k = w.param(entry, 1);
        let one = w.literal(nodus_core::ConstValue::I32(1));
        let sum = w.arith(nodus_core::ArithOp::Add, x, one);
        w.jump(entry, k, vec![sum]).unwrap();

        let scope = Scope::new(&w, entry).unwrap();
        assert!(scope.contains(entry));
        assert!(scope.contains(x));
        assert!(scope.contains(sum));
        assert!(scope.free_params(&w).contains(&k));
        assert!(scope.is_top_level(&w));
    }

    #[test]
    fn two_block_scope_has_correct_rpo() {
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
        let rpo = scope.rpo(&w);
        assert_eq!(rpo, vec![entry, block2]);
        assert_eq!(scope.exits(&w), vec![block2]);
    }
}
