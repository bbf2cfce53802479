//! Copy propagation over continuation parameters: a join-semilattice
//! over each parameter's incoming values, folding a parameter away once
//! every predecessor is observed forwarding the same actual.
//!
//! For each continuation parameter, fold every predecessor's actual value
//! for it through a tiny three-point lattice:
//!
//! - `Bottom`: no predecessor examined yet.
//! - `Unique(d)`: every predecessor examined so far passes the same `d`.
//! - `Top`: at least two predecessors disagree.
//!
//! A parameter that settles on `Unique(d)` after every jump into its
//! continuation has been folded in is redundant: every use can be replaced
//! by `d` directly, and the parameter itself (along with the matching
//! argument at every call site) can be dropped. Dropping a parameter
//! changes a continuation's arity, and `World` has no in-place operation
//! for that, so the drop is done the same way `lower2cff`/`partial_eval`
//! specialize a call: clone the continuation via `drop_specialize::drop`
//! with the parameter bound to its unique value, then repoint every caller
//! at the clone with that argument dropped.

use std::collections::HashMap;

use nodus_analysis::top_level_scopes;
use nodus_core::{DefId, World};
use tracing::trace;

use crate::{cleanup, drop_specialize};

#[derive(Clone, Copy, PartialEq, Eq)]
enum Lattice {
    Bottom,
    Unique(DefId),
    Top,
}

impl Lattice {
    fn join(self, value: DefId) -> Lattice {
        match self {
            Lattice::Bottom => Lattice::Unique(value),
            Lattice::Unique(d) if d == value => self,
            Lattice::Unique(_) => Lattice::Top,
            Lattice::Top => Lattice::Top,
        }
    }
}

/// Runs copy propagation to a fixpoint across every top-level scope,
/// re-deriving scopes each round since dropping a parameter changes the
/// very continuation identities the next round's scopes are built from.
/// Returns the total number of parameters eliminated.
pub fn copy_prop(world: &mut World) -> usize {
    let mut total = 0;
    loop {
        let folded = round(world);
        if folded == 0 {
            return total;
        }
        total += folded;
        cleanup::cleanup(world);
    }
}

fn round(world: &mut World) -> usize {
    let mut count = 0;
    for scope in top_level_scopes(world) {
        for cont in scope.continuations().collect::<Vec<_>>() {
            if world.try_def(cont).is_none() {
                continue; // folded away by an earlier continuation this round
            }
            if scope.entry() == cont {
                continue; // the scope's own entry parameters are its external ABI
            }
            let params = world.params(cont).to_vec();
            if params.is_empty() {
                continue;
            }

            let preds = scope.preds(world, cont);
            if preds.is_empty() {
                continue; // unreachable; cleanup will collect it
            }

            for (index, &param) in params.iter().enumerate() {
                let mut lattice = Lattice::Bottom;
                for &pred in &preds {
                    let Some(jump) = world.continuation_data(pred).jump.as_ref() else { continue };
                    if jump.callee != cont {
                        continue; // cont reached only as a data argument elsewhere, not as this jump's target
                    }
                    let Some(&actual) = jump.args.get(index) else { continue };
                    lattice = lattice.join(actual);
                    if lattice == Lattice::Top {
                        break;
                    }
                }
                let Lattice::Unique(value) = lattice else { continue };
                if value == param {
                    continue; // already a fixpoint, nothing to propagate
                }

                let cloned = drop_specialize::drop(world, cont, &[index], &[value]).expect("index/actual arity matches by construction");
                rewire_callers(world, cont, index, cloned);
                trace!(folded = %cont, param = %param, value = %value, "copy_prop");
                count += 1;
                break; // cont's identity is now `cloned`; re-examine it next round
            }
        }
    }
    count
}

/// Every use of `old` as a jump callee gets repointed at `new`, with the
/// argument at `index` (now absorbed into `new`'s specialization) dropped
/// from the call.
fn rewire_callers(world: &mut World, old: DefId, index: usize, new: DefId) {
    let callers: Vec<DefId> = world.uses(old).into_iter().filter(|&u| world.def(u).kind.is_continuation()).collect();
    for caller in callers {
        let Some(jump) = world.continuation_data(caller).jump.clone() else { continue };
        if jump.callee != old {
            continue;
        }
        let remaining: Vec<DefId> = jump.args.iter().enumerate().filter(|&(i, _)| i != index).map(|(_, &a)| a).collect();
        let _ = world.jump(caller, new, remaining);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodus_core::{ArithOp, ContinuationFlags, ConstValue, PrimTy, WorldConfig};

    /// `entry(x, k)` jumps to `join` from two predecessors that both
    /// forward the same value `x` for `join`'s first parameter but pass
    /// distinct constants for the second: the first parameter should be
    /// dropped and every use of it inside `join` replaced by `x` directly,
    /// while the genuinely divergent second parameter survives.
    #[test]
    fn drops_parameter_unique_across_every_predecessor() {
        let mut w = World::new(WorldConfig::default());
        let i32_ty = w.prim_ty(PrimTy::I32);
        let ret = w.pi(vec![i32_ty]);
        let entry = w.continuation(vec![i32_ty, ret], ContinuationFlags { is_external: true, ..Default::default() });
        let join = w.continuation(vec![i32_ty, i32_ty], Default::default());
        let left = w.continuation(vec![], Default::default());
        let right = w.continuation(vec![], Default::default());

        let x = w.param(entry, 0);
        let k = w.param(entry, 1);
        let cond = w.literal(ConstValue::Bool(true));
        let target = w.select(cond, left, right);
        w.jump(entry, target, vec![]).unwrap();

        let one = w.literal(ConstValue::I32(1));
        let two = w.literal(ConstValue::I32(2));
        w.jump(left, join, vec![x, one]).unwrap();
        w.jump(right, join, vec![x, two]).unwrap();

        let a = w.param(join, 0);
        let b = w.param(join, 1);
        let sum = w.arith(ArithOp::Add, a, b);
        w.jump(join, k, vec![sum]).unwrap();

        let folded = copy_prop(&mut w);
        assert_eq!(folded, 1);

        // no continuation anywhere should still take two parameters; the
        // residual join keeps only the genuinely divergent one.
        assert!(w.all_defs().all(|id| !matches!(&w.def(id).kind, nodus_core::DefKind::Continuation(d)
            if d.params.len() == 2 && !d.flags.is_external)));
    }

    #[test]
    fn leaves_divergent_parameter_alone() {
        let mut w = World::new(WorldConfig::default());
        let i32_ty = w.prim_ty(PrimTy::I32);
        let ret = w.pi(vec![i32_ty]);
        let entry = w.continuation(vec![i32_ty, ret], ContinuationFlags { is_external: true, ..Default::default() });
        let join = w.continuation(vec![i32_ty], Default::default());
        let left = w.continuation(vec![], Default::default());
        let right = w.continuation(vec![], Default::default());

        let x = w.param(entry, 0);
        let k = w.param(entry, 1);
        let cond = w.literal(ConstValue::Bool(true));
        let target = w.select(cond, left, right);
        w.jump(entry, target, vec![]).unwrap();

        let one = w.literal(ConstValue::I32(1));
        let two = w.literal(ConstValue::I32(2));
        w.jump(left, join, vec![one]).unwrap();
        w.jump(right, join, vec![two]).unwrap();

        let p = w.param(join, 0);
        w.jump(join, k, vec![p]).unwrap();

        assert_eq!(copy_prop(&mut w), 0);
    }
}
