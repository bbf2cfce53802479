//! Continuation merging: when a continuation `c` has exactly one use
//! and that use is another
//! continuation `pred` jumping directly to `c` as its callee, `c`'s block
//! can be folded into `pred` by substituting `pred`'s jump arguments for
//! `c`'s parameters and re-pointing `pred` at `c`'s own jump target. This
//! is the CPS analogue of straight-line basic-block fusion and is the
//! cleanup `lower2cff`/`partial_eval` run between specialization rounds to
//! keep the graph from accumulating single-entry trampoline blocks.
//!
//! Folding `c` away leaves its node and the now-dangling edge into `pred`
//! as graph garbage; a subsequent `World::cleanup()` call collects it, so
//! this pass never removes nodes itself.

use nodus_core::{DefId, DefKind, World};
use tracing::trace;

/// Runs one merge pass over every continuation, repeating until no more
/// merges apply. Returns the number of continuations folded away.
pub fn merge_lambdas(world: &mut World) -> usize {
    let mut total = 0;
    loop {
        let merged = merge_once(world);
        if merged == 0 {
            return total;
        }
        total += merged;
    }
}

fn merge_once(world: &mut World) -> usize {
    let mut candidates: Vec<DefId> = world
        .all_defs()
        .filter(|&id| matches!(&world.def(id).kind, DefKind::Continuation(d) if !d.flags.is_external && !d.flags.is_intrinsic))
        .collect();
    candidates.sort();

    let mut count = 0;
    for c in candidates {
        if world.try_def(c).is_none() {
            continue; // already folded away earlier this pass
        }
        let Some((pred, args)) = sole_direct_caller(world, c) else {
            continue;
        };
        let params = world.params(c).to_vec();
        if params.len() != args.len() {
            continue;
        }

        for (&p, &a) in params.iter().zip(args.iter()) {
            world.replace(p, a);
        }

        let target = world.continuation_data(c).jump.clone();
        if let Some(jump) = target {
            let _ = world.jump(pred, jump.callee, jump.args.into_vec());
            trace!(folded = %c, into = %pred, "merge_lambdas");
            count += 1;
        }
    }
    count
}

/// If `c`'s only use is as the callee of some continuation `pred`'s jump
/// (never as an argument, and never used twice), returns `(pred, args)`.
fn sole_direct_caller(world: &World, c: DefId) -> Option<(DefId, Vec<DefId>)> {
    let uses = world.uses(c);
    if uses.len() != 1 {
        return None;
    }
    let pred = uses[0];
    let data = match &world.def(pred).kind {
        DefKind::Continuation(d) => d,
        _ => return None,
    };
    let jump = data.jump.as_ref()?;
    if jump.callee != c {
        return None;
    }
    Some((pred, jump.args.to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodus_core::{ArithOp, ContinuationFlags, ConstValue, PrimTy, WorldConfig};

    #[test]
    fn folds_single_use_continuation_into_its_sole_caller() {
        let mut w = World::new(WorldConfig::default());
        let i32_ty = w.prim_ty(PrimTy::I32);
        let ret = w.pi(vec![i32_ty]);
        let entry = w.continuation(vec![i32_ty, ret], ContinuationFlags { is_external: true, ..Default::default() });
        let mid = w.continuation(vec![i32_ty], Default::default());

        let x = w.param(entry, 0);
        let k = w.param(entry, 1);
        w.jump(entry, mid, vec![x]).unwrap();

        let y = w.param(mid, 0);
        let one = w.literal(ConstValue::I32(1));
        let y_plus_1 = w.arith(ArithOp::Add, y, one);
        w.jump(mid, k, vec![y_plus_1]).unwrap();

        let folded = merge_lambdas(&mut w);
        assert_eq!(folded, 1);

        // entry now jumps straight to k, with x substituted for y in the
        // folded arithmetic.
        let data = w.continuation_data(entry);
        let jump = data.jump.as_ref().unwrap();
        assert_eq!(jump.callee, k);
        assert_eq!(jump.args[0], y_plus_1);
        // the operand that used to be `y` is now `x`.
        assert_eq!(w.def(y_plus_1).op(0), x);
    }

    #[test]
    fn leaves_multi_use_continuation_alone() {
        let mut w = World::new(WorldConfig::default());
        let i32_ty = w.prim_ty(PrimTy::I32);
        let ret = w.pi(vec![i32_ty]);
        let entry = w.continuation(vec![i32_ty, i32_ty, ret], ContinuationFlags { is_external: true, ..Default::default() });
        let shared = w.continuation(vec![i32_ty], Default::default());

        let a = w.param(entry, 0);
        let b = w.param(entry, 1);
        let k = w.param(entry, 2);
        let left = w.continuation(vec![], Default::default());
        let right = w.continuation(vec![], Default::default());
        w.jump(left, shared, vec![a]).unwrap();
        w.jump(right, shared, vec![b]).unwrap();
        w.jump(entry, k, vec![a]).unwrap(); // keep entry well-formed

        assert_eq!(merge_lambdas(&mut w), 0);
    }
}
