//! Pass-level entry points over `World`'s DCE/UCE primitives. The
//! primitives themselves live on `World` since every other pass
//! driver loop needs to call them between iterations; this module is the
//! stand-alone "just clean up" pass plus a couple of named convenience
//! wrappers used in tests/tooling to observe each half in isolation.

use nodus_core::World;
use tracing::info;

/// Dead-code elimination: sweep every primop/literal/param unreachable by
/// operand edges from an external or intrinsic continuation.
pub fn dce(world: &mut World) -> usize {
    let n = world.dce();
    info!(removed = n, "dce");
    n
}

/// Unreachable-code elimination: sweep every continuation unreachable by
/// jump edges from an external or intrinsic continuation.
pub fn uce(world: &mut World) -> usize {
    let n = world.uce();
    info!(removed = n, "uce");
    n
}

/// `dce` then `uce`, re-entrant until the graph stops shrinking.
pub fn cleanup(world: &mut World) {
    world.cleanup();
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use nodus_core::{ArithOp, ContinuationFlags, ConstValue, DefId, DefKind, PrimTy, WorldConfig};

    #[test]
    fn cleanup_removes_dead_mul_and_unreachable_block() {
        let mut w = World::new(WorldConfig::default());
        let i32_ty = w.prim_ty(PrimTy::I32);
        let ret = w.pi(vec![i32_ty]);
        let entry = w.continuation(vec![i32_ty, ret], ContinuationFlags { is_external: true, ..Default::default() });
        let x = w.param(entry, 0);
        let k = w.param(entry, 1);

        // A dead multiply: computed but never used by the jump.
        let two = w.literal(ConstValue::I32(2));
        let _dead = w.arith(nodus_core::ArithOp::Mul, x, two);

        // An unreachable block: never jumped to from anywhere.
        let _orphan = w.continuation(vec![i32_ty], Default::default());

        w.jump(entry, k, vec![x]).unwrap();

        let before = w.def_count();
        cleanup(&mut w);
        assert!(w.def_count() < before);
        assert!(w.try_def(_dead).is_none());
        assert!(w.try_def(_orphan).is_none());
        assert!(w.try_def(entry).is_some());
    }

    /// Every surviving node reachable from `roots` by operand, param, or
    /// jump edges.
    fn reachable_closure(world: &World, roots: &[DefId]) -> HashSet<DefId> {
        let mut seen = HashSet::new();
        let mut stack: Vec<DefId> = roots.to_vec();
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            stack.extend(world.def(id).ops_vec());
            if world.def(id).kind.is_continuation() {
                let data = world.continuation_data(id);
                stack.extend(data.params.iter().copied());
                if let Some(jump) = &data.jump {
                    stack.push(jump.callee);
                    stack.extend(jump.args.iter().copied());
                }
            }
        }
        seen
    }

    proptest::proptest! {
        /// After `cleanup`, every Def is reachable from some external
        /// continuation by operand or jump edges.
        #[test]
        fn cleanup_leaves_only_externally_reachable_defs(dead_chain_len in 0u32..5) {
            let mut w = world_with_entry();

            let mut acc = w.literal(ConstValue::I32(1));
            for i in 0..dead_chain_len {
                let lit = w.literal(ConstValue::I32(i as i32 + 2));
                acc = w.arith(ArithOp::Add, acc, lit);
            }
            let _ = acc; // never referenced by the entry's jump: pure dead weight

            cleanup(&mut w);

            let externals: Vec<DefId> = w
                .all_defs()
                .filter(|&id| matches!(&w.def(id).kind, DefKind::Continuation(d) if d.flags.is_external || d.flags.is_intrinsic))
                .collect();
            let reachable = reachable_closure(&w, &externals);
            for id in w.all_defs() {
                proptest::prop_assert!(reachable.contains(&id));
            }
        }
    }

    fn world_with_entry() -> World {
        let mut w = World::new(WorldConfig::default());
        let i32_ty = w.prim_ty(PrimTy::I32);
        let ret = w.pi(vec![i32_ty]);
        let entry = w.continuation(vec![i32_ty, ret], ContinuationFlags { is_external: true, ..Default::default() });
        let x = w.param(entry, 0);
        let k = w.param(entry, 1);
        w.jump(entry, k, vec![x]).unwrap();
        w
    }
}
