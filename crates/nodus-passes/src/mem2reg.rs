//! Promotes non-escaping stack slots to SSA values, loosely following
//! Braun/Buchwald/Hack/Leißa/Mallon/Zwinkau's simple SSA
//! construction as referenced by `ssa_constr.h`'s "sloxy"/"phixy"
//! (slot-proxy / phi-proxy) terminology, adapted to replace their
//! per-pass `rewrite`/`analyze` hooks with a direct walk over each
//! memory-token chain now that the whole graph is already built.
//!
//! `World`'s memory effects are already a single-assignment chain by
//! construction — each `Store` consumes one memory token and produces the
//! next — so `get_val` only needs to walk that chain backward looking for
//! the nearest `Store` to the same slot. The one piece of real SSA
//! construction this keeps is crossing a block boundary through a single
//! predecessor: a `Param` representing an incoming memory token resolves
//! by recursing into whatever value that predecessor's jump actually
//! passed. A join with more than one predecessor would need a new phi
//! parameter inserted on the continuation (and threaded through every
//! predecessor's jump); `World` has no operation to grow a continuation's
//! parameter list after construction, so such a slot is conservatively
//! left in memory rather than promoted.

use std::collections::HashSet;

use nodus_analysis::{top_level_scopes, Scope};
use nodus_core::{DefId, DefKind, PrimOpKind, World};
use tracing::trace;

/// Promotes every non-escaping slot's loads to the value last stored to
/// it, in every top-level scope. Returns the number of loads replaced.
pub fn mem2reg(world: &mut World) -> usize {
    let mut total = 0;
    for scope in top_level_scopes(world) {
        total += promote_scope(world, &scope);
    }
    total
}

fn promote_scope(world: &mut World, scope: &Scope) -> usize {
    let slots: Vec<DefId> = scope
        .defs()
        .filter(|&d| matches!(world.def(d).kind, DefKind::PrimOp(PrimOpKind::SlotAddr)))
        .filter(|&s| is_non_escaping(world, s))
        .collect();

    let loads: Vec<DefId> = scope.defs().filter(|&d| matches!(world.def(d).kind, DefKind::PrimOp(PrimOpKind::Load))).collect();

    let mut count = 0;
    for load in loads {
        let ptr = world.def(load).op(1);
        if !slots.contains(&ptr) {
            continue;
        }
        let mem = world.def(load).op(0);
        let mut visiting = HashSet::new();
        if let Some(val) = get_val(world, scope, mem, ptr, &mut visiting) {
            trace!(?load, ?val, "mem2reg: promoted load");
            world.replace(load, val);
            count += 1;
        }
    }
    count
}

/// A slot "escapes" if its address is ever used for anything besides
/// being the `ptr` operand of a `Load` or `Store` in the same scope
/// (e.g. stored into memory itself, or passed as a plain argument) — such
/// a slot's identity might leak past this analysis's reach, so it has to
/// stay a real memory location.
fn is_non_escaping(world: &World, slot: DefId) -> bool {
    world.uses(slot).into_iter().all(|user| match world.def(user).kind {
        DefKind::PrimOp(PrimOpKind::Load) => world.def(user).op(1) == slot,
        DefKind::PrimOp(PrimOpKind::Store) => world.def(user).op(1) == slot,
        _ => false,
    })
}

fn get_val(world: &World, scope: &Scope, mem: DefId, slot: DefId, visiting: &mut HashSet<DefId>) -> Option<DefId> {
    if !visiting.insert(mem) {
        return None; // a mem cycle we can't resolve without phi insertion
    }
    let result = match world.def(mem).kind {
        DefKind::PrimOp(PrimOpKind::Store) => {
            let stored_ptr = world.def(mem).op(1);
            if stored_ptr == slot {
                Some(world.def(mem).op(2))
            } else {
                get_val(world, scope, world.def(mem).op(0), slot, visiting)
            }
        }
        // Extracting the memory component out of a fresh `Enter` frame: no
        // store has happened since, so there is nothing to propagate.
        DefKind::PrimOp(PrimOpKind::Extract { index: 0 }) => None,
        DefKind::Param { cont, .. } => {
            let preds = scope.preds(world, cont);
            if preds.len() == 1 {
                let pred = preds[0];
                let jump = world.continuation_data(pred).jump.as_ref()?;
                let index = world.params(cont).iter().position(|&p| p == mem)?;
                let arg = if jump.callee == cont { jump.args.get(index).copied()? } else { return None };
                get_val(world, scope, arg, slot, visiting)
            } else {
                None // join point: would need a new phi parameter
            }
        }
        _ => None,
    };
    visiting.remove(&mem);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodus_core::{ContinuationFlags, ConstValue, PrimTy, WorldConfig};

    #[test]
    fn promotes_load_after_store_in_the_same_block() {
        let mut w = World::new(WorldConfig::default());
        let i32_ty = w.prim_ty(PrimTy::I32);
        let ret = w.pi(vec![i32_ty]);
        let mem_ty = w.prim_ty(PrimTy::I64); // stand-in opaque memory-token type
        let entry = w.continuation(vec![mem_ty, ret], ContinuationFlags { is_external: true, ..Default::default() });
        let mem0 = w.param(entry, 0);
        let k = w.param(entry, 1);

        let slot = w.slot_addr(i32_ty, 0);
        let forty_two = w.literal(ConstValue::I32(42));
        let mem1 = w.store(mem0, slot, forty_two);
        let loaded = w.load(mem1, slot);
        w.jump(entry, k, vec![loaded]).unwrap();

        let scope = Scope::new(&w, entry).unwrap();
        let n = promote_scope(&mut w, &scope);
        assert_eq!(n, 1);

        let jump = w.continuation_data(entry).jump.clone().unwrap();
        assert_eq!(jump.args[0], forty_two);
    }

    #[test]
    fn leaves_join_point_slot_in_memory() {
        let mut w = World::new(WorldConfig::default());
        let i32_ty = w.prim_ty(PrimTy::I32);
        let bool_ty = w.prim_ty(PrimTy::Bool);
        let ret = w.pi(vec![i32_ty]);
        let mem_ty = w.prim_ty(PrimTy::I64);
        let entry = w.continuation(vec![mem_ty, bool_ty, ret], ContinuationFlags { is_external: true, ..Default::default() });
        let join = w.continuation(vec![mem_ty], Default::default());
        let left = w.continuation(vec![], Default::default());
        let right = w.continuation(vec![], Default::default());

        let mem0 = w.param(entry, 0);
        let cond = w.param(entry, 1);
        let k = w.param(entry, 2);
        let slot = w.slot_addr(i32_ty, 0);
        let one = w.literal(ConstValue::I32(1));
        let two = w.literal(ConstValue::I32(2));
        let mem_l = w.store(mem0, slot, one);
        let mem_r = w.store(mem0, slot, two);
        w.jump(left, join, vec![mem_l]).unwrap();
        w.jump(right, join, vec![mem_r]).unwrap();
        // a value-level select over the two block targets stands in for a
        // conditional branch, which is enough to pull both `left` and
        // `right` (and therefore both of `join`'s predecessors) into scope.
        let target = w.select(cond, left, right);
        w.jump(entry, target, vec![]).unwrap();

        let mem_join = w.param(join, 0);
        let loaded = w.load(mem_join, slot);
        w.jump(join, k, vec![loaded]).unwrap();

        let scope = Scope::new(&w, entry).unwrap();
        let n = promote_scope(&mut w, &scope);
        assert_eq!(n, 0);
    }
}
