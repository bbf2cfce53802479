//! "Drop": clone a continuation's scope while binding a subset of its
//! parameters to fixed actual values (the reference implementation's
//! `World::drop(lambda, indices, with)`). `lower2cff` uses this to turn a
//! call whose higher-order actuals are statically known into a jump to a
//! specialized first-order copy; `partial_eval` uses it to specialize a
//! loop header against the constants a `Run` marker proves available at a
//! particular call site.
//!
//! The clone covers the whole scope (every continuation reachable from the
//! entry by its jump graph), not just the entry block, so loop headers and
//! internal basic blocks are specialized consistently with their entry.

use std::collections::HashMap;

use nodus_analysis::Scope;
use nodus_core::{ContinuationFlags, DefId, DefKind, PrimOpKind, World};

use crate::error::{PassError, PassResult};

/// Clones the scope rooted at `cont`. `indices[i]` names a parameter
/// position of `cont` itself to bind to `with[i]`; every other parameter
/// (on `cont` or on any other continuation in the scope) is carried over
/// as a fresh parameter on its clone. Returns the id of the cloned entry.
pub fn drop(world: &mut World, cont: DefId, indices: &[usize], with: &[DefId]) -> PassResult<DefId> {
    if indices.len() != with.len() {
        return Err(PassError::ArityMismatch(cont));
    }
    if !world.def(cont).kind.is_continuation() {
        return Err(PassError::NotAContinuation(cont));
    }
    let scope = Scope::new(world, cont)?;
    let fixed: HashMap<usize, DefId> = indices.iter().copied().zip(with.iter().copied()).collect();
    let conts: Vec<DefId> = scope.continuations().collect();

    // Pass 1: pre-allocate a clone of every continuation in the scope so
    // internal (including back-edge) jumps have somewhere to point once
    // bodies are filled in below.
    let mut clone_of: HashMap<DefId, DefId> = HashMap::new();
    for &c in &conts {
        let flags = if c == cont { ContinuationFlags::default() } else { world.continuation_data(c).flags };
        let kept_tys: Vec<DefId> = world
            .params(c)
            .to_vec()
            .iter()
            .enumerate()
            .filter(|&(i, _)| !(c == cont && fixed.contains_key(&i)))
            .map(|(_, &p)| world.def(p).ty)
            .collect();
        clone_of.insert(c, world.continuation(kept_tys, flags));
    }

    // Pass 2: substitution from every original param to either its fixed
    // actual or its clone's corresponding fresh param.
    let mut subst: HashMap<DefId, DefId> = HashMap::new();
    for &c in &conts {
        let new_c = clone_of[&c];
        let mut next = 0usize;
        for (i, &p) in world.params(c).to_vec().iter().enumerate() {
            if c == cont {
                if let Some(&actual) = fixed.get(&i) {
                    subst.insert(p, actual);
                    continue;
                }
            }
            subst.insert(p, world.param(new_c, next));
            next += 1;
        }
    }

    // Pass 3: clone every primop in gid order. A primop's gid is always
    // greater than every one of its operands', so by the time we reach it
    // every in-scope operand already has a substitution entry; operands
    // from outside the scope are shared as-is.
    let mut primops: Vec<DefId> = scope.defs().filter(|&d| matches!(world.def(d).kind, DefKind::PrimOp(_))).collect();
    primops.sort_by_key(|&d| world.def(d).gid);
    for def in primops {
        let kind = match world.def(def).kind {
            DefKind::PrimOp(k) => k,
            _ => unreachable!(),
        };
        let ty = resolve(&subst, world.def(def).ty);
        let ops: Vec<DefId> = world.def(def).ops_vec().iter().map(|&o| resolve(&subst, o)).collect();
        let new_id = clone_primop(world, kind, ty, &ops);
        subst.insert(def, new_id);
    }

    // Pass 4: rewire every clone's jump through the substitution.
    for &c in &conts {
        let new_c = clone_of[&c];
        if let Some(jump) = world.continuation_data(c).jump.clone() {
            let callee = resolve(&subst, jump.callee);
            let args: Vec<DefId> = jump.args.iter().map(|&a| resolve(&subst, a)).collect();
            world.jump(new_c, callee, args)?;
        }
    }

    Ok(clone_of[&cont])
}

fn resolve(subst: &HashMap<DefId, DefId>, id: DefId) -> DefId {
    subst.get(&id).copied().unwrap_or(id)
}

/// Rebuilds a primop of the given `kind` against a fresh `ty`/`ops`,
/// dispatching to the matching `World` builder. Shared with `vectorize`,
/// which uses it to rebuild a primop at a widened lane count.
pub(crate) fn clone_primop(world: &mut World, kind: PrimOpKind, ty: DefId, ops: &[DefId]) -> DefId {
    match kind {
        PrimOpKind::Arith(op) => world.arith(op, ops[0], ops[1]),
        PrimOpKind::Rel(op) => world.rel(op, ops[0], ops[1]),
        PrimOpKind::Conv(op) => world.convert(op, ty, ops[0]),
        PrimOpKind::Tuple => world.tuple(ops.to_vec()),
        PrimOpKind::Extract { index } => world.extract(ops[0], index),
        PrimOpKind::Insert { index } => world.insert_elem(ops[0], index, ops[1]),
        PrimOpKind::Select => world.select(ops[0], ops[1], ops[2]),
        PrimOpKind::Branch => world.branch(ops[0], ops[1], ops[2]),
        PrimOpKind::SlotAddr => {
            let addr_space = match world.def(ty).kind {
                DefKind::Pointer { addr_space, .. } => addr_space,
                _ => 0,
            };
            world.slot_addr(ops[0], addr_space)
        }
        PrimOpKind::Load => world.load(ops[0], ops[1]),
        PrimOpKind::Store => world.store(ops[0], ops[1], ops[2]),
        PrimOpKind::Enter => world.enter(ops[0]),
        PrimOpKind::Leave => world.leave(ops[0]),
        PrimOpKind::Eval(marker) => world.eval_marker(marker, ops[0]),
    }
}
