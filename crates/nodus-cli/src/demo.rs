//! Builds a small demonstration program directly through the builder API,
//! standing in for the surface-language frontend this crate deliberately
//! does not implement. The shape is chosen to give the pipeline something
//! real to chew on: a conditional branch, a `Run`-guarded call to a known
//! function, and a stack slot that never escapes its block.
//!
//! ```text
//! square(n, k2) = k2(n * n)
//!
//! entry(mem0, cond, x, k):
//!   mem1 = store(mem0, slot, x)
//!   left()  = run!square(load(mem1, slot), join)
//!   right() = join(x)
//!   select(cond, left, right)()
//!   join(r) = k(r)
//! ```
//!
//! `mem2reg` folds the store/load round trip into a direct use of `x`, and
//! `lower2cff`/`partial_eval` peel the `Run`-guarded call into a jump to a
//! specialized residual of `square` once that load has resolved to a
//! concrete value.

use nodus_core::{ArithOp, ContinuationFlags, DefId, EvalMarker, PrimTy, World};

pub fn build(world: &mut World) -> DefId {
    let i32_ty = world.prim_ty(PrimTy::I32);
    let bool_ty = world.prim_ty(PrimTy::Bool);
    let mem_ty = world.prim_ty(PrimTy::I64); // opaque memory-token stand-in
    let ret = world.pi(vec![i32_ty]);

    let square = world.continuation(vec![i32_ty, ret], Default::default());
    let n = world.param(square, 0);
    let k2 = world.param(square, 1);
    let squared = world.arith(ArithOp::Mul, n, n);
    world.jump(square, k2, vec![squared]).unwrap();

    let entry = world.continuation(
        vec![mem_ty, bool_ty, i32_ty, ret],
        ContinuationFlags { is_external: true, ..Default::default() },
    );
    let mem0 = world.param(entry, 0);
    let cond = world.param(entry, 1);
    let x = world.param(entry, 2);
    let k = world.param(entry, 3);

    let join = world.continuation(vec![i32_ty], Default::default());
    let left = world.continuation(vec![], Default::default());
    let right = world.continuation(vec![], Default::default());

    let slot = world.slot_addr(i32_ty, 0);
    let mem1 = world.store(mem0, slot, x);
    let loaded = world.load(mem1, slot);
    let run_square = world.eval_marker(EvalMarker::Run, square);
    world.jump(left, run_square, vec![loaded, join]).unwrap();
    world.jump(right, join, vec![x]).unwrap();

    let r = world.param(join, 0);
    world.jump(join, k, vec![r]).unwrap();

    let target = world.select(cond, left, right);
    world.jump(entry, target, vec![]).unwrap();

    entry
}
