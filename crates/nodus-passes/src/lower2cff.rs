//! Closure elimination ("lowering to CFF"): every call site
//! that hands a concrete continuation to a higher-order parameter gets
//! its own specialized copy of the callee with that parameter baked in,
//! so that by fixpoint every surviving continuation is first-order and can
//! be compiled as an ordinary basic block or plain function.
//!
//! Grounded closely on `anydsl2::CFFLowering`: a continuation is a
//! candidate if it takes at least one parameter and is not already a
//! basic block, and — for `Returning` continuations specifically — is not
//! itself a top-level entry point (a top-level `Returning` continuation
//! *is* the function; there's nothing to specialize it into).

use std::collections::{HashMap, HashSet};

use nodus_analysis::{top_level_scopes, Scope};
use nodus_core::continuation::{classify, ContinuationClass};
use nodus_core::{DefId, World};

use crate::drop_specialize;
use crate::{cleanup, merge_lambdas};

/// Runs `lower2cff` to a fixpoint: repeated rounds of specialization
/// followed by `merge_lambdas` + `cleanup`, stopping once a round
/// specializes nothing. Returns the total number of continuations
/// specialized across all rounds.
pub fn lower2cff(world: &mut World) -> usize {
    let mut total = 0;
    loop {
        let todo = run_round(world);
        merge_lambdas::merge_lambdas(world);
        cleanup::cleanup(world);
        total += todo;
        if todo == 0 {
            break;
        }
    }
    total
}

fn run_round(world: &mut World) -> usize {
    let top_scopes = top_level_scopes(world);
    let top: HashSet<DefId> = top_scopes.iter().map(|s| s.entry()).collect();

    let mut todo: Vec<DefId> = Vec::new();
    for scope in &top_scopes {
        for c in scope.continuations() {
            if world.params(c).is_empty() {
                continue;
            }
            match classify(world, c) {
                ContinuationClass::BasicBlock => continue,
                ContinuationClass::Returning if top.contains(&c) => continue,
                _ => todo.push(c),
            }
        }
    }

    let count = todo.len();
    for lambda in todo {
        transform(world, lambda);
    }
    count
}

/// Specializes every external call site of `lambda` that supplies a
/// concrete value for one of its higher-order parameters.
fn transform(world: &mut World, lambda: DefId) {
    let Ok(scope) = Scope::new(world, lambda) else { return };

    let higher_order: Vec<usize> = world
        .params(lambda)
        .to_vec()
        .iter()
        .enumerate()
        .filter(|&(_, &p)| world.order(world.def(p).ty) >= 1)
        .map(|(i, _)| i)
        .collect();
    if higher_order.is_empty() {
        return;
    }

    let callers: Vec<DefId> = world
        .uses(lambda)
        .into_iter()
        .filter(|&u| world.def(u).kind.is_continuation() && !scope.contains_cont(u))
        .filter(|&u| world.continuation_data(u).jump.as_ref().is_some_and(|j| j.callee == lambda))
        .collect();

    let mut cache: HashMap<Vec<DefId>, DefId> = HashMap::new();
    for caller in callers {
        let args = world.continuation_data(caller).jump.as_ref().unwrap().args.clone();
        let with: Vec<DefId> = higher_order.iter().map(|&i| args[i]).collect();

        let target = *cache.entry(with.clone()).or_insert_with(|| drop_specialize::drop(world, lambda, &higher_order, &with).expect("arity checked above"));

        let remaining: Vec<DefId> = args.iter().enumerate().filter(|(i, _)| !higher_order.contains(i)).map(|(_, &a)| a).collect();
        let _ = world.jump(caller, target, remaining);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodus_core::{ArithOp, ContinuationFlags, WorldConfig};

    /// `top(k) = h(double, k)` where `h(f, k) = f(1, k)`; both of `h`'s
    /// parameters are higher-order (a function and a return continuation),
    /// so `lower2cff` should clone `h` with the call site's actual
    /// arguments baked in, leaving `top` jumping straight to the
    /// specialized residual instead of through `h`.
    #[test]
    fn specializes_higher_order_parameters_to_call_site_actuals() {
        use nodus_core::{ConstValue, PrimTy};

        let mut w = World::new(WorldConfig::default());
        let i32_ty = w.prim_ty(PrimTy::I32);
        let ret = w.pi(vec![i32_ty]);
        let fn_ty = w.pi(vec![i32_ty, ret]);

        let h = w.continuation(vec![fn_ty, ret], Default::default());
        let f_param = w.param(h, 0);
        let k_param = w.param(h, 1);
        let one = w.literal(ConstValue::I32(1));
        w.jump(h, f_param, vec![one, k_param]).unwrap();

        let double = w.continuation(vec![i32_ty, ret], Default::default());
        let x = w.param(double, 0);
        let k2 = w.param(double, 1);
        let two = w.literal(ConstValue::I32(2));
        let doubled = w.arith(ArithOp::Mul, x, two);
        w.jump(double, k2, vec![doubled]).unwrap();

        let top = w.continuation(vec![ret], ContinuationFlags { is_external: true, ..Default::default() });
        let top_k = w.param(top, 0);
        w.jump(top, h, vec![double, top_k]).unwrap();

        let specialized = lower2cff(&mut w);
        assert!(specialized >= 1);

        let top_jump = w.continuation_data(top).jump.clone().unwrap();
        assert_ne!(top_jump.callee, h);
    }
}
