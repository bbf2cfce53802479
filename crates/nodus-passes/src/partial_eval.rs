//! Partial evaluation, driven by the `Run`/`Hlt`
//! `EvalMarker` primops a front end (or an earlier pass) leaves in the
//! graph: `Run` wraps a jump's callee to force that call to be specialized
//! against its current actuals right away, `Hlt` wraps an individual
//! argument to keep it dynamic even while its call is being specialized.
//!
//! Grounded on `thorin::PartialEvaluator::eval`, simplified: the reference
//! chases call chains across newly-dropped bodies using a dirty-marked,
//! re-scoped `Scope` and falls back to the enclosing scope's
//! post-dominator when a call doesn't resolve to a known lambda. We only
//! peel the call directly named by each `Run` marker found in the
//! snapshot scope, which covers the common "inline this known call"
//! pattern the marker exists for without needing a mutable, re-converging
//! scope view.

use std::collections::HashMap;

use nodus_analysis::top_level_scopes;
use nodus_core::{DefId, DefKind, EvalMarker, PrimOpKind, World};
use tracing::debug;

use crate::{cleanup, drop_specialize};

/// Runs partial evaluation to completion: peels every `Run`-marked call in
/// every top-level scope, then strips whatever `Run`/`Hlt` markers survive
/// (a call that was never peeled just forwards its wrapped operand).
/// Returns the number of calls specialized.
pub fn partial_eval(world: &mut World) -> usize {
    cleanup::cleanup(world);

    let mut total = 0;
    for scope in top_level_scopes(world) {
        let mut cache: HashMap<Vec<DefId>, DefId> = HashMap::new();
        for cur in scope.continuations().collect::<Vec<_>>() {
            total += peel(world, &mut cache, cur);
        }
    }

    unwrap_remaining_markers(world);
    cleanup::cleanup(world);
    total
}

fn marker_of(world: &World, id: DefId) -> Option<EvalMarker> {
    match world.def(id).kind {
        DefKind::PrimOp(PrimOpKind::Eval(m)) => Some(m),
        _ => None,
    }
}

/// Chases a chain of `Run`-guarded calls starting at `cur`'s own jump,
/// re-specializing in place each time. Stops as soon as the jump no
/// longer starts with a `Run` marker, i.e. it resolves to ordinary code or
/// hits a `Hlt`/unknown callee.
fn peel(world: &mut World, cache: &mut HashMap<Vec<DefId>, DefId>, mut cur: DefId) -> usize {
    let mut count = 0;
    loop {
        let Some(jump) = world.continuation_data(cur).jump.clone() else { return count };
        let Some(EvalMarker::Run) = marker_of(world, jump.callee) else { return count };

        let target = world.def(jump.callee).op(0);
        if !world.def(target).kind.is_continuation() {
            debug!(?cur, "run marker does not resolve to a continuation, leaving in place");
            return count;
        }

        let mut indices = Vec::new();
        let mut actuals = Vec::new();
        for (i, &a) in jump.args.iter().enumerate() {
            if marker_of(world, a) == Some(EvalMarker::Hlt) {
                continue; // kept dynamic, not part of the specialization key
            }
            indices.push(i);
            actuals.push(a);
        }

        let mut key = Vec::with_capacity(actuals.len() + 1);
        key.push(target);
        key.extend_from_slice(&actuals);

        let dropped = match cache.get(&key) {
            Some(&d) => d,
            None => {
                let d = drop_specialize::drop(world, target, &indices, &actuals).expect("index/actual arity matches by construction");
                cache.insert(key, d);
                d
            }
        };

        let remaining: Vec<DefId> = jump.args.iter().enumerate().filter(|(i, _)| !indices.contains(i)).map(|(_, &a)| a).collect();
        if world.jump(cur, dropped, remaining).is_err() {
            return count;
        }
        count += 1;
    }
}

fn unwrap_remaining_markers(world: &mut World) {
    let markers: Vec<DefId> = world.all_defs().filter(|&id| matches!(world.def(id).kind, DefKind::PrimOp(PrimOpKind::Eval(_)))).collect();
    for m in markers {
        let inner = world.def(m).op(0);
        world.replace(m, inner);
    }
}
