//! Classification of `DefKind::Continuation` nodes.
//!
//! A continuation is a basic block if every one of its parameters is
//! first-order (order 0); it is "returning" if it has exactly one
//! higher-order parameter and that parameter has order 1 (a single return
//! continuation, callable with the block's result). Everything else is a
//! general higher-order continuation (e.g. a loop header taking another
//! continuation as an argument).

use crate::id::DefId;
use crate::world::World;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContinuationClass {
    BasicBlock,
    Returning,
    Higher,
}

pub fn classify(world: &World, cont: DefId) -> ContinuationClass {
    let data = world.continuation_data(cont);
    let orders: Vec<u32> = data.params.iter().map(|&p| world.order(world.def(p).ty)).collect();
    let higher: Vec<u32> = orders.iter().copied().filter(|&o| o >= 1).collect();
    if higher.is_empty() {
        ContinuationClass::BasicBlock
    } else if higher.len() == 1 && higher[0] == 1 {
        ContinuationClass::Returning
    } else {
        ContinuationClass::Higher
    }
}

pub fn is_basic_block(world: &World, cont: DefId) -> bool {
    classify(world, cont) == ContinuationClass::BasicBlock
}

pub fn is_returning(world: &World, cont: DefId) -> bool {
    classify(world, cont) == ContinuationClass::Returning
}

pub fn is_intrinsic(world: &World, cont: DefId) -> bool {
    world.continuation_data(cont).flags.is_intrinsic
}

pub fn is_external(world: &World, cont: DefId) -> bool {
    world.continuation_data(cont).flags.is_external
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::WorldConfig;

    #[test]
    fn basic_block_has_no_higher_order_params() {
        let mut w = World::new(WorldConfig::default());
        let i32_ty = w.prim_ty(crate::types::PrimTy::I32);
        let bb = w.continuation(vec![i32_ty, i32_ty], Default::default());
        assert_eq!(classify(&w, bb), ContinuationClass::BasicBlock);
    }

    #[test]
    fn returning_continuation_has_one_order_one_param() {
        let mut w = World::new(WorldConfig::default());
        let i32_ty = w.prim_ty(crate::types::PrimTy::I32);
        let ret_ty = w.pi(vec![i32_ty]);
        let caller = w.continuation(vec![i32_ty, ret_ty], Default::default());
        assert_eq!(classify(&w, caller), ContinuationClass::Returning);
    }
}
