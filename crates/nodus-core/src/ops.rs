use serde::{Deserialize, Serialize};

/// Binary arithmetic operators, signed/unsigned variants split out where the
/// operation's result depends on signedness (matching LLVM's lowering,
/// which documents the split per-op).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    SDiv,
    UDiv,
    SRem,
    URem,
    And,
    Or,
    Xor,
    Shl,
    LShr,
    AShr,
}

impl ArithOp {
    pub fn is_commutative(self) -> bool {
        matches!(self, ArithOp::Add | ArithOp::Mul | ArithOp::And | ArithOp::Or | ArithOp::Xor)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelOp {
    Eq,
    Ne,
    SLt,
    SLe,
    SGt,
    SGe,
    ULt,
    ULe,
    UGt,
    UGe,
}

impl RelOp {
    pub fn is_commutative(self) -> bool {
        matches!(self, RelOp::Eq | RelOp::Ne)
    }

    pub fn negate(self) -> RelOp {
        match self {
            RelOp::Eq => RelOp::Ne,
            RelOp::Ne => RelOp::Eq,
            RelOp::SLt => RelOp::SGe,
            RelOp::SLe => RelOp::SGt,
            RelOp::SGt => RelOp::SLe,
            RelOp::SGe => RelOp::SLt,
            RelOp::ULt => RelOp::UGe,
            RelOp::ULe => RelOp::UGt,
            RelOp::UGt => RelOp::ULe,
            RelOp::UGe => RelOp::ULt,
        }
    }
}

/// Conversion operators between scalar primitive types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConvOp {
    SExt,
    ZExt,
    Trunc,
    S2F,
    U2F,
    F2S,
    F2U,
    FExt,
    FTrunc,
    Bitcast,
}

/// Markers used only during partial evaluation: `Run` forces specialization
/// of the call it guards, `Hlt` forces the guarded operand to be treated as
/// unknown (`anydsl`'s `EvalOp` subclasses). Both are stripped in the final
/// cleanup sweep of `partial_eval`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EvalMarker {
    Run,
    Hlt,
}

/// The operation carried by a `DefKind::PrimOp` node. Operand order for
/// each variant is documented at the construction site in `world.rs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrimOpKind {
    Arith(ArithOp),
    Rel(RelOp),
    Conv(ConvOp),
    /// Build a tuple value from its operands.
    Tuple,
    /// Extract element `index` from a tuple/sigma-typed operand.
    Extract { index: u32 },
    /// Functional update: tuple operand, new value for element `index`.
    Insert { index: u32 },
    /// `cond ? tval : fval` as a value-level (non-branching) operation.
    Select,
    /// Address of a stack slot of the operand type; pinned early by
    /// placement.
    SlotAddr,
    Load,
    Store,
    /// Enter a stack frame (memory token in, memory token + frame out);
    /// pinned early by placement.
    Enter,
    /// Leave a stack frame; pinned late by placement.
    Leave,
    Eval(EvalMarker),
    /// Value-level conditional branch target selection, used by
    /// `vectorize` to merge divergent control flow (distinct from the
    /// control-flow `Branch` continuation jump).
    Branch,
}

impl PrimOpKind {
    /// Primops placement must never float past their pinned position.
    pub fn is_pinned_early(self) -> bool {
        matches!(self, PrimOpKind::SlotAddr | PrimOpKind::Enter)
    }

    pub fn is_pinned_late(self) -> bool {
        matches!(self, PrimOpKind::Leave)
    }

    pub fn is_commutative(self) -> bool {
        match self {
            PrimOpKind::Arith(op) => op.is_commutative(),
            PrimOpKind::Rel(op) => op.is_commutative(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negate_is_involutive() {
        for op in [
            RelOp::Eq,
            RelOp::Ne,
            RelOp::SLt,
            RelOp::SLe,
            RelOp::SGt,
            RelOp::SGe,
            RelOp::ULt,
            RelOp::ULe,
            RelOp::UGt,
            RelOp::UGe,
        ] {
            assert_eq!(op.negate().negate(), op);
        }
    }

    #[test]
    fn pinning_classification() {
        assert!(PrimOpKind::SlotAddr.is_pinned_early());
        assert!(PrimOpKind::Enter.is_pinned_early());
        assert!(PrimOpKind::Leave.is_pinned_late());
        assert!(!PrimOpKind::Load.is_pinned_early());
    }

    #[test]
    fn commutativity() {
        assert!(PrimOpKind::Arith(ArithOp::Add).is_commutative());
        assert!(!PrimOpKind::Arith(ArithOp::Sub).is_commutative());
        assert!(PrimOpKind::Rel(RelOp::Eq).is_commutative());
    }
}
