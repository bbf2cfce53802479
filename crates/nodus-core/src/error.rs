use thiserror::Error;

use crate::id::DefId;

/// Contract violations a frontend can trigger while driving the builder
/// surface. Internal invariants the `World` itself is responsible for
/// upholding are asserted instead, carrying the offending Def's generation
/// id, and are not routed through this type.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("def {0} not found")]
    DefNotFound(DefId),

    #[error("type {0} is not a type (kind mismatch)")]
    NotAType(DefId),

    #[error("continuation {0} has no jump yet")]
    NoJump(DefId),

    #[error("operand count mismatch: expected {expected}, got {got}")]
    OperandCountMismatch { expected: usize, got: usize },

    #[error("operand {index} out of bounds for def {def} with {len} operands")]
    OperandOutOfBounds { def: DefId, index: usize, len: usize },

    #[error("named sigma {0} cannot be unified structurally")]
    NominalNeverUnified(DefId),

    #[error("cyclic operand graph detected through non-nominal def {0}")]
    CyclicOperands(DefId),

    #[error("duplicate named type {0:?}")]
    DuplicateNamedType(String),
}

pub type CoreResult<T> = Result<T, CoreError>;
