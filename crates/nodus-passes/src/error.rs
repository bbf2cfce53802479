use nodus_core::DefId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PassError {
    #[error("expected {0} to be a continuation")]
    NotAContinuation(DefId),

    #[error("cannot specialize {0}: parameter/actual arity mismatch")]
    ArityMismatch(DefId),

    #[error(transparent)]
    Analysis(#[from] nodus_analysis::AnalysisError),

    #[error(transparent)]
    Core(#[from] nodus_core::CoreError),
}

pub type PassResult<T> = Result<T, PassError>;
