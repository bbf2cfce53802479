use nodus_core::DefId;
use thiserror::Error;

/// Degenerate analysis inputs a pass should log-and-skip rather than
/// abort a whole run over.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("def {0} is not a continuation, cannot be a scope entry")]
    NotAContinuation(DefId),

    #[error("scope has no entry")]
    EmptyScope,

    #[error("continuation {0} is unreachable from the scope entry; no dominator")]
    Unreachable(DefId),
}

pub type AnalysisResult<T> = Result<T, AnalysisError>;
