//! Hash-consed, continuation-passing-style intermediate representation
//! core: the node universe (types, primops, literals, params,
//! continuations) and the `World` that canonicalizes and rewrites them.
//!
//! This crate deliberately knows nothing about a surface language, a
//! target backend, or persistence — see `nodus-analysis` for structural
//! analyses over a `World`'s graph and `nodus-passes` for the
//! transformation passes built on top of those analyses.

pub mod continuation;
pub mod def;
pub mod diagnostics;
pub mod error;
pub mod id;
pub mod ops;
pub mod types;
pub mod world;

pub use def::{ContinuationData, ContinuationFlags, Def, DefKind, Jump};
pub use diagnostics::{Diagnostic, Diagnostics, Severity};
pub use error::{CoreError, CoreResult};
pub use id::DefId;
pub use ops::{ArithOp, ConvOp, EvalMarker, PrimOpKind, RelOp};
pub use types::{ConstValue, PrimTy};
pub use world::{World, WorldConfig};
