//! Transformation passes over a `nodus_core::World`, built on
//! `nodus_analysis`'s scope/CFG/dominance/placement machinery: dead/
//! unreachable-code cleanup, continuation merging, closure elimination
//! ("lowering to CFF"), partial evaluation, SSA slot promotion, SIMD
//! lane-width vectorization, and copy propagation.
//!
//! Each pass module exposes a single driver function that runs to its own
//! fixpoint; `nodus-cli` sequences them into the end-to-end pipeline.

pub mod cleanup;
pub mod copy_prop;
pub mod drop_specialize;
pub mod error;
pub mod lower2cff;
pub mod mem2reg;
pub mod merge_lambdas;
pub mod partial_eval;
pub mod vectorize;

pub use cleanup::{cleanup, dce, uce};
pub use copy_prop::copy_prop;
pub use error::{PassError, PassResult};
pub use lower2cff::lower2cff;
pub use mem2reg::mem2reg;
pub use merge_lambdas::merge_lambdas;
pub use partial_eval::partial_eval;
pub use vectorize::vectorize;
