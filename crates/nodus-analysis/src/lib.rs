//! Structural analyses over a `nodus_core::World`: scope extraction,
//! control-flow graphs, dominator/post-dominator trees, loop nesting, and
//! the instruction placement/scheduling algorithm built on top of them.

pub mod cfg;
pub mod dominators;
pub mod error;
pub mod looptree;
pub mod placement;
pub mod scope;

pub use cfg::{Cfg, CfgNode};
pub use dominators::DomTree;
pub use error::{AnalysisError, AnalysisResult};
pub use looptree::LoopTree;
pub use placement::{place, Placement};
pub use scope::{top_level_scopes, Scope};
