use std::cell::Cell;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::id::DefId;
use crate::ops::PrimOpKind;
use crate::types::{ConstValue, PrimTy};

/// A jump out of a continuation: `callee(args...)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jump {
    pub callee: DefId,
    pub args: SmallVec<[DefId; 4]>,
}

/// Flags distinguishing basic-block, returning, and callback continuations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ContinuationFlags {
    /// Never rewritten by a pass and never eliminated by DCE; e.g. the
    /// world's implicit halt continuation.
    pub is_intrinsic: bool,
    /// A GC root: `cleanup` never removes it even if unreachable from the
    /// entry.
    pub is_external: bool,
}

/// Mutable payload of a `DefKind::Continuation` node: its ordered parameters
/// and (once built) its single outgoing jump.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContinuationData {
    pub params: Vec<DefId>,
    pub jump: Option<Jump>,
    pub flags: ContinuationFlags,
}

/// The kind-specific payload of a [`Def`]. Type-algebra kinds
/// (`PrimType`..`TypeVar`) are themselves ordinary `Def`s so that a type can
/// be an operand of a value the same way a value can be an operand of
/// another value; this is what lets `World`'s single hash-consing table
/// serve both universes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DefKind {
    /// The type of types ("kind"). Exactly one exists per `World` and every
    /// type-algebra Def points at it as its own `ty`.
    Universe,
    PrimType { ty: PrimTy, lanes: u32 },
    /// Unnamed/structural tuple type; operands are its element types.
    /// Unified structurally like any other hash-consed node.
    Sigma,
    /// Nominal tuple type (supports recursion); never unified, compared by
    /// `DefId` identity. Operands are mutable after construction via
    /// `World::set_named_sigma_elems` so a recursive type can close over
    /// itself.
    NamedSigma { name: String },
    /// Function (continuation) type; operands are parameter types. Order
    /// is `1 + max(order(params))`.
    Pi,
    Pointer { addr_space: u32, lanes: u32 },
    /// A type variable bound by some enclosing `Pi`; compared by binder
    /// identity, never unified structurally.
    TypeVar { binder: u64 },
    Literal(ConstValue),
    /// Arbitrary, unconstrained value of its type ("don't care").
    Any,
    /// Value that is never produced at runtime (unreachable code's type).
    Bottom,
    PrimOp(PrimOpKind),
    Param { cont: DefId, index: u32 },
    Continuation(ContinuationData),
}

impl DefKind {
    pub fn is_type(&self) -> bool {
        matches!(
            self,
            DefKind::Universe
                | DefKind::PrimType { .. }
                | DefKind::Sigma
                | DefKind::NamedSigma { .. }
                | DefKind::Pi
                | DefKind::Pointer { .. }
                | DefKind::TypeVar { .. }
        )
    }

    pub fn is_continuation(&self) -> bool {
        matches!(self, DefKind::Continuation(_))
    }

    pub fn is_param(&self) -> bool {
        matches!(self, DefKind::Param { .. })
    }

    pub fn is_nominal(&self) -> bool {
        matches!(self, DefKind::NamedSigma { .. } | DefKind::TypeVar { .. })
    }

    pub fn is_const(&self) -> bool {
        matches!(self, DefKind::Literal(_) | DefKind::Any | DefKind::Bottom)
    }
}

/// A single hash-consed node: a type, a literal, a primop, a parameter, or a
/// continuation. `ops` is mutable through a `RefCell` so `World::update` and
/// named-sigma "close the recursive knot" assignment can rewrite operands in
/// place without allocating a new `DefId`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Def {
    pub kind: DefKind,
    /// The Def's type. Types are themselves Defs (`DefKind::is_type`);
    /// type-kind Defs carry `ty == self` conceptually but we point them at
    /// a dedicated universe sentinel instead, see `World::type_of_types`.
    pub ty: DefId,
    #[serde(with = "ops_serde")]
    pub ops: std::cell::RefCell<SmallVec<[DefId; 4]>>,
    pub name: Option<String>,
    pub gid: u64,
    /// Generic mark slot used by DCE/UCE reachability sweeps and by passes
    /// that need a cheap "visited in pass N" check (see `World::new_pass`).
    #[serde(skip)]
    pub mark: Cell<u64>,
}

impl Def {
    pub fn op(&self, index: usize) -> DefId {
        self.ops.borrow()[index]
    }

    pub fn num_ops(&self) -> usize {
        self.ops.borrow().len()
    }

    pub fn ops_vec(&self) -> Vec<DefId> {
        self.ops.borrow().iter().copied().collect()
    }

    /// Returns `true` the first time this Def is visited during pass
    /// `pass`, `false` on every subsequent visit, until a later pass number
    /// is used. Mirrors the reference implementation's per-Def visit mark
    /// driven by `World::new_pass`.
    pub fn visit(&self, pass: u64) -> bool {
        if self.mark.get() == pass {
            false
        } else {
            self.mark.set(pass);
            true
        }
    }

    pub fn is_visited(&self, pass: u64) -> bool {
        self.mark.get() == pass
    }
}

mod ops_serde {
    use std::cell::RefCell;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use smallvec::SmallVec;

    use crate::id::DefId;

    pub fn serialize<S>(ops: &RefCell<SmallVec<[DefId; 4]>>, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        ops.borrow().as_slice().serialize(s)
    }

    pub fn deserialize<'de, D>(d: D) -> Result<RefCell<SmallVec<[DefId; 4]>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let v: Vec<DefId> = Vec::deserialize(d)?;
        Ok(RefCell::new(SmallVec::from_vec(v)))
    }
}
