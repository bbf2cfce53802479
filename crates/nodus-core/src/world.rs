use std::cell::Cell;
use std::collections::HashMap;

use petgraph::stable_graph::StableDiGraph;
use petgraph::Direction;
use smallvec::SmallVec;
use tracing::{debug, trace};

use crate::def::{ContinuationData, ContinuationFlags, Def, DefKind, Jump};
use crate::error::{CoreError, CoreResult};
use crate::id::DefId;
use crate::ops::{ArithOp, ConvOp, EvalMarker, PrimOpKind, RelOp};
use crate::types::{ConstValue, PrimTy};

/// Feature toggles for `World::consume`'s local rewrites, so tests and
/// tooling can observe an un-optimized graph: hash-consing always runs,
/// these opt-in rewrites can be switched off independently.
#[derive(Debug, Clone, Copy)]
pub struct WorldConfig {
    pub fold_constants: bool,
    pub simplify_algebraic: bool,
    pub cse_enabled: bool,
}

impl Default for WorldConfig {
    fn default() -> Self {
        WorldConfig {
            fold_constants: true,
            simplify_algebraic: true,
            cse_enabled: true,
        }
    }
}

/// Hashable/comparable projection of a Def's structural identity, used as
/// the hash-consing table's key. Only constructed for kinds that are
/// actually unified (`DefKind::is_nominal`/`Continuation`/`Param` are never
/// looked up here).
#[derive(PartialEq, Eq, Hash, Clone)]
enum StructuralKey {
    PrimType(u8, u32),
    Sigma(SmallVec<[DefId; 4]>),
    Pi(SmallVec<[DefId; 4]>),
    Pointer(DefId, u32, u32),
    Literal(ConstValueKey, DefId),
    Any(DefId),
    Bottom(DefId),
    PrimOp(PrimOpKindKey, SmallVec<[DefId; 4]>, DefId),
}

#[derive(PartialEq, Eq, Hash, Clone, Copy)]
enum ConstValueKey {
    Bool(bool),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(u64),
    F64(u64),
    Unit,
}

impl From<ConstValue> for ConstValueKey {
    fn from(v: ConstValue) -> Self {
        match v {
            ConstValue::Bool(b) => ConstValueKey::Bool(b),
            ConstValue::I8(v) => ConstValueKey::I8(v),
            ConstValue::I16(v) => ConstValueKey::I16(v),
            ConstValue::I32(v) => ConstValueKey::I32(v),
            ConstValue::I64(v) => ConstValueKey::I64(v),
            ConstValue::F32(v) => ConstValueKey::F32(v.to_bits()),
            ConstValue::F64(v) => ConstValueKey::F64(v.to_bits()),
            ConstValue::Unit => ConstValueKey::Unit,
        }
    }
}

#[derive(PartialEq, Eq, Hash, Clone, Copy)]
enum PrimOpKindKey {
    Arith(ArithOp),
    Rel(RelOp),
    Conv(ConvOp),
    Tuple,
    Extract(u32),
    Insert(u32),
    Select,
    SlotAddr,
    Load,
    Store,
    Enter,
    Leave,
    Eval(EvalMarker),
    Branch,
}

impl From<PrimOpKind> for PrimOpKindKey {
    fn from(k: PrimOpKind) -> Self {
        match k {
            PrimOpKind::Arith(op) => PrimOpKindKey::Arith(op),
            PrimOpKind::Rel(op) => PrimOpKindKey::Rel(op),
            PrimOpKind::Conv(op) => PrimOpKindKey::Conv(op),
            PrimOpKind::Tuple => PrimOpKindKey::Tuple,
            PrimOpKind::Extract { index } => PrimOpKindKey::Extract(index),
            PrimOpKind::Insert { index } => PrimOpKindKey::Insert(index),
            PrimOpKind::Select => PrimOpKindKey::Select,
            PrimOpKind::SlotAddr => PrimOpKindKey::SlotAddr,
            PrimOpKind::Load => PrimOpKindKey::Load,
            PrimOpKind::Store => PrimOpKindKey::Store,
            PrimOpKind::Enter => PrimOpKindKey::Enter,
            PrimOpKind::Leave => PrimOpKindKey::Leave,
            PrimOpKind::Eval(m) => PrimOpKindKey::Eval(m),
            PrimOpKind::Branch => PrimOpKindKey::Branch,
        }
    }
}

/// The hash-consing graph: every type, literal, primop, parameter, and
/// continuation in a program lives here as a `Def`, keyed by a stable
/// [`DefId`]. Structural kinds are deduplicated through `table`; nominal
/// kinds (`NamedSigma`, `TypeVar`) and mutable kinds (`Continuation`,
/// `Param`) are not.
pub struct World {
    graph: StableDiGraph<Def, (), u32>,
    table: HashMap<StructuralKey, DefId>,
    named_types: HashMap<String, DefId>,
    next_gid: u64,
    pass_counter: Cell<u64>,
    prim_types: HashMap<PrimTy, DefId>,
    universe: DefId,
    next_type_var: u64,
    pub config: WorldConfig,
}

impl World {
    pub fn new(config: WorldConfig) -> Self {
        let mut w = World {
            graph: StableDiGraph::new(),
            table: HashMap::new(),
            named_types: HashMap::new(),
            next_gid: 0,
            pass_counter: Cell::new(0),
            prim_types: HashMap::new(),
            universe: DefId(0),
            next_type_var: 0,
            config,
        };
        let universe_id = w.insert_raw(DefKind::Universe, DefId(0), &[], None);
        w.graph.node_weight_mut(universe_id.into()).unwrap().ty = universe_id;
        w.universe = universe_id;

        for ty in [
            PrimTy::Bool,
            PrimTy::I8,
            PrimTy::I16,
            PrimTy::I32,
            PrimTy::I64,
            PrimTy::F32,
            PrimTy::F64,
        ] {
            let id = w.insert_raw(DefKind::PrimType { ty, lanes: 1 }, universe_id, &[], None);
            w.prim_types.insert(ty, id);
        }
        w
    }

    // ---- low-level arena access -------------------------------------

    fn fresh_gid(&mut self) -> u64 {
        let g = self.next_gid;
        self.next_gid += 1;
        g
    }

    fn insert_raw(&mut self, kind: DefKind, ty: DefId, ops: &[DefId], name: Option<String>) -> DefId {
        let gid = self.fresh_gid();
        let def = Def {
            kind,
            ty,
            ops: std::cell::RefCell::new(SmallVec::from_slice(ops)),
            name,
            gid,
            mark: Cell::new(0),
        };
        let idx = self.graph.add_node(def);
        let id: DefId = idx.into();
        for &op in ops {
            self.graph.add_edge(op.into(), idx, ());
        }
        id
    }

    pub fn def(&self, id: DefId) -> &Def {
        self.graph
            .node_weight(id.into())
            .unwrap_or_else(|| panic!("dangling DefId {id} (gid already swept by cleanup)"))
    }

    pub fn try_def(&self, id: DefId) -> Option<&Def> {
        self.graph.node_weight(id.into())
    }

    pub fn continuation_data(&self, id: DefId) -> &ContinuationData {
        match &self.def(id).kind {
            DefKind::Continuation(data) => data,
            other => panic!("def {id} is not a continuation ({other:?})"),
        }
    }

    /// Every Def that uses `id` as an operand, i.e. its use-list.
    pub fn uses(&self, id: DefId) -> Vec<DefId> {
        self.graph
            .neighbors_directed(id.into(), Direction::Outgoing)
            .map(DefId::from)
            .collect()
    }

    pub fn def_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn all_defs(&self) -> impl Iterator<Item = DefId> + '_ {
        self.graph.node_indices().map(DefId::from)
    }

    pub fn new_pass(&self) -> u64 {
        let p = self.pass_counter.get() + 1;
        self.pass_counter.set(p);
        p
    }

    // ---- type algebra --------------------------------------------------

    pub fn prim_ty(&self, ty: PrimTy) -> DefId {
        self.prim_types[&ty]
    }

    pub fn universe(&self) -> DefId {
        self.universe
    }

    /// The `lanes`-wide vector form of a primitive type, hash-consed
    /// alongside its scalar (`lanes == 1`) counterpart, which `prim_ty`
    /// still serves directly from `prim_types` without touching `table`.
    /// Used by `vectorize` to widen scalar types to a SIMD width.
    pub fn prim_ty_lanes(&mut self, ty: PrimTy, lanes: u32) -> DefId {
        if lanes == 1 {
            return self.prim_ty(ty);
        }
        let key = StructuralKey::PrimType(ty as u8, lanes);
        if self.config.cse_enabled {
            if let Some(&id) = self.table.get(&key) {
                return id;
            }
        }
        let id = self.insert_raw(DefKind::PrimType { ty, lanes }, self.universe, &[], None);
        if self.config.cse_enabled {
            self.table.insert(key, id);
        }
        id
    }

    /// The `lanes`-wide vector form of a literal, hash-consed by value and
    /// widened type together.
    pub fn literal_lanes(&mut self, value: ConstValue, lanes: u32) -> DefId {
        if lanes == 1 {
            return self.literal(value);
        }
        let ty = self.prim_ty_lanes(value.prim_ty().expect("unit has no literal form"), lanes);
        let key = StructuralKey::Literal(value.into(), ty);
        if self.config.cse_enabled {
            if let Some(&id) = self.table.get(&key) {
                return id;
            }
        }
        let id = self.insert_raw(DefKind::Literal(value), ty, &[], None);
        if self.config.cse_enabled {
            self.table.insert(key, id);
        }
        id
    }

    pub fn sigma(&mut self, elems: Vec<DefId>) -> DefId {
        if !self.config.cse_enabled {
            return self.insert_raw(DefKind::Sigma, self.universe, &elems, None);
        }
        let key = StructuralKey::Sigma(SmallVec::from_vec(elems.clone()));
        if let Some(&id) = self.table.get(&key) {
            return id;
        }
        let id = self.insert_raw(DefKind::Sigma, self.universe, &elems, None);
        self.table.insert(key, id);
        id
    }

    pub fn pi(&mut self, params: Vec<DefId>) -> DefId {
        if !self.config.cse_enabled {
            return self.insert_raw(DefKind::Pi, self.universe, &params, None);
        }
        let key = StructuralKey::Pi(SmallVec::from_vec(params.clone()));
        if let Some(&id) = self.table.get(&key) {
            return id;
        }
        let id = self.insert_raw(DefKind::Pi, self.universe, &params, None);
        self.table.insert(key, id);
        id
    }

    pub fn pointer(&mut self, elem: DefId, addr_space: u32) -> DefId {
        self.pointer_lanes(elem, addr_space, 1)
    }

    pub fn pointer_lanes(&mut self, elem: DefId, addr_space: u32, lanes: u32) -> DefId {
        let key = StructuralKey::Pointer(elem, addr_space, lanes);
        if self.config.cse_enabled {
            if let Some(&id) = self.table.get(&key) {
                return id;
            }
        }
        let id = self.insert_raw(DefKind::Pointer { addr_space, lanes }, self.universe, &[elem], None);
        if self.config.cse_enabled {
            self.table.insert(key, id);
        }
        id
    }

    /// Nominal tuple type. Never unified; a duplicate `name` is an error.
    pub fn named_sigma(&mut self, name: impl Into<String>) -> CoreResult<DefId> {
        let name = name.into();
        if self.named_types.contains_key(&name) {
            return Err(CoreError::DuplicateNamedType(name));
        }
        let id = self.insert_raw(DefKind::NamedSigma { name: name.clone() }, self.universe, &[], None);
        self.named_types.insert(name, id);
        Ok(id)
    }

    /// Closes the recursive knot on a `NamedSigma` created with
    /// `named_sigma`, assigning its element types after the fact so a
    /// struct can reference its own `DefId` among its fields.
    pub fn set_named_sigma_elems(&mut self, named: DefId, elems: Vec<DefId>) -> CoreResult<()> {
        match &self.def(named).kind {
            DefKind::NamedSigma { .. } => {}
            _ => return Err(CoreError::NominalNeverUnified(named)),
        }
        let def = self.graph.node_weight(named.into()).unwrap();
        *def.ops.borrow_mut() = SmallVec::from_vec(elems.clone());
        drop(def);
        for e in elems {
            self.graph.add_edge(e.into(), named.into(), ());
        }
        Ok(())
    }

    pub fn fresh_type_var(&mut self) -> DefId {
        let binder = self.next_type_var;
        self.next_type_var += 1;
        self.insert_raw(DefKind::TypeVar { binder }, self.universe, &[], None)
    }

    /// Order of a type: 0 for first-order/data types, `1 +
    /// max(order(params))` for a `Pi`, and the max order of the elements for
    /// aggregates. Primitive, pointer, and type-variable kinds are order 0.
    pub fn order(&self, ty: DefId) -> u32 {
        match &self.def(ty).kind {
            DefKind::Pi => {
                let params = self.def(ty).ops_vec();
                1 + params.iter().map(|&p| self.order(p)).max().unwrap_or(0)
            }
            DefKind::Sigma | DefKind::NamedSigma { .. } => {
                let elems = self.def(ty).ops_vec();
                elems.iter().map(|&e| self.order(e)).max().unwrap_or(0)
            }
            _ => 0,
        }
    }

    /// Structural substitution of type variables per `map`. Nominal sigmas
    /// and unmapped type variables pass through unchanged.
    pub fn instantiate(&mut self, ty: DefId, map: &HashMap<DefId, DefId>) -> DefId {
        if let Some(&replacement) = map.get(&ty) {
            return replacement;
        }
        match self.def(ty).kind.clone() {
            DefKind::TypeVar { .. } | DefKind::PrimType { .. } | DefKind::Pointer { .. } | DefKind::NamedSigma { .. } => ty,
            DefKind::Sigma => {
                let elems = self.def(ty).ops_vec();
                let new_elems: Vec<DefId> = elems.iter().map(|&e| self.instantiate(e, map)).collect();
                if new_elems == elems {
                    ty
                } else {
                    self.sigma(new_elems)
                }
            }
            DefKind::Pi => {
                let params = self.def(ty).ops_vec();
                let new_params: Vec<DefId> = params.iter().map(|&p| self.instantiate(p, map)).collect();
                if new_params == params {
                    ty
                } else {
                    self.pi(new_params)
                }
            }
            _ => ty,
        }
    }

    /// Remap every free type variable under `ty` to a fresh one, then
    /// instantiate. Used when a polymorphic continuation is specialized.
    pub fn specialize(&mut self, ty: DefId) -> DefId {
        let mut map = HashMap::new();
        self.collect_type_vars(ty, &mut map);
        self.instantiate(ty, &map)
    }

    fn collect_type_vars(&mut self, ty: DefId, map: &mut HashMap<DefId, DefId>) {
        match &self.def(ty).kind {
            DefKind::TypeVar { .. } => {
                if !map.contains_key(&ty) {
                    let fresh = self.fresh_type_var();
                    map.insert(ty, fresh);
                }
            }
            DefKind::Sigma | DefKind::Pi => {
                for e in self.def(ty).ops_vec() {
                    self.collect_type_vars(e, map);
                }
            }
            _ => {}
        }
    }

    // ---- constants -------------------------------------------------

    pub fn literal(&mut self, value: ConstValue) -> DefId {
        let ty = self.prim_ty(value.prim_ty().expect("unit has no literal form"));
        let key = StructuralKey::Literal(value.into(), ty);
        if self.config.cse_enabled {
            if let Some(&id) = self.table.get(&key) {
                return id;
            }
        }
        let id = self.insert_raw(DefKind::Literal(value), ty, &[], None);
        if self.config.cse_enabled {
            self.table.insert(key, id);
        }
        id
    }

    pub fn bottom(&mut self, ty: DefId) -> DefId {
        let key = StructuralKey::Bottom(ty);
        if self.config.cse_enabled {
            if let Some(&id) = self.table.get(&key) {
                return id;
            }
        }
        let id = self.insert_raw(DefKind::Bottom, ty, &[], None);
        if self.config.cse_enabled {
            self.table.insert(key, id);
        }
        id
    }

    pub fn any(&mut self, ty: DefId) -> DefId {
        let key = StructuralKey::Any(ty);
        if self.config.cse_enabled {
            if let Some(&id) = self.table.get(&key) {
                return id;
            }
        }
        let id = self.insert_raw(DefKind::Any, ty, &[], None);
        if self.config.cse_enabled {
            self.table.insert(key, id);
        }
        id
    }

    // ---- primops ------------------------------------------------------

    fn primop(&mut self, kind: PrimOpKind, ty: DefId, ops: Vec<DefId>) -> DefId {
        let ops = if self.config.simplify_algebraic {
            self.canonicalize_operands(kind, ops)
        } else {
            ops
        };
        if let Some(folded) = self.try_fold(kind, ty, &ops) {
            return folded;
        }
        let key = StructuralKey::PrimOp(kind.into(), SmallVec::from_vec(ops.clone()), ty);
        if self.config.cse_enabled {
            if let Some(&id) = self.table.get(&key) {
                return id;
            }
        }
        let id = self.insert_raw(DefKind::PrimOp(kind), ty, &ops, None);
        if self.config.cse_enabled {
            self.table.insert(key, id);
        }
        trace!(?kind, %id, "primop created");
        id
    }

    /// Commutative operand reordering with ties broken by ascending `gid`,
    /// so `a + b` and `b + a` hash-cons to the same node.
    fn canonicalize_operands(&self, kind: PrimOpKind, mut ops: Vec<DefId>) -> Vec<DefId> {
        if kind.is_commutative() && ops.len() == 2 {
            let (g0, g1) = (self.def(ops[0]).gid, self.def(ops[1]).gid);
            if g1 < g0 {
                ops.swap(0, 1);
            }
        }
        ops
    }

    fn try_fold(&mut self, kind: PrimOpKind, ty: DefId, ops: &[DefId]) -> Option<DefId> {
        if !self.config.fold_constants && !self.config.simplify_algebraic {
            return None;
        }
        match kind {
            PrimOpKind::Arith(op) => {
                if self.config.fold_constants {
                    if let Some(id) = self.fold_arith(op, ty, ops) {
                        return Some(id);
                    }
                }
                if self.config.simplify_algebraic {
                    self.simplify_arith(op, ty, ops)
                } else {
                    None
                }
            }
            PrimOpKind::Rel(op) if self.config.fold_constants => self.fold_rel(op, ops),
            PrimOpKind::Select if self.config.simplify_algebraic => self.simplify_select(ops),
            _ => None,
        }
    }

    fn const_of(&self, id: DefId) -> Option<ConstValue> {
        match self.def(id).kind {
            DefKind::Literal(v) => Some(v),
            _ => None,
        }
    }

    fn fold_arith(&mut self, op: ArithOp, ty: DefId, ops: &[DefId]) -> Option<DefId> {
        let (a, b) = (self.const_of(ops[0])?, self.const_of(ops[1])?);
        let folded = match (a.as_i64(), b.as_i64()) {
            (Some(x), Some(y)) => {
                let r = match op {
                    ArithOp::Add => x.wrapping_add(y),
                    ArithOp::Sub => x.wrapping_sub(y),
                    ArithOp::Mul => x.wrapping_mul(y),
                    ArithOp::SDiv | ArithOp::UDiv if y != 0 => x.wrapping_div(y),
                    ArithOp::SRem | ArithOp::URem if y != 0 => x.wrapping_rem(y),
                    ArithOp::And => x & y,
                    ArithOp::Or => x | y,
                    ArithOp::Xor => x ^ y,
                    ArithOp::Shl => x.wrapping_shl(y as u32),
                    ArithOp::LShr | ArithOp::AShr => x.wrapping_shr(y as u32),
                    _ => return None,
                };
                self.int_const(ty, r)
            }
            _ => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => {
                    let r = match op {
                        ArithOp::Add => x + y,
                        ArithOp::Sub => x - y,
                        ArithOp::Mul => x * y,
                        ArithOp::SDiv | ArithOp::UDiv => x / y,
                        _ => return None,
                    };
                    self.float_const(ty, r)
                }
                _ => return None,
            },
        };
        debug!(?op, "folded constant arithmetic");
        Some(folded)
    }

    fn int_const(&mut self, ty: DefId, v: i64) -> DefId {
        let value = match self.def(ty).kind {
            DefKind::PrimType { ty: PrimTy::I8, .. } => ConstValue::I8(v as i8),
            DefKind::PrimType { ty: PrimTy::I16, .. } => ConstValue::I16(v as i16),
            DefKind::PrimType { ty: PrimTy::I32, .. } => ConstValue::I32(v as i32),
            DefKind::PrimType { ty: PrimTy::Bool, .. } => ConstValue::Bool(v != 0),
            _ => ConstValue::I64(v),
        };
        self.literal(value)
    }

    fn float_const(&mut self, ty: DefId, v: f64) -> DefId {
        let value = match self.def(ty).kind {
            DefKind::PrimType { ty: PrimTy::F32, .. } => ConstValue::F32(v),
            _ => ConstValue::F64(v),
        };
        self.literal(value)
    }

    /// `x+0=x`, `x*1=x`, `x*0=0`, double negation via `x-x=0`-style algebraic
    /// identities that don't require both operands to be constant.
    fn simplify_arith(&mut self, op: ArithOp, _ty: DefId, ops: &[DefId]) -> Option<DefId> {
        let (lhs, rhs) = (ops[0], ops[1]);
        let rc = self.const_of(rhs);
        let lc = self.const_of(lhs);
        match op {
            ArithOp::Add | ArithOp::Or | ArithOp::Xor if rc.map(|c| c.is_zero()).unwrap_or(false) => Some(lhs),
            ArithOp::Add if lc.map(|c| c.is_zero()).unwrap_or(false) => Some(rhs),
            ArithOp::Sub if rc.map(|c| c.is_zero()).unwrap_or(false) => Some(lhs),
            ArithOp::Mul if rc.map(|c| c.is_one()).unwrap_or(false) => Some(lhs),
            ArithOp::Mul if lc.map(|c| c.is_one()).unwrap_or(false) => Some(rhs),
            ArithOp::Mul if rc.map(|c| c.is_zero()).unwrap_or(false) => Some(rhs),
            ArithOp::Mul if lc.map(|c| c.is_zero()).unwrap_or(false) => Some(lhs),
            ArithOp::And if lhs == rhs => Some(lhs),
            ArithOp::Or if lhs == rhs => Some(lhs),
            ArithOp::Xor if lhs == rhs => {
                let ty = self.def(lhs).ty;
                Some(self.int_const(ty, 0))
            }
            _ => None,
        }
    }

    fn fold_rel(&mut self, op: RelOp, ops: &[DefId]) -> Option<DefId> {
        let (a, b) = (self.const_of(ops[0])?, self.const_of(ops[1])?);
        let result = match (a.as_i64(), b.as_i64()) {
            (Some(x), Some(y)) => Some(match op {
                RelOp::Eq => x == y,
                RelOp::Ne => x != y,
                RelOp::SLt | RelOp::ULt => x < y,
                RelOp::SLe | RelOp::ULe => x <= y,
                RelOp::SGt | RelOp::UGt => x > y,
                RelOp::SGe | RelOp::UGe => x >= y,
            }),
            _ => a.as_f64().zip(b.as_f64()).map(|(x, y)| match op {
                RelOp::Eq => x == y,
                RelOp::Ne => x != y,
                RelOp::SLt | RelOp::ULt => x < y,
                RelOp::SLe | RelOp::ULe => x <= y,
                RelOp::SGt | RelOp::UGt => x > y,
                RelOp::SGe | RelOp::UGe => x >= y,
            }),
        }?;
        Some(self.literal(ConstValue::Bool(result)))
    }

    /// A `select` with equal arms, or a literal condition, collapses.
    fn simplify_select(&mut self, ops: &[DefId]) -> Option<DefId> {
        let (cond, tval, fval) = (ops[0], ops[1], ops[2]);
        if tval == fval {
            return Some(tval);
        }
        match self.const_of(cond)?.as_bool()? {
            true => Some(tval),
            false => Some(fval),
        }
    }

    pub fn arith(&mut self, op: ArithOp, lhs: DefId, rhs: DefId) -> DefId {
        let ty = self.def(lhs).ty;
        self.primop(PrimOpKind::Arith(op), ty, vec![lhs, rhs])
    }

    pub fn rel(&mut self, op: RelOp, lhs: DefId, rhs: DefId) -> DefId {
        let ty = self.prim_ty(PrimTy::Bool);
        self.primop(PrimOpKind::Rel(op), ty, vec![lhs, rhs])
    }

    pub fn convert(&mut self, op: ConvOp, target_ty: DefId, operand: DefId) -> DefId {
        self.primop(PrimOpKind::Conv(op), target_ty, vec![operand])
    }

    pub fn tuple(&mut self, elems: Vec<DefId>) -> DefId {
        let elem_tys: Vec<DefId> = elems.iter().map(|&e| self.def(e).ty).collect();
        let ty = self.sigma(elem_tys);
        self.primop(PrimOpKind::Tuple, ty, elems)
    }

    pub fn extract(&mut self, tuple: DefId, index: u32) -> DefId {
        let tuple_ty = self.def(tuple).ty;
        let elem_ty = self.def(tuple_ty).op(index as usize);
        match self.def(tuple).kind {
            DefKind::PrimOp(PrimOpKind::Tuple) => return self.def(tuple).op(index as usize),
            // extracting the index an Insert just wrote returns its value
            // directly; extracting any other index passes through to the
            // tuple the Insert was built from.
            DefKind::PrimOp(PrimOpKind::Insert { index: j }) if j == index => {
                return self.def(tuple).op(1);
            }
            DefKind::PrimOp(PrimOpKind::Insert { .. }) => {
                let inner = self.def(tuple).op(0);
                return self.extract(inner, index);
            }
            _ => {}
        }
        self.primop(PrimOpKind::Extract { index }, elem_ty, vec![tuple])
    }

    pub fn insert_elem(&mut self, tuple: DefId, index: u32, value: DefId) -> DefId {
        let ty = self.def(tuple).ty;
        self.primop(PrimOpKind::Insert { index }, ty, vec![tuple, value])
    }

    pub fn select(&mut self, cond: DefId, tval: DefId, fval: DefId) -> DefId {
        let ty = self.def(tval).ty;
        self.primop(PrimOpKind::Select, ty, vec![cond, tval, fval])
    }

    /// Value-level select among jump targets, distinct from `select`'s
    /// scalar-value merge; used by `vectorize` to fold divergent per-lane
    /// control flow back into a single scalar callee.
    pub fn branch(&mut self, cond: DefId, tval: DefId, fval: DefId) -> DefId {
        let ty = self.def(tval).ty;
        self.primop(PrimOpKind::Branch, ty, vec![cond, tval, fval])
    }

    pub fn slot_addr(&mut self, elem_ty: DefId, addr_space: u32) -> DefId {
        let ptr_ty = self.pointer(elem_ty, addr_space);
        self.primop(PrimOpKind::SlotAddr, ptr_ty, vec![elem_ty])
    }

    pub fn load(&mut self, mem: DefId, ptr: DefId) -> DefId {
        let ptr_ty = self.def(ptr).ty;
        let elem_ty = self.def(ptr_ty).op(0);
        self.primop(PrimOpKind::Load, elem_ty, vec![mem, ptr])
    }

    pub fn store(&mut self, mem: DefId, ptr: DefId, value: DefId) -> DefId {
        let mem_ty = self.def(mem).ty;
        self.primop(PrimOpKind::Store, mem_ty, vec![mem, ptr, value])
    }

    pub fn enter(&mut self, mem: DefId) -> DefId {
        let mem_ty = self.def(mem).ty;
        let frame_ty = self.sigma(vec![mem_ty, mem_ty]);
        self.primop(PrimOpKind::Enter, frame_ty, vec![mem])
    }

    pub fn leave(&mut self, frame: DefId) -> DefId {
        let frame_ty = self.def(frame).ty;
        let mem_ty = self.def(frame_ty).op(0);
        self.primop(PrimOpKind::Leave, mem_ty, vec![frame])
    }

    pub fn eval_marker(&mut self, marker: EvalMarker, operand: DefId) -> DefId {
        let ty = self.def(operand).ty;
        self.primop(PrimOpKind::Eval(marker), ty, vec![operand])
    }

    // ---- continuations --------------------------------------------------

    pub fn continuation(&mut self, param_tys: Vec<DefId>, flags: ContinuationFlags) -> DefId {
        let pi = self.pi(param_tys.clone());
        let cont = self.insert_raw(DefKind::Continuation(ContinuationData::default()), pi, &[], None);
        let params: Vec<DefId> = param_tys
            .iter()
            .enumerate()
            .map(|(i, &ty)| self.insert_raw(DefKind::Param { cont, index: i as u32 }, ty, &[], None))
            .collect();
        if let DefKind::Continuation(data) = &mut self.graph.node_weight_mut(cont.into()).unwrap().kind {
            data.params = params;
            data.flags = flags;
        }
        for &p in &self.continuation_data(cont).params.clone() {
            self.graph.add_edge(p.into(), cont.into(), ());
        }
        cont
    }

    pub fn param(&self, cont: DefId, index: usize) -> DefId {
        self.continuation_data(cont).params[index]
    }

    pub fn params(&self, cont: DefId) -> &[DefId] {
        &self.continuation_data(cont).params
    }

    pub fn jump(&mut self, cont: DefId, callee: DefId, args: Vec<DefId>) -> CoreResult<()> {
        if self.try_def(cont).is_none() {
            return Err(CoreError::DefNotFound(cont));
        }
        for &op in std::iter::once(&callee).chain(args.iter()) {
            self.graph.add_edge(op.into(), cont.into(), ());
        }
        let node = self.graph.node_weight_mut(cont.into()).unwrap();
        match &mut node.kind {
            DefKind::Continuation(data) => {
                data.jump = Some(Jump {
                    callee,
                    args: SmallVec::from_vec(args),
                });
                Ok(())
            }
            _ => Err(CoreError::NoJump(cont)),
        }
    }

    pub fn set_name(&mut self, def: DefId, name: impl Into<String>) {
        if let Some(node) = self.graph.node_weight_mut(def.into()) {
            node.name = Some(name.into());
        }
    }

    // ---- graph surgery ---------------------------------------------------

    /// Rewrites operand `index` of `def` to `new_op`. The old operand's
    /// edge is removed and the hash-cons table entry for `def` (if any) is
    /// left to be rebuilt by the next `cleanup`, since its structural key
    /// changed.
    pub fn update(&mut self, def: DefId, index: usize, new_op: DefId) -> CoreResult<()> {
        let old_op = {
            let node = self.def(def);
            let ops = node.ops.borrow();
            *ops.get(index).ok_or(CoreError::OperandOutOfBounds {
                def,
                index,
                len: ops.len(),
            })?
        };
        if let Some(edge) = self.graph.find_edge(old_op.into(), def.into()) {
            self.graph.remove_edge(edge);
        }
        self.graph.add_edge(new_op.into(), def.into(), ());
        self.def(def).ops.borrow_mut()[index] = new_op;
        Ok(())
    }

    /// Replaces every use of `old` with `new` and leaves `old` dead for the
    /// next `cleanup` sweep to collect.
    pub fn replace(&mut self, old: DefId, new: DefId) {
        if old == new {
            return;
        }
        for user in self.uses(old) {
            let Some(user_def) = self.try_def(user) else { continue };
            let indices: Vec<usize> = user_def
                .ops
                .borrow()
                .iter()
                .enumerate()
                .filter(|(_, &o)| o == old)
                .map(|(i, _)| i)
                .collect();
            for i in indices {
                let _ = self.update(user, i, new);
            }
        }
    }

    // ---- DCE / UCE / cleanup ---------------------------------------------

    /// Marks every Def reachable (by operand edges) from any external
    /// continuation, then removes everything unmarked.
    pub fn dce(&mut self) -> usize {
        let pass = self.new_pass();
        let mut stack: Vec<DefId> = self
            .all_defs()
            .filter(|&id| matches!(&self.def(id).kind, DefKind::Continuation(d) if d.flags.is_external || d.flags.is_intrinsic))
            .collect();
        while let Some(id) = stack.pop() {
            if !self.def(id).visit(pass) {
                continue;
            }
            for op in self.def(id).ops_vec() {
                stack.push(op);
            }
            let ty = self.def(id).ty;
            stack.push(ty);
            if let DefKind::Continuation(data) = &self.def(id).kind {
                for &p in &data.params {
                    stack.push(p);
                }
                if let Some(j) = &data.jump {
                    stack.push(j.callee);
                    for &a in &j.args {
                        stack.push(a);
                    }
                }
            }
            if let DefKind::Param { cont, .. } = self.def(id).kind {
                stack.push(cont);
            }
        }
        // Types are an interning pool that outlives any single reachability
        // sweep (the `World`'s `prim_types`/`named_types` maps hold `DefId`s
        // into it), so only literals/primops/params are ever collected here;
        // unreachable continuations are `uce`'s job.
        let dead: Vec<DefId> = self
            .all_defs()
            .filter(|&id| !self.def(id).kind.is_type() && !self.def(id).is_visited(pass))
            .collect();
        let n = dead.len();
        for id in dead {
            self.graph.remove_node(id.into());
        }
        debug!(removed = n, "dce swept dead defs");
        n
    }

    /// Marks every continuation reachable from an external/intrinsic root by
    /// jump edges, removing unreachable continuations (and, transitively,
    /// their now-orphaned params).
    pub fn uce(&mut self) -> usize {
        let pass = self.new_pass();
        let mut stack: Vec<DefId> = self
            .all_defs()
            .filter(|&id| matches!(&self.def(id).kind, DefKind::Continuation(d) if d.flags.is_external || d.flags.is_intrinsic))
            .collect();
        while let Some(id) = stack.pop() {
            if !self.def(id).visit(pass) {
                continue;
            }
            if let DefKind::Continuation(data) = &self.def(id).kind {
                if let Some(j) = &data.jump {
                    if matches!(self.def(j.callee).kind, DefKind::Continuation(_)) {
                        stack.push(j.callee);
                    }
                    for &a in &j.args {
                        if matches!(self.def(a).kind, DefKind::Continuation(_)) {
                            stack.push(a);
                        }
                    }
                }
            }
        }
        let dead: Vec<DefId> = self
            .all_defs()
            .filter(|&id| matches!(self.def(id).kind, DefKind::Continuation(_)) && !self.def(id).is_visited(pass))
            .collect();
        let n = dead.len();
        for id in dead {
            if let DefKind::Continuation(data) = self.def(id).kind.clone() {
                for p in data.params {
                    self.graph.remove_node(p.into());
                }
            }
            self.graph.remove_node(id.into());
        }
        debug!(removed = n, "uce swept unreachable continuations");
        n
    }

    /// `dce` then `uce`, re-entrant: run repeatedly until the graph stops
    /// shrinking, since removing a continuation can orphan Defs only it used
    /// and vice versa.
    pub fn cleanup(&mut self) {
        loop {
            let a = self.dce();
            let b = self.uce();
            self.rebuild_hash_cons_table();
            if a == 0 && b == 0 {
                break;
            }
        }
        #[cfg(debug_assertions)]
        self.debug_assert_consistent();
    }

    fn rebuild_hash_cons_table(&mut self) {
        self.table.clear();
        let ids: Vec<DefId> = self.all_defs().collect();
        for id in ids {
            let def = self.def(id);
            let ty = def.ty;
            let ops = def.ops_vec();
            let key = match &def.kind {
                DefKind::Sigma => Some(StructuralKey::Sigma(SmallVec::from_vec(ops))),
                DefKind::Pi => Some(StructuralKey::Pi(SmallVec::from_vec(ops))),
                DefKind::Pointer { addr_space, lanes } => Some(StructuralKey::Pointer(ops[0], *addr_space, *lanes)),
                DefKind::Literal(v) => Some(StructuralKey::Literal((*v).into(), ty)),
                DefKind::Any => Some(StructuralKey::Any(ty)),
                DefKind::Bottom => Some(StructuralKey::Bottom(ty)),
                DefKind::PrimOp(k) => Some(StructuralKey::PrimOp((*k).into(), SmallVec::from_vec(ops), ty)),
                _ => None,
            };
            if let Some(key) = key {
                self.table.entry(key).or_insert(id);
            }
        }
    }

    /// O(n) well-formedness check: every operand resolves, and named-sigma
    /// identity is never aliased into the structural table.
    #[cfg(debug_assertions)]
    pub fn debug_assert_consistent(&self) {
        for id in self.all_defs() {
            let def = self.def(id);
            for op in def.ops_vec() {
                assert!(self.try_def(op).is_some(), "def {id} references dangling operand {op}");
            }
            assert!(self.try_def(def.ty).is_some(), "def {id} has dangling type {}", def.ty);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::def::ContinuationFlags;

    fn world() -> World {
        World::new(WorldConfig::default())
    }

    #[test]
    fn literal_cse_returns_identical_id() {
        let mut w = world();
        let a = w.literal(ConstValue::I32(5));
        let b = w.literal(ConstValue::I32(5));
        assert_eq!(a, b);
    }

    #[test]
    fn arith_constant_folds() {
        let mut w = world();
        let a = w.literal(ConstValue::I32(2));
        let b = w.literal(ConstValue::I32(3));
        let sum = w.arith(ArithOp::Add, a, b);
        assert_eq!(w.const_of(sum), Some(ConstValue::I32(5)));
    }

    #[test]
    fn add_zero_simplifies_away() {
        let mut w = world();
        let zero = w.literal(ConstValue::I32(0));
        let i32_ty = w.prim_ty(PrimTy::I32);
        let x = w.slot_addr(i32_ty, 0);
        let mem_ty = w.def(x).ty; // not actually memory, just a distinct non-const def for the test
        let _ = mem_ty;
        let sum = w.arith(ArithOp::Add, x, zero);
        assert_eq!(sum, x);
    }

    #[test]
    fn commutative_add_hash_conses_regardless_of_order() {
        let mut w = world();
        let i32_ty = w.prim_ty(PrimTy::I32);
        let p0 = w.slot_addr(i32_ty, 0);
        let p1 = w.slot_addr(i32_ty, 1);
        let ab = w.arith(ArithOp::Add, p0, p1);
        let ba = w.arith(ArithOp::Add, p1, p0);
        assert_eq!(ab, ba);
    }

    #[test]
    fn select_with_equal_arms_collapses() {
        let mut w = world();
        let i32_ty = w.prim_ty(PrimTy::I32);
        let v = w.slot_addr(i32_ty, 0);
        let cond = w.literal(ConstValue::Bool(true));
        let sel = w.select(cond, v, v);
        assert_eq!(sel, v);
    }

    #[test]
    fn pi_order_counts_nesting() {
        let mut w = world();
        let i32_ty = w.prim_ty(PrimTy::I32);
        assert_eq!(w.order(i32_ty), 0);
        let ret = w.pi(vec![i32_ty]);
        assert_eq!(w.order(ret), 1);
        let higher = w.pi(vec![ret]);
        assert_eq!(w.order(higher), 2);
    }

    #[test]
    fn named_sigma_rejects_duplicate_names() {
        let mut w = world();
        w.named_sigma("Point").unwrap();
        assert!(w.named_sigma("Point").is_err());
    }

    #[test]
    fn named_sigma_supports_recursive_closing() {
        let mut w = world();
        let list = w.named_sigma("List").unwrap();
        let i32_ty = w.prim_ty(PrimTy::I32);
        let ptr_to_self = w.pointer(list, 0);
        w.set_named_sigma_elems(list, vec![i32_ty, ptr_to_self]).unwrap();
        assert_eq!(w.def(list).ops_vec(), vec![i32_ty, ptr_to_self]);
    }

    #[test]
    fn tuple_extract_round_trips() {
        let mut w = world();
        let a = w.literal(ConstValue::I32(1));
        let b = w.literal(ConstValue::I32(2));
        let t = w.tuple(vec![a, b]);
        assert_eq!(w.extract(t, 0), a);
        assert_eq!(w.extract(t, 1), b);
    }

    #[test]
    fn dce_removes_unreachable_defs() {
        let mut w = world();
        let i32_ty = w.prim_ty(PrimTy::I32);
        let bb = w.continuation(vec![i32_ty], ContinuationFlags { is_external: true, ..Default::default() });
        let dead = w.literal(ConstValue::I32(99));
        let before = w.def_count();
        w.dce();
        assert!(before > w.def_count());
        assert!(w.try_def(dead).is_none());
        assert!(w.try_def(bb).is_some());
    }

    #[test]
    fn replace_rewires_all_uses() {
        let mut w = world();
        let i32_ty = w.prim_ty(PrimTy::I32);
        let p = w.slot_addr(i32_ty, 0);
        let one = w.literal(ConstValue::I32(1));
        let t = w.tuple(vec![p, one]);
        let two = w.literal(ConstValue::I32(2));
        w.replace(p, two);
        assert_eq!(w.def(t).op(0), two);
    }

    #[test]
    fn uses_reflects_operand_edges() {
        let mut w = world();
        let i32_ty = w.prim_ty(PrimTy::I32);
        let p = w.slot_addr(i32_ty, 0);
        let one = w.literal(ConstValue::I32(1));
        let t = w.tuple(vec![p, one]);
        assert!(w.uses(p).contains(&t));
    }

    proptest::proptest! {
        /// Structurally equal non-nominal Defs built in the same World
        /// are pointer-identical.
        #[test]
        fn cse_is_pointer_identical_for_equal_literals(n: i32) {
            let mut w = world();
            let a = w.literal(ConstValue::I32(n));
            let b = w.literal(ConstValue::I32(n));
            proptest::prop_assert_eq!(a, b);
        }

        #[test]
        fn cse_is_pointer_identical_for_equal_arith(a_idx in 0u32..8, b_idx in 0u32..8) {
            proptest::prop_assume!(a_idx != b_idx);
            let mut w = world();
            let i32_ty = w.prim_ty(PrimTy::I32);
            let pa = w.slot_addr(i32_ty, a_idx);
            let pb = w.slot_addr(i32_ty, b_idx);
            let sum1 = w.arith(ArithOp::Add, pa, pb);
            let sum2 = w.arith(ArithOp::Add, pa, pb);
            proptest::prop_assert_eq!(sum1, sum2);
        }

        /// `uses(d)` matches a manual scan over every Def's operand list.
        #[test]
        fn uses_matches_operand_scan(chain_len in 1u32..6) {
            let mut w = world();
            let i32_ty = w.prim_ty(PrimTy::I32);
            let p = w.slot_addr(i32_ty, 0);
            let mut acc = p;
            for i in 0..chain_len {
                let lit = w.literal(ConstValue::I32(i as i32 + 1)); // never 0, avoids add-zero simplification
                acc = w.arith(ArithOp::Add, acc, lit);
            }
            let expected: Vec<DefId> = w.all_defs().filter(|&id| w.def(id).ops_vec().contains(&p)).collect();
            let actual = w.uses(p);
            proptest::prop_assert_eq!(actual.len(), expected.len());
            for e in expected {
                proptest::prop_assert!(actual.contains(&e));
            }
        }

        /// `update(d, i, d.op(i))` is a no-op, since it reinstates the
        /// operand edge that was already there.
        #[test]
        fn update_with_unchanged_operand_is_identity(a_idx in 0u32..8, b_idx in 0u32..8) {
            proptest::prop_assume!(a_idx != b_idx);
            let mut w = world();
            let i32_ty = w.prim_ty(PrimTy::I32);
            let pa = w.slot_addr(i32_ty, a_idx);
            let pb = w.slot_addr(i32_ty, b_idx);
            let sum = w.arith(ArithOp::Add, pa, pb);
            let op0 = w.def(sum).op(0);
            w.update(sum, 0, op0).unwrap();
            proptest::prop_assert_eq!(w.def(sum).op(0), op0);
            proptest::prop_assert_eq!(w.def(sum).op(1), pb);
        }

        /// Inserting a literal into a tuple and extracting the same index
        /// yields the original element back.
        #[test]
        fn insert_extract_round_trips(a: i32, b: i32, replacement: i32) {
            let mut w = world();
            let la = w.literal(ConstValue::I32(a));
            let lb = w.literal(ConstValue::I32(b));
            let t = w.tuple(vec![la, lb]);
            let lr = w.literal(ConstValue::I32(replacement));
            let t2 = w.insert_elem(t, 0, lr);
            proptest::prop_assert_eq!(w.extract(t2, 0), lr);
            proptest::prop_assert_eq!(w.extract(t2, 1), lb);
        }
    }
}
