//! IR instructions
//!
//! An instruction owns its operand slots plus opcode-specific side channels:
//! call target and arguments for `call`, incoming entries for `phi`, the
//! predicate for `cmp`. The destination register is `None` for instructions
//! that produce no value.

use crate::arena::{ArenaId, BlockId, InstId};
use crate::types::Type;
use crate::value::Value;
use baa_common::SourceLoc;
use serde::{Deserialize, Serialize};
use smallvec::{smallvec, SmallVec};
use std::fmt;

/// Instruction opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Opcode {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Neg,
    And,
    Or,
    Not,
    Cmp,
    Copy,
    Alloca,
    Load,
    Store,
    Br,
    BrCond,
    Ret,
    Call,
    Phi,
}

impl Opcode {
    pub fn is_terminator(self) -> bool {
        matches!(self, Opcode::Br | Opcode::BrCond | Opcode::Ret)
    }

    /// Instructions that must never be deleted even when their result is
    /// unused: stores, calls and terminators.
    pub fn has_side_effects(self) -> bool {
        matches!(
            self,
            Opcode::Store | Opcode::Call | Opcode::Br | Opcode::BrCond | Opcode::Ret
        )
    }

    /// Pure computations eligible for common subexpression elimination.
    /// Memory, control flow, calls, phi and copy are excluded.
    pub fn is_cse_eligible(self) -> bool {
        matches!(
            self,
            Opcode::Add
                | Opcode::Sub
                | Opcode::Mul
                | Opcode::Div
                | Opcode::Mod
                | Opcode::Neg
                | Opcode::Cmp
                | Opcode::And
                | Opcode::Or
                | Opcode::Not
        )
    }

    pub fn is_commutative(self) -> bool {
        matches!(self, Opcode::Add | Opcode::Mul | Opcode::And | Opcode::Or)
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            Opcode::Add => "add",
            Opcode::Sub => "sub",
            Opcode::Mul => "mul",
            Opcode::Div => "div",
            Opcode::Mod => "mod",
            Opcode::Neg => "neg",
            Opcode::And => "and",
            Opcode::Or => "or",
            Opcode::Not => "not",
            Opcode::Cmp => "cmp",
            Opcode::Copy => "copy",
            Opcode::Alloca => "alloca",
            Opcode::Load => "load",
            Opcode::Store => "store",
            Opcode::Br => "br",
            Opcode::BrCond => "br_cond",
            Opcode::Ret => "ret",
            Opcode::Call => "call",
            Opcode::Phi => "phi",
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.mnemonic())
    }
}

/// Comparison predicates; all integer comparisons are signed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CmpPred {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpPred {
    /// The predicate after swapping the two operands:
    /// `a < b` holds iff `b > a`, equality is symmetric.
    pub fn swapped(self) -> CmpPred {
        match self {
            CmpPred::Eq => CmpPred::Eq,
            CmpPred::Ne => CmpPred::Ne,
            CmpPred::Lt => CmpPred::Gt,
            CmpPred::Le => CmpPred::Ge,
            CmpPred::Gt => CmpPred::Lt,
            CmpPred::Ge => CmpPred::Le,
        }
    }

    /// Evaluate the predicate on signed operands.
    pub fn eval(self, lhs: i64, rhs: i64) -> bool {
        match self {
            CmpPred::Eq => lhs == rhs,
            CmpPred::Ne => lhs != rhs,
            CmpPred::Lt => lhs < rhs,
            CmpPred::Le => lhs <= rhs,
            CmpPred::Gt => lhs > rhs,
            CmpPred::Ge => lhs >= rhs,
        }
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            CmpPred::Eq => "eq",
            CmpPred::Ne => "ne",
            CmpPred::Lt => "lt",
            CmpPred::Le => "le",
            CmpPred::Gt => "gt",
            CmpPred::Ge => "ge",
        }
    }

    pub fn from_mnemonic(s: &str) -> Option<CmpPred> {
        match s {
            "eq" => Some(CmpPred::Eq),
            "ne" => Some(CmpPred::Ne),
            "lt" => Some(CmpPred::Lt),
            "le" => Some(CmpPred::Le),
            "gt" => Some(CmpPred::Gt),
            "ge" => Some(CmpPred::Ge),
            _ => None,
        }
    }
}

impl fmt::Display for CmpPred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.mnemonic())
    }
}

/// One incoming entry of a phi: the value flowing in from a predecessor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhiEntry {
    pub value: Value,
    pub block: BlockId,
}

/// Call side channel: target name and arguments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallData {
    pub target: String,
    pub args: Vec<Value>,
}

/// Identifies one value slot of an instruction for def-use bookkeeping.
///
/// Slots are addressed by index rather than by pointer, so rewrites are
/// plain updates and survive arena growth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UseSlot {
    Operand(usize),
    CallArg(usize),
    PhiValue(usize),
}

/// An IR instruction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Inst {
    /// Unique within the function; assigned at first insertion
    pub id: InstId,
    pub op: Opcode,
    /// Result type; `Void` when the instruction produces no value
    pub ty: Type,
    /// Destination register, if any
    pub dest: Option<u32>,
    pub operands: SmallVec<[Value; 3]>,
    pub call: Option<CallData>,
    pub phi_entries: Vec<PhiEntry>,
    pub cmp_pred: Option<CmpPred>,
    pub loc: Option<SourceLoc>,
    /// Variable name for diagnostics, carried through passes
    pub dbg_name: Option<String>,
}

impl Inst {
    fn new(op: Opcode, ty: Type, dest: Option<u32>) -> Self {
        Self {
            id: InstId::from_index(u32::MAX as usize),
            op,
            ty,
            dest,
            operands: SmallVec::new(),
            call: None,
            phi_entries: Vec::new(),
            cmp_pred: None,
            loc: None,
            dbg_name: None,
        }
    }

    /// `dest = op ty lhs, rhs`
    pub fn binary(op: Opcode, ty: Type, dest: u32, lhs: Value, rhs: Value) -> Self {
        let mut inst = Self::new(op, ty, Some(dest));
        inst.operands = smallvec![lhs, rhs];
        inst
    }

    /// `dest = op ty operand` (neg, not)
    pub fn unary(op: Opcode, ty: Type, dest: u32, operand: Value) -> Self {
        let mut inst = Self::new(op, ty, Some(dest));
        inst.operands = smallvec![operand];
        inst
    }

    /// `dest = cmp pred lhs, rhs`; the result is always `i1`
    pub fn cmp(pred: CmpPred, dest: u32, lhs: Value, rhs: Value) -> Self {
        let mut inst = Self::new(Opcode::Cmp, Type::I1, Some(dest));
        inst.operands = smallvec![lhs, rhs];
        inst.cmp_pred = Some(pred);
        inst
    }

    /// `dest = copy ty src`
    pub fn copy(ty: Type, dest: u32, src: Value) -> Self {
        let mut inst = Self::new(Opcode::Copy, ty, Some(dest));
        inst.operands = smallvec![src];
        inst
    }

    /// `dest = alloca pointee`; the result type is `ptr<pointee>`
    pub fn alloca(pointee: Type, dest: u32) -> Self {
        Self::new(Opcode::Alloca, pointee.ptr_to(), Some(dest))
    }

    /// `dest = load ty ptr`
    pub fn load(ty: Type, dest: u32, ptr: Value) -> Self {
        let mut inst = Self::new(Opcode::Load, ty, Some(dest));
        inst.operands = smallvec![ptr];
        inst
    }

    /// `store value, ptr`
    pub fn store(value: Value, ptr: Value) -> Self {
        let mut inst = Self::new(Opcode::Store, Type::Void, None);
        inst.operands = smallvec![value, ptr];
        inst
    }

    /// `br target`
    pub fn br(target: BlockId) -> Self {
        let mut inst = Self::new(Opcode::Br, Type::Void, None);
        inst.operands = smallvec![Value::Block(target)];
        inst
    }

    /// `br_cond cond, then_block, else_block`
    pub fn br_cond(cond: Value, then_block: BlockId, else_block: BlockId) -> Self {
        let mut inst = Self::new(Opcode::BrCond, Type::Void, None);
        inst.operands = smallvec![cond, Value::Block(then_block), Value::Block(else_block)];
        inst
    }

    /// `ret value` or `ret void`
    pub fn ret(value: Option<Value>) -> Self {
        let ty = value.as_ref().map(|v| v.ty()).unwrap_or(Type::Void);
        let mut inst = Self::new(Opcode::Ret, ty, None);
        if let Some(v) = value {
            inst.operands = smallvec![v];
        }
        inst
    }

    /// `dest = call ty @target(args)`; `dest` is `None` for void calls
    pub fn call(target: impl Into<String>, ty: Type, dest: Option<u32>, args: Vec<Value>) -> Self {
        let mut inst = Self::new(Opcode::Call, ty, dest);
        inst.call = Some(CallData { target: target.into(), args });
        inst
    }

    /// `dest = phi ty` with no entries yet; fill with [`Inst::phi_add`]
    pub fn phi(ty: Type, dest: u32) -> Self {
        Self::new(Opcode::Phi, ty, Some(dest))
    }

    pub fn phi_add(&mut self, value: Value, block: BlockId) {
        debug_assert_eq!(self.op, Opcode::Phi);
        self.phi_entries.push(PhiEntry { value, block });
    }

    pub fn with_loc(mut self, loc: SourceLoc) -> Self {
        self.loc = Some(loc);
        self
    }

    pub fn is_terminator(&self) -> bool {
        self.op.is_terminator()
    }

    pub fn has_side_effects(&self) -> bool {
        self.op.has_side_effects()
    }

    /// Branch targets of a terminator, in operand order.
    pub fn successors(&self) -> SmallVec<[BlockId; 2]> {
        let mut succs = SmallVec::new();
        if self.is_terminator() {
            for v in &self.operands {
                if let Value::Block(id) = v {
                    succs.push(*id);
                }
            }
        }
        succs
    }

    /// Retarget a terminator: every occurrence of `old` becomes `new`.
    pub fn replace_target(&mut self, old: BlockId, new: BlockId) {
        for v in self.operands.iter_mut() {
            if let Value::Block(id) = v {
                if *id == old {
                    *v = Value::Block(new);
                }
            }
        }
    }

    /// The incoming value for a given predecessor, if present.
    pub fn phi_incoming(&self, pred: BlockId) -> Option<&Value> {
        self.phi_entries.iter().find(|e| e.block == pred).map(|e| &e.value)
    }

    /// All value slots of this instruction: operands, call arguments and phi
    /// incoming values (block references included, as in the operand array).
    pub fn slots(&self) -> Vec<(UseSlot, &Value)> {
        let mut out = Vec::with_capacity(
            self.operands.len()
                + self.call.as_ref().map_or(0, |c| c.args.len())
                + self.phi_entries.len(),
        );
        for (i, v) in self.operands.iter().enumerate() {
            out.push((UseSlot::Operand(i), v));
        }
        if let Some(call) = &self.call {
            for (i, v) in call.args.iter().enumerate() {
                out.push((UseSlot::CallArg(i), v));
            }
        }
        for (i, e) in self.phi_entries.iter().enumerate() {
            out.push((UseSlot::PhiValue(i), &e.value));
        }
        out
    }

    pub fn slot(&self, slot: UseSlot) -> Option<&Value> {
        match slot {
            UseSlot::Operand(i) => self.operands.get(i),
            UseSlot::CallArg(i) => self.call.as_ref().and_then(|c| c.args.get(i)),
            UseSlot::PhiValue(i) => self.phi_entries.get(i).map(|e| &e.value),
        }
    }

    pub fn slot_mut(&mut self, slot: UseSlot) -> Option<&mut Value> {
        match slot {
            UseSlot::Operand(i) => self.operands.get_mut(i),
            UseSlot::CallArg(i) => self.call.as_mut().and_then(|c| c.args.get_mut(i)),
            UseSlot::PhiValue(i) => self.phi_entries.get_mut(i).map(|e| &mut e.value),
        }
    }

    /// Virtual registers read by this instruction, with repetition.
    pub fn used_regs(&self) -> SmallVec<[u32; 4]> {
        let mut regs = SmallVec::new();
        for (_, v) in self.slots() {
            if let Value::Reg { num, .. } = v {
                regs.push(*num);
            }
        }
        regs
    }
}
