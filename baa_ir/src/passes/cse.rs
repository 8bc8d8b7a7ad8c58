//! Common subexpression elimination (حذف_المكرر)
//!
//! Hashes each pure instruction by opcode, predicate, result type and the
//! signatures of its operands. A later instruction with the same key is
//! replaced by the earlier one when the earlier definition dominates it, so
//! the rewrite can never break the SSA dominance property.

use crate::analysis::{self, DomTree};
use crate::arena::BlockId;
use crate::function::Function;
use crate::instruction::{CmpPred, Opcode};
use crate::module::Module;
use crate::passes::Pass;
use crate::types::Type;
use crate::value::Value;
use baa_common::BaaResult;
use hashbrown::HashMap;
use smallvec::SmallVec;

pub struct Cse;

impl Pass for Cse {
    fn name(&self) -> &'static str {
        "حذف_المكرر"
    }

    fn run(&mut self, module: &mut Module) -> BaaResult<bool> {
        let mut changed = false;
        for func in &mut module.functions {
            changed |= cse_function(func);
        }
        Ok(changed)
    }
}

/// Signature of one operand slot: its kind plus identifying payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum OperandSig {
    Const(i64),
    Reg(u32),
    Str(u32),
    Global(String),
    Func(String),
    Block(u32),
}

impl OperandSig {
    fn of(v: &Value) -> OperandSig {
        match v {
            Value::ConstInt { value, .. } => OperandSig::Const(*value),
            Value::Reg { num, .. } => OperandSig::Reg(*num),
            Value::ConstStr { id } => OperandSig::Str(*id),
            Value::Global { name, .. } => OperandSig::Global(name.clone()),
            Value::FuncRef { name, .. } => OperandSig::Func(name.clone()),
            Value::Block(id) => OperandSig::Block(crate::arena::ArenaId::index(*id) as u32),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ExprKey {
    op: Opcode,
    pred: Option<CmpPred>,
    ty: Type,
    operands: SmallVec<[OperandSig; 3]>,
}

fn cse_function(func: &mut Function) -> bool {
    if func.is_prototype || func.entry().is_none() {
        return false;
    }
    analysis::rebuild_preds(func);
    let dom = DomTree::compute(func);

    // Pass 1: find duplicates. The first occurrence wins; a later match is
    // only folded onto it when the first one's block dominates it.
    let mut table: HashMap<ExprKey, (u32, BlockId)> = HashMap::new();
    let mut replacements: HashMap<u32, u32> = HashMap::new();

    for &b in &func.block_order {
        for &i in &func.block(b).insts {
            let inst = func.inst(i);
            if !inst.op.is_cse_eligible() {
                continue;
            }
            let Some(dest) = inst.dest else { continue };

            let key = ExprKey {
                op: inst.op,
                pred: inst.cmp_pred,
                ty: inst.ty.clone(),
                operands: inst.operands.iter().map(OperandSig::of).collect(),
            };

            match table.get(&key) {
                Some(&(orig_reg, orig_block)) if dom.dominates(orig_block, b) => {
                    replacements.insert(dest, orig_reg);
                }
                Some(_) => {}
                None => {
                    table.insert(key, (dest, b));
                }
            }
        }
    }

    if replacements.is_empty() {
        return false;
    }

    // Pass 2: rewrite uses of replaced registers in place.
    for b in func.block_order.clone() {
        for i in func.block(b).insts.clone() {
            let slots: Vec<_> = func
                .inst(i)
                .slots()
                .into_iter()
                .filter_map(|(slot, v)| {
                    v.as_reg()
                        .and_then(|r| replacements.get(&r).copied())
                        .map(|new| (slot, new))
                })
                .collect();
            for (slot, new_reg) in slots {
                if let Some(v) = func.inst_mut(i).slot_mut(slot) {
                    if let Value::Reg { num, .. } = v {
                        *num = new_reg;
                    }
                }
            }
        }
    }

    // Pass 3: delete the duplicate instructions.
    for b in func.block_order.clone() {
        for i in func.block(b).insts.clone() {
            if func
                .inst(i)
                .dest
                .is_some_and(|d| replacements.contains_key(&d))
            {
                func.remove_inst(b, i);
            }
        }
    }

    true
}
