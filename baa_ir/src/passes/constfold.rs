//! Constant folding (طي_الثوابت)
//!
//! Folds arithmetic and comparisons whose operands are all immediate
//! integers, then replaces every use of the folded destination with the
//! constant and deletes the instruction.
//!
//! Arithmetic contract:
//! - overflow wraps (two's complement); computations run in u64 space
//! - division and modulo truncate toward zero
//! - `INT64_MIN / -1 = INT64_MIN`, `INT64_MIN % -1 = 0`
//! - division or modulo by zero is not folded
//! - comparisons are signed for all integer types
//! - i1 results normalize to 0/1 and are never sign-extended

use crate::defuse::DefUse;
use crate::function::Function;
use crate::instruction::Opcode;
use crate::module::Module;
use crate::passes::Pass;
use crate::types::Type;
use crate::value::Value;
use baa_common::BaaResult;

pub struct ConstFold;

impl Pass for ConstFold {
    fn name(&self) -> &'static str {
        "طي_الثوابت"
    }

    fn run(&mut self, module: &mut Module) -> BaaResult<bool> {
        let mut changed = false;
        for func in &mut module.functions {
            changed |= fold_function(func);
        }
        Ok(changed)
    }
}

/// Truncate to the width of `ty`, then sign-extend back to 64 bits.
/// `i1` uses the boolean rule: any non-zero becomes 1.
pub fn normalize_to_type(v: i64, ty: &Type) -> i64 {
    if *ty == Type::I1 {
        return i64::from(v != 0);
    }
    let Some(bits) = ty.bit_width() else { return v };
    if bits >= 64 {
        return v;
    }
    let mask: u64 = (1u64 << bits) - 1;
    let mut u = (v as u64) & mask;
    let sign_bit = 1u64 << (bits - 1);
    if u & sign_bit != 0 {
        u |= !mask;
    }
    u as i64
}

/// Evaluate a binary arithmetic opcode on constants, or `None` when the
/// operation must be left for runtime (division/modulo by zero).
pub fn fold_arith(op: Opcode, lhs: i64, rhs: i64) -> Option<i64> {
    let ul = lhs as u64;
    let ur = rhs as u64;
    match op {
        Opcode::Add => Some(ul.wrapping_add(ur) as i64),
        Opcode::Sub => Some(ul.wrapping_sub(ur) as i64),
        Opcode::Mul => Some(ul.wrapping_mul(ur) as i64),
        Opcode::Div => {
            if rhs == 0 {
                return None;
            }
            if lhs == i64::MIN && rhs == -1 {
                return Some(i64::MIN);
            }
            Some(lhs / rhs)
        }
        Opcode::Mod => {
            if rhs == 0 {
                return None;
            }
            if lhs == i64::MIN && rhs == -1 {
                return Some(0);
            }
            Some(lhs % rhs)
        }
        _ => None,
    }
}

fn fold_function(func: &mut Function) -> bool {
    if func.is_prototype {
        return false;
    }

    // One def-use build serves the whole sweep: use sites are index pairs
    // and stay valid across in-place slot rewrites.
    let du = DefUse::build(func);
    let mut changed = false;

    for b in func.block_order.clone() {
        for i in func.block(b).insts.clone() {
            let Some((reg, folded)) = try_fold(func, i) else { continue };

            for site in du.uses(reg) {
                let Some(slot) = func.inst_mut(site.inst).slot_mut(site.slot) else {
                    continue;
                };
                if !slot.is_reg_num(reg) {
                    continue;
                }
                let ty = slot.ty();
                *slot = Value::const_int(normalize_to_type(folded, &ty), ty);
            }

            func.remove_inst(b, i);
            changed = true;
        }
    }

    changed
}

fn try_fold(func: &Function, inst_id: crate::arena::InstId) -> Option<(u32, i64)> {
    let inst = func.inst(inst_id);
    let reg = inst.dest?;

    match inst.op {
        Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div | Opcode::Mod => {
            if !inst.ty.is_int() {
                return None;
            }
            let lhs = inst.operands.first()?.as_const_int()?;
            let rhs = inst.operands.get(1)?.as_const_int()?;
            let v = fold_arith(inst.op, lhs, rhs)?;
            Some((reg, normalize_to_type(v, &inst.ty)))
        }
        Opcode::Cmp => {
            let lhs = inst.operands.first()?.as_const_int()?;
            let rhs = inst.operands.get(1)?.as_const_int()?;
            let pred = inst.cmp_pred?;
            Some((reg, i64::from(pred.eval(lhs, rhs))))
        }
        _ => None,
    }
}
