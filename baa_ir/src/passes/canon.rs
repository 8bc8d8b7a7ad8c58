//! IR canonicalization (توحيد_الـIR)
//!
//! Normalizes operand order so later passes see one shape per expression:
//! commutative operations put the constant on the right and, when both
//! operands are registers, the smaller register number on the left.
//! Comparisons with a constant left-hand side are flipped together with
//! their predicate. No types change and no instructions are added.

use crate::function::Function;
use crate::instruction::Opcode;
use crate::module::Module;
use crate::passes::Pass;
use crate::value::Value;
use baa_common::BaaResult;

pub struct Canonicalize;

impl Pass for Canonicalize {
    fn name(&self) -> &'static str {
        "توحيد_الـIR"
    }

    fn run(&mut self, module: &mut Module) -> BaaResult<bool> {
        let mut changed = false;
        for func in &mut module.functions {
            changed |= canon_function(func);
        }
        Ok(changed)
    }
}

fn should_swap(lhs: &Value, rhs: &Value) -> bool {
    if lhs.is_const_int() && !rhs.is_const_int() {
        return true;
    }
    match (lhs.as_reg(), rhs.as_reg()) {
        (Some(a), Some(b)) => b < a,
        _ => false,
    }
}

fn canon_function(func: &mut Function) -> bool {
    if func.is_prototype || func.entry().is_none() {
        return false;
    }

    let mut changed = false;
    for b in func.block_order.clone() {
        for i in func.block(b).insts.clone() {
            let inst = func.inst(i);
            let commutative = inst.op.is_commutative();
            let is_cmp = inst.op == Opcode::Cmp;
            if (!commutative && !is_cmp) || inst.operands.len() < 2 {
                continue;
            }
            if !should_swap(&inst.operands[0], &inst.operands[1]) {
                continue;
            }

            let inst = func.inst_mut(i);
            inst.operands.swap(0, 1);
            if is_cmp {
                inst.cmp_pred = inst.cmp_pred.map(|p| p.swapped());
            }
            changed = true;
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::IrBuilder;
    use crate::instruction::CmpPred;
    use crate::types::Type;

    #[test]
    fn test_constant_moves_right() {
        let mut b = IrBuilder::new("توحيد");
        b.create_func("د", Type::I64);
        let p = b.add_param(None, Type::I64);
        let entry = b.create_block("بداية");
        b.set_insert_point(entry);
        let r = b.emit_binary(
            Opcode::Add,
            Type::I64,
            Value::const_int(3, Type::I64),
            Value::reg(p, Type::I64),
        );
        b.emit_ret(Some(Value::reg(r, Type::I64)));

        let mut m = b.finish();
        assert!(Canonicalize.run(&mut m).unwrap());

        let f = m.function("د").unwrap();
        let add = f.inst(f.block(entry).insts[0]);
        assert!(add.operands[0].is_reg_num(p));
        assert_eq!(add.operands[1].as_const_int(), Some(3));
    }

    #[test]
    fn test_smaller_register_moves_left() {
        let mut b = IrBuilder::new("ترتيب");
        b.create_func("د", Type::I64);
        let p0 = b.add_param(None, Type::I64);
        let p1 = b.add_param(None, Type::I64);
        let entry = b.create_block("بداية");
        b.set_insert_point(entry);
        let r = b.emit_binary(
            Opcode::Mul,
            Type::I64,
            Value::reg(p1, Type::I64),
            Value::reg(p0, Type::I64),
        );
        b.emit_ret(Some(Value::reg(r, Type::I64)));

        let mut m = b.finish();
        assert!(Canonicalize.run(&mut m).unwrap());

        let f = m.function("د").unwrap();
        let mul = f.inst(f.block(entry).insts[0]);
        assert!(mul.operands[0].is_reg_num(p0));
        assert!(mul.operands[1].is_reg_num(p1));
    }

    #[test]
    fn test_sub_not_commutative() {
        let mut b = IrBuilder::new("طرح");
        b.create_func("د", Type::I64);
        let p = b.add_param(None, Type::I64);
        let entry = b.create_block("بداية");
        b.set_insert_point(entry);
        let r = b.emit_binary(
            Opcode::Sub,
            Type::I64,
            Value::const_int(3, Type::I64),
            Value::reg(p, Type::I64),
        );
        b.emit_ret(Some(Value::reg(r, Type::I64)));

        let mut m = b.finish();
        assert!(!Canonicalize.run(&mut m).unwrap());

        let f = m.function("د").unwrap();
        let sub = f.inst(f.block(entry).insts[0]);
        assert_eq!(sub.operands[0].as_const_int(), Some(3));
    }

    #[test]
    fn test_cmp_swap_flips_predicate() {
        // cmp gt 5, %p  ==>  cmp lt %p, 5
        let mut b = IrBuilder::new("قلب");
        b.create_func("د", Type::I64);
        let p = b.add_param(None, Type::I64);
        let entry = b.create_block("بداية");
        b.set_insert_point(entry);
        let c = b.emit_cmp(
            CmpPred::Gt,
            Value::const_int(5, Type::I64),
            Value::reg(p, Type::I64),
        );
        let _ = c;
        b.emit_ret(Some(Value::const_int(0, Type::I64)));

        let mut m = b.finish();
        assert!(Canonicalize.run(&mut m).unwrap());

        let f = m.function("د").unwrap();
        let cmp = f.inst(f.block(entry).insts[0]);
        assert!(cmp.operands[0].is_reg_num(p));
        assert_eq!(cmp.operands[1].as_const_int(), Some(5));
        assert_eq!(cmp.cmp_pred, Some(CmpPred::Lt));
    }

    #[test]
    fn test_eq_swap_keeps_predicate() {
        let mut b = IrBuilder::new("يساوي");
        b.create_func("د", Type::I64);
        let p = b.add_param(None, Type::I64);
        let entry = b.create_block("بداية");
        b.set_insert_point(entry);
        b.emit_cmp(CmpPred::Eq, Value::const_int(7, Type::I64), Value::reg(p, Type::I64));
        b.emit_ret(Some(Value::const_int(0, Type::I64)));

        let mut m = b.finish();
        assert!(Canonicalize.run(&mut m).unwrap());

        let f = m.function("د").unwrap();
        let cmp = f.inst(f.block(entry).insts[0]);
        assert_eq!(cmp.cmp_pred, Some(CmpPred::Eq));
        assert!(cmp.operands[0].is_reg_num(p));
    }
}
