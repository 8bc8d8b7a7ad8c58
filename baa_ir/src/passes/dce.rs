//! Dead code elimination (حذف_الميت)
//!
//! Removes unreachable blocks (no path from entry) and instructions whose
//! destination register has no uses and which carry no side effects. Calls
//! are conservatively kept even when their result is unused; stores and
//! terminators are always live. The instruction sweep iterates so removals
//! cascade.

use crate::analysis::{self, reachable_blocks};
use crate::defuse::DefUse;
use crate::function::Function;
use crate::instruction::Opcode;
use crate::module::Module;
use crate::passes::Pass;
use baa_common::BaaResult;

pub struct Dce;

impl Pass for Dce {
    fn name(&self) -> &'static str {
        "حذف_الميت"
    }

    fn run(&mut self, module: &mut Module) -> BaaResult<bool> {
        let mut changed = false;
        for func in &mut module.functions {
            changed |= remove_unreachable_blocks(func);
            changed |= remove_dead_instructions(func);
        }
        Ok(changed)
    }
}

fn remove_unreachable_blocks(func: &mut Function) -> bool {
    if func.is_prototype || func.entry().is_none() {
        return false;
    }
    analysis::rebuild_preds(func);

    let reachable = reachable_blocks(func);
    if reachable.len() == func.block_order.len() {
        return false;
    }

    // Prune phi entries referencing unreachable predecessors before the
    // blocks disappear.
    for b in func.block_order.clone() {
        if !reachable.contains(&b) {
            continue;
        }
        for i in func.phis(b) {
            func.inst_mut(i)
                .phi_entries
                .retain(|e| reachable.contains(&e.block));
        }
    }

    func.block_order.retain(|b| reachable.contains(b));
    func.bump_epoch();
    analysis::rebuild_preds(func);
    true
}

fn is_removable_dead(func: &Function, inst_id: crate::arena::InstId, du: &DefUse) -> bool {
    let inst = func.inst(inst_id);
    let Some(dest) = inst.dest else { return false };
    if inst.has_side_effects() {
        return false;
    }
    du.use_count(dest) == 0
}

fn remove_dead_instructions(func: &mut Function) -> bool {
    if func.is_prototype || func.entry().is_none() {
        return false;
    }

    let mut changed = false;
    // Use counts are recomputed each sweep; a removal can make the operands
    // of the removed instruction dead, which the next sweep picks up.
    loop {
        let du = DefUse::build(func);
        let mut progress = false;

        for b in func.block_order.clone() {
            for i in func.block(b).insts.clone() {
                if is_removable_dead(func, i, &du) {
                    func.remove_inst(b, i);
                    progress = true;
                    changed = true;
                }
            }
        }

        if !progress {
            break;
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::IrBuilder;
    use crate::types::Type;
    use crate::value::Value;

    #[test]
    fn test_cascading_dead_arithmetic() {
        // %a = add 1, 2 ; %b = sub %a, 1 ; call @foo() ; ret 0
        // Both %a and %b die; the call stays.
        let mut b = IrBuilder::new("ميت");
        b.create_func("د", Type::I64);
        let entry = b.create_block("بداية");
        b.set_insert_point(entry);
        let a = b.emit_binary(
            Opcode::Add,
            Type::I64,
            Value::const_int(1, Type::I64),
            Value::const_int(2, Type::I64),
        );
        let s = b.emit_binary(
            Opcode::Sub,
            Type::I64,
            Value::reg(a, Type::I64),
            Value::const_int(1, Type::I64),
        );
        let _ = s;
        b.emit_call("عمل", Type::Void, vec![]);
        b.emit_ret(Some(Value::const_int(0, Type::I64)));

        let mut m = b.finish();
        assert!(Dce.run(&mut m).unwrap());

        let f = m.function("د").unwrap();
        let ops: Vec<Opcode> = f.block(entry).insts.iter().map(|&i| f.inst(i).op).collect();
        assert_eq!(ops, vec![Opcode::Call, Opcode::Ret]);
    }

    #[test]
    fn test_unreachable_block_removed() {
        let mut b = IrBuilder::new("وصول");
        b.create_func("د", Type::I64);
        let entry = b.create_block("بداية");
        b.set_insert_point(entry);
        b.emit_ret(Some(Value::const_int(0, Type::I64)));

        let orphan = b.create_block("يتيمة");
        b.set_insert_point(orphan);
        b.emit_ret(Some(Value::const_int(9, Type::I64)));

        let mut m = b.finish();
        assert!(Dce.run(&mut m).unwrap());

        let f = m.function("د").unwrap();
        assert_eq!(f.block_count(), 1);
        assert_eq!(f.entry(), Some(entry));
    }

    #[test]
    fn test_phi_entry_pruned_with_unreachable_pred() {
        let mut b = IrBuilder::new("تقليم");
        b.create_func("د", Type::I64);
        let entry = b.create_block("بداية");
        let merge = b.create_block("دمج");
        let orphan = b.create_block("يتيمة");

        b.set_insert_point(entry);
        b.emit_br(merge);

        b.set_insert_point(orphan);
        b.emit_br(merge);

        let (phi, phi_reg) = b.emit_phi(merge, Type::I64);
        b.phi_add_incoming(phi, Value::const_int(1, Type::I64), entry);
        b.phi_add_incoming(phi, Value::const_int(2, Type::I64), orphan);
        b.set_insert_point(merge);
        b.emit_ret(Some(Value::reg(phi_reg, Type::I64)));

        let mut m = b.finish();
        assert!(Dce.run(&mut m).unwrap());

        let f = m.function("د").unwrap();
        let phi_inst = f.inst(f.phis(merge)[0]);
        assert_eq!(phi_inst.phi_entries.len(), 1);
        assert_eq!(phi_inst.phi_entries[0].block, entry);
    }

    #[test]
    fn test_store_is_never_dead() {
        let mut b = IrBuilder::new("خزن");
        b.create_func("د", Type::I64);
        let entry = b.create_block("بداية");
        b.set_insert_point(entry);
        let ptr = b.emit_alloca(Type::I64);
        b.emit_store(Value::const_int(5, Type::I64), Value::reg(ptr, Type::I64.ptr_to()));
        b.emit_ret(Some(Value::const_int(0, Type::I64)));

        let mut m = b.finish();
        // The alloca is used by the store; the store has side effects.
        assert!(!Dce.run(&mut m).unwrap());

        let f = m.function("د").unwrap();
        assert_eq!(f.block(entry).insts.len(), 3);
    }
}
