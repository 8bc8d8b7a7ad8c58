//! IR well-formedness and SSA verifiers
//!
//! The well-formedness verifier checks rules that must hold at every stage:
//! terminator placement, operand counts, type consistency, phi placement and
//! phi/predecessor agreement, call signatures when the target is known in the
//! module. The SSA verifier checks the SSA property itself (single
//! definition, dominance of uses) and runs only between SSA construction and
//! the out-of-SSA pass, which breaks the property on purpose.

use crate::analysis::{self, DomTree};
use crate::arena::{ArenaId, BlockId, InstId};
use crate::defuse::{Def, DefUse};
use crate::function::Function;
use crate::instruction::{Inst, Opcode, UseSlot};
use crate::module::Module;
use crate::types::Type;
use crate::value::Value;
use baa_common::Diagnostics;
use hashbrown::HashMap;

/// Verify well-formedness of every function in the module.
pub fn verify_module_ir(module: &mut Module) -> Result<(), Diagnostics> {
    let mut diags = Diagnostics::new();

    let signatures: HashMap<String, (Vec<Type>, Type)> = module
        .functions
        .iter()
        .map(|f| {
            (
                f.name.clone(),
                (f.params.iter().map(|p| p.ty.clone()).collect(), f.ret_ty.clone()),
            )
        })
        .collect();

    for func in &mut module.functions {
        if func.is_prototype {
            continue;
        }
        analysis::rebuild_preds(func);
        verify_func_ir(func, &signatures, &mut diags);
    }

    if diags.has_errors() {
        Err(diags)
    } else {
        Ok(())
    }
}

/// Verify the SSA property for every function in the module.
pub fn verify_module_ssa(module: &mut Module) -> Result<(), Diagnostics> {
    let mut diags = Diagnostics::new();
    for func in &mut module.functions {
        if func.is_prototype {
            continue;
        }
        analysis::rebuild_preds(func);
        verify_func_ssa(func, &mut diags);
    }

    if diags.has_errors() {
        Err(diags)
    } else {
        Ok(())
    }
}

fn place(func: &Function, block: BlockId, inst: &Inst) -> String {
    format!(
        "دالة @{}، كتلة %{}_{}، تعليمة {} ({})",
        func.name,
        func.block(block).label,
        block.index(),
        inst.id,
        inst.op
    )
}

fn verify_func_ir(
    func: &Function,
    signatures: &HashMap<String, (Vec<Type>, Type)>,
    diags: &mut Diagnostics,
) {
    if !analysis::validate_cfg(func, diags) {
        return;
    }

    for &b in &func.block_order {
        let mut seen_non_phi = false;
        for &i in &func.block(b).insts {
            let inst = func.inst(i);

            if inst.op == Opcode::Phi {
                if seen_non_phi {
                    diags.error(format!("{}: فاي بعد تعليمة غير فاي", place(func, b, inst)));
                }
            } else {
                seen_non_phi = true;
            }

            verify_inst(func, b, inst, signatures, diags);
        }

        for &i in &func.phis(b) {
            verify_phi_entries(func, b, func.inst(i), diags);
        }
    }
}

fn operand_count_ok(op: Opcode, count: usize) -> bool {
    match op {
        Opcode::Add
        | Opcode::Sub
        | Opcode::Mul
        | Opcode::Div
        | Opcode::Mod
        | Opcode::And
        | Opcode::Or
        | Opcode::Cmp
        | Opcode::Store => count == 2,
        Opcode::Neg | Opcode::Not | Opcode::Copy | Opcode::Load | Opcode::Br => count == 1,
        Opcode::BrCond => count == 3,
        Opcode::Ret => count <= 1,
        Opcode::Alloca | Opcode::Call | Opcode::Phi => count == 0,
    }
}

fn needs_dest(inst: &Inst) -> bool {
    match inst.op {
        Opcode::Add
        | Opcode::Sub
        | Opcode::Mul
        | Opcode::Div
        | Opcode::Mod
        | Opcode::Neg
        | Opcode::And
        | Opcode::Or
        | Opcode::Not
        | Opcode::Cmp
        | Opcode::Copy
        | Opcode::Alloca
        | Opcode::Load
        | Opcode::Phi => true,
        Opcode::Call => inst.ty != Type::Void,
        Opcode::Store | Opcode::Br | Opcode::BrCond | Opcode::Ret => false,
    }
}

fn verify_inst(
    func: &Function,
    block: BlockId,
    inst: &Inst,
    signatures: &HashMap<String, (Vec<Type>, Type)>,
    diags: &mut Diagnostics,
) {
    if !operand_count_ok(inst.op, inst.operands.len()) {
        diags.error(format!(
            "{}: عدد معاملات غير صحيح ({})",
            place(func, block, inst),
            inst.operands.len()
        ));
        return;
    }

    if needs_dest(inst) && inst.dest.is_none() {
        diags.error(format!("{}: تعليمة منتجة لقيمة بدون سجل وجهة", place(func, block, inst)));
    }
    if !needs_dest(inst) && inst.dest.is_some() {
        diags.error(format!("{}: تعليمة بلا قيمة تملك سجل وجهة", place(func, block, inst)));
    }

    match inst.op {
        Opcode::Add
        | Opcode::Sub
        | Opcode::Mul
        | Opcode::Div
        | Opcode::Mod
        | Opcode::And
        | Opcode::Or => {
            if !inst.ty.is_int() {
                diags.error(format!("{}: نوع نتيجة غير صحيح {}", place(func, block, inst), inst.ty));
            }
            for v in &inst.operands {
                if v.ty() != inst.ty {
                    diags.error(format!(
                        "{}: نوع معامل {} لا يطابق نوع النتيجة {}",
                        place(func, block, inst),
                        v.ty(),
                        inst.ty
                    ));
                }
            }
        }
        Opcode::Neg | Opcode::Not | Opcode::Copy => {
            if inst.operands[0].ty() != inst.ty {
                diags.error(format!(
                    "{}: نوع المعامل {} لا يطابق نوع النتيجة {}",
                    place(func, block, inst),
                    inst.operands[0].ty(),
                    inst.ty
                ));
            }
        }
        Opcode::Cmp => {
            if inst.ty != Type::I1 {
                diags.error(format!("{}: نتيجة قارن يجب أن تكون i1", place(func, block, inst)));
            }
            if inst.cmp_pred.is_none() {
                diags.error(format!("{}: قارن بدون محمول", place(func, block, inst)));
            }
            let (l, r) = (inst.operands[0].ty(), inst.operands[1].ty());
            if l != r || !l.is_int() {
                diags.error(format!(
                    "{}: معاملا قارن بنوعين غير متوافقين ({}، {})",
                    place(func, block, inst),
                    l,
                    r
                ));
            }
        }
        Opcode::Alloca => {
            if !inst.ty.is_ptr() {
                diags.error(format!("{}: نتيجة حجز يجب أن تكون مؤشراً", place(func, block, inst)));
            }
        }
        Opcode::Load => {
            match inst.operands[0].ty().pointee() {
                Some(pointee) if *pointee == inst.ty => {}
                Some(pointee) => diags.error(format!(
                    "{}: نوع الحمل {} لا يطابق نوع المشار إليه {}",
                    place(func, block, inst),
                    inst.ty,
                    pointee
                )),
                None => diags.error(format!(
                    "{}: معامل حمل ليس مؤشراً ({})",
                    place(func, block, inst),
                    inst.operands[0].ty()
                )),
            }
        }
        Opcode::Store => {
            let value_ty = inst.operands[0].ty();
            match inst.operands[1].ty().pointee() {
                Some(pointee) if *pointee == value_ty => {}
                Some(pointee) => diags.error(format!(
                    "{}: نوع القيمة المخزنة {} لا يطابق نوع المشار إليه {}",
                    place(func, block, inst),
                    value_ty,
                    pointee
                )),
                None => diags.error(format!(
                    "{}: وجهة الخزن ليست مؤشراً ({})",
                    place(func, block, inst),
                    inst.operands[1].ty()
                )),
            }
        }
        Opcode::Br => {
            if inst.operands[0].as_block().is_none() {
                diags.error(format!("{}: هدف قفز ليس كتلة", place(func, block, inst)));
            }
        }
        Opcode::BrCond => {
            if inst.operands[0].ty() != Type::I1 {
                diags.error(format!(
                    "{}: شرط قفز_شرط يجب أن يكون i1 (وجد {})",
                    place(func, block, inst),
                    inst.operands[0].ty()
                ));
            }
            for v in &inst.operands[1..] {
                if v.as_block().is_none() {
                    diags.error(format!("{}: هدف قفز_شرط ليس كتلة", place(func, block, inst)));
                }
            }
        }
        Opcode::Ret => {
            if func.ret_ty == Type::Void {
                if !inst.operands.is_empty() {
                    diags.error(format!(
                        "{}: رجوع بقيمة من دالة بلا نوع رجوع",
                        place(func, block, inst)
                    ));
                }
            } else if inst.operands.len() != 1 {
                diags.error(format!("{}: رجوع بدون قيمة", place(func, block, inst)));
            } else if inst.operands[0].ty() != func.ret_ty {
                diags.error(format!(
                    "{}: نوع قيمة الرجوع {} لا يطابق نوع الدالة {}",
                    place(func, block, inst),
                    inst.operands[0].ty(),
                    func.ret_ty
                ));
            }
        }
        Opcode::Call => {
            let Some(call) = &inst.call else {
                diags.error(format!("{}: نداء بدون هدف", place(func, block, inst)));
                return;
            };
            if let Some((param_tys, ret_ty)) = signatures.get(&call.target) {
                if call.args.len() != param_tys.len() {
                    diags.error(format!(
                        "{}: عدد وسائط نداء @{} هو {} والمتوقع {}",
                        place(func, block, inst),
                        call.target,
                        call.args.len(),
                        param_tys.len()
                    ));
                }
                for (arg, expected) in call.args.iter().zip(param_tys) {
                    if arg.ty() != *expected {
                        diags.error(format!(
                            "{}: نوع وسيط نداء @{} هو {} والمتوقع {}",
                            place(func, block, inst),
                            call.target,
                            arg.ty(),
                            expected
                        ));
                    }
                }
                if inst.ty != *ret_ty {
                    diags.error(format!(
                        "{}: نوع نتيجة نداء @{} هو {} والمتوقع {}",
                        place(func, block, inst),
                        call.target,
                        inst.ty,
                        ret_ty
                    ));
                }
            }
        }
        Opcode::Phi => {
            for e in &inst.phi_entries {
                if e.value.ty() != inst.ty {
                    diags.error(format!(
                        "{}: قيمة فاي بنوع {} والمتوقع {}",
                        place(func, block, inst),
                        e.value.ty(),
                        inst.ty
                    ));
                }
            }
        }
    }
}

/// Check that a phi has exactly one entry per predecessor, no duplicates and
/// no entries for blocks that are not predecessors. Requires up-to-date
/// predecessor caches.
fn verify_phi_entries(func: &Function, block: BlockId, phi: &Inst, diags: &mut Diagnostics) {
    let preds = &func.block(block).preds;

    let mut seen: Vec<BlockId> = Vec::new();
    for e in &phi.phi_entries {
        if seen.contains(&e.block) {
            diags.error(format!(
                "{}: مدخل فاي مكرر للسابق %{}_{}",
                place(func, block, phi),
                func.block(e.block).label,
                e.block.index()
            ));
        }
        seen.push(e.block);

        if !preds.contains(&e.block) {
            diags.error(format!(
                "{}: مدخل فاي لكتلة ليست سابقاً (%{}_{})",
                place(func, block, phi),
                func.block(e.block).label,
                e.block.index()
            ));
        }
    }

    for &p in preds {
        if !seen.contains(&p) {
            diags.error(format!(
                "{}: لا يوجد مدخل فاي للسابق %{}_{}",
                place(func, block, phi),
                func.block(p).label,
                p.index()
            ));
        }
    }
}

fn verify_func_ssa(func: &Function, diags: &mut Diagnostics) {
    let du = DefUse::build(func);

    if du.has_duplicate_defs {
        for reg in 0..du.max_reg {
            let param = func.params.iter().any(|p| p.reg == reg);
            let mut defs = 0;
            for &b in &func.block_order {
                for &i in &func.block(b).insts {
                    if func.inst(i).dest == Some(reg) {
                        defs += 1;
                    }
                }
            }
            if defs + usize::from(param) > 1 {
                diags.error(format!(
                    "دالة @{}: السجل %{} له أكثر من تعريف واحد",
                    func.name, reg
                ));
            }
        }
    }

    let dom = DomTree::compute(func);
    let inst_pos: HashMap<InstId, (BlockId, usize)> = func
        .block_order
        .iter()
        .flat_map(|&b| {
            func.block(b)
                .insts
                .iter()
                .enumerate()
                .map(move |(pos, &i)| (i, (b, pos)))
        })
        .collect();

    for &b in &func.block_order {
        for &i in &func.block(b).insts {
            let inst = func.inst(i);
            for (slot, v) in inst.slots() {
                let Value::Reg { num, .. } = v else { continue };
                match du.def(*num) {
                    Def::Param => {}
                    Def::None => {
                        diags.error(format!(
                            "{}: استعمال سجل %{} بدون تعريف",
                            place(func, b, inst),
                            num
                        ));
                    }
                    Def::Inst { inst: def_inst, block: def_block } => {
                        // A phi use must be dominated at the end of the
                        // incoming edge, not at the phi itself.
                        let use_point = match slot {
                            UseSlot::PhiValue(idx) => inst.phi_entries[idx].block,
                            _ => b,
                        };
                        let dominated = if matches!(slot, UseSlot::PhiValue(_)) {
                            dom.dominates(def_block, use_point)
                        } else if def_block == b {
                            match (inst_pos.get(&def_inst), inst_pos.get(&i)) {
                                (Some(&(_, def_pos)), Some(&(_, use_pos))) => def_pos < use_pos,
                                _ => false,
                            }
                        } else {
                            dom.dominates(def_block, b)
                        };
                        if !dominated {
                            diags.error(format!(
                                "{}: استعمال سجل %{} لا يسيطر عليه تعريفه",
                                place(func, b, inst),
                                num
                            ));
                        }
                    }
                }
            }
        }
    }

    for &b in &func.block_order {
        for &i in &func.phis(b) {
            verify_phi_entries(func, b, func.inst(i), diags);
        }
    }
}
