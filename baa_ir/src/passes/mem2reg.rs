//! Memory-to-register promotion (SSA construction)
//!
//! Promotes stack slots to SSA registers. An alloca is promotable iff its
//! pointer never escapes: every use is either a load from it or a store into
//! it as the destination, never the stored value, a call argument or a phi
//! incoming. Phi nodes are placed on the iterated dominance frontier of the
//! store blocks, then a dominator-tree walk renames loads into copies of the
//! reaching value and deletes the stores and the alloca.

use crate::analysis::{self, reachable_blocks, DomTree, DominanceFrontier};
use crate::arena::{ArenaId, BlockId, InstId};
use crate::defuse::DefUse;
use crate::function::Function;
use crate::instruction::{Inst, Opcode, UseSlot};
use crate::module::Module;
use crate::passes::Pass;
use crate::types::Type;
use crate::value::Value;
use baa_common::BaaResult;
use hashbrown::{HashMap, HashSet};
use smallvec::smallvec;

pub struct Mem2Reg;

impl Pass for Mem2Reg {
    fn name(&self) -> &'static str {
        "ترقية_الذاكرة_إلى_سجلات"
    }

    fn run(&mut self, module: &mut Module) -> BaaResult<bool> {
        let mut changed = false;
        for func in &mut module.functions {
            changed |= promote_function(func);
        }
        Ok(changed)
    }
}

struct AllocaInfo {
    inst: InstId,
    block: BlockId,
    reg: u32,
    pointee: Type,
}

fn promote_function(func: &mut Function) -> bool {
    if func.is_prototype || func.entry().is_none() {
        return false;
    }
    analysis::rebuild_preds(func);

    let allocas = find_promotable(func);
    if allocas.is_empty() {
        return false;
    }

    let dom = DomTree::compute(func);
    let df = DominanceFrontier::compute(func, &dom);
    let du = DefUse::build(func);

    let reg_to_alloca: HashMap<u32, usize> =
        allocas.iter().enumerate().map(|(i, a)| (a.reg, i)).collect();

    // Phase 2: place empty phis on the iterated dominance frontier of the
    // store blocks of each alloca.
    let mut phi_of: HashMap<InstId, usize> = HashMap::new();
    for (ai, a) in allocas.iter().enumerate() {
        let mut work: Vec<BlockId> = Vec::new();
        let mut queued: HashSet<BlockId> = HashSet::new();
        for site in du.uses(a.reg) {
            let is_store_dest = matches!(site.slot, UseSlot::Operand(1))
                && func.inst(site.inst).op == Opcode::Store;
            if is_store_dest && queued.insert(site.block) {
                work.push(site.block);
            }
        }

        let mut placed: HashSet<BlockId> = HashSet::new();
        while let Some(b) = work.pop() {
            for &d in df.frontier(b) {
                if placed.insert(d) {
                    let dest = func.alloc_reg();
                    let phi = func.insert_phi(d, Inst::phi(a.pointee.clone(), dest));
                    phi_of.insert(phi, ai);
                    if queued.insert(d) {
                        work.push(d);
                    }
                }
            }
        }
    }

    // Phase 3: rename along the dominator tree.
    let children = dom.children(func);
    let mut stacks: Vec<Vec<Value>> = vec![Vec::new(); allocas.len()];
    let mut delete_list: Vec<(BlockId, InstId)> = Vec::new();
    if let Some(entry) = func.entry() {
        rename_block(
            func,
            entry,
            &children,
            &allocas,
            &reg_to_alloca,
            &phi_of,
            &mut stacks,
            &mut delete_list,
        );
    }

    for &(block, inst) in &delete_list {
        func.remove_inst(block, inst);
    }
    for a in &allocas {
        func.remove_inst(a.block, a.inst);
    }

    true
}

/// Phase 1: find allocas whose pointer never escapes. Allocas touched from
/// unreachable blocks are left alone until dead-code elimination prunes
/// those blocks.
fn find_promotable(func: &Function) -> Vec<AllocaInfo> {
    let du = DefUse::build(func);
    let reachable = reachable_blocks(func);
    let mut out = Vec::new();

    for &b in &func.block_order {
        for &i in &func.block(b).insts {
            let inst = func.inst(i);
            if inst.op != Opcode::Alloca {
                continue;
            }
            let Some(reg) = inst.dest else { continue };
            let Some(pointee) = inst.ty.pointee().cloned() else { continue };
            if !reachable.contains(&b) {
                continue;
            }

            let mut ok = true;
            for site in du.uses(reg) {
                if !reachable.contains(&site.block) {
                    ok = false;
                    break;
                }
                let user = func.inst(site.inst);
                match (user.op, site.slot) {
                    (Opcode::Load, UseSlot::Operand(0)) => {
                        if user.ty != pointee {
                            ok = false;
                        }
                    }
                    (Opcode::Store, UseSlot::Operand(1)) => {
                        if user.operands[0].ty() != pointee {
                            ok = false;
                        }
                    }
                    // Stored as a value, passed to a call, fed into a phi
                    // or anything else: the pointer escapes.
                    _ => ok = false,
                }
                if !ok {
                    break;
                }
            }

            if ok {
                out.push(AllocaInfo { inst: i, block: b, reg, pointee });
            }
        }
    }
    out
}

#[allow(clippy::too_many_arguments)]
fn rename_block(
    func: &mut Function,
    block: BlockId,
    children: &[Vec<BlockId>],
    allocas: &[AllocaInfo],
    reg_to_alloca: &HashMap<u32, usize>,
    phi_of: &HashMap<InstId, usize>,
    stacks: &mut Vec<Vec<Value>>,
    delete_list: &mut Vec<(BlockId, InstId)>,
) {
    let mut pushed = vec![0usize; allocas.len()];

    let inst_ids: Vec<InstId> = func.block(block).insts.clone();
    for i in inst_ids {
        let inst = func.inst(i);
        match inst.op {
            Opcode::Phi => {
                if let (Some(&ai), Some(dest)) = (phi_of.get(&i), inst.dest) {
                    stacks[ai].push(Value::reg(dest, allocas[ai].pointee.clone()));
                    pushed[ai] += 1;
                }
            }
            Opcode::Store => {
                let ptr_reg = inst.operands[1].as_reg();
                if let Some(&ai) = ptr_reg.and_then(|r| reg_to_alloca.get(&r)) {
                    let stored = inst.operands[0].clone();
                    stacks[ai].push(stored);
                    pushed[ai] += 1;
                    delete_list.push((block, i));
                }
            }
            Opcode::Load => {
                let ptr_reg = inst.operands[0].as_reg();
                if let Some(&ai) = ptr_reg.and_then(|r| reg_to_alloca.get(&r)) {
                    let current = reaching_value(&stacks[ai], &allocas[ai].pointee);
                    let inst = func.inst_mut(i);
                    inst.op = Opcode::Copy;
                    inst.operands = smallvec![current];
                }
            }
            _ => {}
        }
    }

    // Fill phi incomings of CFG successors from the current stack tops.
    let succs: Vec<BlockId> = func.block(block).succs.clone();
    for s in succs {
        for phi in func.phis(s) {
            if let Some(&ai) = phi_of.get(&phi) {
                let value = reaching_value(&stacks[ai], &allocas[ai].pointee);
                func.inst_mut(phi).phi_add(value, block);
            }
        }
    }

    for &child in &children[block.index()] {
        rename_block(
            func,
            child,
            children,
            allocas,
            reg_to_alloca,
            phi_of,
            stacks,
            delete_list,
        );
    }

    for (ai, n) in pushed.iter().enumerate() {
        let len = stacks[ai].len();
        stacks[ai].truncate(len - n);
    }
}

/// Current value of an alloca. A read before any store yields zero of the
/// slot type.
fn reaching_value(stack: &[Value], pointee: &Type) -> Value {
    stack
        .last()
        .cloned()
        .unwrap_or_else(|| Value::const_int(0, pointee.clone()))
}
