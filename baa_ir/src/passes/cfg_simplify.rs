//! CFG simplification (تبسيط_CFG)
//!
//! - `br_cond c, X, X` becomes `br X`.
//! - A non-entry block whose only instruction is an unconditional branch and
//!   which holds no phis is dissolved by retargeting its predecessors. When
//!   the branch target has phis, the block is only dissolved if it has a
//!   single predecessor and the merge would not duplicate a phi entry.
//! - `split_critical_edge` is the shared helper for passes that must insert
//!   code on an edge.

use crate::analysis;
use crate::arena::{ArenaId, BlockId};
use crate::function::Function;
use crate::instruction::{Inst, Opcode};
use crate::module::Module;
use crate::passes::Pass;
use baa_common::BaaResult;

pub struct CfgSimplify;

impl Pass for CfgSimplify {
    fn name(&self) -> &'static str {
        "تبسيط_CFG"
    }

    fn run(&mut self, module: &mut Module) -> BaaResult<bool> {
        let mut changed = false;
        for func in &mut module.functions {
            if func.is_prototype || func.entry().is_none() {
                continue;
            }
            let mut func_changed = remove_redundant_brcond(func);
            func_changed |= remove_trivial_blocks(func);
            if func_changed {
                analysis::rebuild_preds(func);
            }
            changed |= func_changed;
        }
        Ok(changed)
    }
}

/// Split the edge `pred -> succ` when it is critical (pred has several
/// successors and succ several predecessors): a fresh block branching to
/// `succ` is inserted and `pred`'s terminator retargeted. Phi entries in
/// `succ` follow the edge. Returns the inserted block, `succ` itself when
/// the edge is not critical, or `None` when no such edge exists.
pub fn split_critical_edge(
    func: &mut Function,
    pred: BlockId,
    succ: BlockId,
) -> Option<BlockId> {
    analysis::rebuild_preds(func);

    if !func.block(pred).succs.contains(&succ) {
        return None;
    }
    if func.block(pred).succs.len() <= 1 || func.block(succ).preds.len() <= 1 {
        return Some(succ);
    }

    let label = format!("كتلة_تقسيم_حافة_{}_{}", pred.index(), succ.index());
    let split = func.new_block(Some(&label));

    if let Some(term) = func.terminator(pred) {
        func.inst_mut(term).replace_target(succ, split);
    }
    func.append_inst(split, Inst::br(succ));

    for phi in func.phis(succ) {
        for e in &mut func.inst_mut(phi).phi_entries {
            if e.block == pred {
                e.block = split;
            }
        }
    }

    analysis::rebuild_preds(func);
    Some(split)
}

fn remove_redundant_brcond(func: &mut Function) -> bool {
    let mut changed = false;
    for b in func.block_order.clone() {
        let Some(term) = func.terminator(b) else { continue };
        let inst = func.inst(term);
        if inst.op != Opcode::BrCond {
            continue;
        }
        let targets = inst.successors();
        if targets.len() != 2 || targets[0] != targets[1] {
            continue;
        }

        let mut br = Inst::br(targets[0]);
        br.loc = inst.loc.clone();
        br.dbg_name = inst.dbg_name.clone();

        func.remove_inst(b, term);
        func.append_inst(b, br);
        changed = true;
    }
    if changed {
        analysis::rebuild_preds(func);
    }
    changed
}

fn trivial_branch_target(func: &Function, b: BlockId) -> Option<BlockId> {
    let block = func.block(b);
    if block.insts.len() != 1 {
        return None;
    }
    let inst = func.inst(block.insts[0]);
    if inst.op != Opcode::Br {
        return None;
    }
    let target = inst.operands[0].as_block()?;
    (target != b).then_some(target)
}

fn remove_trivial_blocks(func: &mut Function) -> bool {
    analysis::rebuild_preds(func);
    let mut changed = false;

    // Dissolving one block can expose another; rescan until stable.
    let mut progress = true;
    while progress {
        progress = false;

        let entry = match func.entry() {
            Some(e) => e,
            None => break,
        };

        for b in func.block_order.clone() {
            if b == entry {
                continue;
            }
            let Some(target) = trivial_branch_target(func, b) else { continue };
            if func.block_has_phi(b) {
                continue;
            }

            // Phis in the target restrict dissolution: only a single
            // predecessor can be folded through, and only when the target
            // has no entry for it yet.
            if func.block_has_phi(target) {
                let preds = func.block(b).preds.clone();
                if preds.len() != 1 {
                    continue;
                }
                let sole_pred = preds[0];
                let duplicate = func.phis(target).iter().any(|&p| {
                    func.inst(p).phi_entries.iter().any(|e| e.block == sole_pred)
                });
                if duplicate {
                    continue;
                }
                for p in func.phis(target) {
                    for e in &mut func.inst_mut(p).phi_entries {
                        if e.block == b {
                            e.block = sole_pred;
                        }
                    }
                }
            }

            for pred in func.block(b).preds.clone() {
                if let Some(term) = func.terminator(pred) {
                    func.inst_mut(term).replace_target(b, target);
                }
            }

            func.remove_block(b);
            analysis::rebuild_preds(func);
            changed = true;
            progress = true;
            break;
        }
    }

    changed
}
