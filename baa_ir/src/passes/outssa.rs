//! Out-of-SSA transformation (خروج_من_SSA)
//!
//! Replaces phis with explicit copies on the incoming edges. Copies land at
//! the end of the predecessor when it has a single successor; otherwise the
//! edge is critical and a fresh block is inserted on it. The copies of one
//! edge are scheduled as a parallel copy group: a copy is only emitted once
//! its destination is no longer needed as a source, and cycles are broken
//! through a fresh temporary register. After the pass no phis remain and
//! registers may have several definitions.

use crate::analysis;
use crate::arena::{ArenaId, BlockId, InstId};
use crate::function::Function;
use crate::instruction::Inst;
use crate::module::Module;
use crate::passes::Pass;
use crate::types::Type;
use crate::value::Value;
use baa_common::{BaaResult, SourceLoc};

pub struct OutOfSsa;

impl Pass for OutOfSsa {
    fn name(&self) -> &'static str {
        "خروج_من_SSA"
    }

    fn run(&mut self, module: &mut Module) -> BaaResult<bool> {
        let mut changed = false;
        for func in &mut module.functions {
            changed |= lower_function(func);
        }
        Ok(changed)
    }
}

struct EdgeCopy {
    dest: u32,
    ty: Type,
    src: Value,
    loc: Option<SourceLoc>,
    dbg_name: Option<String>,
}

fn lower_function(func: &mut Function) -> bool {
    if func.is_prototype || func.entry().is_none() {
        return false;
    }
    analysis::rebuild_preds(func);

    let mut changed = false;

    for b in func.block_order.clone() {
        let phis = func.phis(b);
        if phis.is_empty() {
            continue;
        }

        for pred in func.block(b).preds.clone() {
            let copies: Vec<EdgeCopy> = phis
                .iter()
                .map(|&p| {
                    let phi = func.inst(p);
                    let ty = phi.ty.clone();
                    // A missing incoming means incomplete IR; default to
                    // zero rather than fail here, the verifier reports it.
                    let src = phi
                        .phi_incoming(pred)
                        .cloned()
                        .unwrap_or_else(|| Value::const_int(0, ty.clone()));
                    EdgeCopy {
                        dest: phi.dest.unwrap_or(0),
                        ty,
                        src,
                        loc: phi.loc.clone(),
                        dbg_name: phi.dbg_name.clone(),
                    }
                })
                .collect();

            // Critical edge: insert the copies in a fresh block on the edge.
            let insert_block = if func.block(pred).succs.len() == 1 {
                pred
            } else {
                split_phi_edge(func, pred, b)
            };

            emit_parallel_copies(func, insert_block, copies);
            changed = true;
        }

        for p in phis {
            func.remove_inst(b, p);
        }
    }

    if changed {
        analysis::rebuild_preds(func);
    }
    changed
}

/// Insert a block on `pred -> succ` for edge copies. Predecessor caches are
/// deliberately left stale: the surrounding loop works on its snapshot and
/// rebuilds once at the end.
fn split_phi_edge(func: &mut Function, pred: BlockId, succ: BlockId) -> BlockId {
    let label = format!("كتلة_فاي_حافة_{}_{}", pred.index(), succ.index());
    let split = func.new_block(Some(&label));

    if let Some(term) = func.terminator(pred) {
        func.inst_mut(term).replace_target(succ, split);
    }
    func.append_inst(split, Inst::br(succ));
    split
}

fn emit_copy(func: &mut Function, block: BlockId, before: Option<InstId>, copy: &EdgeCopy, src: Value) {
    let mut inst = Inst::copy(copy.ty.clone(), copy.dest, src);
    inst.loc = copy.loc.clone();
    inst.dbg_name = copy.dbg_name.clone();
    match before {
        Some(term) => {
            func.insert_inst_before(block, term, inst);
        }
        None => {
            func.append_inst(block, inst);
        }
    }
}

fn emit_parallel_copies(func: &mut Function, block: BlockId, mut copies: Vec<EdgeCopy>) {
    let before = func.terminator(block);
    let n = copies.len();
    let mut done = vec![false; n];
    let mut remaining = n;

    // Self-copies carry no information.
    for (i, c) in copies.iter().enumerate() {
        if c.src.is_reg_num(c.dest) {
            done[i] = true;
            remaining -= 1;
        }
    }

    while remaining > 0 {
        let mut progress = false;

        // Emit every copy whose destination is not needed as a remaining
        // source.
        for i in 0..n {
            if done[i] {
                continue;
            }
            let dest = copies[i].dest;
            let dest_still_read = copies
                .iter()
                .enumerate()
                .any(|(j, c)| !done[j] && j != i && c.src.is_reg_num(dest));
            if !dest_still_read {
                let src = copies[i].src.clone();
                emit_copy(func, block, before, &copies[i], src);
                done[i] = true;
                remaining -= 1;
                progress = true;
            }
        }

        if progress {
            continue;
        }

        // Every remaining copy participates in a cycle. Save one destination
        // into a fresh temporary and redirect its readers there.
        let Some(pick) = (0..n).find(|&i| !done[i]) else { break };
        let cycle_dest = copies[pick].dest;
        let ty = copies[pick].ty.clone();
        let temp = func.alloc_reg();

        let saved = EdgeCopy {
            dest: temp,
            ty: ty.clone(),
            src: Value::reg(cycle_dest, ty.clone()),
            loc: copies[pick].loc.clone(),
            dbg_name: copies[pick].dbg_name.clone(),
        };
        let src = saved.src.clone();
        emit_copy(func, block, before, &saved, src);

        for (j, c) in copies.iter_mut().enumerate() {
            if !done[j] && c.src.is_reg_num(cycle_dest) {
                c.src = Value::reg(temp, ty.clone());
            }
        }
    }
}
