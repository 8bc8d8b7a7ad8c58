//! Linear-scan register allocation
//!
//! Instructions are numbered in block order; a backward liveness data-flow
//! gives live-in/live-out per block; each virtual register gets one live
//! interval spanning every occurrence plus the block boundaries it is live
//! across. Intervals are walked in start order, expiring finished ones and
//! spilling the latest-ending interval when the pool runs dry. Spilled
//! registers rewrite to `rbp`-relative slots; `r11` stays out of the pool
//! as the scratch register for spilled address bases, and intervals that
//! span a call only take callee-saved registers.

use crate::machine::{
    MachineFunc, MachineInst, MachineModule, MachineOpcode, MachineOperand, MachineReg, PhysReg,
};
use baa_common::{BaaError, BaaResult};
use hashbrown::{HashMap, HashSet};

/// Callee-saved allocation pool: safe across calls.
const CALLEE_POOL: [PhysReg; 5] =
    [PhysReg::Rbx, PhysReg::R12, PhysReg::R13, PhysReg::R14, PhysReg::R15];

/// Caller-saved pool member, preferred for call-free intervals.
const CALLER_POOL: [PhysReg; 1] = [PhysReg::R10];

/// Reserved for spill-slot address loads; never allocated.
pub const SCRATCH: PhysReg = PhysReg::R11;

#[derive(Debug, Clone, Copy)]
struct Interval {
    vreg: u32,
    start: u32,
    end: u32,
    crosses_call: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Loc {
    Reg(PhysReg),
    /// rbp-relative frame offset
    Slot(i32),
}

pub fn allocate_module(module: &mut MachineModule) -> BaaResult<()> {
    for func in &mut module.funcs {
        allocate_function(func)?;
    }
    Ok(())
}

pub fn allocate_function(func: &mut MachineFunc) -> BaaResult<()> {
    let intervals = build_intervals(func);
    let interval_count = intervals.len();
    let (assignment, spill_slots, used_callee) = run_linear_scan(func, intervals);

    log::debug!(
        "تخصيص السجلات في {}: {} فترة حية، {} تسريب",
        func.name,
        interval_count,
        spill_slots
    );

    func.frame_size += 8 * spill_slots;
    func.used_callee_saved = used_callee;

    rewrite_operands(func, &assignment)
}

/// Number the instructions, run liveness, and build one interval per vreg.
fn build_intervals(func: &MachineFunc) -> Vec<Interval> {
    // Global numbering and per-block index ranges.
    let mut block_range: Vec<(u32, u32)> = Vec::with_capacity(func.blocks.len());
    let mut next = 0u32;
    for block in &func.blocks {
        let first = next;
        next += block.insts.len() as u32;
        block_range.push((first, next));
    }

    let label_to_block: HashMap<&str, usize> = func
        .blocks
        .iter()
        .enumerate()
        .map(|(i, b)| (b.label.as_str(), i))
        .collect();
    let succs: Vec<Vec<usize>> = func
        .blocks
        .iter()
        .map(|b| {
            b.insts
                .iter()
                .flat_map(|inst| inst.jump_targets())
                .filter_map(|l| label_to_block.get(l).copied())
                .collect()
        })
        .collect();

    // Per-block upward-exposed reads and writes.
    let mut uses: Vec<HashSet<u32>> = Vec::with_capacity(func.blocks.len());
    let mut defs: Vec<HashSet<u32>> = Vec::with_capacity(func.blocks.len());
    for block in &func.blocks {
        let mut used = HashSet::new();
        let mut defined = HashSet::new();
        for inst in &block.insts {
            for r in inst.vregs_read() {
                if !defined.contains(&r) {
                    used.insert(r);
                }
            }
            for w in inst.vregs_written() {
                defined.insert(w);
            }
        }
        uses.push(used);
        defs.push(defined);
    }

    // Backward data-flow to a fixpoint.
    let n = func.blocks.len();
    let mut live_in: Vec<HashSet<u32>> = vec![HashSet::new(); n];
    let mut live_out: Vec<HashSet<u32>> = vec![HashSet::new(); n];
    let mut changed = true;
    while changed {
        changed = false;
        for b in (0..n).rev() {
            let mut out = HashSet::new();
            for &s in &succs[b] {
                out.extend(live_in[s].iter().copied());
            }
            let mut inn: HashSet<u32> = uses[b].clone();
            for &v in &out {
                if !defs[b].contains(&v) {
                    inn.insert(v);
                }
            }
            if out != live_out[b] || inn != live_in[b] {
                live_out[b] = out;
                live_in[b] = inn;
                changed = true;
            }
        }
    }

    // Occurrence-based ranges, extended across live block boundaries.
    let mut ranges: HashMap<u32, (u32, u32)> = HashMap::new();
    let mut extend = |v: u32, idx: u32, ranges: &mut HashMap<u32, (u32, u32)>| {
        let e = ranges.entry(v).or_insert((idx, idx));
        e.0 = e.0.min(idx);
        e.1 = e.1.max(idx);
    };

    let mut calls: Vec<u32> = Vec::new();
    let mut idx = 0u32;
    for block in &func.blocks {
        for inst in &block.insts {
            if inst.is_call() {
                calls.push(idx);
            }
            for r in inst.vregs_read() {
                extend(r, idx, &mut ranges);
            }
            for w in inst.vregs_written() {
                extend(w, idx, &mut ranges);
            }
            idx += 1;
        }
    }
    for (b, (first, after)) in block_range.iter().enumerate() {
        if first == after {
            continue;
        }
        for &v in &live_in[b] {
            extend(v, *first, &mut ranges);
        }
        for &v in &live_out[b] {
            extend(v, after - 1, &mut ranges);
        }
    }

    let mut intervals: Vec<Interval> = ranges
        .into_iter()
        .map(|(vreg, (start, end))| Interval {
            vreg,
            start,
            end,
            crosses_call: calls.iter().any(|&c| start <= c && c <= end),
        })
        .collect();
    intervals.sort_by_key(|iv| (iv.start, iv.vreg));
    intervals
}

fn compatible(reg: PhysReg, iv: &Interval) -> bool {
    !iv.crosses_call || reg.is_callee_saved()
}

fn run_linear_scan(
    func: &MachineFunc,
    intervals: Vec<Interval>,
) -> (HashMap<u32, Loc>, u32, Vec<PhysReg>) {
    let mut assignment: HashMap<u32, Loc> = HashMap::new();
    let mut active: Vec<(Interval, PhysReg)> = Vec::new();
    let mut spill_slots = 0u32;
    let mut used_callee: Vec<PhysReg> = Vec::new();

    let mut new_slot = |spill_slots: &mut u32| -> Loc {
        *spill_slots += 1;
        Loc::Slot(-((func.frame_size + 8 * *spill_slots) as i32))
    };

    for iv in intervals {
        active.retain(|(a, _)| a.end >= iv.start);

        let in_use: HashSet<PhysReg> = active.iter().map(|&(_, r)| r).collect();
        let candidates: Vec<PhysReg> = if iv.crosses_call {
            CALLEE_POOL.to_vec()
        } else {
            CALLER_POOL.iter().chain(CALLEE_POOL.iter()).copied().collect()
        };

        if let Some(&reg) = candidates.iter().find(|r| !in_use.contains(*r)) {
            assignment.insert(iv.vreg, Loc::Reg(reg));
            if reg.is_callee_saved() && !used_callee.contains(&reg) {
                used_callee.push(reg);
            }
            active.push((iv, reg));
            continue;
        }

        // Pool exhausted: spill the latest-ending compatible interval.
        let victim_idx = active
            .iter()
            .enumerate()
            .filter(|(_, (_, r))| compatible(*r, &iv))
            .max_by_key(|(_, (a, _))| a.end)
            .map(|(i, _)| i);

        match victim_idx {
            Some(vi) if active[vi].0.end > iv.end => {
                let (victim, reg) = active.swap_remove(vi);
                assignment.insert(victim.vreg, new_slot(&mut spill_slots));
                assignment.insert(iv.vreg, Loc::Reg(reg));
                active.push((iv, reg));
            }
            _ => {
                assignment.insert(iv.vreg, new_slot(&mut spill_slots));
            }
        }
    }

    (assignment, spill_slots, used_callee)
}

fn rewrite_operands(func: &mut MachineFunc, assignment: &HashMap<u32, Loc>) -> BaaResult<()> {
    let func_name = func.name.clone();
    let lookup = |v: u32| -> BaaResult<Loc> {
        assignment.get(&v).copied().ok_or_else(|| {
            BaaError::codegen(format!("دالة @{}: سجل افتراضي %v{} بلا تخصيص", func_name, v))
        })
    };

    for block in &mut func.blocks {
        let mut out: Vec<MachineInst> = Vec::with_capacity(block.insts.len());
        for inst in block.insts.drain(..) {
            let mut inst = inst;
            let mut prefix: Option<MachineInst> = None;
            let mut suffix: Option<MachineInst> = None;

            for op in inst.operands.iter_mut() {
                match op {
                    MachineOperand::Reg(MachineReg::Virt(v)) => match lookup(*v)? {
                        Loc::Reg(p) => *op = MachineOperand::phys(p),
                        Loc::Slot(off) => *op = MachineOperand::rbp_offset(off),
                    },
                    MachineOperand::Mem { base: MachineReg::Virt(v), offset } => {
                        match lookup(*v)? {
                            Loc::Reg(p) => {
                                *op = MachineOperand::Mem {
                                    base: MachineReg::Phys(p),
                                    offset: *offset,
                                };
                            }
                            Loc::Slot(off) => {
                                // The address itself is in memory: load it
                                // into the scratch register first.
                                prefix = Some(MachineInst::new(
                                    MachineOpcode::Mov,
                                    [
                                        MachineOperand::rbp_offset(off),
                                        MachineOperand::phys(SCRATCH),
                                    ],
                                ));
                                *op = MachineOperand::Mem {
                                    base: MachineReg::Phys(SCRATCH),
                                    offset: *offset,
                                };
                            }
                        }
                    }
                    _ => {}
                }
            }

            // lea cannot target memory; route through the scratch register.
            if inst.op == MachineOpcode::Lea {
                if let Some(MachineOperand::Mem { base: MachineReg::Phys(PhysReg::Rbp), offset }) =
                    inst.operands.last().cloned()
                {
                    if inst.operands.len() == 2 {
                        suffix = Some(MachineInst::new(
                            MachineOpcode::Mov,
                            [
                                MachineOperand::phys(SCRATCH),
                                MachineOperand::rbp_offset(offset),
                            ],
                        ));
                        inst.operands[1] = MachineOperand::phys(SCRATCH);
                    }
                }
            }

            if let Some(p) = prefix {
                out.push(p);
            }
            out.push(inst);
            if let Some(s) = suffix {
                out.push(s);
            }
        }
        block.insts = out;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isel::select_module;
    use baa_ir::{IrBuilder, Opcode, Type, Value};

    fn no_virtuals_left(func: &MachineFunc) -> bool {
        func.blocks.iter().all(|b| {
            b.insts.iter().all(|i| {
                i.operands.iter().all(|op| {
                    !matches!(
                        op,
                        MachineOperand::Reg(MachineReg::Virt(_))
                            | MachineOperand::Mem { base: MachineReg::Virt(_), .. }
                    )
                })
            })
        })
    }

    fn lowered(module: &baa_ir::Module) -> MachineModule {
        let mut mm = select_module(module).unwrap();
        allocate_module(&mut mm).unwrap();
        mm
    }

    #[test]
    fn test_simple_function_fully_allocated() {
        let mut b = IrBuilder::new("بسيط");
        b.create_func("main", Type::I64);
        let p = b.add_param(None, Type::I64);
        let entry = b.create_block("بداية");
        b.set_insert_point(entry);
        let r = b.emit_binary(
            Opcode::Add,
            Type::I64,
            Value::reg(p, Type::I64),
            Value::const_int(3, Type::I64),
        );
        b.emit_ret(Some(Value::reg(r, Type::I64)));

        let mm = lowered(&b.finish());
        assert!(no_virtuals_left(&mm.funcs[0]));
        assert_eq!(mm.funcs[0].frame_size, 0);
    }

    #[test]
    fn test_many_live_values_force_spill() {
        // Build more simultaneously-live values than the pool holds.
        let mut b = IrBuilder::new("ضغط");
        b.create_func("main", Type::I64);
        let p = b.add_param(None, Type::I64);
        let entry = b.create_block("بداية");
        b.set_insert_point(entry);

        let mut regs = Vec::new();
        for i in 0..9 {
            regs.push(b.emit_binary(
                Opcode::Add,
                Type::I64,
                Value::reg(p, Type::I64),
                Value::const_int(i, Type::I64),
            ));
        }
        // Sum them all so every intermediate stays live to the end.
        let mut acc = regs[0];
        for &r in &regs[1..] {
            acc = b.emit_binary(
                Opcode::Add,
                Type::I64,
                Value::reg(acc, Type::I64),
                Value::reg(r, Type::I64),
            );
        }
        b.emit_ret(Some(Value::reg(acc, Type::I64)));

        let mm = lowered(&b.finish());
        let f = &mm.funcs[0];
        assert!(no_virtuals_left(f));
        // At least one value had to go to the frame.
        assert!(f.frame_size >= 8);
        let uses_slot = f.blocks.iter().any(|blk| {
            blk.insts.iter().any(|i| {
                i.operands.iter().any(|op| {
                    matches!(op, MachineOperand::Mem { base: MachineReg::Phys(PhysReg::Rbp), .. })
                })
            })
        });
        assert!(uses_slot);
    }

    #[test]
    fn test_interval_across_call_gets_callee_saved() {
        let mut b = IrBuilder::new("عبر_نداء");
        b.create_func("main", Type::I64);
        let p = b.add_param(None, Type::I64);
        let entry = b.create_block("بداية");
        b.set_insert_point(entry);
        let kept = b.emit_binary(
            Opcode::Add,
            Type::I64,
            Value::reg(p, Type::I64),
            Value::const_int(1, Type::I64),
        );
        let called = b.emit_call("أخرى", Type::I64, vec![]).unwrap();
        let sum = b.emit_binary(
            Opcode::Add,
            Type::I64,
            Value::reg(kept, Type::I64),
            Value::reg(called, Type::I64),
        );
        b.emit_ret(Some(Value::reg(sum, Type::I64)));

        let mm = lowered(&b.finish());
        let f = &mm.funcs[0];
        assert!(no_virtuals_left(f));
        // Something lives across the call, so a callee-saved register (or a
        // frame slot) must be in play; r10 alone cannot carry it.
        assert!(!f.used_callee_saved.is_empty() || f.frame_size > 0);
    }

    #[test]
    fn test_spilled_pointer_base_uses_scratch() {
        // Enough address values alive at once that one alloca pointer
        // spills; its memory access must go through r11.
        let mut b = IrBuilder::new("مؤشرات");
        b.create_func("main", Type::I64);
        let entry = b.create_block("بداية");
        b.set_insert_point(entry);

        let mut ptrs = Vec::new();
        for i in 0..8 {
            let ptr = b.emit_alloca(Type::I64);
            b.emit_store(Value::const_int(i, Type::I64), Value::reg(ptr, Type::I64.ptr_to()));
            ptrs.push(ptr);
        }
        let mut acc = b.emit_load(Type::I64, Value::reg(ptrs[0], Type::I64.ptr_to()));
        for &ptr in &ptrs[1..] {
            let v = b.emit_load(Type::I64, Value::reg(ptr, Type::I64.ptr_to()));
            acc = b.emit_binary(
                Opcode::Add,
                Type::I64,
                Value::reg(acc, Type::I64),
                Value::reg(v, Type::I64),
            );
        }
        b.emit_ret(Some(Value::reg(acc, Type::I64)));

        let mm = lowered(&b.finish());
        assert!(no_virtuals_left(&mm.funcs[0]));
    }
}
