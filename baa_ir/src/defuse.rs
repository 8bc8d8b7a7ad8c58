//! Def-use chains for SSA registers
//!
//! Built once per function epoch. The defining instruction (or parameter
//! flag) is recorded per register; use sites are `(instruction, slot)` index
//! pairs kept in one contiguous backing vector with per-register ranges, so
//! building allocates twice regardless of register count.

use crate::arena::{BlockId, InstId};
use crate::function::Function;
use crate::instruction::UseSlot;
use crate::value::Value;

/// The definition of a virtual register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Def {
    /// Never defined (register number unused)
    #[default]
    None,
    /// Defined by a function parameter
    Param,
    /// Defined by an instruction
    Inst { inst: InstId, block: BlockId },
}

/// One use of a register: the instruction and the slot within it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UseSite {
    pub inst: InstId,
    pub block: BlockId,
    pub slot: UseSlot,
}

/// Def-use chains of one function
#[derive(Debug, Clone, Default)]
pub struct DefUse {
    /// The function epoch this was built against
    pub built_epoch: u64,
    /// One past the highest register number observed
    pub max_reg: u32,
    /// A register was defined more than once (the IR is not in SSA form)
    pub has_duplicate_defs: bool,
    defs: Vec<Def>,
    uses_storage: Vec<UseSite>,
    use_ranges: Vec<(u32, u32)>,
}

impl DefUse {
    pub fn build(func: &Function) -> DefUse {
        let max_reg = scan_max_reg(func);
        let mut du = DefUse {
            built_epoch: func.ir_epoch,
            max_reg,
            has_duplicate_defs: false,
            defs: vec![Def::None; max_reg as usize],
            uses_storage: Vec::new(),
            use_ranges: vec![(0, 0); max_reg as usize],
        };

        for p in &func.params {
            if p.reg < max_reg {
                du.defs[p.reg as usize] = Def::Param;
            }
        }

        // Definitions, then use counts per register.
        let mut counts = vec![0u32; max_reg as usize];
        for &b in &func.block_order {
            for &i in &func.block(b).insts {
                let inst = func.inst(i);
                if let Some(d) = inst.dest {
                    if d < max_reg {
                        let slot = &mut du.defs[d as usize];
                        if !matches!(slot, Def::None) {
                            du.has_duplicate_defs = true;
                        }
                        *slot = Def::Inst { inst: i, block: b };
                    }
                }
                for (_, v) in inst.slots() {
                    if let Value::Reg { num, .. } = v {
                        if *num < max_reg {
                            counts[*num as usize] += 1;
                        }
                    }
                }
            }
        }

        // Prefix sums give each register its contiguous range.
        let total: u32 = counts.iter().sum();
        let mut start = 0u32;
        for (r, &c) in counts.iter().enumerate() {
            du.use_ranges[r] = (start, start);
            start += c;
        }
        du.uses_storage = vec![
            UseSite {
                inst: crate::arena::ArenaId::from_index(0),
                block: crate::arena::ArenaId::from_index(0),
                slot: UseSlot::Operand(0),
            };
            total as usize
        ];

        for &b in &func.block_order {
            for &i in &func.block(b).insts {
                for (slot, v) in func.inst(i).slots() {
                    if let Value::Reg { num, .. } = v {
                        if *num < max_reg {
                            let range = &mut du.use_ranges[*num as usize];
                            du.uses_storage[range.1 as usize] =
                                UseSite { inst: i, block: b, slot };
                            range.1 += 1;
                        }
                    }
                }
            }
        }

        du
    }

    pub fn def(&self, reg: u32) -> Def {
        self.defs.get(reg as usize).copied().unwrap_or(Def::None)
    }

    pub fn is_param(&self, reg: u32) -> bool {
        matches!(self.def(reg), Def::Param)
    }

    pub fn uses(&self, reg: u32) -> &[UseSite] {
        match self.use_ranges.get(reg as usize) {
            Some(&(start, end)) => &self.uses_storage[start as usize..end as usize],
            None => &[],
        }
    }

    pub fn use_count(&self, reg: u32) -> usize {
        self.uses(reg).len()
    }
}

fn scan_max_reg(func: &Function) -> u32 {
    let mut max = func.next_reg;
    for p in &func.params {
        max = max.max(p.reg + 1);
    }
    for &b in &func.block_order {
        for &i in &func.block(b).insts {
            let inst = func.inst(i);
            if let Some(d) = inst.dest {
                max = max.max(d + 1);
            }
            for (_, v) in inst.slots() {
                if let Value::Reg { num, .. } = v {
                    max = max.max(num + 1);
                }
            }
        }
    }
    max
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::{Inst, Opcode};
    use crate::types::Type;

    fn two_add_func() -> Function {
        let mut f = Function::new("اختبار", Type::I64);
        let p = f.add_param(None, Type::I64);
        let b = f.new_block(None);
        let r1 = f.alloc_reg();
        f.append_inst(
            b,
            Inst::binary(
                Opcode::Add,
                Type::I64,
                r1,
                Value::reg(p, Type::I64),
                Value::const_int(1, Type::I64),
            ),
        );
        let r2 = f.alloc_reg();
        f.append_inst(
            b,
            Inst::binary(
                Opcode::Add,
                Type::I64,
                r2,
                Value::reg(r1, Type::I64),
                Value::reg(r1, Type::I64),
            ),
        );
        f.append_inst(b, Inst::ret(Some(Value::reg(r2, Type::I64))));
        f
    }

    #[test]
    fn test_defs_and_uses() {
        let f = two_add_func();
        let du = DefUse::build(&f);

        assert_eq!(du.max_reg, 3);
        assert!(du.is_param(0));
        assert!(matches!(du.def(1), Def::Inst { .. }));
        assert_eq!(du.use_count(0), 1);
        assert_eq!(du.use_count(1), 2);
        assert_eq!(du.use_count(2), 1);
        assert!(!du.has_duplicate_defs);
    }

    #[test]
    fn test_duplicate_def_flagged() {
        let mut f = Function::new("مكرر", Type::I64);
        let b = f.new_block(None);
        let r = f.alloc_reg();
        f.append_inst(b, Inst::copy(Type::I64, r, Value::const_int(1, Type::I64)));
        f.append_inst(b, Inst::copy(Type::I64, r, Value::const_int(2, Type::I64)));
        f.append_inst(b, Inst::ret(Some(Value::reg(r, Type::I64))));

        let du = DefUse::build(&f);
        assert!(du.has_duplicate_defs);
    }

    #[test]
    fn test_use_sites_point_at_slots() {
        let f = two_add_func();
        let du = DefUse::build(&f);

        for site in du.uses(1) {
            let v = f.inst(site.inst).slot(site.slot).unwrap();
            assert!(v.is_reg_num(1));
        }
    }

    #[test]
    fn test_epoch_recorded() {
        let f = two_add_func();
        let du = DefUse::build(&f);
        assert_eq!(du.built_epoch, f.ir_epoch);
    }
}
