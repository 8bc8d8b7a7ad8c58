//! Instruction selection: IR to x86-64 machine instructions
//!
//! Lowering keeps virtual registers and flows data through `%rax` as the
//! accumulator, so every emitted instruction references at most one virtual
//! register; a spilled register then rewrites to a single memory operand,
//! which keeps the code legal x86. ABI registers (`rcx, rdx, r8, r9` for
//! arguments, `rax`/`rdx` around division and returns) appear as pinned
//! physical operands the allocator leaves alone.

use crate::machine::{
    Cc, MachineBlock, MachineFunc, MachineGlobal, MachineInst, MachineModule, MachineOpcode,
    MachineOperand, PhysReg, ARG_REGS, SHADOW_SPACE,
};
use baa_common::{BaaError, BaaResult};
use baa_ir::{
    ArenaId, BlockId, DataLayout, Function, Inst, Module, Opcode, Type, Value,
};
use hashbrown::HashMap;

/// The print statement intrinsic expanded into a printf call.
const PRINT_INTRINSIC: &str = "اطبع";

/// Lower a phi-free module to machine code.
pub fn select_module(module: &Module) -> BaaResult<MachineModule> {
    let mut out = MachineModule {
        name: module.name.clone(),
        funcs: Vec::new(),
        strings: module.strings().map(str::to_owned).collect(),
        globals: module
            .globals
            .iter()
            .map(|g| MachineGlobal {
                name: g.name.clone(),
                init: g.init.as_ref().and_then(Value::as_const_int).unwrap_or(0),
            })
            .collect(),
    };

    for func in &module.functions {
        if func.is_prototype {
            continue;
        }
        let selected = select_function(func)?;
        log::debug!(
            "اختيار التعليمات في {}: {} كتلة، إطار {} بايت",
            selected.name,
            selected.blocks.len(),
            selected.frame_size
        );
        out.funcs.push(selected);
    }
    Ok(out)
}

struct FuncSelector<'a> {
    func: &'a Function,
    layout: DataLayout,
    labels: HashMap<BlockId, String>,
    insts: Vec<MachineInst>,
    frame_size: u32,
    next_vreg: u32,
}

fn select_function(func: &Function) -> BaaResult<MachineFunc> {
    let labels: HashMap<BlockId, String> = func
        .block_order
        .iter()
        .enumerate()
        .map(|(serial, &b)| (b, format!(".Lblock_{}_{}", func.name, serial)))
        .collect();

    let mut sel = FuncSelector {
        func,
        layout: DataLayout::windows_x64(),
        labels,
        insts: Vec::new(),
        frame_size: 0,
        next_vreg: func.next_reg,
    };

    let mut blocks = Vec::new();
    for &b in &func.block_order {
        sel.insts = Vec::new();

        // Parameters arrive in rcx/rdx/r8/r9; pin them into their
        // registers at function entry.
        if Some(b) == func.entry() {
            for (i, p) in func.params.iter().enumerate() {
                match ARG_REGS.get(i) {
                    Some(&reg) => sel.push(
                        MachineOpcode::Mov,
                        [MachineOperand::phys(reg), MachineOperand::virt(p.reg)],
                    ),
                    None => {
                        // Fifth and later arguments live above the return
                        // address and saved rbp: 16 + shadow + slot.
                        let offset = 16 + SHADOW_SPACE as i32 + 8 * (i as i32 - 4);
                        sel.push(
                            MachineOpcode::Mov,
                            [MachineOperand::rbp_offset(offset), MachineOperand::phys(PhysReg::Rax)],
                        );
                        sel.push(
                            MachineOpcode::Mov,
                            [MachineOperand::phys(PhysReg::Rax), MachineOperand::virt(p.reg)],
                        );
                    }
                }
            }
        }

        for &i in &func.block(b).insts {
            sel.lower_inst(func.inst(i))?;
        }

        blocks.push(MachineBlock {
            label: sel.labels[&b].clone(),
            insts: std::mem::take(&mut sel.insts),
        });
    }

    Ok(MachineFunc {
        name: func.name.clone(),
        blocks,
        frame_size: sel.frame_size,
        next_vreg: sel.next_vreg,
        used_callee_saved: Vec::new(),
    })
}

impl<'a> FuncSelector<'a> {
    fn push(&mut self, op: MachineOpcode, operands: impl IntoIterator<Item = MachineOperand>) {
        self.insts.push(MachineInst::new(op, operands));
    }

    fn fresh_vreg(&mut self) -> u32 {
        let v = self.next_vreg;
        self.next_vreg += 1;
        v
    }

    fn label_of(&self, b: BlockId) -> BaaResult<MachineOperand> {
        self.labels
            .get(&b)
            .map(|l| MachineOperand::Label(l.clone()))
            .ok_or_else(|| {
                BaaError::codegen(format!(
                    "دالة @{}: هدف قفز إلى كتلة غير معروفة b{}",
                    self.func.name,
                    b.index()
                ))
            })
    }

    /// An immediate or a register operand for a value; addresses (globals,
    /// strings, function references) are materialized with `lea` into a
    /// fresh virtual register.
    fn operand(&mut self, v: &Value) -> BaaResult<MachineOperand> {
        match v {
            Value::ConstInt { value, .. } => Ok(MachineOperand::Imm(*value)),
            Value::Reg { num, .. } => Ok(MachineOperand::virt(*num)),
            Value::ConstStr { id } => Ok(self.lea_address(format!(".Lstr_{}", id))),
            Value::Global { name, .. } => Ok(self.lea_address(name.clone())),
            Value::FuncRef { name, .. } => Ok(self.lea_address(name.clone())),
            Value::Block(_) => Err(BaaError::codegen(format!(
                "دالة @{}: مرجع كتلة في موضع قيمة",
                self.func.name
            ))),
        }
    }

    fn lea_address(&mut self, symbol: String) -> MachineOperand {
        let t = self.fresh_vreg();
        self.push(
            MachineOpcode::Lea,
            [MachineOperand::RipRel(symbol), MachineOperand::virt(t)],
        );
        MachineOperand::virt(t)
    }

    fn mov_to_rax(&mut self, v: &Value) -> BaaResult<()> {
        let src = self.operand(v)?;
        self.push(MachineOpcode::Mov, [src, MachineOperand::phys(PhysReg::Rax)]);
        Ok(())
    }

    fn mov_rax_to(&mut self, dest: u32) {
        self.push(
            MachineOpcode::Mov,
            [MachineOperand::phys(PhysReg::Rax), MachineOperand::virt(dest)],
        );
    }

    fn dest_of(&self, inst: &Inst) -> BaaResult<u32> {
        inst.dest.ok_or_else(|| {
            BaaError::codegen(format!(
                "دالة @{}: تعليمة {} بدون سجل وجهة",
                self.func.name, inst.op
            ))
        })
    }

    fn lower_inst(&mut self, inst: &Inst) -> BaaResult<()> {
        match inst.op {
            Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::And | Opcode::Or => {
                let dest = self.dest_of(inst)?;
                let mop = match inst.op {
                    Opcode::Add => MachineOpcode::Add,
                    Opcode::Sub => MachineOpcode::Sub,
                    Opcode::Mul => MachineOpcode::Imul,
                    Opcode::And => MachineOpcode::And,
                    _ => MachineOpcode::Or,
                };
                self.mov_to_rax(&inst.operands[0])?;
                let rhs = self.operand(&inst.operands[1])?;
                self.push(mop, [rhs, MachineOperand::phys(PhysReg::Rax)]);
                self.mov_rax_to(dest);
            }
            Opcode::Div | Opcode::Mod => {
                let dest = self.dest_of(inst)?;
                self.mov_to_rax(&inst.operands[0])?;
                self.push(MachineOpcode::Cqo, []);
                // idiv takes no immediates; materialize into a scratch.
                let rhs = match self.operand(&inst.operands[1])? {
                    MachineOperand::Imm(v) => {
                        let t = self.fresh_vreg();
                        self.push(
                            MachineOpcode::Mov,
                            [MachineOperand::Imm(v), MachineOperand::virt(t)],
                        );
                        MachineOperand::virt(t)
                    }
                    other => other,
                };
                self.push(MachineOpcode::Idiv, [rhs]);
                let result = if inst.op == Opcode::Div { PhysReg::Rax } else { PhysReg::Rdx };
                self.push(
                    MachineOpcode::Mov,
                    [MachineOperand::phys(result), MachineOperand::virt(dest)],
                );
            }
            Opcode::Neg => {
                let dest = self.dest_of(inst)?;
                self.mov_to_rax(&inst.operands[0])?;
                self.push(MachineOpcode::Neg, [MachineOperand::phys(PhysReg::Rax)]);
                self.mov_rax_to(dest);
            }
            Opcode::Not => {
                let dest = self.dest_of(inst)?;
                self.mov_to_rax(&inst.operands[0])?;
                self.push(
                    MachineOpcode::Cmp,
                    [MachineOperand::Imm(0), MachineOperand::phys(PhysReg::Rax)],
                );
                self.push(MachineOpcode::Set(Cc::E), []);
                self.push(MachineOpcode::Movzbq, []);
                self.mov_rax_to(dest);
            }
            Opcode::Cmp => {
                let dest = self.dest_of(inst)?;
                let cc = Cc::from_pred(inst.cmp_pred.ok_or_else(|| {
                    BaaError::codegen(format!("دالة @{}: قارن بدون محمول", self.func.name))
                })?);
                self.mov_to_rax(&inst.operands[0])?;
                let rhs = self.operand(&inst.operands[1])?;
                self.push(MachineOpcode::Cmp, [rhs, MachineOperand::phys(PhysReg::Rax)]);
                self.push(MachineOpcode::Set(cc), []);
                self.push(MachineOpcode::Movzbq, []);
                self.mov_rax_to(dest);
            }
            Opcode::Copy => {
                let dest = self.dest_of(inst)?;
                self.mov_to_rax(&inst.operands[0])?;
                self.mov_rax_to(dest);
            }
            Opcode::Alloca => {
                let dest = self.dest_of(inst)?;
                let pointee = inst.ty.pointee().cloned().unwrap_or(Type::I64);
                let size = self.layout.size_of(&pointee).max(8).next_multiple_of(8);
                self.frame_size += size as u32;
                let offset = -(self.frame_size as i32);
                self.push(
                    MachineOpcode::Lea,
                    [MachineOperand::rbp_offset(offset), MachineOperand::virt(dest)],
                );
            }
            Opcode::Load => {
                let dest = self.dest_of(inst)?;
                let src = self.pointer_operand(&inst.operands[0])?;
                self.push(MachineOpcode::Mov, [src, MachineOperand::phys(PhysReg::Rax)]);
                self.mov_rax_to(dest);
            }
            Opcode::Store => {
                self.mov_to_rax(&inst.operands[0])?;
                let dst = self.pointer_operand(&inst.operands[1])?;
                self.push(MachineOpcode::Mov, [MachineOperand::phys(PhysReg::Rax), dst]);
            }
            Opcode::Br => {
                let target = inst.operands[0].as_block().ok_or_else(|| {
                    BaaError::codegen(format!("دالة @{}: قفز بدون هدف", self.func.name))
                })?;
                let label = self.label_of(target)?;
                self.push(MachineOpcode::Jmp, [label]);
            }
            Opcode::BrCond => {
                let then_label = match inst.operands[1].as_block() {
                    Some(b) => self.label_of(b)?,
                    None => {
                        return Err(BaaError::codegen(format!(
                            "دالة @{}: قفز_شرط بدون هدف",
                            self.func.name
                        )))
                    }
                };
                let else_label = match inst.operands[2].as_block() {
                    Some(b) => self.label_of(b)?,
                    None => {
                        return Err(BaaError::codegen(format!(
                            "دالة @{}: قفز_شرط بدون هدف",
                            self.func.name
                        )))
                    }
                };
                self.mov_to_rax(&inst.operands[0])?;
                self.push(
                    MachineOpcode::Test,
                    [MachineOperand::phys(PhysReg::Rax), MachineOperand::phys(PhysReg::Rax)],
                );
                self.push(MachineOpcode::Jcc(Cc::Ne), [then_label]);
                self.push(MachineOpcode::Jmp, [else_label]);
            }
            Opcode::Ret => {
                if let Some(v) = inst.operands.first() {
                    self.mov_to_rax(v)?;
                }
                self.push(MachineOpcode::Ret, []);
            }
            Opcode::Call => {
                self.lower_call(inst)?;
            }
            Opcode::Phi => {
                return Err(BaaError::codegen(format!(
                    "دالة @{}: فاي وصلت إلى اختيار التعليمات (لم تُشغَّل تمريرة الخروج من SSA)",
                    self.func.name
                )));
            }
        }
        Ok(())
    }

    /// Memory operand for a load/store pointer.
    fn pointer_operand(&mut self, ptr: &Value) -> BaaResult<MachineOperand> {
        match ptr {
            Value::Reg { num, .. } => {
                Ok(MachineOperand::Mem { base: crate::machine::MachineReg::Virt(*num), offset: 0 })
            }
            Value::Global { name, .. } => Ok(MachineOperand::RipRel(name.clone())),
            other => Err(BaaError::codegen(format!(
                "دالة @{}: مؤشر ذاكرة غير مدعوم ({})",
                self.func.name, other
            ))),
        }
    }

    fn lower_call(&mut self, inst: &Inst) -> BaaResult<()> {
        let call = inst.call.as_ref().ok_or_else(|| {
            BaaError::codegen(format!("دالة @{}: نداء بدون هدف", self.func.name))
        })?;

        if call.target == PRINT_INTRINSIC {
            return self.lower_print(&call.args);
        }

        // Stack arguments (fifth onwards) push in reverse; pad to keep the
        // stack 16-byte aligned at the call.
        let stack_args = call.args.len().saturating_sub(ARG_REGS.len());
        let pad = (stack_args % 2 == 1) as i64 * 8;
        if pad != 0 {
            self.push(
                MachineOpcode::Sub,
                [MachineOperand::Imm(pad), MachineOperand::phys(PhysReg::Rsp)],
            );
        }
        for v in call.args.iter().skip(ARG_REGS.len()).rev() {
            let op = self.operand(v)?;
            self.push(MachineOpcode::Push, [op]);
        }
        for (i, v) in call.args.iter().take(ARG_REGS.len()).enumerate() {
            let op = self.operand(v)?;
            self.push(MachineOpcode::Mov, [op, MachineOperand::phys(ARG_REGS[i])]);
        }

        self.push(
            MachineOpcode::Sub,
            [MachineOperand::Imm(SHADOW_SPACE), MachineOperand::phys(PhysReg::Rsp)],
        );
        self.push(MachineOpcode::Call, [MachineOperand::Sym(call.target.clone())]);
        self.push(
            MachineOpcode::Add,
            [
                MachineOperand::Imm(SHADOW_SPACE + 8 * stack_args as i64 + pad),
                MachineOperand::phys(PhysReg::Rsp),
            ],
        );

        if let Some(dest) = inst.dest {
            self.mov_rax_to(dest);
        }
        Ok(())
    }

    /// `اطبع` becomes a printf call with the matching format string.
    fn lower_print(&mut self, args: &[Value]) -> BaaResult<()> {
        let Some(arg) = args.first() else {
            return Err(BaaError::codegen("اطبع بدون وسيط".to_owned()));
        };
        let fmt = if matches!(arg, Value::ConstStr { .. }) { "fmt_str" } else { "fmt_int" };

        let op = self.operand(arg)?;
        self.push(MachineOpcode::Mov, [op, MachineOperand::phys(PhysReg::Rdx)]);
        self.push(
            MachineOpcode::Lea,
            [MachineOperand::RipRel(fmt.to_owned()), MachineOperand::phys(PhysReg::Rcx)],
        );
        self.push(
            MachineOpcode::Sub,
            [MachineOperand::Imm(SHADOW_SPACE), MachineOperand::phys(PhysReg::Rsp)],
        );
        self.push(MachineOpcode::Call, [MachineOperand::Sym("printf".to_owned())]);
        self.push(
            MachineOpcode::Add,
            [MachineOperand::Imm(SHADOW_SPACE), MachineOperand::phys(PhysReg::Rsp)],
        );
        Ok(())
    }
}
