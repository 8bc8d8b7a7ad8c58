//! Machine-level representation for the x86-64 back-end
//!
//! Instruction selection lowers IR into this form with virtual registers;
//! the register allocator rewrites them to physical registers and frame
//! slots; emission prints AT&T syntax. Operands are stored in AT&T order
//! (source first, destination last).

use baa_ir::CmpPred;
use smallvec::SmallVec;
use std::fmt;

/// x86-64 general purpose registers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PhysReg {
    Rax,
    Rbx,
    Rcx,
    Rdx,
    Rsi,
    Rdi,
    Rbp,
    Rsp,
    R8,
    R9,
    R10,
    R11,
    R12,
    R13,
    R14,
    R15,
}

impl PhysReg {
    pub fn name(self) -> &'static str {
        match self {
            PhysReg::Rax => "rax",
            PhysReg::Rbx => "rbx",
            PhysReg::Rcx => "rcx",
            PhysReg::Rdx => "rdx",
            PhysReg::Rsi => "rsi",
            PhysReg::Rdi => "rdi",
            PhysReg::Rbp => "rbp",
            PhysReg::Rsp => "rsp",
            PhysReg::R8 => "r8",
            PhysReg::R9 => "r9",
            PhysReg::R10 => "r10",
            PhysReg::R11 => "r11",
            PhysReg::R12 => "r12",
            PhysReg::R13 => "r13",
            PhysReg::R14 => "r14",
            PhysReg::R15 => "r15",
        }
    }

    /// Non-volatile under the Windows x64 ABI.
    pub fn is_callee_saved(self) -> bool {
        matches!(
            self,
            PhysReg::Rbx
                | PhysReg::Rbp
                | PhysReg::Rsi
                | PhysReg::Rdi
                | PhysReg::Rsp
                | PhysReg::R12
                | PhysReg::R13
                | PhysReg::R14
                | PhysReg::R15
        )
    }
}

impl fmt::Display for PhysReg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.name())
    }
}

/// Integer argument registers under the Windows x64 ABI, in order.
pub const ARG_REGS: [PhysReg; 4] = [PhysReg::Rcx, PhysReg::Rdx, PhysReg::R8, PhysReg::R9];

/// Shadow space the caller reserves before every call (Windows x64).
pub const SHADOW_SPACE: i64 = 32;

/// A virtual or physical register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MachineReg {
    Virt(u32),
    Phys(PhysReg),
}

impl MachineReg {
    pub fn as_virt(self) -> Option<u32> {
        match self {
            MachineReg::Virt(v) => Some(v),
            MachineReg::Phys(_) => None,
        }
    }
}

impl fmt::Display for MachineReg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MachineReg::Virt(v) => write!(f, "%v{}", v),
            MachineReg::Phys(p) => write!(f, "{}", p),
        }
    }
}

/// Condition codes used by `set` and conditional jumps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cc {
    E,
    Ne,
    L,
    Le,
    G,
    Ge,
}

impl Cc {
    pub fn from_pred(pred: CmpPred) -> Cc {
        match pred {
            CmpPred::Eq => Cc::E,
            CmpPred::Ne => Cc::Ne,
            CmpPred::Lt => Cc::L,
            CmpPred::Le => Cc::Le,
            CmpPred::Gt => Cc::G,
            CmpPred::Ge => Cc::Ge,
        }
    }

    pub fn suffix(self) -> &'static str {
        match self {
            Cc::E => "e",
            Cc::Ne => "ne",
            Cc::L => "l",
            Cc::Le => "le",
            Cc::G => "g",
            Cc::Ge => "ge",
        }
    }
}

/// Machine operand, AT&T notation
#[derive(Debug, Clone, PartialEq)]
pub enum MachineOperand {
    Reg(MachineReg),
    Imm(i64),
    /// `offset(base)`
    Mem { base: MachineReg, offset: i32 },
    /// `name(%rip)`
    RipRel(String),
    /// Branch target label
    Label(String),
    /// Call target symbol
    Sym(String),
}

impl MachineOperand {
    pub fn virt(v: u32) -> Self {
        MachineOperand::Reg(MachineReg::Virt(v))
    }

    pub fn phys(p: PhysReg) -> Self {
        MachineOperand::Reg(MachineReg::Phys(p))
    }

    pub fn rbp_offset(offset: i32) -> Self {
        MachineOperand::Mem { base: MachineReg::Phys(PhysReg::Rbp), offset }
    }
}

impl fmt::Display for MachineOperand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MachineOperand::Reg(r) => write!(f, "{}", r),
            MachineOperand::Imm(v) => write!(f, "${}", v),
            MachineOperand::Mem { base, offset } => {
                if *offset == 0 {
                    write!(f, "({})", base)
                } else {
                    write!(f, "{}({})", offset, base)
                }
            }
            MachineOperand::RipRel(name) => write!(f, "{}(%rip)", name),
            MachineOperand::Label(l) => write!(f, "{}", l),
            MachineOperand::Sym(s) => write!(f, "{}", s),
        }
    }
}

/// Machine opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineOpcode {
    Mov,
    Lea,
    Add,
    Sub,
    Imul,
    And,
    Or,
    Neg,
    Cqo,
    Idiv,
    Cmp,
    Test,
    /// `set<cc> %al`
    Set(Cc),
    /// `movzbq %al, %rax`
    Movzbq,
    Jmp,
    /// `j<cc> target`
    Jcc(Cc),
    Call,
    Push,
    Pop,
    /// Expanded into the epilogue at emission
    Ret,
}

/// One machine instruction
#[derive(Debug, Clone, PartialEq)]
pub struct MachineInst {
    pub op: MachineOpcode,
    pub operands: SmallVec<[MachineOperand; 2]>,
}

impl MachineInst {
    pub fn new(op: MachineOpcode, operands: impl IntoIterator<Item = MachineOperand>) -> Self {
        Self { op, operands: operands.into_iter().collect() }
    }

    /// Virtual registers this instruction reads. Memory base registers are
    /// always reads, wherever the operand sits.
    pub fn vregs_read(&self) -> SmallVec<[u32; 2]> {
        let mut out = SmallVec::new();
        let mut note = |op: &MachineOperand, is_dest: bool| match op {
            MachineOperand::Reg(MachineReg::Virt(v)) => {
                let read = match self.op {
                    MachineOpcode::Mov | MachineOpcode::Lea | MachineOpcode::Movzbq => !is_dest,
                    MachineOpcode::Add
                    | MachineOpcode::Sub
                    | MachineOpcode::Imul
                    | MachineOpcode::And
                    | MachineOpcode::Or => true,
                    MachineOpcode::Neg
                    | MachineOpcode::Idiv
                    | MachineOpcode::Cmp
                    | MachineOpcode::Test
                    | MachineOpcode::Push => true,
                    _ => false,
                };
                if read {
                    out.push(*v);
                }
            }
            MachineOperand::Mem { base: MachineReg::Virt(v), .. } => out.push(*v),
            _ => {}
        };

        let last = self.operands.len().saturating_sub(1);
        for (i, op) in self.operands.iter().enumerate() {
            note(op, i == last && self.operands.len() > 1);
        }
        out
    }

    /// Virtual registers this instruction writes.
    pub fn vregs_written(&self) -> SmallVec<[u32; 2]> {
        let mut out = SmallVec::new();
        let dest_written = matches!(
            self.op,
            MachineOpcode::Mov
                | MachineOpcode::Lea
                | MachineOpcode::Movzbq
                | MachineOpcode::Add
                | MachineOpcode::Sub
                | MachineOpcode::Imul
                | MachineOpcode::And
                | MachineOpcode::Or
                | MachineOpcode::Pop
        );
        let neg_like = matches!(self.op, MachineOpcode::Neg);

        if dest_written {
            if let Some(MachineOperand::Reg(MachineReg::Virt(v))) = self.operands.last() {
                out.push(*v);
            }
        }
        if neg_like {
            if let Some(MachineOperand::Reg(MachineReg::Virt(v))) = self.operands.first() {
                out.push(*v);
            }
        }
        out
    }

    pub fn is_call(&self) -> bool {
        self.op == MachineOpcode::Call
    }

    /// Branch target labels of this instruction.
    pub fn jump_targets(&self) -> SmallVec<[&str; 2]> {
        let mut out = SmallVec::new();
        if matches!(self.op, MachineOpcode::Jmp | MachineOpcode::Jcc(_)) {
            for op in &self.operands {
                if let MachineOperand::Label(l) = op {
                    out.push(l.as_str());
                }
            }
        }
        out
    }
}

impl fmt::Display for MachineInst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.op {
            MachineOpcode::Cqo => write!(f, "cqo"),
            MachineOpcode::Ret => write!(f, "ret"),
            MachineOpcode::Set(cc) => write!(f, "set{} %al", cc.suffix()),
            MachineOpcode::Movzbq => write!(f, "movzbq %al, %rax"),
            _ => {
                let mnemonic = match self.op {
                    MachineOpcode::Mov => "mov",
                    MachineOpcode::Lea => "lea",
                    MachineOpcode::Add => "add",
                    MachineOpcode::Sub => "sub",
                    MachineOpcode::Imul => "imul",
                    MachineOpcode::And => "and",
                    MachineOpcode::Or => "or",
                    MachineOpcode::Neg => "neg",
                    MachineOpcode::Idiv => "idiv",
                    MachineOpcode::Cmp => "cmp",
                    MachineOpcode::Test => "test",
                    MachineOpcode::Jmp => "jmp",
                    MachineOpcode::Jcc(cc) => return self.fmt_jcc(f, cc),
                    MachineOpcode::Call => "call",
                    MachineOpcode::Push => "push",
                    MachineOpcode::Pop => "pop",
                    _ => "??",
                };
                write!(f, "{}", mnemonic)?;
                for (i, op) in self.operands.iter().enumerate() {
                    if i == 0 {
                        write!(f, " {}", op)?;
                    } else {
                        write!(f, ", {}", op)?;
                    }
                }
                Ok(())
            }
        }
    }
}

impl MachineInst {
    fn fmt_jcc(&self, f: &mut fmt::Formatter<'_>, cc: Cc) -> fmt::Result {
        write!(f, "j{}", cc.suffix())?;
        for (i, op) in self.operands.iter().enumerate() {
            if i == 0 {
                write!(f, " {}", op)?;
            } else {
                write!(f, ", {}", op)?;
            }
        }
        Ok(())
    }
}

/// A machine basic block
#[derive(Debug, Clone)]
pub struct MachineBlock {
    pub label: String,
    pub insts: Vec<MachineInst>,
}

/// A machine function with frame bookkeeping
#[derive(Debug, Clone)]
pub struct MachineFunc {
    pub name: String,
    pub blocks: Vec<MachineBlock>,
    /// Bytes of locals (alloca slots, then spill slots) below rbp
    pub frame_size: u32,
    pub next_vreg: u32,
    /// Callee-saved registers the allocator handed out; the prologue and
    /// epilogue save and restore them
    pub used_callee_saved: Vec<PhysReg>,
}

/// A global with its integer initializer
#[derive(Debug, Clone)]
pub struct MachineGlobal {
    pub name: String,
    pub init: i64,
}

/// A whole lowered module
#[derive(Debug, Clone)]
pub struct MachineModule {
    pub name: String,
    pub funcs: Vec<MachineFunc>,
    pub strings: Vec<String>,
    pub globals: Vec<MachineGlobal>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    #[test]
    fn test_operand_display() {
        assert_eq!(MachineOperand::Imm(8).to_string(), "$8");
        assert_eq!(MachineOperand::phys(PhysReg::Rax).to_string(), "%rax");
        assert_eq!(MachineOperand::rbp_offset(-16).to_string(), "-16(%rbp)");
        assert_eq!(
            MachineOperand::Mem { base: MachineReg::Phys(PhysReg::Rbx), offset: 0 }.to_string(),
            "(%rbx)"
        );
        assert_eq!(MachineOperand::RipRel("fmt_int".into()).to_string(), "fmt_int(%rip)");
    }

    #[test]
    fn test_inst_display() {
        let mov = MachineInst::new(
            MachineOpcode::Mov,
            [MachineOperand::Imm(8), MachineOperand::phys(PhysReg::Rax)],
        );
        assert_eq!(mov.to_string(), "mov $8, %rax");

        let set = MachineInst::new(MachineOpcode::Set(Cc::G), []);
        assert_eq!(set.to_string(), "setg %al");

        let jcc = MachineInst::new(
            MachineOpcode::Jcc(Cc::Ne),
            [MachineOperand::Label(".Lblock_main_1".into())],
        );
        assert_eq!(jcc.to_string(), "jne .Lblock_main_1");
    }

    #[test]
    fn test_vreg_read_write_classification() {
        // mov %v1, %v2 : reads v1, writes v2
        let mov = MachineInst::new(
            MachineOpcode::Mov,
            [MachineOperand::virt(1), MachineOperand::virt(2)],
        );
        assert_eq!(mov.vregs_read().to_vec(), vec![1]);
        assert_eq!(mov.vregs_written().to_vec(), vec![2]);

        // add %v1, %v2 : reads both, writes v2
        let add = MachineInst::new(
            MachineOpcode::Add,
            [MachineOperand::virt(1), MachineOperand::virt(2)],
        );
        assert_eq!(add.vregs_read().to_vec(), vec![1, 2]);
        assert_eq!(add.vregs_written().to_vec(), vec![2]);

        // mov %rax, (%v3) : v3 is a read (address), nothing written
        let store = MachineInst {
            op: MachineOpcode::Mov,
            operands: smallvec![
                MachineOperand::phys(PhysReg::Rax),
                MachineOperand::Mem { base: MachineReg::Virt(3), offset: 0 },
            ],
        };
        assert_eq!(store.vregs_read().to_vec(), vec![3]);
        assert!(store.vregs_written().is_empty());
    }

    #[test]
    fn test_callee_saved_set() {
        assert!(PhysReg::Rbx.is_callee_saved());
        assert!(PhysReg::R12.is_callee_saved());
        assert!(!PhysReg::Rax.is_callee_saved());
        assert!(!PhysReg::R10.is_callee_saved());
        assert!(!PhysReg::R11.is_callee_saved());
    }

    #[test]
    fn test_jump_targets() {
        let jmp = MachineInst::new(MachineOpcode::Jmp, [MachineOperand::Label(".La".into())]);
        assert_eq!(jmp.jump_targets().to_vec(), vec![".La"]);

        let call = MachineInst::new(MachineOpcode::Call, [MachineOperand::Sym("f".into())]);
        assert!(call.jump_targets().is_empty());
    }
}
