//! AT&T assembly emission for GAS on Windows
//!
//! Emits `.rdata` with the print format strings and interned literals,
//! `.data` with initialized globals, then `.text`. The entry function
//! `main` gets a global label. Prologues reserve a 16-byte aligned frame
//! and save used callee-saved registers into dedicated slots; `ret`
//! expands into the restoring epilogue.

use crate::machine::{
    MachineFunc, MachineInst, MachineModule, MachineOpcode, MachineOperand, MachineReg, PhysReg,
};
use baa_common::BaaResult;
use std::fmt::Write as _;
use std::path::Path;

/// Render a machine module as an assembly file.
pub fn emit_module(module: &MachineModule) -> String {
    let mut out = String::new();

    let _ = writeln!(out, ".section .rdata,\"dr\"");
    let _ = writeln!(out, "fmt_int: .asciz \"%d\\n\"");
    let _ = writeln!(out, "fmt_str: .asciz \"%s\\n\"");
    for (i, s) in module.strings.iter().enumerate() {
        let _ = writeln!(out, ".Lstr_{}: .asciz \"{}\"", i, escape_asm(s));
    }

    if !module.globals.is_empty() {
        let _ = writeln!(out, ".data");
        for g in &module.globals {
            let _ = writeln!(out, "{}: .quad {}", g.name, g.init);
        }
    }

    let _ = writeln!(out, ".text");
    for func in &module.funcs {
        emit_function(&mut out, func);
    }
    out
}

pub fn emit_module_file(module: &MachineModule, path: &Path) -> BaaResult<()> {
    std::fs::write(path, emit_module(module))?;
    Ok(())
}

/// Total frame bytes: locals and spills, then callee-save slots, rounded to
/// 16 so the stack stays aligned at every call with its shadow space.
fn total_frame(func: &MachineFunc) -> u32 {
    let raw = func.frame_size + 8 * func.used_callee_saved.len() as u32;
    raw.next_multiple_of(16)
}

fn callee_save_offset(func: &MachineFunc, idx: usize) -> i32 {
    -((func.frame_size + 8 * (idx as u32 + 1)) as i32)
}

fn emit_function(out: &mut String, func: &MachineFunc) {
    if func.name == "main" {
        let _ = writeln!(out, ".globl main");
    }
    let _ = writeln!(out, "{}:", func.name);

    // Prologue.
    let _ = writeln!(out, "    push %rbp");
    let _ = writeln!(out, "    mov %rsp, %rbp");
    let frame = total_frame(func);
    if frame > 0 {
        let _ = writeln!(out, "    sub ${}, %rsp", frame);
    }
    for (i, reg) in func.used_callee_saved.iter().enumerate() {
        let _ = writeln!(out, "    mov %{}, {}(%rbp)", reg.name(), callee_save_offset(func, i));
    }

    for block in &func.blocks {
        let _ = writeln!(out, "{}:", block.label);
        for inst in &block.insts {
            if inst.op == MachineOpcode::Ret {
                emit_epilogue(out, func);
            } else {
                let _ = writeln!(out, "    {}", render(inst));
            }
        }
    }
}

fn emit_epilogue(out: &mut String, func: &MachineFunc) {
    for (i, reg) in func.used_callee_saved.iter().enumerate() {
        let _ = writeln!(out, "    mov {}(%rbp), %{}", callee_save_offset(func, i), reg.name());
    }
    let _ = writeln!(out, "    mov %rbp, %rsp");
    let _ = writeln!(out, "    pop %rbp");
    let _ = writeln!(out, "    ret");
}

/// Memory operands with no register operand need an explicit size suffix.
fn render(inst: &MachineInst) -> String {
    let has_mem = inst
        .operands
        .iter()
        .any(|op| matches!(op, MachineOperand::Mem { .. }));
    let has_reg = inst
        .operands
        .iter()
        .any(|op| matches!(op, MachineOperand::Reg(MachineReg::Phys(_))));

    let text = inst.to_string();
    if has_mem && !has_reg {
        if let Some((mnemonic, rest)) = text.split_once(' ') {
            return format!("{}q {}", mnemonic, rest);
        }
    }
    text
}

fn escape_asm(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    out
}
