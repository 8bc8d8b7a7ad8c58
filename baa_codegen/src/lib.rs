//! x86-64 back-end for the Baa compiler
//!
//! Three stages over a machine-level representation separate from the IR:
//! instruction selection (`isel`), linear-scan register allocation
//! (`regalloc`) and AT&T assembly emission (`emit`). Only the Windows x64
//! ABI is targeted.

pub mod emit;
pub mod isel;
pub mod machine;
pub mod regalloc;

pub use emit::{emit_module, emit_module_file};
pub use isel::select_module;
pub use machine::{
    Cc, MachineBlock, MachineFunc, MachineGlobal, MachineInst, MachineModule, MachineOpcode,
    MachineOperand, MachineReg, PhysReg,
};
pub use regalloc::{allocate_function, allocate_module};

use baa_common::BaaResult;
use baa_ir::Module;

/// Lower an optimized, phi-free module all the way to assembly text.
pub fn compile_module(module: &Module) -> BaaResult<String> {
    let mut machine = select_module(module)?;
    allocate_module(&mut machine)?;
    Ok(emit_module(&machine))
}
