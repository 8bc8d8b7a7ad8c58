//! Intermediate representation for the Baa compiler
//!
//! This crate owns the middle-end: the arena-backed IR data model, CFG and
//! dominance analyses, def-use chains, the optimization passes with their
//! fixpoint pipeline, the IR and SSA verifiers, the textual serialization
//! used for golden tests, and the lowering from the AST.
//!
//! The representation is SSA between memory promotion and the out-of-SSA
//! pass; the back-end consumes the phi-free form.

pub mod analysis;
pub mod arena;
pub mod builder;
pub mod defuse;
pub mod function;
pub mod instruction;
pub mod lower;
pub mod module;
pub mod optimizer;
pub mod passes;
pub mod text;
pub mod types;
pub mod value;
pub mod verify;

pub use arena::{Arena, ArenaId, BlockId, InstId};
pub use builder::IrBuilder;
pub use defuse::{Def, DefUse, UseSite};
pub use function::{Block, FuncParam, Function};
pub use instruction::{CallData, CmpPred, Inst, Opcode, PhiEntry, UseSlot};
pub use lower::lower_program;
pub use module::{Global, Module};
pub use optimizer::{OptLevel, OptStats, Optimizer, MAX_ITERATIONS};
pub use passes::Pass;
pub use types::{DataLayout, Type};
pub use value::Value;
