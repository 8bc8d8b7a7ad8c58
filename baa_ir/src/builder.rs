//! Convenience builder for IR construction
//!
//! The builder keeps a current function and insertion block; `emit_*`
//! methods append to the insertion block and hand back the destination
//! register. Lowering and tests construct IR through this API.

use crate::arena::{BlockId, InstId};
use crate::function::Function;
use crate::instruction::{CmpPred, Inst, Opcode};
use crate::module::Module;
use crate::types::Type;
use crate::value::Value;

/// IR construction cursor over a module
#[derive(Debug)]
pub struct IrBuilder {
    module: Module,
    cur_func: Option<usize>,
    cur_block: Option<BlockId>,
}

impl IrBuilder {
    pub fn new(module_name: impl Into<String>) -> Self {
        Self { module: Module::new(module_name), cur_func: None, cur_block: None }
    }

    pub fn from_module(module: Module) -> Self {
        Self { module, cur_func: None, cur_block: None }
    }

    /// Consume the builder and hand back the module.
    pub fn finish(self) -> Module {
        self.module
    }

    pub fn module(&self) -> &Module {
        &self.module
    }

    pub fn module_mut(&mut self) -> &mut Module {
        &mut self.module
    }

    /// Create a function and make it current.
    pub fn create_func(&mut self, name: impl Into<String>, ret_ty: Type) {
        self.module.add_function(Function::new(name, ret_ty));
        self.cur_func = Some(self.module.functions.len() - 1);
        self.cur_block = None;
    }

    /// Switch to an existing function by name.
    pub fn select_func(&mut self, name: &str) -> bool {
        match self.module.functions.iter().position(|f| f.name == name) {
            Some(idx) => {
                self.cur_func = Some(idx);
                self.cur_block = None;
                true
            }
            None => false,
        }
    }

    pub fn func(&self) -> &Function {
        let idx = self.cur_func.unwrap_or_else(|| panic!("builder: no current function"));
        &self.module.functions[idx]
    }

    pub fn func_mut(&mut self) -> &mut Function {
        let idx = self.cur_func.unwrap_or_else(|| panic!("builder: no current function"));
        &mut self.module.functions[idx]
    }

    pub fn add_param(&mut self, name: Option<&str>, ty: Type) -> u32 {
        self.func_mut().add_param(name, ty)
    }

    pub fn create_block(&mut self, label: &str) -> BlockId {
        self.func_mut().new_block(Some(label))
    }

    pub fn set_insert_point(&mut self, block: BlockId) {
        self.cur_block = Some(block);
    }

    pub fn insert_block(&self) -> Option<BlockId> {
        self.cur_block
    }

    /// Whether the insertion block already ends with a terminator.
    pub fn block_terminated(&self) -> bool {
        match self.cur_block {
            Some(b) => self.func().terminator(b).is_some(),
            None => false,
        }
    }

    pub fn alloc_reg(&mut self) -> u32 {
        self.func_mut().alloc_reg()
    }

    pub fn intern_string(&mut self, s: &str) -> u32 {
        self.module.intern_string(s)
    }

    fn emit(&mut self, inst: Inst) -> InstId {
        let block = self
            .cur_block
            .unwrap_or_else(|| panic!("builder: no insertion point"));
        let idx = self.cur_func.unwrap_or_else(|| panic!("builder: no current function"));
        self.module.functions[idx].append_inst(block, inst)
    }

    pub fn emit_alloca(&mut self, pointee: Type) -> u32 {
        let dest = self.alloc_reg();
        self.emit(Inst::alloca(pointee, dest));
        dest
    }

    pub fn emit_store(&mut self, value: Value, ptr: Value) {
        self.emit(Inst::store(value, ptr));
    }

    pub fn emit_load(&mut self, ty: Type, ptr: Value) -> u32 {
        let dest = self.alloc_reg();
        self.emit(Inst::load(ty, dest, ptr));
        dest
    }

    pub fn emit_binary(&mut self, op: Opcode, ty: Type, lhs: Value, rhs: Value) -> u32 {
        let dest = self.alloc_reg();
        self.emit(Inst::binary(op, ty, dest, lhs, rhs));
        dest
    }

    pub fn emit_unary(&mut self, op: Opcode, ty: Type, operand: Value) -> u32 {
        let dest = self.alloc_reg();
        self.emit(Inst::unary(op, ty, dest, operand));
        dest
    }

    pub fn emit_cmp(&mut self, pred: CmpPred, lhs: Value, rhs: Value) -> u32 {
        let dest = self.alloc_reg();
        self.emit(Inst::cmp(pred, dest, lhs, rhs));
        dest
    }

    pub fn emit_copy(&mut self, ty: Type, src: Value) -> u32 {
        let dest = self.alloc_reg();
        self.emit(Inst::copy(ty, dest, src));
        dest
    }

    pub fn emit_br(&mut self, target: BlockId) {
        self.emit(Inst::br(target));
    }

    pub fn emit_br_cond(&mut self, cond: Value, then_block: BlockId, else_block: BlockId) {
        self.emit(Inst::br_cond(cond, then_block, else_block));
    }

    pub fn emit_ret(&mut self, value: Option<Value>) {
        self.emit(Inst::ret(value));
    }

    /// Emit a call; void calls get no destination register.
    pub fn emit_call(&mut self, target: &str, ty: Type, args: Vec<Value>) -> Option<u32> {
        let dest = (ty != Type::Void).then(|| self.alloc_reg());
        self.emit(Inst::call(target, ty, dest, args));
        dest
    }

    /// Insert an empty phi at the top of a block.
    pub fn emit_phi(&mut self, block: BlockId, ty: Type) -> (InstId, u32) {
        let dest = self.alloc_reg();
        let idx = self.cur_func.unwrap_or_else(|| panic!("builder: no current function"));
        let id = self.module.functions[idx].insert_phi(block, Inst::phi(ty, dest));
        (id, dest)
    }

    pub fn phi_add_incoming(&mut self, phi: InstId, value: Value, pred: BlockId) {
        self.func_mut().inst_mut(phi).phi_add(value, pred);
    }
}
