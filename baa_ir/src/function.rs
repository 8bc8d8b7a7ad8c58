//! IR functions and basic blocks
//!
//! A function owns the arenas for its instructions and blocks. Block bodies
//! are ordered lists of instruction handles; the last instruction of every
//! block must be its sole terminator. Cached CFG edges (`preds`/`succs`) are
//! rebuilt by the analysis layer after any CFG mutation, and the function's
//! `ir_epoch` invalidates cached analyses lazily.

use crate::arena::{Arena, ArenaId, BlockId, InstId};
use crate::defuse::DefUse;
use crate::instruction::{Inst, Opcode};
use crate::types::Type;
use serde::{Deserialize, Serialize};

/// A function parameter; parameters occupy the first register numbers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FuncParam {
    pub name: Option<String>,
    pub reg: u32,
    pub ty: Type,
}

/// A basic block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub id: BlockId,
    pub label: String,
    /// Instruction list in execution order
    pub insts: Vec<InstId>,
    /// Cached predecessors; valid only after a predecessor rebuild
    pub preds: Vec<BlockId>,
    /// Cached successors; valid only after a predecessor rebuild
    pub succs: Vec<BlockId>,
}

impl Block {
    fn new(id: BlockId, label: String) -> Self {
        Self { id, label, insts: Vec::new(), preds: Vec::new(), succs: Vec::new() }
    }

    pub fn first_inst(&self) -> Option<InstId> {
        self.insts.first().copied()
    }

    pub fn last_inst(&self) -> Option<InstId> {
        self.insts.last().copied()
    }
}

/// An IR function
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    pub ret_ty: Type,
    pub params: Vec<FuncParam>,
    /// Declared but not defined in this module
    pub is_prototype: bool,
    insts: Arena<InstId, Inst>,
    blocks: Arena<BlockId, Block>,
    /// Live blocks in layout order; the first block is the entry
    pub block_order: Vec<BlockId>,
    /// Next free virtual register number
    pub next_reg: u32,
    /// Bumped on every mutation; cached analyses compare against it
    pub ir_epoch: u64,
    #[serde(skip)]
    def_use: Option<DefUse>,
}

impl Function {
    pub fn new(name: impl Into<String>, ret_ty: Type) -> Self {
        Self {
            name: name.into(),
            ret_ty,
            params: Vec::new(),
            is_prototype: false,
            insts: Arena::new(),
            blocks: Arena::new(),
            block_order: Vec::new(),
            next_reg: 0,
            ir_epoch: 0,
            def_use: None,
        }
    }

    pub fn new_prototype(name: impl Into<String>, ret_ty: Type) -> Self {
        let mut f = Self::new(name, ret_ty);
        f.is_prototype = true;
        f
    }

    /// Add a parameter; it takes the next register number.
    pub fn add_param(&mut self, name: Option<&str>, ty: Type) -> u32 {
        let reg = self.alloc_reg();
        self.params.push(FuncParam { name: name.map(str::to_owned), reg, ty });
        reg
    }

    pub fn alloc_reg(&mut self) -> u32 {
        let reg = self.next_reg;
        self.next_reg += 1;
        reg
    }

    /// Append a new block; the first block created becomes the entry.
    pub fn new_block(&mut self, label: Option<&str>) -> BlockId {
        let label = label.unwrap_or("كتلة").to_owned();
        let id = self.blocks.alloc(Block::new(BlockId::from_index(0), label));
        self.blocks[id].id = id;
        self.block_order.push(id);
        self.bump_epoch();
        id
    }

    pub fn entry(&self) -> Option<BlockId> {
        self.block_order.first().copied()
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.blocks[id]
    }

    pub fn inst(&self, id: InstId) -> &Inst {
        &self.insts[id]
    }

    pub fn inst_mut(&mut self, id: InstId) -> &mut Inst {
        self.bump_epoch();
        &mut self.insts[id]
    }

    /// Number of live blocks.
    pub fn block_count(&self) -> usize {
        self.block_order.len()
    }

    /// Append an instruction at the end of a block.
    pub fn append_inst(&mut self, block: BlockId, inst: Inst) -> InstId {
        let id = self.alloc_inst(inst);
        self.blocks[block].insts.push(id);
        id
    }

    /// Insert an instruction immediately before `before` within a block.
    /// Falls back to appending when `before` is not in the block.
    pub fn insert_inst_before(&mut self, block: BlockId, before: InstId, inst: Inst) -> InstId {
        let id = self.alloc_inst(inst);
        let list = &mut self.blocks[block].insts;
        match list.iter().position(|&i| i == before) {
            Some(pos) => list.insert(pos, id),
            None => list.push(id),
        }
        id
    }

    /// Insert a phi after any existing phis at the top of a block.
    pub fn insert_phi(&mut self, block: BlockId, inst: Inst) -> InstId {
        debug_assert_eq!(inst.op, Opcode::Phi);
        let id = self.alloc_inst(inst);
        let pos = {
            let list = &self.blocks[block].insts;
            list.iter()
                .position(|&i| self.insts[i].op != Opcode::Phi)
                .unwrap_or(list.len())
        };
        self.blocks[block].insts.insert(pos, id);
        self.bump_epoch();
        id
    }

    /// Unlink an instruction from its block. The arena entry remains until
    /// the module is dropped; only the block order changes.
    pub fn remove_inst(&mut self, block: BlockId, inst: InstId) {
        self.blocks[block].insts.retain(|&i| i != inst);
        self.bump_epoch();
    }

    /// Unlink a block from the function. Instructions inside it stay in the
    /// arena but are no longer part of the function body.
    pub fn remove_block(&mut self, block: BlockId) {
        self.block_order.retain(|&b| b != block);
        self.bump_epoch();
    }

    /// The terminator of a block, when its last instruction is one.
    pub fn terminator(&self, block: BlockId) -> Option<InstId> {
        let last = self.blocks[block].last_inst()?;
        self.insts[last].is_terminator().then_some(last)
    }

    pub fn block_has_phi(&self, block: BlockId) -> bool {
        self.blocks[block]
            .first_inst()
            .is_some_and(|i| self.insts[i].op == Opcode::Phi)
    }

    /// The phis at the top of a block, in order.
    pub fn phis(&self, block: BlockId) -> Vec<InstId> {
        self.blocks[block]
            .insts
            .iter()
            .copied()
            .take_while(|&i| self.insts[i].op == Opcode::Phi)
            .collect()
    }

    /// All live instructions in block layout order.
    pub fn inst_ids_in_order(&self) -> Vec<InstId> {
        self.block_order
            .iter()
            .flat_map(|&b| self.blocks[b].insts.iter().copied())
            .collect()
    }

    pub fn bump_epoch(&mut self) {
        self.ir_epoch += 1;
    }

    /// The cached def-use chains, rebuilt when stale.
    pub fn cached_defuse(&mut self) -> &DefUse {
        let stale = self
            .def_use
            .as_ref()
            .map_or(true, |du| du.built_epoch != self.ir_epoch);
        if stale {
            let rebuilt = DefUse::build(self);
            self.def_use = Some(rebuilt);
        }
        self.def_use.get_or_insert_with(DefUse::default)
    }

    fn alloc_inst(&mut self, mut inst: Inst) -> InstId {
        self.bump_epoch();
        // The final id equals the arena slot; pre-set so the stored copy is
        // consistent.
        let id = InstId::from_index(self.insts.len());
        inst.id = id;
        let got = self.insts.alloc(inst);
        debug_assert_eq!(got, id);
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn sample_func() -> Function {
        let mut f = Function::new("اختبار", Type::I64);
        let entry = f.new_block(Some("بداية"));
        let r0 = f.alloc_reg();
        f.append_inst(
            entry,
            Inst::binary(
                Opcode::Add,
                Type::I64,
                r0,
                Value::const_int(1, Type::I64),
                Value::const_int(2, Type::I64),
            ),
        );
        f.append_inst(entry, Inst::ret(Some(Value::reg(r0, Type::I64))));
        f
    }

    #[test]
    fn test_entry_is_first_block() {
        let f = sample_func();
        assert_eq!(f.entry(), Some(f.block_order[0]));
        assert_eq!(f.block(f.entry().unwrap()).label, "بداية");
    }

    #[test]
    fn test_params_take_first_regs() {
        let mut f = Function::new("جمع", Type::I64);
        let a = f.add_param(Some("أ"), Type::I64);
        let b = f.add_param(Some("ب"), Type::I64);
        assert_eq!((a, b), (0, 1));
        assert_eq!(f.alloc_reg(), 2);
    }

    #[test]
    fn test_terminator_lookup() {
        let f = sample_func();
        let entry = f.entry().unwrap();
        let term = f.terminator(entry).unwrap();
        assert_eq!(f.inst(term).op, Opcode::Ret);
    }

    #[test]
    fn test_remove_inst_keeps_arena() {
        let mut f = sample_func();
        let entry = f.entry().unwrap();
        let first = f.block(entry).first_inst().unwrap();

        let before = f.ir_epoch;
        f.remove_inst(entry, first);
        assert_eq!(f.block(entry).insts.len(), 1);
        assert!(f.ir_epoch > before);
        // The arena entry is still readable (bulk-freed with the module).
        assert_eq!(f.inst(first).op, Opcode::Add);
    }

    #[test]
    fn test_insert_phi_goes_after_existing_phis() {
        let mut f = Function::new("فاي", Type::I64);
        let b = f.new_block(None);
        let r0 = f.alloc_reg();
        f.append_inst(b, Inst::ret(Some(Value::const_int(0, Type::I64))));

        let p1 = f.insert_phi(b, Inst::phi(Type::I64, r0));
        let r1 = f.alloc_reg();
        let p2 = f.insert_phi(b, Inst::phi(Type::I64, r1));

        let insts = &f.block(b).insts;
        assert_eq!(insts[0], p1);
        assert_eq!(insts[1], p2);
        assert_eq!(f.inst(insts[2]).op, Opcode::Ret);
        assert_eq!(f.phis(b), vec![p1, p2]);
    }

    #[test]
    fn test_cached_defuse_tracks_epoch() {
        let mut f = sample_func();
        let epoch = f.ir_epoch;
        assert_eq!(f.cached_defuse().built_epoch, epoch);

        // A mutation invalidates the cache lazily; the next query rebuilds.
        let entry = f.entry().unwrap();
        let first = f.block(entry).first_inst().unwrap();
        f.remove_inst(entry, first);
        assert!(f.ir_epoch > epoch);
        let built_epoch = f.cached_defuse().built_epoch;
        assert_eq!(built_epoch, f.ir_epoch);
    }

    #[test]
    fn test_insert_before() {
        let mut f = sample_func();
        let entry = f.entry().unwrap();
        let term = f.terminator(entry).unwrap();
        let r = f.alloc_reg();
        let id = f.insert_inst_before(
            entry,
            term,
            Inst::copy(Type::I64, r, Value::const_int(9, Type::I64)),
        );
        let insts = &f.block(entry).insts;
        assert_eq!(insts[insts.len() - 2], id);
        assert_eq!(insts[insts.len() - 1], term);
    }
}
