//! Copy propagation (نشر_النسخ)
//!
//! Records `dest -> source` for every copy, canonicalizes chains so every
//! alias maps to its ultimate source, replaces all uses of copy destinations
//! and deletes the now-dead copies. Propagation only happens when source and
//! destination types are equal.

use crate::defuse::DefUse;
use crate::function::Function;
use crate::instruction::Opcode;
use crate::module::Module;
use crate::passes::Pass;
use crate::value::Value;
use baa_common::BaaResult;
use hashbrown::HashMap;

/// Chains longer than this indicate a cycle or pathological input; leave
/// the rest for the next pipeline iteration.
const MAX_CHAIN_DEPTH: usize = 64;

pub struct CopyProp;

impl Pass for CopyProp {
    fn name(&self) -> &'static str {
        "نشر_النسخ"
    }

    fn run(&mut self, module: &mut Module) -> BaaResult<bool> {
        let mut changed = false;
        for func in &mut module.functions {
            changed |= propagate_function(func);
        }
        Ok(changed)
    }
}

fn canonical<'a>(mut v: &'a Value, aliases: &'a HashMap<u32, Value>) -> &'a Value {
    for _ in 0..MAX_CHAIN_DEPTH {
        match v.as_reg().and_then(|r| aliases.get(&r)) {
            Some(next) => v = next,
            None => break,
        }
    }
    v
}

fn propagate_function(func: &mut Function) -> bool {
    if func.is_prototype || func.entry().is_none() {
        return false;
    }

    // 1) Collect the alias map from copy instructions.
    let mut aliases: HashMap<u32, Value> = HashMap::new();
    for &b in &func.block_order {
        for &i in &func.block(b).insts {
            let inst = func.inst(i);
            if inst.op != Opcode::Copy {
                continue;
            }
            let Some(dest) = inst.dest else { continue };
            let Some(src) = inst.operands.first() else { continue };
            if inst.ty != src.ty() {
                continue;
            }
            if aliases.contains_key(&dest) {
                continue;
            }
            let src = canonical(src, &aliases).clone();
            aliases.insert(dest, src);
        }
    }

    if aliases.is_empty() {
        return false;
    }

    // 2) Resolve remaining chains (a later copy may alias an earlier dest).
    let keys: Vec<u32> = aliases.keys().copied().collect();
    for r in keys {
        let resolved = canonical(&aliases[&r], &aliases).clone();
        aliases.insert(r, resolved);
    }

    // 3) Replace every use of an aliased destination.
    let du = DefUse::build(func);
    let mut changed = false;
    for (&reg, repl) in &aliases {
        for site in du.uses(reg) {
            let Some(slot) = func.inst_mut(site.inst).slot_mut(site.slot) else {
                continue;
            };
            if !slot.is_reg_num(reg) {
                continue;
            }
            *slot = repl.clone();
            changed = true;
        }
    }

    // 4) Delete the copies whose destination was rewritten away.
    for b in func.block_order.clone() {
        for i in func.block(b).insts.clone() {
            let inst = func.inst(i);
            if inst.op == Opcode::Copy
                && inst.dest.is_some_and(|d| aliases.contains_key(&d))
            {
                func.remove_inst(b, i);
                changed = true;
            }
        }
    }

    changed
}
