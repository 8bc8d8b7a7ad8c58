//! CFG analyses: validation, predecessor rebuild, dominators, dominance
//! frontier
//!
//! Predecessor/successor lists are caches derived from terminators and must
//! be rebuilt after any CFG edit. The dominator tree uses the iterative
//! data-flow construction over reverse postorder; the dominance frontier is
//! derived from it with the two-predecessor walk.

use crate::arena::{ArenaId, BlockId};
use crate::function::Function;
use baa_common::Diagnostics;
use std::collections::HashSet;

/// Recompute `preds`/`succs` for every live block from the terminators.
/// Idempotent; call after any CFG mutation.
pub fn rebuild_preds(func: &mut Function) {
    let order: Vec<BlockId> = func.block_order.clone();
    for &b in &order {
        func.block_mut(b).preds.clear();
        func.block_mut(b).succs.clear();
    }

    let live: HashSet<BlockId> = order.iter().copied().collect();
    for &b in &order {
        let succs = match func.terminator(b) {
            Some(term) => func.inst(term).successors(),
            None => continue,
        };
        for s in succs {
            if !live.contains(&s) {
                continue;
            }
            func.block_mut(b).succs.push(s);
            func.block_mut(s).preds.push(b);
        }
    }
}

/// Validate basic CFG structure: every block ends with exactly one
/// terminator and all branch targets are live blocks of this function.
pub fn validate_cfg(func: &Function, diags: &mut Diagnostics) -> bool {
    let mut ok = true;
    let live: HashSet<BlockId> = func.block_order.iter().copied().collect();

    for &b in &func.block_order {
        let block = func.block(b);
        let label = &block.label;

        if block.insts.is_empty() {
            diags.error(format!("دالة @{}: كتلة %{}_{} فارغة بدون منهي", func.name, label, b.index()));
            ok = false;
            continue;
        }

        for (pos, &i) in block.insts.iter().enumerate() {
            let inst = func.inst(i);
            let is_last = pos + 1 == block.insts.len();
            if is_last && !inst.is_terminator() {
                diags.error(format!(
                    "دالة @{}: كتلة %{}_{} لا تنتهي بتعليمة إنهاء",
                    func.name,
                    label,
                    b.index()
                ));
                ok = false;
            }
            if !is_last && inst.is_terminator() {
                diags.error(format!(
                    "دالة @{}: تعليمة إنهاء ({}) قبل نهاية الكتلة %{}_{}",
                    func.name,
                    inst.op,
                    label,
                    b.index()
                ));
                ok = false;
            }
            for target in inst.successors() {
                if !live.contains(&target) {
                    diags.error(format!(
                        "دالة @{}: قفز إلى كتلة غير موجودة من %{}_{}",
                        func.name,
                        label,
                        b.index()
                    ));
                    ok = false;
                }
            }
        }
    }
    ok
}

/// Blocks reachable from the entry via successor edges.
/// Requires up-to-date successor caches.
pub fn reachable_blocks(func: &Function) -> HashSet<BlockId> {
    let mut reachable = HashSet::new();
    let Some(entry) = func.entry() else {
        return reachable;
    };
    let mut stack = vec![entry];
    reachable.insert(entry);
    while let Some(b) = stack.pop() {
        for &s in &func.block(b).succs {
            if reachable.insert(s) {
                stack.push(s);
            }
        }
    }
    reachable
}

/// Reverse postorder over successor edges, entry first.
pub fn reverse_postorder(func: &Function) -> Vec<BlockId> {
    let mut post = Vec::new();
    let mut visited = HashSet::new();
    let Some(entry) = func.entry() else {
        return post;
    };

    // Iterative DFS with an explicit frame stack.
    let mut stack: Vec<(BlockId, usize)> = vec![(entry, 0)];
    visited.insert(entry);
    while let Some(&(b, next)) = stack.last() {
        let succs = &func.block(b).succs;
        if next < succs.len() {
            let s = succs[next];
            if let Some(top) = stack.last_mut() {
                top.1 += 1;
            }
            if visited.insert(s) {
                stack.push((s, 0));
            }
        } else {
            post.push(b);
            stack.pop();
        }
    }
    post.reverse();
    post
}

/// Dominator tree: immediate dominators of reachable blocks
#[derive(Debug, Clone)]
pub struct DomTree {
    /// idom per block arena index; entry maps to itself, unreachable blocks
    /// to `None`
    idom: Vec<Option<BlockId>>,
    rpo_index: Vec<usize>,
    entry: Option<BlockId>,
}

impl DomTree {
    /// Compute immediate dominators. Requires up-to-date predecessor caches.
    pub fn compute(func: &Function) -> DomTree {
        let cap = func
            .block_order
            .iter()
            .map(|b| b.index() + 1)
            .max()
            .unwrap_or(0);
        let mut tree = DomTree {
            idom: vec![None; cap],
            rpo_index: vec![usize::MAX; cap],
            entry: func.entry(),
        };
        let Some(entry) = func.entry() else {
            return tree;
        };

        let rpo = reverse_postorder(func);
        for (i, &b) in rpo.iter().enumerate() {
            tree.rpo_index[b.index()] = i;
        }
        tree.idom[entry.index()] = Some(entry);

        let mut changed = true;
        while changed {
            changed = false;
            for &b in rpo.iter().skip(1) {
                let mut new_idom: Option<BlockId> = None;
                for &p in &func.block(b).preds {
                    if p.index() >= tree.idom.len() || tree.idom[p.index()].is_none() {
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        None => p,
                        Some(cur) => tree.intersect(p, cur),
                    });
                }
                if let Some(n) = new_idom {
                    if tree.idom[b.index()] != Some(n) {
                        tree.idom[b.index()] = Some(n);
                        changed = true;
                    }
                }
            }
        }
        tree
    }

    fn intersect(&self, a: BlockId, b: BlockId) -> BlockId {
        let mut fa = a;
        let mut fb = b;
        while fa != fb {
            while self.rpo_index[fa.index()] > self.rpo_index[fb.index()] {
                match self.idom[fa.index()] {
                    Some(up) => fa = up,
                    None => return fb,
                }
            }
            while self.rpo_index[fb.index()] > self.rpo_index[fa.index()] {
                match self.idom[fb.index()] {
                    Some(up) => fb = up,
                    None => return fa,
                }
            }
        }
        fa
    }

    pub fn idom(&self, b: BlockId) -> Option<BlockId> {
        if Some(b) == self.entry {
            return None;
        }
        self.idom.get(b.index()).copied().flatten()
    }

    pub fn is_reachable(&self, b: BlockId) -> bool {
        self.idom.get(b.index()).copied().flatten().is_some()
    }

    /// Does `a` dominate `b`? Every block dominates itself.
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        if !self.is_reachable(a) || !self.is_reachable(b) {
            return false;
        }
        let mut cur = b;
        loop {
            if cur == a {
                return true;
            }
            match self.idom(cur) {
                Some(up) => cur = up,
                None => return false,
            }
        }
    }

    /// Children lists of the dominator tree, indexed by block arena index.
    pub fn children(&self, func: &Function) -> Vec<Vec<BlockId>> {
        let mut children = vec![Vec::new(); self.idom.len()];
        for &b in &func.block_order {
            if let Some(parent) = self.idom(b) {
                children[parent.index()].push(b);
            }
        }
        children
    }
}

/// Dominance frontier per block
#[derive(Debug, Clone)]
pub struct DominanceFrontier {
    df: Vec<Vec<BlockId>>,
}

impl DominanceFrontier {
    /// For each join block (two or more predecessors), walk every
    /// predecessor up the idom chain until the join's idom, adding the join
    /// to each walked block's frontier.
    pub fn compute(func: &Function, dom: &DomTree) -> DominanceFrontier {
        let cap = func
            .block_order
            .iter()
            .map(|b| b.index() + 1)
            .max()
            .unwrap_or(0);
        let mut df: Vec<Vec<BlockId>> = vec![Vec::new(); cap];

        for &b in &func.block_order {
            let preds = &func.block(b).preds;
            if preds.len() < 2 {
                continue;
            }
            let Some(idom_b) = dom.idom(b) else {
                continue;
            };
            for &p in preds {
                if !dom.is_reachable(p) {
                    continue;
                }
                let mut runner = p;
                while runner != idom_b {
                    let frontier = &mut df[runner.index()];
                    if !frontier.contains(&b) {
                        frontier.push(b);
                    }
                    match dom.idom(runner) {
                        Some(up) if up != runner => runner = up,
                        _ => break,
                    }
                }
            }
        }
        DominanceFrontier { df }
    }

    pub fn frontier(&self, b: BlockId) -> &[BlockId] {
        self.df.get(b.index()).map(Vec::as_slice).unwrap_or(&[])
    }
}
