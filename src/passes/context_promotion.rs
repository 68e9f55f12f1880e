//! Context promotion: like mem2reg, but the guest context is unaliasable
//! from guest memory, so a per-block scan is enough to turn
//! `load_context`/`store_context` traffic into value operations.
//!
//! Example of load-to-value promotion:
//! ```text
//!   v0 = load_context +100
//!   store_context +200, v0
//!   v1 = load_context +100   <-- becomes v1 = v0
//! ```
//! A reverse walk then drops stores that a later store to the same offset
//! shadows. Calls clobber the whole context (the callee reads and writes
//! it), so both walks treat them as barriers.

use crate::error::Error;
use crate::hir::{HirFunction, Opcode, ValueId};
use crate::passes::Pass;
use std::collections::{HashMap, HashSet};

pub struct ContextPromotionPass {
    /// Keep every store so the debugger sees all architectural updates.
    store_all: bool,
}

impl ContextPromotionPass {
    pub fn new(store_all: bool) -> Self {
        Self { store_all }
    }

    fn is_barrier(opcode: Opcode) -> bool {
        matches!(
            opcode,
            Opcode::Call
                | Opcode::CallTrue
                | Opcode::CallIndirect
                | Opcode::CallIndirectTrue
                | Opcode::CallExtern
        )
    }

    fn promote_block(&self, func: &mut HirFunction, block: crate::hir::BlockId) {
        let mut live: HashMap<u64, ValueId> = HashMap::new();
        for instr_id in func.instr_order(block) {
            let opcode = func.instr(instr_id).opcode;
            match opcode {
                Opcode::LoadContext => {
                    let offset = func.instr(instr_id).srcs[0].offset().unwrap();
                    let dest = func.instr(instr_id).dest.unwrap();
                    match live.get(&offset) {
                        Some(&previous)
                            if func.value(previous).ty == func.value(dest).ty =>
                        {
                            func.replace_with_assign(instr_id, previous);
                        }
                        _ => {
                            live.insert(offset, dest);
                        }
                    }
                }
                Opcode::StoreContext => {
                    let offset = func.instr(instr_id).srcs[0].offset().unwrap();
                    let value = func.instr(instr_id).srcs[1].value().unwrap();
                    live.insert(offset, value);
                }
                _ if Self::is_barrier(opcode) => live.clear(),
                _ => {}
            }
        }
    }

    fn remove_dead_stores_block(&self, func: &mut HirFunction, block: crate::hir::BlockId) {
        let mut written: HashSet<u64> = HashSet::new();
        for instr_id in func.instr_order(block).into_iter().rev() {
            let opcode = func.instr(instr_id).opcode;
            if opcode == Opcode::StoreContext {
                let offset = func.instr(instr_id).srcs[0].offset().unwrap();
                if !written.insert(offset) {
                    // A later store in this block shadows this one.
                    func.replace_with_nop(instr_id);
                    func.unlink_instr(instr_id);
                }
            } else if Self::is_barrier(opcode) {
                written.clear();
            }
        }
    }
}

impl Pass for ContextPromotionPass {
    fn name(&self) -> &'static str {
        "context_promotion"
    }

    fn run(&mut self, func: &mut HirFunction) -> Result<(), Error> {
        for block in func.block_order() {
            self.promote_block(func, block);
        }
        if !self.store_all {
            for block in func.block_order() {
                self.remove_dead_stores_block(func, block);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hir::{HirBuilder, ValueType};

    #[test]
    fn promotes_load_after_store() {
        let mut b = HirBuilder::new(0);
        let x = b.load_context(0x100, ValueType::I64);
        b.store_context(0x200, x);
        let y = b.load_context(0x100, ValueType::I64);
        b.store_context(0x208, y);
        b.return_();
        let mut func = b.finish();
        ContextPromotionPass::new(false).run(&mut func).unwrap();
        func.validate().unwrap();
        // The second load is now an assign of the first.
        let def = func.value(y).def.unwrap();
        assert_eq!(func.instr(def).opcode, Opcode::Assign);
        assert_eq!(func.instr(def).srcs[0].value(), Some(x));
    }

    #[test]
    fn leaves_unwritten_offsets_alone() {
        let mut b = HirBuilder::new(0);
        let x = b.load_context(0x100, ValueType::I64);
        b.store_context(0x200, x);
        let y = b.load_context(0x300, ValueType::I64);
        b.store_context(0x308, y);
        b.return_();
        let mut func = b.finish();
        ContextPromotionPass::new(false).run(&mut func).unwrap();
        let def = func.value(y).def.unwrap();
        assert_eq!(func.instr(def).opcode, Opcode::LoadContext);
    }

    #[test]
    fn removes_shadowed_stores() {
        let mut b = HirBuilder::new(0);
        let x = b.load_context(0x100, ValueType::I64);
        let y = b.load_context(0x108, ValueType::I64);
        b.store_context(0x200, x);
        b.store_context(0x200, y);
        b.return_();
        let mut func = b.finish();
        ContextPromotionPass::new(false).run(&mut func).unwrap();
        let stores = count_stores(&func);
        assert_eq!(stores, 1);
    }

    #[test]
    fn store_all_flag_preserves_stores() {
        let mut b = HirBuilder::new(0);
        let x = b.load_context(0x100, ValueType::I64);
        b.store_context(0x200, x);
        b.store_context(0x200, x);
        b.return_();
        let mut func = b.finish();
        ContextPromotionPass::new(true).run(&mut func).unwrap();
        assert_eq!(count_stores(&func), 2);
    }

    #[test]
    fn calls_are_barriers() {
        let mut b = HirBuilder::new(0);
        let x = b.load_context(0x100, ValueType::I64);
        b.store_context(0x200, x);
        b.call(0x8200_0000, 0);
        // The callee may have rewritten +100; this load must survive.
        let y = b.load_context(0x100, ValueType::I64);
        b.store_context(0x200, y);
        b.return_();
        let mut func = b.finish();
        ContextPromotionPass::new(false).run(&mut func).unwrap();
        let def = func.value(y).def.unwrap();
        assert_eq!(func.instr(def).opcode, Opcode::LoadContext);
        // Both stores also survive: the call observes the first.
        assert_eq!(count_stores(&func), 2);
    }

    fn count_stores(func: &HirFunction) -> usize {
        func.block_order()
            .into_iter()
            .flat_map(|block| func.instr_order(block))
            .filter(|id| func.instr(*id).opcode == Opcode::StoreContext)
            .count()
    }
}
