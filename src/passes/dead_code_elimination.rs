//! Dead-code elimination.
//!
//! Context promotion and simplification leave a trail of unused compares
//! and assigns behind; a reverse walk kills any instruction whose opcode
//! is not volatile and whose destination has no uses, recursively freeing
//! the operands it was keeping alive. Assigns are erased by forwarding
//! their source to every consumer. Stores to locals nothing ever loads go
//! away along with the locals. A final forward pass deletes the nops left
//! behind.

use crate::error::Error;
use crate::hir::{HirFunction, InstrId, Opcode, ValueId};
use crate::passes::Pass;
use std::collections::HashSet;

pub struct DeadCodeEliminationPass;

impl DeadCodeEliminationPass {
    pub fn new() -> Self {
        Self
    }

    fn kill_recursive(func: &mut HirFunction, instr_id: InstrId) {
        let mut worklist = vec![instr_id];
        while let Some(instr_id) = worklist.pop() {
            let operands: Vec<ValueId> = (0..3)
                .filter_map(|slot| func.instr(instr_id).srcs[slot].value())
                .collect();
            func.replace_with_nop(instr_id);
            for value in operands {
                if func.has_uses(value) {
                    continue;
                }
                if let Some(def) = func.value(value).def {
                    if !func.instr(def).opcode.is_volatile() && func.instr(def).opcode != Opcode::Nop
                    {
                        worklist.push(def);
                    }
                }
            }
        }
    }

    fn replace_assignment(func: &mut HirFunction, instr_id: InstrId) {
        let src = func.instr(instr_id).srcs[0].value().unwrap();
        let dest = func.instr(instr_id).dest.unwrap();
        for (user, slot) in func.uses_of(dest) {
            func.set_src(user, slot, crate::hir::Operand::Value(src));
        }
        func.replace_with_nop(instr_id);
        func.unlink_instr(instr_id);
    }
}

impl Pass for DeadCodeEliminationPass {
    fn name(&self) -> &'static str {
        "dead_code_elimination"
    }

    fn run(&mut self, func: &mut HirFunction) -> Result<(), Error> {
        let blocks = func.block_order();

        for &block in &blocks {
            for instr_id in func.instr_order(block).into_iter().rev() {
                let opcode = func.instr(instr_id).opcode;
                if opcode == Opcode::Nop {
                    continue;
                }
                let dead = match func.instr(instr_id).dest {
                    Some(dest) => !opcode.is_volatile() && !func.has_uses(dest),
                    None => false,
                };
                if dead {
                    Self::kill_recursive(func, instr_id);
                } else if opcode == Opcode::Assign {
                    Self::replace_assignment(func, instr_id);
                }
            }
        }

        // Locals that nothing loads exist only to sink stores; drop both.
        let mut loaded: HashSet<u64> = HashSet::new();
        for &block in &blocks {
            for instr_id in func.instr_order(block) {
                if func.instr(instr_id).opcode == Opcode::LoadLocal {
                    loaded.insert(func.instr(instr_id).srcs[0].offset().unwrap());
                }
            }
        }
        for &block in &blocks {
            for instr_id in func.instr_order(block) {
                if func.instr(instr_id).opcode == Opcode::StoreLocal
                    && !loaded.contains(&func.instr(instr_id).srcs[0].offset().unwrap())
                {
                    let stored = func.instr(instr_id).srcs[1].value().unwrap();
                    func.replace_with_nop(instr_id);
                    func.unlink_instr(instr_id);
                    if !func.has_uses(stored) {
                        if let Some(def) = func.value(stored).def {
                            if !func.instr(def).opcode.is_volatile() {
                                Self::kill_recursive(func, def);
                            }
                        }
                    }
                }
            }
        }

        // Sweep the nops.
        for &block in &blocks {
            for instr_id in func.instr_order(block) {
                if func.instr(instr_id).opcode == Opcode::Nop {
                    func.unlink_instr(instr_id);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hir::{ConstantValue, HirBuilder, ValueType};
    use crate::passes::{ContextPromotionPass, SimplificationPass};

    #[test]
    fn removes_unused_compares_keeps_used_one() {
        // The shape context promotion + DSE leaves behind: three compare
        // results stored nowhere, one feeding a branch.
        let mut b = HirBuilder::new(0);
        let exit = b.new_label();
        let x = b.load_context(0x10, ValueType::I32);
        let zero = b.load_zero(ValueType::I32);
        let _lt = b.compare_slt(x, zero);
        let _gt = b.compare_sgt(x, zero);
        let eq = b.compare_eq(x, zero);
        b.branch_true(eq, exit, 0);
        b.mark_label(exit);
        b.return_();
        let mut func = b.finish();
        DeadCodeEliminationPass::new().run(&mut func).unwrap();
        func.validate().unwrap();
        let ops: Vec<Opcode> = func
            .block_order()
            .into_iter()
            .flat_map(|block| func.instr_order(block))
            .map(|id| func.instr(id).opcode)
            .collect();
        assert!(!ops.contains(&Opcode::CompareSlt));
        assert!(!ops.contains(&Opcode::CompareSgt));
        assert!(ops.contains(&Opcode::CompareEq));
        assert!(ops.contains(&Opcode::BranchTrue));
    }

    #[test]
    fn preserves_volatile_and_stores() {
        let mut b = HirBuilder::new(0);
        let x = b.load_context(0x10, ValueType::I64);
        b.store_context(0x20, x);
        b.trap(1);
        b.return_();
        let mut func = b.finish();
        DeadCodeEliminationPass::new().run(&mut func).unwrap();
        let ops: Vec<Opcode> = func
            .block_order()
            .into_iter()
            .flat_map(|block| func.instr_order(block))
            .map(|id| func.instr(id).opcode)
            .collect();
        assert_eq!(
            ops,
            vec![
                Opcode::LoadContext,
                Opcode::StoreContext,
                Opcode::Trap,
                Opcode::Return
            ]
        );
    }

    #[test]
    fn kills_chains_recursively() {
        let mut b = HirBuilder::new(0);
        let x = b.load_context(0x10, ValueType::I32);
        let wide = b.zero_extend(x, ValueType::I64);
        let doubled = b.add(wide, wide, 0);
        let _unused = b.neg(doubled);
        b.return_();
        let mut func = b.finish();
        DeadCodeEliminationPass::new().run(&mut func).unwrap();
        let ops: Vec<Opcode> = func
            .block_order()
            .into_iter()
            .flat_map(|block| func.instr_order(block))
            .map(|id| func.instr(id).opcode)
            .collect();
        assert_eq!(ops, vec![Opcode::Return]);
    }

    #[test]
    fn dead_local_store_pair_is_removed() {
        let mut b = HirBuilder::new(0);
        let slot = b.alloc_local(ValueType::I64);
        let v = b.load_constant(ConstantValue::I64(42));
        b.store_local(slot, v);
        b.return_();
        let mut func = b.finish();
        DeadCodeEliminationPass::new().run(&mut func).unwrap();
        let ops: Vec<Opcode> = func
            .block_order()
            .into_iter()
            .flat_map(|block| func.instr_order(block))
            .map(|id| func.instr(id).opcode)
            .collect();
        assert_eq!(ops, vec![Opcode::Return]);
    }

    #[test]
    fn pipeline_shape_after_promotion() {
        // End-to-end over promotion + simplification + DCE: a typical
        // record-compare-then-branch sequence collapses to the single
        // compare the branch consumes.
        let mut b = HirBuilder::new(0);
        let exit = b.new_label();
        let x = b.load_context(0x10, ValueType::I32);
        let zero = b.load_zero(ValueType::I32);
        let lt = b.compare_slt(x, zero);
        let gt = b.compare_sgt(x, zero);
        let eq = b.compare_eq(x, zero);
        b.store_context(0x300, lt);
        b.store_context(0x301, gt);
        b.store_context(0x302, eq);
        let reloaded = b.load_context(0x302, ValueType::I8);
        b.branch_true(reloaded, exit, 0);
        b.mark_label(exit);
        b.return_();
        let mut func = b.finish();
        ContextPromotionPass::new(false).run(&mut func).unwrap();
        SimplificationPass::new().run(&mut func).unwrap();
        DeadCodeEliminationPass::new().run(&mut func).unwrap();
        func.validate().unwrap();
        // The branch consumes the compare directly; the stores survive
        // (they are the architectural CR bits).
        let branch = func
            .block_order()
            .into_iter()
            .flat_map(|block| func.instr_order(block))
            .find(|id| func.instr(*id).opcode == Opcode::BranchTrue)
            .unwrap();
        assert_eq!(func.instr(branch).srcs[0].value(), Some(eq));
    }
}
