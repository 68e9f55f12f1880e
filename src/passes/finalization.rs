//! Finalization: the last pass before lowering. Assigns dense block,
//! instruction and value ordinals, resolves label references into block
//! edge lists, and lays out the stack-local slots the back end addresses
//! relative to the frame.

use crate::error::Error;
use crate::hir::{HirFunction, Opcode, OperandKind};
use crate::passes::Pass;

pub struct FinalizationPass;

impl FinalizationPass {
    pub fn new() -> Self {
        Self
    }
}

impl Pass for FinalizationPass {
    fn name(&self) -> &'static str {
        "finalization"
    }

    fn run(&mut self, func: &mut HirFunction) -> Result<(), Error> {
        let blocks = func.block_order();

        // Dense ordinals for blocks, instructions and values, in layout
        // order. Constants get numbered where first referenced.
        let mut next_value = 0u32;
        let mut next_instr = 0u32;
        let mut numbered = vec![false; func.value_count()];
        let mut renumber = move |func: &mut HirFunction, value: crate::hir::ValueId| {
            if !numbered[value.0 as usize] {
                numbered[value.0 as usize] = true;
                func.value_mut(value).ordinal = next_value;
                next_value += 1;
            }
        };
        for (ordinal, &block) in blocks.iter().enumerate() {
            func.block_mut(block).ordinal = ordinal as u32;
            for instr_id in func.instr_order(block) {
                func.instr_mut(instr_id).ordinal = next_instr;
                next_instr += 1;
                let sig = func.instr(instr_id).opcode.info().sig;
                for slot in 0..3 {
                    if sig.srcs[slot] == OperandKind::V {
                        let value = func.instr(instr_id).srcs[slot].value().unwrap();
                        renumber(func, value);
                    }
                }
                if let Some(dest) = func.instr(instr_id).dest {
                    renumber(func, dest);
                }
            }
        }

        // Resolve labels into predecessor/successor edges. Every label a
        // branch references must have been bound by now.
        for &block in &blocks {
            let b = func.block_mut(block);
            b.preds.clear();
            b.succs.clear();
        }
        for (at, &block) in blocks.iter().enumerate() {
            let mut targets: Vec<crate::hir::BlockId> = Vec::new();
            let mut falls_through = true;
            if let Some(tail) = func.block(block).instr_tail {
                let instr = func.instr(tail);
                match instr.opcode {
                    Opcode::Branch => {
                        let label = instr.srcs[0].label().unwrap();
                        targets.push(func.label_block(label).ok_or_else(|| {
                            Error::Ir(format!("unbound label {}", label.0))
                        })?);
                        falls_through = false;
                    }
                    Opcode::BranchIf => {
                        for slot in 1..3 {
                            let label = instr.srcs[slot].label().unwrap();
                            targets.push(func.label_block(label).ok_or_else(|| {
                                Error::Ir(format!("unbound label {}", label.0))
                            })?);
                        }
                        falls_through = false;
                    }
                    Opcode::BranchTrue | Opcode::BranchFalse => {
                        let label = instr.srcs[1].label().unwrap();
                        targets.push(func.label_block(label).ok_or_else(|| {
                            Error::Ir(format!("unbound label {}", label.0))
                        })?);
                    }
                    Opcode::Return => falls_through = false,
                    _ => {}
                }
            }
            if falls_through {
                if let Some(&next) = blocks.get(at + 1) {
                    targets.push(next);
                }
            }
            for target in targets {
                func.block_mut(block).succs.push(target);
                func.block_mut(target).preds.push(block);
            }
        }

        // Stack-local layout: naturally aligned slots, frame size padded
        // to 16 bytes for the emitter.
        let mut offset = 0u32;
        for index in 0..func.locals.len() {
            let size = (func.locals[index].ty.bits() / 8).max(1);
            offset = (offset + size - 1) & !(size - 1);
            func.locals[index].offset = offset;
            offset += size;
        }
        func.stack_local_size = (offset + 15) & !15;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hir::{HirBuilder, ValueType};

    #[test]
    fn ordinals_are_dense_and_ordered() {
        let mut b = HirBuilder::new(0);
        let exit = b.new_label();
        let x = b.load_context(0x10, ValueType::I32);
        let zero = b.load_zero(ValueType::I32);
        let eq = b.compare_eq(x, zero);
        b.branch_true(eq, exit, 0);
        b.store_context(0x20, x);
        b.mark_label(exit);
        b.return_();
        let mut func = b.finish();
        FinalizationPass::new().run(&mut func).unwrap();
        // Defs precede uses in ordinal order.
        for block in func.block_order() {
            for instr_id in func.instr_order(block) {
                let instr = func.instr(instr_id);
                if let Some(value) = instr.srcs[0].value() {
                    if let Some(def) = func.value(value).def {
                        assert!(func.instr(def).ordinal < instr.ordinal);
                    }
                }
            }
        }
    }

    #[test]
    fn edges_follow_branches_and_fallthrough() {
        let mut b = HirBuilder::new(0);
        let exit = b.new_label();
        let cond = b.load_context(0x10, ValueType::I8);
        b.branch_true(cond, exit, 0);
        b.nop();
        b.mark_label(exit);
        b.return_();
        let mut func = b.finish();
        FinalizationPass::new().run(&mut func).unwrap();
        let blocks = func.block_order();
        assert_eq!(blocks.len(), 3);
        // Entry: branch target + fallthrough.
        assert_eq!(func.block(blocks[0]).succs.len(), 2);
        assert_eq!(func.block(blocks[2]).preds.len(), 2);
        assert!(func.block(blocks[2]).succs.is_empty());
    }

    #[test]
    fn unbound_label_is_an_error() {
        let mut b = HirBuilder::new(0);
        let nowhere = b.new_label();
        b.branch(nowhere, 0);
        let mut func = b.finish();
        assert!(FinalizationPass::new().run(&mut func).is_err());
    }

    #[test]
    fn local_layout_is_aligned() {
        let mut b = HirBuilder::new(0);
        let a = b.alloc_local(ValueType::I8);
        let v128 = b.alloc_local(ValueType::V128);
        let c = b.alloc_local(ValueType::I32);
        let va = b.load_constant(crate::hir::ConstantValue::I8(1));
        b.store_local(a, va);
        let vb = b.load_local(v128);
        b.store_local(v128, vb);
        let vc = b.load_local(c);
        b.store_local(c, vc);
        b.return_();
        let mut func = b.finish();
        FinalizationPass::new().run(&mut func).unwrap();
        assert_eq!(func.locals()[0].offset, 0);
        assert_eq!(func.locals()[1].offset, 16);
        assert_eq!(func.locals()[2].offset, 32);
        assert_eq!(func.stack_local_size, 48);
    }
}
