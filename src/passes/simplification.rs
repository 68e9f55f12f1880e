//! Simplification: eliminates conversion round-trips and propagates assign
//! chains so later passes see the original values.
//!
//! A truncate of a matching-width zero/sign extend collapses to an assign
//! of the original operand, as does a byte swap of a byte swap. The
//! orphaned conversions go away in dead-code elimination.

use crate::error::Error;
use crate::hir::{HirFunction, InstrId, Opcode, Operand, OperandKind, ValueId};
use crate::passes::Pass;

pub struct SimplificationPass;

impl SimplificationPass {
    pub fn new() -> Self {
        Self
    }

    /// Walks backward over `value`'s definition, skipping assigns.
    fn def_skipping_assigns(func: &HirFunction, value: ValueId) -> Option<InstrId> {
        let mut def = func.value(value).def?;
        while func.instr(def).opcode == Opcode::Assign {
            let src = func.instr(def).srcs[0].value().unwrap();
            def = func.value(src).def?;
        }
        Some(def)
    }

    fn check_truncate(func: &mut HirFunction, instr_id: InstrId) -> bool {
        let src = func.instr(instr_id).srcs[0].value().unwrap();
        let dest = func.instr(instr_id).dest.unwrap();
        let Some(def) = Self::def_skipping_assigns(func, src) else {
            return false;
        };
        if matches!(
            func.instr(def).opcode,
            Opcode::SignExtend | Opcode::ZeroExtend
        ) {
            let original = func.instr(def).srcs[0].value().unwrap();
            if func.value(original).ty == func.value(dest).ty {
                func.replace_with_assign(instr_id, original);
                return true;
            }
        }
        false
    }

    fn check_byte_swap(func: &mut HirFunction, instr_id: InstrId) -> bool {
        let src = func.instr(instr_id).srcs[0].value().unwrap();
        let dest = func.instr(instr_id).dest.unwrap();
        let Some(def) = Self::def_skipping_assigns(func, src) else {
            return false;
        };
        if func.instr(def).opcode == Opcode::ByteSwap {
            let original = func.instr(def).srcs[0].value().unwrap();
            if func.value(original).ty == func.value(dest).ty {
                func.replace_with_assign(instr_id, original);
                return true;
            }
        }
        false
    }

    fn eliminate_conversions(&self, func: &mut HirFunction) {
        for block in func.block_order() {
            for instr_id in func.instr_order(block) {
                match func.instr(instr_id).opcode {
                    Opcode::Truncate => {
                        Self::check_truncate(func, instr_id);
                    }
                    Opcode::ByteSwap => {
                        Self::check_byte_swap(func, instr_id);
                    }
                    _ => {}
                }
            }
        }
    }

    /// Follows an assign chain to the value it ultimately names.
    fn resolve(func: &HirFunction, mut value: ValueId) -> ValueId {
        while let Some(def) = func.value(value).def {
            if func.instr(def).opcode != Opcode::Assign {
                break;
            }
            value = func.instr(def).srcs[0].value().unwrap();
        }
        value
    }

    fn simplify_assignments(&self, func: &mut HirFunction) {
        for block in func.block_order() {
            for instr_id in func.instr_order(block) {
                if func.instr(instr_id).opcode == Opcode::Assign {
                    continue;
                }
                let sig = func.instr(instr_id).opcode.info().sig;
                for slot in 0..3 {
                    if sig.srcs[slot] != OperandKind::V {
                        continue;
                    }
                    let value = func.instr(instr_id).srcs[slot].value().unwrap();
                    let resolved = Self::resolve(func, value);
                    if resolved != value {
                        func.set_src(instr_id, slot, Operand::Value(resolved));
                    }
                }
            }
        }
    }
}

impl Pass for SimplificationPass {
    fn name(&self) -> &'static str {
        "simplification"
    }

    fn run(&mut self, func: &mut HirFunction) -> Result<(), Error> {
        self.eliminate_conversions(func);
        self.simplify_assignments(func);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hir::{HirBuilder, ValueType};

    #[test]
    fn truncate_of_extend_collapses() {
        let mut b = HirBuilder::new(0);
        let v = b.load_context(0x10, ValueType::I32);
        let wide = b.zero_extend(v, ValueType::I64);
        let narrow = b.truncate(wide, ValueType::I32);
        b.store_context(0x20, narrow);
        b.return_();
        let mut func = b.finish();
        SimplificationPass::new().run(&mut func).unwrap();
        func.validate().unwrap();
        // The store now consumes the original value directly.
        let store = func
            .block_order()
            .into_iter()
            .flat_map(|block| func.instr_order(block))
            .find(|id| func.instr(*id).opcode == Opcode::StoreContext)
            .unwrap();
        assert_eq!(func.instr(store).srcs[1].value(), Some(v));
    }

    #[test]
    fn byte_swap_is_an_involution() {
        let mut b = HirBuilder::new(0);
        let v = b.load_context(0x10, ValueType::I32);
        let swapped = b.byte_swap(v);
        let back = b.byte_swap(swapped);
        b.store_context(0x20, back);
        b.return_();
        let mut func = b.finish();
        SimplificationPass::new().run(&mut func).unwrap();
        let store = func
            .block_order()
            .into_iter()
            .flat_map(|block| func.instr_order(block))
            .find(|id| func.instr(*id).opcode == Opcode::StoreContext)
            .unwrap();
        assert_eq!(func.instr(store).srcs[1].value(), Some(v));
    }

    #[test]
    fn width_changing_round_trip_survives() {
        let mut b = HirBuilder::new(0);
        let v = b.load_context(0x10, ValueType::I32);
        let wide = b.sign_extend(v, ValueType::I64);
        let narrow = b.truncate(wide, ValueType::I16);
        b.store_context(0x20, narrow);
        b.return_();
        let mut func = b.finish();
        SimplificationPass::new().run(&mut func).unwrap();
        let def = func.value(narrow).def.unwrap();
        assert_eq!(func.instr(def).opcode, Opcode::Truncate);
    }
}
