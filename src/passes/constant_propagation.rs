//! Constant propagation: folds every instruction whose value operands are
//! all constant, materializing the result in the destination value and
//! deleting the instruction. Branches on constant conditions collapse to
//! unconditional branches (or vanish).
//!
//! The evaluation rules live in [`crate::hir::ConstantValue`] and
//! [`crate::hir::vector_ops`]; IEEE-754 nearest-even applies unless the
//! opcode's round-mode flag says otherwise.

use crate::error::Error;
use crate::hir::vector_ops;
use crate::hir::{
    instr_flags, ConstantValue, HirFunction, InstrId, Opcode, Operand, OperandKind, PackType,
    RoundMode, ValueType,
};
use crate::passes::Pass;

pub struct ConstantPropagationPass;

impl ConstantPropagationPass {
    pub fn new() -> Self {
        Self
    }

    fn operand_constants(func: &HirFunction, instr_id: InstrId) -> Option<[ConstantValue; 3]> {
        let instr = func.instr(instr_id);
        let sig = instr.opcode.info().sig;
        let mut out = [ConstantValue::I8(0); 3];
        for slot in 0..3 {
            if sig.srcs[slot] != OperandKind::V {
                continue;
            }
            let value = func.value(instr.srcs[slot].value().unwrap());
            if !value.is_constant() {
                return None;
            }
            out[slot] = value.constant;
        }
        Some(out)
    }

    fn round_mode(flags: u16) -> RoundMode {
        if flags & 1 != 0 {
            RoundMode::ToNearest
        } else {
            RoundMode::ToZero
        }
    }

    fn pack_type(flags: u16) -> PackType {
        match flags & 0x3 {
            0 => PackType::D3dColor,
            1 => PackType::Float16_2,
            2 => PackType::Float16_4,
            _ => PackType::Short2,
        }
    }

    /// Evaluates one foldable instruction. Returns None when the opcode is
    /// not (or not yet) foldable.
    fn evaluate(func: &HirFunction, instr_id: InstrId) -> Option<ConstantValue> {
        let instr = func.instr(instr_id);
        let dest_ty = instr.dest.map(|dest| func.value(dest).ty)?;
        let ops = Self::operand_constants(func, instr_id)?;
        let unsigned = instr.flags & instr_flags::ARITHMETIC_UNSIGNED != 0;
        let part = ValueType::from_part(instr.flags);
        let value = match instr.opcode {
            Opcode::Assign => ops[0],
            Opcode::Cast => ops[0].cast(dest_ty),
            Opcode::ZeroExtend => ops[0].zero_extend(dest_ty),
            Opcode::SignExtend => ops[0].sign_extend(dest_ty),
            Opcode::Truncate => ops[0].truncate(dest_ty),
            Opcode::Convert => ops[0].convert(dest_ty, Self::round_mode(instr.flags)),
            Opcode::Round => match (ops[0], Self::round_mode(instr.flags)) {
                (ConstantValue::F32(v), RoundMode::ToZero) => ConstantValue::F32(v.trunc()),
                (ConstantValue::F32(v), RoundMode::ToNearest) => {
                    ConstantValue::F32(v.round_ties_even())
                }
                (ConstantValue::F64(v), RoundMode::ToZero) => ConstantValue::F64(v.trunc()),
                (ConstantValue::F64(v), RoundMode::ToNearest) => {
                    ConstantValue::F64(v.round_ties_even())
                }
                (other, _) => other,
            },
            Opcode::VectorConvertI2F => {
                ConstantValue::V128(vector_ops::convert_i2f(ops[0].as_vec128()))
            }
            Opcode::VectorConvertF2I => {
                ConstantValue::V128(vector_ops::convert_f2i(ops[0].as_vec128()))
            }
            Opcode::IsTrue => ConstantValue::I8(ops[0].is_true() as i8),
            Opcode::IsFalse => ConstantValue::I8(!ops[0].is_true() as i8),
            Opcode::CompareEq
            | Opcode::CompareNe
            | Opcode::CompareSlt
            | Opcode::CompareSle
            | Opcode::CompareSgt
            | Opcode::CompareSge
            | Opcode::CompareUlt
            | Opcode::CompareUle
            | Opcode::CompareUgt
            | Opcode::CompareUge => {
                ConstantValue::I8(ops[0].compare(instr.opcode, &ops[1]) as i8)
            }
            Opcode::VectorCompareEq
            | Opcode::VectorCompareSgt
            | Opcode::VectorCompareSge
            | Opcode::VectorCompareUgt
            | Opcode::VectorCompareUge => ConstantValue::V128(vector_ops::vector_compare(
                part,
                instr.opcode,
                ops[0].as_vec128(),
                ops[1].as_vec128(),
            )),
            Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div | Opcode::Max | Opcode::Min
                if dest_ty.is_vec() =>
            {
                ConstantValue::V128(vector_ops::vector_f32_binary(
                    instr.opcode,
                    ops[0].as_vec128(),
                    ops[1].as_vec128(),
                ))
            }
            Opcode::Add => ops[0].add(&ops[1]),
            Opcode::Sub => ops[0].sub(&ops[1]),
            Opcode::Mul => ops[0].mul(&ops[1]),
            Opcode::MulHi => ops[0].mul_hi(&ops[1], unsigned),
            Opcode::Div => ops[0].div(&ops[1], unsigned),
            Opcode::Rem => ops[0].rem(&ops[1], unsigned),
            Opcode::MulAdd => ops[0].mul(&ops[1]).add(&ops[2]),
            Opcode::MulSub => ops[0].mul(&ops[1]).sub(&ops[2]),
            Opcode::Neg => ops[0].neg(),
            Opcode::Abs => ops[0].abs(),
            Opcode::Sqrt => ops[0].sqrt(),
            Opcode::RSqrt => ops[0].rsqrt(),
            Opcode::DotProduct3 => ConstantValue::F32(vector_ops::dot_product_3(
                ops[0].as_vec128(),
                ops[1].as_vec128(),
            )),
            Opcode::DotProduct4 => ConstantValue::F32(vector_ops::dot_product_4(
                ops[0].as_vec128(),
                ops[1].as_vec128(),
            )),
            Opcode::And | Opcode::Or | Opcode::Xor if dest_ty.is_vec() => ConstantValue::V128(
                vector_ops::vector_logic(instr.opcode, ops[0].as_vec128(), ops[1].as_vec128()),
            ),
            Opcode::And => ops[0].and(&ops[1]),
            Opcode::Or => ops[0].or(&ops[1]),
            Opcode::Xor => ops[0].xor(&ops[1]),
            Opcode::Not => ops[0].not(),
            Opcode::Shl => ops[0].shl(&ops[1]),
            Opcode::Shr => ops[0].shr(&ops[1]),
            Opcode::Sha => ops[0].sha(&ops[1]),
            Opcode::VectorShl => ConstantValue::V128(vector_ops::vector_shl(
                part,
                ops[0].as_vec128(),
                ops[1].as_vec128(),
            )),
            Opcode::VectorShr => ConstantValue::V128(vector_ops::vector_shr(
                part,
                ops[0].as_vec128(),
                ops[1].as_vec128(),
            )),
            Opcode::VectorSha => ConstantValue::V128(vector_ops::vector_sha(
                part,
                ops[0].as_vec128(),
                ops[1].as_vec128(),
            )),
            Opcode::RotateLeft => ops[0].rotate_left(&ops[1]),
            Opcode::ByteSwap => ops[0].byte_swap(),
            Opcode::Cntlz => ops[0].cntlz(),
            Opcode::Max => ops[0].max(&ops[1]),
            Opcode::Min => ops[0].min(&ops[1]),
            Opcode::Splat => {
                ConstantValue::V128(vector_ops::splat(ops[0].ty(), ops[0].as_u64()))
            }
            Opcode::Permute => {
                let control = ops[0];
                let (a, b) = (ops[1].as_vec128(), ops[2].as_vec128());
                match part {
                    ValueType::I32 => ConstantValue::V128(vector_ops::permute_u32(
                        control.as_u64() as u32,
                        a,
                        b,
                    )),
                    _ => ConstantValue::V128(vector_ops::permute_bytes(
                        control.as_vec128(),
                        a,
                        b,
                    )),
                }
            }
            Opcode::Swizzle => {
                let mask = instr.srcs[1].offset().unwrap() as u32;
                ConstantValue::V128(vector_ops::swizzle_u32(mask, ops[0].as_vec128()))
            }
            Opcode::Pack => {
                ConstantValue::V128(vector_ops::pack(Self::pack_type(instr.flags), ops[0].as_vec128()))
            }
            Opcode::Unpack => ConstantValue::V128(vector_ops::unpack(
                Self::pack_type(instr.flags),
                ops[0].as_vec128(),
            )),
            Opcode::Extract => {
                let index = instr.srcs[1].offset().unwrap() as usize;
                let vec = ops[0].as_vec128();
                let raw = match dest_ty {
                    ValueType::I8 => vec.u8(index) as u64,
                    ValueType::I16 => vec.u16(index) as u64,
                    ValueType::I32 | ValueType::F32 => vec.u32(index) as u64,
                    _ => vec.u64(index),
                };
                ConstantValue::from_u64(dest_ty, raw)
            }
            Opcode::Insert => {
                let index = instr.srcs[1].offset().unwrap() as usize;
                let mut vec = ops[0].as_vec128();
                let raw = ops[2].as_u64();
                match ops[2].ty() {
                    ValueType::I8 => vec.set_u8(index, raw as u8),
                    ValueType::I16 => vec.set_u16(index, raw as u16),
                    ValueType::I32 | ValueType::F32 => vec.set_u32(index, raw as u32),
                    _ => vec.set_u64(index, raw),
                }
                ConstantValue::V128(vec)
            }
            _ => return None,
        };
        Some(value)
    }

    /// Turns constant-condition branches into unconditional ones (or
    /// removes them).
    fn fold_branch(func: &mut HirFunction, instr_id: InstrId) -> bool {
        let instr = func.instr(instr_id);
        let (taken, label) = match instr.opcode {
            Opcode::BranchTrue | Opcode::BranchFalse => {
                let cond = func.value(instr.srcs[0].value().unwrap());
                if !cond.is_constant() {
                    return false;
                }
                let wants_true = instr.opcode == Opcode::BranchTrue;
                (
                    cond.constant.is_true() == wants_true,
                    instr.srcs[1].label().unwrap(),
                )
            }
            _ => return false,
        };
        func.replace_with_nop(instr_id);
        if taken {
            let instr = func.instr_mut(instr_id);
            instr.opcode = Opcode::Branch;
            instr.srcs[0] = Operand::Label(label);
        } else {
            func.unlink_instr(instr_id);
        }
        true
    }
}

impl Pass for ConstantPropagationPass {
    fn name(&self) -> &'static str {
        "constant_propagation"
    }

    fn run(&mut self, func: &mut HirFunction) -> Result<(), Error> {
        for block in func.block_order() {
            for instr_id in func.instr_order(block) {
                if Self::fold_branch(func, instr_id) {
                    continue;
                }
                if let Some(constant) = Self::evaluate(func, instr_id) {
                    let dest = func.instr(instr_id).dest.unwrap();
                    func.replace_with_nop(instr_id);
                    func.unlink_instr(instr_id);
                    func.value_mut(dest).set_constant(constant);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hir::HirBuilder;

    fn fold_to_constant(build: impl FnOnce(&mut HirBuilder) -> crate::hir::ValueId) -> ConstantValue {
        let mut b = HirBuilder::new(0);
        let result = build(&mut b);
        b.store_context(0x40, result);
        b.return_();
        let mut func = b.finish();
        ConstantPropagationPass::new().run(&mut func).unwrap();
        func.validate().unwrap();
        let value = func.value(result);
        assert!(value.is_constant(), "did not fold");
        value.constant
    }

    #[test]
    fn folds_signed_divide_quirks() {
        // INT8_MIN / -1 overflows in hardware; the quotient is 0.
        let q = fold_to_constant(|b| {
            let a = b.load_constant(ConstantValue::I8(i8::MIN));
            let d = b.load_constant(ConstantValue::I8(-1));
            b.div(a, d, false)
        });
        assert_eq!(q, ConstantValue::I8(0));
        let q = fold_to_constant(|b| {
            let a = b.load_constant(ConstantValue::I8(30));
            let d = b.load_constant(ConstantValue::I8(7));
            b.div(a, d, false)
        });
        assert_eq!(q, ConstantValue::I8(4));
    }

    #[test]
    fn folds_vector_sha() {
        use crate::vec128::vec128s;
        let out = fold_to_constant(|b| {
            let a = b.load_constant(ConstantValue::V128(vec128s([
                0x7FFE, 0x7FFE, 0x7FFE, 0x7FFF, 0x8000, 0xFFFF, 0x0001, 0x1234,
            ])));
            let counts = b.load_constant(ConstantValue::V128(vec128s([
                0, 1, 8, 15, 15, 8, 1, 16,
            ])));
            b.vector_sha(a, counts, ValueType::I16)
        });
        assert_eq!(
            out,
            ConstantValue::V128(vec128s([
                0x7FFE, 0x3FFF, 0x007F, 0, 0xFFFF, 0xFFFF, 0, 0x1234
            ]))
        );
    }

    #[test]
    fn folds_permute_by_constant_mask() {
        use crate::hir::make_permute_mask;
        use crate::vec128::vec128i;
        let out = fold_to_constant(|b| {
            let control = b.load_u32(make_permute_mask(0, 0, 0, 1, 0, 2, 0, 3));
            let a = b.load_constant(ConstantValue::V128(vec128i(0, 1, 2, 3)));
            let v = b.load_constant(ConstantValue::V128(vec128i(4, 5, 6, 7)));
            b.permute(control, a, v, ValueType::I32)
        });
        assert_eq!(out, ConstantValue::V128(vec128i(0, 1, 2, 3)));
    }

    #[test]
    fn folds_unpack_d3dcolor() {
        use crate::vec128::vec128i;
        let out = fold_to_constant(|b| {
            let a = b.load_constant(ConstantValue::V128(vec128i(0, 0, 0, 0x80506070)));
            b.unpack(a, PackType::D3dColor)
        });
        assert_eq!(
            out,
            ConstantValue::V128(vec128i(0x3F800050, 0x3F800060, 0x3F800070, 0x3F800080))
        );
    }

    #[test]
    fn collapses_constant_branches() {
        let mut b = HirBuilder::new(0);
        let taken = b.new_label();
        let cond = b.load_constant(ConstantValue::I8(1));
        b.branch_true(cond, taken, 0);
        b.nop();
        b.mark_label(taken);
        b.return_();
        let mut func = b.finish();
        ConstantPropagationPass::new().run(&mut func).unwrap();
        let first_block = func.entry_block().unwrap();
        let tail = func.block(first_block).instr_tail.unwrap();
        assert_eq!(func.instr(tail).opcode, Opcode::Branch);
    }
}
