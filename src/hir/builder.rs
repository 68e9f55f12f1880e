//! The function builder: one appending method per opcode.
//!
//! Every method checks its operand types against the opcode signature in
//! debug builds, allocates a fresh destination value when the signature
//! declares one, and appends to the current block. Appending after a block
//! terminator opens a fresh block, so straight-line translators never
//! build into a terminated block.

use crate::hir::block::{BlockId, LabelId};
use crate::hir::function::HirFunction;
use crate::hir::instr::Operand;
use crate::hir::opcode::{instr_flags, Opcode, OperandKind, PackType, RoundMode};
use crate::hir::value::{ConstantValue, InstrId, ValueId, ValueType};

pub struct HirBuilder {
    func: HirFunction,
    current_block: Option<BlockId>,
}

impl HirBuilder {
    pub fn new(guest_address: u32) -> Self {
        Self {
            func: HirFunction::new(guest_address),
            current_block: None,
        }
    }

    /// Hands the finished function over for optimization and lowering.
    pub fn finish(self) -> HirFunction {
        self.func
    }

    pub fn func(&self) -> &HirFunction {
        &self.func
    }

    pub fn func_mut(&mut self) -> &mut HirFunction {
        &mut self.func
    }

    fn ends_block(opcode: Opcode) -> bool {
        matches!(
            opcode,
            Opcode::Branch
                | Opcode::BranchIf
                | Opcode::BranchTrue
                | Opcode::BranchFalse
                | Opcode::Return
        )
    }

    fn current_block(&mut self) -> BlockId {
        match self.current_block {
            Some(block) => block,
            None => {
                let block = self.func.append_block();
                self.current_block = Some(block);
                block
            }
        }
    }

    #[cfg(debug_assertions)]
    fn check_signature(&self, opcode: Opcode, dest: Option<ValueId>, srcs: &[Operand; 3]) {
        let sig = opcode.info().sig;
        assert_eq!(
            sig.dest == OperandKind::V,
            dest.is_some(),
            "{}: destination mismatch",
            opcode.name()
        );
        for (slot, kind) in sig.srcs.iter().enumerate() {
            let ok = match (kind, srcs[slot]) {
                (OperandKind::X, Operand::None) => true,
                (OperandKind::V, Operand::Value(_)) => true,
                (OperandKind::L, Operand::Label(_)) => true,
                (OperandKind::O, Operand::Offset(_)) => true,
                (OperandKind::S, Operand::Symbol(_)) => true,
                _ => false,
            };
            assert!(ok, "{}: operand {} kind mismatch", opcode.name(), slot);
        }
    }

    fn append(
        &mut self,
        opcode: Opcode,
        flags: u16,
        dest: Option<ValueId>,
        srcs: [Operand; 3],
    ) -> InstrId {
        #[cfg(debug_assertions)]
        self.check_signature(opcode, dest, &srcs);
        let block = self.current_block();
        let id = self.func.append_instr(block, opcode, flags, dest, srcs);
        if Self::ends_block(opcode) {
            self.current_block = None;
        }
        id
    }

    fn unary(&mut self, opcode: Opcode, flags: u16, value: ValueId, dest_ty: ValueType) -> ValueId {
        let dest = self.func.alloc_value(dest_ty);
        self.append(opcode, flags, Some(dest), [Operand::Value(value), Operand::None, Operand::None]);
        dest
    }

    fn binary(
        &mut self,
        opcode: Opcode,
        flags: u16,
        a: ValueId,
        b: ValueId,
        dest_ty: ValueType,
    ) -> ValueId {
        let dest = self.func.alloc_value(dest_ty);
        self.append(
            opcode,
            flags,
            Some(dest),
            [Operand::Value(a), Operand::Value(b), Operand::None],
        );
        dest
    }

    fn ternary(
        &mut self,
        opcode: Opcode,
        flags: u16,
        a: ValueId,
        b: ValueId,
        c: ValueId,
        dest_ty: ValueType,
    ) -> ValueId {
        let dest = self.func.alloc_value(dest_ty);
        self.append(
            opcode,
            flags,
            Some(dest),
            [Operand::Value(a), Operand::Value(b), Operand::Value(c)],
        );
        dest
    }

    #[inline]
    fn ty(&self, value: ValueId) -> ValueType {
        self.func.value(value).ty
    }

    fn constant_of(&self, value: ValueId) -> Option<ConstantValue> {
        let value = self.func.value(value);
        value.is_constant().then_some(value.constant)
    }

    // Structural.

    pub fn comment(&mut self, text: impl Into<String>) {
        let index = self.func.intern_comment(text.into());
        self.append(
            Opcode::Comment,
            0,
            None,
            [Operand::Offset(index), Operand::None, Operand::None],
        );
    }

    pub fn nop(&mut self) {
        self.append(Opcode::Nop, 0, None, [Operand::None; 3]);
    }

    /// Records the guest PC the following instructions were translated
    /// from; the back end turns these into source-map entries.
    pub fn source_offset(&mut self, pc: u32) {
        self.append(
            Opcode::SourceOffset,
            0,
            None,
            [Operand::Offset(pc as u64), Operand::None, Operand::None],
        );
    }

    // Traps.

    pub fn debug_break(&mut self) {
        self.append(Opcode::DebugBreak, 0, None, [Operand::None; 3]);
    }

    pub fn debug_break_true(&mut self, cond: ValueId) {
        self.append(
            Opcode::DebugBreakTrue,
            0,
            None,
            [Operand::Value(cond), Operand::None, Operand::None],
        );
    }

    pub fn trap(&mut self, code: u16) {
        self.append(Opcode::Trap, code, None, [Operand::None; 3]);
    }

    pub fn trap_true(&mut self, cond: ValueId, code: u16) {
        self.append(
            Opcode::TrapTrue,
            code,
            None,
            [Operand::Value(cond), Operand::None, Operand::None],
        );
    }

    // Calls and branches.

    pub fn call(&mut self, address: u32, flags: u16) {
        self.append(
            Opcode::Call,
            flags,
            None,
            [Operand::Symbol(address), Operand::None, Operand::None],
        );
        if flags & instr_flags::CALL_TAIL != 0 {
            self.current_block = None;
        }
    }

    pub fn call_true(&mut self, cond: ValueId, address: u32, flags: u16) {
        self.append(
            Opcode::CallTrue,
            flags,
            None,
            [Operand::Value(cond), Operand::Symbol(address), Operand::None],
        );
    }

    pub fn call_indirect(&mut self, target: ValueId, flags: u16) {
        debug_assert_eq!(self.ty(target), ValueType::I64);
        self.append(
            Opcode::CallIndirect,
            flags,
            None,
            [Operand::Value(target), Operand::None, Operand::None],
        );
        if flags & instr_flags::CALL_TAIL != 0 {
            self.current_block = None;
        }
    }

    pub fn call_indirect_true(&mut self, cond: ValueId, target: ValueId, flags: u16) {
        self.append(
            Opcode::CallIndirectTrue,
            flags,
            None,
            [Operand::Value(cond), Operand::Value(target), Operand::None],
        );
    }

    /// Calls a registered host shim instead of guest code.
    pub fn call_extern(&mut self, address: u32) {
        self.append(
            Opcode::CallExtern,
            0,
            None,
            [Operand::Symbol(address), Operand::None, Operand::None],
        );
    }

    pub fn return_(&mut self) {
        self.append(Opcode::Return, 0, None, [Operand::None; 3]);
    }

    pub fn new_label(&mut self) -> LabelId {
        self.func.alloc_label()
    }

    pub fn new_named_label(&mut self, name: impl Into<String>) -> LabelId {
        let label = self.func.alloc_label();
        self.func.label_mut(label).name = Some(name.into());
        label
    }

    /// Binds `label` to the start of the next appended instruction. If the
    /// current block already has instructions the label starts a new block.
    pub fn mark_label(&mut self, label: LabelId) {
        debug_assert!(
            self.func.label(label).block.is_none(),
            "label bound twice"
        );
        let block = match self.current_block {
            Some(block) if self.func.block(block).is_empty() => block,
            _ => {
                let block = self.func.append_block();
                self.current_block = Some(block);
                block
            }
        };
        self.func.label_mut(label).block = Some(block);
        self.func.block_mut(block).labels.push(label);
    }

    pub fn branch(&mut self, label: LabelId, flags: u16) {
        self.append(
            Opcode::Branch,
            flags,
            None,
            [Operand::Label(label), Operand::None, Operand::None],
        );
    }

    pub fn branch_if(&mut self, cond: ValueId, if_true: LabelId, if_false: LabelId, flags: u16) {
        self.append(
            Opcode::BranchIf,
            flags,
            None,
            [
                Operand::Value(cond),
                Operand::Label(if_true),
                Operand::Label(if_false),
            ],
        );
    }

    pub fn branch_true(&mut self, cond: ValueId, label: LabelId, flags: u16) {
        self.append(
            Opcode::BranchTrue,
            flags,
            None,
            [Operand::Value(cond), Operand::Label(label), Operand::None],
        );
    }

    pub fn branch_false(&mut self, cond: ValueId, label: LabelId, flags: u16) {
        self.append(
            Opcode::BranchFalse,
            flags,
            None,
            [Operand::Value(cond), Operand::Label(label), Operand::None],
        );
    }

    // Data movement.

    pub fn assign(&mut self, value: ValueId) -> ValueId {
        let ty = self.ty(value);
        self.unary(Opcode::Assign, 0, value, ty)
    }

    pub fn cast(&mut self, value: ValueId, to: ValueType) -> ValueId {
        debug_assert_eq!(self.ty(value).bits(), to.bits());
        self.unary(Opcode::Cast, 0, value, to)
    }

    pub fn zero_extend(&mut self, value: ValueId, to: ValueType) -> ValueId {
        debug_assert!(self.ty(value).bits() <= to.bits());
        if let Some(constant) = self.constant_of(value) {
            return self.func.alloc_constant(constant.zero_extend(to));
        }
        self.unary(Opcode::ZeroExtend, 0, value, to)
    }

    pub fn sign_extend(&mut self, value: ValueId, to: ValueType) -> ValueId {
        debug_assert!(self.ty(value).bits() <= to.bits());
        if let Some(constant) = self.constant_of(value) {
            return self.func.alloc_constant(constant.sign_extend(to));
        }
        self.unary(Opcode::SignExtend, 0, value, to)
    }

    pub fn truncate(&mut self, value: ValueId, to: ValueType) -> ValueId {
        debug_assert!(self.ty(value).bits() >= to.bits());
        if let Some(constant) = self.constant_of(value) {
            return self.func.alloc_constant(constant.truncate(to));
        }
        self.unary(Opcode::Truncate, 0, value, to)
    }

    pub fn convert(&mut self, value: ValueId, to: ValueType, round: RoundMode) -> ValueId {
        self.unary(Opcode::Convert, round as u16, value, to)
    }

    pub fn round(&mut self, value: ValueId, round: RoundMode) -> ValueId {
        let ty = self.ty(value);
        self.unary(Opcode::Round, round as u16, value, ty)
    }

    pub fn vector_convert_i2f(&mut self, value: ValueId) -> ValueId {
        self.unary(Opcode::VectorConvertI2F, 0, value, ValueType::V128)
    }

    pub fn vector_convert_f2i(&mut self, value: ValueId, round: RoundMode) -> ValueId {
        self.unary(Opcode::VectorConvertF2I, round as u16, value, ValueType::V128)
    }

    // Constants.

    pub fn load_constant(&mut self, constant: ConstantValue) -> ValueId {
        self.func.alloc_constant(constant)
    }

    pub fn load_zero(&mut self, ty: ValueType) -> ValueId {
        self.func.alloc_constant(ConstantValue::zero(ty))
    }

    pub fn load_u32(&mut self, value: u32) -> ValueId {
        self.load_constant(ConstantValue::I32(value as i32))
    }

    pub fn load_u64(&mut self, value: u64) -> ValueId {
        self.load_constant(ConstantValue::I64(value as i64))
    }

    // Context and locals.

    pub fn load_context(&mut self, offset: usize, ty: ValueType) -> ValueId {
        let dest = self.func.alloc_value(ty);
        self.append(
            Opcode::LoadContext,
            0,
            Some(dest),
            [Operand::Offset(offset as u64), Operand::None, Operand::None],
        );
        dest
    }

    pub fn store_context(&mut self, offset: usize, value: ValueId) {
        self.append(
            Opcode::StoreContext,
            0,
            None,
            [
                Operand::Offset(offset as u64),
                Operand::Value(value),
                Operand::None,
            ],
        );
    }

    pub fn alloc_local(&mut self, ty: ValueType) -> u64 {
        self.func.alloc_local(ty)
    }

    pub fn load_local(&mut self, slot: u64) -> ValueId {
        let ty = self.func.locals()[slot as usize].ty;
        let dest = self.func.alloc_value(ty);
        self.append(
            Opcode::LoadLocal,
            0,
            Some(dest),
            [Operand::Offset(slot), Operand::None, Operand::None],
        );
        dest
    }

    pub fn store_local(&mut self, slot: u64, value: ValueId) {
        debug_assert_eq!(self.func.locals()[slot as usize].ty, self.ty(value));
        self.append(
            Opcode::StoreLocal,
            0,
            None,
            [Operand::Offset(slot), Operand::Value(value), Operand::None],
        );
    }

    // Guest memory.

    pub fn load(&mut self, address: ValueId, ty: ValueType, flags: u16) -> ValueId {
        debug_assert_eq!(self.ty(address), ValueType::I64);
        self.unary(Opcode::Load, flags, address, ty)
    }

    pub fn load_acquire(&mut self, address: ValueId, ty: ValueType, flags: u16) -> ValueId {
        debug_assert_eq!(self.ty(address), ValueType::I64);
        self.unary(Opcode::LoadAcquire, flags, address, ty)
    }

    pub fn store(&mut self, address: ValueId, value: ValueId, flags: u16) {
        debug_assert_eq!(self.ty(address), ValueType::I64);
        self.append(
            Opcode::Store,
            flags,
            None,
            [Operand::Value(address), Operand::Value(value), Operand::None],
        );
    }

    /// Store-conditional; the i8 result is nonzero when the store happened.
    pub fn store_release(&mut self, address: ValueId, value: ValueId, flags: u16) -> ValueId {
        debug_assert_eq!(self.ty(address), ValueType::I64);
        self.binary(Opcode::StoreRelease, flags, address, value, ValueType::I8)
    }

    pub fn prefetch(&mut self, address: ValueId, length: u64) {
        self.append(
            Opcode::Prefetch,
            0,
            None,
            [Operand::Value(address), Operand::Offset(length), Operand::None],
        );
    }

    // Selection and comparison.

    pub fn max(&mut self, a: ValueId, b: ValueId) -> ValueId {
        debug_assert_eq!(self.ty(a), self.ty(b));
        let ty = self.ty(a);
        self.binary(Opcode::Max, 0, a, b, ty)
    }

    pub fn min(&mut self, a: ValueId, b: ValueId) -> ValueId {
        debug_assert_eq!(self.ty(a), self.ty(b));
        let ty = self.ty(a);
        self.binary(Opcode::Min, 0, a, b, ty)
    }

    pub fn select(&mut self, cond: ValueId, if_true: ValueId, if_false: ValueId) -> ValueId {
        debug_assert_eq!(self.ty(if_true), self.ty(if_false));
        let ty = self.ty(if_true);
        self.ternary(Opcode::Select, 0, cond, if_true, if_false, ty)
    }

    pub fn is_true(&mut self, value: ValueId) -> ValueId {
        self.unary(Opcode::IsTrue, 0, value, ValueType::I8)
    }

    pub fn is_false(&mut self, value: ValueId) -> ValueId {
        self.unary(Opcode::IsFalse, 0, value, ValueType::I8)
    }

    fn compare(&mut self, opcode: Opcode, a: ValueId, b: ValueId) -> ValueId {
        debug_assert_eq!(self.ty(a), self.ty(b));
        self.binary(opcode, 0, a, b, ValueType::I8)
    }

    pub fn compare_eq(&mut self, a: ValueId, b: ValueId) -> ValueId {
        self.compare(Opcode::CompareEq, a, b)
    }

    pub fn compare_ne(&mut self, a: ValueId, b: ValueId) -> ValueId {
        self.compare(Opcode::CompareNe, a, b)
    }

    pub fn compare_slt(&mut self, a: ValueId, b: ValueId) -> ValueId {
        self.compare(Opcode::CompareSlt, a, b)
    }

    pub fn compare_sle(&mut self, a: ValueId, b: ValueId) -> ValueId {
        self.compare(Opcode::CompareSle, a, b)
    }

    pub fn compare_sgt(&mut self, a: ValueId, b: ValueId) -> ValueId {
        self.compare(Opcode::CompareSgt, a, b)
    }

    pub fn compare_sge(&mut self, a: ValueId, b: ValueId) -> ValueId {
        self.compare(Opcode::CompareSge, a, b)
    }

    pub fn compare_ult(&mut self, a: ValueId, b: ValueId) -> ValueId {
        self.compare(Opcode::CompareUlt, a, b)
    }

    pub fn compare_ule(&mut self, a: ValueId, b: ValueId) -> ValueId {
        self.compare(Opcode::CompareUle, a, b)
    }

    pub fn compare_ugt(&mut self, a: ValueId, b: ValueId) -> ValueId {
        self.compare(Opcode::CompareUgt, a, b)
    }

    pub fn compare_uge(&mut self, a: ValueId, b: ValueId) -> ValueId {
        self.compare(Opcode::CompareUge, a, b)
    }

    pub fn did_carry(&mut self, value: ValueId) -> ValueId {
        self.unary(Opcode::DidCarry, 0, value, ValueType::I8)
    }

    pub fn did_overflow(&mut self, value: ValueId) -> ValueId {
        self.unary(Opcode::DidOverflow, 0, value, ValueType::I8)
    }

    pub fn vector_compare(
        &mut self,
        opcode: Opcode,
        a: ValueId,
        b: ValueId,
        part: ValueType,
    ) -> ValueId {
        debug_assert!(matches!(
            opcode,
            Opcode::VectorCompareEq
                | Opcode::VectorCompareSgt
                | Opcode::VectorCompareSge
                | Opcode::VectorCompareUgt
                | Opcode::VectorCompareUge
        ));
        self.binary(opcode, part as u16, a, b, ValueType::V128)
    }

    // Arithmetic.

    fn arith_binary(&mut self, opcode: Opcode, flags: u16, a: ValueId, b: ValueId) -> ValueId {
        debug_assert_eq!(self.ty(a), self.ty(b));
        let ty = self.ty(a);
        if flags == 0 {
            if let (Some(ca), Some(cb)) = (self.constant_of(a), self.constant_of(b)) {
                let folded = match opcode {
                    Opcode::Add => Some(ca.add(&cb)),
                    Opcode::And => Some(ca.and(&cb)),
                    Opcode::Or => Some(ca.or(&cb)),
                    Opcode::Xor => Some(ca.xor(&cb)),
                    _ => None,
                };
                if let Some(folded) = folded {
                    if !ty.is_vec() {
                        return self.func.alloc_constant(folded);
                    }
                }
            }
        }
        self.binary(opcode, flags, a, b, ty)
    }

    pub fn add(&mut self, a: ValueId, b: ValueId, flags: u16) -> ValueId {
        self.arith_binary(Opcode::Add, flags, a, b)
    }

    /// `a + b + carry`, carry being an i8.
    pub fn add_carry(&mut self, a: ValueId, b: ValueId, carry: ValueId, flags: u16) -> ValueId {
        debug_assert_eq!(self.ty(a), self.ty(b));
        debug_assert_eq!(self.ty(carry), ValueType::I8);
        let ty = self.ty(a);
        self.ternary(Opcode::AddCarry, flags, a, b, carry, ty)
    }

    pub fn sub(&mut self, a: ValueId, b: ValueId, flags: u16) -> ValueId {
        self.arith_binary(Opcode::Sub, flags, a, b)
    }

    pub fn mul(&mut self, a: ValueId, b: ValueId) -> ValueId {
        self.arith_binary(Opcode::Mul, 0, a, b)
    }

    pub fn mul_hi(&mut self, a: ValueId, b: ValueId, unsigned: bool) -> ValueId {
        let flags = if unsigned {
            instr_flags::ARITHMETIC_UNSIGNED
        } else {
            0
        };
        self.arith_binary(Opcode::MulHi, flags, a, b)
    }

    pub fn div(&mut self, a: ValueId, b: ValueId, unsigned: bool) -> ValueId {
        let flags = if unsigned {
            instr_flags::ARITHMETIC_UNSIGNED
        } else {
            0
        };
        self.arith_binary(Opcode::Div, flags, a, b)
    }

    pub fn rem(&mut self, a: ValueId, b: ValueId, unsigned: bool) -> ValueId {
        let flags = if unsigned {
            instr_flags::ARITHMETIC_UNSIGNED
        } else {
            0
        };
        self.arith_binary(Opcode::Rem, flags, a, b)
    }

    /// `(a * b) + c`.
    pub fn mul_add(&mut self, a: ValueId, b: ValueId, c: ValueId) -> ValueId {
        debug_assert_eq!(self.ty(a), self.ty(b));
        debug_assert_eq!(self.ty(a), self.ty(c));
        let ty = self.ty(a);
        self.ternary(Opcode::MulAdd, 0, a, b, c, ty)
    }

    /// `(a * b) - c`.
    pub fn mul_sub(&mut self, a: ValueId, b: ValueId, c: ValueId) -> ValueId {
        debug_assert_eq!(self.ty(a), self.ty(b));
        debug_assert_eq!(self.ty(a), self.ty(c));
        let ty = self.ty(a);
        self.ternary(Opcode::MulSub, 0, a, b, c, ty)
    }

    pub fn neg(&mut self, value: ValueId) -> ValueId {
        let ty = self.ty(value);
        self.unary(Opcode::Neg, 0, value, ty)
    }

    pub fn abs(&mut self, value: ValueId) -> ValueId {
        let ty = self.ty(value);
        self.unary(Opcode::Abs, 0, value, ty)
    }

    pub fn sqrt(&mut self, value: ValueId) -> ValueId {
        let ty = self.ty(value);
        self.unary(Opcode::Sqrt, 0, value, ty)
    }

    pub fn rsqrt(&mut self, value: ValueId) -> ValueId {
        let ty = self.ty(value);
        self.unary(Opcode::RSqrt, 0, value, ty)
    }

    pub fn dot_product_3(&mut self, a: ValueId, b: ValueId) -> ValueId {
        self.binary(Opcode::DotProduct3, 0, a, b, ValueType::F32)
    }

    pub fn dot_product_4(&mut self, a: ValueId, b: ValueId) -> ValueId {
        self.binary(Opcode::DotProduct4, 0, a, b, ValueType::F32)
    }

    // Bitwise.

    pub fn and(&mut self, a: ValueId, b: ValueId) -> ValueId {
        self.arith_binary(Opcode::And, 0, a, b)
    }

    pub fn or(&mut self, a: ValueId, b: ValueId) -> ValueId {
        self.arith_binary(Opcode::Or, 0, a, b)
    }

    pub fn xor(&mut self, a: ValueId, b: ValueId) -> ValueId {
        self.arith_binary(Opcode::Xor, 0, a, b)
    }

    pub fn not(&mut self, value: ValueId) -> ValueId {
        let ty = self.ty(value);
        self.unary(Opcode::Not, 0, value, ty)
    }

    pub fn shl(&mut self, value: ValueId, count: ValueId) -> ValueId {
        debug_assert!(self.ty(count).is_int());
        let ty = self.ty(value);
        self.binary(Opcode::Shl, 0, value, count, ty)
    }

    pub fn shr(&mut self, value: ValueId, count: ValueId) -> ValueId {
        debug_assert!(self.ty(count).is_int());
        let ty = self.ty(value);
        self.binary(Opcode::Shr, 0, value, count, ty)
    }

    pub fn sha(&mut self, value: ValueId, count: ValueId) -> ValueId {
        debug_assert!(self.ty(count).is_int());
        let ty = self.ty(value);
        self.binary(Opcode::Sha, 0, value, count, ty)
    }

    pub fn vector_shl(&mut self, value: ValueId, counts: ValueId, part: ValueType) -> ValueId {
        self.binary(Opcode::VectorShl, part as u16, value, counts, ValueType::V128)
    }

    pub fn vector_shr(&mut self, value: ValueId, counts: ValueId, part: ValueType) -> ValueId {
        self.binary(Opcode::VectorShr, part as u16, value, counts, ValueType::V128)
    }

    pub fn vector_sha(&mut self, value: ValueId, counts: ValueId, part: ValueType) -> ValueId {
        self.binary(Opcode::VectorSha, part as u16, value, counts, ValueType::V128)
    }

    pub fn rotate_left(&mut self, value: ValueId, count: ValueId) -> ValueId {
        debug_assert!(self.ty(count).is_int());
        let ty = self.ty(value);
        self.binary(Opcode::RotateLeft, 0, value, count, ty)
    }

    pub fn byte_swap(&mut self, value: ValueId) -> ValueId {
        let ty = self.ty(value);
        self.unary(Opcode::ByteSwap, 0, value, ty)
    }

    pub fn cntlz(&mut self, value: ValueId) -> ValueId {
        self.unary(Opcode::Cntlz, 0, value, ValueType::I8)
    }

    // Vector rearrangement.

    pub fn insert(&mut self, vec: ValueId, index: u64, part: ValueId) -> ValueId {
        debug_assert_eq!(self.ty(vec), ValueType::V128);
        let part_ty = self.ty(part);
        let dest = self.func.alloc_value(ValueType::V128);
        self.append(
            Opcode::Insert,
            part_ty as u16,
            Some(dest),
            [Operand::Value(vec), Operand::Offset(index), Operand::Value(part)],
        );
        dest
    }

    pub fn extract(&mut self, vec: ValueId, index: u64, ty: ValueType) -> ValueId {
        debug_assert_eq!(self.ty(vec), ValueType::V128);
        let dest = self.func.alloc_value(ty);
        self.append(
            Opcode::Extract,
            ty as u16,
            Some(dest),
            [Operand::Value(vec), Operand::Offset(index), Operand::None],
        );
        dest
    }

    pub fn splat(&mut self, scalar: ValueId) -> ValueId {
        let part = self.ty(scalar);
        debug_assert!(part.is_int() || part == ValueType::F32);
        self.unary(Opcode::Splat, part as u16, scalar, ValueType::V128)
    }

    pub fn permute(
        &mut self,
        control: ValueId,
        a: ValueId,
        b: ValueId,
        part: ValueType,
    ) -> ValueId {
        self.ternary(Opcode::Permute, part as u16, control, a, b, ValueType::V128)
    }

    pub fn swizzle(&mut self, value: ValueId, part: ValueType, mask: u32) -> ValueId {
        let dest = self.func.alloc_value(ValueType::V128);
        self.append(
            Opcode::Swizzle,
            part as u16,
            Some(dest),
            [Operand::Value(value), Operand::Offset(mask as u64), Operand::None],
        );
        dest
    }

    pub fn pack(&mut self, value: ValueId, kind: PackType) -> ValueId {
        self.unary(Opcode::Pack, kind as u16, value, ValueType::V128)
    }

    pub fn unpack(&mut self, value: ValueId, kind: PackType) -> ValueId {
        self.unary(Opcode::Unpack, kind as u16, value, ValueType::V128)
    }

    // Atomics.

    /// Atomic compare-and-swap at a host address; yields the prior value.
    pub fn compare_exchange(
        &mut self,
        address: ValueId,
        compare: ValueId,
        exchange: ValueId,
    ) -> ValueId {
        debug_assert_eq!(self.ty(address), ValueType::I64);
        debug_assert_eq!(self.ty(compare), self.ty(exchange));
        let ty = self.ty(compare);
        self.ternary(Opcode::CompareExchange, 0, address, compare, exchange, ty)
    }

    pub fn atomic_add(&mut self, address: ValueId, value: ValueId) -> ValueId {
        debug_assert_eq!(self.ty(address), ValueType::I64);
        let ty = self.ty(value);
        self.binary(Opcode::AtomicAdd, 0, address, value, ty)
    }

    pub fn atomic_sub(&mut self, address: ValueId, value: ValueId) -> ValueId {
        debug_assert_eq!(self.ty(address), ValueType::I64);
        let ty = self.ty(value);
        self.binary(Opcode::AtomicSub, 0, address, value, ty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_folds_trivial_constants() {
        let mut b = HirBuilder::new(0x8200_0000);
        let k = b.load_u32(0x1234);
        let wide = b.zero_extend(k, ValueType::I64);
        assert!(b.func().value(wide).is_constant());
        assert_eq!(b.func().value(wide).constant, ConstantValue::I64(0x1234));
        let narrow = b.truncate(wide, ValueType::I16);
        assert_eq!(b.func().value(narrow).constant, ConstantValue::I16(0x1234));
        let sum = b.add(k, k, 0);
        assert_eq!(b.func().value(sum).constant, ConstantValue::I32(0x2468));
    }

    #[test]
    fn branches_terminate_blocks() {
        let mut b = HirBuilder::new(0);
        let exit = b.new_label();
        let cond = b.load_constant(ConstantValue::I8(1));
        b.branch_true(cond, exit, 0);
        // Appending after the branch opens a fresh block.
        b.nop();
        b.mark_label(exit);
        b.return_();
        let func = b.finish();
        assert_eq!(func.block_order().len(), 3);
        func.validate().unwrap();
    }

    #[test]
    fn def_use_chains_stay_in_sync() {
        let mut b = HirBuilder::new(0);
        let x = b.load_context(0x10, ValueType::I64);
        let y = b.load_context(0x18, ValueType::I64);
        let sum = b.add(x, y, 0);
        b.store_context(0x20, sum);
        b.return_();
        let func = b.finish();
        func.validate().unwrap();
        assert_eq!(func.uses_of(sum).len(), 1);
        assert_eq!(func.uses_of(x).len(), 1);
        let def = func.value(sum).def.unwrap();
        assert_eq!(func.instr(def).opcode, Opcode::Add);
    }
}
