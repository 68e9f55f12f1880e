//! HIR values: typed SSA-ish results with def/use chains and an inline
//! constant payload.
//!
//! The constant payload doubles as the evaluator used by builder peepholes
//! and the constant-propagation pass. Its numeric behavior is the contract
//! the back end must match: shifts mask their count to the operand width,
//! divides swallow overflow and division by zero (quotient 0), and float
//! ops use IEEE-754 nearest-even.

use crate::hir::opcode::{Opcode, RoundMode};
use crate::vec128::Vec128;
use bitflags::bitflags;

/// Identifies a value within its function's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ValueId(pub u32);

/// Identifies an instruction within its function's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstrId(pub u32);

/// Identifies a use record within its function's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UseId(pub u32);

/// The closed set of HIR types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ValueType {
    I8 = 0,
    I16 = 1,
    I32 = 2,
    I64 = 3,
    F32 = 4,
    F64 = 5,
    V128 = 6,
}

impl ValueType {
    pub fn is_int(self) -> bool {
        (self as u8) <= ValueType::I64 as u8
    }

    pub fn is_float(self) -> bool {
        matches!(self, ValueType::F32 | ValueType::F64)
    }

    pub fn is_vec(self) -> bool {
        self == ValueType::V128
    }

    /// Width in bits for the integer types.
    pub fn bits(self) -> u32 {
        match self {
            ValueType::I8 => 8,
            ValueType::I16 => 16,
            ValueType::I32 => 32,
            ValueType::I64 => 64,
            ValueType::F32 => 32,
            ValueType::F64 => 64,
            ValueType::V128 => 128,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ValueType::I8 => "i8",
            ValueType::I16 => "i16",
            ValueType::I32 => "i32",
            ValueType::I64 => "i64",
            ValueType::F32 => "f32",
            ValueType::F64 => "f64",
            ValueType::V128 => "v128",
        }
    }

    pub fn from_part(bits: u16) -> ValueType {
        match bits & 0x7 {
            0 => ValueType::I8,
            1 => ValueType::I16,
            2 => ValueType::I32,
            3 => ValueType::I64,
            4 => ValueType::F32,
            5 => ValueType::F64,
            _ => ValueType::V128,
        }
    }
}

bitflags! {
    /// Per-value flags.
    pub struct ValueFlags: u32 {
        const CONSTANT  = 1 << 1;
        /// Set by the back end once a register has been assigned.
        const ALLOCATED = 1 << 2;
    }
}

/// Inline constant payload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConstantValue {
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    V128(Vec128),
}

impl ConstantValue {
    pub fn ty(&self) -> ValueType {
        match self {
            ConstantValue::I8(_) => ValueType::I8,
            ConstantValue::I16(_) => ValueType::I16,
            ConstantValue::I32(_) => ValueType::I32,
            ConstantValue::I64(_) => ValueType::I64,
            ConstantValue::F32(_) => ValueType::F32,
            ConstantValue::F64(_) => ValueType::F64,
            ConstantValue::V128(_) => ValueType::V128,
        }
    }

    pub fn zero(ty: ValueType) -> ConstantValue {
        match ty {
            ValueType::I8 => ConstantValue::I8(0),
            ValueType::I16 => ConstantValue::I16(0),
            ValueType::I32 => ConstantValue::I32(0),
            ValueType::I64 => ConstantValue::I64(0),
            ValueType::F32 => ConstantValue::F32(0.0),
            ValueType::F64 => ConstantValue::F64(0.0),
            ValueType::V128 => ConstantValue::V128(Vec128::ZERO),
        }
    }

    /// The payload widened to `u64` without sign extension. Vectors yield
    /// their low half.
    pub fn as_u64(&self) -> u64 {
        match *self {
            ConstantValue::I8(v) => v as u8 as u64,
            ConstantValue::I16(v) => v as u16 as u64,
            ConstantValue::I32(v) => v as u32 as u64,
            ConstantValue::I64(v) => v as u64,
            ConstantValue::F32(v) => v.to_bits() as u64,
            ConstantValue::F64(v) => v.to_bits(),
            ConstantValue::V128(v) => v.low(),
        }
    }

    /// The payload sign-extended to `i64`.
    pub fn as_i64(&self) -> i64 {
        match *self {
            ConstantValue::I8(v) => v as i64,
            ConstantValue::I16(v) => v as i64,
            ConstantValue::I32(v) => v as i64,
            ConstantValue::I64(v) => v,
            other => other.as_u64() as i64,
        }
    }

    pub fn as_vec128(&self) -> Vec128 {
        match *self {
            ConstantValue::V128(v) => v,
            other => {
                let mut v = Vec128::ZERO;
                v.set_u64(1, other.as_u64());
                v
            }
        }
    }

    pub fn from_u64(ty: ValueType, raw: u64) -> ConstantValue {
        match ty {
            ValueType::I8 => ConstantValue::I8(raw as i8),
            ValueType::I16 => ConstantValue::I16(raw as i16),
            ValueType::I32 => ConstantValue::I32(raw as i32),
            ValueType::I64 => ConstantValue::I64(raw as i64),
            ValueType::F32 => ConstantValue::F32(f32::from_bits(raw as u32)),
            ValueType::F64 => ConstantValue::F64(f64::from_bits(raw)),
            ValueType::V128 => {
                let mut v = Vec128::ZERO;
                v.set_u64(1, raw);
                ConstantValue::V128(v)
            }
        }
    }

    pub fn is_zero(&self) -> bool {
        match *self {
            ConstantValue::F32(v) => v == 0.0,
            ConstantValue::F64(v) => v == 0.0,
            ConstantValue::V128(v) => v.low() == 0 && v.high() == 0,
            other => other.as_u64() == 0,
        }
    }

    pub fn is_true(&self) -> bool {
        match *self {
            ConstantValue::V128(v) => v.low() != 0 || v.high() != 0,
            other => other.as_u64() != 0,
        }
    }

    // Conversions.

    pub fn zero_extend(&self, to: ValueType) -> ConstantValue {
        ConstantValue::from_u64(to, self.as_u64())
    }

    pub fn sign_extend(&self, to: ValueType) -> ConstantValue {
        ConstantValue::from_u64(to, self.as_i64() as u64)
    }

    pub fn truncate(&self, to: ValueType) -> ConstantValue {
        ConstantValue::from_u64(to, self.as_u64())
    }

    pub fn cast(&self, to: ValueType) -> ConstantValue {
        ConstantValue::from_u64(to, self.as_u64())
    }

    pub fn convert(&self, to: ValueType, round: RoundMode) -> ConstantValue {
        match (*self, to) {
            (ConstantValue::F32(v), ValueType::F64) => ConstantValue::F64(v as f64),
            (ConstantValue::F64(v), ValueType::F32) => ConstantValue::F32(v as f32),
            (ConstantValue::F64(v), ValueType::I32) => ConstantValue::I32(match round {
                RoundMode::ToZero => v as i32,
                RoundMode::ToNearest => v.round_ties_even() as i32,
            }),
            (ConstantValue::F64(v), ValueType::I64) => ConstantValue::I64(match round {
                RoundMode::ToZero => v as i64,
                RoundMode::ToNearest => v.round_ties_even() as i64,
            }),
            (ConstantValue::I32(v), ValueType::F32) => ConstantValue::F32(v as f32),
            (ConstantValue::I32(v), ValueType::F64) => ConstantValue::F64(v as f64),
            (ConstantValue::I64(v), ValueType::F64) => ConstantValue::F64(v as f64),
            (other, to) => ConstantValue::from_u64(to, other.as_u64()),
        }
    }

    // Integer and float arithmetic, matching the opcode contracts.

    pub fn add(&self, other: &ConstantValue) -> ConstantValue {
        match (*self, *other) {
            (ConstantValue::F32(a), ConstantValue::F32(b)) => ConstantValue::F32(a + b),
            (ConstantValue::F64(a), ConstantValue::F64(b)) => ConstantValue::F64(a + b),
            (a, b) => {
                ConstantValue::from_u64(a.ty(), a.as_u64().wrapping_add(b.as_u64()))
            }
        }
    }

    pub fn sub(&self, other: &ConstantValue) -> ConstantValue {
        match (*self, *other) {
            (ConstantValue::F32(a), ConstantValue::F32(b)) => ConstantValue::F32(a - b),
            (ConstantValue::F64(a), ConstantValue::F64(b)) => ConstantValue::F64(a - b),
            (a, b) => {
                ConstantValue::from_u64(a.ty(), a.as_u64().wrapping_sub(b.as_u64()))
            }
        }
    }

    pub fn mul(&self, other: &ConstantValue) -> ConstantValue {
        match (*self, *other) {
            (ConstantValue::F32(a), ConstantValue::F32(b)) => ConstantValue::F32(a * b),
            (ConstantValue::F64(a), ConstantValue::F64(b)) => ConstantValue::F64(a * b),
            (a, b) => {
                ConstantValue::from_u64(a.ty(), a.as_u64().wrapping_mul(b.as_u64()))
            }
        }
    }

    pub fn mul_hi(&self, other: &ConstantValue, unsigned: bool) -> ConstantValue {
        let ty = self.ty();
        let bits = ty.bits();
        let raw = if unsigned {
            let a = self.as_u64() as u128;
            let b = other.as_u64() as u128;
            ((a * b) >> bits) as u64
        } else {
            let a = self.as_i64() as i128;
            let b = other.as_i64() as i128;
            ((a * b) >> bits) as u64
        };
        ConstantValue::from_u64(ty, raw)
    }

    /// Integer division carries the hardware quirk: division by zero and
    /// `MIN / -1` both produce 0 rather than trapping.
    pub fn div(&self, other: &ConstantValue, unsigned: bool) -> ConstantValue {
        match (*self, *other) {
            (ConstantValue::F32(a), ConstantValue::F32(b)) => ConstantValue::F32(a / b),
            (ConstantValue::F64(a), ConstantValue::F64(b)) => ConstantValue::F64(a / b),
            (a, b) => {
                let ty = a.ty();
                let bits = ty.bits();
                let raw = if unsigned {
                    let mask = if bits == 64 { u64::MAX } else { (1 << bits) - 1 };
                    let a = a.as_u64() & mask;
                    let b = b.as_u64() & mask;
                    if b == 0 {
                        0
                    } else {
                        a / b
                    }
                } else {
                    let a = a.as_i64();
                    let b = b.as_i64();
                    let min = -1i64 << (bits - 1);
                    if b == 0 || (a == min && b == -1) {
                        0
                    } else {
                        (a / b) as u64
                    }
                };
                ConstantValue::from_u64(ty, raw)
            }
        }
    }

    pub fn rem(&self, other: &ConstantValue, unsigned: bool) -> ConstantValue {
        let ty = self.ty();
        let bits = ty.bits();
        let raw = if unsigned {
            let mask = if bits == 64 { u64::MAX } else { (1 << bits) - 1 };
            let a = self.as_u64() & mask;
            let b = other.as_u64() & mask;
            if b == 0 {
                0
            } else {
                a % b
            }
        } else {
            let a = self.as_i64();
            let b = other.as_i64();
            let min = -1i64 << (bits - 1);
            if b == 0 || (a == min && b == -1) {
                0
            } else {
                (a % b) as u64
            }
        };
        ConstantValue::from_u64(ty, raw)
    }

    pub fn neg(&self) -> ConstantValue {
        match *self {
            ConstantValue::F32(v) => ConstantValue::F32(-v),
            ConstantValue::F64(v) => ConstantValue::F64(-v),
            other => ConstantValue::from_u64(other.ty(), other.as_u64().wrapping_neg()),
        }
    }

    pub fn abs(&self) -> ConstantValue {
        match *self {
            ConstantValue::F32(v) => ConstantValue::F32(v.abs()),
            ConstantValue::F64(v) => ConstantValue::F64(v.abs()),
            other => {
                ConstantValue::from_u64(other.ty(), other.as_i64().wrapping_abs() as u64)
            }
        }
    }

    pub fn sqrt(&self) -> ConstantValue {
        match *self {
            ConstantValue::F32(v) => ConstantValue::F32(v.sqrt()),
            ConstantValue::F64(v) => ConstantValue::F64(v.sqrt()),
            other => other,
        }
    }

    pub fn rsqrt(&self) -> ConstantValue {
        match *self {
            ConstantValue::F32(v) => ConstantValue::F32(1.0 / v.sqrt()),
            ConstantValue::F64(v) => ConstantValue::F64(1.0 / v.sqrt()),
            other => other,
        }
    }

    pub fn and(&self, other: &ConstantValue) -> ConstantValue {
        ConstantValue::from_u64(self.ty(), self.as_u64() & other.as_u64())
    }

    pub fn or(&self, other: &ConstantValue) -> ConstantValue {
        ConstantValue::from_u64(self.ty(), self.as_u64() | other.as_u64())
    }

    pub fn xor(&self, other: &ConstantValue) -> ConstantValue {
        ConstantValue::from_u64(self.ty(), self.as_u64() ^ other.as_u64())
    }

    pub fn not(&self) -> ConstantValue {
        match *self {
            ConstantValue::V128(v) => {
                let mut out = Vec128::ZERO;
                out.set_u64(0, !v.u64(0));
                out.set_u64(1, !v.u64(1));
                ConstantValue::V128(out)
            }
            other => ConstantValue::from_u64(other.ty(), !other.as_u64()),
        }
    }

    /// Shift counts are masked to the operand width, matching the host
    /// behavior the back end relies on.
    pub fn shl(&self, count: &ConstantValue) -> ConstantValue {
        let bits = self.ty().bits();
        let count = count.as_u64() as u32 & (bits - 1);
        ConstantValue::from_u64(self.ty(), self.as_u64() << count)
    }

    pub fn shr(&self, count: &ConstantValue) -> ConstantValue {
        let bits = self.ty().bits();
        let count = count.as_u64() as u32 & (bits - 1);
        let mask = if bits == 64 { u64::MAX } else { (1 << bits) - 1 };
        ConstantValue::from_u64(self.ty(), (self.as_u64() & mask) >> count)
    }

    pub fn sha(&self, count: &ConstantValue) -> ConstantValue {
        let bits = self.ty().bits();
        let count = count.as_u64() as u32 & (bits - 1);
        ConstantValue::from_u64(self.ty(), (self.as_i64() >> count) as u64)
    }

    pub fn rotate_left(&self, count: &ConstantValue) -> ConstantValue {
        let ty = self.ty();
        let raw = match ty {
            ValueType::I8 => (self.as_u64() as u8).rotate_left(count.as_u64() as u32) as u64,
            ValueType::I16 => (self.as_u64() as u16).rotate_left(count.as_u64() as u32) as u64,
            ValueType::I32 => (self.as_u64() as u32).rotate_left(count.as_u64() as u32) as u64,
            _ => self.as_u64().rotate_left(count.as_u64() as u32),
        };
        ConstantValue::from_u64(ty, raw)
    }

    pub fn byte_swap(&self) -> ConstantValue {
        if let ConstantValue::V128(v) = *self {
            // Whole-vector byte reversal, matching the lvx/stvx endian fix.
            let mut bytes = *v.as_bytes();
            bytes.reverse();
            return ConstantValue::V128(Vec128::from_bytes(bytes));
        }
        let ty = self.ty();
        let raw = match ty {
            ValueType::I8 => self.as_u64(),
            ValueType::I16 => (self.as_u64() as u16).swap_bytes() as u64,
            ValueType::I32 | ValueType::F32 => (self.as_u64() as u32).swap_bytes() as u64,
            _ => self.as_u64().swap_bytes(),
        };
        ConstantValue::from_u64(ty, raw)
    }

    pub fn cntlz(&self) -> ConstantValue {
        let bits = self.ty().bits();
        let value = self.as_u64();
        let zeros = if value == 0 {
            bits
        } else {
            value.leading_zeros() - (64 - bits)
        };
        ConstantValue::I8(zeros as i8)
    }

    pub fn min(&self, other: &ConstantValue) -> ConstantValue {
        match (*self, *other) {
            (ConstantValue::F32(a), ConstantValue::F32(b)) => ConstantValue::F32(a.min(b)),
            (ConstantValue::F64(a), ConstantValue::F64(b)) => ConstantValue::F64(a.min(b)),
            (a, b) => {
                if a.as_i64() <= b.as_i64() {
                    a
                } else {
                    b
                }
            }
        }
    }

    pub fn max(&self, other: &ConstantValue) -> ConstantValue {
        match (*self, *other) {
            (ConstantValue::F32(a), ConstantValue::F32(b)) => ConstantValue::F32(a.max(b)),
            (ConstantValue::F64(a), ConstantValue::F64(b)) => ConstantValue::F64(a.max(b)),
            (a, b) => {
                if a.as_i64() >= b.as_i64() {
                    a
                } else {
                    b
                }
            }
        }
    }

    /// Evaluates a scalar comparison opcode. Any NaN operand makes the
    /// ordered float comparisons false.
    pub fn compare(&self, opcode: Opcode, other: &ConstantValue) -> bool {
        if let (ConstantValue::F64(a), ConstantValue::F64(b)) = (*self, *other) {
            return match opcode {
                Opcode::CompareEq => a == b,
                Opcode::CompareNe => a != b,
                Opcode::CompareSlt | Opcode::CompareUlt => a < b,
                Opcode::CompareSle | Opcode::CompareUle => a <= b,
                Opcode::CompareSgt | Opcode::CompareUgt => a > b,
                Opcode::CompareSge | Opcode::CompareUge => a >= b,
                _ => unreachable!("not a comparison: {}", opcode.name()),
            };
        }
        if let (ConstantValue::F32(a), ConstantValue::F32(b)) = (*self, *other) {
            return ConstantValue::F64(a as f64).compare(opcode, &ConstantValue::F64(b as f64));
        }
        let bits = self.ty().bits();
        let mask = if bits == 64 { u64::MAX } else { (1 << bits) - 1 };
        let (ua, ub) = (self.as_u64() & mask, other.as_u64() & mask);
        let (sa, sb) = (self.as_i64(), other.as_i64());
        match opcode {
            Opcode::CompareEq => ua == ub,
            Opcode::CompareNe => ua != ub,
            Opcode::CompareSlt => sa < sb,
            Opcode::CompareSle => sa <= sb,
            Opcode::CompareSgt => sa > sb,
            Opcode::CompareSge => sa >= sb,
            Opcode::CompareUlt => ua < ub,
            Opcode::CompareUle => ua <= ub,
            Opcode::CompareUgt => ua > ub,
            Opcode::CompareUge => ua >= ub,
            _ => unreachable!("not a comparison: {}", opcode.name()),
        }
    }
}

/// A use record: one consuming operand slot of one instruction, linked into
/// the producing value's use list.
#[derive(Debug, Clone, Copy)]
pub struct Use {
    pub instr: InstrId,
    pub slot: u8,
    pub prev: Option<UseId>,
    pub next: Option<UseId>,
}

/// One HIR value.
#[derive(Debug, Clone)]
pub struct Value {
    /// Dense within the function after finalization.
    pub ordinal: u32,
    pub ty: ValueType,
    pub flags: ValueFlags,
    /// Register (or spill slot) cooked up by the back end.
    pub reg: u16,
    pub constant: ConstantValue,
    pub def: Option<InstrId>,
    pub use_head: Option<UseId>,
}

impl Value {
    pub fn new(ordinal: u32, ty: ValueType) -> Self {
        Self {
            ordinal,
            ty,
            flags: ValueFlags::empty(),
            reg: u16::MAX,
            constant: ConstantValue::zero(ty),
            def: None,
            use_head: None,
        }
    }

    #[inline]
    pub fn is_constant(&self) -> bool {
        self.flags.contains(ValueFlags::CONSTANT)
    }

    pub fn set_constant(&mut self, constant: ConstantValue) {
        debug_assert_eq!(constant.ty(), self.ty);
        self.constant = constant;
        self.flags |= ValueFlags::CONSTANT;
        self.def = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn divide_overflow_quirk() {
        // i8 MIN / -1 is the hardware-overflow case: quotient 0.
        let min = ConstantValue::I8(i8::MIN);
        let neg1 = ConstantValue::I8(-1);
        assert_eq!(min.div(&neg1, false), ConstantValue::I8(0));
        // And the ordinary case still divides.
        let a = ConstantValue::I8(30);
        let b = ConstantValue::I8(7);
        assert_eq!(a.div(&b, false), ConstantValue::I8(4));
        // All wider widths share the rule.
        assert_eq!(
            ConstantValue::I16(i16::MIN).div(&ConstantValue::I16(-1), false),
            ConstantValue::I16(0)
        );
        assert_eq!(
            ConstantValue::I32(i32::MIN).div(&ConstantValue::I32(-1), false),
            ConstantValue::I32(0)
        );
        assert_eq!(
            ConstantValue::I64(i64::MIN).div(&ConstantValue::I64(-1), false),
            ConstantValue::I64(0)
        );
        // Division by zero also yields 0, signed or not.
        assert_eq!(
            ConstantValue::I32(1234).div(&ConstantValue::I32(0), false),
            ConstantValue::I32(0)
        );
        assert_eq!(
            ConstantValue::I32(1234).div(&ConstantValue::I32(0), true),
            ConstantValue::I32(0)
        );
    }

    #[test]
    fn arithmetic_shift_right() {
        let v = ConstantValue::I8(0xF0u8 as i8);
        assert_eq!(v.sha(&ConstantValue::I8(4)), ConstantValue::I8(0xFFu8 as i8));
        let v = ConstantValue::I8(0x7F);
        assert_eq!(v.sha(&ConstantValue::I8(7)), ConstantValue::I8(0));
        // A 64-bit shift of 64 masks to 0 and leaves the value unchanged.
        let v = ConstantValue::I64(i64::MIN);
        assert_eq!(v.sha(&ConstantValue::I64(64)), ConstantValue::I64(i64::MIN));
    }

    #[test]
    fn byte_swap_involution() {
        let v = ConstantValue::I32(0x1122_3344);
        assert_eq!(v.byte_swap(), ConstantValue::I32(0x4433_2211));
        assert_eq!(v.byte_swap().byte_swap(), v);
    }

    #[test]
    fn cntlz_counts_within_width() {
        assert_eq!(ConstantValue::I32(1).cntlz(), ConstantValue::I8(31));
        assert_eq!(ConstantValue::I32(0).cntlz(), ConstantValue::I8(32));
        assert_eq!(ConstantValue::I16(0x8000u16 as i16).cntlz(), ConstantValue::I8(0));
    }

    #[test]
    fn unsigned_compare_masks_width() {
        let a = ConstantValue::I8(-1); // 0xFF
        let b = ConstantValue::I8(1);
        assert!(a.compare(Opcode::CompareUgt, &b));
        assert!(a.compare(Opcode::CompareSlt, &b));
    }
}
