//! Integer arithmetic, logical, shift and rotate translators.

use crate::error::Error;
use crate::hir::{ConstantValue, ValueId, ValueType};
use crate::ppc::instr::PpcInstr;
use crate::ppc::translate::FunctionTranslator;

type T<'a, 'b> = &'a mut FunctionTranslator<'b>;

/// PPC mask generation: bits `mb..me` inclusive in big-endian numbering
/// over 32 bits, wrapping when `mb > me`.
pub fn mask32(mb: u32, me: u32) -> u32 {
    let x = 0xFFFF_FFFFu32 >> mb;
    let y = 0xFFFF_FFFFu32 << (31 - me);
    if mb <= me {
        x & y
    } else {
        x | y
    }
}

/// 64-bit variant over `mb..63` / `0..me`.
pub fn mask64(mb: u32, me: u32) -> u64 {
    let x = u64::MAX >> mb;
    let y = u64::MAX << (63 - me);
    if mb <= me {
        x & y
    } else {
        x | y
    }
}

fn store_with_rc(t: T, reg: usize, value: ValueId, rc: bool) {
    t.store_gpr(reg, value);
    if rc {
        t.update_cr0(value);
    }
}

/// `a + b` with the unsigned carry-out as an i8.
fn add_carry_out(t: T, a: ValueId, b: ValueId) -> (ValueId, ValueId) {
    let sum = t.builder.add(a, b, 0);
    let carry = t.builder.compare_ult(sum, a);
    (sum, carry)
}

/// `a + b + carry_in` with the combined carry-out.
fn add_extended(t: T, a: ValueId, b: ValueId, carry_in: ValueId) -> (ValueId, ValueId) {
    let (partial, c1) = add_carry_out(t, a, b);
    let wide_carry = t.builder.zero_extend(carry_in, ValueType::I64);
    let (sum, c2) = add_carry_out(t, partial, wide_carry);
    let carry = t.builder.or(c1, c2);
    (sum, carry)
}

// D-form arithmetic.

pub fn addi(t: T, i: PpcInstr) -> Result<(), Error> {
    let imm = t.builder.load_constant(ConstantValue::I64(i.simm() as i64));
    let value = if i.ra() == 0 {
        imm
    } else {
        let base = t.load_gpr(i.ra());
        t.builder.add(base, imm, 0)
    };
    t.store_gpr(i.rd(), value);
    Ok(())
}

pub fn addis(t: T, i: PpcInstr) -> Result<(), Error> {
    let imm = t
        .builder
        .load_constant(ConstantValue::I64((i.simm() as i64) << 16));
    let value = if i.ra() == 0 {
        imm
    } else {
        let base = t.load_gpr(i.ra());
        t.builder.add(base, imm, 0)
    };
    t.store_gpr(i.rd(), value);
    Ok(())
}

fn addic_common(t: T, i: PpcInstr, rc: bool) -> Result<(), Error> {
    let a = t.load_gpr(i.ra());
    let imm = t.builder.load_constant(ConstantValue::I64(i.simm() as i64));
    let (sum, carry) = add_carry_out(t, a, imm);
    t.store_xer_ca(carry);
    store_with_rc(t, i.rd(), sum, rc);
    Ok(())
}

pub fn addic(t: T, i: PpcInstr) -> Result<(), Error> {
    addic_common(t, i, false)
}

pub fn addic_rc(t: T, i: PpcInstr) -> Result<(), Error> {
    addic_common(t, i, true)
}

pub fn subfic(t: T, i: PpcInstr) -> Result<(), Error> {
    let a = t.load_gpr(i.ra());
    let imm = t.builder.load_constant(ConstantValue::I64(i.simm() as i64));
    let value = t.builder.sub(imm, a, 0);
    // CA is the no-borrow condition of imm - rA.
    let carry = t.builder.compare_uge(imm, a);
    t.store_xer_ca(carry);
    t.store_gpr(i.rd(), value);
    Ok(())
}

pub fn mulli(t: T, i: PpcInstr) -> Result<(), Error> {
    let a = t.load_gpr(i.ra());
    let imm = t.builder.load_constant(ConstantValue::I64(i.simm() as i64));
    let value = t.builder.mul(a, imm);
    t.store_gpr(i.rd(), value);
    Ok(())
}

pub fn cmpi(t: T, i: PpcInstr) -> Result<(), Error> {
    let (a, b) = if i.cmp_l() {
        let a = t.load_gpr(i.ra());
        let b = t.builder.load_constant(ConstantValue::I64(i.simm() as i64));
        (a, b)
    } else {
        let a = t.load_gpr32(i.ra());
        let b = t.builder.load_constant(ConstantValue::I32(i.simm() as i32));
        (a, b)
    };
    t.update_cr_cmp(i.crfd(), a, b, true);
    Ok(())
}

pub fn cmpli(t: T, i: PpcInstr) -> Result<(), Error> {
    let (a, b) = if i.cmp_l() {
        let a = t.load_gpr(i.ra());
        let b = t
            .builder
            .load_constant(ConstantValue::I64(i.uimm() as i64));
        (a, b)
    } else {
        let a = t.load_gpr32(i.ra());
        let b = t
            .builder
            .load_constant(ConstantValue::I32(i.uimm() as i32));
        (a, b)
    };
    t.update_cr_cmp(i.crfd(), a, b, false);
    Ok(())
}

// D-form logical. These write rA from rS.

fn logical_imm(
    t: T,
    i: PpcInstr,
    imm: u64,
    op: fn(&mut FunctionTranslator, ValueId, ValueId) -> ValueId,
    rc: bool,
) {
    let s = t.load_gpr(i.rs());
    let imm = t.builder.load_constant(ConstantValue::I64(imm as i64));
    let value = op(t, s, imm);
    store_with_rc(t, i.ra(), value, rc);
}

pub fn ori(t: T, i: PpcInstr) -> Result<(), Error> {
    logical_imm(t, i, i.uimm() as u64, |t, a, b| t.builder.or(a, b), false);
    Ok(())
}

pub fn oris(t: T, i: PpcInstr) -> Result<(), Error> {
    logical_imm(
        t,
        i,
        (i.uimm() as u64) << 16,
        |t, a, b| t.builder.or(a, b),
        false,
    );
    Ok(())
}

pub fn xori(t: T, i: PpcInstr) -> Result<(), Error> {
    logical_imm(t, i, i.uimm() as u64, |t, a, b| t.builder.xor(a, b), false);
    Ok(())
}

pub fn xoris(t: T, i: PpcInstr) -> Result<(), Error> {
    logical_imm(
        t,
        i,
        (i.uimm() as u64) << 16,
        |t, a, b| t.builder.xor(a, b),
        false,
    );
    Ok(())
}

pub fn andi_rc(t: T, i: PpcInstr) -> Result<(), Error> {
    logical_imm(t, i, i.uimm() as u64, |t, a, b| t.builder.and(a, b), true);
    Ok(())
}

pub fn andis_rc(t: T, i: PpcInstr) -> Result<(), Error> {
    logical_imm(
        t,
        i,
        (i.uimm() as u64) << 16,
        |t, a, b| t.builder.and(a, b),
        true,
    );
    Ok(())
}

// XO-form arithmetic.

pub fn add(t: T, i: PpcInstr) -> Result<(), Error> {
    let a = t.load_gpr(i.ra());
    let b = t.load_gpr(i.rb());
    let value = t.builder.add(a, b, 0);
    store_with_rc(t, i.rd(), value, i.rc());
    Ok(())
}

pub fn addc(t: T, i: PpcInstr) -> Result<(), Error> {
    let a = t.load_gpr(i.ra());
    let b = t.load_gpr(i.rb());
    let (sum, carry) = add_carry_out(t, a, b);
    t.store_xer_ca(carry);
    store_with_rc(t, i.rd(), sum, i.rc());
    Ok(())
}

pub fn adde(t: T, i: PpcInstr) -> Result<(), Error> {
    let a = t.load_gpr(i.ra());
    let b = t.load_gpr(i.rb());
    let ca = t.load_xer_ca();
    let (sum, carry) = add_extended(t, a, b, ca);
    t.store_xer_ca(carry);
    store_with_rc(t, i.rd(), sum, i.rc());
    Ok(())
}

pub fn addze(t: T, i: PpcInstr) -> Result<(), Error> {
    let a = t.load_gpr(i.ra());
    let ca = t.load_xer_ca();
    let wide = t.builder.zero_extend(ca, ValueType::I64);
    let (sum, carry) = add_carry_out(t, a, wide);
    t.store_xer_ca(carry);
    store_with_rc(t, i.rd(), sum, i.rc());
    Ok(())
}

pub fn addme(t: T, i: PpcInstr) -> Result<(), Error> {
    let a = t.load_gpr(i.ra());
    let minus_one = t.builder.load_constant(ConstantValue::I64(-1));
    let ca = t.load_xer_ca();
    let (sum, carry) = add_extended(t, a, minus_one, ca);
    t.store_xer_ca(carry);
    store_with_rc(t, i.rd(), sum, i.rc());
    Ok(())
}

pub fn subf(t: T, i: PpcInstr) -> Result<(), Error> {
    let a = t.load_gpr(i.ra());
    let b = t.load_gpr(i.rb());
    let value = t.builder.sub(b, a, 0);
    store_with_rc(t, i.rd(), value, i.rc());
    Ok(())
}

pub fn subfc(t: T, i: PpcInstr) -> Result<(), Error> {
    let a = t.load_gpr(i.ra());
    let b = t.load_gpr(i.rb());
    let value = t.builder.sub(b, a, 0);
    let carry = t.builder.compare_uge(b, a);
    t.store_xer_ca(carry);
    store_with_rc(t, i.rd(), value, i.rc());
    Ok(())
}

pub fn subfe(t: T, i: PpcInstr) -> Result<(), Error> {
    // rD = ~rA + rB + CA.
    let a = t.load_gpr(i.ra());
    let not_a = t.builder.not(a);
    let b = t.load_gpr(i.rb());
    let ca = t.load_xer_ca();
    let (sum, carry) = add_extended(t, not_a, b, ca);
    t.store_xer_ca(carry);
    store_with_rc(t, i.rd(), sum, i.rc());
    Ok(())
}

pub fn subfze(t: T, i: PpcInstr) -> Result<(), Error> {
    let a = t.load_gpr(i.ra());
    let not_a = t.builder.not(a);
    let ca = t.load_xer_ca();
    let wide = t.builder.zero_extend(ca, ValueType::I64);
    let (sum, carry) = add_carry_out(t, not_a, wide);
    t.store_xer_ca(carry);
    store_with_rc(t, i.rd(), sum, i.rc());
    Ok(())
}

pub fn subfme(t: T, i: PpcInstr) -> Result<(), Error> {
    let a = t.load_gpr(i.ra());
    let not_a = t.builder.not(a);
    let minus_one = t.builder.load_constant(ConstantValue::I64(-1));
    let ca = t.load_xer_ca();
    let (sum, carry) = add_extended(t, not_a, minus_one, ca);
    t.store_xer_ca(carry);
    store_with_rc(t, i.rd(), sum, i.rc());
    Ok(())
}

pub fn neg(t: T, i: PpcInstr) -> Result<(), Error> {
    let a = t.load_gpr(i.ra());
    let value = t.builder.neg(a);
    store_with_rc(t, i.rd(), value, i.rc());
    Ok(())
}

pub fn mullw(t: T, i: PpcInstr) -> Result<(), Error> {
    let a32 = t.load_gpr32(i.ra());
    let b32 = t.load_gpr32(i.rb());
    let a = t.builder.sign_extend(a32, ValueType::I64);
    let b = t.builder.sign_extend(b32, ValueType::I64);
    let value = t.builder.mul(a, b);
    store_with_rc(t, i.rd(), value, i.rc());
    Ok(())
}

pub fn mulld(t: T, i: PpcInstr) -> Result<(), Error> {
    let a = t.load_gpr(i.ra());
    let b = t.load_gpr(i.rb());
    let value = t.builder.mul(a, b);
    store_with_rc(t, i.rd(), value, i.rc());
    Ok(())
}

fn mulhw_common(t: T, i: PpcInstr, unsigned: bool) -> Result<(), Error> {
    let a = t.load_gpr32(i.ra());
    let b = t.load_gpr32(i.rb());
    let hi = t.builder.mul_hi(a, b, unsigned);
    let value = if unsigned {
        t.builder.zero_extend(hi, ValueType::I64)
    } else {
        t.builder.sign_extend(hi, ValueType::I64)
    };
    store_with_rc(t, i.rd(), value, i.rc());
    Ok(())
}

pub fn mulhw(t: T, i: PpcInstr) -> Result<(), Error> {
    mulhw_common(t, i, false)
}

pub fn mulhwu(t: T, i: PpcInstr) -> Result<(), Error> {
    mulhw_common(t, i, true)
}

fn mulhd_common(t: T, i: PpcInstr, unsigned: bool) -> Result<(), Error> {
    let a = t.load_gpr(i.ra());
    let b = t.load_gpr(i.rb());
    let value = t.builder.mul_hi(a, b, unsigned);
    store_with_rc(t, i.rd(), value, i.rc());
    Ok(())
}

pub fn mulhd(t: T, i: PpcInstr) -> Result<(), Error> {
    mulhd_common(t, i, false)
}

pub fn mulhdu(t: T, i: PpcInstr) -> Result<(), Error> {
    mulhd_common(t, i, true)
}

fn divw_common(t: T, i: PpcInstr, unsigned: bool) -> Result<(), Error> {
    let a = t.load_gpr32(i.ra());
    let b = t.load_gpr32(i.rb());
    let q = t.builder.div(a, b, unsigned);
    let value = t.builder.zero_extend(q, ValueType::I64);
    store_with_rc(t, i.rd(), value, i.rc());
    Ok(())
}

pub fn divw(t: T, i: PpcInstr) -> Result<(), Error> {
    divw_common(t, i, false)
}

pub fn divwu(t: T, i: PpcInstr) -> Result<(), Error> {
    divw_common(t, i, true)
}

fn divd_common(t: T, i: PpcInstr, unsigned: bool) -> Result<(), Error> {
    let a = t.load_gpr(i.ra());
    let b = t.load_gpr(i.rb());
    let value = t.builder.div(a, b, unsigned);
    store_with_rc(t, i.rd(), value, i.rc());
    Ok(())
}

pub fn divd(t: T, i: PpcInstr) -> Result<(), Error> {
    divd_common(t, i, false)
}

pub fn divdu(t: T, i: PpcInstr) -> Result<(), Error> {
    divd_common(t, i, true)
}

pub fn cmp(t: T, i: PpcInstr) -> Result<(), Error> {
    let (a, b) = if i.cmp_l() {
        (t.load_gpr(i.ra()), t.load_gpr(i.rb()))
    } else {
        (t.load_gpr32(i.ra()), t.load_gpr32(i.rb()))
    };
    t.update_cr_cmp(i.crfd(), a, b, true);
    Ok(())
}

pub fn cmpl(t: T, i: PpcInstr) -> Result<(), Error> {
    let (a, b) = if i.cmp_l() {
        (t.load_gpr(i.ra()), t.load_gpr(i.rb()))
    } else {
        (t.load_gpr32(i.ra()), t.load_gpr32(i.rb()))
    };
    t.update_cr_cmp(i.crfd(), a, b, false);
    Ok(())
}

// X-form logical, rA <- op(rS, rB).

fn logical_x(
    t: T,
    i: PpcInstr,
    op: fn(&mut FunctionTranslator, ValueId, ValueId) -> ValueId,
) -> Result<(), Error> {
    let s = t.load_gpr(i.rs());
    let b = t.load_gpr(i.rb());
    let value = op(t, s, b);
    store_with_rc(t, i.ra(), value, i.rc());
    Ok(())
}

pub fn and(t: T, i: PpcInstr) -> Result<(), Error> {
    logical_x(t, i, |t, a, b| t.builder.and(a, b))
}

pub fn andc(t: T, i: PpcInstr) -> Result<(), Error> {
    logical_x(t, i, |t, a, b| {
        let nb = t.builder.not(b);
        t.builder.and(a, nb)
    })
}

pub fn or(t: T, i: PpcInstr) -> Result<(), Error> {
    logical_x(t, i, |t, a, b| t.builder.or(a, b))
}

pub fn orc(t: T, i: PpcInstr) -> Result<(), Error> {
    logical_x(t, i, |t, a, b| {
        let nb = t.builder.not(b);
        t.builder.or(a, nb)
    })
}

pub fn xor(t: T, i: PpcInstr) -> Result<(), Error> {
    logical_x(t, i, |t, a, b| t.builder.xor(a, b))
}

pub fn nand(t: T, i: PpcInstr) -> Result<(), Error> {
    logical_x(t, i, |t, a, b| {
        let v = t.builder.and(a, b);
        t.builder.not(v)
    })
}

pub fn nor(t: T, i: PpcInstr) -> Result<(), Error> {
    logical_x(t, i, |t, a, b| {
        let v = t.builder.or(a, b);
        t.builder.not(v)
    })
}

pub fn eqv(t: T, i: PpcInstr) -> Result<(), Error> {
    logical_x(t, i, |t, a, b| {
        let v = t.builder.xor(a, b);
        t.builder.not(v)
    })
}

pub fn extsb(t: T, i: PpcInstr) -> Result<(), Error> {
    let s = t.load_gpr(i.rs());
    let narrow = t.builder.truncate(s, ValueType::I8);
    let value = t.builder.sign_extend(narrow, ValueType::I64);
    store_with_rc(t, i.ra(), value, i.rc());
    Ok(())
}

pub fn extsh(t: T, i: PpcInstr) -> Result<(), Error> {
    let s = t.load_gpr(i.rs());
    let narrow = t.builder.truncate(s, ValueType::I16);
    let value = t.builder.sign_extend(narrow, ValueType::I64);
    store_with_rc(t, i.ra(), value, i.rc());
    Ok(())
}

pub fn extsw(t: T, i: PpcInstr) -> Result<(), Error> {
    let s = t.load_gpr(i.rs());
    let narrow = t.builder.truncate(s, ValueType::I32);
    let value = t.builder.sign_extend(narrow, ValueType::I64);
    store_with_rc(t, i.ra(), value, i.rc());
    Ok(())
}

pub fn cntlzw(t: T, i: PpcInstr) -> Result<(), Error> {
    let s = t.load_gpr32(i.rs());
    let zeros = t.builder.cntlz(s);
    let value = t.builder.zero_extend(zeros, ValueType::I64);
    store_with_rc(t, i.ra(), value, i.rc());
    Ok(())
}

pub fn cntlzd(t: T, i: PpcInstr) -> Result<(), Error> {
    let s = t.load_gpr(i.rs());
    let zeros = t.builder.cntlz(s);
    let value = t.builder.zero_extend(zeros, ValueType::I64);
    store_with_rc(t, i.ra(), value, i.rc());
    Ok(())
}

// Shifts.

pub fn slw(t: T, i: PpcInstr) -> Result<(), Error> {
    let s = t.load_gpr(i.rs());
    let mask = t.builder.load_u64(0xFFFF_FFFF);
    let x = t.builder.and(s, mask);
    let b = t.load_gpr(i.rb());
    let six = t.builder.load_u64(0x3F);
    let n = t.builder.and(b, six);
    let shifted = t.builder.shl(x, n);
    let narrow = t.builder.truncate(shifted, ValueType::I32);
    let value = t.builder.zero_extend(narrow, ValueType::I64);
    store_with_rc(t, i.ra(), value, i.rc());
    Ok(())
}

pub fn srw(t: T, i: PpcInstr) -> Result<(), Error> {
    let s = t.load_gpr(i.rs());
    let mask = t.builder.load_u64(0xFFFF_FFFF);
    let x = t.builder.and(s, mask);
    let b = t.load_gpr(i.rb());
    let six = t.builder.load_u64(0x3F);
    let n = t.builder.and(b, six);
    let value = t.builder.shr(x, n);
    store_with_rc(t, i.ra(), value, i.rc());
    Ok(())
}

fn shift64(t: T, i: PpcInstr, left: bool) -> Result<(), Error> {
    let x = t.load_gpr(i.rs());
    let b = t.load_gpr(i.rb());
    let seven_bits = t.builder.load_u64(0x7F);
    let n = t.builder.and(b, seven_bits);
    let shifted = if left {
        t.builder.shl(x, n)
    } else {
        t.builder.shr(x, n)
    };
    // Counts of 64..127 clear the result; the host shift would wrap.
    let limit = t.builder.load_u64(64);
    let oversize = t.builder.compare_uge(n, limit);
    let zero = t.builder.load_zero(ValueType::I64);
    let value = t.builder.select(oversize, zero, shifted);
    store_with_rc(t, i.ra(), value, i.rc());
    Ok(())
}

pub fn sld(t: T, i: PpcInstr) -> Result<(), Error> {
    shift64(t, i, true)
}

pub fn srd(t: T, i: PpcInstr) -> Result<(), Error> {
    shift64(t, i, false)
}

pub fn srawi(t: T, i: PpcInstr) -> Result<(), Error> {
    let s = t.load_gpr32(i.rs());
    let sh = i.sh();
    let count = t.builder.load_constant(ConstantValue::I8(sh as i8));
    let shifted = t.builder.sha(s, count);
    let value = t.builder.sign_extend(shifted, ValueType::I64);
    // CA: negative input with any one bit shifted out.
    let zero32 = t.builder.load_zero(ValueType::I32);
    let negative = t.builder.compare_slt(s, zero32);
    let out_mask = t
        .builder
        .load_constant(ConstantValue::I32(((1u64 << sh) - 1) as i32));
    let out_bits = t.builder.and(s, out_mask);
    let lost = t.builder.compare_ne(out_bits, zero32);
    let carry = t.builder.and(negative, lost);
    t.store_xer_ca(carry);
    store_with_rc(t, i.ra(), value, i.rc());
    Ok(())
}

pub fn sraw(t: T, i: PpcInstr) -> Result<(), Error> {
    let s32 = t.load_gpr32(i.rs());
    let x = t.builder.sign_extend(s32, ValueType::I64);
    let b = t.load_gpr(i.rb());
    let six = t.builder.load_u64(0x3F);
    let n = t.builder.and(b, six);
    let shifted = t.builder.sha(x, n);
    let narrow = t.builder.truncate(shifted, ValueType::I32);
    let value = t.builder.sign_extend(narrow, ValueType::I64);
    // CA: negative input and at least one 1 shifted out.
    let zero = t.builder.load_zero(ValueType::I64);
    let negative = t.builder.compare_slt(x, zero);
    let one = t.builder.load_u64(1);
    let bit_count = t.builder.shl(one, n);
    let out_mask = t.builder.sub(bit_count, one, 0);
    let out_bits = t.builder.and(x, out_mask);
    let lost = t.builder.compare_ne(out_bits, zero);
    let carry = t.builder.and(negative, lost);
    t.store_xer_ca(carry);
    store_with_rc(t, i.ra(), value, i.rc());
    Ok(())
}

pub fn srad(t: T, i: PpcInstr) -> Result<(), Error> {
    let x = t.load_gpr(i.rs());
    let b = t.load_gpr(i.rb());
    let seven_bits = t.builder.load_u64(0x7F);
    let n = t.builder.and(b, seven_bits);
    // Oversize counts saturate to a full sign fill.
    let limit = t.builder.load_u64(63);
    let clamped = t.builder.min(n, limit);
    let value = t.builder.sha(x, clamped);
    let zero = t.builder.load_zero(ValueType::I64);
    let negative = t.builder.compare_slt(x, zero);
    let one = t.builder.load_u64(1);
    let bit_count = t.builder.shl(one, clamped);
    let out_mask = t.builder.sub(bit_count, one, 0);
    let out_bits = t.builder.and(x, out_mask);
    let lost = t.builder.compare_ne(out_bits, zero);
    let carry = t.builder.and(negative, lost);
    t.store_xer_ca(carry);
    store_with_rc(t, i.ra(), value, i.rc());
    Ok(())
}

pub fn sradi(t: T, i: PpcInstr) -> Result<(), Error> {
    let x = t.load_gpr(i.rs());
    let sh = i.sh6();
    let count = t.builder.load_constant(ConstantValue::I8(sh as i8));
    let value = t.builder.sha(x, count);
    let zero = t.builder.load_zero(ValueType::I64);
    let negative = t.builder.compare_slt(x, zero);
    let out_mask = t
        .builder
        .load_constant(ConstantValue::I64(((1u128 << sh) - 1) as u64 as i64));
    let out_bits = t.builder.and(x, out_mask);
    let lost = t.builder.compare_ne(out_bits, zero);
    let carry = t.builder.and(negative, lost);
    t.store_xer_ca(carry);
    store_with_rc(t, i.ra(), value, i.rc());
    Ok(())
}

// Rotates.

fn rotl32_value(t: T, x: ValueId, sh: ValueId) -> ValueId {
    t.builder.rotate_left(x, sh)
}

pub fn rlwinm(t: T, i: PpcInstr) -> Result<(), Error> {
    let s = t.load_gpr32(i.rs());
    let sh = t.builder.load_constant(ConstantValue::I8(i.sh() as i8));
    let rotated = rotl32_value(t, s, sh);
    let mask = t
        .builder
        .load_constant(ConstantValue::I32(mask32(i.mb(), i.me()) as i32));
    let masked = t.builder.and(rotated, mask);
    let value = t.builder.zero_extend(masked, ValueType::I64);
    store_with_rc(t, i.ra(), value, i.rc());
    Ok(())
}

pub fn rlwimi(t: T, i: PpcInstr) -> Result<(), Error> {
    let mask = mask32(i.mb(), i.me());
    let s = t.load_gpr32(i.rs());
    let sh = t.builder.load_constant(ConstantValue::I8(i.sh() as i8));
    let rotated = rotl32_value(t, s, sh);
    let keep_mask = t.builder.load_constant(ConstantValue::I32(mask as i32));
    let inserted = t.builder.and(rotated, keep_mask);
    let old = t.load_gpr32(i.ra());
    let hole_mask = t.builder.load_constant(ConstantValue::I32(!mask as i32));
    let kept = t.builder.and(old, hole_mask);
    let merged = t.builder.or(inserted, kept);
    let value = t.builder.zero_extend(merged, ValueType::I64);
    store_with_rc(t, i.ra(), value, i.rc());
    Ok(())
}

pub fn rlwnm(t: T, i: PpcInstr) -> Result<(), Error> {
    let s = t.load_gpr32(i.rs());
    let b = t.load_gpr(i.rb());
    let five = t.builder.load_u64(0x1F);
    let n64 = t.builder.and(b, five);
    let n = t.builder.truncate(n64, ValueType::I8);
    let rotated = rotl32_value(t, s, n);
    let mask = t
        .builder
        .load_constant(ConstantValue::I32(mask32(i.mb(), i.me()) as i32));
    let masked = t.builder.and(rotated, mask);
    let value = t.builder.zero_extend(masked, ValueType::I64);
    store_with_rc(t, i.ra(), value, i.rc());
    Ok(())
}

pub fn rldicl(t: T, i: PpcInstr) -> Result<(), Error> {
    let s = t.load_gpr(i.rs());
    let sh = t.builder.load_constant(ConstantValue::I8(i.sh6() as i8));
    let rotated = t.builder.rotate_left(s, sh);
    let mask = t
        .builder
        .load_constant(ConstantValue::I64(mask64(i.mb6(), 63) as i64));
    let value = t.builder.and(rotated, mask);
    store_with_rc(t, i.ra(), value, i.rc());
    Ok(())
}

pub fn rldicr(t: T, i: PpcInstr) -> Result<(), Error> {
    let s = t.load_gpr(i.rs());
    let sh = t.builder.load_constant(ConstantValue::I8(i.sh6() as i8));
    let rotated = t.builder.rotate_left(s, sh);
    let mask = t
        .builder
        .load_constant(ConstantValue::I64(mask64(0, i.mb6()) as i64));
    let value = t.builder.and(rotated, mask);
    store_with_rc(t, i.ra(), value, i.rc());
    Ok(())
}

pub fn rldic(t: T, i: PpcInstr) -> Result<(), Error> {
    let sh = i.sh6();
    let s = t.load_gpr(i.rs());
    let count = t.builder.load_constant(ConstantValue::I8(sh as i8));
    let rotated = t.builder.rotate_left(s, count);
    let mask = t
        .builder
        .load_constant(ConstantValue::I64(mask64(i.mb6(), 63 - sh) as i64));
    let value = t.builder.and(rotated, mask);
    store_with_rc(t, i.ra(), value, i.rc());
    Ok(())
}

pub fn rldimi(t: T, i: PpcInstr) -> Result<(), Error> {
    let sh = i.sh6();
    let mask = mask64(i.mb6(), 63 - sh);
    let s = t.load_gpr(i.rs());
    let count = t.builder.load_constant(ConstantValue::I8(sh as i8));
    let rotated = t.builder.rotate_left(s, count);
    let keep = t.builder.load_constant(ConstantValue::I64(mask as i64));
    let inserted = t.builder.and(rotated, keep);
    let old = t.load_gpr(i.ra());
    let hole = t.builder.load_constant(ConstantValue::I64(!mask as i64));
    let kept = t.builder.and(old, hole);
    let value = t.builder.or(inserted, kept);
    store_with_rc(t, i.ra(), value, i.rc());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ppc_masks() {
        assert_eq!(mask32(0, 31), 0xFFFF_FFFF);
        assert_eq!(mask32(31, 31), 1);
        assert_eq!(mask32(0, 0), 0x8000_0000);
        assert_eq!(mask32(24, 31), 0xFF);
        // Wrapping mask.
        assert_eq!(mask32(30, 1), 0xC000_0003);
        assert_eq!(mask64(32, 63), 0xFFFF_FFFF);
        assert_eq!(mask64(0, 0), 0x8000_0000_0000_0000);
    }
}
