//! Floating-point translators. All arithmetic runs in f64; the single
//! precision forms round the result back through f32. FPSCR exception
//! state is not modeled beyond the bits the compare ops produce.

use crate::error::Error;
use crate::hir::{RoundMode, ValueId, ValueType};
use crate::ppc::context::{ContextInfo, CR_EQ, CR_GT, CR_LT, CR_SO};
use crate::ppc::instr::PpcInstr;
use crate::ppc::translate::FunctionTranslator;

type T<'a, 'b> = &'a mut FunctionTranslator<'b>;

fn round_to_single(t: T, value: ValueId) -> ValueId {
    let single = t.builder.convert(value, ValueType::F32, RoundMode::ToNearest);
    t.builder.convert(single, ValueType::F64, RoundMode::ToNearest)
}

fn store_fp_result(t: T, i: PpcInstr, value: ValueId, single: bool) {
    let value = if single { round_to_single(t, value) } else { value };
    t.store_fpr(i.rd(), value);
    // Rc would copy FPSCR[FX..OX] into cr1; exception bits are not
    // modeled, so the flags read as clear.
    if i.rc() {
        let zero = t.builder.load_zero(ValueType::I8);
        for bit in 0..4 {
            t.store_cr_bit(1, bit, zero);
        }
    }
}

// A-form arithmetic. frA is `ra`, frB is `rb`, frC is `rc_fp`.

pub fn fadd(t: T, i: PpcInstr) -> Result<(), Error> {
    let a = t.load_fpr(i.ra());
    let b = t.load_fpr(i.rb());
    let value = t.builder.add(a, b, 0);
    store_fp_result(t, i, value, false);
    Ok(())
}

pub fn fadds(t: T, i: PpcInstr) -> Result<(), Error> {
    let a = t.load_fpr(i.ra());
    let b = t.load_fpr(i.rb());
    let value = t.builder.add(a, b, 0);
    store_fp_result(t, i, value, true);
    Ok(())
}

pub fn fsub(t: T, i: PpcInstr) -> Result<(), Error> {
    let a = t.load_fpr(i.ra());
    let b = t.load_fpr(i.rb());
    let value = t.builder.sub(a, b, 0);
    store_fp_result(t, i, value, false);
    Ok(())
}

pub fn fsubs(t: T, i: PpcInstr) -> Result<(), Error> {
    let a = t.load_fpr(i.ra());
    let b = t.load_fpr(i.rb());
    let value = t.builder.sub(a, b, 0);
    store_fp_result(t, i, value, true);
    Ok(())
}

pub fn fmul(t: T, i: PpcInstr) -> Result<(), Error> {
    let a = t.load_fpr(i.ra());
    let c = t.load_fpr(i.rc_fp());
    let value = t.builder.mul(a, c);
    store_fp_result(t, i, value, false);
    Ok(())
}

pub fn fmuls(t: T, i: PpcInstr) -> Result<(), Error> {
    let a = t.load_fpr(i.ra());
    let c = t.load_fpr(i.rc_fp());
    let value = t.builder.mul(a, c);
    store_fp_result(t, i, value, true);
    Ok(())
}

pub fn fdiv(t: T, i: PpcInstr) -> Result<(), Error> {
    let a = t.load_fpr(i.ra());
    let b = t.load_fpr(i.rb());
    let value = t.builder.div(a, b, false);
    store_fp_result(t, i, value, false);
    Ok(())
}

pub fn fdivs(t: T, i: PpcInstr) -> Result<(), Error> {
    let a = t.load_fpr(i.ra());
    let b = t.load_fpr(i.rb());
    let value = t.builder.div(a, b, false);
    store_fp_result(t, i, value, true);
    Ok(())
}

fn fmadd_common(t: T, i: PpcInstr, negate: bool, sub: bool, single: bool) -> Result<(), Error> {
    let a = t.load_fpr(i.ra());
    let b = t.load_fpr(i.rb());
    let c = t.load_fpr(i.rc_fp());
    let value = if sub {
        t.builder.mul_sub(a, c, b)
    } else {
        t.builder.mul_add(a, c, b)
    };
    let value = if negate { t.builder.neg(value) } else { value };
    store_fp_result(t, i, value, single);
    Ok(())
}

pub fn fmadd(t: T, i: PpcInstr) -> Result<(), Error> {
    fmadd_common(t, i, false, false, false)
}

pub fn fmadds(t: T, i: PpcInstr) -> Result<(), Error> {
    fmadd_common(t, i, false, false, true)
}

pub fn fmsub(t: T, i: PpcInstr) -> Result<(), Error> {
    fmadd_common(t, i, false, true, false)
}

pub fn fmsubs(t: T, i: PpcInstr) -> Result<(), Error> {
    fmadd_common(t, i, false, true, true)
}

pub fn fnmadd(t: T, i: PpcInstr) -> Result<(), Error> {
    fmadd_common(t, i, true, false, false)
}

pub fn fnmadds(t: T, i: PpcInstr) -> Result<(), Error> {
    fmadd_common(t, i, true, false, true)
}

pub fn fnmsub(t: T, i: PpcInstr) -> Result<(), Error> {
    fmadd_common(t, i, true, true, false)
}

pub fn fnmsubs(t: T, i: PpcInstr) -> Result<(), Error> {
    fmadd_common(t, i, true, true, true)
}

pub fn fsqrt(t: T, i: PpcInstr) -> Result<(), Error> {
    let b = t.load_fpr(i.rb());
    let value = t.builder.sqrt(b);
    store_fp_result(t, i, value, false);
    Ok(())
}

pub fn fsqrts(t: T, i: PpcInstr) -> Result<(), Error> {
    let b = t.load_fpr(i.rb());
    let value = t.builder.sqrt(b);
    store_fp_result(t, i, value, true);
    Ok(())
}

/// Reciprocal estimate; emulated exactly.
pub fn fres(t: T, i: PpcInstr) -> Result<(), Error> {
    let b = t.load_fpr(i.rb());
    let one = t.builder.load_constant(crate::hir::ConstantValue::F64(1.0));
    let value = t.builder.div(one, b, false);
    store_fp_result(t, i, value, true);
    Ok(())
}

pub fn frsqrte(t: T, i: PpcInstr) -> Result<(), Error> {
    let b = t.load_fpr(i.rb());
    let value = t.builder.rsqrt(b);
    store_fp_result(t, i, value, false);
    Ok(())
}

/// fsel: frD = frA >= 0.0 ? frC : frB.
pub fn fsel(t: T, i: PpcInstr) -> Result<(), Error> {
    let a = t.load_fpr(i.ra());
    let b = t.load_fpr(i.rb());
    let c = t.load_fpr(i.rc_fp());
    let zero = t.builder.load_zero(ValueType::F64);
    let ge = t.builder.compare_sge(a, zero);
    let value = t.builder.select(ge, c, b);
    store_fp_result(t, i, value, false);
    Ok(())
}

// Moves and sign fiddling.

pub fn fmr(t: T, i: PpcInstr) -> Result<(), Error> {
    let b = t.load_fpr(i.rb());
    store_fp_result(t, i, b, false);
    Ok(())
}

pub fn fneg(t: T, i: PpcInstr) -> Result<(), Error> {
    let b = t.load_fpr(i.rb());
    let value = t.builder.neg(b);
    store_fp_result(t, i, value, false);
    Ok(())
}

pub fn fabs(t: T, i: PpcInstr) -> Result<(), Error> {
    let b = t.load_fpr(i.rb());
    let value = t.builder.abs(b);
    store_fp_result(t, i, value, false);
    Ok(())
}

pub fn fnabs(t: T, i: PpcInstr) -> Result<(), Error> {
    let b = t.load_fpr(i.rb());
    let positive = t.builder.abs(b);
    let value = t.builder.neg(positive);
    store_fp_result(t, i, value, false);
    Ok(())
}

// Conversions.

pub fn frsp(t: T, i: PpcInstr) -> Result<(), Error> {
    let b = t.load_fpr(i.rb());
    let value = round_to_single(t, b);
    store_fp_result(t, i, value, false);
    Ok(())
}

fn fctiw_common(t: T, i: PpcInstr, round: RoundMode) -> Result<(), Error> {
    let b = t.load_fpr(i.rb());
    let narrow = t.builder.convert(b, ValueType::I32, round);
    let wide = t.builder.zero_extend(narrow, ValueType::I64);
    let value = t.builder.cast(wide, ValueType::F64);
    store_fp_result(t, i, value, false);
    Ok(())
}

pub fn fctiw(t: T, i: PpcInstr) -> Result<(), Error> {
    fctiw_common(t, i, RoundMode::ToNearest)
}

pub fn fctiwz(t: T, i: PpcInstr) -> Result<(), Error> {
    fctiw_common(t, i, RoundMode::ToZero)
}

fn fctid_common(t: T, i: PpcInstr, round: RoundMode) -> Result<(), Error> {
    let b = t.load_fpr(i.rb());
    let narrow = t.builder.convert(b, ValueType::I64, round);
    let value = t.builder.cast(narrow, ValueType::F64);
    store_fp_result(t, i, value, false);
    Ok(())
}

pub fn fctid(t: T, i: PpcInstr) -> Result<(), Error> {
    fctid_common(t, i, RoundMode::ToNearest)
}

pub fn fctidz(t: T, i: PpcInstr) -> Result<(), Error> {
    fctid_common(t, i, RoundMode::ToZero)
}

pub fn fcfid(t: T, i: PpcInstr) -> Result<(), Error> {
    let b = t.load_fpr(i.rb());
    let bits = t.builder.cast(b, ValueType::I64);
    let value = t.builder.convert(bits, ValueType::F64, RoundMode::ToNearest);
    store_fp_result(t, i, value, false);
    Ok(())
}

// Compares. Any NaN operand reports unordered in the SO slot of the
// target field; QNaN and SNaN are not distinguished.

fn fcmp_common(t: T, i: PpcInstr) -> Result<(), Error> {
    let a = t.load_fpr(i.ra());
    let b = t.load_fpr(i.rb());
    let lt = t.builder.compare_slt(a, b);
    t.store_cr_bit(i.crfd(), CR_LT, lt);
    let gt = t.builder.compare_sgt(a, b);
    t.store_cr_bit(i.crfd(), CR_GT, gt);
    let eq = t.builder.compare_eq(a, b);
    t.store_cr_bit(i.crfd(), CR_EQ, eq);
    let a_nan = t.builder.compare_ne(a, a);
    let b_nan = t.builder.compare_ne(b, b);
    let unordered = t.builder.or(a_nan, b_nan);
    t.store_cr_bit(i.crfd(), CR_SO, unordered);
    Ok(())
}

pub fn fcmpu(t: T, i: PpcInstr) -> Result<(), Error> {
    fcmp_common(t, i)
}

pub fn fcmpo(t: T, i: PpcInstr) -> Result<(), Error> {
    fcmp_common(t, i)
}

// FPSCR access: the bit-packed context view moves through the FPR file.

pub fn mffs(t: T, i: PpcInstr) -> Result<(), Error> {
    let bits = t
        .builder
        .load_context(ContextInfo::fpscr(), ValueType::I32);
    let wide = t.builder.zero_extend(bits, ValueType::I64);
    let value = t.builder.cast(wide, ValueType::F64);
    t.store_fpr(i.rd(), value);
    Ok(())
}

pub fn mtfsf(t: T, i: PpcInstr) -> Result<(), Error> {
    let b = t.load_fpr(i.rb());
    let bits = t.builder.cast(b, ValueType::I64);
    let narrow = t.builder.truncate(bits, ValueType::I32);
    t.builder.store_context(ContextInfo::fpscr(), narrow);
    Ok(())
}
