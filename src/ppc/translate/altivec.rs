//! AltiVec/VMX translators: logic, float arithmetic, permutes, splats,
//! shifts and compares over the 128-bit register file.

use crate::error::Error;
use crate::hir::vector_ops;
use crate::hir::{ConstantValue, Opcode, ValueType};
use crate::ppc::context::{CR_EQ, CR_LT};
use crate::ppc::instr::PpcInstr;
use crate::ppc::translate::FunctionTranslator;

type T<'a, 'b> = &'a mut FunctionTranslator<'b>;

// Bitwise logic.

pub fn vand(t: T, i: PpcInstr) -> Result<(), Error> {
    let a = t.load_vr(i.ra());
    let b = t.load_vr(i.rb());
    let value = t.builder.and(a, b);
    t.store_vr(i.rd(), value);
    Ok(())
}

pub fn vandc(t: T, i: PpcInstr) -> Result<(), Error> {
    let a = t.load_vr(i.ra());
    let b = t.load_vr(i.rb());
    let nb = t.builder.not(b);
    let value = t.builder.and(a, nb);
    t.store_vr(i.rd(), value);
    Ok(())
}

pub fn vor(t: T, i: PpcInstr) -> Result<(), Error> {
    let a = t.load_vr(i.ra());
    let b = t.load_vr(i.rb());
    let value = t.builder.or(a, b);
    t.store_vr(i.rd(), value);
    Ok(())
}

pub fn vxor(t: T, i: PpcInstr) -> Result<(), Error> {
    let a = t.load_vr(i.ra());
    let b = t.load_vr(i.rb());
    let value = t.builder.xor(a, b);
    t.store_vr(i.rd(), value);
    Ok(())
}

pub fn vnor(t: T, i: PpcInstr) -> Result<(), Error> {
    let a = t.load_vr(i.ra());
    let b = t.load_vr(i.rb());
    let or = t.builder.or(a, b);
    let value = t.builder.not(or);
    t.store_vr(i.rd(), value);
    Ok(())
}

// Float arithmetic, four lanes at a time.

pub fn vaddfp(t: T, i: PpcInstr) -> Result<(), Error> {
    let a = t.load_vr(i.ra());
    let b = t.load_vr(i.rb());
    let value = t.builder.add(a, b, 0);
    t.store_vr(i.rd(), value);
    Ok(())
}

pub fn vsubfp(t: T, i: PpcInstr) -> Result<(), Error> {
    let a = t.load_vr(i.ra());
    let b = t.load_vr(i.rb());
    let value = t.builder.sub(a, b, 0);
    t.store_vr(i.rd(), value);
    Ok(())
}

pub fn vmaxfp(t: T, i: PpcInstr) -> Result<(), Error> {
    let a = t.load_vr(i.ra());
    let b = t.load_vr(i.rb());
    let value = t.builder.max(a, b);
    t.store_vr(i.rd(), value);
    Ok(())
}

pub fn vminfp(t: T, i: PpcInstr) -> Result<(), Error> {
    let a = t.load_vr(i.ra());
    let b = t.load_vr(i.rb());
    let value = t.builder.min(a, b);
    t.store_vr(i.rd(), value);
    Ok(())
}

/// vmaddfp: vD = vA * vC + vB.
pub fn vmaddfp(t: T, i: PpcInstr) -> Result<(), Error> {
    let a = t.load_vr(i.ra());
    let b = t.load_vr(i.rb());
    let c = t.load_vr(i.vc());
    let value = t.builder.mul_add(a, c, b);
    t.store_vr(i.rd(), value);
    Ok(())
}

/// vnmsubfp: vD = -(vA * vC - vB).
pub fn vnmsubfp(t: T, i: PpcInstr) -> Result<(), Error> {
    let a = t.load_vr(i.ra());
    let b = t.load_vr(i.rb());
    let c = t.load_vr(i.vc());
    let prod = t.builder.mul_sub(a, c, b);
    let value = t.builder.neg(prod);
    t.store_vr(i.rd(), value);
    Ok(())
}

pub fn vrefp(t: T, i: PpcInstr) -> Result<(), Error> {
    let b = t.load_vr(i.rb());
    let one = t
        .builder
        .load_constant(ConstantValue::V128(vector_ops::splat(
            ValueType::F32,
            1.0f32.to_bits() as u64,
        )));
    let value = t.builder.div(one, b, false);
    t.store_vr(i.rd(), value);
    Ok(())
}

pub fn vrsqrtefp(t: T, i: PpcInstr) -> Result<(), Error> {
    let b = t.load_vr(i.rb());
    let value = t.builder.rsqrt(b);
    t.store_vr(i.rd(), value);
    Ok(())
}

// Conversions.

pub fn vcfsx(t: T, i: PpcInstr) -> Result<(), Error> {
    let b = t.load_vr(i.rb());
    let converted = t.builder.vector_convert_i2f(b);
    // The immediate scales by 2^-uimm.
    let value = if i.vx_uimm() != 0 {
        let scale = (1u32 << i.vx_uimm()) as f32;
        let inv = t
            .builder
            .load_constant(ConstantValue::V128(vector_ops::splat(
                ValueType::F32,
                (1.0 / scale).to_bits() as u64,
            )));
        t.builder.mul(converted, inv)
    } else {
        converted
    };
    t.store_vr(i.rd(), value);
    Ok(())
}

pub fn vctsxs(t: T, i: PpcInstr) -> Result<(), Error> {
    let b = t.load_vr(i.rb());
    let scaled = if i.vx_uimm() != 0 {
        let scale = (1u32 << i.vx_uimm()) as f32;
        let factor = t
            .builder
            .load_constant(ConstantValue::V128(vector_ops::splat(
                ValueType::F32,
                scale.to_bits() as u64,
            )));
        t.builder.mul(b, factor)
    } else {
        b
    };
    let value = t
        .builder
        .vector_convert_f2i(scaled, crate::hir::RoundMode::ToZero);
    t.store_vr(i.rd(), value);
    Ok(())
}

// Permutes, selects, splats.

pub fn vperm(t: T, i: PpcInstr) -> Result<(), Error> {
    let a = t.load_vr(i.ra());
    let b = t.load_vr(i.rb());
    let control = t.load_vr(i.vc());
    let value = t.builder.permute(control, a, b, ValueType::I8);
    t.store_vr(i.rd(), value);
    Ok(())
}

/// vsel: vD = (vA & ~vC) | (vB & vC).
pub fn vsel(t: T, i: PpcInstr) -> Result<(), Error> {
    let a = t.load_vr(i.ra());
    let b = t.load_vr(i.rb());
    let c = t.load_vr(i.vc());
    let nc = t.builder.not(c);
    let from_a = t.builder.and(a, nc);
    let from_b = t.builder.and(b, c);
    let value = t.builder.or(from_a, from_b);
    t.store_vr(i.rd(), value);
    Ok(())
}

fn vsplt_common(t: T, i: PpcInstr, part: ValueType) -> Result<(), Error> {
    let b = t.load_vr(i.rb());
    let lane = i.vx_uimm() as u64;
    let scalar = t.builder.extract(b, lane, part);
    let value = t.builder.splat(scalar);
    t.store_vr(i.rd(), value);
    Ok(())
}

pub fn vspltb(t: T, i: PpcInstr) -> Result<(), Error> {
    vsplt_common(t, i, ValueType::I8)
}

pub fn vsplth(t: T, i: PpcInstr) -> Result<(), Error> {
    vsplt_common(t, i, ValueType::I16)
}

pub fn vspltw(t: T, i: PpcInstr) -> Result<(), Error> {
    vsplt_common(t, i, ValueType::I32)
}

fn vspltis_common(t: T, i: PpcInstr, part: ValueType) -> Result<(), Error> {
    let imm = i.vx_simm() as i64 as u64;
    let value = t
        .builder
        .load_constant(ConstantValue::V128(vector_ops::splat(part, imm)));
    t.store_vr(i.rd(), value);
    Ok(())
}

pub fn vspltisb(t: T, i: PpcInstr) -> Result<(), Error> {
    vspltis_common(t, i, ValueType::I8)
}

pub fn vspltish(t: T, i: PpcInstr) -> Result<(), Error> {
    vspltis_common(t, i, ValueType::I16)
}

pub fn vspltisw(t: T, i: PpcInstr) -> Result<(), Error> {
    vspltis_common(t, i, ValueType::I32)
}

// Integer lane arithmetic (modulo forms).

fn lane_binary(t: T, i: PpcInstr, opcode: Opcode, part: ValueType) -> Result<(), Error> {
    let a = t.load_vr(i.ra());
    let b = t.load_vr(i.rb());
    let value = match opcode {
        Opcode::VectorShl => t.builder.vector_shl(a, b, part),
        Opcode::VectorShr => t.builder.vector_shr(a, b, part),
        _ => t.builder.vector_sha(a, b, part),
    };
    t.store_vr(i.rd(), value);
    Ok(())
}

pub fn vslb(t: T, i: PpcInstr) -> Result<(), Error> {
    lane_binary(t, i, Opcode::VectorShl, ValueType::I8)
}

pub fn vslh(t: T, i: PpcInstr) -> Result<(), Error> {
    lane_binary(t, i, Opcode::VectorShl, ValueType::I16)
}

pub fn vslw(t: T, i: PpcInstr) -> Result<(), Error> {
    lane_binary(t, i, Opcode::VectorShl, ValueType::I32)
}

pub fn vsrb(t: T, i: PpcInstr) -> Result<(), Error> {
    lane_binary(t, i, Opcode::VectorShr, ValueType::I8)
}

pub fn vsrh(t: T, i: PpcInstr) -> Result<(), Error> {
    lane_binary(t, i, Opcode::VectorShr, ValueType::I16)
}

pub fn vsrw(t: T, i: PpcInstr) -> Result<(), Error> {
    lane_binary(t, i, Opcode::VectorShr, ValueType::I32)
}

pub fn vsrab(t: T, i: PpcInstr) -> Result<(), Error> {
    lane_binary(t, i, Opcode::VectorSha, ValueType::I8)
}

pub fn vsrah(t: T, i: PpcInstr) -> Result<(), Error> {
    lane_binary(t, i, Opcode::VectorSha, ValueType::I16)
}

pub fn vsraw(t: T, i: PpcInstr) -> Result<(), Error> {
    lane_binary(t, i, Opcode::VectorSha, ValueType::I32)
}

// Compares. The record forms also summarize into cr6.

fn vcmp_common(t: T, i: PpcInstr, opcode: Opcode, part: ValueType) -> Result<(), Error> {
    let a = t.load_vr(i.ra());
    let b = t.load_vr(i.rb());
    let result = t.builder.vector_compare(opcode, a, b, part);
    t.store_vr(i.rd(), result);
    if i.xo_vx() & 0x400 != 0 {
        // cr6: [all lanes true, 0, no lanes true, 0].
        let low = t.builder.extract(result, 0, ValueType::I64);
        let high = t.builder.extract(result, 1, ValueType::I64);
        let ones = t.builder.load_u64(u64::MAX);
        let zero64 = t.builder.load_zero(ValueType::I64);
        let low_all = t.builder.compare_eq(low, ones);
        let high_all = t.builder.compare_eq(high, ones);
        let all = t.builder.and(low_all, high_all);
        t.store_cr_bit(6, CR_LT, all);
        let low_none = t.builder.compare_eq(low, zero64);
        let high_none = t.builder.compare_eq(high, zero64);
        let none = t.builder.and(low_none, high_none);
        t.store_cr_bit(6, CR_EQ, none);
        let zero = t.builder.load_zero(ValueType::I8);
        t.store_cr_bit(6, 1, zero);
        t.store_cr_bit(6, 3, zero);
    }
    Ok(())
}

pub fn vcmpequb(t: T, i: PpcInstr) -> Result<(), Error> {
    vcmp_common(t, i, Opcode::VectorCompareEq, ValueType::I8)
}

pub fn vcmpequh(t: T, i: PpcInstr) -> Result<(), Error> {
    vcmp_common(t, i, Opcode::VectorCompareEq, ValueType::I16)
}

pub fn vcmpequw(t: T, i: PpcInstr) -> Result<(), Error> {
    vcmp_common(t, i, Opcode::VectorCompareEq, ValueType::I32)
}

pub fn vcmpgtsb(t: T, i: PpcInstr) -> Result<(), Error> {
    vcmp_common(t, i, Opcode::VectorCompareSgt, ValueType::I8)
}

pub fn vcmpgtsh(t: T, i: PpcInstr) -> Result<(), Error> {
    vcmp_common(t, i, Opcode::VectorCompareSgt, ValueType::I16)
}

pub fn vcmpgtsw(t: T, i: PpcInstr) -> Result<(), Error> {
    vcmp_common(t, i, Opcode::VectorCompareSgt, ValueType::I32)
}

pub fn vcmpgtub(t: T, i: PpcInstr) -> Result<(), Error> {
    vcmp_common(t, i, Opcode::VectorCompareUgt, ValueType::I8)
}

pub fn vcmpgtuh(t: T, i: PpcInstr) -> Result<(), Error> {
    vcmp_common(t, i, Opcode::VectorCompareUgt, ValueType::I16)
}

pub fn vcmpgtuw(t: T, i: PpcInstr) -> Result<(), Error> {
    vcmp_common(t, i, Opcode::VectorCompareUgt, ValueType::I32)
}

pub fn vcmpgefp(t: T, i: PpcInstr) -> Result<(), Error> {
    vcmp_common(t, i, Opcode::VectorCompareSge, ValueType::F32)
}

pub fn vcmpeqfp(t: T, i: PpcInstr) -> Result<(), Error> {
    vcmp_common(t, i, Opcode::VectorCompareEq, ValueType::F32)
}

pub fn vcmpgtfp(t: T, i: PpcInstr) -> Result<(), Error> {
    vcmp_common(t, i, Opcode::VectorCompareSgt, ValueType::F32)
}

// Merge word forms, expressed as dword permutes.

pub fn vmrghw(t: T, i: PpcInstr) -> Result<(), Error> {
    let a = t.load_vr(i.ra());
    let b = t.load_vr(i.rb());
    let control = t
        .builder
        .load_u32(crate::hir::make_permute_mask(0, 0, 1, 0, 0, 1, 1, 1));
    let value = t.builder.permute(control, a, b, ValueType::I32);
    t.store_vr(i.rd(), value);
    Ok(())
}

pub fn vmrglw(t: T, i: PpcInstr) -> Result<(), Error> {
    let a = t.load_vr(i.ra());
    let b = t.load_vr(i.rb());
    let control = t
        .builder
        .load_u32(crate::hir::make_permute_mask(0, 2, 1, 2, 0, 3, 1, 3));
    let value = t.builder.permute(control, a, b, ValueType::I32);
    t.store_vr(i.rd(), value);
    Ok(())
}

fn lane_mod_arith(t: T, i: PpcInstr, sub: bool, part: ValueType) -> Result<(), Error> {
    // Modulo lane add/sub has no single HIR opcode; go through extracts.
    let a = t.load_vr(i.ra());
    let b = t.load_vr(i.rb());
    let lanes = 128 / part.bits() as u64;
    let mut out = t
        .builder
        .load_constant(ConstantValue::V128(crate::vec128::Vec128::ZERO));
    for lane in 0..lanes {
        let la = t.builder.extract(a, lane, part);
        let lb = t.builder.extract(b, lane, part);
        let lv = if sub {
            t.builder.sub(la, lb, 0)
        } else {
            t.builder.add(la, lb, 0)
        };
        out = t.builder.insert(out, lane, lv);
    }
    t.store_vr(i.rd(), out);
    Ok(())
}

pub fn vadduwm(t: T, i: PpcInstr) -> Result<(), Error> {
    lane_mod_arith(t, i, false, ValueType::I32)
}

pub fn vsubuwm(t: T, i: PpcInstr) -> Result<(), Error> {
    lane_mod_arith(t, i, true, ValueType::I32)
}

pub fn vadduhm(t: T, i: PpcInstr) -> Result<(), Error> {
    lane_mod_arith(t, i, false, ValueType::I16)
}

pub fn vsubuhm(t: T, i: PpcInstr) -> Result<(), Error> {
    lane_mod_arith(t, i, true, ValueType::I16)
}

pub fn vaddubm(t: T, i: PpcInstr) -> Result<(), Error> {
    lane_mod_arith(t, i, false, ValueType::I8)
}

pub fn vsububm(t: T, i: PpcInstr) -> Result<(), Error> {
    lane_mod_arith(t, i, true, ValueType::I8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ppc::translate::NoShims;

    #[test]
    fn vperm_emits_byte_permute() {
        // vperm v3, v4, v5, v3
        let word = (4u32 << 26) | (3 << 21) | (4 << 16) | (5 << 11) | (3 << 6) | 43;
        let mut t = FunctionTranslator::new(0x1000, 0x1000, &NoShims);
        vperm(&mut t, PpcInstr::new(0x1000, word)).unwrap();
        let dump = t.finish().dump();
        assert!(dump.contains("permute"), "{dump}");
    }
}
