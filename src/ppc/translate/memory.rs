//! Load, store, reservation and cache-hint translators.
//!
//! Guest memory is big-endian: integer loads come out of `load` through a
//! `byte_swap` and stores push one in front. Vector accesses force the
//! 16-byte alignment `lvx`/`stvx` guarantee.

use crate::error::Error;
use crate::hir::{ValueId, ValueType};
use crate::ppc::context::{ContextInfo, CR_EQ, CR_GT, CR_LT, CR_SO};
use crate::ppc::instr::PpcInstr;
use crate::ppc::translate::FunctionTranslator;

type T<'a, 'b> = &'a mut FunctionTranslator<'b>;

#[derive(Clone, Copy, PartialEq)]
enum Extend {
    Zero,
    Sign,
}

fn ea_for(t: T, i: PpcInstr, indexed: bool, update: bool, ds_form: bool) -> (ValueId, Option<ValueId>) {
    if indexed {
        if update {
            let (ea, raw) = t.ea_x_update(i.ra(), i.rb());
            (ea, Some(raw))
        } else {
            (t.ea_x(i.ra(), i.rb()), None)
        }
    } else {
        let disp = if ds_form { i.ds_disp() } else { i.simm() };
        if update {
            let (ea, raw) = t.ea_d_update(i.ra(), disp);
            (ea, Some(raw))
        } else {
            (t.ea_d(i.ra(), disp), None)
        }
    }
}

fn load_int(
    t: T,
    i: PpcInstr,
    ty: ValueType,
    extend: Extend,
    indexed: bool,
    update: bool,
    ds_form: bool,
) -> Result<(), Error> {
    let (ea, raw_ea) = ea_for(t, i, indexed, update, ds_form);
    let value = t.load_mem(ea, ty, false);
    let wide = match (ty, extend) {
        (ValueType::I64, _) => value,
        (_, Extend::Zero) => t.builder.zero_extend(value, ValueType::I64),
        (_, Extend::Sign) => t.builder.sign_extend(value, ValueType::I64),
    };
    t.store_gpr(i.rd(), wide);
    if let Some(raw_ea) = raw_ea {
        t.store_gpr(i.ra(), raw_ea);
    }
    Ok(())
}

fn store_int(
    t: T,
    i: PpcInstr,
    ty: ValueType,
    indexed: bool,
    update: bool,
    ds_form: bool,
) -> Result<(), Error> {
    let (ea, raw_ea) = ea_for(t, i, indexed, update, ds_form);
    let s = t.load_gpr(i.rs());
    let narrow = if ty == ValueType::I64 {
        s
    } else {
        t.builder.truncate(s, ty)
    };
    t.store_mem(ea, narrow, false);
    if let Some(raw_ea) = raw_ea {
        t.store_gpr(i.ra(), raw_ea);
    }
    Ok(())
}

macro_rules! int_loads {
    ($( $name:ident => ($ty:expr, $extend:expr, $indexed:literal, $update:literal, $ds:literal); )*) => {
        $(
            pub fn $name(t: T, i: PpcInstr) -> Result<(), Error> {
                load_int(t, i, $ty, $extend, $indexed, $update, $ds)
            }
        )*
    };
}

macro_rules! int_stores {
    ($( $name:ident => ($ty:expr, $indexed:literal, $update:literal, $ds:literal); )*) => {
        $(
            pub fn $name(t: T, i: PpcInstr) -> Result<(), Error> {
                store_int(t, i, $ty, $indexed, $update, $ds)
            }
        )*
    };
}

int_loads! {
    lbz   => (ValueType::I8,  Extend::Zero, false, false, false);
    lbzu  => (ValueType::I8,  Extend::Zero, false, true,  false);
    lbzx  => (ValueType::I8,  Extend::Zero, true,  false, false);
    lbzux => (ValueType::I8,  Extend::Zero, true,  true,  false);
    lhz   => (ValueType::I16, Extend::Zero, false, false, false);
    lhzu  => (ValueType::I16, Extend::Zero, false, true,  false);
    lhzx  => (ValueType::I16, Extend::Zero, true,  false, false);
    lhzux => (ValueType::I16, Extend::Zero, true,  true,  false);
    lha   => (ValueType::I16, Extend::Sign, false, false, false);
    lhau  => (ValueType::I16, Extend::Sign, false, true,  false);
    lhax  => (ValueType::I16, Extend::Sign, true,  false, false);
    lhaux => (ValueType::I16, Extend::Sign, true,  true,  false);
    lwz   => (ValueType::I32, Extend::Zero, false, false, false);
    lwzu  => (ValueType::I32, Extend::Zero, false, true,  false);
    lwzx  => (ValueType::I32, Extend::Zero, true,  false, false);
    lwzux => (ValueType::I32, Extend::Zero, true,  true,  false);
    lwa   => (ValueType::I32, Extend::Sign, false, false, true);
    lwax  => (ValueType::I32, Extend::Sign, true,  false, false);
    ld    => (ValueType::I64, Extend::Zero, false, false, true);
    ldu   => (ValueType::I64, Extend::Zero, false, true,  true);
    ldx   => (ValueType::I64, Extend::Zero, true,  false, false);
    ldux  => (ValueType::I64, Extend::Zero, true,  true,  false);
}

int_stores! {
    stb   => (ValueType::I8,  false, false, false);
    stbu  => (ValueType::I8,  false, true,  false);
    stbx  => (ValueType::I8,  true,  false, false);
    stbux => (ValueType::I8,  true,  true,  false);
    sth   => (ValueType::I16, false, false, false);
    sthu  => (ValueType::I16, false, true,  false);
    sthx  => (ValueType::I16, true,  false, false);
    sthux => (ValueType::I16, true,  true,  false);
    stw   => (ValueType::I32, false, false, false);
    stwu  => (ValueType::I32, false, true,  false);
    stwx  => (ValueType::I32, true,  false, false);
    stwux => (ValueType::I32, true,  true,  false);
    std   => (ValueType::I64, false, false, true);
    stdu  => (ValueType::I64, false, true,  true);
    stdx  => (ValueType::I64, true,  false, false);
    stdux => (ValueType::I64, true,  true,  false);
}

// Byte-reversed accesses: the swap the memory contract inserts and the one
// the instruction asks for cancel, so these are plain loads/stores.

pub fn lwbrx(t: T, i: PpcInstr) -> Result<(), Error> {
    let ea = t.ea_x(i.ra(), i.rb());
    let raw = t.builder.load(ea, ValueType::I32, 0);
    let value = t.builder.zero_extend(raw, ValueType::I64);
    t.store_gpr(i.rd(), value);
    Ok(())
}

pub fn lhbrx(t: T, i: PpcInstr) -> Result<(), Error> {
    let ea = t.ea_x(i.ra(), i.rb());
    let raw = t.builder.load(ea, ValueType::I16, 0);
    let value = t.builder.zero_extend(raw, ValueType::I64);
    t.store_gpr(i.rd(), value);
    Ok(())
}

pub fn stwbrx(t: T, i: PpcInstr) -> Result<(), Error> {
    let ea = t.ea_x(i.ra(), i.rb());
    let s = t.load_gpr(i.rs());
    let narrow = t.builder.truncate(s, ValueType::I32);
    t.builder.store(ea, narrow, 0);
    Ok(())
}

pub fn sthbrx(t: T, i: PpcInstr) -> Result<(), Error> {
    let ea = t.ea_x(i.ra(), i.rb());
    let s = t.load_gpr(i.rs());
    let narrow = t.builder.truncate(s, ValueType::I16);
    t.builder.store(ea, narrow, 0);
    Ok(())
}

// Floating-point loads and stores go through the integer pipe so the
// byte swap stays a plain integer operation.

pub fn lfs_common(t: T, i: PpcInstr, indexed: bool, update: bool) -> Result<(), Error> {
    let (ea, raw_ea) = ea_for(t, i, indexed, update, false);
    let raw = t.load_mem(ea, ValueType::I32, false);
    let single = t.builder.cast(raw, ValueType::F32);
    let value = t
        .builder
        .convert(single, ValueType::F64, crate::hir::RoundMode::ToNearest);
    t.store_fpr(i.rd(), value);
    if let Some(raw_ea) = raw_ea {
        t.store_gpr(i.ra(), raw_ea);
    }
    Ok(())
}

pub fn lfs(t: T, i: PpcInstr) -> Result<(), Error> {
    lfs_common(t, i, false, false)
}

pub fn lfsu(t: T, i: PpcInstr) -> Result<(), Error> {
    lfs_common(t, i, false, true)
}

pub fn lfsx(t: T, i: PpcInstr) -> Result<(), Error> {
    lfs_common(t, i, true, false)
}

fn lfd_common(t: T, i: PpcInstr, indexed: bool, update: bool) -> Result<(), Error> {
    let (ea, raw_ea) = ea_for(t, i, indexed, update, false);
    let raw = t.load_mem(ea, ValueType::I64, false);
    let value = t.builder.cast(raw, ValueType::F64);
    t.store_fpr(i.rd(), value);
    if let Some(raw_ea) = raw_ea {
        t.store_gpr(i.ra(), raw_ea);
    }
    Ok(())
}

pub fn lfd(t: T, i: PpcInstr) -> Result<(), Error> {
    lfd_common(t, i, false, false)
}

pub fn lfdu(t: T, i: PpcInstr) -> Result<(), Error> {
    lfd_common(t, i, false, true)
}

pub fn lfdx(t: T, i: PpcInstr) -> Result<(), Error> {
    lfd_common(t, i, true, false)
}

fn stfs_common(t: T, i: PpcInstr, indexed: bool, update: bool) -> Result<(), Error> {
    let (ea, raw_ea) = ea_for(t, i, indexed, update, false);
    let wide = t.load_fpr(i.rs());
    let single = t
        .builder
        .convert(wide, ValueType::F32, crate::hir::RoundMode::ToNearest);
    let bits = t.builder.cast(single, ValueType::I32);
    t.store_mem(ea, bits, false);
    if let Some(raw_ea) = raw_ea {
        t.store_gpr(i.ra(), raw_ea);
    }
    Ok(())
}

pub fn stfs(t: T, i: PpcInstr) -> Result<(), Error> {
    stfs_common(t, i, false, false)
}

pub fn stfsu(t: T, i: PpcInstr) -> Result<(), Error> {
    stfs_common(t, i, false, true)
}

pub fn stfsx(t: T, i: PpcInstr) -> Result<(), Error> {
    stfs_common(t, i, true, false)
}

fn stfd_common(t: T, i: PpcInstr, indexed: bool, update: bool) -> Result<(), Error> {
    let (ea, raw_ea) = ea_for(t, i, indexed, update, false);
    let wide = t.load_fpr(i.rs());
    let bits = t.builder.cast(wide, ValueType::I64);
    t.store_mem(ea, bits, false);
    if let Some(raw_ea) = raw_ea {
        t.store_gpr(i.ra(), raw_ea);
    }
    Ok(())
}

pub fn stfd(t: T, i: PpcInstr) -> Result<(), Error> {
    stfd_common(t, i, false, false)
}

pub fn stfdu(t: T, i: PpcInstr) -> Result<(), Error> {
    stfd_common(t, i, false, true)
}

pub fn stfdx(t: T, i: PpcInstr) -> Result<(), Error> {
    stfd_common(t, i, true, false)
}

// Vector loads/stores; the EA is forced to 16-byte alignment.

fn vector_ea(t: T, i: PpcInstr) -> ValueId {
    let ea = t.ea_x(i.ra(), i.rb());
    let mask = t.builder.load_u64(!0xFu64);
    t.builder.and(ea, mask)
}

pub fn lvx(t: T, i: PpcInstr) -> Result<(), Error> {
    let ea = vector_ea(t, i);
    let raw = t.builder.load(ea, ValueType::V128, crate::hir::instr_flags::LOAD_ALIGNED);
    let value = t.builder.byte_swap(raw);
    t.store_vr(i.rd(), value);
    Ok(())
}

pub fn stvx(t: T, i: PpcInstr) -> Result<(), Error> {
    let ea = vector_ea(t, i);
    let v = t.load_vr(i.rs());
    let swapped = t.builder.byte_swap(v);
    t.builder
        .store(ea, swapped, crate::hir::instr_flags::STORE_ALIGNED);
    Ok(())
}

// Reservations. The reserving load records the raw big-endian word; the
// conditional store compare-exchanges against it, which matches the
// acquire/release pairing of lwarx/stwcx.

fn load_reserved(t: T, i: PpcInstr, ty: ValueType) -> Result<(), Error> {
    let ea = t.ea_x(i.ra(), i.rb());
    t.builder.store_context(ContextInfo::reserve_address(), ea);
    let raw = t.builder.load_acquire(ea, ty, 0);
    let raw_wide = if ty == ValueType::I64 {
        raw
    } else {
        t.builder.zero_extend(raw, ValueType::I64)
    };
    t.builder
        .store_context(ContextInfo::reserve_value(), raw_wide);
    let value = t.builder.byte_swap(raw);
    let wide = if ty == ValueType::I64 {
        value
    } else {
        t.builder.zero_extend(value, ValueType::I64)
    };
    t.store_gpr(i.rd(), wide);
    Ok(())
}

pub fn lwarx(t: T, i: PpcInstr) -> Result<(), Error> {
    load_reserved(t, i, ValueType::I32)
}

pub fn ldarx(t: T, i: PpcInstr) -> Result<(), Error> {
    load_reserved(t, i, ValueType::I64)
}

fn store_conditional(t: T, i: PpcInstr, ty: ValueType) -> Result<(), Error> {
    let ea = t.ea_x(i.ra(), i.rb());
    let expected_wide = t
        .builder
        .load_context(ContextInfo::reserve_value(), ValueType::I64);
    let expected = if ty == ValueType::I64 {
        expected_wide
    } else {
        t.builder.truncate(expected_wide, ty)
    };
    let s = t.load_gpr(i.rs());
    let narrow = if ty == ValueType::I64 {
        s
    } else {
        t.builder.truncate(s, ty)
    };
    let replacement = t.builder.byte_swap(narrow);
    let observed = t.builder.compare_exchange(ea, expected, replacement);
    let success = t.builder.compare_eq(observed, expected);
    // cr0: 0 || 0 || success || XER[SO].
    let zero = t.builder.load_zero(ValueType::I8);
    t.store_cr_bit(0, CR_LT, zero);
    t.store_cr_bit(0, CR_GT, zero);
    t.store_cr_bit(0, CR_EQ, success);
    let so = t
        .builder
        .load_context(ContextInfo::xer_so(), ValueType::I8);
    t.store_cr_bit(0, CR_SO, so);
    Ok(())
}

pub fn stwcx(t: T, i: PpcInstr) -> Result<(), Error> {
    store_conditional(t, i, ValueType::I32)
}

pub fn stdcx(t: T, i: PpcInstr) -> Result<(), Error> {
    store_conditional(t, i, ValueType::I64)
}

// Cache hints.

pub fn dcbt(t: T, i: PpcInstr) -> Result<(), Error> {
    let ea = t.ea_x(i.ra(), i.rb());
    t.builder.prefetch(ea, 128);
    Ok(())
}

pub fn dcbtst(t: T, i: PpcInstr) -> Result<(), Error> {
    dcbt(t, i)
}

pub fn dcbf(t: T, _i: PpcInstr) -> Result<(), Error> {
    t.builder.nop();
    Ok(())
}

pub fn dcbst(t: T, _i: PpcInstr) -> Result<(), Error> {
    t.builder.nop();
    Ok(())
}

pub fn icbi(t: T, _i: PpcInstr) -> Result<(), Error> {
    t.builder.nop();
    Ok(())
}

/// dcbz on the Xenon clears the full 128-byte line.
pub fn dcbz(t: T, i: PpcInstr) -> Result<(), Error> {
    let ea = t.ea_x(i.ra(), i.rb());
    let mask = t.builder.load_u64(!0x7Fu64);
    let line = t.builder.and(ea, mask);
    let zero = t.builder.load_zero(ValueType::I64);
    for slot in 0..16u64 {
        let offset = t.builder.load_u64(slot * 8);
        let at = t.builder.add(line, offset, 0);
        t.builder
            .store(at, zero, crate::hir::instr_flags::STORE_ALIGNED);
    }
    Ok(())
}
