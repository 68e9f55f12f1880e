//! Branch, condition-register and system translators.
//!
//! Direct branches inside the function become HIR labels and branches;
//! calls become `call`/`call_extern` (the shim registry decides which);
//! indirect branches through LR/CTR become `call_indirect`/`return`.

use crate::error::Error;
use crate::hir::{instr_flags, ConstantValue, ValueId, ValueType};
use crate::ppc::context::ContextInfo;
use crate::ppc::instr::PpcInstr;
use crate::ppc::translate::{FunctionTranslator, TRAP_SYSCALL};

type T<'a, 'b> = &'a mut FunctionTranslator<'b>;

/// Resolved condition of a BO/BI pair: `None` means branch-always.
fn branch_condition(t: T, i: PpcInstr) -> Option<ValueId> {
    let bo = i.bo();
    let ctr_ok = if bo & 0b00100 != 0 {
        None
    } else {
        // Decrement CTR, then test it against zero.
        let ctr = t.load_ctr();
        let one = t.builder.load_u64(1);
        let next = t.builder.sub(ctr, one, 0);
        t.store_ctr(next);
        let zero = t.builder.load_zero(ValueType::I64);
        Some(if bo & 0b00010 != 0 {
            t.builder.compare_eq(next, zero)
        } else {
            t.builder.compare_ne(next, zero)
        })
    };
    let cond_ok = if bo & 0b10000 != 0 {
        None
    } else {
        let bit = t.load_cr_bit((i.bi() / 4) as usize, (i.bi() % 4) as usize);
        Some(if bo & 0b01000 != 0 {
            t.builder.is_true(bit)
        } else {
            t.builder.is_false(bit)
        })
    };
    match (ctr_ok, cond_ok) {
        (Some(a), Some(b)) => Some(t.builder.and(a, b)),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    }
}

fn store_link(t: T, i: PpcInstr) {
    let next = t
        .builder
        .load_constant(ConstantValue::I64(i.address as i64 + 4));
    t.store_lr(next);
}

/// Emits a transfer to a guest address outside the current function: a
/// call followed by a return to the host caller, which is how a tail
/// branch behaves once frames live on the host stack.
fn emit_tail_transfer(t: T, target: u32) {
    if t.is_shim(target) {
        t.builder.call_extern(target);
    } else {
        t.builder.call(target, 0);
    }
    t.builder.return_();
}

pub fn b(t: T, i: PpcInstr) -> Result<(), Error> {
    let target = if i.aa() {
        i.li() as u32
    } else {
        i.address.wrapping_add(i.li() as u32)
    };
    if i.lk() {
        store_link(t, i);
        if t.is_shim(target) {
            t.builder.call_extern(target);
        } else {
            t.builder.call(target, 0);
        }
        Ok(())
    } else if t.in_function(target) {
        let label = t.label_for(target);
        t.builder.branch(label, 0);
        Ok(())
    } else {
        emit_tail_transfer(t, target);
        Ok(())
    }
}

pub fn bc(t: T, i: PpcInstr) -> Result<(), Error> {
    let target = if i.aa() {
        i.bd() as u32
    } else {
        i.address.wrapping_add(i.bd() as u32)
    };
    if i.lk() {
        store_link(t, i);
    }
    let cond = branch_condition(t, i);
    let hint = if i.bd() < 0 {
        instr_flags::BRANCH_LIKELY
    } else {
        0
    };
    match cond {
        None => {
            if i.lk() {
                emit_call_like(t, target);
            } else if t.in_function(target) {
                let label = t.label_for(target);
                t.builder.branch(label, hint);
            } else {
                emit_tail_transfer(t, target);
            }
        }
        Some(cond) => {
            if i.lk() {
                if t.is_shim(target) {
                    let skip = t.builder.new_label();
                    t.builder.branch_false(cond, skip, 0);
                    t.builder.call_extern(target);
                    t.builder.mark_label(skip);
                } else {
                    t.builder.call_true(cond, target, 0);
                }
            } else if t.in_function(target) {
                let label = t.label_for(target);
                t.builder.branch_true(cond, label, hint);
            } else {
                let skip = t.builder.new_label();
                t.builder.branch_false(cond, skip, 0);
                emit_tail_transfer(t, target);
                t.builder.mark_label(skip);
            }
        }
    }
    Ok(())
}

fn emit_call_like(t: T, target: u32) {
    if t.is_shim(target) {
        t.builder.call_extern(target);
    } else {
        t.builder.call(target, 0);
    }
}

pub fn bclr(t: T, i: PpcInstr) -> Result<(), Error> {
    let cond = branch_condition(t, i);
    if i.lk() {
        store_link(t, i);
    }
    match cond {
        None => {
            t.builder.return_();
        }
        Some(cond) => {
            let skip = t.builder.new_label();
            t.builder.branch_false(cond, skip, 0);
            t.builder.return_();
            t.builder.mark_label(skip);
        }
    }
    Ok(())
}

pub fn bcctr(t: T, i: PpcInstr) -> Result<(), Error> {
    let cond = branch_condition(t, i);
    let ctr = t.load_ctr();
    let mask = t.builder.load_u64(!0x3u64);
    let target = t.builder.and(ctr, mask);
    if i.lk() {
        store_link(t, i);
        match cond {
            None => t.builder.call_indirect(target, 0),
            Some(cond) => t.builder.call_indirect_true(cond, target, 0),
        }
    } else {
        match cond {
            None => {
                t.builder.call_indirect(target, 0);
                t.builder.return_();
            }
            Some(cond) => {
                let skip = t.builder.new_label();
                t.builder.branch_false(cond, skip, 0);
                t.builder.call_indirect(target, 0);
                t.builder.return_();
                t.builder.mark_label(skip);
            }
        }
    }
    Ok(())
}

/// System call: the kernel dispatcher lives outside the core, so record PC
/// and trap to the host.
pub fn sc(t: T, i: PpcInstr) -> Result<(), Error> {
    let pc = t.builder.load_u32(i.address);
    t.builder.store_context(ContextInfo::pc(), pc);
    t.builder.trap(TRAP_SYSCALL);
    Ok(())
}

// Trap-word forms: evaluate the TO conditions and trap when any holds.

fn trap_conditions(t: T, to: u32, a: ValueId, b: ValueId) -> Option<ValueId> {
    fn accumulate(t: &mut FunctionTranslator, cond: &mut Option<ValueId>, c: ValueId) {
        *cond = Some(match *cond {
            Some(previous) => t.builder.or(previous, c),
            None => c,
        });
    }
    let mut cond: Option<ValueId> = None;
    if to & 0b10000 != 0 {
        let c = t.builder.compare_slt(a, b);
        accumulate(t, &mut cond, c);
    }
    if to & 0b01000 != 0 {
        let c = t.builder.compare_sgt(a, b);
        accumulate(t, &mut cond, c);
    }
    if to & 0b00100 != 0 {
        let c = t.builder.compare_eq(a, b);
        accumulate(t, &mut cond, c);
    }
    if to & 0b00010 != 0 {
        let c = t.builder.compare_ult(a, b);
        accumulate(t, &mut cond, c);
    }
    if to & 0b00001 != 0 {
        let c = t.builder.compare_ugt(a, b);
        accumulate(t, &mut cond, c);
    }
    cond
}

pub fn tw(t: T, i: PpcInstr) -> Result<(), Error> {
    let a = t.load_gpr32(i.ra());
    let b = t.load_gpr32(i.rb());
    let to = i.rd() as u32;
    if to == 0b11111 {
        t.builder.trap(0);
    } else if let Some(cond) = trap_conditions(t, to, a, b) {
        t.builder.trap_true(cond, 0);
    }
    Ok(())
}

pub fn twi(t: T, i: PpcInstr) -> Result<(), Error> {
    let a = t.load_gpr32(i.ra());
    let b = t.builder.load_constant(ConstantValue::I32(i.simm() as i32));
    let to = i.rd() as u32;
    if to == 0b11111 {
        t.builder.trap(0);
    } else if let Some(cond) = trap_conditions(t, to, a, b) {
        t.builder.trap_true(cond, 0);
    }
    Ok(())
}

// CR field and bit operations.

fn cr_logical(
    t: T,
    i: PpcInstr,
    op: fn(&mut FunctionTranslator, ValueId, ValueId) -> ValueId,
) -> Result<(), Error> {
    let a = t.load_cr_bit(i.crba() / 4, i.crba() % 4);
    let b = t.load_cr_bit(i.crbb() / 4, i.crbb() % 4);
    let a = t.builder.is_true(a);
    let b = t.builder.is_true(b);
    let value = op(t, a, b);
    t.store_cr_bit(i.crbd() / 4, i.crbd() % 4, value);
    Ok(())
}

pub fn crand(t: T, i: PpcInstr) -> Result<(), Error> {
    cr_logical(t, i, |t, a, b| t.builder.and(a, b))
}

pub fn cror(t: T, i: PpcInstr) -> Result<(), Error> {
    cr_logical(t, i, |t, a, b| t.builder.or(a, b))
}

pub fn crxor(t: T, i: PpcInstr) -> Result<(), Error> {
    cr_logical(t, i, |t, a, b| t.builder.xor(a, b))
}

pub fn crnand(t: T, i: PpcInstr) -> Result<(), Error> {
    cr_logical(t, i, |t, a, b| {
        let v = t.builder.and(a, b);
        t.builder.is_false(v)
    })
}

pub fn crnor(t: T, i: PpcInstr) -> Result<(), Error> {
    cr_logical(t, i, |t, a, b| {
        let v = t.builder.or(a, b);
        t.builder.is_false(v)
    })
}

pub fn creqv(t: T, i: PpcInstr) -> Result<(), Error> {
    cr_logical(t, i, |t, a, b| {
        let v = t.builder.xor(a, b);
        t.builder.is_false(v)
    })
}

pub fn crandc(t: T, i: PpcInstr) -> Result<(), Error> {
    cr_logical(t, i, |t, a, b| {
        let nb = t.builder.is_false(b);
        t.builder.and(a, nb)
    })
}

pub fn crorc(t: T, i: PpcInstr) -> Result<(), Error> {
    cr_logical(t, i, |t, a, b| {
        let nb = t.builder.is_false(b);
        t.builder.or(a, nb)
    })
}

pub fn mcrf(t: T, i: PpcInstr) -> Result<(), Error> {
    for bit in 0..4 {
        let value = t.load_cr_bit(i.crfs(), bit);
        t.store_cr_bit(i.crfd(), bit, value);
    }
    Ok(())
}

/// Packs the 32 CR flag bytes into the architectural register view.
pub fn mfcr(t: T, i: PpcInstr) -> Result<(), Error> {
    let mut value = t.builder.load_zero(ValueType::I64);
    for field in 0..8 {
        for bit in 0..4 {
            let flag = t.load_cr_bit(field, bit);
            let truth = t.builder.is_true(flag);
            let wide = t.builder.zero_extend(truth, ValueType::I64);
            let shift = t
                .builder
                .load_constant(ConstantValue::I8((31 - (field * 4 + bit)) as i8));
            let placed = t.builder.shl(wide, shift);
            value = t.builder.or(value, placed);
        }
    }
    t.store_gpr(i.rd(), value);
    Ok(())
}

pub fn mtcrf(t: T, i: PpcInstr) -> Result<(), Error> {
    let s = t.load_gpr(i.rs());
    let crm = i.crm();
    for field in 0..8 {
        if crm & (0x80 >> field) == 0 {
            continue;
        }
        for bit in 0..4 {
            let shift = t
                .builder
                .load_constant(ConstantValue::I8((31 - (field * 4 + bit)) as i8));
            let moved = t.builder.shr(s, shift);
            let one = t.builder.load_u64(1);
            let masked = t.builder.and(moved, one);
            let flag = t.builder.truncate(masked, ValueType::I8);
            t.store_cr_bit(field, bit, flag);
        }
    }
    Ok(())
}

// Special-purpose registers.

pub fn mfspr(t: T, i: PpcInstr) -> Result<(), Error> {
    let value = match i.spr() {
        1 => {
            // XER: SO | OV | CA in the top byte of the low word.
            let so = t
                .builder
                .load_context(ContextInfo::xer_so(), ValueType::I8);
            let ov = t
                .builder
                .load_context(ContextInfo::xer_ov(), ValueType::I8);
            let ca = t
                .builder
                .load_context(ContextInfo::xer_ca(), ValueType::I8);
            let so = t.builder.is_true(so);
            let ov = t.builder.is_true(ov);
            let ca = t.builder.is_true(ca);
            let so = t.builder.zero_extend(so, ValueType::I64);
            let ov = t.builder.zero_extend(ov, ValueType::I64);
            let ca = t.builder.zero_extend(ca, ValueType::I64);
            let shift_so = t.builder.load_constant(ConstantValue::I8(31));
            let shift_ov = t.builder.load_constant(ConstantValue::I8(30));
            let shift_ca = t.builder.load_constant(ConstantValue::I8(29));
            let so = t.builder.shl(so, shift_so);
            let ov = t.builder.shl(ov, shift_ov);
            let ca = t.builder.shl(ca, shift_ca);
            let merged = t.builder.or(so, ov);
            t.builder.or(merged, ca)
        }
        8 => t.load_lr(),
        9 => t.load_ctr(),
        268 | 269 => t
            .builder
            .load_context(ContextInfo::tb(), ValueType::I64),
        _ => {
            return Err(Error::Translation {
                address: i.address,
                mnemonic: "mfspr",
            })
        }
    };
    t.store_gpr(i.rd(), value);
    Ok(())
}

pub fn mtspr(t: T, i: PpcInstr) -> Result<(), Error> {
    let s = t.load_gpr(i.rs());
    match i.spr() {
        1 => {
            let shift_so = t.builder.load_constant(ConstantValue::I8(31));
            let shift_ov = t.builder.load_constant(ConstantValue::I8(30));
            let shift_ca = t.builder.load_constant(ConstantValue::I8(29));
            let one = t.builder.load_u64(1);
            let so = t.builder.shr(s, shift_so);
            let so = t.builder.and(so, one);
            let so = t.builder.truncate(so, ValueType::I8);
            t.builder.store_context(ContextInfo::xer_so(), so);
            let ov = t.builder.shr(s, shift_ov);
            let ov = t.builder.and(ov, one);
            let ov = t.builder.truncate(ov, ValueType::I8);
            t.builder.store_context(ContextInfo::xer_ov(), ov);
            let ca = t.builder.shr(s, shift_ca);
            let ca = t.builder.and(ca, one);
            let ca = t.builder.truncate(ca, ValueType::I8);
            t.builder.store_context(ContextInfo::xer_ca(), ca);
        }
        8 => t.store_lr(s),
        9 => t.store_ctr(s),
        _ => {
            return Err(Error::Translation {
                address: i.address,
                mnemonic: "mtspr",
            })
        }
    }
    Ok(())
}

pub fn mftb(t: T, i: PpcInstr) -> Result<(), Error> {
    let value = t.builder.load_context(ContextInfo::tb(), ValueType::I64);
    t.store_gpr(i.rd(), value);
    Ok(())
}

/// MSR is not modeled; reads yield the fixed 64-bit-mode image.
pub fn mfmsr(t: T, i: PpcInstr) -> Result<(), Error> {
    let value = t.builder.load_u64(0x8000_0000_0000_0000);
    t.store_gpr(i.rd(), value);
    Ok(())
}

pub fn mtmsrd(t: T, _i: PpcInstr) -> Result<(), Error> {
    t.builder.nop();
    Ok(())
}

// Memory barriers collapse onto the host ordering model; the atomics that
// matter carry acquire/release themselves.

pub fn sync(t: T, _i: PpcInstr) -> Result<(), Error> {
    t.builder.nop();
    Ok(())
}

pub fn eieio(t: T, _i: PpcInstr) -> Result<(), Error> {
    t.builder.nop();
    Ok(())
}

pub fn isync(t: T, _i: PpcInstr) -> Result<(), Error> {
    t.builder.nop();
    Ok(())
}
