//! HIR-to-x86-64 lowering.
//!
//! One entry per opcode; an entry may consume the following instruction
//! too (integer compare feeding the branch right after it fuses into
//! `cmp` + `jcc`). Entries return how many HIR instructions they took so
//! the driver can advance.
//!
//! Integer values keep only their low `ty.bits()` defined; every consumer
//! that is width-sensitive re-extends explicitly. Cross-lane vector
//! operations go through the host vector evaluator so they share one
//! implementation with constant propagation.

use crate::backend::x64::asm::{Cond, Gpr, Xmm};
use crate::backend::x64::emitter::{X64Emitter, CTX, MEMBASE};
use crate::error::Error;
use crate::hir::{instr_flags, InstrId, Opcode, Operand, ValueId, ValueType};

/// Whether lowering this instruction emits a host call (clobbering every
/// caller-saved host register, XMMs included). Only the whole-vector form
/// of `byte_swap` goes through a helper; the scalar forms are inline.
pub fn clobbers_host_state(func: &crate::hir::HirFunction, instr_id: InstrId) -> bool {
    let instr = func.instr(instr_id);
    if instr.opcode == Opcode::ByteSwap {
        return instr
            .dest
            .is_some_and(|dest| func.value(dest).ty == ValueType::V128);
    }
    matches!(
        instr.opcode,
        Opcode::Call
            | Opcode::CallTrue
            | Opcode::CallIndirect
            | Opcode::CallIndirectTrue
            | Opcode::CallExtern
            | Opcode::Trap
            | Opcode::TrapTrue
            | Opcode::DebugBreak
            | Opcode::DebugBreakTrue
            | Opcode::VectorShl
            | Opcode::VectorShr
            | Opcode::VectorSha
            | Opcode::VectorCompareEq
            | Opcode::VectorCompareSgt
            | Opcode::VectorCompareSge
            | Opcode::VectorCompareUgt
            | Opcode::VectorCompareUge
            | Opcode::Permute
            | Opcode::Swizzle
            | Opcode::Splat
            | Opcode::Insert
            | Opcode::Extract
            | Opcode::Pack
            | Opcode::Unpack
            | Opcode::DotProduct3
            | Opcode::DotProduct4
    )
}

fn int_cc(opcode: Opcode) -> Cond {
    match opcode {
        Opcode::CompareEq => Cond::E,
        Opcode::CompareNe => Cond::Ne,
        Opcode::CompareSlt => Cond::L,
        Opcode::CompareSle => Cond::Le,
        Opcode::CompareSgt => Cond::G,
        Opcode::CompareSge => Cond::Ge,
        Opcode::CompareUlt => Cond::B,
        Opcode::CompareUle => Cond::Be,
        Opcode::CompareUgt => Cond::A,
        _ => Cond::Ae,
    }
}

fn invert(cond: Cond) -> Cond {
    // Condition codes pair up even/odd as inverses.
    unsafe { std::mem::transmute((cond as u8) ^ 1) }
}

fn is_signed_compare(opcode: Opcode) -> bool {
    matches!(
        opcode,
        Opcode::CompareSlt | Opcode::CompareSle | Opcode::CompareSgt | Opcode::CompareSge
    )
}

fn value_op(e: &X64Emitter, instr: InstrId, slot: usize) -> ValueId {
    e.func.instr(instr).srcs[slot].value().unwrap()
}

fn offset_op(e: &X64Emitter, instr: InstrId, slot: usize) -> u64 {
    e.func.instr(instr).srcs[slot].offset().unwrap()
}

/// Loads the i8 condition operand and sets ZF from it.
fn test_condition(e: &mut X64Emitter, cond: ValueId) {
    e.load_int(cond, Gpr::Rax);
    e.asm.movzx8_rr(Gpr::Rax, Gpr::Rax);
    e.asm.test_rr(Gpr::Rax, Gpr::Rax);
}

/// The helper-call sequence for cross-lane vector operations: operands go
/// to the scratch slots, the packed op word selects the evaluation.
fn lower_vector_helper(
    e: &mut X64Emitter,
    instr_id: InstrId,
    imm: u64,
) -> Result<(), Error> {
    let instr = e.func.instr(instr_id);
    let opcode = instr.opcode;
    let flags = instr.flags;
    let sig = opcode.info().sig;
    let dest = instr.dest;

    // Stage value operands into slots 0..3 (pre-push offsets).
    for slot in 0..3 {
        if sig.srcs[slot] != crate::hir::OperandKind::V {
            continue;
        }
        let value = value_op(e, instr_id, slot);
        let (base, disp) = e.scratch_addr(slot as i32, false);
        if e.ty(value).is_int() {
            e.load_int(value, Gpr::Rcx);
            e.asm.mov_mr(base, disp, Gpr::Rcx);
        } else {
            e.load_xmm(value, Xmm(0));
            e.asm.movdqu_mx(base, disp, Xmm(0));
        }
    }

    let packed = opcode as u64 | ((flags as u64) << 16) | (imm << 32);
    e.begin_host_call();
    e.asm.mov_ri(Gpr::Rax, e.helpers.vector_op as u64);
    e.asm.mov_ri(Gpr::Rdi, packed);
    let (base, disp) = e.scratch_addr(0, true);
    e.asm.lea(Gpr::Rsi, base, disp);
    let (base, disp) = e.scratch_addr(1, true);
    e.asm.lea(Gpr::Rdx, base, disp);
    let (base, disp) = e.scratch_addr(2, true);
    e.asm.lea(Gpr::Rcx, base, disp);
    let (base, disp) = e.scratch_addr(3, true);
    e.asm.lea(Gpr::R8, base, disp);
    e.asm.call_reg(Gpr::Rax);
    e.end_host_call();

    if let Some(dest) = dest {
        let (base, disp) = e.scratch_addr(3, false);
        match e.ty(dest) {
            ValueType::V128 => {
                e.asm.movdqu_xm(Xmm(0), base, disp);
                e.store_xmm(dest, Xmm(0));
            }
            ValueType::F32 | ValueType::F64 => {
                e.asm.movsd_xm(Xmm(0), base, disp);
                e.store_xmm(dest, Xmm(0));
            }
            _ => {
                e.asm.mov_rm(Gpr::Rax, base, disp);
                e.store_int(dest, Gpr::Rax);
            }
        }
    }
    Ok(())
}

fn lower_guest_call_target(e: &mut X64Emitter, target: u64) {
    e.asm.mov_ri(Gpr::Rdx, target);
    let helper = e.helpers.resolve_and_call;
    e.host_call_ctx(helper, Some(Gpr::Rdx));
}

fn lower_load(e: &mut X64Emitter, instr_id: InstrId) -> Result<(), Error> {
    let dest = e.func.instr(instr_id).dest.unwrap();
    let address = value_op(e, instr_id, 0);
    e.load_int(address, Gpr::Rax);
    e.asm.add_rr(Gpr::Rax, MEMBASE);
    match e.ty(dest) {
        ValueType::I8 => {
            e.asm.movzx8_rm(Gpr::Rcx, Gpr::Rax, 0);
            e.store_int(dest, Gpr::Rcx);
        }
        ValueType::I16 => {
            e.asm.movzx16_rm(Gpr::Rcx, Gpr::Rax, 0);
            e.store_int(dest, Gpr::Rcx);
        }
        ValueType::I32 => {
            e.asm.mov_rm32(Gpr::Rcx, Gpr::Rax, 0);
            e.store_int(dest, Gpr::Rcx);
        }
        ValueType::I64 => {
            e.asm.mov_rm(Gpr::Rcx, Gpr::Rax, 0);
            e.store_int(dest, Gpr::Rcx);
        }
        ValueType::F32 => {
            e.asm.movss_xm(Xmm(0), Gpr::Rax, 0);
            e.store_xmm(dest, Xmm(0));
        }
        ValueType::F64 => {
            e.asm.movsd_xm(Xmm(0), Gpr::Rax, 0);
            e.store_xmm(dest, Xmm(0));
        }
        ValueType::V128 => {
            e.asm.movdqu_xm(Xmm(0), Gpr::Rax, 0);
            e.store_xmm(dest, Xmm(0));
        }
    }
    Ok(())
}

fn lower_store(e: &mut X64Emitter, instr_id: InstrId) -> Result<(), Error> {
    let address = value_op(e, instr_id, 0);
    let value = value_op(e, instr_id, 1);
    let ty = e.ty(value);
    if ty.is_int() {
        e.load_int(value, Gpr::Rcx);
    } else {
        e.load_xmm(value, Xmm(0));
    }
    e.load_int(address, Gpr::Rax);
    e.asm.add_rr(Gpr::Rax, MEMBASE);
    match ty {
        ValueType::I8 => e.asm.mov_mr8(Gpr::Rax, 0, Gpr::Rcx),
        ValueType::I16 => e.asm.mov_mr16(Gpr::Rax, 0, Gpr::Rcx),
        ValueType::I32 => e.asm.mov_mr32(Gpr::Rax, 0, Gpr::Rcx),
        ValueType::I64 => e.asm.mov_mr(Gpr::Rax, 0, Gpr::Rcx),
        ValueType::F32 => e.asm.movss_mx(Gpr::Rax, 0, Xmm(0)),
        ValueType::F64 => e.asm.movsd_mx(Gpr::Rax, 0, Xmm(0)),
        ValueType::V128 => e.asm.movdqu_mx(Gpr::Rax, 0, Xmm(0)),
    }
    Ok(())
}

fn lower_load_context(e: &mut X64Emitter, instr_id: InstrId) -> Result<(), Error> {
    let dest = e.func.instr(instr_id).dest.unwrap();
    let offset = offset_op(e, instr_id, 0) as i32;
    match e.ty(dest) {
        ValueType::I8 => {
            e.asm.movzx8_rm(Gpr::Rax, CTX, offset);
            e.store_int(dest, Gpr::Rax);
        }
        ValueType::I16 => {
            e.asm.movzx16_rm(Gpr::Rax, CTX, offset);
            e.store_int(dest, Gpr::Rax);
        }
        ValueType::I32 => {
            e.asm.mov_rm32(Gpr::Rax, CTX, offset);
            e.store_int(dest, Gpr::Rax);
        }
        ValueType::I64 => {
            e.asm.mov_rm(Gpr::Rax, CTX, offset);
            e.store_int(dest, Gpr::Rax);
        }
        ValueType::F32 => {
            e.asm.movss_xm(Xmm(0), CTX, offset);
            e.store_xmm(dest, Xmm(0));
        }
        ValueType::F64 => {
            e.asm.movsd_xm(Xmm(0), CTX, offset);
            e.store_xmm(dest, Xmm(0));
        }
        ValueType::V128 => {
            e.asm.movdqu_xm(Xmm(0), CTX, offset);
            e.store_xmm(dest, Xmm(0));
        }
    }
    Ok(())
}

fn lower_store_context(e: &mut X64Emitter, instr_id: InstrId) -> Result<(), Error> {
    let offset = offset_op(e, instr_id, 0) as i32;
    let value = value_op(e, instr_id, 1);
    match e.ty(value) {
        ValueType::I8 => {
            e.load_int(value, Gpr::Rax);
            e.asm.mov_mr8(CTX, offset, Gpr::Rax);
        }
        ValueType::I16 => {
            e.load_int(value, Gpr::Rax);
            e.asm.mov_mr16(CTX, offset, Gpr::Rax);
        }
        ValueType::I32 => {
            e.load_int(value, Gpr::Rax);
            e.asm.mov_mr32(CTX, offset, Gpr::Rax);
        }
        ValueType::I64 => {
            e.load_int(value, Gpr::Rax);
            e.asm.mov_mr(CTX, offset, Gpr::Rax);
        }
        ValueType::F32 => {
            e.load_xmm(value, Xmm(0));
            e.asm.movss_mx(CTX, offset, Xmm(0));
        }
        ValueType::F64 => {
            e.load_xmm(value, Xmm(0));
            e.asm.movsd_mx(CTX, offset, Xmm(0));
        }
        ValueType::V128 => {
            e.load_xmm(value, Xmm(0));
            e.asm.movdqu_mx(CTX, offset, Xmm(0));
        }
    }
    Ok(())
}

fn lower_int_compare(e: &mut X64Emitter, instr_id: InstrId) -> Cond {
    let opcode = e.func.instr(instr_id).opcode;
    let a = value_op(e, instr_id, 0);
    let b = value_op(e, instr_id, 1);
    let ty = e.ty(a);
    let signed = is_signed_compare(opcode);
    e.load_int(a, Gpr::Rax);
    e.extend_to_64(Gpr::Rax, ty, signed);
    e.load_int(b, Gpr::Rcx);
    e.extend_to_64(Gpr::Rcx, ty, signed);
    e.asm.cmp_rr(Gpr::Rax, Gpr::Rcx);
    int_cc(opcode)
}

fn lower_float_compare(e: &mut X64Emitter, instr_id: InstrId) -> Result<Cond, Error> {
    let opcode = e.func.instr(instr_id).opcode;
    let a = value_op(e, instr_id, 0);
    let b = value_op(e, instr_id, 1);
    let wide = e.ty(a) == ValueType::F64;
    e.load_xmm(a, Xmm(0));
    e.load_xmm(b, Xmm(1));
    // NaN operands must make the ordered comparisons false; arranging the
    // operand order lets a single CF/ZF condition do that.
    let (first, second, cond) = match opcode {
        Opcode::CompareEq | Opcode::CompareNe => (Xmm(0), Xmm(1), Cond::E),
        Opcode::CompareSlt | Opcode::CompareUlt => (Xmm(1), Xmm(0), Cond::A),
        Opcode::CompareSle | Opcode::CompareUle => (Xmm(1), Xmm(0), Cond::Ae),
        Opcode::CompareSgt | Opcode::CompareUgt => (Xmm(0), Xmm(1), Cond::A),
        Opcode::CompareSge | Opcode::CompareUge => (Xmm(0), Xmm(1), Cond::Ae),
        _ => return Err(e.emit_error("bad float compare")),
    };
    if wide {
        e.asm.ucomisd(first, second);
    } else {
        e.asm.ucomiss(first, second);
    }
    Ok(cond)
}

/// Emits the boolean result of a comparison whose flags are already set.
fn emit_setcc_result(e: &mut X64Emitter, dest: ValueId, cond: Cond, float_eq_ne: Option<Opcode>) {
    match float_eq_ne {
        Some(Opcode::CompareEq) => {
            e.asm.setcc(Cond::E, Gpr::Rax);
            e.asm.setcc(Cond::Np, Gpr::Rcx);
            e.asm.movzx8_rr(Gpr::Rax, Gpr::Rax);
            e.asm.movzx8_rr(Gpr::Rcx, Gpr::Rcx);
            e.asm.and_rr(Gpr::Rax, Gpr::Rcx);
        }
        Some(Opcode::CompareNe) => {
            e.asm.setcc(Cond::Ne, Gpr::Rax);
            e.asm.setcc(Cond::P, Gpr::Rcx);
            e.asm.movzx8_rr(Gpr::Rax, Gpr::Rax);
            e.asm.movzx8_rr(Gpr::Rcx, Gpr::Rcx);
            e.asm.or_rr(Gpr::Rax, Gpr::Rcx);
        }
        _ => {
            e.asm.setcc(cond, Gpr::Rax);
            e.asm.movzx8_rr(Gpr::Rax, Gpr::Rax);
        }
    }
    e.store_int(dest, Gpr::Rax);
}

fn branch_target_label(
    e: &mut X64Emitter,
    instr_id: InstrId,
    slot: usize,
) -> Result<crate::backend::x64::asm::AsmLabel, Error> {
    let label = e.func.instr(instr_id).srcs[slot]
        .label()
        .ok_or_else(|| e.emit_error("branch without label"))?;
    let block = e
        .func
        .label_block(label)
        .ok_or_else(|| e.emit_error("unbound HIR label"))?;
    Ok(e.block_label(block.0))
}

fn min_value_for(ty: ValueType) -> u64 {
    match ty {
        ValueType::I8 => i8::MIN as i64 as u64,
        ValueType::I16 => i16::MIN as i64 as u64,
        ValueType::I32 => i32::MIN as i64 as u64,
        _ => i64::MIN as u64,
    }
}

fn lower_div_rem(e: &mut X64Emitter, instr_id: InstrId, want_rem: bool) -> Result<(), Error> {
    let instr = e.func.instr(instr_id);
    let dest = instr.dest.unwrap();
    let unsigned = instr.flags & instr_flags::ARITHMETIC_UNSIGNED != 0;
    let a = value_op(e, instr_id, 0);
    let b = value_op(e, instr_id, 1);
    let ty = e.ty(a);

    if ty.is_float() {
        e.load_xmm(a, Xmm(0));
        e.load_xmm(b, Xmm(1));
        if ty == ValueType::F64 {
            e.asm.divsd(Xmm(0), Xmm(1));
        } else {
            e.asm.divss(Xmm(0), Xmm(1));
        }
        e.store_xmm(dest, Xmm(0));
        return Ok(());
    }
    if ty.is_vec() {
        e.load_xmm(a, Xmm(0));
        e.load_xmm(b, Xmm(1));
        e.asm.divps(Xmm(0), Xmm(1));
        e.store_xmm(dest, Xmm(0));
        return Ok(());
    }

    let zero_case = e.asm.new_label();
    let do_divide = e.asm.new_label();
    let done = e.asm.new_label();

    e.load_int(b, Gpr::Rcx);
    e.extend_to_64(Gpr::Rcx, ty, !unsigned);
    e.asm.test_rr(Gpr::Rcx, Gpr::Rcx);
    e.asm.jcc(Cond::E, zero_case);
    e.load_int(a, Gpr::Rax);
    e.extend_to_64(Gpr::Rax, ty, !unsigned);
    if unsigned {
        e.asm.xor_rr32(Gpr::Rdx, Gpr::Rdx);
        e.asm.div(Gpr::Rcx);
    } else {
        // The overflow quirk: MIN / -1 also produces 0.
        e.asm.cmp_ri(Gpr::Rcx, -1);
        e.asm.jcc(Cond::Ne, do_divide);
        e.asm.mov_ri(Gpr::Rdx, min_value_for(ty));
        e.asm.cmp_rr(Gpr::Rax, Gpr::Rdx);
        e.asm.jcc(Cond::E, zero_case);
        e.asm.bind(do_divide);
        e.asm.cqo();
        e.asm.idiv(Gpr::Rcx);
    }
    e.asm.jmp(done);
    e.asm.bind(zero_case);
    e.asm.xor_rr32(Gpr::Rax, Gpr::Rax);
    e.asm.xor_rr32(Gpr::Rdx, Gpr::Rdx);
    e.asm.bind(done);
    e.store_int(dest, if want_rem { Gpr::Rdx } else { Gpr::Rax });
    Ok(())
}

/// Lowers one instruction (possibly fusing the next); returns how many
/// HIR instructions were consumed.
pub fn lower_instr(
    e: &mut X64Emitter,
    instr_id: InstrId,
    next: Option<InstrId>,
) -> Result<usize, Error> {
    let instr = e.func.instr(instr_id);
    let opcode = instr.opcode;
    let flags = instr.flags;
    let dest = instr.dest;

    match opcode {
        Opcode::Comment | Opcode::Nop => {}
        Opcode::SourceOffset => {
            let pc = offset_op(e, instr_id, 0) as u32;
            let ordinal = e.func.instr(instr_id).ordinal;
            e.record_source_offset(pc, ordinal);
        }

        Opcode::DebugBreak => {
            let helper = e.helpers.debug_break;
            e.host_call_ctx(helper, None);
        }
        Opcode::DebugBreakTrue => {
            let cond = value_op(e, instr_id, 0);
            let skip = e.asm.new_label();
            test_condition(e, cond);
            e.asm.jcc(Cond::E, skip);
            let helper = e.helpers.debug_break;
            e.host_call_ctx(helper, None);
            e.asm.bind(skip);
        }
        Opcode::Trap => {
            e.asm.mov_ri(Gpr::Rdx, flags as u64);
            let helper = e.helpers.trap;
            e.host_call_ctx(helper, Some(Gpr::Rdx));
        }
        Opcode::TrapTrue => {
            let cond = value_op(e, instr_id, 0);
            let skip = e.asm.new_label();
            test_condition(e, cond);
            e.asm.jcc(Cond::E, skip);
            e.asm.mov_ri(Gpr::Rdx, flags as u64);
            let helper = e.helpers.trap;
            e.host_call_ctx(helper, Some(Gpr::Rdx));
            e.asm.bind(skip);
        }

        Opcode::Call => {
            let target = e.func.instr(instr_id).srcs[0].symbol().unwrap();
            lower_guest_call_target(e, target as u64);
        }
        Opcode::CallTrue => {
            let cond = value_op(e, instr_id, 0);
            let target = e.func.instr(instr_id).srcs[1].symbol().unwrap();
            let skip = e.asm.new_label();
            test_condition(e, cond);
            e.asm.jcc(Cond::E, skip);
            lower_guest_call_target(e, target as u64);
            e.asm.bind(skip);
        }
        Opcode::CallIndirect => {
            let target = value_op(e, instr_id, 0);
            e.load_int(target, Gpr::Rdx);
            let helper = e.helpers.resolve_and_call;
            e.host_call_ctx(helper, Some(Gpr::Rdx));
        }
        Opcode::CallIndirectTrue => {
            let cond = value_op(e, instr_id, 0);
            let target = value_op(e, instr_id, 1);
            let skip = e.asm.new_label();
            test_condition(e, cond);
            e.asm.jcc(Cond::E, skip);
            e.load_int(target, Gpr::Rdx);
            let helper = e.helpers.resolve_and_call;
            e.host_call_ctx(helper, Some(Gpr::Rdx));
            e.asm.bind(skip);
        }
        Opcode::CallExtern => {
            let target = e.func.instr(instr_id).srcs[0].symbol().unwrap();
            e.asm.mov_ri(Gpr::Rdx, target as u64);
            let helper = e.helpers.call_extern;
            e.host_call_ctx(helper, Some(Gpr::Rdx));
        }
        Opcode::Return => {
            let epilogue = e.epilogue;
            e.asm.jmp(epilogue);
        }

        Opcode::Branch => {
            let label = branch_target_label(e, instr_id, 0)?;
            e.asm.jmp(label);
        }
        Opcode::BranchIf => {
            let cond = value_op(e, instr_id, 0);
            let if_true = branch_target_label(e, instr_id, 1)?;
            let if_false = branch_target_label(e, instr_id, 2)?;
            test_condition(e, cond);
            e.asm.jcc(Cond::Ne, if_true);
            e.asm.jmp(if_false);
        }
        Opcode::BranchTrue => {
            let cond = value_op(e, instr_id, 0);
            let label = branch_target_label(e, instr_id, 1)?;
            test_condition(e, cond);
            e.asm.jcc(Cond::Ne, label);
        }
        Opcode::BranchFalse => {
            let cond = value_op(e, instr_id, 0);
            let label = branch_target_label(e, instr_id, 1)?;
            test_condition(e, cond);
            e.asm.jcc(Cond::E, label);
        }

        Opcode::Assign => {
            let dest = dest.unwrap();
            let src = value_op(e, instr_id, 0);
            if e.ty(dest).is_int() {
                e.load_int(src, Gpr::Rax);
                e.store_int(dest, Gpr::Rax);
            } else {
                e.load_xmm(src, Xmm(0));
                e.store_xmm(dest, Xmm(0));
            }
        }
        Opcode::Cast => {
            let dest = dest.unwrap();
            let src = value_op(e, instr_id, 0);
            let from_int = e.ty(src).is_int();
            let to_int = e.ty(dest).is_int();
            match (from_int, to_int) {
                (true, false) => {
                    e.load_int(src, Gpr::Rax);
                    e.asm.movq_xr(Xmm(0), Gpr::Rax);
                    e.store_xmm(dest, Xmm(0));
                }
                (false, true) => {
                    e.load_xmm(src, Xmm(0));
                    e.asm.movq_rx(Gpr::Rax, Xmm(0));
                    e.store_int(dest, Gpr::Rax);
                }
                (true, true) => {
                    e.load_int(src, Gpr::Rax);
                    e.store_int(dest, Gpr::Rax);
                }
                (false, false) => {
                    e.load_xmm(src, Xmm(0));
                    e.store_xmm(dest, Xmm(0));
                }
            }
        }
        Opcode::ZeroExtend | Opcode::SignExtend => {
            let dest = dest.unwrap();
            let src = value_op(e, instr_id, 0);
            let src_ty = e.ty(src);
            e.load_int(src, Gpr::Rax);
            e.extend_to_64(Gpr::Rax, src_ty, opcode == Opcode::SignExtend);
            e.store_int(dest, Gpr::Rax);
        }
        Opcode::Truncate => {
            let dest = dest.unwrap();
            let src = value_op(e, instr_id, 0);
            e.load_int(src, Gpr::Rax);
            e.store_int(dest, Gpr::Rax);
        }
        Opcode::Convert => {
            lower_convert(e, instr_id)?;
        }
        Opcode::Round => {
            let dest = dest.unwrap();
            let src = value_op(e, instr_id, 0);
            let mode = if flags & 1 != 0 { 0x0 } else { 0x3 };
            e.load_xmm(src, Xmm(0));
            if e.ty(src) == ValueType::F64 {
                e.asm.roundsd(Xmm(0), Xmm(0), mode);
            } else {
                e.asm.roundss(Xmm(0), Xmm(0), mode);
            }
            e.store_xmm(dest, Xmm(0));
        }
        Opcode::VectorConvertI2F => {
            let dest = dest.unwrap();
            let src = value_op(e, instr_id, 0);
            e.load_xmm(src, Xmm(0));
            e.asm.cvtdq2ps(Xmm(0), Xmm(0));
            e.store_xmm(dest, Xmm(0));
        }
        Opcode::VectorConvertF2I => {
            let dest = dest.unwrap();
            let src = value_op(e, instr_id, 0);
            e.load_xmm(src, Xmm(0));
            e.asm.cvttps2dq(Xmm(0), Xmm(0));
            e.store_xmm(dest, Xmm(0));
        }

        Opcode::LoadContext => lower_load_context(e, instr_id)?,
        Opcode::StoreContext => lower_store_context(e, instr_id)?,
        Opcode::LoadLocal => {
            let dest = dest.unwrap();
            let slot = offset_op(e, instr_id, 0);
            let (base, disp) = e.local_addr(slot);
            match e.ty(dest) {
                ValueType::V128 => {
                    e.asm.movdqu_xm(Xmm(0), base, disp);
                    e.store_xmm(dest, Xmm(0));
                }
                ValueType::F32 | ValueType::F64 => {
                    e.asm.movsd_xm(Xmm(0), base, disp);
                    e.store_xmm(dest, Xmm(0));
                }
                _ => {
                    e.asm.mov_rm(Gpr::Rax, base, disp);
                    e.store_int(dest, Gpr::Rax);
                }
            }
        }
        Opcode::StoreLocal => {
            let slot = offset_op(e, instr_id, 0);
            let value = value_op(e, instr_id, 1);
            let (base, disp) = e.local_addr(slot);
            match e.ty(value) {
                ValueType::V128 => {
                    e.load_xmm(value, Xmm(0));
                    e.asm.movdqu_mx(base, disp, Xmm(0));
                }
                ValueType::F32 | ValueType::F64 => {
                    e.load_xmm(value, Xmm(0));
                    e.asm.movsd_mx(base, disp, Xmm(0));
                }
                _ => {
                    e.load_int(value, Gpr::Rax);
                    e.asm.mov_mr(base, disp, Gpr::Rax);
                }
            }
        }

        Opcode::Load | Opcode::LoadAcquire => lower_load(e, instr_id)?,
        Opcode::Store => lower_store(e, instr_id)?,
        Opcode::Prefetch => {
            let address = value_op(e, instr_id, 0);
            e.load_int(address, Gpr::Rax);
            e.asm.add_rr(Gpr::Rax, MEMBASE);
            e.asm.prefetch0(Gpr::Rax, 0);
        }

        Opcode::Max | Opcode::Min => {
            let dest = dest.unwrap();
            let a = value_op(e, instr_id, 0);
            let b = value_op(e, instr_id, 1);
            let ty = e.ty(a);
            let is_max = opcode == Opcode::Max;
            match ty {
                ValueType::V128 => {
                    e.load_xmm(a, Xmm(0));
                    e.load_xmm(b, Xmm(1));
                    if is_max {
                        e.asm.maxps(Xmm(0), Xmm(1));
                    } else {
                        e.asm.minps(Xmm(0), Xmm(1));
                    }
                    e.store_xmm(dest, Xmm(0));
                }
                ValueType::F64 => {
                    e.load_xmm(a, Xmm(0));
                    e.load_xmm(b, Xmm(1));
                    if is_max {
                        e.asm.maxsd(Xmm(0), Xmm(1));
                    } else {
                        e.asm.minsd(Xmm(0), Xmm(1));
                    }
                    e.store_xmm(dest, Xmm(0));
                }
                ValueType::F32 => {
                    e.load_xmm(a, Xmm(0));
                    e.load_xmm(b, Xmm(1));
                    if is_max {
                        e.asm.maxss(Xmm(0), Xmm(1));
                    } else {
                        e.asm.minss(Xmm(0), Xmm(1));
                    }
                    e.store_xmm(dest, Xmm(0));
                }
                _ => {
                    e.load_int(a, Gpr::Rax);
                    e.extend_to_64(Gpr::Rax, ty, true);
                    e.load_int(b, Gpr::Rcx);
                    e.extend_to_64(Gpr::Rcx, ty, true);
                    e.asm.cmp_rr(Gpr::Rax, Gpr::Rcx);
                    let cond = if is_max { Cond::L } else { Cond::G };
                    e.asm.cmovcc(cond, Gpr::Rax, Gpr::Rcx);
                    e.store_int(dest, Gpr::Rax);
                }
            }
        }
        Opcode::Select => {
            let dest = dest.unwrap();
            let cond = value_op(e, instr_id, 0);
            let if_true = value_op(e, instr_id, 1);
            let if_false = value_op(e, instr_id, 2);
            if e.ty(dest).is_int() {
                e.load_int(if_false, Gpr::Rcx);
                e.load_int(if_true, Gpr::Rdx);
                test_condition(e, cond);
                e.asm.cmovcc(Cond::Ne, Gpr::Rcx, Gpr::Rdx);
                e.store_int(dest, Gpr::Rcx);
            } else {
                let use_true = e.asm.new_label();
                let done = e.asm.new_label();
                test_condition(e, cond);
                e.asm.jcc(Cond::Ne, use_true);
                e.load_xmm(if_false, Xmm(0));
                e.asm.jmp(done);
                e.asm.bind(use_true);
                e.load_xmm(if_true, Xmm(0));
                e.asm.bind(done);
                e.store_xmm(dest, Xmm(0));
            }
        }
        Opcode::IsTrue | Opcode::IsFalse => {
            let dest = dest.unwrap();
            let src = value_op(e, instr_id, 0);
            let ty = e.ty(src);
            if ty == ValueType::V128 {
                e.load_xmm(src, Xmm(0));
                let (base, disp) = e.scratch_addr(3, false);
                e.asm.movdqu_mx(base, disp, Xmm(0));
                e.asm.mov_rm(Gpr::Rax, base, disp);
                e.asm.mov_rm(Gpr::Rcx, base, disp + 8);
                e.asm.or_rr(Gpr::Rax, Gpr::Rcx);
            } else {
                e.load_int(src, Gpr::Rax);
                e.extend_to_64(Gpr::Rax, ty, false);
            }
            e.asm.test_rr(Gpr::Rax, Gpr::Rax);
            let cond = if opcode == Opcode::IsTrue {
                Cond::Ne
            } else {
                Cond::E
            };
            e.asm.setcc(cond, Gpr::Rax);
            e.asm.movzx8_rr(Gpr::Rax, Gpr::Rax);
            e.store_int(dest, Gpr::Rax);
        }

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
            let dest = dest.unwrap();
            let a = value_op(e, instr_id, 0);
            if e.ty(a).is_float() {
                let cond = lower_float_compare(e, instr_id)?;
                let eq_ne = matches!(opcode, Opcode::CompareEq | Opcode::CompareNe)
                    .then_some(opcode);
                emit_setcc_result(e, dest, cond, eq_ne);
            } else {
                // Fuse compare + branch when the branch right after is the
                // only consumer.
                if let Some(next_id) = next {
                    let next_instr = e.func.instr(next_id);
                    let fusable = matches!(
                        next_instr.opcode,
                        Opcode::BranchTrue | Opcode::BranchFalse
                    ) && next_instr.srcs[0] == Operand::Value(dest)
                        && e.func.uses_of(dest).len() == 1;
                    if fusable {
                        let branch_op = next_instr.opcode;
                        let cond = lower_int_compare(e, instr_id);
                        let cond = if branch_op == Opcode::BranchFalse {
                            invert(cond)
                        } else {
                            cond
                        };
                        let label = branch_target_label(e, next_id, 1)?;
                        e.asm.jcc(cond, label);
                        return Ok(2);
                    }
                }
                let cond = lower_int_compare(e, instr_id);
                emit_setcc_result(e, dest, cond, None);
            }
        }

        Opcode::DidCarry | Opcode::DidOverflow | Opcode::StoreRelease => {
            return Err(e.emit_error(format!("unimplemented opcode {}", opcode.name())));
        }

        Opcode::VectorCompareEq
        | Opcode::VectorCompareSgt
        | Opcode::VectorCompareSge
        | Opcode::VectorCompareUgt
        | Opcode::VectorCompareUge
        | Opcode::VectorShl
        | Opcode::VectorShr
        | Opcode::VectorSha
        | Opcode::Permute
        | Opcode::Pack
        | Opcode::Unpack
        | Opcode::Splat
        | Opcode::DotProduct3
        | Opcode::DotProduct4 => {
            lower_vector_helper(e, instr_id, 0)?;
        }
        Opcode::Swizzle | Opcode::Extract | Opcode::Insert => {
            let imm = offset_op(e, instr_id, 1);
            lower_vector_helper(e, instr_id, imm)?;
        }
        Opcode::ByteSwap if e.ty(dest.unwrap()) == ValueType::V128 => {
            lower_vector_helper(e, instr_id, 0)?;
        }

        Opcode::Add | Opcode::Sub | Opcode::And | Opcode::Or | Opcode::Xor => {
            let dest = dest.unwrap();
            let a = value_op(e, instr_id, 0);
            let b = value_op(e, instr_id, 1);
            match e.ty(a) {
                ValueType::V128 => {
                    e.load_xmm(a, Xmm(0));
                    e.load_xmm(b, Xmm(1));
                    match opcode {
                        Opcode::Add => e.asm.addps(Xmm(0), Xmm(1)),
                        Opcode::Sub => e.asm.subps(Xmm(0), Xmm(1)),
                        Opcode::And => e.asm.pand(Xmm(0), Xmm(1)),
                        Opcode::Or => e.asm.por(Xmm(0), Xmm(1)),
                        _ => e.asm.pxor(Xmm(0), Xmm(1)),
                    }
                    e.store_xmm(dest, Xmm(0));
                }
                ValueType::F64 => {
                    e.load_xmm(a, Xmm(0));
                    e.load_xmm(b, Xmm(1));
                    match opcode {
                        Opcode::Add => e.asm.addsd(Xmm(0), Xmm(1)),
                        Opcode::Sub => e.asm.subsd(Xmm(0), Xmm(1)),
                        _ => return Err(e.emit_error("float bitwise op")),
                    }
                    e.store_xmm(dest, Xmm(0));
                }
                ValueType::F32 => {
                    e.load_xmm(a, Xmm(0));
                    e.load_xmm(b, Xmm(1));
                    match opcode {
                        Opcode::Add => e.asm.addss(Xmm(0), Xmm(1)),
                        Opcode::Sub => e.asm.subss(Xmm(0), Xmm(1)),
                        _ => return Err(e.emit_error("float bitwise op")),
                    }
                    e.store_xmm(dest, Xmm(0));
                }
                _ => {
                    e.load_int(a, Gpr::Rax);
                    e.load_int(b, Gpr::Rcx);
                    match opcode {
                        Opcode::Add => e.asm.add_rr(Gpr::Rax, Gpr::Rcx),
                        Opcode::Sub => e.asm.sub_rr(Gpr::Rax, Gpr::Rcx),
                        Opcode::And => e.asm.and_rr(Gpr::Rax, Gpr::Rcx),
                        Opcode::Or => e.asm.or_rr(Gpr::Rax, Gpr::Rcx),
                        _ => e.asm.xor_rr(Gpr::Rax, Gpr::Rcx),
                    }
                    e.store_int(dest, Gpr::Rax);
                }
            }
        }
        Opcode::AddCarry => {
            let dest = dest.unwrap();
            let a = value_op(e, instr_id, 0);
            let b = value_op(e, instr_id, 1);
            let carry = value_op(e, instr_id, 2);
            e.load_int(a, Gpr::Rax);
            e.load_int(b, Gpr::Rcx);
            e.asm.add_rr(Gpr::Rax, Gpr::Rcx);
            e.load_int(carry, Gpr::Rcx);
            e.asm.movzx8_rr(Gpr::Rcx, Gpr::Rcx);
            e.asm.add_rr(Gpr::Rax, Gpr::Rcx);
            e.store_int(dest, Gpr::Rax);
        }
        Opcode::Mul => {
            let dest = dest.unwrap();
            let a = value_op(e, instr_id, 0);
            let b = value_op(e, instr_id, 1);
            match e.ty(a) {
                ValueType::V128 => {
                    e.load_xmm(a, Xmm(0));
                    e.load_xmm(b, Xmm(1));
                    e.asm.mulps(Xmm(0), Xmm(1));
                    e.store_xmm(dest, Xmm(0));
                }
                ValueType::F64 => {
                    e.load_xmm(a, Xmm(0));
                    e.load_xmm(b, Xmm(1));
                    e.asm.mulsd(Xmm(0), Xmm(1));
                    e.store_xmm(dest, Xmm(0));
                }
                ValueType::F32 => {
                    e.load_xmm(a, Xmm(0));
                    e.load_xmm(b, Xmm(1));
                    e.asm.mulss(Xmm(0), Xmm(1));
                    e.store_xmm(dest, Xmm(0));
                }
                _ => {
                    e.load_int(a, Gpr::Rax);
                    e.load_int(b, Gpr::Rcx);
                    e.asm.imul_rr(Gpr::Rax, Gpr::Rcx);
                    e.store_int(dest, Gpr::Rax);
                }
            }
        }
        Opcode::MulHi => {
            let dest = dest.unwrap();
            let unsigned = flags & instr_flags::ARITHMETIC_UNSIGNED != 0;
            let a = value_op(e, instr_id, 0);
            let b = value_op(e, instr_id, 1);
            let ty = e.ty(a);
            e.load_int(a, Gpr::Rax);
            e.load_int(b, Gpr::Rcx);
            if ty == ValueType::I64 {
                if unsigned {
                    e.asm.mul(Gpr::Rcx);
                } else {
                    e.asm.imul(Gpr::Rcx);
                }
                e.store_int(dest, Gpr::Rdx);
            } else {
                e.extend_to_64(Gpr::Rax, ty, !unsigned);
                e.extend_to_64(Gpr::Rcx, ty, !unsigned);
                e.asm.imul_rr(Gpr::Rax, Gpr::Rcx);
                if unsigned {
                    e.asm.shr_imm(Gpr::Rax, ty.bits() as u8);
                } else {
                    e.asm.sar_imm(Gpr::Rax, ty.bits() as u8);
                }
                e.store_int(dest, Gpr::Rax);
            }
        }
        Opcode::Div => lower_div_rem(e, instr_id, false)?,
        Opcode::Rem => lower_div_rem(e, instr_id, true)?,
        Opcode::MulAdd | Opcode::MulSub => {
            let dest = dest.unwrap();
            let a = value_op(e, instr_id, 0);
            let b = value_op(e, instr_id, 1);
            let c = value_op(e, instr_id, 2);
            let sub = opcode == Opcode::MulSub;
            match e.ty(a) {
                ValueType::V128 => {
                    e.load_xmm(a, Xmm(0));
                    e.load_xmm(b, Xmm(1));
                    e.load_xmm(c, Xmm(2));
                    e.asm.mulps(Xmm(0), Xmm(1));
                    if sub {
                        e.asm.subps(Xmm(0), Xmm(2));
                    } else {
                        e.asm.addps(Xmm(0), Xmm(2));
                    }
                    e.store_xmm(dest, Xmm(0));
                }
                ValueType::F64 => {
                    e.load_xmm(a, Xmm(0));
                    e.load_xmm(b, Xmm(1));
                    e.load_xmm(c, Xmm(2));
                    e.asm.mulsd(Xmm(0), Xmm(1));
                    if sub {
                        e.asm.subsd(Xmm(0), Xmm(2));
                    } else {
                        e.asm.addsd(Xmm(0), Xmm(2));
                    }
                    e.store_xmm(dest, Xmm(0));
                }
                ValueType::F32 => {
                    e.load_xmm(a, Xmm(0));
                    e.load_xmm(b, Xmm(1));
                    e.load_xmm(c, Xmm(2));
                    e.asm.mulss(Xmm(0), Xmm(1));
                    if sub {
                        e.asm.subss(Xmm(0), Xmm(2));
                    } else {
                        e.asm.addss(Xmm(0), Xmm(2));
                    }
                    e.store_xmm(dest, Xmm(0));
                }
                _ => {
                    e.load_int(a, Gpr::Rax);
                    e.load_int(b, Gpr::Rcx);
                    e.asm.imul_rr(Gpr::Rax, Gpr::Rcx);
                    e.load_int(c, Gpr::Rcx);
                    if sub {
                        e.asm.sub_rr(Gpr::Rax, Gpr::Rcx);
                    } else {
                        e.asm.add_rr(Gpr::Rax, Gpr::Rcx);
                    }
                    e.store_int(dest, Gpr::Rax);
                }
            }
        }
        Opcode::Neg => {
            let dest = dest.unwrap();
            let src = value_op(e, instr_id, 0);
            match e.ty(src) {
                ValueType::F64 => {
                    e.load_xmm(src, Xmm(0));
                    e.asm.movq_rx(Gpr::Rax, Xmm(0));
                    e.asm.mov_ri(Gpr::Rcx, 0x8000_0000_0000_0000);
                    e.asm.xor_rr(Gpr::Rax, Gpr::Rcx);
                    e.asm.movq_xr(Xmm(0), Gpr::Rax);
                    e.store_xmm(dest, Xmm(0));
                }
                ValueType::F32 => {
                    e.load_xmm(src, Xmm(0));
                    e.asm.movq_rx(Gpr::Rax, Xmm(0));
                    e.asm.mov_ri(Gpr::Rcx, 0x8000_0000);
                    e.asm.xor_rr(Gpr::Rax, Gpr::Rcx);
                    e.asm.movq_xr(Xmm(0), Gpr::Rax);
                    e.store_xmm(dest, Xmm(0));
                }
                ValueType::V128 => {
                    e.load_xmm(src, Xmm(0));
                    let (base, disp) = e.scratch_addr(3, false);
                    e.asm.mov_ri(Gpr::Rax, 0x8000_0000_8000_0000);
                    e.asm.mov_mr(base, disp, Gpr::Rax);
                    e.asm.mov_mr(base, disp + 8, Gpr::Rax);
                    e.asm.movdqu_xm(Xmm(1), base, disp);
                    e.asm.pxor(Xmm(0), Xmm(1));
                    e.store_xmm(dest, Xmm(0));
                }
                _ => {
                    e.load_int(src, Gpr::Rax);
                    e.asm.neg(Gpr::Rax);
                    e.store_int(dest, Gpr::Rax);
                }
            }
        }
        Opcode::Abs => {
            let dest = dest.unwrap();
            let src = value_op(e, instr_id, 0);
            match e.ty(src) {
                ValueType::F64 => {
                    e.load_xmm(src, Xmm(0));
                    e.asm.movq_rx(Gpr::Rax, Xmm(0));
                    e.asm.mov_ri(Gpr::Rcx, 0x7FFF_FFFF_FFFF_FFFF);
                    e.asm.and_rr(Gpr::Rax, Gpr::Rcx);
                    e.asm.movq_xr(Xmm(0), Gpr::Rax);
                    e.store_xmm(dest, Xmm(0));
                }
                ValueType::F32 => {
                    e.load_xmm(src, Xmm(0));
                    e.asm.movq_rx(Gpr::Rax, Xmm(0));
                    e.asm.mov_ri(Gpr::Rcx, 0x7FFF_FFFF);
                    e.asm.and_rr(Gpr::Rax, Gpr::Rcx);
                    e.asm.movq_xr(Xmm(0), Gpr::Rax);
                    e.store_xmm(dest, Xmm(0));
                }
                ValueType::V128 => {
                    e.load_xmm(src, Xmm(0));
                    let (base, disp) = e.scratch_addr(3, false);
                    e.asm.mov_ri(Gpr::Rax, 0x7FFF_FFFF_7FFF_FFFF);
                    e.asm.mov_mr(base, disp, Gpr::Rax);
                    e.asm.mov_mr(base, disp + 8, Gpr::Rax);
                    e.asm.movdqu_xm(Xmm(1), base, disp);
                    e.asm.pand(Xmm(0), Xmm(1));
                    e.store_xmm(dest, Xmm(0));
                }
                ty => {
                    e.load_int(src, Gpr::Rax);
                    e.extend_to_64(Gpr::Rax, ty, true);
                    e.asm.mov_rr(Gpr::Rcx, Gpr::Rax);
                    e.asm.sar_imm(Gpr::Rcx, 63);
                    e.asm.xor_rr(Gpr::Rax, Gpr::Rcx);
                    e.asm.sub_rr(Gpr::Rax, Gpr::Rcx);
                    e.store_int(dest, Gpr::Rax);
                }
            }
        }
        Opcode::Sqrt => {
            let dest = dest.unwrap();
            let src = value_op(e, instr_id, 0);
            e.load_xmm(src, Xmm(0));
            match e.ty(src) {
                ValueType::F64 => e.asm.sqrtsd(Xmm(0), Xmm(0)),
                ValueType::F32 => e.asm.sqrtss(Xmm(0), Xmm(0)),
                _ => e.asm.sqrtps(Xmm(0), Xmm(0)),
            }
            e.store_xmm(dest, Xmm(0));
        }
        Opcode::RSqrt => {
            let dest = dest.unwrap();
            let src = value_op(e, instr_id, 0);
            match e.ty(src) {
                ValueType::V128 => {
                    e.load_xmm(src, Xmm(0));
                    e.asm.rsqrtps(Xmm(0), Xmm(0));
                    e.store_xmm(dest, Xmm(0));
                }
                ty => {
                    e.load_xmm(src, Xmm(1));
                    let one = if ty == ValueType::F64 {
                        1.0f64.to_bits()
                    } else {
                        1.0f32.to_bits() as u64
                    };
                    e.asm.mov_ri(Gpr::Rax, one);
                    e.asm.movq_xr(Xmm(0), Gpr::Rax);
                    if ty == ValueType::F64 {
                        e.asm.sqrtsd(Xmm(1), Xmm(1));
                        e.asm.divsd(Xmm(0), Xmm(1));
                    } else {
                        e.asm.sqrtss(Xmm(1), Xmm(1));
                        e.asm.divss(Xmm(0), Xmm(1));
                    }
                    e.store_xmm(dest, Xmm(0));
                }
            }
        }

        Opcode::Not => {
            let dest = dest.unwrap();
            let src = value_op(e, instr_id, 0);
            if e.ty(src) == ValueType::V128 {
                e.load_xmm(src, Xmm(0));
                e.asm.pcmpeqd(Xmm(1), Xmm(1));
                e.asm.pxor(Xmm(0), Xmm(1));
                e.store_xmm(dest, Xmm(0));
            } else {
                e.load_int(src, Gpr::Rax);
                e.asm.not(Gpr::Rax);
                e.store_int(dest, Gpr::Rax);
            }
        }
        Opcode::Shl | Opcode::Shr | Opcode::Sha => {
            let dest = dest.unwrap();
            let a = value_op(e, instr_id, 0);
            let count = value_op(e, instr_id, 1);
            let ty = e.ty(a);
            e.load_int(a, Gpr::Rax);
            match opcode {
                Opcode::Shr => e.extend_to_64(Gpr::Rax, ty, false),
                Opcode::Sha => e.extend_to_64(Gpr::Rax, ty, true),
                _ => {}
            }
            e.load_int(count, Gpr::Rcx);
            e.asm.and_ri(Gpr::Rcx, ty.bits() as i32 - 1);
            match opcode {
                Opcode::Shl => e.asm.shl_cl(Gpr::Rax),
                Opcode::Shr => e.asm.shr_cl(Gpr::Rax),
                _ => e.asm.sar_cl(Gpr::Rax),
            }
            e.store_int(dest, Gpr::Rax);
        }
        Opcode::RotateLeft => {
            let dest = dest.unwrap();
            let a = value_op(e, instr_id, 0);
            let count = value_op(e, instr_id, 1);
            let ty = e.ty(a);
            e.load_int(a, Gpr::Rax);
            e.load_int(count, Gpr::Rcx);
            match ty {
                ValueType::I32 => {
                    e.asm.and_ri(Gpr::Rcx, 31);
                    e.asm.rol32_cl(Gpr::Rax);
                }
                ValueType::I64 => {
                    e.asm.and_ri(Gpr::Rcx, 63);
                    e.asm.rol_cl(Gpr::Rax);
                }
                _ => return Err(e.emit_error("narrow rotate")),
            }
            e.store_int(dest, Gpr::Rax);
        }
        Opcode::ByteSwap => {
            let dest = dest.unwrap();
            let src = value_op(e, instr_id, 0);
            e.load_int(src, Gpr::Rax);
            match e.ty(src) {
                ValueType::I16 => {
                    e.asm.bswap32(Gpr::Rax);
                    e.asm.shr_imm(Gpr::Rax, 16);
                }
                ValueType::I32 => e.asm.bswap32(Gpr::Rax),
                ValueType::I64 => e.asm.bswap64(Gpr::Rax),
                ValueType::I8 => {}
                _ => return Err(e.emit_error("byte_swap on float")),
            }
            e.store_int(dest, Gpr::Rax);
        }
        Opcode::Cntlz => {
            let dest = dest.unwrap();
            let src = value_op(e, instr_id, 0);
            let ty = e.ty(src);
            e.load_int(src, Gpr::Rax);
            match ty {
                ValueType::I64 => e.asm.lzcnt(Gpr::Rax, Gpr::Rax),
                _ => {
                    e.extend_to_64(Gpr::Rax, ty, false);
                    e.asm.lzcnt32(Gpr::Rax, Gpr::Rax);
                    if ty.bits() < 32 {
                        e.asm.add_ri(Gpr::Rax, ty.bits() as i32 - 32);
                    }
                }
            }
            e.store_int(dest, Gpr::Rax);
        }

        Opcode::CompareExchange => {
            let dest = dest.unwrap();
            let address = value_op(e, instr_id, 0);
            let expected = value_op(e, instr_id, 1);
            let replacement = value_op(e, instr_id, 2);
            let wide = e.ty(expected) == ValueType::I64;
            e.load_int(address, Gpr::R8);
            e.asm.add_rr(Gpr::R8, MEMBASE);
            e.load_int(expected, Gpr::Rax);
            if !wide {
                e.extend_to_64(Gpr::Rax, e.ty(expected), false);
            }
            e.load_int(replacement, Gpr::Rcx);
            e.asm.lock_cmpxchg(Gpr::R8, 0, Gpr::Rcx, wide);
            e.store_int(dest, Gpr::Rax);
        }
        Opcode::AtomicAdd | Opcode::AtomicSub => {
            let dest = dest.unwrap();
            let address = value_op(e, instr_id, 0);
            let value = value_op(e, instr_id, 1);
            let wide = e.ty(value) == ValueType::I64;
            e.load_int(address, Gpr::R8);
            e.asm.add_rr(Gpr::R8, MEMBASE);
            e.load_int(value, Gpr::Rcx);
            if opcode == Opcode::AtomicSub {
                e.asm.neg(Gpr::Rcx);
            }
            e.asm.lock_xadd(Gpr::R8, 0, Gpr::Rcx, wide);
            e.store_int(dest, Gpr::Rcx);
        }
    }
    Ok(1)
}

fn lower_convert(e: &mut X64Emitter, instr_id: InstrId) -> Result<(), Error> {
    let instr = e.func.instr(instr_id);
    let dest = instr.dest.unwrap();
    let truncating = instr.flags & 1 == 0;
    let src = value_op(e, instr_id, 0);
    let from = e.ty(src);
    let to = e.ty(dest);
    match (from, to) {
        (ValueType::F32, ValueType::F64) => {
            e.load_xmm(src, Xmm(0));
            e.asm.cvtss2sd(Xmm(0), Xmm(0));
            e.store_xmm(dest, Xmm(0));
        }
        (ValueType::F64, ValueType::F32) => {
            e.load_xmm(src, Xmm(0));
            e.asm.cvtsd2ss(Xmm(0), Xmm(0));
            e.store_xmm(dest, Xmm(0));
        }
        (ValueType::F64, ValueType::I32 | ValueType::I64)
        | (ValueType::F32, ValueType::I32 | ValueType::I64) => {
            e.load_xmm(src, Xmm(0));
            if from == ValueType::F32 {
                e.asm.cvtss2sd(Xmm(0), Xmm(0));
            }
            if truncating {
                e.asm.cvttsd2si(Gpr::Rax, Xmm(0));
            } else {
                e.asm.cvtsd2si(Gpr::Rax, Xmm(0));
            }
            e.store_int(dest, Gpr::Rax);
        }
        (ValueType::I32 | ValueType::I64, ValueType::F64)
        | (ValueType::I32 | ValueType::I64, ValueType::F32) => {
            e.load_int(src, Gpr::Rax);
            e.extend_to_64(Gpr::Rax, from, true);
            e.asm.cvtsi2sd(Xmm(0), Gpr::Rax);
            if to == ValueType::F32 {
                e.asm.cvtsd2ss(Xmm(0), Xmm(0));
            }
            e.store_xmm(dest, Xmm(0));
        }
        _ => return Err(e.emit_error(format!("convert {from:?} -> {to:?}"))),
    }
    Ok(())
}
