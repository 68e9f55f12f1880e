//! Host/guest transition thunks and the host helper entry points embedded
//! into generated code.
//!
//! The host-to-guest thunk bridges the SysV calling convention into the
//! JIT's register roles: it saves the callee-saved set, parks the context
//! in RSI and the membase in RDI, and jumps into the blob. Guest-to-host
//! transitions go the other way through the helpers in
//! [`crate::backend::x64::emitter::HelperTable`], which generated code
//! reaches with the reserved roles parked on the stack.

use crate::backend::x64::asm::{Assembler, Gpr};
use crate::backend::x64::code_cache::{CodeBlob, CodeCache};
use crate::error::Error;
use crate::ppc::PpcContext;
use std::sync::Arc;

/// Signature of the emitted host-to-guest thunk.
pub type HostToGuestThunk =
    extern "C" fn(code: *const u8, ctx: *mut PpcContext, membase: *mut u8);

/// Emits the thunk into the cache once at backend construction.
pub fn build_host_to_guest_thunk(cache: &CodeCache) -> Result<Arc<CodeBlob>, Error> {
    let mut asm = Assembler::new();
    // SysV in: RDI = code, RSI = ctx, RDX = membase.
    asm.push(Gpr::Rbp);
    asm.mov_rr(Gpr::Rbp, Gpr::Rsp);
    asm.push(Gpr::Rbx);
    asm.push(Gpr::R12);
    asm.push(Gpr::R13);
    asm.push(Gpr::R14);
    asm.push(Gpr::R15);
    // Keep RSP 16-aligned at the guest entry: 5 pushes + rbp + return
    // address leave it 8 off.
    asm.sub_ri(Gpr::Rsp, 8);
    asm.mov_rr(Gpr::Rax, Gpr::Rdi);
    // RSI already holds the context; membase moves into RDI.
    asm.mov_rr(Gpr::Rdi, Gpr::Rdx);
    asm.call_reg(Gpr::Rax);
    asm.add_ri(Gpr::Rsp, 8);
    asm.pop(Gpr::R15);
    asm.pop(Gpr::R14);
    asm.pop(Gpr::R13);
    asm.pop(Gpr::R12);
    asm.pop(Gpr::Rbx);
    asm.pop(Gpr::Rbp);
    asm.ret();
    let code = asm.finish().map_err(|reason| Error::Emit {
        address: 0,
        reason,
    })?;
    cache.publish(0, &code, Vec::new())
}

/// The guest-code-visible vector evaluator. `packed` carries the HIR
/// opcode in the low 16 bits, the instruction flags above it and any
/// immediate (lane index, swizzle mask) in the high half. Operands arrive
/// in three 16-byte slots; the result goes to `out`.
///
/// Keeping this on the same functions constant propagation folds with
/// guarantees the two paths can never drift apart.
pub extern "C" fn vector_op_helper(
    packed: u64,
    a: *const crate::vec128::Vec128,
    b: *const crate::vec128::Vec128,
    c: *const crate::vec128::Vec128,
    out: *mut crate::vec128::Vec128,
) {
    use crate::hir::vector_ops;
    use crate::hir::{Opcode, ValueType};
    use crate::vec128::Vec128;

    let opcode: Opcode = unsafe { std::mem::transmute((packed & 0xFFFF) as u16) };
    let flags = ((packed >> 16) & 0xFFFF) as u16;
    let imm = (packed >> 32) as u32;
    let part = ValueType::from_part(flags);
    let (a, b, c) = unsafe { (*a, *b, *c) };

    let result = match opcode {
        Opcode::VectorShl => vector_ops::vector_shl(part, a, b),
        Opcode::VectorShr => vector_ops::vector_shr(part, a, b),
        Opcode::VectorSha => vector_ops::vector_sha(part, a, b),
        Opcode::VectorCompareEq
        | Opcode::VectorCompareSgt
        | Opcode::VectorCompareSge
        | Opcode::VectorCompareUgt
        | Opcode::VectorCompareUge => vector_ops::vector_compare(part, opcode, a, b),
        Opcode::Permute => {
            if part == ValueType::I32 {
                // Control is a scalar that rode in through slot 0.
                vector_ops::permute_u32(a.u64(1) as u32, b, c)
            } else {
                vector_ops::permute_bytes(a, b, c)
            }
        }
        Opcode::Swizzle => vector_ops::swizzle_u32(imm, a),
        Opcode::Splat => {
            // Scalar input in the first 8 bytes of slot 0.
            vector_ops::splat(part, a.u64(1))
        }
        Opcode::Insert => {
            // The replaced lane value rides in the third operand slot.
            let mut vec = a;
            let raw = c.u64(1);
            match part {
                ValueType::I8 => vec.set_u8(imm as usize, raw as u8),
                ValueType::I16 => vec.set_u16(imm as usize, raw as u16),
                ValueType::I32 | ValueType::F32 => vec.set_u32(imm as usize, raw as u32),
                _ => vec.set_u64(imm as usize, raw),
            }
            vec
        }
        Opcode::Extract => {
            let raw = match part {
                ValueType::I8 => a.u8(imm as usize) as u64,
                ValueType::I16 => a.u16(imm as usize) as u64,
                ValueType::I32 | ValueType::F32 => a.u32(imm as usize) as u64,
                _ => a.u64(imm as usize),
            };
            let mut vec = Vec128::ZERO;
            vec.set_u64(1, raw);
            vec
        }
        Opcode::Pack => {
            let kind = pack_type_of(flags);
            vector_ops::pack(kind, a)
        }
        Opcode::Unpack => {
            let kind = pack_type_of(flags);
            vector_ops::unpack(kind, a)
        }
        Opcode::DotProduct3 => {
            let mut vec = Vec128::ZERO;
            vec.set_u64(1, vector_ops::dot_product_3(a, b).to_bits() as u64);
            vec
        }
        Opcode::DotProduct4 => {
            let mut vec = Vec128::ZERO;
            vec.set_u64(1, vector_ops::dot_product_4(a, b).to_bits() as u64);
            vec
        }
        Opcode::ByteSwap => {
            let mut bytes = *a.as_bytes();
            bytes.reverse();
            Vec128::from_bytes(bytes)
        }
        _ => Vec128::ZERO,
    };
    unsafe {
        *out = result;
    }
}

fn pack_type_of(flags: u16) -> crate::hir::PackType {
    match flags & 0x3 {
        0 => crate::hir::PackType::D3dColor,
        1 => crate::hir::PackType::Float16_2,
        2 => crate::hir::PackType::Float16_4,
        _ => crate::hir::PackType::Short2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vec128::{vec128i, Vec128};

    #[test]
    fn thunk_runs_a_trivial_blob() {
        let cache = CodeCache::new();
        let thunk_blob = build_host_to_guest_thunk(&cache).unwrap();
        // Guest blob: writes 7 into ctx->r[3] ([rsi + 24]) and returns.
        let mut asm = Assembler::new();
        asm.mov_ri(Gpr::Rax, 7);
        asm.mov_mr(Gpr::Rsi, 24, Gpr::Rax);
        asm.ret();
        let blob = cache
            .publish(0x8200_0000, &asm.finish().unwrap(), Vec::new())
            .unwrap();

        let mut ctx = PpcContext::new();
        let thunk: HostToGuestThunk = unsafe { std::mem::transmute(thunk_blob.entry()) };
        thunk(blob.entry(), &mut ctx, std::ptr::null_mut());
        assert_eq!(ctx.r[3], 7);
    }

    #[test]
    fn vector_helper_matches_constant_evaluator() {
        use crate::hir::Opcode;
        let a = vec128i(0, 1, 2, 3);
        let b = vec128i(4, 5, 6, 7);
        let mut out = Vec128::ZERO;
        // vector_compare_eq.u32 of equal vectors is all ones.
        let packed = Opcode::VectorCompareEq as u64 | ((2u64) << 16);
        vector_op_helper(packed, &a, &a, &b, &mut out);
        assert_eq!(out, vec128i(!0, !0, !0, !0));
        vector_op_helper(packed, &a, &b, &a, &mut out);
        assert_eq!(out, vec128i(0, 0, 0, 0));
    }
}
