//! A small x86-64 assembler: just the encodings the lowering table emits,
//! written into a growable staging buffer. Branch targets go through
//! numbered labels with rel32 fixups patched at the end.
//!
//! Memory operands are always `[base + disp32]`; uniform encodings beat
//! shaving bytes here, and the MMIO fault decoder only has to recognize
//! one shape.

use std::collections::HashMap;

/// General-purpose registers in encoding order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Gpr {
    Rax = 0,
    Rcx = 1,
    Rdx = 2,
    Rbx = 3,
    Rsp = 4,
    Rbp = 5,
    Rsi = 6,
    Rdi = 7,
    R8 = 8,
    R9 = 9,
    R10 = 10,
    R11 = 11,
    R12 = 12,
    R13 = 13,
    R14 = 14,
    R15 = 15,
}

/// XMM registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Xmm(pub u8);

/// Condition codes, named after the setcc/jcc suffixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Cond {
    O = 0x0,
    No = 0x1,
    B = 0x2,
    Ae = 0x3,
    E = 0x4,
    Ne = 0x5,
    Be = 0x6,
    A = 0x7,
    S = 0x8,
    Ns = 0x9,
    P = 0xA,
    Np = 0xB,
    L = 0xC,
    Ge = 0xD,
    Le = 0xE,
    G = 0xF,
}

/// A branch target within the buffer being assembled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AsmLabel(pub u32);

struct Fixup {
    label: AsmLabel,
    /// Offset of the rel32 field.
    at: usize,
}

/// The staging assembler.
pub struct Assembler {
    code: Vec<u8>,
    labels: HashMap<AsmLabel, usize>,
    fixups: Vec<Fixup>,
    next_label: u32,
}

impl Assembler {
    pub fn new() -> Self {
        Self {
            code: Vec::with_capacity(4096),
            labels: HashMap::new(),
            fixups: Vec::new(),
            next_label: 0,
        }
    }

    pub fn offset(&self) -> usize {
        self.code.len()
    }

    pub fn new_label(&mut self) -> AsmLabel {
        let label = AsmLabel(self.next_label);
        self.next_label += 1;
        label
    }

    pub fn bind(&mut self, label: AsmLabel) {
        let previous = self.labels.insert(label, self.code.len());
        debug_assert!(previous.is_none(), "label bound twice");
    }

    /// Patches every rel32 fixup and returns the finished bytes.
    pub fn finish(mut self) -> Result<Vec<u8>, String> {
        for fixup in &self.fixups {
            let target = *self
                .labels
                .get(&fixup.label)
                .ok_or_else(|| format!("unbound asm label {}", fixup.label.0))?;
            let rel = target as i64 - (fixup.at as i64 + 4);
            let rel: i32 = rel.try_into().map_err(|_| "branch out of range")?;
            self.code[fixup.at..fixup.at + 4].copy_from_slice(&rel.to_le_bytes());
        }
        Ok(self.code)
    }

    fn emit(&mut self, bytes: &[u8]) {
        self.code.extend_from_slice(bytes);
    }

    fn emit_u32(&mut self, value: u32) {
        self.code.extend_from_slice(&value.to_le_bytes());
    }

    fn emit_u64(&mut self, value: u64) {
        self.code.extend_from_slice(&value.to_le_bytes());
    }

    fn rex(&mut self, w: bool, reg: u8, rm: u8) {
        let rex = 0x40u8
            | ((w as u8) << 3)
            | (((reg >> 3) & 1) << 2)
            | ((rm >> 3) & 1);
        self.emit(&[rex]);
    }

    /// REX for single-operand forms; emitted even when empty so byte
    /// registers always mean the low byte.
    fn rex_opt(&mut self, w: bool, reg: u8, rm: u8) {
        let rex = 0x40u8
            | ((w as u8) << 3)
            | (((reg >> 3) & 1) << 2)
            | ((rm >> 3) & 1);
        if rex != 0x40 {
            self.emit(&[rex]);
        }
    }

    fn modrm_reg(&mut self, reg: u8, rm: u8) {
        self.emit(&[0xC0 | ((reg & 7) << 3) | (rm & 7)]);
    }

    /// `[base + disp32]`, with the SIB byte RSP/R12 bases require.
    fn modrm_mem(&mut self, reg: u8, base: u8, disp: i32) {
        self.emit(&[0x80 | ((reg & 7) << 3) | (base & 7)]);
        if base & 7 == 4 {
            self.emit(&[0x24]);
        }
        self.emit_u32(disp as u32);
    }

    // Stack and moves.

    pub fn push(&mut self, reg: Gpr) {
        self.rex_opt(false, 0, reg as u8);
        self.emit(&[0x50 + (reg as u8 & 7)]);
    }

    pub fn pop(&mut self, reg: Gpr) {
        self.rex_opt(false, 0, reg as u8);
        self.emit(&[0x58 + (reg as u8 & 7)]);
    }

    pub fn mov_rr(&mut self, dst: Gpr, src: Gpr) {
        self.rex(true, src as u8, dst as u8);
        self.emit(&[0x89]);
        self.modrm_reg(src as u8, dst as u8);
    }

    pub fn mov_ri(&mut self, dst: Gpr, imm: u64) {
        self.rex(true, 0, dst as u8);
        self.emit(&[0xB8 + (dst as u8 & 7)]);
        self.emit_u64(imm);
    }

    pub fn mov_ri32(&mut self, dst: Gpr, imm: u32) {
        self.rex_opt(false, 0, dst as u8);
        self.emit(&[0xB8 + (dst as u8 & 7)]);
        self.emit_u32(imm);
    }

    /// mov r64, [base + disp]
    pub fn mov_rm(&mut self, dst: Gpr, base: Gpr, disp: i32) {
        self.rex(true, dst as u8, base as u8);
        self.emit(&[0x8B]);
        self.modrm_mem(dst as u8, base as u8, disp);
    }

    /// mov [base + disp], r64
    pub fn mov_mr(&mut self, base: Gpr, disp: i32, src: Gpr) {
        self.rex(true, src as u8, base as u8);
        self.emit(&[0x89]);
        self.modrm_mem(src as u8, base as u8, disp);
    }

    /// mov r32, [base + disp] (zero-extends)
    pub fn mov_rm32(&mut self, dst: Gpr, base: Gpr, disp: i32) {
        self.rex_opt(false, dst as u8, base as u8);
        self.emit(&[0x8B]);
        self.modrm_mem(dst as u8, base as u8, disp);
    }

    /// mov [base + disp], r32
    pub fn mov_mr32(&mut self, base: Gpr, disp: i32, src: Gpr) {
        self.rex_opt(false, src as u8, base as u8);
        self.emit(&[0x89]);
        self.modrm_mem(src as u8, base as u8, disp);
    }

    /// mov [base + disp], r16
    pub fn mov_mr16(&mut self, base: Gpr, disp: i32, src: Gpr) {
        self.emit(&[0x66]);
        self.rex_opt(false, src as u8, base as u8);
        self.emit(&[0x89]);
        self.modrm_mem(src as u8, base as u8, disp);
    }

    /// mov [base + disp], r8
    pub fn mov_mr8(&mut self, base: Gpr, disp: i32, src: Gpr) {
        self.rex(false, src as u8, base as u8);
        self.emit(&[0x88]);
        self.modrm_mem(src as u8, base as u8, disp);
    }

    /// movzx r64, byte [base + disp]
    pub fn movzx8_rm(&mut self, dst: Gpr, base: Gpr, disp: i32) {
        self.rex(true, dst as u8, base as u8);
        self.emit(&[0x0F, 0xB6]);
        self.modrm_mem(dst as u8, base as u8, disp);
    }

    /// movzx r64, word [base + disp]
    pub fn movzx16_rm(&mut self, dst: Gpr, base: Gpr, disp: i32) {
        self.rex(true, dst as u8, base as u8);
        self.emit(&[0x0F, 0xB7]);
        self.modrm_mem(dst as u8, base as u8, disp);
    }

    /// movzx r64, r8
    pub fn movzx8_rr(&mut self, dst: Gpr, src: Gpr) {
        self.rex(true, dst as u8, src as u8);
        self.emit(&[0x0F, 0xB6]);
        self.modrm_reg(dst as u8, src as u8);
    }

    /// movzx r64, r16
    pub fn movzx16_rr(&mut self, dst: Gpr, src: Gpr) {
        self.rex(true, dst as u8, src as u8);
        self.emit(&[0x0F, 0xB7]);
        self.modrm_reg(dst as u8, src as u8);
    }

    /// movsx r64, r8
    pub fn movsx8_rr(&mut self, dst: Gpr, src: Gpr) {
        self.rex(true, dst as u8, src as u8);
        self.emit(&[0x0F, 0xBE]);
        self.modrm_reg(dst as u8, src as u8);
    }

    /// movsx r64, r16
    pub fn movsx16_rr(&mut self, dst: Gpr, src: Gpr) {
        self.rex(true, dst as u8, src as u8);
        self.emit(&[0x0F, 0xBF]);
        self.modrm_reg(dst as u8, src as u8);
    }

    /// movsxd r64, r32
    pub fn movsx32_rr(&mut self, dst: Gpr, src: Gpr) {
        self.rex(true, dst as u8, src as u8);
        self.emit(&[0x63]);
        self.modrm_reg(dst as u8, src as u8);
    }

    /// mov r32, r32 (zero-extends to 64)
    pub fn mov_rr32(&mut self, dst: Gpr, src: Gpr) {
        self.rex_opt(false, src as u8, dst as u8);
        self.emit(&[0x89]);
        self.modrm_reg(src as u8, dst as u8);
    }

    // ALU.

    fn alu_rr(&mut self, opcode: u8, dst: Gpr, src: Gpr) {
        self.rex(true, src as u8, dst as u8);
        self.emit(&[opcode]);
        self.modrm_reg(src as u8, dst as u8);
    }

    pub fn add_rr(&mut self, dst: Gpr, src: Gpr) {
        self.alu_rr(0x01, dst, src);
    }

    pub fn sub_rr(&mut self, dst: Gpr, src: Gpr) {
        self.alu_rr(0x29, dst, src);
    }

    pub fn and_rr(&mut self, dst: Gpr, src: Gpr) {
        self.alu_rr(0x21, dst, src);
    }

    pub fn or_rr(&mut self, dst: Gpr, src: Gpr) {
        self.alu_rr(0x09, dst, src);
    }

    pub fn xor_rr(&mut self, dst: Gpr, src: Gpr) {
        self.alu_rr(0x31, dst, src);
    }

    pub fn cmp_rr(&mut self, dst: Gpr, src: Gpr) {
        self.alu_rr(0x39, dst, src);
    }

    pub fn cmp_rr32(&mut self, dst: Gpr, src: Gpr) {
        self.rex_opt(false, src as u8, dst as u8);
        self.emit(&[0x39]);
        self.modrm_reg(src as u8, dst as u8);
    }

    pub fn test_rr(&mut self, a: Gpr, b: Gpr) {
        self.alu_rr(0x85, a, b);
    }

    pub fn add_ri(&mut self, dst: Gpr, imm: i32) {
        self.rex(true, 0, dst as u8);
        self.emit(&[0x81]);
        self.modrm_reg(0, dst as u8);
        self.emit_u32(imm as u32);
    }

    pub fn sub_ri(&mut self, dst: Gpr, imm: i32) {
        self.rex(true, 5, dst as u8);
        self.emit(&[0x81]);
        self.modrm_reg(5, dst as u8);
        self.emit_u32(imm as u32);
    }

    pub fn and_ri(&mut self, dst: Gpr, imm: i32) {
        self.rex(true, 4, dst as u8);
        self.emit(&[0x81]);
        self.modrm_reg(4, dst as u8);
        self.emit_u32(imm as u32);
    }

    pub fn cmp_ri(&mut self, dst: Gpr, imm: i32) {
        self.rex(true, 7, dst as u8);
        self.emit(&[0x81]);
        self.modrm_reg(7, dst as u8);
        self.emit_u32(imm as u32);
    }

    pub fn imul_rr(&mut self, dst: Gpr, src: Gpr) {
        self.rex(true, dst as u8, src as u8);
        self.emit(&[0x0F, 0xAF]);
        self.modrm_reg(dst as u8, src as u8);
    }

    fn f7_group(&mut self, ext: u8, reg: Gpr) {
        self.rex(true, ext, reg as u8);
        self.emit(&[0xF7]);
        self.modrm_reg(ext, reg as u8);
    }

    /// RDX:RAX = RAX * reg (unsigned).
    pub fn mul(&mut self, reg: Gpr) {
        self.f7_group(4, reg);
    }

    /// RDX:RAX = RAX * reg (signed).
    pub fn imul(&mut self, reg: Gpr) {
        self.f7_group(5, reg);
    }

    /// Unsigned divide of RDX:RAX.
    pub fn div(&mut self, reg: Gpr) {
        self.f7_group(6, reg);
    }

    /// Signed divide of RDX:RAX.
    pub fn idiv(&mut self, reg: Gpr) {
        self.f7_group(7, reg);
    }

    pub fn neg(&mut self, reg: Gpr) {
        self.f7_group(3, reg);
    }

    pub fn not(&mut self, reg: Gpr) {
        self.f7_group(2, reg);
    }

    /// Sign-extend RAX into RDX:RAX.
    pub fn cqo(&mut self) {
        self.emit(&[0x48, 0x99]);
    }

    pub fn xor_rr32(&mut self, dst: Gpr, src: Gpr) {
        self.rex_opt(false, src as u8, dst as u8);
        self.emit(&[0x31]);
        self.modrm_reg(src as u8, dst as u8);
    }

    fn shift_cl(&mut self, ext: u8, reg: Gpr) {
        self.rex(true, ext, reg as u8);
        self.emit(&[0xD3]);
        self.modrm_reg(ext, reg as u8);
    }

    /// Shift left by CL.
    pub fn shl_cl(&mut self, reg: Gpr) {
        self.shift_cl(4, reg);
    }

    /// Logical shift right by CL.
    pub fn shr_cl(&mut self, reg: Gpr) {
        self.shift_cl(5, reg);
    }

    /// Arithmetic shift right by CL.
    pub fn sar_cl(&mut self, reg: Gpr) {
        self.shift_cl(7, reg);
    }

    /// Rotate left by CL.
    pub fn rol_cl(&mut self, reg: Gpr) {
        self.shift_cl(0, reg);
    }

    fn shift_imm(&mut self, ext: u8, reg: Gpr, imm: u8) {
        self.rex(true, ext, reg as u8);
        self.emit(&[0xC1]);
        self.modrm_reg(ext, reg as u8);
        self.emit(&[imm]);
    }

    pub fn shl_imm(&mut self, reg: Gpr, imm: u8) {
        self.shift_imm(4, reg, imm);
    }

    pub fn shr_imm(&mut self, reg: Gpr, imm: u8) {
        self.shift_imm(5, reg, imm);
    }

    pub fn sar_imm(&mut self, reg: Gpr, imm: u8) {
        self.shift_imm(7, reg, imm);
    }

    /// rol r32, imm.
    pub fn rol32_imm(&mut self, reg: Gpr, imm: u8) {
        self.rex_opt(false, 0, reg as u8);
        self.emit(&[0xC1]);
        self.modrm_reg(0, reg as u8);
        self.emit(&[imm]);
    }

    /// rol r32 by CL.
    pub fn rol32_cl(&mut self, reg: Gpr) {
        self.rex_opt(false, 0, reg as u8);
        self.emit(&[0xD3]);
        self.modrm_reg(0, reg as u8);
    }

    pub fn bswap64(&mut self, reg: Gpr) {
        self.rex(true, 0, reg as u8);
        self.emit(&[0x0F, 0xC8 + (reg as u8 & 7)]);
    }

    pub fn bswap32(&mut self, reg: Gpr) {
        self.rex_opt(false, 0, reg as u8);
        self.emit(&[0x0F, 0xC8 + (reg as u8 & 7)]);
    }

    /// lzcnt r64, r64.
    pub fn lzcnt(&mut self, dst: Gpr, src: Gpr) {
        self.emit(&[0xF3]);
        self.rex(true, dst as u8, src as u8);
        self.emit(&[0x0F, 0xBD]);
        self.modrm_reg(dst as u8, src as u8);
    }

    /// lzcnt r32, r32.
    pub fn lzcnt32(&mut self, dst: Gpr, src: Gpr) {
        self.emit(&[0xF3]);
        self.rex_opt(false, dst as u8, src as u8);
        self.emit(&[0x0F, 0xBD]);
        self.modrm_reg(dst as u8, src as u8);
    }

    pub fn setcc(&mut self, cond: Cond, reg: Gpr) {
        // Forced REX keeps the low-byte meaning for rsp..rdi.
        self.emit(&[0x40 | ((reg as u8 >> 3) & 1)]);
        self.emit(&[0x0F, 0x90 + cond as u8]);
        self.modrm_reg(0, reg as u8);
    }

    pub fn cmovcc(&mut self, cond: Cond, dst: Gpr, src: Gpr) {
        self.rex(true, dst as u8, src as u8);
        self.emit(&[0x0F, 0x40 + cond as u8]);
        self.modrm_reg(dst as u8, src as u8);
    }

    pub fn lea(&mut self, dst: Gpr, base: Gpr, disp: i32) {
        self.rex(true, dst as u8, base as u8);
        self.emit(&[0x8D]);
        self.modrm_mem(dst as u8, base as u8, disp);
    }

    // Atomics.

    /// lock cmpxchg [base + disp], src; expected in RAX, result in RAX.
    pub fn lock_cmpxchg(&mut self, base: Gpr, disp: i32, src: Gpr, wide: bool) {
        self.emit(&[0xF0]);
        if wide {
            self.rex(true, src as u8, base as u8);
        } else {
            self.rex_opt(false, src as u8, base as u8);
        }
        self.emit(&[0x0F, 0xB1]);
        self.modrm_mem(src as u8, base as u8, disp);
    }

    /// lock xadd [base + disp], src.
    pub fn lock_xadd(&mut self, base: Gpr, disp: i32, src: Gpr, wide: bool) {
        self.emit(&[0xF0]);
        if wide {
            self.rex(true, src as u8, base as u8);
        } else {
            self.rex_opt(false, src as u8, base as u8);
        }
        self.emit(&[0x0F, 0xC1]);
        self.modrm_mem(src as u8, base as u8, disp);
    }

    // Control flow.

    pub fn jmp(&mut self, label: AsmLabel) {
        self.emit(&[0xE9]);
        self.fixups.push(Fixup {
            label,
            at: self.code.len(),
        });
        self.emit_u32(0);
    }

    pub fn jcc(&mut self, cond: Cond, label: AsmLabel) {
        self.emit(&[0x0F, 0x80 + cond as u8]);
        self.fixups.push(Fixup {
            label,
            at: self.code.len(),
        });
        self.emit_u32(0);
    }

    pub fn call_reg(&mut self, reg: Gpr) {
        self.rex_opt(false, 2, reg as u8);
        self.emit(&[0xFF]);
        self.modrm_reg(2, reg as u8);
    }

    pub fn jmp_reg(&mut self, reg: Gpr) {
        self.rex_opt(false, 4, reg as u8);
        self.emit(&[0xFF]);
        self.modrm_reg(4, reg as u8);
    }

    pub fn ret(&mut self) {
        self.emit(&[0xC3]);
    }

    pub fn int3(&mut self) {
        self.emit(&[0xCC]);
    }

    // SSE scalar/vector.

    fn sse_op(&mut self, prefix: Option<u8>, w: bool, opcode: u8, reg: u8, rm: u8) {
        if let Some(prefix) = prefix {
            self.emit(&[prefix]);
        }
        self.rex_opt(w, reg, rm);
        self.emit(&[0x0F, opcode]);
        self.modrm_reg(reg, rm);
    }

    fn sse_op_mem(
        &mut self,
        prefix: Option<u8>,
        opcode: u8,
        reg: u8,
        base: u8,
        disp: i32,
    ) {
        if let Some(prefix) = prefix {
            self.emit(&[prefix]);
        }
        self.rex_opt(false, reg, base);
        self.emit(&[0x0F, opcode]);
        self.modrm_mem(reg, base, disp);
    }

    /// movq xmm, r64.
    pub fn movq_xr(&mut self, dst: Xmm, src: Gpr) {
        self.emit(&[0x66]);
        self.rex(true, dst.0, src as u8);
        self.emit(&[0x0F, 0x6E]);
        self.modrm_reg(dst.0, src as u8);
    }

    /// movq r64, xmm.
    pub fn movq_rx(&mut self, dst: Gpr, src: Xmm) {
        self.emit(&[0x66]);
        self.rex(true, src.0, dst as u8);
        self.emit(&[0x0F, 0x7E]);
        self.modrm_reg(src.0, dst as u8);
    }

    /// movsd xmm, [base + disp].
    pub fn movsd_xm(&mut self, dst: Xmm, base: Gpr, disp: i32) {
        self.sse_op_mem(Some(0xF2), 0x10, dst.0, base as u8, disp);
    }

    /// movsd [base + disp], xmm.
    pub fn movsd_mx(&mut self, base: Gpr, disp: i32, src: Xmm) {
        self.sse_op_mem(Some(0xF2), 0x11, src.0, base as u8, disp);
    }

    /// movss xmm, [base + disp].
    pub fn movss_xm(&mut self, dst: Xmm, base: Gpr, disp: i32) {
        self.sse_op_mem(Some(0xF3), 0x10, dst.0, base as u8, disp);
    }

    /// movss [base + disp], xmm.
    pub fn movss_mx(&mut self, base: Gpr, disp: i32, src: Xmm) {
        self.sse_op_mem(Some(0xF3), 0x11, src.0, base as u8, disp);
    }

    /// movdqu xmm, [base + disp].
    pub fn movdqu_xm(&mut self, dst: Xmm, base: Gpr, disp: i32) {
        self.sse_op_mem(Some(0xF3), 0x6F, dst.0, base as u8, disp);
    }

    /// movdqu [base + disp], xmm.
    pub fn movdqu_mx(&mut self, base: Gpr, disp: i32, src: Xmm) {
        self.sse_op_mem(Some(0xF3), 0x7F, src.0, base as u8, disp);
    }

    /// movaps xmm, xmm.
    pub fn movaps_xx(&mut self, dst: Xmm, src: Xmm) {
        self.sse_op(None, false, 0x28, dst.0, src.0);
    }

    fn sd_arith(&mut self, opcode: u8, dst: Xmm, src: Xmm) {
        self.sse_op(Some(0xF2), false, opcode, dst.0, src.0);
    }

    fn ss_arith(&mut self, opcode: u8, dst: Xmm, src: Xmm) {
        self.sse_op(Some(0xF3), false, opcode, dst.0, src.0);
    }

    fn ps_arith(&mut self, opcode: u8, dst: Xmm, src: Xmm) {
        self.sse_op(None, false, opcode, dst.0, src.0);
    }

    pub fn addsd(&mut self, dst: Xmm, src: Xmm) {
        self.sd_arith(0x58, dst, src);
    }

    pub fn subsd(&mut self, dst: Xmm, src: Xmm) {
        self.sd_arith(0x5C, dst, src);
    }

    pub fn mulsd(&mut self, dst: Xmm, src: Xmm) {
        self.sd_arith(0x59, dst, src);
    }

    pub fn divsd(&mut self, dst: Xmm, src: Xmm) {
        self.sd_arith(0x5E, dst, src);
    }

    pub fn sqrtsd(&mut self, dst: Xmm, src: Xmm) {
        self.sd_arith(0x51, dst, src);
    }

    pub fn minsd(&mut self, dst: Xmm, src: Xmm) {
        self.sd_arith(0x5D, dst, src);
    }

    pub fn maxsd(&mut self, dst: Xmm, src: Xmm) {
        self.sd_arith(0x5F, dst, src);
    }

    pub fn addss(&mut self, dst: Xmm, src: Xmm) {
        self.ss_arith(0x58, dst, src);
    }

    pub fn subss(&mut self, dst: Xmm, src: Xmm) {
        self.ss_arith(0x5C, dst, src);
    }

    pub fn mulss(&mut self, dst: Xmm, src: Xmm) {
        self.ss_arith(0x59, dst, src);
    }

    pub fn divss(&mut self, dst: Xmm, src: Xmm) {
        self.ss_arith(0x5E, dst, src);
    }

    pub fn sqrtss(&mut self, dst: Xmm, src: Xmm) {
        self.ss_arith(0x51, dst, src);
    }

    pub fn minss(&mut self, dst: Xmm, src: Xmm) {
        self.ss_arith(0x5D, dst, src);
    }

    pub fn maxss(&mut self, dst: Xmm, src: Xmm) {
        self.ss_arith(0x5F, dst, src);
    }

    pub fn addps(&mut self, dst: Xmm, src: Xmm) {
        self.ps_arith(0x58, dst, src);
    }

    pub fn subps(&mut self, dst: Xmm, src: Xmm) {
        self.ps_arith(0x5C, dst, src);
    }

    pub fn mulps(&mut self, dst: Xmm, src: Xmm) {
        self.ps_arith(0x59, dst, src);
    }

    pub fn divps(&mut self, dst: Xmm, src: Xmm) {
        self.ps_arith(0x5E, dst, src);
    }

    pub fn minps(&mut self, dst: Xmm, src: Xmm) {
        self.ps_arith(0x5D, dst, src);
    }

    pub fn maxps(&mut self, dst: Xmm, src: Xmm) {
        self.ps_arith(0x5F, dst, src);
    }

    pub fn sqrtps(&mut self, dst: Xmm, src: Xmm) {
        self.ps_arith(0x51, dst, src);
    }

    pub fn rsqrtps(&mut self, dst: Xmm, src: Xmm) {
        self.ps_arith(0x52, dst, src);
    }

    pub fn pand(&mut self, dst: Xmm, src: Xmm) {
        self.sse_op(Some(0x66), false, 0xDB, dst.0, src.0);
    }

    pub fn por(&mut self, dst: Xmm, src: Xmm) {
        self.sse_op(Some(0x66), false, 0xEB, dst.0, src.0);
    }

    pub fn pxor(&mut self, dst: Xmm, src: Xmm) {
        self.sse_op(Some(0x66), false, 0xEF, dst.0, src.0);
    }

    /// ucomisd: sets ZF/PF/CF like an unordered compare.
    pub fn ucomisd(&mut self, a: Xmm, b: Xmm) {
        self.sse_op(Some(0x66), false, 0x2E, a.0, b.0);
    }

    pub fn ucomiss(&mut self, a: Xmm, b: Xmm) {
        self.sse_op(None, false, 0x2E, a.0, b.0);
    }

    /// cvtsi2sd xmm, r64.
    pub fn cvtsi2sd(&mut self, dst: Xmm, src: Gpr) {
        self.emit(&[0xF2]);
        self.rex(true, dst.0, src as u8);
        self.emit(&[0x0F, 0x2A]);
        self.modrm_reg(dst.0, src as u8);
    }

    /// cvttsd2si r64, xmm (truncating).
    pub fn cvttsd2si(&mut self, dst: Gpr, src: Xmm) {
        self.emit(&[0xF2]);
        self.rex(true, dst as u8, src.0);
        self.emit(&[0x0F, 0x2C]);
        self.modrm_reg(dst as u8, src.0);
    }

    /// cvtsd2si r64, xmm (rounds per MXCSR, nearest-even by default).
    pub fn cvtsd2si(&mut self, dst: Gpr, src: Xmm) {
        self.emit(&[0xF2]);
        self.rex(true, dst as u8, src.0);
        self.emit(&[0x0F, 0x2D]);
        self.modrm_reg(dst as u8, src.0);
    }

    pub fn cvtss2sd(&mut self, dst: Xmm, src: Xmm) {
        self.sse_op(Some(0xF3), false, 0x5A, dst.0, src.0);
    }

    pub fn cvtsd2ss(&mut self, dst: Xmm, src: Xmm) {
        self.sse_op(Some(0xF2), false, 0x5A, dst.0, src.0);
    }

    /// cvtdq2ps: four i32 lanes to f32.
    pub fn cvtdq2ps(&mut self, dst: Xmm, src: Xmm) {
        self.sse_op(None, false, 0x5B, dst.0, src.0);
    }

    /// cvttps2dq: four f32 lanes to i32, truncating.
    pub fn cvttps2dq(&mut self, dst: Xmm, src: Xmm) {
        self.sse_op(Some(0xF3), false, 0x5B, dst.0, src.0);
    }

    /// roundsd with an SSE4.1 immediate mode.
    pub fn roundsd(&mut self, dst: Xmm, src: Xmm, mode: u8) {
        self.emit(&[0x66]);
        self.rex_opt(false, dst.0, src.0);
        self.emit(&[0x0F, 0x3A, 0x0B]);
        self.modrm_reg(dst.0, src.0);
        self.emit(&[mode]);
    }

    /// roundss with an SSE4.1 immediate mode.
    pub fn roundss(&mut self, dst: Xmm, src: Xmm, mode: u8) {
        self.emit(&[0x66]);
        self.rex_opt(false, dst.0, src.0);
        self.emit(&[0x0F, 0x3A, 0x0A]);
        self.modrm_reg(dst.0, src.0);
        self.emit(&[mode]);
    }

    /// pcmpeqd; against itself it yields all-ones.
    pub fn pcmpeqd(&mut self, dst: Xmm, src: Xmm) {
        self.sse_op(Some(0x66), false, 0x76, dst.0, src.0);
    }

    /// prefetcht0 [base + disp].
    pub fn prefetch0(&mut self, base: Gpr, disp: i32) {
        self.rex_opt(false, 1, base as u8);
        self.emit(&[0x0F, 0x18]);
        self.modrm_mem(1, base as u8, disp);
    }
}

impl Default for Assembler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes(build: impl FnOnce(&mut Assembler)) -> Vec<u8> {
        let mut asm = Assembler::new();
        build(&mut asm);
        asm.finish().unwrap()
    }

    #[test]
    fn basic_encodings() {
        assert_eq!(bytes(|a| a.push(Gpr::Rbp)), vec![0x55]);
        assert_eq!(bytes(|a| a.push(Gpr::R12)), vec![0x41, 0x54]);
        assert_eq!(bytes(|a| a.ret()), vec![0xC3]);
        assert_eq!(
            bytes(|a| a.mov_rr(Gpr::Rax, Gpr::Rbx)),
            vec![0x48, 0x89, 0xD8]
        );
        assert_eq!(
            bytes(|a| a.mov_rr(Gpr::R12, Gpr::Rax)),
            vec![0x49, 0x89, 0xC4]
        );
        assert_eq!(
            bytes(|a| a.add_rr(Gpr::Rax, Gpr::Rcx)),
            vec![0x48, 0x01, 0xC8]
        );
    }

    #[test]
    fn memory_operands() {
        // mov rax, [rsi + 0x10]
        assert_eq!(
            bytes(|a| a.mov_rm(Gpr::Rax, Gpr::Rsi, 0x10)),
            vec![0x48, 0x8B, 0x86, 0x10, 0, 0, 0]
        );
        // mov [rsp + 8], rax needs the SIB byte.
        assert_eq!(
            bytes(|a| a.mov_mr(Gpr::Rsp, 8, Gpr::Rax)),
            vec![0x48, 0x89, 0x84, 0x24, 0x08, 0, 0, 0]
        );
    }

    #[test]
    fn labels_resolve_backward_and_forward(){
        let code = bytes(|a| {
            let top = a.new_label();
            a.bind(top);
            a.jmp(top);
        });
        // jmp rel32 back over its own five bytes.
        assert_eq!(code, vec![0xE9, 0xFB, 0xFF, 0xFF, 0xFF]);

        let code = bytes(|a| {
            let out = a.new_label();
            a.jcc(Cond::E, out);
            a.ret();
            a.bind(out);
            a.int3();
        });
        assert_eq!(code, vec![0x0F, 0x84, 0x01, 0, 0, 0, 0xC3, 0xCC]);
    }

    #[test]
    fn sse_encodings() {
        // movq xmm0, rax
        assert_eq!(
            bytes(|a| a.movq_xr(Xmm(0), Gpr::Rax)),
            vec![0x66, 0x48, 0x0F, 0x6E, 0xC0]
        );
        // addsd xmm1, xmm2
        assert_eq!(
            bytes(|a| a.addsd(Xmm(1), Xmm(2))),
            vec![0xF2, 0x0F, 0x58, 0xCA]
        );
        // movsd [rsi + 8], xmm1
        assert_eq!(
            bytes(|a| a.movsd_mx(Gpr::Rsi, 8, Xmm(1))),
            vec![0xF2, 0x0F, 0x11, 0x8E, 0x08, 0, 0, 0]
        );
    }

    #[test]
    fn unbound_label_fails_finish() {
        let mut asm = Assembler::new();
        let label = asm.new_label();
        asm.jmp(label);
        assert!(asm.finish().is_err());
    }
}
