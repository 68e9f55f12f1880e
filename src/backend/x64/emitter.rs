//! The x86-64 code emitter: drives lowering over a finalized function,
//! wraps the result in the prologue/epilogue contract, and records the
//! guest-PC source map.
//!
//! Register roles: RSI holds the `PpcContext`, RDI the membase, both
//! reserved for the function's whole body. Values live in the homes the
//! allocator picked; scratch computation uses the caller-saved set.
//! Frames are rbp-chained so the host unwinder can walk guest frames.

use crate::backend::x64::asm::{AsmLabel, Assembler, Gpr, Xmm};
use crate::backend::x64::lowering;
use crate::backend::x64::regalloc::{Allocation, Home};
use crate::error::Error;
use crate::hir::{ConstantValue, HirFunction, ValueId, ValueType};
use std::collections::HashMap;

/// The context register.
pub const CTX: Gpr = Gpr::Rsi;
/// The membase register.
pub const MEMBASE: Gpr = Gpr::Rdi;

/// Host helper entry points the generated code calls out to. All are
/// `extern "C"`; the first argument is always the context except for the
/// vector evaluator.
#[derive(Clone, Copy)]
pub struct HelperTable {
    /// `fn(ctx, target_guest_address)`.
    pub resolve_and_call: usize,
    /// `fn(ctx, shim_guest_address)`.
    pub call_extern: usize,
    /// `fn(ctx, tag)`.
    pub trap: usize,
    /// `fn(ctx)`.
    pub debug_break: usize,
    /// `fn(packed_op, a, b, c, out)` over `Vec128` slots.
    pub vector_op: usize,
}

/// One record per guest instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceMapEntry {
    pub guest_pc: u32,
    pub hir_ordinal: u32,
    pub host_offset: u32,
}

/// The finished blob, pre-publication.
pub struct EmittedFunction {
    pub code: Vec<u8>,
    pub source_map: Vec<SourceMapEntry>,
}

/// Frame offsets relative to RSP after the prologue.
pub(crate) struct FrameLayout {
    /// Three argument slots plus one result slot for the vector helper.
    pub scratch_base: i32,
    pub locals_base: i32,
    pub spill_base: i32,
    /// Bytes subtracted from RSP.
    pub total: i32,
}

pub(crate) const SCRATCH_SLOTS: i32 = 4;

pub struct X64Emitter<'a> {
    pub(crate) asm: Assembler,
    pub(crate) func: &'a HirFunction,
    pub(crate) allocation: &'a Allocation,
    pub(crate) helpers: &'a HelperTable,
    pub(crate) block_labels: HashMap<u32, AsmLabel>,
    pub(crate) epilogue: AsmLabel,
    pub(crate) frame: FrameLayout,
    source_map: Vec<SourceMapEntry>,
}

impl<'a> X64Emitter<'a> {
    pub fn emit(
        func: &'a HirFunction,
        allocation: &'a Allocation,
        helpers: &'a HelperTable,
    ) -> Result<EmittedFunction, Error> {
        let mut asm = Assembler::new();
        let epilogue = asm.new_label();

        let pushed = 1 + allocation.used_gprs.len() as i32; // rbp + used pool regs
        let scratch_base = 0;
        let locals_base = SCRATCH_SLOTS * 16;
        let spill_base = locals_base + func.stack_local_size as i32;
        let mut total = spill_base + allocation.spill_size as i32;
        // Return address (8) + pushes must leave RSP 16-aligned after the
        // frame is carved out.
        while (total + pushed * 8 + 8) % 16 != 0 {
            total += 8;
        }
        let frame = FrameLayout {
            scratch_base,
            locals_base,
            spill_base,
            total,
        };

        let mut emitter = X64Emitter {
            asm,
            func,
            allocation,
            helpers,
            block_labels: HashMap::new(),
            epilogue,
            frame,
            source_map: Vec::new(),
        };
        emitter.emit_body()?;
        let code = emitter
            .asm
            .finish()
            .map_err(|reason| Error::Emit {
                address: func.guest_address,
                reason,
            })?;
        Ok(EmittedFunction {
            code,
            source_map: emitter.source_map,
        })
    }

    fn emit_body(&mut self) -> Result<(), Error> {
        // Prologue: rbp chain, used callee-saved registers, frame.
        self.asm.push(Gpr::Rbp);
        self.asm.mov_rr(Gpr::Rbp, Gpr::Rsp);
        let used = self.allocation.used_gprs.clone();
        for reg in &used {
            self.asm.push(*reg);
        }
        if self.frame.total != 0 {
            self.asm.sub_ri(Gpr::Rsp, self.frame.total);
        }

        let blocks = self.func.block_order();
        for &block in &blocks {
            let label = self.block_label(block.0);
            self.asm.bind(label);
            let instrs = self.func.instr_order(block);
            let mut at = 0;
            while at < instrs.len() {
                let next = instrs.get(at + 1).copied();
                let consumed = lowering::lower_instr(self, instrs[at], next)?;
                at += consumed;
            }
        }

        // Epilogue.
        let epilogue = self.epilogue;
        self.asm.bind(epilogue);
        if self.frame.total != 0 {
            self.asm.add_ri(Gpr::Rsp, self.frame.total);
        }
        for reg in used.iter().rev() {
            self.asm.pop(*reg);
        }
        self.asm.pop(Gpr::Rbp);
        self.asm.ret();
        Ok(())
    }

    pub(crate) fn block_label(&mut self, block: u32) -> AsmLabel {
        if let Some(&label) = self.block_labels.get(&block) {
            return label;
        }
        let label = self.asm.new_label();
        self.block_labels.insert(block, label);
        label
    }

    pub(crate) fn record_source_offset(&mut self, guest_pc: u32, hir_ordinal: u32) {
        self.source_map.push(SourceMapEntry {
            guest_pc,
            hir_ordinal,
            host_offset: self.asm.offset() as u32,
        });
    }

    pub(crate) fn emit_error(&self, reason: impl Into<String>) -> Error {
        Error::Emit {
            address: self.func.guest_address,
            reason: reason.into(),
        }
    }

    // Frame addressing.

    pub(crate) fn spill_addr(&self, offset: u32) -> (Gpr, i32) {
        (Gpr::Rsp, self.frame.spill_base + offset as i32)
    }

    pub(crate) fn local_addr(&self, slot: u64) -> (Gpr, i32) {
        let offset = self.func.locals()[slot as usize].offset;
        (Gpr::Rsp, self.frame.locals_base + offset as i32)
    }

    /// One of the four 16-byte scratch slots, with an extra RSP shift for
    /// use between `begin_host_call`/`end_host_call`.
    pub(crate) fn scratch_addr(&self, index: i32, shifted: bool) -> (Gpr, i32) {
        let shift = if shifted { 16 } else { 0 };
        (Gpr::Rsp, self.frame.scratch_base + index * 16 + shift)
    }

    // Value movement.

    pub(crate) fn ty(&self, value: ValueId) -> ValueType {
        self.func.value(value).ty
    }

    /// Loads an integer value into `dst` (low `ty.bits()` valid).
    pub(crate) fn load_int(&mut self, value: ValueId, dst: Gpr) {
        let v = self.func.value(value);
        if v.is_constant() {
            self.asm.mov_ri(dst, v.constant.as_u64());
            return;
        }
        match self.allocation.home(value) {
            Home::Gpr(reg) => {
                if reg != dst {
                    self.asm.mov_rr(dst, reg);
                }
            }
            Home::Slot(offset) => {
                let (base, disp) = self.spill_addr(offset);
                self.asm.mov_rm(dst, base, disp);
            }
            home => unreachable!("int value without int home: {home:?}"),
        }
    }

    /// Stores `src` into the destination value's home.
    pub(crate) fn store_int(&mut self, value: ValueId, src: Gpr) {
        match self.allocation.home(value) {
            Home::Gpr(reg) => {
                if reg != src {
                    self.asm.mov_rr(reg, src);
                }
            }
            Home::Slot(offset) => {
                let (base, disp) = self.spill_addr(offset);
                self.asm.mov_mr(base, disp, src);
            }
            Home::None => {}
            home => unreachable!("int value without int home: {home:?}"),
        }
    }

    /// Loads a float or vector value into `dst`. Uses RAX for constant
    /// materialization.
    pub(crate) fn load_xmm(&mut self, value: ValueId, dst: Xmm) {
        let v = self.func.value(value);
        if v.is_constant() {
            match v.constant {
                ConstantValue::V128(vec) => {
                    let (base, disp) = self.scratch_addr(3, false);
                    self.asm.mov_ri(Gpr::Rax, vec.low());
                    self.asm.mov_mr(base, disp, Gpr::Rax);
                    self.asm.mov_ri(Gpr::Rax, vec.high());
                    self.asm.mov_mr(base, disp + 8, Gpr::Rax);
                    self.asm.movdqu_xm(dst, base, disp);
                }
                other => {
                    self.asm.mov_ri(Gpr::Rax, other.as_u64());
                    self.asm.movq_xr(dst, Gpr::Rax);
                }
            }
            return;
        }
        match self.allocation.home(value) {
            Home::Xmm(reg) => {
                if reg != dst {
                    self.asm.movaps_xx(dst, reg);
                }
            }
            Home::Slot(offset) => {
                let (base, disp) = self.spill_addr(offset);
                if v.ty == ValueType::V128 {
                    self.asm.movdqu_xm(dst, base, disp);
                } else {
                    self.asm.movsd_xm(dst, base, disp);
                }
            }
            home => unreachable!("float value without xmm home: {home:?}"),
        }
    }

    pub(crate) fn store_xmm(&mut self, value: ValueId, src: Xmm) {
        let ty = self.ty(value);
        match self.allocation.home(value) {
            Home::Xmm(reg) => {
                if reg != src {
                    self.asm.movaps_xx(reg, src);
                }
            }
            Home::Slot(offset) => {
                let (base, disp) = self.spill_addr(offset);
                if ty == ValueType::V128 {
                    self.asm.movdqu_mx(base, disp, src);
                } else {
                    self.asm.movsd_mx(base, disp, src);
                }
            }
            Home::None => {}
            home => unreachable!("float value without xmm home: {home:?}"),
        }
    }

    /// Normalizes `reg` so all 64 bits reflect the value of width `ty`.
    pub(crate) fn extend_to_64(&mut self, reg: Gpr, ty: ValueType, signed: bool) {
        match (ty, signed) {
            (ValueType::I8, false) => self.asm.movzx8_rr(reg, reg),
            (ValueType::I8, true) => self.asm.movsx8_rr(reg, reg),
            (ValueType::I16, false) => self.asm.movzx16_rr(reg, reg),
            (ValueType::I16, true) => self.asm.movsx16_rr(reg, reg),
            (ValueType::I32, false) => self.asm.mov_rr32(reg, reg),
            (ValueType::I32, true) => self.asm.movsx32_rr(reg, reg),
            _ => {}
        }
    }

    // Host call scaffolding. RSI/RDI are caller-saved in the host ABI, so
    // the reserved roles are parked on the stack around every call; the
    // two pushes keep RSP 16-aligned.

    pub(crate) fn begin_host_call(&mut self) {
        self.asm.push(Gpr::Rsi);
        self.asm.push(Gpr::Rdi);
    }

    pub(crate) fn end_host_call(&mut self) {
        self.asm.pop(Gpr::Rdi);
        self.asm.pop(Gpr::Rsi);
    }

    /// Calls `helper(ctx, arg1)`; `arg1_in` names the register already
    /// holding the second argument (or None for a one-argument helper).
    /// The argument must not live in RSI or RDI.
    pub(crate) fn host_call_ctx(&mut self, helper: usize, arg1_in: Option<Gpr>) {
        self.begin_host_call();
        if let Some(arg) = arg1_in {
            debug_assert!(!matches!(arg, Gpr::Rsi | Gpr::Rdi));
            if arg != Gpr::Rdx {
                self.asm.mov_rr(Gpr::Rdx, arg);
            }
        }
        self.asm.mov_rr(Gpr::Rdi, CTX);
        if arg1_in.is_some() {
            self.asm.mov_rr(Gpr::Rsi, Gpr::Rdx);
        }
        self.asm.mov_ri(Gpr::Rax, helper as u64);
        self.asm.call_reg(Gpr::Rax);
        self.end_host_call();
    }
}
