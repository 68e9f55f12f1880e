//! The per-opcode translators and the driver that runs them over a guest
//! function, emitting HIR through the builder.
//!
//! Register reads become `load_context` at the field's fixed offset and
//! writes become `store_context`; the context-promotion pass turns the
//! resulting traffic in straight-line code into plain values. Condition
//! and carry bits are stored as individual bytes so unused updates die in
//! DCE.

pub mod alu;
pub mod altivec;
pub mod control;
pub mod fpu;
pub mod memory;

use crate::error::Error;
use crate::hir::{instr_flags, ConstantValue, HirBuilder, HirFunction, LabelId, ValueId, ValueType};
use crate::ppc::context::{ContextInfo, CR_EQ, CR_GT, CR_LT, CR_SO};
use crate::ppc::decode;
use crate::ppc::instr::PpcInstr;
use log::warn;
use std::collections::HashMap;

/// Tells the translator which call targets are registered host shims;
/// calls to those addresses become host thunk invocations instead of
/// guest calls.
pub trait ShimLookup {
    fn is_shim(&self, address: u32) -> bool;
}

/// No shims registered; every call target is guest code.
pub struct NoShims;

impl ShimLookup for NoShims {
    fn is_shim(&self, _address: u32) -> bool {
        false
    }
}

/// Trap tag passed to the host invalid-instruction helper.
pub const TRAP_INVALID_INSTRUCTION: u16 = 1;
/// Trap tag for the `sc` system-call gate (kernel shims live outside the
/// core).
pub const TRAP_SYSCALL: u16 = 2;

/// Drives decode + translate over `start..=end`, producing the function's
/// HIR.
pub struct FunctionTranslator<'a> {
    pub builder: HirBuilder,
    start: u32,
    end: u32,
    labels: HashMap<u32, LabelId>,
    shims: &'a dyn ShimLookup,
    breakpoints: Vec<u32>,
}

impl<'a> FunctionTranslator<'a> {
    pub fn new(start: u32, end: u32, shims: &'a dyn ShimLookup) -> Self {
        Self {
            builder: HirBuilder::new(start),
            start,
            end,
            labels: HashMap::new(),
            shims,
            breakpoints: Vec::new(),
        }
    }

    /// Guest addresses that must break into the debugger when reached.
    pub fn with_breakpoints(mut self, breakpoints: Vec<u32>) -> Self {
        self.breakpoints = breakpoints;
        self
    }

    pub fn start(&self) -> u32 {
        self.start
    }

    pub fn end(&self) -> u32 {
        self.end
    }

    pub fn is_shim(&self, address: u32) -> bool {
        self.shims.is_shim(address)
    }

    /// Whether `address` lies inside the function being translated.
    pub fn in_function(&self, address: u32) -> bool {
        address >= self.start && address <= self.end
    }

    /// The label for a branch target inside the function.
    pub fn label_for(&mut self, address: u32) -> LabelId {
        if let Some(&label) = self.labels.get(&address) {
            return label;
        }
        let label = self.builder.new_named_label(format!("loc_{address:08X}"));
        self.labels.insert(address, label);
        label
    }

    /// Translates the whole range, one 32-bit word per guest instruction,
    /// fetched big-endian through `fetch`.
    pub fn run(&mut self, fetch: impl Fn(u32) -> u32) -> Result<(), Error> {
        // Pre-scan for intra-function branch targets so labels exist
        // before the branches that reference them.
        let mut pc = self.start;
        while pc <= self.end {
            let instr = PpcInstr::new(pc, fetch(pc));
            if let Some(target) = decode::branch_target(instr) {
                if self.in_function(target) {
                    self.label_for(target);
                }
            }
            pc += 4;
        }

        let mut pc = self.start;
        while pc <= self.end {
            let instr = PpcInstr::new(pc, fetch(pc));
            if let Some(label) = self.labels.get(&pc).copied() {
                if self.builder.func().label(label).block.is_none() {
                    self.builder.mark_label(label);
                }
            }
            self.builder.source_offset(pc);
            if self.breakpoints.contains(&pc) {
                let at = self.builder.load_u32(pc);
                self.builder.store_context(ContextInfo::pc(), at);
                self.builder.debug_break();
            }
            match decode::lookup(instr) {
                Some(opcode) => (opcode.translate)(self, instr)?,
                None => {
                    warn!(
                        "invalid instruction {:#010x} at {:#010x}",
                        instr.word, instr.address
                    );
                    self.emit_invalid_instruction(instr);
                }
            }
            pc += 4;
        }

        // Fell off the end of the discovered range: bail back into the
        // runtime so the next block can be resolved on demand.
        self.store_npc(self.end.wrapping_add(4));
        self.builder.return_();
        Ok(())
    }

    pub fn finish(self) -> HirFunction {
        self.builder.finish()
    }

    /// Unknown or reserved encoding: record PC and raw bytes, then trap to
    /// the host helper.
    pub fn emit_invalid_instruction(&mut self, instr: PpcInstr) {
        let b = &mut self.builder;
        let pc = b.load_u32(instr.address);
        b.store_context(ContextInfo::pc(), pc);
        let raw = b.load_u32(instr.word);
        b.store_context(ContextInfo::scratch(), raw);
        b.trap(TRAP_INVALID_INSTRUCTION);
    }

    // Register file access.

    pub fn load_gpr(&mut self, n: usize) -> ValueId {
        self.builder.load_context(ContextInfo::gpr(n), ValueType::I64)
    }

    pub fn store_gpr(&mut self, n: usize, value: ValueId) {
        debug_assert_eq!(self.builder.func().value(value).ty, ValueType::I64);
        self.builder.store_context(ContextInfo::gpr(n), value);
    }

    /// Low 32 bits of a GPR, for the word-sized ALU forms.
    pub fn load_gpr32(&mut self, n: usize) -> ValueId {
        let full = self.load_gpr(n);
        self.builder.truncate(full, ValueType::I32)
    }

    pub fn load_fpr(&mut self, n: usize) -> ValueId {
        self.builder.load_context(ContextInfo::fpr(n), ValueType::F64)
    }

    pub fn store_fpr(&mut self, n: usize, value: ValueId) {
        self.builder.store_context(ContextInfo::fpr(n), value);
    }

    pub fn load_vr(&mut self, n: usize) -> ValueId {
        self.builder.load_context(ContextInfo::vr(n), ValueType::V128)
    }

    pub fn store_vr(&mut self, n: usize, value: ValueId) {
        self.builder.store_context(ContextInfo::vr(n), value);
    }

    pub fn load_lr(&mut self) -> ValueId {
        self.builder.load_context(ContextInfo::lr(), ValueType::I64)
    }

    pub fn store_lr(&mut self, value: ValueId) {
        self.builder.store_context(ContextInfo::lr(), value);
    }

    pub fn load_ctr(&mut self) -> ValueId {
        self.builder.load_context(ContextInfo::ctr(), ValueType::I64)
    }

    pub fn store_ctr(&mut self, value: ValueId) {
        self.builder.store_context(ContextInfo::ctr(), value);
    }

    pub fn load_xer_ca(&mut self) -> ValueId {
        self.builder.load_context(ContextInfo::xer_ca(), ValueType::I8)
    }

    pub fn store_xer_ca(&mut self, value: ValueId) {
        self.builder.store_context(ContextInfo::xer_ca(), value);
    }

    pub fn store_npc(&mut self, npc: u32) {
        let value = self.builder.load_u32(npc);
        self.builder.store_context(ContextInfo::npc(), value);
    }

    /// One CR flag byte as an i8.
    pub fn load_cr_bit(&mut self, field: usize, bit: usize) -> ValueId {
        self.builder
            .load_context(ContextInfo::cr(field, bit), ValueType::I8)
    }

    pub fn store_cr_bit(&mut self, field: usize, bit: usize, value: ValueId) {
        self.builder.store_context(ContextInfo::cr(field, bit), value);
    }

    /// Signed compare of `value` against zero into cr0 (the `Rc` path of
    /// integer ops). Writes four separate bytes so DCE can drop whichever
    /// the guest never reads.
    pub fn update_cr0(&mut self, value: ValueId) {
        let zero = self.builder.load_zero(ValueType::I64);
        let lt = self.builder.compare_slt(value, zero);
        self.store_cr_bit(0, CR_LT, lt);
        let gt = self.builder.compare_sgt(value, zero);
        self.store_cr_bit(0, CR_GT, gt);
        let eq = self.builder.compare_eq(value, zero);
        self.store_cr_bit(0, CR_EQ, eq);
        let so = self
            .builder
            .load_context(ContextInfo::xer_so(), ValueType::I8);
        self.store_cr_bit(0, CR_SO, so);
    }

    /// Full compare into a CR field (`cmp`/`cmpl` family).
    pub fn update_cr_cmp(&mut self, field: usize, a: ValueId, b: ValueId, signed: bool) {
        let (lt, gt) = if signed {
            (
                self.builder.compare_slt(a, b),
                self.builder.compare_sgt(a, b),
            )
        } else {
            (
                self.builder.compare_ult(a, b),
                self.builder.compare_ugt(a, b),
            )
        };
        self.store_cr_bit(field, CR_LT, lt);
        self.store_cr_bit(field, CR_GT, gt);
        let eq = self.builder.compare_eq(a, b);
        self.store_cr_bit(field, CR_EQ, eq);
        let so = self
            .builder
            .load_context(ContextInfo::xer_so(), ValueType::I8);
        self.store_cr_bit(field, CR_SO, so);
    }

    // Effective addresses. Guest addressing is 32-bit; the i64 the memory
    // opcodes take is the zero-extended wrapped address.

    fn wrap_ea(&mut self, ea: ValueId) -> ValueId {
        let narrowed = self.builder.truncate(ea, ValueType::I32);
        self.builder.zero_extend(narrowed, ValueType::I64)
    }

    /// `d(rA)` with the rA=0-means-zero rule.
    pub fn ea_d(&mut self, ra: usize, d: i16) -> ValueId {
        let disp = self
            .builder
            .load_constant(ConstantValue::I64(d as i64));
        let ea = if ra == 0 {
            disp
        } else {
            let base = self.load_gpr(ra);
            self.builder.add(base, disp, 0)
        };
        self.wrap_ea(ea)
    }

    /// `d(rA)` where rA must be valid (update forms).
    pub fn ea_d_update(&mut self, ra: usize, d: i16) -> (ValueId, ValueId) {
        let base = self.load_gpr(ra);
        let disp = self
            .builder
            .load_constant(ConstantValue::I64(d as i64));
        let raw = self.builder.add(base, disp, 0);
        (self.wrap_ea(raw), raw)
    }

    /// `rA + rB` indexed form.
    pub fn ea_x(&mut self, ra: usize, rb: usize) -> ValueId {
        let index = self.load_gpr(rb);
        let ea = if ra == 0 {
            index
        } else {
            let base = self.load_gpr(ra);
            self.builder.add(base, index, 0)
        };
        self.wrap_ea(ea)
    }

    pub fn ea_x_update(&mut self, ra: usize, rb: usize) -> (ValueId, ValueId) {
        let base = self.load_gpr(ra);
        let index = self.load_gpr(rb);
        let raw = self.builder.add(base, index, 0);
        (self.wrap_ea(raw), raw)
    }

    // Guest loads and stores: memory is big-endian, so integer widths pass
    // through byte_swap.

    pub fn load_mem(&mut self, ea: ValueId, ty: ValueType, aligned: bool) -> ValueId {
        let flags = if aligned { instr_flags::LOAD_ALIGNED } else { 0 };
        let raw = self.builder.load(ea, ty, flags);
        match ty {
            ValueType::I8 => raw,
            _ => self.builder.byte_swap(raw),
        }
    }

    pub fn store_mem(&mut self, ea: ValueId, value: ValueId, aligned: bool) {
        let flags = if aligned { instr_flags::STORE_ALIGNED } else { 0 };
        let ty = self.builder.func().value(value).ty;
        let swapped = match ty {
            ValueType::I8 => value,
            _ => self.builder.byte_swap(value),
        };
        self.builder.store(ea, swapped, flags);
    }
}
