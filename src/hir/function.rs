//! The HIR function: the arena that owns every value, instruction, block,
//! label and use record, plus the def-use bookkeeping passes rely on.
//!
//! All cross-references are arena indices, so the function is the single
//! ownership root; dropping it drops the whole graph.

use crate::hir::block::{Block, BlockId, Label, LabelId};
use crate::hir::instr::{Instr, Operand};
use crate::hir::opcode::{Opcode, OperandKind};
use crate::hir::value::{ConstantValue, InstrId, Use, UseId, Value, ValueId, ValueType};
use std::fmt::Write;

/// A stack-local slot used by `load_local`/`store_local`; finalization
/// assigns the frame offsets.
#[derive(Debug, Clone, Copy)]
pub struct LocalSlot {
    pub ty: ValueType,
    pub offset: u32,
}

/// One guest function's worth of HIR.
pub struct HirFunction {
    pub guest_address: u32,
    pub(crate) values: Vec<Value>,
    pub(crate) instrs: Vec<Instr>,
    pub(crate) blocks: Vec<Block>,
    pub(crate) labels: Vec<Label>,
    uses: Vec<Use>,
    use_free: Vec<UseId>,
    pub(crate) block_head: Option<BlockId>,
    pub(crate) block_tail: Option<BlockId>,
    pub(crate) comments: Vec<String>,
    pub(crate) locals: Vec<LocalSlot>,
    /// Bytes of stack-local storage, computed by finalization.
    pub stack_local_size: u32,
}

impl HirFunction {
    pub fn new(guest_address: u32) -> Self {
        Self {
            guest_address,
            values: Vec::new(),
            instrs: Vec::new(),
            blocks: Vec::new(),
            labels: Vec::new(),
            uses: Vec::new(),
            use_free: Vec::new(),
            block_head: None,
            block_tail: None,
            comments: Vec::new(),
            locals: Vec::new(),
            stack_local_size: 0,
        }
    }

    // Arena accessors.

    #[inline]
    pub fn value(&self, id: ValueId) -> &Value {
        &self.values[id.0 as usize]
    }

    #[inline]
    pub fn value_mut(&mut self, id: ValueId) -> &mut Value {
        &mut self.values[id.0 as usize]
    }

    #[inline]
    pub fn instr(&self, id: InstrId) -> &Instr {
        &self.instrs[id.0 as usize]
    }

    #[inline]
    pub fn instr_mut(&mut self, id: InstrId) -> &mut Instr {
        &mut self.instrs[id.0 as usize]
    }

    #[inline]
    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.0 as usize]
    }

    #[inline]
    pub fn block_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.blocks[id.0 as usize]
    }

    #[inline]
    pub fn label(&self, id: LabelId) -> &Label {
        &self.labels[id.0 as usize]
    }

    #[inline]
    pub fn label_mut(&mut self, id: LabelId) -> &mut Label {
        &mut self.labels[id.0 as usize]
    }

    pub fn value_count(&self) -> usize {
        self.values.len()
    }

    pub fn locals(&self) -> &[LocalSlot] {
        &self.locals
    }

    pub fn comment_text(&self, index: u64) -> &str {
        &self.comments[index as usize]
    }

    // Construction.

    pub fn alloc_value(&mut self, ty: ValueType) -> ValueId {
        let id = ValueId(self.values.len() as u32);
        self.values.push(Value::new(id.0, ty));
        id
    }

    pub fn alloc_constant(&mut self, constant: ConstantValue) -> ValueId {
        let id = self.alloc_value(constant.ty());
        self.value_mut(id).set_constant(constant);
        id
    }

    pub fn alloc_local(&mut self, ty: ValueType) -> u64 {
        self.locals.push(LocalSlot { ty, offset: 0 });
        (self.locals.len() - 1) as u64
    }

    pub fn intern_comment(&mut self, text: String) -> u64 {
        self.comments.push(text);
        (self.comments.len() - 1) as u64
    }

    /// Appends a fresh empty block after the current tail.
    pub fn append_block(&mut self) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        let mut block = Block::new();
        block.prev = self.block_tail;
        self.blocks.push(block);
        match self.block_tail {
            Some(tail) => self.block_mut(tail).next = Some(id),
            None => self.block_head = Some(id),
        }
        self.block_tail = Some(id);
        id
    }

    pub fn alloc_label(&mut self) -> LabelId {
        let id = LabelId(self.labels.len() as u32);
        self.labels.push(Label {
            id: id.0,
            name: None,
            block: None,
        });
        id
    }

    /// Appends an instruction at the tail of `block` and wires the
    /// destination's def pointer.
    pub fn append_instr(
        &mut self,
        block: BlockId,
        opcode: Opcode,
        flags: u16,
        dest: Option<ValueId>,
        srcs: [Operand; 3],
    ) -> InstrId {
        let id = InstrId(self.instrs.len() as u32);
        let mut instr = Instr::new(opcode, flags, block);
        instr.dest = dest;
        instr.prev = self.block(block).instr_tail;
        self.instrs.push(instr);
        match self.block(block).instr_tail {
            Some(tail) => self.instr_mut(tail).next = Some(id),
            None => self.block_mut(block).instr_head = Some(id),
        }
        self.block_mut(block).instr_tail = Some(id);
        if let Some(dest) = dest {
            self.value_mut(dest).def = Some(id);
        }
        for (slot, operand) in srcs.into_iter().enumerate() {
            self.set_src(id, slot, operand);
        }
        id
    }

    // Def-use maintenance.

    fn alloc_use(&mut self, record: Use) -> UseId {
        match self.use_free.pop() {
            Some(id) => {
                self.uses[id.0 as usize] = record;
                id
            }
            None => {
                let id = UseId(self.uses.len() as u32);
                self.uses.push(record);
                id
            }
        }
    }

    /// Points operand `slot` of `instr` at `operand`, releasing whatever
    /// use record the slot held before.
    pub fn set_src(&mut self, instr: InstrId, slot: usize, operand: Operand) {
        if let Some(old_use) = self.instr(instr).src_uses[slot] {
            let old_value = self.instr(instr).srcs[slot]
                .value()
                .expect("use record without value operand");
            self.remove_use(old_value, old_use);
            self.instr_mut(instr).src_uses[slot] = None;
        }
        self.instr_mut(instr).srcs[slot] = operand;
        if let Operand::Value(value) = operand {
            let head = self.value(value).use_head;
            let use_id = self.alloc_use(Use {
                instr,
                slot: slot as u8,
                prev: None,
                next: head,
            });
            if let Some(head) = head {
                self.uses[head.0 as usize].prev = Some(use_id);
            }
            self.value_mut(value).use_head = Some(use_id);
            self.instr_mut(instr).src_uses[slot] = Some(use_id);
        }
    }

    fn remove_use(&mut self, value: ValueId, use_id: UseId) {
        let record = self.uses[use_id.0 as usize];
        match record.prev {
            Some(prev) => self.uses[prev.0 as usize].next = record.next,
            None => self.value_mut(value).use_head = record.next,
        }
        if let Some(next) = record.next {
            self.uses[next.0 as usize].prev = record.prev;
        }
        self.use_free.push(use_id);
    }

    /// Collects the (instruction, slot) pairs consuming `value`.
    pub fn uses_of(&self, value: ValueId) -> Vec<(InstrId, usize)> {
        let mut out = Vec::new();
        let mut cursor = self.value(value).use_head;
        while let Some(use_id) = cursor {
            let record = self.uses[use_id.0 as usize];
            out.push((record.instr, record.slot as usize));
            cursor = record.next;
        }
        out
    }

    pub fn has_uses(&self, value: ValueId) -> bool {
        self.value(value).use_head.is_some()
    }

    // Rewriting.

    /// Rewrites `instr` into `assign dest, src`, releasing its old operands.
    pub fn replace_with_assign(&mut self, instr: InstrId, src: ValueId) {
        for slot in 0..3 {
            self.set_src(instr, slot, Operand::None);
        }
        self.instr_mut(instr).opcode = Opcode::Assign;
        self.instr_mut(instr).flags = 0;
        self.set_src(instr, 0, Operand::Value(src));
    }

    /// Rewrites `instr` into a nop, detaching its destination and operands.
    pub fn replace_with_nop(&mut self, instr: InstrId) {
        for slot in 0..3 {
            self.set_src(instr, slot, Operand::None);
        }
        if let Some(dest) = self.instr(instr).dest {
            self.value_mut(dest).def = None;
        }
        let instr = self.instr_mut(instr);
        instr.dest = None;
        instr.opcode = Opcode::Nop;
        instr.flags = 0;
    }

    /// Unlinks `instr` from its block. The arena slot stays behind.
    pub fn unlink_instr(&mut self, id: InstrId) {
        let (block, prev, next) = {
            let instr = self.instr(id);
            (instr.block, instr.prev, instr.next)
        };
        match prev {
            Some(prev) => self.instr_mut(prev).next = next,
            None => self.block_mut(block).instr_head = next,
        }
        match next {
            Some(next) => self.instr_mut(next).prev = prev,
            None => self.block_mut(block).instr_tail = prev,
        }
        let instr = self.instr_mut(id);
        instr.prev = None;
        instr.next = None;
    }

    // Traversal.

    pub fn entry_block(&self) -> Option<BlockId> {
        self.block_head
    }

    /// Blocks in layout order. Collected up front so callers can mutate
    /// while walking.
    pub fn block_order(&self) -> Vec<BlockId> {
        let mut out = Vec::with_capacity(self.blocks.len());
        let mut cursor = self.block_head;
        while let Some(id) = cursor {
            out.push(id);
            cursor = self.block(id).next;
        }
        out
    }

    /// Instructions of `block` in layout order, collected up front.
    pub fn instr_order(&self, block: BlockId) -> Vec<InstrId> {
        let mut out = Vec::new();
        let mut cursor = self.block(block).instr_head;
        while let Some(id) = cursor {
            out.push(id);
            cursor = self.instr(id).next;
        }
        out
    }

    /// The block a label resolves to, if it has been bound.
    pub fn label_block(&self, label: LabelId) -> Option<BlockId> {
        self.label(label).block
    }

    // Dumping.

    fn write_operand(&self, out: &mut String, kind: OperandKind, operand: Operand) {
        match (kind, operand) {
            (OperandKind::V, Operand::Value(id)) => {
                let value = self.value(id);
                if value.is_constant() {
                    let _ = match value.constant {
                        ConstantValue::F32(v) => write!(out, "{v}.f32"),
                        ConstantValue::F64(v) => write!(out, "{v}.f64"),
                        ConstantValue::V128(v) => write!(out, "{v:?}.v128"),
                        other => {
                            write!(out, "{:#x}.{}", other.as_u64(), value.ty.name())
                        }
                    };
                } else {
                    let _ = write!(out, "v{}.{}", value.ordinal, value.ty.name());
                }
            }
            (OperandKind::L, Operand::Label(id)) => {
                let label = self.label(id);
                match &label.name {
                    Some(name) => {
                        let _ = write!(out, "{name}");
                    }
                    None => {
                        let _ = write!(out, "label{}", label.id);
                    }
                }
            }
            (OperandKind::O, Operand::Offset(offset)) => {
                let _ = write!(out, "+{offset}");
            }
            (OperandKind::S, Operand::Symbol(address)) => {
                let _ = write!(out, "fn_{address:08X}");
            }
            _ => {
                let _ = write!(out, "?");
            }
        }
    }

    /// Renders the function in the stable textual syntax tests assert on,
    /// e.g. `v81.i64 = load_context +88`.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "; function {:08X}", self.guest_address);
        for block_id in self.block_order() {
            let block = self.block(block_id);
            if block.labels.is_empty() {
                let _ = writeln!(out, "block{}:", block.ordinal);
            } else {
                for label_id in &block.labels {
                    let label = self.label(*label_id);
                    match &label.name {
                        Some(name) => {
                            let _ = writeln!(out, "{name}:");
                        }
                        None => {
                            let _ = writeln!(out, "label{}:", label.id);
                        }
                    }
                }
            }
            for instr_id in self.instr_order(block_id) {
                let instr = self.instr(instr_id);
                if instr.opcode == Opcode::Comment {
                    if let Some(index) = instr.srcs[0].offset() {
                        let _ = writeln!(out, "  ; {}", self.comment_text(index));
                    }
                    continue;
                }
                let info = instr.opcode.info();
                out.push_str("  ");
                if let Some(dest) = instr.dest {
                    let value = self.value(dest);
                    let _ = write!(out, "v{}.{} = ", value.ordinal, value.ty.name());
                }
                out.push_str(info.name);
                let mut first = true;
                for slot in 0..3 {
                    if info.sig.srcs[slot] == OperandKind::X {
                        break;
                    }
                    out.push_str(if first { " " } else { ", " });
                    first = false;
                    self.write_operand(&mut out, info.sig.srcs[slot], instr.srcs[slot]);
                }
                if instr.flags != 0 {
                    let _ = write!(out, " [{:#x}]", instr.flags);
                }
                out.push('\n');
            }
        }
        out
    }

    /// Debug-build structural check: defs point at their defining
    /// instruction and use lists mirror the operand slots exactly.
    pub fn validate(&self) -> Result<(), String> {
        for block_id in self.block_order() {
            for instr_id in self.instr_order(block_id) {
                let instr = self.instr(instr_id);
                if let Some(dest) = instr.dest {
                    if self.value(dest).def != Some(instr_id) {
                        return Err(format!(
                            "v{} def does not point at its writer",
                            self.value(dest).ordinal
                        ));
                    }
                }
                for slot in 0..3 {
                    if let Operand::Value(value) = instr.srcs[slot] {
                        let found = self
                            .uses_of(value)
                            .iter()
                            .filter(|(i, s)| *i == instr_id && *s == slot)
                            .count();
                        if found != 1 {
                            return Err(format!(
                                "v{} use list out of sync at instr {}",
                                self.value(value).ordinal,
                                instr_id.0
                            ));
                        }
                    }
                }
            }
        }
        Ok(())
    }
}
