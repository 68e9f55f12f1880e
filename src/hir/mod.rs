//! The machine-independent intermediate representation sitting between the
//! PPC front end and the x86-64 back end: typed SSA-like instructions in
//! basic blocks, owned by a per-function arena.

pub mod block;
pub mod builder;
pub mod function;
pub mod instr;
pub mod opcode;
pub mod value;
pub mod vector_ops;

pub use block::{Block, BlockId, Label, LabelId};
pub use builder::HirBuilder;
pub use function::{HirFunction, LocalSlot};
pub use instr::{Instr, Operand};
pub use opcode::{
    instr_flags, make_permute_mask, Opcode, OpcodeFlags, OpcodeInfo, OpcodeSig, OperandKind,
    PackType, RoundMode, OPCODE_INFO, SWIZZLE_XYZW,
};
pub use value::{ConstantValue, InstrId, Use, UseId, Value, ValueFlags, ValueId, ValueType};
