//! The HIR opcode catalogue: one descriptor per opcode giving its textual
//! name, operand signature and behavior flags. The descriptor table is a
//! compile-time array indexed by the opcode discriminant; there is no
//! runtime registration step.

use bitflags::bitflags;

bitflags! {
    /// Behavior flags carried by an opcode descriptor.
    pub struct OpcodeFlags: u32 {
        /// Terminates or redirects control flow.
        const BRANCH      = 1 << 1;
        /// Touches guest memory.
        const MEMORY      = 1 << 2;
        /// Operands may be swapped freely.
        const COMMUTATIVE = 1 << 3;
        /// Must never be removed, even with an unused destination.
        const VOLATILE    = 1 << 4;
        /// Carries no semantics; skipped by most passes.
        const IGNORE      = 1 << 5;
        const BRANCH_VOLATILE = Self::BRANCH.bits | Self::VOLATILE.bits;
        const MEMORY_VOLATILE = Self::MEMORY.bits | Self::VOLATILE.bits;
    }
}

/// What an operand slot (or the destination) holds. The single letters
/// follow the dump syntax: none, label, raw offset/immediate, symbol,
/// value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    X,
    L,
    O,
    S,
    V,
}

/// An opcode's signature: destination kind plus up to three operand kinds.
#[derive(Debug, Clone, Copy)]
pub struct OpcodeSig {
    pub dest: OperandKind,
    pub srcs: [OperandKind; 3],
}

impl OpcodeSig {
    const fn new(dest: OperandKind, s1: OperandKind, s2: OperandKind, s3: OperandKind) -> Self {
        Self {
            dest,
            srcs: [s1, s2, s3],
        }
    }
}

/// Static descriptor for one opcode.
pub struct OpcodeInfo {
    pub name: &'static str,
    pub sig: OpcodeSig,
    pub flags: OpcodeFlags,
}

macro_rules! opcodes {
    ($( $variant:ident => $name:literal, ($dest:ident, $s1:ident, $s2:ident, $s3:ident), $flags:ident; )*) => {
        /// Every operation the HIR can express.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u16)]
        pub enum Opcode {
            $($variant),*
        }

        /// Descriptor table, indexed by `Opcode as usize`.
        pub static OPCODE_INFO: &[OpcodeInfo] = &[
            $(
                OpcodeInfo {
                    name: $name,
                    sig: OpcodeSig::new(
                        OperandKind::$dest,
                        OperandKind::$s1,
                        OperandKind::$s2,
                        OperandKind::$s3,
                    ),
                    flags: OpcodeFlags::$flags,
                }
            ),*
        ];
    };
}

// Flag aliases so the table reads cleanly.
impl OpcodeFlags {
    const NONE: OpcodeFlags = OpcodeFlags::empty();
}

opcodes! {
    Comment           => "comment",             (X, O, X, X), IGNORE;
    Nop               => "nop",                 (X, X, X, X), IGNORE;
    SourceOffset      => "source_offset",       (X, O, X, X), VOLATILE;

    DebugBreak        => "debug_break",         (X, X, X, X), VOLATILE;
    DebugBreakTrue    => "debug_break_true",    (X, V, X, X), VOLATILE;
    Trap              => "trap",                (X, X, X, X), VOLATILE;
    TrapTrue          => "trap_true",           (X, V, X, X), VOLATILE;

    Call              => "call",                (X, S, X, X), BRANCH_VOLATILE;
    CallTrue          => "call_true",           (X, V, S, X), BRANCH_VOLATILE;
    CallIndirect      => "call_indirect",       (X, V, X, X), BRANCH_VOLATILE;
    CallIndirectTrue  => "call_indirect_true",  (X, V, V, X), BRANCH_VOLATILE;
    CallExtern        => "call_extern",         (X, S, X, X), BRANCH_VOLATILE;
    Return            => "return",              (X, X, X, X), BRANCH_VOLATILE;

    Branch            => "branch",              (X, L, X, X), BRANCH_VOLATILE;
    BranchIf          => "branch_if",           (X, V, L, L), BRANCH_VOLATILE;
    BranchTrue        => "branch_true",         (X, V, L, X), BRANCH_VOLATILE;
    BranchFalse       => "branch_false",        (X, V, L, X), BRANCH_VOLATILE;

    Assign            => "assign",              (V, V, X, X), NONE;
    Cast              => "cast",                (V, V, X, X), NONE;
    ZeroExtend        => "zero_extend",         (V, V, X, X), NONE;
    SignExtend        => "sign_extend",         (V, V, X, X), NONE;
    Truncate          => "truncate",            (V, V, X, X), NONE;
    Convert           => "convert",             (V, V, X, X), NONE;
    Round             => "round",               (V, V, X, X), NONE;
    VectorConvertI2F  => "vector_convert_i2f",  (V, V, X, X), NONE;
    VectorConvertF2I  => "vector_convert_f2i",  (V, V, X, X), NONE;

    LoadContext       => "load_context",        (V, O, X, X), NONE;
    StoreContext      => "store_context",       (X, O, V, X), VOLATILE;
    LoadLocal         => "load_local",          (V, O, X, X), NONE;
    StoreLocal        => "store_local",         (X, O, V, X), VOLATILE;

    Load              => "load",                (V, V, X, X), MEMORY;
    LoadAcquire       => "load_acquire",        (V, V, X, X), MEMORY_VOLATILE;
    Store             => "store",               (X, V, V, X), MEMORY_VOLATILE;
    StoreRelease      => "store_release",       (V, V, V, X), MEMORY_VOLATILE;
    Prefetch          => "prefetch",            (X, V, O, X), VOLATILE;

    Max               => "max",                 (V, V, V, X), NONE;
    Min               => "min",                 (V, V, V, X), NONE;
    Select            => "select",              (V, V, V, V), NONE;
    IsTrue            => "is_true",             (V, V, X, X), NONE;
    IsFalse           => "is_false",            (V, V, X, X), NONE;

    CompareEq         => "compare_eq",          (V, V, V, X), COMMUTATIVE;
    CompareNe         => "compare_ne",          (V, V, V, X), COMMUTATIVE;
    CompareSlt        => "compare_slt",         (V, V, V, X), NONE;
    CompareSle        => "compare_sle",         (V, V, V, X), NONE;
    CompareSgt        => "compare_sgt",         (V, V, V, X), NONE;
    CompareSge        => "compare_sge",         (V, V, V, X), NONE;
    CompareUlt        => "compare_ult",         (V, V, V, X), NONE;
    CompareUle        => "compare_ule",         (V, V, V, X), NONE;
    CompareUgt        => "compare_ugt",         (V, V, V, X), NONE;
    CompareUge        => "compare_uge",         (V, V, V, X), NONE;
    DidCarry          => "did_carry",           (V, V, X, X), NONE;
    DidOverflow       => "did_overflow",        (V, V, X, X), NONE;

    VectorCompareEq   => "vector_compare_eq",   (V, V, V, X), COMMUTATIVE;
    VectorCompareSgt  => "vector_compare_sgt",  (V, V, V, X), NONE;
    VectorCompareSge  => "vector_compare_sge",  (V, V, V, X), NONE;
    VectorCompareUgt  => "vector_compare_ugt",  (V, V, V, X), NONE;
    VectorCompareUge  => "vector_compare_uge",  (V, V, V, X), NONE;

    Add               => "add",                 (V, V, V, X), COMMUTATIVE;
    AddCarry          => "add_carry",           (V, V, V, V), NONE;
    Sub               => "sub",                 (V, V, V, X), NONE;
    Mul               => "mul",                 (V, V, V, X), COMMUTATIVE;
    MulHi             => "mul_hi",              (V, V, V, X), COMMUTATIVE;
    Div               => "div",                 (V, V, V, X), NONE;
    Rem               => "rem",                 (V, V, V, X), NONE;
    MulAdd            => "mul_add",             (V, V, V, V), NONE;
    MulSub            => "mul_sub",             (V, V, V, V), NONE;
    Neg               => "neg",                 (V, V, X, X), NONE;
    Abs               => "abs",                 (V, V, X, X), NONE;
    Sqrt              => "sqrt",                (V, V, X, X), NONE;
    RSqrt             => "rsqrt",               (V, V, X, X), NONE;
    DotProduct3       => "dot_product_3",       (V, V, V, X), NONE;
    DotProduct4       => "dot_product_4",       (V, V, V, X), NONE;

    And               => "and",                 (V, V, V, X), COMMUTATIVE;
    Or                => "or",                  (V, V, V, X), COMMUTATIVE;
    Xor               => "xor",                 (V, V, V, X), COMMUTATIVE;
    Not               => "not",                 (V, V, X, X), NONE;
    Shl               => "shl",                 (V, V, V, X), NONE;
    Shr               => "shr",                 (V, V, V, X), NONE;
    Sha               => "sha",                 (V, V, V, X), NONE;
    VectorShl         => "vector_shl",          (V, V, V, X), NONE;
    VectorShr         => "vector_shr",          (V, V, V, X), NONE;
    VectorSha         => "vector_sha",          (V, V, V, X), NONE;
    RotateLeft        => "rotate_left",         (V, V, V, X), NONE;
    ByteSwap          => "byte_swap",           (V, V, X, X), NONE;
    Cntlz             => "cntlz",               (V, V, X, X), NONE;

    Insert            => "insert",              (V, V, O, V), NONE;
    Extract           => "extract",             (V, V, O, X), NONE;
    Splat             => "splat",               (V, V, X, X), NONE;
    Permute           => "permute",             (V, V, V, V), NONE;
    Swizzle           => "swizzle",             (V, V, O, X), NONE;
    Pack              => "pack",                (V, V, X, X), NONE;
    Unpack            => "unpack",              (V, V, X, X), NONE;

    CompareExchange   => "compare_exchange",    (V, V, V, V), MEMORY_VOLATILE;
    AtomicAdd         => "atomic_add",          (V, V, V, X), MEMORY_VOLATILE;
    AtomicSub         => "atomic_sub",          (V, V, V, X), MEMORY_VOLATILE;
}

impl Opcode {
    #[inline]
    pub fn info(self) -> &'static OpcodeInfo {
        &OPCODE_INFO[self as usize]
    }

    #[inline]
    pub fn name(self) -> &'static str {
        self.info().name
    }

    #[inline]
    pub fn is_volatile(self) -> bool {
        self.info().flags.contains(OpcodeFlags::VOLATILE)
    }

    #[inline]
    pub fn is_branch(self) -> bool {
        self.info().flags.contains(OpcodeFlags::BRANCH)
    }

    /// Whether the instruction ends a basic block.
    #[inline]
    pub fn is_terminator(self) -> bool {
        matches!(
            self,
            Opcode::Branch | Opcode::BranchIf | Opcode::Return
        )
    }
}

/// Rounding behavior for `Convert`/`Round`, stored in the instruction flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum RoundMode {
    ToZero = 0,
    ToNearest = 1,
}

/// Sub-lane layouts for `Pack`/`Unpack`, stored in the instruction flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum PackType {
    D3dColor = 0,
    Float16_2 = 1,
    Float16_4 = 2,
    Short2 = 3,
}

/// Instruction-level flag bits. Stored in `Instr::flags`; the low nibble is
/// reserved for a lane/part [`crate::hir::ValueType`] on vector opcodes and
/// for [`RoundMode`]/[`PackType`] payloads on conversions.
pub mod instr_flags {
    pub const ARITHMETIC_SET_CARRY: u16 = 1 << 4;
    pub const ARITHMETIC_UNSIGNED: u16 = 1 << 5;
    pub const LOAD_ALIGNED: u16 = 1 << 6;
    pub const STORE_ALIGNED: u16 = 1 << 6;
    pub const LOAD_VOLATILE: u16 = 1 << 7;
    pub const STORE_VOLATILE: u16 = 1 << 7;
    pub const CALL_TAIL: u16 = 1 << 8;
    pub const BRANCH_LIKELY: u16 = 1 << 9;
    pub const BRANCH_UNLIKELY: u16 = 1 << 10;
}

/// Builds the control word for a `Permute` of `u32` lanes: each of the four
/// logical lanes selects source 0 or 1 and an element within it. Lane x
/// sits in the low byte.
pub const fn make_permute_mask(
    s0: u32,
    e0: u32,
    s1: u32,
    e1: u32,
    s2: u32,
    e2: u32,
    s3: u32,
    e3: u32,
) -> u32 {
    ((s3 * 4 + e3) << 24) | ((s2 * 4 + e2) << 16) | ((s1 * 4 + e1) << 8) | (s0 * 4 + e0)
}

/// Identity swizzle (x, y, z, w) and friends use two bits per lane.
pub const SWIZZLE_XYZW: u32 = 0b11_10_01_00;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_is_aligned_with_enum() {
        assert_eq!(Opcode::Comment as usize, 0);
        assert_eq!(Opcode::Comment.name(), "comment");
        assert_eq!(Opcode::Return.name(), "return");
        assert_eq!(Opcode::AtomicSub.name(), "atomic_sub");
        assert_eq!(OPCODE_INFO.len(), Opcode::AtomicSub as usize + 1);
    }

    #[test]
    fn volatility_covers_control_flow() {
        for op in [
            Opcode::Call,
            Opcode::Return,
            Opcode::Branch,
            Opcode::BranchTrue,
            Opcode::StoreContext,
            Opcode::Store,
        ] {
            assert!(op.is_volatile(), "{} must be volatile", op.name());
        }
        assert!(!Opcode::Add.is_volatile());
        assert!(!Opcode::Load.is_volatile());
    }
}
