//! The PPC decode tables: primary opcode dispatch plus per-group extended
//! tables. Entries are static descriptors with plain function pointers;
//! the lookup indexes are built once on first use.

use crate::error::Error;
use crate::ppc::instr::PpcInstr;
use crate::ppc::translate::FunctionTranslator;
use once_cell::sync::Lazy;
use std::collections::HashMap;

/// Encoding form, used by the disassembler to render operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Form {
    D,
    Ds,
    Xs,
    I,
    B,
    Sc,
    X,
    Xo,
    Xl,
    Xfx,
    M,
    Md,
    A,
    Vx,
    Va,
}

pub type TranslateFn =
    for<'a, 'b> fn(&'a mut FunctionTranslator<'b>, PpcInstr) -> Result<(), Error>;

/// One decoded instruction's descriptor.
pub struct PpcOpcode {
    pub name: &'static str,
    pub form: Form,
    pub translate: TranslateFn,
}

macro_rules! op {
    ($name:literal, $form:ident, $f:path) => {
        PpcOpcode {
            name: $name,
            form: Form::$form,
            translate: $f,
        }
    };
}

use crate::ppc::translate::{altivec, alu, control, fpu, memory};

static PRIMARY: &[(u32, PpcOpcode)] = &[
    (3, op!("twi", D, control::twi)),
    (7, op!("mulli", D, alu::mulli)),
    (8, op!("subfic", D, alu::subfic)),
    (10, op!("cmpli", D, alu::cmpli)),
    (11, op!("cmpi", D, alu::cmpi)),
    (12, op!("addic", D, alu::addic)),
    (13, op!("addic.", D, alu::addic_rc)),
    (14, op!("addi", D, alu::addi)),
    (15, op!("addis", D, alu::addis)),
    (16, op!("bc", B, control::bc)),
    (17, op!("sc", Sc, control::sc)),
    (18, op!("b", I, control::b)),
    (20, op!("rlwimi", M, alu::rlwimi)),
    (21, op!("rlwinm", M, alu::rlwinm)),
    (23, op!("rlwnm", M, alu::rlwnm)),
    (24, op!("ori", D, alu::ori)),
    (25, op!("oris", D, alu::oris)),
    (26, op!("xori", D, alu::xori)),
    (27, op!("xoris", D, alu::xoris)),
    (28, op!("andi.", D, alu::andi_rc)),
    (29, op!("andis.", D, alu::andis_rc)),
    (32, op!("lwz", D, memory::lwz)),
    (33, op!("lwzu", D, memory::lwzu)),
    (34, op!("lbz", D, memory::lbz)),
    (35, op!("lbzu", D, memory::lbzu)),
    (36, op!("stw", D, memory::stw)),
    (37, op!("stwu", D, memory::stwu)),
    (38, op!("stb", D, memory::stb)),
    (39, op!("stbu", D, memory::stbu)),
    (40, op!("lhz", D, memory::lhz)),
    (41, op!("lhzu", D, memory::lhzu)),
    (42, op!("lha", D, memory::lha)),
    (43, op!("lhau", D, memory::lhau)),
    (44, op!("sth", D, memory::sth)),
    (45, op!("sthu", D, memory::sthu)),
    (48, op!("lfs", D, memory::lfs)),
    (49, op!("lfsu", D, memory::lfsu)),
    (50, op!("lfd", D, memory::lfd)),
    (51, op!("lfdu", D, memory::lfdu)),
    (52, op!("stfs", D, memory::stfs)),
    (53, op!("stfsu", D, memory::stfsu)),
    (54, op!("stfd", D, memory::stfd)),
    (55, op!("stfdu", D, memory::stfdu)),
];

static EXT19: &[(u32, PpcOpcode)] = &[
    (0, op!("mcrf", Xl, control::mcrf)),
    (16, op!("bclr", Xl, control::bclr)),
    (33, op!("crnor", Xl, control::crnor)),
    (129, op!("crandc", Xl, control::crandc)),
    (150, op!("isync", Xl, control::isync)),
    (193, op!("crxor", Xl, control::crxor)),
    (225, op!("crnand", Xl, control::crnand)),
    (257, op!("crand", Xl, control::crand)),
    (289, op!("creqv", Xl, control::creqv)),
    (417, op!("crorc", Xl, control::crorc)),
    (449, op!("cror", Xl, control::cror)),
    (528, op!("bcctr", Xl, control::bcctr)),
];

static EXT30: &[(u32, PpcOpcode)] = &[
    (0, op!("rldicl", Md, alu::rldicl)),
    (1, op!("rldicr", Md, alu::rldicr)),
    (2, op!("rldic", Md, alu::rldic)),
    (3, op!("rldimi", Md, alu::rldimi)),
];

static EXT31_X: &[(u32, PpcOpcode)] = &[
    (0, op!("cmp", X, alu::cmp)),
    (4, op!("tw", X, control::tw)),
    (19, op!("mfcr", Xfx, control::mfcr)),
    (20, op!("lwarx", X, memory::lwarx)),
    (21, op!("ldx", X, memory::ldx)),
    (23, op!("lwzx", X, memory::lwzx)),
    (24, op!("slw", X, alu::slw)),
    (26, op!("cntlzw", X, alu::cntlzw)),
    (27, op!("sld", X, alu::sld)),
    (28, op!("and", X, alu::and)),
    (32, op!("cmpl", X, alu::cmpl)),
    (53, op!("ldux", X, memory::ldux)),
    (54, op!("dcbst", X, memory::dcbst)),
    (55, op!("lwzux", X, memory::lwzux)),
    (58, op!("cntlzd", X, alu::cntlzd)),
    (60, op!("andc", X, alu::andc)),
    (83, op!("mfmsr", X, control::mfmsr)),
    (84, op!("ldarx", X, memory::ldarx)),
    (86, op!("dcbf", X, memory::dcbf)),
    (87, op!("lbzx", X, memory::lbzx)),
    (103, op!("lvx", X, memory::lvx)),
    (119, op!("lbzux", X, memory::lbzux)),
    (124, op!("nor", X, alu::nor)),
    (144, op!("mtcrf", Xfx, control::mtcrf)),
    (149, op!("stdx", X, memory::stdx)),
    (150, op!("stwcx.", X, memory::stwcx)),
    (151, op!("stwx", X, memory::stwx)),
    (178, op!("mtmsrd", X, control::mtmsrd)),
    (181, op!("stdux", X, memory::stdux)),
    (183, op!("stwux", X, memory::stwux)),
    (214, op!("stdcx.", X, memory::stdcx)),
    (215, op!("stbx", X, memory::stbx)),
    (231, op!("stvx", X, memory::stvx)),
    (246, op!("dcbtst", X, memory::dcbtst)),
    (247, op!("stbux", X, memory::stbux)),
    (278, op!("dcbt", X, memory::dcbt)),
    (279, op!("lhzx", X, memory::lhzx)),
    (311, op!("lhzux", X, memory::lhzux)),
    (316, op!("xor", X, alu::xor)),
    (339, op!("mfspr", Xfx, control::mfspr)),
    (341, op!("lwax", X, memory::lwax)),
    (343, op!("lhax", X, memory::lhax)),
    (371, op!("mftb", Xfx, control::mftb)),
    (375, op!("lhaux", X, memory::lhaux)),
    (407, op!("sthx", X, memory::sthx)),
    (412, op!("orc", X, alu::orc)),
    (439, op!("sthux", X, memory::sthux)),
    (444, op!("or", X, alu::or)),
    (467, op!("mtspr", Xfx, control::mtspr)),
    (476, op!("nand", X, alu::nand)),
    (534, op!("lwbrx", X, memory::lwbrx)),
    (535, op!("lfsx", X, memory::lfsx)),
    (536, op!("srw", X, alu::srw)),
    (539, op!("srd", X, alu::srd)),
    (598, op!("sync", X, control::sync)),
    (599, op!("lfdx", X, memory::lfdx)),
    (662, op!("stwbrx", X, memory::stwbrx)),
    (663, op!("stfsx", X, memory::stfsx)),
    (727, op!("stfdx", X, memory::stfdx)),
    (790, op!("lhbrx", X, memory::lhbrx)),
    (792, op!("sraw", X, alu::sraw)),
    (794, op!("srad", X, alu::srad)),
    (824, op!("srawi", X, alu::srawi)),
    (826, op!("sradi", Xs, alu::sradi)),
    (827, op!("sradi", Xs, alu::sradi)),
    (854, op!("eieio", X, control::eieio)),
    (918, op!("sthbrx", X, memory::sthbrx)),
    (922, op!("extsh", X, alu::extsh)),
    (954, op!("extsb", X, alu::extsb)),
    (982, op!("icbi", X, memory::icbi)),
    (986, op!("extsw", X, alu::extsw)),
    (1014, op!("dcbz", X, memory::dcbz)),
];

static EXT31_XO: &[(u32, PpcOpcode)] = &[
    (8, op!("subfc", Xo, alu::subfc)),
    (9, op!("mulhdu", Xo, alu::mulhdu)),
    (10, op!("addc", Xo, alu::addc)),
    (11, op!("mulhwu", Xo, alu::mulhwu)),
    (40, op!("subf", Xo, alu::subf)),
    (73, op!("mulhd", Xo, alu::mulhd)),
    (75, op!("mulhw", Xo, alu::mulhw)),
    (104, op!("neg", Xo, alu::neg)),
    (136, op!("subfe", Xo, alu::subfe)),
    (138, op!("adde", Xo, alu::adde)),
    (200, op!("subfze", Xo, alu::subfze)),
    (202, op!("addze", Xo, alu::addze)),
    (232, op!("subfme", Xo, alu::subfme)),
    (233, op!("mulld", Xo, alu::mulld)),
    (234, op!("addme", Xo, alu::addme)),
    (235, op!("mullw", Xo, alu::mullw)),
    (266, op!("add", Xo, alu::add)),
    (457, op!("divdu", Xo, alu::divdu)),
    (459, op!("divwu", Xo, alu::divwu)),
    (489, op!("divd", Xo, alu::divd)),
    (491, op!("divw", Xo, alu::divw)),
];

static EXT58: &[(u32, PpcOpcode)] = &[
    (0, op!("ld", Ds, memory::ld)),
    (1, op!("ldu", Ds, memory::ldu)),
    (2, op!("lwa", Ds, memory::lwa)),
];

static EXT62: &[(u32, PpcOpcode)] = &[
    (0, op!("std", Ds, memory::std)),
    (1, op!("stdu", Ds, memory::stdu)),
];

static EXT59: &[(u32, PpcOpcode)] = &[
    (18, op!("fdivs", A, fpu::fdivs)),
    (20, op!("fsubs", A, fpu::fsubs)),
    (21, op!("fadds", A, fpu::fadds)),
    (22, op!("fsqrts", A, fpu::fsqrts)),
    (24, op!("fres", A, fpu::fres)),
    (25, op!("fmuls", A, fpu::fmuls)),
    (28, op!("fmsubs", A, fpu::fmsubs)),
    (29, op!("fmadds", A, fpu::fmadds)),
    (30, op!("fnmsubs", A, fpu::fnmsubs)),
    (31, op!("fnmadds", A, fpu::fnmadds)),
];

static EXT63_X: &[(u32, PpcOpcode)] = &[
    (0, op!("fcmpu", X, fpu::fcmpu)),
    (12, op!("frsp", X, fpu::frsp)),
    (14, op!("fctiw", X, fpu::fctiw)),
    (15, op!("fctiwz", X, fpu::fctiwz)),
    (32, op!("fcmpo", X, fpu::fcmpo)),
    (40, op!("fneg", X, fpu::fneg)),
    (72, op!("fmr", X, fpu::fmr)),
    (136, op!("fnabs", X, fpu::fnabs)),
    (264, op!("fabs", X, fpu::fabs)),
    (583, op!("mffs", X, fpu::mffs)),
    (711, op!("mtfsf", X, fpu::mtfsf)),
    (814, op!("fctid", X, fpu::fctid)),
    (815, op!("fctidz", X, fpu::fctidz)),
    (846, op!("fcfid", X, fpu::fcfid)),
];

static EXT63_A: &[(u32, PpcOpcode)] = &[
    (18, op!("fdiv", A, fpu::fdiv)),
    (20, op!("fsub", A, fpu::fsub)),
    (21, op!("fadd", A, fpu::fadd)),
    (22, op!("fsqrt", A, fpu::fsqrt)),
    (23, op!("fsel", A, fpu::fsel)),
    (25, op!("fmul", A, fpu::fmul)),
    (26, op!("frsqrte", A, fpu::frsqrte)),
    (28, op!("fmsub", A, fpu::fmsub)),
    (29, op!("fmadd", A, fpu::fmadd)),
    (30, op!("fnmsub", A, fpu::fnmsub)),
    (31, op!("fnmadd", A, fpu::fnmadd)),
];

static EXT4_VX: &[(u32, PpcOpcode)] = &[
    (0, op!("vaddubm", Vx, altivec::vaddubm)),
    (10, op!("vaddfp", Vx, altivec::vaddfp)),
    (64, op!("vadduhm", Vx, altivec::vadduhm)),
    (74, op!("vsubfp", Vx, altivec::vsubfp)),
    (128, op!("vadduwm", Vx, altivec::vadduwm)),
    (140, op!("vmrghw", Vx, altivec::vmrghw)),
    (260, op!("vslb", Vx, altivec::vslb)),
    (266, op!("vrefp", Vx, altivec::vrefp)),
    (324, op!("vslh", Vx, altivec::vslh)),
    (330, op!("vrsqrtefp", Vx, altivec::vrsqrtefp)),
    (388, op!("vslw", Vx, altivec::vslw)),
    (396, op!("vmrglw", Vx, altivec::vmrglw)),
    (516, op!("vsrb", Vx, altivec::vsrb)),
    (524, op!("vspltb", Vx, altivec::vspltb)),
    (580, op!("vsrh", Vx, altivec::vsrh)),
    (588, op!("vsplth", Vx, altivec::vsplth)),
    (644, op!("vsrw", Vx, altivec::vsrw)),
    (652, op!("vspltw", Vx, altivec::vspltw)),
    (772, op!("vsrab", Vx, altivec::vsrab)),
    (780, op!("vspltisb", Vx, altivec::vspltisb)),
    (836, op!("vsrah", Vx, altivec::vsrah)),
    (842, op!("vcfsx", Vx, altivec::vcfsx)),
    (844, op!("vspltish", Vx, altivec::vspltish)),
    (900, op!("vsraw", Vx, altivec::vsraw)),
    (908, op!("vspltisw", Vx, altivec::vspltisw)),
    (970, op!("vctsxs", Vx, altivec::vctsxs)),
    (1024, op!("vsububm", Vx, altivec::vsububm)),
    (1028, op!("vand", Vx, altivec::vand)),
    (1034, op!("vmaxfp", Vx, altivec::vmaxfp)),
    (1088, op!("vsubuhm", Vx, altivec::vsubuhm)),
    (1092, op!("vandc", Vx, altivec::vandc)),
    (1098, op!("vminfp", Vx, altivec::vminfp)),
    (1152, op!("vsubuwm", Vx, altivec::vsubuwm)),
    (1156, op!("vor", Vx, altivec::vor)),
    (1220, op!("vxor", Vx, altivec::vxor)),
    (1284, op!("vnor", Vx, altivec::vnor)),
];

/// Vector compares; the `.` forms (with the record bit folded into the
/// extended opcode) summarize into cr6.
static EXT4_VCMP: &[(u32, PpcOpcode)] = &[
    (6, op!("vcmpequb", Vx, altivec::vcmpequb)),
    (70, op!("vcmpequh", Vx, altivec::vcmpequh)),
    (134, op!("vcmpequw", Vx, altivec::vcmpequw)),
    (198, op!("vcmpeqfp", Vx, altivec::vcmpeqfp)),
    (454, op!("vcmpgefp", Vx, altivec::vcmpgefp)),
    (518, op!("vcmpgtub", Vx, altivec::vcmpgtub)),
    (582, op!("vcmpgtuh", Vx, altivec::vcmpgtuh)),
    (646, op!("vcmpgtuw", Vx, altivec::vcmpgtuw)),
    (710, op!("vcmpgtfp", Vx, altivec::vcmpgtfp)),
    (774, op!("vcmpgtsb", Vx, altivec::vcmpgtsb)),
    (838, op!("vcmpgtsh", Vx, altivec::vcmpgtsh)),
    (902, op!("vcmpgtsw", Vx, altivec::vcmpgtsw)),
];

static EXT4_VA: &[(u32, PpcOpcode)] = &[
    (42, op!("vsel", Va, altivec::vsel)),
    (43, op!("vperm", Va, altivec::vperm)),
    (46, op!("vmaddfp", Va, altivec::vmaddfp)),
    (47, op!("vnmsubfp", Va, altivec::vnmsubfp)),
];

struct Tables {
    primary: [Option<&'static PpcOpcode>; 64],
    ext19: HashMap<u32, &'static PpcOpcode>,
    ext30: HashMap<u32, &'static PpcOpcode>,
    ext31_x: HashMap<u32, &'static PpcOpcode>,
    ext31_xo: HashMap<u32, &'static PpcOpcode>,
    ext58: HashMap<u32, &'static PpcOpcode>,
    ext59: HashMap<u32, &'static PpcOpcode>,
    ext62: HashMap<u32, &'static PpcOpcode>,
    ext63_x: HashMap<u32, &'static PpcOpcode>,
    ext63_a: HashMap<u32, &'static PpcOpcode>,
    ext4_vx: HashMap<u32, &'static PpcOpcode>,
    ext4_va: HashMap<u32, &'static PpcOpcode>,
}

fn index(list: &'static [(u32, PpcOpcode)]) -> HashMap<u32, &'static PpcOpcode> {
    let mut map = HashMap::with_capacity(list.len());
    for (key, opcode) in list {
        let previous = map.insert(*key, opcode);
        debug_assert!(previous.is_none(), "duplicate opcode key {key}");
    }
    map
}

static TABLES: Lazy<Tables> = Lazy::new(|| {
    let mut primary: [Option<&'static PpcOpcode>; 64] = [None; 64];
    for (key, opcode) in PRIMARY {
        debug_assert!(primary[*key as usize].is_none());
        primary[*key as usize] = Some(opcode);
    }
    let mut ext4_vx = index(EXT4_VX);
    for (key, opcode) in EXT4_VCMP {
        ext4_vx.insert(*key, opcode);
        ext4_vx.insert(*key | 0x400, opcode);
    }
    Tables {
        primary,
        ext19: index(EXT19),
        ext30: index(EXT30),
        ext31_x: index(EXT31_X),
        ext31_xo: index(EXT31_XO),
        ext58: index(EXT58),
        ext59: index(EXT59),
        ext62: index(EXT62),
        ext63_x: index(EXT63_X),
        ext63_a: index(EXT63_A),
        ext4_vx,
        ext4_va: index(EXT4_VA),
    }
});

/// Finds the descriptor for an instruction word, or None for unknown and
/// reserved encodings.
pub fn lookup(i: PpcInstr) -> Option<&'static PpcOpcode> {
    let tables = &*TABLES;
    match i.primary() {
        4 => tables
            .ext4_vx
            .get(&i.xo_vx())
            .or_else(|| tables.ext4_va.get(&i.xo_va()))
            .copied(),
        19 => tables.ext19.get(&i.xo_x()).copied(),
        30 => tables.ext30.get(&i.xo_md()).copied(),
        31 => tables
            .ext31_x
            .get(&i.xo_x())
            .or_else(|| tables.ext31_xo.get(&i.xo_xo()))
            .copied(),
        58 => tables.ext58.get(&i.xo_ds()).copied(),
        59 => tables.ext59.get(&i.xo_a()).copied(),
        62 => tables.ext62.get(&i.xo_ds()).copied(),
        63 => tables
            .ext63_x
            .get(&i.xo_x())
            .or_else(|| tables.ext63_a.get(&i.xo_a()))
            .copied(),
        primary => tables.primary.get(primary as usize).copied().flatten(),
    }
}

/// The static target of a direct branch, used by the function scanner and
/// the translator's label pre-scan.
pub fn branch_target(i: PpcInstr) -> Option<u32> {
    match i.primary() {
        16 => Some(if i.aa() {
            i.bd() as u32
        } else {
            i.address.wrapping_add(i.bd() as u32)
        }),
        18 => Some(if i.aa() {
            i.li() as u32
        } else {
            i.address.wrapping_add(i.li() as u32)
        }),
        _ => None,
    }
}

/// Whether the instruction unconditionally leaves the current flow:
/// `b` without link, `blr`, `bctr`.
pub fn is_unconditional_exit(i: PpcInstr) -> bool {
    match i.primary() {
        18 => !i.lk(),
        19 => {
            matches!(i.xo_x(), 16 | 528) && !i.lk() && i.bo() & 0b10100 == 0b10100
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn looks_up_primary_and_extended() {
        // addi r3, r4, 1
        assert_eq!(lookup(PpcInstr::new(0, 0x3864_0001)).unwrap().name, "addi");
        // add r3, r4, r5
        assert_eq!(lookup(PpcInstr::new(0, 0x7C64_2A14)).unwrap().name, "add");
        // add. (Rc set)
        assert_eq!(lookup(PpcInstr::new(0, 0x7C64_2A15)).unwrap().name, "add");
        // blr
        assert_eq!(lookup(PpcInstr::new(0, 0x4E80_0020)).unwrap().name, "bclr");
        // fmadd f1, f2, f3, f4 (op 63, A-form 29)
        let word = (63u32 << 26) | (1 << 21) | (2 << 16) | (4 << 11) | (3 << 6) | (29 << 1);
        assert_eq!(lookup(PpcInstr::new(0, word)).unwrap().name, "fmadd");
        // vperm v3, v4, v5, v6
        let word = (4u32 << 26) | (3 << 21) | (4 << 16) | (5 << 11) | (6 << 6) | 43;
        assert_eq!(lookup(PpcInstr::new(0, word)).unwrap().name, "vperm");
        // Reserved primary opcodes decode to nothing.
        assert!(lookup(PpcInstr::new(0, 0x0400_0000)).is_none());
        assert!(lookup(PpcInstr::new(0, 0x0000_0000)).is_none());
    }

    #[test]
    fn branch_targets() {
        // b +0x20 at 0x1000.
        let i = PpcInstr::new(0x1000, (18u32 << 26) | 0x20);
        assert_eq!(branch_target(i), Some(0x1020));
        assert!(is_unconditional_exit(i));
        // bl is a call, not an exit.
        let i = PpcInstr::new(0x1000, (18u32 << 26) | 0x20 | 1);
        assert!(!is_unconditional_exit(i));
        // blr.
        let i = PpcInstr::new(0x1000, 0x4E80_0020);
        assert!(is_unconditional_exit(i));
        assert_eq!(branch_target(i), None);
    }
}
