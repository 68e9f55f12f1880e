//! Front-end checks: guest words through the translator (and optionally
//! the pass pipeline), asserted against the HIR dump.

use xenonvm::config::Config;
use xenonvm::hir::HirFunction;
use xenonvm::passes::Pipeline;
use xenonvm::ppc::{disasm, FunctionTranslator, NoShims, PpcInstr};

const BASE: u32 = 0x8201_0000;
const BLR: u32 = 0x4E80_0020;

fn translate(words: &[u32]) -> HirFunction {
    let end = BASE + (words.len() as u32 - 1) * 4;
    let mut translator = FunctionTranslator::new(BASE, end, &NoShims);
    translator
        .run(|pc| words[((pc - BASE) / 4) as usize])
        .unwrap();
    translator.finish()
}

fn translate_optimized(words: &[u32]) -> HirFunction {
    let mut func = translate(words);
    Pipeline::new(&Config::default()).run(&mut func).unwrap();
    func
}

#[test]
fn register_traffic_becomes_context_accesses() {
    // add r3, r4, r5 ; blr
    let func = translate(&[0x7C64_2A14, BLR]);
    let dump = func.dump();
    assert!(dump.contains("load_context +32"), "{dump}"); // r4
    assert!(dump.contains("load_context +40"), "{dump}"); // r5
    assert!(dump.contains("store_context +24"), "{dump}"); // r3
    assert!(dump.contains("source_offset"), "{dump}");
    assert!(dump.contains("return"), "{dump}");
}

#[test]
fn guest_loads_pass_through_byte_swap() {
    // lwz r3, 0(r4) ; blr
    let lwz = (32u32 << 26) | (3 << 21) | (4 << 16);
    let dump = translate_optimized(&[lwz, BLR]).dump();
    assert!(dump.contains("load"), "{dump}");
    assert!(dump.contains("byte_swap"), "{dump}");
}

#[test]
fn record_form_writes_split_condition_bytes() {
    // add. r3, r4, r5 ; blr
    let add_rc = 0x7C64_2A14 | 1;
    let dump = translate(&[add_rc, BLR]).dump();
    // cr0 flag bytes live at +276..+279.
    assert!(dump.contains("store_context +276"), "{dump}");
    assert!(dump.contains("store_context +277"), "{dump}");
    assert!(dump.contains("store_context +278"), "{dump}");
    assert!(dump.contains("store_context +279"), "{dump}");
}

#[test]
fn compare_then_branch_consumes_compare_directly() {
    // cmpwi cr0, r4, 0 ; beq +8 ; li r3, 1 ; blr
    let cmpwi = (11u32 << 26) | (4 << 16);
    let beq = (16u32 << 26) | (12 << 21) | (2 << 16) | 8;
    let li = (14u32 << 26) | (3 << 21) | 1;
    let func = translate_optimized(&[cmpwi, beq, li, BLR]);
    let dump = func.dump();
    assert!(dump.contains("compare_eq"), "{dump}");
    assert!(dump.contains("branch_true"), "{dump}");
    // The branch reads the compare result, not a reloaded CR byte.
    assert!(!dump.contains("load_context +278"), "{dump}");
}

#[test]
fn unknown_words_trap_with_pc_and_bytes() {
    // A reserved primary opcode, then blr.
    let dump = translate(&[0x0400_0000, BLR]).dump();
    assert!(dump.contains("trap"), "{dump}");
    // PC is recorded for the host helper.
    assert!(dump.contains("store_context +312"), "{dump}");
}

#[test]
fn indirect_branches_become_calls_and_returns() {
    // bctr (jump through CTR).
    let bctr = (19u32 << 26) | (20 << 21) | (528 << 1);
    let dump = translate(&[bctr]).dump();
    assert!(dump.contains("call_indirect"), "{dump}");
    assert!(dump.contains("return"), "{dump}");
}

#[test]
fn srawi_emits_arithmetic_shift_and_carry() {
    // srawi r3, r4, 4 ; blr
    let srawi = (31u32 << 26) | (4 << 21) | (3 << 16) | (4 << 11) | (824 << 1);
    let dump = translate(&[srawi, BLR]).dump();
    assert!(dump.contains("sha"), "{dump}");
    // CA byte store at xer_ca (+272).
    assert!(dump.contains("store_context +272"), "{dump}");
}

#[test]
fn vector_shift_uses_lane_opcode() {
    // vsrah v3, v4, v5 ; blr
    let vsrah = (4u32 << 26) | (3 << 21) | (4 << 16) | (5 << 11) | 836;
    let dump = translate(&[vsrah, BLR]).dump();
    assert!(dump.contains("vector_sha"), "{dump}");
}

#[test]
fn stwcx_lowers_to_compare_exchange() {
    // lwarx r3, 0, r4 ; stwcx. r3, 0, r4 ; blr
    let lwarx = (31u32 << 26) | (3 << 21) | (4 << 11) | (20 << 1);
    let stwcx = (31u32 << 26) | (3 << 21) | (4 << 11) | (150 << 1) | 1;
    let dump = translate(&[lwarx, stwcx, BLR]).dump();
    assert!(dump.contains("load_acquire"), "{dump}");
    assert!(dump.contains("compare_exchange"), "{dump}");
}

#[test]
fn disasm_matches_decode_table() {
    assert_eq!(
        disasm(PpcInstr::new(BASE, 0x7C64_2A14)).unwrap(),
        "add r3, r4, r5"
    );
    assert_eq!(disasm(PpcInstr::new(BASE, BLR)).unwrap(), "bclr 20, 0");
    assert!(disasm(PpcInstr::new(BASE, 0x0400_0000)).is_none());
}
