//! Optimization pipeline properties over hand-built HIR.

use xenonvm::config::Config;
use xenonvm::hir::{ConstantValue, HirBuilder, Opcode, ValueType};
use xenonvm::passes::Pipeline;

/// A representative function: context traffic, a record-form compare, a
/// conditional branch, redundant conversions.
fn build_sample() -> xenonvm::hir::HirFunction {
    let mut b = HirBuilder::new(0x8201_0000);
    let exit = b.new_label();

    let x = b.load_context(0x10, ValueType::I64);
    b.store_context(0x18, x);
    let reloaded = b.load_context(0x10, ValueType::I64);
    let narrow = b.truncate(reloaded, ValueType::I32);
    let widened = b.zero_extend(narrow, ValueType::I64);
    let narrow_again = b.truncate(widened, ValueType::I32);
    let zero = b.load_zero(ValueType::I32);
    let lt = b.compare_slt(narrow_again, zero);
    let gt = b.compare_sgt(narrow_again, zero);
    let eq = b.compare_eq(narrow_again, zero);
    b.store_context(0x300, lt);
    b.store_context(0x301, gt);
    b.store_context(0x302, eq);
    b.branch_true(eq, exit, 0);
    let swapped = b.byte_swap(narrow_again);
    let back = b.byte_swap(swapped);
    let wide = b.zero_extend(back, ValueType::I64);
    b.store_context(0x20, wide);
    b.mark_label(exit);
    b.return_();
    b.finish()
}

#[test]
fn pipeline_is_idempotent() {
    let config = Config::default();
    let mut func = build_sample();
    Pipeline::new(&config).run(&mut func).unwrap();
    let first = func.dump();
    Pipeline::new(&config).run(&mut func).unwrap();
    let second = func.dump();
    assert_eq!(first, second);
}

#[test]
fn promotion_feeds_dce_and_branch_survives() {
    let config = Config::default();
    let mut func = build_sample();
    Pipeline::new(&config).run(&mut func).unwrap();
    let dump = func.dump();
    // The reloaded context value collapsed onto the first load.
    assert_eq!(dump.matches("load_context +16").count(), 1, "{dump}");
    // Architectural stores and control flow survive.
    assert!(dump.contains("store_context +768"), "{dump}");
    assert!(dump.contains("branch_true"), "{dump}");
    assert!(dump.contains("return"), "{dump}");
    // The conversion round-trip is gone.
    assert!(!dump.contains("byte_swap"), "{dump}");
}

#[test]
fn dump_syntax_is_stable() {
    let mut b = HirBuilder::new(0);
    let v = b.load_context(88, ValueType::I64);
    b.store_context(96, v);
    b.return_();
    let mut func = b.finish();
    Pipeline::new(&Config::default()).run(&mut func).unwrap();
    let dump = func.dump();
    assert!(dump.contains("v0.i64 = load_context +88"), "{dump}");
    assert!(dump.contains("store_context +96, v0.i64"), "{dump}");
}

#[test]
fn store_all_context_values_keeps_dead_stores() {
    let build = || {
        let mut b = HirBuilder::new(0);
        let a = b.load_context(0x10, ValueType::I64);
        let k = b.load_constant(ConstantValue::I64(1));
        let sum = b.add(a, k, 0);
        b.store_context(0x20, a);
        b.store_context(0x20, sum);
        b.return_();
        b.finish()
    };

    let mut stripped = build();
    Pipeline::new(&Config::default()).run(&mut stripped).unwrap();
    let mut kept = build();
    let config = Config {
        store_all_context_values: true,
        ..Config::default()
    };
    Pipeline::new(&config).run(&mut kept).unwrap();

    let count = |func: &xenonvm::hir::HirFunction| {
        func.dump().matches("store_context").count()
    };
    assert_eq!(count(&stripped), 1);
    assert_eq!(count(&kept), 2);
}

#[test]
fn volatile_survivors_after_full_pipeline() {
    let mut b = HirBuilder::new(0);
    let x = b.load_context(0x10, ValueType::I64);
    let unused = b.add(x, x, 0);
    let _orphan = b.neg(unused);
    b.trap(3);
    b.store_context(0x18, x);
    b.call(0x8200_1000, 0);
    b.return_();
    let mut func = b.finish();
    Pipeline::new(&Config::default()).run(&mut func).unwrap();
    let ops: Vec<Opcode> = func
        .block_order()
        .into_iter()
        .flat_map(|block| func.instr_order(block))
        .map(|id| func.instr(id).opcode)
        .collect();
    assert!(ops.contains(&Opcode::Trap));
    assert!(ops.contains(&Opcode::StoreContext));
    assert!(ops.contains(&Opcode::Call));
    assert!(ops.contains(&Opcode::Return));
    assert!(!ops.contains(&Opcode::Neg));
    assert!(!ops.contains(&Opcode::Add));
}
