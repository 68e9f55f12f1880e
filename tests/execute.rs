//! End-to-end tests: guest words written into guest memory, resolved
//! through the runtime, compiled by the x86-64 back end and executed on a
//! real thread context.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use xenonvm::config::Config;
use xenonvm::runtime::{DebugListener, Module, Runtime, SymbolInfo, ThreadState};
use xenonvm::{Memory, Protect};

const CODE_BASE: u32 = 0x10000;
const BLR: u32 = 0x4E80_0020;

fn boot() -> (Arc<Runtime>, Arc<ThreadState>) {
    let _ = env_logger::builder().is_test(true).try_init();
    let memory = Arc::new(Memory::new(1 << 26).unwrap());
    memory
        .commit(CODE_BASE, 0x10000, Protect::READ | Protect::WRITE)
        .unwrap();
    let runtime = Runtime::new(memory.clone(), Config::default()).unwrap();
    runtime
        .add_module(Module::new("test.xex", CODE_BASE, 0x10000))
        .unwrap();
    let thread = ThreadState::new(memory, 0x1_0000, 0x1000).unwrap();
    (runtime, thread)
}

fn write_program(runtime: &Runtime, at: u32, words: &[u32]) {
    for (index, word) in words.iter().enumerate() {
        runtime.memory().store_u32_be(at + index as u32 * 4, *word);
    }
}

fn gpr(thread: &ThreadState, n: usize) -> u64 {
    thread.ctx().r[n]
}

fn set_gpr(thread: &ThreadState, n: usize, value: u64) {
    unsafe {
        (*thread.ctx_ptr()).r[n] = value;
    }
}

#[test]
fn li_blr_returns_constant() {
    let (runtime, thread) = boot();
    // li r3, 1 ; blr
    write_program(&runtime, CODE_BASE, &[0x3860_0001, BLR]);
    runtime.execute(&thread, CODE_BASE).unwrap();
    assert_eq!(gpr(&thread, 3), 1);
}

#[test]
fn addi_reads_live_register() {
    let (runtime, thread) = boot();
    // addi r3, r4, 0x10 ; blr
    write_program(&runtime, CODE_BASE, &[0x3864_0010, BLR]);
    set_gpr(&thread, 4, 32);
    runtime.execute(&thread, CODE_BASE).unwrap();
    assert_eq!(gpr(&thread, 3), 48);
}

#[test]
fn add_and_record_form_sets_cr0() {
    let (runtime, thread) = boot();
    // add. r3, r4, r5 ; blr
    let add_rc = (31u32 << 26) | (3 << 21) | (4 << 16) | (5 << 11) | (266 << 1) | 1;
    write_program(&runtime, CODE_BASE, &[add_rc, BLR]);
    set_gpr(&thread, 4, 5);
    set_gpr(&thread, 5, (-5i64) as u64);
    runtime.execute(&thread, CODE_BASE).unwrap();
    assert_eq!(gpr(&thread, 3), 0);
    // Result is zero: cr0.eq set, lt/gt clear.
    assert_eq!(thread.ctx().cr[0][2], 1);
    assert_eq!(thread.ctx().cr[0][0], 0);
    assert_eq!(thread.ctx().cr[0][1], 0);
}

#[test]
fn divw_quotient_and_overflow_quirk() {
    let (runtime, thread) = boot();
    // divw r3, r4, r5 ; blr
    let divw = (31u32 << 26) | (3 << 21) | (4 << 16) | (5 << 11) | (491 << 1);
    write_program(&runtime, CODE_BASE, &[divw, BLR]);

    set_gpr(&thread, 4, 30);
    set_gpr(&thread, 5, 7);
    runtime.execute(&thread, CODE_BASE).unwrap();
    assert_eq!(gpr(&thread, 3), 4);

    // The hardware-overflow case: INT32_MIN / -1 == 0.
    set_gpr(&thread, 4, 0x8000_0000);
    set_gpr(&thread, 5, 0xFFFF_FFFF);
    runtime.execute(&thread, CODE_BASE).unwrap();
    assert_eq!(gpr(&thread, 3), 0);

    // Division by zero also produces 0.
    set_gpr(&thread, 4, 1234);
    set_gpr(&thread, 5, 0);
    runtime.execute(&thread, CODE_BASE).unwrap();
    assert_eq!(gpr(&thread, 3), 0);
}

#[test]
fn loads_and_stores_swap_bytes() {
    let (runtime, thread) = boot();
    // lwz r3, 0(r4) ; stw r3, 4(r4) ; blr
    let lwz = (32u32 << 26) | (3 << 21) | (4 << 16);
    let stw = (36u32 << 26) | (3 << 21) | (4 << 16) | 4;
    write_program(&runtime, CODE_BASE, &[lwz, stw, BLR]);
    let data = CODE_BASE + 0x8000;
    runtime.memory().store_u32_be(data, 0xDEAD_BEEF);
    set_gpr(&thread, 4, data as u64);
    runtime.execute(&thread, CODE_BASE).unwrap();
    assert_eq!(gpr(&thread, 3), 0xDEAD_BEEF);
    assert_eq!(runtime.memory().load_u32_be(data + 4), 0xDEAD_BEEF);
    // Big-endian in memory: high byte first.
    assert_eq!(runtime.memory().load_u8(data + 4), 0xDE);
}

#[test]
fn branches_and_loops_run() {
    let (runtime, thread) = boot();
    // Sum 1..=r4 by looping with ctr semantics done manually:
    //   li r3, 0
    //   loop: add r3, r3, r4
    //   addic. r4, r4, -1
    //   bne loop          (bc 4, 2, -8)
    //   blr
    let li = (14u32 << 26) | (3 << 21);
    let add = (31u32 << 26) | (3 << 21) | (3 << 16) | (4 << 11) | (266 << 1);
    let addic_rc = (13u32 << 26) | (4 << 21) | (4 << 16) | 0xFFFF;
    let bne = (16u32 << 26) | (4 << 21) | (2 << 16) | ((-8i32 as u32) & 0xFFFC);
    write_program(&runtime, CODE_BASE, &[li, add, addic_rc, bne, BLR]);
    set_gpr(&thread, 4, 5);
    runtime.execute(&thread, CODE_BASE).unwrap();
    assert_eq!(gpr(&thread, 3), 15);
}

#[test]
fn shim_calls_reach_host() {
    let (runtime, thread) = boot();
    let shim_address = CODE_BASE + 0x8000;
    runtime.register_shim(shim_address, |ctx| {
        ctx.r[3] = 7;
    });
    // bl <shim> ; blr
    let bl = (18u32 << 26) | (0x8000 & 0x03FF_FFFC) | 1;
    write_program(&runtime, CODE_BASE, &[bl, BLR]);
    runtime.execute(&thread, CODE_BASE).unwrap();
    assert_eq!(gpr(&thread, 3), 7);
    // The link register was written before the transfer.
    assert_eq!(thread.ctx().lr, (CODE_BASE + 4) as u64);
}

#[test]
fn guest_calls_compile_callee_on_demand() {
    let (runtime, thread) = boot();
    let callee = CODE_BASE + 0x100;
    // caller: bl callee ; blr     callee: addi r3, r3, 1 ; blr
    let bl = (18u32 << 26) | (0x100 & 0x03FF_FFFC) | 1;
    write_program(&runtime, CODE_BASE, &[bl, BLR]);
    write_program(&runtime, callee, &[(14u32 << 26) | (3 << 21) | (3 << 16) | 1, BLR]);
    set_gpr(&thread, 3, 10);
    runtime.execute(&thread, CODE_BASE).unwrap();
    assert_eq!(gpr(&thread, 3), 11);
}

#[derive(Default)]
struct DefineCounter {
    defined: AtomicU32,
}

impl DebugListener for DefineCounter {
    fn on_function_defined(&self, _symbol: &SymbolInfo) {
        self.defined.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn concurrent_resolve_compiles_once() {
    let (runtime, _thread) = boot();
    let counter = Arc::new(DefineCounter::default());
    runtime.debugger().add_listener(Box::new(counter.clone()));
    write_program(&runtime, CODE_BASE, &[0x3860_0001, BLR]);

    let mut handles = Vec::new();
    for _ in 0..4 {
        let runtime = runtime.clone();
        handles.push(std::thread::spawn(move || {
            runtime.resolve_function(CODE_BASE).unwrap().entry() as usize
        }));
    }
    let entries: Vec<usize> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    // Every thread observes the same host pointer and the translator ran
    // exactly once.
    assert!(entries.windows(2).all(|pair| pair[0] == pair[1]));
    assert_eq!(counter.defined.load(Ordering::SeqCst), 1);
}

#[test]
fn source_map_covers_every_guest_pc() {
    let (runtime, _thread) = boot();
    write_program(
        &runtime,
        CODE_BASE,
        &[0x3860_0001, 0x3863_0002, 0x3863_0003, BLR],
    );
    let blob = runtime.resolve_function(CODE_BASE).unwrap();
    for (index, pc) in (CODE_BASE..CODE_BASE + 16).step_by(4).enumerate() {
        let records: Vec<_> = blob
            .source_map
            .iter()
            .filter(|entry| entry.guest_pc == pc)
            .collect();
        assert_eq!(records.len(), 1, "pc {pc:#x} (instr {index})");
        assert!((records[0].host_offset as usize) < blob.len());
    }
}

#[test]
fn unmapped_address_is_an_error() {
    let (runtime, _thread) = boot();
    assert!(runtime.resolve_function(0xFFFF_0000).is_err());
}
