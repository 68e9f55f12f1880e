//! Linear-scan register assignment over the finalized HIR.
//!
//! Values live either in one of the reserved allocatable host registers
//! (`RBX, R12..R15` for integers, `XMM6..XMM15` for floats and vectors)
//! or in a spill slot of the stack frame laid out here. RSI and RDI never
//! join the pools: they permanently hold the context and membase.
//!
//! Values whose interval crosses a host call cannot keep an XMM home (the
//! SysV ABI makes every XMM caller-saved), so those are forced onto the
//! stack; the integer pool is callee-saved and survives.

use crate::backend::x64::asm::{Gpr, Xmm};
use crate::backend::x64::lowering;
use crate::hir::{HirFunction, Operand, OperandKind, ValueId, ValueType};

/// Where a value lives for the function's whole lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Home {
    /// Never materialized (constants, dead values).
    None,
    Gpr(Gpr),
    Xmm(Xmm),
    /// Byte offset into the spill area.
    Slot(u32),
}

pub const GPR_POOL: [Gpr; 5] = [Gpr::Rbx, Gpr::R12, Gpr::R13, Gpr::R14, Gpr::R15];
pub const XMM_POOL: [Xmm; 10] = [
    Xmm(6),
    Xmm(7),
    Xmm(8),
    Xmm(9),
    Xmm(10),
    Xmm(11),
    Xmm(12),
    Xmm(13),
    Xmm(14),
    Xmm(15),
];

pub struct Allocation {
    homes: Vec<Home>,
    pub used_gprs: Vec<Gpr>,
    pub used_xmms: Vec<Xmm>,
    /// Bytes of spill storage.
    pub spill_size: u32,
}

impl Allocation {
    pub fn home(&self, value: ValueId) -> Home {
        self.homes[value.0 as usize]
    }
}

#[derive(Clone, Copy)]
struct Interval {
    value: u32,
    start: u32,
    end: u32,
    class_xmm: bool,
    crosses_call: bool,
}

/// Runs the scan. The function must have been finalized (dense ordinals).
pub fn allocate(func: &HirFunction) -> Allocation {
    let mut start = vec![u32::MAX; func.value_count()];
    let mut end = vec![0u32; func.value_count()];
    let mut call_positions: Vec<u32> = Vec::new();

    for block in func.block_order() {
        for instr_id in func.instr_order(block) {
            let instr = func.instr(instr_id);
            let at = instr.ordinal;
            if lowering::clobbers_host_state(func, instr_id) {
                call_positions.push(at);
            }
            if let Some(dest) = instr.dest {
                let index = dest.0 as usize;
                start[index] = start[index].min(at);
                end[index] = end[index].max(at);
            }
            let sig = instr.opcode.info().sig;
            for slot in 0..3 {
                if sig.srcs[slot] != OperandKind::V {
                    continue;
                }
                if let Operand::Value(value) = instr.srcs[slot] {
                    let index = value.0 as usize;
                    // Constants have no def; they rematerialize at use.
                    if func.value(value).is_constant() {
                        continue;
                    }
                    start[index] = start[index].min(at);
                    end[index] = end[index].max(at);
                }
            }
        }
    }

    let mut intervals: Vec<Interval> = (0..func.value_count())
        .filter(|&index| start[index] != u32::MAX)
        .map(|index| {
            let crosses_call = call_positions
                .iter()
                .any(|&call| call > start[index] && call < end[index]);
            Interval {
                value: index as u32,
                start: start[index],
                end: end[index],
                class_xmm: !func.value(ValueId(index as u32)).ty.is_int(),
                crosses_call,
            }
        })
        .collect();
    intervals.sort_by_key(|interval| interval.start);

    let mut homes = vec![Home::None; func.value_count()];
    let mut free_gprs: Vec<Gpr> = GPR_POOL.to_vec();
    let mut free_xmms: Vec<Xmm> = XMM_POOL.to_vec();
    let mut active: Vec<Interval> = Vec::new();
    let mut used_gprs: Vec<Gpr> = Vec::new();
    let mut used_xmms: Vec<Xmm> = Vec::new();
    let mut spill_size = 0u32;

    let mut spill = |homes: &mut Vec<Home>, value: u32, ty: ValueType, spill_size: &mut u32| {
        let size = if ty == ValueType::V128 { 16 } else { 8 };
        *spill_size = (*spill_size + size - 1) & !(size - 1);
        homes[value as usize] = Home::Slot(*spill_size);
        *spill_size += size;
    };

    for interval in intervals {
        // Expire finished intervals.
        active.retain(|candidate| {
            if candidate.end < interval.start {
                match homes[candidate.value as usize] {
                    Home::Gpr(reg) => free_gprs.push(reg),
                    Home::Xmm(reg) => free_xmms.push(reg),
                    _ => {}
                }
                false
            } else {
                true
            }
        });

        let ty = func.value(ValueId(interval.value)).ty;
        if interval.class_xmm {
            if interval.crosses_call {
                spill(&mut homes, interval.value, ty, &mut spill_size);
                continue;
            }
            match free_xmms.pop() {
                Some(reg) => {
                    homes[interval.value as usize] = Home::Xmm(reg);
                    if !used_xmms.contains(&reg) {
                        used_xmms.push(reg);
                    }
                    active.push(interval);
                }
                None => spill(&mut homes, interval.value, ty, &mut spill_size),
            }
        } else {
            match free_gprs.pop() {
                Some(reg) => {
                    homes[interval.value as usize] = Home::Gpr(reg);
                    if !used_gprs.contains(&reg) {
                        used_gprs.push(reg);
                    }
                    active.push(interval);
                }
                None => spill(&mut homes, interval.value, ty, &mut spill_size),
            }
        }
    }

    Allocation {
        homes,
        used_gprs,
        used_xmms,
        spill_size: (spill_size + 15) & !15,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hir::{HirBuilder, ValueType};
    use crate::passes::{FinalizationPass, Pass};

    fn finalized(build: impl FnOnce(&mut HirBuilder)) -> HirFunction {
        let mut b = HirBuilder::new(0);
        build(&mut b);
        let mut func = b.finish();
        FinalizationPass::new().run(&mut func).unwrap();
        func
    }

    #[test]
    fn assigns_registers_then_spills() {
        let func = finalized(|b| {
            // Seven overlapping i64 values: five take the pool, the rest
            // spill.
            let values: Vec<_> = (0..7)
                .map(|n| b.load_context(0x10 + n * 8, ValueType::I64))
                .collect();
            let mut acc = values[0];
            for v in &values[1..] {
                acc = b.add(acc, *v, 0);
            }
            b.store_context(0x100, acc);
            b.return_();
        });
        let allocation = allocate(&func);
        assert_eq!(allocation.used_gprs.len(), 5);
        assert!(allocation.spill_size > 0);
    }

    #[test]
    fn xmm_values_crossing_calls_are_spilled() {
        let func = finalized(|b| {
            let f = b.load_context(0x200, ValueType::F64);
            b.call(0x8200_0000, 0);
            let g = b.add(f, f, 0);
            b.store_context(0x208, g);
            b.return_();
        });
        let allocation = allocate(&func);
        // `f` lives across the call: it must be on the stack.
        let first_home = allocation.home(ValueId(0));
        assert!(matches!(first_home, Home::Slot(_)), "{first_home:?}");
    }

    #[test]
    fn constants_get_no_home() {
        let func = finalized(|b| {
            let k = b.load_u64(42);
            let x = b.load_context(0x10, ValueType::I64);
            let sum = b.add(x, k, 0);
            b.store_context(0x18, sum);
            b.return_();
        });
        let allocation = allocate(&func);
        let constant_home = allocation.home(ValueId(0));
        assert_eq!(constant_home, Home::None);
    }
}
