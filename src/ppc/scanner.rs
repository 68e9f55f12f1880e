//! Function boundary discovery.
//!
//! From an entry point, walk forward following branches: the function ends
//! at the first unconditional exit (`blr`, `bctr`, `b` elsewhere) that no
//! earlier forward branch jumps past. A budget bounds runaway scans over
//! data; hitting it ends the function early and the translated code bails
//! back into the runtime for the next block.

use crate::error::Error;
use crate::ppc::decode;
use crate::ppc::instr::PpcInstr;
use log::trace;

/// Upper bound on instructions scanned per function.
pub const SCAN_BUDGET: u32 = 0x4000;

/// The discovered extent of a function: `start..=end`, end inclusive of
/// the final instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FunctionExtent {
    pub start: u32,
    pub end: u32,
    /// True when the scan budget cut the function short.
    pub truncated: bool,
}

/// Scans forward from `start`, fetching words through `fetch`.
pub fn scan_function(
    start: u32,
    fetch: impl Fn(u32) -> Option<u32>,
) -> Result<FunctionExtent, Error> {
    let mut pc = start;
    // The furthest address some conditional or forward branch can still
    // reach; the function cannot end before it.
    let mut furthest_target = start;
    let mut steps = 0u32;

    loop {
        if steps >= SCAN_BUDGET {
            trace!("scan budget exhausted at {pc:#010x}");
            return Ok(FunctionExtent {
                start,
                end: pc.wrapping_sub(4),
                truncated: true,
            });
        }
        steps += 1;

        let word = fetch(pc).ok_or(Error::Address(pc))?;
        let instr = PpcInstr::new(pc, word);

        if let Some(target) = decode::branch_target(instr) {
            // Forward branches inside a plausible function body extend the
            // must-cover range; calls and backward branches do not.
            let is_call = instr.primary() == 18 && instr.lk()
                || instr.primary() == 16 && instr.lk();
            if !is_call && target > pc && target.wrapping_sub(start) < SCAN_BUDGET * 4 {
                furthest_target = furthest_target.max(target);
            }
        }

        if decode::is_unconditional_exit(instr) && pc >= furthest_target {
            return Ok(FunctionExtent {
                start,
                end: pc,
                truncated: false,
            });
        }

        pc = pc.wrapping_add(4);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn image(words: &[(u32, u32)]) -> HashMap<u32, u32> {
        words.iter().copied().collect()
    }

    const BLR: u32 = 0x4E80_0020;

    #[test]
    fn ends_at_blr() {
        let mem = image(&[
            (0x1000, 0x3860_0001), // li r3, 1
            (0x1004, BLR),
        ]);
        let extent = scan_function(0x1000, |pc| mem.get(&pc).copied()).unwrap();
        assert_eq!(extent.end, 0x1004);
        assert!(!extent.truncated);
    }

    #[test]
    fn follows_forward_branch_past_early_return() {
        // A guard that returns early, then more body after the blr.
        let b_to_100c = (18u32 << 26) | 0x8; // b +8 at 0x1004
        let mem = image(&[
            (0x1000, 0x3860_0001),
            (0x1004, b_to_100c),
            (0x1008, BLR), // early return, jumped past
            (0x100C, 0x3863_0001),
            (0x1010, BLR),
        ]);
        let extent = scan_function(0x1000, |pc| mem.get(&pc).copied()).unwrap();
        assert_eq!(extent.end, 0x1010);
    }

    #[test]
    fn calls_do_not_extend_the_scan() {
        let bl_far = (18u32 << 26) | 0x0010_0000 | 1; // bl +1M
        let mem = image(&[(0x1000, bl_far), (0x1004, BLR)]);
        let extent = scan_function(0x1000, |pc| mem.get(&pc).copied()).unwrap();
        assert_eq!(extent.end, 0x1004);
    }

    #[test]
    fn unmapped_entry_is_an_address_error() {
        let mem = image(&[]);
        assert!(scan_function(0x1000, |pc| mem.get(&pc).copied()).is_err());
    }

    #[test]
    fn budget_truncates_runaway_scans() {
        // Endless stream of addi with no terminator.
        let extent = scan_function(0x1000, |_| Some(0x3860_0001)).unwrap();
        assert!(extent.truncated);
        assert_eq!(extent.end, 0x1000 + (SCAN_BUDGET - 1) * 4);
    }
}
