//! Textual PPC disassembly, driven by the same decode tables as the
//! translator. Output feeds dumps and the debugger, so it favors a stable
//! uniform shape over assembler-exact mnemonics.

use crate::ppc::decode::{self, Form};
use crate::ppc::instr::PpcInstr;

/// Renders one instruction, or `None` when the word does not decode.
pub fn disasm(i: PpcInstr) -> Option<String> {
    let opcode = decode::lookup(i)?;
    let name = opcode.name;
    let text = match opcode.form {
        Form::D => {
            if name.starts_with('l') || name.starts_with("st") {
                format!("{name} r{}, {}(r{})", i.rd(), i.simm(), i.ra())
            } else if name.starts_with("cmp") {
                format!("{name} cr{}, r{}, {}", i.crfd(), i.ra(), i.simm())
            } else if matches!(name, "ori" | "oris" | "xori" | "xoris" | "andi." | "andis.") {
                format!("{name} r{}, r{}, {:#x}", i.ra(), i.rs(), i.uimm())
            } else if name == "twi" {
                format!("{name} {}, r{}, {}", i.rd(), i.ra(), i.simm())
            } else {
                format!("{name} r{}, r{}, {}", i.rd(), i.ra(), i.simm())
            }
        }
        Form::Ds => format!("{name} r{}, {}(r{})", i.rd(), i.ds_disp(), i.ra()),
        Form::I => {
            let target = decode::branch_target(i).unwrap_or(0);
            let suffix = if i.lk() { "l" } else { "" };
            format!("b{suffix} {target:#010x}")
        }
        Form::B => {
            let target = decode::branch_target(i).unwrap_or(0);
            let suffix = if i.lk() { "l" } else { "" };
            format!("bc{suffix} {}, {}, {target:#010x}", i.bo(), i.bi())
        }
        Form::Sc => name.to_string(),
        Form::X => {
            if name.starts_with('l') || name.starts_with("st") {
                format!("{name} r{}, r{}, r{}", i.rd(), i.ra(), i.rb())
            } else if name.starts_with("cmp") {
                format!("{name} cr{}, r{}, r{}", i.crfd(), i.ra(), i.rb())
            } else if name.starts_with('f') || name == "mffs" || name == "mtfsf" {
                format!("{name} f{}, f{}, f{}", i.rd(), i.ra(), i.rb())
            } else if name == "srawi" {
                format!("{name} r{}, r{}, {}", i.ra(), i.rs(), i.sh())
            } else {
                let dot = if i.rc() { "." } else { "" };
                format!("{name}{dot} r{}, r{}, r{}", i.ra(), i.rs(), i.rb())
            }
        }
        Form::Xs => format!("{name} r{}, r{}, {}", i.ra(), i.rs(), i.sh6()),
        Form::Xo => {
            let dot = if i.rc() { "." } else { "" };
            let o = if i.oe() { "o" } else { "" };
            format!("{name}{o}{dot} r{}, r{}, r{}", i.rd(), i.ra(), i.rb())
        }
        Form::Xl => match name {
            "bclr" | "bcctr" => {
                let suffix = if i.lk() { "l" } else { "" };
                format!("{name}{suffix} {}, {}", i.bo(), i.bi())
            }
            "mcrf" => format!("{name} cr{}, cr{}", i.crfd(), i.crfs()),
            "isync" => name.to_string(),
            _ => format!("{name} {}, {}, {}", i.crbd(), i.crba(), i.crbb()),
        },
        Form::Xfx => match name {
            "mfspr" | "mtspr" => format!("{name} r{}, {}", i.rd(), i.spr()),
            "mtcrf" => format!("{name} {:#04x}, r{}", i.crm(), i.rs()),
            _ => format!("{name} r{}", i.rd()),
        },
        Form::M => format!(
            "{name} r{}, r{}, {}, {}, {}",
            i.ra(),
            i.rs(),
            i.sh(),
            i.mb(),
            i.me()
        ),
        Form::Md => format!("{name} r{}, r{}, {}, {}", i.ra(), i.rs(), i.sh6(), i.mb6()),
        Form::A => {
            let dot = if i.rc() { "." } else { "" };
            format!(
                "{name}{dot} f{}, f{}, f{}, f{}",
                i.rd(),
                i.ra(),
                i.rc_fp(),
                i.rb()
            )
        }
        Form::Vx => format!("{name} v{}, v{}, v{}", i.rd(), i.ra(), i.rb()),
        Form::Va => format!(
            "{name} v{}, v{}, v{}, v{}",
            i.rd(),
            i.ra(),
            i.rb(),
            i.vc()
        ),
    };
    Some(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_common_shapes() {
        assert_eq!(
            disasm(PpcInstr::new(0, 0x3864_0010)).unwrap(),
            "addi r3, r4, 16"
        );
        assert_eq!(
            disasm(PpcInstr::new(0, 0x7C64_2A14)).unwrap(),
            "add r3, r4, r5"
        );
        assert_eq!(disasm(PpcInstr::new(0, 0x4E80_0020)).unwrap(), "bclr 20, 0");
        // lwz r3, 8(r1)
        let word = (32u32 << 26) | (3 << 21) | (1 << 16) | 8;
        assert_eq!(disasm(PpcInstr::new(0, word)).unwrap(), "lwz r3, 8(r1)");
        // b 0x1020 from 0x1000.
        let word = (18u32 << 26) | 0x20;
        assert_eq!(disasm(PpcInstr::new(0x1000, word)).unwrap(), "b 0x00001020");
        assert!(disasm(PpcInstr::new(0, 0x0000_0000)).is_none());
    }
}
