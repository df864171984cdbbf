//! Opcode field decoding shared by several instruction families: effective
//! address computation, shift-field decode, and the sign-extend helper used
//! throughout the instruction set.
//!
//! Grounded in *shape* on the teacher's `fields.rs` (rich types over magic
//! numbers, a `from` constructor pulling bits out of the raw operand) and in
//! *semantics* on `original_source/src/cpu/cpu.c`'s `New_GetEffectiveAddr`.

use crate::cpu::Cpu;
use crate::trap::Trap;

/// Sign-extends an 8-bit field to a full `i32`, matching the source's
/// `signExtend()` helper used throughout the memory-reference and
/// conditional-jump families.
pub fn sign_extend_byte(value: u8) -> i32 {
    value as i8 as i32
}

/// One of the 8 addressing modes encoded in bits 8-10 of a memory-reference
/// instruction: base register (`P`, `B`, or `X`) combined with an 8-bit
/// signed displacement, optional indirection, and optional `X` post-index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EaMode {
    /// `(P) + disp`
    PDisp,
    /// `(B) + disp`
    BDisp,
    /// `((P) + disp)`
    IndirectPDisp,
    /// `((B) + disp)`
    IndirectBDisp,
    /// `(X) + disp`
    XDisp,
    /// `(B) + disp + (X)`
    BDispX,
    /// `((P) + disp) + (X)`
    IndirectPDispX,
    /// `((B) + disp) + (X)`
    IndirectBDispX,
}

impl EaMode {
    pub fn from_bits(bits: u16) -> Self {
        match bits & 0x07 {
            0 => EaMode::PDisp,
            1 => EaMode::BDisp,
            2 => EaMode::IndirectPDisp,
            3 => EaMode::IndirectBDisp,
            4 => EaMode::XDisp,
            5 => EaMode::BDispX,
            6 => EaMode::IndirectPDispX,
            7 => EaMode::IndirectBDispX,
            _ => unreachable!(),
        }
    }
}

/// The result of effective-address computation: the resolved virtual
/// address plus which page table (primary or alternate) subsequent
/// reads/writes through it must use. See Manual ND.06.014, Page 34.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectiveAddress {
    pub address: u16,
    pub use_apt: bool,
}

/// `New_GetEffectiveAddr`. `instr` is the full memory-reference operand:
/// bits 8-10 select the addressing mode, bits 0-7 are the signed
/// displacement. Must be called with `cpu.regs.p()` already pointing past
/// the instruction word (the dispatcher increments `P` before invoking the
/// handler), matching the source's `(gPC - 1)`.
pub fn effective_address(cpu: &mut Cpu, instr: u16) -> Result<EffectiveAddress, Trap> {
    let disp = sign_extend_byte((instr & 0xff) as u8);
    let p = cpu.regs.p().wrapping_sub(1);

    let ea = match EaMode::from_bits(instr >> 8) {
        EaMode::PDisp => EffectiveAddress {
            address: p.wrapping_add(disp as u16),
            use_apt: false,
        },
        EaMode::BDisp => EffectiveAddress {
            address: cpu.regs.b().wrapping_add(disp as u16),
            use_apt: true,
        },
        EaMode::IndirectPDisp => {
            let addr = p.wrapping_add(disp as u16);
            let resolved = cpu.mmu.read_indirect_virtual(&mut cpu.regs, addr, false)?;
            EffectiveAddress {
                address: resolved,
                use_apt: true,
            }
        }
        EaMode::IndirectBDisp => {
            let addr = cpu.regs.b().wrapping_add(disp as u16);
            let resolved = cpu.mmu.read_indirect_virtual(&mut cpu.regs, addr, true)?;
            EffectiveAddress {
                address: resolved,
                use_apt: true,
            }
        }
        EaMode::XDisp => EffectiveAddress {
            address: cpu.regs.x().wrapping_add(disp as u16),
            use_apt: true,
        },
        EaMode::BDispX => EffectiveAddress {
            address: cpu.regs.b().wrapping_add(cpu.regs.x()).wrapping_add(disp as u16),
            use_apt: true,
        },
        EaMode::IndirectPDispX => {
            let addr = p.wrapping_add(disp as u16);
            let resolved = cpu.mmu.read_indirect_virtual(&mut cpu.regs, addr, false)?;
            EffectiveAddress {
                address: cpu.regs.x().wrapping_add(resolved),
                use_apt: true,
            }
        }
        EaMode::IndirectBDispX => {
            let addr = cpu.regs.b().wrapping_add(disp as u16);
            let resolved = cpu.mmu.read_indirect_virtual(&mut cpu.regs, addr, true)?;
            EffectiveAddress {
                address: cpu.regs.x().wrapping_add(resolved),
                use_apt: true,
            }
        }
    };
    Ok(ea)
}

/// Shift type field shared by SHT/SHD/SHA/SAD: bits 6-7 of the operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShiftType {
    Plain,
    Rotate,
    ZeroInsert,
    LinkInsert,
}

impl ShiftType {
    pub fn from_bits(bits: u16) -> Self {
        match bits & 0x03 {
            0 => ShiftType::Plain,
            1 => ShiftType::Rotate,
            2 => ShiftType::ZeroInsert,
            3 => ShiftType::LinkInsert,
            _ => unreachable!(),
        }
    }
}

/// Decodes a 6-bit two's-complement shift count (bits 0-5): values 0-31
/// shift left by that amount, values 32-63 shift right by `64 - value`.
/// Positive return is a left shift, negative a right shift, matching
/// `ShiftReg`/`ShiftDoubleReg`'s `isneg`/`offset` split.
pub fn shift_count(bits: u16) -> i8 {
    let v = (bits & 0x3f) as i8;
    if v >= 32 {
        v - 64
    } else {
        v
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Configuration;

    #[test]
    fn sign_extend_negative_byte() {
        assert_eq!(sign_extend_byte(0xfe), -2);
        assert_eq!(sign_extend_byte(0x02), 2);
    }

    #[test]
    fn p_relative_mode_uses_pc_minus_one() {
        let mut config = Configuration::default();
        config.memory_words = 1 << 12;
        let mut cpu = Cpu::new(&config);
        cpu.regs.set_p(0x201); // dispatcher already incremented past 0x200
        let ea = effective_address(&mut cpu, 0xfe).unwrap(); // mode 0, disp -2
        assert_eq!(ea.address, 0x1fe);
        assert!(!ea.use_apt);
    }

    #[test]
    fn b_relative_mode_sets_use_apt() {
        let mut config = Configuration::default();
        config.memory_words = 1 << 12;
        let mut cpu = Cpu::new(&config);
        cpu.regs.set_b(0x100);
        let ea = effective_address(&mut cpu, 0x0105).unwrap(); // mode 1, disp 5
        assert_eq!(ea.address, 0x105);
        assert!(ea.use_apt);
    }

    #[test]
    fn shift_count_decodes_two_complement_field() {
        assert_eq!(shift_count(0b0_00101), 5);
        assert_eq!(shift_count(0b100101), -27);
        assert_eq!(shift_count(0b100000), -32);
    }

    proptest::proptest! {
        #[test]
        fn sign_extend_byte_matches_two_complement_value(value: u8) {
            let extended = sign_extend_byte(value);
            if value & 0x80 == 0 {
                proptest::prop_assert_eq!(extended, value as i32);
            } else {
                proptest::prop_assert_eq!(extended, value as i32 - 256);
            }
        }

        #[test]
        fn shift_count_stays_within_the_six_bit_twos_complement_range(bits: u16) {
            let count = shift_count(bits & 0x3f);
            proptest::prop_assert!(count >= -32 && count <= 31);
        }
    }
}
