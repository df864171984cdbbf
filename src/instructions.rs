//! Instruction semantics. Each handler has the signature `fn(&mut Cpu,
//! &DispatchTable, u16) -> StepResult`, matching `original_source/src/cpu/
//! cpu_instr.c`'s `InstrFunc` (`void (*)(ushort)`) generalized to return a
//! trap instead of calling `interrupt()` and relying on a non-local jump;
//! the dispatch table is threaded through only so `EXR` can recurse into
//! `Cpu::execute_resident`.
//!
//! The teacher's own `instructions.rs` was a 68k opcode enum with nothing
//! to reuse semantically; what's kept is its "one function per mnemonic,
//! state in, nothing out" dispatch idiom.

use crate::cpu::Cpu;
use crate::dispatch::DispatchTable;
use crate::fields::{effective_address, sign_extend_byte, shift_count, ShiftType};
use crate::memory::WriteMode;
use crate::registers::{
    Registers, A, B, D, L, P, STS, STS_C, STS_IONI, STS_K, STS_M, STS_O, STS_PONI, STS_Q, STS_SEXI, STS_Z, T, X,
};
use crate::trap::{StepOutcome, StepResult, Trap};

fn ok() -> StepResult {
    Ok(StepOutcome::Completed)
}

/// `CheckPriv`: true if the current ring (or disabled memory protection)
/// permits a privileged instruction. Raises the privileged-instruction
/// interrupt and returns false otherwise -- this never escapes the current
/// instruction (bit 6 is not one of the three trapping sub-causes).
fn check_priv(cpu: &mut Cpu) -> bool {
    if !cpu.regs.poni() {
        return true;
    }
    if cpu.regs.ring() == 2 || cpu.regs.ring() == 3 {
        return true;
    }
    cpu.regs.interrupt(14, 1 << 6);
    false
}

/// `do_add`: the shared carry/overflow-setting adder used by ADD, SUB (via
/// one's-complement plus carry-in), the conditional jumps' PC update, and
/// the ROP arithmetic group.
fn do_add(regs: &mut Registers, a: u16, b: u16, k: u16) -> u16 {
    let result = a as u32 + b as u32 + k as u32;
    regs.adjust_sts(a, b, result);
    result as u16
}

/// `ShiftReg`.
fn shift_reg(regs: &mut Registers, mut reg: u16, instr: u16) -> u16 {
    let count = shift_count(instr);
    let is_neg = count < 0;
    let offset = count.unsigned_abs();
    let kind = ShiftType::from_bits(instr >> 9);
    let m = regs.get_bit(STS, STS_M) as u16;
    let mut tmp = m;
    for _ in 0..offset {
        tmp = if is_neg { reg & 1 } else { (reg >> 15) & 1 };
        let msb = (reg >> 15) & 1;
        reg = if is_neg { reg >> 1 } else { reg << 1 };
        reg = match kind {
            ShiftType::Plain => {
                if is_neg {
                    (reg & 0x7fff) | (msb << 15)
                } else {
                    reg & 0xfffe
                }
            }
            ShiftType::Rotate => {
                if is_neg {
                    (reg & 0x7fff) | (tmp << 15)
                } else {
                    (reg & 0xfffe) | tmp
                }
            }
            ShiftType::ZeroInsert => {
                if is_neg {
                    reg & 0x7fff
                } else {
                    reg & 0xfffe
                }
            }
            ShiftType::LinkInsert => {
                if is_neg {
                    (reg & 0x7fff) | (m << 15)
                } else {
                    (reg & 0xfffe) | m
                }
            }
        };
    }
    regs.set_bit(STS, STS_M, tmp != 0);
    reg
}

/// `ShiftDoubleReg`, used by SAD on the combined 32-bit `AD` accumulator.
fn shift_double_reg(regs: &mut Registers, mut reg: u32, instr: u16) -> u32 {
    let count = shift_count(instr);
    let is_neg = count < 0;
    let offset = count.unsigned_abs();
    let kind = ShiftType::from_bits(instr >> 9);
    let m = regs.get_bit(STS, STS_M) as u32;
    let mut tmp = m;
    for _ in 0..offset {
        tmp = if is_neg { reg & 1 } else { (reg >> 31) & 1 };
        let msb = (reg >> 31) & 1;
        reg = if is_neg { reg >> 1 } else { reg << 1 };
        reg = match kind {
            ShiftType::Plain => {
                if is_neg {
                    (reg & 0x7fffffff) | (msb << 31)
                } else {
                    reg & 0xfffffffe
                }
            }
            ShiftType::Rotate => {
                if is_neg {
                    (reg & 0x7fffffff) | (tmp << 31)
                } else {
                    (reg & 0xfffffffe) | tmp
                }
            }
            ShiftType::ZeroInsert => {
                if is_neg {
                    reg & 0x7fffffff
                } else {
                    reg & 0xfffffffe
                }
            }
            ShiftType::LinkInsert => {
                if is_neg {
                    (reg & 0x7fffffff) | (m << 31)
                } else {
                    (reg & 0xfffffffe) | m
                }
            }
        };
    }
    regs.set_bit(STS, STS_M, tmp != 0);
    reg
}

/*************************** MEMORY REFERENCE ***************************/

pub fn stz(cpu: &mut Cpu, _dispatch: &DispatchTable, operand: u16) -> StepResult {
    let ea = effective_address(cpu, operand)?;
    cpu.mmu.write_virtual(&mut cpu.regs, ea.address, 0, ea.use_apt, WriteMode::Word)?;
    ok()
}

pub fn sta(cpu: &mut Cpu, _dispatch: &DispatchTable, operand: u16) -> StepResult {
    let ea = effective_address(cpu, operand)?;
    let a = cpu.regs.a();
    cpu.mmu.write_virtual(&mut cpu.regs, ea.address, a, ea.use_apt, WriteMode::Word)?;
    ok()
}

pub fn stt(cpu: &mut Cpu, _dispatch: &DispatchTable, operand: u16) -> StepResult {
    let ea = effective_address(cpu, operand)?;
    let t = cpu.regs.t();
    cpu.mmu.write_virtual(&mut cpu.regs, ea.address, t, ea.use_apt, WriteMode::Word)?;
    ok()
}

pub fn stx(cpu: &mut Cpu, _dispatch: &DispatchTable, operand: u16) -> StepResult {
    let ea = effective_address(cpu, operand)?;
    let x = cpu.regs.x();
    cpu.mmu.write_virtual(&mut cpu.regs, ea.address, x, ea.use_apt, WriteMode::Word)?;
    ok()
}

pub fn std(cpu: &mut Cpu, _dispatch: &DispatchTable, operand: u16) -> StepResult {
    let ea = effective_address(cpu, operand)?;
    let (a, d) = (cpu.regs.a(), cpu.regs.d());
    cpu.mmu.write_virtual(&mut cpu.regs, ea.address, a, ea.use_apt, WriteMode::Word)?;
    cpu.mmu
        .write_virtual(&mut cpu.regs, ea.address.wrapping_add(1), d, ea.use_apt, WriteMode::Word)?;
    ok()
}

pub fn ldd(cpu: &mut Cpu, _dispatch: &DispatchTable, operand: u16) -> StepResult {
    let ea = effective_address(cpu, operand)?;
    let a = cpu.mmu.read_virtual(&mut cpu.regs, ea.address, ea.use_apt)?;
    let d = cpu.mmu.read_virtual(&mut cpu.regs, ea.address.wrapping_add(1), ea.use_apt)?;
    cpu.regs.set_a(a);
    cpu.regs.set_d(d);
    ok()
}

pub fn lda(cpu: &mut Cpu, _dispatch: &DispatchTable, operand: u16) -> StepResult {
    let ea = effective_address(cpu, operand)?;
    let value = cpu.mmu.read_virtual(&mut cpu.regs, ea.address, ea.use_apt)?;
    cpu.regs.set_a(value);
    ok()
}

pub fn ldt(cpu: &mut Cpu, _dispatch: &DispatchTable, operand: u16) -> StepResult {
    let ea = effective_address(cpu, operand)?;
    let value = cpu.mmu.read_virtual(&mut cpu.regs, ea.address, ea.use_apt)?;
    cpu.regs.set_t(value);
    ok()
}

pub fn ldx(cpu: &mut Cpu, _dispatch: &DispatchTable, operand: u16) -> StepResult {
    let ea = effective_address(cpu, operand)?;
    let value = cpu.mmu.read_virtual(&mut cpu.regs, ea.address, ea.use_apt)?;
    cpu.regs.set_x(value);
    ok()
}

/// `MIN`: increment memory, skip if it became zero.
pub fn min(cpu: &mut Cpu, _dispatch: &DispatchTable, operand: u16) -> StepResult {
    let ea = effective_address(cpu, operand)?;
    let value = cpu.mmu.read_virtual(&mut cpu.regs, ea.address, ea.use_apt)?.wrapping_add(1);
    cpu.mmu.write_virtual(&mut cpu.regs, ea.address, value, ea.use_apt, WriteMode::Word)?;
    if value == 0 {
        cpu.regs.set_p(cpu.regs.p().wrapping_add(1));
    }
    ok()
}

pub fn add(cpu: &mut Cpu, _dispatch: &DispatchTable, operand: u16) -> StepResult {
    let ea = effective_address(cpu, operand)?;
    let mem = cpu.mmu.read_virtual(&mut cpu.regs, ea.address, ea.use_apt)?;
    let a = cpu.regs.a();
    let result = do_add(&mut cpu.regs, a, mem, 0);
    cpu.regs.set_a(result);
    ok()
}

pub fn sub(cpu: &mut Cpu, _dispatch: &DispatchTable, operand: u16) -> StepResult {
    let ea = effective_address(cpu, operand)?;
    let mem = cpu.mmu.read_virtual(&mut cpu.regs, ea.address, ea.use_apt)?;
    let a = cpu.regs.a();
    let result = do_add(&mut cpu.regs, a, !mem, 1);
    cpu.regs.set_a(result);
    ok()
}

pub fn and(cpu: &mut Cpu, _dispatch: &DispatchTable, operand: u16) -> StepResult {
    let ea = effective_address(cpu, operand)?;
    let mem = cpu.mmu.read_virtual(&mut cpu.regs, ea.address, ea.use_apt)?;
    cpu.regs.set_a(cpu.regs.a() & mem);
    ok()
}

pub fn ora(cpu: &mut Cpu, _dispatch: &DispatchTable, operand: u16) -> StepResult {
    let ea = effective_address(cpu, operand)?;
    let mem = cpu.mmu.read_virtual(&mut cpu.regs, ea.address, ea.use_apt)?;
    cpu.regs.set_a(cpu.regs.a() | mem);
    ok()
}

/// Floating point (FAD/FSB/FMU/FDV) and the associated LDF/STF load/store,
/// plus the BCD group and the paging-internals group (CLNREENT,
/// CHREENT-PAGES, CLEPU, SETPT, CLEPT), have no emulated unit behind them
/// and trap as illegal -- the BCD group is an empty function body even in
/// the original source, and the floating point unit and paging-internals
/// group are external to the scope this core implements.
pub fn illegal(cpu: &mut Cpu, _dispatch: &DispatchTable, _operand: u16) -> StepResult {
    Err(cpu.regs.interrupt(14, 1 << 4).unwrap_or(Trap::IllegalInstruction))
}

/// `unimplemented_instr`: logged-and-ignored in the source rather than
/// trapped. NLZ/DNZ's bodies are absent from the available reference
/// sources, so they're carried over as the same silent no-op; `GECO` and
/// `LWCS` are documented no-ops in the source itself.
pub fn no_op(_cpu: &mut Cpu, _dispatch: &DispatchTable, _operand: u16) -> StepResult {
    ok()
}

/*************************** JUMPS AND SKIPS ***************************/

pub fn jmp(cpu: &mut Cpu, _dispatch: &DispatchTable, operand: u16) -> StepResult {
    let ea = effective_address(cpu, operand)?;
    cpu.regs.set_p(ea.address);
    ok()
}

pub fn jpl(cpu: &mut Cpu, _dispatch: &DispatchTable, operand: u16) -> StepResult {
    let ea = effective_address(cpu, operand)?;
    let p = cpu.regs.p();
    cpu.regs.set_l(p);
    cpu.regs.set_p(ea.address);
    ok()
}

/// `CJP`: the shared relative-jump core for all 8 conditional jumps. `P`
/// has already been incremented past the instruction; the displacement is
/// added to `P - 1`, matching `gPC = do_add(gPC - 1, temp, 0)`.
fn cjp(cpu: &mut Cpu, flag: bool, operand: u16) {
    if flag {
        let disp = sign_extend_byte((operand & 0xff) as u8) as u16;
        let base = cpu.regs.p().wrapping_sub(1);
        let new_p = do_add(&mut cpu.regs, base, disp, 0);
        cpu.regs.set_p(new_p);
    }
}

pub fn jap(cpu: &mut Cpu, _dispatch: &DispatchTable, operand: u16) -> StepResult {
    let flag = cpu.regs.a() & 0x8000 == 0;
    cjp(cpu, flag, operand);
    ok()
}

pub fn jan(cpu: &mut Cpu, _dispatch: &DispatchTable, operand: u16) -> StepResult {
    let flag = cpu.regs.a() & 0x8000 != 0;
    cjp(cpu, flag, operand);
    ok()
}

pub fn jaz(cpu: &mut Cpu, _dispatch: &DispatchTable, operand: u16) -> StepResult {
    let flag = cpu.regs.a() == 0;
    cjp(cpu, flag, operand);
    ok()
}

pub fn jaf(cpu: &mut Cpu, _dispatch: &DispatchTable, operand: u16) -> StepResult {
    let flag = cpu.regs.a() != 0;
    cjp(cpu, flag, operand);
    ok()
}

pub fn jpc(cpu: &mut Cpu, _dispatch: &DispatchTable, operand: u16) -> StepResult {
    cpu.regs.set_x(cpu.regs.x().wrapping_add(1));
    let flag = cpu.regs.x() & 0x8000 == 0;
    cjp(cpu, flag, operand);
    ok()
}

pub fn jnc(cpu: &mut Cpu, _dispatch: &DispatchTable, operand: u16) -> StepResult {
    cpu.regs.set_x(cpu.regs.x().wrapping_add(1));
    let flag = cpu.regs.x() & 0x8000 != 0;
    cjp(cpu, flag, operand);
    ok()
}

pub fn jxz(cpu: &mut Cpu, _dispatch: &DispatchTable, operand: u16) -> StepResult {
    let flag = cpu.regs.x() == 0;
    cjp(cpu, flag, operand);
    ok()
}

pub fn jxn(cpu: &mut Cpu, _dispatch: &DispatchTable, operand: u16) -> StepResult {
    let flag = cpu.regs.x() & 0x8000 != 0;
    cjp(cpu, flag, operand);
    ok()
}

/// `IsSkip`: evaluates one of the 8 signed-compare skip conditions between
/// the register pair encoded in bits 0-2/3-5, register field 0 reading as
/// a hardwired zero.
fn is_skip(regs: &Registers, instr: u16) -> bool {
    let sr = ((instr >> 3) & 0x07) as usize;
    let dr = (instr & 0x07) as usize;
    let level = regs.current_level();
    let source = if sr == 0 { 0 } else { regs.reg[level][sr] };
    let dest = if dr == 0 { 0 } else { regs.reg[level][dr] };

    let zero = dest.wrapping_sub(source) == 0;
    let sgr = (dest as i16).wrapping_sub(source as i16);
    let overflow = {
        let sd = dest as i16;
        let ss = source as i16;
        ((sd & !ss & !sgr) | (!sd & ss & sgr)) < 0
    };
    let carry = dest >= source;
    let sign = sgr < 0;

    match (instr >> 8) & 0x07 {
        0 => zero,
        1 => !sign,
        2 => !(sign ^ overflow),
        3 => carry,
        4 => !zero,
        5 => sign,
        6 => sign ^ overflow,
        7 => !carry,
        _ => unreachable!(),
    }
}

pub fn skp(cpu: &mut Cpu, _dispatch: &DispatchTable, operand: u16) -> StepResult {
    if is_skip(&cpu.regs, operand) {
        cpu.regs.set_p(cpu.regs.p().wrapping_add(1));
    }
    ok()
}

/*************************** SHORT-IMMEDIATE ***************************/

pub fn saa(cpu: &mut Cpu, _dispatch: &DispatchTable, operand: u16) -> StepResult {
    cpu.regs.set_a(sign_extend_byte((operand & 0xff) as u8) as u16);
    ok()
}
pub fn sab(cpu: &mut Cpu, _dispatch: &DispatchTable, operand: u16) -> StepResult {
    cpu.regs.set_b(sign_extend_byte((operand & 0xff) as u8) as u16);
    ok()
}
pub fn sat(cpu: &mut Cpu, _dispatch: &DispatchTable, operand: u16) -> StepResult {
    cpu.regs.set_t(sign_extend_byte((operand & 0xff) as u8) as u16);
    ok()
}
pub fn sax(cpu: &mut Cpu, _dispatch: &DispatchTable, operand: u16) -> StepResult {
    cpu.regs.set_x(sign_extend_byte((operand & 0xff) as u8) as u16);
    ok()
}
pub fn aaa(cpu: &mut Cpu, _dispatch: &DispatchTable, operand: u16) -> StepResult {
    let temp = sign_extend_byte((operand & 0xff) as u8) as u16;
    let a = cpu.regs.a();
    let result = do_add(&mut cpu.regs, a, temp, 0);
    cpu.regs.set_a(result);
    ok()
}
pub fn aab(cpu: &mut Cpu, _dispatch: &DispatchTable, operand: u16) -> StepResult {
    let temp = sign_extend_byte((operand & 0xff) as u8) as u16;
    let b = cpu.regs.b();
    let result = do_add(&mut cpu.regs, b, temp, 0);
    cpu.regs.set_b(result);
    ok()
}
pub fn aat(cpu: &mut Cpu, _dispatch: &DispatchTable, operand: u16) -> StepResult {
    let temp = sign_extend_byte((operand & 0xff) as u8) as u16;
    let t = cpu.regs.t();
    let result = do_add(&mut cpu.regs, t, temp, 0);
    cpu.regs.set_t(result);
    ok()
}
pub fn aax(cpu: &mut Cpu, _dispatch: &DispatchTable, operand: u16) -> StepResult {
    let temp = sign_extend_byte((operand & 0xff) as u8) as u16;
    let x = cpu.regs.x();
    let result = do_add(&mut cpu.regs, x, temp, 0);
    cpu.regs.set_x(result);
    ok()
}

/*************************** SHIFTS ***************************/

pub fn shifts(cpu: &mut Cpu, _dispatch: &DispatchTable, operand: u16) -> StepResult {
    match (operand >> 7) & 0x03 {
        0 => {
            let current = cpu.regs.t();
            let t = shift_reg(&mut cpu.regs, current, operand);
            cpu.regs.set_t(t);
        }
        1 => {
            let current = cpu.regs.d();
            let d = shift_reg(&mut cpu.regs, current, operand);
            cpu.regs.set_d(d);
        }
        2 => {
            let current = cpu.regs.a();
            let a = shift_reg(&mut cpu.regs, current, operand);
            cpu.regs.set_a(a);
        }
        3 => {
            let combined = ((cpu.regs.a() as u32) << 16) | cpu.regs.d() as u32;
            let shifted = shift_double_reg(&mut cpu.regs, combined, operand);
            cpu.regs.set_a((shifted >> 16) as u16);
            cpu.regs.set_d((shifted & 0xffff) as u16);
        }
        _ => unreachable!(),
    }
    ok()
}

/*************************** REGISTER BLOCK / REGISTER OPS ***************************/

pub fn srb(cpu: &mut Cpu, _dispatch: &DispatchTable, operand: u16) -> StepResult {
    if !check_priv(cpu) {
        return ok();
    }
    let level = ((operand & 0x78) >> 3) as usize;
    let addr = cpu.regs.x();
    let sts = cpu.regs.reg[level][STS] & 0xff;
    let values = [
        cpu.regs.reg[level][P],
        cpu.regs.reg[level][X],
        cpu.regs.reg[level][T],
        cpu.regs.reg[level][A],
        cpu.regs.reg[level][D],
        cpu.regs.reg[level][L],
        sts,
        cpu.regs.reg[level][B],
    ];
    for (i, value) in values.iter().copied().enumerate() {
        cpu.mmu
            .write_virtual(&mut cpu.regs, addr.wrapping_add(i as u16), value, true, WriteMode::Word)?;
    }
    ok()
}

pub fn lrb(cpu: &mut Cpu, _dispatch: &DispatchTable, operand: u16) -> StepResult {
    if !check_priv(cpu) {
        return ok();
    }
    let level = ((operand & 0x78) >> 3) as usize;
    let addr = cpu.regs.x();
    let current = cpu.regs.current_level();

    if level != current {
        let p = cpu.mmu.read_virtual(&mut cpu.regs, addr, true)?;
        cpu.regs.reg[level][P] = p;
    }
    let x = cpu.mmu.read_virtual(&mut cpu.regs, addr.wrapping_add(1), true)?;
    let t = cpu.mmu.read_virtual(&mut cpu.regs, addr.wrapping_add(2), true)?;
    let a = cpu.mmu.read_virtual(&mut cpu.regs, addr.wrapping_add(3), true)?;
    let d = cpu.mmu.read_virtual(&mut cpu.regs, addr.wrapping_add(4), true)?;
    let l = cpu.mmu.read_virtual(&mut cpu.regs, addr.wrapping_add(5), true)?;
    let sts = cpu.mmu.read_virtual(&mut cpu.regs, addr.wrapping_add(6), true)?;
    let b = cpu.mmu.read_virtual(&mut cpu.regs, addr.wrapping_add(7), true)?;
    cpu.regs.reg[level][X] = x;
    cpu.regs.reg[level][T] = t;
    cpu.regs.reg[level][A] = a;
    cpu.regs.reg[level][D] = d;
    cpu.regs.reg[level][L] = l;
    cpu.regs.reg[level][STS] = (cpu.regs.reg[level][STS] & 0xff00) | (sts & 0xff);
    cpu.regs.reg[level][B] = b;
    ok()
}

/// `regop`: SWAP/RAND/REXO/RORA (logical, `RAD` clear) and the RADD
/// carry-select family/RCLR (arithmetic, `RAD` set), selected by bit 10.
pub fn regop(cpu: &mut Cpu, _dispatch: &DispatchTable, operand: u16) -> StepResult {
    let rad = (operand >> 10) & 1;
    let cm1 = (operand >> 7) & 1 != 0;
    let cld = (operand >> 6) & 1 != 0;
    let sr = ((operand >> 3) & 0x07) as usize;
    let dr = (operand & 0x07) as usize;
    let level = cpu.regs.current_level();

    let source = if sr == 0 { 0 } else { cpu.regs.reg[level][sr] };
    let destination = if cld || dr == 0 { 0 } else { cpu.regs.reg[level][dr] };

    if dr == 0 {
        if rad == 1 {
            cpu.regs.set_bit(STS, STS_C, false);
        }
        return ok();
    }

    if rad == 0 {
        match (operand >> 8) & 0x03 {
            0 => {
                // SWAP
                let tmp = cpu.regs.reg[level][dr];
                cpu.regs.reg[level][dr] = if cm1 { !source } else { source };
                cpu.regs.reg[level][sr] = if cld { 0 } else { tmp };
            }
            1 => {
                // RAND
                let operand_val = if cm1 { !source } else { source };
                cpu.regs.reg[level][dr] &= operand_val;
                if cld {
                    cpu.regs.reg[level][dr] = 0;
                }
            }
            2 => {
                // REXO
                cpu.regs.reg[level][dr] = if cld {
                    if cm1 { !source } else { source }
                } else if cm1 {
                    cpu.regs.reg[level][dr] ^ !source
                } else {
                    cpu.regs.reg[level][dr] ^ source
                };
            }
            3 => {
                // RORA
                cpu.regs.reg[level][dr] = if cld {
                    if cm1 { !source } else { source }
                } else if cm1 {
                    cpu.regs.reg[level][dr] | !source
                } else {
                    cpu.regs.reg[level][dr] | source
                };
            }
            _ => unreachable!(),
        }
    } else {
        let carry_in = cpu.regs.get_bit(STS, STS_C) as u16;
        let result = match (operand >> 7) & 0x07 {
            0 => do_add(&mut cpu.regs, destination, source, 0),
            1 => do_add(&mut cpu.regs, destination, !source, 0),
            2 => do_add(&mut cpu.regs, destination, source, 1),
            3 => do_add(&mut cpu.regs, destination, !source, 1),
            4 => do_add(&mut cpu.regs, destination, source, carry_in),
            5 => do_add(&mut cpu.regs, destination, !source, carry_in),
            _ => destination,
        };
        cpu.regs.reg[level][dr] = result;
    }
    ok()
}

/*************************** BIT OPERATIONS ***************************/

/// `do_bops`: 16 bit-test/set/skip variants selected by bits 7-10,
/// operating on bit `bn` of register `dr` and the K (carry-like) status
/// bit.
pub fn do_bops(cpu: &mut Cpu, _dispatch: &DispatchTable, operand: u16) -> StepResult {
    let bn = (operand & 0x78) >> 3;
    let dr = (operand & 0x07) as usize;
    match (operand & 0x780) >> 7 {
        0 => cpu.regs.set_bit(dr, bn, false), // BSET ZRO
        1 => cpu.regs.set_bit(dr, bn, true),  // BSET ONE
        2 => {
            // BSET BCM
            let bit = !cpu.regs.get_bit(dr, bn);
            cpu.regs.set_bit(dr, bn, bit);
        }
        3 => {
            // BSET BAC
            let k = cpu.regs.get_bit(STS, STS_K);
            cpu.regs.set_bit(dr, bn, k);
        }
        4 => {
            if !cpu.regs.get_bit(dr, bn) {
                cpu.regs.set_p(cpu.regs.p().wrapping_add(1));
            }
        }
        5 => {
            if cpu.regs.get_bit(dr, bn) {
                cpu.regs.set_p(cpu.regs.p().wrapping_add(1));
            }
        }
        6 => {
            if (!cpu.regs.get_bit(dr, bn)) == cpu.regs.get_bit(STS, STS_K) {
                cpu.regs.set_p(cpu.regs.p().wrapping_add(1));
            }
        }
        7 => {
            if cpu.regs.get_bit(dr, bn) == cpu.regs.get_bit(STS, STS_K) {
                cpu.regs.set_p(cpu.regs.p().wrapping_add(1));
            }
        }
        8 => {
            // BSTC
            let k = cpu.regs.get_bit(STS, STS_K);
            cpu.regs.set_bit(dr, bn, !k);
            cpu.regs.set_bit(STS, STS_K, true);
        }
        9 => {
            // BSTA
            let k = cpu.regs.get_bit(STS, STS_K);
            cpu.regs.set_bit(dr, bn, k);
            cpu.regs.set_bit(STS, STS_K, false);
        }
        10 => {
            let bit = !cpu.regs.get_bit(dr, bn);
            cpu.regs.set_bit(STS, STS_K, bit);
        }
        11 => {
            let bit = cpu.regs.get_bit(dr, bn);
            cpu.regs.set_bit(STS, STS_K, bit);
        }
        12 => {
            let bit = (!cpu.regs.get_bit(dr, bn)) && cpu.regs.get_bit(STS, STS_K);
            cpu.regs.set_bit(STS, STS_K, bit);
        }
        13 => {
            let bit = cpu.regs.get_bit(dr, bn) && cpu.regs.get_bit(STS, STS_K);
            cpu.regs.set_bit(STS, STS_K, bit);
        }
        14 => {
            let bit = (!cpu.regs.get_bit(dr, bn)) || cpu.regs.get_bit(STS, STS_K);
            cpu.regs.set_bit(STS, STS_K, bit);
        }
        15 => {
            let bit = cpu.regs.get_bit(dr, bn) || cpu.regs.get_bit(STS, STS_K);
            cpu.regs.set_bit(STS, STS_K, bit);
        }
        _ => unreachable!(),
    }
    ok()
}

/*************************** PRIVILEGED SYSTEM CONTROL ***************************/

/// `DoMCL`: masked clear of STS/PID/PIE by `A`.
pub fn mcl(cpu: &mut Cpu, _dispatch: &DispatchTable, operand: u16) -> StepResult {
    if !check_priv(cpu) {
        return ok();
    }
    let a = cpu.regs.a();
    let level = cpu.regs.current_level();
    match operand & 0x0f {
        0o1 => cpu.regs.reg[level][STS] &= !(a & 0xff),
        0o6 => {
            cpu.regs.pid &= !a;
            cpu.regs.chkit = true;
        }
        0o7 => {
            cpu.regs.pie &= !a;
            cpu.regs.chkit = true;
        }
        _ => {}
    }
    ok()
}

/// `DoMST`: masked set of STS/PID/PIE by `A`.
pub fn mst(cpu: &mut Cpu, _dispatch: &DispatchTable, operand: u16) -> StepResult {
    if !check_priv(cpu) {
        return ok();
    }
    let a = cpu.regs.a();
    let level = cpu.regs.current_level();
    match operand & 0x0f {
        0o1 => cpu.regs.reg[level][STS] |= a & 0xff,
        0o6 => {
            cpu.regs.pid |= a;
            cpu.regs.chkit = true;
        }
        0o7 => {
            cpu.regs.pie |= a;
            cpu.regs.chkit = true;
        }
        _ => {}
    }
    ok()
}

/// `DoTRA`: transfer an internal register into `A`.
pub fn tra(cpu: &mut Cpu, _dispatch: &DispatchTable, operand: u16) -> StepResult {
    if !check_priv(cpu) {
        return ok();
    }
    match operand & 0x0f {
        0o0 => cpu.regs.set_a(cpu.regs.pans),
        0o1 => {
            let level = cpu.regs.current_level();
            let a = (cpu.regs.reg[level][STS] & 0xff) | (cpu.regs.sts_hi & 0xff00);
            cpu.regs.set_a(a);
        }
        0o2 => cpu.regs.set_a(cpu.regs.opr),
        0o3 => {
            let value = cpu.regs.read_pgs();
            cpu.regs.set_a(value);
        }
        0o4 => cpu.regs.set_a(((cpu.regs.pvl & 0x0f) << 3) | 0xd782),
        0o5 => {
            let iic = cpu.regs.calc_iic();
            cpu.regs.set_a(iic);
            cpu.regs.iic = 0;
            cpu.regs.iid = 0;
            cpu.regs.chkit = true;
        }
        0o6 => cpu.regs.set_a(cpu.regs.pid),
        0o7 => cpu.regs.set_a(cpu.regs.pie),
        0o10 => cpu.regs.set_a((1 << 2) | (1 << 3)),
        0o11 => {
            let a = 1u16 << cpu.regs.current_level();
            cpu.regs.set_a(a);
        }
        0o12 => cpu.regs.set_a(cpu.regs.ald),
        0o13 => {
            let value = cpu.regs.read_pes();
            cpu.regs.set_a(value);
        }
        0o14 => {
            let level = ((cpu.regs.a() >> 3) & 0x0f) as usize;
            let mut value = cpu.regs.pcr[level];
            if cpu.mmu.mms_type() == crate::memory::MmsType::Mms1 {
                value &= !(1 << 2);
            }
            value &= !(1 << 15);
            cpu.regs.set_a(value);
        }
        0o15 => {
            let value = cpu.regs.read_pea();
            cpu.regs.set_a(value);
        }
        _ => {}
    }
    ok()
}

/// `DoTRR`: transfer `A` into an internal register.
pub fn trr(cpu: &mut Cpu, _dispatch: &DispatchTable, operand: u16) -> StepResult {
    if !check_priv(cpu) {
        return ok();
    }
    let a = cpu.regs.a();
    match operand & 0x0f {
        0o0 => cpu.regs.pans = a,
        0o1 => {
            let level = cpu.regs.current_level();
            cpu.regs.reg[level][STS] = (cpu.regs.reg[level][STS] & 0xff00) | (a & 0xff);
        }
        0o2 => cpu.regs.lmp = a,
        0o3 => {
            let level = ((a >> 3) & 0x0f) as usize;
            let mut value = a;
            if cpu.mmu.mms_type() == crate::memory::MmsType::Mms1 {
                value &= !(1 << 2);
            }
            cpu.regs.pcr[level] = value;
        }
        0o5 => {
            cpu.regs.iie = a;
            cpu.regs.chkit = true;
        }
        0o6 => {
            cpu.regs.pid = a;
            cpu.regs.chkit = true;
        }
        0o7 => {
            cpu.regs.pie = a;
            cpu.regs.chkit = true;
        }
        0o10 => cpu.regs.ccl = a,
        0o11 => cpu.regs.lcil = a,
        0o12 => cpu.regs.ucil = a,
        0o15 => cpu.regs.eccr = a,
        _ => {}
    }
    ok()
}

/// `DoEXR`: execute the instruction held in a register without advancing
/// `P`, via `Cpu::execute_resident`. EXR-of-EXR sets the Z status bit
/// instead of recursing, per the source's nested-EXR guard.
pub fn exr(cpu: &mut Cpu, dispatch: &DispatchTable, operand: u16) -> StepResult {
    let sr = ((operand >> 3) & 0x07) as usize;
    let level = cpu.regs.current_level();
    let exr_instr = if sr == 0 { 0 } else { cpu.regs.reg[level][sr] };

    if exr_instr & 0xffc0 == 0o140600 {
        cpu.regs.set_bit(STS, STS_Z, true);
        return ok();
    }
    cpu.execute_resident(dispatch, exr_instr)
}

pub fn wait(cpu: &mut Cpu, _dispatch: &DispatchTable, _operand: u16) -> StepResult {
    if !check_priv(cpu) {
        return ok();
    }
    if !cpu.regs.ioni() {
        return Ok(StepOutcome::Halted);
    }
    if cpu.regs.current_level() == 0 {
        return ok();
    }
    let level = cpu.regs.current_level();
    cpu.regs.pid &= !(1u16 << level);
    cpu.regs.chkit = true;
    ok()
}

pub fn opcom(cpu: &mut Cpu, _dispatch: &DispatchTable, _operand: u16) -> StepResult {
    if !check_priv(cpu) {
        return ok();
    }
    Ok(StepOutcome::Halted)
}

pub fn iof(cpu: &mut Cpu, _dispatch: &DispatchTable, _operand: u16) -> StepResult {
    if !check_priv(cpu) {
        return ok();
    }
    cpu.regs.set_bit(STS, STS_IONI, false);
    ok()
}

pub fn ion(cpu: &mut Cpu, _dispatch: &DispatchTable, _operand: u16) -> StepResult {
    cpu.regs.set_bit(STS, STS_IONI, true);
    cpu.regs.chkit = true;
    ok()
}

pub fn pof(cpu: &mut Cpu, _dispatch: &DispatchTable, _operand: u16) -> StepResult {
    if !check_priv(cpu) {
        return ok();
    }
    cpu.regs.set_bit(STS, STS_PONI, false);
    ok()
}

pub fn piof(cpu: &mut Cpu, _dispatch: &DispatchTable, _operand: u16) -> StepResult {
    if !check_priv(cpu) {
        return ok();
    }
    cpu.regs.set_bit(STS, STS_IONI, false);
    cpu.regs.set_bit(STS, STS_PONI, false);
    ok()
}

pub fn pon(cpu: &mut Cpu, _dispatch: &DispatchTable, _operand: u16) -> StepResult {
    cpu.regs.set_bit(STS, STS_PONI, true);
    ok()
}

pub fn pion(cpu: &mut Cpu, _dispatch: &DispatchTable, _operand: u16) -> StepResult {
    cpu.regs.set_bit(STS, STS_IONI, true);
    cpu.regs.set_bit(STS, STS_PONI, true);
    cpu.regs.chkit = true;
    ok()
}

pub fn sex(cpu: &mut Cpu, _dispatch: &DispatchTable, _operand: u16) -> StepResult {
    if !check_priv(cpu) {
        return ok();
    }
    cpu.regs.set_bit(STS, STS_SEXI, true);
    ok()
}

pub fn rex(cpu: &mut Cpu, _dispatch: &DispatchTable, _operand: u16) -> StepResult {
    if !check_priv(cpu) {
        return ok();
    }
    cpu.regs.set_bit(STS, STS_SEXI, false);
    ok()
}

/// `IRW`: write `A` into a register on another program level.
pub fn irw(cpu: &mut Cpu, _dispatch: &DispatchTable, operand: u16) -> StepResult {
    if !check_priv(cpu) {
        return ok();
    }
    let level = ((operand >> 3) & 0x0f) as usize;
    let dr = (operand & 0x07) as usize;
    let current = cpu.regs.current_level();
    if level == current && (dr == A || dr == P) {
        return ok();
    }
    let a = cpu.regs.a();
    if dr == STS {
        cpu.regs.reg[level][STS] = a & 0xff;
    } else {
        cpu.regs.reg[level][dr] = a;
    }
    ok()
}

/// `IRR`: read a register from another program level into `A`.
pub fn irr(cpu: &mut Cpu, _dispatch: &DispatchTable, operand: u16) -> StepResult {
    if !check_priv(cpu) {
        return ok();
    }
    let level = ((operand >> 3) & 0x0f) as usize;
    let sr = (operand & 0x07) as usize;
    let value = if sr == 0 {
        cpu.regs.reg[level][STS] & 0xff
    } else {
        cpu.regs.reg[level][sr]
    };
    cpu.regs.set_a(value);
    ok()
}

/// `EXAM`/`DEPO`: raw 24-bit physical memory peek/poke via `AD`, bypassing
/// the page tables entirely.
pub fn exam(cpu: &mut Cpu, _dispatch: &DispatchTable, _operand: u16) -> StepResult {
    if !check_priv(cpu) {
        return ok();
    }
    let address = (((cpu.regs.a() & 0xff) as i64) << 16) | cpu.regs.d() as i64;
    let value = cpu.mmu.read_physical(&cpu.regs, address, true);
    cpu.regs.set_t(value);
    ok()
}

pub fn depo(cpu: &mut Cpu, _dispatch: &DispatchTable, _operand: u16) -> StepResult {
    if !check_priv(cpu) {
        return ok();
    }
    let address = (((cpu.regs.a() & 0xff) as i64) << 16) | cpu.regs.d() as i64;
    let t = cpu.regs.t();
    cpu.mmu.write_physical(&mut cpu.regs, address, t, true);
    ok()
}

/*************************** STACK FRAME ***************************/

pub fn init(cpu: &mut Cpu, _dispatch: &DispatchTable, _operand: u16) -> StepResult {
    let p = cpu.regs.p();
    let demand = cpu.mmu.read_virtual(&mut cpu.regs, p, false)?;
    let start = cpu.mmu.read_virtual(&mut cpu.regs, p.wrapping_add(1), false)?;
    let maxsize = cpu.mmu.read_virtual(&mut cpu.regs, p.wrapping_add(2), false)?;
    let flag = cpu.mmu.read_virtual(&mut cpu.regs, p.wrapping_add(3), false)?;

    let overflow = (start as i32 + 128 + demand as i32 - 122) > (start as i32 + maxsize as i32);
    if overflow {
        cpu.regs.set_p(p.wrapping_add(5));
        return ok();
    }
    let level = cpu.regs.current_level();
    if (flag & 1) != (cpu.regs.reg[level][STS] & 1) {
        cpu.regs.set_p(p.wrapping_add(5));
        return ok();
    }

    let l1 = cpu.regs.l().wrapping_add(1);
    let b = cpu.regs.b();
    cpu.mmu.write_virtual(&mut cpu.regs, start, l1, false, WriteMode::Word)?;
    cpu.mmu
        .write_virtual(&mut cpu.regs, start.wrapping_add(1), b, false, WriteMode::Word)?;
    cpu.mmu.write_virtual(
        &mut cpu.regs,
        start.wrapping_add(3),
        start.wrapping_add(maxsize),
        false,
        WriteMode::Word,
    )?;
    let new_b = start.wrapping_add(128);
    cpu.regs.set_b(new_b);
    let stp = new_b.wrapping_add(demand).wrapping_sub(122);
    cpu.mmu
        .write_virtual(&mut cpu.regs, start.wrapping_add(2), stp, false, WriteMode::Word)?;
    cpu.regs.set_p(p.wrapping_add(6));
    ok()
}

pub fn entr(cpu: &mut Cpu, _dispatch: &DispatchTable, _operand: u16) -> StepResult {
    let p = cpu.regs.p();
    let demand = cpu.mmu.read_virtual(&mut cpu.regs, p, false)?;
    let b = cpu.regs.b();
    let smax = cpu.mmu.read_virtual(&mut cpu.regs, b.wrapping_sub(125), false)?;

    if (b as i32 + demand as i32 - 122) > smax as i32 {
        cpu.regs.set_p(p.wrapping_add(1));
        return ok();
    }
    let stp = cpu.mmu.read_virtual(&mut cpu.regs, b.wrapping_sub(126), false)?;
    let old_b = b;
    let new_b = stp.wrapping_add(128);
    cpu.regs.set_b(new_b);

    let l1 = cpu.regs.l().wrapping_add(1);
    cpu.mmu
        .write_virtual(&mut cpu.regs, new_b.wrapping_sub(128), l1, false, WriteMode::Word)?;
    cpu.mmu
        .write_virtual(&mut cpu.regs, new_b.wrapping_sub(127), old_b, false, WriteMode::Word)?;
    cpu.mmu
        .write_virtual(&mut cpu.regs, new_b.wrapping_sub(125), smax, false, WriteMode::Word)?;
    let new_stp = new_b.wrapping_add(demand).wrapping_sub(122);
    cpu.mmu
        .write_virtual(&mut cpu.regs, new_b.wrapping_sub(126), new_stp, false, WriteMode::Word)?;
    cpu.regs.set_p(p.wrapping_add(2));
    ok()
}

pub fn leave(cpu: &mut Cpu, _dispatch: &DispatchTable, _operand: u16) -> StepResult {
    let b = cpu.regs.b();
    let p = cpu.mmu.read_virtual(&mut cpu.regs, b.wrapping_sub(128), false)?;
    let prev_b = cpu.mmu.read_virtual(&mut cpu.regs, b.wrapping_sub(127), false)?;
    cpu.regs.set_p(p);
    cpu.regs.set_b(prev_b);
    ok()
}

pub fn eleav(cpu: &mut Cpu, _dispatch: &DispatchTable, _operand: u16) -> StepResult {
    let b = cpu.regs.b();
    let link = cpu.mmu.read_virtual(&mut cpu.regs, b.wrapping_sub(128), false)?.wrapping_sub(1);
    cpu.mmu
        .write_virtual(&mut cpu.regs, b.wrapping_sub(128), link, false, WriteMode::Word)?;
    let a = cpu.regs.a();
    cpu.mmu
        .write_virtual(&mut cpu.regs, b.wrapping_sub(123), a, false, WriteMode::Word)?;
    let p = cpu.mmu.read_virtual(&mut cpu.regs, b.wrapping_sub(128), false)?;
    let prev_b = cpu.mmu.read_virtual(&mut cpu.regs, b.wrapping_sub(127), false)?;
    cpu.regs.set_p(p);
    cpu.regs.set_b(prev_b);
    ok()
}

/*************************** BYTE AND INDEX HELPERS ***************************/

pub fn lbyt(cpu: &mut Cpu, _dispatch: &DispatchTable, _operand: u16) -> StepResult {
    let offset = cpu.regs.x() >> 1;
    let addr = cpu.regs.t().wrapping_add(offset);
    let memval = cpu.mmu.read_virtual(&mut cpu.regs, addr, true)?;
    let value = if cpu.regs.x() & 1 != 0 { memval & 0xff } else { (memval >> 8) & 0xff };
    cpu.regs.set_a(value);
    ok()
}

pub fn sbyt(cpu: &mut Cpu, _dispatch: &DispatchTable, _operand: u16) -> StepResult {
    let offset = cpu.regs.x() >> 1;
    let addr = cpu.regs.t().wrapping_add(offset);
    let a = cpu.regs.a();
    let wm = if cpu.regs.x() & 1 != 0 { WriteMode::Lsb } else { WriteMode::Msb };
    cpu.mmu.write_virtual(&mut cpu.regs, addr, a, true, wm)?;
    ok()
}

pub fn mix3(cpu: &mut Cpu, _dispatch: &DispatchTable, _operand: u16) -> StepResult {
    let x = (cpu.regs.a().wrapping_sub(1)).wrapping_mul(3);
    cpu.regs.set_x(x);
    ok()
}

/*************************** MULTIPLY / DIVIDE ***************************/

pub fn mpy(cpu: &mut Cpu, _dispatch: &DispatchTable, operand: u16) -> StepResult {
    let a = cpu.regs.a() as i16 as i32;
    let ea = effective_address(cpu, operand)?;
    let mem = cpu.mmu.read_virtual(&mut cpu.regs, ea.address, ea.use_apt)? as i16 as i32;
    cpu.regs.set_bit(STS, STS_Q, false);
    let result = a * mem;
    if result.unsigned_abs() > 32767 {
        cpu.regs.set_bit(STS, STS_Q, true);
        cpu.regs.set_bit(STS, STS_O, true);
    }
    cpu.regs.set_a(result as i16 as u16);
    ok()
}

/// `RMPY`: signed 16x16->32 register multiply (sign-magnitude internally,
/// matching the microcode-verified source).
pub fn rmpy(cpu: &mut Cpu, _dispatch: &DispatchTable, operand: u16) -> StepResult {
    let level = cpu.regs.current_level();
    let sr = ((operand >> 3) & 0x07) as usize;
    let dr = (operand & 0x07) as usize;
    let mut source = if sr != 0 { cpu.regs.reg[level][sr] as i16 } else { 0 };
    let mut dest = if dr != 0 { cpu.regs.reg[level][dr] as i16 } else { 0 };

    let mut minus_count = 0;
    if source & i16::MIN != 0 {
        source = source.wrapping_neg();
        minus_count += 1;
    }
    if dest & i16::MIN != 0 {
        dest = dest.wrapping_neg();
        minus_count += 1;
    }
    let result = source as i32 * dest as i32;

    if result.unsigned_abs() > i32::MAX as u32 {
        cpu.regs.set_bit(STS, STS_Q, true);
        cpu.regs.set_bit(STS, STS_O, true);
    } else {
        cpu.regs.set_bit(STS, STS_Q, false);
    }
    cpu.regs.set_bit(STS, STS_C, (result as u32 & 0xffff0000) != 0);

    if minus_count == 1 {
        let hi = (((result >> 16) & 0xffff) as i16).wrapping_neg() & 0x3ff;
        let lo = (result as i16).wrapping_neg();
        cpu.regs.set_a(hi as u16);
        cpu.regs.set_d(lo as u16);
    } else {
        cpu.regs.set_a(((result >> 16) & 0xffff) as u16);
        cpu.regs.set_d((result & 0xffff) as u16);
    }
    ok()
}

/// `RDIV`: signed 32-bit `AD` divided by a register, quotient in `A`,
/// remainder in `D`. Sets `Z` on division by zero or quotient overflow.
pub fn rdiv(cpu: &mut Cpu, _dispatch: &DispatchTable, operand: u16) -> StepResult {
    let dividend = ((cpu.regs.a() as i32) << 16) | cpu.regs.d() as i32;
    let level = cpu.regs.current_level();
    let sr = ((operand >> 3) & 0x07) as usize;
    let divisor = if sr != 0 { cpu.regs.reg[level][sr] as i16 as i32 } else { 0 };

    if divisor == 0 {
        cpu.regs.set_bit(STS, STS_Z, true);
        return ok();
    }
    let quotient = dividend / divisor;
    let remainder = dividend - quotient * divisor;
    cpu.regs.set_bit(STS, STS_C, (quotient as u32 & 0xffff0000) != 0);
    if quotient.unsigned_abs() >= 32768 {
        cpu.regs.set_bit(STS, STS_Z, true);
        return ok();
    }
    cpu.regs.set_a(quotient as u16);
    cpu.regs.set_d(remainder as u16);
    ok()
}

/*************************** I/O ***************************/

/// `IOX`: exchanges `A` with a device register addressed by the operand's
/// low 11 bits.
pub fn iox(cpu: &mut Cpu, _dispatch: &DispatchTable, operand: u16) -> StepResult {
    if !check_priv(cpu) {
        return ok();
    }
    let addr = operand & 0x7ff;
    let old = cpu.io.ioi(addr);
    let a = cpu.regs.a();
    cpu.io.ioo(addr, a);
    cpu.regs.set_a(old);
    ok()
}

/// `IOXT`: `IOX` addressed by `T` instead of the operand.
pub fn ioxt(cpu: &mut Cpu, _dispatch: &DispatchTable, _operand: u16) -> StepResult {
    if !check_priv(cpu) {
        return ok();
    }
    let addr = cpu.regs.t() & 0x7ff;
    let old = cpu.io.ioi(addr);
    let a = cpu.regs.a();
    cpu.io.ioo(addr, a);
    cpu.regs.set_a(old);
    ok()
}

/// `DoIDENT`: only the 4 ring-10..13 priority-level codes are legal.
pub fn ident(cpu: &mut Cpu, dispatch: &DispatchTable, operand: u16) -> StepResult {
    if !check_priv(cpu) {
        return ok();
    }
    let priolevel = match operand & 0x3f {
        0o04 => 10,
        0o11 => 11,
        0o22 => 12,
        0o43 => 13,
        _ => return illegal(cpu, dispatch, operand),
    };
    match cpu.io.ident(priolevel) {
        Some(id) => cpu.regs.set_a(id),
        None => {
            cpu.regs.set_a(0);
            if priolevel != 13 {
                cpu.regs.interrupt(14, 1 << 7);
            }
        }
    }
    ok()
}

/// IOT is documented as implemented-as-illegal on every CPU variant the
/// source ships, not merely a placeholder -- see `ndfunc_iot`.
pub fn iot(cpu: &mut Cpu, dispatch: &DispatchTable, operand: u16) -> StepResult {
    if !check_priv(cpu) {
        return ok();
    }
    illegal(cpu, dispatch, operand)
}

/*************************** BYTE / FIELD MOVE ***************************/

/// `DoRDUS`: reads the word addressed by `T` into `A`.
pub fn rdus(cpu: &mut Cpu, _dispatch: &DispatchTable, _operand: u16) -> StepResult {
    let t = cpu.regs.t();
    let value = cpu.mmu.read_virtual(&mut cpu.regs, t, true)?;
    cpu.regs.set_a(value);
    ok()
}

/// `DoTSET`: reads the word addressed by `T` into `A`, then sets that word
/// to all ones -- the test-and-set primitive SINTRAN uses for semaphores.
pub fn tset(cpu: &mut Cpu, _dispatch: &DispatchTable, _operand: u16) -> StepResult {
    let t = cpu.regs.t();
    let value = cpu.mmu.read_virtual(&mut cpu.regs, t, true)?;
    cpu.regs.set_a(value);
    cpu.mmu.write_virtual(&mut cpu.regs, t, 0xffff, true, WriteMode::Word)?;
    ok()
}

/// `ndfunc_bfill`: fills `T` bits 0-11 bytes starting at `X`, alternating
/// MSB/LSB of each word per `T` bit 15 (the starting byte phase), with the
/// low byte of `A`. `T` bit 14 selects APT addressing.
pub fn bfill(cpu: &mut Cpu, _dispatch: &DispatchTable, _operand: u16) -> StepResult {
    let t = cpu.regs.t();
    let right = (t >> 15) & 1;
    let is_apt = (t >> 14) & 1 != 0;
    let thebyte = cpu.regs.a() & 0xff;
    let len = (t & 0x0fff) as i32;
    let base = cpu.regs.x();

    let mut i = 0i32;
    while i < len {
        let phase = i + right as i32;
        let addr = base.wrapping_add((phase >> 1) as u16);
        let wm = if phase & 1 != 0 { WriteMode::Lsb } else { WriteMode::Msb };
        cpu.mmu.write_virtual(&mut cpu.regs, addr, thebyte, is_apt, wm)?;
        i += 1;
    }

    let phase = i + right as i32;
    cpu.regs.set_t((t & 0x7000) | (((phase & 1) as u16) << 15));
    cpu.regs.set_x(base.wrapping_add((phase >> 1) as u16));
    cpu.regs.set_p(cpu.regs.p().wrapping_add(1)); // skip return
    ok()
}

/// `DoMOVB`: copies `min(D, T)` bits-0-11 bytes from the field addressed by
/// `A` (side/APT bits in `D`) to the field addressed by `X` (side/APT bits
/// in `T`), high-to-low if the destination starts below the source so an
/// overlapping copy never clobbers bytes it still has to read.
pub fn movb(cpu: &mut Cpu, _dispatch: &DispatchTable, _operand: u16) -> StepResult {
    let d = cpu.regs.d();
    let t = cpu.regs.t();
    let source = cpu.regs.a();
    let dest = cpu.regs.x();
    let s_lr = ((d >> 15) & 1) as i32;
    let d_lr = ((t >> 15) & 1) as i32;
    let s_apt = (d >> 14) & 1 != 0;
    let d_apt = (t >> 14) & 1 != 0;
    let len = ((d & 0x0fff) as i32).min((t & 0x0fff) as i32);

    let mut addr_s = source;
    let mut addr_d = dest;
    let mut i = 0i32;

    if (source as i32) < (dest as i32) {
        let mut idx = len - 1;
        while idx >= 0 {
            addr_s = source.wrapping_add(((idx + s_lr) >> 1) as u16);
            let word = cpu.mmu.read_virtual(&mut cpu.regs, addr_s, s_apt)?;
            let right = (idx + d_lr) & 1 != 0;
            let byte = if right { word } else { (word >> 8) & 0xff };
            addr_d = dest.wrapping_add(((idx + d_lr) >> 1) as u16);
            let wm = if right { WriteMode::Lsb } else { WriteMode::Msb };
            cpu.mmu.write_virtual(&mut cpu.regs, addr_d, byte, d_apt, wm)?;
            idx -= 1;
        }
        i = 0;
    } else {
        while i < len {
            addr_s = source.wrapping_add(((i + s_lr) >> 1) as u16);
            let word = cpu.mmu.read_virtual(&mut cpu.regs, addr_s, s_apt)?;
            let right = (i + d_lr) & 1 != 0;
            let byte = if right { word } else { (word >> 8) & 0xff };
            addr_d = dest.wrapping_add(((i + d_lr) >> 1) as u16);
            let wm = if right { WriteMode::Lsb } else { WriteMode::Msb };
            cpu.mmu.write_virtual(&mut cpu.regs, addr_d, byte, d_apt, wm)?;
            i += 1;
        }
    }

    let bit15 = (((i + d_lr) & 1) as u16) << 15;
    cpu.regs.set_d((d & 0x7000) | bit15);
    cpu.regs.set_t((t & 0x7000) | bit15 | (len as u16 & 0x0fff));
    cpu.regs.set_a(addr_s.wrapping_add(((len + s_lr) >> 1) as u16));
    cpu.regs.set_x(addr_d.wrapping_add(((len + d_lr) >> 1) as u16));
    cpu.regs.set_p(cpu.regs.p().wrapping_add(1)); // unconditional skip return
    ok()
}

/// `DoMOVBF`: like `movb`, but always copies low-to-high and leaves the
/// counts in `D`/`T` as "bytes remaining" rather than zeroing them, so a
/// caller can resume a copy interrupted or deliberately overlapping itself.
/// The skip return is suppressed when the computed field overlaps.
pub fn movbf(cpu: &mut Cpu, _dispatch: &DispatchTable, _operand: u16) -> StepResult {
    let mut d = cpu.regs.d();
    let mut t = cpu.regs.t();
    let source = cpu.regs.a();
    let dest = cpu.regs.x();
    let s_lr = ((d >> 15) & 1) as i32;
    let d_lr = ((t >> 15) & 1) as i32;
    let s_apt = (d >> 14) & 1 != 0;
    let d_apt = (t >> 14) & 1 != 0;
    let mut lens = (d & 0x0fff) as i32;
    let mut lend = (t & 0x0fff) as i32;
    let len = lens.min(lend);

    let half = len / 2;
    let candidate = (half.wrapping_add(source as i32).wrapping_sub(1)) as u16;
    let overlap = if source > dest { false } else { candidate > dest };

    let mut addr_s = source;
    let mut addr_d = dest;
    let mut i = 0i32;
    while i < len {
        addr_s = source.wrapping_add(((i + s_lr) >> 1) as u16);
        let word = cpu.mmu.read_virtual(&mut cpu.regs, addr_s, s_apt)?;
        let right = (i + d_lr) & 1 != 0;
        let byte = if right { word } else { (word >> 8) & 0xff };
        addr_d = dest.wrapping_add(((i + d_lr) >> 1) as u16);
        let wm = if right { WriteMode::Lsb } else { WriteMode::Msb };
        cpu.mmu.write_virtual(&mut cpu.regs, addr_d, byte, d_apt, wm)?;
        lens -= 1;
        lend -= 1;
        i += 1;
    }
    let _ = (addr_s, addr_d);

    cpu.regs.set_a(source.wrapping_add(((len + s_lr) >> 1) as u16));
    cpu.regs.set_x(dest.wrapping_add(((len + d_lr) >> 1) as u16));

    let bit15 = (((i + d_lr) & 1) as u16) << 15;
    d &= 0xefff;
    t &= 0xcfff;
    d |= bit15;
    t |= bit15;
    d &= 0xf000;
    t &= 0xf000;
    d |= lens as u16 & 0x0fff;
    t |= lend as u16 & 0x0fff;
    cpu.regs.set_d(d);
    cpu.regs.set_t(t);

    if !overlap {
        cpu.regs.set_p(cpu.regs.p().wrapping_add(1));
    }
    ok()
}

/// `DoMOVEW`: word-granularity block move of `L` words between the virtual
/// (`PT`/`APT`) and physical address spaces, the combination selected by
/// the operand's low 4 bits. A physical endpoint requires privilege.
pub fn movew(cpu: &mut Cpu, _dispatch: &DispatchTable, operand: u16) -> StepResult {
    let displacement = operand & 0x000f;
    let mut source_address: i64 = cpu.regs.d() as i64;
    let mut dest_address: i64 = cpu.regs.t() as i64;
    let mut count = cpu.regs.l();

    let mut source_physical = false;
    let mut dest_physical = false;
    match displacement {
        2 | 5 => {
            dest_address |= (cpu.regs.x() as i64) << 16;
            dest_physical = true;
        }
        6 | 7 => {
            source_address |= (cpu.regs.a() as i64) << 16;
            source_physical = true;
        }
        8 => {
            dest_address |= (cpu.regs.x() as i64) << 16;
            dest_physical = true;
            source_address |= (cpu.regs.a() as i64) << 16;
            source_physical = true;
        }
        _ => {}
    }

    if (source_physical || dest_physical) && !check_priv(cpu) {
        return ok();
    }

    while count > 0 {
        let word = match displacement {
            0 | 1 | 2 => cpu.mmu.read_virtual(&mut cpu.regs, source_address as u16, false)?,
            3 | 4 | 5 => cpu.mmu.read_virtual(&mut cpu.regs, source_address as u16, true)?,
            6 | 7 | 8 => cpu.mmu.read_physical(&cpu.regs, source_address, true),
            _ => 0,
        };
        match displacement {
            0 | 3 | 6 => cpu.mmu.write_virtual(&mut cpu.regs, dest_address as u16, word, false, WriteMode::Word)?,
            1 | 4 | 7 => cpu.mmu.write_virtual(&mut cpu.regs, dest_address as u16, word, true, WriteMode::Word)?,
            2 | 5 | 8 => cpu.mmu.write_physical(&mut cpu.regs, dest_address, word, true),
            _ => {}
        }
        source_address = source_address.wrapping_add(1);
        dest_address = dest_address.wrapping_add(1);
        count -= 1;
    }

    cpu.regs.set_l(count);
    cpu.regs.set_d((source_address & 0xffff) as u16);
    if source_physical {
        cpu.regs.set_a(((source_address >> 16) & 0xffff) as u16);
    }
    cpu.regs.set_t((dest_address & 0xffff) as u16);
    if dest_physical {
        cpu.regs.set_x(((dest_address >> 16) & 0xffff) as u16);
    }
    ok()
}

/*************************** SEGMENT / PAGING HELPERS ***************************/

/// `calcEL`: the 24-bit "extended location" address used by `SETPT`/`CLEPT`
/// to reach physical memory directly -- `T`'s low byte is the segment, `X`
/// plus `displacement` the offset within it.
fn calc_extended_address(x: u16, t: u16, displacement: u16) -> i64 {
    let el = (x.wrapping_add(displacement)) as u32;
    let el = ((t & 0xff) as u32) << 16 | el;
    (el & 0xffffff) as i64
}

/// `ndfunc_setpt`: walks a SINTRAN-built linked list addressed by `X`
/// (each entry: next pointer, then a page descriptor pair), writing each
/// descriptor into the virtual page table slot it names, until `X` reaches
/// zero. Returns the number of entries processed in `X`.
pub fn setpt(cpu: &mut Cpu, _dispatch: &DispatchTable, _operand: u16) -> StepResult {
    if !check_priv(cpu) {
        return ok();
    }
    let mut cnt: u16 = 0;
    while cpu.regs.x() != 0 {
        let t = cpu.regs.t();
        let el = calc_extended_address(cpu.regs.x(), t, 2);
        let mut a = cpu.mmu.read_physical(&cpu.regs, el, true);
        let d = cpu.mmu.read_physical(&cpu.regs, el + 1, true);
        a &= !(1 << 0x0b); // clear bit 11
        cpu.regs.set_a(a);
        cpu.regs.set_d(d);

        let el = calc_extended_address(cpu.regs.x(), t, 1);
        let elval = cpu.mmu.read_physical(&cpu.regs, el, true);
        let b = elval.wrapping_add(elval) | 0xfe00;
        cpu.regs.set_b(b);

        cpu.mmu.write_virtual(&mut cpu.regs, b, a, true, WriteMode::Word)?;
        cpu.mmu.write_virtual(&mut cpu.regs, b.wrapping_add(1), d, true, WriteMode::Word)?;

        let el = calc_extended_address(cpu.regs.x(), cpu.regs.t(), 0);
        let next_x = cpu.mmu.read_physical(&cpu.regs, el, true);
        cpu.regs.set_x(next_x);
        cnt = cnt.wrapping_add(1);
    }
    cpu.regs.set_x(cnt);
    ok()
}

/// `ndfunc_clept`: the inverse of `setpt` -- walks the same linked list and
/// clears each page table slot that is non-zero, writing the cleared entry
/// back to the extended location the list entry names.
pub fn clept(cpu: &mut Cpu, _dispatch: &DispatchTable, _operand: u16) -> StepResult {
    if !check_priv(cpu) {
        return ok();
    }
    let mut cnt: u16 = 0;
    while cpu.regs.x() != 0 {
        let t = cpu.regs.t();
        let el = calc_extended_address(cpu.regs.x(), t, 1);
        let elval = cpu.mmu.read_physical(&cpu.regs, el, true);
        let b = elval.wrapping_add(elval) | 0xfe00;
        cpu.regs.set_b(b);

        let a = cpu.mmu.read_virtual(&mut cpu.regs, b, true)?;
        cpu.regs.set_a(a);
        if a != 0 {
            let el = calc_extended_address(cpu.regs.x(), cpu.regs.t(), 2);
            cpu.mmu.write_physical(&mut cpu.regs, el, a, true);
            cpu.mmu.write_virtual(&mut cpu.regs, b, 0, true, WriteMode::Word)?;
        }

        let el = calc_extended_address(cpu.regs.x(), cpu.regs.t(), 0);
        let next_x = cpu.mmu.read_physical(&cpu.regs, el, true);
        cpu.regs.set_x(next_x);
        cnt = cnt.wrapping_add(1);
    }
    cpu.regs.set_x(cnt);
    ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Configuration;
    use crate::dispatch::DispatchTable;

    fn test_cpu() -> (Cpu, DispatchTable) {
        let mut config = Configuration::default();
        config.memory_words = 1 << 12;
        (Cpu::new(&config), DispatchTable::new())
    }

    #[test]
    fn lda_loads_effective_address() {
        let (mut cpu, dispatch) = test_cpu();
        cpu.mmu.write_physical(&mut cpu.regs, 0x100, 0o1234, false);
        cpu.regs.set_p(1);
        cpu.regs.set_b(0x100);
        let result = lda(&mut cpu, &dispatch, 0x100);
        assert!(result.is_ok());
        assert_eq!(cpu.regs.a(), 0o1234);
    }

    #[test]
    fn add_sets_carry_on_overflow() {
        let (mut cpu, dispatch) = test_cpu();
        cpu.mmu.write_physical(&mut cpu.regs, 0x200, 1, false);
        cpu.regs.set_p(0x201);
        cpu.regs.set_a(0xffff);
        add(&mut cpu, &dispatch, 0x000).unwrap();
        assert_eq!(cpu.regs.a(), 0);
        assert!(cpu.regs.get_bit(STS, STS_C));
    }

    #[test]
    fn jaz_jumps_only_when_a_is_zero() {
        let (mut cpu, dispatch) = test_cpu();
        cpu.regs.set_p(0x11);
        cpu.regs.set_a(0);
        jaz(&mut cpu, &dispatch, 0x05).unwrap();
        assert_eq!(cpu.regs.p(), 0x15);
    }

    #[test]
    fn skp_skips_on_equal_registers() {
        let (mut cpu, dispatch) = test_cpu();
        cpu.regs.set_p(0x40);
        let level = cpu.regs.current_level();
        cpu.regs.reg[level][T] = 5;
        cpu.regs.reg[level][D] = 5;
        skp(&mut cpu, &dispatch, (6 << 3) | 1).unwrap();
        assert_eq!(cpu.regs.p(), 0x41);
    }

    #[test]
    fn shift_left_plain_shifts_t_register() {
        let (mut cpu, dispatch) = test_cpu();
        let level = cpu.regs.current_level();
        cpu.regs.reg[level][T] = 1;
        shifts(&mut cpu, &dispatch, 0b0_00_0_000001).unwrap();
        assert_eq!(cpu.regs.t(), 2);
    }

    #[test]
    fn iox_exchanges_a_with_console_data_register() {
        let (mut cpu, dispatch) = test_cpu();
        cpu.regs.set_a('Q' as u16);
        iox(&mut cpu, &dispatch, (1 << 5) | 1).unwrap();
        cpu.regs.set_a('Z' as u16);
        iox(&mut cpu, &dispatch, (1 << 5) | 1).unwrap();
        assert_eq!(cpu.regs.a(), 'Q' as u16);
    }

    #[test]
    fn tset_returns_old_value_and_sets_all_ones() {
        let (mut cpu, dispatch) = test_cpu();
        cpu.mmu.write_physical(&mut cpu.regs, 0x50, 0o1234, false);
        cpu.regs.set_t(0x50);
        tset(&mut cpu, &dispatch, 0).unwrap();
        assert_eq!(cpu.regs.a(), 0o1234);
        assert_eq!(cpu.mmu.read_physical(&cpu.regs, 0x50, false), 0xffff);
    }

    #[test]
    fn rdus_reads_the_word_addressed_by_t() {
        let (mut cpu, dispatch) = test_cpu();
        cpu.mmu.write_physical(&mut cpu.regs, 0x50, 0o4321, false);
        cpu.regs.set_t(0x50);
        rdus(&mut cpu, &dispatch, 0).unwrap();
        assert_eq!(cpu.regs.a(), 0o4321);
    }

    #[test]
    fn bfill_fills_a_byte_field_across_word_boundaries() {
        let (mut cpu, dispatch) = test_cpu();
        cpu.regs.set_a(0x41);
        cpu.regs.set_x(0x300);
        cpu.regs.set_t(4); // len=4, right=0, APT=false
        cpu.regs.set_p(10);
        bfill(&mut cpu, &dispatch, 0).unwrap();
        assert_eq!(cpu.mmu.read_virtual(&mut cpu.regs, 0x300, false).unwrap(), 0x4141);
        assert_eq!(cpu.mmu.read_virtual(&mut cpu.regs, 0x301, false).unwrap(), 0x4141);
        assert_eq!(cpu.regs.x(), 0x302);
        assert_eq!(cpu.regs.p(), 11);
    }

    #[test]
    fn movb_copies_a_byte_field_low_to_high() {
        let (mut cpu, dispatch) = test_cpu();
        cpu.mmu.write_virtual(&mut cpu.regs, 0x300, 0x4142, false, WriteMode::Word).unwrap();
        cpu.mmu.write_virtual(&mut cpu.regs, 0x301, 0x4344, false, WriteMode::Word).unwrap();
        cpu.regs.set_a(0x300); // source
        cpu.regs.set_x(0x100); // dest
        cpu.regs.set_d(4); // lens=4, s_lr=0, s_apt=false
        cpu.regs.set_t(4); // lend=4, d_lr=0, d_apt=false
        cpu.regs.set_p(10);

        movb(&mut cpu, &dispatch, 0).unwrap();

        assert_eq!(cpu.mmu.read_virtual(&mut cpu.regs, 0x100, false).unwrap(), 0x4142);
        assert_eq!(cpu.mmu.read_virtual(&mut cpu.regs, 0x101, false).unwrap(), 0x4344);
        assert_eq!(cpu.regs.d(), 0);
        assert_eq!(cpu.regs.t(), 4);
        assert_eq!(cpu.regs.a(), 0x303);
        assert_eq!(cpu.regs.x(), 0x103);
        assert_eq!(cpu.regs.p(), 11); // unconditional skip return
    }

    #[test]
    fn movbf_copies_without_overlap_and_skips() {
        let (mut cpu, dispatch) = test_cpu();
        cpu.mmu.write_virtual(&mut cpu.regs, 0x500, 0x4142, false, WriteMode::Word).unwrap();
        cpu.mmu.write_virtual(&mut cpu.regs, 0x501, 0x4344, false, WriteMode::Word).unwrap();
        cpu.regs.set_a(0x500); // source
        cpu.regs.set_x(0x100); // dest, well clear of source so no overlap
        cpu.regs.set_d(4);
        cpu.regs.set_t(4);
        cpu.regs.set_p(10);

        movbf(&mut cpu, &dispatch, 0).unwrap();

        assert_eq!(cpu.mmu.read_virtual(&mut cpu.regs, 0x100, false).unwrap(), 0x4142);
        assert_eq!(cpu.mmu.read_virtual(&mut cpu.regs, 0x101, false).unwrap(), 0x4344);
        assert_eq!(cpu.regs.d(), 0);
        assert_eq!(cpu.regs.t(), 0);
        assert_eq!(cpu.regs.a(), 0x502);
        assert_eq!(cpu.regs.x(), 0x102);
        assert_eq!(cpu.regs.p(), 11);
    }

    #[test]
    fn movew_moves_words_between_page_tables() {
        let (mut cpu, dispatch) = test_cpu();
        cpu.mmu.write_virtual(&mut cpu.regs, 0x10, 0o1111, false, WriteMode::Word).unwrap();
        cpu.mmu.write_virtual(&mut cpu.regs, 0x11, 0o2222, false, WriteMode::Word).unwrap();
        cpu.regs.set_d(0x10); // source
        cpu.regs.set_t(0x20); // dest
        cpu.regs.set_l(2); // word count
        movew(&mut cpu, &dispatch, 0).unwrap(); // displacement 0: PT to PT

        assert_eq!(cpu.mmu.read_virtual(&mut cpu.regs, 0x20, false).unwrap(), 0o1111);
        assert_eq!(cpu.mmu.read_virtual(&mut cpu.regs, 0x21, false).unwrap(), 0o2222);
        assert_eq!(cpu.regs.l(), 0);
        assert_eq!(cpu.regs.d(), 0x12);
        assert_eq!(cpu.regs.t(), 0x22);
    }

    #[test]
    fn setpt_then_clept_round_trips_a_single_page_table_entry() {
        // setpt/clept target the page-table slot range at 0xfe00+, so this
        // test needs physical memory large enough to cover it, unlike
        // test_cpu()'s small default.
        let mut config = Configuration::default();
        config.memory_words = 1 << 16;
        let mut cpu = Cpu::new(&config);
        let dispatch = DispatchTable::new();
        // One linked-list entry at physical word 0x1000: next pointer, page
        // number (used to derive the virtual page table slot), PTE high
        // word, PTE low word.
        cpu.mmu.write_physical(&mut cpu.regs, 0x1000, 0, false); // next = 0 (end of list)
        cpu.mmu.write_physical(&mut cpu.regs, 0x1001, 5, false); // page number 5
        cpu.mmu.write_physical(&mut cpu.regs, 0x1002, 0o123456, false); // PTE high
        cpu.mmu.write_physical(&mut cpu.regs, 0x1003, 0o7, false); // PTE low
        cpu.regs.set_t(0); // segment 0, so EL == X (+ displacement)
        cpu.regs.set_x(0x1000);

        setpt(&mut cpu, &dispatch, 0).unwrap();
        assert_eq!(cpu.regs.x(), 1); // one entry processed

        let slot = 5u16.wrapping_add(5) | 0xfe00;
        assert_eq!(cpu.mmu.read_virtual(&mut cpu.regs, slot, false).unwrap(), 0o123456 & !(1 << 0x0b));
        assert_eq!(cpu.mmu.read_virtual(&mut cpu.regs, slot.wrapping_add(1), false).unwrap(), 0o7);

        cpu.regs.set_t(0);
        cpu.regs.set_x(0x1000);
        clept(&mut cpu, &dispatch, 0).unwrap();
        assert_eq!(cpu.regs.x(), 1);
        assert_eq!(cpu.mmu.read_virtual(&mut cpu.regs, slot, false).unwrap(), 0);
    }
}
