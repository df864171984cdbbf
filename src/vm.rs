//! `Vm`: the owning value bundling everything one emulated machine needs,
//! per spec §ADDED 5-V.
//!
//! Grounded on the teacher's `lib.rs` `Emulator` (owns a `CPU`, exposes
//! `run`/`load`) for overall shape, and on `original_source/src/cpu/cpu.c`'s
//! `cpu_run` for the tick-loop/pause-handshake sequencing.

use crate::breakpoints::{BreakpointManager, StopReason, WatchpointTable};
use crate::config::Configuration;
use crate::cpu::{Cpu, CpuRunMode};
use crate::debugger::DebugHandle;
use crate::dispatch::DispatchTable;
use crate::error::{LoadError, VmError};
use crate::loaders::{load_aout, load_bpun};

pub struct Vm {
    pub cpu: Cpu,
    pub dispatch: DispatchTable,
    pub breakpoints: BreakpointManager,
    pub watchpoints: WatchpointTable,
    pub debug: DebugHandle,
}

impl Vm {
    pub fn new(config: &Configuration) -> Self {
        Vm {
            cpu: Cpu::new(config),
            dispatch: DispatchTable::new(),
            breakpoints: BreakpointManager::new(),
            watchpoints: WatchpointTable::new(),
            debug: DebugHandle::new(),
        }
    }

    /// Returns a cloneable handle a separate debugger thread can hold
    /// without borrowing the rest of `Vm`, per spec §ADDED 5-V.
    pub fn debug_handle(&self) -> DebugHandle {
        self.debug.clone()
    }

    pub fn load_bpun_image(&mut self, data: &[u8]) -> Result<u16, LoadError> {
        load_bpun(data, &mut self.cpu.mmu, &mut self.cpu.regs)
    }

    pub fn load_aout_image(&mut self, data: &[u8]) -> Result<u16, LoadError> {
        load_aout(data, &mut self.cpu.mmu, &mut self.cpu.regs)
    }

    /// Drives the tick loop until `Shutdown` is requested via `DebugHandle`
    /// or the CPU halts (`OPCOM`/`WAIT` with interrupts off) with no
    /// debugger attached to resume it.
    pub fn run(&mut self) -> Result<(), VmError> {
        loop {
            if self.debug.run_mode() == CpuRunMode::Shutdown {
                return Ok(());
            }
            if self.debug.pause_requested() {
                self.debug.grant_control();
                while self.debug.control_granted() {
                    std::thread::sleep(std::time::Duration::from_millis(10));
                }
                if self.debug.run_mode() == CpuRunMode::Shutdown {
                    return Ok(());
                }
            }

            let reason = self.cpu.tick(&self.dispatch, &mut self.breakpoints, &self.watchpoints);
            if reason != StopReason::None {
                self.debug.set_run_mode(CpuRunMode::Breakpoint);
                if !self.cpu.debugger_enabled {
                    return Ok(());
                }
                continue;
            }
            if self.cpu.run_mode == CpuRunMode::Stopped && !self.cpu.debugger_enabled {
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_vm_starts_at_configured_entry() {
        let mut config = Configuration::default();
        config.memory_words = 1 << 12;
        config.start_address = 0o100;
        let vm = Vm::new(&config);
        assert_eq!(vm.cpu.regs.p(), 0o100);
    }

    #[test]
    fn run_halts_on_opcom_without_a_debugger() {
        let mut config = Configuration::default();
        config.memory_words = 1 << 12;
        config.start_address = 0;
        let mut vm = Vm::new(&config);
        vm.cpu.mmu.write_physical(&mut vm.cpu.regs, 0, 0o150400, false); // OPCOM
        vm.run().unwrap();
        assert_eq!(vm.cpu.run_mode, CpuRunMode::Stopped);
    }

    #[test]
    fn load_bpun_image_writes_to_physical_memory() {
        let mut config = Configuration::default();
        config.memory_words = 1 << 12;
        let mut vm = Vm::new(&config);
        let mut image = Vec::new();
        image.extend_from_slice(b"100/100!");
        image.extend_from_slice(&0o100u16.to_be_bytes());
        image.extend_from_slice(&1u16.to_be_bytes());
        image.extend_from_slice(&0o1234u16.to_be_bytes());
        image.extend_from_slice(&0u16.to_be_bytes());
        image.extend_from_slice(&0u16.to_be_bytes());
        let boot = vm.load_bpun_image(&image).unwrap();
        assert_eq!(boot, 100);
        assert_eq!(vm.cpu.mmu.read_physical(&vm.cpu.regs, 0o100, true), 0o1234);
    }
}
