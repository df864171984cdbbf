//! ND-100/ND-110 minicomputer core emulator library.
//!
//! `run_headless`/`run_with_debugger` are the two entry points `main.rs`
//! wires CLI flags into; everything else is exposed for integration tests
//! and for embedding the core in a larger harness.

pub mod breakpoints;
pub mod config;
mod conversions;
pub mod cpu;
pub mod debugger;
pub mod devices;
pub mod disasm;
pub mod dispatch;
pub mod error;
pub mod fields;
pub mod instructions;
pub mod loaders;
pub mod memory;
pub mod registers;
pub mod trap;
pub mod vm;

use std::fs;
use std::io::{stdin, stdout};

use config::{BootMethod, Configuration};
use error::VmError;
use vm::Vm;

/// Builds a `Vm` from `config` and loads the configured boot image, if any.
pub fn build_vm(config: &Configuration) -> Result<Vm, VmError> {
    let mut vm = Vm::new(config);
    if let Some(path) = &config.image_path {
        let data = fs::read(path)?;
        match config.boot_method {
            BootMethod::Bpun => {
                let boot = vm.load_bpun_image(&data)?;
                vm.cpu.regs.set_p(boot);
            }
            BootMethod::Aout => {
                let entry = vm.load_aout_image(&data)?;
                vm.cpu.regs.set_p(entry);
            }
            BootMethod::Bp | BootMethod::Floppy | BootMethod::Smd => {
                // Block-device boot media: no emulated controller behind
                // these yet, so the image is loaded as a flat a.out-less
                // memory dump at the configured start address instead.
                for (i, chunk) in data.chunks(2).enumerate() {
                    let word = match chunk {
                        [hi, lo] => ((*hi as u16) << 8) | *lo as u16,
                        [hi] => (*hi as u16) << 8,
                        _ => 0,
                    };
                    vm.cpu.mmu.write_physical(&mut vm.cpu.regs, i as i64, word, false);
                }
            }
        }
    }
    Ok(vm)
}

/// Runs `vm` to completion with no debugger attached.
pub fn run_headless(vm: &mut Vm) -> Result<(), VmError> {
    vm.run()
}

/// Drives `vm` through a line-oriented debugger REPL on stdin/stdout, per
/// spec §4.8. `DebugHandle` still exposes the pause/grant/release atomics
/// for a host embedding this core on a separate CPU thread; the CLI itself
/// keeps the debugger and the CPU on one thread and drives ticks directly
/// through `step`/`continue` commands.
pub fn run_with_debugger(vm: &mut Vm) -> Result<(), VmError> {
    let dispatch = std::mem::replace(&mut vm.dispatch, dispatch::DispatchTable::new());
    debugger::run_debugger(vm, &dispatch, stdin().lock(), stdout())?;
    vm.dispatch = dispatch;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_vm_without_an_image_starts_idle() {
        let mut config = Configuration::default();
        config.memory_words = 1 << 12;
        let vm = build_vm(&config).unwrap();
        assert_eq!(vm.cpu.regs.p(), 0);
    }
}
