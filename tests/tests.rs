use nd100vm::config::Configuration;
use nd100vm::cpu::CpuRunMode;
use nd100vm::vm::Vm;

fn test_config() -> Configuration {
    let mut config = Configuration::default();
    config.memory_words = 1 << 14;
    config
}

fn aout_image(words: &[u16], entry: u16) -> Vec<u8> {
    let mut image = Vec::new();
    image.extend_from_slice(&0o407u16.to_le_bytes()); // magic
    image.extend_from_slice(&(words.len() as u16).to_le_bytes()); // a_text
    image.extend_from_slice(&0u16.to_le_bytes()); // a_data
    image.extend_from_slice(&0u16.to_le_bytes()); // a_bss
    image.extend_from_slice(&0u16.to_le_bytes()); // a_syms
    image.extend_from_slice(&entry.to_le_bytes()); // a_entry
    image.extend_from_slice(&0u16.to_le_bytes()); // a_zp
    image.extend_from_slice(&0u16.to_le_bytes()); // a_flag
    for word in words {
        image.extend_from_slice(&word.to_le_bytes());
    }
    image
}

#[test]
fn runs_a_short_program_to_completion() {
    let mut vm = Vm::new(&test_config());
    let program = aout_image(
        &[
            0o170400 | 5,  // SAA 5
            0o172400 | 3,  // AAA 3
            0o150400,      // OPCOM
        ],
        0,
    );
    let entry = vm.load_aout_image(&program).unwrap();
    vm.cpu.regs.set_p(entry);

    vm.run().unwrap();

    assert_eq!(vm.cpu.regs.a(), 8);
    assert_eq!(vm.cpu.run_mode, CpuRunMode::Stopped);
}

#[test]
fn unconditional_jump_redirects_program_flow() {
    let mut vm = Vm::new(&test_config());
    let program = aout_image(
        &[
            0o124000 | 3, // JMP (P)+3, landing on the word at index 3
            0o170400 | 99, // SAA 99 (must be skipped)
            0o170400 | 1, // SAA 1 (must be skipped)
            0o170400 | 42, // SAA 42 (jump target)
            0o150400,     // OPCOM
        ],
        0,
    );
    let entry = vm.load_aout_image(&program).unwrap();
    vm.cpu.regs.set_p(entry);

    vm.run().unwrap();

    assert_eq!(vm.cpu.regs.a(), 42);
}

#[test]
fn breakpoint_manager_stops_the_run_loop() {
    let mut vm = Vm::new(&test_config());
    let program = aout_image(&[0o170400 | 1, 0o170400 | 2, 0o150400], 0);
    let entry = vm.load_aout_image(&program).unwrap();
    vm.cpu.regs.set_p(entry);
    vm.cpu.debugger_enabled = true;
    vm.breakpoints.add(2, nd100vm::breakpoints::BreakpointKind::User, None, None, None);

    // `tick` checks the breakpoint table against P *after* dispatching the
    // fetched instruction, so the stop fires once P has advanced onto the
    // breakpoint address, not before executing the instruction there.
    let reason = vm.cpu.tick(&vm.dispatch, &mut vm.breakpoints, &vm.watchpoints);
    assert_eq!(reason, nd100vm::breakpoints::StopReason::None);
    let reason = vm.cpu.tick(&vm.dispatch, &mut vm.breakpoints, &vm.watchpoints);
    assert_eq!(reason, nd100vm::breakpoints::StopReason::Breakpoint);
    assert_eq!(vm.cpu.regs.p(), 2);
}
