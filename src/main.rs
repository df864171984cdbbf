use clap::Parser;
use log::info;

use nd100vm::config::Cli;
use nd100vm::{build_vm, run_headless, run_with_debugger};

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let config = match cli.into_configuration() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {}", err);
            std::process::exit(1);
        }
    };

    let mut vm = match build_vm(&config) {
        Ok(vm) => vm,
        Err(err) => {
            eprintln!("failed to start: {}", err);
            std::process::exit(1);
        }
    };

    info!("starting at P={:06o}", vm.cpu.regs.p());

    let result = if config.debugger_enabled {
        run_with_debugger(&mut vm)
    } else {
        run_headless(&mut vm)
    };

    if let Err(err) = result {
        eprintln!("runtime error: {}", err);
        std::process::exit(1);
    }
}
