//! Run a command line on the hosted kernel.
//!
//! ```text
//! usergate-run additional 10 20 62 40
//! ```
//!
//! Console I/O is the terminal; diagnostics go through `RUST_LOG`.

use std::process::ExitCode;
use std::sync::Arc;

use usergate::hosted::{Host, StdioConsole};
use usergate::{programs, KernelConfig, NullFileSystem, ProgramTable};

fn main() -> ExitCode {
    env_logger::init();

    let table = ProgramTable::new();
    programs::install(&table);

    let command_line = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    if command_line.trim().is_empty() {
        eprintln!("usage: usergate-run <program> [args...]");
        eprintln!("programs: {}", table.names().join(", "));
        return ExitCode::FAILURE;
    }

    let host = Host::boot(
        Arc::new(table),
        Arc::new(StdioConsole),
        Arc::new(NullFileSystem),
        KernelConfig::default(),
    );

    let status = host.kernel.run(&command_line);
    host.shutdown();
    log::info!("usergate v{}: {:?} finished with {}", usergate::VERSION, command_line, status);

    ExitCode::from(status as u8)
}
