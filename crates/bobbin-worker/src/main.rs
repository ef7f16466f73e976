use std::process::ExitCode;

use bobbin_worker::{EchoExecutor, SystemConfigLoader};

fn main() -> ExitCode {
    bobbin_worker::run(std::env::args_os().collect(), &SystemConfigLoader, EchoExecutor)
}
