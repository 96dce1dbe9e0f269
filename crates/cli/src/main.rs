use std::process::ExitCode;

fn main() -> ExitCode {
    bridgeway_cli::run()
}
