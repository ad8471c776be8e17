use std::process::ExitCode;

fn main() -> ExitCode {
    sarpras_cli::run()
}
