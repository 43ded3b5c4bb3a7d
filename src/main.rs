use std::process::ExitCode;

fn main() -> ExitCode {
    schedcheck::run_cli()
}
