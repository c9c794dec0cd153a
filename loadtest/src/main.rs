use std::process::ExitCode;

fn main() -> anyhow::Result<ExitCode> {
    loadtest::cli::execute()
}
