mod cli;
mod jq_exec;

use std::process::ExitCode;

use colored::Colorize;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    let command_line_interface = cli::CommandLineInterface::load();

    let default_filter = match command_line_interface.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .with_writer(std::io::stderr)
        .init();

    match command_line_interface.run() {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(error) => {
            eprintln!("{} {error:#}", "error:".red().bold());
            ExitCode::from(2)
        }
    }
}
