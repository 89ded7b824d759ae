mod cli;
mod execute;

use clap::Parser;
use colored::Colorize;
use crate::cli::CLI;

/// Exit status of an aborted install.
const ABORT_EXIT_CODE: i32 = 1;

fn main() {
    let cli = CLI::parse();
    if let Err(err) = execute::execute(cli) {
        eprintln!("{} {err:#}", "error:".red().bold());
        std::process::exit(ABORT_EXIT_CODE);
    }
}
