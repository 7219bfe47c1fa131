//! Entry point: parse the CLI, configure logging, hand off to the driver,
//! and translate its result into a process exit code — the same shape as
//! the teacher's `fn main()`, just pointed at `driver::run` instead of a
//! subcommand dispatch.

mod cache;
mod command_file;
mod config;
mod dependable;
mod directive;
mod directory;
mod driver;
mod engine;
mod error;
mod filename;
mod glob;
mod project;
mod scope;
mod tree;

use clap::Parser;

fn main() {
    let cli = config::Cli::parse();

    match driver::run(cli) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    }
}
