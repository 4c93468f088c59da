//! `nly`: transcode generic-netlink captures to and from YAML.
//!
//! # Usage
//!
//! ```bash
//! # Decode a captured dump to YAML and verify the document parses
//! nly decode --check capture.bin
//!
//! # Encode a YAML document into a framed message, as a hex dump
//! nly encode --family lnet --command 7 --hex config.yaml
//! ```

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]

use clap::Parser;

mod cli;
mod commands;
mod error;
mod io;

use cli::{Cli, Command};
use error::Failure;
use io::{InputSource, write_output};

fn main() {
    std::process::exit(run());
}

fn run() -> i32 {
    let cli = Cli::parse();
    let use_color = !cli.no_color && should_use_color();
    match execute(&cli) {
        Ok(()) => 0,
        Err(failure) => {
            eprint!("{}", failure.render(use_color));
            failure.exit_code()
        }
    }
}

fn execute(cli: &Cli) -> Result<(), Failure> {
    match &cli.command {
        Command::Decode { file, check } => {
            let input = InputSource::from_args(file.as_deref()).map_err(Failure::io)?;
            let doc = commands::decode::DecodeCommand::new(*check)
                .execute(&input)
                .map_err(Failure::decode)?;
            write_output(cli.output.as_ref(), doc.as_bytes()).map_err(Failure::io)
        }
        Command::Encode { file, family, command, version, hex } => {
            let input = InputSource::from_args(file.as_deref()).map_err(Failure::io)?;
            let bytes = commands::encode::EncodeCommand::new(family.clone(), *command, *version, *hex)
                .execute(&input)
                .map_err(Failure::encode)?;
            write_output(cli.output.as_ref(), &bytes).map_err(Failure::io)
        }
    }
}

/// Respect NO_COLOR and only color a real terminal.
fn should_use_color() -> bool {
    if std::env::var("NO_COLOR").is_ok() {
        return false;
    }
    use is_terminal::IsTerminal;
    std::io::stderr().is_terminal()
}
