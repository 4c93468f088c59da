use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Transcode generic-netlink captures to and from YAML
#[derive(Parser, Debug)]
#[command(
    name = "nly",
    about = "Transcode generic-netlink captures to and from YAML",
    version,
    author,
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Output file (default: stdout)
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Decode a captured netlink byte stream into a YAML document
    Decode {
        /// Capture file (default: stdin)
        file: Option<PathBuf>,

        /// Re-parse the produced document with a conforming YAML engine
        #[arg(long)]
        check: bool,
    },

    /// Encode a YAML document into one framed netlink message
    Encode {
        /// YAML file (default: stdin)
        file: Option<PathBuf>,

        /// Generic family name stamped into the message header
        #[arg(long, default_value = "lnet")]
        family: String,

        /// Command id within the family
        #[arg(long, default_value = "1")]
        command: u8,

        /// Protocol version within the family
        #[arg(long, default_value = "1")]
        version: u8,

        /// Emit a hex dump instead of raw message bytes
        #[arg(long)]
        hex: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
