use anyhow::{Context, Result};
use nlyaml_core::{MsgFlags, ReplayTransport, WriteSession};

use crate::io::InputSource;

/// Encode command: YAML document in, one framed netlink message out.
///
/// Encoding is offline: the message is captured rather than sent, so any
/// multicast group the document names resolves permissively.
pub struct EncodeCommand {
    family: String,
    command: u8,
    version: u8,
    hex: bool,
}

impl EncodeCommand {
    pub const fn new(family: String, command: u8, version: u8, hex: bool) -> Self {
        Self { family, command, version, hex }
    }

    pub fn execute(&self, input: &InputSource) -> Result<Vec<u8>> {
        let text = input.text()?;
        let transport = ReplayTransport::permissive();
        let mut session =
            WriteSession::attach(transport, &self.family, self.version, self.command, MsgFlags::REQUEST)
                .context("failed to wire the writer")?;

        session
            .write_fragment(text)
            .and_then(|()| session.finish())
            .with_context(|| format!("failed to encode {}", input.label()))?;

        let transport = session.into_transport();
        let msg = transport.sent().first().context("no message was produced")?.clone();

        if self.hex {
            Ok(hex_dump(&msg).into_bytes())
        } else {
            Ok(msg)
        }
    }
}

/// Sixteen bytes per line with an offset column.
fn hex_dump(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 4);
    for (i, chunk) in bytes.chunks(16).enumerate() {
        let _ = write!(out, "{:08x} ", i * 16);
        for byte in chunk {
            let _ = write!(out, " {byte:02x}");
        }
        out.push('\n');
    }
    out
}
