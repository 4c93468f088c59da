use anyhow::{Context, Result, anyhow};
use nlyaml_core::{ReadSession, ReplayTransport};

use crate::io::InputSource;

/// Decode command: captured netlink byte stream in, YAML document out.
pub struct DecodeCommand {
    check: bool,
}

impl DecodeCommand {
    pub const fn new(check: bool) -> Self {
        Self { check }
    }

    pub fn execute(&self, input: &InputSource) -> Result<String> {
        let transport = ReplayTransport::from_stream(input.bytes())
            .with_context(|| format!("{} is not a netlink capture", input.label()))?;
        let mut session =
            ReadSession::attach(transport, false).context("failed to wire the reader")?;

        let doc = session.read_to_document().map_err(|err| {
            match session.reader_error() {
                Some(reader) => anyhow!("{reader}"),
                None => anyhow!("{err}"),
            }
        })?;

        if self.check {
            for event in saphyr_parser::Parser::new_from_str(&doc) {
                event.map_err(|err| anyhow!("produced document failed to parse: {err}"))?;
            }
        }
        Ok(doc)
    }
}
