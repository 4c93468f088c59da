//! Session-level error type and reporting helpers.

use std::io::Write;

use thiserror::Error;

use crate::schema::SchemaError;
use crate::transport::TransportError;
use crate::wire::WireError;

/// Errors surfaced by a transcoding session.
///
/// Framing-level problems (`Wire`, `Schema`, `Framing`) cause the offending
/// inbound message to be skipped; everything else is final for the session.
#[derive(Error, Debug)]
pub enum Error {
    /// A message or attribute run could not be parsed.
    #[error(transparent)]
    Wire(#[from] WireError),

    /// The key table was malformed or violated a structural invariant.
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// Protocol-level framing problem outside the byte codec.
    #[error("malformed message: {0}")]
    Framing(String),

    /// The transport failed underneath the session.
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),

    /// The kernel reported an error in the terminal message. The payload is
    /// the extended-ack text when present, otherwise the system error string.
    #[error("{0}")]
    Terminal(String),

    /// Session wiring failed while configuring the transport.
    #[error("failed to configure {stage}: {source}")]
    Attach {
        /// Which wiring step failed.
        stage: &'static str,
        /// The underlying transport error.
        source: TransportError,
    },

    /// The emitted document names a multicast group the family does not expose.
    #[error("multicast group '{0}' does not exist in this family")]
    UnknownGroup(String),

    /// The emitted document names no multicast group at all.
    #[error("document names no multicast group")]
    NoGroup,

    /// A line contained an unterminated quoted segment.
    #[error("unbalanced quotes in '{0}'")]
    UnbalancedQuotes(String),

    /// The session already failed; the original diagnostic is replayed.
    #[error("{0}")]
    Failed(String),
}

impl Error {
    /// Whether the error skips one inbound message instead of ending the
    /// session.
    pub(crate) const fn is_skip(&self) -> bool {
        matches!(self, Self::Wire(_) | Self::Schema(_) | Self::Framing(_))
    }
}

/// Result alias for session operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Write a diagnostic line for `message` plus its cause chain.
///
/// Causes indent one step per level, so the visual depth is the chain depth.
pub fn write_error_chain<W: Write>(
    out: &mut W,
    context: &str,
    message: &str,
    source: Option<&dyn std::error::Error>,
) -> std::io::Result<()> {
    if context.is_empty() {
        writeln!(out, "error: {message}")?;
    } else {
        writeln!(out, "error: {context}: {message}")?;
    }

    let mut cause = source;
    let mut pad = 2usize;
    while let Some(err) = cause {
        writeln!(out, "{:pad$}cause: {err}", "")?;
        cause = err.source();
        pad += 2;
    }
    Ok(())
}
