//! Bidirectional bridge between YAML documents and generic-netlink
//! attribute streams.
//!
//! The kernel side of this protocol speaks typed, length-prefixed
//! attributes: a self-describing key table arrives first, value batches
//! follow, and the two are joined here into YAML text. Going the other way,
//! an emitted YAML document is shaped back into nested attributes with no
//! schema at all, using indentation and bracket tokens alone.
//!
//! # Reading
//!
//! ```no_run
//! use nlyaml_core::{ReadSession, ReplayTransport};
//!
//! # fn main() -> Result<(), nlyaml_core::Error> {
//! let capture = std::fs::read("dump.bin").unwrap();
//! let transport = ReplayTransport::from_stream(&capture)?;
//! let mut session = ReadSession::attach(transport, false)?;
//! println!("{}", session.read_to_document()?);
//! # Ok(())
//! # }
//! ```
//!
//! # Writing
//!
//! ```
//! use nlyaml_core::{MsgFlags, ReplayTransport, WriteSession};
//!
//! # fn main() -> Result<(), nlyaml_core::Error> {
//! let transport = ReplayTransport::permissive();
//! let mut session = WriteSession::attach(transport, "lnet", 1, 7, MsgFlags::REQUEST)?;
//! session.write_fragment("net:\n  mtu: 9000\n")?;
//! session.finish()?;
//! # Ok(())
//! # }
//! ```
//!
//! The transport seam is the [`Transport`] trait; a real generic-netlink
//! socket implementation lives in the companion `nlyaml-genl` crate.

pub mod decode;
pub mod encode;
pub mod error;
pub mod schema;
pub mod session;
pub mod transport;
pub mod wire;

pub use error::{Error, Result};
pub use schema::{KeyDescriptor, KeyFormat, SchemaError, SchemaTree};
pub use session::{ReadOutcome, ReadSession, WriteSession, YamlSink, YamlSource};
pub use transport::{ReplayTransport, SocketOption, Transport, TransportError};
pub use wire::{AttrKind, MessageBuilder, MsgFlags, Scalar, WireError};
