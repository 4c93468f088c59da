//! Generic-netlink socket transport.
//!
//! This crate realizes the `nlyaml-core` transport seam over a real
//! `AF_NETLINK`/`NETLINK_GENERIC` socket: open and bind, option
//! configuration, blocking receive/send, and family/multicast-group
//! resolution through the kernel's `nlctrl` controller family.
//!
//! Linux only; talking to an actual family usually needs the corresponding
//! kernel module loaded and, for some families, `CAP_NET_ADMIN`.
//!
//! ```no_run
//! use nlyaml_core::ReadSession;
//! use nlyaml_genl::GenlSocket;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let socket = GenlSocket::open()?;
//! let mut session = ReadSession::attach(socket, true)?;
//! println!("{}", session.read_to_document()?);
//! # Ok(())
//! # }
//! ```

// Raw syscalls below; the workspace denies unsafe code elsewhere.
#![allow(unsafe_code)]

mod ctrl;
mod socket;

pub use socket::GenlSocket;
