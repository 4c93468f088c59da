//! The `AF_NETLINK` socket itself.

use std::io;
use std::mem::size_of;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};

use nlyaml_core::transport::{SocketOption, Transport, TransportError};

use crate::ctrl;

// Option numbers at SOL_NETLINK; stable kernel ABI.
const NETLINK_ADD_MEMBERSHIP: libc::c_int = 1;
const NETLINK_BROADCAST_ERROR: libc::c_int = 4;
const NETLINK_CAP_ACK: libc::c_int = 10;
const NETLINK_EXT_ACK: libc::c_int = 11;

/// One receive covers the largest dump the kernel will hand out at once.
const RECV_BUF: usize = 65536;

/// A generic-netlink socket implementing the transport seam.
///
/// Sequence checking and auto-ack are adapter-level behaviors rather than
/// socket options; streaming sessions switch them off because async events
/// arrive without request/response pairing.
#[derive(Debug)]
pub struct GenlSocket {
    fd: OwnedFd,
    pid: u32,
    seq: u32,
    seq_check: bool,
    auto_ack: bool,
}

impl GenlSocket {
    /// Open and bind a `NETLINK_GENERIC` socket, learning the port id the
    /// kernel assigned.
    pub fn open() -> Result<Self, TransportError> {
        // SAFETY: plain syscall; no memory is handed over.
        let raw = unsafe {
            libc::socket(
                libc::AF_NETLINK,
                libc::SOCK_RAW | libc::SOCK_CLOEXEC,
                libc::NETLINK_GENERIC,
            )
        };
        if raw < 0 {
            return Err(TransportError::Io(io::Error::last_os_error()));
        }
        // SAFETY: `raw` was just returned by socket() and is owned here.
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        // SAFETY: sockaddr_nl is valid all-zeroes.
        let mut addr: libc::sockaddr_nl = unsafe { std::mem::zeroed() };
        addr.nl_family = libc::AF_NETLINK as libc::sa_family_t;
        // SAFETY: addr is a properly sized sockaddr_nl on the stack.
        let rc = unsafe {
            libc::bind(
                fd.as_raw_fd(),
                std::ptr::from_ref(&addr).cast(),
                size_of::<libc::sockaddr_nl>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            return Err(TransportError::Io(io::Error::last_os_error()));
        }

        let mut len = size_of::<libc::sockaddr_nl>() as libc::socklen_t;
        // SAFETY: addr and len describe the same stack buffer.
        let rc = unsafe {
            libc::getsockname(fd.as_raw_fd(), std::ptr::from_mut(&mut addr).cast(), &mut len)
        };
        if rc < 0 {
            return Err(TransportError::Io(io::Error::last_os_error()));
        }

        Ok(Self { fd, pid: addr.nl_pid, seq: 0, seq_check: true, auto_ack: true })
    }

    /// Whether reply sequence numbers are matched against requests.
    pub const fn sequence_checking(&self) -> bool {
        self.seq_check
    }

    /// Whether received messages are acknowledged automatically.
    pub const fn auto_acknowledge(&self) -> bool {
        self.auto_ack
    }

    fn next_seq(&mut self) -> u32 {
        self.seq = self.seq.wrapping_add(1);
        self.seq
    }

    fn set_opt(&self, option: libc::c_int, value: libc::c_int) -> Result<(), TransportError> {
        // SAFETY: value lives across the call; length matches its type.
        let rc = unsafe {
            libc::setsockopt(
                self.fd.as_raw_fd(),
                libc::SOL_NETLINK,
                option,
                std::ptr::from_ref(&value).cast(),
                size_of::<libc::c_int>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            return Err(TransportError::Io(io::Error::last_os_error()));
        }
        Ok(())
    }

    /// One `GETFAMILY` round-trip against nlctrl.
    fn query_family(&mut self, name: &str) -> Result<ctrl::FamilyInfo, TransportError> {
        let seq = self.next_seq();
        let request = ctrl::family_request(name, seq, self.pid);
        self.send(&request)?;
        let reply = loop {
            match self.receive() {
                Ok(datagram) => break datagram,
                Err(TransportError::Interrupted) => {}
                Err(err) => return Err(err),
            }
        };
        ctrl::parse_family_reply(&reply, name)
    }
}

impl Transport for GenlSocket {
    fn receive(&mut self) -> Result<Vec<u8>, TransportError> {
        let mut buf = vec![0u8; RECV_BUF];
        // SAFETY: buf is live for the call and the length is its size.
        let n = unsafe {
            libc::recv(self.fd.as_raw_fd(), buf.as_mut_ptr().cast(), buf.len(), 0)
        };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Err(TransportError::Interrupted);
            }
            return Err(TransportError::Io(err));
        }
        if n == 0 {
            return Err(TransportError::Closed);
        }
        buf.truncate(n as usize);
        Ok(buf)
    }

    fn send(&mut self, msg: &[u8]) -> Result<(), TransportError> {
        // SAFETY: msg is live for the call and the length is its size.
        let n = unsafe {
            libc::send(self.fd.as_raw_fd(), msg.as_ptr().cast(), msg.len(), 0)
        };
        if n < 0 {
            return Err(TransportError::Io(io::Error::last_os_error()));
        }
        if n as usize != msg.len() {
            return Err(TransportError::BadSocket(format!(
                "short send: {n} of {} bytes",
                msg.len()
            )));
        }
        Ok(())
    }

    fn configure(&mut self, option: SocketOption, enable: bool) -> Result<(), TransportError> {
        let value = libc::c_int::from(enable);
        match option {
            SocketOption::BroadcastError => self.set_opt(NETLINK_BROADCAST_ERROR, value),
            SocketOption::ExtAck => {
                self.set_opt(NETLINK_EXT_ACK, value)?;
                self.set_opt(NETLINK_CAP_ACK, value)
            }
            SocketOption::SequenceCheck => {
                self.seq_check = enable;
                Ok(())
            }
            SocketOption::AutoAck => {
                self.auto_ack = enable;
                Ok(())
            }
        }
    }

    fn resolve_family(&mut self, name: &str) -> Result<u16, TransportError> {
        let info = self.query_family(name)?;
        if info.id == 0 {
            return Err(TransportError::NoSuchFamily(name.to_string()));
        }
        Ok(info.id)
    }

    fn resolve_group(&mut self, family: &str, group: &str) -> Result<u32, TransportError> {
        let info = self.query_family(family)?;
        info.groups
            .iter()
            .find(|(name, _)| name == group)
            .map(|&(_, id)| id)
            .ok_or_else(|| TransportError::NoSuchGroup(group.to_string()))
    }

    fn subscribe(&mut self, group: u32) -> Result<(), TransportError> {
        self.set_opt(NETLINK_ADD_MEMBERSHIP, group as libc::c_int)
    }

    fn local_pid(&self) -> u32 {
        self.pid
    }
}
