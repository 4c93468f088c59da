//! The narrow transport seam between a session and the socket layer, plus a
//! replay transport for tests and offline tooling.

use std::collections::{HashMap, VecDeque};

use thiserror::Error;

use crate::wire::split_messages;

/// Socket behaviors a session toggles while wiring itself up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketOption {
    /// Deliver multicast errors to this socket.
    BroadcastError,
    /// Request extended-ack diagnostics on error replies.
    ExtAck,
    /// Match reply sequence numbers against requests.
    SequenceCheck,
    /// Acknowledge every received message automatically.
    AutoAck,
}

/// Errors surfaced by a transport adapter.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The blocking receive was interrupted; benign, the caller may retry.
    #[error("receive interrupted")]
    Interrupted,

    /// The peer closed, or a replay ran out of recorded traffic.
    #[error("transport closed")]
    Closed,

    /// The handle is not usable as a netlink socket.
    #[error("invalid transport handle: {0}")]
    BadSocket(String),

    /// A system-level send/receive failure.
    #[error("system error: {0}")]
    Io(#[from] std::io::Error),

    /// The named generic family is not registered.
    #[error("generic family '{0}' not found")]
    NoSuchFamily(String),

    /// The named multicast group is not exposed by the family.
    #[error("multicast group '{0}' not found")]
    NoSuchGroup(String),
}

/// The transport seam.
///
/// Implementations are synchronous; `receive` blocks until a datagram
/// arrives or the call is interrupted. A session owns its transport
/// exclusively.
pub trait Transport {
    /// Block until one datagram (possibly holding several messages) arrives.
    fn receive(&mut self) -> Result<Vec<u8>, TransportError>;

    /// Send one framed message.
    fn send(&mut self, msg: &[u8]) -> Result<(), TransportError>;

    /// Toggle a socket behavior.
    fn configure(&mut self, option: SocketOption, enable: bool) -> Result<(), TransportError>;

    /// Resolve a generic family name to its numeric id.
    fn resolve_family(&mut self, name: &str) -> Result<u16, TransportError>;

    /// Resolve a multicast group name within a family.
    fn resolve_group(&mut self, family: &str, group: &str) -> Result<u32, TransportError>;

    /// Join a multicast group by id.
    fn subscribe(&mut self, group: u32) -> Result<(), TransportError>;

    /// The local port id messages are stamped with.
    fn local_pid(&self) -> u32;
}

/// One scripted receive event.
#[derive(Debug, Clone)]
enum Event {
    Datagram(Vec<u8>),
    Interrupt,
}

/// Scripted transport: replays recorded datagrams, captures sends, and
/// serves a canned name table.
///
/// `permissive` mode resolves any family or group, which is what the offline
/// encoder wants.
#[derive(Debug, Default)]
pub struct ReplayTransport {
    incoming: VecDeque<Event>,
    sent: Vec<Vec<u8>>,
    families: HashMap<String, u16>,
    groups: HashMap<String, u32>,
    subscribed: Vec<u32>,
    options: Vec<(SocketOption, bool)>,
    permissive: bool,
    pid: u32,
}

impl ReplayTransport {
    /// An empty transport that resolves nothing.
    pub fn new() -> Self {
        Self { pid: 0x1000, ..Self::default() }
    }

    /// A transport that resolves any family and group; used for offline
    /// encoding where nothing is actually addressed.
    pub fn permissive() -> Self {
        Self { permissive: true, ..Self::new() }
    }

    /// Replay a captured byte stream, one message per datagram.
    pub fn from_stream(stream: &[u8]) -> Result<Self, TransportError> {
        let mut transport = Self::new();
        for msg in split_messages(stream) {
            let (_, bytes) =
                msg.map_err(|err| TransportError::BadSocket(err.to_string()))?;
            transport.incoming.push_back(Event::Datagram(bytes.to_vec()));
        }
        Ok(transport)
    }

    /// Queue one datagram for a later `receive`.
    pub fn queue_datagram(&mut self, bytes: Vec<u8>) -> &mut Self {
        self.incoming.push_back(Event::Datagram(bytes));
        self
    }

    /// Queue an interrupt for a later `receive`.
    pub fn queue_interrupt(&mut self) -> &mut Self {
        self.incoming.push_back(Event::Interrupt);
        self
    }

    /// Register a resolvable family.
    #[must_use]
    pub fn with_family(mut self, name: &str, id: u16) -> Self {
        self.families.insert(name.to_string(), id);
        self
    }

    /// Register a resolvable multicast group.
    #[must_use]
    pub fn with_group(mut self, name: &str, id: u32) -> Self {
        self.groups.insert(name.to_string(), id);
        self
    }

    /// Everything sent through this transport, in order.
    pub fn sent(&self) -> &[Vec<u8>] {
        &self.sent
    }

    /// Group ids joined through this transport.
    pub fn subscriptions(&self) -> &[u32] {
        &self.subscribed
    }

    /// The configure calls seen, in order.
    pub fn configured(&self) -> &[(SocketOption, bool)] {
        &self.options
    }
}

impl Transport for ReplayTransport {
    fn receive(&mut self) -> Result<Vec<u8>, TransportError> {
        match self.incoming.pop_front() {
            Some(Event::Datagram(bytes)) => Ok(bytes),
            Some(Event::Interrupt) => Err(TransportError::Interrupted),
            None => Err(TransportError::Closed),
        }
    }

    fn send(&mut self, msg: &[u8]) -> Result<(), TransportError> {
        self.sent.push(msg.to_vec());
        Ok(())
    }

    fn configure(&mut self, option: SocketOption, enable: bool) -> Result<(), TransportError> {
        self.options.push((option, enable));
        Ok(())
    }

    fn resolve_family(&mut self, name: &str) -> Result<u16, TransportError> {
        match self.families.get(name) {
            Some(&id) => Ok(id),
            None if self.permissive => Ok(0x1c),
            None => Err(TransportError::NoSuchFamily(name.to_string())),
        }
    }

    fn resolve_group(&mut self, _family: &str, group: &str) -> Result<u32, TransportError> {
        match self.groups.get(group) {
            Some(&id) => Ok(id),
            None if self.permissive => Ok(1),
            None => Err(TransportError::NoSuchGroup(group.to_string())),
        }
    }

    fn subscribe(&mut self, group: u32) -> Result<(), TransportError> {
        self.subscribed.push(group);
        Ok(())
    }

    fn local_pid(&self) -> u32 {
        self.pid
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{MessageBuilder, MsgFlags};

    #[test]
    fn test_replay_order_and_exhaustion() {
        let mut t = ReplayTransport::new();
        t.queue_datagram(vec![1]).queue_interrupt().queue_datagram(vec![2]);
        assert_eq!(t.receive().unwrap(), vec![1]);
        assert!(matches!(t.receive(), Err(TransportError::Interrupted)));
        assert_eq!(t.receive().unwrap(), vec![2]);
        assert!(matches!(t.receive(), Err(TransportError::Closed)));
    }

    #[test]
    fn test_from_stream_splits_on_framing() {
        let one = MessageBuilder::new(0x1c, MsgFlags::MULTI, 1, 0, 1, 1).finish();
        let two = MessageBuilder::new(0x1c, MsgFlags::empty(), 2, 0, 1, 1).finish();
        let mut stream = one.clone();
        stream.extend_from_slice(&two);

        let mut t = ReplayTransport::from_stream(&stream).unwrap();
        assert_eq!(t.receive().unwrap(), one);
        assert_eq!(t.receive().unwrap(), two);
    }

    #[test]
    fn test_name_resolution() {
        let mut t = ReplayTransport::new().with_family("lnet", 0x1c).with_group("net", 5);
        assert_eq!(t.resolve_family("lnet").unwrap(), 0x1c);
        assert_eq!(t.resolve_group("lnet", "net").unwrap(), 5);
        assert!(matches!(
            t.resolve_group("lnet", "router"),
            Err(TransportError::NoSuchGroup(_))
        ));
    }

    #[test]
    fn test_permissive_resolution() {
        let mut t = ReplayTransport::permissive();
        assert!(t.resolve_family("anything").is_ok());
        assert!(t.resolve_group("anything", "at-all").is_ok());
    }
}
