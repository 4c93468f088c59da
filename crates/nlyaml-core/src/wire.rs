//! Netlink wire primitives: message framing and the typed attribute codec.
//!
//! Everything here is native-endian and 4-byte aligned, per the netlink
//! conventions. The codec never interprets key semantics; it only frames,
//! types, and lengths.

use std::borrow::Cow;
use std::fmt;

use bitflags::bitflags;
use thiserror::Error;

/// Netlink message header length.
pub const NLMSG_HDRLEN: usize = 16;
/// Generic-netlink header length (cmd, version, reserved).
pub const GENL_HDRLEN: usize = 4;
/// Attribute header length (len, type).
pub const NLA_HDRLEN: usize = 4;

/// Mask extracting the attribute slot index from its type field.
pub const NLA_TYPE_MASK: u16 = 0x3fff;
/// Type-field bit marking an attribute as a container of attributes.
pub const NLA_F_NESTED: u16 = 0x8000;

/// No-op message type.
pub const NLMSG_NOOP: u16 = 0x1;
/// Error (or ack) message type.
pub const NLMSG_ERROR: u16 = 0x2;
/// End-of-dump message type.
pub const NLMSG_DONE: u16 = 0x3;
/// First type value available to protocol families.
pub const NLMSG_MIN_TYPE: u16 = 0x10;

/// Extended-ack attribute carrying the diagnostic string.
pub const NLMSGERR_ATTR_MSG: u16 = 1;

bitflags! {
    /// Netlink message flags, restricted to the bits this protocol uses.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct MsgFlags: u16 {
        /// Message is a request.
        const REQUEST = 0x01;
        /// More messages follow in this batch.
        const MULTI = 0x02;
        /// Request an acknowledgement.
        const ACK = 0x04;
        /// Dump the whole table (ROOT | MATCH).
        const DUMP = 0x300;
        /// Message carries a key-table update rather than values.
        const CREATE = 0x400;
        /// Error reply: the original payload was capped to its header.
        const CAPPED = 0x100;
        /// Error reply: extended-ack TLVs follow the original message.
        const ACK_TLVS = 0x200;
    }
}

/// Attribute tags of the self-describing key-table protocol.
pub mod tag {
    /// Recursive key table for a nested level; also the outbound container tag.
    pub const LIST: u16 = 1;
    /// Number of sibling key slots at this level (first record only).
    pub const LIST_SIZE: u16 = 2;
    /// The key's slot index, 1-based; 0 is reserved.
    pub const INDEX: u16 = 3;
    /// Primitive type code of the key's values.
    pub const NLA_TYPE: u16 = 4;
    /// Key name, default value, or an outbound scalar.
    pub const VALUE: u16 = 5;
    /// FLOW/SEQUENCE/MAPPING bitset for container keys.
    pub const KEY_FORMAT: u16 = 6;
}

/// Primitive attribute types, with conventional netlink type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum AttrKind {
    /// Untyped; never rendered.
    Unspec = 0,
    /// Unsigned 16-bit.
    U16 = 2,
    /// Unsigned 32-bit.
    U32 = 3,
    /// Unsigned 64-bit.
    U64 = 4,
    /// Opaque string.
    String = 5,
    /// Container of further attributes.
    Nested = 8,
    /// Nul-terminated string; semantically a label.
    NulString = 10,
    /// Signed 16-bit.
    S16 = 13,
    /// Signed 32-bit.
    S32 = 14,
    /// Signed 64-bit.
    S64 = 15,
}

impl AttrKind {
    /// Map a wire type code to a kind, or `None` for codes this protocol
    /// does not carry.
    pub const fn from_code(code: u16) -> Option<Self> {
        match code {
            0 => Some(Self::Unspec),
            2 => Some(Self::U16),
            3 => Some(Self::U32),
            4 => Some(Self::U64),
            5 => Some(Self::String),
            8 => Some(Self::Nested),
            10 => Some(Self::NulString),
            13 => Some(Self::S16),
            14 => Some(Self::S32),
            15 => Some(Self::S64),
            _ => None,
        }
    }

    /// The wire type code.
    pub const fn code(self) -> u16 {
        self as u16
    }

    /// Minimum payload length a value of this kind occupies.
    const fn wire_len(self) -> usize {
        match self {
            Self::U16 | Self::S16 => 2,
            Self::U32 | Self::S32 => 4,
            Self::U64 | Self::S64 => 8,
            Self::Unspec | Self::String | Self::Nested | Self::NulString => 0,
        }
    }
}

/// Errors produced by the framing and attribute codec.
#[derive(Error, Debug)]
pub enum WireError {
    /// Fewer bytes than a header or value requires.
    #[error("truncated payload: needed {needed} bytes, have {have}")]
    Short {
        /// Bytes required.
        needed: usize,
        /// Bytes available.
        have: usize,
    },

    /// An attribute header declared an impossible length.
    #[error("attribute length {len} exceeds its enclosing payload")]
    BadAttrLength {
        /// Declared attribute length.
        len: usize,
    },

    /// The message header declared a length the buffer does not hold.
    #[error("message length {len} exceeds received {have} bytes")]
    BadMsgLength {
        /// Declared message length.
        len: usize,
        /// Bytes actually received.
        have: usize,
    },
}

fn take<const N: usize>(payload: &[u8]) -> Result<[u8; N], WireError> {
    let Some(head) = payload.get(..N) else {
        return Err(WireError::Short { needed: N, have: payload.len() });
    };
    let mut out = [0u8; N];
    out.copy_from_slice(head);
    Ok(out)
}

const fn align4(n: usize) -> usize {
    (n + 3) & !3
}

/// Parsed netlink message header.
#[derive(Debug, Clone, Copy)]
pub struct MsgHeader {
    /// Total message length, header included.
    pub len: usize,
    /// Message type: one of the control types or a family id.
    pub kind: u16,
    /// Flag bits.
    pub flags: MsgFlags,
    /// Sequence number.
    pub seq: u32,
    /// Port id of the sender.
    pub pid: u32,
}

impl MsgHeader {
    /// Parse the leading header of `msg`, validating the declared length.
    pub fn parse(msg: &[u8]) -> Result<Self, WireError> {
        let len = u32::from_ne_bytes(take::<4>(msg)?) as usize;
        let kind = u16::from_ne_bytes(take::<2>(&msg[4..])?);
        let flags = MsgFlags::from_bits_retain(u16::from_ne_bytes(take::<2>(&msg[6..])?));
        let seq = u32::from_ne_bytes(take::<4>(&msg[8..])?);
        let pid = u32::from_ne_bytes(take::<4>(&msg[12..])?);
        if len < NLMSG_HDRLEN || len > msg.len() {
            return Err(WireError::BadMsgLength { len, have: msg.len() });
        }
        Ok(Self { len, kind, flags, seq, pid })
    }
}

/// A decoded scalar value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scalar<'a> {
    /// Unsigned 16-bit.
    U16(u16),
    /// Unsigned 32-bit.
    U32(u32),
    /// Unsigned 64-bit.
    U64(u64),
    /// Signed 16-bit.
    S16(i16),
    /// Signed 32-bit.
    S32(i32),
    /// Signed 64-bit.
    S64(i64),
    /// String, trimmed of any trailing terminator.
    Str(Cow<'a, str>),
}

impl fmt::Display for Scalar<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::U16(v) => write!(f, "{v}"),
            Self::U32(v) => write!(f, "{v}"),
            Self::U64(v) => write!(f, "{v}"),
            Self::S16(v) => write!(f, "{v}"),
            Self::S32(v) => write!(f, "{v}"),
            Self::S64(v) => write!(f, "{v}"),
            Self::Str(v) => write!(f, "{v}"),
        }
    }
}

/// One framed attribute borrowed from a message payload.
#[derive(Debug, Clone, Copy)]
pub struct Attr<'a> {
    raw_type: u16,
    /// The attribute payload, header excluded, padding excluded.
    pub payload: &'a [u8],
}

impl<'a> Attr<'a> {
    /// The slot index, with the nested/byte-order bits masked off.
    pub const fn index(&self) -> u16 {
        self.raw_type & NLA_TYPE_MASK
    }

    /// Whether the type field carries the nested-container bit.
    pub const fn is_nested(&self) -> bool {
        self.raw_type & NLA_F_NESTED != 0
    }

    /// Iterate the attributes contained in this attribute's payload.
    pub const fn nested(&self) -> Attrs<'a> {
        Attrs::new(self.payload)
    }

    /// Decode the payload as `kind`.
    ///
    /// Multi-byte integers are read through byte copies, so payloads at any
    /// alignment decode correctly. Strings are borrowed when valid UTF-8.
    pub fn decode(&self, kind: AttrKind) -> Result<Scalar<'a>, WireError> {
        Ok(match kind {
            AttrKind::U16 => Scalar::U16(u16::from_ne_bytes(take::<2>(self.payload)?)),
            AttrKind::U32 => Scalar::U32(u32::from_ne_bytes(take::<4>(self.payload)?)),
            AttrKind::U64 => Scalar::U64(u64::from_ne_bytes(take::<8>(self.payload)?)),
            AttrKind::S16 => Scalar::S16(i16::from_ne_bytes(take::<2>(self.payload)?)),
            AttrKind::S32 => Scalar::S32(i32::from_ne_bytes(take::<4>(self.payload)?)),
            AttrKind::S64 => Scalar::S64(i64::from_ne_bytes(take::<8>(self.payload)?)),
            AttrKind::Unspec | AttrKind::String | AttrKind::NulString | AttrKind::Nested => {
                Scalar::Str(self.text())
            }
        })
    }

    /// The payload as text, trailing NULs trimmed, invalid UTF-8 replaced.
    pub fn text(&self) -> Cow<'a, str> {
        let mut bytes = self.payload;
        while let [head @ .., 0] = bytes {
            bytes = head;
        }
        String::from_utf8_lossy(bytes)
    }

    /// Decode an unsigned 16-bit value, the workhorse of the schema records.
    pub fn as_u16(&self) -> Result<u16, WireError> {
        Ok(u16::from_ne_bytes(take::<2>(self.payload)?))
    }
}

/// Iterator over a run of framed attributes.
///
/// Stops permanently after the first framing error; a truncated run never
/// yields partially framed attributes.
#[derive(Debug, Clone)]
pub struct Attrs<'a> {
    rest: &'a [u8],
    failed: bool,
}

impl<'a> Attrs<'a> {
    /// Iterate the attributes packed into `payload`.
    pub const fn new(payload: &'a [u8]) -> Self {
        Self { rest: payload, failed: false }
    }
}

impl<'a> Iterator for Attrs<'a> {
    type Item = Result<Attr<'a>, WireError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.rest.is_empty() {
            return None;
        }
        if self.rest.len() < NLA_HDRLEN {
            self.failed = true;
            return Some(Err(WireError::Short { needed: NLA_HDRLEN, have: self.rest.len() }));
        }
        let len = u16::from_ne_bytes([self.rest[0], self.rest[1]]) as usize;
        let raw_type = u16::from_ne_bytes([self.rest[2], self.rest[3]]);
        if len < NLA_HDRLEN || len > self.rest.len() {
            self.failed = true;
            return Some(Err(WireError::BadAttrLength { len }));
        }
        let payload = &self.rest[NLA_HDRLEN..len];
        self.rest = &self.rest[align4(len).min(self.rest.len())..];
        Some(Ok(Attr { raw_type, payload }))
    }
}

/// Verdict of checking one attribute against a parse policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyCheck {
    /// In range and plausibly typed; decode as the given kind.
    Accept(AttrKind),
    /// Out of range, untyped, or too short for its declared kind.
    Skip,
}

/// Per-slot expected-kind table for one schema level.
///
/// Slot 0 is the reserved sentinel; out-of-range and length-mismatched
/// attributes are skipped rather than failing the batch.
#[derive(Debug, Clone, Copy)]
pub struct ParsePolicy<'a> {
    slots: &'a [AttrKind],
}

impl<'a> ParsePolicy<'a> {
    /// Build a policy over `slots`, indexed by attribute slot index.
    pub const fn new(slots: &'a [AttrKind]) -> Self {
        Self { slots }
    }

    /// Check one attribute against the policy.
    pub fn check(&self, attr: &Attr<'_>) -> PolicyCheck {
        let index = attr.index() as usize;
        if index == 0 || index >= self.slots.len() {
            return PolicyCheck::Skip;
        }
        let kind = self.slots[index];
        if kind == AttrKind::Unspec || attr.payload.len() < kind.wire_len() {
            return PolicyCheck::Skip;
        }
        PolicyCheck::Accept(kind)
    }
}

/// Handle to an open nested attribute; closing back-patches its length.
#[must_use = "an open nested attribute must be closed"]
#[derive(Debug)]
pub struct NestSlot {
    offset: usize,
}

/// Incremental builder for one outgoing generic-netlink message.
///
/// The total length and each nested attribute's length are back-patched, so
/// attributes stream in without any pre-sizing.
#[derive(Debug)]
pub struct MessageBuilder {
    buf: Vec<u8>,
    attrs: usize,
}

impl MessageBuilder {
    /// Start a message addressed to `family`, stamped with the caller's
    /// identity.
    pub fn new(family: u16, flags: MsgFlags, seq: u32, pid: u32, cmd: u8, version: u8) -> Self {
        let mut buf = Vec::with_capacity(256);
        buf.extend_from_slice(&0u32.to_ne_bytes());
        buf.extend_from_slice(&family.to_ne_bytes());
        buf.extend_from_slice(&flags.bits().to_ne_bytes());
        buf.extend_from_slice(&seq.to_ne_bytes());
        buf.extend_from_slice(&pid.to_ne_bytes());
        buf.push(cmd);
        buf.push(version);
        buf.extend_from_slice(&0u16.to_ne_bytes());
        Self { buf, attrs: 0 }
    }

    fn put_attr(&mut self, attr_type: u16, payload: &[u8]) {
        debug_assert!(payload.len() + NLA_HDRLEN <= u16::MAX as usize);
        let len = (NLA_HDRLEN + payload.len()) as u16;
        self.buf.extend_from_slice(&len.to_ne_bytes());
        self.buf.extend_from_slice(&attr_type.to_ne_bytes());
        self.buf.extend_from_slice(payload);
        self.buf.resize(align4(self.buf.len()), 0);
        self.attrs += 1;
    }

    /// Append an unsigned 16-bit attribute.
    pub fn put_u16(&mut self, attr_type: u16, value: u16) {
        self.put_attr(attr_type, &value.to_ne_bytes());
    }

    /// Append an unsigned 32-bit attribute.
    pub fn put_u32(&mut self, attr_type: u16, value: u32) {
        self.put_attr(attr_type, &value.to_ne_bytes());
    }

    /// Append an unsigned 64-bit attribute.
    pub fn put_u64(&mut self, attr_type: u16, value: u64) {
        self.put_attr(attr_type, &value.to_ne_bytes());
    }

    /// Append a signed 16-bit attribute.
    pub fn put_i16(&mut self, attr_type: u16, value: i16) {
        self.put_attr(attr_type, &value.to_ne_bytes());
    }

    /// Append a signed 32-bit attribute.
    pub fn put_i32(&mut self, attr_type: u16, value: i32) {
        self.put_attr(attr_type, &value.to_ne_bytes());
    }

    /// Append a signed 64-bit attribute.
    pub fn put_i64(&mut self, attr_type: u16, value: i64) {
        self.put_attr(attr_type, &value.to_ne_bytes());
    }

    /// Append a string attribute, nul-terminated on the wire.
    pub fn put_str(&mut self, attr_type: u16, value: &str) {
        let mut payload = Vec::with_capacity(value.len() + 1);
        payload.extend_from_slice(value.as_bytes());
        payload.push(0);
        self.put_attr(attr_type, &payload);
    }

    /// Open a nested attribute; the returned slot closes it.
    pub fn begin_nested(&mut self, attr_type: u16) -> NestSlot {
        let offset = self.buf.len();
        self.buf.extend_from_slice(&0u16.to_ne_bytes());
        self.buf.extend_from_slice(&(attr_type | NLA_F_NESTED).to_ne_bytes());
        self.attrs += 1;
        NestSlot { offset }
    }

    /// Close a nested attribute, back-patching its length.
    ///
    /// Slots must close in reverse opening order.
    pub fn end_nested(&mut self, slot: NestSlot) {
        debug_assert!(self.buf.len() - slot.offset <= u16::MAX as usize);
        let len = (self.buf.len() - slot.offset) as u16;
        self.buf[slot.offset..slot.offset + 2].copy_from_slice(&len.to_ne_bytes());
    }

    /// How many attributes (nested openings included) have been appended.
    pub const fn attr_count(&self) -> usize {
        self.attrs
    }

    /// Finish the message, back-patching the total length.
    pub fn finish(mut self) -> Vec<u8> {
        debug_assert!(self.buf.len() <= u32::MAX as usize);
        let total = self.buf.len() as u32;
        self.buf[..4].copy_from_slice(&total.to_ne_bytes());
        self.buf
    }
}

/// Iterator splitting a datagram into its individual netlink messages.
///
/// Yields `(header, message_bytes)` pairs; a framing error ends the split.
#[derive(Debug, Clone)]
pub struct Messages<'a> {
    rest: &'a [u8],
    failed: bool,
}

impl<'a> Iterator for Messages<'a> {
    type Item = Result<(MsgHeader, &'a [u8]), WireError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.rest.is_empty() {
            return None;
        }
        match MsgHeader::parse(self.rest) {
            Ok(hdr) => {
                let msg = &self.rest[..hdr.len];
                self.rest = &self.rest[align4(hdr.len).min(self.rest.len())..];
                Some(Ok((hdr, msg)))
            }
            Err(err) => {
                self.failed = true;
                Some(Err(err))
            }
        }
    }
}

/// Split a datagram into its individual netlink messages.
pub const fn split_messages(datagram: &[u8]) -> Messages<'_> {
    Messages { rest: datagram, failed: false }
}
