//! Inbound transcoder: classifies kernel messages, caches the key table,
//! and joins it against value batches to render YAML text.
//!
//! Rendering appends to a staging buffer; the session drains staged bytes
//! into whatever buffer the YAML engine hands it, so a short read resumes at
//! the same logical position.

use crate::error::Error;
use crate::schema::{KeyDescriptor, KeyFormat, NodeId, SchemaError, SchemaTree};
use crate::wire::{
    Attr, AttrKind, Attrs, GENL_HDRLEN, MsgFlags, MsgHeader, NLMSG_DONE, NLMSG_ERROR, NLMSG_HDRLEN,
    NLMSG_NOOP, NLMSGERR_ATTR_MSG, ParsePolicy, PolicyCheck, tag,
};

/// Static spaces for indent generation via slicing.
static INDENT_SPACES: &str = "                                                                ";

/// What the stream expects after one absorbed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    /// More messages follow.
    More,
    /// The stream is complete.
    Done,
}

/// Inbound transcoder state for one session.
#[derive(Debug, Default)]
pub struct Inbound {
    schema: SchemaTree,
    staging: Vec<u8>,
    /// Group label waiting for the first real output line.
    pending_label: Option<String>,
    label_emitted: bool,
    notes: Vec<String>,
}

impl Inbound {
    /// Fresh state with no cached schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes rendered but not yet delivered.
    pub fn staged(&self) -> usize {
        self.staging.len()
    }

    /// Move up to `buf.len()` staged bytes into `buf`.
    pub fn drain_into(&mut self, buf: &mut [u8]) -> usize {
        let n = buf.len().min(self.staging.len());
        buf[..n].copy_from_slice(&self.staging[..n]);
        self.staging.drain(..n);
        n
    }

    /// Diagnostics for messages that were skipped rather than fatal.
    pub fn notes(&self) -> &[String] {
        &self.notes
    }

    /// Drop the cached schema. Called once the stream terminates.
    pub fn teardown(&mut self) {
        self.schema.clear();
    }

    /// Classify and absorb one message.
    ///
    /// Skippable errors (framing, schema shape) leave the state coherent;
    /// the caller decides whether to continue with the next message.
    pub fn absorb(&mut self, msg: &[u8]) -> Result<Control, Error> {
        let hdr = MsgHeader::parse(msg)?;
        match hdr.kind {
            NLMSG_NOOP => Ok(Control::More),
            NLMSG_DONE => self.absorb_done(&hdr, msg),
            NLMSG_ERROR => self.absorb_error(&hdr, msg),
            _ => self.absorb_data(&hdr, msg),
        }
    }

    fn absorb_done(&mut self, hdr: &MsgHeader, msg: &[u8]) -> Result<Control, Error> {
        let status = read_i32(msg, NLMSG_HDRLEN).unwrap_or(0);
        if status < 0 {
            let text = ext_ack_text(hdr, msg, NLMSG_HDRLEN + 4)
                .unwrap_or_else(|| errno_string(-status));
            return Err(Error::Terminal(text));
        }
        Ok(Control::Done)
    }

    fn absorb_error(&mut self, hdr: &MsgHeader, msg: &[u8]) -> Result<Control, Error> {
        let Some(code) = read_i32(msg, NLMSG_HDRLEN) else {
            return Err(Error::Framing("error message carries no status".to_string()));
        };
        if code == 0 {
            // Plain acknowledgement.
            return Ok(Control::Done);
        }
        // TLVs follow the echoed original message, which is capped to its
        // header when CAPPED is set.
        let echoed = if hdr.flags.contains(MsgFlags::CAPPED) {
            NLMSG_HDRLEN
        } else {
            read_i32(msg, NLMSG_HDRLEN + 4)
                .map_or(NLMSG_HDRLEN, |len| (len.max(0) as usize).max(NLMSG_HDRLEN))
        };
        let tlv_off = NLMSG_HDRLEN + 4 + ((echoed + 3) & !3);
        let text = ext_ack_text(hdr, msg, tlv_off).unwrap_or_else(|| errno_string(-code));
        Err(Error::Terminal(text))
    }

    fn absorb_data(&mut self, hdr: &MsgHeader, msg: &[u8]) -> Result<Control, Error> {
        let body_start = NLMSG_HDRLEN + GENL_HDRLEN;
        if hdr.len < body_start {
            return Err(Error::Framing("message too short for a payload".to_string()));
        }
        let payload = &msg[body_start..hdr.len];

        if hdr.flags.contains(MsgFlags::CREATE) {
            if self.schema.is_sealed() {
                self.notes
                    .push("key table update after values were seen; message skipped".to_string());
                return Ok(Control::More);
            }
            self.absorb_schema(payload)?;
            return Ok(Control::More);
        }

        let Some(root) = self.schema.root() else {
            return Err(Error::Framing("value batch before any key table".to_string()));
        };
        if !self.schema.is_sealed() {
            self.schema.seal();
        }
        let mut dash = false;
        self.render_level(root, payload, 0, 0, &mut dash)?;
        Ok(if hdr.flags.contains(MsgFlags::MULTI) { Control::More } else { Control::Done })
    }

    fn absorb_schema(&mut self, payload: &[u8]) -> Result<(), Error> {
        for attr in Attrs::new(payload) {
            let attr = attr?;
            if attr.index() == tag::LIST {
                self.schema_level(attr.payload, None)?;
            }
        }
        Ok(())
    }

    /// Absorb one level of key records, recursing into nested levels.
    fn schema_level(&mut self, list: &[u8], parent: Option<NodeId>) -> Result<NodeId, Error> {
        let mut level: Option<NodeId> = None;
        for record in Attrs::new(list) {
            let record = record?;
            let mut list_size: Option<u16> = None;
            let mut index: Option<u16> = None;
            let mut kind: Option<AttrKind> = None;
            let mut name: Option<String> = None;
            let mut default: Option<String> = None;
            let mut format = KeyFormat::empty();
            let mut child: Option<Attr<'_>> = None;

            for field in record.nested() {
                let field = field?;
                match field.index() {
                    tag::LIST => child = Some(field),
                    tag::LIST_SIZE => list_size = Some(field.as_u16()?),
                    tag::INDEX => index = Some(field.as_u16()?),
                    tag::NLA_TYPE => {
                        let code = field.as_u16()?;
                        kind = Some(AttrKind::from_code(code).ok_or_else(|| {
                            Error::Framing(format!("unknown value type code {code}"))
                        })?);
                    }
                    tag::VALUE => {
                        let text = field.text().into_owned();
                        if name.is_none() {
                            name = Some(text);
                        } else {
                            default = Some(text);
                        }
                    }
                    tag::KEY_FORMAT => format = KeyFormat::from_bits_retain(field.as_u16()?),
                    _ => {}
                }
            }

            if let Some(size) = list_size
                && level.is_none()
            {
                level = Some(self.schema.insert_node(parent, size.saturating_add(1))?);
            }
            let Some(node) = level else {
                return Err(Error::Framing("first key record carries no table size".to_string()));
            };
            if let Some(slot) = index {
                let kind = kind.ok_or_else(|| {
                    Error::Framing(format!("key record {slot} carries no value type"))
                })?;
                self.schema.set_key(
                    node,
                    KeyDescriptor {
                        index: slot,
                        name: name.unwrap_or_default(),
                        kind,
                        format,
                        default,
                    },
                )?;
            } else if kind.is_some() || name.is_some() {
                return Err(Error::Framing("key record missing mandatory index".to_string()));
            }
            if let Some(child_list) = child {
                self.schema_level(child_list.payload, Some(node))?;
            }
        }
        level.ok_or_else(|| Error::Framing("empty key table level".to_string()))
    }

    fn spaces(&mut self, mut n: usize) {
        while n > 0 {
            let chunk = n.min(INDENT_SPACES.len());
            self.staging.extend_from_slice(&INDENT_SPACES.as_bytes()[..chunk]);
            n -= chunk;
        }
    }

    /// Emit a deferred group label. Deferral keeps an empty value batch from
    /// producing any output at all.
    fn flush_label(&mut self) {
        if let Some(label) = self.pending_label.take() {
            self.staging.extend_from_slice(label.as_bytes());
            self.staging.extend_from_slice(b":\n");
            self.label_emitted = true;
        }
    }

    fn line_prefix(&mut self, indent: usize, dash: &mut bool) {
        self.flush_label();
        if *dash {
            self.spaces(indent.saturating_sub(2));
            self.staging.extend_from_slice(b"- ");
            *dash = false;
        } else {
            self.spaces(indent);
        }
    }

    /// Render one value level against its schema node, in block style.
    ///
    /// `dash` is true when the next line starts a sequence element and must
    /// wear `- ` in place of its last two indent spaces.
    fn render_level(
        &mut self,
        node: NodeId,
        payload: &[u8],
        indent: usize,
        depth: usize,
        dash: &mut bool,
    ) -> Result<(), Error> {
        let max = self.schema.max_index(node) as usize;
        let slots = self.schema.policy_for(node);
        let policy = ParsePolicy::new(&slots);

        let mut by_slot: Vec<Option<Attr<'_>>> = vec![None; max];
        for attr in Attrs::new(payload) {
            let attr = attr?;
            let i = attr.index() as usize;
            if i > 0 && i < max {
                by_slot[i] = Some(attr);
            }
        }

        let mut level_indent = indent;
        let mut nested_seen = 0usize;
        for i in 1..max as u16 {
            let Some(key) = self.schema.key(node, i).cloned() else { continue };
            match key.kind {
                AttrKind::Nested => {
                    let ordinal = nested_seen;
                    nested_seen += 1;
                    let Some(attr) = by_slot[i as usize] else { continue };
                    let child = self
                        .schema
                        .child_of(node, ordinal)
                        .ok_or(SchemaError::NoChild { ordinal })?;
                    self.line_prefix(level_indent, dash);
                    if key.format.contains(KeyFormat::FLOW) {
                        self.render_flow_container(&key, child, attr)?;
                        self.staging.push(b'\n');
                    } else {
                        self.staging.extend_from_slice(key.name.as_bytes());
                        self.staging.extend_from_slice(b":\n");
                        if key.format.contains(KeyFormat::SEQUENCE) {
                            for elem in attr.nested() {
                                let elem = elem?;
                                let mut head = true;
                                self.render_level(
                                    child,
                                    elem.payload,
                                    level_indent + 4,
                                    depth + 1,
                                    &mut head,
                                )?;
                            }
                        } else {
                            let mut plain = false;
                            self.render_level(
                                child,
                                attr.payload,
                                level_indent + 2,
                                depth + 1,
                                &mut plain,
                            )?;
                        }
                    }
                }
                AttrKind::NulString if depth == 0 && i == 1 => {
                    // The slot names the group, it is not a data key.
                    if let Some(attr) = by_slot[1] {
                        let text = attr.text().into_owned();
                        self.schema.replace_key_name(node, 1, &text);
                        if !self.label_emitted {
                            self.pending_label = Some(text);
                        }
                    } else if !self.label_emitted {
                        self.pending_label = Some(key.name.clone());
                    }
                    level_indent = indent + 2;
                }
                _ => {
                    let rendered = match by_slot[i as usize] {
                        Some(attr) => match policy.check(&attr) {
                            PolicyCheck::Accept(kind) => Some(attr.decode(kind)?.to_string()),
                            PolicyCheck::Skip => key.default.clone(),
                        },
                        None => key.default.clone(),
                    };
                    let Some(value) = rendered else { continue };
                    self.line_prefix(level_indent, dash);
                    self.staging.extend_from_slice(key.name.as_bytes());
                    self.staging.extend_from_slice(b": ");
                    self.staging.extend_from_slice(value.as_bytes());
                    self.staging.push(b'\n');
                }
            }
        }
        Ok(())
    }

    /// Render `key: { ... }` or `key: [ ... ]` and everything below it on
    /// one line. Flow propagates to all descendants.
    fn render_flow_container(
        &mut self,
        key: &KeyDescriptor,
        child: NodeId,
        attr: Attr<'_>,
    ) -> Result<(), Error> {
        let sequence = key.format.contains(KeyFormat::SEQUENCE);
        self.staging.extend_from_slice(key.name.as_bytes());
        self.staging.extend_from_slice(if sequence { b": [ " } else { b": { " });
        if sequence {
            for elem in attr.nested() {
                let elem = elem?;
                self.render_flow_level(child, elem.payload)?;
            }
        } else {
            self.render_flow_level(child, attr.payload)?;
        }
        self.close_flow(if sequence { b']' } else { b'}' });
        Ok(())
    }

    fn render_flow_level(&mut self, node: NodeId, payload: &[u8]) -> Result<(), Error> {
        let max = self.schema.max_index(node) as usize;
        let slots = self.schema.policy_for(node);
        let policy = ParsePolicy::new(&slots);

        let mut by_slot: Vec<Option<Attr<'_>>> = vec![None; max];
        for attr in Attrs::new(payload) {
            let attr = attr?;
            let i = attr.index() as usize;
            if i > 0 && i < max {
                by_slot[i] = Some(attr);
            }
        }

        let mut nested_seen = 0usize;
        for i in 1..max as u16 {
            let Some(key) = self.schema.key(node, i).cloned() else { continue };
            if key.kind == AttrKind::Nested {
                let ordinal = nested_seen;
                nested_seen += 1;
                let Some(attr) = by_slot[i as usize] else { continue };
                let child = self
                    .schema
                    .child_of(node, ordinal)
                    .ok_or(SchemaError::NoChild { ordinal })?;
                self.render_flow_container(&key, child, attr)?;
                self.staging.extend_from_slice(b", ");
            } else {
                let rendered = match by_slot[i as usize] {
                    Some(attr) => match policy.check(&attr) {
                        PolicyCheck::Accept(kind) => Some(attr.decode(kind)?.to_string()),
                        PolicyCheck::Skip => key.default.clone(),
                    },
                    None => key.default.clone(),
                };
                let Some(value) = rendered else { continue };
                self.staging.extend_from_slice(key.name.as_bytes());
                self.staging.extend_from_slice(b": ");
                self.staging.extend_from_slice(value.as_bytes());
                self.staging.extend_from_slice(b", ");
            }
        }
        Ok(())
    }

    /// Close a flow container: the trailing `, ` of the last entry collapses
    /// into ` }` / ` ]`.
    fn close_flow(&mut self, bracket: u8) {
        if self.staging.ends_with(b", ") {
            self.staging.truncate(self.staging.len() - 2);
            self.staging.push(b' ');
        }
        self.staging.push(bracket);
    }
}

fn read_i32(msg: &[u8], offset: usize) -> Option<i32> {
    let bytes = msg.get(offset..offset + 4)?;
    Some(i32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Extended-ack diagnostic text, when the terminal message carries TLVs.
fn ext_ack_text(hdr: &MsgHeader, msg: &[u8], tlv_off: usize) -> Option<String> {
    if !hdr.flags.contains(MsgFlags::ACK_TLVS) || tlv_off >= hdr.len {
        return None;
    }
    for attr in Attrs::new(&msg[tlv_off..hdr.len]) {
        let Ok(attr) = attr else { return None };
        if attr.index() == NLMSGERR_ATTR_MSG {
            return Some(attr.text().into_owned());
        }
    }
    None
}

fn errno_string(code: i32) -> String {
    std::io::Error::from_raw_os_error(code).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::MessageBuilder;

    const FAMILY: u16 = 0x1c;

    fn drain_all(inbound: &mut Inbound) -> String {
        let mut buf = vec![0u8; 4096];
        let n = inbound.drain_into(&mut buf);
        String::from_utf8(buf[..n].to_vec()).unwrap()
    }

    /// Schema with a root label `net` and one u32 key `mtu`.
    fn scalar_schema() -> Vec<u8> {
        let mut b = MessageBuilder::new(FAMILY, MsgFlags::CREATE, 1, 0, 1, 1);
        let list = b.begin_nested(tag::LIST);
        let rec = b.begin_nested(1);
        b.put_u16(tag::LIST_SIZE, 2);
        b.put_u16(tag::INDEX, 1);
        b.put_u16(tag::NLA_TYPE, AttrKind::NulString.code());
        b.put_str(tag::VALUE, "net");
        b.put_u16(tag::KEY_FORMAT, KeyFormat::MAPPING.bits());
        b.end_nested(rec);
        let rec = b.begin_nested(2);
        b.put_u16(tag::INDEX, 2);
        b.put_u16(tag::NLA_TYPE, AttrKind::U32.code());
        b.put_str(tag::VALUE, "mtu");
        b.end_nested(rec);
        b.end_nested(list);
        b.finish()
    }

    fn value_batch(flags: MsgFlags, fill: impl FnOnce(&mut MessageBuilder)) -> Vec<u8> {
        let mut b = MessageBuilder::new(FAMILY, flags, 2, 0, 1, 1);
        fill(&mut b);
        b.finish()
    }

    #[test]
    fn test_scalar_echo() {
        let mut inbound = Inbound::new();
        assert_eq!(inbound.absorb(&scalar_schema()).unwrap(), Control::More);
        let values = value_batch(MsgFlags::empty(), |b| b.put_u32(2, 9000));
        assert_eq!(inbound.absorb(&values).unwrap(), Control::Done);
        assert_eq!(drain_all(&mut inbound), "net:\n  mtu: 9000\n");
    }

    #[test]
    fn test_empty_value_batch_renders_nothing() {
        let mut inbound = Inbound::new();
        inbound.absorb(&scalar_schema()).unwrap();
        let values = value_batch(MsgFlags::empty(), |_| {});
        assert_eq!(inbound.absorb(&values).unwrap(), Control::Done);
        assert_eq!(inbound.staged(), 0);
    }

    #[test]
    fn test_label_emitted_once_across_batches() {
        let mut inbound = Inbound::new();
        inbound.absorb(&scalar_schema()).unwrap();
        let first = value_batch(MsgFlags::MULTI, |b| b.put_u32(2, 1500));
        let second = value_batch(MsgFlags::MULTI, |b| b.put_u32(2, 9000));
        inbound.absorb(&first).unwrap();
        inbound.absorb(&second).unwrap();
        assert_eq!(drain_all(&mut inbound), "net:\n  mtu: 1500\n  mtu: 9000\n");
    }

    #[test]
    fn test_label_value_attribute_renames_group() {
        let mut inbound = Inbound::new();
        inbound.absorb(&scalar_schema()).unwrap();
        let values = value_batch(MsgFlags::empty(), |b| {
            b.put_str(1, "ip2nets");
            b.put_u32(2, 9000);
        });
        inbound.absorb(&values).unwrap();
        assert_eq!(drain_all(&mut inbound), "ip2nets:\n  mtu: 9000\n");
    }

    #[test]
    fn test_sentinel_slot_attribute_ignored() {
        let mut inbound = Inbound::new();
        inbound.absorb(&scalar_schema()).unwrap();
        let values = value_batch(MsgFlags::empty(), |b| {
            b.put_u32(0, 77);
            b.put_u32(2, 9000);
        });
        inbound.absorb(&values).unwrap();
        assert_eq!(drain_all(&mut inbound), "net:\n  mtu: 9000\n");
    }

    #[test]
    fn test_scalar_default_fills_absent_value() {
        let mut b = MessageBuilder::new(FAMILY, MsgFlags::CREATE, 1, 0, 1, 1);
        let list = b.begin_nested(tag::LIST);
        let rec = b.begin_nested(1);
        b.put_u16(tag::LIST_SIZE, 1);
        b.put_u16(tag::INDEX, 1);
        b.put_u16(tag::NLA_TYPE, AttrKind::String.code());
        b.put_str(tag::VALUE, "status");
        b.put_str(tag::VALUE, "up");
        b.end_nested(rec);
        b.end_nested(list);
        let schema = b.finish();

        let mut inbound = Inbound::new();
        inbound.absorb(&schema).unwrap();
        let values = value_batch(MsgFlags::empty(), |_| {});
        inbound.absorb(&values).unwrap();
        assert_eq!(drain_all(&mut inbound), "status: up\n");
    }

    #[test]
    fn test_schema_after_values_is_skipped_with_note() {
        let mut inbound = Inbound::new();
        inbound.absorb(&scalar_schema()).unwrap();
        let values = value_batch(MsgFlags::MULTI, |b| b.put_u32(2, 9000));
        inbound.absorb(&values).unwrap();
        assert_eq!(inbound.absorb(&scalar_schema()).unwrap(), Control::More);
        assert_eq!(inbound.notes().len(), 1);
    }

    #[test]
    fn test_value_batch_without_schema_is_framing_error() {
        let mut inbound = Inbound::new();
        let values = value_batch(MsgFlags::empty(), |b| b.put_u32(2, 9000));
        let err = inbound.absorb(&values).unwrap_err();
        assert!(err.is_skip());
    }

    #[test]
    fn test_error_message_prefers_ext_ack_text() {
        let mut raw = Vec::new();
        let total: u32 = (NLMSG_HDRLEN + 4 + NLMSG_HDRLEN + 12) as u32;
        raw.extend_from_slice(&total.to_ne_bytes());
        raw.extend_from_slice(&NLMSG_ERROR.to_ne_bytes());
        raw.extend_from_slice(
            &(MsgFlags::CAPPED | MsgFlags::ACK_TLVS).bits().to_ne_bytes(),
        );
        raw.extend_from_slice(&2u32.to_ne_bytes());
        raw.extend_from_slice(&0u32.to_ne_bytes());
        raw.extend_from_slice(&(-22i32).to_ne_bytes());
        // Echoed (capped) original header.
        raw.extend_from_slice(&[0u8; NLMSG_HDRLEN]);
        // NLMSGERR_ATTR_MSG = "bad nid\0" (12 bytes framed).
        raw.extend_from_slice(&12u16.to_ne_bytes());
        raw.extend_from_slice(&NLMSGERR_ATTR_MSG.to_ne_bytes());
        raw.extend_from_slice(b"bad nid\0");

        let mut inbound = Inbound::new();
        let err = inbound.absorb(&raw).unwrap_err();
        assert_eq!(err.to_string(), "bad nid");
    }

    #[test]
    fn test_error_message_without_tlvs_uses_errno() {
        let mut raw = Vec::new();
        let total: u32 = (NLMSG_HDRLEN + 4 + NLMSG_HDRLEN) as u32;
        raw.extend_from_slice(&total.to_ne_bytes());
        raw.extend_from_slice(&NLMSG_ERROR.to_ne_bytes());
        raw.extend_from_slice(&MsgFlags::CAPPED.bits().to_ne_bytes());
        raw.extend_from_slice(&2u32.to_ne_bytes());
        raw.extend_from_slice(&0u32.to_ne_bytes());
        raw.extend_from_slice(&(-22i32).to_ne_bytes());
        raw.extend_from_slice(&[0u8; NLMSG_HDRLEN]);

        let mut inbound = Inbound::new();
        let err = inbound.absorb(&raw).unwrap_err();
        assert!(matches!(err, Error::Terminal(_)));
        assert!(err.to_string().contains("22") || err.to_string().to_lowercase().contains("invalid"));
    }

    #[test]
    fn test_ack_terminates_stream() {
        let mut raw = Vec::new();
        let total: u32 = (NLMSG_HDRLEN + 4 + NLMSG_HDRLEN) as u32;
        raw.extend_from_slice(&total.to_ne_bytes());
        raw.extend_from_slice(&NLMSG_ERROR.to_ne_bytes());
        raw.extend_from_slice(&0u16.to_ne_bytes());
        raw.extend_from_slice(&2u32.to_ne_bytes());
        raw.extend_from_slice(&0u32.to_ne_bytes());
        raw.extend_from_slice(&0i32.to_ne_bytes());
        raw.extend_from_slice(&[0u8; NLMSG_HDRLEN]);

        let mut inbound = Inbound::new();
        assert_eq!(inbound.absorb(&raw).unwrap(), Control::Done);
    }

    #[test]
    fn test_done_with_negative_status_is_terminal() {
        let mut raw = Vec::new();
        let total: u32 = (NLMSG_HDRLEN + 4) as u32;
        raw.extend_from_slice(&total.to_ne_bytes());
        raw.extend_from_slice(&NLMSG_DONE.to_ne_bytes());
        raw.extend_from_slice(&MsgFlags::MULTI.bits().to_ne_bytes());
        raw.extend_from_slice(&2u32.to_ne_bytes());
        raw.extend_from_slice(&0u32.to_ne_bytes());
        raw.extend_from_slice(&(-5i32).to_ne_bytes());

        let mut inbound = Inbound::new();
        assert!(matches!(inbound.absorb(&raw).unwrap_err(), Error::Terminal(_)));
    }
}
