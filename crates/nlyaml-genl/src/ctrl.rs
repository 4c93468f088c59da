//! Requests against the `nlctrl` controller family: family-id lookup and
//! multicast-group enumeration, framed and parsed with the core codec.

use nlyaml_core::transport::TransportError;
use nlyaml_core::wire::{
    Attrs, GENL_HDRLEN, MessageBuilder, MsgFlags, NLMSG_ERROR, NLMSG_HDRLEN, split_messages,
};

/// The controller's own family id is fixed.
pub(crate) const GENL_ID_CTRL: u16 = 0x10;

const CTRL_CMD_GETFAMILY: u8 = 3;
const CTRL_VERSION: u8 = 1;

const CTRL_ATTR_FAMILY_ID: u16 = 1;
const CTRL_ATTR_FAMILY_NAME: u16 = 2;
const CTRL_ATTR_MCAST_GROUPS: u16 = 7;

const CTRL_ATTR_MCAST_GRP_NAME: u16 = 1;
const CTRL_ATTR_MCAST_GRP_ID: u16 = 2;

/// What a `GETFAMILY` reply tells us.
#[derive(Debug, Default)]
pub(crate) struct FamilyInfo {
    pub id: u16,
    pub groups: Vec<(String, u32)>,
}

/// Frame a `GETFAMILY` request for `name`.
pub(crate) fn family_request(name: &str, seq: u32, pid: u32) -> Vec<u8> {
    let mut b = MessageBuilder::new(
        GENL_ID_CTRL,
        MsgFlags::REQUEST,
        seq,
        pid,
        CTRL_CMD_GETFAMILY,
        CTRL_VERSION,
    );
    b.put_str(CTRL_ATTR_FAMILY_NAME, name);
    b.finish()
}

/// Parse a `GETFAMILY` reply datagram.
///
/// A kernel error reply surfaces as `NoSuchFamily`; anything unparseable is
/// a bad-socket condition since nlctrl itself is misbehaving.
pub(crate) fn parse_family_reply(
    datagram: &[u8],
    family: &str,
) -> Result<FamilyInfo, TransportError> {
    for msg in split_messages(datagram) {
        let (hdr, bytes) = msg.map_err(|err| TransportError::BadSocket(err.to_string()))?;
        if hdr.kind == NLMSG_ERROR {
            return Err(TransportError::NoSuchFamily(family.to_string()));
        }
        if hdr.kind != GENL_ID_CTRL {
            continue;
        }
        let mut info = FamilyInfo::default();
        let body = &bytes[NLMSG_HDRLEN + GENL_HDRLEN..];
        for attr in Attrs::new(body) {
            let attr = attr.map_err(|err| TransportError::BadSocket(err.to_string()))?;
            match attr.index() {
                CTRL_ATTR_FAMILY_ID => {
                    info.id = attr.as_u16().map_err(|err| {
                        TransportError::BadSocket(err.to_string())
                    })?;
                }
                CTRL_ATTR_MCAST_GROUPS => {
                    for entry in attr.nested() {
                        let entry =
                            entry.map_err(|err| TransportError::BadSocket(err.to_string()))?;
                        let mut name = None;
                        let mut id = None;
                        for field in entry.nested() {
                            let field = field
                                .map_err(|err| TransportError::BadSocket(err.to_string()))?;
                            match field.index() {
                                CTRL_ATTR_MCAST_GRP_NAME => {
                                    name = Some(field.text().into_owned());
                                }
                                CTRL_ATTR_MCAST_GRP_ID => {
                                    let raw = field.payload;
                                    if raw.len() >= 4 {
                                        id = Some(u32::from_ne_bytes([
                                            raw[0], raw[1], raw[2], raw[3],
                                        ]));
                                    }
                                }
                                _ => {}
                            }
                        }
                        if let (Some(name), Some(id)) = (name, id) {
                            info.groups.push((name, id));
                        }
                    }
                }
                _ => {}
            }
        }
        return Ok(info);
    }
    Err(TransportError::NoSuchFamily(family.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use nlyaml_core::wire::MsgHeader;

    fn canned_reply(id: u16, groups: &[(&str, u32)]) -> Vec<u8> {
        let mut b = MessageBuilder::new(GENL_ID_CTRL, MsgFlags::empty(), 1, 0, 1, CTRL_VERSION);
        b.put_u16(CTRL_ATTR_FAMILY_ID, id);
        let list = b.begin_nested(CTRL_ATTR_MCAST_GROUPS);
        for (i, (name, gid)) in groups.iter().enumerate() {
            let entry = b.begin_nested((i + 1) as u16);
            b.put_str(CTRL_ATTR_MCAST_GRP_NAME, name);
            b.put_u32(CTRL_ATTR_MCAST_GRP_ID, *gid);
            b.end_nested(entry);
        }
        b.end_nested(list);
        b.finish()
    }

    #[test]
    fn test_request_frames_name() {
        let req = family_request("lnet", 3, 7);
        let hdr = MsgHeader::parse(&req).unwrap();
        assert_eq!(hdr.kind, GENL_ID_CTRL);
        assert_eq!(hdr.seq, 3);
        let body = &req[NLMSG_HDRLEN + GENL_HDRLEN..];
        let attr = Attrs::new(body).next().unwrap().unwrap();
        assert_eq!(attr.index(), CTRL_ATTR_FAMILY_NAME);
        assert_eq!(attr.text(), "lnet");
    }

    #[test]
    fn test_reply_parses_id_and_groups() {
        let reply = canned_reply(0x1c, &[("net", 5), ("router", 6)]);
        let info = parse_family_reply(&reply, "lnet").unwrap();
        assert_eq!(info.id, 0x1c);
        assert_eq!(info.groups, [("net".to_string(), 5), ("router".to_string(), 6)]);
    }

    #[test]
    fn test_error_reply_means_unknown_family() {
        let mut raw = Vec::new();
        raw.extend_from_slice(&((NLMSG_HDRLEN + 4 + NLMSG_HDRLEN) as u32).to_ne_bytes());
        raw.extend_from_slice(&NLMSG_ERROR.to_ne_bytes());
        raw.extend_from_slice(&0u16.to_ne_bytes());
        raw.extend_from_slice(&1u32.to_ne_bytes());
        raw.extend_from_slice(&0u32.to_ne_bytes());
        raw.extend_from_slice(&(-2i32).to_ne_bytes());
        raw.extend_from_slice(&[0u8; NLMSG_HDRLEN]);

        let err = parse_family_reply(&raw, "nope").unwrap_err();
        assert!(matches!(err, TransportError::NoSuchFamily(_)));
    }
}
