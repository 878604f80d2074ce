//! Control protocol messages.
//!
//! Message type values alternate request and response: every request type is
//! odd and its response is the next even value. The control channel relies
//! on this pairing, so new messages must keep it.

use super::codec::{name_len, put_name, Reader};
use crate::config::{ControlConfig, DifType};
use crate::error::{Result, RinaError};
use crate::name::ProcessName;
use bytes::{BufMut, Bytes, BytesMut};

/// Result code carried by destroy/assign responses on success.
pub const RESULT_OK: u8 = 0;
/// Result code carried by destroy/assign responses for an unknown id.
pub const RESULT_NOT_FOUND: u8 = 1;

/// Control message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum MessageType {
    CreateIpcp = 1,
    CreateIpcpResp = 2,
    DestroyIpcp = 3,
    DestroyIpcpResp = 4,
    FetchIpcp = 5,
    FetchIpcpResp = 6,
    AssignToDif = 7,
    AssignToDifResp = 8,
}

impl MessageType {
    /// One past the largest valid type value.
    pub const MAX: u16 = 9;

    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(MessageType::CreateIpcp),
            2 => Some(MessageType::CreateIpcpResp),
            3 => Some(MessageType::DestroyIpcp),
            4 => Some(MessageType::DestroyIpcpResp),
            5 => Some(MessageType::FetchIpcp),
            6 => Some(MessageType::FetchIpcpResp),
            7 => Some(MessageType::AssignToDif),
            8 => Some(MessageType::AssignToDifResp),
            _ => None,
        }
    }

    pub fn as_u16(self) -> u16 {
        self as u16
    }

    pub fn is_request(self) -> bool {
        self.as_u16() % 2 == 1
    }

    /// Response type paired with a request type.
    pub fn response(self) -> Option<Self> {
        if self.is_request() {
            Self::from_u16(self.as_u16() + 1)
        } else {
            None
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MessageType::CreateIpcp => "CREATE_IPCP",
            MessageType::CreateIpcpResp => "CREATE_IPCP_RESP",
            MessageType::DestroyIpcp => "DESTROY_IPCP",
            MessageType::DestroyIpcpResp => "DESTROY_IPCP_RESP",
            MessageType::FetchIpcp => "FETCH_IPCP",
            MessageType::FetchIpcpResp => "FETCH_IPCP_RESP",
            MessageType::AssignToDif => "ASSIGN_TO_DIF",
            MessageType::AssignToDifResp => "ASSIGN_TO_DIF_RESP",
        };
        f.write_str(name)
    }
}

/// A typed control message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CtrlMessage {
    CreateIpcp {
        event_id: u32,
        dif_type: DifType,
        name: ProcessName,
    },
    CreateIpcpResp {
        event_id: u32,
        ipcp_id: u16,
    },
    DestroyIpcp {
        event_id: u32,
        ipcp_id: u16,
    },
    DestroyIpcpResp {
        event_id: u32,
        result: u8,
    },
    FetchIpcp {
        event_id: u32,
    },
    /// One enumeration step. With `end` set the remaining fields are zeroed.
    FetchIpcpResp {
        event_id: u32,
        end: bool,
        ipcp_id: u16,
        dif_type: DifType,
        ipcp_name: ProcessName,
        dif_name: ProcessName,
    },
    AssignToDif {
        event_id: u32,
        ipcp_id: u32,
        dif_name: ProcessName,
    },
    AssignToDifResp {
        event_id: u32,
        result: u8,
    },
}

/// Read the `{type, event id}` header without validating the body.
pub fn peek_header(buf: &[u8]) -> Result<(u16, u32)> {
    if buf.len() < ControlConfig::HEADER_SIZE {
        return Err(RinaError::bad_message(format!(
            "{} bytes is shorter than the {}-byte header",
            buf.len(),
            ControlConfig::HEADER_SIZE
        )));
    }
    let mut reader = Reader::new(buf);
    Ok((reader.u16("message type")?, reader.u32("event id")?))
}

impl CtrlMessage {
    /// End-of-enumeration fetch response.
    pub fn fetch_end(event_id: u32) -> Self {
        CtrlMessage::FetchIpcpResp {
            event_id,
            end: true,
            ipcp_id: 0,
            dif_type: DifType::INVALID,
            ipcp_name: ProcessName::default(),
            dif_name: ProcessName::default(),
        }
    }

    pub fn msg_type(&self) -> MessageType {
        match self {
            CtrlMessage::CreateIpcp { .. } => MessageType::CreateIpcp,
            CtrlMessage::CreateIpcpResp { .. } => MessageType::CreateIpcpResp,
            CtrlMessage::DestroyIpcp { .. } => MessageType::DestroyIpcp,
            CtrlMessage::DestroyIpcpResp { .. } => MessageType::DestroyIpcpResp,
            CtrlMessage::FetchIpcp { .. } => MessageType::FetchIpcp,
            CtrlMessage::FetchIpcpResp { .. } => MessageType::FetchIpcpResp,
            CtrlMessage::AssignToDif { .. } => MessageType::AssignToDif,
            CtrlMessage::AssignToDifResp { .. } => MessageType::AssignToDifResp,
        }
    }

    pub fn event_id(&self) -> u32 {
        match *self {
            CtrlMessage::CreateIpcp { event_id, .. }
            | CtrlMessage::CreateIpcpResp { event_id, .. }
            | CtrlMessage::DestroyIpcp { event_id, .. }
            | CtrlMessage::DestroyIpcpResp { event_id, .. }
            | CtrlMessage::FetchIpcp { event_id }
            | CtrlMessage::FetchIpcpResp { event_id, .. }
            | CtrlMessage::AssignToDif { event_id, .. }
            | CtrlMessage::AssignToDifResp { event_id, .. } => event_id,
        }
    }

    /// Size of the serialized form.
    pub fn serialized_len(&self) -> usize {
        let body = match self {
            CtrlMessage::CreateIpcp { name, .. } => 1 + name_len(name),
            CtrlMessage::CreateIpcpResp { .. } | CtrlMessage::DestroyIpcp { .. } => 2,
            CtrlMessage::DestroyIpcpResp { .. } | CtrlMessage::AssignToDifResp { .. } => 1,
            CtrlMessage::FetchIpcp { .. } => 0,
            CtrlMessage::FetchIpcpResp {
                ipcp_name,
                dif_name,
                ..
            } => 1 + 2 + 1 + name_len(ipcp_name) + name_len(dif_name),
            CtrlMessage::AssignToDif { dif_name, .. } => 4 + name_len(dif_name),
        };
        ControlConfig::HEADER_SIZE + body
    }

    pub fn serialize(&self) -> Result<Bytes> {
        let mut out = BytesMut::with_capacity(self.serialized_len());
        out.put_u16_le(self.msg_type().as_u16());
        out.put_u32_le(self.event_id());

        match self {
            CtrlMessage::CreateIpcp { dif_type, name, .. } => {
                out.put_u8(dif_type.0);
                put_name(&mut out, name)?;
            }
            CtrlMessage::CreateIpcpResp { ipcp_id, .. }
            | CtrlMessage::DestroyIpcp { ipcp_id, .. } => out.put_u16_le(*ipcp_id),
            CtrlMessage::DestroyIpcpResp { result, .. }
            | CtrlMessage::AssignToDifResp { result, .. } => out.put_u8(*result),
            CtrlMessage::FetchIpcp { .. } => {}
            CtrlMessage::FetchIpcpResp {
                end,
                ipcp_id,
                dif_type,
                ipcp_name,
                dif_name,
                ..
            } => {
                out.put_u8(u8::from(*end));
                out.put_u16_le(*ipcp_id);
                out.put_u8(dif_type.0);
                put_name(&mut out, ipcp_name)?;
                put_name(&mut out, dif_name)?;
            }
            CtrlMessage::AssignToDif {
                ipcp_id, dif_name, ..
            } => {
                out.put_u32_le(*ipcp_id);
                put_name(&mut out, dif_name)?;
            }
        }

        Ok(out.freeze())
    }

    pub fn deserialize(buf: &[u8]) -> Result<Self> {
        let (raw_type, event_id) = peek_header(buf)?;
        let msg_type =
            MessageType::from_u16(raw_type).ok_or(RinaError::Unsupported { msg_type: raw_type })?;
        let mut reader = Reader::new(&buf[ControlConfig::HEADER_SIZE..]);

        let msg = match msg_type {
            MessageType::CreateIpcp => CtrlMessage::CreateIpcp {
                event_id,
                dif_type: DifType(reader.u8("dif type")?),
                name: reader.name("ipcp name")?,
            },
            MessageType::CreateIpcpResp => CtrlMessage::CreateIpcpResp {
                event_id,
                ipcp_id: reader.u16("ipcp id")?,
            },
            MessageType::DestroyIpcp => CtrlMessage::DestroyIpcp {
                event_id,
                ipcp_id: reader.u16("ipcp id")?,
            },
            MessageType::DestroyIpcpResp => CtrlMessage::DestroyIpcpResp {
                event_id,
                result: reader.u8("result")?,
            },
            MessageType::FetchIpcp => CtrlMessage::FetchIpcp { event_id },
            MessageType::FetchIpcpResp => CtrlMessage::FetchIpcpResp {
                event_id,
                end: reader.u8("end flag")? != 0,
                ipcp_id: reader.u16("ipcp id")?,
                dif_type: DifType(reader.u8("dif type")?),
                ipcp_name: reader.name("ipcp name")?,
                dif_name: reader.name("dif name")?,
            },
            MessageType::AssignToDif => CtrlMessage::AssignToDif {
                event_id,
                ipcp_id: reader.u32("ipcp id")?,
                dif_name: reader.name("dif name")?,
            },
            MessageType::AssignToDifResp => CtrlMessage::AssignToDifResp {
                event_id,
                result: reader.u8("result")?,
            },
        };

        reader.finish()?;
        Ok(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_types_alternate_request_response() {
        for raw in 1..MessageType::MAX {
            let msg_type = MessageType::from_u16(raw).unwrap();
            assert_eq!(msg_type.as_u16(), raw);
            if msg_type.is_request() {
                assert_eq!(msg_type.response().unwrap().as_u16(), raw + 1);
            } else {
                assert!(msg_type.response().is_none());
            }
        }
        assert!(MessageType::from_u16(0).is_none());
        assert!(MessageType::from_u16(MessageType::MAX).is_none());
    }

    #[test]
    fn test_create_request_layout() {
        let msg = CtrlMessage::CreateIpcp {
            event_id: 0x0102_0304,
            dif_type: DifType::NORMAL,
            name: ProcessName::process("a"),
        };
        let bytes = msg.serialize().unwrap();

        assert_eq!(
            &bytes[..],
            &[1, 0, 4, 3, 2, 1, 1, 1, 0, b'a', 0, 0, 0, 0, 0, 0]
        );
        assert_eq!(bytes.len(), msg.serialized_len());
        assert_eq!(CtrlMessage::deserialize(&bytes).unwrap(), msg);
    }

    #[test]
    fn test_fetch_end_is_zeroed() {
        let bytes = CtrlMessage::fetch_end(9).serialize().unwrap();
        assert_eq!(peek_header(&bytes).unwrap(), (6, 9));
        // end=1, id=0, dif type=0, two empty names
        assert_eq!(&bytes[6..10], &[1, 0, 0, 0]);
        assert!(bytes[10..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_short_buffer_is_rejected() {
        assert!(matches!(
            CtrlMessage::deserialize(&[1, 0, 0]),
            Err(RinaError::BadMessage { .. })
        ));
    }

    #[test]
    fn test_unknown_type_is_unsupported() {
        let err = CtrlMessage::deserialize(&[42, 0, 1, 0, 0, 0]).unwrap_err();
        assert!(matches!(err, RinaError::Unsupported { msg_type: 42 }));
    }

    #[test]
    fn test_truncated_body_is_rejected() {
        // DESTROY_IPCP without its id
        assert!(CtrlMessage::deserialize(&[3, 0, 1, 0, 0, 0]).is_err());
        // FETCH_IPCP with a stray byte
        assert!(CtrlMessage::deserialize(&[5, 0, 1, 0, 0, 0, 7]).is_err());
    }
}
