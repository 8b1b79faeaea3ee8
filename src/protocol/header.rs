use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

use super::{Error, MessageId, MessageType, MessageTypeField, ReturnCode};
use crate::traits::WireFormat;

/// Size of the SOME/IP header on the wire
pub const HEADER_SIZE: usize = 16;
/// Bytes covered by the length field that belong to the header itself
/// (request ID, protocol version, interface version, message type, return code)
pub const LENGTH_FIELD_OVERHEAD: u32 = 8;
pub const PROTOCOL_VERSION: u8 = 0x01;

/// SOME/IP header
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Header {
    /// Message ID, encoding service ID and method ID
    pub message_id: MessageId,
    /// Length of the message in bytes, starting at the request Id
    /// Total length of the message is therefore length + 8
    pub length: u32,
    pub client_id: u16,
    pub session_id: u16,
    pub protocol_version: u8,
    pub interface_version: u8,
    pub message_type: MessageTypeField,
    pub return_code: ReturnCode,
}

impl Header {
    /// Header for a notification carrying `payload_len` bytes of event data.
    pub fn new_notification(
        service_id: u16,
        event_id: u16,
        session_id: u16,
        interface_version: u8,
        payload_len: usize,
    ) -> Self {
        Self {
            message_id: MessageId::new_from_service_and_method(service_id, event_id),
            length: payload_len as u32 + LENGTH_FIELD_OVERHEAD,
            client_id: 0,
            session_id,
            protocol_version: PROTOCOL_VERSION,
            interface_version,
            message_type: MessageTypeField::new(MessageType::Notification, false),
            return_code: ReturnCode::Ok,
        }
    }

    /// Header for a Service Discovery message carrying `payload_len` bytes of SD payload.
    pub fn new_sd(session_id: u16, payload_len: usize) -> Self {
        Self {
            message_id: MessageId::SD,
            length: payload_len as u32 + LENGTH_FIELD_OVERHEAD,
            client_id: 0,
            session_id,
            protocol_version: PROTOCOL_VERSION,
            interface_version: 0x01,
            message_type: MessageTypeField::new_sd(),
            return_code: ReturnCode::Ok,
        }
    }

    #[inline]
    pub fn request_id(&self) -> u32 {
        (u32::from(self.client_id) << 16) | u32::from(self.session_id)
    }

    pub fn payload_size(&self) -> usize {
        self.length.saturating_sub(LENGTH_FIELD_OVERHEAD) as usize
    }
}

impl WireFormat for Header {
    fn from_reader<T: Read>(reader: &mut T) -> Result<Self, Error> {
        let message_id = MessageId::from(reader.read_u32::<BigEndian>()?);
        let length = reader.read_u32::<BigEndian>()?;
        if length < LENGTH_FIELD_OVERHEAD {
            return Err(Error::MalformedPacket("length field shorter than header"));
        }
        let client_id = reader.read_u16::<BigEndian>()?;
        let session_id = reader.read_u16::<BigEndian>()?;
        let protocol_version = reader.read_u8()?;
        if protocol_version != PROTOCOL_VERSION {
            return Err(Error::InvalidProtocolVersion(protocol_version));
        }
        let interface_version = reader.read_u8()?;
        let message_type = MessageTypeField::try_from(reader.read_u8()?)?;
        let return_code = ReturnCode::try_from(reader.read_u8()?)?;
        Ok(Self {
            message_id,
            length,
            client_id,
            session_id,
            protocol_version,
            interface_version,
            message_type,
            return_code,
        })
    }

    fn required_size(&self) -> usize {
        HEADER_SIZE
    }

    fn to_writer<T: Write>(&self, writer: &mut T) -> Result<usize, Error> {
        writer.write_u32::<BigEndian>(self.message_id.message_id())?;
        writer.write_u32::<BigEndian>(self.length)?;
        writer.write_u16::<BigEndian>(self.client_id)?;
        writer.write_u16::<BigEndian>(self.session_id)?;
        writer.write_u8(self.protocol_version)?;
        writer.write_u8(self.interface_version)?;
        writer.write_u8(u8::from(self.message_type))?;
        writer.write_u8(u8::from(self.return_code))?;
        Ok(HEADER_SIZE)
    }
}
