use super::Error;

/// Bit flag in message_type field indicating that the message is a SOME/IP TP message.
pub const MESSAGE_TYPE_TP_FLAG: u8 = 0x20;

///Message types of a SOME/IP message.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum MessageType {
    Request = 0x00,
    RequestNoReturn = 0x01,
    Notification = 0x02,
    Response = 0x80,
    Error = 0x81,
}

impl TryFrom<u8> for MessageType {
    type Error = Error;

    /// Decodes the message type, ignoring the TP flag.
    fn try_from(value: u8) -> Result<Self, Error> {
        let message_type = match value & !MESSAGE_TYPE_TP_FLAG {
            0x00 => MessageType::Request,
            0x01 => MessageType::RequestNoReturn,
            0x02 => MessageType::Notification,
            0x80 => MessageType::Response,
            0x81 => MessageType::Error,
            _ => return Err(Error::InvalidMessageTypeField(value)),
        };
        Ok(message_type)
    }
}

/// The message type byte of a header: a [`MessageType`] and the TP flag.
///
/// Only constructed from a known message type, so [`MessageTypeField::message_type`]
/// cannot fail.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct MessageTypeField {
    message_type: MessageType,
    tp: bool,
}

impl TryFrom<u8> for MessageTypeField {
    type Error = Error;
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(Self {
            message_type: MessageType::try_from(value)?,
            tp: value & MESSAGE_TYPE_TP_FLAG != 0,
        })
    }
}

impl From<MessageTypeField> for u8 {
    fn from(field: MessageTypeField) -> u8 {
        let tp_flag = if field.tp { MESSAGE_TYPE_TP_FLAG } else { 0 };
        field.message_type as u8 | tp_flag
    }
}

impl MessageTypeField {
    pub fn new(message_type: MessageType, tp: bool) -> Self {
        Self { message_type, tp }
    }

    /// SD messages are unsegmented notifications
    pub fn new_sd() -> Self {
        Self::new(MessageType::Notification, false)
    }

    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    pub fn is_tp(&self) -> bool {
        self.tp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tp_flag_is_separate_from_type() {
        let field = MessageTypeField::try_from(0x22).unwrap();
        assert_eq!(field.message_type(), MessageType::Notification);
        assert!(field.is_tp());
        assert_eq!(u8::from(field), 0x22);

        let field = MessageTypeField::try_from(0x81).unwrap();
        assert_eq!(field.message_type(), MessageType::Error);
        assert!(!field.is_tp());
        assert_eq!(u8::from(MessageTypeField::new_sd()), 0x02);
    }

    #[test]
    fn test_unknown_types_are_rejected() {
        let valid = [0x00, 0x01, 0x02, 0x80, 0x81];
        for value in 0..=u8::MAX {
            let known = valid.contains(&(value & !MESSAGE_TYPE_TP_FLAG));
            assert_eq!(MessageTypeField::try_from(value).is_ok(), known, "0x{value:02X}");
        }
        assert!(matches!(
            MessageTypeField::try_from(0x40),
            Err(Error::InvalidMessageTypeField(0x40))
        ));
    }
}
