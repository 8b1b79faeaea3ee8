/// The 32-bit Message ID of a SOME/IP header: service ID and method or event ID.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct MessageId(u32);

impl From<u32> for MessageId {
    fn from(message_id: u32) -> Self {
        MessageId(message_id)
    }
}

impl MessageId {
    /// Message ID of every SOME/IP Service Discovery message
    pub const SD: MessageId = MessageId(crate::SD_MESSAGE_ID_VALUE);

    pub const fn new_from_service_and_method(service_id: u16, method_id: u16) -> Self {
        MessageId(((service_id as u32) << 16) | method_id as u32)
    }

    #[inline]
    pub const fn message_id(&self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn service_id(&self) -> u16 {
        (self.0 >> 16) as u16
    }

    /// Method ID, or event ID for notifications
    #[inline]
    pub const fn method_id(&self) -> u16 {
        (self.0 & 0xFFFF) as u16
    }

    /// Event IDs have the most significant bit of the method ID set
    #[inline]
    pub const fn is_event(&self) -> bool {
        self.method_id() & 0x8000 != 0
    }

    #[inline]
    pub const fn is_sd(&self) -> bool {
        self.0 == crate::SD_MESSAGE_ID_VALUE
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:04X}.0x{:04X}", self.service_id(), self.method_id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_and_method_split() {
        let id = MessageId::new_from_service_and_method(0x1234, 0x8123);
        assert_eq!(id.service_id(), 0x1234);
        assert_eq!(id.method_id(), 0x8123);
        assert!(id.is_event());
        assert!(!id.is_sd());
        assert_eq!(id.to_string(), "0x1234.0x8123");

        let sd = MessageId::new_from_service_and_method(0xFFFF, 0x8100);
        assert_eq!(sd, MessageId::SD);
        assert!(sd.is_sd());
    }
}
