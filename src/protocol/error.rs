use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("Malformed packet: {0}")]
    MalformedPacket(&'static str),
    #[error("Invalid protocol version: {0:X}")]
    InvalidProtocolVersion(u8),
    #[error("Invalid value in MessageType field: {0:X}")]
    InvalidMessageTypeField(u8),
    #[error("Invalid value in ReturnCode field: {0:X}")]
    InvalidReturnCode(u8),
    #[error("Invalid value for Service Discovery entry type: {0:X}")]
    InvalidSDEntryType(u8),
    #[error("Invalid value for Service Discovery Option Transport Protocol: {0:X}")]
    InvalidSDOptionTransportProtocol(u8),
    #[error("Service Discovery option run {index}+{count} exceeds {available} options")]
    OptionIndexOutOfRange {
        index: u8,
        count: u8,
        available: usize,
    },
}

impl Error {
    /// Every decode failure originates from bytes received off the network,
    /// so all variants except a non-EOF I/O failure mean the packet is malformed.
    pub fn is_malformed(&self) -> bool {
        match self {
            Error::Io(e) => e.kind() == std::io::ErrorKind::UnexpectedEof,
            _ => true,
        }
    }
}
