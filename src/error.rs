use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    ProtocolError(#[from] crate::protocol::Error),
    #[error(transparent)]
    Io(#[from] tokio::io::Error),
    #[error("Service 0x{service_id:04X}, instance 0x{instance_id:04X} has not been discovered")]
    NotDiscovered { service_id: u16, instance_id: u16 },
    #[error("Service 0x{service_id:04X} has no event group 0x{event_group_id:04X}")]
    UnknownEventGroup { service_id: u16, event_group_id: u16 },
    #[error("No SubscribeAck received for event group 0x{0:04X}")]
    HandshakeTimeout(u16),
    #[error("Service discovery needs a concrete local interface address, got {0}")]
    UnspecifiedInterface(std::net::Ipv4Addr),
    #[error("Only UDP is supported as transport protocol")]
    UnsupportedTransport,
    #[error("Instance is not attached to a service discovery engine")]
    NotAttached,
    #[error("Service discovery engine is closed")]
    EngineClosed,
}
