use std::net::SocketAddrV4;

/// Header information of a received notification
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EventMetadata {
    pub service_id: u16,
    pub instance_id: u16,
    pub event_id: u16,
    pub session_id: u16,
    pub interface_version: u8,
    /// Endpoint the notification was sent from
    pub source: SocketAddrV4,
}

/// Receiver of the events of a client service instance
///
/// Implemented for every `Fn(&EventMetadata, &[u8])` closure. The sink is
/// called from the receive task of the instance and should return quickly.
pub trait EventSink: Send + Sync {
    fn on_event(&self, metadata: &EventMetadata, payload: &[u8]);
}

impl<F> EventSink for F
where
    F: Fn(&EventMetadata, &[u8]) + Send + Sync,
{
    fn on_event(&self, metadata: &EventMetadata, payload: &[u8]) {
        self(metadata, payload)
    }
}
