//! Event publishing functionality

use std::net::SocketAddrV4;
use std::sync::atomic::{AtomicU16, Ordering};

use tokio::net::UdpSocket;

use super::subscription_manager::Subscriber;
use crate::Error;
use crate::protocol::Message;

/// Outcome of publishing one event
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SendReport {
    /// Subscribers the notification was handed to the socket for
    pub delivered: usize,
    /// Subscribers whose send failed
    pub failed: usize,
}

/// Publishes notifications from the unicast socket of a server instance
#[derive(Debug)]
pub(crate) struct EventPublisher {
    socket: UdpSocket,
    session_id: AtomicU16,
}

impl EventPublisher {
    pub fn new(socket: UdpSocket) -> Self {
        Self {
            socket,
            session_id: AtomicU16::new(1),
        }
    }

    #[cfg(test)]
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.socket.local_addr()
    }

    /// Session IDs of notifications count up from 1 and skip 0 on wrap-around
    fn next_session_id(&self) -> u16 {
        self.session_id
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |id| {
                Some(if id == u16::MAX { 1 } else { id + 1 })
            })
            .unwrap_or_else(|id| id)
    }

    /// Publish an event to `subscribers`.
    ///
    /// The notification is serialized once. A failed send is counted and logged;
    /// it never stops delivery to the remaining subscribers.
    pub async fn publish_event(
        &self,
        service_id: u16,
        event_id: u16,
        interface_version: u8,
        payload: &[u8],
        subscribers: &[Subscriber],
    ) -> Result<SendReport, Error> {
        let mut report = SendReport::default();
        if subscribers.is_empty() {
            tracing::trace!(
                "No subscribers for event 0x{:04X} of service 0x{:04X}",
                event_id,
                service_id
            );
            return Ok(report);
        }

        let message = Message::new_notification(
            service_id,
            event_id,
            self.next_session_id(),
            interface_version,
            payload.to_vec(),
        );
        let buffer = message.encode()?;

        for subscriber in subscribers {
            match self.send_to(&buffer, subscriber.address).await {
                Ok(()) => {
                    report.delivered += 1;
                    tracing::trace!(
                        "Sent event to subscriber {} ({} bytes)",
                        subscriber.address,
                        buffer.len()
                    );
                }
                Err(e) => {
                    report.failed += 1;
                    tracing::error!(
                        "Failed to send event to subscriber {}: {:?}",
                        subscriber.address,
                        e
                    );
                }
            }
        }

        tracing::debug!(
            "Published event 0x{:04X} to {}/{} subscribers for service 0x{:04X}",
            event_id,
            report.delivered,
            subscribers.len(),
            service_id
        );

        Ok(report)
    }

    async fn send_to(&self, buffer: &[u8], target: SocketAddrV4) -> std::io::Result<()> {
        let sent = self.socket.send_to(buffer, target).await?;
        if sent != buffer.len() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                format!("sent {} of {} bytes", sent, buffer.len()),
            ));
        }
        Ok(())
    }
}
