//! SOME/IP Server/Provider functionality
//!
//! This module provides server-side SOME/IP functionality including:
//! - Service offering/announcement via Service Discovery
//! - Event publishing to subscribers
//! - Subscription handling per event group

mod event_publisher;
mod state;
mod subscription_manager;

pub use event_publisher::SendReport;

use std::net::SocketAddrV4;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::Error;
use crate::discovery::{self, AttachedInstance, Attachment, Outbox, ServiceDiscovery, Target};
use crate::protocol::sd::{EventGroupEntry, ServiceEntry, TransportProtocol};
use crate::service::Service;
use event_publisher::EventPublisher;
use state::{InstanceConfig, ServerState};

/// State of a server instance shared with the SD engine
#[derive(Debug)]
pub(crate) struct ServerShared {
    config: InstanceConfig,
    attached: AtomicBool,
    state: RwLock<ServerState>,
    publisher: EventPublisher,
}

impl ServerShared {
    pub(crate) fn service(&self) -> &Service {
        &self.config.service
    }

    pub(crate) fn instance_id(&self) -> u16 {
        self.config.instance_id
    }

    pub(crate) fn set_attached(&self) {
        self.attached.store(true, Ordering::Release);
    }

    pub(crate) fn matches_find(&self, find: &ServiceEntry) -> bool {
        self.config.matches_find(find)
    }

    pub(crate) fn hosts(&self, entry: &EventGroupEntry) -> bool {
        self.config.hosts(entry)
    }

    pub(crate) async fn next_deadline(&self) -> Option<Instant> {
        self.state.read().await.next_deadline()
    }

    pub(crate) async fn on_timer(&self, now: Instant, outbox: &mut Outbox) {
        self.state.write().await.on_timer(&self.config, now, outbox);
    }

    pub(crate) async fn handle_find(&self, source: SocketAddrV4, outbox: &mut Outbox) {
        self.state.read().await.handle_find(&self.config, source, outbox);
    }

    pub(crate) async fn handle_subscribe(
        &self,
        entry: &EventGroupEntry,
        endpoint: Option<SocketAddrV4>,
        source: SocketAddrV4,
        now: Instant,
        outbox: &mut Outbox,
    ) {
        self.state
            .write()
            .await
            .handle_subscribe(&self.config, entry, endpoint, source, now, outbox);
    }

    pub(crate) async fn handle_stop_subscribe(
        &self,
        entry: &EventGroupEntry,
        endpoint: Option<SocketAddrV4>,
        source: SocketAddrV4,
    ) {
        self.state
            .write()
            .await
            .handle_stop_subscribe(entry, endpoint, source);
    }

    pub(crate) async fn peer_rebooted(&self, source: SocketAddrV4) {
        self.state.write().await.peer_rebooted(source);
    }

    pub(crate) async fn withdraw(&self, outbox: &mut Outbox) {
        self.state.write().await.withdraw(&self.config, outbox);
    }
}

/// A service instance offered by this node
///
/// The instance owns the UDP socket events are published from and the
/// registry of its subscribers. It has to be attached to a
/// [`ServiceDiscovery`] before it can be offered.
#[derive(Debug)]
pub struct ServerServiceInstance {
    shared: Arc<ServerShared>,
    sd: ServiceDiscovery,
}

impl ServerServiceInstance {
    /// Create a service instance publishing from `endpoint`.
    ///
    /// `ttl` is the offer TTL in seconds and `cyclic_offer_delay` the period of
    /// the cyclic offers. Port 0 binds an ephemeral port; the offered endpoint is
    /// the address actually bound.
    #[allow(clippy::too_many_arguments)]
    pub async fn new(
        service: Service,
        instance_id: u16,
        endpoint: SocketAddrV4,
        ttl: u32,
        sd: &ServiceDiscovery,
        cyclic_offer_delay: Duration,
        protocol: TransportProtocol,
    ) -> Result<Self, Error> {
        if protocol != TransportProtocol::Udp {
            return Err(Error::UnsupportedTransport);
        }
        let socket = discovery::socket::bind_unicast(endpoint)?;
        let endpoint = discovery::socket::local_v4(&socket, sd.config().interface)?;
        tracing::info!(
            "Server bound to {} for service 0x{:04X}, instance 0x{:04X}",
            endpoint,
            service.service_id,
            instance_id
        );
        let config = InstanceConfig {
            service,
            instance_id,
            endpoint,
            ttl,
            cyclic_offer_delay,
        };
        Ok(Self {
            shared: Arc::new(ServerShared {
                config,
                attached: AtomicBool::new(false),
                state: RwLock::new(ServerState::new()),
                publisher: EventPublisher::new(socket),
            }),
            sd: sd.clone(),
        })
    }

    pub fn service(&self) -> &Service {
        self.shared.service()
    }

    pub fn instance_id(&self) -> u16 {
        self.shared.instance_id()
    }

    /// Endpoint events are published from and which is announced in offers
    pub fn local_endpoint(&self) -> SocketAddrV4 {
        self.shared.config.endpoint
    }

    pub async fn is_offering(&self) -> bool {
        self.shared.state.read().await.is_offering()
    }

    /// Start announcing the service via Service Discovery
    ///
    /// The first OfferService goes out after a random delay of at most
    /// [`DiscoveryConfig::initial_delay_max`](crate::discovery::DiscoveryConfig),
    /// then once per cyclic offer delay. Calling this while offering is a no-op.
    pub async fn start_offer(&self) -> Result<(), Error> {
        if !self.shared.attached.load(Ordering::Acquire) {
            return Err(Error::NotAttached);
        }
        if self.sd.is_closed() {
            return Err(Error::EngineClosed);
        }
        let initial_delay = initial_delay(self.sd.config().initial_delay_max);
        let started = self
            .shared
            .state
            .write()
            .await
            .start_offer(Instant::now(), initial_delay);
        if started {
            tracing::info!(
                "Offering service 0x{:04X}, instance 0x{:04X} at {} (first offer in {:?})",
                self.service().service_id,
                self.instance_id(),
                self.local_endpoint(),
                initial_delay
            );
            if let Err(e) = self.sd.wake().await {
                // the engine went away meanwhile, nobody will send the offers
                self.shared.state.write().await.stop_offer(&self.shared.config);
                return Err(e);
            }
        }
        Ok(())
    }

    /// Withdraw the offer with an immediate StopOffer and drop all subscribers.
    ///
    /// No-op when the instance is not offering.
    pub async fn stop_offer(&self) -> Result<(), Error> {
        let stop_offer = self.shared.state.write().await.stop_offer(&self.shared.config);
        match stop_offer {
            Some(header) => {
                tracing::info!(
                    "Stopped offering service 0x{:04X}, instance 0x{:04X}",
                    self.service().service_id,
                    self.instance_id()
                );
                self.sd.send(Target::Multicast, header).await
            }
            None => Ok(()),
        }
    }

    /// Publish `payload` as event `event_id` to every current subscriber of `event_group_id`.
    pub async fn send_event(
        &self,
        event_group_id: u16,
        event_id: u16,
        payload: &[u8],
    ) -> Result<SendReport, Error> {
        let service = self.service();
        if service.event_group(event_group_id).is_none() {
            return Err(Error::UnknownEventGroup {
                service_id: service.service_id,
                event_group_id,
            });
        }
        let subscribers = self.shared.state.read().await.subscribers(
            &self.shared.config,
            event_group_id,
            Instant::now(),
        );
        self.shared
            .publisher
            .publish_event(
                service.service_id,
                event_id,
                service.major_version,
                payload,
                &subscribers,
            )
            .await
    }

    /// Number of non-expired subscribers of `event_group_id`
    pub async fn subscriber_count(&self, event_group_id: u16) -> usize {
        self.shared
            .state
            .read()
            .await
            .subscribers(&self.shared.config, event_group_id, Instant::now())
            .len()
    }

    #[cfg(test)]
    fn publisher_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.shared.publisher.local_addr()
    }
}

/// Dropping an attached instance stops its offer and releases its subscribers.
impl Drop for ServerServiceInstance {
    fn drop(&mut self) {
        if self.shared.attached.load(Ordering::Acquire) {
            self.sd.detach(AttachedInstance::Server(Arc::clone(&self.shared)));
        }
    }
}

impl From<&ServerServiceInstance> for Attachment {
    fn from(instance: &ServerServiceInstance) -> Self {
        Attachment(AttachedInstance::Server(Arc::clone(&instance.shared)))
    }
}

fn initial_delay(max: Duration) -> Duration {
    let max_millis = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
    Duration::from_millis(fastrand::u64(0..=max_millis))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::DiscoveryConfig;
    use crate::protocol::{Message, sd};
    use crate::service::EventGroup;
    use std::net::{Ipv4Addr, SocketAddr};
    use tokio::net::UdpSocket;

    const SERVICE_ID: u16 = 0x5B;
    const INSTANCE_ID: u16 = 1;
    const EVENT_GROUP: u16 = 0x01;
    const EVENT_ID: u16 = 0x8001;

    fn test_service() -> Service {
        Service::builder()
            .service_id(SERVICE_ID)
            .major_version(1)
            .minor_version(0)
            .eventgroup(EventGroup::new(EVENT_GROUP, vec![EVENT_ID]))
            .build()
    }

    fn v4(addr: SocketAddr) -> SocketAddrV4 {
        match addr {
            SocketAddr::V4(v4) => v4,
            SocketAddr::V6(_) => panic!("Expected IPv4 address"),
        }
    }

    /// Helper: wrap an SD header in a SOME/IP SD message and return the bytes
    fn build_sd_message(session_id: u16, sd_header: sd::Header) -> Vec<u8> {
        Message::new_sd(session_id, sd_header).encode().unwrap()
    }

    /// Helper: receive the next SD message on `socket`
    async fn recv_sd(socket: &UdpSocket) -> sd::Header {
        let mut buf = vec![0u8; 65535];
        let (len, _) = tokio::time::timeout(Duration::from_secs(2), socket.recv_from(&mut buf))
            .await
            .expect("Timeout waiting for SD message")
            .unwrap();
        let message = Message::decode(&buf[..len]).expect("Failed to parse SD message");
        message.get_sd_header().cloned().expect("Expected SD payload")
    }

    /// Helper: receive SD messages on `socket` until one carries a SubscribeAck, return its TTL
    async fn recv_subscribe_ack_ttl(socket: &UdpSocket) -> u32 {
        loop {
            let sd_msg = recv_sd(socket).await;
            for entry in &sd_msg.entries {
                if let sd::Entry::SubscribeAckEventGroup(entry) = entry {
                    return entry.ttl;
                }
            }
        }
    }

    /// Helper: an SD engine on loopback sending its multicast traffic to `peer`,
    /// and an offering server attached to it. Returns once the first offer arrived.
    async fn create_test_server(
        peer: &UdpSocket,
        cyclic_offer_delay: Duration,
    ) -> (ServiceDiscovery, ServerServiceInstance, sd::Header) {
        let config = DiscoveryConfig::new(
            Ipv4Addr::LOCALHOST,
            Ipv4Addr::LOCALHOST,
            v4(peer.local_addr().unwrap()).port(),
        )
        .with_bind_port(0)
        .with_initial_delay_max(Duration::ZERO);
        let sd = ServiceDiscovery::bind(config).await.unwrap();
        let server = ServerServiceInstance::new(
            test_service(),
            INSTANCE_ID,
            SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0),
            3,
            &sd,
            cyclic_offer_delay,
            TransportProtocol::Udp,
        )
        .await
        .expect("Failed to create server");
        sd.attach(&server).await.unwrap();
        server.start_offer().await.unwrap();
        let first_offer = recv_sd(peer).await;
        (sd, server, first_offer)
    }

    /// Helper: a server whose cyclic offers do not interfere with the test
    async fn create_quiet_server(peer: &UdpSocket) -> (ServiceDiscovery, ServerServiceInstance) {
        let (sd, server, _) = create_test_server(peer, Duration::from_secs(60)).await;
        (sd, server)
    }

    fn subscription(service_id: u16, event_group_id: u16, port: u16) -> sd::Header {
        sd::Header::new_subscription(
            service_id,
            INSTANCE_ID,
            1,
            3,
            event_group_id,
            Ipv4Addr::LOCALHOST,
            TransportProtocol::Udp,
            port,
        )
    }

    #[tokio::test]
    async fn test_tcp_is_rejected() {
        let sd = ServiceDiscovery::bind(
            DiscoveryConfig::new(Ipv4Addr::LOCALHOST, Ipv4Addr::LOCALHOST, 9).with_bind_port(0),
        )
        .await
        .unwrap();
        let result = ServerServiceInstance::new(
            test_service(),
            INSTANCE_ID,
            SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0),
            3,
            &sd,
            Duration::from_secs(1),
            TransportProtocol::Tcp,
        )
        .await;
        assert!(matches!(result, Err(Error::UnsupportedTransport)));
    }

    #[tokio::test]
    async fn test_start_offer_requires_attach() {
        let sd = ServiceDiscovery::bind(
            DiscoveryConfig::new(Ipv4Addr::LOCALHOST, Ipv4Addr::LOCALHOST, 9).with_bind_port(0),
        )
        .await
        .unwrap();
        let server = ServerServiceInstance::new(
            test_service(),
            INSTANCE_ID,
            SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0),
            3,
            &sd,
            Duration::from_secs(1),
            TransportProtocol::Udp,
        )
        .await
        .unwrap();
        assert!(matches!(server.start_offer().await, Err(Error::NotAttached)));
        assert_eq!(
            v4(server.publisher_addr().unwrap()),
            server.local_endpoint()
        );
    }

    #[tokio::test]
    async fn test_cyclic_offer_announces_endpoint() {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let (_sd, server, offer) = create_test_server(&peer, Duration::from_millis(200)).await;

        assert!(offer.flags.reboot());
        let entry = &offer.entries[0];
        assert_eq!(entry.kind(), sd::EntryKind::OfferService);
        assert_eq!(entry.service_id(), SERVICE_ID);
        assert_eq!(entry.ttl(), 3);
        assert_eq!(offer.udp_endpoint_for(entry), Some(server.local_endpoint()));

        // the next cyclic offer follows
        let offer = recv_sd(&peer).await;
        assert_eq!(offer.entries[0].kind(), sd::EntryKind::OfferService);
    }

    #[tokio::test]
    async fn test_wildcard_endpoint_is_offered_on_interface() {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let config = DiscoveryConfig::new(
            Ipv4Addr::LOCALHOST,
            Ipv4Addr::LOCALHOST,
            v4(peer.local_addr().unwrap()).port(),
        )
        .with_bind_port(0)
        .with_initial_delay_max(Duration::ZERO);
        let sd = ServiceDiscovery::bind(config).await.unwrap();
        let server = ServerServiceInstance::new(
            test_service(),
            INSTANCE_ID,
            SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0),
            3,
            &sd,
            Duration::from_secs(60),
            TransportProtocol::Udp,
        )
        .await
        .unwrap();
        assert_eq!(*server.local_endpoint().ip(), Ipv4Addr::LOCALHOST);
        sd.attach(&server).await.unwrap();
        server.start_offer().await.unwrap();

        let offer = recv_sd(&peer).await;
        let endpoint = offer.udp_endpoint_for(&offer.entries[0]).unwrap();
        assert!(!endpoint.ip().is_unspecified());
        assert_eq!(endpoint, server.local_endpoint());
    }

    #[tokio::test]
    async fn test_subscribe_ack_success() {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let (sd, server) = create_quiet_server(&peer).await;
        let events = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let events_port = v4(events.local_addr().unwrap()).port();

        let message = build_sd_message(1, subscription(SERVICE_ID, EVENT_GROUP, events_port));
        peer.send_to(&message, sd.local_addr()).await.unwrap();

        let ttl = recv_subscribe_ack_ttl(&peer).await;
        assert!(ttl > 0, "Expected ACK (TTL > 0), got TTL={}", ttl);
        assert_eq!(server.subscriber_count(EVENT_GROUP).await, 1);

        let report = server.send_event(EVENT_GROUP, EVENT_ID, &[1, 2]).await.unwrap();
        assert_eq!(report, SendReport { delivered: 1, failed: 0 });
        let mut buf = [0u8; 64];
        let (len, source) = events.recv_from(&mut buf).await.unwrap();
        assert_eq!(v4(source), server.local_endpoint());
        let message = Message::decode(&buf[..len]).unwrap();
        assert_eq!(message.header().message_id.method_id(), EVENT_ID);
    }

    #[tokio::test]
    async fn test_subscribe_nack_wrong_service() {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let (sd, server) = create_quiet_server(&peer).await;

        // Subscribe with wrong service ID (0x99 instead of 0x5B)
        let message = build_sd_message(1, subscription(0x99, EVENT_GROUP, 40000));
        peer.send_to(&message, sd.local_addr()).await.unwrap();

        assert_eq!(recv_subscribe_ack_ttl(&peer).await, 0);
        assert_eq!(server.subscriber_count(EVENT_GROUP).await, 0);
    }

    #[tokio::test]
    async fn test_subscribe_nack_unknown_event_group() {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let (sd, server) = create_quiet_server(&peer).await;

        let message = build_sd_message(1, subscription(SERVICE_ID, 0x42, 40000));
        peer.send_to(&message, sd.local_addr()).await.unwrap();

        assert_eq!(recv_subscribe_ack_ttl(&peer).await, 0);
        assert_eq!(server.subscriber_count(0x42).await, 0);
    }

    #[tokio::test]
    async fn test_stop_subscribe_removes_subscriber() {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let (sd, server) = create_quiet_server(&peer).await;

        let message = build_sd_message(1, subscription(SERVICE_ID, EVENT_GROUP, 40000));
        peer.send_to(&message, sd.local_addr()).await.unwrap();
        assert!(recv_subscribe_ack_ttl(&peer).await > 0);
        assert_eq!(server.subscriber_count(EVENT_GROUP).await, 1);

        let mut stop = subscription(SERVICE_ID, EVENT_GROUP, 40000);
        if let sd::Entry::SubscribeEventGroup(entry) = &mut stop.entries[0] {
            entry.ttl = 0;
        }
        let message = build_sd_message(2, stop);
        peer.send_to(&message, sd.local_addr()).await.unwrap();
        // a Find round trip guarantees the stop was processed
        let find = build_sd_message(3, sd::Header::new_find(SERVICE_ID, INSTANCE_ID, 1, 3));
        peer.send_to(&find, sd.local_addr()).await.unwrap();
        recv_sd(&peer).await;

        assert_eq!(server.subscriber_count(EVENT_GROUP).await, 0);
    }

    #[tokio::test]
    async fn test_peer_reboot_drops_subscriptions() {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let (sd, server) = create_quiet_server(&peer).await;

        let message = build_sd_message(5, subscription(SERVICE_ID, EVENT_GROUP, 40000));
        peer.send_to(&message, sd.local_addr()).await.unwrap();
        assert!(recv_subscribe_ack_ttl(&peer).await > 0);
        assert_eq!(server.subscriber_count(EVENT_GROUP).await, 1);

        // session ID goes backwards with the reboot flag still set
        let find = build_sd_message(1, sd::Header::new_find(SERVICE_ID, INSTANCE_ID, 1, 3));
        peer.send_to(&find, sd.local_addr()).await.unwrap();
        recv_sd(&peer).await;

        assert_eq!(server.subscriber_count(EVENT_GROUP).await, 0);
    }

    #[tokio::test]
    async fn test_stop_offer_is_idempotent_and_clears_registry() {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let (sd, server) = create_quiet_server(&peer).await;

        let message = build_sd_message(1, subscription(SERVICE_ID, EVENT_GROUP, 40000));
        peer.send_to(&message, sd.local_addr()).await.unwrap();
        assert!(recv_subscribe_ack_ttl(&peer).await > 0);

        server.stop_offer().await.unwrap();
        assert!(!server.is_offering().await);
        assert_eq!(server.subscriber_count(EVENT_GROUP).await, 0);
        let report = server.send_event(EVENT_GROUP, EVENT_ID, &[1]).await.unwrap();
        assert_eq!(report.delivered, 0);

        // the StopOffer reached the peer
        loop {
            let sd_msg = recv_sd(&peer).await;
            if sd_msg.entries[0].kind() == sd::EntryKind::StopOfferService {
                break;
            }
        }
        server.stop_offer().await.unwrap();
        server.start_offer().await.unwrap();
        server.start_offer().await.unwrap();
        assert!(server.is_offering().await);
    }

    #[tokio::test]
    async fn test_send_event_unknown_event_group() {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let (_sd, server) = create_quiet_server(&peer).await;
        let result = server.send_event(0x77, EVENT_ID, &[1]).await;
        assert!(matches!(
            result,
            Err(Error::UnknownEventGroup {
                service_id: SERVICE_ID,
                event_group_id: 0x77
            })
        ));
    }

    #[tokio::test]
    async fn test_drop_sends_stop_offer() {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let (sd, server) = create_quiet_server(&peer).await;

        drop(server);
        loop {
            let sd_msg = recv_sd(&peer).await;
            if sd_msg.entries[0].kind() == sd::EntryKind::StopOfferService {
                assert_eq!(sd_msg.entries[0].service_id(), SERVICE_ID);
                break;
            }
        }
        // only the instance is gone, the engine keeps running
        assert!(!sd.is_closed());
        sd.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_close_sends_stop_offer() {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let (sd, server) = create_quiet_server(&peer).await;

        sd.close().await.unwrap();
        loop {
            let sd_msg = recv_sd(&peer).await;
            if sd_msg.entries[0].kind() == sd::EntryKind::StopOfferService {
                break;
            }
        }
        assert!(!server.is_offering().await);
        assert!(sd.is_closed());
        assert!(matches!(server.start_offer().await, Err(Error::EngineClosed)));
        assert!(!server.is_offering().await);
        sd.close().await.unwrap();
    }
}
