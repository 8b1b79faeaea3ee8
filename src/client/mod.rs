//! SOME/IP Client/Consumer functionality
//!
//! A [`ClientServiceInstance`] finds a remote service instance via Service
//! Discovery, subscribes to its event groups and hands the received events to
//! an [`EventSink`].

mod discovery_info;
mod event_receiver;
mod sink;
mod state;

pub use sink::{EventMetadata, EventSink};
pub use state::{SubscribeRetry, SubscriptionState};

use std::net::SocketAddrV4;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{RwLock, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use crate::Error;
use crate::discovery::{self, AttachedInstance, Attachment, Outbox, ServiceDiscovery, Target};
use crate::protocol::sd::{EventGroupEntry, ServiceEntry, TransportProtocol};
use crate::protocol::{Message, MessagePayload, MessageType};
use crate::service::Service;
use state::{ClientConfig, ClientState};

/// Tunables of a client instance
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClientOptions {
    pub retry: SubscribeRetry,
    /// Period of FindService entries while the service is not discovered
    pub find_interval: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            retry: SubscribeRetry::default(),
            find_interval: Duration::from_secs(1),
        }
    }
}

/// State of a client instance shared with the SD engine and the receive task
pub(crate) struct ClientShared {
    config: ClientConfig,
    state: RwLock<ClientState>,
    sink: RwLock<Option<Arc<dyn EventSink>>>,
    /// Endpoint of the discovered instance, if any
    discovered: watch::Sender<Option<SocketAddrV4>>,
}

impl ClientShared {
    pub(crate) fn service(&self) -> &Service {
        &self.config.service
    }

    pub(crate) fn instance_id(&self) -> u16 {
        self.config.instance_id
    }

    pub(crate) fn matches_offer(&self, offer: &ServiceEntry) -> bool {
        self.config.matches_offer(offer)
    }

    pub(crate) fn matches_event_group(&self, entry: &EventGroupEntry) -> bool {
        self.config.matches_event_group(entry)
    }

    /// Runs `update` on the state and publishes the resulting discovery status
    async fn update<R>(&self, update: impl FnOnce(&mut ClientState) -> R) -> R {
        let mut state = self.state.write().await;
        let result = update(&mut state);
        let endpoint = state.discovered().map(|offer| offer.endpoint);
        drop(state);
        self.discovered.send_if_modified(|current| {
            if *current == endpoint {
                false
            } else {
                *current = endpoint;
                true
            }
        });
        result
    }

    pub(crate) async fn on_attach(&self, now: Instant) {
        self.update(|state| state.on_attach(now)).await;
    }

    pub(crate) async fn next_deadline(&self) -> Option<Instant> {
        self.state.read().await.next_deadline()
    }

    pub(crate) async fn on_timer(&self, now: Instant, outbox: &mut Outbox) {
        self.update(|state| state.on_timer(&self.config, now, outbox))
            .await;
    }

    pub(crate) async fn handle_offer(
        &self,
        entry: &ServiceEntry,
        endpoint: Option<SocketAddrV4>,
        source: SocketAddrV4,
        now: Instant,
        outbox: &mut Outbox,
    ) {
        self.update(|state| state.handle_offer(&self.config, entry, endpoint, source, now, outbox))
            .await;
    }

    pub(crate) async fn handle_stop_offer(&self, source: SocketAddrV4, now: Instant) {
        self.update(|state| state.handle_stop_offer(source, now))
            .await;
    }

    pub(crate) async fn handle_ack(&self, entry: &EventGroupEntry, source: SocketAddrV4) {
        self.update(|state| state.handle_ack(entry, source)).await;
    }

    pub(crate) async fn handle_nack(&self, entry: &EventGroupEntry, source: SocketAddrV4) {
        self.update(|state| state.handle_nack(entry, source)).await;
    }

    pub(crate) async fn peer_rebooted(&self, source: SocketAddrV4, now: Instant) {
        self.update(|state| state.peer_rebooted(source, now)).await;
    }

    pub(crate) async fn withdraw(&self, outbox: &mut Outbox) {
        self.update(|state| state.withdraw(&self.config, outbox))
            .await;
    }

    /// Passes a notification received on the event socket to the sink
    async fn handle_datagram(&self, datagram: &[u8], source: SocketAddrV4) {
        let message = match Message::decode(datagram) {
            Ok(message) => message,
            Err(e) => {
                warn!(
                    "Dropping malformed datagram ({} bytes) from {}: {}",
                    datagram.len(),
                    source,
                    e
                );
                return;
            }
        };
        let header = message.header();
        if message.is_sd() || header.message_type.message_type() != MessageType::Notification {
            debug!(
                "Dropping {:?} message from {} on the event socket",
                header.message_type.message_type(),
                source
            );
            return;
        }
        if header.message_type.is_tp() {
            debug!("Dropping segmented notification from {}", source);
            return;
        }
        let service_id = header.message_id.service_id();
        let event_id = header.message_id.method_id();
        if service_id != self.config.service.service_id {
            debug!(
                "Dropping notification of foreign service 0x{:04X} from {}",
                service_id, source
            );
            return;
        }

        let instance_id = {
            let state = self.state.read().await;
            if !state.accepts_event(&self.config, event_id) {
                debug!(
                    "Dropping event 0x{:04X} of service 0x{:04X}: not subscribed",
                    event_id, service_id
                );
                return;
            }
            state
                .discovered()
                .map_or(self.config.instance_id, |offer| offer.instance_id)
        };
        let Some(sink) = self.sink.read().await.clone() else {
            debug!("No callback registered for service 0x{:04X}", service_id);
            return;
        };
        let MessagePayload::Custom(payload) = message.payload() else {
            return;
        };

        let metadata = EventMetadata {
            service_id,
            instance_id,
            event_id,
            session_id: header.session_id,
            interface_version: header.interface_version,
            source,
        };
        trace!("Event {:?} with {} bytes", metadata, payload.len());
        if catch_unwind(AssertUnwindSafe(|| sink.on_event(&metadata, payload))).is_err() {
            error!(
                "Callback for event 0x{:04X} of service 0x{:04X} panicked",
                event_id, service_id
            );
        }
    }
}

/// A remote service instance this node consumes events of
///
/// The instance owns the UDP socket events are received on. Dropping it stops
/// the receive task.
pub struct ClientServiceInstance {
    shared: Arc<ClientShared>,
    sd: ServiceDiscovery,
    _receiver_shutdown: oneshot::Sender<()>,
}

impl ClientServiceInstance {
    /// Create a client instance receiving events on `endpoint`.
    ///
    /// `ttl` is the TTL in seconds of the subscriptions this instance requests.
    /// Port 0 binds an ephemeral port; subscriptions carry the address actually bound.
    pub async fn new(
        service: Service,
        instance_id: u16,
        endpoint: SocketAddrV4,
        ttl: u32,
        sd: &ServiceDiscovery,
        protocol: TransportProtocol,
    ) -> Result<Self, Error> {
        Self::with_options(
            service,
            instance_id,
            endpoint,
            ttl,
            sd,
            protocol,
            ClientOptions::default(),
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn with_options(
        service: Service,
        instance_id: u16,
        endpoint: SocketAddrV4,
        ttl: u32,
        sd: &ServiceDiscovery,
        protocol: TransportProtocol,
        options: ClientOptions,
    ) -> Result<Self, Error> {
        if protocol != TransportProtocol::Udp {
            return Err(Error::UnsupportedTransport);
        }
        let socket = discovery::socket::bind_unicast(endpoint)?;
        let endpoint = discovery::socket::local_v4(&socket, sd.config().interface)?;
        info!(
            "Client bound to {} for service 0x{:04X}, instance 0x{:04X}",
            endpoint, service.service_id, instance_id
        );
        let config = ClientConfig {
            service,
            instance_id,
            endpoint,
            ttl,
            retry: options.retry,
            find_interval: options.find_interval,
        };
        let (discovered, _) = watch::channel(None);
        let shared = Arc::new(ClientShared {
            config,
            state: RwLock::new(ClientState::new()),
            sink: RwLock::new(None),
            discovered,
        });
        let (receiver_shutdown, shutdown) = oneshot::channel();
        event_receiver::spawn(socket, Arc::clone(&shared), shutdown);
        Ok(Self {
            shared,
            sd: sd.clone(),
            _receiver_shutdown: receiver_shutdown,
        })
    }

    pub fn service(&self) -> &Service {
        self.shared.service()
    }

    pub fn instance_id(&self) -> u16 {
        self.shared.instance_id()
    }

    /// Endpoint events are received on
    pub fn local_endpoint(&self) -> SocketAddrV4 {
        self.shared.config.endpoint
    }

    /// Register the sink for received events, replacing an earlier one.
    pub async fn register_callback<S>(&self, sink: S)
    where
        S: EventSink + 'static,
    {
        *self.shared.sink.write().await = Some(Arc::new(sink));
    }

    /// Subscribe to `event_group_id` of the discovered instance.
    ///
    /// Returns once the Subscribe is queued; the handshake completes in the
    /// background, see [`Self::subscription_state`].
    pub async fn subscribe_eventgroup(&self, event_group_id: u16) -> Result<(), Error> {
        if self.sd.is_closed() {
            return Err(Error::EngineClosed);
        }
        let now = Instant::now();
        let queued = {
            let mut state = self.shared.state.write().await;
            state.subscribe(&self.shared.config, event_group_id, now)?
        };
        if queued {
            debug!(
                "Subscribing to event group 0x{:04X} of service 0x{:04X}",
                event_group_id,
                self.service().service_id
            );
            if let Err(e) = self.sd.wake().await {
                self.shared
                    .state
                    .write()
                    .await
                    .abort_subscribe(event_group_id);
                return Err(e);
            }
        }
        Ok(())
    }

    /// Send a StopSubscribe for `event_group_id` and forget the subscription.
    pub async fn stop_subscribe_eventgroup(&self, event_group_id: u16) -> Result<(), Error> {
        let stop = {
            let mut state = self.shared.state.write().await;
            state.stop_subscribe(&self.shared.config, event_group_id)?
        };
        match stop {
            Some((sd_endpoint, header)) => {
                self.sd.send(Target::Unicast(sd_endpoint), header).await
            }
            None => Ok(()),
        }
    }

    pub async fn subscription_state(&self, event_group_id: u16) -> SubscriptionState {
        self.shared.state.read().await.subscription_state(event_group_id)
    }

    /// Endpoint of the discovered service instance, `None` until discovered
    /// or after its offer expired or was stopped.
    pub fn remote_endpoint(&self) -> Option<SocketAddrV4> {
        *self.shared.discovered.borrow()
    }

    pub fn is_discovered(&self) -> bool {
        self.remote_endpoint().is_some()
    }

    /// Wait until the service instance is discovered, at most `timeout`.
    pub async fn wait_discovered(&self, timeout: Duration) -> Result<SocketAddrV4, Error> {
        let mut discovered = self.shared.discovered.subscribe();
        let not_discovered = Error::NotDiscovered {
            service_id: self.service().service_id,
            instance_id: self.instance_id(),
        };
        match tokio::time::timeout(timeout, discovered.wait_for(Option::is_some)).await {
            Ok(Ok(endpoint)) => (*endpoint).ok_or(not_discovered),
            Ok(Err(_)) | Err(_) => Err(not_discovered),
        }
    }
}

impl std::fmt::Debug for ClientServiceInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientServiceInstance")
            .field("service_id", &self.service().service_id)
            .field("instance_id", &self.instance_id())
            .field("local_endpoint", &self.local_endpoint())
            .finish()
    }
}

/// Dropping an instance sends StopSubscribe for its event groups.
impl Drop for ClientServiceInstance {
    fn drop(&mut self) {
        self.sd.detach(AttachedInstance::Client(Arc::clone(&self.shared)));
    }
}

impl From<&ClientServiceInstance> for Attachment {
    fn from(instance: &ClientServiceInstance) -> Self {
        Attachment(AttachedInstance::Client(Arc::clone(&instance.shared)))
    }
}
