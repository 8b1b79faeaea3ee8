//! Discovery and subscription state machine of one client instance

use std::collections::BTreeMap;
use std::net::SocketAddrV4;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::discovery_info::DiscoveredInstance;
use crate::{
    Error,
    discovery::{Outbox, Target},
    protocol::sd::{
        self, ANY_INSTANCE, ANY_MAJOR_VERSION, COUNTER_MASK, Entry, EventGroupEntry, Options,
        ServiceEntry,
    },
    service::Service,
};

/// Handshake state of one event group subscription
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubscriptionState {
    Unsubscribed,
    /// Subscribe sent, waiting for the SubscribeAck
    Pending,
    Subscribed,
    /// The server answered with a Nack
    Rejected,
    /// No SubscribeAck within [`SubscribeRetry::max_attempts`]
    TimedOut,
}

/// Resend policy for unanswered Subscribe entries
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubscribeRetry {
    /// Time to wait for a SubscribeAck before resending
    pub interval: Duration,
    /// Number of Subscribe entries sent before giving up, `None` retries forever
    pub max_attempts: Option<u32>,
}

impl Default for SubscribeRetry {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            max_attempts: None,
        }
    }
}

/// Fixed properties of a client instance
#[derive(Debug, Clone)]
pub(crate) struct ClientConfig {
    pub service: Service,
    pub instance_id: u16,
    /// Local endpoint events are received on
    pub endpoint: SocketAddrV4,
    /// TTL of FindService and Subscribe entries, in seconds
    pub ttl: u32,
    pub retry: SubscribeRetry,
    pub find_interval: Duration,
}

impl ClientConfig {
    pub fn matches_offer(&self, offer: &ServiceEntry) -> bool {
        offer.service_id == self.service.service_id
            && (self.instance_id == ANY_INSTANCE || offer.instance_id == self.instance_id)
            && (self.service.major_version == ANY_MAJOR_VERSION
                || offer.major_version == self.service.major_version)
    }

    pub fn matches_event_group(&self, entry: &EventGroupEntry) -> bool {
        entry.service_id == self.service.service_id
            && (self.instance_id == ANY_INSTANCE || entry.instance_id == self.instance_id)
            && self.service.event_group(entry.event_group_id).is_some()
    }

    fn subscribe_entry(
        &self,
        offer: &DiscoveredInstance,
        event_group_id: u16,
        ttl: u32,
        counter: u8,
    ) -> (Entry, Vec<Options>) {
        (
            Entry::SubscribeEventGroup(EventGroupEntry::new(
                self.service.service_id,
                offer.instance_id,
                offer.major_version,
                ttl,
                counter,
                event_group_id,
            )),
            vec![Options::udp_endpoint(self.endpoint)],
        )
    }
}

#[derive(Debug)]
struct EventGroupSubscription {
    state: SubscriptionState,
    counter: u8,
    /// Subscribe entries sent in the current handshake
    attempts: u32,
    next_retry: Option<Instant>,
}

impl EventGroupSubscription {
    fn new() -> Self {
        Self {
            state: SubscriptionState::Unsubscribed,
            counter: 0,
            attempts: 0,
            next_retry: None,
        }
    }

    /// Starts a new handshake, the first Subscribe going out at `now`
    fn restart(&mut self, now: Instant) {
        self.state = SubscriptionState::Pending;
        self.counter = 0;
        self.attempts = 0;
        self.next_retry = Some(now);
    }

    fn reset(&mut self) {
        self.state = SubscriptionState::Unsubscribed;
        self.attempts = 0;
        self.next_retry = None;
    }

    fn is_active(&self) -> bool {
        matches!(
            self.state,
            SubscriptionState::Pending | SubscriptionState::Subscribed
        )
    }
}

fn send_subscribe(
    config: &ClientConfig,
    offer: &DiscoveredInstance,
    event_group_id: u16,
    subscription: &mut EventGroupSubscription,
    now: Instant,
    outbox: &mut Outbox,
) {
    let (entry, options) =
        config.subscribe_entry(offer, event_group_id, config.ttl, subscription.counter);
    outbox.push(Target::Unicast(offer.sd_endpoint), entry, options);
    subscription.attempts += 1;
    subscription.next_retry = Some(now + config.retry.interval);
}

#[derive(Debug, Default)]
pub(crate) struct ClientState {
    attached: bool,
    offer: Option<DiscoveredInstance>,
    next_find: Option<Instant>,
    /// Event groups the application subscribed to
    subscriptions: BTreeMap<u16, EventGroupSubscription>,
}

impl ClientState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn discovered(&self) -> Option<&DiscoveredInstance> {
        self.offer.as_ref()
    }

    pub fn subscription_state(&self, event_group_id: u16) -> SubscriptionState {
        self.subscriptions
            .get(&event_group_id)
            .map_or(SubscriptionState::Unsubscribed, |s| s.state)
    }

    /// Whether `event_id` belongs to an event group with a completed handshake
    pub fn accepts_event(&self, config: &ClientConfig, event_id: u16) -> bool {
        config
            .service
            .event_groups_of(event_id)
            .any(|id| self.subscription_state(id) == SubscriptionState::Subscribed)
    }

    pub fn on_attach(&mut self, now: Instant) {
        self.attached = true;
        if self.offer.is_none() {
            self.next_find = Some(now);
        }
    }

    /// Queues the handshake for `event_group_id`.
    ///
    /// Returns `true` if a Subscribe has to go out, `false` if the event group
    /// is already pending or subscribed.
    pub fn subscribe(
        &mut self,
        config: &ClientConfig,
        event_group_id: u16,
        now: Instant,
    ) -> Result<bool, Error> {
        if config.service.event_group(event_group_id).is_none() {
            return Err(Error::UnknownEventGroup {
                service_id: config.service.service_id,
                event_group_id,
            });
        }
        if self.offer.is_none() {
            return Err(Error::NotDiscovered {
                service_id: config.service.service_id,
                instance_id: config.instance_id,
            });
        }
        let subscription = self
            .subscriptions
            .entry(event_group_id)
            .or_insert_with(EventGroupSubscription::new);
        if subscription.is_active() {
            return Ok(false);
        }
        subscription.restart(now);
        Ok(true)
    }

    /// Undoes a [`ClientState::subscribe`] the engine never got to act on.
    pub fn abort_subscribe(&mut self, event_group_id: u16) {
        if let Some(subscription) = self.subscriptions.get_mut(&event_group_id) {
            subscription.reset();
        }
    }

    /// Forgets `event_group_id`.
    ///
    /// Returns the SD endpoint and StopSubscribe message to send if the
    /// subscription was pending or established.
    pub fn stop_subscribe(
        &mut self,
        config: &ClientConfig,
        event_group_id: u16,
    ) -> Result<Option<(SocketAddrV4, sd::Header)>, Error> {
        if config.service.event_group(event_group_id).is_none() {
            return Err(Error::UnknownEventGroup {
                service_id: config.service.service_id,
                event_group_id,
            });
        }
        let Some(subscription) = self.subscriptions.remove(&event_group_id) else {
            return Ok(None);
        };
        let stop = match &self.offer {
            Some(offer) if subscription.is_active() => {
                let (entry, options) =
                    config.subscribe_entry(offer, event_group_id, 0, subscription.counter);
                Some((
                    offer.sd_endpoint,
                    sd::Header::new(sd::Flags::new_sd(true)).with_entry(entry, options),
                ))
            }
            _ => None,
        };
        Ok(stop)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        let offer_expiry = self.offer.as_ref().and_then(|offer| offer.expires);
        let next_retry = self
            .subscriptions
            .values()
            .filter(|s| s.state == SubscriptionState::Pending)
            .filter_map(|s| s.next_retry)
            .min();
        [offer_expiry, next_retry, self.next_find]
            .into_iter()
            .flatten()
            .min()
    }

    pub fn on_timer(&mut self, config: &ClientConfig, now: Instant, outbox: &mut Outbox) {
        if self.offer.as_ref().is_some_and(|offer| offer.is_expired(now)) {
            info!(
                "Offer of service 0x{:04X} expired without refresh",
                config.service.service_id
            );
            self.lose_offer(now);
        }

        if let Some(offer) = &self.offer {
            for (&event_group_id, subscription) in &mut self.subscriptions {
                let due = subscription.state == SubscriptionState::Pending
                    && subscription.next_retry.is_some_and(|at| at <= now);
                if !due {
                    continue;
                }
                if subscription.attempts > 0 {
                    if config
                        .retry
                        .max_attempts
                        .is_some_and(|max| subscription.attempts >= max)
                    {
                        warn!(
                            "Giving up on event group 0x{:04X} of service 0x{:04X}: {}",
                            event_group_id,
                            config.service.service_id,
                            Error::HandshakeTimeout(event_group_id)
                        );
                        subscription.state = SubscriptionState::TimedOut;
                        subscription.next_retry = None;
                        continue;
                    }
                    subscription.counter = (subscription.counter + 1) & COUNTER_MASK;
                    debug!(
                        "Resending Subscribe for event group 0x{:04X} (attempt {})",
                        event_group_id,
                        subscription.attempts + 1
                    );
                }
                send_subscribe(config, offer, event_group_id, subscription, now, outbox);
            }
        }

        if self.attached && self.offer.is_none() && self.next_find.is_some_and(|at| at <= now) {
            outbox.push(
                Target::Multicast,
                Entry::find_service(
                    config.service.service_id,
                    config.instance_id,
                    config.service.major_version,
                    config.ttl,
                ),
                Vec::new(),
            );
            self.next_find = Some(now + config.find_interval);
        }
    }

    pub fn handle_offer(
        &mut self,
        config: &ClientConfig,
        entry: &ServiceEntry,
        endpoint: Option<SocketAddrV4>,
        source: SocketAddrV4,
        now: Instant,
        outbox: &mut Outbox,
    ) {
        let Some(endpoint) = endpoint else {
            warn!(
                "Ignoring offer of service 0x{:04X} from {} without UDP endpoint",
                entry.service_id, source
            );
            return;
        };
        match &mut self.offer {
            Some(offer) if offer.is_same_offer(entry, source) => {
                offer.refresh(entry, endpoint, now)
            }
            Some(offer) => {
                debug!(
                    "Ignoring offer of service 0x{:04X} from {}, already using {}",
                    entry.service_id, source, offer.sd_endpoint
                );
                return;
            }
            None => {
                let offer = DiscoveredInstance::from_offer(entry, endpoint, source, now);
                info!("Discovered service 0x{:04X}: {}", entry.service_id, offer);
                self.offer = Some(offer);
                self.next_find = None;
            }
        }

        let Some(offer) = &self.offer else {
            return;
        };
        for (&event_group_id, subscription) in &mut self.subscriptions {
            match subscription.state {
                // refresh, keeps the entry in the server registry alive
                SubscriptionState::Subscribed => {
                    send_subscribe(config, offer, event_group_id, subscription, now, outbox);
                    subscription.next_retry = None;
                }
                SubscriptionState::Unsubscribed => {
                    subscription.restart(now);
                    send_subscribe(config, offer, event_group_id, subscription, now, outbox);
                }
                SubscriptionState::Pending
                | SubscriptionState::Rejected
                | SubscriptionState::TimedOut => {}
            }
        }
    }

    pub fn handle_stop_offer(&mut self, source: SocketAddrV4, now: Instant) {
        if self
            .offer
            .as_ref()
            .is_some_and(|offer| offer.sd_endpoint == source)
        {
            info!("Service stopped by {}", source);
            self.lose_offer(now);
        }
    }

    pub fn peer_rebooted(&mut self, source: SocketAddrV4, now: Instant) {
        self.handle_stop_offer(source, now);
    }

    fn from_offering_node(&self, entry: &EventGroupEntry, source: SocketAddrV4) -> bool {
        self.offer.as_ref().is_some_and(|offer| {
            offer.sd_endpoint == source && offer.instance_id == entry.instance_id
        })
    }

    pub fn handle_ack(&mut self, entry: &EventGroupEntry, source: SocketAddrV4) {
        if !self.from_offering_node(entry, source) {
            debug!("Ignoring SubscribeAck from {}", source);
            return;
        }
        if let Some(subscription) = self.subscriptions.get_mut(&entry.event_group_id) {
            if subscription.is_active() {
                if subscription.state == SubscriptionState::Pending {
                    info!(
                        "Subscribed to event group 0x{:04X} of service 0x{:04X}",
                        entry.event_group_id, entry.service_id
                    );
                }
                subscription.state = SubscriptionState::Subscribed;
                subscription.attempts = 0;
                subscription.next_retry = None;
            }
        }
    }

    pub fn handle_nack(&mut self, entry: &EventGroupEntry, source: SocketAddrV4) {
        if !self.from_offering_node(entry, source) {
            debug!("Ignoring SubscribeNack from {}", source);
            return;
        }
        if let Some(subscription) = self.subscriptions.get_mut(&entry.event_group_id) {
            if subscription.is_active() {
                warn!(
                    "Subscription to event group 0x{:04X} of service 0x{:04X} rejected",
                    entry.event_group_id, entry.service_id
                );
                subscription.state = SubscriptionState::Rejected;
                subscription.next_retry = None;
            }
        }
    }

    /// Queues StopSubscribe entries for every active subscription and stops finding
    pub fn withdraw(&mut self, config: &ClientConfig, outbox: &mut Outbox) {
        self.attached = false;
        self.next_find = None;
        for (&event_group_id, subscription) in &mut self.subscriptions {
            if let Some(offer) = &self.offer {
                if subscription.is_active() {
                    let (entry, options) =
                        config.subscribe_entry(offer, event_group_id, 0, subscription.counter);
                    outbox.push(Target::Unicast(offer.sd_endpoint), entry, options);
                }
            }
            subscription.reset();
        }
    }

    fn lose_offer(&mut self, now: Instant) {
        self.offer = None;
        for subscription in self.subscriptions.values_mut() {
            subscription.reset();
        }
        if self.attached {
            self.next_find = Some(now);
        }
    }
}
