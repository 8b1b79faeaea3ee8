//! Offer and subscription state of one server instance

use std::net::SocketAddrV4;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::subscription_manager::{Subscriber, SubscriptionManager};
use crate::{
    discovery::{Outbox, Target},
    protocol::sd::{
        self, ANY_INSTANCE, ANY_MAJOR_VERSION, ANY_SERVICE, Entry, EventGroupEntry, Options,
        ServiceEntry,
    },
    service::Service,
};

/// Fixed properties of an offered service instance
#[derive(Debug, Clone)]
pub(crate) struct InstanceConfig {
    pub service: Service,
    pub instance_id: u16,
    pub endpoint: SocketAddrV4,
    pub ttl: u32,
    pub cyclic_offer_delay: Duration,
}

impl InstanceConfig {
    fn offer_entry(&self, ttl: u32) -> Entry {
        Entry::offer_service(
            self.service.service_id,
            self.instance_id,
            self.service.major_version,
            self.service.minor_version,
            ttl,
        )
    }

    fn endpoint_option(&self) -> Vec<Options> {
        vec![Options::udp_endpoint(self.endpoint)]
    }

    pub fn matches_find(&self, find: &ServiceEntry) -> bool {
        (find.service_id == self.service.service_id || find.service_id == ANY_SERVICE)
            && (find.instance_id == self.instance_id || find.instance_id == ANY_INSTANCE)
            && (find.major_version == self.service.major_version
                || find.major_version == ANY_MAJOR_VERSION)
    }

    pub fn hosts(&self, entry: &EventGroupEntry) -> bool {
        entry.service_id == self.service.service_id && entry.instance_id == self.instance_id
    }
}

#[derive(Debug, Default)]
pub(crate) struct ServerState {
    offering: bool,
    next_offer: Option<Instant>,
    subscriptions: SubscriptionManager,
}

impl ServerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_offering(&self) -> bool {
        self.offering
    }

    /// Activates offering, the first offer going out after `initial_delay`.
    ///
    /// Returns `false` if the instance was already offering.
    pub fn start_offer(&mut self, now: Instant, initial_delay: Duration) -> bool {
        if self.offering {
            return false;
        }
        self.offering = true;
        self.next_offer = Some(now + initial_delay);
        true
    }

    /// Deactivates offering and clears the registry.
    ///
    /// Returns the StopOffer message to multicast, or `None` if the instance was not offering.
    pub fn stop_offer(&mut self, config: &InstanceConfig) -> Option<sd::Header> {
        self.deactivate().then(|| {
            sd::Header::new(sd::Flags::new_sd(true))
                .with_entry(config.offer_entry(0), config.endpoint_option())
        })
    }

    fn deactivate(&mut self) -> bool {
        if !self.offering {
            return false;
        }
        self.offering = false;
        self.next_offer = None;
        self.subscriptions.clear();
        true
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.next_offer
    }

    pub fn on_timer(&mut self, config: &InstanceConfig, now: Instant, outbox: &mut Outbox) {
        let purged = self.subscriptions.remove_expired(now);
        if purged > 0 {
            debug!(
                "Expired {} subscriptions of service 0x{:04X}/0x{:04X}",
                purged, config.service.service_id, config.instance_id
            );
        }
        match self.next_offer {
            Some(next_offer) if self.offering && next_offer <= now => {
                outbox.push(
                    Target::Multicast,
                    config.offer_entry(config.ttl),
                    config.endpoint_option(),
                );
                self.next_offer = Some(now + config.cyclic_offer_delay);
            }
            _ => {}
        }
    }

    pub fn handle_find(&self, config: &InstanceConfig, source: SocketAddrV4, outbox: &mut Outbox) {
        if !self.offering {
            return;
        }
        debug!(
            "Answering FindService for 0x{:04X}/0x{:04X} from {}",
            config.service.service_id, config.instance_id, source
        );
        outbox.push(
            Target::Unicast(source),
            config.offer_entry(config.ttl),
            config.endpoint_option(),
        );
    }

    pub fn handle_subscribe(
        &mut self,
        config: &InstanceConfig,
        entry: &EventGroupEntry,
        endpoint: Option<SocketAddrV4>,
        source: SocketAddrV4,
        now: Instant,
        outbox: &mut Outbox,
    ) {
        let reply = match self.validate_subscribe(config, entry, endpoint) {
            Ok(address) => {
                self.subscriptions.subscribe(
                    entry.service_id,
                    entry.instance_id,
                    entry.event_group_id,
                    Subscriber {
                        address,
                        sd_endpoint: source,
                        expires: sd::ttl_duration(entry.ttl).map(|ttl| now + ttl),
                    },
                );
                entry.reply(entry.ttl)
            }
            Err(reason) => {
                warn!(
                    "Rejecting subscription of {} to event group 0x{:04X} of service 0x{:04X}: {}",
                    source, entry.event_group_id, entry.service_id, reason
                );
                entry.reply(0)
            }
        };
        outbox.push(
            Target::Unicast(source),
            Entry::SubscribeAckEventGroup(reply),
            Vec::new(),
        );
    }

    fn validate_subscribe(
        &self,
        config: &InstanceConfig,
        entry: &EventGroupEntry,
        endpoint: Option<SocketAddrV4>,
    ) -> Result<SocketAddrV4, &'static str> {
        if !self.offering {
            return Err("service is not offered");
        }
        if entry.major_version != config.service.major_version
            && entry.major_version != ANY_MAJOR_VERSION
        {
            return Err("major version mismatch");
        }
        if config.service.event_group(entry.event_group_id).is_none() {
            return Err("unknown event group");
        }
        endpoint.ok_or("no UDP endpoint option")
    }

    pub fn handle_stop_subscribe(
        &mut self,
        entry: &EventGroupEntry,
        endpoint: Option<SocketAddrV4>,
        source: SocketAddrV4,
    ) {
        let address = match endpoint {
            Some(address) => address,
            None => {
                // without option, drop whatever this peer subscribed to the event group
                let Some(subscriber) = self
                    .subscriptions
                    .get_subscribers(
                        entry.service_id,
                        entry.instance_id,
                        entry.event_group_id,
                        Instant::now(),
                    )
                    .into_iter()
                    .find(|s| s.sd_endpoint == source)
                else {
                    return;
                };
                subscriber.address
            }
        };
        self.subscriptions.unsubscribe(
            entry.service_id,
            entry.instance_id,
            entry.event_group_id,
            address,
        );
    }

    pub fn peer_rebooted(&mut self, source: SocketAddrV4) {
        let removed = self.subscriptions.unsubscribe_peer(source);
        if removed > 0 {
            info!("Dropped {} subscriptions of rebooted peer {}", removed, source);
        }
    }

    /// Queues the StopOffer of an offering instance and deactivates it
    pub fn withdraw(&mut self, config: &InstanceConfig, outbox: &mut Outbox) {
        if self.deactivate() {
            outbox.push(
                Target::Multicast,
                config.offer_entry(0),
                config.endpoint_option(),
            );
        }
    }

    pub fn subscribers(
        &self,
        config: &InstanceConfig,
        event_group_id: u16,
        now: Instant,
    ) -> Vec<Subscriber> {
        if !self.offering {
            return Vec::new();
        }
        self.subscriptions.get_subscribers(
            config.service.service_id,
            config.instance_id,
            event_group_id,
            now,
        )
    }
}
