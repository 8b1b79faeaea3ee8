//! Manages event group subscriptions

use std::collections::HashMap;
use std::net::SocketAddrV4;

use tokio::time::Instant;

/// A client endpoint subscribed to an event group
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Subscriber {
    /// Endpoint events are sent to
    pub address: SocketAddrV4,
    /// SD endpoint the subscription came from
    pub sd_endpoint: SocketAddrV4,
    /// `None` for subscriptions with infinite TTL
    pub expires: Option<Instant>,
}

impl Subscriber {
    pub fn is_expired(&self, now: Instant) -> bool {
        self.expires.is_some_and(|expires| expires <= now)
    }
}

/// Manages subscriptions to event groups
#[derive(Debug, Default)]
pub(crate) struct SubscriptionManager {
    /// Map of (service_id, instance_id, event_group_id) -> list of subscribers
    subscriptions: HashMap<(u16, u16, u16), Vec<Subscriber>>,
}

impl SubscriptionManager {
    /// Add a subscriber to an event group, or refresh its expiry.
    ///
    /// Returns `true` if the subscriber was not subscribed before.
    pub fn subscribe(
        &mut self,
        service_id: u16,
        instance_id: u16,
        event_group_id: u16,
        subscriber: Subscriber,
    ) -> bool {
        let key = (service_id, instance_id, event_group_id);
        let subscribers = self.subscriptions.entry(key).or_default();

        if let Some(existing) = subscribers
            .iter_mut()
            .find(|s| s.address == subscriber.address)
        {
            tracing::debug!(
                "Refreshed existing subscriber {} for service 0x{:04X}, instance 0x{:04X}, event group 0x{:04X}",
                subscriber.address,
                service_id,
                instance_id,
                event_group_id
            );
            *existing = subscriber;
            return false;
        }

        tracing::info!(
            "New subscriber {} for service 0x{:04X}, instance 0x{:04X}, event group 0x{:04X}",
            subscriber.address,
            service_id,
            instance_id,
            event_group_id
        );
        subscribers.push(subscriber);
        true
    }

    /// Remove a subscriber from an event group
    pub fn unsubscribe(
        &mut self,
        service_id: u16,
        instance_id: u16,
        event_group_id: u16,
        subscriber_addr: SocketAddrV4,
    ) -> bool {
        let key = (service_id, instance_id, event_group_id);
        let Some(subscribers) = self.subscriptions.get_mut(&key) else {
            return false;
        };
        let before = subscribers.len();
        subscribers.retain(|s| s.address != subscriber_addr);
        let removed = subscribers.len() != before;
        if subscribers.is_empty() {
            self.subscriptions.remove(&key);
        }
        if removed {
            tracing::info!(
                "Removed subscriber {} from service 0x{:04X}, instance 0x{:04X}, event group 0x{:04X}",
                subscriber_addr,
                service_id,
                instance_id,
                event_group_id
            );
        }
        removed
    }

    /// Remove every subscription that came from the SD endpoint `sd_endpoint`
    pub fn unsubscribe_peer(&mut self, sd_endpoint: SocketAddrV4) -> usize {
        self.retain(|s| s.sd_endpoint != sd_endpoint)
    }

    /// Get all subscribers of an event group that have not expired at `now`
    pub fn get_subscribers(
        &self,
        service_id: u16,
        instance_id: u16,
        event_group_id: u16,
        now: Instant,
    ) -> Vec<Subscriber> {
        let key = (service_id, instance_id, event_group_id);
        self.subscriptions
            .get(&key)
            .map(|subscribers| {
                subscribers
                    .iter()
                    .filter(|s| !s.is_expired(now))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn remove_expired(&mut self, now: Instant) -> usize {
        self.retain(|s| !s.is_expired(now))
    }

    pub fn clear(&mut self) {
        self.subscriptions.clear();
    }

    /// Get total number of subscriptions, expired ones included until they are purged
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.values().map(|v| v.len()).sum()
    }

    fn retain(&mut self, keep: impl Fn(&Subscriber) -> bool) -> usize {
        let before = self.subscription_count();
        for subscribers in self.subscriptions.values_mut() {
            subscribers.retain(&keep);
        }
        self.subscriptions.retain(|_, subscribers| !subscribers.is_empty());
        before - self.subscription_count()
    }
}
