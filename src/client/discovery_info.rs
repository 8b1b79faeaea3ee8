use std::net::SocketAddrV4;

use tokio::time::Instant;

use crate::protocol::sd::{ServiceEntry, ttl_duration};

/// A remote service instance learned from an OfferService entry
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct DiscoveredInstance {
    pub instance_id: u16,
    pub major_version: u8,
    pub minor_version: u32,
    /// Endpoint announced in the offer
    pub endpoint: SocketAddrV4,
    /// SD endpoint of the offering node, subscriptions are sent there
    pub sd_endpoint: SocketAddrV4,
    /// `None` while the offer TTL is infinite
    pub expires: Option<Instant>,
}

impl DiscoveredInstance {
    pub fn from_offer(
        entry: &ServiceEntry,
        endpoint: SocketAddrV4,
        sd_endpoint: SocketAddrV4,
        now: Instant,
    ) -> Self {
        Self {
            instance_id: entry.instance_id,
            major_version: entry.major_version,
            minor_version: entry.minor_version,
            endpoint,
            sd_endpoint,
            expires: offer_expiry(now, entry.ttl),
        }
    }

    /// Whether `entry` received from `sd_endpoint` offers this same instance
    pub fn is_same_offer(&self, entry: &ServiceEntry, sd_endpoint: SocketAddrV4) -> bool {
        self.sd_endpoint == sd_endpoint && self.instance_id == entry.instance_id
    }

    pub fn refresh(&mut self, entry: &ServiceEntry, endpoint: SocketAddrV4, now: Instant) {
        self.endpoint = endpoint;
        self.minor_version = entry.minor_version;
        self.expires = offer_expiry(now, entry.ttl);
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.expires.is_some_and(|expires| expires <= now)
    }
}

impl std::fmt::Display for DiscoveredInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Instance ID: 0x{:04X}, Version: {}.{}, Endpoint: {}, SD: {}",
            self.instance_id,
            self.major_version,
            self.minor_version,
            self.endpoint,
            self.sd_endpoint
        )
    }
}

fn offer_expiry(now: Instant, ttl: u32) -> Option<Instant> {
    ttl_duration(ttl).map(|ttl| now + ttl)
}
