//! Service and event group definitions shared by clients and servers

/// A named bundle of events that is subscribed to as a unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventGroup {
    /// Event group ID
    pub id: u16,
    /// Events in this group (event IDs)
    pub event_ids: Vec<u16>,
}

impl EventGroup {
    /// Create a new event group
    #[must_use]
    pub fn new(id: u16, event_ids: Vec<u16>) -> Self {
        Self { id, event_ids }
    }

    pub fn contains_event(&self, event_id: u16) -> bool {
        self.event_ids.contains(&event_id)
    }
}

/// Information about a SOME/IP service, independent of any instance of it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Service {
    /// Service ID
    pub service_id: u16,
    /// Major version
    pub major_version: u8,
    /// Minor version
    pub minor_version: u32,
    /// Event groups this service provides
    pub event_groups: Vec<EventGroup>,
}

impl Service {
    pub fn builder() -> ServiceBuilder {
        ServiceBuilder::default()
    }

    pub fn event_group(&self, event_group_id: u16) -> Option<&EventGroup> {
        self.event_groups.iter().find(|eg| eg.id == event_group_id)
    }

    /// IDs of the event groups `event_id` belongs to
    pub fn event_groups_of(&self, event_id: u16) -> impl Iterator<Item = u16> + '_ {
        self.event_groups
            .iter()
            .filter(move |eg| eg.contains_event(event_id))
            .map(|eg| eg.id)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ServiceBuilder {
    service_id: u16,
    major_version: u8,
    minor_version: u32,
    event_groups: Vec<EventGroup>,
}

impl ServiceBuilder {
    pub fn service_id(mut self, service_id: u16) -> Self {
        self.service_id = service_id;
        self
    }

    pub fn major_version(mut self, major_version: u8) -> Self {
        self.major_version = major_version;
        self
    }

    pub fn minor_version(mut self, minor_version: u32) -> Self {
        self.minor_version = minor_version;
        self
    }

    /// Adds an event group, replacing an earlier one with the same ID.
    pub fn eventgroup(mut self, event_group: EventGroup) -> Self {
        self.event_groups.retain(|eg| eg.id != event_group.id);
        self.event_groups.push(event_group);
        self
    }

    pub fn build(self) -> Service {
        Service {
            service_id: self.service_id,
            major_version: self.major_version,
            minor_version: self.minor_version,
            event_groups: self.event_groups,
        }
    }
}
