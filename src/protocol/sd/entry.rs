use byteorder::{ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

use crate::{protocol::Error, traits::WireFormat};

use super::{EventGroupEntry, ServiceEntry};

pub const ENTRY_SIZE: usize = 16;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum EntryType {
    FindService,
    OfferService,
    Subscribe,
    SubscribeAck,
}

impl TryFrom<u8> for EntryType {
    type Error = Error;
    fn try_from(value: u8) -> Result<Self, Error> {
        match value {
            0x00 => Ok(EntryType::FindService),
            0x01 => Ok(EntryType::OfferService),
            0x06 => Ok(EntryType::Subscribe),
            0x07 => Ok(EntryType::SubscribeAck),
            _ => Err(Error::InvalidSDEntryType(value)),
        }
    }
}

impl From<EntryType> for u8 {
    fn from(service_entry_type: EntryType) -> u8 {
        match service_entry_type {
            EntryType::FindService => 0x00,
            EntryType::OfferService => 0x01,
            EntryType::Subscribe => 0x06,
            EntryType::SubscribeAck => 0x07,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct OptionsCount {
    pub first_options_count: u8,
    pub second_options_count: u8,
}

impl From<u8> for OptionsCount {
    fn from(value: u8) -> Self {
        let first_options_count = (value & 0xf0) >> 4;
        let second_options_count = value & 0x0f;

        Self {
            first_options_count,
            second_options_count,
        }
    }
}

impl From<OptionsCount> for u8 {
    fn from(options_count: OptionsCount) -> u8 {
        ((options_count.first_options_count << 4) & 0xf0)
            | (options_count.second_options_count & 0x0f)
    }
}

impl OptionsCount {
    /// # Panics
    /// If either count does not fit in a nibble.
    pub fn new(first_options_count: u8, second_options_count: u8) -> Self {
        assert!(first_options_count < 16);
        assert!(second_options_count < 16);
        OptionsCount {
            first_options_count,
            second_options_count,
        }
    }
}

/// What an entry means once the TTL=0 forms are taken into account.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum EntryKind {
    FindService,
    OfferService,
    StopOfferService,
    SubscribeEventGroup,
    StopSubscribeEventGroup,
    SubscribeEventGroupAck,
    SubscribeEventGroupNack,
}

/// A Service Discovery entry as it appears on the wire.
///
/// The stop and negative-acknowledge forms share the type code of their
/// positive counterpart and are distinguished by a TTL of zero, see [`Entry::kind`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Entry {
    FindService(ServiceEntry),
    OfferService(ServiceEntry),
    SubscribeEventGroup(EventGroupEntry),
    SubscribeAckEventGroup(EventGroupEntry),
}

impl Entry {
    pub fn find_service(service_id: u16, instance_id: u16, major_version: u8, ttl: u32) -> Self {
        Entry::FindService(ServiceEntry::new(
            service_id,
            instance_id,
            major_version,
            super::ANY_MINOR_VERSION,
            ttl,
        ))
    }

    pub fn offer_service(
        service_id: u16,
        instance_id: u16,
        major_version: u8,
        minor_version: u32,
        ttl: u32,
    ) -> Self {
        Entry::OfferService(ServiceEntry::new(
            service_id,
            instance_id,
            major_version,
            minor_version,
            ttl,
        ))
    }

    pub fn stop_offer_service(
        service_id: u16,
        instance_id: u16,
        major_version: u8,
        minor_version: u32,
    ) -> Self {
        Self::offer_service(service_id, instance_id, major_version, minor_version, 0)
    }

    pub fn kind(&self) -> EntryKind {
        let withdrawn = self.ttl() == 0;
        match (self, withdrawn) {
            (Entry::FindService(_), _) => EntryKind::FindService,
            (Entry::OfferService(_), false) => EntryKind::OfferService,
            (Entry::OfferService(_), true) => EntryKind::StopOfferService,
            (Entry::SubscribeEventGroup(_), false) => EntryKind::SubscribeEventGroup,
            (Entry::SubscribeEventGroup(_), true) => EntryKind::StopSubscribeEventGroup,
            (Entry::SubscribeAckEventGroup(_), false) => EntryKind::SubscribeEventGroupAck,
            (Entry::SubscribeAckEventGroup(_), true) => EntryKind::SubscribeEventGroupNack,
        }
    }

    pub fn service_id(&self) -> u16 {
        match self {
            Entry::FindService(e) | Entry::OfferService(e) => e.service_id,
            Entry::SubscribeEventGroup(e) | Entry::SubscribeAckEventGroup(e) => e.service_id,
        }
    }

    pub fn instance_id(&self) -> u16 {
        match self {
            Entry::FindService(e) | Entry::OfferService(e) => e.instance_id,
            Entry::SubscribeEventGroup(e) | Entry::SubscribeAckEventGroup(e) => e.instance_id,
        }
    }

    pub fn major_version(&self) -> u8 {
        match self {
            Entry::FindService(e) | Entry::OfferService(e) => e.major_version,
            Entry::SubscribeEventGroup(e) | Entry::SubscribeAckEventGroup(e) => e.major_version,
        }
    }

    pub fn ttl(&self) -> u32 {
        match self {
            Entry::FindService(e) | Entry::OfferService(e) => e.ttl,
            Entry::SubscribeEventGroup(e) | Entry::SubscribeAckEventGroup(e) => e.ttl,
        }
    }

    fn option_fields(&self) -> (u8, u8, OptionsCount) {
        match self {
            Entry::FindService(e) | Entry::OfferService(e) => (
                e.index_first_options_run,
                e.index_second_options_run,
                e.options_count,
            ),
            Entry::SubscribeEventGroup(e) | Entry::SubscribeAckEventGroup(e) => (
                e.index_first_options_run,
                e.index_second_options_run,
                e.options_count,
            ),
        }
    }

    pub fn first_options_run(&self) -> (u8, u8) {
        let (index, _, count) = self.option_fields();
        (index, count.first_options_count)
    }

    pub fn second_options_run(&self) -> (u8, u8) {
        let (_, index, count) = self.option_fields();
        (index, count.second_options_count)
    }

    pub fn first_options_count(&self) -> u8 {
        self.first_options_run().1
    }

    pub fn second_options_count(&self) -> u8 {
        self.second_options_run().1
    }

    /// Points the first options run of this entry at `count` options starting at `index`.
    pub fn set_first_options_run(&mut self, index: u8, count: u8) {
        match self {
            Entry::FindService(e) | Entry::OfferService(e) => {
                e.index_first_options_run = index;
                e.options_count.first_options_count = count & 0x0f;
            }
            Entry::SubscribeEventGroup(e) | Entry::SubscribeAckEventGroup(e) => {
                e.index_first_options_run = index;
                e.options_count.first_options_count = count & 0x0f;
            }
        }
    }
}

impl WireFormat for Entry {
    fn from_reader<R: Read>(reader: &mut R) -> Result<Self, Error> {
        let entry_type = EntryType::try_from(reader.read_u8()?)?;
        match entry_type {
            EntryType::FindService => {
                let service_entry = ServiceEntry::from_reader(reader)?;
                Ok(Entry::FindService(service_entry))
            }
            EntryType::OfferService => {
                let service_entry = ServiceEntry::from_reader(reader)?;
                Ok(Entry::OfferService(service_entry))
            }
            EntryType::Subscribe => {
                let event_group_entry = EventGroupEntry::from_reader(reader)?;
                Ok(Entry::SubscribeEventGroup(event_group_entry))
            }
            EntryType::SubscribeAck => {
                let event_group_entry = EventGroupEntry::from_reader(reader)?;
                Ok(Entry::SubscribeAckEventGroup(event_group_entry))
            }
        }
    }

    fn required_size(&self) -> usize {
        1 + match self {
            Entry::FindService(service_entry) => service_entry.required_size(),
            Entry::OfferService(service_entry) => service_entry.required_size(),
            Entry::SubscribeEventGroup(event_group_entry) => event_group_entry.required_size(),
            Entry::SubscribeAckEventGroup(event_group_entry) => event_group_entry.required_size(),
        }
    }

    fn to_writer<W: Write>(&self, writer: &mut W) -> Result<usize, Error> {
        let body_size = match self {
            Entry::FindService(service_entry) => {
                writer.write_u8(u8::from(EntryType::FindService))?;
                service_entry.to_writer(writer)
            }
            Entry::OfferService(service_entry) => {
                writer.write_u8(u8::from(EntryType::OfferService))?;
                service_entry.to_writer(writer)
            }
            Entry::SubscribeEventGroup(event_group_entry) => {
                writer.write_u8(u8::from(EntryType::Subscribe))?;
                event_group_entry.to_writer(writer)
            }
            Entry::SubscribeAckEventGroup(event_group_entry) => {
                writer.write_u8(u8::from(EntryType::SubscribeAck))?;
                event_group_entry.to_writer(writer)
            }
        }?;
        Ok(1 + body_size)
    }
}
