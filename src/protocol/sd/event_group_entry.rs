use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::traits::WireFormat;

use super::entry::OptionsCount;

/// Only the low nibble of the 16 bit reserved/counter field carries the counter
pub const COUNTER_MASK: u8 = 0x0f;

/// Body of a Subscribe or SubscribeAck entry, i.e. everything after the type byte.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EventGroupEntry {
    pub index_first_options_run: u8,
    pub index_second_options_run: u8,
    pub options_count: OptionsCount,
    pub service_id: u16,
    pub instance_id: u16,
    pub major_version: u8,
    /// ttl is a u24 value
    pub ttl: u32,
    pub counter: u8,
    pub event_group_id: u16,
}

impl EventGroupEntry {
    pub fn new(
        service_id: u16,
        instance_id: u16,
        major_version: u8,
        ttl: u32,
        counter: u8,
        event_group_id: u16,
    ) -> Self {
        Self {
            index_first_options_run: 0,
            index_second_options_run: 0,
            options_count: OptionsCount::new(0, 0),
            service_id,
            instance_id,
            major_version,
            ttl: ttl & super::TTL_MASK,
            counter: counter & COUNTER_MASK,
            event_group_id,
        }
    }

    /// Copy of this entry answering it with `ttl`; the counter is echoed back.
    pub fn reply(&self, ttl: u32) -> Self {
        Self::new(
            self.service_id,
            self.instance_id,
            self.major_version,
            ttl,
            self.counter,
            self.event_group_id,
        )
    }
}

impl WireFormat for EventGroupEntry {
    fn from_reader<T: std::io::Read>(reader: &mut T) -> Result<Self, crate::protocol::Error> {
        let index_first_options_run = reader.read_u8()?;
        let index_second_options_run = reader.read_u8()?;
        let options_count = OptionsCount::from(reader.read_u8()?);
        let service_id = reader.read_u16::<BigEndian>()?;
        let instance_id = reader.read_u16::<BigEndian>()?;
        let major_version = reader.read_u8()?;
        let ttl = reader.read_u24::<BigEndian>()?;
        let counter = (reader.read_u16::<BigEndian>()? as u8) & COUNTER_MASK;
        let event_group_id = reader.read_u16::<BigEndian>()?;
        Ok(Self {
            index_first_options_run,
            index_second_options_run,
            options_count,
            service_id,
            instance_id,
            major_version,
            ttl,
            counter,
            event_group_id,
        })
    }

    fn required_size(&self) -> usize {
        15
    }

    fn to_writer<T: std::io::Write>(
        &self,
        writer: &mut T,
    ) -> Result<usize, crate::protocol::Error> {
        writer.write_u8(self.index_first_options_run)?;
        writer.write_u8(self.index_second_options_run)?;
        writer.write_u8(u8::from(self.options_count))?;
        writer.write_u16::<BigEndian>(self.service_id)?;
        writer.write_u16::<BigEndian>(self.instance_id)?;
        writer.write_u8(self.major_version)?;
        writer.write_u24::<BigEndian>(self.ttl & super::TTL_MASK)?;
        writer.write_u16::<BigEndian>(u16::from(self.counter & COUNTER_MASK))?;
        writer.write_u16::<BigEndian>(self.event_group_id)?;
        Ok(15)
    }
}
