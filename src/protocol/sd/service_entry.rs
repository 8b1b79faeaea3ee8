use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

use crate::{protocol::Error, traits::WireFormat};

use super::entry::OptionsCount;

/// Body of a FindService or OfferService entry, i.e. everything after the type byte.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ServiceEntry {
    pub index_first_options_run: u8,
    pub index_second_options_run: u8,
    pub options_count: OptionsCount,
    pub service_id: u16,
    pub instance_id: u16,
    pub major_version: u8,
    /// ttl is a u24 value
    pub ttl: u32,
    pub minor_version: u32,
}

impl ServiceEntry {
    pub fn new(
        service_id: u16,
        instance_id: u16,
        major_version: u8,
        minor_version: u32,
        ttl: u32,
    ) -> Self {
        Self {
            index_first_options_run: 0,
            index_second_options_run: 0,
            options_count: OptionsCount::new(0, 0),
            service_id,
            instance_id,
            major_version,
            ttl: ttl & super::TTL_MASK,
            minor_version,
        }
    }
}

impl WireFormat for ServiceEntry {
    fn from_reader<T: Read>(reader: &mut T) -> Result<Self, Error> {
        let index_first_options_run = reader.read_u8()?;
        let index_second_options_run = reader.read_u8()?;
        let options_count = OptionsCount::from(reader.read_u8()?);
        let service_id = reader.read_u16::<BigEndian>()?;
        let instance_id = reader.read_u16::<BigEndian>()?;
        let major_version = reader.read_u8()?;
        let ttl = reader.read_u24::<BigEndian>()?;
        let minor_version = reader.read_u32::<BigEndian>()?;
        Ok(Self {
            index_first_options_run,
            index_second_options_run,
            options_count,
            service_id,
            instance_id,
            major_version,
            ttl,
            minor_version,
        })
    }

    fn required_size(&self) -> usize {
        15
    }

    fn to_writer<T: Write>(&self, writer: &mut T) -> Result<usize, Error> {
        writer.write_u8(self.index_first_options_run)?;
        writer.write_u8(self.index_second_options_run)?;
        writer.write_u8(u8::from(self.options_count))?;
        writer.write_u16::<BigEndian>(self.service_id)?;
        writer.write_u16::<BigEndian>(self.instance_id)?;
        writer.write_u8(self.major_version)?;
        writer.write_u24::<BigEndian>(self.ttl & super::TTL_MASK)?;
        writer.write_u32::<BigEndian>(self.minor_version)?;
        Ok(15)
    }
}
