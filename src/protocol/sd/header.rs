use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};
use std::net::{Ipv4Addr, SocketAddrV4};

use crate::{protocol::Error, traits::WireFormat};

use super::{
    Entry, EventGroupEntry, Flags, Options, TransportProtocol,
    entry::ENTRY_SIZE,
};

/// Flags, reserved bytes and the two length fields
const FIXED_SIZE: usize = 12;

/// Upper bound on entries pre-allocated from an untrusted length field
const MAX_PREALLOCATED_ENTRIES: usize = 64;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Header {
    pub flags: Flags,
    pub entries: Vec<Entry>,
    pub options: Vec<Options>,
}

impl Header {
    pub fn new(flags: Flags) -> Self {
        Self {
            flags,
            entries: Vec::new(),
            options: Vec::new(),
        }
    }

    /// Whether an entry referencing `options` more options can still be added.
    ///
    /// Option runs are addressed by an 8 bit index, so a message holds at
    /// most 255 options.
    pub fn has_room_for(&self, options: usize) -> bool {
        self.options.len() + options <= usize::from(u8::MAX)
    }

    /// Appends `entry`, pointing its first options run at `options`.
    ///
    /// The caller checks [`Header::has_room_for`] first.
    pub fn add_entry(&mut self, mut entry: Entry, options: Vec<Options>) {
        if options.is_empty() {
            entry.set_first_options_run(0, 0);
        } else {
            entry.set_first_options_run(self.options.len() as u8, options.len() as u8);
            self.options.extend(options);
        }
        self.entries.push(entry);
    }

    pub fn with_entry(mut self, entry: Entry, options: Vec<Options>) -> Self {
        self.add_entry(entry, options);
        self
    }

    pub fn new_find(service_id: u16, instance_id: u16, major_version: u8, ttl: u32) -> Self {
        Self::new(Flags::new_sd(true)).with_entry(
            Entry::find_service(service_id, instance_id, major_version, ttl),
            Vec::new(),
        )
    }

    pub fn new_offer(
        service_id: u16,
        instance_id: u16,
        major_version: u8,
        minor_version: u32,
        ttl: u32,
        endpoint: SocketAddrV4,
    ) -> Self {
        Self::new(Flags::new_sd(true)).with_entry(
            Entry::offer_service(service_id, instance_id, major_version, minor_version, ttl),
            vec![Options::udp_endpoint(endpoint)],
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn new_subscription(
        service_id: u16,
        instance_id: u16,
        major_version: u8,
        ttl: u32,
        event_group_id: u16,
        ip: Ipv4Addr,
        protocol: TransportProtocol,
        port: u16,
    ) -> Self {
        Self::new(Flags::new_sd(true)).with_entry(
            Entry::SubscribeEventGroup(EventGroupEntry::new(
                service_id,
                instance_id,
                major_version,
                ttl,
                0,
                event_group_id,
            )),
            vec![Options::IpV4Endpoint { ip, protocol, port }],
        )
    }

    /// The options referenced by both option runs of `entry`.
    ///
    /// Runs were validated against the options array during decoding; runs of a
    /// header built in memory that point past the array yield fewer options.
    pub fn options_for<'a>(&'a self, entry: &Entry) -> impl Iterator<Item = &'a Options> + use<'a> {
        let runs = [entry.first_options_run(), entry.second_options_run()];
        runs.into_iter().flat_map(move |(index, count)| {
            let start = usize::from(index).min(self.options.len());
            let end = (usize::from(index) + usize::from(count)).min(self.options.len());
            if count == 0 { &[][..] } else { &self.options[start..end] }
        })
    }

    /// First UDP IPv4 endpoint option referenced by `entry`.
    pub fn udp_endpoint_for(&self, entry: &Entry) -> Option<SocketAddrV4> {
        self.options_for(entry).find_map(Options::as_udp_endpoint)
    }

    fn validate_option_runs(&self) -> Result<(), Error> {
        for entry in &self.entries {
            for (index, count) in [entry.first_options_run(), entry.second_options_run()] {
                if count > 0 && usize::from(index) + usize::from(count) > self.options.len() {
                    return Err(Error::OptionIndexOutOfRange {
                        index,
                        count,
                        available: self.options.len(),
                    });
                }
            }
        }
        Ok(())
    }

    fn entries_size(&self) -> usize {
        self.entries.iter().map(WireFormat::required_size).sum()
    }

    fn options_size(&self) -> usize {
        self.options.iter().map(WireFormat::required_size).sum()
    }
}

impl WireFormat for Header {
    fn from_reader<T: Read>(reader: &mut T) -> Result<Self, Error> {
        let flags = Flags::from(reader.read_u8()?);
        let mut reserved: [u8; 3] = [0; 3];
        reader.read_exact(&mut reserved)?;

        let entries_size = reader.read_u32::<BigEndian>()? as usize;
        if entries_size % ENTRY_SIZE != 0 {
            return Err(Error::MalformedPacket(
                "entries length is not a multiple of the entry size",
            ));
        }
        let entries_count = entries_size / ENTRY_SIZE;
        let mut entries = Vec::with_capacity(entries_count.min(MAX_PREALLOCATED_ENTRIES));
        for _ in 0..entries_count {
            entries.push(Entry::from_reader(reader)?);
        }

        let options_size = reader.read_u32::<BigEndian>()?;
        let mut options_bytes = Vec::new();
        reader
            .take(u64::from(options_size))
            .read_to_end(&mut options_bytes)?;
        if options_bytes.len() != options_size as usize {
            return Err(Error::MalformedPacket(
                "options length exceeds remaining bytes",
            ));
        }
        let mut options_reader = options_bytes.as_slice();
        let mut options = Vec::new();
        while !options_reader.is_empty() {
            let option = Options::from_reader(&mut options_reader).map_err(|e| match e {
                Error::Io(_) => Error::MalformedPacket("option overruns options array"),
                other => other,
            })?;
            options.push(option);
        }

        let header = Self {
            flags,
            entries,
            options,
        };
        header.validate_option_runs()?;
        Ok(header)
    }

    fn required_size(&self) -> usize {
        FIXED_SIZE + self.entries_size() + self.options_size()
    }

    fn to_writer<T: Write>(&self, writer: &mut T) -> Result<usize, Error> {
        writer.write_u8(u8::from(self.flags))?;
        let reserved: [u8; 3] = [0; 3];
        writer.write_all(&reserved)?;
        writer.write_u32::<BigEndian>(self.entries_size() as u32)?;
        for entry in &self.entries {
            entry.to_writer(writer)?;
        }
        writer.write_u32::<BigEndian>(self.options_size() as u32)?;
        for option in &self.options {
            option.to_writer(writer)?;
        }
        Ok(self.required_size())
    }
}
