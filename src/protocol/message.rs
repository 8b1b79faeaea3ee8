use std::io::Write;

use super::{Error, Header, sd};
use crate::traits::WireFormat;

use super::header::{HEADER_SIZE, LENGTH_FIELD_OVERHEAD};

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum MessagePayload {
    ServiceDiscovery(sd::Header),
    Custom(Vec<u8>),
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Message {
    header: Header,
    payload: MessagePayload,
}

impl Message {
    /// Creates a message, fixing up the header length to match the payload.
    pub fn new(mut header: Header, payload: MessagePayload) -> Self {
        let payload_len = match &payload {
            MessagePayload::ServiceDiscovery(sd_header) => sd_header.required_size(),
            MessagePayload::Custom(bytes) => bytes.len(),
        };
        header.length = payload_len as u32 + LENGTH_FIELD_OVERHEAD;
        Self { header, payload }
    }

    pub fn new_sd(session_id: u16, sd_header: sd::Header) -> Self {
        let header = Header::new_sd(session_id, sd_header.required_size());
        Self::new(header, MessagePayload::ServiceDiscovery(sd_header))
    }

    pub fn new_notification(
        service_id: u16,
        event_id: u16,
        session_id: u16,
        interface_version: u8,
        payload: Vec<u8>,
    ) -> Self {
        let header = Header::new_notification(
            service_id,
            event_id,
            session_id,
            interface_version,
            payload.len(),
        );
        Self::new(header, MessagePayload::Custom(payload))
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn payload(&self) -> &MessagePayload {
        &self.payload
    }

    pub fn is_sd(&self) -> bool {
        self.header.message_id.is_sd()
    }

    pub fn get_sd_header(&self) -> Option<&sd::Header> {
        match &self.payload {
            MessagePayload::ServiceDiscovery(sd_header) => Some(sd_header),
            MessagePayload::Custom(_) => None,
        }
    }

    /// Decodes exactly one message occupying the whole of `datagram`.
    ///
    /// Decoding is all-or-nothing: a buffer shorter than the header, a length
    /// field disagreeing with the bytes that follow it, or any error inside an
    /// SD payload rejects the whole datagram.
    pub fn decode(datagram: &[u8]) -> Result<Self, Error> {
        if datagram.len() < HEADER_SIZE {
            return Err(Error::MalformedPacket("buffer shorter than SOME/IP header"));
        }
        let mut reader = datagram;
        let header = Header::from_reader(&mut reader)?;
        if header.payload_size() != reader.len() {
            return Err(Error::MalformedPacket(
                "length field does not match datagram size",
            ));
        }
        let payload = if header.message_id.is_sd() {
            let sd_header = sd::Header::from_reader(&mut reader)?;
            if !reader.is_empty() {
                return Err(Error::MalformedPacket("trailing bytes after SD payload"));
            }
            MessagePayload::ServiceDiscovery(sd_header)
        } else {
            MessagePayload::Custom(reader.to_vec())
        };
        Ok(Self { header, payload })
    }

    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        let mut buffer = Vec::with_capacity(self.required_size());
        self.to_writer(&mut buffer)?;
        Ok(buffer)
    }
}

impl WireFormat for Message {
    fn from_reader<T: std::io::Read>(reader: &mut T) -> Result<Self, Error> {
        let mut datagram = Vec::new();
        reader.read_to_end(&mut datagram)?;
        Self::decode(&datagram)
    }

    fn required_size(&self) -> usize {
        HEADER_SIZE + self.header.payload_size()
    }

    fn to_writer<T: Write>(&self, writer: &mut T) -> Result<usize, Error> {
        let header_size = self.header.to_writer(writer)?;
        match &self.payload {
            MessagePayload::ServiceDiscovery(sd_header) => {
                let sd_header_size = sd_header.to_writer(writer)?;
                Ok(header_size + sd_header_size)
            }
            MessagePayload::Custom(payload) => {
                writer.write_all(payload)?;
                Ok(header_size + payload.len())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MessageType;

    #[test]
    fn test_notification_round_trip() {
        let message = Message::new_notification(0x1234, 0x8123, 3, 1, vec![0x01, 0x02]);
        let bytes = message.encode().unwrap();
        assert_eq!(bytes.len(), 18);
        let decoded = Message::decode(&bytes).unwrap();
        assert_eq!(decoded, message);
        assert_eq!(
            decoded.header().message_type.message_type(),
            MessageType::Notification
        );
        assert_eq!(decoded.payload(), &MessagePayload::Custom(vec![0x01, 0x02]));
    }

    #[test]
    fn test_length_mismatch_is_malformed() {
        let message = Message::new_notification(0x1234, 0x8123, 3, 1, vec![0x01, 0x02]);
        let mut bytes = message.encode().unwrap();
        bytes.push(0xFF);
        assert!(matches!(
            Message::decode(&bytes),
            Err(Error::MalformedPacket(_))
        ));
        bytes.truncate(17);
        assert!(matches!(
            Message::decode(&bytes),
            Err(Error::MalformedPacket(_))
        ));
    }

    #[test]
    fn test_every_truncation_is_rejected() {
        let message = Message::new_sd(1, sd::Header::new_find(0x1234, 0xFFFF, 0xFF, 3));
        let bytes = message.encode().unwrap();
        for len in 0..bytes.len() {
            let err = Message::decode(&bytes[..len]).unwrap_err();
            assert!(err.is_malformed(), "truncation to {len} bytes: {err:?}");
        }
        assert_eq!(Message::decode(&bytes).unwrap(), message);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;
        use std::net::{Ipv4Addr, SocketAddrV4};

        fn endpoint() -> impl Strategy<Value = SocketAddrV4> {
            (any::<u32>(), any::<u16>())
                .prop_map(|(ip, port)| SocketAddrV4::new(Ipv4Addr::from(ip), port))
        }

        fn entry() -> impl Strategy<Value = sd::Entry> {
            prop_oneof![
                (any::<u16>(), any::<u16>(), any::<u8>(), any::<u32>()).prop_map(
                    |(service, instance, major, ttl)| {
                        sd::Entry::find_service(service, instance, major, ttl)
                    }
                ),
                (any::<u16>(), any::<u16>(), any::<u8>(), any::<u32>(), any::<u32>()).prop_map(
                    |(service, instance, major, minor, ttl)| {
                        sd::Entry::offer_service(service, instance, major, minor, ttl)
                    }
                ),
                (any::<u16>(), any::<u16>(), any::<u32>(), 0..16u8, any::<u16>(), any::<bool>())
                    .prop_map(|(service, instance, ttl, counter, event_group, ack)| {
                        let entry = sd::EventGroupEntry::new(
                            service,
                            instance,
                            1,
                            ttl,
                            counter,
                            event_group,
                        );
                        if ack {
                            sd::Entry::SubscribeAckEventGroup(entry)
                        } else {
                            sd::Entry::SubscribeEventGroup(entry)
                        }
                    }),
            ]
        }

        fn sd_header() -> impl Strategy<Value = sd::Header> {
            let entries =
                proptest::collection::vec((entry(), proptest::option::of(endpoint())), 0..8);
            (any::<bool>(), any::<bool>(), entries).prop_map(|(reboot, unicast, entries)| {
                let mut header = sd::Header::new(sd::Flags::new(reboot, unicast));
                for (entry, endpoint) in entries {
                    let options = endpoint.map(sd::Options::udp_endpoint).into_iter().collect();
                    header.add_entry(entry, options);
                }
                header
            })
        }

        proptest! {
            #[test]
            fn notification_round_trip(
                service_id in any::<u16>(),
                event_id in 0x8000..=u16::MAX,
                session_id in any::<u16>(),
                interface_version in any::<u8>(),
                payload in proptest::collection::vec(any::<u8>(), 0..256),
            ) {
                let message = Message::new_notification(
                    service_id,
                    event_id,
                    session_id,
                    interface_version,
                    payload,
                );
                let bytes = message.encode().unwrap();
                prop_assert_eq!(bytes.len(), message.required_size());
                prop_assert_eq!(&Message::decode(&bytes).unwrap(), &message);
                prop_assert_eq!(message.encode().unwrap(), bytes);
            }

            #[test]
            fn sd_message_round_trip(session_id in any::<u16>(), header in sd_header()) {
                let message = Message::new_sd(session_id, header);
                let bytes = message.encode().unwrap();
                prop_assert_eq!(bytes.len(), message.required_size());
                let decoded = Message::decode(&bytes).unwrap();
                prop_assert_eq!(&decoded, &message);
                prop_assert!(decoded.is_sd());
                prop_assert_eq!(decoded.encode().unwrap(), bytes);
            }

            #[test]
            fn sd_endpoints_survive_encoding(header in sd_header()) {
                let message = Message::new_sd(1, header.clone());
                let decoded = Message::decode(&message.encode().unwrap()).unwrap();
                let decoded = decoded.get_sd_header().unwrap();
                for (original, entry) in header.entries.iter().zip(&decoded.entries) {
                    prop_assert_eq!(
                        decoded.udp_endpoint_for(entry),
                        header.udp_endpoint_for(original)
                    );
                }
            }

            #[test]
            fn arbitrary_datagrams_never_panic(
                datagram in proptest::collection::vec(any::<u8>(), 0..512),
            ) {
                if let Ok(message) = Message::decode(&datagram) {
                    // whatever decodes is stable under a second pass
                    let bytes = message.encode().unwrap();
                    prop_assert_eq!(Message::decode(&bytes).unwrap(), message);
                }
            }

            #[test]
            fn sd_prefixed_datagrams_never_panic(
                session_id in any::<u16>(),
                payload in proptest::collection::vec(any::<u8>(), 0..256),
            ) {
                // a valid SD header makes the decoder go through the SD payload
                let empty = sd::Header::new(sd::Flags::new_sd(true));
                let mut datagram = Message::new_sd(session_id, empty).encode().unwrap();
                datagram.truncate(16);
                let length = u32::try_from(payload.len() + 8).unwrap();
                datagram[4..8].copy_from_slice(&length.to_be_bytes());
                datagram.extend_from_slice(&payload);
                let _ = Message::decode(&datagram);
            }
        }
    }
}
