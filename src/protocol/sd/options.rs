use std::io::{Read, Write};
use std::net::{Ipv4Addr, SocketAddrV4};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::{protocol::Error, traits::WireFormat};

/// Value of the length field of every IPv4 endpoint style option
const IPV4_OPTION_LENGTH: u16 = 9;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum TransportProtocol {
    Udp,
    Tcp,
}

impl TryFrom<u8> for TransportProtocol {
    type Error = Error;
    fn try_from(value: u8) -> Result<Self, Error> {
        match value {
            0x11 => Ok(TransportProtocol::Udp),
            0x06 => Ok(TransportProtocol::Tcp),
            _ => Err(Error::InvalidSDOptionTransportProtocol(value)),
        }
    }
}

impl From<TransportProtocol> for u8 {
    fn from(transport_protocol: TransportProtocol) -> u8 {
        match transport_protocol {
            TransportProtocol::Udp => 0x11,
            TransportProtocol::Tcp => 0x06,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum OptionType {
    IpV4Endpoint,
    IpV4Multicast,
    IpV4SD,
}

impl OptionType {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x04 => Some(OptionType::IpV4Endpoint),
            0x14 => Some(OptionType::IpV4Multicast),
            0x24 => Some(OptionType::IpV4SD),
            _ => None,
        }
    }
}

impl From<OptionType> for u8 {
    fn from(option_type: OptionType) -> u8 {
        match option_type {
            OptionType::IpV4Endpoint => 0x04,
            OptionType::IpV4Multicast => 0x14,
            OptionType::IpV4SD => 0x24,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Options {
    IpV4Endpoint {
        ip: Ipv4Addr,
        protocol: TransportProtocol,
        port: u16,
    },
    IpV4Multicast {
        ip: Ipv4Addr,
        protocol: TransportProtocol,
        port: u16,
    },
    IpV4SD {
        ip: Ipv4Addr,
        protocol: TransportProtocol,
        port: u16,
    },
    /// Any option this crate does not interpret (configuration, load balancing, IPv6, ...).
    /// `data` holds every byte counted by the length field, starting with the reserved byte.
    Unknown { option_type: u8, data: Vec<u8> },
}

impl Options {
    pub fn udp_endpoint(endpoint: SocketAddrV4) -> Self {
        Options::IpV4Endpoint {
            ip: *endpoint.ip(),
            protocol: TransportProtocol::Udp,
            port: endpoint.port(),
        }
    }

    /// The UDP unicast endpoint carried by this option, if it is one.
    pub fn as_udp_endpoint(&self) -> Option<SocketAddrV4> {
        match self {
            Options::IpV4Endpoint {
                ip,
                protocol: TransportProtocol::Udp,
                port,
            } => Some(SocketAddrV4::new(*ip, *port)),
            _ => None,
        }
    }

    fn ipv4_parts(&self) -> Option<(OptionType, Ipv4Addr, TransportProtocol, u16)> {
        match self {
            Options::IpV4Endpoint { ip, protocol, port } => {
                Some((OptionType::IpV4Endpoint, *ip, *protocol, *port))
            }
            Options::IpV4Multicast { ip, protocol, port } => {
                Some((OptionType::IpV4Multicast, *ip, *protocol, *port))
            }
            Options::IpV4SD { ip, protocol, port } => {
                Some((OptionType::IpV4SD, *ip, *protocol, *port))
            }
            Options::Unknown { .. } => None,
        }
    }
}

impl WireFormat for Options {
    fn from_reader<T: Read>(reader: &mut T) -> Result<Self, Error> {
        let length = reader.read_u16::<BigEndian>()?;
        let option_type = reader.read_u8()?;
        let mut data = Vec::new();
        reader.take(u64::from(length)).read_to_end(&mut data)?;
        if data.len() != usize::from(length) {
            return Err(Error::MalformedPacket("option overruns options array"));
        }

        let Some(known_type) = OptionType::from_u8(option_type) else {
            return Ok(Options::Unknown { option_type, data });
        };
        if length != IPV4_OPTION_LENGTH {
            return Err(Error::MalformedPacket("invalid length for IPv4 option"));
        }
        // reserved/discardable flag byte, address, reserved byte, protocol, port
        let mut body = &data[1..];
        let ip = Ipv4Addr::from(body.read_u32::<BigEndian>()?);
        let _reserved = body.read_u8()?;
        let protocol = TransportProtocol::try_from(body.read_u8()?)?;
        let port = body.read_u16::<BigEndian>()?;
        Ok(match known_type {
            OptionType::IpV4Endpoint => Options::IpV4Endpoint { ip, protocol, port },
            OptionType::IpV4Multicast => Options::IpV4Multicast { ip, protocol, port },
            OptionType::IpV4SD => Options::IpV4SD { ip, protocol, port },
        })
    }

    fn required_size(&self) -> usize {
        3 + match self {
            Options::Unknown { data, .. } => data.len(),
            _ => usize::from(IPV4_OPTION_LENGTH),
        }
    }

    fn to_writer<T: Write>(&self, writer: &mut T) -> Result<usize, Error> {
        if let Some((option_type, ip, protocol, port)) = self.ipv4_parts() {
            writer.write_u16::<BigEndian>(IPV4_OPTION_LENGTH)?;
            writer.write_u8(u8::from(option_type))?;
            writer.write_u8(0)?;
            writer.write_u32::<BigEndian>(u32::from(ip))?;
            writer.write_u8(0)?;
            writer.write_u8(u8::from(protocol))?;
            writer.write_u16::<BigEndian>(port)?;
        } else if let Options::Unknown { option_type, data } = self {
            writer.write_u16::<BigEndian>(data.len() as u16)?;
            writer.write_u8(*option_type)?;
            writer.write_all(data)?;
        }
        Ok(self.required_size())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ipv4_endpoint_layout() {
        let endpoint = SocketAddrV4::new(Ipv4Addr::new(192, 168, 0, 105), 3000);
        let option = Options::udp_endpoint(endpoint);
        let mut buffer = Vec::new();
        assert_eq!(option.to_writer(&mut buffer).unwrap(), 12);
        assert_eq!(
            buffer,
            [0x00, 0x09, 0x04, 0x00, 0xC0, 0xA8, 0x00, 0x69, 0x00, 0x11, 0x0B, 0xB8]
        );
        let decoded = Options::from_reader(&mut buffer.as_slice()).unwrap();
        assert_eq!(
            decoded.as_udp_endpoint(),
            Some(SocketAddrV4::new(Ipv4Addr::new(192, 168, 0, 105), 3000))
        );
    }

    #[test]
    fn test_unknown_option_is_preserved() {
        // configuration option carrying "a=b"
        let bytes = [0x00, 0x05, 0x01, 0x00, 0x03, b'a', b'=', b'b'];
        let option = Options::from_reader(&mut bytes.as_slice()).unwrap();
        assert_eq!(
            option,
            Options::Unknown {
                option_type: 0x01,
                data: vec![0x00, 0x03, b'a', b'=', b'b'],
            }
        );
        let mut buffer = Vec::new();
        option.to_writer(&mut buffer).unwrap();
        assert_eq!(buffer, bytes);
    }

    #[test]
    fn test_wrong_ipv4_length_is_malformed() {
        let bytes = [0x00, 0x08, 0x04, 0x00, 0xC0, 0xA8, 0x00, 0x69, 0x00, 0x11, 0x0B];
        assert!(matches!(
            Options::from_reader(&mut bytes.as_slice()),
            Err(Error::MalformedPacket(_))
        ));
    }

    #[test]
    fn test_tcp_endpoint_is_not_udp() {
        let option = Options::IpV4Endpoint {
            ip: Ipv4Addr::LOCALHOST,
            protocol: TransportProtocol::Tcp,
            port: 1,
        };
        assert_eq!(option.as_udp_endpoint(), None);
    }
}
