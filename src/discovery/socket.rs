use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};

use tokio::net::UdpSocket;
use tracing::{debug, info};

use super::DiscoveryConfig;

fn new_udp_socket(reuse: bool) -> std::io::Result<socket2::Socket> {
    let socket = socket2::Socket::new(
        socket2::Domain::IPV4,
        socket2::Type::DGRAM,
        Some(socket2::Protocol::UDP),
    )?;
    if reuse {
        // SO_REUSEADDR allows several SD stacks on one host to share the SD port
        socket.set_reuse_address(true)?;
        #[cfg(unix)]
        socket.set_reuse_port(true)?;
    }
    socket.set_nonblocking(true)?;
    Ok(socket)
}

fn into_tokio(socket: socket2::Socket) -> std::io::Result<UdpSocket> {
    let socket: std::net::UdpSocket = socket.into();
    UdpSocket::from_std(socket)
}

/// Binds the SD socket and joins the multicast group of `config`.
///
/// When the configured group is not a multicast address it is treated as a
/// unicast peer: the socket binds to the interface address and joins nothing.
pub(crate) fn bind_discovery(config: &DiscoveryConfig) -> std::io::Result<UdpSocket> {
    let socket = new_udp_socket(true)?;
    let multicast = config.multicast_group.is_multicast();
    let bind_ip = if multicast {
        Ipv4Addr::UNSPECIFIED
    } else {
        config.interface
    };
    let bind_addr = SocketAddr::new(IpAddr::V4(bind_ip), config.bind_port);
    socket.bind(&bind_addr.into())?;
    if multicast {
        socket.join_multicast_v4(&config.multicast_group, &config.interface)?;
        socket.set_multicast_if_v4(&config.interface)?;
        socket.set_multicast_loop_v4(true)?;
        info!(
            "SD socket bound to {}, joined multicast {} on {}",
            bind_addr, config.multicast_group, config.interface
        );
    } else {
        debug!(
            "SD socket bound to {}, using unicast peer {} instead of a multicast group",
            bind_addr, config.multicast_group
        );
    }
    into_tokio(socket)
}

/// Binds a plain UDP socket for event traffic at `endpoint`.
pub(crate) fn bind_unicast(endpoint: SocketAddrV4) -> std::io::Result<UdpSocket> {
    let socket = new_udp_socket(false)?;
    socket.bind(&SocketAddr::V4(endpoint).into())?;
    into_tokio(socket)
}

/// The IPv4 address a socket is bound to, with the unspecified address replaced by `interface`.
pub(crate) fn local_v4(socket: &UdpSocket, interface: Ipv4Addr) -> std::io::Result<SocketAddrV4> {
    match socket.local_addr()? {
        SocketAddr::V4(addr) if addr.ip().is_unspecified() => {
            Ok(SocketAddrV4::new(interface, addr.port()))
        }
        SocketAddr::V4(addr) => Ok(addr),
        SocketAddr::V6(addr) => Err(std::io::Error::new(
            std::io::ErrorKind::AddrNotAvailable,
            format!("expected an IPv4 socket, bound to {addr}"),
        )),
    }
}
