use std::net::SocketAddr;
use std::sync::Arc;

use tokio::{net::UdpSocket, select, sync::oneshot};
use tracing::{trace, warn};

use super::ClientShared;

/// Largest UDP payload
const RECEIVE_BUFFER_SIZE: usize = 65_535;

enum Received {
    Shutdown,
    Datagram(std::io::Result<(usize, SocketAddr)>),
}

/// Spawns the task reading the event socket of a client instance.
///
/// The task ends when `shutdown` resolves or its sender is dropped.
pub(super) fn spawn(socket: UdpSocket, shared: Arc<ClientShared>, shutdown: oneshot::Receiver<()>) {
    tokio::spawn(receive_loop(socket, shared, shutdown));
}

async fn receive_loop(
    socket: UdpSocket,
    shared: Arc<ClientShared>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut buffer = vec![0u8; RECEIVE_BUFFER_SIZE];
    loop {
        let received = select! {
            _ = &mut shutdown => Received::Shutdown,
            result = socket.recv_from(&mut buffer) => Received::Datagram(result),
        };
        match received {
            Received::Shutdown => break,
            Received::Datagram(Ok((length, SocketAddr::V4(source)))) => {
                shared.handle_datagram(&buffer[..length], source).await;
            }
            Received::Datagram(Ok((_, source))) => {
                trace!("Ignoring datagram from non-IPv4 source {}", source);
            }
            Received::Datagram(Err(e)) => warn!("Event socket receive error: {:?}", e),
        }
    }
    trace!(
        "Event receiver of service 0x{:04X} stopped",
        shared.service().service_id
    );
}
