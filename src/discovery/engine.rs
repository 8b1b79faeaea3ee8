use std::net::{SocketAddr, SocketAddrV4};
use std::sync::Arc;

use tokio::{
    net::UdpSocket,
    select,
    sync::mpsc,
    time::{Instant, sleep_until},
};
use tracing::{debug, info, trace, warn};

use super::{
    AttachedInstance, Control, ControlMessage, DiscoveryConfig, Outbox, Target,
    session::{PeerSessions, SessionCounter},
};
use crate::{
    Error,
    protocol::{
        Message,
        sd::{self, Entry, EntryKind, Flags},
    },
};

/// Largest UDP payload
const RECEIVE_BUFFER_SIZE: usize = 65_535;

enum Event {
    Control(Option<ControlMessage>),
    Detach(AttachedInstance),
    Datagram(std::io::Result<(usize, SocketAddr)>),
    Timer,
}

pub(super) struct Engine {
    config: DiscoveryConfig,
    socket: UdpSocket,
    local_addr: SocketAddrV4,
    control_receiver: mpsc::Receiver<ControlMessage>,
    detach_receiver: mpsc::UnboundedReceiver<AttachedInstance>,
    session: SessionCounter,
    peers: PeerSessions,
    #[cfg(feature = "server")]
    servers: Vec<Arc<crate::server::ServerShared>>,
    #[cfg(feature = "client")]
    clients: Vec<Arc<crate::client::ClientShared>>,
}

impl Engine {
    pub(super) fn new(
        config: DiscoveryConfig,
        socket: UdpSocket,
        local_addr: SocketAddrV4,
        control_receiver: mpsc::Receiver<ControlMessage>,
        detach_receiver: mpsc::UnboundedReceiver<AttachedInstance>,
    ) -> Self {
        Self {
            config,
            socket,
            local_addr,
            control_receiver,
            detach_receiver,
            session: SessionCounter::new(),
            peers: PeerSessions::new(),
            #[cfg(feature = "server")]
            servers: Vec::new(),
            #[cfg(feature = "client")]
            clients: Vec::new(),
        }
    }

    pub(super) async fn run(mut self) {
        let mut buffer = vec![0u8; RECEIVE_BUFFER_SIZE];
        let close_response = loop {
            let deadline = self.next_deadline().await;
            let event = select! {
                control = self.control_receiver.recv() => Event::Control(control),
                // closes together with the control channel, which ends the loop
                Some(instance) = self.detach_receiver.recv() => Event::Detach(instance),
                received = self.socket.recv_from(&mut buffer) => Event::Datagram(received),
                _ = sleep_until_deadline(deadline) => Event::Timer,
            };
            match event {
                Event::Control(Some(ControlMessage {
                    control: Control::Close,
                    response,
                })) => {
                    self.shut_down().await;
                    break Some(response);
                }
                Event::Control(Some(message)) => self.handle_control(message).await,
                Event::Detach(instance) => self.detach(instance).await,
                Event::Control(None) => {
                    debug!("All service discovery handles dropped");
                    self.shut_down().await;
                    break None;
                }
                Event::Datagram(Ok((length, SocketAddr::V4(source)))) => {
                    self.handle_datagram(&buffer[..length], source).await;
                }
                Event::Datagram(Ok((_, source))) => {
                    trace!("Ignoring SD datagram from non-IPv4 source {}", source);
                }
                Event::Datagram(Err(e)) => warn!("SD socket receive error: {:?}", e),
                Event::Timer => self.handle_timers().await,
            }
        };
        let local_addr = self.local_addr;
        // releases the socket and rejects further control messages
        drop(self);
        info!("Service discovery on {} closed", local_addr);
        if let Some(response) = close_response {
            let _ = response.send(Ok(()));
        }
    }

    async fn next_deadline(&self) -> Option<Instant> {
        let mut next: Option<Instant> = None;
        #[cfg(feature = "server")]
        for server in &self.servers {
            next = earliest(next, server.next_deadline().await);
        }
        #[cfg(feature = "client")]
        for client in &self.clients {
            next = earliest(next, client.next_deadline().await);
        }
        next
    }

    async fn handle_control(&mut self, message: ControlMessage) {
        let ControlMessage { control, response } = message;
        let result = match control {
            Control::Attach(instance) => {
                self.attach(instance).await;
                Ok(())
            }
            Control::Send { target, header } => self.send_sd(target, header).await,
            Control::Wake => Ok(()),
            // handled by the loop
            Control::Close => Ok(()),
        };
        let _ = response.send(result);
    }

    async fn attach(&mut self, instance: AttachedInstance) {
        match instance {
            #[cfg(feature = "server")]
            AttachedInstance::Server(server) => {
                if !self.servers.iter().any(|s| Arc::ptr_eq(s, &server)) {
                    server.set_attached();
                    self.servers.push(server);
                }
            }
            #[cfg(feature = "client")]
            AttachedInstance::Client(client) => {
                if !self.clients.iter().any(|c| Arc::ptr_eq(c, &client)) {
                    client.on_attach(Instant::now()).await;
                    self.clients.push(client);
                }
            }
        }
    }

    /// Withdraws a dropped instance and removes it from dispatch.
    async fn detach(&mut self, instance: AttachedInstance) {
        let mut outbox = Outbox::new();
        match instance {
            #[cfg(feature = "server")]
            AttachedInstance::Server(server) => {
                if let Some(index) = self.servers.iter().position(|s| Arc::ptr_eq(s, &server)) {
                    let server = self.servers.swap_remove(index);
                    debug!(
                        "Detaching server 0x{:04X}/0x{:04X}",
                        server.service().service_id,
                        server.instance_id()
                    );
                    server.withdraw(&mut outbox).await;
                }
            }
            #[cfg(feature = "client")]
            AttachedInstance::Client(client) => {
                if let Some(index) = self.clients.iter().position(|c| Arc::ptr_eq(c, &client)) {
                    let client = self.clients.swap_remove(index);
                    debug!(
                        "Detaching client 0x{:04X}/0x{:04X}",
                        client.service().service_id,
                        client.instance_id()
                    );
                    client.withdraw(&mut outbox).await;
                }
            }
        }
        self.flush(outbox).await;
    }

    async fn handle_timers(&mut self) {
        let now = Instant::now();
        let mut outbox = Outbox::new();
        #[cfg(feature = "server")]
        for server in &self.servers {
            server.on_timer(now, &mut outbox).await;
        }
        #[cfg(feature = "client")]
        for client in &self.clients {
            client.on_timer(now, &mut outbox).await;
        }
        self.flush(outbox).await;
    }

    async fn handle_datagram(&mut self, datagram: &[u8], source: SocketAddrV4) {
        if source == self.local_addr {
            trace!("Ignoring own SD message");
            return;
        }
        let message = match Message::decode(datagram) {
            Ok(message) => message,
            Err(e) => {
                warn!(
                    "Dropping malformed SD datagram ({} bytes) from {}: {}",
                    datagram.len(),
                    source,
                    e
                );
                return;
            }
        };
        let Some(sd_header) = message.get_sd_header() else {
            debug!(
                "Dropping non-SD message {:?} received on the SD socket from {}",
                message.header().message_id,
                source
            );
            return;
        };
        trace!("Received SD message from {}: {:?}", source, sd_header);

        let now = Instant::now();
        let rebooted = self.peers.update(
            source,
            sd_header.flags.reboot(),
            message.header().session_id,
        );
        if rebooted {
            info!("SD peer {} rebooted, dropping its state", source);
            self.peer_rebooted(source, now).await;
        }

        let mut outbox = Outbox::new();
        for entry in &sd_header.entries {
            self.dispatch_entry(sd_header, entry, source, now, &mut outbox)
                .await;
        }
        self.flush(outbox).await;
    }

    #[allow(unused_variables)]
    async fn peer_rebooted(&self, source: SocketAddrV4, now: Instant) {
        #[cfg(feature = "server")]
        for server in &self.servers {
            server.peer_rebooted(source).await;
        }
        #[cfg(feature = "client")]
        for client in &self.clients {
            client.peer_rebooted(source, now).await;
        }
    }

    #[allow(unused_variables)]
    async fn dispatch_entry(
        &self,
        sd_header: &sd::Header,
        entry: &Entry,
        source: SocketAddrV4,
        now: Instant,
        outbox: &mut Outbox,
    ) {
        let endpoint = sd_header.udp_endpoint_for(entry);
        match (entry.kind(), entry) {
            #[cfg(feature = "server")]
            (EntryKind::FindService, Entry::FindService(find)) => {
                for server in self.servers.iter().filter(|s| s.matches_find(find)) {
                    server.handle_find(source, outbox).await;
                }
            }
            #[cfg(feature = "client")]
            (EntryKind::OfferService, Entry::OfferService(offer)) => {
                for client in self.clients.iter().filter(|c| c.matches_offer(offer)) {
                    client
                        .handle_offer(offer, endpoint, source, now, outbox)
                        .await;
                }
            }
            #[cfg(feature = "client")]
            (EntryKind::StopOfferService, Entry::OfferService(offer)) => {
                for client in self.clients.iter().filter(|c| c.matches_offer(offer)) {
                    client.handle_stop_offer(source, now).await;
                }
            }
            #[cfg(feature = "server")]
            (EntryKind::SubscribeEventGroup, Entry::SubscribeEventGroup(subscribe)) => {
                let mut handled = false;
                for server in self.servers.iter().filter(|s| s.hosts(subscribe)) {
                    server
                        .handle_subscribe(subscribe, endpoint, source, now, outbox)
                        .await;
                    handled = true;
                }
                if !handled {
                    debug!(
                        "Subscribe for unknown service 0x{:04X}/0x{:04X} from {}, sending Nack",
                        subscribe.service_id, subscribe.instance_id, source
                    );
                    outbox.push(
                        Target::Unicast(source),
                        Entry::SubscribeAckEventGroup(subscribe.reply(0)),
                        Vec::new(),
                    );
                }
            }
            #[cfg(feature = "server")]
            (EntryKind::StopSubscribeEventGroup, Entry::SubscribeEventGroup(subscribe)) => {
                for server in self.servers.iter().filter(|s| s.hosts(subscribe)) {
                    server
                        .handle_stop_subscribe(subscribe, endpoint, source)
                        .await;
                }
            }
            #[cfg(feature = "client")]
            (EntryKind::SubscribeEventGroupAck, Entry::SubscribeAckEventGroup(ack)) => {
                for client in self.clients.iter().filter(|c| c.matches_event_group(ack)) {
                    client.handle_ack(ack, source).await;
                }
            }
            #[cfg(feature = "client")]
            (EntryKind::SubscribeEventGroupNack, Entry::SubscribeAckEventGroup(nack)) => {
                for client in self.clients.iter().filter(|c| c.matches_event_group(nack)) {
                    client.handle_nack(nack, source).await;
                }
            }
            (kind, _) => trace!(
                "No attached instance handles {:?} for service 0x{:04X}",
                kind,
                entry.service_id()
            ),
        }
    }

    /// Withdraws every offer and subscription of the attached instances.
    async fn shut_down(&mut self) {
        let mut outbox = Outbox::new();
        #[cfg(feature = "server")]
        for server in self.servers.drain(..) {
            server.withdraw(&mut outbox).await;
        }
        #[cfg(feature = "client")]
        for client in self.clients.drain(..) {
            client.withdraw(&mut outbox).await;
        }
        self.flush(outbox).await;
    }

    async fn flush(&mut self, mut outbox: Outbox) {
        if outbox.is_empty() {
            return;
        }
        let messages: Vec<_> = outbox.drain().collect();
        for (target, header) in messages {
            if let Err(e) = self.send_sd(target, header).await {
                warn!("Failed to send SD message to {:?}: {}", target, e);
            }
        }
    }

    async fn send_sd(&mut self, target: Target, mut header: sd::Header) -> Result<(), Error> {
        let destination = match target {
            Target::Multicast => self.config.multicast_target(),
            Target::Unicast(addr) => addr,
        };
        let (session_id, reboot) = self.session.next();
        header.flags = Flags::new(reboot, true);
        let message = Message::new_sd(session_id, header);
        let bytes = message.encode()?;
        trace!(
            "Sending SD message {} ({} bytes) to {}",
            session_id,
            bytes.len(),
            destination
        );
        self.socket.send_to(&bytes, destination).await?;
        Ok(())
    }
}

fn earliest(current: Option<Instant>, candidate: Option<Instant>) -> Option<Instant> {
    match (current, candidate) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
