//! SOME/IP Service Discovery engine
//!
//! A [`ServiceDiscovery`] owns the SD socket of a node. Server and client
//! instances attach to it; the engine task then dispatches received SD entries
//! to them, runs their timers and sends whatever SD entries they produce.

mod control;
mod engine;
mod outbox;
mod session;
pub(crate) mod socket;

use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, trace};

use crate::{Error, SD_MULTICAST_IP, SD_MULTICAST_PORT, protocol::sd};

pub(crate) use control::{Control, ControlMessage};
pub(crate) use outbox::{Outbox, Target};

/// Configuration of the SD socket
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiscoveryConfig {
    /// Local interface used to join the multicast group and to send from.
    ///
    /// Offers announce endpoints on this address, so it has to be a concrete
    /// address of the host.
    pub interface: Ipv4Addr,
    /// SD multicast group.
    ///
    /// A non-multicast address is treated as a single unicast peer and no
    /// group is joined.
    pub multicast_group: Ipv4Addr,
    /// SD port of the multicast group
    pub port: u16,
    /// Local port the SD socket binds to, usually the same as `port`
    pub bind_port: u16,
    /// Upper bound of the random delay before the first offer of an instance
    pub initial_delay_max: Duration,
}

impl DiscoveryConfig {
    pub fn new(interface: Ipv4Addr, multicast_group: Ipv4Addr, port: u16) -> Self {
        Self {
            interface,
            multicast_group,
            port,
            bind_port: port,
            initial_delay_max: Duration::from_millis(100),
        }
    }

    /// Standard SD multicast group and port on `interface`
    pub fn on_interface(interface: Ipv4Addr) -> Self {
        Self::new(interface, SD_MULTICAST_IP, SD_MULTICAST_PORT)
    }

    pub fn with_bind_port(mut self, bind_port: u16) -> Self {
        self.bind_port = bind_port;
        self
    }

    pub fn with_initial_delay_max(mut self, initial_delay_max: Duration) -> Self {
        self.initial_delay_max = initial_delay_max;
        self
    }

    pub fn multicast_target(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.multicast_group, self.port)
    }
}

/// An instance registered with the engine
#[derive(Clone)]
pub(crate) enum AttachedInstance {
    #[cfg(feature = "server")]
    Server(Arc<crate::server::ServerShared>),
    #[cfg(feature = "client")]
    Client(Arc<crate::client::ClientShared>),
}

impl std::fmt::Debug for AttachedInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            #[cfg(feature = "server")]
            AttachedInstance::Server(server) => write!(
                f,
                "Server(0x{:04X}/0x{:04X})",
                server.service().service_id,
                server.instance_id()
            ),
            #[cfg(feature = "client")]
            AttachedInstance::Client(client) => write!(
                f,
                "Client(0x{:04X}/0x{:04X})",
                client.service().service_id,
                client.instance_id()
            ),
        }
    }
}

/// Something that can be attached to a [`ServiceDiscovery`].
///
/// Obtained from `&ServerServiceInstance` or `&ClientServiceInstance`.
#[derive(Debug)]
pub struct Attachment(pub(crate) AttachedInstance);

/// Handle to a running SD engine.
///
/// Handles are cheap to clone. The engine withdraws all offers and
/// subscriptions and releases its socket on [`ServiceDiscovery::close`], or
/// once every handle (including the ones held by instances) is dropped.
/// Dropping a single instance withdraws only that instance.
#[derive(Clone, Debug)]
pub struct ServiceDiscovery {
    control_sender: mpsc::Sender<ControlMessage>,
    /// Used from `Drop`, so it must never block
    detach_sender: mpsc::UnboundedSender<AttachedInstance>,
    local_addr: SocketAddrV4,
    config: Arc<DiscoveryConfig>,
}

impl ServiceDiscovery {
    /// Binds the SD socket, joins the multicast group and spawns the engine task.
    ///
    /// Must be called from within a tokio runtime. Fails with
    /// [`Error::UnspecifiedInterface`] when the interface is `0.0.0.0`.
    pub async fn bind(config: DiscoveryConfig) -> Result<Self, Error> {
        if config.interface.is_unspecified() {
            return Err(Error::UnspecifiedInterface(config.interface));
        }
        let socket = socket::bind_discovery(&config)?;
        let local_addr = socket::local_v4(&socket, config.interface)?;
        info!(
            "Service discovery on {} for group {}",
            local_addr,
            config.multicast_target()
        );
        let (control_sender, control_receiver) = mpsc::channel(16);
        let (detach_sender, detach_receiver) = mpsc::unbounded_channel();
        let engine = engine::Engine::new(
            config.clone(),
            socket,
            local_addr,
            control_receiver,
            detach_receiver,
        );
        tokio::spawn(engine.run());
        Ok(Self {
            control_sender,
            detach_sender,
            local_addr,
            config: Arc::new(config),
        })
    }

    /// Local address of the SD socket
    pub fn local_addr(&self) -> SocketAddrV4 {
        self.local_addr
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    pub fn is_closed(&self) -> bool {
        self.control_sender.is_closed()
    }

    /// Registers an instance for SD dispatch. Attaching the same instance twice is a no-op.
    pub async fn attach(&self, instance: impl Into<Attachment>) -> Result<(), Error> {
        let Attachment(instance) = instance.into();
        debug!("Attaching {:?}", instance);
        self.request(Control::Attach(instance)).await
    }

    /// Withdraws every offer and subscription, then stops the engine.
    ///
    /// Returns once the StopOffer/StopSubscribe entries were sent and the socket
    /// is released. Closing an engine that is already closed succeeds.
    pub async fn close(&self) -> Result<(), Error> {
        match self.request(Control::Close).await {
            Ok(()) | Err(Error::EngineClosed) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Hands a dropped instance back to the engine, which withdraws its
    /// offers and subscriptions and forgets it.
    pub(crate) fn detach(&self, instance: AttachedInstance) {
        if self.detach_sender.send(instance).is_err() {
            trace!("Engine already closed, nothing to detach");
        }
    }

    pub(crate) async fn wake(&self) -> Result<(), Error> {
        self.request(Control::Wake).await
    }

    pub(crate) async fn send(&self, target: Target, header: sd::Header) -> Result<(), Error> {
        self.request(Control::Send { target, header }).await
    }

    async fn request(&self, control: Control) -> Result<(), Error> {
        let (message, response) = ControlMessage::new(control);
        self.control_sender
            .send(message)
            .await
            .map_err(|_| Error::EngineClosed)?;
        response.await.map_err(|_| Error::EngineClosed)?
    }
}
