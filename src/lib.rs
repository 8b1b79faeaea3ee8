//! # Simple SOME/IP Service Discovery
//!
//! SOME/IP (Scalable service-Oriented Middleware over IP) is an automotive/embedded
//! communication protocol which supports remote procedure calls, event notifications
//! and the underlying serialization/wire format.
//!
//! This library implements the Service Discovery part of SOME/IP together with
//! publish/subscribe of events over UDP. This includes encoding/decoding messages,
//! the SD state machines of offering and consuming nodes and the transport of events.
//!
//! This library is based on the R23-11 release of the SOME/IP specification which is part of the AUTOSAR standard.
//! This project is not affiliated with the AUTOSAR organization.
//!
//! ## Design
//!
//! A node creates one [`ServiceDiscovery`], which owns the SD socket and runs the
//! SD engine as a tokio task. Each offered service instance is a
//! [`ServerServiceInstance`], each consumed one a [`ClientServiceInstance`]; both
//! own their event socket and are attached to the engine with
//! [`ServiceDiscovery::attach`].
//!
//! ```no_run
//! # async fn run() -> Result<(), simple_someip_sd::Error> {
//! use std::net::{Ipv4Addr, SocketAddrV4};
//! use std::time::Duration;
//! use simple_someip_sd::{
//!     DiscoveryConfig, EventGroup, ServerServiceInstance, Service,
//!     ServiceDiscovery, TransportProtocol,
//! };
//!
//! let interface = Ipv4Addr::new(192, 168, 0, 10);
//! let sd = ServiceDiscovery::bind(DiscoveryConfig::on_interface(interface)).await?;
//! let service = Service::builder()
//!     .service_id(0x1234)
//!     .major_version(1)
//!     .eventgroup(EventGroup::new(0x0321, vec![0x0123]))
//!     .build();
//! let server = ServerServiceInstance::new(
//!     service,
//!     0x5678,
//!     SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0),
//!     5,
//!     &sd,
//!     Duration::from_secs(1),
//!     TransportProtocol::Udp,
//! )
//! .await?;
//! sd.attach(&server).await?;
//! server.start_offer().await?;
//! server.send_event(0x0321, 0x0123, &[0x01, 0x02]).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## References
//!
//! - [SOME/IP Specification R23-11](https://www.autosar.org/fileadmin/standards/R23-11/FO/AUTOSAR_FO_PRS_SOMEIPProtocol.pdf)
//! - [SOME/IP Service Discovery Specification R23-11](https://www.autosar.org/fileadmin/standards/R23-11/FO/AUTOSAR_FO_PRS_SOMEIPServiceDiscoveryProtocol.pdf)
//! - [AUTOSAR Website](https://www.autosar.org/)

#[cfg(feature = "client")]
pub mod client;
#[cfg(any(feature = "client", feature = "server"))]
pub mod discovery;
#[cfg(any(feature = "client", feature = "server"))]
mod error;
pub mod protocol;
pub mod serialization;
#[cfg(feature = "server")]
pub mod server;
pub mod service;
pub mod traits;

#[cfg(feature = "client")]
pub use client::{
    ClientOptions, ClientServiceInstance, EventMetadata, EventSink, SubscribeRetry,
    SubscriptionState,
};
#[cfg(any(feature = "client", feature = "server"))]
pub use discovery::{Attachment, DiscoveryConfig, ServiceDiscovery};
#[cfg(any(feature = "client", feature = "server"))]
pub use error::Error;
pub use protocol::sd::TransportProtocol;
#[cfg(feature = "server")]
pub use server::{SendReport, ServerServiceInstance};
pub use service::{EventGroup, Service, ServiceBuilder};

use std::net::Ipv4Addr;

pub const SD_MULTICAST_IP: Ipv4Addr = Ipv4Addr::new(239, 255, 0, 255);
pub const SD_MULTICAST_PORT: u16 = 30490;
///Message id for SOME/IP service discovery messages
pub const SD_MESSAGE_ID_VALUE: u32 = 0xffff_8100;
