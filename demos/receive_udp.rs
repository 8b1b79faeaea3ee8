//! Subscribes to the temperature service and prints every measurement
//!
//! `cargo run --example receive_udp -- <interface> [log level]`

#[path = "temperature.rs"]
mod temperature;

use std::net::SocketAddrV4;
use std::time::Duration;

use simple_someip_sd::{
    ClientServiceInstance, DiscoveryConfig, Error, EventGroup, EventMetadata, Service,
    ServiceDiscovery, TransportProtocol, serialization,
};
use temperature::*;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Error> {
    let (level, interface) = parse_args();
    tracing_subscriber::fmt().with_max_level(level).init();

    let sd = ServiceDiscovery::bind(DiscoveryConfig::new(interface, SD_MULTICAST_GROUP, SD_PORT))
        .await?;
    let service = Service::builder()
        .service_id(SAMPLE_SERVICE_ID)
        .major_version(1)
        .eventgroup(EventGroup::new(SAMPLE_EVENTGROUP_ID, vec![SAMPLE_EVENT_ID]))
        .build();
    let client = ClientServiceInstance::new(
        service,
        SAMPLE_INSTANCE_ID,
        SocketAddrV4::new(interface, 3002),
        5,
        &sd,
        TransportProtocol::Udp,
    )
    .await?;
    client
        .register_callback(|metadata: &EventMetadata, payload: &[u8]| {
            match serialization::from_bytes::<TemperatureMsg>(payload) {
                Ok(message) => info!(
                    "Event 0x{:04X} from {}: {:?}",
                    metadata.event_id, metadata.source, message
                ),
                Err(e) => warn!("Undecodable temperature message: {}", e),
            }
        })
        .await;
    sd.attach(&client).await?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            discovered = client.wait_discovered(Duration::from_secs(5)) => match discovered {
                Ok(endpoint) => {
                    info!("Service found at {}", endpoint);
                    client.subscribe_eventgroup(SAMPLE_EVENTGROUP_ID).await?;
                    let _ = tokio::signal::ctrl_c().await;
                    break;
                }
                Err(e) => info!("{}, still looking", e),
            }
        }
    }

    sd.close().await?;
    Ok(())
}
