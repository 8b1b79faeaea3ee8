//! Offers the temperature service and publishes a measurement every second
//!
//! `cargo run --example send_udp -- <interface> [log level]`

#[path = "temperature.rs"]
mod temperature;

use std::net::SocketAddrV4;
use std::time::Duration;

use simple_someip_sd::{
    DiscoveryConfig, Error, EventGroup, ServerServiceInstance, Service, ServiceDiscovery,
    TransportProtocol, serialization,
};
use temperature::*;
use tracing::{error, info};

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
    let server = ServerServiceInstance::new(
        service,
        SAMPLE_INSTANCE_ID,
        SocketAddrV4::new(interface, 3000),
        5,
        &sd,
        Duration::from_secs(2),
        TransportProtocol::Udp,
    )
    .await?;
    sd.attach(&server).await?;
    info!("Start offering service");
    server.start_offer().await?;

    let mut message = TemperatureMsg {
        version: Version { major: 1, minor: 0 },
        ..Default::default()
    };
    let mut interval = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = interval.tick() => {
                message.timestamp += 1;
                for (i, measurement) in message.measurements.iter_mut().enumerate() {
                    *measurement = 20.0 + i as f32 + (message.timestamp % 10) as f32 * 0.1;
                }
                let payload = serialization::to_bytes(&message)?;
                match server
                    .send_event(SAMPLE_EVENTGROUP_ID, SAMPLE_EVENT_ID, &payload)
                    .await
                {
                    Ok(report) => info!("Sent {:?} to {} subscribers", message, report.delivered),
                    Err(e) => error!("Failed to send event: {}", e),
                }
            }
        }
    }

    info!("Stop offering service");
    server.stop_offer().await?;
    sd.close().await?;
    Ok(())
}
