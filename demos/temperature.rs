//! Temperature message shared by the `send_udp` and `receive_udp` demos

use std::net::Ipv4Addr;

use simple_someip_sd::wire_struct;

pub const SD_MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(224, 224, 224, 245);
pub const SD_PORT: u16 = 30490;

pub const SAMPLE_SERVICE_ID: u16 = 0x1234;
pub const SAMPLE_INSTANCE_ID: u16 = 0x5678;
pub const SAMPLE_EVENTGROUP_ID: u16 = 0x0321;
pub const SAMPLE_EVENT_ID: u16 = 0x0123;

wire_struct! {
    #[derive(Clone, Debug, Default, PartialEq)]
    pub struct Version {
        pub major: u8,
        pub minor: u8,
    }
}

wire_struct! {
    #[derive(Clone, Debug, Default, PartialEq)]
    pub struct TemperatureMsg {
        pub version: Version,
        pub timestamp: u64,
        pub measurements: [f32; 4],
    }
}

/// Parses `<interface> [log level]` from the command line, exiting on a missing interface.
pub fn parse_args() -> (tracing::level_filters::LevelFilter, Ipv4Addr) {
    let mut args = std::env::args().skip(1);
    let interface = match args.next().map(|interface| interface.parse::<Ipv4Addr>()) {
        Some(Ok(interface)) if !interface.is_unspecified() => interface,
        _ => {
            eprintln!("usage: <interface address> [log level], e.g. 192.168.0.10 debug");
            std::process::exit(2);
        }
    };
    let level = args
        .next()
        .and_then(|level| level.parse().ok())
        .unwrap_or(tracing::level_filters::LevelFilter::INFO);
    (level, interface)
}
