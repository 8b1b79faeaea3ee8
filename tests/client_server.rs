use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use simple_someip_sd::{
    ClientServiceInstance, DiscoveryConfig, Error, EventGroup, EventMetadata, SendReport,
    ServerServiceInstance, Service, ServiceDiscovery, SubscriptionState, TransportProtocol,
};
use tokio::sync::mpsc;

const SERVICE_ID: u16 = 0x1234;
const INSTANCE_ID: u16 = 0x5678;
const EVENT_GROUP: u16 = 0x0321;
const EVENT_ID: u16 = 0x0123;
const OTHER_EVENT_GROUP: u16 = 0x0322;
const OTHER_EVENT_ID: u16 = 0x0124;
/// Known to clients only, never offered
const MISSING_EVENT_GROUP: u16 = 0x0999;

fn server_service() -> Service {
    Service::builder()
        .service_id(SERVICE_ID)
        .major_version(1)
        .eventgroup(EventGroup::new(EVENT_GROUP, vec![EVENT_ID]))
        .eventgroup(EventGroup::new(OTHER_EVENT_GROUP, vec![OTHER_EVENT_ID]))
        .build()
}

fn client_service() -> Service {
    Service::builder()
        .service_id(SERVICE_ID)
        .major_version(1)
        .eventgroup(EventGroup::new(EVENT_GROUP, vec![EVENT_ID]))
        .eventgroup(EventGroup::new(OTHER_EVENT_GROUP, vec![OTHER_EVENT_ID]))
        .eventgroup(EventGroup::new(MISSING_EVENT_GROUP, vec![0x0999]))
        .build()
}

fn localhost(port: u16) -> SocketAddrV4 {
    SocketAddrV4::new(Ipv4Addr::LOCALHOST, port)
}

fn free_port() -> u16 {
    std::net::UdpSocket::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

/// Two SD engines on loopback, each using the other's SD socket as its group
async fn engine_pair() -> (ServiceDiscovery, ServiceDiscovery) {
    let server_port = free_port();
    let client_port = free_port();
    let server_sd = ServiceDiscovery::bind(
        DiscoveryConfig::new(Ipv4Addr::LOCALHOST, Ipv4Addr::LOCALHOST, client_port)
            .with_bind_port(server_port)
            .with_initial_delay_max(Duration::ZERO),
    )
    .await
    .unwrap();
    let client_sd = ServiceDiscovery::bind(
        DiscoveryConfig::new(Ipv4Addr::LOCALHOST, Ipv4Addr::LOCALHOST, server_port)
            .with_bind_port(client_port)
            .with_initial_delay_max(Duration::ZERO),
    )
    .await
    .unwrap();
    (server_sd, client_sd)
}

async fn offering_server(sd: &ServiceDiscovery) -> ServerServiceInstance {
    let server = ServerServiceInstance::new(
        server_service(),
        INSTANCE_ID,
        localhost(0),
        5,
        sd,
        Duration::from_millis(200),
        TransportProtocol::Udp,
    )
    .await
    .unwrap();
    sd.attach(&server).await.unwrap();
    server.start_offer().await.unwrap();
    server
}

async fn attached_client(sd: &ServiceDiscovery) -> ClientServiceInstance {
    let client = ClientServiceInstance::new(
        client_service(),
        INSTANCE_ID,
        localhost(0),
        5,
        sd,
        TransportProtocol::Udp,
    )
    .await
    .unwrap();
    sd.attach(&client).await.unwrap();
    client
}

async fn wait_for_state(
    client: &ClientServiceInstance,
    event_group_id: u16,
    expected: SubscriptionState,
) {
    for _ in 0..300 {
        if client.subscription_state(event_group_id).await == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "event group 0x{:04X} never reached {:?}, is {:?}",
        event_group_id,
        expected,
        client.subscription_state(event_group_id).await
    );
}

async fn wait_for_subscribers(
    server: &ServerServiceInstance,
    event_group_id: u16,
    expected: usize,
) {
    for _ in 0..300 {
        if server.subscriber_count(event_group_id).await == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "event group 0x{:04X} never reached {} subscribers",
        event_group_id, expected
    );
}

fn channel_sink(
    client_events: mpsc::UnboundedSender<(EventMetadata, Vec<u8>)>,
) -> impl Fn(&EventMetadata, &[u8]) + Send + Sync + 'static {
    move |metadata: &EventMetadata, payload: &[u8]| {
        let _ = client_events.send((*metadata, payload.to_vec()));
    }
}

async fn subscribed_pair() -> (
    ServiceDiscovery,
    ServiceDiscovery,
    ServerServiceInstance,
    ClientServiceInstance,
) {
    let (server_sd, client_sd) = engine_pair().await;
    let server = offering_server(&server_sd).await;
    let client = attached_client(&client_sd).await;
    client.wait_discovered(Duration::from_secs(3)).await.unwrap();
    client.subscribe_eventgroup(EVENT_GROUP).await.unwrap();
    wait_for_state(&client, EVENT_GROUP, SubscriptionState::Subscribed).await;
    wait_for_subscribers(&server, EVENT_GROUP, 1).await;
    (server_sd, client_sd, server, client)
}

#[tokio::test]
async fn test_event_delivered_once() {
    let (_server_sd, _client_sd, server, client) = subscribed_pair().await;
    assert_eq!(client.remote_endpoint(), Some(server.local_endpoint()));

    let (events, mut received) = mpsc::unbounded_channel();
    client.register_callback(channel_sink(events)).await;

    let report = server.send_event(EVENT_GROUP, EVENT_ID, &[1, 2]).await.unwrap();
    assert_eq!(report, SendReport { delivered: 1, failed: 0 });

    let (metadata, payload) = tokio::time::timeout(Duration::from_secs(2), received.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(payload, vec![1, 2]);
    assert_eq!(metadata.service_id, SERVICE_ID);
    assert_eq!(metadata.instance_id, INSTANCE_ID);
    assert_eq!(metadata.event_id, EVENT_ID);
    assert_eq!(metadata.interface_version, 1);
    assert_eq!(metadata.source, server.local_endpoint());

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(received.try_recv().is_err());
}

#[tokio::test]
async fn test_subscribe_without_offer_fails() {
    let (_server_sd, client_sd) = engine_pair().await;
    let client = attached_client(&client_sd).await;
    assert!(matches!(
        client.wait_discovered(Duration::from_millis(200)).await,
        Err(Error::NotDiscovered { .. })
    ));
    assert!(matches!(
        client.subscribe_eventgroup(EVENT_GROUP).await,
        Err(Error::NotDiscovered {
            service_id: SERVICE_ID,
            instance_id: INSTANCE_ID
        })
    ));
    assert_eq!(
        client.subscription_state(EVENT_GROUP).await,
        SubscriptionState::Unsubscribed
    );
}

#[tokio::test]
async fn test_stop_offer_reaches_client_before_ttl() {
    let (_server_sd, _client_sd, server, client) = subscribed_pair().await;

    server.stop_offer().await.unwrap();
    let report = server.send_event(EVENT_GROUP, EVENT_ID, &[1, 2]).await.unwrap();
    assert_eq!(report, SendReport::default());

    // the offer TTL is 5 s, the StopOffer has to be acted upon much earlier
    for _ in 0..100 {
        if !client.is_discovered() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(!client.is_discovered());
    assert_eq!(
        client.subscription_state(EVENT_GROUP).await,
        SubscriptionState::Unsubscribed
    );
}

#[tokio::test]
async fn test_resubscribes_after_offer_restart() {
    let (_server_sd, _client_sd, server, client) = subscribed_pair().await;

    server.stop_offer().await.unwrap();
    wait_for_state(&client, EVENT_GROUP, SubscriptionState::Unsubscribed).await;
    server.start_offer().await.unwrap();

    client.wait_discovered(Duration::from_secs(3)).await.unwrap();
    wait_for_state(&client, EVENT_GROUP, SubscriptionState::Subscribed).await;
    wait_for_subscribers(&server, EVENT_GROUP, 1).await;
}

#[tokio::test]
async fn test_unknown_event_group_is_rejected() {
    let (_server_sd, _client_sd, server, client) = subscribed_pair().await;

    client.subscribe_eventgroup(MISSING_EVENT_GROUP).await.unwrap();
    wait_for_state(&client, MISSING_EVENT_GROUP, SubscriptionState::Rejected).await;
    // the established subscription is not affected
    assert_eq!(
        client.subscription_state(EVENT_GROUP).await,
        SubscriptionState::Subscribed
    );
    assert_eq!(server.subscriber_count(EVENT_GROUP).await, 1);
}

#[tokio::test]
async fn test_stop_subscribe_removes_subscriber() {
    let (_server_sd, _client_sd, server, client) = subscribed_pair().await;

    client.stop_subscribe_eventgroup(EVENT_GROUP).await.unwrap();
    wait_for_subscribers(&server, EVENT_GROUP, 0).await;
    let report = server.send_event(EVENT_GROUP, EVENT_ID, &[1]).await.unwrap();
    assert_eq!(report.delivered, 0);

    // offer refreshes do not bring the subscription back
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(server.subscriber_count(EVENT_GROUP).await, 0);
}

#[tokio::test]
async fn test_event_groups_are_isolated() {
    let (_server_sd, client_sd, server, client) = subscribed_pair().await;
    let other = attached_client(&client_sd).await;
    other.wait_discovered(Duration::from_secs(3)).await.unwrap();
    other.subscribe_eventgroup(OTHER_EVENT_GROUP).await.unwrap();
    wait_for_state(&other, OTHER_EVENT_GROUP, SubscriptionState::Subscribed).await;
    wait_for_subscribers(&server, OTHER_EVENT_GROUP, 1).await;

    let first_calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&first_calls);
    client
        .register_callback(move |_: &EventMetadata, _: &[u8]| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .await;
    let (events, mut received) = mpsc::unbounded_channel();
    other.register_callback(channel_sink(events)).await;

    let report = server
        .send_event(OTHER_EVENT_GROUP, OTHER_EVENT_ID, &[7])
        .await
        .unwrap();
    assert_eq!(report.delivered, 1);
    let (metadata, payload) = tokio::time::timeout(Duration::from_secs(2), received.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(metadata.event_id, OTHER_EVENT_ID);
    assert_eq!(payload, vec![7]);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(first_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_repeated_subscribe_keeps_one_subscriber() {
    let (_server_sd, _client_sd, server, client) = subscribed_pair().await;

    client.subscribe_eventgroup(EVENT_GROUP).await.unwrap();
    server.start_offer().await.unwrap();
    // several offer periods, each refreshing the subscription
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(server.subscriber_count(EVENT_GROUP).await, 1);
    let report = server.send_event(EVENT_GROUP, EVENT_ID, &[1]).await.unwrap();
    assert_eq!(report, SendReport { delivered: 1, failed: 0 });
}

#[tokio::test]
async fn test_closing_server_engine_stops_offer() {
    let (server_sd, _client_sd, server, client) = subscribed_pair().await;

    server_sd.close().await.unwrap();
    assert!(server_sd.is_closed());
    for _ in 0..100 {
        if !client.is_discovered() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(!client.is_discovered());
    assert!(matches!(server.start_offer().await, Err(Error::EngineClosed)));
}

#[tokio::test]
async fn test_dropped_client_leaves_server_registry() {
    let (_server_sd, client_sd, server, client) = subscribed_pair().await;

    drop(client);
    wait_for_subscribers(&server, EVENT_GROUP, 0).await;
    let report = server.send_event(EVENT_GROUP, EVENT_ID, &[1]).await.unwrap();
    assert_eq!(report, SendReport::default());

    // the engine forgot the instance, cyclic offers do not revive it
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(server.subscriber_count(EVENT_GROUP).await, 0);
    assert!(!client_sd.is_closed());
}

#[tokio::test]
async fn test_dropped_server_withdraws_offer() {
    let (server_sd, _client_sd, server, client) = subscribed_pair().await;

    drop(server);
    for _ in 0..100 {
        if !client.is_discovered() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(!client.is_discovered());
    assert_eq!(
        client.subscription_state(EVENT_GROUP).await,
        SubscriptionState::Unsubscribed
    );
    assert!(!server_sd.is_closed());
}
