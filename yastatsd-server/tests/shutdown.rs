use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, UdpSocket};
use yastatsd_config::Config;
use yastatsd_server::ServiceState;
use yastatsd_system::{Controller, ShutdownMode};

#[tokio::test]
async fn test_graceful_shutdown_flushes_partial_window() {
    yastatsd_test::setup();

    let graphite = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let graphite_port = graphite.local_addr().unwrap().port();

    let config = Config::from_json_value(serde_json::json!({
        "yastatsd": {
            "host": "127.0.0.1",
            "port": 0,
            "flush_interval": 3600,
            "shutdown_timeout": 5,
        },
        "graphite": {
            "host": "127.0.0.1",
            "port": graphite_port,
        },
    }))
    .unwrap();

    Controller::start(config.shutdown_timeout());
    let state = ServiceState::start(&config).await.unwrap();

    let (mut stream, _) = tokio::time::timeout(Duration::from_secs(5), graphite.accept())
        .await
        .unwrap()
        .unwrap();

    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    client.send_to(b"g:3|g", state.udp_addr()).await.unwrap();
    // Give the listener time to hand the datagram to the aggregator.
    tokio::time::sleep(Duration::from_millis(200)).await;

    Controller::shutdown(ShutdownMode::Graceful);
    let shutdown = Controller::shutdown_handle().notified().await;
    assert_eq!(shutdown.timeout, Some(Duration::from_secs(5)));
    state.join(shutdown).await;

    // All services have stopped, so the sink closed the connection.
    let mut received = String::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_string(&mut received))
        .await
        .unwrap()
        .unwrap();

    assert!(received.contains("stats.gauges.g 3.0 "));
    assert!(received.contains("statsd.gauges.count 1 "));
}
