use std::sync::Arc;
use std::time::Duration;

use pipenet::{
    AnyTransport, ConnectionFactory, ConnectionListener, Endpoint, ListenerFactory,
    ListenerState, PeerAddr, TcpTransport, TransportConfig, TransportError, TransportKind,
};

const TIMEOUT: Duration = Duration::from_secs(5);

fn loopback() -> Endpoint {
    "tcp://127.0.0.1:0".parse().unwrap()
}

#[tokio::test]
async fn test_tcp_round_trip() {
    let transport = TcpTransport::new(TransportConfig::default());
    let listener = transport.listen(&loopback()).await.unwrap();
    let bound = listener.local_endpoint().clone();
    let port = bound.as_tcp().unwrap().port();
    assert_ne!(port, 0);

    let (client, server) = tokio::join!(transport.connect(&bound), listener.accept());
    let mut client = client.unwrap();
    let mut server = server.unwrap();

    assert_eq!(client.remote_endpoint(), &bound);
    assert_eq!(
        server.properties().get::<PeerAddr>().map(|p| p.0),
        client.local_endpoint().as_tcp()
    );

    client.output().write_all(b"over tcp").await.unwrap();
    client.output().complete();

    let mut received = Vec::new();
    loop {
        let result = tokio::time::timeout(TIMEOUT, server.input().read())
            .await
            .unwrap()
            .unwrap();
        received.extend_from_slice(&result.buffer);
        server.input().advance(result.buffer.len()).unwrap();
        if result.is_completed {
            break;
        }
    }
    assert_eq!(received, b"over tcp");

    server.dispose().await;
    let result = tokio::time::timeout(TIMEOUT, client.input().read())
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_completed);
}

#[tokio::test]
async fn test_connect_to_closed_port_is_refused() {
    let transport = TcpTransport::new(TransportConfig::default());
    // Bind and drop to find a port nobody listens on
    let listener = transport.listen(&loopback()).await.unwrap();
    let endpoint = listener.local_endpoint().clone();
    drop(listener);

    let err = transport.connect(&endpoint).await.unwrap_err();
    assert!(matches!(err, TransportError::ConnectionRefused(_)), "{err:?}");
}

#[tokio::test]
async fn test_listen_on_bound_port_is_address_in_use() {
    let transport = TcpTransport::new(TransportConfig::default());
    let listener = transport.listen(&loopback()).await.unwrap();

    let err = transport
        .listen(listener.local_endpoint())
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::AddressInUse(_)), "{err:?}");
}

#[tokio::test]
async fn test_stop_fails_pending_accept() {
    let transport = TcpTransport::new(TransportConfig::default());
    let listener = Arc::new(transport.listen(&loopback()).await.unwrap());

    let pending = {
        let listener = Arc::clone(&listener);
        tokio::spawn(async move { listener.accept().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    listener.stop();
    assert_eq!(listener.state(), ListenerState::Stopped);

    let result = tokio::time::timeout(TIMEOUT, pending).await.unwrap().unwrap();
    assert!(matches!(result, Err(TransportError::ListenerClosed)));
}

#[tokio::test]
async fn test_config_selects_tcp() {
    let config = TransportConfig::from_json_str(r#"{"kind": "tcp"}"#).unwrap();
    let transport = AnyTransport::from_config(&config);
    assert_eq!(transport.kind(), TransportKind::Tcp);

    let listener = transport.listen(&loopback()).await.unwrap();
    let bound = listener.local_endpoint().clone();
    let (client, server) = tokio::join!(transport.connect(&bound), listener.accept());
    assert_eq!(client.unwrap().remote_endpoint(), &bound);
    assert!(server.is_ok());

    let err = transport
        .listen(&Endpoint::memory("default"))
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::UnsupportedEndpoint(_)));
}
