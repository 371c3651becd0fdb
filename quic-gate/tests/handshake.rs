use std::{
    io::{self, Write},
    net::{Ipv4Addr, SocketAddr, UdpSocket},
    str,
    sync::Arc,
    time::Duration,
};

use assert_matches::assert_matches;
use quic_gate::{
    crypto::rustls::HandshakeData,
    dial, dial_addr, listen_addr,
    version::{V1, V2},
    ClientConfig, ConnectionError, DialError, Endpoint, EndpointConfig, Listener, ServerConfig,
    TransportErrorCode,
};
use rustls::pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer};
use tokio::time::{sleep, timeout, Instant};
use tracing::info;
use tracing_futures::Instrument as _;
use tracing_subscriber::EnvFilter;

#[tokio::test]
async fn dial_and_accept() {
    let _guard = subscribe();
    let cert = certificate();
    let listener = listen(server_config(&cert));
    let addr = listener.local_addr().unwrap();

    let (client, server) = tokio::join!(
        dial(addr, "localhost", client_config(&cert)).instrument(tracing::info_span!("client")),
        listener.accept()
    );
    let client = client.unwrap();
    let server = server.unwrap();

    assert_eq!(client.version(), V1);
    assert_eq!(server.version(), V1);
    assert_eq!(client.remote_address(), addr);
    assert!(client.side().is_client() && server.side().is_server());
    let data = server
        .handshake_data()
        .unwrap()
        .downcast::<HandshakeData>()
        .unwrap();
    assert_eq!(data.server_name.as_deref(), Some("localhost"));
    assert!(client.close_reason().is_none());
}

#[tokio::test]
async fn certificate_name_mismatch() {
    let _guard = subscribe();
    let cert = certificate();
    let listener = listen(server_config(&cert));
    let addr = listener.local_addr().unwrap();

    let result = dial(addr, "example.com", client_config(&cert)).await;
    assert_matches!(
        result,
        Err(DialError::Connection(ConnectionError::HandshakeFailed(e))) if e.code.tls_alert().is_some()
    );
}

#[tokio::test]
async fn server_name_override() {
    let _guard = subscribe();
    let cert = certificate();
    let listener = listen(server_config(&cert));
    let addr = listener.local_addr().unwrap();

    // The dialed host does not match the certificate, but the configured name does
    let mut config = client_config(&cert);
    config.server_name("localhost");
    let conn = dial_addr(&addr.to_string(), config).await.unwrap();
    assert_eq!(conn.remote_address(), addr);
}

#[tokio::test]
async fn version_convergence() {
    let _guard = subscribe();
    let cert = certificate();
    let mut endpoint_config = EndpointConfig::default();
    endpoint_config.supported_versions(vec![V1]).unwrap();
    let server = server_endpoint(endpoint_config, server_config(&cert));
    let addr = server.local_addr().unwrap();

    let mut config = client_config(&cert);
    config.versions(vec![V2, V1]).unwrap();
    let conn = dial(addr, "localhost", config).await.unwrap();
    assert_eq!(conn.version(), V1);
    assert_eq!(server.accept().await.unwrap().version(), V1);
}

#[tokio::test]
async fn no_common_version() {
    let _guard = subscribe();
    let cert = certificate();
    let mut endpoint_config = EndpointConfig::default();
    endpoint_config.supported_versions(vec![V1]).unwrap();
    let server = server_endpoint(endpoint_config, server_config(&cert));
    let addr = server.local_addr().unwrap();

    let mut config = client_config(&cert);
    config.versions(vec![V2]).unwrap();
    let result = dial(addr, "localhost", config).await;
    assert_matches!(
        result,
        Err(DialError::Connection(ConnectionError::NoCommonVersion))
    );
    assert_eq!(server.open_connections(), 0);
}

#[tokio::test]
async fn admission_bound() {
    let _guard = subscribe();
    let cert = certificate();
    let mut config = server_config(&cert);
    config.max_accept_queue_size(2).unwrap();
    let listener = listen(config);
    let addr = listener.local_addr().unwrap();

    let _first = dial(addr, "localhost", client_config(&cert)).await.unwrap();
    let _second = dial(addr, "localhost", client_config(&cert)).await.unwrap();
    let rejected = dial(addr, "localhost", client_config(&cert)).await.unwrap_err();
    assert_matches!(
        rejected,
        DialError::Connection(ConnectionError::AdmissionRejected)
    );
    assert_eq!(rejected.code(), Some(TransportErrorCode::PEER_GOING_AWAY));

    // Accepting frees exactly one slot
    let _accepted = listener.accept().await.unwrap();
    let _third = dial(addr, "localhost", client_config(&cert)).await.unwrap();
    assert_matches!(
        dial(addr, "localhost", client_config(&cert)).await,
        Err(DialError::Connection(ConnectionError::AdmissionRejected))
    );
}

#[tokio::test]
async fn admission_bound_without_retry() {
    let _guard = subscribe();
    let cert = certificate();
    let mut config = server_config(&cert);
    config
        .accept_cookie(|_, _| true)
        .max_accept_queue_size(2)
        .unwrap();
    let listener = listen(config);
    let addr = listener.local_addr().unwrap();

    let _first = dial(addr, "localhost", client_config(&cert)).await.unwrap();
    let _second = dial(addr, "localhost", client_config(&cert)).await.unwrap();
    assert_matches!(
        dial(addr, "localhost", client_config(&cert)).await,
        Err(DialError::Connection(ConnectionError::AdmissionRejected))
    );

    let _accepted = listener.accept().await.unwrap();
    let _third = dial(addr, "localhost", client_config(&cert)).await.unwrap();
    assert_matches!(
        dial(addr, "localhost", client_config(&cert)).await,
        Err(DialError::Connection(ConnectionError::AdmissionRejected))
    );
}

#[tokio::test]
async fn closing_queued_connection_frees_slot() {
    let _guard = subscribe();
    let cert = certificate();
    let mut config = server_config(&cert);
    config.max_accept_queue_size(2).unwrap();
    let listener = listen(config);
    let addr = listener.local_addr().unwrap();

    let first = dial(addr, "localhost", client_config(&cert)).await.unwrap();
    let _second = dial(addr, "localhost", client_config(&cert)).await.unwrap();
    assert_matches!(
        dial(addr, "localhost", client_config(&cert)).await,
        Err(DialError::Connection(ConnectionError::AdmissionRejected))
    );

    first.close(TransportErrorCode::NO_ERROR, b"done");
    assert_matches!(first.closed().await, ConnectionError::LocallyClosed);
    wait_for_connections(listener.endpoint(), 1).await;

    let _replacement = dial(addr, "localhost", client_config(&cert)).await.unwrap();
    assert_matches!(
        dial(addr, "localhost", client_config(&cert)).await,
        Err(DialError::Connection(ConnectionError::AdmissionRejected))
    );
}

#[tokio::test]
async fn dropping_connection_closes_it() {
    let _guard = subscribe();
    let cert = certificate();
    let listener = listen(server_config(&cert));
    let addr = listener.local_addr().unwrap();

    let client = dial(addr, "localhost", client_config(&cert)).await.unwrap();
    let server = listener.accept().await.unwrap();
    drop(client);
    assert_matches!(
        timeout(Duration::from_secs(5), server.closed()).await,
        Ok(ConnectionError::ConnectionClosed(e)) if e.code == TransportErrorCode::NO_ERROR
    );
}

#[tokio::test]
async fn close_unblocks_accept() {
    let _guard = subscribe();
    let cert = certificate();
    let listener = Arc::new(listen(server_config(&cert)));

    let accept = tokio::spawn({
        let listener = listener.clone();
        async move { listener.accept().await }
    });
    sleep(Duration::from_millis(50)).await;
    listener.close();
    assert_matches!(
        timeout(Duration::from_secs(5), accept).await,
        Ok(Ok(Err(ConnectionError::ListenerClosed)))
    );
    assert_matches!(listener.accept().await, Err(ConnectionError::ListenerClosed));
}

#[tokio::test]
async fn close_fails_connections() {
    let _guard = subscribe();
    let cert = certificate();
    let listener = listen(server_config(&cert));
    let addr = listener.local_addr().unwrap();

    let client = dial(addr, "localhost", client_config(&cert)).await.unwrap();
    let server = listener.accept().await.unwrap();
    listener.close();

    assert_matches!(server.closed().await, ConnectionError::ListenerClosed);
    assert_matches!(
        timeout(Duration::from_secs(5), client.closed()).await,
        Ok(ConnectionError::ConnectionClosed(e)) if e.code == TransportErrorCode::NO_ERROR
    );

    // Refused, or unanswered once the driver has stopped
    let mut config = client_config(&cert);
    config.handshake_timeout(Duration::from_millis(500));
    assert_matches!(
        dial(addr, "localhost", config).await,
        Err(DialError::Connection(_))
    );
}

#[tokio::test]
async fn close_endpoint() {
    let _guard = subscribe();
    let cert = certificate();
    let endpoint = Endpoint::client(SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 0)).unwrap();

    // Nothing listens there, so the attempt stays pending until closed
    let connecting = endpoint
        .connect(
            client_config(&cert),
            SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 1234),
            "localhost",
        )
        .unwrap();
    assert!(format!("{connecting:?}").contains("remote: Some(127.0.0.1:1234)"));
    endpoint.close(TransportErrorCode::NO_ERROR, &[]);
    assert_matches!(connecting.await, Err(ConnectionError::LocallyClosed));
    assert_matches!(
        endpoint.connect(
            client_config(&cert),
            SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 1234),
            "localhost",
        ),
        Err(_)
    );
}

#[tokio::test]
async fn handshake_timeout() {
    let _guard = subscribe();
    let cert = certificate();
    // A bound socket that never answers
    let silent = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();

    let mut config = client_config(&cert);
    const TIMEOUT: Duration = Duration::from_millis(300);
    config.handshake_timeout(TIMEOUT);
    let start = Instant::now();
    let result = dial(silent.local_addr().unwrap(), "localhost", config).await;
    assert_matches!(
        result,
        Err(DialError::Connection(ConnectionError::TimedOut))
    );
    assert!(start.elapsed() >= TIMEOUT);
}

fn listen(config: ServerConfig) -> Listener {
    listen_addr(SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 0), config).unwrap()
}

fn server_endpoint(endpoint_config: EndpointConfig, server_config: ServerConfig) -> Endpoint {
    Endpoint::new(
        endpoint_config,
        Some(server_config),
        UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap(),
    )
    .unwrap()
}

/// Wait until the server has let go of all but `n` connections
async fn wait_for_connections(endpoint: &Endpoint, n: usize) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while endpoint.open_connections() != n {
        assert!(Instant::now() < deadline, "connection was never released");
        sleep(Duration::from_millis(10)).await;
    }
    info!(n, "connections settled");
}

fn certificate() -> rcgen::CertifiedKey<rcgen::KeyPair> {
    rcgen::generate_simple_self_signed(vec!["localhost".into()]).unwrap()
}

fn server_config(cert: &rcgen::CertifiedKey<rcgen::KeyPair>) -> ServerConfig {
    let key = PrivatePkcs8KeyDer::from(cert.signing_key.serialize_der());
    ServerConfig::with_single_cert(vec![cert.cert.der().clone()], PrivateKeyDer::Pkcs8(key))
        .unwrap()
}

fn client_config(cert: &rcgen::CertifiedKey<rcgen::KeyPair>) -> ClientConfig {
    let mut roots = rustls::RootCertStore::empty();
    roots.add(cert.cert.der().clone()).unwrap();
    ClientConfig::with_root_certificates(Arc::new(roots)).unwrap()
}

fn subscribe() -> tracing::subscriber::DefaultGuard {
    let sub = tracing_subscriber::FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(|| TestWriter)
        .finish();
    tracing::subscriber::set_default(sub)
}

struct TestWriter;

impl Write for TestWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        print!(
            "{}",
            str::from_utf8(buf).expect("tried to log invalid UTF-8")
        );
        Ok(buf.len())
    }
    fn flush(&mut self) -> io::Result<()> {
        io::stdout().flush()
    }
}
