use std::{sync::Arc, time::Duration};

use assert_matches::assert_matches;
use bytes::Bytes;

use super::*;
use crate::{
    packet::{Header, Packet, PacketKind},
    token::Cookie,
    version::{V1, V2},
};

mod util;
use util::*;

fn endpoint_config(versions: Vec<VersionNumber>) -> Arc<EndpointConfig> {
    let mut config = EndpointConfig::default();
    config.supported_versions(versions).unwrap();
    Arc::new(config)
}

fn client_config_with_versions(versions: Vec<VersionNumber>) -> ClientConfig {
    let mut config = client_config();
    config.versions(versions).unwrap();
    config
}

/// The header of the client's first Initial, which is consumed
fn intercept_initial(pair: &mut Pair) -> Header {
    let transmit = pair.client.endpoint.poll_transmit().unwrap();
    assert_eq!(transmit.destination, pair.server.addr);
    let packet = Packet::decode(transmit.contents).unwrap();
    assert_eq!(packet.kind(), PacketKind::Initial);
    *packet.header()
}

#[test]
fn handshake_with_retry() {
    let _guard = subscribe();
    let mut pair = Pair::with_server_config(server_config());
    let client_ch = pair.connect();

    assert_matches!(pair.client.last_event(client_ch), Some(Event::Connected));
    assert_eq!(pair.client.endpoint.state(client_ch), Some(State::Accepted));
    assert_eq!(pair.server.sent.first(), Some(&PacketKind::Retry));
    assert_eq!(pair.server.sent.last(), Some(&PacketKind::HandshakeDone));
    assert!(pair.server.sent.contains(&PacketKind::Handshake));
    assert_eq!(pair.client.sent[..2], [PacketKind::Initial, PacketKind::Initial]);

    let server_ch = pair.server.accept().unwrap();
    assert_eq!(pair.server.endpoint.state(server_ch), Some(State::Accepted));
    assert_eq!(pair.server.endpoint.version(server_ch), Some(V1));
    assert_eq!(pair.client.endpoint.version(client_ch), Some(V1));
}

#[test]
fn handshake_without_retry() {
    let _guard = subscribe();
    let mut server_config = server_config();
    server_config.use_retry(false);
    let mut pair = Pair::with_server_config(server_config);
    let client_ch = pair.connect();

    assert_matches!(pair.client.last_event(client_ch), Some(Event::Connected));
    assert!(!pair.server.sent.contains(&PacketKind::Retry));
    assert_eq!(pair.server.accept_queue.len(), 1);
}

#[test]
fn accept_cookie_skips_retry() {
    let _guard = subscribe();
    let mut server_config = server_config();
    server_config.accept_cookie(|_, _: Option<&Cookie>| true);
    let mut pair = Pair::with_server_config(server_config);
    let client_ch = pair.connect();

    assert_matches!(pair.client.last_event(client_ch), Some(Event::Connected));
    assert!(!pair.server.sent.contains(&PacketKind::Retry));
}

#[test]
fn accept_cookie_may_demand_retry() {
    let _guard = subscribe();
    let mut server_config = server_config();
    server_config
        .use_retry(false)
        .accept_cookie(|remote, cookie: Option<&Cookie>| {
            cookie.map_or(false, |c| c.remote_address == *remote)
        });
    let mut pair = Pair::with_server_config(server_config);
    let client_ch = pair.connect();

    assert_matches!(pair.client.last_event(client_ch), Some(Event::Connected));
    assert_eq!(pair.server.sent[0], PacketKind::Retry);
}

#[test]
fn version_negotiation() {
    let _guard = subscribe();
    let mut pair = Pair::new(endpoint_config(vec![7, 8, V1, 9]), server_config());
    let client_ch = pair.connect_with(client_config_with_versions(vec![10, 11, V1, 12]), "localhost");

    assert_matches!(pair.client.last_event(client_ch), Some(Event::Connected));
    assert_eq!(pair.server.sent[0], PacketKind::VersionNegotiate);
    assert_eq!(pair.client.endpoint.version(client_ch), Some(V1));
    let server_ch = pair.server.accept().unwrap();
    assert_eq!(pair.server.endpoint.version(server_ch), Some(V1));
}

#[test]
fn first_choice_needs_no_negotiation() {
    let _guard = subscribe();
    let mut pair = Pair::new(endpoint_config(vec![V1, V2]), server_config());
    let client_ch = pair.connect_with(client_config_with_versions(vec![V2, V1]), "localhost");

    assert_matches!(pair.client.last_event(client_ch), Some(Event::Connected));
    assert!(!pair.server.sent.contains(&PacketKind::VersionNegotiate));
    assert_eq!(pair.client.endpoint.version(client_ch), Some(V2));
}

#[test]
fn no_common_version() {
    let _guard = subscribe();
    let mut pair = Pair::new(endpoint_config(vec![V1]), server_config());
    let client_ch = pair.connect_with(client_config_with_versions(vec![V2]), "localhost");

    assert_eq!(
        pair.client.last_event(client_ch),
        Some(&Event::ConnectionLost(ConnectionError::NoCommonVersion))
    );
    assert_eq!(pair.server.sent, [PacketKind::Close]);
    assert_eq!(pair.server.endpoint.open_sessions(), 0);
    assert_eq!(pair.client.endpoint.open_sessions(), 0);
}

#[test]
fn version_negotiation_listing_attempted_version_is_ignored() {
    let _guard = subscribe();
    let mut pair = Pair::with_server_config(server_config());
    let client_ch = pair.begin_connect(client_config_with_versions(vec![V1, V2]), "localhost");
    let initial = intercept_initial(&mut pair);

    let vn = |versions| Packet::VersionNegotiate {
        header: Header {
            version: version::VERSION_NEGOTIATION,
            dst_cid: initial.src_cid,
            src_cid: initial.dst_cid,
        },
        versions,
    };
    assert_eq!(pair.inject_to_client(&vn(vec![V1, V2])), None);
    assert_eq!(pair.client.endpoint.version(client_ch), Some(V1));
    assert!(pair.client.endpoint.poll_transmit().is_none());

    // A genuine list moves the client to the next version it prefers
    assert_eq!(pair.inject_to_client(&vn(vec![V2])), None);
    assert_eq!(pair.client.endpoint.version(client_ch), Some(V2));
    assert_eq!(pair.client.endpoint.state(client_ch), Some(State::Initial));

    // Only one Version Negotiation is acted upon per attempt
    intercept_initial(&mut pair);
    assert_eq!(pair.inject_to_client(&vn(vec![7])), None);
    assert_eq!(pair.client.endpoint.version(client_ch), Some(V2));
}

#[test]
fn forged_version_negotiation_detected() {
    let _guard = subscribe();
    let mut pair = Pair::new(endpoint_config(vec![V1, V2]), server_config());
    let client_ch = pair.begin_connect(client_config_with_versions(vec![V1, V2]), "localhost");
    let initial = intercept_initial(&mut pair);

    // An attacker steers the client away from a version both sides prefer
    pair.inject_to_client(&Packet::VersionNegotiate {
        header: Header {
            version: version::VERSION_NEGOTIATION,
            dst_cid: initial.src_cid,
            src_cid: initial.dst_cid,
        },
        versions: vec![V2],
    });
    pair.drive();

    assert_eq!(
        pair.client.last_event(client_ch),
        Some(&Event::ConnectionLost(ConnectionError::NoCommonVersion))
    );
    assert_eq!(pair.server.endpoint.open_sessions(), 0);
    assert!(pair.server.accept_queue.is_empty());
}

#[test]
fn server_name_must_match_certificate() {
    let _guard = subscribe();
    let mut pair = Pair::with_server_config(server_config());

    let ok = pair.connect_with(client_config(), "localhost");
    assert_matches!(pair.client.last_event(ok), Some(Event::Connected));

    let bad = pair.connect_with(client_config(), "127.0.0.1");
    assert_matches!(
        pair.client.last_event(bad),
        Some(Event::ConnectionLost(ConnectionError::HandshakeFailed(e))) if e.code.tls_alert().is_some()
    );
    assert_eq!(pair.client.endpoint.state(bad), None);

    let mut config = client_config();
    config.server_name("localhost");
    let overridden = pair.connect_with(config, "127.0.0.1");
    assert_matches!(pair.client.last_event(overridden), Some(Event::Connected));

    // The failed handshake left nothing behind on the server
    assert_eq!(pair.server.endpoint.open_sessions(), 2);
    assert_eq!(pair.server.accept_queue.len(), 2);
}

fn bounded_pair(capacity: usize, use_retry: bool) -> Pair {
    let mut server_config = server_config();
    server_config
        .max_accept_queue_size(capacity)
        .unwrap()
        .use_retry(use_retry);
    Pair::with_server_config(server_config)
}

fn admission_bound(use_retry: bool) {
    let mut pair = bounded_pair(2, use_retry);
    for _ in 0..2 {
        let ch = pair.connect();
        assert_matches!(pair.client.last_event(ch), Some(Event::Connected));
    }
    let rejected = pair.connect();
    assert_eq!(
        pair.client.last_event(rejected),
        Some(&Event::ConnectionLost(ConnectionError::AdmissionRejected))
    );
    assert_eq!(pair.server.accept_queue.len(), 2);
    assert_eq!(pair.server.endpoint.open_sessions(), 2);

    // Accepting one session frees exactly one slot
    pair.server.accept().unwrap();
    let ch = pair.connect();
    assert_matches!(pair.client.last_event(ch), Some(Event::Connected));
    let ch = pair.connect();
    assert_matches!(
        pair.client.last_event(ch),
        Some(Event::ConnectionLost(ConnectionError::AdmissionRejected))
    );
}

#[test]
fn admission_bound_at_completion() {
    let _guard = subscribe();
    admission_bound(false);
}

#[test]
fn admission_bound_at_retry() {
    let _guard = subscribe();
    admission_bound(true);
}

#[test]
fn admission_rejection_code() {
    assert_eq!(
        ConnectionError::AdmissionRejected.code(),
        Some(TransportErrorCode::PEER_GOING_AWAY)
    );
}

#[test]
fn closing_queued_session_frees_slot() {
    let _guard = subscribe();
    let mut pair = bounded_pair(2, false);
    let first = pair.connect();
    pair.connect();
    let rejected = pair.connect();
    assert_matches!(
        pair.client.last_event(rejected),
        Some(Event::ConnectionLost(ConnectionError::AdmissionRejected))
    );

    pair.client
        .endpoint
        .close(first, TransportErrorCode::NO_ERROR, Bytes::new());
    pair.drive();
    assert_eq!(pair.server.accept_queue.len(), 1);
    assert_matches!(
        pair.server.events.last(),
        Some((_, Event::ConnectionLost(ConnectionError::ConnectionClosed(e)))) if e.code == TransportErrorCode::NO_ERROR
    );

    let ch = pair.connect();
    assert_matches!(pair.client.last_event(ch), Some(Event::Connected));
    assert_eq!(pair.server.accept_queue.len(), 2);
}

#[test]
fn server_close_reaches_client() {
    let _guard = subscribe();
    let mut pair = Pair::with_server_config(server_config());
    let client_ch = pair.connect();
    let server_ch = pair.server.accept().unwrap();
    pair.server
        .endpoint
        .close(server_ch, TransportErrorCode::NO_ERROR, Bytes::from_static(b"bye"));
    pair.drive();

    assert_matches!(
        pair.client.last_event(client_ch),
        Some(Event::ConnectionLost(ConnectionError::ConnectionClosed(e))) if e.reason == "bye"
    );
    assert_eq!(pair.client.endpoint.open_sessions(), 0);
    assert_eq!(pair.server.endpoint.open_sessions(), 0);
}

#[test]
fn shutdown_closes_everything() {
    let _guard = subscribe();
    let mut pair = Pair::with_server_config(server_config());
    let accepted = pair.connect();
    pair.server.accept().unwrap();
    let queued = pair.connect();

    let lost = pair.server.endpoint.shutdown();
    assert_eq!(lost.len(), 2);
    assert!(lost
        .iter()
        .all(|(_, e)| *e == Event::ConnectionLost(ConnectionError::ListenerClosed)));
    pair.drive();
    for ch in [accepted, queued] {
        assert_matches!(
            pair.client.last_event(ch),
            Some(Event::ConnectionLost(ConnectionError::ConnectionClosed(e))) if e.code == TransportErrorCode::NO_ERROR
        );
    }

    let refused = pair.connect();
    assert_matches!(
        pair.client.last_event(refused),
        Some(Event::ConnectionLost(ConnectionError::ConnectionClosed(e))) if e.code == TransportErrorCode::CONNECTION_REFUSED
    );
    assert_eq!(pair.server.endpoint.open_sessions(), 0);
}

#[test]
fn client_handshake_timeout() {
    let _guard = subscribe();
    let mut pair = Pair::with_server_config(server_config());
    let client_ch = pair.begin_connect(client_config(), "localhost");
    // The first flight is lost
    intercept_initial(&mut pair);

    pair.advance(Duration::from_secs(5));
    assert_eq!(pair.client.endpoint.state(client_ch), Some(State::Initial));
    pair.advance(Duration::from_secs(6));
    assert_eq!(
        pair.client.last_event(client_ch),
        Some(&Event::ConnectionLost(ConnectionError::TimedOut))
    );
    assert_eq!(pair.client.endpoint.open_sessions(), 0);
}

#[test]
fn server_handshake_timeout() {
    let _guard = subscribe();
    let mut server_config = server_config();
    server_config
        .use_retry(false)
        .handshake_timeout(Duration::from_secs(2));
    let mut pair = Pair::with_server_config(server_config);
    let mut client_config = client_config();
    client_config.handshake_timeout(Duration::from_secs(60));
    pair.begin_connect(client_config, "localhost");

    // Deliver the client's Initial, then lose everything the server sends back
    let transmit = pair.client.endpoint.poll_transmit().unwrap();
    pair.server.endpoint.handle(
        pair.time,
        pair.client.addr,
        bytes::BytesMut::from(&transmit.contents[..]),
        false,
    );
    assert_eq!(pair.server.endpoint.open_sessions(), 1);
    while pair.server.endpoint.poll_transmit().is_some() {}

    assert!(pair.server.endpoint.poll_timeout().is_some());
    let lost = pair.server.endpoint.handle_timeout(pair.time + Duration::from_secs(3));
    assert!(lost.is_empty());
    assert_eq!(pair.server.endpoint.open_sessions(), 0);
    assert_eq!(pair.server.endpoint.known_cids(), 0);
}

/// Run a handshake without retry up to the point where the client has sent its final flight,
/// which is lost
fn lose_client_final_flight(pair: &mut Pair) -> ConnectionHandle {
    let mut client_config = client_config();
    client_config.handshake_timeout(Duration::from_secs(5));
    let client_ch = pair.begin_connect(client_config, "localhost");

    let transmit = pair.client.endpoint.poll_transmit().unwrap();
    pair.server.endpoint.handle(
        pair.time,
        pair.client.addr,
        bytes::BytesMut::from(&transmit.contents[..]),
        false,
    );
    while let Some(transmit) = pair.server.endpoint.poll_transmit() {
        assert!(pair
            .client
            .endpoint
            .handle(
                pair.time,
                pair.server.addr,
                bytes::BytesMut::from(&transmit.contents[..]),
                false,
            )
            .is_none());
    }
    assert_eq!(pair.client.endpoint.state(client_ch), Some(State::Completed));
    while pair.client.endpoint.poll_transmit().is_some() {}
    assert!(pair.client.endpoint.poll_timeout().is_some());
    client_ch
}

fn server_config_with_timeout() -> ServerConfig {
    let mut server_config = server_config();
    server_config
        .use_retry(false)
        .handshake_timeout(Duration::from_secs(2));
    server_config
}

#[test]
fn server_timeout_fails_waiting_client() {
    let _guard = subscribe();
    let mut pair = Pair::with_server_config(server_config_with_timeout());
    let client_ch = lose_client_final_flight(&mut pair);

    pair.advance(Duration::from_secs(3));
    assert_eq!(pair.server.endpoint.open_sessions(), 0);
    assert_matches!(
        pair.client.last_event(client_ch),
        Some(Event::ConnectionLost(ConnectionError::ConnectionClosed(e)))
            if e.code == TransportErrorCode::CONNECTION_REFUSED
    );
    assert_eq!(pair.client.endpoint.state(client_ch), None);
    assert_eq!(pair.client.endpoint.open_sessions(), 0);
}

#[test]
fn completed_client_times_out() {
    let _guard = subscribe();
    let mut pair = Pair::with_server_config(server_config_with_timeout());
    let client_ch = lose_client_final_flight(&mut pair);

    // The server's refusal is lost as well
    let lost = pair.server.endpoint.handle_timeout(pair.time + Duration::from_secs(3));
    assert!(lost.is_empty());
    let refusal = pair.server.endpoint.poll_transmit().unwrap();
    assert_eq!(Packet::decode(refusal.contents).unwrap().kind(), PacketKind::Close);

    pair.advance(Duration::from_secs(4));
    assert_eq!(pair.client.endpoint.state(client_ch), Some(State::Completed));
    pair.advance(Duration::from_secs(2));
    assert_eq!(
        pair.client.last_event(client_ch),
        Some(&Event::ConnectionLost(ConnectionError::TimedOut))
    );
    assert_eq!(pair.client.endpoint.open_sessions(), 0);
    assert_eq!(pair.client.endpoint.poll_timeout(), None);
}

#[test]
fn short_initial_dropped() {
    let _guard = subscribe();
    let mut pair = Pair::with_server_config(server_config());
    pair.begin_connect(client_config(), "localhost");
    let transmit = pair.client.endpoint.poll_transmit().unwrap();
    let short = &transmit.contents[..MIN_INITIAL_SIZE - 1];
    assert!(Packet::decode(short).is_ok());

    let result = pair.server.endpoint.handle(
        pair.time,
        pair.client.addr,
        bytes::BytesMut::from(short),
        false,
    );
    assert!(result.is_none());
    assert!(pair.server.endpoint.poll_transmit().is_none());
}

#[test]
fn routing_entries_released() {
    let _guard = subscribe();
    let mut pair = bounded_pair(1, false);
    let ch = pair.connect();
    pair.connect();
    assert_eq!(pair.server.endpoint.known_cids(), 2);
    pair.client
        .endpoint
        .close(ch, TransportErrorCode::NO_ERROR, Bytes::new());
    pair.drive();
    assert_eq!(pair.server.endpoint.known_cids(), 0);
    assert_eq!(pair.client.endpoint.known_cids(), 0);
}
