use std::{
    collections::VecDeque,
    io::{self, Write},
    net::{Ipv6Addr, SocketAddr},
    str,
    sync::Arc,
    time::{Duration, Instant},
};

use bytes::{Bytes, BytesMut};
use lazy_static::lazy_static;
use rustls::pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer};
use tracing::{info, trace};
use tracing_subscriber::EnvFilter;

use super::*;
use crate::packet::{Packet, PacketKind};

pub(super) struct Pair {
    pub(super) server: TestEndpoint,
    pub(super) client: TestEndpoint,
    pub(super) time: Instant,
}

impl Pair {
    pub(super) fn new(endpoint_config: Arc<EndpointConfig>, server_config: ServerConfig) -> Self {
        let capacity = server_config.get_max_accept_queue_size();
        let server = Endpoint::new(endpoint_config.clone(), Some(Arc::new(server_config)));
        let client = Endpoint::new(endpoint_config, None);
        Self {
            server: TestEndpoint::new(server, SocketAddr::new(Ipv6Addr::LOCALHOST.into(), 4433), capacity),
            client: TestEndpoint::new(client, SocketAddr::new(Ipv6Addr::LOCALHOST.into(), 44433), 0),
            time: Instant::now(),
        }
    }

    pub(super) fn with_server_config(server_config: ServerConfig) -> Self {
        Self::new(Default::default(), server_config)
    }

    /// Exchange datagrams until neither side has anything left to send
    pub(super) fn drive(&mut self) {
        while self.step() {}
    }

    /// Returns whether any datagram was delivered
    fn step(&mut self) -> bool {
        let server_addr = self.server.addr;
        let client_addr = self.client.addr;
        self.client.flush(server_addr, &mut self.server.inbound);
        self.server.flush(client_addr, &mut self.client.inbound);
        let server_progress = self.server.process(self.time, client_addr);
        let client_progress = self.client.process(self.time, server_addr);
        server_progress || client_progress
    }

    /// Move the clock forward and let both endpoints expire what they must
    pub(super) fn advance(&mut self, by: Duration) {
        self.time += by;
        trace!("advancing to {:?}", self.time);
        self.server.timeout(self.time);
        self.client.timeout(self.time);
        self.drive();
    }

    pub(super) fn begin_connect(&mut self, config: ClientConfig, server_name: &str) -> ConnectionHandle {
        info!("connecting");
        self.client
            .endpoint
            .connect(self.time, config, self.server.addr, server_name)
            .unwrap()
    }

    pub(super) fn connect(&mut self) -> ConnectionHandle {
        self.connect_with(client_config(), "localhost")
    }

    pub(super) fn connect_with(&mut self, config: ClientConfig, server_name: &str) -> ConnectionHandle {
        let ch = self.begin_connect(config, server_name);
        self.drive();
        ch
    }

    /// Deliver a hand-made packet to the client as if the server sent it
    pub(super) fn inject_to_client(&mut self, packet: &Packet) -> Option<(ConnectionHandle, Event)> {
        let mut buf = Vec::new();
        packet.encode(&mut buf);
        let result = self
            .client
            .endpoint
            .handle(self.time, self.server.addr, BytesMut::from(&buf[..]), false);
        if let Some((ch, ref event)) = result {
            self.client.events.push((ch, event.clone()));
        }
        result
    }
}

pub(super) struct TestEndpoint {
    pub(super) endpoint: Endpoint,
    pub(super) addr: SocketAddr,
    inbound: VecDeque<Bytes>,
    /// Sessions admitted and not yet accepted, standing in for the application's accept queue
    pub(super) accept_queue: VecDeque<ConnectionHandle>,
    accept_capacity: usize,
    pub(super) events: Vec<(ConnectionHandle, Event)>,
    /// Kinds of every packet this endpoint sent, in order
    pub(super) sent: Vec<PacketKind>,
}

impl TestEndpoint {
    fn new(endpoint: Endpoint, addr: SocketAddr, accept_capacity: usize) -> Self {
        Self {
            endpoint,
            addr,
            inbound: VecDeque::new(),
            accept_queue: VecDeque::new(),
            accept_capacity,
            events: Vec::new(),
            sent: Vec::new(),
        }
    }

    /// Hand outgoing datagrams for `peer` to its inbound queue; anything else is lost
    fn flush(&mut self, peer: SocketAddr, peer_inbound: &mut VecDeque<Bytes>) {
        while let Some(transmit) = self.endpoint.poll_transmit() {
            if let Ok(packet) = Packet::decode(transmit.contents.clone()) {
                self.sent.push(packet.kind());
            }
            if transmit.destination == peer {
                peer_inbound.push_back(transmit.contents);
            }
        }
    }

    fn process(&mut self, now: Instant, remote: SocketAddr) -> bool {
        let mut progress = false;
        while let Some(data) = self.inbound.pop_front() {
            progress = true;
            let full = self.accept_queue.len() >= self.accept_capacity;
            if let Some((ch, event)) = self.endpoint.handle(now, remote, BytesMut::from(&data[..]), full) {
                self.on_event(ch, event);
            }
        }
        progress
    }

    fn timeout(&mut self, now: Instant) {
        for (ch, event) in self.endpoint.handle_timeout(now) {
            self.on_event(ch, event);
        }
    }

    fn on_event(&mut self, ch: ConnectionHandle, event: Event) {
        match event {
            Event::HandshakeCompleted => {
                let admitted = self.accept_queue.len() < self.accept_capacity;
                if admitted {
                    self.accept_queue.push_back(ch);
                }
                self.endpoint.admit(ch, admitted);
            }
            Event::ConnectionLost(_) => self.accept_queue.retain(|&x| x != ch),
            Event::Connected => {}
        }
        self.events.push((ch, event));
    }

    pub(super) fn accept(&mut self) -> Option<ConnectionHandle> {
        let ch = self.accept_queue.pop_front()?;
        self.endpoint.accepted(ch);
        Some(ch)
    }

    /// The most recent event reported for `ch`
    pub(super) fn last_event(&self, ch: ConnectionHandle) -> Option<&Event> {
        self.events.iter().rev().find(|(x, _)| *x == ch).map(|(_, e)| e)
    }
}

pub(super) fn subscribe() -> tracing::subscriber::DefaultGuard {
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

pub(super) fn server_config() -> ServerConfig {
    let key = PrivatePkcs8KeyDer::from(CERTIFICATE.signing_key.serialize_der());
    ServerConfig::with_single_cert(vec![CERTIFICATE.cert.der().clone()], PrivateKeyDer::Pkcs8(key))
        .unwrap()
}

pub(super) fn client_config() -> ClientConfig {
    let mut roots = rustls::RootCertStore::empty();
    roots.add(CERTIFICATE.cert.der().clone()).unwrap();
    ClientConfig::with_root_certificates(Arc::new(roots)).unwrap()
}

lazy_static! {
    pub(super) static ref CERTIFICATE: rcgen::CertifiedKey<rcgen::KeyPair> =
        rcgen::generate_simple_self_signed(vec!["localhost".into()]).unwrap();
}
