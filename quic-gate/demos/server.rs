//! Accepts connections and holds each one open until its peer goes away.
//!
//! Without `--key`/`--cert`, a self-signed certificate for `localhost` is generated and its DER
//! encoding written to `--cert-out`, for use as the client's `--ca`.

use std::{fs, net::SocketAddr, path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use quic_gate::{listen_addr, ServerConfig};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use tracing::{error, info, info_span};
use tracing_futures::Instrument as _;

#[derive(Parser, Debug)]
#[clap(name = "server")]
struct Opt {
    /// TLS private key in PEM format
    #[clap(short = 'k', long = "key", requires = "cert")]
    key: Option<PathBuf>,
    /// TLS certificate chain in PEM format
    #[clap(short = 'c', long = "cert", requires = "key")]
    cert: Option<PathBuf>,
    /// Where to write a generated certificate
    #[clap(long = "cert-out", default_value = "cert.der")]
    cert_out: PathBuf,
    /// Address to listen on
    #[clap(long = "listen", default_value = "[::1]:4433")]
    listen: SocketAddr,
    /// Skip the stateless retry round trip
    #[clap(long = "no-retry")]
    no_retry: bool,
    /// Connections to hold before turning clients away
    #[clap(long = "queue-size", default_value = "32")]
    queue_size: usize,
    /// Seconds to wait before each accept, to let the queue fill up
    #[clap(long = "accept-delay", default_value = "0")]
    accept_delay: u64,
}

fn main() {
    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .finish(),
    )
    .unwrap();
    let opt = Opt::parse();
    let code = {
        if let Err(e) = run(opt) {
            eprintln!("ERROR: {e:#}");
            1
        } else {
            0
        }
    };
    ::std::process::exit(code);
}

#[tokio::main]
async fn run(options: Opt) -> Result<()> {
    let (certs, key) = match (&options.key, &options.cert) {
        (Some(key_path), Some(cert_path)) => {
            let key = fs::read(key_path).context("failed to read private key")?;
            let key = rustls_pemfile::private_key(&mut &*key)
                .context("malformed private key")?
                .ok_or_else(|| anyhow::Error::msg("no private keys found"))?;
            let certs = fs::read(cert_path).context("failed to read certificate chain")?;
            let certs = rustls_pemfile::certs(&mut &*certs)
                .collect::<Result<Vec<_>, _>>()
                .context("invalid PEM-encoded certificate")?;
            (certs, key)
        }
        _ => {
            info!("generating self-signed certificate");
            let cert = rcgen::generate_simple_self_signed(vec!["localhost".into()])?;
            let key = PrivatePkcs8KeyDer::from(cert.signing_key.serialize_der());
            let cert = CertificateDer::from(cert.cert);
            fs::write(&options.cert_out, &cert).context("failed to write certificate")?;
            (vec![cert], PrivateKeyDer::Pkcs8(key))
        }
    };

    let mut config = ServerConfig::with_single_cert(certs, key)?;
    config
        .use_retry(!options.no_retry)
        .max_accept_queue_size(options.queue_size)?;

    let listener = listen_addr(options.listen, config)?;
    eprintln!("listening on {}", listener.local_addr()?);

    loop {
        tokio::time::sleep(Duration::from_secs(options.accept_delay)).await;
        let conn = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                error!("accept failed: {}", e);
                return Ok(());
            }
        };
        let span = info_span!("connection", remote = %conn.remote_address());
        tokio::spawn(
            async move {
                info!(version = conn.version(), "established");
                let reason = conn.closed().await;
                info!("closed: {}", reason);
            }
            .instrument(span),
        );
    }
}
