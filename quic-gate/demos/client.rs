//! Dials a server and reports how admission went.

use std::{fs, path::PathBuf, sync::Arc, time::Duration};

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use quic_gate::{dial_addr, ClientConfig, TransportErrorCode};
use rustls::pki_types::CertificateDer;
use tracing::info;

#[derive(Parser, Debug)]
#[clap(name = "client")]
struct Opt {
    /// Server to connect to, as `host:port`
    #[clap(default_value = "localhost:4433")]
    addr: String,
    /// Certificate authority to trust, in DER or PEM format
    #[clap(long = "ca", default_value = "cert.der")]
    ca: PathBuf,
    /// Name to authenticate the server as, overriding the host in `addr`
    #[clap(long = "server-name")]
    server_name: Option<String>,
    /// QUIC versions to offer, most preferred first, e.g. `0x1`
    #[clap(long = "version", value_parser = parse_version)]
    versions: Vec<u32>,
    /// Seconds to stay connected
    #[clap(long = "hold", default_value = "1")]
    hold: u64,
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
    let ca = fs::read(&options.ca).context("failed to read certificate authority")?;
    let mut roots = rustls::RootCertStore::empty();
    if options.ca.extension().is_some_and(|x| x == "der") {
        roots.add(CertificateDer::from(ca))?;
    } else {
        for cert in rustls_pemfile::certs(&mut &*ca) {
            roots.add(cert.context("invalid PEM-encoded certificate")?)?;
        }
    }

    let mut config = ClientConfig::with_root_certificates(Arc::new(roots))?;
    if let Some(name) = options.server_name {
        config.server_name(name);
    }
    if !options.versions.is_empty() {
        config.versions(options.versions)?;
    }

    let conn = match dial_addr(&options.addr, config).await {
        Ok(conn) => conn,
        Err(e) if e.code() == Some(TransportErrorCode::PEER_GOING_AWAY) => {
            return Err(anyhow!("server is busy: {}", e));
        }
        Err(e) => return Err(e).context("failed to connect"),
    };
    info!(version = conn.version(), "connected");
    eprintln!(
        "connected to {} using version {:#x}",
        conn.remote_address(),
        conn.version()
    );

    tokio::time::sleep(Duration::from_secs(options.hold)).await;
    conn.close(TransportErrorCode::NO_ERROR, b"done");
    Ok(())
}

fn parse_version(s: &str) -> Result<u32> {
    let version = match s.strip_prefix("0x") {
        Some(hex) => u32::from_str_radix(hex, 16)?,
        None => s.parse()?,
    };
    Ok(version)
}
