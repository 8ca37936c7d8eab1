//! # srtla-send
//!
//! Standalone SRTLA bonding sender. Listens for a local SRT stream from an
//! encoder and relays it across one or more uplinks to an SRTLA receiver.
//!
//! ## Usage
//!
//! ```bash
//! # Two uplinks, auto start/stop on stream presence
//! srtla-send --listen 6000 --server receiver.example.com:5000 \
//!   --link 192.168.1.10,wifi --link 10.64.12.7,cellular
//!
//! # TOML config plus Prometheus metrics
//! srtla-send --config sender.toml --metrics-port 9090
//! ```
//!
//! Each `--link` names a local address already routed over the wanted
//! uplink; the sender binds one UDP socket per link and enrolls it
//! whenever a stream is live.

use std::net::{IpAddr, SocketAddr, ToSocketAddrs, UdpSocket};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use serde::Deserialize;

use srtla_sender::metrics::run_metrics_server;
use srtla_sender::stats::StatsSnapshot;
use srtla_sender::supervisor::{EventCallback, SupervisorEvent};
use srtla_sender::{EngineHandle, LinkKind, Supervisor, SupervisorConfig};

fn main() -> anyhow::Result<()> {
    // ── Logging ─────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(true)
        .compact()
        .init();

    // ── Parse CLI (+ optional TOML overlay) ─────────────────────
    let args = parse_args()?;
    let server_addr = resolve_ipv4(&args.server_host, args.server_port)?;

    tracing::info!(
        listen = args.listen_port,
        server = %server_addr,
        links = args.links.len(),
        "srtla-send starting"
    );

    // ── Supervisor + link enrolment ─────────────────────────────
    let current: Arc<Mutex<Option<EngineHandle>>> = Arc::new(Mutex::new(None));
    let on_event = make_event_handler(args.links.clone(), server_addr, current.clone());

    let mut supervisor = Supervisor::start(
        SupervisorConfig::new(args.listen_port, args.server_host.clone(), args.server_port),
        on_event,
    );

    // ── Metrics server (optional) ───────────────────────────────
    if let Some(port) = args.metrics_port {
        let current = current.clone();
        std::thread::Builder::new()
            .name("metrics".into())
            .spawn(move || {
                let provider = move || {
                    current
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .as_ref()
                        .map(EngineHandle::stats)
                        .unwrap_or_else(StatsSnapshot::default)
                };
                if let Err(e) = run_metrics_server(port, provider) {
                    tracing::error!(error = %e, "metrics server failed");
                }
            })?;
    }

    // ── Graceful shutdown ───────────────────────────────────────
    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        ctrlc::set_handler(move || {
            tracing::info!("shutting down...");
            running.store(false, Ordering::Relaxed);
        })
        .context("cannot install signal handler")?;
    }

    while running.load(Ordering::Relaxed) {
        std::thread::sleep(Duration::from_millis(200));
    }

    supervisor.stop();
    Ok(())
}

// ─── Link enrolment ──────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct UplinkSpec {
    local_addr: IpAddr,
    kind: LinkKind,
    weight: u32,
}

fn make_event_handler(
    uplinks: Vec<UplinkSpec>,
    server_addr: SocketAddr,
    current: Arc<Mutex<Option<EngineHandle>>>,
) -> EventCallback {
    Box::new(move |event| match event {
        SupervisorEvent::Status(status) => tracing::info!("{status}"),
        SupervisorEvent::EngineStarted(handle) => {
            for uplink in &uplinks {
                if let Err(e) = enroll_uplink(&handle, uplink, server_addr) {
                    tracing::warn!(local = %uplink.local_addr, error = %e, "uplink not enrolled");
                }
            }
            *current.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
        }
        SupervisorEvent::EngineStopped => {
            *current.lock().unwrap_or_else(|e| e.into_inner()) = None;
        }
        SupervisorEvent::RegistrationError { total } => {
            tracing::warn!(total, "server rejected a link registration");
        }
    })
}

fn enroll_uplink(
    handle: &EngineHandle,
    uplink: &UplinkSpec,
    server_addr: SocketAddr,
) -> anyhow::Result<()> {
    let socket = UdpSocket::bind((uplink.local_addr, 0))
        .with_context(|| format!("cannot bind uplink address {}", uplink.local_addr))?;
    socket
        .connect(server_addr)
        .context("cannot connect uplink socket to server")?;
    socket.set_nonblocking(true)?;

    let vip = handle
        .allocate_virtual_ip()
        .ok_or_else(|| anyhow!("virtual IP pool exhausted"))?;
    match handle.add_link(socket, vip.clone(), uplink.weight, uplink.kind) {
        Ok(()) => {
            tracing::info!(
                local = %uplink.local_addr,
                virtual_ip = %vip,
                kind = uplink.kind.as_str(),
                "uplink enrolled"
            );
            Ok(())
        }
        Err(e) => {
            handle.release_virtual_ip(&vip);
            Err(e.into())
        }
    }
}

// ─── CLI / config file ───────────────────────────────────────────────────────

#[derive(Debug)]
struct Args {
    listen_port: u16,
    server_host: String,
    server_port: u16,
    links: Vec<UplinkSpec>,
    metrics_port: Option<u16>,
}

/// TOML overlay: CLI flags win over file values.
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    listen_port: Option<u16>,
    server: Option<String>,
    metrics_port: Option<u16>,
    #[serde(default)]
    links: Vec<FileLink>,
}

#[derive(Debug, Deserialize)]
struct FileLink {
    address: String,
    kind: Option<String>,
    weight: Option<u32>,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut listen_port: Option<u16> = None;
    let mut server: Option<String> = None;
    let mut links: Vec<UplinkSpec> = Vec::new();
    let mut metrics_port: Option<u16> = None;
    let mut config_path: Option<String> = None;

    let mut argv = std::env::args().skip(1);
    while let Some(flag) = argv.next() {
        let mut value = |name: &str| {
            argv.next()
                .ok_or_else(|| anyhow!("{name} requires a value"))
        };
        match flag.as_str() {
            "--listen" => listen_port = Some(value("--listen")?.parse()?),
            "--server" => server = Some(value("--server")?),
            "--link" => links.push(parse_link_spec(&value("--link")?)?),
            "--metrics-port" => metrics_port = Some(value("--metrics-port")?.parse()?),
            "--config" => config_path = Some(value("--config")?),
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            other => bail!("unknown flag {other} (try --help)"),
        }
    }

    let file: FileConfig = match config_path {
        Some(path) => {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("cannot read config file {path}"))?;
            toml::from_str(&text).with_context(|| format!("cannot parse {path}"))?
        }
        None => FileConfig::default(),
    };

    for link in &file.links {
        links.push(UplinkSpec {
            local_addr: link.address.parse().context("bad link address in config")?,
            kind: link
                .kind
                .as_deref()
                .map(parse_kind)
                .transpose()?
                .unwrap_or(LinkKind::Other),
            weight: link.weight.unwrap_or(1),
        });
    }

    let listen_port = listen_port
        .or(file.listen_port)
        .ok_or_else(|| anyhow!("--listen is required"))?;
    let server = server
        .or(file.server)
        .ok_or_else(|| anyhow!("--server is required"))?;
    let (server_host, server_port) = split_host_port(&server)?;
    if links.is_empty() {
        bail!("at least one --link is required");
    }

    Ok(Args {
        listen_port,
        server_host,
        server_port,
        links,
        metrics_port: metrics_port.or(file.metrics_port),
    })
}

/// `LOCAL_IP[,KIND[,WEIGHT]]`
fn parse_link_spec(spec: &str) -> anyhow::Result<UplinkSpec> {
    let mut parts = spec.split(',');
    let local_addr = parts
        .next()
        .ok_or_else(|| anyhow!("empty --link"))?
        .parse()
        .with_context(|| format!("bad link address in {spec:?}"))?;
    let kind = match parts.next() {
        Some(k) => parse_kind(k)?,
        None => LinkKind::Other,
    };
    let weight = match parts.next() {
        Some(w) => w.parse().with_context(|| format!("bad link weight in {spec:?}"))?,
        None => 1,
    };
    Ok(UplinkSpec {
        local_addr,
        kind,
        weight,
    })
}

fn parse_kind(s: &str) -> anyhow::Result<LinkKind> {
    LinkKind::from_str(s)
        .map_err(|()| anyhow!("unknown link kind {s:?} (wifi|cellular|ethernet|other)"))
}

fn split_host_port(s: &str) -> anyhow::Result<(String, u16)> {
    let (host, port) = s
        .rsplit_once(':')
        .ok_or_else(|| anyhow!("--server must be HOST:PORT"))?;
    Ok((host.to_string(), port.parse().context("bad server port")?))
}

fn resolve_ipv4(host: &str, port: u16) -> anyhow::Result<SocketAddr> {
    (host, port)
        .to_socket_addrs()
        .with_context(|| format!("cannot resolve {host}:{port}"))?
        .find(SocketAddr::is_ipv4)
        .ok_or_else(|| anyhow!("no IPv4 address for {host}"))
}

fn print_usage() {
    println!(
        "srtla-send --listen PORT --server HOST:PORT --link LOCAL_IP[,KIND[,WEIGHT]]...\n\
         \n\
         Options:\n\
           --listen PORT         UDP port the encoder sends SRT to\n\
           --server HOST:PORT    SRTLA receiver\n\
           --link SPEC           uplink local address (repeatable)\n\
           --config FILE         TOML config overlaid under the flags\n\
           --metrics-port PORT   Prometheus /metrics + /stats.json\n\
           --help                this text"
    );
}
