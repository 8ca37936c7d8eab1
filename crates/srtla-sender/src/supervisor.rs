//! # Stream Supervisor
//!
//! Sits above the engine and parks it between streams:
//!
//! ```text
//! bind probe ──first datagram──▶ engine running ──5 s of zero flow──▶ park
//!     ▲  (retry ladder while                                           │
//!     │   the port lingers)                                            │
//!     └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The supervisor owns the probe socket only while waiting; the engine
//! binds the port itself once a stream shows up, with the same retry
//! ladder because the probe socket (or a previous engine's listener) may
//! linger briefly. Status changes surface as events carrying the
//! user-visible strings.

use std::fmt;
use std::io;
use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::SupervisorConfig;
use crate::engine::{Engine, EngineHandle};

/// How often blocking waits re-check the stop flag.
const STOP_POLL: Duration = Duration::from_millis(100);

// ─── Status & events ─────────────────────────────────────────────────────────

/// User-visible supervisor state. `Display` renders the exact strings the
/// UI shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorStatus {
    WaitingForNetwork,
    WaitingForStream { port: u16 },
    Streaming { port: u16 },
    PortBusy { port: u16, attempt: u32, max: u32 },
    StreamStopped,
}

impl fmt::Display for SupervisorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SupervisorStatus::WaitingForNetwork => write!(f, "Waiting for network…"),
            SupervisorStatus::WaitingForStream { port } => {
                write!(f, "Waiting for SRT stream on port {port}…")
            }
            SupervisorStatus::Streaming { port } => write!(f, "Streaming on port {port}"),
            SupervisorStatus::PortBusy { port, attempt, max } => {
                write!(f, "Port {port} in use — retry {attempt}/{max}")
            }
            SupervisorStatus::StreamStopped => {
                write!(f, "SRT stream stopped, returning to listening mode")
            }
        }
    }
}

/// Everything the supervisor tells the layer above.
pub enum SupervisorEvent {
    Status(SupervisorStatus),
    /// A stream showed up and the engine is running; the platform layer
    /// should enroll its uplinks through this handle.
    EngineStarted(EngineHandle),
    EngineStopped,
    /// The server rejected a registration (REG_ERR/REG_NGP/REG_NAK).
    RegistrationError { total: u64 },
}

pub type EventCallback = Box<dyn FnMut(SupervisorEvent) + Send>;

// ─── Supervisor ──────────────────────────────────────────────────────────────

/// Handle to the supervisor thread. Stops unconditionally on
/// [`Supervisor::stop`] or drop.
pub struct Supervisor {
    stop: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl Supervisor {
    pub fn start(config: SupervisorConfig, on_event: EventCallback) -> Supervisor {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let thread = thread::Builder::new()
            .name("srtla-supervisor".into())
            .spawn(move || supervisor_loop(config, on_event, stop_flag))
            .expect("failed to spawn supervisor thread");
        Supervisor {
            stop,
            thread: Some(thread),
        }
    }

    /// Unconditional teardown: stops the engine if one is running and
    /// joins the supervisor thread. Idempotent.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.stop();
    }
}

// ─── Loop ────────────────────────────────────────────────────────────────────

fn supervisor_loop(
    config: SupervisorConfig,
    mut on_event: EventCallback,
    stop: Arc<AtomicBool>,
) {
    let stopped = || stop.load(Ordering::Relaxed);

    while !stopped() {
        // ── Listen phase ────────────────────────────────────────────
        let Some(probe) = bind_with_retry(&config, &mut on_event, &stop) else {
            continue;
        };
        on_event(SupervisorEvent::Status(SupervisorStatus::WaitingForStream {
            port: config.listen_port,
        }));
        info!(port = config.listen_port, "waiting for SRT stream");

        if !wait_for_stream(&probe, &stop) {
            break;
        }
        // Free the port for the engine; it may linger a moment.
        drop(probe);

        // ── Stream phase ────────────────────────────────────────────
        let Some(mut engine) = start_engine_with_retry(&config, &mut on_event, &stop) else {
            continue;
        };
        on_event(SupervisorEvent::EngineStarted(engine.handle()));
        on_event(SupervisorEvent::Status(SupervisorStatus::Streaming {
            port: config.listen_port,
        }));
        info!(port = config.listen_port, "streaming");

        sample_until_idle(&config, &engine, &mut on_event, &stop);

        engine.stop();
        on_event(SupervisorEvent::EngineStopped);
        if stopped() {
            break;
        }
        on_event(SupervisorEvent::Status(SupervisorStatus::StreamStopped));
        info!("stream stopped, returning to listening mode");
    }
}

/// Bind the probe socket, retrying while the port is held by a lingering
/// socket. `None` when the attempts run out or the supervisor stops.
fn bind_with_retry(
    config: &SupervisorConfig,
    on_event: &mut EventCallback,
    stop: &AtomicBool,
) -> Option<UdpSocket> {
    for attempt in 1..=config.bind_attempts {
        if stop.load(Ordering::Relaxed) {
            return None;
        }
        match UdpSocket::bind(("0.0.0.0", config.listen_port)) {
            Ok(socket) => {
                if let Err(e) = socket.set_read_timeout(Some(STOP_POLL)) {
                    warn!(error = %e, "cannot set probe read timeout");
                    return None;
                }
                return Some(socket);
            }
            Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                let status = SupervisorStatus::PortBusy {
                    port: config.listen_port,
                    attempt,
                    max: config.bind_attempts,
                };
                warn!("{status}");
                on_event(SupervisorEvent::Status(status));
            }
            Err(e) => {
                warn!(port = config.listen_port, error = %e, "probe bind failed");
            }
        }
        thread::sleep(config.bind_retry_delay);
    }
    None
}

/// Block until the first encoder datagram arrives. `false` means the
/// supervisor was asked to stop instead.
fn wait_for_stream(probe: &UdpSocket, stop: &AtomicBool) -> bool {
    let mut buf = [0u8; 2048];
    loop {
        if stop.load(Ordering::Relaxed) {
            return false;
        }
        match probe.recv_from(&mut buf) {
            Ok((_, from)) => {
                info!(encoder = %from, "first encoder packet");
                return true;
            }
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::TimedOut => {}
            Err(e) => {
                debug!(error = %e, "probe read error");
                thread::sleep(STOP_POLL);
            }
        }
    }
}

fn start_engine_with_retry(
    config: &SupervisorConfig,
    on_event: &mut EventCallback,
    stop: &AtomicBool,
) -> Option<Engine> {
    for attempt in 1..=config.bind_attempts {
        if stop.load(Ordering::Relaxed) {
            return None;
        }
        match Engine::start(config.engine_config()) {
            Ok(engine) => return Some(engine),
            Err(e) if e.is_bind_contention() => {
                let status = SupervisorStatus::PortBusy {
                    port: config.listen_port,
                    attempt,
                    max: config.bind_attempts,
                };
                warn!("{status}");
                on_event(SupervisorEvent::Status(status));
            }
            Err(e) => {
                warn!(error = %e, "engine start failed");
            }
        }
        thread::sleep(config.bind_retry_delay);
    }
    None
}

/// Watch the aggregate send rate until it flatlines for the idle span (or
/// the supervisor stops). Also surfaces network loss and registration
/// errors while streaming.
fn sample_until_idle(
    config: &SupervisorConfig,
    engine: &Engine,
    on_event: &mut EventCallback,
    stop: &AtomicBool,
) {
    let handle = engine.handle();
    let mut last_flow = Instant::now();
    let mut last_bytes = handle.total_bytes_sent();
    let mut last_failures = handle.registration_failures();
    let mut network_down = false;

    while !stop.load(Ordering::Relaxed) {
        thread::sleep(config.rate_sample_interval);

        let bytes = handle.total_bytes_sent();
        if bytes != last_bytes {
            last_bytes = bytes;
            last_flow = Instant::now();
        } else if last_flow.elapsed() >= config.idle_stop_after {
            info!(
                idle = ?config.idle_stop_after,
                "no SRT flow, parking the engine"
            );
            return;
        }

        let connected = handle.connected_link_count();
        if connected == 0 && !network_down {
            network_down = true;
            on_event(SupervisorEvent::Status(SupervisorStatus::WaitingForNetwork));
        } else if connected > 0 && network_down {
            network_down = false;
            on_event(SupervisorEvent::Status(SupervisorStatus::Streaming {
                port: config.listen_port,
            }));
        }

        let failures = handle.registration_failures();
        if failures > last_failures {
            last_failures = failures;
            on_event(SupervisorEvent::RegistrationError { total: failures });
        }
    }
}
