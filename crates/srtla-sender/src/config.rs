//! Engine and supervisor configuration.
//!
//! Every timer the core runs on lives in [`EngineTimings`] so tests can
//! compress the lifecycle (a 15 s zombie linger is correct in production
//! and useless in CI). Defaults are the protocol values.

use std::time::Duration;

/// Configuration for one engine instance (one stream).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// UDP port the encoder sends the local SRT stream to.
    pub listen_port: u16,
    /// SRTLA receiver host; resolved once at start, IPv4 only.
    pub server_host: String,
    /// SRTLA receiver port.
    pub server_port: u16,
    pub timings: EngineTimings,
}

impl EngineConfig {
    pub fn new(listen_port: u16, server_host: impl Into<String>, server_port: u16) -> Self {
        EngineConfig {
            listen_port,
            server_host: server_host.into(),
            server_port,
            timings: EngineTimings::default(),
        }
    }
}

/// The cooperative timers of the engine loop. All of them share the loop
/// clock; jitter up to one tick is expected and fine.
#[derive(Debug, Clone)]
pub struct EngineTimings {
    /// Readiness-wait deadline; the upper bound on control-plane latency.
    pub tick: Duration,
    /// KEEPALIVE cadence per non-zombie link.
    pub keepalive_interval: Duration,
    /// Receive silence after which a link re-registers.
    pub link_timeout: Duration,
    /// How long a removed link keeps receiving before its socket closes.
    pub zombie_linger: Duration,
    /// Cadence of the zombie/failed-link reap pass.
    pub reap_interval: Duration,
    /// Cadence of stats snapshots and the stats callback.
    pub stats_interval: Duration,
    /// Encoder silence after which the remembered endpoint is dropped.
    pub encoder_timeout: Duration,
}

impl Default for EngineTimings {
    fn default() -> Self {
        EngineTimings {
            tick: Duration::from_millis(200),
            keepalive_interval: Duration::from_millis(200),
            link_timeout: Duration::from_secs(4),
            zombie_linger: Duration::from_secs(15),
            reap_interval: Duration::from_secs(5),
            stats_interval: Duration::from_secs(1),
            encoder_timeout: Duration::from_secs(10),
        }
    }
}

/// Configuration for the stream-presence supervisor.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub listen_port: u16,
    pub server_host: String,
    pub server_port: u16,
    /// Bind attempts before giving the port up for this round.
    pub bind_attempts: u32,
    /// Delay between bind attempts.
    pub bind_retry_delay: Duration,
    /// Cadence of the aggregate send-rate sampling while streaming.
    pub rate_sample_interval: Duration,
    /// Zero-flow span after which the engine is parked.
    pub idle_stop_after: Duration,
    pub timings: EngineTimings,
}

impl SupervisorConfig {
    pub fn new(listen_port: u16, server_host: impl Into<String>, server_port: u16) -> Self {
        SupervisorConfig {
            listen_port,
            server_host: server_host.into(),
            server_port,
            bind_attempts: 10,
            bind_retry_delay: Duration::from_millis(500),
            rate_sample_interval: Duration::from_millis(500),
            idle_stop_after: Duration::from_secs(5),
            timings: EngineTimings::default(),
        }
    }

    pub(crate) fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            listen_port: self.listen_port,
            server_host: self.server_host.clone(),
            server_port: self.server_port,
            timings: self.timings.clone(),
        }
    }
}
