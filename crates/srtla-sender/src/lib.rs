//! # srtla-sender
//!
//! Mobile-side SRTLA bonding sender: receives one local SRT stream from an
//! encoder and relays it packet-by-packet across multiple enrolled UDP
//! uplinks to an SRTLA receiver, which recombines them into a single SRT
//! stream.
//!
//! ## Crate structure
//!
//! - [`link`] — per-uplink state: registration machine, congestion window,
//!   in-flight set, RTT estimators
//! - [`pool`] — virtual-IP label pool
//! - [`scheduler`] — per-packet path selection
//! - [`engine`] — the core event loop and its control handle
//! - [`supervisor`] — waits for a stream, runs the engine, parks it on idle
//! - [`stats`] / [`metrics`] — snapshots, Prometheus and JSON rendering
//! - [`config`] — engine/supervisor tunables (spec defaults)
//! - [`net`] — `poll(2)` readiness for the loop
//!
//! The wire format itself lives in the `srtla-proto` crate.

pub mod config;
pub mod engine;
pub mod error;
pub mod link;
pub mod metrics;
pub mod net;
pub mod pool;
pub mod scheduler;
pub mod stats;
pub mod supervisor;

pub use config::{EngineConfig, EngineTimings, SupervisorConfig};
pub use engine::{Engine, EngineHandle, StatsCallback};
pub use error::{AddLinkError, RemoveLinkError, StartError};
pub use link::{Link, LinkKind, LinkState};
pub use stats::{LinkStats, StatsSnapshot};
pub use supervisor::{Supervisor, SupervisorEvent, SupervisorStatus};
