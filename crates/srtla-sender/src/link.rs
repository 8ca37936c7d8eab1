//! # Link State
//!
//! One enrolled uplink: its socket, registration state machine, congestion
//! window, in-flight sequence set and RTT estimators.
//!
//! ## Registration state machine
//!
//! ```text
//! Disconnected ──▶ RegisteringReg1 ──REG1 sent──▶ RegisteringReg2
//!                        ▲                              │ REG3
//!                        │ receive silence > 4 s        ▼
//!                        └───────────────────────── Connected ──▶ Zombie | Failed
//! ```
//!
//! `RegisteringReg1` means REG1 is queued for the next housekeeping pass;
//! `RegisteringReg2` means REG1 went out and the REG2/REG3 exchange is in
//! progress. Zombie links keep receiving for a grace period after removal
//! so server packets addressed to the old path are not lost; Failed is
//! terminal (socket read error).
//!
//! ## Window dynamics
//!
//! The window is a scaled integer (multiplier 1000). Every SRTLA ACK seen
//! by the group grows every connected link's window by 1; a link whose own
//! in-flight packet was acknowledged while congested gets a further 29.
//! Each SRT NAK hit shrinks the window by 100. Bounds are [1000, 60000].

use srtla_proto::wire::{seq_gt, SRT_SEQ_MASK};
use std::collections::HashSet;
use std::net::UdpSocket;
use std::str::FromStr;
use std::time::{Duration, Instant};

use crate::stats::LinkStats;

// ─── Window constants ────────────────────────────────────────────────────────

/// Scale factor between in-flight packet counts and window units.
pub const WINDOW_MULT: i32 = 1000;
/// Window floor, in packets.
pub const WINDOW_MIN: i32 = 1;
/// Initial window, in packets.
pub const WINDOW_DEF: i32 = 20;
/// Window ceiling, in packets.
pub const WINDOW_MAX: i32 = 60;
/// Total growth for an SRTLA ACK that resolved one of our packets while
/// the link was congested: (WINDOW_INCR − 1) on the hit plus the unconditional 1.
pub const WINDOW_INCR: i32 = 30;
/// Shrink per SRT NAK hit.
pub const WINDOW_DECR: i32 = 100;

/// Both RTT estimators start here.
pub const RTT_SEED_MS: f64 = 100.0;

// ─── Transport kind ──────────────────────────────────────────────────────────

/// Transport tag of the underlying uplink. Informational: scheduling is
/// window-driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    Wifi,
    Cellular,
    Ethernet,
    Other,
}

impl LinkKind {
    pub fn as_str(self) -> &'static str {
        match self {
            LinkKind::Wifi => "wifi",
            LinkKind::Cellular => "cellular",
            LinkKind::Ethernet => "ethernet",
            LinkKind::Other => "other",
        }
    }
}

impl FromStr for LinkKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        match s {
            "wifi" => Ok(LinkKind::Wifi),
            "cellular" => Ok(LinkKind::Cellular),
            "ethernet" => Ok(LinkKind::Ethernet),
            "other" => Ok(LinkKind::Other),
            _ => Err(()),
        }
    }
}

// ─── Lifecycle state ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    RegisteringReg1,
    RegisteringReg2,
    Connected,
    Zombie,
    Failed,
}

impl LinkState {
    pub fn as_str(self) -> &'static str {
        match self {
            LinkState::Disconnected => "disconnected",
            LinkState::RegisteringReg1 => "registering-reg1",
            LinkState::RegisteringReg2 => "registering-reg2",
            LinkState::Connected => "connected",
            LinkState::Zombie => "zombie",
            LinkState::Failed => "failed",
        }
    }
}

// ─── RTT estimation ──────────────────────────────────────────────────────────

/// Two EWMA RTT estimators: a smoothed one (α = 1/8, the RFC 6298 gain)
/// and a fast-moving one (α = 1/4) that reacts to path changes sooner.
#[derive(Debug, Clone)]
pub struct RttEstimator {
    smoothed_ms: f64,
    fast_ms: f64,
}

impl RttEstimator {
    pub fn new() -> Self {
        RttEstimator {
            smoothed_ms: RTT_SEED_MS,
            fast_ms: RTT_SEED_MS,
        }
    }

    pub fn update(&mut self, sample_ms: f64) {
        if sample_ms < 0.0 {
            return;
        }
        self.smoothed_ms += 0.125 * (sample_ms - self.smoothed_ms);
        self.fast_ms += 0.25 * (sample_ms - self.fast_ms);
    }

    pub fn smoothed_ms(&self) -> f64 {
        self.smoothed_ms
    }

    pub fn fast_ms(&self) -> f64 {
        self.fast_ms
    }
}

impl Default for RttEstimator {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Link ────────────────────────────────────────────────────────────────────

/// One enrolled uplink. The socket arrives already bound to its route and
/// connected to the server; the link owns it from installation until reap
/// or engine stop.
pub struct Link {
    virtual_ip: String,
    kind: LinkKind,
    /// Reserved for weighted scheduling; carried through to stats but not
    /// consulted by the scheduler.
    weight: u32,
    socket: UdpSocket,
    state: LinkState,
    window: i32,
    in_flight: HashSet<u32>,
    last_sent: Instant,
    last_received: Instant,
    zombie_since: Option<Instant>,
    /// Set by a failed send; reads as timed out until registration
    /// restarts.
    stale: bool,
    rtt: RttEstimator,
    bytes_sent: u64,
    packets_sent: u64,
    ack_count: u64,
    nak_count: u64,
}

impl Link {
    pub fn new(
        socket: UdpSocket,
        virtual_ip: String,
        kind: LinkKind,
        weight: u32,
        now: Instant,
    ) -> Self {
        Link {
            virtual_ip,
            kind,
            weight,
            socket,
            state: LinkState::Disconnected,
            window: WINDOW_DEF * WINDOW_MULT,
            in_flight: HashSet::new(),
            last_sent: now,
            last_received: now,
            zombie_since: None,
            stale: false,
            rtt: RttEstimator::new(),
            bytes_sent: 0,
            packets_sent: 0,
            ack_count: 0,
            nak_count: 0,
        }
    }

    // ─── Accessors ──────────────────────────────────────────────────────

    pub fn virtual_ip(&self) -> &str {
        &self.virtual_ip
    }

    pub fn kind(&self) -> LinkKind {
        self.kind
    }

    pub fn weight(&self) -> u32 {
        self.weight
    }

    pub fn socket(&self) -> &UdpSocket {
        &self.socket
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn window(&self) -> i32 {
        self.window
    }

    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    pub fn contains_in_flight(&self, seq: u32) -> bool {
        self.in_flight.contains(&seq)
    }

    pub fn rtt(&self) -> &RttEstimator {
        &self.rtt
    }

    pub fn is_connected(&self) -> bool {
        self.state == LinkState::Connected
    }

    pub fn is_zombie(&self) -> bool {
        self.state == LinkState::Zombie
    }

    pub fn is_failed(&self) -> bool {
        self.state == LinkState::Failed
    }

    // ─── Send/receive bookkeeping ───────────────────────────────────────

    /// Record an SRT payload sent on this link.
    pub fn mark_sent(&mut self, seq: Option<u32>, bytes: usize, now: Instant) {
        if let Some(seq) = seq {
            self.in_flight.insert(seq & SRT_SEQ_MASK);
        }
        self.bytes_sent += bytes as u64;
        self.packets_sent += 1;
        self.last_sent = now;
    }

    /// Record a successful control send (REG1/REG2/KEEPALIVE). Counts as
    /// activity but not as stream traffic.
    pub fn record_control_send(&mut self, now: Instant) {
        self.last_sent = now;
    }

    /// A socket-level send error. The link is not torn down; it reads as
    /// timed out so the next housekeeping pass re-registers it.
    pub fn mark_send_failed(&mut self) {
        self.stale = true;
    }

    /// Record a datagram received on this link, whatever it was.
    pub fn mark_received(&mut self, now: Instant) {
        self.last_received = now;
    }

    // ─── Feedback handling ──────────────────────────────────────────────

    /// SRT ACK observed anywhere in the group: everything at or below
    /// `ack_seq` is resolved, wrap-aware. No window change.
    pub fn handle_srt_ack(&mut self, ack_seq: u32) {
        self.in_flight.retain(|&s| seq_gt(s, ack_seq));
    }

    /// SRT NAK for one sequence. A hit removes it from in-flight and
    /// shrinks the window; a miss is ignored. Returns whether it hit.
    pub fn handle_srt_nak(&mut self, seq: u32) -> bool {
        if !self.in_flight.remove(&seq) {
            return false;
        }
        self.nak_count += 1;
        self.window = (self.window - WINDOW_DECR).max(WINDOW_MIN * WINDOW_MULT);
        true
    }

    /// One sequence out of an SRTLA ACK, broadcast to every connected
    /// link. A hit resolves the packet, samples RTT, and rewards a
    /// congested link; every call grows the window by 1 up to the ceiling.
    pub fn handle_srtla_ack(&mut self, seq: u32, now: Instant) {
        if self.in_flight.remove(&seq) {
            self.ack_count += 1;
            let sample_ms = now.duration_since(self.last_sent).as_secs_f64() * 1000.0;
            self.rtt.update(sample_ms);
            if (self.in_flight.len() as i32) * WINDOW_MULT > self.window {
                self.window += WINDOW_INCR - 1;
            }
        }
        self.window = (self.window + 1).min(WINDOW_MAX * WINDOW_MULT);
    }

    // ─── Scheduling ─────────────────────────────────────────────────────

    /// Scheduler score: `window / (in_flight + 1)` while connected and
    /// responsive, 0 otherwise.
    pub fn score(&self, now: Instant, timeout: Duration) -> i64 {
        if self.state != LinkState::Connected || self.is_timed_out(now, timeout) {
            return 0;
        }
        (self.window / (self.in_flight.len() as i32 + 1)) as i64
    }

    /// Receive silence beyond `timeout`, or a failed send.
    pub fn is_timed_out(&self, now: Instant, timeout: Duration) -> bool {
        self.stale || now.duration_since(self.last_received) > timeout
    }

    // ─── Lifecycle ──────────────────────────────────────────────────────

    /// Queue REG1 for the next housekeeping pass. Clears the stale flag
    /// and restarts the silence clock so retries are spaced by the link
    /// timeout rather than fired every tick.
    pub fn restart_registration(&mut self, now: Instant) {
        self.state = LinkState::RegisteringReg1;
        self.stale = false;
        self.last_received = now;
    }

    /// Refresh-all: back to `Disconnected` with a fresh silence clock.
    /// Housekeeping re-emits REG1 on the next pass without tripping the
    /// timeout path.
    pub fn park(&mut self, now: Instant) {
        self.state = LinkState::Disconnected;
        self.stale = false;
        self.last_received = now;
    }

    /// REG1 (or a REG2 broadcast) went out: the handshake is in progress.
    pub fn registration_in_progress(&mut self, now: Instant) {
        if self.state != LinkState::Connected {
            self.state = LinkState::RegisteringReg2;
        }
        self.last_sent = now;
    }

    /// REG3 received: the server confirmed this path.
    pub fn set_connected(&mut self) {
        self.state = LinkState::Connected;
    }

    /// Socket read error: terminal.
    pub fn set_failed(&mut self) {
        self.state = LinkState::Failed;
    }

    /// Removed while streaming: keep receiving, never send, reap later.
    pub fn mark_zombie(&mut self, now: Instant) {
        self.state = LinkState::Zombie;
        self.zombie_since = Some(now);
    }

    pub fn is_zombie_expired(&self, now: Instant, linger: Duration) -> bool {
        match self.zombie_since {
            Some(since) if self.state == LinkState::Zombie => {
                now.duration_since(since) > linger
            }
            _ => false,
        }
    }

    /// Recovery only: forget every in-flight sequence.
    pub fn clear_in_flight(&mut self) {
        self.in_flight.clear();
    }

    /// Recovery only: back to the default window.
    pub fn reset_window(&mut self) {
        self.window = WINDOW_DEF * WINDOW_MULT;
    }

    // ─── Stats ──────────────────────────────────────────────────────────

    pub fn snapshot(&self, now: Instant, timeout: Duration) -> LinkStats {
        LinkStats {
            virtual_ip: self.virtual_ip.clone(),
            kind: self.kind.as_str(),
            state: self.state.as_str(),
            window: self.window,
            in_flight: self.in_flight.len(),
            srtt_ms: self.rtt.smoothed_ms(),
            fast_rtt_ms: self.rtt.fast_ms(),
            ack_count: self.ack_count,
            nak_count: self.nak_count,
            bytes_sent: self.bytes_sent,
            packets_sent: self.packets_sent,
            score: self.score(now, timeout),
        }
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    pub fn packets_sent(&self) -> u64 {
        self.packets_sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(4);

    fn test_link() -> Link {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr = socket.local_addr().unwrap();
        socket.connect(addr).unwrap();
        Link::new(socket, "10.200.0.1".into(), LinkKind::Wifi, 1, Instant::now())
    }

    fn connected_link() -> Link {
        let mut link = test_link();
        link.set_connected();
        link
    }

    // ─── Window dynamics ────────────────────────────────────────────────

    #[test]
    fn new_link_has_default_window() {
        let link = test_link();
        assert_eq!(link.window(), WINDOW_DEF * WINDOW_MULT);
        assert_eq!(link.state(), LinkState::Disconnected);
    }

    #[test]
    fn unmatched_srtla_acks_grow_by_one_each() {
        let mut link = connected_link();
        let now = Instant::now();
        for seq in 1000..1007 {
            link.handle_srtla_ack(seq, now);
        }
        assert_eq!(link.window(), WINDOW_DEF * WINDOW_MULT + 7);
    }

    #[test]
    fn congested_hit_grows_by_thirty() {
        let mut link = connected_link();
        let now = Instant::now();
        // 25 packets in flight with a 20000 window: congested.
        for seq in 0..25 {
            link.mark_sent(Some(seq), 1000, now);
        }
        link.handle_srtla_ack(3, now);
        assert_eq!(link.window(), WINDOW_DEF * WINDOW_MULT + WINDOW_INCR);
        assert_eq!(link.in_flight_len(), 24);
        assert_eq!(link.ack_count, 1);
    }

    #[test]
    fn uncongested_hit_grows_by_one() {
        let mut link = connected_link();
        let now = Instant::now();
        link.mark_sent(Some(42), 100, now);
        link.handle_srtla_ack(42, now);
        assert_eq!(link.window(), WINDOW_DEF * WINDOW_MULT + 1);
        assert_eq!(link.in_flight_len(), 0);
    }

    #[test]
    fn window_never_exceeds_ceiling() {
        let mut link = connected_link();
        let now = Instant::now();
        for _ in 0..100_000 {
            link.handle_srtla_ack(7, now);
        }
        assert_eq!(link.window(), WINDOW_MAX * WINDOW_MULT);
    }

    #[test]
    fn nak_hit_shrinks_by_decrement() {
        let mut link = connected_link();
        let now = Instant::now();
        for seq in [7u32, 8, 9] {
            link.mark_sent(Some(seq), 100, now);
        }
        assert!(link.handle_srt_nak(7));
        assert!(!link.handle_srt_nak(42)); // miss is ignored
        assert!(link.handle_srt_nak(9));
        assert_eq!(link.window(), 20_000 - 2 * WINDOW_DECR);
        assert_eq!(link.in_flight_len(), 1);
        assert!(link.contains_in_flight(8));
        assert_eq!(link.nak_count, 2);
    }

    #[test]
    fn window_never_drops_below_floor() {
        let mut link = connected_link();
        let now = Instant::now();
        for seq in 0..1000u32 {
            link.mark_sent(Some(seq), 100, now);
            link.handle_srt_nak(seq);
        }
        assert_eq!(link.window(), WINDOW_MIN * WINDOW_MULT);
    }

    // ─── In-flight set ──────────────────────────────────────────────────

    #[test]
    fn duplicate_sequence_is_stored_once() {
        let mut link = connected_link();
        let now = Instant::now();
        link.mark_sent(Some(5), 100, now);
        link.mark_sent(Some(5), 100, now);
        assert_eq!(link.in_flight_len(), 1);
    }

    #[test]
    fn srt_ack_clears_at_or_below() {
        let mut link = connected_link();
        let now = Instant::now();
        for seq in [10u32, 11, 12, 13] {
            link.mark_sent(Some(seq), 100, now);
        }
        link.handle_srt_ack(12);
        assert_eq!(link.in_flight_len(), 1);
        assert!(link.contains_in_flight(13));
    }

    #[test]
    fn srt_ack_at_sequence_space_boundary() {
        let mut link = connected_link();
        let now = Instant::now();

        // A packet sent at 2^31 − 2 is resolved by the ACK at 2^31 − 1...
        link.mark_sent(Some(SRT_SEQ_MASK - 1), 100, now);
        link.handle_srt_ack(SRT_SEQ_MASK);
        assert_eq!(link.in_flight_len(), 0);

        // ...and the follow-up ACK at 0 after the wrap finds nothing left
        // to clear but must not resolve fresh post-wrap sequences early.
        link.mark_sent(Some(5), 100, now);
        link.handle_srt_ack(0);
        assert_eq!(link.in_flight_len(), 1);
    }

    #[test]
    fn srt_ack_does_not_change_window() {
        let mut link = connected_link();
        let now = Instant::now();
        link.mark_sent(Some(1), 100, now);
        link.handle_srt_ack(1);
        assert_eq!(link.window(), WINDOW_DEF * WINDOW_MULT);
    }

    // ─── Scoring and timeouts ───────────────────────────────────────────

    #[test]
    fn score_divides_by_in_flight_plus_one() {
        let mut link = connected_link();
        let now = Instant::now();
        link.mark_received(now);
        assert_eq!(link.score(now, TIMEOUT), 20_000);
        link.mark_sent(Some(1), 100, now);
        assert_eq!(link.score(now, TIMEOUT), 10_000);
        link.mark_sent(Some(2), 100, now);
        assert_eq!(link.score(now, TIMEOUT), 6_666);
    }

    #[test]
    fn score_is_zero_unless_connected() {
        let mut link = test_link();
        let now = Instant::now();
        assert_eq!(link.score(now, TIMEOUT), 0);
        link.set_connected();
        assert!(link.score(now, TIMEOUT) > 0);
        link.mark_zombie(now);
        assert_eq!(link.score(now, TIMEOUT), 0);
    }

    #[test]
    fn silence_times_the_link_out() {
        let mut link = connected_link();
        let now = Instant::now();
        link.mark_received(now);
        assert!(!link.is_timed_out(now + Duration::from_secs(3), TIMEOUT));
        assert!(link.is_timed_out(now + Duration::from_secs(5), TIMEOUT));
        assert_eq!(link.score(now + Duration::from_secs(5), TIMEOUT), 0);
    }

    #[test]
    fn send_failure_reads_as_timed_out() {
        let mut link = connected_link();
        let now = Instant::now();
        link.mark_received(now);
        link.mark_send_failed();
        assert!(link.is_timed_out(now, TIMEOUT));

        link.restart_registration(now);
        assert!(!link.is_timed_out(now, TIMEOUT));
        assert_eq!(link.state(), LinkState::RegisteringReg1);
    }

    // ─── Lifecycle ──────────────────────────────────────────────────────

    #[test]
    fn registration_walk() {
        let mut link = test_link();
        let now = Instant::now();
        link.restart_registration(now);
        assert_eq!(link.state(), LinkState::RegisteringReg1);
        link.registration_in_progress(now);
        assert_eq!(link.state(), LinkState::RegisteringReg2);
        link.set_connected();
        assert_eq!(link.state(), LinkState::Connected);
    }

    #[test]
    fn reg2_broadcast_does_not_demote_connected() {
        let mut link = connected_link();
        link.registration_in_progress(Instant::now());
        assert_eq!(link.state(), LinkState::Connected);
    }

    #[test]
    fn zombie_expires_after_linger() {
        let mut link = connected_link();
        let now = Instant::now();
        link.mark_zombie(now);
        assert!(link.is_zombie());
        let linger = Duration::from_secs(15);
        assert!(!link.is_zombie_expired(now + Duration::from_secs(14), linger));
        assert!(link.is_zombie_expired(now + Duration::from_secs(16), linger));
    }

    #[test]
    fn zombie_still_accepts_feedback() {
        let mut link = connected_link();
        let now = Instant::now();
        link.mark_sent(Some(100), 100, now);
        link.mark_zombie(now);
        link.handle_srtla_ack(100, now);
        assert_eq!(link.in_flight_len(), 0);
        assert!(link.is_zombie());
    }

    #[test]
    fn recovery_resets_window_and_in_flight() {
        let mut link = connected_link();
        let now = Instant::now();
        for seq in 0..10u32 {
            link.mark_sent(Some(seq), 100, now);
            link.handle_srtla_ack(seq, now);
        }
        link.mark_sent(Some(99), 100, now);
        link.clear_in_flight();
        link.reset_window();
        assert_eq!(link.in_flight_len(), 0);
        assert_eq!(link.window(), WINDOW_DEF * WINDOW_MULT);
    }

    // ─── RTT estimation ─────────────────────────────────────────────────

    #[test]
    fn rtt_seeds_at_one_hundred_ms() {
        let est = RttEstimator::new();
        assert_eq!(est.smoothed_ms(), RTT_SEED_MS);
        assert_eq!(est.fast_ms(), RTT_SEED_MS);
    }

    #[test]
    fn fast_estimator_converges_quicker() {
        let mut est = RttEstimator::new();
        est.update(20.0);
        // smoothed: 100 + 0.125 × (20 − 100) = 90; fast: 100 + 0.25 × −80 = 80
        assert!((est.smoothed_ms() - 90.0).abs() < 1e-9);
        assert!((est.fast_ms() - 80.0).abs() < 1e-9);
    }

    #[test]
    fn negative_samples_ignored() {
        let mut est = RttEstimator::new();
        est.update(-5.0);
        assert_eq!(est.smoothed_ms(), RTT_SEED_MS);
    }

    #[test]
    fn srtla_ack_hit_samples_rtt() {
        let mut link = connected_link();
        let sent_at = Instant::now();
        link.mark_sent(Some(1), 100, sent_at);
        link.handle_srtla_ack(1, sent_at + Duration::from_millis(60));
        // One sample of 60 ms pulls both estimators below the seed.
        assert!(link.rtt().smoothed_ms() < RTT_SEED_MS);
        assert!(link.rtt().fast_ms() < link.rtt().smoothed_ms() + 1e-9);
    }
}
