//! # Core Engine
//!
//! The SRTLA data plane and control plane for one stream: owns the link
//! table, the encoder-facing listener and the group identity, and runs the
//! single cooperative event loop.
//!
//! ```text
//! encoder ──UDP──▶ listener ──scheduler──▶ link socket ──▶ SRTLA server
//! encoder ◀──SRT feedback── listener ◀──classify/update── link socket
//! ```
//!
//! Each loop iteration: drain the control inbox, wait for readiness on the
//! listener and every link socket (tick deadline), read one datagram per
//! ready socket, then run housekeeping (registration retry, keepalives,
//! zombie reaping, stats, encoder idle detection). All link state is
//! mutated on the loop thread only; control callers talk to it through a
//! bounded [`crossbeam_channel`] inbox with per-call reply channels.

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};
use srtla_proto::wire::{self, PacketKind, SrtlaId, SRT_SEQ_MASK};
use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::os::unix::io::AsRawFd;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{EngineConfig, EngineTimings};
use crate::error::{AddLinkError, RemoveLinkError, StartError};
use crate::link::{Link, LinkKind, LinkState};
use crate::net::wait_readable;
use crate::pool::VipPool;
use crate::scheduler;
use crate::stats::StatsSnapshot;

/// Large enough for any SRT datagram plus headroom.
const RECV_BUF_LEN: usize = 2048;

/// Control inbox depth; drained every tick, so this only has to absorb
/// bursts from the platform layer.
const COMMAND_INBOX_DEPTH: usize = 64;

/// Called once per stats interval with the freshly published snapshot.
pub type StatsCallback = Box<dyn FnMut(&StatsSnapshot) + Send>;

// ─── Control commands ────────────────────────────────────────────────────────

enum Command {
    AddLink {
        socket: UdpSocket,
        virtual_ip: String,
        kind: LinkKind,
        weight: u32,
        reply: Sender<Result<(), AddLinkError>>,
    },
    RemoveLink {
        virtual_ip: String,
        reply: Sender<Result<(), RemoveLinkError>>,
    },
    RefreshAll,
    Stop,
}

// ─── Shared state ────────────────────────────────────────────────────────────

#[derive(Default, Debug)]
struct SharedCounters {
    connected_links: AtomicU32,
    total_bytes_sent: AtomicU64,
    total_packets_sent: AtomicU64,
    registration_failures: AtomicU64,
}

// ─── Engine + handle ─────────────────────────────────────────────────────────

/// A running engine. Stops (joining the loop thread and closing every
/// socket) on [`Engine::stop`] or drop.
#[derive(Debug)]
pub struct Engine {
    handle: EngineHandle,
    thread: Option<thread::JoinHandle<()>>,
}

/// Cheaply cloneable control handle to a running engine.
#[derive(Clone, Debug)]
pub struct EngineHandle {
    commands: Sender<Command>,
    stats: Arc<Mutex<StatsSnapshot>>,
    counters: Arc<SharedCounters>,
    vips: Arc<Mutex<VipPool>>,
    listen_addr: SocketAddr,
}

impl Engine {
    /// Resolve the server, bind the encoder listener and start the loop.
    /// Errors are synchronous; no engine state exists after one.
    pub fn start(config: EngineConfig) -> Result<Engine, StartError> {
        Self::start_inner(config, None)
    }

    /// Like [`Engine::start`], with a once-per-second stats callback.
    pub fn start_with_stats(
        config: EngineConfig,
        stats_cb: StatsCallback,
    ) -> Result<Engine, StartError> {
        Self::start_inner(config, Some(stats_cb))
    }

    fn start_inner(
        config: EngineConfig,
        stats_cb: Option<StatsCallback>,
    ) -> Result<Engine, StartError> {
        let server_addr = resolve_server(&config.server_host, config.server_port)?;

        let bind_err = |source: io::Error| StartError::Bind {
            port: config.listen_port,
            source,
        };
        let listener =
            UdpSocket::bind(("0.0.0.0", config.listen_port)).map_err(bind_err)?;
        listener.set_nonblocking(true).map_err(bind_err)?;
        let listen_addr = listener.local_addr().map_err(bind_err)?;

        let (commands_tx, commands_rx) = bounded(COMMAND_INBOX_DEPTH);
        let stats = Arc::new(Mutex::new(StatsSnapshot::default()));
        let counters = Arc::new(SharedCounters::default());
        let vips = Arc::new(Mutex::new(VipPool::new()));

        let handle = EngineHandle {
            commands: commands_tx,
            stats: stats.clone(),
            counters: counters.clone(),
            vips: vips.clone(),
            listen_addr,
        };

        let now = Instant::now();
        let core = Core {
            timings: config.timings,
            server_addr,
            listener,
            links: Vec::new(),
            srtla_id: SrtlaId::random(),
            encoder: None,
            commands: commands_rx,
            stats,
            counters,
            vips,
            stats_cb,
            started_at: now,
            last_keepalive: now,
            last_reap: now,
            last_stats: now,
        };

        let thread = thread::Builder::new()
            .name("srtla-engine".into())
            .spawn(move || core.run())
            .map_err(StartError::Spawn)?;

        info!(listen = %listen_addr, server = %server_addr, "engine started");
        Ok(Engine {
            handle,
            thread: Some(thread),
        })
    }

    pub fn handle(&self) -> EngineHandle {
        self.handle.clone()
    }

    /// Where the encoder listener actually bound (useful with port 0).
    pub fn listen_addr(&self) -> SocketAddr {
        self.handle.listen_addr
    }

    /// Stop the loop, join it, and close every socket. Idempotent.
    pub fn stop(&mut self) {
        let _ = self.handle.commands.send(Command::Stop);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.stop();
    }
}

impl EngineHandle {
    /// Enroll a new uplink. The socket must be bound to its route and
    /// connected to the server; it is moved on success and handed back
    /// inside the error on rejection.
    pub fn add_link(
        &self,
        socket: UdpSocket,
        virtual_ip: impl Into<String>,
        weight: u32,
        kind: LinkKind,
    ) -> Result<(), AddLinkError> {
        if let Err(source) = socket.peer_addr() {
            return Err(AddLinkError::InvalidSocket { source, socket });
        }

        let (reply_tx, reply_rx) = bounded(1);
        let cmd = Command::AddLink {
            socket,
            virtual_ip: virtual_ip.into(),
            kind,
            weight,
            reply: reply_tx,
        };
        if let Err(err) = self.commands.send(cmd) {
            let Command::AddLink { socket, .. } = err.into_inner() else {
                unreachable!("add_link sends AddLink");
            };
            return Err(AddLinkError::Stopped { socket });
        }
        reply_rx.recv().unwrap_or(Err(AddLinkError::Terminated))
    }

    /// Remove an uplink: it turns zombie and keeps receiving for the
    /// linger period. Refused if it would leave no connected link.
    pub fn remove_link(&self, virtual_ip: &str) -> Result<(), RemoveLinkError> {
        let (reply_tx, reply_rx) = bounded(1);
        let cmd = Command::RemoveLink {
            virtual_ip: virtual_ip.to_string(),
            reply: reply_tx,
        };
        if self.commands.send(cmd).is_err() {
            return Err(RemoveLinkError::Stopped);
        }
        reply_rx.recv().unwrap_or(Err(RemoveLinkError::Stopped))
    }

    /// Force every non-zombie link back through registration with a clean
    /// window. Used when the platform knows the network world changed.
    pub fn refresh_all_links(&self) {
        let _ = self.commands.send(Command::RefreshAll);
    }

    /// Reserve a virtual-IP label for a link about to be added.
    pub fn allocate_virtual_ip(&self) -> Option<String> {
        self.vips.lock().unwrap_or_else(|e| e.into_inner()).allocate()
    }

    /// Return a label whose link was rejected or never added.
    pub fn release_virtual_ip(&self, label: &str) -> bool {
        self.vips.lock().unwrap_or_else(|e| e.into_inner()).release(label)
    }

    pub fn connected_link_count(&self) -> u32 {
        self.counters.connected_links.load(Ordering::Relaxed)
    }

    /// SRT payload bytes sent across all links since engine start. Cheap;
    /// suitable for rate sampling.
    pub fn total_bytes_sent(&self) -> u64 {
        self.counters.total_bytes_sent.load(Ordering::Relaxed)
    }

    /// Registration failures (REG_ERR/REG_NGP/REG_NAK) since start.
    pub fn registration_failures(&self) -> u64 {
        self.counters.registration_failures.load(Ordering::Relaxed)
    }

    /// Latest published snapshot (refreshed once per stats interval).
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Shared snapshot cell, for pollers like the metrics server.
    pub fn stats_handle(&self) -> Arc<Mutex<StatsSnapshot>> {
        self.stats.clone()
    }

    pub fn listen_addr(&self) -> SocketAddr {
        self.listen_addr
    }
}

fn resolve_server(host: &str, port: u16) -> Result<SocketAddr, StartError> {
    let addrs = (host, port).to_socket_addrs().map_err(|source| {
        StartError::Resolve {
            host: host.to_string(),
            port,
            source,
        }
    })?;
    addrs
        .into_iter()
        .find(SocketAddr::is_ipv4)
        .ok_or_else(|| StartError::NoIpv4 {
            host: host.to_string(),
        })
}

// ─── Core loop ───────────────────────────────────────────────────────────────

struct EncoderEndpoint {
    addr: SocketAddr,
    last_heard: Instant,
}

struct Core {
    timings: EngineTimings,
    server_addr: SocketAddr,
    listener: UdpSocket,
    /// Insertion-ordered link table; the scheduler's tie-break depends on
    /// this order.
    links: Vec<Link>,
    srtla_id: SrtlaId,
    encoder: Option<EncoderEndpoint>,
    commands: Receiver<Command>,
    stats: Arc<Mutex<StatsSnapshot>>,
    counters: Arc<SharedCounters>,
    vips: Arc<Mutex<VipPool>>,
    stats_cb: Option<StatsCallback>,
    started_at: Instant,
    last_keepalive: Instant,
    last_reap: Instant,
    last_stats: Instant,
}

impl Core {
    fn run(mut self) {
        info!(server = %self.server_addr, "engine loop running");
        let mut buf = [0u8; RECV_BUF_LEN];

        loop {
            if self.drain_commands() {
                break;
            }

            let ready = match self.wait_ready() {
                Ok(ready) => ready,
                Err(e) => {
                    warn!(error = %e, "readiness wait failed");
                    thread::sleep(self.timings.tick);
                    continue;
                }
            };

            let now = Instant::now();
            for idx in 0..self.links.len() {
                if ready[idx + 1] {
                    self.service_link(idx, &mut buf, now);
                }
            }
            if ready[0] {
                self.service_listener(&mut buf, now);
            }

            self.housekeeping(Instant::now());
        }

        info!("engine stopped");
        // Dropping Core closes the listener and every link socket.
    }

    fn wait_ready(&self) -> io::Result<Vec<bool>> {
        let mut fds = Vec::with_capacity(self.links.len() + 1);
        fds.push(self.listener.as_raw_fd());
        fds.extend(self.links.iter().map(|l| l.socket().as_raw_fd()));
        wait_readable(&fds, self.timings.tick)
    }

    fn clock_ms(&self, now: Instant) -> u64 {
        now.duration_since(self.started_at).as_millis() as u64
    }

    // ─── Control inbox ──────────────────────────────────────────────────

    /// Returns `true` when the loop should stop.
    fn drain_commands(&mut self) -> bool {
        loop {
            match self.commands.try_recv() {
                Ok(Command::AddLink {
                    socket,
                    virtual_ip,
                    kind,
                    weight,
                    reply,
                }) => {
                    let result = self.install_link(socket, virtual_ip, kind, weight);
                    let _ = reply.send(result);
                }
                Ok(Command::RemoveLink { virtual_ip, reply }) => {
                    let _ = reply.send(self.remove_link(&virtual_ip));
                }
                Ok(Command::RefreshAll) => self.refresh_all(Instant::now()),
                Ok(Command::Stop) => {
                    self.reject_pending();
                    return true;
                }
                Err(TryRecvError::Empty) => return false,
                Err(TryRecvError::Disconnected) => return true,
            }
        }
    }

    /// A stop must not leak a socket: queued installs hand theirs back.
    fn reject_pending(&mut self) {
        while let Ok(cmd) = self.commands.try_recv() {
            match cmd {
                Command::AddLink { socket, reply, .. } => {
                    let _ = reply.send(Err(AddLinkError::Stopped { socket }));
                }
                Command::RemoveLink { reply, .. } => {
                    let _ = reply.send(Err(RemoveLinkError::Stopped));
                }
                Command::RefreshAll | Command::Stop => {}
            }
        }
    }

    fn install_link(
        &mut self,
        socket: UdpSocket,
        virtual_ip: String,
        kind: LinkKind,
        weight: u32,
    ) -> Result<(), AddLinkError> {
        if let Some(pos) = self
            .links
            .iter()
            .position(|l| l.virtual_ip() == virtual_ip)
        {
            if self.links[pos].is_zombie() || self.links[pos].is_failed() {
                // The label is being re-used for a fresh path; the old
                // socket closes now, the label stays allocated.
                info!(virtual_ip = %virtual_ip, "replacing expired link");
                self.links.remove(pos);
            } else {
                return Err(AddLinkError::DuplicateVirtualIp { virtual_ip, socket });
            }
        }

        if let Err(source) = socket.set_nonblocking(true) {
            return Err(AddLinkError::InvalidSocket { source, socket });
        }

        let now = Instant::now();
        let mut link = Link::new(socket, virtual_ip, kind, weight, now);
        link.restart_registration(now);
        info!(
            virtual_ip = %link.virtual_ip(),
            kind = link.kind().as_str(),
            "link added"
        );
        self.links.push(link);
        Ok(())
    }

    fn remove_link(&mut self, virtual_ip: &str) -> Result<(), RemoveLinkError> {
        let Some(pos) = self
            .links
            .iter()
            .position(|l| l.virtual_ip() == virtual_ip && !l.is_zombie() && !l.is_failed())
        else {
            return Err(RemoveLinkError::UnknownLink {
                virtual_ip: virtual_ip.to_string(),
            });
        };

        let remaining_connected = self
            .links
            .iter()
            .enumerate()
            .filter(|(i, l)| *i != pos && l.is_connected())
            .count();
        if remaining_connected == 0 {
            warn!(virtual_ip, "refusing removal of the last connected link");
            return Err(RemoveLinkError::LastConnectedLink {
                virtual_ip: virtual_ip.to_string(),
            });
        }

        let now = Instant::now();
        self.links[pos].mark_zombie(now);
        info!(
            virtual_ip,
            linger = ?self.timings.zombie_linger,
            "link removed, lingering as zombie"
        );

        if remaining_connected == 1 {
            // SRTLA ACKs pending on the removed path will never arrive;
            // without a reset the survivor's window would starve.
            for link in self.links.iter_mut().filter(|l| l.is_connected()) {
                link.clear_in_flight();
                link.reset_window();
            }
        }

        // Nudge the survivors so the server sees them promptly.
        let frame = wire::build_keepalive(self.clock_ms(now));
        for link in self.links.iter_mut().filter(|l| l.is_connected()) {
            if link.socket().send(&frame).is_ok() {
                link.record_control_send(now);
            }
        }
        Ok(())
    }

    fn refresh_all(&mut self, now: Instant) {
        info!("refreshing all links");
        for link in &mut self.links {
            if link.is_zombie() || link.is_failed() {
                continue;
            }
            link.clear_in_flight();
            link.reset_window();
            link.park(now);
        }
    }

    // ─── Link ingress ───────────────────────────────────────────────────

    fn service_link(&mut self, idx: usize, buf: &mut [u8], now: Instant) {
        let n = match self.links[idx].socket().recv(buf) {
            Ok(n) => n,
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::Interrupted =>
            {
                return;
            }
            Err(e) => {
                warn!(
                    virtual_ip = %self.links[idx].virtual_ip(),
                    error = %e,
                    "link read error, failing link"
                );
                self.links[idx].set_failed();
                return;
            }
        };

        self.links[idx].mark_received(now);
        if n == 0 {
            return;
        }
        let frame = &buf[..n];

        match wire::classify(frame) {
            PacketKind::SrtlaReg2 => self.handle_reg2(idx, frame, now),
            PacketKind::SrtlaReg3 => {
                if self.links[idx].is_zombie() {
                    return;
                }
                info!(virtual_ip = %self.links[idx].virtual_ip(), "link connected");
                self.links[idx].set_connected();
            }
            kind @ (PacketKind::SrtlaRegErr
            | PacketKind::SrtlaRegNgp
            | PacketKind::SrtlaRegNak) => {
                warn!(
                    virtual_ip = %self.links[idx].virtual_ip(),
                    ?kind,
                    "registration rejected by server"
                );
                self.counters
                    .registration_failures
                    .fetch_add(1, Ordering::Relaxed);
            }
            PacketKind::SrtlaAck => {
                let Some(seqs) = wire::srtla_ack_sequences(frame) else {
                    debug!(len = n, "malformed SRTLA ACK dropped");
                    return;
                };
                for seq in seqs {
                    let seq = seq & SRT_SEQ_MASK;
                    for link in self.links.iter_mut().filter(|l| l.is_connected()) {
                        link.handle_srtla_ack(seq, now);
                    }
                }
            }
            PacketKind::SrtlaKeepalive => {
                // Echo of our own timestamp; receipt is all that matters.
            }
            PacketKind::SrtAck => {
                if let Some(ack) = wire::srt_ack_seq(frame) {
                    for link in self.links.iter_mut().filter(|l| l.is_connected()) {
                        link.handle_srt_ack(ack);
                    }
                }
                self.forward_to_encoder(frame);
            }
            PacketKind::SrtNak => {
                if let Some(seqs) = wire::srt_nak_sequences(frame) {
                    for seq in seqs {
                        for link in self.links.iter_mut().filter(|l| l.is_connected()) {
                            link.handle_srt_nak(seq);
                        }
                    }
                }
                self.forward_to_encoder(frame);
            }
            PacketKind::SrtShutdown => {
                if self.encoder.take().is_some() {
                    info!("SRT shutdown from server, forgetting encoder endpoint");
                }
            }
            PacketKind::SrtData { .. } | PacketKind::SrtControl => {
                self.forward_to_encoder(frame);
            }
            PacketKind::SrtlaReg1 => {
                // Only ever sender → server; ignore.
                debug!("unexpected REG1 from server");
            }
            PacketKind::Runt => {
                debug!(len = n, "runt datagram dropped");
            }
        }
    }

    fn handle_reg2(&mut self, idx: usize, frame: &[u8], now: Instant) {
        if self.links[idx].is_zombie() {
            return;
        }
        let Some(completed) = wire::reg_group_id(frame) else {
            debug!("short REG2 dropped");
            return;
        };
        if !self.srtla_id.first_half_matches(completed) {
            debug!(
                virtual_ip = %self.links[idx].virtual_ip(),
                "REG2 group identity mismatch, ignoring"
            );
            return;
        }

        self.srtla_id.adopt(completed);
        info!("group identity confirmed by server");

        // Enroll every live path under the completed identity.
        let frame = wire::build_reg2(&self.srtla_id);
        for link in &mut self.links {
            if link.is_zombie() || link.is_failed() {
                continue;
            }
            match link.socket().send(&frame) {
                Ok(_) => link.registration_in_progress(now),
                Err(e) => {
                    warn!(virtual_ip = %link.virtual_ip(), error = %e, "REG2 send failed");
                    link.mark_send_failed();
                }
            }
        }
    }

    fn forward_to_encoder(&self, frame: &[u8]) {
        let Some(enc) = &self.encoder else { return };
        if let Err(e) = self.listener.send_to(frame, enc.addr) {
            debug!(error = %e, "encoder forward failed");
        }
    }

    // ─── Encoder ingress ────────────────────────────────────────────────

    fn service_listener(&mut self, buf: &mut [u8], now: Instant) {
        let (n, from) = match self.listener.recv_from(buf) {
            Ok(v) => v,
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::Interrupted =>
            {
                return;
            }
            Err(e) => {
                warn!(error = %e, "listener read error");
                return;
            }
        };

        match &mut self.encoder {
            Some(enc) if enc.addr == from => enc.last_heard = now,
            Some(enc) => {
                info!(old = %enc.addr, new = %from, "encoder endpoint changed");
                enc.addr = from;
                enc.last_heard = now;
            }
            None => {
                info!(encoder = %from, "encoder stream started");
                self.encoder = Some(EncoderEndpoint {
                    addr: from,
                    last_heard: now,
                });
            }
        }
        if n == 0 {
            return;
        }
        let frame = &buf[..n];

        let seq = wire::srt_sequence(frame);
        let Some(link) =
            scheduler::select(&mut self.links, now, self.timings.link_timeout)
        else {
            debug!("no usable link, dropping packet");
            return;
        };

        match link.socket().send(frame) {
            Ok(_) => {
                link.mark_sent(seq, n, now);
                self.counters
                    .total_bytes_sent
                    .fetch_add(n as u64, Ordering::Relaxed);
                self.counters
                    .total_packets_sent
                    .fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                warn!(virtual_ip = %link.virtual_ip(), error = %e, "link send failed");
                link.mark_send_failed();
            }
        }
    }

    // ─── Housekeeping ───────────────────────────────────────────────────

    fn housekeeping(&mut self, now: Instant) {
        self.registration_pass(now);

        if now.duration_since(self.last_keepalive) >= self.timings.keepalive_interval {
            self.last_keepalive = now;
            self.keepalive_pass(now);
        }

        if now.duration_since(self.last_reap) >= self.timings.reap_interval {
            self.last_reap = now;
            self.reap(now);
        }

        if now.duration_since(self.last_stats) >= self.timings.stats_interval {
            self.last_stats = now;
            self.publish_stats(now);
        }

        if let Some(enc) = &self.encoder {
            if now.duration_since(enc.last_heard) > self.timings.encoder_timeout {
                info!(encoder = %enc.addr, "encoder idle, forgetting endpoint");
                self.encoder = None;
            }
        }

        let connected = self.links.iter().filter(|l| l.is_connected()).count() as u32;
        self.counters
            .connected_links
            .store(connected, Ordering::Relaxed);
    }

    fn registration_pass(&mut self, now: Instant) {
        let reg1 = wire::build_reg1(&self.srtla_id);
        for link in &mut self.links {
            if link.is_zombie() || link.is_failed() {
                continue;
            }
            if link.is_timed_out(now, self.timings.link_timeout) {
                info!(virtual_ip = %link.virtual_ip(), "link timed out, re-registering");
                link.restart_registration(now);
            }
            if matches!(
                link.state(),
                LinkState::Disconnected | LinkState::RegisteringReg1
            ) {
                match link.socket().send(&reg1) {
                    Ok(_) => {
                        debug!(virtual_ip = %link.virtual_ip(), "REG1 sent");
                        link.registration_in_progress(now);
                    }
                    Err(e) => {
                        warn!(virtual_ip = %link.virtual_ip(), error = %e, "REG1 send failed");
                        link.mark_send_failed();
                    }
                }
            }
        }
    }

    fn keepalive_pass(&mut self, now: Instant) {
        let frame = wire::build_keepalive(self.clock_ms(now));
        for link in &mut self.links {
            if link.is_zombie() || link.is_failed() {
                continue;
            }
            match link.socket().send(&frame) {
                Ok(_) => link.record_control_send(now),
                Err(e) => {
                    debug!(virtual_ip = %link.virtual_ip(), error = %e, "keepalive send failed");
                    link.mark_send_failed();
                }
            }
        }
    }

    fn reap(&mut self, now: Instant) {
        let linger = self.timings.zombie_linger;
        let mut pool = self.vips.lock().unwrap_or_else(|e| e.into_inner());
        self.links.retain(|link| {
            let gone = link.is_zombie_expired(now, linger) || link.is_failed();
            if gone {
                info!(
                    virtual_ip = %link.virtual_ip(),
                    state = link.state().as_str(),
                    "reaping link"
                );
                pool.release(link.virtual_ip());
            }
            !gone
        });
    }

    fn publish_stats(&mut self, now: Instant) {
        let timeout = self.timings.link_timeout;
        let snap = StatsSnapshot {
            links: self
                .links
                .iter()
                .map(|l| l.snapshot(now, timeout))
                .collect(),
            connected_links: self.links.iter().filter(|l| l.is_connected()).count() as u32,
            total_bytes_sent: self.counters.total_bytes_sent.load(Ordering::Relaxed),
            total_packets_sent: self.counters.total_packets_sent.load(Ordering::Relaxed),
            registration_failures: self
                .counters
                .registration_failures
                .load(Ordering::Relaxed),
            encoder_connected: self.encoder.is_some(),
        };
        *self.stats.lock().unwrap_or_else(|e| e.into_inner()) = snap.clone();
        if let Some(cb) = &mut self.stats_cb {
            cb(&snap);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    fn start_engine() -> Engine {
        Engine::start(EngineConfig::new(0, "127.0.0.1", 39999)).unwrap()
    }

    /// A socket connected to a bound peer, so sends never raise ICMP
    /// errors back into the engine.
    fn link_socket() -> (UdpSocket, UdpSocket) {
        let peer = UdpSocket::bind("127.0.0.1:0").unwrap();
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket.connect(peer.local_addr().unwrap()).unwrap();
        (socket, peer)
    }

    #[test]
    fn start_reports_unresolvable_host() {
        let err = Engine::start(EngineConfig::new(0, "host.invalid.srtla", 1)).unwrap_err();
        assert!(matches!(
            err,
            StartError::Resolve { .. } | StartError::NoIpv4 { .. }
        ));
    }

    #[test]
    fn start_reports_bind_contention() {
        let holder = UdpSocket::bind("0.0.0.0:0").unwrap();
        let port = holder.local_addr().unwrap().port();
        let err = Engine::start(EngineConfig::new(port, "127.0.0.1", 39999)).unwrap_err();
        assert!(err.is_bind_contention());
    }

    #[test]
    fn stop_is_idempotent() {
        let mut engine = start_engine();
        engine.stop();
        engine.stop();
    }

    #[test]
    fn add_link_rejects_unconnected_socket() {
        let engine = start_engine();
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        let err = engine
            .handle()
            .add_link(socket, "10.200.0.1", 1, LinkKind::Wifi)
            .unwrap_err();
        assert!(matches!(err, AddLinkError::InvalidSocket { .. }));
        assert!(err.into_socket().is_some());
    }

    #[test]
    fn add_link_rejects_duplicate_virtual_ip() {
        let engine = start_engine();
        let handle = engine.handle();
        let (a, _peer_a) = link_socket();
        let (b, _peer_b) = link_socket();

        handle.add_link(a, "10.200.0.1", 1, LinkKind::Wifi).unwrap();
        let err = handle
            .add_link(b, "10.200.0.1", 1, LinkKind::Cellular)
            .unwrap_err();
        assert!(matches!(err, AddLinkError::DuplicateVirtualIp { .. }));
        // The rejected socket comes back usable.
        let socket = err.into_socket().unwrap();
        assert!(socket.peer_addr().is_ok());
    }

    #[test]
    fn add_link_after_stop_returns_socket() {
        let mut engine = start_engine();
        let handle = engine.handle();
        engine.stop();

        let (socket, _peer) = link_socket();
        let err = handle
            .add_link(socket, "10.200.0.1", 1, LinkKind::Other)
            .unwrap_err();
        assert!(matches!(err, AddLinkError::Stopped { .. }));
        assert!(err.into_socket().is_some());
    }

    #[test]
    fn remove_unknown_link_is_refused() {
        let engine = start_engine();
        let err = engine.handle().remove_link("10.200.0.77").unwrap_err();
        assert_eq!(
            err,
            RemoveLinkError::UnknownLink {
                virtual_ip: "10.200.0.77".into()
            }
        );
    }

    #[test]
    fn virtual_ip_pool_round_trip() {
        let engine = start_engine();
        let handle = engine.handle();
        let vip = handle.allocate_virtual_ip().unwrap();
        assert_eq!(vip, "10.200.0.1");
        assert!(handle.release_virtual_ip(&vip));
        assert!(!handle.release_virtual_ip(&vip));
    }

    #[test]
    fn fresh_engine_has_no_connected_links() {
        let engine = start_engine();
        assert_eq!(engine.handle().connected_link_count(), 0);
        assert_eq!(engine.handle().total_bytes_sent(), 0);
    }

    #[test]
    fn listen_addr_reports_ephemeral_port() {
        let engine = start_engine();
        assert_ne!(engine.listen_addr().port(), 0);
    }
}
