//! # srtla-proto
//!
//! Wire format for SRTLA (SRT Link Aggregation), sender side.
//!
//! SRTLA carries a single SRT stream across several UDP paths to a
//! recombining receiver. This crate owns everything that touches bytes on
//! the wire and nothing that touches a socket:
//!
//! - [`wire`] — packet classification, registration and keepalive frames,
//!   SRT ACK/NAK field access, the group identity, and wrap-aware
//!   sequence ordering.
//!
//! The sender proper (sockets, congestion windows, scheduling, lifecycle)
//! lives in the `srtla-sender` crate.

pub mod wire;

pub use wire::{classify, seq_gt, seq_leq, PacketKind, SrtlaId, SrtlaPacketType};
