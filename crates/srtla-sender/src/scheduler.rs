//! # Path Scheduler
//!
//! Chooses the uplink for each outgoing SRT packet: the connected,
//! responsive link with the highest `window / (in_flight + 1)` score.
//! The scheduler keeps no state of its own — hysteresis comes entirely
//! from the window dynamics — and ties go to the earliest-installed link
//! so repeated scores don't flap between paths.

use std::time::{Duration, Instant};

use crate::link::Link;

/// Pick the best link for one packet, or `None` when no link qualifies.
/// The caller drops the packet in that case; SRT retransmits end-to-end.
pub fn select<'a>(
    links: &'a mut [Link],
    now: Instant,
    timeout: Duration,
) -> Option<&'a mut Link> {
    let mut best: Option<(usize, i64)> = None;
    for (idx, link) in links.iter().enumerate() {
        let score = link.score(now, timeout);
        if score == 0 {
            continue;
        }
        match best {
            Some((_, top)) if score <= top => {}
            _ => best = Some((idx, score)),
        }
    }
    best.map(move |(idx, _)| &mut links[idx])
}
