//! Per-link and aggregate sender statistics.
//!
//! Snapshots are cheap owned values published once per stats interval;
//! they serialize to JSON and feed the Prometheus rendering in
//! [`crate::metrics`].

use serde::Serialize;

/// One link's statistics at snapshot time.
#[derive(Debug, Clone, Serialize)]
pub struct LinkStats {
    pub virtual_ip: String,
    pub kind: &'static str,
    pub state: &'static str,
    /// Congestion window, scaled integer.
    pub window: i32,
    /// Sequences sent on this link and not yet resolved.
    pub in_flight: usize,
    /// Smoothed RTT estimate in milliseconds.
    pub srtt_ms: f64,
    /// Fast-moving RTT estimate in milliseconds.
    pub fast_rtt_ms: f64,
    /// SRTLA ACK hits on this link.
    pub ack_count: u64,
    /// SRT NAK hits on this link.
    pub nak_count: u64,
    /// SRT payload bytes sent on this link.
    pub bytes_sent: u64,
    /// SRT payload packets sent on this link.
    pub packets_sent: u64,
    /// Scheduler score at snapshot time; 0 when not selectable.
    pub score: i64,
}

/// Everything the engine publishes once per stats interval.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatsSnapshot {
    pub links: Vec<LinkStats>,
    /// Links in `Connected` state (zombies excluded).
    pub connected_links: u32,
    /// SRT payload bytes sent across all links since engine start.
    pub total_bytes_sent: u64,
    /// SRT payload packets sent across all links since engine start.
    pub total_packets_sent: u64,
    /// REG_ERR / REG_NGP / REG_NAK frames received since engine start.
    pub registration_failures: u64,
    /// Whether an encoder endpoint is currently remembered.
    pub encoder_connected: bool,
}

impl StatsSnapshot {
    /// Sequences awaiting resolution across every link.
    pub fn total_in_flight(&self) -> usize {
        self.links.iter().map(|l| l.in_flight).sum()
    }

    /// NAK hits across every link.
    pub fn total_naks(&self) -> u64 {
        self.links.iter().map(|l| l.nak_count).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link(in_flight: usize, nak_count: u64) -> LinkStats {
        LinkStats {
            virtual_ip: "10.200.0.1".into(),
            kind: "wifi",
            state: "connected",
            window: 20_000,
            in_flight,
            srtt_ms: 100.0,
            fast_rtt_ms: 100.0,
            ack_count: 0,
            nak_count,
            bytes_sent: 0,
            packets_sent: 0,
            score: 20_000,
        }
    }

    #[test]
    fn aggregates_sum_over_links() {
        let snap = StatsSnapshot {
            links: vec![link(3, 1), link(5, 4)],
            ..Default::default()
        };
        assert_eq!(snap.total_in_flight(), 8);
        assert_eq!(snap.total_naks(), 5);
    }

    #[test]
    fn snapshot_serializes() {
        let snap = StatsSnapshot {
            links: vec![link(0, 0)],
            connected_links: 1,
            ..Default::default()
        };
        let json = serde_json::to_string(&snap).unwrap();
        assert!(json.contains("\"virtual_ip\":\"10.200.0.1\""));
        assert!(json.contains("\"connected_links\":1"));
    }
}
