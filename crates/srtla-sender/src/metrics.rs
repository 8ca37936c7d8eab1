//! # Metrics Export
//!
//! Renders stats snapshots in Prometheus text exposition format and as
//! JSON, and serves both from a minimal blocking HTTP listener. The server
//! is opt-in and lives on its own thread in the binary; the engine only
//! ever publishes snapshots.

use crate::stats::StatsSnapshot;
use std::fmt::Write;
use std::io::{Read, Write as IoWrite};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Render a snapshot in Prometheus text exposition format.
pub fn render_prometheus(snap: &StatsSnapshot) -> String {
    let mut out = String::with_capacity(2048);

    // ── Per-link gauges ─────────────────────────────────────────

    writeln!(out, "# HELP srtla_link_window Congestion window (scaled by 1000).").unwrap();
    writeln!(out, "# TYPE srtla_link_window gauge").unwrap();
    for l in &snap.links {
        writeln!(
            out,
            "srtla_link_window{{virtual_ip=\"{}\",kind=\"{}\"}} {}",
            l.virtual_ip, l.kind, l.window
        )
        .unwrap();
    }

    writeln!(out, "# HELP srtla_link_in_flight Unresolved sequences on the link.").unwrap();
    writeln!(out, "# TYPE srtla_link_in_flight gauge").unwrap();
    for l in &snap.links {
        writeln!(
            out,
            "srtla_link_in_flight{{virtual_ip=\"{}\"}} {}",
            l.virtual_ip, l.in_flight
        )
        .unwrap();
    }

    writeln!(out, "# HELP srtla_link_score Scheduler score (0 = not selectable).").unwrap();
    writeln!(out, "# TYPE srtla_link_score gauge").unwrap();
    for l in &snap.links {
        writeln!(
            out,
            "srtla_link_score{{virtual_ip=\"{}\"}} {}",
            l.virtual_ip, l.score
        )
        .unwrap();
    }

    writeln!(out, "# HELP srtla_link_srtt_ms Smoothed RTT in milliseconds.").unwrap();
    writeln!(out, "# TYPE srtla_link_srtt_ms gauge").unwrap();
    for l in &snap.links {
        writeln!(
            out,
            "srtla_link_srtt_ms{{virtual_ip=\"{}\"}} {:.3}",
            l.virtual_ip, l.srtt_ms
        )
        .unwrap();
    }

    writeln!(out, "# HELP srtla_link_bytes_sent_total Stream bytes sent on the link.").unwrap();
    writeln!(out, "# TYPE srtla_link_bytes_sent_total counter").unwrap();
    for l in &snap.links {
        writeln!(
            out,
            "srtla_link_bytes_sent_total{{virtual_ip=\"{}\"}} {}",
            l.virtual_ip, l.bytes_sent
        )
        .unwrap();
    }

    writeln!(out, "# HELP srtla_link_nak_total SRT NAK hits on the link.").unwrap();
    writeln!(out, "# TYPE srtla_link_nak_total counter").unwrap();
    for l in &snap.links {
        writeln!(
            out,
            "srtla_link_nak_total{{virtual_ip=\"{}\"}} {}",
            l.virtual_ip, l.nak_count
        )
        .unwrap();
    }

    // ── Aggregates ──────────────────────────────────────────────

    writeln!(out, "# HELP srtla_connected_links Links currently connected.").unwrap();
    writeln!(out, "# TYPE srtla_connected_links gauge").unwrap();
    writeln!(out, "srtla_connected_links {}", snap.connected_links).unwrap();

    writeln!(out, "# HELP srtla_bytes_sent_total Stream bytes sent across all links.").unwrap();
    writeln!(out, "# TYPE srtla_bytes_sent_total counter").unwrap();
    writeln!(out, "srtla_bytes_sent_total {}", snap.total_bytes_sent).unwrap();

    writeln!(out, "# HELP srtla_registration_failures_total Registration errors from the server.").unwrap();
    writeln!(out, "# TYPE srtla_registration_failures_total counter").unwrap();
    writeln!(out, "srtla_registration_failures_total {}", snap.registration_failures).unwrap();

    writeln!(out, "# HELP srtla_encoder_connected Whether an encoder endpoint is remembered.").unwrap();
    writeln!(out, "# TYPE srtla_encoder_connected gauge").unwrap();
    writeln!(out, "srtla_encoder_connected {}", u8::from(snap.encoder_connected)).unwrap();

    out
}

/// Render a snapshot as pretty JSON.
pub fn render_json(snap: &StatsSnapshot) -> String {
    serde_json::to_string_pretty(snap).unwrap_or_else(|_| "{}".to_string())
}

/// Blocking scrape server: `/metrics` (Prometheus) and `/stats.json`.
/// Intended to run on a dedicated thread for the lifetime of the process;
/// `snapshot` is called per request so the source can outlive any single
/// engine instance.
pub fn run_metrics_server(
    port: u16,
    snapshot: impl Fn() -> StatsSnapshot,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port))?;
    tracing::info!(port, "metrics server listening");

    for stream in listener.incoming() {
        let Ok(stream) = stream else { continue };
        if let Err(e) = serve_one(stream, &snapshot()) {
            tracing::debug!(error = %e, "metrics request failed");
        }
    }
    Ok(())
}

/// Convenience wrapper for a fixed shared snapshot cell.
pub fn run_metrics_server_for(
    port: u16,
    stats: Arc<Mutex<StatsSnapshot>>,
) -> std::io::Result<()> {
    run_metrics_server(port, move || {
        stats.lock().unwrap_or_else(|e| e.into_inner()).clone()
    })
}

fn serve_one(mut stream: TcpStream, snap: &StatsSnapshot) -> std::io::Result<()> {
    stream.set_read_timeout(Some(Duration::from_millis(500)))?;
    let mut request = [0u8; 1024];
    let n = stream.read(&mut request).unwrap_or(0);
    let request = String::from_utf8_lossy(&request[..n]);

    let (status, content_type, body) = if request.starts_with("GET /metrics") {
        ("200 OK", "text/plain; version=0.0.4", render_prometheus(snap))
    } else if request.starts_with("GET /stats.json") {
        ("200 OK", "application/json", render_json(snap))
    } else {
        ("404 Not Found", "text/plain", "not found\n".to_string())
    };

    write!(
        stream,
        "HTTP/1.1 {status}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::LinkStats;

    fn snapshot() -> StatsSnapshot {
        StatsSnapshot {
            links: vec![LinkStats {
                virtual_ip: "10.200.0.1".into(),
                kind: "cellular",
                state: "connected",
                window: 31_337,
                in_flight: 4,
                srtt_ms: 87.5,
                fast_rtt_ms: 80.0,
                ack_count: 10,
                nak_count: 2,
                bytes_sent: 123_456,
                packets_sent: 99,
                score: 6_267,
            }],
            connected_links: 1,
            total_bytes_sent: 123_456,
            total_packets_sent: 99,
            registration_failures: 0,
            encoder_connected: true,
        }
    }

    #[test]
    fn prometheus_contains_link_gauges() {
        let text = render_prometheus(&snapshot());
        assert!(text.contains("srtla_link_window{virtual_ip=\"10.200.0.1\",kind=\"cellular\"} 31337"));
        assert!(text.contains("srtla_link_in_flight{virtual_ip=\"10.200.0.1\"} 4"));
        assert!(text.contains("srtla_connected_links 1"));
        assert!(text.contains("srtla_encoder_connected 1"));
    }

    #[test]
    fn prometheus_help_lines_precede_samples() {
        let text = render_prometheus(&snapshot());
        let help = text.find("# HELP srtla_link_window").unwrap();
        let sample = text.find("srtla_link_window{").unwrap();
        assert!(help < sample);
    }

    #[test]
    fn json_roundtrips_fields() {
        let json = render_json(&snapshot());
        assert!(json.contains("\"window\": 31337"));
        assert!(json.contains("\"connected_links\": 1"));
    }
}
