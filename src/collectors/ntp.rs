//! Minimal SNTP client used to measure local clock drift.
//!
//! The offset follows RFC 4330: `((t2 - t1) + (t3 - t4)) / 2`, where t1/t4 are
//! local send/receive times and t2/t3 are the server's receive/transmit times.
//! A positive offset means the local clock is behind the server.

use std::io;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::net::{lookup_host, UdpSocket};
use tokio::time;
use tracing::debug;

const PACKET_LEN: usize = 48;
/// Seconds between 1900-01-01 (NTP era 0) and 1970-01-01.
const NTP_UNIX_OFFSET: u64 = 2_208_988_800;
/// LI = 0, VN = 3, Mode = 3 (client).
const CLIENT_HEADER: u8 = 0x1B;
const MODE_SERVER: u8 = 4;

#[derive(Debug, Error)]
pub enum NtpError {
    #[error("no response within {0} ms")]
    Timeout(u64),
    #[error("could not resolve {0}")]
    Resolve(String),
    #[error("socket error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid response: {0}")]
    InvalidResponse(&'static str),
}

/// Measures the offset between the local clock and `server`, bounded by `timeout`.
pub async fn measure_drift(server: &str, port: u16, timeout: Duration) -> Result<f64, NtpError> {
    let timeout_ms = timeout.as_millis() as u64;
    match time::timeout(timeout, exchange(server, port)).await {
        Ok(result) => result,
        Err(_elapsed) => Err(NtpError::Timeout(timeout_ms)),
    }
}

async fn exchange(server: &str, port: u16) -> Result<f64, NtpError> {
    let addr = lookup_host((server, port))
        .await?
        .next()
        .ok_or_else(|| NtpError::Resolve(server.to_string()))?;
    let bind_addr = if addr.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
    let socket = UdpSocket::bind(bind_addr).await?;
    socket.connect(addr).await?;

    let sent = to_ntp_timestamp(SystemTime::now());
    socket.send(&build_request(sent)).await?;

    let mut buf = [0_u8; 128];
    let len = socket.recv(&mut buf).await?;
    let received = to_ntp_timestamp(SystemTime::now());

    let offset = parse_offset(&buf[..len], sent, received)?;
    debug!(server = %addr, offset_secs = offset, "ntp exchange complete");
    Ok(offset)
}

fn build_request(transmit: u64) -> [u8; PACKET_LEN] {
    let mut packet = [0_u8; PACKET_LEN];
    packet[0] = CLIENT_HEADER;
    packet[40..48].copy_from_slice(&transmit.to_be_bytes());
    packet
}

fn parse_offset(packet: &[u8], sent: u64, received: u64) -> Result<f64, NtpError> {
    if packet.len() < PACKET_LEN {
        return Err(NtpError::InvalidResponse("packet too short"));
    }
    if packet[0] & 0x07 != MODE_SERVER {
        return Err(NtpError::InvalidResponse("not a server reply"));
    }
    if packet[1] == 0 {
        return Err(NtpError::InvalidResponse("kiss-of-death (stratum 0)"));
    }
    if read_timestamp(packet, 24) != sent {
        return Err(NtpError::InvalidResponse("originate timestamp mismatch"));
    }

    let t1 = ntp_seconds(sent);
    let t2 = ntp_seconds(read_timestamp(packet, 32));
    let t3 = ntp_seconds(read_timestamp(packet, 40));
    let t4 = ntp_seconds(received);
    if t2 == 0.0 || t3 == 0.0 {
        return Err(NtpError::InvalidResponse("server timestamps missing"));
    }

    Ok(((t2 - t1) + (t3 - t4)) / 2.0)
}

fn read_timestamp(packet: &[u8], at: usize) -> u64 {
    let mut raw = [0_u8; 8];
    raw.copy_from_slice(&packet[at..at + 8]);
    u64::from_be_bytes(raw)
}

fn to_ntp_timestamp(at: SystemTime) -> u64 {
    let since_epoch = at.duration_since(UNIX_EPOCH).unwrap_or_default();
    let secs = since_epoch.as_secs() + NTP_UNIX_OFFSET;
    let frac = (u64::from(since_epoch.subsec_nanos()) << 32) / 1_000_000_000;
    (secs << 32) | frac
}

fn ntp_seconds(ts: u64) -> f64 {
    (ts >> 32) as f64 + (ts & 0xFFFF_FFFF) as f64 / 4_294_967_296.0
}
