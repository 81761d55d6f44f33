//! UDP to track RTP relay
//!
//! The pipeline process sends RTP datagrams to a loopback port. The relay
//! parses each datagram and writes it to the outbound track of the current
//! call until the call token fires, the socket fails, or the sink goes away.

use super::MediaKind;
use crate::peer::PacketSink;
use crate::{Error, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use webrtc::rtp::packet::Packet;
use webrtc::util::Unmarshal;

/// Upper bound on one receive attempt; cancellation is checked in between
pub const RECV_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Why a relay pump stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayExit {
    /// The call token fired
    Cancelled,
    /// Writing to the outbound sink failed
    SinkClosed,
    /// The socket returned an error
    SocketError,
    /// The listen address could not be bound
    BindFailed,
}

/// One bound relay socket for one media kind
pub struct RtpRelay {
    socket: UdpSocket,
    kind: MediaKind,
    mtu: usize,
}

impl RtpRelay {
    /// Bind the relay socket
    pub async fn bind(addr: &str, kind: MediaKind, mtu: usize) -> Result<Self> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|e| Error::RelayError(format!("listen {} {}: {}", kind, addr, e)))?;

        Ok(Self { socket, kind, mtu })
    }

    /// Address the socket is bound to
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Forward packets until cancelled or a terminal error; the socket is
    /// released when this returns
    pub async fn run(self, sink: Arc<dyn PacketSink>, cancel: CancellationToken) -> RelayExit {
        let mut buf = vec![0u8; self.mtu];
        let mut forwarded: u64 = 0;

        loop {
            if cancel.is_cancelled() {
                debug!(kind = %self.kind, forwarded, "RTP relay cancelled");
                return RelayExit::Cancelled;
            }

            let n = match tokio::time::timeout(RECV_POLL_INTERVAL, self.socket.recv_from(&mut buf))
                .await
            {
                Err(_) => continue,
                Ok(Err(e)) => {
                    warn!(kind = %self.kind, "RTP relay read error: {}", e);
                    return RelayExit::SocketError;
                }
                Ok(Ok((n, _))) => n,
            };

            // Not every datagram on the port is RTP
            let mut data = &buf[..n];
            let packet = match Packet::unmarshal(&mut data) {
                Ok(packet) => packet,
                Err(_) => continue,
            };

            if let Err(e) = sink.write_rtp(&packet).await {
                warn!(kind = %self.kind, "RTP relay write error: {}", e);
                return RelayExit::SinkClosed;
            }
            forwarded += 1;
        }
    }
}

/// Bind `addr` and relay into `sink` until done
pub async fn pump_rtp(
    addr: String,
    sink: Arc<dyn PacketSink>,
    mtu: usize,
    kind: MediaKind,
    cancel: CancellationToken,
) -> RelayExit {
    let relay = match RtpRelay::bind(&addr, kind, mtu).await {
        Ok(relay) => relay,
        Err(e) => {
            warn!("{}", e);
            return RelayExit::BindFailed;
        }
    };

    info!(kind = %kind, addr = %addr, "RTP relay listening");
    let exit = relay.run(sink, cancel).await;
    info!(kind = %kind, exit = ?exit, "RTP relay stopped");
    exit
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use tokio::sync::mpsc;
    use tokio::time::Instant;
    use webrtc::rtp::header::Header;
    use webrtc::util::Marshal;

    struct ChannelSink {
        tx: mpsc::UnboundedSender<Packet>,
        fail: bool,
    }

    #[async_trait]
    impl PacketSink for ChannelSink {
        async fn write_rtp(&self, packet: &Packet) -> Result<()> {
            if self.fail {
                return Err(Error::MediaTrackError("closed pipe".to_string()));
            }
            let _ = self.tx.send(packet.clone());
            Ok(())
        }
    }

    fn sink(fail: bool) -> (Arc<dyn PacketSink>, mpsc::UnboundedReceiver<Packet>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(ChannelSink { tx, fail }), rx)
    }

    fn rtp_bytes(seq: u16) -> Bytes {
        Packet {
            header: Header {
                version: 2,
                payload_type: 96,
                sequence_number: seq,
                timestamp: 3000 * seq as u32,
                ssrc: 0x1234_5678,
                ..Default::default()
            },
            payload: Bytes::from_static(&[0x65, 0x88, 0x84, 0x00]),
        }
        .marshal()
        .unwrap()
    }

    async fn start(
        fail: bool,
    ) -> (
        SocketAddr,
        mpsc::UnboundedReceiver<Packet>,
        CancellationToken,
        tokio::task::JoinHandle<RelayExit>,
    ) {
        let relay = RtpRelay::bind("127.0.0.1:0", MediaKind::Video, 1400)
            .await
            .unwrap();
        let addr = relay.local_addr().unwrap();
        let (sink, rx) = sink(fail);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(relay.run(sink, cancel.clone()));
        (addr, rx, cancel, handle)
    }

    #[tokio::test]
    async fn test_forwards_valid_packets() {
        let (addr, mut rx, cancel, handle) = start(false).await;
        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        sender.send_to(&rtp_bytes(7), addr).await.unwrap();

        let packet = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(packet.header.sequence_number, 7);
        assert_eq!(packet.header.ssrc, 0x1234_5678);

        cancel.cancel();
        assert_eq!(handle.await.unwrap(), RelayExit::Cancelled);
    }

    #[tokio::test]
    async fn test_malformed_datagram_dropped() {
        let (addr, mut rx, cancel, handle) = start(false).await;
        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        // Shorter than an RTP header
        sender.send_to(&[0x80, 0x60, 0x00], addr).await.unwrap();
        sender.send_to(&rtp_bytes(1), addr).await.unwrap();

        let packet = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(packet.header.sequence_number, 1);
        assert!(rx.try_recv().is_err());
        assert!(!handle.is_finished());

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_cancellation_under_continuous_traffic() {
        let (addr, _rx, cancel, handle) = start(false).await;

        let flood_cancel = CancellationToken::new();
        let flood = {
            let flood_cancel = flood_cancel.clone();
            tokio::spawn(async move {
                let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
                let mut seq = 0u16;
                while !flood_cancel.is_cancelled() {
                    let _ = sender.send_to(&rtp_bytes(seq), addr).await;
                    seq = seq.wrapping_add(1);
                    tokio::time::sleep(Duration::from_millis(1)).await;
                }
            })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        let started = Instant::now();
        cancel.cancel();

        let exit = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("relay did not observe cancellation within 1s")
            .unwrap();
        assert_eq!(exit, RelayExit::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(1));

        flood_cancel.cancel();
        flood.await.unwrap();
    }

    #[tokio::test]
    async fn test_idle_relay_observes_cancellation() {
        let (_addr, _rx, cancel, handle) = start(false).await;
        cancel.cancel();

        let exit = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(exit, RelayExit::Cancelled);
    }

    #[tokio::test]
    async fn test_sink_failure_stops_relay() {
        let (addr, _rx, _cancel, handle) = start(true).await;
        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        sender.send_to(&rtp_bytes(1), addr).await.unwrap();

        let exit = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(exit, RelayExit::SinkClosed);
    }

    #[tokio::test]
    async fn test_pump_reports_bind_failure() {
        let taken = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap().to_string();
        let (sink, _rx) = sink(false);

        let exit = pump_rtp(addr, sink, 1200, MediaKind::Audio, CancellationToken::new()).await;
        assert_eq!(exit, RelayExit::BindFailed);
    }
}
