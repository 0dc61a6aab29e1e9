//! Best-effort UDP messaging.
//!
//! Luminaires accept the same ASCII commands over UDP, wrapped in a small
//! binary envelope. Nothing on the core command path relies on this
//! channel; it exists for broadcast-style nudges where a lost datagram is
//! acceptable.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use anyhow::{anyhow, Result};
use bytes::{BufMut, BytesMut};
use log::debug;
use tokio::net::UdpSocket;
use tokio::time::timeout;

/// Envelope magic for a UDP command.
pub const MESSAGE_TAG: [u8; 2] = [0xAE, 0xEC];

/// Envelope size: tag, sequence, four reserved bytes, payload length.
pub const HEADER_LEN: usize = 10;

const MAX_PACKET_SIZE: usize = 1400;

/// A UDP channel to luminaires.
///
/// Each messenger keeps its own sequence counter so replies can be
/// correlated with commands; sharing one messenger across tasks would
/// interleave the numbering.
pub struct UdpMessenger {
    socket: UdpSocket,
    port: u16,
    dest: Option<SocketAddr>,
    seqtag: u16,
}

impl UdpMessenger {
    /// Binds an ephemeral local socket targeting luminaires on `port`.
    pub async fn bind(port: u16) -> Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        Ok(UdpMessenger {
            socket,
            port,
            dest: None,
            seqtag: 0,
        })
    }

    // 1..=65535 wrapping; 0 never goes on the wire.
    fn next_seqtag(&mut self) -> u16 {
        self.seqtag = if self.seqtag == u16::MAX {
            1
        } else {
            self.seqtag + 1
        };
        self.seqtag
    }

    /// Wraps an ASCII command in the wire envelope: magic tag, big-endian
    /// sequence number, four reserved zero bytes, big-endian payload
    /// length, payload.
    pub fn build_packet(seqtag: u16, payload: &str) -> Vec<u8> {
        let mut packet = BytesMut::with_capacity(HEADER_LEN + payload.len());
        packet.put_slice(&MESSAGE_TAG);
        packet.put_u16(seqtag);
        packet.put_u32(0);
        packet.put_u16(payload.len() as u16);
        packet.put_slice(payload.as_bytes());
        packet.to_vec()
    }

    /// Sends a command to the given luminaire and remembers it as the
    /// target for subsequent [`Self::send`] and [`Self::recv`] calls.
    pub async fn send_to(&mut self, address: Ipv4Addr, message: &str) -> Result<()> {
        let dest = SocketAddr::new(IpAddr::V4(address), self.port);
        let tag = self.next_seqtag();
        let packet = Self::build_packet(tag, message);
        self.socket.send_to(&packet, dest).await?;
        self.dest = Some(dest);
        debug!("udp {} <- '{}' (seq {})", dest, message, tag);
        Ok(())
    }

    /// Sends a command to the most recent target.
    pub async fn send(&mut self, message: &str) -> Result<()> {
        let dest = self
            .dest
            .ok_or_else(|| anyhow!("no target yet; use send_to first"))?;
        let tag = self.next_seqtag();
        let packet = Self::build_packet(tag, message);
        self.socket.send_to(&packet, dest).await?;
        debug!("udp {} <- '{}' (seq {})", dest, message, tag);
        Ok(())
    }

    /// Waits up to `wait` for one datagram and returns its payload with the
    /// envelope stripped, plus the sender.
    pub async fn recv(&self, wait: Duration) -> Result<(Vec<u8>, SocketAddr)> {
        let mut buffer = [0u8; MAX_PACKET_SIZE];
        let (len, source) = timeout(wait, self.socket.recv_from(&mut buffer)).await??;
        let payload = buffer[..len].get(HEADER_LEN..).unwrap_or(&[]).to_vec();
        Ok((payload, source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packet_layout_matches_the_envelope() {
        let packet = UdpMessenger::build_packet(0x0102, "NS");
        assert_eq!(&packet[0..2], &MESSAGE_TAG);
        assert_eq!(&packet[2..4], &[0x01, 0x02]);
        assert_eq!(&packet[4..8], &[0, 0, 0, 0]);
        assert_eq!(&packet[8..10], &[0x00, 0x02]);
        assert_eq!(&packet[10..], b"NS");
    }

    #[tokio::test]
    async fn seqtag_wraps_without_hitting_zero() {
        let mut messenger = UdpMessenger::bind(57000).await.expect("bind");
        messenger.seqtag = u16::MAX - 1;
        assert_eq!(messenger.next_seqtag(), u16::MAX);
        assert_eq!(messenger.next_seqtag(), 1);
    }
}
