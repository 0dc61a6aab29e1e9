//! One TCP stream to one luminaire.
//!
//! The command channel is telnet-shaped: commands go out terminated by a
//! carriage return, replies come back terminated by a semicolon. A
//! `Transport` owns exactly one stream and is owned by exactly one
//! [`crate::control_interface::Luminaire`]; exclusive `&mut` access is what
//! keeps command/reply pairs from interleaving.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::BytesMut;
use log::{debug, info};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, Instant};

use crate::error::{LumenError, Result};

/// Every luminaire reply ends in (and does not otherwise contain) this byte.
pub const REPLY_TERMINATOR: u8 = b';';

/// Connection lifecycle of a single transport.
///
/// `Error` is terminal: a transport that has seen a stream failure is not
/// reused, recovery means building a fresh one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

#[derive(Debug)]
pub struct Transport {
    addr: SocketAddr,
    stream: Option<TcpStream>,
    buffer: BytesMut,
    state: ConnectionState,
}

impl Transport {
    /// Opens the stream, classifying failures so callers can tell a busy
    /// device (refused) from a silent or unreachable one.
    pub async fn connect(addr: SocketAddr, connect_timeout: Duration) -> Result<Self> {
        debug!("connecting to {}", addr);
        let stream = match timeout(connect_timeout, TcpStream::connect(addr)).await {
            Err(_) => return Err(LumenError::ConnectTimeout { addr }),
            Ok(Err(e)) if e.kind() == io::ErrorKind::ConnectionRefused => {
                return Err(LumenError::ConnectRefused { addr })
            }
            Ok(Err(e)) => return Err(LumenError::ConnectFailed { addr, source: e }),
            Ok(Ok(stream)) => stream,
        };
        Ok(Transport {
            addr,
            stream: Some(stream),
            buffer: BytesMut::with_capacity(4096),
            state: ConnectionState::Connected,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected && self.stream.is_some()
    }

    /// Writes the command bytes verbatim followed by the carriage-return
    /// terminator. Does not wait for a reply.
    pub async fn send_raw(&mut self, text: &str) -> Result<()> {
        let addr = self.addr;
        let stream = match self.stream.as_mut() {
            Some(stream) => stream,
            None => {
                return Err(LumenError::WriteFailed {
                    addr,
                    source: io::Error::new(io::ErrorKind::NotConnected, "transport closed"),
                })
            }
        };
        let mut frame = Vec::with_capacity(text.len() + 1);
        frame.extend_from_slice(text.as_bytes());
        frame.push(b'\r');
        if let Err(source) = stream.write_all(&frame).await {
            self.state = ConnectionState::Error;
            return Err(LumenError::WriteFailed { addr, source });
        }
        Ok(())
    }

    /// Reads until the reply terminator appears, returning the raw text
    /// including the terminator. Bytes past the terminator stay buffered for
    /// the next read.
    pub async fn read_until_terminator(&mut self, read_timeout: Duration) -> Result<String> {
        let addr = self.addr;
        let deadline = Instant::now() + read_timeout;
        loop {
            if let Some(pos) = self
                .buffer
                .iter()
                .position(|&b| b == REPLY_TERMINATOR)
            {
                let chunk = self.buffer.split_to(pos + 1);
                return Ok(String::from_utf8_lossy(&chunk).into_owned());
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(LumenError::ReadTimeout { addr });
            }
            let stream = match self.stream.as_mut() {
                Some(stream) => stream,
                None => {
                    return Err(LumenError::ReadFailed {
                        addr,
                        source: io::Error::new(io::ErrorKind::NotConnected, "transport closed"),
                    })
                }
            };
            match timeout(remaining, stream.read_buf(&mut self.buffer)).await {
                Err(_) => return Err(LumenError::ReadTimeout { addr }),
                Ok(Err(source)) => {
                    self.state = ConnectionState::Error;
                    return Err(LumenError::ReadFailed { addr, source });
                }
                Ok(Ok(0)) => {
                    self.state = ConnectionState::Error;
                    return Err(LumenError::ReadFailed {
                        addr,
                        source: io::Error::new(io::ErrorKind::UnexpectedEof, "peer closed"),
                    });
                }
                Ok(Ok(_)) => {}
            }
        }
    }

    /// Drains whatever bytes are currently available without blocking.
    /// Returns the empty string when nothing is waiting. Multi-device
    /// fan-out polls with this while the caller's loop keeps the cadence.
    pub fn read_available(&mut self) -> String {
        if let Some(stream) = self.stream.as_ref() {
            let mut chunk = [0u8; 1024];
            loop {
                match stream.try_read(&mut chunk) {
                    Ok(0) => break,
                    Ok(n) => self.buffer.extend_from_slice(&chunk[..n]),
                    Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                    Err(_) => break,
                }
            }
        }
        if self.buffer.is_empty() {
            return String::new();
        }
        let drained = self.buffer.split();
        String::from_utf8_lossy(&drained).into_owned()
    }

    /// Idempotent close. Always succeeds.
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
            info!("connection to {} closed", self.addr);
        }
        self.buffer.clear();
        self.state = ConnectionState::Disconnected;
    }
}
