use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Result alias used throughout the library.
pub type Result<T> = std::result::Result<T, LumenError>;

/// Failures raised by luminaire communication.
///
/// Device-reported non-zero status codes are deliberately *not* represented
/// here. A luminaire answering with an error status has still answered, and
/// whether that status is a problem depends on what the caller was doing
/// (deleting a file that does not exist is often fine). Status codes travel
/// back as data on [`crate::util::protocol::CommandReply`] and
/// `Luminaire::last_status`.
#[derive(Error, Debug)]
pub enum LumenError {
    #[error("connection to {addr} timed out")]
    ConnectTimeout { addr: SocketAddr },

    /// The peer actively refused the connection. Distinguished from other
    /// connect failures because a busy luminaire refuses while it services
    /// another client, which is worth retrying.
    #[error("connection refused by {addr}; device may be busy or not responding")]
    ConnectRefused { addr: SocketAddr },

    #[error("failed to connect to {addr}: {source}")]
    ConnectFailed {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("not connected to luminaire at {addr}")]
    NotConnected { addr: Ipv4Addr },

    #[error("write to {addr} failed: {source}")]
    WriteFailed {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("read from {addr} failed: {source}")]
    ReadFailed {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// No reply terminator arrived inside the read window.
    #[error("timed out reading a reply from {addr}")]
    ReadTimeout { addr: SocketAddr },

    #[error("no reply to '{command}' from {addr}")]
    CommandTimeout { addr: SocketAddr, command: String },

    #[error("command '{command}' failed on {addr}: {reason}")]
    CommandFailed {
        addr: SocketAddr,
        command: String,
        reason: String,
    },

    #[error("discovery timed out after {elapsed:?}")]
    DiscoveryTimeout { elapsed: Duration },

    #[error("device refused to open file '{name}' (status {status})")]
    FileOpenFailed { name: String, status: i32 },

    /// A transfer block failed its integrity check. Recovered internally by
    /// re-requesting the same block; surfaces only through logs unless the
    /// retry budget runs out.
    #[error(
        "block checksum mismatch at offset {offset}: device reported {expected:08X}, computed {computed:08X}"
    )]
    ChecksumMismatch {
        offset: usize,
        expected: u32,
        computed: u32,
    },

    #[error("transfer of '{name}' gave up at offset {offset} after {retries} retries")]
    FileTransferFailed {
        name: String,
        offset: usize,
        retries: u32,
    },

    #[error("cannot read local file {path}: {source}")]
    FileReadFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot write received file to {path}: {source}")]
    FileWriteFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("got {commands} commands for {addresses} addresses")]
    CommandListMismatch { commands: usize, addresses: usize },
}
