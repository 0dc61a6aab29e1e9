//! Block-oriented file transfer over the command channel.
//!
//! Files move in 512-byte blocks, hex-encoded into ordinary commands. The
//! standard fixtures guard every block with a 32-bit XOR checksum and let
//! the client re-request or re-send a corrupted block; the Light Replicator
//! predates the checksum and just streams.

use std::path::Path;

use log::{info, warn};
use tokio::io::AsyncWriteExt;

use crate::control_interface::Luminaire;
use crate::error::{LumenError, Result};
use crate::util::protocol::{self, STATUS_CHECKSUM_MISMATCH};

/// All file I/O on the device happens in multiples of this.
pub const BLOCK_SIZE: usize = 512;

/// Consecutive per-block retries before a transfer is abandoned.
pub const MAX_FILE_RETRIES: u32 = 10;

/// XOR-32 checksum as the luminaire firmware computes it.
///
/// The buffer is treated as zero-padded to a multiple of 512 bytes and
/// folded four bytes at a time, each word assembled as
/// `b[i+3]<<24 | b[i+2]<<16 | b[i+1]<<8 | b[i]`. This byte order is fixed
/// wire format; the device computes the same sum on its end. Zero words
/// XOR to nothing, so folding the unpadded tail against a zeroed word is
/// identical to materializing the padding.
pub fn xor32(data: &[u8]) -> u32 {
    let mut sum = 0u32;
    let mut words = data.chunks_exact(4);
    for word in &mut words {
        sum ^= u32::from_le_bytes([word[0], word[1], word[2], word[3]]);
    }
    let rest = words.remainder();
    if !rest.is_empty() {
        let mut tail = [0u8; 4];
        tail[..rest.len()].copy_from_slice(rest);
        sum ^= u32::from_le_bytes(tail);
    }
    sum
}

fn pad_block(block: &[u8]) -> Vec<u8> {
    let mut padded = block.to_vec();
    padded.resize(BLOCK_SIZE, 0);
    padded
}

/// One decoded `READAT` reply.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct BlockReply {
    pub data: Vec<u8>,
    pub checksum: u32,
}

/// Splits a `READAT` payload into data bytes and the device checksum.
///
/// The payload is whitespace-separated hex words plus one token of the
/// shape `<label>:<hex32>` carrying the checksum. Tokens that decode as
/// neither are ignored.
pub(crate) fn parse_block_reply(payload: &str) -> Option<BlockReply> {
    let mut data = Vec::new();
    let mut checksum = None;
    for token in payload.split_whitespace() {
        if let Some(idx) = token.rfind(':') {
            checksum = u32::from_str_radix(&token[idx + 1..], 16).ok();
        } else if let Ok(bytes) = hex::decode(token) {
            data.extend_from_slice(&bytes);
        }
    }
    Some(BlockReply {
        data,
        checksum: checksum?,
    })
}

/// Downloads a file using the `OPEN`/`READAT` dialect of the standard
/// fixtures. A block whose checksum does not match is re-requested at the
/// same offset; only a clean block advances the cursor.
pub async fn receive_file_chunked(
    luminaire: &mut Luminaire,
    remote_name: &str,
    destination: &Path,
) -> Result<()> {
    let open = luminaire
        .send_command(&format!("OPEN {}", remote_name))
        .await?;
    if !open.is_ok() {
        return Err(LumenError::FileOpenFailed {
            name: remote_name.to_string(),
            status: open.status,
        });
    }

    let max_retries = luminaire.config().max_file_retries;
    let mut contents: Vec<u8> = Vec::new();
    let mut offset = 0usize;
    let mut retries = 0u32;
    loop {
        let reply = luminaire
            .send_command(&format!("READAT {}", offset))
            .await?;
        if reply.is_end_of_file() {
            break;
        }
        if !reply.is_ok() {
            // Anything other than success or end-of-file means the read
            // position is gone; retrying the offset cannot help.
            return Err(LumenError::FileTransferFailed {
                name: remote_name.to_string(),
                offset,
                retries,
            });
        }
        let block = match parse_block_reply(&reply.payload) {
            Some(block) => block,
            None => {
                return Err(LumenError::FileTransferFailed {
                    name: remote_name.to_string(),
                    offset,
                    retries,
                })
            }
        };
        let computed = xor32(&block.data);
        if computed != block.checksum {
            retries += 1;
            warn!(
                "{}",
                LumenError::ChecksumMismatch {
                    offset,
                    expected: block.checksum,
                    computed,
                }
            );
            if retries >= max_retries {
                return Err(LumenError::FileTransferFailed {
                    name: remote_name.to_string(),
                    offset,
                    retries,
                });
            }
            continue;
        }
        retries = 0;
        contents.extend_from_slice(&block.data);
        offset += BLOCK_SIZE;
    }

    persist(destination, &contents).await?;
    info!(
        "received {} bytes of '{}' from {}",
        contents.len(),
        remote_name,
        luminaire.address()
    );
    Ok(())
}

/// Downloads a file from a Light Replicator, which keeps its own read
/// cursor and has no checksums: `OPEN`, then `READ` until the status stops
/// signalling success. Payload lines look like `<label>:<hexdata>`.
pub async fn receive_file_legacy(
    luminaire: &mut Luminaire,
    remote_name: &str,
    destination: &Path,
) -> Result<()> {
    let open = luminaire
        .send_command(&format!("OPEN {}", remote_name))
        .await?;
    if !open.is_ok() {
        return Err(LumenError::FileOpenFailed {
            name: remote_name.to_string(),
            status: open.status,
        });
    }

    let mut contents: Vec<u8> = Vec::new();
    loop {
        let reply = luminaire.send_command("READ").await?;
        if !reply.is_ok() {
            break;
        }
        for line in reply.payload.lines() {
            let line = line.trim_end();
            if let Some(pos) = line.find(':').filter(|&p| p > 0) {
                let hex_part: String = line[pos + 1..]
                    .chars()
                    .filter(|c| !c.is_whitespace())
                    .collect();
                if let Ok(bytes) = hex::decode(&hex_part) {
                    contents.extend_from_slice(&bytes);
                }
            }
        }
    }

    persist(destination, &contents).await?;
    info!(
        "received {} bytes of '{}' from {}",
        contents.len(),
        remote_name,
        luminaire.address()
    );
    Ok(())
}

/// Uploads `data` as `remote_name` using `CREATE`/`WRITE`/`CLOSE`.
///
/// In reliable mode every block carries its checksum and is re-sent while
/// the device answers with the checksum-mismatch status. `pause_after_load`
/// closes with `CLOSEPAUSED` so the script is loaded but not started.
pub async fn send_file_blocks(
    luminaire: &mut Luminaire,
    data: &[u8],
    remote_name: &str,
    reliable: bool,
    pause_after_load: bool,
) -> Result<()> {
    if data.is_empty() {
        return Err(LumenError::CommandFailed {
            addr: std::net::SocketAddr::new(
                std::net::IpAddr::V4(luminaire.address()),
                luminaire.config().command_port,
            ),
            command: format!("CREATE {}", remote_name),
            reason: "refusing to upload an empty file".to_string(),
        });
    }

    let create = luminaire
        .send_command(&format!("CREATE {}", remote_name))
        .await?;
    if !create.is_ok() {
        return Err(LumenError::FileOpenFailed {
            name: remote_name.to_string(),
            status: create.status,
        });
    }

    let max_retries = luminaire.config().max_file_retries;
    for (index, block) in data.chunks(BLOCK_SIZE).enumerate() {
        let padded = pad_block(block);
        let checksum = if reliable { Some(xor32(&padded)) } else { None };
        let command = protocol::write_block_command(checksum, &padded);
        let mut attempts = 0u32;
        loop {
            let reply = luminaire.send_command(&command).await?;
            if reply.status == STATUS_CHECKSUM_MISMATCH {
                attempts += 1;
                warn!(
                    "block {} of '{}' rejected with checksum mismatch, retry {}/{}",
                    index, remote_name, attempts, max_retries
                );
                if attempts >= max_retries {
                    return Err(LumenError::FileTransferFailed {
                        name: remote_name.to_string(),
                        offset: index * BLOCK_SIZE,
                        retries: attempts,
                    });
                }
                continue;
            }
            break;
        }
    }

    luminaire
        .send_command(&protocol::close_command(data.len(), pause_after_load))
        .await?;
    info!(
        "sent {} bytes to '{}' on {}",
        data.len(),
        remote_name,
        luminaire.address()
    );
    Ok(())
}

/// Writes the received bytes next to the destination and renames into
/// place, so a failed download never leaves a truncated file behind.
async fn persist(destination: &Path, contents: &[u8]) -> Result<()> {
    let dir = destination
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let stem = destination
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("download");
    let temp = dir.join(format!(".{}.part", stem));

    let outcome: std::io::Result<()> = async {
        let mut file = tokio::fs::File::create(&temp).await?;
        file.write_all(contents).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&temp, destination).await?;
        Ok(())
    }
    .await;

    outcome.map_err(|source| LumenError::FileWriteFailed {
        path: destination.to_path_buf(),
        source,
    })
}
