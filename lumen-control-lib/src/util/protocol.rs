//! Reply parsing and outbound command construction for the luminaire
//! line protocol.
//!
//! Every reply a luminaire sends ends in (and does not otherwise contain) a
//! semicolon. The last line carries a decimal status code; everything before
//! it is payload. This one parse rule covers every command the firmware
//! understands.

use crate::led::drive_level::PwmAm;

/// Command accepted and executed.
pub const STATUS_OK: i32 = 0;
/// File read has run past the last block.
pub const STATUS_END_OF_FILE: i32 = 1;
/// The named file does not exist on the luminaire.
pub const STATUS_FILE_NOT_FOUND: i32 = 9;
/// A `WRITE` block arrived with a checksum that did not match its data.
pub const STATUS_CHECKSUM_MISMATCH: i32 = 42;
/// Sentinel for replies whose final line is not a decimal number.
pub const STATUS_UNPARSED: i32 = -1;

/// A parsed command reply: the payload lines plus the trailing status code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandReply {
    pub payload: String,
    pub status: i32,
}

impl CommandReply {
    pub fn is_ok(&self) -> bool {
        self.status == STATUS_OK
    }

    pub fn is_end_of_file(&self) -> bool {
        self.status == STATUS_END_OF_FILE
    }
}

/// Splits a raw reply into payload and status code.
///
/// The final line, with its terminating semicolon stripped, is the status;
/// if it does not parse as a decimal integer the status is
/// [`STATUS_UNPARSED`]. The remaining lines, re-joined, form the payload.
pub fn parse_reply(raw: &str) -> CommandReply {
    let normalized = raw.replace("\r\n", "\n");
    let mut lines: Vec<&str> = normalized.split('\n').collect();
    let status_line = lines.pop().unwrap_or("");
    let status = status_line
        .trim_end_matches(';')
        .trim()
        .parse::<i32>()
        .unwrap_or(STATUS_UNPARSED);
    CommandReply {
        payload: lines.join("\n"),
        status,
    }
}

/// Parses a comma-separated list of hex values, the shape of a `PS?` reply.
pub fn parse_hex_levels(payload: &str) -> Option<Vec<u32>> {
    let trimmed = payload.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed
        .split(',')
        .map(|token| u32::from_str_radix(token.trim(), 16).ok())
        .collect()
}

/// `PS` plus one 16-bit hex value per channel.
pub fn set_levels_standard(raw: &[u16]) -> String {
    let mut command = String::with_capacity(2 + raw.len() * 4);
    command.push_str("PS");
    for value in raw {
        command.push_str(&format!("{:04X}", value));
    }
    command
}

/// `PA` plus one PWM/AM pair per channel.
pub fn set_levels_replicator(pairs: &[PwmAm]) -> String {
    let mut command = String::with_capacity(2 + pairs.len() * 6);
    command.push_str("PA");
    for pair in pairs {
        command.push_str(&format!("{:04X}{:02X}", pair.pwm, pair.am));
    }
    command
}

pub fn set_level_standard(channel: u8, raw: u16) -> String {
    format!("P{:02}{:04X}", channel, raw)
}

pub fn set_level_replicator(channel: u8, pair: PwmAm) -> String {
    format!("PC{:02}{:04X}{:02X}", channel, pair.pwm, pair.am)
}

/// `WRITE` with the block payload hex-encoded, prefixed by the checksum when
/// the transfer runs in reliable mode.
pub fn write_block_command(checksum: Option<u32>, block: &[u8]) -> String {
    let mut command = match checksum {
        Some(sum) => format!("WRITE {:08X}:", sum),
        None => String::from("WRITE "),
    };
    command.push_str(&hex::encode_upper(block));
    command
}

/// `CLOSE,<len>` or `CLOSEPAUSED,<len>`, with the original (unpadded) file
/// length in hex. `CLOSEPAUSED` loads the script without starting it.
pub fn close_command(original_len: usize, pause_after_load: bool) -> String {
    if pause_after_load {
        format!("CLOSEPAUSED,{:08x}", original_len)
    } else {
        format!("CLOSE,{:08x}", original_len)
    }
}
