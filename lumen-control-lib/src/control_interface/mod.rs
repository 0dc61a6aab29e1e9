use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use clap::ValueEnum;
use derivative::Derivative;
use log::{debug, info, warn};
use serde::Serialize;

use crate::error::{LumenError, Result};
use crate::led::drive_level;
use crate::util::config::ApiConfig;
use crate::util::protocol::{self, CommandReply, STATUS_FILE_NOT_FOUND};
use crate::util::transfer;

pub mod registry;
pub mod transport;

use transport::{ConnectionState, Transport};

/// The `FORMAT` command rebuilds the flash file system and can run for a
/// couple of minutes, so its reply gets an extended window.
const FORMAT_REPLY_TIMEOUT: Duration = Duration::from_secs(400);

/// Total flash capacity of a standard fixture, in 512-byte blocks.
const FLASH_BLOCKS: usize = 2029;

/// The luminaire families this library speaks to.
///
/// Octa and Penta share the modern command dialect; the Light Replicator is
/// a legacy product with single-letter mnemonics and a different channel
/// encoding. `Unknown` devices get the modern dialect, which is what every
/// product after the Light Replicator speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum LuminaireType {
    Octa,
    Penta,
    LightReplicator,
    Unknown,
}

impl LuminaireType {
    pub fn is_light_replicator(&self) -> bool {
        matches!(self, LuminaireType::LightReplicator)
    }

    /// Classifies the reply to the `ID` probe.
    ///
    /// The Light Replicator predates the `ID` command; its firmware answers
    /// with power telemetry instead, so a reply carrying both a millivolt
    /// and a milliamp reading identifies it. Newer fixtures answer with
    /// their model name ahead of the first colon.
    pub fn from_identity_reply(reply: &str) -> LuminaireType {
        if reply.contains("mV") && reply.contains("mA") {
            return LuminaireType::LightReplicator;
        }
        let leading = reply.split(':').next().unwrap_or("").trim();
        if leading.contains("Octa") {
            LuminaireType::Octa
        } else if leading.contains("Penta") {
            LuminaireType::Penta
        } else {
            LuminaireType::Unknown
        }
    }

    fn go_dark_command(&self) -> &'static str {
        if self.is_light_replicator() {
            "B"
        } else {
            "DARK"
        }
    }

    fn pause_command(&self) -> &'static str {
        if self.is_light_replicator() {
            "Q5"
        } else {
            "PAUSE"
        }
    }

    fn resume_command(&self) -> &'static str {
        if self.is_light_replicator() {
            "Q2"
        } else {
            "RESUME"
        }
    }

    fn channel_map_command(&self) -> &'static str {
        if self.is_light_replicator() {
            "MR"
        } else {
            "MAP-GET"
        }
    }

    fn delete_command(&self, filename: &str) -> String {
        if self.is_light_replicator() {
            format!("ERASE {}", filename)
        } else {
            format!("DELETE {}", filename)
        }
    }
}

impl fmt::Display for LuminaireType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LuminaireType::Octa => "Octa",
            LuminaireType::Penta => "Penta",
            LuminaireType::LightReplicator => "LightReplicator",
            LuminaireType::Unknown => "Unknown",
        };
        write!(f, "{}", name)
    }
}

/// Playback transport actions exposed to the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CliPlaybackAction {
    Pause,
    Resume,
    Stop,
    Next,
    Previous,
    First,
    Last,
}

/**
Identity summary of one luminaire.

Equality and hashing consider only the address, type and serial number;
the remaining fields are session-cached telemetry that may be absent or
change between connects while the device stays the same.
*/
#[derive(Derivative)]
#[derivative(Hash, PartialEq, Eq)]
#[derive(Debug, Clone, Serialize)]
pub struct LuminaireIdentifier {
    pub address: Ipv4Addr,
    pub luminaire_type: LuminaireType,
    pub serial_number: Option<String>,

    #[derivative(Hash = "ignore", PartialEq = "ignore")]
    pub electronic_serial: Option<String>,
    #[derivative(Hash = "ignore", PartialEq = "ignore")]
    pub firmware_version: Option<String>,
    #[derivative(Hash = "ignore", PartialEq = "ignore")]
    pub mac_address: Option<String>,
}

/// One luminaire and its session state.
///
/// A `Luminaire` owns its [`Transport`] exclusively; commands are strictly
/// sequential, the reply to one command is read before the next is sent.
#[derive(Debug)]
pub struct Luminaire {
    address: Ipv4Addr,
    config: ApiConfig,
    transport: Option<Transport>,
    state: ConnectionState,
    luminaire_type: LuminaireType,
    firmware_version: Option<String>,
    electronic_serial: Option<String>,
    serial_number: Option<String>,
    mac_address: Option<String>,
    last_status: i32,
}

impl Luminaire {
    pub fn new(address: Ipv4Addr, config: ApiConfig) -> Self {
        Luminaire {
            address,
            config,
            transport: None,
            state: ConnectionState::Disconnected,
            luminaire_type: LuminaireType::Unknown,
            firmware_version: None,
            electronic_serial: None,
            serial_number: None,
            mac_address: None,
            last_status: 0,
        }
    }

    /// Wraps a transport that discovery has already opened and verified.
    pub(crate) fn from_transport(
        address: Ipv4Addr,
        config: ApiConfig,
        transport: Transport,
    ) -> Self {
        let mut luminaire = Luminaire::new(address, config);
        luminaire.transport = Some(transport);
        luminaire.state = ConnectionState::Connected;
        luminaire
    }

    pub fn address(&self) -> Ipv4Addr {
        self.address
    }

    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    pub fn luminaire_type(&self) -> LuminaireType {
        self.luminaire_type
    }

    pub fn firmware_version(&self) -> Option<&str> {
        self.firmware_version.as_deref()
    }

    pub fn electronic_serial(&self) -> Option<&str> {
        self.electronic_serial.as_deref()
    }

    pub fn serial_number(&self) -> Option<&str> {
        self.serial_number.as_deref()
    }

    pub fn mac_address(&self) -> Option<&str> {
        self.mac_address.as_deref()
    }

    /// Status code of the most recent command; 0 is success.
    pub fn last_status(&self) -> i32 {
        self.last_status
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
            && self
                .transport
                .as_ref()
                .map_or(false, Transport::is_connected)
    }

    pub fn identifier(&self) -> LuminaireIdentifier {
        LuminaireIdentifier {
            address: self.address,
            luminaire_type: self.luminaire_type,
            serial_number: self.serial_number.clone(),
            electronic_serial: self.electronic_serial.clone(),
            firmware_version: self.firmware_version.clone(),
            mac_address: self.mac_address.clone(),
        }
    }

    fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(self.address), self.config.command_port)
    }

    pub(crate) fn transport_mut(&mut self) -> Option<&mut Transport> {
        self.transport.as_mut().filter(|t| t.is_connected())
    }

    /// Connects and runs identity initialization.
    ///
    /// A no-op when already connected. Identity queries tolerate partial
    /// failure; a device that refuses its version query still connects,
    /// the field just stays unset.
    pub async fn connect(&mut self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }
        self.state = ConnectionState::Connecting;
        match Transport::connect(self.socket_addr(), self.config.connect_timeout).await {
            Ok(transport) => {
                self.transport = Some(transport);
                self.state = ConnectionState::Connected;
            }
            Err(e) => {
                self.state = ConnectionState::Error;
                return Err(e);
            }
        }
        self.initialize_device_info().await;
        info!(
            "connected to luminaire at {} ({})",
            self.address, self.luminaire_type
        );
        Ok(())
    }

    pub async fn disconnect(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.close().await;
        }
        self.state = ConnectionState::Disconnected;
        info!("disconnected from {}", self.address);
    }

    /// Fixed-order identity bootstrap: firmware version, electronic serial,
    /// type probe, serial number.
    pub(crate) async fn initialize_device_info(&mut self) {
        match self.query_flat("VER").await {
            Ok(version) => self.firmware_version = Some(version),
            Err(e) => warn!("{}: firmware version query failed: {}", self.address, e),
        }
        match self.query_flat("NS").await {
            Ok(serial) => self.electronic_serial = Some(serial),
            Err(e) => warn!("{}: electronic serial query failed: {}", self.address, e),
        }
        self.luminaire_type = match self.send_command("ID").await {
            Ok(reply) => LuminaireType::from_identity_reply(&reply.payload),
            Err(e) => {
                warn!("{}: type probe failed: {}", self.address, e);
                LuminaireType::Unknown
            }
        };
        match self.fetch_serial_number().await {
            Ok(serial) => self.serial_number = Some(serial),
            Err(e) => warn!("{}: serial number query failed: {}", self.address, e),
        }
    }

    async fn fetch_serial_number(&mut self) -> Result<String> {
        // The Light Replicator has no separate luminaire serial; its
        // electronic serial stands in.
        if self.luminaire_type.is_light_replicator() {
            if let Some(serial) = self.electronic_serial.clone() {
                return Ok(serial);
            }
            return self.query_flat("NS").await;
        }
        self.query_flat("GETSERNO").await
    }

    /// Sends one command and parses the reply. Non-zero status codes are
    /// returned as data, not errors; callers that care inspect
    /// [`CommandReply::status`].
    pub async fn send_command(&mut self, command: &str) -> Result<CommandReply> {
        let command_timeout = self.config.command_timeout;
        self.send_command_with_timeout(command, command_timeout).await
    }

    pub async fn send_command_with_timeout(
        &mut self,
        command: &str,
        reply_timeout: Duration,
    ) -> Result<CommandReply> {
        let addr = self.socket_addr();
        let transport = self
            .transport
            .as_mut()
            .filter(|t| t.is_connected())
            .ok_or(LumenError::NotConnected { addr: self.address })?;
        transport.send_raw(command).await?;
        let raw = match transport.read_until_terminator(reply_timeout).await {
            Ok(raw) => raw,
            Err(LumenError::ReadTimeout { .. }) => {
                return Err(LumenError::CommandTimeout {
                    addr,
                    command: command.to_string(),
                })
            }
            Err(e) => return Err(e),
        };
        let reply = protocol::parse_reply(&raw);
        self.last_status = reply.status;
        debug!("{} '{}' -> status {}", self.address, command, reply.status);
        Ok(reply)
    }

    /// Sends a command and returns its payload with line breaks removed,
    /// the shape most single-value queries come back in.
    async fn query_flat(&mut self, command: &str) -> Result<String> {
        let reply = self.send_command(command).await?;
        Ok(reply.payload.replace('\n', "").trim().to_string())
    }

    fn command_failed(&self, command: &str, reason: impl Into<String>) -> LumenError {
        LumenError::CommandFailed {
            addr: self.socket_addr(),
            command: command.to_string(),
            reason: reason.into(),
        }
    }

    // ------------------------------------------------------------------
    // Telemetry
    // ------------------------------------------------------------------

    /// Luminaire temperature in Celsius. Not supported on the Light
    /// Replicator, where this returns `None` without touching the wire.
    pub async fn get_temperature(&mut self) -> Result<Option<f64>> {
        if self.luminaire_type.is_light_replicator() {
            warn!("temperature not supported on the Light Replicator");
            return Ok(None);
        }
        let reply = self.send_command("TEMPC").await?;
        Ok(value_after_label(&reply.payload, "Temp(C):").and_then(|s| s.parse::<f64>().ok()))
    }

    /// MAC address, taken from the trailing token of the `GETIP` reply and
    /// cached for the session.
    pub async fn get_mac_address(&mut self) -> Result<Option<String>> {
        let reply = self.send_command("GETIP").await?;
        let mac = reply
            .payload
            .split_whitespace()
            .last()
            .map(|token| token.to_string());
        if let Some(ref mac) = mac {
            self.mac_address = Some(mac.clone());
        }
        Ok(mac)
    }

    pub async fn get_uptime(&mut self) -> Result<Option<String>> {
        if self.luminaire_type.is_light_replicator() {
            return Ok(None);
        }
        self.query_flat("UPTIME").await.map(Some)
    }

    pub async fn get_chipset(&mut self) -> Result<Option<String>> {
        if self.luminaire_type.is_light_replicator() {
            return Ok(None);
        }
        self.query_flat("IYAM").await.map(Some)
    }

    pub async fn get_channel_map(&mut self) -> Result<String> {
        let command = self.luminaire_type.channel_map_command();
        let flat = self.query_flat(command).await?;
        Ok(value_after_label(&flat, "Channel map:").unwrap_or(flat))
    }

    // ------------------------------------------------------------------
    // Drive levels
    // ------------------------------------------------------------------

    /// Raw channel values as the device reports them (`PS?`).
    pub async fn get_drive_levels_raw(&mut self) -> Result<Vec<u32>> {
        let reply = self.send_command("PS?").await?;
        let flat = reply.payload.replace('\n', "");
        protocol::parse_hex_levels(&flat)
            .ok_or_else(|| self.command_failed("PS?", "malformed drive-level reply"))
    }

    /// Normalized per-channel intensities in `[0, 1]`.
    pub async fn get_drive_levels(&mut self) -> Result<Vec<f64>> {
        let raw = self.get_drive_levels_raw().await?;
        Ok(if self.luminaire_type.is_light_replicator() {
            drive_level::decode_replicator_levels(&raw)
        } else {
            drive_level::decode_standard_levels(&raw)
        })
    }

    /// Sets every channel from a vector of fractional intensities. Returns
    /// the device status code.
    pub async fn set_drive_levels(&mut self, levels: &[f64]) -> Result<i32> {
        let command = if self.luminaire_type.is_light_replicator() {
            protocol::set_levels_replicator(&drive_level::encode_replicator_levels(levels))
        } else {
            protocol::set_levels_standard(&drive_level::encode_standard_levels(levels))
        };
        let reply = self.send_command(&command).await?;
        Ok(reply.status)
    }

    /// Sets one channel's fractional intensity. Returns the device status.
    pub async fn set_drive_level(&mut self, channel: u8, level: f64) -> Result<i32> {
        let command = if self.luminaire_type.is_light_replicator() {
            protocol::set_level_replicator(channel, drive_level::pwm_am_from_intensity(level))
        } else {
            protocol::set_level_standard(channel, drive_level::raw_from_intensity(level))
        };
        let reply = self.send_command(&command).await?;
        Ok(reply.status)
    }

    /// Sets every channel to one intensity. The channel count comes from the
    /// device's own level report, falling back to the family default when
    /// the report is unavailable.
    pub async fn set_brightness(&mut self, brightness: f64) -> Result<i32> {
        let count = match self.get_drive_levels().await {
            Ok(levels) if !levels.is_empty() => levels.len(),
            _ => {
                if self.luminaire_type.is_light_replicator() {
                    32
                } else {
                    24
                }
            }
        };
        self.set_drive_levels(&vec![brightness; count]).await
    }

    // ------------------------------------------------------------------
    // Lighting and playback
    // ------------------------------------------------------------------

    /// Turns every channel off.
    pub async fn go_dark(&mut self) -> Result<i32> {
        let command = self.luminaire_type.go_dark_command();
        let reply = self.send_command(command).await?;
        Ok(reply.status)
    }

    /// Reboots the luminaire.
    pub async fn reset(&mut self) -> Result<i32> {
        let reply = self.send_command("RESET").await?;
        Ok(reply.status)
    }

    /// Starts script playback. With no filename the standard fixtures
    /// restart the current script; `pause_first` loads the script without
    /// starting it (standard dialect only).
    pub async fn play(&mut self, filename: Option<&str>, pause_first: bool) -> Result<i32> {
        let command = if self.luminaire_type.is_light_replicator() {
            format!("SETPAT={}", filename.unwrap_or(""))
        } else {
            match (filename, pause_first) {
                (None, _) => "PLAY".to_string(),
                (Some(name), true) => format!("PLAYPAUSED {}", name),
                (Some(name), false) => format!("PLAY {}", name),
            }
        };
        let reply = self.send_command(&command).await?;
        Ok(reply.status)
    }

    pub async fn pause(&mut self) -> Result<i32> {
        let command = self.luminaire_type.pause_command();
        let reply = self.send_command(command).await?;
        Ok(reply.status)
    }

    pub async fn resume(&mut self) -> Result<i32> {
        let command = self.luminaire_type.resume_command();
        let reply = self.send_command(command).await?;
        Ok(reply.status)
    }

    /// Stops playback. The Light Replicator has no single stop command, so
    /// it gets the stop-playback/go-dark sequence to match the standard
    /// fixtures' behavior.
    pub async fn stop(&mut self) -> Result<i32> {
        if self.luminaire_type.is_light_replicator() {
            self.send_command("Q8").await?;
            self.go_dark().await
        } else {
            let reply = self.send_command("STOP").await?;
            Ok(reply.status)
        }
    }

    pub async fn play_next(&mut self) -> Result<i32> {
        if self.luminaire_type.is_light_replicator() {
            let reply = self.send_command("+").await?;
            return Ok(reply.status);
        }
        self.send_command("SYNC").await?;
        let reply = self.send_command("NEXT").await?;
        Ok(reply.status)
    }

    pub async fn play_previous(&mut self) -> Result<i32> {
        if self.luminaire_type.is_light_replicator() {
            let reply = self.send_command("-").await?;
            return Ok(reply.status);
        }
        self.send_command("SYNC").await?;
        let reply = self.send_command("PREV").await?;
        Ok(reply.status)
    }

    /// Plays the first script. The Light Replicator can only reach its
    /// built-in script through a reset, not by name.
    pub async fn play_first(&mut self) -> Result<i32> {
        if self.luminaire_type.is_light_replicator() {
            return self.reset().await;
        }
        self.send_command("SYNC").await?;
        let reply = self.send_command("FIRST").await?;
        Ok(reply.status)
    }

    pub async fn play_last(&mut self) -> Result<i32> {
        if self.luminaire_type.is_light_replicator() {
            let directory = self.get_directory().await?;
            let last = directory
                .last()
                .cloned()
                .ok_or_else(|| self.command_failed("SETPAT", "no scripts on device"))?;
            return self.play(Some(&last), false).await;
        }
        self.send_command("SYNC").await?;
        let reply = self.send_command("LAST").await?;
        Ok(reply.status)
    }

    /// Name of the script currently playing (standard dialect only).
    pub async fn get_current_script(&mut self) -> Result<Option<String>> {
        if self.luminaire_type.is_light_replicator() {
            return Ok(None);
        }
        self.send_command("SYNC").await?;
        self.query_flat("CURRENT").await.map(Some)
    }

    // ------------------------------------------------------------------
    // File management
    // ------------------------------------------------------------------

    /// Lists the files stored on the luminaire.
    pub async fn get_directory(&mut self) -> Result<Vec<String>> {
        let reply = self.send_command("DIR").await?;
        Ok(parse_directory(&reply.payload, self.luminaire_type))
    }

    /// Flash blocks in use, parsed from the `DIR` footer.
    pub async fn get_used_blocks(&mut self) -> Result<usize> {
        let reply = self.send_command("DIR").await?;
        reply
            .payload
            .lines()
            .rev()
            .nth(1)
            .and_then(|line| line.split_whitespace().next())
            .and_then(|token| token.parse::<usize>().ok())
            .ok_or_else(|| self.command_failed("DIR", "malformed directory footer"))
    }

    pub async fn get_free_blocks(&mut self) -> Result<usize> {
        let used = self.get_used_blocks().await?;
        Ok(FLASH_BLOCKS.saturating_sub(used))
    }

    /// Device-computed checksum of a stored file, used to confirm firmware
    /// uploads before activation. Standard dialect only.
    pub async fn get_file_lrc(&mut self, filename: &str) -> Result<Option<u32>> {
        if self.luminaire_type.is_light_replicator() {
            return Ok(None);
        }
        let reply = self.send_command(&format!("LRC {}", filename)).await?;
        let flat = reply.payload.replace('\n', "");
        Ok(value_after_label(&flat, "LRC:").and_then(|s| {
            let digits: String = s.chars().take_while(|c| c.is_ascii_hexdigit()).collect();
            u32::from_str_radix(&digits, 16).ok()
        }))
    }

    /// Deletes a file. The Light Replicator reports a missing file as
    /// status 1, which is normalized to the standard dialect's 9 so callers
    /// see one file-not-found code.
    pub async fn delete_file(&mut self, filename: &str) -> Result<i32> {
        let command = self.luminaire_type.delete_command(filename);
        let reply = self.send_command(&command).await?;
        let mut status = reply.status;
        if self.luminaire_type.is_light_replicator() && status == 1 {
            status = STATUS_FILE_NOT_FOUND;
            self.last_status = status;
        }
        Ok(status)
    }

    /// Non-reversible flash format. Takes minutes on real hardware.
    pub async fn format_filesystem(&mut self) -> Result<i32> {
        let reply = self
            .send_command_with_timeout("FORMAT", FORMAT_REPLY_TIMEOUT)
            .await?;
        Ok(reply.status)
    }

    /// Uploads a local file, choosing the transfer dialect by device type.
    /// `pause_after_load` leaves the script loaded but not started; the
    /// Light Replicator supports neither that nor checksummed blocks.
    pub async fn send_file(
        &mut self,
        local: &Path,
        remote_name: &str,
        pause_after_load: bool,
    ) -> Result<()> {
        let data = tokio::fs::read(local)
            .await
            .map_err(|source| LumenError::FileReadFailed {
                path: local.to_path_buf(),
                source,
            })?;
        let reliable = !self.luminaire_type.is_light_replicator();
        let pause = pause_after_load && reliable;
        transfer::send_file_blocks(self, &data, remote_name, reliable, pause).await
    }

    /// Downloads a file from the luminaire into `destination`.
    pub async fn receive_file(&mut self, remote_name: &str, destination: &Path) -> Result<()> {
        if self.luminaire_type.is_light_replicator() {
            transfer::receive_file_legacy(self, remote_name, destination).await
        } else {
            transfer::receive_file_chunked(self, remote_name, destination).await
        }
    }

    // ------------------------------------------------------------------
    // Streaming (standard dialect only)
    // ------------------------------------------------------------------

    pub async fn get_stream_info(&mut self) -> Result<Option<String>> {
        if self.luminaire_type.is_light_replicator() {
            return Ok(None);
        }
        let reply = self.send_command("STREAM-INFO").await?;
        Ok(Some(reply.payload))
    }

    /// Stream channel the device is tuned to; 0 means streaming is off.
    pub async fn get_stream_channel(&mut self) -> Result<u16> {
        let info = match self.get_stream_info().await? {
            Some(info) => info,
            None => return Ok(0),
        };
        Ok(info
            .lines()
            .find_map(|line| {
                line.strip_prefix("Program stream:")
                    .and_then(|rest| rest.trim().split_whitespace().next())
                    .and_then(|token| token.parse::<u16>().ok())
            })
            .unwrap_or(0))
    }

    pub async fn stream_join(&mut self, channel: u8) -> Result<i32> {
        if self.luminaire_type.is_light_replicator() {
            return Err(self.command_failed("STREAM-JOIN", "not supported on the Light Replicator"));
        }
        if channel == 0 {
            return Err(self.command_failed("STREAM-JOIN", "channel must be 1-255"));
        }
        let reply = self
            .send_command(&format!("STREAM-JOIN {}", channel))
            .await?;
        Ok(reply.status)
    }

    pub async fn stream_quit(&mut self) -> Result<i32> {
        if self.luminaire_type.is_light_replicator() {
            return Err(self.command_failed("STREAM-QUIT", "not supported on the Light Replicator"));
        }
        let reply = self.send_command("STREAM-QUIT").await?;
        Ok(reply.status)
    }

    pub async fn stream_leader(&mut self, leader: bool) -> Result<i32> {
        if self.luminaire_type.is_light_replicator() {
            return Err(
                self.command_failed("STREAM-LEADER", "not supported on the Light Replicator")
            );
        }
        let command = if leader {
            "STREAM-LEADER TRUE"
        } else {
            "STREAM-LEADER FALSE"
        };
        let reply = self.send_command(command).await?;
        Ok(reply.status)
    }
}

/// Asks a luminaire to drop whatever session it is currently serving, via
/// the out-of-band disconnect port. Useful when another client crashed
/// without closing and the device still considers itself busy.
pub async fn request_session_release(address: Ipv4Addr, config: &ApiConfig) -> Result<()> {
    let addr = SocketAddr::new(IpAddr::V4(address), config.disconnect_port);
    let mut transport = Transport::connect(addr, config.connect_timeout).await?;
    transport.close().await;
    Ok(())
}

/// Extracts the text following `label` from a reply payload, tolerating the
/// firmware's habit of splitting values across lines.
fn value_after_label(payload: &str, label: &str) -> Option<String> {
    let flat = payload.replace('\n', "");
    flat.find(label)
        .map(|pos| flat[pos + label.len()..].trim().to_string())
}

/// Splits a `DIR` payload into filenames.
///
/// Standard fixtures answer with a header line, one file per line, and a
/// three-line footer (blank line, blocks used, blocks free). The Light
/// Replicator terminates each filename with a backtick and appends its own
/// bookkeeping after it.
pub fn parse_directory(payload: &str, luminaire_type: LuminaireType) -> Vec<String> {
    if luminaire_type.is_light_replicator() {
        payload
            .lines()
            .filter_map(|line| {
                line.find('`')
                    .filter(|&idx| idx > 0)
                    .map(|idx| line[..idx].to_string())
            })
            .collect()
    } else {
        let lines: Vec<&str> = payload.lines().collect();
        if lines.len() <= 4 {
            return Vec::new();
        }
        lines[1..lines.len() - 3]
            .iter()
            .map(|line| line.trim_end().to_string())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn power_telemetry_identifies_light_replicator() {
        let reply = "Supply: 12000mV 350mA";
        assert_eq!(
            LuminaireType::from_identity_reply(reply),
            LuminaireType::LightReplicator
        );
    }

    #[test]
    fn model_name_identifies_standard_fixtures() {
        assert_eq!(
            LuminaireType::from_identity_reply("Octa: ready"),
            LuminaireType::Octa
        );
        assert_eq!(
            LuminaireType::from_identity_reply("Penta: 24 channels"),
            LuminaireType::Penta
        );
        assert_eq!(
            LuminaireType::from_identity_reply("Gizmo: hello"),
            LuminaireType::Unknown
        );
    }

    #[test]
    fn millivolts_alone_are_not_a_replicator() {
        // Both telemetry markers are required; a model string mentioning one
        // unit must not flip classification.
        assert_eq!(
            LuminaireType::from_identity_reply("Octa: 12mV rail"),
            LuminaireType::Octa
        );
    }

    #[test]
    fn dialect_table_go_dark() {
        assert_eq!(LuminaireType::Octa.go_dark_command(), "DARK");
        assert_eq!(LuminaireType::LightReplicator.go_dark_command(), "B");
    }

    #[test]
    fn dialect_table_playback() {
        assert_eq!(LuminaireType::Penta.pause_command(), "PAUSE");
        assert_eq!(LuminaireType::LightReplicator.pause_command(), "Q5");
        assert_eq!(LuminaireType::Penta.resume_command(), "RESUME");
        assert_eq!(LuminaireType::LightReplicator.resume_command(), "Q2");
    }

    #[test]
    fn dialect_table_files() {
        assert_eq!(LuminaireType::Octa.delete_command("a.lsf"), "DELETE a.lsf");
        assert_eq!(
            LuminaireType::LightReplicator.delete_command("a.lsf"),
            "ERASE a.lsf"
        );
        assert_eq!(LuminaireType::Octa.channel_map_command(), "MAP-GET");
        assert_eq!(LuminaireType::LightReplicator.channel_map_command(), "MR");
    }

    #[test]
    fn standard_directory_drops_header_and_footer() {
        let payload =
            "Directory of /\nsunrise.lsf\nsunset.lsf\n\n12 blocks used\n2017 blocks free";
        let files = parse_directory(payload, LuminaireType::Octa);
        assert_eq!(files, vec!["sunrise.lsf", "sunset.lsf"]);
    }

    #[test]
    fn short_standard_directory_is_empty() {
        assert!(parse_directory("header\nfooter", LuminaireType::Octa).is_empty());
    }

    #[test]
    fn replicator_directory_stops_at_backtick() {
        let payload = "alpha.pat`1024\nbeta.pat`2048\nno-marker-line";
        let files = parse_directory(payload, LuminaireType::LightReplicator);
        assert_eq!(files, vec!["alpha.pat", "beta.pat"]);
    }

    #[test]
    fn label_extraction() {
        assert_eq!(
            value_after_label("Temp(C): 41.5", "Temp(C):").as_deref(),
            Some("41.5")
        );
        assert_eq!(value_after_label("nothing here", "Temp(C):"), None);
    }
}
