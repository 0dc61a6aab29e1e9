//! # Lumen Control Library
//!
//! `lumen-control-lib` is a Rust library for discovering and controlling
//! networked luminaires over their telnet-style command protocol. It
//! provides a set of APIs to scan a network for fixtures, query device
//! identity and telemetry, set channel drive levels, drive script
//! playback, and move files to and from a device with checksummed,
//! retried block transfers.
//!
//! This library is designed to be used by command-line tools or other
//! client applications that automate lighting installations.
//!
//! ## Features
//!
//! - Concurrent device discovery across candidate subnets
//! - Per-device control: drive levels, playback, telemetry, file management
//! - Reliable chunked file upload and download with checksum retry
//! - Multi-device command fan-out with non-blocking reply collection
//! - Auxiliary UDP messaging and MQTT power cycling
//!
//! ## Example
//!
//! Here is a simple example of how to discover luminaires and turn the
//! first one dark:
//!
//! ```no_run
//! use lumen_control_lib::util::config::ApiConfig;
//! use lumen_control_lib::util::discovery::Discovery;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ApiConfig::default();
//!     let mut devices = Discovery::discover(&config).await?;
//!
//!     for device in &devices {
//!         println!("Found luminaire: {:?}", device.identifier());
//!     }
//!
//!     if let Some(first) = devices.first_mut() {
//!         let status = first.go_dark().await?;
//!         println!("go dark status: {}", status);
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! ## License
//!
//! This project is dual-licensed under the MIT License and the Apache
//! License, Version 2.0. You may choose to use either license, depending
//! on your project needs.

// The `control_interface` module holds the per-device model: the
// `Luminaire` type, its connection transport and state machine, and the
// session registry used for reconnect-or-reuse semantics.
pub mod control_interface;

// Typed errors for every operation the library performs.
pub mod error;

// The `led` module contains the channel drive-level math: conversions
// between normalized intensities and the device-native encodings of each
// luminaire family.
pub mod led;

// The `util` module provides the protocol codec, network discovery, the
// block file-transfer engine, multi-device fan-out, and the auxiliary
// UDP and MQTT channels.
pub mod util;
