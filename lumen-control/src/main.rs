use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand, ValueEnum};

use lumen_control_lib::control_interface::registry::DeviceRegistry;
use lumen_control_lib::control_interface::{CliPlaybackAction, Luminaire, LuminaireIdentifier};
use lumen_control_lib::util::config::ApiConfig;
use lumen_control_lib::util::discovery::Discovery;
use lumen_control_lib::util::fanout::{self, FanoutCommand};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    handle_cli(cli).await
}

/// This struct defines the command line interface of the application
#[derive(Parser)]
#[clap(
    name = "lumen_control",
    about = "Controls networked luminaires",
    version = "0.3.0"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

/// Supported output formats for the `discover` command.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub enum OutputFormat {
    /// Plain text format.
    Plaintext,
    /// JSON format.
    Json,
    /// YAML format.
    Yaml,
}

/// Subcommands available for the CLI
#[derive(Subcommand)]
pub enum Commands {
    /// Scan candidate networks for luminaires
    #[clap(name = "discover")]
    Discover {
        /// Output format (plaintext, json, yaml)
        #[clap(short, long, value_enum, default_value_t = OutputFormat::Plaintext)]
        output: OutputFormat,

        /// Restrict the scan to one /24 prefix, e.g. "192.168.1"
        #[clap(short, long)]
        network: Option<String>,

        /// Scan budget per network in milliseconds
        #[clap(short = 't', long = "timeout", default_value_t = 30000)]
        timeout: u64,
    },
    /// Operations against a single luminaire
    #[clap(name = "device-call")]
    DeviceCall {
        /// Sets the IP address of the luminaire
        #[clap(long)]
        ip: Ipv4Addr,

        #[clap(subcommand)]
        action: DeviceAction,
    },
    /// Send one command to several luminaires at once
    #[clap(name = "broadcast")]
    Broadcast {
        /// Target IP addresses
        #[clap(long, required = true, use_value_delimiter = true)]
        ips: Vec<Ipv4Addr>,

        /// The raw command to send, e.g. DARK
        command: String,

        /// Delivery rounds before giving up on silent devices
        #[clap(long, default_value_t = 3)]
        tries: u32,

        /// Reply collection window per round in milliseconds
        #[clap(long, value_parser = parse_duration, default_value = "2000")]
        round_timeout: Duration,
    },
}

/// Actions available under the `device-call` subcommand
#[derive(Subcommand)]
pub enum DeviceAction {
    /// Prints identity and telemetry.
    Info,
    /// Prints normalized drive levels for every channel.
    GetDriveLevels,
    /// Sets every channel to one intensity.
    SetBrightness {
        #[clap(value_parser = parse_intensity)]
        level: f64,
    },
    /// Sets a single channel's intensity.
    SetDriveLevel {
        channel: u8,
        #[clap(value_parser = parse_intensity)]
        level: f64,
    },
    /// Turns every channel off.
    GoDark,
    /// Reboots the luminaire.
    Reset,
    /// Starts script playback.
    Play {
        /// Script filename; omit to restart the current script
        file: Option<String>,
        /// Load the script without starting it
        #[clap(long)]
        paused: bool,
    },
    /// Playback transport controls.
    Playback {
        #[clap(value_enum)]
        action: CliPlaybackAction,
    },
    /// Lists files stored on the luminaire.
    Dir,
    /// Uploads a script file.
    SendFile {
        /// Local file to upload
        input: PathBuf,
        /// Filename to store on the luminaire
        name: String,
        /// Load the script without starting it
        #[clap(long)]
        paused: bool,
    },
    /// Downloads a file from the luminaire.
    ReceiveFile {
        /// Filename on the luminaire
        remote: String,
        /// Local destination path
        output: PathBuf,
    },
    /// Deletes a file from the luminaire.
    Delete { name: String },
}

fn parse_duration(s: &str) -> Result<Duration, &'static str> {
    let millis = s
        .parse::<u64>()
        .map_err(|_| "could not parse duration in milliseconds")?;
    Ok(Duration::from_millis(millis))
}

fn parse_intensity(s: &str) -> Result<f64, String> {
    let value = s
        .parse::<f64>()
        .map_err(|_| format!("'{}' is not a number", s))?;
    if !(0.0..=1.0).contains(&value) {
        return Err(format!("{} is outside 0.0..=1.0", value));
    }
    Ok(value)
}

async fn handle_cli(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Discover {
            output,
            network,
            timeout,
        } => {
            let mut config = ApiConfig::default();
            config.discovery_timeout = Duration::from_millis(timeout);
            if let Some(network) = network {
                config = config.with_network(&network);
            }
            let devices = Discovery::discover(&config).await?;
            let identifiers: Vec<LuminaireIdentifier> =
                devices.iter().map(Luminaire::identifier).collect();
            match output {
                OutputFormat::Plaintext => {
                    Discovery::pretty_print_luminaires(&identifiers);
                }
                OutputFormat::Json => {
                    let json = serde_json::to_string(&identifiers)?;
                    println!("{}", json);
                }
                OutputFormat::Yaml => {
                    let yaml = serde_yaml::to_string(&identifiers)?;
                    println!("{}", yaml);
                }
            }
        }
        Commands::DeviceCall { ip, action } => {
            let mut luminaire = Luminaire::new(ip, ApiConfig::default());
            luminaire.connect().await?;
            let outcome = handle_device_action(&mut luminaire, action).await;
            luminaire.disconnect().await;
            outcome?;
        }
        Commands::Broadcast {
            ips,
            command,
            tries,
            round_timeout,
        } => {
            let registry = DeviceRegistry::new(ApiConfig::default());
            for ip in &ips {
                if let Err(e) = registry.connect(*ip).await {
                    eprintln!("could not connect to {}: {}", ip, e);
                }
            }
            let report = fanout::send_parallel(
                &registry,
                &ips,
                FanoutCommand::Broadcast(command),
                tries,
                round_timeout,
            )
            .await?;
            for (address, reply) in &report.replies {
                let text = reply.replace('\n', " ");
                println!("{}: {}", address, text.trim());
            }
            if !report.pending.is_empty() {
                eprintln!("no reply from: {:?}", report.pending);
            }
            registry.disconnect_all().await;
        }
    }

    Ok(())
}

async fn handle_device_action(luminaire: &mut Luminaire, action: DeviceAction) -> Result<()> {
    match action {
        DeviceAction::Info => {
            let identifier = luminaire.identifier();
            println!("Address:           {}", identifier.address);
            println!("Type:              {}", identifier.luminaire_type);
            println!(
                "Serial number:     {}",
                identifier.serial_number.as_deref().unwrap_or("-")
            );
            println!(
                "Electronic serial: {}",
                identifier.electronic_serial.as_deref().unwrap_or("-")
            );
            println!(
                "Firmware:          {}",
                identifier.firmware_version.as_deref().unwrap_or("-")
            );
            if let Some(mac) = luminaire.get_mac_address().await? {
                println!("MAC address:       {}", mac);
            }
            if let Some(temperature) = luminaire.get_temperature().await? {
                println!("Temperature:       {:.1} C", temperature);
            }
        }
        DeviceAction::GetDriveLevels => {
            let levels = luminaire.get_drive_levels().await?;
            for (channel, level) in levels.iter().enumerate() {
                println!("channel {:02}: {:.4}", channel, level);
            }
        }
        DeviceAction::SetBrightness { level } => {
            let status = luminaire.set_brightness(level).await?;
            report_status("set-brightness", status)?;
        }
        DeviceAction::SetDriveLevel { channel, level } => {
            let status = luminaire.set_drive_level(channel, level).await?;
            report_status("set-drive-level", status)?;
        }
        DeviceAction::GoDark => {
            let status = luminaire.go_dark().await?;
            report_status("go-dark", status)?;
        }
        DeviceAction::Reset => {
            let status = luminaire.reset().await?;
            report_status("reset", status)?;
        }
        DeviceAction::Play { file, paused } => {
            let status = luminaire.play(file.as_deref(), paused).await?;
            report_status("play", status)?;
        }
        DeviceAction::Playback { action } => {
            let status = match action {
                CliPlaybackAction::Pause => luminaire.pause().await?,
                CliPlaybackAction::Resume => luminaire.resume().await?,
                CliPlaybackAction::Stop => luminaire.stop().await?,
                CliPlaybackAction::Next => luminaire.play_next().await?,
                CliPlaybackAction::Previous => luminaire.play_previous().await?,
                CliPlaybackAction::First => luminaire.play_first().await?,
                CliPlaybackAction::Last => luminaire.play_last().await?,
            };
            report_status("playback", status)?;
        }
        DeviceAction::Dir => {
            for file in luminaire.get_directory().await? {
                println!("{}", file);
            }
        }
        DeviceAction::SendFile {
            input,
            name,
            paused,
        } => {
            luminaire.send_file(&input, &name, paused).await?;
            println!("sent {} as '{}'", input.display(), name);
        }
        DeviceAction::ReceiveFile { remote, output } => {
            luminaire.receive_file(&remote, &output).await?;
            println!("received '{}' into {}", remote, output.display());
        }
        DeviceAction::Delete { name } => {
            let status = luminaire.delete_file(&name).await?;
            report_status("delete", status)?;
        }
    }
    Ok(())
}

fn report_status(operation: &str, status: i32) -> Result<()> {
    if status == 0 {
        println!("{}: ok", operation);
        Ok(())
    } else {
        Err(anyhow!("{}: device returned status {}", operation, status))
    }
}
