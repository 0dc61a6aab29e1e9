//! End-to-end tests against a scripted TCP luminaire.
//!
//! The simulator speaks the wire framing for real: commands come in
//! terminated by a carriage return, replies go out terminated by a
//! semicolon with a trailing status line. Everything runs on loopback
//! addresses, which is also enough to exercise discovery since the whole
//! 127.0.0.0/8 block routes locally.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use lumen_control_lib::control_interface::registry::DeviceRegistry;
use lumen_control_lib::control_interface::{Luminaire, LuminaireType};
use lumen_control_lib::error::LumenError;
use lumen_control_lib::util::config::ApiConfig;
use lumen_control_lib::util::discovery::Discovery;
use lumen_control_lib::util::fanout::{self, FanoutCommand};
use lumen_control_lib::util::transfer;
use lumen_control_lib::util::udp::UdpMessenger;

type Responder = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Binds a listener on `bind_ip` and serves the responder on every
/// connection until the test ends.
async fn spawn_device(bind_ip: &str, responder: Responder) -> SocketAddr {
    let listener = TcpListener::bind((bind_ip, 0)).await.expect("bind listener");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        loop {
            let (stream, _) = match listener.accept().await {
                Ok(pair) => pair,
                Err(_) => return,
            };
            tokio::spawn(serve(stream, Arc::clone(&responder)));
        }
    });
    addr
}

async fn serve(mut stream: TcpStream, responder: Responder) {
    let mut buffer: Vec<u8> = Vec::new();
    let mut chunk = [0u8; 256];
    loop {
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                while let Some(pos) = buffer.iter().position(|&b| b == b'\r') {
                    let line: Vec<u8> = buffer.drain(..=pos).collect();
                    let command = String::from_utf8_lossy(&line[..line.len() - 1])
                        .trim()
                        .to_string();
                    if let Some(reply) = responder(&command) {
                        if stream.write_all(reply.as_bytes()).await.is_err() {
                            return;
                        }
                    }
                }
            }
        }
    }
}

fn test_config(port: u16) -> ApiConfig {
    let mut config = ApiConfig::default();
    config.command_port = port;
    config.connect_timeout = Duration::from_millis(500);
    config.command_timeout = Duration::from_millis(500);
    config.discovery_timeout = Duration::from_secs(5);
    config
}

fn octa_responder() -> Responder {
    Arc::new(|command: &str| {
        let reply = match command {
            "VER" => "4.02\n00;",
            "NS" => "E000123456\n00;",
            "ID" => "Octa: 24 channel luminaire\n00;",
            "GETSERNO" => "OCT-0042\n00;",
            "PS?" => "FFFF,0000\n00;",
            "DIR" => "Directory of /\nsunrise.lsf\nsunset.lsf\n\n12 blocks used\n2017 blocks free\n00;",
            _ => "00;",
        };
        Some(reply.to_string())
    })
}

/// Accepts connections and consumes commands but never answers.
fn silent_responder() -> Responder {
    Arc::new(|_command: &str| None)
}

#[tokio::test]
async fn connect_runs_identity_initialization() {
    let _ = env_logger::builder().is_test(true).try_init();
    let addr = spawn_device("127.0.0.1", octa_responder()).await;
    let mut luminaire = Luminaire::new(Ipv4Addr::new(127, 0, 0, 1), test_config(addr.port()));
    luminaire.connect().await.expect("connect");

    assert!(luminaire.is_connected());
    assert_eq!(luminaire.luminaire_type(), LuminaireType::Octa);
    assert_eq!(luminaire.firmware_version(), Some("4.02"));
    assert_eq!(luminaire.electronic_serial(), Some("E000123456"));
    assert_eq!(luminaire.serial_number(), Some("OCT-0042"));
    assert_eq!(luminaire.last_status(), 0);

    let levels = luminaire.get_drive_levels().await.expect("levels");
    assert_eq!(levels.len(), 2);
    assert!((levels[0] - 1.0).abs() < 1e-9);
    assert_eq!(levels[1], 0.0);

    let files = luminaire.get_directory().await.expect("dir");
    assert_eq!(files, vec!["sunrise.lsf", "sunset.lsf"]);
    let used = luminaire.get_used_blocks().await.expect("used blocks");
    assert_eq!(used, 12);

    luminaire.disconnect().await;
    assert!(!luminaire.is_connected());
}

#[tokio::test]
async fn connect_is_idempotent_once_connected() {
    let addr = spawn_device("127.0.0.1", octa_responder()).await;
    let mut luminaire = Luminaire::new(Ipv4Addr::new(127, 0, 0, 1), test_config(addr.port()));
    luminaire.connect().await.expect("connect");
    luminaire.connect().await.expect("second connect is a no-op");
    assert!(luminaire.is_connected());
}

fn replicator_responder() -> Responder {
    let reads = Arc::new(AtomicUsize::new(0));
    Arc::new(move |command: &str| {
        let reply = match command {
            "VER" => "2.14\n00;".to_string(),
            "NS" => "LR-0007\n00;".to_string(),
            "ID" => "Supply: 12000mV 350mA\n00;".to_string(),
            "OPEN demo.pat" => "00;".to_string(),
            "READ" => {
                if reads.fetch_add(1, Ordering::SeqCst) == 0 {
                    "0000:DEADBEEF\n0010:0102\n00;".to_string()
                } else {
                    "01;".to_string()
                }
            }
            _ => "00;".to_string(),
        };
        Some(reply)
    })
}

#[tokio::test]
async fn light_replicator_detection_and_legacy_receive() {
    let addr = spawn_device("127.0.0.1", replicator_responder()).await;
    let mut luminaire = Luminaire::new(Ipv4Addr::new(127, 0, 0, 1), test_config(addr.port()));
    luminaire.connect().await.expect("connect");

    assert_eq!(luminaire.luminaire_type(), LuminaireType::LightReplicator);
    // No GETSERNO on this family; the electronic serial stands in.
    assert_eq!(luminaire.serial_number(), Some("LR-0007"));

    let destination =
        std::env::temp_dir().join(format!("lumen-legacy-{}.bin", std::process::id()));
    luminaire
        .receive_file("demo.pat", &destination)
        .await
        .expect("receive");
    let contents = std::fs::read(&destination).expect("read back");
    assert_eq!(contents, vec![0xDE, 0xAD, 0xBE, 0xEF, 0x01, 0x02]);
    let _ = std::fs::remove_file(&destination);
}

#[tokio::test]
async fn discovery_verifies_and_returns_devices() {
    let addr = spawn_device("127.0.0.5", octa_responder()).await;
    let mut config = test_config(addr.port());
    config.scan_range = (2, 30);

    let found = Discovery::scan_network("127.0.0.", &config).await;
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].address(), Ipv4Addr::new(127, 0, 0, 5));
    assert_eq!(found[0].luminaire_type(), LuminaireType::Octa);
    assert_eq!(found[0].serial_number(), Some("OCT-0042"));
}

#[tokio::test]
async fn discovery_on_empty_prefix_is_bounded_and_empty() {
    // Nothing listens on port 1; every probe is refused immediately.
    let mut config = test_config(1);
    config.scan_range = (2, 40);
    config.discovery_timeout = Duration::from_secs(3);

    let started = Instant::now();
    let found = Discovery::scan_network("127.0.0.", &config).await;
    assert!(found.is_empty());
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn registry_reuses_live_sessions() {
    let addr = spawn_device("127.0.0.1", octa_responder()).await;
    let registry = DeviceRegistry::new(test_config(addr.port()));
    let address = Ipv4Addr::new(127, 0, 0, 1);

    let first = registry.connect(address).await.expect("connect");
    let second = registry.connect(address).await.expect("reconnect");
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(registry.addresses().await, vec![address]);
    assert_eq!(registry.disconnect_all().await, 1);
    assert!(registry.get(address).await.is_none());
}

#[tokio::test]
async fn fanout_retries_only_silent_devices() {
    let devices = [
        ("127.0.0.11", octa_responder()),
        ("127.0.0.12", octa_responder()),
        ("127.0.0.13", silent_responder()),
    ];
    let registry = DeviceRegistry::new(ApiConfig::default());
    let mut addresses = Vec::new();
    for (ip, responder) in devices {
        let addr = spawn_device(ip, responder).await;
        let address: Ipv4Addr = ip.parse().unwrap();
        let mut config = test_config(addr.port());
        config.command_timeout = Duration::from_millis(200);
        let mut luminaire = Luminaire::new(address, config);
        luminaire.connect().await.expect("connect");
        registry.adopt(luminaire).await;
        addresses.push(address);
    }

    let report = fanout::send_parallel(
        &registry,
        &addresses,
        FanoutCommand::Broadcast("NS".to_string()),
        2,
        Duration::from_millis(300),
    )
    .await
    .expect("fanout");

    assert_eq!(report.pending, vec![Ipv4Addr::new(127, 0, 0, 13)]);
    assert_eq!(report.replies.len(), 3);
    for (address, reply) in &report.replies {
        if *address == Ipv4Addr::new(127, 0, 0, 13) {
            assert!(reply.is_empty());
        } else {
            assert!(reply.contains(';'), "{} should have answered", address);
        }
    }
}

/// Serves `READAT` from a single 512-byte file, optionally lying about the
/// checksum. Returns the responder plus a counter of data reads.
fn chunked_read_responder(
    corrupt_first: bool,
    always_corrupt: bool,
) -> (Responder, Arc<AtomicUsize>) {
    let read_calls = Arc::new(AtomicUsize::new(0));
    let calls = Arc::clone(&read_calls);
    let block: Vec<u8> = (0u8..=255).cycle().take(512).collect();
    let checksum = transfer::xor32(&block);
    let responder: Responder = Arc::new(move |command: &str| {
        if command == "OPEN data.bin" {
            return Some("00;".to_string());
        }
        if let Some(offset) = command.strip_prefix("READAT ") {
            let offset: usize = offset.trim().parse().expect("offset");
            if offset >= 512 {
                return Some("01;".to_string());
            }
            let call = calls.fetch_add(1, Ordering::SeqCst);
            let reported = if always_corrupt || (corrupt_first && call == 0) {
                checksum ^ 0xFFFF_FFFF
            } else {
                checksum
            };
            return Some(format!(
                "{}\n=LRC:{:08X}\n00;",
                hex::encode_upper(&block),
                reported
            ));
        }
        Some("00;".to_string())
    });
    (responder, read_calls)
}

#[tokio::test]
async fn chunked_receive_retries_corrupt_block_at_same_offset() {
    let (responder, read_calls) = chunked_read_responder(true, false);
    let addr = spawn_device("127.0.0.1", responder).await;
    let mut luminaire = Luminaire::new(Ipv4Addr::new(127, 0, 0, 1), test_config(addr.port()));
    luminaire.connect().await.expect("connect");

    let destination =
        std::env::temp_dir().join(format!("lumen-chunked-{}.bin", std::process::id()));
    luminaire
        .receive_file("data.bin", &destination)
        .await
        .expect("receive");

    // One corrupt read, one clean retry of the same offset, then end of
    // file; the whole file is never restarted.
    assert_eq!(read_calls.load(Ordering::SeqCst), 2);
    let contents = std::fs::read(&destination).expect("read back");
    assert_eq!(contents.len(), 512);
    let expected: Vec<u8> = (0u8..=255).cycle().take(512).collect();
    assert_eq!(contents, expected);
    let _ = std::fs::remove_file(&destination);
}

#[tokio::test]
async fn chunked_receive_fails_after_retry_budget() {
    let (responder, read_calls) = chunked_read_responder(false, true);
    let addr = spawn_device("127.0.0.1", responder).await;
    let mut luminaire = Luminaire::new(Ipv4Addr::new(127, 0, 0, 1), test_config(addr.port()));
    luminaire.connect().await.expect("connect");

    let destination =
        std::env::temp_dir().join(format!("lumen-exhaust-{}.bin", std::process::id()));
    let result = luminaire.receive_file("data.bin", &destination).await;
    match result {
        Err(LumenError::FileTransferFailed {
            offset, retries, ..
        }) => {
            assert_eq!(offset, 0);
            assert_eq!(retries, 10);
        }
        other => panic!("expected FileTransferFailed, got {:?}", other),
    }
    assert_eq!(read_calls.load(Ordering::SeqCst), 10);
    assert!(!destination.exists());
}

#[tokio::test]
async fn open_failure_aborts_receive() {
    let responder: Responder = Arc::new(|command: &str| {
        if command.starts_with("OPEN ") {
            return Some("09;".to_string());
        }
        Some("00;".to_string())
    });
    let addr = spawn_device("127.0.0.1", responder).await;
    let mut luminaire = Luminaire::new(Ipv4Addr::new(127, 0, 0, 1), test_config(addr.port()));
    luminaire.connect().await.expect("connect");

    let destination = std::env::temp_dir().join("lumen-never-written.bin");
    match luminaire.receive_file("missing.bin", &destination).await {
        Err(LumenError::FileOpenFailed { status, .. }) => assert_eq!(status, 9),
        other => panic!("expected FileOpenFailed, got {:?}", other),
    }
}

fn chunked_write_responder() -> (Responder, Arc<AtomicUsize>, Arc<StdMutex<Vec<String>>>) {
    let write_calls = Arc::new(AtomicUsize::new(0));
    let writes = Arc::new(StdMutex::new(Vec::new()));
    let calls = Arc::clone(&write_calls);
    let log = Arc::clone(&writes);
    let responder: Responder = Arc::new(move |command: &str| {
        if command.starts_with("WRITE ") {
            log.lock().unwrap().push(command.to_string());
            let call = calls.fetch_add(1, Ordering::SeqCst);
            // Reject the very first block once, as if it arrived mangled.
            return Some(if call == 0 {
                "42;".to_string()
            } else {
                "00;".to_string()
            });
        }
        Some("00;".to_string())
    });
    (responder, write_calls, writes)
}

#[tokio::test]
async fn chunked_send_resends_rejected_block() {
    let (responder, write_calls, writes) = chunked_write_responder();
    let addr = spawn_device("127.0.0.1", responder).await;
    let mut luminaire = Luminaire::new(Ipv4Addr::new(127, 0, 0, 1), test_config(addr.port()));
    luminaire.connect().await.expect("connect");

    // 600 bytes: one full block plus one padded block.
    let source = std::env::temp_dir().join(format!("lumen-upload-{}.bin", std::process::id()));
    std::fs::write(&source, vec![0xA5u8; 600]).expect("write source");
    luminaire
        .send_file(&source, "upload.bin", false)
        .await
        .expect("send");

    assert_eq!(write_calls.load(Ordering::SeqCst), 3);
    let writes = writes.lock().unwrap();
    // The rejected block is re-sent byte for byte, checksum included.
    assert_eq!(writes[0], writes[1]);
    assert!(writes[0].starts_with("WRITE "));
    assert!(writes[0].contains(':'));
    assert_ne!(writes[1], writes[2]);
    let _ = std::fs::remove_file(&source);
}

#[tokio::test]
async fn udp_messenger_envelope_round_trip() {
    let receiver = tokio::net::UdpSocket::bind("127.0.0.1:0")
        .await
        .expect("bind receiver");
    let port = receiver.local_addr().expect("addr").port();

    let mut messenger = UdpMessenger::bind(port).await.expect("bind messenger");
    messenger
        .send_to(Ipv4Addr::new(127, 0, 0, 1), "NS")
        .await
        .expect("send");

    let mut buffer = [0u8; 64];
    let (len, _) = receiver.recv_from(&mut buffer).await.expect("recv");
    assert_eq!(len, 12);
    assert_eq!(&buffer[0..2], &[0xAE, 0xEC]);
    assert_eq!(&buffer[2..4], &[0x00, 0x01]);
    assert_eq!(&buffer[8..10], &[0x00, 0x02]);
    assert_eq!(&buffer[10..12], b"NS");
}
