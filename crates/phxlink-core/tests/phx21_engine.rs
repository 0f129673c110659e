//! Integration tests for the phx21 engine over an in-memory link.
//!
//! A scripted device task plays the analyzer's side: it deframes host
//! commands, acks everything, and serves queued status payloads for
//! READ_DATA_EXTENDED.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::timeout;

use phxlink_core::mock::{mock_link, DeviceEnd};
use phxlink_core::phx21::frame::{checksum, Deframer};
use phxlink_core::phx21::{commands, Phx21, Phx21Config};
use phxlink_core::{DeviceEvent, Phx21Status};
use phxlink_types::{FLAG_PUMP_A, FLAG_SOL_A, PHX21_STATUS_EXTENDED_LEN};

/// Fast-polling config so tests finish quickly.
fn test_config() -> Phx21Config {
    Phx21Config {
        poll_interval_ms: 50,
        response_timeout: Duration::from_millis(500),
        ..Phx21Config::default()
    }
}

/// Build a 24-byte extended status payload.
fn status_payload(
    flags: u8,
    range: u8,
    battery_mv: u16,
    picoamps_tenths: i32,
    ppm_tenths: u32,
    thermocouple_tk: u16,
    pump_power: u8,
) -> Vec<u8> {
    let mut data = Vec::with_capacity(PHX21_STATUS_EXTENDED_LEN);
    data.push(flags);
    data.push(range);
    data.extend_from_slice(&battery_mv.to_le_bytes());
    data.extend_from_slice(&picoamps_tenths.to_le_bytes());
    data.extend_from_slice(&ppm_tenths.to_le_bytes());
    data.extend_from_slice(&1450u16.to_le_bytes());
    data.extend_from_slice(&18000u16.to_le_bytes());
    data.extend_from_slice(&thermocouple_tk.to_le_bytes());
    data.extend_from_slice(&3000u16.to_le_bytes());
    data.extend_from_slice(&850u16.to_le_bytes());
    data.push(pump_power);
    data.push(0);
    data
}

/// A healthy, burning status: thermocouple ~500 °F, pump and solenoid on.
fn burning_status(ppm_tenths: u32) -> Vec<u8> {
    status_payload(
        FLAG_PUMP_A | FLAG_SOL_A,
        0,
        12_500,
        5_000,
        ppm_tenths,
        5_332,
        40,
    )
}

struct ScriptedDevice {
    /// Every command frame the device saw, as (cmd_id, payload).
    commands: Arc<Mutex<Vec<(u8, Vec<u8>)>>>,
    /// Queue of status payloads served for READ_DATA_EXTENDED; the last
    /// one keeps being served once the queue drains.
    statuses: Arc<Mutex<VecDeque<Vec<u8>>>>,
    handle: JoinHandle<()>,
}

impl ScriptedDevice {
    fn spawn(mut device: DeviceEnd) -> Self {
        let commands: Arc<Mutex<Vec<(u8, Vec<u8>)>>> = Arc::new(Mutex::new(Vec::new()));
        let statuses: Arc<Mutex<VecDeque<Vec<u8>>>> = Arc::new(Mutex::new(VecDeque::new()));

        let commands_task = Arc::clone(&commands);
        let statuses_task = Arc::clone(&statuses);
        let handle = tokio::spawn(async move {
            let mut deframer = Deframer::for_commands();
            let mut last_status = burning_status(0);
            loop {
                let byte = match device.read_byte().await {
                    Ok(b) => b,
                    Err(_) => break,
                };
                let Some(frame) = deframer.push(byte) else {
                    continue;
                };

                commands_task
                    .lock()
                    .unwrap()
                    .push((frame.cmd_id(), frame.payload().to_vec()));

                let payload = match frame.cmd_id() {
                    commands::READ_DATA_EXTENDED => {
                        if let Some(next) = statuses_task.lock().unwrap().pop_front() {
                            last_status = next;
                        }
                        last_status.clone()
                    }
                    commands::CONFIGURATION_READ => vec![1, 72],
                    _ => Vec::new(),
                };
                if device.write_all(&response_frame(frame.cmd_id(), &payload)).await.is_err() {
                    break;
                }
            }
        });

        Self {
            commands,
            statuses,
            handle,
        }
    }

    fn queue_status(&self, payload: Vec<u8>) {
        self.statuses.lock().unwrap().push_back(payload);
    }

    fn seen_commands(&self) -> Vec<(u8, Vec<u8>)> {
        self.commands.lock().unwrap().clone()
    }
}

/// Frame a device→host response.
fn response_frame(cmd_id: u8, payload: &[u8]) -> Vec<u8> {
    let total = 3 + payload.len() + 1;
    let mut bytes = Vec::with_capacity(total);
    bytes.push(0xA5);
    bytes.push(total as u8);
    bytes.push(cmd_id);
    bytes.extend_from_slice(payload);
    bytes.push(checksum(&bytes));
    bytes
}

async fn start_engine() -> (Phx21, ScriptedDevice) {
    let (input, output, device) = mock_link(4096);
    let device = ScriptedDevice::spawn(device);
    let engine = Phx21::start_with_config(input, output, test_config())
        .await
        .expect("engine should start against an acking device");
    (engine, device)
}

/// Wait for the next DataPolled event.
async fn next_data_polled(
    events: &mut phxlink_core::EventReceiver,
) -> (std::collections::HashMap<String, String>, f64) {
    loop {
        match timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("expected a DataPolled event before the deadline")
            .expect("event channel closed")
        {
            DeviceEvent::DataPolled { properties, ppm } => return (properties, ppm),
            _ => continue,
        }
    }
}

#[tokio::test]
async fn test_setup_sequence_order() {
    let (engine, device) = start_engine().await;

    let seen = device.seen_commands();
    let ids: Vec<u8> = seen.iter().map(|(id, _)| *id).collect();
    assert_eq!(
        &ids[..4],
        &[
            commands::SET_SAMPLING_PARAMETERS,
            commands::INTEGRATION_CONTROL,
            commands::SET_DEADHEAD_PARAMS,
            commands::SET_CAL_H2PRES_COMPENSATION,
        ]
    );
    // Setup selects the low range
    assert_eq!(seen[0].1, vec![0]);

    engine.shutdown().await;
    device.handle.abort();
}

#[tokio::test]
async fn test_happy_ignite_reports_ppm() {
    let (engine, device) = start_engine().await;
    for _ in 0..10 {
        device.queue_status(burning_status(100)); // 10.0 ppm
    }

    let mut events = engine.subscribe();
    engine.start_polling_data(50);

    let (properties, ppm) = next_data_polled(&mut events).await;
    assert_eq!(ppm, 10.0);
    assert_eq!(properties.get("IsIgnited").unwrap(), "true");
    assert_eq!(properties.get("PPM").unwrap(), "10");

    assert!(engine.is_ignited());
    let status: Phx21Status = engine.latest_status().unwrap();
    assert_eq!(status.ppm, 10.0);

    engine.shutdown().await;
    device.handle.abort();
}

#[tokio::test]
async fn test_junk_sample_skipped_then_clean_reported() {
    let (engine, device) = start_engine().await;
    // 20 V battery fails the junk filter; the next sample is clean
    device.queue_status(status_payload(
        FLAG_PUMP_A | FLAG_SOL_A,
        0,
        20_000,
        5_000,
        50,
        5_332,
        40,
    ));
    for _ in 0..10 {
        device.queue_status(burning_status(50)); // 5.0 ppm
    }

    let mut events = engine.subscribe();
    engine.start_polling_data(50);

    let (properties, ppm) = next_data_polled(&mut events).await;
    assert_eq!(ppm, 5.0);
    assert_eq!(properties.get("Volts").unwrap(), "12.5");

    engine.shutdown().await;
    device.handle.abort();
}

#[tokio::test]
async fn test_range_up_command_hits_the_wire() {
    let (engine, device) = start_engine().await;
    // LO range with the detector current at the switch threshold
    for _ in 0..10 {
        device.queue_status(status_payload(
            FLAG_PUMP_A | FLAG_SOL_A,
            0,
            12_500,
            65_000, // 6500.0 pA
            50,
            5_332,
            40,
        ));
    }

    let mut events = engine.subscribe();
    engine.start_polling_data(50);
    next_data_polled(&mut events).await;

    // The switch command must reach the wire shortly after the sample
    tokio::time::sleep(Duration::from_millis(300)).await;
    let switched = device
        .seen_commands()
        .iter()
        .skip(4) // setup sequence
        .any(|(id, payload)| *id == commands::SET_SAMPLING_PARAMETERS && payload == &[3]);
    assert!(switched, "expected SET_SAMPLING_PARAMETERS(MAX) on the wire");

    engine.shutdown().await;
    device.handle.abort();
}

#[tokio::test]
async fn test_firmware_version() {
    let (engine, device) = start_engine().await;
    let version = engine.get_firmware_version().await.unwrap();
    assert_eq!(version, "1.72");
    engine.shutdown().await;
    device.handle.abort();
}

#[tokio::test]
async fn test_goodbye_reaches_the_wire_before_shutdown() {
    let (engine, device) = start_engine().await;
    engine.send_goodbye().unwrap();
    engine.shutdown().await;

    // Give the scripted device a beat to drain what the sender flushed
    tokio::time::sleep(Duration::from_millis(100)).await;
    let goodbye_seen = device
        .seen_commands()
        .iter()
        .any(|(id, _)| *id == commands::GOODBYE);
    assert!(goodbye_seen, "GOODBYE should drain before the sender exits");
    device.handle.abort();
}

#[tokio::test]
async fn test_shutdown_completes_promptly() {
    let (engine, device) = start_engine().await;
    engine.start_polling_data(50);
    timeout(Duration::from_secs(10), engine.shutdown())
        .await
        .expect("shutdown should not hang");
    device.handle.abort();
}

#[tokio::test]
async fn test_counters_advance() {
    let (engine, device) = start_engine().await;
    assert!(engine.bytes_sent() > 0, "setup sequence was written");
    assert!(engine.bytes_received() > 0, "setup acks were read");
    assert!(engine.session_duration() > Duration::ZERO);
    engine.shutdown().await;
    device.handle.abort();
}
