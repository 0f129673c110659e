//! The phx42 protocol engine.
//!
//! The phx42 speaks CR-LF framed ASCII lines. Inbound messages land in a
//! bounded ordered buffer (latest twenty, oldest evicted) with a handled
//! flag; callers correlate responses by scanning for the first unhandled
//! message of the right type. A device-reported `EROR`/`SERR` for the
//! in-flight request type fails the waiter fast. A heartbeat worker keeps
//! the link alive; the firmware pushes periodic reports on its own once
//! they are enabled, so there is no host-side poll loop.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use phxlink_types::{property, DeviceKind};
use time::OffsetDateTime;

use super::errors::{describe, CODE_WARMING_UP};
use super::message::{format_rtc, msg, parse_rtc, LineBuffer, Message};
use crate::error::{Error, Result};
use crate::events::{CommandErrorKind, DeviceEvent, EventDispatcher, EventReceiver};
use crate::stream::{InputStream, OutputStream, StreamCounter};
use crate::traits::Analyzer;
use crate::transport::{run_sender, WorkerShared, SHUTDOWN_PULSE, SHUTDOWN_PULSES_MAX, WORKER_POLL};

/// Bound on the inbound message buffer; the oldest entry is evicted.
const INBOUND_BUFFER_CAP: usize = 20;
/// Unparseable lines tolerated before a malformed-frame error is raised.
const RESYNC_MAX: u32 = 5;
/// CALPPM value the firmware reports while the flame is out.
const FLAME_OUT_PPM: &str = "-100.00";
/// Periodic streams in selectivity order, most selective first.
const PERIODIC_STREAMS: [&str; 4] = [msg::FIDR, msg::RDNG, msg::DRVL, msg::BATS];

/// Observer invoked with raw lines the deframer discarded.
pub type RawMessageObserver = Box<dyn Fn(&str) + Send + Sync>;

/// Configuration for a phx42 engine.
///
/// The averaging knobs mirror the phx21's but are advisory here: the
/// phx42 firmware averages in hardware and its CALPPM figure is
/// authoritative. The host only bounds the reading history.
#[derive(Debug, Clone)]
pub struct Phx42Config {
    /// Heartbeat period keeping the link alive.
    pub heartbeat_interval: Duration,
    /// Deadline for correlated replies.
    pub response_timeout: Duration,
    /// Deadline for slow operations.
    pub long_response_timeout: Duration,
    /// Tolerance band around the long average, in percent.
    pub use_avg_percent: f64,
    /// Samples in the long average tail.
    pub long_average_count: usize,
    /// Samples in the short average tail.
    pub short_average_count: usize,
    /// PPM below which averaging would apply.
    pub average_cutoff_ppm: f64,
    /// Bound on the host-side reading history.
    pub ppm_history: usize,
    /// Event channel capacity.
    pub event_capacity: usize,
}

impl Default for Phx42Config {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_millis(900),
            response_timeout: Duration::from_millis(2000),
            long_response_timeout: Duration::from_millis(5000),
            use_avg_percent: 10.0,
            long_average_count: 25,
            short_average_count: 5,
            average_cutoff_ppm: 40.0,
            ppm_history: 250,
            event_capacity: 100,
        }
    }
}

impl Phx42Config {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.heartbeat_interval.is_zero() {
            return Err(Error::invalid_config("heartbeat_interval must be > 0"));
        }
        if self.response_timeout.is_zero() {
            return Err(Error::invalid_config("response_timeout must be > 0"));
        }
        if self.ppm_history == 0 {
            return Err(Error::invalid_config("ppm_history must be > 0"));
        }
        Ok(())
    }
}

/// A buffered inbound message with its consumption flag.
struct BufferedMessage {
    message: Message,
    handled: bool,
}

struct Inner {
    config: Phx42Config,
    /// Bounded ordered buffer of the most recent inbound messages.
    buffer: Mutex<VecDeque<BufferedMessage>>,
    /// Latest device-reported error per request type.
    errors: Mutex<HashMap<String, (Instant, u32)>>,
    /// Locked status map accumulated from periodic reports.
    status: Mutex<HashMap<String, String>>,
    /// Bounded history of parsed PPM readings.
    last_ppms: Mutex<VecDeque<f64>>,
    /// Periodic streams currently enabled on the device.
    enabled_streams: Mutex<Vec<&'static str>>,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    workers: Arc<WorkerShared>,
    heartbeat_done: AtomicBool,
    resyncs: AtomicU32,
    raw_observer: Mutex<Option<RawMessageObserver>>,
}

impl Inner {
    fn enqueue(&self, message: &Message) -> Result<()> {
        if self.workers.cancel.is_cancelled() {
            return Err(Error::EngineStopped);
        }
        self.outbound
            .send(message.encode())
            .map_err(|_| Error::EngineStopped)
    }

    /// Transmit a message and wait for the first unhandled inbound message
    /// of the effective response type. For `SRPT` requests the effective
    /// type is the requested report type, not `SRPT` itself.
    async fn send_and_receive(
        &self,
        message: Message,
        timeout: Duration,
        operation: &str,
    ) -> Result<Message> {
        let effective = if message.msg_type == msg::SRPT {
            message
                .param("TYPE")
                .unwrap_or(msg::SRPT)
                .to_string()
        } else {
            message.msg_type.clone()
        };

        let send_time = Instant::now();
        self.enqueue(&message)?;

        loop {
            if let Some((at, code)) = self
                .errors
                .lock()
                .expect("error table poisoned")
                .get(&effective)
                .copied()
            {
                if at > send_time {
                    return Err(Error::device_reported(
                        effective,
                        code,
                        describe(code, None),
                    ));
                }
            }

            if let Some(found) = {
                let mut buffer = self.buffer.lock().expect("buffer poisoned");
                buffer
                    .iter_mut()
                    .find(|entry| !entry.handled && entry.message.msg_type == effective)
                    .map(|entry| {
                        entry.handled = true;
                        entry.message.clone()
                    })
            } {
                return Ok(found);
            }

            if send_time.elapsed() >= timeout {
                return Err(Error::timeout(operation, timeout));
            }
            sleep(WORKER_POLL).await;
        }
    }

    /// The most selective stream currently enabled, if any.
    fn most_selective_enabled(&self) -> Option<&'static str> {
        let enabled = self
            .enabled_streams
            .lock()
            .expect("enabled streams poisoned");
        PERIODIC_STREAMS
            .iter()
            .copied()
            .find(|s| enabled.contains(s))
    }
}

/// Engine for the newer-generation phx42 analyzer (ASCII line protocol).
///
/// Construct with [`Phx42::start`], which takes exclusive ownership of both
/// stream halves, sets the device clock, quiesces the periodic streams and
/// starts the heartbeat. Call [`Phx42::shutdown`] for an orderly exit.
pub struct Phx42 {
    inner: Arc<Inner>,
    rx_counter: StreamCounter,
    tx_counter: StreamCounter,
    worker_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for Phx42 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Phx42")
            .field("bytes_sent", &self.tx_counter.bytes())
            .field("bytes_received", &self.rx_counter.bytes())
            .finish_non_exhaustive()
    }
}

impl Phx42 {
    /// Start an engine over the given streams with default configuration.
    pub async fn start(input: InputStream, output: OutputStream) -> Result<Self> {
        Self::start_with_config(input, output, Phx42Config::default()).await
    }

    /// Start an engine with custom configuration.
    pub async fn start_with_config(
        input: InputStream,
        output: OutputStream,
        config: Phx42Config,
    ) -> Result<Self> {
        config.validate()?;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let rx_counter = input.counter();
        let tx_counter = output.counter();
        let workers = Arc::new(WorkerShared::new(EventDispatcher::new(config.event_capacity)));

        let inner = Arc::new(Inner {
            config,
            buffer: Mutex::new(VecDeque::new()),
            errors: Mutex::new(HashMap::new()),
            status: Mutex::new(HashMap::new()),
            last_ppms: Mutex::new(VecDeque::new()),
            enabled_streams: Mutex::new(Vec::new()),
            outbound: outbound_tx,
            workers: Arc::clone(&workers),
            heartbeat_done: AtomicBool::new(false),
            resyncs: AtomicU32::new(0),
            raw_observer: Mutex::new(None),
        });

        let receiver = tokio::spawn(run_receiver(Arc::clone(&inner), input));
        let sender = tokio::spawn(run_sender(Arc::clone(&workers), output, outbound_rx));

        let engine = Self {
            inner,
            rx_counter,
            tx_counter,
            worker_handles: Mutex::new(vec![receiver, sender]),
        };

        if let Err(e) = engine.initialize().await {
            warn!("phx42 initialization failed: {}", e);
            engine.inner.workers.cancel.cancel();
            return Err(e);
        }

        let heartbeat = tokio::spawn(run_heartbeat(Arc::clone(&engine.inner)));
        engine
            .worker_handles
            .lock()
            .expect("handles poisoned")
            .push(heartbeat);

        info!("phx42 engine started");
        Ok(engine)
    }

    /// Set the device clock, then quiesce all periodic streams.
    async fn initialize(&self) -> Result<()> {
        self.set_time(OffsetDateTime::now_utc()).await?;
        for stream in PERIODIC_STREAMS {
            self.inner
                .send_and_receive(
                    Message::with_params(msg::PRPT, &[("TYPE", stream), ("EN", "0")]),
                    self.inner.config.response_timeout,
                    "disable_periodic",
                )
                .await?;
        }
        Ok(())
    }

    /// Subscribe to engine events.
    pub fn subscribe(&self) -> EventReceiver {
        self.inner.workers.events.subscribe()
    }

    /// Install an observer that sees raw lines the deframer discarded.
    pub fn set_raw_message_observer(&self, observer: RawMessageObserver) {
        *self
            .inner
            .raw_observer
            .lock()
            .expect("observer lock poisoned") = Some(observer);
    }

    /// Enable the periodic streams at the given interval. `DataPolled`
    /// fires once per device tick, on the most selective enabled stream.
    pub async fn start_polling_data(&self, interval_ms: u64) -> Result<()> {
        let interval = interval_ms.to_string();
        for stream in PERIODIC_STREAMS {
            self.inner
                .send_and_receive(
                    Message::with_params(msg::TRPT, &[("TYPE", stream), ("MS", &interval)]),
                    self.inner.config.response_timeout,
                    "set_report_interval",
                )
                .await?;
            self.inner
                .send_and_receive(
                    Message::with_params(msg::PRPT, &[("TYPE", stream), ("EN", "1")]),
                    self.inner.config.response_timeout,
                    "enable_periodic",
                )
                .await?;
            let mut enabled = self
                .inner
                .enabled_streams
                .lock()
                .expect("enabled streams poisoned");
            if !enabled.contains(&stream) {
                enabled.push(stream);
            }
        }
        Ok(())
    }

    /// Disable the periodic streams.
    pub async fn stop_polling_data(&self) -> Result<()> {
        for stream in PERIODIC_STREAMS {
            self.inner
                .send_and_receive(
                    Message::with_params(msg::PRPT, &[("TYPE", stream), ("EN", "0")]),
                    self.inner.config.response_timeout,
                    "disable_periodic",
                )
                .await?;
        }
        self.inner
            .enabled_streams
            .lock()
            .expect("enabled streams poisoned")
            .clear();
        Ok(())
    }

    /// Change the periodic reporting interval without toggling the streams.
    pub async fn set_periodic_reporting_interval(&self, interval_ms: u64) -> Result<()> {
        let interval = interval_ms.to_string();
        for stream in PERIODIC_STREAMS {
            self.inner
                .send_and_receive(
                    Message::with_params(msg::TRPT, &[("TYPE", stream), ("MS", &interval)]),
                    self.inner.config.response_timeout,
                    "set_report_interval",
                )
                .await?;
        }
        Ok(())
    }

    /// Request a single report of the given stream type.
    pub async fn request_single_report(&self, stream: &str) -> Result<Message> {
        self.inner
            .send_and_receive(
                Message::with_params(msg::SRPT, &[("TYPE", stream)]),
                self.inner.config.response_timeout,
                "single_report",
            )
            .await
    }

    /// Start the auto-ignition sequence. Fire-and-forget.
    pub fn ignite(&self) -> Result<()> {
        self.inner
            .enqueue(&Message::with_params(msg::AIGS, &[("GO", "1")]))
    }

    /// Abort the auto-ignition sequence. Fire-and-forget.
    pub fn abort_ignite(&self) -> Result<()> {
        self.inner
            .enqueue(&Message::with_params(msg::AIGS, &[("GO", "0")]))
    }

    /// Read the firmware version.
    pub async fn get_firmware_version(&self) -> Result<String> {
        let reply = self
            .inner
            .send_and_receive(
                Message::new(msg::VERS),
                self.inner.config.long_response_timeout,
                "get_firmware_version",
            )
            .await?;
        Ok(reply
            .param("VER")
            .map(str::to_string)
            .or(reply.unparsed)
            .unwrap_or_default())
    }

    /// Set the device real-time clock.
    pub async fn set_time(&self, t: OffsetDateTime) -> Result<()> {
        self.inner
            .send_and_receive(
                Message::with_params(msg::TIME, &[("TS", &format_rtc(t))]),
                self.inner.config.response_timeout,
                "set_time",
            )
            .await
            .map(|_| ())
    }

    /// Read the device real-time clock.
    pub async fn get_time(&self) -> Result<OffsetDateTime> {
        let reply = self
            .inner
            .send_and_receive(
                Message::new(msg::TIME),
                self.inner.config.response_timeout,
                "get_time",
            )
            .await?;
        let ts = reply.param("TS").ok_or_else(|| {
            Error::Parse(phxlink_types::ParseError::invalid_value(
                "TIME reply missing TS",
            ))
        })?;
        parse_rtc(ts).map_err(|e| {
            Error::Parse(phxlink_types::ParseError::invalid_value(e.to_string()))
        })
    }

    /// Snapshot of the accumulated status map.
    pub fn latest_properties(&self) -> HashMap<String, String> {
        self.inner.status.lock().expect("status poisoned").clone()
    }

    /// Snapshot of the bounded PPM history, oldest first.
    pub fn last_ppms(&self) -> Vec<f64> {
        self.inner
            .last_ppms
            .lock()
            .expect("ppm history poisoned")
            .iter()
            .copied()
            .collect()
    }

    /// Cumulative bytes written to the device.
    pub fn bytes_sent(&self) -> u64 {
        self.tx_counter.bytes()
    }

    /// Cumulative bytes read from the device.
    pub fn bytes_received(&self) -> u64 {
        self.rx_counter.bytes()
    }

    /// How long the link has been open.
    pub fn session_duration(&self) -> Duration {
        self.rx_counter.session_duration()
    }

    /// Stop the workers and wait until all of them have observed the
    /// shutdown flag and exited.
    pub async fn shutdown(&self) {
        self.inner.workers.cancel.cancel();
        self.inner.workers.wait_for_workers().await;

        let mut pulses = 0;
        while !self.inner.heartbeat_done.load(Ordering::SeqCst) {
            pulses += 1;
            if pulses > SHUTDOWN_PULSES_MAX {
                warn!("phx42 heartbeat worker did not exit cleanly");
                break;
            }
            sleep(SHUTDOWN_PULSE).await;
        }

        for handle in self
            .worker_handles
            .lock()
            .expect("handles poisoned")
            .drain(..)
        {
            handle.abort();
        }
        info!("phx42 engine stopped");
    }
}

impl Drop for Phx42 {
    fn drop(&mut self) {
        self.inner.workers.cancel.cancel();
    }
}

#[async_trait]
impl Analyzer for Phx42 {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Phx42
    }

    fn subscribe(&self) -> EventReceiver {
        Phx42::subscribe(self)
    }

    async fn start_polling_data(&self, interval_ms: u64) -> Result<()> {
        Phx42::start_polling_data(self, interval_ms).await
    }

    async fn stop_polling_data(&self) -> Result<()> {
        Phx42::stop_polling_data(self).await
    }

    async fn ignite(&self, on: bool) -> Result<()> {
        if on {
            Phx42::ignite(self)
        } else {
            Phx42::abort_ignite(self)
        }
    }

    async fn get_firmware_version(&self) -> Result<String> {
        Phx42::get_firmware_version(self).await
    }

    async fn shutdown(&self) -> Result<()> {
        Phx42::shutdown(self).await;
        Ok(())
    }
}

/// Map a wire parameter key to its property name.
fn property_for_key(key: &str) -> Option<&'static str> {
    Some(match key {
        "CALPPM" => property::PPM,
        "PA" => property::PICO_AMPS,
        "PAOFF" => property::PA_OFFSET,
        "HPH2" => property::HP_H2,
        "LPH2" => property::LP_H2,
        "SMPPRES" => property::SAMPLE_PRESSURE,
        "SMPPPL" => property::SAMPLE_PPL,
        "CMBPRES" => property::COMBUSTION_PRESSURE,
        "CMBPPL" => property::COMBUSTION_PPL,
        "VAC" => property::VACUUM,
        "INTTEMP" => property::INTERNAL_TEMP,
        "EXTTEMP" => property::EXTERNAL_TEMP,
        "CASETEMP" => property::CASE_TEMP,
        "NDLVLV" => property::NEEDLE_VALVE,
        "HTR" => property::HEATER,
        "GP" => property::GLOW_PLUG,
        "SOL" => property::SOLENOID,
        "BATSTAT" => property::BATTERY_STATUS,
        "CHG" => property::BATTERY_CHARGE,
        "CUR" => property::CURRENT,
        "P1TGT" => property::P1_TARGET,
        "P2TGT" => property::P2_TARGET,
        "H2TGT" => property::H2_TARGET,
        "ALT" => property::ALTIMETER,
        "VLT" => property::VOLTS,
        _ => return None,
    })
}

/// Receiver worker: accumulates CR-LF lines, classifies them, and feeds
/// the buffer, the error table, and the readings pipeline.
async fn run_receiver(inner: Arc<Inner>, mut input: InputStream) {
    let mut lines = LineBuffer::new();
    let mut faults: u32 = 0;

    loop {
        tokio::select! {
            _ = inner.workers.cancel.cancelled() => break,
            result = input.read_byte() => match result {
                Ok(byte) => {
                    faults = 0;
                    if let Some(line) = lines.push(byte) {
                        handle_line(&inner, line);
                    }
                }
                Err(e) => {
                    if !inner.workers.note_fault(&mut faults, "receiver", &e) {
                        break;
                    }
                    sleep(WORKER_POLL).await;
                }
            }
        }
    }

    inner.workers.receiver_done.store(true, Ordering::SeqCst);
    debug!("receiver worker exited");
}

fn handle_line(inner: &Arc<Inner>, line: String) {
    match Message::parse(&line) {
        Ok(message) => {
            inner.resyncs.store(0, Ordering::SeqCst);
            handle_message(inner, message);
        }
        Err(super::message::LineError::Empty) => {}
        Err(e) => {
            debug!("discarding line ({}): {:?}", e, line);
            if let Some(observer) = &*inner
                .raw_observer
                .lock()
                .expect("observer lock poisoned")
            {
                observer(&line);
            }
            let resyncs = inner.resyncs.fetch_add(1, Ordering::SeqCst) + 1;
            if resyncs >= RESYNC_MAX {
                inner.resyncs.store(0, Ordering::SeqCst);
                inner.workers.events.send(DeviceEvent::Error {
                    message: Error::MalformedFrame {
                        resyncs,
                        line,
                    }
                    .to_string(),
                });
            }
        }
    }
}

fn handle_message(inner: &Arc<Inner>, message: Message) {
    {
        let mut buffer = inner.buffer.lock().expect("buffer poisoned");
        while buffer.len() >= INBOUND_BUFFER_CAP {
            buffer.pop_front();
        }
        buffer.push_back(BufferedMessage {
            message: message.clone(),
            handled: false,
        });
    }

    match message.msg_type.as_str() {
        msg::SHUT => {
            inner.workers.events.send(DeviceEvent::CommandError {
                kind: CommandErrorKind::Shutdown,
                message: "The analyzer is shutting down.".to_string(),
            });
        }
        msg::EROR | msg::SERR => handle_device_error(inner, &message),
        msg::RDNG | msg::DRVL | msg::FIDR | msg::BATS => handle_readings(inner, &message),
        _ => {}
    }
}

fn handle_device_error(inner: &Arc<Inner>, message: &Message) {
    let request = message.param("TYPE").unwrap_or_default().to_string();
    let code = message
        .param("CODE")
        .and_then(|c| c.parse::<u32>().ok())
        .unwrap_or(0);

    if !request.is_empty() {
        inner
            .errors
            .lock()
            .expect("error table poisoned")
            .insert(request.clone(), (Instant::now(), code));
    }

    if code == CODE_WARMING_UP {
        // Fetch the remaining warmup time off the receiver path; waiting
        // for the WUTM reply here would deadlock the worker that must
        // deliver it.
        let inner = Arc::clone(inner);
        tokio::spawn(async move {
            let warmup = inner
                .send_and_receive(
                    Message::new(msg::WUTM),
                    inner.config.response_timeout,
                    "warmup_time",
                )
                .await
                .ok()
                .and_then(|reply| reply.param("SEC").and_then(|s| s.parse::<u32>().ok()));
            inner.workers.events.send(DeviceEvent::CommandError {
                kind: CommandErrorKind::Message,
                message: describe(CODE_WARMING_UP, warmup),
            });
        });
    } else {
        inner.workers.events.send(DeviceEvent::CommandError {
            kind: CommandErrorKind::Message,
            message: describe(code, None),
        });
    }

    if request == msg::AIGS {
        inner.workers.events.send(DeviceEvent::CommandError {
            kind: CommandErrorKind::AutoIgnitionSequence,
            message: describe(code, None),
        });
    }
}

fn handle_readings(inner: &Arc<Inner>, message: &Message) {
    let mut ppm = None;
    {
        let mut status = inner.status.lock().expect("status poisoned");
        for (key, value) in &message.parameters {
            if let Some(prop) = property_for_key(key) {
                status.insert(prop.to_string(), value.clone());
            }
        }
        if let Some(cal) = message.param("CALPPM") {
            let ignited = cal != FLAME_OUT_PPM;
            status.insert(property::IS_IGNITED.to_string(), ignited.to_string());
            ppm = cal.parse::<f64>().ok();
        }
        status.insert(
            property::TIMESTAMP.to_string(),
            OffsetDateTime::now_utc().to_string(),
        );
    }

    if let Some(value) = ppm {
        if value >= 0.0 {
            let mut history = inner.last_ppms.lock().expect("ppm history poisoned");
            history.push_back(value);
            while history.len() > inner.config.ppm_history {
                history.pop_front();
            }
        }
    }

    // One event per device tick: only the most selective enabled stream
    // fires, so enabling several streams does not double-report.
    if inner.most_selective_enabled() == Some(message.msg_type.as_str()) {
        let properties = inner.status.lock().expect("status poisoned").clone();
        let ppm = properties
            .get(property::PPM)
            .and_then(|p| p.parse::<f64>().ok())
            .unwrap_or(-1.0);
        inner
            .workers
            .events
            .send(DeviceEvent::DataPolled { properties, ppm });
    }
}

/// Heartbeat worker: a CHEK roughly every 900 ms until shutdown.
/// Failures are swallowed; the fault budget belongs to the sender.
async fn run_heartbeat(inner: Arc<Inner>) {
    loop {
        tokio::select! {
            _ = inner.workers.cancel.cancelled() => break,
            _ = sleep(inner.config.heartbeat_interval) => {
                if inner.enqueue(&Message::new(msg::CHEK)).is_err() {
                    break;
                }
            }
        }
    }
    inner.heartbeat_done.store(true, Ordering::SeqCst);
    debug!("heartbeat worker exited");
}
