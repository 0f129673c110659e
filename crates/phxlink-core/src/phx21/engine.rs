//! The phx21 protocol engine.
//!
//! Two workers share the engine state: the sender drains the outbound
//! queue into the output stream, the receiver deframes the input stream
//! into a latest-by-command registry. Callers correlate responses by
//! polling the registry for an entry stamped after their send time. A
//! third, optional task drives periodic status polling.
//!
//! Shutdown discipline: cancelling the engine token stops the polling
//! task, then the receiver (once no poll is in flight), then the sender
//! (once its queue is drained and the receiver has exited, so a final
//! GOODBYE still reaches the wire).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use phxlink_types::{DeviceKind, Phx21Status, RangeMode, PHX21_STATUS_EXTENDED_LEN};

use super::commands::{
    self, AutoIgnitionSequence, DeadheadParams, H2PressureCompensation, IntegrationControl,
    PumpAClosedLoop, PumpAux1Control, SamplingParameters,
};
use super::control::{AveragingConfig, ControlAction, DataPlane, HW_AVG_FAST};
use super::frame::{expect_payload, Deframer, Frame};
use crate::error::{Error, Result};
use crate::events::{DeviceEvent, EventDispatcher, EventReceiver};
use crate::retry::{with_retry, RetryConfig};
use crate::stream::{InputStream, OutputStream, StreamCounter};
use crate::traits::Analyzer;
use crate::transport::{run_sender, WorkerShared, WORKER_POLL};

/// Settle time after a range switch before the next sample is trusted.
const RANGE_SETTLE: Duration = Duration::from_millis(250);

/// Configuration for a phx21 engine.
#[derive(Debug, Clone)]
pub struct Phx21Config {
    /// Default periodic polling interval in milliseconds.
    pub poll_interval_ms: u64,
    /// Deadline for correlated replies.
    pub response_timeout: Duration,
    /// Deadline for slow operations (configuration reads).
    pub long_response_timeout: Duration,
    /// Sliding-window averaging knobs.
    pub averaging: AveragingConfig,
    /// Event channel capacity.
    pub event_capacity: usize,
}

impl Default for Phx21Config {
    fn default() -> Self {
        Self {
            poll_interval_ms: 250,
            response_timeout: Duration::from_millis(2000),
            long_response_timeout: Duration::from_millis(5000),
            averaging: AveragingConfig::default(),
            event_capacity: 100,
        }
    }
}

impl Phx21Config {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(Error::invalid_config("poll_interval_ms must be > 0"));
        }
        if self.response_timeout.is_zero() {
            return Err(Error::invalid_config("response_timeout must be > 0"));
        }
        if self.event_capacity == 0 {
            return Err(Error::invalid_config("event_capacity must be > 0"));
        }
        Ok(())
    }
}

/// A deframed response with its arrival time.
struct InboundFrame {
    frame: Frame,
    at: Instant,
}

struct Inner {
    config: Phx21Config,
    /// Latest response per command id; a burst of same-type replies keeps
    /// only the newest (the device does not pipeline same-type replies).
    registry: Mutex<HashMap<u8, InboundFrame>>,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    workers: Arc<WorkerShared>,
    poll_in_flight: AtomicBool,
    plane: Mutex<DataPlane>,
    latest: Mutex<Option<Phx21Status>>,
}

impl Inner {
    /// Enqueue a whole frame atomically; delivery order is enqueue order.
    fn enqueue(&self, frame: Frame) -> Result<()> {
        if self.workers.cancel.is_cancelled() {
            return Err(Error::EngineStopped);
        }
        self.outbound
            .send(frame.into_bytes())
            .map_err(|_| Error::EngineStopped)
    }

    /// Enqueue a command and wait for a response of the same command id
    /// stamped at or after the send time.
    async fn send_and_receive(
        &self,
        frame: Frame,
        timeout: Duration,
        operation: &str,
    ) -> Result<Frame> {
        let cmd_id = frame.cmd_id();
        let send_time = Instant::now();
        self.enqueue(frame)?;

        loop {
            if let Some(found) = {
                let registry = self.registry.lock().expect("registry poisoned");
                registry
                    .get(&cmd_id)
                    .filter(|entry| entry.at >= send_time)
                    .map(|entry| entry.frame.clone())
            } {
                return Ok(found);
            }
            if send_time.elapsed() >= timeout {
                return Err(Error::timeout(operation, timeout));
            }
            sleep(WORKER_POLL).await;
        }
    }
}

/// Engine for the older-generation phx21 analyzer (binary framed protocol).
///
/// Construct with [`Phx21::start`], which takes exclusive ownership of both
/// stream halves, spawns the workers, and runs the device setup sequence.
/// Call [`Phx21::shutdown`] for an orderly exit.
pub struct Phx21 {
    inner: Arc<Inner>,
    rx_counter: StreamCounter,
    tx_counter: StreamCounter,
    worker_handles: Mutex<Vec<JoinHandle<()>>>,
    poll_task: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl std::fmt::Debug for Phx21 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Phx21")
            .field("bytes_sent", &self.tx_counter.bytes())
            .field("bytes_received", &self.rx_counter.bytes())
            .finish_non_exhaustive()
    }
}

impl Phx21 {
    /// Start an engine over the given streams with default configuration.
    pub async fn start(input: InputStream, output: OutputStream) -> Result<Self> {
        Self::start_with_config(input, output, Phx21Config::default()).await
    }

    /// Start an engine with custom configuration.
    ///
    /// Spawns the sender and receiver workers, then runs the fixed setup
    /// sequence; a step that still fails after its retries fails
    /// construction and tears the workers down.
    pub async fn start_with_config(
        input: InputStream,
        output: OutputStream,
        config: Phx21Config,
    ) -> Result<Self> {
        config.validate()?;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let rx_counter = input.counter();
        let tx_counter = output.counter();
        let workers = Arc::new(WorkerShared::new(EventDispatcher::new(config.event_capacity)));

        let inner = Arc::new(Inner {
            plane: Mutex::new(DataPlane::new(config.averaging.clone())),
            config,
            registry: Mutex::new(HashMap::new()),
            outbound: outbound_tx,
            workers: Arc::clone(&workers),
            poll_in_flight: AtomicBool::new(false),
            latest: Mutex::new(None),
        });

        let receiver = tokio::spawn(run_receiver(Arc::clone(&inner), input));
        let sender = tokio::spawn(run_sender(workers, output, outbound_rx));

        let engine = Self {
            inner,
            rx_counter,
            tx_counter,
            worker_handles: Mutex::new(vec![receiver, sender]),
            poll_task: Mutex::new(None),
        };

        if let Err(e) = engine.run_setup_sequence().await {
            warn!("phx21 setup sequence failed: {}", e);
            engine.inner.workers.cancel.cancel();
            return Err(e);
        }
        info!("phx21 engine started");
        Ok(engine)
    }

    /// The fixed, ordered setup sequence; each step retried three times
    /// with a flat 100 ms pause.
    async fn run_setup_sequence(&self) -> Result<()> {
        let retry = RetryConfig::for_init();
        let timeout = self.inner.config.response_timeout;

        with_retry(&retry, "set_sampling_parameters", || {
            self.inner.send_and_receive(
                SamplingParameters {
                    range: RangeMode::Lo as u8,
                }
                .encode(),
                timeout,
                "set_sampling_parameters",
            )
        })
        .await?;

        with_retry(&retry, "integration_control", || {
            self.inner.send_and_receive(
                IntegrationControl::setup(HW_AVG_FAST).encode(),
                timeout,
                "integration_control",
            )
        })
        .await?;

        with_retry(&retry, "set_deadhead_params", || {
            self.inner.send_and_receive(
                DeadheadParams {
                    enable: true,
                    pressure_limit: 150,
                    timeout: 100,
                }
                .encode(),
                timeout,
                "set_deadhead_params",
            )
        })
        .await?;

        with_retry(&retry, "set_cal_h2pres_compensation", || {
            self.inner.send_and_receive(
                H2PressureCompensation {
                    pos_per_thousand: -3000,
                    neg_per_thousand: 3000,
                }
                .encode(),
                timeout,
                "set_cal_h2pres_compensation",
            )
        })
        .await
        .map(|_| ())
    }

    /// Subscribe to engine events.
    pub fn subscribe(&self) -> EventReceiver {
        self.inner.workers.events.subscribe()
    }

    /// Begin periodic status polling at the given interval; `0` selects
    /// the configured default.
    ///
    /// A tick that finds the previous one still in flight is skipped.
    /// Decode failures during a tick are logged and swallowed; the next
    /// tick tries again.
    pub fn start_polling_data(&self, interval_ms: u64) {
        let interval_ms = if interval_ms == 0 {
            self.inner.config.poll_interval_ms
        } else {
            interval_ms
        };

        let mut slot = self.poll_task.lock().expect("poll task lock poisoned");
        if let Some((token, _)) = slot.take() {
            token.cancel();
        }

        let token = self.inner.workers.cancel.child_token();
        let task_token = token.clone();
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms.max(1)));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = task_token.cancelled() => {
                        debug!("polling task stopping");
                        break;
                    }
                    _ = ticker.tick() => {
                        poll_tick(&inner).await;
                    }
                }
            }
        });
        *slot = Some((token, handle));
    }

    /// Stop periodic status polling.
    pub fn stop_polling_data(&self) {
        if let Some((token, _)) = self
            .poll_task
            .lock()
            .expect("poll task lock poisoned")
            .take()
        {
            token.cancel();
        }
    }

    /// Start (`true`) or stop (`false`) the automatic ignition sequence.
    ///
    /// Fire-and-forget: the response is not awaited; a failure surfaces
    /// as an `Error` event from the workers.
    pub fn ignite(&self, on: bool) -> Result<()> {
        self.inner
            .enqueue(AutoIgnitionSequence::recipe(on).encode())
    }

    /// Announce an orderly disconnect. Transport errors after this are
    /// expected and silently absorbed.
    pub fn send_goodbye(&self) -> Result<()> {
        self.inner
            .workers
            .suppress_faults
            .store(true, Ordering::SeqCst);
        self.inner.enqueue(commands::goodbye())
    }

    /// Read the firmware version from the device configuration.
    pub async fn get_firmware_version(&self) -> Result<String> {
        let frame = self
            .inner
            .send_and_receive(
                commands::configuration_read(),
                self.inner.config.long_response_timeout,
                "configuration_read",
            )
            .await?;
        let payload = expect_payload(&frame, 2)?;
        Ok(format!("{}.{}", payload[0], payload[1]))
    }

    /// The most recent fully processed status, if any.
    pub fn latest_status(&self) -> Option<Phx21Status> {
        self.inner
            .latest
            .lock()
            .expect("status lock poisoned")
            .clone()
    }

    /// Whether the last processed status showed steady combustion.
    pub fn is_ignited(&self) -> bool {
        self.latest_status().map(|s| s.is_ignited).unwrap_or(false)
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

    /// Stop the workers and wait until both have observed the shutdown
    /// flag and exited.
    pub async fn shutdown(&self) {
        self.stop_polling_data();
        self.inner.workers.cancel.cancel();
        self.inner.workers.wait_for_workers().await;

        for handle in self
            .worker_handles
            .lock()
            .expect("handles poisoned")
            .drain(..)
        {
            handle.abort();
        }
        info!("phx21 engine stopped");
    }
}

impl Drop for Phx21 {
    fn drop(&mut self) {
        // Workers must not outlive the engine if shutdown was skipped.
        self.inner.workers.cancel.cancel();
    }
}

#[async_trait]
impl Analyzer for Phx21 {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Phx21
    }

    fn subscribe(&self) -> EventReceiver {
        Phx21::subscribe(self)
    }

    async fn start_polling_data(&self, interval_ms: u64) -> Result<()> {
        Phx21::start_polling_data(self, interval_ms);
        Ok(())
    }

    async fn stop_polling_data(&self) -> Result<()> {
        Phx21::stop_polling_data(self);
        Ok(())
    }

    async fn ignite(&self, on: bool) -> Result<()> {
        Phx21::ignite(self, on)
    }

    async fn get_firmware_version(&self) -> Result<String> {
        Phx21::get_firmware_version(self).await
    }

    async fn shutdown(&self) -> Result<()> {
        Phx21::shutdown(self).await;
        Ok(())
    }
}

/// One periodic tick: request, decode, run the control pass, emit.
async fn poll_tick(inner: &Arc<Inner>) {
    if inner
        .poll_in_flight
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        debug!("previous poll still in flight, skipping tick");
        return;
    }
    let result = poll_once(inner).await;
    inner.poll_in_flight.store(false, Ordering::SeqCst);
    if let Err(e) = result {
        debug!("poll tick failed: {}", e);
    }
}

async fn poll_once(inner: &Arc<Inner>) -> Result<()> {
    let frame = inner
        .send_and_receive(
            commands::read_data_extended(),
            inner.config.response_timeout,
            "read_data_extended",
        )
        .await?;

    let payload = expect_payload(&frame, PHX21_STATUS_EXTENDED_LEN)?;
    let raw = Phx21Status::from_bytes(payload)?;

    let processed = inner
        .plane
        .lock()
        .expect("data plane lock poisoned")
        .process(raw)?;

    for action in &processed.actions {
        apply_action(inner, action).await;
    }

    *inner.latest.lock().expect("status lock poisoned") = Some(processed.status.clone());

    let properties = processed.status.to_property_map(processed.reported_ppm);
    let ppm = processed.reported_ppm.unwrap_or(-1.0);
    inner
        .workers
        .events
        .send(DeviceEvent::DataPolled { properties, ppm });
    Ok(())
}

async fn apply_action(inner: &Arc<Inner>, action: &ControlAction) {
    let outcome = match action {
        ControlAction::SwitchRange(mode) => {
            debug!("switching FID range to {:?}", mode);
            let result = inner.enqueue(SamplingParameters { range: *mode as u8 }.encode());
            if result.is_ok() {
                sleep(RANGE_SETTLE).await;
            }
            result
        }
        ControlAction::SetHardwareAveraging(samples) => {
            debug!("hardware averaging -> {} samples", samples);
            inner.enqueue(IntegrationControl::setup(*samples).encode())
        }
        ControlAction::PumpSafetyCutoff => {
            warn!("pump power at cutoff while ignited, stopping pumps");
            let first = inner.enqueue(
                PumpAClosedLoop {
                    enable: false,
                    target_hpsi: 0,
                }
                .encode(),
            );
            let second = inner.enqueue(
                PumpAux1Control {
                    pump_id: 0,
                    power: 0,
                    kick: 0,
                }
                .encode(),
            );
            inner.workers.events.send(DeviceEvent::Error {
                message: "pump power limit reached while ignited; pumps stopped".to_string(),
            });
            first.and(second)
        }
    };
    if let Err(e) = outcome {
        debug!("control action failed: {}", e);
    }
}

/// Receiver worker: owns the input stream, deframes into the registry.
/// Exits once shutdown is requested and no poll is in flight.
async fn run_receiver(inner: Arc<Inner>, mut input: InputStream) {
    let mut deframer = Deframer::for_responses();
    let mut faults: u32 = 0;

    loop {
        tokio::select! {
            _ = inner.workers.cancel.cancelled() => {
                let mut pulses = 0;
                while inner.poll_in_flight.load(Ordering::SeqCst) && pulses < 500 {
                    pulses += 1;
                    sleep(WORKER_POLL).await;
                }
                break;
            }
            result = input.read_byte() => match result {
                Ok(byte) => {
                    faults = 0;
                    if let Some(frame) = deframer.push(byte) {
                        let mut registry = inner.registry.lock().expect("registry poisoned");
                        registry.insert(frame.cmd_id(), InboundFrame {
                            frame,
                            at: Instant::now(),
                        });
                    }
                }
                Err(e) => {
                    if !inner.workers.note_fault(&mut faults, "receiver", &e) {
                        break;
                    }
                    // Don't spin on a persistently dead stream
                    sleep(WORKER_POLL).await;
                }
            }
        }
    }

    inner.workers.receiver_done.store(true, Ordering::SeqCst);
    debug!("receiver worker exited");
}
