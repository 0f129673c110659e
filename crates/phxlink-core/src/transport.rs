//! Shared transport-worker plumbing for both engines.
//!
//! Each engine runs a sender and a receiver worker (phx42 adds a
//! heartbeat). The pieces they share live here: the consecutive-fault
//! budget, the sender loop, and the shutdown handshake. A single
//! cancellation token coordinates exit; the sender exits only after the
//! receiver, so a final command queued during shutdown still reaches the
//! wire.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::Error;
use crate::events::{DeviceEvent, EventDispatcher};
use crate::stream::OutputStream;

/// Consecutive transport faults a worker tolerates before terminating the
/// engine with a reconnect request.
pub(crate) const MAX_TRANSPORT_FAULTS: u32 = 10;
/// Short poll used by workers waiting on a flag or correlator entry.
pub(crate) const WORKER_POLL: Duration = Duration::from_millis(20);
/// How often shutdown re-checks that the workers have exited.
pub(crate) const SHUTDOWN_PULSE: Duration = Duration::from_millis(500);
/// Upper bound on shutdown pulses before giving up with a warning.
pub(crate) const SHUTDOWN_PULSES_MAX: u32 = 20;

/// State the transport workers of one engine share.
pub(crate) struct WorkerShared {
    pub cancel: CancellationToken,
    pub events: EventDispatcher,
    /// When set, transport faults are the expected tail of an orderly
    /// disconnect and are absorbed silently.
    pub suppress_faults: AtomicBool,
    pub receiver_done: AtomicBool,
    pub sender_done: AtomicBool,
}

impl WorkerShared {
    pub fn new(events: EventDispatcher) -> Self {
        Self {
            cancel: CancellationToken::new(),
            events,
            suppress_faults: AtomicBool::new(false),
            receiver_done: AtomicBool::new(false),
            sender_done: AtomicBool::new(false),
        }
    }

    /// Count a transport fault, surface it, and terminate the engine after
    /// the budget is spent. Returns `false` when the worker should stop.
    pub fn note_fault(&self, faults: &mut u32, worker: &str, error: &std::io::Error) -> bool {
        if self.suppress_faults.load(Ordering::SeqCst) {
            debug!("{} fault after goodbye (expected): {}", worker, error);
            return true;
        }

        *faults += 1;
        debug!(
            "{} transport fault {}/{}: {}",
            worker, faults, MAX_TRANSPORT_FAULTS, error
        );
        self.events.send(DeviceEvent::Error {
            message: format!("{} transport fault: {}", worker, error),
        });

        if *faults >= MAX_TRANSPORT_FAULTS {
            warn!(
                "{} exceeded transport fault budget, requesting reconnect",
                worker
            );
            self.events.send(DeviceEvent::Error {
                message: Error::ReconnectNeeded {
                    consecutive_faults: *faults,
                }
                .to_string(),
            });
            self.cancel.cancel();
            return false;
        }
        true
    }

    /// Wait until both workers have observed the shutdown flag and exited,
    /// checking in 500 ms pulses.
    pub async fn wait_for_workers(&self) {
        let mut pulses = 0;
        while !(self.sender_done.load(Ordering::SeqCst)
            && self.receiver_done.load(Ordering::SeqCst))
        {
            pulses += 1;
            if pulses > SHUTDOWN_PULSES_MAX {
                warn!("transport workers did not exit cleanly");
                break;
            }
            sleep(SHUTDOWN_PULSE).await;
        }
    }
}

/// Sender worker: owns the output stream and drains the queue in enqueue
/// order. On shutdown it flushes whatever is still queued, then exits only
/// after the receiver has exited.
pub(crate) async fn run_sender(
    shared: Arc<WorkerShared>,
    mut output: OutputStream,
    mut queue: mpsc::UnboundedReceiver<Vec<u8>>,
) {
    let mut faults: u32 = 0;

    loop {
        tokio::select! {
            _ = shared.cancel.cancelled() => break,
            maybe = queue.recv() => match maybe {
                Some(bytes) => write_out(&shared, &mut output, &bytes, &mut faults).await,
                None => break,
            }
        }
    }

    while let Ok(bytes) = queue.try_recv() {
        write_out(&shared, &mut output, &bytes, &mut faults).await;
    }

    let mut pulses = 0;
    while !shared.receiver_done.load(Ordering::SeqCst) && pulses < 500 {
        pulses += 1;
        sleep(WORKER_POLL).await;
    }

    shared.sender_done.store(true, Ordering::SeqCst);
    debug!("sender worker exited");
}

async fn write_out(
    shared: &Arc<WorkerShared>,
    output: &mut OutputStream,
    bytes: &[u8],
    faults: &mut u32,
) {
    match output.write_all(bytes).await {
        Ok(()) => *faults = 0,
        Err(e) => {
            shared.note_fault(faults, "sender", &e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_budget_cancels_engine() {
        let shared = WorkerShared::new(EventDispatcher::new(10));
        let mut faults = 0;
        let err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone");
        for i in 1..MAX_TRANSPORT_FAULTS {
            assert!(shared.note_fault(&mut faults, "receiver", &err));
            assert_eq!(faults, i);
        }
        assert!(!shared.note_fault(&mut faults, "receiver", &err));
        assert!(shared.cancel.is_cancelled());
    }

    #[test]
    fn test_faults_suppressed_after_goodbye() {
        let shared = WorkerShared::new(EventDispatcher::new(10));
        shared.suppress_faults.store(true, Ordering::SeqCst);
        let mut faults = 0;
        let err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone");
        for _ in 0..50 {
            assert!(shared.note_fault(&mut faults, "sender", &err));
        }
        assert_eq!(faults, 0);
        assert!(!shared.cancel.is_cancelled());
    }
}
