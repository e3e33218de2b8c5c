//! Double-buffered bulk transfers.
//!
//! Each slot owns one transfer buffer and a worker thread. Submitting hands
//! the buffer to the worker through a channel; the completion message hands
//! it back. While a transfer is in flight the slot holds no buffer, so the
//! encoder cannot touch memory the transport is still reading. A watchdog
//! thread per slot cancels transfers that run past their deadline.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};

use crate::config::PipelineConfig;
use crate::error::{Error, Result, TransportError};
use crate::transport::{CancelReason, CancelToken, Transport};

pub const SLOT_COUNT: usize = 2;

/// Packet bytes plus a one-line scratch area for pixel conversion.
#[derive(Debug)]
pub struct TransferBuffer {
    data: Vec<u8>,
    line: Vec<u32>,
}

impl TransferBuffer {
    pub fn new(capacity: usize, line_pixels: usize) -> Result<Self> {
        let mut data = Vec::new();
        data.try_reserve_exact(capacity)
            .map_err(|_| Error::Allocation(capacity))?;
        data.resize(capacity, 0);

        let mut line = Vec::new();
        line.try_reserve_exact(line_pixels)
            .map_err(|_| Error::Allocation(line_pixels * 4))?;
        line.resize(line_pixels, 0);

        Ok(Self { data, line })
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn line_capacity(&self) -> usize {
        self.line.len()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn split_mut(&mut self) -> (&mut [u8], &mut [u32]) {
        (&mut self.data, &mut self.line)
    }
}

/// How the last transfer on a slot ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    Completed { bytes: usize },
    TimedOut,
    Cancelled,
    Failed(TransportError),
}

impl TransferOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TransferOutcome::Completed { .. })
    }

    pub fn into_result(self, timeout: Duration) -> Result<usize> {
        match self {
            TransferOutcome::Completed { bytes } => Ok(bytes),
            TransferOutcome::TimedOut => Err(Error::Timeout(timeout)),
            TransferOutcome::Cancelled => Err(TransportError::Cancelled.into()),
            TransferOutcome::Failed(e) => Err(e.into()),
        }
    }
}

struct Job {
    buffer: TransferBuffer,
    len: usize,
    cancel: CancelToken,
}

struct Completion {
    buffer: TransferBuffer,
    outcome: TransferOutcome,
}

enum WatchdogEvent {
    Arm(CancelToken),
    Disarm,
}

struct TransferWorker {
    slot: usize,
    transport: Arc<dyn Transport>,
    endpoint: u8,
    jobs: Receiver<Job>,
    done: Sender<Completion>,
    watchdog: Sender<WatchdogEvent>,
}

impl TransferWorker {
    fn run(self) {
        while let Ok(job) = self.jobs.recv() {
            let completion = self.execute(job);
            if self.done.send(completion).is_err() {
                break;
            }
        }
        log::trace!("slot {} worker exiting", self.slot);
    }

    fn execute(&self, job: Job) -> Completion {
        let Job { buffer, len, cancel } = job;
        let _ = self.watchdog.send(WatchdogEvent::Arm(cancel.clone()));
        let result = self
            .transport
            .bulk_out(self.endpoint, &buffer.as_slice()[..len], &cancel);
        // The watchdog may already have fired; Disarm is then ignored.
        let _ = self.watchdog.send(WatchdogEvent::Disarm);

        let outcome = match result {
            Ok(bytes) => TransferOutcome::Completed { bytes },
            Err(e) => match cancel.reason() {
                Some(CancelReason::Deadline) => TransferOutcome::TimedOut,
                Some(CancelReason::Requested) => TransferOutcome::Cancelled,
                None => TransferOutcome::Failed(e),
            },
        };
        Completion { buffer, outcome }
    }
}

fn run_watchdog(slot: usize, events: Receiver<WatchdogEvent>, timeout: Duration) {
    while let Ok(event) = events.recv() {
        let WatchdogEvent::Arm(token) = event else {
            continue;
        };
        match events.recv_timeout(timeout) {
            Ok(_) => {}
            Err(RecvTimeoutError::Timeout) => {
                if token.cancel(CancelReason::Deadline) {
                    log::warn!("slot {slot}: bulk transfer exceeded {timeout:?}, cancelling");
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

/// One half of the double buffer.
pub struct TransferSlot {
    index: usize,
    buffer: Option<TransferBuffer>,
    in_flight: Option<CancelToken>,
    last_outcome: Option<TransferOutcome>,
    jobs: Option<Sender<Job>>,
    done: Receiver<Completion>,
    worker: Option<JoinHandle<()>>,
    watchdog: Option<JoinHandle<()>>,
    worker_lost: bool,
    detach_wait: Duration,
}

impl TransferSlot {
    pub fn new(
        index: usize,
        name: &str,
        transport: Arc<dyn Transport>,
        config: &PipelineConfig,
    ) -> Result<Self> {
        let buffer = TransferBuffer::new(config.buffer_capacity(), config.line_capacity())?;

        let (job_tx, job_rx) = crossbeam_channel::bounded(1);
        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        let (watch_tx, watch_rx) = crossbeam_channel::unbounded();

        let timeout = config.transfer_timeout;
        let watchdog = thread::Builder::new()
            .name(format!("{name}-watchdog{index}"))
            .spawn(move || run_watchdog(index, watch_rx, timeout))
            .map_err(Error::Spawn)?;

        let worker = TransferWorker {
            slot: index,
            transport,
            endpoint: config.bulk_endpoint,
            jobs: job_rx,
            done: done_tx,
            watchdog: watch_tx,
        };
        let worker = thread::Builder::new()
            .name(format!("{name}-xfer{index}"))
            .spawn(move || worker.run())
            .map_err(Error::Spawn)?;

        Ok(Self {
            index,
            buffer: Some(buffer),
            in_flight: None,
            last_outcome: None,
            jobs: Some(job_tx),
            done: done_rx,
            worker: Some(worker),
            watchdog: Some(watchdog),
            worker_lost: false,
            detach_wait: config.detach_wait,
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// The slot's buffer, unless a transfer still owns it.
    pub fn buffer_mut(&mut self) -> Result<&mut TransferBuffer> {
        self.buffer.as_mut().ok_or(Error::SlotBusy(self.index))
    }

    /// Queue the first `len` bytes of the buffer for transmission.
    pub fn submit(&mut self, len: usize) -> Result<()> {
        let buffer = self.buffer.take().ok_or(Error::SlotBusy(self.index))?;
        if len > buffer.capacity() {
            let capacity = buffer.capacity();
            self.buffer = Some(buffer);
            return Err(Error::LengthExceedsBuffer { len, capacity });
        }
        let Some(jobs) = &self.jobs else {
            self.buffer = Some(buffer);
            return Err(Error::WorkerGone(self.index));
        };

        let cancel = CancelToken::new();
        match jobs.send(Job {
            buffer,
            len,
            cancel: cancel.clone(),
        }) {
            Ok(()) => {
                log::trace!("slot {} submitted {len} bytes", self.index);
                self.in_flight = Some(cancel);
                self.last_outcome = None;
                Ok(())
            }
            Err(err) => {
                self.buffer = Some(err.into_inner().buffer);
                Err(Error::WorkerGone(self.index))
            }
        }
    }

    /// Non-blocking completion check.
    pub fn is_complete(&mut self) -> bool {
        if self.buffer.is_some() {
            return true;
        }
        match self.done.try_recv() {
            Ok(completion) => {
                self.reclaim(completion);
                true
            }
            Err(TryRecvError::Empty) => false,
            Err(TryRecvError::Disconnected) => {
                self.mark_worker_lost();
                false
            }
        }
    }

    fn mark_worker_lost(&mut self) {
        if !self.worker_lost {
            self.worker_lost = true;
            log::error!("slot {}: worker stopped while owning the buffer", self.index);
        }
    }

    /// The worker died holding the buffer; the slot can never complete.
    pub fn is_worker_lost(&self) -> bool {
        self.worker_lost
    }

    /// Block up to `timeout` for the in-flight transfer to finish.
    pub fn wait_complete(&mut self, timeout: Duration) -> bool {
        if self.buffer.is_some() {
            return true;
        }
        match self.done.recv_timeout(timeout) {
            Ok(completion) => {
                self.reclaim(completion);
                true
            }
            Err(RecvTimeoutError::Timeout) => false,
            Err(RecvTimeoutError::Disconnected) => {
                self.mark_worker_lost();
                false
            }
        }
    }

    fn reclaim(&mut self, completion: Completion) {
        match &completion.outcome {
            TransferOutcome::Completed { bytes } => {
                log::trace!("slot {} sent {bytes} bytes", self.index)
            }
            TransferOutcome::TimedOut => log::warn!("slot {}: transfer timed out", self.index),
            TransferOutcome::Cancelled => log::debug!("slot {}: transfer cancelled", self.index),
            TransferOutcome::Failed(e) => log::warn!("slot {}: transfer failed: {e}", self.index),
        }
        self.buffer = Some(completion.buffer);
        self.in_flight = None;
        self.last_outcome = Some(completion.outcome);
    }

    pub fn last_outcome(&self) -> Option<&TransferOutcome> {
        self.last_outcome.as_ref()
    }

    /// Ask the in-flight transfer to stop. Returns false if nothing was
    /// cancelled.
    pub fn cancel(&self) -> bool {
        self.in_flight
            .as_ref()
            .is_some_and(|token| token.cancel(CancelReason::Requested))
    }

    /// Cancel, wait up to `wait` for the buffer to come back, and stop the
    /// threads. Returns false if the transport never returned the buffer;
    /// the worker then keeps it and is left detached.
    pub fn shutdown(&mut self, wait: Duration) -> bool {
        if !self.is_complete() {
            self.cancel();
            if !self.wait_complete(wait) {
                log::error!(
                    "slot {}: transfer still running after {wait:?}, abandoning worker",
                    self.index
                );
            }
        }
        self.jobs = None;

        let reclaimed = self.buffer.take().is_some();
        if reclaimed {
            for handle in [self.worker.take(), self.watchdog.take()].into_iter().flatten() {
                if handle.join().is_err() {
                    log::error!("slot {}: transfer thread panicked", self.index);
                }
            }
        } else {
            self.worker = None;
            self.watchdog = None;
        }
        reclaimed
    }
}

impl Drop for TransferSlot {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.shutdown(self.detach_wait);
        }
    }
}

/// Both slots of one device.
pub struct TransferScheduler {
    slots: [TransferSlot; SLOT_COUNT],
}

impl TransferScheduler {
    /// Allocates both buffers up front; failure here is fatal for attach.
    pub fn new(name: &str, transport: Arc<dyn Transport>, config: &PipelineConfig) -> Result<Self> {
        let first = TransferSlot::new(0, name, transport.clone(), config)?;
        let second = TransferSlot::new(1, name, transport, config)?;
        Ok(Self {
            slots: [first, second],
        })
    }

    pub fn slot(&self, index: usize) -> &TransferSlot {
        &self.slots[index % SLOT_COUNT]
    }

    pub fn slot_mut(&mut self, index: usize) -> &mut TransferSlot {
        &mut self.slots[index % SLOT_COUNT]
    }

    pub fn submit(&mut self, index: usize, len: usize) -> Result<()> {
        self.slot_mut(index).submit(len)
    }

    pub fn is_complete(&mut self, index: usize) -> bool {
        self.slot_mut(index).is_complete()
    }

    pub fn wait_complete(&mut self, index: usize, timeout: Duration) -> bool {
        self.slot_mut(index).wait_complete(timeout)
    }

    /// Wait for every slot to go idle, sharing one deadline.
    pub fn wait_idle(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        self.slots.iter_mut().all(|slot| {
            let left = deadline.saturating_duration_since(Instant::now());
            slot.wait_complete(left)
        })
    }

    /// Cancel everything in flight, then release both slots within one
    /// shared `wait`. Returns true when every buffer was reclaimed.
    pub fn shutdown(&mut self, wait: Duration) -> bool {
        for slot in &self.slots {
            slot.cancel();
        }
        let deadline = Instant::now() + wait;
        let mut clean = true;
        for slot in &mut self.slots {
            let left = deadline.saturating_duration_since(Instant::now());
            clean &= slot.shutdown(left);
        }
        clean
    }
}
