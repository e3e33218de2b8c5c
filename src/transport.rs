//! Boundary to the USB stack: a control channel, one bulk-out pipe and a
//! clock. Everything above this module is transport agnostic.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::error::TransportError;

/// HID class SET_REPORT, used for every outbound register packet.
pub const HID_REQ_SET_REPORT: u8 = 0x09;
/// HID class GET_REPORT, used to fetch a register read response.
pub const HID_REQ_GET_REPORT: u8 = 0x01;
/// Feature report, id 0.
pub const REPORT_VALUE: u16 = 0x0300;
pub const REPORT_INDEX: u16 = 0;

/// A device the core can talk to.
///
/// Control exchanges are synchronous. `bulk_out` blocks the calling worker
/// until the data is written, an error occurs, or `cancel` fires;
/// implementations must poll `cancel` and return
/// [`TransportError::Cancelled`] promptly once it is set.
pub trait Transport: Send + Sync {
    fn control_out(
        &self,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, TransportError>;

    fn control_in(
        &self,
        request: u8,
        value: u16,
        index: u16,
        data: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, TransportError>;

    fn bulk_out(
        &self,
        endpoint: u8,
        data: &[u8],
        cancel: &CancelToken,
    ) -> Result<usize, TransportError>;
}

/// Why a transfer was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The per-transfer deadline expired.
    Deadline,
    /// Cancelled explicitly, e.g. on detach.
    Requested,
}

const NOT_CANCELLED: u8 = 0;
const CANCEL_DEADLINE: u8 = 1;
const CANCEL_REQUESTED: u8 = 2;

/// Shared cancellation flag for one in-flight transfer. The first reason
/// recorded wins.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    state: Arc<AtomicU8>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the token was already cancelled.
    pub fn cancel(&self, reason: CancelReason) -> bool {
        let code = match reason {
            CancelReason::Deadline => CANCEL_DEADLINE,
            CancelReason::Requested => CANCEL_REQUESTED,
        };
        self.state
            .compare_exchange(NOT_CANCELLED, code, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.load(Ordering::Acquire) != NOT_CANCELLED
    }

    pub fn reason(&self) -> Option<CancelReason> {
        match self.state.load(Ordering::Acquire) {
            CANCEL_DEADLINE => Some(CancelReason::Deadline),
            CANCEL_REQUESTED => Some(CancelReason::Requested),
            _ => None,
        }
    }
}

/// Monotonic time source used for frame pacing.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    base: Instant,
    offset: Mutex<Duration>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self {
            base: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut offset) = self.offset.lock() {
            *offset += by;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        let offset = self.offset.lock().map(|o| *o).unwrap_or_default();
        self.base + offset
    }
}
