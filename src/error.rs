use std::time::Duration;

use thiserror::Error;

use crate::damage::DamageRect;

/// Failures reported by a [`Transport`](crate::transport::Transport).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("device disconnected")]
    Disconnected,
    #[error("endpoint stalled")]
    Stall,
    #[error("transfer cancelled")]
    Cancelled,
    #[error("transport timed out")]
    TimedOut,
    #[error("i/o error: {0}")]
    Io(String),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("register {address:#06x} read returned no data")]
    ShortRead { address: u16 },

    #[error("bulk transfer did not finish within {0:?}")]
    Timeout(Duration),

    #[error("unsupported mode {width}x{height}@{hz}")]
    UnsupportedMode { width: u32, height: u32, hz: u32 },

    #[error("failed to allocate {0} byte transfer buffer")]
    Allocation(usize),

    #[error("transfer slot {0} still owns an in-flight transfer")]
    SlotBusy(usize),

    #[error("transfer worker for slot {0} has stopped")]
    WorkerGone(usize),

    #[error("failed to start transfer worker: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("transfer of {len} bytes exceeds {capacity} byte buffer")]
    LengthExceedsBuffer { len: usize, capacity: usize },

    #[error("invalid framebuffer: {0}")]
    InvalidFramebuffer(&'static str),

    #[error("update {rect:?} needs {needed} bytes, transfer buffer holds {capacity}")]
    RectTooLarge {
        rect: DamageRect,
        needed: usize,
        capacity: usize,
    },

    #[error("malformed update packet: {0}")]
    MalformedPacket(&'static str),

    #[error("unknown device handle {0}")]
    UnknownDevice(u32),
}

pub type Result<T> = std::result::Result<T, Error>;
