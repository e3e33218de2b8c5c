use std::time::Duration;

use crate::mode::{DisplayMode, MODE_TABLE};
use crate::wire::packet_len;

/// Tunables for one attached device.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Minimum spacing between two sent frames. Zero disables pacing.
    pub frame_interval: Duration,
    /// How long a frame update may wait for the previous transfer before
    /// it is dropped.
    pub backpressure_grace: Duration,
    /// Deadline for one bulk transfer before it is cancelled.
    pub transfer_timeout: Duration,
    pub control_timeout: Duration,
    /// Upper bound on waiting for in-flight transfers during detach.
    pub detach_wait: Duration,
    pub max_width: u32,
    pub max_height: u32,
    /// Programmed at attach, before any frame is sent.
    pub initial_mode: DisplayMode,
    pub bulk_endpoint: u8,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            frame_interval: Duration::from_millis(16),
            backpressure_grace: Duration::from_millis(1),
            transfer_timeout: Duration::from_secs(5),
            control_timeout: Duration::from_millis(500),
            detach_wait: Duration::from_secs(1),
            max_width: 2048,
            max_height: 2048,
            initial_mode: MODE_TABLE[0],
            bulk_endpoint: 0x04,
        }
    }
}

impl PipelineConfig {
    /// Bytes needed for a full-screen update at the maximum resolution.
    pub fn buffer_capacity(&self) -> usize {
        packet_len(self.max_width as usize, self.max_height as usize)
    }

    pub fn line_capacity(&self) -> usize {
        self.max_width as usize
    }

    pub fn fits(&self, width: u32, height: u32) -> bool {
        width <= self.max_width && height <= self.max_height
    }
}
