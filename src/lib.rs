//! Frame transfer pipeline and register protocol for MS912x USB display
//! adapters.
//!
//! A [`DeviceRegistry`] owns attached devices. Each [`Device`] converts
//! damaged framebuffer regions to UYVY, frames them as update packets and
//! streams them through two alternating transfer slots, dropping and
//! merging damage when the adapter falls behind. Mode setting and status
//! polling go through the register link on the same [`Transport`].

pub mod color;
pub mod config;
pub mod damage;
pub mod device;
pub mod encoder;
pub mod error;
pub mod mode;
pub mod registers;
pub mod screenshot;
pub mod sim;
pub mod transfer;
pub mod transport;
pub mod wire;

pub use config::PipelineConfig;
pub use damage::DamageRect;
pub use device::{is_supported, Device, DeviceHandle, DeviceRegistry, FrameStatus};
pub use encoder::Framebuffer;
pub use error::{Error, Result, TransportError};
pub use mode::DisplayMode;
pub use registers::ConnectorStatus;
pub use sim::SimulatedAdapter;
pub use transport::{CancelToken, Clock, ManualClock, MonotonicClock, Transport};
