//! Per-device pipeline state and the registry that owns attached devices.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::color::ColorConverter;
use crate::config::PipelineConfig;
use crate::damage::DamageRect;
use crate::encoder::{encode_update, Framebuffer};
use crate::error::{Error, Result};
use crate::mode::DisplayMode;
use crate::registers::{ConnectorStatus, RegisterLink, EDID_BLOCK_LEN};
use crate::transfer::{TransferOutcome, TransferScheduler, SLOT_COUNT};
use crate::transport::{Clock, MonotonicClock, Transport};

/// USB vendor/product pairs handled by this driver.
pub const SUPPORTED_DEVICES: &[(u16, u16)] = &[(0x534D, 0x6021), (0x534D, 0x0821), (0x345F, 0x9132)];

pub fn is_supported(vendor: u16, product: u16) -> bool {
    SUPPORTED_DEVICES.contains(&(vendor, product))
}

pub type DeviceHandle = u32;

/// Result of one frame update. None of these are failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    /// Encoded and queued; carries the aligned rect that went out.
    Sent(DamageRect),
    /// The previous transfer is still running. Damage is kept for later.
    Dropped,
    /// Arrived inside the pacing interval. Damage is kept for later.
    Throttled,
    /// Nothing visible to send after alignment and clipping.
    NothingToSend,
}

pub struct Device {
    id: DeviceHandle,
    name: String,
    link: RegisterLink,
    scheduler: TransferScheduler,
    pending: DamageRect,
    /// What each slot's latest transfer carried, resent if it fails.
    in_flight_damage: [DamageRect; SLOT_COUNT],
    active: usize,
    last_send: Option<Instant>,
    clock: Arc<dyn Clock>,
    config: PipelineConfig,
    converter: ColorConverter<'static>,
    /// None while the programmed mode is unknown, e.g. after a failed
    /// mode set.
    mode: Option<DisplayMode>,
    powered: bool,
}

impl Device {
    fn attach(
        id: DeviceHandle,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
        config: PipelineConfig,
    ) -> Result<Self> {
        let name = format!("ms912x-{id}");
        let link = RegisterLink::new(transport.clone(), config.control_timeout);

        let mode = config.initial_mode;
        log::debug!("[{name}] programming initial mode {mode}");
        link.set_resolution(&mode)?;

        let scheduler = TransferScheduler::new(&name, transport, &config)?;
        log::info!(
            "[{name}] attached, {} x {} byte transfer buffers",
            SLOT_COUNT,
            config.buffer_capacity()
        );

        Ok(Self {
            id,
            name,
            link,
            scheduler,
            pending: DamageRect::EMPTY,
            in_flight_damage: [DamageRect::EMPTY; SLOT_COUNT],
            // slot 1 starts out complete so the first frame goes to slot 0
            active: 0,
            last_send: None,
            clock,
            config,
            converter: ColorConverter::default(),
            mode: Some(mode),
            powered: false,
        })
    }

    pub fn id(&self) -> DeviceHandle {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Damage accumulated but not yet sent.
    pub fn pending_damage(&self) -> DamageRect {
        self.pending
    }

    pub fn mode(&self) -> Option<&DisplayMode> {
        self.mode.as_ref()
    }

    pub fn is_powered(&self) -> bool {
        self.powered
    }

    /// Outcome of the most recent finished transfer on `slot`.
    pub fn last_outcome(&self, slot: usize) -> Option<&TransferOutcome> {
        self.scheduler.slot(slot).last_outcome()
    }

    /// Send the damaged part of `fb`, subject to pacing and backpressure.
    ///
    /// Never blocks longer than the configured grace period. Damage that
    /// is not sent is folded into the pending rect and goes out with a
    /// later frame.
    pub fn submit_frame(&mut self, fb: &Framebuffer<'_>, damage: DamageRect) -> Result<FrameStatus> {
        let now = self.clock.now();
        if let Some(last) = self.last_send {
            if now.saturating_duration_since(last) < self.config.frame_interval {
                self.pending = self.pending.union(&damage);
                return Ok(FrameStatus::Throttled);
            }
        }

        let current = self.active;
        let previous = (current + 1) % SLOT_COUNT;

        let mut merged = self.pending.union(&damage);
        if self.scheduler.is_complete(previous) {
            merged = merged.union(&self.take_lost_damage(previous));
        }
        let rect = merged.align_to_hardware(fb.width(), fb.height());
        if rect.is_empty() {
            self.pending = DamageRect::EMPTY;
            return Ok(FrameStatus::NothingToSend);
        }

        if !self.scheduler.wait_complete(previous, self.config.backpressure_grace) {
            log::debug!("[{}] slot {previous} busy, deferring {rect:?}", self.name);
            self.pending = merged;
            return Ok(FrameStatus::Dropped);
        }
        // may have finished, and failed, during the grace wait
        let merged = merged.union(&self.take_lost_damage(previous));
        let rect = merged.align_to_hardware(fb.width(), fb.height());

        if let Err(e) = self.encode_and_submit(fb, &rect, current) {
            self.pending = merged;
            return Err(e);
        }

        self.pending = DamageRect::EMPTY;
        self.in_flight_damage[current] = rect;
        self.active = previous;
        self.last_send = Some(now);
        Ok(FrameStatus::Sent(rect))
    }

    /// Damage from a finished transfer on `slot` that never reached the
    /// device. Each failed transfer hands its damage back once.
    fn take_lost_damage(&mut self, slot: usize) -> DamageRect {
        let failed = self
            .scheduler
            .slot(slot)
            .last_outcome()
            .is_some_and(|outcome| !outcome.is_success());
        if !failed {
            return DamageRect::EMPTY;
        }
        let lost = std::mem::replace(&mut self.in_flight_damage[slot], DamageRect::EMPTY);
        if !lost.is_empty() {
            log::debug!("[{}] slot {slot} failed, resending {lost:?}", self.name);
        }
        lost
    }

    fn encode_and_submit(&mut self, fb: &Framebuffer<'_>, rect: &DamageRect, slot: usize) -> Result<()> {
        // `current` was `previous` on the last call and was confirmed
        // complete then, so this only fails if a submit was rejected.
        if !self.scheduler.is_complete(slot) {
            return Err(Error::SlotBusy(slot));
        }
        let converter = self.converter;
        let buffer = self.scheduler.slot_mut(slot).buffer_mut()?;
        let len = encode_update(fb, rect, &converter, buffer)?;
        self.scheduler.submit(slot, len)?;
        log::trace!("[{}] slot {slot}: {len} bytes for {rect:?}", self.name);
        Ok(())
    }

    /// Power the display and switch to `width`x`height`@`hz`.
    ///
    /// The mode is validated before anything is written, so a rejected
    /// mode leaves the device untouched.
    pub fn enable(&mut self, width: u32, height: u32, hz: u32) -> Result<()> {
        let mode = *DisplayMode::lookup(width, height, hz)?;
        if !self.config.fits(width, height) {
            return Err(Error::UnsupportedMode { width, height, hz });
        }

        log::info!("[{}] enabling {mode}", self.name);
        self.link.power_on()?;
        self.powered = true;
        if self.mode != Some(mode) {
            self.program(mode)?;
        }
        Ok(())
    }

    /// Reprogram the resolution without touching power.
    pub fn set_mode(&mut self, width: u32, height: u32, hz: u32) -> Result<()> {
        let mode = *DisplayMode::lookup(width, height, hz)?;
        if !self.config.fits(width, height) {
            return Err(Error::UnsupportedMode { width, height, hz });
        }
        self.program(mode)
    }

    fn program(&mut self, mode: DisplayMode) -> Result<()> {
        // the sequence starts with a reset, so a failure leaves the
        // adapter in no known mode
        self.mode = None;
        self.link.set_resolution(&mode)?;
        self.mode = Some(mode);
        Ok(())
    }

    pub fn disable(&mut self) -> Result<()> {
        log::info!("[{}] disabling", self.name);
        self.link.power_off()?;
        self.powered = false;
        Ok(())
    }

    pub fn connector_status(&self) -> ConnectorStatus {
        self.link.connector_status()
    }

    pub fn read_edid_block(&self, block: u8) -> Result<[u8; EDID_BLOCK_LEN]> {
        self.link.read_edid_block(block)
    }

    /// Block until neither slot has a transfer in flight.
    pub fn wait_idle(&mut self, timeout: Duration) -> bool {
        self.scheduler.wait_idle(timeout)
    }

    /// Cancel in-flight transfers and release both slots.
    fn detach(mut self) {
        if self.scheduler.shutdown(self.config.detach_wait) {
            log::info!("[{}] detached", self.name);
        } else {
            log::error!(
                "[{}] detached with a transfer still running; its buffer stays with the worker",
                self.name
            );
        }
    }
}

/// Owns every attached device and hands out their names.
pub struct DeviceRegistry {
    next_id: DeviceHandle,
    config: PipelineConfig,
    clock: Arc<dyn Clock>,
    devices: HashMap<DeviceHandle, Device>,
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new(PipelineConfig::default())
    }
}

impl DeviceRegistry {
    pub fn new(config: PipelineConfig) -> Self {
        Self::with_clock(config, Arc::new(MonotonicClock))
    }

    pub fn with_clock(config: PipelineConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            next_id: 0,
            config,
            clock,
            devices: HashMap::new(),
        }
    }

    pub fn attach_device(&mut self, transport: Arc<dyn Transport>) -> Result<DeviceHandle> {
        let id = self.next_id;
        let device = Device::attach(id, transport, self.clock.clone(), self.config.clone())?;
        self.next_id += 1;
        self.devices.insert(id, device);
        Ok(id)
    }

    pub fn detach_device(&mut self, handle: DeviceHandle) -> Result<()> {
        let device = self.devices.remove(&handle).ok_or(Error::UnknownDevice(handle))?;
        device.detach();
        Ok(())
    }

    pub fn device(&self, handle: DeviceHandle) -> Result<&Device> {
        self.devices.get(&handle).ok_or(Error::UnknownDevice(handle))
    }

    pub fn device_mut(&mut self, handle: DeviceHandle) -> Result<&mut Device> {
        self.devices.get_mut(&handle).ok_or(Error::UnknownDevice(handle))
    }

    pub fn submit_frame(
        &mut self,
        handle: DeviceHandle,
        fb: &Framebuffer<'_>,
        damage: DamageRect,
    ) -> Result<FrameStatus> {
        self.device_mut(handle)?.submit_frame(fb, damage)
    }

    pub fn enable(&mut self, handle: DeviceHandle, width: u32, height: u32, hz: u32) -> Result<()> {
        self.device_mut(handle)?.enable(width, height, hz)
    }

    pub fn disable(&mut self, handle: DeviceHandle) -> Result<()> {
        self.device_mut(handle)?.disable()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}
