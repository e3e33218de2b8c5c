//! In-process stand-in for the adapter.
//!
//! Answers register reads from a register file, records every control
//! exchange, and decodes frame updates into a shadow framebuffer so the
//! result can be inspected or saved as a PNG. Latency, stalls and failures
//! can be injected.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use crate::color::{unpack_xrgb, uyvy_line_to_xrgb};
use crate::error::TransportError;
use crate::registers::{READ_REQUEST, REG_RESOLUTION, WRITE_REQUEST};
use crate::transport::{CancelToken, Transport};
use crate::wire::{decode_update, UpdateHeader};

const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// One control exchange as seen by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlRecord {
    Read { address: u16 },
    Write { address: u16, data: [u8; 6] },
}

struct SimState {
    registers: HashMap<u16, u8>,
    control_log: Vec<ControlRecord>,
    pending_read: Option<u16>,
    width: u16,
    height: u16,
    frame: Vec<u32>,
    updates: Vec<UpdateHeader>,
    last_packet: Vec<u8>,
}

impl SimState {
    fn resize(&mut self, width: u16, height: u16) {
        self.width = width;
        self.height = height;
        self.frame = vec![0; width as usize * height as usize];
    }
}

pub struct SimulatedAdapter {
    state: Mutex<SimState>,
    bulk_latency: Mutex<Duration>,
    stalled: AtomicBool,
    ignore_cancel: AtomicBool,
    short_reads: AtomicBool,
    control_failure: Mutex<Option<TransportError>>,
    write_failure: Mutex<Option<(u16, TransportError)>>,
    bulk_failure: Mutex<Option<TransportError>>,
}

impl Default for SimulatedAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedAdapter {
    pub fn new() -> Self {
        let mut state = SimState {
            registers: HashMap::new(),
            control_log: Vec::new(),
            pending_read: None,
            width: 0,
            height: 0,
            frame: Vec::new(),
            updates: Vec::new(),
            last_packet: Vec::new(),
        };
        state.resize(800, 600);
        Self {
            state: Mutex::new(state),
            bulk_latency: Mutex::new(Duration::ZERO),
            stalled: AtomicBool::new(false),
            ignore_cancel: AtomicBool::new(false),
            short_reads: AtomicBool::new(false),
            control_failure: Mutex::new(None),
            write_failure: Mutex::new(None),
            bulk_failure: Mutex::new(None),
        }
    }

    pub fn with_latency(latency: Duration) -> Self {
        let sim = Self::new();
        sim.set_bulk_latency(latency);
        sim
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut SimState) -> R) -> R {
        let mut guard = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    // --- Fault and timing injection ---

    pub fn set_register(&self, address: u16, value: u8) {
        self.with_state(|s| s.registers.insert(address, value));
    }

    pub fn set_bulk_latency(&self, latency: Duration) {
        if let Ok(mut l) = self.bulk_latency.lock() {
            *l = latency;
        }
    }

    /// While stalled, bulk writes never finish unless cancelled.
    pub fn set_stalled(&self, stalled: bool) {
        self.stalled.store(stalled, Ordering::Release);
    }

    /// Keep a stalled bulk write blocked even after it is cancelled.
    pub fn set_ignore_cancel(&self, ignore: bool) {
        self.ignore_cancel.store(ignore, Ordering::Release);
    }

    /// Make GET_REPORT succeed with zero bytes.
    pub fn set_short_reads(&self, short: bool) {
        self.short_reads.store(short, Ordering::Release);
    }

    pub fn fail_control(&self, error: Option<TransportError>) {
        if let Ok(mut f) = self.control_failure.lock() {
            *f = error;
        }
    }

    /// Fail every register write to `address`. The write is not logged.
    pub fn fail_write_to(&self, failure: Option<(u16, TransportError)>) {
        if let Ok(mut f) = self.write_failure.lock() {
            *f = failure;
        }
    }

    pub fn fail_bulk(&self, error: Option<TransportError>) {
        if let Ok(mut f) = self.bulk_failure.lock() {
            *f = error;
        }
    }

    // --- Inspection ---

    pub fn control_log(&self) -> Vec<ControlRecord> {
        self.with_state(|s| s.control_log.clone())
    }

    pub fn clear_control_log(&self) {
        self.with_state(|s| s.control_log.clear());
    }

    /// Register writes only, in order.
    pub fn writes(&self) -> Vec<(u16, [u8; 6])> {
        self.with_state(|s| {
            s.control_log
                .iter()
                .filter_map(|r| match *r {
                    ControlRecord::Write { address, data } => Some((address, data)),
                    ControlRecord::Read { .. } => None,
                })
                .collect()
        })
    }

    pub fn updates(&self) -> Vec<UpdateHeader> {
        self.with_state(|s| s.updates.clone())
    }

    pub fn last_update(&self) -> Option<UpdateHeader> {
        self.with_state(|s| s.updates.last().copied())
    }

    pub fn last_packet(&self) -> Vec<u8> {
        self.with_state(|s| s.last_packet.clone())
    }

    pub fn dimensions(&self) -> (u16, u16) {
        self.with_state(|s| (s.width, s.height))
    }

    pub fn pixel(&self, x: u16, y: u16) -> Option<u32> {
        self.with_state(|s| {
            if x < s.width && y < s.height {
                s.frame.get(y as usize * s.width as usize + x as usize).copied()
            } else {
                None
            }
        })
    }

    /// Shadow framebuffer as opaque RGBA bytes.
    pub fn snapshot_rgba(&self) -> (u32, u32, Vec<u8>) {
        self.with_state(|s| {
            let mut rgba = Vec::with_capacity(s.frame.len() * 4);
            for &pixel in &s.frame {
                let (r, g, b) = unpack_xrgb(pixel);
                rgba.extend_from_slice(&[r, g, b, 0xFF]);
            }
            (s.width as u32, s.height as u32, rgba)
        })
    }

    fn apply_write(state: &mut SimState, address: u16, data: [u8; 6]) {
        if address == REG_RESOLUTION {
            let width = u16::from_be_bytes([data[0], data[1]]);
            let height = u16::from_be_bytes([data[2], data[3]]);
            state.resize(width, height);
        }
    }

    fn paint(&self, packet: &[u8]) -> Result<(), TransportError> {
        let view = decode_update(packet).map_err(|e| TransportError::Io(e.to_string()))?;
        self.with_state(|s| {
            let header = view.header;
            let mut line = vec![0u32; header.width as usize];
            for (i, src) in view.lines().enumerate() {
                let y = header.y as usize + i;
                if y >= s.height as usize {
                    break;
                }
                uyvy_line_to_xrgb(src, &mut line);
                let row = y * s.width as usize;
                for (dx, &pixel) in line.iter().enumerate() {
                    let x = header.x as usize + dx;
                    if x >= s.width as usize {
                        break;
                    }
                    s.frame[row + x] = pixel;
                }
            }
            s.updates.push(header);
            s.last_packet.clear();
            s.last_packet.extend_from_slice(packet);
        });
        Ok(())
    }
}

impl Transport for SimulatedAdapter {
    fn control_out(
        &self,
        _request: u8,
        _value: u16,
        _index: u16,
        data: &[u8],
        _timeout: Duration,
    ) -> Result<usize, TransportError> {
        if let Some(err) = self.control_failure.lock().ok().and_then(|f| f.clone()) {
            return Err(err);
        }
        let write_failure = self.write_failure.lock().ok().and_then(|f| f.clone());
        self.with_state(|s| match data {
            [READ_REQUEST, hi, lo, ..] => {
                let address = u16::from_be_bytes([*hi, *lo]);
                s.control_log.push(ControlRecord::Read { address });
                s.pending_read = Some(address);
                Ok(data.len())
            }
            [WRITE_REQUEST, a0, a1, rest @ ..] if rest.len() >= 6 => {
                let address = u16::from_ne_bytes([*a0, *a1]);
                if let Some((_, err)) = write_failure.as_ref().filter(|(a, _)| *a == address) {
                    return Err(err.clone());
                }
                let mut payload = [0u8; 6];
                payload.copy_from_slice(&rest[..6]);
                s.control_log.push(ControlRecord::Write { address, data: payload });
                Self::apply_write(s, address, payload);
                Ok(data.len())
            }
            _ => Err(TransportError::Io("unrecognised control packet".into())),
        })
    }

    fn control_in(
        &self,
        _request: u8,
        _value: u16,
        _index: u16,
        data: &mut [u8],
        _timeout: Duration,
    ) -> Result<usize, TransportError> {
        if let Some(err) = self.control_failure.lock().ok().and_then(|f| f.clone()) {
            return Err(err);
        }
        if self.short_reads.load(Ordering::Acquire) {
            return Ok(0);
        }
        self.with_state(|s| {
            let address = s.pending_read.take().ok_or(TransportError::Stall)?;
            let value = s.registers.get(&address).copied().unwrap_or(0);
            match data.first_mut() {
                Some(first) => {
                    *first = value;
                    Ok(data.len())
                }
                None => Ok(0),
            }
        })
    }

    fn bulk_out(
        &self,
        _endpoint: u8,
        data: &[u8],
        cancel: &CancelToken,
    ) -> Result<usize, TransportError> {
        if let Some(err) = self.bulk_failure.lock().ok().and_then(|f| f.clone()) {
            return Err(err);
        }
        let latency = self.bulk_latency.lock().map(|l| *l).unwrap_or_default();
        let deadline = Instant::now() + latency;
        loop {
            if cancel.is_cancelled() && !self.ignore_cancel.load(Ordering::Acquire) {
                return Err(TransportError::Cancelled);
            }
            if !self.stalled.load(Ordering::Acquire) && Instant::now() >= deadline {
                break;
            }
            thread::sleep(POLL_INTERVAL);
        }
        self.paint(data)?;
        Ok(data.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registers::pack_write;
    use crate::transport::CancelReason;
    use crate::wire::TRAILER;

    fn solid_packet(x: u16, y: u16, width: u16, height: u16, yuv: [u8; 4]) -> Vec<u8> {
        let header = UpdateHeader { x, y, width, height };
        let mut packet = header.to_bytes().to_vec();
        for _ in 0..(width as usize / 2 * height as usize) {
            packet.extend_from_slice(&yuv);
        }
        packet.extend_from_slice(&TRAILER);
        packet
    }

    #[test]
    fn test_resolution_write_resizes_shadow() {
        let sim = SimulatedAdapter::new();
        let packet = pack_write(REG_RESOLUTION, &[0x02, 0x80, 0x01, 0xE0, 0x22, 0x00]);
        sim.control_out(0x09, 0x0300, 0, &packet, Duration::ZERO).unwrap();
        assert_eq!(sim.dimensions(), (640, 480));
    }

    #[test]
    fn test_bulk_paints_region() {
        let sim = SimulatedAdapter::new();
        // U=128, Y=235, V=128, Y=235 is white
        let packet = solid_packet(16, 2, 16, 2, [128, 235, 128, 235]);
        sim.bulk_out(0x04, &packet, &CancelToken::new()).unwrap();

        let (r, g, b) = unpack_xrgb(sim.pixel(16, 2).unwrap());
        assert!(r > 250 && g > 250 && b > 250);
        assert_eq!(sim.pixel(15, 2), Some(0));
        assert_eq!(sim.pixel(16, 4), Some(0));
        assert_eq!(sim.updates().len(), 1);
    }

    #[test]
    fn test_bulk_rejects_malformed_packet() {
        let sim = SimulatedAdapter::new();
        let mut packet = solid_packet(0, 0, 16, 1, [128, 16, 128, 16]);
        packet.pop();
        let err = sim.bulk_out(0x04, &packet, &CancelToken::new()).unwrap_err();
        assert!(matches!(err, TransportError::Io(_)));
    }

    #[test]
    fn test_stalled_bulk_returns_on_cancel() {
        let sim = std::sync::Arc::new(SimulatedAdapter::new());
        sim.set_stalled(true);
        let token = CancelToken::new();
        let canceller = token.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            canceller.cancel(CancelReason::Requested);
        });
        let packet = solid_packet(0, 0, 16, 1, [128, 16, 128, 16]);
        assert_eq!(sim.bulk_out(0x04, &packet, &token), Err(TransportError::Cancelled));
        handle.join().unwrap();
        assert!(sim.updates().is_empty());
    }

    #[test]
    fn test_write_failure_targets_one_register() {
        let sim = SimulatedAdapter::new();
        sim.fail_write_to(Some((REG_RESOLUTION, TransportError::Stall)));
        let resolution = pack_write(REG_RESOLUTION, &[0x02, 0x80, 0x01, 0xE0, 0x22, 0x00]);
        let power = pack_write(0x07, &[1, 2, 0, 0, 0, 0]);
        assert_eq!(
            sim.control_out(0x09, 0x0300, 0, &resolution, Duration::ZERO),
            Err(TransportError::Stall)
        );
        assert!(sim.control_out(0x09, 0x0300, 0, &power, Duration::ZERO).is_ok());
        assert_eq!(sim.writes(), vec![(0x07, [1, 2, 0, 0, 0, 0])]);
        assert_eq!(sim.dimensions(), (800, 600));
    }

    #[test]
    fn test_read_without_request_stalls() {
        let sim = SimulatedAdapter::new();
        let mut buf = [0u8; 8];
        assert_eq!(
            sim.control_in(0x01, 0x0300, 0, &mut buf, Duration::ZERO),
            Err(TransportError::Stall)
        );
    }
}
