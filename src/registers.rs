//! Register read/write exchanges over the control channel, plus the power
//! and mode-set sequences built on them.

use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::mode::DisplayMode;
use crate::transport::{
    Transport, HID_REQ_GET_REPORT, HID_REQ_SET_REPORT, REPORT_INDEX, REPORT_VALUE,
};

pub const READ_REQUEST: u8 = 0xB5;
pub const WRITE_REQUEST: u8 = 0xA6;
pub const READ_PACKET_LEN: usize = 8;
pub const WRITE_PACKET_LEN: usize = 10;

pub const REG_RESOLUTION: u16 = 0x01;
pub const REG_MODE: u16 = 0x02;
pub const REG_PREPARE: u16 = 0x03;
pub const REG_RESET: u16 = 0x04;
pub const REG_COMMIT: u16 = 0x05;
pub const REG_POWER: u16 = 0x07;
pub const REG_STATUS_A: u16 = 0x30;
pub const REG_HDMI_STATUS: u16 = 0x32;
pub const REG_STATUS_B: u16 = 0x33;
pub const REG_STATUS_C: u16 = 0xC620;
pub const EDID_BASE: u16 = 0xC000;
pub const EDID_BLOCK_LEN: usize = 128;

/// Build the 8-byte read request: type, big-endian address, zero padding.
pub fn pack_read(address: u16) -> [u8; READ_PACKET_LEN] {
    let addr = address.to_be_bytes();
    [READ_REQUEST, addr[0], addr[1], 0, 0, 0, 0, 0]
}

/// Build the 10-byte write request. The device expects the address in
/// host byte order here, unlike reads.
pub fn pack_write(address: u16, data: &[u8; 6]) -> [u8; WRITE_PACKET_LEN] {
    let addr = address.to_ne_bytes();
    let mut packet = [0u8; WRITE_PACKET_LEN];
    packet[0] = WRITE_REQUEST;
    packet[1..3].copy_from_slice(&addr);
    packet[3..9].copy_from_slice(data);
    packet
}

/// HDMI sink state as reported by register 0x32.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorStatus {
    Connected,
    Disconnected,
    Unknown,
}

/// Register access for one device. Callers must serialize use per device;
/// [`Device`](crate::device::Device) does this by requiring `&mut self`.
pub struct RegisterLink {
    transport: Arc<dyn Transport>,
    timeout: Duration,
}

impl RegisterLink {
    pub fn new(transport: Arc<dyn Transport>, timeout: Duration) -> Self {
        Self { transport, timeout }
    }

    pub fn read_register(&self, address: u16) -> Result<u8> {
        let mut packet = pack_read(address);
        self.transport.control_out(
            HID_REQ_SET_REPORT,
            REPORT_VALUE,
            REPORT_INDEX,
            &packet,
            self.timeout,
        )?;
        let n = self.transport.control_in(
            HID_REQ_GET_REPORT,
            REPORT_VALUE,
            REPORT_INDEX,
            &mut packet,
            self.timeout,
        )?;
        if n == 0 {
            return Err(Error::ShortRead { address });
        }
        log::trace!("read {address:#06x} -> {:#04x}", packet[0]);
        Ok(packet[0])
    }

    pub fn write_six(&self, address: u16, data: [u8; 6]) -> Result<()> {
        let packet = pack_write(address, &data);
        log::trace!("write {address:#06x} <- {data:02x?}");
        self.transport.control_out(
            HID_REQ_SET_REPORT,
            REPORT_VALUE,
            REPORT_INDEX,
            &packet,
            self.timeout,
        )?;
        Ok(())
    }

    pub fn power_on(&self) -> Result<()> {
        self.write_six(REG_POWER, [0x01, 0x02, 0, 0, 0, 0])
    }

    pub fn power_off(&self) -> Result<()> {
        self.write_six(REG_POWER, [0; 6])
    }

    /// Program `mode`. Stops at the first failed write; the status reads are
    /// informational and their failures are only logged.
    pub fn set_resolution(&self, mode: &DisplayMode) -> Result<()> {
        self.write_six(REG_RESET, [0; 6])?;

        for address in [REG_STATUS_A, REG_STATUS_B, REG_STATUS_C] {
            match self.read_register(address) {
                Ok(value) => log::debug!("status {address:#06x} = {value:#04x}"),
                Err(e) => log::debug!("status {address:#06x} unreadable: {e}"),
            }
        }

        self.write_six(REG_PREPARE, [0x03, 0, 0, 0, 0, 0])?;

        let w = mode.width.to_be_bytes();
        let h = mode.height.to_be_bytes();
        let f = mode.format.code().to_be_bytes();
        self.write_six(REG_RESOLUTION, [w[0], w[1], h[0], h[1], f[0], f[1]])?;

        let m = mode.code.to_be_bytes();
        self.write_six(REG_MODE, [m[0], m[1], w[0], w[1], h[0], h[1]])?;

        let commit = [1, 0, 0, 0, 0, 0];
        self.write_six(REG_RESET, commit)?;
        self.write_six(REG_COMMIT, commit)
    }

    pub fn connector_status(&self) -> ConnectorStatus {
        match self.read_register(REG_HDMI_STATUS) {
            Ok(1) => ConnectorStatus::Connected,
            Ok(_) => ConnectorStatus::Disconnected,
            Err(e) => {
                log::warn!("failed to read HDMI status: {e}");
                ConnectorStatus::Unknown
            }
        }
    }

    /// Raw 128-byte EDID block from the shadow region, one register read
    /// per byte.
    pub fn read_edid_block(&self, block: u8) -> Result<[u8; EDID_BLOCK_LEN]> {
        let base = EDID_BASE.wrapping_add(block as u16 * EDID_BLOCK_LEN as u16);
        let mut buf = [0u8; EDID_BLOCK_LEN];
        for (i, byte) in buf.iter_mut().enumerate() {
            *byte = self.read_register(base.wrapping_add(i as u16))?;
        }
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::sim::{ControlRecord, SimulatedAdapter};

    fn link(sim: &Arc<SimulatedAdapter>) -> RegisterLink {
        RegisterLink::new(sim.clone(), Duration::from_millis(500))
    }

    #[test]
    fn test_pack_read_layout() {
        assert_eq!(pack_read(0xC620), [0xB5, 0xC6, 0x20, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_pack_write_layout() {
        let packet = pack_write(0x0007, &[1, 2, 3, 4, 5, 6]);
        assert_eq!(packet[0], 0xA6);
        assert_eq!(u16::from_ne_bytes([packet[1], packet[2]]), 0x0007);
        assert_eq!(&packet[3..9], &[1, 2, 3, 4, 5, 6]);
        assert_eq!(packet[9], 0);
    }

    #[test]
    fn test_read_register_returns_first_byte() {
        let sim = Arc::new(SimulatedAdapter::new());
        sim.set_register(0x30, 0x5A);
        assert_eq!(link(&sim).read_register(0x30).unwrap(), 0x5A);
        assert_eq!(sim.control_log(), vec![ControlRecord::Read { address: 0x30 }]);
    }

    #[test]
    fn test_read_register_short_read() {
        let sim = Arc::new(SimulatedAdapter::new());
        sim.set_short_reads(true);
        let err = link(&sim).read_register(0x33).unwrap_err();
        assert!(matches!(err, Error::ShortRead { address: 0x33 }));
    }

    #[test]
    fn test_read_register_transport_failure() {
        let sim = Arc::new(SimulatedAdapter::new());
        sim.fail_control(Some(TransportError::Stall));
        let err = link(&sim).read_register(0x30).unwrap_err();
        assert!(matches!(err, Error::Transport(TransportError::Stall)));
    }

    #[test]
    fn test_power_packets() {
        let sim = Arc::new(SimulatedAdapter::new());
        let link = link(&sim);
        link.power_on().unwrap();
        link.power_off().unwrap();
        assert_eq!(
            sim.control_log(),
            vec![
                ControlRecord::Write { address: 0x07, data: [1, 2, 0, 0, 0, 0] },
                ControlRecord::Write { address: 0x07, data: [0; 6] },
            ]
        );
    }

    #[test]
    fn test_mode_set_sequence_1080p() {
        let sim = Arc::new(SimulatedAdapter::new());
        let mode = DisplayMode::lookup(1920, 1080, 60).unwrap();
        link(&sim).set_resolution(mode).unwrap();

        let log = sim.control_log();
        assert_eq!(
            log,
            vec![
                ControlRecord::Write { address: 0x04, data: [0; 6] },
                ControlRecord::Read { address: 0x30 },
                ControlRecord::Read { address: 0x33 },
                ControlRecord::Read { address: 0xC620 },
                ControlRecord::Write { address: 0x03, data: [3, 0, 0, 0, 0, 0] },
                ControlRecord::Write { address: 0x01, data: [0x07, 0x80, 0x04, 0x38, 0x22, 0x00] },
                ControlRecord::Write { address: 0x02, data: [0x81, 0x00, 0x07, 0x80, 0x04, 0x38] },
                ControlRecord::Write { address: 0x04, data: [1, 0, 0, 0, 0, 0] },
                ControlRecord::Write { address: 0x05, data: [1, 0, 0, 0, 0, 0] },
            ]
        );
        let writes = log.iter().filter(|r| matches!(r, ControlRecord::Write { .. })).count();
        assert_eq!(writes, 6);
    }

    #[test]
    fn test_mode_set_tolerates_status_read_failure() {
        let sim = Arc::new(SimulatedAdapter::new());
        sim.set_short_reads(true);
        let mode = DisplayMode::lookup(800, 600, 60).unwrap();
        link(&sim).set_resolution(mode).unwrap();
        assert_eq!(sim.writes().len(), 6);
    }

    #[test]
    fn test_connector_status() {
        let sim = Arc::new(SimulatedAdapter::new());
        let link = link(&sim);
        sim.set_register(REG_HDMI_STATUS, 1);
        assert_eq!(link.connector_status(), ConnectorStatus::Connected);
        sim.set_register(REG_HDMI_STATUS, 0);
        assert_eq!(link.connector_status(), ConnectorStatus::Disconnected);
        sim.set_short_reads(true);
        assert_eq!(link.connector_status(), ConnectorStatus::Unknown);
    }

    #[test]
    fn test_read_edid_block_addresses() {
        let sim = Arc::new(SimulatedAdapter::new());
        sim.set_register(EDID_BASE + 128, 0x00);
        sim.set_register(EDID_BASE + 129, 0xFF);
        let block = link(&sim).read_edid_block(1).unwrap();
        assert_eq!(block[1], 0xFF);
        assert_eq!(sim.control_log()[0], ControlRecord::Read { address: 0xC080 });
        assert_eq!(sim.control_log().len(), EDID_BLOCK_LEN);
    }
}
