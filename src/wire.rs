//! Bulk-channel frame update packet.
//!
//! Layout:
//!   [0..2]  marker 0xFF 0x00
//!   [2]     x / 16
//!   [3..5]  y (big-endian)
//!   [5]     width / 16
//!   [6..8]  height (big-endian)
//!   height scanlines of width*2 UYVY bytes
//!   8-byte trailer FF C0 00 00 00 00 00 00

use crate::damage::{DamageRect, X_ALIGN};
use crate::error::{Error, Result};

pub const HEADER_LEN: usize = 8;
pub const TRAILER_LEN: usize = 8;
pub const HEADER_MARKER: [u8; 2] = [0xFF, 0x00];
pub const TRAILER: [u8; TRAILER_LEN] = [0xFF, 0xC0, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];
pub const BYTES_PER_PIXEL: usize = 2;

/// Total packet size for a `width` x `height` update.
pub const fn packet_len(width: usize, height: usize) -> usize {
    HEADER_LEN + width * BYTES_PER_PIXEL * height + TRAILER_LEN
}

/// Decoded update header, geometry in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateHeader {
    pub x: u16,
    pub y: u16,
    pub width: u16,
    pub height: u16,
}

impl UpdateHeader {
    /// Build from an aligned rect. `x` and `width` must be multiples of 16.
    pub fn from_rect(rect: &DamageRect) -> Result<Self> {
        let width = rect.width();
        if rect.is_empty() || rect.x1 < 0 || rect.y1 < 0 {
            return Err(Error::MalformedPacket("empty or negative update rect"));
        }
        if rect.x1 % X_ALIGN != 0 || width % X_ALIGN as u32 != 0 {
            return Err(Error::MalformedPacket("x and width must be multiples of 16"));
        }
        let x_cols = rect.x1 / X_ALIGN;
        let w_cols = width / X_ALIGN as u32;
        if x_cols > u8::MAX as i32 || w_cols > u8::MAX as u32 {
            return Err(Error::MalformedPacket("x or width exceeds header range"));
        }
        if rect.y1 > u16::MAX as i32 || rect.height() > u16::MAX as u32 {
            return Err(Error::MalformedPacket("y or height exceeds header range"));
        }
        Ok(Self {
            x: rect.x1 as u16,
            y: rect.y1 as u16,
            width: width as u16,
            height: rect.height() as u16,
        })
    }

    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let y = self.y.to_be_bytes();
        let h = self.height.to_be_bytes();
        [
            HEADER_MARKER[0],
            HEADER_MARKER[1],
            (self.x / X_ALIGN as u16) as u8,
            y[0],
            y[1],
            (self.width / X_ALIGN as u16) as u8,
            h[0],
            h[1],
        ]
    }

    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(Error::MalformedPacket("truncated header"));
        }
        if bytes[..2] != HEADER_MARKER {
            return Err(Error::MalformedPacket("bad header marker"));
        }
        Ok(Self {
            x: bytes[2] as u16 * X_ALIGN as u16,
            y: u16::from_be_bytes([bytes[3], bytes[4]]),
            width: bytes[5] as u16 * X_ALIGN as u16,
            height: u16::from_be_bytes([bytes[6], bytes[7]]),
        })
    }

    pub fn rect(&self) -> DamageRect {
        DamageRect::new(
            self.x as i32,
            self.y as i32,
            self.x as i32 + self.width as i32,
            self.y as i32 + self.height as i32,
        )
    }

    pub fn line_len(&self) -> usize {
        self.width as usize * BYTES_PER_PIXEL
    }
}

/// A parsed update borrowing its UYVY payload from the packet.
#[derive(Debug, Clone, Copy)]
pub struct UpdateView<'a> {
    pub header: UpdateHeader,
    pub payload: &'a [u8],
}

impl<'a> UpdateView<'a> {
    pub fn lines(&self) -> std::slice::ChunksExact<'a, u8> {
        self.payload.chunks_exact(self.header.line_len().max(1))
    }
}

/// Validate marker, payload length and trailer of a complete packet.
pub fn decode_update(packet: &[u8]) -> Result<UpdateView<'_>> {
    let header = UpdateHeader::parse(packet)?;
    let expected = packet_len(header.width as usize, header.height as usize);
    if packet.len() != expected {
        return Err(Error::MalformedPacket("length does not match header geometry"));
    }
    let trailer_at = expected - TRAILER_LEN;
    if packet[trailer_at..] != TRAILER {
        return Err(Error::MalformedPacket("bad trailer"));
    }
    Ok(UpdateView {
        header,
        payload: &packet[HEADER_LEN..trailer_at],
    })
}
