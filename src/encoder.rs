//! Packs a damaged rectangle of an XRGB8888 framebuffer into a frame
//! update packet.

use crate::color::ColorConverter;
use crate::damage::DamageRect;
use crate::error::{Error, Result};
use crate::transfer::TransferBuffer;
use crate::wire::{packet_len, UpdateHeader, BYTES_PER_PIXEL, HEADER_LEN, TRAILER, TRAILER_LEN};

pub const XRGB_BYTES: usize = 4;

/// Borrowed XRGB8888 framebuffer in host byte order.
///
/// Holding one means the caller has read access to the pixels for as long
/// as the borrow lives, which covers a whole [`encode_update`] call.
#[derive(Debug, Clone, Copy)]
pub struct Framebuffer<'a> {
    width: u32,
    height: u32,
    pitch: usize,
    data: &'a [u8],
}

impl<'a> Framebuffer<'a> {
    /// `pitch` is the byte distance between rows.
    pub fn new(width: u32, height: u32, pitch: usize, data: &'a [u8]) -> Result<Self> {
        let row_bytes = width as usize * XRGB_BYTES;
        if pitch < row_bytes {
            return Err(Error::InvalidFramebuffer("pitch shorter than a row"));
        }
        let needed = match height {
            0 => 0,
            h => pitch * (h as usize - 1) + row_bytes,
        };
        if data.len() < needed {
            return Err(Error::InvalidFramebuffer("buffer shorter than pitch * height"));
        }
        Ok(Self {
            width,
            height,
            pitch,
            data,
        })
    }

    /// Tightly packed pixels, one `u32` per pixel.
    pub fn from_pixels(width: u32, height: u32, pixels: &'a [u32]) -> Result<Self> {
        Self::new(
            width,
            height,
            width as usize * XRGB_BYTES,
            bytemuck::cast_slice(pixels),
        )
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn full_rect(&self) -> DamageRect {
        DamageRect::full(self.width, self.height)
    }

    /// Bytes of `count` pixels starting at (x, y).
    fn span(&self, x: usize, y: usize, count: usize) -> &'a [u8] {
        let start = y * self.pitch + x * XRGB_BYTES;
        &self.data[start..start + count * XRGB_BYTES]
    }
}

/// Encode `rect` into `out` and return the packet length.
///
/// `rect.y2` is clipped to the framebuffer height; `x1` and the width must
/// already be 16-pixel aligned and inside the framebuffer.
pub fn encode_update(
    fb: &Framebuffer<'_>,
    rect: &DamageRect,
    converter: &ColorConverter<'_>,
    out: &mut TransferBuffer,
) -> Result<usize> {
    let mut rect = *rect;
    rect.y2 = rect.y2.min(fb.height() as i32);
    if rect.is_empty() || rect.x2 > fb.width() as i32 {
        return Err(Error::InvalidFramebuffer("update rect outside framebuffer"));
    }

    let header = UpdateHeader::from_rect(&rect)?;
    let width = header.width as usize;
    let height = header.height as usize;
    let total = packet_len(width, height);
    if total > out.capacity() || width > out.line_capacity() {
        return Err(Error::RectTooLarge {
            rect,
            needed: total,
            capacity: out.capacity(),
        });
    }

    let (data, line) = out.split_mut();
    data[..HEADER_LEN].copy_from_slice(&header.to_bytes());

    let line = &mut line[..width];
    let line_bytes = width * BYTES_PER_PIXEL;
    let mut offset = HEADER_LEN;
    for y in rect.y1 as usize..rect.y2 as usize {
        bytemuck::cast_slice_mut::<u32, u8>(line).copy_from_slice(fb.span(header.x as usize, y, width));
        converter.convert_line(line, &mut data[offset..offset + line_bytes]);
        offset += line_bytes;
    }

    data[offset..offset + TRAILER_LEN].copy_from_slice(&TRAILER);
    Ok(offset + TRAILER_LEN)
}
