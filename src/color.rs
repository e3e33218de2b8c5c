//! XRGB8888 to UYVY (4:2:2) scanline conversion.
//!
//! Coefficients are BT.601 studio-swing values scaled by 2^16:
//!   Y =  0.257*R + 0.504*G + 0.098*B + 16
//!   U = -0.148*R - 0.291*G + 0.439*B + 128
//!   V =  0.439*R - 0.368*G - 0.071*B + 128
//! Each table entry holds `(coef * i) >> 16` (arithmetic shift) stored as a
//! wrapping u16, so sums truncated to 8 bits give the signed result.

const Y_R: i32 = 16763;
const Y_G: i32 = 32904;
const Y_B: i32 = 6391;
const U_R: i32 = -9676;
const U_G: i32 = -18996;
const U_B: i32 = 28672;
const V_R: i32 = 28672;
const V_G: i32 = -24009;
const V_B: i32 = -4663;

const Y_OFFSET: u32 = 16;
const UV_OFFSET: u32 = 128;

/// Precomputed per-channel contributions for Y, U and V.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct YuvLut {
    pub y_r: [u16; 256],
    pub y_g: [u16; 256],
    pub y_b: [u16; 256],
    pub u_r: [u16; 256],
    pub u_g: [u16; 256],
    pub u_b: [u16; 256],
    pub v_r: [u16; 256],
    pub v_g: [u16; 256],
    pub v_b: [u16; 256],
}

const fn scaled(coef: i32, i: usize) -> u16 {
    ((coef * i as i32) >> 16) as u16
}

impl YuvLut {
    pub const fn new() -> Self {
        let mut lut = Self {
            y_r: [0; 256],
            y_g: [0; 256],
            y_b: [0; 256],
            u_r: [0; 256],
            u_g: [0; 256],
            u_b: [0; 256],
            v_r: [0; 256],
            v_g: [0; 256],
            v_b: [0; 256],
        };
        let mut i = 0;
        while i < 256 {
            lut.y_r[i] = scaled(Y_R, i);
            lut.y_g[i] = scaled(Y_G, i);
            lut.y_b[i] = scaled(Y_B, i);
            lut.u_r[i] = scaled(U_R, i);
            lut.u_g[i] = scaled(U_G, i);
            lut.u_b[i] = scaled(U_B, i);
            lut.v_r[i] = scaled(V_R, i);
            lut.v_g[i] = scaled(V_G, i);
            lut.v_b[i] = scaled(V_B, i);
            i += 1;
        }
        lut
    }

    pub fn y(&self, r: u8, g: u8, b: u8) -> u8 {
        let (r, g, b) = (r as usize, g as usize, b as usize);
        (Y_OFFSET + self.y_r[r] as u32 + self.y_g[g] as u32 + self.y_b[b] as u32) as u8
    }

    pub fn u(&self, r: u8, g: u8, b: u8) -> u8 {
        let (r, g, b) = (r as usize, g as usize, b as usize);
        (UV_OFFSET + self.u_r[r] as u32 + self.u_g[g] as u32 + self.u_b[b] as u32) as u8
    }

    pub fn v(&self, r: u8, g: u8, b: u8) -> u8 {
        let (r, g, b) = (r as usize, g as usize, b as usize);
        (UV_OFFSET + self.v_r[r] as u32 + self.v_g[g] as u32 + self.v_b[b] as u32) as u8
    }
}

impl Default for YuvLut {
    fn default() -> Self {
        Self::new()
    }
}

/// Process-wide table, evaluated at compile time and read-only afterwards.
pub static YUV_LUT: YuvLut = YuvLut::new();

/// Split an XRGB8888 pixel into (R, G, B).
#[inline]
pub fn unpack_xrgb(pixel: u32) -> (u8, u8, u8) {
    ((pixel >> 16) as u8, (pixel >> 8) as u8, pixel as u8)
}

#[inline]
pub fn pack_xrgb(r: u8, g: u8, b: u8) -> u32 {
    ((r as u32) << 16) | ((g as u32) << 8) | (b as u32)
}

/// Scanline converter borrowing a shared lookup table.
#[derive(Debug, Clone, Copy)]
pub struct ColorConverter<'a> {
    lut: &'a YuvLut,
}

impl Default for ColorConverter<'static> {
    fn default() -> Self {
        Self::new(&YUV_LUT)
    }
}

impl<'a> ColorConverter<'a> {
    pub fn new(lut: &'a YuvLut) -> Self {
        Self { lut }
    }

    /// Convert one line of XRGB pixels into `src.len() * 2` UYVY bytes.
    ///
    /// Pixels are taken in pairs; chroma is computed once per pair from the
    /// averaged RGB. A trailing odd pixel is ignored.
    pub fn convert_line(&self, src: &[u32], dst: &mut [u8]) {
        debug_assert!(src.len() % 2 == 0, "line width must be even");
        debug_assert!(dst.len() >= src.len() * 2, "destination too small");

        for (pair, out) in src.chunks_exact(2).zip(dst.chunks_exact_mut(4)) {
            let (r1, g1, b1) = unpack_xrgb(pair[0]);
            let (r2, g2, b2) = unpack_xrgb(pair[1]);

            let avg_r = ((r1 as u16 + r2 as u16) >> 1) as u8;
            let avg_g = ((g1 as u16 + g2 as u16) >> 1) as u8;
            let avg_b = ((b1 as u16 + b2 as u16) >> 1) as u8;

            out[0] = self.lut.u(avg_r, avg_g, avg_b);
            out[1] = self.lut.y(r1, g1, b1);
            out[2] = self.lut.v(avg_r, avg_g, avg_b);
            out[3] = self.lut.y(r2, g2, b2);
        }
    }
}

/// Approximate inverse (BT.601 studio swing), used to inspect decoded
/// updates. Returns XRGB8888.
pub fn yuv_to_xrgb(y: u8, u: u8, v: u8) -> u32 {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    let r = (298 * c + 409 * e + 128) >> 8;
    let g = (298 * c - 100 * d - 208 * e + 128) >> 8;
    let b = (298 * c + 516 * d + 128) >> 8;
    pack_xrgb(
        r.clamp(0, 255) as u8,
        g.clamp(0, 255) as u8,
        b.clamp(0, 255) as u8,
    )
}

/// Expand a UYVY line back into XRGB pixels (two per 4-byte group).
pub fn uyvy_line_to_xrgb(src: &[u8], dst: &mut [u32]) {
    for (group, out) in src.chunks_exact(4).zip(dst.chunks_exact_mut(2)) {
        let (u, y1, v, y2) = (group[0], group[1], group[2], group[3]);
        out[0] = yuv_to_xrgb(y1, u, v);
        out[1] = yuv_to_xrgb(y2, u, v);
    }
}
