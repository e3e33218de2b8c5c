use crate::error::{Error, Result};

/// Pixel format code written to register 0x01 during a mode set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Uyvy,
    Rgb,
}

impl PixelFormat {
    pub fn code(&self) -> u16 {
        match self {
            Self::Uyvy => 0x2200,
            Self::Rgb => 0x1111,
        }
    }
}

/// A resolution the adapter knows, with the mode code it expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayMode {
    pub width: u16,
    pub height: u16,
    pub hz: u16,
    pub code: u16,
    pub format: PixelFormat,
}

const fn uyvy(width: u16, height: u16, hz: u16, code: u16) -> DisplayMode {
    DisplayMode {
        width,
        height,
        hz,
        code,
        format: PixelFormat::Uyvy,
    }
}

/// Known modes. Lookup takes the first exact match, so duplicate
/// resolutions resolve to the earlier entry.
pub const MODE_TABLE: &[DisplayMode] = &[
    // Captured from the vendor's Windows driver
    uyvy(800, 600, 60, 0x4200),
    uyvy(1024, 768, 60, 0x4700),
    uyvy(1152, 864, 60, 0x4c00),
    uyvy(1280, 720, 60, 0x4f00),
    uyvy(1280, 800, 60, 0x5700),
    uyvy(1280, 960, 60, 0x5b00),
    uyvy(1280, 1024, 60, 0x6000),
    uyvy(1366, 768, 60, 0x6600),
    uyvy(1400, 1050, 60, 0x6700),
    uyvy(1440, 900, 60, 0x6b00),
    uyvy(1600, 900, 60, 0x7000),
    uyvy(1680, 1050, 60, 0x7800),
    uyvy(1920, 1080, 60, 0x8100),
    uyvy(1920, 1200, 60, 0x8500),
    uyvy(2048, 1152, 60, 0x8900),
    uyvy(2560, 1440, 60, 0x9000),
    // Dumped from the device
    uyvy(720, 480, 60, 0x0200),
    uyvy(720, 576, 60, 0x1100),
    uyvy(640, 480, 60, 0x4000),
    uyvy(1024, 768, 60, 0x4900),
    uyvy(1280, 600, 60, 0x4e00),
    uyvy(1280, 768, 60, 0x5400),
    uyvy(1280, 1024, 60, 0x6100),
    uyvy(1360, 768, 60, 0x6400),
    uyvy(1600, 1200, 60, 0x7300),
    // Extra refresh rates
    uyvy(800, 480, 60, 0x3000),
    uyvy(1024, 600, 60, 0x4500),
    uyvy(1152, 864, 75, 0x4d00),
    uyvy(1280, 768, 60, 0x5300),
    uyvy(1280, 800, 75, 0x5800),
    uyvy(1400, 1050, 75, 0x6800),
    uyvy(1680, 1050, 75, 0x7900),
    uyvy(1920, 1080, 50, 0x8000),
    uyvy(1920, 1080, 75, 0x8200),
];

impl DisplayMode {
    /// Exact (width, height, refresh) match against [`MODE_TABLE`].
    pub fn lookup(width: u32, height: u32, hz: u32) -> Result<&'static DisplayMode> {
        MODE_TABLE
            .iter()
            .find(|m| m.width as u32 == width && m.height as u32 == height && m.hz as u32 == hz)
            .ok_or(Error::UnsupportedMode { width, height, hz })
    }

    pub fn is_supported(width: u32, height: u32, hz: u32) -> bool {
        Self::lookup(width, height, hz).is_ok()
    }
}

impl std::fmt::Display for DisplayMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}@{} (mode {:#06x})", self.width, self.height, self.hz, self.code)
    }
}
