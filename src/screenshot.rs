use std::fs;
use std::io::BufWriter;
use std::path::Path;

use thiserror::Error;

use crate::color::pack_xrgb;

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("png encode failed: {0}")]
    Encode(#[from] png::EncodingError),
    #[error("png decode failed: {0}")]
    Decode(#[from] png::DecodingError),
    #[error("unsupported png color type {0:?}")]
    Unsupported(png::ColorType),
}

/// Encode an RGBA framebuffer as a PNG file.
pub fn save_png(path: &Path, rgba_data: &[u8], width: u32, height: u32) -> Result<(), ImageError> {
    let file = fs::File::create(path)?;
    let w = BufWriter::new(file);
    let mut encoder = png::Encoder::new(w, width, height);
    encoder.set_color(png::ColorType::Rgba);
    encoder.set_depth(png::BitDepth::Eight);
    let mut writer = encoder.write_header()?;
    writer.write_image_data(rgba_data)?;
    Ok(())
}

/// Decode a PNG into tightly packed XRGB8888 pixels. Alpha is dropped.
pub fn load_xrgb(path: &Path) -> Result<(u32, u32, Vec<u32>), ImageError> {
    let file = fs::File::open(path)?;
    let mut decoder = png::Decoder::new(file);
    decoder.set_transformations(png::Transformations::EXPAND | png::Transformations::STRIP_16);
    let mut reader = decoder.read_info()?;
    let mut buf = vec![0; reader.output_buffer_size()];
    let info = reader.next_frame(&mut buf)?;

    let channels = match info.color_type {
        png::ColorType::Grayscale => 1,
        png::ColorType::GrayscaleAlpha => 2,
        png::ColorType::Rgb => 3,
        png::ColorType::Rgba => 4,
        other => return Err(ImageError::Unsupported(other)),
    };

    let mut pixels = Vec::with_capacity(info.width as usize * info.height as usize);
    for row in buf.chunks(info.line_size).take(info.height as usize) {
        for px in row.chunks_exact(channels).take(info.width as usize) {
            pixels.push(match channels {
                1 | 2 => pack_xrgb(px[0], px[0], px[0]),
                _ => pack_xrgb(px[0], px[1], px[2]),
            });
        }
    }
    Ok((info.width, info.height, pixels))
}
