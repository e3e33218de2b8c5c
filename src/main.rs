use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::Parser;

use ms912x::color::pack_xrgb;
use ms912x::screenshot::{load_xrgb, save_png};
use ms912x::{DamageRect, DeviceRegistry, FrameStatus, Framebuffer, PipelineConfig, SimulatedAdapter};

const BAND_HEIGHT: u32 = 64;

/// Stream frames to a simulated MS912x adapter and save what it received.
#[derive(Parser)]
#[command(name = "ms912x-sim")]
#[command(version)]
struct Cli {
    /// PNG to display. A moving gradient is generated when omitted.
    #[arg(long)]
    image: Option<PathBuf>,

    #[arg(long, default_value_t = 800)]
    width: u32,

    #[arg(long, default_value_t = 600)]
    height: u32,

    #[arg(long, default_value_t = 60)]
    hz: u32,

    /// Number of frame updates to submit
    #[arg(short, long, default_value_t = 120)]
    frames: u32,

    /// Simulated time the adapter takes per bulk transfer
    #[arg(long, default_value_t = 4)]
    latency_ms: u64,

    #[arg(long, default_value_t = 16)]
    frame_interval_ms: u64,

    #[arg(long, default_value_t = 5000)]
    transfer_timeout_ms: u64,

    /// Where to write the adapter's framebuffer
    #[arg(short, long, default_value = "ms912x.png")]
    output: PathBuf,
}

fn gradient(pixels: &mut [u32], width: u32, rows: std::ops::Range<u32>, phase: u32) {
    for y in rows {
        for x in 0..width {
            pixels[(y * width + x) as usize] =
                pack_xrgb((x + phase) as u8, y as u8, ((x + y) / 4) as u8);
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let cli = Cli::parse();

    let config = PipelineConfig {
        frame_interval: Duration::from_millis(cli.frame_interval_ms),
        transfer_timeout: Duration::from_millis(cli.transfer_timeout_ms),
        ..PipelineConfig::default()
    };
    let interval = config.frame_interval;

    let sim = Arc::new(SimulatedAdapter::with_latency(Duration::from_millis(cli.latency_ms)));
    let mut registry = DeviceRegistry::new(config);
    let handle = registry.attach_device(sim.clone())?;
    registry.enable(handle, cli.width, cli.height, cli.hz)?;

    let (width, height, mut pixels, animate) = match &cli.image {
        Some(path) => {
            let (w, h, pixels) = load_xrgb(path)?;
            (w, h, pixels, false)
        }
        None => {
            let mut pixels = vec![0; (cli.width * cli.height) as usize];
            gradient(&mut pixels, cli.width, 0..cli.height, 0);
            (cli.width, cli.height, pixels, true)
        }
    };
    log::info!("streaming {width}x{height} framebuffer, {} frames", cli.frames);

    let (mut sent, mut dropped, mut throttled) = (0u32, 0u32, 0u32);
    for frame in 0..cli.frames {
        let y1 = (frame * BAND_HEIGHT / 2) % height.max(1);
        let y2 = (y1 + BAND_HEIGHT).min(height);
        if animate {
            gradient(&mut pixels, width, y1..y2, frame * 4);
        }
        let damage = DamageRect::new(0, y1 as i32, width as i32, y2 as i32);

        let fb = Framebuffer::from_pixels(width, height, &pixels)?;
        match registry.submit_frame(handle, &fb, damage)? {
            FrameStatus::Sent(rect) => {
                log::debug!("frame {frame}: sent {rect:?}");
                sent += 1;
            }
            FrameStatus::Dropped => dropped += 1,
            FrameStatus::Throttled => throttled += 1,
            FrameStatus::NothingToSend => {}
        }
        thread::sleep(interval / 2);
    }

    // Push out whatever was deferred by the last few frames.
    let fb = Framebuffer::from_pixels(width, height, &pixels)?;
    let device = registry.device_mut(handle)?;
    for _ in 0..10 {
        if device.pending_damage().is_empty() {
            break;
        }
        device.wait_idle(Duration::from_secs(1));
        thread::sleep(interval);
        if let FrameStatus::Sent(_) = device.submit_frame(&fb, DamageRect::EMPTY)? {
            sent += 1;
        }
    }
    if !device.wait_idle(Duration::from_secs(5)) {
        log::warn!("transfers still running at exit");
    }
    log::info!("{sent} sent, {dropped} dropped, {throttled} throttled");

    let (w, h, rgba) = sim.snapshot_rgba();
    save_png(&cli.output, &rgba, w, h)?;
    println!("wrote {}x{} frame to {}", w, h, cli.output.display());

    registry.detach_device(handle)?;
    Ok(())
}
