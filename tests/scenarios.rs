use std::sync::Arc;
use std::time::{Duration, Instant};

use proptest::prelude::*;

use ms912x::color::pack_xrgb;
use ms912x::sim::ControlRecord;
use ms912x::transfer::TransferOutcome;
use ms912x::{
    DamageRect, DeviceHandle, DeviceRegistry, FrameStatus, Framebuffer, ManualClock,
    PipelineConfig, SimulatedAdapter,
};

const PACE: Duration = Duration::from_millis(20);

fn setup(config: PipelineConfig) -> (Arc<SimulatedAdapter>, Arc<ManualClock>, DeviceRegistry, DeviceHandle) {
    let sim = Arc::new(SimulatedAdapter::new());
    let clock = Arc::new(ManualClock::new());
    let mut registry = DeviceRegistry::with_clock(config, clock.clone());
    let handle = registry.attach_device(sim.clone()).unwrap();
    (sim, clock, registry, handle)
}

fn checker(width: u32, height: u32) -> Vec<u32> {
    let mut pixels = Vec::with_capacity((width * height) as usize);
    for y in 0..height {
        for x in 0..width {
            let on = ((x / 8) + (y / 8)) % 2 == 0;
            pixels.push(if on { pack_xrgb(200, 40, 40) } else { pack_xrgb(20, 20, 160) });
        }
    }
    pixels
}

#[test]
fn test_backpressure_drop_then_merged_resend_1080p() {
    let (sim, clock, mut registry, handle) = setup(PipelineConfig::default());
    registry.enable(handle, 1920, 1080, 60).unwrap();

    let pixels = checker(1920, 1080);
    let fb = Framebuffer::from_pixels(1920, 1080, &pixels).unwrap();
    let damage = DamageRect::new(100, 100, 500, 400);

    sim.set_stalled(true);
    let first = registry.submit_frame(handle, &fb, damage).unwrap();
    assert_eq!(first, FrameStatus::Sent(DamageRect::new(96, 100, 512, 400)));

    clock.advance(PACE);
    let second = registry.submit_frame(handle, &fb, damage).unwrap();
    assert_eq!(second, FrameStatus::Dropped);
    assert_eq!(registry.device(handle).unwrap().pending_damage(), damage);

    sim.set_stalled(false);
    assert!(registry.device_mut(handle).unwrap().wait_idle(Duration::from_secs(5)));
    clock.advance(PACE);
    let third = registry.submit_frame(handle, &fb, DamageRect::EMPTY).unwrap();
    assert!(matches!(third, FrameStatus::Sent(_)));
    assert!(registry.device_mut(handle).unwrap().wait_idle(Duration::from_secs(5)));

    let header = sim.last_update().unwrap();
    assert!(header.rect().contains(&DamageRect::new(96, 100, 512, 400)));
    assert_eq!(header.x % 16, 0);
    assert_eq!(header.width % 16, 0);
    assert_eq!(sim.updates().len(), 2);
}

#[test]
fn test_back_to_back_submits_without_pacing() {
    let config = PipelineConfig {
        frame_interval: Duration::ZERO,
        ..PipelineConfig::default()
    };
    let (sim, _clock, mut registry, handle) = setup(config);
    registry.enable(handle, 1920, 1080, 60).unwrap();

    let pixels = checker(1920, 1080);
    let fb = Framebuffer::from_pixels(1920, 1080, &pixels).unwrap();
    let damage = DamageRect::new(100, 100, 500, 400);
    let aligned = DamageRect::new(96, 100, 512, 400);

    sim.set_stalled(true);
    assert_eq!(registry.submit_frame(handle, &fb, damage).unwrap(), FrameStatus::Sent(aligned));
    assert_eq!(registry.submit_frame(handle, &fb, damage).unwrap(), FrameStatus::Dropped);
    assert_eq!(registry.device(handle).unwrap().pending_damage(), damage);

    sim.set_stalled(false);
    assert!(registry.device_mut(handle).unwrap().wait_idle(Duration::from_secs(5)));
    let third = registry.submit_frame(handle, &fb, DamageRect::EMPTY).unwrap();
    match third {
        FrameStatus::Sent(rect) => assert!(rect.contains(&aligned)),
        other => panic!("expected a resend, got {other:?}"),
    }
    assert!(registry.device_mut(handle).unwrap().wait_idle(Duration::from_secs(5)));
    assert_eq!(sim.updates().len(), 2);
}

#[test]
fn test_mode_set_1080p_writes() {
    let (sim, _clock, mut registry, handle) = setup(PipelineConfig::default());
    sim.clear_control_log();
    registry.enable(handle, 1920, 1080, 60).unwrap();

    let log = sim.control_log();
    let reads: Vec<_> = log
        .iter()
        .filter(|r| matches!(r, ControlRecord::Read { .. }))
        .collect();
    assert_eq!(reads.len(), 3);

    let writes = sim.writes();
    let expected: Vec<(u16, [u8; 6])> = vec![
        (0x07, [0x01, 0x02, 0, 0, 0, 0]),
        (0x04, [0, 0, 0, 0, 0, 0]),
        (0x03, [0x03, 0, 0, 0, 0, 0]),
        (0x01, [0x07, 0x80, 0x04, 0x38, 0x22, 0x00]),
        (0x02, [0x81, 0x00, 0x07, 0x80, 0x04, 0x38]),
        (0x04, [1, 0, 0, 0, 0, 0]),
        (0x05, [1, 0, 0, 0, 0, 0]),
    ];
    assert_eq!(writes, expected);
}

#[test]
fn test_stuck_transfer_times_out_and_slot_recovers() {
    let config = PipelineConfig {
        transfer_timeout: Duration::from_millis(50),
        ..PipelineConfig::default()
    };
    let (sim, clock, mut registry, handle) = setup(config);
    let pixels = checker(800, 600);
    let fb = Framebuffer::from_pixels(800, 600, &pixels).unwrap();

    sim.set_stalled(true);
    let status = registry.submit_frame(handle, &fb, fb.full_rect()).unwrap();
    assert!(matches!(status, FrameStatus::Sent(_)));

    let device = registry.device_mut(handle).unwrap();
    assert!(device.wait_idle(Duration::from_secs(5)));
    assert_eq!(device.last_outcome(0), Some(&TransferOutcome::TimedOut));
    assert!(sim.updates().is_empty());

    sim.set_stalled(false);
    for _ in 0..2 {
        clock.advance(PACE);
        let status = device.submit_frame(&fb, fb.full_rect()).unwrap();
        assert!(matches!(status, FrameStatus::Sent(_)));
        assert!(device.wait_idle(Duration::from_secs(5)));
    }
    assert!(device.last_outcome(0).unwrap().is_success());
    assert!(device.last_outcome(1).unwrap().is_success());
    assert_eq!(sim.updates().len(), 2);
}

#[test]
fn test_detach_cancels_in_flight_transfer() {
    let (sim, _clock, mut registry, handle) = setup(PipelineConfig::default());
    let pixels = checker(800, 600);
    let fb = Framebuffer::from_pixels(800, 600, &pixels).unwrap();

    sim.set_stalled(true);
    registry.submit_frame(handle, &fb, fb.full_rect()).unwrap();

    let started = Instant::now();
    registry.detach_device(handle).unwrap();
    assert!(started.elapsed() < Duration::from_millis(900));
    assert!(sim.updates().is_empty());
    assert!(registry.is_empty());
}

#[test]
fn test_frames_land_in_adapter_framebuffer() {
    let (sim, clock, mut registry, handle) = setup(PipelineConfig::default());
    let pixels = checker(800, 600);
    let fb = Framebuffer::from_pixels(800, 600, &pixels).unwrap();

    let status = registry
        .submit_frame(handle, &fb, DamageRect::new(0, 0, 800, 300))
        .unwrap();
    assert!(matches!(status, FrameStatus::Sent(_)));
    clock.advance(PACE);
    assert!(registry.device_mut(handle).unwrap().wait_idle(Duration::from_secs(5)));
    let status = registry
        .submit_frame(handle, &fb, DamageRect::new(0, 300, 800, 600))
        .unwrap();
    assert!(matches!(status, FrameStatus::Sent(_)));
    assert!(registry.device_mut(handle).unwrap().wait_idle(Duration::from_secs(5)));

    // red squares decode with a dominant red channel, blue ones with blue
    for (x, y) in [(3u16, 3u16), (12, 12), (400, 500), (785, 595)] {
        let (r, _, b) = ms912x::color::unpack_xrgb(sim.pixel(x, y).unwrap());
        assert!(r > b, "({x},{y}) r={r} b={b}");
    }
    for (x, y) in [(11u16, 3u16), (3, 12), (412, 500)] {
        let (r, _, b) = ms912x::color::unpack_xrgb(sim.pixel(x, y).unwrap());
        assert!(b > r, "({x},{y}) r={r} b={b}");
    }
}

fn visible_rect() -> impl Strategy<Value = DamageRect> {
    (0i32..240, 0i32..120, 1i32..64, 1i32..32)
        .prop_map(|(x, y, w, h)| DamageRect::new(x, y, x + w, y + h))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn test_dropped_damage_accumulates_and_is_sent(rects in prop::collection::vec(visible_rect(), 1..8)) {
        let config = PipelineConfig {
            max_width: 256,
            max_height: 128,
            ..PipelineConfig::default()
        };
        let (sim, clock, mut registry, handle) = setup(config);
        let pixels = checker(256, 128);
        let fb = Framebuffer::from_pixels(256, 128, &pixels).unwrap();

        sim.set_stalled(true);
        let first = registry.submit_frame(handle, &fb, DamageRect::new(0, 0, 16, 1)).unwrap();
        prop_assert!(matches!(first, FrameStatus::Sent(_)));
        clock.advance(PACE);

        let mut union = DamageRect::EMPTY;
        for rect in &rects {
            union = union.union(rect);
            let status = registry.submit_frame(handle, &fb, *rect).unwrap();
            prop_assert_eq!(status, FrameStatus::Dropped);
            let pending = registry.device(handle).unwrap().pending_damage();
            prop_assert_eq!(pending, union);
        }

        sim.set_stalled(false);
        prop_assert!(registry.device_mut(handle).unwrap().wait_idle(Duration::from_secs(5)));
        clock.advance(PACE);
        let status = registry.submit_frame(handle, &fb, DamageRect::EMPTY).unwrap();
        let expected = union.align_to_hardware(256, 128);
        prop_assert_eq!(status, FrameStatus::Sent(expected));
        for rect in &rects {
            prop_assert!(expected.contains(&rect.align_to_hardware(256, 128)));
        }
    }
}
