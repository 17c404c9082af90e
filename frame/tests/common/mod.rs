//! Shared helpers for the frame loop integration tests.

#![allow(dead_code)]

use redlilium_frame::backend::DummyHandle;
use redlilium_frame::{
    DummyBackend, Extent2d, FrameConfig, FrameDriver, GeometryPart, LightRecord,
    RendererSettings, SceneInput,
};

/// Install a test logger once per test binary.
pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Deterministic pseudo-random lights spread over a 100 x 20 x 60 volume.
pub fn lights(count: u32) -> Vec<LightRecord> {
    let mut state = 0x9e37_79b9_u32;
    let mut next = move || {
        state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        (state >> 8) as f32 / (1u32 << 24) as f32
    };
    (0..count)
        .map(|_| {
            let position = [next() * 100.0 - 50.0, next() * 20.0, next() * 60.0 - 30.0];
            LightRecord::new(position, 1.0 + next() * 3.0, [1.0, 0.9, 0.8])
        })
        .collect()
}

/// A scene with one geometry part and `light_count` lights.
pub fn scene(light_count: u32) -> SceneInput {
    SceneInput {
        parts: vec![GeometryPart {
            vertex_range: 0..8,
            index_range: 0..36,
            ..Default::default()
        }],
        world_scale: 1.0,
        lights: lights(light_count),
        overlay_draws: 2,
        ..Default::default()
    }
}

/// Driver over a dummy backend of the given size.
pub fn driver(
    extent: Extent2d,
    settings: RendererSettings,
    config: FrameConfig,
) -> (FrameDriver<DummyBackend>, DummyHandle) {
    init_logger();
    let backend = DummyBackend::new(extent);
    let handle = backend.handle();
    let driver = FrameDriver::new(backend, settings, config).expect("driver creation");
    (driver, handle)
}
