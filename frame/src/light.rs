//! Light records as uploaded to the GPU.

/// Upper bound on lights per frame. Sizes the staging area and every light
/// list on the device.
pub const MAX_LIGHTS: u32 = 16384;

/// A point light in the layout the culling and composition shaders read.
///
/// Padding is explicit so the record is `bytemuck::Pod` with a 32-byte
/// stride.
#[derive(Debug, Clone, Copy, PartialEq, Default, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct LightRecord {
    /// World-space position.
    pub position: [f32; 3],
    /// Culling radius. Beyond it the light contributes nothing.
    pub radius: f32,
    /// Linear RGB intensity.
    pub intensity: [f32; 3],
    pub _pad: f32,
}

static_assertions::assert_eq_size!(LightRecord, [u8; 32]);

impl LightRecord {
    /// Size of one record in bytes.
    pub const SIZE: u64 = std::mem::size_of::<LightRecord>() as u64;

    /// Create a new light.
    pub fn new(position: [f32; 3], radius: f32, intensity: [f32; 3]) -> Self {
        Self {
            position,
            radius,
            intensity,
            _pad: 0.0,
        }
    }
}

/// Axis-aligned bounds of a set of lights.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightBounds {
    /// Minimum corner.
    pub min: [f32; 3],
    /// Maximum corner.
    pub max: [f32; 3],
}

impl LightBounds {
    /// Bounds of the light positions, or a unit box when `lights` is empty.
    pub fn of(lights: &[LightRecord]) -> Self {
        let Some(first) = lights.first() else {
            return Self {
                min: [0.0; 3],
                max: [1.0; 3],
            };
        };
        let mut bounds = Self {
            min: first.position,
            max: first.position,
        };
        for light in &lights[1..] {
            for axis in 0..3 {
                bounds.min[axis] = bounds.min[axis].min(light.position[axis]);
                bounds.max[axis] = bounds.max[axis].max(light.position[axis]);
            }
        }
        bounds
    }

    /// Largest edge, never below a small epsilon so it can be inverted.
    pub fn extent(&self) -> f32 {
        (0..3)
            .map(|axis| self.max[axis] - self.min[axis])
            .fold(f32::EPSILON, f32::max)
    }
}
