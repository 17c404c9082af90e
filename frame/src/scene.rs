//! Per-frame scene input.
//!
//! Asset loading and the UI layer live outside the frame core. They hand
//! over plain values: geometry parts with vertex and index ranges into the
//! scene geometry buffer, the camera pose, the light list, and the number of
//! overlay draw commands to merge into composition.

use std::ops::Range;

use crate::light::LightRecord;

bitflags::bitflags! {
    /// Material textures a geometry part provides.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MaterialTextures: u32 {
        const ALBEDO = 1 << 0;
        const NORMAL = 1 << 1;
        const SPECULAR = 1 << 2;
    }
}

/// One drawable part of the loaded model.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GeometryPart {
    /// Vertices of the part within the geometry buffer.
    pub vertex_range: Range<u32>,
    /// Indices of the part within the geometry buffer.
    pub index_range: Range<u32>,
    /// Key of the material descriptor bound for this part.
    pub material_key: u32,
    /// Which material textures are present.
    pub textures: MaterialTextures,
}

impl GeometryPart {
    /// Number of indices drawn.
    pub fn index_count(&self) -> u32 {
        self.index_range.end.saturating_sub(self.index_range.start)
    }
}

/// Camera pose for the frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraPose {
    /// Column-major view matrix.
    pub view: [[f32; 4]; 4],
    /// World-space eye position.
    pub position: [f32; 3],
}

impl Default for CameraPose {
    fn default() -> Self {
        Self {
            view: [
                [1.0, 0.0, 0.0, 0.0],
                [0.0, 1.0, 0.0, 0.0],
                [0.0, 0.0, 1.0, 0.0],
                [0.0, 0.0, 0.0, 1.0],
            ],
            position: [0.0; 3],
        }
    }
}

/// Camera data pushed to the geometry and composition programs.
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct CameraPush {
    pub view: [[f32; 4]; 4],
    pub position: [f32; 3],
    pub world_scale: f32,
}

/// Everything the frame core reads from the scene for one frame.
#[derive(Debug, Clone, Default)]
pub struct SceneInput {
    /// Ordered geometry parts.
    pub parts: Vec<GeometryPart>,
    /// Camera pose.
    pub camera: CameraPose,
    /// Uniform world scale applied to geometry.
    pub world_scale: f32,
    /// Light list. Only the first `FrameConfig::light_count` entries are used.
    pub lights: Vec<LightRecord>,
    /// Overlay draw commands merged into composition.
    pub overlay_draws: u32,
}

impl SceneInput {
    /// Lights used this frame.
    pub fn active_lights(&self, light_count: u32) -> &[LightRecord] {
        let count = (light_count as usize).min(self.lights.len());
        &self.lights[..count]
    }

    /// Push constants for the camera.
    pub fn camera_push(&self) -> CameraPush {
        CameraPush {
            view: self.camera.view,
            position: self.camera.position,
            world_scale: self.world_scale,
        }
    }
}
