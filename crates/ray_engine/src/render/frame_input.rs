//! Per-frame data exchanged with the scene collaborator
//!
//! The scene side hands the backend one [`FrameInput`] per frame: camera
//! matrices, light arrays, and the visible mesh instances split by logical
//! scene (main world vs. the inventory overlay). The backend hands back a
//! [`FrameReport`] carrying the previous frame's mouse-pick result.
//!
//! GPU-side mirror structs live here too so the byte layout that reaches
//! shaders is defined in exactly one place. All of them are `bytemuck::Pod`
//! and match std430/std140 rules for the buffers they feed.

use bytemuck::{Pod, Zeroable};

use crate::foundation::math::{Mat4, Vec3};

/// Identifier of a mesh previously registered through `upload_mesh`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MeshId(pub(crate) u32);

impl MeshId {
    /// Raw index into the mesh table
    pub fn index(self) -> u32 {
        self.0
    }
}

/// Identifier of a texture slot in the global texture array
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureId(pub(crate) u32);

impl TextureId {
    /// Raw slot index in the texture array
    pub fn slot(self) -> u32 {
        self.0
    }
}

/// One vertex in the global vertex buffer, as the asset collaborator
/// supplies it (std430, 32 bytes)
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct MeshVertex {
    /// Object-space position; must come first, acceleration structure
    /// builds read it at stride offsets
    pub position: [f32; 3],
    /// Object-space normal
    pub normal: [f32; 3],
    /// Texture coordinates
    pub uv: [f32; 2],
}

/// One visible mesh instance supplied by the scene collaborator
#[derive(Debug, Clone)]
pub struct MeshInstance {
    /// Mesh to instance
    pub mesh: MeshId,
    /// World transform (column-major)
    pub transform: Mat4,
    /// Material index consumed by the hit shaders
    pub material_index: u32,
    /// Texture-array slot sampled by the hit shaders
    pub texture_index: u32,
}

/// Camera state for one frame
#[derive(Debug, Clone)]
pub struct CameraData {
    /// View matrix
    pub view: Mat4,
    /// Projection matrix
    pub projection: Mat4,
    /// World-space camera position
    pub position: Vec3,
}

impl Default for CameraData {
    fn default() -> Self {
        Self {
            view: Mat4::identity(),
            projection: Mat4::identity(),
            position: Vec3::zeros(),
        }
    }
}

/// One light supplied by the scene collaborator
#[derive(Debug, Clone)]
pub struct LightData {
    /// World-space position
    pub position: Vec3,
    /// Linear RGB color
    pub color: Vec3,
    /// Intensity multiplier
    pub intensity: f32,
    /// Attenuation radius
    pub radius: f32,
}

/// One screen-space UI quad (text glyph, crosshair, laptop panel)
#[derive(Debug, Clone)]
pub struct UiQuad {
    /// Top-left corner in normalized screen coordinates
    pub position: [f32; 2],
    /// Size in normalized screen coordinates
    pub size: [f32; 2],
    /// UV rectangle into the UI atlas texture
    pub uv_rect: [f32; 4],
    /// Tint color
    pub color: [f32; 4],
    /// Texture-array slot of the atlas
    pub texture_index: u32,
}

/// Everything the backend needs to render one frame
#[derive(Debug, Clone, Default)]
pub struct FrameInput {
    /// Camera for the main scene
    pub camera: CameraData,
    /// Lights affecting the main scene
    pub lights: Vec<LightData>,
    /// Visible instances in the main scene
    pub main_scene: Vec<MeshInstance>,
    /// Visible instances in the inventory sub-scene (often empty)
    pub inventory_scene: Vec<MeshInstance>,
    /// UI quads drawn over the composite
    pub ui_quads: Vec<UiQuad>,
    /// Cursor position in normalized [0, 1] screen coordinates
    pub cursor: [f32; 2],
}

/// Mouse-pick readback: which instance and primitive the cursor ray hit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct PickResult {
    /// Index into the frame's instance list, -1 on miss
    pub instance_index: i32,
    /// Triangle index within the hit mesh, -1 on miss
    pub primitive_index: i32,
}

impl PickResult {
    /// The miss value written by the pick shader when no geometry is hit
    pub const NONE: Self = Self {
        instance_index: -1,
        primitive_index: -1,
    };

    /// True when the cursor ray hit any geometry
    pub fn is_hit(&self) -> bool {
        self.instance_index >= 0
    }
}

impl Default for PickResult {
    fn default() -> Self {
        Self::NONE
    }
}

/// What the backend reports back after a frame
#[derive(Debug, Clone, Copy)]
pub struct FrameReport {
    /// Mouse-pick result of the previous presented frame
    pub pick: PickResult,
    /// False when the frame was dropped (minimized or swapchain recreation)
    pub presented: bool,
}

// --- GPU mirror structs ---------------------------------------------------

/// Camera uniform block (set 0, binding 0)
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct CameraDataGpu {
    /// Inverse view matrix, used to generate primary rays
    pub view_inverse: [[f32; 4]; 4],
    /// Inverse projection matrix
    pub projection_inverse: [[f32; 4]; 4],
    /// View-projection matrix for raster passes
    pub view_projection: [[f32; 4]; 4],
    /// Camera position (w unused)
    pub position: [f32; 4],
    /// Cursor position in [0, 1] screen coordinates (zw unused); the pick
    /// dispatch aims its single ray through this point
    pub cursor: [f32; 4],
}

impl CameraDataGpu {
    /// Build the uniform block from collaborator camera state
    ///
    /// Falls back to identity when a matrix is singular; a degenerate camera
    /// should render nothing rather than poison the whole frame with NaNs.
    pub fn from_camera(camera: &CameraData, cursor: [f32; 2]) -> Self {
        let view_inverse = camera.view.try_inverse().unwrap_or_else(Mat4::identity);
        let projection_inverse = camera.projection.try_inverse().unwrap_or_else(Mat4::identity);
        Self {
            view_inverse: view_inverse.into(),
            projection_inverse: projection_inverse.into(),
            view_projection: (camera.projection * camera.view).into(),
            position: [camera.position.x, camera.position.y, camera.position.z, 1.0],
            cursor: [cursor[0], cursor[1], 0.0, 0.0],
        }
    }
}

impl Default for CameraDataGpu {
    fn default() -> Self {
        Self::from_camera(&CameraData::default(), [0.5, 0.5])
    }
}

/// Per-instance record in the 3D instance storage buffer (std430)
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct InstanceDataGpu {
    /// World transform
    pub model: [[f32; 4]; 4],
    /// First vertex of the mesh in the global vertex buffer
    pub vertex_offset: u32,
    /// First index of the mesh in the global index buffer
    pub index_offset: u32,
    /// Material index
    pub material_index: u32,
    /// Texture-array slot
    pub texture_index: u32,
}

/// Light record in the light storage buffer (std430)
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct LightDataGpu {
    /// Position (w = radius)
    pub position_radius: [f32; 4],
    /// Color (w = intensity)
    pub color_intensity: [f32; 4],
}

impl LightDataGpu {
    /// Pack a collaborator light into its GPU record
    pub fn from_light(light: &LightData) -> Self {
        Self {
            position_radius: [light.position.x, light.position.y, light.position.z, light.radius],
            color_intensity: [light.color.x, light.color.y, light.color.z, light.intensity],
        }
    }
}

/// Per-quad record in the UI instance buffer (std430)
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct UiQuadGpu {
    /// Position and size packed as (x, y, w, h)
    pub rect: [f32; 4],
    /// UV rectangle
    pub uv_rect: [f32; 4],
    /// Tint color
    pub color: [f32; 4],
    /// Texture slot (yzw padding)
    pub texture_index: [u32; 4],
}

impl UiQuadGpu {
    /// Pack a collaborator quad into its GPU record
    pub fn from_quad(quad: &UiQuad) -> Self {
        Self {
            rect: [quad.position[0], quad.position[1], quad.size[0], quad.size[1]],
            uv_rect: quad.uv_rect,
            color: quad.color,
            texture_index: [quad.texture_index, 0, 0, 0],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pick_result_miss() {
        let pick = PickResult::NONE;
        assert!(!pick.is_hit());
        assert_eq!(pick.instance_index, -1);
        assert_eq!(pick.primitive_index, -1);
    }

    #[test]
    fn test_pick_result_hit() {
        let pick = PickResult {
            instance_index: 0,
            primitive_index: 42,
        };
        assert!(pick.is_hit());
    }

    #[test]
    fn test_camera_gpu_identity() {
        let gpu = CameraDataGpu::from_camera(&CameraData::default(), [0.25, 0.75]);
        assert_eq!(gpu.view_inverse[0][0], 1.0);
        assert_eq!(gpu.position[3], 1.0);
        assert_eq!(gpu.cursor[0], 0.25);
        assert_eq!(gpu.cursor[1], 0.75);
    }

    #[test]
    fn test_camera_gpu_singular_projection_does_not_panic() {
        let camera = CameraData {
            projection: Mat4::zeros(),
            ..Default::default()
        };
        let gpu = CameraDataGpu::from_camera(&camera, [0.5, 0.5]);
        // Singular matrix falls back to identity instead of NaN
        assert_eq!(gpu.projection_inverse[0][0], 1.0);
    }

    #[test]
    fn test_light_packing() {
        let light = LightData {
            position: Vec3::new(1.0, 2.0, 3.0),
            color: Vec3::new(0.5, 0.25, 0.125),
            intensity: 7.0,
            radius: 10.0,
        };
        let gpu = LightDataGpu::from_light(&light);
        assert_eq!(gpu.position_radius, [1.0, 2.0, 3.0, 10.0]);
        assert_eq!(gpu.color_intensity, [0.5, 0.25, 0.125, 7.0]);
    }

    #[test]
    fn test_mesh_vertex_layout() {
        // Position must sit at offset 0 for acceleration structure builds
        assert_eq!(std::mem::size_of::<MeshVertex>(), 32);
        let v = MeshVertex {
            position: [1.0, 2.0, 3.0],
            normal: [0.0, 1.0, 0.0],
            uv: [0.5, 0.5],
        };
        let bytes = bytemuck::bytes_of(&v);
        assert_eq!(&bytes[0..4], &1.0_f32.to_le_bytes());
    }

    #[test]
    fn test_instance_record_size() {
        // std430 layout consumed by the hit shaders: mat4 + 4 u32
        assert_eq!(std::mem::size_of::<InstanceDataGpu>(), 80);
    }

    #[test]
    fn test_frame_input_default_is_empty() {
        let input = FrameInput::default();
        assert!(input.main_scene.is_empty());
        assert!(input.inventory_scene.is_empty());
        assert!(input.lights.is_empty());
    }
}
