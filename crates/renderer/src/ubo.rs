//! Uniform buffer layouts shared with the shaders.
//!
//! All structures are `#[repr(C)]` and `Pod` so they can be written into
//! mapped uniform memory as bytes. Layouts follow std140.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

/// Frame-wide data bound at set 0, binding 0.
///
/// # Memory Layout
///
/// - Offset 0: view matrix (64 bytes)
/// - Offset 64: projection matrix (64 bytes)
/// - Offset 128: view-projection matrix (64 bytes)
/// - Offset 192: camera position (12 bytes)
/// - Offset 204: padding (4 bytes)
/// - Total size: 208 bytes
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct GlobalUbo {
    pub view: Mat4,
    /// Already Y-flipped for Vulkan clip space.
    pub projection: Mat4,
    pub view_projection: Mat4,
    pub camera_position: Vec3,
    pub _padding: f32,
}

impl GlobalUbo {
    pub const SIZE: usize = std::mem::size_of::<Self>();

    pub fn new(view: Mat4, projection: Mat4, camera_position: Vec3) -> Self {
        Self {
            view,
            projection,
            view_projection: projection * view,
            camera_position,
            _padding: 0.0,
        }
    }
}

/// Per-object transform, bound by drawables in their set 1.
///
/// - Offset 0: model matrix (64 bytes)
/// - Offset 64: normal matrix (64 bytes)
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct ObjectUbo {
    pub model: Mat4,
    /// Inverse transpose of the model matrix.
    pub normal_matrix: Mat4,
}

impl ObjectUbo {
    pub const SIZE: usize = std::mem::size_of::<Self>();

    pub fn new(model: Mat4) -> Self {
        Self {
            model,
            normal_matrix: model.inverse().transpose(),
        }
    }
}

/// Right-handed perspective projection with the Y axis flipped for Vulkan's
/// downward clip-space Y.
pub fn vulkan_perspective(fov_y_radians: f32, aspect_ratio: f32, z_near: f32, z_far: f32) -> Mat4 {
    let mut projection = Mat4::perspective_rh(fov_y_radians, aspect_ratio, z_near, z_far);
    projection.y_axis.y *= -1.0;
    projection
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;

    #[test]
    fn test_sizes_match_shader_layout() {
        assert_eq!(GlobalUbo::SIZE, 208);
        assert_eq!(ObjectUbo::SIZE, 128);
    }

    #[test]
    fn test_view_projection_is_premultiplied() {
        let view = Mat4::from_translation(Vec3::new(0.0, 0.0, -5.0));
        let projection = vulkan_perspective(45.0_f32.to_radians(), 1.5, 0.1, 100.0);
        let ubo = GlobalUbo::new(view, projection, Vec3::new(0.0, 0.0, 5.0));
        assert_eq!(ubo.view_projection, projection * view);
    }

    #[test]
    fn test_projection_flips_y() {
        let projection = vulkan_perspective(90.0_f32.to_radians(), 1.0, 0.1, 10.0);
        let clip = projection * Vec4::new(0.0, 1.0, -1.0, 1.0);
        assert!(clip.y / clip.w < 0.0);
    }

    #[test]
    fn test_normal_matrix_of_uniform_scale_keeps_direction() {
        let ubo = ObjectUbo::new(Mat4::from_scale(Vec3::splat(2.0)));
        let normal = ubo.normal_matrix.transform_vector3(Vec3::Y).normalize();
        assert!((normal - Vec3::Y).length() < 1e-6);
    }
}
