//! Orbiting perspective camera for the demo.

use glam::{Mat4, Vec3};

use vkframe_renderer::GlobalUbo;
use vkframe_renderer::ubo::vulkan_perspective;

/// A camera circling `target` at a fixed distance and height.
#[derive(Clone, Debug)]
pub struct OrbitCamera {
    pub target: Vec3,
    pub distance: f32,
    pub height: f32,
    /// Angle around the Y axis, in radians.
    pub yaw: f32,
    pub fov_y: f32,
    pub z_near: f32,
    pub z_far: f32,
}

impl Default for OrbitCamera {
    fn default() -> Self {
        Self {
            target: Vec3::ZERO,
            distance: 3.0,
            height: 1.5,
            yaw: 0.0,
            fov_y: 45f32.to_radians(),
            z_near: 0.1,
            z_far: 100.0,
        }
    }
}

impl OrbitCamera {
    pub fn position(&self) -> Vec3 {
        self.target
            + Vec3::new(
                self.distance * self.yaw.sin(),
                self.height,
                self.distance * self.yaw.cos(),
            )
    }

    pub fn view(&self) -> Mat4 {
        Mat4::look_at_rh(self.position(), self.target, Vec3::Y)
    }

    pub fn projection(&self, aspect_ratio: f32) -> Mat4 {
        vulkan_perspective(self.fov_y, aspect_ratio, self.z_near, self.z_far)
    }

    pub fn orbit(&mut self, radians: f32) {
        self.yaw = (self.yaw + radians) % std::f32::consts::TAU;
    }

    pub fn global_ubo(&self, aspect_ratio: f32) -> GlobalUbo {
        GlobalUbo::new(
            self.view(),
            self.projection(aspect_ratio),
            self.position(),
        )
    }
}
