// SPDX-License-Identifier: CEPL-1.0
//! Camera math for the orbiting view.
//!
//! Matrices follow Vulkan conventions: right-handed, depth in `[0, 1]`, and
//! clip-space Y pointing down (the projection's Y axis is flipped).
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

/// Degrees per second the model turns about its up axis.
pub const SPIN_DEGREES_PER_SEC: f32 = 90.0;

pub const FOV_Y_DEGREES: f32 = 45.0;
pub const Z_NEAR: f32 = 0.1;
pub const Z_FAR: f32 = 10.0;

/// Uniform block consumed by the vertex shader at set 0, binding 0.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct CameraUbo {
    pub model: [[f32; 4]; 4],
    pub view: [[f32; 4]; 4],
    pub proj: [[f32; 4]; 4],
}

impl CameraUbo {
    pub fn new(model: Mat4, view: Mat4, proj: Mat4) -> Self {
        Self {
            model: model.to_cols_array_2d(),
            view: view.to_cols_array_2d(),
            proj: proj.to_cols_array_2d(),
        }
    }

    /// Model spinning about +Z, seen from (2, 2, 2) looking at the origin.
    pub fn orbiting(elapsed_secs: f32, aspect: f32) -> Self {
        let model = Mat4::from_rotation_z(elapsed_secs * SPIN_DEGREES_PER_SEC.to_radians());
        let view = Mat4::look_at_rh(Vec3::splat(2.0), Vec3::ZERO, Vec3::Z);
        Self::new(model, view, vulkan_perspective(aspect))
    }
}

/// Aspect ratio of a framebuffer, guarding against a zero height.
pub fn aspect_ratio(width: u32, height: u32) -> f32 {
    width as f32 / height.max(1) as f32
}

pub fn vulkan_perspective(aspect: f32) -> Mat4 {
    let mut proj = Mat4::perspective_rh(FOV_Y_DEGREES.to_radians(), aspect, Z_NEAR, Z_FAR);
    // GL-style projection has +Y up in clip space; Vulkan's points down.
    proj.y_axis.y *= -1.0;
    proj
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;

    #[test]
    fn ubo_is_three_column_major_mat4s() {
        assert_eq!(std::mem::size_of::<CameraUbo>(), 3 * 64);
        let ubo = CameraUbo::new(Mat4::IDENTITY, Mat4::IDENTITY, Mat4::IDENTITY);
        assert_eq!(bytemuck::bytes_of(&ubo).len(), 192);
        assert_eq!(ubo.model[3], [0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn model_turns_a_quarter_per_second() {
        let ubo = CameraUbo::orbiting(1.0, 1.0);
        let model = Mat4::from_cols_array_2d(&ubo.model);
        let x = model * Vec4::new(1.0, 0.0, 0.0, 1.0);
        assert!(x.abs_diff_eq(Vec4::new(0.0, 1.0, 0.0, 1.0), 1e-5));
    }

    #[test]
    fn projection_flips_y() {
        let flipped = vulkan_perspective(4.0 / 3.0);
        let plain = Mat4::perspective_rh(FOV_Y_DEGREES.to_radians(), 4.0 / 3.0, Z_NEAR, Z_FAR);
        assert_eq!(flipped.y_axis.y, -plain.y_axis.y);
        assert_eq!(flipped.x_axis.x, plain.x_axis.x);
    }

    #[test]
    fn origin_lands_inside_depth_range() {
        let ubo = CameraUbo::orbiting(0.0, aspect_ratio(800, 600));
        let clip = Mat4::from_cols_array_2d(&ubo.proj)
            * Mat4::from_cols_array_2d(&ubo.view)
            * Vec4::new(0.0, 0.0, 0.0, 1.0);
        let depth = clip.z / clip.w;
        assert!(depth > 0.0 && depth < 1.0, "depth {depth}");
        assert!((clip.x / clip.w).abs() < 1e-5);
    }

    #[test]
    fn aspect_ratio_tolerates_zero_height() {
        assert_eq!(aspect_ratio(800, 0), 800.0);
        assert_eq!(aspect_ratio(800, 400), 2.0);
    }
}
