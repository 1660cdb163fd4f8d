//! Per-frame uniform payload.

use crate::constants::FRAME_UNIFORM_SIZE;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

/// Model/view/projection matrices written to each frame's uniform buffer.
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct FrameUniforms {
    pub model: Mat4,
    pub view: Mat4,
    pub proj: Mat4,
}

const _: () = assert!(std::mem::size_of::<FrameUniforms>() == FRAME_UNIFORM_SIZE);

impl Default for FrameUniforms {
    fn default() -> Self {
        Self {
            model: Mat4::IDENTITY,
            view: Mat4::IDENTITY,
            proj: Mat4::IDENTITY,
        }
    }
}

impl FrameUniforms {
    /// Create uniforms from explicit matrices.
    pub const fn new(model: Mat4, view: Mat4, proj: Mat4) -> Self {
        Self { model, view, proj }
    }

    /// Build uniforms for a camera looking from `eye` at `target`.
    ///
    /// The projection is right-handed with a `[0, 1]` depth range and its Y axis
    /// flipped, matching Vulkan clip space.
    pub fn look_at(
        model: Mat4,
        eye: Vec3,
        target: Vec3,
        fov_y_radians: f32,
        aspect: f32,
        near: f32,
        far: f32,
    ) -> Self {
        let view = Mat4::look_at_rh(eye, target, Vec3::Y);
        let mut proj = Mat4::perspective_rh(fov_y_radians, aspect, near, far);
        proj.y_axis.y *= -1.0;
        Self { model, view, proj }
    }

    /// Raw bytes of the payload.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use glam::Vec4;

    #[test]
    fn payload_size() {
        assert_eq!(FrameUniforms::default().as_bytes().len(), 192);
    }

    #[test]
    fn matrices_are_column_major_in_order() {
        let model = Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0));
        let uniforms = FrameUniforms::new(model, Mat4::IDENTITY, Mat4::IDENTITY);
        let floats: &[f32] = bytemuck::cast_slice(uniforms.as_bytes());
        // Translation lives in the fourth column of the model matrix.
        assert_relative_eq!(floats[12], 1.0);
        assert_relative_eq!(floats[13], 2.0);
        assert_relative_eq!(floats[14], 3.0);
        // View starts at float 16 and is identity.
        assert_relative_eq!(floats[16], 1.0);
        assert_relative_eq!(floats[17], 0.0);
    }

    #[test]
    fn projection_flips_y_for_vulkan() {
        let uniforms = FrameUniforms::look_at(
            Mat4::IDENTITY,
            Vec3::new(0.0, 0.0, 2.0),
            Vec3::ZERO,
            std::f32::consts::FRAC_PI_2,
            1.0,
            0.1,
            10.0,
        );
        assert!(uniforms.proj.y_axis.y < 0.0);

        // A point above the target lands in the upper half of the screen,
        // which is negative Y in Vulkan clip space.
        let clip = uniforms.proj * uniforms.view * Vec4::new(0.0, 1.0, 0.0, 1.0);
        assert!(clip.y / clip.w < 0.0);

        // The target sits inside the [0, 1] depth range.
        let center = uniforms.proj * uniforms.view * Vec4::new(0.0, 0.0, 0.0, 1.0);
        let depth = center.z / center.w;
        assert!((0.0..=1.0).contains(&depth));
    }
}
