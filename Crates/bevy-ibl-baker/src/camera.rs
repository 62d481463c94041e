// bevy-ibl-baker/Crates/bevy-ibl-baker/src/camera.rs

//! The six cameras used to render into the faces of a cubemap.

use crate::cubemap::CubeFace;
use bevy::math::{vec2, Mat4, Vec2, Vec3};
use std::f32::consts::FRAC_PI_2;

/// The vertical field of view of every face camera.
pub const FACE_CAMERA_FOV: f32 = FRAC_PI_2;
pub const FACE_CAMERA_NEAR: f32 = 1.0;
pub const FACE_CAMERA_FAR: f32 = 1000.0;

/// A 90° perspective camera looking down one cubemap face.
///
/// These are derived per draw and never stored between bakes.
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct FaceCamera {
    pub face: CubeFace,
    pub width: u32,
    pub height: u32,
    pub position: Vec3,
    pub near: f32,
    pub far: f32,
}

impl FaceCamera {
    pub fn new(
        face: CubeFace,
        width: u32,
        height: u32,
        position: Vec3,
        near: f32,
        far: f32,
    ) -> FaceCamera {
        FaceCamera {
            face,
            width,
            height,
            position,
            near,
            far,
        }
    }

    /// The camera the baking passes use for `face`: at the origin, with the
    /// default clip planes.
    pub fn for_face(face: CubeFace, width: u32, height: u32) -> FaceCamera {
        FaceCamera::new(
            face,
            width,
            height,
            Vec3::ZERO,
            FACE_CAMERA_NEAR,
            FACE_CAMERA_FAR,
        )
    }

    pub fn forward(&self) -> Vec3 {
        self.face.forward()
    }

    pub fn up(&self) -> Vec3 {
        self.face.up()
    }

    pub fn aspect_ratio(&self) -> f32 {
        self.width as f32 / self.height.max(1) as f32
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_to_rh(self.position, self.forward(), self.up())
    }

    pub fn projection_matrix(&self) -> Mat4 {
        Mat4::perspective_rh(FACE_CAMERA_FOV, self.aspect_ratio(), self.near, self.far)
    }

    /// Maps the center of pixel `(x, y)` to normalized device coordinates.
    ///
    /// Row 0 is the row nearest -1 on the vertical axis, matching the row
    /// order of texture storage.
    pub fn pixel_ndc(&self, x: u32, y: u32) -> Vec2 {
        vec2(
            2.0 * (x as f32 + 0.5) / self.width as f32 - 1.0,
            2.0 * (y as f32 + 0.5) / self.height as f32 - 1.0,
        )
    }

    /// Maps clip-space points back into world space.
    pub fn world_from_clip(&self) -> Mat4 {
        (self.projection_matrix() * self.view_matrix()).inverse()
    }

    /// The normalized world-space direction of the ray through the center of
    /// pixel `(x, y)`.
    pub fn pixel_direction(&self, x: u32, y: u32) -> Vec3 {
        self.unproject_pixel(&self.world_from_clip(), x, y)
    }

    /// [FaceCamera::pixel_direction] with a precomputed
    /// [FaceCamera::world_from_clip], for rendering whole targets.
    pub fn unproject_pixel(&self, world_from_clip: &Mat4, x: u32, y: u32) -> Vec3 {
        let on_near_plane = world_from_clip.project_point3(self.pixel_ndc(x, y).extend(0.0));
        (on_near_plane - self.position).normalize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cubemap::texel_direction;
    use bevy::math::uvec2;

    #[test]
    fn pixel_rays_match_cubemap_texels() {
        let size = 8;
        for face in CubeFace::ALL {
            let camera = FaceCamera::for_face(face, size, size);
            for y in 0..size {
                for x in 0..size {
                    let expected = texel_direction(face, uvec2(x, y), size);
                    assert!((camera.pixel_direction(x, y) - expected).length() < 1e-5);
                }
            }
        }
    }

    #[test]
    fn view_matrix_looks_down_the_face() {
        for face in CubeFace::ALL {
            let camera = FaceCamera::for_face(face, 4, 4);
            let view_space = camera.view_matrix().transform_vector3(face.forward());
            assert!((view_space - Vec3::NEG_Z).length() < 1e-6, "{:?}", face);
        }
    }

    #[test]
    fn projection_covers_a_quarter_turn() {
        let camera = FaceCamera::for_face(CubeFace::PositiveZ, 16, 16);
        let clip = camera.projection_matrix() * bevy::math::vec4(1.0, 0.0, -1.0, 1.0);
        assert!((clip.x / clip.w - 1.0).abs() < 1e-5);
    }
}
