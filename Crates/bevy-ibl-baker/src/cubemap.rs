// bevy-ibl-baker/Crates/bevy-ibl-baker/src/cubemap.rs

//! Cubemap textures, their host-side pixels, and the mapping between cubemap
//! texels and directions.
//!
//! Faces are stored in the order +X, -X, +Y, -Y, +Z, -Z. Within a face, texel
//! `(x, y)` maps to the face coordinates `s = 2(x + ½)/size - 1` and
//! `t = 2(y + ½)/size - 1`, and from there to a direction as follows:
//!
//! ```text
//!   +X → ( 1, -t, -s)    -X → (-1, -t,  s)
//!   +Y → ( s,  1,  t)    -Y → ( s, -1, -t)
//!   +Z → ( s, -t,  1)    -Z → (-s, -t, -1)
//! ```

use crate::backend::{
    BackendError, ColorSpace, CubemapDescriptor, MagFilter, MinFilter, RenderBackend,
    SamplerState, TextureFormat, TextureId, WrapMode,
};
use bevy::math::{uvec2, vec2, vec3, UVec2, Vec2, Vec3, Vec4};

/// One face of a cubemap.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash, PartialOrd, Ord)]
pub enum CubeFace {
    PositiveX = 0,
    NegativeX = 1,
    PositiveY = 2,
    NegativeY = 3,
    PositiveZ = 4,
    NegativeZ = 5,
}

impl CubeFace {
    pub const ALL: [CubeFace; 6] = [
        CubeFace::PositiveX,
        CubeFace::NegativeX,
        CubeFace::PositiveY,
        CubeFace::NegativeY,
        CubeFace::PositiveZ,
        CubeFace::NegativeZ,
    ];

    pub fn from_index(index: usize) -> Option<CubeFace> {
        CubeFace::ALL.get(index).copied()
    }

    pub fn index(self) -> usize {
        self as usize
    }

    /// The direction through the center of this face.
    pub fn forward(self) -> Vec3 {
        match self {
            CubeFace::PositiveX => Vec3::X,
            CubeFace::NegativeX => Vec3::NEG_X,
            CubeFace::PositiveY => Vec3::Y,
            CubeFace::NegativeY => Vec3::NEG_Y,
            CubeFace::PositiveZ => Vec3::Z,
            CubeFace::NegativeZ => Vec3::NEG_Z,
        }
    }

    /// The direction that increasing `t` points toward on this face.
    pub fn up(self) -> Vec3 {
        match self {
            CubeFace::PositiveY => Vec3::Z,
            CubeFace::NegativeY => Vec3::NEG_Z,
            _ => Vec3::NEG_Y,
        }
    }

    /// Maps face coordinates in [-1, 1]² to an unnormalized direction.
    pub fn direction(self, st: Vec2) -> Vec3 {
        let (s, t) = (st.x, st.y);
        match self {
            CubeFace::PositiveX => vec3(1.0, -t, -s),
            CubeFace::NegativeX => vec3(-1.0, -t, s),
            CubeFace::PositiveY => vec3(s, 1.0, t),
            CubeFace::NegativeY => vec3(s, -1.0, -t),
            CubeFace::PositiveZ => vec3(s, -t, 1.0),
            CubeFace::NegativeZ => vec3(-s, -t, -1.0),
        }
    }

    /// Finds the face a direction points into, along with its face
    /// coordinates in [-1, 1]².
    pub fn from_direction(direction: Vec3) -> (CubeFace, Vec2) {
        let abs = direction.abs();
        let (face, sc, tc, major) = if abs.x >= abs.y && abs.x >= abs.z {
            if direction.x >= 0.0 {
                (CubeFace::PositiveX, -direction.z, -direction.y, abs.x)
            } else {
                (CubeFace::NegativeX, direction.z, -direction.y, abs.x)
            }
        } else if abs.y >= abs.z {
            if direction.y >= 0.0 {
                (CubeFace::PositiveY, direction.x, direction.z, abs.y)
            } else {
                (CubeFace::NegativeY, direction.x, -direction.z, abs.y)
            }
        } else if direction.z >= 0.0 {
            (CubeFace::PositiveZ, direction.x, -direction.y, abs.z)
        } else {
            (CubeFace::NegativeZ, -direction.x, -direction.y, abs.z)
        };
        (face, vec2(sc, tc) / major)
    }
}

/// The number of mip levels a cubemap of `size` gets, capped at `max_levels`.
pub fn mip_level_count(size: u32, max_levels: u32) -> u32 {
    (size.max(1).ilog2() + 1).min(max_levels)
}

/// The edge length of mip `level` of a cubemap whose top level is `size`.
pub fn mip_size(size: u32, level: u32) -> u32 {
    size.checked_shr(level).unwrap_or(0).max(1)
}

/// Face coordinates of the center of texel `pos` on a face `size` texels wide.
pub fn texel_face_coords(pos: UVec2, size: u32) -> Vec2 {
    (pos.as_vec2() + 0.5) * (2.0 / size as f32) - 1.0
}

/// The normalized direction through the center of a texel.
pub fn texel_direction(face: CubeFace, pos: UVec2, size: u32) -> Vec3 {
    face.direction(texel_face_coords(pos, size)).normalize()
}

fn area_element(x: f64, y: f64) -> f64 {
    (x * y).atan2((x * x + y * y + 1.0).sqrt())
}

/// The exact solid angle subtended by texel `pos` of a face `size` texels
/// wide. The solid angles of all texels of a cubemap sum to 4π.
pub fn texel_solid_angle(pos: UVec2, size: u32) -> f64 {
    let inv_size = 1.0 / size as f64;
    let x0 = 2.0 * pos.x as f64 * inv_size - 1.0;
    let y0 = 2.0 * pos.y as f64 * inv_size - 1.0;
    let x1 = x0 + 2.0 * inv_size;
    let y1 = y0 + 2.0 * inv_size;
    area_element(x0, y0) - area_element(x0, y1) - area_element(x1, y0) + area_element(x1, y1)
}

/// A cubemap texture living in a render backend.
///
/// This mirrors the sampler and layout state the backend was told about, so
/// that it can be inspected without a round trip.
#[derive(Clone, Debug)]
pub struct Cubemap {
    id: TextureId,
    size: u32,
    format: TextureFormat,
    mip_map_sizes: Vec<usize>,
    sampler: SamplerState,
    color_space: ColorSpace,
}

impl Cubemap {
    /// Creates a cubemap with `mip_level_count` levels in `backend`.
    ///
    /// The per-mip byte-size table lists, for each level, the bytes one face
    /// of that level occupies.
    pub fn new(
        backend: &mut dyn RenderBackend,
        size: u32,
        format: TextureFormat,
        mip_level_count: u32,
        sampler: SamplerState,
        color_space: ColorSpace,
    ) -> Result<Cubemap, BackendError> {
        let id = backend.create_cubemap(&CubemapDescriptor {
            size,
            format,
            mip_level_count,
            sampler,
            color_space,
        })?;
        Ok(Cubemap::from_raw(id, size, format, mip_level_count, sampler, color_space))
    }

    /// Wraps a cubemap that already exists in a backend.
    pub fn from_raw(
        id: TextureId,
        size: u32,
        format: TextureFormat,
        mip_level_count: u32,
        sampler: SamplerState,
        color_space: ColorSpace,
    ) -> Cubemap {
        let mip_map_sizes = (0..mip_level_count)
            .map(|level| {
                let edge = mip_size(size, level) as usize;
                edge * edge * format.bytes_per_sample() as usize
            })
            .collect();
        Cubemap {
            id,
            size,
            format,
            mip_map_sizes,
            sampler,
            color_space,
        }
    }

    pub fn id(&self) -> TextureId {
        self.id
    }

    /// The edge length of the top mip level.
    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn format(&self) -> TextureFormat {
        self.format
    }

    pub fn mip_map_sizes(&self) -> &[usize] {
        &self.mip_map_sizes
    }

    pub fn mip_level_count(&self) -> u32 {
        self.mip_map_sizes.len() as u32
    }

    pub fn min_filter(&self) -> MinFilter {
        self.sampler.min_filter
    }

    pub fn mag_filter(&self) -> MagFilter {
        self.sampler.mag_filter
    }

    pub fn wrap(&self) -> WrapMode {
        self.sampler.wrap
    }

    pub fn color_space(&self) -> ColorSpace {
        self.color_space
    }

    pub fn set_min_filter(
        &mut self,
        backend: &mut dyn RenderBackend,
        min_filter: MinFilter,
    ) -> Result<(), BackendError> {
        let sampler = SamplerState {
            min_filter,
            ..self.sampler
        };
        backend.set_sampler(self.id, &sampler)?;
        self.sampler = sampler;
        Ok(())
    }
}

/// The texels of a single cubemap mip level, resident in host memory.
#[derive(Clone, Debug, PartialEq)]
pub struct CubemapPixels {
    size: u32,
    faces: [Vec<Vec4>; 6],
}

impl CubemapPixels {
    /// A cubemap with every texel of every face set to `color`.
    pub fn constant(size: u32, color: Vec4) -> CubemapPixels {
        let texel_count = size as usize * size as usize;
        CubemapPixels {
            size,
            faces: std::array::from_fn(|_| vec![color; texel_count]),
        }
    }

    /// Builds a cubemap by evaluating `radiance` in the direction of every
    /// texel center.
    pub fn from_fn(size: u32, mut radiance: impl FnMut(Vec3) -> Vec4) -> CubemapPixels {
        let faces = std::array::from_fn(|face_index| {
            let face = CubeFace::ALL[face_index];
            (0..size)
                .flat_map(|y| (0..size).map(move |x| uvec2(x, y)))
                .map(|pos| radiance(texel_direction(face, pos, size)))
                .collect()
        });
        CubemapPixels { size, faces }
    }

    /// Assembles a cubemap from row-major faces in +X, -X, +Y, -Y, +Z, -Z
    /// order. Returns `None` if `size` is zero or a face doesn't hold `size`²
    /// texels.
    pub fn from_faces(size: u32, faces: [Vec<Vec4>; 6]) -> Option<CubemapPixels> {
        let texel_count = size as usize * size as usize;
        if size == 0 || faces.iter().any(|face| face.len() != texel_count) {
            return None;
        }
        Some(CubemapPixels { size, faces })
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn face(&self, face: CubeFace) -> &[Vec4] {
        &self.faces[face.index()]
    }

    pub fn face_mut(&mut self, face: CubeFace) -> &mut [Vec4] {
        &mut self.faces[face.index()]
    }

    pub fn texel(&self, face: CubeFace, pos: UVec2) -> Vec4 {
        self.faces[face.index()][texel_index(self.size, pos)]
    }

    /// Bilinearly samples the cubemap in `direction`, clamping at face edges.
    /// An empty cubemap samples as zero.
    pub fn sample(&self, direction: Vec3) -> Vec4 {
        if self.size == 0 {
            return Vec4::ZERO;
        }
        let (face, st) = CubeFace::from_direction(direction);
        let texels = &self.faces[face.index()];
        let max = self.size as f32 - 1.0;
        let pos = ((st + 1.0) * 0.5 * self.size as f32 - 0.5).clamp(Vec2::ZERO, Vec2::splat(max));
        let p0 = pos.floor();
        let frac = pos - p0;
        let p0 = p0.as_uvec2();
        let p1 = (p0 + 1).min(UVec2::splat(self.size - 1));
        let fetch = |x: u32, y: u32| texels[texel_index(self.size, uvec2(x, y))];
        let top = fetch(p0.x, p0.y).lerp(fetch(p1.x, p0.y), frac.x);
        let bottom = fetch(p0.x, p1.y).lerp(fetch(p1.x, p1.y), frac.x);
        top.lerp(bottom, frac.y)
    }
}

fn texel_index(size: u32, pos: UVec2) -> usize {
    pos.y as usize * size as usize + pos.x as usize
}
