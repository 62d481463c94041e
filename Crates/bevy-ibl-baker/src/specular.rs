// bevy-ibl-baker/Crates/bevy-ibl-baker/src/specular.rs

//! Prefiltering the environment into a specular cubemap whose mip levels
//! correspond to increasing roughness.

use crate::backend::{
    BackendError, ColorSpace, ColorTarget, ColorTargets, FramebufferId, MagFilter, MinFilter,
    RenderBackend, SamplerState, ShaderKind, ShaderParams, TextureFormat, WrapMode,
    PARAM_ENV_MAP, PARAM_FACE_ID, PARAM_ROUGHNESS, PARAM_USE_SPECULAR_IBL,
};
use crate::camera::FaceCamera;
use crate::cubemap::{mip_level_count, mip_size, CubeFace, Cubemap};
use crate::{BakeError, MAX_SPECULAR_MIP_LEVELS};
use bevy::log::debug;

/// The sampler the specular cubemap uses while its mip chain isn't complete.
const UNBAKED_SAMPLER: SamplerState = SamplerState {
    min_filter: MinFilter::BilinearNoMipMaps,
    mag_filter: MagFilter::Bilinear,
    wrap: WrapMode::EdgeClamp,
};

/// The roughness that mip `level` of a chain of `level_count` levels holds.
///
/// Roughness runs linearly from 0 at the top level to exactly 1 at the last.
pub fn roughness_for_mip(level: u32, level_count: u32) -> f32 {
    if level_count <= 1 {
        0.0
    } else {
        level as f32 / (level_count - 1) as f32
    }
}

/// Owns the specular cubemap and renders the GGX convolution into it.
pub struct SpecularPrefilterPass {
    cubemap: Cubemap,
}

impl SpecularPrefilterPass {
    pub fn new(
        backend: &mut dyn RenderBackend,
        size: u32,
        format: TextureFormat,
    ) -> Result<SpecularPrefilterPass, BakeError> {
        if size == 0 {
            return Err(BakeError::InvalidSettings(
                "the specular cubemap size must be nonzero".to_owned(),
            ));
        }

        let cubemap = Cubemap::new(
            backend,
            size,
            format,
            mip_level_count(size, MAX_SPECULAR_MIP_LEVELS),
            UNBAKED_SAMPLER,
            ColorSpace::Linear,
        )?;
        Ok(SpecularPrefilterPass { cubemap })
    }

    pub fn cubemap(&self) -> &Cubemap {
        &self.cubemap
    }

    /// Overwrites every mip level and face of the specular cubemap.
    ///
    /// Mips are rendered in ascending order and the faces of each mip in
    /// +X, -X, +Y, -Y, +Z, -Z order. Trilinear filtering is only enabled once
    /// the whole chain is written.
    pub fn bake(
        &mut self,
        backend: &mut dyn RenderBackend,
        environment: &Cubemap,
    ) -> Result<(), BackendError> {
        if self.cubemap.min_filter() != UNBAKED_SAMPLER.min_filter {
            self.cubemap
                .set_min_filter(backend, UNBAKED_SAMPLER.min_filter)?;
        }

        let mut params = ShaderParams::new(ShaderKind::IblKernels);
        params.set_bool(PARAM_USE_SPECULAR_IBL, true);
        params.set_texture(PARAM_ENV_MAP, environment.id());

        let level_count = self.cubemap.mip_level_count();
        for level in 0..level_count {
            let size = mip_size(self.cubemap.size(), level);
            let targets: ColorTargets = CubeFace::ALL
                .iter()
                .map(|&face| ColorTarget::cubemap_face(self.cubemap.id(), level, face))
                .collect();
            let framebuffer = backend.create_framebuffer(size, size, &targets)?;

            let roughness = roughness_for_mip(level, level_count);
            params.set_float(PARAM_ROUGHNESS, roughness);
            debug!(
                "Prefiltering specular mip {} ({}×{}, roughness {})",
                level, size, size, roughness
            );

            let result = render_faces(backend, framebuffer, size, &mut params);
            backend.release_framebuffer(framebuffer);
            result?;
        }

        self.cubemap.set_min_filter(backend, MinFilter::Trilinear)
    }

    pub fn release(&self, backend: &mut dyn RenderBackend) {
        backend.release_texture(self.cubemap.id());
    }
}

fn render_faces(
    backend: &mut dyn RenderBackend,
    framebuffer: FramebufferId,
    size: u32,
    params: &mut ShaderParams,
) -> Result<(), BackendError> {
    for face in CubeFace::ALL {
        params.set_int(PARAM_FACE_ID, face.index() as i32);
        backend.set_camera(&FaceCamera::for_face(face, size, size));
        backend.bind_framebuffer(framebuffer, face.index())?;
        backend.draw(params)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roughness_spans_zero_to_one() {
        for level_count in 2..=MAX_SPECULAR_MIP_LEVELS {
            assert_eq!(roughness_for_mip(0, level_count), 0.0);
            assert_eq!(roughness_for_mip(level_count - 1, level_count), 1.0);
        }
        assert_eq!(roughness_for_mip(0, 1), 0.0);
        assert_eq!(roughness_for_mip(2, 5), 0.5);
    }
}
