// bevy-ibl-baker/Crates/bevy-ibl-baker/src/irradiance.rs

//! Strategies for computing the diffuse SH coefficients of an environment.

use crate::backend::{
    BackendError, Caps, ColorTarget, FramebufferId, RenderBackend, ShaderKind, ShaderParams,
    TextureFormat, TextureId, PARAM_ENV_MAP, PARAM_FACE_ID, PARAM_REMAP_MAX_VALUE, PARAM_SH_COEF,
};
use crate::camera::FaceCamera;
use crate::cubemap::{CubeFace, Cubemap};
use crate::sh::{self, ShCoefficients, SH_COEFFICIENT_COUNT};
use crate::texel;
use crate::{BakeDiagnostic, BakeError, FALLBACK_REMAP_MAX_VALUE};
use bevy::log::{debug, warn};

/// Something that can turn an environment cubemap into nine SH coefficients.
///
/// The baker holds one of these, chosen when it's created.
pub trait IrradianceShStrategy {
    /// Projects `environment` onto the SH basis.
    ///
    /// Non-fatal problems are appended to `diagnostics`.
    fn compute_irradiance_sh(
        &mut self,
        backend: &mut dyn RenderBackend,
        environment: &Cubemap,
        diagnostics: &mut Vec<BakeDiagnostic>,
    ) -> Result<ShCoefficients, BakeError>;

    /// Whether this strategy reads its results back from GPU memory.
    fn is_texture_pulling(&self) -> bool;

    /// Frees any backend resources this strategy owns.
    fn release(&mut self, _backend: &mut dyn RenderBackend) {}
}

/// One iteration of the ping-pong reduction.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct PingPongStep {
    /// The environment face projected in this iteration.
    pub face: CubeFace,
    /// The accumulation buffer written.
    pub write: usize,
    /// The accumulation buffer holding the running sum, if any.
    pub read: Option<usize>,
}

/// The order in which the reduction visits faces and buffers.
///
/// Iteration `i` writes buffer `i mod 2` and reads the other one, which is
/// exactly the buffer iteration `i - 1` wrote. The first iteration has no
/// running sum to read.
pub fn ping_pong_schedule() -> [PingPongStep; 6] {
    std::array::from_fn(|iteration| {
        let write = iteration % 2;
        PingPongStep {
            face: CubeFace::ALL[iteration],
            write,
            read: (iteration > 0).then_some(1 - write),
        }
    })
}

/// The buffer holding the finished sums once the reduction is done.
pub fn final_accumulation_buffer() -> usize {
    ping_pong_schedule()[5].write
}

/// The format the SH sums are accumulated in.
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct AccumulationFormat {
    pub format: TextureFormat,
    /// The scale the shader applies to partial sums so they fit the format.
    pub remap_max_value: Option<f32>,
}

impl AccumulationFormat {
    /// Floating point if the backend can render into it, otherwise signed
    /// 8-bit with remapped partial sums.
    pub fn for_caps(caps: Caps) -> AccumulationFormat {
        if caps.contains(Caps::FLOAT_COLOR_BUFFER) {
            AccumulationFormat {
                format: TextureFormat::Rgba32Float,
                remap_max_value: None,
            }
        } else {
            AccumulationFormat {
                format: TextureFormat::Rgba8Snorm,
                remap_max_value: Some(FALLBACK_REMAP_MAX_VALUE),
            }
        }
    }
}

/// Reduces the environment to SH coefficients on the GPU.
///
/// Each of six draws projects one face onto the basis and adds the running
/// sum from the previous draw, alternating between two 9×1 accumulation
/// buffers. The last buffer written is read back and normalized on the host.
pub struct GpuShReduction {
    buffers: [TextureId; 2],
    accumulation: AccumulationFormat,
}

impl GpuShReduction {
    /// Picks the accumulation format and allocates both buffers.
    pub fn new(backend: &mut dyn RenderBackend) -> Result<GpuShReduction, BackendError> {
        let accumulation = AccumulationFormat::for_caps(backend.caps());
        let width = SH_COEFFICIENT_COUNT as u32;
        let first = backend.create_texture_2d(width, 1, accumulation.format)?;
        let second = match backend.create_texture_2d(width, 1, accumulation.format) {
            Ok(second) => second,
            Err(err) => {
                backend.release_texture(first);
                return Err(err);
            }
        };
        Ok(GpuShReduction {
            buffers: [first, second],
            accumulation,
        })
    }

    pub fn buffers(&self) -> [TextureId; 2] {
        self.buffers
    }

    pub fn accumulation_format(&self) -> AccumulationFormat {
        self.accumulation
    }

    fn reduce(
        &self,
        backend: &mut dyn RenderBackend,
        environment: &Cubemap,
        framebuffers: [FramebufferId; 2],
        diagnostics: &mut Vec<BakeDiagnostic>,
    ) -> Result<ShCoefficients, BakeError> {
        let mut params = ShaderParams::new(ShaderKind::ShProjection);
        params.set_texture(PARAM_ENV_MAP, environment.id());
        match self.accumulation.remap_max_value {
            Some(remap_max_value) => params.set_float(PARAM_REMAP_MAX_VALUE, remap_max_value),
            None => params.clear(PARAM_REMAP_MAX_VALUE),
        }

        let width = SH_COEFFICIENT_COUNT as u32;
        for step in ping_pong_schedule() {
            match step.read {
                Some(read) => params.set_texture(PARAM_SH_COEF, self.buffers[read]),
                None => params.clear(PARAM_SH_COEF),
            }
            params.set_int(PARAM_FACE_ID, step.face.index() as i32);

            // The face comes from `FaceId`; the camera only has to cover the
            // accumulation target.
            backend.set_camera(&FaceCamera::for_face(CubeFace::PositiveX, width, 1));
            backend.bind_framebuffer(framebuffers[step.write], 0)?;
            backend.draw(&params)?;
        }

        let framebuffer = framebuffers[final_accumulation_buffer()];
        let raw = backend.read_pixels(framebuffer, self.accumulation.format)?;
        let texels = texel::decode_texels(&raw, self.accumulation.format);
        debug!("Read back {} accumulated SH texels", texels.len());
        sh::normalize_accumulation(&texels, self.accumulation.remap_max_value, diagnostics)
    }
}

impl IrradianceShStrategy for GpuShReduction {
    fn compute_irradiance_sh(
        &mut self,
        backend: &mut dyn RenderBackend,
        environment: &Cubemap,
        diagnostics: &mut Vec<BakeDiagnostic>,
    ) -> Result<ShCoefficients, BakeError> {
        if let Some(remap_max_value) = self.accumulation.remap_max_value {
            warn!(
                "Float color buffers aren't supported; accumulating SH in {:?}. This may cause \
accuracy issues.",
                self.accumulation.format
            );
            diagnostics.push(BakeDiagnostic::CapabilityMismatch {
                fallback_format: self.accumulation.format,
                remap_max_value,
            });
        }

        let width = SH_COEFFICIENT_COUNT as u32;
        let first = backend.create_framebuffer(width, 1, &[ColorTarget::texture(self.buffers[0])])?;
        let second =
            match backend.create_framebuffer(width, 1, &[ColorTarget::texture(self.buffers[1])]) {
                Ok(second) => second,
                Err(err) => {
                    backend.release_framebuffer(first);
                    return Err(err.into());
                }
            };

        let result = self.reduce(backend, environment, [first, second], diagnostics);
        backend.release_framebuffer(first);
        backend.release_framebuffer(second);
        result
    }

    fn is_texture_pulling(&self) -> bool {
        true
    }

    fn release(&mut self, backend: &mut dyn RenderBackend) {
        for buffer in self.buffers {
            backend.release_texture(buffer);
        }
    }
}

/// Sums the SH projection directly over host-resident environment texels.
///
/// This needs the whole environment in host memory and gets no GPU
/// parallelism, but reads nothing back from render targets.
#[derive(Clone, Copy, Debug, Default)]
pub struct CpuShSummation;

impl IrradianceShStrategy for CpuShSummation {
    fn compute_irradiance_sh(
        &mut self,
        backend: &mut dyn RenderBackend,
        environment: &Cubemap,
        _diagnostics: &mut Vec<BakeDiagnostic>,
    ) -> Result<ShCoefficients, BakeError> {
        let pixels = backend
            .host_pixels(environment.id())
            .ok_or(BakeError::EnvironmentNotResident(environment.id()))?;
        sh::project_cubemap(pixels)
    }

    fn is_texture_pulling(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_pong_never_reads_the_buffer_it_writes() {
        for step in ping_pong_schedule() {
            assert_ne!(step.read, Some(step.write));
        }
    }

    #[test]
    fn ping_pong_reads_the_previous_write() {
        let schedule = ping_pong_schedule();
        assert_eq!(schedule[0].read, None);
        assert_eq!(schedule[0].write, 0);
        for pair in schedule.windows(2) {
            assert_eq!(pair[1].read, Some(pair[0].write));
        }
        assert_eq!(final_accumulation_buffer(), 1);
    }

    #[test]
    fn ping_pong_visits_each_face_once_in_order() {
        let faces: Vec<CubeFace> = ping_pong_schedule().iter().map(|step| step.face).collect();
        assert_eq!(faces, CubeFace::ALL);
    }

    #[test]
    fn accumulation_falls_back_without_float_targets() {
        assert_eq!(
            AccumulationFormat::for_caps(Caps::all()),
            AccumulationFormat {
                format: TextureFormat::Rgba32Float,
                remap_max_value: None,
            }
        );
        let fallback = AccumulationFormat::for_caps(Caps::FLOAT_TEXTURE);
        assert_eq!(fallback.format, TextureFormat::Rgba8Snorm);
        assert_eq!(fallback.remap_max_value, Some(FALLBACK_REMAP_MAX_VALUE));
    }
}
