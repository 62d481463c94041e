// bevy-ibl-baker/Crates/bevy-ibl-baker/src/lib.rs

#![doc = include_str!("../../../README.md")]

use crate::backend::{BackendError, RenderBackend, TextureFormat, TextureId};
use crate::cubemap::Cubemap;
use crate::irradiance::{CpuShSummation, GpuShReduction, IrradianceShStrategy};
use crate::sh::ShCoefficients;
use crate::specular::SpecularPrefilterPass;
use bevy::log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use thiserror::Error as Thiserror;

pub mod backend;
pub mod camera;
pub mod cubemap;
pub mod irradiance;
pub mod sh;
pub mod software;
pub mod specular;
pub mod texel;

pub use crate::backend::Caps;
pub use crate::cubemap::CubemapPixels;
pub use crate::sh::{SH_COEFFICIENT_COUNT, SH_CONSTANT_PROJECTION};

/// The most mip levels (and therefore roughness levels) the specular cubemap
/// gets.
pub const MAX_SPECULAR_MIP_LEVELS: u32 = 6;

/// The scale applied to SH partial sums when they must be accumulated in an
/// 8-bit target.
///
/// Scaled sums clamp at ±1, so the fallback can only represent environments
/// whose coefficient sums stay below 20. For a constant environment that
/// means radiance below about 5.6 (`1 / (0.05 · 4π · Y₀₀)`); brighter
/// environments are reported as [BakeDiagnostic::AccumulationSaturated].
pub const FALLBACK_REMAP_MAX_VALUE: f32 = 0.05;

/// Precomputes image-based lighting from an environment cubemap.
///
/// The baker owns a roughness-prefiltered specular cubemap and an SH strategy
/// chosen at construction. Both outputs are recomputed from scratch on every
/// bake; nothing carries over between calls except the allocations
/// themselves. Backend resources are released when the baker is dropped.
pub struct IblBaker<B: RenderBackend> {
    backend: B,
    environment: Cubemap,
    specular: SpecularPrefilterPass,
    sh_strategy: Box<dyn IrradianceShStrategy>,
    sh_coefficients: Option<ShCoefficients>,
}

/// Which strategy computes the diffuse SH coefficients.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub enum ShStrategyKind {
    /// A ping-pong reduction on the GPU, read back at the end.
    #[default]
    Gpu,
    /// Direct summation over host-resident environment texels.
    Cpu,
}

/// Configuration for an [IblBaker].
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct IblBakerSettings {
    /// The edge length of the top level of the specular cubemap.
    pub specular_size: u32,
    /// The texel format of the specular cubemap.
    pub format: TextureFormat,
    pub sh_strategy: ShStrategyKind,
}

impl Default for IblBakerSettings {
    fn default() -> Self {
        IblBakerSettings {
            specular_size: 256,
            format: TextureFormat::Rgba32Float,
            sh_strategy: ShStrategyKind::Gpu,
        }
    }
}

/// The errors that can occur while setting up or running a bake.
#[derive(Thiserror, Debug)]
pub enum BakeError {
    #[error("The render backend failed: {0}")]
    Backend(#[from] BackendError),
    #[error("The spherical harmonics coefficients were requested before being baked")]
    NotBaked,
    #[error("Invalid baker settings: {0}")]
    InvalidSettings(String),
    #[error("The environment cubemap {0:?} isn't resident in host memory")]
    EnvironmentNotResident(TextureId),
    #[error("Expected {expected} accumulated SH texels but read back {actual}")]
    ReadbackSize { expected: usize, actual: usize },
    #[error("The accumulated SH weight {0} isn't a positive finite number")]
    DegenerateWeight(f32),
}

/// A non-fatal problem noticed during a bake.
#[derive(Clone, Copy, PartialEq, Debug)]
pub enum BakeDiagnostic {
    /// Floating-point render targets aren't available, so SH sums were
    /// accumulated in an 8-bit format after scaling by `remap_max_value`.
    CapabilityMismatch {
        fallback_format: TextureFormat,
        remap_max_value: f32,
    },
    /// An accumulated SH texel carried a different weight than texel 0.
    AccumulationInconsistency {
        texel: usize,
        expected_weight: f32,
        actual_weight: f32,
    },
    /// A remapped SH texel hit the limit of its fixed-point format, so the
    /// coefficient read back from it is clipped.
    AccumulationSaturated { texel: usize, remap_max_value: f32 },
}

/// What a successful bake noticed along the way.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BakeReport {
    pub diagnostics: Vec<BakeDiagnostic>,
}

impl<B: RenderBackend> IblBaker<B> {
    /// Creates a baker for `environment`, allocating the specular cubemap and
    /// the SH strategy selected by `settings`.
    pub fn new(
        mut backend: B,
        environment: Cubemap,
        settings: &IblBakerSettings,
    ) -> Result<IblBaker<B>, BakeError> {
        let sh_strategy: Box<dyn IrradianceShStrategy> = match settings.sh_strategy {
            ShStrategyKind::Gpu => Box::new(GpuShReduction::new(&mut backend)?),
            ShStrategyKind::Cpu => Box::new(CpuShSummation),
        };
        IblBaker::with_sh_strategy(backend, environment, settings, sh_strategy)
    }

    /// Creates a baker that computes SH coefficients with `sh_strategy`.
    ///
    /// `settings.sh_strategy` is ignored.
    pub fn with_sh_strategy(
        mut backend: B,
        environment: Cubemap,
        settings: &IblBakerSettings,
        mut sh_strategy: Box<dyn IrradianceShStrategy>,
    ) -> Result<IblBaker<B>, BakeError> {
        let specular =
            match SpecularPrefilterPass::new(&mut backend, settings.specular_size, settings.format)
            {
                Ok(specular) => specular,
                Err(err) => {
                    sh_strategy.release(&mut backend);
                    return Err(err);
                }
            };

        info!(
            "Created IBL baker: {}×{} specular cubemap with {} mip levels",
            settings.specular_size,
            settings.specular_size,
            specular.cubemap().mip_level_count()
        );

        Ok(IblBaker {
            backend,
            environment,
            specular,
            sh_strategy,
            sh_coefficients: None,
        })
    }

    /// Prefilters the environment into every mip level and face of the
    /// specular cubemap.
    pub fn bake_specular_ibl(&mut self) -> Result<BakeReport, BakeError> {
        debug!("Baking specular IBL");
        self.specular.bake(&mut self.backend, &self.environment)?;
        Ok(BakeReport::default())
    }

    /// The roughness-prefiltered cubemap. Its contents are undefined until
    /// [IblBaker::bake_specular_ibl] has succeeded.
    pub fn specular_ibl(&self) -> &Cubemap {
        self.specular.cubemap()
    }

    /// Computes the nine diffuse SH coefficients of the environment.
    ///
    /// On failure, previously baked coefficients are discarded.
    pub fn bake_spherical_harmonics_coefficients(&mut self) -> Result<BakeReport, BakeError> {
        debug!("Baking spherical harmonics coefficients");
        self.sh_coefficients = None;
        let mut report = BakeReport::default();
        let coefficients = self.sh_strategy.compute_irradiance_sh(
            &mut self.backend,
            &self.environment,
            &mut report.diagnostics,
        )?;
        self.sh_coefficients = Some(coefficients);
        Ok(report)
    }

    /// The coefficients from the last successful SH bake.
    pub fn spherical_harmonics_coefficients(&self) -> Result<&ShCoefficients, BakeError> {
        self.sh_coefficients.as_ref().ok_or(BakeError::NotBaked)
    }

    /// Whether the SH strategy reads accumulated results back from the GPU.
    pub fn is_texture_pulling(&self) -> bool {
        self.sh_strategy.is_texture_pulling()
    }

    pub fn environment(&self) -> &Cubemap {
        &self.environment
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }
}

impl<B: RenderBackend> Drop for IblBaker<B> {
    fn drop(&mut self) {
        self.specular.release(&mut self.backend);
        self.sh_strategy.release(&mut self.backend);
    }
}

impl BakeReport {
    pub fn is_clean(&self) -> bool {
        self.diagnostics.is_empty()
    }
}

impl Display for BakeDiagnostic {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match *self {
            BakeDiagnostic::CapabilityMismatch {
                fallback_format,
                remap_max_value,
            } => write!(
                f,
                "float color buffers unsupported; accumulated SH in {:?} scaled by {}",
                fallback_format, remap_max_value
            ),
            BakeDiagnostic::AccumulationInconsistency {
                texel,
                expected_weight,
                actual_weight,
            } => write!(
                f,
                "SH texel {} has weight {} but texel 0 has {}",
                texel, actual_weight, expected_weight
            ),
            BakeDiagnostic::AccumulationSaturated {
                texel,
                remap_max_value,
            } => write!(
                f,
                "SH texel {} saturated its fixed-point target after scaling by {}; the \
coefficient is clipped",
                texel, remap_max_value
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_fill_in_defaults() {
        let settings: IblBakerSettings = ron::from_str("(specular_size: 64)").unwrap();
        assert_eq!(settings.specular_size, 64);
        assert_eq!(settings.format, TextureFormat::Rgba32Float);
        assert_eq!(settings.sh_strategy, ShStrategyKind::Gpu);

        let settings: IblBakerSettings =
            ron::from_str("(format: Rgba8Unorm, sh_strategy: Cpu)").unwrap();
        assert_eq!(settings.specular_size, 256);
        assert_eq!(settings.format, TextureFormat::Rgba8Unorm);
        assert_eq!(settings.sh_strategy, ShStrategyKind::Cpu);
    }

    #[test]
    fn diagnostics_describe_themselves() {
        let diagnostic = BakeDiagnostic::AccumulationInconsistency {
            texel: 3,
            expected_weight: 1.0,
            actual_weight: 0.5,
        };
        assert_eq!(
            diagnostic.to_string(),
            "SH texel 3 has weight 0.5 but texel 0 has 1"
        );
    }
}
