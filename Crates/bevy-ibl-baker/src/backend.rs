// bevy-ibl-baker/Crates/bevy-ibl-baker/src/backend.rs

//! The interface the baker drives in order to render.
//!
//! Everything the baking passes need from a renderer goes through
//! [RenderBackend]: creating targets, binding them, issuing full-screen draws
//! with named shader parameters, and reading pixels back to the host. The
//! baker never talks to a graphics API directly.

use crate::camera::FaceCamera;
use crate::cubemap::{CubeFace, CubemapPixels};
use arrayvec::ArrayVec;
use bevy::utils::HashMap;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use thiserror::Error as Thiserror;

/// The name of the source environment cubemap parameter.
pub const PARAM_ENV_MAP: &str = "EnvMap";
/// The roughness that the prefilter kernel convolves with.
pub const PARAM_ROUGHNESS: &str = "Roughness";
/// Which cubemap face a draw is processing.
pub const PARAM_FACE_ID: &str = "FaceId";
/// Switches the IBL kernel into its specular prefiltering mode.
pub const PARAM_USE_SPECULAR_IBL: &str = "UseSpecularIBL";
/// The running SH sum from the previous reduction iteration.
pub const PARAM_SH_COEF: &str = "ShCoef";
/// The scale applied to partial sums when accumulating into a fixed-point target.
pub const PARAM_REMAP_MAX_VALUE: &str = "RemapMaxValue";

bitflags! {
    /// Optional features a render backend may support.
    #[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
    pub struct Caps: u32 {
        /// Floating-point RGBA textures can be rendered into.
        const FLOAT_COLOR_BUFFER = 1 << 0;
        /// Floating-point RGBA textures can be sampled.
        const FLOAT_TEXTURE = 1 << 1;
    }
}

/// Texel formats understood by the baker.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash, Serialize, Deserialize)]
pub enum TextureFormat {
    /// Four 32-bit little-endian floats.
    Rgba32Float,
    /// Four unsigned normalized bytes.
    Rgba8Unorm,
    /// Four signed normalized bytes.
    Rgba8Snorm,
}

impl TextureFormat {
    pub fn bytes_per_sample(self) -> u32 {
        match self {
            TextureFormat::Rgba32Float => 16,
            TextureFormat::Rgba8Unorm | TextureFormat::Rgba8Snorm => 4,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, TextureFormat::Rgba32Float)
    }
}

/// An opaque handle to a backend texture.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash, PartialOrd, Ord)]
pub struct TextureId(pub u32);

/// An opaque handle to a backend framebuffer.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash, PartialOrd, Ord)]
pub struct FramebufferId(pub u32);

#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash, Serialize, Deserialize)]
pub enum MinFilter {
    Nearest,
    BilinearNoMipMaps,
    Trilinear,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash, Serialize, Deserialize)]
pub enum MagFilter {
    Nearest,
    Bilinear,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash, Serialize, Deserialize)]
pub enum WrapMode {
    EdgeClamp,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash, Serialize, Deserialize)]
pub enum ColorSpace {
    Linear,
}

/// How a texture is filtered and addressed when sampled.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct SamplerState {
    pub min_filter: MinFilter,
    pub mag_filter: MagFilter,
    pub wrap: WrapMode,
}

/// Describes a cubemap texture to be created by the backend.
#[derive(Clone, Debug)]
pub struct CubemapDescriptor {
    pub size: u32,
    pub format: TextureFormat,
    pub mip_level_count: u32,
    pub sampler: SamplerState,
    pub color_space: ColorSpace,
}

/// One color attachment of a framebuffer: a mip level of a texture, and for
/// cubemaps, one of its faces.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ColorTarget {
    pub texture: TextureId,
    pub level: u32,
    pub face: Option<CubeFace>,
}

impl ColorTarget {
    pub fn texture(texture: TextureId) -> ColorTarget {
        ColorTarget {
            texture,
            level: 0,
            face: None,
        }
    }

    pub fn cubemap_face(texture: TextureId, level: u32, face: CubeFace) -> ColorTarget {
        ColorTarget {
            texture,
            level,
            face: Some(face),
        }
    }
}

/// A framebuffer has at most one color target per cubemap face.
pub type ColorTargets = ArrayVec<ColorTarget, 6>;

/// The logical shader programs the baker draws with.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub enum ShaderKind {
    /// The IBL convolution kernel. Reads `EnvMap`, `Roughness`, `FaceId`, and
    /// `UseSpecularIBL`.
    IblKernels,
    /// Projects one face of `EnvMap` onto the SH basis, adding the optional
    /// `ShCoef` running sum and honoring the optional `RemapMaxValue`.
    ShProjection,
}

/// A single shader uniform value.
#[derive(Clone, Copy, PartialEq, Debug)]
pub enum ShaderParam {
    Texture(TextureId),
    Float(f32),
    Int(i32),
    Bool(bool),
}

/// A shader together with its named parameters, mirroring a material.
#[derive(Clone, Debug, PartialEq)]
pub struct ShaderParams {
    pub shader: ShaderKind,
    params: HashMap<&'static str, ShaderParam>,
}

impl ShaderParams {
    pub fn new(shader: ShaderKind) -> ShaderParams {
        ShaderParams {
            shader,
            params: HashMap::default(),
        }
    }

    pub fn set(&mut self, name: &'static str, value: ShaderParam) {
        self.params.insert(name, value);
    }

    pub fn set_texture(&mut self, name: &'static str, texture: TextureId) {
        self.set(name, ShaderParam::Texture(texture));
    }

    pub fn set_float(&mut self, name: &'static str, value: f32) {
        self.set(name, ShaderParam::Float(value));
    }

    pub fn set_int(&mut self, name: &'static str, value: i32) {
        self.set(name, ShaderParam::Int(value));
    }

    pub fn set_bool(&mut self, name: &'static str, value: bool) {
        self.set(name, ShaderParam::Bool(value));
    }

    pub fn clear(&mut self, name: &str) {
        self.params.remove(name);
    }

    pub fn get(&self, name: &str) -> Option<ShaderParam> {
        self.params.get(name).copied()
    }

    pub fn texture(&self, name: &'static str) -> Result<Option<TextureId>, BackendError> {
        match self.get(name) {
            None => Ok(None),
            Some(ShaderParam::Texture(texture)) => Ok(Some(texture)),
            Some(_) => Err(BackendError::ParameterType(name)),
        }
    }

    pub fn float(&self, name: &'static str) -> Result<Option<f32>, BackendError> {
        match self.get(name) {
            None => Ok(None),
            Some(ShaderParam::Float(value)) => Ok(Some(value)),
            Some(_) => Err(BackendError::ParameterType(name)),
        }
    }

    pub fn int(&self, name: &'static str) -> Result<Option<i32>, BackendError> {
        match self.get(name) {
            None => Ok(None),
            Some(ShaderParam::Int(value)) => Ok(Some(value)),
            Some(_) => Err(BackendError::ParameterType(name)),
        }
    }

    pub fn bool(&self, name: &'static str) -> Result<Option<bool>, BackendError> {
        match self.get(name) {
            None => Ok(None),
            Some(ShaderParam::Bool(value)) => Ok(Some(value)),
            Some(_) => Err(BackendError::ParameterType(name)),
        }
    }
}

/// Failures reported by a render backend.
///
/// The baker never recovers from these; a failed bake leaves its outputs in an
/// undefined state.
#[derive(Thiserror, Debug, Clone, PartialEq)]
pub enum BackendError {
    #[error("No texture with ID {0:?} exists")]
    UnknownTexture(TextureId),
    #[error("No framebuffer with ID {0:?} exists")]
    UnknownFramebuffer(FramebufferId),
    #[error("A draw was issued with no framebuffer bound")]
    NoFramebufferBound,
    #[error("A draw was issued with no camera set")]
    NoCamera,
    #[error("The camera is {camera_width}×{camera_height} but the bound target is {width}×{height}")]
    CameraExtentMismatch {
        camera_width: u32,
        camera_height: u32,
        width: u32,
        height: u32,
    },
    #[error("The camera looks down {camera:?} but the draw renders {face:?}")]
    CameraFaceMismatch { camera: CubeFace, face: CubeFace },
    #[error("Textures must be at least 1×1")]
    EmptyTexture,
    #[error("Framebuffer {framebuffer:?} has no color target {index}")]
    NoSuchTarget {
        framebuffer: FramebufferId,
        index: usize,
    },
    #[error("Color target is {target_size}×{target_size} but the framebuffer is {width}×{height}")]
    TargetSizeMismatch {
        width: u32,
        height: u32,
        target_size: u32,
    },
    #[error("The shader parameter {0} is required but wasn't set")]
    MissingParameter(&'static str),
    #[error("The shader parameter {0} has the wrong type")]
    ParameterType(&'static str),
    #[error("The texture format {0:?} isn't supported by this backend")]
    UnsupportedFormat(TextureFormat),
    #[error("A cubemap was expected but texture {0:?} isn't one")]
    NotACubemap(TextureId),
    #[error("The device failed: {0}")]
    Device(String),
}

/// A renderer capable of executing the baking passes.
///
/// Calls are issued in order on a single command stream, and implementations
/// must execute them in that order: a draw observes every write made by the
/// draws issued before it.
pub trait RenderBackend {
    /// The optional features this backend supports.
    fn caps(&self) -> Caps;

    fn create_cubemap(&mut self, descriptor: &CubemapDescriptor)
        -> Result<TextureId, BackendError>;

    fn create_texture_2d(
        &mut self,
        width: u32,
        height: u32,
        format: TextureFormat,
    ) -> Result<TextureId, BackendError>;

    /// Changes how an existing texture is sampled.
    fn set_sampler(
        &mut self,
        texture: TextureId,
        sampler: &SamplerState,
    ) -> Result<(), BackendError>;

    fn create_framebuffer(
        &mut self,
        width: u32,
        height: u32,
        targets: &[ColorTarget],
    ) -> Result<FramebufferId, BackendError>;

    /// Binds a framebuffer for subsequent draws, rendering into the color
    /// target at `target_index`.
    fn bind_framebuffer(
        &mut self,
        framebuffer: FramebufferId,
        target_index: usize,
    ) -> Result<(), BackendError>;

    fn set_camera(&mut self, camera: &FaceCamera);

    /// Draws a full-screen primitive into the bound target.
    fn draw(&mut self, params: &ShaderParams) -> Result<(), BackendError>;

    /// Reads back the bound target of `framebuffer`, converted to `format`.
    ///
    /// This returns only once the pixel data is available.
    fn read_pixels(
        &mut self,
        framebuffer: FramebufferId,
        format: TextureFormat,
    ) -> Result<Vec<u8>, BackendError>;

    /// Host-resident pixels of a cubemap's top mip level, if the backend keeps
    /// them.
    fn host_pixels(&self, texture: TextureId) -> Option<&CubemapPixels>;

    fn release_framebuffer(&mut self, framebuffer: FramebufferId);

    fn release_texture(&mut self, texture: TextureId);
}

impl<T: RenderBackend + ?Sized> RenderBackend for &mut T {
    fn caps(&self) -> Caps {
        (**self).caps()
    }

    fn create_cubemap(
        &mut self,
        descriptor: &CubemapDescriptor,
    ) -> Result<TextureId, BackendError> {
        (**self).create_cubemap(descriptor)
    }

    fn create_texture_2d(
        &mut self,
        width: u32,
        height: u32,
        format: TextureFormat,
    ) -> Result<TextureId, BackendError> {
        (**self).create_texture_2d(width, height, format)
    }

    fn set_sampler(
        &mut self,
        texture: TextureId,
        sampler: &SamplerState,
    ) -> Result<(), BackendError> {
        (**self).set_sampler(texture, sampler)
    }

    fn create_framebuffer(
        &mut self,
        width: u32,
        height: u32,
        targets: &[ColorTarget],
    ) -> Result<FramebufferId, BackendError> {
        (**self).create_framebuffer(width, height, targets)
    }

    fn bind_framebuffer(
        &mut self,
        framebuffer: FramebufferId,
        target_index: usize,
    ) -> Result<(), BackendError> {
        (**self).bind_framebuffer(framebuffer, target_index)
    }

    fn set_camera(&mut self, camera: &FaceCamera) {
        (**self).set_camera(camera)
    }

    fn draw(&mut self, params: &ShaderParams) -> Result<(), BackendError> {
        (**self).draw(params)
    }

    fn read_pixels(
        &mut self,
        framebuffer: FramebufferId,
        format: TextureFormat,
    ) -> Result<Vec<u8>, BackendError> {
        (**self).read_pixels(framebuffer, format)
    }

    fn host_pixels(&self, texture: TextureId) -> Option<&CubemapPixels> {
        (**self).host_pixels(texture)
    }

    fn release_framebuffer(&mut self, framebuffer: FramebufferId) {
        (**self).release_framebuffer(framebuffer)
    }

    fn release_texture(&mut self, texture: TextureId) {
        (**self).release_texture(texture)
    }
}
