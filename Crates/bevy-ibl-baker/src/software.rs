// bevy-ibl-baker/Crates/bevy-ibl-baker/src/software.rs

//! A render backend that executes the baking shaders on the host.
//!
//! [SoftwareBackend] is a reference implementation of [RenderBackend]. It runs
//! the IBL prefilter kernel and the SH projection kernel directly on
//! [CubemapPixels], rounds every write to the target's texel format the way a
//! GPU would, and records each command it executes so that callers can check
//! the order passes were issued in.

use crate::backend::{
    BackendError, Caps, ColorSpace, ColorTarget, CubemapDescriptor, FramebufferId, MagFilter,
    MinFilter, RenderBackend, SamplerState, ShaderKind, ShaderParams, TextureFormat, TextureId,
    WrapMode, PARAM_ENV_MAP, PARAM_FACE_ID, PARAM_REMAP_MAX_VALUE, PARAM_ROUGHNESS,
    PARAM_SH_COEF, PARAM_USE_SPECULAR_IBL,
};
use crate::camera::FaceCamera;
use crate::cubemap::{mip_size, CubeFace, Cubemap, CubemapPixels};
use crate::sh;
use crate::texel;
use bevy::log::debug;
use bevy::math::{vec2, Vec2, Vec3, Vec4};
use bevy::utils::HashMap;
use std::f32::consts::PI;

/// How many GGX samples the prefilter kernel takes per texel by default.
pub const DEFAULT_SPECULAR_SAMPLE_COUNT: u32 = 64;

/// A command the backend executed, in execution order.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    SetSampler {
        texture: TextureId,
        sampler: SamplerState,
    },
    SetCamera(FaceCamera),
    BindFramebuffer {
        framebuffer: FramebufferId,
        target: ColorTarget,
    },
    Draw {
        target: ColorTarget,
        params: ShaderParams,
    },
    ReadPixels {
        framebuffer: FramebufferId,
        target: ColorTarget,
        format: TextureFormat,
    },
    ReleaseFramebuffer(FramebufferId),
    ReleaseTexture(TextureId),
}

enum Storage {
    Cube(Vec<CubemapPixels>),
    Flat {
        width: u32,
        height: u32,
        texels: Vec<Vec4>,
    },
}

struct SoftwareTexture {
    format: TextureFormat,
    sampler: SamplerState,
    storage: Storage,
}

struct SoftwareFramebuffer {
    width: u32,
    height: u32,
    targets: Vec<ColorTarget>,
    target_index: usize,
}

/// Executes baking passes on the host.
pub struct SoftwareBackend {
    caps: Caps,
    specular_sample_count: u32,
    host_visible: bool,
    next_id: u32,
    textures: HashMap<TextureId, SoftwareTexture>,
    framebuffers: HashMap<FramebufferId, SoftwareFramebuffer>,
    bound_framebuffer: Option<FramebufferId>,
    camera: Option<FaceCamera>,
    commands: Vec<Command>,
    draw_count: usize,
    fail_at_draw: Option<usize>,
}

impl SoftwareBackend {
    pub fn new(caps: Caps) -> SoftwareBackend {
        SoftwareBackend {
            caps,
            specular_sample_count: DEFAULT_SPECULAR_SAMPLE_COUNT,
            host_visible: true,
            next_id: 0,
            textures: HashMap::default(),
            framebuffers: HashMap::default(),
            bound_framebuffer: None,
            camera: None,
            commands: vec![],
            draw_count: 0,
            fail_at_draw: None,
        }
    }

    /// Sets how many GGX samples the prefilter kernel takes per texel.
    pub fn with_specular_sample_count(mut self, sample_count: u32) -> SoftwareBackend {
        self.specular_sample_count = sample_count.max(1);
        self
    }

    /// Controls whether [RenderBackend::host_pixels] exposes texture data.
    pub fn with_host_visibility(mut self, host_visible: bool) -> SoftwareBackend {
        self.host_visible = host_visible;
        self
    }

    /// Makes the draw with zero-based index `draw_index` fail, counting from
    /// now.
    pub fn fail_at_draw(&mut self, draw_index: usize) {
        self.fail_at_draw = Some(self.draw_count + draw_index);
    }

    /// Creates a single-level linear cubemap holding `pixels`.
    pub fn upload_cubemap(
        &mut self,
        pixels: CubemapPixels,
        format: TextureFormat,
    ) -> Result<Cubemap, BackendError> {
        if pixels.size() == 0 {
            return Err(BackendError::EmptyTexture);
        }
        self.check_sampleable(format)?;
        let sampler = SamplerState {
            min_filter: MinFilter::BilinearNoMipMaps,
            mag_filter: MagFilter::Bilinear,
            wrap: WrapMode::EdgeClamp,
        };
        let size = pixels.size();
        let mut pixels = pixels;
        for face in CubeFace::ALL {
            for texel in pixels.face_mut(face) {
                *texel = texel::quantize(*texel, format);
            }
        }
        let id = self.insert_texture(SoftwareTexture {
            format,
            sampler,
            storage: Storage::Cube(vec![pixels]),
        });
        Ok(Cubemap::from_raw(
            id,
            size,
            format,
            1,
            sampler,
            ColorSpace::Linear,
        ))
    }

    /// The texels of mip `level` of a cubemap.
    pub fn cubemap_pixels(&self, texture: TextureId, level: u32) -> Option<&CubemapPixels> {
        match &self.textures.get(&texture)?.storage {
            Storage::Cube(levels) => levels.get(level as usize),
            Storage::Flat { .. } => None,
        }
    }

    /// The texels of a 2D texture, row by row.
    pub fn texture_texels(&self, texture: TextureId) -> Option<&[Vec4]> {
        match &self.textures.get(&texture)?.storage {
            Storage::Flat { texels, .. } => Some(texels.as_slice()),
            Storage::Cube(_) => None,
        }
    }

    pub fn sampler(&self, texture: TextureId) -> Option<SamplerState> {
        self.textures.get(&texture).map(|texture| texture.sampler)
    }

    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    pub fn framebuffer_count(&self) -> usize {
        self.framebuffers.len()
    }

    /// Every command executed so far.
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn clear_commands(&mut self) {
        self.commands.clear();
    }

    fn allocate_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn insert_texture(&mut self, texture: SoftwareTexture) -> TextureId {
        let id = TextureId(self.allocate_id());
        self.textures.insert(id, texture);
        id
    }

    fn check_sampleable(&self, format: TextureFormat) -> Result<(), BackendError> {
        if format.is_float() && !self.caps.contains(Caps::FLOAT_TEXTURE) {
            return Err(BackendError::UnsupportedFormat(format));
        }
        Ok(())
    }

    fn texture(&self, texture: TextureId) -> Result<&SoftwareTexture, BackendError> {
        self.textures
            .get(&texture)
            .ok_or(BackendError::UnknownTexture(texture))
    }

    fn environment(&self, params: &ShaderParams) -> Result<&CubemapPixels, BackendError> {
        let texture = params
            .texture(PARAM_ENV_MAP)?
            .ok_or(BackendError::MissingParameter(PARAM_ENV_MAP))?;
        match &self.texture(texture)?.storage {
            Storage::Cube(levels) => levels.first().ok_or(BackendError::NotACubemap(texture)),
            Storage::Flat { .. } => Err(BackendError::NotACubemap(texture)),
        }
    }

    fn face_id(params: &ShaderParams) -> Result<CubeFace, BackendError> {
        let face_id = params
            .int(PARAM_FACE_ID)?
            .ok_or(BackendError::MissingParameter(PARAM_FACE_ID))?;
        usize::try_from(face_id)
            .ok()
            .and_then(CubeFace::from_index)
            .ok_or(BackendError::ParameterType(PARAM_FACE_ID))
    }

    fn bound_target(&self) -> Result<(&SoftwareFramebuffer, ColorTarget), BackendError> {
        let framebuffer_id = self
            .bound_framebuffer
            .ok_or(BackendError::NoFramebufferBound)?;
        let framebuffer = self
            .framebuffers
            .get(&framebuffer_id)
            .ok_or(BackendError::UnknownFramebuffer(framebuffer_id))?;
        let target = framebuffer.targets.get(framebuffer.target_index).ok_or(
            BackendError::NoSuchTarget {
                framebuffer: framebuffer_id,
                index: framebuffer.target_index,
            },
        )?;
        Ok((framebuffer, *target))
    }

    /// Runs the IBL kernel in specular mode for every texel of the target,
    /// casting one ray per pixel through `camera`.
    fn run_ibl_kernels(
        &self,
        params: &ShaderParams,
        camera: &FaceCamera,
    ) -> Result<Vec<Vec4>, BackendError> {
        if params.bool(PARAM_USE_SPECULAR_IBL)? != Some(true) {
            return Err(BackendError::MissingParameter(PARAM_USE_SPECULAR_IBL));
        }
        let environment = self.environment(params)?;
        let roughness = params
            .float(PARAM_ROUGHNESS)?
            .ok_or(BackendError::MissingParameter(PARAM_ROUGHNESS))?;
        let face = Self::face_id(params)?;
        if camera.face != face {
            return Err(BackendError::CameraFaceMismatch {
                camera: camera.face,
                face,
            });
        }

        let world_from_clip = camera.world_from_clip();
        let mut output = Vec::with_capacity(camera.width as usize * camera.height as usize);
        for y in 0..camera.height {
            for x in 0..camera.width {
                let normal = camera.unproject_pixel(&world_from_clip, x, y);
                let radiance = prefilter_ggx(
                    environment,
                    normal,
                    roughness,
                    self.specular_sample_count,
                );
                output.push(radiance.extend(1.0));
            }
        }
        Ok(output)
    }

    /// Projects one environment face onto the SH basis and adds the running
    /// sum, one coefficient per output texel.
    fn run_sh_projection(
        &self,
        params: &ShaderParams,
        width: u32,
        height: u32,
    ) -> Result<Vec<Vec4>, BackendError> {
        let environment = self.environment(params)?;
        let face = Self::face_id(params)?;
        let remap_max_value = params.float(PARAM_REMAP_MAX_VALUE)?.unwrap_or(1.0);
        let previous = match params.texture(PARAM_SH_COEF)? {
            None => None,
            Some(texture) => match &self.texture(texture)?.storage {
                Storage::Flat { texels, .. } => Some(texels.as_slice()),
                Storage::Cube(_) => return Err(BackendError::ParameterType(PARAM_SH_COEF)),
            },
        };

        let sums = sh::project_face(environment, face);
        let mut output = vec![Vec4::ZERO; width as usize * height as usize];
        for (index, sum) in sums.iter().enumerate().take(width as usize) {
            let running = previous
                .and_then(|previous| previous.get(index))
                .copied()
                .unwrap_or(Vec4::ZERO);
            output[index] = running + *sum * remap_max_value;
        }
        Ok(output)
    }

    fn write_target(&mut self, target: ColorTarget, output: Vec<Vec4>) -> Result<(), BackendError> {
        let texture = self
            .textures
            .get_mut(&target.texture)
            .ok_or(BackendError::UnknownTexture(target.texture))?;
        let format = texture.format;
        let destination: &mut [Vec4] = match (&mut texture.storage, target.face) {
            (Storage::Cube(levels), Some(face)) => levels
                .get_mut(target.level as usize)
                .ok_or(BackendError::UnknownTexture(target.texture))?
                .face_mut(face),
            (Storage::Flat { texels, .. }, None) => texels.as_mut_slice(),
            _ => return Err(BackendError::NotACubemap(target.texture)),
        };
        for (destination, texel) in destination.iter_mut().zip(output) {
            *destination = texel::quantize(texel, format);
        }
        Ok(())
    }

    fn target_extent(&self, target: &ColorTarget) -> Result<(u32, u32), BackendError> {
        match (&self.texture(target.texture)?.storage, target.face) {
            (Storage::Cube(levels), Some(_)) => levels
                .get(target.level as usize)
                .map(|level| (level.size(), level.size()))
                .ok_or(BackendError::UnknownTexture(target.texture)),
            (Storage::Flat { width, height, .. }, None) => Ok((*width, *height)),
            _ => Err(BackendError::NotACubemap(target.texture)),
        }
    }

    fn target_texels(&self, target: &ColorTarget) -> Result<&[Vec4], BackendError> {
        match (&self.texture(target.texture)?.storage, target.face) {
            (Storage::Cube(levels), Some(face)) => levels
                .get(target.level as usize)
                .map(|level| level.face(face))
                .ok_or(BackendError::UnknownTexture(target.texture)),
            (Storage::Flat { texels, .. }, None) => Ok(texels.as_slice()),
            _ => Err(BackendError::NotACubemap(target.texture)),
        }
    }
}

impl RenderBackend for SoftwareBackend {
    fn caps(&self) -> Caps {
        self.caps
    }

    fn create_cubemap(
        &mut self,
        descriptor: &CubemapDescriptor,
    ) -> Result<TextureId, BackendError> {
        if descriptor.size == 0 {
            return Err(BackendError::EmptyTexture);
        }
        self.check_sampleable(descriptor.format)?;
        let levels = (0..descriptor.mip_level_count.max(1))
            .map(|level| CubemapPixels::constant(mip_size(descriptor.size, level), Vec4::ZERO))
            .collect();
        Ok(self.insert_texture(SoftwareTexture {
            format: descriptor.format,
            sampler: descriptor.sampler,
            storage: Storage::Cube(levels),
        }))
    }

    fn create_texture_2d(
        &mut self,
        width: u32,
        height: u32,
        format: TextureFormat,
    ) -> Result<TextureId, BackendError> {
        if width == 0 || height == 0 {
            return Err(BackendError::EmptyTexture);
        }
        self.check_sampleable(format)?;
        Ok(self.insert_texture(SoftwareTexture {
            format,
            sampler: SamplerState {
                min_filter: MinFilter::Nearest,
                mag_filter: MagFilter::Nearest,
                wrap: WrapMode::EdgeClamp,
            },
            storage: Storage::Flat {
                width,
                height,
                texels: vec![Vec4::ZERO; width as usize * height as usize],
            },
        }))
    }

    fn set_sampler(
        &mut self,
        texture: TextureId,
        sampler: &SamplerState,
    ) -> Result<(), BackendError> {
        self.textures
            .get_mut(&texture)
            .ok_or(BackendError::UnknownTexture(texture))?
            .sampler = *sampler;
        self.commands.push(Command::SetSampler {
            texture,
            sampler: *sampler,
        });
        Ok(())
    }

    fn create_framebuffer(
        &mut self,
        width: u32,
        height: u32,
        targets: &[ColorTarget],
    ) -> Result<FramebufferId, BackendError> {
        for target in targets {
            let format = self.texture(target.texture)?.format;
            if format.is_float() && !self.caps.contains(Caps::FLOAT_COLOR_BUFFER) {
                return Err(BackendError::UnsupportedFormat(format));
            }
            let (target_width, target_height) = self.target_extent(target)?;
            if (target_width, target_height) != (width, height) {
                return Err(BackendError::TargetSizeMismatch {
                    width,
                    height,
                    target_size: target_width,
                });
            }
        }

        let id = FramebufferId(self.allocate_id());
        self.framebuffers.insert(
            id,
            SoftwareFramebuffer {
                width,
                height,
                targets: targets.to_vec(),
                target_index: 0,
            },
        );
        Ok(id)
    }

    fn bind_framebuffer(
        &mut self,
        framebuffer: FramebufferId,
        target_index: usize,
    ) -> Result<(), BackendError> {
        let state = self
            .framebuffers
            .get_mut(&framebuffer)
            .ok_or(BackendError::UnknownFramebuffer(framebuffer))?;
        let target = *state
            .targets
            .get(target_index)
            .ok_or(BackendError::NoSuchTarget {
                framebuffer,
                index: target_index,
            })?;
        state.target_index = target_index;
        self.bound_framebuffer = Some(framebuffer);
        self.commands.push(Command::BindFramebuffer {
            framebuffer,
            target,
        });
        Ok(())
    }

    fn set_camera(&mut self, camera: &FaceCamera) {
        self.camera = Some(*camera);
        self.commands.push(Command::SetCamera(*camera));
    }

    fn draw(&mut self, params: &ShaderParams) -> Result<(), BackendError> {
        let draw_index = self.draw_count;
        self.draw_count += 1;
        if self.fail_at_draw == Some(draw_index) {
            self.fail_at_draw = None;
            return Err(BackendError::Device(format!("draw {} was lost", draw_index)));
        }

        let (framebuffer, target) = self.bound_target()?;
        let (width, height) = (framebuffer.width, framebuffer.height);
        let camera = self.camera.ok_or(BackendError::NoCamera)?;
        if (camera.width, camera.height) != (width, height) {
            return Err(BackendError::CameraExtentMismatch {
                camera_width: camera.width,
                camera_height: camera.height,
                width,
                height,
            });
        }

        let output = match params.shader {
            ShaderKind::IblKernels => self.run_ibl_kernels(params, &camera)?,
            ShaderKind::ShProjection => self.run_sh_projection(params, width, height)?,
        };
        self.write_target(target, output)?;
        self.commands.push(Command::Draw {
            target,
            params: params.clone(),
        });
        Ok(())
    }

    fn read_pixels(
        &mut self,
        framebuffer: FramebufferId,
        format: TextureFormat,
    ) -> Result<Vec<u8>, BackendError> {
        let state = self
            .framebuffers
            .get(&framebuffer)
            .ok_or(BackendError::UnknownFramebuffer(framebuffer))?;
        let target = *state
            .targets
            .get(state.target_index)
            .ok_or(BackendError::NoSuchTarget {
                framebuffer,
                index: state.target_index,
            })?;

        let texels = self.target_texels(&target)?;
        let mut bytes = Vec::with_capacity(texels.len() * format.bytes_per_sample() as usize);
        for &texel in texels {
            texel::put_texel(&mut bytes, texel, format);
        }
        debug!("Read back {} bytes from {:?}", bytes.len(), framebuffer);
        self.commands.push(Command::ReadPixels {
            framebuffer,
            target,
            format,
        });
        Ok(bytes)
    }

    fn host_pixels(&self, texture: TextureId) -> Option<&CubemapPixels> {
        if !self.host_visible {
            return None;
        }
        self.cubemap_pixels(texture, 0)
    }

    fn release_framebuffer(&mut self, framebuffer: FramebufferId) {
        if self.framebuffers.remove(&framebuffer).is_some() {
            if self.bound_framebuffer == Some(framebuffer) {
                self.bound_framebuffer = None;
            }
            self.commands.push(Command::ReleaseFramebuffer(framebuffer));
        }
    }

    fn release_texture(&mut self, texture: TextureId) {
        if self.textures.remove(&texture).is_some() {
            self.commands.push(Command::ReleaseTexture(texture));
        }
    }
}

/// Convolves the environment around `normal` with a GGX lobe of the given
/// roughness, assuming the view direction equals the normal.
pub fn prefilter_ggx(
    environment: &CubemapPixels,
    normal: Vec3,
    roughness: f32,
    sample_count: u32,
) -> Vec3 {
    if roughness <= 0.0 {
        return environment.sample(normal).truncate();
    }

    let alpha = roughness * roughness;
    let (tangent, bitangent) = normal.any_orthonormal_pair();
    let mut total = Vec3::ZERO;
    let mut total_weight = 0.0;
    for i in 0..sample_count {
        let xi = hammersley(i, sample_count);
        let phi = 2.0 * PI * xi.x;
        let cos_theta = ((1.0 - xi.y) / (1.0 + (alpha * alpha - 1.0) * xi.y)).sqrt();
        let sin_theta = (1.0 - cos_theta * cos_theta).max(0.0).sqrt();
        let half = tangent * (sin_theta * phi.cos())
            + bitangent * (sin_theta * phi.sin())
            + normal * cos_theta;
        let light = (2.0 * normal.dot(half) * half - normal).normalize();

        let n_dot_l = normal.dot(light);
        if n_dot_l > 0.0 {
            total += environment.sample(light).truncate() * n_dot_l;
            total_weight += n_dot_l;
        }
    }

    if total_weight > 0.0 {
        total / total_weight
    } else {
        environment.sample(normal).truncate()
    }
}

fn hammersley(i: u32, count: u32) -> Vec2 {
    vec2(
        i as f32 / count as f32,
        i.reverse_bits() as f32 * 2.328_306_4e-10,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use bevy::math::vec3;

    fn upload(backend: &mut SoftwareBackend, pixels: CubemapPixels) -> Cubemap {
        backend
            .upload_cubemap(pixels, TextureFormat::Rgba32Float)
            .unwrap()
    }

    #[test]
    fn prefiltering_a_constant_environment_is_a_no_op() {
        let color = vec3(0.2, 0.4, 0.8);
        let environment = CubemapPixels::constant(8, color.extend(1.0));
        for roughness in [0.0, 0.2, 0.6, 1.0] {
            let normal = vec3(0.3, -0.8, 0.2).normalize();
            let filtered = prefilter_ggx(&environment, normal, roughness, 32);
            assert!((filtered - color).abs().max_element() < 1e-5);
        }
    }

    #[test]
    fn rougher_lobes_blur_more() {
        // Bright only on +Z; the +X direction sees more of it as roughness grows.
        let environment = CubemapPixels::from_fn(16, |direction| {
            Vec3::splat(if direction.z > 0.9 { 10.0 } else { 0.0 }).extend(1.0)
        });
        let normal = vec3(1.0, 0.0, 1.0).normalize();
        let smooth = prefilter_ggx(&environment, normal, 0.1, 256);
        let rough = prefilter_ggx(&environment, normal, 1.0, 256);
        assert!(rough.x > smooth.x);
    }

    #[test]
    fn drawing_without_a_framebuffer_fails() {
        let mut backend = SoftwareBackend::new(Caps::all());
        let environment = upload(&mut backend, CubemapPixels::constant(2, Vec4::ONE));
        let mut params = ShaderParams::new(ShaderKind::ShProjection);
        params.set_texture(PARAM_ENV_MAP, environment.id());
        params.set_int(PARAM_FACE_ID, 0);
        assert_eq!(backend.draw(&params), Err(BackendError::NoFramebufferBound));
    }

    #[test]
    fn sh_projection_adds_the_running_sum() {
        let mut backend = SoftwareBackend::new(Caps::all());
        let environment = upload(&mut backend, CubemapPixels::constant(4, Vec4::ONE));
        let previous = backend
            .create_texture_2d(9, 1, TextureFormat::Rgba32Float)
            .unwrap();
        let output = backend
            .create_texture_2d(9, 1, TextureFormat::Rgba32Float)
            .unwrap();
        let framebuffer = backend
            .create_framebuffer(9, 1, &[ColorTarget::texture(output)])
            .unwrap();

        let mut params = ShaderParams::new(ShaderKind::ShProjection);
        params.set_texture(PARAM_ENV_MAP, environment.id());
        params.set_int(PARAM_FACE_ID, 2);
        backend.bind_framebuffer(framebuffer, 0).unwrap();
        backend.set_camera(&FaceCamera::for_face(CubeFace::PositiveX, 9, 1));
        backend.draw(&params).unwrap();
        let single = backend.texture_texels(output).unwrap()[0];
        assert!((single.w - 4.0 * PI / 6.0).abs() < 1e-5);

        // Feed the output back in as the running sum of a second draw.
        let copy = backend.texture_texels(output).unwrap().to_vec();
        backend.write_target(ColorTarget::texture(previous), copy).unwrap();
        params.set_texture(PARAM_SH_COEF, previous);
        backend.draw(&params).unwrap();
        let doubled = backend.texture_texels(output).unwrap()[0];
        assert!((doubled - single * 2.0).abs().max_element() < 1e-5);
    }

    #[test]
    fn fixed_point_targets_round_their_writes() {
        let mut backend = SoftwareBackend::new(Caps::FLOAT_TEXTURE);
        let environment = upload(&mut backend, CubemapPixels::constant(4, Vec4::ONE));
        let output = backend
            .create_texture_2d(9, 1, TextureFormat::Rgba8Snorm)
            .unwrap();
        let framebuffer = backend
            .create_framebuffer(9, 1, &[ColorTarget::texture(output)])
            .unwrap();
        let mut params = ShaderParams::new(ShaderKind::ShProjection);
        params.set_texture(PARAM_ENV_MAP, environment.id());
        params.set_int(PARAM_FACE_ID, 0);
        params.set_float(PARAM_REMAP_MAX_VALUE, 0.05);
        backend.bind_framebuffer(framebuffer, 0).unwrap();
        backend.set_camera(&FaceCamera::for_face(CubeFace::PositiveX, 9, 1));
        backend.draw(&params).unwrap();
        let weight = backend.texture_texels(output).unwrap()[0].w;
        assert!((weight - 0.05 * 4.0 * PI / 6.0).abs() <= 0.5 / 127.0);
    }

    #[test]
    fn float_targets_need_float_color_buffers() {
        let mut backend = SoftwareBackend::new(Caps::FLOAT_TEXTURE);
        let texture = backend
            .create_texture_2d(9, 1, TextureFormat::Rgba32Float)
            .unwrap();
        assert_eq!(
            backend.create_framebuffer(9, 1, &[ColorTarget::texture(texture)]),
            Err(BackendError::UnsupportedFormat(TextureFormat::Rgba32Float))
        );
    }

    #[test]
    fn mismatched_targets_are_rejected() {
        let mut backend = SoftwareBackend::new(Caps::all());
        let texture = backend
            .create_texture_2d(9, 1, TextureFormat::Rgba32Float)
            .unwrap();
        assert!(matches!(
            backend.create_framebuffer(4, 4, &[ColorTarget::texture(texture)]),
            Err(BackendError::TargetSizeMismatch { .. })
        ));
    }

    #[test]
    fn injected_failures_fire_once() {
        let mut backend = SoftwareBackend::new(Caps::all());
        let environment = upload(&mut backend, CubemapPixels::constant(2, Vec4::ONE));
        let output = backend
            .create_texture_2d(9, 1, TextureFormat::Rgba32Float)
            .unwrap();
        let framebuffer = backend
            .create_framebuffer(9, 1, &[ColorTarget::texture(output)])
            .unwrap();
        let mut params = ShaderParams::new(ShaderKind::ShProjection);
        params.set_texture(PARAM_ENV_MAP, environment.id());
        params.set_int(PARAM_FACE_ID, 0);
        backend.bind_framebuffer(framebuffer, 0).unwrap();
        backend.set_camera(&FaceCamera::for_face(CubeFace::PositiveX, 9, 1));

        backend.fail_at_draw(1);
        assert!(backend.draw(&params).is_ok());
        assert!(matches!(backend.draw(&params), Err(BackendError::Device(_))));
        assert!(backend.draw(&params).is_ok());
    }

    #[test]
    fn draws_need_a_camera_covering_the_target() {
        let mut backend = SoftwareBackend::new(Caps::all());
        let environment = upload(&mut backend, CubemapPixels::constant(2, Vec4::ONE));
        let cubemap = backend
            .create_cubemap(&CubemapDescriptor {
                size: 4,
                format: TextureFormat::Rgba32Float,
                mip_level_count: 1,
                sampler: SamplerState {
                    min_filter: MinFilter::BilinearNoMipMaps,
                    mag_filter: MagFilter::Bilinear,
                    wrap: WrapMode::EdgeClamp,
                },
                color_space: ColorSpace::Linear,
            })
            .unwrap();
        let targets: Vec<ColorTarget> = CubeFace::ALL
            .iter()
            .map(|&face| ColorTarget::cubemap_face(cubemap, 0, face))
            .collect();
        let framebuffer = backend.create_framebuffer(4, 4, &targets).unwrap();
        let mut params = ShaderParams::new(ShaderKind::IblKernels);
        params.set_bool(PARAM_USE_SPECULAR_IBL, true);
        params.set_texture(PARAM_ENV_MAP, environment.id());
        params.set_float(PARAM_ROUGHNESS, 0.0);
        params.set_int(PARAM_FACE_ID, 2);
        backend.bind_framebuffer(framebuffer, 2).unwrap();
        assert_eq!(backend.draw(&params), Err(BackendError::NoCamera));

        backend.set_camera(&FaceCamera::for_face(CubeFace::PositiveY, 2, 2));
        assert!(matches!(
            backend.draw(&params),
            Err(BackendError::CameraExtentMismatch { camera_width: 2, width: 4, .. })
        ));

        backend.set_camera(&FaceCamera::for_face(CubeFace::NegativeZ, 4, 4));
        assert_eq!(
            backend.draw(&params),
            Err(BackendError::CameraFaceMismatch {
                camera: CubeFace::NegativeZ,
                face: CubeFace::PositiveY,
            })
        );

        backend.set_camera(&FaceCamera::for_face(CubeFace::PositiveY, 4, 4));
        assert!(backend.draw(&params).is_ok());
    }

    #[test]
    fn empty_textures_are_rejected() {
        let mut backend = SoftwareBackend::new(Caps::all());
        assert_eq!(
            backend
                .upload_cubemap(CubemapPixels::constant(0, Vec4::ONE), TextureFormat::Rgba32Float)
                .map(|cubemap| cubemap.id()),
            Err(BackendError::EmptyTexture)
        );
        assert_eq!(
            backend.create_texture_2d(0, 1, TextureFormat::Rgba8Snorm),
            Err(BackendError::EmptyTexture)
        );
        assert_eq!(backend.texture_count(), 0);
    }
}
