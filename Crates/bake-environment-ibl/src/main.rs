// bevy-ibl-baker/Crates/bake-environment-ibl/src/main.rs

use anyhow::{bail, Context, Result};
use bevy_ibl_baker::backend::TextureFormat;
use bevy_ibl_baker::cubemap::{CubeFace, Cubemap};
use bevy_ibl_baker::software::SoftwareBackend;
use bevy_ibl_baker::{
    BakeReport, Caps, CubemapPixels, IblBaker, IblBakerSettings, ShStrategyKind,
};
use clap::Parser;
use glam::{Vec3, Vec4};
use image::{ColorType, DynamicImage};
use log::{info, warn};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process;

/// Bakes a specular mip chain and diffuse SH coefficients from an environment
/// cubemap, using the software backend.
#[derive(Parser)]
#[command(author, version, about)]
struct Args {
    /// Six face images, in +X, -X, +Y, -Y, +Z, -Z order.
    #[arg()]
    faces: Vec<PathBuf>,

    /// Bake a constant-color environment instead of loading faces.
    #[arg(long, num_args = 3, value_names = ["R", "G", "B"])]
    constant: Option<Vec<f32>>,

    /// The edge length of the constant environment.
    #[arg(long, default_value_t = 64)]
    size: u32,

    /// A RON file with baker settings.
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Overrides the specular cubemap size from the settings.
    #[arg(short, long)]
    specular_size: Option<u32>,

    /// Sum the SH projection on the host instead of reducing it on the GPU.
    #[arg(long)]
    cpu: bool,

    /// Pretend the backend can't render into floating-point targets.
    #[arg(long)]
    no_float: bool,

    /// GGX samples per specular texel.
    #[arg(long)]
    samples: Option<u32>,
}

fn main() {
    pretty_env_logger::init();
    let args = Args::parse();

    let mut settings = match args.settings {
        Some(ref path) => load_settings(path)
            .unwrap_or_else(|err| die(format!("Failed to load the settings: {:?}", err))),
        None => IblBakerSettings::default(),
    };
    if let Some(specular_size) = args.specular_size {
        settings.specular_size = specular_size;
    }
    if args.cpu {
        settings.sh_strategy = ShStrategyKind::Cpu;
    }

    let caps = if args.no_float {
        // Float textures can still be sampled; only float render targets go.
        settings.format = TextureFormat::Rgba8Unorm;
        Caps::FLOAT_TEXTURE
    } else {
        Caps::all()
    };
    let mut backend = SoftwareBackend::new(caps);
    if let Some(samples) = args.samples {
        backend = backend.with_specular_sample_count(samples);
    }

    let pixels = match (&args.constant, args.faces.len()) {
        (Some(color), 0) => {
            CubemapPixels::constant(args.size, Vec3::from_slice(color).extend(1.0))
        }
        (Some(_), _) => die("Pass either face images or --constant, not both"),
        (None, 6) => load_faces(&args.faces)
            .unwrap_or_else(|err| die(format!("Failed to load the environment: {:?}", err))),
        (None, count) => die(format!("Expected six face images but got {}", count)),
    };
    info!("Environment is {0}×{0} per face", pixels.size());

    let environment = backend
        .upload_cubemap(pixels, TextureFormat::Rgba32Float)
        .unwrap_or_else(|err| die(format!("Failed to upload the environment: {}", err)));
    let mut baker = IblBaker::new(backend, environment, &settings)
        .unwrap_or_else(|err| die(format!("Failed to create the baker: {}", err)));

    let report = baker
        .bake_specular_ibl()
        .unwrap_or_else(|err| die(format!("Failed to bake the specular cubemap: {}", err)));
    forward_diagnostics(&report);
    let report = baker
        .bake_spherical_harmonics_coefficients()
        .unwrap_or_else(|err| die(format!("Failed to bake the SH coefficients: {}", err)));
    forward_diagnostics(&report);

    let specular = baker.specular_ibl().clone();
    println!(
        "specular: {0}×{0}, {1:?}, {2} mip levels, {3:?}",
        specular.size(),
        specular.format(),
        specular.mip_level_count(),
        specular.min_filter()
    );
    for level in 0..specular.mip_level_count() {
        if let Some(average) = mip_average(baker.backend(), &specular, level) {
            println!("  mip {}: average {:?}", level, average);
        }
    }

    let coefficients = baker
        .spherical_harmonics_coefficients()
        .unwrap_or_else(|err| die(format!("{}", err)));
    println!(
        "sh ({}):",
        if baker.is_texture_pulling() { "gpu" } else { "cpu" }
    );
    for (index, coefficient) in coefficients.iter().enumerate() {
        println!("  {}: {:?}", index, coefficient);
    }
}

fn die(message: impl AsRef<str>) -> ! {
    eprintln!("Error: {}", message.as_ref());
    process::exit(1)
}

/// The library logs through `bevy::log`, which isn't wired to this logger.
fn forward_diagnostics(report: &BakeReport) {
    for diagnostic in &report.diagnostics {
        warn!("{}", diagnostic);
    }
}

fn load_settings(path: &Path) -> Result<IblBakerSettings> {
    let file = File::open(path).with_context(|| format!("Couldn't open {}", path.display()))?;
    ron::de::from_reader(file).with_context(|| format!("Couldn't parse {}", path.display()))
}

fn load_faces(paths: &[PathBuf]) -> Result<CubemapPixels> {
    let mut size = None;
    let mut faces: [Vec<Vec4>; 6] = Default::default();
    for (face, path) in CubeFace::ALL.iter().zip(paths) {
        let image = image::open(path).with_context(|| format!("Couldn't read {}", path.display()))?;
        if image.width() != image.height() {
            bail!(
                "{} isn't square ({}×{})",
                path.display(),
                image.width(),
                image.height()
            );
        }
        match size {
            None => size = Some(image.width()),
            Some(size) if size != image.width() => bail!(
                "{} is {} texels wide, but the first face is {}",
                path.display(),
                image.width(),
                size
            ),
            Some(_) => {}
        }
        faces[face.index()] = linear_texels(&image);
    }

    let size = size.context("No faces were given")?;
    CubemapPixels::from_faces(size, faces).context("The faces are empty or have mismatched sizes")
}

/// Decodes an image to linear RGBA. Integer formats are assumed to be sRGB
/// encoded; floating-point ones already linear.
fn linear_texels(image: &DynamicImage) -> Vec<Vec4> {
    let is_float = matches!(image.color(), ColorType::Rgb32F | ColorType::Rgba32F);
    image
        .to_rgba32f()
        .pixels()
        .map(|pixel| {
            let [r, g, b, a] = pixel.0;
            let rgb = Vec3::new(r, g, b);
            let rgb = if is_float {
                rgb
            } else {
                rgb.to_array().map(srgb_to_linear).into()
            };
            rgb.extend(a)
        })
        .collect()
}

fn srgb_to_linear(value: f32) -> f32 {
    if value <= 0.04045 {
        value / 12.92
    } else {
        ((value + 0.055) / 1.055).powf(2.4)
    }
}

fn mip_average(backend: &SoftwareBackend, cubemap: &Cubemap, level: u32) -> Option<Vec3> {
    let pixels = backend.cubemap_pixels(cubemap.id(), level)?;
    let texel_count = 6 * pixels.size() as usize * pixels.size() as usize;
    let sum: Vec4 = CubeFace::ALL
        .iter()
        .flat_map(|&face| pixels.face(face).iter().copied())
        .sum();
    Some(sum.truncate() / texel_count as f32)
}
