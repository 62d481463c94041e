// bevy-ibl-baker/Crates/bevy-ibl-baker/src/sh.rs

//! Second-order spherical harmonics.
//!
//! Radiance is projected onto the nine real SH basis functions of bands 0
//! through 2. Projection sums `L(ω)·Yᵢ(ω)·dω` over cubemap texels, carrying the
//! total solid angle alongside as a weight, and the final coefficients are
//! scaled by `4π / weight` so that discretization of the sphere cancels out.

use crate::cubemap::{texel_direction, texel_solid_angle, CubeFace, CubemapPixels};
use crate::{BakeDiagnostic, BakeError};
use bevy::log::warn;
use bevy::math::{uvec2, DVec3, Vec3, Vec4};
use bevy::prelude::{Deref, DerefMut};
use std::f32::consts::PI;

/// The number of coefficients in a second-order SH expansion.
pub const SH_COEFFICIENT_COUNT: usize = 9;

/// Coefficient 0 of a constant environment of unit radiance, `4π·Y₀₀ = 2√π`.
///
/// A constant environment of radiance `L` projects to `L · SH_CONSTANT_PROJECTION`
/// in coefficient 0 and zero everywhere else.
pub const SH_CONSTANT_PROJECTION: f32 = 3.544_907_7;

const SH_BAND0: f32 = 0.282_094_8;
const SH_BAND1: f32 = 0.488_602_5;
const SH_BAND2_XY: f32 = 1.092_548_4;
const SH_BAND2_ZZ: f32 = 0.315_391_57;
const SH_BAND2_XX_YY: f32 = 0.546_274_2;

/// Evaluates the nine SH basis functions in a normalized direction.
pub fn sh_basis(direction: Vec3) -> [f32; SH_COEFFICIENT_COUNT] {
    let Vec3 { x, y, z } = direction;
    [
        SH_BAND0,
        -SH_BAND1 * y,
        SH_BAND1 * z,
        -SH_BAND1 * x,
        SH_BAND2_XY * x * y,
        -SH_BAND2_XY * y * z,
        SH_BAND2_ZZ * (3.0 * z * z - 1.0),
        -SH_BAND2_XY * x * z,
        SH_BAND2_XX_YY * (x * x - y * y),
    ]
}

/// Nine RGB coefficients describing diffuse environment lighting.
#[derive(Clone, Copy, PartialEq, Debug, Default, Deref, DerefMut)]
pub struct ShCoefficients(pub [Vec3; SH_COEFFICIENT_COUNT]);

/// Unnormalized sums for all nine coefficients, laid out the way the
/// reduction pass stores them: RGB holds the coefficient and alpha holds the
/// accumulated solid angle.
pub type ShAccumulation = [Vec4; SH_COEFFICIENT_COUNT];

/// Projects one face of a cubemap onto the SH basis.
///
/// Returns the raw sums for that face; adding the results for all six faces
/// gives the accumulation for the whole sphere.
pub fn project_face(pixels: &CubemapPixels, face: CubeFace) -> ShAccumulation {
    let size = pixels.size();
    let mut sums = [DVec3::ZERO; SH_COEFFICIENT_COUNT];
    let mut weight = 0.0;
    for y in 0..size {
        for x in 0..size {
            let pos = uvec2(x, y);
            let solid_angle = texel_solid_angle(pos, size);
            let radiance = pixels.texel(face, pos).truncate().as_dvec3();
            let basis = sh_basis(texel_direction(face, pos, size));
            for (sum, basis) in sums.iter_mut().zip(basis) {
                *sum += radiance * (basis as f64 * solid_angle);
            }
            weight += solid_angle;
        }
    }
    sums.map(|sum| sum.as_vec3().extend(weight as f32))
}

/// Computes SH coefficients directly from host-resident cubemap texels.
pub fn project_cubemap(pixels: &CubemapPixels) -> Result<ShCoefficients, BakeError> {
    let mut accumulation = [Vec4::ZERO; SH_COEFFICIENT_COUNT];
    for face in CubeFace::ALL {
        for (total, partial) in accumulation.iter_mut().zip(project_face(pixels, face)) {
            // Every coefficient sees the same texels, so the weight is the same
            // for all nine; summing alpha keeps it that way.
            *total += partial;
        }
    }
    let mut diagnostics = vec![];
    normalize_accumulation(&accumulation, None, &mut diagnostics)
}

/// Turns unnormalized sums into final coefficients.
///
/// The weight is taken from texel 0. If any other texel disagrees, an
/// [BakeDiagnostic::AccumulationInconsistency] is recorded and texel 0's
/// weight is used regardless. If the sums were scaled by `remap_max_value` to
/// fit a fixed-point target, that scale is divided back out first, and any
/// texel that reached ±1 is reported as
/// [BakeDiagnostic::AccumulationSaturated].
pub fn normalize_accumulation(
    texels: &[Vec4],
    remap_max_value: Option<f32>,
    diagnostics: &mut Vec<BakeDiagnostic>,
) -> Result<ShCoefficients, BakeError> {
    if texels.len() < SH_COEFFICIENT_COUNT {
        return Err(BakeError::ReadbackSize {
            expected: SH_COEFFICIENT_COUNT,
            actual: texels.len(),
        });
    }

    let mut weight = texels[0].w;
    for (texel_index, texel) in texels.iter().enumerate().take(SH_COEFFICIENT_COUNT).skip(1) {
        if texel.w != weight {
            warn!(
                "SH weight of texel {} is {} but texel 0 has {}; using texel 0",
                texel_index, texel.w, weight
            );
            diagnostics.push(BakeDiagnostic::AccumulationInconsistency {
                texel: texel_index,
                expected_weight: weight,
                actual_weight: texel.w,
            });
        }
    }

    let mut coefficients = ShCoefficients::default();
    for (coefficient, texel) in coefficients.iter_mut().zip(texels) {
        *coefficient = texel.truncate();
    }

    if let Some(remap_max_value) = remap_max_value {
        for (texel_index, texel) in texels.iter().enumerate().take(SH_COEFFICIENT_COUNT) {
            if texel.abs().max_element() >= 1.0 {
                warn!(
                    "SH texel {} saturated at {:?}; raise the remap scale or use float targets",
                    texel_index, texel
                );
                diagnostics.push(BakeDiagnostic::AccumulationSaturated {
                    texel: texel_index,
                    remap_max_value,
                });
            }
        }

        weight /= remap_max_value;
        for coefficient in coefficients.iter_mut() {
            *coefficient /= remap_max_value;
        }
    }

    if !(weight.is_finite() && weight > 0.0) {
        return Err(BakeError::DegenerateWeight(weight));
    }

    let scale = 4.0 * PI / weight;
    for coefficient in coefficients.iter_mut() {
        *coefficient *= scale;
    }
    Ok(coefficients)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bevy::math::vec3;

    fn assert_near(actual: Vec3, expected: Vec3, epsilon: f32) {
        assert!(
            (actual - expected).abs().max_element() <= epsilon,
            "expected {:?}, got {:?}",
            expected,
            actual
        );
    }

    #[test]
    fn constant_projection_is_two_root_pi() {
        assert!((SH_CONSTANT_PROJECTION - 2.0 * PI.sqrt()).abs() < 1e-6);
        assert!((SH_CONSTANT_PROJECTION - 4.0 * PI * SH_BAND0).abs() < 1e-5);
    }

    #[test]
    fn constant_environment_only_has_a_dc_term() {
        let radiance = vec3(0.5, 1.0, 2.0);
        let pixels = CubemapPixels::constant(16, radiance.extend(1.0));
        let coefficients = project_cubemap(&pixels).unwrap();
        assert_near(coefficients[0], radiance * SH_CONSTANT_PROJECTION, 1e-3);
        for coefficient in &coefficients[1..] {
            assert_near(*coefficient, Vec3::ZERO, 1e-3);
        }
    }

    #[test]
    fn linear_gradient_lands_in_band_one() {
        // L(ω) = 1 + ½·ω.z projects to Y₀₀ and the z-aligned band-1 term only.
        let pixels = CubemapPixels::from_fn(16, |direction| {
            Vec3::splat(1.0 + 0.5 * direction.z).extend(1.0)
        });
        let coefficients = project_cubemap(&pixels).unwrap();
        let expected_z = 0.5 * SH_BAND1 * 4.0 * PI / 3.0;
        assert_near(coefficients[0], Vec3::splat(SH_CONSTANT_PROJECTION), 1e-3);
        assert_near(coefficients[2], Vec3::splat(expected_z), 1e-3);
        for index in [1, 3, 4, 5, 6, 7, 8] {
            assert_near(coefficients[index], Vec3::ZERO, 1e-3);
        }
    }

    #[test]
    fn faces_carry_a_sixth_of_the_sphere() {
        let pixels = CubemapPixels::constant(8, Vec4::ONE);
        let sums = project_face(&pixels, CubeFace::NegativeY);
        for texel in sums {
            assert!((texel.w - 4.0 * PI / 6.0).abs() < 1e-5);
        }
    }

    #[test]
    fn mismatched_weights_warn_and_use_texel_zero() {
        let mut texels = [Vec4::new(1.0, 2.0, 3.0, 2.0 * PI); SH_COEFFICIENT_COUNT];
        texels[4].w = PI;
        let mut diagnostics = vec![];
        let coefficients = normalize_accumulation(&texels, None, &mut diagnostics).unwrap();
        assert_eq!(
            diagnostics,
            vec![BakeDiagnostic::AccumulationInconsistency {
                texel: 4,
                expected_weight: 2.0 * PI,
                actual_weight: PI,
            }]
        );
        assert_near(coefficients[4], vec3(2.0, 4.0, 6.0), 1e-5);
    }

    #[test]
    fn remap_scale_cancels() {
        let remap = 0.05;
        let plain = [Vec4::new(0.3, -0.7, 1.1, 4.0 * PI); SH_COEFFICIENT_COUNT];
        let remapped = plain.map(|texel| texel * remap);
        let mut diagnostics = vec![];
        let expected = normalize_accumulation(&plain, None, &mut diagnostics).unwrap();
        let actual = normalize_accumulation(&remapped, Some(remap), &mut diagnostics).unwrap();
        for (actual, expected) in actual.iter().zip(expected.iter()) {
            assert_near(*actual, *expected, 1e-5);
        }
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn saturated_fixed_point_texels_are_reported() {
        let mut texels = [Vec4::new(0.2, -0.1, 0.0, 0.6); SH_COEFFICIENT_COUNT];
        texels[0] = Vec4::new(1.0, 0.9, -1.0, 0.6);
        let mut diagnostics = vec![];
        normalize_accumulation(&texels, Some(0.05), &mut diagnostics).unwrap();
        assert_eq!(
            diagnostics,
            vec![BakeDiagnostic::AccumulationSaturated {
                texel: 0,
                remap_max_value: 0.05,
            }]
        );

        // Float sums aren't clamped, so large values aren't saturation.
        let mut diagnostics = vec![];
        normalize_accumulation(&[Vec4::splat(30.0); 9], None, &mut diagnostics).unwrap();
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn short_or_empty_readbacks_are_errors() {
        let mut diagnostics = vec![];
        assert!(matches!(
            normalize_accumulation(&[Vec4::ONE; 4], None, &mut diagnostics),
            Err(BakeError::ReadbackSize {
                expected: 9,
                actual: 4
            })
        ));
        assert!(matches!(
            normalize_accumulation(&[Vec4::ZERO; 9], None, &mut diagnostics),
            Err(BakeError::DegenerateWeight(_))
        ));
    }
}
