// bevy-ibl-baker/Crates/bevy-ibl-baker/src/texel.rs

//! Packing and unpacking RGBA texels in the formats the baker reads back.

use crate::backend::TextureFormat;
use bevy::math::Vec4;
use byteorder::{ByteOrder, LittleEndian};

/// Rounds a texel to the nearest value representable in `format`.
pub fn quantize(texel: Vec4, format: TextureFormat) -> Vec4 {
    match format {
        TextureFormat::Rgba32Float => texel,
        TextureFormat::Rgba8Unorm => {
            Vec4::from_array(texel.to_array().map(|c| unpack_unorm8(pack_unorm8(c))))
        }
        TextureFormat::Rgba8Snorm => {
            Vec4::from_array(texel.to_array().map(|c| unpack_snorm8(pack_snorm8(c))))
        }
    }
}

/// Appends the encoding of `texel` in `format` to `bytes`.
pub fn put_texel(bytes: &mut Vec<u8>, texel: Vec4, format: TextureFormat) {
    match format {
        TextureFormat::Rgba32Float => {
            let mut buffer = [0; 16];
            LittleEndian::write_f32_into(&texel.to_array(), &mut buffer);
            bytes.extend_from_slice(&buffer);
        }
        TextureFormat::Rgba8Unorm => {
            bytes.extend(texel.to_array().map(pack_unorm8));
        }
        TextureFormat::Rgba8Snorm => {
            bytes.extend(texel.to_array().map(|c| pack_snorm8(c) as u8));
        }
    }
}

/// Decodes the texel starting at `index` (in texels, not bytes).
///
/// `bytes` must hold at least `index + 1` texels.
pub fn get_texel(bytes: &[u8], index: usize, format: TextureFormat) -> Vec4 {
    let stride = format.bytes_per_sample() as usize;
    let start = index * stride;
    let texel = &bytes[start..(start + stride)];
    match format {
        TextureFormat::Rgba32Float => {
            let mut channels = [0.0; 4];
            LittleEndian::read_f32_into(texel, &mut channels);
            Vec4::from_array(channels)
        }
        TextureFormat::Rgba8Unorm => Vec4::new(
            unpack_unorm8(texel[0]),
            unpack_unorm8(texel[1]),
            unpack_unorm8(texel[2]),
            unpack_unorm8(texel[3]),
        ),
        TextureFormat::Rgba8Snorm => Vec4::new(
            unpack_snorm8(texel[0] as i8),
            unpack_snorm8(texel[1] as i8),
            unpack_snorm8(texel[2] as i8),
            unpack_snorm8(texel[3] as i8),
        ),
    }
}

/// Decodes every whole texel in `bytes`.
pub fn decode_texels(bytes: &[u8], format: TextureFormat) -> Vec<Vec4> {
    let count = bytes.len() / format.bytes_per_sample() as usize;
    (0..count).map(|index| get_texel(bytes, index, format)).collect()
}

// https://registry.khronos.org/DataFormat/specs/1.3/dataformat.1.3.html#CONVERSION_FROM_NORMALIZED_FIXED_POINT
fn pack_unorm8(x: f32) -> u8 {
    (x.clamp(0.0, 1.0) * 255.0).round() as u8
}

fn unpack_unorm8(n: u8) -> f32 {
    n as f32 / 255.0
}

fn pack_snorm8(x: f32) -> i8 {
    (x.clamp(-1.0, 1.0) * 127.0).round() as i8
}

fn unpack_snorm8(n: i8) -> f32 {
    (n as f32 / 127.0).max(-1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snorm_keeps_sign_and_clamps() {
        let texel = quantize(Vec4::new(-0.5, 0.25, 2.0, -3.0), TextureFormat::Rgba8Snorm);
        assert!((texel.x + 0.5).abs() <= 0.5 / 127.0);
        assert!((texel.y - 0.25).abs() <= 0.5 / 127.0);
        assert_eq!(texel.z, 1.0);
        assert_eq!(texel.w, -1.0);
    }

    #[test]
    fn unorm_drops_negative_values() {
        let texel = quantize(Vec4::new(-0.5, 0.5, 1.0, 0.0), TextureFormat::Rgba8Unorm);
        assert_eq!(texel.x, 0.0);
        assert_eq!(texel.z, 1.0);
    }

    #[test]
    fn float_texels_decode_bit_exactly() {
        let texels = [Vec4::new(1.5, -2.25, 1.0e-7, 12.5), Vec4::splat(-0.0)];
        let mut bytes = vec![];
        for texel in texels {
            put_texel(&mut bytes, texel, TextureFormat::Rgba32Float);
        }
        assert_eq!(bytes.len(), 32);
        assert_eq!(decode_texels(&bytes, TextureFormat::Rgba32Float), texels);
    }

    #[test]
    fn decoding_ignores_trailing_partial_texels() {
        let bytes = [127, 0, 129, 255, 1];
        let texels = decode_texels(&bytes, TextureFormat::Rgba8Snorm);
        assert_eq!(texels.len(), 1);
        assert_eq!(texels[0].x, 1.0);
        assert_eq!(texels[0].z, -1.0);
        assert!((texels[0].w + 1.0 / 127.0).abs() < 1e-6);
    }
}
