//! Point types and related functionality

use nalgebra::{Point3, Vector3};

/// A 3D point with floating point coordinates
pub type Point3f = Point3<f32>;

/// A 3D vector with floating point components
pub type Vector3f = Vector3<f32>;

/// Integer coordinate of a grid point, `[x, y, z]`
pub type GridCoord = [i64; 3];

/// An 8-bit RGB color
pub type Rgb8 = [u8; 3];

/// Convert a color with components in `[0, 1]` to 8-bit RGB, clamping out of
/// range components
pub fn rgb8_from_unit(r: f32, g: f32, b: f32) -> Rgb8 {
    let quantize = |c: f32| (c.clamp(0.0, 1.0) * 255.0).round() as u8;
    [quantize(r), quantize(g), quantize(b)]
}

/// Convert 8-bit RGB to components in `[0, 1]`
pub fn rgb8_to_unit(color: Rgb8) -> [f32; 3] {
    [
        color[0] as f32 / 255.0,
        color[1] as f32 / 255.0,
        color[2] as f32 / 255.0,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rgb8_from_unit_clamps() {
        assert_eq!(rgb8_from_unit(0.0, 0.5, 1.0), [0, 128, 255]);
        assert_eq!(rgb8_from_unit(-1.0, 2.0, 0.0), [0, 255, 0]);
    }

    #[test]
    fn test_rgb8_unit_roundtrip_endpoints() {
        assert_eq!(rgb8_to_unit([0, 255, 0]), [0.0, 1.0, 0.0]);
    }
}
