//! Implicit fields sampled by the generator
//!
//! A [`FieldEvaluator`] maps batches of world-space points to occupancy
//! values (high inside, low outside) and optionally to per-point colors.
//! Batches are order-preserving: value `i` belongs to point `i`.
//!
//! The analytic fields here stand in for a learned network so the whole
//! pipeline can run without one.

use crate::parallel;
use occmesh_core::{rgb8_from_unit, Point3f, Result, Rgb8};

/// A batched implicit occupancy field
pub trait FieldEvaluator {
    /// Occupancy values, one per input point, in input order
    fn evaluate(&mut self, points: &[Point3f]) -> Result<Vec<f32>>;

    /// Colors, one per input point, or `None` when the field has no texture
    fn evaluate_colors(&mut self, _points: &[Point3f]) -> Result<Option<Vec<Rgb8>>> {
        Ok(None)
    }
}

impl<F> FieldEvaluator for F
where
    F: FnMut(&[Point3f]) -> Result<Vec<f32>>,
{
    fn evaluate(&mut self, points: &[Point3f]) -> Result<Vec<f32>> {
        self(points)
    }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

const DEFAULT_SHARPNESS: f32 = 40.0;

/// Soft occupancy of a ball: `sigmoid(sharpness * (radius - distance))`
#[derive(Debug, Clone)]
pub struct SphereOccupancy {
    pub center: Point3f,
    pub radius: f32,
    pub sharpness: f32,
    pub color: Option<Rgb8>,
}

impl SphereOccupancy {
    pub fn new(center: Point3f, radius: f32) -> Self {
        Self {
            center,
            radius,
            sharpness: DEFAULT_SHARPNESS,
            color: None,
        }
    }

    /// Steepness of the inside/outside transition
    pub fn with_sharpness(mut self, sharpness: f32) -> Self {
        self.sharpness = sharpness;
        self
    }

    /// Uniform surface color
    pub fn with_color(mut self, color: Rgb8) -> Self {
        self.color = Some(color);
        self
    }

    pub fn occupancy(&self, p: &Point3f) -> f32 {
        sigmoid(self.sharpness * (self.radius - (p - self.center).magnitude()))
    }
}

impl FieldEvaluator for SphereOccupancy {
    fn evaluate(&mut self, points: &[Point3f]) -> Result<Vec<f32>> {
        Ok(parallel::parallel_map(points, |p| self.occupancy(p)))
    }

    fn evaluate_colors(&mut self, points: &[Point3f]) -> Result<Option<Vec<Rgb8>>> {
        Ok(self.color.map(|color| vec![color; points.len()]))
    }
}

/// Soft occupancy of a torus around the y axis
#[derive(Debug, Clone)]
pub struct TorusOccupancy {
    pub center: Point3f,
    /// Distance from the center to the middle of the tube
    pub major_radius: f32,
    /// Tube radius
    pub minor_radius: f32,
    pub sharpness: f32,
}

impl TorusOccupancy {
    pub fn new(center: Point3f, major_radius: f32, minor_radius: f32) -> Self {
        Self {
            center,
            major_radius,
            minor_radius,
            sharpness: DEFAULT_SHARPNESS,
        }
    }

    pub fn with_sharpness(mut self, sharpness: f32) -> Self {
        self.sharpness = sharpness;
        self
    }

    pub fn occupancy(&self, p: &Point3f) -> f32 {
        let d = p - self.center;
        let ring = (d.x * d.x + d.z * d.z).sqrt() - self.major_radius;
        let tube = (ring * ring + d.y * d.y).sqrt();
        sigmoid(self.sharpness * (self.minor_radius - tube))
    }
}

impl FieldEvaluator for TorusOccupancy {
    fn evaluate(&mut self, points: &[Point3f]) -> Result<Vec<f32>> {
        Ok(parallel::parallel_map(points, |p| self.occupancy(p)))
    }
}

/// The same value everywhere
#[derive(Debug, Clone, Copy)]
pub struct ConstantField(pub f32);

impl FieldEvaluator for ConstantField {
    fn evaluate(&mut self, points: &[Point3f]) -> Result<Vec<f32>> {
        Ok(vec![self.0; points.len()])
    }
}

/// Colors any field by position: the cube `[-extent, extent]^3` maps onto the
/// RGB cube
#[derive(Debug, Clone)]
pub struct PositionColors<F> {
    pub inner: F,
    pub extent: f32,
}

impl<F> PositionColors<F> {
    pub fn new(inner: F, extent: f32) -> Self {
        Self { inner, extent }
    }
}

impl<F: FieldEvaluator> FieldEvaluator for PositionColors<F> {
    fn evaluate(&mut self, points: &[Point3f]) -> Result<Vec<f32>> {
        self.inner.evaluate(points)
    }

    fn evaluate_colors(&mut self, points: &[Point3f]) -> Result<Option<Vec<Rgb8>>> {
        let scale = 0.5 / self.extent;
        let colors = points
            .iter()
            .map(|p| {
                rgb8_from_unit(
                    0.5 + p.x * scale,
                    0.5 + p.y * scale,
                    0.5 + p.z * scale,
                )
            })
            .collect();
        Ok(Some(colors))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use occmesh_core::Error;

    #[test]
    fn test_sphere_occupancy_is_half_on_surface() {
        let mut sphere = SphereOccupancy::new(Point3f::origin(), 0.3);
        let values = sphere
            .evaluate(&[
                Point3f::origin(),
                Point3f::new(0.3, 0.0, 0.0),
                Point3f::new(0.0, 0.0, 0.5),
            ])
            .unwrap();

        assert!(values[0] > 0.99);
        assert_relative_eq!(values[1], 0.5, epsilon = 1e-5);
        assert!(values[2] < 0.01);
        assert_eq!(sphere.evaluate_colors(&[Point3f::origin()]).unwrap(), None);
    }

    #[test]
    fn test_sphere_color() {
        let mut sphere = SphereOccupancy::new(Point3f::origin(), 0.3).with_color([10, 20, 30]);
        let colors = sphere.evaluate_colors(&[Point3f::origin(); 3]).unwrap();
        assert_eq!(colors, Some(vec![[10, 20, 30]; 3]));
    }

    #[test]
    fn test_torus_occupancy() {
        let torus = TorusOccupancy::new(Point3f::origin(), 0.3, 0.1);
        assert!(torus.occupancy(&Point3f::new(0.3, 0.0, 0.0)) > 0.95);
        assert!(torus.occupancy(&Point3f::new(0.0, 0.0, -0.3)) > 0.95);
        // The hole in the middle is empty
        assert!(torus.occupancy(&Point3f::origin()) < 0.01);
        assert_relative_eq!(
            torus.occupancy(&Point3f::new(0.4, 0.0, 0.0)),
            0.5,
            epsilon = 1e-5
        );
    }

    #[test]
    fn test_batch_preserves_order() {
        let mut sphere = SphereOccupancy::new(Point3f::origin(), 0.25);
        let points: Vec<Point3f> = (0..500)
            .map(|i| Point3f::new(i as f32 / 500.0, 0.0, 0.0))
            .collect();
        let values = sphere.evaluate(&points).unwrap();
        assert_eq!(values.len(), points.len());
        for (p, v) in points.iter().zip(&values) {
            assert_eq!(*v, sphere.occupancy(p));
        }
    }

    #[test]
    fn test_closure_evaluator() {
        let mut calls = 0;
        let mut field = |points: &[Point3f]| -> Result<Vec<f32>> {
            calls += 1;
            Ok(points.iter().map(|p| p.x).collect())
        };
        let values = field.evaluate(&[Point3f::new(2.0, 0.0, 0.0)]).unwrap();
        assert_eq!(values, vec![2.0]);
        assert_eq!(field.evaluate_colors(&[]).unwrap(), None);
        drop(field);
        assert_eq!(calls, 1);

        let mut failing =
            |_: &[Point3f]| -> Result<Vec<f32>> { Err(Error::FieldEvaluation("offline".into())) };
        assert!(matches!(
            failing.evaluate(&[Point3f::origin()]),
            Err(Error::FieldEvaluation(_))
        ));
    }

    #[test]
    fn test_position_colors() {
        let mut field = PositionColors::new(ConstantField(1.0), 0.5);
        let points = [Point3f::new(-0.5, 0.0, 0.5)];
        assert_eq!(field.evaluate(&points).unwrap(), vec![1.0]);
        assert_eq!(
            field.evaluate_colors(&points).unwrap(),
            Some(vec![[0, 128, 255]])
        );
    }
}
