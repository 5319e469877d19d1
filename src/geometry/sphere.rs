//! Bounding spheres.

use crate::{geometry::Transform, num::Float};
use nalgebra::{self as na, Point3};

/// A sphere given by its center and radius.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Sphere<F: Float> {
    center: Point3<F>,
    radius: F,
}

impl<F: Float> Sphere<F> {
    /// Creates a new sphere with the given center and radius.
    ///
    /// # Panics
    /// If `radius` is negative.
    pub fn new(center: Point3<F>, radius: F) -> Self {
        assert!(radius >= F::ZERO, "Tried to create sphere with negative radius");
        Self { center, radius }
    }

    pub fn center(&self) -> &Point3<F> {
        &self.center
    }

    pub fn radius(&self) -> F {
        self.radius
    }

    /// Whether the given point lies inside the sphere, with a tolerance of
    /// `margin` added to the radius. A point on the surface counts as inside
    /// only when `margin` is positive.
    pub fn contains_point_with_margin(&self, point: &Point3<F>, margin: F) -> bool {
        na::distance(&self.center, point) < self.radius + margin
    }

    /// Whether the given point lies inside or on the surface of the sphere.
    pub fn contains_point(&self, point: &Point3<F>) -> bool {
        na::distance_squared(&self.center, point) <= self.radius * self.radius
    }

    /// Whether this sphere and the given one overlap.
    pub fn intersects_sphere(&self, other: &Self) -> bool {
        let radius_sum = self.radius + other.radius;
        na::distance_squared(&self.center, &other.center) <= radius_sum * radius_sum
    }

    /// Finds the smallest sphere enclosing both this and the given sphere.
    pub fn merged(&self, other: &Self) -> Self {
        let displacement = other.center - self.center;
        let distance = displacement.norm();

        if other.radius + distance <= self.radius {
            return *self;
        }
        if self.radius + distance <= other.radius {
            return *other;
        }

        let radius = F::HALF * (distance + self.radius + other.radius);
        let center = self.center + displacement * ((radius - self.radius) / distance);

        Self::new(center, radius + F::default_epsilon())
    }

    /// Returns a sphere enclosing this sphere after applying the given
    /// transform. The radius is scaled by the largest axis scaling.
    pub fn transformed(&self, transform: &Transform<F>) -> Self {
        let scale = transform.local_scale();
        Self::new(
            transform.transform_point(&self.center),
            self.radius * scale.max(),
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_abs_diff_eq;
    use nalgebra::{point, vector};

    #[test]
    #[should_panic]
    fn creating_sphere_with_negative_radius_fails() {
        Sphere::new(point![0.0, 0.0, 0.0], -1.0);
    }

    #[test]
    fn sphere_contains_point_on_surface() {
        let sphere = Sphere::new(Point3::origin(), 2.0);
        assert!(sphere.contains_point(&point![0.0, 2.0, 0.0]));
        assert!(!sphere.contains_point(&point![0.0, 2.1, 0.0]));
    }

    #[test]
    fn margin_extends_containment() {
        let sphere = Sphere::new(Point3::origin(), 2.0);
        assert!(!sphere.contains_point_with_margin(&point![2.0, 0.0, 0.0], 0.0));
        assert!(sphere.contains_point_with_margin(&point![2.0, 0.0, 0.0], 1e-6));
    }

    #[test]
    fn separated_spheres_do_not_intersect() {
        let a = Sphere::new(point![0.0, 0.0, 0.0], 1.0);
        let b = Sphere::new(point![3.0, 0.0, 0.0], 1.5);
        let c = Sphere::new(point![2.0, 0.0, 0.0], 1.5);
        assert!(!a.intersects_sphere(&b));
        assert!(a.intersects_sphere(&c));
    }

    #[test]
    fn merging_with_enclosed_sphere_gives_enclosing_sphere() {
        let big = Sphere::new(point![1.0, 0.0, 0.0], 5.0);
        let small = Sphere::new(point![2.0, 0.0, 0.0], 1.0);
        assert_eq!(big.merged(&small), big);
        assert_eq!(small.merged(&big), big);
    }

    #[test]
    fn merging_disjoint_spheres_encloses_both() {
        let a = Sphere::new(point![-2.0, 0.0, 0.0], 1.0);
        let b = Sphere::new(point![3.0, 0.0, 0.0], 2.0);
        let merged = a.merged(&b);
        assert_abs_diff_eq!(merged.center(), &point![1.0, 0.0, 0.0], epsilon = 1e-12);
        assert_abs_diff_eq!(merged.radius(), 4.0, epsilon = 1e-9);
    }

    #[test]
    fn transforming_sphere_scales_radius_by_largest_axis() {
        let sphere = Sphere::new(point![1.0, 0.0, 0.0], 1.0);
        let transform = Transform::from_translation(&vector![0.0, 1.0, 0.0])
            * Transform::from_scaling(&vector![2.0, 3.0, 0.5]);
        let transformed = sphere.transformed(&transform);
        assert_abs_diff_eq!(transformed.center(), &point![2.0, 1.0, 0.0]);
        assert_abs_diff_eq!(transformed.radius(), 3.0);
    }
}
