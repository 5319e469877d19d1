//! Axis-aligned bounding boxes.

use super::{Sphere, Transform};
use crate::num::Float;
use nalgebra::{self as na, Point3, Vector3};

/// A box whose faces are aligned with the coordinate axes, given by its lower
/// and upper corner.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AxisAlignedBox<F: Float> {
    lower_corner: Point3<F>,
    upper_corner: Point3<F>,
}

impl<F: Float> AxisAlignedBox<F> {
    /// Creates a new box with the given corners.
    ///
    /// # Panics
    /// If any component of `lower_corner` exceeds the corresponding component
    /// of `upper_corner`.
    pub fn new(lower_corner: Point3<F>, upper_corner: Point3<F>) -> Self {
        assert!(
            lower_corner.coords.zip_fold(&upper_corner.coords, true, |ok, l, u| ok && l <= u),
            "Tried to create axis-aligned box with lower corner above upper corner"
        );
        Self {
            lower_corner,
            upper_corner,
        }
    }

    pub fn from_center_and_half_extents(center: Point3<F>, half_extents: Vector3<F>) -> Self {
        let half_extents = half_extents.abs();
        Self::new(center - half_extents, center + half_extents)
    }

    /// Creates the smallest box containing all the given points.
    ///
    /// # Panics
    /// If the point slice is empty.
    pub fn aabb_for_points(points: &[Point3<F>]) -> Self {
        assert!(
            !points.is_empty(),
            "Tried to create AABB for empty point slice"
        );
        let (lower_corner, upper_corner) = points[1..].iter().fold(
            (points[0], points[0]),
            |(lower_corner, upper_corner), point| (lower_corner.inf(point), upper_corner.sup(point)),
        );
        Self::new(lower_corner, upper_corner)
    }

    /// Creates the smallest box containing both given boxes.
    pub fn aabb_from_pair(aabb_1: &Self, aabb_2: &Self) -> Self {
        Self::new(
            aabb_1.lower_corner.inf(&aabb_2.lower_corner),
            aabb_1.upper_corner.sup(&aabb_2.upper_corner),
        )
    }

    pub fn lower_corner(&self) -> &Point3<F> {
        &self.lower_corner
    }

    pub fn upper_corner(&self) -> &Point3<F> {
        &self.upper_corner
    }

    pub fn center(&self) -> Point3<F> {
        na::center(&self.lower_corner, &self.upper_corner)
    }

    pub fn half_extents(&self) -> Vector3<F> {
        (self.upper_corner - self.lower_corner) * F::HALF
    }

    /// Returns the eight corners of the box, with the z-component varying
    /// fastest.
    pub fn corners(&self) -> [Point3<F>; 8] {
        let (l, u) = (&self.lower_corner, &self.upper_corner);
        [
            Point3::new(l.x, l.y, l.z),
            Point3::new(l.x, l.y, u.z),
            Point3::new(l.x, u.y, l.z),
            Point3::new(l.x, u.y, u.z),
            Point3::new(u.x, l.y, l.z),
            Point3::new(u.x, l.y, u.z),
            Point3::new(u.x, u.y, l.z),
            Point3::new(u.x, u.y, u.z),
        ]
    }

    /// Whether the given point lies inside or on the boundary of the box.
    pub fn contains_point(&self, point: &Point3<F>) -> bool {
        (0..3).all(|dim| point[dim] >= self.lower_corner[dim] && point[dim] <= self.upper_corner[dim])
    }

    /// Whether this box and the given one overlap. Boxes that touch count as
    /// overlapping.
    pub fn intersects(&self, other: &Self) -> bool {
        (0..3).all(|dim| {
            self.lower_corner[dim] <= other.upper_corner[dim]
                && self.upper_corner[dim] >= other.lower_corner[dim]
        })
    }

    /// Returns the smallest axis-aligned box containing this box after
    /// applying the given transform.
    pub fn transformed(&self, transform: &Transform<F>) -> Self {
        let corners = self.corners().map(|corner| transform.transform_point(&corner));
        Self::aabb_for_points(&corners)
    }

    /// Returns the sphere passing through the corners of the box.
    pub fn bounding_sphere(&self) -> Sphere<F> {
        Sphere::new(self.center(), self.half_extents().norm())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_abs_diff_eq;
    use nalgebra::{point, vector, UnitQuaternion};

    #[test]
    #[should_panic]
    fn creating_box_with_inverted_corners_fails() {
        AxisAlignedBox::new(point![1.0, 0.0, 0.0], point![0.0, 1.0, 1.0]);
    }

    #[test]
    fn aabb_for_points_encloses_points() {
        let aabb = AxisAlignedBox::aabb_for_points(&[
            point![1.0, -2.0, 0.0],
            point![-1.0, 3.0, 0.5],
            point![0.0, 0.0, -4.0],
        ]);
        assert_eq!(aabb.lower_corner(), &point![-1.0, -2.0, -4.0]);
        assert_eq!(aabb.upper_corner(), &point![1.0, 3.0, 0.5]);
    }

    #[test]
    #[should_panic]
    fn aabb_for_no_points_fails() {
        AxisAlignedBox::<f64>::aabb_for_points(&[]);
    }

    #[test]
    fn aabb_from_pair_encloses_both() {
        let a = AxisAlignedBox::new(point![0.0, 0.0, 0.0], point![1.0, 1.0, 1.0]);
        let b = AxisAlignedBox::new(point![-1.0, 0.5, 0.5], point![0.5, 2.0, 0.7]);
        let union = AxisAlignedBox::aabb_from_pair(&a, &b);
        assert_eq!(union.lower_corner(), &point![-1.0, 0.0, 0.0]);
        assert_eq!(union.upper_corner(), &point![1.0, 2.0, 1.0]);
    }

    #[test]
    fn touching_boxes_intersect() {
        let a = AxisAlignedBox::new(point![0.0, 0.0, 0.0], point![1.0, 1.0, 1.0]);
        let b = AxisAlignedBox::new(point![1.0, 0.0, 0.0], point![2.0, 1.0, 1.0]);
        let c = AxisAlignedBox::new(point![1.1, 0.0, 0.0], point![2.0, 1.0, 1.0]);
        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
    }

    #[test]
    fn rotating_box_gives_enclosing_box() {
        let aabb = AxisAlignedBox::from_center_and_half_extents(Point3::origin(), vector![1.0, 1.0, 1.0]);
        let rotation = Transform::from_rotation(&UnitQuaternion::from_axis_angle(
            &Vector3::z_axis(),
            std::f64::consts::FRAC_PI_4,
        ));
        let rotated = aabb.transformed(&rotation);
        let sqrt_2 = std::f64::consts::SQRT_2;
        assert_abs_diff_eq!(rotated.upper_corner(), &point![sqrt_2, sqrt_2, 1.0], epsilon = 1e-12);
        assert_abs_diff_eq!(rotated.lower_corner(), &point![-sqrt_2, -sqrt_2, -1.0], epsilon = 1e-12);
    }

    #[test]
    fn bounding_sphere_passes_through_corners() {
        let aabb = AxisAlignedBox::new(point![0.0, 0.0, 0.0], point![2.0, 2.0, 2.0]);
        let sphere = aabb.bounding_sphere();
        assert_abs_diff_eq!(sphere.center(), &point![1.0, 1.0, 1.0]);
        assert_abs_diff_eq!(sphere.radius(), 3.0_f64.sqrt());
    }
}
