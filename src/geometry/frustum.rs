//! View frustums.

use crate::{
    geometry::{Plane, Sphere},
    num::Float,
};
use nalgebra::{Matrix4, Perspective3, Point3, RowVector4, Vector3};

/// A frustum represented by the six planes bounding it.
///
/// The planes are oriented so that their negative halfspaces lie outside the
/// frustum.
#[derive(Clone, Debug, PartialEq)]
pub struct Frustum<F: Float> {
    planes: [Plane<F>; 6],
    transform_matrix: Matrix4<F>,
}

impl<F: Float> Frustum<F> {
    /// Creates the frustum representing the clip space of the given
    /// view-projection matrix, using the plane extraction method of Gribb and
    /// Hartmann (2001). The matrix is assumed to map the frustum onto the cube
    /// spanning -1 to 1 along each axis.
    ///
    /// # Panics
    /// If the matrix is degenerate so that a plane normal vanishes.
    pub fn from_transform_matrix(transform_matrix: Matrix4<F>) -> Self {
        let row = |idx: usize| -> RowVector4<F> { transform_matrix.row(idx).into_owned() };
        let w = row(3);

        let plane_from_row = |coefficients: RowVector4<F>| {
            Plane::from_unnormalized_coefficients(
                Vector3::new(coefficients[0], coefficients[1], coefficients[2]),
                coefficients[3],
            )
            .expect("Frustum transform produced degenerate plane")
        };

        let planes = [
            plane_from_row(w + row(0)),
            plane_from_row(w - row(0)),
            plane_from_row(w + row(1)),
            plane_from_row(w - row(1)),
            plane_from_row(w + row(2)),
            plane_from_row(w - row(2)),
        ];

        Self {
            planes,
            transform_matrix,
        }
    }

    /// Creates the frustum of a perspective camera at `origin` with the given
    /// orthonormal orientation, where `look` is the viewing direction.
    /// `vertical_field_of_view` is in radians and `aspect_ratio` is the ratio
    /// of width to height.
    pub fn perspective(
        origin: &Point3<F>,
        right: &Vector3<F>,
        up: &Vector3<F>,
        look: &Vector3<F>,
        vertical_field_of_view: F,
        aspect_ratio: F,
        near_distance: F,
        far_distance: F,
    ) -> Self {
        let backward = -look;
        let view = Matrix4::new(
            right.x,
            right.y,
            right.z,
            -right.dot(&origin.coords),
            up.x,
            up.y,
            up.z,
            -up.dot(&origin.coords),
            backward.x,
            backward.y,
            backward.z,
            -backward.dot(&origin.coords),
            F::ZERO,
            F::ZERO,
            F::ZERO,
            F::ONE,
        );
        let projection = Perspective3::new(
            aspect_ratio,
            vertical_field_of_view,
            near_distance,
            far_distance,
        );
        Self::from_transform_matrix(projection.as_matrix() * view)
    }

    /// Returns the planes in the order left, right, bottom, top, near, far.
    pub fn planes(&self) -> &[Plane<F>; 6] {
        &self.planes
    }

    pub fn near_plane(&self) -> &Plane<F> {
        &self.planes[4]
    }

    pub fn far_plane(&self) -> &Plane<F> {
        &self.planes[5]
    }

    /// Returns the matrix of the transform into the clip space this frustum
    /// represents.
    pub fn transform_matrix(&self) -> &Matrix4<F> {
        &self.transform_matrix
    }

    /// Whether the given point lies inside or on the boundary of the frustum.
    pub fn contains_point(&self, point: &Point3<F>) -> bool {
        self.planes
            .iter()
            .all(|plane| !plane.point_lies_in_negative_halfspace(point))
    }

    /// Whether the given sphere lies entirely outside some plane of the
    /// frustum. Spheres near an edge or corner may pass this test while still
    /// being outside.
    pub fn sphere_lies_outside(&self, sphere: &Sphere<F>) -> bool {
        self.planes
            .iter()
            .any(|plane| plane.sphere_lies_in_negative_halfspace(sphere))
    }

    /// Whether the given sphere may overlap the frustum.
    pub fn intersects_sphere(&self, sphere: &Sphere<F>) -> bool {
        !self.sphere_lies_outside(sphere)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use nalgebra::point;
    use std::f64::consts::FRAC_PI_2;

    fn frustum_looking_down_x() -> Frustum<f64> {
        Frustum::perspective(
            &Point3::origin(),
            &Vector3::new(0.0, 0.0, -1.0),
            &Vector3::new(0.0, 1.0, 0.0),
            &Vector3::new(1.0, 0.0, 0.0),
            FRAC_PI_2,
            1.0,
            0.1,
            10.0,
        )
    }

    #[test]
    fn identity_frustum_is_unit_cube() {
        let frustum = Frustum::<f64>::from_transform_matrix(Matrix4::identity());
        assert!(frustum.contains_point(&point![0.9, -0.9, 0.5]));
        assert!(frustum.contains_point(&point![1.0, 1.0, 1.0]));
        assert!(!frustum.contains_point(&point![1.1, 0.0, 0.0]));
        assert!(!frustum.contains_point(&point![0.0, 0.0, -1.5]));
    }

    #[test]
    fn perspective_frustum_contains_points_in_view_direction() {
        let frustum = frustum_looking_down_x();
        assert!(frustum.contains_point(&point![5.0, 0.0, 0.0]));
        assert!(frustum.contains_point(&point![5.0, 4.9, -4.9]));
        assert!(!frustum.contains_point(&point![-5.0, 0.0, 0.0]));
        assert!(!frustum.contains_point(&point![5.0, 5.5, 0.0]));
        assert!(!frustum.contains_point(&point![0.05, 0.0, 0.0]));
        assert!(!frustum.contains_point(&point![10.5, 0.0, 0.0]));
    }

    #[test]
    fn sphere_behind_camera_lies_outside() {
        let frustum = frustum_looking_down_x();
        assert!(frustum.sphere_lies_outside(&Sphere::new(point![-3.0, 0.0, 0.0], 1.0)));
        assert!(frustum.intersects_sphere(&Sphere::new(point![-0.5, 0.0, 0.0], 1.0)));
        assert!(frustum.intersects_sphere(&Sphere::new(point![3.0, 0.0, 0.0], 0.1)));
    }
}
