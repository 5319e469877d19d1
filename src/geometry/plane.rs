//! Planes in 3D.

use super::Sphere;
use crate::num::Float;
use nalgebra::{Point3, UnitVector3, Vector3};

/// A plane given by a unit normal `n` and a displacement `d`, so that a point
/// `p` lies in the plane when `n.dot(p) + d = 0`.
///
/// The positive halfspace is the one the normal points into.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Plane<F: Float> {
    unit_normal: UnitVector3<F>,
    displacement: F,
}

impl<F: Float> Plane<F> {
    pub fn new(unit_normal: UnitVector3<F>, displacement: F) -> Self {
        Self {
            unit_normal,
            displacement,
        }
    }

    /// Creates the plane with the given unit normal passing through the given
    /// point.
    pub fn from_normal_and_point(unit_normal: UnitVector3<F>, point_in_plane: &Point3<F>) -> Self {
        Self::new(unit_normal, -unit_normal.dot(&point_in_plane.coords))
    }

    /// Creates a plane from the coefficients `(a, b, c, d)` of the equation
    /// `a*x + b*y + c*z + d = 0`, normalizing them.
    ///
    /// # Returns
    /// [`None`] if the normal `(a, b, c)` has zero length.
    pub fn from_unnormalized_coefficients(normal: Vector3<F>, displacement: F) -> Option<Self> {
        let length = normal.norm();
        if length <= F::default_epsilon() {
            return None;
        }
        Some(Self::new(
            UnitVector3::new_unchecked(normal / length),
            displacement / length,
        ))
    }

    pub fn unit_normal(&self) -> &UnitVector3<F> {
        &self.unit_normal
    }

    pub fn displacement(&self) -> F {
        self.displacement
    }

    /// Computes the signed distance from the plane to the given point. The
    /// distance is negative in the negative halfspace.
    pub fn signed_distance(&self, point: &Point3<F>) -> F {
        self.unit_normal.dot(&point.coords) + self.displacement
    }

    /// Whether the given point lies strictly in the negative halfspace.
    pub fn point_lies_in_negative_halfspace(&self, point: &Point3<F>) -> bool {
        self.signed_distance(point) < F::ZERO
    }

    /// Whether all of the given sphere lies strictly in the negative
    /// halfspace.
    pub fn sphere_lies_in_negative_halfspace(&self, sphere: &Sphere<F>) -> bool {
        self.signed_distance(sphere.center()) < -sphere.radius()
    }
}
