//! Affine transforms that can be decomposed into scale, shear, rotation and
//! translation.

use crate::num::Float;
use approx::AbsDiffEq;
use nalgebra::{Matrix3, Matrix4, Point3, Rotation3, UnitQuaternion, Vector3};
use std::ops::Mul;

/// A general affine transform in 3D.
///
/// Transforms follow the column vector convention, so the product `a * b`
/// is the transform that applies `b` first and `a` afterwards.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Transform<F: Float> {
    matrix: Matrix4<F>,
}

/// The components of an affine [`Transform`]. Recomposition applies, in
/// order, the scaling, the shear, the rotation and the translation.
///
/// The shear holds the `xy`, `xz` and `yz` factors of a unit upper
/// triangular shear matrix.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TransformComponents<F: Float> {
    pub scale: Vector3<F>,
    pub shear: Vector3<F>,
    pub rotation: UnitQuaternion<F>,
    pub translation: Vector3<F>,
}

impl<F: Float> Transform<F> {
    /// Creates the identity transform.
    pub fn identity() -> Self {
        Self {
            matrix: Matrix4::identity(),
        }
    }

    /// Creates a transform from the given homogeneous matrix. The bottom row
    /// of the matrix is assumed to be `[0, 0, 0, 1]`.
    pub fn from_matrix_unchecked(matrix: Matrix4<F>) -> Self {
        Self { matrix }
    }

    /// Creates a pure translation.
    pub fn from_translation(translation: &Vector3<F>) -> Self {
        Self::from_matrix_unchecked(Matrix4::new_translation(translation))
    }

    /// Creates a pure rotation.
    pub fn from_rotation(rotation: &UnitQuaternion<F>) -> Self {
        Self::from_matrix_unchecked(rotation.to_homogeneous())
    }

    /// Creates a pure (possibly non-uniform) scaling.
    pub fn from_scaling(scale: &Vector3<F>) -> Self {
        Self::from_matrix_unchecked(Matrix4::new_nonuniform_scaling(scale))
    }

    /// Creates a transform with the given rotation followed by the given
    /// translation.
    pub fn from_rotation_and_translation(
        rotation: &UnitQuaternion<F>,
        translation: &Vector3<F>,
    ) -> Self {
        let mut matrix = rotation.to_homogeneous();
        matrix.fixed_view_mut::<3, 1>(0, 3).copy_from(translation);
        Self::from_matrix_unchecked(matrix)
    }

    /// Recomposes a transform from its components.
    pub fn from_components(components: &TransformComponents<F>) -> Self {
        let shear = Matrix3::new(
            F::ONE,
            components.shear.x,
            components.shear.y,
            F::ZERO,
            F::ONE,
            components.shear.z,
            F::ZERO,
            F::ZERO,
            F::ONE,
        );
        let linear = components.rotation.to_rotation_matrix().into_inner()
            * shear
            * Matrix3::from_diagonal(&components.scale);

        let mut matrix = linear.to_homogeneous();
        matrix
            .fixed_view_mut::<3, 1>(0, 3)
            .copy_from(&components.translation);
        Self::from_matrix_unchecked(matrix)
    }

    /// Returns the homogeneous matrix of the transform.
    pub fn matrix(&self) -> &Matrix4<F> {
        &self.matrix
    }

    /// Returns the linear (upper-left 3x3) part of the transform.
    pub fn linear_part(&self) -> Matrix3<F> {
        self.matrix.fixed_view::<3, 3>(0, 0).into_owned()
    }

    /// Returns the translation of the transform.
    pub fn translation(&self) -> Vector3<F> {
        self.matrix.fixed_view::<3, 1>(0, 3).into_owned()
    }

    /// Returns the point the transform maps the origin to.
    pub fn position(&self) -> Point3<F> {
        Point3::from(self.translation())
    }

    /// Replaces the translation of the transform so that it maps the origin
    /// to the given point.
    pub fn set_position(&mut self, position: &Point3<F>) {
        self.matrix
            .fixed_view_mut::<3, 1>(0, 3)
            .copy_from(&position.coords);
    }

    /// Applies the given translation after this transform.
    pub fn translate(&mut self, translation: &Vector3<F>) {
        let new_translation = self.translation() + translation;
        self.matrix
            .fixed_view_mut::<3, 1>(0, 3)
            .copy_from(&new_translation);
    }

    /// Returns this transform followed by the given translation.
    pub fn translated(&self, translation: &Vector3<F>) -> Self {
        let mut transform = *self;
        transform.translate(translation);
        transform
    }

    /// Returns the image of the given axis (0 => x, 1 => y, 2 => z) under the
    /// linear part of the transform.
    ///
    /// # Panics
    /// If `axis` exceeds 2.
    pub fn axis(&self, axis: usize) -> Vector3<F> {
        assert!(axis < 3, "Invalid axis index {}", axis);
        self.matrix.fixed_view::<3, 1>(0, axis).into_owned()
    }

    pub fn x_axis(&self) -> Vector3<F> {
        self.axis(0)
    }

    pub fn y_axis(&self) -> Vector3<F> {
        self.axis(1)
    }

    pub fn z_axis(&self) -> Vector3<F> {
        self.axis(2)
    }

    /// Returns the length of each transformed coordinate axis.
    pub fn local_scale(&self) -> Vector3<F> {
        Vector3::new(
            self.x_axis().norm(),
            self.y_axis().norm(),
            self.z_axis().norm(),
        )
    }

    /// Applies the transform to the given point.
    pub fn transform_point(&self, point: &Point3<F>) -> Point3<F> {
        self.matrix.transform_point(point)
    }

    /// Applies the linear part of the transform to the given vector.
    pub fn transform_vector(&self, vector: &Vector3<F>) -> Vector3<F> {
        self.linear_part() * vector
    }

    /// Decomposes the transform into scale, shear, rotation and translation
    /// using Gram-Schmidt orthogonalization of the linear part.
    ///
    /// A reflection is absorbed into a negative z-scale so that the rotation
    /// is always proper.
    ///
    /// # Returns
    /// [`None`] if the linear part is singular.
    pub fn decompose(&self) -> Option<TransformComponents<F>> {
        let eps = F::default_epsilon();

        let column_0 = self.x_axis();
        let column_1 = self.y_axis();
        let column_2 = self.z_axis();

        let scale_x = column_0.norm();
        if scale_x <= eps {
            return None;
        }
        let r0 = column_0 / scale_x;

        let u01 = r0.dot(&column_1);
        let orthogonal_1 = column_1 - r0 * u01;
        let scale_y = orthogonal_1.norm();
        if scale_y <= eps {
            return None;
        }
        let r1 = orthogonal_1 / scale_y;

        let u02 = r0.dot(&column_2);
        let u12 = r1.dot(&column_2);
        let orthogonal_2 = column_2 - r0 * u02 - r1 * u12;
        let mut scale_z = orthogonal_2.norm();
        if scale_z <= eps {
            return None;
        }
        let mut r2 = orthogonal_2 / scale_z;

        if r0.cross(&r1).dot(&r2) < F::ZERO {
            r2 = -r2;
            scale_z = -scale_z;
        }

        let rotation_matrix = Matrix3::from_columns(&[r0, r1, r2]);
        let rotation =
            UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(rotation_matrix));

        Some(TransformComponents {
            scale: Vector3::new(scale_x, scale_y, scale_z),
            shear: Vector3::new(u01 / scale_y, u02 / scale_z, u12 / scale_z),
            rotation,
            translation: self.translation(),
        })
    }

    /// Computes the inverse transform, or [`None`] if the linear part is
    /// singular.
    pub fn try_inverse(&self) -> Option<Self> {
        let inverse_linear = self.linear_part().try_inverse()?;
        let inverse_translation = -(inverse_linear * self.translation());

        let mut matrix = inverse_linear.to_homogeneous();
        matrix
            .fixed_view_mut::<3, 1>(0, 3)
            .copy_from(&inverse_translation);
        Some(Self::from_matrix_unchecked(matrix))
    }

    /// Computes the inverse transform.
    ///
    /// # Note
    /// If the linear part is singular, only the translation is undone.
    pub fn inverse(&self) -> Self {
        self.try_inverse()
            .unwrap_or_else(|| Self::from_translation(&(-self.translation())))
    }

    /// Interpolates between this and the given transform. Scale, shear and
    /// translation are interpolated linearly and the rotation spherically.
    /// If either transform cannot be decomposed, the matrices are blended
    /// directly.
    pub fn interpolate(&self, other: &Self, t: F) -> Self {
        match (self.decompose(), other.decompose()) {
            (Some(from), Some(to)) => {
                let rotation = from
                    .rotation
                    .try_slerp(&to.rotation, t, F::default_epsilon())
                    .unwrap_or(if t < F::HALF {
                        from.rotation
                    } else {
                        to.rotation
                    });

                Self::from_components(&TransformComponents {
                    scale: from.scale.lerp(&to.scale, t),
                    shear: from.shear.lerp(&to.shear, t),
                    rotation,
                    translation: from.translation.lerp(&to.translation, t),
                })
            }
            _ => Self::from_matrix_unchecked(self.matrix * (F::ONE - t) + other.matrix * t),
        }
    }
}

impl<F: Float> Default for Transform<F> {
    fn default() -> Self {
        Self::identity()
    }
}

impl<F: Float> Mul for Transform<F> {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self {
        Self::from_matrix_unchecked(self.matrix * rhs.matrix)
    }
}

impl<F: Float> Mul<&Transform<F>> for &Transform<F> {
    type Output = Transform<F>;

    fn mul(self, rhs: &Transform<F>) -> Transform<F> {
        Transform::from_matrix_unchecked(self.matrix * rhs.matrix)
    }
}

impl<F: Float> TransformComponents<F> {
    /// Components of the identity transform.
    pub fn identity() -> Self {
        Self {
            scale: Vector3::repeat(F::ONE),
            shear: Vector3::zeros(),
            rotation: UnitQuaternion::identity(),
            translation: Vector3::zeros(),
        }
    }
}

impl<F: Float> AbsDiffEq for Transform<F> {
    type Epsilon = F;

    fn default_epsilon() -> Self::Epsilon {
        F::default_epsilon()
    }

    fn abs_diff_eq(&self, other: &Self, epsilon: Self::Epsilon) -> bool {
        self.matrix.abs_diff_eq(&other.matrix, epsilon)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_abs_diff_eq;
    use nalgebra::{point, vector};
    use proptest::prelude::*;
    use std::f64::consts::FRAC_PI_2;

    fn rotation_about_z(angle: f64) -> UnitQuaternion<f64> {
        UnitQuaternion::from_axis_angle(&Vector3::z_axis(), angle)
    }

    #[test]
    fn identity_leaves_points_unchanged() {
        let transform = Transform::<f64>::identity();
        let point = point![1.0, -2.0, 3.0];
        assert_abs_diff_eq!(transform.transform_point(&point), point);
    }

    #[test]
    fn composition_applies_right_operand_first() {
        let rotation = Transform::from_rotation(&rotation_about_z(FRAC_PI_2));
        let translation = Transform::from_translation(&vector![1.0, 0.0, 0.0]);

        let rotate_then_translate = translation * rotation;
        assert_abs_diff_eq!(
            rotate_then_translate.transform_point(&point![1.0, 0.0, 0.0]),
            point![1.0, 1.0, 0.0],
            epsilon = 1e-12
        );

        let translate_then_rotate = rotation * translation;
        assert_abs_diff_eq!(
            translate_then_rotate.transform_point(&point![1.0, 0.0, 0.0]),
            point![0.0, 2.0, 0.0],
            epsilon = 1e-12
        );
    }

    #[test]
    fn composition_is_associative() {
        let a = Transform::from_rotation(&rotation_about_z(0.3));
        let b = Transform::from_scaling(&vector![2.0, 1.0, 0.5]);
        let c = Transform::from_translation(&vector![1.0, -4.0, 2.0]);
        assert_abs_diff_eq!((a * b) * c, a * (b * c), epsilon = 1e-12);
    }

    #[test]
    fn inverse_of_inverse_is_original() {
        let transform = Transform::from_components(&TransformComponents {
            scale: vector![2.0, 3.0, 0.5],
            shear: vector![0.1, -0.2, 0.3],
            rotation: UnitQuaternion::from_euler_angles(0.2, -1.1, 2.5),
            translation: vector![4.0, 5.0, -6.0],
        });
        assert_abs_diff_eq!(transform.inverse().inverse(), transform, epsilon = 1e-9);
        assert_abs_diff_eq!(
            transform * transform.inverse(),
            Transform::identity(),
            epsilon = 1e-9
        );
    }

    #[test]
    fn inverse_of_singular_transform_undoes_translation() {
        let transform = Transform::from_scaling(&vector![0.0, 1.0, 1.0])
            .translated(&vector![1.0, 2.0, 3.0]);
        assert!(transform.try_inverse().is_none());
        assert_abs_diff_eq!(
            transform.inverse().translation(),
            vector![-1.0, -2.0, -3.0]
        );
    }

    #[test]
    fn decomposing_singular_transform_gives_none() {
        let transform = Transform::<f64>::from_scaling(&vector![1.0, 0.0, 1.0]);
        assert!(transform.decompose().is_none());
    }

    #[test]
    fn decomposing_reflection_gives_negative_z_scale() {
        let transform = Transform::<f64>::from_scaling(&vector![1.0, 1.0, -2.0]);
        let components = transform.decompose().unwrap();
        assert_abs_diff_eq!(components.scale, vector![1.0, 1.0, -2.0], epsilon = 1e-12);
        assert_abs_diff_eq!(
            Transform::from_components(&components),
            transform,
            epsilon = 1e-12
        );
    }

    #[test]
    fn setting_position_replaces_translation() {
        let mut transform = Transform::from_rotation(&rotation_about_z(0.4));
        transform.set_position(&point![3.0, 2.0, 1.0]);
        assert_abs_diff_eq!(transform.position(), point![3.0, 2.0, 1.0]);
        assert_abs_diff_eq!(
            transform.linear_part(),
            rotation_about_z(0.4).to_rotation_matrix().into_inner()
        );
    }

    #[test]
    fn translating_adds_to_position() {
        let mut transform = Transform::from_translation(&vector![1.0, 1.0, 1.0]);
        transform.translate(&vector![-1.0, 2.0, 0.5]);
        assert_abs_diff_eq!(transform.position(), point![0.0, 3.0, 1.5]);
    }

    #[test]
    fn local_scale_is_length_of_axes() {
        let transform = Transform::from_rotation(&rotation_about_z(1.0))
            * Transform::from_scaling(&vector![2.0, 3.0, 4.0]);
        assert_abs_diff_eq!(transform.local_scale(), vector![2.0, 3.0, 4.0], epsilon = 1e-12);
    }

    #[test]
    fn interpolating_halfway_blends_components() {
        let from = Transform::from_translation(&vector![0.0, 0.0, 0.0]);
        let to = Transform::from_rotation_and_translation(
            &rotation_about_z(FRAC_PI_2),
            &vector![2.0, 4.0, 0.0],
        );
        let halfway = from.interpolate(&to, 0.5);
        let components = halfway.decompose().unwrap();

        assert_abs_diff_eq!(components.translation, vector![1.0, 2.0, 0.0], epsilon = 1e-12);
        assert_abs_diff_eq!(components.rotation.angle(), FRAC_PI_2 / 2.0, epsilon = 1e-9);
    }

    #[test]
    fn interpolating_at_ends_gives_endpoints() {
        let from = Transform::from_scaling(&vector![1.0, 2.0, 3.0]);
        let to = Transform::from_translation(&vector![5.0, 0.0, -1.0]);
        assert_abs_diff_eq!(from.interpolate(&to, 0.0), from, epsilon = 1e-9);
        assert_abs_diff_eq!(from.interpolate(&to, 1.0), to, epsilon = 1e-9);
    }

    proptest! {
        #[test]
        fn recomposing_decomposed_transform_reproduces_matrix(
            scale in 0.05..20.0_f64,
            roll in -3.1..3.1_f64,
            pitch in -1.5..1.5_f64,
            yaw in -3.1..3.1_f64,
            tx in -1e3..1e3_f64,
            ty in -1e3..1e3_f64,
            tz in -1e3..1e3_f64,
        ) {
            let transform = Transform::from_components(&TransformComponents {
                scale: Vector3::repeat(scale),
                shear: Vector3::zeros(),
                rotation: UnitQuaternion::from_euler_angles(roll, pitch, yaw),
                translation: vector![tx, ty, tz],
            });

            let components = transform.decompose().unwrap();
            let recomposed = Transform::from_components(&components);

            prop_assert!(recomposed.abs_diff_eq(&transform, 1e-5));
            prop_assert!((components.scale - Vector3::repeat(scale)).norm() < 1e-5);
            prop_assert!(components.shear.norm() < 1e-5);
        }

        #[test]
        fn recomposing_decomposed_sheared_transform_reproduces_matrix(
            sx in 0.1..10.0_f64,
            sy in 0.1..10.0_f64,
            sz in 0.1..10.0_f64,
            hxy in -1.0..1.0_f64,
            hxz in -1.0..1.0_f64,
            hyz in -1.0..1.0_f64,
            roll in -3.1..3.1_f64,
            pitch in -1.5..1.5_f64,
            yaw in -3.1..3.1_f64,
        ) {
            let components = TransformComponents {
                scale: vector![sx, sy, sz],
                shear: vector![hxy, hxz, hyz],
                rotation: UnitQuaternion::from_euler_angles(roll, pitch, yaw),
                translation: vector![1.0, 2.0, 3.0],
            };
            let transform = Transform::from_components(&components);
            let decomposed = transform.decompose().unwrap();

            prop_assert!(Transform::from_components(&decomposed).abs_diff_eq(&transform, 1e-5));
            prop_assert!((decomposed.scale - components.scale).norm() < 1e-5);
            prop_assert!((decomposed.shear - components.shear).norm() < 1e-5);
        }
    }
}
