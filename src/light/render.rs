//! The renderer-facing side of light processing.

use crate::{
    fsc,
    geometry::{CubemapFace, Frustum, Transform},
    light::ShadowGenerator,
};
use nalgebra::Point3;
use std::fmt;

/// How the viewing camera relates to a light volume, used by the renderer to
/// pick a draw strategy for the volume's shape.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VolumeQuery {
    /// The camera is inside the volume, so only inner faces are visible.
    Inside,
    /// The volume intersects the space between the camera and its near
    /// plane.
    Intersect,
    /// The volume lies entirely in front of the near plane.
    Outside,
}

/// The camera that light processing is performed for.
#[derive(Clone, Debug)]
pub struct ViewCamera {
    pub position: Point3<fsc>,
    /// The frustum spanning the space between the camera position and its
    /// near plane.
    pub clipping_volume: Frustum<fsc>,
}

/// The draw operations issued while processing lights.
pub trait LightRenderer: fmt::Debug {
    /// Draws the light volume shape with the given world transform for
    /// deferred lighting.
    fn render_light_volume(&mut self, shape_transform: &Transform<fsc>, query: VolumeQuery);

    /// Draws the volume of a single cube face for deferred lighting, using
    /// the given shadow generator's map if any.
    fn render_frustum(
        &mut self,
        face: CubemapFace,
        query: VolumeQuery,
        shadow: Option<&dyn ShadowGenerator>,
    );

    /// Begins forward rendering of geometry lit by the light volume with the
    /// given world transform.
    ///
    /// # Returns
    /// `false` if the renderer cannot apply the light this way.
    fn begin_forward(&mut self, shape_transform: &Transform<fsc>) -> bool;

    fn end_forward(&mut self);
}
