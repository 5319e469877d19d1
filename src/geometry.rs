//! Geometrical objects.

mod axis_aligned_box;
mod cubemap;
mod frustum;
mod plane;
mod sphere;
mod transform;

pub use axis_aligned_box::AxisAlignedBox;
pub use cubemap::{CubemapFace, FaceOrientation};
pub use frustum::Frustum;
pub use plane::Plane;
pub use sphere::Sphere;
pub use transform::{Transform, TransformComponents};
