//! Light sources and their shadow map generation.

mod generator;
mod pass;
mod point;
mod render;

pub use generator::{
    FaceCamera, FillResult, GeneratorKey, MapKind, PoolAssignment, PooledMapID,
    PooledShadowGenerator, ShadowGenerator, ShadowMapPool, TexturePool,
};
pub use pass::{LightingOp, LightingPass, PassFrustum, PassTracker};
pub use point::{
    BorderRepair, EdgeProcess, FACE_NEAR_DISTANCE, PointLightNode, PointLightProperties,
    ShadowMapReassignment,
};
pub use render::{LightRenderer, ViewCamera, VolumeQuery};
