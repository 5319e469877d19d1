//! Scene graph of object nodes with deferred update resolution.

mod bucket;
mod cell;
mod graph;
mod kind;
mod load;
mod node;
mod object;
mod persistence;
mod physics;
mod resolve;
mod spatial;

pub use bucket::{UpdateBuckets, UpdateRate};
pub use cell::{CellKey, SceneCell};
pub use graph::Scene;
pub use kind::{ActorNode, GroupNode, NodeBehavior, NodeVariant, TargetNode};
pub use load::{CloneMethod, LoadError, NodeRecord};
pub use node::{DeferredUpdates, NodeID, NodeTargetMethod, ObjectNode, TransformMethod};
pub use object::{Motion, ObjectKind, ObjectProperties, WorldObject, WorldObjectStore};
pub use persistence::{NoPersistence, PersistedField, ScenePersistence};
pub use physics::{
    BodyModel, NavigationAgent, PhysicsBody, PhysicsEvent, PhysicsWorld, TransformSource,
    scaled_mass,
};
pub use spatial::{FlatSpatialIndex, SpatialCategories, SpatialHandle, SpatialIndex, VisibilitySet};
