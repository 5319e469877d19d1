//! Kind-specific node state and capabilities.

use crate::{
    fsc,
    geometry::Transform,
    light::PointLightNode,
    scene::{Motion, NodeID, ObjectKind, SpatialCategories},
};
use nalgebra::{UnitQuaternion, Vector3};
use std::collections::BTreeSet;

/// Capabilities and per-frame hooks that differ between node kinds.
pub trait NodeBehavior {
    /// Whether the node's orientation may be changed.
    fn can_rotate(&self) -> bool {
        true
    }

    /// Whether the node may be scaled.
    fn can_scale(&self) -> bool {
        true
    }

    /// Which spatial index queries the node's bounding volume participates
    /// in. Nodes without categories are not registered with the index.
    fn spatial_categories(&self) -> SpatialCategories {
        SpatialCategories::empty()
    }

    /// Advances the node's own motion by `time_delta` seconds.
    ///
    /// # Returns
    /// The new cell transform, if the node moved.
    fn update(&mut self, _time_delta: fsc, _cell_transform: &Transform<fsc>) -> Option<Transform<fsc>> {
        None
    }

    /// Called whenever the node's world transform has changed.
    fn world_transform_changed(&mut self, _world_transform: &Transform<fsc>) {}
}

/// The kind-specific part of an [`ObjectNode`](crate::scene::ObjectNode).
#[derive(Debug)]
pub enum NodeVariant {
    Group(GroupNode),
    Mesh,
    PointLight(Box<PointLightNode>),
    Actor(ActorNode),
    Target(TargetNode),
    Dummy,
}

/// A node whose bounds enclose those of its member nodes.
#[derive(Clone, Debug, Default)]
pub struct GroupNode {
    members: BTreeSet<NodeID>,
}

/// A node moving by itself with constant velocities.
#[derive(Clone, Debug, Default)]
pub struct ActorNode {
    motion: Motion,
}

/// A node that another node keeps one of its axes pointed at.
#[derive(Clone, Copy, Debug)]
pub struct TargetNode {
    owner: NodeID,
}

impl NodeVariant {
    pub fn kind(&self) -> ObjectKind {
        match self {
            Self::Group(_) => ObjectKind::Group,
            Self::Mesh => ObjectKind::Mesh,
            Self::PointLight(_) => ObjectKind::PointLight,
            Self::Actor(_) => ObjectKind::Actor,
            Self::Target(_) => ObjectKind::Target,
            Self::Dummy => ObjectKind::Dummy,
        }
    }

    pub fn as_group(&self) -> Option<&GroupNode> {
        match self {
            Self::Group(group) => Some(group),
            _ => None,
        }
    }

    pub fn as_group_mut(&mut self) -> Option<&mut GroupNode> {
        match self {
            Self::Group(group) => Some(group),
            _ => None,
        }
    }

    pub fn as_point_light(&self) -> Option<&PointLightNode> {
        match self {
            Self::PointLight(light) => Some(light),
            _ => None,
        }
    }

    pub fn as_point_light_mut(&mut self) -> Option<&mut PointLightNode> {
        match self {
            Self::PointLight(light) => Some(light),
            _ => None,
        }
    }

    /// Returns the node whose target this is, if this is a target node.
    pub fn target_owner(&self) -> Option<NodeID> {
        match self {
            Self::Target(target) => Some(target.owner()),
            _ => None,
        }
    }

    fn behavior(&self) -> Option<&dyn NodeBehavior> {
        match self {
            Self::Group(group) => Some(group as &dyn NodeBehavior),
            Self::PointLight(light) => Some(light.as_ref() as &dyn NodeBehavior),
            Self::Actor(actor) => Some(actor as &dyn NodeBehavior),
            Self::Target(target) => Some(target as &dyn NodeBehavior),
            Self::Mesh | Self::Dummy => None,
        }
    }

    fn behavior_mut(&mut self) -> Option<&mut dyn NodeBehavior> {
        match self {
            Self::Group(group) => Some(group as &mut dyn NodeBehavior),
            Self::PointLight(light) => Some(light.as_mut() as &mut dyn NodeBehavior),
            Self::Actor(actor) => Some(actor as &mut dyn NodeBehavior),
            Self::Target(target) => Some(target as &mut dyn NodeBehavior),
            Self::Mesh | Self::Dummy => None,
        }
    }
}

impl NodeBehavior for NodeVariant {
    fn can_rotate(&self) -> bool {
        self.behavior().is_none_or(|behavior| behavior.can_rotate())
    }

    fn can_scale(&self) -> bool {
        self.behavior().is_none_or(|behavior| behavior.can_scale())
    }

    fn spatial_categories(&self) -> SpatialCategories {
        match self {
            Self::Mesh => SpatialCategories::RENDERABLE | SpatialCategories::SHADOW_CASTER,
            _ => self
                .behavior()
                .map_or_else(SpatialCategories::empty, |behavior| behavior.spatial_categories()),
        }
    }

    fn update(&mut self, time_delta: fsc, cell_transform: &Transform<fsc>) -> Option<Transform<fsc>> {
        self.behavior_mut()?.update(time_delta, cell_transform)
    }

    fn world_transform_changed(&mut self, world_transform: &Transform<fsc>) {
        if let Some(behavior) = self.behavior_mut() {
            behavior.world_transform_changed(world_transform);
        }
    }
}

impl GroupNode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn members(&self) -> impl Iterator<Item = NodeID> + '_ {
        self.members.iter().copied()
    }

    pub fn n_members(&self) -> usize {
        self.members.len()
    }

    pub fn contains(&self, node: NodeID) -> bool {
        self.members.contains(&node)
    }

    pub(crate) fn add_member(&mut self, node: NodeID) {
        self.members.insert(node);
    }

    pub(crate) fn remove_member(&mut self, node: NodeID) -> bool {
        self.members.remove(&node)
    }
}

impl NodeBehavior for GroupNode {}

impl ActorNode {
    pub fn new(motion: Motion) -> Self {
        Self { motion }
    }

    pub fn motion(&self) -> &Motion {
        &self.motion
    }

    pub fn set_motion(&mut self, motion: Motion) {
        self.motion = motion;
    }
}

impl NodeBehavior for ActorNode {
    fn spatial_categories(&self) -> SpatialCategories {
        SpatialCategories::RENDERABLE | SpatialCategories::SHADOW_CASTER
    }

    fn update(&mut self, time_delta: fsc, cell_transform: &Transform<fsc>) -> Option<Transform<fsc>> {
        if self.motion == Motion::default() || time_delta <= 0.0 {
            return None;
        }
        let rotation =
            UnitQuaternion::from_scaled_axis(self.motion.angular_velocity * time_delta);
        let displacement: Vector3<fsc> = self.motion.velocity * time_delta;

        // Spin about the object's own origin, then drift in cell space
        Some((*cell_transform * Transform::from_rotation(&rotation)).translated(&displacement))
    }
}

impl TargetNode {
    pub fn new(owner: NodeID) -> Self {
        Self { owner }
    }

    pub fn owner(&self) -> NodeID {
        self.owner
    }
}

impl NodeBehavior for TargetNode {
    fn can_rotate(&self) -> bool {
        false
    }

    fn can_scale(&self) -> bool {
        false
    }
}

impl NodeBehavior for PointLightNode {
    fn can_rotate(&self) -> bool {
        false
    }

    fn can_scale(&self) -> bool {
        false
    }

    fn spatial_categories(&self) -> SpatialCategories {
        SpatialCategories::LIGHT
    }

    fn world_transform_changed(&mut self, world_transform: &Transform<fsc>) {
        self.set_world_transform(*world_transform);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::light::PointLightProperties;
    use approx::assert_abs_diff_eq;
    use nalgebra::{point, vector};
    use std::f64::consts::FRAC_PI_2;

    #[test]
    fn lights_and_targets_cannot_rotate_or_scale() {
        let light = NodeVariant::PointLight(Box::new(PointLightNode::new(
            1,
            PointLightProperties::default(),
            64,
        )));
        assert!(!light.can_rotate());
        assert!(!light.can_scale());
        assert_eq!(light.spatial_categories(), SpatialCategories::LIGHT);

        assert!(NodeVariant::Mesh.can_rotate());
        assert!(NodeVariant::Dummy.spatial_categories().is_empty());
    }

    #[test]
    fn stationary_actor_does_not_move() {
        let mut actor = NodeVariant::Actor(ActorNode::default());
        assert!(actor.update(0.5, &Transform::identity()).is_none());
    }

    #[test]
    fn actor_drifts_and_spins_in_place() {
        let mut actor = ActorNode::new(Motion {
            velocity: vector![2.0, 0.0, 0.0],
            angular_velocity: vector![0.0, 0.0, FRAC_PI_2],
        });
        let start = Transform::from_translation(&vector![0.0, 1.0, 0.0]);
        let moved = actor.update(1.0, &start).unwrap();

        assert_abs_diff_eq!(moved.position(), point![2.0, 1.0, 0.0], epsilon = 1e-12);
        assert_abs_diff_eq!(moved.x_axis(), vector![0.0, 1.0, 0.0], epsilon = 1e-12);
    }

    #[test]
    fn light_follows_world_transform() {
        let mut light = NodeVariant::PointLight(Box::new(PointLightNode::new(
            1,
            PointLightProperties::default(),
            64,
        )));
        light.world_transform_changed(&Transform::from_translation(&vector![0.0, 0.0, 4.0]));
        assert_eq!(
            light.as_point_light().unwrap().position(),
            point![0.0, 0.0, 4.0]
        );
    }
}
