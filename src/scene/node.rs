//! Live scene nodes.

use crate::{
    fsc,
    geometry::{AxisAlignedBox, Transform},
    scene::{
        CellKey, NavigationAgent, NodeVariant, PhysicsBody, SpatialHandle, UpdateRate,
    },
};
use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};
use nalgebra::{Point3, Vector3};
use scene_utils::{ArenaIdx, SlotHandle};

/// Identifier for an [`ObjectNode`] in a [`Scene`](crate::scene::Scene).
#[repr(transparent)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Zeroable, Pod)]
pub struct NodeID(ArenaIdx);

bitflags! {
    /// Derived node state that is stale and awaits deferred resolution.
    #[repr(transparent)]
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Zeroable, Pod)]
    pub struct DeferredUpdates: u8 {
        /// The cell transform must be recomputed from the local transform
        /// and the parent's cell transform.
        const TRANSFORMS       = 1 << 0;
        /// The world space bounding box must be recomputed.
        const BOUNDING_BOX     = 1 << 1;
        /// The node's scene cell and spatial index entry must be refreshed.
        const OWNERSHIP_STATUS = 1 << 2;
        /// The node should be unloaded once nothing else is pending.
        const UNLOAD           = 1 << 3;
        const RESOLVABLE = Self::TRANSFORMS.bits()
            | Self::BOUNDING_BOX.bits()
            | Self::OWNERSHIP_STATUS.bits();
    }
}

/// How a new cell transform is split between the node's pivot and the
/// offset from the pivot to the object origin.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TransformMethod {
    /// Moves pivot and object together, carrying the children along.
    #[default]
    Standard,
    /// Moves only the pivot. The object and the children keep their world
    /// pose.
    PivotOnly,
    /// Moves only the object relative to a fixed pivot.
    ObjectOnly,
    /// Moves pivot and object while the children keep their world pose.
    NoChildUpdate,
}

/// Which local axis of a node is kept pointing at its target node.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum NodeTargetMethod {
    #[default]
    NoTarget,
    XAxis,
    YAxis,
    ZAxis,
    /// The target exists but does not orient the node.
    Unlocked,
    /// Like [`ZAxis`](Self::ZAxis), with the target placed relative to the
    /// node's current orientation.
    Relative,
}

/// A node in the live scene, referencing a shared
/// [`WorldObject`](crate::scene::WorldObject).
///
/// The cell transform places the node's pivot relative to the origin of the
/// scene cell of its root ancestor. The full world transform is the world
/// pivot transform followed by the offset from the pivot to the object
/// origin. Derived state is only valid while the corresponding
/// [`DeferredUpdates`] bit is clear.
#[derive(Debug)]
pub struct ObjectNode {
    pub(crate) reference_id: u32,
    pub(crate) object_reference_id: u32,
    pub(crate) name: Option<String>,
    pub(crate) variant: NodeVariant,
    pub(crate) cell_transform: Transform<fsc>,
    pub(crate) offset_transform: Transform<fsc>,
    pub(crate) local_transform: Transform<fsc>,
    pub(crate) world_pivot_transform: Transform<fsc>,
    pub(crate) pending_updates: DeferredUpdates,
    pub(crate) world_bounds: AxisAlignedBox<fsc>,
    pub(crate) parent: Option<NodeID>,
    pub(crate) children: Vec<NodeID>,
    pub(crate) owner_group: Option<NodeID>,
    pub(crate) target: Option<NodeID>,
    pub(crate) target_method: NodeTargetMethod,
    pub(crate) level: u32,
    pub(crate) cell: Option<CellKey>,
    pub(crate) queue_slot: Option<SlotHandle>,
    pub(crate) update_rate: UpdateRate,
    pub(crate) spatial_handle: Option<SpatialHandle>,
    pub(crate) physics_body: Option<Box<dyn PhysicsBody>>,
    pub(crate) base_mass: fsc,
    pub(crate) navigation_agent: Option<Box<dyn NavigationAgent>>,
    pub(crate) transform_method: TransformMethod,
    pub(crate) contacts: Vec<NodeID>,
}

impl NodeID {
    pub(crate) fn from_idx(idx: ArenaIdx) -> Self {
        Self(idx)
    }

    pub(crate) fn idx(&self) -> ArenaIdx {
        self.0
    }
}

impl DeferredUpdates {
    /// Returns the requested updates that are pending, extended with the
    /// pending updates they depend on. Ownership depends on the bounding
    /// box, which depends on the transforms.
    pub fn with_dependencies(self, pending: Self) -> Self {
        let mut updates = self & pending & Self::RESOLVABLE;
        if updates.contains(Self::OWNERSHIP_STATUS) && pending.contains(Self::BOUNDING_BOX) {
            updates |= Self::BOUNDING_BOX;
        }
        if updates.contains(Self::BOUNDING_BOX) && pending.contains(Self::TRANSFORMS) {
            updates |= Self::TRANSFORMS;
        }
        updates
    }
}

impl ObjectNode {
    pub(crate) fn new(
        reference_id: u32,
        object_reference_id: u32,
        variant: NodeVariant,
        cell_transform: Transform<fsc>,
    ) -> Self {
        let position = cell_transform.position();
        Self {
            reference_id,
            object_reference_id,
            name: None,
            variant,
            cell_transform,
            offset_transform: Transform::identity(),
            local_transform: cell_transform,
            world_pivot_transform: cell_transform,
            pending_updates: DeferredUpdates::empty(),
            world_bounds: AxisAlignedBox::new(position, position),
            parent: None,
            children: Vec::new(),
            owner_group: None,
            target: None,
            target_method: NodeTargetMethod::NoTarget,
            level: 0,
            cell: None,
            queue_slot: None,
            update_rate: UpdateRate::Never,
            spatial_handle: None,
            physics_body: None,
            base_mass: 0.0,
            navigation_agent: None,
            transform_method: TransformMethod::Standard,
            contacts: Vec::new(),
        }
    }

    /// The node's reference ID, or 0 for transient nodes that are never
    /// persisted or assigned to cells.
    pub fn reference_id(&self) -> u32 {
        self.reference_id
    }

    /// The reference ID of the world object the node instances.
    pub fn object_reference_id(&self) -> u32 {
        self.object_reference_id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn variant(&self) -> &NodeVariant {
        &self.variant
    }

    pub fn variant_mut(&mut self) -> &mut NodeVariant {
        &mut self.variant
    }

    pub fn cell_transform(&self) -> &Transform<fsc> {
        &self.cell_transform
    }

    pub fn offset_transform(&self) -> &Transform<fsc> {
        &self.offset_transform
    }

    /// The transform relative to the parent, or the cell transform for root
    /// nodes.
    pub fn local_transform(&self) -> &Transform<fsc> {
        &self.local_transform
    }

    pub fn pending_updates(&self) -> DeferredUpdates {
        self.pending_updates
    }

    /// Whether the node is waiting in the scene's pending update queue.
    pub fn is_queued(&self) -> bool {
        self.queue_slot.is_some()
    }

    pub fn parent(&self) -> Option<NodeID> {
        self.parent
    }

    pub fn children(&self) -> &[NodeID] {
        &self.children
    }

    pub fn owner_group(&self) -> Option<NodeID> {
        self.owner_group
    }

    pub fn target(&self) -> Option<NodeID> {
        self.target
    }

    pub fn target_method(&self) -> NodeTargetMethod {
        self.target_method
    }

    /// Depth in the hierarchy, 0 for root nodes.
    pub fn level(&self) -> u32 {
        self.level
    }

    pub fn cell(&self) -> Option<CellKey> {
        self.cell
    }

    pub fn update_rate(&self) -> UpdateRate {
        self.update_rate
    }

    pub fn transform_method(&self) -> TransformMethod {
        self.transform_method
    }

    pub fn spatial_handle(&self) -> Option<SpatialHandle> {
        self.spatial_handle
    }

    pub fn physics_body(&self) -> Option<&dyn PhysicsBody> {
        self.physics_body.as_deref()
    }

    pub fn has_navigation_agent(&self) -> bool {
        self.navigation_agent.is_some()
    }

    /// The nodes whose bodies are currently touching this node's body.
    pub fn contacts(&self) -> &[NodeID] {
        &self.contacts
    }

    /// The world transform as of the last resolution of
    /// [`DeferredUpdates::TRANSFORMS`].
    pub fn cached_world_transform(&self) -> Transform<fsc> {
        self.world_pivot_transform * self.offset_transform
    }

    /// The world bounding box as of the last resolution of
    /// [`DeferredUpdates::BOUNDING_BOX`].
    pub fn cached_world_bounds(&self) -> &AxisAlignedBox<fsc> {
        &self.world_bounds
    }

    pub(crate) fn set_cell_transform_and_pivot(
        &mut self,
        cell_transform: Transform<fsc>,
        cell_origin: &Vector3<fsc>,
    ) {
        self.cell_transform = cell_transform;
        self.world_pivot_transform = cell_transform.translated(cell_origin);
    }

    pub(crate) fn cached_world_position(&self) -> Point3<fsc> {
        self.cached_world_transform().position()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dependencies_are_only_added_when_pending() {
        let pending = DeferredUpdates::BOUNDING_BOX | DeferredUpdates::OWNERSHIP_STATUS;
        assert_eq!(
            DeferredUpdates::OWNERSHIP_STATUS.with_dependencies(pending),
            pending
        );
        assert_eq!(
            DeferredUpdates::OWNERSHIP_STATUS
                .with_dependencies(DeferredUpdates::OWNERSHIP_STATUS | DeferredUpdates::TRANSFORMS),
            DeferredUpdates::OWNERSHIP_STATUS
        );
    }

    #[test]
    fn ownership_pulls_in_whole_chain() {
        let pending = DeferredUpdates::RESOLVABLE;
        assert_eq!(
            DeferredUpdates::OWNERSHIP_STATUS.with_dependencies(pending),
            DeferredUpdates::RESOLVABLE
        );
    }

    #[test]
    fn unload_is_never_resolved_as_dependency() {
        let pending = DeferredUpdates::RESOLVABLE | DeferredUpdates::UNLOAD;
        assert!(
            !DeferredUpdates::all()
                .with_dependencies(pending)
                .contains(DeferredUpdates::UNLOAD)
        );
    }

    #[test]
    fn requesting_updates_that_are_not_pending_gives_nothing() {
        assert!(
            DeferredUpdates::TRANSFORMS
                .with_dependencies(DeferredUpdates::BOUNDING_BOX)
                .is_empty()
        );
    }
}
