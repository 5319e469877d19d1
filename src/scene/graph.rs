//! The live scene owning every loaded node.

use crate::{
    config::{LightingConfig, SceneConfig},
    fsc,
    geometry::{AxisAlignedBox, Transform},
    light::{EdgeProcess, PointLightNode, PointLightProperties},
    scene::{
        ActorNode, CellKey, DeferredUpdates, FlatSpatialIndex, GroupNode, NavigationAgent,
        NoPersistence, NodeBehavior, NodeID, NodeTargetMethod, NodeVariant, ObjectKind, ObjectNode,
        ObjectProperties, PersistedField, PhysicsBody, PhysicsEvent, PhysicsWorld, SceneCell,
        ScenePersistence, SpatialIndex, TargetNode, TransformMethod, TransformSource,
        UpdateBuckets, UpdateRate, WorldObject, WorldObjectStore,
    },
};
use anyhow::{Result, anyhow, bail};
use nalgebra::{Point3, Vector3};
use nohash_hasher::IntMap;
use scene_utils::{GenerationalArena, SlotQueue};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Distance from a node to a newly created target node, in units of the
/// node's largest bounding box half extent.
const TARGET_PLACEMENT_DISTANCE: fsc = 2.0;

/// The set of loaded [`ObjectNode`]s together with the scene cells that
/// partition them, the queue of nodes awaiting deferred update resolution and
/// the world objects the nodes instance.
///
/// Mutations only mark derived node state as stale. The stale state is
/// recomputed when [`resolve_pending_updates`](Self::resolve_pending_updates)
/// drains the queue, or earlier when an accessor like
/// [`world_transform`](Self::world_transform) needs it.
#[derive(Debug)]
pub struct Scene {
    pub(crate) config: SceneConfig,
    pub(crate) lighting_config: LightingConfig,
    pub(crate) cell_size: Vector3<fsc>,
    pub(crate) nodes: GenerationalArena<ObjectNode>,
    pub(crate) nodes_by_reference: IntMap<u32, NodeID>,
    pub(crate) root_nodes: BTreeSet<NodeID>,
    pub(crate) cells: BTreeMap<CellKey, SceneCell>,
    pub(crate) update_buckets: UpdateBuckets,
    pub(crate) pending_updates: SlotQueue<NodeID>,
    pub(crate) evicted_unloads: BTreeSet<NodeID>,
    pub(crate) node_names: HashMap<String, NodeID>,
    pub(crate) objects: WorldObjectStore,
    pub(crate) spatial_index: Box<dyn SpatialIndex>,
    pub(crate) orphans: BTreeSet<NodeID>,
    pub(crate) persistence: Box<dyn ScenePersistence>,
    pub(crate) physics: Option<Box<dyn PhysicsWorld>>,
    pub(crate) next_reference_id: u32,
    pub(crate) loading: bool,
    pub(crate) last_update_time: Option<fsc>,
}

/// Whether removed nodes are gone for good or merely leave memory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Removal {
    Delete,
    Unload,
}

impl Scene {
    /// Creates an empty scene using a [`FlatSpatialIndex`] and discarding
    /// all persistence writes.
    pub fn new(config: SceneConfig, lighting_config: LightingConfig) -> Self {
        let cell_size = Vector3::from(config.cell_size);
        let pending_updates = SlotQueue::with_capacity(config.pending_update_capacity.max(1));
        let spatial_index = Box::new(FlatSpatialIndex::new(config.spatial_index_extent));
        Self {
            config,
            lighting_config,
            cell_size,
            nodes: GenerationalArena::new(),
            nodes_by_reference: IntMap::default(),
            root_nodes: BTreeSet::new(),
            cells: BTreeMap::new(),
            update_buckets: UpdateBuckets::new(),
            pending_updates,
            evicted_unloads: BTreeSet::new(),
            node_names: HashMap::new(),
            objects: WorldObjectStore::new(),
            spatial_index,
            orphans: BTreeSet::new(),
            persistence: Box::new(NoPersistence),
            physics: None,
            next_reference_id: 1,
            loading: false,
            last_update_time: None,
        }
    }

    /// Uses the given storage for writing through node mutations.
    pub fn with_persistence(mut self, persistence: Box<dyn ScenePersistence>) -> Self {
        self.persistence = persistence;
        self
    }

    /// Uses the given index for bounding volumes. Must be given before any
    /// node is created.
    pub fn with_spatial_index(mut self, spatial_index: Box<dyn SpatialIndex>) -> Self {
        self.spatial_index = spatial_index;
        self
    }

    /// Steps the given physics simulation on every
    /// [`update`](Self::update).
    pub fn with_physics(mut self, physics: Box<dyn PhysicsWorld>) -> Self {
        self.physics = Some(physics);
        self
    }

    pub fn config(&self) -> &SceneConfig {
        &self.config
    }

    pub fn lighting_config(&self) -> &LightingConfig {
        &self.lighting_config
    }

    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn has_node(&self, node_id: NodeID) -> bool {
        self.nodes.contains(node_id.idx())
    }

    pub fn get_node(&self, node_id: NodeID) -> Option<&ObjectNode> {
        self.nodes.get(node_id.idx())
    }

    /// Returns the node with the given ID.
    ///
    /// # Panics
    /// If no node with the given ID exists.
    pub fn node(&self, node_id: NodeID) -> &ObjectNode {
        self.nodes.element(node_id.idx())
    }

    pub(crate) fn node_mut(&mut self, node_id: NodeID) -> &mut ObjectNode {
        self.nodes.element_mut(node_id.idx())
    }

    pub(crate) fn checked_node(&self, node_id: NodeID) -> Result<&ObjectNode> {
        self.get_node(node_id)
            .ok_or_else(|| anyhow!("No node with ID {:?} in scene", node_id))
    }

    pub fn node_by_reference(&self, reference_id: u32) -> Option<NodeID> {
        self.nodes_by_reference.get(&reference_id).copied()
    }

    pub fn node_by_name(&self, name: &str) -> Option<NodeID> {
        self.node_names.get(name).copied()
    }

    /// Returns an iterator over the nodes without a parent.
    pub fn root_nodes(&self) -> impl Iterator<Item = NodeID> + '_ {
        self.root_nodes.iter().copied()
    }

    pub fn n_cells(&self) -> usize {
        self.cells.len()
    }

    pub fn cell(&self, key: CellKey) -> Option<&SceneCell> {
        self.cells.get(&key)
    }

    pub fn cell_mut(&mut self, key: CellKey) -> Option<&mut SceneCell> {
        self.cells.get_mut(&key)
    }

    pub fn cells(&self) -> impl Iterator<Item = &SceneCell> {
        self.cells.values()
    }

    /// Returns the nodes whose bounding volume the spatial index declined.
    pub fn orphans(&self) -> impl Iterator<Item = NodeID> + '_ {
        self.orphans.iter().copied()
    }

    pub fn objects(&self) -> &WorldObjectStore {
        &self.objects
    }

    pub fn spatial_index(&self) -> &dyn SpatialIndex {
        self.spatial_index.as_ref()
    }

    /// Returns the number of nodes waiting in the pending update queue.
    pub fn n_pending_updates(&self) -> usize {
        self.pending_updates.len()
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    /// Adds a world object with a fresh reference ID and no instancing
    /// nodes.
    ///
    /// # Returns
    /// The object's reference ID.
    pub fn insert_world_object(&mut self, properties: ObjectProperties) -> Result<u32> {
        let reference_id = self.allocate_reference_id();
        self.objects
            .insert(WorldObject::new(reference_id, properties))?;
        Ok(reference_id)
    }

    /// Creates a world object with the given properties and a root node
    /// instancing it with the given cell transform.
    ///
    /// # Errors
    /// Returns an error if the properties describe a target, since targets
    /// are created through [`set_target_method`](Self::set_target_method).
    pub fn create_object_node(
        &mut self,
        properties: ObjectProperties,
        cell_transform: Transform<fsc>,
    ) -> Result<NodeID> {
        if properties.kind() == ObjectKind::Target {
            bail!("Target nodes can only be created by giving a node a target method");
        }
        let object_reference_id = self.insert_world_object(properties)?;
        let reference_id = self.allocate_reference_id();
        self.spawn_node(reference_id, object_reference_id, cell_transform, None)
    }

    /// Creates a root node instancing the existing world object with the
    /// given reference ID.
    ///
    /// # Errors
    /// Returns an error if the object does not exist or is a target.
    pub fn instance_world_object(
        &mut self,
        object_reference_id: u32,
        cell_transform: Transform<fsc>,
    ) -> Result<NodeID> {
        let reference_id = self.allocate_reference_id();
        self.spawn_node(reference_id, object_reference_id, cell_transform, None)
    }

    /// Creates a node with reference ID 0. Such nodes are never persisted
    /// and never assigned to a scene cell or the spatial index.
    pub fn create_transient_node(
        &mut self,
        properties: ObjectProperties,
        cell_transform: Transform<fsc>,
    ) -> Result<NodeID> {
        if properties.kind() == ObjectKind::Target {
            bail!("Target nodes can only be created by giving a node a target method");
        }
        let object_reference_id = self.insert_world_object(properties)?;
        self.spawn_node(0, object_reference_id, cell_transform, None)
    }

    /// Removes the given node and all its descendants and its target from
    /// the scene and from persistent storage.
    ///
    /// # Errors
    /// Returns an error if the node does not exist or a deletion could not be
    /// persisted. The nodes are removed from the scene regardless.
    pub fn delete_object_node(&mut self, node_id: NodeID) -> Result<()> {
        self.checked_node(node_id)?;
        self.remove_node_tree(node_id, Removal::Delete)
    }

    /// Removes the given node and all its descendants and its target from
    /// the scene, leaving persistent storage untouched.
    ///
    /// # Errors
    /// Returns an error if the node does not exist.
    pub fn unload_object_node(&mut self, node_id: NodeID) -> Result<()> {
        self.checked_node(node_id)?;
        self.remove_node_tree(node_id, Removal::Unload)
    }

    /// Schedules the given node for unloading once its other pending updates
    /// have been resolved.
    ///
    /// # Errors
    /// Returns an error if the node does not exist.
    pub fn request_unload(&mut self, node_id: NodeID) -> Result<()> {
        self.checked_node(node_id)?;
        self.node_updated(node_id, DeferredUpdates::UNLOAD, DeferredUpdates::empty());
        Ok(())
    }

    /// Attaches the given node to a new parent, or makes it a root node. The
    /// node keeps its world pose.
    ///
    /// # Errors
    /// Returns an error without changing anything if either node does not
    /// exist, or if the new parent is the node itself or one of its
    /// descendants. Returns an error if the change could not be persisted.
    pub fn set_parent(&mut self, node_id: NodeID, parent: Option<NodeID>) -> Result<()> {
        let node = self.checked_node(node_id)?;
        if let Some(parent_id) = parent {
            self.checked_node(parent_id)?;
            if parent_id == node_id || self.is_descendant_of(parent_id, node_id) {
                bail!(
                    "Tried to make node {} a child of itself or its own descendant",
                    node.reference_id
                );
            }
        }
        if node.parent == parent {
            return Ok(());
        }

        self.resolve_node_updates(node_id, DeferredUpdates::TRANSFORMS);
        if let Some(parent_id) = parent {
            self.resolve_node_updates(parent_id, DeferredUpdates::TRANSFORMS);
        }

        self.detach_from_parent(node_id);

        let parent_reference_id = match parent {
            Some(parent_id) => {
                self.attach_to_parent(node_id, parent_id);
                self.node(parent_id).reference_id
            }
            None => {
                let node = self.node_mut(node_id);
                node.local_transform = node.cell_transform;
                if let Some(key) = node.cell {
                    if let Some(cell) = self.cells.get_mut(&key) {
                        cell.add_node(node_id);
                    }
                }
                self.root_nodes.insert(node_id);
                0
            }
        };

        self.update_levels(node_id);

        if let Some(group) = self.node(node_id).owner_group {
            if !self.is_descendant_of(node_id, group) {
                self.leave_group(node_id);
            }
        }

        self.node_updated(
            node_id,
            DeferredUpdates::OWNERSHIP_STATUS,
            DeferredUpdates::empty(),
        );
        self.persist_node_field(node_id, PersistedField::Parent(parent_reference_id))
    }

    /// Makes the given group node the owner group of the given node, or
    /// removes the node from its group.
    ///
    /// # Errors
    /// Returns an error without changing anything if either node does not
    /// exist, the group is not a group node or is not an ancestor of the
    /// node. Returns an error if the change could not be persisted.
    pub fn set_owner_group(&mut self, node_id: NodeID, group: Option<NodeID>) -> Result<()> {
        let node = self.checked_node(node_id)?;
        if node.owner_group == group {
            return Ok(());
        }
        if let Some(group_id) = group {
            let group_node = self.checked_node(group_id)?;
            if group_node.variant.as_group().is_none() {
                bail!("Node {} is not a group", group_node.reference_id);
            }
            if !self.is_descendant_of(node_id, group_id) {
                bail!(
                    "Group {} is not an ancestor of node {}",
                    group_node.reference_id,
                    self.node(node_id).reference_id
                );
            }
        }

        self.leave_group(node_id);

        let group_reference_id = match group {
            Some(group_id) => {
                self.node_mut(node_id).owner_group = Some(group_id);
                if let Some(group_node) = self.node_mut(group_id).variant.as_group_mut() {
                    group_node.add_member(node_id);
                }
                self.node_updated(
                    group_id,
                    DeferredUpdates::BOUNDING_BOX,
                    DeferredUpdates::empty(),
                );
                self.node(group_id).reference_id
            }
            None => 0,
        };

        self.persist_node_field(node_id, PersistedField::OwnerGroup(group_reference_id))
    }

    /// Renames the given node. Names are unique within the scene.
    ///
    /// # Errors
    /// Returns an error without changing anything if the node does not exist
    /// or another node has the name. Returns an error if the change could
    /// not be persisted.
    pub fn set_name(&mut self, node_id: NodeID, name: Option<String>) -> Result<()> {
        self.checked_node(node_id)?;
        if let Some(name) = &name {
            if self
                .node_names
                .get(name)
                .is_some_and(|&other| other != node_id)
            {
                bail!("Name {} is already in use", name);
            }
        }

        let old_name = std::mem::replace(&mut self.node_mut(node_id).name, name.clone());
        if let Some(old_name) = old_name {
            self.node_names.remove(&old_name);
        }
        if let Some(name) = &name {
            self.node_names.insert(name.clone(), node_id);
        }

        self.persist_node_field(node_id, PersistedField::Name(name))
    }

    /// Moves the given node to the update bucket for the given rate.
    ///
    /// # Errors
    /// Returns an error if the node does not exist or the change could not be
    /// persisted.
    pub fn set_update_rate(&mut self, node_id: NodeID, rate: UpdateRate) -> Result<()> {
        let old_rate = self.checked_node(node_id)?.update_rate;
        if old_rate == rate {
            return Ok(());
        }
        self.update_buckets.change_rate(node_id, old_rate, rate);
        self.node_mut(node_id).update_rate = rate;
        self.persist_node_field(node_id, PersistedField::UpdateRate(rate))
    }

    /// # Errors
    /// Returns an error if the node does not exist.
    pub fn set_transform_method(&mut self, node_id: NodeID, method: TransformMethod) -> Result<()> {
        self.checked_node(node_id)?;
        self.node_mut(node_id).transform_method = method;
        Ok(())
    }

    /// Changes which axis of the given node is kept pointing at its target.
    /// A target node is created along that axis when the node gets its first
    /// method other than [`NodeTargetMethod::NoTarget`], and deleted when the
    /// method is reset.
    ///
    /// # Errors
    /// Returns an error without changing anything if the node does not exist
    /// or is itself a target. Returns an error if a change could not be
    /// persisted.
    pub fn set_target_method(&mut self, node_id: NodeID, method: NodeTargetMethod) -> Result<()> {
        let node = self.checked_node(node_id)?;
        if node.variant.target_owner().is_some() {
            bail!("Target node {} cannot have a target", node.reference_id);
        }
        if node.target_method == method {
            return Ok(());
        }

        let mut result = Ok(());
        match (method, node.target) {
            (NodeTargetMethod::NoTarget, Some(target)) => {
                result = self.remove_node_tree(target, Removal::Delete);
            }
            (NodeTargetMethod::NoTarget, None) | (_, Some(_)) => {}
            (_, None) => {
                self.create_target_node(node_id, method)?;
            }
        }

        self.node_mut(node_id).target_method = method;
        result.and(self.persist_node_field(node_id, PersistedField::TargetMethod(method)))
    }

    /// Binds the given physics body to the node, taking the body's current
    /// mass as the mass at unit scale.
    ///
    /// # Errors
    /// Returns an error if the node does not exist.
    pub fn attach_physics_body(&mut self, node_id: NodeID, body: Box<dyn PhysicsBody>) -> Result<()> {
        self.checked_node(node_id)?;
        let world_transform = self.world_transform(node_id);
        let node = self.node_mut(node_id);
        node.base_mass = body.mass();
        node.physics_body = Some(body);
        if let Some(body) = node.physics_body.as_mut() {
            body.set_transform(&world_transform);
        }
        Ok(())
    }

    /// Unbinds and returns the node's physics body, if any.
    pub fn detach_physics_body(&mut self, node_id: NodeID) -> Option<Box<dyn PhysicsBody>> {
        let node = self.nodes.get_mut(node_id.idx())?;
        let body = node.physics_body.take();
        for other in std::mem::take(&mut node.contacts) {
            if let Some(other_node) = self.nodes.get_mut(other.idx()) {
                other_node.contacts.retain(|&contact| contact != node_id);
            }
        }
        body
    }

    /// # Errors
    /// Returns an error if the node does not exist.
    pub fn attach_navigation_agent(
        &mut self,
        node_id: NodeID,
        mut agent: Box<dyn NavigationAgent>,
    ) -> Result<()> {
        self.checked_node(node_id)?;
        agent.set_position(&self.position(node_id));
        self.node_mut(node_id).navigation_agent = Some(agent);
        Ok(())
    }

    pub fn detach_navigation_agent(&mut self, node_id: NodeID) -> Option<Box<dyn NavigationAgent>> {
        self.nodes.get_mut(node_id.idx())?.navigation_agent.take()
    }

    /// Applies `modify` to the properties of the given world object and
    /// marks every node instancing it for bounds and ownership updates.
    ///
    /// # Errors
    /// Returns an error without changing anything if the object does not
    /// exist or `modify` changes its kind.
    pub fn modify_world_object(
        &mut self,
        object_reference_id: u32,
        modify: impl FnOnce(&mut ObjectProperties),
    ) -> Result<()> {
        let object = self
            .objects
            .get_mut(object_reference_id)
            .ok_or_else(|| anyhow!("No world object with reference ID {}", object_reference_id))?;

        let mut properties = object.properties().clone();
        modify(&mut properties);
        if properties.kind() != object.kind() {
            bail!(
                "Tried to change world object {} from {:?} to {:?}",
                object_reference_id,
                object.kind(),
                properties.kind()
            );
        }
        *object.properties_mut() = properties.clone();

        let instancing_nodes: Vec<NodeID> = self
            .nodes
            .iter()
            .filter(|(_, node)| node.object_reference_id == object_reference_id)
            .map(|(idx, _)| NodeID::from_idx(idx))
            .collect();

        for node_id in instancing_nodes {
            match (&mut self.node_mut(node_id).variant, &properties) {
                (NodeVariant::PointLight(light), ObjectProperties::PointLight(light_properties)) => {
                    light.set_properties(light_properties.clone());
                }
                (NodeVariant::Actor(actor), ObjectProperties::Actor { motion, .. }) => {
                    actor.set_motion(*motion);
                }
                _ => {}
            }
            self.node_updated(
                node_id,
                DeferredUpdates::BOUNDING_BOX | DeferredUpdates::OWNERSHIP_STATUS,
                DeferredUpdates::empty(),
            );
        }
        Ok(())
    }

    /// Returns the world transform of the given node, resolving any pending
    /// transform updates of the node and its ancestors first.
    ///
    /// # Panics
    /// If no node with the given ID exists.
    pub fn world_transform(&mut self, node_id: NodeID) -> Transform<fsc> {
        self.resolve_node_updates(node_id, DeferredUpdates::TRANSFORMS);
        self.node(node_id).cached_world_transform()
    }

    /// Returns the world position of the given node's object origin.
    ///
    /// # Panics
    /// If no node with the given ID exists.
    pub fn position(&mut self, node_id: NodeID) -> Point3<fsc> {
        self.world_transform(node_id).position()
    }

    /// Returns the world bounding box of the given node, resolving pending
    /// updates it depends on first.
    ///
    /// # Panics
    /// If no node with the given ID exists.
    pub fn bounding_box(&mut self, node_id: NodeID) -> AxisAlignedBox<fsc> {
        self.resolve_node_updates(node_id, DeferredUpdates::BOUNDING_BOX);
        *self.node(node_id).cached_world_bounds()
    }

    /// Returns the IDs of all point light nodes.
    pub fn point_lights(&self) -> Vec<NodeID> {
        self.nodes
            .iter()
            .filter(|(_, node)| node.variant.as_point_light().is_some())
            .map(|(idx, _)| NodeID::from_idx(idx))
            .collect()
    }

    pub fn point_light(&self, node_id: NodeID) -> Option<&PointLightNode> {
        self.get_node(node_id)?.variant.as_point_light()
    }

    pub fn point_light_mut(&mut self, node_id: NodeID) -> Option<&mut PointLightNode> {
        self.nodes.get_mut(node_id.idx())?.variant.as_point_light_mut()
    }

    /// Gathers the nodes visible from each cube face of the given point
    /// light, after moving the light to its resolved position.
    ///
    /// # Returns
    /// Whether the light has any shadow casters, or `false` if the node is
    /// not a point light.
    pub fn compute_light_shadow_sets(&mut self, node_id: NodeID) -> bool {
        if !self.has_node(node_id) {
            return false;
        }
        self.resolve_node_updates(node_id, DeferredUpdates::TRANSFORMS);

        let Self {
            nodes,
            spatial_index,
            ..
        } = self;
        nodes
            .get_mut(node_id.idx())
            .and_then(|node| node.variant.as_point_light_mut())
            .is_some_and(|light| light.compute_shadow_sets(spatial_index.as_ref()))
    }

    /// Selects the shadow map resolution of the given point light for this
    /// frame.
    pub fn compute_light_level_of_detail(&mut self, node_id: NodeID) -> Option<u32> {
        let Self {
            nodes,
            lighting_config,
            ..
        } = self;
        nodes
            .get_mut(node_id.idx())?
            .variant
            .as_point_light_mut()?
            .compute_level_of_detail(lighting_config)
    }

    /// Advances the scene to the given time: steps physics and applies its
    /// events, then updates every node whose update bucket is due.
    ///
    /// # Errors
    /// Returns the first persistence error encountered. Every due node is
    /// updated regardless.
    pub fn update(&mut self, current_time: fsc) -> Result<()> {
        let max_time_delta = self.config.max_update_delta;
        let time_delta = self
            .last_update_time
            .map_or(0.0, |last| (current_time - last).clamp(0.0, max_time_delta));
        self.last_update_time = Some(current_time);

        let mut result = Ok(());

        let events = self
            .physics
            .as_mut()
            .map(|physics| physics.step(time_delta))
            .unwrap_or_default();
        for event in events {
            result = result.and(self.apply_physics_event(event));
        }

        for (node_id, node_time_delta) in self
            .update_buckets
            .collect_due(current_time, max_time_delta)
        {
            result = result.and(self.update_node(node_id, node_time_delta));
        }

        result
    }

    pub(crate) fn allocate_reference_id(&mut self) -> u32 {
        let reference_id = self.next_reference_id;
        self.next_reference_id += 1;
        reference_id
    }

    /// Makes sure the given reference ID is never handed out by
    /// [`allocate_reference_id`](Self::allocate_reference_id).
    pub(crate) fn reserve_reference_id(&mut self, reference_id: u32) {
        self.next_reference_id = self.next_reference_id.max(reference_id.saturating_add(1));
    }

    pub(crate) fn cell_origin(&self, cell: Option<CellKey>) -> Vector3<fsc> {
        cell.map_or_else(Vector3::zeros, |key| key.world_origin(&self.cell_size))
    }

    pub(crate) fn spawn_node(
        &mut self,
        reference_id: u32,
        object_reference_id: u32,
        cell_transform: Transform<fsc>,
        target_owner: Option<NodeID>,
    ) -> Result<NodeID> {
        let object = self
            .objects
            .get(object_reference_id)
            .ok_or_else(|| anyhow!("No world object with reference ID {}", object_reference_id))?;

        let variant = match object.properties() {
            ObjectProperties::Group => NodeVariant::Group(GroupNode::new()),
            ObjectProperties::Mesh { .. } => NodeVariant::Mesh,
            ObjectProperties::PointLight(properties) => NodeVariant::PointLight(Box::new(
                self.create_point_light(reference_id, properties.clone()),
            )),
            ObjectProperties::Actor { motion, .. } => NodeVariant::Actor(ActorNode::new(*motion)),
            ObjectProperties::Target => match target_owner {
                Some(owner) => NodeVariant::Target(TargetNode::new(owner)),
                None => bail!("Target object {} has no owner node", object_reference_id),
            },
            ObjectProperties::Dummy => NodeVariant::Dummy,
        };
        let kind = variant.kind();

        self.objects.add_reference(object_reference_id)?;

        let node_id = NodeID::from_idx(self.nodes.insert(ObjectNode::new(
            reference_id,
            object_reference_id,
            variant,
            cell_transform,
        )));
        if reference_id != 0 {
            self.nodes_by_reference.insert(reference_id, node_id);
        }
        self.root_nodes.insert(node_id);

        let node = self.node_mut(node_id);
        let world_transform = node.cached_world_transform();
        node.variant.world_transform_changed(&world_transform);

        self.node_updated(
            node_id,
            DeferredUpdates::BOUNDING_BOX | DeferredUpdates::OWNERSHIP_STATUS,
            DeferredUpdates::empty(),
        );

        log::debug!("Created {:?} node {}", kind, reference_id);
        Ok(node_id)
    }

    fn create_point_light(
        &self,
        reference_id: u32,
        mut properties: PointLightProperties,
    ) -> PointLightNode {
        if self.lighting_config.shadow_map_edge_process == EdgeProcess::NoProcessing {
            properties.edge_process = EdgeProcess::NoProcessing;
        }
        let resolution = 1_u32 << self.lighting_config.max_shadow_resolution_log2.min(31);
        let mut light = PointLightNode::new(reference_id, properties, resolution);
        light.stagger_shadow_updates(&mut rand::rng());
        light
    }

    fn create_target_node(&mut self, owner: NodeID, method: NodeTargetMethod) -> Result<NodeID> {
        let owner_transform = self.world_transform(owner);
        let owner_bounds = self
            .objects
            .get(self.node(owner).object_reference_id)
            .map(WorldObject::local_bounding_box);
        let reach = owner_bounds.map_or(1.0, |bounds| bounds.half_extents().max().max(0.5));

        let axis = match method {
            NodeTargetMethod::XAxis => owner_transform.x_axis(),
            NodeTargetMethod::YAxis => owner_transform.y_axis(),
            _ => owner_transform.z_axis(),
        };
        let direction = axis
            .try_normalize(fsc::EPSILON)
            .unwrap_or_else(Vector3::z);
        let target_position =
            owner_transform.position() + direction * reach * TARGET_PLACEMENT_DISTANCE;

        let object_reference_id = self.insert_world_object(ObjectProperties::Target)?;
        let reference_id = self.allocate_reference_id();
        let target = self.spawn_node(
            reference_id,
            object_reference_id,
            Transform::from_translation(&target_position.coords),
            Some(owner),
        )?;
        self.node_mut(owner).target = Some(target);
        Ok(target)
    }

    /// Whether `node_id` lies in the subtree below `ancestor`.
    pub(crate) fn is_descendant_of(&self, node_id: NodeID, ancestor: NodeID) -> bool {
        let mut current = self.get_node(node_id).and_then(|node| node.parent);
        while let Some(parent) = current {
            if parent == ancestor {
                return true;
            }
            current = self.get_node(parent).and_then(|node| node.parent);
        }
        false
    }

    fn detach_from_parent(&mut self, node_id: NodeID) {
        let node = self.node(node_id);
        match node.parent {
            Some(parent) => {
                self.node_mut(parent)
                    .children
                    .retain(|&child| child != node_id);
            }
            None => {
                let old_cell = node.cell;
                if let Some(cell) = old_cell.and_then(|key| self.cells.get_mut(&key)) {
                    cell.remove_node(node_id);
                }
                self.root_nodes.remove(&node_id);
                if let Some(key) = old_cell {
                    self.remove_cell_if_unused(key);
                }
            }
        }
        self.node_mut(node_id).parent = None;
    }

    fn attach_to_parent(&mut self, node_id: NodeID, parent_id: NodeID) {
        self.node_mut(parent_id).children.push(node_id);
        self.node_mut(node_id).parent = Some(parent_id);

        let parent_cell = self.node(parent_id).cell;
        self.set_cell(node_id, parent_cell);

        let parent_transform = self.node(parent_id).cell_transform;
        let node = self.node_mut(node_id);
        node.local_transform = parent_transform.inverse() * node.cell_transform;
    }

    pub(crate) fn update_levels(&mut self, node_id: NodeID) {
        let mut stack = vec![node_id];
        while let Some(id) = stack.pop() {
            let level = self
                .node(id)
                .parent
                .map_or(0, |parent| self.node(parent).level + 1);
            let node = self.node_mut(id);
            node.level = level;
            stack.extend(node.children.iter().copied());
        }
    }

    fn leave_group(&mut self, node_id: NodeID) {
        let Some(group_id) = self.node_mut(node_id).owner_group.take() else {
            return;
        };
        if let Some(group) = self
            .nodes
            .get_mut(group_id.idx())
            .and_then(|node| node.variant.as_group_mut())
        {
            group.remove_member(node_id);
        }
        self.node_updated(
            group_id,
            DeferredUpdates::BOUNDING_BOX,
            DeferredUpdates::empty(),
        );
    }

    fn update_node(&mut self, node_id: NodeID, time_delta: fsc) -> Result<()> {
        let Some(node) = self.nodes.get_mut(node_id.idx()) else {
            return Ok(());
        };
        let cell_transform = node.cell_transform;
        match node.variant.update(time_delta, &cell_transform) {
            Some(new_cell_transform) => self.set_cell_transform(node_id, new_cell_transform),
            None => Ok(()),
        }
    }

    fn apply_physics_event(&mut self, event: PhysicsEvent) -> Result<()> {
        match event {
            PhysicsEvent::BodyTransformed { node, transform } => {
                let Some(body_node) = self.get_node(node) else {
                    log::warn!("Physics event for missing node {:?}", node);
                    return Ok(());
                };
                let origin = self.cell_origin(body_node.cell);
                let cell_transform =
                    (transform * body_node.offset_transform.inverse()).translated(&-origin);
                self.set_cell_transform_from(node, cell_transform, TransformSource::Dynamics)
            }
            PhysicsEvent::CollisionBegin { node, other } => {
                for (id, contact) in [(node, other), (other, node)] {
                    if let Some(node) = self.nodes.get_mut(id.idx()) {
                        if !node.contacts.contains(&contact) {
                            node.contacts.push(contact);
                        }
                    }
                }
                Ok(())
            }
            PhysicsEvent::CollisionContinue { node, other } => {
                log::trace!("Contact between {:?} and {:?} persists", node, other);
                Ok(())
            }
            PhysicsEvent::CollisionEnd { node, other } => {
                for (id, contact) in [(node, other), (other, node)] {
                    if let Some(node) = self.nodes.get_mut(id.idx()) {
                        node.contacts.retain(|&existing| existing != contact);
                    }
                }
                Ok(())
            }
            PhysicsEvent::AgentReposition { node, position } => {
                let Some(agent_node) = self.get_node(node) else {
                    log::warn!("Navigation event for missing node {:?}", node);
                    return Ok(());
                };
                let origin = self.cell_origin(agent_node.cell);
                let mut cell_transform = agent_node.cell_transform;
                cell_transform.set_position(&(position - origin));
                self.set_cell_transform_from(node, cell_transform, TransformSource::Navigation)
            }
        }
    }

    pub(crate) fn remove_node_tree(&mut self, node_id: NodeID, removal: Removal) -> Result<()> {
        let Some(node) = self.get_node(node_id) else {
            return Ok(());
        };
        let children = node.children.clone();
        let target = node.target;

        let mut result = Ok(());
        for child in children {
            result = result.and(self.remove_node_tree(child, removal));
        }
        if let Some(target) = target {
            result = result.and(self.remove_node_tree(target, removal));
        }
        result.and(self.remove_single_node(node_id, removal))
    }

    fn remove_single_node(&mut self, node_id: NodeID, removal: Removal) -> Result<()> {
        let persisted = match removal {
            Removal::Delete => self.persist_node_field(node_id, PersistedField::Deleted),
            Removal::Unload => Ok(()),
        };

        let Some(mut node) = self.nodes.remove(node_id.idx()) else {
            return persisted;
        };

        if let Some(parent) = node.parent {
            if let Some(parent_node) = self.nodes.get_mut(parent.idx()) {
                parent_node.children.retain(|&child| child != node_id);
            }
        } else {
            self.root_nodes.remove(&node_id);
            if let Some(key) = node.cell {
                if let Some(cell) = self.cells.get_mut(&key) {
                    cell.remove_node(node_id);
                }
                self.remove_cell_if_unused(key);
            }
        }

        if let Some(owner) = node.variant.target_owner() {
            if let Some(owner_node) = self.nodes.get_mut(owner.idx()) {
                owner_node.target = None;
                owner_node.target_method = NodeTargetMethod::NoTarget;
            }
        }

        if let Some(group_id) = node.owner_group {
            if let Some(group) = self
                .nodes
                .get_mut(group_id.idx())
                .and_then(|group_node| group_node.variant.as_group_mut())
            {
                group.remove_member(node_id);
            }
            self.node_updated(
                group_id,
                DeferredUpdates::BOUNDING_BOX,
                DeferredUpdates::empty(),
            );
        }
        if let Some(group) = node.variant.as_group() {
            for member in group.members() {
                if let Some(member_node) = self.nodes.get_mut(member.idx()) {
                    member_node.owner_group = None;
                }
            }
        }

        if let Some(handle) = node.spatial_handle {
            self.spatial_index.remove(handle);
        }
        self.orphans.remove(&node_id);
        self.evicted_unloads.remove(&node_id);
        self.update_buckets.remove(node_id, node.update_rate);

        if let Some(name) = &node.name {
            if self.node_names.get(name) == Some(&node_id) {
                self.node_names.remove(name);
            }
        }
        if let Some(slot) = node.queue_slot {
            self.pending_updates.clear_slot(slot);
        }
        for other in node.contacts.drain(..) {
            if let Some(other_node) = self.nodes.get_mut(other.idx()) {
                other_node.contacts.retain(|&contact| contact != node_id);
            }
        }
        node.physics_body = None;
        node.navigation_agent = None;

        if node.reference_id != 0 {
            self.nodes_by_reference.remove(&node.reference_id);
        }
        if self
            .objects
            .release_reference(node.object_reference_id)
            .is_some()
        {
            log::debug!(
                "Dropped world object {} with its last node",
                node.object_reference_id
            );
        }

        log::debug!(
            "Removed {:?} node {} ({:?})",
            node.variant.kind(),
            node.reference_id,
            removal
        );
        persisted
    }

    pub(crate) fn should_serialize(&self, node: &ObjectNode) -> bool {
        self.config.writing_enabled && !self.loading && node.reference_id != 0
    }

    /// Writes the given field of the given node to persistent storage if the
    /// scene is being authored.
    ///
    /// # Errors
    /// Returns an error if the write fails. The failure is also logged.
    pub(crate) fn persist_node_field(&mut self, node_id: NodeID, field: PersistedField) -> Result<()> {
        let Some(node) = self.get_node(node_id) else {
            return Ok(());
        };
        if !self.should_serialize(node) {
            return Ok(());
        }
        let reference_id = node.reference_id;
        self.persistence
            .persist(reference_id, &field)
            .map_err(|error| {
                log::error!(
                    "Failed to persist {} of node {}: {:#}",
                    field.label(),
                    reference_id,
                    error
                );
                error.context(format!(
                    "Failed to persist {} of node {}",
                    field.label(),
                    reference_id
                ))
            })
    }

    /// Like [`persist_node_field`](Self::persist_node_field), for writes
    /// issued during deferred resolution where the failure is only logged.
    pub(crate) fn persist_or_log(&mut self, node_id: NodeID, field: PersistedField) {
        if self.persist_node_field(node_id, field).is_err() {
            log::debug!("Continuing after failed write for node {:?}", node_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::{BodyModel, Motion};
    use approx::assert_abs_diff_eq;
    use nalgebra::{point, vector};
    use std::{cell::RefCell, rc::Rc};

    #[derive(Debug, Default)]
    pub(crate) struct RecordingPersistence {
        pub(crate) writes: Rc<RefCell<Vec<(u32, PersistedField)>>>,
        pub(crate) fail: bool,
    }

    impl ScenePersistence for RecordingPersistence {
        fn persist(&mut self, reference_id: u32, field: &PersistedField) -> Result<()> {
            if self.fail {
                bail!("Storage is read-only");
            }
            self.writes.borrow_mut().push((reference_id, field.clone()));
            Ok(())
        }
    }

    #[derive(Debug)]
    struct FakeBody {
        model: BodyModel,
        mass: fsc,
        transform: Rc<RefCell<Option<Transform<fsc>>>>,
    }

    impl PhysicsBody for FakeBody {
        fn model(&self) -> BodyModel {
            self.model
        }

        fn set_transform(&mut self, transform: &Transform<fsc>) {
            *self.transform.borrow_mut() = Some(*transform);
        }

        fn mass(&self) -> fsc {
            self.mass
        }

        fn set_mass(&mut self, mass: fsc) {
            self.mass = mass;
        }

        fn mass_transform_amount(&self) -> fsc {
            1.0
        }
    }

    #[derive(Debug)]
    struct ScriptedPhysics {
        events: Vec<PhysicsEvent>,
    }

    impl PhysicsWorld for ScriptedPhysics {
        fn step(&mut self, _time_delta: fsc) -> Vec<PhysicsEvent> {
            std::mem::take(&mut self.events)
        }
    }

    fn authoring_config() -> SceneConfig {
        SceneConfig {
            writing_enabled: true,
            ..SceneConfig::default()
        }
    }

    fn scene() -> Scene {
        Scene::new(authoring_config(), LightingConfig::default())
    }

    fn mesh() -> ObjectProperties {
        ObjectProperties::Mesh {
            bounds: AxisAlignedBox::new(point![-1.0, -1.0, -1.0], point![1.0, 1.0, 1.0]),
        }
    }

    fn at(x: fsc, y: fsc, z: fsc) -> Transform<fsc> {
        Transform::from_translation(&vector![x, y, z])
    }

    #[test]
    fn created_node_is_root_with_fresh_reference_id() {
        let mut scene = scene();
        let a = scene.create_object_node(mesh(), at(0.0, 0.0, 0.0)).unwrap();
        let b = scene.create_object_node(mesh(), at(1.0, 0.0, 0.0)).unwrap();

        assert_ne!(scene.node(a).reference_id(), scene.node(b).reference_id());
        assert_eq!(scene.node_by_reference(scene.node(b).reference_id()), Some(b));
        assert_eq!(scene.root_nodes().count(), 2);
        assert!(scene.node(a).is_queued());
    }

    #[test]
    fn creating_target_directly_fails() {
        let mut scene = scene();
        assert!(
            scene
                .create_object_node(ObjectProperties::Target, Transform::identity())
                .is_err()
        );
    }

    #[test]
    fn reparenting_keeps_world_pose_and_updates_level() {
        let mut scene = scene();
        let parent = scene.create_object_node(mesh(), at(1.0, 0.0, 0.0)).unwrap();
        let child = scene.create_object_node(mesh(), at(0.0, 3.0, 0.0)).unwrap();

        scene.set_parent(child, Some(parent)).unwrap();

        assert_eq!(scene.node(child).parent(), Some(parent));
        assert_eq!(scene.node(parent).children(), &[child]);
        assert_eq!(scene.node(child).level(), 1);
        assert!(!scene.root_nodes().any(|id| id == child));
        assert_abs_diff_eq!(scene.position(child), point![0.0, 3.0, 0.0], epsilon = 1e-12);
        assert_abs_diff_eq!(
            scene.node(child).local_transform().position(),
            point![-1.0, 3.0, 0.0],
            epsilon = 1e-12
        );

        scene.set_parent(child, None).unwrap();
        assert_eq!(scene.node(child).level(), 0);
        assert!(scene.root_nodes().any(|id| id == child));
        assert_abs_diff_eq!(scene.position(child), point![0.0, 3.0, 0.0], epsilon = 1e-12);
    }

    #[test]
    fn reparenting_root_removes_its_emptied_cell() {
        let mut scene = scene();
        let parent = scene.create_object_node(mesh(), at(0.0, 0.0, 0.0)).unwrap();
        let child = scene.create_object_node(mesh(), at(250.0, 0.0, 0.0)).unwrap();
        scene.resolve_pending_updates();

        let far_cell = CellKey::new(3, 0, 0);
        assert_eq!(scene.node(child).cell(), Some(far_cell));
        assert_eq!(scene.n_cells(), 2);

        scene.set_parent(child, Some(parent)).unwrap();
        scene.resolve_pending_updates();

        assert_eq!(scene.n_cells(), 1);
        assert!(scene.cell(far_cell).is_none());
        assert_eq!(scene.node(child).cell(), scene.node(parent).cell());
        assert_abs_diff_eq!(scene.position(child), point![250.0, 0.0, 0.0], epsilon = 1e-9);
    }

    #[test]
    fn parenting_to_descendant_is_rejected_without_change() {
        let mut scene = scene();
        let root = scene.create_object_node(mesh(), at(0.0, 0.0, 0.0)).unwrap();
        let child = scene.create_object_node(mesh(), at(0.0, 0.0, 0.0)).unwrap();
        let grandchild = scene.create_object_node(mesh(), at(0.0, 0.0, 0.0)).unwrap();
        scene.set_parent(child, Some(root)).unwrap();
        scene.set_parent(grandchild, Some(child)).unwrap();

        assert!(scene.set_parent(root, Some(grandchild)).is_err());
        assert!(scene.set_parent(root, Some(root)).is_err());
        assert_eq!(scene.node(root).parent(), None);
        assert_eq!(scene.node(grandchild).children(), &[] as &[NodeID]);
    }

    #[test]
    fn group_membership_requires_group_ancestor() {
        let mut scene = scene();
        let group = scene
            .create_object_node(ObjectProperties::Group, at(0.0, 0.0, 0.0))
            .unwrap();
        let member = scene.create_object_node(mesh(), at(4.0, 0.0, 0.0)).unwrap();
        let not_group = scene.create_object_node(mesh(), at(0.0, 0.0, 0.0)).unwrap();

        assert!(scene.set_owner_group(member, Some(group)).is_err());
        scene.set_parent(member, Some(group)).unwrap();
        assert!(scene.set_owner_group(member, Some(not_group)).is_err());
        scene.set_owner_group(member, Some(group)).unwrap();

        assert_eq!(scene.node(member).owner_group(), Some(group));
        assert!(scene.node(group).variant().as_group().unwrap().contains(member));

        scene.set_parent(member, None).unwrap();
        assert_eq!(scene.node(member).owner_group(), None);
    }

    #[test]
    fn group_bounds_enclose_members() {
        let mut scene = scene();
        let group = scene
            .create_object_node(ObjectProperties::Group, at(0.0, 0.0, 0.0))
            .unwrap();
        let a = scene.create_object_node(mesh(), at(4.0, 0.0, 0.0)).unwrap();
        let b = scene.create_object_node(mesh(), at(-4.0, 2.0, 0.0)).unwrap();
        for member in [a, b] {
            scene.set_parent(member, Some(group)).unwrap();
            scene.set_owner_group(member, Some(group)).unwrap();
        }
        scene.resolve_pending_updates();

        let bounds = scene.bounding_box(group);
        assert_abs_diff_eq!(bounds.lower_corner(), &point![-5.0, -1.0, -1.0], epsilon = 1e-12);
        assert_abs_diff_eq!(bounds.upper_corner(), &point![5.0, 3.0, 1.0], epsilon = 1e-12);

        scene.set_cell_transform(a, at(8.0, 0.0, 0.0)).unwrap();
        assert!(
            scene
                .node(group)
                .pending_updates()
                .contains(DeferredUpdates::BOUNDING_BOX)
        );
        assert_abs_diff_eq!(scene.bounding_box(group).upper_corner().x, 9.0, epsilon = 1e-12);
    }

    #[test]
    fn names_are_unique() {
        let mut scene = scene();
        let a = scene.create_object_node(mesh(), at(0.0, 0.0, 0.0)).unwrap();
        let b = scene.create_object_node(mesh(), at(0.0, 0.0, 0.0)).unwrap();

        scene.set_name(a, Some("crate".to_string())).unwrap();
        assert!(scene.set_name(b, Some("crate".to_string())).is_err());
        assert_eq!(scene.node_by_name("crate"), Some(a));

        scene.set_name(a, Some("barrel".to_string())).unwrap();
        assert_eq!(scene.node_by_name("crate"), None);
        scene.set_name(b, Some("crate".to_string())).unwrap();
        assert_eq!(scene.node_by_name("crate"), Some(b));
    }

    #[test]
    fn mutations_are_written_through_when_authoring() {
        let writes = Rc::new(RefCell::new(Vec::new()));
        let mut scene = scene().with_persistence(Box::new(RecordingPersistence {
            writes: writes.clone(),
            fail: false,
        }));
        let node = scene.create_object_node(mesh(), at(0.0, 0.0, 0.0)).unwrap();
        let reference_id = scene.node(node).reference_id();

        scene.set_name(node, Some("lamp".to_string())).unwrap();
        scene.set_update_rate(node, UpdateRate::Fps30).unwrap();

        assert_eq!(
            &*writes.borrow(),
            &[
                (reference_id, PersistedField::Name(Some("lamp".to_string()))),
                (reference_id, PersistedField::UpdateRate(UpdateRate::Fps30)),
            ]
        );
    }

    #[test]
    fn nothing_is_written_at_runtime() {
        let writes = Rc::new(RefCell::new(Vec::new()));
        let mut scene = Scene::new(SceneConfig::default(), LightingConfig::default())
            .with_persistence(Box::new(RecordingPersistence {
                writes: writes.clone(),
                fail: false,
            }));
        let node = scene.create_object_node(mesh(), at(0.0, 0.0, 0.0)).unwrap();
        scene.set_name(node, Some("lamp".to_string())).unwrap();
        assert!(writes.borrow().is_empty());
    }

    #[test]
    fn failed_write_keeps_in_memory_change() {
        let mut scene = scene().with_persistence(Box::new(RecordingPersistence {
            writes: Rc::default(),
            fail: true,
        }));
        let node = scene.create_object_node(mesh(), at(0.0, 0.0, 0.0)).unwrap();

        assert!(scene.set_name(node, Some("lamp".to_string())).is_err());
        assert_eq!(scene.node(node).name(), Some("lamp"));
        assert!(scene.set_cell_transform(node, at(2.0, 0.0, 0.0)).is_err());
        assert_abs_diff_eq!(scene.position(node), point![2.0, 0.0, 0.0], epsilon = 1e-12);
    }

    #[test]
    fn deleting_node_removes_subtree_and_all_registrations() {
        let mut scene = scene();
        let root = scene.create_object_node(mesh(), at(0.0, 0.0, 0.0)).unwrap();
        let child = scene.create_object_node(mesh(), at(1.0, 0.0, 0.0)).unwrap();
        scene.set_parent(child, Some(root)).unwrap();
        scene.set_name(child, Some("child".to_string())).unwrap();
        scene.set_update_rate(child, UpdateRate::Always).unwrap();
        scene.resolve_pending_updates();
        let key = scene.node(root).cell().unwrap();
        let child_object = scene.node(child).object_reference_id();

        scene.delete_object_node(root).unwrap();

        assert!(!scene.has_node(root));
        assert!(!scene.has_node(child));
        assert_eq!(scene.n_nodes(), 0);
        assert_eq!(scene.node_by_name("child"), None);
        assert!(scene.cell(key).is_none());
        assert!(!scene.objects().contains(child_object));
        assert_eq!(scene.update_buckets.n_buckets_containing(child), 0);
        assert_eq!(scene.n_pending_updates(), 0);
    }

    #[test]
    fn deletion_is_persisted() {
        let writes = Rc::new(RefCell::new(Vec::new()));
        let mut scene = scene().with_persistence(Box::new(RecordingPersistence {
            writes: writes.clone(),
            fail: false,
        }));
        let node = scene.create_object_node(mesh(), at(0.0, 0.0, 0.0)).unwrap();
        let reference_id = scene.node(node).reference_id();
        writes.borrow_mut().clear();

        scene.delete_object_node(node).unwrap();
        assert_eq!(&*writes.borrow(), &[(reference_id, PersistedField::Deleted)]);
    }

    #[test]
    fn deferred_unload_happens_on_drain() {
        let mut scene = scene();
        let node = scene.create_object_node(mesh(), at(0.0, 0.0, 0.0)).unwrap();
        scene.request_unload(node).unwrap();

        assert!(scene.has_node(node));
        scene.world_transform(node);
        assert!(scene.has_node(node));

        scene.resolve_pending_updates();
        assert!(!scene.has_node(node));
    }

    #[test]
    fn shared_object_outlives_first_instance() {
        let mut scene = scene();
        let object = scene.insert_world_object(mesh()).unwrap();
        let a = scene.instance_world_object(object, at(0.0, 0.0, 0.0)).unwrap();
        let b = scene.instance_world_object(object, at(5.0, 0.0, 0.0)).unwrap();
        assert_eq!(scene.objects().n_references(object), 2);

        scene.unload_object_node(a).unwrap();
        assert!(scene.objects().contains(object));
        scene.unload_object_node(b).unwrap();
        assert!(!scene.objects().contains(object));
    }

    #[test]
    fn modifying_object_marks_instances() {
        let mut scene = scene();
        let object = scene.insert_world_object(mesh()).unwrap();
        let node = scene.instance_world_object(object, at(0.0, 0.0, 0.0)).unwrap();
        scene.resolve_pending_updates();

        scene
            .modify_world_object(object, |properties| {
                *properties = ObjectProperties::Mesh {
                    bounds: AxisAlignedBox::new(point![0.0, 0.0, 0.0], point![3.0, 3.0, 3.0]),
                };
            })
            .unwrap();
        assert!(
            scene
                .node(node)
                .pending_updates()
                .contains(DeferredUpdates::BOUNDING_BOX)
        );
        assert_abs_diff_eq!(scene.bounding_box(node).upper_corner().x, 3.0);

        assert!(
            scene
                .modify_world_object(object, |properties| *properties = ObjectProperties::Dummy)
                .is_err()
        );
    }

    #[test]
    fn target_is_created_along_axis_and_removed_with_method() {
        let mut scene = scene();
        let node = scene.create_object_node(mesh(), at(0.0, 0.0, 0.0)).unwrap();

        scene.set_target_method(node, NodeTargetMethod::XAxis).unwrap();
        let target = scene.node(node).target().unwrap();
        assert_eq!(scene.node(target).variant().target_owner(), Some(node));
        assert_abs_diff_eq!(scene.position(target), point![2.0, 0.0, 0.0], epsilon = 1e-12);

        scene.set_target_method(node, NodeTargetMethod::NoTarget).unwrap();
        assert!(!scene.has_node(target));
        assert_eq!(scene.node(node).target(), None);
    }

    #[test]
    fn moving_target_turns_owner_axis_towards_it() {
        let mut scene = scene();
        let node = scene
            .create_object_node(mesh(), Transform::from_scaling(&vector![2.0, 2.0, 2.0]))
            .unwrap();
        scene.set_target_method(node, NodeTargetMethod::XAxis).unwrap();
        let target = scene.node(node).target().unwrap();

        scene.set_cell_transform(target, at(0.0, 0.0, 5.0)).unwrap();

        let transform = scene.world_transform(node);
        assert_abs_diff_eq!(transform.x_axis(), vector![0.0, 0.0, 2.0], epsilon = 1e-9);
        assert_abs_diff_eq!(transform.local_scale(), vector![2.0, 2.0, 2.0], epsilon = 1e-9);
    }

    #[test]
    fn actor_moves_on_update() {
        let mut scene = scene();
        let actor = scene
            .create_object_node(
                ObjectProperties::Actor {
                    bounds: AxisAlignedBox::new(point![0.0, 0.0, 0.0], point![0.0, 0.0, 0.0]),
                    motion: Motion {
                        velocity: vector![1.0, 0.0, 0.0],
                        angular_velocity: Vector3::zeros(),
                    },
                },
                at(0.0, 0.0, 0.0),
            )
            .unwrap();
        scene.set_update_rate(actor, UpdateRate::Always).unwrap();

        scene.update(0.0).unwrap();
        scene.update(0.5).unwrap();
        assert_abs_diff_eq!(scene.position(actor), point![0.5, 0.0, 0.0], epsilon = 1e-12);
    }

    #[test]
    fn physics_events_move_nodes_and_track_contacts() {
        let mut scene = scene();
        let a = scene.create_object_node(mesh(), at(0.0, 0.0, 0.0)).unwrap();
        let b = scene.create_object_node(mesh(), at(1.0, 0.0, 0.0)).unwrap();
        let mut scene = scene.with_physics(Box::new(ScriptedPhysics {
            events: vec![
                PhysicsEvent::BodyTransformed {
                    node: a,
                    transform: at(0.0, -1.0, 0.0),
                },
                PhysicsEvent::CollisionBegin { node: a, other: b },
            ],
        }));

        scene.update(0.0).unwrap();
        assert_abs_diff_eq!(scene.position(a), point![0.0, -1.0, 0.0], epsilon = 1e-12);
        assert_eq!(scene.node(a).contacts(), &[b]);
        assert_eq!(scene.node(b).contacts(), &[a]);
    }

    #[test]
    fn dynamic_body_mass_follows_scale() {
        let mut scene = scene();
        let node = scene.create_object_node(mesh(), at(0.0, 0.0, 0.0)).unwrap();
        let transform = Rc::new(RefCell::new(None));
        scene
            .attach_physics_body(
                node,
                Box::new(FakeBody {
                    model: BodyModel::RigidDynamic,
                    mass: 3.0,
                    transform: transform.clone(),
                }),
            )
            .unwrap();

        scene
            .set_cell_transform(node, Transform::from_scaling(&vector![2.0, 1.0, 1.0]))
            .unwrap();
        assert_abs_diff_eq!(scene.node(node).physics_body().unwrap().mass(), 6.0);
        assert_abs_diff_eq!(
            transform.borrow().unwrap().local_scale(),
            vector![2.0, 1.0, 1.0]
        );
    }

    #[test]
    fn light_node_tracks_position_and_ignores_rotation() {
        let mut scene = scene();
        let light = scene
            .create_object_node(
                ObjectProperties::PointLight(PointLightProperties::default()),
                at(0.0, 0.0, 0.0),
            )
            .unwrap();

        let rotated_and_moved = Transform::from_rotation_and_translation(
            &nalgebra::UnitQuaternion::from_euler_angles(0.3, 0.2, 0.1),
            &vector![1.0, 2.0, 3.0],
        );
        scene.set_cell_transform(light, rotated_and_moved).unwrap();

        let transform = scene.world_transform(light);
        assert_abs_diff_eq!(transform.linear_part(), nalgebra::Matrix3::identity());
        assert_eq!(
            scene.point_light(light).unwrap().position(),
            point![1.0, 2.0, 3.0]
        );
        assert_eq!(scene.point_lights(), vec![light]);
    }
}
