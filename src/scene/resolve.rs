//! Deferred resolution of stale node state.
//!
//! Mutating a node flags the derived state that went stale with
//! [`DeferredUpdates`] bits and places the node in the scene's FIFO of
//! pending updates. Resolution recomputes the flagged state, resolving
//! transforms from the root down so that every node sees its parent's
//! resolved cell transform.

use crate::{
    fsc,
    geometry::{AxisAlignedBox, Transform, TransformComponents},
    scene::{
        BodyModel, CellKey, DeferredUpdates, NodeBehavior, NodeID, NodeTargetMethod, NodeVariant,
        PersistedField, Scene, SceneCell, TransformMethod, TransformSource, scaled_mass,
    },
};
use anyhow::Result;
use nalgebra::{UnitQuaternion, Vector3};
use std::f64::consts::FRAC_PI_2;

/// Above this absolute cosine between the direction to a target and the
/// world y-axis, the z-axis is used as up direction instead.
const MAX_UP_ALIGNMENT: fsc = 0.999;

impl Scene {
    /// Flags `updates` as pending for the given node and `child_updates` for
    /// all its descendants, queueing every node that was clean before. A
    /// stale bounding box also makes the bounding box of the node's owner
    /// group stale. Missing nodes are skipped.
    pub fn node_updated(
        &mut self,
        node_id: NodeID,
        updates: DeferredUpdates,
        child_updates: DeferredUpdates,
    ) {
        let mut stack = vec![(node_id, updates, child_updates)];

        while let Some((id, updates, child_updates)) = stack.pop() {
            let Some(node) = self.nodes.get_mut(id.idx()) else {
                continue;
            };
            let was_clean = node.pending_updates.is_empty();
            node.pending_updates |= updates;

            if !child_updates.is_empty() {
                stack.extend(
                    node.children
                        .iter()
                        .map(|&child| (child, child_updates, child_updates)),
                );
            }

            if updates.contains(DeferredUpdates::BOUNDING_BOX) {
                if let Some(group) = node.owner_group {
                    if self.nodes.get(group.idx()).is_some_and(|group_node| {
                        !group_node
                            .pending_updates
                            .contains(DeferredUpdates::BOUNDING_BOX)
                    }) {
                        stack.push((
                            group,
                            DeferredUpdates::BOUNDING_BOX,
                            DeferredUpdates::empty(),
                        ));
                    }
                }
            }

            if was_clean && !updates.is_empty() {
                self.queue_node_updates(id);
            }
        }
    }

    /// Resolves the pending updates of the given node selected by `mask`,
    /// together with the pending updates they depend on. Pending transform
    /// updates of ancestors are resolved first, from the root down. When
    /// `mask` includes [`DeferredUpdates::UNLOAD`] and nothing else remains
    /// pending, a requested unload is carried out. Missing nodes are
    /// skipped.
    pub fn resolve_node_updates(&mut self, node_id: NodeID, mask: DeferredUpdates) {
        let Some(node) = self.get_node(node_id) else {
            return;
        };
        let updates = mask.with_dependencies(node.pending_updates);

        if updates.contains(DeferredUpdates::TRANSFORMS) {
            let mut stale_ancestors = Vec::new();
            let mut current = node.parent;
            while let Some(ancestor) = current {
                let ancestor_node = self.node(ancestor);
                if ancestor_node
                    .pending_updates
                    .contains(DeferredUpdates::TRANSFORMS)
                {
                    stale_ancestors.push(ancestor);
                }
                current = ancestor_node.parent;
            }

            for &ancestor in stale_ancestors.iter().rev() {
                self.apply_node_updates(ancestor, DeferredUpdates::TRANSFORMS);
                self.finish_resolution(ancestor, false);
            }
        }

        if !updates.is_empty() {
            self.apply_node_updates(node_id, updates);
        }
        self.finish_resolution(node_id, mask.contains(DeferredUpdates::UNLOAD));
    }

    /// Resolves every update that was pending when the call began, then
    /// carries out the unloads of nodes that were pushed out of a full
    /// queue. Nodes queued during the drain wait for the next call.
    pub fn resolve_pending_updates(&mut self) {
        let n_pending = self.pending_updates.len();
        let evicted_unloads = std::mem::take(&mut self.evicted_unloads);
        with_debug_logging!("Resolving {} pending node updates", n_pending; {
            for _ in 0..n_pending {
                let Some(node_id) = self.pending_updates.pop_front() else {
                    break;
                };
                let Some(node) = self.nodes.get_mut(node_id.idx()) else {
                    continue;
                };
                node.queue_slot = None;
                self.resolve_node_updates(node_id, DeferredUpdates::all());
            }
            for node_id in evicted_unloads {
                self.resolve_node_updates(node_id, DeferredUpdates::all());
            }
        });
    }

    /// Sets the cell transform of the given node on behalf of engine or
    /// editor code.
    ///
    /// # Errors
    /// See [`set_cell_transform_from`](Self::set_cell_transform_from).
    pub fn set_cell_transform(&mut self, node_id: NodeID, transform: Transform<fsc>) -> Result<()> {
        self.set_cell_transform_from(node_id, transform, TransformSource::Standard)
    }

    /// Sets the cell transform of the given node, splitting the change
    /// between pivot and offset according to the node's
    /// [`TransformMethod`]. Bound physics bodies and navigation agents are
    /// moved along unless they caused the change. Unless called from
    /// transform resolution, the node's bounds and ownership and, depending
    /// on the transform method, its descendants are flagged as stale, and
    /// the change is persisted. Moving a target reorients its owner.
    ///
    /// # Errors
    /// Returns an error if the node does not exist, or if the change could
    /// not be persisted. In the latter case the change is kept in memory.
    pub fn set_cell_transform_from(
        &mut self,
        node_id: NodeID,
        transform: Transform<fsc>,
        source: TransformSource,
    ) -> Result<()> {
        self.checked_node(node_id)?;
        let offset_changed = self.move_node(node_id, transform, source);
        if source == TransformSource::TransformResolve {
            return Ok(());
        }

        let cell_transform = self.node(node_id).cell_transform;
        let result = self.persist_node_field(node_id, PersistedField::CellTransform(cell_transform));
        if offset_changed {
            let offset_transform = self.node(node_id).offset_transform;
            result.and(
                self.persist_node_field(node_id, PersistedField::OffsetTransform(offset_transform)),
            )
        } else {
            result
        }
    }

    /// Moves the node without persisting anything.
    ///
    /// # Returns
    /// Whether the offset transform changed.
    fn move_node(&mut self, node_id: NodeID, transform: Transform<fsc>, source: TransformSource) -> bool {
        let resolving = source == TransformSource::TransformResolve;
        let method = self.node(node_id).transform_method;
        let keeps_children_in_place =
            matches!(method, TransformMethod::PivotOnly | TransformMethod::NoChildUpdate);

        if !resolving {
            self.resolve_node_updates(node_id, DeferredUpdates::TRANSFORMS);
            if keeps_children_in_place {
                for child in self.node(node_id).children.clone() {
                    self.resolve_node_updates(child, DeferredUpdates::TRANSFORMS);
                }
            }
        }

        let origin = self.cell_origin(self.node(node_id).cell);
        let parent_transform = self
            .node(node_id)
            .parent
            .map(|parent| self.node(parent).cell_transform);

        let node = self.node_mut(node_id);

        let mut cell_transform = if node.variant.can_rotate() {
            transform
        } else {
            let mut position_only = node.cell_transform;
            position_only.set_position(&transform.position());
            position_only
        };

        let mut offset_changed = false;
        if !resolving {
            match method {
                TransformMethod::PivotOnly => {
                    node.offset_transform =
                        cell_transform.inverse() * node.cell_transform * node.offset_transform;
                    offset_changed = true;
                }
                TransformMethod::ObjectOnly => {
                    node.offset_transform =
                        node.cell_transform.inverse() * cell_transform * node.offset_transform;
                    cell_transform = node.cell_transform;
                    offset_changed = true;
                }
                TransformMethod::Standard | TransformMethod::NoChildUpdate => {}
            }
        }

        node.set_cell_transform_and_pivot(cell_transform, &origin);
        let world_transform = node.cached_world_transform();
        node.variant.world_transform_changed(&world_transform);

        if source != TransformSource::Dynamics {
            let base_mass = node.base_mass;
            if let Some(body) = node.physics_body.as_mut() {
                body.set_transform(&world_transform);
                if body.model() == BodyModel::RigidDynamic {
                    let mass = scaled_mass(
                        base_mass,
                        &world_transform.local_scale(),
                        body.mass_transform_amount(),
                    );
                    body.set_mass(mass);
                }
            }
        }
        if source != TransformSource::Navigation {
            if let Some(agent) = node.navigation_agent.as_mut() {
                agent.set_position(&world_transform.position());
            }
        }

        let target_owner = node.variant.target_owner();

        if !resolving {
            node.local_transform = parent_transform
                .map_or(cell_transform, |parent_transform| {
                    parent_transform.inverse() * cell_transform
                });

            let child_updates = match method {
                TransformMethod::Standard => DeferredUpdates::RESOLVABLE,
                TransformMethod::ObjectOnly => DeferredUpdates::empty(),
                TransformMethod::PivotOnly | TransformMethod::NoChildUpdate => {
                    let inverse_cell_transform = cell_transform.inverse();
                    for child in node.children.clone() {
                        let child_node = self.node_mut(child);
                        child_node.local_transform =
                            inverse_cell_transform * child_node.cell_transform;
                    }
                    DeferredUpdates::empty()
                }
            };

            self.node_updated(
                node_id,
                DeferredUpdates::BOUNDING_BOX | DeferredUpdates::OWNERSHIP_STATUS,
                child_updates,
            );
        }

        if let Some(owner) = target_owner {
            self.reorient_towards_target(owner, node_id);
        }

        offset_changed
    }

    /// Turns the locked axis of `owner` towards the world position of
    /// `target`, keeping the owner's scale and shear.
    fn reorient_towards_target(&mut self, owner: NodeID, target: NodeID) {
        let Some(owner_node) = self.get_node(owner) else {
            return;
        };
        if !owner_node.variant.can_rotate() || self.is_descendant_of(target, owner) {
            return;
        }
        let axis_rotation = match owner_node.target_method {
            NodeTargetMethod::ZAxis | NodeTargetMethod::Relative => UnitQuaternion::identity(),
            NodeTargetMethod::XAxis => {
                UnitQuaternion::from_axis_angle(&Vector3::y_axis(), -FRAC_PI_2)
            }
            NodeTargetMethod::YAxis => {
                UnitQuaternion::from_axis_angle(&Vector3::x_axis(), FRAC_PI_2)
            }
            NodeTargetMethod::NoTarget | NodeTargetMethod::Unlocked => return,
        };

        let owner_position = self.position(owner);
        let target_position = self.node(target).cached_world_position();
        let Some(direction) = (target_position - owner_position).try_normalize(fsc::EPSILON) else {
            return;
        };
        let up = if direction.y.abs() > MAX_UP_ALIGNMENT {
            Vector3::z()
        } else {
            Vector3::y()
        };
        let rotation = UnitQuaternion::face_towards(&direction, &up) * axis_rotation;

        let owner_cell_transform = self.node(owner).cell_transform;
        let mut components = owner_cell_transform.decompose().unwrap_or_else(|| {
            TransformComponents {
                translation: owner_cell_transform.translation(),
                ..TransformComponents::identity()
            }
        });
        components.rotation = rotation;

        self.move_node(
            owner,
            Transform::from_components(&components),
            TransformSource::Standard,
        );
        self.persist_or_log(owner, PersistedField::CellTransform(self.node(owner).cell_transform));
    }

    /// Appends the node to the FIFO. When the FIFO is full, the oldest
    /// entry is resolved early. An evicted node never unloads here, since
    /// the caller may still be mutating its tree. A pending unload is
    /// instead carried out by the next drain.
    fn queue_node_updates(&mut self, node_id: NodeID) {
        loop {
            match self.pending_updates.push_back(node_id) {
                Ok(slot) => {
                    match self.nodes.get_mut(node_id.idx()) {
                        Some(node) => node.queue_slot = Some(slot),
                        None => {
                            self.pending_updates.clear_slot(slot);
                        }
                    }
                    return;
                }
                Err(_) => {
                    let Some(oldest) = self.pending_updates.pop_front() else {
                        return;
                    };
                    log::debug!("Pending update queue full, resolving {:?} early", oldest);
                    let Some(oldest_node) = self.nodes.get_mut(oldest.idx()) else {
                        continue;
                    };
                    oldest_node.queue_slot = None;
                    self.resolve_node_updates(oldest, DeferredUpdates::RESOLVABLE);

                    if self.nodes.get(oldest.idx()).is_some_and(|node| {
                        node.pending_updates.contains(DeferredUpdates::UNLOAD)
                    }) {
                        self.evicted_unloads.insert(oldest);
                    }
                }
            }
        }
    }

    /// Leaves the FIFO once nothing remains pending except possibly an
    /// unload, which is carried out if allowed.
    fn finish_resolution(&mut self, node_id: NodeID, allow_unload: bool) {
        let Some(node) = self.nodes.get_mut(node_id.idx()) else {
            return;
        };
        let remaining = node.pending_updates;
        if !remaining.difference(DeferredUpdates::UNLOAD).is_empty() {
            return;
        }
        if remaining.contains(DeferredUpdates::UNLOAD) {
            if allow_unload {
                if let Err(error) = self.remove_node_tree(node_id, super::graph::Removal::Unload) {
                    log::error!("Deferred unload of {:?} failed: {:#}", node_id, error);
                }
            }
            return;
        }
        if let Some(slot) = node.queue_slot.take() {
            self.pending_updates.clear_slot(slot);
        }
    }

    fn apply_node_updates(&mut self, node_id: NodeID, updates: DeferredUpdates) {
        if updates.contains(DeferredUpdates::TRANSFORMS) {
            let node = self.node(node_id);
            let cell_transform = match node.parent {
                Some(parent) => self.node(parent).cell_transform * node.local_transform,
                None => node.local_transform,
            };
            self.node_mut(node_id)
                .pending_updates
                .remove(DeferredUpdates::TRANSFORMS);
            self.move_node(node_id, cell_transform, TransformSource::TransformResolve);
        }

        if updates.contains(DeferredUpdates::BOUNDING_BOX) {
            self.node_mut(node_id)
                .pending_updates
                .remove(DeferredUpdates::BOUNDING_BOX);
            let world_bounds = self.compute_world_bounds(node_id);
            self.node_mut(node_id).world_bounds = world_bounds;
        }

        if updates.contains(DeferredUpdates::OWNERSHIP_STATUS) {
            self.node_mut(node_id)
                .pending_updates
                .remove(DeferredUpdates::OWNERSHIP_STATUS);
            self.update_object_ownership(node_id);
        }
    }

    fn compute_world_bounds(&mut self, node_id: NodeID) -> AxisAlignedBox<fsc> {
        let node = self.node(node_id);
        let world_transform = node.cached_world_transform();
        let position = world_transform.position();

        if let NodeVariant::Group(group) = &node.variant {
            let members: Vec<NodeID> = group.members().collect();
            return members
                .into_iter()
                .map(|member| self.bounding_box(member))
                .reduce(|bounds, member_bounds| {
                    AxisAlignedBox::aabb_from_pair(&bounds, &member_bounds)
                })
                .unwrap_or_else(|| AxisAlignedBox::new(position, position));
        }

        self.objects
            .get(node.object_reference_id)
            .map_or_else(
                || AxisAlignedBox::new(position, position),
                |object| object.local_bounding_box().transformed(&world_transform),
            )
    }

    /// Moves a root node to the cell containing its pivot and refreshes the
    /// node's spatial index entry.
    fn update_object_ownership(&mut self, node_id: NodeID) {
        let node = self.node(node_id);
        if node.reference_id == 0 {
            return;
        }

        if node.parent.is_none() && !self.loading && self.config.writing_enabled {
            let key = CellKey::for_position(
                &node.world_pivot_transform.position(),
                &self.cell_size,
            );
            let old_key = node.cell;
            if old_key != Some(key) {
                self.ensure_cell(key);
                self.set_cell(node_id, Some(key));
                if let Some(old_key) = old_key {
                    self.remove_cell_if_unused(old_key);
                }
            }
        }

        self.update_spatial_entry(node_id);
    }

    fn update_spatial_entry(&mut self, node_id: NodeID) {
        let node = self.node(node_id);
        let categories = node.variant.spatial_categories();
        if categories.is_empty() {
            return;
        }
        let bounding_sphere = node.world_bounds.bounding_sphere();

        match node.spatial_handle {
            Some(handle) => {
                if !self.spatial_index.update(
                    handle,
                    bounding_sphere.center(),
                    bounding_sphere.radius(),
                ) {
                    log::debug!("Spatial index dropped node {:?}", node_id);
                    self.node_mut(node_id).spatial_handle = None;
                    self.orphans.insert(node_id);
                }
            }
            None => match self
                .spatial_index
                .insert(node_id, &bounding_sphere, categories)
            {
                Some(handle) => {
                    self.node_mut(node_id).spatial_handle = Some(handle);
                    self.orphans.remove(&node_id);
                }
                None => {
                    self.orphans.insert(node_id);
                }
            },
        }
    }

    fn ensure_cell(&mut self, key: CellKey) {
        if self.cells.contains_key(&key) {
            return;
        }
        let reference_id = self.allocate_reference_id();
        self.cells.insert(key, SceneCell::new(reference_id, key));
        log::debug!("Created scene cell {:?}", key);
    }

    pub(crate) fn remove_cell_if_unused(&mut self, key: CellKey) {
        if !self.config.writing_enabled || self.loading {
            return;
        }
        if self
            .cells
            .get(&key)
            .is_some_and(|cell| cell.is_empty() && !cell.has_custom_data())
        {
            self.cells.remove(&key);
            log::debug!("Removed empty scene cell {:?}", key);
        }
    }

    /// Moves the node's subtree into the frame of the given cell, keeping
    /// world poses. Only root nodes are registered with their cell.
    pub(crate) fn set_cell(&mut self, node_id: NodeID, cell: Option<CellKey>) {
        let node = self.node(node_id);
        let old_cell = node.cell;
        if old_cell == cell {
            return;
        }
        let is_root = node.parent.is_none();
        let new_origin = self.cell_origin(cell);
        let shift: Vector3<fsc> = self.cell_origin(old_cell) - new_origin;

        if is_root {
            if let Some(old_cell) = old_cell.and_then(|key| self.cells.get_mut(&key)) {
                old_cell.remove_node(node_id);
            }
            if let Some(new_cell) = cell.and_then(|key| self.cells.get_mut(&key)) {
                new_cell.add_node(node_id);
            }
        }

        let mut stack = vec![node_id];
        while let Some(id) = stack.pop() {
            let node = self.node_mut(id);
            let cell_transform = node.cell_transform.translated(&shift);
            node.cell = cell;
            node.set_cell_transform_and_pivot(cell_transform, &new_origin);
            if id == node_id && is_root {
                node.local_transform = cell_transform;
            }
            stack.extend(node.children.iter().copied());
        }

        if let Some(key) = cell {
            self.persist_or_log(node_id, PersistedField::Cell(key));
        }
        self.persist_or_log(
            node_id,
            PersistedField::CellTransform(self.node(node_id).cell_transform),
        );
    }
}
