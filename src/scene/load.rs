//! Batch loading of persisted nodes and node cloning.

use crate::{
    fsc,
    geometry::Transform,
    scene::{
        CellKey, DeferredUpdates, NodeBehavior, NodeID, NodeTargetMethod, ObjectKind,
        ObjectProperties, Scene, SceneCell, UpdateRate, WorldObject, graph::Removal,
    },
};
use anyhow::{Result, anyhow, bail};
use std::{
    collections::{HashMap, HashSet},
    error::Error,
    fmt,
};

/// A node as read back from persistent storage.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NodeRecord {
    pub reference_id: u32,
    pub object_reference_id: u32,
    /// Properties of the instanced world object. Ignored if the object is
    /// already present, apart from checking that the kinds agree.
    pub properties: ObjectProperties,
    #[cfg_attr(feature = "serde", serde(default))]
    pub name: Option<String>,
    /// Reference ID of the parent node, which may be part of the same batch
    /// or already loaded.
    #[cfg_attr(feature = "serde", serde(default))]
    pub parent: Option<u32>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub owner_group: Option<u32>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub cell: Option<CellKey>,
    pub cell_transform: Transform<fsc>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub offset_transform: Transform<fsc>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub update_rate: UpdateRate,
    #[cfg_attr(feature = "serde", serde(default))]
    pub target_method: NodeTargetMethod,
}

/// Error returned when a batch of [`NodeRecord`]s could not be loaded. No
/// node of the batch remains in the scene.
#[derive(Debug)]
pub struct LoadError {
    reference_id: u32,
    cause: anyhow::Error,
}

/// How [`Scene::clone_object_node`] treats the world object of the cloned
/// node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloneMethod {
    /// The clone gets its own copy of the object.
    Copy,
    /// The clone instances the same object.
    Instance,
}

impl NodeRecord {
    /// Creates a record for a root node with default settings.
    pub fn new(
        reference_id: u32,
        object_reference_id: u32,
        properties: ObjectProperties,
        cell_transform: Transform<fsc>,
    ) -> Self {
        Self {
            reference_id,
            object_reference_id,
            properties,
            name: None,
            parent: None,
            owner_group: None,
            cell: None,
            cell_transform,
            offset_transform: Transform::identity(),
            update_rate: UpdateRate::Never,
            target_method: NodeTargetMethod::NoTarget,
        }
    }
}

impl LoadError {
    /// Reference ID of the record that could not be loaded.
    pub fn reference_id(&self) -> u32 {
        self.reference_id
    }

    pub fn cause(&self) -> &anyhow::Error {
        &self.cause
    }
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Failed to load node {}: {:#}", self.reference_id, self.cause)
    }
}

impl Error for LoadError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&*self.cause)
    }
}

impl Scene {
    /// Creates nodes for the given records and links them to their parents
    /// and owner groups. The records are validated before anything is
    /// created, and nothing is persisted while loading.
    ///
    /// # Returns
    /// The IDs of the created nodes in record order.
    ///
    /// # Errors
    /// Returns a [`LoadError`] naming the first offending record if a
    /// record is invalid or cannot be linked. Every node created for the
    /// batch is removed again.
    pub fn load_object_nodes(&mut self, records: &[NodeRecord]) -> Result<Vec<NodeID>, LoadError> {
        with_debug_logging!("Loading {} scene nodes", records.len(); {
            self.validate_records(records)?;

            self.loading = true;
            let mut created = Vec::with_capacity(records.len());
            let mut created_cells = Vec::new();
            let result = self.create_and_link(records, &mut created, &mut created_cells);
            self.loading = false;

            match result {
                Ok(()) => Ok(created),
                Err(error) => {
                    log::error!("{}", error);
                    for &node_id in created.iter().rev() {
                        if self.has_node(node_id) {
                            if let Err(cleanup_error) = self.remove_node_tree(node_id, Removal::Unload) {
                                log::error!("Cleanup after failed load: {:#}", cleanup_error);
                            }
                        }
                    }
                    for key in created_cells {
                        if self.cells.get(&key).is_some_and(SceneCell::is_empty) {
                            self.cells.remove(&key);
                        }
                    }
                    Err(error)
                }
            }
        })
    }

    /// Creates a new node with the same pose, parent, update rate and
    /// transform method as the given node.
    ///
    /// # Errors
    /// Returns an error if the node does not exist or is a target.
    pub fn clone_object_node(&mut self, node_id: NodeID, method: CloneMethod) -> Result<NodeID> {
        let node = self.checked_node(node_id)?;
        if node.variant.target_owner().is_some() {
            bail!("Target node {} cannot be cloned", node.reference_id);
        }
        self.resolve_node_updates(node_id, DeferredUpdates::TRANSFORMS);

        let node = self.node(node_id);
        let parent = node.parent;
        let cell = node.cell;
        let cell_transform = node.cell_transform;
        let offset_transform = node.offset_transform;
        let update_rate = node.update_rate;
        let transform_method = node.transform_method;
        let source_object = node.object_reference_id;

        let object_reference_id = match method {
            CloneMethod::Instance => source_object,
            CloneMethod::Copy => {
                let properties = self.objects.object(source_object).properties().clone();
                self.insert_world_object(properties)?
            }
        };
        let reference_id = self.allocate_reference_id();
        let clone = self.spawn_node(reference_id, object_reference_id, cell_transform, None)?;

        self.place_in_cell(clone, cell, offset_transform);
        self.node_mut(clone).transform_method = transform_method;
        self.node_mut(clone).update_rate = update_rate;
        self.update_buckets.add(clone, update_rate);

        if parent.is_some() {
            self.set_parent(clone, parent)?;
        }

        log::debug!("Cloned node {:?} as {} ({:?})", node_id, reference_id, method);
        Ok(clone)
    }

    fn validate_records(&self, records: &[NodeRecord]) -> Result<(), LoadError> {
        let batch_ids: HashSet<u32> = records.iter().map(|record| record.reference_id).collect();
        let mut seen_ids = HashSet::with_capacity(records.len());
        let mut batch_names = HashSet::new();
        let mut batch_objects: HashMap<u32, ObjectKind> = HashMap::new();

        let is_known = |reference_id: u32| {
            batch_ids.contains(&reference_id) || self.node_by_reference(reference_id).is_some()
        };

        for record in records {
            let mut check = || -> Result<()> {
                if record.reference_id == 0 {
                    bail!("Reference ID 0 is reserved for transient nodes");
                }
                if !seen_ids.insert(record.reference_id) {
                    bail!("Reference ID occurs more than once in the batch");
                }
                if self.node_by_reference(record.reference_id).is_some() {
                    bail!("A node with this reference ID is already loaded");
                }

                let kind = record.properties.kind();
                if kind == ObjectKind::Target {
                    bail!("Target nodes are recreated from their owner's target method");
                }
                let existing_kind = self
                    .objects
                    .get(record.object_reference_id)
                    .map(WorldObject::kind)
                    .or_else(|| batch_objects.get(&record.object_reference_id).copied());
                if existing_kind.is_some_and(|existing| existing != kind) {
                    bail!(
                        "World object {} is not a {:?}",
                        record.object_reference_id,
                        kind
                    );
                }
                batch_objects.insert(record.object_reference_id, kind);

                for (label, linked) in [("Parent", record.parent), ("Owner group", record.owner_group)] {
                    if let Some(linked) = linked {
                        if linked == record.reference_id {
                            bail!("{} refers to the node itself", label);
                        }
                        if !is_known(linked) {
                            bail!("{} {} is neither loaded nor part of the batch", label, linked);
                        }
                    }
                }

                if let Some(name) = &record.name {
                    if !batch_names.insert(name.clone()) || self.node_by_name(name).is_some() {
                        bail!("Name {} is already in use", name);
                    }
                }
                Ok(())
            };
            check().map_err(|cause| LoadError {
                reference_id: record.reference_id,
                cause,
            })?;
        }
        Ok(())
    }

    fn create_and_link(
        &mut self,
        records: &[NodeRecord],
        created: &mut Vec<NodeID>,
        created_cells: &mut Vec<CellKey>,
    ) -> Result<(), LoadError> {
        let mut nodes_by_record = HashMap::with_capacity(records.len());

        for record in records {
            let node_id = self
                .create_from_record(record, created_cells)
                .map_err(|cause| LoadError {
                    reference_id: record.reference_id,
                    cause,
                })?;
            created.push(node_id);
            nodes_by_record.insert(record.reference_id, node_id);
        }

        let lookup = |scene: &Self, reference_id: u32| -> Result<NodeID> {
            nodes_by_record
                .get(&reference_id)
                .copied()
                .or_else(|| scene.node_by_reference(reference_id))
                .ok_or_else(|| anyhow!("No node with reference ID {}", reference_id))
        };

        for record in records {
            let link = |scene: &mut Self| -> Result<()> {
                let node_id = lookup(scene, record.reference_id)?;
                if let Some(parent) = record.parent {
                    let parent_id = lookup(scene, parent)?;
                    scene.set_parent(node_id, Some(parent_id))?;
                }
                Ok(())
            };
            link(self).map_err(|cause| LoadError {
                reference_id: record.reference_id,
                cause,
            })?;
        }

        for record in records {
            let mut init = |scene: &mut Self| -> Result<()> {
                let node_id = lookup(scene, record.reference_id)?;
                if let Some(group) = record.owner_group {
                    let group_id = lookup(scene, group)?;
                    scene.set_owner_group(node_id, Some(group_id))?;
                }
                scene.set_target_method(node_id, record.target_method)?;
                if let Some(target) = scene.node(node_id).target {
                    created.push(target);
                }
                Ok(())
            };
            init(self).map_err(|cause| LoadError {
                reference_id: record.reference_id,
                cause,
            })?;
        }

        Ok(())
    }

    fn create_from_record(
        &mut self,
        record: &NodeRecord,
        created_cells: &mut Vec<CellKey>,
    ) -> Result<NodeID> {
        if !self.objects.contains(record.object_reference_id) {
            self.objects.insert(WorldObject::new(
                record.object_reference_id,
                record.properties.clone(),
            ))?;
        }
        self.reserve_reference_id(record.reference_id);
        self.reserve_reference_id(record.object_reference_id);

        let node_id = self.spawn_node(
            record.reference_id,
            record.object_reference_id,
            record.cell_transform,
            None,
        )?;

        if let Some(key) = record.cell {
            if !self.cells.contains_key(&key) {
                let cell_reference_id = self.allocate_reference_id();
                self.cells.insert(key, SceneCell::new(cell_reference_id, key));
                created_cells.push(key);
            }
        }
        self.place_in_cell(node_id, record.cell, record.offset_transform);

        if let Some(name) = &record.name {
            self.node_mut(node_id).name = Some(name.clone());
            self.node_names.insert(name.clone(), node_id);
        }
        self.node_mut(node_id).update_rate = record.update_rate;
        self.update_buckets.add(node_id, record.update_rate);

        Ok(node_id)
    }

    /// Registers a freshly spawned root node with the given cell and gives
    /// it the given offset, interpreting its cell transform relative to the
    /// cell's origin.
    fn place_in_cell(&mut self, node_id: NodeID, cell: Option<CellKey>, offset_transform: Transform<fsc>) {
        if let Some(scene_cell) = cell.and_then(|key| self.cells.get_mut(&key)) {
            scene_cell.add_node(node_id);
        }
        let origin = self.cell_origin(cell);
        let node = self.node_mut(node_id);
        node.cell = cell;
        node.offset_transform = offset_transform;
        let cell_transform = node.cell_transform;
        node.set_cell_transform_and_pivot(cell_transform, &origin);
        let world_transform = node.cached_world_transform();
        node.variant.world_transform_changed(&world_transform);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{LightingConfig, SceneConfig},
        geometry::AxisAlignedBox,
        scene::{PersistedField, ScenePersistence},
    };
    use approx::assert_abs_diff_eq;
    use nalgebra::{point, vector};
    use std::{cell::RefCell, rc::Rc};

    #[derive(Debug, Default)]
    struct CountingPersistence {
        n_writes: Rc<RefCell<usize>>,
    }

    impl ScenePersistence for CountingPersistence {
        fn persist(&mut self, _reference_id: u32, _field: &PersistedField) -> Result<()> {
            *self.n_writes.borrow_mut() += 1;
            Ok(())
        }
    }

    fn scene() -> Scene {
        Scene::new(
            SceneConfig {
                writing_enabled: true,
                cell_size: [10.0, 10.0, 10.0],
                ..SceneConfig::default()
            },
            LightingConfig::default(),
        )
    }

    fn mesh() -> ObjectProperties {
        ObjectProperties::Mesh {
            bounds: AxisAlignedBox::new(point![-1.0, -1.0, -1.0], point![1.0, 1.0, 1.0]),
        }
    }

    fn record(reference_id: u32, x: fsc) -> NodeRecord {
        NodeRecord {
            cell: Some(CellKey::new(1, 0, 0)),
            ..NodeRecord::new(
                reference_id,
                reference_id + 1000,
                mesh(),
                Transform::from_translation(&vector![x, 0.0, 0.0]),
            )
        }
    }

    #[test]
    fn loading_links_children_listed_before_parents() {
        let mut scene = scene();
        let child = NodeRecord {
            parent: Some(10),
            name: Some("child".to_string()),
            ..record(11, 3.0)
        };
        let nodes = scene.load_object_nodes(&[child, record(10, 2.0)]).unwrap();

        let (child, root) = (nodes[0], nodes[1]);
        assert_eq!(scene.node(child).parent(), Some(root));
        assert_eq!(scene.node(child).level(), 1);
        assert_eq!(scene.node_by_name("child"), Some(child));
        assert_eq!(scene.node_by_reference(10), Some(root));
        assert!(scene.cell(CellKey::new(1, 0, 0)).unwrap().contains_node(root));
        assert_abs_diff_eq!(
            scene.node(child).local_transform().position(),
            point![1.0, 0.0, 0.0],
            epsilon = 1e-12
        );
        assert_abs_diff_eq!(scene.position(child), point![13.0, 0.0, 0.0], epsilon = 1e-12);
    }

    #[test]
    fn loading_persists_nothing() {
        let n_writes = Rc::new(RefCell::new(0));
        let mut scene = scene().with_persistence(Box::new(CountingPersistence {
            n_writes: n_writes.clone(),
        }));
        let child = NodeRecord {
            parent: Some(1),
            ..record(2, 1.0)
        };
        scene.load_object_nodes(&[record(1, 0.0), child]).unwrap();
        assert_eq!(*n_writes.borrow(), 0);
        assert!(!scene.is_loading());
    }

    #[test]
    fn invalid_record_is_named_and_nothing_is_created() {
        let mut scene = scene();
        let orphan = NodeRecord {
            parent: Some(99),
            ..record(2, 1.0)
        };
        let error = scene
            .load_object_nodes(&[record(1, 0.0), orphan])
            .unwrap_err();

        assert_eq!(error.reference_id(), 2);
        assert_eq!(scene.n_nodes(), 0);
        assert_eq!(scene.n_cells(), 0);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut scene = scene();
        let a = NodeRecord {
            name: Some("lamp".to_string()),
            ..record(1, 0.0)
        };
        let b = NodeRecord {
            name: Some("lamp".to_string()),
            ..record(2, 0.0)
        };
        assert_eq!(scene.load_object_nodes(&[a, b]).unwrap_err().reference_id(), 2);
    }

    #[test]
    fn parent_cycle_is_undone() {
        let mut scene = scene();
        let a = NodeRecord {
            parent: Some(2),
            ..record(1, 0.0)
        };
        let b = NodeRecord {
            parent: Some(1),
            ..record(2, 0.0)
        };
        let error = scene.load_object_nodes(&[a, b]).unwrap_err();

        assert_eq!(error.reference_id(), 2);
        assert!(error.to_string().starts_with("Failed to load node 2"));
        assert_eq!(scene.n_nodes(), 0);
        assert_eq!(scene.n_cells(), 0);
        assert_eq!(scene.objects().n_objects(), 0);
    }

    #[test]
    fn loaded_ids_are_never_reallocated() {
        let mut scene = scene();
        scene.load_object_nodes(&[record(50, 0.0)]).unwrap();
        let node = scene
            .create_object_node(mesh(), Transform::identity())
            .unwrap();
        assert!(scene.node(node).reference_id() > 1050);
    }

    #[test]
    fn instance_clone_shares_object_and_copy_clone_does_not() {
        let mut scene = scene();
        let node = scene
            .create_object_node(mesh(), Transform::from_translation(&vector![1.0, 2.0, 3.0]))
            .unwrap();
        let object = scene.node(node).object_reference_id();

        let instance = scene.clone_object_node(node, CloneMethod::Instance).unwrap();
        let copy = scene.clone_object_node(node, CloneMethod::Copy).unwrap();

        assert_eq!(scene.node(instance).object_reference_id(), object);
        assert_eq!(scene.objects().n_references(object), 2);
        assert_ne!(scene.node(copy).object_reference_id(), object);
        assert_abs_diff_eq!(scene.position(copy), point![1.0, 2.0, 3.0], epsilon = 1e-12);
    }

    #[test]
    fn clone_of_child_keeps_parent_and_world_pose() {
        let mut scene = scene();
        let nodes = scene
            .load_object_nodes(&[
                record(1, 0.0),
                NodeRecord {
                    parent: Some(1),
                    ..record(2, 4.0)
                },
            ])
            .unwrap();

        let clone = scene.clone_object_node(nodes[1], CloneMethod::Instance).unwrap();
        assert_eq!(scene.node(clone).parent(), Some(nodes[0]));
        assert_abs_diff_eq!(scene.position(clone), point![14.0, 0.0, 0.0], epsilon = 1e-12);
    }

    #[test]
    fn targets_cannot_be_cloned() {
        let mut scene = scene();
        let node = scene
            .create_object_node(mesh(), Transform::identity())
            .unwrap();
        scene.set_target_method(node, NodeTargetMethod::ZAxis).unwrap();
        let target = scene.node(node).target().unwrap();
        assert!(scene.clone_object_node(target, CloneMethod::Copy).is_err());
    }
}
