//! Persistent world objects referenced by scene nodes.

use crate::{
    fsc,
    geometry::AxisAlignedBox,
    light::PointLightProperties,
};
use anyhow::{Result, anyhow};
use nalgebra::{Point3, Vector3};
use std::collections::HashMap;

/// The fixed set of object types a node can represent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ObjectKind {
    Group,
    Mesh,
    PointLight,
    Actor,
    Target,
    Dummy,
}

/// Kind-specific data of a [`WorldObject`].
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ObjectProperties {
    Group,
    Mesh {
        bounds: AxisAlignedBox<fsc>,
    },
    PointLight(PointLightProperties),
    Actor {
        bounds: AxisAlignedBox<fsc>,
        motion: Motion,
    },
    Target,
    Dummy,
}

/// Constant velocities applied to an actor on every update.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Motion {
    pub velocity: Vector3<fsc>,
    /// Rotation axis scaled by the angular speed in radians per second.
    pub angular_velocity: Vector3<fsc>,
}

/// Data shared by every node instancing the same object.
#[derive(Clone, Debug, PartialEq)]
pub struct WorldObject {
    reference_id: u32,
    properties: ObjectProperties,
}

/// Storage for [`WorldObject`]s, counting the nodes that reference each.
#[derive(Clone, Debug, Default)]
pub struct WorldObjectStore {
    objects: HashMap<u32, StoredObject>,
}

#[derive(Clone, Debug)]
struct StoredObject {
    object: WorldObject,
    n_references: usize,
}

impl ObjectProperties {
    pub fn kind(&self) -> ObjectKind {
        match self {
            Self::Group => ObjectKind::Group,
            Self::Mesh { .. } => ObjectKind::Mesh,
            Self::PointLight(_) => ObjectKind::PointLight,
            Self::Actor { .. } => ObjectKind::Actor,
            Self::Target => ObjectKind::Target,
            Self::Dummy => ObjectKind::Dummy,
        }
    }
}

impl WorldObject {
    pub fn new(reference_id: u32, properties: ObjectProperties) -> Self {
        Self {
            reference_id,
            properties,
        }
    }

    pub fn reference_id(&self) -> u32 {
        self.reference_id
    }

    pub fn kind(&self) -> ObjectKind {
        self.properties.kind()
    }

    pub fn properties(&self) -> &ObjectProperties {
        &self.properties
    }

    pub fn properties_mut(&mut self) -> &mut ObjectProperties {
        &mut self.properties
    }

    /// Returns the object space bounding box. Objects without geometry get a
    /// box of zero extent at the origin.
    pub fn local_bounding_box(&self) -> AxisAlignedBox<fsc> {
        match &self.properties {
            ObjectProperties::Mesh { bounds } | ObjectProperties::Actor { bounds, .. } => *bounds,
            ObjectProperties::PointLight(properties) => {
                AxisAlignedBox::from_center_and_half_extents(
                    Point3::origin(),
                    Vector3::repeat(properties.outer_range),
                )
            }
            ObjectProperties::Group | ObjectProperties::Target | ObjectProperties::Dummy => {
                AxisAlignedBox::new(Point3::origin(), Point3::origin())
            }
        }
    }
}

impl WorldObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn n_objects(&self) -> usize {
        self.objects.len()
    }

    pub fn contains(&self, reference_id: u32) -> bool {
        self.objects.contains_key(&reference_id)
    }

    pub fn get(&self, reference_id: u32) -> Option<&WorldObject> {
        self.objects.get(&reference_id).map(|stored| &stored.object)
    }

    pub fn get_mut(&mut self, reference_id: u32) -> Option<&mut WorldObject> {
        self.objects
            .get_mut(&reference_id)
            .map(|stored| &mut stored.object)
    }

    /// Returns the object with the given reference ID.
    ///
    /// # Panics
    /// If no object has the given reference ID.
    pub fn object(&self, reference_id: u32) -> &WorldObject {
        self.get(reference_id)
            .unwrap_or_else(|| panic!("Tried to access missing world object {}", reference_id))
    }

    /// Inserts the given object without any references to it.
    ///
    /// # Errors
    /// Returns an error if an object with the same reference ID exists.
    pub fn insert(&mut self, object: WorldObject) -> Result<()> {
        let reference_id = object.reference_id();
        if self.objects.contains_key(&reference_id) {
            return Err(anyhow!(
                "World object with reference ID {} already exists",
                reference_id
            ));
        }
        self.objects.insert(
            reference_id,
            StoredObject {
                object,
                n_references: 0,
            },
        );
        Ok(())
    }

    /// Registers a new reference to the object with the given reference ID.
    ///
    /// # Errors
    /// Returns an error if no such object exists.
    pub fn add_reference(&mut self, reference_id: u32) -> Result<()> {
        let stored = self
            .objects
            .get_mut(&reference_id)
            .ok_or_else(|| anyhow!("No world object with reference ID {}", reference_id))?;
        stored.n_references += 1;
        Ok(())
    }

    /// Drops a reference to the object with the given reference ID, removing
    /// the object when no references remain.
    ///
    /// # Returns
    /// The removed object, if this was the last reference.
    pub fn release_reference(&mut self, reference_id: u32) -> Option<WorldObject> {
        let stored = self.objects.get_mut(&reference_id)?;
        stored.n_references = stored.n_references.saturating_sub(1);
        if stored.n_references == 0 {
            self.objects.remove(&reference_id).map(|stored| stored.object)
        } else {
            None
        }
    }

    pub fn n_references(&self, reference_id: u32) -> usize {
        self.objects
            .get(&reference_id)
            .map_or(0, |stored| stored.n_references)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::point;

    fn mesh(reference_id: u32) -> WorldObject {
        WorldObject::new(
            reference_id,
            ObjectProperties::Mesh {
                bounds: AxisAlignedBox::new(point![-1.0, -1.0, -1.0], point![1.0, 1.0, 1.0]),
            },
        )
    }

    #[test]
    fn inserting_duplicate_reference_id_fails() {
        let mut store = WorldObjectStore::new();
        store.insert(mesh(3)).unwrap();
        assert!(store.insert(mesh(3)).is_err());
    }

    #[test]
    fn object_is_dropped_with_last_reference() {
        let mut store = WorldObjectStore::new();
        store.insert(mesh(1)).unwrap();
        store.add_reference(1).unwrap();
        store.add_reference(1).unwrap();
        assert_eq!(store.n_references(1), 2);

        assert!(store.release_reference(1).is_none());
        assert!(store.contains(1));
        assert_eq!(store.release_reference(1), Some(mesh(1)));
        assert!(!store.contains(1));
    }

    #[test]
    fn referencing_missing_object_fails() {
        let mut store = WorldObjectStore::new();
        assert!(store.add_reference(7).is_err());
    }

    #[test]
    fn objects_without_geometry_have_degenerate_bounds() {
        let dummy = WorldObject::new(1, ObjectProperties::Dummy);
        let bounds = dummy.local_bounding_box();
        assert_eq!(bounds.lower_corner(), bounds.upper_corner());
    }

    #[test]
    fn light_bounds_cover_outer_range() {
        let light = WorldObject::new(
            1,
            ObjectProperties::PointLight(PointLightProperties {
                outer_range: 4.0,
                ..PointLightProperties::default()
            }),
        );
        assert_eq!(light.local_bounding_box().upper_corner(), &point![4.0, 4.0, 4.0]);
        assert_eq!(light.kind(), ObjectKind::PointLight);
    }
}
