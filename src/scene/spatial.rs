//! Spatial indexing of node bounding volumes.

use crate::{
    fsc,
    geometry::{Frustum, Sphere},
    scene::NodeID,
};
use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};
use nalgebra::Point3;
use scene_utils::{ArenaIdx, GenerationalArena};
use std::fmt;

bitflags! {
    /// Categories of nodes held by a [`SpatialIndex`], used to filter
    /// visibility queries.
    #[repr(transparent)]
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Zeroable, Pod)]
    pub struct SpatialCategories: u8 {
        /// The node has geometry that can be rendered.
        const RENDERABLE    = 1 << 0;
        /// The node's geometry occludes light.
        const SHADOW_CASTER = 1 << 1;
        /// The node emits light.
        const LIGHT         = 1 << 2;
    }
}

/// Handle to a bounding volume registered with a [`SpatialIndex`].
#[repr(transparent)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Zeroable, Pod)]
pub struct SpatialHandle(ArenaIdx);

/// An ordered set of visible nodes produced by a visibility query.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VisibilitySet {
    nodes: Vec<NodeID>,
}

/// A bounding volume index mapping world-space volumes to owning nodes.
pub trait SpatialIndex: fmt::Debug {
    /// Registers the given bounding sphere for the given node.
    ///
    /// # Returns
    /// A handle to the registered volume, or [`None`] if the index declines
    /// ownership of the node.
    fn insert(
        &mut self,
        owner: NodeID,
        bounds: &Sphere<fsc>,
        categories: SpatialCategories,
    ) -> Option<SpatialHandle>;

    /// Replaces the bounding sphere of the volume with the given handle.
    ///
    /// # Returns
    /// `false` if the index no longer accepts the volume, in which case the
    /// volume has been removed.
    fn update(&mut self, handle: SpatialHandle, center: &Point3<fsc>, radius: fsc) -> bool;

    /// Removes the volume with the given handle.
    fn remove(&mut self, handle: SpatialHandle);

    /// Adds to `visible` every node with a category in `categories` whose
    /// volume may overlap the given frustum.
    fn compute_visibility(
        &self,
        frustum: &Frustum<fsc>,
        visible: &mut VisibilitySet,
        categories: SpatialCategories,
    );
}

/// A [`SpatialIndex`] keeping its volumes in a flat list, optionally
/// restricted to a cube of the given half extent around the world origin.
#[derive(Clone, Debug, Default)]
pub struct FlatSpatialIndex {
    extent: Option<fsc>,
    entries: GenerationalArena<Entry>,
}

#[derive(Clone, Debug)]
struct Entry {
    owner: NodeID,
    bounds: Sphere<fsc>,
    categories: SpatialCategories,
}

impl FlatSpatialIndex {
    pub fn new(extent: Option<fsc>) -> Self {
        Self {
            extent,
            entries: GenerationalArena::new(),
        }
    }

    pub fn n_volumes(&self) -> usize {
        self.entries.len()
    }

    /// Returns the node owning the volume with the given handle, if it is
    /// still registered.
    pub fn owner(&self, handle: SpatialHandle) -> Option<NodeID> {
        self.entries.get(handle.0).map(|entry| entry.owner)
    }

    fn accepts(&self, center: &Point3<fsc>) -> bool {
        self.extent
            .is_none_or(|extent| center.coords.iter().all(|coord| coord.abs() <= extent))
    }
}

impl SpatialIndex for FlatSpatialIndex {
    fn insert(
        &mut self,
        owner: NodeID,
        bounds: &Sphere<fsc>,
        categories: SpatialCategories,
    ) -> Option<SpatialHandle> {
        if !self.accepts(bounds.center()) {
            return None;
        }
        let idx = self.entries.insert(Entry {
            owner,
            bounds: *bounds,
            categories,
        });
        Some(SpatialHandle(idx))
    }

    fn update(&mut self, handle: SpatialHandle, center: &Point3<fsc>, radius: fsc) -> bool {
        if !self.accepts(center) {
            self.entries.remove(handle.0);
            return false;
        }
        match self.entries.get_mut(handle.0) {
            Some(entry) => {
                entry.bounds = Sphere::new(*center, radius);
                true
            }
            None => false,
        }
    }

    fn remove(&mut self, handle: SpatialHandle) {
        self.entries.remove(handle.0);
    }

    fn compute_visibility(
        &self,
        frustum: &Frustum<fsc>,
        visible: &mut VisibilitySet,
        categories: SpatialCategories,
    ) {
        for (_, entry) in self.entries.iter() {
            if entry.categories.intersects(categories) && frustum.intersects_sphere(&entry.bounds)
            {
                visible.insert(entry.owner);
            }
        }
    }
}

impl VisibilitySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, node: NodeID) -> bool {
        self.nodes.contains(&node)
    }

    /// Adds the given node unless it is already present.
    pub fn insert(&mut self, node: NodeID) {
        if !self.contains(node) {
            self.nodes.push(node);
        }
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = NodeID> + '_ {
        self.nodes.iter().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{point, Vector3};
    use scene_utils::GenerationalArena;

    fn node_ids(n: usize) -> Vec<NodeID> {
        let mut arena = GenerationalArena::new();
        (0..n).map(|_| NodeID::from_idx(arena.insert(()))).collect()
    }

    fn frustum_looking_down_positive_z() -> Frustum<fsc> {
        Frustum::perspective(
            &Point3::origin(),
            &Vector3::x(),
            &Vector3::y(),
            &Vector3::z(),
            std::f64::consts::FRAC_PI_2,
            1.0,
            0.1,
            100.0,
        )
    }

    #[test]
    fn index_without_extent_accepts_everything() {
        let mut index = FlatSpatialIndex::new(None);
        let ids = node_ids(1);
        let handle = index.insert(
            ids[0],
            &Sphere::new(point![1e9, 0.0, 0.0], 1.0),
            SpatialCategories::RENDERABLE,
        );
        assert!(handle.is_some());
        assert_eq!(index.owner(handle.unwrap()), Some(ids[0]));
    }

    #[test]
    fn index_with_extent_declines_distant_volumes() {
        let mut index = FlatSpatialIndex::new(Some(10.0));
        let ids = node_ids(1);
        assert!(
            index
                .insert(ids[0], &Sphere::new(point![11.0, 0.0, 0.0], 1.0), SpatialCategories::RENDERABLE)
                .is_none()
        );
        assert_eq!(index.n_volumes(), 0);
    }

    #[test]
    fn moving_volume_outside_extent_removes_it() {
        let mut index = FlatSpatialIndex::new(Some(10.0));
        let ids = node_ids(1);
        let handle = index
            .insert(ids[0], &Sphere::new(Point3::origin(), 1.0), SpatialCategories::RENDERABLE)
            .unwrap();
        assert!(index.update(handle, &point![5.0, 0.0, 0.0], 1.0));
        assert!(!index.update(handle, &point![50.0, 0.0, 0.0], 1.0));
        assert_eq!(index.owner(handle), None);
    }

    #[test]
    fn visibility_query_filters_by_frustum_and_category() {
        let mut index = FlatSpatialIndex::new(None);
        let ids = node_ids(3);
        index.insert(
            ids[0],
            &Sphere::new(point![0.0, 0.0, 10.0], 1.0),
            SpatialCategories::RENDERABLE | SpatialCategories::SHADOW_CASTER,
        );
        index.insert(
            ids[1],
            &Sphere::new(point![0.0, 0.0, -10.0], 1.0),
            SpatialCategories::RENDERABLE,
        );
        index.insert(
            ids[2],
            &Sphere::new(point![0.0, 1.0, 20.0], 1.0),
            SpatialCategories::LIGHT,
        );

        let frustum = frustum_looking_down_positive_z();

        let mut visible = VisibilitySet::new();
        index.compute_visibility(&frustum, &mut visible, SpatialCategories::RENDERABLE);
        assert_eq!(visible.iter().collect::<Vec<_>>(), vec![ids[0]]);

        visible.clear();
        index.compute_visibility(&frustum, &mut visible, SpatialCategories::all());
        assert_eq!(visible.len(), 2);
        assert!(visible.contains(ids[2]));
    }

    #[test]
    fn visibility_set_ignores_duplicates() {
        let ids = node_ids(1);
        let mut set = VisibilitySet::new();
        set.insert(ids[0]);
        set.insert(ids[0]);
        assert_eq!(set.len(), 1);
    }
}
