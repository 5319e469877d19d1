//! Shadow and reflectance map generation for individual cube faces.

use crate::{
    fsc,
    geometry::{CubemapFace, Frustum},
    scene::{SpatialCategories, SpatialIndex, VisibilitySet},
};
use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};
use nalgebra::Point3;
use std::fmt;

bitflags! {
    /// Outcome of asking a [`ShadowGenerator`] to obtain a map resource from
    /// a [`TexturePool`].
    #[repr(transparent)]
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Zeroable, Pod)]
    pub struct FillResult: u8 {
        /// Not even a shared default resource could be obtained.
        const DO_NOTHING  = 1 << 0;
        /// Only the shared default resource was obtained, so the map cannot
        /// be filled ahead of use.
        const CANNOT_FILL = 1 << 1;
        /// A dedicated resource was obtained.
        const CAN_FILL    = 1 << 2;
    }
}

/// The type of map a generator produces.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MapKind {
    /// Depth maps for shadowing.
    Shadow,
    /// Reflective shadow maps for indirect lighting.
    Reflectance,
}

/// Identifies the generator requesting a resource from a [`TexturePool`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GeneratorKey {
    /// Reference ID of the light owning the generator.
    pub light: u32,
    pub face: CubemapFace,
    pub kind: MapKind,
}

/// Identifier for a map resource held by a [`TexturePool`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PooledMapID(u32);

/// Outcome of [`TexturePool::acquire`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PoolAssignment {
    /// A resource dedicated to the requester. `contents_valid` tells whether
    /// the resource still holds what the requester last wrote to it.
    Dedicated {
        map: PooledMapID,
        contents_valid: bool,
    },
    /// Only the shared default resource is available.
    Default,
    /// No resource is available.
    Unavailable,
}

/// A shared allocator of map resources consulted by every generator of
/// every light.
pub trait TexturePool: fmt::Debug {
    /// Assigns a free resource of the given kind and resolution to the
    /// requester, preferring one the requester held before.
    fn acquire(&mut self, requester: GeneratorKey, resolution: u32) -> PoolAssignment;

    /// Reassigns the given resource to the requester if nobody else has
    /// taken it since the requester last held it. Reclaiming a resource the
    /// requester still holds succeeds.
    fn reclaim(&mut self, requester: GeneratorKey, map: PooledMapID) -> bool;

    /// Returns the given resource to the pool. Its contents are remembered
    /// until another generator acquires it.
    fn release(&mut self, map: PooledMapID);
}

/// The camera a generator renders its cube face with.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FaceCamera {
    pub position: Point3<fsc>,
    pub face: CubemapFace,
    /// Vertical field of view in radians.
    pub vertical_field_of_view: fsc,
    pub near_distance: fsc,
    pub far_distance: fsc,
}

/// Manages the map resource and visibility set of a single cube face of a
/// light.
pub trait ShadowGenerator: fmt::Debug {
    /// Obtains a resource for this frame, unless one was already reclaimed by
    /// [`reassign_resources`](Self::reassign_resources).
    fn assign_resources(&mut self, pool: &mut dyn TexturePool) -> FillResult;

    /// Tries to take back the resource held in the previous frame.
    ///
    /// # Returns
    /// `true` if the previous resource is held again and no further
    /// assignment is needed.
    fn reassign_resources(&mut self, pool: &mut dyn TexturePool) -> bool;

    /// Returns any held resource to the pool.
    fn release_resources(&mut self, pool: &mut dyn TexturePool);

    /// Whether anything casts into this face.
    fn contains_renderable_objects(&self) -> bool;

    /// Whether the held map contents are stale.
    fn should_regenerate(&self) -> bool;

    /// Number of sub-passes needed to fill the map.
    fn write_pass_count(&self) -> u32;

    fn begin_write(&mut self) -> bool;

    fn begin_write_pass(&mut self, sub_pass: u32) -> bool;

    fn end_write_pass(&mut self) -> bool;

    fn end_write(&mut self) -> bool;

    /// Begins sampling the map during a lighting pass.
    fn begin_read(&mut self) -> bool {
        true
    }

    fn end_read(&mut self) -> bool {
        true
    }

    /// Whether only the shared default resource is held, so the map must be
    /// filled immediately before each use.
    fn requires_default_resource(&self) -> bool;

    fn visibility_set(&self) -> &VisibilitySet;

    /// Gathers the nodes visible from the face camera.
    ///
    /// # Returns
    /// Whether anything is visible.
    fn compute_visibility_set(&mut self, spatial_index: &dyn SpatialIndex) -> bool;

    fn resolution(&self) -> u32;

    fn set_resolution(&mut self, resolution: u32);

    fn camera(&self) -> &FaceCamera;

    fn set_camera(&mut self, camera: FaceCamera);
}

/// A [`TexturePool`] with a fixed set of maps, optionally backed by a shared
/// default map.
#[derive(Clone, Debug)]
pub struct ShadowMapPool {
    maps: Vec<PooledMap>,
    has_default: bool,
}

#[derive(Clone, Debug)]
struct PooledMap {
    kind: MapKind,
    resolution: u32,
    in_use: bool,
    last_owner: Option<GeneratorKey>,
}

/// A [`ShadowGenerator`] backed by maps from a [`TexturePool`].
#[derive(Debug)]
pub struct PooledShadowGenerator {
    key: GeneratorKey,
    camera: FaceCamera,
    resolution: u32,
    write_pass_count: u32,
    resource: HeldResource,
    last_map: Option<PooledMapID>,
    contents_valid: bool,
    visibility: VisibilitySet,
    writing: WriteState,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum HeldResource {
    None,
    Default,
    Dedicated(PooledMapID),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum WriteState {
    Idle,
    Writing,
    InPass(u32),
}

impl FaceCamera {
    /// Returns the frustum seen by the camera.
    pub fn frustum(&self) -> Frustum<fsc> {
        let orientation = self.face.orientation::<fsc>();
        Frustum::perspective(
            &self.position,
            &orientation.right,
            &orientation.up,
            &orientation.look,
            self.vertical_field_of_view,
            1.0,
            self.near_distance,
            self.far_distance,
        )
    }
}

impl ShadowMapPool {
    /// Creates an empty pool. When `has_default` is `true`, requests that
    /// cannot be served with a dedicated map fall back to a shared default
    /// map.
    pub fn new(has_default: bool) -> Self {
        Self {
            maps: Vec::new(),
            has_default,
        }
    }

    /// Adds `count` maps of the given kind and resolution.
    pub fn add_maps(&mut self, kind: MapKind, resolution: u32, count: usize) {
        self.maps.extend((0..count).map(|_| PooledMap {
            kind,
            resolution,
            in_use: false,
            last_owner: None,
        }));
    }

    pub fn n_maps(&self) -> usize {
        self.maps.len()
    }

    pub fn n_maps_in_use(&self) -> usize {
        self.maps.iter().filter(|map| map.in_use).count()
    }

    /// Frees every map at the start of a frame. Map contents and their last
    /// owners are remembered so owners can reclaim them.
    pub fn begin_frame(&mut self) {
        for map in &mut self.maps {
            map.in_use = false;
        }
    }

    fn map_idx(map: PooledMapID) -> usize {
        map.0 as usize
    }
}

impl TexturePool for ShadowMapPool {
    fn acquire(&mut self, requester: GeneratorKey, resolution: u32) -> PoolAssignment {
        let is_candidate =
            |map: &PooledMap| !map.in_use && map.kind == requester.kind && map.resolution == resolution;

        let previous = self
            .maps
            .iter()
            .position(|map| is_candidate(map) && map.last_owner == Some(requester));

        let (idx, contents_valid) = match previous {
            Some(idx) => (idx, true),
            None => {
                // Prefer maps nobody will want back.
                let free = self
                    .maps
                    .iter()
                    .position(|map| is_candidate(map) && map.last_owner.is_none())
                    .or_else(|| self.maps.iter().position(is_candidate));
                match free {
                    Some(idx) => (idx, false),
                    None if self.has_default => return PoolAssignment::Default,
                    None => return PoolAssignment::Unavailable,
                }
            }
        };

        let map = &mut self.maps[idx];
        map.in_use = true;
        map.last_owner = Some(requester);

        PoolAssignment::Dedicated {
            map: PooledMapID(idx as u32),
            contents_valid,
        }
    }

    fn reclaim(&mut self, requester: GeneratorKey, map: PooledMapID) -> bool {
        match self.maps.get_mut(Self::map_idx(map)) {
            Some(pooled) if pooled.last_owner == Some(requester) => {
                pooled.in_use = true;
                true
            }
            _ => false,
        }
    }

    fn release(&mut self, map: PooledMapID) {
        if let Some(pooled) = self.maps.get_mut(Self::map_idx(map)) {
            pooled.in_use = false;
        }
    }
}

impl PooledShadowGenerator {
    pub fn new(key: GeneratorKey, camera: FaceCamera, resolution: u32) -> Self {
        Self {
            key,
            camera,
            resolution,
            write_pass_count: 1,
            resource: HeldResource::None,
            last_map: None,
            contents_valid: false,
            visibility: VisibilitySet::new(),
            writing: WriteState::Idle,
        }
    }

    pub fn key(&self) -> GeneratorKey {
        self.key
    }

    pub fn set_write_pass_count(&mut self, write_pass_count: u32) {
        self.write_pass_count = write_pass_count.max(1);
    }

    /// Whether a dedicated map is currently held.
    pub fn holds_dedicated_map(&self) -> bool {
        matches!(self.resource, HeldResource::Dedicated(_))
    }

    fn visibility_categories(&self) -> SpatialCategories {
        match self.key.kind {
            MapKind::Shadow => SpatialCategories::SHADOW_CASTER,
            MapKind::Reflectance => SpatialCategories::RENDERABLE,
        }
    }
}

impl ShadowGenerator for PooledShadowGenerator {
    fn assign_resources(&mut self, pool: &mut dyn TexturePool) -> FillResult {
        match self.resource {
            HeldResource::Dedicated(_) => return FillResult::CAN_FILL,
            HeldResource::Default => return FillResult::CANNOT_FILL,
            HeldResource::None => {}
        }
        match pool.acquire(self.key, self.resolution) {
            PoolAssignment::Dedicated {
                map,
                contents_valid,
            } => {
                self.resource = HeldResource::Dedicated(map);
                self.contents_valid = contents_valid && self.last_map == Some(map);
                self.last_map = Some(map);
                FillResult::CAN_FILL
            }
            PoolAssignment::Default => {
                self.resource = HeldResource::Default;
                self.contents_valid = false;
                FillResult::CANNOT_FILL
            }
            PoolAssignment::Unavailable => FillResult::DO_NOTHING,
        }
    }

    fn reassign_resources(&mut self, pool: &mut dyn TexturePool) -> bool {
        let map = match self.resource {
            HeldResource::Dedicated(map) => Some(map),
            HeldResource::Default | HeldResource::None => self.last_map,
        };
        self.resource = HeldResource::None;
        match map {
            Some(map) if pool.reclaim(self.key, map) => {
                self.resource = HeldResource::Dedicated(map);
                true
            }
            _ => {
                self.contents_valid = false;
                false
            }
        }
    }

    fn release_resources(&mut self, pool: &mut dyn TexturePool) {
        if let HeldResource::Dedicated(map) = self.resource {
            pool.release(map);
        }
        self.resource = HeldResource::None;
        self.last_map = None;
        self.contents_valid = false;
    }

    fn contains_renderable_objects(&self) -> bool {
        !self.visibility.is_empty()
    }

    fn should_regenerate(&self) -> bool {
        !self.contents_valid
    }

    fn write_pass_count(&self) -> u32 {
        self.write_pass_count
    }

    fn begin_write(&mut self) -> bool {
        if self.resource == HeldResource::None || self.writing != WriteState::Idle {
            return false;
        }
        self.writing = WriteState::Writing;
        true
    }

    fn begin_write_pass(&mut self, sub_pass: u32) -> bool {
        if self.writing != WriteState::Writing || sub_pass >= self.write_pass_count {
            return false;
        }
        self.writing = WriteState::InPass(sub_pass);
        true
    }

    fn end_write_pass(&mut self) -> bool {
        if !matches!(self.writing, WriteState::InPass(_)) {
            return false;
        }
        self.writing = WriteState::Writing;
        true
    }

    fn end_write(&mut self) -> bool {
        if self.writing != WriteState::Writing {
            return false;
        }
        self.writing = WriteState::Idle;
        // The shared default map is overwritten by other users.
        self.contents_valid = self.holds_dedicated_map();
        true
    }

    fn requires_default_resource(&self) -> bool {
        self.resource == HeldResource::Default
    }

    fn visibility_set(&self) -> &VisibilitySet {
        &self.visibility
    }

    fn compute_visibility_set(&mut self, spatial_index: &dyn SpatialIndex) -> bool {
        let mut visibility = VisibilitySet::new();
        spatial_index.compute_visibility(
            &self.camera.frustum(),
            &mut visibility,
            self.visibility_categories(),
        );
        if visibility != self.visibility {
            self.contents_valid = false;
            self.visibility = visibility;
        }
        !self.visibility.is_empty()
    }

    fn resolution(&self) -> u32 {
        self.resolution
    }

    fn set_resolution(&mut self, resolution: u32) {
        if resolution != self.resolution {
            self.resolution = resolution;
            self.contents_valid = false;
        }
    }

    fn camera(&self) -> &FaceCamera {
        &self.camera
    }

    fn set_camera(&mut self, camera: FaceCamera) {
        if camera != self.camera {
            self.camera = camera;
            self.contents_valid = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::FRAC_PI_2;

    fn key(face: CubemapFace) -> GeneratorKey {
        GeneratorKey {
            light: 1,
            face,
            kind: MapKind::Shadow,
        }
    }

    fn camera(face: CubemapFace) -> FaceCamera {
        FaceCamera {
            position: Point3::origin(),
            face,
            vertical_field_of_view: FRAC_PI_2,
            near_distance: 0.1,
            far_distance: 10.0,
        }
    }

    fn generator(face: CubemapFace) -> PooledShadowGenerator {
        PooledShadowGenerator::new(key(face), camera(face), 256)
    }

    #[test]
    fn empty_pool_without_default_gives_do_nothing() {
        let mut pool = ShadowMapPool::new(false);
        let mut generator = generator(CubemapFace::PositiveX);
        assert_eq!(generator.assign_resources(&mut pool), FillResult::DO_NOTHING);
    }

    #[test]
    fn exhausted_pool_with_default_gives_cannot_fill() {
        let mut pool = ShadowMapPool::new(true);
        pool.add_maps(MapKind::Shadow, 256, 1);
        let mut first = generator(CubemapFace::PositiveX);
        let mut second = generator(CubemapFace::NegativeX);

        assert_eq!(first.assign_resources(&mut pool), FillResult::CAN_FILL);
        assert_eq!(second.assign_resources(&mut pool), FillResult::CANNOT_FILL);
        assert!(second.requires_default_resource());
        assert!(!first.requires_default_resource());
    }

    #[test]
    fn maps_of_other_resolution_are_not_assigned() {
        let mut pool = ShadowMapPool::new(false);
        pool.add_maps(MapKind::Shadow, 512, 1);
        let mut generator = generator(CubemapFace::PositiveX);
        assert_eq!(generator.assign_resources(&mut pool), FillResult::DO_NOTHING);
    }

    #[test]
    fn written_map_is_reclaimed_next_frame_without_regeneration() {
        let mut pool = ShadowMapPool::new(false);
        pool.add_maps(MapKind::Shadow, 256, 1);
        let mut generator = generator(CubemapFace::PositiveY);

        assert_eq!(generator.assign_resources(&mut pool), FillResult::CAN_FILL);
        assert!(generator.should_regenerate());
        assert!(generator.begin_write());
        assert!(generator.begin_write_pass(0));
        assert!(generator.end_write_pass());
        assert!(generator.end_write());
        assert!(!generator.should_regenerate());

        pool.begin_frame();
        assert!(generator.reassign_resources(&mut pool));
        assert_eq!(pool.n_maps_in_use(), 1);
        assert!(!generator.should_regenerate());
    }

    #[test]
    fn map_taken_by_other_generator_cannot_be_reclaimed() {
        let mut pool = ShadowMapPool::new(false);
        pool.add_maps(MapKind::Shadow, 256, 1);
        let mut first = generator(CubemapFace::PositiveX);
        let mut second = generator(CubemapFace::NegativeX);

        first.assign_resources(&mut pool);
        pool.begin_frame();
        assert_eq!(second.assign_resources(&mut pool), FillResult::CAN_FILL);
        assert!(!first.reassign_resources(&mut pool));
        assert!(first.should_regenerate());
    }

    #[test]
    fn released_map_returns_to_pool() {
        let mut pool = ShadowMapPool::new(false);
        pool.add_maps(MapKind::Shadow, 256, 1);
        let mut generator = generator(CubemapFace::PositiveZ);
        generator.assign_resources(&mut pool);
        assert_eq!(pool.n_maps_in_use(), 1);
        generator.release_resources(&mut pool);
        assert_eq!(pool.n_maps_in_use(), 0);
        assert!(!generator.holds_dedicated_map());
    }

    #[test]
    fn write_passes_must_be_nested_in_write() {
        let mut pool = ShadowMapPool::new(false);
        pool.add_maps(MapKind::Shadow, 256, 1);
        let mut generator = generator(CubemapFace::NegativeZ);
        assert!(!generator.begin_write());

        generator.assign_resources(&mut pool);
        assert!(!generator.begin_write_pass(0));
        assert!(generator.begin_write());
        assert!(!generator.begin_write_pass(1));
        assert!(!generator.end_write_pass());
        assert!(generator.begin_write_pass(0));
        assert!(!generator.end_write());
        assert!(generator.end_write_pass());
        assert!(generator.end_write());
    }

    #[test]
    fn moving_camera_invalidates_contents() {
        let mut pool = ShadowMapPool::new(false);
        pool.add_maps(MapKind::Shadow, 256, 1);
        let mut generator = generator(CubemapFace::PositiveX);
        generator.assign_resources(&mut pool);
        generator.begin_write();
        generator.end_write();
        assert!(!generator.should_regenerate());

        let mut moved = *generator.camera();
        moved.position.x += 1.0;
        generator.set_camera(moved);
        assert!(generator.should_regenerate());
    }
}
