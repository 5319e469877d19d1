//! Omnidirectional lights with cube-mapped shadows.

use crate::{
    config::LightingConfig,
    fsc,
    geometry::{CubemapFace, Frustum, Sphere, Transform},
    light::{
        FaceCamera, FillResult, GeneratorKey, LightRenderer, LightingOp, LightingPass, MapKind,
        PassFrustum, PassTracker, PooledShadowGenerator, ShadowGenerator, TexturePool,
        ViewCamera, VolumeQuery,
    },
    scene::{SpatialIndex, VisibilitySet},
};
use anyhow::{Result, bail};
use nalgebra::{Point3, Vector3};
use rand::Rng;
use std::f64::consts::FRAC_PI_2;

/// Distance from the light to the near plane of each face camera.
pub const FACE_NEAR_DISTANCE: fsc = 0.1;

/// Persistent properties of a point light.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct PointLightProperties {
    /// Distance beyond which the light has no effect.
    pub outer_range: fsc,
    /// Distance within which the light has full intensity.
    pub inner_range: fsc,
    /// Factor enlarging the rendered light volume so that its tessellated
    /// shape fully encloses the outer range sphere.
    pub range_adjust: fsc,
    /// Maximum number of shadow map refills per second, or 0 for no limit.
    pub shadow_update_rate: fsc,
    pub edge_process: EdgeProcess,
    /// Whether the light casts shadows.
    pub shadow_source: bool,
    /// Whether the light contributes indirect lighting.
    pub indirect_source: bool,
    /// Number of halvings of the system shadow map resolution specific to
    /// this light.
    pub resolution_adjust: u32,
}

/// How the borders between adjacent cube faces of a shadow map are treated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum EdgeProcess {
    #[default]
    NoProcessing,
    /// Face fields of view are widened by one texel, and after each fill the
    /// border texels of updated faces are patched into their neighbors.
    FullRepair,
}

/// Outcome of [`PointLightNode::reassign_shadow_maps`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShadowMapReassignment {
    /// Every face either kept its previous map or released it.
    ReusedExisting,
    /// At least one face must be assigned a map from the pool.
    NeedsPoolAssignment,
}

/// A face whose border was patched into its neighbors after a fill.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BorderRepair {
    pub face: CubemapFace,
    /// Top, right, bottom and left neighbor.
    pub neighbors: [CubemapFace; 4],
}

/// A light emitting uniformly in all directions from a point, with six
/// shadow map generators and six reflectance map generators covering the
/// faces of a cube around it.
///
/// Shadow fill and lighting are multi-pass cycles. Each cycle is begun with
/// a call returning its pass count, followed by that many strictly paired
/// pass begin and end calls, and concluded with an end call.
#[derive(Debug)]
pub struct PointLightNode {
    reference_id: u32,
    properties: PointLightProperties,
    world_transform: Transform<fsc>,
    shadow_generators: [Box<dyn ShadowGenerator>; 6],
    reflectance_generators: [Box<dyn ShadowGenerator>; 6],
    shadow_resolution: u32,
    shadow_fill: PassTracker,
    lighting: PassTracker,
    indirect_fill: PassTracker,
    indirect_lighting: PassTracker,
    lighting_op: LightingOp,
    indirect_lighting_op: LightingOp,
    lighting_deferred: bool,
    lighting_applies_shadows: bool,
    frustum_updated: [bool; 6],
    maps_updated: bool,
    time_since_last_update: fsc,
    compute_shadows: bool,
    compute_indirect: bool,
    render_set: Option<(MapKind, CubemapFace)>,
    last_border_repairs: Vec<BorderRepair>,
}

enum FillPlan {
    Passes(usize),
    Abort,
}

impl Default for PointLightProperties {
    fn default() -> Self {
        Self {
            outer_range: 10.0,
            inner_range: 0.0,
            range_adjust: 1.1,
            shadow_update_rate: 0.0,
            edge_process: EdgeProcess::NoProcessing,
            shadow_source: true,
            indirect_source: false,
            resolution_adjust: 0,
        }
    }
}

impl PointLightNode {
    /// Creates a light whose generators draw maps of the given resolution
    /// from a [`TexturePool`].
    pub fn new(reference_id: u32, properties: PointLightProperties, shadow_resolution: u32) -> Self {
        let generators = |kind| {
            CubemapFace::all().map(|face| {
                Box::new(PooledShadowGenerator::new(
                    GeneratorKey {
                        light: reference_id,
                        face,
                        kind,
                    },
                    Self::unplaced_camera(face),
                    shadow_resolution,
                )) as Box<dyn ShadowGenerator>
            })
        };
        let shadow_generators = generators(MapKind::Shadow);
        let reflectance_generators = generators(MapKind::Reflectance);
        Self::with_generators(
            reference_id,
            properties,
            shadow_resolution,
            shadow_generators,
            reflectance_generators,
        )
    }

    /// Creates a light using the given generators, indexed by face.
    pub fn with_generators(
        reference_id: u32,
        properties: PointLightProperties,
        shadow_resolution: u32,
        shadow_generators: [Box<dyn ShadowGenerator>; 6],
        reflectance_generators: [Box<dyn ShadowGenerator>; 6],
    ) -> Self {
        let mut light = Self {
            reference_id,
            properties,
            world_transform: Transform::identity(),
            shadow_generators,
            reflectance_generators,
            shadow_resolution,
            shadow_fill: PassTracker::new(),
            lighting: PassTracker::new(),
            indirect_fill: PassTracker::new(),
            indirect_lighting: PassTracker::new(),
            lighting_op: LightingOp::Skip,
            indirect_lighting_op: LightingOp::Skip,
            lighting_deferred: false,
            lighting_applies_shadows: false,
            frustum_updated: [false; 6],
            maps_updated: false,
            time_since_last_update: 0.0,
            compute_shadows: true,
            compute_indirect: true,
            render_set: None,
            last_border_repairs: Vec::new(),
        };
        light.update_face_cameras();
        light
    }

    pub fn reference_id(&self) -> u32 {
        self.reference_id
    }

    pub fn properties(&self) -> &PointLightProperties {
        &self.properties
    }

    /// Replaces the light's properties and refits the face cameras.
    pub fn set_properties(&mut self, properties: PointLightProperties) {
        self.properties = properties;
        self.update_face_cameras();
    }

    pub fn position(&self) -> Point3<fsc> {
        self.world_transform.position()
    }

    pub fn world_transform(&self) -> &Transform<fsc> {
        &self.world_transform
    }

    /// Moves the light, repositioning the cameras of all twelve generators.
    pub fn set_world_transform(&mut self, world_transform: Transform<fsc>) {
        self.world_transform = world_transform;
        self.update_face_cameras();
    }

    /// Starts the shadow refill timer at a random point within one update
    /// period so that lights created together do not refill on the same
    /// frame.
    pub fn stagger_shadow_updates<R: Rng>(&mut self, rng: &mut R) {
        if self.properties.shadow_update_rate > 0.0 {
            let period = 1.0 / self.properties.shadow_update_rate;
            self.time_since_last_update = -rng.random_range(0.0..period);
        }
    }

    /// Returns the transform scaling a unit light shape to the adjusted
    /// outer range.
    pub fn light_shape_transform(&self) -> Transform<fsc> {
        Transform::from_scaling(&Vector3::repeat(self.adjusted_range()))
    }

    pub fn bounding_sphere(&self) -> Sphere<fsc> {
        Sphere::new(self.position(), self.properties.outer_range)
    }

    /// Whether the given point lies within the outer range, enlarged by
    /// `error_radius`.
    pub fn point_in_volume(&self, point: &Point3<fsc>, error_radius: fsc) -> bool {
        self.bounding_sphere()
            .contains_point_with_margin(point, error_radius)
    }

    /// Whether the given frustum may overlap the light's volume.
    pub fn frustum_in_volume(&self, frustum: &Frustum<fsc>) -> bool {
        frustum.intersects_sphere(&self.bounding_sphere())
    }

    /// Whether shadows are cast by the light this frame.
    pub fn is_shadow_source(&self) -> bool {
        self.properties.shadow_source && self.compute_shadows
    }

    /// Whether indirect lighting is produced by the light this frame.
    pub fn is_indirect_source(&self) -> bool {
        self.properties.indirect_source && self.compute_indirect
    }

    pub fn shadow_resolution(&self) -> u32 {
        self.shadow_resolution
    }

    pub fn shadow_generator(&self, face: CubemapFace) -> &dyn ShadowGenerator {
        self.shadow_generators[face.as_idx_usize()].as_ref()
    }

    pub fn reflectance_generator(&self, face: CubemapFace) -> &dyn ShadowGenerator {
        self.reflectance_generators[face.as_idx_usize()].as_ref()
    }

    /// Whether the given face was filled during the last shadow fill cycle.
    pub fn frustum_updated(&self, face: CubemapFace) -> bool {
        self.frustum_updated[face.as_idx_usize()]
    }

    /// Whether any face was filled during the last shadow fill cycle.
    pub fn maps_updated(&self) -> bool {
        self.maps_updated
    }

    /// Returns the border repairs performed when the last shadow fill cycle
    /// ended.
    pub fn last_border_repairs(&self) -> &[BorderRepair] {
        &self.last_border_repairs
    }

    /// Returns the nodes to render during the fill pass in progress.
    pub fn render_set(&self) -> Option<&VisibilitySet> {
        self.render_set.map(|(kind, face)| {
            let generators = match kind {
                MapKind::Shadow => &self.shadow_generators,
                MapKind::Reflectance => &self.reflectance_generators,
            };
            generators[face.as_idx_usize()].visibility_set()
        })
    }

    /// Gathers the shadow casters visible from each face, and the renderable
    /// nodes for each reflectance face if the light is an indirect source.
    /// Shadows are disabled for the frame if no face sees anything.
    ///
    /// # Returns
    /// Whether any face has shadow casters.
    pub fn compute_shadow_sets(&mut self, spatial_index: &dyn SpatialIndex) -> bool {
        let mut any_casters = false;
        if self.properties.shadow_source {
            for generator in &mut self.shadow_generators {
                any_casters |= generator.compute_visibility_set(spatial_index);
            }
        }
        self.compute_shadows = any_casters;

        let mut any_receivers = false;
        if self.properties.indirect_source {
            for generator in &mut self.reflectance_generators {
                any_receivers |= generator.compute_visibility_set(spatial_index);
            }
        }
        self.compute_indirect = any_receivers;

        any_casters
    }

    /// Selects the shadow map resolution for this frame and pushes it to all
    /// generators. Must run after [`compute_shadow_sets`](Self::compute_shadow_sets).
    ///
    /// # Returns
    /// The selected resolution, or [`None`] if the combined resolution
    /// adjustments exceed the maximum, in which case shadows are disabled for
    /// the frame.
    pub fn compute_level_of_detail(&mut self, config: &LightingConfig) -> Option<u32> {
        let adjust = self.properties.resolution_adjust + config.resolution_adjust;
        let Some(resolution_log2) = config.max_shadow_resolution_log2.checked_sub(adjust) else {
            log::debug!(
                "No shadow resolution for light {} with adjustment {}",
                self.reference_id,
                adjust
            );
            self.compute_shadows = false;
            return None;
        };
        let resolution = 1_u32 << resolution_log2.min(31);

        self.shadow_resolution = resolution;
        for generator in self
            .shadow_generators
            .iter_mut()
            .chain(self.reflectance_generators.iter_mut())
        {
            generator.set_resolution(resolution);
        }
        self.update_face_cameras();

        Some(resolution)
    }

    /// Lets each face keep the shadow map it held in the previous frame.
    /// Faces with nothing to render release their map. If the light does not
    /// cast shadows this frame, every face releases its map.
    pub fn reassign_shadow_maps(&mut self, pool: &mut dyn TexturePool) -> ShadowMapReassignment {
        let casts_shadows = self.is_shadow_source();
        Self::reassign_maps(&mut self.shadow_generators, casts_shadows, pool)
    }

    /// Builds the shadow fill pass list for this frame.
    ///
    /// `time_elapsed` is the time since the previous call, feeding the
    /// refill rate limiter.
    ///
    /// # Returns
    /// The number of fill passes, or [`None`] if there is nothing to fill or
    /// some face could not obtain any map. In the latter case no passes are
    /// issued for any face.
    ///
    /// # Errors
    /// Returns an error if a shadow fill cycle is already active.
    pub fn begin_shadow_fill(
        &mut self,
        pool: &mut dyn TexturePool,
        time_elapsed: fsc,
    ) -> Result<Option<usize>> {
        if !self.is_shadow_source() {
            return Ok(None);
        }
        self.shadow_fill.begin()?;

        self.frustum_updated = [false; 6];
        self.maps_updated = false;

        let time_to_update = self.advance_refill_timer(time_elapsed);

        let plan = Self::plan_fill_passes(
            &mut self.shadow_fill,
            &mut self.shadow_generators,
            pool,
            time_to_update,
            |_| true,
        );

        match plan {
            FillPlan::Passes(n_passes) if n_passes > 0 => Ok(Some(n_passes)),
            FillPlan::Abort => {
                log::debug!(
                    "Aborting shadow fill for light {}: shadow map pool exhausted",
                    self.reference_id
                );
                self.end_shadow_fill()?;
                Ok(None)
            }
            FillPlan::Passes(_) => {
                self.end_shadow_fill()?;
                Ok(None)
            }
        }
    }

    /// Begins the fill pass with the given index.
    ///
    /// # Returns
    /// `false` if the face's generator could not begin writing, in which
    /// case the pass is not begun and must not be ended.
    ///
    /// # Errors
    /// Returns an error if the pass cannot be begun in the current state.
    pub fn begin_shadow_fill_pass(&mut self, pass_idx: usize) -> Result<bool> {
        let pass = self.shadow_fill.pass_to_begin(pass_idx)?;
        let face = Self::fill_pass_face(&pass)?;

        if !Self::begin_generator_write(&mut self.shadow_generators, face, pass.sub_pass) {
            return Ok(false);
        }

        self.shadow_fill.mark_begun(pass_idx);
        self.render_set = Some((MapKind::Shadow, face));
        self.frustum_updated[face.as_idx_usize()] = true;
        Ok(true)
    }

    /// Ends the fill pass in progress.
    ///
    /// # Returns
    /// `false` if the face's generator failed to end the pass.
    ///
    /// # Errors
    /// Returns an error if no fill pass is in progress.
    pub fn end_shadow_fill_pass(&mut self) -> Result<bool> {
        let pass = self.shadow_fill.end_pass()?;
        let face = Self::fill_pass_face(&pass)?;
        self.render_set = None;

        if !Self::end_generator_write(&mut self.shadow_generators, face, pass.sub_pass) {
            return Ok(false);
        }
        self.maps_updated |= self.frustum_updated[face.as_idx_usize()];
        Ok(true)
    }

    /// Ends the shadow fill cycle. With [`EdgeProcess::FullRepair`], the
    /// borders of updated faces are patched into their neighbors.
    ///
    /// # Errors
    /// Returns an error if no shadow fill cycle is active.
    pub fn end_shadow_fill(&mut self) -> Result<()> {
        if let Some(pass) = self.shadow_fill.end()? {
            let face = Self::fill_pass_face(&pass)?;
            Self::end_generator_write(&mut self.shadow_generators, face, pass.sub_pass);
            self.render_set = None;
        }

        self.last_border_repairs.clear();
        if self.properties.edge_process == EdgeProcess::FullRepair && self.maps_updated {
            self.repair_shadow_borders();
        }
        Ok(())
    }

    /// Builds the lighting pass list for this frame. Shadows are only applied
    /// if requested and the light casts shadows this frame. Unshadowed
    /// lighting is a single pass over the whole light volume. Shadowed
    /// lighting has one pass per face, preceded by fill passes for faces that
    /// only hold the shared default map.
    ///
    /// # Returns
    /// The number of passes, or [`None`] if some face could not obtain any
    /// map for shadowed lighting.
    ///
    /// # Errors
    /// Returns an error if a lighting cycle is already active.
    pub fn begin_lighting(
        &mut self,
        pool: &mut dyn TexturePool,
        apply_shadows: bool,
        deferred: bool,
    ) -> Result<Option<usize>> {
        self.lighting.begin()?;

        let apply_shadows = apply_shadows && self.is_shadow_source();
        self.lighting_deferred = deferred;
        self.lighting_applies_shadows = apply_shadows;

        if !apply_shadows {
            self.lighting.push(LightingPass::process(PassFrustum::All));
            return Ok(Some(1));
        }

        if Self::plan_lighting_passes(&mut self.lighting, &mut self.shadow_generators, pool) {
            Ok(Some(self.lighting.n_passes()))
        } else {
            log::debug!(
                "Aborting lighting for light {}: shadow map pool exhausted",
                self.reference_id
            );
            self.lighting.end()?;
            Ok(None)
        }
    }

    /// Begins the lighting pass with the given index, issuing the draw
    /// operations for deferred lighting to the renderer.
    ///
    /// # Returns
    /// The operation the caller should perform for the pass.
    ///
    /// # Errors
    /// Returns an error if the pass cannot be begun in the current state.
    pub fn begin_lighting_pass(
        &mut self,
        pass_idx: usize,
        camera: &ViewCamera,
        renderer: &mut dyn LightRenderer,
    ) -> Result<LightingOp> {
        let pass = self.lighting.pass_to_begin(pass_idx)?;

        let op = match (pass.op, pass.frustum) {
            (LightingOp::FillShadowMap, PassFrustum::Face(face)) => {
                if Self::begin_generator_write(&mut self.shadow_generators, face, pass.sub_pass) {
                    self.render_set = Some((MapKind::Shadow, face));
                    LightingOp::FillShadowMap
                } else {
                    LightingOp::Skip
                }
            }
            (LightingOp::ProcessLight, PassFrustum::All) if self.lighting_deferred => {
                let query = self.classify_camera(camera);
                let shape_transform = self.world_transform * self.light_shape_transform();
                renderer.render_light_volume(&shape_transform, query);
                LightingOp::ProcessLight
            }
            (LightingOp::ProcessLight, PassFrustum::Face(face)) if self.lighting_deferred => {
                let query = self.classify_camera_for_face(camera, face);
                let shadow = self
                    .lighting_applies_shadows
                    .then(|| self.shadow_generators[face.as_idx_usize()].as_ref());
                renderer.render_frustum(face, query, shadow);
                LightingOp::ProcessLight
            }
            (LightingOp::ProcessLight, PassFrustum::All) => {
                let shape_transform = self.world_transform * self.light_shape_transform();
                if renderer.begin_forward(&shape_transform) {
                    LightingOp::ProcessLight
                } else {
                    LightingOp::Skip
                }
            }
            (LightingOp::ProcessLight, PassFrustum::Face(face)) => {
                log::debug!(
                    "Skipping forward lighting of face {:?} of light {}: per-face forward lighting is not supported",
                    face,
                    self.reference_id
                );
                LightingOp::Skip
            }
            (LightingOp::FillShadowMap, PassFrustum::All) | (LightingOp::Skip, _) => {
                LightingOp::Skip
            }
        };

        self.lighting.mark_begun(pass_idx);
        self.lighting_op = op;
        Ok(op)
    }

    /// Ends the lighting pass in progress.
    ///
    /// # Errors
    /// Returns an error if no lighting pass is in progress.
    pub fn end_lighting_pass(&mut self, renderer: &mut dyn LightRenderer) -> Result<()> {
        let pass = self.lighting.end_pass()?;
        self.finish_lighting_pass(&pass, renderer);
        Ok(())
    }

    /// Ends the lighting cycle, ending any pass still in progress.
    ///
    /// # Errors
    /// Returns an error if no lighting cycle is active.
    pub fn end_lighting(&mut self, renderer: &mut dyn LightRenderer) -> Result<()> {
        if let Some(pass) = self.lighting.end()? {
            self.finish_lighting_pass(&pass, renderer);
        }
        Ok(())
    }

    /// Lets each reflectance face keep the map it held in the previous
    /// frame. If the light produces no indirect lighting this frame, every
    /// face releases its map.
    pub fn reassign_indirect_maps(&mut self, pool: &mut dyn TexturePool) -> ShadowMapReassignment {
        let is_indirect_source = self.is_indirect_source();
        Self::reassign_maps(&mut self.reflectance_generators, is_indirect_source, pool)
    }

    /// Builds the reflectance fill pass list for this frame. Faces that see
    /// nothing are skipped.
    ///
    /// # Returns
    /// The number of fill passes, or [`None`] if there is nothing to fill or
    /// some face could not obtain any map.
    ///
    /// # Errors
    /// Returns an error if an indirect fill cycle is already active.
    pub fn begin_indirect_fill(&mut self, pool: &mut dyn TexturePool) -> Result<Option<usize>> {
        if !self.is_indirect_source() {
            return Ok(None);
        }
        self.indirect_fill.begin()?;

        let plan = Self::plan_fill_passes(
            &mut self.indirect_fill,
            &mut self.reflectance_generators,
            pool,
            true,
            |generator| !generator.visibility_set().is_empty(),
        );

        match plan {
            FillPlan::Passes(n_passes) if n_passes > 0 => Ok(Some(n_passes)),
            FillPlan::Passes(_) | FillPlan::Abort => {
                self.end_indirect_fill()?;
                Ok(None)
            }
        }
    }

    /// Begins the reflectance fill pass with the given index.
    ///
    /// # Returns
    /// `false` if the face's generator could not begin writing, in which
    /// case the pass is not begun and must not be ended.
    ///
    /// # Errors
    /// Returns an error if the pass cannot be begun in the current state.
    pub fn begin_indirect_fill_pass(&mut self, pass_idx: usize) -> Result<bool> {
        let pass = self.indirect_fill.pass_to_begin(pass_idx)?;
        let face = Self::fill_pass_face(&pass)?;

        if !Self::begin_generator_write(&mut self.reflectance_generators, face, pass.sub_pass) {
            return Ok(false);
        }
        self.indirect_fill.mark_begun(pass_idx);
        self.render_set = Some((MapKind::Reflectance, face));
        Ok(true)
    }

    /// Ends the reflectance fill pass in progress.
    ///
    /// # Errors
    /// Returns an error if no reflectance fill pass is in progress.
    pub fn end_indirect_fill_pass(&mut self) -> Result<bool> {
        let pass = self.indirect_fill.end_pass()?;
        let face = Self::fill_pass_face(&pass)?;
        self.render_set = None;
        Ok(Self::end_generator_write(
            &mut self.reflectance_generators,
            face,
            pass.sub_pass,
        ))
    }

    /// Ends the reflectance fill cycle.
    ///
    /// # Errors
    /// Returns an error if no reflectance fill cycle is active.
    pub fn end_indirect_fill(&mut self) -> Result<()> {
        if let Some(pass) = self.indirect_fill.end()? {
            let face = Self::fill_pass_face(&pass)?;
            Self::end_generator_write(&mut self.reflectance_generators, face, pass.sub_pass);
            self.render_set = None;
        }
        Ok(())
    }

    /// Builds the indirect lighting pass list for this frame: one pass per
    /// face, preceded by fill passes for faces that only hold the shared
    /// default map.
    ///
    /// # Returns
    /// The number of passes, or [`None`] if the light produces no indirect
    /// lighting this frame or some face could not obtain any map.
    ///
    /// # Errors
    /// Returns an error if an indirect lighting cycle is already active.
    pub fn begin_indirect_lighting(
        &mut self,
        pool: &mut dyn TexturePool,
    ) -> Result<Option<usize>> {
        if !self.is_indirect_source() {
            return Ok(None);
        }
        self.indirect_lighting.begin()?;

        if Self::plan_lighting_passes(
            &mut self.indirect_lighting,
            &mut self.reflectance_generators,
            pool,
        ) {
            Ok(Some(self.indirect_lighting.n_passes()))
        } else {
            self.indirect_lighting.end()?;
            Ok(None)
        }
    }

    /// Begins the indirect lighting pass with the given index. Processing
    /// passes begin reading the face's reflectance map.
    ///
    /// # Errors
    /// Returns an error if the pass cannot be begun in the current state.
    pub fn begin_indirect_lighting_pass(&mut self, pass_idx: usize) -> Result<LightingOp> {
        let pass = self.indirect_lighting.pass_to_begin(pass_idx)?;

        let op = match (pass.op, pass.frustum) {
            (LightingOp::FillShadowMap, PassFrustum::Face(face)) => {
                if Self::begin_generator_write(
                    &mut self.reflectance_generators,
                    face,
                    pass.sub_pass,
                ) {
                    self.render_set = Some((MapKind::Reflectance, face));
                    LightingOp::FillShadowMap
                } else {
                    LightingOp::Skip
                }
            }
            (LightingOp::ProcessLight, PassFrustum::Face(face)) => {
                if self.reflectance_generators[face.as_idx_usize()].begin_read() {
                    LightingOp::ProcessLight
                } else {
                    LightingOp::Skip
                }
            }
            _ => LightingOp::Skip,
        };

        self.indirect_lighting.mark_begun(pass_idx);
        self.indirect_lighting_op = op;
        Ok(op)
    }

    /// Ends the indirect lighting pass in progress.
    ///
    /// # Errors
    /// Returns an error if no indirect lighting pass is in progress.
    pub fn end_indirect_lighting_pass(&mut self) -> Result<()> {
        let pass = self.indirect_lighting.end_pass()?;
        self.finish_indirect_lighting_pass(&pass);
        Ok(())
    }

    /// Ends the indirect lighting cycle.
    ///
    /// # Errors
    /// Returns an error if no indirect lighting cycle is active.
    pub fn end_indirect_lighting(&mut self) -> Result<()> {
        if let Some(pass) = self.indirect_lighting.end()? {
            self.finish_indirect_lighting_pass(&pass);
        }
        Ok(())
    }

    fn adjusted_range(&self) -> fsc {
        self.properties.outer_range * self.properties.range_adjust
    }

    fn advance_refill_timer(&mut self, time_elapsed: fsc) -> bool {
        let rate = self.properties.shadow_update_rate;
        if rate <= 0.0 {
            return true;
        }
        self.time_since_last_update += time_elapsed;
        if self.time_since_last_update < 1.0 / rate {
            false
        } else {
            self.time_since_last_update = 0.0;
            true
        }
    }

    fn face_field_of_view(&self) -> fsc {
        let half_resolution = fsc::from(self.shadow_resolution) * 0.5;
        if self.properties.edge_process == EdgeProcess::NoProcessing || half_resolution <= 1.0 {
            FRAC_PI_2
        } else {
            // Widen by one texel so that adjacent faces overlap at the border.
            2.0 * (1.0 / (1.0 - 1.0 / half_resolution)).atan()
        }
    }

    fn unplaced_camera(face: CubemapFace) -> FaceCamera {
        FaceCamera {
            position: Point3::origin(),
            face,
            vertical_field_of_view: FRAC_PI_2,
            near_distance: FACE_NEAR_DISTANCE,
            far_distance: 1.0,
        }
    }

    fn update_face_cameras(&mut self) {
        let position = self.position();
        let vertical_field_of_view = self.face_field_of_view();
        let far_distance = self.properties.outer_range.max(2.0 * FACE_NEAR_DISTANCE);

        for (idx, face) in CubemapFace::all().into_iter().enumerate() {
            let camera = FaceCamera {
                position,
                face,
                vertical_field_of_view,
                near_distance: FACE_NEAR_DISTANCE,
                far_distance,
            };
            self.shadow_generators[idx].set_camera(camera);
            self.reflectance_generators[idx].set_camera(camera);
        }
    }

    fn classify_camera(&self, camera: &ViewCamera) -> VolumeQuery {
        if self.point_in_volume(&camera.position, 0.0) {
            VolumeQuery::Inside
        } else if camera
            .clipping_volume
            .intersects_sphere(&Sphere::new(self.position(), self.adjusted_range()))
        {
            VolumeQuery::Intersect
        } else {
            VolumeQuery::Outside
        }
    }

    fn classify_camera_for_face(&self, camera: &ViewCamera, face: CubemapFace) -> VolumeQuery {
        let face_frustum = FaceCamera {
            far_distance: self.adjusted_range(),
            ..*self.shadow_generators[face.as_idx_usize()].camera()
        }
        .frustum();

        if face_frustum.contains_point(&camera.position) {
            VolumeQuery::Inside
        } else if camera
            .clipping_volume
            .intersects_sphere(&Sphere::new(self.position(), self.adjusted_range()))
        {
            VolumeQuery::Intersect
        } else {
            VolumeQuery::Outside
        }
    }

    fn repair_shadow_borders(&mut self) {
        self.last_border_repairs = CubemapFace::all()
            .into_iter()
            .filter(|face| self.frustum_updated[face.as_idx_usize()])
            .map(|face| BorderRepair {
                face,
                neighbors: face.neighbors(),
            })
            .collect();

        log::debug!(
            "Repaired shadow map borders of {} faces for light {}",
            self.last_border_repairs.len(),
            self.reference_id
        );
    }

    fn finish_lighting_pass(&mut self, pass: &LightingPass, renderer: &mut dyn LightRenderer) {
        match (self.lighting_op, pass.frustum) {
            (LightingOp::FillShadowMap, PassFrustum::Face(face)) => {
                Self::end_generator_write(&mut self.shadow_generators, face, pass.sub_pass);
                self.render_set = None;
            }
            (LightingOp::ProcessLight, PassFrustum::All) if !self.lighting_deferred => {
                renderer.end_forward();
            }
            _ => {}
        }
        self.lighting_op = LightingOp::Skip;
    }

    fn finish_indirect_lighting_pass(&mut self, pass: &LightingPass) {
        match (self.indirect_lighting_op, pass.frustum) {
            (LightingOp::FillShadowMap, PassFrustum::Face(face)) => {
                Self::end_generator_write(&mut self.reflectance_generators, face, pass.sub_pass);
                self.render_set = None;
            }
            (LightingOp::ProcessLight, PassFrustum::Face(face)) => {
                self.reflectance_generators[face.as_idx_usize()].end_read();
            }
            _ => {}
        }
        self.indirect_lighting_op = LightingOp::Skip;
    }

    fn reassign_maps(
        generators: &mut [Box<dyn ShadowGenerator>; 6],
        is_source: bool,
        pool: &mut dyn TexturePool,
    ) -> ShadowMapReassignment {
        if !is_source {
            for generator in generators.iter_mut() {
                generator.release_resources(pool);
            }
            return ShadowMapReassignment::ReusedExisting;
        }

        let mut result = ShadowMapReassignment::ReusedExisting;
        for generator in generators.iter_mut() {
            if !generator.contains_renderable_objects() {
                generator.release_resources(pool);
                continue;
            }
            if !generator.reassign_resources(pool) {
                result = ShadowMapReassignment::NeedsPoolAssignment;
            }
        }
        result
    }

    fn plan_fill_passes(
        tracker: &mut PassTracker,
        generators: &mut [Box<dyn ShadowGenerator>; 6],
        pool: &mut dyn TexturePool,
        time_to_update: bool,
        include: impl Fn(&dyn ShadowGenerator) -> bool,
    ) -> FillPlan {
        for (idx, face) in CubemapFace::all().into_iter().enumerate() {
            let generator = &mut generators[idx];
            if !include(generator.as_ref()) {
                continue;
            }

            let result = generator.assign_resources(pool);
            if result.contains(FillResult::DO_NOTHING) {
                return FillPlan::Abort;
            }
            if result.contains(FillResult::CANNOT_FILL)
                || !generator.should_regenerate()
                || !time_to_update
            {
                continue;
            }

            for sub_pass in 0..generator.write_pass_count() {
                tracker.push(LightingPass::fill(face, sub_pass));
            }
        }
        FillPlan::Passes(tracker.n_passes())
    }

    fn plan_lighting_passes(
        tracker: &mut PassTracker,
        generators: &mut [Box<dyn ShadowGenerator>; 6],
        pool: &mut dyn TexturePool,
    ) -> bool {
        for (idx, face) in CubemapFace::all().into_iter().enumerate() {
            let generator = &mut generators[idx];
            if generator.assign_resources(pool).contains(FillResult::DO_NOTHING) {
                return false;
            }
            if generator.requires_default_resource() {
                for sub_pass in 0..generator.write_pass_count() {
                    tracker.push(LightingPass::fill(face, sub_pass));
                }
            }
            tracker.push(LightingPass::process(PassFrustum::Face(face)));
        }
        true
    }

    fn fill_pass_face(pass: &LightingPass) -> Result<CubemapFace> {
        match pass.frustum {
            PassFrustum::Face(face) => Ok(face),
            PassFrustum::All => bail!("Fill pass does not name a cube face"),
        }
    }

    fn begin_generator_write(
        generators: &mut [Box<dyn ShadowGenerator>; 6],
        face: CubemapFace,
        sub_pass: u32,
    ) -> bool {
        let generator = &mut generators[face.as_idx_usize()];
        if sub_pass == 0 && !generator.begin_write() {
            return false;
        }
        if generator.begin_write_pass(sub_pass) {
            true
        } else {
            if sub_pass == 0 {
                generator.end_write();
            }
            false
        }
    }

    fn end_generator_write(
        generators: &mut [Box<dyn ShadowGenerator>; 6],
        face: CubemapFace,
        sub_pass: u32,
    ) -> bool {
        let generator = &mut generators[face.as_idx_usize()];
        if !generator.end_write_pass() {
            return false;
        }
        if sub_pass + 1 == generator.write_pass_count() {
            generator.end_write();
        }
        true
    }
}
