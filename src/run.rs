//! Running a small demo scene through update, shadow fill and lighting.

use crate::{
    config::Config,
    context::ApplicationContext,
    fsc,
    geometry::{AxisAlignedBox, CubemapFace, Frustum, Transform},
    light::{
        LightRenderer, LightingOp, MapKind, PointLightProperties, ShadowGenerator, ShadowMapPool,
        ViewCamera, VolumeQuery,
    },
    scene::{Motion, NodeID, ObjectProperties, Scene, UpdateRate},
};
use anyhow::{Context, Result};
use nalgebra::{Point3, Vector3, point, vector};
use std::f64::consts::FRAC_PI_2;

/// Simulated time between consecutive frames, in seconds.
pub const FRAME_DURATION: fsc = 1.0 / 60.0;

const CAMERA_NEAR_DISTANCE: fsc = 0.1;

/// Counts of the work performed while running frames.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub n_frames: usize,
    pub n_fill_passes: usize,
    pub n_lighting_passes: usize,
    /// Number of times a light was left unlit for a frame because the shadow
    /// map pool could not serve it.
    pub n_lights_skipped: usize,
}

/// Renderer that only logs and counts the operations it is asked to
/// perform.
#[derive(Debug, Default)]
pub struct LoggingRenderer {
    n_volumes: usize,
    n_frusta: usize,
    n_forward: usize,
}

pub fn run(config: Config, n_frames: usize) -> Result<()> {
    init_logging()?;
    let summary = run_frames(config, n_frames)?;
    log::info!(
        "Ran {} frames: {} fill passes, {} lighting passes, {} lights skipped",
        summary.n_frames,
        summary.n_fill_passes,
        summary.n_lighting_passes,
        summary.n_lights_skipped
    );
    Ok(())
}

/// Builds the demo scene and runs the given number of frames on it.
///
/// # Errors
/// Returns an error if the configuration is invalid or a light processing
/// cycle is driven out of order.
pub fn run_frames(config: Config, n_frames: usize) -> Result<RunSummary> {
    let mut context = ApplicationContext::new(config)?;
    let mut scene = context.create_scene();
    build_demo_scene(&mut scene).context("Failed to build demo scene")?;

    let lighting = &context.config().lighting;
    let mut pool = ShadowMapPool::new(lighting.has_default_shadow_map);
    if let Some(resolution_log2) = lighting
        .max_shadow_resolution_log2
        .checked_sub(lighting.resolution_adjust)
    {
        pool.add_maps(
            MapKind::Shadow,
            1 << resolution_log2,
            lighting.shadow_map_pool_size,
        );
    }

    let camera = view_camera(point![0.0, 3.0, 12.0]);
    let mut renderer = LoggingRenderer::default();
    let mut summary = RunSummary::default();

    for frame in 0..n_frames {
        let time = frame as fsc * FRAME_DURATION;
        scene.update(time)?;
        scene.resolve_pending_updates();
        pool.begin_frame();

        for light_id in scene.point_lights() {
            process_light(
                &mut scene,
                light_id,
                &mut pool,
                &camera,
                &mut renderer,
                &mut summary,
            )?;
        }
        summary.n_frames += 1;
    }

    log::debug!(
        "Renderer drew {} light volumes, {} face frusta and {} forward lights",
        renderer.n_volumes,
        renderer.n_frusta,
        renderer.n_forward
    );
    context.shutdown();

    Ok(summary)
}

fn init_logging() -> Result<()> {
    env_logger::init();
    Ok(())
}

fn build_demo_scene(scene: &mut Scene) -> Result<()> {
    scene.create_object_node(
        ObjectProperties::Mesh {
            bounds: AxisAlignedBox::new(point![-5.0, -0.5, -5.0], point![5.0, 0.5, 5.0]),
        },
        Transform::identity(),
    )?;

    let rig = scene.create_object_node(
        ObjectProperties::Group,
        Transform::from_translation(&vector![0.0, 1.0, 0.0]),
    )?;

    let spinner = scene.create_object_node(
        ObjectProperties::Actor {
            bounds: AxisAlignedBox::new(point![-0.5, -0.5, -0.5], point![0.5, 0.5, 0.5]),
            motion: Motion {
                velocity: vector![0.5, 0.0, 0.0],
                angular_velocity: vector![0.0, 1.0, 0.0],
            },
        },
        Transform::from_translation(&vector![0.0, 2.0, 0.0]),
    )?;
    scene.set_parent(spinner, Some(rig))?;
    scene.set_owner_group(spinner, Some(rig))?;
    scene.set_update_rate(spinner, UpdateRate::Always)?;

    let light = scene.create_object_node(
        ObjectProperties::PointLight(PointLightProperties {
            outer_range: 10.0,
            inner_range: 2.0,
            shadow_source: true,
            ..PointLightProperties::default()
        }),
        Transform::from_translation(&vector![0.0, 4.0, 0.0]),
    )?;
    scene.set_name(light, Some("key_light".to_string()))?;

    Ok(())
}

fn view_camera(position: Point3<fsc>) -> ViewCamera {
    ViewCamera {
        position,
        clipping_volume: Frustum::perspective(
            &position,
            &Vector3::x(),
            &Vector3::y(),
            &(-Vector3::z()),
            FRAC_PI_2,
            1.0,
            0.01 * CAMERA_NEAR_DISTANCE,
            CAMERA_NEAR_DISTANCE,
        ),
    }
}

fn process_light(
    scene: &mut Scene,
    light_id: NodeID,
    pool: &mut ShadowMapPool,
    camera: &ViewCamera,
    renderer: &mut LoggingRenderer,
    summary: &mut RunSummary,
) -> Result<()> {
    scene.compute_light_shadow_sets(light_id);
    scene.compute_light_level_of_detail(light_id);

    let Some(light) = scene.point_light_mut(light_id) else {
        return Ok(());
    };
    light.reassign_shadow_maps(pool);

    if let Some(n_passes) = light.begin_shadow_fill(pool, FRAME_DURATION)? {
        for pass_idx in 0..n_passes {
            if !light.begin_shadow_fill_pass(pass_idx)? {
                continue;
            }
            log::trace!(
                "Filling shadow map with {} casters",
                light.render_set().map_or(0, |set| set.len())
            );
            light.end_shadow_fill_pass()?;
            summary.n_fill_passes += 1;
        }
        light.end_shadow_fill()?;
    }

    let Some(n_passes) = light.begin_lighting(pool, true, true)? else {
        summary.n_lights_skipped += 1;
        return Ok(());
    };
    for pass_idx in 0..n_passes {
        match light.begin_lighting_pass(pass_idx, camera, renderer)? {
            LightingOp::FillShadowMap => summary.n_fill_passes += 1,
            LightingOp::ProcessLight => summary.n_lighting_passes += 1,
            LightingOp::Skip => {}
        }
        light.end_lighting_pass(renderer)?;
    }
    light.end_lighting(renderer)
}

impl LightRenderer for LoggingRenderer {
    fn render_light_volume(&mut self, shape_transform: &Transform<fsc>, query: VolumeQuery) {
        log::trace!(
            "Rendering light volume at {:?} ({:?})",
            shape_transform.position(),
            query
        );
        self.n_volumes += 1;
    }

    fn render_frustum(
        &mut self,
        face: CubemapFace,
        query: VolumeQuery,
        shadow: Option<&dyn ShadowGenerator>,
    ) {
        log::trace!(
            "Rendering face {:?} ({:?}) with {} shadow casters",
            face,
            query,
            shadow.map_or(0, |generator| generator.visibility_set().len())
        );
        self.n_frusta += 1;
    }

    fn begin_forward(&mut self, _shape_transform: &Transform<fsc>) -> bool {
        self.n_forward += 1;
        true
    }

    fn end_forward(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demo_frames_fill_shadows_and_light_every_frame() {
        let summary = run_frames(Config::default(), 3).unwrap();
        assert_eq!(summary.n_frames, 3);
        assert!(summary.n_fill_passes > 0);
        assert!(summary.n_lighting_passes >= 3);
        assert_eq!(summary.n_lights_skipped, 0);
    }

    #[test]
    fn empty_pool_without_default_skips_light() {
        let mut config = Config::default();
        config.lighting.shadow_map_pool_size = 0;
        config.lighting.has_default_shadow_map = false;

        let summary = run_frames(config, 2).unwrap();
        assert_eq!(summary.n_lights_skipped, 2);
        assert_eq!(summary.n_fill_passes, 0);
        assert_eq!(summary.n_lighting_passes, 0);
    }

    #[test]
    fn zero_frames_do_nothing() {
        assert_eq!(run_frames(Config::default(), 0).unwrap(), RunSummary::default());
    }
}
