//! Configuration parameters for scenes and lighting.

use crate::{fsc, light::EdgeProcess};
use anyhow::{Result, bail};

#[cfg(feature = "serde")]
use anyhow::Context;
#[cfg(feature = "serde")]
use std::path::Path;

/// Largest supported base-2 logarithm of the shadow map resolution.
pub const MAX_SHADOW_RESOLUTION_LOG2: u32 = 14;

/// Top-level configuration.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct Config {
    pub scene: SceneConfig,
    pub lighting: LightingConfig,
}

/// Configuration parameters for a [`Scene`](crate::scene::Scene).
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct SceneConfig {
    /// Extents of a scene cell along each axis.
    pub cell_size: [fsc; 3],
    /// Number of nodes the pending update queue can hold before the oldest
    /// entry is resolved eagerly.
    pub pending_update_capacity: usize,
    /// Whether the scene is being authored. Only then are node changes
    /// persisted and cells created or destroyed.
    pub writing_enabled: bool,
    /// Upper limit on the time step passed to node updates, in seconds.
    pub max_update_delta: fsc,
    /// Half extent of the region the default spatial index accepts nodes
    /// in. Unlimited if [`None`].
    pub spatial_index_extent: Option<fsc>,
}

/// Configuration parameters for point light shadowing.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct LightingConfig {
    pub max_shadow_resolution_log2: u32,
    /// Number of halvings applied to every light's shadow resolution.
    pub resolution_adjust: u32,
    /// [`EdgeProcess::NoProcessing`] disables border handling for all
    /// lights regardless of their own setting.
    pub shadow_map_edge_process: EdgeProcess,
    /// Number of maps of each kind in the shadow map pool.
    pub shadow_map_pool_size: usize,
    pub has_default_shadow_map: bool,
}

impl Config {
    /// Checks that all parameters have sensible values.
    ///
    /// # Errors
    /// Returns an error naming the first invalid parameter.
    pub fn validate(&self) -> Result<()> {
        self.scene.validate()?;
        self.lighting.validate()
    }

    /// Parses and validates the configuration in the given RON file.
    /// Missing fields take their default values.
    ///
    /// # Errors
    /// Returns an error if the file can not be read or parsed, or if the
    /// configuration is invalid.
    #[cfg(feature = "serde")]
    pub fn from_ron_file(file_path: impl AsRef<Path>) -> Result<Self> {
        let file_path = file_path.as_ref();
        let config: Self = crate::io::parse_ron_file(file_path)?;
        config
            .validate()
            .with_context(|| format!("Invalid configuration in {}", file_path.display()))?;
        Ok(config)
    }

    /// Parses and validates a configuration from a RON string.
    ///
    /// # Errors
    /// See [`Self::from_ron_file`].
    #[cfg(feature = "serde")]
    pub fn from_ron_str(text: &str) -> Result<Self> {
        let config: Self = ron::from_str(text).context("Invalid configuration syntax")?;
        config.validate()?;
        Ok(config)
    }

    /// Writes the configuration to the given path as RON.
    ///
    /// # Errors
    /// Returns an error if the file can not be written.
    #[cfg(feature = "serde")]
    pub fn write_ron_file(&self, output_file_path: impl AsRef<Path>) -> Result<()> {
        crate::io::write_ron_file(self, output_file_path)
    }
}

impl SceneConfig {
    fn validate(&self) -> Result<()> {
        if self
            .cell_size
            .iter()
            .any(|&size| !size.is_finite() || size <= 0.0)
        {
            bail!("Cell size must be positive and finite, got {:?}", self.cell_size);
        }
        if self.pending_update_capacity == 0 {
            bail!("Pending update capacity must be at least one");
        }
        if !(self.max_update_delta > 0.0) {
            bail!(
                "Maximum update delta must be positive, got {}",
                self.max_update_delta
            );
        }
        if let Some(extent) = self.spatial_index_extent {
            if !(extent > 0.0) {
                bail!("Spatial index extent must be positive, got {}", extent);
            }
        }
        Ok(())
    }
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            cell_size: [100.0; 3],
            pending_update_capacity: 1024,
            writing_enabled: false,
            max_update_delta: 1.0,
            spatial_index_extent: None,
        }
    }
}

impl LightingConfig {
    fn validate(&self) -> Result<()> {
        if self.max_shadow_resolution_log2 > MAX_SHADOW_RESOLUTION_LOG2 {
            bail!(
                "Shadow map resolution 2^{} exceeds the maximum of 2^{}",
                self.max_shadow_resolution_log2,
                MAX_SHADOW_RESOLUTION_LOG2
            );
        }
        Ok(())
    }
}

impl Default for LightingConfig {
    fn default() -> Self {
        Self {
            max_shadow_resolution_log2: 10,
            resolution_adjust: 0,
            shadow_map_edge_process: EdgeProcess::FullRepair,
            shadow_map_pool_size: 12,
            has_default_shadow_map: true,
        }
    }
}
