//! Process-wide state owned by the application.

use crate::{config::Config, scene::Scene};
use anyhow::{Result, bail};
use std::{collections::HashMap, fmt};

/// Owns the state that is shared by every scene in the application.
#[derive(Debug)]
pub struct ApplicationContext {
    config: Config,
    input_channels: InputChannelRegistry,
    n_scenes_created: usize,
}

/// Maps input channel names to handles.
///
/// Handles are never reused within a registry, so a handle held after its
/// channel was unregistered can not alias a later channel.
#[derive(Debug, Default)]
pub struct InputChannelRegistry {
    handles: HashMap<String, InputChannelID>,
    names: HashMap<InputChannelID, String>,
    next_handle: u32,
}

/// Handle to a named input channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InputChannelID(u32);

impl ApplicationContext {
    /// Creates a context using the given configuration.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        log::debug!("Creating application context");
        Ok(Self {
            config,
            input_channels: InputChannelRegistry::new(),
            n_scenes_created: 0,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn input_channels(&self) -> &InputChannelRegistry {
        &self.input_channels
    }

    pub fn input_channels_mut(&mut self) -> &mut InputChannelRegistry {
        &mut self.input_channels
    }

    /// Creates an empty scene configured from this context.
    pub fn create_scene(&mut self) -> Scene {
        self.n_scenes_created += 1;
        Scene::new(self.config.scene.clone(), self.config.lighting.clone())
    }

    pub fn n_scenes_created(&self) -> usize {
        self.n_scenes_created
    }

    /// Tears down the context, releasing every registered input channel.
    pub fn shutdown(mut self) {
        let n_channels = self.input_channels.n_channels();
        self.input_channels.clear();
        log::debug!(
            "Shut down application context ({} scenes created, {} input channels released)",
            self.n_scenes_created,
            n_channels
        );
    }
}

impl InputChannelRegistry {
    pub fn new() -> Self {
        Self {
            handles: HashMap::new(),
            names: HashMap::new(),
            next_handle: 1,
        }
    }

    pub fn n_channels(&self) -> usize {
        self.handles.len()
    }

    /// Returns the handle of the channel with the given name, registering
    /// the channel if it is not already present.
    ///
    /// # Errors
    /// Returns an error if the name is empty or the handle space is
    /// exhausted.
    pub fn register(&mut self, name: &str) -> Result<InputChannelID> {
        if name.is_empty() {
            bail!("Input channel name can not be empty");
        }
        if let Some(&handle) = self.handles.get(name) {
            return Ok(handle);
        }
        if self.next_handle == u32::MAX {
            bail!("No input channel handles left");
        }
        let handle = InputChannelID(self.next_handle);
        self.next_handle += 1;

        self.handles.insert(name.to_string(), handle);
        self.names.insert(handle, name.to_string());
        Ok(handle)
    }

    pub fn lookup(&self, name: &str) -> Option<InputChannelID> {
        self.handles.get(name).copied()
    }

    pub fn name(&self, handle: InputChannelID) -> Option<&str> {
        self.names.get(&handle).map(String::as_str)
    }

    /// Removes the channel with the given name.
    ///
    /// # Returns
    /// The handle the channel had, or [`None`] if it was not registered.
    pub fn unregister(&mut self, name: &str) -> Option<InputChannelID> {
        let handle = self.handles.remove(name)?;
        self.names.remove(&handle);
        Some(handle)
    }

    fn clear(&mut self) {
        self.handles.clear();
        self.names.clear();
    }
}

impl fmt::Display for InputChannelID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "input channel {}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registering_same_name_twice_gives_same_handle() {
        let mut registry = InputChannelRegistry::new();
        let forward = registry.register("move_forward").unwrap();
        let jump = registry.register("jump").unwrap();

        assert_ne!(forward, jump);
        assert_eq!(registry.register("move_forward").unwrap(), forward);
        assert_eq!(registry.n_channels(), 2);
        assert_eq!(registry.lookup("jump"), Some(jump));
        assert_eq!(registry.name(forward), Some("move_forward"));
    }

    #[test]
    fn empty_name_is_rejected() {
        let mut registry = InputChannelRegistry::new();
        assert!(registry.register("").is_err());
        assert_eq!(registry.n_channels(), 0);
    }

    #[test]
    fn unregistered_handles_are_never_reused() {
        let mut registry = InputChannelRegistry::new();
        let first = registry.register("fire").unwrap();
        assert_eq!(registry.unregister("fire"), Some(first));
        assert_eq!(registry.unregister("fire"), None);
        assert!(registry.lookup("fire").is_none());
        assert!(registry.name(first).is_none());

        let second = registry.register("fire").unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn separate_contexts_have_independent_registries() {
        let mut a = ApplicationContext::new(Config::default()).unwrap();
        let mut b = ApplicationContext::new(Config::default()).unwrap();

        let handle = a.input_channels_mut().register("zoom").unwrap();
        assert!(b.input_channels().lookup("zoom").is_none());
        assert_eq!(b.input_channels_mut().register("other").unwrap(), handle);

        a.shutdown();
        assert!(b.input_channels().lookup("other").is_some());
        b.shutdown();
    }

    #[test]
    fn context_rejects_invalid_config() {
        let mut config = Config::default();
        config.scene.max_update_delta = 0.0;
        assert!(ApplicationContext::new(config).is_err());
    }

    #[test]
    fn created_scenes_use_context_config() {
        let mut config = Config::default();
        config.scene.writing_enabled = true;
        let mut context = ApplicationContext::new(config).unwrap();

        let scene = context.create_scene();
        assert!(scene.config().writing_enabled);
        assert_eq!(context.n_scenes_created(), 1);
    }
}
