//! The plugin surface consumed by the engine.
//!
//! Task and hook implementations live in separate plugin binaries spoken to
//! over RPC; only the capabilities the core consumes at resolution time are
//! modeled here: plugin metadata and the dependency-resolver capability
//! (destination and dependency generation). The interactive authoring
//! surface belongs to the CLI collaborator and is out of scope.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;

use optimus_core::job::{JobAsset, JobConfigEntry};
use optimus_core::project::ProjectSpec;

use crate::error::Result;

/// Whether a plugin implements a task or a hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginType {
    /// The unit of work a job executes.
    Task,
    /// A hook running around a task.
    Hook,
}

/// When a hook plugin runs relative to its task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookType {
    /// Before the task.
    Pre,
    /// After the task succeeds.
    Post,
    /// After the task fails.
    Fail,
}

/// Optional capabilities a plugin advertises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PluginMod {
    /// Interactive authoring support (questions, defaults, asset compilation).
    Cli,
    /// Destination and dependency generation.
    DependencyResolver,
}

/// Plugin metadata reported by `plugin_info`.
#[derive(Debug, Clone)]
pub struct PluginInfo {
    /// Unique plugin handle.
    pub name: String,
    /// Task or hook.
    pub plugin_type: PluginType,
    /// Hook phase; only meaningful for hooks.
    pub hook_type: Option<HookType>,
    /// Advertised capabilities.
    pub mods: BTreeSet<PluginMod>,
    /// Plugin version string.
    pub version: String,
    /// Container image the plugin executes in.
    pub image: String,
    /// Secret mount path, if the plugin needs credentials.
    pub secret_path: Option<String>,
    /// For hooks: names of hooks this one runs after.
    pub depends_on: Vec<String>,
}

impl PluginInfo {
    /// Returns true if the plugin advertises the dependency-resolver mod.
    #[must_use]
    pub fn supports_dependency_resolution(&self) -> bool {
        self.mods.contains(&PluginMod::DependencyResolver)
    }
}

/// Request payload for destination and dependency generation.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    /// The job's task (or hook) configuration.
    pub config: Vec<JobConfigEntry>,
    /// The job's asset files.
    pub assets: Vec<JobAsset>,
    /// The owning project, including its configuration.
    pub project: ProjectSpec,
}

/// A destination emitted by a task plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedDestination {
    /// Opaque destination URN.
    pub urn: String,
    /// Destination kind (e.g. `bigquery`).
    pub kind: String,
}

/// The base capability every plugin implements.
#[async_trait]
pub trait BasePlugin: Send + Sync {
    /// Reports plugin metadata.
    async fn plugin_info(&self) -> Result<PluginInfo>;
}

/// The dependency-resolver capability.
#[async_trait]
pub trait DependencyResolverMod: BasePlugin {
    /// Returns the destination URN the task writes to.
    async fn generate_destination(&self, request: GenerateRequest) -> Result<GeneratedDestination>;

    /// Returns the destination URNs the task reads from.
    async fn generate_dependencies(&self, request: GenerateRequest) -> Result<Vec<String>>;
}

/// A registered plugin: metadata plus its optional resolver capability.
#[derive(Clone)]
pub struct PluginEntry {
    /// Plugin metadata.
    pub info: PluginInfo,
    /// The dependency-resolver capability, if advertised.
    pub dependency_mod: Option<Arc<dyn DependencyResolverMod>>,
}

impl std::fmt::Debug for PluginEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginEntry")
            .field("info", &self.info)
            .field("dependency_mod", &self.dependency_mod.is_some())
            .finish()
    }
}

/// Registry of plugins keyed by handle.
///
/// Specs reference plugins by name; the registry is the only place trait
/// objects live, keeping [`optimus_core::job::JobSpec`] plain data.
#[derive(Debug, Default)]
pub struct PluginRegistry {
    plugins: HashMap<String, PluginEntry>,
}

impl PluginRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a plugin under its metadata name.
    pub fn register(&mut self, entry: PluginEntry) {
        self.plugins.insert(entry.info.name.clone(), entry);
    }

    /// Looks up a plugin by handle.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&PluginEntry> {
        self.plugins.get(name)
    }

    /// Returns the resolver capability of a plugin, if registered and advertised.
    #[must_use]
    pub fn dependency_mod(&self, name: &str) -> Option<Arc<dyn DependencyResolverMod>> {
        self.plugins.get(name).and_then(|entry| {
            entry
                .info
                .supports_dependency_resolution()
                .then(|| entry.dependency_mod.clone())
                .flatten()
        })
    }
}
