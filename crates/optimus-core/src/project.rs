//! Tenancy primitives: projects and namespaces.
//!
//! A project is the tenant root. Every job belongs to exactly one namespace,
//! and every namespace belongs to exactly one project. Project and namespace
//! configuration maps are opaque key/value pairs handed to plugins.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A tenant root, unique by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectSpec {
    /// Globally unique project name.
    pub name: String,
    /// Opaque project-level configuration passed through to plugins.
    pub config: BTreeMap<String, String>,
}

impl ProjectSpec {
    /// Creates a project with the given name and no configuration.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: BTreeMap::new(),
        }
    }

    /// Adds a configuration entry, builder style.
    #[must_use]
    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }
}

/// A deployment namespace within a project.
///
/// Namespaces partition a project's jobs for deployment; the external
/// scheduler is addressed per namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceSpec {
    /// Namespace name, unique within its project.
    pub name: String,
    /// Opaque namespace-level configuration.
    pub config: BTreeMap<String, String>,
}

impl NamespaceSpec {
    /// Creates a namespace with the given name and no configuration.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: BTreeMap::new(),
        }
    }
}
