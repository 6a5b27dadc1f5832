//! Named subagent descriptors.
//!
//! The built-in descriptors are defined in `subagents.toml` and embedded in
//! the binary at compile time.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::RuntimeKind;

/// A named specialist a task can be routed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubagentDescriptor {
    pub name: String,
    pub description: String,
    pub system_prompt: String,
    #[serde(default)]
    pub tools: Vec<String>,
    /// Internal subagents are hidden from callers unless policy allows them.
    #[serde(default)]
    pub internal: bool,
    /// Slow subagents get the longer deadline.
    #[serde(default)]
    pub slow: bool,
    /// Per-subagent override of the engine runtime.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<RuntimeKind>,
}

impl SubagentDescriptor {
    /// A bare descriptor, mostly for tests.
    pub fn named(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            description: format!("{name} subagent"),
            system_prompt: String::new(),
            name,
            tools: Vec::new(),
            internal: false,
            slow: false,
            runtime: None,
        }
    }
}

/// Lookup of subagents by name.
pub trait SubagentCatalog: Send + Sync {
    fn resolve(&self, name: &str) -> Option<SubagentDescriptor>;

    /// Every descriptor, sorted by name.
    fn list(&self) -> Vec<SubagentDescriptor>;
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    subagents: Vec<SubagentDescriptor>,
}

static BUILTIN_TOML: &str = include_str!("subagents.toml");

/// An in-memory catalog.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    entries: BTreeMap<String, SubagentDescriptor>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// The catalog shipped with the binary.
    pub fn builtin() -> Result<Self, toml::de::Error> {
        Self::from_toml(BUILTIN_TOML)
    }

    /// Parse a `[[subagents]]` document.
    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        let file: CatalogFile = toml::from_str(text)?;
        let mut catalog = Self::new();
        catalog.extend(file.subagents);
        Ok(catalog)
    }

    /// Add or replace a descriptor.
    pub fn insert(&mut self, descriptor: SubagentDescriptor) -> Option<SubagentDescriptor> {
        self.entries.insert(descriptor.name.clone(), descriptor)
    }

    pub fn with(mut self, descriptor: SubagentDescriptor) -> Self {
        self.insert(descriptor);
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Extend<SubagentDescriptor> for StaticCatalog {
    fn extend<I: IntoIterator<Item = SubagentDescriptor>>(&mut self, iter: I) {
        for descriptor in iter {
            self.insert(descriptor);
        }
    }
}

impl SubagentCatalog for StaticCatalog {
    fn resolve(&self, name: &str) -> Option<SubagentDescriptor> {
        self.entries.get(name).cloned()
    }

    fn list(&self) -> Vec<SubagentDescriptor> {
        self.entries.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_catalog_parses() {
        let catalog = StaticCatalog::builtin().unwrap();
        for name in ["general", "finder", "reviewer", "planner", "summarizer"] {
            assert!(catalog.resolve(name).is_some(), "missing builtin {name}");
        }
    }

    #[test]
    fn summarizer_is_internal() {
        let catalog = StaticCatalog::builtin().unwrap();
        assert!(catalog.resolve("summarizer").unwrap().internal);
        assert!(!catalog.resolve("finder").unwrap().internal);
    }

    #[test]
    fn list_is_sorted_by_name() {
        let catalog = StaticCatalog::builtin().unwrap();
        let names: Vec<String> = catalog.list().into_iter().map(|d| d.name).collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
    }

    #[test]
    fn extend_replaces_same_name() {
        let mut catalog = StaticCatalog::builtin().unwrap();
        let before = catalog.len();
        let mut finder = SubagentDescriptor::named("finder");
        finder.runtime = Some(RuntimeKind::Streaming);
        catalog.extend([finder, SubagentDescriptor::named("docs")]);
        assert_eq!(catalog.len(), before + 1);
        assert_eq!(
            catalog.resolve("finder").unwrap().runtime,
            Some(RuntimeKind::Streaming)
        );
    }

    #[test]
    fn unknown_descriptor_field_is_rejected() {
        let text = r#"
            [[subagents]]
            name = "x"
            description = "d"
            system_prompt = "p"
            colour = "red"
        "#;
        assert!(StaticCatalog::from_toml(text).is_err());
    }
}
