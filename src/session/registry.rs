//! Tool registry collaborator boundary.
//!
//! Given a command name the registry returns an optional tool label and a
//! default environment overlay. The orchestrator treats this as an opaque,
//! side-effect-free lookup; a missing or empty registry only means the
//! generic fallback label is used.

use std::collections::HashMap;

/// Label and environment defaults for a recognized tool.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolProfile {
    /// Human-readable tool label.
    pub label: String,
    /// Default environment overlay applied below caller overrides.
    pub env: HashMap<String, String>,
}

impl ToolProfile {
    #[must_use]
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            env: HashMap::new(),
        }
    }

    /// Add a default environment variable.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// Opaque tool lookup.
pub trait ToolRegistry: Send + Sync {
    /// Resolve a command name to a tool profile, if known.
    fn lookup(&self, command: &str) -> Option<ToolProfile>;
}

/// Registry that knows nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullRegistry;

impl ToolRegistry for NullRegistry {
    fn lookup(&self, _command: &str) -> Option<ToolProfile> {
        None
    }
}

/// In-memory registry backed by a static table.
#[derive(Debug, Clone, Default)]
pub struct StaticRegistry {
    tools: HashMap<String, ToolProfile>,
}

impl StaticRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with a handful of common CLI tools.
    #[must_use]
    pub fn with_known_tools() -> Self {
        let mut registry = Self::new();
        registry.insert("claude", ToolProfile::new("Claude Code"));
        registry.insert(
            "python",
            ToolProfile::new("Python").env("PYTHONUNBUFFERED", "1"),
        );
        registry.insert(
            "python3",
            ToolProfile::new("Python").env("PYTHONUNBUFFERED", "1"),
        );
        registry.insert("node", ToolProfile::new("Node.js"));
        registry.insert("npm", ToolProfile::new("npm"));
        registry.insert("cargo", ToolProfile::new("Cargo"));
        registry.insert("git", ToolProfile::new("Git").env("GIT_PAGER", "cat"));
        registry.insert("make", ToolProfile::new("Make"));
        registry.insert("docker", ToolProfile::new("Docker"));
        registry.insert("bash", ToolProfile::new("Bash"));
        registry.insert("sh", ToolProfile::new("Shell"));
        registry
    }

    /// Register or replace a tool profile.
    pub fn insert(&mut self, command: impl Into<String>, profile: ToolProfile) {
        self.tools.insert(command.into(), profile);
    }
}

impl ToolRegistry for StaticRegistry {
    fn lookup(&self, command: &str) -> Option<ToolProfile> {
        // Match on the executable basename so "/usr/bin/python3" resolves.
        let basename = std::path::Path::new(command)
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or(command);
        self.tools.get(basename).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_registry_knows_nothing() {
        assert!(NullRegistry.lookup("python3").is_none());
    }

    #[test]
    fn static_registry_resolves_basenames() {
        let registry = StaticRegistry::with_known_tools();
        let profile = registry.lookup("/usr/bin/python3").unwrap();
        assert_eq!(profile.label, "Python");
        assert_eq!(profile.env.get("PYTHONUNBUFFERED").unwrap(), "1");
        assert!(registry.lookup("unknown-tool").is_none());
    }
}
