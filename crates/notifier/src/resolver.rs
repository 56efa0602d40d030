//! Collaborators consulted by the writers: project naming, delivery
//! configuration and workspace path normalization.
//!
//! None of these return errors. A resolver that cannot produce a value
//! returns an empty result and the writer falls back to a default.

use std::path::{Component, Path, PathBuf};

use serde::Deserialize;
use uuid::Uuid;

/// Workspace manifest written when a workspace is initialized.
const WORKSPACE_MANIFEST: &str = ".ads/workspace.json";

/// Derives a human-readable project name for a workspace.
///
/// Returns an empty string on any failure; never panics or errors.
pub trait ProjectNameResolver: Send + Sync {
    fn resolve(&self, workspace_root: &str, user_id: Option<&str>) -> String;
}

/// Where notifications go, if anywhere.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryConfig {
    pub target: String,
    pub ok: bool,
}

impl DeliveryConfig {
    pub fn available(target: impl Into<String>) -> Self {
        let target = target.into();
        let ok = !target.trim().is_empty();
        Self { target, ok }
    }

    pub fn unavailable() -> Self {
        Self::default()
    }

    /// The target, if delivery is configured.
    pub fn usable_target(&self) -> Option<&str> {
        let target = self.target.trim();
        (self.ok && !target.is_empty()).then_some(target)
    }
}

/// Reads the current delivery configuration. Called once per writer call.
pub trait DeliveryConfigResolver: Send + Sync {
    fn resolve(&self) -> DeliveryConfig;
}

/// Canonical form of workspace paths, and the project id derived from it.
pub trait WorkspaceNormalizer: Send + Sync {
    fn normalize(&self, workspace_root: &str) -> String;

    fn project_id(&self, normalized_root: &str) -> String;
}

/// Reads `name` from the workspace manifest.
#[derive(Debug, Default, Clone, Copy)]
pub struct ManifestProjectNameResolver;

#[derive(Debug, Deserialize)]
struct WorkspaceManifest {
    #[serde(default)]
    name: String,
}

impl ProjectNameResolver for ManifestProjectNameResolver {
    fn resolve(&self, workspace_root: &str, _user_id: Option<&str>) -> String {
        let path = Path::new(workspace_root).join(WORKSPACE_MANIFEST);
        let Ok(raw) = std::fs::read_to_string(&path) else {
            return String::new();
        };

        match serde_json::from_str::<WorkspaceManifest>(&raw) {
            Ok(manifest) => manifest.name.trim().to_string(),
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "Unreadable workspace manifest");
                String::new()
            }
        }
    }
}

/// Delivery configuration fixed at startup, e.g. from `AppConfig`.
#[derive(Debug, Clone, Default)]
pub struct StaticDeliveryConfig {
    config: DeliveryConfig,
}

impl StaticDeliveryConfig {
    pub fn new(target: Option<String>) -> Self {
        Self {
            config: target
                .map(DeliveryConfig::available)
                .unwrap_or_else(DeliveryConfig::unavailable),
        }
    }
}

impl DeliveryConfigResolver for StaticDeliveryConfig {
    fn resolve(&self) -> DeliveryConfig {
        self.config.clone()
    }
}

/// Canonicalizes existing paths, cleans up the rest lexically.
/// Project ids are UUIDv5 of the normalized path.
#[derive(Debug, Default, Clone, Copy)]
pub struct PathNormalizer;

impl WorkspaceNormalizer for PathNormalizer {
    fn normalize(&self, workspace_root: &str) -> String {
        let trimmed = workspace_root.trim();
        if trimmed.is_empty() {
            return String::new();
        }

        let path = std::fs::canonicalize(trimmed).unwrap_or_else(|_| lexical_clean(trimmed));
        path.to_string_lossy().into_owned()
    }

    fn project_id(&self, normalized_root: &str) -> String {
        Uuid::new_v5(&Uuid::NAMESPACE_URL, normalized_root.as_bytes()).to_string()
    }
}

fn lexical_clean(path: &str) -> PathBuf {
    let mut cleaned = PathBuf::new();
    for component in Path::new(path).components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !cleaned.pop() {
                    cleaned.push("..");
                }
            }
            other => cleaned.push(other.as_os_str()),
        }
    }
    cleaned
}

/// Last path segment, used when no project name could be resolved.
pub fn default_project_name(normalized_root: &str) -> String {
    Path::new(normalized_root)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| normalized_root.to_string())
}
