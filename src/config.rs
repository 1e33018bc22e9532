//! Run configuration.

use serde::{Deserialize, Serialize};

/// Options for a [`Remapper`](crate::Remapper) run.
///
/// Every field has a default, so a partial JSON document is enough:
///
/// ```
/// use remapper::RemapConfig;
///
/// let config = RemapConfig::from_json(r#"{"excluded_packages": ["org.slf4j"]}"#).unwrap();
/// assert!(config.is_excluded("org/slf4j/Logger"));
/// assert!(!config.is_excluded("org/slf4jx/Logger"));
/// assert!(config.rewrite_manifest);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemapConfig {
    /// Worker threads for parsing and rewriting; `None` uses the global
    /// rayon pool.
    pub threads: Option<usize>,
    /// Packages (`a.b` or `a/b`) whose classes are copied unchanged. They
    /// still contribute to the class hierarchy.
    pub excluded_packages: Vec<String>,
    /// Whether to rewrite class names in `META-INF/MANIFEST.MF`.
    pub rewrite_manifest: bool,
}

impl Default for RemapConfig {
    fn default() -> Self {
        Self {
            threads: None,
            excluded_packages: Vec::new(),
            rewrite_manifest: true,
        }
    }
}

impl RemapConfig {
    /// Parses a configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Whether the class lies in an excluded package or one of its
    /// subpackages.
    pub fn is_excluded(&self, class_name: &str) -> bool {
        self.excluded_packages.iter().any(|package| {
            let package = package.trim_end_matches(['.', '/']);
            let rest = class_name
                .strip_prefix(package)
                .or_else(|| class_name.strip_prefix(&package.replace('.', "/")));
            matches!(rest, Some(rest) if rest.starts_with('/'))
        })
    }
}
