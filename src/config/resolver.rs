//! Precedence resolution across every encryption configuration source.
//!
//! ## Precedence (highest to lowest)
//!
//! 1. `STATECRYPT_ENCRYPTION` environment variable
//! 2. Override files, later files beating earlier ones
//! 3. The root module's own declaration
//!
//! Sources are folded in ascending precedence with [`ConfigMap::merge`]. A
//! source that fails to decode contributes its diagnostics and whatever part
//! of it decoded cleanly; it never stops the sources after it.

use crate::config::body::{self, Body};
use crate::config::diagnostics::{Diagnostic, Diagnostics, SourceRange};
use crate::config::map::ConfigMap;
use crate::config::node::MAX_FALLBACK_DEPTH;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Environment variable holding the highest-precedence configuration.
pub const ENCRYPTION_CONFIG_ENV: &str = "STATECRYPT_ENCRYPTION";

/// Tracks where a piece of configuration came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "name", rename_all = "lowercase")]
pub enum ValueSource {
    /// The root module's declaration
    Root,
    /// An override file
    File(PathBuf),
    /// An environment variable
    Env(String),
}

impl std::fmt::Display for ValueSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValueSource::Root => write!(f, "root"),
            ValueSource::File(path) => write!(f, "file:{}", path.display()),
            ValueSource::Env(name) => write!(f, "env:{}", name),
        }
    }
}

/// Every input to a resolution, lowest precedence first.
#[derive(Debug, Clone, Default)]
pub struct Sources {
    /// The root module's declaration, if it has one.
    pub root: Option<ConfigMap>,
    /// Override files, applied in order.
    pub files: Vec<PathBuf>,
    /// Raw environment document. `None` or blank means no override.
    pub env: Option<String>,
}

impl Sources {
    /// Create empty sources.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sources with the environment document read from
    /// [`ENCRYPTION_CONFIG_ENV`].
    pub fn from_env() -> Self {
        Self {
            env: std::env::var(ENCRYPTION_CONFIG_ENV).ok(),
            ..Self::default()
        }
    }

    /// Set the root module declaration.
    pub fn with_root(mut self, root: ConfigMap) -> Self {
        self.root = Some(root);
        self
    }

    /// Append an override file.
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.files.push(path.into());
        self
    }

    /// Set the environment document.
    pub fn with_env(mut self, value: impl Into<String>) -> Self {
        self.env = Some(value.into());
        self
    }
}

/// The outcome of folding every source.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    /// The merged map, `None` when no source declared anything.
    pub config: Option<ConfigMap>,
    /// Problems from every source, in source order.
    pub diagnostics: Diagnostics,
    /// The sources that contributed, lowest precedence first.
    pub sources: Vec<ValueSource>,
}

impl Resolution {
    fn apply(&mut self, source: ValueSource, map: ConfigMap) {
        tracing::debug!(%source, purposes = map.len(), "applying encryption configuration");
        match self.config {
            Some(ref mut acc) => acc.merge(map),
            None => self.config = Some(map),
        }
        self.sources.push(source);
    }
}

/// Fold the root declaration, the override files and the environment document
/// into one map.
pub fn resolve(sources: Sources) -> Resolution {
    let mut resolution = Resolution::default();

    if let Some(root) = sources.root {
        resolution.apply(ValueSource::Root, root);
    }

    for path in sources.files {
        let (map, diags) = load_file(&path);
        resolution.diagnostics.extend(diags);
        if let Some(map) = map {
            resolution.apply(ValueSource::File(path), map);
        }
    }

    if let Some(ref value) = sources.env {
        let (map, diags) = load_env_value(ENCRYPTION_CONFIG_ENV, value);
        resolution.diagnostics.extend(diags);
        if let Some(map) = map {
            resolution.apply(ValueSource::Env(ENCRYPTION_CONFIG_ENV.to_string()), map);
        }
    }

    if let Some(ref config) = resolution.config {
        resolution.diagnostics.extend(check_fallback_depth(config));
    }

    resolution
}

/// Load one override file. Files ending in `.json` are read as JSON, all
/// others as KDL.
pub fn load_file(path: &Path) -> (Option<ConfigMap>, Diagnostics) {
    let filename = path.display().to_string();
    let source = match std::fs::read_to_string(path) {
        Ok(source) => source,
        Err(e) => {
            return (
                None,
                Diagnostic::error("Failed to read encryption configuration file")
                    .with_detail(format!("{}: {}", filename, e))
                    .with_subject(&SourceRange::whole_file(&filename))
                    .into(),
            );
        }
    };

    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    let parsed = if is_json {
        body::parse_json(&filename, &source)
    } else {
        body::parse_kdl(&filename, &source)
    };
    decode_document(&filename, parsed)
}

/// Load the environment document. Blank values mean "not set".
pub fn load_env_value(name: &str, value: &str) -> (Option<ConfigMap>, Diagnostics) {
    if value.trim().is_empty() {
        return (None, Diagnostics::new());
    }
    let filename = format!("<env:{}>", name);
    decode_document(&filename, body::parse_auto(&filename, value))
}

/// Parse a document of either syntax (auto-detected) and decode it.
pub fn load_source(filename: &str, source: &str) -> (Option<ConfigMap>, Diagnostics) {
    decode_document(filename, body::parse_auto(filename, source))
}

fn decode_document(
    filename: &str,
    (body, mut diags): (Option<Body>, Diagnostics),
) -> (Option<ConfigMap>, Diagnostics) {
    let Some(body) = body else {
        return (None, diags);
    };
    let (map, map_diags) = ConfigMap::decode(&body, SourceRange::whole_file(filename));
    diags.extend(map_diags);
    tracing::debug!(
        source = filename,
        purposes = map.len(),
        errors = diags.errors().count(),
        "decoded encryption configuration"
    );
    (Some(map), diags)
}

fn check_fallback_depth(config: &ConfigMap) -> Diagnostics {
    let mut diags = Diagnostics::new();
    for (key, node) in config.iter() {
        if node.depth() > MAX_FALLBACK_DEPTH {
            let mut diag = Diagnostic::error("Fallback chain too deep").with_detail(format!(
                "Merging the configured sources gives {} a chain of {} fallback levels; at most {} are supported.",
                key,
                node.depth(),
                MAX_FALLBACK_DEPTH
            ));
            if let Some(ref range) = node.decl_range {
                diag = diag.with_subject(range);
            }
            diags.push(diag);
        }
    }
    diags
}
