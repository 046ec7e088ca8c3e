//! Command implementations for Statecrypt CLI.
//!
//! - `resolve` - merge every source and report the result
//! - `flow` - plan the encryption flow for one purpose
//! - `validate` - decode documents on their own and report diagnostics

use crate::config::{self, ConfigMap, ConfigNode, Diagnostics, PurposeKey, Sources, ValueSource};
use crate::flow::{FlowPlan, Planner, Stage};
use crate::registry::Registry;
use crate::{Error, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Command results that can be serialized to JSON or formatted for humans.
pub trait Output {
    /// Serialize to JSON string.
    fn to_json(&self) -> String;

    /// Format for human-readable output.
    fn to_human(&self) -> String;
}

/// Build the resolver inputs from CLI arguments and the environment.
///
/// The root declaration is decoded here so its diagnostics can be reported
/// next to the others; a root that fails to read contributes nothing.
pub fn load_sources(root: Option<&Path>, files: &[PathBuf]) -> (Sources, Diagnostics) {
    let mut diags = Diagnostics::new();
    let mut sources = Sources::from_env();

    if let Some(path) = root {
        let (map, root_diags) = config::load_file(path);
        diags.extend(root_diags);
        if let Some(map) = map {
            sources = sources.with_root(map);
        }
    }
    for file in files {
        sources = sources.with_file(file);
    }

    (sources, diags)
}

// ============================================================================
// resolve
// ============================================================================

/// Result of `statecrypt resolve`.
#[derive(Serialize)]
pub struct ResolveResult {
    pub configured: bool,
    pub sources: Vec<ValueSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<ConfigMap>,
    #[serde(skip_serializing_if = "Diagnostics::is_empty")]
    pub warnings: Diagnostics,
}

impl Output for ResolveResult {
    fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    fn to_human(&self) -> String {
        let mut lines = Vec::new();
        if !self.warnings.is_empty() {
            lines.push(self.warnings.to_string());
        }
        let Some(ref config) = self.config else {
            lines.push("No encryption configured; all purposes pass through.".to_string());
            return lines.join("\n");
        };

        let sources: Vec<String> = self.sources.iter().map(ToString::to_string).collect();
        lines.push(format!("Sources: {}", sources.join(", ")));
        if config.is_empty() {
            lines.push("No purposes declared.".to_string());
        }
        lines.extend(
            config
                .iter()
                .map(|(key, node)| format!("  {}: {}", key, describe(node))),
        );
        lines.join("\n")
    }
}

/// Merge every source. Error diagnostics from any source fail the command.
pub fn resolve(sources: Sources, mut diags: Diagnostics) -> Result<ResolveResult> {
    let resolution = config::resolve(sources);
    diags.extend(resolution.diagnostics);
    let warnings = diags.into_result()?;

    Ok(ResolveResult {
        configured: resolution.config.is_some(),
        sources: resolution.sources,
        config: resolution.config,
        warnings,
    })
}

fn describe(node: &ConfigNode) -> String {
    let mut parts = vec![if node.required { "required" } else { "optional" }.to_string()];
    let provider = node.key_provider.as_ref().map_or("-", |kp| kp.name.as_str());
    let method = node.method.as_ref().map_or("-", |m| m.name.as_str());
    parts.push(format!("{}/{}", provider, method));
    match node.depth() {
        0 => {}
        1 => parts.push("1 fallback".to_string()),
        n => parts.push(format!("{} fallbacks", n)),
    }
    parts.join(", ")
}

// ============================================================================
// flow
// ============================================================================

/// Result of `statecrypt flow`.
#[derive(Serialize)]
pub struct FlowResult {
    #[serde(flatten)]
    pub plan: FlowPlan,
    #[serde(skip_serializing_if = "Diagnostics::is_empty")]
    pub warnings: Diagnostics,
}

impl Output for FlowResult {
    fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    fn to_human(&self) -> String {
        let mut lines = Vec::new();
        if !self.warnings.is_empty() {
            lines.push(self.warnings.to_string());
        }
        let plan = &self.plan;
        if plan.is_pass_through() {
            lines.push(format!("{}: pass-through (no encryption)", plan.purpose));
            return lines.join("\n");
        }

        lines.push(format!("{}:", plan.purpose));
        lines.push(match plan.encrypt {
            Some(ref stage) => format!("  encrypt: {}", stage.label()),
            None => "  encrypt: plaintext".to_string(),
        });
        lines.push("  decrypt:".to_string());
        let mut attempts: Vec<String> = plan.decrypt.iter().map(Stage::label).collect();
        if plan.allow_plaintext {
            attempts.push("plaintext".to_string());
        }
        lines.extend(
            attempts
                .iter()
                .enumerate()
                .map(|(i, attempt)| format!("    {}. {}", i + 1, attempt)),
        );
        lines.join("\n")
    }
}

/// Set up a registry from `sources` and look up the flow for `purpose`.
///
/// `default` names a document whose `backend` block becomes the caller
/// default of a `remote_state:<name>` lookup.
pub fn flow(
    sources: Sources,
    mut diags: Diagnostics,
    purpose: &str,
    default: Option<&Path>,
) -> Result<FlowResult> {
    let key: PurposeKey = purpose.parse()?;
    let default = match default {
        Some(path) => {
            if key.is_fixed() {
                return Err(Error::InvalidInput(format!(
                    "--default only applies to remote_state:<name> lookups, not {}",
                    key
                )));
            }
            Some(load_default(path)?)
        }
        None => None,
    };

    let registry = Registry::new(Planner);
    diags.extend(registry.setup(sources));
    let warnings = diags.into_result()?;

    let plan = match key {
        PurposeKey::Backend => registry.remote_state()?,
        PurposeKey::StateFile => registry.state_file()?,
        PurposeKey::PlanFile => registry.plan_file()?,
        PurposeKey::RemoteState(ref name) => {
            registry.remote_state_datasource(name, default.as_ref())?
        }
    };

    Ok(FlowResult { plan, warnings })
}

fn load_default(path: &Path) -> Result<ConfigNode> {
    let (map, diags) = config::load_file(path);
    diags.into_result()?;
    map.and_then(|mut map| map.configs.remove(&PurposeKey::Backend))
        .ok_or_else(|| {
            Error::InvalidInput(format!("{} declares no backend block", path.display()))
        })
}

// ============================================================================
// validate
// ============================================================================

/// Per-document outcome of `statecrypt validate`.
#[derive(Serialize)]
pub struct DocumentReport {
    pub path: PathBuf,
    pub valid: bool,
    pub purposes: Vec<PurposeKey>,
    pub diagnostics: Diagnostics,
}

/// Result of `statecrypt validate`.
#[derive(Serialize)]
pub struct ValidateResult {
    pub valid: bool,
    pub documents: Vec<DocumentReport>,
}

impl Output for ValidateResult {
    fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    fn to_human(&self) -> String {
        let mut lines = Vec::new();
        for doc in &self.documents {
            let status = if doc.valid { "ok" } else { "invalid" };
            let purposes: Vec<String> = doc.purposes.iter().map(ToString::to_string).collect();
            if purposes.is_empty() {
                lines.push(format!("{}: {}", doc.path.display(), status));
            } else {
                lines.push(format!(
                    "{}: {} ({})",
                    doc.path.display(),
                    status,
                    purposes.join(", ")
                ));
            }
            if !doc.diagnostics.is_empty() {
                lines.push(doc.diagnostics.to_string());
            }
        }
        lines.join("\n")
    }
}

/// Decode each document on its own. Never fails; check `valid`.
pub fn validate(paths: &[PathBuf]) -> ValidateResult {
    let documents: Vec<DocumentReport> = paths
        .iter()
        .map(|path| {
            let (map, diagnostics) = config::load_file(path);
            DocumentReport {
                path: path.clone(),
                valid: !diagnostics.has_errors(),
                purposes: map
                    .map(|map| map.configs.into_keys().collect())
                    .unwrap_or_default(),
                diagnostics,
            }
        })
        .collect();

    ValidateResult {
        valid: documents.iter().all(|d| d.valid),
        documents,
    }
}
