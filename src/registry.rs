//! The resolved encryption configuration and purpose-scoped flow lookups.
//!
//! A [`Registry`] is set up once per run with [`Registry::setup`] and then read
//! from any number of threads. Every lookup holds the registry's single lock
//! for the duration of the map access and the flow build, so flows are built
//! one at a time across all purposes.
//!
//! Lookup rules:
//!
//! - nothing installed: every purpose passes data through unchanged;
//! - `backend`, `statefile` and `planfile` missing from an installed map are
//!   configuration errors;
//! - a `remote_state` data source missing from the map uses the caller's
//!   default when one is given, and passes through otherwise.

use crate::config::{ConfigMap, ConfigNode, Diagnostic, Diagnostics, PurposeKey, Sources};
use crate::flow::{FlowBuilder, Planner};
use crate::{Error, Result, config};
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};

static GLOBAL: OnceLock<Registry> = OnceLock::new();

/// Holds the resolved configuration map and builds flows from it.
#[derive(Debug)]
pub struct Registry<B: FlowBuilder = Planner> {
    configs: Mutex<Option<ConfigMap>>,
    builder: B,
}

impl Registry<Planner> {
    /// The process-wide registry, created empty on first use.
    pub fn global() -> &'static Registry<Planner> {
        GLOBAL.get_or_init(|| Registry::new(Planner))
    }
}

impl<B: FlowBuilder> Registry<B> {
    /// Create an empty registry.
    pub fn new(builder: B) -> Self {
        Self {
            configs: Mutex::new(None),
            builder,
        }
    }

    /// Create a registry with `configs` already installed.
    pub fn with_configs(builder: B, configs: ConfigMap) -> Self {
        Self {
            configs: Mutex::new(Some(configs)),
            builder,
        }
    }

    /// Resolve `sources` and install the result.
    ///
    /// Nothing is installed when resolution reports errors or when no source
    /// declared anything. Setting up a registry that already holds a map is
    /// reported as an error diagnostic.
    pub fn setup(&self, sources: Sources) -> Diagnostics {
        let resolution = config::resolve(sources);
        let mut diags = resolution.diagnostics;
        if diags.has_errors() {
            return diags;
        }
        let Some(configs) = resolution.config else {
            tracing::debug!("no encryption configuration found, all purposes pass through");
            return diags;
        };
        if let Err(e) = self.install(configs) {
            diags.push(Diagnostic::error(e.to_string()));
            return diags;
        }
        tracing::info!(
            sources = %resolution
                .sources
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", "),
            "installed encryption configuration"
        );
        diags
    }

    /// Install a resolved map. Fails if one is already installed.
    pub fn install(&self, configs: ConfigMap) -> Result<()> {
        let mut slot = self.lock();
        if slot.is_some() {
            return Err(Error::AlreadyConfigured);
        }
        *slot = Some(configs);
        Ok(())
    }

    /// Drop the installed map so the registry can be set up again.
    pub fn reset(&self) {
        *self.lock() = None;
    }

    /// Whether a map has been installed.
    pub fn is_configured(&self) -> bool {
        self.lock().is_some()
    }

    /// A copy of the installed map.
    pub fn snapshot(&self) -> Option<ConfigMap> {
        self.lock().clone()
    }

    /// Flow for the backend (remote state) channel.
    pub fn remote_state(&self) -> Result<B::Flow> {
        self.build(PurposeKey::Backend, None)
    }

    /// Flow for the local state file.
    pub fn state_file(&self) -> Result<B::Flow> {
        self.build(PurposeKey::StateFile, None)
    }

    /// Flow for the plan file.
    pub fn plan_file(&self) -> Result<B::Flow> {
        self.build(PurposeKey::PlanFile, None)
    }

    /// Flow for the remote state data source `name`.
    ///
    /// With a `default`, the default is the merge base and the data source's
    /// own declaration (if any) is merged on top of it.
    pub fn remote_state_datasource(
        &self,
        name: &str,
        default: Option<&ConfigNode>,
    ) -> Result<B::Flow> {
        self.build(PurposeKey::remote_state(name), default)
    }

    /// Flow for any purpose key.
    pub fn lookup(&self, key: &PurposeKey, default: Option<&ConfigNode>) -> Result<B::Flow> {
        self.build(key.clone(), default)
    }

    fn build(&self, key: PurposeKey, default: Option<&ConfigNode>) -> Result<B::Flow> {
        let guard = self.lock();

        let found = match guard.as_ref() {
            None => None,
            Some(configs) => {
                let found = configs.get(&key);
                if found.is_none() && key.is_fixed() {
                    return Err(Error::MissingConfiguration(key.to_string()));
                }
                found
            }
        };

        let merged;
        let node = match (default, found) {
            (Some(default), found) => {
                let mut base = default.clone();
                if let Some(found) = found {
                    base.merge(found);
                }
                merged = base;
                Some(&merged)
            }
            (None, found) => found,
        };

        tracing::debug!(purpose = %key, configured = node.is_some(), "building encryption flow");
        self.builder.build(&key, node)
    }

    fn lock(&self) -> MutexGuard<'_, Option<ConfigMap>> {
        // The map is only ever replaced whole, so a poisoned lock still
        // guards a consistent value.
        self.configs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
