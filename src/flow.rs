//! Turning a resolved configuration node into an encryption flow.
//!
//! The registry never interprets key provider or method bodies itself. It
//! hands the resolved node for a purpose to a [`FlowBuilder`], and the builder
//! decides what the encrypt path and the ordered decrypt attempts are.
//!
//! [`Planner`] is the builder this crate ships. It does no cryptography; it
//! lays out which key provider and method each step would use, which is what
//! the CLI prints and what plugin hosts consume.

use crate::config::{ConfigNode, PluginBlock, PurposeKey};
use crate::{Error, Result};
use serde::Serialize;

/// Builds the flow used for one purpose.
pub trait FlowBuilder: Send + Sync {
    type Flow;

    /// Build a flow for `purpose`. `None` means nothing is configured and the
    /// flow must pass data through unchanged.
    fn build(&self, purpose: &PurposeKey, config: Option<&ConfigNode>) -> Result<Self::Flow>;
}

/// One key provider + method pairing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Stage {
    pub key_provider: PluginBlock,
    pub method: PluginBlock,
}

impl Stage {
    /// `key_provider/method`, for logs and human output.
    pub fn label(&self) -> String {
        format!("{}/{}", self.key_provider.name, self.method.name)
    }
}

/// The planned flow for one purpose.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlowPlan {
    pub purpose: PurposeKey,
    /// How new data is written. `None` writes plaintext.
    pub encrypt: Option<Stage>,
    /// How existing data is read, tried in order.
    pub decrypt: Vec<Stage>,
    /// Whether unencrypted data is still accepted on read.
    pub allow_plaintext: bool,
}

impl FlowPlan {
    /// A flow that leaves data untouched.
    pub fn pass_through(purpose: PurposeKey) -> Self {
        Self {
            purpose,
            encrypt: None,
            decrypt: Vec::new(),
            allow_plaintext: true,
        }
    }

    pub fn is_pass_through(&self) -> bool {
        self.encrypt.is_none() && self.decrypt.is_empty()
    }
}

/// The default [`FlowBuilder`]: primary level encrypts, then every level of
/// the fallback chain is a decrypt attempt, outermost first.
#[derive(Debug, Clone, Copy, Default)]
pub struct Planner;

impl FlowBuilder for Planner {
    type Flow = FlowPlan;

    fn build(&self, purpose: &PurposeKey, config: Option<&ConfigNode>) -> Result<FlowPlan> {
        let Some(node) = config else {
            return Ok(FlowPlan::pass_through(purpose.clone()));
        };

        let mut decrypt = Vec::with_capacity(node.depth() + 1);
        for (level, step) in node.chain().enumerate() {
            decrypt.push(stage(purpose, level, step)?);
        }
        let encrypt = decrypt.first().cloned();

        tracing::debug!(
            %purpose,
            attempts = decrypt.len(),
            required = node.required,
            "planned encryption flow"
        );

        Ok(FlowPlan {
            purpose: purpose.clone(),
            encrypt,
            decrypt,
            allow_plaintext: !node.required,
        })
    }
}

fn stage(purpose: &PurposeKey, level: usize, node: &ConfigNode) -> Result<Stage> {
    let at = if level == 0 {
        String::new()
    } else {
        format!(" (fallback level {})", level)
    };
    let key_provider = node.key_provider.clone().ok_or_else(|| {
        Error::InvalidConfiguration(format!("{}{}: key_provider block is missing", purpose, at))
    })?;
    let method = node.method.clone().ok_or_else(|| {
        Error::InvalidConfiguration(format!("{}{}: method block is missing", purpose, at))
    })?;
    Ok(Stage {
        key_provider,
        method,
    })
}
