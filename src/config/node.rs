//! Per-purpose encryption declarations and their fallback chains.
//!
//! # KDL Schema
//!
//! ```kdl
//! statefile {
//!     required #true
//!     key_provider "aws_kms" {
//!         kms_key_id "alias/new"
//!         region "us-east-1"
//!     }
//!     method "aes_gcm" { }
//!
//!     // Used to decrypt data written before the key was rotated.
//!     fallback {
//!         key_provider "aws_kms" {
//!             kms_key_id "alias/old"
//!         }
//!         method "aes_gcm" { }
//!     }
//! }
//! ```

use crate::config::body::{BlockSchema, Body, BodySchema};
use crate::config::diagnostics::{Diagnostic, Diagnostics, SourceRange};
use serde::Serialize;

/// Maximum number of fallback levels below a primary declaration.
pub const MAX_FALLBACK_DEPTH: usize = 8;

const NODE_SCHEMA: BodySchema = BodySchema {
    attributes: &["required"],
    blocks: &[
        BlockSchema {
            kind: "key_provider",
            labels: &["name"],
        },
        BlockSchema {
            kind: "method",
            labels: &["name"],
        },
        BlockSchema {
            kind: "fallback",
            labels: &[],
        },
    ],
};

/// A `key_provider "<name>" { ... }` or `method "<name>" { ... }` declaration.
///
/// The body is opaque here; the plugin named by `name` interprets it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PluginBlock {
    pub name: String,
    pub body: Body,
    #[serde(skip)]
    pub decl_range: SourceRange,
}

impl PluginBlock {
    /// Fold `other` into `self`, `other` taking precedence.
    ///
    /// Declarations of the same plugin merge their bodies. A declaration of a
    /// different plugin replaces this one outright.
    pub fn merge(&mut self, other: &PluginBlock) {
        if self.name == other.name {
            self.body.merge(other.body.clone());
        } else {
            *self = other.clone();
        }
    }
}

/// Encryption intent for one purpose, or one fallback level of it.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConfigNode {
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_provider: Option<PluginBlock>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<PluginBlock>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback: Option<Box<ConfigNode>>,
    #[serde(skip)]
    pub decl_range: Option<SourceRange>,
}

impl ConfigNode {
    /// Decode a node from the body of a purpose block.
    ///
    /// No node is produced when the body has errors; the diagnostics say why.
    pub fn decode(body: &Body, decl_range: &SourceRange) -> (Option<ConfigNode>, Diagnostics) {
        let mut diags = Diagnostics::new();
        let node = decode_level(body, decl_range, 0, &mut diags);
        if diags.has_errors() {
            return (None, diags);
        }
        (Some(node), diags)
    }

    /// Fold `other` into `self`, `other` taking precedence.
    ///
    /// `required` only escalates. A plugin declared on one side only is kept
    /// or adopted; declared on both sides, the two are merged.
    ///
    /// When both sides have a fallback, `self`'s fallback is merged with the
    /// whole of `other` rather than with `other`'s fallback, so the override's
    /// top-level settings reach every fallback level `self` already has.
    // TODO: confirm whether fallback levels should merge with `other.fallback`
    // instead; switching changes the resolved chain for existing configs.
    pub fn merge(&mut self, other: &ConfigNode) {
        self.required = self.required || other.required;

        merge_plugin(&mut self.key_provider, other.key_provider.as_ref());
        merge_plugin(&mut self.method, other.method.as_ref());

        if let Some(ref other_fallback) = other.fallback {
            match self.fallback.as_mut() {
                Some(fallback) => fallback.merge(other),
                None => self.fallback = Some(other_fallback.clone()),
            }
        }
    }

    /// Number of fallback levels below this node.
    pub fn depth(&self) -> usize {
        self.chain().count() - 1
    }

    /// This node followed by each of its fallbacks, outermost first.
    pub fn chain(&self) -> impl Iterator<Item = &ConfigNode> {
        std::iter::successors(Some(self), |node| node.fallback.as_deref())
    }
}

fn merge_plugin(base: &mut Option<PluginBlock>, other: Option<&PluginBlock>) {
    let Some(other) = other else {
        return;
    };
    match base {
        Some(existing) => existing.merge(other),
        None => *base = Some(other.clone()),
    }
}

fn decode_level(
    body: &Body,
    decl_range: &SourceRange,
    depth: usize,
    diags: &mut Diagnostics,
) -> ConfigNode {
    let (content, content_diags) = body.content(&NODE_SCHEMA);
    diags.extend(content_diags);

    let mut node = ConfigNode {
        decl_range: Some(decl_range.clone()),
        ..Default::default()
    };

    if let Some(attr) = content.attributes.get("required") {
        match attr.value.as_bool() {
            Some(required) => node.required = required,
            None => diags.push(
                Diagnostic::error("Invalid value for required")
                    .with_detail(format!("Expected a boolean, found {}.", attr.value))
                    .with_subject(&attr.range),
            ),
        }
    }

    for block in content.blocks {
        match block.kind.as_str() {
            "key_provider" | "method" => {
                let slot = if block.kind == "key_provider" {
                    &mut node.key_provider
                } else {
                    &mut node.method
                };
                if let Some(ref first) = *slot {
                    diags.push(duplicate_block(&block.kind, &first.decl_range, &block.range));
                    continue;
                }
                let name = block.labels.into_iter().next().unwrap_or_default();
                *slot = Some(PluginBlock {
                    name,
                    body: block.body,
                    decl_range: block.range,
                });
            }
            "fallback" => {
                if let Some(ref first) = node.fallback {
                    let first_range = first
                        .decl_range
                        .clone()
                        .unwrap_or_else(|| block.range.clone());
                    diags.push(duplicate_block("fallback", &first_range, &block.range));
                    continue;
                }
                if depth + 1 > MAX_FALLBACK_DEPTH {
                    diags.push(
                        Diagnostic::error("Fallback chain too deep")
                            .with_detail(format!(
                                "At most {} nested fallback blocks are supported.",
                                MAX_FALLBACK_DEPTH
                            ))
                            .with_subject(&block.range),
                    );
                    continue;
                }
                let fallback = decode_level(&block.body, &block.range, depth + 1, diags);
                node.fallback = Some(Box::new(fallback));
            }
            _ => {}
        }
    }

    node
}

fn duplicate_block(kind: &str, first: &SourceRange, second: &SourceRange) -> Diagnostic {
    Diagnostic::error(format!("Duplicate {} block", kind))
        .with_detail(format!(
            "A {} block was already declared at {}. Only one is allowed per configuration level.",
            kind, first
        ))
        .with_subject(second)
}
