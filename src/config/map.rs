//! Purpose keys and the per-document configuration map.
//!
//! # KDL Schema
//!
//! ```kdl
//! backend { ... }
//! statefile { ... }
//! planfile { ... }
//! remote_state "network" { ... }   // any number, one per data source name
//! ```

use crate::Error;
use crate::config::body::{BlockSchema, Body, BodySchema};
use crate::config::diagnostics::{Diagnostic, Diagnostics, SourceRange};
use crate::config::node::ConfigNode;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::fmt;
use std::str::FromStr;

/// Prefix of the keys used for remote state data sources.
pub const REMOTE_STATE_PREFIX: &str = "remote_state:";

const MAP_SCHEMA: BodySchema = BodySchema {
    attributes: &[],
    blocks: &[
        BlockSchema {
            kind: "backend",
            labels: &[],
        },
        BlockSchema {
            kind: "statefile",
            labels: &[],
        },
        BlockSchema {
            kind: "planfile",
            labels: &[],
        },
        BlockSchema {
            kind: "remote_state",
            labels: &["data source name"],
        },
    ],
};

/// What a configuration node protects.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PurposeKey {
    /// The backend (remote state) channel.
    Backend,
    /// The local state file.
    StateFile,
    /// The plan file.
    PlanFile,
    /// A named remote state data source.
    RemoteState(String),
}

impl PurposeKey {
    /// The purposes every configuration map is expected to describe.
    pub const FIXED: [PurposeKey; 3] = [
        PurposeKey::Backend,
        PurposeKey::StateFile,
        PurposeKey::PlanFile,
    ];

    pub fn remote_state(name: impl Into<String>) -> Self {
        PurposeKey::RemoteState(name.into())
    }

    /// Whether this is one of the fixed, unlabelled purposes.
    pub fn is_fixed(&self) -> bool {
        !matches!(self, PurposeKey::RemoteState(_))
    }

    /// Map key for a decoded block: the block type, plus the label for
    /// `remote_state`.
    fn from_block(kind: &str, labels: &[String]) -> Option<Self> {
        match (kind, labels) {
            ("backend", []) => Some(PurposeKey::Backend),
            ("statefile", []) => Some(PurposeKey::StateFile),
            ("planfile", []) => Some(PurposeKey::PlanFile),
            ("remote_state", [name]) => Some(PurposeKey::RemoteState(name.clone())),
            _ => None,
        }
    }
}

impl fmt::Display for PurposeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PurposeKey::Backend => write!(f, "backend"),
            PurposeKey::StateFile => write!(f, "statefile"),
            PurposeKey::PlanFile => write!(f, "planfile"),
            PurposeKey::RemoteState(name) => write!(f, "{}{}", REMOTE_STATE_PREFIX, name),
        }
    }
}

impl FromStr for PurposeKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "backend" => Ok(PurposeKey::Backend),
            "statefile" => Ok(PurposeKey::StateFile),
            "planfile" => Ok(PurposeKey::PlanFile),
            _ => match s.strip_prefix(REMOTE_STATE_PREFIX) {
                Some(name) if !name.is_empty() => Ok(PurposeKey::RemoteState(name.to_string())),
                _ => Err(Error::InvalidPurpose(s.to_string())),
            },
        }
    }
}

impl Serialize for PurposeKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Every purpose declared by one document, or by several once merged.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfigMap {
    pub configs: BTreeMap<PurposeKey, ConfigNode>,
    #[serde(skip)]
    pub decl_range: SourceRange,
}

impl ConfigMap {
    pub fn new(decl_range: SourceRange) -> Self {
        Self {
            configs: BTreeMap::new(),
            decl_range,
        }
    }

    /// Decode every purpose block of a document.
    ///
    /// Purposes whose block has errors are left out of the map; the rest are
    /// kept. When a purpose is declared twice the first declaration is used
    /// and the second is reported as a warning.
    pub fn decode(body: &Body, decl_range: SourceRange) -> (ConfigMap, Diagnostics) {
        let mut map = ConfigMap::new(decl_range);
        let (content, mut diags) = body.content(&MAP_SCHEMA);
        let mut declared: BTreeMap<PurposeKey, SourceRange> = BTreeMap::new();

        for block in content.blocks {
            let Some(key) = PurposeKey::from_block(&block.kind, &block.labels) else {
                continue;
            };

            match declared.entry(key.clone()) {
                Entry::Occupied(first) => {
                    tracing::warn!(purpose = %key, at = %block.range, "ignoring duplicate encryption block");
                    diags.push(
                        Diagnostic::warning(format!("Duplicate {} encryption block", key))
                            .with_detail(format!(
                                "Encryption for {} was already declared at {}; this declaration is ignored.",
                                key,
                                first.get()
                            ))
                            .with_subject(&block.range),
                    );
                    continue;
                }
                Entry::Vacant(slot) => {
                    slot.insert(block.range.clone());
                }
            }

            let (node, node_diags) = ConfigNode::decode(&block.body, &block.range);
            diags.extend(node_diags);
            if let Some(node) = node {
                map.configs.insert(key, node);
            }
        }

        (map, diags)
    }

    /// Fold `other` into `self`, `other` taking precedence.
    ///
    /// Purposes present on both sides are merged with [`ConfigNode::merge`];
    /// purposes only in `other` are moved over as they are.
    pub fn merge(&mut self, other: ConfigMap) {
        for (key, node) in other.configs {
            match self.configs.get_mut(&key) {
                Some(existing) => existing.merge(&node),
                None => {
                    self.configs.insert(key, node);
                }
            }
        }
    }

    pub fn get(&self, key: &PurposeKey) -> Option<&ConfigNode> {
        self.configs.get(key)
    }

    pub fn insert(&mut self, key: PurposeKey, node: ConfigNode) -> Option<ConfigNode> {
        self.configs.insert(key, node)
    }

    pub fn contains(&self, key: &PurposeKey) -> bool {
        self.configs.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.configs.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PurposeKey, &ConfigNode)> {
        self.configs.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::body::{parse_json, parse_kdl};
    use crate::config::diagnostics::Severity;
    use serde_json::json;

    fn decode(source: &str) -> (ConfigMap, Diagnostics) {
        let (body, diags) = parse_kdl("map.kdl", source);
        assert!(!diags.has_errors(), "{}", diags);
        ConfigMap::decode(&body.unwrap(), SourceRange::whole_file("map.kdl"))
    }

    fn map(source: &str) -> ConfigMap {
        let (map, diags) = decode(source);
        assert!(!diags.has_errors(), "{}", diags);
        map
    }

    #[test]
    fn test_purpose_key_display_and_parse() {
        for key in [
            PurposeKey::Backend,
            PurposeKey::StateFile,
            PurposeKey::PlanFile,
            PurposeKey::remote_state("net"),
        ] {
            assert_eq!(key.to_string().parse::<PurposeKey>().unwrap(), key);
        }
        assert_eq!(PurposeKey::remote_state("net").to_string(), "remote_state:net");
        assert!("remote_state:".parse::<PurposeKey>().is_err());
        assert!("other".parse::<PurposeKey>().is_err());
    }

    #[test]
    fn test_purpose_key_is_fixed() {
        assert!(PurposeKey::FIXED.iter().all(PurposeKey::is_fixed));
        assert!(!PurposeKey::remote_state("x").is_fixed());
    }

    #[test]
    fn test_decode_all_purposes() {
        let map = map(
            r#"
            backend { required #true }
            statefile { method "aes_gcm" { } }
            planfile { }
            remote_state "network" { }
            remote_state "dns" { }
            "#,
        );
        assert_eq!(map.len(), 5);
        assert!(map.get(&PurposeKey::Backend).unwrap().required);
        assert!(map.contains(&PurposeKey::remote_state("network")));
        assert!(map.contains(&PurposeKey::remote_state("dns")));
    }

    #[test]
    fn test_decode_json_document() {
        let (body, _) = parse_json(
            "env",
            r#"{"statefile": {"required": true}, "remote_state": {"net": {"method": {"m": {}}}}}"#,
        );
        let (map, diags) = ConfigMap::decode(&body.unwrap(), SourceRange::whole_file("env"));
        assert!(!diags.has_errors(), "{}", diags);
        assert!(map.get(&PurposeKey::StateFile).unwrap().required);
        let net = map.get(&PurposeKey::remote_state("net")).unwrap();
        assert_eq!(net.method.as_ref().unwrap().name, "m");
    }

    #[test]
    fn test_duplicate_purpose_first_wins_with_warning() {
        let (map, diags) = decode(
            r#"
            statefile { required #true }
            statefile { required #false }
            "#,
        );
        assert!(!diags.has_errors());
        assert_eq!(diags.len(), 1);
        assert_eq!(diags.iter().next().unwrap().severity, Severity::Warning);
        assert!(map.get(&PurposeKey::StateFile).unwrap().required);
    }

    #[test]
    fn test_invalid_block_is_dropped_others_kept() {
        let (map, diags) = decode(
            r#"
            statefile {
                method "a" { }
                method "b" { }
            }
            planfile { required #true }
            "#,
        );
        assert!(diags.has_errors());
        assert!(!map.contains(&PurposeKey::StateFile));
        assert!(map.contains(&PurposeKey::PlanFile));
    }

    #[test]
    fn test_unknown_top_level_block_is_rejected() {
        let (map, diags) = decode("terraform { }\nstatefile { }\n");
        assert!(diags.has_errors());
        assert!(map.contains(&PurposeKey::StateFile));
    }

    #[test]
    fn test_remote_state_requires_label() {
        let (map, diags) = decode("remote_state { }\n");
        assert!(diags.has_errors());
        assert!(map.is_empty());
    }

    #[test]
    fn test_merge_union_and_override() {
        let mut base = map(
            r#"
            statefile { key_provider "kp" { region "a" } }
            backend { }
            "#,
        );
        let over = map(
            r#"
            statefile { required #true; key_provider "kp" { region "b" } }
            planfile { }
            "#,
        );
        base.merge(over);

        assert_eq!(base.len(), 3);
        let statefile = base.get(&PurposeKey::StateFile).unwrap();
        assert!(statefile.required);
        assert_eq!(
            statefile.key_provider.as_ref().unwrap().body.to_value(),
            json!({"region": "b"})
        );
    }

    #[test]
    fn test_merge_is_idempotent_without_fallbacks() {
        let original = map(
            r#"
            statefile { required #true; method "m" { x 1 } }
            remote_state "a" { key_provider "kp" { } }
            "#,
        );
        let mut merged = original.clone();
        merged.merge(original.clone());
        assert_eq!(merged, original);
    }

    #[test]
    fn test_serializes_with_string_keys() {
        let map = map("remote_state \"net\" { required #true }\n");
        let value = serde_json::to_value(&map).unwrap();
        assert_eq!(
            value,
            json!({"configs": {"remote_state:net": {"required": true}}})
        );
    }
}
