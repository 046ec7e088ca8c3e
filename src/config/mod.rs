//! Encryption configuration: decoding, merging and precedence resolution.
//!
//! A configuration document declares, per purpose, which key provider and
//! method protect that data and which older configurations can still decrypt
//! it. KDL is the native syntax; JSON is accepted wherever a document is read
//! (override files ending in `.json`, and environment values starting with
//! `{`).
//!
//! ```kdl
//! statefile {
//!     required #true
//!     key_provider "aws_kms" { kms_key_id "alias/state" }
//!     method "aes_gcm" { }
//!     fallback {
//!         key_provider "pbkdf2" { passphrase "..." }
//!         method "aes_gcm" { }
//!     }
//! }
//! remote_state "network" { ... }
//! ```
//!
//! ## Layers
//!
//! - [`body`] - syntax-neutral attributes and blocks, lowered from KDL or JSON
//! - [`node`] - one purpose's [`ConfigNode`] and its merge rules
//! - [`map`] - the [`PurposeKey`] to [`ConfigNode`] map of a whole document
//! - [`resolver`] - root declaration, override files and environment, folded
//!   in precedence order
//!
//! Every decoding step reports problems as [`Diagnostics`] instead of failing
//! fast, so one run surfaces every mistake in every source.

pub mod body;
pub mod diagnostics;
pub mod map;
pub mod node;
pub mod resolver;

pub use body::{Attribute, Block, BlockSchema, Body, BodyContent, BodySchema};
pub use diagnostics::{Diagnostic, Diagnostics, Pos, Severity, SourceRange};
pub use map::{ConfigMap, PurposeKey, REMOTE_STATE_PREFIX};
pub use node::{ConfigNode, MAX_FALLBACK_DEPTH, PluginBlock};
pub use resolver::{
    ENCRYPTION_CONFIG_ENV, Resolution, Sources, ValueSource, load_env_value, load_file,
    load_source, resolve,
};
