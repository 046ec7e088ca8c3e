//! Structured configuration bodies.
//!
//! A [`Body`] is a parsed configuration document (or a nested part of one)
//! reduced to two things: named attributes and typed blocks. Nothing here
//! knows about encryption; the decoders in [`crate::config::node`] and
//! [`crate::config::map`] ask a body for the parts they care about through
//! [`Body::content`].
//!
//! Both syntaxes lower to the same shape, so a KDL document and a JSON
//! document saying the same thing merge value for value.
//!
//! # KDL
//!
//! ```kdl
//! statefile required=#true {           // block, property becomes an attribute
//!     key_provider "aws_kms" {         // block `key_provider` holding block `aws_kms`
//!         region "us-east-1"           // attribute, scalar value
//!         shared_config_files "a" "b"  // attribute, list value
//!         assume_role role_arn="arn"   // block with one attribute
//!     }
//! }
//! ```
//!
//! A node is a block when it has a children block (even an empty one) or only
//! properties. Each label opens one more nested block, and labelled siblings
//! of the same type share their outer blocks, exactly like the members of a
//! JSON object.
//!
//! # JSON
//!
//! Object members become blocks, arrays of objects become repeated blocks, and
//! everything else is an attribute.
//!
//! Labels are recovered from the schema: `key_provider { aws_kms { } }` is
//! read as `key_provider "aws_kms" { }` when the schema says `key_provider`
//! takes one label.

use crate::config::diagnostics::{Diagnostic, Diagnostics, Pos, SourceRange};
use kdl::{KdlDocument, KdlError, KdlNode, KdlValue};
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// A named attribute and its value.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub name: String,
    pub value: Value,
    pub range: SourceRange,
}

/// A typed block, its labels and its nested body.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub kind: String,
    pub labels: Vec<String>,
    pub body: Body,
    pub range: SourceRange,
}

/// A parsed configuration body.
#[derive(Debug, Clone, PartialEq)]
pub struct Body {
    pub attributes: BTreeMap<String, Attribute>,
    pub blocks: Vec<Block>,
    pub range: SourceRange,
}

/// Describes one block type a schema accepts.
#[derive(Debug, Clone, Copy)]
pub struct BlockSchema {
    pub kind: &'static str,
    /// Names of the labels, used in diagnostics.
    pub labels: &'static [&'static str],
}

/// The attributes and block types a body is allowed to contain.
#[derive(Debug, Clone, Copy)]
pub struct BodySchema {
    pub attributes: &'static [&'static str],
    pub blocks: &'static [BlockSchema],
}

impl BodySchema {
    fn block(&self, kind: &str) -> Option<&BlockSchema> {
        self.blocks.iter().find(|b| b.kind == kind)
    }

    fn has_attribute(&self, name: &str) -> bool {
        self.attributes.contains(&name)
    }
}

/// The parts of a body selected by a [`BodySchema`].
#[derive(Debug, Clone, Default)]
pub struct BodyContent {
    pub attributes: BTreeMap<String, Attribute>,
    /// Blocks in declaration order, each with exactly as many labels as the
    /// schema asks for.
    pub blocks: Vec<Block>,
}

impl Body {
    /// An empty body anchored at `range`.
    pub fn new(range: SourceRange) -> Self {
        Self {
            attributes: BTreeMap::new(),
            blocks: Vec::new(),
            range,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty() && self.blocks.is_empty()
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.get(name)
    }

    /// Insert an attribute, rejecting a second declaration of the same name.
    fn insert_attribute(&mut self, attr: Attribute, diags: &mut Diagnostics) {
        if let Some(existing) = self.attributes.get(&attr.name) {
            diags.push(
                Diagnostic::error("Duplicate argument")
                    .with_detail(format!(
                        "The argument `{}` was already set at {}. Each argument may be set only once.",
                        attr.name, existing.range
                    ))
                    .with_subject(&attr.range),
            );
            return;
        }
        self.attributes.insert(attr.name.clone(), attr);
    }

    /// Extract the attributes and blocks named by `schema`.
    ///
    /// Anything the schema does not mention is reported as an error. Blocks
    /// declared with fewer labels than the schema expects take their missing
    /// labels from the names of their nested blocks.
    pub fn content(&self, schema: &BodySchema) -> (BodyContent, Diagnostics) {
        let mut content = BodyContent::default();
        let mut diags = Diagnostics::new();

        for attr in self.attributes.values() {
            if schema.has_attribute(&attr.name) {
                content.attributes.insert(attr.name.clone(), attr.clone());
            } else if schema.block(&attr.name).is_some() {
                diags.push(
                    Diagnostic::error("Unsupported argument")
                        .with_detail(format!(
                            "`{}` is a block, not an argument; declare it with a body: `{} ... {{ }}`.",
                            attr.name, attr.name
                        ))
                        .with_subject(&attr.range),
                );
            } else {
                diags.push(
                    Diagnostic::error("Unsupported argument")
                        .with_detail(format!(
                            "An argument named `{}` is not expected here.",
                            attr.name
                        ))
                        .with_subject(&attr.range),
                );
            }
        }

        for block in &self.blocks {
            match schema.block(&block.kind) {
                Some(block_schema) => {
                    expand_labels(block, block_schema, &mut content.blocks, &mut diags)
                }
                None if schema.has_attribute(&block.kind) => diags.push(
                    Diagnostic::error("Unsupported block type")
                        .with_detail(format!(
                            "`{}` is an argument, not a block; set it as `{} <value>`.",
                            block.kind, block.kind
                        ))
                        .with_subject(&block.range),
                ),
                None => diags.push(
                    Diagnostic::error("Unsupported block type")
                        .with_detail(format!(
                            "Blocks of type `{}` are not expected here.",
                            block.kind
                        ))
                        .with_subject(&block.range),
                ),
            }
        }

        (content, diags)
    }

    /// Fold `other` into `self`, `other` taking precedence.
    ///
    /// - attributes: `other` wins on a name collision, values are replaced
    ///   wholesale;
    /// - blocks: matched by type and labels; matches are merged recursively,
    ///   blocks only in `other` are appended;
    /// - attributes and blocks never replace each other, even when names match.
    pub fn merge(&mut self, other: Body) {
        for (name, attr) in other.attributes {
            self.attributes.insert(name, attr);
        }
        for block in other.blocks {
            match self
                .blocks
                .iter_mut()
                .find(|b| b.kind == block.kind && b.labels == block.labels)
            {
                Some(existing) => existing.body.merge(block.body),
                None => self.blocks.push(block),
            }
        }
    }

    /// Render the body as a JSON value, blocks nested by type then label.
    pub fn to_value(&self) -> Value {
        let mut out = Map::new();
        for attr in self.attributes.values() {
            out.insert(attr.name.clone(), attr.value.clone());
        }
        for block in &self.blocks {
            let mut path: Vec<&str> = vec![block.kind.as_str()];
            path.extend(block.labels.iter().map(String::as_str));
            insert_path(&mut out, &path, block.body.to_value());
        }
        Value::Object(out)
    }
}

impl Serialize for Body {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

fn insert_path(map: &mut Map<String, Value>, path: &[&str], value: Value) {
    let Some((first, rest)) = path.split_first() else {
        return;
    };
    if rest.is_empty() {
        match map.get_mut(*first) {
            None => {
                map.insert(first.to_string(), value);
            }
            Some(Value::Array(items)) => items.push(value),
            Some(existing) => {
                let previous = existing.take();
                *existing = Value::Array(vec![previous, value]);
            }
        }
        return;
    }
    let entry = map
        .entry(first.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if !entry.is_object() {
        // An attribute already owns this name; keep both side by side.
        let previous = entry.take();
        let mut nested = Map::new();
        insert_path(&mut nested, rest, value);
        *entry = Value::Array(vec![previous, Value::Object(nested)]);
        return;
    }
    if let Value::Object(inner) = entry {
        insert_path(inner, rest, value);
    }
}

fn expand_labels(
    block: &Block,
    schema: &BlockSchema,
    out: &mut Vec<Block>,
    diags: &mut Diagnostics,
) {
    let want = schema.labels.len();
    let have = block.labels.len();

    if have >= want {
        out.push(block.clone());
        return;
    }

    if !block.body.attributes.is_empty() || block.body.blocks.is_empty() {
        diags.push(
            Diagnostic::error(format!(
                "Missing {} for {}",
                schema.labels[have], block.kind
            ))
            .with_detail(format!(
                "All {} blocks must have {} label(s) ({}).",
                block.kind,
                want,
                schema.labels.join(", ")
            ))
            .with_subject(&block.range),
        );
        return;
    }

    for child in &block.body.blocks {
        let mut labels = block.labels.clone();
        labels.push(child.kind.clone());
        labels.extend(child.labels.iter().cloned());
        let nested = Block {
            kind: block.kind.clone(),
            labels,
            body: child.body.clone(),
            range: child.range.clone(),
        };
        expand_labels(&nested, schema, out, diags);
    }
}

// ============================================================================
// KDL
// ============================================================================

struct KdlSource<'a> {
    filename: &'a str,
    text: &'a str,
}

impl KdlSource<'_> {
    fn node_range(&self, node: &KdlNode) -> SourceRange {
        let span = node.span();
        // Node spans may start on the whitespace leading up to the node.
        let skipped = self
            .text
            .get(span.offset()..)
            .map(|rest| rest.len() - rest.trim_start().len())
            .unwrap_or(0)
            .min(span.len());
        SourceRange::from_span(
            self.filename,
            self.text,
            span.offset() + skipped,
            span.len() - skipped,
        )
    }
}

/// Parse a KDL document into a body.
///
/// Returns `None` only when the text is not valid KDL. Lowering problems
/// (duplicate arguments, non-string labels) are reported alongside a body.
pub fn parse_kdl(filename: &str, source: &str) -> (Option<Body>, Diagnostics) {
    let doc: KdlDocument = match source.parse() {
        Ok(doc) => doc,
        Err(err) => return (None, kdl_error_diagnostics(filename, source, &err)),
    };

    let src = KdlSource {
        filename,
        text: source,
    };
    let mut diags = Diagnostics::new();
    let mut body = Body::new(SourceRange::whole_file(filename));
    lower_kdl_nodes(doc.nodes(), &src, &mut body, &mut diags);
    (Some(body), diags)
}

fn kdl_error_diagnostics(filename: &str, source: &str, err: &KdlError) -> Diagnostics {
    let mut diags = Diagnostics::new();
    for problem in &err.diagnostics {
        let subject = SourceRange::from_span(
            filename,
            source,
            problem.span.offset(),
            problem.span.len(),
        );
        let summary = problem
            .message
            .clone()
            .unwrap_or_else(|| "Invalid KDL syntax".to_string());
        let mut diag = Diagnostic::error(summary).with_subject(&subject);
        if let Some(ref help) = problem.help {
            diag = diag.with_detail(help.clone());
        }
        diags.push(diag);
    }
    if diags.is_empty() {
        diags.push(
            Diagnostic::error("Invalid KDL syntax")
                .with_detail(err.to_string())
                .with_subject(&SourceRange::whole_file(filename)),
        );
    }
    diags
}

fn lower_kdl_nodes(
    nodes: &[KdlNode],
    src: &KdlSource<'_>,
    body: &mut Body,
    diags: &mut Diagnostics,
) {
    // Block type -> index of the block holding that type's labelled siblings.
    let mut labelled: BTreeMap<String, usize> = BTreeMap::new();

    for node in nodes {
        let name = node.name().value().to_string();
        let range = src.node_range(node);

        let mut args = Vec::new();
        let mut props = Map::new();
        for entry in node.entries() {
            let value = kdl_value(entry.value());
            match entry.name() {
                Some(key) => {
                    props.insert(key.value().to_string(), value);
                }
                None => args.push(value),
            }
        }

        match node.children() {
            Some(children) => {
                let mut labels = Vec::with_capacity(args.len());
                for arg in args {
                    match arg {
                        Value::String(label) => labels.push(label),
                        other => diags.push(
                            Diagnostic::error("Invalid block label")
                                .with_detail(format!(
                                    "Labels of `{}` blocks must be strings, found {}.",
                                    name, other
                                ))
                                .with_subject(&range),
                        ),
                    }
                }

                let mut inner = properties_body(props, &range, diags);
                lower_kdl_nodes(children.nodes(), src, &mut inner, diags);

                if labels.is_empty() {
                    body.blocks.push(Block {
                        kind: name,
                        labels: Vec::new(),
                        body: inner,
                        range,
                    });
                    continue;
                }

                let index = match labelled.get(&name) {
                    Some(&index) => index,
                    None => {
                        body.blocks.push(Block {
                            kind: name.clone(),
                            labels: Vec::new(),
                            body: Body::new(range.clone()),
                            range: range.clone(),
                        });
                        labelled.insert(name, body.blocks.len() - 1);
                        body.blocks.len() - 1
                    }
                };
                nest_labels(&mut body.blocks[index].body, &labels, inner, &range);
            }
            None if !args.is_empty() && !props.is_empty() => {
                diags.push(
                    Diagnostic::error("Invalid argument value")
                        .with_detail(format!(
                            "`{}` mixes positional values and properties; use one or the other.",
                            name
                        ))
                        .with_subject(&range),
                );
            }
            None if !props.is_empty() => {
                let inner = properties_body(props, &range, diags);
                body.blocks.push(Block {
                    kind: name,
                    labels: Vec::new(),
                    body: inner,
                    range,
                });
            }
            None => {
                let value = match args.len() {
                    0 => Value::Null,
                    1 => args.remove(0),
                    _ => Value::Array(args),
                };
                body.insert_attribute(Attribute { name, value, range }, diags);
            }
        }
    }
}

fn properties_body(
    props: Map<String, Value>,
    range: &SourceRange,
    diags: &mut Diagnostics,
) -> Body {
    let mut body = Body::new(range.clone());
    for (name, value) in props {
        body.insert_attribute(
            Attribute {
                name,
                value,
                range: range.clone(),
            },
            diags,
        );
    }
    body
}

/// Place `inner` below one block per label. Intermediate label blocks are
/// shared between siblings; the last one is always new, so a repeated
/// declaration stays visible as a duplicate.
fn nest_labels(container: &mut Body, labels: &[String], inner: Body, range: &SourceRange) {
    match labels {
        [] => container.merge(inner),
        [last] => container.blocks.push(Block {
            kind: last.clone(),
            labels: Vec::new(),
            body: inner,
            range: range.clone(),
        }),
        [first, rest @ ..] => {
            let index = match container.blocks.iter().position(|b| &b.kind == first) {
                Some(index) => index,
                None => {
                    container.blocks.push(Block {
                        kind: first.clone(),
                        labels: Vec::new(),
                        body: Body::new(range.clone()),
                        range: range.clone(),
                    });
                    container.blocks.len() - 1
                }
            };
            nest_labels(&mut container.blocks[index].body, rest, inner, range);
        }
    }
}

fn kdl_value(value: &KdlValue) -> Value {
    if let Some(s) = value.as_string() {
        Value::String(s.to_string())
    } else if let Some(b) = value.as_bool() {
        Value::Bool(b)
    } else if let Some(i) = value.as_integer() {
        // JSON numbers stop at 64 bits; wider integers are kept as text.
        i64::try_from(i)
            .map(Value::from)
            .unwrap_or_else(|_| Value::String(i.to_string()))
    } else if let Some(f) = value.as_float() {
        serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    } else {
        Value::Null
    }
}

// ============================================================================
// JSON
// ============================================================================

/// Parse a JSON document into a body. The document root must be an object.
pub fn parse_json(filename: &str, source: &str) -> (Option<Body>, Diagnostics) {
    let range = SourceRange::whole_file(filename);
    match serde_json::from_str::<Value>(source) {
        Ok(Value::Object(map)) => (Some(lower_json_object(map, &range)), Diagnostics::new()),
        Ok(other) => (
            None,
            Diagnostic::error("Invalid configuration document")
                .with_detail(format!(
                    "The root of a JSON configuration must be an object, found {}.",
                    json_kind(&other)
                ))
                .with_subject(&range)
                .into(),
        ),
        Err(err) => {
            let pos = Pos {
                line: err.line().max(1),
                column: err.column().max(1),
                byte: 0,
            };
            let subject = SourceRange {
                filename: filename.to_string(),
                start: pos,
                end: pos,
            };
            (
                None,
                Diagnostic::error("Invalid JSON syntax")
                    .with_detail(err.to_string())
                    .with_subject(&subject)
                    .into(),
            )
        }
    }
}

/// Parse `source` as JSON when it starts with `{`, as KDL otherwise.
pub fn parse_auto(filename: &str, source: &str) -> (Option<Body>, Diagnostics) {
    if source.trim_start().starts_with('{') {
        parse_json(filename, source)
    } else {
        parse_kdl(filename, source)
    }
}

fn lower_json_object(map: Map<String, Value>, range: &SourceRange) -> Body {
    let mut body = Body::new(range.clone());
    for (key, value) in map {
        match value {
            Value::Object(inner) => body.blocks.push(Block {
                kind: key,
                labels: Vec::new(),
                body: lower_json_object(inner, range),
                range: range.clone(),
            }),
            Value::Array(items) if !items.is_empty() && items.iter().all(Value::is_object) => {
                for item in items {
                    if let Value::Object(inner) = item {
                        body.blocks.push(Block {
                            kind: key.clone(),
                            labels: Vec::new(),
                            body: lower_json_object(inner, range),
                            range: range.clone(),
                        });
                    }
                }
            }
            other => {
                // serde_json has already collapsed duplicate keys.
                body.attributes.insert(
                    key.clone(),
                    Attribute {
                        name: key,
                        value: other,
                        range: range.clone(),
                    },
                );
            }
        }
    }
    body
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
