//! Resolved schema model.
//!
//! A closed tagged tree: one `SchemaKind` per node plus the composition
//! keywords that sit next to it. Keywords the engine does not interpret are
//! carried verbatim in `Meta::extra`. No `serde_json::Value` dispatch happens
//! downstream of the resolver except for defaults and passthrough data.
pub mod resolve;

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use regex::Regex;
use serde_json::Value;

use crate::data::Data;
use crate::path::{Path, Segment};

pub use resolve::{resolve, Resolver};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Meta {
    /// `$id` declared on the node itself.
    pub id: Option<String>,
    /// Token of the `$ref` this node was reached through, if any.
    pub reference: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub default: Option<Value>,
    /// `type` listed `"null"` next to another type.
    pub nullable: bool,
    /// Uninterpreted keywords in declaration order.
    pub extra: IndexMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SchemaKind {
    /// No type information; accepts anything.
    Any,
    Null,
    Boolean,
    Integer(NumberRules),
    Number(NumberRules),
    String(StringRules),
    Array(ArrayRules),
    Object(ObjectRules),
    Enum(EnumRules),
    /// Cycle in `$ref` resolution; follow through `Schema::follow`.
    BackRef(String),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NumberRules {
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
    pub exclusive_minimum: Option<f64>,
    pub exclusive_maximum: Option<f64>,
    pub multiple_of: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StringRules {
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    pub pattern: Option<Pattern>,
    pub format: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArrayRules {
    pub items: Option<Arc<SchemaNode>>,
    pub min_items: Option<usize>,
    pub max_items: Option<usize>,
    pub unique_items: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectRules {
    pub properties: IndexMap<String, Arc<SchemaNode>>,
    pub required: Vec<String>,
    pub additional_properties: bool,
}

impl Default for ObjectRules {
    fn default() -> Self {
        Self { properties: IndexMap::new(), required: Vec::new(), additional_properties: true }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnumRules {
    pub values: Vec<Data>,
    /// `enumNames`, parallel to `values` when present.
    pub labels: Option<Vec<String>>,
    /// `type` declared next to `enum`, if any.
    pub declared: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Combinator {
    AllOf,
    AnyOf,
    OneOf,
}

impl Combinator {
    pub fn keyword(self) -> &'static str {
        match self {
            Combinator::AllOf => "allOf",
            Combinator::AnyOf => "anyOf",
            Combinator::OneOf => "oneOf",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Composition {
    pub combinator: Combinator,
    pub branches: Vec<Arc<SchemaNode>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SchemaNode {
    pub meta: Meta,
    pub kind: SchemaKind,
    pub compositions: Vec<Composition>,
}

/// Compiled `pattern`; equality is by source text.
#[derive(Debug, Clone)]
pub struct Pattern {
    pub source: String,
    pub regex: Regex,
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool { self.source == other.source }
}

impl SchemaNode {
    pub fn any() -> Self {
        Self { meta: Meta::default(), kind: SchemaKind::Any, compositions: Vec::new() }
    }

    pub fn with_kind(kind: SchemaKind) -> Self {
        Self { kind, ..Self::any() }
    }

    /// Identity tokens a custom field may be registered under.
    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        self.meta.reference.iter().chain(self.meta.id.iter()).map(String::as_str)
    }

    pub fn object(&self) -> Option<&ObjectRules> {
        match &self.kind {
            SchemaKind::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn is_required(&self, name: &str) -> bool {
        self.object().is_some_and(|o| o.required.iter().any(|r| r == name))
    }

    pub fn property(&self, name: &str) -> Option<&Arc<SchemaNode>> {
        self.object().and_then(|o| o.properties.get(name))
    }

    /// Composition branches that let the user pick one (`oneOf`/`anyOf`).
    pub fn variants(&self) -> Option<&Composition> {
        self.compositions
            .iter()
            .find(|c| matches!(c.combinator, Combinator::OneOf | Combinator::AnyOf))
    }

    pub fn default_data(&self) -> Option<Data> {
        self.meta.default.as_ref().map(Data::from)
    }

    /// Whether the node leads back into a definition that encloses it: a
    /// back-reference, or a composition with one among its branches. Expanding
    /// such a node without data to consume never ends.
    pub fn reenters(&self) -> bool {
        matches!(self.kind, SchemaKind::BackRef(_))
            || self.compositions.iter().flat_map(|c| &c.branches).any(|b| b.reenters())
    }
}

// ————————————————————————————————————————————————————————————————————————————
// RESOLVED DOCUMENT
// ————————————————————————————————————————————————————————————————————————————

/// A resolved schema: the root tree plus every node reachable by token.
#[derive(Debug, Clone)]
pub struct Schema {
    pub root: Arc<SchemaNode>,
    pub index: HashMap<String, Arc<SchemaNode>>,
}

impl Schema {
    /// Follow a back-reference to the node it names. Other nodes pass through.
    pub fn follow(&self, node: &Arc<SchemaNode>) -> Arc<SchemaNode> {
        match &node.kind {
            SchemaKind::BackRef(token) => match self.index.get(token) {
                Some(target) => overlay_meta(node, target),
                None => node.clone(),
            },
            _ => node.clone(),
        }
    }

    /// The node as rendered and edited: back-references followed and `allOf`
    /// branches folded into it. Shares the input when there is nothing to do.
    pub fn effective(&self, node: &Arc<SchemaNode>) -> Arc<SchemaNode> {
        self.fold_all_of(node, &mut Vec::new())
    }

    /// `open` holds the tokens being folded further up. A branch that names
    /// one of them stays unexpanded and contributes nothing.
    fn fold_all_of(&self, node: &Arc<SchemaNode>, open: &mut Vec<String>) -> Arc<SchemaNode> {
        let entered = match &node.kind {
            SchemaKind::BackRef(token) if open.contains(token) => return node.clone(),
            SchemaKind::BackRef(token) => Some(token.clone()),
            _ => None,
        };
        let node = self.follow(node);
        if !node.compositions.iter().any(|c| c.combinator == Combinator::AllOf) {
            return node;
        }
        let depth = open.len();
        open.extend(entered);
        open.extend(node.tokens().map(String::from));
        let mut base = (*node).clone();
        let mut all_of = Vec::new();
        base.compositions.retain(|c| {
            if c.combinator == Combinator::AllOf {
                all_of.extend(c.branches.iter().cloned());
                false
            } else {
                true
            }
        });
        let mut merged = base;
        for branch in &all_of {
            let branch = self.fold_all_of(branch, open);
            if !matches!(branch.kind, SchemaKind::BackRef(_)) {
                merged = merge(&merged, &branch);
            }
        }
        open.truncate(depth);
        Arc::new(merged)
    }

    /// Schema node describing `path`, looking through variant branches when
    /// the property is owned by one of them.
    pub fn node_at(&self, path: &Path) -> Option<Arc<SchemaNode>> {
        let mut node = self.effective(&self.root);
        for seg in path.segments() {
            let next = match seg {
                Segment::Key(name) => node.property(name).cloned().or_else(|| {
                    node.variants().and_then(|v| {
                        v.branches
                            .iter()
                            .map(|b| self.effective(b))
                            .find_map(|b| b.property(name).cloned())
                    })
                }),
                Segment::Index(_) => match &node.kind {
                    SchemaKind::Array(a) => Some(
                        a.items.clone().unwrap_or_else(|| Arc::new(SchemaNode::any()))
                    ),
                    _ => None,
                },
            }?;
            node = self.effective(&next);
        }
        Some(node)
    }
}

/// Annotations written at a `$ref` site win over the target's.
fn overlay_meta(site: &SchemaNode, target: &Arc<SchemaNode>) -> Arc<SchemaNode> {
    let site_meta = &site.meta;
    if site_meta.title.is_none() && site_meta.description.is_none() && site_meta.default.is_none() {
        return target.clone();
    }
    let mut node = (**target).clone();
    if site_meta.title.is_some() { node.meta.title = site_meta.title.clone(); }
    if site_meta.description.is_some() { node.meta.description = site_meta.description.clone(); }
    if site_meta.default.is_some() { node.meta.default = site_meta.default.clone(); }
    Arc::new(node)
}

/// Conjunction of two nodes, used for `allOf` and for variant branches laid
/// over their base object. `b` wins on conflicting scalar settings.
pub fn merge(a: &SchemaNode, b: &SchemaNode) -> SchemaNode {
    let meta = Meta {
        id: a.meta.id.clone().or_else(|| b.meta.id.clone()),
        reference: a.meta.reference.clone().or_else(|| b.meta.reference.clone()),
        title: a.meta.title.clone().or_else(|| b.meta.title.clone()),
        description: a.meta.description.clone().or_else(|| b.meta.description.clone()),
        default: a.meta.default.clone().or_else(|| b.meta.default.clone()),
        nullable: a.meta.nullable && b.meta.nullable,
        extra: {
            let mut extra = a.meta.extra.clone();
            for (k, v) in &b.meta.extra {
                extra.entry(k.clone()).or_insert_with(|| v.clone());
            }
            extra
        },
    };

    let kind = match (&a.kind, &b.kind) {
        (SchemaKind::Any, other) | (other, SchemaKind::Any) => other.clone(),
        (SchemaKind::Object(x), SchemaKind::Object(y)) => {
            let mut properties = x.properties.clone();
            for (name, prop) in &y.properties {
                let merged = match properties.get(name) {
                    Some(existing) => Arc::new(merge(existing, prop)),
                    None => prop.clone(),
                };
                properties.insert(name.clone(), merged);
            }
            let mut required = x.required.clone();
            for r in &y.required {
                if !required.contains(r) { required.push(r.clone()); }
            }
            SchemaKind::Object(ObjectRules {
                properties,
                required,
                additional_properties: x.additional_properties && y.additional_properties,
            })
        }
        (SchemaKind::Integer(x), SchemaKind::Integer(y))
        | (SchemaKind::Integer(x), SchemaKind::Number(y)) => SchemaKind::Integer(merge_numbers(x, y)),
        (SchemaKind::Number(x), SchemaKind::Integer(y)) => SchemaKind::Integer(merge_numbers(x, y)),
        (SchemaKind::Number(x), SchemaKind::Number(y)) => SchemaKind::Number(merge_numbers(x, y)),
        (SchemaKind::String(x), SchemaKind::String(y)) => SchemaKind::String(StringRules {
            min_length: y.min_length.or(x.min_length),
            max_length: y.max_length.or(x.max_length),
            pattern: y.pattern.clone().or_else(|| x.pattern.clone()),
            format: y.format.clone().or_else(|| x.format.clone()),
        }),
        (SchemaKind::Enum(_), SchemaKind::Enum(y)) => SchemaKind::Enum(y.clone()),
        (SchemaKind::Enum(e), _) | (_, SchemaKind::Enum(e)) => SchemaKind::Enum(e.clone()),
        (_, other) => other.clone(),
    };

    let mut compositions = a.compositions.clone();
    compositions.extend(b.compositions.iter().cloned());
    SchemaNode { meta, kind, compositions }
}

fn merge_numbers(x: &NumberRules, y: &NumberRules) -> NumberRules {
    NumberRules {
        minimum: y.minimum.or(x.minimum),
        maximum: y.maximum.or(x.maximum),
        exclusive_minimum: y.exclusive_minimum.or(x.exclusive_minimum),
        exclusive_maximum: y.exclusive_maximum.or(x.exclusive_maximum),
        multiple_of: y.multiple_of.or(x.multiple_of),
    }
}
