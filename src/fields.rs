//! Resolved schema + hints + data → field tree.
//!
//! One `FieldNode` per schema node that has something to render. The kind of
//! each node is decided once, first match wins:
//!
//! 1. a registered custom field (`ui:field`, then the node's identity tokens)
//! 2. a `ui:widget` override
//! 3. `enum` → choice
//! 4. `oneOf`/`anyOf` → variant
//! 5. the declared type: toggle, numeric, extended text, text, composite,
//!    repeating (or multi-choice for a unique array of enums), null
//! 6. no type information → raw
//!
//! The data never changes the kind. A value of the wrong type is bound as-is
//! and left for the validator to report.
pub mod registry;

use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::data::Data;
use crate::hints::{UiHint, UiHints};
use crate::path::Path;
use crate::schema::{merge, Schema, SchemaKind, SchemaNode};
use crate::validate::{is_valid, ValidationError};

pub use registry::{CustomField, FieldRegistry};

/// String formats rendered as multi-line inputs.
const MULTILINE_FORMATS: &[&str] = &["textarea", "multiline", "markdown"];

// ————————————————————————————————————————————————————————————————————————————
// TYPES
// ————————————————————————————————————————————————————————————————————————————

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldKind {
    Choice,
    MultiChoice,
    Toggle,
    Numeric,
    ExtendedText,
    Text,
    Composite,
    Repeating,
    Variant,
    Custom(String),
    Hidden,
    /// Widget name with no built-in meaning; the host decides.
    Widget(String),
    Null,
    Raw,
    /// Recursive schema with nothing below it yet.
    Deferred,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Choice {
    pub label: String,
    pub value: Data,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldNode {
    pub path: Path,
    pub kind: FieldKind,
    #[serde(skip)]
    pub schema: Arc<SchemaNode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<Arc<UiHint>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Data>,
    pub label: String,
    pub required: bool,
    pub disabled: bool,
    pub readonly: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<Choice>,
    /// Active choice, variant branch or preset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected: Option<usize>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<FieldNode>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ValidationError>,
}

impl FieldNode {
    pub fn find(&self, path: &Path) -> Option<&FieldNode> {
        if &self.path == path && !self.children.iter().any(|c| &c.path == path) {
            return Some(self);
        }
        self.children
            .iter()
            .filter(|c| path.starts_with(&c.path))
            .find_map(|c| c.find(path))
    }

    pub fn child(&self, name: &str) -> Option<&FieldNode> {
        self.children.iter().find(|c| c.path.last().is_some_and(|s| s.to_string() == name))
    }

    /// Depth-first walk, parents before children.
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a FieldNode)) {
        visit(self);
        for child in &self.children {
            child.walk(visit);
        }
    }

    pub fn error_count(&self) -> usize {
        self.errors.len() + self.children.iter().map(FieldNode::error_count).sum::<usize>()
    }
}

/// Flags a field passes down to everything below it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Inherited {
    pub disabled: bool,
    pub readonly: bool,
}

/// Where a node sits relative to its parent.
#[derive(Debug, Clone, Copy, Default)]
pub struct Slot<'n> {
    pub name: Option<&'n str>,
    pub required: bool,
    pub inherited: Inherited,
}

// ————————————————————————————————————————————————————————————————————————————
// IMPLEMENTATION
// ————————————————————————————————————————————————————————————————————————————

pub struct FieldMapper<'a> {
    schema: &'a Schema,
    hints: &'a UiHints,
    registry: &'a FieldRegistry,
}

impl<'a> FieldMapper<'a> {
    pub fn new(schema: &'a Schema, hints: &'a UiHints, registry: &'a FieldRegistry) -> Self {
        Self { schema, hints, registry }
    }

    pub fn schema(&self) -> &'a Schema { self.schema }

    /// Map the whole form. Pure: the same inputs give the same tree.
    pub fn map(&self, data: &Data) -> FieldNode {
        self.map_node(&self.schema.root, &Path::root(), Some(data), Slot::default())
    }

    pub fn map_node(&self, node: &Arc<SchemaNode>, path: &Path, value: Option<&Data>, slot: Slot<'_>) -> FieldNode {
        let hint = self.hints.get(path).cloned();
        let inherited = Inherited {
            disabled: slot.inherited.disabled || hint.as_ref().is_some_and(|h| h.disabled),
            readonly: slot.inherited.readonly || hint.as_ref().is_some_and(|h| h.readonly),
        };

        if !path.is_root() && node.reenters() && value.is_none_or(Data::is_null) {
            let mut seed = self.seed(node.clone(), path, value, &hint, slot, inherited);
            seed.kind = FieldKind::Deferred;
            return seed;
        }

        let eff = self.schema.effective(node);
        let custom = hint
            .as_ref()
            .and_then(|h| h.field.as_deref())
            .into_iter()
            .chain(node.tokens())
            .chain(eff.tokens())
            .find_map(|token| self.registry.get(token));
        let seed = self.seed(eff.clone(), path, value, &hint, slot, inherited);
        if let Some(field) = custom {
            debug!(path = %path, token = field.token(), "custom field");
            let mut seed = seed;
            seed.kind = FieldKind::Custom(field.token().to_string());
            return field.build(self, seed, inherited);
        }

        let mut field = seed;
        if let Some(widget) = hint.as_ref().and_then(|h| h.widget.as_deref()) {
            field.kind = widget_kind(widget, &eff);
            self.fill(&mut field, &eff, value, inherited);
            return field;
        }
        field.kind = self.decide(&eff);
        self.fill(&mut field, &eff, value, inherited);
        field
    }

    fn seed(
        &self,
        schema: Arc<SchemaNode>,
        path: &Path,
        value: Option<&Data>,
        hint: &Option<Arc<UiHint>>,
        slot: Slot<'_>,
        inherited: Inherited,
    ) -> FieldNode {
        let label = hint
            .as_ref()
            .and_then(|h| h.title.clone())
            .or_else(|| schema.meta.title.clone())
            .or_else(|| slot.name.map(str::to_string))
            .unwrap_or_default();
        FieldNode {
            path: path.clone(),
            kind: FieldKind::Raw,
            schema,
            hint: hint.clone(),
            value: value.cloned(),
            label,
            required: slot.required,
            disabled: inherited.disabled,
            readonly: inherited.readonly,
            choices: Vec::new(),
            selected: None,
            children: Vec::new(),
            errors: Vec::new(),
        }
    }

    fn decide(&self, eff: &SchemaNode) -> FieldKind {
        if let SchemaKind::Enum(_) = eff.kind {
            return FieldKind::Choice;
        }
        if eff.variants().is_some() && matches!(eff.kind, SchemaKind::Any | SchemaKind::Object(_)) {
            return FieldKind::Variant;
        }
        match &eff.kind {
            SchemaKind::Boolean => FieldKind::Toggle,
            SchemaKind::Integer(_) | SchemaKind::Number(_) => FieldKind::Numeric,
            SchemaKind::String(rules)
                if rules.format.as_deref().is_some_and(|f| MULTILINE_FORMATS.contains(&f)) =>
            {
                FieldKind::ExtendedText
            }
            SchemaKind::String(_) => FieldKind::Text,
            SchemaKind::Object(_) => FieldKind::Composite,
            SchemaKind::Array(rules) => {
                let enum_items = rules
                    .items
                    .as_ref()
                    .is_some_and(|i| matches!(self.schema.effective(i).kind, SchemaKind::Enum(_)));
                if enum_items && rules.unique_items { FieldKind::MultiChoice } else { FieldKind::Repeating }
            }
            SchemaKind::Null => FieldKind::Null,
            SchemaKind::Any | SchemaKind::BackRef(_) | SchemaKind::Enum(_) => FieldKind::Raw,
        }
    }

    /// Choices, selection and children for an already decided kind.
    fn fill(&self, field: &mut FieldNode, eff: &Arc<SchemaNode>, value: Option<&Data>, inherited: Inherited) {
        match field.kind {
            FieldKind::Choice => {
                field.choices = choices(eff, field.hint.as_deref());
                field.selected = value.and_then(|v| field.choices.iter().position(|c| &c.value == v));
            }
            FieldKind::MultiChoice => {
                if let SchemaKind::Array(rules) = &eff.kind {
                    if let Some(items) = &rules.items {
                        let items = self.schema.effective(items);
                        let item_hint = self.hints.get(&field.path.index(0));
                        field.choices = choices(&items, item_hint.map(|h| &**h).or(field.hint.as_deref()));
                    }
                }
            }
            FieldKind::Composite => {
                field.children = self.properties(eff, &field.path, value, field.hint.as_deref(), inherited);
            }
            FieldKind::Repeating => {
                if let (SchemaKind::Array(rules), Some(Data::Array(xs))) = (&eff.kind, value) {
                    let items = rules.items.clone().unwrap_or_else(|| Arc::new(SchemaNode::any()));
                    field.children = xs
                        .iter()
                        .enumerate()
                        .map(|(i, x)| {
                            let slot = Slot { name: None, required: false, inherited };
                            self.map_node(&items, &field.path.index(i), Some(x), slot)
                        })
                        .collect();
                }
            }
            FieldKind::Variant => self.variant(field, eff, value, inherited),
            _ => {
                if let SchemaKind::Enum(_) = eff.kind {
                    field.choices = choices(eff, field.hint.as_deref());
                }
            }
        }
    }

    fn variant(&self, field: &mut FieldNode, eff: &Arc<SchemaNode>, value: Option<&Data>, inherited: Inherited) {
        let Some(variants) = eff.variants() else { return };
        let branches: Vec<Arc<SchemaNode>> = variants.branches.iter().map(|b| self.schema.effective(b)).collect();
        field.choices = branches
            .iter()
            .enumerate()
            .map(|(i, b)| Choice {
                label: b.meta.title.clone().unwrap_or_else(|| format!("Option {}", i + 1)),
                value: Data::from(i as i64),
            })
            .collect();
        let selected = value
            .and_then(|v| branches.iter().position(|b| is_valid(self.schema, b, v)))
            .unwrap_or(0);
        field.selected = Some(selected);

        // The base node without the picked composition, then the branch on top.
        let mut base = (**eff).clone();
        if let Some(pos) = base.compositions.iter().position(|c| c == variants) {
            base.compositions.remove(pos);
        }
        let Some(branch) = branches.get(selected) else { return };
        let merged = Arc::new(merge(&base, branch));
        if merged.object().is_some() {
            field.children = self.properties(&merged, &field.path, value, field.hint.as_deref(), inherited);
        } else if !variants.branches[selected].reenters() {
            let mut inner = self.seed(merged.clone(), &field.path, value, &None, Slot::default(), inherited);
            inner.label = field.label.clone();
            inner.kind = self.decide(&merged);
            self.fill(&mut inner, &merged, value, inherited);
            field.children = vec![inner];
        }
    }

    /// Children of an object node, in hint order then declaration order.
    pub fn properties(
        &self,
        node: &Arc<SchemaNode>,
        path: &Path,
        value: Option<&Data>,
        hint: Option<&UiHint>,
        inherited: Inherited,
    ) -> Vec<FieldNode> {
        let Some(object) = node.object() else { return Vec::new() };
        let declared: Vec<&str> = object.properties.keys().map(String::as_str).collect();
        let arranged = match hint {
            Some(h) => h.arrange(&declared),
            None => declared,
        };
        let map = value.and_then(Data::as_object);
        arranged
            .into_iter()
            .filter_map(|name| {
                let prop = object.properties.get(name)?;
                let slot = Slot { name: Some(name), required: node.is_required(name), inherited };
                Some(self.map_node(prop, &path.key(name), map.and_then(|m| m.get(name)), slot))
            })
            .collect()
    }
}

fn widget_kind(widget: &str, eff: &SchemaNode) -> FieldKind {
    match widget {
        "hidden" => FieldKind::Hidden,
        "textarea" => FieldKind::ExtendedText,
        "text" | "password" | "email" | "uri" | "color" => FieldKind::Text,
        "checkbox" => FieldKind::Toggle,
        "checkboxes" => FieldKind::MultiChoice,
        "select" | "radio" => match eff.kind {
            SchemaKind::Array(_) => FieldKind::MultiChoice,
            _ => FieldKind::Choice,
        },
        "updown" | "range" => FieldKind::Numeric,
        other => FieldKind::Widget(other.to_string()),
    }
}

/// Choice list of an enum node. Labels: hint `enumNames`, then schema
/// `enumNames`, then the value itself.
fn choices(node: &SchemaNode, hint: Option<&UiHint>) -> Vec<Choice> {
    let SchemaKind::Enum(rules) = &node.kind else { return Vec::new() };
    let hint_labels = hint.and_then(|h| h.enum_names.as_ref());
    rules
        .values
        .iter()
        .enumerate()
        .map(|(i, v)| {
            let label = hint_labels
                .and_then(|ls| ls.get(i))
                .or_else(|| rules.labels.as_ref().and_then(|ls| ls.get(i)))
                .cloned()
                .unwrap_or_else(|| match v {
                    Data::String(s) => s.to_string(),
                    other => other.to_value().to_string(),
                });
            Choice { label, value: v.clone() }
        })
        .collect()
}

/// Attach each error to the deepest field whose path contains it.
pub fn annotate(root: &mut FieldNode, errors: &[ValidationError]) {
    for error in errors {
        attach(root, error);
    }
}

fn attach(node: &mut FieldNode, error: &ValidationError) {
    match node.children.iter_mut().find(|c| error.path.starts_with(&c.path)) {
        Some(child) => attach(child, error),
        None => node.errors.push(error.clone()),
    }
}
