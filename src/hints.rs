//! UI-schema text → presentation hints keyed by path.
//!
//! The UI document mirrors the data shape: nested objects address nested
//! properties, `items` addresses every element of an array, and `ui:*` keys
//! carry the hints for the node they sit on. Hints never touch the schema.
use std::sync::Arc;

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::warn;

use crate::error::{Buffer, ParseError};
use crate::path::{Path, Segment};

/// Key under which an array's element hints live.
pub const ITEMS: &str = "items";
/// Order entry that stands for "every property not listed".
pub const REST: &str = "*";

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UiHint {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub widget: Option<String>,
    /// Name of a registered custom field (`ui:field`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<Vec<String>>,
    pub disabled: bool,
    pub readonly: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enum_names: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub help: Option<String>,
    /// `ui:options`, handed to the widget untouched.
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub options: IndexMap<String, Value>,
}

/// Hint path: property names, with `items` standing in for any array index.
pub type HintPath = Vec<String>;

#[derive(Debug, Clone, Default)]
pub struct UiHints {
    hints: IndexMap<HintPath, Arc<UiHint>>,
}

impl UiHints {
    pub fn empty() -> Self { Self::default() }

    pub fn len(&self) -> usize { self.hints.len() }

    pub fn is_empty(&self) -> bool { self.hints.is_empty() }

    /// Hint for a data path; array indices match the `items` entry.
    pub fn get(&self, path: &Path) -> Option<&Arc<UiHint>> {
        self.hints.get(&hint_path(path))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&HintPath, &Arc<UiHint>)> {
        self.hints.iter()
    }
}

pub fn hint_path(path: &Path) -> HintPath {
    path.segments()
        .iter()
        .map(|seg| match seg {
            Segment::Key(k) => k.clone(),
            Segment::Index(_) => ITEMS.to_string(),
        })
        .collect()
}

/// Parse UI-schema text. Blank text is an empty hint set.
///
/// Callers decide how to degrade on error; the form still renders without
/// hints.
pub fn parse_hints(ui_text: &str) -> Result<UiHints, ParseError> {
    if ui_text.trim().is_empty() {
        return Ok(UiHints::empty());
    }
    let doc = serde_json::from_str::<Value>(ui_text)
        .map_err(|e| ParseError::from_json(Buffer::UiSchema, &e))?;
    let Value::Object(root) = doc else {
        return Err(ParseError {
            buffer: Buffer::UiSchema,
            message: "expected a JSON object".into(),
            line: 1,
            column: 1,
        });
    };
    let mut hints = UiHints::empty();
    collect(&root, &mut Vec::new(), &mut hints);
    Ok(hints)
}

fn collect(obj: &Map<String, Value>, path: &mut HintPath, out: &mut UiHints) {
    let mut hint = UiHint::default();
    let mut any = false;
    for (key, value) in obj {
        let Some(name) = key.strip_prefix("ui:") else {
            if let Value::Object(child) = value {
                path.push(key.clone());
                collect(child, path, out);
                path.pop();
            }
            continue;
        };
        any = true;
        let applied = match name {
            "widget" => set_text(&mut hint.widget, value),
            "field" => set_text(&mut hint.field, value),
            "title" => set_text(&mut hint.title, value),
            "description" => set_text(&mut hint.description, value),
            "placeholder" => set_text(&mut hint.placeholder, value),
            "help" => set_text(&mut hint.help, value),
            "disabled" => set_flag(&mut hint.disabled, value),
            "readonly" => set_flag(&mut hint.readonly, value),
            "order" => set_list(&mut hint.order, value),
            "enumNames" => set_list(&mut hint.enum_names, value),
            "options" => match value {
                Value::Object(opts) => {
                    hint.options.extend(opts.iter().map(|(k, v)| (k.clone(), v.clone())));
                    true
                }
                _ => false,
            },
            _ => {
                hint.options.insert(name.to_string(), value.clone());
                true
            }
        };
        if !applied {
            warn!(path = %path.join("."), key = %key, "ignoring malformed ui hint");
        }
    }
    if any {
        out.hints.insert(path.clone(), Arc::new(hint));
    }
}

fn set_text(slot: &mut Option<String>, value: &Value) -> bool {
    match value {
        Value::String(s) => { *slot = Some(s.clone()); true }
        _ => false,
    }
}

fn set_flag(slot: &mut bool, value: &Value) -> bool {
    match value {
        Value::Bool(b) => { *slot = *b; true }
        _ => false,
    }
}

fn set_list(slot: &mut Option<Vec<String>>, value: &Value) -> bool {
    let Value::Array(xs) = value else { return false };
    let names: Option<Vec<String>> = xs.iter().map(|x| x.as_str().map(str::to_string)).collect();
    match names {
        Some(names) => { *slot = Some(names); true }
        None => false,
    }
}

impl UiHint {
    /// Arrange property names: listed names first in list order, then the
    /// rest in declaration order (or at the `*` entry when present). Listed
    /// names the schema does not declare are dropped.
    pub fn arrange<'a>(&self, declared: &[&'a str]) -> Vec<&'a str> {
        let Some(order) = &self.order else { return declared.to_vec() };
        let mut head: Vec<&'a str> = Vec::new();
        let mut tail: Vec<&'a str> = Vec::new();
        let mut rest_at_head = false;
        for entry in order {
            if entry == REST {
                rest_at_head = true;
                continue;
            }
            match declared.iter().copied().find(|d| *d == entry.as_str()) {
                Some(name) if !head.contains(&name) && !tail.contains(&name) => {
                    if rest_at_head { tail.push(name) } else { head.push(name) }
                }
                Some(_) => {}
                None => warn!(name = %entry, "ui:order names a property the schema does not declare"),
            }
        }
        let rest: Vec<&'a str> = declared
            .iter()
            .copied()
            .filter(|d| !head.contains(d) && !tail.contains(d))
            .collect();
        head.extend(rest);
        head.extend(tail);
        head
    }
}
