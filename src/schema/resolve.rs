//! Schema text → resolved `Schema`.
//!
//! Two passes over the parsed document:
//! 1. collect every `$id` so references can be looked up across the whole tree;
//! 2. build `SchemaNode`s, replacing `$ref` with its target. A reference to a
//!    token that is still being built becomes a `BackRef` instead of expanding
//!    again, so recursive schemas terminate.
use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use regex::Regex;
use serde_json::{Map, Value};
use tracing::debug;

use super::*;
use crate::error::{Buffer, ParseError, ResolutionError, SchemaError};

/// Keywords interpreted by the builder; everything else lands in `Meta::extra`.
const KNOWN: &[&str] = &[
    "$id", "$ref", "title", "description", "default", "type", "enum", "enumNames", "const",
    "properties", "required", "items", "minimum", "maximum", "exclusiveMinimum",
    "exclusiveMaximum", "multipleOf", "minLength", "maxLength", "pattern", "format",
    "minItems", "maxItems", "uniqueItems", "additionalProperties", "allOf", "anyOf", "oneOf",
];

/// Resolve schema text with no externally provided definitions.
pub fn resolve(schema_text: &str) -> Result<Schema, SchemaError> {
    Resolver::new().resolve(schema_text)
}

/// Resolver configured with definitions that live outside the document,
/// typically the schemas of registered custom fields.
#[derive(Debug, Clone, Default)]
pub struct Resolver {
    externals: IndexMap<String, Value>,
}

impl Resolver {
    pub fn new() -> Self { Self::default() }

    pub fn with_external(mut self, token: impl Into<String>, schema: Value) -> Self {
        self.externals.insert(token.into(), schema);
        self
    }

    pub fn resolve(&self, schema_text: &str) -> Result<Schema, SchemaError> {
        let doc = serde_json::from_str::<Value>(schema_text)
            .map_err(|e| ParseError::from_json(Buffer::Schema, &e))?;
        Ok(self.resolve_value(&doc)?)
    }

    pub fn resolve_value(&self, doc: &Value) -> Result<Schema, ResolutionError> {
        let mut ids = HashMap::new();
        collect_ids(doc, &mut ids)?;
        let mut builder = Builder {
            doc,
            ids,
            externals: &self.externals,
            stack: Vec::new(),
            index: HashMap::new(),
        };
        let root = builder.build(doc, "#", &["#".to_string()])?;
        debug!(tokens = builder.index.len(), "schema resolved");
        Ok(Schema { root, index: builder.index })
    }
}

fn collect_ids<'d>(value: &'d Value, out: &mut HashMap<String, &'d Value>) -> Result<(), ResolutionError> {
    match value {
        Value::Object(map) => {
            if let Some(Value::String(id)) = map.get("$id") {
                if out.insert(id.clone(), value).is_some() {
                    return Err(ResolutionError::DuplicateId { token: id.clone() });
                }
            }
            for (k, v) in map {
                // Literal data never declares schema identities.
                if matches!(k.as_str(), "default" | "enum" | "const" | "examples") {
                    continue;
                }
                collect_ids(v, out)?;
            }
        }
        Value::Array(xs) => {
            for v in xs {
                collect_ids(v, out)?;
            }
        }
        _ => {}
    }
    Ok(())
}

struct Builder<'d> {
    doc: &'d Value,
    ids: HashMap<String, &'d Value>,
    externals: &'d IndexMap<String, Value>,
    /// Tokens whose nodes are currently being built.
    stack: Vec<String>,
    index: HashMap<String, Arc<SchemaNode>>,
}

impl<'d> Builder<'d> {
    /// Build `raw`, registering the result under `tokens` and its own `$id`.
    fn build(&mut self, raw: &'d Value, at: &str, tokens: &[String]) -> Result<Arc<SchemaNode>, ResolutionError> {
        let mut entered: Vec<String> = tokens.to_vec();
        if let Some(Value::String(id)) = raw.get("$id") {
            if !entered.contains(id) { entered.push(id.clone()); }
        }
        let depth = self.stack.len();
        self.stack.extend(entered.iter().cloned());
        let built = self.build_node(raw, at);
        self.stack.truncate(depth);
        let node = Arc::new(built?);
        for token in entered {
            self.index.entry(token).or_insert_with(|| node.clone());
        }
        Ok(node)
    }

    fn build_node(&mut self, raw: &'d Value, at: &str) -> Result<SchemaNode, ResolutionError> {
        let obj = match raw {
            Value::Bool(true) => return Ok(SchemaNode::any()),
            Value::Object(obj) => obj,
            other => {
                return Err(ResolutionError::Malformed {
                    at: at.to_string(),
                    reason: format!("expected a schema object, found {}", json_type(other)),
                })
            }
        };

        if let Some(reference) = obj.get("$ref") {
            let Value::String(token) = reference else {
                return Err(malformed(at, "`$ref` must be a string"));
            };
            return self.build_ref(token, obj, at);
        }

        let mut meta = parse_meta(obj, at)?;
        let (types, nullable) = parse_types(obj, at)?;
        meta.nullable = nullable;

        let mut compositions = Vec::new();
        let mut kind = if obj.contains_key("enum") || obj.contains_key("const") {
            parse_enum(obj, types.first().cloned(), at)?
        } else {
            match types.as_slice() {
                [] => self.infer_kind(obj, at)?,
                [single] => self.kind_for(single, obj, at)?,
                many => {
                    // Several non-null types: one branch per type.
                    let mut branches = Vec::with_capacity(many.len());
                    for t in many {
                        branches.push(Arc::new(SchemaNode::with_kind(self.kind_for(t, obj, at)?)));
                    }
                    compositions.push(Composition { combinator: Combinator::AnyOf, branches });
                    SchemaKind::Any
                }
            }
        };
        if let SchemaKind::String(rules) = &mut kind {
            rules.format = obj.get("format").and_then(Value::as_str).map(str::to_string);
        } else if let Some(format) = obj.get("format") {
            meta.extra.insert("format".into(), format.clone());
        }

        for (key, value) in obj {
            let combinator = match key.as_str() {
                "allOf" => Combinator::AllOf,
                "anyOf" => Combinator::AnyOf,
                "oneOf" => Combinator::OneOf,
                _ => continue,
            };
            let at = format!("{at}/{key}");
            let branches_raw = match value {
                Value::Array(xs) if !xs.is_empty() => xs,
                _ => return Err(ResolutionError::MalformedComposition { keyword: combinator.keyword(), at }),
            };
            let mut branches = Vec::with_capacity(branches_raw.len());
            for (i, b) in branches_raw.iter().enumerate() {
                branches.push(self.build(b, &format!("{at}/{i}"), &[])?);
            }
            compositions.push(Composition { combinator, branches });
        }

        Ok(SchemaNode { meta, kind, compositions })
    }

    fn build_ref(&mut self, token: &str, site: &Map<String, Value>, at: &str) -> Result<SchemaNode, ResolutionError> {
        let mut site_meta = parse_meta(site, at)?;
        site_meta.reference = Some(token.to_string());

        if self.stack.iter().any(|t| t == token) {
            debug!(token, at, "cyclic reference kept as back-reference");
            return Ok(SchemaNode {
                meta: site_meta,
                kind: SchemaKind::BackRef(token.to_string()),
                compositions: Vec::new(),
            });
        }

        let target = match self.index.get(token) {
            Some(done) => done.clone(),
            None => {
                let raw = self.lookup(token).ok_or_else(|| ResolutionError::UnresolvedRef {
                    token: token.to_string(),
                    at: at.to_string(),
                })?;
                debug!(token, at, "resolving reference");
                self.build(raw, token, &[token.to_string()])?
            }
        };

        let mut node = (*target).clone();
        node.meta.reference = Some(token.to_string());
        if site_meta.title.is_some() { node.meta.title = site_meta.title; }
        if site_meta.description.is_some() { node.meta.description = site_meta.description; }
        if site_meta.default.is_some() { node.meta.default = site_meta.default; }
        for (k, v) in site_meta.extra {
            node.meta.extra.entry(k).or_insert(v);
        }
        Ok(node)
    }

    fn lookup(&self, token: &str) -> Option<&'d Value> {
        if let Some(found) = self.ids.get(token).copied() {
            return Some(found);
        }
        if token == "#" {
            return Some(self.doc);
        }
        if let Some(pointer) = token.strip_prefix('#') {
            if let Some(found) = self.doc.pointer(pointer) {
                return Some(found);
            }
        }
        let externals: &'d IndexMap<String, Value> = self.externals;
        externals.get(token)
    }

    fn infer_kind(&mut self, obj: &'d Map<String, Value>, at: &str) -> Result<SchemaKind, ResolutionError> {
        if obj.contains_key("properties") || obj.contains_key("required") {
            self.kind_for("object", obj, at)
        } else if obj.contains_key("items") {
            self.kind_for("array", obj, at)
        } else {
            Ok(SchemaKind::Any)
        }
    }

    fn kind_for(&mut self, type_name: &str, obj: &'d Map<String, Value>, at: &str) -> Result<SchemaKind, ResolutionError> {
        Ok(match type_name {
            "null" => SchemaKind::Null,
            "boolean" => SchemaKind::Boolean,
            "integer" => SchemaKind::Integer(parse_numbers(obj, at)?),
            "number" => SchemaKind::Number(parse_numbers(obj, at)?),
            "string" => SchemaKind::String(parse_strings(obj, at)?),
            "array" => {
                let items = match obj.get("items") {
                    Some(raw @ (Value::Object(_) | Value::Bool(true))) => {
                        Some(self.build(raw, &format!("{at}/items"), &[])?)
                    }
                    _ => None,
                };
                SchemaKind::Array(ArrayRules {
                    items,
                    min_items: usize_keyword(obj, "minItems", at)?,
                    max_items: usize_keyword(obj, "maxItems", at)?,
                    unique_items: obj.get("uniqueItems").and_then(Value::as_bool).unwrap_or(false),
                })
            }
            "object" => {
                let mut rules = ObjectRules::default();
                if let Some(props) = obj.get("properties") {
                    let Value::Object(props) = props else {
                        return Err(malformed(at, "`properties` must be an object"));
                    };
                    for (name, raw) in props {
                        let node = self.build(raw, &format!("{at}/properties/{name}"), &[])?;
                        rules.properties.insert(name.clone(), node);
                    }
                }
                if let Some(required) = obj.get("required") {
                    let names = required.as_array().ok_or_else(|| malformed(at, "`required` must be an array"))?;
                    for name in names {
                        let name = name.as_str().ok_or_else(|| malformed(at, "`required` entries must be strings"))?;
                        rules.required.push(name.to_string());
                    }
                }
                if let Some(Value::Bool(allowed)) = obj.get("additionalProperties") {
                    rules.additional_properties = *allowed;
                }
                SchemaKind::Object(rules)
            }
            other => return Err(malformed(at, &format!("unknown type `{other}`"))),
        })
    }
}

fn parse_meta(obj: &Map<String, Value>, at: &str) -> Result<Meta, ResolutionError> {
    let text = |key: &str| -> Result<Option<String>, ResolutionError> {
        match obj.get(key) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(_) => Err(malformed(at, &format!("`{key}` must be a string"))),
        }
    };
    let mut extra = IndexMap::new();
    for (k, v) in obj {
        if !KNOWN.contains(&k.as_str()) {
            extra.insert(k.clone(), v.clone());
        }
    }
    if let Some(additional @ Value::Object(_)) = obj.get("additionalProperties") {
        extra.insert("additionalProperties".into(), additional.clone());
    }
    if let Some(items @ Value::Array(_)) = obj.get("items") {
        extra.insert("items".into(), items.clone());
    }
    Ok(Meta {
        id: text("$id")?,
        reference: None,
        title: text("title")?,
        description: text("description")?,
        default: obj.get("default").cloned(),
        nullable: false,
        extra,
    })
}

/// Declared types with `"null"` split off when it accompanies another type.
fn parse_types(obj: &Map<String, Value>, at: &str) -> Result<(Vec<String>, bool), ResolutionError> {
    match obj.get("type") {
        None => Ok((Vec::new(), false)),
        Some(Value::String(t)) => Ok((vec![t.clone()], false)),
        Some(Value::Array(ts)) => {
            let mut names = Vec::with_capacity(ts.len());
            for t in ts {
                let t = t.as_str().ok_or_else(|| malformed(at, "`type` entries must be strings"))?;
                if !names.iter().any(|n| n == t) { names.push(t.to_string()); }
            }
            let nullable = names.len() > 1 && names.iter().any(|n| n == "null");
            if nullable { names.retain(|n| n != "null"); }
            Ok((names, nullable))
        }
        Some(_) => Err(malformed(at, "`type` must be a string or an array of strings")),
    }
}

fn parse_enum(obj: &Map<String, Value>, declared: Option<String>, at: &str) -> Result<SchemaKind, ResolutionError> {
    let values: Vec<Data> = match (obj.get("enum"), obj.get("const")) {
        (Some(Value::Array(xs)), _) => xs.iter().map(Data::from).collect(),
        (Some(_), _) => return Err(malformed(at, "`enum` must be an array")),
        (None, Some(c)) => vec![Data::from(c)],
        (None, None) => Vec::new(),
    };
    let labels = match obj.get("enumNames") {
        None => None,
        Some(Value::Array(xs)) => Some(
            xs.iter()
                .map(|x| x.as_str().map(str::to_string).ok_or_else(|| malformed(at, "`enumNames` entries must be strings")))
                .collect::<Result<Vec<_>, _>>()?,
        ),
        Some(_) => return Err(malformed(at, "`enumNames` must be an array")),
    };
    Ok(SchemaKind::Enum(EnumRules { values, labels, declared }))
}

fn parse_numbers(obj: &Map<String, Value>, at: &str) -> Result<NumberRules, ResolutionError> {
    let num = |key: &str| -> Result<Option<f64>, ResolutionError> {
        match obj.get(key) {
            None => Ok(None),
            Some(v) => v.as_f64().map(Some).ok_or_else(|| malformed(at, &format!("`{key}` must be a number"))),
        }
    };
    let multiple_of = num("multipleOf")?;
    if multiple_of.is_some_and(|m| m <= 0.0) {
        return Err(malformed(at, "`multipleOf` must be greater than zero"));
    }
    Ok(NumberRules {
        minimum: num("minimum")?,
        maximum: num("maximum")?,
        exclusive_minimum: num("exclusiveMinimum")?,
        exclusive_maximum: num("exclusiveMaximum")?,
        multiple_of,
    })
}

fn parse_strings(obj: &Map<String, Value>, at: &str) -> Result<StringRules, ResolutionError> {
    let pattern = match obj.get("pattern") {
        None => None,
        Some(Value::String(source)) => {
            let regex = Regex::new(source).map_err(|e| ResolutionError::InvalidPattern {
                pattern: source.clone(),
                at: at.to_string(),
                reason: e.to_string(),
            })?;
            Some(Pattern { source: source.clone(), regex })
        }
        Some(_) => return Err(malformed(at, "`pattern` must be a string")),
    };
    Ok(StringRules {
        min_length: usize_keyword(obj, "minLength", at)?,
        max_length: usize_keyword(obj, "maxLength", at)?,
        pattern,
        format: None,
    })
}

fn usize_keyword(obj: &Map<String, Value>, key: &str, at: &str) -> Result<Option<usize>, ResolutionError> {
    match obj.get(key) {
        None => Ok(None),
        Some(v) => v
            .as_u64()
            .map(|n| Some(n as usize))
            .ok_or_else(|| malformed(at, &format!("`{key}` must be a non-negative integer"))),
    }
}

fn malformed(at: &str, reason: &str) -> ResolutionError {
    ResolutionError::Malformed { at: at.to_string(), reason: reason.to_string() }
}

fn json_type(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_error_carries_position() {
        let err = resolve("{\"type\": ").unwrap_err();
        match err {
            SchemaError::Parse(p) => {
                assert_eq!(p.buffer, Buffer::Schema);
                assert_eq!(p.line, 1);
            }
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn properties_keep_declaration_order() {
        let schema = resolve(r#"{"type":"object","properties":{"z":{"type":"string"},"a":{"type":"integer"},"m":{"type":"boolean"}}}"#).unwrap();
        let names: Vec<_> = schema.root.object().unwrap().properties.keys().cloned().collect();
        assert_eq!(names, ["z", "a", "m"]);
    }

    #[test]
    fn unknown_keywords_pass_through() {
        let schema = resolve(r#"{"type":"string","x-widget-color":"red","examples":["a"]}"#).unwrap();
        assert_eq!(schema.root.meta.extra.get("x-widget-color"), Some(&json!("red")));
        assert_eq!(schema.root.meta.extra.get("examples"), Some(&json!(["a"])));
    }

    #[test]
    fn refs_resolve_by_id_and_pointer() {
        let schema = resolve(r##"{
            "type": "object",
            "definitions": {
                "addr": {"$id": "Address", "type": "object", "properties": {"city": {"type": "string"}}}
            },
            "properties": {
                "home": {"$ref": "Address", "title": "Home"},
                "work": {"$ref": "#/definitions/addr"}
            }
        }"##).unwrap();
        let home = schema.root.property("home").unwrap();
        assert_eq!(home.meta.title.as_deref(), Some("Home"));
        assert_eq!(home.meta.reference.as_deref(), Some("Address"));
        assert!(home.property("city").is_some());
        let work = schema.root.property("work").unwrap();
        assert!(work.property("city").is_some());
    }

    #[test]
    fn self_reference_becomes_back_reference() {
        let schema = resolve(r#"{
            "$id": "Node",
            "type": "object",
            "properties": {
                "label": {"type": "string"},
                "children": {"type": "array", "items": {"$ref": "Node"}}
            }
        }"#).unwrap();
        let children = schema.root.property("children").unwrap();
        let SchemaKind::Array(arr) = &children.kind else { panic!("array expected") };
        let item = arr.items.as_ref().unwrap();
        assert_eq!(item.kind, SchemaKind::BackRef("Node".into()));
        let followed = schema.follow(item);
        assert!(followed.property("label").is_some());
    }

    #[test]
    fn root_pointer_cycle_terminates() {
        let schema = resolve(r##"{"type":"object","properties":{"next":{"$ref":"#"}}}"##).unwrap();
        let next = schema.root.property("next").unwrap();
        assert_eq!(next.kind, SchemaKind::BackRef("#".into()));
    }

    #[test]
    fn unresolved_and_duplicate_tokens_fail() {
        let err = resolve(r#"{"properties":{"a":{"$ref":"Nope"}}}"#).unwrap_err();
        assert!(matches!(err, SchemaError::Resolution(ResolutionError::UnresolvedRef { .. })));

        let err = resolve(r#"{"properties":{"a":{"$id":"X"},"b":{"$id":"X"}}}"#).unwrap_err();
        assert!(matches!(err, SchemaError::Resolution(ResolutionError::DuplicateId { .. })));
    }

    #[test]
    fn external_definitions_fill_missing_tokens() {
        let resolver = Resolver::new().with_external(
            "/schemas/custom-specification",
            json!({"type": "object", "properties": {"type": {"type": "string"}}}),
        );
        let schema = resolver
            .resolve(r#"{"type":"object","properties":{"specification":{"title":"Specification","$ref":"/schemas/custom-specification"}}}"#)
            .unwrap();
        let spec = schema.root.property("specification").unwrap();
        assert_eq!(spec.meta.title.as_deref(), Some("Specification"));
        assert!(spec.tokens().any(|t| t == "/schemas/custom-specification"));
    }

    #[test]
    fn compositions_are_preserved_in_order() {
        let schema = resolve(r#"{"oneOf":[{"type":"string"},{"type":"integer"}],"allOf":[{"minimum":1}]}"#).unwrap();
        let kinds: Vec<_> = schema.root.compositions.iter().map(|c| c.combinator).collect();
        assert_eq!(kinds, [Combinator::OneOf, Combinator::AllOf]);
        assert_eq!(schema.root.kind, SchemaKind::Any);
    }

    #[test]
    fn malformed_compositions_and_patterns_fail() {
        assert!(matches!(
            resolve(r#"{"anyOf": []}"#),
            Err(SchemaError::Resolution(ResolutionError::MalformedComposition { keyword: "anyOf", .. }))
        ));
        assert!(matches!(
            resolve(r#"{"type":"string","pattern":"("}"#),
            Err(SchemaError::Resolution(ResolutionError::InvalidPattern { .. }))
        ));
    }

    #[test]
    fn nullable_type_arrays() {
        let schema = resolve(r#"{"type":["string","null"],"maxLength":3}"#).unwrap();
        assert!(schema.root.meta.nullable);
        assert!(matches!(&schema.root.kind, SchemaKind::String(r) if r.max_length == Some(3)));

        let schema = resolve(r#"{"type":["string","integer"]}"#).unwrap();
        assert_eq!(schema.root.compositions[0].branches.len(), 2);
    }

    #[test]
    fn enum_with_labels() {
        let schema = resolve(r#"{"type":"string","enum":["user","admin"],"enumNames":["User","Administrator"]}"#).unwrap();
        let SchemaKind::Enum(e) = &schema.root.kind else { panic!("enum expected") };
        assert_eq!(e.values, vec![Data::from("user"), Data::from("admin")]);
        assert_eq!(e.labels.as_deref(), Some(&["User".to_string(), "Administrator".to_string()][..]));
        assert_eq!(e.declared.as_deref(), Some("string"));
    }
}
