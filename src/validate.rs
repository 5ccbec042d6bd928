//! Data ⟷ schema validation.
//!
//! Errors come out in schema-declaration order: a node's own type, then its
//! kind-specific rules (object properties in declared order), then its
//! composition keywords in the order they were written. Nothing here depends
//! on hash iteration order, so repeated runs produce identical lists.
use std::sync::Arc;

use chrono::{DateTime, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::data::Data;
use crate::path::Path;
use crate::schema::{
    ArrayRules, Combinator, NumberRules, ObjectRules, Schema, SchemaKind, SchemaNode, StringRules,
};

static EMAIL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9.!#$%&'*+/=?^_`{|}~-]+@[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?(?:\.[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?)*$")
        .expect("email regex")
});

static URI: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z][A-Za-z0-9+.\-]*:[^\s]*$").expect("uri regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Keyword {
    Type,
    Required,
    Enum,
    Minimum,
    Maximum,
    ExclusiveMinimum,
    ExclusiveMaximum,
    MultipleOf,
    MinLength,
    MaxLength,
    Pattern,
    Format,
    MinItems,
    MaxItems,
    UniqueItems,
    AdditionalProperties,
    AnyOf,
    OneOf,
}

impl std::fmt::Display for Keyword {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        f.write_str(&text)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationError {
    pub path: Path,
    pub keyword: Keyword,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.path.is_root() {
            write!(f, "(root): {} [{}]", self.message, self.keyword)
        } else {
            write!(f, "{}: {} [{}]", self.path, self.message, self.keyword)
        }
    }
}

/// Validate a whole data value against the resolved schema.
pub fn validate(schema: &Schema, data: &Data) -> Vec<ValidationError> {
    validate_at(schema, &schema.root, data, &Path::root())
}

/// Validate `data` found at `path` against `node`.
pub fn validate_at(schema: &Schema, node: &Arc<SchemaNode>, data: &Data, path: &Path) -> Vec<ValidationError> {
    let mut v = Validator { schema, active: Vec::new(), errors: Vec::new() };
    v.check(node, data, path);
    v.errors
}

pub fn is_valid(schema: &Schema, node: &Arc<SchemaNode>, data: &Data) -> bool {
    validate_at(schema, node, data, &Path::root()).is_empty()
}

struct Validator<'s> {
    schema: &'s Schema,
    /// Back-references being followed, with the data path they were entered at.
    active: Vec<(String, Path)>,
    errors: Vec<ValidationError>,
}

impl Validator<'_> {
    fn report(&mut self, path: &Path, keyword: Keyword, message: String) {
        self.errors.push(ValidationError { path: path.clone(), keyword, message });
    }

    fn check(&mut self, node: &Arc<SchemaNode>, data: &Data, path: &Path) {
        if let SchemaKind::BackRef(token) = &node.kind {
            let entry = (token.clone(), path.clone());
            if self.active.contains(&entry) {
                return;
            }
            self.active.push(entry);
            let target = self.schema.follow(node);
            if !matches!(target.kind, SchemaKind::BackRef(_)) {
                self.check(&target, data, path);
            }
            self.active.pop();
            return;
        }

        if data.is_null() && node.meta.nullable {
            return;
        }

        let type_ok = match &node.kind {
            SchemaKind::Any | SchemaKind::BackRef(_) => true,
            SchemaKind::Null => self.expect(data.is_null(), path, "null"),
            SchemaKind::Boolean => self.expect(matches!(data, Data::Bool(_)), path, "boolean"),
            SchemaKind::Integer(rules) => {
                let ok = self.expect(data.is_integer(), path, "integer");
                if ok { self.numbers(rules, data, path); }
                ok
            }
            SchemaKind::Number(rules) => {
                let ok = self.expect(matches!(data, Data::Number(_)), path, "number");
                if ok { self.numbers(rules, data, path); }
                ok
            }
            SchemaKind::String(rules) => match data.as_str() {
                Some(s) => { self.strings(rules, s, path); true }
                None => self.expect(false, path, "string"),
            },
            SchemaKind::Array(rules) => match data.as_array() {
                Some(xs) => { self.array(rules, xs, path); true }
                None => self.expect(false, path, "array"),
            },
            SchemaKind::Object(rules) => match data {
                Data::Object(map) => { self.object(rules, map, path); true }
                _ => self.expect(false, path, "object"),
            },
            SchemaKind::Enum(e) => {
                if !e.values.iter().any(|v| v == data) {
                    let message = if e.values.len() == 1 {
                        "must be equal to constant".to_string()
                    } else {
                        "must be equal to one of the allowed values".to_string()
                    };
                    self.report(path, Keyword::Enum, message);
                }
                true
            }
        };
        if !type_ok {
            return;
        }

        for composition in &node.compositions {
            match composition.combinator {
                Combinator::AllOf => {
                    for branch in &composition.branches {
                        self.check(branch, data, path);
                    }
                }
                Combinator::AnyOf => {
                    if !composition.branches.iter().any(|b| self.branch_ok(b, data, path)) {
                        self.report(path, Keyword::AnyOf, "must match a schema in anyOf".into());
                    }
                }
                Combinator::OneOf => {
                    let passing = composition.branches.iter().filter(|b| self.branch_ok(b, data, path)).count();
                    if passing != 1 {
                        self.report(
                            path,
                            Keyword::OneOf,
                            format!("must match exactly one schema in oneOf (matched {passing})"),
                        );
                    }
                }
            }
        }
    }

    fn branch_ok(&self, branch: &Arc<SchemaNode>, data: &Data, path: &Path) -> bool {
        let mut sub = Validator { schema: self.schema, active: self.active.clone(), errors: Vec::new() };
        sub.check(branch, data, path);
        sub.errors.is_empty()
    }

    fn expect(&mut self, ok: bool, path: &Path, type_name: &str) -> bool {
        if !ok {
            self.report(path, Keyword::Type, format!("must be {type_name}"));
        }
        ok
    }

    fn numbers(&mut self, rules: &NumberRules, data: &Data, path: &Path) {
        let Some(n) = data.as_f64() else { return };
        if let Some(min) = rules.minimum {
            if n < min { self.report(path, Keyword::Minimum, format!("must be >= {}", fmt_num(min))); }
        }
        if let Some(max) = rules.maximum {
            if n > max { self.report(path, Keyword::Maximum, format!("must be <= {}", fmt_num(max))); }
        }
        if let Some(min) = rules.exclusive_minimum {
            if n <= min { self.report(path, Keyword::ExclusiveMinimum, format!("must be > {}", fmt_num(min))); }
        }
        if let Some(max) = rules.exclusive_maximum {
            if n >= max { self.report(path, Keyword::ExclusiveMaximum, format!("must be < {}", fmt_num(max))); }
        }
        if let Some(m) = rules.multiple_of {
            if !is_multiple(data, n, m) {
                self.report(path, Keyword::MultipleOf, format!("must be multiple of {}", fmt_num(m)));
            }
        }
    }

    fn strings(&mut self, rules: &StringRules, s: &str, path: &Path) {
        let len = s.chars().count();
        if let Some(min) = rules.min_length {
            if len < min { self.report(path, Keyword::MinLength, format!("must NOT have fewer than {min} characters")); }
        }
        if let Some(max) = rules.max_length {
            if len > max { self.report(path, Keyword::MaxLength, format!("must NOT have more than {max} characters")); }
        }
        if let Some(pattern) = &rules.pattern {
            if !pattern.regex.is_match(s) {
                self.report(path, Keyword::Pattern, format!("must match pattern \"{}\"", pattern.source));
            }
        }
        if let Some(format) = &rules.format {
            if !format_ok(format, s) {
                self.report(path, Keyword::Format, format!("must match format \"{format}\""));
            }
        }
    }

    fn array(&mut self, rules: &ArrayRules, xs: &[Data], path: &Path) {
        if let Some(min) = rules.min_items {
            if xs.len() < min { self.report(path, Keyword::MinItems, format!("must NOT have fewer than {min} items")); }
        }
        if let Some(max) = rules.max_items {
            if xs.len() > max { self.report(path, Keyword::MaxItems, format!("must NOT have more than {max} items")); }
        }
        if rules.unique_items {
            let dup = xs.iter().enumerate().find_map(|(j, x)| {
                xs[..j].iter().position(|y| y == x).map(|i| (i, j))
            });
            if let Some((i, j)) = dup {
                self.report(path, Keyword::UniqueItems, format!("must NOT have duplicate items (items ## {j} and {i} are identical)"));
            }
        }
        if let Some(items) = &rules.items {
            for (i, x) in xs.iter().enumerate() {
                self.check(items, x, &path.index(i));
            }
        }
    }

    fn object(&mut self, rules: &ObjectRules, map: &crate::data::Map, path: &Path) {
        for (name, prop) in &rules.properties {
            match map.get(name) {
                Some(value) => self.check(prop, value, &path.key(name)),
                None if rules.required.contains(name) => {
                    self.report(&path.key(name), Keyword::Required, format!("must have required property '{name}'"));
                }
                None => {}
            }
        }
        for name in &rules.required {
            if !rules.properties.contains_key(name) && !map.contains_key(name) {
                self.report(&path.key(name), Keyword::Required, format!("must have required property '{name}'"));
            }
        }
        if !rules.additional_properties {
            for key in map.keys() {
                if !rules.properties.contains_key(key) {
                    self.report(&path.key(key), Keyword::AdditionalProperties, "must NOT have additional properties".into());
                }
            }
        }
    }
}

fn format_ok(format: &str, s: &str) -> bool {
    match format {
        "email" => EMAIL.is_match(s),
        "uri" => URI.is_match(s),
        "date" => NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok(),
        "date-time" => DateTime::parse_from_rfc3339(s).is_ok(),
        _ => true,
    }
}

fn fmt_num(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

/// Integers against a whole divisor are checked exactly; anything else by the
/// float remainder, within a tolerance scaled to the divisor.
fn is_multiple(data: &Data, n: f64, m: f64) -> bool {
    if let Data::Number(num) = data {
        let whole = num.as_i64().map(i128::from).or_else(|| num.as_u64().map(i128::from));
        if let Some(i) = whole {
            if m.fract() == 0.0 && m < 1.0e18 {
                return i % (m as i128) == 0;
            }
        }
    }
    let r = (n % m).abs();
    r.min(m - r) <= m * 1e-9
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::resolve;
    use serde_json::json;

    fn run(schema: &str, data: serde_json::Value) -> Vec<ValidationError> {
        let schema = resolve(schema).unwrap();
        validate(&schema, &Data::from(data))
    }

    fn keys(errors: &[ValidationError]) -> Vec<(String, Keyword)> {
        errors.iter().map(|e| (e.path.to_string(), e.keyword)).collect()
    }

    const PROFILE: &str = r#"{
        "type": "object",
        "properties": {
            "firstName": {"type": "string", "minLength": 2},
            "lastName": {"type": "string", "minLength": 2},
            "email": {"type": "string", "format": "email"},
            "age": {"type": "integer", "minimum": 18, "maximum": 120},
            "isActive": {"type": "boolean", "default": true},
            "role": {"type": "string", "enum": ["user", "admin", "moderator"]}
        },
        "required": ["firstName", "lastName", "email"]
    }"#;

    #[test]
    fn valid_profile_has_no_errors() {
        let errors = run(PROFILE, json!({
            "firstName": "John", "lastName": "Doe", "email": "john.doe@example.com",
            "age": 30, "isActive": true, "role": "user"
        }));
        assert!(errors.is_empty(), "{errors:?}");
    }

    #[test]
    fn errors_follow_declaration_order_not_data_order() {
        let errors = run(PROFILE, json!({
            "role": "root", "age": 7, "email": "nope", "firstName": "J"
        }));
        assert_eq!(keys(&errors), vec![
            ("firstName".into(), Keyword::MinLength),
            ("lastName".into(), Keyword::Required),
            ("email".into(), Keyword::Format),
            ("age".into(), Keyword::Minimum),
            ("role".into(), Keyword::Enum),
        ]);
    }

    #[test]
    fn type_mismatch_stops_at_the_node() {
        let errors = run(r#"{"type":"string","minLength":5}"#, json!(3));
        assert_eq!(keys(&errors), vec![(String::new(), Keyword::Type)]);
        assert_eq!(errors[0].message, "must be string");
    }

    #[test]
    fn integers_accept_whole_floats() {
        assert!(run(r#"{"type":"integer"}"#, json!(4.0)).is_empty());
        assert_eq!(run(r#"{"type":"integer"}"#, json!(4.5))[0].keyword, Keyword::Type);
    }

    #[test]
    fn numeric_bounds_and_multiples() {
        let schema = r#"{"type":"number","exclusiveMinimum":0,"maximum":10,"multipleOf":0.5}"#;
        assert!(run(schema, json!(2.5)).is_empty());
        assert_eq!(keys(&run(schema, json!(0))), vec![(String::new(), Keyword::ExclusiveMinimum)]);
        assert_eq!(keys(&run(schema, json!(10.25))), vec![
            (String::new(), Keyword::Maximum),
            (String::new(), Keyword::MultipleOf),
        ]);
    }

    #[test]
    fn multiples_hold_for_large_integers_and_decimal_divisors() {
        let thirds = r#"{"type":"integer","multipleOf":3}"#;
        assert_eq!(keys(&run(thirds, json!(100_000_000_000_000_001i64))), vec![(String::new(), Keyword::MultipleOf)]);
        assert!(run(thirds, json!(99_999_999_999_999_999i64)).is_empty());
        assert!(run(thirds, json!(u64::MAX - 15)).is_empty());

        let tenths = r#"{"type":"number","multipleOf":0.1}"#;
        assert!(run(tenths, json!(0.3)).is_empty());
        assert!(run(tenths, json!(12345.6)).is_empty());
        assert_eq!(keys(&run(tenths, json!(0.35))), vec![(String::new(), Keyword::MultipleOf)]);
    }

    #[test]
    fn array_rules_and_item_paths() {
        let schema = r#"{"type":"array","minItems":1,"maxItems":3,"uniqueItems":true,"items":{"type":"string","pattern":"^[a-z]+$"}}"#;
        assert_eq!(keys(&run(schema, json!([]))), vec![(String::new(), Keyword::MinItems)]);
        assert_eq!(keys(&run(schema, json!(["a", "B1", "a"]))), vec![
            (String::new(), Keyword::UniqueItems),
            ("1".into(), Keyword::Pattern),
        ]);
    }

    #[test]
    fn one_of_counts_matches() {
        let schema = r#"{"oneOf":[{"type":"integer"},{"type":"number"}]}"#;
        // 3 satisfies both branches.
        let errors = run(schema, json!(3));
        assert_eq!(keys(&errors), vec![(String::new(), Keyword::OneOf)]);
        assert!(errors[0].message.contains("matched 2"));
        assert!(run(schema, json!(3.5)).is_empty());
        assert_eq!(run(schema, json!("x"))[0].keyword, Keyword::OneOf);
    }

    #[test]
    fn any_of_and_all_of() {
        let any = r#"{"anyOf":[{"type":"string"},{"type":"boolean"}]}"#;
        assert!(run(any, json!(true)).is_empty());
        assert_eq!(run(any, json!(1))[0].keyword, Keyword::AnyOf);

        let all = r#"{"allOf":[{"type":"integer","minimum":2},{"type":"integer","maximum":4}]}"#;
        assert!(run(all, json!(3)).is_empty());
        assert_eq!(keys(&run(all, json!(9))), vec![(String::new(), Keyword::Maximum)]);
    }

    #[test]
    fn additional_properties_false() {
        let schema = r#"{"type":"object","properties":{"a":{}},"additionalProperties":false}"#;
        assert_eq!(keys(&run(schema, json!({"a": 1, "b": 2}))), vec![("b".into(), Keyword::AdditionalProperties)]);
    }

    #[test]
    fn nullable_and_formats() {
        assert!(run(r#"{"type":["string","null"],"format":"date"}"#, json!(null)).is_empty());
        assert!(run(r#"{"type":"string","format":"date"}"#, json!("2024-02-29")).is_empty());
        assert_eq!(run(r#"{"type":"string","format":"date"}"#, json!("2023-02-29"))[0].keyword, Keyword::Format);
        assert!(run(r#"{"type":"string","format":"date-time"}"#, json!("2024-01-01T10:00:00Z")).is_empty());
        assert!(run(r#"{"type":"string","format":"uri"}"#, json!("https://example.com/a")).is_empty());
    }

    #[test]
    fn recursive_schema_validates_nested_data() {
        let schema = r#"{
            "$id": "Node",
            "type": "object",
            "required": ["label"],
            "properties": {
                "label": {"type": "string"},
                "children": {"type": "array", "items": {"$ref": "Node"}}
            }
        }"#;
        let errors = run(schema, json!({"label": "a", "children": [{"label": "b", "children": [{}]}]}));
        assert_eq!(keys(&errors), vec![("children.0.children.0.label".into(), Keyword::Required)]);
    }

    #[test]
    fn repeated_runs_are_identical() {
        let data = json!({"age": "x", "role": 3});
        assert_eq!(run(PROFILE, data.clone()), run(PROFILE, data));
    }
}
