//! Persistent JSON value.
//!
//! Containers sit behind `Arc` so that an edit can rebuild only the spine from
//! the root to the edited node while every untouched subtree is shared with the
//! previous snapshot. Object keys keep insertion order.
use std::sync::Arc;

use indexmap::IndexMap;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde::ser::{SerializeMap, SerializeSeq};
use serde_json::{Number, Value};

use crate::error::{Buffer, ParseError};
use crate::path::{Path, Segment};

pub type Map = IndexMap<String, Data>;

#[derive(Clone, Debug, Default)]
pub enum Data {
    #[default]
    Null,
    Bool(bool),
    Number(Number),
    String(Arc<str>),
    Array(Arc<Vec<Data>>),
    Object(Arc<Map>),
}

impl Data {
    /// Parse host text. Blank text is `null`, matching an empty data buffer.
    pub fn parse(text: &str) -> Result<Data, ParseError> {
        if text.trim().is_empty() {
            return Ok(Data::Null);
        }
        serde_json::from_str::<Value>(text)
            .map(Data::from)
            .map_err(|e| ParseError::from_json(Buffer::Data, &e))
    }

    pub fn object(map: Map) -> Data { Data::Object(Arc::new(map)) }

    pub fn array(items: Vec<Data>) -> Data { Data::Array(Arc::new(items)) }

    pub fn string(s: impl AsRef<str>) -> Data { Data::String(Arc::from(s.as_ref())) }

    pub fn to_value(&self) -> Value {
        match self {
            Data::Null => Value::Null,
            Data::Bool(b) => Value::Bool(*b),
            Data::Number(n) => Value::Number(n.clone()),
            Data::String(s) => Value::String(s.to_string()),
            Data::Array(xs) => Value::Array(xs.iter().map(Data::to_value).collect()),
            Data::Object(m) => Value::Object(
                m.iter().map(|(k, v)| (k.clone(), v.to_value())).collect()
            ),
        }
    }

    /// JSON type name, with `integer` for whole numbers.
    pub fn type_name(&self) -> &'static str {
        match self {
            Data::Null => "null",
            Data::Bool(_) => "boolean",
            Data::Number(_) if self.is_integer() => "integer",
            Data::Number(_) => "number",
            Data::String(_) => "string",
            Data::Array(_) => "array",
            Data::Object(_) => "object",
        }
    }

    pub fn is_null(&self) -> bool { matches!(self, Data::Null) }

    /// Null or the empty string: what a cleared input produces.
    pub fn is_blank(&self) -> bool {
        match self {
            Data::Null => true,
            Data::String(s) => s.is_empty(),
            _ => false,
        }
    }

    pub fn is_integer(&self) -> bool {
        match self {
            Data::Number(n) => {
                n.is_i64() || n.is_u64() || n.as_f64().is_some_and(|f| f.is_finite() && f.fract() == 0.0)
            }
            _ => false,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Data::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Data::String(s) => Some(s.as_ref()),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Map> {
        match self {
            Data::Object(m) => Some(m.as_ref()),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Data]> {
        match self {
            Data::Array(xs) => Some(xs.as_slice()),
            _ => None,
        }
    }

    pub fn get(&self, path: &Path) -> Option<&Data> {
        path.segments().iter().try_fold(self, |node, seg| match (node, seg) {
            (Data::Object(m), Segment::Key(k)) => m.get(k),
            (Data::Array(xs), Segment::Index(i)) => xs.get(*i),
            _ => None,
        })
    }

    /// Identity for containers, value equality for scalars.
    ///
    /// Two snapshots that are `same` at some path share that subtree.
    pub fn same(&self, other: &Data) -> bool {
        match (self, other) {
            (Data::Array(a), Data::Array(b)) => Arc::ptr_eq(a, b),
            (Data::Object(a), Data::Object(b)) => Arc::ptr_eq(a, b),
            (Data::String(a), Data::String(b)) => Arc::ptr_eq(a, b) || a == b,
            _ => self == other,
        }
    }

    pub fn to_pretty_string(&self) -> String {
        // Serializing a tree of JSON values cannot fail.
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

fn number_key(n: &Number) -> OrderedFloat<f64> {
    OrderedFloat(n.as_f64().unwrap_or(f64::NAN))
}

/// Deep equality; `1` and `1.0` are equal, as in JSON Schema.
impl PartialEq for Data {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Data::Null, Data::Null) => true,
            (Data::Bool(a), Data::Bool(b)) => a == b,
            (Data::Number(a), Data::Number(b)) => {
                match (a.as_i64(), b.as_i64()) {
                    (Some(x), Some(y)) => x == y,
                    _ => number_key(a) == number_key(b),
                }
            }
            (Data::String(a), Data::String(b)) => a == b,
            (Data::Array(a), Data::Array(b)) => Arc::ptr_eq(a, b) || a == b,
            (Data::Object(a), Data::Object(b)) => {
                Arc::ptr_eq(a, b)
                    || (a.len() == b.len() && a.iter().all(|(k, v)| b.get(k) == Some(v)))
            }
            _ => false,
        }
    }
}

impl From<&Value> for Data {
    fn from(v: &Value) -> Self {
        match v {
            Value::Null => Data::Null,
            Value::Bool(b) => Data::Bool(*b),
            Value::Number(n) => Data::Number(n.clone()),
            Value::String(s) => Data::string(s),
            Value::Array(xs) => Data::array(xs.iter().map(Data::from).collect()),
            Value::Object(m) => Data::object(
                m.iter().map(|(k, v)| (k.clone(), Data::from(v))).collect()
            ),
        }
    }
}

impl From<Value> for Data {
    fn from(v: Value) -> Self { Data::from(&v) }
}

impl From<&str> for Data {
    fn from(s: &str) -> Self { Data::string(s) }
}

impl From<bool> for Data {
    fn from(b: bool) -> Self { Data::Bool(b) }
}

impl From<i64> for Data {
    fn from(n: i64) -> Self { Data::Number(n.into()) }
}

impl Serialize for Data {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Data::Null => serializer.serialize_unit(),
            Data::Bool(b) => serializer.serialize_bool(*b),
            Data::Number(n) => n.serialize(serializer),
            Data::String(s) => serializer.serialize_str(s),
            Data::Array(xs) => {
                let mut seq = serializer.serialize_seq(Some(xs.len()))?;
                for x in xs.iter() { seq.serialize_element(x)?; }
                seq.end()
            }
            Data::Object(m) => {
                let mut map = serializer.serialize_map(Some(m.len()))?;
                for (k, v) in m.iter() { map.serialize_entry(k, v)?; }
                map.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for Data {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(Data::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_blank_is_null() {
        assert_eq!(Data::parse("  \n").unwrap(), Data::Null);
    }

    #[test]
    fn parse_error_reports_position() {
        let err = Data::parse("{\n  \"a\": }").unwrap_err();
        assert_eq!(err.buffer, Buffer::Data);
        assert_eq!(err.line, 2);
        assert!(err.column > 0);
    }

    #[test]
    fn numbers_compare_by_value() {
        assert_eq!(Data::from(json!(1)), Data::from(json!(1.0)));
        assert_ne!(Data::from(json!(1)), Data::from(json!(1.5)));
        assert!(Data::from(json!(2.0)).is_integer());
    }

    #[test]
    fn value_round_trip_keeps_key_order() {
        let v = json!({"z": 1, "a": [true, null, "x"], "m": {"k": 2.5}});
        let d = Data::from(&v);
        assert_eq!(d.to_value(), v);
        assert_eq!(serde_json::to_string(&d).unwrap(), serde_json::to_string(&v).unwrap());
    }

    #[test]
    fn get_follows_path() {
        let d = Data::from(json!({"tags": ["a", "b"], "spec": {"type": "small"}}));
        assert_eq!(d.get(&"tags.1".parse().unwrap()), Some(&Data::string("b")));
        assert_eq!(d.get(&"spec.type".parse().unwrap()), Some(&Data::string("small")));
        assert_eq!(d.get(&"spec.0".parse().unwrap()), None);
    }
}
