//! Edits against the data snapshot.
//!
//! Every operation takes the current snapshot by reference and returns a new
//! one. Only the spine from the root to the edited node is rebuilt; every
//! other subtree is the same `Arc` as before.
use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::data::{Data, Map};
use crate::error::EditError;
use crate::path::{Path, Segment};
use crate::schema::{Schema, SchemaKind, SchemaNode};
use crate::validate::is_valid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ArrayOp {
    Insert,
    Remove,
    MoveUp,
    MoveDown,
}

/// Result of an array operation.
#[derive(Debug, Clone)]
pub struct ArrayEdit {
    pub data: Data,
    /// `remap[old] == Some(new)` for every element that survived, so hosts can
    /// move state they keep per index.
    pub remap: Vec<Option<usize>>,
}

pub struct Synchronizer<'s> {
    schema: &'s Schema,
}

impl<'s> Synchronizer<'s> {
    pub fn new(schema: &'s Schema) -> Self { Self { schema } }

    /// Set the value at `path`. A blank value on an optional property without
    /// a default removes the property instead.
    pub fn apply_edit(&self, data: &Data, path: &Path, value: Data) -> Result<Data, EditError> {
        if value.is_blank() && self.omit_when_blank(data, path) {
            debug!(path = %path, "cleared optional property removed");
            return remove_at(data, path);
        }
        set_at(data, path, value)
    }

    fn omit_when_blank(&self, data: &Data, path: &Path) -> bool {
        let Some((parent, Segment::Key(name))) = path.parent() else { return false };
        let Some(parent_node) = self.schema.node_at(&parent) else { return false };
        if parent_node.is_required(name) {
            return false;
        }
        if self.active_branch(&parent_node, data.get(&parent)).is_some_and(|b| b.is_required(name)) {
            return false;
        }
        match self.schema.node_at(path) {
            Some(node) => node.meta.default.is_none(),
            None => false,
        }
    }

    /// The `oneOf`/`anyOf` branch the form shows for `value`: the first one it
    /// satisfies, else the first branch.
    fn active_branch(&self, node: &SchemaNode, value: Option<&Data>) -> Option<Arc<SchemaNode>> {
        let branches: Vec<Arc<SchemaNode>> =
            node.variants()?.branches.iter().map(|b| self.schema.effective(b)).collect();
        let selected = value
            .and_then(|v| branches.iter().position(|b| is_valid(self.schema, b, v)))
            .unwrap_or(0);
        branches.into_iter().nth(selected)
    }

    pub fn apply_array_op(&self, data: &Data, path: &Path, op: ArrayOp, index: usize) -> Result<ArrayEdit, EditError> {
        let len = match data.get(path) {
            Some(Data::Array(xs)) => xs.len(),
            None | Some(Data::Null) if op == ArrayOp::Insert => 0,
            None | Some(Data::Null) => return Err(EditError::IndexOutOfBounds { at: path.clone(), index, len: 0 }),
            Some(_) => return Err(EditError::NotAnArray { at: path.clone() }),
        };
        let limit = if op == ArrayOp::Insert { len + 1 } else { len };
        if index >= limit {
            return Err(EditError::IndexOutOfBounds { at: path.clone(), index, len });
        }
        let identity: Vec<Option<usize>> = (0..len).map(Some).collect();
        let boundary = match op {
            ArrayOp::MoveUp => index == 0,
            ArrayOp::MoveDown => index + 1 == len,
            _ => false,
        };
        if boundary {
            return Ok(ArrayEdit { data: data.clone(), remap: identity });
        }

        let fresh = match op {
            ArrayOp::Insert => self
                .schema
                .node_at(&path.index(index))
                .and_then(|item| self.default_for(&item))
                .unwrap_or(Data::Null),
            _ => Data::Null,
        };
        let data = update_at(data, path, |current| {
            let mut xs: Vec<Data> = current.and_then(Data::as_array).map(<[Data]>::to_vec).unwrap_or_default();
            match op {
                ArrayOp::Insert => xs.insert(index, fresh),
                ArrayOp::Remove => { xs.remove(index); }
                ArrayOp::MoveUp => xs.swap(index - 1, index),
                ArrayOp::MoveDown => xs.swap(index, index + 1),
            }
            Ok(Some(Data::array(xs)))
        })?;

        let remap = identity
            .iter()
            .map(|slot| {
                let j = (*slot)?;
                match op {
                    ArrayOp::Insert => Some(if j < index { j } else { j + 1 }),
                    ArrayOp::Remove if j == index => None,
                    ArrayOp::Remove => Some(if j < index { j } else { j - 1 }),
                    ArrayOp::MoveUp if j == index => Some(j - 1),
                    ArrayOp::MoveUp if j + 1 == index => Some(j + 1),
                    ArrayOp::MoveDown if j == index => Some(j + 1),
                    ArrayOp::MoveDown if j == index + 1 => Some(j - 1),
                    _ => Some(j),
                }
            })
            .collect();
        Ok(ArrayEdit { data, remap })
    }

    /// Swap the value at `path` to variant `branch` of its `oneOf`/`anyOf`.
    ///
    /// Keys declared only by other variants are dropped, keys of the chosen
    /// variant get their defaults when absent (constants are always set), and
    /// keys no variant declares are kept as they are.
    pub fn switch_variant(&self, data: &Data, path: &Path, branch: usize) -> Result<Data, EditError> {
        let node = self.schema.node_at(path).ok_or_else(|| EditError::UnknownPath { at: path.clone() })?;
        let variants = node.variants().ok_or(EditError::NoSuchVariant { at: path.clone(), branch })?;
        let target = variants
            .branches
            .get(branch)
            .map(|b| self.schema.effective(b))
            .ok_or(EditError::NoSuchVariant { at: path.clone(), branch })?;

        let current = data.get(path);
        let next = match (target.object(), current) {
            (Some(shape), Some(Data::Object(map))) => {
                let owned: HashSet<&str> = shape.properties.keys().map(String::as_str).collect();
                let others: Vec<Arc<SchemaNode>> = variants
                    .branches
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| *i != branch)
                    .map(|(_, b)| self.schema.effective(b))
                    .collect();
                let foreign: HashSet<&str> = others
                    .iter()
                    .filter_map(|b| b.object())
                    .flat_map(|o| o.properties.keys().map(String::as_str))
                    .filter(|k| !owned.contains(k))
                    .collect();

                let mut out = Map::new();
                for (k, v) in map.iter() {
                    if !foreign.contains(k.as_str()) {
                        out.insert(k.clone(), v.clone());
                    }
                }
                for (name, prop) in &shape.properties {
                    let prop = self.schema.effective(prop);
                    if let SchemaKind::Enum(e) = &prop.kind {
                        if let [only] = e.values.as_slice() {
                            out.insert(name.clone(), only.clone());
                            continue;
                        }
                    }
                    if !out.contains_key(name) {
                        if let Some(d) = self.default_for(&prop) {
                            out.insert(name.clone(), d);
                        }
                    }
                }
                Data::object(out)
            }
            (_, Some(value)) if is_valid(self.schema, &target, value) => value.clone(),
            _ => self.default_for(&target).unwrap_or(Data::Null),
        };
        debug!(path = %path, branch, "variant switched");
        set_at(data, path, next)
    }

    /// Default shape of a node: its `default`, a constant, or an object made of
    /// the defaults of its properties. Nodes that lead back into an enclosing
    /// definition are not expanded.
    pub fn default_for(&self, node: &Arc<SchemaNode>) -> Option<Data> {
        if node.reenters() {
            return node.default_data();
        }
        self.expand_default(&self.schema.effective(node))
    }

    fn expand_default(&self, node: &SchemaNode) -> Option<Data> {
        if let Some(d) = node.default_data() {
            return Some(d);
        }
        match &node.kind {
            SchemaKind::Enum(e) if e.values.len() == 1 => Some(e.values[0].clone()),
            SchemaKind::Object(o) => {
                let mut map = Map::new();
                for (name, prop) in &o.properties {
                    if let Some(d) = self.default_for(prop) {
                        map.insert(name.clone(), d);
                    }
                }
                if let Some(first) = node.variants().and_then(|v| v.branches.first()) {
                    if let Some(Data::Object(extra)) = self.default_for(first) {
                        for (k, v) in extra.iter() {
                            map.entry(k.clone()).or_insert_with(|| v.clone());
                        }
                    }
                }
                (!map.is_empty()).then(|| Data::object(map))
            }
            _ => None,
        }
    }

    /// Fill absent properties that have defaults, recursively through the
    /// data that is present. An empty root becomes the root's default shape.
    pub fn reconcile_defaults(&self, data: &Data) -> Data {
        if data.is_null() {
            let root = self.schema.effective(&self.schema.root);
            return match &root.kind {
                SchemaKind::Object(_) => self.expand_default(&root).unwrap_or_else(|| Data::object(Map::new())),
                _ => self.expand_default(&root).unwrap_or(Data::Null),
            };
        }
        self.fill(&self.schema.root, data)
    }

    fn fill(&self, node: &Arc<SchemaNode>, data: &Data) -> Data {
        let node = self.schema.effective(node);
        match (&node.kind, data) {
            (SchemaKind::Object(o), Data::Object(map)) => {
                let mut out: Option<Map> = None;
                for (name, prop) in &o.properties {
                    let next = match map.get(name) {
                        Some(v) => {
                            let filled = self.fill(prop, v);
                            if filled.same(v) { continue; }
                            filled
                        }
                        None => match self.default_for(prop) {
                            Some(d) => d,
                            None => continue,
                        },
                    };
                    out.get_or_insert_with(|| (**map).clone()).insert(name.clone(), next);
                }
                out.map(Data::object).unwrap_or_else(|| data.clone())
            }
            (SchemaKind::Array(a), Data::Array(xs)) => {
                let Some(items) = &a.items else { return data.clone() };
                let filled: Vec<Data> = xs.iter().map(|x| self.fill(items, x)).collect();
                if filled.iter().zip(xs.iter()).all(|(a, b)| a.same(b)) {
                    data.clone()
                } else {
                    Data::array(filled)
                }
            }
            _ => data.clone(),
        }
    }
}

/// Two-space indented JSON for the host's data buffer.
pub fn serialize(data: &Data) -> String {
    data.to_pretty_string()
}

pub fn set_at(data: &Data, path: &Path, value: Data) -> Result<Data, EditError> {
    update_at(data, path, move |_| Ok(Some(value)))
}

pub fn remove_at(data: &Data, path: &Path) -> Result<Data, EditError> {
    if data.get(path).is_none() {
        return Ok(data.clone());
    }
    update_at(data, path, |_| Ok(None))
}

/// Replace the node at `path` with whatever `f` returns for it (`None` removes
/// it), rebuilding only its ancestors. Missing containers on the way are
/// created.
pub fn update_at<F>(data: &Data, path: &Path, f: F) -> Result<Data, EditError>
where
    F: FnOnce(Option<&Data>) -> Result<Option<Data>, EditError>,
{
    let out = update_in(Some(data), path.segments(), &Path::root(), f)?;
    Ok(out.unwrap_or(Data::Null))
}

fn update_in<F>(node: Option<&Data>, segs: &[Segment], at: &Path, f: F) -> Result<Option<Data>, EditError>
where
    F: FnOnce(Option<&Data>) -> Result<Option<Data>, EditError>,
{
    let Some((seg, rest)) = segs.split_first() else { return f(node) };
    match seg {
        Segment::Key(key) => {
            let map = match node {
                Some(Data::Object(m)) => Some(m),
                None | Some(Data::Null) => None,
                Some(other) => return Err(EditError::NotAContainer { at: at.clone(), found: other.type_name() }),
            };
            let child = map.and_then(|m| m.get(key));
            let next = update_in(child, rest, &at.key(key.as_str()), f)?;
            if let (Some(old), Some(new)) = (child, &next) {
                if old.same(new) {
                    return Ok(node.cloned());
                }
            }
            if child.is_none() && next.is_none() {
                return Ok(node.cloned());
            }
            let mut out = map.map(|m| (**m).clone()).unwrap_or_default();
            match next {
                Some(v) => { out.insert(key.clone(), v); }
                None => { out.shift_remove(key); }
            }
            Ok(Some(Data::object(out)))
        }
        Segment::Index(index) => {
            let xs = match node {
                Some(Data::Array(xs)) => Some(xs),
                None | Some(Data::Null) => None,
                Some(other) => return Err(EditError::NotAContainer { at: at.clone(), found: other.type_name() }),
            };
            let len = xs.map_or(0, |xs| xs.len());
            if *index > len {
                return Err(EditError::IndexOutOfBounds { at: at.clone(), index: *index, len });
            }
            let child = xs.and_then(|xs| xs.get(*index));
            let next = update_in(child, rest, &at.index(*index), f)?;
            if let (Some(old), Some(new)) = (child, &next) {
                if old.same(new) {
                    return Ok(node.cloned());
                }
            }
            let mut out = xs.map(|xs| (**xs).clone()).unwrap_or_default();
            match next {
                Some(v) if *index == out.len() => out.push(v),
                Some(v) => out[*index] = v,
                None if *index < out.len() => { out.remove(*index); }
                None => return Ok(node.cloned()),
            }
            Ok(Some(Data::array(out)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::resolve;
    use proptest::prelude::*;
    use serde_json::json;

    const SCHEMA: &str = r#"{
        "type": "object",
        "required": ["name"],
        "properties": {
            "name": {"type": "string"},
            "nickname": {"type": "string"},
            "color": {"type": "string", "default": "blue"},
            "tags": {"type": "array", "items": {"type": "string", "default": "new"}},
            "address": {
                "type": "object",
                "properties": {"city": {"type": "string"}, "zip": {"type": "string", "default": "00000"}}
            }
        }
    }"#;

    fn data(v: serde_json::Value) -> Data { Data::from(v) }

    fn p(s: &str) -> Path { s.parse().unwrap() }

    #[test]
    fn edit_rebuilds_spine_and_shares_siblings() {
        let schema = resolve(SCHEMA).unwrap();
        let sync = Synchronizer::new(&schema);
        let before = data(json!({"name": "a", "tags": ["x"], "address": {"city": "Oslo"}}));
        let after = sync.apply_edit(&before, &p("address.city"), Data::from("Rome")).unwrap();

        assert_eq!(after.get(&p("address.city")), Some(&Data::from("Rome")));
        assert!(after.get(&p("tags")).unwrap().same(before.get(&p("tags")).unwrap()));
        assert!(!after.same(&before));
        // The input snapshot is untouched.
        assert_eq!(before.get(&p("address.city")), Some(&Data::from("Oslo")));
    }

    #[test]
    fn clearing_optional_property_removes_it() {
        let schema = resolve(SCHEMA).unwrap();
        let sync = Synchronizer::new(&schema);
        let before = data(json!({"name": "a", "nickname": "b", "color": "red"}));

        let after = sync.apply_edit(&before, &p("nickname"), Data::from("")).unwrap();
        assert!(after.get(&p("nickname")).is_none());

        // Required and defaulted properties keep the blank value.
        let after = sync.apply_edit(&before, &p("name"), Data::from("")).unwrap();
        assert_eq!(after.get(&p("name")), Some(&Data::from("")));
        let after = sync.apply_edit(&before, &p("color"), Data::Null).unwrap();
        assert_eq!(after.get(&p("color")), Some(&Data::Null));
    }

    #[test]
    fn clearing_keeps_properties_the_active_branch_requires() {
        let schema = resolve(r#"{
            "type": "object",
            "properties": {
                "contact": {
                    "type": "object",
                    "properties": {"via": {"type": "string"}},
                    "oneOf": [
                        {"properties": {"via": {"const": "email"}, "address": {"type": "string"}}, "required": ["address"]},
                        {"properties": {"via": {"const": "phone"}, "number": {"type": "string"}, "note": {"type": "string"}}, "required": ["number"]}
                    ]
                }
            }
        }"#).unwrap();
        let sync = Synchronizer::new(&schema);
        let before = data(json!({"contact": {"via": "phone", "number": "555", "note": "evenings"}}));

        let after = sync.apply_edit(&before, &p("contact.number"), Data::from("")).unwrap();
        assert_eq!(after.get(&p("contact.number")), Some(&Data::from("")));

        let after = sync.apply_edit(&before, &p("contact.note"), Data::from("")).unwrap();
        assert!(after.get(&p("contact.note")).is_none());
    }

    #[test]
    fn edit_creates_missing_containers() {
        let schema = resolve(SCHEMA).unwrap();
        let sync = Synchronizer::new(&schema);
        let after = sync.apply_edit(&data(json!({})), &p("address.city"), Data::from("Oslo")).unwrap();
        assert_eq!(after.to_value(), json!({"address": {"city": "Oslo"}}));
    }

    #[test]
    fn edit_into_scalar_is_an_error() {
        let schema = resolve(SCHEMA).unwrap();
        let sync = Synchronizer::new(&schema);
        let err = sync.apply_edit(&data(json!({"name": "a"})), &p("name.first"), Data::from("x")).unwrap_err();
        assert!(matches!(err, EditError::NotAContainer { found: "string", .. }));
    }

    #[test]
    fn move_at_boundaries_is_a_no_op() {
        let schema = resolve(SCHEMA).unwrap();
        let sync = Synchronizer::new(&schema);
        let before = data(json!({"name": "a", "tags": ["x", "y", "z"]}));

        let up = sync.apply_array_op(&before, &p("tags"), ArrayOp::MoveUp, 0).unwrap();
        assert!(up.data.same(&before));
        assert_eq!(up.remap, vec![Some(0), Some(1), Some(2)]);

        let down = sync.apply_array_op(&before, &p("tags"), ArrayOp::MoveDown, 2).unwrap();
        assert!(down.data.same(&before));
    }

    #[test]
    fn array_ops_reorder_and_remap() {
        let schema = resolve(SCHEMA).unwrap();
        let sync = Synchronizer::new(&schema);
        let before = data(json!({"tags": ["x", "y", "z"]}));

        let down = sync.apply_array_op(&before, &p("tags"), ArrayOp::MoveDown, 0).unwrap();
        assert_eq!(down.data.get(&p("tags")).unwrap().to_value(), json!(["y", "x", "z"]));
        assert_eq!(down.remap, vec![Some(1), Some(0), Some(2)]);

        let removed = sync.apply_array_op(&before, &p("tags"), ArrayOp::Remove, 1).unwrap();
        assert_eq!(removed.data.get(&p("tags")).unwrap().to_value(), json!(["x", "z"]));
        assert_eq!(removed.remap, vec![Some(0), None, Some(1)]);

        let inserted = sync.apply_array_op(&before, &p("tags"), ArrayOp::Insert, 3).unwrap();
        assert_eq!(inserted.data.get(&p("tags")).unwrap().to_value(), json!(["x", "y", "z", "new"]));

        let err = sync.apply_array_op(&before, &p("tags"), ArrayOp::Remove, 3).unwrap_err();
        assert!(matches!(err, EditError::IndexOutOfBounds { index: 3, len: 3, .. }));
    }

    #[test]
    fn insert_into_absent_array_creates_it() {
        let schema = resolve(SCHEMA).unwrap();
        let sync = Synchronizer::new(&schema);
        let out = sync.apply_array_op(&data(json!({})), &p("tags"), ArrayOp::Insert, 0).unwrap();
        assert_eq!(out.data.to_value(), json!({"tags": ["new"]}));
        assert!(out.remap.is_empty());
    }

    #[test]
    fn reconcile_fills_defaults_and_shares_the_rest() {
        let schema = resolve(SCHEMA).unwrap();
        let sync = Synchronizer::new(&schema);
        let before = data(json!({"name": "a", "tags": ["x"], "address": {"city": "Oslo"}}));
        let after = sync.reconcile_defaults(&before);
        assert_eq!(after.get(&p("color")), Some(&Data::from("blue")));
        assert_eq!(after.get(&p("address.zip")), Some(&Data::from("00000")));
        assert!(after.get(&p("tags")).unwrap().same(before.get(&p("tags")).unwrap()));

        let empty = sync.reconcile_defaults(&Data::Null);
        assert_eq!(empty.to_value(), json!({"color": "blue", "address": {"zip": "00000"}}));
    }

    #[test]
    fn defaults_stop_at_composition_wrapped_cycles() {
        let schema = resolve(r##"{
            "type": "object",
            "properties": {
                "name": {"type": "string", "default": "root"},
                "child": {"description": "nested node", "allOf": [{"$ref": "#"}]},
                "next": {"oneOf": [{"type": "null"}, {"$ref": "#"}]}
            }
        }"##).unwrap();
        let sync = Synchronizer::new(&schema);
        assert_eq!(sync.reconcile_defaults(&Data::Null).to_value(), json!({"name": "root"}));

        let filled = sync.reconcile_defaults(&data(json!({"child": {}})));
        assert_eq!(filled.to_value(), json!({"child": {"name": "root"}, "name": "root"}));
    }

    #[test]
    fn defaults_of_a_self_referencing_all_of_terminate() {
        let schema = resolve(r#"{
            "$id": "A",
            "type": "object",
            "properties": {"x": {"type": "string", "default": "x"}},
            "allOf": [{"$ref": "A"}]
        }"#).unwrap();
        let sync = Synchronizer::new(&schema);
        assert_eq!(sync.reconcile_defaults(&Data::Null).to_value(), json!({"x": "x"}));
    }

    #[test]
    fn variant_switch_keeps_unowned_keys() {
        let schema = resolve(r#"{
            "type": "object",
            "properties": {
                "shape": {
                    "type": "object",
                    "properties": {"id": {"type": "string"}},
                    "oneOf": [
                        {"properties": {"kind": {"const": "circle"}, "radius": {"type": "number", "default": 1}}},
                        {"properties": {"kind": {"const": "square"}, "side": {"type": "number", "default": 2}}}
                    ]
                }
            }
        }"#).unwrap();
        let sync = Synchronizer::new(&schema);
        let before = data(json!({"shape": {"id": "s1", "kind": "circle", "radius": 5}}));
        let after = sync.switch_variant(&before, &p("shape"), 1).unwrap();
        assert_eq!(after.get(&p("shape")).unwrap().to_value(), json!({"id": "s1", "kind": "square", "side": 2}));

        let err = sync.switch_variant(&before, &p("shape"), 7).unwrap_err();
        assert!(matches!(err, EditError::NoSuchVariant { branch: 7, .. }));
    }

    proptest! {
        #[test]
        fn edits_never_touch_unrelated_subtrees(city in "[a-z]{0,8}", tag in "[a-z]{1,8}") {
            let schema = resolve(SCHEMA).unwrap();
            let sync = Synchronizer::new(&schema);
            let before = data(json!({"name": "n", "tags": [tag.clone()], "address": {"city": "x"}}));
            let after = sync.apply_edit(&before, &p("address.city"), Data::from(city.as_str())).unwrap();
            prop_assert!(after.get(&p("tags")).unwrap().same(before.get(&p("tags")).unwrap()));
            prop_assert_eq!(before.get(&p("address.city")), Some(&Data::from("x")));
        }
    }
}
