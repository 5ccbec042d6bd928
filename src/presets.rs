//! Resource specification presets and the custom field that edits them.
//!
//! Presets come from a `PresetProvider`. Loads are sequence numbered and only
//! the response to the latest request is kept, so a slow stale response can
//! never overwrite a newer one. A failed or missing provider leaves the field
//! usable in custom mode.
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::data::Data;
use crate::error::{CollaboratorError, EditError};
use crate::fields::{Choice, CustomField, FieldMapper, FieldNode, Inherited};
use crate::path::Path;
use crate::path_de::from_slice_with_path;
use crate::sync::Synchronizer;

/// Schema token the specification field is registered under.
pub const SPECIFICATION_TOKEN: &str = "/schemas/custom-specification";
/// Choice key that switches the field to free entry.
pub const CUSTOM: &str = "custom";

// ————————————————————————————————————————————————————————————————————————————
// TYPES
// ————————————————————————————————————————————————————————————————————————————

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resources {
    pub cpu: String,
    pub memory: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Specification {
    #[serde(rename = "type")]
    pub kind: String,
    pub requests: Resources,
    pub limits: Resources,
}

impl Specification {
    fn new(kind: &str, requests: (&str, &str), limits: (&str, &str)) -> Self {
        Self {
            kind: kind.to_string(),
            requests: Resources { cpu: requests.0.to_string(), memory: requests.1.to_string() },
            limits: Resources { cpu: limits.0.to_string(), memory: limits.1.to_string() },
        }
    }

    pub fn to_data(&self) -> Data {
        Data::from(json!({
            "type": self.kind,
            "requests": {"cpu": self.requests.cpu, "memory": self.requests.memory},
            "limits": {"cpu": self.limits.cpu, "memory": self.limits.memory},
        }))
    }
}

/// Preset key → specification, in provider order.
pub type Presets = IndexMap<String, Specification>;

pub trait PresetProvider {
    fn fetch(&self) -> Result<Presets, CollaboratorError>;
}

/// The stock set of presets.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinPresets;

impl PresetProvider for BuiltinPresets {
    fn fetch(&self) -> Result<Presets, CollaboratorError> {
        let mut presets = Presets::new();
        presets.insert("small".into(), Specification::new("small", ("0.5", "512Mi"), ("1", "1Gi")));
        presets.insert("medium".into(), Specification::new("medium", ("1", "1Gi"), ("2", "2Gi")));
        presets.insert("large".into(), Specification::new("large", ("2", "2Gi"), ("4", "4Gi")));
        presets.insert("memoryOptimized".into(), Specification::new("memory-optimized", ("2", "4Gi"), ("4", "8Gi")));
        presets.insert("computeOptimized".into(), Specification::new("compute-optimized", ("4", "2Gi"), ("8", "4Gi")));
        Ok(presets)
    }
}

/// Presets read from a JSON file shaped like the builtin set.
#[derive(Debug, Clone)]
pub struct FilePresets {
    path: PathBuf,
}

impl FilePresets {
    pub fn new(path: impl Into<PathBuf>) -> Self { Self { path: path.into() } }
}

impl PresetProvider for FilePresets {
    fn fetch(&self) -> Result<Presets, CollaboratorError> {
        let bytes = std::fs::read(&self.path).map_err(|e| CollaboratorError::Fetch {
            what: "presets",
            reason: format!("{}: {e}", self.path.display()),
        })?;
        from_slice_with_path("presets", &bytes)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum PresetState {
    #[default]
    Loading,
    Ready(Presets),
    Failed(CollaboratorError),
}

impl PresetState {
    pub fn presets(&self) -> Option<&Presets> {
        match self {
            PresetState::Ready(p) => Some(p),
            _ => None,
        }
    }
}

pub type SharedPresets = Arc<RwLock<PresetState>>;

/// Handle for one outstanding load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket(u64);

// ————————————————————————————————————————————————————————————————————————————
// LOADER
// ————————————————————————————————————————————————————————————————————————————

#[derive(Debug, Default)]
pub struct PresetLoader {
    issued: u64,
    state: SharedPresets,
}

impl PresetLoader {
    pub fn new() -> Self { Self::default() }

    /// Shared view of the loaded presets, for fields that display them.
    pub fn shared(&self) -> SharedPresets { self.state.clone() }

    pub fn snapshot(&self) -> PresetState { read_state(&self.state) }

    pub fn begin(&mut self) -> Ticket {
        self.issued += 1;
        write_state(&self.state, PresetState::Loading);
        Ticket(self.issued)
    }

    /// Store a response. Returns `false` when a newer request was issued
    /// after `ticket`, in which case the response is dropped.
    pub fn complete(&mut self, ticket: Ticket, result: Result<Presets, CollaboratorError>) -> bool {
        if ticket.0 != self.issued {
            debug!(ticket = ticket.0, latest = self.issued, "stale preset response ignored");
            return false;
        }
        let state = match result {
            Ok(presets) => PresetState::Ready(presets),
            Err(error) => {
                warn!(%error, "presets unavailable, custom entry only");
                PresetState::Failed(error)
            }
        };
        write_state(&self.state, state);
        true
    }

    pub fn load(&mut self, provider: &dyn PresetProvider) -> PresetState {
        let ticket = self.begin();
        self.complete(ticket, provider.fetch());
        self.snapshot()
    }
}

fn read_state(lock: &SharedPresets) -> PresetState {
    match lock.read() {
        Ok(guard) => guard.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

fn write_state(lock: &SharedPresets, state: PresetState) {
    match lock.write() {
        Ok(mut guard) => *guard = state,
        Err(poisoned) => *poisoned.into_inner() = state,
    }
}

// ————————————————————————————————————————————————————————————————————————————
// FIELD
// ————————————————————————————————————————————————————————————————————————————

/// Schema of a specification value.
pub fn specification_schema() -> Value {
    let resources = |title: &str| json!({
        "type": "object",
        "title": title,
        "properties": {
            "cpu": {"type": "string", "title": "CPU"},
            "memory": {"type": "string", "title": "Memory"}
        }
    });
    json!({
        "type": "object",
        "properties": {
            "type": {"type": "string", "title": "Type"},
            "requests": resources("Requests"),
            "limits": resources("Limits")
        }
    })
}

/// A value is in custom mode when its type is set and names no preset.
pub fn is_custom(kind: &str, presets: &Presets) -> bool {
    !kind.is_empty() && !presets.values().any(|p| p.kind == kind)
}

pub struct SpecificationField {
    presets: SharedPresets,
}

impl SpecificationField {
    pub fn new(presets: SharedPresets) -> Self { Self { presets } }
}

impl CustomField for SpecificationField {
    fn token(&self) -> &str { SPECIFICATION_TOKEN }

    fn schema(&self) -> Option<Value> { Some(specification_schema()) }

    fn build(&self, mapper: &FieldMapper<'_>, mut seed: FieldNode, inherited: Inherited) -> FieldNode {
        let state = read_state(&self.presets);
        let empty = Presets::new();
        let presets = state.presets().unwrap_or(&empty);
        if state == PresetState::Loading {
            seed.disabled = true;
        }

        let kind = seed
            .value
            .as_ref()
            .and_then(|v| v.get(&Path::root().key("type")))
            .and_then(Data::as_str)
            .unwrap_or_default()
            .to_string();
        let custom = is_custom(&kind, presets);

        seed.choices = presets
            .iter()
            .map(|(key, p)| Choice { label: p.kind.clone(), value: Data::string(key) })
            .chain(std::iter::once(Choice { label: CUSTOM.into(), value: Data::string(CUSTOM) }))
            .collect();
        seed.selected = if custom {
            Some(presets.len())
        } else {
            presets.values().position(|p| p.kind == kind)
        };

        let child_flags = Inherited { readonly: inherited.readonly || !custom, ..inherited };
        seed.children = mapper
            .properties(&seed.schema, &seed.path, seed.value.as_ref(), seed.hint.as_deref(), child_flags)
            .into_iter()
            .filter(|c| c.path.last().is_some_and(|s| s.to_string() != "type"))
            .filter(|c| custom || c.value.is_some())
            .collect();
        seed
    }
}

/// Apply a choice of the specification field at `path`.
///
/// A preset key replaces the value with the preset. `custom` keeps the current
/// requests and limits and only sets `type`.
pub fn select_preset(sync: &Synchronizer<'_>, data: &Data, path: &Path, key: &str, presets: &Presets) -> Result<Data, EditError> {
    if key == CUSTOM {
        return match data.get(path) {
            Some(Data::Object(_)) => sync.apply_edit(data, &path.key("type"), Data::string(CUSTOM)),
            _ => {
                let blank = Specification { kind: CUSTOM.into(), ..Specification::default() };
                sync.apply_edit(data, path, blank.to_data())
            }
        };
    }
    let preset = presets.get(key).ok_or_else(|| EditError::UnknownPreset { key: key.to_string() })?;
    sync.apply_edit(data, path, preset.to_data())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::{FieldKind, FieldRegistry};
    use crate::hints::UiHints;

    const FORM: &str = r#"{
        "type": "object",
        "properties": {
            "id": {"type": "string"},
            "name": {"type": "string", "title": "Name"},
            "specification": {"title": "Specification", "$ref": "/schemas/custom-specification"}
        },
        "required": ["name", "specification"]
    }"#;

    fn ready() -> (PresetLoader, FieldRegistry) {
        let mut loader = PresetLoader::new();
        loader.load(&BuiltinPresets);
        let registry = FieldRegistry::new().with(Arc::new(SpecificationField::new(loader.shared())));
        (loader, registry)
    }

    fn builtin() -> Presets {
        BuiltinPresets.fetch().unwrap()
    }

    #[test]
    fn builtin_presets_in_order() {
        let presets = builtin();
        assert_eq!(
            presets.keys().map(String::as_str).collect::<Vec<_>>(),
            vec!["small", "medium", "large", "memoryOptimized", "computeOptimized"]
        );
        assert_eq!(presets["memoryOptimized"].kind, "memory-optimized");
        assert_eq!(presets["small"].requests.memory, "512Mi");
    }

    #[test]
    fn stale_response_is_dropped() {
        let mut loader = PresetLoader::new();
        let first = loader.begin();
        let second = loader.begin();
        assert!(loader.complete(second, Ok(builtin())));
        assert!(!loader.complete(first, Err(CollaboratorError::Fetch { what: "presets", reason: "timeout".into() })));
        assert!(loader.snapshot().presets().is_some());
    }

    #[test]
    fn preset_mode_shows_read_only_resources() {
        let (_loader, registry) = ready();
        let schema = registry.resolve(FORM).unwrap();
        let hints = UiHints::empty();
        let data = Data::from(json!({"specification": builtin()["small"]}));
        let root = FieldMapper::new(&schema, &hints, &registry).map(&data);
        let spec = root.child("specification").unwrap();
        assert_eq!(spec.kind, FieldKind::Custom(SPECIFICATION_TOKEN.into()));
        assert_eq!(spec.label, "Specification");
        assert_eq!(spec.choices.len(), 6);
        assert_eq!(spec.selected, Some(0));
        let names: Vec<String> = spec.children.iter().map(|c| c.path.to_string()).collect();
        assert_eq!(names, vec!["specification.requests", "specification.limits"]);
        assert!(spec.children.iter().all(|c| c.readonly));
    }

    #[test]
    fn custom_mode_is_editable() {
        let (_loader, registry) = ready();
        let schema = registry.resolve(FORM).unwrap();
        let hints = UiHints::empty();
        let data = Data::from(json!({"specification": {"type": "custom", "requests": {"cpu": "3"}}}));
        let root = FieldMapper::new(&schema, &hints, &registry).map(&data);
        let spec = root.child("specification").unwrap();
        assert_eq!(spec.selected, Some(5));
        assert_eq!(spec.children.len(), 2);
        assert!(spec.children.iter().all(|c| !c.readonly));
        assert_eq!(spec.children[0].children[0].kind, FieldKind::Text);
    }

    #[test]
    fn failed_provider_leaves_custom_only() {
        let mut loader = PresetLoader::new();
        let state = loader.load(&FilePresets::new("/nonexistent/presets.json"));
        assert!(matches!(state, PresetState::Failed(CollaboratorError::Fetch { .. })));
        let registry = FieldRegistry::new().with(Arc::new(SpecificationField::new(loader.shared())));
        let schema = registry.resolve(FORM).unwrap();
        let hints = UiHints::empty();
        let root = FieldMapper::new(&schema, &hints, &registry).map(&Data::Null);
        let spec = root.child("specification").unwrap();
        assert_eq!(spec.choices.iter().map(|c| c.label.as_str()).collect::<Vec<_>>(), vec!["custom"]);
    }

    #[test]
    fn file_presets_decode_with_path_errors() {
        let path = std::env::temp_dir().join(format!("schema-forms-presets-{}.json", std::process::id()));
        std::fs::write(&path, r#"{"tiny": {"type": "tiny", "requests": {"cpu": 1, "memory": "1Mi"}, "limits": {"cpu": "1", "memory": "1Mi"}}}"#).unwrap();
        let err = FilePresets::new(&path).fetch().unwrap_err();
        std::fs::remove_file(&path).ok();
        match err {
            CollaboratorError::Decode { reason, .. } => assert!(reason.contains("tiny.requests.cpu"), "{reason}"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn switching_to_custom_keeps_siblings_and_values() {
        let (_loader, registry) = ready();
        let schema = registry.resolve(FORM).unwrap();
        let sync = Synchronizer::new(&schema);
        let presets = builtin();
        let before = Data::from(json!({"id": "abc", "name": "n", "specification": presets["small"]}));
        let path: Path = "specification".parse().unwrap();

        let after = select_preset(&sync, &before, &path, CUSTOM, &presets).unwrap();
        assert_eq!(after.get(&"id".parse().unwrap()), Some(&Data::from("abc")));
        assert_eq!(after.get(&"specification.type".parse().unwrap()), Some(&Data::from("custom")));
        assert_eq!(after.get(&"specification.limits.memory".parse().unwrap()), Some(&Data::from("1Gi")));

        let large = select_preset(&sync, &after, &path, "large", &presets).unwrap();
        assert_eq!(large.get(&path), Some(&presets["large"].to_data()));

        let err = select_preset(&sync, &before, &path, "huge", &presets).unwrap_err();
        assert_eq!(err, EditError::UnknownPreset { key: "huge".into() });
    }
}
