//! Host-facing session: three text buffers in, data text out.
//!
//! Nothing parsed is cached; every call re-runs the pipeline from the current
//! buffers. A broken buffer only blocks what depends on it: a bad UI schema
//! renders without hints, bad data still renders the create form, and a bad
//! schema blocks the forms but not the data view.
use tracing::debug;

use crate::data::Data;
use crate::error::{ParseError, SchemaError, SessionError};
use crate::fields::{annotate, FieldMapper, FieldNode, FieldRegistry};
use crate::hints::{parse_hints, UiHints};
use crate::path::Path;
use crate::presets::{select_preset, Presets};
use crate::schema::Schema;
use crate::sync::{serialize, ArrayOp, Synchronizer};
use crate::validate::validate;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Empty form over the schema's defaults.
    Create,
    /// Form over the current data, with validation errors.
    Update,
    /// The data as formatted JSON.
    View,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PreviewBody {
    Form(FieldNode),
    Json(String),
    Blocked(&'static str),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Preview {
    /// One line per broken buffer, prefixed with the buffer name.
    pub diagnostics: Vec<String>,
    pub body: PreviewBody,
}

pub const NO_SCHEMA: &str = "Please provide a valid JSON schema";
pub const NO_DATA: &str = "No valid form data to display";

pub struct FormSession {
    schema_text: String,
    ui_text: String,
    data_text: String,
    registry: FieldRegistry,
    on_change: Option<Box<dyn FnMut(&str)>>,
}

impl FormSession {
    pub fn new(schema_text: impl Into<String>, ui_text: impl Into<String>, data_text: impl Into<String>) -> Self {
        Self {
            schema_text: schema_text.into(),
            ui_text: ui_text.into(),
            data_text: data_text.into(),
            registry: FieldRegistry::new(),
            on_change: None,
        }
    }

    pub fn with_registry(mut self, registry: FieldRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Called with the new data text after every edit.
    pub fn on_change(mut self, callback: impl FnMut(&str) + 'static) -> Self {
        self.on_change = Some(Box::new(callback));
        self
    }

    pub fn schema_text(&self) -> &str { &self.schema_text }
    pub fn ui_text(&self) -> &str { &self.ui_text }
    pub fn data_text(&self) -> &str { &self.data_text }

    pub fn set_schema_text(&mut self, text: impl Into<String>) { self.schema_text = text.into(); }
    pub fn set_ui_text(&mut self, text: impl Into<String>) { self.ui_text = text.into(); }
    pub fn set_data_text(&mut self, text: impl Into<String>) { self.data_text = text.into(); }

    pub fn registry(&self) -> &FieldRegistry { &self.registry }

    pub fn schema(&self) -> Result<Schema, SchemaError> {
        self.registry.resolve(&self.schema_text)
    }

    pub fn hints(&self) -> Result<UiHints, ParseError> {
        parse_hints(&self.ui_text)
    }

    pub fn data(&self) -> Result<Data, ParseError> {
        Data::parse(&self.data_text)
    }

    pub fn diagnostics(&self) -> Vec<String> {
        let mut out = Vec::new();
        if !self.schema_text.trim().is_empty() {
            match self.schema() {
                Err(SchemaError::Parse(e)) => out.push(e.to_string()),
                Err(SchemaError::Resolution(e)) => out.push(format!("Schema Error: {e}")),
                Ok(_) => {}
            }
        }
        if let Err(e) = self.hints() {
            out.push(e.to_string());
        }
        if let Err(e) = self.data() {
            out.push(e.to_string());
        }
        out
    }

    pub fn preview(&self, mode: Mode) -> Preview {
        let diagnostics = self.diagnostics();
        let body = match mode {
            Mode::View => match self.data() {
                Ok(data) if !data.is_null() => PreviewBody::Json(serialize(&data)),
                _ => PreviewBody::Blocked(NO_DATA),
            },
            Mode::Create | Mode::Update => match self.schema() {
                Ok(schema) => PreviewBody::Form(self.form(&schema, mode)),
                Err(_) => PreviewBody::Blocked(NO_SCHEMA),
            },
        };
        Preview { diagnostics, body }
    }

    fn form(&self, schema: &Schema, mode: Mode) -> FieldNode {
        let hints = self.hints().unwrap_or_default();
        let mapper = FieldMapper::new(schema, &hints, &self.registry);
        match mode {
            Mode::Update => {
                let data = self.data().unwrap_or_default();
                let mut root = mapper.map(&data);
                annotate(&mut root, &validate(schema, &data));
                root
            }
            _ => mapper.map(&Synchronizer::new(schema).reconcile_defaults(&Data::Null)),
        }
    }

    pub fn edit(&mut self, path: &Path, value: Data) -> Result<Data, SessionError> {
        let (schema, data) = self.load()?;
        let next = Synchronizer::new(&schema).apply_edit(&data, path, value)?;
        Ok(self.commit(next))
    }

    /// Returns the new data and the old → new index remap.
    pub fn array_op(&mut self, path: &Path, op: ArrayOp, index: usize) -> Result<(Data, Vec<Option<usize>>), SessionError> {
        let (schema, data) = self.load()?;
        let edit = Synchronizer::new(&schema).apply_array_op(&data, path, op, index)?;
        Ok((self.commit(edit.data), edit.remap))
    }

    pub fn switch_variant(&mut self, path: &Path, branch: usize) -> Result<Data, SessionError> {
        let (schema, data) = self.load()?;
        let next = Synchronizer::new(&schema).switch_variant(&data, path, branch)?;
        Ok(self.commit(next))
    }

    pub fn select_preset(&mut self, path: &Path, key: &str, presets: &Presets) -> Result<Data, SessionError> {
        let (schema, data) = self.load()?;
        let next = select_preset(&Synchronizer::new(&schema), &data, path, key, presets)?;
        Ok(self.commit(next))
    }

    fn load(&self) -> Result<(Schema, Data), SessionError> {
        let schema = self.schema()?;
        let data = self.data().map_err(SessionError::Data)?;
        Ok((schema, data))
    }

    fn commit(&mut self, data: Data) -> Data {
        self.data_text = serialize(&data);
        debug!(bytes = self.data_text.len(), "data buffer updated");
        if let Some(callback) = self.on_change.as_mut() {
            callback(&self.data_text);
        }
        data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    use crate::fields::FieldKind;

    const SCHEMA: &str = r#"{
        "type": "object",
        "properties": {
            "name": {"type": "string", "minLength": 2},
            "active": {"type": "boolean", "default": true}
        },
        "required": ["name"]
    }"#;

    fn form(preview: Preview) -> FieldNode {
        match preview.body {
            PreviewBody::Form(root) => root,
            other => panic!("expected a form, got {other:?}"),
        }
    }

    #[test]
    fn diagnostics_name_the_broken_buffer() {
        let session = FormSession::new("{", "[", "{\"a\": }");
        let diagnostics = session.diagnostics();
        assert_eq!(diagnostics.len(), 3);
        assert!(diagnostics[0].starts_with("Schema Error: "));
        assert!(diagnostics[1].starts_with("UI Schema Error: "));
        assert!(diagnostics[2].starts_with("Form Data Error: "));

        let unresolved = FormSession::new(r#"{"$ref": "Nope"}"#, "", "");
        assert!(unresolved.diagnostics()[0].starts_with("Schema Error: unresolved reference"));
    }

    #[test]
    fn bad_schema_blocks_forms_but_not_the_view() {
        let session = FormSession::new("{", "", r#"{"name": "x"}"#);
        assert_eq!(session.preview(Mode::Create).body, PreviewBody::Blocked(NO_SCHEMA));
        assert!(matches!(session.preview(Mode::View).body, PreviewBody::Json(_)));
    }

    #[test]
    fn bad_data_blocks_the_view_but_not_forms() {
        let session = FormSession::new(SCHEMA, "", "{ nope");
        assert_eq!(session.preview(Mode::View).body, PreviewBody::Blocked(NO_DATA));
        let root = form(session.preview(Mode::Update));
        assert_eq!(root.kind, FieldKind::Composite);
    }

    #[test]
    fn create_uses_defaults_and_update_shows_errors() {
        let session = FormSession::new(SCHEMA, "", r#"{"name": "x"}"#);
        let create = form(session.preview(Mode::Create));
        assert_eq!(create.child("active").unwrap().value, Some(Data::Bool(true)));
        assert_eq!(create.error_count(), 0);

        let update = form(session.preview(Mode::Update));
        assert_eq!(update.child("name").unwrap().errors.len(), 1);
        assert_eq!(update.child("active").unwrap().value, None);
    }

    #[test]
    fn edits_rewrite_the_buffer_and_notify() {
        let seen = Rc::new(RefCell::new(Vec::<String>::new()));
        let sink = seen.clone();
        let mut session = FormSession::new(SCHEMA, "", "").on_change(move |text| sink.borrow_mut().push(text.to_string()));
        session.edit(&"name".parse().unwrap(), Data::from("Ada")).unwrap();
        assert_eq!(session.data_text(), "{\n  \"name\": \"Ada\"\n}");
        assert_eq!(seen.borrow().len(), 1);

        session.set_data_text("{");
        assert!(matches!(session.edit(&"name".parse().unwrap(), Data::from("x")), Err(SessionError::Data(_))));
        assert_eq!(seen.borrow().len(), 1);
    }
}
