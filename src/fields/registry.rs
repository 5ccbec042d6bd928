//! Custom field builders keyed by identity token.
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;

use super::{FieldMapper, FieldNode, Inherited};
use crate::error::SchemaError;
use crate::schema::{Resolver, Schema};

/// A builder that replaces the default mapping for one schema identity.
///
/// `build` receives a seed node with path, value, label and flags already
/// filled in and `kind` set to `Custom(token)`. It may use the mapper to map
/// nested schema nodes; mapping continues normally everywhere else.
pub trait CustomField: Send + Sync {
    /// `$ref`/`$id` token (or `ui:field` name) this field answers to.
    fn token(&self) -> &str;

    /// Schema for the token when the document refers to it without defining it.
    fn schema(&self) -> Option<Value> { None }

    fn build(&self, mapper: &FieldMapper<'_>, seed: FieldNode, inherited: Inherited) -> FieldNode;
}

#[derive(Clone, Default)]
pub struct FieldRegistry {
    fields: IndexMap<String, Arc<dyn CustomField>>,
}

impl FieldRegistry {
    pub fn new() -> Self { Self::default() }

    pub fn register(&mut self, field: Arc<dyn CustomField>) -> &mut Self {
        self.fields.insert(field.token().to_string(), field);
        self
    }

    pub fn with(mut self, field: Arc<dyn CustomField>) -> Self {
        self.register(field);
        self
    }

    pub fn get(&self, token: &str) -> Option<&Arc<dyn CustomField>> {
        self.fields.get(token)
    }

    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Resolver that knows the schemas the registered fields bring along.
    pub fn resolver(&self) -> Resolver {
        self.fields
            .iter()
            .filter_map(|(token, field)| field.schema().map(|s| (token.clone(), s)))
            .fold(Resolver::new(), |r, (token, schema)| r.with_external(token, schema))
    }

    pub fn resolve(&self, schema_text: &str) -> Result<Schema, SchemaError> {
        self.resolver().resolve(schema_text)
    }
}

impl fmt::Debug for FieldRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.fields.keys()).finish()
    }
}
