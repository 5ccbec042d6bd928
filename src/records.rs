//! Record store collaborator and the paginated browse view over it.
use std::path::Path as FsPath;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::data::Data;
use crate::error::CollaboratorError;
use crate::path_de::from_slice_with_path;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub rows: Vec<Data>,
    pub total_count: usize,
}

pub trait RecordStore {
    fn list(&self, table: &str, offset: usize, limit: usize) -> Result<Page, CollaboratorError>;
}

/// Tables held in memory, keyed by name.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct MemoryRecordStore {
    tables: IndexMap<String, Vec<Data>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self { Self::default() }

    pub fn with_table(mut self, name: impl Into<String>, rows: Vec<Data>) -> Self {
        self.tables.insert(name.into(), rows);
        self
    }

    /// Load `{ "<table>": [row, ...], ... }` from a JSON file.
    pub fn from_file(path: &FsPath) -> Result<Self, CollaboratorError> {
        let bytes = std::fs::read(path).map_err(|e| CollaboratorError::Fetch {
            what: "records",
            reason: format!("{}: {e}", path.display()),
        })?;
        from_slice_with_path("records", &bytes)
    }
}

impl RecordStore for MemoryRecordStore {
    fn list(&self, table: &str, offset: usize, limit: usize) -> Result<Page, CollaboratorError> {
        let rows = self
            .tables
            .get(table)
            .ok_or_else(|| CollaboratorError::UnknownTable(table.to_string()))?;
        Ok(Page {
            rows: rows.iter().skip(offset).take(limit).cloned().collect(),
            total_count: rows.len(),
        })
    }
}

/// One table, one page at a time. Failures are kept in `errors` and leave the
/// last good page in place.
#[derive(Debug, Clone)]
pub struct BrowseView {
    pub table: String,
    pub page_size: usize,
    pub offset: usize,
    pub page: Option<Page>,
    pub errors: Vec<String>,
}

impl BrowseView {
    pub fn new(table: impl Into<String>, page_size: usize) -> Self {
        Self { table: table.into(), page_size: page_size.max(1), offset: 0, page: None, errors: Vec::new() }
    }

    pub fn refresh(&mut self, store: &dyn RecordStore) -> bool {
        match store.list(&self.table, self.offset, self.page_size) {
            Ok(page) => {
                self.page = Some(page);
                self.errors.clear();
                true
            }
            Err(error) => {
                warn!(table = %self.table, %error, "record listing failed");
                self.errors.push(error.to_string());
                false
            }
        }
    }

    pub fn has_next(&self) -> bool {
        self.page.as_ref().is_some_and(|p| self.offset + self.page_size < p.total_count)
    }

    pub fn has_prev(&self) -> bool { self.offset > 0 }

    pub fn next_page(&mut self, store: &dyn RecordStore) -> bool {
        if !self.has_next() {
            return false;
        }
        self.offset += self.page_size;
        self.refresh(store)
    }

    pub fn prev_page(&mut self, store: &dyn RecordStore) -> bool {
        if !self.has_prev() {
            return false;
        }
        self.offset = self.offset.saturating_sub(self.page_size);
        self.refresh(store)
    }

    /// 1-based page number and page count.
    pub fn position(&self) -> (usize, usize) {
        let total = self.page.as_ref().map_or(0, |p| p.total_count);
        (self.offset / self.page_size + 1, total.div_ceil(self.page_size).max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> MemoryRecordStore {
        let rows = (0..5).map(|i| Data::from(json!({"id": i}))).collect();
        MemoryRecordStore::new().with_table("jobs", rows)
    }

    #[test]
    fn pages_through_a_table() {
        let store = store();
        let mut view = BrowseView::new("jobs", 2);
        assert!(view.refresh(&store));
        assert_eq!(view.page.as_ref().unwrap().rows.len(), 2);
        assert_eq!(view.position(), (1, 3));

        assert!(view.next_page(&store));
        assert!(view.next_page(&store));
        assert_eq!(view.page.as_ref().unwrap().rows, vec![Data::from(json!({"id": 4}))]);
        assert!(!view.next_page(&store));

        assert!(view.prev_page(&store));
        assert_eq!(view.offset, 2);
    }

    #[test]
    fn failures_are_local() {
        let store = store();
        let mut view = BrowseView::new("missing", 10);
        assert!(!view.refresh(&store));
        assert_eq!(view.errors, vec!["unknown table `missing`".to_string()]);
        assert!(view.page.is_none());
        assert!(!view.prev_page(&store));
    }

    #[test]
    fn decodes_tables_from_json() {
        let store: MemoryRecordStore = crate::path_de::from_str_with_path("records", r#"{"a": [{"x": 1}], "b": []}"#).unwrap();
        assert_eq!(store.list("a", 0, 10).unwrap().total_count, 1);
        assert_eq!(store.list("b", 0, 10).unwrap(), Page::default());
    }
}
