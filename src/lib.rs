//! Schema-driven form engine.
//!
//! Schema text and an optional UI schema go in; a field tree bound to the
//! current data comes out. Edits go back through the synchronizer and come
//! out as a new data snapshot.
pub mod data;
pub mod error;
pub mod fields;
pub mod hints;
pub mod path;
pub mod path_de;
pub mod presets;
pub mod records;
pub mod schema;
pub mod session;
pub mod sync;
pub mod validate;

pub use data::Data;
pub use error::{CollaboratorError, EditError, ParseError, ResolutionError, SchemaError, SessionError};
pub use fields::{FieldKind, FieldMapper, FieldNode, FieldRegistry};
pub use hints::{parse_hints, UiHints};
pub use path::Path;
pub use schema::{resolve, Schema};
pub use session::{FormSession, Mode};
pub use sync::{ArrayOp, Synchronizer};
pub use validate::{validate, ValidationError};
