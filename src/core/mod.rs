pub mod document;
pub mod error;

pub use document::{Document, apply_set, lookup_path, matches_filter, to_document};
pub use error::{PersistError, Result};
