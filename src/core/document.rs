use super::error::{PersistError, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// An ordered document as stored in the document store.
///
/// Field order is insertion order, so a module set marshals in registry order.
pub type Document = serde_json::Map<String, Value>;

/// Serializes `value` into a document. Anything that does not serialize to a
/// JSON object is rejected.
pub fn to_document<T: Serialize + ?Sized>(value: &T) -> Result<Document> {
    match serde_json::to_value(value).map_err(|err| PersistError::Encode(err.to_string()))? {
        Value::Object(map) => Ok(map),
        other => Err(PersistError::Encode(format!(
            "expected a document, got {}",
            value_kind(&other)
        ))),
    }
}

pub fn from_value<T: DeserializeOwned>(value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|err| PersistError::Decode(err.to_string()))
}

/// Looks up a dotted path (`modules.base.name`) inside a document.
pub fn lookup_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = doc.get(first)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Applies a `$set`-style patch. Dotted keys address nested fields and create
/// intermediate documents as needed; a non-document in the way is replaced.
pub fn apply_set(target: &mut Document, set: &Document) {
    for (path, value) in set {
        set_path(target, path, value.clone());
    }
}

fn set_path(target: &mut Document, path: &str, value: Value) {
    let Some((head, rest)) = path.split_once('.') else {
        target.insert(path.to_string(), value);
        return;
    };

    let slot = target
        .entry(head.to_string())
        .or_insert_with(|| Value::Object(Document::new()));
    if !slot.is_object() {
        *slot = Value::Object(Document::new());
    }
    if let Value::Object(inner) = slot {
        set_path(inner, rest, value);
    }
}

/// Equality match of every filter field against the document.
pub fn matches_filter(doc: &Document, filter: &Document) -> bool {
    filter
        .iter()
        .all(|(path, expected)| lookup_path(doc, path) == Some(expected))
}

/// Keeps only the top-level fields the projection marks as included.
pub fn project(doc: &Document, projection: &Document) -> Document {
    let mut out = Document::new();
    for (field, include) in projection {
        let included = match include {
            Value::Bool(flag) => *flag,
            Value::Number(n) => n.as_i64().map(|n| n != 0).unwrap_or(true),
            _ => false,
        };
        if included {
            if let Some(value) = doc.get(field) {
                out.insert(field.clone(), value.clone());
            }
        }
    }
    out
}

fn value_kind(value: &Value) -> &'static str {
    match value {
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

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn dotted_set_creates_nested_documents() {
        let mut target = doc(json!({"id": 1}));
        apply_set(
            &mut target,
            &doc(json!({"modules.A": {"value": "x"}, "version": 2})),
        );
        assert_eq!(
            Value::Object(target),
            json!({"id": 1, "modules": {"A": {"value": "x"}}, "version": 2})
        );
    }

    #[test]
    fn dotted_set_replaces_scalar_in_the_way() {
        let mut target = doc(json!({"modules": 3}));
        apply_set(&mut target, &doc(json!({"modules.B": 1})));
        assert_eq!(Value::Object(target), json!({"modules": {"B": 1}}));
    }

    #[test]
    fn filter_and_lookup() {
        let stored = doc(json!({"id": 42, "modules": {"A": {"value": "x"}}}));
        assert!(matches_filter(&stored, &doc(json!({"id": 42}))));
        assert!(matches_filter(&stored, &doc(json!({"modules.A.value": "x"}))));
        assert!(!matches_filter(&stored, &doc(json!({"id": 7}))));
        assert_eq!(lookup_path(&stored, "modules.A.value"), Some(&json!("x")));
        assert_eq!(lookup_path(&stored, "modules.Z"), None);
    }

    #[test]
    fn projection_keeps_marked_fields() {
        let stored = doc(json!({"id": 1, "name": "n", "modules": {}}));
        let projected = project(&stored, &doc(json!({"id": 1, "modules": true, "name": 0})));
        assert_eq!(Value::Object(projected), json!({"id": 1, "modules": {}}));
    }

    #[test]
    fn non_object_is_not_a_document() {
        assert!(matches!(to_document(&5u32), Err(PersistError::Encode(_))));
    }
}
