//! Document loading from files and strings.
//!
//! The resolution core never touches the filesystem; these helpers are the
//! collaborators that hand it already-parsed documents.

use std::path::Path;

use serde_json::Value;

use crate::document::Document;
use crate::error::ResolveError;

/// Load a JSON value from a file path.
///
/// # Errors
///
/// Returns `ResolveError::FileNotFound` if the file doesn't exist,
/// or `ResolveError::InvalidJson` if the file isn't valid JSON.
pub fn load_schema(path: &Path) -> Result<Value, ResolveError> {
    if !path.exists() {
        return Err(ResolveError::FileNotFound {
            path: path.to_path_buf(),
        });
    }

    let content = std::fs::read_to_string(path).map_err(|source| ResolveError::ReadError {
        path: path.to_path_buf(),
        source,
    })?;

    load_schema_str(&content)
}

/// Load a JSON value from a string.
///
/// # Errors
///
/// Returns `ResolveError::InvalidJson` if the string isn't valid JSON.
pub fn load_schema_str(content: &str) -> Result<Value, ResolveError> {
    serde_json::from_str(content).map_err(|source| ResolveError::InvalidJson { source })
}

/// Load an OpenRPC module or schema bundle from a file path.
///
/// # Errors
///
/// Returns the errors of [`load_schema`], or `ResolveError::InvalidDocument`
/// if the file is not a JSON object.
pub fn load_document(path: &Path) -> Result<Document, ResolveError> {
    Document::from_value(load_schema(path)?)
}

/// Navigate a JSON Pointer fragment (e.g., "#/definitions/foo" or "#/methods/0").
///
/// Returns `None` when any segment is missing. Numeric segments index arrays.
pub fn navigate_fragment<'v>(root: &'v Value, fragment: &str) -> Option<&'v Value> {
    // Remove leading # and split by /
    let path = fragment.trim_start_matches('#').trim_start_matches('/');
    if path.is_empty() {
        return Some(root);
    }

    let mut current = root;
    for part in path.split('/') {
        // Unescape JSON Pointer encoding (~1 = /, ~0 = ~)
        let key = part.replace("~1", "/").replace("~0", "~");
        current = match current {
            Value::Object(map) => map.get(&key)?,
            Value::Array(items) => items.get(key.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Escape a key for use as a JSON Pointer segment.
pub fn escape_segment(key: &str) -> String {
    key.replace('~', "~0").replace('/', "~1")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn load_schema_valid_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"type": "object"}}"#).unwrap();

        let schema = load_schema(file.path()).unwrap();
        assert_eq!(schema["type"], "object");
    }

    #[test]
    fn load_schema_file_not_found() {
        let result = load_schema(Path::new("/nonexistent/path.json"));
        assert!(matches!(result, Err(ResolveError::FileNotFound { .. })));
    }

    #[test]
    fn load_schema_invalid_json() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "not valid json").unwrap();

        let result = load_schema(file.path());
        assert!(matches!(result, Err(ResolveError::InvalidJson { .. })));
    }

    #[test]
    fn load_document_reads_title() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"info": {{"title": "Device"}}, "methods": []}}"#).unwrap();

        let document = load_document(file.path()).unwrap();
        assert_eq!(document.title(), "Device");
    }

    #[test]
    fn navigate_fragment_objects_and_arrays() {
        let root = json!({
            "definitions": { "a/b": { "type": "string" } },
            "methods": [{ "name": "first" }]
        });
        assert_eq!(
            navigate_fragment(&root, "#/definitions/a~1b"),
            Some(&json!({ "type": "string" }))
        );
        assert_eq!(
            navigate_fragment(&root, "#/methods/0/name"),
            Some(&json!("first"))
        );
        assert_eq!(navigate_fragment(&root, "#/methods/7"), None);
        assert_eq!(navigate_fragment(&root, "#"), Some(&root));
    }

    #[test]
    fn escape_segment_round_trips() {
        let root = json!({ "a/b~c": 1 });
        let pointer = format!("#/{}", escape_segment("a/b~c"));
        assert_eq!(navigate_fragment(&root, &pointer), Some(&json!(1)));
    }
}
