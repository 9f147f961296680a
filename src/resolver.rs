//! Reference dereferencing.
//!
//! Inlines `$ref` occurrences, switching resolution context when descending
//! into content inlined from another bundle. Recursive references are left in
//! place so they can be rendered as named types.

use serde_json::{Map, Value};
use tracing::debug;

use crate::document::Document;
use crate::error::ResolveError;
use crate::loader::escape_segment;
use crate::promote::registry_ref;
use crate::store::{reference_name, split_reference, DocumentStore};
use crate::types::DerefOptions;

/// Marker left in place of a recursive `$ref` while the walk is in progress.
const UNRESOLVED_KEY: &str = "$unresolved";

/// Keywords whose values are instance data, not schemas.
const DATA_KEYWORDS: &[&str] = &["examples", "default", "const", "enum"];

/// A reference deliberately left unresolved to break a cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedRef {
    /// JSON pointer of the reference node in the resolved output.
    pub path: String,
    /// Canonical reference: local (`#/...`) when it targets the context
    /// document, bundle-qualified otherwise.
    pub reference: String,
}

/// Output of [`Dereferencer::resolve`].
#[derive(Debug, Clone)]
pub struct Resolved {
    pub schema: Value,
    pub unresolved: Vec<UnresolvedRef>,
    /// Schemas copied out of other documents when
    /// [`DerefOptions::localize_external`] is set, keyed by name.
    pub components: Map<String, Value>,
}

/// Resolves references against a [`DocumentStore`].
#[derive(Debug, Clone, Copy)]
pub struct Dereferencer<'a> {
    store: &'a DocumentStore,
    options: DerefOptions,
}

impl<'a> Dereferencer<'a> {
    pub fn new(store: &'a DocumentStore) -> Self {
        Self {
            store,
            options: DerefOptions::default(),
        }
    }

    pub fn with_options(mut self, options: DerefOptions) -> Self {
        self.options = options;
        self
    }

    /// Resolve every reference in a copy of `node`.
    ///
    /// # Errors
    ///
    /// Returns `ResolveError::UnresolvedReference` when a reference matches
    /// no registered document or path.
    pub fn resolve(&self, node: &Value, context: &Document) -> Result<Resolved, ResolveError> {
        self.resolve_at(node, context, "#")
    }

    /// Like [`resolve`](Self::resolve), with `path` locating `node` inside
    /// `context` for error messages and unresolved paths.
    pub fn resolve_at(
        &self,
        node: &Value,
        context: &Document,
        path: &str,
    ) -> Result<Resolved, ResolveError> {
        let mut schema = node.clone();
        let mut walk = Walk {
            store: self.store,
            options: self.options,
            context,
            expanding: Vec::new(),
            named: Vec::new(),
            unresolved: Vec::new(),
            components: Map::new(),
        };
        walk.walk(&mut schema, context, path)?;
        restore_markers(&mut schema);

        let mut components = walk.components;
        for component in components.values_mut() {
            restore_markers(component);
        }

        Ok(Resolved {
            schema,
            unresolved: walk.unresolved,
            components,
        })
    }

    /// Localize a whole document: every reference into another document is
    /// rewritten to `#/components/schemas/<name>` and the referenced schema
    /// is copied there. References local to the document are kept, as are
    /// components the document already declares.
    ///
    /// # Errors
    ///
    /// Same as [`resolve`](Self::resolve).
    pub fn localize(&self, document: &Document) -> Result<Value, ResolveError> {
        let options = self.options.external_only(true).localize_external(true);
        let resolved = Dereferencer {
            store: self.store,
            options,
        }
        .resolve(document.root(), document)?;

        let mut root = resolved.schema;
        insert_components(&mut root, resolved.components);
        Ok(root)
    }
}

struct Walk<'s> {
    store: &'s DocumentStore,
    options: DerefOptions,
    context: &'s Document,
    /// Canonical references currently being expanded.
    expanding: Vec<String>,
    /// Canonical references of the enclosing named schemas.
    named: Vec<String>,
    unresolved: Vec<UnresolvedRef>,
    components: Map<String, Value>,
}

impl<'s> Walk<'s> {
    fn walk(&mut self, value: &mut Value, doc: &'s Document, path: &str) -> Result<(), ResolveError> {
        match value {
            Value::Object(obj) => {
                if let Some(reference) = obj.get("$ref").and_then(Value::as_str) {
                    let reference = reference.to_string();
                    return self.substitute(value, &reference, doc, path);
                }

                // a node titled like one of its document's named schemas is that schema
                let named = obj
                    .get("title")
                    .and_then(Value::as_str)
                    .and_then(|title| doc.named_pointer(title))
                    .map(|pointer| self.canonical_key(doc, &pointer));
                if let Some(key) = &named {
                    self.named.push(key.clone());
                }
                let result = self.walk_keywords(obj, doc, path);
                if named.is_some() {
                    self.named.pop();
                }
                result?;
            }
            Value::Array(items) => {
                for (i, item) in items.iter_mut().enumerate() {
                    self.walk(item, doc, &format!("{}/{}", path, i))?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn walk_keywords(
        &mut self,
        obj: &mut Map<String, Value>,
        doc: &'s Document,
        path: &str,
    ) -> Result<(), ResolveError> {
        for (key, child) in obj.iter_mut() {
            if key == "$ref" || DATA_KEYWORDS.contains(&key.as_str()) {
                continue;
            }
            let child_path = format!("{}/{}", path, escape_segment(key));
            self.walk(child, doc, &child_path)?;
        }
        Ok(())
    }

    fn substitute(
        &mut self,
        value: &mut Value,
        reference: &str,
        doc: &'s Document,
        path: &str,
    ) -> Result<(), ResolveError> {
        let Some((target_doc, target)) = self.store.lookup(reference, doc) else {
            return Err(ResolveError::UnresolvedReference {
                document: doc.title().to_string(),
                path: path.to_string(),
                reference: reference.to_string(),
            });
        };

        let Value::Object(obj) = value else {
            return Ok(());
        };
        // siblings belong to the referencing document
        self.walk_keywords(obj, doc, path)?;

        let is_context = std::ptr::eq(target_doc, self.context);
        if self.options.external_only && is_context {
            return Ok(());
        }

        let (_, fragment) = split_reference(reference);
        let key = self.canonical_key(target_doc, fragment);

        if self.options.localize_external && !is_context {
            let name = if fragment == "#" {
                target_doc.title()
            } else {
                reference_name(fragment)
            };
            return self.localize(obj, name.to_string(), key, target_doc, target);
        }

        let recursive =
            fragment == "#" || self.expanding.contains(&key) || self.named.contains(&key);
        if recursive {
            debug!(reference = %key, path, "leaving recursive reference unresolved");
            obj.remove("$ref");
            obj.insert(UNRESOLVED_KEY.to_string(), Value::String(key.clone()));
            self.unresolved.push(UnresolvedRef {
                path: path.to_string(),
                reference: key,
            });
            return Ok(());
        }

        let mut expanded = target.clone();
        self.expanding.push(key);
        let result = self.walk(&mut expanded, target_doc, path);
        self.expanding.pop();
        result?;

        obj.remove("$ref");
        match expanded {
            Value::Object(resolved) => overlay(obj, resolved),
            other => {
                if obj.is_empty() {
                    *value = other;
                }
            }
        }
        Ok(())
    }

    /// Point the reference at `components.schemas` and copy its target
    /// there, once per name.
    fn localize(
        &mut self,
        obj: &mut Map<String, Value>,
        name: String,
        key: String,
        target_doc: &'s Document,
        target: &Value,
    ) -> Result<(), ResolveError> {
        let local = registry_ref(&name);
        obj.insert("$ref".to_string(), Value::String(local.clone()));
        if self.components.contains_key(&name) || self.expanding.contains(&key) {
            return Ok(());
        }

        let mut copied = target.clone();
        self.expanding.push(key.clone());
        let result = self.walk(&mut copied, target_doc, &local);
        self.expanding.pop();
        result?;

        debug!(name = %name, reference = %key, "localized external schema");
        self.components.insert(name, copied);
        Ok(())
    }

    /// Reference key of `fragment` in `doc`: bare for the context document,
    /// bundle-qualified otherwise.
    fn canonical_key(&self, doc: &Document, fragment: &str) -> String {
        if std::ptr::eq(doc, self.context) {
            fragment.to_string()
        } else {
            format!("{}{}", doc.id().unwrap_or_default(), fragment)
        }
    }
}

/// Merge the target of a `$ref` into the referencing node. Sibling keywords
/// win, except that `properties` merge (sibling entries override) and
/// `required` lists are joined.
fn overlay(obj: &mut Map<String, Value>, resolved: Map<String, Value>) {
    for (key, target) in resolved {
        let Some(sibling) = obj.get_mut(&key) else {
            obj.insert(key, target);
            continue;
        };
        match (key.as_str(), sibling, target) {
            ("properties", Value::Object(mine), Value::Object(mut merged)) => {
                for (name, schema) in std::mem::take(mine) {
                    merged.insert(name, schema);
                }
                *mine = merged;
            }
            ("required", Value::Array(mine), Value::Array(mut merged)) => {
                for name in std::mem::take(mine) {
                    if !merged.contains(&name) {
                        merged.push(name);
                    }
                }
                *mine = merged;
            }
            _ => {}
        }
    }
}

/// Add localized schemas to `components.schemas` without replacing any the
/// document declares.
fn insert_components(root: &mut Value, localized: Map<String, Value>) {
    if localized.is_empty() {
        return;
    }
    let Some(root) = root.as_object_mut() else {
        return;
    };
    let components = root
        .entry("components")
        .or_insert_with(|| Value::Object(Map::new()));
    let Some(components) = components.as_object_mut() else {
        return;
    };
    let schemas = components
        .entry("schemas")
        .or_insert_with(|| Value::Object(Map::new()));
    let Some(schemas) = schemas.as_object_mut() else {
        return;
    };
    for (name, schema) in localized {
        schemas.entry(name).or_insert(schema);
    }
}

/// Turn cycle markers back into `$ref`s.
fn restore_markers(value: &mut Value) {
    match value {
        Value::Object(obj) => {
            if let Some(reference) = obj.remove(UNRESOLVED_KEY) {
                obj.insert("$ref".to_string(), reference);
            }
            for child in obj.values_mut() {
                restore_markers(child);
            }
        }
        Value::Array(items) => {
            for item in items {
                restore_markers(item);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const TYPES_ID: &str = "https://example.com/types";

    fn store() -> DocumentStore {
        let mut store = DocumentStore::new();
        let types = Document::from_value(json!({
            "$id": TYPES_ID,
            "title": "Types",
            "definitions": {
                "SemanticVersion": {
                    "type": "object",
                    "properties": {
                        "major": { "$ref": "#/definitions/Number" },
                        "readable": { "type": "string" }
                    }
                },
                "Number": { "type": "integer", "minimum": 0 },
                "Name": { "type": "string" },
                "Settings": {
                    "type": "object",
                    "properties": { "a": { "type": "string" } },
                    "required": ["a"]
                },
                "Tree": {
                    "type": "object",
                    "properties": {
                        "children": { "type": "array", "items": { "$ref": "#/definitions/Tree" } }
                    }
                }
            }
        }))
        .unwrap();
        store.register(TYPES_ID, types);
        store
    }

    fn module(schemas: Value) -> Document {
        Document::from_value(json!({
            "info": { "title": "Device" },
            "components": { "schemas": schemas }
        }))
        .unwrap()
    }

    #[test]
    fn inlines_local_refs() {
        let store = store();
        let doc = module(json!({ "Id": { "type": "string" } }));
        let node = json!({ "type": "array", "items": { "$ref": "#/components/schemas/Id" } });

        let resolved = Dereferencer::new(&store).resolve(&node, &doc).unwrap();
        assert_eq!(resolved.schema["items"]["type"], "string");
        assert_eq!(resolved.schema["items"]["title"], "Id");
        assert!(resolved.unresolved.is_empty());
    }

    #[test]
    fn external_content_resolves_against_its_bundle() {
        let store = store();
        let doc = module(json!({}));
        let node = json!({ "$ref": format!("{}#/definitions/SemanticVersion", TYPES_ID) });

        let resolved = Dereferencer::new(&store).resolve(&node, &doc).unwrap();
        let major = &resolved.schema["properties"]["major"];
        assert_eq!(major["type"], "integer");
        assert_eq!(major["minimum"], 0);
    }

    #[test]
    fn siblings_overlay_target() {
        let store = store();
        let doc = module(json!({ "Id": { "type": "string", "description": "original" } }));
        let node = json!({
            "$ref": "#/components/schemas/Id",
            "description": "override",
            "examples": ["abc"]
        });

        let resolved = Dereferencer::new(&store).resolve(&node, &doc).unwrap();
        assert_eq!(resolved.schema["description"], "override");
        assert_eq!(resolved.schema["examples"], json!(["abc"]));
        assert_eq!(resolved.schema["type"], "string");
    }

    #[test]
    fn sibling_keywords_are_resolved_and_merged() {
        let store = store();
        let doc = module(json!({
            "Id": { "type": "string" },
            "Base": {
                "type": "object",
                "properties": { "a": { "type": "integer" } },
                "required": ["a"]
            }
        }));
        let node = json!({
            "$ref": "#/components/schemas/Base",
            "properties": { "id": { "$ref": "#/components/schemas/Id" } },
            "required": ["id"]
        });

        let resolved = Dereferencer::new(&store).resolve(&node, &doc).unwrap();
        let properties = resolved.schema["properties"].as_object().unwrap();
        let names: Vec<&str> = properties.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["a", "id"]);
        assert_eq!(properties["id"]["type"], "string");
        assert_eq!(resolved.schema["required"], json!(["a", "id"]));
        assert_eq!(resolved.schema["title"], "Base");
    }

    #[test]
    fn extension_with_the_same_title_inlines_its_base() {
        let store = store();
        let doc = module(json!({
            "Settings": {
                "allOf": [
                    { "$ref": format!("{}#/definitions/Settings", TYPES_ID) },
                    { "type": "object", "properties": { "b": { "type": "boolean" } } }
                ]
            }
        }));
        let settings = doc.root().pointer("/components/schemas/Settings").unwrap().clone();

        let resolved = Dereferencer::new(&store)
            .resolve_at(&settings, &doc, "#/components/schemas/Settings")
            .unwrap();
        assert!(resolved.unresolved.is_empty());
        assert_eq!(resolved.schema["allOf"][0]["properties"]["a"]["type"], "string");
        assert_eq!(resolved.schema["allOf"][1]["properties"]["b"]["type"], "boolean");
    }

    #[test]
    fn inline_title_shared_with_a_bundle_schema_is_not_a_cycle() {
        let store = store();
        let doc = module(json!({}));
        let node = json!({
            "title": "Name",
            "type": "object",
            "properties": { "value": { "$ref": format!("{}#/definitions/Name", TYPES_ID) } }
        });

        let resolved = Dereferencer::new(&store).resolve(&node, &doc).unwrap();
        assert!(resolved.unresolved.is_empty());
        assert_eq!(resolved.schema["properties"]["value"]["type"], "string");
    }

    #[test]
    fn self_reference_is_left_as_qualified_ref() {
        let store = store();
        let doc = module(json!({}));
        let node = json!({ "$ref": format!("{}#/definitions/Tree", TYPES_ID) });

        let resolved = Dereferencer::new(&store).resolve(&node, &doc).unwrap();
        let items = &resolved.schema["properties"]["children"]["items"];
        assert_eq!(
            items,
            &json!({ "$ref": format!("{}#/definitions/Tree", TYPES_ID) })
        );
        assert_eq!(resolved.unresolved.len(), 1);
        assert_eq!(resolved.unresolved[0].path, "#/properties/children/items");
    }

    #[test]
    fn mutual_recursion_terminates() {
        let store = store();
        let doc = module(json!({
            "A": { "type": "object", "properties": { "b": { "$ref": "#/components/schemas/B" } } },
            "B": { "type": "object", "properties": { "a": { "$ref": "#/components/schemas/A" } } }
        }));
        let a = doc.root().pointer("/components/schemas/A").unwrap().clone();

        let resolved = Dereferencer::new(&store)
            .resolve_at(&a, &doc, "#/components/schemas/A")
            .unwrap();
        assert_eq!(resolved.schema["properties"]["b"]["title"], "B");
        assert_eq!(
            resolved.schema["properties"]["b"]["properties"]["a"],
            json!({ "$ref": "#/components/schemas/A" })
        );
    }

    #[test]
    fn resolving_twice_is_idempotent() {
        let store = store();
        let doc = module(json!({
            "Node": {
                "type": "object",
                "properties": {
                    "next": { "$ref": "#/components/schemas/Node" },
                    "id": { "$ref": "#/components/schemas/Id" }
                }
            },
            "Id": { "type": "string" }
        }));
        let node = json!({ "$ref": "#/components/schemas/Node" });
        let deref = Dereferencer::new(&store);

        let once = deref.resolve(&node, &doc).unwrap().schema;
        let twice = deref.resolve(&once, &doc).unwrap().schema;
        assert_eq!(once, twice);
    }

    #[test]
    fn missing_reference_is_an_error() {
        let store = store();
        let doc = module(json!({}));
        let node = json!({ "properties": { "x": { "$ref": "#/components/schemas/Missing" } } });

        let err = Dereferencer::new(&store).resolve(&node, &doc).unwrap_err();
        match err {
            ResolveError::UnresolvedReference {
                document,
                path,
                reference,
            } => {
                assert_eq!(document, "Device");
                assert_eq!(path, "#/properties/x");
                assert_eq!(reference, "#/components/schemas/Missing");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn external_only_keeps_local_refs() {
        let store = store();
        let doc = module(json!({ "Id": { "type": "string" } }));
        let node = json!({
            "properties": {
                "id": { "$ref": "#/components/schemas/Id" },
                "version": { "$ref": format!("{}#/definitions/Number", TYPES_ID) }
            }
        });

        let resolved = Dereferencer::new(&store)
            .with_options(DerefOptions::default().external_only(true))
            .resolve(&node, &doc)
            .unwrap();
        assert_eq!(
            resolved.schema["properties"]["id"],
            json!({ "$ref": "#/components/schemas/Id" })
        );
        assert_eq!(resolved.schema["properties"]["version"]["type"], "integer");
    }

    #[test]
    fn localized_external_refs_point_at_components() {
        let store = store();
        let doc = module(json!({ "Id": { "type": "string" } }));
        let node = json!({
            "properties": {
                "id": { "$ref": "#/components/schemas/Id" },
                "version": { "$ref": format!("{}#/definitions/SemanticVersion", TYPES_ID) }
            }
        });

        let resolved = Dereferencer::new(&store)
            .with_options(DerefOptions::default().external_only(true).localize_external(true))
            .resolve(&node, &doc)
            .unwrap();
        assert_eq!(
            resolved.schema["properties"]["id"],
            json!({ "$ref": "#/components/schemas/Id" })
        );
        assert_eq!(
            resolved.schema["properties"]["version"],
            json!({ "$ref": "#/components/schemas/SemanticVersion" })
        );

        let names: Vec<&str> = resolved.components.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["Number", "SemanticVersion"]);
        assert_eq!(
            resolved.components["SemanticVersion"]["properties"]["major"],
            json!({ "$ref": "#/components/schemas/Number" })
        );
        assert_eq!(resolved.components["Number"]["type"], "integer");
    }

    #[test]
    fn localizing_a_document_keeps_recursive_bundle_schemas_nominal() {
        let store = store();
        let doc = Document::from_value(json!({
            "info": { "title": "Device" },
            "methods": [
                {
                    "name": "tree",
                    "params": [],
                    "result": { "name": "tree", "schema": { "$ref": format!("{}#/definitions/Tree", TYPES_ID) } }
                }
            ],
            "components": { "schemas": { "Id": { "type": "string" } } }
        }))
        .unwrap();

        let root = Dereferencer::new(&store).localize(&doc).unwrap();
        assert_eq!(
            root["methods"][0]["result"]["schema"],
            json!({ "$ref": "#/components/schemas/Tree" })
        );
        let schemas = &root["components"]["schemas"];
        assert_eq!(schemas["Id"]["type"], "string");
        assert_eq!(
            schemas["Tree"]["properties"]["children"]["items"],
            json!({ "$ref": "#/components/schemas/Tree" })
        );
    }

    #[test]
    fn examples_are_not_scanned() {
        let store = store();
        let doc = module(json!({}));
        let node = json!({ "type": "object", "examples": [{ "$ref": "not-a-schema" }] });

        let resolved = Dereferencer::new(&store).resolve(&node, &doc).unwrap();
        assert_eq!(resolved.schema, node);
    }
}
