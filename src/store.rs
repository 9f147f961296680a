//! Document store: the primary document's bundles, addressed by id.

use indexmap::IndexMap;
use regex::Regex;
use serde_json::Value;

use crate::document::Document;
use crate::loader::navigate_fragment;

/// Registered schema bundles, keyed by bundle id.
///
/// The store is read-only once populated and may be shared across threads.
#[derive(Debug, Clone, Default)]
pub struct DocumentStore {
    bundles: IndexMap<String, Document>,
}

impl DocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a bundle under `id`. A later registration under the same id
    /// replaces the earlier one.
    pub fn register(&mut self, id: impl Into<String>, document: Document) {
        let id = id.into();
        let document = document.with_id(id.clone());
        self.bundles.insert(id, document);
    }

    pub fn bundle(&self, id: &str) -> Option<&Document> {
        self.bundles.get(id)
    }

    pub fn bundles(&self) -> impl Iterator<Item = &Document> {
        self.bundles.values()
    }

    /// Look up a reference.
    ///
    /// A reference without a bundle prefix (or whose prefix is the context
    /// document's own id) resolves against `context`; otherwise against the
    /// bundle registered under the prefix. Returns the document the node was
    /// found in together with the node, or `None` when nothing matches.
    pub fn lookup<'s>(
        &'s self,
        reference: &str,
        context: &'s Document,
    ) -> Option<(&'s Document, &'s Value)> {
        let (prefix, fragment) = split_reference(reference);
        let document = match prefix {
            None => context,
            Some(id) if context.id() == Some(id) => context,
            Some(id) => self.bundles.get(id)?,
        };
        navigate_fragment(document.root(), fragment).map(|node| (document, node))
    }

    /// Title of the module that declares a named schema titled `title`.
    ///
    /// Searches the context document's schemas, then its `x-schemas` groups,
    /// then registered bundles in registration order.
    pub fn owning_module<'s>(&'s self, title: &str, context: &'s Document) -> Option<&'s str> {
        if context.declares(title) {
            return Some(context.title());
        }
        for (group, schemas) in context.schema_groups() {
            let found = schemas.iter().any(|(name, schema)| {
                name == title || schema.get("title").and_then(Value::as_str) == Some(title)
            });
            if found {
                return Some(group);
            }
        }
        self.bundles
            .values()
            .find(|bundle| bundle.declares(title))
            .map(Document::title)
    }

    /// Schema of the property at a dotted path such as `"captions.size"`.
    ///
    /// References are followed, and an `allOf` is searched part by part.
    /// Within an object a segment matches `properties`, then a matching
    /// `patternProperties` key, then an `additionalProperties` schema. An
    /// empty segment stops at the current node.
    pub fn property_schema<'s>(
        &'s self,
        schema: &'s Value,
        path: &str,
        context: &'s Document,
    ) -> Option<(&'s Document, &'s Value)> {
        let segments: Vec<&str> = path.split('.').collect();
        self.descend(schema, &segments, context)
    }

    /// Property names of an object schema: its `properties` keys followed by
    /// the names listed in `propertyNames`. `None` when the schema (after
    /// following references) is not an object.
    pub fn properties_in_schema(&self, schema: &Value, context: &Document) -> Option<Vec<String>> {
        let (_, node) = self.follow(schema, context)?;
        if !is_object_type(node) {
            return None;
        }

        let mut names: Vec<String> = node
            .get("properties")
            .and_then(Value::as_object)
            .map(|properties| properties.keys().cloned().collect())
            .unwrap_or_default();
        let listed = match node.get("propertyNames") {
            Some(Value::Array(list)) => Some(list),
            Some(Value::Object(constraint)) => constraint.get("enum").and_then(Value::as_array),
            _ => None,
        };
        for name in listed.into_iter().flatten().filter_map(Value::as_str) {
            if !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }
        Some(names)
    }

    fn descend<'s>(
        &'s self,
        schema: &'s Value,
        segments: &[&str],
        context: &'s Document,
    ) -> Option<(&'s Document, &'s Value)> {
        let (mut doc, mut node) = self.follow(schema, context)?;
        for (i, segment) in segments.iter().enumerate() {
            if segment.is_empty() {
                return Some((doc, node));
            }
            if is_object_type(node) {
                (doc, node) = self.follow(child_schema(node, segment)?, doc)?;
            } else if let Some(Value::Array(parts)) = node.get("allOf") {
                return parts
                    .iter()
                    .find_map(|part| self.descend(part, &segments[i..], doc));
            } else {
                return None;
            }
        }
        Some((doc, node))
    }

    /// Follow a chain of references to a concrete node. `None` when a
    /// reference is missing or the chain loops.
    fn follow<'s>(
        &'s self,
        schema: &'s Value,
        context: &'s Document,
    ) -> Option<(&'s Document, &'s Value)> {
        let mut seen: Vec<&Value> = Vec::new();
        let (mut doc, mut node) = (context, schema);
        while let Some(reference) = node.get("$ref").and_then(Value::as_str) {
            if seen.iter().any(|n| std::ptr::eq(*n, node)) {
                return None;
            }
            seen.push(node);
            (doc, node) = self.lookup(reference, doc)?;
        }
        Some((doc, node))
    }
}

/// `type` is `"object"` or a list containing it.
fn is_object_type(node: &Value) -> bool {
    match node.get("type") {
        Some(Value::String(t)) => t == "object",
        Some(Value::Array(types)) => types.iter().any(|t| t == "object"),
        _ => false,
    }
}

fn child_schema<'v>(node: &'v Value, name: &str) -> Option<&'v Value> {
    if let Some(property) = node.get("properties").and_then(|p| p.get(name)) {
        return Some(property);
    }
    let pattern_match = node
        .get("patternProperties")
        .and_then(Value::as_object)
        .and_then(|patterns| {
            patterns.iter().find_map(|(pattern, schema)| {
                Regex::new(pattern)
                    .ok()
                    .filter(|re| re.is_match(name))
                    .map(|_| schema)
            })
        });
    if pattern_match.is_some() {
        return pattern_match;
    }
    node.get("additionalProperties").filter(|a| a.is_object())
}

/// Split a reference into its optional bundle id and its fragment.
///
/// `"https://x/types#/definitions/A"` → `(Some("https://x/types"), "#/definitions/A")`;
/// `"#/definitions/A"` → `(None, "#/definitions/A")`.
pub fn split_reference(reference: &str) -> (Option<&str>, &str) {
    match reference.find('#') {
        Some(0) => (None, reference),
        Some(idx) => (Some(&reference[..idx]), &reference[idx..]),
        None => (Some(reference), "#"),
    }
}

/// Last pointer segment of a reference: the referenced schema's name.
pub fn reference_name(reference: &str) -> &str {
    let (_, fragment) = split_reference(reference);
    fragment.rsplit('/').next().unwrap_or(fragment)
}
