//! OpenRPC modules and schema bundles.

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::ResolveError;
use crate::loader::escape_segment;

/// Containers that hold named schemas, as JSON pointer prefixes.
pub const SCHEMA_CONTAINERS: &[&str] = &["#/components/schemas", "#/definitions"];

/// An immutable input document: an OpenRPC module or a schema bundle.
#[derive(Debug, Clone)]
pub struct Document {
    id: Option<String>,
    title: String,
    root: Value,
}

/// An OpenRPC method declaration.
#[derive(Debug, Clone, Deserialize)]
pub struct Method {
    pub name: String,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub params: Vec<ContentDescriptor>,
    #[serde(default)]
    pub result: Option<ContentDescriptor>,
    #[serde(default)]
    pub tags: Vec<Tag>,
}

/// A named, schema-typed method parameter or result.
#[derive(Debug, Clone, Deserialize)]
pub struct ContentDescriptor {
    pub name: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub schema: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Tag {
    pub name: String,
}

impl Method {
    /// Event methods deliver their result through a subscription.
    pub fn is_event(&self) -> bool {
        self.tags.iter().any(|t| t.name == "event")
    }
}

impl Document {
    /// Build a document from parsed JSON.
    ///
    /// The id comes from `$id`; the title from `info.title`, then `title`,
    /// then the id. Named schemas without a `title` get their key as title.
    ///
    /// # Errors
    ///
    /// Returns `ResolveError::InvalidDocument` if the value is not an object
    /// or has no usable title.
    pub fn from_value(mut root: Value) -> Result<Self, ResolveError> {
        if !root.is_object() {
            return Err(ResolveError::InvalidDocument {
                message: "document must be a JSON object".into(),
            });
        }

        let id = root.get("$id").and_then(Value::as_str).map(String::from);
        let title = root
            .pointer("/info/title")
            .or_else(|| root.get("title"))
            .and_then(Value::as_str)
            .map(String::from)
            .or_else(|| id.clone())
            .ok_or_else(|| ResolveError::InvalidDocument {
                message: "document has no info.title, title or $id".into(),
            })?;

        add_missing_titles(&mut root);

        Ok(Self { id, title, root })
    }

    /// Override the id the document is addressed by.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn root(&self) -> &Value {
        &self.root
    }

    /// Named schemas as `(name, pointer, schema)` in document order.
    pub fn named_schemas(&self) -> Vec<(String, String, &Value)> {
        let mut out = Vec::new();
        for container in SCHEMA_CONTAINERS {
            if let Some(Value::Object(map)) = crate::loader::navigate_fragment(&self.root, container)
            {
                for (name, schema) in map {
                    let pointer = format!("{}/{}", container, escape_segment(name));
                    out.push((name.clone(), pointer, schema));
                }
            }
        }
        out
    }

    /// Pointer of the named schema `name`, if declared.
    pub fn schema_pointer(&self, name: &str) -> Option<String> {
        self.named_schemas()
            .into_iter()
            .find(|(n, _, _)| n == name)
            .map(|(_, pointer, _)| pointer)
    }

    /// Whether a named schema with this title (or key) is declared here.
    pub fn declares(&self, title: &str) -> bool {
        self.named_pointer(title).is_some()
    }

    /// Pointer of the named schema whose key or title is `title`.
    pub fn named_pointer(&self, title: &str) -> Option<String> {
        self.named_schemas()
            .into_iter()
            .find(|(name, _, schema)| name == title || schema_title(schema) == Some(title))
            .map(|(_, pointer, _)| pointer)
    }

    /// Method declarations with their index in `methods`.
    ///
    /// # Errors
    ///
    /// Returns `ResolveError::InvalidDocument` if a method is not shaped like
    /// an OpenRPC method object.
    pub fn methods(&self) -> Result<Vec<(usize, Method)>, ResolveError> {
        let Some(Value::Array(methods)) = self.root.get("methods") else {
            return Ok(Vec::new());
        };
        methods
            .iter()
            .enumerate()
            .map(|(i, m)| {
                Method::deserialize(m)
                    .map(|method| (i, method))
                    .map_err(|e| ResolveError::InvalidDocument {
                        message: format!("{}: method {}: {}", self.title, i, e),
                    })
            })
            .collect()
    }

    /// `x-schemas` groups: `(group title, schemas)`.
    pub fn schema_groups(&self) -> Vec<(&str, &Map<String, Value>)> {
        match self.root.get("x-schemas") {
            Some(Value::Object(groups)) => groups
                .iter()
                .filter_map(|(name, group)| group.as_object().map(|g| (name.as_str(), g)))
                .collect(),
            _ => Vec::new(),
        }
    }
}

fn schema_title(schema: &Value) -> Option<&str> {
    schema.get("title").and_then(Value::as_str)
}

fn add_missing_titles(root: &mut Value) {
    for container in ["/components/schemas", "/definitions"] {
        if let Some(Value::Object(map)) = root.pointer_mut(container) {
            for (name, schema) in map.iter_mut() {
                if let Value::Object(schema) = schema {
                    schema
                        .entry("title")
                        .or_insert_with(|| Value::String(name.clone()));
                }
            }
        }
    }
}
