//! Language profiles.
//!
//! A profile maps each primitive to a type name and each structural kind to a
//! template with `${...}` placeholders. The projector fills templates; it
//! never looks inside them.
//!
//! # Placeholders
//!
//! | Template | Placeholders |
//! |----------|--------------|
//! | `array` | `${type}` |
//! | `tuple`, `union` | `${types}` (joined with the matching separator) |
//! | `map` | `${key}`, `${type}` |
//! | `qualified` | `${module}`, `${type}` |
//! | `literal` | `${value}` (JSON text) |
//! | `object` | `${fields}` (joined with `fieldSeparator`) |
//! | `field`, `optionalField` | `${name}`, `${type}` |

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ResolveError;
use crate::loader::load_schema;
use crate::types::Primitive;

/// Structural kinds a profile supplies a template for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TemplateKind {
    Array,
    Tuple,
    TupleSeparator,
    Union,
    UnionSeparator,
    Map,
    Qualified,
    Literal,
    Object,
    Field,
    OptionalField,
    FieldSeparator,
    Void,
    Any,
    Never,
}

impl TemplateKind {
    pub const ALL: [TemplateKind; 15] = [
        TemplateKind::Array,
        TemplateKind::Tuple,
        TemplateKind::TupleSeparator,
        TemplateKind::Union,
        TemplateKind::UnionSeparator,
        TemplateKind::Map,
        TemplateKind::Qualified,
        TemplateKind::Literal,
        TemplateKind::Object,
        TemplateKind::Field,
        TemplateKind::OptionalField,
        TemplateKind::FieldSeparator,
        TemplateKind::Void,
        TemplateKind::Any,
        TemplateKind::Never,
    ];

    /// TypeScript template, used when a profile leaves a kind out.
    pub fn default_template(&self) -> &'static str {
        match self {
            TemplateKind::Array => "${type}[]",
            TemplateKind::Tuple => "[${types}]",
            TemplateKind::TupleSeparator => ", ",
            TemplateKind::Union => "${types}",
            TemplateKind::UnionSeparator => " | ",
            TemplateKind::Map => "{ [key: ${key}]: ${type} }",
            TemplateKind::Qualified => "${module}.${type}",
            TemplateKind::Literal => "${value}",
            TemplateKind::Object => "{ ${fields} }",
            TemplateKind::Field => "${name}: ${type}",
            TemplateKind::OptionalField => "${name}?: ${type}",
            TemplateKind::FieldSeparator => ", ",
            TemplateKind::Void => "void",
            TemplateKind::Any => "any",
            TemplateKind::Never => "never",
        }
    }
}

/// Rendering primitives of a target language.
pub trait LanguageProfile: Send + Sync {
    /// Type name of a primitive.
    fn primitive(&self, primitive: Primitive) -> &str;

    /// Template for a structural kind.
    fn template(&self, kind: TemplateKind) -> &str;

    /// Whether the language has positional tuple types.
    fn supports_tuples(&self) -> bool;

    /// Whether the language has union types. Without them, unions are
    /// collapsed by the unifier.
    fn supports_unions(&self) -> bool;
}

/// A table-driven [`LanguageProfile`], loadable from JSON.
///
/// ```json
/// {
///   "name": "kotlin",
///   "primitives": { "integer": "Long", "string": "String" },
///   "templates": { "array": "List<${type}>" },
///   "tuples": false,
///   "unions": false
/// }
/// ```
///
/// Missing primitives fall back to their JSON Schema names and missing
/// templates to the TypeScript ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Profile {
    pub name: String,
    pub primitives: BTreeMap<Primitive, String>,
    pub templates: BTreeMap<TemplateKind, String>,
    pub tuples: bool,
    pub unions: bool,
}

impl Default for Profile {
    fn default() -> Self {
        Self::typescript()
    }
}

impl Profile {
    /// Built-in TypeScript profile.
    pub fn typescript() -> Self {
        let primitives = [
            (Primitive::String, "string"),
            (Primitive::Number, "number"),
            (Primitive::Integer, "number"),
            (Primitive::Boolean, "boolean"),
            (Primitive::Null, "null"),
        ]
        .into_iter()
        .map(|(p, name)| (p, name.to_string()))
        .collect();
        let templates = TemplateKind::ALL
            .iter()
            .map(|kind| (*kind, kind.default_template().to_string()))
            .collect();

        Self {
            name: "typescript".into(),
            primitives,
            templates,
            tuples: true,
            unions: true,
        }
    }

    /// Parse a profile from JSON.
    ///
    /// # Errors
    ///
    /// Returns `ResolveError::InvalidDocument` if the JSON is not a profile.
    pub fn from_json(value: serde_json::Value) -> Result<Self, ResolveError> {
        serde_json::from_value(value).map_err(|e| ResolveError::InvalidDocument {
            message: format!("invalid profile: {}", e),
        })
    }

    /// Load a profile from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be read, or
    /// `ResolveError::InvalidDocument` if it is not a profile.
    pub fn load(path: &Path) -> Result<Self, ResolveError> {
        Self::from_json(load_schema(path)?)
    }
}

impl LanguageProfile for Profile {
    fn primitive(&self, primitive: Primitive) -> &str {
        self.primitives
            .get(&primitive)
            .map(String::as_str)
            .unwrap_or(primitive.as_str())
    }

    fn template(&self, kind: TemplateKind) -> &str {
        self.templates
            .get(&kind)
            .map(String::as_str)
            .unwrap_or(kind.default_template())
    }

    fn supports_tuples(&self) -> bool {
        self.tuples
    }

    fn supports_unions(&self) -> bool {
        self.unions
    }
}

/// Substitute `${key}` placeholders.
pub fn fill(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (key, value) in values {
        out = out.replace(&format!("${{{}}}", key), value);
    }
    out
}
