//! Core types shared by the resolution pipeline.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Returns the JSON type name for error messages.
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// JSON Schema primitive types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Primitive {
    String,
    Number,
    Integer,
    Boolean,
    Null,
}

impl Primitive {
    /// Parse a `type` keyword value.
    ///
    /// Returns `None` for `object`, `array` and unknown names.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "string" => Some(Primitive::String),
            "number" => Some(Primitive::Number),
            "integer" => Some(Primitive::Integer),
            "boolean" => Some(Primitive::Boolean),
            "null" => Some(Primitive::Null),
            _ => None,
        }
    }

    /// The `type` keyword value for this primitive.
    pub fn as_str(&self) -> &'static str {
        match self {
            Primitive::String => "string",
            Primitive::Number => "number",
            Primitive::Integer => "integer",
            Primitive::Boolean => "boolean",
            Primitive::Null => "null",
        }
    }

    /// Primitive type of a literal JSON value, if it has one.
    pub fn of_value(value: &Value) -> Option<Self> {
        match value {
            Value::Null => Some(Primitive::Null),
            Value::Bool(_) => Some(Primitive::Boolean),
            Value::String(_) => Some(Primitive::String),
            Value::Number(n) if n.is_i64() || n.is_u64() => Some(Primitive::Integer),
            Value::Number(_) => Some(Primitive::Number),
            _ => None,
        }
    }

    /// Whether a literal value is an instance of this primitive.
    pub fn admits(&self, value: &Value) -> bool {
        match (self, value) {
            (Primitive::Null, Value::Null) => true,
            (Primitive::Boolean, Value::Bool(_)) => true,
            (Primitive::String, Value::String(_)) => true,
            (Primitive::Number, Value::Number(_)) => true,
            (Primitive::Integer, Value::Number(n)) => {
                n.is_i64() || n.is_u64() || n.as_f64().is_some_and(|f| f.fract() == 0.0)
            }
            _ => false,
        }
    }
}

/// How a list of schemas is combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    /// Intersection (`allOf`).
    All,
    /// Union (`anyOf` / `oneOf`).
    Any,
}

/// Options for dereferencing.
#[derive(Debug, Clone, Copy, Default)]
pub struct DerefOptions {
    /// Only inline references whose target lives in another document.
    /// References local to the context document are left nominal.
    pub external_only: bool,
    /// Keep references to other documents as references: copy each target
    /// into the context's `components.schemas` under its name and point the
    /// reference there.
    pub localize_external: bool,
}

impl DerefOptions {
    pub fn external_only(mut self, external_only: bool) -> Self {
        self.external_only = external_only;
        self
    }

    pub fn localize_external(mut self, localize_external: bool) -> Self {
        self.localize_external = localize_external;
        self
    }
}

/// Options for shape and type projection.
#[derive(Debug, Clone)]
pub struct ProjectOptions {
    /// Render homogeneous tuples as plain sequences.
    pub tuples_as_arrays: bool,
    /// Result/event position: unions collapse to the payload branch and
    /// primitive proxies apply.
    pub event_context: bool,
    /// Expand anonymous enums into literal unions in type references.
    pub expand_enums: bool,
    /// Primitive name overrides used only in event context.
    pub primitive_proxies: BTreeMap<Primitive, String>,
    /// Expand named nested schemas once per declaration instead of
    /// referencing them by name.
    pub inline_named: bool,
    /// Degrade heterogeneous tuples to a sequence of `any` when the profile
    /// has no tuple type, instead of failing.
    pub degrade_tuples: bool,
}

impl Default for ProjectOptions {
    fn default() -> Self {
        Self {
            tuples_as_arrays: false,
            event_context: false,
            expand_enums: true,
            primitive_proxies: BTreeMap::new(),
            inline_named: false,
            degrade_tuples: false,
        }
    }
}

impl ProjectOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tuples_as_arrays(mut self, enabled: bool) -> Self {
        self.tuples_as_arrays = enabled;
        self
    }

    pub fn event_context(mut self, enabled: bool) -> Self {
        self.event_context = enabled;
        self
    }

    pub fn expand_enums(mut self, enabled: bool) -> Self {
        self.expand_enums = enabled;
        self
    }

    pub fn inline_named(mut self, enabled: bool) -> Self {
        self.inline_named = enabled;
        self
    }

    pub fn degrade_tuples(mut self, enabled: bool) -> Self {
        self.degrade_tuples = enabled;
        self
    }

    /// Substitute `name` for `primitive` in event positions.
    pub fn primitive_proxy(mut self, primitive: Primitive, name: impl Into<String>) -> Self {
        self.primitive_proxies.insert(primitive, name.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn primitive_parse_round_trips_names() {
        for name in ["string", "number", "integer", "boolean", "null"] {
            assert_eq!(Primitive::parse(name).map(|p| p.as_str()), Some(name));
        }
        assert_eq!(Primitive::parse("object"), None);
        assert_eq!(Primitive::parse("array"), None);
    }

    #[test]
    fn integer_admits_whole_floats() {
        assert!(Primitive::Integer.admits(&json!(2)));
        assert!(Primitive::Integer.admits(&json!(2.0)));
        assert!(!Primitive::Integer.admits(&json!(2.5)));
        assert!(Primitive::Number.admits(&json!(2.5)));
        assert!(!Primitive::String.admits(&json!(2)));
    }

    #[test]
    fn of_value_classifies_literals() {
        assert_eq!(Primitive::of_value(&json!("a")), Some(Primitive::String));
        assert_eq!(Primitive::of_value(&json!(1)), Some(Primitive::Integer));
        assert_eq!(Primitive::of_value(&json!(1.5)), Some(Primitive::Number));
        assert_eq!(Primitive::of_value(&json!({})), None);
    }

    #[test]
    fn project_options_defaults() {
        let opts = ProjectOptions::new();
        assert!(opts.expand_enums);
        assert!(!opts.tuples_as_arrays);
        assert!(!opts.event_context);

        let opts = opts.primitive_proxy(Primitive::Boolean, "BooleanProxy");
        assert_eq!(
            opts.primitive_proxies.get(&Primitive::Boolean).map(String::as_str),
            Some("BooleanProxy")
        );
    }
}
