//! Typed schema model.
//!
//! A dereferenced JSON schema is parsed once into [`Schema`], whose
//! [`SchemaKind`] names exactly one active shape. Everything downstream of
//! parsing matches on the kind instead of probing for keywords.

use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::error::ResolveError;
use crate::types::{json_type_name, Primitive};

/// One node of the schema graph.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Schema {
    /// Nominal name. Absent for anonymous inline schemas.
    pub title: Option<String>,
    pub description: Option<String>,
    pub kind: SchemaKind,
    /// Keywords with no structural meaning (`format`, `minimum`, `examples`, ...).
    pub extra: Map<String, Value>,
}

/// The active shape of a [`Schema`].
#[derive(Debug, Clone, PartialEq, Default)]
pub enum SchemaKind {
    /// A reference left in place, either by cycle breaking or because the
    /// dereferencer was asked to keep local references nominal.
    Ref(String),
    Const(Value),
    Enum {
        primitive: Option<Primitive>,
        values: Vec<Value>,
    },
    Object(ObjectSchema),
    Array(Items),
    AllOf(Vec<Schema>),
    /// `anyOf` and `oneOf` alike.
    AnyOf(Vec<Schema>),
    Primitive(Primitive),
    /// No recognizable shape: the void / "no result" schema. Accepts anything.
    #[default]
    Empty,
    /// The `false` schema (or `not: {}`). Accepts nothing.
    Never,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ObjectSchema {
    pub properties: IndexMap<String, Schema>,
    pub required: Vec<String>,
    pub additional: Option<Additional>,
    pub pattern_properties: IndexMap<String, Schema>,
    /// Enumerated key names from `propertyNames.enum`.
    pub property_names: Option<Vec<String>>,
}

impl ObjectSchema {
    /// Whether keys are dynamic rather than a fixed set of named properties.
    pub fn is_dynamic(&self) -> bool {
        self.properties.is_empty()
            && (!self.pattern_properties.is_empty()
                || self.property_names.is_some()
                || matches!(self.additional, Some(Additional::Schema(_))))
    }
}

/// `additionalProperties`.
#[derive(Debug, Clone, PartialEq)]
pub enum Additional {
    Allowed(bool),
    Schema(Box<Schema>),
}

/// `items` of an array schema.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Items {
    /// No `items` keyword.
    #[default]
    Any,
    Single(Box<Schema>),
    Tuple(Vec<Schema>),
}

impl Schema {
    pub fn new(kind: SchemaKind) -> Self {
        Self {
            kind,
            ..Self::default()
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn primitive(primitive: Primitive) -> Self {
        Self::new(SchemaKind::Primitive(primitive))
    }

    pub fn reference(reference: impl Into<String>) -> Self {
        Self::new(SchemaKind::Ref(reference.into()))
    }

    pub fn is_empty(&self) -> bool {
        matches!(self.kind, SchemaKind::Empty)
    }

    /// Enum whose values are all strings.
    pub fn is_string_enum(&self) -> bool {
        match &self.kind {
            SchemaKind::Enum { primitive, values } => {
                matches!(primitive, None | Some(Primitive::String))
                    && !values.is_empty()
                    && values.iter().all(Value::is_string)
            }
            _ => false,
        }
    }

    /// Parse a dereferenced JSON schema.
    ///
    /// `document` and `path` locate the value for error messages.
    ///
    /// # Errors
    ///
    /// Returns `ResolveError::MalformedSchema` when a value that must be a
    /// schema is not one, or when `type` names an unknown type.
    pub fn parse(value: &Value, document: &str, path: &str) -> Result<Schema, ResolveError> {
        Parser { document }.parse(value, path)
    }

    /// Serialize back to JSON Schema.
    pub fn to_value(&self) -> Value {
        if self.kind == SchemaKind::Never
            && self.title.is_none()
            && self.description.is_none()
            && self.extra.is_empty()
        {
            return Value::Bool(false);
        }
        let mut out = Map::new();
        if let Some(title) = &self.title {
            out.insert("title".into(), Value::String(title.clone()));
        }
        if let Some(description) = &self.description {
            out.insert("description".into(), Value::String(description.clone()));
        }

        match &self.kind {
            SchemaKind::Ref(reference) => {
                out.insert("$ref".into(), Value::String(reference.clone()));
            }
            SchemaKind::Const(value) => {
                out.insert("const".into(), value.clone());
            }
            SchemaKind::Enum { primitive, values } => {
                if let Some(p) = primitive {
                    out.insert("type".into(), Value::String(p.as_str().into()));
                }
                out.insert("enum".into(), Value::Array(values.clone()));
            }
            SchemaKind::Object(object) => {
                out.insert("type".into(), Value::String("object".into()));
                if !object.properties.is_empty() {
                    out.insert("properties".into(), schemas_to_map(&object.properties));
                }
                if !object.required.is_empty() {
                    let required = object.required.iter().cloned().map(Value::String).collect();
                    out.insert("required".into(), Value::Array(required));
                }
                match &object.additional {
                    Some(Additional::Allowed(b)) => {
                        out.insert("additionalProperties".into(), Value::Bool(*b));
                    }
                    Some(Additional::Schema(s)) => {
                        out.insert("additionalProperties".into(), s.to_value());
                    }
                    None => {}
                }
                if !object.pattern_properties.is_empty() {
                    out.insert(
                        "patternProperties".into(),
                        schemas_to_map(&object.pattern_properties),
                    );
                }
                if let Some(names) = &object.property_names {
                    let names = names.iter().cloned().map(Value::String).collect();
                    let mut map = Map::new();
                    map.insert("enum".into(), Value::Array(names));
                    out.insert("propertyNames".into(), Value::Object(map));
                }
            }
            SchemaKind::Array(items) => {
                out.insert("type".into(), Value::String("array".into()));
                match items {
                    Items::Any => {}
                    Items::Single(s) => {
                        out.insert("items".into(), s.to_value());
                    }
                    Items::Tuple(list) => {
                        out.insert("items".into(), schemas_to_array(list));
                    }
                }
            }
            SchemaKind::AllOf(list) => {
                out.insert("allOf".into(), schemas_to_array(list));
            }
            SchemaKind::AnyOf(list) => {
                out.insert("anyOf".into(), schemas_to_array(list));
            }
            SchemaKind::Primitive(p) => {
                out.insert("type".into(), Value::String(p.as_str().into()));
            }
            SchemaKind::Empty => {}
            SchemaKind::Never => {
                out.insert("not".into(), Value::Object(Map::new()));
            }
        }

        for (key, value) in &self.extra {
            out.entry(key.clone()).or_insert_with(|| value.clone());
        }
        Value::Object(out)
    }
}

fn schemas_to_map(schemas: &IndexMap<String, Schema>) -> Value {
    Value::Object(
        schemas
            .iter()
            .map(|(k, v)| (k.clone(), v.to_value()))
            .collect(),
    )
}

fn schemas_to_array(schemas: &[Schema]) -> Value {
    Value::Array(schemas.iter().map(Schema::to_value).collect())
}

// --- Parsing ---

struct Parser<'a> {
    document: &'a str,
}

impl Parser<'_> {
    fn malformed(&self, path: &str, message: impl Into<String>) -> ResolveError {
        ResolveError::MalformedSchema {
            document: self.document.to_string(),
            path: path.to_string(),
            message: message.into(),
        }
    }

    fn parse(&self, value: &Value, path: &str) -> Result<Schema, ResolveError> {
        let map = match value {
            Value::Bool(true) => return Ok(Schema::default()),
            Value::Bool(false) => return Ok(Schema::new(SchemaKind::Never)),
            Value::Object(map) => map,
            other => {
                return Err(self.malformed(
                    path,
                    format!("expected object or boolean, got {}", json_type_name(other)),
                ))
            }
        };

        let mut rest = map.clone();
        let title = take_string(&mut rest, "title");
        let description = take_string(&mut rest, "description");

        if rest.get("not").is_some_and(accepts_anything) {
            rest.remove("not");
            return Ok(Schema {
                title,
                description,
                kind: SchemaKind::Never,
                extra: rest,
            });
        }

        let all_of = rest.remove("allOf");
        let any_of = rest.remove("anyOf");
        let one_of = rest.remove("oneOf");

        let (kind, extra) = if all_of.is_none() && any_of.is_none() && one_of.is_none() {
            self.parse_body(rest, path)?
        } else {
            let (base, extra) = self.parse_body(rest, path)?;
            let mut parts = Vec::new();
            if base != SchemaKind::Empty {
                parts.push(Schema::new(base));
            }
            if let Some(list) = &all_of {
                parts.extend(self.parse_list(list, &format!("{}/allOf", path))?);
            }
            for (key, list) in [("anyOf", &any_of), ("oneOf", &one_of)] {
                if let Some(list) = list {
                    let branches = self.parse_list(list, &format!("{}/{}", path, key))?;
                    parts.push(Schema::new(SchemaKind::AnyOf(branches)));
                }
            }
            let kind = if all_of.is_none() && parts.len() == 1 {
                // a lone union keeps its own node
                parts.remove(0).kind
            } else {
                SchemaKind::AllOf(parts)
            };
            (kind, extra)
        };

        Ok(Schema {
            title,
            description,
            kind,
            extra,
        })
    }

    fn parse_list(&self, value: &Value, path: &str) -> Result<Vec<Schema>, ResolveError> {
        let Value::Array(items) = value else {
            return Err(self.malformed(
                path,
                format!("expected array, got {}", json_type_name(value)),
            ));
        };
        items
            .iter()
            .enumerate()
            .map(|(i, item)| self.parse(item, &format!("{}/{}", path, i)))
            .collect()
    }

    fn parse_map(
        &self,
        value: &Value,
        path: &str,
    ) -> Result<IndexMap<String, Schema>, ResolveError> {
        let Value::Object(entries) = value else {
            return Err(self.malformed(
                path,
                format!("expected object, got {}", json_type_name(value)),
            ));
        };
        entries
            .iter()
            .map(|(k, v)| Ok((k.clone(), self.parse(v, &format!("{}/{}", path, k))?)))
            .collect()
    }

    /// Determine the kind from the remaining keywords. Unconsumed keywords
    /// are returned as extras.
    fn parse_body(
        &self,
        mut rest: Map<String, Value>,
        path: &str,
    ) -> Result<(SchemaKind, Map<String, Value>), ResolveError> {
        if let Some(reference) = rest.remove("$ref") {
            let Value::String(reference) = reference else {
                return Err(self.malformed(path, "$ref must be a string"));
            };
            return Ok((SchemaKind::Ref(reference), rest));
        }

        if let Some(value) = rest.remove("const") {
            rest.remove("type");
            return Ok((SchemaKind::Const(value), rest));
        }

        let type_name = match rest.remove("type") {
            None => None,
            Some(Value::String(s)) => Some(s),
            // ["string", "null"]: the first non-null member wins
            Some(Value::Array(types)) => {
                let names: Vec<&str> = types.iter().filter_map(Value::as_str).collect();
                names
                    .iter()
                    .find(|t| **t != "null")
                    .or(names.first())
                    .map(|t| t.to_string())
            }
            Some(other) => {
                return Err(self.malformed(
                    path,
                    format!("type must be a string, got {}", json_type_name(&other)),
                ))
            }
        };

        if let Some(values) = rest.remove("enum") {
            let Value::Array(values) = values else {
                return Err(self.malformed(path, "enum must be an array"));
            };
            let primitive = match type_name.as_deref() {
                Some(t) => Primitive::parse(t),
                None => infer_primitive(&values),
            };
            return Ok((SchemaKind::Enum { primitive, values }, rest));
        }

        let is_object = match type_name.as_deref() {
            Some("object") => true,
            None => [
                "properties",
                "required",
                "additionalProperties",
                "patternProperties",
                "propertyNames",
            ]
            .iter()
            .any(|k| rest.contains_key(*k)),
            _ => false,
        };
        if is_object {
            let object = self.parse_object(&mut rest, path)?;
            return Ok((SchemaKind::Object(object), rest));
        }

        let is_array = match type_name.as_deref() {
            Some("array") => true,
            None => rest.contains_key("items"),
            _ => false,
        };
        if is_array {
            let items = match rest.remove("items") {
                None => Items::Any,
                Some(Value::Array(list)) => Items::Tuple(
                    self.parse_list(&Value::Array(list), &format!("{}/items", path))?,
                ),
                Some(item) => {
                    Items::Single(Box::new(self.parse(&item, &format!("{}/items", path))?))
                }
            };
            return Ok((SchemaKind::Array(items), rest));
        }

        match type_name {
            None => Ok((SchemaKind::Empty, rest)),
            Some(name) => match Primitive::parse(&name) {
                Some(p) => Ok((SchemaKind::Primitive(p), rest)),
                None => Err(self.malformed(path, format!("unknown type \"{}\"", name))),
            },
        }
    }

    fn parse_object(
        &self,
        rest: &mut Map<String, Value>,
        path: &str,
    ) -> Result<ObjectSchema, ResolveError> {
        let mut object = ObjectSchema::default();

        if let Some(properties) = rest.remove("properties") {
            object.properties = self.parse_map(&properties, &format!("{}/properties", path))?;
        }

        if let Some(required) = rest.remove("required") {
            let Value::Array(names) = required else {
                return Err(self.malformed(path, "required must be an array"));
            };
            for name in names {
                match name {
                    Value::String(s) if !object.required.contains(&s) => object.required.push(s),
                    Value::String(_) => {}
                    other => {
                        return Err(self.malformed(
                            &format!("{}/required", path),
                            format!("expected string, got {}", json_type_name(&other)),
                        ))
                    }
                }
            }
        }

        object.additional = match rest.remove("additionalProperties") {
            None => None,
            Some(Value::Bool(b)) => Some(Additional::Allowed(b)),
            Some(schema) => Some(Additional::Schema(Box::new(
                self.parse(&schema, &format!("{}/additionalProperties", path))?,
            ))),
        };

        if let Some(patterns) = rest.remove("patternProperties") {
            object.pattern_properties =
                self.parse_map(&patterns, &format!("{}/patternProperties", path))?;
        }

        // only enumerated key names are structural; anything else stays an extra
        let names = rest
            .get("propertyNames")
            .and_then(|v| v.get("enum"))
            .and_then(Value::as_array)
            .map(|values| {
                values
                    .iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect::<Vec<_>>()
            });
        if names.is_some() {
            rest.remove("propertyNames");
            object.property_names = names;
        }

        Ok(object)
    }
}

/// `true` or a schema object with no keywords.
fn accepts_anything(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

fn take_string(map: &mut Map<String, Value>, key: &str) -> Option<String> {
    match map.get(key) {
        Some(Value::String(_)) => match map.remove(key) {
            Some(Value::String(s)) => Some(s),
            _ => None,
        },
        _ => None,
    }
}

/// Element type shared by every value of an enum, if any.
pub(crate) fn infer_primitive(values: &[Value]) -> Option<Primitive> {
    let mut types = values.iter().map(Primitive::of_value);
    let first = types.next()??;
    let mut widened = first;
    for t in types {
        match (widened, t?) {
            (a, b) if a == b => {}
            (Primitive::Integer, Primitive::Number) | (Primitive::Number, Primitive::Integer) => {
                widened = Primitive::Number
            }
            _ => return None,
        }
    }
    Some(widened)
}
