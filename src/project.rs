//! Shape and type projection.
//!
//! Turns canonical schemas into what a rendering layer consumes: a short
//! type reference for use sites, and a structural [`Shape`] for the single
//! place a named schema is declared.
//!
//! Projection always terminates. References left by cycle breaking are
//! leaves, titled subschemas are rendered by name, and with
//! [`ProjectOptions::inline_named`] each title is expanded at most once per
//! recursion path.

use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::document::Document;
use crate::error::ResolveError;
use crate::events::payload_branch;
use crate::names::enum_key;
use crate::profile::{fill, LanguageProfile, TemplateKind};
use crate::schema::{Additional, Items, ObjectSchema, Schema, SchemaKind};
use crate::store::{reference_name, DocumentStore};
use crate::types::{Primitive, ProjectOptions};

/// Structural definition of a schema.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Shape {
    /// A reference left unresolved to break a cycle; rendered as a forward
    /// declaration.
    Opaque { name: String, type_ref: String },
    /// A named schema declared elsewhere.
    Reference { name: String, type_ref: String },
    Const { value: Value, type_ref: String },
    Enum { members: Vec<EnumMember> },
    Object {
        properties: Vec<Property>,
        #[serde(skip_serializing_if = "Option::is_none")]
        index: Option<IndexSignature>,
    },
    Array { element: Box<Shape>, type_ref: String },
    Tuple { elements: Vec<Shape>, type_ref: String },
    Union { branches: Vec<String>, type_ref: String },
    Primitive { type_ref: String },
    Any { type_ref: String },
    Void { type_ref: String },
    /// The `false` schema: no value is valid.
    Never { type_ref: String },
}

/// One constant of an enumerated string set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnumMember {
    /// Identifier-safe key.
    pub key: String,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Property {
    pub name: String,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub type_ref: String,
    pub shape: Shape,
}

/// Key-to-value mapping of an object with dynamic keys.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexSignature {
    /// Enumerated key names, when keys are restricted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keys: Option<Vec<String>>,
    pub type_ref: String,
    pub shape: Box<Shape>,
}

/// Projects schemas of one module through a [`LanguageProfile`].
pub struct Projector<'a> {
    profile: &'a dyn LanguageProfile,
    options: &'a ProjectOptions,
    store: &'a DocumentStore,
    context: &'a Document,
    path: String,
    /// Titles currently being expanded.
    visiting: Vec<String>,
}

enum TupleForm<'s> {
    Sequence(&'s Schema),
    Tuple,
    Degraded,
}

impl<'a> Projector<'a> {
    pub fn new(
        profile: &'a dyn LanguageProfile,
        options: &'a ProjectOptions,
        store: &'a DocumentStore,
        context: &'a Document,
    ) -> Self {
        Self {
            profile,
            options,
            store,
            context,
            path: "#".to_string(),
            visiting: Vec::new(),
        }
    }

    /// Location reported in errors and warnings.
    pub fn at(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn set_path(&mut self, path: impl Into<String>) {
        self.path = path.into();
    }

    /// Short type reference: the (qualified) title of a named schema, or an
    /// inline type expression for an anonymous one.
    ///
    /// # Errors
    ///
    /// Returns `ResolveError::UnsupportedTuple` for a heterogeneous tuple on a
    /// profile without tuple types, unless tuples may degrade.
    pub fn type_ref(&mut self, schema: &Schema) -> Result<String, ResolveError> {
        let literal = matches!(schema.kind, SchemaKind::Ref(_) | SchemaKind::Const(_));
        if let Some(title) = schema.title.as_deref().filter(|_| !literal) {
            return Ok(self.qualify(title));
        }

        Ok(match &schema.kind {
            SchemaKind::Ref(reference) => self.qualify(reference_name(reference)),
            SchemaKind::Const(value) => self.literal(value),
            SchemaKind::Enum { primitive, values } => {
                if self.options.expand_enums {
                    let literals: Vec<String> = values.iter().map(|v| self.literal(v)).collect();
                    self.join_union(&literals)
                } else {
                    match primitive {
                        Some(p) => self.primitive_name(*p),
                        None => self.template(TemplateKind::Any).to_string(),
                    }
                }
            }
            SchemaKind::Object(object) => self.object_ref(object)?,
            SchemaKind::Array(Items::Any) => self.array_of(self.template(TemplateKind::Any)),
            SchemaKind::Array(Items::Single(item)) => {
                let element = self.type_ref(item)?;
                self.array_of(&element)
            }
            SchemaKind::Array(Items::Tuple(items)) => match self.tuple_form(items)? {
                TupleForm::Sequence(item) => {
                    let element = self.type_ref(item)?;
                    self.array_of(&element)
                }
                TupleForm::Tuple => self.tuple_ref(items)?,
                TupleForm::Degraded => self.array_of(self.template(TemplateKind::Any)),
            },
            SchemaKind::AnyOf(branches) if self.options.event_context => {
                match payload_branch(branches) {
                    Some(branch) => self.type_ref(branch)?,
                    None => self.template(TemplateKind::Void).to_string(),
                }
            }
            SchemaKind::AnyOf(branches) => {
                let refs = branches
                    .iter()
                    .map(|b| self.type_ref(b))
                    .collect::<Result<Vec<_>, _>>()?;
                self.join_union(&refs)
            }
            SchemaKind::AllOf(_) => {
                warn!(document = %self.context.title(), path = %self.path, "unexpected allOf, rendering as void");
                self.template(TemplateKind::Void).to_string()
            }
            SchemaKind::Primitive(p) => self.primitive_name(*p),
            SchemaKind::Empty => self.template(TemplateKind::Void).to_string(),
            SchemaKind::Never => self.template(TemplateKind::Never).to_string(),
        })
    }

    /// Full structural definition of a schema at its declaration.
    ///
    /// # Errors
    ///
    /// See [`type_ref`](Self::type_ref).
    pub fn shape(&mut self, schema: &Schema) -> Result<Shape, ResolveError> {
        self.expand(schema, true)
    }

    /// Shape of a schema at a use site, such as a method parameter: named
    /// schemas are referenced instead of expanded.
    ///
    /// # Errors
    ///
    /// See [`type_ref`](Self::type_ref).
    pub fn use_shape(&mut self, schema: &Schema) -> Result<Shape, ResolveError> {
        self.expand(schema, false)
    }

    // --- Internal implementation ---

    fn expand(&mut self, schema: &Schema, top: bool) -> Result<Shape, ResolveError> {
        match &schema.kind {
            SchemaKind::Ref(reference) => return Ok(self.reference_shape(schema, reference)),
            SchemaKind::Const(value) => return Ok(self.constant(value)),
            _ => {}
        }

        let title = schema.title.as_deref();
        if let Some(title) = title.filter(|_| !top) {
            if !self.options.inline_named || self.visiting.iter().any(|t| t == title) {
                return Ok(Shape::Reference {
                    name: title.to_string(),
                    type_ref: self.qualify(title),
                });
            }
        }

        if let Some(title) = title {
            self.visiting.push(title.to_string());
        }
        let result = self.expand_kind(schema);
        if title.is_some() {
            self.visiting.pop();
        }
        result
    }

    fn expand_kind(&mut self, schema: &Schema) -> Result<Shape, ResolveError> {
        Ok(match &schema.kind {
            SchemaKind::Ref(reference) => self.reference_shape(schema, reference),
            SchemaKind::Const(value) => self.constant(value),
            SchemaKind::Enum { values, .. } if schema.is_string_enum() => Shape::Enum {
                members: values
                    .iter()
                    .filter_map(Value::as_str)
                    .map(|v| EnumMember {
                        key: enum_key(v),
                        value: Value::String(v.to_string()),
                    })
                    .collect(),
            },
            SchemaKind::Enum { values, .. } => {
                let branches: Vec<String> = values.iter().map(|v| self.literal(v)).collect();
                Shape::Union {
                    type_ref: self.join_union(&branches),
                    branches,
                }
            }
            SchemaKind::Object(object) => self.object_shape(object)?,
            SchemaKind::Array(Items::Any) => Shape::Array {
                type_ref: self.array_of(self.template(TemplateKind::Any)),
                element: Box::new(self.any_shape()),
            },
            SchemaKind::Array(Items::Single(item)) => {
                let element = self.expand(item, false)?;
                let element_ref = self.type_ref(item)?;
                Shape::Array {
                    type_ref: self.array_of(&element_ref),
                    element: Box::new(element),
                }
            }
            SchemaKind::Array(Items::Tuple(items)) => match self.tuple_form(items)? {
                TupleForm::Sequence(item) => {
                    let element = self.expand(item, false)?;
                    let element_ref = self.type_ref(item)?;
                    Shape::Array {
                        type_ref: self.array_of(&element_ref),
                        element: Box::new(element),
                    }
                }
                TupleForm::Tuple => {
                    let elements = items
                        .iter()
                        .map(|item| self.expand(item, false))
                        .collect::<Result<Vec<_>, _>>()?;
                    Shape::Tuple {
                        type_ref: self.tuple_ref(items)?,
                        elements,
                    }
                }
                TupleForm::Degraded => Shape::Array {
                    type_ref: self.array_of(self.template(TemplateKind::Any)),
                    element: Box::new(self.any_shape()),
                },
            },
            SchemaKind::AnyOf(branches) if self.options.event_context => {
                match payload_branch(branches) {
                    Some(branch) => self.expand(branch, false)?,
                    None => self.void_shape(),
                }
            }
            SchemaKind::AnyOf(branches) => {
                let refs = branches
                    .iter()
                    .map(|b| self.type_ref(b))
                    .collect::<Result<Vec<_>, _>>()?;
                Shape::Union {
                    type_ref: self.join_union(&refs),
                    branches: refs,
                }
            }
            SchemaKind::AllOf(_) => {
                warn!(document = %self.context.title(), path = %self.path, "unexpected allOf, rendering as void");
                self.void_shape()
            }
            SchemaKind::Primitive(p) => Shape::Primitive {
                type_ref: self.primitive_name(*p),
            },
            SchemaKind::Empty => {
                warn!(document = %self.context.title(), path = %self.path, "schema has no recognizable shape, rendering as void");
                self.void_shape()
            }
            SchemaKind::Never => Shape::Never {
                type_ref: self.template(TemplateKind::Never).to_string(),
            },
        })
    }

    fn object_shape(&mut self, object: &ObjectSchema) -> Result<Shape, ResolveError> {
        let mut properties = Vec::with_capacity(object.properties.len());
        for (name, schema) in &object.properties {
            properties.push(Property {
                name: name.clone(),
                required: object.required.contains(name),
                description: schema.description.clone(),
                type_ref: self.type_ref(schema)?,
                shape: self.expand(schema, false)?,
            });
        }

        let values = index_values(object);
        let index = if values.is_empty() && object.property_names.is_none() {
            None
        } else {
            let (type_ref, shape) = match values.as_slice() {
                [] => (
                    self.template(TemplateKind::Any).to_string(),
                    self.any_shape(),
                ),
                [single] => (self.type_ref(single)?, self.expand(single, false)?),
                many => {
                    let refs = many
                        .iter()
                        .map(|s| self.type_ref(s))
                        .collect::<Result<Vec<_>, _>>()?;
                    let type_ref = self.join_union(&refs);
                    (
                        type_ref.clone(),
                        Shape::Union {
                            branches: refs,
                            type_ref,
                        },
                    )
                }
            };
            Some(IndexSignature {
                keys: object.property_names.clone(),
                type_ref,
                shape: Box::new(shape),
            })
        };

        Ok(Shape::Object { properties, index })
    }

    fn object_ref(&mut self, object: &ObjectSchema) -> Result<String, ResolveError> {
        if object.is_dynamic() {
            let values = index_values(object);
            let value = match values.as_slice() {
                [] => self.template(TemplateKind::Any).to_string(),
                [single] => self.type_ref(single)?,
                many => {
                    let refs = many
                        .iter()
                        .map(|s| self.type_ref(s))
                        .collect::<Result<Vec<_>, _>>()?;
                    self.join_union(&refs)
                }
            };
            let key = match &object.property_names {
                Some(names) => {
                    let literals: Vec<String> = names
                        .iter()
                        .map(|n| self.literal(&Value::String(n.clone())))
                        .collect();
                    self.join_union(&literals)
                }
                None => self.primitive_name(Primitive::String),
            };
            return Ok(fill(
                self.template(TemplateKind::Map),
                &[("key", &key), ("type", &value)],
            ));
        }

        let mut fields = Vec::with_capacity(object.properties.len());
        for (name, schema) in &object.properties {
            let kind = if object.required.contains(name) {
                TemplateKind::Field
            } else {
                TemplateKind::OptionalField
            };
            let type_ref = self.type_ref(schema)?;
            fields.push(fill(self.template(kind), &[("name", name), ("type", &type_ref)]));
        }
        let joined = fields.join(self.template(TemplateKind::FieldSeparator));
        Ok(fill(self.template(TemplateKind::Object), &[("fields", &joined)]))
    }

    fn tuple_ref(&mut self, items: &[Schema]) -> Result<String, ResolveError> {
        let elements = items
            .iter()
            .map(|item| self.type_ref(item))
            .collect::<Result<Vec<_>, _>>()?;
        let joined = elements.join(self.template(TemplateKind::TupleSeparator));
        Ok(fill(self.template(TemplateKind::Tuple), &[("types", &joined)]))
    }

    fn tuple_form<'s>(&self, items: &'s [Schema]) -> Result<TupleForm<'s>, ResolveError> {
        let homogeneous = items
            .first()
            .filter(|first| items.iter().all(|i| i.kind == first.kind && i.title == first.title));

        match homogeneous {
            Some(first) if self.options.tuples_as_arrays || !self.profile.supports_tuples() => {
                Ok(TupleForm::Sequence(first))
            }
            _ if self.profile.supports_tuples() => Ok(TupleForm::Tuple),
            _ if self.options.degrade_tuples => Ok(TupleForm::Degraded),
            _ => Err(ResolveError::UnsupportedTuple {
                document: self.context.title().to_string(),
                path: self.path.clone(),
                message: "heterogeneous tuple on a profile without tuple types".into(),
            }),
        }
    }

    /// Qualify a named type owned by another module.
    fn qualify(&self, name: &str) -> String {
        match self.store.owning_module(name, self.context) {
            Some(module) if module != self.context.title() => fill(
                self.template(TemplateKind::Qualified),
                &[("module", module), ("type", name)],
            ),
            _ => name.to_string(),
        }
    }

    fn primitive_name(&self, primitive: Primitive) -> String {
        if self.options.event_context {
            if let Some(proxy) = self.options.primitive_proxies.get(&primitive) {
                return proxy.clone();
            }
        }
        self.profile.primitive(primitive).to_string()
    }

    /// A titled reference names a declared (or promoted) schema. An untitled
    /// one was left behind by cycle breaking.
    fn reference_shape(&self, schema: &Schema, reference: &str) -> Shape {
        match schema.title.as_deref() {
            Some(title) => Shape::Reference {
                name: title.to_string(),
                type_ref: self.qualify(title),
            },
            None => {
                let name = reference_name(reference).to_string();
                Shape::Opaque {
                    type_ref: self.qualify(&name),
                    name,
                }
            }
        }
    }

    fn constant(&self, value: &Value) -> Shape {
        Shape::Const {
            value: value.clone(),
            type_ref: self.literal(value),
        }
    }

    fn literal(&self, value: &Value) -> String {
        fill(self.template(TemplateKind::Literal), &[("value", &value.to_string())])
    }

    fn array_of(&self, element: &str) -> String {
        fill(self.template(TemplateKind::Array), &[("type", element)])
    }

    fn join_union(&self, branches: &[String]) -> String {
        let joined = branches.join(self.template(TemplateKind::UnionSeparator));
        fill(self.template(TemplateKind::Union), &[("types", &joined)])
    }

    fn any_shape(&self) -> Shape {
        Shape::Any {
            type_ref: self.template(TemplateKind::Any).to_string(),
        }
    }

    fn void_shape(&self) -> Shape {
        Shape::Void {
            type_ref: self.template(TemplateKind::Void).to_string(),
        }
    }

    fn template(&self, kind: TemplateKind) -> &'a str {
        self.profile.template(kind)
    }
}

/// Value schemas of dynamic keys: the `additionalProperties` schema, then
/// each `patternProperties` schema.
fn index_values(object: &ObjectSchema) -> Vec<&Schema> {
    let mut values: Vec<&Schema> = Vec::new();
    if let Some(Additional::Schema(value)) = &object.additional {
        values.push(&**value);
    }
    for value in object.pattern_properties.values() {
        if !values.contains(&value) {
            values.push(value);
        }
    }
    values
}
