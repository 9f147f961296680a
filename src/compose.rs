//! Schema unification.
//!
//! Collapses `allOf` (intersection) and `anyOf`/`oneOf` (union) lists into a
//! single schema. Operands are unified bottom-up, then folded pairwise from
//! the left. Later operands may override titles but never types.
//!
//! # Rules
//!
//! | Operands | `All` | `Any` |
//! |----------|-------|-------|
//! | const / const | equal or error | enum of both |
//! | enum / enum | intersection, error if empty | union |
//! | const / enum | the const, error if excluded | enum superset |
//! | literal / primitive | the literal | the primitive |
//! | mismatched types | error | two-branch union |
//! | object / object | properties merged, `required` unioned | properties merged, `required` intersected |
//! | tuple / array | error | error |
//! | distinct references | error | synthesized wrapper |

use indexmap::IndexMap;
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::UnifyError;
use crate::events::is_subscription_ack;
use crate::names::pascal;
use crate::promote::{registry_ref, Registry};
use crate::schema::{infer_primitive, Additional, Items, ObjectSchema, Schema, SchemaKind};
use crate::store::reference_name;
use crate::types::{Mode, Primitive};

/// Collapses composition keywords.
///
/// Wrapper schemas synthesized for divergent references are registered in
/// the unifier's [`Registry`].
#[derive(Debug, Default)]
pub struct Unifier {
    preserve_unions: bool,
    registry: Registry,
}

impl Unifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep `anyOf`/`oneOf` as unions of individually unified branches
    /// instead of collapsing them. Set when the target language has union
    /// types.
    pub fn preserve_unions(mut self, preserve: bool) -> Self {
        self.preserve_unions = preserve;
        self
    }

    /// Register synthesized wrappers in `registry`.
    pub fn with_registry(mut self, registry: Registry) -> Self {
        self.registry = registry;
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    pub fn into_registry(self) -> Registry {
        self.registry
    }

    /// Eliminate every composition node in `schema`.
    ///
    /// Preserved unions (see [`preserve_unions`](Self::preserve_unions)) are
    /// the only composition left in the result.
    ///
    /// # Errors
    ///
    /// Returns the first [`UnifyError`] raised while combining.
    pub fn unify(&mut self, schema: &Schema) -> Result<Schema, UnifyError> {
        match &schema.kind {
            SchemaKind::AllOf(parts) => {
                let merged = self.combine(parts, Mode::All)?;
                Ok(overlay(schema, merged, parts.len() > 1))
            }
            SchemaKind::AnyOf(branches) if self.preserve_unions => {
                let mut unified: Vec<Schema> = Vec::with_capacity(branches.len());
                for branch in branches {
                    let branch = self.unify(branch)?;
                    if !unified.contains(&branch) {
                        unified.push(branch);
                    }
                }
                let merged = match unified.len() {
                    1 => unified.remove(0),
                    _ => Schema::new(SchemaKind::AnyOf(unified)),
                };
                Ok(overlay(schema, merged, false))
            }
            SchemaKind::AnyOf(branches) => {
                let merged = self.combine(branches, Mode::Any)?;
                Ok(overlay(schema, merged, branches.len() > 1))
            }
            SchemaKind::Object(object) => {
                let mut out = object.clone();
                for property in out.properties.values_mut() {
                    *property = self.unify(property)?;
                }
                if let Some(Additional::Schema(value)) = &mut out.additional {
                    **value = self.unify(value)?;
                }
                for value in out.pattern_properties.values_mut() {
                    *value = self.unify(value)?;
                }
                Ok(Schema {
                    kind: SchemaKind::Object(out),
                    ..schema.clone()
                })
            }
            SchemaKind::Array(items) => {
                let items = match items {
                    Items::Any => Items::Any,
                    Items::Single(item) => Items::Single(Box::new(self.unify(item)?)),
                    Items::Tuple(list) => Items::Tuple(
                        list.iter()
                            .map(|item| self.unify(item))
                            .collect::<Result<_, _>>()?,
                    ),
                };
                Ok(Schema {
                    kind: SchemaKind::Array(items),
                    ..schema.clone()
                })
            }
            _ => Ok(schema.clone()),
        }
    }

    /// Combine a list of schemas into one.
    ///
    /// Each operand is unified first. Under [`Mode::Any`] the subscription
    /// acknowledgment never takes part in the collapse.
    ///
    /// # Errors
    ///
    /// Returns a [`UnifyError`] when two operands cannot be combined in
    /// `mode`.
    pub fn combine(&mut self, schemas: &[Schema], mode: Mode) -> Result<Schema, UnifyError> {
        let mut operands = Vec::with_capacity(schemas.len());
        for schema in schemas {
            if mode == Mode::Any && is_subscription_ack(schema) {
                continue;
            }
            operands.push(self.unify(schema)?);
        }

        let mut operands = operands.into_iter();
        let Some(first) = operands.next() else {
            // every branch was the acknowledgment
            return Ok(schemas.first().cloned().unwrap_or_default());
        };
        operands.try_fold(first, |acc, next| self.merge(acc, next, mode))
    }

    // --- Internal implementation ---

    fn merge(&mut self, a: Schema, b: Schema, mode: Mode) -> Result<Schema, UnifyError> {
        if a == b {
            return Ok(a);
        }

        let title = b.title.clone().or_else(|| a.title.clone());
        let description = b.description.clone().or_else(|| a.description.clone());
        let extra = merge_extra(&a.extra, &b.extra, mode);

        let kind = match (a.kind.clone(), b.kind.clone()) {
            (SchemaKind::Never, kind) | (kind, SchemaKind::Never) => match mode {
                Mode::All => SchemaKind::Never,
                Mode::Any => kind,
            },
            (SchemaKind::Empty, kind) | (kind, SchemaKind::Empty) => kind,

            (SchemaKind::AnyOf(branches), _) => return self.merge_with_union(branches, b, mode, true),
            (_, SchemaKind::AnyOf(branches)) => return self.merge_with_union(branches, a, mode, false),

            (SchemaKind::Ref(x), SchemaKind::Ref(y)) if x == y => SchemaKind::Ref(x),
            (SchemaKind::Ref(x), SchemaKind::Ref(y)) => match mode {
                Mode::All => return Err(UnifyError::RefConflict { left: x, right: y }),
                Mode::Any => {
                    let name = self.synthesize_wrapper(&x, &y);
                    return Ok(Schema::reference(registry_ref(&name)).with_title(name));
                }
            },

            (SchemaKind::Const(x), SchemaKind::Const(y)) => match mode {
                _ if x == y => SchemaKind::Const(x),
                Mode::All => return Err(UnifyError::ConstConflict { left: x, right: y }),
                Mode::Any => enum_of(vec![x, y]),
            },

            (SchemaKind::Enum { values: x, .. }, SchemaKind::Enum { values: y, .. }) => match mode {
                Mode::All => {
                    let common: Vec<Value> = x.iter().filter(|v| y.contains(v)).cloned().collect();
                    if common.is_empty() {
                        return Err(UnifyError::EmptyEnumIntersection { left: x, right: y });
                    }
                    enum_of(common)
                }
                Mode::Any => enum_of(union_values(x, y)),
            },

            (SchemaKind::Const(c), SchemaKind::Enum { values, .. })
            | (SchemaKind::Enum { values, .. }, SchemaKind::Const(c)) => match mode {
                Mode::All if values.contains(&c) => SchemaKind::Const(c),
                Mode::All => {
                    return Err(UnifyError::ConstExcluded {
                        value: c,
                        allowed: values,
                    })
                }
                Mode::Any => match &a.kind {
                    SchemaKind::Const(_) => enum_of(union_values(vec![c], values)),
                    _ => enum_of(union_values(values, vec![c])),
                },
            },

            (SchemaKind::Primitive(p), SchemaKind::Primitive(q)) => match merge_primitives(p, q, mode) {
                Some(merged) => SchemaKind::Primitive(merged),
                None => return self.mismatch(a, b, mode),
            },

            (literal @ (SchemaKind::Const(_) | SchemaKind::Enum { .. }), SchemaKind::Primitive(p))
            | (SchemaKind::Primitive(p), literal @ (SchemaKind::Const(_) | SchemaKind::Enum { .. })) => {
                if !literal_admitted(&literal, p) {
                    return self.mismatch(a, b, mode);
                }
                match mode {
                    Mode::All => literal,
                    Mode::Any => SchemaKind::Primitive(p),
                }
            }

            (SchemaKind::Object(x), SchemaKind::Object(y)) => {
                SchemaKind::Object(self.merge_objects(x, y, mode)?)
            }

            (SchemaKind::Array(x), SchemaKind::Array(y)) => {
                SchemaKind::Array(self.merge_items(x, y, mode)?)
            }

            _ => return self.mismatch(a, b, mode),
        };

        Ok(Schema {
            title,
            description,
            kind,
            extra,
        })
    }

    /// Mismatched shapes: an error under `All`, a two-branch union under
    /// `Any`.
    fn mismatch(&mut self, a: Schema, b: Schema, mode: Mode) -> Result<Schema, UnifyError> {
        match mode {
            Mode::All => Err(UnifyError::TypeMismatch {
                left: a.to_value(),
                right: b.to_value(),
            }),
            Mode::Any => Ok(Schema::new(SchemaKind::AnyOf(vec![a, b]))),
        }
    }

    /// Combine a preserved union with another operand.
    ///
    /// Under `Any` the operand joins the first branch of the same class, or
    /// becomes a new branch. Under `All` the operand distributes over the
    /// branches; branches that conflict with it are dropped.
    fn merge_with_union(
        &mut self,
        branches: Vec<Schema>,
        other: Schema,
        mode: Mode,
        union_on_left: bool,
    ) -> Result<Schema, UnifyError> {
        match mode {
            Mode::Any => {
                let mut branches = branches;
                let incoming = match other.kind {
                    SchemaKind::AnyOf(more) => more,
                    _ => vec![other],
                };
                for schema in incoming {
                    match branches.iter().position(|b| same_class(b, &schema)) {
                        Some(i) => {
                            let existing = std::mem::take(&mut branches[i]);
                            branches[i] = self.merge(existing, schema, Mode::Any)?;
                        }
                        None => branches.push(schema),
                    }
                }
                Ok(match branches.len() {
                    1 => branches.remove(0),
                    _ => Schema::new(SchemaKind::AnyOf(branches)),
                })
            }
            Mode::All => {
                let mut kept = Vec::new();
                let mut first_error = None;
                for branch in branches {
                    let merged = if union_on_left {
                        self.merge(branch, other.clone(), Mode::All)
                    } else {
                        self.merge(other.clone(), branch, Mode::All)
                    };
                    match merged {
                        Ok(schema) if !kept.contains(&schema) => kept.push(schema),
                        Ok(_) => {}
                        Err(e) => {
                            first_error.get_or_insert(e);
                        }
                    }
                }
                match (kept.len(), first_error) {
                    (0, Some(e)) => Err(e),
                    (0, None) => Ok(other),
                    (1, _) => Ok(kept.remove(0)),
                    _ => Ok(Schema::new(SchemaKind::AnyOf(kept))),
                }
            }
        }
    }

    fn merge_objects(
        &mut self,
        a: ObjectSchema,
        b: ObjectSchema,
        mode: Mode,
    ) -> Result<ObjectSchema, UnifyError> {
        let closed = |o: &ObjectSchema| matches!(o.additional, Some(Additional::Allowed(false)));
        let (a_closed, b_closed) = (closed(&a), closed(&b));

        let mut properties = IndexMap::new();
        let mut b_properties = b.properties;
        for (key, left) in a.properties {
            match b_properties.shift_remove(&key) {
                Some(right) => {
                    let merged = self.merge(left, right, mode)?;
                    properties.insert(key, merged);
                }
                None if mode == Mode::All && b_closed => {}
                None => {
                    properties.insert(key, left);
                }
            }
        }
        for (key, right) in b_properties {
            if mode == Mode::All && a_closed {
                continue;
            }
            properties.insert(key, right);
        }

        let required = match mode {
            Mode::All => union_strings(a.required, b.required),
            Mode::Any => a
                .required
                .into_iter()
                .filter(|r| b.required.contains(r))
                .collect(),
        };

        let additional = self.merge_additional(a.additional, b.additional, mode)?;

        let mut pattern_properties = a.pattern_properties;
        for (pattern, right) in b.pattern_properties {
            let merged = match pattern_properties.shift_remove(&pattern) {
                Some(left) => self.merge(left, right, mode)?,
                None => right,
            };
            pattern_properties.insert(pattern, merged);
        }

        let property_names = match (a.property_names, b.property_names) {
            (Some(x), Some(y)) => Some(match mode {
                Mode::All => x.into_iter().filter(|n| y.contains(n)).collect(),
                Mode::Any => union_strings(x, y),
            }),
            (Some(names), None) | (None, Some(names)) if mode == Mode::All => Some(names),
            _ => None,
        };

        Ok(ObjectSchema {
            properties,
            required,
            additional,
            pattern_properties,
            property_names,
        })
    }

    fn merge_additional(
        &mut self,
        a: Option<Additional>,
        b: Option<Additional>,
        mode: Mode,
    ) -> Result<Option<Additional>, UnifyError> {
        Ok(match (a, b) {
            (None, other) | (other, None) => other,
            (Some(Additional::Allowed(x)), Some(Additional::Allowed(y))) => {
                Some(Additional::Allowed(match mode {
                    Mode::All => x && y,
                    Mode::Any => x || y,
                }))
            }
            (Some(Additional::Schema(x)), Some(Additional::Schema(y))) => {
                Some(Additional::Schema(Box::new(self.merge(*x, *y, mode)?)))
            }
            (Some(Additional::Schema(s)), Some(Additional::Allowed(allowed)))
            | (Some(Additional::Allowed(allowed)), Some(Additional::Schema(s))) => {
                match (mode, allowed) {
                    (Mode::All, false) => Some(Additional::Allowed(false)),
                    (Mode::All, true) | (Mode::Any, false) => Some(Additional::Schema(s)),
                    (Mode::Any, true) => Some(Additional::Allowed(true)),
                }
            }
        })
    }

    fn merge_items(&mut self, a: Items, b: Items, mode: Mode) -> Result<Items, UnifyError> {
        match (a, b) {
            (Items::Any, other) | (other, Items::Any) => Ok(other),
            (Items::Single(x), Items::Single(y)) => {
                Ok(Items::Single(Box::new(self.merge(*x, *y, mode)?)))
            }
            _ => Err(UnifyError::TupleMerge),
        }
    }

    /// Register an `anyOf` wrapper over two references and return its name.
    fn synthesize_wrapper(&mut self, left: &str, right: &str) -> String {
        let name = wrapper_name(left, right);
        let wrapper = Schema::new(SchemaKind::AnyOf(vec![
            Schema::reference(left),
            Schema::reference(right),
        ]));
        let name = self.registry.insert(&name, wrapper);
        debug!(name = %name, left, right, "synthesized union wrapper");
        name
    }
}

/// Combine `schemas` in `mode` with a fresh [`Unifier`].
///
/// # Errors
///
/// See [`Unifier::combine`].
pub fn combine(schemas: &[Schema], mode: Mode) -> Result<Schema, UnifyError> {
    Unifier::new().combine(schemas, mode)
}

/// Name of the wrapper over two references: the last segment of their common
/// prefix followed by `Union`, or `AOrB` when they share no name prefix.
fn wrapper_name(left: &str, right: &str) -> String {
    let common: String = left
        .chars()
        .zip(right.chars())
        .take_while(|(l, r)| l == r)
        .map(|(l, _)| l)
        .collect();
    let stem = common.rsplit(|c| c == '/' || c == '#').next().unwrap_or_default();
    let stem = pascal(stem);
    if stem.is_empty() {
        format!(
            "{}Or{}",
            pascal(reference_name(left)),
            pascal(reference_name(right))
        )
    } else {
        format!("{}Union", stem)
    }
}

/// Apply the composition node's own annotations to its collapsed result.
///
/// A result folded from several operands is a new shape: it keeps a title
/// only when the composition node has one.
fn overlay(node: &Schema, mut merged: Schema, composite: bool) -> Schema {
    if node.title.is_some() || composite {
        merged.title = node.title.clone();
    }
    if node.description.is_some() {
        merged.description = node.description.clone();
    }
    for (key, value) in &node.extra {
        merged.extra.insert(key.clone(), value.clone());
    }
    merged
}

/// Keys on one side are kept under `All` and dropped under `Any`; shared
/// keys take the later value under `All` and survive `Any` only when equal.
fn merge_extra(a: &Map<String, Value>, b: &Map<String, Value>, mode: Mode) -> Map<String, Value> {
    match mode {
        Mode::All => {
            let mut out = a.clone();
            for (key, value) in b {
                out.insert(key.clone(), value.clone());
            }
            out
        }
        Mode::Any => a
            .iter()
            .filter(|(key, value)| b.get(*key) == Some(*value))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
    }
}

fn merge_primitives(p: Primitive, q: Primitive, mode: Mode) -> Option<Primitive> {
    match (p, q) {
        _ if p == q => Some(p),
        (Primitive::Integer, Primitive::Number) | (Primitive::Number, Primitive::Integer) => {
            Some(match mode {
                Mode::All => Primitive::Integer,
                Mode::Any => Primitive::Number,
            })
        }
        _ => None,
    }
}

fn literal_admitted(literal: &SchemaKind, primitive: Primitive) -> bool {
    match literal {
        SchemaKind::Const(value) => primitive.admits(value),
        SchemaKind::Enum { values, .. } => values.iter().all(|v| primitive.admits(v)),
        _ => false,
    }
}

fn enum_of(values: Vec<Value>) -> SchemaKind {
    SchemaKind::Enum {
        primitive: infer_primitive(&values),
        values,
    }
}

fn union_values(mut a: Vec<Value>, b: Vec<Value>) -> Vec<Value> {
    for value in b {
        if !a.contains(&value) {
            a.push(value);
        }
    }
    a
}

fn union_strings(mut a: Vec<String>, b: Vec<String>) -> Vec<String> {
    for value in b {
        if !a.contains(&value) {
            a.push(value);
        }
    }
    a
}

/// Whether two union branches describe the same kind of value and can be
/// merged instead of listed side by side.
fn same_class(a: &Schema, b: &Schema) -> bool {
    match (&a.kind, &b.kind) {
        (SchemaKind::Ref(x), SchemaKind::Ref(y)) => x == y,
        (SchemaKind::Object(_), SchemaKind::Object(_)) => true,
        (SchemaKind::Array(Items::Tuple(_)), _) | (_, SchemaKind::Array(Items::Tuple(_))) => false,
        (SchemaKind::Array(_), SchemaKind::Array(_)) => true,
        (x, y) => match (literal_family(x), literal_family(y)) {
            (Some(p), Some(q)) => p == q,
            _ => false,
        },
    }
}

/// Primitive family of a scalar kind; `integer` and `number` share one.
fn literal_family(kind: &SchemaKind) -> Option<Primitive> {
    let primitive = match kind {
        SchemaKind::Primitive(p) => Some(*p),
        SchemaKind::Const(value) => Primitive::of_value(value),
        SchemaKind::Enum { primitive, values } => primitive.or_else(|| infer_primitive(values)),
        _ => None,
    };
    primitive.map(|p| match p {
        Primitive::Integer => Primitive::Number,
        other => other,
    })
}
