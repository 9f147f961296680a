//! Subschema promotion.
//!
//! Anonymous nested objects and string enums are lifted into a per-run
//! [`Registry`] under synthesized names, and replaced in place by a reference
//! to the new entry, so targets without anonymous nominal types can name them.

use std::collections::HashSet;

use indexmap::IndexMap;
use tracing::debug;

use crate::events::is_subscription_ack;
use crate::names::nested_name;
use crate::schema::{Additional, Items, Schema, SchemaKind};

/// Pointer prefix of references to registered schemas.
pub const REGISTRY_PREFIX: &str = "#/components/schemas/";

/// Schemas synthesized during one generation run.
///
/// Names are unique: registering identical content under a name returns the
/// existing entry, different content gets a numeric suffix.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    entries: IndexMap<String, Schema>,
    reserved: HashSet<String>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry that never hands out the given names, typically the names
    /// already declared by the module being generated.
    pub fn reserving<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            entries: IndexMap::new(),
            reserved: names.into_iter().map(Into::into).collect(),
        }
    }

    /// Register `schema` under `name`, or under the first free `name2`,
    /// `name3`, ... when `name` already holds different content.
    ///
    /// Returns the name the schema is registered under. The stored schema is
    /// titled with that name.
    pub fn insert(&mut self, name: &str, mut schema: Schema) -> String {
        let mut candidate = name.to_string();
        let mut suffix = 1;
        loop {
            schema.title = Some(candidate.clone());
            match self.entries.get(&candidate) {
                Some(existing) if *existing == schema => return candidate,
                None if !self.reserved.contains(&candidate) => {
                    self.entries.insert(candidate.clone(), schema);
                    return candidate;
                }
                _ => {
                    suffix += 1;
                    candidate = format!("{}{}", name, suffix);
                }
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&Schema> {
        self.entries.get(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in registration order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &Schema)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn into_entries(self) -> IndexMap<String, Schema> {
        self.entries
    }
}

/// Reference string for a registered name.
pub fn registry_ref(name: &str) -> String {
    format!("{}{}", REGISTRY_PREFIX, name)
}

/// Lifts anonymous subschemas into a [`Registry`].
pub struct Promoter<'r> {
    registry: &'r mut Registry,
}

impl<'r> Promoter<'r> {
    pub fn new(registry: &'r mut Registry) -> Self {
        Self { registry }
    }

    /// Promote the anonymous subschemas of a top-level named schema. The
    /// schema itself stays in place.
    pub fn promote(&mut self, schema: &mut Schema, name: &str) {
        self.visit(schema, name);
    }

    /// Promote `schema` itself when it is anonymous and promotable, naming it
    /// `name`. Used for method parameters and results.
    ///
    /// A titled schema is declared on its own, so its subschemas are left to
    /// that declaration.
    pub fn lift(&mut self, schema: &mut Schema, name: &str) {
        if schema.title.is_some() {
            return;
        }
        if !is_promotable(schema) {
            self.visit(schema, name);
            return;
        }

        schema.title = Some(name.to_string());
        self.visit(schema, name);
        let lifted = std::mem::take(schema);
        let registered = self.registry.insert(name, lifted);
        debug!(name = %registered, "promoted anonymous schema");
        *schema = Schema::reference(registry_ref(&registered)).with_title(registered);
    }

    fn visit(&mut self, schema: &mut Schema, hint: &str) {
        let owner = schema.title.clone().unwrap_or_else(|| hint.to_string());

        match &mut schema.kind {
            SchemaKind::Object(object) => {
                for (key, property) in object.properties.iter_mut() {
                    self.lift(property, &nested_name(&owner, key));
                }
                if let Some(Additional::Schema(value)) = &mut object.additional {
                    self.lift(value, &nested_name(&owner, "value"));
                }
                for value in object.pattern_properties.values_mut() {
                    self.lift(value, &nested_name(&owner, "value"));
                }
            }
            // the item schema takes the array's name
            SchemaKind::Array(Items::Single(item)) => self.lift(item, hint),
            SchemaKind::Array(Items::Tuple(items)) => {
                for (i, item) in items.iter_mut().enumerate() {
                    self.lift(item, &format!("{}{}", hint, i));
                }
            }
            SchemaKind::AnyOf(branches) | SchemaKind::AllOf(branches) => {
                for branch in branches {
                    self.lift(branch, hint);
                }
            }
            _ => {}
        }
    }
}

/// Untitled objects with declared properties and untitled string enums.
fn is_promotable(schema: &Schema) -> bool {
    if is_subscription_ack(schema) {
        return false;
    }
    match &schema.kind {
        SchemaKind::Object(object) => !object.properties.is_empty(),
        SchemaKind::Enum { .. } => schema.is_string_enum(),
        _ => false,
    }
}
