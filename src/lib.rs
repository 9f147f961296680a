//! OpenRPC Shapes
//!
//! Schema resolution and type-shape synthesis for OpenRPC code generation.
//!
//! This library turns the schemas of an OpenRPC document (and the shared
//! schema bundles it references) into canonical, composition-free schemas,
//! and projects those into language-neutral type shapes rendered through a
//! [`LanguageProfile`].
//!
//! # Example
//!
//! ```
//! use openrpc_shapes::{generate_module, Document, DocumentStore, Profile, ProjectOptions};
//! use serde_json::json;
//!
//! let document = Document::from_value(json!({
//!     "info": { "title": "Device" },
//!     "methods": [],
//!     "components": {
//!         "schemas": {
//!             "Foo": {
//!                 "allOf": [
//!                     { "$ref": "#/components/schemas/Base" },
//!                     { "type": "object", "properties": { "x": { "type": "integer" } } }
//!                 ]
//!             },
//!             "Base": { "type": "object", "properties": { "y": { "type": "string" } } }
//!         }
//!     }
//! }))
//! .unwrap();
//!
//! let store = DocumentStore::new();
//! let output = generate_module(&document, &store, &Profile::typescript(), &ProjectOptions::new());
//!
//! // Base is declared before Foo, which depends on it
//! let names: Vec<&str> = output.declarations.iter().map(|d| d.name.as_str()).collect();
//! assert_eq!(names, ["Base", "Foo"]);
//! ```
//!
//! # Pipeline
//!
//! | Stage | Input | Output |
//! |-------|-------|--------|
//! | [`Dereferencer`] | raw JSON node | references inlined, cycles left in place |
//! | [`Schema::parse`] | JSON | typed [`Schema`] |
//! | [`Unifier`] | `allOf`/`anyOf` trees | one merged schema (or a preserved union) |
//! | [`Promoter`] | anonymous objects and enums | named registry entries |
//! | [`order`] | named schemas | emission order |
//! | [`Projector`] | schema | [`Shape`] and type reference |
//!
//! # Composition Rules
//!
//! | Operands | `allOf` | `anyOf` |
//! |----------|---------|---------|
//! | same primitive | kept | kept |
//! | `integer` + `number` | `integer` | `number` |
//! | const + const | equal or error | enum of both |
//! | enum + enum | intersection (non-empty) | union |
//! | object + object | properties merged, `required` unioned | properties merged, `required` intersected |
//! | different types | error | two-branch union |
//! | `false` + any | `false` | the other operand |

mod compose;
mod document;
mod error;
mod events;
mod loader;
mod names;
mod order;
mod pipeline;
mod profile;
mod project;
mod promote;
mod resolver;
mod schema;
mod store;
mod types;

pub use compose::{combine, Unifier};
pub use document::{ContentDescriptor, Document, Method, Tag, SCHEMA_CONTAINERS};
pub use error::{ErrorReport, ResolveError, UnifyError};
pub use events::{event_payload, is_subscription_ack, payload_branch, SUBSCRIPTION_ACK};
pub use loader::{load_document, load_schema, load_schema_str, navigate_fragment};
pub use names::{enum_key, nested_name, pascal};
pub use order::{dependencies, order, NamedSchema};
pub use pipeline::{
    generate_module, generate_modules, resolve_and_project, resolve_target, Declaration,
    ModuleOutput, Projected, ProjectedMethod, ProjectedParam, Target,
};
pub use profile::{fill, LanguageProfile, Profile, TemplateKind};
pub use project::{EnumMember, IndexSignature, Projector, Property, Shape};
pub use promote::{registry_ref, Promoter, Registry, REGISTRY_PREFIX};
pub use resolver::{Dereferencer, Resolved, UnresolvedRef};
pub use schema::{Additional, Items, ObjectSchema, Schema, SchemaKind};
pub use store::{reference_name, split_reference, DocumentStore};
pub use types::{DerefOptions, Mode, Primitive, ProjectOptions};
