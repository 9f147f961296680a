//! End-to-end resolution and projection.
//!
//! Per module: dereference, parse, unify and promote every named schema and
//! every method parameter and result, order the declarations, then project
//! them. All mutable state of a run (the registry of synthesized schemas and
//! the projector's recursion guard) is owned by that run.

use std::collections::HashMap;

use rayon::prelude::*;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::compose::Unifier;
use crate::document::{ContentDescriptor, Document, Method};
use crate::error::{ErrorReport, ResolveError};
use crate::events::event_payload;
use crate::names::nested_name;
use crate::order::{order, NamedSchema};
use crate::profile::LanguageProfile;
use crate::project::{Projector, Shape};
use crate::promote::{registry_ref, Promoter, Registry};
use crate::resolver::Dereferencer;
use crate::schema::Schema;
use crate::store::DocumentStore;
use crate::types::ProjectOptions;

/// What to resolve within a module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// A named schema, by key or title.
    Schema(String),
    /// A method, by name.
    Method(String),
}

/// A projected named schema.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Declaration {
    pub name: String,
    pub type_ref: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub shape: Shape,
}

/// A projected method parameter or result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectedParam {
    pub name: String,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub type_ref: String,
    pub shape: Shape,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectedMethod {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub event: bool,
    pub params: Vec<ProjectedParam>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ProjectedParam>,
}

/// Projection of one target, with the synthesized schemas it refers to.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "target", rename_all = "camelCase")]
pub enum Projected {
    Schema {
        declaration: Declaration,
        supporting: Vec<Declaration>,
    },
    Method {
        method: ProjectedMethod,
        supporting: Vec<Declaration>,
    },
}

/// Everything generated for one module.
#[derive(Debug, Clone, Serialize)]
pub struct ModuleOutput {
    pub module: String,
    /// Declarations in emission order.
    pub declarations: Vec<Declaration>,
    pub methods: Vec<ProjectedMethod>,
    /// Schemas and methods that failed; the rest of the module is still
    /// generated.
    pub errors: Vec<ErrorReport>,
}

/// Resolve and project a single schema or method.
///
/// # Errors
///
/// Returns `ResolveError::UnknownTarget` when the module has no such schema
/// or method, or the first error raised while resolving or projecting it.
pub fn resolve_and_project(
    document: &Document,
    store: &DocumentStore,
    target: &Target,
    profile: &dyn LanguageProfile,
    options: &ProjectOptions,
) -> Result<Projected, ResolveError> {
    let mut session = Session::new(document, store, profile.supports_unions());

    match target {
        Target::Schema(name) => {
            let (key, pointer, value) = find_schema(document, name)?;
            let named = session.resolve_named(&key, &pointer, value)?;
            let supporting = session.take_registry();

            let mut projector = Projector::new(profile, options, store, document).at(pointer);
            let declaration = project_declaration(&mut projector, &named)?;
            let supporting = project_registry(&mut projector, supporting)?;
            Ok(Projected::Schema {
                declaration,
                supporting,
            })
        }
        Target::Method(name) => {
            let (index, method) = find_method(document, name)?;
            let resolved = session.resolve_method(index, &method)?;
            let supporting = session.take_registry();

            let method = project_method(document, store, profile, options, &resolved)?;
            let mut projector = Projector::new(profile, options, store, document);
            let supporting = project_registry(&mut projector, supporting)?;
            Ok(Projected::Method { method, supporting })
        }
    }
}

/// Canonical JSON of a schema or method: references inlined (except
/// cycles) and compositions collapsed, before promotion.
///
/// # Errors
///
/// Same as [`resolve_and_project`].
pub fn resolve_target(
    document: &Document,
    store: &DocumentStore,
    target: &Target,
    preserve_unions: bool,
) -> Result<Value, ResolveError> {
    let mut session = Session::new(document, store, preserve_unions);

    match target {
        Target::Schema(name) => {
            let (_, pointer, value) = find_schema(document, name)?;
            let (_, unified) = session.canonical(value, &pointer)?;
            Ok(unified.to_value())
        }
        Target::Method(name) => {
            let (index, method) = find_method(document, name)?;
            let mut params = Vec::with_capacity(method.params.len());
            for (j, param) in method.params.iter().enumerate() {
                let pointer = format!("#/methods/{}/params/{}/schema", index, j);
                let (_, unified) = session.canonical(&param.schema, &pointer)?;
                params.push(json!({
                    "name": param.name,
                    "required": param.required,
                    "schema": unified.to_value(),
                }));
            }
            let result = match &method.result {
                Some(result) => {
                    let pointer = format!("#/methods/{}/result/schema", index);
                    let (_, unified) = session.canonical(&result.schema, &pointer)?;
                    json!({ "name": result.name, "schema": unified.to_value() })
                }
                None => Value::Null,
            };
            Ok(json!({ "name": method.name, "params": params, "result": result }))
        }
    }
}

/// Generate every declaration and method of a module.
///
/// Failures are collected per schema or method and reported in
/// [`ModuleOutput::errors`]; they do not stop the rest of the module.
pub fn generate_module(
    document: &Document,
    store: &DocumentStore,
    profile: &dyn LanguageProfile,
    options: &ProjectOptions,
) -> ModuleOutput {
    let mut session = Session::new(document, store, profile.supports_unions());
    let mut errors = Vec::new();
    let mut report = |err: ResolveError, method: Option<&str>| {
        warn!(module = %document.title(), method, error = %err, "skipping");
        let mut entry = ErrorReport::from(&err);
        if let Some(method) = method {
            entry = entry.in_method(method);
        }
        errors.push(entry);
    };

    let mut named = Vec::new();
    let mut pointers = HashMap::new();
    for (key, pointer, value) in document.named_schemas() {
        match session.resolve_named(&key, &pointer, value) {
            Ok(schema) => {
                pointers.insert(schema.name.clone(), pointer);
                named.push(schema);
            }
            Err(err) => report(err, None),
        }
    }

    let methods = document.methods().unwrap_or_else(|err| {
        report(err, None);
        Vec::new()
    });
    let mut resolved_methods = Vec::with_capacity(methods.len());
    for (index, method) in &methods {
        match session.resolve_method(*index, method) {
            Ok(resolved) => resolved_methods.push(resolved),
            Err(err) => report(err, Some(&method.name)),
        }
    }

    for (name, schema) in session.take_registry().into_entries() {
        named.push(NamedSchema::new(name, schema));
    }

    let mut projector = Projector::new(profile, options, store, document);
    let mut declarations = Vec::with_capacity(named.len());
    for schema in order(named) {
        match pointers.get(&schema.name) {
            Some(pointer) => projector.set_path(pointer.as_str()),
            None => projector.set_path(registry_ref(&schema.name)),
        }
        match project_declaration(&mut projector, &schema) {
            Ok(declaration) => declarations.push(declaration),
            Err(err) => report(err, None),
        }
    }

    let mut projected_methods = Vec::with_capacity(resolved_methods.len());
    for resolved in &resolved_methods {
        match project_method(document, store, profile, options, resolved) {
            Ok(method) => projected_methods.push(method),
            Err(err) => report(err, Some(&resolved.method.name)),
        }
    }

    info!(
        module = %document.title(),
        declarations = declarations.len(),
        methods = projected_methods.len(),
        errors = errors.len(),
        "generated module"
    );

    ModuleOutput {
        module: document.title().to_string(),
        declarations,
        methods: projected_methods,
        errors,
    }
}

/// Generate several modules in parallel, one isolated run per module.
///
/// The store is shared read-only; output order follows `documents`.
pub fn generate_modules(
    documents: &[Document],
    store: &DocumentStore,
    profile: &dyn LanguageProfile,
    options: &ProjectOptions,
) -> Vec<ModuleOutput> {
    documents
        .par_iter()
        .map(|document| generate_module(document, store, profile, options))
        .collect()
}

// --- Internal implementation ---

/// A method whose parameter and result schemas are resolved and promoted.
struct ResolvedMethod<'d> {
    index: usize,
    method: &'d Method,
    params: Vec<(&'d ContentDescriptor, Schema)>,
    result: Option<(&'d ContentDescriptor, Schema)>,
}

/// Per-run resolution state for one module.
struct Session<'a> {
    document: &'a Document,
    store: &'a DocumentStore,
    unifier: Unifier,
}

impl<'a> Session<'a> {
    fn new(document: &'a Document, store: &'a DocumentStore, preserve_unions: bool) -> Self {
        let mut reserved = Vec::new();
        for (key, _, value) in document.named_schemas() {
            if let Some(title) = value.get("title").and_then(Value::as_str) {
                reserved.push(title.to_string());
            }
            reserved.push(key);
        }

        Self {
            document,
            store,
            unifier: Unifier::new()
                .preserve_unions(preserve_unions)
                .with_registry(Registry::reserving(reserved)),
        }
    }

    /// Dereference, parse and unify. Returns the parsed schema alongside the
    /// unified one.
    fn canonical(&mut self, value: &Value, pointer: &str) -> Result<(Schema, Schema), ResolveError> {
        let title = self.document.title();
        let resolved = Dereferencer::new(self.store).resolve_at(value, self.document, pointer)?;
        if !resolved.unresolved.is_empty() {
            debug!(
                module = %title,
                pointer,
                cycles = resolved.unresolved.len(),
                "recursive references left in place"
            );
        }
        let parsed = Schema::parse(&resolved.schema, title, pointer)?;
        let unified = self
            .unifier
            .unify(&parsed)
            .map_err(|e| ResolveError::from_unify(e, title, pointer))?;
        Ok((parsed, unified))
    }

    fn resolve_named(
        &mut self,
        key: &str,
        pointer: &str,
        value: &Value,
    ) -> Result<NamedSchema, ResolveError> {
        let (parsed, mut unified) = self.canonical(value, pointer)?;
        let name = unified.title.clone().unwrap_or_else(|| key.to_string());
        unified.title = Some(name.clone());
        Promoter::new(self.unifier.registry_mut()).promote(&mut unified, &name);
        Ok(NamedSchema::new(name, unified).with_dependencies_of(&parsed))
    }

    fn resolve_method<'d>(
        &mut self,
        index: usize,
        method: &'d Method,
    ) -> Result<ResolvedMethod<'d>, ResolveError> {
        let mut params = Vec::with_capacity(method.params.len());
        for (j, param) in method.params.iter().enumerate() {
            let pointer = format!("#/methods/{}/params/{}/schema", index, j);
            let (_, mut schema) = self.canonical(&param.schema, &pointer)?;
            Promoter::new(self.unifier.registry_mut())
                .lift(&mut schema, &nested_name(&method.name, &param.name));
            params.push((param, schema));
        }

        let result = match &method.result {
            Some(result) => {
                let pointer = format!("#/methods/{}/result/schema", index);
                let (_, mut schema) = self.canonical(&result.schema, &pointer)?;
                Promoter::new(self.unifier.registry_mut())
                    .lift(&mut schema, &nested_name(&method.name, &result.name));
                Some((result, schema))
            }
            None => None,
        };

        Ok(ResolvedMethod {
            index,
            method,
            params,
            result,
        })
    }

    fn take_registry(&mut self) -> Registry {
        std::mem::take(self.unifier.registry_mut())
    }
}

fn find_schema<'d>(
    document: &'d Document,
    name: &str,
) -> Result<(String, String, &'d Value), ResolveError> {
    document
        .named_schemas()
        .into_iter()
        .find(|(key, _, value)| {
            key == name || value.get("title").and_then(Value::as_str) == Some(name)
        })
        .ok_or_else(|| ResolveError::UnknownTarget {
            document: document.title().to_string(),
            name: name.to_string(),
        })
}

fn find_method(document: &Document, name: &str) -> Result<(usize, Method), ResolveError> {
    document
        .methods()?
        .into_iter()
        .find(|(_, method)| method.name == name)
        .ok_or_else(|| ResolveError::UnknownTarget {
            document: document.title().to_string(),
            name: name.to_string(),
        })
}

fn project_declaration(
    projector: &mut Projector<'_>,
    named: &NamedSchema,
) -> Result<Declaration, ResolveError> {
    Ok(Declaration {
        name: named.name.clone(),
        type_ref: projector.type_ref(&named.schema)?,
        description: named.schema.description.clone(),
        shape: projector.shape(&named.schema)?,
    })
}

fn project_registry(
    projector: &mut Projector<'_>,
    registry: Registry,
) -> Result<Vec<Declaration>, ResolveError> {
    let named: Vec<NamedSchema> = registry
        .into_entries()
        .into_iter()
        .map(|(name, schema)| NamedSchema::new(name, schema))
        .collect();
    order(named)
        .iter()
        .map(|schema| {
            projector.set_path(registry_ref(&schema.name));
            project_declaration(projector, schema)
        })
        .collect()
}

fn project_method(
    document: &Document,
    store: &DocumentStore,
    profile: &dyn LanguageProfile,
    options: &ProjectOptions,
    resolved: &ResolvedMethod<'_>,
) -> Result<ProjectedMethod, ResolveError> {
    let method = resolved.method;
    let event = method.is_event();

    let mut params = Vec::with_capacity(resolved.params.len());
    let param_options = options.clone().event_context(false);
    for (j, (param, schema)) in resolved.params.iter().enumerate() {
        let mut projector = Projector::new(profile, &param_options, store, document)
            .at(format!("#/methods/{}/params/{}/schema", resolved.index, j));
        params.push(ProjectedParam {
            name: param.name.clone(),
            required: param.required,
            summary: param.summary.clone(),
            type_ref: projector.type_ref(schema)?,
            shape: projector.use_shape(schema)?,
        });
    }

    let result_options = options.clone().event_context(event || options.event_context);
    let result = match &resolved.result {
        Some((descriptor, schema)) => {
            let schema = if event { event_payload(schema) } else { schema };
            let mut projector = Projector::new(profile, &result_options, store, document)
                .at(format!("#/methods/{}/result/schema", resolved.index));
            Some(ProjectedParam {
                name: descriptor.name.clone(),
                required: true,
                summary: descriptor.summary.clone(),
                type_ref: projector.type_ref(schema)?,
                shape: projector.use_shape(schema)?,
            })
        }
        None => None,
    };

    Ok(ProjectedMethod {
        name: method.name.clone(),
        summary: method.summary.clone(),
        event,
        params,
        result,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::Profile;
    use crate::project::Property;

    fn module(value: Value) -> Document {
        Document::from_value(value).unwrap()
    }

    fn foo_base() -> Document {
        module(json!({
            "info": { "title": "Shapes" },
            "methods": [],
            "components": {
                "schemas": {
                    "Foo": {
                        "allOf": [
                            { "$ref": "#/components/schemas/Base" },
                            { "type": "object", "properties": { "x": { "type": "integer" } }, "required": ["x"] }
                        ]
                    },
                    "Base": {
                        "type": "object",
                        "properties": { "y": { "type": "string" } },
                        "required": ["y"]
                    }
                }
            }
        }))
    }

    fn property<'p>(properties: &'p [Property], name: &str) -> &'p Property {
        properties.iter().find(|p| p.name == name).unwrap()
    }

    #[test]
    fn foo_extends_base() {
        let document = foo_base();
        let store = DocumentStore::new();
        let output = generate_module(&document, &store, &Profile::typescript(), &ProjectOptions::new());

        assert!(output.errors.is_empty(), "{:?}", output.errors);
        let names: Vec<&str> = output.declarations.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["Base", "Foo"]);

        let foo = &output.declarations[1];
        let Shape::Object { properties, .. } = &foo.shape else {
            panic!("expected object, got {:?}", foo.shape);
        };
        assert_eq!(properties.len(), 2);
        let x = property(properties, "x");
        assert!(x.required);
        assert_eq!(x.type_ref, "number");
        let y = property(properties, "y");
        assert!(y.required);
        assert_eq!(y.type_ref, "string");
    }

    #[test]
    fn resolve_and_project_single_schema() {
        let document = foo_base();
        let store = DocumentStore::new();
        let projected = resolve_and_project(
            &document,
            &store,
            &Target::Schema("Foo".into()),
            &Profile::typescript(),
            &ProjectOptions::new(),
        )
        .unwrap();

        let Projected::Schema { declaration, supporting } = projected else {
            panic!("expected schema projection");
        };
        assert_eq!(declaration.type_ref, "Foo");
        assert!(supporting.is_empty());
    }

    #[test]
    fn unknown_target() {
        let document = foo_base();
        let store = DocumentStore::new();
        let err = resolve_and_project(
            &document,
            &store,
            &Target::Method("nope".into()),
            &Profile::typescript(),
            &ProjectOptions::new(),
        )
        .unwrap_err();
        assert!(matches!(err, ResolveError::UnknownTarget { ref name, .. } if name == "nope"));
    }

    #[test]
    fn event_method_projects_payload() {
        let document = module(json!({
            "info": { "title": "Device" },
            "methods": [
                {
                    "name": "onNameChanged",
                    "tags": [{ "name": "event" }],
                    "params": [{ "name": "listen", "required": true, "schema": { "type": "boolean" } }],
                    "result": {
                        "name": "name",
                        "schema": {
                            "anyOf": [
                                { "$ref": "#/components/schemas/ListenResponse" },
                                { "type": "string" }
                            ]
                        }
                    }
                }
            ],
            "components": {
                "schemas": {
                    "ListenResponse": {
                        "type": "object",
                        "properties": { "event": { "type": "string" }, "listening": { "type": "boolean" } },
                        "required": ["event", "listening"]
                    }
                }
            }
        }));
        let store = DocumentStore::new();
        let options = ProjectOptions::new().primitive_proxy(crate::types::Primitive::String, "EventString");
        let projected = resolve_and_project(
            &document,
            &store,
            &Target::Method("onNameChanged".into()),
            &Profile::typescript(),
            &options,
        )
        .unwrap();

        let Projected::Method { method, .. } = projected else {
            panic!("expected method projection");
        };
        assert!(method.event);
        assert_eq!(method.params[0].type_ref, "boolean");
        assert_eq!(method.result.unwrap().type_ref, "EventString");
    }

    #[test]
    fn inline_param_object_is_promoted() {
        let document = module(json!({
            "info": { "title": "Device" },
            "methods": [
                {
                    "name": "setup",
                    "params": [{
                        "name": "options",
                        "schema": { "type": "object", "properties": { "verbose": { "type": "boolean" } } }
                    }],
                    "result": { "name": "ok", "schema": { "type": "boolean" } }
                }
            ]
        }));
        let store = DocumentStore::new();
        let output = generate_module(&document, &store, &Profile::typescript(), &ProjectOptions::new());

        assert_eq!(output.declarations.len(), 1);
        assert_eq!(output.declarations[0].name, "SetupOptions");
        assert_eq!(output.methods[0].params[0].type_ref, "SetupOptions");
        assert!(!output.methods[0].params[0].required);
    }

    #[test]
    fn failing_schema_does_not_abort_module() {
        let document = module(json!({
            "info": { "title": "Broken" },
            "methods": [
                {
                    "name": "lookup",
                    "params": [],
                    "result": { "name": "value", "schema": { "$ref": "#/components/schemas/Gone" } }
                }
            ],
            "components": {
                "schemas": {
                    "Bad": { "allOf": [{ "type": "string" }, { "type": "integer" }] },
                    "Missing": { "$ref": "#/components/schemas/Nowhere" },
                    "Good": { "type": "string" }
                }
            }
        }));
        let store = DocumentStore::new();
        let output = generate_module(&document, &store, &Profile::typescript(), &ProjectOptions::new());

        assert_eq!(output.declarations.len(), 1);
        assert_eq!(output.declarations[0].name, "Good");
        assert!(output.methods.is_empty());
        assert_eq!(output.errors.len(), 3);
        assert!(output.errors.iter().all(|e| e.document == "Broken"));

        let paths: Vec<Option<&str>> = output.errors.iter().map(|e| e.path.as_deref()).collect();
        assert_eq!(
            paths,
            vec![
                Some("#/components/schemas/Bad"),
                Some("#/components/schemas/Missing"),
                Some("#/methods/0/result/schema"),
            ]
        );
        assert_eq!(output.errors[0].method, None);
        assert_eq!(output.errors[2].method.as_deref(), Some("lookup"));
    }

    #[test]
    fn titled_bundle_schema_is_referenced_not_repromoted() {
        let mut store = DocumentStore::new();
        store.register(
            "https://example.com/types",
            module(json!({
                "$id": "https://example.com/types",
                "title": "Types",
                "definitions": {
                    "Bar": {
                        "type": "object",
                        "properties": {
                            "opts": { "type": "object", "properties": { "fast": { "type": "boolean" } } }
                        }
                    }
                }
            })),
        );
        let document = module(json!({
            "info": { "title": "Device" },
            "methods": [
                {
                    "name": "configure",
                    "params": [
                        { "name": "bar", "schema": { "$ref": "https://example.com/types#/definitions/Bar" } },
                        { "name": "mode", "schema": { "type": "string", "enum": ["a", "b"] } }
                    ],
                    "result": { "name": "ok", "schema": { "type": "boolean" } }
                }
            ]
        }));
        let output = generate_module(&document, &store, &Profile::typescript(), &ProjectOptions::new());

        assert!(output.errors.is_empty(), "{:?}", output.errors);
        let names: Vec<&str> = output.declarations.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["ConfigureMode"]);

        let params = &output.methods[0].params;
        assert_eq!(params[0].type_ref, "Types.Bar");
        assert_eq!(
            params[0].shape,
            Shape::Reference { name: "Bar".into(), type_ref: "Types.Bar".into() }
        );
        assert_eq!(
            params[1].shape,
            Shape::Reference { name: "ConfigureMode".into(), type_ref: "ConfigureMode".into() }
        );
    }

    #[test]
    fn modules_generate_in_parallel_in_input_order() {
        let documents = vec![
            foo_base(),
            module(json!({ "info": { "title": "Other" }, "components": { "schemas": { "Id": { "type": "string" } } } })),
        ];
        let store = DocumentStore::new();
        let outputs = generate_modules(&documents, &store, &Profile::typescript(), &ProjectOptions::new());
        let modules: Vec<&str> = outputs.iter().map(|o| o.module.as_str()).collect();
        assert_eq!(modules, vec!["Shapes", "Other"]);
    }

    #[test]
    fn resolve_target_returns_canonical_json() {
        let document = foo_base();
        let store = DocumentStore::new();
        let value = resolve_target(&document, &store, &Target::Schema("Foo".into()), true).unwrap();
        assert_eq!(value["title"], "Foo");
        assert_eq!(value["properties"]["x"]["type"], "integer");
        assert_eq!(value["properties"]["y"]["type"], "string");
    }
}
