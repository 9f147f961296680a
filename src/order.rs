//! Declaration ordering.
//!
//! Named schemas are emitted so that every schema follows the schemas it
//! references, and enums come before anything that does not need them later.
//! Reference cycles are condensed with Tarjan's algorithm; each cycle is
//! emitted as one contiguous group, ordered by name.

use std::collections::{BTreeSet, HashMap};

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::schema::{Additional, Items, Schema, SchemaKind};
use crate::store::reference_name;

/// A top-level schema awaiting emission.
#[derive(Debug, Clone, PartialEq)]
pub struct NamedSchema {
    pub name: String,
    pub schema: Schema,
    /// Names this schema refers to, in first-seen order.
    pub dependencies: Vec<String>,
}

impl NamedSchema {
    /// Wrap `schema`, collecting its dependencies from its structure.
    pub fn new(name: impl Into<String>, schema: Schema) -> Self {
        let name = name.into();
        let mut dependencies = Vec::new();
        collect_dependencies(&schema, true, &mut dependencies);
        dependencies.retain(|d| *d != name);
        Self {
            name,
            schema,
            dependencies,
        }
    }

    /// Add the dependencies of another form of the same schema, such as the
    /// composition it was unified from.
    pub fn with_dependencies_of(mut self, source: &Schema) -> Self {
        let mut more = Vec::new();
        collect_dependencies(source, true, &mut more);
        for name in more {
            if name != self.name && !self.dependencies.contains(&name) {
                self.dependencies.push(name);
            }
        }
        self
    }

    pub fn is_enum(&self) -> bool {
        matches!(self.schema.kind, SchemaKind::Enum { .. })
    }
}

/// Names referenced from `schema`: references, and titled subschemas.
/// Titled subschemas are not descended into.
pub fn dependencies(schema: &Schema) -> Vec<String> {
    let mut out = Vec::new();
    collect_dependencies(schema, true, &mut out);
    out
}

/// Order schemas for emission.
///
/// Dependencies precede dependents. Among schemas whose dependencies are all
/// emitted, enums go first, then input order decides. Members of a
/// reference cycle are emitted together, sorted by name.
pub fn order(schemas: Vec<NamedSchema>) -> Vec<NamedSchema> {
    let index: HashMap<&str, usize> = schemas
        .iter()
        .enumerate()
        .map(|(i, s)| (s.name.as_str(), i))
        .collect();

    // edge dependency -> dependent
    let mut graph = DiGraph::<usize, ()>::new();
    let nodes: Vec<NodeIndex> = (0..schemas.len()).map(|i| graph.add_node(i)).collect();
    for (i, schema) in schemas.iter().enumerate() {
        for dep in &schema.dependencies {
            if let Some(&j) = index.get(dep.as_str()) {
                if j != i {
                    graph.update_edge(nodes[j], nodes[i], ());
                }
            }
        }
    }

    let components = tarjan_scc(&graph);
    let mut component_of = vec![0; schemas.len()];
    for (c, members) in components.iter().enumerate() {
        for node in members {
            component_of[graph[*node]] = c;
        }
    }

    let mut successors: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); components.len()];
    let mut indegree = vec![0usize; components.len()];
    for edge in graph.raw_edges() {
        let from = component_of[graph[edge.source()]];
        let to = component_of[graph[edge.target()]];
        if from != to && successors[from].insert(to) {
            indegree[to] += 1;
        }
    }

    // (not an enum group, first input position, component)
    let key = |c: usize| {
        let members = &components[c];
        let all_enums = members.iter().all(|n| schemas[graph[*n]].is_enum());
        let first = members.iter().map(|n| graph[*n]).min().unwrap_or(usize::MAX);
        (!all_enums, first, c)
    };

    let mut ready: BTreeSet<(bool, usize, usize)> = (0..components.len())
        .filter(|c| indegree[*c] == 0)
        .map(key)
        .collect();

    let mut emitted: Vec<usize> = Vec::with_capacity(schemas.len());
    while let Some(next) = ready.pop_first() {
        let c = next.2;
        let mut members: Vec<usize> = components[c].iter().map(|n| graph[*n]).collect();
        members.sort_by(|a, b| schemas[*a].name.cmp(&schemas[*b].name));
        emitted.extend(members);

        for &succ in &successors[c] {
            indegree[succ] -= 1;
            if indegree[succ] == 0 {
                ready.insert(key(succ));
            }
        }
    }

    let mut slots: Vec<Option<NamedSchema>> = schemas.into_iter().map(Some).collect();
    emitted
        .into_iter()
        .filter_map(|i| slots[i].take())
        .collect()
}

fn collect_dependencies(schema: &Schema, root: bool, out: &mut Vec<String>) {
    if !root {
        if let Some(title) = &schema.title {
            push_unique(out, title);
            return;
        }
    }

    match &schema.kind {
        SchemaKind::Ref(reference) => push_unique(out, reference_name(reference)),
        SchemaKind::Object(object) => {
            for property in object.properties.values() {
                collect_dependencies(property, false, out);
            }
            if let Some(Additional::Schema(value)) = &object.additional {
                collect_dependencies(value, false, out);
            }
            for value in object.pattern_properties.values() {
                collect_dependencies(value, false, out);
            }
        }
        SchemaKind::Array(Items::Single(item)) => collect_dependencies(item, false, out),
        SchemaKind::Array(Items::Tuple(items))
        | SchemaKind::AllOf(items)
        | SchemaKind::AnyOf(items) => {
            for item in items {
                collect_dependencies(item, false, out);
            }
        }
        _ => {}
    }
}

fn push_unique(out: &mut Vec<String>, name: &str) {
    if !out.iter().any(|n| n == name) {
        out.push(name.to_string());
    }
}
