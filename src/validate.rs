//! Required-ness checks over a finished graph.
//!
//! Validation never stops at the first problem: every node reachable from the
//! root is visited once and each violation is recorded.

use std::collections::HashSet;
use std::fmt;

use crate::error::{BindError, Result};
use crate::graph::{Graph, NodeId, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationKind {
    /// A required property resolved to null.
    RequiredValueMissing,
    /// A required list property resolved to an empty list.
    RequiredElementsMissing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// Unique identifier of the owning node, see [`Graph::unique_id`].
    pub node: String,
    pub class: String,
    pub property: String,
    pub kind: ViolationKind,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ViolationKind::RequiredValueMissing => {
                write!(f, "{}->{} is required.", self.node, self.property)
            }
            ViolationKind::RequiredElementsMissing => write!(
                f,
                "{}->{} is required to have array elements.",
                self.node, self.property
            ),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Violations(Vec<Violation>);

impl Violations {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Violation> {
        self.0.iter()
    }

    pub fn into_inner(self) -> Vec<Violation> {
        self.0
    }
}

impl<'a> IntoIterator for &'a Violations {
    type Item = &'a Violation;
    type IntoIter = std::slice::Iter<'a, Violation>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for Violations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, v) in self.0.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "  - {v}")?;
        }
        Ok(())
    }
}

/// Collects the violations of the whole graph, depth first in schema order.
pub fn validate(graph: &Graph) -> Violations {
    validate_node(graph, graph.root_id())
}

/// Collects the violations of the subtree rooted at `id`.
pub fn validate_node(graph: &Graph, id: NodeId) -> Violations {
    let mut out = Vec::new();
    let mut visited = HashSet::new();
    walk(graph, id, &mut visited, &mut out);
    Violations(out)
}

/// `Ok` when the graph has no violations, otherwise all of them at once.
pub fn check(graph: &Graph) -> Result<()> {
    let violations = validate(graph);
    if violations.is_empty() {
        Ok(())
    } else {
        tracing::debug!(count = violations.len(), "graph failed validation");
        Err(BindError::ValidationFailed(violations))
    }
}

fn walk(graph: &Graph, id: NodeId, visited: &mut HashSet<NodeId>, out: &mut Vec<Violation>) {
    if !visited.insert(id) {
        return;
    }
    let node = graph.node(id);
    let schema = node.schema();
    for (name, property) in schema.properties() {
        let value = node.value(name).unwrap_or(&Value::Null);
        if property.required() {
            let kind = if value.is_null() {
                Some(ViolationKind::RequiredValueMissing)
            } else if value.is_empty_list() {
                Some(ViolationKind::RequiredElementsMissing)
            } else {
                None
            };
            if let Some(kind) = kind {
                out.push(Violation {
                    node: node.unique_id(),
                    class: schema.name().to_string(),
                    property: name.clone(),
                    kind,
                });
            }
        }
        match value {
            Value::Node(child) => walk(graph, *child, visited, out),
            Value::Nodes(children) => {
                for child in children {
                    walk(graph, *child, visited, out);
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::Loader;
    use crate::property::PropertyDef;
    use crate::schema::{ClassDef, SchemaRegistry};
    use serde_json::json;

    fn registry() -> SchemaRegistry {
        let mut registry = SchemaRegistry::new();
        registry
            .register(
                ClassDef::new("Project")
                    .property(PropertyDef::new("name", "string").required())
                    .property(PropertyDef::new("items", "Item[]").required()),
            )
            .register(
                ClassDef::new("Item")
                    .identifier("id")
                    .property(PropertyDef::new("id", "string"))
                    .property(PropertyDef::new("title", "string").required()),
            );
        registry
    }

    #[test]
    fn reports_every_violation_in_one_pass() {
        let registry = registry();
        let graph = Loader::new(&registry)
            .load_value("Project", &json!({"items": [{"id": "a"}, {}]}))
            .unwrap();
        let violations = validate(&graph);
        let lines: Vec<_> = violations.iter().map(ToString::to_string).collect();
        assert_eq!(
            lines,
            [
                "Project at $->name is required.",
                "Item(a)->title is required.",
                "Item at $.items[1]->title is required.",
            ]
        );
    }

    #[test]
    fn empty_required_lists_are_reported_separately() {
        let registry = registry();
        let graph = Loader::new(&registry)
            .load_value("Project", &json!({"name": "p", "items": []}))
            .unwrap();
        let violations = validate(&graph).into_inner();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].kind, ViolationKind::RequiredElementsMissing);
        assert_eq!(violations[0].property, "items");
        assert_eq!(
            violations[0].to_string(),
            "Project at $->items is required to have array elements."
        );
    }

    #[test]
    fn check_wraps_violations_in_an_error() {
        let registry = registry();
        let loader = Loader::new(&registry);
        let ok = loader
            .load_value("Project", &json!({"name": "p", "items": [{"title": "t"}]}))
            .unwrap();
        assert!(check(&ok).is_ok());

        let bad = loader.load_value("Project", &json!({})).unwrap();
        match check(&bad) {
            Err(BindError::ValidationFailed(v)) => {
                assert_eq!(v.len(), 2);
                assert!(v.to_string().starts_with("  - Project at $->name"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
