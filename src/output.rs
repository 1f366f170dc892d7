//! Renderings of a bound graph: an indented dump for people and a JSON export.
//!
//! Both print each node's own stored values. A property with a hook is read
//! through [`NodeRef::get`] so the computed value shows; nothing falls back to
//! an ancestor.

use std::fmt::Write as _;

use colored::Colorize;
use serde_json::{Map, Value as Json};

use crate::error::Result;
use crate::graph::{Graph, NodeId, NodeRef, PropertySource, Value};

/// Indented dump of the graph, one property per line. Scalars are listed
/// before nested nodes and lists; names are padded to the widest in the node.
pub fn show(graph: &Graph, color: bool) -> Result<String> {
    let mut out = String::new();
    let root = graph.root();
    let _ = write!(out, "{}", label(&root.unique_id(), color));
    show_node(&root, 1, color, &mut out)?;
    out.push('\n');
    Ok(out)
}

fn show_node(node: &NodeRef<'_>, level: usize, color: bool, out: &mut String) -> Result<()> {
    let stored = node.properties();
    let width = stored.keys().map(String::len).max().unwrap_or(0);

    let (nested, flat): (Vec<_>, Vec<_>) = stored
        .into_iter()
        .partition(|(_, v)| matches!(v, Value::Node(_)) || (is_list(v) && !v.is_empty_list()));

    for (name, _) in flat.into_iter().chain(nested) {
        let value = own_value(node, &name)?;
        pad(out, level, &name, width, color);
        match &value {
            Value::Node(id) => {
                let child = node.graph().node(*id);
                show_node(&child, level + 1, color, out)?;
            }
            Value::Nodes(ids) if ids.is_empty() => out.push_str("[]"),
            Value::Nodes(ids) => {
                for (index, id) in ids.iter().enumerate() {
                    pad(out, level + 1, &format!("[{index}]"), width, color);
                    let child = node.graph().node(*id);
                    let _ = write!(out, "{}", label(&child.unique_id(), color));
                    show_node(&child, level + 2, color, out)?;
                }
            }
            other => out.push_str(&scalar_text(other)),
        }
    }
    Ok(())
}

/// The node's own value for a declared property, with its hook applied.
fn own_value(node: &NodeRef<'_>, name: &str) -> Result<Value> {
    if node.schema().has_hook(name) {
        return node.get(name);
    }
    Ok(node.value(name).cloned().unwrap_or(Value::Null))
}

fn pad(out: &mut String, level: usize, name: &str, width: usize, color: bool) {
    out.push('\n');
    out.push_str(&"  ".repeat(level));
    let padded = format!("{:<width$}", format!("{name}:"), width = width + 1);
    if color {
        let _ = write!(out, "{} ", padded.cyan());
    } else {
        let _ = write!(out, "{padded} ");
    }
}

fn label(text: &str, color: bool) -> String {
    if color {
        text.bold().to_string()
    } else {
        text.to_string()
    }
}

fn is_list(v: &Value) -> bool {
    matches!(v, Value::Nodes(_) | Value::Json(Json::Array(_)))
}

fn scalar_text(v: &Value) -> String {
    match v {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Float(f) => f.to_string(),
        Value::String(s) => s.clone(),
        Value::Json(j) => j.to_string(),
        Value::Node(id) => format!("#{}", id.index()),
        Value::Nodes(ids) => format!("[{} nodes]", ids.len()),
    }
}

/// Exports the subtree at `id` as JSON: declared properties in schema order
/// (hooks applied), followed by captured extras.
pub fn to_json(graph: &Graph, id: NodeId) -> Result<Json> {
    let node = graph.node(id);
    let mut map = Map::new();
    for name in node.schema().properties().keys() {
        let value = own_value(&node, name)?;
        map.insert(name.clone(), value_to_json(graph, &value)?);
    }
    for (key, value) in node.extras() {
        map.entry(key.clone()).or_insert_with(|| value.clone());
    }
    Ok(Json::Object(map))
}

fn value_to_json(graph: &Graph, value: &Value) -> Result<Json> {
    Ok(match value {
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Integer(i) => Json::from(*i),
        Value::Float(f) => serde_json::Number::from_f64(*f)
            .map(Json::Number)
            .unwrap_or(Json::Null),
        Value::String(s) => Json::String(s.clone()),
        Value::Json(j) => j.clone(),
        Value::Node(id) => to_json(graph, *id)?,
        Value::Nodes(ids) => Json::Array(
            ids.iter()
                .map(|id| to_json(graph, *id))
                .collect::<Result<Vec<_>>>()?,
        ),
    })
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
                ClassDef::new("Site")
                    .property(PropertyDef::new("items", "Item[]"))
                    .property(PropertyDef::new("title", "string"))
                    .property(PropertyDef::new("live", "boolean")),
            )
            .register(
                ClassDef::new("Item")
                    .identifier("id")
                    .property(PropertyDef::new("id", "string")),
            );
        registry
    }

    #[test]
    fn show_lists_scalars_before_nested_values() {
        let registry = registry();
        let graph = Loader::new(&registry)
            .load_value("Site", &json!({"items": [{"id": "a"}], "title": "Home"}))
            .unwrap();
        let text = show(&graph, false).unwrap();
        let expected = "Site at $\n  \
                        title: Home\n  \
                        live:  null\n  \
                        items: \n    \
                        [0]:   Item(a)\n      \
                        id: a\n";
        assert_eq!(text, expected);
    }

    #[test]
    fn export_keeps_schema_order_then_extras() {
        let registry = registry();
        let graph = Loader::new(&registry)
            .load_value(
                "Site",
                &json!({"zzz": 1, "title": "Home", "items": [{"id": "a", "x": true}]}),
            )
            .unwrap();
        let exported = to_json(&graph, graph.root_id()).unwrap();
        assert_eq!(
            serde_json::to_string(&exported).unwrap(),
            r#"{"items":[{"id":"a","x":true}],"title":"Home","live":null,"zzz":1}"#
        );
    }

    #[test]
    fn null_child_values_do_not_borrow_the_parents() {
        let mut registry = SchemaRegistry::new();
        registry
            .register(
                ClassDef::new("Root")
                    .property(PropertyDef::new("name", "string"))
                    .property(PropertyDef::new("child", "Child")),
            )
            .register(ClassDef::new("Child").property(PropertyDef::new("name", "string")));
        registry
            .hook("Root", "name", |_, raw| {
                Ok(raw.as_str().map(str::to_uppercase).map(Value::from).unwrap_or(raw))
            })
            .unwrap();
        let graph = Loader::new(&registry)
            .load_value("Root", &json!({"name": "root", "child": {}}))
            .unwrap();

        let exported = to_json(&graph, graph.root_id()).unwrap();
        assert_eq!(exported, json!({"name": "ROOT", "child": {"name": null}}));

        let text = show(&graph, false).unwrap();
        assert_eq!(text, "Root at $\n  name:  ROOT\n  child: \n    name: null\n");
    }
}
