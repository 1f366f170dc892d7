//! The bound object graph.
//!
//! Nodes live in an arena owned by [`Graph`]; children are referenced by
//! [`NodeId`] and the parent link is a plain id, so nothing keeps a parent
//! alive through a child. Reads go through [`Graph::get`], which layers
//! computed-value hooks, memoization, and parent fallback over the values
//! stored at build time.

use std::cell::RefCell;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value as Json;

use crate::error::{BindError, Result};
use crate::schema::ClassSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// A resolved property value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    /// Raw JSON kept verbatim: scalar/mixed arrays, untyped objects, exploded lists.
    Json(Json),
    Node(NodeId),
    Nodes(Vec<NodeId>),
}

impl Value {
    /// Maps JSON scalars onto their typed variants; containers stay raw.
    pub fn from_json(v: Json) -> Value {
        match v {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(b),
            Json::Number(n) => match n.as_i64() {
                Some(i) => Value::Integer(i),
                None => n.as_f64().map(Value::Float).unwrap_or(Value::Json(Json::Number(n))),
            },
            Json::String(s) => Value::String(s),
            other => Value::Json(other),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null | Value::Json(Json::Null))
    }

    /// An empty node list or an empty raw array.
    pub fn is_empty_list(&self) -> bool {
        match self {
            Value::Nodes(ids) => ids.is_empty(),
            Value::Json(Json::Array(xs)) => xs.is_empty(),
            _ => false,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            Value::Json(Json::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Json(Json::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::Json(v) => v.as_i64(),
            _ => None,
        }
    }

    pub fn as_node(&self) -> Option<NodeId> {
        match self {
            Value::Node(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_nodes(&self) -> Option<&[NodeId]> {
        match self {
            Value::Nodes(ids) => Some(ids),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&Json> {
        match self {
            Value::Json(v) => Some(v),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<Json> for Value {
    fn from(v: Json) -> Self {
        Value::from_json(v)
    }
}

pub struct ObjectNode {
    pub(crate) class: Arc<ClassSchema>,
    pub(crate) values: IndexMap<String, Value>,
    pub(crate) extras: IndexMap<String, Json>,
    derived: RefCell<IndexMap<String, Value>>,
    /// Names whose hook is running on this node.
    computing: RefCell<Vec<String>>,
    pub(crate) parent: Option<NodeId>,
    pub(crate) path: String,
}

impl ObjectNode {
    pub(crate) fn new(class: Arc<ClassSchema>, parent: Option<NodeId>, path: String) -> Self {
        Self {
            class,
            values: IndexMap::new(),
            extras: IndexMap::new(),
            derived: RefCell::new(IndexMap::new()),
            computing: RefCell::new(Vec::new()),
            parent,
            path,
        }
    }
}

impl fmt::Debug for ObjectNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectNode")
            .field("class", &self.class.name())
            .field("path", &self.path)
            .field("parent", &self.parent)
            .field("values", &self.values)
            .field("extras", &self.extras)
            .finish()
    }
}

#[derive(Debug)]
pub struct Graph {
    nodes: Vec<ObjectNode>,
    root: NodeId,
}

impl Graph {
    pub(crate) fn from_nodes(nodes: Vec<ObjectNode>, root: NodeId) -> Self {
        Self { nodes, root }
    }

    pub fn root(&self) -> NodeRef<'_> {
        self.node(self.root)
    }

    pub fn root_id(&self) -> NodeId {
        self.root
    }

    /// # Panics
    ///
    /// If `id` was not handed out by this graph. Ids from another graph
    /// should go through [`Graph::try_node`].
    pub fn node(&self, id: NodeId) -> NodeRef<'_> {
        assert!(self.contains(id), "{id:?} does not belong to this graph");
        NodeRef { graph: self, id }
    }

    pub fn try_node(&self, id: NodeId) -> Option<NodeRef<'_>> {
        self.contains(id).then_some(NodeRef { graph: self, id })
    }

    pub fn contains(&self, id: NodeId) -> bool {
        id.0 < self.nodes.len()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub(crate) fn raw(&self, id: NodeId) -> &ObjectNode {
        &self.nodes[id.0]
    }

    /// Reads a property with the full lookup chain:
    /// memoized derived value, then a same-named hook, then the stored value,
    /// then the extra bucket, then the parent.
    ///
    /// A name declared somewhere on the chain but null everywhere reads as
    /// `Null`; a name nobody declares, captures, or computes is an error.
    /// A hook must work from the value it is given: reading its own name
    /// again while it runs fails with [`BindError::Hook`].
    ///
    /// `id`, like every `NodeId` taken by the methods below, must come from
    /// this graph; see [`Graph::node`].
    pub fn get(&self, id: NodeId, name: &str) -> Result<Value> {
        let mut class_chain = Vec::new();
        let mut declared = false;
        let mut cursor = Some(id);

        while let Some(current) = cursor {
            let node = self.raw(current);
            class_chain.push(node.class.name().to_string());

            if let Some(v) = node.derived.borrow().get(name) {
                return Ok(v.clone());
            }

            if let Some(hook) = node.class.hook(name) {
                let raw = match node.values.get(name) {
                    Some(v) => v.clone(),
                    None => node
                        .extras
                        .get(name)
                        .cloned()
                        .map(Value::from_json)
                        .unwrap_or(Value::Null),
                };
                if node.computing.borrow().iter().any(|n| n == name) {
                    return Err(BindError::hook(
                        format!("{}.{name} at {}", node.class.name(), node.path),
                        "the hook reads its own value; use the value it is given",
                    ));
                }
                node.computing.borrow_mut().push(name.to_string());
                let computed = hook(&self.node(current), raw);
                node.computing.borrow_mut().retain(|n| n != name);
                let computed = computed?;
                node.derived
                    .borrow_mut()
                    .insert(name.to_string(), computed.clone());
                return Ok(computed);
            }

            if node.class.property(name).is_some() {
                declared = true;
                if let Some(v) = node.values.get(name).filter(|v| !v.is_null()) {
                    return Ok(v.clone());
                }
            }

            if let Some(v) = node.extras.get(name) {
                return Ok(Value::from_json(v.clone()));
            }

            cursor = node.parent;
        }

        if declared {
            Ok(Value::Null)
        } else {
            Err(BindError::UnknownProperty {
                property: name.to_string(),
                class_chain,
            })
        }
    }

    /// Replaces a declared property's value and drops its memoized derivation.
    pub fn set(&mut self, id: NodeId, name: &str, value: Value) -> Result<()> {
        let node = &mut self.nodes[id.0];
        if node.class.property(name).is_none() {
            return Err(BindError::UnknownProperty {
                property: name.to_string(),
                class_chain: vec![node.class.name().to_string()],
            });
        }
        node.values.insert(name.to_string(), value);
        node.derived.get_mut().shift_remove(name);
        Ok(())
    }

    /// Whether [`Graph::get`] would find `name` on this node or an ancestor.
    pub fn has(&self, id: NodeId, name: &str) -> bool {
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            let node = self.raw(current);
            if node.class.hook(name).is_some()
                || node.class.property(name).is_some()
                || node.extras.contains_key(name)
            {
                return true;
            }
            cursor = node.parent;
        }
        false
    }

    /// Per-node key for diagnostics: `Class(id)` when the class designates an
    /// identifying property holding a scalar, otherwise `Class at $.path`.
    pub fn unique_id(&self, id: NodeId) -> String {
        let node = self.raw(id);
        let class = node.class.name();
        let key = node
            .class
            .identifier()
            .and_then(|field| node.values.get(field))
            .and_then(|v| match v {
                Value::String(s) => Some(s.clone()),
                Value::Integer(i) => Some(i.to_string()),
                _ => None,
            });
        match key {
            Some(key) => format!("{class}({key})"),
            None => format!("{class} at {}", node.path),
        }
    }
}

/// Read surface consumed by output generators.
pub trait PropertySource: Sized {
    fn has_property(&self, name: &str) -> bool;
    fn get_value(&self, name: &str) -> Result<Value>;
    /// Declared properties in schema order, as stored.
    fn properties(&self) -> IndexMap<String, Value>;
    fn parent(&self) -> Option<Self>;
}

/// A borrowed handle to one node of a [`Graph`].
#[derive(Clone, Copy)]
pub struct NodeRef<'g> {
    graph: &'g Graph,
    id: NodeId,
}

impl<'g> NodeRef<'g> {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn graph(&self) -> &'g Graph {
        self.graph
    }

    pub fn class_name(&self) -> &'g str {
        self.graph.raw(self.id).class.name()
    }

    pub fn schema(&self) -> &'g ClassSchema {
        &self.graph.raw(self.id).class
    }

    /// JSON path of the input object this node was built from.
    pub fn path(&self) -> &'g str {
        &self.graph.raw(self.id).path
    }

    pub fn get(&self, name: &str) -> Result<Value> {
        self.graph.get(self.id, name)
    }

    pub fn has(&self, name: &str) -> bool {
        self.graph.has(self.id, name)
    }

    /// The stored value of a declared property, without hooks or fallback.
    pub fn value(&self, name: &str) -> Option<&'g Value> {
        self.graph.raw(self.id).values.get(name)
    }

    pub fn extras(&self) -> &'g IndexMap<String, Json> {
        &self.graph.raw(self.id).extras
    }

    pub fn unique_id(&self) -> String {
        self.graph.unique_id(self.id)
    }

    /// The child node stored under `name`, if it holds one.
    pub fn child(&self, name: &str) -> Option<NodeRef<'g>> {
        let id = self.value(name)?.as_node()?;
        Some(self.graph.node(id))
    }

    /// The child nodes stored under `name`; empty when it holds none.
    pub fn children(&self, name: &str) -> Vec<NodeRef<'g>> {
        self.value(name)
            .and_then(Value::as_nodes)
            .map(|ids| ids.iter().map(|id| self.graph.node(*id)).collect())
            .unwrap_or_default()
    }
}

impl PropertySource for NodeRef<'_> {
    fn has_property(&self, name: &str) -> bool {
        self.has(name)
    }

    fn get_value(&self, name: &str) -> Result<Value> {
        self.get(name)
    }

    fn properties(&self) -> IndexMap<String, Value> {
        self.graph.raw(self.id).values.clone()
    }

    fn parent(&self) -> Option<Self> {
        let parent = self.graph.raw(self.id).parent?;
        Some(self.graph.node(parent))
    }
}

impl fmt::Debug for NodeRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeRef({})", self.unique_id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::Loader;
    use crate::property::PropertyDef;
    use crate::schema::{ClassDef, SchemaRegistry};
    use serde_json::json;

    #[test]
    fn a_hook_reading_its_own_name_fails_instead_of_looping() {
        let mut registry = SchemaRegistry::new();
        registry.register(ClassDef::new("Root").property(PropertyDef::new("name", "string")));
        registry
            .hook("Root", "name", |node, _| node.get("name"))
            .unwrap();
        let graph = Loader::new(&registry)
            .load_value("Root", &json!({"name": "ada"}))
            .unwrap();

        let err = graph.root().get("name").unwrap_err();
        assert!(matches!(
            err,
            BindError::Hook { ref identifier, .. } if identifier == "Root.name at $"
        ));
        // the failed run leaves nothing behind
        assert!(graph.root().get("name").is_err());
        assert!(graph.raw(graph.root_id()).computing.borrow().is_empty());
    }

    #[test]
    fn ids_from_another_graph_are_rejected() {
        let mut registry = SchemaRegistry::new();
        registry
            .register(ClassDef::new("Root").property(PropertyDef::new("kids", "Kid[]")))
            .register(ClassDef::new("Kid"));
        let loader = Loader::new(&registry);
        let big = loader
            .load_value("Root", &json!({"kids": [{}, {}]}))
            .unwrap();
        let small = loader.load_value("Root", &json!({})).unwrap();

        let foreign = big.root().children("kids")[1].id();
        assert!(big.contains(foreign));
        assert!(!small.contains(foreign));
        assert!(small.try_node(foreign).is_none());
        assert!(small.try_node(small.root_id()).is_some());
    }

    #[test]
    #[should_panic(expected = "does not belong to this graph")]
    fn node_panics_on_a_foreign_id() {
        let mut registry = SchemaRegistry::new();
        registry.register(ClassDef::new("Root"));
        let graph = Loader::new(&registry).load_value("Root", &json!({})).unwrap();
        graph.node(NodeId(5));
    }
}
