//! Builds a [`Graph`] from decoded JSON and a root class.
//!
//! Per object, in schema declaration order:
//! 1. fill absent values from `missing`/`default` (back-references see the
//!    properties resolved before them),
//! 2. pick the governing member of each property's type union,
//! 3. coerce scalars, keep raw arrays, recurse into classes and class arrays,
//! 4. apply string transforms and `explode`.
//!
//! Input keys the schema does not declare land in the node's extra bucket.
//! Required-ness is not checked here; see [`crate::validate`].

use std::path::Path;

use indexmap::IndexMap;
use serde_json::{Map, Value as Json};

use crate::error::{BindError, Result};
use crate::graph::{Graph, NodeId, ObjectNode, Value};
use crate::property::PropertyDescriptor;
use crate::schema::SchemaRegistry;
use crate::types::{kind_of, preview, Kind, Shape};
use crate::validate;

#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Deepest nesting of class instances allowed below the root.
    pub max_depth: usize,
    /// Keep undeclared input keys in the extra bucket instead of dropping them.
    pub capture_extras: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            max_depth: 64,
            capture_extras: true,
        }
    }
}

/// The graph builder. Cheap to create; borrows the registry it reads from.
#[derive(Debug, Clone)]
pub struct Loader<'r> {
    registry: &'r SchemaRegistry,
    config: LoaderConfig,
}

impl<'r> Loader<'r> {
    pub fn new(registry: &'r SchemaRegistry) -> Self {
        Self {
            registry,
            config: LoaderConfig::default(),
        }
    }

    pub fn with_config(mut self, config: LoaderConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    pub fn registry(&self) -> &'r SchemaRegistry {
        self.registry
    }

    pub fn load_file(&self, root: &str, path: impl AsRef<Path>) -> Result<Graph> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(BindError::malformed("the file path passed was empty"));
        }
        let text = std::fs::read_to_string(path).map_err(|source| BindError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        self.load_str(root, &text).map_err(|err| match err {
            BindError::MalformedInput { reason } => {
                BindError::malformed(format!("{}: {reason}", path.display()))
            }
            other => other,
        })
    }

    pub fn load_str(&self, root: &str, text: &str) -> Result<Graph> {
        if text.trim().is_empty() {
            return Err(BindError::malformed("the JSON value provided is empty"));
        }
        let value: Json = serde_json::from_str(text)
            .map_err(|e| BindError::malformed(format!("the JSON value provided has invalid syntax: {e}")))?;
        self.load_value(root, &value)
    }

    /// Builds the graph for an already-decoded document, which must be an object.
    pub fn load_value(&self, root: &str, value: &Json) -> Result<Graph> {
        let Json::Object(map) = value else {
            return Err(BindError::malformed(format!(
                "the root value must be an object, found {}",
                kind_of(value)
            )));
        };
        // resolve the root up front so a bad root name is reported as such
        self.registry.schema(root)?;

        let mut build = Build {
            registry: self.registry,
            config: &self.config,
            nodes: Vec::new(),
        };
        let root_id = build.instantiate(root, None, map, None, "$".to_string(), 0)?;
        tracing::debug!(root, nodes = build.nodes.len(), "built graph");
        Ok(Graph::from_nodes(build.nodes, root_id))
    }

    /// Builds and validates, failing with every violation at once.
    pub fn load_validated(&self, root: &str, value: &Json) -> Result<Graph> {
        let graph = self.load_value(root, value)?;
        validate::check(&graph)?;
        Ok(graph)
    }
}

struct Build<'a> {
    registry: &'a SchemaRegistry,
    config: &'a LoaderConfig,
    nodes: Vec<ObjectNode>,
}

impl Build<'_> {
    fn instantiate(
        &mut self,
        class: &str,
        referenced_by: Option<&str>,
        raw: &Map<String, Json>,
        parent: Option<NodeId>,
        path: String,
        depth: usize,
    ) -> Result<NodeId> {
        if depth > self.config.max_depth {
            return Err(BindError::DepthLimitExceeded {
                class: class.to_string(),
                path,
                limit: self.config.max_depth,
            });
        }
        let schema = self.registry.schema(class).map_err(|err| match err {
            BindError::UnresolvableSchema { class, referenced_by: None } => {
                BindError::UnresolvableSchema {
                    class,
                    referenced_by: referenced_by.map(str::to_string),
                }
            }
            other => other,
        })?;
        tracing::debug!(class, path = %path, depth, "instantiating");

        let id = NodeId(self.nodes.len());
        self.nodes.push(ObjectNode::new(schema.clone(), parent, path.clone()));

        let mut resolved: IndexMap<String, Json> = IndexMap::with_capacity(schema.properties().len());
        for (name, property) in schema.properties() {
            let identifier = format!("{class}.{name} at {path}");
            let value = property.resolve_default(raw.get(name), &resolved, &identifier)?;
            resolved.insert(name.clone(), value);
        }

        let mut extras = IndexMap::new();
        for (key, value) in raw {
            if schema.property(key).is_some() {
                continue;
            }
            if self.config.capture_extras {
                tracing::warn!(class, path = %path, key = %key, "undeclared key kept as extra");
                extras.insert(key.clone(), value.clone());
            } else {
                tracing::warn!(class, path = %path, key = %key, "dropping undeclared key");
            }
        }

        let mut values = IndexMap::with_capacity(resolved.len());
        for (name, property) in schema.properties() {
            let raw_value = &resolved[name];
            let site = Site {
                class,
                property: name,
                owner: id,
                path: &path,
                depth,
            };
            let value = self.bind(property, raw_value, &site)?;
            values.insert(name.clone(), property.post_process(value));
        }

        let node = &mut self.nodes[id.0];
        node.values = values;
        node.extras = extras;
        Ok(id)
    }

    /// Turns one raw property value into a stored value.
    fn bind(&mut self, property: &PropertyDescriptor, raw: &Json, site: &Site<'_>) -> Result<Value> {
        let union = property.types();
        let ty = match union.resolve(raw) {
            Some(ty) => ty,
            // an exploded property handed its own output back
            None if property.explode_delimiter().is_some()
                && raw.is_array()
                && !union.has_array_member() =>
            {
                return Ok(Value::Json(raw.clone()));
            }
            None => {
                return Err(BindError::TypeMismatch {
                    identifier: site.identifier(None),
                    declared: union.to_string(),
                    observed: kind_of(raw),
                    preview: preview(raw),
                });
            }
        };

        Ok(match ty.shape() {
            Shape::Scalar(kind) => coerce(*kind, raw),
            Shape::ArrayOf(_) => match raw {
                Json::Null => Value::Json(Json::Array(Vec::new())),
                other => Value::Json(other.clone()),
            },
            Shape::Class(name) => {
                let empty = Map::new();
                let map = raw.as_object().unwrap_or(&empty);
                let referenced_by = format!("{}.{}", site.class, site.property);
                let child = self.instantiate(
                    name,
                    Some(&referenced_by),
                    map,
                    Some(site.owner),
                    format!("{}.{}", site.path, site.property),
                    site.depth + 1,
                )?;
                Value::Node(child)
            }
            Shape::ClassArray(name) => {
                let elements = raw.as_array().map(Vec::as_slice).unwrap_or_default();
                let referenced_by = format!("{}.{}", site.class, site.property);
                let empty = Map::new();
                let mut children = Vec::with_capacity(elements.len());
                for (index, element) in elements.iter().enumerate() {
                    let map = match element {
                        Json::Object(map) => map,
                        Json::Null => &empty,
                        other => {
                            return Err(BindError::TypeMismatch {
                                identifier: site.identifier(Some(index)),
                                declared: name.clone(),
                                observed: kind_of(other),
                                preview: preview(other),
                            });
                        }
                    };
                    let child = self.instantiate(
                        name,
                        Some(&referenced_by),
                        map,
                        Some(site.owner),
                        format!("{}.{}[{index}]", site.path, site.property),
                        site.depth + 1,
                    )?;
                    children.push(child);
                }
                Value::Nodes(children)
            }
        })
    }
}

/// Where a property value sits, for recursion and diagnostics.
struct Site<'a> {
    class: &'a str,
    property: &'a str,
    owner: NodeId,
    path: &'a str,
    depth: usize,
}

impl Site<'_> {
    fn identifier(&self, index: Option<usize>) -> String {
        match index {
            Some(i) => format!("{}.{}[{i}] at {}", self.class, self.property, self.path),
            None => format!("{}.{} at {}", self.class, self.property, self.path),
        }
    }
}

/// Primitive conversion for a value whose kind the union already accepted.
fn coerce(kind: Kind, raw: &Json) -> Value {
    match (kind, raw) {
        (_, Json::Null) => Value::Null,
        (Kind::String, Json::String(s)) => Value::String(s.clone()),
        (Kind::Boolean, Json::Bool(b)) => Value::Bool(*b),
        (Kind::Integer, Json::Number(n)) => match n.as_i64() {
            Some(i) => Value::Integer(i),
            None => Value::Json(raw.clone()),
        },
        (Kind::Number, Json::Number(n)) => match n.as_f64() {
            Some(f) => Value::Float(f),
            None => Value::Json(raw.clone()),
        },
        (Kind::Mixed, other) => Value::from_json(other.clone()),
        (_, other) => Value::Json(other.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::PropertyDef;
    use crate::schema::ClassDef;
    use serde_json::json;

    fn registry() -> SchemaRegistry {
        let mut registry = SchemaRegistry::new();
        registry
            .register(
                ClassDef::new("Root")
                    .property(PropertyDef::new("name", "string"))
                    .property(PropertyDef::new("count", "int"))
                    .property(PropertyDef::new("ratio", "number"))
                    .property(PropertyDef::new("flags", "string[]"))
                    .property(PropertyDef::new("meta", "object"))
                    .property(PropertyDef::new("any", "mixed"))
                    .property(PropertyDef::new("child", "Child"))
                    .property(PropertyDef::new("children", "Child[]")),
            )
            .register(ClassDef::new("Child").property(PropertyDef::new("id", "string")));
        registry
    }

    #[test]
    fn scalars_are_coerced_and_raw_values_kept() {
        let registry = registry();
        let graph = Loader::new(&registry)
            .load_value(
                "Root",
                &json!({
                    "name": "n",
                    "count": 3,
                    "ratio": 2,
                    "flags": ["a", "b"],
                    "meta": {"k": 1},
                    "any": "x"
                }),
            )
            .unwrap();
        let root = graph.root();
        assert_eq!(root.value("name"), Some(&Value::String("n".into())));
        assert_eq!(root.value("count"), Some(&Value::Integer(3)));
        assert_eq!(root.value("ratio"), Some(&Value::Float(2.0)));
        assert_eq!(root.value("flags"), Some(&Value::Json(json!(["a", "b"]))));
        assert_eq!(root.value("meta"), Some(&Value::Json(json!({"k": 1}))));
        assert_eq!(root.value("any"), Some(&Value::String("x".into())));
    }

    #[test]
    fn absent_containers_become_empty_never_null() {
        let registry = registry();
        let graph = Loader::new(&registry).load_value("Root", &json!({})).unwrap();
        let root = graph.root();
        assert_eq!(root.value("name"), Some(&Value::Null));
        assert_eq!(root.value("flags"), Some(&Value::Json(json!([]))));
        assert_eq!(root.value("children"), Some(&Value::Nodes(vec![])));
        let child = root.child("child").expect("null class value is instantiated empty");
        assert_eq!(child.class_name(), "Child");
        assert_eq!(child.path(), "$.child");
        assert_eq!(graph.len(), 2);
    }

    #[test]
    fn null_elements_instantiate_empty_and_scalars_mismatch() {
        let registry = registry();
        let loader = Loader::new(&registry);
        let graph = loader
            .load_value("Root", &json!({"children": [{"id": "a"}, null]}))
            .unwrap();
        let kids = graph.root().children("children");
        assert_eq!(kids.len(), 2);
        assert_eq!(kids[1].path(), "$.children[1]");

        let err = loader
            .load_value("Root", &json!({"children": [{"id": "a"}, "b"]}))
            .unwrap_err();
        match err {
            BindError::TypeMismatch { identifier, observed, .. } => {
                assert_eq!(identifier, "Root.children[1] at $");
                assert_eq!(observed, Kind::String);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn mismatches_name_the_property_and_path() {
        let registry = registry();
        let err = Loader::new(&registry)
            .load_value("Root", &json!({"child": {"id": 5}}))
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("Child.id at $.child"), "{msg}");
        assert!(msg.contains("integer value: 5"), "{msg}");
    }

    #[test]
    fn undeclared_keys_are_captured_or_dropped() {
        let registry = registry();
        let doc = json!({"name": "n", "color": "red"});
        let graph = Loader::new(&registry).load_value("Root", &doc).unwrap();
        assert_eq!(graph.root().extras().get("color"), Some(&json!("red")));
        assert_eq!(graph.root().value("color"), None);

        let graph = Loader::new(&registry)
            .with_config(LoaderConfig {
                capture_extras: false,
                ..LoaderConfig::default()
            })
            .load_value("Root", &doc)
            .unwrap();
        assert!(graph.root().extras().is_empty());
    }

    #[test]
    fn input_contract_is_enforced() {
        let registry = registry();
        let loader = Loader::new(&registry);
        assert!(matches!(
            loader.load_str("Root", "   "),
            Err(BindError::MalformedInput { .. })
        ));
        assert!(matches!(
            loader.load_str("Root", "{\"name\": "),
            Err(BindError::MalformedInput { .. })
        ));
        assert!(matches!(
            loader.load_str("Root", "[1, 2]"),
            Err(BindError::MalformedInput { .. })
        ));
        assert!(matches!(
            loader.load_str("Nope", "{}"),
            Err(BindError::UnresolvableSchema { .. })
        ));
        assert!(matches!(
            loader.load_file("Root", ""),
            Err(BindError::MalformedInput { .. })
        ));
    }

    #[test]
    fn self_referencing_classes_hit_the_depth_limit() {
        let mut registry = SchemaRegistry::new();
        registry.register(ClassDef::new("Node").property(PropertyDef::new("next", "Node")));
        let err = Loader::new(&registry)
            .with_config(LoaderConfig {
                max_depth: 5,
                ..LoaderConfig::default()
            })
            .load_value("Node", &json!({}))
            .unwrap_err();
        assert!(matches!(
            err,
            BindError::DepthLimitExceeded { limit: 5, ref path, .. } if path.matches(".next").count() == 6
        ));
    }
}
