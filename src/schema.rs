//! Class declarations and the registry that turns them into schemas.
//!
//! A [`ClassDef`] is what a schema source declares for one class: its base
//! class, its identifying property, and its properties in declaration order.
//! [`SchemaRegistry::schema`] merges a class with its ancestors (most-base
//! first, so subclasses override) into a [`ClassSchema`], once per class.
//!
//! Three sources produce `ClassDef`s: the builder API below, a JSON schema
//! document ([`document`]), and the annotation DSL ([`dsl`]).
pub mod document;
pub mod dsl;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use indexmap::IndexMap;
use once_cell::sync::OnceCell;

use crate::error::{BindError, Result};
use crate::graph::{NodeRef, Value};
use crate::property::{PropertyDef, PropertyDescriptor};

/// A computed-value hook. Registered under a property name, it intercepts
/// every read of that name on instances of the class (and its subclasses),
/// receiving the stored value. Results are memoized per node.
pub type Hook = Arc<dyn Fn(&NodeRef<'_>, Value) -> Result<Value> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ClassDef {
    pub name: String,
    pub extends: Option<String>,
    pub identifier: Option<String>,
    pub properties: Vec<PropertyDef>,
}

impl ClassDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn extends(mut self, base: impl Into<String>) -> Self {
        self.extends = Some(base.into());
        self
    }

    pub fn identifier(mut self, property: impl Into<String>) -> Self {
        self.identifier = Some(property.into());
        self
    }

    pub fn property(mut self, def: PropertyDef) -> Self {
        self.properties.push(def);
        self
    }
}

/// The merged, parsed schema of one class.
pub struct ClassSchema {
    name: String,
    lineage: Vec<String>,
    identifier: Option<String>,
    properties: IndexMap<String, PropertyDescriptor>,
    hooks: HashMap<String, Hook>,
}

impl ClassSchema {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// This class followed by its ancestors, most-derived first.
    pub fn lineage(&self) -> &[String] {
        &self.lineage
    }

    pub fn identifier(&self) -> Option<&str> {
        self.identifier.as_deref()
    }

    pub fn properties(&self) -> &IndexMap<String, PropertyDescriptor> {
        &self.properties
    }

    pub fn property(&self, name: &str) -> Option<&PropertyDescriptor> {
        self.properties.get(name)
    }

    pub fn hook(&self, name: &str) -> Option<&Hook> {
        self.hooks.get(name)
    }

    pub fn has_hook(&self, name: &str) -> bool {
        self.hooks.contains_key(name)
    }
}

impl fmt::Debug for ClassSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut hooks: Vec<_> = self.hooks.keys().collect();
        hooks.sort();
        f.debug_struct("ClassSchema")
            .field("name", &self.name)
            .field("lineage", &self.lineage)
            .field("identifier", &self.identifier)
            .field("properties", &self.properties)
            .field("hooks", &hooks)
            .finish()
    }
}

struct Entry {
    def: ClassDef,
    hooks: HashMap<String, Hook>,
    schema: OnceCell<Arc<ClassSchema>>,
}

/// Holds class declarations and memoizes their merged schemas.
///
/// Registration takes `&mut self` and clears every memoized schema, so a
/// schema handed out by [`SchemaRegistry::schema`] always reflects all
/// declarations and hooks registered before the borrow that produced it.
#[derive(Default)]
pub struct SchemaRegistry {
    classes: IndexMap<String, Entry>,
    default_root: Option<String>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads a schema file: `.json` files are schema documents, anything
    /// else is parsed as the annotation DSL.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| BindError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            document::parse(&text)
        } else {
            dsl::parse(&text)
        }
    }

    /// Adds or replaces a class declaration.
    pub fn register(&mut self, def: ClassDef) -> &mut Self {
        self.invalidate();
        let name = def.name.clone();
        match self.classes.get_mut(&name) {
            Some(entry) => entry.def = def,
            None => {
                self.classes.insert(
                    name,
                    Entry {
                        def,
                        hooks: HashMap::new(),
                        schema: OnceCell::new(),
                    },
                );
            }
        }
        self
    }

    /// Registers a computed-value hook for `property` on `class`.
    pub fn hook<F>(&mut self, class: &str, property: &str, hook: F) -> Result<&mut Self>
    where
        F: Fn(&NodeRef<'_>, Value) -> Result<Value> + Send + Sync + 'static,
    {
        self.invalidate();
        let entry = self
            .classes
            .get_mut(class)
            .ok_or_else(|| BindError::UnresolvableSchema {
                class: class.to_string(),
                referenced_by: None,
            })?;
        entry.hooks.insert(property.to_string(), Arc::new(hook));
        Ok(self)
    }

    pub fn set_default_root(&mut self, class: impl Into<String>) -> &mut Self {
        self.default_root = Some(class.into());
        self
    }

    /// The root class named by the schema source, if it named one.
    pub fn default_root(&self) -> Option<&str> {
        self.default_root.as_deref()
    }

    pub fn contains(&self, class: &str) -> bool {
        self.classes.contains_key(class)
    }

    pub fn class_names(&self) -> impl Iterator<Item = &str> {
        self.classes.keys().map(String::as_str)
    }

    pub fn definition(&self, class: &str) -> Option<&ClassDef> {
        self.classes.get(class).map(|e| &e.def)
    }

    /// The merged schema for `class`, built on first request.
    pub fn schema(&self, class: &str) -> Result<Arc<ClassSchema>> {
        let entry = self
            .classes
            .get(class)
            .ok_or_else(|| BindError::UnresolvableSchema {
                class: class.to_string(),
                referenced_by: None,
            })?;
        entry
            .schema
            .get_or_try_init(|| self.populate(class).map(Arc::new))
            .cloned()
    }

    fn invalidate(&mut self) {
        for entry in self.classes.values_mut() {
            entry.schema.take();
        }
    }

    /// Walks `extends` up to the root class, most-derived first.
    fn lineage(&self, class: &str) -> Result<Vec<&Entry>> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut current = class;
        loop {
            if !seen.insert(current) {
                return Err(BindError::invalid_schema(
                    class,
                    format!("inheritance cycle through `{current}`"),
                ));
            }
            let referenced_by = chain.last().map(|e: &&Entry| e.def.name.clone());
            let entry = self
                .classes
                .get(current)
                .ok_or_else(|| BindError::UnresolvableSchema {
                    class: current.to_string(),
                    referenced_by,
                })?;
            chain.push(entry);
            match entry.def.extends.as_deref() {
                Some(base) => current = base,
                None => break,
            }
        }
        Ok(chain)
    }

    fn populate(&self, class: &str) -> Result<ClassSchema> {
        let chain = self.lineage(class)?;

        let mut properties = IndexMap::new();
        let mut hooks = HashMap::new();
        let mut identifier = None;
        for entry in chain.iter().rev() {
            for def in &entry.def.properties {
                let descriptor = PropertyDescriptor::from_def(&entry.def.name, def)?;
                properties.insert(def.name.clone(), descriptor);
            }
            for (name, hook) in &entry.hooks {
                hooks.insert(name.clone(), Arc::clone(hook));
            }
            if entry.def.identifier.is_some() {
                identifier = entry.def.identifier.clone();
            }
        }

        // back-references may only look at properties declared earlier
        let mut earlier: HashSet<&str> = HashSet::new();
        for (name, descriptor) in &properties {
            for reference in descriptor.back_references() {
                if !earlier.contains(reference) {
                    return Err(BindError::UndeclaredBackReference {
                        identifier: format!("{class}.{name}"),
                        reference: reference.to_string(),
                    });
                }
            }
            earlier.insert(name);
        }

        for (name, descriptor) in &properties {
            for member in descriptor.types().members() {
                if let Some(referenced) = member.referenced_type() {
                    if !self.contains(referenced) {
                        return Err(BindError::UnresolvableSchema {
                            class: referenced.to_string(),
                            referenced_by: Some(format!("{class}.{name}")),
                        });
                    }
                }
            }
        }

        if let Some(field) = &identifier {
            if !properties.contains_key(field) {
                return Err(BindError::invalid_schema(
                    class,
                    format!("identifier `{field}` is not a declared property"),
                ));
            }
        }

        let lineage = chain.iter().map(|e| e.def.name.clone()).collect();
        tracing::info!(class, properties = properties.len(), "populated class schema");
        Ok(ClassSchema {
            name: class.to_string(),
            lineage,
            identifier,
            properties,
            hooks,
        })
    }
}

impl fmt::Debug for SchemaRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaRegistry")
            .field("classes", &self.classes.keys().collect::<Vec<_>>())
            .field("default_root", &self.default_root)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_and_post() -> SchemaRegistry {
        let mut registry = SchemaRegistry::new();
        registry
            .register(
                ClassDef::new("Base")
                    .identifier("slug")
                    .property(PropertyDef::new("slug", "string").required())
                    .property(PropertyDef::new("label", "string").attr("default", "base")),
            )
            .register(
                ClassDef::new("Post")
                    .extends("Base")
                    .property(PropertyDef::new("label", "string").attr("default", "post"))
                    .property(PropertyDef::new("tags", "string[]")),
            );
        registry
    }

    #[test]
    fn inherited_properties_merge_base_first() {
        let registry = base_and_post();
        let schema = registry.schema("Post").unwrap();
        let names: Vec<_> = schema.properties().keys().map(String::as_str).collect();
        assert_eq!(names, ["slug", "label", "tags"]);
        assert_eq!(schema.lineage(), ["Post", "Base"]);
        assert_eq!(schema.identifier(), Some("slug"));
        // the subclass declaration wins
        let label = schema.property("label").unwrap();
        assert_eq!(
            label.default_expr(),
            Some(&crate::property::Expr::Literal("post".into()))
        );
    }

    #[test]
    fn schemas_are_built_once_per_class() {
        let registry = base_and_post();
        let a = registry.schema("Post").unwrap();
        let b = registry.schema("Post").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn registering_again_rebuilds() {
        let mut registry = base_and_post();
        let before = registry.schema("Post").unwrap();
        registry
            .hook("Base", "label", |_, v| Ok(v))
            .unwrap();
        let after = registry.schema("Post").unwrap();
        assert!(!Arc::ptr_eq(&before, &after));
        assert!(after.has_hook("label"), "hooks are inherited");
    }

    #[test]
    fn unknown_classes_are_unresolvable() {
        let mut registry = SchemaRegistry::new();
        registry.register(
            ClassDef::new("Root").property(PropertyDef::new("address", "string|Address")),
        );
        let err = registry.schema("Root").unwrap_err();
        assert!(matches!(
            err,
            BindError::UnresolvableSchema { ref class, ref referenced_by }
                if class == "Address" && referenced_by.as_deref() == Some("Root.address")
        ));
        assert!(matches!(
            registry.schema("Nope"),
            Err(BindError::UnresolvableSchema { .. })
        ));
        assert!(registry.hook("Nope", "x", |_, v| Ok(v)).is_err());
    }

    #[test]
    fn forward_back_references_are_rejected() {
        let mut registry = SchemaRegistry::new();
        registry.register(
            ClassDef::new("Root")
                .property(PropertyDef::new("enabled", "boolean").attr("missing", "$verbose"))
                .property(PropertyDef::new("verbose", "boolean")),
        );
        let err = registry.schema("Root").unwrap_err();
        assert!(matches!(
            err,
            BindError::UndeclaredBackReference { ref identifier, ref reference }
                if identifier == "Root.enabled" && reference == "verbose"
        ));
    }

    #[test]
    fn inheritance_cycles_are_schema_errors() {
        let mut registry = SchemaRegistry::new();
        registry
            .register(ClassDef::new("A").extends("B"))
            .register(ClassDef::new("B").extends("A"));
        assert!(matches!(
            registry.schema("A"),
            Err(BindError::InvalidSchema { .. })
        ));
    }

    #[test]
    fn identifier_must_be_declared() {
        let mut registry = SchemaRegistry::new();
        registry.register(ClassDef::new("Item").identifier("id"));
        assert!(matches!(
            registry.schema("Item"),
            Err(BindError::InvalidSchema { .. })
        ));
    }
}
