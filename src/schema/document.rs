//! JSON schema documents.
//!
//! ```json
//! {
//!   "root": "Project",
//!   "classes": {
//!     "Project": {
//!       "identifier": "slug",
//!       "properties": [
//!         { "name": "slug", "type": "string", "required": true },
//!         { "name": "items", "type": "Item[]" },
//!         { "name": "tags", "type": "string", "explode": "," }
//!       ]
//!     },
//!     "Item": { "extends": "Base", "properties": [] }
//!   }
//! }
//! ```
//!
//! Any property key other than `name` and `type` is an attribute.

use indexmap::IndexMap;
use serde::Deserialize;

use super::{ClassDef, SchemaRegistry};
use crate::error::{BindError, Result};
use crate::path_de::{from_str_with_path, from_value_with_path, PathError};
use crate::property::PropertyDef;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SchemaDocument {
    #[serde(default)]
    root: Option<String>,
    classes: IndexMap<String, ClassBody>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ClassBody {
    #[serde(default)]
    extends: Option<String>,
    #[serde(default)]
    identifier: Option<String>,
    #[serde(default)]
    properties: Vec<PropertyDef>,
}

pub fn parse(text: &str) -> Result<SchemaRegistry> {
    from_str_with_path::<SchemaDocument>(text)
        .map_err(document_error)
        .and_then(into_registry)
}

pub fn from_value(value: serde_json::Value) -> Result<SchemaRegistry> {
    from_value_with_path::<SchemaDocument>(value)
        .map_err(document_error)
        .and_then(into_registry)
}

fn document_error(err: PathError) -> BindError {
    BindError::invalid_schema("<schema document>", err.to_string())
}

fn into_registry(doc: SchemaDocument) -> Result<SchemaRegistry> {
    let mut registry = SchemaRegistry::new();
    for (name, body) in doc.classes {
        let mut seen = std::collections::HashSet::new();
        for property in &body.properties {
            if !seen.insert(property.name.as_str()) {
                return Err(BindError::invalid_schema(
                    &name,
                    format!("property `{}` is declared twice", property.name),
                ));
            }
        }
        registry.register(ClassDef {
            name,
            extends: body.extends,
            identifier: body.identifier,
            properties: body.properties,
        });
    }
    if let Some(root) = doc.root {
        if !registry.contains(&root) {
            return Err(BindError::UnresolvableSchema {
                class: root,
                referenced_by: Some("<schema document> root".to_string()),
            });
        }
        registry.set_default_root(root);
    }
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_classes_in_order_with_attributes() {
        let registry = from_value(json!({
            "root": "Root",
            "classes": {
                "Root": {
                    "identifier": "name",
                    "properties": [
                        {"name": "name", "type": "string", "required": true},
                        {"name": "tags", "type": "string", "explode": ",", "label": "Tags"}
                    ]
                },
                "Child": {"extends": "Root"}
            }
        }))
        .unwrap();
        assert_eq!(registry.default_root(), Some("Root"));
        assert_eq!(registry.class_names().collect::<Vec<_>>(), ["Root", "Child"]);

        let schema = registry.schema("Child").unwrap();
        assert!(schema.property("name").unwrap().required());
        let tags = schema.property("tags").unwrap();
        assert_eq!(tags.explode_delimiter(), Some(","));
        assert_eq!(tags.extra("label"), Some(json!("Tags")));
    }

    #[test]
    fn errors_point_into_the_document() {
        let err = parse(r#"{"classes": {"Root": {"properties": [{"name": "x"}]}}}"#).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("classes.Root.properties[0]"), "{msg}");

        let err = parse(r#"{"classes": {}, "extra": 1}"#).unwrap_err();
        assert!(matches!(err, BindError::InvalidSchema { .. }));
    }

    #[test]
    fn duplicate_properties_and_unknown_root_are_rejected() {
        let err = from_value(json!({"classes": {"Root": {"properties": [
            {"name": "x", "type": "string"},
            {"name": "x", "type": "int"}
        ]}}}))
        .unwrap_err();
        assert!(err.to_string().contains("declared twice"));

        let err = from_value(json!({"root": "Nope", "classes": {}})).unwrap_err();
        assert!(matches!(err, BindError::UnresolvableSchema { .. }));
    }
}
