//! Binds JSON documents onto graphs of schema-described objects.
//!
//! A [`SchemaRegistry`] holds class declarations (built in code, read from a
//! JSON schema document, or parsed from the annotation DSL). A [`Loader`]
//! walks a decoded document against a root class, filling defaults, picking
//! the governing member of each union type and recursing into nested classes,
//! and returns a [`Graph`]. [`validate`] then reports every required value
//! the graph lacks.
//!
//! ```
//! use json_bind::{ClassDef, Loader, PropertyDef, SchemaRegistry};
//!
//! let mut registry = SchemaRegistry::new();
//! registry.register(
//!     ClassDef::new("Project")
//!         .property(PropertyDef::new("name", "string").required())
//!         .property(PropertyDef::new("tags", "string").attr("explode", ",")),
//! );
//!
//! let graph = Loader::new(&registry)
//!     .load_str("Project", r#"{"name": "demo", "tags": "a, b"}"#)
//!     .unwrap();
//! assert_eq!(graph.root().get("name").unwrap().as_str(), Some("demo"));
//! assert!(json_bind::validate::validate(&graph).is_empty());
//! ```

pub mod cli;
pub mod error;
pub mod graph;
pub mod jq_exec;
pub mod loader;
pub mod output;
pub mod path_de;
pub mod property;
pub mod report;
pub mod schema;
pub mod types;
pub mod validate;

pub use error::{BindError, Result};
pub use graph::{Graph, NodeId, NodeRef, PropertySource, Value};
pub use loader::{Loader, LoaderConfig};
pub use property::{PropertyDef, PropertyDescriptor};
pub use schema::{ClassDef, ClassSchema, SchemaRegistry};
pub use types::{Kind, TypeDescriptor, TypeUnion};
pub use validate::{Violation, ViolationKind, Violations};
