//! Property declarations and their default/missing resolution.
//!
//! A [`PropertyDef`] is the raw `(name, types, attributes)` tuple a schema
//! source produces. It is parsed once into a [`PropertyDescriptor`]: the type
//! union, the `default`/`missing` expressions, and the post-load transforms
//! are all structured at that point and never re-parsed per value.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::error::{BindError, Result};
use crate::graph::Value;
use crate::types::TypeUnion;

/// A declared property as written in a schema source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDef {
    pub name: String,
    #[serde(rename = "type")]
    pub types: String,
    #[serde(flatten)]
    pub attributes: IndexMap<String, Json>,
}

impl PropertyDef {
    pub fn new(name: impl Into<String>, types: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            types: types.into(),
            attributes: IndexMap::new(),
        }
    }

    pub fn attr(mut self, key: impl Into<String>, value: impl Into<Json>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn required(self) -> Self {
        self.attr("required", true)
    }
}

/// A `default` or `missing` expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Json),
    /// `$name`: the sibling's resolved value.
    Sibling(String),
    /// `!$name`: boolean negation of the sibling's resolved value.
    NotSibling(String),
}

impl Expr {
    fn parse(raw: &Json, boolean_first: bool) -> Expr {
        let Some(text) = raw.as_str() else {
            return Expr::Literal(raw.clone());
        };
        let text = text.trim();
        if let Some(name) = text.strip_prefix("!$") {
            return Expr::NotSibling(name.to_string());
        }
        if let Some(name) = text.strip_prefix('$') {
            return Expr::Sibling(name.to_string());
        }
        match text {
            "true" if boolean_first => Expr::Literal(Json::Bool(true)),
            "false" if boolean_first => Expr::Literal(Json::Bool(false)),
            _ => Expr::Literal(raw.clone()),
        }
    }

    pub fn back_reference(&self) -> Option<&str> {
        match self {
            Expr::Sibling(name) | Expr::NotSibling(name) => Some(name),
            Expr::Literal(_) => None,
        }
    }
}

/// String rewrites applied after a value is resolved, before `explode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    Trim,
    Lowercase,
    Uppercase,
    Dashify,
    Underscorify,
}

impl Transform {
    fn from_key(key: &str) -> Option<Transform> {
        Some(match key {
            "trim" => Transform::Trim,
            "lowercase" => Transform::Lowercase,
            "uppercase" => Transform::Uppercase,
            "dashify" => Transform::Dashify,
            "underscorify" => Transform::Underscorify,
            _ => return None,
        })
    }

    pub fn apply(self, s: &str) -> String {
        match self {
            Transform::Trim => s.trim().to_string(),
            Transform::Lowercase => s.to_lowercase(),
            Transform::Uppercase => s.to_uppercase(),
            Transform::Dashify => s.replace(['_', ' '], "-").to_lowercase(),
            Transform::Underscorify => s.replace(['-', ' '], "_").to_lowercase(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PropertyDescriptor {
    name: String,
    types: TypeUnion,
    required: bool,
    description: Option<String>,
    default: Option<Expr>,
    missing: Option<Expr>,
    explode: Option<String>,
    transforms: Vec<Transform>,
    extra: IndexMap<String, Json>,
}

impl PropertyDescriptor {
    /// Parses a declaration. `class` is only used for error messages.
    pub fn from_def(class: &str, def: &PropertyDef) -> Result<Self> {
        let types = TypeUnion::parse(&def.types).map_err(|reason| {
            BindError::invalid_schema(class, format!("property `{}`: {reason}", def.name))
        })?;
        let boolean_first = types.default_member().is_boolean();

        let mut descriptor = Self {
            name: def.name.clone(),
            types,
            required: false,
            description: None,
            default: None,
            missing: None,
            explode: None,
            transforms: Vec::new(),
            extra: IndexMap::new(),
        };

        for (key, value) in &def.attributes {
            match key.as_str() {
                "required" => descriptor.required = truthy(value),
                "description" => {
                    descriptor.description = value
                        .as_str()
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                }
                "default" => descriptor.default = Some(Expr::parse(value, boolean_first)),
                "missing" => descriptor.missing = Some(Expr::parse(value, boolean_first)),
                "explode" => {
                    let delimiter = value.as_str().map(unquote).unwrap_or(",");
                    if delimiter.is_empty() {
                        return Err(BindError::invalid_schema(
                            class,
                            format!("property `{}`: empty explode delimiter", def.name),
                        ));
                    }
                    descriptor.explode = Some(delimiter.to_string());
                }
                other => match Transform::from_key(other) {
                    Some(t) if truthy(value) => descriptor.transforms.push(t),
                    Some(_) => {}
                    None => {
                        descriptor.extra.insert(key.clone(), value.clone());
                    }
                },
            }
        }
        Ok(descriptor)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn types(&self) -> &TypeUnion {
        &self.types
    }

    pub fn required(&self) -> bool {
        self.required
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn default_expr(&self) -> Option<&Expr> {
        self.default.as_ref()
    }

    pub fn missing_expr(&self) -> Option<&Expr> {
        self.missing.as_ref()
    }

    pub fn explode_delimiter(&self) -> Option<&str> {
        self.explode.as_deref()
    }

    pub fn transforms(&self) -> &[Transform] {
        &self.transforms
    }

    pub fn extra_attributes(&self) -> &IndexMap<String, Json> {
        &self.extra
    }

    /// The extra attribute is present and truthy.
    pub fn is_true(&self, key: &str) -> bool {
        self.extra.get(key).is_some_and(truthy)
    }

    /// The extra attribute is present and falsy.
    pub fn is_false(&self, key: &str) -> bool {
        self.extra.get(key).is_some_and(|v| !truthy(v))
    }

    /// An extra attribute; strings come back trimmed.
    pub fn extra(&self, key: &str) -> Option<Json> {
        self.extra.get(key).map(|v| match v {
            Json::String(s) => Json::String(s.trim().to_string()),
            other => other.clone(),
        })
    }

    /// Sibling names referenced by `missing`/`default`.
    pub fn back_references(&self) -> impl Iterator<Item = &str> {
        self.missing
            .iter()
            .chain(self.default.iter())
            .filter_map(Expr::back_reference)
    }

    /// Fills an absent value. `siblings` holds the properties resolved so far
    /// in declaration order. A present, non-null `raw` always wins.
    pub fn resolve_default(
        &self,
        raw: Option<&Json>,
        siblings: &IndexMap<String, Json>,
        identifier: &str,
    ) -> Result<Json> {
        if let Some(raw) = raw.filter(|v| !v.is_null()) {
            return Ok(raw.clone());
        }
        let Some(expr) = self.missing.as_ref().or(self.default.as_ref()) else {
            return Ok(Json::Null);
        };
        let lookup = |name: &str| {
            siblings
                .get(name)
                .ok_or_else(|| BindError::UndeclaredBackReference {
                    identifier: identifier.to_string(),
                    reference: name.to_string(),
                })
        };
        Ok(match expr {
            Expr::Literal(v) => v.clone(),
            Expr::Sibling(name) => lookup(name)?.clone(),
            Expr::NotSibling(name) => Json::Bool(!truthy(lookup(name)?)),
        })
    }

    /// Applies transforms and `explode` to a resolved string value.
    pub fn post_process(&self, value: Value) -> Value {
        let Value::String(mut s) = value else {
            return value;
        };
        for t in &self.transforms {
            s = t.apply(&s);
        }
        match &self.explode {
            Some(delimiter) => Value::Json(Json::Array(
                s.split(delimiter.as_str())
                    .map(str::trim)
                    .map(|piece| Json::String(piece.to_string()))
                    .collect(),
            )),
            None => Value::String(s),
        }
    }
}

/// Loose truthiness used by `!$name` and boolean-ish attributes.
pub fn truthy(v: &Json) -> bool {
    match v {
        Json::Null => false,
        Json::Bool(b) => *b,
        Json::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Json::String(s) => !(s.is_empty() || s == "0" || s == "false"),
        Json::Array(xs) => !xs.is_empty(),
        Json::Object(m) => !m.is_empty(),
    }
}

fn unquote(s: &str) -> &str {
    let s = s.trim();
    for q in ['"', '\''] {
        if let Some(inner) = s.strip_prefix(q).and_then(|rest| rest.strip_suffix(q)) {
            return inner;
        }
    }
    s
}
