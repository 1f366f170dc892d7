//! Declared property types and the rules for picking one per value.
//!
//! A property declares a union such as `string|Address` or `int[]|mixed`.
//! Tokens are parsed once into [`TypeDescriptor`]s; at load time
//! [`TypeUnion::resolve`] samples the intrinsic kind of a raw JSON value and
//! returns the first member that accepts it.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value as Json;

static CLASS_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(::[A-Za-z_][A-Za-z0-9_]*)*$").unwrap());

/// Kinds a JSON value can have, plus `Mixed` for declarations accepting any.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Null,
    Boolean,
    Integer,
    Number,
    String,
    Array,
    Object,
    Mixed,
}

impl Kind {
    pub fn as_str(self) -> &'static str {
        match self {
            Kind::Null => "null",
            Kind::Boolean => "boolean",
            Kind::Integer => "integer",
            Kind::Number => "number",
            Kind::String => "string",
            Kind::Array => "array",
            Kind::Object => "object",
            Kind::Mixed => "mixed",
        }
    }

    fn from_token(token: &str) -> Option<Kind> {
        Some(match token {
            "string" => Kind::String,
            "int" | "integer" => Kind::Integer,
            "bool" | "boolean" => Kind::Boolean,
            "float" | "double" | "number" => Kind::Number,
            "object" => Kind::Object,
            "mixed" => Kind::Mixed,
            _ => return None,
        })
    }

    /// Whether a declared kind accepts an observed one.
    fn accepts(self, observed: Kind) -> bool {
        self == Kind::Mixed
            || self == observed
            || (self == Kind::Number && observed == Kind::Integer)
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Intrinsic kind of a decoded JSON value.
pub fn kind_of(v: &Json) -> Kind {
    match v {
        Json::Null => Kind::Null,
        Json::Bool(_) => Kind::Boolean,
        Json::Number(n) if n.is_i64() || n.is_u64() => Kind::Integer,
        Json::Number(_) => Kind::Number,
        Json::String(_) => Kind::String,
        Json::Array(_) => Kind::Array,
        Json::Object(_) => Kind::Object,
    }
}

/// The active shape of a descriptor. Exactly one applies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Shape {
    /// `string`, `integer`, `number`, `boolean`, `object` (raw) or `mixed`.
    Scalar(Kind),
    /// `T[]` for a non-class `T`; `array` is `ArrayOf(Mixed)`.
    ArrayOf(Kind),
    /// A registered class.
    Class(String),
    /// An array whose elements are instances of a registered class.
    ClassArray(String),
}

/// One member of a declared type union.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDescriptor {
    declared: String,
    shape: Shape,
}

impl TypeDescriptor {
    pub fn parse(token: &str) -> Result<Self, String> {
        let declared = token.trim();
        if declared.is_empty() {
            return Err("empty type in union".to_string());
        }
        let shape = if declared == "array" {
            Shape::ArrayOf(Kind::Mixed)
        } else if let Some(elem) = declared.strip_suffix("[]") {
            match Kind::from_token(elem) {
                Some(kind) => Shape::ArrayOf(kind),
                None if elem == "array" => Shape::ArrayOf(Kind::Array),
                None => Shape::ClassArray(class_name(elem)?),
            }
        } else {
            match Kind::from_token(declared) {
                Some(kind) => Shape::Scalar(kind),
                None => Shape::Class(class_name(declared)?),
            }
        };
        Ok(Self {
            declared: declared.to_string(),
            shape,
        })
    }

    pub fn declared_text(&self) -> &str {
        &self.declared
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn base_kind(&self) -> Kind {
        match &self.shape {
            Shape::Scalar(kind) => *kind,
            Shape::ArrayOf(_) | Shape::ClassArray(_) => Kind::Array,
            Shape::Class(_) => Kind::Object,
        }
    }

    pub fn element_kind(&self) -> Option<Kind> {
        match &self.shape {
            Shape::ArrayOf(kind) => Some(*kind),
            Shape::ClassArray(_) => Some(Kind::Object),
            _ => None,
        }
    }

    pub fn referenced_type(&self) -> Option<&str> {
        match &self.shape {
            Shape::Class(name) | Shape::ClassArray(name) => Some(name),
            _ => None,
        }
    }

    pub fn is_array(&self) -> bool {
        self.base_kind() == Kind::Array
    }

    pub fn is_boolean(&self) -> bool {
        self.shape == Shape::Scalar(Kind::Boolean)
    }

    /// Does this member accept `value`, whose intrinsic kind is `observed`?
    fn accepts(&self, observed: Kind, value: &Json) -> bool {
        match &self.shape {
            Shape::Scalar(kind) => kind.accepts(observed),
            Shape::Class(_) => observed == Kind::Object,
            Shape::ArrayOf(_) | Shape::ClassArray(_) if observed != Kind::Array => false,
            Shape::ArrayOf(elem) => match sample_element(value) {
                None => true,
                Some(sample) => elem.accepts(sample),
            },
            Shape::ClassArray(_) => match sample_element(value) {
                None => true,
                Some(sample) => sample == Kind::Object,
            },
        }
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.declared)
    }
}

fn class_name(token: &str) -> Result<String, String> {
    if CLASS_NAME.is_match(token) {
        Ok(token.to_string())
    } else {
        Err(format!("`{token}` is not a valid type or class name"))
    }
}

/// Arrays are assumed homogeneous: only the first non-null element is looked at.
fn sample_element(value: &Json) -> Option<Kind> {
    value
        .as_array()?
        .iter()
        .find(|el| !el.is_null())
        .map(kind_of)
}

/// A non-empty, ordered union of declared types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeUnion {
    members: Vec<TypeDescriptor>,
}

impl TypeUnion {
    pub fn parse(text: &str) -> Result<Self, String> {
        let members = text
            .split('|')
            .map(TypeDescriptor::parse)
            .collect::<Result<Vec<_>, _>>()?;
        // `split` always yields at least one piece, and empty pieces are rejected
        Ok(Self { members })
    }

    pub fn members(&self) -> &[TypeDescriptor] {
        &self.members
    }

    /// The first declared member; used for absent and null values.
    pub fn default_member(&self) -> &TypeDescriptor {
        &self.members[0]
    }

    pub fn has_array_member(&self) -> bool {
        self.members.iter().any(TypeDescriptor::is_array)
    }

    /// Picks the member governing `value`. First match wins; `None` means no
    /// member accepts it.
    pub fn resolve(&self, value: &Json) -> Option<&TypeDescriptor> {
        let observed = kind_of(value);
        if observed == Kind::Null {
            return Some(self.default_member());
        }
        let found = self.members.iter().find(|m| m.accepts(observed, value));
        tracing::trace!(
            union = %self,
            %observed,
            chosen = found.map(|m| m.declared_text()),
            "resolved type"
        );
        found
    }
}

impl fmt::Display for TypeUnion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, member) in self.members.iter().enumerate() {
            if i > 0 {
                f.write_str("|")?;
            }
            f.write_str(member.declared_text())?;
        }
        Ok(())
    }
}

/// Short rendering of a value for error messages.
pub fn preview(value: &Json) -> String {
    const MAX: usize = 80;
    let text = value.to_string();
    if text.chars().count() <= MAX {
        text
    } else {
        let cut: String = text.chars().take(MAX).collect();
        format!("{cut}…")
    }
}
