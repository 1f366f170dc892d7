//! Annotation-style schema DSL.
//!
//! ```text
//! @root Project
//!
//! /**
//!  * @class Project
//!  * @identifier slug
//!  * @property string $slug Short name {@required @lowercase}
//!  * @property Item[] $items
//!  * @property string $tags Comma separated {@explode ","}
//!  * @property boolean $verbose
//!  * @property boolean $quiet {@missing !$verbose
//!  *     @label Quiet mode}
//!  */
//!
//! @class Item extends Base
//! @property string|Address $address
//! ```
//!
//! Comment decoration (`/**`, `*`, `*/`, `//`, `#`) is ignored. Sub-attributes
//! sit inside `{...}`, may continue over following lines until the closing
//! brace, and a bare `@key` means `true`.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value as Json;

use super::{ClassDef, SchemaRegistry};
use crate::error::{BindError, Result};
use crate::property::PropertyDef;

static DECORATION: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*(?:/\*\*?|\*/|\*|//|#)?\s*").unwrap());

static CLASS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^@class\s+([A-Za-z_][A-Za-z0-9_:]*)(?:\s+extends\s+([A-Za-z_][A-Za-z0-9_:]*))?\s*$")
        .unwrap()
});

static ROOT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^@root\s+([A-Za-z_][A-Za-z0-9_:]*)\s*$").unwrap());

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^@identifier\s+([A-Za-z_][A-Za-z0-9_]*)\s*$").unwrap());

static PROPERTY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^@property\s+(\S+)\s+\$([A-Za-z_][A-Za-z0-9_]*)\s*([^{]*?)\s*(?:\{(.*?)(\})?)?\s*$")
        .unwrap()
});

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

pub fn parse(text: &str) -> Result<SchemaRegistry> {
    let mut registry = SchemaRegistry::new();
    let mut current: Option<ClassDef> = None;
    let lines: Vec<&str> = text.lines().collect();
    let mut index = 0;

    while index < lines.len() {
        let line_no = index + 1;
        let line = undecorate(lines[index]);
        index += 1;
        if line.is_empty() || !line.starts_with('@') {
            continue;
        }

        if let Some(caps) = ROOT.captures(line) {
            registry.set_default_root(&caps[1]);
        } else if let Some(caps) = CLASS.captures(line) {
            if let Some(done) = current.take() {
                registry.register(done);
            }
            let mut def = ClassDef::new(&caps[1]);
            def.extends = caps.get(2).map(|m| m.as_str().to_string());
            if registry.contains(&def.name) {
                return Err(BindError::invalid_schema(
                    &def.name,
                    format!("line {line_no}: class declared twice"),
                ));
            }
            current = Some(def);
        } else if let Some(caps) = IDENTIFIER.captures(line) {
            let def = in_class(&mut current, line_no, "@identifier")?;
            def.identifier = Some(caps[1].to_string());
        } else if let Some(caps) = PROPERTY.captures(line) {
            let def = in_class(&mut current, line_no, "@property")?;
            let types = caps[1].to_string();
            let mut property = PropertyDef::new(&caps[2], types.clone());
            if def.properties.iter().any(|p| p.name == property.name) {
                return Err(BindError::invalid_schema(
                    &def.name,
                    format!("line {line_no}: property `{}` is declared twice", property.name),
                ));
            }
            let description = caps[3].trim();
            if !description.is_empty() {
                property = property.attr("description", description);
            }

            if let Some(open) = caps.get(4) {
                let mut body = open.as_str().to_string();
                if caps.get(5).is_none() {
                    // continue onto following lines until the brace closes
                    loop {
                        if index >= lines.len() {
                            return Err(BindError::invalid_schema(
                                &def.name,
                                format!("line {line_no}: unterminated `{{` for `${}`", property.name),
                            ));
                        }
                        let next = undecorate(lines[index]);
                        index += 1;
                        if let Some((head, _)) = next.split_once('}') {
                            body.push(' ');
                            body.push_str(head);
                            break;
                        }
                        body.push(' ');
                        body.push_str(next);
                    }
                }
                for (key, value) in sub_attributes(&body, &types) {
                    property = property.attr(key, value);
                }
            }
            def.properties.push(property);
        } else {
            let name = current.as_ref().map(|c| c.name.as_str()).unwrap_or("<schema>");
            return Err(BindError::invalid_schema(
                name,
                format!("line {line_no}: cannot parse `{line}`"),
            ));
        }
    }

    if let Some(done) = current.take() {
        registry.register(done);
    }
    Ok(registry)
}

fn undecorate(line: &str) -> &str {
    let start = DECORATION.find(line).map(|m| m.end()).unwrap_or(0);
    line[start..].trim_end()
}

fn in_class<'a>(
    current: &'a mut Option<ClassDef>,
    line_no: usize,
    what: &str,
) -> Result<&'a mut ClassDef> {
    current.as_mut().ok_or_else(|| {
        BindError::invalid_schema("<schema>", format!("line {line_no}: {what} outside of a @class"))
    })
}

/// Splits `@key value @flag` into attributes. Numeric values become numbers
/// when the property's first declared type is numeric.
fn sub_attributes(body: &str, types: &str) -> Vec<(String, Json)> {
    let first = types.split('|').next().unwrap_or_default();
    let numeric_first = matches!(first, "int" | "integer" | "float" | "double" | "number");

    body.split('@')
        .map(|piece| WHITESPACE.replace_all(piece.trim(), " ").into_owned())
        .filter(|piece| !piece.is_empty())
        .map(|piece| {
            let (key, argument) = match piece.split_once(' ') {
                Some((key, rest)) => (key.to_string(), rest.trim().to_string()),
                None => (piece, String::new()),
            };
            let value = if argument.is_empty() {
                Json::Bool(true)
            } else if numeric_first && matches!(key.as_str(), "default" | "missing") {
                serde_json::from_str::<serde_json::Number>(&argument)
                    .map(Json::Number)
                    .unwrap_or(Json::String(argument))
            } else {
                Json::String(unquote(&argument).to_string())
            };
            (key, value)
        })
        .collect()
}

fn unquote(s: &str) -> &str {
    for quote in ['"', '\''] {
        if let Some(inner) = s.strip_prefix(quote).and_then(|rest| rest.strip_suffix(quote)) {
            return inner;
        }
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::Expr;
    use serde_json::json;

    const SOURCE: &str = r#"
@root Project

/**
 * @class Project
 * @identifier slug
 * @property string $slug Short name {@required @lowercase}
 * @property Item[] $items
 * @property string $tags Comma separated {@explode ","}
 * @property boolean $verbose
 * @property boolean $quiet {@missing !$verbose
 *     @label Quiet   mode}
 * @property int $retries {@default 3}
 * @property string $license {@default 'MIT'}
 */

// @class Item
// @property string $id {@required}
"#;

    #[test]
    fn parses_annotation_blocks() {
        let registry = parse(SOURCE).unwrap();
        assert_eq!(registry.default_root(), Some("Project"));
        let schema = registry.schema("Project").unwrap();
        assert_eq!(schema.identifier(), Some("slug"));

        let names: Vec<_> = schema.properties().keys().map(String::as_str).collect();
        assert_eq!(
            names,
            ["slug", "items", "tags", "verbose", "quiet", "retries", "license"]
        );

        let slug = schema.property("slug").unwrap();
        assert!(slug.required());
        assert_eq!(slug.description(), Some("Short name"));
        assert_eq!(slug.transforms(), [crate::property::Transform::Lowercase]);

        assert_eq!(schema.property("tags").unwrap().explode_delimiter(), Some(","));

        let quiet = schema.property("quiet").unwrap();
        assert_eq!(quiet.missing_expr(), Some(&Expr::NotSibling("verbose".into())));
        assert_eq!(quiet.extra("label"), Some(json!("Quiet mode")));

        let retries = schema.property("retries").unwrap();
        assert_eq!(retries.default_expr(), Some(&Expr::Literal(json!(3))));
        let license = schema.property("license").unwrap();
        assert_eq!(license.default_expr(), Some(&Expr::Literal(json!("MIT"))));

        let item = registry.schema("Item").unwrap();
        assert!(item.property("id").unwrap().required());
    }

    #[test]
    fn rejects_lines_it_cannot_read() {
        let err = parse("@class Root\n@property string\n").unwrap_err();
        assert!(err.to_string().contains("line 2"));

        let err = parse("@property string $x\n").unwrap_err();
        assert!(err.to_string().contains("outside of a @class"));

        let err = parse("@class Root\n@property string $x {@missing $y\n").unwrap_err();
        assert!(err.to_string().contains("unterminated"));
    }

    #[test]
    fn plain_prose_is_ignored() {
        let registry = parse("Some notes about the schema.\n@class Root\n * more prose\n").unwrap();
        assert!(registry.contains("Root"));
    }
}
