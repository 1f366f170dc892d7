//! Command line: bind input documents against a schema, then check, show, or export them.
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use rayon::prelude::*;
use serde_json::Value as Json;

use crate::error::BindError;
use crate::graph::Graph;
use crate::loader::{Loader, LoaderConfig};
use crate::report::{ConsoleSink, ErrorSink};
use crate::schema::SchemaRegistry;
use crate::validate::{self, Violations};

// ————————————————————————————————————————————————————————————————————————————
// TYPES
// ————————————————————————————————————————————————————————————————————————————

/// bind JSON documents onto schema-described object graphs and validate them
#[derive(Parser, Debug)]
pub struct CommandLineInterface {
    /// log at debug level (RUST_LOG overrides)
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// build and validate every input; exit 1 on any failure
    Check(CheckOut),
    /// build every input and print an indented dump of the graph
    Show(ShowOut),
    /// build every input and print the resolved values as JSON
    Export(ExportOut),
}

#[derive(Args, Debug, Clone)]
struct InputSettings {
    /// treat input as newline-delimited JSON (NDJSON)
    #[arg(long, default_value_t = false)]
    ndjson: bool,

    /// JSON Pointer to select a subnode in each document (e.g. /data/items/0/payload)
    #[arg(long)]
    json_pointer: Option<String>,

    /// JQ pre-process filter for each document; every output is bound separately
    #[arg(long)]
    jq_expr: Option<String>,

    /// One or more inputs. May be literal paths or quoted glob patterns
    #[arg(long, short, num_args = 1.., required = true)]
    input: Vec<String>,
}

#[derive(Args, Debug, Clone)]
struct SchemaSettings {
    /// schema file: `.json` schema document, anything else is the annotation DSL
    #[arg(long, short)]
    schema: PathBuf,

    /// root class (defaults to the root named by the schema file)
    #[arg(long)]
    root: Option<String>,
}

#[derive(Args, Debug, Clone)]
struct LoadSettings {
    /// deepest nesting of class instances allowed
    #[arg(long, default_value_t = LoaderConfig::default().max_depth)]
    max_depth: usize,

    /// drop undeclared input keys instead of keeping them as extras
    #[arg(long, default_value_t = false)]
    drop_extras: bool,
}

#[derive(clap::Parser, Debug)]
struct CheckOut {
    #[command(flatten)]
    schema_settings: SchemaSettings,
    #[command(flatten)]
    input_settings: InputSettings,
    #[command(flatten)]
    load_settings: LoadSettings,
}

#[derive(clap::Parser, Debug)]
struct ShowOut {
    #[command(flatten)]
    schema_settings: SchemaSettings,
    #[command(flatten)]
    input_settings: InputSettings,
    #[command(flatten)]
    load_settings: LoadSettings,

    /// show graphs even when they fail validation
    #[arg(long, default_value_t = false)]
    no_validate: bool,
}

#[derive(clap::Parser, Debug)]
struct ExportOut {
    #[command(flatten)]
    schema_settings: SchemaSettings,
    #[command(flatten)]
    input_settings: InputSettings,
    #[command(flatten)]
    load_settings: LoadSettings,

    /// output .json file (stdout if omitted); several documents are written as an array
    #[arg(short, long)]
    out: Option<PathBuf>,
}

/// One bindable document and where it came from.
struct Document {
    label: String,
    value: Result<Json, BindError>,
}

enum Outcome {
    Fatal(BindError),
    Built { graph: Graph, violations: Violations },
}

// ————————————————————————————————————————————————————————————————————————————
// IMPLEMENTATION
// ————————————————————————————————————————————————————————————————————————————

impl InputSettings {
    fn load_documents(&self) -> anyhow::Result<Vec<Document>> {
        let source_paths = resolve_file_path_patterns(&self.input)
            .context("failed to resolve input file paths")?;
        let mut out = Vec::new();
        for source_path in source_paths {
            let source_path_str = source_path.to_string_lossy().to_string();
            let source = std::fs::read_to_string(&source_path).map_err(|source| BindError::Io {
                path: source_path.clone(),
                source,
            });
            let source = match source {
                Ok(x) => x,
                Err(error) => {
                    out.push(Document { label: source_path_str, value: Err(error) });
                    continue;
                }
            };
            if self.ndjson {
                for (line_no, line) in source.lines().enumerate() {
                    if line.trim().is_empty() {
                        continue;
                    }
                    let label = format!("{source_path_str}:{}", line_no + 1);
                    self.select(label, parse_document(line), &mut out);
                }
            } else {
                self.select(source_path_str, parse_document(&source), &mut out);
            }
        }
        Ok(out)
    }

    /// Applies `--json-pointer` then `--jq-expr` to one parsed document.
    fn select(&self, label: String, parsed: Result<Json, BindError>, out: &mut Vec<Document>) {
        let value = match parsed {
            Ok(v) => v,
            Err(error) => {
                out.push(Document { label, value: Err(error) });
                return;
            }
        };
        let value = match self.json_pointer.as_deref() {
            None => value,
            Some(pointer) => match value.pointer(pointer) {
                Some(v) => v.clone(),
                None => {
                    let error = BindError::malformed(format!("JSON pointer {pointer} selects nothing"));
                    out.push(Document { label, value: Err(error) });
                    return;
                }
            },
        };
        match self.jq_expr.as_deref() {
            None => out.push(Document { label, value: Ok(value) }),
            Some(jq_expr) => match crate::jq_exec::run_jaq(jq_expr, &value) {
                Ok(results) => {
                    for (index, value) in results.into_iter().enumerate() {
                        out.push(Document {
                            label: format!("{label}#{index}"),
                            value: Ok(value),
                        });
                    }
                }
                Err(error) => {
                    let error = BindError::malformed(format!("failed to apply jq expression: {error}"));
                    out.push(Document { label, value: Err(error) });
                }
            },
        }
    }
}

impl SchemaSettings {
    fn load(&self) -> anyhow::Result<(SchemaRegistry, String)> {
        let registry = SchemaRegistry::from_path(&self.schema)
            .with_context(|| format!("failed to load schema {}", self.schema.display()))?;
        let root = match self.root.clone().or_else(|| registry.default_root().map(str::to_string)) {
            Some(root) => root,
            None => bail!(
                "no root class: pass --root or name one in {}",
                self.schema.display()
            ),
        };
        // resolve the root schema once, before any document
        registry
            .schema(&root)
            .with_context(|| format!("root class `{root}` cannot be used"))?;
        Ok((registry, root))
    }
}

impl LoadSettings {
    fn config(&self) -> LoaderConfig {
        LoaderConfig {
            max_depth: self.max_depth,
            capture_extras: !self.drop_extras,
        }
    }
}

impl CommandLineInterface {
    pub fn load() -> Self {
        Self::parse()
    }

    pub fn run(&self) -> anyhow::Result<ExitCode> {
        let mut sink = ConsoleSink::stderr();
        match &self.cmd {
            Command::Check(target) => {
                let outcomes = build_all(&target.schema_settings, &target.input_settings, &target.load_settings)?;
                for (label, outcome) in &outcomes {
                    match outcome {
                        Outcome::Fatal(error) => sink.report_fatal(Some(label.as_str()), error),
                        Outcome::Built { violations, .. } if !violations.is_empty() => {
                            sink.report_violations(Some(label.as_str()), violations)
                        }
                        Outcome::Built { graph, .. } => {
                            println!("{label}: ok ({} objects)", graph.len())
                        }
                    }
                }
            }
            Command::Show(target) => {
                let color = std::io::stdout().is_terminal() && std::env::var_os("NO_COLOR").is_none();
                let outcomes = build_all(&target.schema_settings, &target.input_settings, &target.load_settings)?;
                for (label, outcome) in &outcomes {
                    match outcome {
                        Outcome::Fatal(error) => sink.report_fatal(Some(label.as_str()), error),
                        Outcome::Built { graph, violations } => {
                            if !target.no_validate {
                                sink.report_violations(Some(label.as_str()), violations);
                            }
                            match crate::output::show(graph, color) {
                                Ok(text) => print!("{text}"),
                                Err(error) => sink.report_fatal(Some(label.as_str()), &error),
                            }
                        }
                    }
                }
            }
            Command::Export(target) => {
                let outcomes = build_all(&target.schema_settings, &target.input_settings, &target.load_settings)?;
                let mut exported = Vec::new();
                for (label, outcome) in &outcomes {
                    match outcome {
                        Outcome::Fatal(error) => sink.report_fatal(Some(label.as_str()), error),
                        Outcome::Built { violations, .. } if !violations.is_empty() => {
                            sink.report_violations(Some(label.as_str()), violations)
                        }
                        Outcome::Built { graph, .. } => {
                            match crate::output::to_json(graph, graph.root_id()) {
                                Ok(value) => exported.push(value),
                                Err(error) => sink.report_fatal(Some(label.as_str()), &error),
                            }
                        }
                    }
                }
                let payload = match exported.len() {
                    1 => exported.remove(0),
                    _ => Json::Array(exported),
                };
                let src = serde_json::to_string_pretty(&payload)?;
                if let Some(out) = target.out.as_ref() {
                    if let Some(parent) = out.parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                    std::fs::write(out, &src)
                        .with_context(|| format!("failed to write {}", out.display()))?;
                } else {
                    println!("{src}");
                }
            }
        }
        Ok(if sink.failed() { ExitCode::FAILURE } else { ExitCode::SUCCESS })
    }
}

// ————————————————————————————————————————————————————————————————————————————
// INTERNAL HELPERS
// ————————————————————————————————————————————————————————————————————————————

/// Builds every input document in parallel; results keep input order.
fn build_all(
    schema_settings: &SchemaSettings,
    input_settings: &InputSettings,
    load_settings: &LoadSettings,
) -> anyhow::Result<Vec<(String, Outcome)>> {
    let (registry, root) = schema_settings.load()?;
    let documents = input_settings.load_documents()?;
    let loader = Loader::new(&registry).with_config(load_settings.config());
    tracing::debug!(documents = documents.len(), root = %root, "building");

    Ok(documents
        .into_par_iter()
        .map(|doc| {
            let outcome = match doc.value.and_then(|value| loader.load_value(&root, &value)) {
                Ok(graph) => {
                    let violations = validate::validate(&graph);
                    Outcome::Built { graph, violations }
                }
                Err(error) => Outcome::Fatal(error),
            };
            (doc.label, outcome)
        })
        .collect())
}

fn parse_document(text: &str) -> Result<Json, BindError> {
    if text.trim().is_empty() {
        return Err(BindError::malformed("the JSON value provided is empty"));
    }
    serde_json::from_str(text)
        .map_err(|e| BindError::malformed(format!("the JSON value provided has invalid syntax: {e}")))
}

fn resolve_file_path_patterns<I>(patterns: I) -> anyhow::Result<Vec<PathBuf>>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    fn has_glob_chars(s: &str) -> bool {
        // Minimal glob detection for the `glob` crate syntax.
        s.bytes().any(|b| matches!(b, b'*' | b'?' | b'['))
    }

    let mut out = Vec::<PathBuf>::new();

    for raw in patterns {
        let pattern = raw.as_ref();

        if has_glob_chars(pattern) {
            let mut matched_any = false;
            for entry in glob::glob(pattern)? {
                out.push(entry?);
                matched_any = true;
            }
            if !matched_any {
                // Pattern was explicitly a glob but matched nothing -> surface as an error
                bail!("glob pattern matched no files: {pattern}");
            }
        } else {
            out.push(PathBuf::from(pattern));
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_subcommands_and_shared_flags() {
        let cli = CommandLineInterface::try_parse_from([
            "json-bind", "check", "--schema", "s.json", "-i", "a.json", "b.json", "--max-depth", "8", "-v",
        ])
        .unwrap();
        assert!(cli.verbose);
        match cli.cmd {
            Command::Check(target) => {
                assert_eq!(target.input_settings.input, ["a.json", "b.json"]);
                assert_eq!(target.load_settings.config().max_depth, 8);
                assert!(target.load_settings.config().capture_extras);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn documents_are_selected_by_pointer() {
        let settings = InputSettings {
            ndjson: false,
            json_pointer: Some("/data".into()),
            jq_expr: None,
            input: vec![],
        };
        let mut out = Vec::new();
        settings.select("doc".into(), Ok(serde_json::json!({"data": {"a": 1}})), &mut out);
        settings.select("bad".into(), Ok(serde_json::json!({})), &mut out);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].value.as_ref().unwrap(), &serde_json::json!({"a": 1}));
        assert!(matches!(out[1].value, Err(BindError::MalformedInput { .. })));
    }

    #[test]
    fn missing_glob_matches_are_errors() {
        assert!(resolve_file_path_patterns(["/definitely/not/here/*.json"]).is_err());
        let literal = resolve_file_path_patterns(["plain.json"]).unwrap();
        assert_eq!(literal, [PathBuf::from("plain.json")]);
    }
}
