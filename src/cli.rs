//! CLI: check a schema definition, then validate / encode / decode documents against one of its types.
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow, bail};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use rayon::prelude::*;
use serde_json::Value;

use typegraph::{ConversionOptions, Failure, Heap, TypeId, TypeRegistry};

// ————————————————————————————————————————————————————————————————————————————
// TYPES
// ————————————————————————————————————————————————————————————————————————————

/// validate and convert instance graphs against a typegraph schema definition
#[derive(Parser, Debug)]
pub struct CommandLineInterface {
    #[command(subcommand)]
    cmd: Command,

    /// more logging (-v info, -vv debug, -vvv trace); RUST_LOG wins when set
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// load a schema definition, resolve its links and validate every schema
    Check(CheckCmd),
    /// validate plain JSON documents against a type
    Validate(ValidateCmd),
    /// convert plain JSON documents to DTOs
    Encode(EncodeCmd),
    /// rebuild instances from DTO documents and print them as plain JSON
    Decode(DecodeCmd),
}

#[derive(Args, Debug, Clone)]
struct SchemaSettings {
    /// schema definition file (.json)
    #[arg(long, short)]
    schema: PathBuf,
}

#[derive(Args, Debug, Clone)]
struct TargetSettings {
    #[command(flatten)]
    schema_settings: SchemaSettings,

    /// type path inside the schema, e.g. `Person` or `shapes/Shape`
    #[arg(long = "type", short = 't')]
    type_path: String,
}

#[derive(Args, Debug, Clone)]
struct InputSettings {
    /// treat input as newline-delimited JSON (NDJSON)
    #[arg(long, default_value_t = false)]
    ndjson: bool,

    /// JSON Pointer to select a subnode in each document (e.g. /data/items/0/payload)
    #[arg(long)]
    json_pointer: Option<String>,

    /// JQ pre-process filter for each document.
    #[arg(long)]
    jq_expr: Option<String>,

    /// One or more inputs. May be literal paths or quoted glob patterns
    #[arg(long, short, num_args = 1.., required = true)]
    input: Vec<String>,
}

#[derive(clap::Parser, Debug)]
struct CheckCmd {
    #[command(flatten)]
    schema_settings: SchemaSettings,
}

#[derive(clap::Parser, Debug)]
struct ValidateCmd {
    #[command(flatten)]
    target: TargetSettings,

    #[command(flatten)]
    input_settings: InputSettings,
}

#[derive(clap::Parser, Debug)]
struct EncodeCmd {
    #[command(flatten)]
    target: TargetSettings,

    #[command(flatten)]
    input_settings: InputSettings,

    /// inline payloads without ids (fails on cycles)
    #[arg(long)]
    tree: bool,

    /// write the type name into every object payload
    #[arg(long)]
    type_info: bool,

    /// property name for --type-info
    #[arg(long, requires = "type_info")]
    type_info_prop: Option<String>,

    /// validate each document before encoding
    #[arg(long)]
    validate: bool,

    /// output .json file (stdout if omitted)
    #[arg(short, long)]
    out: Option<PathBuf>,
}

#[derive(clap::Parser, Debug)]
struct DecodeCmd {
    #[command(flatten)]
    target: TargetSettings,

    #[command(flatten)]
    input_settings: InputSettings,

    /// inputs are tree DTOs
    #[arg(long)]
    tree: bool,

    /// validate each rebuilt instance
    #[arg(long)]
    validate: bool,

    /// output .json file (stdout if omitted)
    #[arg(short, long)]
    out: Option<PathBuf>,
}

/// One input document after pointer / jq selection.
struct Document {
    source: String,
    value: Value,
}

// ————————————————————————————————————————————————————————————————————————————
// IMPLEMENTATION
// ————————————————————————————————————————————————————————————————————————————

impl SchemaSettings {
    fn load(&self) -> Result<TypeRegistry> {
        let src = std::fs::read_to_string(&self.schema)
            .with_context(|| format!("failed to read schema file {}", self.schema.display()))?;
        let mut reg = typegraph::definition::load_str(&src)
            .map_err(|e| anyhow!("{}: {e}", self.schema.display()))?;
        let errors = reg.resolve_links();
        tracing::debug!(unresolved = errors, "links resolved");
        let root = reg.root();
        if let Err(failure) = reg.validate_schema(root) {
            report_failure(&self.schema.display().to_string(), &failure);
            bail!("schema {} is not valid", self.schema.display());
        }
        Ok(reg)
    }
}

impl TargetSettings {
    fn load(&self) -> Result<(TypeRegistry, TypeId)> {
        let reg = self.schema_settings.load()?;
        let id = reg
            .get_type(reg.root(), &self.type_path)
            .ok_or_else(|| anyhow!("no type `{}` in {}", self.type_path, self.schema_settings.schema.display()))?;
        Ok((reg, id))
    }
}

impl InputSettings {
    fn load_documents(&self) -> Result<Vec<Document>> {
        let source_paths = resolve_file_path_patterns(&self.input)?;
        let mut out = Vec::new();
        for source_path in source_paths {
            let source_path_str = source_path.to_string_lossy().to_string();
            let source = std::fs::read_to_string(&source_path)
                .with_context(|| format!("failed to read source file {source_path_str}"))?;
            let raw: Vec<(String, Value)> = if self.ndjson {
                source
                    .lines()
                    .enumerate()
                    .filter(|(_, line)| !line.trim().is_empty())
                    .map(|(i, line)| {
                        let label = format!("{source_path_str}:{}", i + 1);
                        serde_json::from_str(line)
                            .with_context(|| format!("failed to parse JSON ({label})"))
                            .map(|v| (label, v))
                    })
                    .collect::<Result<_>>()?
            } else {
                let v = serde_json::from_str(&source)
                    .with_context(|| format!("failed to parse JSON source file ({source_path_str})"))?;
                vec![(source_path_str, v)]
            };
            for (label, value) in raw {
                out.extend(self.select(label, value)?);
            }
        }
        Ok(out)
    }

    fn select(&self, label: String, value: Value) -> Result<Vec<Document>> {
        let value = match self.json_pointer.as_deref() {
            None => value,
            Some(ptr) => value
                .pointer(ptr)
                .cloned()
                .ok_or_else(|| anyhow!("JSON pointer {ptr} selects nothing in {label}"))?,
        };
        match self.jq_expr.as_deref() {
            None => Ok(vec![Document { source: label, value }]),
            Some(jq_expr) => {
                let results = crate::jq_exec::run_jaq(jq_expr, &value)
                    .with_context(|| format!("failed to apply jq expression to {label}"))?;
                let many = results.len() > 1;
                Ok(results
                    .into_iter()
                    .enumerate()
                    .map(|(i, value)| Document {
                        source: if many { format!("{label}#{i}") } else { label.clone() },
                        value,
                    })
                    .collect())
            }
        }
    }
}

impl CommandLineInterface {
    pub fn load() -> Self {
        Self::parse()
    }

    /// Ok(false) when at least one document failed.
    pub fn run(&self) -> Result<bool> {
        match &self.cmd {
            Command::Check(cmd) => {
                let reg = cmd.schema_settings.load()?;
                eprintln!(
                    "{} {} ({} types)",
                    "✓".green(),
                    cmd.schema_settings.schema.display(),
                    reg.type_count()
                );
                Ok(true)
            }
            Command::Validate(cmd) => {
                let (reg, ty) = cmd.target.load()?;
                let docs = cmd.input_settings.load_documents()?;
                let outcomes: Vec<Result<(), Failure>> = docs
                    .par_iter()
                    .map(|doc| {
                        let mut heap = Heap::new();
                        let value = heap.import_json(&doc.value);
                        reg.ty(ty).validate(&heap, &value)
                    })
                    .collect();
                Ok(summarize(&docs, &outcomes))
            }
            Command::Encode(cmd) => {
                let (reg, ty) = cmd.target.load()?;
                let mut options = if cmd.tree { ConversionOptions::tree() } else { ConversionOptions::graph() };
                if cmd.type_info {
                    options = options.with_type_info(cmd.type_info_prop.as_deref());
                }
                if cmd.validate {
                    options = options.validating();
                }
                let docs = cmd.input_settings.load_documents()?;
                let outcomes: Vec<Result<Value, Failure>> = docs
                    .par_iter()
                    .map(|doc| {
                        let mut heap = Heap::new();
                        let value = heap.import_json(&doc.value);
                        reg.ty(ty).to_dto(&heap, &value, &options)
                    })
                    .collect();
                let ok = summarize(&docs, &outcomes);
                write_outputs(cmd.out.as_ref(), outcomes)?;
                Ok(ok)
            }
            Command::Decode(cmd) => {
                let (reg, ty) = cmd.target.load()?;
                let mut options = if cmd.tree { ConversionOptions::tree() } else { ConversionOptions::graph() };
                if cmd.validate {
                    options = options.validating();
                }
                let docs = cmd.input_settings.load_documents()?;
                let outcomes: Vec<Result<Value, Failure>> = docs
                    .par_iter()
                    .map(|doc| {
                        let mut heap = Heap::new();
                        let value = reg.ty(ty).from_dto(&mut heap, &doc.value, &options)?;
                        Ok(heap.export_json(&value))
                    })
                    .collect();
                let ok = summarize(&docs, &outcomes);
                write_outputs(cmd.out.as_ref(), outcomes)?;
                Ok(ok)
            }
        }
    }
}

// ————————————————————————————————————————————————————————————————————————————
// INTERNAL HELPERS
// ————————————————————————————————————————————————————————————————————————————

fn report_failure(source: &str, failure: &Failure) {
    eprintln!("{} {}: {}", "✗".red(), source.bold(), failure.to_string().red());
}

/// Print one status line per document; true when all succeeded.
fn summarize<T>(docs: &[Document], outcomes: &[Result<T, Failure>]) -> bool {
    let mut failed = 0;
    for (doc, outcome) in docs.iter().zip(outcomes) {
        match outcome {
            Ok(_) => eprintln!("{} {}", "✓".green(), doc.source),
            Err(failure) => {
                failed += 1;
                report_failure(&doc.source, failure);
            }
        }
    }
    if failed > 0 {
        eprintln!("{}", format!("{failed} of {} documents failed", docs.len()).red().bold());
    }
    failed == 0
}

/// Successful results only: a single document as itself, several as an array.
fn write_outputs(out: Option<&PathBuf>, outcomes: Vec<Result<Value, Failure>>) -> Result<()> {
    let mut values: Vec<Value> = outcomes.into_iter().filter_map(Result::ok).collect();
    if values.is_empty() {
        return Ok(());
    }
    let rendered = if values.len() == 1 { values.remove(0) } else { Value::Array(values) };
    let src = serde_json::to_string_pretty(&rendered)?;
    match out {
        Some(out) => {
            if let Some(parent) = out.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(out, &src).with_context(|| format!("failed to write {}", out.display()))?;
        }
        None => println!("{src}"),
    }
    Ok(())
}

fn resolve_file_path_patterns<I>(patterns: I) -> Result<Vec<PathBuf>>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    fn has_glob_chars(s: &str) -> bool {
        s.bytes().any(|b| matches!(b, b'*' | b'?' | b'[' | b'{'))
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
    fn literal_paths_pass_through_and_empty_globs_fail() {
        let paths = resolve_file_path_patterns(["a.json", "dir/b.json"]).unwrap();
        assert_eq!(paths, vec![PathBuf::from("a.json"), PathBuf::from("dir/b.json")]);
        assert!(resolve_file_path_patterns(["/definitely/not/here/*.json"]).is_err());
    }

    #[test]
    fn pointer_narrows_each_document() {
        let settings = InputSettings {
            ndjson: false,
            json_pointer: Some("/data/0".into()),
            jq_expr: None,
            input: vec![],
        };
        let docs = settings.select("x".into(), serde_json::json!({"data": [{"a": 1}]})).unwrap();
        assert_eq!(docs[0].value, serde_json::json!({"a": 1}));
        assert!(settings.select("y".into(), serde_json::json!({})).is_err());
    }

    #[test]
    fn cli_parses_subcommands() {
        let cli = CommandLineInterface::try_parse_from([
            "typegraph", "-vv", "encode", "-s", "schema.json", "-t", "Person", "-i", "a.json", "--tree",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.cmd, Command::Encode(EncodeCmd { tree: true, .. })));
    }
}
