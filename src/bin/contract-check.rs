//! Contract Check CLI
//!
//! Command-line interface for validating, expanding, and inspecting hybrid
//! UI contract documents.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use contract_check::{
    parse_imports, resolve_imports, JsonSchemaValidator, Severity, ValidateOptions,
    ValidationPipeline, ValidationReport, DEFAULT_MAX_DEPTH,
};

#[derive(Parser)]
#[command(name = "contract-check")]
#[command(about = "Validate hybrid UI contract documents (JSON + templates + imports)")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a document, reporting findings at original source positions
    Validate {
        /// Document to validate (.json or .j2.json)
        file: PathBuf,

        /// JSON Schema to validate the final document against
        #[arg(long)]
        schema: Option<PathBuf>,

        /// Context bindings file (JSON object) for template rendering
        #[arg(long)]
        context: Option<PathBuf>,

        /// Template rendering deadline in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Output the report as JSON (for automation)
        #[arg(long)]
        json: bool,

        /// Suppress warnings, only show errors
        #[arg(long, short)]
        quiet: bool,
    },

    /// Render templates and expand imports, printing the final text
    Expand {
        /// Document to expand
        file: PathBuf,

        /// Context bindings file (JSON object) for template rendering
        #[arg(long)]
        context: Option<PathBuf>,

        /// Template rendering deadline in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Output file (stdout if not specified)
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Print the import dependency graph of a document
    Graph {
        /// Document to inspect
        file: PathBuf,

        /// Output the graph as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Validate {
            file,
            schema,
            context,
            timeout_ms,
            json,
            quiet,
        } => run_validate(&file, schema.as_deref(), context.as_deref(), timeout_ms, json, quiet),

        Commands::Expand {
            file,
            context,
            timeout_ms,
            output,
        } => run_expand(&file, context.as_deref(), timeout_ms, output),

        Commands::Graph { file, json } => run_graph(&file, json),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(code) => ExitCode::from(code),
    }
}

/// Load a JSON object file as template context bindings.
fn load_context(path: &Path) -> Result<serde_json::Map<String, serde_json::Value>, u8> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        eprintln!("Error reading context file {}: {}", path.display(), e);
        3u8
    })?;
    let value: serde_json::Value = serde_json::from_str(&content).map_err(|e| {
        eprintln!("Error: context file {} is not valid JSON: {}", path.display(), e);
        2u8
    })?;
    match value {
        serde_json::Value::Object(map) => Ok(map),
        _ => {
            eprintln!(
                "Error: context file {} must contain a JSON object",
                path.display()
            );
            Err(2)
        }
    }
}

fn run_validate(
    file: &Path,
    schema: Option<&Path>,
    context: Option<&Path>,
    timeout_ms: Option<u64>,
    json_output: bool,
    quiet: bool,
) -> Result<(), u8> {
    let mut pipeline = ValidationPipeline::new();
    if let Some(schema_path) = schema {
        let validator = JsonSchemaValidator::from_file(schema_path).map_err(|e| {
            eprintln!("Error: {}", e);
            e.exit_code() as u8
        })?;
        pipeline = pipeline.with_validator(Box::new(validator));
    }

    let options = ValidateOptions {
        context: match context {
            Some(path) => Some(load_context(path)?),
            None => None,
        },
        timeout_ms,
        max_import_depth: DEFAULT_MAX_DEPTH,
    };

    let report = pipeline.validate(file, &options).map_err(|e| {
        eprintln!("Error: {}", e);
        e.exit_code() as u8
    })?;

    if json_output {
        match serde_json::to_string_pretty(&report) {
            Ok(text) => println!("{}", text),
            Err(e) => {
                eprintln!("Error serializing report: {}", e);
                return Err(2);
            }
        }
    } else {
        print_report(&report, quiet);
    }

    if report.fatal {
        Err(2)
    } else if report.success {
        Ok(())
    } else {
        Err(1)
    }
}

fn print_report(report: &ValidationReport, quiet: bool) {
    for finding in &report.errors {
        let location = finding
            .link
            .clone()
            .unwrap_or_else(|| report.file.display().to_string());
        println!("\x1b[31merror\x1b[0m[{}]: {}", finding.code, finding.message);
        println!("  --> {}", location);
        if let Some(source) = &finding.source {
            if !source.excerpt.is_empty() {
                println!("   | {}", source.excerpt);
            }
        }
    }

    if !quiet {
        for finding in &report.warnings {
            if finding.severity != Severity::Warning {
                continue;
            }
            let location = finding
                .link
                .clone()
                .unwrap_or_else(|| report.file.display().to_string());
            println!(
                "\x1b[33mwarning\x1b[0m[{}]: {}",
                finding.code, finding.message
            );
            println!("  --> {}", location);
        }
    }

    if report.success {
        println!(
            "\x1b[32m✓ {} valid\x1b[0m ({} warnings)",
            report.file.display(),
            report.warnings.len()
        );
    } else {
        println!(
            "\x1b[31m✗ {} invalid\x1b[0m ({} errors, {} warnings)",
            report.file.display(),
            report.errors.len(),
            report.warnings.len()
        );
    }
}

fn run_expand(
    file: &Path,
    context: Option<&Path>,
    timeout_ms: Option<u64>,
    output: Option<PathBuf>,
) -> Result<(), u8> {
    use contract_check::{render_template, resolve_context, RenderLimits};

    let content = std::fs::read_to_string(file).map_err(|e| {
        eprintln!("Error reading {}: {}", file.display(), e);
        3u8
    })?;

    let overrides = match context {
        Some(path) => Some(load_context(path)?),
        None => None,
    };
    let (bindings, _) = resolve_context(file, &content, overrides.as_ref());

    let limits = RenderLimits {
        timeout_ms: timeout_ms.unwrap_or_else(|| RenderLimits::default().timeout_ms),
    };
    let rendered = render_template(file, &content, &bindings, &limits).map_err(|e| {
        eprintln!("Error: {}", e);
        2u8
    })?;

    let expanded = resolve_imports(&rendered.text, file, DEFAULT_MAX_DEPTH).map_err(|e| {
        eprintln!("Error: {}", e);
        2u8
    })?;

    match output {
        Some(path) => {
            std::fs::write(&path, &expanded.text).map_err(|e| {
                eprintln!("Error writing to {}: {}", path.display(), e);
                3u8
            })?;
        }
        None => {
            println!("{}", expanded.text);
        }
    }

    Ok(())
}

fn run_graph(file: &Path, json_output: bool) -> Result<(), u8> {
    let content = std::fs::read_to_string(file).map_err(|e| {
        eprintln!("Error reading {}: {}", file.display(), e);
        3u8
    })?;

    if parse_imports(&content).is_empty() {
        if json_output {
            println!(r#"{{"file":"{}","imports":[]}}"#, file.display());
        } else {
            println!("{}: no imports", file.display());
        }
        return Ok(());
    }

    let expanded = resolve_imports(&content, file, DEFAULT_MAX_DEPTH).map_err(|e| {
        eprintln!("Error: {}", e);
        2u8
    })?;

    if json_output {
        let nodes: Vec<serde_json::Value> = expanded
            .graph
            .paths()
            .map(|path| {
                serde_json::json!({
                    "file": path.display().to_string(),
                    "imports": expanded
                        .graph
                        .imports_of(path)
                        .iter()
                        .map(|p| p.display().to_string())
                        .collect::<Vec<_>>(),
                })
            })
            .collect();
        match serde_json::to_string_pretty(&nodes) {
            Ok(text) => println!("{}", text),
            Err(e) => {
                eprintln!("Error serializing graph: {}", e);
                return Err(2);
            }
        }
    } else {
        print_tree(&expanded.graph, file, 0);
    }

    Ok(())
}

fn print_tree(graph: &contract_check::DependencyGraph, path: &Path, depth: usize) {
    println!("{}{}", "  ".repeat(depth), path.display());
    for child in graph.imports_of(path) {
        print_tree(graph, child, depth + 1);
    }
}
