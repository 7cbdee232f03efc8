//! Error types and diagnostics for the validation pipeline.

use std::path::PathBuf;
use thiserror::Error;

/// Severity level for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// A non-fatal finding collected during processing.
///
/// Warnings (undefined template variable, missing import file, degraded
/// position confidence) are collected here rather than raised as errors.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
}

impl Diagnostic {
    pub fn warning(code: &str, message: impl Into<String>) -> Self {
        Diagnostic {
            severity: Severity::Warning,
            code: code.to_string(),
            message: message.into(),
            file: None,
            line: None,
        }
    }

    pub fn at(mut self, file: PathBuf, line: usize) -> Self {
        self.file = Some(file);
        self.line = Some(line);
        self
    }
}

/// Errors during template rendering.
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("unterminated directive starting at line {line}: {delimiter}")]
    UnterminatedDirective { line: usize, delimiter: &'static str },

    #[error("unclosed block '{tag}' opened at line {line}")]
    UnclosedBlock { tag: String, line: usize },

    #[error("unexpected '{tag}' at line {line}")]
    UnexpectedTag { tag: String, line: usize },

    #[error("malformed directive at line {line}: {message}")]
    BadDirective { line: usize, message: String },

    #[error("unknown filter '{name}' at line {line}")]
    UnknownFilter { name: String, line: usize },

    #[error("include not found at line {line}: {path}")]
    IncludeNotFound { path: PathBuf, line: usize },

    #[error("cannot read included template {path}: {source}")]
    IncludeRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("template rendering exceeded {limit_ms}ms")]
    Timeout { limit_ms: u64 },

    #[error("loop at line {line} exceeded {limit} iterations")]
    LoopLimit { limit: usize, line: usize },
}

/// Errors during import resolution.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("circular import: {}", format_cycle(cycle))]
    CircularImport { cycle: Vec<PathBuf> },

    #[error("maximum import depth ({limit}) exceeded at {path}")]
    DepthExceeded { limit: usize, path: PathBuf },

    #[error("invalid JSON in imported file {path}: {source}")]
    InvalidImportedJson {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn format_cycle(cycle: &[PathBuf]) -> String {
    cycle
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(" → ")
}

/// Fatal errors that abort validation of a single file.
#[derive(Debug, Error)]
pub enum PipelineError {
    // IO errors (exit code 3)
    #[error("file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Document errors (exit code 2)
    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Import(#[from] ImportError),

    #[error("invalid JSON at {file}:{line}:{column}: {message}")]
    InvalidJson {
        file: PathBuf,
        line: usize,
        column: usize,
        message: String,
    },

    #[error("invalid schema: {message}")]
    InvalidSchema { message: String },
}

impl TemplateError {
    /// The template source line the error points at, when known.
    pub fn line(&self) -> Option<usize> {
        match self {
            TemplateError::UnterminatedDirective { line, .. }
            | TemplateError::UnclosedBlock { line, .. }
            | TemplateError::UnexpectedTag { line, .. }
            | TemplateError::BadDirective { line, .. }
            | TemplateError::UnknownFilter { line, .. }
            | TemplateError::IncludeNotFound { line, .. }
            | TemplateError::LoopLimit { line, .. } => Some(*line),
            TemplateError::IncludeRead { .. } | TemplateError::Timeout { .. } => None,
        }
    }
}

impl PipelineError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            PipelineError::FileNotFound { .. } | PipelineError::Read { .. } => 3,
            PipelineError::Import(ImportError::Read { .. }) => 3,
            _ => 2,
        }
    }
}
