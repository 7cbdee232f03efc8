//! Jinja2-subset template rendering with a per-line source map.
//!
//! Supports the directive subset UI-contract documents actually use:
//! `{{ expr }}` interpolation with dotted access and filters,
//! `{% if / elif / else / endif %}`, `{% for x in xs %}` with a `loop`
//! object, and `{% include "relative/path" %}`. Rendering never fails on an
//! undefined variable: it substitutes a [`SafeUndefined`] placeholder and
//! records a warning. Every output line records which input line (and, for
//! included content, which file) produced it, so omitted conditional blocks
//! cause no position drift.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Instant;

use serde_json::{Map, Value};

use crate::error::{Diagnostic, TemplateError};
use crate::source_map::LineOrigin;

/// Iteration cap per `for` loop, a backstop under the render deadline.
const MAX_LOOP_ITERATIONS: usize = 10_000;

/// Maximum include nesting.
const MAX_INCLUDE_DEPTH: usize = 10;

/// Stand-in for an undefined template variable.
///
/// Behaves like a string, a number and a boolean at once, through explicit
/// total conversions rather than implicit coercion: it prints a readable
/// `{{ name }}` marker, is `0` in numeric context, `false` in boolean
/// context, and has length 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafeUndefined {
    name: String,
}

impl SafeUndefined {
    pub fn new(name: impl Into<String>) -> Self {
        SafeUndefined { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn display(&self) -> String {
        format!("{{{{ {} }}}}", self.name)
    }

    pub fn as_number(&self) -> f64 {
        0.0
    }

    pub fn as_bool(&self) -> bool {
        false
    }

    pub fn len(&self) -> usize {
        0
    }

    pub fn is_empty(&self) -> bool {
        true
    }
}

/// A template value during evaluation: concrete JSON or a safe placeholder.
#[derive(Debug, Clone)]
enum TValue {
    Json(Value),
    Undefined(SafeUndefined),
}

impl TValue {
    fn truthy(&self) -> bool {
        match self {
            TValue::Json(Value::Null) => false,
            TValue::Json(Value::Bool(b)) => *b,
            TValue::Json(Value::Number(n)) => n.as_f64().unwrap_or(0.0) != 0.0,
            TValue::Json(Value::String(s)) => !s.is_empty(),
            TValue::Json(Value::Array(a)) => !a.is_empty(),
            TValue::Json(Value::Object(o)) => !o.is_empty(),
            TValue::Undefined(u) => u.as_bool(),
        }
    }

    fn as_number(&self) -> Option<f64> {
        match self {
            TValue::Json(Value::Number(n)) => n.as_f64(),
            TValue::Json(Value::String(s)) => s.trim().parse().ok(),
            TValue::Json(Value::Bool(b)) => Some(if *b { 1.0 } else { 0.0 }),
            TValue::Undefined(u) => Some(u.as_number()),
            _ => None,
        }
    }

    fn render(&self) -> String {
        match self {
            TValue::Json(Value::String(s)) => s.clone(),
            TValue::Json(Value::Null) => "null".to_string(),
            TValue::Json(v) => v.to_string(),
            TValue::Undefined(u) => u.display(),
        }
    }
}

/// Result of rendering one template.
#[derive(Debug)]
pub struct Rendered {
    pub text: String,
    /// One entry per output line: the file and line that produced it.
    pub origins: Vec<LineOrigin>,
    pub warnings: Vec<Diagnostic>,
    /// Included template files, in first-use order.
    pub dependencies: Vec<PathBuf>,
}

/// Rendering limits.
#[derive(Debug, Clone)]
pub struct RenderLimits {
    pub timeout_ms: u64,
}

impl Default for RenderLimits {
    fn default() -> Self {
        RenderLimits { timeout_ms: 5000 }
    }
}

/// True if the content uses any template directive.
pub fn contains_template_syntax(content: &str) -> bool {
    content.contains("{{") || content.contains("{%")
}

/// Render a template to plain text with its source map.
///
/// `template_path` anchors relative `include` paths and names the origin file
/// in the source map.
///
/// # Errors
///
/// Fails on malformed directive syntax, unresolvable includes, and the
/// render deadline. Undefined variables are warnings, never errors.
pub fn render(
    template_path: &Path,
    content: &str,
    context: &Map<String, Value>,
    limits: &RenderLimits,
) -> Result<Rendered, TemplateError> {
    let nodes = parse(content)?;
    let mut renderer = Renderer {
        context,
        out: String::new(),
        origins: Vec::new(),
        pending: None,
        warnings: Vec::new(),
        warned: HashSet::new(),
        dependencies: Vec::new(),
        scopes: Vec::new(),
        started: Instant::now(),
        limits: limits.clone(),
    };
    renderer.render_nodes(&nodes, template_path, 0)?;
    if let Some(origin) = renderer.pending.take() {
        renderer.origins.push(origin);
    }
    tracing::debug!(
        template = %template_path.display(),
        output_lines = renderer.origins.len(),
        warnings = renderer.warnings.len(),
        "template rendered"
    );
    Ok(Rendered {
        text: renderer.out,
        origins: renderer.origins,
        warnings: renderer.warnings,
        dependencies: renderer.dependencies,
    })
}

// --- Lexing ---

#[derive(Debug)]
enum Segment {
    Text { text: String, line: usize },
    Expr { body: String, line: usize },
    Tag { body: String, line: usize },
}

fn lex(content: &str) -> Result<Vec<Segment>, TemplateError> {
    let mut segments = Vec::new();
    let mut pos = 0;
    let mut line = 1;

    while pos < content.len() {
        let rest = &content[pos..];
        let expr_at = rest.find("{{");
        let tag_at = rest.find("{%");

        let (at, delimiter, closer) = match (expr_at, tag_at) {
            (Some(e), Some(t)) if e <= t => (e, "{{", "}}"),
            (_, Some(t)) => (t, "{%", "%}"),
            (Some(e), None) => (e, "{{", "}}"),
            (None, None) => {
                segments.push(Segment::Text {
                    text: rest.to_string(),
                    line,
                });
                break;
            }
        };

        if at > 0 {
            let text = &rest[..at];
            segments.push(Segment::Text {
                text: text.to_string(),
                line,
            });
            line += text.matches('\n').count();
        }

        let directive_line = line;
        let after = &rest[at + 2..];
        let Some(end) = after.find(closer) else {
            return Err(TemplateError::UnterminatedDirective {
                line: directive_line,
                delimiter,
            });
        };
        let body = after[..end].trim().to_string();
        line += after[..end].matches('\n').count();

        if delimiter == "{{" {
            segments.push(Segment::Expr {
                body,
                line: directive_line,
            });
        } else {
            segments.push(Segment::Tag {
                body,
                line: directive_line,
            });
        }
        pos += at + 2 + end + 2;
    }

    Ok(segments)
}

// --- Parsing ---

#[derive(Debug, Clone)]
enum Operand {
    Path(Vec<String>),
    Str(String),
    Num(f64),
}

#[derive(Debug, Clone)]
struct FilterCall {
    name: String,
    args: Vec<Operand>,
    line: usize,
}

#[derive(Debug, Clone)]
struct Expr {
    operand: Operand,
    filters: Vec<FilterCall>,
    line: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CmpOp {
    Eq,
    Ne,
}

#[derive(Debug, Clone)]
struct Cond {
    negated: bool,
    expr: Expr,
    cmp: Option<(CmpOp, Operand)>,
}

#[derive(Debug)]
enum Node {
    Text {
        text: String,
        line: usize,
    },
    Expr(Expr),
    If {
        arms: Vec<(Option<Cond>, Vec<Node>)>,
    },
    For {
        var: String,
        iter: Expr,
        body: Vec<Node>,
    },
    Include {
        path: String,
        line: usize,
    },
}

fn parse(content: &str) -> Result<Vec<Node>, TemplateError> {
    let segments = lex(content)?;
    let mut i = 0;
    let (nodes, terminator) = parse_block(&segments, &mut i, None)?;
    if let Some((tag, line)) = terminator {
        return Err(TemplateError::UnexpectedTag { tag, line });
    }
    Ok(nodes)
}

type Terminator = Option<(String, usize)>;

/// Parse until EOF or a block terminator (`elif`/`else`/`endif`/`endfor`).
/// `open` names the enclosing block tag for unclosed-block reporting.
fn parse_block(
    segments: &[Segment],
    i: &mut usize,
    open: Option<(&str, usize)>,
) -> Result<(Vec<Node>, Terminator), TemplateError> {
    let mut nodes = Vec::new();

    while *i < segments.len() {
        match &segments[*i] {
            Segment::Text { text, line } => {
                nodes.push(Node::Text {
                    text: text.clone(),
                    line: *line,
                });
                *i += 1;
            }
            Segment::Expr { body, line } => {
                nodes.push(Node::Expr(parse_expr(body, *line)?));
                *i += 1;
            }
            Segment::Tag { body, line } => {
                let line = *line;
                let keyword = body.split_whitespace().next().unwrap_or("");
                match keyword {
                    "if" => {
                        *i += 1;
                        nodes.push(parse_if(segments, i, body, line)?);
                    }
                    "for" => {
                        *i += 1;
                        nodes.push(parse_for(segments, i, body, line)?);
                    }
                    "include" => {
                        let rest = body["include".len()..].trim();
                        let path = parse_string_literal(rest).ok_or_else(|| {
                            TemplateError::BadDirective {
                                line,
                                message: format!("include expects a quoted path, got '{rest}'"),
                            }
                        })?;
                        nodes.push(Node::Include { path, line });
                        *i += 1;
                    }
                    "elif" | "else" | "endif" | "endfor" => {
                        return Ok((nodes, Some((keyword.to_string(), line))));
                    }
                    other => {
                        return Err(TemplateError::BadDirective {
                            line,
                            message: format!("unknown tag '{other}'"),
                        });
                    }
                }
            }
        }
    }

    if let Some((tag, line)) = open {
        return Err(TemplateError::UnclosedBlock {
            tag: tag.to_string(),
            line,
        });
    }
    Ok((nodes, None))
}

fn parse_if(
    segments: &[Segment],
    i: &mut usize,
    body: &str,
    line: usize,
) -> Result<Node, TemplateError> {
    let mut arms: Vec<(Option<Cond>, Vec<Node>)> = Vec::new();
    let mut cond = Some(parse_cond(body["if".len()..].trim(), line)?);
    let mut seen_else = false;

    loop {
        let (nodes, terminator) = parse_block(segments, i, Some(("if", line)))?;
        arms.push((cond.take(), nodes));

        match terminator {
            Some((tag, tag_line)) if tag == "elif" => {
                if seen_else {
                    return Err(TemplateError::UnexpectedTag {
                        tag,
                        line: tag_line,
                    });
                }
                let Segment::Tag { body, .. } = &segments[*i] else {
                    unreachable!("terminator always sits on a tag segment");
                };
                cond = Some(parse_cond(body["elif".len()..].trim(), tag_line)?);
                *i += 1;
            }
            Some((tag, tag_line)) if tag == "else" => {
                if seen_else {
                    return Err(TemplateError::UnexpectedTag {
                        tag,
                        line: tag_line,
                    });
                }
                seen_else = true;
                cond = None;
                *i += 1;
            }
            Some((tag, _)) if tag == "endif" => {
                *i += 1;
                return Ok(Node::If { arms });
            }
            Some((tag, tag_line)) => {
                return Err(TemplateError::UnexpectedTag {
                    tag,
                    line: tag_line,
                });
            }
            None => {
                return Err(TemplateError::UnclosedBlock {
                    tag: "if".to_string(),
                    line,
                });
            }
        }
    }
}

fn parse_for(
    segments: &[Segment],
    i: &mut usize,
    body: &str,
    line: usize,
) -> Result<Node, TemplateError> {
    let rest = body["for".len()..].trim();
    let Some((var, iter_src)) = rest.split_once(" in ") else {
        return Err(TemplateError::BadDirective {
            line,
            message: format!("expected 'for <var> in <expr>', got '{rest}'"),
        });
    };
    let var = var.trim();
    if var.is_empty() || !var.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return Err(TemplateError::BadDirective {
            line,
            message: format!("invalid loop variable '{var}'"),
        });
    }
    let iter = parse_expr(iter_src.trim(), line)?;

    let (nodes, terminator) = parse_block(segments, i, Some(("for", line)))?;
    match terminator {
        Some((tag, _)) if tag == "endfor" => {
            *i += 1;
            Ok(Node::For {
                var: var.to_string(),
                iter,
                body: nodes,
            })
        }
        Some((tag, tag_line)) => Err(TemplateError::UnexpectedTag {
            tag,
            line: tag_line,
        }),
        None => Err(TemplateError::UnclosedBlock {
            tag: "for".to_string(),
            line,
        }),
    }
}

fn parse_cond(src: &str, line: usize) -> Result<Cond, TemplateError> {
    let (negated, src) = match src.strip_prefix("not ") {
        Some(rest) => (true, rest.trim()),
        None => (false, src),
    };

    for (token, op) in [("==", CmpOp::Eq), ("!=", CmpOp::Ne)] {
        if let Some((lhs, rhs)) = src.split_once(token) {
            return Ok(Cond {
                negated,
                expr: parse_expr(lhs.trim(), line)?,
                cmp: Some((op, parse_operand(rhs.trim(), line)?)),
            });
        }
    }

    Ok(Cond {
        negated,
        expr: parse_expr(src, line)?,
        cmp: None,
    })
}

fn parse_expr(src: &str, line: usize) -> Result<Expr, TemplateError> {
    let mut parts = src.split('|');
    let operand_src = parts.next().unwrap_or("").trim();
    let operand = parse_operand(operand_src, line)?;

    let mut filters = Vec::new();
    for part in parts {
        let part = part.trim();
        let (name, args) = match part.split_once('(') {
            Some((name, rest)) => {
                let inner = rest.strip_suffix(')').ok_or_else(|| {
                    TemplateError::BadDirective {
                        line,
                        message: format!("unclosed filter arguments in '{part}'"),
                    }
                })?;
                let args = inner
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(|s| parse_operand(s, line))
                    .collect::<Result<Vec<_>, _>>()?;
                (name.trim(), args)
            }
            None => (part, Vec::new()),
        };
        if name.is_empty() {
            return Err(TemplateError::BadDirective {
                line,
                message: format!("empty filter in '{src}'"),
            });
        }
        filters.push(FilterCall {
            name: name.to_string(),
            args,
            line,
        });
    }

    Ok(Expr {
        operand,
        filters,
        line,
    })
}

fn parse_operand(src: &str, line: usize) -> Result<Operand, TemplateError> {
    if let Some(s) = parse_string_literal(src) {
        return Ok(Operand::Str(s));
    }
    if let Ok(n) = src.parse::<f64>() {
        return Ok(Operand::Num(n));
    }
    let path: Vec<String> = src.split('.').map(str::to_string).collect();
    if path.is_empty()
        || path.iter().any(|seg| {
            seg.is_empty() || !seg.chars().all(|c| c.is_alphanumeric() || c == '_')
        })
    {
        return Err(TemplateError::BadDirective {
            line,
            message: format!("invalid expression '{src}'"),
        });
    }
    Ok(Operand::Path(path))
}

fn parse_string_literal(src: &str) -> Option<String> {
    let src = src.trim();
    for quote in ['"', '\''] {
        if src.len() >= 2 && src.starts_with(quote) && src.ends_with(quote) {
            return Some(src[1..src.len() - 1].to_string());
        }
    }
    None
}

// --- Rendering ---

struct Renderer<'a> {
    context: &'a Map<String, Value>,
    out: String,
    origins: Vec<LineOrigin>,
    pending: Option<LineOrigin>,
    warnings: Vec<Diagnostic>,
    warned: HashSet<String>,
    dependencies: Vec<PathBuf>,
    scopes: Vec<Map<String, Value>>,
    started: Instant,
    limits: RenderLimits,
}

impl Renderer<'_> {
    fn check_deadline(&self) -> Result<(), TemplateError> {
        if self.started.elapsed().as_millis() as u64 > self.limits.timeout_ms {
            return Err(TemplateError::Timeout {
                limit_ms: self.limits.timeout_ms,
            });
        }
        Ok(())
    }

    fn emit(&mut self, text: &str, file: &Path, start_line: usize) {
        let mut src_line = start_line;
        for ch in text.chars() {
            if self.pending.is_none() {
                self.pending = Some(LineOrigin {
                    file: file.to_path_buf(),
                    line: src_line,
                });
            }
            if ch == '\n' {
                self.out.push('\n');
                if let Some(origin) = self.pending.take() {
                    self.origins.push(origin);
                }
                src_line += 1;
            } else {
                self.out.push(ch);
            }
        }
    }

    fn render_nodes(
        &mut self,
        nodes: &[Node],
        file: &Path,
        include_depth: usize,
    ) -> Result<(), TemplateError> {
        for node in nodes {
            self.check_deadline()?;
            match node {
                Node::Text { text, line } => self.emit(text, file, *line),
                Node::Expr(expr) => {
                    let value = self.eval_expr(expr, file)?;
                    self.emit(&value.render(), file, expr.line);
                }
                Node::If { arms } => {
                    for (cond, body) in arms {
                        let take = match cond {
                            Some(cond) => self.eval_cond(cond, file)?,
                            None => true,
                        };
                        if take {
                            self.render_nodes(body, file, include_depth)?;
                            break;
                        }
                    }
                }
                Node::For { var, iter, body } => {
                    let items = match self.eval_expr(iter, file)? {
                        TValue::Json(Value::Array(items)) => items,
                        // Anything non-iterable renders zero iterations; an
                        // undefined iterable already produced a warning.
                        _ => Vec::new(),
                    };
                    let length = items.len();
                    for (idx, item) in items.into_iter().enumerate() {
                        // Truncating silently would hand downstream stages a
                        // structurally valid but incomplete document.
                        if idx >= MAX_LOOP_ITERATIONS {
                            return Err(TemplateError::LoopLimit {
                                limit: MAX_LOOP_ITERATIONS,
                                line: iter.line,
                            });
                        }
                        self.check_deadline()?;
                        let mut scope = Map::new();
                        scope.insert(var.clone(), item);
                        scope.insert(
                            "loop".to_string(),
                            serde_json::json!({
                                "index": idx + 1,
                                "index0": idx,
                                "first": idx == 0,
                                "last": idx + 1 == length,
                                "length": length,
                            }),
                        );
                        self.scopes.push(scope);
                        let result = self.render_nodes(body, file, include_depth);
                        self.scopes.pop();
                        result?;
                    }
                }
                Node::Include { path, line } => {
                    self.render_include(path, *line, file, include_depth)?;
                }
            }
        }
        Ok(())
    }

    fn render_include(
        &mut self,
        rel: &str,
        line: usize,
        file: &Path,
        include_depth: usize,
    ) -> Result<(), TemplateError> {
        if include_depth >= MAX_INCLUDE_DEPTH {
            return Err(TemplateError::BadDirective {
                line,
                message: format!("include depth exceeds {MAX_INCLUDE_DEPTH}"),
            });
        }
        let base = file.parent().unwrap_or(Path::new("."));
        let target = base.join(rel);
        if !target.is_file() {
            return Err(TemplateError::IncludeNotFound { path: target, line });
        }
        let content =
            std::fs::read_to_string(&target).map_err(|source| TemplateError::IncludeRead {
                path: target.clone(),
                source,
            })?;
        if !self.dependencies.contains(&target) {
            self.dependencies.push(target.clone());
        }
        let nodes = parse(&content)?;
        self.render_nodes(&nodes, &target, include_depth + 1)
    }

    fn lookup(&self, name: &str) -> Option<&Value> {
        for scope in self.scopes.iter().rev() {
            if let Some(value) = scope.get(name) {
                return Some(value);
            }
        }
        self.context.get(name)
    }

    fn eval_operand(&mut self, operand: &Operand, line: usize, file: &Path) -> TValue {
        match operand {
            Operand::Str(s) => TValue::Json(Value::String(s.clone())),
            Operand::Num(n) => TValue::Json(
                serde_json::Number::from_f64(*n)
                    .map(Value::Number)
                    .unwrap_or(Value::Null),
            ),
            Operand::Path(path) => {
                let full_name = path.join(".");
                let Some(mut current) = self.lookup(&path[0]) else {
                    // `now` is a builtin unless the context shadows it.
                    if path.len() == 1 && path[0] == "now" {
                        return TValue::Json(Value::String(now_iso()));
                    }
                    self.warn_undefined(&full_name, line, file);
                    return TValue::Undefined(SafeUndefined::new(full_name));
                };
                for segment in &path[1..] {
                    let next = match current {
                        Value::Object(map) => map.get(segment),
                        Value::Array(items) => {
                            segment.parse::<usize>().ok().and_then(|i| items.get(i))
                        }
                        _ => None,
                    };
                    match next {
                        Some(value) => current = value,
                        None => {
                            self.warn_undefined(&full_name, line, file);
                            return TValue::Undefined(SafeUndefined::new(full_name));
                        }
                    }
                }
                TValue::Json(current.clone())
            }
        }
    }

    fn warn_undefined(&mut self, name: &str, line: usize, file: &Path) {
        if self.warned.insert(name.to_string()) {
            self.warnings.push(
                Diagnostic::warning("W001", format!("undefined variable '{name}'"))
                    .at(file.to_path_buf(), line),
            );
        }
    }

    fn eval_expr(&mut self, expr: &Expr, file: &Path) -> Result<TValue, TemplateError> {
        let mut value = self.eval_operand(&expr.operand, expr.line, file);
        for filter in &expr.filters {
            value = self.apply_filter(value, filter, file)?;
        }
        Ok(value)
    }

    fn eval_cond(&mut self, cond: &Cond, file: &Path) -> Result<bool, TemplateError> {
        let lhs = self.eval_expr(&cond.expr, file)?;
        let result = match &cond.cmp {
            None => lhs.truthy(),
            Some((op, rhs_operand)) => {
                let rhs = self.eval_operand(rhs_operand, cond.expr.line, file);
                let equal = values_equal(&lhs, &rhs);
                match op {
                    CmpOp::Eq => equal,
                    CmpOp::Ne => !equal,
                }
            }
        };
        Ok(result ^ cond.negated)
    }

    fn apply_filter(
        &mut self,
        value: TValue,
        filter: &FilterCall,
        file: &Path,
    ) -> Result<TValue, TemplateError> {
        let result = match filter.name.as_str() {
            "date" => match &value {
                TValue::Json(Value::Number(n)) => Value::String(epoch_to_iso_date(
                    n.as_f64().unwrap_or(0.0) as i64,
                )),
                // ISO timestamps are truncated to their date part.
                TValue::Json(Value::String(s)) => {
                    Value::String(s.split('T').next().unwrap_or(s).to_string())
                }
                TValue::Undefined(u) => Value::String(u.display()),
                _ => Value::String(epoch_to_iso_date(0)),
            },
            "currency" => match value.as_number() {
                Some(n) => Value::String(format_currency(n)),
                None => match &value {
                    TValue::Undefined(u) => Value::String(format_currency(u.as_number())),
                    _ => Value::String(format_currency(0.0)),
                },
            },
            "json" => match &value {
                TValue::Json(v) => Value::String(v.to_string()),
                // Keep the placeholder visible but JSON-safe.
                TValue::Undefined(u) => {
                    Value::String(Value::String(u.display()).to_string())
                }
            },
            "upper" => Value::String(stringify(&value).to_uppercase()),
            "lower" => Value::String(stringify(&value).to_lowercase()),
            "length" => {
                let len = match &value {
                    TValue::Json(Value::String(s)) => s.chars().count(),
                    TValue::Json(Value::Array(a)) => a.len(),
                    TValue::Json(Value::Object(o)) => o.len(),
                    TValue::Undefined(u) => u.len(),
                    _ => 0,
                };
                Value::Number(len.into())
            }
            "now" => Value::String(now_iso()),
            "default" => {
                let fallback = filter
                    .args
                    .first()
                    .map(|arg| self.eval_operand(arg, filter.line, file))
                    .unwrap_or(TValue::Json(Value::String(String::new())));
                return Ok(match value {
                    TValue::Undefined(_) | TValue::Json(Value::Null) => fallback,
                    other => other,
                });
            }
            _ => {
                return Err(TemplateError::UnknownFilter {
                    name: filter.name.clone(),
                    line: filter.line,
                });
            }
        };
        Ok(TValue::Json(result))
    }
}

fn stringify(value: &TValue) -> String {
    value.render()
}

fn values_equal(lhs: &TValue, rhs: &TValue) -> bool {
    match (lhs, rhs) {
        // The placeholder compares equal to nothing, including itself.
        (TValue::Undefined(_), _) | (_, TValue::Undefined(_)) => false,
        (TValue::Json(a), TValue::Json(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => a == b,
        },
    }
}

/// Current time as an ISO-8601 UTC timestamp, seconds precision.
fn now_iso() -> String {
    let secs = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    let (y, m, d) = civil_from_days(secs.div_euclid(86_400));
    let rem = secs.rem_euclid(86_400);
    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}Z",
        y,
        m,
        d,
        rem / 3600,
        (rem % 3600) / 60,
        rem % 60
    )
}

fn epoch_to_iso_date(secs: i64) -> String {
    let (y, m, d) = civil_from_days(secs.div_euclid(86_400));
    format!("{y:04}-{m:02}-{d:02}")
}

/// Days-since-epoch to civil date (Howard Hinnant's algorithm).
fn civil_from_days(z: i64) -> (i64, u32, u32) {
    let z = z + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    (if m <= 2 { y + 1 } else { y }, m, d)
}

fn format_currency(n: f64) -> String {
    let negative = n < 0.0;
    let fixed = format!("{:.2}", n.abs());
    let (int_part, frac_part) = fixed.split_once('.').unwrap_or((&fixed, "00"));

    let mut grouped = String::new();
    let digits: Vec<char> = int_part.chars().collect();
    for (i, digit) in digits.iter().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(*digit);
    }

    if negative {
        format!("-${grouped}.{frac_part}")
    } else {
        format!("${grouped}.{frac_part}")
    }
}
