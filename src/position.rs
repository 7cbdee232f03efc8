//! Single-pass position indexing of JSON text.
//!
//! Maps every object key and array element that appears literally in the
//! source to its line/column/byte offset, addressable by JSON Pointer
//! (`/items/0/label`) or dotted path (`items.0.label`). Built once per
//! document, read-only afterward.

use std::collections::HashMap;

use serde::Serialize;

/// How precisely a resolved position is trusted.
///
/// Ordered from most to least trusted, so `max` of two levels is the weaker one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    /// The exact pointer or path was present in the index.
    Exact,
    /// An ancestor of the requested path matched.
    Parent,
    /// Nothing matched; position defaulted to line 1.
    Approximate,
}

/// Location of a token in the source text. 1-based line/column, 0-based byte offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PositionInfo {
    pub line: usize,
    pub column: usize,
    pub offset: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub length: Option<usize>,
}

impl PositionInfo {
    fn start() -> Self {
        PositionInfo {
            line: 1,
            column: 1,
            offset: 0,
            length: None,
        }
    }
}

/// Position index over one JSON document.
#[derive(Debug, Clone)]
pub struct PositionIndex {
    by_pointer: HashMap<String, PositionInfo>,
    by_path: HashMap<String, PositionInfo>,
    total_lines: usize,
}

#[derive(Debug, Clone)]
enum Segment {
    Key(String),
    Index(usize),
}

#[derive(Debug)]
enum Frame {
    Object { key: Option<String> },
    Array { index: usize, seen_value: bool },
}

struct Scanner {
    chars: Vec<(usize, char)>,
    text_len: usize,
    i: usize,
    line: usize,
    column: usize,
}

impl Scanner {
    fn new(text: &str) -> Self {
        Scanner {
            chars: text.char_indices().collect(),
            text_len: text.len(),
            i: 0,
            line: 1,
            column: 1,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.i).map(|&(_, c)| c)
    }

    /// First non-whitespace character at or after the cursor, without consuming.
    fn peek_non_ws(&self) -> Option<char> {
        self.chars[self.i..]
            .iter()
            .map(|&(_, c)| c)
            .find(|c| !c.is_whitespace())
    }

    fn offset(&self) -> usize {
        self.chars
            .get(self.i)
            .map(|&(off, _)| off)
            .unwrap_or(self.text_len)
    }

    fn position(&self) -> PositionInfo {
        PositionInfo {
            line: self.line,
            column: self.column,
            offset: self.offset(),
            length: None,
        }
    }

    fn bump(&mut self) -> Option<char> {
        let &(_, c) = self.chars.get(self.i)?;
        self.i += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }
}

impl PositionIndex {
    /// Build an index from raw JSON text in one linear pass.
    ///
    /// The text is assumed to have already parsed successfully; on malformed
    /// input the scan simply records what it can and stops at end of text.
    pub fn build(text: &str) -> Self {
        let mut index = PositionIndex {
            by_pointer: HashMap::new(),
            by_path: HashMap::new(),
            total_lines: text.lines().count().max(1),
        };

        let mut scanner = Scanner::new(text);
        let mut stack: Vec<Frame> = Vec::new();

        while let Some(c) = scanner.peek() {
            match c {
                '{' => {
                    index.record_array_element(&mut stack, &scanner);
                    scanner.bump();
                    stack.push(Frame::Object { key: None });
                }
                '[' => {
                    index.record_array_element(&mut stack, &scanner);
                    scanner.bump();
                    stack.push(Frame::Array {
                        index: 0,
                        seen_value: false,
                    });
                }
                '}' | ']' => {
                    scanner.bump();
                    stack.pop();
                }
                ',' => {
                    scanner.bump();
                    match stack.last_mut() {
                        Some(Frame::Array { index, seen_value }) => {
                            *index += 1;
                            *seen_value = false;
                        }
                        Some(Frame::Object { key }) => {
                            *key = None;
                        }
                        None => {}
                    }
                }
                ':' => {
                    scanner.bump();
                }
                '"' => {
                    let start = scanner.position();
                    let content = read_string(&mut scanner);
                    let token_len = scanner.offset() - start.offset;

                    // A string followed by ':' is an object key; anything
                    // else is a value.
                    let is_key = matches!(stack.last(), Some(Frame::Object { .. }))
                        && scanner.peek_non_ws() == Some(':');

                    if is_key {
                        let segments = ancestor_segments(&stack);
                        let info = PositionInfo {
                            length: Some(token_len),
                            ..start
                        };
                        index.record(&segments, Segment::Key(content.clone()), info);
                        if let Some(Frame::Object { key }) = stack.last_mut() {
                            *key = Some(content);
                        }
                    } else {
                        index.record_array_element_at(
                            &mut stack,
                            PositionInfo {
                                length: Some(token_len),
                                ..start
                            },
                        );
                    }
                }
                c if c.is_whitespace() => {
                    scanner.bump();
                }
                _ => {
                    // Number, true/false/null: consume the token.
                    index.record_array_element(&mut stack, &scanner);
                    while let Some(c) = scanner.peek() {
                        if c.is_whitespace() || matches!(c, ',' | '}' | ']') {
                            break;
                        }
                        scanner.bump();
                    }
                }
            }
        }

        index
    }

    /// Record the current array element if the scanner sits at the start of one.
    fn record_array_element(&mut self, stack: &mut [Frame], scanner: &Scanner) {
        self.record_array_element_at(stack, scanner.position());
    }

    fn record_array_element_at(&mut self, stack: &mut [Frame], info: PositionInfo) {
        let ancestors = if stack.is_empty() {
            Vec::new()
        } else {
            ancestor_segments(&stack[..stack.len() - 1])
        };
        if let Some(Frame::Array { index, seen_value }) = stack.last_mut() {
            if !*seen_value {
                let idx = *index;
                *seen_value = true;
                self.record(&ancestors, Segment::Index(idx), info);
            }
        }
    }

    fn record(&mut self, ancestors: &[Segment], last: Segment, info: PositionInfo) {
        let mut segments: Vec<&Segment> = ancestors.iter().collect();
        segments.push(&last);

        let pointer = segments.iter().fold(String::new(), |mut acc, seg| {
            acc.push('/');
            match seg {
                Segment::Key(k) => acc.push_str(&escape_pointer_segment(k)),
                Segment::Index(i) => acc.push_str(&i.to_string()),
            }
            acc
        });
        let dotted = segments
            .iter()
            .map(|seg| match seg {
                Segment::Key(k) => k.clone(),
                Segment::Index(i) => i.to_string(),
            })
            .collect::<Vec<_>>()
            .join(".");

        // First occurrence wins; duplicate keys in malformed documents keep
        // their original position.
        self.by_pointer.entry(pointer).or_insert(info);
        self.by_path.entry(dotted).or_insert(info);
    }

    pub fn total_lines(&self) -> usize {
        self.total_lines
    }

    pub fn len(&self) -> usize {
        self.by_pointer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_pointer.is_empty()
    }

    /// Exact lookup by JSON Pointer.
    pub fn by_pointer(&self, pointer: &str) -> Option<PositionInfo> {
        self.by_pointer.get(pointer).copied()
    }

    /// Exact lookup by dotted path.
    pub fn by_path(&self, path: &str) -> Option<PositionInfo> {
        self.by_path.get(path).copied()
    }

    /// Four-step fallback lookup.
    ///
    /// 1. exact JSON Pointer, 2. exact dotted path, 3. nearest ancestor
    /// (stripping trailing segments), 4. line 1 with [`Confidence::Approximate`].
    /// Callers can distinguish all three confidence levels in output.
    pub fn find(&self, query: &str) -> (PositionInfo, Confidence) {
        if let Some(info) = self.by_pointer.get(query) {
            return (*info, Confidence::Exact);
        }
        if let Some(info) = self.by_path.get(query) {
            return (*info, Confidence::Exact);
        }

        // Walk up the path removing the last segment until a match is found.
        let mut current = query.to_string();
        loop {
            let parent = if current.starts_with('/') {
                match current.rfind('/') {
                    Some(0) | None => break,
                    Some(idx) => current[..idx].to_string(),
                }
            } else {
                match current.rfind('.') {
                    Some(idx) => current[..idx].to_string(),
                    None => break,
                }
            };
            if let Some(info) = self.by_pointer.get(&parent).or_else(|| self.by_path.get(&parent)) {
                return (*info, Confidence::Parent);
            }
            current = parent;
        }

        (PositionInfo::start(), Confidence::Approximate)
    }

    /// Convenience wrapper returning only the line number.
    pub fn find_line_number(&self, query: &str) -> (usize, Confidence) {
        let (info, confidence) = self.find(query);
        (info.line, confidence)
    }
}

fn ancestor_segments(stack: &[Frame]) -> Vec<Segment> {
    stack
        .iter()
        .filter_map(|frame| match frame {
            Frame::Object { key: Some(k) } => Some(Segment::Key(k.clone())),
            Frame::Object { key: None } => None,
            Frame::Array { index, .. } => Some(Segment::Index(*index)),
        })
        .collect()
}

/// RFC 6901 escaping: `~` → `~0`, `/` → `~1`.
fn escape_pointer_segment(segment: &str) -> String {
    segment.replace('~', "~0").replace('/', "~1")
}

/// Consume a string token (including both quotes), honoring backslash escapes
/// so embedded quotes and braces do not corrupt scope tracking.
fn read_string(scanner: &mut Scanner) -> String {
    let mut content = String::new();
    scanner.bump(); // opening quote
    while let Some(c) = scanner.bump() {
        match c {
            '\\' => {
                if let Some(escaped) = scanner.bump() {
                    content.push('\\');
                    content.push(escaped);
                }
            }
            '"' => break,
            _ => content.push(c),
        }
    }
    content
}
