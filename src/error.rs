use std::fmt;

use crate::token::Span;

/// Error taxonomy for language-level failures. Every runtime failure is
/// carried by an `error` value tagged with one of these codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NullPointer,
    TypeMismatch,
    DivisionByZero,
    IndexOutOfBounds,
    InvalidArgument,
    MemoryAllocation,
    FileNotFound,
    ParsingFailed,
    UndefinedVariable,
    UndefinedFunction,
    YamlTooLarge,
    UnknownAnchor,
    InvalidMappingKey,
    CircularReference,
    StackOverflow,
}

impl ErrorCode {
    /// Stable name, usable as a machine-readable tag.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::NullPointer => "null-pointer",
            ErrorCode::TypeMismatch => "type-mismatch",
            ErrorCode::DivisionByZero => "division-by-zero",
            ErrorCode::IndexOutOfBounds => "index-out-of-bounds",
            ErrorCode::InvalidArgument => "invalid-argument",
            ErrorCode::MemoryAllocation => "memory-allocation",
            ErrorCode::FileNotFound => "file-not-found",
            ErrorCode::ParsingFailed => "parsing-failed",
            ErrorCode::UndefinedVariable => "undefined-variable",
            ErrorCode::UndefinedFunction => "undefined-function",
            ErrorCode::YamlTooLarge => "yaml-too-large",
            ErrorCode::UnknownAnchor => "unknown-anchor",
            ErrorCode::InvalidMappingKey => "invalid-mapping-key",
            ErrorCode::CircularReference => "circular-reference",
            ErrorCode::StackOverflow => "stack-overflow",
        }
    }

    /// Integer code carried alongside the message in error values.
    pub fn as_code(self) -> i32 {
        match self {
            ErrorCode::NullPointer => 1,
            ErrorCode::TypeMismatch => 2,
            ErrorCode::DivisionByZero => 3,
            ErrorCode::IndexOutOfBounds => 4,
            ErrorCode::InvalidArgument => 5,
            ErrorCode::MemoryAllocation => 6,
            ErrorCode::FileNotFound => 7,
            ErrorCode::ParsingFailed => 8,
            ErrorCode::UndefinedVariable => 9,
            ErrorCode::UndefinedFunction => 10,
            ErrorCode::YamlTooLarge => 11,
            ErrorCode::UnknownAnchor => 12,
            ErrorCode::InvalidMappingKey => 13,
            ErrorCode::CircularReference => 14,
            ErrorCode::StackOverflow => 15,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum ParseErrorKind {
    UnexpectedToken { expected: &'static str, found: String },
    ExpectedExpression,
    ExpectedIdentifier,
    ExpectedIndentedBlock,
    ExpectedStatement { found: String },
    ReservedKeyword { keyword: &'static str },
    LexerError { message: String },
}

impl ParseError {
    pub fn new(kind: ParseErrorKind, span: Span) -> Self {
        ParseError { kind, span }
    }

    /// Render the error with the offending source line and a caret
    /// underline, plus a near-miss suggestion when the span covers a word.
    pub fn display_with_source(&self, source: &str) -> String {
        let (line_num, line_start, line_content) = self.find_context(source);
        let col = self.span.start.saturating_sub(line_start);
        let len = (self.span.end.saturating_sub(self.span.start)).max(1);
        let underline = format!("{}{}", " ".repeat(col), "^".repeat(len));

        let mut result = format!(
            "error: {}\n\n{:4} | {}\n     | {}",
            self, line_num, line_content, underline
        );

        if let Some(word) = self.extract_word(source) {
            if let Some(suggestion) = nearest(word, KNOWN_WORDS.iter().copied(), 2) {
                result.push_str(&format!("\n     | help: did you mean '{}'?", suggestion));
            }
        }

        result
    }

    fn extract_word<'a>(&self, source: &'a str) -> Option<&'a str> {
        if self.span.start < source.len()
            && self.span.end <= source.len()
            && source.is_char_boundary(self.span.start)
            && source.is_char_boundary(self.span.end)
        {
            let word = &source[self.span.start..self.span.end];
            if !word.is_empty() && word.chars().all(|c| c.is_alphabetic() || c == '_') {
                return Some(word);
            }
        }
        None
    }

    fn find_context<'a>(&self, source: &'a str) -> (usize, usize, &'a str) {
        let mut line_num = 1;
        let mut line_start = 0;

        for (i, c) in source.char_indices() {
            if i >= self.span.start {
                break;
            }
            if c == '\n' {
                line_num += 1;
                line_start = i + 1;
            }
        }

        let line_end = source[line_start..]
            .find('\n')
            .map(|off| line_start + off)
            .unwrap_or(source.len());

        (line_num, line_start, &source[line_start..line_end])
    }
}

/// Fixed pool for "did you mean" hints on unresolved names: every keyword
/// plus the names the builtin library registers. The evaluator widens this
/// with whatever the interner has actually seen.
pub const KNOWN_WORDS: &[&str] = &[
    "set", "function", "return", "if", "elif", "else", "then",
    "while", "for", "in", "break", "continue",
    "class", "new", "extends", "import", "export", "from", "as",
    "try", "catch", "throw",
    "true", "false", "null", "undecidable",
    "and", "or", "not",
    "when", "unless", "whenever", "until", "during", "throughout", "otherwise",
    "get", "put",
    "print", "length", "string_upper", "string_lower", "to_number", "type_of",
    "push", "keys", "range", "abs", "min", "max", "copy",
    "yaml_parse", "yaml_stringify",
];

/// Edit distance between two spellings, single-vector dynamic program.
pub fn edit_distance(a: &str, b: &str) -> usize {
    let left: Vec<char> = a.chars().collect();
    let right: Vec<char> = b.chars().collect();
    if left.is_empty() {
        return right.len();
    }
    if right.is_empty() {
        return left.len();
    }

    let mut row: Vec<usize> = (0..=right.len()).collect();
    for (i, &lc) in left.iter().enumerate() {
        let mut diagonal = row[0];
        row[0] = i + 1;
        for (j, &rc) in right.iter().enumerate() {
            let substitution = diagonal + usize::from(lc != rc);
            diagonal = row[j + 1];
            row[j + 1] = substitution.min(row[j] + 1).min(diagonal + 1);
        }
    }
    row[right.len()]
}

/// Closest candidate within `max_distance` of `word`, case-insensitive.
/// Candidates whose length alone rules them out are screened before the
/// dynamic program; on ties the earliest candidate wins.
pub fn nearest<'a, I>(word: &str, candidates: I, max_distance: usize) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    let needle = word.to_lowercase();
    let word_len = word.chars().count();
    let mut best: Option<(&str, usize)> = None;

    for candidate in candidates {
        if candidate.chars().count().abs_diff(word_len) > max_distance {
            continue;
        }
        let distance = edit_distance(&needle, &candidate.to_lowercase());
        if distance <= max_distance && best.map_or(true, |(_, d)| distance < d) {
            best = Some((candidate, distance));
        }
    }

    best.map(|(candidate, _)| candidate)
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ParseErrorKind::UnexpectedToken { expected, found } => {
                write!(f, "expected {}, found {}", expected, found)
            }
            ParseErrorKind::ExpectedExpression => write!(f, "expected an expression"),
            ParseErrorKind::ExpectedIdentifier => write!(f, "expected an identifier"),
            ParseErrorKind::ExpectedIndentedBlock => write!(f, "expected an indented block"),
            ParseErrorKind::ExpectedStatement { found } => {
                write!(f, "expected a statement, found {}", found)
            }
            ParseErrorKind::ReservedKeyword { keyword } => {
                write!(f, "'{}' is reserved for the I/O library", keyword)
            }
            ParseErrorKind::LexerError { message } => write!(f, "{}", message),
        }
    }
}
