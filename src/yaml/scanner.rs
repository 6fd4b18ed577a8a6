//! YAML text → event stream.
//!
//! Supports the block and flow subsets the codec needs: block mappings and
//! sequences driven by indentation, single-line flow collections, plain and
//! quoted scalars, comments, anchors (`&name`), and aliases (`*name`).
//! Block scalars (`|`, `>`) and multi-document streams are out of scope.

use super::events::Event;

struct Line {
    indent: usize,
    text: String,
}

pub(crate) fn scan(source: &str) -> Result<Vec<Event>, String> {
    let mut scanner = Scanner {
        lines: logical_lines(source),
        index: 0,
        events: vec![Event::StreamStart, Event::DocumentStart],
    };

    if scanner.peek().map(|l| l.text == "---").unwrap_or(false) {
        scanner.index += 1;
    }

    if scanner.peek().is_none() {
        scanner.events.push(Event::plain(""));
    } else {
        scanner.parse_block_node(0, None)?;
    }

    if scanner.peek().map(|l| l.text == "...").unwrap_or(false) {
        scanner.index += 1;
    }
    if let Some(line) = scanner.peek() {
        return Err(format!("trailing content: '{}'", line.text));
    }

    scanner.events.push(Event::DocumentEnd);
    scanner.events.push(Event::StreamEnd);
    Ok(scanner.events)
}

struct Scanner {
    lines: Vec<Line>,
    index: usize,
    events: Vec<Event>,
}

impl Scanner {
    fn peek(&self) -> Option<&Line> {
        self.lines.get(self.index)
    }

    fn parse_block_node(
        &mut self,
        min_indent: usize,
        anchor: Option<String>,
    ) -> Result<(), String> {
        let (indent, starts_seq, mapping_split) = match self.peek() {
            Some(line) if line.indent >= min_indent => (
                line.indent,
                is_sequence_entry(&line.text),
                top_level_colon(&line.text),
            ),
            // Expected nested node is absent: an empty scalar.
            _ => {
                self.events.push(Event::Scalar {
                    value: String::new(),
                    anchor,
                    quoted: false,
                });
                return Ok(());
            }
        };

        if starts_seq {
            self.parse_sequence(indent, anchor)
        } else if mapping_split.is_some() {
            self.parse_mapping(indent, anchor)
        } else {
            let text = self.lines[self.index].text.clone();
            self.index += 1;
            self.parse_inline(&text, anchor)
        }
    }

    fn parse_sequence(
        &mut self,
        indent: usize,
        anchor: Option<String>,
    ) -> Result<(), String> {
        self.events.push(Event::SequenceStart { anchor });
        while let Some(line) = self.peek() {
            if line.indent != indent || !is_sequence_entry(&line.text) {
                break;
            }
            let text = line.text.clone();
            let rest = text[1..].trim_start().to_string();
            let consumed = text.len() - rest.len();

            if rest.is_empty() {
                self.index += 1;
                self.parse_block_node(indent + 1, None)?;
            } else if let Some(name) = anchor_only(&rest) {
                self.index += 1;
                self.parse_block_node(indent + 1, Some(name))?;
            } else if top_level_colon(&rest).is_some() {
                // Compact mapping entry: `- key: value`. Reinterpret the
                // remainder as a line indented past the dash so the block
                // mapping logic picks up its sibling lines.
                self.lines[self.index] = Line {
                    indent: indent + consumed,
                    text: rest,
                };
                self.parse_block_node(indent + 1, None)?;
            } else {
                self.index += 1;
                self.parse_inline(&rest, None)?;
            }
        }
        self.events.push(Event::SequenceEnd);
        Ok(())
    }

    fn parse_mapping(
        &mut self,
        indent: usize,
        anchor: Option<String>,
    ) -> Result<(), String> {
        self.events.push(Event::MappingStart { anchor });
        while let Some(line) = self.peek() {
            if line.indent != indent {
                break;
            }
            let split = match top_level_colon(&line.text) {
                Some(split) => split,
                None => break,
            };
            let text = line.text.clone();
            let key_text = text[..split].trim_end();
            let rest = text[split + 1..].trim_start().to_string();

            self.parse_key(key_text)?;

            if rest.is_empty() {
                self.index += 1;
                let nested = self.peek().map(|l| l.indent > indent).unwrap_or(false);
                if nested {
                    self.parse_block_node(indent + 1, None)?;
                } else {
                    self.events.push(Event::plain(""));
                }
            } else if let Some(name) = anchor_only(&rest) {
                self.index += 1;
                let nested = self.peek().map(|l| l.indent > indent).unwrap_or(false);
                if nested {
                    self.parse_block_node(indent + 1, Some(name))?;
                } else {
                    self.events.push(Event::Scalar {
                        value: String::new(),
                        anchor: Some(name),
                        quoted: false,
                    });
                }
            } else {
                self.index += 1;
                self.parse_inline(&rest, None)?;
            }
        }
        self.events.push(Event::MappingEnd);
        Ok(())
    }

    fn parse_key(&mut self, key_text: &str) -> Result<(), String> {
        let key_text = key_text.trim();
        if key_text.starts_with('[') || key_text.starts_with('{') {
            return Err(format!("mapping key must be a scalar: '{}'", key_text));
        }
        if let Some(alias) = key_text.strip_prefix('*') {
            self.events.push(Event::Alias {
                name: alias.trim().to_string(),
            });
            return Ok(());
        }
        if key_text.starts_with('"') || key_text.starts_with('\'') {
            let mut cursor = Cursor::new(key_text);
            let value = cursor.quoted_scalar()?;
            cursor.skip_ws();
            if !cursor.done() {
                return Err(format!("malformed mapping key: '{}'", key_text));
            }
            self.events.push(Event::Scalar {
                value,
                anchor: None,
                quoted: true,
            });
            return Ok(());
        }
        self.events.push(Event::plain(key_text));
        Ok(())
    }

    /// Inline node: optional anchor, then an alias, flow collection, or
    /// scalar. The whole text must be consumed.
    fn parse_inline(&mut self, text: &str, anchor: Option<String>) -> Result<(), String> {
        let mut cursor = Cursor::new(text);
        let anchor = match anchor {
            Some(anchor) => Some(anchor),
            None => cursor.take_anchor(),
        };
        self.flow_value(&mut cursor, anchor, false)?;
        cursor.skip_ws();
        if !cursor.done() {
            return Err(format!("trailing characters in '{}'", text));
        }
        Ok(())
    }

    fn flow_value(
        &mut self,
        cursor: &mut Cursor<'_>,
        anchor: Option<String>,
        in_flow: bool,
    ) -> Result<(), String> {
        cursor.skip_ws();
        let anchor = match anchor {
            Some(anchor) => Some(anchor),
            None => cursor.take_anchor(),
        };

        match cursor.peek_char() {
            Some('*') => {
                cursor.advance();
                let name = cursor.take_name();
                if name.is_empty() {
                    return Err("alias without a name".to_string());
                }
                self.events.push(Event::Alias { name });
                Ok(())
            }
            Some('[') => {
                cursor.advance();
                self.events.push(Event::SequenceStart { anchor });
                cursor.skip_ws();
                if cursor.peek_char() == Some(']') {
                    cursor.advance();
                    self.events.push(Event::SequenceEnd);
                    return Ok(());
                }
                loop {
                    self.flow_value(cursor, None, true)?;
                    cursor.skip_ws();
                    match cursor.peek_char() {
                        Some(',') => {
                            cursor.advance();
                        }
                        Some(']') => {
                            cursor.advance();
                            break;
                        }
                        _ => return Err("unterminated flow sequence".to_string()),
                    }
                }
                self.events.push(Event::SequenceEnd);
                Ok(())
            }
            Some('{') => {
                cursor.advance();
                self.events.push(Event::MappingStart { anchor });
                cursor.skip_ws();
                if cursor.peek_char() == Some('}') {
                    cursor.advance();
                    self.events.push(Event::MappingEnd);
                    return Ok(());
                }
                loop {
                    cursor.skip_ws();
                    let key = if matches!(cursor.peek_char(), Some('"') | Some('\'')) {
                        let value = cursor.quoted_scalar()?;
                        Event::Scalar {
                            value,
                            anchor: None,
                            quoted: true,
                        }
                    } else {
                        Event::plain(cursor.plain_scalar(true).trim_end())
                    };
                    self.events.push(key);
                    cursor.skip_ws();
                    if cursor.peek_char() != Some(':') {
                        return Err("expected ':' in flow mapping".to_string());
                    }
                    cursor.advance();
                    self.flow_value(cursor, None, true)?;
                    cursor.skip_ws();
                    match cursor.peek_char() {
                        Some(',') => {
                            cursor.advance();
                        }
                        Some('}') => {
                            cursor.advance();
                            break;
                        }
                        _ => return Err("unterminated flow mapping".to_string()),
                    }
                }
                self.events.push(Event::MappingEnd);
                Ok(())
            }
            Some('"') | Some('\'') => {
                let value = cursor.quoted_scalar()?;
                self.events.push(Event::Scalar {
                    value,
                    anchor,
                    quoted: true,
                });
                Ok(())
            }
            Some(_) => {
                let value = cursor.plain_scalar(in_flow).trim_end().to_string();
                self.events.push(Event::Scalar {
                    value,
                    anchor,
                    quoted: false,
                });
                Ok(())
            }
            None => {
                self.events.push(Event::Scalar {
                    value: String::new(),
                    anchor,
                    quoted: false,
                });
                Ok(())
            }
        }
    }
}

struct Cursor<'s> {
    chars: Vec<char>,
    pos: usize,
    _text: &'s str,
}

impl<'s> Cursor<'s> {
    fn new(text: &'s str) -> Self {
        Cursor {
            chars: text.chars().collect(),
            pos: 0,
            _text: text,
        }
    }

    fn done(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn peek_char(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn advance(&mut self) {
        self.pos += 1;
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek_char(), Some(' ') | Some('\t')) {
            self.advance();
        }
    }

    fn take_name(&mut self) -> String {
        let mut name = String::new();
        while let Some(c) = self.peek_char() {
            if c.is_alphanumeric() || c == '_' || c == '-' {
                name.push(c);
                self.advance();
            } else {
                break;
            }
        }
        name
    }

    /// `&name` prefix, when present and followed by more content.
    fn take_anchor(&mut self) -> Option<String> {
        if self.peek_char() != Some('&') {
            return None;
        }
        self.advance();
        let name = self.take_name();
        self.skip_ws();
        Some(name)
    }

    fn quoted_scalar(&mut self) -> Result<String, String> {
        let quote = self
            .peek_char()
            .ok_or_else(|| "expected a quote".to_string())?;
        self.advance();
        let mut out = String::new();
        loop {
            let c = match self.peek_char() {
                Some(c) => c,
                None => return Err("unterminated quoted scalar".to_string()),
            };
            self.advance();
            if quote == '"' {
                match c {
                    '"' => return Ok(out),
                    '\\' => {
                        let escaped = self
                            .peek_char()
                            .ok_or_else(|| "unterminated escape".to_string())?;
                        self.advance();
                        match escaped {
                            'n' => out.push('\n'),
                            't' => out.push('\t'),
                            'r' => out.push('\r'),
                            '0' => out.push('\0'),
                            '\\' => out.push('\\'),
                            '"' => out.push('"'),
                            other => {
                                out.push('\\');
                                out.push(other);
                            }
                        }
                    }
                    _ => out.push(c),
                }
            } else {
                // Single quotes escape only themselves, by doubling.
                if c == '\'' {
                    if self.peek_char() == Some('\'') {
                        self.advance();
                        out.push('\'');
                    } else {
                        return Ok(out);
                    }
                } else {
                    out.push(c);
                }
            }
        }
    }

    fn plain_scalar(&mut self, in_flow: bool) -> String {
        let mut out = String::new();
        while let Some(c) = self.peek_char() {
            if in_flow && matches!(c, ',' | ']' | '}' | ':') {
                break;
            }
            out.push(c);
            self.advance();
        }
        out
    }
}

fn is_sequence_entry(text: &str) -> bool {
    text == "-" || (text.starts_with('-') && text[1..].starts_with(' '))
}

/// Byte offset of the first top-level `": "` (or line-final `:`), outside
/// quotes and flow brackets. `None` means the line is not a mapping entry.
fn top_level_colon(text: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_double = false;
    let mut in_single = false;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match b {
            b'\\' if in_double => i += 1,
            b'"' if !in_single => in_double = !in_double,
            b'\'' if !in_double => in_single = !in_single,
            b'[' | b'{' if !in_double && !in_single => depth += 1,
            b']' | b'}' if !in_double && !in_single => depth = depth.saturating_sub(1),
            b':' if !in_double && !in_single && depth == 0 => {
                if i + 1 == bytes.len() || bytes[i + 1] == b' ' {
                    return Some(i);
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

/// `&name` with nothing after it: the anchor belongs to a nested block node.
fn anchor_only(text: &str) -> Option<String> {
    let rest = text.strip_prefix('&')?;
    let name: String = rest
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
        .collect();
    if name.is_empty() {
        return None;
    }
    if rest[name.len()..].trim().is_empty() {
        Some(name)
    } else {
        None
    }
}

/// Split the source into significant lines: indentation measured, comments
/// stripped (a `#` at line start or after whitespace, outside quotes),
/// blank lines dropped.
fn logical_lines(source: &str) -> Vec<Line> {
    let mut lines = Vec::new();
    for raw in source.lines() {
        let indent = raw.len() - raw.trim_start_matches([' ', '\t']).len();
        let content = &raw[indent..];

        let mut in_double = false;
        let mut in_single = false;
        let mut cut = content.len();
        let bytes = content.as_bytes();
        let mut i = 0;
        while i < bytes.len() {
            match bytes[i] {
                b'\\' if in_double => i += 1,
                b'"' if !in_single => in_double = !in_double,
                b'\'' if !in_double => in_single = !in_single,
                b'#' if !in_double && !in_single => {
                    if i == 0 || bytes[i - 1] == b' ' || bytes[i - 1] == b'\t' {
                        cut = i;
                        break;
                    }
                }
                _ => {}
            }
            i += 1;
        }

        let text = content[..cut].trim_end();
        if text.is_empty() {
            continue;
        }
        lines.push(Line {
            indent,
            text: text.to_string(),
        });
    }
    lines
}
