//! # Incremental Field Parser
//!
//! Models stream a single JSON object. `FieldStreamParser` watches the text as it
//! arrives and yields each top-level field the moment its value closes, so sections
//! can be shown long before the object is complete.
//!
//! Text before the opening brace (a markdown fence, a stray preamble) is ignored, as
//! is anything after the closing brace.

use serde_json::{Map, Value};
use tracing::debug;

/// A completed top-level field.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedField {
    pub key: String,
    pub value: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    BeforeObject,
    ExpectKey,
    InKey,
    AfterKey,
    BeforeValue,
    InString,
    InNested,
    InScalar,
    AfterValue,
    Done,
}

#[derive(Debug, Clone)]
pub struct FieldStreamParser {
    state: State,
    key: String,
    value: String,
    /// Bracket depth inside a nested value.
    depth: usize,
    /// Inside a string literal within a nested value.
    nested_in_string: bool,
    escaped: bool,
    raw: String,
}

impl Default for FieldStreamParser {
    fn default() -> Self {
        Self::new()
    }
}

impl FieldStreamParser {
    pub fn new() -> Self {
        Self {
            state: State::BeforeObject,
            key: String::new(),
            value: String::new(),
            depth: 0,
            nested_in_string: false,
            escaped: false,
            raw: String::new(),
        }
    }

    /// All text pushed so far.
    pub fn raw_text(&self) -> &str {
        &self.raw
    }

    /// True once the top-level object has closed.
    pub fn is_done(&self) -> bool {
        self.state == State::Done
    }

    /// Feeds a chunk and returns the fields it completed, in order.
    pub fn push(&mut self, chunk: &str) -> Vec<ParsedField> {
        self.raw.push_str(chunk);
        let mut fields = Vec::new();
        for c in chunk.chars() {
            if let Some(field) = self.step(c) {
                fields.push(field);
            }
        }
        fields
    }

    fn step(&mut self, c: char) -> Option<ParsedField> {
        match self.state {
            State::BeforeObject => {
                if c == '{' {
                    self.state = State::ExpectKey;
                }
                None
            }
            State::ExpectKey => {
                match c {
                    '"' => {
                        self.key.clear();
                        self.state = State::InKey;
                    }
                    '}' => self.state = State::Done,
                    _ => {}
                }
                None
            }
            State::InKey => {
                if self.escaped {
                    self.key.push(c);
                    self.escaped = false;
                } else if c == '\\' {
                    self.escaped = true;
                } else if c == '"' {
                    self.state = State::AfterKey;
                } else {
                    self.key.push(c);
                }
                None
            }
            State::AfterKey => {
                if c == ':' {
                    self.state = State::BeforeValue;
                }
                None
            }
            State::BeforeValue => {
                if c.is_whitespace() {
                    return None;
                }
                self.value.clear();
                self.value.push(c);
                match c {
                    '"' => self.state = State::InString,
                    '{' | '[' => {
                        self.depth = 1;
                        self.nested_in_string = false;
                        self.state = State::InNested;
                    }
                    _ => self.state = State::InScalar,
                }
                None
            }
            State::InString => {
                self.value.push(c);
                if self.escaped {
                    self.escaped = false;
                } else if c == '\\' {
                    self.escaped = true;
                } else if c == '"' {
                    self.state = State::AfterValue;
                    return self.complete_field();
                }
                None
            }
            State::InNested => {
                self.value.push(c);
                if self.nested_in_string {
                    if self.escaped {
                        self.escaped = false;
                    } else if c == '\\' {
                        self.escaped = true;
                    } else if c == '"' {
                        self.nested_in_string = false;
                    }
                    return None;
                }
                match c {
                    '"' => self.nested_in_string = true,
                    '{' | '[' => self.depth += 1,
                    '}' | ']' => {
                        self.depth -= 1;
                        if self.depth == 0 {
                            self.state = State::AfterValue;
                            return self.complete_field();
                        }
                    }
                    _ => {}
                }
                None
            }
            State::InScalar => match c {
                ',' => {
                    self.state = State::ExpectKey;
                    self.complete_field()
                }
                '}' => {
                    self.state = State::Done;
                    self.complete_field()
                }
                c if c.is_whitespace() => {
                    self.state = State::AfterValue;
                    self.complete_field()
                }
                c => {
                    self.value.push(c);
                    None
                }
            },
            State::AfterValue => {
                match c {
                    ',' => self.state = State::ExpectKey,
                    '}' => self.state = State::Done,
                    _ => {}
                }
                None
            }
            State::Done => None,
        }
    }

    fn complete_field(&mut self) -> Option<ParsedField> {
        let key = std::mem::take(&mut self.key);
        let raw_value = std::mem::take(&mut self.value);
        match serde_json::from_str::<Value>(&raw_value) {
            Ok(value) => Some(ParsedField { key, value }),
            Err(e) => {
                debug!(%key, error = %e, "Dropping field with malformed value.");
                None
            }
        }
    }
}

/// Best-effort parse of a whole response: the text between the first `{` and the
/// last `}`, if that is a JSON object.
pub fn parse_lenient(raw: &str) -> Option<Map<String, Value>> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end < start {
        return None;
    }
    match serde_json::from_str::<Value>(&raw[start..=end]) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}
