//! Tokenizer and parser for schemaless lines.
//!
//! Grammar:
//!
//! ```text
//! line      = measurement { "," pair } " " pair { "," pair } [ " " timestamp ]
//! pair      = key "=" value
//! value     = int "i64" | float "f64" | "L" quoted | bool
//! quoted    = '"' { char | '\' char } '"'
//! ```
//!
//! Outside quotes a backslash makes the next character literal.

use super::{FieldValue, Point, Precision};
use tdengine_connect_core::{ConnectorError, ConnectorResult};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub(crate) enum LineError {
    #[error("measurement name is missing")]
    MissingMeasurement,
    #[error("field set is missing")]
    MissingFields,
    #[error("expected a key, found {0}")]
    ExpectedKey(&'static str),
    #[error("key '{0}' has no '='")]
    MissingEquals(String),
    #[error("key '{0}' has no value")]
    MissingValue(String),
    #[error("value of '{key}' does not match a known type: {raw}")]
    InvalidValue { key: String, raw: String },
    #[error("string value is not terminated")]
    UnterminatedString,
    #[error("line breaks are not allowed inside a line")]
    LineBreak,
    #[error("invalid timestamp '{0}'")]
    InvalidTimestamp(String),
    #[error("unexpected {0} after the end of the line")]
    TrailingInput(&'static str),
    #[error("unexpected {found} after {after}")]
    Unexpected {
        found: &'static str,
        after: &'static str,
    },
    #[error("{0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Quoted(String),
    Comma,
    Equals,
    Space,
}

impl Token {
    fn describe(&self) -> &'static str {
        match self {
            Token::Word(_) => "a word",
            Token::Quoted(_) => "a quoted string",
            Token::Comma => "','",
            Token::Equals => "'='",
            Token::Space => "' '",
        }
    }
}

fn tokenize(line: &str) -> Result<Vec<Token>, LineError> {
    let mut tokens = Vec::new();
    let mut word = String::new();
    let mut chars = line.chars();

    fn flush(word: &mut String, tokens: &mut Vec<Token>) {
        if !word.is_empty() {
            tokens.push(Token::Word(std::mem::take(word)));
        }
    }

    while let Some(c) = chars.next() {
        match c {
            '\n' | '\r' => return Err(LineError::LineBreak),
            '\\' => word.push(chars.next().unwrap_or('\\')),
            ',' => {
                flush(&mut word, &mut tokens);
                tokens.push(Token::Comma);
            }
            '=' => {
                flush(&mut word, &mut tokens);
                tokens.push(Token::Equals);
            }
            ' ' | '\t' => {
                flush(&mut word, &mut tokens);
                // runs of blanks count as one separator
                if tokens.last() != Some(&Token::Space) {
                    tokens.push(Token::Space);
                }
            }
            '"' => {
                flush(&mut word, &mut tokens);
                let mut quoted = String::new();
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(escaped) => quoted.push(escaped),
                            None => return Err(LineError::UnterminatedString),
                        },
                        Some('\n') | Some('\r') => return Err(LineError::LineBreak),
                        Some(other) => quoted.push(other),
                        None => return Err(LineError::UnterminatedString),
                    }
                }
                tokens.push(Token::Quoted(quoted));
            }
            other => word.push(other),
        }
    }
    flush(&mut word, &mut tokens);

    Ok(tokens)
}

struct Parser {
    tokens: std::iter::Peekable<std::vec::IntoIter<Token>>,
}

impl Parser {
    fn peek(&mut self) -> Option<&Token> {
        self.tokens.peek()
    }

    fn next(&mut self) -> Option<Token> {
        self.tokens.next()
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.next();
            true
        } else {
            false
        }
    }

    fn line(&mut self, precision: Option<Precision>) -> Result<Point, LineError> {
        let measurement = match self.next() {
            Some(Token::Word(name)) => name,
            _ => return Err(LineError::MissingMeasurement),
        };
        let mut point = Point::new(measurement);

        while self.eat(&Token::Comma) {
            point.tags.push(self.pair()?);
        }

        match self.next() {
            Some(Token::Space) => {}
            None => return Err(LineError::MissingFields),
            Some(other) => {
                return Err(LineError::Unexpected {
                    found: other.describe(),
                    after: "the tag set",
                })
            }
        }
        if self.peek().is_none() {
            return Err(LineError::MissingFields);
        }

        point.fields.push(self.pair()?);
        while self.eat(&Token::Comma) {
            point.fields.push(self.pair()?);
        }

        if self.eat(&Token::Space) {
            match self.next() {
                Some(Token::Word(raw)) => {
                    let ts = raw
                        .parse::<i64>()
                        .map_err(|_| LineError::InvalidTimestamp(raw.clone()))?;
                    point.timestamp = Some(ts);
                    point.precision = precision;
                }
                other => {
                    let found = other.as_ref().map_or("end of line", Token::describe);
                    return Err(LineError::InvalidTimestamp(found.to_string()));
                }
            }
        }

        if let Some(extra) = self.next() {
            return Err(LineError::TrailingInput(extra.describe()));
        }

        point.validate().map_err(LineError::Invalid)?;
        Ok(point)
    }

    fn pair(&mut self) -> Result<(String, FieldValue), LineError> {
        let key = match self.next() {
            Some(Token::Word(key)) => key,
            Some(other) => return Err(LineError::ExpectedKey(other.describe())),
            None => return Err(LineError::ExpectedKey("end of line")),
        };

        if !self.eat(&Token::Equals) {
            return Err(LineError::MissingEquals(key));
        }

        let value = self.value(&key)?;
        Ok((key, value))
    }

    fn value(&mut self, key: &str) -> Result<FieldValue, LineError> {
        let raw = match self.next() {
            Some(Token::Word(raw)) => raw,
            Some(Token::Quoted(s)) => {
                return Err(LineError::InvalidValue {
                    key: key.to_string(),
                    raw: format!("\"{}\" (strings need the L prefix)", s),
                })
            }
            _ => return Err(LineError::MissingValue(key.to_string())),
        };

        if matches!(self.peek(), Some(Token::Quoted(_))) {
            if let Some(Token::Quoted(s)) = self.next() {
                if raw == "L" {
                    return Ok(FieldValue::Str(s));
                }
                return Err(LineError::InvalidValue {
                    key: key.to_string(),
                    raw: format!("{}\"{}\"", raw, s),
                });
            }
        }

        parse_scalar(&raw).ok_or_else(|| LineError::InvalidValue {
            key: key.to_string(),
            raw,
        })
    }
}

fn parse_scalar(raw: &str) -> Option<FieldValue> {
    if let Some(digits) = raw.strip_suffix("i64") {
        return digits.parse::<i64>().ok().map(FieldValue::Int);
    }
    if let Some(digits) = raw.strip_suffix("f64") {
        return digits
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .map(FieldValue::Float);
    }
    match raw {
        "true" | "True" | "TRUE" | "t" | "T" => Some(FieldValue::Bool(true)),
        "false" | "False" | "FALSE" | "f" | "F" => Some(FieldValue::Bool(false)),
        _ => None,
    }
}

pub(crate) fn parse_point(line: &str, precision: Option<Precision>) -> Result<Point, LineError> {
    let tokens = tokenize(line.trim())?;
    Parser {
        tokens: tokens.into_iter().peekable(),
    }
    .line(precision)
}

/// Decode one schemaless line
///
/// `precision` is the unit the caller's configuration declares for the
/// timestamp; it is attached to the point only when the line has a timestamp.
pub fn decode(line: &str, precision: Option<Precision>) -> ConnectorResult<Point> {
    parse_point(line, precision).map_err(|e| ConnectorError::format(line, e.to_string()))
}
