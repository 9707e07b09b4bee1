//! Label selector expressions
//!
//! Parses the string form accepted by `kubectl -l` into a [`LabelSelector`]
//! made of `matchLabels` and `matchExpressions`, the same shape the API uses
//! for `metav1.LabelSelector`:
//!
//! | Expression          | Result                                  |
//! |---------------------|-----------------------------------------|
//! | `key=value`         | `matchLabels[key] = value`              |
//! | `key==value`        | `matchLabels[key] = value`              |
//! | `key!=value`        | `NotIn [value]`                         |
//! | `key in (a,b)`      | `In [a, b]`                             |
//! | `key notin (a,b)`   | `NotIn [a, b]`                          |
//! | `key`               | `Exists`                                |
//! | `!key`              | `DoesNotExist`                          |
//!
//! Requirements are comma separated and ANDed. The empty expression selects
//! everything.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::Error;

/// Operator for label selector requirements
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LabelSelectorOperator {
    /// Label value must be in the specified set
    In,
    /// Label value must not be in the specified set (or the label is absent)
    NotIn,
    /// Label must exist (value ignored)
    Exists,
    /// Label must not exist (value ignored)
    DoesNotExist,
}

impl LabelSelectorOperator {
    /// Check if a label value matches this requirement
    pub fn matches(&self, label_value: Option<&str>, values: &[String]) -> bool {
        match self {
            Self::In => label_value.is_some_and(|v| values.iter().any(|req| req == v)),
            Self::NotIn => {
                label_value.is_none() || !values.iter().any(|req| Some(req.as_str()) == label_value)
            }
            Self::Exists => label_value.is_some(),
            Self::DoesNotExist => label_value.is_none(),
        }
    }
}

/// A single `matchExpressions` entry
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LabelSelectorRequirement {
    /// The label key that the selector applies to
    pub key: String,
    /// Relationship between the label and `values`
    pub operator: LabelSelectorOperator,
    /// Values for `In` and `NotIn`; empty for `Exists` and `DoesNotExist`
    pub values: Vec<String>,
}

impl LabelSelectorRequirement {
    /// Check if a label set matches this requirement
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        let value = labels.get(&self.key).map(|s| s.as_str());
        self.operator.matches(value, &self.values)
    }
}

/// A parsed label selector
///
/// An empty selector matches every label set.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LabelSelector {
    /// Exact key/value pairs, all of which must be present
    pub match_labels: BTreeMap<String, String>,
    /// Set-based requirements, all of which must hold
    pub match_expressions: Vec<LabelSelectorRequirement>,
}

impl LabelSelector {
    /// Parse a selector expression such as `tier=backend,env in (prod,staging)`
    pub fn parse(expression: &str) -> Result<Self, Error> {
        Parser::new(expression).parse().map_err(|reason| {
            Error::selector(format!("unable to parse '{}': {}", expression, reason))
        })
    }

    /// Check if a label set matches this selector
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        for (key, value) in &self.match_labels {
            if labels.get(key) != Some(value) {
                return false;
            }
        }

        self.match_expressions.iter().all(|req| req.matches(labels))
    }

    /// Check if this selector is empty (matches everything)
    pub fn is_empty(&self) -> bool {
        self.match_labels.is_empty() && self.match_expressions.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Token {
    Identifier(String),
    In,
    NotIn,
    Equals,
    DoubleEquals,
    NotEquals,
    GreaterThan,
    LessThan,
    Bang,
    OpenParen,
    CloseParen,
    Comma,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Identifier(s) => write!(f, "'{}'", s),
            Token::In => f.write_str("'in'"),
            Token::NotIn => f.write_str("'notin'"),
            Token::Equals => f.write_str("'='"),
            Token::DoubleEquals => f.write_str("'=='"),
            Token::NotEquals => f.write_str("'!='"),
            Token::GreaterThan => f.write_str("'>'"),
            Token::LessThan => f.write_str("'<'"),
            Token::Bang => f.write_str("'!'"),
            Token::OpenParen => f.write_str("'('"),
            Token::CloseParen => f.write_str("')'"),
            Token::Comma => f.write_str("','"),
        }
    }
}

fn is_special(c: char) -> bool {
    matches!(c, '!' | '=' | '(' | ')' | ',' | '<' | '>')
}

fn tokenize(input: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }

        if is_special(c) {
            chars.next();
            let token = match c {
                '!' if chars.peek() == Some(&'=') => {
                    chars.next();
                    Token::NotEquals
                }
                '!' => Token::Bang,
                '=' if chars.peek() == Some(&'=') => {
                    chars.next();
                    Token::DoubleEquals
                }
                '=' => Token::Equals,
                '(' => Token::OpenParen,
                ')' => Token::CloseParen,
                ',' => Token::Comma,
                '<' => Token::LessThan,
                _ => Token::GreaterThan,
            };
            tokens.push(token);
            continue;
        }

        let mut word = String::new();
        while let Some(&c) = chars.peek() {
            if c.is_whitespace() || is_special(c) {
                break;
            }
            word.push(c);
            chars.next();
        }
        tokens.push(match word.as_str() {
            "in" => Token::In,
            "notin" => Token::NotIn,
            _ => Token::Identifier(word),
        });
    }

    tokens
}

struct Parser {
    tokens: Vec<Token>,
    position: usize,
}

impl Parser {
    fn new(input: &str) -> Self {
        Self {
            tokens: tokenize(input),
            position: 0,
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.position).cloned();
        self.position += 1;
        token
    }

    fn parse(mut self) -> Result<LabelSelector, String> {
        let mut selector = LabelSelector::default();
        if self.tokens.is_empty() {
            return Ok(selector);
        }

        loop {
            self.parse_requirement(&mut selector)?;
            match self.next() {
                None => return Ok(selector),
                Some(Token::Comma) if self.peek().is_some() => continue,
                Some(Token::Comma) => return Err("expected requirement after ','".into()),
                Some(other) => return Err(format!("found {}, expected ','", other)),
            }
        }
    }

    fn parse_requirement(&mut self, selector: &mut LabelSelector) -> Result<(), String> {
        if self.peek() == Some(&Token::Bang) {
            self.next();
            let key = self.parse_key()?;
            selector.match_expressions.push(LabelSelectorRequirement {
                key,
                operator: LabelSelectorOperator::DoesNotExist,
                values: Vec::new(),
            });
            return Ok(());
        }

        let key = self.parse_key()?;
        match self.peek() {
            None | Some(Token::Comma) => {
                selector.match_expressions.push(LabelSelectorRequirement {
                    key,
                    operator: LabelSelectorOperator::Exists,
                    values: Vec::new(),
                });
                Ok(())
            }
            Some(Token::Equals) | Some(Token::DoubleEquals) => {
                self.next();
                let value = self.parse_single_value()?;
                if let Some(existing) = selector.match_labels.get(&key) {
                    if existing != &value {
                        // Two different exact values for one key can never match
                        selector.match_expressions.push(LabelSelectorRequirement {
                            key,
                            operator: LabelSelectorOperator::In,
                            values: vec![value],
                        });
                        return Ok(());
                    }
                }
                selector.match_labels.insert(key, value);
                Ok(())
            }
            Some(Token::NotEquals) => {
                self.next();
                let value = self.parse_single_value()?;
                selector.match_expressions.push(LabelSelectorRequirement {
                    key,
                    operator: LabelSelectorOperator::NotIn,
                    values: vec![value],
                });
                Ok(())
            }
            Some(Token::In) | Some(Token::NotIn) => {
                let operator = match self.next() {
                    Some(Token::In) => LabelSelectorOperator::In,
                    _ => LabelSelectorOperator::NotIn,
                };
                let values = self.parse_value_set()?;
                selector.match_expressions.push(LabelSelectorRequirement {
                    key,
                    operator,
                    values,
                });
                Ok(())
            }
            Some(op @ (Token::GreaterThan | Token::LessThan)) => Err(format!(
                "operator {} is not supported in label selectors",
                op
            )),
            Some(other) => Err(format!("found {}, expected an operator", other)),
        }
    }

    fn parse_key(&mut self) -> Result<String, String> {
        match self.next() {
            Some(Token::Identifier(key)) => {
                validate_label_key(&key)?;
                Ok(key)
            }
            Some(other) => Err(format!("found {}, expected a label key", other)),
            None => Err("expected a label key".into()),
        }
    }

    /// Value after `=`, `==` or `!=`; an empty value is allowed
    fn parse_single_value(&mut self) -> Result<String, String> {
        match self.peek().cloned() {
            Some(Token::Identifier(value)) => {
                self.next();
                validate_label_value(&value)?;
                Ok(value)
            }
            None | Some(Token::Comma) => Ok(String::new()),
            Some(other) => Err(format!("found {}, expected a label value", other)),
        }
    }

    fn parse_value_set(&mut self) -> Result<Vec<String>, String> {
        match self.next() {
            Some(Token::OpenParen) => {}
            Some(other) => return Err(format!("found {}, expected '('", other)),
            None => return Err("expected '('".into()),
        }

        let mut values = Vec::new();
        loop {
            match self.next() {
                Some(Token::Identifier(value)) => {
                    validate_label_value(&value)?;
                    if !values.contains(&value) {
                        values.push(value);
                    }
                }
                Some(Token::CloseParen) if values.is_empty() => {
                    return Err("values set for 'in'/'notin' can't be empty".into());
                }
                Some(other) => return Err(format!("found {}, expected a label value", other)),
                None => return Err("unterminated value set, expected ')'".into()),
            }

            match self.next() {
                Some(Token::Comma) => continue,
                Some(Token::CloseParen) => return Ok(values),
                Some(other) => return Err(format!("found {}, expected ',' or ')'", other)),
                None => return Err("unterminated value set, expected ')'".into()),
            }
        }
    }
}

const MAX_NAME_LENGTH: usize = 63;
const MAX_PREFIX_LENGTH: usize = 253;

/// Name segment: alphanumeric at both ends, `-`, `_`, `.` inside
fn is_qualified_name_segment(s: &str) -> bool {
    let bytes = s.as_bytes();
    match (bytes.first(), bytes.last()) {
        (Some(first), Some(last)) => {
            first.is_ascii_alphanumeric()
                && last.is_ascii_alphanumeric()
                && bytes
                    .iter()
                    .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'))
        }
        _ => false,
    }
}

/// DNS-1123 subdomain: dot separated lowercase labels
fn is_dns_subdomain(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= MAX_PREFIX_LENGTH
        && s.split('.').all(|label| {
            let bytes = label.as_bytes();
            match (bytes.first(), bytes.last()) {
                (Some(first), Some(last)) => {
                    (first.is_ascii_lowercase() || first.is_ascii_digit())
                        && (last.is_ascii_lowercase() || last.is_ascii_digit())
                        && bytes
                            .iter()
                            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-')
                }
                _ => false,
            }
        })
}

fn validate_label_key(key: &str) -> Result<(), String> {
    let name = match key.split_once('/') {
        Some((prefix, name)) => {
            if !is_dns_subdomain(prefix) {
                return Err(format!(
                    "invalid label key '{}': prefix must be a DNS subdomain",
                    key
                ));
            }
            name
        }
        None => key,
    };

    if name.len() > MAX_NAME_LENGTH || !is_qualified_name_segment(name) {
        return Err(format!(
            "invalid label key '{}': name must be 63 characters or less, \
             begin and end with an alphanumeric character, and contain only \
             alphanumerics, '-', '_' or '.'",
            key
        ));
    }
    Ok(())
}

fn validate_label_value(value: &str) -> Result<(), String> {
    if value.is_empty() {
        return Ok(());
    }
    if value.len() > MAX_NAME_LENGTH || !is_qualified_name_segment(value) {
        return Err(format!(
            "invalid label value '{}': must be 63 characters or less, \
             begin and end with an alphanumeric character, and contain only \
             alphanumerics, '-', '_' or '.'",
            value
        ));
    }
    Ok(())
}
