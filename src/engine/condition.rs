//! # Routing Conditions
//!
//! The expression language carried by sequence flows:
//!
//! - `${name}`: the variable is truthy
//! - `${!name}`: the variable is present and falsy
//! - `${name == literal}` / `${name != literal}`: comparison against an
//!   integer, `true`/`false` or a quoted string
//!
//! A missing variable makes both boolean forms false and compares as
//! not-equal. Conditions are parsed when a topology is built, so evaluation
//! itself never fails.

use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use super::variables::Variables;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConditionError {
    #[error("Condition must be wrapped in ${{...}}: '{0}'")]
    NotWrapped(String),

    #[error("Empty condition")]
    Empty,

    #[error("Invalid variable name '{0}'")]
    InvalidName(String),

    #[error("Invalid literal '{0}'")]
    InvalidLiteral(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Literal {
    Int(i64),
    Bool(bool),
    Str(String),
}

impl Literal {
    fn parse(raw: &str) -> Result<Self, ConditionError> {
        let raw = raw.trim();
        for quote in ['\'', '"'] {
            if raw.len() >= 2 && raw.starts_with(quote) && raw.ends_with(quote) {
                return Ok(Self::Str(raw[1..raw.len() - 1].to_string()));
            }
        }
        match raw {
            "true" => Ok(Self::Bool(true)),
            "false" => Ok(Self::Bool(false)),
            _ => raw
                .parse::<i64>()
                .map(Self::Int)
                .map_err(|_| ConditionError::InvalidLiteral(raw.to_string())),
        }
    }

    fn matches(&self, value: &Value) -> bool {
        match (self, value) {
            (Self::Int(i), Value::Number(n)) => n.as_i64() == Some(*i),
            (Self::Int(i), Value::String(s)) => s.trim().parse::<i64>().ok() == Some(*i),
            (Self::Bool(b), Value::Bool(v)) => b == v,
            (Self::Str(s), Value::String(v)) => s == v,
            _ => false,
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(i) => write!(f, "{i}"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Str(s) => write!(f, "'{s}'"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    Truthy(String),
    Falsy(String),
    Equals(String, Literal),
    NotEquals(String, Literal),
}

impl Condition {
    pub fn parse(expression: &str) -> Result<Self, ConditionError> {
        let trimmed = expression.trim();
        let inner = trimmed
            .strip_prefix("${")
            .and_then(|rest| rest.strip_suffix('}'))
            .ok_or_else(|| ConditionError::NotWrapped(expression.to_string()))?
            .trim();
        if inner.is_empty() {
            return Err(ConditionError::Empty);
        }

        let comparison = [("==", true), ("!=", false)]
            .into_iter()
            .filter_map(|(op, equals)| inner.find(op).map(|at| (at, op, equals)))
            .min_by_key(|(at, _, _)| *at);

        if let Some((at, op, equals)) = comparison {
            let name = parse_name(&inner[..at])?;
            let literal = Literal::parse(&inner[at + op.len()..])?;
            return Ok(if equals {
                Self::Equals(name, literal)
            } else {
                Self::NotEquals(name, literal)
            });
        }

        match inner.strip_prefix('!') {
            Some(name) => Ok(Self::Falsy(parse_name(name)?)),
            None => Ok(Self::Truthy(parse_name(inner)?)),
        }
    }

    pub fn variable(&self) -> &str {
        match self {
            Self::Truthy(name) | Self::Falsy(name) => name,
            Self::Equals(name, _) | Self::NotEquals(name, _) => name,
        }
    }

    pub fn evaluate(&self, variables: &Variables) -> bool {
        let value = variables.get(self.variable());
        match (self, value) {
            (Self::Truthy(_), Some(v)) => is_truthy(v),
            (Self::Falsy(_), Some(v)) => !is_truthy(v),
            (Self::Truthy(_) | Self::Falsy(_), None) => false,
            (Self::Equals(_, literal), Some(v)) => literal.matches(v),
            (Self::Equals(_, _), None) => false,
            (Self::NotEquals(_, literal), Some(v)) => !literal.matches(v),
            (Self::NotEquals(_, _), None) => true,
        }
    }
}

impl FromStr for Condition {
    type Err = ConditionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truthy(name) => write!(f, "${{{name}}}"),
            Self::Falsy(name) => write!(f, "${{!{name}}}"),
            Self::Equals(name, literal) => write!(f, "${{{name} == {literal}}}"),
            Self::NotEquals(name, literal) => write!(f, "${{{name} != {literal}}}"),
        }
    }
}

fn parse_name(raw: &str) -> Result<String, ConditionError> {
    let name = raw.trim();
    let mut chars = name.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.');
    if valid {
        Ok(name.to_string())
    } else {
        Err(ConditionError::InvalidName(name.to_string()))
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => s.eq_ignore_ascii_case("true"),
        Value::Null => false,
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Equality condition used by the risk gateway
pub fn equals_condition(name: &str, value: i64) -> String {
    Condition::Equals(name.to_string(), Literal::Int(value)).to_string()
}
