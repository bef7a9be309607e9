use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{FieldResolutionError, ParseError};
use crate::types::EventData;

static ARGS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?P<field>[A-Za-z0-9_]+)(?P<relation>[<>=]{1,2})(?P<threshold>[A-Za-z0-9_]+)\s(?P<url>.+)",
    )
    .expect("valid condition regex")
});

/// Predicate attached to a pipeline step.
///
/// Parsed from strings such as `fieldname>=30 http://cb/webhook`: when the
/// event's `fieldname` is at least 30, `http://cb/webhook` should be called.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    pub field: String,
    pub relation: Relation,
    pub threshold: Threshold,
    /// Callback URL fired when the predicate holds.
    pub callback: String,
}

/// Right-hand side of a condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Threshold {
    pub text: String,
    /// Set when `text` is an integer; routes evaluation to numeric comparison.
    pub numeric: Option<i64>,
}

impl Threshold {
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let numeric = text.parse().ok();
        Self { text, numeric }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Relation {
    Greater,
    GreaterOrEqual,
    Less,
    LessOrEqual,
    Equal,
    /// Any other combination the grammar admits, e.g. `=>` or `<>`.
    Unsupported(String),
}

impl Relation {
    pub fn from_symbol(symbol: &str) -> Self {
        match symbol {
            ">" => Relation::Greater,
            ">=" => Relation::GreaterOrEqual,
            "<" => Relation::Less,
            "<=" => Relation::LessOrEqual,
            "=" => Relation::Equal,
            other => Relation::Unsupported(other.to_string()),
        }
    }

    /// Integer comparison; unsupported relations never hold.
    pub fn compare(&self, value: i64, threshold: i64) -> bool {
        match self {
            Relation::Greater => value > threshold,
            Relation::GreaterOrEqual => value >= threshold,
            Relation::Less => value < threshold,
            Relation::LessOrEqual => value <= threshold,
            Relation::Equal => value == threshold,
            Relation::Unsupported(_) => false,
        }
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            Relation::Greater => ">",
            Relation::GreaterOrEqual => ">=",
            Relation::Less => "<",
            Relation::LessOrEqual => "<=",
            Relation::Equal => "=",
            Relation::Unsupported(symbol) => symbol,
        };
        f.write_str(symbol)
    }
}

impl Condition {
    /// Parse `<field><relation><threshold> <url>`.
    ///
    /// The first match anywhere in `args` is used; the URL runs to the end of
    /// the line.
    pub fn parse(args: &str) -> Result<Self, ParseError> {
        let invalid = || ParseError {
            args: args.to_string(),
        };
        let caps = ARGS_RE.captures(args).ok_or_else(invalid)?;
        let group = |name: &str| {
            caps.name(name)
                .map(|m| m.as_str())
                .filter(|s| !s.is_empty())
                .ok_or_else(invalid)
        };

        Ok(Self {
            field: group("field")?.to_string(),
            relation: Relation::from_symbol(group("relation")?),
            threshold: Threshold::new(group("threshold")?),
            callback: group("url")?.to_string(),
        })
    }

    /// Decide whether the condition holds for `event`.
    ///
    /// A numeric threshold compares as integers when the field resolves as
    /// one. Everything else falls back to text, where only `=` can match.
    /// Errors only when the field resolves as neither.
    pub fn evaluate(&self, event: &EventData) -> Result<bool, FieldResolutionError> {
        if let Some(threshold) = self.threshold.numeric {
            if let Ok(value) = event.int_field(&self.field) {
                return Ok(self.relation.compare(value, threshold));
            }
        }

        let value = event.str_field(&self.field)?;
        Ok(self.relation == Relation::Equal && value == self.threshold.text)
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{} {}",
            self.field, self.relation, self.threshold.text, self.callback
        )
    }
}
