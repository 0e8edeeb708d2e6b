//! Path expressions addressing values inside a resource.
//!
//! Syntax is a dot-separated list of keys, each optionally followed by
//! bracketed indexes: `name[0].given[0]`, `meta.lastUpdated`,
//! `code.coding[*].code`. `[*]` marks the array a mapping explodes over and
//! may appear at most once.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::schema::ArrayRule;
use crate::{Error, Result};

static PART_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z_][A-Za-z0-9_]*)((?:\[(?:[0-9]+|\*)\])*)$").expect("Invalid path regex")
});

static INDEX_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([0-9]+|\*)\]").expect("Invalid index regex"));

/// One step of a path expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    /// Object member lookup.
    Key(String),

    /// Array element lookup.
    Index(usize),

    /// Every element of an array (explode).
    Each,
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key(key) => write!(f, "{key}"),
            Self::Index(i) => write!(f, "[{i}]"),
            Self::Each => write!(f, "[*]"),
        }
    }
}

/// Result of resolving a path against a JSON value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Resolution<'a> {
    /// The path reached a non-null value.
    Found(&'a Value),

    /// Some step was missing, null, out of range, or not traversable.
    Absent,

    /// An array was reached where the mapping did not declare how to index it.
    UnexpectedArray,
}

/// A parsed, validated path expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PathExpr {
    raw: String,
    segments: Vec<Segment>,
}

impl PathExpr {
    /// Parse a path expression.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPath`] for empty parts, illegal characters,
    /// malformed brackets, or more than one `[*]`.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(Error::invalid_path(raw, "path is empty"));
        }

        let mut segments = Vec::new();
        for part in trimmed.split('.') {
            let caps = PART_REGEX
                .captures(part)
                .ok_or_else(|| Error::invalid_path(raw, format!("malformed segment '{part}'")))?;
            segments.push(Segment::Key(caps[1].to_string()));

            for index in INDEX_REGEX.captures_iter(&caps[2]) {
                let segment = match &index[1] {
                    "*" => Segment::Each,
                    digits => Segment::Index(digits.parse().map_err(|_| {
                        Error::invalid_path(raw, format!("index '{digits}' is out of range"))
                    })?),
                };
                segments.push(segment);
            }
        }

        if segments.iter().filter(|s| **s == Segment::Each).count() > 1 {
            return Err(Error::invalid_path(raw, "at most one [*] is allowed"));
        }

        Ok(Self {
            raw: trimmed.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn is_explode(&self) -> bool {
        self.segments.contains(&Segment::Each)
    }

    /// Split an exploding path into the array prefix and the per-element suffix.
    ///
    /// `code.coding[*].code` splits into `code.coding` and `code`. The suffix
    /// is `None` when the path ends at `[*]`.
    pub fn explode_split(&self) -> Option<(PathExpr, Option<PathExpr>)> {
        let pos = self.segments.iter().position(|s| *s == Segment::Each)?;
        let prefix = Self::from_segments(self.segments[..pos].to_vec());
        let rest = &self.segments[pos + 1..];
        let suffix = (!rest.is_empty()).then(|| Self::from_segments(rest.to_vec()));
        Some((prefix, suffix))
    }

    fn from_segments(segments: Vec<Segment>) -> Self {
        let mut raw = String::new();
        for segment in &segments {
            if matches!(segment, Segment::Key(_)) && !raw.is_empty() {
                raw.push('.');
            }
            raw.push_str(&segment.to_string());
        }
        Self { raw, segments }
    }

    /// Resolve this path against a value without ever panicking.
    ///
    /// Exploding paths must be split with [`PathExpr::explode_split`] first;
    /// reaching `[*]` here reports [`Resolution::UnexpectedArray`].
    pub fn resolve<'a>(&self, value: &'a Value, rule: ArrayRule) -> Resolution<'a> {
        match self.walk(value, rule) {
            Resolution::Found(node) => finish(node, rule),
            other => other,
        }
    }

    /// Follow the segments, returning whatever node is reached (arrays included).
    pub(crate) fn walk<'a>(&self, value: &'a Value, rule: ArrayRule) -> Resolution<'a> {
        let mut current = value;

        for segment in &self.segments {
            match segment {
                Segment::Key(key) => {
                    if let Value::Array(items) = current {
                        match rule {
                            ArrayRule::First => match items.first() {
                                Some(first) => current = first,
                                None => return Resolution::Absent,
                            },
                            ArrayRule::Strict => return Resolution::UnexpectedArray,
                        }
                    }
                    match current.as_object().and_then(|map| map.get(key)) {
                        Some(next) => current = next,
                        None => return Resolution::Absent,
                    }
                }
                Segment::Index(i) => match current.as_array().and_then(|items| items.get(*i)) {
                    Some(next) => current = next,
                    None => return Resolution::Absent,
                },
                Segment::Each => return Resolution::UnexpectedArray,
            }
        }

        Resolution::Found(current)
    }
}

/// Apply the terminal rules to a reached node: null is absent, arrays follow `rule`.
pub(crate) fn finish(node: &Value, rule: ArrayRule) -> Resolution<'_> {
    match node {
        Value::Null => Resolution::Absent,
        Value::Array(items) => match rule {
            ArrayRule::First => match items.first() {
                Some(Value::Null) | None => Resolution::Absent,
                Some(first) => Resolution::Found(first),
            },
            ArrayRule::Strict => Resolution::UnexpectedArray,
        },
        other => Resolution::Found(other),
    }
}

impl fmt::Display for PathExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
