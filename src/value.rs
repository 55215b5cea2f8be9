//! Field value model.
//!
//! Typed literal values used in comparisons against event fields, and the
//! compiled matchers built from them. Values are immutable once constructed
//! and are shared by every evaluation that uses them.

use crate::error::{PolicyError, Result};
use regex::Regex;
use serde::Serialize;
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::Hasher;

/// Name of an event field, e.g. `process.file.path`.
pub type Field = String;

/// A scalar literal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(untagged)]
pub enum Scalar {
    Str(String),
    Int(i64),
    Bool(bool),
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Str(s) => write!(f, "\"{s}\""),
            Scalar::Int(i) => write!(f, "{i}"),
            Scalar::Bool(b) => write!(f, "{b}"),
        }
    }
}

/// Kind of a [`FieldValue`], without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldValueKind {
    Scalar,
    Pattern,
    Regex,
    Set,
}

/// A literal a field was compared against during compilation.
///
/// These are collected per field so that callers can pre-filter events
/// cheaply before running the full evaluator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Scalar(Scalar),
    /// Glob pattern where `*` matches any sequence of characters.
    Pattern(String),
    Regex(String),
    Set(Vec<Scalar>),
}

impl FieldValue {
    pub fn kind(&self) -> FieldValueKind {
        match self {
            FieldValue::Scalar(_) => FieldValueKind::Scalar,
            FieldValue::Pattern(_) => FieldValueKind::Pattern,
            FieldValue::Regex(_) => FieldValueKind::Regex,
            FieldValue::Set(_) => FieldValueKind::Set,
        }
    }

    pub fn string(value: impl Into<String>) -> Self {
        FieldValue::Scalar(Scalar::Str(value.into()))
    }

    pub fn int(value: i64) -> Self {
        FieldValue::Scalar(Scalar::Int(value))
    }
}

/// A compiled string comparison.
#[derive(Debug, Clone)]
pub enum StringMatcher {
    Exact(String),
    /// Holds the lowercased literal.
    CaseInsensitive(String),
    Glob { pattern: String, regex: Regex },
    Regex(Regex),
}

impl StringMatcher {
    /// Build a matcher for a string-like field value.
    pub fn compile(value: &FieldValue, case_insensitive: bool) -> Result<Self> {
        match value {
            FieldValue::Scalar(Scalar::Str(s)) if case_insensitive => {
                Ok(StringMatcher::CaseInsensitive(s.to_lowercase()))
            }
            FieldValue::Scalar(Scalar::Str(s)) => Ok(StringMatcher::Exact(s.clone())),
            FieldValue::Pattern(p) => Ok(StringMatcher::Glob {
                pattern: p.clone(),
                regex: glob_to_regex(p, case_insensitive)?,
            }),
            FieldValue::Regex(r) => Ok(StringMatcher::Regex(Regex::new(r)?)),
            other => Err(PolicyError::TypeMismatch(format!(
                "{:?} value cannot be matched against a string",
                other.kind()
            ))),
        }
    }

    pub fn matches(&self, value: &str) -> bool {
        match self {
            StringMatcher::Exact(s) => s == value,
            StringMatcher::CaseInsensitive(s) => eq_folded(s, value),
            StringMatcher::Glob { regex, .. } => regex.is_match(value),
            StringMatcher::Regex(regex) => regex.is_match(value),
        }
    }
}

/// Whether `value` lowercases to `folded`.
fn eq_folded(folded: &str, value: &str) -> bool {
    folded.chars().eq(value.chars().flat_map(char::to_lowercase))
}

/// Hash of the lowercased characters of `value`.
fn folded_hash(value: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    for c in value.chars().flat_map(char::to_lowercase) {
        hasher.write_u32(u32::from(c));
    }
    hasher.finish()
}

/// Translate a glob into an anchored regex.
pub fn glob_to_regex(pattern: &str, case_insensitive: bool) -> Result<Regex> {
    let mut source = String::with_capacity(pattern.len() + 8);
    if case_insensitive {
        source.push_str("(?i)");
    }
    source.push('^');
    for (i, part) in pattern.split('*').enumerate() {
        if i > 0 {
            source.push_str(".*");
        }
        source.push_str(&regex::escape(part));
    }
    source.push('$');
    Ok(Regex::new(&source)?)
}

/// Set of string values, split into exact scalars and pattern matchers.
#[derive(Debug, Clone, Default)]
pub struct StringValues {
    scalars: HashSet<String>,
    /// Lowercased scalars keyed by [`folded_hash`].
    folded: HashMap<u64, Vec<String>>,
    matchers: Vec<StringMatcher>,
    field_values: Vec<FieldValue>,
    case_insensitive: bool,
}

impl StringValues {
    pub fn new(case_insensitive: bool) -> Self {
        Self {
            case_insensitive,
            ..Self::default()
        }
    }

    pub fn push(&mut self, value: FieldValue) -> Result<()> {
        match &value {
            FieldValue::Scalar(Scalar::Str(s)) if self.case_insensitive => {
                let bucket = self.folded.entry(folded_hash(s)).or_default();
                let lowered = s.to_lowercase();
                if !bucket.contains(&lowered) {
                    bucket.push(lowered);
                }
            }
            FieldValue::Scalar(Scalar::Str(s)) => {
                self.scalars.insert(s.clone());
            }
            FieldValue::Set(items) => {
                for item in items {
                    self.push(FieldValue::Scalar(item.clone()))?;
                }
                return Ok(());
            }
            _ => self
                .matchers
                .push(StringMatcher::compile(&value, self.case_insensitive)?),
        }
        self.field_values.push(value);
        Ok(())
    }

    pub fn contains(&self, value: &str) -> bool {
        let hit = if self.case_insensitive {
            self.folded
                .get(&folded_hash(value))
                .is_some_and(|bucket| bucket.iter().any(|s| eq_folded(s, value)))
        } else {
            self.scalars.contains(value)
        };
        hit || self.matchers.iter().any(|m| m.matches(value))
    }

    pub fn field_values(&self) -> &[FieldValue] {
        &self.field_values
    }

    pub fn is_empty(&self) -> bool {
        self.field_values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.field_values.len()
    }
}

/// Set of integer values.
#[derive(Debug, Clone, Default)]
pub struct IntValues {
    values: HashSet<i64>,
    field_values: Vec<FieldValue>,
}

impl IntValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, value: i64) {
        self.values.insert(value);
        self.field_values.push(FieldValue::int(value));
    }

    pub fn contains(&self, value: i64) -> bool {
        self.values.contains(&value)
    }

    pub fn field_values(&self) -> &[FieldValue] {
        &self.field_values
    }

    pub fn is_empty(&self) -> bool {
        self.field_values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.field_values.len()
    }
}

impl FromIterator<i64> for IntValues {
    fn from_iter<I: IntoIterator<Item = i64>>(iter: I) -> Self {
        let mut values = IntValues::new();
        for value in iter {
            values.push(value);
        }
        values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_values() {
        let values: IntValues = [0, 1000, 0].into_iter().collect();
        assert!(values.contains(1000));
        assert!(!values.contains(1));
        assert_eq!(values.len(), 3);
    }

    #[test]
    fn test_field_value_kind() {
        assert_eq!(FieldValue::string("a").kind(), FieldValueKind::Scalar);
        assert_eq!(
            FieldValue::Pattern("/bin/*".into()).kind(),
            FieldValueKind::Pattern
        );
        assert_eq!(FieldValue::Regex("^a".into()).kind(), FieldValueKind::Regex);
        assert_eq!(FieldValue::Set(vec![]).kind(), FieldValueKind::Set);
    }

    #[test]
    fn test_exact_matcher() {
        let m = StringMatcher::compile(&FieldValue::string("bash"), false).unwrap();
        assert!(m.matches("bash"));
        assert!(!m.matches("BASH"));
    }

    #[test]
    fn test_case_insensitive_matcher() {
        let m = StringMatcher::compile(&FieldValue::string("Bash"), true).unwrap();
        assert!(m.matches("BASH"));
        assert!(m.matches("bash"));
        assert!(!m.matches("zsh"));
        assert!(!m.matches("bas"));
        assert!(StringMatcher::compile(&FieldValue::string("ÉTÉ"), true)
            .unwrap()
            .matches("été"));
    }

    #[test]
    fn test_glob_matcher() {
        let m = StringMatcher::compile(&FieldValue::Pattern("/usr/bin/*".into()), false).unwrap();
        assert!(m.matches("/usr/bin/curl"));
        assert!(!m.matches("/usr/sbin/curl"));

        let m = StringMatcher::compile(&FieldValue::Pattern("*.so.?".into()), false).unwrap();
        assert!(m.matches("libc.so.?"));
        assert!(!m.matches("libc.so.6"));
    }

    #[test]
    fn test_regex_matcher() {
        let m = StringMatcher::compile(&FieldValue::Regex("^/tmp/[a-z]+$".into()), false).unwrap();
        assert!(m.matches("/tmp/payload"));
        assert!(!m.matches("/tmp/Payload1"));
    }

    #[test]
    fn test_invalid_regex() {
        let err = StringMatcher::compile(&FieldValue::Regex("(".into()), false).unwrap_err();
        assert!(matches!(err, PolicyError::InvalidRegex(_)));
    }

    #[test]
    fn test_int_cannot_be_string_matcher() {
        let err = StringMatcher::compile(&FieldValue::int(3), false).unwrap_err();
        assert!(matches!(err, PolicyError::TypeMismatch(_)));
    }

    #[test]
    fn test_string_values_membership() {
        let mut values = StringValues::new(false);
        values.push(FieldValue::string("sh")).unwrap();
        values.push(FieldValue::Pattern("*bash".into())).unwrap();
        values
            .push(FieldValue::Set(vec![Scalar::Str("zsh".into())]))
            .unwrap();

        assert!(values.contains("sh"));
        assert!(values.contains("zsh"));
        assert!(values.contains("/bin/bash"));
        assert!(!values.contains("fish"));
        assert_eq!(values.len(), 3);
    }

    #[test]
    fn test_case_insensitive_membership() {
        let mut values = StringValues::new(true);
        values.push(FieldValue::string("Bash")).unwrap();
        values
            .push(FieldValue::Set(vec![Scalar::Str("ÉCHO".into())]))
            .unwrap();

        assert!(values.contains("bash"));
        assert!(values.contains("BASH"));
        assert!(values.contains("écho"));
        assert!(!values.contains("bas"));
        assert!(!values.contains("bashh"));
        assert_eq!(folded_hash("BaSh"), folded_hash("bash"));
    }
}
