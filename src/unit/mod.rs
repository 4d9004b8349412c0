//! Section/option model for systemd-style unit files.
//!
//! A unit file is a sequence of `[Section]` headers, each followed by
//! `name = value` options. This module owns the in-memory representation
//! (`Section`, `Opt`) and the typed accessors used throughout task
//! decoding and validation (`get_string`, `get_bool`, `get_int_slice`, ...).
//! Parsing text into this representation is handled by [`lexer`].

pub mod lexer;

use std::fmt;

pub use lexer::parse;

/// A single `name = value` occurrence within a section.
///
/// Option names are compared case-insensitively throughout this module,
/// matching systemd's own unit file semantics.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Opt {
    pub name: String,
    pub value: String,
}

impl Opt {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    fn name_eq(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }
}

/// Error returned by the low-level accessor methods on [`Options`].
///
/// Distinct from [`crate::error::SystemDeployError`]: these are raw,
/// context-free lookup failures. The option-spec validator is the layer
/// that turns them into named, option-qualified errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OptionError {
    #[error("option not set")]
    NotSet,
    #[error("option is only allowed once")]
    AllowedOnce,
    #[error("invalid boolean value {0:?}")]
    InvalidBoolean(String),
    #[error("invalid number {0:?}")]
    InvalidNumber(String),
    #[error("invalid floating point number {0:?}")]
    InvalidFloat(String),
}

/// True if `err` is [`OptionError::NotSet`].
pub fn is_not_set(err: &OptionError) -> bool {
    matches!(err, OptionError::NotSet)
}

/// An ordered bag of [`Opt`] values, as they appeared within one section.
///
/// Order is preserved because slice-typed options (`StringSlice`, ...)
/// return values in declaration order, and drop-in merging depends on it.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct Options(pub Vec<Opt>);

impl Options {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push(Opt::new(name, value));
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Opt> {
        self.0.iter()
    }

    fn values(&self, name: &str) -> impl Iterator<Item = &str> {
        self.0
            .iter()
            .filter(move |o| o.name_eq(name))
            .map(|o| o.value.as_str())
    }

    /// Returns the single value for `name`.
    ///
    /// Errors with [`OptionError::NotSet`] if absent, or
    /// [`OptionError::AllowedOnce`] if it appears more than once.
    pub fn get_string(&self, name: &str) -> Result<String, OptionError> {
        let mut values = self.values(name);
        let first = values.next().ok_or(OptionError::NotSet)?;
        if values.next().is_some() {
            return Err(OptionError::AllowedOnce);
        }
        Ok(first.to_string())
    }

    /// Returns every value for `name`, in declaration order. Empty if unset.
    pub fn get_string_slice(&self, name: &str) -> Vec<String> {
        self.values(name).map(str::to_string).collect()
    }

    /// Like [`Self::get_string_slice`], but requires at least one value.
    pub fn get_required_string_slice(&self, name: &str) -> Result<Vec<String>, OptionError> {
        let values = self.get_string_slice(name);
        if values.is_empty() {
            return Err(OptionError::NotSet);
        }
        Ok(values)
    }

    pub fn get_bool(&self, name: &str) -> Result<bool, OptionError> {
        let value = self.get_string(name)?;
        convert_bool(&value)
    }

    pub fn get_bool_default(&self, name: &str, default: bool) -> bool {
        self.get_bool(name).unwrap_or(default)
    }

    pub fn get_int(&self, name: &str) -> Result<i64, OptionError> {
        let value = self.get_string(name)?;
        parse_int(&value)
    }

    pub fn get_int_default(&self, name: &str, default: i64) -> i64 {
        self.get_int(name).unwrap_or(default)
    }

    pub fn get_int_slice(&self, name: &str) -> Result<Vec<i64>, OptionError> {
        self.get_string_slice(name).iter().map(|v| parse_int(v)).collect()
    }

    pub fn get_required_int_slice(&self, name: &str) -> Result<Vec<i64>, OptionError> {
        let values = self.get_int_slice(name)?;
        if values.is_empty() {
            return Err(OptionError::NotSet);
        }
        Ok(values)
    }

    pub fn get_float(&self, name: &str) -> Result<f64, OptionError> {
        let value = self.get_string(name)?;
        parse_float(&value)
    }

    pub fn get_float_default(&self, name: &str, default: f64) -> f64 {
        self.get_float(name).unwrap_or(default)
    }

    pub fn get_float_slice(&self, name: &str) -> Result<Vec<f64>, OptionError> {
        self.get_string_slice(name)
            .iter()
            .map(|v| parse_float(v))
            .collect()
    }

    pub fn get_required_float_slice(&self, name: &str) -> Result<Vec<f64>, OptionError> {
        let values = self.get_float_slice(name)?;
        if values.is_empty() {
            return Err(OptionError::NotSet);
        }
        Ok(values)
    }

    /// Removes every occurrence of `name`, returning how many were removed.
    pub fn clear(&mut self, name: &str) -> usize {
        let before = self.0.len();
        self.0.retain(|o| !o.name_eq(name));
        before - self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl std::ops::Deref for Options {
    type Target = [Opt];
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl IntoIterator for Options {
    type Item = Opt;
    type IntoIter = std::vec::IntoIter<Opt>;
    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl FromIterator<Opt> for Options {
    fn from_iter<T: IntoIterator<Item = Opt>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// A `[Name]` block with its options, as produced by [`lexer::parse`].
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct Section {
    pub name: String,
    pub options: Options,
}

impl Section {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            options: Options::new(),
        }
    }
}

impl std::ops::Deref for Section {
    type Target = Options;
    fn deref(&self) -> &Self::Target {
        &self.options
    }
}

impl std::ops::DerefMut for Section {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.options
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "[{}]", self.name)?;
        for opt in &self.options.0 {
            writeln!(f, "{} = {}", opt.name, opt.value)?;
        }
        Ok(())
    }
}

/// Converts systemd-style boolean tokens.
///
/// Recognizes the canonical-cased `yes`/`on` and `no`/`off` spellings
/// directly, then falls back to the generic `true`/`false`/`1`/`0` forms
/// (and their common case variants).
pub(crate) fn convert_bool(value: &str) -> Result<bool, OptionError> {
    match value {
        "yes" | "Yes" | "YES" | "on" | "ON" => return Ok(true),
        "no" | "No" | "NO" | "off" | "OFF" => return Ok(false),
        _ => {}
    }

    match value {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Ok(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Ok(false),
        _ => Err(OptionError::InvalidBoolean(value.to_string())),
    }
}

/// Parses an integer, honoring `0x`/`0b` prefixes and leading-zero octal.
pub(crate) fn parse_int(value: &str) -> Result<i64, OptionError> {
    let (neg, rest) = match value.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, value),
    };

    let parsed = if let Some(hex) = rest.strip_prefix("0x").or_else(|| rest.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16)
    } else if let Some(bin) = rest.strip_prefix("0b").or_else(|| rest.strip_prefix("0B")) {
        i64::from_str_radix(bin, 2)
    } else if rest.len() > 1 && rest.starts_with('0') {
        i64::from_str_radix(&rest[1..], 8)
    } else {
        rest.parse::<i64>()
    }
    .map_err(|_| OptionError::InvalidNumber(value.to_string()))?;

    Ok(if neg { -parsed } else { parsed })
}

pub(crate) fn parse_float(value: &str) -> Result<f64, OptionError> {
    value
        .parse::<f64>()
        .map_err(|_| OptionError::InvalidFloat(value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn section(opts: &[(&str, &str)]) -> Section {
        let mut s = Section::new("Test");
        for (k, v) in opts {
            s.options.push(*k, *v);
        }
        s
    }

    #[test]
    fn get_string_requires_single_value() {
        let s = section(&[("Source", "/a"), ("Source", "/b")]);
        assert_eq!(s.get_string("source"), Err(OptionError::AllowedOnce));
    }

    #[test]
    fn get_string_not_set() {
        let s = section(&[]);
        assert_eq!(s.get_string("Source"), Err(OptionError::NotSet));
    }

    #[test]
    fn get_string_slice_preserves_order() {
        let s = section(&[("Env", "A=1"), ("Env", "B=2")]);
        assert_eq!(s.get_string_slice("env"), vec!["A=1", "B=2"]);
    }

    #[test]
    fn bool_parsing_handles_systemd_tokens() {
        assert_eq!(convert_bool("yes"), Ok(true));
        assert_eq!(convert_bool("off"), Ok(false));
        assert_eq!(convert_bool("true"), Ok(true));
        assert_eq!(convert_bool("0"), Ok(false));
        assert!(convert_bool("maybe").is_err());
    }

    #[test]
    fn int_parsing_handles_bases() {
        assert_eq!(parse_int("0x10"), Ok(16));
        assert_eq!(parse_int("0b11"), Ok(3));
        assert_eq!(parse_int("0600"), Ok(384));
        assert_eq!(parse_int("-5"), Ok(-5));
        assert_eq!(parse_int("42"), Ok(42));
    }

    #[test]
    fn get_required_string_slice_rejects_empty() {
        let s = section(&[]);
        assert_eq!(s.get_required_string_slice("Env"), Err(OptionError::NotSet));
    }
}
