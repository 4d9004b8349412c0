//! Option type system and validator used by task sections and plugins.
//!
//! [`OptionType`] is the closed set of value kinds a unit-file option can
//! hold. [`OptionSpec`] binds a name to a type and whether it's required;
//! [`Validation`] is what a plugin or the task meta section hands to
//! [`validate`] to check a decoded [`crate::unit::Options`] bag against its
//! declared specs. [`Validation::AllowAny`] disables validation entirely —
//! it replaces the original's pointer-identity sentinel (`IsAllowAny`) with
//! an explicit enum variant, since Rust has no stable address-of-slice
//! identity check to rely on.

use std::collections::HashSet;
use std::fmt;

use crate::error::SystemDeployError;
use crate::unit::{self, OptionError, Options};

/// The type of value an option holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionType {
    String,
    StringSlice,
    Bool,
    Int,
    IntSlice,
    Float,
    FloatSlice,
}

impl OptionType {
    /// True for the `*Slice` variants, which may be specified more than once.
    pub fn is_slice(self) -> bool {
        matches!(
            self,
            OptionType::StringSlice | OptionType::IntSlice | OptionType::FloatSlice
        )
    }
}

impl fmt::Display for OptionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OptionType::String => "string",
            OptionType::StringSlice => "[]string",
            OptionType::Bool => "bool",
            OptionType::Int => "int",
            OptionType::IntSlice => "[]int",
            OptionType::Float => "float",
            OptionType::FloatSlice => "[]float",
        };
        f.write_str(name)
    }
}

/// Describes a single option a plugin (or the task meta section) accepts.
#[derive(Debug, Clone)]
pub struct OptionSpec {
    pub name: String,
    pub description: String,
    pub r#type: OptionType,
    pub required: bool,
    /// Documentation-only default, rendered by `describe`. Not applied
    /// automatically to decoded options.
    pub default: Option<String>,
    /// Alternate names that are accepted as if they were `name`.
    pub aliases: Vec<String>,
    /// Hidden from `describe` output, but still validated. Used for the
    /// `Assert*` counterpart of generated condition options.
    pub internal: bool,
}

impl OptionSpec {
    pub fn new(name: impl Into<String>, r#type: OptionType) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            r#type,
            required: false,
            default: None,
            aliases: Vec::new(),
            internal: false,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    pub fn internal(mut self) -> Self {
        self.internal = true;
        self
    }
}

/// What to validate a section's options against.
#[derive(Debug, Clone)]
pub enum Validation {
    /// Skip validation entirely. Intended for development only.
    AllowAny,
    Specs(Vec<OptionSpec>),
}

/// Type-checks a single value against `ty`. Empty strings are always valid;
/// [`validate_option`] is responsible for enforcing "required" semantics.
pub fn check_value(value: &str, ty: OptionType) -> Result<(), OptionError> {
    match ty {
        OptionType::String | OptionType::StringSlice => Ok(()),
        OptionType::Bool => unit::convert_bool(value).map(|_| ()),
        OptionType::Int | OptionType::IntSlice => unit::parse_int(value).map(|_| ()),
        OptionType::Float | OptionType::FloatSlice => unit::parse_float(value).map(|_| ()),
    }
}

fn named_option_error(name: &str, value: &str, err: OptionError) -> SystemDeployError {
    match err {
        OptionError::InvalidBoolean(_) => SystemDeployError::InvalidBoolean {
            name: name.to_string(),
            value: value.to_string(),
        },
        OptionError::InvalidNumber(_) => SystemDeployError::InvalidNumber {
            name: name.to_string(),
            value: value.to_string(),
        },
        OptionError::InvalidFloat(_) => SystemDeployError::InvalidFloat {
            name: name.to_string(),
            value: value.to_string(),
        },
        other => SystemDeployError::Validation(format!("{}: {}", name, other)),
    }
}

/// Validates `values` (every occurrence of one option name) against `spec`.
///
/// An empty value counts as "not provided" for `Required` checks: a
/// required option with a single empty-string occurrence still fails.
pub fn validate_option(values: &[String], spec: &OptionSpec) -> Result<(), SystemDeployError> {
    if spec.required && (values.is_empty() || values.iter().any(|v| v.is_empty())) {
        return Err(SystemDeployError::OptionRequired {
            name: spec.name.clone(),
        });
    }

    if !spec.r#type.is_slice() && values.len() > 1 {
        return Err(SystemDeployError::OptionAllowedOnce {
            name: spec.name.clone(),
        });
    }

    for value in values {
        check_value(value, spec.r#type)
            .map_err(|e| named_option_error(&spec.name, value, e))?;
    }

    Ok(())
}

/// Validates every option in `options` against `validation`.
///
/// Options whose name (or alias) doesn't match any spec are rejected with
/// [`SystemDeployError::OptionNotExists`]. `Validation::AllowAny` skips all
/// checks.
pub fn validate(options: &Options, validation: &Validation) -> Result<(), SystemDeployError> {
    let specs = match validation {
        Validation::AllowAny => return Ok(()),
        Validation::Specs(specs) => specs,
    };

    for spec in specs {
        let mut values = options.get_string_slice(&spec.name);
        for alias in &spec.aliases {
            values.extend(options.get_string_slice(alias));
        }
        validate_option(&values, spec)?;
    }

    let known: HashSet<String> = specs
        .iter()
        .flat_map(|s| {
            std::iter::once(s.name.to_lowercase())
                .chain(s.aliases.iter().map(|a| a.to_lowercase()))
        })
        .collect();

    for opt in options.iter() {
        if !known.contains(&opt.name.to_lowercase()) {
            return Err(SystemDeployError::OptionNotExists {
                name: opt.name.clone(),
            });
        }
    }

    Ok(())
}

/// Adds an option for every spec that is absent, non-required, and carries a
/// non-empty `default`. Applied before [`validate`] so defaulted values are
/// re-validated along with everything else.
///
/// "Absent" means the option name never occurs in `options` at all — an
/// option present with an empty value is left untouched, since that is a
/// distinct (and, for required options, rejected) state from "not set".
pub fn apply_defaults(options: &mut Options, specs: &[OptionSpec]) {
    for spec in specs {
        if spec.required {
            continue;
        }
        let Some(default) = &spec.default else { continue };
        if default.is_empty() {
            continue;
        }
        if !options.get_string_slice(&spec.name).is_empty() {
            continue;
        }
        options.push(spec.name.clone(), default.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::Options;

    fn opts(pairs: &[(&str, &str)]) -> Options {
        let mut o = Options::new();
        for (k, v) in pairs {
            o.push(*k, *v);
        }
        o
    }

    #[test]
    fn check_value_cases() {
        assert!(check_value("yes", OptionType::Bool).is_ok());
        assert!(check_value("foo", OptionType::Bool).is_err());
        assert!(check_value("0x10", OptionType::Int).is_ok());
        assert!(check_value("INVALID", OptionType::Int).is_err());
        assert!(check_value("0.5", OptionType::Float).is_ok());
        assert!(check_value(".INVALID", OptionType::Float).is_err());
        assert!(check_value("", OptionType::String).is_ok());
    }

    #[test]
    fn validate_option_required_empty_value_fails() {
        let spec = OptionSpec::new("Opt", OptionType::Bool).required();
        let err = validate_option(&["".to_string()], &spec).unwrap_err();
        assert!(matches!(err, SystemDeployError::OptionRequired { .. }));
    }

    #[test]
    fn validate_option_rejects_duplicate_non_slice() {
        let spec = OptionSpec::new("Opt", OptionType::String);
        let err =
            validate_option(&["one".to_string(), "two".to_string()], &spec).unwrap_err();
        assert!(matches!(err, SystemDeployError::OptionAllowedOnce { .. }));
    }

    #[test]
    fn validate_rejects_unknown_option() {
        let options = opts(&[("Unknown", "value")]);
        let validation = Validation::Specs(vec![OptionSpec::new("Known", OptionType::String)]);
        let err = validate(&options, &validation).unwrap_err();
        assert!(matches!(err, SystemDeployError::OptionNotExists { .. }));
    }

    #[test]
    fn validate_allow_any_skips_checks() {
        let options = opts(&[("Anything", "value")]);
        assert!(validate(&options, &Validation::AllowAny).is_ok());
    }

    #[test]
    fn validate_honors_aliases() {
        let options = opts(&[("AssertFoo", "bar")]);
        let spec = OptionSpec::new("ConditionFoo", OptionType::StringSlice).alias("AssertFoo");
        let validation = Validation::Specs(vec![spec]);
        assert!(validate(&options, &validation).is_ok());
    }

    #[test]
    fn apply_defaults_fills_absent_option() {
        let mut options = opts(&[]);
        let specs = vec![OptionSpec::new("Mode", OptionType::String).default("0644")];
        apply_defaults(&mut options, &specs);
        assert_eq!(options.get_string("Mode").unwrap(), "0644");
    }

    #[test]
    fn apply_defaults_skips_present_option() {
        let mut options = opts(&[("Mode", "0600")]);
        let specs = vec![OptionSpec::new("Mode", OptionType::String).default("0644")];
        apply_defaults(&mut options, &specs);
        assert_eq!(options.get_string("Mode").unwrap(), "0600");
    }

    #[test]
    fn apply_defaults_skips_required_option() {
        let mut options = opts(&[]);
        let specs = vec![OptionSpec::new("Mode", OptionType::String)
            .required()
            .default("0644")];
        apply_defaults(&mut options, &specs);
        assert!(options.get_string("Mode").is_err());
    }
}
