//! Environment file loading and `${VAR}` substitution.
//!
//! Tasks may list one or more environment files in their `[Task]` section's
//! `Environment=` option ([`crate::task::meta`]); [`load_environment`] reads
//! them in order (later files override earlier ones) into a flat
//! `NAME=VALUE` list, and [`apply_environment`] substitutes `${VAR}`
//! references into every non-meta section's option values. The `[Task]`
//! meta section itself is never substituted.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use regex::Regex;

use crate::error::SystemDeployError;
use crate::task::Task;

/// Parses one environment file's contents into `env`, honoring `#`/`//`
/// line comments, `/* ... */` block comments, an optional leading `export`,
/// `NAME=VALUE`/`NAME:VALUE` assignment, quoted values, and `${VAR}`
/// substitution against variables already known (either defined earlier in
/// this file, in an earlier file, or in the process environment).
fn parse_env_file(contents: &str, env: &mut HashMap<String, String>) -> Result<(), SystemDeployError> {
    let stripped = strip_block_comments(contents);

    for raw_line in stripped.lines() {
        let line = strip_line_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }

        let line = line.strip_prefix("export ").map(str::trim_start).unwrap_or(line);

        let sep = line
            .find(['=', ':'])
            .ok_or_else(|| SystemDeployError::Validation(format!("malformed environment line: {:?}", raw_line)))?;
        let name = line[..sep].trim();
        let value = line[sep + 1..].trim();

        if name.is_empty() {
            return Err(SystemDeployError::Validation(format!(
                "malformed environment line: {:?}",
                raw_line
            )));
        }

        let value = unquote(value);
        let value = substitute(&value, env)?;
        env.insert(name.to_string(), value);
    }

    Ok(())
}

fn strip_block_comments(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if c == '/' && input[i..].starts_with("/*") {
            if let Some(end) = input[i + 2..].find("*/") {
                for _ in 0..(end + 2) {
                    chars.next();
                }
                continue;
            }
        }
        out.push(c);
    }
    out
}

fn strip_line_comment(line: &str) -> &str {
    if let Some(idx) = line.find("//") {
        return &line[..idx];
    }
    if let Some(idx) = line.find('#') {
        return &line[..idx];
    }
    line
}

fn unquote(value: &str) -> String {
    let bytes = value.as_bytes();
    if bytes.len() >= 2 {
        let first = bytes[0];
        let last = bytes[bytes.len() - 1];
        if (first == b'"' || first == b'\'') && first == last {
            return value[1..value.len() - 1].to_string();
        }
    }
    value.to_string()
}

fn var_regex() -> &'static Regex {
    use std::sync::OnceLock;
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(:?-([^}]*))?\}|\$([A-Za-z_][A-Za-z0-9_]*)").unwrap()
    })
}

/// Substitutes `${VAR}`, `${VAR:-default}`/`${VAR-default}`, and bare `$VAR`
/// references in `value` using `env`. A reference with no default to an
/// unset variable is an error (mirroring `NoUnset=true`); empty-but-set
/// values are never treated as absent (mirroring `NoEmpty=false`).
pub fn substitute(value: &str, env: &HashMap<String, String>) -> Result<String, SystemDeployError> {
    let re = var_regex();
    let mut out = String::with_capacity(value.len());
    let mut last = 0;

    for caps in re.captures_iter(value) {
        let whole = caps.get(0).unwrap();
        out.push_str(&value[last..whole.start()]);
        last = whole.end();

        let name = caps
            .get(1)
            .or_else(|| caps.get(4))
            .map(|m| m.as_str())
            .unwrap();
        let default = caps.get(3).map(|m| m.as_str());

        match env.get(name) {
            Some(v) => out.push_str(v),
            None => match default {
                Some(d) => out.push_str(d),
                None => {
                    return Err(SystemDeployError::Validation(format!(
                        "{}: variable not set",
                        name
                    )))
                }
            },
        }
    }
    out.push_str(&value[last..]);
    Ok(out)
}

/// Loads every file in `task.environment_files`, in order, and populates
/// `task.environment` as a flat `NAME=VALUE` list.
pub fn load_environment(task: &mut Task) -> Result<(), SystemDeployError> {
    let mut env = HashMap::new();

    for file in &task.environment_files {
        let contents = fs::read_to_string(Path::new(file))
            .map_err(|e| SystemDeployError::io(format!("reading environment file {}", file), e))?;
        parse_env_file(&contents, &mut env)?;
    }

    task.environment = env.into_iter().map(|(k, v)| format!("{}={}", k, v)).collect();
    Ok(())
}

/// Applies `${VAR}` substitution (from `task.environment`) to every option
/// value in every non-meta section. Loads the environment first if it
/// hasn't been loaded yet (`task.environment` is empty but
/// `environment_files` is not).
pub fn apply_environment(task: &mut Task) -> Result<(), SystemDeployError> {
    if task.environment.is_empty() && !task.environment_files.is_empty() {
        load_environment(task)?;
    }

    let env: HashMap<String, String> = task
        .environment
        .iter()
        .filter_map(|kv| kv.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    for section in &mut task.sections {
        for opt in section.options.0.iter_mut() {
            opt.value = substitute(&opt.value, &env)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_assignments() {
        let mut env = HashMap::new();
        parse_env_file("FOO=bar\nexport BAZ=qux\n", &mut env).unwrap();
        assert_eq!(env.get("FOO").unwrap(), "bar");
        assert_eq!(env.get("BAZ").unwrap(), "qux");
    }

    #[test]
    fn strips_comments() {
        let mut env = HashMap::new();
        parse_env_file("# a comment\nFOO=bar # trailing\n", &mut env).unwrap();
        assert_eq!(env.get("FOO").unwrap(), "bar");
    }

    #[test]
    fn unquotes_values() {
        let mut env = HashMap::new();
        parse_env_file("FOO=\"hello world\"\n", &mut env).unwrap();
        assert_eq!(env.get("FOO").unwrap(), "hello world");
    }

    #[test]
    fn substitutes_from_earlier_assignments() {
        let mut env = HashMap::new();
        parse_env_file("FOO=bar\nBAZ=${FOO}/qux\n", &mut env).unwrap();
        assert_eq!(env.get("BAZ").unwrap(), "bar/qux");
    }

    #[test]
    fn unset_variable_without_default_errors() {
        let env = HashMap::new();
        assert!(substitute("${MISSING}", &env).is_err());
    }

    #[test]
    fn unset_variable_with_default_uses_default() {
        let env = HashMap::new();
        assert_eq!(substitute("${MISSING:-fallback}", &env).unwrap(), "fallback");
    }

    #[test]
    fn bare_dollar_variable_is_substituted() {
        let mut env = HashMap::new();
        env.insert("FOO".to_string(), "bar".to_string());
        assert_eq!(substitute("$FOO/baz", &env).unwrap(), "bar/baz");
    }
}
