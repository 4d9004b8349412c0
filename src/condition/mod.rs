//! Built-in task conditions (`Condition<Name>=`/`Assert<Name>=`).
//!
//! A [`Condition`] is a named boolean predicate over a string value. A task
//! attaches zero or more [`Instance`]s to itself (one per `Condition*=` or
//! `Assert*=` option it sets); [`Instance::run`] evaluates every attached
//! value and fails on the first mismatch. Non-assertion failures disable
//! the task; assertion failures abort the whole deploy — see
//! [`crate::runner`] for how the two are told apart.

use std::fmt;
use std::sync::Arc;

use anyhow::{Context, Result};

/// A named boolean predicate, e.g. `OperatingSystem` or `FileExists`.
#[derive(Clone)]
pub struct Condition {
    pub name: String,
    pub description: String,
    check: Arc<dyn Fn(&str) -> Result<bool> + Send + Sync>,
}

impl Condition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        check: impl Fn(&str) -> Result<bool> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            check: Arc::new(check),
        }
    }
}

impl fmt::Debug for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Condition").field("name", &self.name).finish()
    }
}

/// A condition bound to the values a task specified for it.
#[derive(Debug, Clone)]
pub struct Instance {
    pub condition: Arc<Condition>,
    /// `true` for `Assert<Name>=`, `false` for `Condition<Name>=`.
    pub assertion: bool,
    pub values: Vec<String>,
}

impl Instance {
    /// Evaluates every value against the condition, ANDing the results.
    ///
    /// A leading `!` negates the check for that value; a leading `\!` is
    /// a literal (unescaped) `!` in the value itself. Evaluation stops at
    /// the first value that doesn't match.
    pub fn run(&self) -> Result<()> {
        for raw in &self.values {
            let (negate, value) = split_negation(raw);
            let result = (self.condition.check)(&value)
                .with_context(|| format!("condition {} failed for {:?}", self.condition.name, raw))?;
            let matched = result != negate;
            if !matched {
                anyhow::bail!("{:?} did not match", raw);
            }
        }
        Ok(())
    }
}

fn split_negation(raw: &str) -> (bool, String) {
    if let Some(rest) = raw.strip_prefix("\\!") {
        (false, format!("!{}", rest))
    } else if let Some(rest) = raw.strip_prefix('!') {
        (true, rest.to_string())
    } else {
        (false, raw.to_string())
    }
}

fn has_package_manager(name: &str) -> bool {
    which::which(name).is_ok()
}

/// Returns the set of built-in conditions.
///
/// The first five (`OperatingSystem`, `Architecture`, `PackageManager`,
/// `FileExists`, `DirectoryExists`) mirror the upstream condition package.
/// `UserExists`/`GroupExists` are additions: neither appears in the
/// original's built-in list, but both follow the same existence-check
/// shape and round out account-aware deploy tasks.
pub fn builtin() -> Vec<Condition> {
    vec![
        Condition::new(
            "OperatingSystem",
            "Match against the operating system (e.g. linux, macos, windows).",
            |value| Ok(std::env::consts::OS.eq_ignore_ascii_case(value)),
        ),
        Condition::new(
            "Architecture",
            "Match against the CPU architecture system-deploy was compiled for.",
            |value| Ok(std::env::consts::ARCH.eq_ignore_ascii_case(value)),
        ),
        Condition::new(
            "PackageManager",
            "Match against the installed package managers.",
            |value| Ok(has_package_manager(value)),
        ),
        Condition::new("FileExists", "Test for the existence of a file.", |path| {
            match std::fs::metadata(path) {
                Ok(meta) => Ok(meta.is_file()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
                Err(e) => Err(e.into()),
            }
        }),
        Condition::new(
            "DirectoryExists",
            "Test for the existence of a directory.",
            |path| match std::fs::metadata(path) {
                Ok(meta) => Ok(meta.is_dir()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
                Err(e) => Err(e.into()),
            },
        ),
        Condition::new("UserExists", "Test for the existence of a user account.", |name| {
            if let Ok(uid) = name.parse::<u32>() {
                return Ok(nix::unistd::User::from_uid(nix::unistd::Uid::from_raw(uid))?.is_some());
            }
            Ok(nix::unistd::User::from_name(name)?.is_some())
        }),
        Condition::new("GroupExists", "Test for the existence of a group.", |name| {
            if let Ok(gid) = name.parse::<u32>() {
                return Ok(nix::unistd::Group::from_gid(nix::unistd::Gid::from_raw(gid))?.is_some());
            }
            Ok(nix::unistd::Group::from_name(name)?.is_some())
        }),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negation_splitting() {
        assert_eq!(split_negation("linux"), (false, "linux".to_string()));
        assert_eq!(split_negation("!linux"), (true, "linux".to_string()));
        assert_eq!(split_negation("\\!linux"), (false, "!linux".to_string()));
    }

    #[test]
    fn file_exists_condition_matches() {
        let conds = builtin();
        let file_exists = conds.iter().find(|c| c.name == "FileExists").unwrap();
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let path = tmp.path().to_str().unwrap().to_string();
        let instance = Instance {
            condition: Arc::new(file_exists.clone()),
            assertion: false,
            values: vec![path],
        };
        assert!(instance.run().is_ok());
    }

    #[test]
    fn negated_condition_can_fail() {
        let conds = builtin();
        let file_exists = conds.iter().find(|c| c.name == "FileExists").unwrap();
        let instance = Instance {
            condition: Arc::new(file_exists.clone()),
            assertion: false,
            values: vec!["!/definitely/does/not/exist".to_string()],
        };
        assert!(instance.run().is_ok());
    }

    #[test]
    fn operating_system_condition() {
        let conds = builtin();
        let os_cond = conds.iter().find(|c| c.name == "OperatingSystem").unwrap();
        let instance = Instance {
            condition: Arc::new(os_cond.clone()),
            assertion: false,
            values: vec![std::env::consts::OS.to_string()],
        };
        assert!(instance.run().is_ok());
    }
}
