//! `[EditFile]` — applies one or more `sed`-like substitutions to an
//! existing file in place.
//!
//! Ported from the upstream Go implementation's `EditFile` action, which
//! wraps `github.com/rwtodd/Go.Sed`. This crate has no equivalent sed
//! dependency in its stack, so `Sed=` only supports the single most common
//! form, `s/pattern/replacement/flags` (delimiter fixed to `/`, `pattern` a
//! `regex` crate expression, `flags` an optional `g` for "replace every
//! match" instead of just the first per line) — documented as a narrowing
//! from the original's full sed grammar in DESIGN.md.

use std::fs;
use std::sync::Arc;

use regex::Regex;

use crate::actions::{Action, Plugin};
use crate::error::SystemDeployError;
use crate::graph::{Context, ExecGraph};
use crate::logger::Logger;
use crate::task::spec::{OptionSpec, OptionType};
use crate::task::Task;
use crate::unit::Section;
use crate::util::atomic_file;

pub fn register() {
    crate::actions::registry::register(
        Plugin::new("EditFile", setup)
            .description("Manipulate existing files using sed-like substitutions")
            .author("system-deploy contributors")
            .website("https://github.com/ppacher/system-deploy")
            .example(
                "[Task]\nDescription=Permit root login via SSH\n\n[EditFile]\n\
                 File=/etc/ssh/sshd_config\nSed=s/#PermitRootLogin no/PermitRootLogin yes/g\n",
            )
            .option_specs(vec![
                OptionSpec::new("File", OptionType::String)
                    .required()
                    .description("Path to the file to modify."),
                OptionSpec::new("Sed", OptionType::StringSlice)
                    .description("A substitution in s/pattern/replacement/flags form. May be specified multiple times."),
                OptionSpec::new("IgnoreMissing", OptionType::Bool)
                    .default("no")
                    .description("If set, do nothing when File= does not exist instead of failing."),
            ]),
    )
    .expect("EditFile plugin registered twice");
}

struct Substitution {
    pattern: Regex,
    replacement: String,
    global: bool,
}

fn parse_substitution(raw: &str) -> anyhow::Result<Substitution> {
    let rest = raw
        .strip_prefix("s/")
        .ok_or_else(|| anyhow::anyhow!("unsupported Sed= expression {raw:?}: expected s/pattern/replacement/flags"))?;

    let mut parts = rest.splitn(2, '/');
    let pattern_src = parts.next().unwrap_or_default();
    let remainder = parts
        .next()
        .ok_or_else(|| anyhow::anyhow!("malformed Sed= expression {raw:?}: missing closing delimiter"))?;

    let (replacement, flags) = match remainder.rsplit_once('/') {
        Some((repl, flags)) => (repl, flags),
        None => (remainder, ""),
    };

    let pattern = Regex::new(pattern_src).map_err(|e| anyhow::anyhow!("invalid Sed= pattern {pattern_src:?}: {e}"))?;

    Ok(Substitution {
        pattern,
        replacement: replacement.to_string(),
        global: flags.contains('g'),
    })
}

struct EditFileAction {
    path: String,
    substitutions: Vec<Substitution>,
    ignore_missing: bool,
    skip: bool,
    #[cfg_attr(not(unix), allow(dead_code))]
    mode: Option<u32>,
    logger: Option<Arc<dyn Logger>>,
}

fn setup(_task: &Task, section: &Section) -> anyhow::Result<Option<Box<dyn Action>>> {
    let path = section.get_string("File")?;
    let ignore_missing = section.get_bool_default("IgnoreMissing", false);

    let substitutions = section
        .get_string_slice("Sed")
        .iter()
        .map(|s| parse_substitution(s))
        .collect::<anyhow::Result<Vec<_>>>()?;

    Ok(Some(Box::new(EditFileAction {
        path,
        substitutions,
        ignore_missing,
        skip: false,
        mode: None,
        logger: None,
    })))
}

impl Action for EditFileAction {
    fn name(&self) -> String {
        format!("EditFile {}", self.path)
    }

    fn set_logger(&mut self, logger: Arc<dyn Logger>) {
        self.logger = Some(logger);
    }

    fn supports_prepare(&self) -> bool {
        true
    }

    fn prepare(&mut self, _graph: &mut dyn ExecGraph) -> Result<(), SystemDeployError> {
        match fs::metadata(&self.path) {
            Ok(_meta) => {
                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    self.mode = Some(_meta.permissions().mode() & 0o7777);
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && self.ignore_missing => {
                self.skip = true;
            }
            Err(e) => return Err(SystemDeployError::io(format!("reading {}", self.path), e)),
        }
        Ok(())
    }

    fn supports_execute(&self) -> bool {
        true
    }

    fn execute(&mut self, _ctx: &Context) -> Result<bool, SystemDeployError> {
        if self.skip {
            return Ok(false);
        }

        let contents =
            fs::read_to_string(&self.path).map_err(|e| SystemDeployError::io(format!("reading {}", self.path), e))?;

        let mut edited = contents.clone();
        for sub in &self.substitutions {
            edited = edited
                .lines()
                .map(|line| {
                    if sub.global {
                        sub.pattern.replace_all(line, sub.replacement.as_str()).into_owned()
                    } else {
                        sub.pattern.replace(line, sub.replacement.as_str()).into_owned()
                    }
                })
                .collect::<Vec<_>>()
                .join("\n");
        }
        if contents.ends_with('\n') {
            edited.push('\n');
        }

        let changed = atomic_file::write_if_changed(std::path::Path::new(&self.path), edited.as_bytes(), self.mode)?;
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn section(pairs: &[(&str, &str)]) -> Section {
        let mut s = Section::new("EditFile");
        for (k, v) in pairs {
            s.options.push(*k, *v);
        }
        s
    }

    #[test]
    fn substitutes_matching_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sshd_config");
        fs::write(&path, "#PermitRootLogin no\nOther line\n").unwrap();

        let task = Task::new("t.task", dir.path().to_string_lossy().to_string());
        let sec = section(&[
            ("File", path.to_str().unwrap()),
            ("Sed", "s/#PermitRootLogin no/PermitRootLogin yes/g"),
        ]);

        let mut action = setup(&task, &sec).unwrap().unwrap();
        action.prepare(&mut crate::graph::Graph::new()).unwrap();
        let changed = action.execute(&Context::new()).unwrap();
        assert!(changed);
        assert_eq!(fs::read_to_string(&path).unwrap(), "PermitRootLogin yes\nOther line\n");
    }

    #[test]
    fn no_match_reports_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file.txt");
        fs::write(&path, "nothing to see here\n").unwrap();

        let task = Task::new("t.task", dir.path().to_string_lossy().to_string());
        let sec = section(&[("File", path.to_str().unwrap()), ("Sed", "s/absent/replacement/g")]);

        let mut action = setup(&task, &sec).unwrap().unwrap();
        action.prepare(&mut crate::graph::Graph::new()).unwrap();
        let changed = action.execute(&Context::new()).unwrap();
        assert!(!changed);
    }

    #[test]
    fn missing_file_with_ignore_skips() {
        let task = Task::new("t.task", "/tmp");
        let sec = section(&[("File", "/definitely/missing/file"), ("IgnoreMissing", "yes")]);

        let mut action = setup(&task, &sec).unwrap().unwrap();
        action.prepare(&mut crate::graph::Graph::new()).unwrap();
        let changed = action.execute(&Context::new()).unwrap();
        assert!(!changed);
    }

    #[test]
    fn missing_file_without_ignore_fails_prepare() {
        let task = Task::new("t.task", "/tmp");
        let sec = section(&[("File", "/definitely/missing/file")]);

        let mut action = setup(&task, &sec).unwrap().unwrap();
        assert!(action.prepare(&mut crate::graph::Graph::new()).is_err());
    }

    #[test]
    fn rejects_unsupported_sed_syntax() {
        let task = Task::new("t.task", "/tmp");
        let sec = section(&[("File", "/tmp/whatever"), ("Sed", "y/abc/def/")]);
        assert!(setup(&task, &sec).is_err());
    }
}
