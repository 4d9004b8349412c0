//! Deploy task model and decoder.
//!
//! A [`Task`] is one `.task` file: a `[Task]` meta section (folded into the
//! struct's own fields via [`meta`]) plus an ordered list of action
//! [`crate::unit::Section`]s. [`decode`]/[`decode_file`] turn unit-file text
//! into a `Task`; drop-in merging ([`crate::dropin`]) and environment
//! substitution ([`crate::env`]) both operate on the result afterwards.

pub mod meta;
pub mod spec;

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::condition::Instance;
use crate::error::SystemDeployError;
use crate::unit::{self, Section};

/// A decoded `.task` file.
#[derive(Debug, Clone, Default)]
pub struct Task {
    /// Base name of the file this task was decoded from.
    pub file_name: String,
    /// Directory containing the task file.
    pub directory: String,
    pub description: String,
    /// Whether the task starts masked (skipped during execution, but still
    /// validated and listed).
    pub start_masked: bool,
    /// Whether the task is permanently disabled. Disabled tasks cannot be
    /// unmasked or executed in any way.
    pub disabled: bool,
    pub environment_files: Vec<String>,
    /// Action sections, in declaration order, with the `[Task]` section
    /// removed.
    pub sections: Vec<Section>,
    /// Environment as loaded from `environment_files` plus process
    /// environment, populated by [`crate::env::load_environment`].
    pub environment: Vec<String>,
    pub conditions: Vec<Instance>,
}

impl Task {
    pub fn new(file_name: impl Into<String>, directory: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            directory: directory.into(),
            ..Default::default()
        }
    }

    /// Full path to the task file.
    pub fn path(&self) -> PathBuf {
        Path::new(&self.directory).join(&self.file_name)
    }
}

/// Decodes a task from an open file.
pub fn decode_file(file_path: impl AsRef<Path>) -> Result<Task, SystemDeployError> {
    let file_path = file_path.as_ref();
    let file = fs::File::open(file_path)
        .map_err(|e| SystemDeployError::io(format!("opening {}", file_path.display()), e))?;
    decode(file_path, file)
}

/// Decodes a task from `reader`, using `file_path`'s basename/directory for
/// [`Task::file_name`]/[`Task::directory`].
///
/// Returns [`SystemDeployError::NoSections`] if the task has no action
/// sections left after removing `[Task]` — callers loading drop-ins treat
/// that error as non-fatal, since a drop-in's base task may consist only of
/// a `[Task]` section.
pub fn decode(file_path: impl AsRef<Path>, mut reader: impl Read) -> Result<Task, SystemDeployError> {
    let file_path = file_path.as_ref();
    let mut buf = Vec::new();
    reader
        .read_to_end(&mut buf)
        .map_err(|e| SystemDeployError::io(format!("reading {}", file_path.display()), e))?;

    let mut sections = unit::parse(buf.as_slice())?;

    let file_name = file_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let directory = file_path
        .parent()
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_default();

    let mut task = Task::new(file_name, directory);

    if let Some(idx) = sections.iter().position(|s| s.name.eq_ignore_ascii_case("task")) {
        let meta_section = sections.remove(idx);
        meta::registry()
            .decode(&meta_section.options, &mut task)
            .map_err(|e| SystemDeployError::InvalidTaskSection(e.to_string()))?;
    }

    task.sections = sections;

    if task.sections.is_empty() {
        return Err(SystemDeployError::NoSections);
    }

    Ok(task)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_meta_and_action_sections() {
        let input = "[Task]\nDescription = hello\nStartMasked = yes\n\n[Copy]\nSource = /a\nDestination = /b\n";
        let task = decode("demo.task", input.as_bytes()).unwrap();
        assert_eq!(task.description, "hello");
        assert!(task.start_masked);
        assert_eq!(task.sections.len(), 1);
        assert_eq!(task.sections[0].name, "Copy");
    }

    #[test]
    fn task_without_meta_section_keeps_all_sections() {
        let input = "[Copy]\nSource = /a\nDestination = /b\n";
        let task = decode("demo.task", input.as_bytes()).unwrap();
        assert_eq!(task.sections.len(), 1);
        assert!(task.description.is_empty());
    }

    #[test]
    fn task_with_only_meta_section_errors_no_sections() {
        let input = "[Task]\nDescription = hello\n";
        let err = decode("demo.task", input.as_bytes()).unwrap_err();
        assert!(matches!(err, SystemDeployError::NoSections));
    }

    #[test]
    fn invalid_meta_option_is_rejected() {
        let input = "[Task]\nBogus = yes\n\n[Copy]\nSource = /a\n";
        let err = decode("demo.task", input.as_bytes()).unwrap_err();
        assert!(matches!(err, SystemDeployError::InvalidTaskSection(_)));
    }
}
