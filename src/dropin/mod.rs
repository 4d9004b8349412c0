//! Drop-in override resolution and merging.
//!
//! A drop-in is a `.conf` file found under one of the `<name>.d/` search
//! directories derived from a task's file name ([`search_paths`]); its
//! sections are merged on top of the base task's matching sections
//! ([`apply_drop_ins`]). Drop-ins may also carry a `[Task]` meta section,
//! which is merged via a synthesize-merge-replay round trip through the
//! task meta option registry ([`crate::task::meta`]).

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::SystemDeployError;
use crate::task::meta;
use crate::task::spec::Validation;
use crate::task::Task;
use crate::unit::{self, Options, Section};

/// Computes the ordered, lowest-priority-first search path for drop-in
/// directories matching `name` under `root`.
///
/// `name` is the task's file name (e.g. `foo-bar-baz.task`). See spec §4.5
/// for the algorithm; `search_paths("foo-bar-baz.task", "/lib")` yields
/// `["/lib/task.d", "/lib/foo-.task.d", "/lib/foo-bar-.task.d",
/// "/lib/foo-bar-baz.task.d"]`.
pub fn search_paths(name: &str, root: &Path) -> Vec<PathBuf> {
    let mut paths = Vec::new();

    let (stem, ext) = match name.rsplit_once('.') {
        Some((stem, ext)) => (stem.to_string(), Some(ext.to_string())),
        None => (name.to_string(), None),
    };

    if let Some(ext) = &ext {
        paths.push(root.join(format!("{}.d", ext)));
    }

    let parts: Vec<&str> = stem.split('-').collect();
    for i in 1..parts.len() {
        let prefix = format!("{}-", parts[..i].join("-"));
        match &ext {
            Some(ext) => paths.push(root.join(format!("{}.{}.d", prefix, ext))),
            None => paths.push(root.join(format!("{}.d", prefix))),
        }
    }

    paths.push(root.join(format!("{}.d", name)));
    paths
}

/// Searches every root in `roots` (priority order, root-first) for `.conf`
/// drop-in files matching `task_file_name`. When the same file name occurs
/// under more than one search directory, the occurrence found later in the
/// combined search order wins (last-write-wins); the final result is sorted
/// by file name to determine application order.
pub fn search_dropin_files(roots: &[PathBuf], task_file_name: &str) -> Vec<PathBuf> {
    let mut by_name: Vec<(String, PathBuf)> = Vec::new();

    for root in roots {
        for dir in search_paths(task_file_name, root) {
            let Ok(entries) = fs::read_dir(&dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                let Ok(file_type) = entry.file_type() else {
                    continue;
                };
                if !file_type.is_file() {
                    continue;
                }
                if path.extension().and_then(|e| e.to_str()) != Some("conf") {
                    continue;
                }
                let Some(name) = path.file_name().map(|n| n.to_string_lossy().to_string()) else {
                    continue;
                };

                if let Some(existing) = by_name.iter_mut().find(|(n, _)| *n == name) {
                    existing.1 = path;
                } else {
                    by_name.push((name, path));
                }
            }
        }
    }

    by_name.sort_by(|a, b| a.0.cmp(&b.0));
    by_name.into_iter().map(|(_, path)| path).collect()
}

/// Tracks, per case-folded section name, whether exactly one base section
/// uses it (mergeable) or more than one does (ambiguous — any drop-in that
/// touches it is rejected).
enum Slot {
    Unique(usize),
    Ambiguous,
}

fn section_slots(sections: &[Section]) -> std::collections::HashMap<String, Slot> {
    let mut slots: std::collections::HashMap<String, Slot> = std::collections::HashMap::new();
    for (idx, section) in sections.iter().enumerate() {
        let key = section.name.to_lowercase();
        slots
            .entry(key)
            .and_modify(|slot| *slot = Slot::Ambiguous)
            .or_insert(Slot::Unique(idx));
    }
    slots
}

/// Resolves the canonical storage name and declared type for `name` against
/// `validation`, following alias chains. Returns `None` for `AllowAny` (no
/// spec to canonicalize against — the name is used as-is) as well as when no
/// matching spec exists.
fn canonical_name(name: &str, validation: &Validation) -> Option<String> {
    match validation {
        Validation::AllowAny => None,
        Validation::Specs(specs) => specs
            .iter()
            .find(|s| s.name.eq_ignore_ascii_case(name) || s.aliases.iter().any(|a| a.eq_ignore_ascii_case(name)))
            .map(|s| s.name.clone()),
    }
}

fn is_slice_name(name: &str, validation: &Validation) -> bool {
    match validation {
        Validation::AllowAny => true,
        Validation::Specs(specs) => specs
            .iter()
            .find(|s| s.name.eq_ignore_ascii_case(name))
            .map(|s| s.r#type.is_slice())
            .unwrap_or(true),
    }
}

/// Merges `overlay`'s options onto `base` in place, per spec §4.5's
/// section-merge rules: a scalar option (or a slice option whose first
/// overlay value is empty) resets all existing values of that name before
/// the remaining overlay values are appended; any other slice option is
/// simply appended to.
fn merge_section(
    base: &mut Section,
    overlay: &Section,
    validation: &Validation,
) -> Result<(), SystemDeployError> {
    let mut seen: Vec<String> = Vec::new();

    for opt in overlay.options.iter() {
        let lower = opt.name.to_lowercase();
        if seen.contains(&lower) {
            continue;
        }
        seen.push(lower.clone());

        let canonical = match canonical_name(&opt.name, validation) {
            Some(name) => name,
            None => match validation {
                Validation::AllowAny => opt.name.clone(),
                Validation::Specs(_) => {
                    return Err(SystemDeployError::OptionNotExists {
                        name: opt.name.clone(),
                    })
                }
            },
        };

        let mut values = overlay.options.get_string_slice(&opt.name);
        let slice = is_slice_name(&canonical, validation);

        let reset = !slice || values.first().map(|v| v.is_empty()).unwrap_or(false);
        if reset {
            base.options.clear(&canonical);
            if slice && !values.is_empty() {
                values.remove(0);
            }
        }

        for value in values {
            base.options.push(canonical.clone(), value);
        }
    }

    Ok(())
}

/// Rebuilds a pseudo `[Task]` section from `task`'s current meta field
/// values, one option occurrence per value returned by each registered
/// [`meta::MetaOption::values`].
fn synthesize_meta_section(task: &Task) -> Options {
    let mut options = Options::new();
    for opt in meta::registry().options() {
        for value in opt.values(task) {
            options.push(opt.spec.name.clone(), value);
        }
    }
    options
}

/// Replays `merged` meta options back onto `task` through the registry, so
/// every field (including ones the merge reset to empty) reflects `merged`
/// exactly rather than any stale prior value.
fn replay_meta(merged: &Options, task: &mut Task) -> Result<(), SystemDeployError> {
    for opt in meta::registry().options() {
        opt.apply(Some(merged), task)?;
    }
    crate::task::spec::validate(merged, &Validation::Specs(meta::registry().specs()))
}

/// Looks up the [`Validation`] to merge a non-meta section's drop-in
/// content against, by section/action name.
pub trait SectionSpecs {
    fn validation_for(&self, section_name: &str) -> Option<Validation>;
}

/// Parses a drop-in file's raw content into sections.
fn parse_dropin(path: &Path) -> Result<Vec<Section>, SystemDeployError> {
    let bytes =
        fs::read(path).map_err(|e| SystemDeployError::io(format!("reading drop-in {}", path.display()), e))?;
    unit::parse(bytes.as_slice())
}

/// Applies every drop-in in `drop_in_paths`, in order, onto a clone of
/// `task`. `specs` resolves each non-meta section name to the [`Validation`]
/// its options should be checked against (normally the matching plugin's
/// option specs); sections with no resolvable validation are treated as
/// [`Validation::AllowAny`].
pub fn apply_drop_ins(
    task: &Task,
    drop_in_paths: &[PathBuf],
    specs: &dyn SectionSpecs,
) -> Result<Task, SystemDeployError> {
    let mut task = task.clone();
    let mut slots = section_slots(&task.sections);

    for path in drop_in_paths {
        let file_display = path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
        let dropin_sections = parse_dropin(path)?;

        for dropin_section in &dropin_sections {
            if dropin_section.name.eq_ignore_ascii_case("task") {
                let synthesized = synthesize_meta_section(&task);
                let mut merged_base = Section::new("Task");
                merged_base.options = synthesized;
                merge_section(
                    &mut merged_base,
                    dropin_section,
                    &Validation::Specs(meta::registry().specs()),
                )?;
                replay_meta(&merged_base.options, &mut task)?;
                continue;
            }

            let key = dropin_section.name.to_lowercase();
            match slots.get(&key) {
                None => {
                    return Err(SystemDeployError::DropInSectionNotExists {
                        file: file_display,
                        section: dropin_section.name.clone(),
                    })
                }
                Some(Slot::Ambiguous) => {
                    return Err(SystemDeployError::DropInSectionNotAllowed {
                        file: file_display,
                        section: dropin_section.name.clone(),
                    })
                }
                Some(Slot::Unique(idx)) => {
                    let idx = *idx;
                    let validation = specs.validation_for(&task.sections[idx].name).unwrap_or(Validation::AllowAny);
                    merge_section(&mut task.sections[idx], dropin_section, &validation)?;
                }
            }
        }

        // Re-derive slots in case the merge above didn't change section
        // identity (it never does — merges are in place — but recomputing
        // keeps this robust if a future change starts inserting sections).
        slots = section_slots(&task.sections);
    }

    Ok(task)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::spec::{OptionSpec, OptionType};

    struct NoSpecs;
    impl SectionSpecs for NoSpecs {
        fn validation_for(&self, _section_name: &str) -> Option<Validation> {
            None
        }
    }

    struct FixedSpecs(Vec<OptionSpec>);
    impl SectionSpecs for FixedSpecs {
        fn validation_for(&self, _section_name: &str) -> Option<Validation> {
            Some(Validation::Specs(self.0.clone()))
        }
    }

    #[test]
    fn search_paths_matches_spec_example() {
        let paths = search_paths("foo-bar-baz.task", Path::new("/lib"));
        assert_eq!(
            paths,
            vec![
                PathBuf::from("/lib/task.d"),
                PathBuf::from("/lib/foo-.task.d"),
                PathBuf::from("/lib/foo-bar-.task.d"),
                PathBuf::from("/lib/foo-bar-baz.task.d"),
            ]
        );
    }

    #[test]
    fn merge_section_resets_slice_on_leading_empty() {
        let mut base = Section::new("Exec");
        base.options.push("Environment", "X=1");
        base.options.push("Environment", "Y=2");

        let mut overlay = Section::new("Exec");
        overlay.options.push("Environment", "");
        overlay.options.push("Environment", "Z=3");

        let specs = Validation::Specs(vec![OptionSpec::new("Environment", OptionType::StringSlice)]);
        merge_section(&mut base, &overlay, &specs).unwrap();

        assert_eq!(base.options.get_string_slice("Environment"), vec!["Z=3"]);
    }

    #[test]
    fn merge_section_appends_when_no_leading_empty() {
        let mut base = Section::new("Exec");
        base.options.push("Environment", "X=1");

        let mut overlay = Section::new("Exec");
        overlay.options.push("Environment", "Y=2");

        let specs = Validation::Specs(vec![OptionSpec::new("Environment", OptionType::StringSlice)]);
        merge_section(&mut base, &overlay, &specs).unwrap();

        assert_eq!(base.options.get_string_slice("Environment"), vec!["X=1", "Y=2"]);
    }

    #[test]
    fn merge_section_replaces_scalar() {
        let mut base = Section::new("Copy");
        base.options.push("Destination", "/old");

        let mut overlay = Section::new("Copy");
        overlay.options.push("Destination", "/new");

        let specs = Validation::Specs(vec![OptionSpec::new("Destination", OptionType::String)]);
        merge_section(&mut base, &overlay, &specs).unwrap();

        assert_eq!(base.options.get_string("Destination").unwrap(), "/new");
    }

    #[test]
    fn apply_drop_ins_rejects_ambiguous_section() {
        let input = "[Task]\nDescription = d\n\n[Exec]\nCommand = a\n\n[Exec]\nCommand = b\n";
        let task = crate::task::decode("t.task", input.as_bytes()).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let dropin_path = dir.path().join("50-extra.conf");
        std::fs::write(&dropin_path, "[Exec]\nCommand = c\n").unwrap();

        let err = apply_drop_ins(&task, &[dropin_path], &NoSpecs).unwrap_err();
        assert!(matches!(err, SystemDeployError::DropInSectionNotAllowed { .. }));
    }

    #[test]
    fn apply_drop_ins_rejects_unknown_section() {
        let input = "[Copy]\nSource = /a\n";
        let task = crate::task::decode("t.task", input.as_bytes()).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let dropin_path = dir.path().join("50-extra.conf");
        std::fs::write(&dropin_path, "[Exec]\nCommand = c\n").unwrap();

        let err = apply_drop_ins(&task, &[dropin_path], &NoSpecs).unwrap_err();
        assert!(matches!(err, SystemDeployError::DropInSectionNotExists { .. }));
    }

    #[test]
    fn apply_drop_ins_merges_matching_section() {
        let input = "[Copy]\nSource = /a\nDestination = /b\n";
        let task = crate::task::decode("t.task", input.as_bytes()).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let dropin_path = dir.path().join("50-extra.conf");
        std::fs::write(&dropin_path, "[Copy]\nDestination = /c\n").unwrap();

        let specs = FixedSpecs(vec![
            OptionSpec::new("Source", OptionType::String),
            OptionSpec::new("Destination", OptionType::String),
        ]);
        let merged = apply_drop_ins(&task, &[dropin_path], &specs).unwrap();
        assert_eq!(merged.sections[0].get_string("Destination").unwrap(), "/c");
        assert_eq!(merged.sections[0].get_string("Source").unwrap(), "/a");
    }

    #[test]
    fn apply_drop_ins_merges_meta_section() {
        let input = "[Task]\nDescription = old\n\n[Copy]\nSource = /a\n";
        let task = crate::task::decode("t.task", input.as_bytes()).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let dropin_path = dir.path().join("50-extra.conf");
        std::fs::write(&dropin_path, "[Task]\nDescription = new\n").unwrap();

        let merged = apply_drop_ins(&task, &[dropin_path], &NoSpecs).unwrap();
        assert_eq!(merged.description, "new");
    }
}
