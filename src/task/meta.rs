//! The `[Task]` meta-section option registry.
//!
//! Every option a task may set in its `[Task]` section — the built-ins
//! (`Description=`, `StartMasked=`, ...) as well as the `Condition<Name>=`/
//! `Assert<Name>=` pairs generated per registered [`crate::condition::Condition`]
//! — is represented uniformly as a [`MetaOption`]: an [`OptionSpec`] plus a
//! `set`/`get` pair of closures that read or write the corresponding [`Task`]
//! field. [`decode_meta_data`] walks this registry once per decoded `[Task]`
//! section, so adding a condition only requires registering it, not touching
//! the decoder.

use std::sync::{Arc, OnceLock};

use crate::condition::{self, Condition, Instance};
use crate::error::SystemDeployError;
use crate::task::spec::{validate, OptionSpec, OptionType, Validation};
use crate::task::Task;
use crate::unit::Options;

/// One entry in the `[Task]` meta option registry.
pub struct MetaOption {
    pub spec: OptionSpec,
    set: Box<dyn Fn(Option<&Options>, &mut Task) -> Result<(), SystemDeployError> + Send + Sync>,
    get: Box<dyn Fn(&Task) -> Vec<String> + Send + Sync>,
}

impl MetaOption {
    /// Applies this option to `task`. `options` is `None` when the section
    /// doesn't set this option at all (used to reset drop-in-cleared values).
    pub fn apply(&self, options: Option<&Options>, task: &mut Task) -> Result<(), SystemDeployError> {
        (self.set)(options, task)
    }

    pub fn values(&self, task: &Task) -> Vec<String> {
        (self.get)(task)
    }
}

/// The full set of options accepted in a `[Task]` section: the built-ins plus
/// one `Condition`/`Assert` pair per registered condition.
pub struct MetaRegistry {
    options: Vec<MetaOption>,
}

impl MetaRegistry {
    fn new() -> Self {
        let mut options = builtin_options();
        for cond in condition::builtin() {
            options.extend(condition_options(cond));
        }
        Self { options }
    }

    pub fn options(&self) -> &[MetaOption] {
        &self.options
    }

    /// Returns the [`OptionSpec`]s accepted in a `[Task]` section, for
    /// `describe` output and validation.
    pub fn specs(&self) -> Vec<OptionSpec> {
        self.options.iter().map(|o| o.spec.clone()).collect()
    }

    /// Applies every registered meta option found in `section` to `task`,
    /// then validates the section against the registry's specs.
    pub fn decode(&self, section_options: &Options, task: &mut Task) -> Result<(), SystemDeployError> {
        for opt in &self.options {
            let present = section_options.get_string_slice(&opt.spec.name);
            let present = if present.is_empty() {
                opt.spec
                    .aliases
                    .iter()
                    .find_map(|a| {
                        let v = section_options.get_string_slice(a);
                        if v.is_empty() {
                            None
                        } else {
                            Some(v)
                        }
                    })
            } else {
                Some(present)
            };

            if present.is_some() {
                opt.apply(Some(section_options), task)?;
            }
        }

        validate(section_options, &Validation::Specs(self.specs()))
    }
}

static REGISTRY: OnceLock<MetaRegistry> = OnceLock::new();

/// Returns the process-wide `[Task]` meta option registry, built once on
/// first use from the built-in options and conditions.
pub fn registry() -> &'static MetaRegistry {
    REGISTRY.get_or_init(MetaRegistry::new)
}

fn builtin_options() -> Vec<MetaOption> {
    vec![
        MetaOption {
            spec: OptionSpec::new("Description", OptionType::String)
                .description("Defines a human readable description of the task's purpose"),
            set: Box::new(|options, task| {
                task.description = match options {
                    Some(o) => o.get_string("Description").unwrap_or_default(),
                    None => String::new(),
                };
                Ok(())
            }),
            get: Box::new(|task| {
                if task.description.is_empty() {
                    Vec::new()
                } else {
                    vec![task.description.clone()]
                }
            }),
        },
        MetaOption {
            spec: OptionSpec::new("StartMasked", OptionType::Bool)
                .description("Set to true if the task should be masked from execution")
                .default("no"),
            set: Box::new(|options, task| {
                task.start_masked = match options {
                    Some(o) => o.get_bool("StartMasked").unwrap_or(false),
                    None => false,
                };
                Ok(())
            }),
            get: Box::new(|task| {
                if task.start_masked {
                    vec!["yes".to_string()]
                } else {
                    Vec::new()
                }
            }),
        },
        MetaOption {
            spec: OptionSpec::new("Disabled", OptionType::Bool)
                .description("Set to true if the task should be disabled. A disabled task cannot be executed in any way")
                .default("no"),
            set: Box::new(|options, task| {
                task.disabled = match options {
                    Some(o) => o.get_bool("Disabled").unwrap_or(false),
                    None => false,
                };
                Ok(())
            }),
            get: Box::new(|task| {
                if task.disabled {
                    vec!["yes".to_string()]
                } else {
                    Vec::new()
                }
            }),
        },
        MetaOption {
            spec: OptionSpec::new("Environment", OptionType::StringSlice).description(
                "Configure one or more environment files that are loaded into the task and \
                 may be used during substitution. Environment files are loaded in the order \
                 they are specified and later ones overwrite already existing values.",
            ),
            set: Box::new(|options, task| {
                task.environment_files = match options {
                    Some(o) => o.get_string_slice("Environment"),
                    None => Vec::new(),
                };
                Ok(())
            }),
            get: Box::new(|task| task.environment_files.clone()),
        },
    ]
}

/// Builds the `Condition<Name>=`/`Assert<Name>=` option pair for one
/// condition. `Condition<Name>=` accepts `Assert<Name>=` as an alias so
/// either spelling validates; `set` still distinguishes them by which name
/// was actually present, recording the distinction as [`Instance::assertion`].
fn condition_options(cond: Condition) -> Vec<MetaOption> {
    let cond = Arc::new(cond);
    let cond_name = format!("Condition{}", cond.name);
    let assert_name = format!("Assert{}", cond.name);

    let set_for = {
        let cond = cond.clone();
        let cond_name = cond_name.clone();
        let assert_name = assert_name.clone();
        move |assertion: bool| {
            let cond = cond.clone();
            let option_name = if assertion { assert_name.clone() } else { cond_name.clone() };
            let cond_name_for_filter = cond.name.clone();
            move |options: Option<&Options>, task: &mut Task| -> Result<(), SystemDeployError> {
                task.conditions
                    .retain(|i| !(i.condition.name == cond_name_for_filter && i.assertion == assertion));

                let Some(options) = options else { return Ok(()) };
                let values = options.get_string_slice(&option_name);
                if values.is_empty() {
                    return Ok(());
                }

                task.conditions.push(Instance {
                    condition: cond.clone(),
                    assertion,
                    values,
                });
                Ok(())
            }
        }
    };

    let get_for = {
        let cond_name_for_get = cond.name.clone();
        move |assertion: bool| {
            let cond_name_for_get = cond_name_for_get.clone();
            move |task: &Task| -> Vec<String> {
                task.conditions
                    .iter()
                    .find(|i| i.condition.name == cond_name_for_get && i.assertion == assertion)
                    .map(|i| i.values.clone())
                    .unwrap_or_default()
            }
        }
    };

    vec![
        MetaOption {
            spec: OptionSpec::new(cond_name, OptionType::StringSlice)
                .description(cond.description.clone())
                .alias(assert_name.clone()),
            set: Box::new(set_for(false)),
            get: Box::new(get_for(false)),
        },
        MetaOption {
            spec: OptionSpec::new(assert_name, OptionType::StringSlice).internal(),
            set: Box::new(set_for(true)),
            get: Box::new(get_for(true)),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::Options;

    fn task() -> Task {
        Task::new("test.task", "/etc/system-deploy")
    }

    #[test]
    fn builtin_description_round_trips() {
        let reg = registry();
        let mut t = task();
        let mut opts = Options::new();
        opts.push("Description", "hello");
        reg.decode(&opts, &mut t).unwrap();
        assert_eq!(t.description, "hello");
    }

    #[test]
    fn builtin_start_masked_defaults_false() {
        let reg = registry();
        let t = task();
        assert!(!t.start_masked);
        let _ = reg;
    }

    #[test]
    fn condition_option_populates_instance() {
        let reg = registry();
        let mut t = task();
        let mut opts = Options::new();
        opts.push("ConditionFileExists", "/etc/hostname");
        reg.decode(&opts, &mut t).unwrap();
        assert_eq!(t.conditions.len(), 1);
        assert_eq!(t.conditions[0].condition.name, "FileExists");
        assert!(!t.conditions[0].assertion);
    }

    #[test]
    fn assert_condition_option_marks_assertion() {
        let reg = registry();
        let mut t = task();
        let mut opts = Options::new();
        opts.push("AssertFileExists", "/etc/hostname");
        reg.decode(&opts, &mut t).unwrap();
        assert_eq!(t.conditions.len(), 1);
        assert!(t.conditions[0].assertion);
    }

    #[test]
    fn unknown_option_in_task_section_fails_validation() {
        let reg = registry();
        let mut t = task();
        let mut opts = Options::new();
        opts.push("NotARealOption", "x");
        assert!(reg.decode(&opts, &mut t).is_err());
    }
}
