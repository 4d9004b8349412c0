//! Process-wide plugin registry.
//!
//! Plugins register themselves once, by lower-cased name, normally from
//! [`crate::actions::builtin::register_all`] during startup. Lookups
//! ([`get`], [`list`]) and action instantiation ([`setup`]) are
//! case-insensitive and safe to call concurrently with each other — only
//! [`register`] needs exclusive access, via a `RwLock`.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use crate::actions::{Action, Plugin};
use crate::error::SystemDeployError;
use crate::logger::Logger;
use crate::task::spec::{self, Validation};
use crate::task::Task;
use crate::unit::Section;

fn registry() -> &'static RwLock<HashMap<String, Plugin>> {
    static REGISTRY: OnceLock<RwLock<HashMap<String, Plugin>>> = OnceLock::new();
    REGISTRY.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Registers `plugin` under its lower-cased name.
///
/// Fails with [`SystemDeployError::PluginExists`] if that name is already
/// taken. There is no way to unregister a plugin; the registry is meant to
/// be populated once, at startup.
pub fn register(plugin: Plugin) -> Result<(), SystemDeployError> {
    let key = plugin.name.to_lowercase();
    let mut guard = registry().write().expect("plugin registry poisoned");
    if guard.contains_key(&key) {
        return Err(SystemDeployError::PluginExists(plugin.name.clone()));
    }
    guard.insert(key, plugin);
    Ok(())
}

/// Returns the declared [`OptionSpec`](crate::task::spec::OptionSpec)s for
/// the named plugin, or `None` if it isn't registered.
pub fn option_specs(name: &str) -> Option<Vec<spec::OptionSpec>> {
    registry()
        .read()
        .expect("plugin registry poisoned")
        .get(&name.to_lowercase())
        .map(|p| p.option_specs.clone())
}

/// Returns every registered plugin name that isn't internal-only, sorted.
pub fn list() -> Vec<String> {
    let mut names: Vec<String> = registry()
        .read()
        .expect("plugin registry poisoned")
        .values()
        .map(|p| p.name.clone())
        .collect();
    names.sort();
    names
}

/// Runs `f` against the named plugin's documentation fields, without
/// cloning the whole [`Plugin`] (its setup function isn't `Clone`).
pub fn describe<T>(name: &str, f: impl FnOnce(&Plugin) -> T) -> Option<T> {
    registry().read().expect("plugin registry poisoned").get(&name.to_lowercase()).map(f)
}

/// Resolves `name`, validates `section` against its option specs (applying
/// defaults first), calls its setup function, and attaches `logger` to the
/// resulting action.
pub fn setup(
    name: &str,
    logger: Arc<dyn Logger>,
    task: &Task,
    section: &Section,
) -> Result<Box<dyn Action>, SystemDeployError> {
    let guard = registry().read().expect("plugin registry poisoned");
    let plugin = guard
        .get(&name.to_lowercase())
        .ok_or_else(|| SystemDeployError::UnknownPlugin(name.to_string()))?;

    let mut options = section.options.clone();
    spec::apply_defaults(&mut options, &plugin.option_specs);
    spec::validate(&options, &Validation::Specs(plugin.option_specs.clone()))?;

    let effective_section = Section {
        name: section.name.clone(),
        options,
    };

    let built = plugin
        .build(task, &effective_section)
        .map_err(|e| SystemDeployError::Action {
            name: name.to_string(),
            source: e,
        })?;

    let mut action = built.ok_or(SystemDeployError::InvalidAction)?;
    action.set_logger(logger);
    Ok(action)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::spec::OptionType;

    struct NoopAction;
    impl Action for NoopAction {
        fn name(&self) -> String {
            "noop".to_string()
        }
    }

    fn sample_plugin(name: &str) -> Plugin {
        Plugin::new(name, |_task, _section| Ok(Some(Box::new(NoopAction) as Box<dyn Action>)))
            .option_specs(vec![spec::OptionSpec::new("Value", OptionType::String)])
    }

    #[test]
    fn register_and_lookup_case_insensitive() {
        register(sample_plugin("TestPluginA")).unwrap();
        assert!(option_specs("testplugina").is_some());
        assert!(option_specs("TESTPLUGINA").is_some());
    }

    #[test]
    fn register_duplicate_fails() {
        register(sample_plugin("TestPluginB")).unwrap();
        let err = register(sample_plugin("testpluginb")).unwrap_err();
        assert!(matches!(err, SystemDeployError::PluginExists(_)));
    }

    #[test]
    fn setup_unknown_plugin_fails() {
        struct NullLogger;
        impl Logger for NullLogger {
            fn progress(&self, _v: f64, _m: &str) {}
            fn info(&self, _m: &str) {}
            fn debug(&self, _m: &str) {}
            fn warn(&self, _m: &str) {}
        }
        let task = Task::new("t.task", "/tmp");
        let section = Section::new("Bogus");
        let err = setup("DoesNotExist", Arc::new(NullLogger), &task, &section).unwrap_err();
        assert!(matches!(err, SystemDeployError::UnknownPlugin(_)));
    }
}
