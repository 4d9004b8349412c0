//! The action contract and plugin registry.
//!
//! An [`Action`] is one configured instance of a named [`Plugin`], bound to
//! the task it belongs to. Rather than model `Preparer`/`Executor` as
//! separate traits an action opts into (which would need trait-object
//! downcasting to probe for), this crate gives `Action` default no-op
//! bodies for `prepare`/`execute` plus `supports_prepare`/`supports_execute`
//! flags: an action overrides exactly the methods (and flags) its
//! capability set requires. [`registry`] holds the process-wide,
//! lower-cased-name-keyed table of registered plugins.

pub mod builtin;
pub mod registry;

use std::sync::Arc;

use crate::error::SystemDeployError;
use crate::graph::{Context, ExecGraph};
use crate::logger::Logger;
use crate::task::spec::OptionSpec;
use crate::task::Task;

/// One configured instance of a plugin, bound to its owning task.
///
/// `prepare`/`execute` default to no-ops that report no support; an action
/// implementing either overrides both the method and its `supports_*` flag.
pub trait Action: Send + Sync {
    /// A human-readable label, normally the plugin name.
    fn name(&self) -> String;

    /// Invoked once, right after the plugin's setup function constructs
    /// this action.
    fn set_logger(&mut self, _logger: Arc<dyn Logger>) {}

    /// Invoked once, after `set_logger` and before `prepare`.
    fn set_task(&mut self, _task: Arc<Task>) {}

    fn supports_prepare(&self) -> bool {
        false
    }

    fn prepare(&mut self, _graph: &mut dyn ExecGraph) -> Result<(), SystemDeployError> {
        Ok(())
    }

    fn supports_execute(&self) -> bool {
        false
    }

    fn execute(&mut self, _ctx: &Context) -> Result<bool, SystemDeployError> {
        Ok(false)
    }
}

/// A documentation section shown by `describe` (a heading plus body text).
#[derive(Debug, Clone)]
pub struct HelpSection {
    pub title: String,
    pub body: String,
}

impl HelpSection {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
        }
    }
}

/// A plugin's setup function: builds an [`Action`] instance from the task it
/// belongs to and the configured section, or `Ok(None)` for the
/// [`SystemDeployError::InvalidAction`] case.
pub type SetupFn =
    dyn Fn(&Task, &crate::unit::Section) -> anyhow::Result<Option<Box<dyn Action>>> + Send + Sync + 'static;

/// A registered action type: its documentation, declared options, and the
/// function that builds one [`Action`] instance per configured section.
pub struct Plugin {
    pub name: String,
    pub description: String,
    pub help_sections: Vec<HelpSection>,
    pub example: String,
    pub author: String,
    pub website: String,
    pub option_specs: Vec<OptionSpec>,
    setup_fn: Arc<SetupFn>,
}

impl Plugin {
    pub fn new(
        name: impl Into<String>,
        setup_fn: impl Fn(&Task, &crate::unit::Section) -> anyhow::Result<Option<Box<dyn Action>>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            help_sections: Vec::new(),
            example: String::new(),
            author: String::new(),
            website: String::new(),
            option_specs: Vec::new(),
            setup_fn: Arc::new(setup_fn),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn help_section(mut self, section: HelpSection) -> Self {
        self.help_sections.push(section);
        self
    }

    pub fn example(mut self, example: impl Into<String>) -> Self {
        self.example = example.into();
        self
    }

    pub fn author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    pub fn website(mut self, website: impl Into<String>) -> Self {
        self.website = website.into();
        self
    }

    pub fn option_specs(mut self, specs: Vec<OptionSpec>) -> Self {
        self.option_specs = specs;
        self
    }

    pub(crate) fn build(&self, task: &Task, section: &crate::unit::Section) -> anyhow::Result<Option<Box<dyn Action>>> {
        (self.setup_fn)(task, section)
    }
}
