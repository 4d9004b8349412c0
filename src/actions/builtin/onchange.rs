//! `[OnChange]` — runs a command or unmasks another task once this task's
//! own execute pass reports a change.
//!
//! Ported from the upstream Go implementation's `OnChange` action:
//! `Run=`/`Unmask=` both register an after-hook on the *owning* task (not a
//! named dependency), so they only fire once, right after this task's own
//! `execute` completes. `Run=` failures are logged and swallowed (matching
//! the original's documented "use Unmask for more control" guidance);
//! `Unmask=` failures are logged too, since [`crate::graph::Graph::run_after_hooks`]
//! already treats every after-hook failure as non-fatal.

use std::sync::Arc;

use crate::actions::{Action, Plugin};
use crate::error::SystemDeployError;
use crate::executor::{CommandExecutor, CommandSpec, RealCommandExecutor};
use crate::graph::{Context, ExecGraph, TaskManager};
use crate::logger::Logger;
use crate::task::spec::{OptionSpec, OptionType};
use crate::task::Task;
use crate::unit::Section;
use crate::util::shell;

pub fn register() {
    crate::actions::registry::register(
        Plugin::new("OnChange", setup)
            .description("Run a command or unmask another task once this task changes")
            .author("system-deploy contributors")
            .website("https://github.com/ppacher/system-deploy")
            .option_specs(vec![
                OptionSpec::new("Run", OptionType::StringSlice)
                    .description("Run a command. May be specified multiple times. Errors are only logged."),
                OptionSpec::new("Unmask", OptionType::StringSlice)
                    .description("Unmask a task by name. May be specified multiple times."),
            ]),
    )
    .expect("OnChange plugin registered twice");
}

struct OnChangeAction {
    task_file_name: String,
    run: Vec<String>,
    unmask: Vec<String>,
    logger: Option<Arc<dyn Logger>>,
}

fn setup(task: &Task, section: &Section) -> anyhow::Result<Option<Box<dyn Action>>> {
    Ok(Some(Box::new(OnChangeAction {
        task_file_name: task.file_name.clone(),
        run: section.get_string_slice("Run"),
        unmask: section.get_string_slice("Unmask"),
        logger: None,
    })))
}

impl Action for OnChangeAction {
    fn name(&self) -> String {
        "OnChange".to_string()
    }

    fn set_logger(&mut self, logger: Arc<dyn Logger>) {
        self.logger = Some(logger);
    }

    fn supports_prepare(&self) -> bool {
        true
    }

    fn prepare(&mut self, graph: &mut dyn ExecGraph) -> Result<(), SystemDeployError> {
        for target in &self.unmask {
            if !graph.has_task(target) {
                return Err(SystemDeployError::TaskNotExists(target.clone()));
            }
        }

        for command in self.run.clone() {
            graph.run_after(
                &self.task_file_name,
                Box::new(move |_tm, _ctx, _name, changed, err| {
                    if err.is_some() || !changed {
                        return Ok(());
                    }
                    let args = shell::split(&command)?;
                    let Some((program, rest)) = args.split_first() else {
                        return Ok(());
                    };
                    let spec = CommandSpec::new(program.clone(), rest.iter().cloned().map(Into::into).collect());
                    let executor = RealCommandExecutor;
                    if let Err(e) = executor.execute(&spec) {
                        tracing::warn!(command = %command, error = %e, "OnChange Run= command failed");
                    }
                    Ok(())
                }),
            )?;
        }

        for target in self.unmask.clone() {
            let logger = self.logger.clone();
            graph.run_after(
                &self.task_file_name,
                Box::new(move |tm, _ctx, _name, changed, err| {
                    if err.is_some() || !changed {
                        return Ok(());
                    }
                    if let Some(logger) = &logger {
                        logger.debug(&format!("unmasking task {target}"));
                    }
                    if let Err(e) = tm.unmask_task(&target) {
                        tracing::warn!(task = %target, error = %e, "failed to unmask task");
                    }
                    Ok(())
                }),
            )?;
        }

        Ok(())
    }
}
