//! `[Exec]` — runs a shell command, optionally as a different user/group or
//! with extra environment variables.
//!
//! Ported from the upstream Go implementation's `Exec` action. `Chroot=`
//! and stdin-forwarding aren't carried forward (no Non-goal names them, but
//! nothing in this crate's stack gives a faithful, safe chroot primitive
//! outside the rootfs-bootstrap code this spec explicitly leaves out) —
//! noted in DESIGN.md. `User=`/`Group=` are resolved to numeric ids with
//! `nix::unistd` at setup time (so a typo fails the task before anything
//! runs) and applied to the spawned child via
//! [`std::os::unix::process::CommandExt::uid`]/`gid`.

use std::sync::Arc;

use anyhow::Context as _;
use nix::unistd::{Group, User};

use crate::actions::{Action, Plugin};
use crate::error::SystemDeployError;
use crate::executor::{CommandExecutor, CommandSpec, RealCommandExecutor};
use crate::graph::Context;
use crate::logger::Logger;
use crate::task::spec::{OptionSpec, OptionType};
use crate::task::Task;
use crate::unit::Section;
use crate::util::shell;

pub fn register() {
    crate::actions::registry::register(
        Plugin::new("Exec", setup)
            .description("Execute one or more commands")
            .author("system-deploy contributors")
            .website("https://github.com/ppacher/system-deploy")
            .option_specs(vec![
                OptionSpec::new("Command", OptionType::String)
                    .required()
                    .description("The command to execute."),
                OptionSpec::new("WorkingDirectory", OptionType::String)
                    .description("The working directory for the command. Defaults to the task directory."),
                OptionSpec::new("User", OptionType::String)
                    .description("Execute the command as User (either name or numeric id)."),
                OptionSpec::new("Group", OptionType::String)
                    .description("Execute the command under Group (either name or numeric id)."),
                OptionSpec::new("Environment", OptionType::StringSlice)
                    .description("Add environment variables for the command, as KEY=VALUE."),
            ]),
    )
    .expect("Exec plugin registered twice");
}

struct ExecAction {
    command: Vec<String>,
    working_directory: String,
    user: Option<String>,
    group: Option<String>,
    environment: Vec<(String, String)>,
    logger: Option<Arc<dyn Logger>>,
}

fn resolve_uid(name: &str) -> anyhow::Result<u32> {
    if let Ok(uid) = name.parse::<u32>() {
        return Ok(uid);
    }
    User::from_name(name)?
        .map(|u| u.uid.as_raw())
        .ok_or_else(|| anyhow::anyhow!("user {name:?} does not exist"))
}

fn resolve_gid(name: &str) -> anyhow::Result<u32> {
    if let Ok(gid) = name.parse::<u32>() {
        return Ok(gid);
    }
    Group::from_name(name)?
        .map(|g| g.gid.as_raw())
        .ok_or_else(|| anyhow::anyhow!("group {name:?} does not exist"))
}

fn setup(task: &Task, section: &Section) -> anyhow::Result<Option<Box<dyn Action>>> {
    let raw_command = section.get_string("Command")?;
    let command = shell::split(&raw_command)?;

    let working_directory = match section.get_string("WorkingDirectory") {
        Ok(dir) => dir,
        Err(e) if crate::unit::is_not_set(&e) => task.directory.clone(),
        Err(e) => return Err(e.into()),
    };

    let user = match section.get_string("User") {
        Ok(name) => {
            resolve_uid(&name).with_context(|| format!("user {name:?} does not exist"))?;
            Some(name)
        }
        Err(e) if crate::unit::is_not_set(&e) => None,
        Err(e) => return Err(e.into()),
    };

    let group = match section.get_string("Group") {
        Ok(name) => {
            resolve_gid(&name).with_context(|| format!("group {name:?} does not exist"))?;
            Some(name)
        }
        Err(e) if crate::unit::is_not_set(&e) => None,
        Err(e) => return Err(e.into()),
    };

    let mut environment = Vec::new();
    for entry in section.get_string_slice("Environment") {
        let (key, value) = entry
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("invalid value for option 'Environment': {entry:?}"))?;
        environment.push((key.to_string(), value.to_string()));
    }

    Ok(Some(Box::new(ExecAction {
        command,
        working_directory,
        user,
        group,
        environment,
        logger: None,
    })))
}

impl Action for ExecAction {
    fn name(&self) -> String {
        format!("Running {:?}", self.command.join(" "))
    }

    fn set_logger(&mut self, logger: Arc<dyn Logger>) {
        self.logger = Some(logger);
    }

    fn supports_execute(&self) -> bool {
        true
    }

    fn execute(&mut self, _ctx: &Context) -> Result<bool, SystemDeployError> {
        let Some((program, args)) = self.command.split_first() else {
            return Err(SystemDeployError::Validation("Command= resolved to an empty argument list".into()));
        };

        let mut spec = CommandSpec::new(program.clone(), args.to_vec())
            .with_cwd(self.working_directory.clone())
            .with_envs(self.environment.clone());

        if let Some(user) = &self.user {
            let uid = resolve_uid(user).map_err(|e| SystemDeployError::Validation(e.to_string()))?;
            spec = spec.with_uid(uid);
        }
        if let Some(group) = &self.group {
            let gid = resolve_gid(group).map_err(|e| SystemDeployError::Validation(e.to_string()))?;
            spec = spec.with_gid(gid);
        }

        let executor = RealCommandExecutor;
        let result = executor.execute(&spec).map_err(|source| SystemDeployError::Action {
            name: "Exec".to_string(),
            source,
        })?;

        if let Some(logger) = &self.logger {
            logger.debug(&format!("exit status: {:?}", result.code()));
        }

        if !result.success() {
            return Err(SystemDeployError::Action {
                name: "Exec".to_string(),
                source: anyhow::anyhow!(
                    "command {:?} failed with status {:?}",
                    self.command,
                    result.code()
                ),
            });
        }

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn section(pairs: &[(&str, &str)]) -> Section {
        let mut s = Section::new("Exec");
        for (k, v) in pairs {
            s.options.push(*k, *v);
        }
        s
    }

    #[test]
    fn command_runs_and_reports_changed() {
        let task = Task::new("t.task", "/tmp");
        let sec = section(&[("Command", "true")]);
        let mut action = setup(&task, &sec).unwrap().unwrap();
        let changed = action.execute(&Context::new()).unwrap();
        assert!(changed);
    }

    #[test]
    fn failing_command_is_an_error() {
        let task = Task::new("t.task", "/tmp");
        let sec = section(&[("Command", "false")]);
        let mut action = setup(&task, &sec).unwrap().unwrap();
        let err = action.execute(&Context::new()).unwrap_err();
        assert!(matches!(err, SystemDeployError::Action { .. }));
    }

    #[test]
    fn unknown_user_is_rejected_at_setup() {
        let task = Task::new("t.task", "/tmp");
        let sec = section(&[("Command", "true"), ("User", "definitely-not-a-real-user")]);
        assert!(setup(&task, &sec).is_err());
    }

    #[test]
    fn malformed_environment_entry_is_rejected() {
        let task = Task::new("t.task", "/tmp");
        let sec = section(&[("Command", "true"), ("Environment", "NOVALUE")]);
        assert!(setup(&task, &sec).is_err());
    }
}
