//! `[Systemd]` — installs systemd unit files and enables/starts units.
//!
//! Ported from the upstream Go implementation's `Systemd` action:
//! `Install=` paths are resolved against the task directory, copied into
//! `InstallDirectory=` (mode `0600`, matching the original's
//! `CopyAtomicKeepMode`) only when their content differs, `daemon-reload` is
//! run once if any unit changed, and `Enable=`/`AutoEnable=` skip units that
//! `systemctl is-enabled` already reports as enabled.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;

use crate::actions::{Action, Plugin};
use crate::error::SystemDeployError;
use crate::executor::{CommandExecutor, CommandSpec, RealCommandExecutor};
use crate::graph::{Context, ExecGraph};
use crate::logger::Logger;
use crate::task::spec::{OptionSpec, OptionType};
use crate::task::Task;
use crate::unit::Section;
use crate::util::atomic_file;

const DEFAULT_INSTALL_DIRECTORY: &str = "/etc/systemd/system";

pub fn register() {
    crate::actions::registry::register(
        Plugin::new("Systemd", setup)
            .description("Install and manage systemd unit files")
            .author("system-deploy contributors")
            .website("https://github.com/ppacher/system-deploy")
            .option_specs(vec![
                OptionSpec::new("Install", OptionType::StringSlice)
                    .description("Path to a systemd unit file to install. May be specified multiple times."),
                OptionSpec::new("AutoEnable", OptionType::Bool)
                    .default("no")
                    .description("Whether to automatically enable all installed units."),
                OptionSpec::new("EnableNow", OptionType::Bool)
                    .default("no")
                    .description("If AutoEnable or Enable= is set, also start those units immediately."),
                OptionSpec::new("Enable", OptionType::StringSlice).description("A list of systemd units to enable."),
                OptionSpec::new("InstallDirectory", OptionType::String)
                    .default(DEFAULT_INSTALL_DIRECTORY)
                    .description("Path to the systemd unit directory used to install units."),
            ]),
    )
    .expect("Systemd plugin registered twice");
}

struct SystemdAction {
    units_to_install: Vec<PathBuf>,
    units_to_enable: Vec<String>,
    auto_enable_installed: bool,
    enable_now: bool,
    install_directory: PathBuf,
    logger: Option<Arc<dyn Logger>>,
}

fn resolve_install_paths(task_directory: &str, raw: Vec<String>) -> Vec<PathBuf> {
    raw.into_iter()
        .map(|raw| {
            let path = Path::new(&raw);
            if path.is_absolute() {
                path.to_path_buf()
            } else {
                Path::new(task_directory).join(path)
            }
        })
        .collect()
}

fn resolve_install_directory(section: &Section) -> anyhow::Result<PathBuf> {
    match section.get_string("InstallDirectory") {
        Ok(dir) => Ok(PathBuf::from(dir)),
        Err(e) if crate::unit::is_not_set(&e) => Ok(PathBuf::from(DEFAULT_INSTALL_DIRECTORY)),
        Err(e) => Err(e.into()),
    }
}

fn setup(task: &Task, section: &Section) -> anyhow::Result<Option<Box<dyn Action>>> {
    let units_to_install = resolve_install_paths(&task.directory, section.get_string_slice("Install"));

    let auto_enable_installed = section.get_bool_default("AutoEnable", false);
    let enable_now = section.get_bool_default("EnableNow", false);
    let units_to_enable = section.get_string_slice("Enable");

    let install_directory = resolve_install_directory(section)?;

    Ok(Some(Box::new(SystemdAction {
        units_to_install,
        units_to_enable,
        auto_enable_installed,
        enable_now,
        install_directory,
        logger: None,
    })))
}

impl SystemdAction {
    fn systemctl(&self, args: &[&str]) -> anyhow::Result<()> {
        let spec = CommandSpec::new("systemctl", args.iter().map(|a| a.to_string()).collect());
        let result = RealCommandExecutor.execute(&spec)?;
        if !result.success() {
            anyhow::bail!(
                "systemctl {} failed with status {:?}: {}",
                args.join(" "),
                result.code(),
                String::from_utf8_lossy(&result.stderr)
            );
        }
        Ok(())
    }

    fn is_enabled(&self, unit: &str) -> bool {
        let spec = CommandSpec::new("systemctl", vec!["is-enabled".into(), unit.into()]);
        RealCommandExecutor
            .execute(&spec)
            .map(|r| r.success())
            .unwrap_or(false)
    }

    fn enable(&self, units: &[String]) -> anyhow::Result<bool> {
        let mut changed = false;
        for unit in units {
            if self.is_enabled(unit) {
                continue;
            }
            let mut args = vec!["enable"];
            if self.enable_now {
                args.push("--now");
            }
            args.push(unit);
            self.systemctl(&args)?;
            changed = true;
        }
        Ok(changed)
    }

    fn install(&self) -> anyhow::Result<bool> {
        fs::create_dir_all(&self.install_directory)
            .with_context(|| format!("creating {}", self.install_directory.display()))?;

        let mut changed = false;
        for source in &self.units_to_install {
            let file_name = source
                .file_name()
                .ok_or_else(|| anyhow::anyhow!("install unit {} has no file name", source.display()))?;
            let target = self.install_directory.join(file_name);

            let contents = fs::read(source).with_context(|| format!("reading unit file {}", source.display()))?;
            if atomic_file::write_if_changed(&target, &contents, Some(0o600))? {
                changed = true;
                if let Some(logger) = &self.logger {
                    logger.info(&format!("installed unit {}", target.display()));
                }
            }
        }
        Ok(changed)
    }
}

impl Action for SystemdAction {
    fn name(&self) -> String {
        "Systemd".to_string()
    }

    fn set_logger(&mut self, logger: Arc<dyn Logger>) {
        self.logger = Some(logger);
    }

    fn supports_prepare(&self) -> bool {
        true
    }

    fn prepare(&mut self, _graph: &mut dyn ExecGraph) -> Result<(), SystemDeployError> {
        if !self.units_to_install.is_empty() || !self.units_to_enable.is_empty() {
            which::which("systemctl").map_err(|_| {
                SystemDeployError::Action {
                    name: "Systemd".to_string(),
                    source: anyhow::anyhow!("systemctl binary not found in PATH"),
                }
            })?;
        }
        Ok(())
    }

    fn supports_execute(&self) -> bool {
        true
    }

    fn execute(&mut self, _ctx: &Context) -> Result<bool, SystemDeployError> {
        let mut changed = false;

        if !self.units_to_install.is_empty() {
            let installed = self.install().map_err(|source| SystemDeployError::Action {
                name: "Systemd".to_string(),
                source,
            })?;

            if installed {
                changed = true;
                self.systemctl(&["daemon-reload"]).map_err(|source| SystemDeployError::Action {
                    name: "Systemd".to_string(),
                    source,
                })?;
            }

            if self.auto_enable_installed {
                let names: Vec<String> = self
                    .units_to_install
                    .iter()
                    .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().to_string()))
                    .collect();
                if self.enable(&names).map_err(|source| SystemDeployError::Action {
                    name: "Systemd".to_string(),
                    source,
                })? {
                    changed = true;
                }
            }
        }

        if !self.units_to_enable.is_empty()
            && self.enable(&self.units_to_enable.clone()).map_err(|source| SystemDeployError::Action {
                name: "Systemd".to_string(),
                source,
            })?
        {
            changed = true;
        }

        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn section(pairs: &[(&str, &str)]) -> Section {
        let mut s = Section::new("Systemd");
        for (k, v) in pairs {
            s.options.push(*k, *v);
        }
        s
    }

    #[test]
    fn resolves_relative_install_paths_against_task_directory() {
        let resolved = resolve_install_paths("/srv/units", vec!["foo.service".to_string()]);
        assert_eq!(resolved, vec![PathBuf::from("/srv/units/foo.service")]);
    }

    #[test]
    fn absolute_install_paths_are_kept_as_is() {
        let resolved = resolve_install_paths("/srv/units", vec!["/lib/systemd/system/foo.service".to_string()]);
        assert_eq!(resolved, vec![PathBuf::from("/lib/systemd/system/foo.service")]);
    }

    #[test]
    fn defaults_install_directory_when_unset() {
        let sec = section(&[]);
        let dir = resolve_install_directory(&sec).unwrap();
        assert_eq!(dir, PathBuf::from(DEFAULT_INSTALL_DIRECTORY));
    }

    #[test]
    fn setup_succeeds_with_no_options() {
        let task = Task::new("t.task", "/srv/units");
        let sec = section(&[]);
        assert!(setup(&task, &sec).is_ok());
    }

    #[test]
    fn installing_a_changed_unit_file_reports_changed() {
        let src_dir = tempfile::tempdir().unwrap();
        let install_dir = tempfile::tempdir().unwrap();
        let unit_path = src_dir.path().join("foo.service");
        fs::write(&unit_path, "[Service]\nExecStart=/bin/true\n").unwrap();

        let action = SystemdAction {
            units_to_install: vec![unit_path],
            units_to_enable: Vec::new(),
            auto_enable_installed: false,
            enable_now: false,
            install_directory: install_dir.path().to_path_buf(),
            logger: None,
        };

        let changed = action.install().unwrap();
        assert!(changed);
        assert!(install_dir.path().join("foo.service").exists());

        let changed_again = action.install().unwrap();
        assert!(!changed_again);
    }
}
