//! `[Copy]` — copies a file or directory tree into place, skipping the
//! write when the destination already holds identical content.
//!
//! Ported from the upstream Go implementation's `Copy` action: absolute
//! and relative `Source=` resolution against the task directory, a trailing
//! path separator on `Destination=` meaning "keep the source's basename",
//! and `FileMode=`/`DirectoryMode=` only applying to regular files (copying
//! a directory tree doesn't attempt per-file mode reconciliation, matching
//! the original's documented limitation).

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;

use crate::actions::{Action, HelpSection, Plugin};
use crate::error::SystemDeployError;
use crate::graph::{Context, ExecGraph};
use crate::logger::Logger;
use crate::task::spec::OptionSpec;
use crate::task::spec::OptionType;
use crate::task::Task;
use crate::unit::Section;
use crate::util::atomic_file;

pub fn register() {
    crate::actions::registry::register(
        Plugin::new("Copy", setup)
            .description("Copy files and folders to a destination path")
            .help_section(HelpSection::new(
                "Change Detection",
                "Regular files are only rewritten when their content differs from the \
                 destination. Directory trees are always copied in full.",
            ))
            .author("system-deploy contributors")
            .website("https://github.com/ppacher/system-deploy")
            .example(
                "[Task]\nDescription=Copy file foo to /server/custom/bin\n\n[Copy]\n\
                 Source=./assets/foo\nDestination=/server/custom/bin\nCreateDirectories=yes\n\
                 FileMode=0600\n",
            )
            .option_specs(vec![
                OptionSpec::new("Source", OptionType::String)
                    .required()
                    .description("The source file or directory to copy from."),
                OptionSpec::new("Destination", OptionType::String)
                    .required()
                    .description("The destination path. A trailing separator keeps Source's basename."),
                OptionSpec::new("CreateDirectories", OptionType::Bool)
                    .default("no")
                    .description("Create missing destination directories."),
                OptionSpec::new("FileMode", OptionType::Int)
                    .description("Octal mode to apply to the destination file. Defaults to the source file's mode."),
                OptionSpec::new("DirectoryMode", OptionType::Int)
                    .default("0755")
                    .description("Octal mode used when creating missing destination directories."),
            ]),
    )
    .expect("Copy plugin registered twice");
}

struct CopyAction {
    source: PathBuf,
    source_is_dir: bool,
    file_mode: Option<u32>,
    dir_mode: u32,
    create_dirs: bool,
    dest_dir: PathBuf,
    dest_name: String,
    logger: Option<Arc<dyn Logger>>,
}

fn setup(task: &Task, section: &Section) -> anyhow::Result<Option<Box<dyn Action>>> {
    let raw_source = section.get_string("Source")?;
    let mut source = PathBuf::from(&raw_source);
    if !source.is_absolute() {
        source = PathBuf::from(&task.directory).join(&source);
    }

    let destination = section.get_string("Destination")?;
    let create_dirs = section.get_bool_default("CreateDirectories", false);

    let file_mode = match section.get_int("FileMode") {
        Ok(mode) if mode > 0o777 => anyhow::bail!("invalid value for FileMode: {:o}", mode),
        Ok(mode) => Some(mode as u32),
        Err(e) if crate::unit::is_not_set(&e) => None,
        Err(e) => return Err(anyhow::anyhow!("invalid value for FileMode: {e}")),
    };

    let dir_mode = match section.get_int_default("DirectoryMode", 0o755) {
        mode if mode > 0o777 => anyhow::bail!("invalid value for DirectoryMode: {:o}", mode),
        mode => mode as u32,
    };

    let source_is_dir = fs::metadata(&source)
        .with_context(|| format!("source: {}", source.display()))?
        .is_dir();

    let (dest_dir, dest_name) = if destination.ends_with(std::path::MAIN_SEPARATOR) {
        let name = source
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        (PathBuf::from(&destination), name)
    } else {
        let dest_path = Path::new(&destination);
        let dir = dest_path.parent().map(Path::to_path_buf).unwrap_or_default();
        let name = dest_path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
        (dir, name)
    };

    check_directory(&dest_dir, create_dirs)?;

    Ok(Some(Box::new(CopyAction {
        source,
        source_is_dir,
        file_mode,
        dir_mode,
        create_dirs,
        dest_dir,
        dest_name,
        logger: None,
    })))
}

fn check_directory(path: &Path, ignore_missing: bool) -> anyhow::Result<()> {
    match fs::metadata(path) {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => anyhow::bail!("not a directory: {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            if ignore_missing {
                Ok(())
            } else {
                anyhow::bail!("path does not exist: {}", path.display())
            }
        }
        Err(e) => Err(e).with_context(|| format!("failed to stat {}", path.display())),
    }
}

impl CopyAction {
    fn dest(&self) -> PathBuf {
        self.dest_dir.join(&self.dest_name)
    }

    fn copy_directory(&self) -> anyhow::Result<()> {
        let dest = self.dest();
        for entry in walkdir::WalkDir::new(&self.source) {
            let entry = entry?;
            let relative = entry.path().strip_prefix(&self.source).unwrap_or(entry.path());
            let target = dest.join(relative);
            if entry.file_type().is_dir() {
                fs::create_dir_all(&target).with_context(|| format!("creating {}", target.display()))?;
            } else {
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
                }
                fs::copy(entry.path(), &target)
                    .with_context(|| format!("copying {} to {}", entry.path().display(), target.display()))?;
            }
        }
        Ok(())
    }

    fn copy_regular_file(&self) -> anyhow::Result<bool> {
        let dest = self.dest();
        let mode = match self.file_mode {
            Some(mode) => mode,
            #[cfg(unix)]
            None => {
                use std::os::unix::fs::PermissionsExt;
                fs::metadata(&self.source)
                    .with_context(|| format!("stat source {}", self.source.display()))?
                    .permissions()
                    .mode()
                    & 0o7777
            }
            #[cfg(not(unix))]
            None => 0o644,
        };

        let contents =
            fs::read(&self.source).with_context(|| format!("reading source {}", self.source.display()))?;
        let changed = atomic_file::write_if_changed(&dest, &contents, Some(mode))?;
        Ok(changed)
    }
}

impl Action for CopyAction {
    fn name(&self) -> String {
        format!("Copy {} to {}", self.source.display(), self.dest().display())
    }

    fn set_logger(&mut self, logger: Arc<dyn Logger>) {
        self.logger = Some(logger);
    }

    fn supports_execute(&self) -> bool {
        true
    }

    fn execute(&mut self, _ctx: &Context) -> Result<bool, SystemDeployError> {
        if self.create_dirs && !self.dest_dir.exists() {
            fs::create_dir_all(&self.dest_dir)
                .map_err(|e| SystemDeployError::io(format!("creating {}", self.dest_dir.display()), e))?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                fs::set_permissions(&self.dest_dir, fs::Permissions::from_mode(self.dir_mode))
                    .map_err(|e| SystemDeployError::io(format!("chmod {}", self.dest_dir.display()), e))?;
            }
        }

        let result = if self.source_is_dir {
            self.copy_directory().map(|_| true)
        } else {
            self.copy_regular_file()
        };

        result.map_err(|source| SystemDeployError::Action {
            name: "Copy".to_string(),
            source,
        })
    }
}
