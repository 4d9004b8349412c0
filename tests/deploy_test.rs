//! End-to-end coverage of `run_deploy`: decode -> drop-in merge -> env
//! substitution -> registry setup -> two-phase execute, driven against a
//! small on-disk fixture tree with a drop-in override.

use std::fs;

use clap::Parser;
use system_deploy::cli::{Cli, Commands};

fn write(path: &std::path::Path, contents: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

#[test]
fn run_deploy_merges_dropin_and_copies_file() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();

    let source = root.join("payload.txt");
    write(&source, "hello from the fixture\n");

    let destination = root.join("out").join("payload.txt");

    let tasks_dir = root.join("tasks");
    write(
        &tasks_dir.join("demo.task"),
        &format!(
            "[Task]\nDescription = base description\n\n[Copy]\nSource = {}\nDestination = {}\nCreateDirectories = yes\n",
            source.display(),
            destination.display(),
        ),
    );

    // Drop-in override: changes the task's description, leaving the [Copy]
    // section's own options untouched.
    write(
        &tasks_dir.join("demo.task.d").join("50-override.conf"),
        "[Task]\nDescription = overridden description\n",
    );

    let report = system_deploy::run_deploy(&[tasks_dir.clone()], &[root.to_path_buf()]).unwrap();

    assert!(!report.has_failures());
    assert_eq!(report.tasks.len(), 1);
    assert!(report.tasks[0].changed);
    assert_eq!(fs::read_to_string(&destination).unwrap(), "hello from the fixture\n");
}

#[test]
fn run_deploy_is_idempotent_on_second_pass() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();

    let source = root.join("payload.txt");
    write(&source, "same content\n");
    let destination = root.join("out").join("payload.txt");

    let tasks_dir = root.join("tasks");
    write(
        &tasks_dir.join("demo.task"),
        &format!(
            "[Copy]\nSource = {}\nDestination = {}\nCreateDirectories = yes\n",
            source.display(),
            destination.display(),
        ),
    );

    let first = system_deploy::run_deploy(&[tasks_dir.clone()], &[]).unwrap();
    assert!(first.tasks[0].changed);

    let second = system_deploy::run_deploy(&[tasks_dir], &[]).unwrap();
    assert!(!second.tasks[0].changed, "rerunning against identical content should report no change");
}

#[test]
fn cli_parses_deploy_with_search_paths() {
    let args = Cli::parse_from(["system-deploy", "deploy", "-p", "/etc/system-deploy", "./tasks"]);

    match args.command {
        Commands::Deploy(opts) => {
            assert_eq!(opts.directories, vec![std::path::PathBuf::from("./tasks")]);
            assert_eq!(opts.search_paths, vec![std::path::PathBuf::from("/etc/system-deploy")]);
        }
        _ => panic!("expected Deploy command"),
    }
}

#[test]
fn run_run_action_executes_a_single_copy_without_a_task_file() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("src.txt");
    fs::write(&source, "ad-hoc run\n").unwrap();
    let destination = dir.path().join("dst.txt");

    let changed = system_deploy::run_run_action(
        "Copy",
        vec![
            ("Source".to_string(), source.display().to_string()),
            ("Destination".to_string(), destination.display().to_string()),
        ],
    )
    .unwrap();

    assert!(changed);
    assert_eq!(fs::read_to_string(&destination).unwrap(), "ad-hoc run\n");
}
