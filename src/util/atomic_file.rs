//! Atomic file writes: temp file in the same directory, `fsync`, then
//! `rename` — so a concurrent reader always observes either the old file or
//! the complete new one, never a truncated intermediate.

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use crate::error::SystemDeployError;

/// Writes `contents` to `path` if they differ from what's already there.
///
/// Returns `true` if the file was written (content differed, or the file
/// didn't exist yet), `false` if it already held `contents` and nothing was
/// touched. On any failure during the write, the temp file is removed
/// before the error is returned.
pub fn write_if_changed(path: &Path, contents: &[u8], mode: Option<u32>) -> Result<bool, SystemDeployError> {
    if let Ok(existing) = fs::read(path) {
        if existing == contents {
            return Ok(false);
        }
    }

    let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| Path::new("."));
    let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("system-deploy");
    let tmp_path = dir.join(format!(".{}.tmp.{}", file_name, std::process::id()));

    let result = write_and_rename(&tmp_path, path, contents, mode);
    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    result?;
    Ok(true)
}

fn write_and_rename(tmp_path: &Path, dest: &Path, contents: &[u8], mode: Option<u32>) -> Result<(), SystemDeployError> {
    let mut file = File::create(tmp_path)
        .map_err(|e| SystemDeployError::io(format!("creating {}", tmp_path.display()), e))?;
    file.write_all(contents)
        .map_err(|e| SystemDeployError::io(format!("writing {}", tmp_path.display()), e))?;
    file.sync_all()
        .map_err(|e| SystemDeployError::io(format!("syncing {}", tmp_path.display()), e))?;
    drop(file);

    #[cfg(unix)]
    if let Some(mode) = mode {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(tmp_path, fs::Permissions::from_mode(mode))
            .map_err(|e| SystemDeployError::io(format!("setting permissions on {}", tmp_path.display()), e))?;
    }
    #[cfg(not(unix))]
    let _ = mode;

    fs::rename(tmp_path, dest).map_err(|e| SystemDeployError::io(format!("renaming into {}", dest.display()), e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_new_file_and_reports_changed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        let changed = write_if_changed(&path, b"hello", None).unwrap();
        assert!(changed);
        assert_eq!(fs::read(&path).unwrap(), b"hello");
    }

    #[test]
    fn rewriting_identical_content_reports_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        write_if_changed(&path, b"hello", None).unwrap();
        let changed = write_if_changed(&path, b"hello", None).unwrap();
        assert!(!changed);
    }

    #[test]
    fn rewriting_different_content_reports_changed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        write_if_changed(&path, b"hello", None).unwrap();
        let changed = write_if_changed(&path, b"world", None).unwrap();
        assert!(changed);
        assert_eq!(fs::read(&path).unwrap(), b"world");
    }

    #[test]
    fn does_not_leak_temp_file_on_success() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        write_if_changed(&path, b"hello", None).unwrap();
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp."))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn applies_requested_mode() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        write_if_changed(&path, b"hello", Some(0o600)).unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }
}
