//! Crash-safe file replacement.
//!
//! Contents go to a temp file in the destination directory, are flushed to
//! disk, then renamed over the destination. Readers see either the old file
//! or the new one, never a partial write.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::time::{Duration, SystemTime};

use uuid::Uuid;

const TEMP_MARKER: &str = ".tmp-";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileMode {
    /// Default permissions (umask applies)
    Shared,
    /// Owner read/write only (0600 on unix)
    Private,
}

/// True for temp files left behind by an interrupted [`write_atomic`].
pub fn is_temp_artifact(file_name: &str) -> bool {
    file_name.starts_with('.') && file_name.contains(TEMP_MARKER)
}

/// Atomically replace `path` with `contents`.
pub fn write_atomic(path: &Path, contents: &[u8], mode: FileMode) -> io::Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;

    let file_name = path
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?
        .to_string_lossy();
    let tmp = parent.join(format!(".{}{}{}", file_name, TEMP_MARKER, Uuid::new_v4().simple()));

    let result = write_then_rename(&tmp, path, contents, mode);
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result?;

    sync_dir(parent);
    Ok(())
}

fn write_then_rename(tmp: &Path, dest: &Path, contents: &[u8], mode: FileMode) -> io::Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        if mode == FileMode::Private {
            options.mode(0o600);
        }
    }

    let mut file = options.open(tmp)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if mode == FileMode::Private {
            file.set_permissions(fs::Permissions::from_mode(0o600))?;
        }
    }
    #[cfg(not(unix))]
    let _ = mode;

    file.write_all(contents)?;
    file.sync_all()?;
    drop(file);

    fs::rename(tmp, dest)
}

/// Flush the directory entry for the rename. Best effort.
fn sync_dir(dir: &Path) {
    #[cfg(unix)]
    if let Ok(handle) = fs::File::open(dir) {
        let _ = handle.sync_all();
    }
    #[cfg(not(unix))]
    let _ = dir;
}

/// Remove temp artifacts in `dir` last modified at least `min_age` ago.
/// Returns how many were removed.
///
/// Younger artifacts may belong to a write still in progress and are kept.
pub fn sweep_temp_artifacts(dir: &Path, min_age: Duration) -> io::Result<usize> {
    if !dir.exists() {
        return Ok(0);
    }
    let now = SystemTime::now();
    let mut removed = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !is_temp_artifact(&entry.file_name().to_string_lossy()) {
            continue;
        }
        let age = entry
            .metadata()
            .and_then(|m| m.modified())
            .map(|modified| now.duration_since(modified).unwrap_or_default());
        match age {
            Ok(age) if age >= min_age => {}
            Ok(_) => continue,
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e),
        }
        match fs::remove_file(entry.path()) {
            Ok(()) => removed += 1,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_replaces_contents() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("nested/state.json");

        write_atomic(&path, b"first", FileMode::Shared).unwrap();
        write_atomic(&path, b"second", FileMode::Shared).unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"second");
        let leftovers: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| is_temp_artifact(&e.file_name().to_string_lossy()))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_private_mode() {
        use std::os::unix::fs::PermissionsExt;

        let temp = tempdir().unwrap();
        let path = temp.path().join("secret.json");
        write_atomic(&path, b"{}", FileMode::Private).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }

    #[test]
    fn test_sweep_keeps_fresh_artifacts() {
        let temp = tempdir().unwrap();
        let stale = temp.path().join(".state.json.tmp-abc");
        let fresh = temp.path().join(".state.json.tmp-def");
        fs::write(&stale, b"partial").unwrap();
        fs::write(&fresh, b"in flight").unwrap();
        fs::write(temp.path().join("state.json"), b"{}").unwrap();
        fs::File::options()
            .write(true)
            .open(&stale)
            .unwrap()
            .set_modified(SystemTime::now() - Duration::from_secs(3600))
            .unwrap();

        assert_eq!(sweep_temp_artifacts(temp.path(), Duration::from_secs(60)).unwrap(), 1);
        assert!(!stale.exists());
        assert!(fresh.exists());
        assert!(temp.path().join("state.json").exists());

        assert_eq!(sweep_temp_artifacts(temp.path(), Duration::ZERO).unwrap(), 1);
        assert!(!fresh.exists());
    }
}
