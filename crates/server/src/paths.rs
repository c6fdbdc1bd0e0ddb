//! Central path resolution for WeCom Relay data files.
//!
//! Resolved once at startup from: CLI `--data-dir` (or `WECOMRELAY_DATA_DIR`)
//! > `~/.wecom-relay`. Callsites use these helpers instead of building paths
//! from `HOME`.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

static DATA_DIR: RwLock<Option<PathBuf>> = RwLock::new(None);

const DEFAULT_DIR_NAME: &str = ".wecom-relay";

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(DEFAULT_DIR_NAME)
}

/// Initialize the global data directory. Returns the resolved path.
pub fn init_data_dir(explicit: Option<&Path>) -> PathBuf {
    let dir = explicit
        .map(Path::to_path_buf)
        .unwrap_or_else(default_data_dir);

    let mut guard = DATA_DIR.write().unwrap_or_else(PoisonError::into_inner);
    *guard = Some(dir.clone());
    dir
}

/// Current data directory; the default location until `init_data_dir` runs.
pub fn data_dir() -> PathBuf {
    DATA_DIR
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
        .unwrap_or_else(default_data_dir)
}

pub fn log_dir() -> PathBuf {
    data_dir().join("logs")
}

/// Default base for per-user agent workspaces.
pub fn workspaces_dir() -> PathBuf {
    data_dir().join("workspaces")
}

/// Create all required subdirectories under the data dir.
pub fn ensure_dirs() -> io::Result<()> {
    std::fs::create_dir_all(data_dir())?;
    std::fs::create_dir_all(log_dir())?;
    Ok(())
}

/// Reset data dir — for test isolation only.
#[cfg(test)]
pub fn reset_data_dir() {
    let mut guard = DATA_DIR.write().unwrap_or_else(PoisonError::into_inner);
    *guard = None;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_dir_drives_every_helper() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("relay");

        assert_eq!(init_data_dir(Some(&root)), root);
        assert_eq!(log_dir(), root.join("logs"));
        assert_eq!(workspaces_dir(), root.join("workspaces"));

        ensure_dirs().unwrap();
        assert!(root.join("logs").is_dir());

        reset_data_dir();
        assert!(data_dir().ends_with(DEFAULT_DIR_NAME));
    }
}
