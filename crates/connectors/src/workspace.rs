//! Per-user workspace routing.
//!
//! Every `(user, backend)` pair maps to its own directory under the
//! configured base: `<base>/<backend>/user_<sanitized id>`. The mapping is a
//! pure function of the key, so a restarted process finds the same
//! directories again; the in-memory table only records which ones this
//! process has already prepared.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{BackendKind, ConnectorError};

const TOMBSTONE_PREFIX: &str = ".trash-";

/// Identity of one isolated conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub user_id: String,
    pub backend: BackendKind,
}

impl SessionKey {
    pub fn new(user_id: impl Into<String>, backend: BackendKind) -> Self {
        Self {
            user_id: user_id.into(),
            backend,
        }
    }

    /// Directory name for this user. Distinct from any tombstone name.
    pub fn dir_name(&self) -> String {
        format!("user_{}", sanitize(&self.user_id))
    }
}

/// Snapshot of a workspace as seen on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub exists: bool,
    pub path: PathBuf,
    pub latest_artifact: Option<PathBuf>,
    pub artifact_count: usize,
}

pub struct WorkspaceRouter {
    base: PathBuf,
    sessions: Mutex<HashMap<SessionKey, PathBuf>>,
}

impl WorkspaceRouter {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self {
            base: base.into(),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Where `key` lives, whether or not it has been created yet.
    pub fn path_for(&self, key: &SessionKey) -> PathBuf {
        self.base.join(key.backend.as_str()).join(key.dir_name())
    }

    /// Known workspace for `key`, if this process prepared it or it already
    /// exists on disk from an earlier run.
    pub async fn lookup(&self, key: &SessionKey) -> Option<PathBuf> {
        if let Some(path) = self.sessions.lock().await.get(key) {
            return Some(path.clone());
        }
        let path = self.path_for(key);
        fs::metadata(&path)
            .await
            .ok()
            .filter(|m| m.is_dir())
            .map(|_| path)
    }

    /// Return the workspace for `key`, creating it if needed. Idempotent.
    pub async fn resolve_or_create(&self, key: &SessionKey) -> Result<PathBuf, ConnectorError> {
        let path = self.path_for(key);
        let mut sessions = self.sessions.lock().await;

        // Recreated even when cached: an operator may have removed it.
        fs::create_dir_all(&path)
            .await
            .map_err(|e| ConnectorError::io(&path, e))?;

        if sessions.insert(key.clone(), path.clone()).is_none() {
            debug!(
                component = "workspace",
                event = "workspace.resolved",
                user_id = %key.user_id,
                backend = %key.backend,
                path = %path.display(),
                "Workspace ready"
            );
        }
        Ok(path)
    }

    /// Discard everything in the workspace and leave an empty one behind.
    ///
    /// The old directory is renamed aside while the table lock is held, so a
    /// concurrent resolve sees either the old workspace or the fresh one.
    /// The renamed copy is deleted after the lock is released.
    pub async fn reset(&self, key: &SessionKey) -> Result<PathBuf, ConnectorError> {
        let path = self.path_for(key);

        let tombstone = {
            let mut sessions = self.sessions.lock().await;
            let tombstone = match fs::metadata(&path).await {
                Ok(_) => {
                    let tombstone = path.with_file_name(format!(
                        "{TOMBSTONE_PREFIX}{}-{}",
                        key.dir_name(),
                        uuid::Uuid::new_v4().simple()
                    ));
                    fs::rename(&path, &tombstone)
                        .await
                        .map_err(|e| ConnectorError::io(&path, e))?;
                    Some(tombstone)
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
                Err(e) => return Err(ConnectorError::io(&path, e)),
            };
            fs::create_dir_all(&path)
                .await
                .map_err(|e| ConnectorError::io(&path, e))?;
            sessions.insert(key.clone(), path.clone());
            tombstone
        };

        info!(
            component = "workspace",
            event = "workspace.reset",
            user_id = %key.user_id,
            backend = %key.backend,
            path = %path.display(),
            had_previous = tombstone.is_some(),
            "Workspace reset"
        );

        if let Some(tombstone) = tombstone {
            remove_tombstone(&tombstone).await;
        }
        Ok(path)
    }

    /// Inspect the workspace for `key`. Never creates anything.
    pub async fn info(&self, key: &SessionKey) -> SessionInfo {
        let path = self.path_for(key);
        let mut info = SessionInfo {
            exists: false,
            path: path.clone(),
            latest_artifact: None,
            artifact_count: 0,
        };

        let Ok(mut entries) = fs::read_dir(&path).await else {
            return info;
        };
        info.exists = true;

        let mut latest: Option<(SystemTime, PathBuf)> = None;
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if !key.backend.is_session_artifact(name) {
                continue;
            }
            let Ok(meta) = entry.metadata().await else {
                continue;
            };
            if !meta.is_file() {
                continue;
            }

            info.artifact_count += 1;
            let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            if latest.as_ref().map_or(true, |(t, _)| modified > *t) {
                latest = Some((modified, entry.path()));
            }
        }
        info.latest_artifact = latest.map(|(_, p)| p);
        info
    }

    /// Delete tombstones left behind by a reset that was interrupted.
    pub async fn sweep_tombstones(&self) -> usize {
        let mut removed = 0;
        for backend in [BackendKind::IFlow, BackendKind::Qwen] {
            let dir = self.base.join(backend.as_str());
            let Ok(mut entries) = fs::read_dir(&dir).await else {
                continue;
            };
            while let Ok(Some(entry)) = entries.next_entry().await {
                if entry
                    .file_name()
                    .to_str()
                    .is_some_and(|n| n.starts_with(TOMBSTONE_PREFIX))
                {
                    remove_tombstone(&entry.path()).await;
                    removed += 1;
                }
            }
        }
        if removed > 0 {
            info!(
                component = "workspace",
                event = "workspace.tombstones_swept",
                removed,
                "Removed leftover workspace tombstones"
            );
        }
        removed
    }
}

async fn remove_tombstone(path: &Path) {
    if let Err(e) = fs::remove_dir_all(path).await {
        warn!(
            component = "workspace",
            event = "workspace.tombstone_remove_failed",
            path = %path.display(),
            error = %e,
            "Failed to delete old workspace"
        );
    }
}

/// Keep `[A-Za-z0-9-]`; every other byte becomes `_xx` (lowercase hex), so
/// distinct ids never share a directory.
fn sanitize(user_id: &str) -> String {
    let mut out = String::with_capacity(user_id.len());
    for byte in user_id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' {
            out.push(char::from(byte));
        } else {
            let _ = write!(out, "_{byte:02x}");
        }
    }
    out
}
