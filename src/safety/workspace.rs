/// Per-run worker directories under the allowed root
///
/// Every snippet run gets its own uniquely named scratch directory, so
/// concurrent runs never collide on temp paths. Creation failures are
/// environment errors and raise; removal is best-effort hygiene and only
/// logs.
use crate::config::types::{Result, SandboxError};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

const WORKERS_SUBDIR: &str = "workers";
const WORKER_PREFIX: &str = "pipebox_worker_";
const SNIPPET_NAME: &str = "worker_snippet.py";

/// Private scratch directory for one snippet run.
///
/// Lives under `<allowed_root>/workers/`; removed on `cleanup` and again
/// on `Drop` (idempotent).
#[derive(Debug)]
pub struct WorkerDir {
    path: PathBuf,
}

impl WorkerDir {
    /// Prepare the workers subtree (idempotent) and create one worker dir.
    ///
    /// The root and the subtree get permissive-but-contained mode bits so
    /// the dropped-privilege user can traverse into its own directory.
    pub fn create(allowed_root: &Path) -> Result<Self> {
        let workers = allowed_root.join(WORKERS_SUBDIR);
        fs::create_dir_all(&workers).map_err(|e| {
            SandboxError::Workspace(format!(
                "failed to create {}: {}",
                workers.display(),
                e
            ))
        })?;
        set_mode(allowed_root, 0o755);
        set_mode(&workers, 0o755);

        let path = workers.join(format!("{}{}", WORKER_PREFIX, Uuid::new_v4().simple()));
        fs::create_dir(&path).map_err(|e| {
            SandboxError::Workspace(format!("failed to create {}: {}", path.display(), e))
        })?;
        set_mode(&path, 0o755);

        log::debug!("Created worker dir {}", path.display());
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the snippet file, readable by the dropped-privilege user.
    pub fn write_snippet(&self, snippet: &str) -> Result<PathBuf> {
        let script = self.path.join(SNIPPET_NAME);
        fs::write(&script, snippet).map_err(|e| {
            SandboxError::Workspace(format!("failed to write {}: {}", script.display(), e))
        })?;
        set_mode(&script, 0o644);
        Ok(script)
    }

    /// Best-effort removal; errors are logged, never raised.
    pub fn cleanup(&self) {
        if self.path.exists() {
            if let Err(err) = fs::remove_dir_all(&self.path) {
                log::warn!("Failed to remove worker dir {}: {}", self.path.display(), err);
            }
        }
    }
}

impl Drop for WorkerDir {
    fn drop(&mut self) {
        self.cleanup();
    }
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(err) = fs::set_permissions(path, fs::Permissions::from_mode(mode)) {
        log::warn!("Failed to chmod {:o} on {}: {}", mode, path.display(), err);
    }
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) {}
