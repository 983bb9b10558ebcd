// ABOUTME: Run lock enforcing one orchestrator per stack ledger.
// ABOUTME: Atomic file creation with lock info stored beside the ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::LedgerError;
use crate::types::StackName;

/// Information about who holds a run lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    /// Hostname of the machine that holds the lock.
    pub holder: String,
    /// Process ID of the lock holder.
    pub pid: u32,
    /// When the lock was acquired.
    pub started_at: DateTime<Utc>,
    /// Stack being deployed.
    pub stack: String,
}

impl LockInfo {
    /// Create new lock info for the current process.
    pub fn new(stack: &StackName) -> Self {
        Self {
            holder: gethostname::gethostname().to_string_lossy().into_owned(),
            pid: std::process::id(),
            started_at: Utc::now(),
            stack: stack.to_string(),
        }
    }

    /// Check if this lock is stale (older than 1 hour).
    pub fn is_stale(&self) -> bool {
        let age = Utc::now() - self.started_at;
        age.num_hours() >= 1
    }
}

/// A held run lock; concurrent reruns of the same stack are rejected while
/// it exists. Released explicitly; a crash leaves a lock that is broken
/// automatically once stale.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
    stack: StackName,
}

impl RunLock {
    fn lock_path(dir: &Path, stack: &StackName) -> PathBuf {
        dir.join(format!("{stack}.lock"))
    }

    /// Acquire the run lock for a stack.
    ///
    /// Uses `create_new` for atomic acquisition (no TOCTOU race). Returns
    /// `LedgerError::LockHeld` if another live process holds it. Stale
    /// (>1 hour) or corrupt locks are auto-broken with a warning; `force`
    /// breaks any lock.
    pub fn acquire(dir: &Path, stack: &StackName, force: bool) -> Result<Self, LedgerError> {
        std::fs::create_dir_all(dir)?;
        let path = Self::lock_path(dir, stack);

        if Self::try_create(&path, stack)? {
            return Ok(Self {
                path,
                stack: stack.clone(),
            });
        }

        if !Self::should_break(&path, force)? {
            // Lock is active and valid
            if let Ok(content) = std::fs::read_to_string(&path)
                && let Ok(existing) = serde_json::from_str::<LockInfo>(&content)
            {
                return Err(LedgerError::LockHeld {
                    holder: existing.holder,
                    pid: existing.pid,
                    started_at: existing.started_at,
                });
            }
            return Err(LedgerError::Lock(
                "lock held by another process".to_string(),
            ));
        }

        tracing::debug!("removing stale/forced lock at {}", path.display());
        let _ = std::fs::remove_file(&path);

        if !Self::try_create(&path, stack)? {
            return Err(LedgerError::Lock(
                "lock acquired by another process during break".to_string(),
            ));
        }

        Ok(Self {
            path,
            stack: stack.clone(),
        })
    }

    /// Atomically create the lock file. Returns false if it already exists.
    fn try_create(path: &Path, stack: &StackName) -> Result<bool, LedgerError> {
        use std::io::Write;

        let info = LockInfo::new(stack);
        let json = serde_json::to_string(&info)
            .map_err(|e| LedgerError::Lock(format!("failed to serialize lock: {e}")))?;

        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
        {
            Ok(mut file) => {
                file.write_all(json.as_bytes())?;
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(LedgerError::Io(e)),
        }
    }

    /// Check if an existing lock should be broken (stale, forced, or corrupted).
    fn should_break(path: &Path, force: bool) -> Result<bool, LedgerError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(_) => {
                // Can't read lock info - corrupted or gone, break it
                tracing::warn!("lock info unreadable, breaking lock");
                return Ok(true);
            }
        };

        match serde_json::from_str::<LockInfo>(&content) {
            Ok(existing) => {
                if force {
                    tracing::warn!(
                        "breaking lock held by {} (pid {}) since {}",
                        existing.holder,
                        existing.pid,
                        existing.started_at
                    );
                    Ok(true)
                } else if existing.is_stale() {
                    tracing::warn!(
                        "auto-breaking stale lock held by {} (pid {}) since {}",
                        existing.holder,
                        existing.pid,
                        existing.started_at
                    );
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Err(_) => {
                tracing::warn!("lock info corrupted, breaking lock");
                Ok(true)
            }
        }
    }

    pub fn stack(&self) -> &StackName {
        &self.stack
    }

    /// Release the lock.
    pub fn release(self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_info_creates_with_current_host_and_pid() {
        let stack = StackName::new("test-stack").unwrap();
        let info = LockInfo::new(&stack);

        assert_eq!(info.stack, "test-stack");
        assert_eq!(info.pid, std::process::id());
        assert!(!info.holder.is_empty());
    }

    #[test]
    fn fresh_lock_is_not_stale() {
        let stack = StackName::new("test").unwrap();
        let info = LockInfo::new(&stack);
        assert!(!info.is_stale());
    }

    #[test]
    fn old_lock_is_stale() {
        let stack = StackName::new("test").unwrap();
        let mut info = LockInfo::new(&stack);
        // Set to 2 hours ago
        info.started_at = Utc::now() - chrono::Duration::hours(2);
        assert!(info.is_stale());
    }
}
