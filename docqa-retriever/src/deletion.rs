//! Resetting a persist directory to an empty, writable state
//!
//! Removing an index directory can fail while the platform still holds file
//! handles or while files are marked read-only. The reset first tries a plain
//! recursive removal, then falls back to a leaf-first walk that clears
//! read-only permissions, retried under a [`RetryPolicy`]. This is a
//! best-effort mitigation: the outcome is verified, never assumed.

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Bounded retries with a fixed delay between attempts. Always at least one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

/// Timing knobs for collection deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeletionOptions {
    pub retry: RetryPolicy,
    /// Pause between releasing handles and touching the filesystem
    pub reclaim_pause: Duration,
}

impl Default for DeletionOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            reclaim_pause: Duration::from_millis(200),
        }
    }
}

/// What happened during a deletion, phase by phase.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeletionReport {
    /// True only if the directory ended empty and writable
    pub success: bool,
    pub messages: Vec<String>,
    pub errors: Vec<String>,
}

impl DeletionReport {
    pub(crate) fn message(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!("{message}");
        self.messages.push(message);
    }

    pub(crate) fn warning(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!("{message}");
        self.messages.push(message);
    }

    pub(crate) fn error(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::error!("{message}");
        self.errors.push(message);
    }
}

/// Remove `dir` and recreate it empty. Handles on files inside must already be released.
pub async fn reset_directory(dir: &Path, options: &DeletionOptions, report: &mut DeletionReport) {
    let exists = match tokio::fs::symlink_metadata(dir).await {
        Ok(_) => true,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
        Err(e) => {
            report.error(format!("Cannot inspect {}: {e}", dir.display()));
            return;
        }
    };

    let removed = if exists {
        tokio::time::sleep(options.reclaim_pause).await;
        report.message(format!(
            "Waited {}ms for file handles to be released",
            options.reclaim_pause.as_millis()
        ));
        remove_directory(dir, &options.retry, report).await
    } else {
        report.message(format!(
            "Persist directory {} does not exist, nothing to delete",
            dir.display()
        ));
        true
    };

    if !removed {
        report.success = false;
        return;
    }

    if let Err(e) = tokio::fs::create_dir_all(dir).await {
        report.error(format!("Failed to recreate {}: {e}", dir.display()));
        report.success = false;
        return;
    }
    report.message(format!("Recreated empty directory {}", dir.display()));

    match verify_directory(dir).await {
        Ok(()) => {
            report.message("Verified directory is empty and writable");
            report.success = true;
        }
        Err(problem) => {
            report.error(problem);
            report.success = false;
        }
    }
}

async fn remove_directory(dir: &Path, policy: &RetryPolicy, report: &mut DeletionReport) -> bool {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {
            report.message(format!("Removed directory {}", dir.display()));
            return true;
        }
        Err(e) => report.warning(format!(
            "Recursive removal of {} failed ({e}), retrying file by file",
            dir.display()
        )),
    }

    for attempt in 1..=policy.max_attempts() {
        let target = dir.to_path_buf();
        let failures = match tokio::task::spawn_blocking(move || remove_tree(&target)).await {
            Ok(failures) => failures,
            Err(e) => vec![format!("removal task failed: {e}")],
        };

        if failures.is_empty() {
            report.message(format!(
                "Removed directory {} on walked attempt {attempt}",
                dir.display()
            ));
            return true;
        }

        if attempt == policy.max_attempts() {
            for failure in failures {
                report.error(failure);
            }
            report.error(format!(
                "Gave up removing {} after {attempt} attempts",
                dir.display()
            ));
        } else {
            for failure in failures {
                report.warning(format!("Attempt {attempt}: {failure}"));
            }
            tokio::time::sleep(policy.delay()).await;
        }
    }
    false
}

/// Leaf-first removal of `dir`. Returns one message per path that could not be removed.
fn remove_tree(dir: &Path) -> Vec<String> {
    let mut failures = Vec::new();
    remove_entries(dir, &mut failures);
    clear_readonly(dir);
    if let Err(e) = std::fs::remove_dir(dir) {
        if e.kind() != std::io::ErrorKind::NotFound {
            failures.push(format!("{}: {e}", dir.display()));
        }
    }
    failures
}

fn remove_entries(dir: &Path, failures: &mut Vec<String>) {
    clear_readonly(dir);
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            failures.push(format!("{}: {e}", dir.display()));
            return;
        }
    };

    let paths: Vec<PathBuf> = entries.filter_map(|e| e.ok()).map(|e| e.path()).collect();
    for path in paths {
        let is_dir = std::fs::symlink_metadata(&path)
            .map(|m| m.is_dir())
            .unwrap_or(false);
        let result = if is_dir {
            remove_entries(&path, failures);
            clear_readonly(&path);
            std::fs::remove_dir(&path)
        } else {
            clear_readonly(&path);
            std::fs::remove_file(&path)
        };
        if let Err(e) = result {
            failures.push(format!("{}: {e}", path.display()));
        }
    }
}

#[cfg(unix)]
fn clear_readonly(path: &Path) {
    use std::os::unix::fs::PermissionsExt;

    let Ok(metadata) = std::fs::symlink_metadata(path) else {
        return;
    };
    if metadata.file_type().is_symlink() {
        return;
    }
    let mode = if metadata.is_dir() { 0o700 } else { 0o600 };
    if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)) {
        tracing::debug!(path = %path.display(), error = %e, "Could not reset permissions");
    }
}

#[cfg(not(unix))]
fn clear_readonly(path: &Path) {
    let Ok(metadata) = std::fs::symlink_metadata(path) else {
        return;
    };
    let mut permissions = metadata.permissions();
    if permissions.readonly() {
        permissions.set_readonly(false);
        if let Err(e) = std::fs::set_permissions(path, permissions) {
            tracing::debug!(path = %path.display(), error = %e, "Could not clear read-only flag");
        }
    }
}

/// Check that `dir` is a directory, empty, and accepts writes.
pub async fn verify_directory(dir: &Path) -> Result<(), String> {
    let metadata = tokio::fs::metadata(dir)
        .await
        .map_err(|e| format!("{} is not accessible: {e}", dir.display()))?;
    if !metadata.is_dir() {
        return Err(format!("{} is not a directory", dir.display()));
    }

    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| format!("Cannot list {}: {e}", dir.display()))?;
    if let Ok(Some(entry)) = entries.next_entry().await {
        return Err(format!(
            "{} is not empty (found {})",
            dir.display(),
            entry.file_name().to_string_lossy()
        ));
    }

    let probe = dir.join(".docqa-write-probe");
    tokio::fs::write(&probe, b"ok")
        .await
        .map_err(|e| format!("{} is not writable: {e}", dir.display()))?;
    tokio::fs::remove_file(&probe)
        .await
        .map_err(|e| format!("Cannot remove write probe in {}: {e}", dir.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use tracing_test::traced_test;

    fn fast_options(max_attempts: u32) -> DeletionOptions {
        DeletionOptions {
            retry: RetryPolicy::new(max_attempts, Duration::from_millis(10)),
            reclaim_pause: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    #[traced_test]
    async fn test_missing_directory_is_success() {
        let temp = tempdir().unwrap();
        let dir = temp.path().join("never-created");
        let mut report = DeletionReport::default();

        reset_directory(&dir, &fast_options(2), &mut report).await;

        assert!(report.success);
        assert!(report.errors.is_empty());
        assert!(report.messages[0].contains("does not exist"));
        assert!(dir.is_dir());
        assert!(logs_contain("nothing to delete"));
    }

    #[tokio::test]
    async fn test_removes_nested_tree_and_recreates() {
        let temp = tempdir().unwrap();
        let dir = temp.path().join("store");
        std::fs::create_dir_all(dir.join("a/b")).unwrap();
        std::fs::write(dir.join("a/b/data.bin"), b"vectors").unwrap();
        std::fs::write(dir.join("top.sqlite3"), b"db").unwrap();

        let mut report = DeletionReport::default();
        reset_directory(&dir, &fast_options(2), &mut report).await;

        assert!(report.success, "errors: {:?}", report.errors);
        assert!(dir.is_dir());
        assert_eq!(std::fs::read_dir(&dir).unwrap().count(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_readonly_tree_is_removed() {
        use std::os::unix::fs::PermissionsExt;

        let temp = tempdir().unwrap();
        let dir = temp.path().join("store");
        let locked = dir.join("locked");
        std::fs::create_dir_all(&locked).unwrap();
        let file = locked.join("segment.bin");
        std::fs::write(&file, b"data").unwrap();
        std::fs::set_permissions(&file, std::fs::Permissions::from_mode(0o400)).unwrap();
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o500)).unwrap();

        let mut report = DeletionReport::default();
        reset_directory(&dir, &fast_options(3), &mut report).await;

        assert!(report.success, "errors: {:?}", report.errors);
        assert!(!locked.exists());
    }

    #[tokio::test]
    async fn test_unremovable_path_reports_each_attempt() {
        let temp = tempdir().unwrap();
        let dir = temp.path().join("store");
        std::fs::write(&dir, b"a file where the directory should be").unwrap();

        let mut report = DeletionReport::default();
        reset_directory(&dir, &fast_options(2), &mut report).await;

        assert!(!report.success);
        assert!(report.messages.iter().any(|m| m.starts_with("Attempt 1:")));
        assert!(report.errors.iter().any(|e| e.contains("after 2 attempts")));
    }

    #[tokio::test]
    async fn test_tree_walk_removes_everything() {
        let temp = tempdir().unwrap();
        let dir = temp.path().join("walk");
        std::fs::create_dir_all(dir.join("x/y/z")).unwrap();
        std::fs::write(dir.join("x/y/z/leaf.txt"), b"leaf").unwrap();
        std::fs::write(dir.join("x/mid.txt"), b"mid").unwrap();

        let failures = remove_tree(&dir);

        assert!(failures.is_empty(), "{failures:?}");
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn test_verify_directory() {
        let temp = tempdir().unwrap();
        assert!(verify_directory(temp.path()).await.is_ok());

        std::fs::write(temp.path().join("leftover"), b"x").unwrap();
        let problem = verify_directory(temp.path()).await.unwrap_err();
        assert!(problem.contains("not empty"));

        let problem = verify_directory(&temp.path().join("leftover")).await.unwrap_err();
        assert!(problem.contains("not a directory"));
    }

    #[test]
    fn test_default_policy() {
        let options = DeletionOptions::default();
        assert_eq!(options.retry.max_attempts(), 10);
        assert_eq!(options.retry.delay(), Duration::from_secs(1));
        assert_eq!(options.reclaim_pause, Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_zero_attempts_still_removes_once() {
        let policy = RetryPolicy::new(0, Duration::ZERO);
        assert_eq!(policy.max_attempts(), 1);

        let temp = tempdir().unwrap();
        let dir = temp.path().join("store");
        std::fs::create_dir_all(dir.join("nested")).unwrap();
        std::fs::write(dir.join("nested").join("index.db"), b"x").unwrap();
        let options = DeletionOptions {
            retry: policy,
            reclaim_pause: Duration::ZERO,
        };
        let mut report = DeletionReport::default();

        reset_directory(&dir, &options, &mut report).await;

        assert!(report.success, "{report:?}");
        assert_eq!(std::fs::read_dir(&dir).unwrap().count(), 0);
    }
}
