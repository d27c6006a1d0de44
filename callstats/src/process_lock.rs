//! Process-level lock so only one refresh writes a summary table at a time.
//!
//! Lock strategy:
//! - `callstats-refresh.lock`, scoped by a hash of the canonical database
//!   path, marks an in-flight refresh of either mode.
//! - Locks are advisory OS file locks (flock), held for process lifetime.
//! - Lock files are never unlinked; the inode must stay stable for flock.
//! - Read-only commands (`show`, `status`) never take the lock.

use anyhow::{Context, Result};
use std::collections::hash_map::DefaultHasher;
use std::fs::{self, File, OpenOptions};
use std::hash::{Hash, Hasher};
use std::io::{self, Seek, SeekFrom, Write};
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};

const REFRESH_LOCK_FILE: &str = "callstats-refresh.lock";

/// Guard held while a refresh runs. Releases the lock on drop.
pub struct RefreshGuard {
    _lock: ProcessLock,
}

/// Acquire the single-writer refresh lock for `db_path`.
///
/// Fails immediately if another refresh already holds it.
pub fn acquire_refresh_guard(db_path: &Path) -> Result<RefreshGuard> {
    match try_acquire_lock(REFRESH_LOCK_FILE, db_path)? {
        Some(lock) => Ok(RefreshGuard { _lock: lock }),
        None => anyhow::bail!(
            "another callstats-refresh is already running against {}",
            db_path.display()
        ),
    }
}

struct ProcessLock {
    file: File,
}

impl Drop for ProcessLock {
    fn drop(&mut self) {
        let _ = unlock_file(&self.file);
    }
}

fn try_acquire_lock(filename: &str, db_path: &Path) -> Result<Option<ProcessLock>> {
    let dir = lock_dir();
    fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create runtime lock directory: {}", dir.display()))?;

    let db_path = canonical_db_path(db_path)?;
    let path = dir.join(scoped_lock_filename(filename, &db_path));
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&path)
        .with_context(|| format!("failed to open lock file: {}", path.display()))?;

    match lock_file_nonblocking(&file) {
        Ok(()) => {
            // Owner info for debugging
            let _ = file.set_len(0);
            let _ = file.seek(SeekFrom::Start(0));
            let _ = writeln!(file, "pid={}", std::process::id());
            let _ = file.flush();

            tracing::debug!(lock = %path.display(), "Acquired refresh lock");
            Ok(Some(ProcessLock { file }))
        }
        Err(e) if is_lock_busy(&e) => Ok(None),
        Err(e) => Err(e).with_context(|| format!("failed to lock file: {}", path.display())),
    }
}

fn lock_dir() -> PathBuf {
    let mut dir = match std::env::var_os("XDG_RUNTIME_DIR") {
        Some(path) if !path.is_empty() => PathBuf::from(path),
        _ => std::env::temp_dir(),
    };
    dir.push("callstats");
    dir
}

/// Resolve `db_path` to one spelling per file so `./x.db`, `/abs/x.db` and
/// symlinked directories all share a lock.
///
/// The database file may not exist yet, so the parent directory is created
/// and canonicalized instead.
fn canonical_db_path(db_path: &Path) -> Result<PathBuf> {
    if let Ok(path) = fs::canonicalize(db_path) {
        return Ok(path);
    }

    let file_name = db_path
        .file_name()
        .with_context(|| format!("database path has no file name: {}", db_path.display()))?;
    let parent = match db_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)
        .with_context(|| format!("failed to create database directory: {}", parent.display()))?;
    let parent = fs::canonicalize(parent)
        .with_context(|| format!("failed to resolve database directory: {}", parent.display()))?;
    Ok(parent.join(file_name))
}

fn scoped_lock_filename(base_filename: &str, db_path: &Path) -> String {
    let mut hasher = DefaultHasher::new();
    db_path.to_string_lossy().hash(&mut hasher);
    let digest = hasher.finish();
    format!("{base_filename}.{digest:016x}")
}

fn is_lock_busy(error: &io::Error) -> bool {
    matches!(error.kind(), io::ErrorKind::WouldBlock)
        || matches!(error.raw_os_error(), Some(11) | Some(35))
}

#[cfg(unix)]
fn lock_file_nonblocking(file: &File) -> io::Result<()> {
    const LOCK_EX: i32 = 2;
    const LOCK_NB: i32 = 4;
    let fd = file.as_raw_fd();
    // SAFETY: flock is called with a valid file descriptor and constant flags.
    let rc = unsafe { flock(fd, LOCK_EX | LOCK_NB) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(unix)]
fn unlock_file(file: &File) -> io::Result<()> {
    const LOCK_UN: i32 = 8;
    let fd = file.as_raw_fd();
    // SAFETY: flock is called with a valid file descriptor and constant flags.
    let rc = unsafe { flock(fd, LOCK_UN) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(unix)]
extern "C" {
    fn flock(fd: i32, operation: i32) -> i32;
}

#[cfg(not(unix))]
compile_error!("callstats process locks currently require Unix (macOS/Linux)");
