// src/cleanup/locks.rs

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::fs::FileSystem;

const LOCK_EXTENSION: &str = "lck";
const MAX_DEPTH: usize = 6;
const SERVER_DIR: &str = ".wineserver";

/// Remove lock files and server-socket artifacts belonging to `prefix`.
///
/// Walks the prefix for `*.lck` files without following symlinks (the
/// prefix's drive mappings point at `/`), then removes the in-prefix server
/// directory and the runtime's socket directory for this prefix. Returns
/// every path that was removed. Failures are logged and skipped.
pub fn remove_locks(fs: &dyn FileSystem, prefix: &Path) -> Vec<PathBuf> {
    let mut removed = Vec::new();
    if !fs.is_dir(prefix) {
        return removed;
    }

    let mut locks = Vec::new();
    collect_locks(fs, prefix, 0, &mut locks);
    for lock in locks {
        match fs.remove_file(&lock) {
            Ok(()) => removed.push(lock),
            Err(e) => warn!(path = %lock.display(), error = %e, "could not remove lock file"),
        }
    }

    let mut dirs = vec![prefix.join(SERVER_DIR)];
    dirs.extend(server_socket_dir(fs, prefix));
    for dir in dirs {
        if !fs.exists(&dir) || fs.is_symlink(&dir) {
            continue;
        }
        match fs.remove_dir_all(&dir) {
            Ok(()) => removed.push(dir),
            Err(e) => warn!(path = %dir.display(), error = %e, "could not remove server directory"),
        }
    }

    debug!(prefix = %prefix.display(), count = removed.len(), "lock cleanup finished");
    removed
}

fn collect_locks(fs: &dyn FileSystem, dir: &Path, depth: usize, out: &mut Vec<PathBuf>) {
    let entries = match fs.read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!(dir = %dir.display(), error = %e, "skipping unreadable directory");
            return;
        }
    };

    for entry in entries {
        if fs.is_symlink(&entry) {
            continue;
        }
        if fs.is_dir(&entry) {
            if depth + 1 < MAX_DEPTH {
                collect_locks(fs, &entry, depth + 1, out);
            }
        } else if entry.extension().is_some_and(|ext| ext == LOCK_EXTENSION) {
            out.push(entry);
        }
    }
}

/// Socket directory the runtime server creates for `prefix`:
/// `<tmp>/.wine-<uid>/server-<dev>-<inode>`.
///
/// `None` when the prefix does not exist.
pub fn server_socket_dir(fs: &dyn FileSystem, prefix: &Path) -> Option<PathBuf> {
    let (dev, ino) = fs.device_inode(prefix)?;
    let uid = nix::unistd::getuid();
    Some(
        std::env::temp_dir()
            .join(format!(".wine-{uid}"))
            .join(format!("server-{dev:x}-{ino:x}")),
    )
}
