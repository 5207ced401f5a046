// src/fs/mock.rs

use super::FileSystem;
use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
pub enum MockEntry {
    File { content: Vec<u8>, executable: bool },
    Dir(Vec<String>), // List of child names
    Symlink(PathBuf),
}

/// In-memory filesystem for resolver / detector / inspector tests.
///
/// Paths are stored verbatim; tests should use absolute paths.
#[derive(Debug, Clone, Default)]
pub struct MockFileSystem {
    files: Arc<Mutex<HashMap<PathBuf, MockEntry>>>,
    inodes: Arc<Mutex<HashMap<PathBuf, (u64, u64)>>>,
}

impl MockFileSystem {
    pub fn new() -> Self {
        let mut files = HashMap::new();
        files.insert(PathBuf::from("/"), MockEntry::Dir(Vec::new()));

        Self {
            files: Arc::new(Mutex::new(files)),
            inodes: Arc::default(),
        }
    }

    pub fn add_file(&self, path: impl AsRef<Path>, content: impl Into<Vec<u8>>) {
        self.insert(
            path.as_ref(),
            MockEntry::File {
                content: content.into(),
                executable: false,
            },
        );
    }

    pub fn add_executable(&self, path: impl AsRef<Path>, content: impl Into<Vec<u8>>) {
        self.insert(
            path.as_ref(),
            MockEntry::File {
                content: content.into(),
                executable: true,
            },
        );
    }

    pub fn add_dir(&self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        let mut files = self.files.lock().unwrap();
        self.ensure_dir_entry(&mut files, path);
    }

    pub fn add_symlink(&self, path: impl AsRef<Path>, target: impl Into<PathBuf>) {
        self.insert(path.as_ref(), MockEntry::Symlink(target.into()));
    }

    /// Give `path` a device and inode number for `device_inode`.
    pub fn set_device_inode(&self, path: impl AsRef<Path>, dev: u64, ino: u64) {
        self.inodes
            .lock()
            .unwrap()
            .insert(path.as_ref().to_path_buf(), (dev, ino));
    }

    fn insert(&self, path: &Path, entry: MockEntry) {
        let mut files = self.files.lock().unwrap();
        files.insert(path.to_path_buf(), entry);
        if let Some(parent) = path.parent() {
            self.ensure_dir_entry(&mut files, parent);
            link_child(&mut files, parent, path);
        }
    }

    fn ensure_dir_entry(&self, files: &mut HashMap<PathBuf, MockEntry>, path: &Path) {
        if files.contains_key(path) {
            return;
        }
        files.insert(path.to_path_buf(), MockEntry::Dir(Vec::new()));
        if let Some(parent) = path.parent() {
            if parent != path {
                self.ensure_dir_entry(files, parent);
                link_child(files, parent, path);
            }
        }
    }

    fn resolve(&self, files: &HashMap<PathBuf, MockEntry>, path: &Path) -> Option<MockEntry> {
        let mut current = path.to_path_buf();
        // Bounded so a symlink loop in a fixture cannot hang a test.
        for _ in 0..8 {
            match files.get(&current)? {
                MockEntry::Symlink(target) => current = target.clone(),
                other => return Some(other.clone()),
            }
        }
        None
    }
}

fn link_child(files: &mut HashMap<PathBuf, MockEntry>, parent: &Path, child: &Path) {
    if let Some(MockEntry::Dir(children)) = files.get_mut(parent) {
        if let Some(name) = child.file_name().and_then(|n| n.to_str()) {
            if !children.iter().any(|c| c == name) {
                children.push(name.to_string());
            }
        }
    }
}

impl FileSystem for MockFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String> {
        let files = self.files.lock().unwrap();
        match self.resolve(&files, path) {
            Some(MockEntry::File { content, .. }) => {
                String::from_utf8(content).map_err(|e| anyhow!("Invalid UTF-8: {}", e))
            }
            Some(_) => Err(anyhow!("Is a directory: {:?}", path)),
            None => Err(anyhow!("File not found: {:?}", path)),
        }
    }

    fn open_read(&self, path: &Path) -> Result<Box<dyn Read + Send>> {
        let files = self.files.lock().unwrap();
        match self.resolve(&files, path) {
            Some(MockEntry::File { content, .. }) => Ok(Box::new(Cursor::new(content))),
            Some(_) => Err(anyhow!("Is a directory: {:?}", path)),
            None => Err(anyhow!("File not found: {:?}", path)),
        }
    }

    fn write(&self, path: &Path, contents: &[u8]) -> Result<()> {
        self.add_file(path, contents);
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        let files = self.files.lock().unwrap();
        self.resolve(&files, path).is_some()
    }

    fn is_file(&self, path: &Path) -> bool {
        let files = self.files.lock().unwrap();
        matches!(self.resolve(&files, path), Some(MockEntry::File { .. }))
    }

    fn is_dir(&self, path: &Path) -> bool {
        let files = self.files.lock().unwrap();
        matches!(self.resolve(&files, path), Some(MockEntry::Dir(_)))
    }

    fn is_executable(&self, path: &Path) -> bool {
        let files = self.files.lock().unwrap();
        matches!(
            self.resolve(&files, path),
            Some(MockEntry::File { executable: true, .. })
        )
    }

    fn is_symlink(&self, path: &Path) -> bool {
        let files = self.files.lock().unwrap();
        matches!(files.get(path), Some(MockEntry::Symlink(_)))
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let files = self.files.lock().unwrap();
        match self.resolve(&files, path) {
            Some(MockEntry::Dir(children)) => {
                Ok(children.iter().map(|name| path.join(name)).collect())
            }
            _ => Err(anyhow!("Not a directory or not found: {:?}", path)),
        }
    }

    fn device_inode(&self, path: &Path) -> Option<(u64, u64)> {
        if !self.is_dir(path) && !self.is_file(path) {
            return None;
        }
        self.inodes.lock().unwrap().get(path).copied()
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        let mut files = self.files.lock().unwrap();
        match files.get(path) {
            Some(MockEntry::Dir(_)) => return Err(anyhow!("Is a directory: {:?}", path)),
            None => return Err(anyhow!("File not found: {:?}", path)),
            Some(_) => {}
        }
        files.remove(path);
        unlink_child(&mut files, path);
        Ok(())
    }

    fn remove_dir_all(&self, path: &Path) -> Result<()> {
        let mut files = self.files.lock().unwrap();
        if !files.contains_key(path) {
            return Err(anyhow!("Not found: {:?}", path));
        }
        files.retain(|p, _| !p.starts_with(path));
        unlink_child(&mut files, path);
        Ok(())
    }
}

fn unlink_child(files: &mut HashMap<PathBuf, MockEntry>, path: &Path) {
    let (Some(parent), Some(name)) = (path.parent(), path.file_name().and_then(|n| n.to_str()))
    else {
        return;
    };
    if let Some(MockEntry::Dir(children)) = files.get_mut(parent) {
        children.retain(|c| c != name);
    }
}
