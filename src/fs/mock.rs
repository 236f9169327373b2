// src/fs/mock.rs

use super::FileSystem;
use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone)]
pub enum MockEntry {
    File { content: Vec<u8>, modified: u64 },
    Dir(Vec<String>), // List of child names
}

/// In-memory filesystem with a logical clock.
///
/// Every write advances the clock by one tick, so a file written later is
/// always strictly newer. Clones share the same tree.
#[derive(Debug, Clone)]
pub struct MockFileSystem {
    files: Arc<Mutex<HashMap<PathBuf, MockEntry>>>,
    clock: Arc<AtomicU64>,
}

impl Default for MockFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl MockFileSystem {
    pub fn new() -> Self {
        let mut files = HashMap::new();
        // Ensure root exists
        files.insert(PathBuf::from("."), MockEntry::Dir(Vec::new()));

        Self {
            files: Arc::new(Mutex::new(files)),
            clock: Arc::new(AtomicU64::new(0)),
        }
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Current logical time (the tick of the latest write).
    pub fn now(&self) -> u64 {
        self.clock.load(Ordering::SeqCst)
    }

    pub fn add_file(&self, path: impl AsRef<Path>, content: impl Into<Vec<u8>>) {
        let stamp = self.tick();
        self.insert_file(path.as_ref(), content.into(), stamp);
    }

    /// Add a file with an explicit modification tick (does not advance the clock).
    pub fn add_file_at(&self, path: impl AsRef<Path>, content: impl Into<Vec<u8>>, tick: u64) {
        self.insert_file(path.as_ref(), content.into(), tick);
    }

    /// Bump the modification time of an existing file to a fresh tick.
    pub fn touch(&self, path: impl AsRef<Path>) -> Result<()> {
        let stamp = self.tick();
        self.set_modified(path, stamp)
    }

    pub fn set_modified(&self, path: impl AsRef<Path>, tick: u64) -> Result<()> {
        let key = normalize(path.as_ref());
        let mut files = self.files.lock().unwrap();
        match files.get_mut(&key) {
            Some(MockEntry::File { modified, .. }) => {
                *modified = tick;
                Ok(())
            }
            _ => Err(anyhow!("File not found: {:?}", key)),
        }
    }

    fn insert_file(&self, path: &Path, content: Vec<u8>, modified: u64) {
        let path = normalize(path);
        let mut files = self.files.lock().unwrap();
        files.insert(path.clone(), MockEntry::File { content, modified });

        // Ensure parent directories exist implicitly for simplicity in this mock
        let parent = parent_of(&path);
        self.ensure_dir_entry(&mut files, &parent);
        link_child(&mut files, &parent, &path);
    }

    fn ensure_dir_entry(&self, files: &mut HashMap<PathBuf, MockEntry>, path: &Path) {
        if files.contains_key(path) {
            return;
        }
        files.insert(path.to_path_buf(), MockEntry::Dir(Vec::new()));
        let parent = parent_of(path);
        if parent != path {
            // Avoid infinite loop at root
            self.ensure_dir_entry(files, &parent);
            link_child(files, &parent, path);
        }
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

fn parent_of(path: &Path) -> PathBuf {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Strip leading `./` components so `./a/b` and `a/b` address the same entry.
fn normalize(path: &Path) -> PathBuf {
    let mut s = path.to_string_lossy().replace('\\', "/");
    while let Some(rest) = s.strip_prefix("./") {
        s = rest.to_string();
    }
    let s = s.trim_end_matches('/');
    if s.is_empty() || s == "." {
        PathBuf::from(".")
    } else {
        PathBuf::from(s)
    }
}

fn tick_to_time(tick: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(tick)
}

impl FileSystem for MockFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String> {
        let key = normalize(path);
        let files = self.files.lock().unwrap();
        match files.get(&key) {
            Some(MockEntry::File { content, .. }) => {
                String::from_utf8(content.clone()).map_err(|e| anyhow!("Invalid UTF-8: {}", e))
            }
            Some(MockEntry::Dir(_)) => Err(anyhow!("Is a directory: {:?}", path)),
            None => Err(anyhow!("File not found: {:?}", path)),
        }
    }

    fn open_read(&self, path: &Path) -> Result<Box<dyn Read + Send>> {
        let key = normalize(path);
        let files = self.files.lock().unwrap();
        match files.get(&key) {
            Some(MockEntry::File { content, .. }) => Ok(Box::new(Cursor::new(content.clone()))),
            Some(MockEntry::Dir(_)) => Err(anyhow!("Is a directory: {:?}", path)),
            None => Err(anyhow!("File not found: {:?}", path)),
        }
    }

    fn write(&self, path: &Path, contents: &[u8]) -> Result<()> {
        self.add_file(path, contents);
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        let files = self.files.lock().unwrap();
        files.contains_key(&normalize(path))
    }

    fn is_file(&self, path: &Path) -> bool {
        let files = self.files.lock().unwrap();
        matches!(files.get(&normalize(path)), Some(MockEntry::File { .. }))
    }

    fn is_dir(&self, path: &Path) -> bool {
        let files = self.files.lock().unwrap();
        matches!(files.get(&normalize(path)), Some(MockEntry::Dir(_)))
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let files = self.files.lock().unwrap();
        match files.get(&normalize(path)) {
            Some(MockEntry::Dir(children)) => {
                Ok(children.iter().map(|name| path.join(name)).collect())
            }
            _ => Err(anyhow!("Not a directory or not found: {:?}", path)),
        }
    }

    fn modified(&self, path: &Path) -> Result<SystemTime> {
        let files = self.files.lock().unwrap();
        match files.get(&normalize(path)) {
            Some(MockEntry::File { modified, .. }) => Ok(tick_to_time(*modified)),
            Some(MockEntry::Dir(_)) => Err(anyhow!("Is a directory: {:?}", path)),
            None => Err(anyhow!("File not found: {:?}", path)),
        }
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        let key = normalize(path);
        let mut files = self.files.lock().unwrap();
        if let Some(MockEntry::File { .. }) = files.get(&key) {
            return Err(anyhow!("Not a directory: {:?}", path));
        }
        self.ensure_dir_entry(&mut files, &key);
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        let key = normalize(path);
        let mut files = self.files.lock().unwrap();
        match files.get(&key) {
            Some(MockEntry::File { .. }) => {
                files.remove(&key);
                let parent = parent_of(&key);
                if let (Some(MockEntry::Dir(children)), Some(name)) = (
                    files.get_mut(&parent),
                    key.file_name().and_then(|n| n.to_str()),
                ) {
                    children.retain(|c| c != name);
                }
                Ok(())
            }
            _ => Err(anyhow!("File not found: {:?}", path)),
        }
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        let (content, modified) = {
            let files = self.files.lock().unwrap();
            match files.get(&normalize(from)) {
                Some(MockEntry::File { content, modified }) => (content.clone(), *modified),
                _ => return Err(anyhow!("File not found: {:?}", from)),
            }
        };
        self.remove_file(from)?;
        self.insert_file(to, content, modified);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn later_writes_are_strictly_newer() {
        let fs = MockFileSystem::new();
        fs.add_file("a.txt", "a");
        fs.add_file("./b.txt", "b");
        let a = fs.modified(Path::new("./a.txt")).unwrap();
        let b = fs.modified(Path::new("b.txt")).unwrap();
        assert!(a < b);

        fs.touch("a.txt").unwrap();
        assert!(fs.modified(Path::new("a.txt")).unwrap() > b);
    }

    #[test]
    fn read_dir_lists_nested_children() {
        let fs = MockFileSystem::new();
        fs.add_file("data/x.fastq", "");
        let root = fs.read_dir(Path::new(".")).unwrap();
        assert_eq!(root, vec![PathBuf::from("./data")]);
        assert!(fs.is_dir(Path::new("data")));
        let inner = fs.read_dir(Path::new("./data")).unwrap();
        assert_eq!(inner, vec![PathBuf::from("./data/x.fastq")]);
    }

    #[test]
    fn remove_and_rename_keep_directory_listing_consistent() {
        let fs = MockFileSystem::new();
        fs.add_file("out.bam", "partial");
        fs.create_dir_all(Path::new(".pipedag/quarantine")).unwrap();
        fs.rename(Path::new("out.bam"), Path::new(".pipedag/quarantine/out.bam"))
            .unwrap();
        assert!(!fs.exists(Path::new("out.bam")));
        assert!(fs.is_file(Path::new(".pipedag/quarantine/out.bam")));
        let root = fs.read_dir(Path::new(".")).unwrap();
        assert_eq!(root, vec![PathBuf::from("./.pipedag")]);
    }
}
