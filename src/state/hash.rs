// src/state/hash.rs

//! Content hashing for `use_hash` tasks.

use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use blake3::Hasher;
use tracing::debug;

use crate::fs::FileSystem;

/// Compute the hash of a single file.
pub fn compute_file_hash(fs: &dyn FileSystem, path: &Path) -> Result<String> {
    let mut hasher = Hasher::new();
    let mut file = fs
        .open_read(path)
        .with_context(|| format!("opening file for hashing: {:?}", path))?;
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().to_hex().to_string())
}

/// Deterministic hash over the contents of an instance's inputs.
///
/// Paths are relative to `root`; order does not matter. Each file's name is
/// mixed in so that swapping contents between two inputs changes the hash.
pub fn compute_inputs_hash(fs: &dyn FileSystem, root: &Path, inputs: &[String]) -> Result<String> {
    let mut sorted: Vec<&String> = inputs.iter().collect();
    sorted.sort();

    let mut hasher = Hasher::new();
    for rel in sorted {
        let file_hash = compute_file_hash(fs, &root.join(rel))?;
        hasher.update(rel.as_bytes());
        hasher.update(b"\0");
        hasher.update(file_hash.as_bytes());
    }

    let hash = hasher.finalize().to_hex().to_string();
    debug!(hash = %hash, files = inputs.len(), "computed input hash");
    Ok(hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::mock::MockFileSystem;

    #[test]
    fn hash_follows_content_not_mtime() {
        let fs = MockFileSystem::new();
        fs.add_file("a.txt", "hello");
        fs.add_file("b.txt", "world");
        let inputs = vec!["b.txt".to_string(), "a.txt".to_string()];

        let first = compute_inputs_hash(&fs, Path::new("."), &inputs).unwrap();
        fs.touch("a.txt").unwrap();
        assert_eq!(compute_inputs_hash(&fs, Path::new("."), &inputs).unwrap(), first);

        fs.add_file("a.txt", "changed");
        assert_ne!(compute_inputs_hash(&fs, Path::new("."), &inputs).unwrap(), first);
    }
}
