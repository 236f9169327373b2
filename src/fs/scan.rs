// src/fs/scan.rs

//! Recursive file listing relative to the project root.

use std::path::Path;

use anyhow::Result;
use globset::GlobSet;
use tracing::trace;

use super::FileSystem;

/// Convert a path into a string relative to `root`, with forward slashes.
///
/// Returns `None` if `path` is not under `root`.
pub fn relative_str(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let s = rel.to_string_lossy().replace('\\', "/");
    let s = s.trim_start_matches("./").to_string();
    if s.is_empty() { None } else { Some(s) }
}

/// List every file under `root` as a sorted, `/`-separated relative path.
///
/// Directories named in `skip_dirs` (relative paths, e.g. the state directory)
/// are not descended into; files matching `exclude` are dropped.
pub fn list_files(
    fs: &dyn FileSystem,
    root: &Path,
    skip_dirs: &[String],
    exclude: &GlobSet,
) -> Result<Vec<String>> {
    let mut out = Vec::new();
    let mut stack = vec![root.to_path_buf()];

    while let Some(dir) = stack.pop() {
        for entry in fs.read_dir(&dir)? {
            let Some(rel) = relative_str(root, &entry) else {
                continue;
            };
            if fs.is_dir(&entry) {
                if skip_dirs.iter().any(|d| d == &rel) {
                    trace!(dir = %rel, "skipping directory");
                    continue;
                }
                stack.push(entry);
            } else if fs.is_file(&entry) {
                if exclude.is_match(&rel) {
                    trace!(file = %rel, "excluded from listing");
                    continue;
                }
                out.push(rel);
            }
        }
    }

    out.sort();
    out.dedup();
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::mock::MockFileSystem;
    use crate::pattern::build_globset;

    #[test]
    fn lists_relative_paths_and_skips_state_dir() {
        let fs = MockFileSystem::new();
        fs.add_file("a.fastq.gz", "");
        fs.add_file("sub/b.fastq.gz", "");
        fs.add_file(".pipedag/state.json", "{}");
        fs.add_file(".git/HEAD", "");

        let exclude = build_globset(&[".git/**".to_string()]).unwrap();
        let files = list_files(&fs, Path::new("."), &[".pipedag".to_string()], &exclude).unwrap();

        assert_eq!(files, vec!["a.fastq.gz".to_string(), "sub/b.fastq.gz".to_string()]);
    }
}
