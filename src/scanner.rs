use globset::GlobSet;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::IndexerConfig;
use crate::error::{IndexError, Result};
use crate::types::SourceFile;

/// Discovers candidate C/C++ files under a root path.
#[derive(Debug, Clone)]
pub struct SourceEnumerator {
    root: PathBuf,
    extensions: Vec<String>,
    exclude: GlobSet,
    follow_symlinks: bool,
    max_file_size: u64,
}

impl SourceEnumerator {
    /// Fails with `IndexError::Io` when the root cannot be read.
    pub fn new(root: impl AsRef<Path>, config: &IndexerConfig) -> Result<Self> {
        let root = root.as_ref();
        let root = fs::canonicalize(root).map_err(|e| IndexError::io(root, e))?;
        let metadata = fs::metadata(&root).map_err(|e| IndexError::io(&root, e))?;
        if metadata.is_dir() {
            fs::read_dir(&root).map_err(|e| IndexError::io(&root, e))?;
        }

        Ok(Self {
            root,
            extensions: config.extensions.clone(),
            exclude: config.exclude_set()?,
            follow_symlinks: config.follow_symlinks,
            max_file_size: config.max_file_size,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Start a fresh walk. Each call restarts from the root.
    pub fn iter(&self) -> SourceFiles<'_> {
        let walker = WalkDir::new(&self.root)
            .follow_links(self.follow_symlinks)
            .sort_by_file_name()
            .into_iter();

        SourceFiles {
            enumerator: self,
            walker,
            visited: HashSet::new(),
        }
    }

    fn is_excluded(&self, path: &Path) -> bool {
        if self.exclude.is_empty() {
            return false;
        }
        if self.exclude.is_match(path) {
            return true;
        }
        path.strip_prefix(&self.root)
            .map(|relative| !relative.as_os_str().is_empty() && self.exclude.is_match(relative))
            .unwrap_or(false)
    }

    fn has_known_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| {
                let ext = ext.to_ascii_lowercase();
                self.extensions.iter().any(|known| *known == ext)
            })
            .unwrap_or(false)
    }
}

/// Lazy walk over one enumeration; finite even with symlink cycles.
pub struct SourceFiles<'a> {
    enumerator: &'a SourceEnumerator,
    walker: walkdir::IntoIter,
    visited: HashSet<PathBuf>,
}

impl Iterator for SourceFiles<'_> {
    type Item = SourceFile;

    fn next(&mut self) -> Option<SourceFile> {
        loop {
            let entry = match self.walker.next()? {
                Ok(entry) => entry,
                Err(e) => {
                    // Loops detected by walkdir land here as well.
                    warn!("Skipping unreadable entry: {}", e);
                    continue;
                }
            };

            let path = entry.path();
            if entry.file_type().is_dir() {
                if entry.depth() > 0 && self.enumerator.is_excluded(path) {
                    debug!("Pruning excluded directory {}", path.display());
                    self.walker.skip_current_dir();
                }
                continue;
            }

            if !entry.file_type().is_file() || !self.enumerator.has_known_extension(path) {
                continue;
            }
            if self.enumerator.is_excluded(path) {
                debug!("Excluded {}", path.display());
                continue;
            }

            let real = match fs::canonicalize(path) {
                Ok(real) => real,
                Err(e) => {
                    warn!("Skipping {}: {}", path.display(), e);
                    continue;
                }
            };
            if !self.visited.insert(real.clone()) {
                debug!("Already visited {} via another link", real.display());
                continue;
            }

            let size = match entry.metadata() {
                Ok(metadata) => metadata.len(),
                Err(e) => {
                    warn!("Skipping {}: {}", path.display(), e);
                    continue;
                }
            };
            if self.enumerator.max_file_size > 0 && size > self.enumerator.max_file_size {
                warn!(
                    "Skipping {}: {} bytes exceeds the {} byte limit",
                    path.display(),
                    size,
                    self.enumerator.max_file_size
                );
                continue;
            }

            return Some(SourceFile { path: real, size });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_tree() -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("src/net")).unwrap();
        fs::create_dir_all(root.join("third_party/zlib")).unwrap();
        fs::write(root.join("src/main.c"), "int main(void) { return 0; }\n").unwrap();
        fs::write(root.join("src/net/socket.cpp"), "void f() {}\n").unwrap();
        fs::write(root.join("src/net/socket.h"), "void f();\n").unwrap();
        fs::write(root.join("src/README.md"), "# docs\n").unwrap();
        fs::write(root.join("third_party/zlib/inflate.c"), "void g(void) {}\n").unwrap();
        dir
    }

    fn names(files: &[SourceFile]) -> Vec<String> {
        files
            .iter()
            .map(|f| f.path.file_name().unwrap().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_enumerates_recognized_extensions() {
        let dir = create_tree();
        let enumerator = SourceEnumerator::new(dir.path(), &IndexerConfig::default()).unwrap();
        let files: Vec<_> = enumerator.iter().collect();

        assert_eq!(
            names(&files),
            vec!["main.c", "socket.cpp", "socket.h", "inflate.c"]
        );
        assert!(files.iter().all(|f| f.path.is_absolute()));
        assert!(files.iter().all(|f| f.size > 0));
    }

    #[test]
    fn test_iteration_is_restartable() {
        let dir = create_tree();
        let enumerator = SourceEnumerator::new(dir.path(), &IndexerConfig::default()).unwrap();
        let first: Vec<_> = enumerator.iter().collect();
        let second: Vec<_> = enumerator.iter().collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_exclude_prunes_directories() {
        let dir = create_tree();
        let config = IndexerConfig {
            exclude: vec!["third_party".to_string(), "**/*.h".to_string()],
            ..IndexerConfig::default()
        };
        let enumerator = SourceEnumerator::new(dir.path(), &config).unwrap();
        let files: Vec<_> = enumerator.iter().collect();
        assert_eq!(names(&files), vec!["main.c", "socket.cpp"]);
    }

    #[test]
    fn test_single_file_root() {
        let dir = create_tree();
        let file = dir.path().join("src/main.c");
        let enumerator = SourceEnumerator::new(&file, &IndexerConfig::default()).unwrap();
        assert_eq!(names(&enumerator.iter().collect::<Vec<_>>()), vec!["main.c"]);

        let readme = dir.path().join("src/README.md");
        let enumerator = SourceEnumerator::new(&readme, &IndexerConfig::default()).unwrap();
        assert_eq!(enumerator.iter().count(), 0);
    }

    #[test]
    fn test_missing_root_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = SourceEnumerator::new(dir.path().join("nope"), &IndexerConfig::default()).unwrap_err();
        assert!(matches!(err, IndexError::Io { .. }));
    }

    #[test]
    fn test_oversized_files_are_skipped() {
        let dir = create_tree();
        let config = IndexerConfig {
            max_file_size: 11,
            ..IndexerConfig::default()
        };
        let enumerator = SourceEnumerator::new(dir.path(), &config).unwrap();
        // Only the 10-byte header fits under the limit.
        assert_eq!(names(&enumerator.iter().collect::<Vec<_>>()), vec!["socket.h"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_cycles_terminate_and_aliases_dedupe() {
        let dir = create_tree();
        let root = dir.path();
        std::os::unix::fs::symlink(root, root.join("src/loop")).unwrap();
        std::os::unix::fs::symlink(root.join("src/main.c"), root.join("alias.c")).unwrap();

        let enumerator = SourceEnumerator::new(root, &IndexerConfig::default()).unwrap();
        let files: Vec<_> = enumerator.iter().collect();

        let mut paths: Vec<_> = files.iter().map(|f| f.path.clone()).collect();
        let before = paths.len();
        paths.sort();
        paths.dedup();
        assert_eq!(before, paths.len());
        assert_eq!(files.len(), 4);
    }
}
