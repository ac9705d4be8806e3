//! On-disk descriptor cache.
//!
//! The cache is shared between sessions and processes. Entries are keyed by
//! the strategy's identity key (which embeds the pinned content identifier)
//! and the library name:
//!
//! ```text
//! cache/
//! └── ref_3f2c9a.../
//!     ├── plots.json       # Descriptor text
//!     └── global.options   # Repository-wide options, if any
//! ```
//!
//! Writes go to a temporary file that is renamed into place, so readers
//! never observe a partial entry.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::library::reference::{LibraryReference, sanitize_key};

/// File name of the repository-wide options next to cached descriptors.
pub const GLOBAL_OPTIONS_FILE: &str = "global.options";

/// A cached descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedDescriptor {
    pub text: String,
    pub global_options: Option<String>,
}

/// Descriptor cache rooted at a directory.
#[derive(Debug, Clone)]
pub struct DiskCache {
    root: PathBuf,
}

impl DiskCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Cache root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_dir(&self, reference: &LibraryReference) -> PathBuf {
        self.root.join(reference.strategy.key())
    }

    /// Path of the cached descriptor for a reference.
    pub fn descriptor_path(&self, reference: &LibraryReference) -> PathBuf {
        self.entry_dir(reference)
            .join(format!("{}.json", sanitize_key(&reference.name)))
    }

    /// Load a cached descriptor.
    ///
    /// Returns `Ok(None)` when there is no entry.
    pub fn load(&self, reference: &LibraryReference) -> Result<Option<CachedDescriptor>> {
        let path = self.descriptor_path(reference);
        if !path.exists() {
            tracing::debug!("No cached descriptor at {:?}", path);
            return Ok(None);
        }

        let text = fs::read_to_string(&path)?;
        let options_path = self.entry_dir(reference).join(GLOBAL_OPTIONS_FILE);
        let global_options = if options_path.exists() {
            Some(fs::read_to_string(&options_path)?)
        } else {
            None
        };

        tracing::debug!("Loaded cached descriptor {:?}", path);
        Ok(Some(CachedDescriptor {
            text,
            global_options,
        }))
    }

    /// Store a descriptor and its global options.
    pub fn save(&self, reference: &LibraryReference, entry: &CachedDescriptor) -> Result<()> {
        let dir = self.entry_dir(reference);
        fs::create_dir_all(&dir)?;

        write_atomic(&self.descriptor_path(reference), &entry.text)?;
        if let Some(options) = &entry.global_options {
            write_atomic(&dir.join(GLOBAL_OPTIONS_FILE), options)?;
        }

        tracing::debug!(
            "Cached descriptor for {} ({} bytes)",
            reference,
            entry.text.len()
        );
        Ok(())
    }

    /// Remove every cached entry.
    pub fn clean(&self) -> Result<()> {
        if self.root.exists() {
            fs::remove_dir_all(&self.root)?;
            tracing::debug!("Removed descriptor cache at {:?}", self.root);
        }
        Ok(())
    }
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let dir = path.parent().unwrap_or(Path::new("."));
    let mut file = tempfile::NamedTempFile::new_in(dir)?;
    file.write_all(contents.as_bytes())?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::reference::ResolutionStrategy;
    use tempfile::TempDir;

    fn pinned(name: &str, sha: &str) -> LibraryReference {
        LibraryReference::new(
            name,
            ResolutionStrategy::ByVersionRef {
                reference: "main".into(),
                pinned: Some(sha.into()),
            },
        )
    }

    #[test]
    fn test_save_and_load() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let cache = DiskCache::new(temp.path().join("cache"));
        let reference = pinned("plots", "abc123");

        assert!(cache.load(&reference).unwrap().is_none());

        let entry = CachedDescriptor {
            text: r#"{"init": ["val x = 1"]}"#.into(),
            global_options: Some(r#"{"ignoredPropertyPatterns": []}"#.into()),
        };
        cache.save(&reference, &entry).unwrap();

        assert!(cache.descriptor_path(&reference).ends_with("ref_abc123/plots.json"));
        assert_eq!(cache.load(&reference).unwrap(), Some(entry));
    }

    #[test]
    fn test_entries_keyed_by_pin() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let cache = DiskCache::new(temp.path());
        let entry = CachedDescriptor {
            text: "{}".into(),
            global_options: None,
        };
        cache.save(&pinned("plots", "abc123"), &entry).unwrap();

        assert!(cache.load(&pinned("plots", "def456")).unwrap().is_none());
        assert!(cache.load(&pinned("plots", "abc123")).unwrap().is_some());
    }

    #[test]
    fn test_no_temp_files_left() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let cache = DiskCache::new(temp.path());
        let reference = pinned("plots", "abc123");
        let entry = CachedDescriptor {
            text: "{}".into(),
            global_options: None,
        };
        cache.save(&reference, &entry).unwrap();
        cache.save(&reference, &entry).unwrap();

        let files: Vec<_> = fs::read_dir(temp.path().join("ref_abc123"))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(files, vec![std::ffi::OsString::from("plots.json")]);
    }

    #[test]
    fn test_clean() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let cache = DiskCache::new(temp.path().join("cache"));
        cache
            .save(
                &pinned("plots", "abc"),
                &CachedDescriptor {
                    text: "{}".into(),
                    global_options: None,
                },
            )
            .unwrap();
        cache.clean().unwrap();
        assert!(!cache.root().exists());
        // Cleaning twice is fine
        cache.clean().unwrap();
    }
}
