//! Kernel directory management.
//!
//! Provides the directory layout shared by the CLI and embedding hosts.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Directory structure of a kernel installation.
///
/// All files live under a `.jotter` directory in the user's home:
///
/// ```text
/// ~/.jotter/
/// ├── cache/      # Pinned library descriptors
/// └── libraries/  # User-provided <name>.json descriptors
/// ```
#[derive(Debug, Clone)]
pub struct KernelDirs {
    /// The `.jotter` directory itself.
    pub home_dir: PathBuf,

    /// Descriptor cache.
    pub cache_dir: PathBuf,

    /// Directory searched for user library descriptors.
    pub libraries_dir: PathBuf,
}

impl KernelDirs {
    /// Directory structure under the current user's home.
    ///
    /// # Errors
    /// Returns an error if the home directory is unknown or directory
    /// creation fails.
    pub fn from_user_home() -> Result<Self> {
        let home = dirs::home_dir().ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "home directory not found",
            ))
        })?;
        Self::from_home(&home)
    }

    /// Directory structure under `home`.
    ///
    /// Creates all necessary directories if they don't exist.
    pub fn from_home(home: &Path) -> Result<Self> {
        let home_dir = home.join(".jotter");
        let cache_dir = home_dir.join("cache");
        let libraries_dir = home_dir.join("libraries");

        fs::create_dir_all(&cache_dir)?;
        fs::create_dir_all(&libraries_dir)?;

        Ok(Self {
            home_dir,
            cache_dir,
            libraries_dir,
        })
    }

    /// Remove cached descriptors, keeping user libraries.
    pub fn clean_cache(&self) -> Result<()> {
        if self.cache_dir.exists() {
            fs::remove_dir_all(&self.cache_dir)?;
        }
        fs::create_dir_all(&self.cache_dir)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_from_home() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let dirs = KernelDirs::from_home(temp.path()).expect("Failed to create dirs");

        assert!(dirs.home_dir.ends_with(".jotter"));
        assert!(dirs.cache_dir.exists());
        assert!(dirs.libraries_dir.exists());
    }

    #[test]
    fn test_clean_cache_keeps_libraries() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let dirs = KernelDirs::from_home(temp.path()).expect("Failed to create dirs");

        let cached = dirs.cache_dir.join("plots.json");
        let user = dirs.libraries_dir.join("mine.json");
        fs::write(&cached, "{}").unwrap();
        fs::write(&user, "{}").unwrap();

        dirs.clean_cache().expect("Failed to clean");
        assert!(!cached.exists());
        assert!(dirs.cache_dir.exists());
        assert!(user.exists());
    }
}
