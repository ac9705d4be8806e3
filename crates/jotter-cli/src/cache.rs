//! Cache command implementation.

use std::path::PathBuf;

use jotter_core::library::DiskCache;
use jotter_core::{KernelDirs, SessionConfig};

use crate::colors;

fn cache_dir(config: &SessionConfig, dirs: &KernelDirs) -> PathBuf {
    config
        .cache_dir
        .clone()
        .unwrap_or_else(|| dirs.cache_dir.clone())
}

/// Remove every cached descriptor.
pub fn clean(config: &SessionConfig, dirs: &KernelDirs) -> anyhow::Result<()> {
    match &config.cache_dir {
        Some(dir) => DiskCache::new(dir).clean()?,
        None => dirs.clean_cache()?,
    }
    println!(
        "{}Cleaned{} {}",
        colors::GREEN,
        colors::RESET,
        cache_dir(config, dirs).display()
    );
    Ok(())
}

pub fn print_path(config: &SessionConfig, dirs: &KernelDirs) {
    println!("{}", cache_dir(config, dirs).display());
}
