//! Descriptors bundled with the kernel.
//!
//! Embedded descriptors serve `@embedded` references and are the fallback
//! when a network-backed strategy fails.

use std::path::Path;

use rust_embed::Embed;
use rustc_hash::FxHashMap;

use crate::library::cache::GLOBAL_OPTIONS_FILE;

/// Descriptor files shipped with the kernel.
#[derive(Embed)]
#[folder = "libraries/"]
struct BundledDescriptors;

/// In-memory set of descriptor texts keyed by library name.
#[derive(Debug, Clone, Default)]
pub struct EmbeddedLibraries {
    descriptors: FxHashMap<String, String>,
    global_options: Option<String>,
}

impl EmbeddedLibraries {
    /// No embedded libraries.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The libraries shipped with jotter, one per `<name>.json` file.
    pub fn builtin() -> Self {
        let mut libraries = Self::empty();
        for file in BundledDescriptors::iter() {
            let Some(asset) = BundledDescriptors::get(&file) else {
                continue;
            };
            let text = match std::str::from_utf8(&asset.data) {
                Ok(text) => text.to_string(),
                Err(e) => {
                    tracing::warn!("Skipping bundled descriptor {}: {}", file, e);
                    continue;
                }
            };

            let path = Path::new(&*file);
            if file == GLOBAL_OPTIONS_FILE {
                libraries.global_options = Some(text);
            } else if path.extension().is_some_and(|ext| ext == "json") {
                if let Some(name) = path.file_stem().and_then(|stem| stem.to_str()) {
                    libraries.descriptors.insert(name.to_string(), text);
                }
            }
        }
        libraries
    }

    /// Add or replace a descriptor.
    pub fn with(mut self, name: impl Into<String>, text: impl Into<String>) -> Self {
        self.descriptors.insert(name.into(), text.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.descriptors.get(name).map(String::as_str)
    }

    pub fn global_options(&self) -> Option<&str> {
        self.global_options.as_deref()
    }

    /// Library names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.descriptors.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::descriptor::{GlobalOptions, LibraryDescriptor};

    #[test]
    fn test_builtin_descriptors_parse() {
        let embedded = EmbeddedLibraries::builtin();
        // Names come from the file stems; the options file is not a library
        assert_eq!(embedded.names(), vec!["bold", "math", "style"]);
        assert!(embedded.get("global").is_none());
        for name in embedded.names() {
            let text = embedded.get(name).unwrap();
            LibraryDescriptor::from_json(text)
                .unwrap_or_else(|e| panic!("{} does not parse: {}", name, e));
        }
        GlobalOptions::from_json(embedded.global_options().unwrap()).unwrap();
    }

    #[test]
    fn test_with_overrides() {
        let embedded = EmbeddedLibraries::empty().with("x", "{}");
        assert_eq!(embedded.get("x"), Some("{}"));
        assert!(embedded.get("math").is_none());
        assert!(embedded.global_options().is_none());
    }
}
