//! Strategy-specific descriptor sources.
//!
//! Each source handles one [`ResolutionStrategy`] variant. The resolver
//! chain asks every applicable source in order and takes the first
//! descriptor it gets.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::library::cache::GLOBAL_OPTIONS_FILE;
use crate::library::embedded::EmbeddedLibraries;
use crate::library::http::HttpClient;
use crate::library::reference::{LibraryReference, ResolutionStrategy};
use crate::library::repository::DescriptorRepository;

/// Descriptor text produced by a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fetched {
    pub text: String,
    pub global_options: Option<String>,
    /// Non-fatal problems met while fetching.
    pub warnings: Vec<String>,
    /// Whether the text came from the embedded fallback copy.
    pub from_fallback: bool,
}

impl Fetched {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            global_options: None,
            warnings: Vec::new(),
            from_fallback: false,
        }
    }

    pub fn with_global_options(mut self, options: Option<String>) -> Self {
        self.global_options = options;
        self
    }
}

/// One link of the resolver chain.
pub trait DescriptorSource: Send + Sync {
    /// Name reported when resolution fails.
    fn name(&self) -> &str;

    /// Whether this source handles the reference's strategy.
    fn applies(&self, reference: &LibraryReference) -> bool;

    /// Fetch the descriptor. `Ok(None)` and [`Error::Network`] pass to the
    /// next source.
    fn fetch(&self, reference: &LibraryReference) -> Result<Option<Fetched>>;
}

fn read_sibling_options(dir: &Path) -> Result<Option<String>> {
    let path = dir.join(GLOBAL_OPTIONS_FILE);
    if path.is_file() {
        Ok(Some(fs::read_to_string(path)?))
    } else {
        Ok(None)
    }
}

/// Reads `ByFile` descriptors.
pub struct FileSource;

impl DescriptorSource for FileSource {
    fn name(&self) -> &str {
        "file"
    }

    fn applies(&self, reference: &LibraryReference) -> bool {
        matches!(reference.strategy, ResolutionStrategy::ByFile(_))
    }

    fn fetch(&self, reference: &LibraryReference) -> Result<Option<Fetched>> {
        let ResolutionStrategy::ByFile(path) = &reference.strategy else {
            return Ok(None);
        };
        if !path.is_file() {
            tracing::debug!("Descriptor file {:?} does not exist", path);
            return Ok(None);
        }
        let text = fs::read_to_string(path)?;
        let options = match path.parent() {
            Some(dir) => read_sibling_options(dir)?,
            None => None,
        };
        Ok(Some(Fetched::new(text).with_global_options(options)))
    }
}

/// Reads `<name>.json` from `ByDirectory` directories.
pub struct DirectorySource;

impl DescriptorSource for DirectorySource {
    fn name(&self) -> &str {
        "directory"
    }

    fn applies(&self, reference: &LibraryReference) -> bool {
        matches!(reference.strategy, ResolutionStrategy::ByDirectory(_))
    }

    fn fetch(&self, reference: &LibraryReference) -> Result<Option<Fetched>> {
        let ResolutionStrategy::ByDirectory(dir) = &reference.strategy else {
            return Ok(None);
        };
        let path = dir.join(format!("{}.json", reference.name));
        if !path.is_file() {
            tracing::debug!("No descriptor {:?} in {:?}", reference.name, dir);
            return Ok(None);
        }
        let text = fs::read_to_string(&path)?;
        Ok(Some(
            Fetched::new(text).with_global_options(read_sibling_options(dir)?),
        ))
    }
}

/// Serves `ByEmbeddedResource` references from the bundled descriptors.
pub struct EmbeddedSource {
    embedded: Arc<EmbeddedLibraries>,
}

impl EmbeddedSource {
    pub fn new(embedded: Arc<EmbeddedLibraries>) -> Self {
        Self { embedded }
    }
}

impl DescriptorSource for EmbeddedSource {
    fn name(&self) -> &str {
        "embedded"
    }

    fn applies(&self, reference: &LibraryReference) -> bool {
        matches!(reference.strategy, ResolutionStrategy::ByEmbeddedResource)
    }

    fn fetch(&self, reference: &LibraryReference) -> Result<Option<Fetched>> {
        Ok(self.embedded.get(&reference.name).map(|text| {
            Fetched::new(text)
                .with_global_options(self.embedded.global_options().map(str::to_string))
        }))
    }
}

/// Replace a failed network fetch with the embedded copy, if there is one.
fn embedded_fallback(
    embedded: &EmbeddedLibraries,
    reference: &LibraryReference,
    error: Error,
) -> Result<Option<Fetched>> {
    if !matches!(error, Error::Network(_)) {
        return Err(error);
    }
    let Some(text) = embedded.get(&reference.name) else {
        return Err(error);
    };

    let warning = format!(
        "Failed to fetch {} ({}); using the bundled copy instead",
        reference, error
    );
    tracing::warn!(library = %reference.name, "{}", warning);

    let mut fetched = Fetched::new(text)
        .with_global_options(embedded.global_options().map(str::to_string));
    fetched.warnings.push(warning);
    fetched.from_fallback = true;
    Ok(Some(fetched))
}

/// Downloads `ByUrl` descriptors.
pub struct UrlSource {
    client: Arc<dyn HttpClient>,
    embedded: Arc<EmbeddedLibraries>,
}

impl UrlSource {
    pub fn new(client: Arc<dyn HttpClient>, embedded: Arc<EmbeddedLibraries>) -> Self {
        Self { client, embedded }
    }
}

impl DescriptorSource for UrlSource {
    fn name(&self) -> &str {
        "url"
    }

    fn applies(&self, reference: &LibraryReference) -> bool {
        matches!(reference.strategy, ResolutionStrategy::ByUrl(_))
    }

    fn fetch(&self, reference: &LibraryReference) -> Result<Option<Fetched>> {
        let ResolutionStrategy::ByUrl(url) = &reference.strategy else {
            return Ok(None);
        };
        let result = self
            .client
            .get(url, &[])
            .and_then(|response| response.into_body(url));
        match result {
            Ok(text) => Ok(Some(Fetched::new(text))),
            Err(e) => embedded_fallback(&self.embedded, reference, e),
        }
    }
}

/// Fetches `ByVersionRef` descriptors from the network repository.
pub struct VersionRefSource {
    repository: Arc<dyn DescriptorRepository>,
    embedded: Arc<EmbeddedLibraries>,
}

impl VersionRefSource {
    pub fn new(repository: Arc<dyn DescriptorRepository>, embedded: Arc<EmbeddedLibraries>) -> Self {
        Self {
            repository,
            embedded,
        }
    }
}

impl DescriptorSource for VersionRefSource {
    fn name(&self) -> &str {
        "version-ref"
    }

    fn applies(&self, reference: &LibraryReference) -> bool {
        matches!(reference.strategy, ResolutionStrategy::ByVersionRef { .. })
    }

    fn fetch(&self, reference: &LibraryReference) -> Result<Option<Fetched>> {
        let ResolutionStrategy::ByVersionRef {
            reference: version_ref,
            pinned,
        } = &reference.strategy
        else {
            return Ok(None);
        };
        let at = pinned.as_deref().unwrap_or(version_ref);

        let text = match self.repository.fetch_descriptor(&reference.name, at) {
            Ok(text) => text,
            Err(e) => return embedded_fallback(&self.embedded, reference, e),
        };
        let options = self.repository.fetch_global_options(at)?;
        Ok(Some(Fetched::new(text).with_global_options(options)))
    }
}
