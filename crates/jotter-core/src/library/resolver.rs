//! Library resolver chain.
//!
//! Resolution of a [`LibraryRequest`] goes through these steps:
//!
//! 1. `Default` references are looked up in the user library directories,
//!    then expanded into a concrete strategy.
//! 2. `ByVersionRef` references are pinned to an immutable identifier. Pins
//!    are memoized for the lifetime of the chain.
//! 3. Cacheable references are served from memory, then from disk.
//! 4. Otherwise every applicable [`DescriptorSource`] is tried in order and
//!    the first descriptor found wins.
//! 5. The descriptor is bound to the call-site arguments.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use rustc_hash::FxHashMap;

use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::library::cache::{CachedDescriptor, DiskCache};
use crate::library::definition::LibraryDefinition;
use crate::library::descriptor::{GlobalOptions, LibraryDescriptor};
use crate::library::embedded::EmbeddedLibraries;
use crate::library::http::{HttpClient, ReqwestClient};
use crate::library::reference::{LibraryReference, LibraryRequest, ResolutionStrategy};
use crate::library::repository::{DescriptorRepository, GitHubRepository};
use crate::library::sources::{
    DescriptorSource, DirectorySource, EmbeddedSource, Fetched, FileSource, UrlSource,
    VersionRefSource,
};
use crate::paths::KernelDirs;

/// Request timeout of the production HTTP client.
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Name reported for the memory cache in diagnostics.
const MEMORY_CACHE: &str = "memory-cache";

/// Name reported for the disk cache in diagnostics.
const DISK_CACHE: &str = "disk-cache";

/// Outcome of a successful resolution.
#[derive(Debug, Clone)]
pub struct Resolved {
    /// The reference after default expansion and pinning.
    pub reference: LibraryReference,
    pub definition: LibraryDefinition,
    /// Non-fatal problems, such as a network fallback.
    pub warnings: Vec<String>,
    /// Which cache or source produced the descriptor.
    pub origin: String,
}

/// Resolves library requests into definitions.
pub struct ResolverChain {
    sources: Vec<Box<dyn DescriptorSource>>,
    disk_cache: Option<DiskCache>,
    repository: Option<Arc<dyn DescriptorRepository>>,
    library_dirs: Vec<PathBuf>,
    default_strategy: String,
    memory: Mutex<FxHashMap<String, Arc<Fetched>>>,
    pins: Mutex<FxHashMap<String, String>>,
}

impl ResolverChain {
    pub fn builder() -> ResolverChainBuilder {
        ResolverChainBuilder::default()
    }

    /// Build the chain described by a session configuration.
    pub fn from_config(config: &SessionConfig, dirs: &KernelDirs) -> Result<Self> {
        let mut builder = Self::builder()
            .embedded(EmbeddedLibraries::builtin())
            .default_strategy(config.default_strategy.clone())
            .disk_cache(DiskCache::new(
                config.cache_dir.clone().unwrap_or_else(|| dirs.cache_dir.clone()),
            ));

        for dir in &config.library_dirs {
            builder = builder.library_dir(dir.clone());
        }
        builder = builder.library_dir(dirs.libraries_dir.clone());

        if config.repository.enabled {
            let client: Arc<dyn HttpClient> = Arc::new(ReqwestClient::new(HTTP_TIMEOUT)?);
            let repository = GitHubRepository::new(config.repository.clone(), Arc::clone(&client));
            builder = builder.http_client(client).repository(Arc::new(repository));
        }

        Ok(builder.build())
    }

    /// On-disk cache, if the chain has one.
    pub fn disk_cache(&self) -> Option<&DiskCache> {
        self.disk_cache.as_ref()
    }

    /// Names of the sources, in the order they are tried.
    pub fn source_names(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.name()).collect()
    }

    /// Expand and pin a reference into its canonical form.
    ///
    /// The returned reference's identity key is what sessions use to
    /// deduplicate library requests.
    pub fn canonicalize(&self, reference: &LibraryReference) -> (LibraryReference, Vec<String>) {
        let mut warnings = Vec::new();
        let mut reference = self.expand_default(reference);

        if let ResolutionStrategy::ByVersionRef {
            reference: version_ref,
            pinned: pinned @ None,
        } = &mut reference.strategy
        {
            match self.pin(version_ref) {
                Ok(Some(sha)) => *pinned = Some(sha),
                Ok(None) => {}
                Err(e) => {
                    let warning = format!(
                        "Failed to pin '{}' ({}); using the unpinned ref",
                        version_ref, e
                    );
                    tracing::warn!(library = %reference.name, "{}", warning);
                    warnings.push(warning);
                }
            }
        }

        (reference, warnings)
    }

    fn expand_default(&self, reference: &LibraryReference) -> LibraryReference {
        let ResolutionStrategy::Default(text) = &reference.strategy else {
            return reference.clone();
        };

        let file_name = format!("{}.json", reference.name);
        if let Some(path) = self
            .library_dirs
            .iter()
            .map(|dir| dir.join(&file_name))
            .find(|path| path.is_file())
        {
            tracing::debug!("Found {} in user libraries at {:?}", reference.name, path);
            return LibraryReference::new(&reference.name, ResolutionStrategy::ByFile(path));
        }

        let text = if text.is_empty() {
            self.default_strategy.as_str()
        } else {
            text.as_str()
        };
        LibraryReference::new(&reference.name, expand_strategy(text))
    }

    fn pin(&self, version_ref: &str) -> Result<Option<String>> {
        let Some(repository) = &self.repository else {
            return Ok(None);
        };

        if let Some(sha) = self
            .pins
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(version_ref)
        {
            return Ok(Some(sha.clone()));
        }

        let sha = repository.pin(version_ref)?;
        tracing::debug!("Pinned ref {} to {}", version_ref, sha);
        self.pins
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(version_ref.to_string(), sha.clone());
        Ok(Some(sha))
    }

    /// Resolve a request into a library definition.
    pub fn resolve(&self, request: &LibraryRequest) -> Result<Resolved> {
        let (reference, mut warnings) = self.canonicalize(&request.reference);
        self.resolve_canonical(&reference, request, &mut warnings)
            .map(|(definition, origin)| Resolved {
                reference,
                definition,
                warnings,
                origin,
            })
    }

    /// Resolve a reference that already went through [`canonicalize`].
    ///
    /// [`canonicalize`]: ResolverChain::canonicalize
    pub fn resolve_canonical(
        &self,
        reference: &LibraryReference,
        request: &LibraryRequest,
        warnings: &mut Vec<String>,
    ) -> Result<(LibraryDefinition, String)> {
        let (fetched, origin) = self.fetch(reference)?;
        warnings.extend(fetched.warnings.iter().cloned());

        let options = match &fetched.global_options {
            Some(text) => GlobalOptions::from_json(text)?,
            None => GlobalOptions::default(),
        };
        let definition = LibraryDescriptor::from_json(&fetched.text)?.into_definition(
            &reference.name,
            &request.arguments,
            &options,
        )?;
        Ok((definition, origin))
    }

    fn fetch(&self, reference: &LibraryReference) -> Result<(Arc<Fetched>, String)> {
        let key = reference.key();
        let strategy = &reference.strategy;

        if strategy.is_memory_cacheable() {
            let memory = self.memory.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(hit) = memory.get(&key) {
                tracing::debug!("Memory cache hit for {}", reference);
                return Ok((Arc::clone(hit), MEMORY_CACHE.to_string()));
            }
        }

        if strategy.is_disk_cacheable() {
            if let Some(cache) = &self.disk_cache {
                match cache.load(reference) {
                    Ok(Some(entry)) => {
                        tracing::debug!("Disk cache hit for {}", reference);
                        let fetched = Arc::new(
                            Fetched::new(entry.text).with_global_options(entry.global_options),
                        );
                        self.remember(&key, &fetched);
                        return Ok((fetched, DISK_CACHE.to_string()));
                    }
                    Ok(None) => {}
                    Err(e) => tracing::warn!("Failed to read descriptor cache: {}", e),
                }
            }
        }

        let mut attempted = Vec::new();
        for source in self.sources.iter().filter(|s| s.applies(reference)) {
            attempted.push(source.name().to_string());
            let fetched = match source.fetch(reference) {
                Ok(fetched) => fetched,
                // Network failures without a bundled copy pass to the next source
                Err(Error::Network(message)) => {
                    tracing::warn!(
                        library = %reference.name,
                        "{} source failed: {}",
                        source.name(),
                        message
                    );
                    None
                }
                Err(e) => {
                    return Err(Error::Resolution {
                        reference: reference.to_string(),
                        message: format!("{} source failed: {}", source.name(), e),
                    });
                }
            };
            let Some(fetched) = fetched else {
                continue;
            };

            let fetched = Arc::new(fetched);
            if !fetched.from_fallback {
                self.store(reference, &key, &fetched);
            }
            return Ok((fetched, source.name().to_string()));
        }

        Err(Error::LibraryNotFound {
            reference: reference.to_string(),
            attempted,
        })
    }

    fn remember(&self, key: &str, fetched: &Arc<Fetched>) {
        self.memory
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), Arc::clone(fetched));
    }

    fn store(&self, reference: &LibraryReference, key: &str, fetched: &Arc<Fetched>) {
        if reference.strategy.is_memory_cacheable() {
            self.remember(key, fetched);
        }
        if !reference.strategy.is_disk_cacheable() {
            return;
        }
        if let Some(cache) = &self.disk_cache {
            let entry = CachedDescriptor {
                text: fetched.text.clone(),
                global_options: fetched.global_options.clone(),
            };
            if let Err(e) = cache.save(reference, &entry) {
                tracing::warn!("Failed to cache descriptor for {}: {}", reference, e);
            }
        }
    }
}

/// Turn a default strategy string into a concrete strategy.
pub fn expand_strategy(text: &str) -> ResolutionStrategy {
    let text = text.trim();
    if text.is_empty() || text == "embedded" {
        return ResolutionStrategy::ByEmbeddedResource;
    }
    let path = Path::new(text);
    if path.is_dir() {
        ResolutionStrategy::ByDirectory(path.to_path_buf())
    } else if path.is_file() {
        ResolutionStrategy::ByFile(path.to_path_buf())
    } else if text.starts_with("http://") || text.starts_with("https://") {
        ResolutionStrategy::ByUrl(text.to_string())
    } else {
        ResolutionStrategy::version_ref(text)
    }
}

/// Builder for [`ResolverChain`].
#[derive(Default)]
pub struct ResolverChainBuilder {
    custom_sources: Vec<Box<dyn DescriptorSource>>,
    embedded: Option<EmbeddedLibraries>,
    http: Option<Arc<dyn HttpClient>>,
    repository: Option<Arc<dyn DescriptorRepository>>,
    disk_cache: Option<DiskCache>,
    library_dirs: Vec<PathBuf>,
    default_strategy: String,
}

impl ResolverChainBuilder {
    /// Add a source tried before the standard ones.
    pub fn source(mut self, source: Box<dyn DescriptorSource>) -> Self {
        self.custom_sources.push(source);
        self
    }

    pub fn embedded(mut self, embedded: EmbeddedLibraries) -> Self {
        self.embedded = Some(embedded);
        self
    }

    /// Enable `ByUrl` resolution.
    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http = Some(client);
        self
    }

    /// Enable `ByVersionRef` resolution.
    pub fn repository(mut self, repository: Arc<dyn DescriptorRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    pub fn disk_cache(mut self, cache: DiskCache) -> Self {
        self.disk_cache = Some(cache);
        self
    }

    /// Directory searched for `<name>.json` before the default strategy.
    pub fn library_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.library_dirs.push(dir.into());
        self
    }

    /// Strategy string used for `Default` references without one.
    pub fn default_strategy(mut self, strategy: impl Into<String>) -> Self {
        self.default_strategy = strategy.into();
        self
    }

    pub fn build(self) -> ResolverChain {
        let embedded = Arc::new(self.embedded.unwrap_or_default());

        let mut sources = self.custom_sources;
        sources.push(Box::new(DirectorySource));
        sources.push(Box::new(FileSource));
        if let Some(repository) = &self.repository {
            sources.push(Box::new(VersionRefSource::new(
                Arc::clone(repository),
                Arc::clone(&embedded),
            )));
        }
        if let Some(http) = self.http {
            sources.push(Box::new(UrlSource::new(http, Arc::clone(&embedded))));
        }
        sources.push(Box::new(EmbeddedSource::new(embedded)));

        ResolverChain {
            sources,
            disk_cache: self.disk_cache,
            repository: self.repository,
            library_dirs: self.library_dirs,
            default_strategy: self.default_strategy,
            memory: Mutex::new(FxHashMap::default()),
            pins: Mutex::new(FxHashMap::default()),
        }
    }
}
