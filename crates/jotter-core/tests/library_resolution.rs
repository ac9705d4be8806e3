//! Resolver chain behavior against a fake descriptor repository.

use std::fs;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use jotter_core::library::{
    DescriptorRepository, DiskCache, EmbeddedLibraries, LibraryReference, LibraryRequest,
    ResolutionStrategy, ResolverChain, Variable,
};
use jotter_core::{Error, Result};
use tempfile::TempDir;

const PLOTS: &str = r#"{
    "properties": { "v": "1.0" },
    "dependencies": ["org.plots:plots:$v"],
    "init": ["val plotsVersion = \"$v\""]
}"#;

/// Repository serving `plots`, counting calls.
#[derive(Default)]
struct FakeRepository {
    pins: AtomicUsize,
    fetches: AtomicUsize,
    offline: bool,
    pin_fails: bool,
}

impl DescriptorRepository for FakeRepository {
    fn pin(&self, version_ref: &str) -> Result<String> {
        self.pins.fetch_add(1, Ordering::SeqCst);
        if self.pin_fails || self.offline {
            return Err(Error::Network("connection refused".to_string()));
        }
        Ok(format!("sha-of-{}", version_ref))
    }

    fn fetch_descriptor(&self, name: &str, _pinned: &str) -> Result<String> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.offline {
            return Err(Error::Network("connection refused".to_string()));
        }
        match name {
            "plots" => Ok(PLOTS.to_string()),
            _ => Err(Error::Network(format!("GET {} returned HTTP 404", name))),
        }
    }

    fn fetch_global_options(&self, _pinned: &str) -> Result<Option<String>> {
        Ok(None)
    }
}

fn chain(repository: &Arc<FakeRepository>, cache: &TempDir) -> ResolverChain {
    ResolverChain::builder()
        .repository(Arc::clone(repository) as Arc<dyn DescriptorRepository>)
        .disk_cache(DiskCache::new(cache.path()))
        .embedded(EmbeddedLibraries::builtin())
        .default_strategy("ref[main]")
        .build()
}

fn request(name: &str) -> LibraryRequest {
    LibraryRequest::new(LibraryReference::named(name))
}

#[test]
fn test_ref_is_pinned_and_fetched_once() {
    let cache = TempDir::new().unwrap();
    let repository = Arc::new(FakeRepository::default());
    let resolver = chain(&repository, &cache);

    let first = resolver.resolve(&request("plots")).unwrap();
    let second = resolver.resolve(&request("plots")).unwrap();

    assert_eq!(repository.pins.load(Ordering::SeqCst), 1);
    assert_eq!(repository.fetches.load(Ordering::SeqCst), 1);
    assert_eq!(first.origin, "version-ref");
    assert_eq!(second.origin, "memory-cache");
    assert_eq!(first.reference, second.reference);
    assert_eq!(first.definition, second.definition);
    assert!(matches!(
        &first.reference.strategy,
        ResolutionStrategy::ByVersionRef { pinned: Some(sha), .. } if sha == "sha-of-main"
    ));
    assert_eq!(first.definition.dependencies, vec!["org.plots:plots:1.0"]);
}

#[test]
fn test_disk_cache_survives_new_chain() {
    let cache = TempDir::new().unwrap();
    let repository = Arc::new(FakeRepository::default());
    chain(&repository, &cache).resolve(&request("plots")).unwrap();

    let fresh = Arc::new(FakeRepository::default());
    let resolved = chain(&fresh, &cache).resolve(&request("plots")).unwrap();

    assert_eq!(resolved.origin, "disk-cache");
    assert_eq!(fresh.fetches.load(Ordering::SeqCst), 0);
    assert_eq!(resolved.definition.init, vec![r#"val plotsVersion = "1.0""#]);
}

#[test]
fn test_arguments_bind_per_request() {
    let cache = TempDir::new().unwrap();
    let repository = Arc::new(FakeRepository::default());
    let resolver = chain(&repository, &cache);

    let pinned = resolver
        .resolve(&request("plots").with_arguments(vec![Variable::positional("2.0")]))
        .unwrap();
    assert_eq!(pinned.definition.dependencies, vec!["org.plots:plots:2.0"]);
    assert_eq!(pinned.definition.options.get("v").map(String::as_str), Some("2.0"));

    // The descriptor is cached; arguments are not
    let plain = resolver.resolve(&request("plots")).unwrap();
    assert_eq!(plain.definition.dependencies, vec!["org.plots:plots:1.0"]);
    assert_eq!(repository.fetches.load(Ordering::SeqCst), 1);
}

#[test]
fn test_network_failure_uses_bundled_copy() {
    let cache = TempDir::new().unwrap();
    let repository = Arc::new(FakeRepository {
        offline: true,
        ..FakeRepository::default()
    });
    let resolver = chain(&repository, &cache);

    let resolved = resolver.resolve(&request("math")).unwrap();
    assert_eq!(resolved.definition.name, "math");
    assert!(resolved.warnings.iter().any(|w| w.contains("Failed to pin")));
    assert!(resolved.warnings.iter().any(|w| w.contains("bundled copy")));

    // Fallback results are not cached
    resolver.resolve(&request("math")).unwrap();
    assert_eq!(repository.fetches.load(Ordering::SeqCst), 2);
    assert!(fs::read_dir(cache.path()).unwrap().next().is_none());
}

#[test]
fn test_pin_failure_keeps_unpinned_ref() {
    let cache = TempDir::new().unwrap();
    let repository = Arc::new(FakeRepository {
        pin_fails: true,
        ..FakeRepository::default()
    });
    let resolver = chain(&repository, &cache);

    let resolved = resolver.resolve(&request("plots")).unwrap();
    assert!(matches!(
        &resolved.reference.strategy,
        ResolutionStrategy::ByVersionRef { pinned: None, reference } if reference == "main"
    ));
    assert_eq!(resolved.warnings.len(), 1);
    // Unpinned refs never reach the disk cache
    assert!(fs::read_dir(cache.path()).unwrap().next().is_none());
}

#[test]
fn test_missing_library_names_attempts() {
    let resolver = ResolverChain::builder()
        .embedded(EmbeddedLibraries::builtin())
        .default_strategy("embedded")
        .build();

    let err = resolver.resolve(&request("nope")).unwrap_err();
    let Error::LibraryNotFound {
        reference,
        attempted,
    } = err
    else {
        panic!("expected LibraryNotFound, got {err:?}");
    };
    assert_eq!(reference, "nope@embedded");
    assert_eq!(attempted, vec!["embedded"]);
}

#[test]
fn test_remote_404_without_bundled_copy_is_not_found() {
    let cache = TempDir::new().unwrap();
    let repository = Arc::new(FakeRepository::default());
    let resolver = chain(&repository, &cache);

    let err = resolver.resolve(&request("nope")).unwrap_err();
    let Error::LibraryNotFound {
        reference,
        attempted,
    } = err
    else {
        panic!("expected LibraryNotFound, got {err:?}");
    };
    assert_eq!(reference, "nope@ref[main]");
    assert_eq!(attempted, vec!["version-ref"]);
    assert_eq!(repository.fetches.load(Ordering::SeqCst), 1);
}

#[test]
fn test_directory_with_global_options() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("themes.json"),
        r#"{ "properties": [{ "name": "theme", "value": "light" }, { "name": "size", "value": "12" }],
             "init": ["val size = $size"] }"#,
    )
    .unwrap();
    fs::write(
        dir.path().join("global.options"),
        r#"{ "ignoredPropertyPatterns": ["the.*"] }"#,
    )
    .unwrap();

    let resolver = ResolverChain::builder().build();
    let reference = LibraryReference::new(
        "themes",
        ResolutionStrategy::ByDirectory(dir.path().to_path_buf()),
    );
    let resolved = resolver
        .resolve(&LibraryRequest::new(reference).with_arguments(vec![Variable::positional("14")]))
        .unwrap();

    assert_eq!(resolved.origin, "directory");
    assert!(!resolved.definition.options.contains_key("theme"));
    assert_eq!(resolved.definition.init, vec!["val size = 14"]);
}

#[test]
fn test_user_library_dir_shadows_default() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("math.json"), r#"{ "init": ["val pi = 314"] }"#).unwrap();

    let resolver = ResolverChain::builder()
        .embedded(EmbeddedLibraries::builtin())
        .library_dir(dir.path())
        .default_strategy("embedded")
        .build();

    let resolved = resolver.resolve(&request("math")).unwrap();
    assert_eq!(resolved.origin, "file");
    assert_eq!(resolved.definition.init, vec!["val pi = 314"]);
}
