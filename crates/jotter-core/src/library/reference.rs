//! Library references and resolution strategies.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Characters that cannot appear in a cache directory name.
const FORBIDDEN_KEY_CHARS: &[char] = &['<', '>', '/', '\\', ':', '"', '|', '?', '*'];

/// How to locate a library's descriptor.
#[derive(Debug, Clone)]
pub enum ResolutionStrategy {
    /// A descriptor file on disk.
    ByFile(PathBuf),
    /// A directory holding `<name>.json` descriptors.
    ByDirectory(PathBuf),
    /// A descriptor downloaded from a URL.
    ByUrl(String),
    /// A descriptor bundled with the kernel.
    ByEmbeddedResource,
    /// A descriptor in the network repository at a mutable ref.
    ///
    /// `pinned` holds the immutable content identifier once the ref has
    /// been pinned; until then the identity key falls back to the ref.
    ByVersionRef {
        reference: String,
        pinned: Option<String>,
    },
    /// Deferred to the configured default strategy.
    Default(String),
}

impl ResolutionStrategy {
    /// Version ref strategy that has not been pinned yet.
    pub fn version_ref(reference: impl Into<String>) -> Self {
        ResolutionStrategy::ByVersionRef {
            reference: reference.into(),
            pinned: None,
        }
    }

    /// Type part of the identity key.
    pub fn type_key(&self) -> &'static str {
        match self {
            ResolutionStrategy::ByFile(_) => "file",
            ResolutionStrategy::ByDirectory(_) => "bundled",
            ResolutionStrategy::ByUrl(_) => "url",
            ResolutionStrategy::ByEmbeddedResource => "embedded",
            ResolutionStrategy::ByVersionRef { .. } => "ref",
            ResolutionStrategy::Default(_) => "default",
        }
    }

    /// Value part of the identity key.
    pub fn value_key(&self) -> String {
        match self {
            ResolutionStrategy::ByFile(path) | ResolutionStrategy::ByDirectory(path) => {
                path.display().to_string()
            }
            ResolutionStrategy::ByUrl(url) => url.clone(),
            ResolutionStrategy::ByEmbeddedResource => String::new(),
            ResolutionStrategy::ByVersionRef { reference, pinned } => {
                pinned.clone().unwrap_or_else(|| reference.clone())
            }
            ResolutionStrategy::Default(s) => s.clone(),
        }
    }

    /// Identity key, usable as a directory name.
    pub fn key(&self) -> String {
        format!("{}_{}", self.type_key(), sanitize_key(&self.value_key()))
    }

    /// Whether resolved descriptors may be stored in the on-disk cache.
    ///
    /// Files, directories and URLs are already locally addressable or
    /// volatile, so only pinned version refs are cached on disk.
    pub fn is_disk_cacheable(&self) -> bool {
        matches!(
            self,
            ResolutionStrategy::ByVersionRef {
                pinned: Some(_),
                ..
            }
        )
    }

    /// Whether resolved descriptors may be kept in memory for the session.
    pub fn is_memory_cacheable(&self) -> bool {
        self.is_disk_cacheable() || matches!(self, ResolutionStrategy::ByEmbeddedResource)
    }

    /// Whether resolving this strategy goes over the network.
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            ResolutionStrategy::ByUrl(_) | ResolutionStrategy::ByVersionRef { .. }
        )
    }
}

impl PartialEq for ResolutionStrategy {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for ResolutionStrategy {}

impl Hash for ResolutionStrategy {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolutionStrategy::ByFile(path) => write!(f, "file[{}]", path.display()),
            ResolutionStrategy::ByDirectory(path) => write!(f, "dir[{}]", path.display()),
            ResolutionStrategy::ByUrl(url) => write!(f, "url[{}]", url),
            ResolutionStrategy::ByEmbeddedResource => f.write_str("embedded"),
            ResolutionStrategy::ByVersionRef { reference, .. } => write!(f, "ref[{}]", reference),
            ResolutionStrategy::Default(s) => f.write_str(s),
        }
    }
}

/// Replace characters that are not allowed in file names.
pub fn sanitize_key(value: &str) -> String {
    value
        .chars()
        .map(|c| if FORBIDDEN_KEY_CHARS.contains(&c) { '_' } else { c })
        .collect()
}

/// A named library plus the strategy used to locate it.
///
/// Equality and hashing use the name and the strategy's identity key.
#[derive(Debug, Clone)]
pub struct LibraryReference {
    pub name: String,
    pub strategy: ResolutionStrategy,
}

impl LibraryReference {
    pub fn new(name: impl Into<String>, strategy: ResolutionStrategy) -> Self {
        Self {
            name: name.into(),
            strategy,
        }
    }

    /// Reference resolved with the default strategy.
    pub fn named(name: impl Into<String>) -> Self {
        Self::new(name, ResolutionStrategy::Default(String::new()))
    }

    /// Identity key of the reference.
    pub fn key(&self) -> String {
        format!("{}|{}", self.strategy.key(), self.name)
    }
}

impl PartialEq for LibraryReference {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.strategy == other.strategy
    }
}

impl Eq for LibraryReference {}

impl Hash for LibraryReference {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.strategy.hash(state);
    }
}

impl fmt::Display for LibraryReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.strategy {
            ResolutionStrategy::Default(s) if s.is_empty() => f.write_str(&self.name),
            strategy => write!(f, "{}@{}", self.name, strategy),
        }
    }
}

/// A library argument or option: `name = value`, or positional when
/// `name` is empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Variable {
    #[serde(default)]
    pub name: String,
    pub value: String,
}

impl Variable {
    pub fn named(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn positional(value: impl Into<String>) -> Self {
        Self {
            name: String::new(),
            value: value.into(),
        }
    }

    pub fn is_positional(&self) -> bool {
        self.name.is_empty()
    }
}

/// A library reference together with call-site arguments.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LibraryRequest {
    pub reference: LibraryReference,
    pub arguments: Vec<Variable>,
}

impl LibraryRequest {
    pub fn new(reference: LibraryReference) -> Self {
        Self {
            reference,
            arguments: Vec::new(),
        }
    }

    pub fn with_arguments(mut self, arguments: Vec<Variable>) -> Self {
        self.arguments = arguments;
        self
    }
}

impl fmt::Display for LibraryRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.reference)?;
        if !self.arguments.is_empty() {
            let args: Vec<String> = self
                .arguments
                .iter()
                .map(|a| {
                    if a.is_positional() {
                        a.value.clone()
                    } else {
                        format!("{}={}", a.name, a.value)
                    }
                })
                .collect();
            write!(f, "({})", args.join(", "))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys() {
        assert_eq!(
            ResolutionStrategy::ByFile(PathBuf::from("/tmp/a.json")).key(),
            "file__tmp_a.json"
        );
        assert_eq!(
            ResolutionStrategy::ByUrl("https://x.org/a?b".into()).key(),
            "url_https___x.org_a_b"
        );
        assert_eq!(ResolutionStrategy::ByEmbeddedResource.key(), "embedded_");
        assert_eq!(ResolutionStrategy::Default("main".into()).key(), "default_main");
    }

    #[test]
    fn test_version_ref_key_uses_pin() {
        let unpinned = ResolutionStrategy::version_ref("main");
        let pinned = ResolutionStrategy::ByVersionRef {
            reference: "main".into(),
            pinned: Some("abc123".into()),
        };
        assert_eq!(unpinned.key(), "ref_main");
        assert_eq!(pinned.key(), "ref_abc123");
        assert!(!unpinned.is_disk_cacheable());
        assert!(pinned.is_disk_cacheable());
    }

    #[test]
    fn test_pinned_refs_to_same_commit_are_equal() {
        let a = ResolutionStrategy::ByVersionRef {
            reference: "main".into(),
            pinned: Some("abc123".into()),
        };
        let b = ResolutionStrategy::ByVersionRef {
            reference: "release".into(),
            pinned: Some("abc123".into()),
        };
        assert_eq!(a, b);
    }

    #[test]
    fn test_caching_eligibility() {
        assert!(!ResolutionStrategy::ByFile("a.json".into()).is_memory_cacheable());
        assert!(!ResolutionStrategy::ByDirectory("libs".into()).is_disk_cacheable());
        assert!(!ResolutionStrategy::ByUrl("https://a".into()).is_disk_cacheable());
        assert!(ResolutionStrategy::ByEmbeddedResource.is_memory_cacheable());
        assert!(!ResolutionStrategy::ByEmbeddedResource.is_disk_cacheable());
    }

    #[test]
    fn test_reference_display() {
        assert_eq!(LibraryReference::named("math").to_string(), "math");
        let r = LibraryReference::new("plots", ResolutionStrategy::version_ref("v1"));
        assert_eq!(r.to_string(), "plots@ref[v1]");
        let req = LibraryRequest::new(r).with_arguments(vec![
            Variable::positional("1"),
            Variable::named("theme", "dark"),
        ]);
        assert_eq!(req.to_string(), "plots@ref[v1](1, theme=dark)");
    }
}
