//! Network descriptor repository.
//!
//! Descriptors published in a GitHub repository are addressed by a mutable
//! ref (branch or tag). Before use the ref is pinned to the sha of the latest
//! commit touching the descriptors directory, and every fetch uses that sha.

use std::sync::Arc;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::library::cache::GLOBAL_OPTIONS_FILE;
use crate::library::http::HttpClient;

/// Environment variable holding an optional API token.
pub const TOKEN_ENV: &str = "JOTTER_GITHUB_TOKEN";

/// Location of the descriptor repository.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct RepositoryConfig {
    /// Whether network resolution is enabled at all.
    pub enabled: bool,
    pub api_url: String,
    pub owner: String,
    pub name: String,
    /// Directory of the repository holding `<name>.json` descriptors.
    pub descriptors_path: String,
    /// Ref used when a library is requested without one.
    pub default_ref: String,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_url: "https://api.github.com".to_string(),
            owner: "jotter-rs".to_string(),
            name: "jotter-libraries".to_string(),
            descriptors_path: "libraries".to_string(),
            default_ref: "main".to_string(),
        }
    }
}

/// Source of versioned descriptors.
pub trait DescriptorRepository: Send + Sync {
    /// Resolve a mutable ref to an immutable content identifier.
    fn pin(&self, version_ref: &str) -> Result<String>;

    /// Fetch the descriptor text of a library at a pinned identifier.
    fn fetch_descriptor(&self, name: &str, pinned: &str) -> Result<String>;

    /// Fetch the repository-wide options at a pinned identifier, if any.
    fn fetch_global_options(&self, pinned: &str) -> Result<Option<String>>;
}

#[derive(Deserialize)]
struct CommitEntry {
    sha: String,
}

#[derive(Deserialize)]
struct ContentsEntry {
    download_url: Option<String>,
}

/// [`DescriptorRepository`] backed by the GitHub REST API.
pub struct GitHubRepository {
    config: RepositoryConfig,
    client: Arc<dyn HttpClient>,
    token: Option<String>,
}

impl GitHubRepository {
    pub fn new(config: RepositoryConfig, client: Arc<dyn HttpClient>) -> Self {
        let token = std::env::var(TOKEN_ENV).ok().filter(|t| !t.is_empty());
        Self {
            config,
            client,
            token,
        }
    }

    fn api_prefix(&self) -> String {
        format!(
            "{}/repos/{}/{}",
            self.config.api_url.trim_end_matches('/'),
            self.config.owner,
            self.config.name
        )
    }

    fn get_api(&self, url: &str) -> Result<String> {
        let auth = self.token.as_ref().map(|t| format!("Bearer {}", t));
        let mut headers = vec![("Accept", "application/vnd.github+json")];
        if let Some(auth) = &auth {
            headers.push(("Authorization", auth.as_str()));
        }
        self.client.get(url, &headers)?.into_body(url)
    }

    fn download(&self, contents_url: &str) -> Result<String> {
        let body = self.get_api(contents_url)?;
        let entry: ContentsEntry = serde_json::from_str(&body)
            .map_err(|e| Error::Network(format!("Unexpected response from {}: {}", contents_url, e)))?;
        let download_url = entry
            .download_url
            .ok_or_else(|| Error::Network(format!("{} is not a file", contents_url)))?;
        self.client.get(&download_url, &[])?.into_body(&download_url)
    }
}

impl DescriptorRepository for GitHubRepository {
    fn pin(&self, version_ref: &str) -> Result<String> {
        let url = format!(
            "{}/commits?path={}&sha={}",
            self.api_prefix(),
            self.config.descriptors_path,
            version_ref
        );
        tracing::debug!("Pinning {} via {}", version_ref, url);

        let body = self.get_api(&url)?;
        let commits: Vec<CommitEntry> = serde_json::from_str(&body)
            .map_err(|e| Error::Network(format!("Unexpected response from {}: {}", url, e)))?;
        commits
            .into_iter()
            .next()
            .map(|c| c.sha)
            .ok_or_else(|| Error::Network(format!("no commits found for ref '{}'", version_ref)))
    }

    fn fetch_descriptor(&self, name: &str, pinned: &str) -> Result<String> {
        let url = format!(
            "{}/contents/{}/{}.json?ref={}",
            self.api_prefix(),
            self.config.descriptors_path,
            name,
            pinned
        );
        tracing::info!("Requesting library descriptor at {}", url);
        self.download(&url)
    }

    fn fetch_global_options(&self, pinned: &str) -> Result<Option<String>> {
        let url = format!(
            "{}/contents/{}/{}?ref={}",
            self.api_prefix(),
            self.config.descriptors_path,
            GLOBAL_OPTIONS_FILE,
            pinned
        );
        match self.download(&url) {
            Ok(text) => Ok(Some(text)),
            Err(e) => {
                tracing::warn!("Unable to load global descriptor options: {}", e);
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::http::HttpResponse;
    use std::sync::Mutex;

    struct FakeHttp {
        requests: Mutex<Vec<String>>,
    }

    impl HttpClient for FakeHttp {
        fn get(&self, url: &str, _headers: &[(&str, &str)]) -> Result<HttpResponse> {
            self.requests.lock().unwrap().push(url.to_string());
            let body = if url.contains("/commits?") {
                r#"[{"sha": "abc123"}, {"sha": "older"}]"#.to_string()
            } else if url.contains("/contents/libraries/plots.json?ref=abc123") {
                r#"{"download_url": "https://raw.example/plots.json"}"#.to_string()
            } else if url == "https://raw.example/plots.json" {
                r#"{"init": ["val x = 1"]}"#.to_string()
            } else {
                return Ok(HttpResponse {
                    status: 404,
                    body: String::new(),
                });
            };
            Ok(HttpResponse { status: 200, body })
        }
    }

    fn repository() -> (GitHubRepository, Arc<FakeHttp>) {
        let http = Arc::new(FakeHttp {
            requests: Mutex::new(Vec::new()),
        });
        let config = RepositoryConfig {
            api_url: "https://api.example/".into(),
            ..Default::default()
        };
        (GitHubRepository::new(config, http.clone()), http)
    }

    #[test]
    fn test_pin_takes_latest_commit() {
        let (repo, http) = repository();
        assert_eq!(repo.pin("main").unwrap(), "abc123");
        assert_eq!(
            http.requests.lock().unwrap()[0],
            "https://api.example/repos/jotter-rs/jotter-libraries/commits?path=libraries&sha=main"
        );
    }

    #[test]
    fn test_fetch_descriptor_follows_download_url() {
        let (repo, http) = repository();
        let text = repo.fetch_descriptor("plots", "abc123").unwrap();
        assert!(text.contains("val x = 1"));
        assert_eq!(http.requests.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_missing_descriptor_is_network_error() {
        let (repo, _) = repository();
        assert!(matches!(
            repo.fetch_descriptor("nope", "abc123"),
            Err(Error::Network(_))
        ));
    }

    #[test]
    fn test_missing_global_options_is_none() {
        let (repo, _) = repository();
        assert_eq!(repo.fetch_global_options("abc123").unwrap(), None);
    }
}
