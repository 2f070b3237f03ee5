//! Repository content fetch: resolves recognized code-repository links to text.
//!
//! Content is the repository summary, the README, and a bounded set of important
//! root-level files (manifests, build files, entry points).

use async_trait::async_trait;
use futures_util::future::join_all;
use reqwest::header::{ACCEPT, USER_AGENT};
use reqwest::{Client, Url};
use serde::Deserialize;
use tracing::debug;

use crate::background::sources::SourceError;
use crate::config::PipelineConfig;

const GITHUB_API_URL: &str = "https://api.github.com";
const GITHUB_JSON: &str = "application/vnd.github+json";
const GITHUB_RAW: &str = "application/vnd.github.raw";
const CLIENT_USER_AGENT: &str = "candidate-api";

/// Manifest and build files, compared case-insensitively.
const IMPORTANT_FILE_NAMES: &[&str] = &[
    "cargo.toml",
    "package.json",
    "pyproject.toml",
    "requirements.txt",
    "setup.py",
    "go.mod",
    "pom.xml",
    "build.gradle",
    "build.gradle.kts",
    "gemfile",
    "composer.json",
    "dockerfile",
    "docker-compose.yml",
    "makefile",
    "cmakelists.txt",
];

/// Source extensions of root-level entry points worth showing.
const SOURCE_EXTENSIONS: &[&str] = &[
    "rs", "py", "js", "ts", "tsx", "go", "java", "kt", "rb", "cpp", "c", "cs", "swift", "php",
];

/// A recognized repository link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryRef {
    pub owner: String,
    pub name: String,
}

impl RepositoryRef {
    pub fn slug(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

/// Recognizes `github.com/{owner}/{repo}` links, with or without scheme, `.git` or a trailing path.
pub fn parse_repository_url(link: &str) -> Option<RepositoryRef> {
    let link = link.trim();
    let with_scheme = if link.contains("://") {
        link.to_string()
    } else {
        format!("https://{link}")
    };
    let url = Url::parse(&with_scheme).ok()?;
    let host = url.host_str()?.to_ascii_lowercase();
    if host != "github.com" && host != "www.github.com" {
        return None;
    }

    let mut segments = url.path_segments()?.filter(|s| !s.is_empty());
    let owner = segments.next()?.to_string();
    let name = segments.next()?.trim_end_matches(".git").to_string();
    if name.is_empty() {
        return None;
    }
    Some(RepositoryRef { owner, name })
}

#[async_trait]
pub trait RepositoryFetcher: Send + Sync {
    /// Returns the concatenated repository content, or why it is inaccessible.
    async fn fetch(&self, repository: &RepositoryRef) -> Result<String, SourceError>;
}

#[derive(Debug, Deserialize)]
struct RepositoryMetadata {
    full_name: String,
    description: Option<String>,
    language: Option<String>,
    #[serde(default)]
    topics: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ContentItem {
    name: String,
    #[serde(rename = "type")]
    item_type: String,
    size: u64,
    download_url: Option<String>,
}

/// GitHub REST API fetcher.
pub struct GithubFetcher {
    http: Client,
    token: Option<String>,
    max_files: usize,
    max_file_bytes: u64,
}

impl GithubFetcher {
    pub fn new(token: Option<String>, config: &PipelineConfig) -> Self {
        Self {
            http: Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .expect("Failed to build HTTP client"),
            token,
            max_files: config.repository_max_files,
            max_file_bytes: config.repository_file_max_bytes,
        }
    }

    async fn get(&self, url: &str, accept: &str) -> Result<reqwest::Response, SourceError> {
        let mut request = self
            .http
            .get(url)
            .header(USER_AGENT, CLIENT_USER_AGENT)
            .header(ACCEPT, accept);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| SourceError::Fetch(e.to_string()))?;
        let quota_exhausted = response
            .headers()
            .get("x-ratelimit-remaining")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim() == "0")
            .unwrap_or(false);
        match classify_status(response.status().as_u16(), quota_exhausted) {
            Some(e) => Err(e),
            None => Ok(response),
        }
    }

    /// Missing README or empty repository listings are not errors.
    async fn get_optional(&self, url: &str, accept: &str) -> Result<Option<reqwest::Response>, SourceError> {
        match self.get(url, accept).await {
            Ok(response) => Ok(Some(response)),
            Err(SourceError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn fetch_file(&self, item: &ContentItem) -> Option<(String, String)> {
        let url = item.download_url.as_deref()?;
        match self.get(url, GITHUB_RAW).await {
            Ok(response) => response.text().await.ok().map(|text| (item.name.clone(), text)),
            Err(e) => {
                debug!("Skipping {}: {e}", item.name);
                None
            }
        }
    }
}

#[async_trait]
impl RepositoryFetcher for GithubFetcher {
    async fn fetch(&self, repository: &RepositoryRef) -> Result<String, SourceError> {
        let base = format!("{GITHUB_API_URL}/repos/{}/{}", repository.owner, repository.name);

        let metadata: RepositoryMetadata = self
            .get(&base, GITHUB_JSON)
            .await
            .map_err(|e| match e {
                SourceError::NotFound(_) => SourceError::NotFound(format!(
                    "repository {} does not exist or is private",
                    repository.slug()
                )),
                other => other,
            })?
            .json()
            .await
            .map_err(|e| SourceError::Fetch(format!("unexpected repository metadata: {e}")))?;

        let readme = match self
            .get_optional(&format!("{base}/readme"), GITHUB_RAW)
            .await?
        {
            Some(response) => response.text().await.ok(),
            None => None,
        };

        let listing: Vec<ContentItem> = match self
            .get_optional(&format!("{base}/contents"), GITHUB_JSON)
            .await?
        {
            Some(response) => response.json().await.unwrap_or_default(),
            None => Vec::new(),
        };

        let selected = select_important_files(&listing, self.max_files, self.max_file_bytes);
        let files: Vec<(String, String)> = join_all(selected.iter().map(|item| self.fetch_file(item)))
            .await
            .into_iter()
            .flatten()
            .collect();

        debug!(
            "Fetched {} with readme={} and {} important files",
            metadata.full_name,
            readme.is_some(),
            files.len()
        );
        Ok(compose_repository_content(&metadata, readme.as_deref(), &files))
    }
}

/// Maps a GitHub status code to a source error; `None` for success.
fn classify_status(status: u16, quota_exhausted: bool) -> Option<SourceError> {
    match status {
        200..=299 => None,
        429 => Some(SourceError::RateLimited("GitHub API".to_string())),
        403 if quota_exhausted => Some(SourceError::RateLimited("GitHub API".to_string())),
        404 => Some(SourceError::NotFound("GitHub resource".to_string())),
        401 | 403 => Some(SourceError::Fetch("access to the repository was denied".to_string())),
        other => Some(SourceError::Fetch(format!("GitHub API returned HTTP {other}"))),
    }
}

fn file_rank(name: &str) -> Option<u8> {
    let lowered = name.to_ascii_lowercase();
    if lowered.starts_with("readme") {
        return None;
    }
    if IMPORTANT_FILE_NAMES.contains(&lowered.as_str()) {
        return Some(0);
    }
    let extension = lowered.rsplit_once('.').map(|(_, ext)| ext)?;
    SOURCE_EXTENSIONS.contains(&extension).then_some(1)
}

fn select_important_files(listing: &[ContentItem], max_files: usize, max_bytes: u64) -> Vec<ContentItem> {
    let mut candidates: Vec<(u8, &ContentItem)> = listing
        .iter()
        .filter(|item| item.item_type == "file" && item.size <= max_bytes)
        .filter_map(|item| file_rank(&item.name).map(|rank| (rank, item)))
        .collect();
    candidates.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.name.cmp(&b.1.name)));
    candidates
        .into_iter()
        .take(max_files)
        .map(|(_, item)| item.clone())
        .collect()
}

fn compose_repository_content(
    metadata: &RepositoryMetadata,
    readme: Option<&str>,
    files: &[(String, String)],
) -> String {
    let mut out = format!("Repository: {}\n", metadata.full_name);
    if let Some(description) = metadata.description.as_deref().filter(|d| !d.trim().is_empty()) {
        out.push_str(&format!("Description: {description}\n"));
    }
    if let Some(language) = &metadata.language {
        out.push_str(&format!("Primary language: {language}\n"));
    }
    if !metadata.topics.is_empty() {
        out.push_str(&format!("Topics: {}\n", metadata.topics.join(", ")));
    }
    if let Some(readme) = readme.filter(|r| !r.trim().is_empty()) {
        out.push_str("\n## README\n");
        out.push_str(readme.trim());
        out.push('\n');
    }
    for (name, text) in files {
        out.push_str(&format!("\n## File: {name}\n```\n{}\n```\n", text.trim()));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(name: &str, size: u64) -> ContentItem {
        ContentItem {
            name: name.to_string(),
            item_type: "file".to_string(),
            size,
            download_url: Some(format!("https://raw.example/{name}")),
        }
    }

    #[test]
    fn test_parse_repository_url_variants() {
        let expected = Some(RepositoryRef {
            owner: "acme".to_string(),
            name: "widget".to_string(),
        });
        assert_eq!(parse_repository_url("https://github.com/acme/widget"), expected);
        assert_eq!(parse_repository_url("https://github.com/acme/widget.git"), expected);
        assert_eq!(parse_repository_url("github.com/acme/widget/tree/main/src"), expected);
        assert_eq!(parse_repository_url("https://www.GitHub.com/acme/widget/"), expected);
    }

    #[test]
    fn test_parse_repository_url_rejects_other_links() {
        assert_eq!(parse_repository_url("https://gitlab.com/acme/widget"), None);
        assert_eq!(parse_repository_url("https://github.com/acme"), None);
        assert_eq!(parse_repository_url("https://example.com/portfolio"), None);
        assert_eq!(parse_repository_url("not a url at all"), None);
    }

    #[test]
    fn test_classify_status() {
        assert_eq!(classify_status(200, false), None);
        assert_eq!(
            classify_status(403, true),
            Some(SourceError::RateLimited("GitHub API".to_string()))
        );
        assert_eq!(
            classify_status(429, false),
            Some(SourceError::RateLimited("GitHub API".to_string()))
        );
        assert!(matches!(classify_status(404, false), Some(SourceError::NotFound(_))));
        assert!(matches!(classify_status(403, false), Some(SourceError::Fetch(_))));
    }

    #[test]
    fn test_select_important_files_prefers_manifests_and_caps() {
        let listing = vec![
            item("README.md", 100),
            item("main.rs", 500),
            item("Cargo.toml", 300),
            item("huge.py", 1_000_000),
            item("logo.png", 10),
            item("Dockerfile", 200),
            ContentItem {
                item_type: "dir".to_string(),
                ..item("src", 0)
            },
        ];
        let selected = select_important_files(&listing, 2, 20_000);
        let names: Vec<_> = selected.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["Cargo.toml", "Dockerfile"]);

        let all = select_important_files(&listing, 10, 20_000);
        let names: Vec<_> = all.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["Cargo.toml", "Dockerfile", "main.rs"]);
    }

    #[test]
    fn test_compose_repository_content() {
        let metadata = RepositoryMetadata {
            full_name: "acme/widget".to_string(),
            description: Some("Fast widgets".to_string()),
            language: Some("Rust".to_string()),
            topics: vec!["cli".to_string()],
        };
        let content = compose_repository_content(
            &metadata,
            Some("# Widget\nUsage..."),
            &[("Cargo.toml".to_string(), "[package]\nname = \"widget\"".to_string())],
        );
        assert!(content.starts_with("Repository: acme/widget\n"));
        assert!(content.contains("Primary language: Rust"));
        assert!(content.contains("## README\n# Widget"));
        assert!(content.contains("## File: Cargo.toml\n```\n[package]"));
    }
}
