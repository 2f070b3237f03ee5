use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

/// Application configuration loaded from environment variables.
/// Fails at startup if required variables are missing.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub s3_bucket: String,
    pub s3_endpoint: String,
    pub aws_access_key_id: String,
    pub aws_secret_access_key: String,
    pub anthropic_api_key: String,
    /// Optional; unauthenticated GitHub calls have a much lower rate limit.
    pub github_token: Option<String>,
    pub port: u16,
    pub rust_log: String,
    pub pipeline: PipelineConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Ok(Config {
            database_url: require_env("DATABASE_URL")?,
            s3_bucket: require_env("S3_BUCKET")?,
            s3_endpoint: require_env("S3_ENDPOINT")?,
            aws_access_key_id: require_env("AWS_ACCESS_KEY_ID")?,
            aws_secret_access_key: require_env("AWS_SECRET_ACCESS_KEY")?,
            anthropic_api_key: require_env("ANTHROPIC_API_KEY")?,
            github_token: std::env::var("GITHUB_TOKEN")
                .ok()
                .filter(|t| !t.trim().is_empty()),
            port: optional_env("PORT", 8080)?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            pipeline: PipelineConfig::from_env()?,
        })
    }
}

/// Tunables of the background-extraction pipeline.
///
/// Passed explicitly into the pipeline so tests can exercise boundary values.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Prompts longer than this (in characters) are never sent as a single call.
    pub single_call_max_chars: usize,
    /// More repository links than this forces chunking.
    pub max_single_call_repositories: usize,
    /// Repository content above this many characters is pre-split into parts of at most this size.
    pub source_split_chars: usize,
    /// Documents and repository fetches are resolved this many at a time.
    pub resolution_batch_size: usize,
    /// Rate-limited completion calls are retried this many times.
    pub rate_limit_retries: u32,
    /// First backoff delay; doubles on every retry.
    pub retry_base_delay: Duration,
    pub repository_max_files: usize,
    pub repository_file_max_bytes: u64,
    pub evidence_max_words: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            single_call_max_chars: 30_000,
            max_single_call_repositories: 2,
            source_split_chars: 25_000,
            resolution_batch_size: 3,
            rate_limit_retries: 3,
            retry_base_delay: Duration::from_secs(2),
            repository_max_files: 8,
            repository_file_max_bytes: 20_000,
            evidence_max_words: 20,
        }
    }
}

impl PipelineConfig {
    /// Defaults, overridden by any `PIPELINE_*` variable that is set.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            single_call_max_chars: optional_env(
                "PIPELINE_SINGLE_CALL_MAX_CHARS",
                defaults.single_call_max_chars,
            )?,
            max_single_call_repositories: optional_env(
                "PIPELINE_MAX_SINGLE_CALL_REPOSITORIES",
                defaults.max_single_call_repositories,
            )?,
            source_split_chars: optional_env(
                "PIPELINE_SOURCE_SPLIT_CHARS",
                defaults.source_split_chars,
            )?
            .max(1),
            resolution_batch_size: optional_env(
                "PIPELINE_RESOLUTION_BATCH_SIZE",
                defaults.resolution_batch_size,
            )?
            .max(1),
            rate_limit_retries: optional_env(
                "PIPELINE_RATE_LIMIT_RETRIES",
                defaults.rate_limit_retries,
            )?,
            retry_base_delay: Duration::from_millis(optional_env(
                "PIPELINE_RETRY_BASE_DELAY_MS",
                defaults.retry_base_delay.as_millis() as u64,
            )?),
            repository_max_files: optional_env(
                "PIPELINE_REPOSITORY_MAX_FILES",
                defaults.repository_max_files,
            )?,
            repository_file_max_bytes: optional_env(
                "PIPELINE_REPOSITORY_FILE_MAX_BYTES",
                defaults.repository_file_max_bytes,
            )?,
            evidence_max_words: optional_env(
                "PIPELINE_EVIDENCE_MAX_WORDS",
                defaults.evidence_max_words,
            )?,
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn optional_env<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("Environment variable '{key}' has an invalid value: {raw}")),
        Err(_) => Ok(default),
    }
}
