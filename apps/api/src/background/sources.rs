//! Source Normalizer: turns the raw candidate inputs into a uniform list of labeled sources.
//!
//! Free text, uploaded documents and project links each become one `Source` (or several
//! ordered parts when the resolved content is oversized). Resolution failures never abort:
//! they produce an unreadable source carrying the reason.

use futures_util::future::join_all;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::background::documents::{document_label, DocumentTextExtractor};
use crate::background::models::{part_label, Source, SourceKind, SourcePart};
use crate::background::repository::{parse_repository_url, RepositoryFetcher};
use crate::config::PipelineConfig;

/// Label of the free-text source.
pub const FREE_TEXT_LABEL: &str = "Resume text";

/// Values the UI submits when the candidate left the text box empty.
const NO_TEXT_PLACEHOLDERS: &[&str] = &[
    "no resume text provided",
    "no text provided",
    "n/a",
    "none",
];

/// Why a document or repository could not be turned into text.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SourceError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("rate limited by {0}; try again later")]
    RateLimited(String),

    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("no extractable text (scanned or empty file)")]
    Empty,

    #[error("storage error: {0}")]
    Storage(String),

    #[error("fetch failed: {0}")]
    Fetch(String),
}

/// Resolves every input into sources, in the order: free text, documents, repositories, other links.
pub async fn normalize_sources(
    free_text: &str,
    document_refs: &[String],
    project_links: &[String],
    documents: &dyn DocumentTextExtractor,
    repositories: &dyn RepositoryFetcher,
    config: &PipelineConfig,
) -> Vec<Source> {
    let mut sources = Vec::new();

    if let Some(text) = meaningful_text(free_text) {
        sources.push(Source::resolved(
            SourceKind::FreeText,
            FREE_TEXT_LABEL,
            text,
            text.to_string(),
        ));
    }

    let document_refs = distinct_non_blank(document_refs);
    let labeled: Vec<(&str, String)> = document_refs
        .iter()
        .copied()
        .zip(document_labels(&document_refs))
        .collect();
    for batch in labeled.chunks(config.resolution_batch_size.max(1)) {
        let resolved = join_all(
            batch
                .iter()
                .map(|(reference, label)| resolve_document(documents, reference, label, config)),
        )
        .await;
        sources.extend(resolved.into_iter().flatten());
    }

    let links = distinct_non_blank(project_links);
    let (repository_links, other_links): (Vec<&str>, Vec<&str>) = links
        .into_iter()
        .partition(|link| parse_repository_url(link).is_some());

    for batch in repository_links.chunks(config.resolution_batch_size.max(1)) {
        let resolved = join_all(
            batch
                .iter()
                .map(|link| resolve_repository(repositories, link, config)),
        )
        .await;
        sources.extend(resolved.into_iter().flatten());
    }

    for link in other_links {
        sources.push(Source::resolved(
            SourceKind::Link,
            link,
            link,
            format!("Project link: {link}"),
        ));
    }

    let unreadable = sources.iter().filter(|s| !s.is_readable()).count();
    info!(
        "Normalized {} sources ({} unreadable) from {} documents and {} links",
        sources.len(),
        unreadable,
        document_refs.len(),
        project_links.len()
    );

    sources
}

/// Returns the trimmed text, or `None` for empty input and known placeholders.
fn meaningful_text(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    let lowered = trimmed.to_lowercase();
    if NO_TEXT_PLACEHOLDERS.contains(&lowered.as_str()) {
        return None;
    }
    Some(trimmed)
}

fn distinct_non_blank(values: &[String]) -> Vec<&str> {
    let mut seen = Vec::new();
    for value in values {
        let value = value.trim();
        if !value.is_empty() && !seen.contains(&value) {
            seen.push(value);
        }
    }
    seen
}

/// File names label documents. When two references share a file name, both keep their full
/// reference instead, so every document is accounted for under its own name.
fn document_labels(references: &[&str]) -> Vec<String> {
    let names: Vec<String> = references.iter().map(|r| document_label(r)).collect();
    names
        .iter()
        .zip(references)
        .map(|(name, reference)| {
            if names.iter().filter(|other| *other == name).count() > 1 {
                reference.to_string()
            } else {
                name.clone()
            }
        })
        .collect()
}

async fn resolve_document(
    documents: &dyn DocumentTextExtractor,
    reference: &str,
    label: &str,
    config: &PipelineConfig,
) -> Vec<Source> {
    match documents.extract_text(reference).await {
        Ok(text) if text.trim().is_empty() => {
            warn!("Document {label} produced no text");
            vec![Source::unreadable(
                SourceKind::Document,
                label,
                reference,
                SourceError::Empty.to_string(),
            )]
        }
        Ok(text) => {
            debug!("Document {label} resolved to {} chars", text.chars().count());
            let source = Source::resolved(SourceKind::Document, label, reference, text);
            split_oversized(source, config.source_split_chars)
        }
        Err(e) => {
            warn!("Document {label} could not be read: {e}");
            vec![Source::unreadable(
                SourceKind::Document,
                label,
                reference,
                e.to_string(),
            )]
        }
    }
}

async fn resolve_repository(
    repositories: &dyn RepositoryFetcher,
    link: &str,
    config: &PipelineConfig,
) -> Vec<Source> {
    let Some(repository) = parse_repository_url(link) else {
        return Vec::new();
    };
    match repositories.fetch(&repository).await {
        Ok(content) => {
            debug!(
                "Repository {} resolved to {} chars",
                repository.slug(),
                content.chars().count()
            );
            let source = Source::resolved(SourceKind::Repository, link, link, content);
            split_oversized(source, config.source_split_chars)
        }
        Err(e) => {
            warn!("Repository {} could not be fetched: {e}", repository.slug());
            vec![Source::unreadable(
                SourceKind::Repository,
                link,
                link,
                e.to_string(),
            )]
        }
    }
}

/// Splits a source whose content exceeds `max_chars` into ordered `[Part i/N]` sources.
pub fn split_oversized(source: Source, max_chars: usize) -> Vec<Source> {
    let pieces = split_text(&source.content, max_chars.max(1));
    if pieces.len() <= 1 {
        return vec![source];
    }

    let count = pieces.len();
    info!("Splitting source {} into {count} parts", source.label);
    pieces
        .into_iter()
        .enumerate()
        .map(|(i, content)| Source {
            kind: source.kind,
            label: part_label(&source.origin_label, i + 1, count),
            raw_locator: source.raw_locator.clone(),
            content,
            origin_label: source.origin_label.clone(),
            part: Some(SourcePart {
                index: i + 1,
                count,
            }),
            failure: None,
        })
        .collect()
}

/// Cuts `text` into pieces of at most `max_chars` characters, preferring line boundaries
/// in the second half of each window.
fn split_text(text: &str, max_chars: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut rest = text;
    while !rest.is_empty() {
        let Some((hard_end, _)) = rest.char_indices().nth(max_chars) else {
            pieces.push(rest.to_string());
            break;
        };
        let cut = rest[..hard_end]
            .rfind('\n')
            .filter(|&i| i + 1 > hard_end / 2)
            .map(|i| i + 1)
            .unwrap_or(hard_end);
        pieces.push(rest[..cut].to_string());
        rest = &rest[cut..];
    }
    pieces
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background::testing::{FakeDocuments, FakeRepositories};

    #[test]
    fn test_placeholder_text_is_absent() {
        assert_eq!(meaningful_text(""), None);
        assert_eq!(meaningful_text("   \n"), None);
        assert_eq!(meaningful_text("No resume text provided"), None);
        assert_eq!(meaningful_text(" N/A "), None);
        assert_eq!(meaningful_text(" Built things "), Some("Built things"));
    }

    #[test]
    fn test_split_text_respects_limit_and_keeps_content() {
        let text = "line one\nline two\nline three\nline four\n".repeat(50);
        let pieces = split_text(&text, 100);
        assert!(pieces.len() > 1);
        assert!(pieces.iter().all(|p| p.chars().count() <= 100));
        assert_eq!(pieces.concat(), text);
    }

    #[test]
    fn test_split_text_handles_multibyte_without_newlines() {
        let text = "é".repeat(250);
        let pieces = split_text(&text, 100);
        assert_eq!(pieces.len(), 3);
        assert_eq!(pieces.concat(), text);
    }

    #[test]
    fn test_split_oversized_labels_parts() {
        let source = Source::resolved(
            SourceKind::Repository,
            "https://github.com/acme/widget",
            "https://github.com/acme/widget",
            "x".repeat(25),
        );
        let parts = split_oversized(source, 10);
        let labels: Vec<_> = parts.iter().map(|p| p.label.as_str()).collect();
        assert_eq!(
            labels,
            vec![
                "https://github.com/acme/widget [Part 1/3]",
                "https://github.com/acme/widget [Part 2/3]",
                "https://github.com/acme/widget [Part 3/3]",
            ]
        );
        assert!(parts
            .iter()
            .all(|p| p.origin_label == "https://github.com/acme/widget"));
        assert_eq!(parts[2].part, Some(SourcePart { index: 3, count: 3 }));
    }

    #[test]
    fn test_split_oversized_keeps_small_source_whole() {
        let source = Source::resolved(SourceKind::Document, "cv.pdf", "cv.pdf", "short".into());
        let parts = split_oversized(source.clone(), 10);
        assert_eq!(parts, vec![source]);
    }

    #[tokio::test]
    async fn test_normalize_sources_orders_and_classifies() {
        let documents = FakeDocuments::default()
            .with("uploads/cv.pdf", Ok("Engineer at Acme".to_string()))
            .with("uploads/broken.docx", Err(SourceError::UnsupportedFormat("docx".into())));
        let repositories = FakeRepositories::default()
            .with("acme/widget", Ok("# Widget\nA Rust crate".to_string()));

        let sources = normalize_sources(
            "Senior engineer with 5 years of Rust",
            &[
                "uploads/cv.pdf".to_string(),
                "uploads/broken.docx".to_string(),
                "uploads/cv.pdf".to_string(),
            ],
            &[
                "https://example.com/portfolio".to_string(),
                "https://github.com/acme/widget".to_string(),
            ],
            &documents,
            &repositories,
            &PipelineConfig::default(),
        )
        .await;

        let summary: Vec<_> = sources
            .iter()
            .map(|s| (s.kind, s.label.as_str(), s.is_readable()))
            .collect();
        assert_eq!(
            summary,
            vec![
                (SourceKind::FreeText, FREE_TEXT_LABEL, true),
                (SourceKind::Document, "cv.pdf", true),
                (SourceKind::Document, "broken.docx", false),
                (SourceKind::Repository, "https://github.com/acme/widget", true),
                (SourceKind::Link, "https://example.com/portfolio", true),
            ]
        );
        assert!(sources[2].content.contains("unsupported format"));
    }

    #[test]
    fn test_document_labels_disambiguate_shared_file_names() {
        let labels = document_labels(&["uploads/a/resume.pdf", "uploads/b/resume.pdf", "s3://bucket/cv.pdf"]);
        assert_eq!(labels, vec!["uploads/a/resume.pdf", "uploads/b/resume.pdf", "cv.pdf"]);
    }

    #[tokio::test]
    async fn test_failed_document_sharing_a_file_name_keeps_its_own_label() {
        let documents = FakeDocuments::default()
            .with("uploads/a/resume.pdf", Ok("Engineer at Acme".to_string()))
            .with("uploads/b/resume.pdf", Err(SourceError::Empty));
        let sources = normalize_sources(
            "",
            &["uploads/a/resume.pdf".to_string(), "uploads/b/resume.pdf".to_string()],
            &[],
            &documents,
            &FakeRepositories::default(),
            &PipelineConfig::default(),
        )
        .await;

        let summary: Vec<_> = sources
            .iter()
            .map(|s| (s.label.as_str(), s.is_readable()))
            .collect();
        assert_eq!(
            summary,
            vec![("uploads/a/resume.pdf", true), ("uploads/b/resume.pdf", false)]
        );
    }

    #[tokio::test]
    async fn test_rate_limited_repository_becomes_note() {
        let repositories = FakeRepositories::default().with(
            "acme/widget",
            Err(SourceError::RateLimited("GitHub API".into())),
        );
        let sources = normalize_sources(
            "",
            &[],
            &["https://github.com/acme/widget.git".to_string()],
            &FakeDocuments::default(),
            &repositories,
            &PipelineConfig::default(),
        )
        .await;

        assert_eq!(sources.len(), 1);
        assert_eq!(
            sources[0].failure.as_deref(),
            Some("rate limited by GitHub API; try again later")
        );
        assert!(sources[0].content.contains("could not be read"));
    }

    #[tokio::test]
    async fn test_oversized_repository_is_pre_split() {
        let repositories =
            FakeRepositories::default().with("acme/widget", Ok("a\n".repeat(40)));
        let config = PipelineConfig {
            source_split_chars: 30,
            ..PipelineConfig::default()
        };
        let sources = normalize_sources(
            "",
            &[],
            &["https://github.com/acme/widget".to_string()],
            &FakeDocuments::default(),
            &repositories,
            &config,
        )
        .await;

        assert_eq!(sources.len(), 3);
        assert!(sources
            .iter()
            .all(|s| s.origin_label == "https://github.com/acme/widget"));
        assert!(sources[0].label.ends_with("[Part 1/3]"));
    }
}
