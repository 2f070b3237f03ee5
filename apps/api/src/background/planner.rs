//! Chunk Planner: decides between one extraction call and per-source chunks.

use std::collections::BTreeSet;

use tracing::info;

use crate::background::models::{Chunk, Source, SourceKind};
use crate::config::PipelineConfig;

#[derive(Debug, Clone, PartialEq)]
pub enum ChunkPlan {
    /// The whole prompt goes out in one call.
    SingleCall,
    Chunked(Vec<Chunk>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkReason {
    PromptTooLong,
    TooManyRepositories,
    LocallyExtractedDocuments,
}

/// What the decision rule looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanInputs {
    pub prompt_chars: usize,
    pub repository_links: usize,
    pub has_local_documents: bool,
}

impl PlanInputs {
    pub fn measure(single_call_prompt: &str, sources: &[Source]) -> Self {
        let repository_links = sources
            .iter()
            .filter(|s| s.kind == SourceKind::Repository)
            .map(|s| s.origin_label.as_str())
            .collect::<BTreeSet<_>>()
            .len();
        Self {
            prompt_chars: single_call_prompt.chars().count(),
            repository_links,
            has_local_documents: sources
                .iter()
                .any(|s| s.kind == SourceKind::Document && s.is_readable()),
        }
    }
}

/// Every condition that forces chunking. Empty means the single call is allowed.
pub fn chunking_reasons(inputs: &PlanInputs, config: &PipelineConfig) -> Vec<ChunkReason> {
    let mut reasons = Vec::new();
    if inputs.prompt_chars > config.single_call_max_chars {
        reasons.push(ChunkReason::PromptTooLong);
    }
    if inputs.repository_links > config.max_single_call_repositories {
        reasons.push(ChunkReason::TooManyRepositories);
    }
    if inputs.has_local_documents {
        reasons.push(ChunkReason::LocallyExtractedDocuments);
    }
    reasons
}

pub fn plan_chunks(single_call_prompt: &str, sources: &[Source], config: &PipelineConfig) -> ChunkPlan {
    let inputs = PlanInputs::measure(single_call_prompt, sources);
    let reasons = chunking_reasons(&inputs, config);
    if reasons.is_empty() {
        info!(
            "Single extraction call ({} chars, {} repositories)",
            inputs.prompt_chars, inputs.repository_links
        );
        return ChunkPlan::SingleCall;
    }

    let chunks = build_chunks(sources);
    info!(
        "Chunking into {} chunks ({} chars, {} repositories): {:?}",
        chunks.len(),
        inputs.prompt_chars,
        inputs.repository_links,
        reasons
    );
    ChunkPlan::Chunked(chunks)
}

/// One chunk per readable source. Also used when a single call is rejected by the service.
pub fn build_chunks(sources: &[Source]) -> Vec<Chunk> {
    sources
        .iter()
        .filter(|s| s.is_readable())
        .map(|source| Chunk {
            content: format_source_block(source),
            source_label: source.label.clone(),
            source_kind: source.kind,
            part_index: source.part.map(|p| p.index),
            part_count: source.part.map(|p| p.count),
            origin_source_label: source.origin_label.clone(),
        })
        .collect()
}

/// Renders one source as a delimited block the model can cite by label.
pub fn format_source_block(source: &Source) -> String {
    let mut header = format!("=== SOURCE: {} (kind: {}) ===\n", source.label, source.kind.as_str());
    if let Some(part) = source.part {
        header.push_str(&format!(
            "(part {} of {} of {})\n",
            part.index, part.count, source.origin_label
        ));
    }
    if source.kind != SourceKind::FreeText && source.raw_locator != source.label {
        header.push_str(&format!("Reference: {}\n", source.raw_locator));
    }
    format!(
        "{header}{}\n=== END SOURCE: {} ===",
        source.content.trim_end(),
        source.label
    )
}

/// All readable sources rendered back to back, as used by the single call.
pub fn render_sources(sources: &[Source]) -> String {
    sources
        .iter()
        .filter(|s| s.is_readable())
        .map(format_source_block)
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background::models::SourcePart;

    fn text_source(label: &str) -> Source {
        Source::resolved(SourceKind::FreeText, label, "inline", "Built a compiler".to_string())
    }

    fn repo_source(url: &str) -> Source {
        Source::resolved(SourceKind::Repository, url, url, "# README".to_string())
    }

    fn config() -> PipelineConfig {
        PipelineConfig {
            single_call_max_chars: 100,
            ..PipelineConfig::default()
        }
    }

    #[test]
    fn test_prompt_at_threshold_boundary() {
        let sources = vec![text_source("Resume text")];
        let just_under = "x".repeat(99);
        let at = "x".repeat(100);
        let over = "x".repeat(101);

        assert_eq!(plan_chunks(&just_under, &sources, &config()), ChunkPlan::SingleCall);
        assert_eq!(plan_chunks(&at, &sources, &config()), ChunkPlan::SingleCall);
        assert!(matches!(
            plan_chunks(&over, &sources, &config()),
            ChunkPlan::Chunked(chunks) if chunks.len() == 1
        ));
    }

    #[test]
    fn test_more_than_two_repositories_forces_chunking() {
        let two = vec![
            repo_source("https://github.com/a/one"),
            repo_source("https://github.com/a/two"),
        ];
        let inputs = PlanInputs::measure("short", &two);
        assert!(chunking_reasons(&inputs, &config()).is_empty());

        let mut three = two.clone();
        three.push(repo_source("https://github.com/a/three"));
        let inputs = PlanInputs::measure("short", &three);
        assert_eq!(
            chunking_reasons(&inputs, &config()),
            vec![ChunkReason::TooManyRepositories]
        );
    }

    #[test]
    fn test_unfetched_repository_links_still_count() {
        let sources = vec![
            repo_source("https://github.com/a/one"),
            repo_source("https://github.com/a/two"),
            Source::unreadable(
                SourceKind::Repository,
                "https://github.com/a/three",
                "https://github.com/a/three",
                "rate limited by GitHub API; try again later".to_string(),
            ),
        ];
        let inputs = PlanInputs::measure("short", &sources);
        assert_eq!(inputs.repository_links, 3);
        assert_eq!(
            chunking_reasons(&inputs, &config()),
            vec![ChunkReason::TooManyRepositories]
        );
    }

    #[test]
    fn test_split_parts_count_as_one_repository() {
        let parts: Vec<Source> = (1..=3)
            .map(|i| Source {
                label: format!("https://github.com/a/big [Part {i}/3]"),
                origin_label: "https://github.com/a/big".to_string(),
                part: Some(SourcePart { index: i, count: 3 }),
                ..repo_source("https://github.com/a/big")
            })
            .collect();
        assert_eq!(PlanInputs::measure("short", &parts).repository_links, 1);
    }

    #[test]
    fn test_local_documents_force_chunking() {
        let sources = vec![Source::resolved(
            SourceKind::Document,
            "cv.pdf",
            "uploads/cv.pdf",
            "Engineer".to_string(),
        )];
        let inputs = PlanInputs::measure("short", &sources);
        assert_eq!(
            chunking_reasons(&inputs, &config()),
            vec![ChunkReason::LocallyExtractedDocuments]
        );
    }

    #[test]
    fn test_unreadable_sources_do_not_become_chunks() {
        let sources = vec![
            text_source("Resume text"),
            Source::unreadable(
                SourceKind::Document,
                "scan.pdf",
                "uploads/scan.pdf",
                "no extractable text".to_string(),
            ),
        ];
        let inputs = PlanInputs::measure("short", &sources);
        assert!(!inputs.has_local_documents);
        let chunks = build_chunks(&sources);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].source_label, "Resume text");
    }

    #[test]
    fn test_chunk_carries_part_metadata() {
        let source = Source {
            label: "https://github.com/a/big [Part 2/3]".to_string(),
            origin_label: "https://github.com/a/big".to_string(),
            part: Some(SourcePart { index: 2, count: 3 }),
            ..repo_source("https://github.com/a/big")
        };
        let chunk = &build_chunks(&[source])[0];
        assert_eq!(chunk.part_index, Some(2));
        assert_eq!(chunk.part_count, Some(3));
        assert_eq!(chunk.origin_source_label, "https://github.com/a/big");
        assert!(chunk
            .content
            .starts_with("=== SOURCE: https://github.com/a/big [Part 2/3] (kind: repository) ===\n(part 2 of 3"));
    }
}
