//! Pipeline entry point: sources → plan → extraction → merge → final pass.

use std::sync::Arc;

use futures_util::future::join_all;
use tracing::{info, warn};

use crate::background::assembler::assemble_final;
use crate::background::documents::DocumentTextExtractor;
use crate::background::extractor::{
    build_extraction_prompt, extract_chunk, failure_reason, request_extraction, sanitize_partial,
};
use crate::background::merger::merge_records;
use crate::background::models::{Chunk, InaccessibleSource, Source, StructuredRecord};
use crate::background::planner::{build_chunks, plan_chunks, render_sources, ChunkPlan};
use crate::background::prompts::FULL_SCOPE_NOTE;
use crate::background::repository::RepositoryFetcher;
use crate::background::sources::normalize_sources;
use crate::config::PipelineConfig;
use crate::errors::AppError;
use crate::llm_client::{CompletionService, LlmError};

/// Background extraction with its collaborators injected.
#[derive(Clone)]
pub struct BackgroundPipeline {
    completion: Arc<dyn CompletionService>,
    documents: Arc<dyn DocumentTextExtractor>,
    repositories: Arc<dyn RepositoryFetcher>,
    config: PipelineConfig,
}

impl BackgroundPipeline {
    pub fn new(
        completion: Arc<dyn CompletionService>,
        documents: Arc<dyn DocumentTextExtractor>,
        repositories: Arc<dyn RepositoryFetcher>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            completion,
            documents,
            repositories,
            config,
        }
    }

    /// Turns free text, document references and project links into one structured record.
    ///
    /// Only a missing completion-service credential is an error. Every data-level problem
    /// ends up in the record's `inaccessible_sources`.
    pub async fn extract_skills_visualization(
        &self,
        free_text: &str,
        document_refs: &[String],
        project_links: &[String],
    ) -> Result<StructuredRecord, AppError> {
        if !self.completion.is_configured() {
            return Err(AppError::Configuration(
                "completion service credential is not set".to_string(),
            ));
        }

        let sources = normalize_sources(
            free_text,
            document_refs,
            project_links,
            self.documents.as_ref(),
            self.repositories.as_ref(),
            &self.config,
        )
        .await;
        let unreadable = unreadable_record(&sources);
        info!(
            "Resolved {} sources ({} unreadable)",
            sources.len(),
            unreadable.inaccessible_sources.len()
        );

        if !sources.iter().any(Source::is_readable) {
            return Ok(merge_records(vec![unreadable]));
        }

        let prompt = build_extraction_prompt(FULL_SCOPE_NOTE, &render_sources(&sources), &self.config);
        let record = match plan_chunks(&prompt, &sources, &self.config) {
            ChunkPlan::SingleCall => self.run_single_call(&prompt, &sources, unreadable).await,
            ChunkPlan::Chunked(chunks) => self.run_chunked(chunks, unreadable).await,
        };
        info!(
            "Background extraction finished: {} experiences, {} projects, {} skills, {} inaccessible sources",
            record.experiences.len(),
            record.projects.len(),
            record.all_skills.len(),
            record.inaccessible_sources.len()
        );
        Ok(record)
    }

    async fn run_single_call(
        &self,
        prompt: &str,
        sources: &[Source],
        unreadable: StructuredRecord,
    ) -> StructuredRecord {
        match request_extraction(self.completion.as_ref(), prompt).await {
            Ok(record) => merge_records(vec![unreadable, sanitize_partial(record, &self.config)]),
            Err(e) if e.is_request_rejected() => {
                warn!("Single extraction call rejected, falling back to chunks: {e}");
                self.run_chunked(build_chunks(sources), unreadable).await
            }
            Err(e) => {
                warn!("Single extraction call failed: {e}");
                merge_records(vec![unreadable, failed_call_record(sources, &e)])
            }
        }
    }

    async fn run_chunked(&self, chunks: Vec<Chunk>, unreadable: StructuredRecord) -> StructuredRecord {
        let completion = self.completion.as_ref();
        let partials = join_all(
            chunks
                .iter()
                .map(|chunk| extract_chunk(completion, chunk, &self.config)),
        )
        .await;

        let mut all = Vec::with_capacity(partials.len() + 1);
        all.push(unreadable);
        all.extend(partials);
        let merged = merge_records(all);
        assemble_final(completion, merged).await
    }
}

/// Inaccessible entries for every source that failed to resolve.
fn unreadable_record(sources: &[Source]) -> StructuredRecord {
    StructuredRecord {
        inaccessible_sources: sources
            .iter()
            .filter_map(|s| {
                s.failure.as_ref().map(|reason| InaccessibleSource {
                    source_name: s.origin_label.clone(),
                    source_kind: s.kind,
                    reason: reason.clone(),
                })
            })
            .collect(),
        ..Default::default()
    }
}

/// Every readable source is reported inaccessible when the only call fails.
fn failed_call_record(sources: &[Source], error: &LlmError) -> StructuredRecord {
    let reason = failure_reason(error);
    StructuredRecord {
        inaccessible_sources: sources
            .iter()
            .filter(|s| s.is_readable())
            .map(|s| InaccessibleSource {
                source_name: s.origin_label.clone(),
                source_kind: s.kind,
                reason: reason.clone(),
            })
            .collect(),
        ..Default::default()
    }
}
