//! Chunk Extractor: one structured-extraction request per chunk.
//!
//! A failing chunk never aborts its siblings: the failure is folded into a partial
//! record that reports the chunk's origin source as inaccessible.

use std::collections::BTreeSet;

use tracing::{debug, warn};

use crate::background::models::{Chunk, EntryDetails, SkillEvidence, StructuredRecord};
use crate::background::prompts::{
    extraction_schema, CHUNK_SCOPE_NOTE, EXTRACTION_OUTPUT_DESCRIPTION, EXTRACTION_OUTPUT_NAME,
    EXTRACTION_PROMPT_TEMPLATE, EXTRACTION_SYSTEM,
};
use crate::background::quantification::{reconcile_other_bullet, reconcile_xyz_bullet};
use crate::config::PipelineConfig;
use crate::llm_client::prompts::{grounding_instruction, STRUCTURED_ONLY_SYSTEM};
use crate::llm_client::{CompletionService, LlmError, StructuredRequest};

pub fn build_extraction_prompt(scope_note: &str, sources_text: &str, config: &PipelineConfig) -> String {
    EXTRACTION_PROMPT_TEMPLATE
        .replace("{scope_note}", scope_note)
        .replace(
            "{grounding_instruction}",
            &grounding_instruction(config.evidence_max_words),
        )
        .replace("{sources}", sources_text)
}

fn chunk_scope_note(chunk: &Chunk) -> String {
    let label = match (chunk.part_index, chunk.part_count) {
        (Some(index), Some(count)) => format!(
            "{}, part {index} of {count} of {}",
            chunk.source_label, chunk.origin_source_label
        ),
        _ => chunk.source_label.clone(),
    };
    CHUNK_SCOPE_NOTE.replace("{source_label}", &label)
}

/// Sends one extraction request and parses the answer. No sanitizing.
pub async fn request_extraction(
    service: &dyn CompletionService,
    prompt: &str,
) -> Result<StructuredRecord, LlmError> {
    let schema = extraction_schema();
    let system = format!("{EXTRACTION_SYSTEM} {STRUCTURED_ONLY_SYSTEM}");
    let value = service
        .complete_structured(StructuredRequest {
            system: &system,
            prompt,
            output_name: EXTRACTION_OUTPUT_NAME,
            output_description: EXTRACTION_OUTPUT_DESCRIPTION,
            schema: &schema,
        })
        .await?;
    Ok(serde_json::from_value(value)?)
}

/// Extracts one chunk. Always returns a partial record.
pub async fn extract_chunk(
    service: &dyn CompletionService,
    chunk: &Chunk,
    config: &PipelineConfig,
) -> StructuredRecord {
    let prompt = build_extraction_prompt(&chunk_scope_note(chunk), &chunk.content, config);
    match request_extraction(service, &prompt).await {
        Ok(record) => {
            let record = sanitize_partial(record, config);
            debug!(
                "Chunk {} yielded {} entities and {} skills",
                chunk.source_label,
                record.entity_count(),
                record.all_skills.len()
            );
            record
        }
        Err(e) => {
            warn!("Extraction failed for chunk {}: {e}", chunk.source_label);
            StructuredRecord::inaccessible(
                &chunk.origin_source_label,
                chunk.source_kind,
                failure_reason(&e),
            )
        }
    }
}

/// Human-readable reason recorded when the completion service could not analyze a source.
pub fn failure_reason(error: &LlmError) -> String {
    match error {
        LlmError::RateLimited { retries } => format!(
            "Completion service rate limit persisted after {retries} retries"
        ),
        LlmError::Parse(_) => "Completion service returned a malformed response".to_string(),
        LlmError::EmptyContent => "Completion service returned an empty response".to_string(),
        LlmError::Api { status, message } => {
            format!("Completion service rejected the request (HTTP {status}): {message}")
        }
        LlmError::Http(e) => format!("Completion service unreachable: {e}"),
        LlmError::MissingApiKey => "Completion service is not configured".to_string(),
    }
}

/// Enforces the record invariants on a freshly extracted partial:
/// skills need evidence, quotes are clipped, bullets are reconciled, and
/// `all_skills` only lists evidenced skills.
pub fn sanitize_partial(mut record: StructuredRecord, config: &PipelineConfig) -> StructuredRecord {
    let max_words = config.evidence_max_words;

    record
        .inaccessible_sources
        .retain(|s| !s.source_name.trim().is_empty());
    record.skill_alias_map = record
        .skill_alias_map
        .into_iter()
        .map(|(raw, canonical)| (raw.trim().to_lowercase(), canonical.trim().to_lowercase()))
        .filter(|(raw, canonical)| !raw.is_empty() && !canonical.is_empty())
        .collect();

    record
        .experiences
        .retain(|e| !e.company.trim().is_empty() || !e.title.trim().is_empty());
    for experience in &mut record.experiences {
        experience.company = experience.company.trim().to_string();
        experience.title = experience.title.trim().to_string();
        sanitize_details(&mut experience.details, max_words);
    }
    record.projects.retain(|p| !p.name.trim().is_empty());
    for project in &mut record.projects {
        project.name = project.name.trim().to_string();
        sanitize_details(&mut project.details, max_words);
    }
    record
        .education_entries
        .retain(|e| !e.school.trim().is_empty());
    for education in &mut record.education_entries {
        education.source_names = clean_strings(std::mem::take(&mut education.source_names));
    }
    record.awards.retain(|a| !a.name.trim().is_empty());
    for award in &mut record.awards {
        award.evidence = clip_quotes(std::mem::take(&mut award.evidence), max_words);
    }

    let evidenced: BTreeSet<String> = record
        .experiences
        .iter()
        .map(|e| &e.details)
        .chain(record.projects.iter().map(|p| &p.details))
        .flat_map(|d| d.skills())
        .map(|s| s.skill.clone())
        .collect();
    record.all_skills = evidenced.into_iter().collect();
    record
}

fn sanitize_details(details: &mut EntryDetails, max_words: usize) {
    details.source_names = clean_strings(std::mem::take(&mut details.source_names));
    details.xyz_bullets = std::mem::take(&mut details.xyz_bullets)
        .into_iter()
        .filter(|b| !b.text.trim().is_empty())
        .map(reconcile_xyz_bullet)
        .collect();
    details.other_bullets = std::mem::take(&mut details.other_bullets)
        .into_iter()
        .filter(|b| !b.text.trim().is_empty())
        .map(reconcile_other_bullet)
        .collect();
    details.hard_skills = sanitize_skills(std::mem::take(&mut details.hard_skills), max_words);
    details.soft_skills = sanitize_skills(std::mem::take(&mut details.soft_skills), max_words);
    for cluster in &mut details.skill_clusters {
        cluster.cluster_name = cluster.cluster_name.trim().to_string();
        cluster.skills = clean_strings(
            std::mem::take(&mut cluster.skills)
                .into_iter()
                .map(|s| s.to_lowercase())
                .collect(),
        );
    }
    details
        .skill_clusters
        .retain(|c| !c.cluster_name.is_empty() && !c.skills.is_empty());
}

fn sanitize_skills(skills: Vec<SkillEvidence>, max_words: usize) -> Vec<SkillEvidence> {
    skills
        .into_iter()
        .map(|s| SkillEvidence {
            skill: s.skill.trim().to_lowercase(),
            evidence: clip_quotes(s.evidence, max_words),
        })
        .filter(|s| !s.skill.is_empty() && !s.evidence.is_empty())
        .collect()
}

fn clean_strings(values: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for value in values {
        let value = value.trim().to_string();
        if !value.is_empty() && !out.contains(&value) {
            out.push(value);
        }
    }
    out
}

/// Drops blank quotes and cuts quotes longer than `max_words` down to their first words.
fn clip_quotes(quotes: Vec<String>, max_words: usize) -> Vec<String> {
    let clipped = quotes
        .into_iter()
        .filter_map(|quote| {
            let words: Vec<&str> = quote.split_whitespace().collect();
            match words.len() {
                0 => None,
                n if n <= max_words => Some(quote.trim().to_string()),
                _ => Some(words[..max_words].join(" ")),
            }
        })
        .collect();
    clean_strings(clipped)
}
