//! Final Assembler: one best-effort normalization pass over the merged record.
//!
//! The pass only asks for naming: canonical skill aliases and consistent casing of entity
//! names. Entity bodies, education and inaccessible sources never leave the merged record,
//! and any failure returns the merged record untouched.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::background::merger::{experience_key, merge_records, project_key};
use crate::background::models::{ExperienceEntry, ProjectEntry, StructuredRecord};
use crate::background::prompts::{
    normalization_schema, NORMALIZATION_OUTPUT_DESCRIPTION, NORMALIZATION_OUTPUT_NAME,
    NORMALIZATION_PROMPT_TEMPLATE, NORMALIZATION_SYSTEM,
};
use crate::llm_client::prompts::STRUCTURED_ONLY_SYSTEM;
use crate::llm_client::{CompletionService, LlmError, StructuredRequest};

#[derive(Debug, thiserror::Error)]
pub enum AssemblyError {
    #[error("completion service error: {0}")]
    Llm(#[from] LlmError),

    #[error("malformed normalization response: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("normalization response was empty")]
    Empty,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NormalizationResponse {
    pub skill_alias_map: BTreeMap<String, String>,
    pub experience_names: Vec<ExperienceName>,
    pub project_names: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ExperienceName {
    pub company: String,
    pub title: String,
}

impl NormalizationResponse {
    fn is_empty(&self) -> bool {
        self.skill_alias_map.is_empty() && self.experience_names.is_empty() && self.project_names.is_empty()
    }
}

/// What the normalization pass gets to see.
#[derive(Serialize)]
struct NormalizationPayload<'a> {
    skill_alias_map: &'a BTreeMap<String, String>,
    experiences: &'a [ExperienceEntry],
    projects: &'a [ProjectEntry],
    all_skills: &'a [String],
}

/// Normalizes the merged record, or returns it unchanged when the pass fails.
pub async fn assemble_final(service: &dyn CompletionService, merged: StructuredRecord) -> StructuredRecord {
    if merged.experiences.is_empty() && merged.projects.is_empty() && merged.all_skills.is_empty() {
        return merged;
    }
    match normalize(service, &merged).await {
        Ok(record) => {
            info!(
                "Normalization pass done: {} skills ({} before)",
                record.all_skills.len(),
                merged.all_skills.len()
            );
            record
        }
        Err(e) => {
            warn!("Normalization pass failed, keeping merged record: {e}");
            merged
        }
    }
}

async fn normalize(
    service: &dyn CompletionService,
    merged: &StructuredRecord,
) -> Result<StructuredRecord, AssemblyError> {
    let payload = NormalizationPayload {
        skill_alias_map: &merged.skill_alias_map,
        experiences: &merged.experiences,
        projects: &merged.projects,
        all_skills: &merged.all_skills,
    };
    let prompt = NORMALIZATION_PROMPT_TEMPLATE.replace("{record_json}", &serde_json::to_string_pretty(&payload)?);
    let system = format!("{NORMALIZATION_SYSTEM} {STRUCTURED_ONLY_SYSTEM}");
    let schema = normalization_schema();

    let value = service
        .complete_structured(StructuredRequest {
            system: &system,
            prompt: &prompt,
            output_name: NORMALIZATION_OUTPUT_NAME,
            output_description: NORMALIZATION_OUTPUT_DESCRIPTION,
            schema: &schema,
        })
        .await?;
    let response: NormalizationResponse = serde_json::from_value(value)?;
    apply_normalization(merged.clone(), response)
}

/// Folds the naming answer into the record. Names are only adopted for entities
/// whose identity key they match, so the pass can never invent or drop an entity.
pub fn apply_normalization(
    mut record: StructuredRecord,
    response: NormalizationResponse,
) -> Result<StructuredRecord, AssemblyError> {
    if response.is_empty() {
        return Err(AssemblyError::Empty);
    }

    record.skill_alias_map.extend(response.skill_alias_map);

    for name in response.experience_names {
        let renamed = ExperienceEntry {
            company: name.company.trim().to_string(),
            title: name.title.trim().to_string(),
            ..Default::default()
        };
        if renamed.company.is_empty() && renamed.title.is_empty() {
            continue;
        }
        let key = experience_key(&renamed);
        if let Some(entry) = record.experiences.iter_mut().find(|e| experience_key(e) == key) {
            entry.company = renamed.company;
            entry.title = renamed.title;
        }
    }

    for name in response.project_names {
        let renamed = ProjectEntry {
            name: name.trim().to_string(),
            ..Default::default()
        };
        if renamed.name.is_empty() {
            continue;
        }
        let key = project_key(&renamed);
        if let Some(entry) = record.projects.iter_mut().find(|p| project_key(p) == key) {
            entry.name = renamed.name;
        }
    }

    Ok(merge_records(vec![record]))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::background::testing::FakeCompletion;

    fn merged() -> StructuredRecord {
        let record: StructuredRecord = serde_json::from_value(json!({
            "education_entries": [{"school": "Tufts University", "degree": "BS", "source_names": ["Resume text"]}],
            "experiences": [{
                "company": "acme corp",
                "title": "software engineer",
                "source_names": ["Resume text"],
                "hard_skills": [
                    {"skill": "reactjs", "evidence": ["ReactJS frontend"]},
                    {"skill": "react", "evidence": ["React hooks"]}
                ]
            }],
            "projects": [{"name": "widget", "source_names": ["Resume text"]}],
            "all_skills": ["react", "reactjs"]
        }))
        .unwrap();
        merge_records(vec![record])
    }

    #[tokio::test]
    async fn test_normalization_applies_aliases_and_casing() {
        let completion = FakeCompletion::new(|_| {
            Ok(json!({
                "skill_alias_map": {"reactjs": "react"},
                "experience_names": [
                    {"company": "Acme Corp", "title": "Software Engineer"},
                    {"company": "Invented Inc", "title": "CEO"}
                ],
                "project_names": ["Widget"]
            }))
        });
        let record = assemble_final(&completion, merged()).await;

        assert_eq!(record.experiences.len(), 1);
        assert_eq!(record.experiences[0].company, "Acme Corp");
        assert_eq!(record.experiences[0].title, "Software Engineer");
        assert_eq!(record.projects[0].name, "Widget");
        assert_eq!(record.all_skills, vec!["react"]);
        assert_eq!(record.experiences[0].details.hard_skills[0].evidence.len(), 2);
        assert_eq!(record.education_entries, merged().education_entries);
        assert_eq!(completion.output_names(), vec![NORMALIZATION_OUTPUT_NAME]);
    }

    #[tokio::test]
    async fn test_education_is_not_sent() {
        let completion = FakeCompletion::new(|_| Err(LlmError::EmptyContent));
        assemble_final(&completion, merged()).await;
        let prompt = &completion.prompts()[0];
        assert!(prompt.contains("acme corp"));
        assert!(!prompt.contains("Tufts University"));
    }

    #[tokio::test]
    async fn test_failure_returns_merged_record_unchanged() {
        let completion = FakeCompletion::new(|_| Err(LlmError::RateLimited { retries: 3 }));
        assert_eq!(assemble_final(&completion, merged()).await, merged());
    }

    #[tokio::test]
    async fn test_malformed_or_empty_response_returns_merged_record() {
        let malformed = FakeCompletion::new(|_| Ok(json!({"project_names": "widget"})));
        assert_eq!(assemble_final(&malformed, merged()).await, merged());

        let empty = FakeCompletion::new(|_| Ok(json!({})));
        assert_eq!(assemble_final(&empty, merged()).await, merged());
    }

    #[tokio::test]
    async fn test_empty_record_skips_the_call() {
        let completion = FakeCompletion::new(|_| Ok(json!({})));
        let record = assemble_final(&completion, StructuredRecord::default()).await;
        assert_eq!(record, StructuredRecord::default());
        assert_eq!(completion.calls(), 0);
    }
}
