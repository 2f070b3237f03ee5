use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::background::merger::carry_forward_skills;
use crate::background::models::StructuredRecord;
use crate::background::store::{latest_record, save_record};
use crate::errors::AppError;
use crate::models::background::BackgroundRecordRow;
use crate::state::AppState;

const MAX_DOCUMENT_REFS: usize = 20;
const MAX_PROJECT_LINKS: usize = 20;

#[derive(Debug, Deserialize)]
pub struct ExtractRequest {
    pub user_id: Uuid,
    #[serde(default)]
    pub free_text: Option<String>,
    #[serde(default)]
    pub document_refs: Vec<String>,
    #[serde(default)]
    pub project_links: Vec<String>,
}

impl ExtractRequest {
    fn validate(&self) -> Result<(), AppError> {
        if self.document_refs.len() > MAX_DOCUMENT_REFS {
            return Err(AppError::Validation(format!(
                "At most {MAX_DOCUMENT_REFS} documents can be analyzed at once"
            )));
        }
        if self.project_links.len() > MAX_PROJECT_LINKS {
            return Err(AppError::Validation(format!(
                "At most {MAX_PROJECT_LINKS} project links can be analyzed at once"
            )));
        }
        let has_text = self
            .free_text
            .as_deref()
            .is_some_and(|t| !t.trim().is_empty());
        let has_refs = self
            .document_refs
            .iter()
            .chain(self.project_links.iter())
            .any(|r| !r.trim().is_empty());
        if !has_text && !has_refs {
            return Err(AppError::Validation(
                "Provide free text, at least one document or at least one project link".to_string(),
            ));
        }
        Ok(())
    }
}

fn non_blank(values: Vec<String>) -> Vec<String> {
    values
        .into_iter()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect()
}

/// Skills listed on a stored record. People edit this list between runs.
fn listed_skills(record: &Value) -> Vec<String> {
    record
        .get("all_skills")
        .and_then(Value::as_array)
        .map(|skills| {
            skills
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[derive(Debug, Serialize)]
pub struct ExtractResponse {
    pub record_id: Uuid,
    pub record: StructuredRecord,
}

#[derive(Deserialize)]
pub struct UserIdQuery {
    pub user_id: Uuid,
}

/// POST /api/v1/background/extract
pub async fn handle_extract(
    State(state): State<AppState>,
    Json(req): Json<ExtractRequest>,
) -> Result<Json<ExtractResponse>, AppError> {
    req.validate()?;
    let ExtractRequest {
        user_id,
        free_text,
        document_refs,
        project_links,
    } = req;
    let document_refs = non_blank(document_refs);
    let project_links = non_blank(project_links);
    info!(
        "Background extraction for user {user_id}: {} documents, {} links",
        document_refs.len(),
        project_links.len()
    );

    let record = state
        .pipeline
        .extract_skills_visualization(
            free_text.as_deref().unwrap_or_default(),
            &document_refs,
            &project_links,
        )
        .await?;
    let prior_skills = match latest_record(&state.db, user_id).await {
        Ok(previous) => previous.map(|row| listed_skills(&row.record)).unwrap_or_default(),
        Err(e) => {
            warn!("Could not load the previous record for user {user_id}: {e}");
            Vec::new()
        }
    };
    let record = carry_forward_skills(record, prior_skills);
    let row = save_record(&state.db, user_id, &record).await?;

    Ok(Json(ExtractResponse {
        record_id: row.id,
        record,
    }))
}

/// GET /api/v1/background
pub async fn handle_latest(
    State(state): State<AppState>,
    Query(params): Query<UserIdQuery>,
) -> Result<Json<BackgroundRecordRow>, AppError> {
    let row = latest_record(&state.db, params.user_id)
        .await?
        .ok_or_else(|| {
            AppError::NotFound(format!("No background record for user {}", params.user_id))
        })?;
    Ok(Json(row))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(value: serde_json::Value) -> ExtractRequest {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_request_defaults_optional_lists() {
        let req = request(serde_json::json!({
            "user_id": "7f1d6c2e-4a8b-4c55-9b7e-2f0e6b1d3a90",
            "free_text": "Engineer at Acme"
        }));
        assert!(req.document_refs.is_empty());
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_request_without_material_is_rejected() {
        let req = request(serde_json::json!({
            "user_id": "7f1d6c2e-4a8b-4c55-9b7e-2f0e6b1d3a90",
            "free_text": "   ",
            "project_links": [""]
        }));
        assert!(matches!(req.validate(), Err(AppError::Validation(_))));
    }

    #[test]
    fn test_too_many_links_are_rejected() {
        let links: Vec<String> = (0..21).map(|i| format!("https://example.com/{i}")).collect();
        let req = request(serde_json::json!({
            "user_id": "7f1d6c2e-4a8b-4c55-9b7e-2f0e6b1d3a90",
            "project_links": links
        }));
        assert!(matches!(req.validate(), Err(AppError::Validation(_))));
    }

    #[test]
    fn test_listed_skills_reads_stored_records() {
        let stored = serde_json::json!({"all_skills": ["rust", 3, "kubernetes"], "experiences": []});
        assert_eq!(listed_skills(&stored), vec!["rust", "kubernetes"]);
        assert!(listed_skills(&serde_json::json!({})).is_empty());
        assert!(listed_skills(&serde_json::json!({"all_skills": "rust"})).is_empty());
    }

    #[test]
    fn test_blank_references_are_dropped() {
        assert_eq!(
            non_blank(vec![" cv.pdf ".to_string(), "  ".to_string()]),
            vec!["cv.pdf"]
        );
    }
}
