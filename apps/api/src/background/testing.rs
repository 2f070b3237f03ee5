//! In-memory collaborators for pipeline tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::background::documents::DocumentTextExtractor;
use crate::background::repository::{RepositoryFetcher, RepositoryRef};
use crate::background::sources::SourceError;
use crate::llm_client::{CompletionService, LlmError, StructuredRequest};

type Responder = Box<dyn Fn(&StructuredRequest<'_>) -> Result<Value, LlmError> + Send + Sync>;

/// Completion service driven by a closure. Records every request it sees.
pub struct FakeCompletion {
    respond: Responder,
    configured: bool,
    seen: Mutex<Vec<(String, String)>>,
}

impl FakeCompletion {
    pub fn new<F>(respond: F) -> Self
    where
        F: Fn(&StructuredRequest<'_>) -> Result<Value, LlmError> + Send + Sync + 'static,
    {
        Self {
            respond: Box::new(respond),
            configured: true,
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn unconfigured() -> Self {
        Self {
            configured: false,
            ..Self::new(|_| Err(LlmError::MissingApiKey))
        }
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.seen.lock().unwrap().iter().map(|(_, p)| p.clone()).collect()
    }

    pub fn output_names(&self) -> Vec<String> {
        self.seen.lock().unwrap().iter().map(|(n, _)| n.clone()).collect()
    }
}

#[async_trait]
impl CompletionService for FakeCompletion {
    fn is_configured(&self) -> bool {
        self.configured
    }

    async fn complete_structured(&self, request: StructuredRequest<'_>) -> Result<Value, LlmError> {
        self.seen
            .lock()
            .unwrap()
            .push((request.output_name.to_string(), request.prompt.to_string()));
        (self.respond)(&request)
    }
}

/// A minimal extraction answer: one experience with one evidenced hard skill.
pub fn extraction_response(company: &str, title: &str, source: &str, skill: &str) -> Value {
    json!({
        "inaccessible_sources": [],
        "skill_alias_map": {},
        "education_entries": [],
        "experiences": [{
            "company": company,
            "title": title,
            "source_names": [source],
            "xyz_bullets": [{
                "text": format!("Accomplished faster builds at {company}, measured by a 30% drop, achieved via {skill}"),
                "is_fully_quantified": true,
                "missing_components": []
            }],
            "other_bullets": [],
            "hard_skills": [{"skill": skill, "evidence": [format!("used {skill} daily")]}],
            "soft_skills": []
        }],
        "projects": [],
        "awards": [],
        "all_skills": [skill]
    })
}

#[derive(Default)]
pub struct FakeDocuments {
    texts: HashMap<String, Result<String, SourceError>>,
}

impl FakeDocuments {
    pub fn with(mut self, reference: &str, result: Result<String, SourceError>) -> Self {
        self.texts.insert(reference.to_string(), result);
        self
    }
}

#[async_trait]
impl DocumentTextExtractor for FakeDocuments {
    async fn extract_text(&self, reference: &str) -> Result<String, SourceError> {
        self.texts
            .get(reference)
            .cloned()
            .unwrap_or_else(|| Err(SourceError::NotFound(reference.to_string())))
    }
}

/// Repository fetcher keyed by `owner/name`.
#[derive(Default)]
pub struct FakeRepositories {
    contents: HashMap<String, Result<String, SourceError>>,
}

impl FakeRepositories {
    pub fn with(mut self, slug: &str, result: Result<String, SourceError>) -> Self {
        self.contents.insert(slug.to_string(), result);
        self
    }
}

#[async_trait]
impl RepositoryFetcher for FakeRepositories {
    async fn fetch(&self, repository: &RepositoryRef) -> Result<String, SourceError> {
        let slug = repository.slug();
        self.contents
            .get(&slug)
            .cloned()
            .unwrap_or_else(|| Err(SourceError::NotFound(slug)))
    }
}
