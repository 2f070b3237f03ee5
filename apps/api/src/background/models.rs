use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Deserializer, Serialize};

// ────────────────────────────────────────────────────────────────────────────
// Sources and chunks (pipeline-internal)
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    FreeText,
    Document,
    /// A recognized code-repository link whose content was fetched.
    Repository,
    /// Any other project link; only the URL itself is available.
    Link,
    #[serde(other)]
    Unknown,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::FreeText => "free_text",
            SourceKind::Document => "document",
            SourceKind::Repository => "repository",
            SourceKind::Link => "link",
            SourceKind::Unknown => "unknown",
        }
    }
}

/// Position of a part within a pre-split oversized source. `index` is 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourcePart {
    pub index: usize,
    pub count: usize,
}

/// One labeled unit of candidate material after resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct Source {
    pub kind: SourceKind,
    /// Display name. For split parts this carries the `[Part i/N]` suffix.
    pub label: String,
    /// What the caller handed us: the text itself, a file reference or a URL.
    pub raw_locator: String,
    pub content: String,
    /// Label of the logical source this one was split from (equal to `label` when unsplit).
    pub origin_label: String,
    pub part: Option<SourcePart>,
    /// Set when resolution failed; `content` then holds a note describing the failure.
    pub failure: Option<String>,
}

impl Source {
    pub fn resolved(kind: SourceKind, label: &str, raw_locator: &str, content: String) -> Self {
        Self {
            kind,
            label: label.to_string(),
            raw_locator: raw_locator.to_string(),
            content,
            origin_label: label.to_string(),
            part: None,
            failure: None,
        }
    }

    pub fn unreadable(kind: SourceKind, label: &str, raw_locator: &str, reason: String) -> Self {
        Self {
            kind,
            label: label.to_string(),
            raw_locator: raw_locator.to_string(),
            content: format!("[Source could not be read: {reason}]"),
            origin_label: label.to_string(),
            part: None,
            failure: Some(reason),
        }
    }

    pub fn is_readable(&self) -> bool {
        self.failure.is_none()
    }
}

/// A unit of work for the chunk extractor.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// Prompt-ready text block for this chunk.
    pub content: String,
    pub source_label: String,
    pub source_kind: SourceKind,
    pub part_index: Option<usize>,
    pub part_count: Option<usize>,
    pub origin_source_label: String,
}

/// Builds the label of one part of a pre-split source, e.g. `repo.git [Part 2/3]`.
pub fn part_label(base: &str, index: usize, count: usize) -> String {
    format!("{base} [Part {index}/{count}]")
}

/// Strips a trailing `[Part i/N]` marker, returning the logical source name.
pub fn base_source_name(name: &str) -> &str {
    let trimmed = name.trim_end();
    let Some(without_bracket) = trimmed.strip_suffix(']') else {
        return trimmed;
    };
    let Some(start) = without_bracket.rfind("[Part ") else {
        return trimmed;
    };
    let marker = &without_bracket[start + "[Part ".len()..];
    let is_part_marker = marker
        .split_once('/')
        .map(|(i, n)| is_number(i.trim()) && is_number(n.trim()))
        .unwrap_or(false);
    if is_part_marker {
        without_bracket[..start].trim_end()
    } else {
        trimmed
    }
}

fn is_number(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_digit())
}

// ────────────────────────────────────────────────────────────────────────────
// Structured record (extraction output, partial or merged)
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StructuredRecord {
    pub inaccessible_sources: Vec<InaccessibleSource>,
    /// Raw skill mention → canonical skill name.
    pub skill_alias_map: BTreeMap<String, String>,
    pub education_entries: Vec<EducationEntry>,
    pub experiences: Vec<ExperienceEntry>,
    pub projects: Vec<ProjectEntry>,
    pub awards: Vec<AwardEntry>,
    pub all_skills: Vec<String>,
}

impl StructuredRecord {
    /// A partial record that only reports one source as unreadable.
    pub fn inaccessible(source_name: &str, source_kind: SourceKind, reason: String) -> Self {
        Self {
            inaccessible_sources: vec![InaccessibleSource {
                source_name: source_name.to_string(),
                source_kind,
                reason,
            }],
            ..Default::default()
        }
    }

    /// Every source name cited by at least one entity.
    pub fn contributing_sources(&self) -> BTreeSet<String> {
        self.experiences
            .iter()
            .flat_map(|e| e.details.source_names.iter())
            .chain(self.projects.iter().flat_map(|p| p.details.source_names.iter()))
            .chain(self.education_entries.iter().flat_map(|e| e.source_names.iter()))
            .cloned()
            .collect()
    }

    pub fn entity_count(&self) -> usize {
        self.experiences.len() + self.projects.len() + self.education_entries.len() + self.awards.len()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InaccessibleSource {
    pub source_name: String,
    pub source_kind: SourceKind,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EducationEntry {
    pub school: String,
    pub degree: String,
    pub major: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub year: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub gpa: Option<String>,
    pub source_names: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DateRange {
    #[serde(deserialize_with = "lenient_string")]
    pub start: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub end: Option<String>,
}

/// An accomplishment rewritten as "Accomplished X, measured by Y, achieved via Z".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct XyzBullet {
    pub text: String,
    pub is_fully_quantified: bool,
    /// Subset of `X`, `Y`, `Z`.
    pub missing_components: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OtherBullet {
    pub text: String,
    pub reason_not_quantified: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SkillEvidence {
    pub skill: String,
    /// Verbatim quotes of at most a handful of words each.
    pub evidence: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SkillCluster {
    pub cluster_name: String,
    pub skills: Vec<String>,
}

/// Fields shared by experiences and projects.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntryDetails {
    pub date_range: DateRange,
    pub source_names: Vec<String>,
    pub xyz_bullets: Vec<XyzBullet>,
    pub other_bullets: Vec<OtherBullet>,
    pub hard_skills: Vec<SkillEvidence>,
    pub soft_skills: Vec<SkillEvidence>,
    pub skill_clusters: Vec<SkillCluster>,
}

impl EntryDetails {
    pub fn skills(&self) -> impl Iterator<Item = &SkillEvidence> {
        self.hard_skills.iter().chain(self.soft_skills.iter())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExperienceEntry {
    #[serde(default)]
    pub company: String,
    #[serde(default)]
    pub title: String,
    #[serde(flatten)]
    pub details: EntryDetails,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectEntry {
    #[serde(default)]
    pub name: String,
    #[serde(flatten)]
    pub details: EntryDetails,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AwardEntry {
    pub name: String,
    pub issuer: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub date: Option<String>,
    pub evidence: Vec<String>,
}

/// Accepts a string, a number or null. Models routinely answer `"year": 2021`.
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) if !s.trim().is_empty() => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}
