//! Result Merger: folds partial records into one.
//!
//! Experiences, projects, education and awards all go through [`merge_keyed`] with an
//! identity key and an absorb strategy. Display names and date ranges resolve conflicts
//! deterministically. Education and award scalars keep the first value seen in chunk order
//! and are only ever filled when missing.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::background::models::{
    base_source_name, AwardEntry, EducationEntry, EntryDetails, ExperienceEntry, InaccessibleSource,
    OtherBullet, ProjectEntry, SkillCluster, SkillEvidence, StructuredRecord, XyzBullet,
};
use crate::background::quantification::normalize_components;

const MAX_ALIAS_HOPS: usize = 4;

/// Folds `incoming` into `into`. Items whose key already exists are absorbed into the
/// existing item, the rest are appended.
pub fn merge_keyed<T, K, A>(into: &mut Vec<T>, incoming: Vec<T>, key: K, absorb: A)
where
    K: Fn(&T) -> String,
    A: Fn(&mut T, T),
{
    for item in incoming {
        let item_key = key(&item);
        match into.iter_mut().find(|existing| key(existing) == item_key) {
            Some(existing) => absorb(existing, item),
            None => into.push(item),
        }
    }
}

fn text_key(text: &str) -> String {
    text.trim().to_lowercase()
}

/// Set union on exact (case-sensitive) text, skipping blanks.
pub fn union_set(into: &mut Vec<String>, incoming: Vec<String>) {
    for value in incoming {
        if !value.trim().is_empty() && !into.contains(&value) {
            into.push(value);
        }
    }
}

/// True when `candidate` should replace `current`: longer wins, ties go to the smaller string.
fn outranks(candidate: &str, current: &str) -> bool {
    let (a, b) = (candidate.chars().count(), current.chars().count());
    a > b || (a == b && candidate < current)
}

/// Fills a missing scalar; when both sides have a value the deterministic pick decides.
pub fn prefer_scalar(current: &mut Option<String>, incoming: Option<String>) {
    let Some(incoming) = incoming.filter(|v| !v.trim().is_empty()) else {
        return;
    };
    let keep_current = matches!(
        current.as_deref(),
        Some(existing) if !existing.trim().is_empty() && !outranks(&incoming, existing)
    );
    if !keep_current {
        *current = Some(incoming);
    }
}

/// Fills a missing scalar and never overwrites one that is already present.
pub fn fill_scalar(current: &mut Option<String>, incoming: Option<String>) {
    let missing = current.as_deref().map_or(true, |v| v.trim().is_empty());
    if missing {
        if let Some(incoming) = incoming.filter(|v| !v.trim().is_empty()) {
            *current = Some(incoming);
        }
    }
}

pub fn prefer_text(current: &mut String, incoming: String) {
    if incoming.trim().is_empty() {
        return;
    }
    if current.trim().is_empty() || outranks(&incoming, current) {
        *current = incoming;
    }
}

fn absorb_xyz(existing: &mut XyzBullet, incoming: XyzBullet) {
    let fully_quantified = existing.is_fully_quantified || incoming.is_fully_quantified;
    let mut missing = std::mem::take(&mut existing.missing_components);
    missing.extend(incoming.missing_components);
    existing.missing_components = if fully_quantified {
        Vec::new()
    } else {
        normalize_components(&missing)
    };
    existing.is_fully_quantified = fully_quantified;
    prefer_text(&mut existing.text, incoming.text);
}

fn absorb_other(existing: &mut OtherBullet, incoming: OtherBullet) {
    prefer_text(&mut existing.reason_not_quantified, incoming.reason_not_quantified);
    prefer_text(&mut existing.text, incoming.text);
}

fn merge_skills(into: &mut Vec<SkillEvidence>, incoming: Vec<SkillEvidence>) {
    merge_keyed(
        into,
        incoming,
        |s| text_key(&s.skill),
        |existing, s| union_set(&mut existing.evidence, s.evidence),
    );
}

fn merge_clusters(into: &mut Vec<SkillCluster>, incoming: Vec<SkillCluster>) {
    merge_keyed(
        into,
        incoming,
        |c| text_key(&c.cluster_name),
        |existing, c| {
            union_set(&mut existing.skills, c.skills);
            prefer_text(&mut existing.cluster_name, c.cluster_name);
        },
    );
}

/// Field strategies shared by experiences and projects.
pub fn absorb_details(existing: &mut EntryDetails, incoming: EntryDetails) {
    prefer_scalar(&mut existing.date_range.start, incoming.date_range.start);
    prefer_scalar(&mut existing.date_range.end, incoming.date_range.end);
    union_set(&mut existing.source_names, incoming.source_names);
    merge_keyed(
        &mut existing.xyz_bullets,
        incoming.xyz_bullets,
        |b| text_key(&b.text),
        absorb_xyz,
    );
    merge_keyed(
        &mut existing.other_bullets,
        incoming.other_bullets,
        |b| text_key(&b.text),
        absorb_other,
    );
    merge_skills(&mut existing.hard_skills, incoming.hard_skills);
    merge_skills(&mut existing.soft_skills, incoming.soft_skills);
    merge_clusters(&mut existing.skill_clusters, incoming.skill_clusters);
}

pub fn experience_key(e: &ExperienceEntry) -> String {
    format!("{}|{}", text_key(&e.company), text_key(&e.title))
}

pub fn project_key(p: &ProjectEntry) -> String {
    text_key(&p.name)
}

fn education_key(e: &EducationEntry) -> String {
    format!("{}|{}", text_key(&e.school), text_key(&e.degree))
}

fn award_key(a: &AwardEntry) -> String {
    format!(
        "{}|{}",
        text_key(&a.name),
        text_key(a.issuer.as_deref().unwrap_or_default())
    )
}

fn absorb_experience(existing: &mut ExperienceEntry, incoming: ExperienceEntry) {
    prefer_text(&mut existing.company, incoming.company);
    prefer_text(&mut existing.title, incoming.title);
    absorb_details(&mut existing.details, incoming.details);
}

fn absorb_project(existing: &mut ProjectEntry, incoming: ProjectEntry) {
    prefer_text(&mut existing.name, incoming.name);
    absorb_details(&mut existing.details, incoming.details);
}

fn absorb_education(existing: &mut EducationEntry, incoming: EducationEntry) {
    prefer_text(&mut existing.school, incoming.school);
    prefer_text(&mut existing.degree, incoming.degree);
    fill_scalar(&mut existing.major, incoming.major);
    fill_scalar(&mut existing.year, incoming.year);
    fill_scalar(&mut existing.gpa, incoming.gpa);
    union_set(&mut existing.source_names, incoming.source_names);
}

fn absorb_award(existing: &mut AwardEntry, incoming: AwardEntry) {
    prefer_text(&mut existing.name, incoming.name);
    fill_scalar(&mut existing.issuer, incoming.issuer);
    fill_scalar(&mut existing.date, incoming.date);
    union_set(&mut existing.evidence, incoming.evidence);
}

fn merge_inaccessible(into: &mut Vec<InaccessibleSource>, incoming: Vec<InaccessibleSource>) {
    for mut source in incoming {
        source.source_name = base_source_name(&source.source_name).to_string();
        match into.iter_mut().find(|s| s.source_name == source.source_name) {
            Some(existing) => *existing = source,
            None => into.push(source),
        }
    }
}

/// Merges partial records in the order given and normalizes the result.
///
/// Skills already listed in `all_skills` of any partial survive unless they only
/// appeared as skill entries without evidence.
pub fn merge_records(partials: Vec<StructuredRecord>) -> StructuredRecord {
    let mut merged = StructuredRecord::default();
    let mut listed_skills: BTreeSet<String> = BTreeSet::new();
    let partial_count = partials.len();

    for partial in partials {
        merge_inaccessible(&mut merged.inaccessible_sources, partial.inaccessible_sources);
        for (raw, canonical) in partial.skill_alias_map {
            let (raw, canonical) = (text_key(&raw), text_key(&canonical));
            if !raw.is_empty() && !canonical.is_empty() {
                merged.skill_alias_map.insert(raw, canonical);
            }
        }
        merge_keyed(
            &mut merged.education_entries,
            partial.education_entries,
            education_key,
            absorb_education,
        );
        merge_keyed(
            &mut merged.experiences,
            partial.experiences,
            experience_key,
            absorb_experience,
        );
        merge_keyed(&mut merged.projects, partial.projects, project_key, absorb_project);
        merge_keyed(&mut merged.awards, partial.awards, award_key, absorb_award);
        listed_skills.extend(
            partial
                .all_skills
                .iter()
                .map(|s| text_key(s))
                .filter(|s| !s.is_empty()),
        );
    }

    let merged = finalize(merged, listed_skills);
    debug!(
        "Merged {partial_count} partial records into {} entities, {} skills, {} inaccessible sources",
        merged.entity_count(),
        merged.all_skills.len(),
        merged.inaccessible_sources.len()
    );
    merged
}

/// Folds skills listed on an earlier record into a fresh one, so skills a person added by
/// hand between runs survive re-extraction. They go through the same alias resolution.
pub fn carry_forward_skills(record: StructuredRecord, prior_skills: Vec<String>) -> StructuredRecord {
    if prior_skills.iter().all(|s| s.trim().is_empty()) {
        return record;
    }
    let prior = StructuredRecord {
        all_skills: prior_skills,
        ..Default::default()
    };
    merge_records(vec![record, prior])
}

fn resolve_alias(aliases: &BTreeMap<String, String>, skill: &str) -> String {
    let mut current = text_key(skill);
    for _ in 0..MAX_ALIAS_HOPS {
        match aliases.get(&current) {
            Some(next) if *next != current => current = next.clone(),
            _ => break,
        }
    }
    current
}

fn normalize_source_names(names: &mut Vec<String>) {
    let normalized: BTreeSet<String> = names
        .iter()
        .map(|n| base_source_name(n).to_string())
        .filter(|n| !n.is_empty())
        .collect();
    *names = normalized.into_iter().collect();
}

/// Canonicalizes skills and drops the ones without evidence. Returns the dropped names.
fn canonicalize_details(
    details: &mut EntryDetails,
    aliases: &BTreeMap<String, String>,
) -> BTreeSet<String> {
    let mut dropped = BTreeSet::new();
    normalize_source_names(&mut details.source_names);

    for skills in [&mut details.hard_skills, &mut details.soft_skills] {
        let renamed: Vec<SkillEvidence> = std::mem::take(skills)
            .into_iter()
            .map(|s| SkillEvidence {
                skill: resolve_alias(aliases, &s.skill),
                evidence: s.evidence,
            })
            .collect();
        let mut canonical = Vec::new();
        merge_skills(&mut canonical, renamed);
        for skill in canonical {
            if skill.skill.is_empty() {
                continue;
            }
            if skill.evidence.is_empty() {
                dropped.insert(skill.skill);
            } else {
                skills.push(skill);
            }
        }
    }

    for cluster in &mut details.skill_clusters {
        let canonical: BTreeSet<String> = cluster
            .skills
            .iter()
            .map(|s| resolve_alias(aliases, s))
            .filter(|s| !s.is_empty())
            .collect();
        cluster.skills = canonical.into_iter().collect();
    }
    details.skill_clusters.retain(|c| !c.skills.is_empty());
    dropped
}

fn finalize(mut record: StructuredRecord, listed_skills: BTreeSet<String>) -> StructuredRecord {
    let aliases: BTreeMap<String, String> = record
        .skill_alias_map
        .keys()
        .map(|raw| (raw.clone(), resolve_alias(&record.skill_alias_map, raw)))
        .collect();
    record.skill_alias_map = aliases;

    let mut dropped = BTreeSet::new();
    for experience in &mut record.experiences {
        dropped.extend(canonicalize_details(&mut experience.details, &record.skill_alias_map));
    }
    for project in &mut record.projects {
        dropped.extend(canonicalize_details(&mut project.details, &record.skill_alias_map));
    }
    for education in &mut record.education_entries {
        normalize_source_names(&mut education.source_names);
    }

    let evidenced: BTreeSet<String> = record
        .experiences
        .iter()
        .map(|e| &e.details)
        .chain(record.projects.iter().map(|p| &p.details))
        .flat_map(|d| d.skills())
        .map(|s| s.skill.clone())
        .collect();
    let listed: BTreeSet<String> = listed_skills
        .iter()
        .map(|s| resolve_alias(&record.skill_alias_map, s))
        .filter(|s| !dropped.contains(s))
        .collect();
    record.all_skills = evidenced.union(&listed).cloned().collect();

    let contributing = record.contributing_sources();
    record
        .inaccessible_sources
        .retain(|s| !contributing.contains(&s.source_name));
    record
}
