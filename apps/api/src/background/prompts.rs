// Background extraction prompt templates and output schemas.
// All prompts for the background module are defined here.

use serde_json::{json, Value};

pub const EXTRACTION_OUTPUT_NAME: &str = "record_background";
pub const EXTRACTION_OUTPUT_DESCRIPTION: &str =
    "Record the structured professional background extracted from the candidate material.";

pub const NORMALIZATION_OUTPUT_NAME: &str = "record_normalized_background";
pub const NORMALIZATION_OUTPUT_DESCRIPTION: &str =
    "Record the canonical skill names and entity spellings for the record.";

pub const EXTRACTION_SYSTEM: &str = "\
You are a precise extractor of professional background from candidate material. \
You only report what the material evidences and never invent employers, titles, dates, metrics or skills. \
Skill names are normalized to a canonical lowercase form (\"ReactJS\" and \"React.js\" both become \"react\").";

pub const EXTRACTION_PROMPT_TEMPLATE: &str = r#"Extract the candidate's professional background from the material below.

{scope_note}

MATERIAL:
{sources}

INSTRUCTIONS:
1. {grounding_instruction}
2. Every experience, project and education entry lists in `source_names` the exact SOURCE label(s)
   (as written in the === SOURCE headers) it was found in.
3. Rewrite accomplishments as "Accomplished X, measured by Y, achieved via Z" whenever the material allows.
   Put those in `xyz_bullets`. Set `is_fully_quantified` only when X, Y and Z are all present and Y is a
   concrete measurement; otherwise list the absent letters in `missing_components`.
   Statements that cannot be rewritten go to `other_bullets` with `reason_not_quantified`.
4. Normalize every skill to its canonical lowercase name. Record each raw spelling you saw in
   `skill_alias_map` as raw → canonical. Split skills into `hard_skills` (tools, languages, methods)
   and `soft_skills` (interpersonal, leadership). Group related skills of an entry into `skill_clusters`.
5. Experiences are identified by company and title, projects by name. Report each once.
6. If a SOURCE cannot be meaningfully analyzed (empty, unreadable, irrelevant boilerplate, a link whose
   content you cannot see), add it to `inaccessible_sources` with a short human-readable reason instead
   of guessing.
7. `all_skills` lists every canonical skill you reported."#;

pub const CHUNK_SCOPE_NOTE: &str = "\
This request covers ONE piece of a larger set of material ({source_label}). \
Other pieces are processed separately; extract only what this piece evidences.";

pub const FULL_SCOPE_NOTE: &str = "This request covers all of the candidate's material.";

pub const NORMALIZATION_SYSTEM: &str = "\
You are a careful editor of structured candidate records. \
You normalize naming and remove duplication; you never add facts, quotes or sources that are not already present.";

pub const NORMALIZATION_PROMPT_TEMPLATE: &str = r#"The record below was assembled from several independently extracted pieces
of the same candidate's material. Normalize its naming.

RECORD:
{record_json}

INSTRUCTIONS:
1. Return `skill_alias_map` mapping every skill spelling found in the record (lowercase) to one
   lowercase canonical name. Spellings that are already canonical may be omitted.
2. Return `experience_names` with one entry per experience in the record, giving the company and
   title with consistent casing. Keep the wording; only casing and stray whitespace may change.
3. Return `project_names` with one entry per project, normalized the same way.
4. Never merge entities that are only similar: different titles or names stay separate.
5. Never add skills, entities or sources that are not in the record."#;

fn string_array() -> Value {
    json!({"type": "array", "items": {"type": "string"}})
}

fn skill_list() -> Value {
    json!({
        "type": "array",
        "items": {
            "type": "object",
            "properties": {
                "skill": {"type": "string"},
                "evidence": string_array()
            },
            "required": ["skill", "evidence"]
        }
    })
}

fn entry_detail_properties() -> serde_json::Map<String, Value> {
    let properties = json!({
        "date_range": {
            "type": "object",
            "properties": {
                "start": {"type": ["string", "null"]},
                "end": {"type": ["string", "null"]}
            }
        },
        "source_names": string_array(),
        "xyz_bullets": {
            "type": "array",
            "items": {
                "type": "object",
                "properties": {
                    "text": {"type": "string"},
                    "is_fully_quantified": {"type": "boolean"},
                    "missing_components": {
                        "type": "array",
                        "items": {"type": "string", "enum": ["X", "Y", "Z"]}
                    }
                },
                "required": ["text", "is_fully_quantified", "missing_components"]
            }
        },
        "other_bullets": {
            "type": "array",
            "items": {
                "type": "object",
                "properties": {
                    "text": {"type": "string"},
                    "reason_not_quantified": {"type": "string"}
                },
                "required": ["text", "reason_not_quantified"]
            }
        },
        "hard_skills": skill_list(),
        "soft_skills": skill_list(),
        "skill_clusters": {
            "type": "array",
            "items": {
                "type": "object",
                "properties": {
                    "cluster_name": {"type": "string"},
                    "skills": string_array()
                },
                "required": ["cluster_name", "skills"]
            }
        }
    });
    match properties {
        Value::Object(map) => map,
        _ => serde_json::Map::new(),
    }
}

fn entity_schema(identity: &[&str]) -> Value {
    let mut properties = entry_detail_properties();
    for field in identity {
        properties.insert((*field).to_string(), json!({"type": "string"}));
    }
    let mut required: Vec<&str> = identity.to_vec();
    required.extend(["source_names", "xyz_bullets", "other_bullets", "hard_skills", "soft_skills"]);
    json!({
        "type": "array",
        "items": {
            "type": "object",
            "properties": properties,
            "required": required
        }
    })
}

fn awards_schema() -> Value {
    json!({
        "type": "array",
        "items": {
            "type": "object",
            "properties": {
                "name": {"type": "string"},
                "issuer": {"type": ["string", "null"]},
                "date": {"type": ["string", "null"]},
                "evidence": string_array()
            },
            "required": ["name"]
        }
    })
}

fn alias_map_schema() -> Value {
    json!({"type": "object", "additionalProperties": {"type": "string"}})
}

/// Output schema of a per-chunk (or single-call) extraction.
pub fn extraction_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "inaccessible_sources": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "source_name": {"type": "string"},
                        "source_kind": {
                            "type": "string",
                            "enum": ["free_text", "document", "repository", "link"]
                        },
                        "reason": {"type": "string"}
                    },
                    "required": ["source_name", "source_kind", "reason"]
                }
            },
            "skill_alias_map": alias_map_schema(),
            "education_entries": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "school": {"type": "string"},
                        "degree": {"type": "string"},
                        "major": {"type": ["string", "null"]},
                        "year": {"type": ["string", "null"]},
                        "gpa": {"type": ["string", "null"]},
                        "source_names": string_array()
                    },
                    "required": ["school", "degree", "source_names"]
                }
            },
            "experiences": entity_schema(&["company", "title"]),
            "projects": entity_schema(&["name"]),
            "awards": awards_schema(),
            "all_skills": string_array()
        },
        "required": [
            "inaccessible_sources",
            "skill_alias_map",
            "education_entries",
            "experiences",
            "projects",
            "awards",
            "all_skills"
        ]
    })
}

/// Output schema of the final normalization pass: naming only, no entity bodies.
pub fn normalization_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "skill_alias_map": alias_map_schema(),
            "experience_names": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "company": {"type": "string"},
                        "title": {"type": "string"}
                    },
                    "required": ["company", "title"]
                }
            },
            "project_names": string_array()
        },
        "required": ["skill_alias_map", "experience_names", "project_names"]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extraction_schema_requires_identity_fields() {
        let schema = extraction_schema();
        let experience_required = &schema["properties"]["experiences"]["items"]["required"];
        assert!(experience_required
            .as_array()
            .unwrap()
            .iter()
            .any(|v| v == "company"));
        let project_props = &schema["properties"]["projects"]["items"]["properties"];
        assert!(project_props.get("name").is_some());
        assert!(project_props.get("company").is_none());
    }

    #[test]
    fn test_normalization_schema_only_covers_naming() {
        let schema = normalization_schema();
        let properties = schema["properties"].as_object().unwrap();
        assert_eq!(properties.len(), 3);
        assert!(properties.get("education_entries").is_none());
        assert!(properties.get("inaccessible_sources").is_none());
        assert!(properties.contains_key("experience_names"));
    }
}
