//! Background extraction: turns free text, uploaded documents and project links into one
//! structured record of experiences, projects, skills, education and awards.
//!
//! Flow: `sources` → `planner` → `extractor` (one call per chunk, or one call overall)
//! → `merger` → `assembler`. `pipeline` wires the stages together.

pub mod assembler;
pub mod documents;
pub mod extractor;
pub mod handlers;
pub mod merger;
pub mod models;
pub mod pipeline;
pub mod planner;
pub mod prompts;
pub mod quantification;
pub mod repository;
pub mod sources;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;
