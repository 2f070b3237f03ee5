// Shared prompt constants and prompt-building utilities.
// Each service that needs LLM calls defines its own prompts.rs alongside it.
// This file contains cross-cutting prompt fragments.

/// System prompt fragment that enforces structured-only output.
pub const STRUCTURED_ONLY_SYSTEM: &str = "You are a precise, structured assistant. \
    You MUST answer by calling the provided output tool exactly once. \
    Do NOT include any text outside the tool call. \
    Do NOT include explanations or apologies.";

/// Common instruction appended to all extraction prompts.
pub const GROUNDING_INSTRUCTION: &str = "\
    CRITICAL: Every claim you extract must be traceable to the source material provided. \
    Do NOT infer, interpolate, or invent details. \
    If the material does not support a claim, omit it entirely. \
    Every skill MUST carry at least one verbatim evidence quote of at most {max_words} words, \
    copied exactly from the material. A skill without a quote must be left out.";

/// Fills the placeholders of [`GROUNDING_INSTRUCTION`].
pub fn grounding_instruction(max_words: usize) -> String {
    GROUNDING_INSTRUCTION.replace("{max_words}", &max_words.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grounding_instruction_fills_word_limit() {
        let text = grounding_instruction(20);
        assert!(text.contains("at most 20 words"));
        assert!(!text.contains("{max_words}"));
    }
}
