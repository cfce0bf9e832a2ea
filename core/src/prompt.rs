//! The fixed instruction/response template shared by the prompt builder,
//! the conversation store, and the runaway guard.

use crate::streaming::RUNAWAY_MARKER;

pub const INSTRUCTION_HEADER: &str = "### Instruction:";
pub const RESPONSE_HEADER: &str = "### Response:";

/// One completed turn, as persisted in the conversation log.
pub fn render_turn(instruction: &str, response: &str) -> String {
    format!(
        "{INSTRUCTION_HEADER}\n{instruction}\n\n{RESPONSE_HEADER}\n{response}\n\n"
    )
}

/// Full prompt for a new instruction: the accumulated history followed by the
/// open response slot the model is expected to fill.
pub fn build_prompt(history: &str, instruction: &str) -> String {
    format!(
        "{history}{INSTRUCTION_HEADER}\n{instruction}\n\n{RESPONSE_HEADER}\n"
    )
}

/// Instruction used for the first summarisation pass over a page chunk.
pub fn summary_instruction(chunk: &str) -> String {
    format!("Summarise the following text:\n{chunk}")
}

/// Instruction used to condense an existing summary further.
pub fn condense_instruction(chunk: &str) -> String {
    format!("Condense the following summary, keeping only the key points:\n{chunk}")
}

/// Instruction for a question asked about stored page content.
pub fn page_question_instruction(page: &str, question: &str) -> String {
    format!("Using the following page content:\n{page}\n\nAnswer this:\n{question}")
}

/// Cut a model reply at the first template marker and trim whitespace. The
/// model sometimes keeps going and writes the next `### Instruction:` itself.
pub fn trim_response(raw: &str) -> String {
    let clean = match raw.find(RUNAWAY_MARKER) {
        Some(idx) => &raw[..idx],
        None => raw,
    };
    clean.trim().to_string()
}
