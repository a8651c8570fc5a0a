//! Plantillas de prompt de los flujos y su renderizado.

use std::collections::BTreeMap;

use crate::models::{ConversationTurn, InputValue};

pub const CFR_TITLE_12_URL: &str = "https://www.ecfr.gov/current/title-12";
pub const CFR_PART_217_URL: &str =
    "https://www.ecfr.gov/current/title-12/chapter-II/subchapter-A/part-217";

pub fn answer_preamble() -> String {
    format!(
        r#"
You are an AI assistant specializing in U.S. banking regulations, specifically those found in Title 12 of the Code of Federal Regulations (CFR). Your primary reference is the official eCFR website: {link}.

When answering questions, particularly those concerning Risk-Weighted Assets (RWA) calculations, you must adhere to the **standardized approach** as implemented under Basel III and codified within CFR Title 12.

Crucially:
- Base ALL your answers ONLY on information found at {link}.
- Ensure your answers are derived from legal provisions that are currently in effect and have not been repealed, as reflected on the eCFR website.
- If the information required to answer the question is not present on the eCFR website, or if the question pertains to a provision that has been repealed or is no longer in effect, you must clearly state this.
"#,
        link = CFR_PART_217_URL
    )
}

pub fn render_answer_prompt(question: &str, history: Option<&[ConversationTurn]>) -> String {
    let mut prompt = String::new();

    if let Some(turns) = history.filter(|t| !t.is_empty()) {
        prompt.push_str("Here is the conversation history (user questions and AI summaries):\n");
        push_turns(&mut prompt, turns);
        prompt.push_str("---\n\n");
    }

    prompt.push_str(&format!(
        r#"Considering the conversation history above (if any), please answer the following new question from the user.
User's new question: {question}

Please provide:
1. A concise summary of the answer.
2. A detailed explanation. Consider relevant product types related to the user's query (e.g., corporate loans, residential mortgages, derivatives, etc.) when formulating your explanation.
3. Relevant references to specific sections within CFR Title 12. All such references must be current and linkable to their source on {link}.
4. Any necessary calculation logic, especially if related to RWA under the standardized approach.
5. Any relevant reference tables, if applicable.
6. Detailed calculation examples for each possible scenario relevant to the user's query. For RWA calculations, demonstrate the standardized approach with step-by-step examples.
"#,
        link = CFR_PART_217_URL
    ));
    prompt
}

pub fn process_rwa_text_preamble() -> String {
    format!(
        "You are an AI assistant specializing in U.S. banking regulations, specifically Risk-Weighted Assets (RWA) calculations under the standardized approach as defined in CFR Title 12. Your primary reference is {CFR_TITLE_12_URL}. Focus exclusively on the standardized approach and ensure all references and interpretations are current."
    )
}

pub fn render_process_rwa_text_prompt(rwa_text: &str) -> String {
    format!(
        r#"Given the following text, which describes RWA calculation logic and may include examples:
'''
{rwa_text}
'''

Your tasks are:
1. **Identify and Summarize Logic**: Analyze the text to understand the specific RWA calculation being described. Provide a concise summary of this logic as 'logicSummary'. This summary MUST reference the relevant sections of CFR Title 12 that govern this calculation.
2. **Determine Required Inputs**: Based on the identified logic and the rules in CFR Title 12 (standardized approach), list under 'requiredInputs' all the input parameters a user would need to provide to perform this RWA calculation. For each parameter:
   * Define a machine-readable 'name' (camelCase).
   * Create a user-friendly 'label'.
   * Specify the 'type' ('number', 'text', or 'percentage'). For percentages, the user will input a number (e.g., 50 for 50%).
   * Optionally, provide a brief 'description', citing specific CFR Title 12 provisions if it clarifies the input.
"#
    )
}

pub fn calculate_rwa_preamble() -> String {
    format!(
        "You are an AI expert in U.S. banking regulations, specifically performing Risk-Weighted Assets (RWA) calculations under the standardized approach as defined in CFR Title 12. Your calculations must be based SOLELY on the rules found at {CFR_TITLE_12_URL}."
    )
}

pub fn render_calculate_rwa_prompt(
    rwa_context: &str,
    inputs: &BTreeMap<String, InputValue>,
) -> String {
    let inputs_block: String = inputs
        .iter()
        .map(|(key, value)| format!("- {key}: {value}\n"))
        .collect();

    format!(
        r#"Context for the RWA calculation (derived from previous analysis or user query, referencing CFR Title 12):
'''
{rwa_context}
'''

User-provided inputs:
'''
{inputs_block}'''

Your tasks:
1. **Verify Inputs and Context**: Ensure the provided inputs are appropriate for the RWA calculation method described in the context and CFR Title 12.
2. **Calculate RWA**: Perform the RWA calculation using the standardized approach outlined in CFR Title 12. Put the final figure in 'calculatedRwa'.
3. **Document Method**: State the method applied in 'calculationMethod', including specific citations to CFR Title 12 (e.g., "Standardized approach for corporate exposures under 12 CFR § X.Y(z)").
4. **Explain Steps**: Provide in 'calculationSteps' a detailed, step-by-step explanation of how the RWA was derived, showing all intermediate calculations and the CFR Title 12 rules applied at each step. If an input is a percentage (e.g., riskWeightPercentage = 50), interpret it as 50% or 0.50 as appropriate. If an input is a boolean (e.g. prudentlyUnderwritten = true), interpret it accordingly.

If the provided information is insufficient or ambiguous for a precise calculation according to CFR Title 12, clearly state what's missing or unclear. Do not make assumptions beyond what is explicitly stated in CFR Title 12 or reasonably inferred from the inputs.
"#
    )
}

pub const PARSE_DOCUMENT_PREAMBLE: &str = "You are an AI assistant specializing in analyzing U.S. regulatory documents, particularly from the eCFR (Electronic Code of Federal Regulations). Prioritize accuracy and conciseness.";

pub fn render_parse_document_prompt(document_url: &str, document_text: Option<&str>) -> String {
    let mut prompt = format!("Given the following URL: {document_url}\n\n");

    match document_text {
        Some(text) => prompt.push_str(&format!(
            "The text retrieved from that URL follows:\n'''\n{text}\n'''\n\nBase your analysis on this text.\n\n"
        )),
        None => prompt.push_str(
            "The document text could not be retrieved. Analyze the content typically found at such an eCFR URL.\n\n",
        ),
    }

    prompt.push_str(
        r#"Your task is to:
1. If possible, identify the title of the document (e.g., "Part 217 - Capital Adequacy of Bank Holding Companies, Savings and Loan Holding Companies, and State Member Banks"). Set this as 'sourceTitle'. If not clearly identifiable, omit it.
2. Extract key regulatory obligations, requirements, or prohibitions.
3. For each identified obligation:
   * Provide a concise 'obligation' description.
   * Specify the 'rule' or citation it relates to (e.g., "12 CFR § 217.10(a)(1)").
   * Summarize relevant 'details' or context for that obligation.
4. Return these as an array under 'obligations'.

Focus on actionable obligations and rules. If the URL doesn't seem to point to a standard eCFR page or similar regulatory text, or if no clear obligations can be derived, return an empty 'obligations' array.

Example eCFR link structure: https://www.ecfr.gov/current/title-12/chapter-II/part-217/subpart-A/section-217.1
"#,
    );
    prompt
}

pub const SUMMARIZE_PREAMBLE: &str = "You summarize chat conversations about U.S. banking regulation.";

pub fn render_summarize_prompt(turns: &[ConversationTurn]) -> String {
    let mut prompt = String::from(
        "Please provide a concise summary (1-2 sentences) of the following chat conversation. Focus on the main topics discussed and any key outcomes or questions resolved.\n\nConversation History:\n",
    );
    push_turns(&mut prompt, turns);
    prompt.push_str("\nSummary:\n");
    prompt
}

fn push_turns(out: &mut String, turns: &[ConversationTurn]) {
    for turn in turns {
        out.push_str(&format!("  {}: {}\n", turn.speaker, turn.text));
    }
}
