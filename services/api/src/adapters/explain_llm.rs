//! services/api/src/adapters/explain_llm.rs
//!
//! This module contains the adapter for the explanation LLM.
//! It implements the `ExplanationService` port from the `core` crate.

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::chat::{
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use exam_pilot_core::domain::{Language, Subject};
use exam_pilot_core::ports::{ExplanationService, PortError, PortResult};
use regex::Regex;
use tracing::debug;

const MATH_TEMPLATE: &str = r#"You are an expert IGCSE Mathematics teacher. Explain this problem step-by-step as you would to a student{language}:

Question: {question}

Provide:
1. A clear, step-by-step solution
2. Explain WHY each step is done (the reasoning)
3. Highlight any formulas or rules used
4. Give a final answer with units if applicable

Format your response as:
STEP 1: [explanation]
STEP 2: [explanation]
...
FINAL ANSWER: [answer]

Make it encouraging and clear."#;

const PHYSICS_TEMPLATE: &str = r#"You are an expert IGCSE Physics teacher. Explain this problem step-by-step as you would to a student{language}:

Question: {question}

Provide:
1. Identify the physics concepts involved
2. State relevant formulas
3. Step-by-step solution with units
4. Explain the physics reasoning

Format your response as:
CONCEPT: [concept]
FORMULA: [formula]
STEP 1: [explanation]
...
FINAL ANSWER: [answer with units]

Make it encouraging and clear."#;

const CHEMISTRY_TEMPLATE: &str = r#"You are an expert IGCSE Chemistry teacher. Explain this problem step-by-step as you would to a student{language}:

Question: {question}

Provide:
1. Identify the chemical concepts
2. Show any equations or calculations
3. Step-by-step reasoning
4. Final answer with proper units

Format your response as:
CONCEPT: [concept]
STEP 1: [explanation]
...
FINAL ANSWER: [answer]

Make it encouraging and clear."#;

/// Builds the teaching prompt for one question.
pub fn build_prompt(subject: Subject, question: &str, language: Language) -> String {
    let template = match subject {
        Subject::Math => MATH_TEMPLATE,
        Subject::Physics => PHYSICS_TEMPLATE,
        Subject::Chemistry => CHEMISTRY_TEMPLATE,
    };
    let language_instruction = match language {
        Language::Ar => " in Arabic",
        Language::En => "",
    };
    template
        .replace("{language}", language_instruction)
        .replace("{question}", question.trim())
}

fn system_message(language: Language) -> String {
    let mut message = String::from(
        "You are an expert IGCSE teacher who explains concepts clearly and encouragingly.",
    );
    if language == Language::Ar {
        message.push_str(" Respond in Arabic.");
    }
    message
}

/// Strips markdown decoration that models like to put around the line markers,
/// e.g. `**STEP 1:** ...` or `### Final Answer: ...`.
fn normalize_markers(text: &str) -> PortResult<String> {
    let decorated = Regex::new(
        r"(?mi)^[ \t]*[*#>_\-]+[ \t]*(step[ \t]*\d+[ \t]*:|final answer[ \t]*:)[*_]*",
    )
    .map_err(|e| PortError::Unexpected(e.to_string()))?;
    Ok(decorated.replace_all(text, "$1").into_owned())
}

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements `ExplanationService` using an OpenAI-compatible LLM.
#[derive(Clone)]
pub struct OpenAiExplanationAdapter {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiExplanationAdapter {
    /// Creates a new `OpenAiExplanationAdapter`.
    pub fn new(client: Client<OpenAIConfig>, model: String) -> Self {
        Self { client, model }
    }
}

//=========================================================================================
// `ExplanationService` Trait Implementation
//=========================================================================================

#[async_trait]
impl ExplanationService for OpenAiExplanationAdapter {
    /// Asks the model for a `STEP n:` / `FINAL ANSWER:` formatted explanation.
    async fn explain(
        &self,
        subject: Subject,
        question: &str,
        language: Language,
    ) -> PortResult<String> {
        let messages = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(system_message(language))
                .build()
                .map_err(|e| PortError::Unexpected(e.to_string()))?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(build_prompt(subject, question, language))
                .build()
                .map_err(|e| PortError::Unexpected(e.to_string()))?
                .into(),
        ];

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .temperature(0.7)
            .max_completion_tokens(1500u32)
            .build()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        // Call the API and manually map the error if it occurs, which respects the orphan rule.
        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e: OpenAIError| PortError::Unexpected(e.to_string()))?;

        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| {
                PortError::Unexpected("Explanation LLM returned no text content.".to_string())
            })?;

        debug!(%subject, chars = content.len(), "Explanation received.");
        normalize_markers(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use exam_pilot_core::parse_explanation;

    #[test]
    fn prompt_names_the_subject_format_and_language() {
        let physics = build_prompt(
            Subject::Physics,
            "  A car travels 100 m in 20 s.  ",
            Language::Ar,
        );
        assert!(physics.starts_with("You are an expert IGCSE Physics teacher"));
        assert!(physics.contains("to a student in Arabic:"));
        assert!(physics.contains("Question: A car travels 100 m in 20 s.\n"));
        assert!(physics.contains("FORMULA: [formula]"));

        let math = build_prompt(Subject::Math, "1 + 1", Language::En);
        assert!(math.contains("to a student:"));
        assert!(!math.contains("CONCEPT:"));
    }

    #[test]
    fn arabic_system_message_asks_for_arabic() {
        assert!(system_message(Language::Ar).ends_with("Respond in Arabic."));
        assert!(!system_message(Language::En).contains("Arabic"));
    }

    #[test]
    fn markdown_markers_become_parseable() {
        let raw = "**STEP 1:** Subtract 3\n### Step 2: Divide by 2\n- FINAL ANSWER:** x = 4";
        let normalized = normalize_markers(raw).unwrap();
        let parsed = parse_explanation(&normalized);
        assert_eq!(parsed.steps, vec!["Subtract 3", "Divide by 2"]);
        assert_eq!(parsed.final_answer, "x = 4");
    }

    #[test]
    fn plain_text_is_left_alone() {
        let raw = "STEP 1: Keep *this* emphasis\nFINAL ANSWER: 2";
        assert_eq!(normalize_markers(raw).unwrap(), raw);
    }
}
