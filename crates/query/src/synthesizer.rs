use extract::{with_timeout, CompletionProvider, CompletionRequest, ProviderError, ProviderKind};
use serde::Serialize;

use crate::composer::{ComposedContext, Provenance};
use crate::config::{RagConfig, RetrievalMode};

const GROUNDING_RULES: &str = "Answer using only the context provided. \
    If the context does not contain enough information to answer, say so plainly \
    instead of guessing. Cite document sources and relationships you rely on.";

const NO_CONTEXT: &str = "(no relevant context was found)";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Synthesis {
    pub answer: String,
    pub provenance: Vec<Provenance>,
}

pub fn build_system_instruction(config: &RagConfig, mode: RetrievalMode) -> String {
    format!("{}\n\n{}", config.system_prompt(mode), GROUNDING_RULES)
}

pub fn build_answer_prompt(context: &ComposedContext, question: &str) -> String {
    let context_text = if context.text.is_empty() {
        NO_CONTEXT
    } else {
        context.text.as_str()
    };
    format!("Context:\n{}\n\nQuestion: {}\n\nAnswer:", context_text, question)
}

pub struct AnswerSynthesizer<'a> {
    config: &'a RagConfig,
    llm: &'a dyn CompletionProvider,
}

impl<'a> AnswerSynthesizer<'a> {
    pub fn new(config: &'a RagConfig, llm: &'a dyn CompletionProvider) -> Self {
        Self { config, llm }
    }

    /// Generate the final answer. Runs even on empty context so the model
    /// can state that nothing relevant was found; any provider failure is
    /// returned to the caller.
    pub async fn synthesize(
        &self,
        context: &ComposedContext,
        question: &str,
        mode: RetrievalMode,
    ) -> Result<Synthesis, ProviderError> {
        let request = CompletionRequest {
            system: build_system_instruction(self.config, mode),
            prompt: build_answer_prompt(context, question),
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            json: false,
        };

        let answer = with_timeout(
            ProviderKind::Completion,
            self.config.provider_timeout(),
            self.llm.complete(&request),
        )
        .await?;

        let answer = answer.trim();
        if answer.is_empty() {
            return Err(ProviderError::malformed(ProviderKind::Completion, "empty answer"));
        }

        Ok(Synthesis {
            answer: answer.to_string(),
            provenance: context.provenance(),
        })
    }
}
