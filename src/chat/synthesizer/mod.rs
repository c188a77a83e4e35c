// Response synthesis
// Compact-and-refine over retrieved FAQ chunks


use std::sync::Arc;

use tracing::debug;

use super::prompts::{EMPTY_RESPONSE, qa_prompt, refine_prompt};
use crate::Result;
use crate::config::RetrievalConfig;
use crate::embeddings::{estimate_token_count, split_text};
use crate::llm::{ChatMessage, ChatModel};

/// Smallest context budget a prompt is packed to, even for tiny windows
const MIN_CONTEXT_TOKENS: usize = 64;

const CONTEXT_SEPARATOR: &str = "\n\n";

/// Answers a query from context text, refining the answer batch by batch
pub struct ResponseSynthesizer {
    llm: Arc<dyn ChatModel>,
    context_window: usize,
    num_output: usize,
}

impl std::fmt::Debug for ResponseSynthesizer {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseSynthesizer")
            .field("context_window", &self.context_window)
            .field("num_output", &self.num_output)
            .finish_non_exhaustive()
    }
}

impl ResponseSynthesizer {
    #[inline]
    pub fn new(llm: Arc<dyn ChatModel>, config: &RetrievalConfig) -> Self {
        Self {
            llm,
            context_window: config.context_window,
            num_output: config.num_output,
        }
    }

    /// Tokens left for context once the prompt scaffold and the answer are reserved
    #[inline]
    pub fn context_budget(&self, query: &str) -> usize {
        let scaffold = estimate_token_count(&qa_prompt("", query));
        self.context_window
            .saturating_sub(self.num_output)
            .saturating_sub(scaffold)
            .max(MIN_CONTEXT_TOKENS)
    }

    /// Pack context texts into as few batches as fit the budget, keeping order.
    ///
    /// A single text larger than the budget is split on its own.
    #[inline]
    pub fn pack_context(&self, query: &str, texts: &[String]) -> Vec<String> {
        let budget = self.context_budget(query);
        let mut batches = Vec::new();
        let mut current = String::new();

        let pieces = texts.iter().flat_map(|text| {
            if estimate_token_count(text) > budget {
                split_text(text, budget, 0)
            } else {
                vec![text.trim().to_string()]
            }
        });

        for piece in pieces.filter(|piece| !piece.is_empty()) {
            if current.is_empty() {
                current = piece;
                continue;
            }

            let candidate = format!("{current}{CONTEXT_SEPARATOR}{piece}");
            if estimate_token_count(&candidate) <= budget {
                current = candidate;
            } else {
                batches.push(std::mem::replace(&mut current, piece));
            }
        }

        if !current.is_empty() {
            batches.push(current);
        }
        batches
    }

    /// Answer `query` from `texts`; the first batch uses the QA prompt, each further batch refines
    #[inline]
    pub async fn synthesize(&self, query: &str, texts: &[String]) -> Result<String> {
        let batches = self.pack_context(query, texts);
        let Some((first, rest)) = batches.split_first() else {
            debug!("No context retrieved for query, answering with empty response");
            return Ok(EMPTY_RESPONSE.to_string());
        };

        debug!(
            "Synthesizing answer from {} texts in {} batches",
            texts.len(),
            batches.len()
        );

        let mut answer = self
            .llm
            .complete(&[ChatMessage::user(qa_prompt(first, query))])
            .await?;

        for context in rest {
            answer = self
                .llm
                .complete(&[ChatMessage::user(refine_prompt(query, &answer, context))])
                .await?;
        }

        Ok(answer)
    }
}
