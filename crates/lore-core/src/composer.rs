use std::fmt::Write as _;

use lore_index::SearchResult;
use lore_llm::Message;
use serde::Serialize;

use crate::error::RagError;

pub const SYSTEM_PROMPT: &str = "You are a rigorous assistant. Answer strictly from the passages \
provided in the context. Mention the source of each fact you use. If the passages do not \
contain the answer, say that you don't know instead of guessing.";

/// Longest citation snippet, in characters, before the ellipsis.
pub const SNIPPET_CHARS: usize = 240;

/// Reference to a retrieved passage backing an answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Citation {
    pub knowledge_base: String,
    pub source: String,
    pub position: usize,
    pub score: f32,
    pub snippet: String,
}

/// Turns ranked passages into the message sequence sent to the model.
#[derive(Debug, Default, Clone, Copy)]
pub struct PromptComposer;

impl PromptComposer {
    /// Build `[system instruction, context?, user query]`.
    ///
    /// The context message is omitted when `results` is empty.
    ///
    /// # Errors
    ///
    /// Returns a validation error when `query` is blank.
    pub fn compose_messages(
        &self,
        query: &str,
        results: &[SearchResult],
    ) -> Result<Vec<Message>, RagError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(RagError::validation("query must not be blank"));
        }

        let mut messages = Vec::with_capacity(3);
        messages.push(Message::system(SYSTEM_PROMPT));
        let context = self.build_context(results);
        if !context.is_empty() {
            messages.push(Message::system(format!("Context:\n{context}")));
        }
        messages.push(Message::user(query));
        Ok(messages)
    }

    /// Render passages best-first, each under a
    /// `[knowledge_base|source|position|score:0.00]` header.
    #[must_use]
    pub fn build_context(&self, results: &[SearchResult]) -> String {
        let mut ranked: Vec<&SearchResult> = results.iter().collect();
        ranked.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut out = String::new();
        for result in ranked {
            let chunk = &result.chunk;
            let _ = writeln!(
                out,
                "[{}|{}|{}|score:{:.2}]",
                chunk.knowledge_base, chunk.source, chunk.position, result.score
            );
            out.push_str(chunk.text.trim());
            out.push_str("\n\n");
        }
        out.truncate(out.trim_end().len());
        out
    }

    /// One citation per result, in result order.
    #[must_use]
    pub fn citations(&self, results: &[SearchResult]) -> Vec<Citation> {
        results
            .iter()
            .map(|r| Citation {
                knowledge_base: r.chunk.knowledge_base.clone(),
                source: r.chunk.source.clone(),
                position: r.chunk.position,
                score: r.score,
                snippet: snippet(&r.chunk.text),
            })
            .collect()
    }
}

fn snippet(text: &str) -> String {
    let flat = text.replace(['\r', '\n'], " ");
    let flat = flat.trim();
    match flat.char_indices().nth(SNIPPET_CHARS) {
        Some((cut, _)) => format!("{}…", &flat[..cut]),
        None => flat.to_owned(),
    }
}
