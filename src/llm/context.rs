//! Prompt assembly under a token budget

use crate::document::{Chunk, ChunkId};

/// Builds the generation prompt from ranked chunks.
///
/// Chunks are concatenated in rank order until the estimated token total
/// would exceed the budget; from that point on, every remaining
/// lower-ranked chunk is dropped whole. A chunk is never split.
pub struct ContextAssembler {
    token_budget: usize,
    system_prompt: String,
}

/// Result of prompt assembly
#[derive(Debug, Clone)]
pub struct AssembledPrompt {
    pub prompt: String,
    /// Chunk ids included, in rank order
    pub included: Vec<ChunkId>,
    /// Chunk ids dropped to fit the budget
    pub dropped: Vec<ChunkId>,
    pub context_tokens: usize,
}

impl ContextAssembler {
    pub fn new(token_budget: usize, system_prompt: impl Into<String>) -> Self {
        Self {
            token_budget,
            system_prompt: system_prompt.into(),
        }
    }

    /// Assemble a prompt from ranked chunks
    pub fn assemble(&self, question: &str, chunks: &[Chunk]) -> AssembledPrompt {
        let mut included = Vec::new();
        let mut dropped = Vec::new();
        let mut context_tokens = 0usize;
        let mut context = String::new();
        let mut over_budget = false;

        for chunk in chunks {
            let tokens = estimate_tokens(&chunk.text);

            if over_budget || context_tokens + tokens > self.token_budget {
                // Budget exceeded: drop this and every lower-ranked chunk
                over_budget = true;
                dropped.push(chunk.id);
                continue;
            }

            if !context.is_empty() {
                context.push_str("\n\n");
            }
            context.push_str(&format!("[{}] {}", included.len() + 1, chunk.text));
            context_tokens += tokens;
            included.push(chunk.id);
        }

        if !dropped.is_empty() {
            tracing::debug!(
                "Context budget {} dropped {} of {} chunks",
                self.token_budget,
                dropped.len(),
                chunks.len()
            );
        }

        let prompt = if context.is_empty() {
            self.question_only(question)
        } else {
            format!(
                "{}\n\nContext:\n{}\n\nQuestion: {}\nAnswer:",
                self.system_prompt, context, question
            )
        };

        AssembledPrompt {
            prompt,
            included,
            dropped,
            context_tokens,
        }
    }

    /// Degraded prompt for answering without retrieved context
    pub fn assemble_without_context(&self, question: &str) -> AssembledPrompt {
        AssembledPrompt {
            prompt: self.question_only(question),
            included: Vec::new(),
            dropped: Vec::new(),
            context_tokens: 0,
        }
    }

    fn question_only(&self, question: &str) -> String {
        format!("{}\n\nQuestion: {}\nAnswer:", self.system_prompt, question)
    }
}

/// Token estimate shared with the chunker: whitespace-separated words
pub fn estimate_tokens(text: &str) -> usize {
    text.split_whitespace().count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{DocumentId, Page};

    fn chunk(id: u64, words: usize) -> Chunk {
        let text: Vec<String> = (0..words).map(|i| format!("word{}", i)).collect();
        let document_id = DocumentId::from_pages(&[Page::text(0, "src")]);
        Chunk {
            id: ChunkId(id),
            document_id,
            text: text.join(" "),
            start_offset: 0,
            end_offset: 0,
            token_count: words,
            overlaps_previous: false,
        }
    }

    #[test]
    fn test_all_chunks_fit() {
        let assembler = ContextAssembler::new(100, "System.");
        let chunks = vec![chunk(1, 20), chunk(2, 20)];

        let assembled = assembler.assemble("What?", &chunks);

        assert_eq!(assembled.included, vec![ChunkId(1), ChunkId(2)]);
        assert!(assembled.dropped.is_empty());
        assert_eq!(assembled.context_tokens, 40);
        assert!(assembled.prompt.contains("Question: What?"));
        assert!(assembled.prompt.contains("[1]"));
        assert!(assembled.prompt.contains("[2]"));
    }

    #[test]
    fn test_budget_drops_whole_lowest_ranked_chunks() {
        let assembler = ContextAssembler::new(50, "System.");
        let chunks = vec![chunk(1, 30), chunk(2, 30), chunk(3, 5)];

        let assembled = assembler.assemble("What?", &chunks);

        // Chunk 2 exceeds the budget; it and everything below it drop whole
        assert_eq!(assembled.included, vec![ChunkId(1)]);
        assert_eq!(assembled.dropped, vec![ChunkId(2), ChunkId(3)]);
        assert_eq!(assembled.context_tokens, 30);
        assert!(!assembled.prompt.contains("word29 word0"));
    }

    #[test]
    fn test_never_splits_a_chunk() {
        let assembler = ContextAssembler::new(10, "System.");
        let chunks = vec![chunk(1, 25)];

        let assembled = assembler.assemble("What?", &chunks);

        assert!(assembled.included.is_empty());
        assert_eq!(assembled.dropped, vec![ChunkId(1)]);
        // No partial chunk text leaks into the prompt
        assert!(!assembled.prompt.contains("word0"));
    }

    #[test]
    fn test_without_context() {
        let assembler = ContextAssembler::new(100, "System.");
        let assembled = assembler.assemble_without_context("What?");

        assert!(assembled.included.is_empty());
        assert!(assembled.prompt.contains("Question: What?"));
        assert!(!assembled.prompt.contains("Context:"));
    }
}
