//! Token-budgeted chunking of page text.
//!
//! Pages are split with `semchunk-rs` using a `tiktoken` counter (`cl100k_base` unless the model
//! name maps to a known encoding). A whitespace counter takes over when no encoding can be
//! loaded. Adjacent chunks optionally share a token overlap so that sentences spanning a
//! boundary stay retrievable.

use anyhow::Error as TokenizerError;
use semchunk_rs::Chunker;
use std::sync::Arc;
use thiserror::Error;
use tiktoken_rs::{CoreBPE, cl100k_base, get_bpe_from_model};

pub(crate) type TokenCounter = Arc<dyn Fn(&str) -> usize + Send + Sync>;

/// Errors produced while turning page text into chunks.
#[derive(Debug, Error)]
pub enum ChunkingError {
    /// Configuration asked for an impossible token budget.
    #[error("chunk size must be greater than zero")]
    InvalidChunkSize,
}

/// Build a token counter for the given model, falling back to whitespace counting.
pub(crate) fn build_token_counter(model: &str) -> TokenCounter {
    match resolve_encoding(model) {
        Ok(encoding) => {
            let encoding = Arc::new(encoding);
            Arc::new(move |segment: &str| encoding.encode_ordinary(segment).len())
        }
        Err(error) => {
            tracing::warn!(
                model,
                error = %error,
                "Tokenizer unavailable; falling back to whitespace counter"
            );
            default_token_counter()
        }
    }
}

fn resolve_encoding(model: &str) -> Result<CoreBPE, TokenizerError> {
    match get_bpe_from_model(model.trim()) {
        Ok(encoding) => Ok(encoding),
        Err(_) => cl100k_base(),
    }
}

pub(crate) fn default_token_counter() -> TokenCounter {
    Arc::new(|segment: &str| {
        let tokens = segment.split_whitespace().count();
        if tokens == 0 && !segment.is_empty() {
            1
        } else {
            tokens
        }
    })
}

/// Split `text` into chunks of at most `chunk_size` tokens with `overlap` shared tokens.
///
/// Returns an empty vector when the input text is all whitespace.
pub(crate) fn chunk_text(
    text: &str,
    chunk_size: usize,
    overlap: usize,
    token_counter: &TokenCounter,
) -> Result<Vec<String>, ChunkingError> {
    if chunk_size == 0 {
        return Err(ChunkingError::InvalidChunkSize);
    }
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }

    let counter_for_chunker = token_counter.clone();
    let chunker = Chunker::new(
        chunk_size,
        Box::new(move |segment: &str| counter_for_chunker.as_ref()(segment)),
    );
    let base_chunks = chunker.chunk(text);
    Ok(apply_overlap(base_chunks, chunk_size, overlap, token_counter))
}

fn apply_overlap(
    chunks: Vec<String>,
    chunk_size: usize,
    overlap: usize,
    token_counter: &TokenCounter,
) -> Vec<String> {
    let effective_overlap = overlap.min(chunk_size.saturating_sub(1));
    if chunks.len() < 2 || effective_overlap == 0 {
        return chunks;
    }

    let mut overlapped = Vec::with_capacity(chunks.len());
    let mut previous: Option<String> = None;

    for current in chunks {
        let chunk = match &previous {
            Some(previous) => build_overlapped_chunk(
                previous,
                &current,
                effective_overlap,
                chunk_size,
                token_counter,
            ),
            None => current.clone(),
        };
        overlapped.push(chunk);
        previous = Some(current);
    }

    overlapped
}

fn build_overlapped_chunk(
    previous: &str,
    current: &str,
    overlap: usize,
    chunk_size: usize,
    token_counter: &TokenCounter,
) -> String {
    let tail = longest_suffix_within(previous, overlap, token_counter);
    let mut combined = String::with_capacity(tail.len() + current.len() + 1);

    if !tail.is_empty() {
        combined.push_str(tail);
        let tail_ends_blank = tail.chars().next_back().is_some_and(char::is_whitespace);
        let current_starts_blank = current.chars().next().is_some_and(char::is_whitespace);
        if !tail_ends_blank && !current_starts_blank {
            combined.push(' ');
        }
    }

    combined.push_str(current);
    longest_suffix_within(&combined, chunk_size, token_counter).to_string()
}

/// Longest whitespace-trimmed suffix of `text` whose token count fits `budget`.
fn longest_suffix_within<'a>(text: &'a str, budget: usize, token_counter: &TokenCounter) -> &'a str {
    if budget == 0 {
        return "";
    }

    for (start, _) in text.char_indices() {
        let candidate = text[start..].trim_start();
        if token_counter.as_ref()(candidate) <= budget {
            return candidate;
        }
    }

    ""
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_text_respects_chunk_size_whitespace_counter() {
        let chunks = chunk_text("one two three four five", 2, 0, &default_token_counter())
            .expect("chunks");
        assert_eq!(chunks, vec!["one two", "three four", "five"]);
    }

    #[test]
    fn chunk_text_handles_blank_input() {
        let chunks = chunk_text("  \n ", 4, 0, &default_token_counter()).expect("chunks");
        assert!(chunks.is_empty());
    }

    #[test]
    fn chunk_text_applies_overlap_within_budget() {
        let counter = default_token_counter();
        let chunks = chunk_text("one two three four five", 3, 1, &counter).expect("chunks");
        assert_eq!(chunks, vec!["one two three", "three four five"]);
        for chunk in &chunks {
            assert!(counter.as_ref()(chunk) <= 3);
        }
    }

    #[test]
    fn chunk_text_rejects_zero_chunk_size() {
        let error = chunk_text("hello", 0, 0, &default_token_counter()).unwrap_err();
        assert!(matches!(error, ChunkingError::InvalidChunkSize));
    }

    #[test]
    fn tiktoken_counter_keeps_every_word() {
        let text = "The quick brown fox jumps over the lazy dog.";
        let counter = build_token_counter("bge-base-en-v1.5");
        let chunks = chunk_text(text, 5, 0, &counter).expect("chunks");
        for chunk in &chunks {
            assert!(counter.as_ref()(chunk) <= 5);
        }
        let chunk_words: Vec<&str> = chunks
            .iter()
            .flat_map(|chunk| chunk.split_whitespace())
            .collect();
        let original_words: Vec<&str> = text.split_whitespace().collect();
        assert_eq!(chunk_words, original_words);
    }
}
