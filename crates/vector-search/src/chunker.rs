//! Token-window chunking of extracted text.

use tiktoken_rs::CoreBPE;

use crate::error::{SearchError, SearchResult};
use crate::types::ChunkingStrategy;

/// Splits text into overlapping token windows.
///
/// Window boundaries are token-aligned: a chunk holds at most
/// `max_chunk_size_tokens` tokens and consecutive chunks share
/// `chunk_overlap_tokens` of them.
pub struct TextChunker {
    bpe: CoreBPE,
    default_strategy: ChunkingStrategy,
}

impl TextChunker {
    pub fn new(config: &config::VectorStoreConfig) -> SearchResult<Self> {
        let bpe = tiktoken_rs::cl100k_base().map_err(|e| SearchError::Index(format!("Failed to load tokenizer: {e}")))?;

        Ok(Self {
            bpe,
            default_strategy: ChunkingStrategy {
                max_chunk_size_tokens: config.chunk_size,
                chunk_overlap_tokens: config.chunk_overlap,
            },
        })
    }

    /// The store-level default strategy.
    pub fn default_strategy(&self) -> ChunkingStrategy {
        self.default_strategy
    }

    /// Split `text` with the file's strategy, falling back to the default.
    pub fn chunk(&self, text: &str, strategy: Option<ChunkingStrategy>) -> SearchResult<Vec<String>> {
        let strategy = strategy.unwrap_or(self.default_strategy);

        if strategy.chunk_overlap_tokens >= strategy.max_chunk_size_tokens {
            return Err(SearchError::InvalidRequest(format!(
                "chunk_overlap_tokens ({}) must be smaller than max_chunk_size_tokens ({})",
                strategy.chunk_overlap_tokens, strategy.max_chunk_size_tokens
            )));
        }

        let tokens = self.bpe.encode_with_special_tokens(text);

        if tokens.is_empty() {
            return Ok(Vec::new());
        }

        let step = strategy.max_chunk_size_tokens - strategy.chunk_overlap_tokens;
        let mut chunks = Vec::with_capacity(tokens.len().div_ceil(step));
        let mut start = 0;

        while start < tokens.len() {
            let end = (start + strategy.max_chunk_size_tokens).min(tokens.len());

            let chunk = self
                .bpe
                .decode(tokens[start..end].to_vec())
                .map_err(|e| SearchError::Index(format!("Failed to decode chunk: {e}")))?;

            chunks.push(chunk);

            if end == tokens.len() {
                break;
            }

            start += step;
        }

        Ok(chunks)
    }

    /// Token count of a piece of text.
    pub fn count_tokens(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker(chunk_size: usize, overlap: usize) -> TextChunker {
        let config: config::VectorStoreConfig = toml::from_str(&format!(
            "chunk_size = {chunk_size}\nchunk_overlap = {overlap}"
        ))
        .unwrap();

        TextChunker::new(&config).unwrap()
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        let chunker = chunker(10, 2);

        assert!(chunker.chunk("", None).unwrap().is_empty());
    }

    #[test]
    fn short_text_is_a_single_chunk() {
        let chunker = chunker(100, 10);

        let chunks = chunker.chunk("one small paragraph", None).unwrap();

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0], "one small paragraph");
    }

    #[test]
    fn windows_overlap_and_cover_everything() {
        let chunker = chunker(8, 3);
        let text = "the quick brown fox jumps over the lazy dog and keeps on running through the field";

        let chunks = chunker.chunk(text, None).unwrap();

        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunker.count_tokens(chunk) <= 8);
        }

        // The concatenation of the de-overlapped windows covers the input.
        let reassembled: String = chunks
            .iter()
            .enumerate()
            .map(|(i, chunk)| {
                if i == 0 {
                    chunk.clone()
                } else {
                    let tokens = chunker.bpe.encode_with_special_tokens(chunk);
                    chunker.bpe.decode(tokens[3.min(tokens.len())..].to_vec()).unwrap()
                }
            })
            .collect();
        assert_eq!(reassembled, text);
    }

    #[test]
    fn file_strategy_overrides_default() {
        let chunker = chunker(100, 10);

        let chunks = chunker
            .chunk(
                "a b c d e f g h i j k l m n o p",
                Some(ChunkingStrategy {
                    max_chunk_size_tokens: 4,
                    chunk_overlap_tokens: 0,
                }),
            )
            .unwrap();

        assert!(chunks.len() >= 4);
    }

    #[test]
    fn rejects_overlap_not_smaller_than_window() {
        let chunker = chunker(100, 10);

        let result = chunker.chunk(
            "text",
            Some(ChunkingStrategy {
                max_chunk_size_tokens: 5,
                chunk_overlap_tokens: 5,
            }),
        );

        assert!(result.is_err());
    }
}
