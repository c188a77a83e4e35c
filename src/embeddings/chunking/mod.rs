
use tracing::{debug, warn};

use crate::config::{DocumentConfig, RetrievalConfig};
use crate::documents::{DocumentMetadata, FaqDocument, LLM_EXCLUDED_METADATA, render_with_metadata};

/// Smallest text budget a chunk may have after metadata is accounted for
const MIN_TEXT_BUDGET: usize = 50;

const SENTENCE_TERMINATORS: [char; 4] = ['.', '!', '?', '。'];

/// A piece of an FAQ document ready for embedding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentChunk {
    /// Id of the document this chunk was cut from
    pub document_id: String,
    /// Position of this chunk within its document
    pub chunk_index: usize,
    /// The chunk text
    pub text: String,
    /// Metadata inherited from the document
    pub metadata: DocumentMetadata,
    /// Estimated token count of the text
    pub token_count: usize,
}

impl DocumentChunk {
    /// Text sent to the embedding model
    #[inline]
    pub fn embed_content(&self, config: &DocumentConfig) -> String {
        render_with_metadata(&self.text, &self.metadata, &[], config)
    }

    /// Text shown to the LLM as retrieval context
    #[inline]
    pub fn llm_content(&self, config: &DocumentConfig) -> String {
        render_with_metadata(&self.text, &self.metadata, LLM_EXCLUDED_METADATA, config)
    }
}

/// Configuration for sentence chunking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    /// Maximum chunk size in tokens, metadata included
    pub chunk_size: usize,
    /// Tokens carried over from the end of one chunk into the next
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            chunk_size: 1024,
            chunk_overlap: 20,
        }
    }
}

impl From<&RetrievalConfig> for ChunkingConfig {
    #[inline]
    fn from(config: &RetrievalConfig) -> Self {
        Self {
            chunk_size: config.chunk_size,
            chunk_overlap: config.chunk_overlap,
        }
    }
}

/// Chunk every document, keeping document order
#[inline]
pub fn chunk_documents(
    documents: &[FaqDocument],
    config: &ChunkingConfig,
    document_config: &DocumentConfig,
) -> Vec<DocumentChunk> {
    let chunks: Vec<DocumentChunk> = documents
        .iter()
        .flat_map(|document| chunk_document(document, config, document_config))
        .collect();

    debug!(
        "Chunked {} documents into {} chunks (avg {} tokens)",
        documents.len(),
        chunks.len(),
        chunks.iter().map(|c| c.token_count).sum::<usize>() / chunks.len().max(1)
    );

    chunks
}

/// Split one document into chunks whose metadata-rendered size fits the budget
#[inline]
pub fn chunk_document(
    document: &FaqDocument,
    config: &ChunkingConfig,
    document_config: &DocumentConfig,
) -> Vec<DocumentChunk> {
    let metadata_tokens = metadata_token_count(&document.metadata, document_config);
    let mut budget = config.chunk_size.saturating_sub(metadata_tokens);
    if budget < MIN_TEXT_BUDGET {
        warn!(
            "Metadata of document {} uses {} of {} tokens; ignoring it for chunking",
            document.id, metadata_tokens, config.chunk_size
        );
        budget = config.chunk_size;
    }
    let overlap = config.chunk_overlap.min(budget / 2);

    split_text(document.content(), budget, overlap)
        .into_iter()
        .enumerate()
        .map(|(chunk_index, text)| DocumentChunk {
            document_id: document.id.clone(),
            chunk_index,
            token_count: estimate_token_count(&text),
            text,
            metadata: document.metadata.clone(),
        })
        .collect()
}

fn metadata_token_count(metadata: &DocumentMetadata, config: &DocumentConfig) -> usize {
    let embed = render_with_metadata("", metadata, &[], config);
    let llm = render_with_metadata("", metadata, LLM_EXCLUDED_METADATA, config);
    estimate_token_count(&embed).max(estimate_token_count(&llm))
}

/// Split text into chunks of at most `chunk_size` tokens with sentence-level overlap
#[inline]
pub fn split_text(text: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<String> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    if estimate_token_count(text) <= chunk_size {
        return vec![text.trim().to_string()];
    }

    let splits: Vec<String> = split_sentences(text)
        .into_iter()
        .flat_map(|sentence| {
            if estimate_token_count(&sentence) > chunk_size {
                split_oversized(&sentence, chunk_size)
            } else {
                vec![sentence]
            }
        })
        .collect();

    merge_splits(splits, chunk_size, chunk_overlap)
}

/// Break text after sentence terminators and newlines, keeping trailing whitespace
fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);

        let at_boundary = c == '\n'
            || (SENTENCE_TERMINATORS.contains(&c)
                && chars.peek().is_none_or(|next| next.is_whitespace()));
        if !at_boundary {
            continue;
        }

        while let Some(&next) = chars.peek() {
            if !next.is_whitespace() {
                break;
            }
            current.push(next);
            chars.next();
        }

        sentences.push(std::mem::take(&mut current));
    }

    if !current.is_empty() {
        sentences.push(current);
    }

    sentences
}

/// Split a sentence that alone exceeds the budget, first by words then by characters
fn split_oversized(sentence: &str, chunk_size: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();

    for word in sentence.split_inclusive(char::is_whitespace) {
        if estimate_token_count(word) > chunk_size {
            if !current.is_empty() {
                pieces.push(std::mem::take(&mut current));
            }
            let chars: Vec<char> = word.chars().collect();
            pieces.extend(
                chars
                    .chunks(chunk_size.max(1))
                    .map(|window| window.iter().collect::<String>()),
            );
            continue;
        }

        if estimate_token_count(&current) + estimate_token_count(word) > chunk_size
            && !current.trim().is_empty()
        {
            pieces.push(std::mem::take(&mut current));
        }
        current.push_str(word);
    }

    if !current.is_empty() {
        pieces.push(current);
    }

    pieces
}

/// Greedily pack splits into chunks, seeding each new chunk with trailing splits as overlap
fn merge_splits(splits: Vec<String>, chunk_size: usize, chunk_overlap: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current: Vec<String> = Vec::new();

    for split in splits {
        if !current.is_empty() && joined_token_count(&current, &split) > chunk_size {
            push_chunk(&mut chunks, &current);

            let mut carried: Vec<String> = Vec::new();
            for text in current.iter().rev() {
                carried.insert(0, text.clone());
                if estimate_token_count(&carried.concat()) > chunk_overlap {
                    carried.remove(0);
                    break;
                }
            }
            current = carried;

            while !current.is_empty() && joined_token_count(&current, &split) > chunk_size {
                current.remove(0);
            }
        }

        current.push(split);
    }

    if !current.is_empty() {
        push_chunk(&mut chunks, &current);
    }

    chunks
}

fn joined_token_count(current: &[String], next: &str) -> usize {
    let mut text = current.concat();
    text.push_str(next);
    estimate_token_count(&text)
}

fn push_chunk(chunks: &mut Vec<String>, splits: &[String]) {
    let text = splits.concat();
    let text = text.trim();
    if !text.is_empty() {
        chunks.push(text.to_string());
    }
}

/// Estimate token count using a simple heuristic
/// ASCII words count as 1/0.75 tokens, every other non-space character as one token
#[inline]
pub fn estimate_token_count(text: &str) -> usize {
    let ascii_words = text
        .split_whitespace()
        .filter(|word| word.chars().any(|c| c.is_ascii_alphanumeric()))
        .count();
    let non_ascii = text
        .chars()
        .filter(|c| !c.is_ascii() && !c.is_whitespace())
        .count();
    let punct_count = text.chars().filter(|c| c.is_ascii_punctuation()).count();

    ((punct_count as f64).mul_add(0.1, ascii_words as f64 / 0.75) + non_ascii as f64) as usize
}
