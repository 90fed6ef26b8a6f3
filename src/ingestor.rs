//! Reference-document ingestion: PDF text extraction, cleanup, and chunking.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// A bounded slice of the cleaned reference text used as a retrieval unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Monotonic identifier assigned during ingestion.
    pub id: usize,
    /// Chunk body text.
    pub text: String,
    /// Character offset of the chunk start within the cleaned document.
    pub source_offset: usize,
}

/// Everything extracted from one reference document.
#[derive(Debug, Clone)]
pub struct IngestedDocument {
    /// Ordered chunk sequence.
    pub chunks: Vec<Chunk>,
    /// CRC32 of the raw source bytes, used to detect a changed source file.
    pub source_checksum: u32,
}

/// Chunking tuning knobs.
#[derive(Debug, Clone, Copy)]
pub struct IngestConfig {
    /// Approximate character budget per chunk before flushing.
    pub chunk_target_chars: usize,
    /// Number of trailing sentences repeated at the start of the next chunk.
    pub overlap_sentences: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            chunk_target_chars: 500,
            overlap_sentences: 1,
        }
    }
}

/// Errors surfaced while ingesting a reference document.
#[derive(Debug)]
pub enum IngestError {
    /// The file could not be opened or parsed as a PDF.
    Unreadable {
        /// Path that failed to open or parse.
        path: PathBuf,
        /// Underlying failure description.
        detail: String,
    },
    /// Extraction succeeded but produced no usable text.
    NoText,
}

impl fmt::Display for IngestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unreadable { path, detail } => {
                write!(f, "cannot read reference document {}: {}", path.display(), detail)
            }
            Self::NoText => write!(f, "no extractable text in reference document"),
        }
    }
}

impl std::error::Error for IngestError {}

/// Stateless PDF ingestion service.
#[derive(Debug, Clone)]
pub struct Ingestor {
    config: IngestConfig,
}

impl Ingestor {
    /// Builds a new ingestor with the provided chunking config.
    pub fn new(config: IngestConfig) -> Self {
        Self { config }
    }

    /// Returns the underlying config reference.
    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Extracts, cleans, and chunks the document at `path`.
    pub fn ingest(&self, path: &Path) -> Result<IngestedDocument, IngestError> {
        let bytes = fs::read(path).map_err(|err| IngestError::Unreadable {
            path: path.to_path_buf(),
            detail: err.to_string(),
        })?;

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&bytes);
        let checksum = hasher.finalize();

        let raw = pdf_extract::extract_text_from_mem(&bytes).map_err(|err| {
            IngestError::Unreadable {
                path: path.to_path_buf(),
                detail: err.to_string(),
            }
        })?;

        build_document(&raw, checksum, &self.config)
    }
}

fn build_document(
    raw: &str,
    checksum: u32,
    config: &IngestConfig,
) -> Result<IngestedDocument, IngestError> {
    let cleaned = clean_text(raw);
    if cleaned.is_empty() {
        return Err(IngestError::NoText);
    }

    let sentences = split_sentences(&cleaned);
    if sentences.is_empty() {
        return Err(IngestError::NoText);
    }

    let chunks = pack_chunks(&sentences, config);
    if chunks.is_empty() {
        return Err(IngestError::NoText);
    }

    Ok(IngestedDocument {
        chunks,
        source_checksum: checksum,
    })
}

/// Collapses whitespace runs and drops characters outside the retained set
/// (alphanumerics plus basic clinical punctuation).
fn clean_text(input: &str) -> String {
    let mut buf = String::with_capacity(input.len());
    let mut last_space = false;
    for ch in input.chars() {
        if ch.is_whitespace() {
            if !last_space && !buf.is_empty() {
                buf.push(' ');
            }
            last_space = true;
        } else if ch.is_alphanumeric() || matches!(ch, '.' | ',' | '!' | '?' | ';' | ':' | '(' | ')' | '-' | '%' | '/' | '\'') {
            buf.push(ch);
            last_space = false;
        }
        // anything else (control bytes, stray glyphs) is dropped without
        // breaking the current word run
    }
    while buf.ends_with(' ') {
        buf.pop();
    }
    buf
}

/// One sentence plus its character offset within the cleaned document.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Sentence {
    pub(crate) text: String,
    pub(crate) offset: usize,
}

/// Splits cleaned text on terminal punctuation followed by whitespace.
pub(crate) fn split_sentences(text: &str) -> Vec<Sentence> {
    let mut sentences = Vec::new();
    let mut start = 0usize;
    let mut chars = text.char_indices().peekable();

    while let Some((idx, ch)) = chars.next() {
        let terminal = matches!(ch, '.' | '!' | '?');
        if !terminal {
            continue;
        }
        let boundary = match chars.peek() {
            Some((_, next)) => next.is_whitespace(),
            None => true,
        };
        if !boundary {
            continue;
        }
        let end = idx + ch.len_utf8();
        push_sentence(&mut sentences, text, start, end);
        start = end;
    }
    // trailing text without terminal punctuation still forms a sentence
    push_sentence(&mut sentences, text, start, text.len());
    sentences
}

fn push_sentence(sentences: &mut Vec<Sentence>, text: &str, start: usize, end: usize) {
    let slice = &text[start..end];
    let trimmed = slice.trim_start();
    if trimmed.trim_end().is_empty() {
        return;
    }
    let offset = start + (slice.len() - trimmed.len());
    sentences.push(Sentence {
        text: trimmed.trim_end().to_string(),
        offset,
    });
}

fn pack_chunks(sentences: &[Sentence], config: &IngestConfig) -> Vec<Chunk> {
    let target = config.chunk_target_chars.max(1);
    let mut chunks: Vec<Chunk> = Vec::new();
    let mut buffer: Vec<usize> = Vec::new();
    let mut max_flushed: Option<usize> = None;

    for (idx, sentence) in sentences.iter().enumerate() {
        let projected = joined_len(&buffer, sentences)
            + sentence.text.len()
            + if buffer.is_empty() { 0 } else { 1 };
        if !buffer.is_empty() && projected > target {
            flush_chunk(&mut chunks, &buffer, sentences);
            max_flushed = buffer.last().copied();
            buffer = retain_overlap(&buffer, config.overlap_sentences);
        }
        buffer.push(idx);
    }

    // a final flush that would only repeat already-emitted overlap is skipped
    let has_fresh = buffer
        .iter()
        .any(|&idx| max_flushed.map_or(true, |m| idx > m));
    if has_fresh {
        flush_chunk(&mut chunks, &buffer, sentences);
    }

    chunks
}

fn joined_len(buffer: &[usize], sentences: &[Sentence]) -> usize {
    if buffer.is_empty() {
        return 0;
    }
    let text_len: usize = buffer.iter().map(|&idx| sentences[idx].text.len()).sum();
    text_len + buffer.len() - 1
}

fn flush_chunk(chunks: &mut Vec<Chunk>, buffer: &[usize], sentences: &[Sentence]) {
    if buffer.is_empty() {
        return;
    }
    let mut text = String::new();
    for (i, &idx) in buffer.iter().enumerate() {
        if i > 0 {
            text.push(' ');
        }
        text.push_str(&sentences[idx].text);
    }
    let first = buffer[0];
    chunks.push(Chunk {
        id: chunks.len(),
        text,
        source_offset: sentences[first].offset,
    });
}

fn retain_overlap(buffer: &[usize], overlap: usize) -> Vec<usize> {
    // keeping the whole buffer would stall chunking, so overlap is capped one
    // short of the buffer length
    let keep = overlap.min(buffer.len().saturating_sub(1));
    if keep == 0 {
        return Vec::new();
    }
    buffer[buffer.len() - keep..].to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(target: usize, overlap: usize) -> IngestConfig {
        IngestConfig {
            chunk_target_chars: target,
            overlap_sentences: overlap,
        }
    }

    #[test]
    fn cleans_control_characters_and_whitespace() {
        let cleaned = clean_text("Dose:\u{00a0}20 mL/kg\n\n  bolus\u{0007} (rapid).");
        assert_eq!(cleaned, "Dose: 20 mL/kg bolus (rapid).");
    }

    #[test]
    fn splits_sentences_with_offsets() {
        let text = "First fact here. Second fact follows! Third?";
        let sentences = split_sentences(text);
        assert_eq!(sentences.len(), 3);
        assert_eq!(sentences[0].text, "First fact here.");
        assert_eq!(sentences[1].offset, text.find("Second").unwrap());
        assert_eq!(sentences[2].text, "Third?");
    }

    #[test]
    fn decimal_points_do_not_split_sentences() {
        let sentences = split_sentences("Give 0.9% saline at 52.1 mL per hour. Reassess hourly.");
        assert_eq!(sentences.len(), 2);
        assert!(sentences[0].text.contains("52.1"));
    }

    #[test]
    fn chunks_respect_target_and_overlap() {
        let mut raw = String::new();
        for i in 0..12 {
            raw.push_str(&format!("Fact number {} about paediatric care. ", i));
        }
        let doc = build_document(&raw, 0, &config(120, 1)).expect("ingest");

        assert!(doc.chunks.len() > 1);
        for chunk in &doc.chunks {
            // one sentence may straddle the boundary, never more
            assert!(chunk.text.len() <= 120 + 40, "oversized chunk: {}", chunk.text);
        }
        for pair in doc.chunks.windows(2) {
            let prev = &pair[0].text;
            let tail = match prev[..prev.len() - 1].rfind(". ") {
                Some(i) => &prev[i + 2..],
                None => prev.as_str(),
            };
            assert!(
                pair[1].text.starts_with(tail),
                "chunk {:?} does not repeat tail {:?}",
                pair[1].text,
                tail
            );
        }
    }

    #[test]
    fn chunk_offsets_are_monotonic_and_ids_sequential() {
        let mut raw = String::new();
        for i in 0..20 {
            raw.push_str(&format!("Sentence {} covers a separate topic entirely. ", i));
        }
        let doc = build_document(&raw, 7, &config(90, 1)).expect("ingest");
        assert_eq!(doc.source_checksum, 7);
        for (i, chunk) in doc.chunks.iter().enumerate() {
            assert_eq!(chunk.id, i);
        }
        for pair in doc.chunks.windows(2) {
            assert!(pair[0].source_offset < pair[1].source_offset);
        }
    }

    #[test]
    fn whitespace_only_input_is_no_text() {
        match build_document("  \n\t ", 0, &IngestConfig::default()) {
            Err(IngestError::NoText) => {}
            other => panic!("expected NoText, got {other:?}"),
        }
    }

    #[test]
    fn missing_file_is_unreadable() {
        let ingestor = Ingestor::new(IngestConfig::default());
        match ingestor.ingest(Path::new("/definitely/not/here.pdf")) {
            Err(IngestError::Unreadable { path, .. }) => {
                assert!(path.ends_with("here.pdf"));
            }
            other => panic!("expected Unreadable, got {other:?}"),
        }
    }
}
