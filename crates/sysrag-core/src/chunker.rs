//! Boundary-respecting, overlapping document chunker.
//!
//! Chunks are cut on the strongest boundary available near the token budget
//! (paragraph, then sentence, then whitespace, then a hard cut) and each
//! chunk after the first re-reads the last `chunk_overlap` tokens of its
//! predecessor.

use serde_json::Value;

use crate::error::Result;
use crate::tokens::{classify_boundary, token_spans, BoundaryKind, TokenSpan};
use crate::types::{Chunk, ChunkingConfig, Document};

#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    config: ChunkingConfig,
}

/// Token range of one chunk before it is materialized.
struct Piece {
    first: usize,
    end: usize,
    boundary: &'static str,
    overlap_tokens: usize,
}

impl Chunker {
    pub fn new(config: ChunkingConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> ChunkingConfig {
        self.config
    }

    /// Splits one document. Pure: the same input always yields the same chunks.
    pub fn split(&self, document: &Document) -> Vec<Chunk> {
        let text = document.text.as_str();
        let spans = token_spans(text);
        let n = spans.len();
        if n == 0 {
            return Vec::new();
        }
        if n <= self.config.chunk_size {
            let piece = Piece { first: 0, end: n, boundary: "end", overlap_tokens: 0 };
            return vec![self.materialize(document, 0, 1, &piece, 0, text.len())];
        }

        let mut pieces = Vec::new();
        let mut start = 0;
        let mut overlap_tokens = 0;
        loop {
            let hard_end = (start + self.config.chunk_size).min(n);
            let (end, boundary) = if hard_end == n {
                (n, "end")
            } else {
                let (end, kind) = self.pick_end(text, &spans, start, hard_end);
                (end, kind.as_str())
            };
            pieces.push(Piece { first: start, end, boundary, overlap_tokens });
            if end == n {
                break;
            }
            start = end - self.config.chunk_overlap;
            overlap_tokens = self.config.chunk_overlap;
        }

        let total = pieces.len();
        pieces
            .iter()
            .enumerate()
            .map(|(seq, piece)| {
                let start_byte = spans[piece.first].start;
                let end_byte = spans[piece.end - 1].end;
                self.materialize(document, seq, total, piece, start_byte, end_byte)
            })
            .collect()
    }

    /// Latest, strongest boundary in `[floor, hard_end]`. The floor keeps
    /// chunks from collapsing and guarantees progress past the overlap.
    fn pick_end(&self, text: &str, spans: &[TokenSpan], start: usize, hard_end: usize) -> (usize, BoundaryKind) {
        let min_len = (self.config.chunk_overlap + 1).max(self.config.chunk_size / 2);
        let floor = (start + min_len).min(hard_end);
        let mut best: Option<(usize, BoundaryKind)> = None;
        for end in (floor..=hard_end).rev() {
            let kind = classify_boundary(text, spans[end - 1], spans[end].start);
            if best.map_or(true, |(_, k)| kind > k) {
                best = Some((end, kind));
                if kind == BoundaryKind::Paragraph {
                    break;
                }
            }
        }
        best.unwrap_or((hard_end, BoundaryKind::Hard))
    }

    fn materialize(
        &self,
        document: &Document,
        seq: usize,
        total: usize,
        piece: &Piece,
        start: usize,
        end: usize,
    ) -> Chunk {
        let mut meta = document.meta.clone();
        meta.insert("chunk_index".into(), Value::from(seq));
        meta.insert("total_chunks".into(), Value::from(total));
        meta.insert("token_count".into(), Value::from(piece.end - piece.first));
        meta.insert("overlap_tokens".into(), Value::from(piece.overlap_tokens));
        meta.insert("boundary".into(), Value::from(piece.boundary));
        Chunk {
            id: format!("{}:{}", document.id, seq),
            doc_id: document.id.clone(),
            source_url: document.source_url.clone(),
            title: document.title.clone(),
            text: document.text[start..end].to_string(),
            start,
            end,
            sequence_index: seq,
            meta,
        }
    }
}

/// Validates the parameters and splits `document`.
pub fn split(document: &Document, chunk_size: usize, chunk_overlap: usize) -> Result<Vec<Chunk>> {
    let chunker = Chunker::new(ChunkingConfig { chunk_size, chunk_overlap })?;
    Ok(chunker.split(document))
}
