//! Whitespace token model shared by the chunker and the compression stages.
//!
//! A token is a maximal run of non-whitespace characters, cut every
//! [`MAX_TOKEN_CHARS`] characters so that pathological runs (base64 blobs,
//! minified code) still count against the budget.

use std::collections::BTreeSet;

pub const MAX_TOKEN_CHARS: usize = 32;

/// Byte range of one token in its source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenSpan {
    pub start: usize,
    pub end: usize,
}

/// Strength of a split point between two adjacent tokens, weakest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BoundaryKind {
    Hard,
    Whitespace,
    Sentence,
    Paragraph,
}

impl BoundaryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hard => "hard",
            Self::Whitespace => "whitespace",
            Self::Sentence => "sentence",
            Self::Paragraph => "paragraph",
        }
    }
}

pub fn token_spans(text: &str) -> Vec<TokenSpan> {
    let mut spans = Vec::new();
    let mut run: Option<(usize, usize)> = None;
    for (i, c) in text.char_indices() {
        if c.is_whitespace() {
            if let Some((start, _)) = run.take() {
                spans.push(TokenSpan { start, end: i });
            }
            continue;
        }
        run = match run {
            None => Some((i, 1)),
            Some((start, MAX_TOKEN_CHARS)) => {
                spans.push(TokenSpan { start, end: i });
                Some((i, 1))
            }
            Some((start, chars)) => Some((start, chars + 1)),
        };
    }
    if let Some((start, _)) = run {
        spans.push(TokenSpan { start, end: text.len() });
    }
    spans
}

pub fn count_tokens(text: &str) -> usize {
    token_spans(text).len()
}

/// The prefix of `text` holding at most `max` tokens, without trailing whitespace.
pub fn truncate_to_tokens(text: &str, max: usize) -> &str {
    if max == 0 {
        return "";
    }
    match token_spans(text).get(max - 1) {
        Some(last) => &text[..last.end],
        None => text.trim_end(),
    }
}

/// Kind of the boundary between token `left` and the token starting at `next_start`.
pub fn classify_boundary(text: &str, left: TokenSpan, next_start: usize) -> BoundaryKind {
    let gap = &text[left.end..next_start];
    if gap.is_empty() {
        return BoundaryKind::Hard;
    }
    match gap.matches('\n').count() {
        0 if ends_sentence(&text[left.start..left.end]) => BoundaryKind::Sentence,
        0 => BoundaryKind::Whitespace,
        1 => BoundaryKind::Sentence,
        _ => BoundaryKind::Paragraph,
    }
}

fn ends_sentence(token: &str) -> bool {
    let trimmed = token.trim_end_matches(&['"', '\'', ')', ']', '»', '”', '’'][..]);
    trimmed.ends_with(&['.', '!', '?', '…'][..])
}

/// Splits `text` into sentences (or lines), trimmed, in order.
pub fn sentences(text: &str) -> Vec<&str> {
    let spans = token_spans(text);
    let mut out = Vec::new();
    let mut first = 0;
    for i in 0..spans.len() {
        let closes = match spans.get(i + 1) {
            Some(next) => classify_boundary(text, spans[i], next.start) >= BoundaryKind::Sentence,
            None => true,
        };
        if closes {
            out.push(&text[spans[first].start..spans[i].end]);
            first = i + 1;
        }
    }
    out
}

/// Lowercased alphanumeric words of at least three characters.
pub fn terms(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= 3)
        .map(str::to_lowercase)
        .collect()
}
