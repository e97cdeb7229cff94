use serde::Serialize;
use sysrag_core::types::Candidate;

use crate::orchestrator::RetrievedContext;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Source {
    pub title: String,
    pub url: String,
    pub relevance_score: f32,
}

/// Formats candidates as numbered `[Document i - title]` blocks separated by blank lines.
pub fn render_context(candidates: &[Candidate]) -> String {
    candidates
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let title = if c.title.is_empty() { "No title" } else { c.title.as_str() };
            format!("[Document {} - {}]\n{}", i + 1, title, c.text)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

impl RetrievedContext {
    pub fn render(&self) -> String {
        render_context(&self.candidates)
    }

    pub fn sources(&self) -> Vec<Source> {
        self.candidates
            .iter()
            .map(|c| Source { title: c.title.clone(), url: c.source_url.clone(), relevance_score: c.retrieval_score })
            .collect()
    }
}
