//! In-process lexical backend. Nothing is persisted, so `open_active`
//! only sees generations activated by this same instance.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use anyhow::anyhow;

use crate::ranking::cut;
use crate::tokens::terms;
use crate::traits::{CancelToken, IndexBackend, IndexReader};
use crate::types::{Chunk, SearchHit, SourceKind};

#[derive(Default)]
pub struct MemoryBackend {
    generations: Mutex<HashMap<(String, u64), Arc<MemoryIndex>>>,
    active: Mutex<HashMap<String, u64>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generations currently held for `name`, ascending.
    pub fn generations(&self, name: &str) -> Vec<u64> {
        let guard = match self.generations.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut gens: Vec<u64> = guard.keys().filter(|(n, _)| n == name).map(|(_, g)| *g).collect();
        gens.sort_unstable();
        gens
    }
}

pub struct MemoryIndex {
    entries: Vec<(Chunk, BTreeSet<String>)>,
}

impl MemoryIndex {
    fn new(chunks: &[Chunk]) -> Self {
        let entries = chunks
            .iter()
            .map(|c| {
                let mut t = terms(&c.text);
                t.extend(terms(&c.title));
                (c.clone(), t)
            })
            .collect();
        Self { entries }
    }
}

impl IndexReader for MemoryIndex {
    /// Score is the fraction of query terms present in the chunk. Chunks
    /// sharing no term are not returned.
    fn search(&self, query: &str, k: usize) -> anyhow::Result<Vec<SearchHit>> {
        let wanted = terms(query);
        if wanted.is_empty() {
            return Ok(Vec::new());
        }
        let hits: Vec<SearchHit> = self
            .entries
            .iter()
            .filter_map(|(chunk, chunk_terms)| {
                let shared = wanted.iter().filter(|t| chunk_terms.contains(*t)).count();
                (shared > 0).then(|| SearchHit {
                    chunk_id: chunk.id.clone(),
                    doc_id: chunk.doc_id.clone(),
                    sequence_index: chunk.sequence_index,
                    title: chunk.title.clone(),
                    source_url: chunk.source_url.clone(),
                    text: chunk.text.clone(),
                    score: shared as f32 / wanted.len() as f32,
                    source: SourceKind::Memory,
                })
            })
            .collect();
        Ok(cut(hits, k))
    }

    fn num_chunks(&self) -> usize {
        self.entries.len()
    }
}

impl IndexBackend for MemoryBackend {
    fn build(
        &self,
        name: &str,
        generation: u64,
        chunks: &[Chunk],
        cancel: &CancelToken,
    ) -> anyhow::Result<Arc<dyn IndexReader>> {
        if cancel.is_cancelled() {
            return Err(anyhow!("cancelled"));
        }
        let index = Arc::new(MemoryIndex::new(chunks));
        if cancel.is_cancelled() {
            return Err(anyhow!("cancelled"));
        }
        self.generations
            .lock()
            .map_err(|_| anyhow!("memory backend lock poisoned"))?
            .insert((name.to_string(), generation), index.clone());
        Ok(index)
    }

    fn activate(&self, name: &str, generation: u64) -> anyhow::Result<()> {
        let known = self
            .generations
            .lock()
            .map_err(|_| anyhow!("memory backend lock poisoned"))?
            .contains_key(&(name.to_string(), generation));
        if !known {
            return Err(anyhow!("generation {generation} of '{name}' was never built"));
        }
        self.active
            .lock()
            .map_err(|_| anyhow!("memory backend lock poisoned"))?
            .insert(name.to_string(), generation);
        Ok(())
    }

    fn open_active(&self, name: &str) -> anyhow::Result<Option<(u64, Arc<dyn IndexReader>)>> {
        let active = self.active.lock().map_err(|_| anyhow!("memory backend lock poisoned"))?;
        let Some(&generation) = active.get(name) else {
            return Ok(None);
        };
        let generations = self.generations.lock().map_err(|_| anyhow!("memory backend lock poisoned"))?;
        Ok(generations
            .get(&(name.to_string(), generation))
            .map(|index| (generation, index.clone() as Arc<dyn IndexReader>)))
    }

    fn discard(&self, name: &str, generation: u64) -> anyhow::Result<()> {
        self.generations
            .lock()
            .map_err(|_| anyhow!("memory backend lock poisoned"))?
            .remove(&(name.to_string(), generation));
        Ok(())
    }

    fn index_names(&self) -> anyhow::Result<Vec<String>> {
        let active = self.active.lock().map_err(|_| anyhow!("memory backend lock poisoned"))?;
        Ok(active.keys().cloned().collect())
    }
}
