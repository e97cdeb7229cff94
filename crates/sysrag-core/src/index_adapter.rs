//! Named, generation-swapped indexes over a pluggable [`IndexBackend`].
//!
//! A build writes a fresh generation and swaps it in only on success, so a
//! failed or cancelled build leaves the previous generation searchable.
//! While a build runs, searches on that name fail with
//! [`Error::IndexBuildInProgress`] instead of reading a half-swapped index.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use crate::error::{Error, Result};
use crate::ranking::hit_order;
use crate::traits::{CancelToken, IndexBackend, IndexReader};
use crate::types::{Candidate, Chunk, SearchHit};

#[derive(Debug, Clone)]
pub struct BuildResult {
    pub index_name: String,
    pub generation: u64,
    pub chunk_count: usize,
    /// Whether an earlier generation was replaced.
    pub replaced: bool,
    pub elapsed: Duration,
}

#[derive(Default)]
struct Slot {
    active: Option<(u64, Arc<dyn IndexReader>)>,
    building: bool,
}

pub struct IndexAdapter {
    backend: Arc<dyn IndexBackend>,
    slots: RwLock<HashMap<String, Slot>>,
}

/// Clears the building flag when the build returns or unwinds.
struct BuildGuard<'a> {
    adapter: &'a IndexAdapter,
    name: &'a str,
}

impl Drop for BuildGuard<'_> {
    fn drop(&mut self) {
        if let Some(slot) = self.adapter.write_slots().get_mut(self.name) {
            slot.building = false;
        }
    }
}

impl IndexAdapter {
    pub fn new(backend: Arc<dyn IndexBackend>) -> Self {
        Self { backend, slots: RwLock::new(HashMap::new()) }
    }

    pub fn build(&self, chunks: &[Chunk], index_name: &str, rebuild: bool) -> Result<BuildResult> {
        self.build_with_cancel(chunks, index_name, rebuild, &CancelToken::new())
    }

    pub fn build_with_cancel(
        &self,
        chunks: &[Chunk],
        index_name: &str,
        rebuild: bool,
        cancel: &CancelToken,
    ) -> Result<BuildResult> {
        validate_index_name(index_name)?;
        self.ensure_loaded(index_name)?;

        let (generation, replaced) = {
            let mut slots = self.write_slots();
            let slot = slots.entry(index_name.to_string()).or_default();
            if slot.building {
                return Err(Error::IndexBuildInProgress(index_name.to_string()));
            }
            if slot.active.is_some() && !rebuild {
                return Err(Error::IndexExists(index_name.to_string()));
            }
            slot.building = true;
            let next = slot.active.as_ref().map_or(1, |(g, _)| g + 1);
            (next, slot.active.is_some())
        };
        let _guard = BuildGuard { adapter: self, name: index_name };

        let started = Instant::now();
        tracing::info!(index = index_name, generation, chunks = chunks.len(), "building index");

        let reader = match self.backend.build(index_name, generation, chunks, cancel) {
            Ok(reader) if !cancel.is_cancelled() => reader,
            Ok(_) => {
                self.discard_quietly(index_name, generation);
                return Err(Error::BuildCancelled(index_name.to_string()));
            }
            Err(err) => {
                self.discard_quietly(index_name, generation);
                if cancel.is_cancelled() {
                    return Err(Error::BuildCancelled(index_name.to_string()));
                }
                return Err(Error::Backend(err.context(format!("building index '{index_name}'"))));
            }
        };

        if let Err(err) = self.backend.activate(index_name, generation) {
            self.discard_quietly(index_name, generation);
            return Err(Error::Backend(err.context(format!("activating index '{index_name}'"))));
        }

        let previous = self
            .write_slots()
            .get_mut(index_name)
            .and_then(|slot| slot.active.replace((generation, reader)))
            .map(|(g, _)| g);
        if let Some(old) = previous {
            self.discard_quietly(index_name, old);
        }

        let elapsed = started.elapsed();
        tracing::info!(index = index_name, generation, ?elapsed, "index active");
        Ok(BuildResult {
            index_name: index_name.to_string(),
            generation,
            chunk_count: chunks.len(),
            replaced,
            elapsed,
        })
    }

    /// Up to `k` candidates from one index, best first.
    pub fn search(&self, index_name: &str, query: &str, k: usize) -> Result<Vec<Candidate>> {
        if k == 0 {
            return Err(Error::config("k must be positive"));
        }
        let reader = self.reader(index_name)?;
        let hits = reader
            .search(query, k)
            .map_err(|e| Error::Backend(e.context(format!("searching index '{index_name}'"))))?;
        Ok(rank(hits, k))
    }

    /// Searches every index in `names` and merges the hits into one ranking.
    /// A chunk id present in several shards is kept once, at its best score.
    pub fn search_shards(&self, names: &[String], query: &str, k: usize) -> Result<Vec<Candidate>> {
        if k == 0 {
            return Err(Error::config("k must be positive"));
        }
        if names.is_empty() {
            return Err(Error::config("no index to search"));
        }
        let mut hits = Vec::new();
        for name in names {
            let reader = self.reader(name)?;
            let found = reader
                .search(query, k)
                .map_err(|e| Error::Backend(e.context(format!("searching index '{name}'"))))?;
            hits.extend(found);
        }
        Ok(rank(hits, k))
    }

    pub fn exists(&self, index_name: &str) -> Result<bool> {
        validate_index_name(index_name)?;
        self.ensure_loaded(index_name)?;
        Ok(self
            .read_slots()
            .get(index_name)
            .map_or(false, |slot| slot.active.is_some()))
    }

    /// Every valid index name the backend holds an active generation for,
    /// sorted.
    pub fn discover(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self
            .backend
            .index_names()
            .map_err(|e| Error::Backend(e.context("listing indexes")))?
            .into_iter()
            .filter(|name| validate_index_name(name).is_ok())
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }

    pub fn is_building(&self, index_name: &str) -> bool {
        self.read_slots().get(index_name).map_or(false, |slot| slot.building)
    }

    pub fn num_chunks(&self, index_name: &str) -> Result<usize> {
        Ok(self.reader(index_name)?.num_chunks())
    }

    fn reader(&self, index_name: &str) -> Result<Arc<dyn IndexReader>> {
        validate_index_name(index_name)?;
        self.ensure_loaded(index_name)?;
        let slots = self.read_slots();
        match slots.get(index_name) {
            Some(slot) if slot.building => Err(Error::IndexBuildInProgress(index_name.to_string())),
            Some(Slot { active: Some((_, reader)), .. }) => Ok(reader.clone()),
            _ => Err(Error::IndexNotFound(index_name.to_string())),
        }
    }

    /// Picks up a generation persisted by an earlier process.
    fn ensure_loaded(&self, index_name: &str) -> Result<()> {
        if self.read_slots().contains_key(index_name) {
            return Ok(());
        }
        let Some((generation, reader)) = self.backend.open_active(index_name)? else {
            return Ok(());
        };
        tracing::debug!(index = index_name, generation, "opened persisted index");
        self.write_slots()
            .entry(index_name.to_string())
            .or_insert_with(|| Slot { active: Some((generation, reader)), building: false });
        Ok(())
    }

    fn discard_quietly(&self, index_name: &str, generation: u64) {
        if let Err(err) = self.backend.discard(index_name, generation) {
            tracing::warn!(index = index_name, generation, error = %err, "failed to discard generation");
        }
    }

    fn read_slots(&self) -> RwLockReadGuard<'_, HashMap<String, Slot>> {
        self.slots.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_slots(&self) -> RwLockWriteGuard<'_, HashMap<String, Slot>> {
        self.slots.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Index names become directory and table names.
pub fn validate_index_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(Error::config(format!("invalid index name '{name}'")))
    }
}

/// Orders by [`hit_order`]. Duplicate chunk ids keep their first (best)
/// occurrence.
fn rank(mut hits: Vec<SearchHit>, k: usize) -> Vec<Candidate> {
    hits.sort_by(hit_order);
    let mut seen = HashSet::new();
    hits.into_iter()
        .filter(|hit| seen.insert(hit.chunk_id.clone()))
        .take(k)
        .map(Candidate::from)
        .collect()
}
