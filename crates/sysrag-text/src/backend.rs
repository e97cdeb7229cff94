//! Tantivy index backend.
//!
//! On disk every generation lives in `<root>/<name>/gen-<n>/`; the active
//! one is named by `<root>/<name>/ACTIVE`, replaced atomically via rename.
//! In RAM the generations are kept in a map and die with the process.
use anyhow::{anyhow, bail, Context, Result};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tantivy::collector::TopDocs;
use tantivy::query::QueryParser;
use tantivy::schema::Value;
use tantivy::{doc, Index, TantivyDocument};

use sysrag_core::ranking::top_k;
use sysrag_core::traits::{CancelToken, IndexBackend, IndexReader};
use sysrag_core::types::{Chunk, SearchHit, SourceKind};

use crate::tantivy_utils::{build_schema, register_tokenizer, Fields};

const WRITER_HEAP_BYTES: usize = 50_000_000;
const CANCEL_CHECK_EVERY: usize = 1000;
const ACTIVE_FILE: &str = "ACTIVE";

enum Storage {
	Disk(PathBuf),
	Ram(Mutex<RamState>),
}

#[derive(Default)]
struct RamState {
	generations: HashMap<(String, u64), Index>,
	active: HashMap<String, u64>,
}

pub struct TantivyBackend {
	storage: Storage,
}

impl TantivyBackend {
	pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
		let root = root.into();
		fs::create_dir_all(&root).with_context(|| format!("creating index root {}", root.display()))?;
		Ok(Self { storage: Storage::Disk(root) })
	}

	pub fn in_ram() -> Self {
		Self { storage: Storage::Ram(Mutex::new(RamState::default())) }
	}

	/// Directory of one generation; `None` for RAM indexes.
	pub fn generation_dir(&self, name: &str, generation: u64) -> Option<PathBuf> {
		match &self.storage {
			Storage::Disk(root) => Some(gen_dir(root, name, generation)),
			Storage::Ram(_) => None,
		}
	}

	fn ram(state: &Mutex<RamState>) -> Result<std::sync::MutexGuard<'_, RamState>> {
		state.lock().map_err(|_| anyhow!("tantivy ram state poisoned"))
	}
}

impl IndexBackend for TantivyBackend {
	fn build(&self, name: &str, generation: u64, chunks: &[Chunk], cancel: &CancelToken) -> Result<Arc<dyn IndexReader>> {
		let schema = build_schema();
		let index = match &self.storage {
			Storage::Disk(root) => {
				let dir = gen_dir(root, name, generation);
				if dir.exists() { fs::remove_dir_all(&dir)?; }
				fs::create_dir_all(&dir)?;
				Index::create_in_dir(&dir, schema)?
			}
			Storage::Ram(_) => Index::create_in_ram(schema),
		};
		register_tokenizer(&index);
		let fields = Fields::resolve(&index.schema())?;

		let mut index_writer = index.writer(WRITER_HEAP_BYTES)?;
		for (i, c) in chunks.iter().enumerate() {
			if i % CANCEL_CHECK_EVERY == 0 && cancel.is_cancelled() { bail!("build of '{name}' cancelled after {i} chunks"); }
			index_writer.add_document(doc!(
				fields.id => c.id.clone(),
				fields.doc_id => c.doc_id.clone(),
				fields.source_url => c.source_url.clone(),
				fields.title => c.title.clone(),
				fields.text => c.text.clone(),
				fields.seq => c.sequence_index as u64,
				fields.meta => serde_json::to_string(&c.meta)?,
			))?;
		}
		if cancel.is_cancelled() { bail!("build of '{name}' cancelled before commit"); }
		index_writer.commit()?;
		index_writer.wait_merging_threads()?;
		tracing::debug!(index = name, generation, docs = chunks.len(), "tantivy generation committed");

		if let Storage::Ram(state) = &self.storage {
			Self::ram(state)?.generations.insert((name.to_string(), generation), index.clone());
		}
		Ok(Arc::new(TantivyReader::new(index)?))
	}

	fn activate(&self, name: &str, generation: u64) -> Result<()> {
		match &self.storage {
			Storage::Disk(root) => {
				let dir = gen_dir(root, name, generation);
				if !dir.is_dir() { bail!("generation {generation} of '{name}' does not exist"); }
				write_active(&root.join(name), generation)
			}
			Storage::Ram(state) => {
				let mut state = Self::ram(state)?;
				if !state.generations.contains_key(&(name.to_string(), generation)) {
					bail!("generation {generation} of '{name}' does not exist");
				}
				state.active.insert(name.to_string(), generation);
				Ok(())
			}
		}
	}

	fn open_active(&self, name: &str) -> Result<Option<(u64, Arc<dyn IndexReader>)>> {
		match &self.storage {
			Storage::Disk(root) => {
				let Some(generation) = read_active(&root.join(name))? else { return Ok(None) };
				let dir = gen_dir(root, name, generation);
				let index = Index::open_in_dir(&dir).with_context(|| format!("opening {}", dir.display()))?;
				register_tokenizer(&index);
				Ok(Some((generation, Arc::new(TantivyReader::new(index)?))))
			}
			Storage::Ram(state) => {
				let state = Self::ram(state)?;
				let Some(&generation) = state.active.get(name) else { return Ok(None) };
				match state.generations.get(&(name.to_string(), generation)) {
					Some(index) => Ok(Some((generation, Arc::new(TantivyReader::new(index.clone())?)))),
					None => Ok(None),
				}
			}
		}
	}

	fn discard(&self, name: &str, generation: u64) -> Result<()> {
		match &self.storage {
			Storage::Disk(root) => {
				let dir = gen_dir(root, name, generation);
				if dir.exists() { fs::remove_dir_all(&dir).with_context(|| format!("removing {}", dir.display()))?; }
				Ok(())
			}
			Storage::Ram(state) => {
				Self::ram(state)?.generations.remove(&(name.to_string(), generation));
				Ok(())
			}
		}
	}

	fn index_names(&self) -> Result<Vec<String>> {
		match &self.storage {
			Storage::Disk(root) => {
				let mut names = Vec::new();
				for entry in fs::read_dir(root).with_context(|| format!("listing {}", root.display()))? {
					let entry = entry?;
					if !entry.path().join(ACTIVE_FILE).is_file() { continue; }
					if let Some(name) = entry.file_name().to_str() { names.push(name.to_string()); }
				}
				Ok(names)
			}
			Storage::Ram(state) => Ok(Self::ram(state)?.active.keys().cloned().collect()),
		}
	}
}

fn gen_dir(root: &Path, name: &str, generation: u64) -> PathBuf {
	root.join(name).join(format!("gen-{generation}"))
}

fn write_active(index_root: &Path, generation: u64) -> Result<()> {
	let tmp = index_root.join(format!("{ACTIVE_FILE}.tmp"));
	fs::write(&tmp, generation.to_string())?;
	fs::rename(&tmp, index_root.join(ACTIVE_FILE))?;
	Ok(())
}

fn read_active(index_root: &Path) -> Result<Option<u64>> {
	let path = index_root.join(ACTIVE_FILE);
	if !path.exists() { return Ok(None); }
	let raw = fs::read_to_string(&path)?;
	let generation = raw.trim().parse().with_context(|| format!("corrupt pointer {}", path.display()))?;
	Ok(Some(generation))
}

/// A committed generation opened for search.
pub struct TantivyReader {
	index: Index,
	reader: tantivy::IndexReader,
	fields: Fields,
}

impl TantivyReader {
	pub fn new(index: Index) -> Result<Self> {
		let fields = Fields::resolve(&index.schema())?;
		let reader = index.reader()?;
		Ok(Self { index, reader, fields })
	}
}

impl IndexReader for TantivyReader {
	fn search(&self, query: &str, k: usize) -> Result<Vec<SearchHit>> {
		let searcher = self.reader.searcher();
		let qp = QueryParser::for_index(&self.index, vec![self.fields.text, self.fields.title]);
		// Questions carry punctuation the strict parser rejects.
		let (q, _errors) = qp.parse_query_lenient(query);
		let num_docs = (searcher.num_docs() as usize).max(1);
		// TopDocs orders equal scores by doc address; top_k widens the limit
		// until the tie at the k-th slot is fully collected.
		top_k(k, |limit| {
			let top_docs = searcher.search(&q, &TopDocs::with_limit(limit.min(num_docs)))?;
			let mut hits = Vec::with_capacity(top_docs.len());
			for (score, addr) in top_docs {
				let doc: TantivyDocument = searcher.doc(addr)?;
				let text_of = |field: tantivy::schema::Field| doc.get_first(field).and_then(|v| v.as_str()).unwrap_or("").to_string();
				hits.push(SearchHit {
					chunk_id: text_of(self.fields.id),
					doc_id: text_of(self.fields.doc_id),
					sequence_index: doc.get_first(self.fields.seq).and_then(|v| v.as_u64()).unwrap_or(0) as usize,
					title: text_of(self.fields.title),
					source_url: text_of(self.fields.source_url),
					text: text_of(self.fields.text),
					score,
					source: SourceKind::Text,
				});
			}
			Ok(hits)
		})
	}

	fn num_chunks(&self) -> usize {
		self.reader.searcher().num_docs() as usize
	}
}
