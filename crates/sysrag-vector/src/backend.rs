//! Dense vector index backend on LanceDB.
//!
//! Generation `n` of index `name` is the table `{name}__g{n}`; the active
//! generation of every index is a row of the [`PointerTable`].
//! Chunks are embedded at build time with the backend's embedder and the
//! query is embedded with the same model, so scores are `1 - cosine distance`.
use anyhow::{anyhow, bail, ensure, Context, Result};
use arrow_array::{Array, FixedSizeListArray, Int64Array, RecordBatch, RecordBatchIterator, StringArray};
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase, Select};
use lancedb::{Connection, DistanceType, Table};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::runtime::Runtime;

use sysrag_core::ranking::top_k;
use sysrag_core::traits::{CancelToken, Embedder, IndexBackend, IndexReader};
use sysrag_core::types::{Chunk, SearchHit, SourceKind};

use crate::schema::build_chunk_schema;
use crate::table::{ensure_table, open_db, table_exists, PointerTable};

const DEFAULT_BATCH_SIZE: usize = 256;

pub struct LanceBackend {
	rt: Arc<Runtime>,
	db: Connection,
	db_path: PathBuf,
	embedder: Arc<dyn Embedder>,
	pointers: PointerTable,
	batch_size: usize,
}

impl LanceBackend {
	/// Opens (or creates) the database directory. Must not be called from
	/// inside an async runtime: the backend drives its own.
	pub fn open(db_path: impl Into<PathBuf>, embedder: Arc<dyn Embedder>) -> Result<Self> {
		let db_path = db_path.into();
		fs::create_dir_all(&db_path).with_context(|| format!("creating {}", db_path.display()))?;
		let rt = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
		let db = rt.block_on(open_db(db_path.to_string_lossy().as_ref()))?;
		Ok(Self { rt: Arc::new(rt), db, db_path, embedder, pointers: PointerTable::default(), batch_size: DEFAULT_BATCH_SIZE })
	}

	pub fn with_batch_size(mut self, batch_size: usize) -> Self {
		self.batch_size = batch_size.max(1);
		self
	}

	pub fn table_name(name: &str, generation: u64) -> String {
		format!("{name}__g{generation}")
	}

	fn table_dir(&self, table: &str) -> PathBuf {
		self.db_path.join(format!("{table}.lance"))
	}

	fn reader(&self, table: Table, rows: usize) -> Arc<dyn IndexReader> {
		Arc::new(LanceReader { rt: self.rt.clone(), table, embedder: self.embedder.clone(), rows })
	}
}

impl IndexBackend for LanceBackend {
	fn build(&self, name: &str, generation: u64, chunks: &[Chunk], cancel: &CancelToken) -> Result<Arc<dyn IndexReader>> {
		let table_name = Self::table_name(name, generation);
		let dir = self.table_dir(&table_name);
		// Leftover of an interrupted build.
		if dir.exists() { fs::remove_dir_all(&dir)?; }

		let dim = i32::try_from(self.embedder.dim())?;
		let schema = build_chunk_schema(dim);
		let table = self.rt.block_on(async {
			ensure_table(&self.db, &table_name, schema.clone()).await?;
			let table = self.db.open_table(&table_name).execute().await?;
			for (i, batch) in chunks.chunks(self.batch_size).enumerate() {
				if cancel.is_cancelled() { bail!("build of '{name}' cancelled at batch {i}"); }
				let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
				let vectors = self.embedder.embed_batch(&texts)?;
				ensure!(vectors.len() == batch.len(), "embedder returned {} vectors for {} chunks", vectors.len(), batch.len());
				let rb = chunks_to_record_batch(batch, &vectors, dim)?;
				let reader = Box::new(RecordBatchIterator::new(vec![Ok(rb)].into_iter(), schema.clone()));
				table.add(reader).execute().await?;
			}
			Ok::<_, anyhow::Error>(table)
		})?;
		if cancel.is_cancelled() { bail!("build of '{name}' cancelled"); }
		tracing::debug!(index = name, generation, table = %table_name, rows = chunks.len(), "lance generation written");
		Ok(self.reader(table, chunks.len()))
	}

	fn activate(&self, name: &str, generation: u64) -> Result<()> {
		let table_name = Self::table_name(name, generation);
		self.rt.block_on(async {
			if !table_exists(&self.db, &table_name).await? { bail!("table {table_name} does not exist"); }
			self.pointers.write(&self.db, name, generation).await
		})
	}

	fn open_active(&self, name: &str) -> Result<Option<(u64, Arc<dyn IndexReader>)>> {
		let opened = self.rt.block_on(async {
			let Some(generation) = self.pointers.read(&self.db, name).await? else { return Ok(None) };
			let table = self.db.open_table(Self::table_name(name, generation)).execute().await?;
			let rows = count_rows(&table).await?;
			Ok::<_, anyhow::Error>(Some((generation, table, rows)))
		})?;
		Ok(opened.map(|(generation, table, rows)| (generation, self.reader(table, rows))))
	}

	fn discard(&self, name: &str, generation: u64) -> Result<()> {
		let dir = self.table_dir(&Self::table_name(name, generation));
		if dir.exists() { fs::remove_dir_all(&dir).with_context(|| format!("removing {}", dir.display()))?; }
		Ok(())
	}

	fn index_names(&self) -> Result<Vec<String>> {
		self.rt.block_on(self.pointers.names(&self.db))
	}
}

fn chunks_to_record_batch(chunks: &[Chunk], vectors: &[Vec<f32>], dim: i32) -> Result<RecordBatch> {
	let mut ids = Vec::new(); let mut doc_ids = Vec::new(); let mut urls = Vec::new(); let mut titles = Vec::new();
	let mut texts = Vec::new(); let mut seqs = Vec::new(); let mut hashes = Vec::new(); let mut metas = Vec::new();
	let mut vecs: Vec<Option<Vec<Option<f32>>>> = Vec::new();
	for (c, v) in chunks.iter().zip(vectors) {
		ensure!(v.len() == dim as usize, "vector for {} has {} dims, expected {dim}", c.id, v.len());
		ids.push(c.id.clone()); doc_ids.push(c.doc_id.clone()); urls.push(c.source_url.clone()); titles.push(c.title.clone());
		texts.push(c.text.clone()); seqs.push(c.sequence_index as i64);
		hashes.push(blake3::hash(c.text.as_bytes()).to_hex().to_string());
		metas.push(serde_json::to_string(&c.meta)?);
		vecs.push(Some(v.iter().map(|&x| Some(x)).collect()));
	}
	let record_batch = RecordBatch::try_new(build_chunk_schema(dim), vec![
		Arc::new(StringArray::from(ids)),
		Arc::new(StringArray::from(doc_ids)),
		Arc::new(StringArray::from(urls)),
		Arc::new(StringArray::from(titles)),
		Arc::new(StringArray::from(texts)),
		Arc::new(Int64Array::from(seqs)),
		Arc::new(StringArray::from(hashes)),
		Arc::new(StringArray::from(metas)),
		Arc::new(FixedSizeListArray::from_iter_primitive::<arrow_array::types::Float32Type, _, _>(vecs.into_iter(), dim)),
	])?;
	Ok(record_batch)
}

async fn count_rows(table: &Table) -> Result<usize> {
	let mut rows = 0usize;
	let mut stream = table.query().select(Select::columns(&["id"])).execute().await?;
	while let Some(batch) = stream.try_next().await? { rows += batch.num_rows(); }
	Ok(rows)
}

fn column<'a, T: Array + 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T> {
	batch
		.column_by_name(name)
		.and_then(|c| c.as_any().downcast_ref::<T>())
		.ok_or_else(|| anyhow!("column '{name}' missing or mistyped"))
}

/// One activated generation, searched by query embedding.
pub struct LanceReader {
	rt: Arc<Runtime>,
	table: Table,
	embedder: Arc<dyn Embedder>,
	rows: usize,
}

impl IndexReader for LanceReader {
	fn search(&self, query: &str, k: usize) -> Result<Vec<SearchHit>> {
		if k == 0 || self.rows == 0 { return Ok(Vec::new()); }
		let q = self
			.embedder
			.embed_batch(&[query.to_string()])?
			.pop()
			.ok_or_else(|| anyhow!("embedder returned no vector for the query"))?;
		// Equal vectors tie; top_k widens the limit until that tie is whole.
		top_k(k, |limit| self.rt.block_on(async {
			let mut stream = self
				.table
				.vector_search(q.clone())?
				.distance_type(DistanceType::Cosine)
				.limit(limit.min(self.rows))
				.execute()
				.await?;
			let mut hits = Vec::new();
			while let Some(batch) = stream.try_next().await? {
				let ids = column::<StringArray>(&batch, "id")?;
				let doc_ids = column::<StringArray>(&batch, "doc_id")?;
				let urls = column::<StringArray>(&batch, "source_url")?;
				let titles = column::<StringArray>(&batch, "title")?;
				let texts = column::<StringArray>(&batch, "text")?;
				let seqs = column::<Int64Array>(&batch, "seq")?;
				let distances = column::<arrow_array::Float32Array>(&batch, "_distance")?;
				for i in 0..batch.num_rows() {
					hits.push(SearchHit {
						chunk_id: ids.value(i).to_string(),
						doc_id: doc_ids.value(i).to_string(),
						sequence_index: seqs.value(i).max(0) as usize,
						title: titles.value(i).to_string(),
						source_url: urls.value(i).to_string(),
						text: texts.value(i).to_string(),
						score: 1.0 - distances.value(i),
						source: SourceKind::Vector,
					});
				}
			}
			Ok::<_, anyhow::Error>(hits)
		}))
	}

	fn num_chunks(&self) -> usize {
		self.rows
	}
}
