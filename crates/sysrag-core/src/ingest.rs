//! Newline-delimited JSON corpus reader.
//!
//! One document per line. Bad records are skipped and reported; only I/O
//! errors abort the read.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::chunker::Chunker;
use crate::error::{Error, Result};
use crate::types::{Chunk, Document, Meta};

/// A record that was not ingested, with its 1-based line number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedRecord {
    pub source: String,
    pub line: usize,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct IngestReport {
    pub documents: Vec<Document>,
    pub skipped: Vec<SkippedRecord>,
}

#[derive(Deserialize)]
struct Record {
    id: String,
    source_url: String,
    title: String,
    text: String,
    #[serde(default)]
    meta: Option<serde_json::Value>,
}

/// Reads documents from an in-memory or streamed source.
pub fn read_documents<R: BufRead>(reader: R) -> Result<IngestReport> {
    let mut report = IngestReport::default();
    let mut seen = HashSet::new();
    read_into(reader, "-", &mut seen, &mut report)?;
    Ok(report)
}

/// Reads one `.jsonl` file, or every `*.jsonl` file under a directory in path order.
pub fn read_corpus(path: &Path) -> Result<IngestReport> {
    let files = corpus_files(path)?;
    if files.is_empty() {
        tracing::warn!(path = %path.display(), "no .jsonl files found");
    }
    let mut report = IngestReport::default();
    let mut seen = HashSet::new();
    for file in &files {
        let reader = BufReader::new(File::open(file)?);
        read_into(reader, &file.display().to_string(), &mut seen, &mut report)?;
    }
    tracing::info!(
        files = files.len(),
        documents = report.documents.len(),
        skipped = report.skipped.len(),
        "corpus read"
    );
    Ok(report)
}

fn corpus_files(path: &Path) -> Result<Vec<PathBuf>> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }
    if !path.is_dir() {
        return Err(Error::config(format!("corpus path {} does not exist", path.display())));
    }
    let mut files = Vec::new();
    for entry in WalkDir::new(path).sort_by_file_name() {
        let entry = entry.map_err(|e| Error::Backend(e.into()))?;
        let is_jsonl = entry.path().extension().map_or(false, |ext| ext == "jsonl");
        if entry.file_type().is_file() && is_jsonl {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

fn read_into<R: BufRead>(
    reader: R,
    source: &str,
    seen: &mut HashSet<String>,
    report: &mut IngestReport,
) -> Result<()> {
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let outcome = parse_record(&line).and_then(|doc| {
            if seen.insert(doc.id.clone()) {
                Ok(doc)
            } else {
                Err(format!("duplicate document id '{}'", doc.id))
            }
        });
        match outcome {
            Ok(doc) => report.documents.push(doc),
            Err(reason) => {
                tracing::warn!(source, line = idx + 1, %reason, "skipping record");
                report.skipped.push(SkippedRecord { source: source.to_string(), line: idx + 1, reason });
            }
        }
    }
    Ok(())
}

fn parse_record(line: &str) -> std::result::Result<Document, String> {
    let record: Record = serde_json::from_str(line).map_err(|e| e.to_string())?;
    if record.id.trim().is_empty() {
        return Err("empty document id".to_string());
    }
    let meta: Meta = match record.meta {
        None | Some(serde_json::Value::Null) => Meta::new(),
        Some(serde_json::Value::Object(map)) => map.into_iter().collect(),
        Some(_) => return Err("meta must be a JSON object".to_string()),
    };
    Ok(Document {
        id: record.id,
        source_url: record.source_url,
        title: record.title,
        text: record.text,
        meta,
    })
}

/// Chunks documents in parallel; chunks come back in document order.
pub fn chunk_documents(chunker: &Chunker, documents: &[Document]) -> Vec<Chunk> {
    documents
        .par_iter()
        .map(|doc| chunker.split(doc))
        .collect::<Vec<_>>()
        .into_iter()
        .flatten()
        .collect()
}
