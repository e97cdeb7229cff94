use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;

use sysrag_core::chunker::Chunker;
use sysrag_core::config::{resolve_with_base, BackendKind, Config, Settings};
use sysrag_core::index_adapter::{BuildResult, IndexAdapter};
use sysrag_core::ingest::{chunk_documents, read_corpus};
use sysrag_core::memory_backend::MemoryBackend;
use sysrag_core::retry::RetryPolicy;
use sysrag_core::traits::{EmbedderProvider, IndexBackend};
use sysrag_core::types::{CompressionConfig, Query};
use sysrag_embed::EmbedderRegistry;
use sysrag_retrieval::{ContextOutcome, Retriever};
use sysrag_text::TantivyBackend;
use sysrag_vector::LanceBackend;

/// Everything a command needs, wired from the layered config.
pub struct App {
    settings: Settings,
    index_root: PathBuf,
    registry: Arc<EmbedderRegistry>,
    adapter: Arc<IndexAdapter>,
}

impl App {
    pub fn load(config_dir: &Path, backend: Option<BackendKind>, index: Option<String>) -> Result<Self> {
        let env_name = std::env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());
        let config = Config::load_from(config_dir, &env_name)?;
        let mut settings = config.settings()?;
        if let Some(backend) = backend {
            settings.index.backend = backend;
        }
        if let Some(index) = index {
            settings.index.name = index;
        }

        let index_root = resolve_with_base(config.base_dir(), &settings.index.root_dir);
        let registry = Arc::new(EmbedderRegistry::from_settings(&settings.embedding, config.base_dir()));
        let backend = open_backend(&settings, &index_root, registry.as_ref())?;
        tracing::debug!(backend = %settings.index.backend, root = %index_root.display(), "index backend ready");
        Ok(Self { settings, index_root, registry, adapter: Arc::new(IndexAdapter::new(backend)) })
    }

    pub fn build(&self, data: &Path, rebuild: bool) -> Result<()> {
        let report = read_corpus(data)?;
        for skipped in &report.skipped {
            tracing::warn!(source = %skipped.source, line = skipped.line, reason = %skipped.reason, "skipped record");
        }
        let chunker = Chunker::new(self.settings.chunking)?;
        let chunks = chunk_documents(&chunker, &report.documents);

        let name = &self.settings.index.name;
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")?);
        spinner.enable_steady_tick(Duration::from_millis(120));
        spinner.set_message(format!("indexing {} chunks into '{name}' ({})", chunks.len(), self.settings.index.backend));
        let built = self.adapter.build(&chunks, name, rebuild);
        spinner.finish_and_clear();
        let built: BuildResult = built?;

        println!("Index '{}' at {}", built.index_name, self.index_root.display());
        println!("  documents read:   {}", report.documents.len());
        println!("  records skipped:  {}", report.skipped.len());
        println!("  chunks indexed:   {}", built.chunk_count);
        println!("  generation:       {}{}", built.generation, if built.replaced { " (replaced previous)" } else { "" });
        println!("  elapsed:          {:.2?}", built.elapsed);
        Ok(())
    }

    pub fn retriever(&self) -> Result<Retriever> {
        let embedders: Arc<dyn EmbedderProvider> = self.registry.clone();
        let mut retriever = Retriever::new(
            self.adapter.clone(),
            embedders,
            self.settings.index.name.clone(),
            self.settings.compression.clone(),
        )?;
        for shard in self.shard_names()? {
            retriever = retriever.with_shard(shard)?;
        }
        Ok(retriever)
    }

    /// Configured shards, followed by the indexes found under the index root
    /// when `discover_shards` is on. The primary index is never repeated.
    fn shard_names(&self) -> Result<Vec<String>> {
        let primary = &self.settings.index.name;
        let mut names: Vec<String> = Vec::new();
        let mut push = |name: String| {
            if &name != primary && !names.contains(&name) {
                names.push(name);
            }
        };
        self.settings.index.shards.iter().cloned().for_each(&mut push);
        if self.settings.index.discover_shards {
            let found = self.adapter.discover()?;
            tracing::info!(root = %self.index_root.display(), count = found.len(), "discovered indexes");
            found.into_iter().for_each(&mut push);
        }
        Ok(names)
    }

    pub fn default_k(&self) -> usize {
        self.settings.retrieval.k
    }

    /// Per-query compression override built from the command line flags.
    pub fn compression_override(&self, no_compression: bool, threshold: Option<f32>) -> Option<CompressionConfig> {
        if no_compression {
            return Some(CompressionConfig::disabled());
        }
        threshold.map(|t| self.settings.compression.clone().with_threshold(t))
    }

    pub fn ask(&self, retriever: &Retriever, query: &Query, as_json: bool) -> Result<()> {
        let retry = RetryPolicy::new(
            self.settings.retrieval.max_attempts,
            Duration::from_millis(self.settings.retrieval.backoff_ms),
        );
        let outcome = retry
            .run(|| retriever.answer_context(query))
            .with_context(|| format!("answering '{}'", query.text))?;
        if as_json {
            println!("{}", serde_json::to_string_pretty(&outcome_json(&outcome))?);
        } else {
            print_outcome(&outcome);
        }
        Ok(())
    }
}

fn open_backend(settings: &Settings, root: &Path, registry: &EmbedderRegistry) -> Result<Arc<dyn IndexBackend>> {
    let backend: Arc<dyn IndexBackend> = match settings.index.backend {
        BackendKind::Tantivy => Arc::new(TantivyBackend::open(root)?),
        BackendKind::Lancedb => {
            let embedder = registry.embedder(&settings.embedding.index_model)?;
            Arc::new(LanceBackend::open(root, embedder)?)
        }
        BackendKind::Memory => {
            tracing::warn!("memory backend keeps nothing between runs");
            Arc::new(MemoryBackend::new())
        }
    };
    Ok(backend)
}

fn outcome_json(outcome: &ContextOutcome) -> serde_json::Value {
    match outcome {
        ContextOutcome::Found(ctx) => json!({
            "found": true,
            "context": ctx.render(),
            "sources": ctx.sources(),
            "diagnostics": ctx.diagnostics,
        }),
        ContextOutcome::NoRelevantDocuments(diagnostics) => json!({
            "found": false,
            "context": serde_json::Value::Null,
            "sources": [],
            "diagnostics": diagnostics,
        }),
    }
}

fn print_outcome(outcome: &ContextOutcome) {
    let diag = outcome.diagnostics();
    match outcome {
        ContextOutcome::Found(ctx) => {
            println!("{}", ctx.render());
            println!();
            println!("Sources:");
            for (i, source) in ctx.sources().iter().enumerate() {
                println!("  {}. {} ({}) score {:.3}", i + 1, source.title, source.url, source.relevance_score);
            }
        }
        ContextOutcome::NoRelevantDocuments(_) => println!("No relevant documents found."),
    }
    let stages = if diag.stages_run.is_empty() { "-".to_string() } else { diag.stages_run.join(", ") };
    println!(
        "[candidates {} -> {}, stages: {stages}{}{}]",
        diag.candidates_before,
        diag.candidates_after,
        if diag.fallback_used { ", fallback" } else { "" },
        if diag.compression_skipped { ", compression skipped" } else { "" },
    );
}
