use std::sync::Arc;

use sysrag_core::chunker::split;
use sysrag_core::index_adapter::IndexAdapter;
use sysrag_core::memory_backend::MemoryBackend;
use sysrag_core::traits::{Embedder, EmbedderProvider};
use sysrag_core::types::{Chunk, CompressionConfig, Document, Meta, Query};
use sysrag_core::{Error, Result};
use sysrag_embed::EmbedderRegistry;
use sysrag_retrieval::{ContextOutcome, Retriever};

/// Two-topic embedder: anything mentioning DNS points one way, the rest the other.
struct TopicEmbedder;

impl Embedder for TopicEmbedder {
    fn model_id(&self) -> &str {
        "topic"
    }

    fn dim(&self) -> usize {
        2
    }

    fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        let norm = (1.0f32 + 0.04).sqrt();
        Ok(texts
            .iter()
            .map(|t| {
                if t.to_lowercase().contains("dns") {
                    vec![1.0 / norm, 0.2 / norm]
                } else {
                    vec![0.2 / norm, 1.0 / norm]
                }
            })
            .collect())
    }
}

struct FailingEmbedder;

impl Embedder for FailingEmbedder {
    fn model_id(&self) -> &str {
        "failing"
    }

    fn dim(&self) -> usize {
        2
    }

    fn embed_batch(&self, _texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        anyhow::bail!("device lost")
    }
}

struct Fixed(Arc<dyn Embedder>);

impl EmbedderProvider for Fixed {
    fn embedder(&self, _model_id: &str) -> Result<Arc<dyn Embedder>> {
        Ok(self.0.clone())
    }
}

const ON_TOPIC: [(&str, &str); 3] = [
    ("dns-bind", "Как настроить DNS сервер bind9 и зону в named.conf."),
    ("dns-resolv", "Как настроить DNS резолвер через resolv.conf."),
    ("dns-unbound", "Как настроить кеширующий DNS unbound для локальной сети."),
];

const OFF_TOPIC: [(&str, &str); 7] = [
    ("nginx", "Как настроить nginx как обратный прокси."),
    ("ssh", "Как настроить вход по ключу ssh."),
    ("ntp", "Как настроить chrony для синхронизации времени."),
    ("raid", "Как настроить программный raid через mdadm."),
    ("cron", "Как настроить задачи cron для резервного копирования."),
    ("vpn", "Как настроить wireguard между двумя узлами."),
    ("smb", "Как настроить общий каталог samba."),
];

fn chunks(docs: &[(&str, &str)]) -> Vec<Chunk> {
    docs.iter()
        .flat_map(|(id, text)| {
            let doc = Document {
                id: id.to_string(),
                source_url: format!("https://wiki/{id}"),
                title: id.to_string(),
                text: text.to_string(),
                meta: Meta::new(),
            };
            split(&doc, 512, 50).unwrap()
        })
        .collect()
}

fn adapter_with(docs: &[(&str, &str)]) -> Arc<IndexAdapter> {
    let adapter = Arc::new(IndexAdapter::new(Arc::new(MemoryBackend::new())));
    adapter.build(&chunks(docs), "wiki", false).unwrap();
    adapter
}

fn full_corpus() -> Arc<IndexAdapter> {
    let docs: Vec<(&str, &str)> = ON_TOPIC.iter().chain(OFF_TOPIC.iter()).copied().collect();
    adapter_with(&docs)
}

fn retriever(adapter: Arc<IndexAdapter>, embedder: Arc<dyn Embedder>) -> Retriever {
    Retriever::new(adapter, Arc::new(Fixed(embedder)), "wiki", CompressionConfig::default()).unwrap()
}

#[test]
fn similarity_keeps_only_on_topic_chunks() {
    let retriever = retriever(full_corpus(), Arc::new(TopicEmbedder));
    let outcome = retriever.answer_context(&Query::new("Как настроить DNS?", 10)).unwrap();

    let diag = outcome.diagnostics();
    assert_eq!(diag.candidates_before, 10);
    assert_eq!(diag.candidates_after, 3);
    assert_eq!(diag.stages_run, vec!["similarity".to_string()]);
    assert!(!diag.fallback_used);
    assert!(!diag.compression_skipped);

    for candidate in outcome.candidates() {
        assert!(candidate.doc_id.starts_with("dns-"), "{}", candidate.doc_id);
        assert!(candidate.compression_score.unwrap() >= 0.76);
    }
}

#[test]
fn disabled_compression_passes_everything_through() {
    let retriever = retriever(full_corpus(), Arc::new(TopicEmbedder));
    let query = Query::new("Как настроить DNS?", 10).with_compression(CompressionConfig::disabled());
    let outcome = retriever.answer_context(&query).unwrap();

    let diag = outcome.diagnostics();
    assert_eq!(diag.candidates_before, 10);
    assert_eq!(diag.candidates_after, 10);
    assert!(diag.stages_run.is_empty());
    assert!(outcome.candidates().iter().all(|c| c.compression_score.is_none()));
}

#[test]
fn empty_compression_result_falls_back_to_top_three() {
    let retriever = retriever(adapter_with(&OFF_TOPIC), Arc::new(TopicEmbedder));

    let outcome = retriever.answer_context(&Query::new("Как настроить DNS?", 10)).unwrap();
    let diag = outcome.diagnostics().clone();
    assert!(diag.fallback_used);
    assert_eq!(diag.candidates_before, 7);
    assert_eq!(diag.candidates_after, 3);
    assert_eq!(diag.stages_run, vec!["similarity".to_string()]);
    let ctx = outcome.into_context().expect("fallback context");
    assert!(ctx.candidates.iter().all(|c| c.compression_score.is_none()));

    let small = retriever.answer_context(&Query::new("Как настроить DNS?", 2)).unwrap();
    assert_eq!(small.candidates().len(), 2);
    assert!(small.diagnostics().fallback_used);
}

#[test]
fn missing_embedding_model_degrades_to_uncompressed_results() {
    let registry = Arc::new(EmbedderRegistry::new("/nonexistent/sysrag/models"));
    let retriever = Retriever::new(full_corpus(), registry, "wiki", CompressionConfig::default()).unwrap();

    let outcome = retriever.answer_context(&Query::new("Как настроить DNS?", 10)).unwrap();
    let diag = outcome.diagnostics();
    assert!(diag.compression_skipped);
    assert!(!diag.fallback_used);
    assert!(diag.stages_run.is_empty());
    assert_eq!(diag.candidates_before, 10);
    assert_eq!(diag.candidates_after, 10);
}

#[test]
fn failing_embedder_at_query_time_also_degrades() {
    let retriever = retriever(full_corpus(), Arc::new(FailingEmbedder));
    let outcome = retriever.answer_context(&Query::new("Как настроить DNS?", 5)).unwrap();
    assert!(outcome.diagnostics().compression_skipped);
    assert_eq!(outcome.candidates().len(), 5);
}

#[test]
fn no_match_is_an_explicit_signal() {
    let retriever = retriever(full_corpus(), Arc::new(TopicEmbedder));
    let outcome = retriever.answer_context(&Query::new("kubernetes helm", 10)).unwrap();
    match outcome {
        ContextOutcome::NoRelevantDocuments(diag) => {
            assert_eq!(diag.candidates_before, 0);
            assert_eq!(diag.candidates_after, 0);
        }
        ContextOutcome::Found(ctx) => panic!("unexpected context: {:?}", ctx.candidates),
    }
}

#[test]
fn bad_requests_fail_fast() {
    let retriever = retriever(full_corpus(), Arc::new(TopicEmbedder));
    assert!(matches!(retriever.answer_context(&Query::new("  ", 10)), Err(Error::Config(_))));
    assert!(matches!(retriever.answer_context(&Query::new("dns", 0)), Err(Error::Config(_))));

    let unknown_stage = CompressionConfig::default().with_stages(["similarity", "rerank"]);
    let query = Query::new("dns", 10).with_compression(unknown_stage);
    assert!(matches!(retriever.answer_context(&query), Err(Error::Config(_))));
}

#[test]
fn missing_index_is_not_an_empty_result() {
    let adapter = Arc::new(IndexAdapter::new(Arc::new(MemoryBackend::new())));
    let retriever = retriever(adapter, Arc::new(TopicEmbedder));
    assert!(matches!(retriever.answer_context(&Query::new("dns", 10)), Err(Error::IndexNotFound(_))));
}

#[test]
fn compression_config_can_be_swapped_at_runtime() {
    let retriever = retriever(full_corpus(), Arc::new(TopicEmbedder));
    let query = Query::new("Как настроить DNS?", 10);

    assert!(matches!(retriever.set_compression(CompressionConfig::default().with_threshold(2.0)), Err(Error::Config(_))));
    assert_eq!(retriever.compression(), CompressionConfig::default());

    retriever.set_compression(CompressionConfig::disabled()).unwrap();
    assert_eq!(retriever.answer_context(&query).unwrap().diagnostics().candidates_after, 10);

    retriever.set_compression(CompressionConfig::default()).unwrap();
    assert_eq!(retriever.answer_context(&query).unwrap().diagnostics().candidates_after, 3);
}

#[test]
fn shards_are_searched_together() {
    let adapter = Arc::new(IndexAdapter::new(Arc::new(MemoryBackend::new())));
    adapter.build(&chunks(&ON_TOPIC), "wiki", false).unwrap();
    adapter.build(&chunks(&OFF_TOPIC), "forum", false).unwrap();

    let retriever = Retriever::new(adapter, Arc::new(Fixed(Arc::new(TopicEmbedder))), "wiki", CompressionConfig::disabled())
        .unwrap()
        .with_shard("forum")
        .unwrap();
    assert_eq!(retriever.index_names(), ["wiki".to_string(), "forum".to_string()]);

    let outcome = retriever.answer_context(&Query::new("Как настроить DNS?", 10)).unwrap();
    assert_eq!(outcome.candidates().len(), 10);
    assert!(outcome.candidates()[..3].iter().all(|c| c.doc_id.starts_with("dns-")));
}

#[test]
fn rendered_context_numbers_documents() {
    let retriever = retriever(full_corpus(), Arc::new(TopicEmbedder));
    let ctx = retriever
        .answer_context(&Query::new("Как настроить DNS?", 10))
        .unwrap()
        .into_context()
        .unwrap();
    let rendered = ctx.render();
    assert!(rendered.starts_with("[Document 1 - dns-"));
    assert_eq!(rendered.matches("[Document ").count(), 3);
    assert_eq!(ctx.sources().len(), 3);
    assert!(ctx.sources()[0].url.starts_with("https://wiki/dns-"));

    let json = serde_json::to_value(&ctx.diagnostics).unwrap();
    assert_eq!(json["candidates_before"], 10);
    assert_eq!(json["stages_run"][0], "similarity");
}
