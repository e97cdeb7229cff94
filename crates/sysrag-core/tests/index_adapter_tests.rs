use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;

use sysrag_core::chunker::split;
use sysrag_core::index_adapter::IndexAdapter;
use sysrag_core::memory_backend::MemoryBackend;
use sysrag_core::traits::{CancelToken, IndexBackend, IndexReader};
use sysrag_core::types::{Chunk, Document, Meta};
use sysrag_core::Error;

fn chunks(id: &str, text: &str) -> Vec<Chunk> {
    let doc = Document {
        id: id.into(),
        source_url: format!("https://wiki/{id}"),
        title: id.to_uppercase(),
        text: text.into(),
        meta: Meta::new(),
    };
    split(&doc, 64, 8).unwrap()
}

/// Wraps the memory backend and parks every build until released.
struct GatedBackend {
    inner: MemoryBackend,
    started: Mutex<Sender<()>>,
    release: Mutex<Receiver<()>>,
}

impl IndexBackend for GatedBackend {
    fn build(
        &self,
        name: &str,
        generation: u64,
        chunks: &[Chunk],
        cancel: &CancelToken,
    ) -> anyhow::Result<Arc<dyn IndexReader>> {
        self.started.lock().unwrap().send(()).unwrap();
        self.release.lock().unwrap().recv().unwrap();
        self.inner.build(name, generation, chunks, cancel)
    }

    fn activate(&self, name: &str, generation: u64) -> anyhow::Result<()> {
        self.inner.activate(name, generation)
    }

    fn open_active(&self, name: &str) -> anyhow::Result<Option<(u64, Arc<dyn IndexReader>)>> {
        self.inner.open_active(name)
    }

    fn discard(&self, name: &str, generation: u64) -> anyhow::Result<()> {
        self.inner.discard(name, generation)
    }
}

/// Fails every build after writing nothing.
struct BrokenBackend(MemoryBackend);

impl IndexBackend for BrokenBackend {
    fn build(&self, name: &str, _: u64, _: &[Chunk], _: &CancelToken) -> anyhow::Result<Arc<dyn IndexReader>> {
        anyhow::bail!("disk full while writing '{name}'")
    }
    fn activate(&self, name: &str, generation: u64) -> anyhow::Result<()> {
        self.0.activate(name, generation)
    }
    fn open_active(&self, name: &str) -> anyhow::Result<Option<(u64, Arc<dyn IndexReader>)>> {
        self.0.open_active(name)
    }
    fn discard(&self, name: &str, generation: u64) -> anyhow::Result<()> {
        self.0.discard(name, generation)
    }
}

#[test]
fn second_build_without_rebuild_fails_and_keeps_original() {
    let adapter = IndexAdapter::new(Arc::new(MemoryBackend::new()));
    let first = adapter.build(&chunks("dns", "configure the dns resolver"), "docs", false).unwrap();
    assert_eq!(first.generation, 1);
    assert!(!first.replaced);

    let err = adapter.build(&chunks("ntp", "configure ntp servers"), "docs", false).unwrap_err();
    assert!(matches!(err, Error::IndexExists(ref name) if name == "docs"));

    let hits = adapter.search("docs", "resolver", 5).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].doc_id, "dns");
}

#[test]
fn rebuild_replaces_and_discards_previous_generation() {
    let backend = Arc::new(MemoryBackend::new());
    let adapter = IndexAdapter::new(backend.clone());
    adapter.build(&chunks("dns", "dns resolver"), "docs", false).unwrap();
    let second = adapter.build(&chunks("ntp", "ntp servers"), "docs", true).unwrap();

    assert_eq!(second.generation, 2);
    assert!(second.replaced);
    assert_eq!(backend.generations("docs"), vec![2]);
    assert!(adapter.search("docs", "resolver", 5).unwrap().is_empty());
    assert_eq!(adapter.search("docs", "servers", 5).unwrap()[0].doc_id, "ntp");
}

#[test]
fn missing_index_is_distinguished_from_no_matches() {
    let adapter = IndexAdapter::new(Arc::new(MemoryBackend::new()));
    assert!(matches!(adapter.search("nope", "dns", 3), Err(Error::IndexNotFound(_))));

    adapter.build(&chunks("dns", "dns resolver"), "docs", false).unwrap();
    assert!(adapter.search("docs", "kubernetes", 3).unwrap().is_empty());
    assert!(matches!(adapter.search("docs", "dns", 0), Err(Error::Config(_))));
    assert!(matches!(adapter.search("../etc", "dns", 3), Err(Error::Config(_))));
}

#[test]
fn search_during_rebuild_reports_build_in_progress() {
    let (started_tx, started_rx) = channel();
    let (release_tx, release_rx) = channel();
    let backend = Arc::new(GatedBackend {
        inner: MemoryBackend::new(),
        started: Mutex::new(started_tx),
        release: Mutex::new(release_rx),
    });
    let adapter = Arc::new(IndexAdapter::new(backend));

    release_tx.send(()).unwrap();
    adapter.build(&chunks("old", "legacy resolver notes"), "docs", false).unwrap();
    started_rx.recv().unwrap();

    let builder = {
        let adapter = adapter.clone();
        thread::spawn(move || adapter.build(&chunks("new", "fresh resolver guide"), "docs", true))
    };
    started_rx.recv().unwrap();

    assert!(adapter.is_building("docs"));
    assert!(matches!(adapter.search("docs", "resolver", 5), Err(Error::IndexBuildInProgress(_))));
    assert!(matches!(
        adapter.build(&chunks("x", "x"), "docs", true),
        Err(Error::IndexBuildInProgress(_))
    ));

    release_tx.send(()).unwrap();
    let result = builder.join().unwrap().unwrap();
    assert_eq!(result.generation, 2);

    let hits = adapter.search("docs", "resolver", 5).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].doc_id, "new");
}

#[test]
fn failed_or_cancelled_build_keeps_prior_index() {
    let adapter = IndexAdapter::new(Arc::new(MemoryBackend::new()));
    adapter.build(&chunks("dns", "dns resolver"), "docs", false).unwrap();

    let cancel = CancelToken::new();
    cancel.cancel();
    let err = adapter
        .build_with_cancel(&chunks("ntp", "ntp servers"), "docs", true, &cancel)
        .unwrap_err();
    assert!(matches!(err, Error::BuildCancelled(_)));
    assert!(!adapter.is_building("docs"));
    assert_eq!(adapter.search("docs", "resolver", 5).unwrap()[0].doc_id, "dns");

    let broken = IndexAdapter::new(Arc::new(BrokenBackend(MemoryBackend::new())));
    let err = broken.build(&chunks("dns", "dns"), "docs", false).unwrap_err();
    assert!(matches!(err, Error::Backend(_)));
    assert!(!broken.exists("docs").unwrap());
}

#[test]
fn persisted_generation_is_picked_up_lazily() {
    let backend = Arc::new(MemoryBackend::new());
    IndexAdapter::new(backend.clone())
        .build(&chunks("dns", "dns resolver"), "docs", false)
        .unwrap();

    let fresh = IndexAdapter::new(backend);
    assert!(fresh.exists("docs").unwrap());
    assert_eq!(fresh.num_chunks("docs").unwrap(), 1);
    assert!(matches!(
        fresh.build(&chunks("x", "x"), "docs", false),
        Err(Error::IndexExists(_))
    ));
}

#[test]
fn shards_merge_into_one_ranking() {
    let adapter = IndexAdapter::new(Arc::new(MemoryBackend::new()));
    adapter.build(&chunks("a", "dns resolver cache"), "shard-a", false).unwrap();
    adapter.build(&chunks("b", "dns zone transfer"), "shard-b", false).unwrap();

    let names = vec!["shard-a".to_string(), "shard-b".to_string()];
    let hits = adapter.search_shards(&names, "dns resolver", 10).unwrap();
    let docs: Vec<_> = hits.iter().map(|c| c.doc_id.as_str()).collect();
    assert_eq!(docs, ["a", "b"]);
    assert!(hits[0].retrieval_score > hits[1].retrieval_score);
}

fn chunk(doc_id: &str, seq: usize, text: &str) -> Chunk {
    Chunk {
        id: format!("{doc_id}:{seq}"),
        doc_id: doc_id.into(),
        source_url: format!("https://wiki/{doc_id}"),
        title: String::new(),
        text: text.into(),
        start: 0,
        end: text.len(),
        sequence_index: seq,
        meta: Meta::new(),
    }
}

#[test]
fn equal_scores_at_the_cut_go_to_lower_sequence_then_id() {
    let adapter = IndexAdapter::new(Arc::new(MemoryBackend::new()));
    let built = vec![
        chunk("z", 0, "resolver"),
        chunk("z", 1, "resolver"),
        chunk("a", 0, "resolver"),
    ];
    adapter.build(&built, "docs", false).unwrap();

    let all = adapter.search("docs", "resolver", 10).unwrap();
    let all_ids: Vec<_> = all.iter().map(|c| c.chunk_id.as_str()).collect();
    assert_eq!(all_ids, ["a:0", "z:0", "z:1"]);

    let top2 = adapter.search("docs", "resolver", 2).unwrap();
    let top2_ids: Vec<_> = top2.iter().map(|c| c.chunk_id.as_str()).collect();
    assert_eq!(top2_ids, ["a:0", "z:0"]);
    assert_eq!(top2_ids, all_ids[..2]);
}

#[test]
fn discover_lists_only_active_indexes() {
    let backend = Arc::new(MemoryBackend::new());
    let adapter = IndexAdapter::new(backend.clone());
    adapter.build(&chunks("b", "dns zone transfer"), "shard-b", false).unwrap();
    adapter.build(&chunks("a", "dns resolver cache"), "shard-a", false).unwrap();
    // Built but never activated.
    backend.build("staging", 1, &chunks("c", "raid disk"), &CancelToken::new()).unwrap();

    assert_eq!(adapter.discover().unwrap(), ["shard-a", "shard-b"]);
    assert!(IndexAdapter::new(Arc::new(BrokenBackend(MemoryBackend::new()))).discover().unwrap().is_empty());
}
