use std::sync::Arc;
use tempfile::TempDir;

use sysrag_core::chunker::split;
use sysrag_core::index_adapter::IndexAdapter;
use sysrag_core::traits::{CancelToken, IndexBackend, IndexReader};
use sysrag_core::types::{Chunk, Document, Meta};
use sysrag_core::Error;
use sysrag_text::TantivyBackend;

fn corpus() -> Vec<Chunk> {
	let docs = [
		("dns", "DNS setup", "Как настроить DNS сервер bind9. Edit named.conf and restart the resolver."),
		("ntp", "Time sync", "Install chrony and point it at the pool servers for accurate time."),
		("fw", "Firewall", "Use nftables to drop inbound traffic except ssh and dns."),
	];
	docs.iter()
		.flat_map(|(id, title, text)| {
			let doc = Document { id: id.to_string(), source_url: format!("https://wiki/{id}"), title: title.to_string(), text: text.to_string(), meta: Meta::new() };
			split(&doc, 512, 50).unwrap()
		})
		.collect()
}

#[test]
fn tantivy_full_flow_on_disk() {
	let tmp = TempDir::new().unwrap();
	let backend = Arc::new(TantivyBackend::open(tmp.path()).expect("backend"));
	let adapter = IndexAdapter::new(backend.clone());

	let result = adapter.build(&corpus(), "wiki", false).expect("build");
	assert_eq!(result.chunk_count, 3);
	assert!(tmp.path().join("wiki/ACTIVE").exists());

	let hits = adapter.search("wiki", "Как настроить DNS?", 10).expect("search");
	assert!(!hits.is_empty());
	assert_eq!(hits[0].doc_id, "dns");
	assert_eq!(hits[0].title, "DNS setup");
	assert_eq!(hits[0].chunk_id, "dns:0");
	for pair in hits.windows(2) {
		assert!(pair[0].retrieval_score >= pair[1].retrieval_score);
	}

	// A second process sees the persisted generation.
	let reopened = IndexAdapter::new(Arc::new(TantivyBackend::open(tmp.path()).unwrap()));
	assert_eq!(reopened.num_chunks("wiki").unwrap(), 3);
	assert!(matches!(reopened.build(&corpus(), "wiki", false), Err(Error::IndexExists(_))));

	let rebuilt = reopened.build(&corpus()[..1], "wiki", true).expect("rebuild");
	assert_eq!(rebuilt.generation, 2);
	assert!(!backend.generation_dir("wiki", 1).unwrap().exists());
	assert!(backend.generation_dir("wiki", 2).unwrap().exists());
	assert_eq!(reopened.num_chunks("wiki").unwrap(), 1);
}

#[test]
fn cancelled_build_leaves_no_staging_directory() {
	let tmp = TempDir::new().unwrap();
	let backend = Arc::new(TantivyBackend::open(tmp.path()).unwrap());
	let adapter = IndexAdapter::new(backend.clone());
	adapter.build(&corpus(), "wiki", false).unwrap();

	let cancel = CancelToken::new();
	cancel.cancel();
	let err = adapter.build_with_cancel(&corpus(), "wiki", true, &cancel).unwrap_err();
	assert!(matches!(err, Error::BuildCancelled(_)));
	assert!(!backend.generation_dir("wiki", 2).unwrap().exists());
	assert_eq!(adapter.search("wiki", "chrony", 5).unwrap()[0].doc_id, "ntp");
}

#[test]
fn ram_backend_keeps_generations_in_process() {
	let backend = TantivyBackend::in_ram();
	let reader = backend.build("mem", 1, &corpus(), &CancelToken::new()).unwrap();
	assert_eq!(reader.num_chunks(), 3);
	assert!(backend.open_active("mem").unwrap().is_none());

	backend.activate("mem", 1).unwrap();
	let (generation, reader) = backend.open_active("mem").unwrap().expect("active");
	assert_eq!(generation, 1);
	let hits = reader.search("nftables firewall", 5).unwrap();
	assert_eq!(hits[0].doc_id, "fw");
	assert!(reader.search("", 5).unwrap().is_empty());
}

fn same_text_chunk(doc_id: &str, seq: usize) -> Chunk {
	let text = "restart the resolver after editing named.conf";
	Chunk {
		id: format!("{doc_id}:{seq}"),
		doc_id: doc_id.into(),
		source_url: format!("https://wiki/{doc_id}"),
		title: "Resolver".into(),
		text: text.into(),
		start: 0,
		end: text.len(),
		sequence_index: seq,
		meta: Meta::new(),
	}
}

#[test]
fn tied_scores_are_cut_by_sequence_then_id_not_doc_address() {
	let adapter = IndexAdapter::new(Arc::new(TantivyBackend::in_ram()));
	let chunks = vec![same_text_chunk("z", 0), same_text_chunk("z", 1), same_text_chunk("a", 0)];
	adapter.build(&chunks, "wiki", false).expect("build");

	let ids = |k: usize| -> Vec<String> {
		adapter.search("wiki", "resolver", k).expect("search").into_iter().map(|c| c.chunk_id).collect()
	};
	assert_eq!(ids(10), ["a:0", "z:0", "z:1"]);
	assert_eq!(ids(2), ["a:0", "z:0"]);
	assert_eq!(ids(1), ["a:0"]);
}

#[test]
fn disk_indexes_are_discovered_by_their_active_pointer() {
	let tmp = TempDir::new().unwrap();
	let backend = Arc::new(TantivyBackend::open(tmp.path()).unwrap());
	let adapter = IndexAdapter::new(backend.clone());
	adapter.build(&corpus(), "wiki", false).expect("build");
	adapter.build(&corpus()[..1], "dns-only", false).expect("build");
	std::fs::create_dir_all(tmp.path().join("half-written/gen-1")).unwrap();

	assert_eq!(adapter.discover().unwrap(), ["dns-only", "wiki"]);
	let reopened = IndexAdapter::new(Arc::new(TantivyBackend::open(tmp.path()).unwrap()));
	assert_eq!(reopened.discover().unwrap(), ["dns-only", "wiki"]);
}
