//! Chunk schema and analyzer shared by index builds and reopened indexes.
use tantivy::schema::{Field, IndexRecordOption, Schema, TextFieldIndexing, TextOptions, INDEXED, STORED, STRING};
use tantivy::tokenizer::{LowerCaser, SimpleTokenizer, StopWordFilter, TextAnalyzer};
use tantivy::Index;

pub const TOKENIZER: &str = "text_with_stopwords";

pub fn build_schema() -> Schema {
	let mut schema_builder = Schema::builder();
	schema_builder.add_text_field("id", STRING | STORED);
	schema_builder.add_text_field("doc_id", STRING | STORED);
	schema_builder.add_text_field("source_url", STORED);
	let text_field_indexing = TextFieldIndexing::default().set_tokenizer(TOKENIZER).set_index_option(IndexRecordOption::WithFreqsAndPositions);
	let text_options = TextOptions::default().set_indexing_options(text_field_indexing).set_stored();
	schema_builder.add_text_field("title", text_options.clone());
	schema_builder.add_text_field("text", text_options);
	schema_builder.add_u64_field("seq", INDEXED | STORED);
	schema_builder.add_text_field("meta", STORED);
	schema_builder.build()
}

/// Field handles resolved once per index.
#[derive(Debug, Clone, Copy)]
pub struct Fields {
	pub id: Field,
	pub doc_id: Field,
	pub source_url: Field,
	pub title: Field,
	pub text: Field,
	pub seq: Field,
	pub meta: Field,
}

impl Fields {
	pub fn resolve(schema: &Schema) -> tantivy::Result<Self> {
		Ok(Self {
			id: schema.get_field("id")?,
			doc_id: schema.get_field("doc_id")?,
			source_url: schema.get_field("source_url")?,
			title: schema.get_field("title")?,
			text: schema.get_field("text")?,
			seq: schema.get_field("seq")?,
			meta: schema.get_field("meta")?,
		})
	}
}

/// The corpus mixes English and Russian technical prose.
pub fn register_tokenizer(index: &Index) {
	let stop_words = [
		"a","an","and","are","as","at","be","by","for","from","has","in","is","it","its","of","on","that","the","to","was","will","with","or","but","not","this","these","they","there","then","than","so","if","when","where","why","how","what","which","who","can","could","should","would","do","does","did","have","had",
		"и","в","во","не","что","он","на","я","с","со","как","а","то","все","она","так","его","но","да","ты","к","у","же","вы","за","бы","по","только","ее","мне","было","вот","от","меня","еще","нет","о","из","ему","ли","если","или","ни","быть","был","для","мы","это","где","там","чем","при","без",
	];
	let tokenizer = TextAnalyzer::builder(SimpleTokenizer::default())
		.filter(LowerCaser)
		.filter(StopWordFilter::remove(stop_words.into_iter().map(|s| s.to_string())))
		.build();
	index.tokenizers().register(TOKENIZER, tokenizer);
}
