use tantivy::schema::{Field, IndexRecordOption, Schema, TextFieldIndexing, TextOptions, STORED, STRING};
use tantivy::tokenizer::{LowerCaser, SimpleTokenizer, StopWordFilter, TextAnalyzer};
use tantivy::Index;

pub const TOKENIZER_NAME: &str = "text_with_stopwords";

#[derive(Debug, Clone, Copy)]
pub struct Fields {
	pub doc_id: Field,
	pub slot: Field,
	pub generation: Field,
	pub chunk_index: Field,
	pub text: Field,
}

/// `slot` is `<generation>:<doc_id>` so one generation can be deleted by term.
pub fn build_schema() -> (Schema, Fields) {
	let mut schema_builder = Schema::builder();
	let doc_id = schema_builder.add_text_field("doc_id", STRING | STORED);
	let slot = schema_builder.add_text_field("slot", STRING);
	let generation = schema_builder.add_u64_field("generation", STORED);
	let chunk_index = schema_builder.add_u64_field("chunk_index", STORED);
	let text_field_indexing = TextFieldIndexing::default().set_tokenizer(TOKENIZER_NAME).set_index_option(IndexRecordOption::WithFreqsAndPositions);
	let text = schema_builder.add_text_field("text", TextOptions::default().set_indexing_options(text_field_indexing));
	(schema_builder.build(), Fields { doc_id, slot, generation, chunk_index, text })
}

pub fn slot_key(doc_id: &str, generation: u64) -> String { format!("{generation}:{doc_id}") }

pub fn register_tokenizer(index: &Index) {
	let stop_words = vec![
		"a","an","and","are","as","at","be","by","for","from","has","he","in","is","it","its","of","on","that","the","to","was","will","with","or","but","not","this","these","they","them","their","there","then","than","so","if","when","where","why","how","what","which","who","whom","whose","can","could","should","would","may","might","must","shall","do","does","did","have","had","having",
	];
	let tokenizer = TextAnalyzer::builder(SimpleTokenizer::default())
		.filter(LowerCaser)
		.filter(StopWordFilter::remove(stop_words.into_iter().map(|s| s.to_string())))
		.build();
	index.tokenizers().register(TOKENIZER_NAME, tokenizer);
}
