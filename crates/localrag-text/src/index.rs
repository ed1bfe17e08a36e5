use std::path::Path;
use std::sync::Mutex;

use tantivy::collector::TopDocs;
use tantivy::directory::MmapDirectory;
use tantivy::query::QueryParser;
use tantivy::schema::Value;
use tantivy::tokenizer::TokenStream;
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, Searcher, TantivyDocument, Term};
use tracing::debug;

use localrag_core::error::{Error, Result};

use crate::tantivy_utils::{build_schema, register_tokenizer, slot_key, Fields, TOKENIZER_NAME};

const WRITER_HEAP_BYTES: usize = 20_000_000;

/// One BM25 hit. `generation` tells the caller which write produced the row.
#[derive(Debug, Clone, PartialEq)]
pub struct KeywordHit {
	pub doc_id: String,
	pub chunk_index: usize,
	pub generation: u64,
	pub score: f32,
}

/// Tantivy index over chunk text, keyed by document and write generation.
///
/// Rows of several generations of the same document may coexist between
/// `stage` and `retire`; callers filter hits by the generation they consider
/// active.
pub struct KeywordIndex {
	index: Index,
	reader: IndexReader,
	writer: Mutex<IndexWriter>,
	fields: Fields,
}

fn write_err(e: impl std::fmt::Display) -> Error { Error::StoreWriteFailure(format!("keyword index: {e}")) }
fn query_err(e: impl std::fmt::Display) -> Error { Error::StoreQueryFailure(format!("keyword index: {e}")) }

impl KeywordIndex {
	pub fn in_memory() -> Result<Self> {
		let (schema, _) = build_schema();
		Self::from_index(Index::create_in_ram(schema))
	}

	/// Opens the index stored in `dir`, creating it (and the directory) if needed.
	pub fn open_or_create(dir: &Path) -> Result<Self> {
		std::fs::create_dir_all(dir).map_err(write_err)?;
		let (schema, _) = build_schema();
		let directory = MmapDirectory::open(dir).map_err(write_err)?;
		let index = Index::open_or_create(directory, schema).map_err(write_err)?;
		Self::from_index(index)
	}

	fn from_index(index: Index) -> Result<Self> {
		register_tokenizer(&index);
		let schema = index.schema();
		let field = |name: &str| schema.get_field(name).map_err(write_err);
		let fields = Fields {
			doc_id: field("doc_id")?,
			slot: field("slot")?,
			generation: field("generation")?,
			chunk_index: field("chunk_index")?,
			text: field("text")?,
		};
		let reader: IndexReader = index.reader_builder().reload_policy(ReloadPolicy::Manual).try_into().map_err(write_err)?;
		let writer = index.writer_with_num_threads(1, WRITER_HEAP_BYTES).map_err(write_err)?;
		Ok(Self { index, reader, writer: Mutex::new(writer), fields })
	}

	/// Runs `ops` and commits under the writer lock; rolls back on failure so no
	/// half-written batch is left pending.
	fn commit_with<F>(&self, ops: F) -> Result<()>
	where
		F: FnOnce(&mut IndexWriter, &Fields) -> tantivy::Result<()>,
	{
		let mut writer = self.writer.lock().map_err(|_| write_err("writer lock poisoned"))?;
		let res = ops(&mut *writer, &self.fields).and_then(|()| writer.commit().map(|_| ()));
		if let Err(e) = res {
			let _ = writer.rollback();
			return Err(write_err(e));
		}
		drop(writer);
		self.reader.reload().map_err(write_err)
	}

	/// Indexes one generation of a document and makes it searchable.
	pub fn stage<'a, I>(&self, doc_id: &str, generation: u64, chunks: I) -> Result<()>
	where
		I: IntoIterator<Item = (usize, &'a str)>,
	{
		let slot = slot_key(doc_id, generation);
		self.commit_with(|writer, f| {
			let mut n = 0usize;
			for (chunk_index, text) in chunks {
				writer.add_document(doc!(
					f.doc_id => doc_id.to_string(),
					f.slot => slot.clone(),
					f.generation => generation,
					f.chunk_index => chunk_index as u64,
					f.text => text.to_string(),
				))?;
				n += 1;
			}
			debug!(doc_id, generation, chunks = n, "keyword rows staged");
			Ok(())
		})
	}

	/// Drops the rows of one generation of a document.
	pub fn retire(&self, doc_id: &str, generation: u64) -> Result<()> {
		let slot = slot_key(doc_id, generation);
		self.commit_with(|writer, f| {
			writer.delete_term(Term::from_field_text(f.slot, &slot));
			Ok(())
		})
	}

	/// Drops every generation of a document.
	pub fn remove_document(&self, doc_id: &str) -> Result<()> {
		self.commit_with(|writer, f| {
			writer.delete_term(Term::from_field_text(f.doc_id, doc_id));
			Ok(())
		})
	}

	/// Drops everything.
	pub fn clear(&self) -> Result<()> {
		self.commit_with(|writer, _| writer.delete_all_documents().map(|_| ()))
	}

	/// Point-in-time view of the committed rows. Later `stage` and `retire`
	/// calls do not change what it returns.
	pub fn snapshot(&self) -> KeywordSnapshot<'_> {
		KeywordSnapshot { index: self, searcher: self.reader.searcher() }
	}

	pub fn num_docs(&self) -> u64 { self.snapshot().num_docs() }

	/// Whether the text analyzer leaves any term in `text`. A query made only
	/// of stop words and punctuation would otherwise parse to a match-all.
	fn has_terms(&self, text: &str) -> bool {
		let Some(mut analyzer) = self.index.tokenizers().get(TOKENIZER_NAME) else { return true };
		let mut stream = analyzer.token_stream(text);
		stream.advance()
	}

	/// BM25 search over the latest committed rows.
	pub fn search(&self, query_text: &str, limit: usize) -> Result<Vec<KeywordHit>> {
		self.snapshot().search(query_text, limit)
	}
}

pub struct KeywordSnapshot<'a> {
	index: &'a KeywordIndex,
	searcher: Searcher,
}

impl KeywordSnapshot<'_> {
	pub fn num_docs(&self) -> u64 { self.searcher.num_docs() }

	/// BM25 search. Query syntax errors are tolerated (lenient parsing).
	pub fn search(&self, query_text: &str, limit: usize) -> Result<Vec<KeywordHit>> {
		if limit == 0 || !self.index.has_terms(query_text) {
			return Ok(Vec::new());
		}
		let fields = &self.index.fields;
		let parser = QueryParser::for_index(&self.index.index, vec![fields.text]);
		let (query, errors) = parser.parse_query_lenient(query_text);
		if !errors.is_empty() {
			debug!(query = query_text, errors = errors.len(), "lenient keyword query parse");
		}
		let searcher = &self.searcher;
		let top_docs = searcher.search(&query, &TopDocs::with_limit(limit)).map_err(query_err)?;
		let mut hits = Vec::with_capacity(top_docs.len());
		for (score, addr) in top_docs {
			let doc: TantivyDocument = searcher.doc(addr).map_err(query_err)?;
			let doc_id = doc.get_first(fields.doc_id).and_then(|v| v.as_str()).ok_or_else(|| query_err("row without doc_id"))?;
			let generation = doc.get_first(fields.generation).and_then(|v| v.as_u64()).ok_or_else(|| query_err("row without generation"))?;
			let chunk_index = doc.get_first(fields.chunk_index).and_then(|v| v.as_u64()).ok_or_else(|| query_err("row without chunk_index"))?;
			let chunk_index = usize::try_from(chunk_index).map_err(query_err)?;
			hits.push(KeywordHit { doc_id: doc_id.to_string(), chunk_index, generation, score });
		}
		Ok(hits)
	}
}
