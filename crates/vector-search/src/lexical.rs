//! Tantivy-backed lexical index over raw chunk text.
//!
//! Indexed alongside the vector index at chunking time and consulted by the
//! hybrid ranker. The index lives in RAM; the durable copy of chunk text is
//! the embeddings sidecar.

use std::sync::Mutex;

use tantivy::collector::TopDocs;
use tantivy::query::{BooleanQuery, Occur, QueryParser, TermQuery};
use tantivy::schema::{Field, IndexRecordOption, STORED, STRING, Schema, TEXT, Value as _};
use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term, doc};

use crate::error::{SearchError, SearchResult};

const WRITER_HEAP_BYTES: usize = 32_000_000;

/// Lexical relevance score for one chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct LexicalHit {
    pub chunk_id: String,
    pub file_id: String,
    pub score: f32,
}

pub struct LexicalIndex {
    index: Index,
    writer: Mutex<IndexWriter>,
    reader: IndexReader,
    store_id: Field,
    file_id: Field,
    chunk_id: Field,
    text: Field,
}

impl LexicalIndex {
    pub fn new() -> SearchResult<Self> {
        let mut schema_builder = Schema::builder();

        let store_id = schema_builder.add_text_field("store_id", STRING);
        let file_id = schema_builder.add_text_field("file_id", STRING | STORED);
        let chunk_id = schema_builder.add_text_field("chunk_id", STRING | STORED);
        let text = schema_builder.add_text_field("text", TEXT);

        let schema = schema_builder.build();
        let index = Index::create_in_ram(schema);

        let writer = index
            .writer(WRITER_HEAP_BYTES)
            .map_err(|e| SearchError::Index(format!("Failed to create lexical index writer: {e}")))?;

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()
            .map_err(|e| SearchError::Index(format!("Failed to create lexical index reader: {e}")))?;

        Ok(Self {
            index,
            writer: Mutex::new(writer),
            reader,
            store_id,
            file_id,
            chunk_id,
            text,
        })
    }

    /// Index the raw text of one file's chunks.
    pub fn add_chunks(&self, store_id: &str, file_id: &str, chunks: &[(String, String)]) -> SearchResult<()> {
        let mut writer = self.writer.lock().map_err(|_| SearchError::Internal)?;

        for (chunk_id, text) in chunks {
            writer
                .add_document(doc!(
                    self.store_id => store_id,
                    self.file_id => file_id,
                    self.chunk_id => chunk_id.as_str(),
                    self.text => text.as_str(),
                ))
                .map_err(|e| SearchError::Index(format!("Failed to index chunk '{chunk_id}': {e}")))?;
        }

        writer
            .commit()
            .map_err(|e| SearchError::Index(format!("Failed to commit lexical index: {e}")))?;

        self.reload()
    }

    /// Drop every chunk of a file.
    pub fn delete_file(&self, file_id: &str) -> SearchResult<()> {
        let mut writer = self.writer.lock().map_err(|_| SearchError::Internal)?;

        writer.delete_term(Term::from_field_text(self.file_id, file_id));
        writer
            .commit()
            .map_err(|e| SearchError::Index(format!("Failed to commit lexical delete: {e}")))?;

        self.reload()
    }

    /// BM25 top-k within one store.
    pub fn search(&self, store_id: &str, query: &str, limit: usize) -> SearchResult<Vec<LexicalHit>> {
        let searcher = self.reader.searcher();

        let query_parser = QueryParser::for_index(&self.index, vec![self.text]);
        let (text_query, errors) = query_parser.parse_query_lenient(query);

        if !errors.is_empty() {
            log::debug!("Lenient lexical query parse for '{query}' dropped {} clause(s)", errors.len());
        }

        let store_query = TermQuery::new(
            Term::from_field_text(self.store_id, store_id),
            IndexRecordOption::Basic,
        );

        let query = BooleanQuery::new(vec![
            (Occur::Must, Box::new(store_query)),
            (Occur::Must, text_query),
        ]);

        let top_docs = searcher
            .search(&query, &TopDocs::with_limit(limit.max(1)))
            .map_err(|e| SearchError::Index(format!("Lexical search failed: {e}")))?;

        let mut hits = Vec::with_capacity(top_docs.len());

        for (score, address) in top_docs {
            let document: TantivyDocument = searcher
                .doc(address)
                .map_err(|e| SearchError::Index(format!("Failed to load lexical hit: {e}")))?;

            let chunk_id = document
                .get_first(self.chunk_id)
                .and_then(|value| value.as_str())
                .unwrap_or_default()
                .to_string();
            let file_id = document
                .get_first(self.file_id)
                .and_then(|value| value.as_str())
                .unwrap_or_default()
                .to_string();

            hits.push(LexicalHit { chunk_id, file_id, score });
        }

        Ok(hits)
    }

    fn reload(&self) -> SearchResult<()> {
        self.reader
            .reload()
            .map_err(|e| SearchError::Index(format!("Failed to reload lexical index reader: {e}")))
    }
}
