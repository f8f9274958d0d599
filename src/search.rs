//! Tantivy-based full-text search over stored summary records.

use std::path::Path;

use tantivy::collector::TopDocs;
use tantivy::query::QueryParser;
use tantivy::schema::{Schema, Value, STORED, TEXT};
use tantivy::{doc, Index, IndexWriter, ReloadPolicy};
use thiserror::Error;

use crate::record::SummaryRecord;

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("index error: {0}")]
    IndexError(#[from] tantivy::TantivyError),
    #[error("query parse error: {0}")]
    QueryError(#[from] tantivy::query::QueryParserError),
    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Full-text index over summary records, keyed by source URL.
pub struct SearchIndex {
    index: Index,
    schema: Schema,
}

impl SearchIndex {
    /// Open or create a search index at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, SearchError> {
        let mut schema_builder = Schema::builder();
        schema_builder.add_text_field("url", TEXT | STORED);
        schema_builder.add_text_field("title", TEXT | STORED);
        schema_builder.add_text_field("summary", TEXT);
        schema_builder.add_text_field("key_points", TEXT);
        schema_builder.add_text_field("keywords", TEXT);
        let schema = schema_builder.build();

        let index_path = path.as_ref();
        std::fs::create_dir_all(index_path)?;

        let index = Index::create_in_dir(index_path, schema.clone())
            .or_else(|_| Index::open_in_dir(index_path))?;

        Ok(Self { index, schema })
    }

    /// Index a record for searching, replacing any previous document for
    /// the same URL
    pub fn index_record(&self, record: &SummaryRecord) -> Result<(), SearchError> {
        let mut index_writer: IndexWriter = self.index.writer(50_000_000)?;

        let url_field = self.schema.get_field("url").unwrap();
        let title_field = self.schema.get_field("title").unwrap();
        let summary_field = self.schema.get_field("summary").unwrap();
        let key_points_field = self.schema.get_field("key_points").unwrap();
        let keywords_field = self.schema.get_field("keywords").unwrap();

        let url_term = tantivy::Term::from_field_text(url_field, &record.source_url);
        index_writer.delete_term(url_term);

        index_writer.add_document(doc!(
            url_field => record.source_url.clone(),
            title_field => record.title.clone(),
            summary_field => record.summary.clone(),
            key_points_field => record.key_points.join(" "),
            keywords_field => record.keywords.join(" "),
        ))?;

        index_writer.commit()?;
        Ok(())
    }

    /// Search for records matching the query, returning source URLs
    pub fn search(&self, query_str: &str, limit: usize) -> Result<Vec<String>, SearchError> {
        let reader = self
            .index
            .reader_builder()
            .reload_policy(ReloadPolicy::OnCommitWithDelay)
            .try_into()?;

        let searcher = reader.searcher();
        let title_field = self.schema.get_field("title").unwrap();
        let summary_field = self.schema.get_field("summary").unwrap();
        let key_points_field = self.schema.get_field("key_points").unwrap();
        let keywords_field = self.schema.get_field("keywords").unwrap();

        let query_parser = QueryParser::for_index(
            &self.index,
            vec![title_field, summary_field, key_points_field, keywords_field],
        );
        let query = query_parser.parse_query(query_str)?;

        let top_docs = searcher.search(&query, &TopDocs::with_limit(limit))?;

        let url_field = self.schema.get_field("url").unwrap();
        let mut results = Vec::new();
        for (_score, doc_address) in top_docs {
            let retrieved_doc = searcher.doc::<tantivy::TantivyDocument>(doc_address)?;
            if let Some(url) = retrieved_doc.get_first(url_field) {
                if let Some(url_str) = url.as_str() {
                    results.push(url_str.to_string());
                }
            }
        }

        Ok(results)
    }
}
