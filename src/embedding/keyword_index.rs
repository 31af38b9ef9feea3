/// Tantivy keyword index for scoped full-text search
use std::path::{Path, PathBuf};
use tantivy::collector::TopDocs;
use tantivy::query::{BooleanQuery, ConstScoreQuery, Occur, Query, QueryParser, TermQuery};
use tantivy::schema::*;
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum KeywordIndexError {
    #[error("Index initialization failed: {0}")]
    InitializationError(String),

    #[error("Index not found: {0}")]
    IndexNotFound(String),

    #[error("Insert failed: {0}")]
    InsertError(String),

    #[error("Search failed: {0}")]
    SearchError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Tantivy error: {0}")]
    TantivyError(#[from] TantivyError),
}

/// Lexical match with its BM25 score
#[derive(Debug, Clone, PartialEq)]
pub struct KeywordMatch {
    pub chunk_id: String,
    /// BM25 relevance score (unbounded, not comparable with cosine scores)
    pub score: f32,
}

/// Tantivy keyword index wrapper
///
/// Provides BM25-ranked full-text search restricted to one snapshot per call.
pub struct KeywordIndex {
    index: Index,
    reader: IndexReader,
    writer: IndexWriter,
    chunk_id_field: Field,
    snapshot_field: Field,
    text_field: Field,
    index_path: Option<PathBuf>,
}

impl KeywordIndex {
    /// Open the index stored in `index_path`, creating it when absent
    pub fn new(index_path: PathBuf) -> Result<Self, KeywordIndexError> {
        if index_path.join("meta.json").exists() {
            Self::load(index_path)
        } else {
            std::fs::create_dir_all(&index_path)?;
            let index = Index::create_in_dir(&index_path, Self::schema())
                .map_err(|e| KeywordIndexError::InitializationError(e.to_string()))?;
            Self::from_index(index, Some(index_path))
        }
    }

    /// Create an index held entirely in memory
    pub fn in_memory() -> Result<Self, KeywordIndexError> {
        Self::from_index(Index::create_in_ram(Self::schema()), None)
    }

    fn schema() -> Schema {
        let mut schema_builder = Schema::builder();
        schema_builder.add_text_field("chunk_id", STRING | STORED);
        schema_builder.add_text_field("snapshot_id", STRING | STORED);
        schema_builder.add_text_field("text", TEXT);
        schema_builder.build()
    }

    fn load(index_path: PathBuf) -> Result<Self, KeywordIndexError> {
        if !index_path.exists() {
            return Err(KeywordIndexError::IndexNotFound(
                index_path.display().to_string(),
            ));
        }

        let index = Index::open_in_dir(&index_path)
            .map_err(|e| KeywordIndexError::InitializationError(e.to_string()))?;
        Self::from_index(index, Some(index_path))
    }

    fn from_index(index: Index, index_path: Option<PathBuf>) -> Result<Self, KeywordIndexError> {
        let schema = index.schema();
        let field = |name: &str| {
            schema.get_field(name).map_err(|_| {
                KeywordIndexError::InitializationError(format!(
                    "Missing '{}' field in schema",
                    name
                ))
            })
        };
        let chunk_id_field = field("chunk_id")?;
        let snapshot_field = field("snapshot_id")?;
        let text_field = field("text")?;

        let writer = index
            .writer(50_000_000) // 50MB buffer
            .map_err(|e| KeywordIndexError::InitializationError(e.to_string()))?;

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::OnCommitWithDelay)
            .try_into()
            .map_err(|e| KeywordIndexError::InitializationError(e.to_string()))?;

        Ok(Self {
            index,
            reader,
            writer,
            chunk_id_field,
            snapshot_field,
            text_field,
            index_path,
        })
    }

    /// Stage a chunk for indexing. Re-inserting a chunk id replaces it.
    pub fn insert(
        &mut self,
        snapshot_id: &str,
        chunk_id: &str,
        text: &str,
    ) -> Result<(), KeywordIndexError> {
        self.writer
            .delete_term(Term::from_field_text(self.chunk_id_field, chunk_id));
        self.writer
            .add_document(doc!(
                self.chunk_id_field => chunk_id,
                self.snapshot_field => snapshot_id,
                self.text_field => text,
            ))
            .map_err(|e| KeywordIndexError::InsertError(e.to_string()))?;

        Ok(())
    }

    /// Commit all pending changes
    pub fn commit(&mut self) -> Result<(), KeywordIndexError> {
        self.writer
            .commit()
            .map_err(|e| KeywordIndexError::InsertError(e.to_string()))?;

        self.reader
            .reload()
            .map_err(|e| KeywordIndexError::SearchError(e.to_string()))?;

        Ok(())
    }

    /// Search one snapshot
    ///
    /// The query text is parsed leniently so user punctuation never fails the
    /// call. The snapshot restriction is a zero-score filter, leaving the BM25
    /// scores of the text clause untouched.
    pub fn search(
        &self,
        snapshot_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<KeywordMatch>, KeywordIndexError> {
        if limit == 0 || query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let searcher = self.reader.searcher();

        let query_parser = QueryParser::for_index(&self.index, vec![self.text_field]);
        let (text_query, parse_errors) = query_parser.parse_query_lenient(query);
        if !parse_errors.is_empty() {
            tracing::debug!(
                "Keyword query parsed with {} recoverable errors",
                parse_errors.len()
            );
        }

        let scope_filter: Box<dyn Query> = Box::new(ConstScoreQuery::new(
            Box::new(TermQuery::new(
                Term::from_field_text(self.snapshot_field, snapshot_id),
                IndexRecordOption::Basic,
            )),
            0.0,
        ));
        let scoped = BooleanQuery::new(vec![(Occur::Must, text_query), (Occur::Must, scope_filter)]);

        let top_docs = searcher
            .search(&scoped, &TopDocs::with_limit(limit))
            .map_err(|e| KeywordIndexError::SearchError(e.to_string()))?;

        let mut results = Vec::with_capacity(top_docs.len());
        for (score, doc_address) in top_docs {
            let retrieved_doc: TantivyDocument = searcher
                .doc(doc_address)
                .map_err(|e| KeywordIndexError::SearchError(e.to_string()))?;

            let chunk_id = retrieved_doc
                .get_first(self.chunk_id_field)
                .and_then(|v| v.as_str())
                .ok_or_else(|| {
                    KeywordIndexError::SearchError("Missing or invalid chunk_id field".to_string())
                })?
                .to_string();

            results.push(KeywordMatch { chunk_id, score });
        }

        results.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });

        Ok(results)
    }

    /// Remove every chunk of a snapshot (takes effect on commit)
    pub fn delete_snapshot(&mut self, snapshot_id: &str) {
        self.writer
            .delete_term(Term::from_field_text(self.snapshot_field, snapshot_id));
    }

    /// Get the number of documents in the index
    pub fn len(&self) -> u64 {
        self.reader.searcher().num_docs()
    }

    /// Check if index is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// On-disk location, `None` for in-memory indexes
    pub fn path(&self) -> Option<&Path> {
        self.index_path.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn populated() -> KeywordIndex {
        let mut index = KeywordIndex::in_memory().unwrap();
        index
            .insert("s1", "c1", "The quick brown fox jumps over the lazy dog")
            .unwrap();
        index
            .insert("s1", "c2", "A fast red fox leaps above a sleepy canine")
            .unwrap();
        index
            .insert("s1", "c3", "Foundation requirements are specified in section 4")
            .unwrap();
        index
            .insert("s2", "c4", "Foundation requirements for the other tenant")
            .unwrap();
        index.commit().unwrap();
        index
    }

    #[test]
    fn test_search_within_snapshot() {
        let index = populated();
        assert_eq!(index.len(), 4);

        let results = index.search("s1", "fox", 10).unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.chunk_id == "c1" || r.chunk_id == "c2"));

        let results = index.search("s1", "foundation requirements", 10).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk_id, "c3");
        assert!(results[0].score > 0.0);
    }

    #[test]
    fn test_other_snapshots_never_leak() {
        let index = populated();
        let results = index.search("s2", "foundation", 10).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk_id, "c4");
        assert!(index.search("s9", "foundation", 10).unwrap().is_empty());
    }

    #[test]
    fn test_punctuation_does_not_fail() {
        let index = populated();
        let results = index.search("s1", "fox AND (\"lazy", 10).unwrap();
        assert!(results.iter().all(|r| r.chunk_id != "c4"));
        assert!(index.search("s1", "   ", 10).unwrap().is_empty());
        assert!(index.search("s1", "fox", 0).unwrap().is_empty());
    }

    #[test]
    fn test_reinsert_replaces_document() {
        let mut index = populated();
        index.insert("s1", "c1", "Completely different words").unwrap();
        index.commit().unwrap();

        assert_eq!(index.len(), 4);
        let results = index.search("s1", "fox", 10).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk_id, "c2");
    }

    #[test]
    fn test_reload_from_disk() {
        let temp = TempDir::new().unwrap();
        let index_path = temp.path().join("keywords");

        {
            let mut index = KeywordIndex::new(index_path.clone()).unwrap();
            index.insert("s1", "c1", "Test document").unwrap();
            index.commit().unwrap();
        }

        let index = KeywordIndex::new(index_path.clone()).unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(index.path(), Some(index_path.as_path()));
        assert_eq!(index.search("s1", "test", 10).unwrap().len(), 1);
    }

    #[test]
    fn test_delete_snapshot() {
        let mut index = populated();
        index.delete_snapshot("s2");
        index.commit().unwrap();
        assert_eq!(index.len(), 3);
    }
}
