//! Search index management

use crate::search::analyzers::{document_locale, LocaleAnalyzers};
use crate::search::config::SearchConfig;
use crate::search::error::{SearchError, SearchResult};
use crate::search::metrics::SEARCH_METRICS;
use crate::search::schema::{
    document_uid, FieldCatalog, FieldType, FieldValue, IndexTypeSpec, IndexableRecord,
};
use parking_lot::RwLock;
use std::path::Path;
use std::sync::Arc;
use tantivy::directory::MmapDirectory;
use tantivy::query::Query;
use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy, Searcher, TantivyDocument, Term};
use tracing::{debug, info, warn};

/// Point-in-time read side of the index, shared with every searcher
///
/// The reader only moves forward on `SearchIndex::commit`, and is swapped as
/// a whole when the index is rebuilt after an already-closed failure.
pub struct IndexHandle {
    catalog: Arc<FieldCatalog>,
    read_side: RwLock<ReadSide>,
}

struct ReadSide {
    index: Index,
    reader: IndexReader,
}

impl IndexHandle {
    fn new(catalog: Arc<FieldCatalog>, index: Index, reader: IndexReader) -> Self {
        Self {
            catalog,
            read_side: RwLock::new(ReadSide { index, reader }),
        }
    }

    pub fn catalog(&self) -> &FieldCatalog {
        &self.catalog
    }

    /// Searcher over the last committed snapshot
    pub fn searcher(&self) -> Searcher {
        self.read_side.read().reader.searcher()
    }

    pub fn index(&self) -> Index {
        self.read_side.read().index.clone()
    }

    fn reload(&self) -> SearchResult<()> {
        self.read_side.read().reader.reload()?;
        Ok(())
    }

    fn replace(&self, index: Index, reader: IndexReader) {
        *self.read_side.write() = ReadSide { index, reader };
    }
}

/// The one mutable index, owned by the indexing thread
///
/// Not safe for concurrent mutation: all writes go through `&mut self`.
pub struct SearchIndex {
    config: SearchConfig,
    catalog: Arc<FieldCatalog>,
    handle: Arc<IndexHandle>,
    writer: Option<IndexWriter>,
    generation: u64,
    closed: bool,
}

impl SearchIndex {
    /// Open or create the index holding every given type
    pub fn open(config: SearchConfig, types: &[Arc<IndexTypeSpec>]) -> SearchResult<Self> {
        let analyzers = LocaleAnalyzers::new(&config.locales);
        let catalog = Arc::new(FieldCatalog::build(types, analyzers)?);

        let index = open_index(config.index_path.as_deref(), &catalog)?;
        let writer = create_writer(&index, config.writer_heap_size)?;
        let reader = create_reader(&index)?;

        info!(
            path = ?config.index_path,
            types = types.len(),
            "Search index opened"
        );

        Ok(Self {
            handle: Arc::new(IndexHandle::new(catalog.clone(), index, reader)),
            config,
            catalog,
            writer: Some(writer),
            generation: 0,
            closed: false,
        })
    }

    pub fn handle(&self) -> Arc<IndexHandle> {
        self.handle.clone()
    }

    pub fn catalog(&self) -> &FieldCatalog {
        &self.catalog
    }

    /// Number of rebuilds so far; a change means uncommitted writes were lost
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Write a record of `spec` using the analyzer of `locale`
    pub fn add_document(
        &mut self,
        spec: &IndexTypeSpec,
        record: &IndexableRecord,
        locale: Option<&str>,
    ) -> SearchResult<()> {
        let doc = self.build_document(spec, record, locale)?;
        self.with_recovery("add_document", |writer| {
            writer.add_document(doc.clone())?;
            Ok(())
        })
    }

    /// Delete every document matching `query`
    pub fn delete_documents(&mut self, query: &dyn Query) -> SearchResult<()> {
        self.with_recovery("delete_documents", |writer| {
            writer.delete_query(query.box_clone())?;
            Ok(())
        })
    }

    /// Delete the document of one record
    pub fn delete_record(&mut self, type_name: &str, id: &str) -> SearchResult<()> {
        let term = Term::from_field_text(self.catalog.system().uid, &document_uid(type_name, id));
        self.with_recovery("delete_record", |writer| {
            writer.delete_term(term.clone());
            Ok(())
        })
    }

    /// Delete every document of a type
    pub fn delete_type(&mut self, type_name: &str) -> SearchResult<()> {
        let term = Term::from_field_text(self.catalog.system().type_name, type_name);
        self.with_recovery("delete_type", |writer| {
            writer.delete_term(term.clone());
            Ok(())
        })
    }

    pub fn delete_all_documents(&mut self) -> SearchResult<()> {
        self.with_recovery("delete_all_documents", |writer| {
            writer.delete_all_documents()?;
            Ok(())
        })
    }

    /// Flush pending writes and swap in a reader that sees them
    pub fn commit(&mut self) -> SearchResult<()> {
        self.with_recovery("commit", |writer| {
            writer.commit()?;
            Ok(())
        })?;
        self.handle.reload()
    }

    /// Discard writes since the last commit
    pub fn rollback(&mut self) -> SearchResult<()> {
        self.with_recovery("rollback", |writer| {
            writer.rollback()?;
            Ok(())
        })
    }

    /// Release the writer; the index cannot be written afterwards
    pub fn close(&mut self) -> SearchResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if let Some(writer) = self.writer.take() {
            writer.wait_merging_threads()?;
        }
        info!("Search index closed");
        Ok(())
    }

    fn build_document(
        &self,
        spec: &IndexTypeSpec,
        record: &IndexableRecord,
        locale: Option<&str>,
    ) -> SearchResult<TantivyDocument> {
        let system = self.catalog.system();
        let analyzer_locale = self.catalog.analyzers().resolve(locale);

        let mut doc = TantivyDocument::default();
        doc.add_text(system.uid, document_uid(&spec.name, &record.id));
        doc.add_text(system.id, &record.id);
        doc.add_text(system.type_name, &spec.name);
        doc.add_text(system.locale, document_locale(locale));

        for def in &spec.fields {
            let field = self.catalog.field(&def.name)?.for_locale(analyzer_locale);
            for value in record.values(&def.name) {
                match (def.value_type, value) {
                    (FieldType::Text, FieldValue::Text(text)) => doc.add_text(field, text),
                    (FieldType::I64, FieldValue::I64(number)) => doc.add_i64(field, *number),
                    (FieldType::Date, FieldValue::Date(date)) => doc.add_date(
                        field,
                        tantivy::DateTime::from_timestamp_millis(date.timestamp_millis()),
                    ),
                    (expected, actual) => {
                        return Err(SearchError::SchemaError(format!(
                            "field {} of {} expects {expected}, got {}",
                            def.name,
                            spec.name,
                            actual.field_type()
                        )))
                    }
                }
            }
        }
        Ok(doc)
    }

    /// Run a writer operation, rebuilding the index once if it reports itself closed
    fn with_recovery<T>(
        &mut self,
        operation: &'static str,
        mut op: impl FnMut(&mut IndexWriter) -> SearchResult<T>,
    ) -> SearchResult<T> {
        if self.closed {
            return Err(SearchError::Closed);
        }

        let first = match self.writer.as_mut() {
            Some(writer) => op(writer),
            None => Err(SearchError::AlreadyClosed("index writer is gone".to_string())),
        };

        match first {
            Err(SearchError::AlreadyClosed(reason)) => {
                warn!(
                    event = "index_already_closed",
                    operation,
                    reason = %reason,
                    "Index reported itself closed, rebuilding writer and reader"
                );
                SEARCH_METRICS
                    .recoveries_total
                    .with_label_values(&[operation])
                    .inc();
                self.rebuild()?;
                match self.writer.as_mut() {
                    Some(writer) => op(writer),
                    None => Err(SearchError::Closed),
                }
            }
            other => other,
        }
    }

    fn rebuild(&mut self) -> SearchResult<()> {
        drop(self.writer.take());

        let index = match self.config.index_path.as_deref() {
            Some(path) => open_index(Some(path), &self.catalog)?,
            None => self.handle.index(),
        };
        let writer = create_writer(&index, self.config.writer_heap_size)?;
        let reader = create_reader(&index)?;

        self.handle.replace(index, reader);
        self.writer = Some(writer);
        self.generation += 1;
        debug!(generation = self.generation, "Search index rebuilt");
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn simulate_writer_loss(&mut self) {
        self.writer = None;
    }
}

fn open_index(path: Option<&Path>, catalog: &FieldCatalog) -> SearchResult<Index> {
    let index = match path {
        Some(path) => {
            std::fs::create_dir_all(path).map_err(|e| {
                SearchError::IndexInitFailed(format!("Failed to create index directory: {}", e))
            })?;
            let directory = MmapDirectory::open(path).map_err(|e| {
                SearchError::IndexInitFailed(format!("Failed to open index directory: {}", e))
            })?;
            Index::open_or_create(directory, catalog.schema().clone()).map_err(|e| {
                SearchError::IndexInitFailed(format!("Failed to open index: {}", e))
            })?
        }
        None => Index::create_in_ram(catalog.schema().clone()),
    };
    catalog.analyzers().register(&index);
    Ok(index)
}

fn create_writer(index: &Index, heap_size: usize) -> SearchResult<IndexWriter> {
    index
        .writer_with_num_threads(1, heap_size)
        .map_err(|e| SearchError::IndexInitFailed(format!("Failed to create writer: {}", e)))
}

fn create_reader(index: &Index) -> SearchResult<IndexReader> {
    index
        .reader_builder()
        .reload_policy(ReloadPolicy::Manual)
        .try_into()
        .map_err(|e| SearchError::IndexInitFailed(format!("Failed to create reader: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::config::SearchConfigBuilder;
    use crate::search::schema::FieldDef;
    use tantivy::collector::Count;
    use tantivy::query::TermQuery;
    use tantivy::schema::IndexRecordOption;

    fn note_type() -> Arc<IndexTypeSpec> {
        Arc::new(IndexTypeSpec::new(
            "note",
            vec![FieldDef::text("body"), FieldDef::keyword("tag")],
        ))
    }

    fn open(spec: &Arc<IndexTypeSpec>) -> SearchIndex {
        let config = SearchConfigBuilder::new()
            .in_memory()
            .writer_heap_size(15_000_000)
            .build();
        SearchIndex::open(config, &[spec.clone()]).unwrap()
    }

    fn count_tag(index: &SearchIndex, tag: &str) -> usize {
        let field = index.catalog().field("tag").unwrap().default;
        let query = TermQuery::new(
            Term::from_field_text(field, tag),
            IndexRecordOption::Basic,
        );
        index.handle().searcher().search(&query, &Count).unwrap()
    }

    fn record(id: &str, tag: &str) -> IndexableRecord {
        IndexableRecord::insert(id)
            .with_field("body", "Some body text")
            .with_field("tag", tag)
    }

    #[test]
    fn test_writes_visible_only_after_commit() {
        let spec = note_type();
        let mut index = open(&spec);

        index.add_document(&spec, &record("1", "alpha"), None).unwrap();
        assert_eq!(count_tag(&index, "alpha"), 0);

        index.commit().unwrap();
        assert_eq!(count_tag(&index, "alpha"), 1);
    }

    #[test]
    fn test_rollback_discards_pending_writes() {
        let spec = note_type();
        let mut index = open(&spec);

        index.add_document(&spec, &record("1", "alpha"), None).unwrap();
        index.rollback().unwrap();
        index.commit().unwrap();
        assert_eq!(count_tag(&index, "alpha"), 0);
    }

    #[test]
    fn test_delete_record_and_type() {
        let spec = note_type();
        let mut index = open(&spec);

        index.add_document(&spec, &record("1", "alpha"), None).unwrap();
        index.add_document(&spec, &record("2", "alpha"), None).unwrap();
        index.commit().unwrap();

        index.delete_record("note", "1").unwrap();
        index.commit().unwrap();
        assert_eq!(count_tag(&index, "alpha"), 1);

        index.delete_type("note").unwrap();
        index.commit().unwrap();
        assert_eq!(count_tag(&index, "alpha"), 0);
    }

    #[test]
    fn test_recovers_after_writer_loss() {
        let spec = note_type();
        let mut index = open(&spec);

        index.add_document(&spec, &record("1", "alpha"), None).unwrap();
        index.commit().unwrap();

        index.simulate_writer_loss();
        index.add_document(&spec, &record("2", "beta"), None).unwrap();
        index.commit().unwrap();

        assert_eq!(index.generation(), 1);
        assert_eq!(count_tag(&index, "alpha"), 1);
        assert_eq!(count_tag(&index, "beta"), 1);
    }

    #[test]
    fn test_closed_index_rejects_writes() {
        let spec = note_type();
        let mut index = open(&spec);

        index.close().unwrap();
        let err = index.add_document(&spec, &record("1", "alpha"), None).unwrap_err();
        assert!(matches!(err, SearchError::Closed));
        assert!(index.close().is_ok());
    }

    #[test]
    fn test_mismatched_value_type_is_rejected() {
        let spec = note_type();
        let mut index = open(&spec);

        let bad = IndexableRecord::insert("1").with_field("tag", 42i64);
        assert!(matches!(
            index.add_document(&spec, &bad, None),
            Err(SearchError::SchemaError(_))
        ));
    }
}
