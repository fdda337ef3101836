//! Read-side search facade

use crate::search::error::{SearchError, SearchResult};
use crate::search::index::IndexHandle;
use crate::search::metrics::SEARCH_METRICS;
use crate::search::query::{
    after_cursor, all_of, compare_hits, date_range_filter, locale_filter, term_filter,
    type_filter, uid_query, SearchCursor, SearchOptions, SearchSort, SortKey, SortOrder,
    TextQueryBuilder,
};
use crate::search::schema::{document_uid, FieldCatalog, FieldType, FieldValue, IndexTypeSpec};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tantivy::collector::{Count, TopDocs};
use tantivy::query::{BooleanQuery, MoreLikeThisQuery, Occur, Query};
use tantivy::schema::{Field, OwnedValue, Value};
use tantivy::{DocAddress, Order, Searcher, TantivyDocument};
use tracing::{debug, warn};

/// Words shorter than this never drive a similarity match
pub const SIMILARITY_MIN_WORD_LENGTH: usize = 3;

/// Boost applied to the most significant term of a similarity query
pub const SIMILARITY_BOOST_FACTOR: f32 = 10.0;

/// A single search result hit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub type_name: String,

    pub id: String,

    /// Normalized locale tag of the document
    pub locale: String,

    /// Relevance score, unset when sorted on a field
    pub score: Option<f32>,

    /// Stored field values by type-spec field name
    pub fields: BTreeMap<String, Vec<FieldValue>>,

    /// Resume position right after this hit
    pub cursor: SearchCursor,
}

impl SearchHit {
    pub fn first(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name).and_then(|values| values.first())
    }

    pub fn first_text(&self, name: &str) -> Option<&str> {
        self.first(name).and_then(FieldValue::as_str)
    }

    pub fn first_i64(&self, name: &str) -> Option<i64> {
        self.first(name).and_then(FieldValue::as_i64)
    }

    pub fn first_date(&self, name: &str) -> Option<DateTime<Utc>> {
        self.first(name).and_then(FieldValue::as_date)
    }
}

/// Search response with results and paging metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub hits: Vec<SearchHit>,

    /// Matches before paging
    pub total_hits: usize,

    /// Set when more hits follow the last returned one
    pub next_cursor: Option<SearchCursor>,
}

/// Hits sharing one value of the grouping field
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchGroup {
    pub key: FieldValue,
    pub hits: Vec<SearchHit>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupedResponse {
    /// Groups ordered by their best hit
    pub groups: Vec<SearchGroup>,

    pub total_hits: usize,
}

/// Query facade over the last committed snapshot of the index
#[derive(Clone)]
pub struct IndexSearch {
    handle: Arc<IndexHandle>,
}

impl IndexSearch {
    pub fn new(handle: Arc<IndexHandle>) -> Self {
        Self { handle }
    }

    pub fn catalog(&self) -> &FieldCatalog {
        self.handle.catalog()
    }

    /// Ranked free-text search within one type, optionally one locale
    pub fn search_text(
        &self,
        text: &str,
        spec: &IndexTypeSpec,
        locale: Option<&str>,
        options: &SearchOptions,
    ) -> SearchResult<SearchResponse> {
        let index = self.handle.index();
        let catalog = self.catalog();

        let mut clauses = vec![type_filter(catalog, &spec.name)];
        if let Some(locale) = locale {
            clauses.push(locale_filter(catalog, locale));
        }
        if let Some(text_clause) = TextQueryBuilder::new(&index, catalog, spec, locale).build(text)? {
            clauses.push(text_clause);
        }

        SEARCH_METRICS.queries_total.with_label_values(&["text"]).inc();
        self.execute(all_of(clauses).as_ref(), options)
    }

    /// Run a caller-built query
    pub fn search(&self, query: &dyn Query, options: &SearchOptions) -> SearchResult<SearchResponse> {
        SEARCH_METRICS.queries_total.with_label_values(&["structured"]).inc();
        self.execute(query, options)
    }

    /// Similarity matcher analyzing its input like documents of `locale`
    pub fn new_similarity_query(&self, locale: Option<&str>) -> SimilarityQuery {
        SimilarityQuery {
            handle: self.handle.clone(),
            locale: locale.map(str::to_string),
            like: Vec::new(),
            min_word_length: SIMILARITY_MIN_WORD_LENGTH,
            boost_factor: SIMILARITY_BOOST_FACTOR,
        }
    }

    /// Hits grouped by the first stored value of `group_field`
    ///
    /// `max_results` limits the number of groups; the cursor is not used.
    pub fn grouped_search(
        &self,
        group_field: &str,
        query: &dyn Query,
        options: &SearchOptions,
    ) -> SearchResult<GroupedResponse> {
        let resolved = self.catalog().field(group_field)?;
        if !resolved.def.policy.stored {
            return Err(SearchError::QueryFailed(format!(
                "cannot group on {group_field}, it is not stored"
            )));
        }

        SEARCH_METRICS.queries_total.with_label_values(&["grouped"]).inc();
        let searcher = self.handle.searcher();
        let (total_hits, ranked) = self.collect(&searcher, query, &options.sort, None)?;

        let mut groups: Vec<SearchGroup> = Vec::new();
        let mut positions: HashMap<String, usize> = HashMap::new();
        for (key, address) in ranked {
            let hit = self.to_hit(&searcher, key, address)?;
            let Some(value) = hit.first(group_field).cloned() else {
                continue;
            };
            match positions.get(&value.to_string()) {
                Some(&position) => groups[position].hits.push(hit),
                None => {
                    positions.insert(value.to_string(), groups.len());
                    groups.push(SearchGroup {
                        key: value,
                        hits: vec![hit],
                    });
                }
            }
        }

        if let Some(max) = options.max_results {
            groups.truncate(max);
        }
        Ok(GroupedResponse { groups, total_hits })
    }

    /// The document of one record
    ///
    /// Duplicates indicate an inconsistent index; the first one wins.
    pub fn id_lookup(&self, spec: &IndexTypeSpec, id: &str) -> SearchResult<SearchHit> {
        SEARCH_METRICS.queries_total.with_label_values(&["id_lookup"]).inc();
        let searcher = self.handle.searcher();
        let query = uid_query(self.catalog(), &document_uid(&spec.name, id));

        let (count, top) = searcher.search(query.as_ref(), &(Count, TopDocs::with_limit(1)))?;
        let Some((score, address)) = top.into_iter().next() else {
            return Err(SearchError::NotFound {
                type_name: spec.name.clone(),
                id: id.to_string(),
            });
        };
        if count > 1 {
            warn!(
                type_name = %spec.name,
                id,
                count,
                "Duplicate documents for one id, using the first"
            );
        }
        self.to_hit(&searcher, SortKey::Score(score), address)
    }

    pub fn type_filter(&self, type_name: &str) -> Box<dyn Query> {
        type_filter(self.catalog(), type_name)
    }

    pub fn locale_filter(&self, locale: &str) -> Box<dyn Query> {
        locale_filter(self.catalog(), locale)
    }

    pub fn term_filter(&self, field: &str, value: &FieldValue) -> SearchResult<Box<dyn Query>> {
        term_filter(self.catalog(), field, value)
    }

    pub fn date_range_filter(
        &self,
        field: &str,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> SearchResult<Box<dyn Query>> {
        date_range_filter(self.catalog(), field, from, to)
    }

    /// Matches of `query` other than the given record
    pub fn excluding_record(
        &self,
        query: Box<dyn Query>,
        type_name: &str,
        id: &str,
    ) -> Box<dyn Query> {
        Box::new(BooleanQuery::new(vec![
            (Occur::Must, query),
            (
                Occur::MustNot,
                uid_query(self.catalog(), &document_uid(type_name, id)),
            ),
        ]))
    }

    fn execute(&self, query: &dyn Query, options: &SearchOptions) -> SearchResult<SearchResponse> {
        let searcher = self.handle.searcher();
        // one extra hit tells whether another page follows
        let limit = match (options.max_results, options.after) {
            (Some(max), None) => Some(max + 1),
            _ => None,
        };
        let (total_hits, mut ranked) = self.collect(&searcher, query, &options.sort, limit)?;

        if let Some(cursor) = &options.after {
            ranked = after_cursor(&options.sort, ranked, cursor);
        }
        let limit = options.max_results.unwrap_or(ranked.len());
        let has_more = ranked.len() > limit;
        ranked.truncate(limit);

        let hits = ranked
            .into_iter()
            .map(|(key, address)| self.to_hit(&searcher, key, address))
            .collect::<SearchResult<Vec<_>>>()?;
        let next_cursor = if has_more {
            hits.last().map(|hit| hit.cursor)
        } else {
            None
        };

        debug!(total_hits, returned = hits.len(), "Search executed");
        Ok(SearchResponse {
            hits,
            total_hits,
            next_cursor,
        })
    }

    /// Matches in presentation order, at most `limit` of them, plus the total count
    ///
    /// Counting runs in the same pass as ranking: similarity queries only
    /// execute with scoring enabled.
    fn collect(
        &self,
        searcher: &Searcher,
        query: &dyn Query,
        sort: &SearchSort,
        limit: Option<usize>,
    ) -> SearchResult<(usize, Vec<(SortKey, DocAddress)>)> {
        let limit = limit
            .unwrap_or(searcher.num_docs() as usize)
            .max(1);

        let (total, mut ranked): (usize, Vec<(SortKey, DocAddress)>) = match sort {
            SearchSort::Relevance => {
                let (total, top) = searcher.search(query, &(Count, TopDocs::with_limit(limit)))?;
                let ranked = top
                    .into_iter()
                    .map(|(score, address)| (SortKey::Score(score), address))
                    .collect();
                (total, ranked)
            }
            SearchSort::Field { name, order } => {
                let order = match order {
                    SortOrder::Ascending => Order::Asc,
                    SortOrder::Descending => Order::Desc,
                };
                let def = &self.catalog().field(name)?.def;
                if !def.policy.fast {
                    return Err(SearchError::QueryFailed(format!(
                        "cannot sort on {name}, it is not a fast field"
                    )));
                }
                match def.value_type {
                    FieldType::I64 => {
                        let collector = TopDocs::with_limit(limit)
                            .order_by_fast_field::<i64>(name.clone(), order);
                        let (total, top) = searcher.search(query, &(Count, collector))?;
                        let ranked = top
                            .into_iter()
                            .map(|(value, address)| (SortKey::Value(value), address))
                            .collect();
                        (total, ranked)
                    }
                    FieldType::Date => {
                        let collector = TopDocs::with_limit(limit)
                            .order_by_fast_field::<tantivy::DateTime>(name.clone(), order);
                        let (total, top) = searcher.search(query, &(Count, collector))?;
                        let ranked = top
                            .into_iter()
                            .map(|(value, address)| {
                                (SortKey::Value(value.into_timestamp_millis()), address)
                            })
                            .collect();
                        (total, ranked)
                    }
                    FieldType::Text => {
                        return Err(SearchError::QueryFailed(format!(
                            "cannot sort on text field {name}"
                        )))
                    }
                }
            }
        };

        ranked.sort_by(|a, b| compare_hits(sort, *a, *b));
        Ok((total, ranked))
    }

    fn to_hit(&self, searcher: &Searcher, key: SortKey, address: DocAddress) -> SearchResult<SearchHit> {
        let doc: TantivyDocument = searcher.doc(address)?;
        let catalog = self.catalog();
        let system = catalog.system();
        let text_of = |field: Field| {
            doc.get_first(field)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string()
        };

        let mut fields = BTreeMap::new();
        for (name, resolved) in catalog.resolved_fields() {
            if !resolved.def.policy.stored {
                continue;
            }
            let mut values = Vec::new();
            for field in resolved.all_variants() {
                for value in doc.get_all(field) {
                    let converted = match resolved.def.value_type {
                        FieldType::Text => value.as_str().map(|s| FieldValue::Text(s.to_string())),
                        FieldType::I64 => value.as_i64().map(FieldValue::I64),
                        FieldType::Date => value
                            .as_datetime()
                            .and_then(|d| DateTime::from_timestamp_millis(d.into_timestamp_millis()))
                            .map(FieldValue::Date),
                    };
                    values.extend(converted);
                }
            }
            if !values.is_empty() {
                fields.insert(name.to_string(), values);
            }
        }

        Ok(SearchHit {
            type_name: text_of(system.type_name),
            id: text_of(system.id),
            locale: text_of(system.locale),
            score: match key {
                SortKey::Score(score) => Some(score),
                SortKey::Value(_) => None,
            },
            fields,
            cursor: SearchCursor::new(key, address),
        })
    }
}

/// "More like this" matcher bound to one locale's analyzers
pub struct SimilarityQuery {
    handle: Arc<IndexHandle>,
    locale: Option<String>,
    like: Vec<(Field, Vec<OwnedValue>)>,
    min_word_length: usize,
    boost_factor: f32,
}

impl SimilarityQuery {
    /// Add reference text for a field
    pub fn like(mut self, field_name: &str, text: &str) -> SearchResult<Self> {
        let catalog = self.handle.catalog();
        let locale = catalog.analyzers().resolve(self.locale.as_deref());
        let field = catalog.field(field_name)?.for_locale(locale);

        let value = OwnedValue::Str(text.to_string());
        match self.like.iter_mut().find(|(existing, _)| *existing == field) {
            Some((_, values)) => values.push(value),
            None => self.like.push((field, vec![value])),
        }
        Ok(self)
    }

    pub fn min_word_length(&self) -> usize {
        self.min_word_length
    }

    pub fn boost_factor(&self) -> f32 {
        self.boost_factor
    }

    pub fn build(self) -> SearchResult<Box<dyn Query>> {
        if self.like.is_empty() {
            return Err(SearchError::QueryFailed(
                "similarity query without reference text".to_string(),
            ));
        }
        Ok(Box::new(
            MoreLikeThisQuery::builder()
                .with_min_doc_frequency(1)
                .with_min_term_frequency(1)
                .with_min_word_length(self.min_word_length)
                .with_boost_factor(self.boost_factor)
                .with_document_fields(self.like),
        ))
    }
}
