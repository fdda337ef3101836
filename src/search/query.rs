//! Search options, result cursors and query building

use crate::search::analyzers::document_locale;
use crate::search::error::{SearchError, SearchResult};
use crate::search::schema::{FieldCatalog, FieldValue, IndexTypeSpec};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::ops::Bound;
use tantivy::query::{
    AllQuery, BooleanQuery, BoostQuery, ConstScoreQuery, FuzzyTermQuery, Occur, PhraseQuery,
    Query, RangeQuery, TermQuery,
};
use tantivy::schema::{Field, IndexRecordOption};
use tantivy::tokenizer::TokenStream;
use tantivy::{DocAddress, Index, Term};

/// Weight of a prefix match relative to the field boost
const PREFIX_WEIGHT: f32 = 0.7;
/// Weight of a fuzzy match relative to the field boost
const FUZZY_WEIGHT: f32 = 0.5;
/// Weight of the lowercase and capitalized variants of the input
const CASE_VARIANT_WEIGHT: f32 = 0.8;
/// Tokens shorter than this are not matched fuzzily
const MIN_FUZZY_LEN: usize = 3;

/// Sort order for search results
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// Ordering of search results
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum SearchSort {
    #[default]
    Relevance,
    /// Sort on a fast i64 or date field
    Field { name: String, order: SortOrder },
}

impl SearchSort {
    pub fn field(name: impl Into<String>, order: SortOrder) -> Self {
        Self::Field {
            name: name.into(),
            order,
        }
    }
}

/// Ordering value of a hit
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum SortKey {
    Score(f32),
    Value(i64),
}

/// Position of a hit in a result list, used to resume after it
///
/// Doc addresses are only stable within one reader snapshot, so paging is
/// exact as long as no commit happens between pages.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SearchCursor {
    pub key: SortKey,
    pub segment_ord: u32,
    pub doc_id: u32,
}

impl SearchCursor {
    pub(crate) fn new(key: SortKey, address: DocAddress) -> Self {
        Self {
            key,
            segment_ord: address.segment_ord,
            doc_id: address.doc_id,
        }
    }

    fn address(&self) -> DocAddress {
        DocAddress::new(self.segment_ord, self.doc_id)
    }
}

/// Paging and ordering of a search
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchOptions {
    /// Maximum number of hits; all matches when unset
    pub max_results: Option<usize>,

    pub sort: SearchSort,

    /// Resume after this hit
    pub after: Option<SearchCursor>,
}

impl SearchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = Some(max_results);
        self
    }

    pub fn with_sort(mut self, sort: SearchSort) -> Self {
        self.sort = sort;
        self
    }

    pub fn after(mut self, cursor: SearchCursor) -> Self {
        self.after = Some(cursor);
        self
    }
}

/// Order two hits the way `sort` presents them; ties go to the lower doc address
pub(crate) fn compare_hits(
    sort: &SearchSort,
    a: (SortKey, DocAddress),
    b: (SortKey, DocAddress),
) -> Ordering {
    let by_key = match (a.0, b.0) {
        (SortKey::Score(x), SortKey::Score(y)) => y.total_cmp(&x),
        (SortKey::Value(x), SortKey::Value(y)) => match sort {
            SearchSort::Field {
                order: SortOrder::Ascending,
                ..
            } => x.cmp(&y),
            _ => y.cmp(&x),
        },
        (SortKey::Score(_), SortKey::Value(_)) => Ordering::Greater,
        (SortKey::Value(_), SortKey::Score(_)) => Ordering::Less,
    };
    by_key.then_with(|| a.1.cmp(&b.1))
}

/// Keep the hits that come strictly after `cursor`
pub(crate) fn after_cursor(
    sort: &SearchSort,
    hits: Vec<(SortKey, DocAddress)>,
    cursor: &SearchCursor,
) -> Vec<(SortKey, DocAddress)> {
    let position = (cursor.key, cursor.address());
    hits.into_iter()
        .filter(|hit| compare_hits(sort, *hit, position) == Ordering::Greater)
        .collect()
}

/// Wrap a query so it only filters, contributing nothing to the score
pub fn filter(query: Box<dyn Query>) -> Box<dyn Query> {
    Box::new(ConstScoreQuery::new(query, 0.0))
}

/// All given queries must match; an empty list matches everything
pub fn all_of(queries: Vec<Box<dyn Query>>) -> Box<dyn Query> {
    if queries.is_empty() {
        return Box::new(AllQuery);
    }
    Box::new(BooleanQuery::new(
        queries.into_iter().map(|q| (Occur::Must, q)).collect(),
    ))
}

/// At least one of the given queries must match
pub fn any_of(queries: Vec<Box<dyn Query>>) -> Box<dyn Query> {
    Box::new(BooleanQuery::new(
        queries.into_iter().map(|q| (Occur::Should, q)).collect(),
    ))
}

pub(crate) fn type_filter(catalog: &FieldCatalog, type_name: &str) -> Box<dyn Query> {
    let term = Term::from_field_text(catalog.system().type_name, type_name);
    filter(Box::new(TermQuery::new(term, IndexRecordOption::Basic)))
}

pub(crate) fn locale_filter(catalog: &FieldCatalog, locale: &str) -> Box<dyn Query> {
    let term = Term::from_field_text(catalog.system().locale, &document_locale(Some(locale)));
    filter(Box::new(TermQuery::new(term, IndexRecordOption::Basic)))
}

pub(crate) fn uid_query(catalog: &FieldCatalog, uid: &str) -> Box<dyn Query> {
    let term = Term::from_field_text(catalog.system().uid, uid);
    filter(Box::new(TermQuery::new(term, IndexRecordOption::Basic)))
}

/// Exact value of a keyword or numeric field
pub(crate) fn term_filter(
    catalog: &FieldCatalog,
    field_name: &str,
    value: &FieldValue,
) -> SearchResult<Box<dyn Query>> {
    let field = catalog.field(field_name)?.default;
    let term = match value {
        FieldValue::Text(text) => Term::from_field_text(field, text),
        FieldValue::I64(number) => Term::from_field_i64(field, *number),
        FieldValue::Date(_) => {
            return Err(SearchError::QueryFailed(format!(
                "use a date range to filter on {field_name}"
            )))
        }
    };
    Ok(filter(Box::new(TermQuery::new(term, IndexRecordOption::Basic))))
}

/// Dates in `[from, to]`, either end open when unset
pub(crate) fn date_range_filter(
    catalog: &FieldCatalog,
    field_name: &str,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
) -> SearchResult<Box<dyn Query>> {
    catalog.field(field_name)?;
    let bound = |date: Option<DateTime<Utc>>| match date {
        Some(date) => Bound::Included(tantivy::DateTime::from_timestamp_millis(
            date.timestamp_millis(),
        )),
        None => Bound::Unbounded,
    };
    Ok(filter(Box::new(RangeQuery::new_date_bounds(
        field_name.to_string(),
        bound(from),
        bound(to),
    ))))
}

/// Builds the free-text clause for one type
pub(crate) struct TextQueryBuilder<'a> {
    index: &'a Index,
    catalog: &'a FieldCatalog,
    spec: &'a IndexTypeSpec,
    locale: Option<&'a str>,
}

impl<'a> TextQueryBuilder<'a> {
    pub(crate) fn new(
        index: &'a Index,
        catalog: &'a FieldCatalog,
        spec: &'a IndexTypeSpec,
        locale: Option<&'a str>,
    ) -> Self {
        Self {
            index,
            catalog,
            spec,
            locale,
        }
    }

    /// `None` for blank text
    pub(crate) fn build(&self, text: &str) -> SearchResult<Option<Box<dyn Query>>> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(None);
        }

        let fields = self.target_fields()?;
        let mut variants: Vec<Box<dyn Query>> = Vec::new();
        for (variant, weight) in case_variants(text) {
            if let Some(query) = self.variant_clause(&variant, &fields)? {
                variants.push(boosted(query, weight));
            }
        }

        if variants.is_empty() {
            return Ok(None);
        }
        Ok(Some(any_of(variants)))
    }

    /// Field variants to match against, with their boost
    fn target_fields(&self) -> SearchResult<Vec<(Field, f32)>> {
        let analyzer_locale = self.catalog.analyzers().resolve(self.locale);
        let mut fields = Vec::new();
        for def in self.spec.searchable_fields() {
            let resolved = self.catalog.field(&def.name)?;
            match analyzer_locale {
                Some(_) => fields.push((resolved.for_locale(analyzer_locale), def.boost)),
                None => fields.extend(resolved.all_variants().map(|f| (f, def.boost))),
            }
        }
        Ok(fields)
    }

    fn variant_clause(
        &self,
        text: &str,
        fields: &[(Field, f32)],
    ) -> SearchResult<Option<Box<dyn Query>>> {
        let mut clauses: Vec<Box<dyn Query>> = Vec::new();

        let mut whole: Vec<Box<dyn Query>> = Vec::new();
        for &(field, boost) in fields {
            if let Some(query) = self.whole_string(field, text)? {
                whole.push(boosted(query, boost));
            }
        }
        if !whole.is_empty() {
            clauses.push(any_of(whole));
        }

        let mut per_token: Vec<Box<dyn Query>> = Vec::new();
        for token in text.split_whitespace() {
            let mut alternatives: Vec<Box<dyn Query>> = Vec::new();
            for &(field, boost) in fields {
                alternatives.extend(self.token_alternatives(field, token, boost)?);
            }
            if !alternatives.is_empty() {
                per_token.push(any_of(alternatives));
            }
        }
        if !per_token.is_empty() {
            clauses.push(all_of(per_token));
        }

        if clauses.is_empty() {
            return Ok(None);
        }
        Ok(Some(any_of(clauses)))
    }

    /// The whole input as a phrase, or a term when it analyzes to one token
    fn whole_string(&self, field: Field, text: &str) -> SearchResult<Option<Box<dyn Query>>> {
        let tokens = self.analyze(field, text)?;
        Ok(match tokens.as_slice() {
            [] => None,
            [token] => Some(self.term_query(field, token)),
            _ => Some(Box::new(PhraseQuery::new(
                tokens
                    .iter()
                    .map(|token| Term::from_field_text(field, token))
                    .collect(),
            ))),
        })
    }

    /// Exact, prefix and fuzzy matches of one whitespace token
    fn token_alternatives(
        &self,
        field: Field,
        token: &str,
        boost: f32,
    ) -> SearchResult<Vec<Box<dyn Query>>> {
        let tokens = self.analyze(field, token)?;
        let mut alternatives: Vec<Box<dyn Query>> = Vec::new();
        match tokens.as_slice() {
            [] => {}
            [token] => {
                let term = Term::from_field_text(field, token);
                alternatives.push(boosted(self.term_query(field, token), boost));
                alternatives.push(boosted(
                    Box::new(FuzzyTermQuery::new_prefix(term.clone(), 0, true)),
                    boost * PREFIX_WEIGHT,
                ));
                if let Some(distance) = fuzzy_distance(token.chars().count()) {
                    alternatives.push(boosted(
                        Box::new(FuzzyTermQuery::new(term, distance, true)),
                        boost * FUZZY_WEIGHT,
                    ));
                }
            }
            parts => {
                // a token such as "e-mail" that the analyzer splits further
                let parts = parts
                    .iter()
                    .map(|part| self.term_query(field, part))
                    .collect();
                alternatives.push(boosted(all_of(parts), boost));
            }
        }
        Ok(alternatives)
    }

    fn term_query(&self, field: Field, token: &str) -> Box<dyn Query> {
        let with_freqs = match self.catalog.schema().get_field_entry(field).field_type() {
            tantivy::schema::FieldType::Str(options) => options
                .get_indexing_options()
                .map(|indexing| indexing.index_option().has_freq())
                .unwrap_or(false),
            _ => false,
        };
        let option = if with_freqs {
            IndexRecordOption::WithFreqs
        } else {
            IndexRecordOption::Basic
        };
        Box::new(TermQuery::new(Term::from_field_text(field, token), option))
    }

    fn analyze(&self, field: Field, text: &str) -> SearchResult<Vec<String>> {
        let mut analyzer = self.index.tokenizer_for_field(field)?;
        let mut stream = analyzer.token_stream(text);
        let mut tokens = Vec::new();
        while stream.advance() {
            tokens.push(stream.token().text.clone());
        }
        Ok(tokens)
    }
}

/// Original text, then its lowercase and capitalized forms when they differ
fn case_variants(text: &str) -> Vec<(String, f32)> {
    let mut variants = vec![(text.to_string(), 1.0)];
    for candidate in [text.to_lowercase(), capitalize(text)] {
        if variants.iter().all(|(existing, _)| *existing != candidate) {
            variants.push((candidate, CASE_VARIANT_WEIGHT));
        }
    }
    variants
}

fn capitalize(text: &str) -> String {
    let lower = text.to_lowercase();
    let mut chars = lower.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn fuzzy_distance(len: usize) -> Option<u8> {
    match len {
        0..MIN_FUZZY_LEN => None,
        MIN_FUZZY_LEN..=5 => Some(1),
        _ => Some(2),
    }
}

fn boosted(query: Box<dyn Query>, boost: f32) -> Box<dyn Query> {
    if (boost - 1.0).abs() < f32::EPSILON {
        query
    } else {
        Box::new(BoostQuery::new(query, boost))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_variants_are_deduplicated() {
        let variants = case_variants("java");
        assert_eq!(variants.len(), 2);
        assert_eq!(variants[0], ("java".to_string(), 1.0));
        assert_eq!(variants[1].0, "Java");

        let variants = case_variants("JAVA news");
        assert_eq!(variants.len(), 3);
        assert_eq!(variants[1].0, "java news");
        assert_eq!(variants[2].0, "Java news");
    }

    #[test]
    fn test_fuzzy_distance_grows_with_length() {
        assert_eq!(fuzzy_distance(2), None);
        assert_eq!(fuzzy_distance(3), Some(1));
        assert_eq!(fuzzy_distance(5), Some(1));
        assert_eq!(fuzzy_distance(9), Some(2));
    }

    #[test]
    fn test_hit_ordering_and_cursor() {
        let sort = SearchSort::Relevance;
        let a = (SortKey::Score(2.0), DocAddress::new(0, 5));
        let b = (SortKey::Score(2.0), DocAddress::new(0, 7));
        let c = (SortKey::Score(1.0), DocAddress::new(0, 1));
        assert_eq!(compare_hits(&sort, a, b), Ordering::Less);
        assert_eq!(compare_hits(&sort, b, c), Ordering::Less);

        let cursor = SearchCursor::new(a.0, a.1);
        let rest = after_cursor(&sort, vec![a, b, c], &cursor);
        assert_eq!(rest, vec![b, c]);
    }

    #[test]
    fn test_field_sort_ascending() {
        let sort = SearchSort::field("rank", SortOrder::Ascending);
        let low = (SortKey::Value(1), DocAddress::new(0, 9));
        let high = (SortKey::Value(5), DocAddress::new(0, 0));
        assert_eq!(compare_hits(&sort, low, high), Ordering::Less);
    }
}
