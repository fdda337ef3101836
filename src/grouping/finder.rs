//! Candidate search for near-duplicate news

use crate::error::Result;
use crate::grouping::config::GroupingConfig;
use crate::models::{News, NewsId};
use crate::news::{
    CATEGORY_ID_FIELD, NEWS_GROUP_ID_FIELD, NEWS_TYPE, PUBLISH_DATE_FIELD, TEXT_FIELD,
    TITLE_FIELD,
};
use crate::search::{
    all_of, document_locale, FieldValue, IndexSearch, SearchOptions, SearchResult, SearchSort,
    SortOrder,
};
use crate::state::NewsStore;
use std::collections::HashMap;
use std::sync::Arc;
use tantivy::query::Query;
use tracing::debug;

/// A candidate together with its similarity score
#[derive(Debug, Clone)]
pub struct ScoredNews {
    pub news: News,
    pub score: f32,
}

/// Keep the entries scoring at least `min_score`, in their given order
pub fn above_threshold<T>(scored: Vec<(T, f32)>, min_score: f32) -> Vec<(T, f32)> {
    scored
        .into_iter()
        .filter(|(_, score)| *score >= min_score)
        .collect()
}

/// Finds indexed news that report the same story as a given item
pub struct SimilarNewsFinder {
    search: IndexSearch,
    store: Arc<dyn NewsStore>,
    min_score: f32,
    window: chrono::Duration,
}

impl SimilarNewsFinder {
    pub fn new(search: IndexSearch, store: Arc<dyn NewsStore>, config: &GroupingConfig) -> Self {
        Self {
            search,
            store,
            min_score: config.min_score,
            window: config.publish_window(),
        }
    }

    /// Same type, locale and category, published within the window, similar
    /// in title and text, and not the item itself
    ///
    /// The filters score zero, so ranking is by similarity alone. `None` when
    /// the item has no text to compare.
    pub fn similarity_query(&self, news: &News) -> SearchResult<Option<Box<dyn Query>>> {
        let mut similarity = self.search.new_similarity_query(news.locale.as_deref());
        let mut has_text = false;
        for (field, text) in [(TITLE_FIELD, &news.title), (TEXT_FIELD, &news.text)] {
            if !text.trim().is_empty() {
                similarity = similarity.like(field, text)?;
                has_text = true;
            }
        }
        if !has_text {
            return Ok(None);
        }

        let query = all_of(vec![
            self.search.type_filter(NEWS_TYPE),
            self.search
                .locale_filter(&document_locale(news.locale.as_deref())),
            self.search
                .term_filter(CATEGORY_ID_FIELD, &FieldValue::I64(news.category_id))?,
            self.search.date_range_filter(
                PUBLISH_DATE_FIELD,
                Some(news.publish_date - self.window),
                Some(news.publish_date + self.window),
            )?,
            similarity.build()?,
        ]);
        Ok(Some(self.search.excluding_record(
            query,
            NEWS_TYPE,
            &news.id.to_string(),
        )))
    }

    /// Candidates scoring at least the minimum, best first
    ///
    /// Items the store no longer has, or has not marked indexed, are left out.
    pub async fn find_similar(&self, news: &News) -> Result<Vec<ScoredNews>> {
        let Some(query) = self.similarity_query(news)? else {
            return Ok(Vec::new());
        };
        let response = self.search.search(query.as_ref(), &SearchOptions::default())?;

        let scored: Vec<(NewsId, f32)> = response
            .hits
            .iter()
            .filter_map(|hit| Some((hit.id.parse::<NewsId>().ok()?, hit.score?)))
            .collect();
        let candidates = above_threshold(scored, self.min_score);
        debug!(
            news_id = news.id,
            hits = response.total_hits,
            candidates = candidates.len(),
            "Similarity search done"
        );
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let scores: HashMap<NewsId, f32> = candidates.iter().copied().collect();
        let ids: Vec<NewsId> = candidates.iter().map(|(id, _)| *id).collect();
        Ok(self
            .store
            .get_news_many(&ids)
            .await?
            .into_iter()
            .filter(|candidate| candidate.indexed)
            .filter_map(|candidate| {
                let score = *scores.get(&candidate.id)?;
                Some(ScoredNews {
                    news: candidate,
                    score,
                })
            })
            .collect())
    }

    /// All news of a group as the index sees them, newest first
    pub async fn group_members(&self, group_id: i64) -> Result<Vec<News>> {
        let query = all_of(vec![
            self.search.type_filter(NEWS_TYPE),
            self.search
                .term_filter(NEWS_GROUP_ID_FIELD, &FieldValue::I64(group_id))?,
        ]);
        let options = SearchOptions::default()
            .with_sort(SearchSort::field(PUBLISH_DATE_FIELD, SortOrder::Descending));
        let response = self.search.search(query.as_ref(), &options)?;

        let ids: Vec<NewsId> = response
            .hits
            .iter()
            .filter_map(|hit| hit.id.parse().ok())
            .collect();
        self.store.get_news_many(&ids).await
    }
}
