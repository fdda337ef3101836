use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of a news item in the store of record
pub type NewsId = i64;

/// Raw value of a news item that has not been through grouping yet
pub const NOT_GROUPED_YET: i64 = -1;

/// Raw value of a news item that was grouped and matched nothing
pub const NO_GROUP: i64 = 0;

/// Cluster tag shared by news items that report the same story
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(from = "i64", into = "i64")]
pub enum NewsGroupId {
    /// Transient state until the grouper has looked at the item
    #[default]
    NotGroupedYet,
    /// Settled, no similar item was found
    NoGroup,
    /// Positive cluster id shared by at least two items
    Group(i64),
}

impl NewsGroupId {
    /// Map a stored integer to a group id; negative values are treated as ungrouped
    pub fn from_raw(raw: i64) -> Self {
        match raw {
            NO_GROUP => Self::NoGroup,
            n if n > 0 => Self::Group(n),
            _ => Self::NotGroupedYet,
        }
    }

    pub fn as_raw(self) -> i64 {
        match self {
            Self::NotGroupedYet => NOT_GROUPED_YET,
            Self::NoGroup => NO_GROUP,
            Self::Group(n) => n,
        }
    }

    /// Positive cluster id, if any
    pub fn group(self) -> Option<i64> {
        match self {
            Self::Group(n) => Some(n),
            _ => None,
        }
    }

    /// Items in this state may be pulled into a group found for another item
    pub fn is_unsettled(self) -> bool {
        matches!(self, Self::NotGroupedYet | Self::NoGroup)
    }
}

impl From<i64> for NewsGroupId {
    fn from(raw: i64) -> Self {
        Self::from_raw(raw)
    }
}

impl From<NewsGroupId> for i64 {
    fn from(id: NewsGroupId) -> Self {
        id.as_raw()
    }
}

impl std::fmt::Display for NewsGroupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_raw())
    }
}

/// A news item as kept in the store of record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct News {
    /// Unique identifier
    pub id: NewsId,

    /// Content source that produced this item
    pub provider_id: i64,

    /// Category inherited from the source
    pub category_id: i64,

    /// Headline
    pub title: String,

    /// Language tag such as `en` or `de-AT`
    pub locale: Option<String>,

    /// Teaser or body text
    pub text: String,

    /// Publication time reported by the source
    pub publish_date: DateTime<Utc>,

    /// Set once the item is visible in the search index
    pub indexed: bool,

    /// Canonical link, also used to detect changed items
    pub link: String,

    pub image_url: Option<String>,
    pub image_width: Option<u32>,
    pub image_height: Option<u32>,

    /// Near-duplicate cluster
    pub news_group_id: NewsGroupId,
}

impl News {
    /// Materialize a freshly fetched draft under the given id
    pub fn from_draft(id: NewsId, draft: NewsDraft) -> Self {
        Self {
            id,
            provider_id: draft.provider_id,
            category_id: draft.category_id,
            title: draft.title,
            locale: draft.locale,
            text: draft.text,
            publish_date: draft.publish_date,
            indexed: false,
            link: draft.link,
            image_url: draft.image_url,
            image_width: draft.image_width,
            image_height: draft.image_height,
            news_group_id: NewsGroupId::NotGroupedYet,
        }
    }

    /// Apply changed content from a re-fetched draft, keeping identity and group
    pub fn apply_draft(&mut self, draft: NewsDraft) {
        self.title = draft.title;
        self.locale = draft.locale;
        self.text = draft.text;
        self.publish_date = draft.publish_date;
        self.image_url = draft.image_url;
        self.image_width = draft.image_width;
        self.image_height = draft.image_height;
        self.indexed = false;
    }
}

/// Content of a news item as one index commit wrote it
#[derive(Debug, Clone, PartialEq)]
pub struct CommittedNews {
    pub id: NewsId,
    pub title: String,
    pub text: String,
    pub locale: Option<String>,
    pub publish_date: DateTime<Utc>,
}

impl CommittedNews {
    pub fn of(news: &News) -> Self {
        Self {
            id: news.id,
            title: news.title.clone(),
            text: news.text.clone(),
            locale: news.locale.clone(),
            publish_date: news.publish_date,
        }
    }

    /// True while the stored item still has the committed content
    pub fn matches(&self, news: &News) -> bool {
        self.id == news.id
            && self.title == news.title
            && self.text == news.text
            && self.locale == news.locale
            && self.publish_date == news.publish_date
    }
}

/// A fetched item before it is persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsDraft {
    pub provider_id: i64,
    pub category_id: i64,
    pub title: String,
    pub locale: Option<String>,
    pub text: String,
    pub publish_date: DateTime<Utc>,
    pub link: String,
    pub image_url: Option<String>,
    pub image_width: Option<u32>,
    pub image_height: Option<u32>,
}

impl NewsDraft {
    /// True when the stored item differs from this draft in any fetched field
    pub fn differs_from(&self, news: &News) -> bool {
        self.title != news.title
            || self.text != news.text
            || self.locale != news.locale
            || self.publish_date != news.publish_date
            || self.image_url != news.image_url
            || self.image_width != news.image_width
            || self.image_height != news.image_height
    }
}
