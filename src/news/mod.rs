//! News as an indexable type

mod document;

pub use document::{
    news_fields, news_record, news_type_spec, NewsIndexHook, NewsRecordProvider,
    CATEGORY_ID_FIELD, IMAGE_URL_FIELD, LINK_FIELD, NEWS_GROUP_ID_FIELD, NEWS_TYPE,
    PROVIDER_ID_FIELD, PUBLISH_DATE_FIELD, TEXT_FIELD, TITLE_FIELD,
};
