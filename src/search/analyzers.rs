//! Locale-keyed text analyzers

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tantivy::tokenizer::{
    AsciiFoldingFilter, Language, LowerCaser, RemoveLongFilter, SimpleTokenizer, Stemmer,
    TextAnalyzer,
};

/// Tokenizer name of the analyzer used when a record carries no known locale
pub const DEFAULT_ANALYZER: &str = "newsdesk_default";

/// Locale tag indexed for records without a locale
pub const UNDETERMINED_LOCALE: &str = "und";

/// Tokens longer than this are dropped before indexing
const MAX_TOKEN_LEN: usize = 40;

/// Stemming language of a locale analyzer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalyzerLanguage {
    English,
    German,
}

impl AnalyzerLanguage {
    fn stemmer_language(self) -> Language {
        match self {
            AnalyzerLanguage::English => Language::English,
            AnalyzerLanguage::German => Language::German,
        }
    }
}

/// Registry of the analyzers configured per locale plus the default one
#[derive(Debug, Clone, Default)]
pub struct LocaleAnalyzers {
    by_locale: BTreeMap<String, AnalyzerLanguage>,
}

impl LocaleAnalyzers {
    pub fn new(locales: &BTreeMap<String, AnalyzerLanguage>) -> Self {
        let by_locale = locales
            .iter()
            .map(|(tag, language)| (normalize_locale(tag), *language))
            .collect();
        Self { by_locale }
    }

    /// Locale tags that have a dedicated analyzer
    pub fn locales(&self) -> impl Iterator<Item = &str> {
        self.by_locale.keys().map(String::as_str)
    }

    /// The configured locale matching `locale`, if it has an analyzer
    pub fn resolve(&self, locale: Option<&str>) -> Option<&str> {
        let tag = normalize_locale(locale?);
        self.by_locale
            .get_key_value(tag.as_str())
            .map(|(key, _)| key.as_str())
    }

    /// Register every analyzer with a tantivy index
    pub fn register(&self, index: &tantivy::Index) {
        let tokenizers = index.tokenizers();
        tokenizers.register(DEFAULT_ANALYZER, default_analyzer());
        for (tag, language) in &self.by_locale {
            tokenizers.register(&analyzer_name(tag), language_analyzer(*language));
        }
    }
}

/// Tokenizer name registered for a locale tag
pub fn analyzer_name(locale: &str) -> String {
    format!("newsdesk_{locale}")
}

/// Reduce a locale such as `de-AT` or `DE_de` to its lowercase language part
pub fn normalize_locale(locale: &str) -> String {
    locale
        .split(['-', '_'])
        .next()
        .unwrap_or_default()
        .trim()
        .to_lowercase()
}

/// Locale tag stored with a document
pub fn document_locale(locale: Option<&str>) -> String {
    match locale.map(normalize_locale) {
        Some(tag) if !tag.is_empty() => tag,
        _ => UNDETERMINED_LOCALE.to_string(),
    }
}

fn default_analyzer() -> TextAnalyzer {
    TextAnalyzer::builder(SimpleTokenizer::default())
        .filter(RemoveLongFilter::limit(MAX_TOKEN_LEN))
        .filter(LowerCaser)
        .build()
}

fn language_analyzer(language: AnalyzerLanguage) -> TextAnalyzer {
    TextAnalyzer::builder(SimpleTokenizer::default())
        .filter(RemoveLongFilter::limit(MAX_TOKEN_LEN))
        .filter(LowerCaser)
        .filter(AsciiFoldingFilter)
        .filter(Stemmer::new(language.stemmer_language()))
        .build()
}
