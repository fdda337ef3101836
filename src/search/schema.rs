//! Indexable record types, type specs and the tantivy schema built from them

use crate::search::analyzers::{analyzer_name, LocaleAnalyzers, DEFAULT_ANALYZER};
use crate::search::error::{SearchError, SearchResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use strum::Display;
use tantivy::schema::{
    DateOptions, Field, IndexRecordOption, NumericOptions, Schema, TextFieldIndexing,
    TextOptions, STORED, STRING,
};

/// Unique key of a document: `type:id`
pub const UID_FIELD: &str = "_uid";
/// Record id within its type
pub const ID_FIELD: &str = "_id";
/// Type spec name
pub const TYPE_FIELD: &str = "_type";
/// Normalized locale tag
pub const LOCALE_FIELD: &str = "_locale";

/// Separator between a field name and its locale variant
const LOCALE_SEPARATOR: &str = "__";

/// Value type of an indexed field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
pub enum FieldType {
    Text,
    I64,
    Date,
}

/// How a field is written into the index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldPolicy {
    pub indexed: bool,
    pub stored: bool,
    /// Run text through the locale analyzer instead of indexing it verbatim
    pub tokenized: bool,
    /// Column-oriented storage, needed for sorting
    pub fast: bool,
}

impl FieldPolicy {
    /// Analyzed full text, stored
    pub const TEXT: Self = Self {
        indexed: true,
        stored: true,
        tokenized: true,
        fast: false,
    };

    /// Exact-match value, stored
    pub const KEYWORD: Self = Self {
        indexed: true,
        stored: true,
        tokenized: false,
        fast: false,
    };

    /// Exact-match, stored and sortable
    pub const SORTABLE: Self = Self {
        indexed: true,
        stored: true,
        tokenized: false,
        fast: true,
    };

    /// Carried along for display only
    pub const STORED_ONLY: Self = Self {
        indexed: false,
        stored: true,
        tokenized: false,
        fast: false,
    };
}

/// Definition of one field of an indexable type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    pub value_type: FieldType,
    pub policy: FieldPolicy,
    /// Query-time weight of matches in this field
    pub boost: f32,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, value_type: FieldType, policy: FieldPolicy) -> Self {
        Self {
            name: name.into(),
            value_type,
            policy,
            boost: 1.0,
        }
    }

    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Text, FieldPolicy::TEXT)
    }

    pub fn keyword(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Text, FieldPolicy::KEYWORD)
    }

    pub fn with_boost(mut self, boost: f32) -> Self {
        self.boost = boost;
        self
    }

    /// Whether text queries should look at this field
    pub fn is_searchable_text(&self) -> bool {
        self.value_type == FieldType::Text && self.policy.indexed
    }

    fn same_layout(&self, other: &FieldDef) -> bool {
        self.value_type == other.value_type && self.policy == other.policy
    }
}

/// A single field value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    Text(String),
    I64(i64),
    Date(DateTime<Utc>),
}

impl FieldValue {
    pub fn field_type(&self) -> FieldType {
        match self {
            FieldValue::Text(_) => FieldType::Text,
            FieldValue::I64(_) => FieldType::I64,
            FieldValue::Date(_) => FieldType::Date,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::I64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<DateTime<Utc>> {
        match self {
            FieldValue::Date(d) => Some(*d),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Text(s) => f.write_str(s),
            FieldValue::I64(v) => write!(f, "{v}"),
            FieldValue::Date(d) => write!(f, "{}", d.to_rfc3339()),
        }
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::I64(value)
    }
}

impl From<u32> for FieldValue {
    fn from(value: u32) -> Self {
        FieldValue::I64(i64::from(value))
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(value: DateTime<Utc>) -> Self {
        FieldValue::Date(value)
    }
}

/// Kind of change a record represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[strum(serialize_all = "UPPERCASE")]
pub enum Operation {
    Insert,
    Update,
    Delete,
}

/// One entity to be written to, or removed from, the index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexableRecord {
    pub id: String,
    pub locale: Option<String>,
    pub operation: Operation,
    pub fields: BTreeMap<String, Vec<FieldValue>>,
}

impl IndexableRecord {
    pub fn new(id: impl Into<String>, operation: Operation) -> Self {
        Self {
            id: id.into(),
            locale: None,
            operation,
            fields: BTreeMap::new(),
        }
    }

    pub fn insert(id: impl Into<String>) -> Self {
        Self::new(id, Operation::Insert)
    }

    pub fn update(id: impl Into<String>) -> Self {
        Self::new(id, Operation::Update)
    }

    pub fn delete(id: impl Into<String>) -> Self {
        Self::new(id, Operation::Delete)
    }

    pub fn with_locale(mut self, locale: Option<impl Into<String>>) -> Self {
        self.locale = locale.map(Into::into);
        self
    }

    /// Append a value to a field
    pub fn with_field(mut self, name: &str, value: impl Into<FieldValue>) -> Self {
        self.fields
            .entry(name.to_string())
            .or_default()
            .push(value.into());
        self
    }

    /// Append a value if present; absent values are not indexed
    pub fn with_optional<V: Into<FieldValue>>(self, name: &str, value: Option<V>) -> Self {
        match value {
            Some(value) => self.with_field(name, value),
            None => self,
        }
    }

    /// Append every value of a multi-valued field
    pub fn with_values<V, I>(mut self, name: &str, values: I) -> Self
    where
        V: Into<FieldValue>,
        I: IntoIterator<Item = V>,
    {
        let entry = self.fields.entry(name.to_string()).or_default();
        entry.extend(values.into_iter().map(Into::into));
        self
    }

    pub fn values(&self, name: &str) -> &[FieldValue] {
        self.fields.get(name).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn first_i64(&self, name: &str) -> Option<i64> {
        self.values(name).iter().find_map(FieldValue::as_i64)
    }

    pub fn first_text(&self, name: &str) -> Option<&str> {
        self.values(name).iter().find_map(FieldValue::as_str)
    }

    pub fn first_date(&self, name: &str) -> Option<DateTime<Utc>> {
        self.values(name).iter().find_map(FieldValue::as_date)
    }
}

/// Pages through every record of a type for a full reindex
#[async_trait]
pub trait RecordProvider: Send + Sync {
    async fn fetch_chunk(
        &self,
        offset: usize,
        limit: usize,
    ) -> crate::error::Result<Vec<IndexableRecord>>;
}

/// Called on the indexing thread after a batch of the type was committed
pub trait PostIndexHook: Send + Sync {
    fn after_commit(&self, batch: &IndexMutationBatch);
}

/// Declares a class of indexable entity
pub struct IndexTypeSpec {
    pub name: String,
    pub fields: Vec<FieldDef>,
    provider: Option<Arc<dyn RecordProvider>>,
    post_index: Option<Arc<dyn PostIndexHook>>,
}

impl IndexTypeSpec {
    pub fn new(name: impl Into<String>, fields: Vec<FieldDef>) -> Self {
        Self {
            name: name.into(),
            fields,
            provider: None,
            post_index: None,
        }
    }

    pub fn with_provider(mut self, provider: Arc<dyn RecordProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_post_index_hook(mut self, hook: Arc<dyn PostIndexHook>) -> Self {
        self.post_index = Some(hook);
        self
    }

    pub fn provider(&self) -> Option<&Arc<dyn RecordProvider>> {
        self.provider.as_ref()
    }

    pub fn post_index_hook(&self) -> Option<&Arc<dyn PostIndexHook>> {
        self.post_index.as_ref()
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Indexed text fields, the ones free-text search runs against
    pub fn searchable_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.iter().filter(|f| f.is_searchable_text())
    }
}

impl fmt::Debug for IndexTypeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexTypeSpec")
            .field("name", &self.name)
            .field("fields", &self.fields)
            .field("provider", &self.provider.is_some())
            .field("post_index", &self.post_index.is_some())
            .finish()
    }
}

/// Records of one type applied and committed together
#[derive(Debug, Clone)]
pub struct IndexMutationBatch {
    pub type_spec: Arc<IndexTypeSpec>,
    pub records: Vec<IndexableRecord>,
}

impl IndexMutationBatch {
    pub fn new(type_spec: Arc<IndexTypeSpec>, records: Vec<IndexableRecord>) -> Self {
        Self { type_spec, records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// A field definition resolved against the tantivy schema
#[derive(Debug, Clone)]
pub struct ResolvedField {
    pub def: FieldDef,
    /// Variant written when the record has no analyzer-backed locale
    pub default: Field,
    /// Per-locale variants of tokenized fields
    pub localized: BTreeMap<String, Field>,
}

impl ResolvedField {
    /// The variant a record with `locale` is written into
    pub fn for_locale(&self, locale: Option<&str>) -> Field {
        locale
            .and_then(|tag| self.localized.get(tag))
            .copied()
            .unwrap_or(self.default)
    }

    /// Every variant, default first
    pub fn all_variants(&self) -> impl Iterator<Item = Field> + '_ {
        std::iter::once(self.default).chain(self.localized.values().copied())
    }
}

/// Handles of the system fields
#[derive(Debug, Clone, Copy)]
pub struct SystemFields {
    pub uid: Field,
    pub id: Field,
    pub type_name: Field,
    pub locale: Field,
}

/// Maps type-spec field names to tantivy fields
#[derive(Debug, Clone)]
pub struct FieldCatalog {
    schema: Schema,
    system: SystemFields,
    fields: HashMap<String, ResolvedField>,
    analyzers: LocaleAnalyzers,
}

impl FieldCatalog {
    /// Build one schema covering every registered type
    pub fn build(types: &[Arc<IndexTypeSpec>], analyzers: LocaleAnalyzers) -> SearchResult<Self> {
        let mut merged: BTreeMap<String, FieldDef> = BTreeMap::new();
        for spec in types {
            for def in &spec.fields {
                if def.name.starts_with('_') || def.name.contains(LOCALE_SEPARATOR) {
                    return Err(SearchError::SchemaError(format!(
                        "field name {} of type {} is reserved",
                        def.name, spec.name
                    )));
                }
                match merged.get(&def.name) {
                    Some(existing) if !existing.same_layout(def) => {
                        return Err(SearchError::SchemaError(format!(
                            "field {} of type {} conflicts with an earlier definition",
                            def.name, spec.name
                        )));
                    }
                    Some(_) => {}
                    None => {
                        merged.insert(def.name.clone(), def.clone());
                    }
                }
            }
        }

        let mut builder = Schema::builder();
        let uid = builder.add_text_field(UID_FIELD, STRING | STORED);
        let id = builder.add_text_field(ID_FIELD, STRING | STORED);
        let type_name = builder.add_text_field(TYPE_FIELD, STRING | STORED);
        let locale = builder.add_text_field(LOCALE_FIELD, STRING | STORED);

        let mut fields = HashMap::new();
        for (name, def) in merged {
            let resolved = match def.value_type {
                FieldType::Text if def.policy.tokenized => {
                    let default = builder.add_text_field(&name, analyzed_options(&def, DEFAULT_ANALYZER));
                    let localized = analyzers
                        .locales()
                        .map(|tag| {
                            let variant = format!("{name}{LOCALE_SEPARATOR}{tag}");
                            let field = builder
                                .add_text_field(&variant, analyzed_options(&def, &analyzer_name(tag)));
                            (tag.to_string(), field)
                        })
                        .collect();
                    ResolvedField {
                        def,
                        default,
                        localized,
                    }
                }
                FieldType::Text => ResolvedField {
                    default: builder.add_text_field(&name, keyword_options(&def)),
                    def,
                    localized: BTreeMap::new(),
                },
                FieldType::I64 => ResolvedField {
                    default: builder.add_i64_field(&name, numeric_options(&def)),
                    def,
                    localized: BTreeMap::new(),
                },
                FieldType::Date => ResolvedField {
                    default: builder.add_date_field(&name, date_options(&def)),
                    def,
                    localized: BTreeMap::new(),
                },
            };
            fields.insert(name, resolved);
        }

        Ok(Self {
            schema: builder.build(),
            system: SystemFields {
                uid,
                id,
                type_name,
                locale,
            },
            fields,
            analyzers,
        })
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn system(&self) -> SystemFields {
        self.system
    }

    pub fn analyzers(&self) -> &LocaleAnalyzers {
        &self.analyzers
    }

    pub fn field(&self, name: &str) -> SearchResult<&ResolvedField> {
        self.fields
            .get(name)
            .ok_or_else(|| SearchError::SchemaError(format!("unknown field {name}")))
    }

    /// Reverse lookup from any variant to its type-spec field name
    pub fn name_of(&self, field: Field) -> Option<&str> {
        self.fields
            .iter()
            .find(|(_, resolved)| resolved.all_variants().any(|f| f == field))
            .map(|(name, _)| name.as_str())
    }

    pub fn resolved_fields(&self) -> impl Iterator<Item = (&str, &ResolvedField)> {
        self.fields.iter().map(|(name, f)| (name.as_str(), f))
    }
}

/// Document key shared by every operation on a record
pub fn document_uid(type_name: &str, id: &str) -> String {
    format!("{type_name}:{id}")
}

fn analyzed_options(def: &FieldDef, tokenizer: &str) -> TextOptions {
    let mut options = TextOptions::default();
    if def.policy.indexed {
        options = options.set_indexing_options(
            TextFieldIndexing::default()
                .set_tokenizer(tokenizer)
                .set_index_option(IndexRecordOption::WithFreqsAndPositions),
        );
    }
    if def.policy.stored {
        options = options.set_stored();
    }
    options
}

fn keyword_options(def: &FieldDef) -> TextOptions {
    let mut options = TextOptions::default();
    if def.policy.indexed {
        options = options.set_indexing_options(
            TextFieldIndexing::default()
                .set_tokenizer("raw")
                .set_index_option(IndexRecordOption::Basic),
        );
    }
    if def.policy.stored {
        options = options.set_stored();
    }
    if def.policy.fast {
        options = options.set_fast(None);
    }
    options
}

fn numeric_options(def: &FieldDef) -> NumericOptions {
    let mut options = NumericOptions::default();
    if def.policy.indexed {
        options = options.set_indexed();
    }
    if def.policy.stored {
        options = options.set_stored();
    }
    if def.policy.fast {
        options = options.set_fast();
    }
    options
}

fn date_options(def: &FieldDef) -> DateOptions {
    let mut options = DateOptions::default();
    if def.policy.indexed {
        options = options.set_indexed();
    }
    if def.policy.stored {
        options = options.set_stored();
    }
    if def.policy.fast {
        options = options.set_fast();
    }
    options
}
