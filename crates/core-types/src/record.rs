use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;

/// Key of the fallback record produced when no parser recognised the page.
pub const RAW_KEY: &str = "raw";
/// Maximum characters kept in a fallback capture.
pub const RAW_CAPTURE_LIMIT: usize = 500;

/// Flat, insertion-ordered field map with an optional identifier field.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Record {
    fields: Vec<(String, String)>,
    id_field: Option<String>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fallback record carrying a truncated textual capture.
    pub fn raw(text: &str) -> Self {
        let mut record = Self::new();
        record.insert(RAW_KEY, truncate_chars(text.trim(), RAW_CAPTURE_LIMIT));
        record
    }

    /// Inserts or replaces `key`, keeping the original position on replace.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(existing, _)| *existing == key) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, value)| value.as_str())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Marks `field` as the well-known identifier of this record.
    pub fn set_id_field(&mut self, field: impl Into<String>) {
        self.id_field = Some(field.into());
    }

    pub fn id_field(&self) -> Option<&str> {
        self.id_field.as_deref()
    }

    pub fn id(&self) -> Option<&str> {
        self.id_field.as_deref().and_then(|field| self.get(field))
    }

    /// True for the `{raw: ..}` fallback shape.
    pub fn is_raw(&self) -> bool {
        self.fields.len() == 1 && self.fields[0].0 == RAW_KEY
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut record = Record::new();
        for (key, value) in iter {
            record.insert(key, value);
        }
        record
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (key, value) in &self.fields {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

/// Aggregated outcome of a (possibly paginated) list fetch.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct FetchResult {
    pub records: Vec<Record>,
    pub total_fetched: usize,
    pub offset: usize,
    pub truncated: bool,
    pub page_count: usize,
}

impl FetchResult {
    /// True when the only record is the raw fallback capture.
    pub fn is_raw_capture(&self) -> bool {
        self.records.len() == 1 && self.records[0].is_raw()
    }
}

pub fn truncate_chars(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}
