//! Case-insensitive, single-valued header map.
//!
//! Used for the canonical request headers and for the header maps nested
//! inside the response envelope. Keys compare without regard to ASCII case;
//! each key holds exactly one value.

use std::collections::BTreeMap;

use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Header map with case-insensitive keys and a single value per key.
///
/// The spelling of the most recent insert is kept for output. Iteration and
/// serialization are ordered by the case-folded key, so two maps holding the
/// same headers always serialize to the same JSON.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    /// Folded key -> (original spelling, value).
    entries: BTreeMap<String, (String, String)>,
}

impl Headers {
    /// Creates an empty header map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a header, replacing any existing value under the same
    /// case-insensitive name. Returns the replaced value.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) -> Option<String> {
        let name = name.into();
        self.entries
            .insert(name.to_ascii_lowercase(), (name, value.into()))
            .map(|(_, old)| old)
    }

    /// Looks up a header value by case-insensitive name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .get(&name.to_ascii_lowercase())
            .map(|(_, value)| value.as_str())
    }

    /// Returns `true` if a header with the given name is present.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(&name.to_ascii_lowercase())
    }

    /// Removes a header, returning its value if it was present.
    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.entries
            .remove(&name.to_ascii_lowercase())
            .map(|(_, value)| value)
    }

    /// Number of distinct headers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when no headers are present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates `(name, value)` pairs in case-folded key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .values()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }
}

impl<K, V> FromIterator<(K, V)> for Headers
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Self::new();
        headers.extend(iter);
        headers
    }
}

impl<K, V> Extend<(K, V)> for Headers
where
    K: Into<String>,
    V: Into<String>,
{
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (name, value) in iter {
            self.insert(name, value);
        }
    }
}

impl Serialize for Headers {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.len()))?;
        for (name, value) in self.iter() {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Headers {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = BTreeMap::<String, String>::deserialize(deserializer)?;
        Ok(raw.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_ignores_case() {
        let mut headers = Headers::new();
        headers.insert("X-OpenHIM-TransactionID", "abc");

        assert_eq!(headers.get("x-openhim-transactionid"), Some("abc"));
        assert_eq!(headers.get("X-OPENHIM-TRANSACTIONID"), Some("abc"));
        assert!(headers.contains("x-OpenHIM-transactionId"));
        assert_eq!(headers.get("missing"), None);
    }

    #[test]
    fn insert_replaces_value_and_keeps_latest_spelling() {
        let mut headers = Headers::new();
        headers.insert("content-type", "text/plain");
        let old = headers.insert("Content-Type", "application/json");

        assert_eq!(old.as_deref(), Some("text/plain"));
        assert_eq!(headers.len(), 1);
        assert_eq!(
            headers.iter().collect::<Vec<_>>(),
            vec![("Content-Type", "application/json")]
        );
    }

    #[test]
    fn remove_is_case_insensitive() {
        let mut headers: Headers = [("Accept", "*/*")].into_iter().collect();
        assert_eq!(headers.remove("ACCEPT").as_deref(), Some("*/*"));
        assert!(headers.is_empty());
    }

    #[test]
    fn serializes_in_folded_key_order() {
        let headers: Headers = [("b-header", "2"), ("A-Header", "1"), ("c", "3")]
            .into_iter()
            .collect();

        let json = serde_json::to_string(&headers).unwrap();
        assert_eq!(json, r#"{"A-Header":"1","b-header":"2","c":"3"}"#);
    }

    #[test]
    fn deserializes_from_json_object() {
        let headers: Headers =
            serde_json::from_str(r#"{"Content-Type":"text/plain","X-Id":"7"}"#).unwrap();
        assert_eq!(headers.get("content-type"), Some("text/plain"));
        assert_eq!(headers.get("x-id"), Some("7"));
    }
}
