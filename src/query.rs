#![forbid(unsafe_code)]

//! Ordered query-string parameters with the same semantics as the browser's
//! `URLSearchParams`: `set` rewrites the first occurrence in place, new keys
//! are appended, and rendering uses form encoding (`+` for spaces).

use std::fmt;

use url::form_urlencoded;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams {
    pairs: Vec<(String, String)>,
}

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a raw query string. A leading `?` is ignored.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.strip_prefix('?').unwrap_or(raw);
        let pairs = form_urlencoded::parse(raw.as_bytes())
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect();
        Self { pairs }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(candidate, _)| candidate == key)
            .map(|(_, value)| value.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.pairs.iter().any(|(candidate, _)| candidate == key)
    }

    /// Replaces the value of the first `key` in place and drops any later
    /// duplicates. Appends when the key is absent.
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        let mut seen = false;
        self.pairs.retain_mut(|(candidate, current)| {
            if candidate.as_str() != key {
                return true;
            }
            if seen {
                return false;
            }
            seen = true;
            *current = value.clone();
            true
        });
        if !seen {
            self.pairs.push((key.to_string(), value));
        }
    }

    pub fn append(&mut self, key: &str, value: impl Into<String>) {
        self.pairs.push((key.to_string(), value.into()));
    }

    pub fn remove(&mut self, key: &str) {
        self.pairs.retain(|(candidate, _)| candidate != key);
    }

    /// Sets `key` when `value` is present and removes it otherwise.
    pub fn set_or_remove(&mut self, key: &str, value: Option<String>) {
        match value {
            Some(value) => self.set(key, value),
            None => self.remove(key),
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.pairs.iter().map(|(key, _)| key.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn to_query_string(&self) -> String {
        let mut serializer = form_urlencoded::Serializer::new(String::new());
        for (key, value) in &self.pairs {
            serializer.append_pair(key, value);
        }
        serializer.finish()
    }
}

impl fmt::Display for QueryParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_query_string())
    }
}

/// Joins list values for a single query parameter. Empty lists map to `None`
/// so callers drop the key entirely.
pub fn join_list(values: &[String]) -> Option<String> {
    if values.is_empty() {
        None
    } else {
        Some(values.join(","))
    }
}

/// Splits a comma-joined parameter, skipping empty segments.
pub fn split_list(raw: Option<&str>) -> Vec<String> {
    raw.map(|value| {
        value
            .split(',')
            .filter(|segment| !segment.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

/// Splits `path?query#fragment` into the path and the parsed query. The
/// fragment is discarded.
pub fn split_url(url: &str) -> (&str, QueryParams) {
    let without_fragment = url.split_once('#').map_or(url, |(head, _)| head);
    match without_fragment.split_once('?') {
        Some((path, query)) => (path, QueryParams::parse(query)),
        None => (without_fragment, QueryParams::new()),
    }
}

/// Renders `path` plus an optional query, omitting the `?` when the query is
/// empty.
pub fn join_url(path: &str, params: &QueryParams) -> String {
    if params.is_empty() {
        path.to_string()
    } else {
        format!("{path}?{}", params.to_query_string())
    }
}
