//! Frame and header containers shared by the codec, replies and events.

use serde::{Deserialize, Serialize};

use crate::constants::{HEADER_CONTENT_LENGTH, HEADER_CONTENT_TYPE};

/// Case-insensitive, multi-valued header map.
///
/// Keys keep the spelling they were first inserted with; lookups ignore ASCII
/// case. Adding a value under an existing key appends to that key's values,
/// which is how duplicate header lines on the wire are represented.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Headers {
    entries: Vec<(String, Vec<String>)>,
}

impl Headers {
    /// Empty header map.
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|(key, _)| key.eq_ignore_ascii_case(name))
    }

    /// First value of a header.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.get_all(name)
            .first()
            .map(|s| s.as_str())
    }

    /// All values of a header, in arrival order. Empty if absent.
    pub fn get_all(&self, name: &str) -> &[String] {
        match self.position(name) {
            Some(i) => &self.entries[i].1,
            None => &[],
        }
    }

    /// Whether the header is present.
    pub fn contains(&self, name: &str) -> bool {
        self.position(name)
            .is_some()
    }

    /// Replace all values of a header with a single value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        match self.position(&name) {
            Some(i) => self.entries[i].1 = vec![value.into()],
            None => self
                .entries
                .push((name, vec![value.into()])),
        }
    }

    /// Append a value, creating the header if needed.
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        match self.position(&name) {
            Some(i) => self.entries[i]
                .1
                .push(value.into()),
            None => self
                .entries
                .push((name, vec![value.into()])),
        }
    }

    /// Remove a header, returning its values.
    pub fn remove(&mut self, name: &str) -> Option<Vec<String>> {
        let i = self.position(name)?;
        Some(
            self.entries
                .remove(i)
                .1,
        )
    }

    /// Iterate `(name, values)` in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Number of distinct header names.
    pub fn len(&self) -> usize {
        self.entries
            .len()
    }

    /// Whether there are no headers.
    pub fn is_empty(&self) -> bool {
        self.entries
            .is_empty()
    }
}

/// Header order does not matter for equality; key case does not either.
impl PartialEq for Headers {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .iter()
                .all(|(name, values)| other.get_all(name) == values)
    }
}

impl Eq for Headers {}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (k, v) in iter {
            headers.add(k, v);
        }
        headers
    }
}

/// One self-delimited protocol message: headers plus an optional body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frame {
    headers: Headers,
    body: Option<String>,
}

impl Frame {
    /// Frame with the given headers and no body.
    pub fn new(headers: Headers) -> Self {
        Self {
            headers,
            body: None,
        }
    }

    /// Frame with headers and a body.
    pub fn with_body(headers: Headers, body: impl Into<String>) -> Self {
        Self {
            headers,
            body: Some(body.into()),
        }
    }

    /// All headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Mutable access to the headers.
    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    /// First value of a header.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(name)
    }

    /// Body, if any.
    pub fn body(&self) -> Option<&str> {
        self.body
            .as_deref()
    }

    /// Replace the body.
    pub fn set_body(&mut self, body: Option<String>) {
        self.body = body;
    }

    /// `Content-Type` header.
    pub fn content_type(&self) -> Option<&str> {
        self.header(HEADER_CONTENT_TYPE)
    }

    /// Declared `Content-Length`, if the header is present.
    pub fn content_length(&self) -> Option<&str> {
        self.header(HEADER_CONTENT_LENGTH)
    }

    /// Split into headers and body.
    pub fn into_parts(self) -> (Headers, Option<String>) {
        (self.headers, self.body)
    }
}
