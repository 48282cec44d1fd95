//! Response headers with HTTP freshness rules.
//!
//! A deliberately small header container: ordered name/value pairs plus
//! a status code, with the freshness computation the cache needs
//! (`Cache-Control: max-age`, `Expires`, `Date`) and the wire form
//! stored inside an `HttpValue` headers block.

use crate::error::CacheError;
use crate::Result;
use chrono::{DateTime, Utc};
use std::fmt;

/// HTTP response status and headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHeaders {
    status: u16,
    headers: Vec<(String, String)>,
}

impl ResponseHeaders {
    /// Creates headers with the given status code.
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
        }
    }

    /// Returns the status code.
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Appends a header, keeping any existing values for the name.
    pub fn add(&mut self, name: &str, value: &str) {
        self.headers.push((name.to_string(), value.to_string()));
    }

    /// Replaces all values for `name` with a single value.
    pub fn set(&mut self, name: &str, value: &str) {
        self.remove_all(name);
        self.add(name, value);
    }

    /// Returns the first value for `name`, case-insensitively.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Returns all values for `name`.
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.headers
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// Removes all values for `name`. Returns true if any were removed.
    pub fn remove_all(&mut self, name: &str) -> bool {
        let before = self.headers.len();
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        self.headers.len() != before
    }

    /// Iterates over (name, value) pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Parses the `Date` header, in epoch milliseconds.
    pub fn date_ms(&self) -> Option<u64> {
        self.get("Date").and_then(parse_http_date_ms)
    }

    /// True if cache directives forbid storing this response.
    pub fn is_cacheable(&self) -> bool {
        if !matches!(self.status, 200 | 203 | 206 | 300 | 301 | 410) {
            return false;
        }
        for value in self.get_all("Cache-Control") {
            for directive in value.split(',') {
                let directive = directive.trim().to_ascii_lowercase();
                if directive == "no-cache" || directive == "no-store" || directive == "private" {
                    return false;
                }
            }
        }
        true
    }

    /// Expiry instant in epoch milliseconds, derived from
    /// `Cache-Control: max-age` (relative to `Date`, or to
    /// `fallback_date_ms` when `Date` is absent) or from `Expires`.
    pub fn expiry_ms(&self, fallback_date_ms: u64) -> Option<u64> {
        let date_ms = self.date_ms().unwrap_or(fallback_date_ms);
        if let Some(max_age_s) = self.max_age_seconds() {
            return Some(date_ms.saturating_add(max_age_s.saturating_mul(1000)));
        }
        self.get("Expires").and_then(parse_http_date_ms)
    }

    /// True if the response is still fresh at `now_ms`. Responses with
    /// no freshness information are never considered valid; forcing is
    /// the cache's decision, not the headers'.
    pub fn is_currently_valid(&self, now_ms: u64) -> bool {
        if !self.is_cacheable() {
            return false;
        }
        match self.expiry_ms(now_ms) {
            Some(expiry) => now_ms < expiry,
            None => false,
        }
    }

    fn max_age_seconds(&self) -> Option<u64> {
        for value in self.get_all("Cache-Control") {
            for directive in value.split(',') {
                // Directive names are case-insensitive.
                if let Some((name, seconds)) = directive.split_once('=') {
                    if name.trim().eq_ignore_ascii_case("max-age") {
                        return seconds.trim().parse().ok();
                    }
                }
            }
        }
        None
    }

    /// Serializes into an `HttpValue` headers block.
    pub fn to_block(&self) -> Vec<u8> {
        let mut block = Vec::new();
        block.extend_from_slice(format!("{}\r\n", self.status).as_bytes());
        for (name, value) in &self.headers {
            block.extend_from_slice(format!("{}: {}\r\n", name, value).as_bytes());
        }
        block.extend_from_slice(b"\r\n");
        block
    }

    /// Parses a headers block written by [`to_block`](Self::to_block).
    pub fn from_block(block: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(block)
            .map_err(|_| CacheError::CorruptValue("headers block is not UTF-8".to_string()))?;
        let mut lines = text.split("\r\n");
        let status_line = lines
            .next()
            .ok_or_else(|| CacheError::CorruptValue("empty headers block".to_string()))?;
        let status: u16 = status_line
            .parse()
            .map_err(|_| CacheError::CorruptValue(format!("bad status line: {status_line:?}")))?;

        let mut headers = Self::new(status);
        for line in lines {
            if line.is_empty() {
                break;
            }
            let (name, value) = line.split_once(": ").ok_or_else(|| {
                CacheError::CorruptValue(format!("malformed header line: {line:?}"))
            })?;
            headers.add(name, value);
        }
        Ok(headers)
    }
}

impl fmt::Display for ResponseHeaders {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.status)?;
        for (name, value) in &self.headers {
            write!(f, "; {}: {}", name, value)?;
        }
        Ok(())
    }
}

/// Parses an RFC 7231 HTTP date into epoch milliseconds.
fn parse_http_date_ms(value: &str) -> Option<u64> {
    // "GMT" is the form HTTP mandates; chrono's RFC 2822 parser
    // accepts it as an obsolete zone name.
    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc).timestamp_millis().max(0) as u64)
}

/// Formats epoch milliseconds as an HTTP date.
pub(crate) fn format_http_date(ms: u64) -> String {
    let dt = DateTime::<Utc>::from_timestamp_millis(ms as i64).unwrap_or_else(Utc::now);
    dt.to_rfc2822().replace("+0000", "GMT")
}
