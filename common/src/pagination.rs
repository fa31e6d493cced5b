//! Offset pagination with opaque page tokens.
//!
//! A token is the standard base64 encoding of the decimal offset of the next
//! page. Pages are fetched with one extra row to tell whether another page
//! follows.

use base64::{Engine as _, engine::general_purpose};

use crate::error::DomainError;

pub const DEFAULT_PAGE_SIZE: i64 = 10;
pub const MAX_PAGE_SIZE: i64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub limit: i64,
    pub offset: i64,
}

impl PageRequest {
    /// Non-positive sizes select the default; sizes above the maximum are
    /// capped.
    pub fn parse(page_size: i32, page_token: &str) -> Result<Self, DomainError> {
        let limit = match i64::from(page_size) {
            size if size <= 0 => DEFAULT_PAGE_SIZE,
            size => size.min(MAX_PAGE_SIZE),
        };
        let offset = if page_token.is_empty() {
            0
        } else {
            decode_page_token(page_token)?
        };
        Ok(Self { limit, offset })
    }

    /// Rows to ask the database for.
    pub fn fetch_limit(&self) -> i64 {
        self.limit + 1
    }

    /// Drops the lookahead row and returns the token of the next page, empty
    /// on the last page.
    pub fn split<T>(&self, mut rows: Vec<T>) -> (Vec<T>, String) {
        let limit = usize::try_from(self.limit).unwrap_or(usize::MAX);
        if rows.len() > limit {
            rows.truncate(limit);
            (rows, encode_page_token(self.offset + self.limit))
        } else {
            (rows, String::new())
        }
    }
}

pub fn encode_page_token(offset: i64) -> String {
    general_purpose::STANDARD.encode(offset.to_string())
}

pub fn decode_page_token(token: &str) -> Result<i64, DomainError> {
    let bytes = general_purpose::STANDARD
        .decode(token)
        .map_err(|_| DomainError::validation("invalid page token"))?;
    std::str::from_utf8(&bytes)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .filter(|offset| *offset >= 0)
        .ok_or_else(|| DomainError::validation("invalid page token format"))
}

/// `ILIKE` pattern matching `query` anywhere, with `%`, `_` and `\` in the
/// query taken literally.
pub fn contains_pattern(query: &str) -> String {
    let mut pattern = String::with_capacity(query.len() + 2);
    pattern.push('%');
    for c in query.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}
