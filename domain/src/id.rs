//! Product id parsing from a request path segment.

use std::fmt::{Display, Formatter};

/// Id taken from `/products/{id}`.
///
/// Parsing is lenient: leading whitespace is skipped, an optional sign is
/// accepted and the longest run of leading digits is used, so `"12abc"` is
/// id 12. A segment without leading digits keeps no numeric value and never
/// matches a stored product; it displays as `NaN`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProductId {
    value: Option<i64>,
    raw: String,
}

impl ProductId {
    pub fn parse<S: Into<String>>(segment: S) -> Self {
        let raw = segment.into();
        let value = leading_integer(&raw);
        Self { value, raw }
    }

    pub fn value(&self) -> Option<i64> {
        self.value
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }
}

impl From<i64> for ProductId {
    fn from(value: i64) -> Self {
        Self {
            value: Some(value),
            raw: value.to_string(),
        }
    }
}

impl Display for ProductId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.value {
            Some(v) => write!(f, "{}", v),
            None => f.write_str("NaN"),
        }
    }
}

fn leading_integer(s: &str) -> Option<i64> {
    let s = s.trim_start();
    let (negative, rest) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };
    let digits_len = rest.bytes().take_while(u8::is_ascii_digit).count();
    if digits_len == 0 {
        return None;
    }
    let magnitude: i64 = rest[..digits_len].parse().ok()?;
    Some(if negative { -magnitude } else { magnitude })
}
