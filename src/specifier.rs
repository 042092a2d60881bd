//! Parsing of `Range` request header values.
//!
//! ```text
//! Range = "bytes" "=" range-spec *( "," range-spec )
//! range-spec = first-pos "-" [ last-pos ] / "-" suffix-length
//! ```
//!
//! Anything not matching the grammar is treated as if no `Range` header was
//! sent at all, so the client gets the full representation instead of an
//! error.

use std::fmt;

use axum::http::header::RANGE;
use axum::http::HeaderMap;

use crate::ByteRange;

/// The only range unit understood.
pub const BYTES_UNIT: &str = "bytes";

/// One element of a byte range set, before the representation length is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeSpec {
    /// `start-end`, both inclusive.
    Bounded { start: u64, end: u64 },
    /// `start-`, through the end of the representation.
    Prefix { start: u64 },
    /// `-length`, the last `length` bytes.
    Suffix { length: u64 },
}

impl RangeSpec {
    /// Resolve against a representation of `length` bytes.
    ///
    /// Returns `None` when the spec selects nothing inside `[0, length)`.
    /// The end is clamped to the last byte.
    pub fn resolve(&self, length: u64) -> Option<ByteRange> {
        let last = length.checked_sub(1)?;
        match *self {
            RangeSpec::Bounded { start, end } => {
                if start > end || start > last {
                    None
                } else {
                    Some(ByteRange::new(start, end.min(last)))
                }
            }
            RangeSpec::Prefix { start } => (start <= last).then(|| ByteRange::new(start, last)),
            RangeSpec::Suffix { length: 0 } => None,
            RangeSpec::Suffix { length: suffix } => {
                Some(ByteRange::new(length.saturating_sub(suffix), last))
            }
        }
    }
}

impl fmt::Display for RangeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RangeSpec::Bounded { start, end } => write!(f, "{start}-{end}"),
            RangeSpec::Prefix { start } => write!(f, "{start}-"),
            RangeSpec::Suffix { length } => write!(f, "-{length}"),
        }
    }
}

/// A parsed `Range` header: the `bytes` unit plus the requested specs in
/// the order the client sent them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeSpecifier {
    ranges: Vec<RangeSpec>,
}

impl RangeSpecifier {
    /// Parse a `Range` header value such as `bytes=0-499,1000-1499,-500`.
    ///
    /// Returns `None` for any malformed value or a unit other than `bytes`.
    pub fn parse(value: &str) -> Option<RangeSpecifier> {
        let (unit, set) = value.trim().split_once('=')?;
        if !unit.trim().eq_ignore_ascii_case(BYTES_UNIT) {
            return None;
        }

        let mut ranges = Vec::new();
        for item in set.split(',').map(str::trim) {
            // empty list elements are allowed by the list grammar
            if item.is_empty() {
                continue;
            }
            ranges.push(parse_spec(item)?);
        }

        if ranges.is_empty() {
            None
        } else {
            Some(RangeSpecifier { ranges })
        }
    }

    /// Parse the first `Range` header of a request, if any.
    pub fn from_headers(headers: &HeaderMap) -> Option<RangeSpecifier> {
        headers
            .get(RANGE)
            .and_then(|value| value.to_str().ok())
            .and_then(RangeSpecifier::parse)
    }

    /// The range unit, always [`BYTES_UNIT`].
    pub fn unit(&self) -> &'static str {
        BYTES_UNIT
    }

    /// Requested specs, in request order.
    pub fn ranges(&self) -> &[RangeSpec] {
        &self.ranges
    }
}

impl fmt::Display for RangeSpecifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}=", self.unit())?;
        for (i, range) in self.ranges.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{range}")?;
        }
        Ok(())
    }
}

fn parse_spec(item: &str) -> Option<RangeSpec> {
    let (start, end) = item.split_once('-')?;
    let (start, end) = (start.trim(), end.trim());

    match (start.is_empty(), end.is_empty()) {
        (true, true) => None,
        (true, false) => Some(RangeSpec::Suffix { length: parse_position(end)? }),
        (false, true) => Some(RangeSpec::Prefix { start: parse_position(start)? }),
        (false, false) => Some(RangeSpec::Bounded {
            start: parse_position(start)?,
            end: parse_position(end)?,
        }),
    }
}

/// `1*DIGIT`; `u64::from_str` alone would also accept a leading `+`.
fn parse_position(digits: &str) -> Option<u64> {
    if digits.bytes().all(|b| b.is_ascii_digit()) {
        digits.parse().ok()
    } else {
        None
    }
}
