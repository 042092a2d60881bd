use std::num::NonZeroUsize;

use axum::http::Method;

use crate::{ByteRange, RangeSpecifier};

/// How a response is shaped with respect to the request's `Range` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Strategy {
    /// Serve the original content, only advertising range support.
    Bypass,
    /// Ranges were requested with a method other than GET or HEAD.
    MethodNotAllowed,
    /// No requested range overlaps the content.
    Unsatisfiable { length: u64 },
    Single { range: ByteRange, length: u64 },
    Multiple { ranges: Vec<ByteRange>, length: u64 },
}

/// Only GET and HEAD requests may carry ranges.
pub fn accepts_ranges(method: &Method) -> bool {
    method == Method::GET || method == Method::HEAD
}

impl Strategy {
    /// The part of the decision that depends on the request alone.
    ///
    /// `Ok` carries the specifier when the outcome depends on the content.
    pub fn for_request<'a>(
        method: &Method,
        specifier: Option<&'a RangeSpecifier>,
    ) -> Result<&'a RangeSpecifier, Strategy> {
        let specifier = specifier.ok_or(Strategy::Bypass)?;
        if !accepts_ranges(method) {
            return Err(Strategy::MethodNotAllowed);
        }
        Ok(specifier)
    }

    /// Decide the strategy for content of `length` bytes.
    ///
    /// `precondition_holds` is the outcome of the `If-Range` check.
    pub fn select(
        method: &Method,
        specifier: Option<&RangeSpecifier>,
        precondition_holds: bool,
        length: u64,
        max_range_count: NonZeroUsize,
    ) -> Strategy {
        let specifier = match Strategy::for_request(method, specifier) {
            Ok(specifier) => specifier,
            Err(strategy) => return strategy,
        };
        if !precondition_holds {
            return Strategy::Bypass;
        }

        let mut merged = specifier.merge(length, max_range_count);
        match merged.len() {
            0 => Strategy::Unsatisfiable { length },
            1 => Strategy::Single { range: merged.remove(0), length },
            _ => Strategy::Multiple { ranges: merged, length },
        }
    }
}
