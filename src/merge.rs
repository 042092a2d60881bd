use std::num::NonZeroUsize;

use crate::{ByteRange, RangeSpecifier};

impl RangeSpecifier {
    /// Resolve and normalize the requested ranges against a representation
    /// of `length` bytes.
    ///
    /// The result is sorted, fully coalesced and holds at most
    /// `max_range_count` ranges. An empty result means the request is not
    /// satisfiable.
    pub fn merge(&self, length: u64, max_range_count: NonZeroUsize) -> Vec<ByteRange> {
        let resolved = self
            .ranges()
            .iter()
            .filter_map(|spec| spec.resolve(length))
            .collect();
        merge_ranges(resolved, max_range_count)
    }
}

/// Merge already resolved ranges, given in request order.
///
/// Overlapping and adjacent ranges are combined. When the ranges were not
/// requested in ascending order, or more than `max_range_count` remain, the
/// whole set collapses into one range covering all of them, so the body can
/// always be produced by reading forward only.
pub fn merge_ranges(resolved: Vec<ByteRange>, max_range_count: NonZeroUsize) -> Vec<ByteRange> {
    let ascending = resolved.windows(2).all(|pair| pair[0].start <= pair[1].start);

    let mut sorted = resolved;
    sorted.sort_unstable_by_key(|range| range.start);

    let mut merged: Vec<ByteRange> = Vec::with_capacity(sorted.len());
    for range in sorted {
        match merged.last_mut() {
            Some(current) if range.start <= current.end.saturating_add(1) => {
                current.end = current.end.max(range.end);
            }
            _ => merged.push(range),
        }
    }

    if merged.len() > 1 && (merged.len() > max_range_count.get() || !ascending) {
        let start = merged[0].start;
        let end = merged[merged.len() - 1].end;
        return vec![ByteRange::new(start, end)];
    }

    merged
}
