use std::num::NonZeroUsize;

use serde::{Deserialize, Serialize};

use crate::Error;

/// Settings for [`PartialContent`](crate::PartialContent).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Upper bound on the number of ranges served as separate parts. Requests
    /// exceeding it get a single range covering all requested ones.
    pub max_range_count: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config { max_range_count: 10 }
    }
}

impl Config {
    pub fn validate(&self) -> Result<NonZeroUsize, Error> {
        NonZeroUsize::new(self.max_range_count).ok_or(Error::InvalidMaxRangeCount(self.max_range_count))
    }
}
