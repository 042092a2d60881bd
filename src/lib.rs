//! # axum-partial-content
//!
//! HTTP partial content negotiation for [`axum`][1].
//!
//! Install [`PartialContent`] on a router and return a [`Content`] from your
//! handlers. Requests carrying a `Range` header are answered with
//! `206 Partial Content`, either as a single sub-range or as a
//! `multipart/byteranges` document, or with `416 Range Not Satisfiable`.
//! `If-Range` preconditions are honoured, and every rangeable response
//! advertises `Accept-Ranges: bytes`.
//!
//! Any type implementing [`RangeBody`] can back a [`Content`]. There is
//! support for in-memory buffers with [`BytesBody`] and for files on disk
//! with [`FileBody`].
//!
//! ```no_run
//! use axum::Router;
//! use axum::http::StatusCode;
//! use axum::routing::get;
//!
//! use axum_partial_content::{Config, Content, FileBody, PartialContent};
//!
//! async fn document() -> Result<Content, StatusCode> {
//!     let body = FileBody::open("document.txt")
//!         .await
//!         .map_err(|_| StatusCode::NOT_FOUND)?;
//!     Ok(body.into_content())
//! }
//!
//! # fn main() -> Result<(), axum_partial_content::Error> {
//! let partial_content = PartialContent::new(Config::default())?;
//! let _app: Router = partial_content.install(Router::new().route("/", get(document)));
//! # Ok(())
//! # }
//! ```
//!
//! [1]: https://docs.rs/axum

mod conditional;
mod config;
mod content;
mod file;
mod interceptor;
mod merge;
mod response;
mod specifier;
mod strategy;
mod stream;

use std::fmt;
use std::io;
use std::pin::Pin;

use axum_extra::headers::ContentRange;
use futures::future::BoxFuture;
use tokio::io::AsyncRead;

pub use conditional::{if_range_holds, parse_http_date, DeclaredVersions, EntityTag, IfRange, Version, VersionLookup};
pub use config::Config;
pub use content::{BytesBody, Content};
pub use file::FileBody;
pub use interceptor::{intercept, CompressionControl, CompressionSuppressed, PartialContent, SuppressionMarker};
pub use merge::merge_ranges;
pub use response::{extract_boundary, generate_boundary, MethodNotAllowed, RangeNotSatisfiable, RangedResponse};
pub use specifier::{RangeSpec, RangeSpecifier, BYTES_UNIT};
pub use strategy::{accepts_ranges, Strategy};
pub use stream::{MultipartStream, RangedStream};

/// Reader handed out by [`RangeBody::open_at`].
pub type BodyReader = Pin<Box<dyn AsyncRead + Send>>;

/// Content whose bytes can be read starting from any offset.
pub trait RangeBody: Send + Sync + 'static {
    /// The total size of the underlying content, if known.
    ///
    /// This should not change for the lifetime of the object once queried.
    /// Range requests against a body of unknown size are served in full.
    fn byte_size(&self) -> Option<u64>;

    /// Opens a new reader positioned at `start`.
    ///
    /// Every call returns an independent reader. The caller reads at most the
    /// bytes it needs and drops the reader afterwards.
    fn open_at(&self, start: u64) -> BoxFuture<'static, io::Result<BodyReader>>;
}

/// A resolved byte range, inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// Create a new byte range covering `start..=end`.
    pub fn new(start: u64, end: u64) -> Self {
        debug_assert!(start <= end, "byte range {start}-{end} is inverted");
        ByteRange { start, end }
    }

    /// Number of bytes covered, never zero.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// `Content-Range` header for this range within a representation of
    /// `complete_length` bytes.
    pub fn content_range(&self, complete_length: u64) -> ContentRange {
        ContentRange::bytes(self.start..=self.end, complete_length)
            .expect("ContentRange::bytes cannot fail for a non-empty inclusive range")
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Errors raised while setting up [`PartialContent`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("bad max_range_count value {0}: at least one range must be allowed")]
    InvalidMaxRangeCount(usize),
}
