use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::SystemTime;

use axum::http::header::{CONTENT_TYPE, ETAG};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum_extra::headers::{HeaderMapExt, LastModified};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::future::{self, BoxFuture};

use crate::{BodyReader, EntityTag, RangeBody, RangedStream, Version};

/// A rangeable response body together with what is known about it.
///
/// Returned from a handler it becomes a `200 OK` response with the whole
/// body. The [`PartialContent`](crate::PartialContent) layer finds it again
/// in the response extensions and rewrites the response when the request
/// asked for ranges.
#[derive(Clone)]
pub struct Content {
    body: Arc<dyn RangeBody>,
    content_type: Option<HeaderValue>,
    versions: Vec<Version>,
}

impl fmt::Debug for Content {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Content")
            .field("byte_size", &self.body.byte_size())
            .field("content_type", &self.content_type)
            .field("versions", &self.versions)
            .finish()
    }
}

impl Content {
    pub fn new(body: impl RangeBody) -> Content {
        Content {
            body: Arc::new(body),
            content_type: None,
            versions: Vec::new(),
        }
    }

    pub fn with_content_type(mut self, content_type: HeaderValue) -> Content {
        self.content_type = Some(content_type);
        self
    }

    pub fn with_version(mut self, version: Version) -> Content {
        self.versions.push(version);
        self
    }

    pub fn with_etag(self, tag: impl AsRef<str>) -> Content {
        self.with_version(Version::EntityTag(EntityTag::new(tag)))
    }

    pub fn with_last_modified(self, at: DateTime<Utc>) -> Content {
        self.with_version(Version::LastModified(at))
    }

    pub fn byte_size(&self) -> Option<u64> {
        self.body.byte_size()
    }

    pub fn body(&self) -> &Arc<dyn RangeBody> {
        &self.body
    }

    pub fn content_type(&self) -> Option<&HeaderValue> {
        self.content_type.as_ref()
    }

    pub fn versions(&self) -> &[Version] {
        &self.versions
    }
}

impl IntoResponse for Content {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        if let Some(content_type) = &self.content_type {
            headers.insert(CONTENT_TYPE, content_type.clone());
        }
        for version in &self.versions {
            match version {
                Version::EntityTag(tag) => {
                    if let Ok(value) = HeaderValue::from_str(tag.as_str()) {
                        headers.insert(ETAG, value);
                    }
                }
                Version::LastModified(at) => {
                    headers.typed_insert(LastModified::from(SystemTime::from(*at)));
                }
            }
        }

        let stream = RangedStream::full(self.body.clone());
        let mut response = (StatusCode::OK, headers, stream).into_response();
        response.extensions_mut().insert(self);
        response
    }
}

/// In-memory [`RangeBody`].
#[derive(Debug, Clone)]
pub struct BytesBody(Bytes);

impl BytesBody {
    pub fn new(bytes: impl Into<Bytes>) -> BytesBody {
        BytesBody(bytes.into())
    }

    pub fn from_static(bytes: &'static [u8]) -> BytesBody {
        BytesBody(Bytes::from_static(bytes))
    }
}

impl RangeBody for BytesBody {
    fn byte_size(&self) -> Option<u64> {
        u64::try_from(self.0.len()).ok()
    }

    fn open_at(&self, start: u64) -> BoxFuture<'static, io::Result<BodyReader>> {
        let start = usize::try_from(start).map_or(self.0.len(), |start| start.min(self.0.len()));
        let reader: BodyReader = Box::pin(io::Cursor::new(self.0.slice(start..)));
        Box::pin(future::ready(Ok(reader)))
    }
}
