use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header::IF_RANGE;
use axum::http::{Extensions, HeaderMap, HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::Router;
use tracing::{debug, trace};

use crate::response::generate_boundary;
use crate::{
    if_range_holds, Config, Content, DeclaredVersions, Error, MethodNotAllowed, RangeNotSatisfiable,
    RangeSpecifier, RangedResponse, Strategy, VersionLookup,
};

/// Lets a downstream compression stage know that a response must be sent
/// as is.
pub trait CompressionControl: Send + Sync + 'static {
    fn suppress(&self, extensions: &mut Extensions);
}

/// Marker placed in the response extensions of partial responses.
/// Compressing them would invalidate the byte offsets they describe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionSuppressed;

/// Default [`CompressionControl`]: inserts [`CompressionSuppressed`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SuppressionMarker;

impl CompressionControl for SuppressionMarker {
    fn suppress(&self, extensions: &mut Extensions) {
        extensions.insert(CompressionSuppressed);
    }
}

/// Range request negotiation for responses carrying a [`Content`].
///
/// ```
/// use axum::Router;
/// use axum_partial_content::{Config, PartialContent};
///
/// let config: Config = serde_json::from_str(r#"{"max_range_count": 4}"#).unwrap();
/// let feature = PartialContent::new(config).unwrap();
/// assert_eq!(4, feature.max_range_count().get());
///
/// let _app: Router = feature.install(Router::new());
/// ```
#[derive(Clone)]
pub struct PartialContent {
    max_range_count: NonZeroUsize,
    versions: Arc<dyn VersionLookup>,
    compression: Arc<dyn CompressionControl>,
}

impl fmt::Debug for PartialContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartialContent")
            .field("max_range_count", &self.max_range_count)
            .finish_non_exhaustive()
    }
}

impl PartialContent {
    pub fn new(config: Config) -> Result<PartialContent, Error> {
        Ok(PartialContent {
            max_range_count: config.validate()?,
            versions: Arc::new(DeclaredVersions),
            compression: Arc::new(SuppressionMarker),
        })
    }

    pub fn with_version_lookup(mut self, versions: impl VersionLookup) -> PartialContent {
        self.versions = Arc::new(versions);
        self
    }

    pub fn with_compression_control(mut self, compression: impl CompressionControl) -> PartialContent {
        self.compression = Arc::new(compression);
        self
    }

    pub fn max_range_count(&self) -> NonZeroUsize {
        self.max_range_count
    }

    /// Add the negotiation layer to `router`. It sees every response of the
    /// routes registered so far; layers added afterwards, such as
    /// compression, see its output.
    pub fn install<S>(self, router: Router<S>) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        router.layer(middleware::from_fn_with_state(self, intercept))
    }

    /// Negotiate `response` against a request without going through a router.
    ///
    /// Only a response carrying a [`Content`] is negotiated, so the handler
    /// has already run by the time a range request with a method other than
    /// GET or HEAD is refused.
    pub fn respond(&self, method: &Method, request_headers: &HeaderMap, response: impl IntoResponse) -> Response {
        let specifier = RangeSpecifier::from_headers(request_headers);
        self.negotiate(method, specifier.as_ref(), request_headers.get(IF_RANGE), response.into_response())
    }

    fn negotiate(
        &self,
        method: &Method,
        specifier: Option<&RangeSpecifier>,
        if_range: Option<&HeaderValue>,
        mut response: Response,
    ) -> Response {
        let Some(content) = response.extensions_mut().remove::<Content>() else {
            trace!("response carries no rangeable content");
            return response;
        };

        let Some(specifier) = specifier else {
            trace!("no range requested");
            return RangedResponse::bypass(response).into_response();
        };

        let Some(length) = content.byte_size() else {
            trace!("content length unknown, ranges not applied");
            return response;
        };

        let versions = self.versions.versions(&content, response.headers());
        // a value that is not visible ASCII can match nothing
        let if_range = if_range.map(|value| value.to_str().unwrap_or_default());
        let precondition_holds = if_range_holds(if_range, &versions);

        let strategy = Strategy::select(method, Some(specifier), precondition_holds, length, self.max_range_count);

        match strategy {
            Strategy::Bypass => {
                debug!(%specifier, ?if_range, "if-range precondition failed, serving full content");
                RangedResponse::bypass(response).into_response()
            }
            Strategy::MethodNotAllowed => {
                debug!(%method, "range request with unsupported method");
                MethodNotAllowed(method.clone()).into_response()
            }
            Strategy::Unsatisfiable { length } => {
                debug!(%specifier, length, "range not satisfiable");
                RangeNotSatisfiable::new(length).into_response()
            }
            Strategy::Single { range, length } => {
                debug!(%specifier, %range, length, "serving single range");
                self.partial(response, |status, headers| {
                    RangedResponse::single(method, status, headers, &content, range, length)
                })
            }
            Strategy::Multiple { ranges, length } => {
                let boundary = generate_boundary();
                debug!(%specifier, parts = ranges.len(), length, %boundary, "serving multiple ranges");
                self.partial(response, |status, headers| {
                    RangedResponse::multiple(method, status, headers, &content, &ranges, length, boundary)
                })
            }
        }
    }

    /// Replace the body of `response` with a partial one. Extensions carry over.
    fn partial(&self, response: Response, build: impl FnOnce(StatusCode, HeaderMap) -> RangedResponse) -> Response {
        let (parts, _) = response.into_parts();
        let mut partial = build(parts.status, parts.headers).into_response();
        *partial.extensions_mut() = parts.extensions;
        self.compression.suppress(partial.extensions_mut());
        partial
    }
}

/// Middleware function behind [`PartialContent::install`].
pub async fn intercept(State(feature): State<PartialContent>, request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let specifier = RangeSpecifier::from_headers(request.headers());
    // refused before the handler runs
    if let Err(Strategy::MethodNotAllowed) = Strategy::for_request(&method, specifier.as_ref()) {
        debug!(%method, "range request with unsupported method");
        return MethodNotAllowed(method).into_response();
    }

    let if_range = request.headers().get(IF_RANGE).cloned();
    let response = next.run(request).await;
    feature.negotiate(&method, specifier.as_ref(), if_range.as_ref(), response)
}

#[cfg(test)]
mod tests {
    use axum::body::{to_bytes, Body};
    use axum::http::header::{ACCEPT_RANGES, ALLOW, CONTENT_RANGE, CONTENT_TYPE, ETAG, RANGE};
    use axum::http::StatusCode;
    use chrono::{TimeZone, Utc};
    use futures::stream;

    use super::*;
    use crate::{extract_boundary, BytesBody, Version};

    fn thousand_bytes() -> Vec<u8> {
        (0..1000u32).map(|i| (i % 251) as u8).collect()
    }

    fn content() -> Content {
        Content::new(BytesBody::new(thousand_bytes()))
            .with_content_type(HeaderValue::from_static("application/x-test"))
            .with_etag("v1")
            .with_last_modified(Utc.with_ymd_and_hms(1994, 11, 6, 8, 49, 37).unwrap())
    }

    fn feature() -> PartialContent {
        PartialContent::new(Config::default()).unwrap()
    }

    fn request(range: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(RANGE, HeaderValue::from_str(range).unwrap());
        headers
    }

    async fn body_of(response: Response) -> Vec<u8> {
        to_bytes(response.into_body(), usize::MAX).await.unwrap().to_vec()
    }

    #[test]
    fn test_zero_max_range_count_is_rejected() {
        let err = PartialContent::new(Config { max_range_count: 0 }).unwrap_err();
        assert_eq!("bad max_range_count value 0: at least one range must be allowed", err.to_string());
    }

    #[tokio::test]
    async fn test_single_range() {
        let response = feature().respond(&Method::GET, &request("bytes=0-499"), content());
        assert_eq!(StatusCode::PARTIAL_CONTENT, response.status());
        assert_eq!("bytes 0-499/1000", response.headers()[CONTENT_RANGE]);
        assert_eq!("bytes", response.headers()[ACCEPT_RANGES]);
        assert_eq!("application/x-test", response.headers()[CONTENT_TYPE]);
        assert_eq!("\"v1\"", response.headers()[ETAG]);
        assert_eq!(Some(&CompressionSuppressed), response.extensions().get::<CompressionSuppressed>());
        assert!(response.extensions().get::<Content>().is_none());

        assert_eq!(&thousand_bytes()[..500], &body_of(response).await[..]);
    }

    #[tokio::test]
    async fn test_unsatisfiable_range() {
        let response = feature().respond(&Method::GET, &request("bytes=1200-1300"), content());
        assert_eq!(StatusCode::RANGE_NOT_SATISFIABLE, response.status());
        assert_eq!("bytes */1000", response.headers()[CONTENT_RANGE]);
        assert!(body_of(response).await.is_empty());
    }

    #[tokio::test]
    async fn test_multiple_ranges() {
        let response = feature().respond(&Method::GET, &request("bytes=0-99,200-299"), content());
        assert_eq!(StatusCode::PARTIAL_CONTENT, response.status());
        assert!(response.headers().get(CONTENT_RANGE).is_none());
        assert!(response.extensions().get::<CompressionSuppressed>().is_some());

        let content_type = response.headers()[CONTENT_TYPE].to_str().unwrap().to_owned();
        let boundary = extract_boundary(&content_type).unwrap();
        assert!(boundary.starts_with("partial-content-"));

        let body = body_of(response).await;
        let stream = stream::once(async move { Ok::<_, std::io::Error>(body) });
        let mut multipart = multer::Multipart::new(stream, boundary);

        let expected = thousand_bytes();
        for (range, bytes) in [("bytes 0-99/1000", &expected[0..100]), ("bytes 200-299/1000", &expected[200..300])] {
            let field = multipart.next_field().await.unwrap().unwrap();
            assert_eq!("application/x-test", field.headers()[CONTENT_TYPE]);
            assert_eq!(range, field.headers()[CONTENT_RANGE]);
            assert_eq!(bytes, &field.bytes().await.unwrap()[..]);
        }
        assert!(multipart.next_field().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_max_range_count_collapses() {
        let feature = PartialContent::new(Config { max_range_count: 1 }).unwrap();
        let response = feature.respond(&Method::GET, &request("bytes=0-9,20-29"), content());
        assert_eq!(StatusCode::PARTIAL_CONTENT, response.status());
        assert_eq!("bytes 0-29/1000", response.headers()[CONTENT_RANGE]);
        assert_eq!(30, body_of(response).await.len());
    }

    #[tokio::test]
    async fn test_no_range_header() {
        let response = feature().respond(&Method::GET, &HeaderMap::new(), content());
        assert_eq!(StatusCode::OK, response.status());
        assert_eq!("bytes", response.headers()[ACCEPT_RANGES]);
        assert!(response.extensions().get::<CompressionSuppressed>().is_none());
        assert_eq!(thousand_bytes(), body_of(response).await);
    }

    #[tokio::test]
    async fn test_malformed_range_is_ignored() {
        let response = feature().respond(&Method::GET, &request("bytes=abc"), content());
        assert_eq!(StatusCode::OK, response.status());
        assert_eq!("bytes", response.headers()[ACCEPT_RANGES]);
        assert_eq!(1000, body_of(response).await.len());
    }

    #[tokio::test]
    async fn test_other_responses_pass_through() {
        let response = feature().respond(&Method::GET, &request("bytes=0-1"), "plain text");
        assert_eq!(StatusCode::OK, response.status());
        assert!(response.headers().get(ACCEPT_RANGES).is_none());
        assert_eq!(b"plain text".to_vec(), body_of(response).await);
    }

    #[test]
    fn test_method_not_allowed() {
        let response = feature().respond(&Method::POST, &request("bytes=0-1"), content());
        assert_eq!(StatusCode::METHOD_NOT_ALLOWED, response.status());
        assert_eq!("GET, HEAD", response.headers()[ALLOW]);

        let response = feature().respond(&Method::POST, &HeaderMap::new(), content());
        assert_eq!(StatusCode::OK, response.status());
    }

    #[tokio::test]
    async fn test_head_keeps_status() {
        let response = feature().respond(&Method::HEAD, &request("bytes=0-9"), content());
        assert_eq!(StatusCode::OK, response.status());
        assert_eq!("bytes 0-9/1000", response.headers()[CONTENT_RANGE]);

        let response = feature().respond(&Method::HEAD, &request("bytes=0-9,20-29"), content());
        assert_eq!(StatusCode::OK, response.status());
        let content_type = response.headers()[CONTENT_TYPE].to_str().unwrap();
        assert!(extract_boundary(content_type).is_some());
    }

    #[tokio::test]
    async fn test_if_range() {
        let mut headers = request("bytes=0-9");
        headers.insert(IF_RANGE, HeaderValue::from_static("\"v1\""));
        let response = feature().respond(&Method::GET, &headers, content());
        assert_eq!(StatusCode::PARTIAL_CONTENT, response.status());

        headers.insert(IF_RANGE, HeaderValue::from_static("W/\"v1\""));
        let response = feature().respond(&Method::GET, &headers, content());
        assert_eq!(StatusCode::PARTIAL_CONTENT, response.status());

        headers.insert(IF_RANGE, HeaderValue::from_static("\"v2\""));
        let response = feature().respond(&Method::GET, &headers, content());
        assert_eq!(StatusCode::OK, response.status());
        assert_eq!("bytes", response.headers()[ACCEPT_RANGES]);
        assert!(response.headers().get(CONTENT_RANGE).is_none());
        assert_eq!(1000, body_of(response).await.len());

        // a date cannot match content that has an entity tag
        headers.insert(IF_RANGE, HeaderValue::from_static("Sun, 06 Nov 1994 08:49:37 GMT"));
        let response = feature().respond(&Method::GET, &headers, content());
        assert_eq!(StatusCode::OK, response.status());
    }

    #[tokio::test]
    async fn test_if_range_date() {
        let modified = Content::new(BytesBody::new(thousand_bytes()))
            .with_last_modified(Utc.with_ymd_and_hms(1994, 11, 6, 8, 49, 37).unwrap());

        let mut headers = request("bytes=0-9");
        headers.insert(IF_RANGE, HeaderValue::from_static("Sun, 06 Nov 1994 08:49:37 GMT"));
        let response = feature().respond(&Method::GET, &headers, modified.clone());
        assert_eq!(StatusCode::PARTIAL_CONTENT, response.status());

        headers.insert(IF_RANGE, HeaderValue::from_static("Sat, 05 Nov 1994 08:49:37 GMT"));
        let response = feature().respond(&Method::GET, &headers, modified);
        assert_eq!(StatusCode::OK, response.status());
    }

    #[tokio::test]
    async fn test_if_range_date_without_versions() {
        let mut headers = request("bytes=0-4");
        headers.insert(IF_RANGE, HeaderValue::from_static("Sun, 06 Nov 1994 08:49:37 GMT"));
        let unversioned = Content::new(BytesBody::from_static(b"0123456789"));

        let response = feature().respond(&Method::GET, &headers, unversioned);
        assert_eq!(StatusCode::PARTIAL_CONTENT, response.status());
        assert_eq!("bytes 0-4/10", response.headers()[CONTENT_RANGE]);
        assert_eq!(b"01234".to_vec(), body_of(response).await);
    }

    #[tokio::test]
    async fn test_custom_version_lookup() {
        let feature = feature().with_version_lookup(|_: &Content, _: &HeaderMap| {
            vec![Version::EntityTag(crate::EntityTag::new("from-lookup"))]
        });

        let mut headers = request("bytes=0-9");
        headers.insert(IF_RANGE, HeaderValue::from_static("\"from-lookup\""));
        let response = feature.respond(&Method::GET, &headers, content());
        assert_eq!(StatusCode::PARTIAL_CONTENT, response.status());

        headers.insert(IF_RANGE, HeaderValue::from_static("\"v1\""));
        let response = feature.respond(&Method::GET, &headers, content());
        assert_eq!(StatusCode::OK, response.status());
    }

    #[tokio::test]
    async fn test_custom_compression_control() {
        #[derive(Clone, Copy)]
        struct Tagged;

        struct TagResponses;

        impl CompressionControl for TagResponses {
            fn suppress(&self, extensions: &mut Extensions) {
                extensions.insert(Tagged);
            }
        }

        let feature = feature().with_compression_control(TagResponses);
        let response = feature.respond(&Method::GET, &request("bytes=0-9"), content());
        assert!(response.extensions().get::<Tagged>().is_some());
        assert!(response.extensions().get::<CompressionSuppressed>().is_none());
    }

    #[tokio::test]
    async fn test_unknown_length_passes_through() {
        struct Unsized;

        impl crate::RangeBody for Unsized {
            fn byte_size(&self) -> Option<u64> {
                None
            }

            fn open_at(&self, start: u64) -> futures::future::BoxFuture<'static, std::io::Result<crate::BodyReader>> {
                BytesBody::from_static(b"no length").open_at(start)
            }
        }

        let response = feature().respond(&Method::GET, &request("bytes=0-1"), Content::new(Unsized));
        assert_eq!(StatusCode::OK, response.status());
        assert!(response.headers().get(CONTENT_RANGE).is_none());
        assert_eq!(b"no length".to_vec(), body_of(response).await);
    }

    #[tokio::test]
    async fn test_extensions_are_kept() {
        #[derive(Debug, Clone, PartialEq)]
        struct RequestId(u32);

        let mut response = content().into_response();
        response.extensions_mut().insert(RequestId(7));
        let response = feature().respond(&Method::GET, &request("bytes=0-9"), response);
        assert_eq!(Some(&RequestId(7)), response.extensions().get::<RequestId>());

        let plain = Response::new(Body::from("x"));
        let response = feature().respond(&Method::GET, &HeaderMap::new(), plain);
        assert!(response.headers().get(ACCEPT_RANGES).is_none());
    }
}
