use axum::http::header::{ACCEPT_RANGES, ALLOW, CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum_extra::headers::{AcceptRanges, ContentRange, HeaderMapExt};
use axum_extra::TypedHeader;
use rand::distr::{Alphanumeric, SampleString};

use crate::{ByteRange, Content, MultipartStream, RangedStream, BYTES_UNIT};

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Response headers and body chosen for a request. Implements [`IntoResponse`].
///
/// Headers are computed when the variant is built; nothing refers back to
/// the request.
#[derive(Debug)]
pub enum RangedResponse {
    /// The original response, with `Accept-Ranges` added.
    Bypass(Response),
    Single {
        status: StatusCode,
        headers: HeaderMap,
        stream: RangedStream,
    },
    Multiple {
        status: StatusCode,
        headers: HeaderMap,
        boundary: String,
        stream: MultipartStream,
    },
}

impl RangedResponse {
    pub fn bypass(mut response: Response) -> RangedResponse {
        add_accept_ranges(response.headers_mut());
        RangedResponse::Bypass(response)
    }

    /// One range of `content`. GET responses become `206 Partial Content`;
    /// HEAD responses keep `status`.
    pub fn single(
        method: &Method,
        status: StatusCode,
        mut headers: HeaderMap,
        content: &Content,
        range: ByteRange,
        length: u64,
    ) -> RangedResponse {
        // the transport derives Content-Length from the range
        headers.remove(CONTENT_LENGTH);
        add_accept_ranges(&mut headers);
        headers.typed_insert(range.content_range(length));

        RangedResponse::Single {
            status: partial_status(method, status),
            headers,
            stream: RangedStream::new(content.body().clone(), range),
        }
    }

    /// Several ranges of `content` as a `multipart/byteranges` document
    /// delimited by `boundary`.
    ///
    /// # Panics
    ///
    /// If `boundary` cannot appear in a header value. Boundaries from
    /// [`generate_boundary`] always can.
    pub fn multiple(
        method: &Method,
        status: StatusCode,
        mut headers: HeaderMap,
        content: &Content,
        ranges: &[ByteRange],
        length: u64,
        boundary: String,
    ) -> RangedResponse {
        let part_type = headers
            .remove(CONTENT_TYPE)
            .or_else(|| content.content_type().cloned())
            .and_then(|value| value.to_str().ok().map(str::to_owned))
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_owned());

        headers.remove(CONTENT_LENGTH);
        add_accept_ranges(&mut headers);
        let content_type = HeaderValue::try_from(format!("multipart/byteranges; boundary={boundary}"))
            .expect("generated boundaries are valid header values");
        headers.insert(CONTENT_TYPE, content_type);

        let stream = MultipartStream::new(content.body().clone(), ranges, length, &boundary, &part_type);
        RangedResponse::Multiple {
            status: partial_status(method, status),
            headers,
            boundary,
            stream,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            RangedResponse::Bypass(response) => response.status(),
            RangedResponse::Single { status, .. } | RangedResponse::Multiple { status, .. } => *status,
        }
    }

    pub fn headers(&self) -> &HeaderMap {
        match self {
            RangedResponse::Bypass(response) => response.headers(),
            RangedResponse::Single { headers, .. } | RangedResponse::Multiple { headers, .. } => headers,
        }
    }
}

impl IntoResponse for RangedResponse {
    fn into_response(self) -> Response {
        match self {
            RangedResponse::Bypass(response) => response,
            RangedResponse::Single { status, headers, stream } => (status, headers, stream).into_response(),
            RangedResponse::Multiple { status, headers, stream, .. } => (status, headers, stream).into_response(),
        }
    }
}

/// Error type indicating that the requested range was not satisfiable. Implements [`IntoResponse`].
#[derive(Debug, Clone, PartialEq)]
pub struct RangeNotSatisfiable(pub ContentRange);

impl RangeNotSatisfiable {
    /// `Content-Range: bytes */length`.
    pub fn new(length: u64) -> RangeNotSatisfiable {
        RangeNotSatisfiable(ContentRange::unsatisfied_bytes(length))
    }
}

impl IntoResponse for RangeNotSatisfiable {
    fn into_response(self) -> Response {
        let status = StatusCode::RANGE_NOT_SATISFIABLE;
        let accept_ranges = TypedHeader(AcceptRanges::bytes());
        let content_range = TypedHeader(self.0);
        (status, accept_ranges, content_range, ()).into_response()
    }
}

/// A range request made with a method other than GET or HEAD. Implements [`IntoResponse`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodNotAllowed(pub Method);

impl IntoResponse for MethodNotAllowed {
    fn into_response(self) -> Response {
        let message = format!("Method {} is not allowed with range request", self.0);
        let allow = [(ALLOW, HeaderValue::from_static("GET, HEAD"))];
        (StatusCode::METHOD_NOT_ALLOWED, allow, message).into_response()
    }
}

/// Fresh boundary token for one multipart response.
pub fn generate_boundary() -> String {
    format!("partial-content-{}", Alphanumeric.sample_string(&mut rand::rng(), 24))
}

/// Extract the `boundary` parameter from a `multipart/byteranges` content type.
pub fn extract_boundary(content_type: &str) -> Option<String> {
    let (mime, params) = content_type.split_once(';')?;
    if !mime.trim().eq_ignore_ascii_case("multipart/byteranges") {
        return None;
    }

    params.split(';').find_map(|param| {
        let (name, value) = param.split_once('=')?;
        if !name.trim().eq_ignore_ascii_case("boundary") {
            return None;
        }
        let value = value.trim().trim_matches('"');
        (!value.is_empty()).then(|| value.to_owned())
    })
}

pub(crate) fn add_accept_ranges(headers: &mut HeaderMap) {
    let present = headers
        .get_all(ACCEPT_RANGES)
        .iter()
        .any(|value| value.as_bytes().eq_ignore_ascii_case(BYTES_UNIT.as_bytes()));
    if !present {
        headers.append(ACCEPT_RANGES, HeaderValue::from_static(BYTES_UNIT));
    }
}

fn partial_status(method: &Method, status: StatusCode) -> StatusCode {
    if method == Method::GET {
        StatusCode::PARTIAL_CONTENT
    } else {
        status
    }
}
