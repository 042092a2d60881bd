use std::fmt;
use std::future::Future;
use std::io;
use std::mem;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::response::{IntoResponse, Response};
use bytes::{Bytes, BytesMut};
use futures::future::BoxFuture;
use futures::Stream;
use http_body::{Body, Frame, SizeHint};
use tokio::io::{AsyncRead, ReadBuf};

use crate::{BodyReader, ByteRange, RangeBody};

const IO_BUFFER_SIZE: usize = 64 * 1024;

const CRLF: &[u8] = b"\r\n";

/// Response body stream over one byte range of a [`RangeBody`].
/// Implements [`Stream`], [`Body`], and [`IntoResponse`].
///
/// The reader is opened on first poll and dropped as soon as the last byte
/// of the range has been read.
pub struct RangedStream {
    state: StreamState,
    remaining: Option<u64>,
    body: Arc<dyn RangeBody>,
}

enum StreamState {
    Open { start: u64 },
    Opening(BoxFuture<'static, io::Result<BodyReader>>),
    Reading { reader: BodyReader, buffer: BytesMut },
    Done,
}

impl RangedStream {
    pub(crate) fn new(body: Arc<dyn RangeBody>, range: ByteRange) -> RangedStream {
        RangedStream {
            state: StreamState::Open { start: range.start },
            remaining: Some(range.len()),
            body,
        }
    }

    /// The whole body; runs until the reader is exhausted if the size is unknown.
    pub(crate) fn full(body: Arc<dyn RangeBody>) -> RangedStream {
        RangedStream {
            state: StreamState::Open { start: 0 },
            remaining: body.byte_size(),
            body,
        }
    }

    /// Bytes left to produce, if known.
    pub fn remaining(&self) -> Option<u64> {
        self.remaining
    }
}

impl fmt::Debug for RangedStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.state {
            StreamState::Open { .. } => "open",
            StreamState::Opening(_) => "opening",
            StreamState::Reading { .. } => "reading",
            StreamState::Done => "done",
        };
        f.debug_struct("RangedStream")
            .field("state", &state)
            .field("remaining", &self.remaining)
            .finish()
    }
}

impl IntoResponse for RangedStream {
    fn into_response(self) -> Response {
        Response::new(axum::body::Body::new(self))
    }
}

impl Body for RangedStream {
    type Data = Bytes;
    type Error = io::Error;

    fn size_hint(&self) -> SizeHint {
        match self.remaining {
            Some(remaining) => SizeHint::with_exact(remaining),
            None => SizeHint::default(),
        }
    }

    fn is_end_stream(&self) -> bool {
        matches!(self.state, StreamState::Done) || self.remaining == Some(0)
    }

    fn poll_frame(self: Pin<&mut Self>, cx: &mut Context<'_>)
        -> Poll<Option<io::Result<Frame<Bytes>>>>
    {
        self.poll_next(cx).map(|item| item.map(|result| result.map(Frame::data)))
    }
}

impl Stream for RangedStream {
    type Item = io::Result<Bytes>;

    fn poll_next(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>
    ) -> Poll<Option<io::Result<Bytes>>> {
        let this = self.get_mut();

        loop {
            match &mut this.state {
                StreamState::Open { start } => {
                    if this.remaining == Some(0) {
                        this.state = StreamState::Done;
                        continue;
                    }
                    let future = this.body.open_at(*start);
                    this.state = StreamState::Opening(future);
                }

                StreamState::Opening(future) => match future.as_mut().poll(cx) {
                    Poll::Pending => return Poll::Pending,
                    Poll::Ready(Err(e)) => {
                        this.state = StreamState::Done;
                        return Poll::Ready(Some(Err(e)));
                    }
                    Poll::Ready(Ok(reader)) => {
                        let buffer = allocate_buffer(this.remaining);
                        this.state = StreamState::Reading { reader, buffer };
                    }
                },

                StreamState::Reading { reader, buffer } => {
                    let uninit = buffer.spare_capacity_mut();
                    let capacity = std::cmp::min(uninit.len(), IO_BUFFER_SIZE);

                    // never read past the end of the range
                    let nbytes = match this.remaining {
                        Some(remaining) => std::cmp::min(
                            capacity,
                            usize::try_from(remaining).unwrap_or(usize::MAX),
                        ),
                        None => capacity,
                    };

                    let mut read_buf = ReadBuf::uninit(&mut uninit[0..nbytes]);

                    match reader.as_mut().poll_read(cx, &mut read_buf) {
                        Poll::Pending => return Poll::Pending,
                        Poll::Ready(Err(e)) => {
                            this.state = StreamState::Done;
                            return Poll::Ready(Some(Err(e)));
                        }
                        Poll::Ready(Ok(())) => {
                            let n = read_buf.filled().len();
                            if n == 0 {
                                this.state = StreamState::Done;
                                return match this.remaining {
                                    Some(remaining) if remaining > 0 => Poll::Ready(Some(Err(io::Error::new(
                                        io::ErrorKind::UnexpectedEof,
                                        format!("body ended with {remaining} bytes of the range unread"),
                                    )))),
                                    _ => Poll::Ready(None),
                                };
                            }

                            // SAFETY: poll_read has filled the buffer with `n`
                            // additional bytes. `buffer.len` should always be
                            // 0 here, but include it for rigorous correctness
                            unsafe { buffer.set_len(buffer.len() + n); }

                            let chunk = mem::replace(buffer, allocate_buffer(this.remaining)).freeze();

                            if let Some(remaining) = this.remaining.as_mut() {
                                // n is at most `remaining` due to the cmp::min above
                                *remaining -= n as u64;
                                if *remaining == 0 {
                                    // release the reader before handing out the last chunk
                                    this.state = StreamState::Done;
                                }
                            }

                            return Poll::Ready(Some(Ok(chunk)));
                        }
                    }
                }

                StreamState::Done => return Poll::Ready(None),
            }
        }
    }
}

/// `multipart/byteranges` response body stream.
/// Implements [`Stream`], [`Body`], and [`IntoResponse`].
///
/// Parts are produced in order. Each part reads through its own
/// [`RangedStream`], which is dropped before the next part is opened.
pub struct MultipartStream {
    state: MultipartState,
    parts: Vec<Part>,
    current_part: usize,
    trailer: Bytes,
    remaining: u64,
    body: Arc<dyn RangeBody>,
}

struct Part {
    range: ByteRange,
    header: Bytes,
}

enum MultipartState {
    WritingHeader,
    WritingBody(RangedStream),
    WritingDelimiter,
    WritingFinalBoundary,
    Finished,
}

impl MultipartStream {
    pub(crate) fn new(
        body: Arc<dyn RangeBody>,
        ranges: &[ByteRange],
        total_size: u64,
        boundary: &str,
        content_type: &str,
    ) -> MultipartStream {
        let parts: Vec<Part> = ranges
            .iter()
            .map(|range| Part {
                range: *range,
                header: Bytes::from(format!(
                    "--{boundary}\r\n\
                     Content-Type: {content_type}\r\n\
                     Content-Range: bytes {range}/{total_size}\r\n\r\n"
                )),
            })
            .collect();
        let trailer = Bytes::from(format!("--{boundary}--\r\n"));

        let remaining = parts
            .iter()
            .map(|part| part.header.len() as u64 + part.range.len() + CRLF.len() as u64)
            .sum::<u64>()
            + trailer.len() as u64;

        let state = if parts.is_empty() {
            MultipartState::WritingFinalBoundary
        } else {
            MultipartState::WritingHeader
        };

        MultipartStream { state, parts, current_part: 0, trailer, remaining, body }
    }

    /// Ranges served by this stream, in order.
    pub fn ranges(&self) -> impl Iterator<Item = ByteRange> + '_ {
        self.parts.iter().map(|part| part.range)
    }

    /// Bytes left to produce.
    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    fn emit(&mut self, chunk: Bytes) -> Poll<Option<io::Result<Bytes>>> {
        self.remaining = self.remaining.saturating_sub(chunk.len() as u64);
        Poll::Ready(Some(Ok(chunk)))
    }
}

impl fmt::Debug for MultipartStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultipartStream")
            .field("ranges", &self.ranges().collect::<Vec<_>>())
            .field("current_part", &self.current_part)
            .field("remaining", &self.remaining)
            .finish()
    }
}

impl IntoResponse for MultipartStream {
    fn into_response(self) -> Response {
        Response::new(axum::body::Body::new(self))
    }
}

impl Body for MultipartStream {
    type Data = Bytes;
    type Error = io::Error;

    fn size_hint(&self) -> SizeHint {
        SizeHint::with_exact(self.remaining)
    }

    fn is_end_stream(&self) -> bool {
        matches!(self.state, MultipartState::Finished)
    }

    fn poll_frame(self: Pin<&mut Self>, cx: &mut Context<'_>)
        -> Poll<Option<io::Result<Frame<Bytes>>>>
    {
        self.poll_next(cx).map(|item| item.map(|result| result.map(Frame::data)))
    }
}

impl Stream for MultipartStream {
    type Item = io::Result<Bytes>;

    fn poll_next(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>
    ) -> Poll<Option<io::Result<Bytes>>> {
        let this = self.get_mut();

        loop {
            match &mut this.state {
                MultipartState::WritingHeader => {
                    let part = &this.parts[this.current_part];
                    let header = part.header.clone();
                    let stream = RangedStream::new(this.body.clone(), part.range);
                    this.state = MultipartState::WritingBody(stream);
                    return this.emit(header);
                }

                MultipartState::WritingBody(stream) => match Pin::new(stream).poll_next(cx) {
                    Poll::Pending => return Poll::Pending,
                    Poll::Ready(Some(Ok(chunk))) => return this.emit(chunk),
                    Poll::Ready(Some(Err(e))) => {
                        this.state = MultipartState::Finished;
                        return Poll::Ready(Some(Err(e)));
                    }
                    Poll::Ready(None) => {
                        // drops the finished part stream along with its reader
                        this.state = MultipartState::WritingDelimiter;
                    }
                },

                MultipartState::WritingDelimiter => {
                    this.current_part += 1;
                    this.state = if this.current_part < this.parts.len() {
                        MultipartState::WritingHeader
                    } else {
                        MultipartState::WritingFinalBoundary
                    };
                    return this.emit(Bytes::from_static(CRLF));
                }

                MultipartState::WritingFinalBoundary => {
                    this.state = MultipartState::Finished;
                    let trailer = this.trailer.clone();
                    return this.emit(trailer);
                }

                MultipartState::Finished => return Poll::Ready(None),
            }
        }
    }
}

fn allocate_buffer(remaining: Option<u64>) -> BytesMut {
    let capacity = remaining
        .and_then(|remaining| usize::try_from(remaining).ok())
        .map_or(IO_BUFFER_SIZE, |remaining| remaining.clamp(1, IO_BUFFER_SIZE));
    BytesMut::with_capacity(capacity)
}
