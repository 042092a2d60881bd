use std::io;
use std::path::{Path, PathBuf};

use axum::http::HeaderValue;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use tokio::fs::File;
use tokio::io::AsyncSeekExt;

use crate::{BodyReader, Content, RangeBody};

/// Implements [`RangeBody`] for a file on disk.
///
/// Every reader opens the file anew, so concurrent responses over the same
/// file never share a cursor.
#[derive(Debug, Clone)]
pub struct FileBody {
    path: PathBuf,
    byte_size: u64,
    modified: Option<DateTime<Utc>>,
}

impl FileBody {
    /// Calls [`tokio::fs::metadata`] to determine file size and modification time.
    pub async fn open(path: impl Into<PathBuf>) -> io::Result<FileBody> {
        let path = path.into();
        let metadata = tokio::fs::metadata(&path).await?;
        if !metadata.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a regular file", path.display()),
            ));
        }
        let modified = metadata.modified().ok().map(DateTime::<Utc>::from);
        Ok(FileBody { path, byte_size: metadata.len(), modified })
    }

    /// Construct a [`FileBody`] with a byte size supplied manually.
    pub fn sized(path: impl Into<PathBuf>, byte_size: u64) -> FileBody {
        FileBody { path: path.into(), byte_size, modified: None }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn modified(&self) -> Option<DateTime<Utc>> {
        self.modified
    }

    /// Content type guessed from the file extension.
    pub fn content_type(&self) -> HeaderValue {
        let mime = mime_guess::from_path(&self.path).first_or_octet_stream();
        HeaderValue::from_str(mime.as_ref())
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"))
    }

    /// Wrap into a [`Content`] with content type and modification time set.
    pub fn into_content(self) -> Content {
        let content_type = self.content_type();
        let modified = self.modified;
        let content = Content::new(self).with_content_type(content_type);
        match modified {
            Some(at) => content.with_last_modified(at),
            None => content,
        }
    }
}

impl RangeBody for FileBody {
    fn byte_size(&self) -> Option<u64> {
        Some(self.byte_size)
    }

    fn open_at(&self, start: u64) -> BoxFuture<'static, io::Result<BodyReader>> {
        let path = self.path.clone();
        Box::pin(async move {
            let mut file = File::open(&path).await?;
            if start > 0 {
                file.seek(io::SeekFrom::Start(start)).await?;
            }
            Ok(Box::pin(file) as BodyReader)
        })
    }
}
