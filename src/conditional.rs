//! `If-Range` evaluation against the versions of the content being served.

use std::fmt;

use axum::http::header::{ETAG, LAST_MODIFIED};
use axum::http::HeaderMap;
use chrono::{DateTime, NaiveDateTime, Utc};

use crate::Content;

/// An entity tag, stored in its quoted form without any weak marker.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityTag(String);

impl EntityTag {
    /// Normalizes `tag`: a leading `W/` is dropped and bare tags are quoted,
    /// so `W/"abc"`, `"abc"` and `abc` all compare equal.
    pub fn new(tag: impl AsRef<str>) -> EntityTag {
        let tag = tag.as_ref().trim();
        let tag = tag.strip_prefix("W/").unwrap_or(tag);
        if tag.len() >= 2 && tag.starts_with('"') && tag.ends_with('"') {
            EntityTag(tag.to_owned())
        } else {
            EntityTag(format!("\"{tag}\""))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A validator describing the current state of some content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Version {
    EntityTag(EntityTag),
    LastModified(DateTime<Utc>),
}

/// Supplies the versions of a piece of content.
pub trait VersionLookup: Send + Sync + 'static {
    /// `headers` are the headers of the response carrying `content`.
    fn versions(&self, content: &Content, headers: &HeaderMap) -> Vec<Version>;
}

impl<F> VersionLookup for F
where
    F: Fn(&Content, &HeaderMap) -> Vec<Version> + Send + Sync + 'static,
{
    fn versions(&self, content: &Content, headers: &HeaderMap) -> Vec<Version> {
        self(content, headers)
    }
}

/// Uses the versions declared on the [`Content`]. Content without declared
/// versions falls back to the `ETag` and `Last-Modified` response headers.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeclaredVersions;

impl VersionLookup for DeclaredVersions {
    fn versions(&self, content: &Content, headers: &HeaderMap) -> Vec<Version> {
        if !content.versions().is_empty() {
            return content.versions().to_vec();
        }

        let mut versions = Vec::new();
        if let Some(tag) = headers.get(ETAG).and_then(|value| value.to_str().ok()) {
            versions.push(Version::EntityTag(EntityTag::new(tag)));
        }
        if let Some(date) = headers
            .get(LAST_MODIFIED)
            .and_then(|value| value.to_str().ok())
            .and_then(parse_http_date)
        {
            versions.push(Version::LastModified(date));
        }
        versions
    }
}

/// A parsed `If-Range` precondition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IfRange {
    Date(DateTime<Utc>),
    EntityTags(Vec<EntityTag>),
}

impl IfRange {
    /// A value that reads as an HTTP date is a date; anything else is taken
    /// as a comma separated list of entity tags.
    pub fn parse(value: &str) -> Option<IfRange> {
        if let Some(date) = parse_http_date(value) {
            return Some(IfRange::Date(date));
        }

        let tags: Vec<EntityTag> = value
            .split(',')
            .map(str::trim)
            .filter(|tag| !tag.is_empty() && *tag != "W/")
            .map(EntityTag::new)
            .collect();

        if tags.is_empty() {
            None
        } else {
            Some(IfRange::EntityTags(tags))
        }
    }

    /// Entity tags hold if any known tag is listed. A date holds if no known
    /// modification time is later than it; content with an entity tag never
    /// matches a date.
    pub fn is_satisfied_by(&self, versions: &[Version]) -> bool {
        match self {
            IfRange::EntityTags(tags) => versions.iter().any(|version| {
                matches!(version, Version::EntityTag(tag) if tags.contains(tag))
            }),
            // HTTP dates carry whole seconds only
            IfRange::Date(date) => versions.iter().all(|version| match version {
                Version::LastModified(at) => at.timestamp() <= date.timestamp(),
                Version::EntityTag(_) => false,
            }),
        }
    }
}

/// Whether range processing may go ahead. A missing precondition always
/// holds; one that cannot be parsed never does.
pub fn if_range_holds(if_range: Option<&str>, versions: &[Version]) -> bool {
    match if_range {
        None => true,
        Some(value) => IfRange::parse(value).is_some_and(|condition| condition.is_satisfied_by(versions)),
    }
}

/// Parse an HTTP date in any of the three formats of RFC 7231 §7.1.1.1.
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(date) = DateTime::parse_from_rfc2822(value) {
        return Some(date.with_timezone(&Utc));
    }

    if let Ok(date) = NaiveDateTime::parse_from_str(value, "%A, %d-%b-%y %H:%M:%S GMT") {
        return Some(date.and_utc());
    }

    // asctime pads single digit days with a space
    let asctime = value.split_whitespace().collect::<Vec<_>>().join(" ");
    NaiveDateTime::parse_from_str(&asctime, "%a %b %d %H:%M:%S %Y")
        .ok()
        .map(|date| date.and_utc())
}
