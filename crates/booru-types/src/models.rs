use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One stored media item.
///
/// `hash` is the hex MD5 of the media bytes and is unique across the store;
/// together with `ext` it determines where the file lives on disk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub id: i64,

    pub author: Option<String>,
    pub score: i64,
    pub source: Option<String>,
    /// Free-form; "safe", "questionable" and "explicit" by convention only.
    pub rating: String,
    pub tags: BTreeSet<String>,

    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,

    /// Name of the booru this post was mirrored from.
    pub booru: Option<String>,
    /// Native id of this post on `booru`.
    pub booru_id: Option<String>,

    pub hash: String,
    pub ext: String,
    pub width: u32,
    pub height: u32,
}

impl Post {
    /// Space separated tag list, the way Danbooru clients expect it.
    pub fn tag_string(&self) -> String {
        self.tags.iter().map(String::as_str).collect::<Vec<_>>().join(" ")
    }
}

/// Splits a tag string on whitespace. Repeated tags collapse.
pub fn parse_tags(tag_string: &str) -> BTreeSet<String> {
    tag_string.split_whitespace().map(str::to_owned).collect()
}
