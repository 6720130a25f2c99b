use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Post, parse_tags};

// -- Uploads --

/// The `info` part of an upload. Field names follow Danbooru so that mirrored
/// posts can be posted back as-is; unknown fields are ignored.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct PostInfo {
    pub author: Option<String>,
    pub score: i64,
    pub source: Option<String>,
    pub rating: String,
    #[serde(alias = "tags")]
    pub tag_string: String,
    pub booru: Option<String>,
    pub booru_id: Option<String>,
    pub image_width: u32,
    pub image_height: u32,
}

impl PostInfo {
    /// Builds the post this metadata describes. Content fields (`hash`, `ext`)
    /// are left for the ingestion pipeline to fill in.
    pub fn into_post(self, now: DateTime<Utc>) -> Post {
        Post {
            id: 0,
            author: self.author.filter(|s| !s.is_empty()),
            score: self.score,
            source: self.source.filter(|s| !s.is_empty()),
            rating: self.rating,
            tags: parse_tags(&self.tag_string),
            created: now,
            updated: now,
            booru: self.booru.filter(|s| !s.is_empty()),
            booru_id: self.booru_id.filter(|s| !s.is_empty()),
            hash: String::new(),
            ext: String::new(),
            width: self.image_width,
            height: self.image_height,
        }
    }
}

// -- Listing --

#[derive(Debug, Default, Deserialize)]
pub struct ListPostsQuery {
    pub tags: Option<String>,
    pub page: Option<u32>,
}

impl ListPostsQuery {
    pub fn terms(&self) -> Vec<String> {
        self.tags
            .as_deref()
            .map(|t| t.split_whitespace().map(str::to_owned).collect())
            .unwrap_or_default()
    }
}

// -- Responses --

/// A post shaped like a Danbooru post record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostRecord {
    pub id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    pub score: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub rating: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub booru: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub booru_id: Option<String>,
    pub md5: String,
    pub file_ext: String,
    pub image_width: u32,
    pub image_height: u32,
    pub tag_string: String,
    pub file_url: String,
    /// Danbooru calls the preview `large_file_url`; here it is the thumbnail.
    pub large_file_url: String,
}

impl PostRecord {
    pub fn new(post: Post, file_url: String, large_file_url: String) -> Self {
        let tag_string = post.tag_string();
        Self {
            id: post.id,
            author: post.author,
            score: post.score,
            source: post.source,
            rating: post.rating,
            created_at: post.created,
            updated_at: post.updated,
            booru: post.booru,
            booru_id: post.booru_id,
            md5: post.hash,
            file_ext: post.ext,
            image_width: post.width,
            image_height: post.height,
            tag_string,
            file_url,
            large_file_url,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
