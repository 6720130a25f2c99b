//! Mapping between `posts` rows and [`Post`].

use booru_types::Post;
use chrono::{DateTime, Utc};
use rusqlite::Row;

/// Column list shared by every post query; [`post_from_row`] reads in this order.
pub const POST_COLUMNS: &str =
    "id, author, score, source, rating, created, updated, booru, booru_id, hash, ext, width, height";

pub fn post_from_row(row: &Row<'_>) -> rusqlite::Result<Post> {
    Ok(Post {
        id: row.get(0)?,
        author: row.get(1)?,
        score: row.get(2)?,
        source: row.get(3)?,
        rating: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
        tags: Default::default(),
        created: from_unix(row.get(5)?),
        updated: from_unix(row.get(6)?),
        booru: row.get(7)?,
        booru_id: row.get(8)?,
        hash: row.get(9)?,
        ext: row.get(10)?,
        width: row.get(11)?,
        height: row.get(12)?,
    })
}

pub fn from_unix(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}
