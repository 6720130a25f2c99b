use std::collections::BTreeSet;

use booru_types::Post;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use tracing::{debug, info};

use crate::error::{DbError, Result};
use crate::models::{POST_COLUMNS, post_from_row};
use crate::query::PostQuery;
use crate::Store;

impl Store {
    /// Fetches a post and its tags from one snapshot.
    pub fn get_post(&self, id: i64) -> Result<Post> {
        self.read(|tx| {
            let mut post = query_post(tx, id)?.ok_or(DbError::NotFound(id))?;
            post.tags = query_tags(tx, id)?;
            Ok(post)
        })
    }

    /// Posts matching `terms`, newest first. See [`crate::query`] for the term
    /// syntax. `limit == 0` returns every match after `offset`.
    ///
    /// There is no total count: a page shorter than `limit` is the last one.
    pub fn list_posts<S: AsRef<str>>(
        &self,
        terms: &[S],
        offset: u64,
        limit: u64,
    ) -> Result<Vec<Post>> {
        let query = PostQuery::parse(terms);
        let (sql, args) = query.to_sql(offset, limit);
        debug!("Post query: {} ({} args)", sql, args.len());

        self.read(|tx| {
            let mut posts = {
                let mut stmt = tx.prepare(&sql)?;
                stmt.query_map(params_from_iter(args.iter()), post_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?
            };

            for post in &mut posts {
                post.tags = query_tags(tx, post.id)?;
            }

            Ok(posts)
        })
    }

    /// Inserts `post` and its tags, then writes the new id back onto it.
    ///
    /// Fails with [`DbError::DuplicateContent`] if a post with the same hash
    /// already exists.
    pub fn save_post(&self, post: &mut Post) -> Result<i64> {
        let id = self.write(|tx| {
            tx.execute(
                "INSERT INTO posts (author, score, source, rating, created, updated, booru, booru_id, hash, ext, width, height)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    post.author,
                    post.score,
                    post.source,
                    post.rating,
                    post.created.timestamp(),
                    post.updated.timestamp(),
                    post.booru,
                    post.booru_id,
                    post.hash,
                    post.ext,
                    post.width,
                    post.height,
                ],
            )
            .map_err(|e| duplicate_or(e, &post.hash))?;

            // Tags need the row id, so they go in after the post.
            let id = tx.last_insert_rowid();
            let mut stmt =
                tx.prepare_cached("INSERT OR IGNORE INTO posttag (post, tag) VALUES (?1, ?2)")?;
            for tag in &post.tags {
                stmt.execute(params![id, tag])?;
            }

            Ok(id)
        })?;

        post.id = id;
        info!("Post {} saved ({} tags, hash {})", id, post.tags.len(), post.hash);
        Ok(id)
    }

    /// Removes a post and all of its tag links. Returns the removed post so the
    /// caller can clean up its files.
    pub fn delete_post(&self, id: i64) -> Result<Post> {
        let post = self.write(|tx| {
            let mut post = query_post(tx, id)?.ok_or(DbError::NotFound(id))?;
            post.tags = query_tags(tx, id)?;

            tx.execute("DELETE FROM posttag WHERE post = ?1", [id])?;
            tx.execute("DELETE FROM posts WHERE id = ?1", [id])?;

            Ok(post)
        })?;

        info!("Post {} deleted", id);
        Ok(post)
    }
}

fn query_post(conn: &Connection, id: i64) -> Result<Option<Post>> {
    let post = conn
        .query_row(
            &format!("SELECT {} FROM posts WHERE id = ?1", POST_COLUMNS),
            [id],
            post_from_row,
        )
        .optional()?;
    Ok(post)
}

fn query_tags(conn: &Connection, id: i64) -> Result<BTreeSet<String>> {
    let mut stmt = conn.prepare_cached("SELECT tag FROM posttag WHERE post = ?1")?;
    let tags = stmt
        .query_map([id], |row| row.get(0))?
        .collect::<rusqlite::Result<BTreeSet<String>>>()?;
    Ok(tags)
}

/// Maps a unique-constraint failure on insert to [`DbError::DuplicateContent`].
fn duplicate_or(err: rusqlite::Error, hash: &str) -> DbError {
    match &err {
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
        {
            DbError::DuplicateContent(hash.to_owned())
        }
        _ => DbError::Storage(err),
    }
}
