use rusqlite::Connection;
use tracing::info;

use crate::error::{DbError, Result};

/// Current schema, applied in one step to a fresh store.
pub const SCHEMA: &str = "
    CREATE TABLE posts (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,

        author      TEXT,
        score       INTEGER NOT NULL DEFAULT 0,
        source      TEXT,
        rating      TEXT,
        created     INTEGER NOT NULL DEFAULT 0,
        updated     INTEGER NOT NULL DEFAULT 0,

        booru       TEXT,
        booru_id    TEXT,

        hash        TEXT UNIQUE NOT NULL,
        ext         TEXT NOT NULL,
        width       INTEGER NOT NULL DEFAULT 0,
        height      INTEGER NOT NULL DEFAULT 0
    );

    CREATE TABLE posttag (
        post    INTEGER NOT NULL,
        tag     TEXT NOT NULL,
        UNIQUE(post, tag)
    );

    CREATE INDEX idx_posttag_tag ON posttag(tag);
";

/// Upgrade scripts. Entry `n` takes a store from version `n` to `n + 1`;
/// entry 0 stands for the base schema and is never run.
pub const UPGRADES: &[&str] = &[
    "",
    "
    CREATE TABLE posts_new (
        id          INTEGER PRIMARY KEY,

        author      TEXT,
        score       INTEGER NOT NULL DEFAULT 0,
        source      TEXT,
        rating      TEXT,
        created     INTEGER NOT NULL DEFAULT 0,
        updated     INTEGER NOT NULL DEFAULT 0,

        booru       TEXT,
        booru_id    TEXT,

        hash        TEXT UNIQUE NOT NULL,
        ext         TEXT NOT NULL,
        width       INTEGER NOT NULL DEFAULT 0,
        height      INTEGER NOT NULL DEFAULT 0
    );
    INSERT INTO posts_new SELECT * FROM posts;
    DROP TABLE posts;
    ALTER TABLE posts_new RENAME TO posts;
    ",
    "
    CREATE TABLE posts_new (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,

        author      TEXT,
        score       INTEGER NOT NULL DEFAULT 0,
        source      TEXT,
        rating      TEXT,
        created     INTEGER NOT NULL DEFAULT 0,
        updated     INTEGER NOT NULL DEFAULT 0,

        booru       TEXT,
        booru_id    TEXT,

        hash        TEXT UNIQUE NOT NULL,
        ext         TEXT NOT NULL,
        width       INTEGER NOT NULL DEFAULT 0,
        height      INTEGER NOT NULL DEFAULT 0
    );
    INSERT INTO posts_new SELECT * FROM posts;
    DROP TABLE posts;
    ALTER TABLE posts_new RENAME TO posts;

    CREATE INDEX IF NOT EXISTS idx_posttag_tag ON posttag(tag);
    ",
];

/// Schema version of a fully migrated store.
pub const LATEST: i64 = UPGRADES.len() as i64;

pub fn version(conn: &Connection) -> Result<i64> {
    Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?)
}

/// Brings the schema up to [`LATEST`].
///
/// Every script and the version bump share one transaction, so a failure
/// leaves the store exactly as it was.
pub fn run(conn: &mut Connection) -> Result<()> {
    let current = version(conn)?;

    if current > LATEST {
        return Err(DbError::UnsupportedVersion(current));
    }
    if current == LATEST {
        return Ok(());
    }

    let tx = conn.transaction().map_err(|source| DbError::Migration {
        version: current,
        source,
    })?;

    if current == 0 {
        info!("Applying base schema (version {})", LATEST);
        tx.execute_batch(SCHEMA)
            .map_err(|source| DbError::Migration { version: LATEST, source })?;
    } else {
        for (from, script) in UPGRADES.iter().enumerate().skip(current as usize) {
            let to = from as i64 + 1;
            info!("Migrating schema from version {} to {}", from, to);
            tx.execute_batch(script)
                .map_err(|source| DbError::Migration { version: to, source })?;
        }
    }

    tx.pragma_update(None, "user_version", LATEST)
        .map_err(|source| DbError::Migration { version: LATEST, source })?;
    tx.commit()
        .map_err(|source| DbError::Migration { version: LATEST, source })?;

    info!("Schema at version {}", LATEST);
    Ok(())
}
