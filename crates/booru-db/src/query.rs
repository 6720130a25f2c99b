//! Search terms to SQL.
//!
//! Terms are parsed into a [`PostQuery`]: a list of [`Filter`]s that all have
//! to hold. Rendering to SQL is a separate step so the composition rules can
//! be checked without a database.
//!
//! Term syntax:
//! - `rating:<value>` matches the rating exactly.
//! - `md5:<value>` looks a single post up by content hash and overrides every
//!   other term.
//! - `score:<value>` is accepted and has no effect yet.
//! - anything else is a tag; a post must carry every requested tag.

use std::collections::BTreeSet;

use rusqlite::types::Value;

use crate::models::POST_COLUMNS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Rating,
}

impl Field {
    fn column(self) -> &'static str {
        match self {
            Field::Rating => "rating",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    /// Posts tagged with every tag in the set.
    TagIntersection(BTreeSet<String>),
    ExactMatch { field: Field, value: String },
    /// The post with this content hash, if any.
    HashLookup(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostQuery {
    filters: Vec<Filter>,
}

impl PostQuery {
    pub fn parse<S: AsRef<str>>(terms: &[S]) -> Self {
        let mut tags = BTreeSet::new();
        let mut rating: Option<String> = None;

        for term in terms.iter().map(AsRef::as_ref) {
            if term.is_empty() {
                continue;
            }

            if let Some(hash) = term.strip_prefix("md5:") {
                // At most one post can match, so nothing else matters.
                return Self {
                    filters: vec![Filter::HashLookup(hash.to_owned())],
                };
            } else if let Some(value) = term.strip_prefix("rating:") {
                rating = Some(value.to_owned()).filter(|v| !v.is_empty());
            } else if term.starts_with("score:") {
                // TODO: decide on a comparison syntax (`score:>10`, ranges) before filtering on it.
            } else {
                tags.insert(term.to_owned());
            }
        }

        let mut filters = Vec::new();
        if !tags.is_empty() {
            filters.push(Filter::TagIntersection(tags));
        }
        if let Some(value) = rating {
            filters.push(Filter::ExactMatch {
                field: Field::Rating,
                value,
            });
        }

        Self { filters }
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    /// Renders the query as a `SELECT` over `posts`, newest first.
    ///
    /// A `limit` of 0 means no limit.
    pub fn to_sql(&self, offset: u64, limit: u64) -> (String, Vec<Value>) {
        let mut sql = format!("SELECT {} FROM posts", POST_COLUMNS);
        let mut args: Vec<Value> = Vec::new();

        let mut clauses = Vec::with_capacity(self.filters.len());
        for filter in &self.filters {
            clauses.push(render_filter(filter, &mut args));
        }
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }

        sql.push_str(" ORDER BY id DESC");

        // SQLite only accepts OFFSET after a LIMIT; -1 lifts the limit.
        if limit > 0 || offset > 0 {
            sql.push_str(" LIMIT ?");
            args.push(Value::Integer(if limit > 0 { clamp(limit) } else { -1 }));
        }
        if offset > 0 {
            sql.push_str(" OFFSET ?");
            args.push(Value::Integer(clamp(offset)));
        }

        (sql, args)
    }
}

fn render_filter(filter: &Filter, args: &mut Vec<Value>) -> String {
    match filter {
        Filter::TagIntersection(tags) => {
            let placeholders = vec!["?"; tags.len()].join(", ");
            args.extend(tags.iter().cloned().map(Value::Text));
            // A post qualifies when it carries as many of the requested tags as
            // were asked for. (post, tag) is unique, so COUNT(*) counts distinct tags.
            args.push(Value::Integer(tags.len() as i64));
            format!(
                "id IN (SELECT post FROM posttag WHERE tag IN ({}) GROUP BY post HAVING COUNT(*) = ?)",
                placeholders
            )
        }
        Filter::ExactMatch { field, value } => {
            args.push(Value::Text(value.clone()));
            format!("{} = ?", field.column())
        }
        Filter::HashLookup(hash) => {
            args.push(Value::Text(hash.clone()));
            "hash = ?".to_string()
        }
    }
}

fn clamp(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}
