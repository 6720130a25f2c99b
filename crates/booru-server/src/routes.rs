use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, Path, Query, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use booru_db::Store;
use booru_types::Post;
use booru_types::api::{ListPostsQuery, PostRecord};
use tower::ServiceBuilder;
use tower_http::services::ServeDir;
use tracing::{info, warn};

use crate::error::ApiError;
use crate::ingest::{self, Ingestor};
use crate::storage::{MediaStore, media_key, thumb_key};

/// Page size of `/posts.json`; page `n` starts at `n * PAGE_LIMIT`.
pub const PAGE_LIMIT: u64 = 50;

/// Shared application state for all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub media: Arc<MediaStore>,
    pub ingestor: Ingestor,
    pub base_url: String,
}

impl AppState {
    /// Shapes a post for the API, adding its file and thumbnail URLs.
    fn record(&self, post: Post) -> PostRecord {
        let file_url = format!("{}/img/{}", self.base_url, media_key(&post.hash, &post.ext));
        let thumb_url = format!("{}/img/{}", self.base_url, thumb_key(&post.hash));
        PostRecord::new(post, file_url, thumb_url)
    }
}

pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    let media = ServiceBuilder::new()
        .layer(middleware::from_fn(hide_dotfiles))
        .service(ServeDir::new(state.media.root()));

    Router::new()
        .route("/posts.json", get(list_posts))
        .route("/posts/{id}", get(get_post).delete(delete_post))
        .route(
            "/post",
            post(create_post).layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .route("/health", get(health))
        .nest_service("/img", media)
        .with_state(state)
}

// ── Handlers ────────────────────────────────────────────────────────────

/// GET /posts.json?tags=a+b&page=0: newest first, `PAGE_LIMIT` per page.
pub async fn list_posts(
    State(state): State<AppState>,
    Query(query): Query<ListPostsQuery>,
) -> Result<Json<Vec<PostRecord>>, ApiError> {
    let terms = query.terms();
    let offset = u64::from(query.page.unwrap_or(0)) * PAGE_LIMIT;

    let store = state.store.clone();
    let posts =
        tokio::task::spawn_blocking(move || store.list_posts(terms.as_slice(), offset, PAGE_LIMIT))
            .await??;

    Ok(Json(posts.into_iter().map(|p| state.record(p)).collect()))
}

/// GET /posts/{id}.json
pub async fn get_post(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> Result<Json<PostRecord>, ApiError> {
    let id = parse_post_id(&raw_id)?;

    let store = state.store.clone();
    let post = tokio::task::spawn_blocking(move || store.get_post(id)).await??;

    Ok(Json(state.record(post)))
}

/// POST /post: multipart upload with an `info` JSON part and a `file` part.
pub async fn create_post(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let upload = ingest::read_upload(&state.media, &mut multipart).await?;
    let post = state.ingestor.ingest(upload).await?;

    Ok((StatusCode::CREATED, Json(state.record(post))))
}

/// DELETE /posts/{id}.json removes the post, its tags and its files.
pub async fn delete_post(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = parse_post_id(&raw_id)?;

    let store = state.store.clone();
    let post = tokio::task::spawn_blocking(move || store.delete_post(id)).await??;

    // The post is gone either way; leftover files are only logged.
    if let Err(e) = state.media.delete(&post.hash, &post.ext).await {
        warn!("Post {} deleted but its files were not: {:#}", id, e);
    }

    info!("Post {} removed", id);
    Ok(StatusCode::NO_CONTENT)
}

/// GET /health
pub async fn health() -> &'static str {
    "ok"
}

// ── Helpers ─────────────────────────────────────────────────────────────

/// Accepts `123` and `123.json`. Anything else is an unknown post.
fn parse_post_id(raw: &str) -> Result<i64, ApiError> {
    raw.strip_suffix(".json")
        .unwrap_or(raw)
        .parse()
        .map_err(|_| ApiError::NotFound(raw.to_owned()))
}

/// Keeps the staging area and other dot-paths out of static serving.
///
/// `ServeDir` decodes the path before touching the filesystem, so the check
/// runs on the decoded form too.
async fn hide_dotfiles(req: Request, next: Next) -> Response {
    if is_hidden(req.uri().path()) {
        return StatusCode::NOT_FOUND.into_response();
    }
    next.run(req).await
}

fn is_hidden(path: &str) -> bool {
    match urlencoding::decode(path) {
        Ok(decoded) => decoded
            .split(['/', '\\'])
            .any(|seg| seg.starts_with('.')),
        Err(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Method, header};
    use http_body_util::BodyExt;
    use md5::{Digest, Md5};
    use tempfile::TempDir;
    use tower::ServiceExt;

    use crate::thumbnail::ImageThumbnailer;

    const BOUNDARY: &str = "localbooru-test-boundary";
    const BASE_URL: &str = "http://booru.test";

    struct Part<'a> {
        name: &'a str,
        file_name: Option<&'a str>,
        content_type: Option<&'a str>,
        data: &'a [u8],
    }

    fn info(json: &str) -> Part<'_> {
        Part {
            name: "info",
            file_name: None,
            content_type: None,
            data: json.as_bytes(),
        }
    }

    fn file<'a>(file_name: &'a str, data: &'a [u8]) -> Part<'a> {
        Part {
            name: "file",
            file_name: Some(file_name),
            content_type: Some("application/octet-stream"),
            data,
        }
    }

    fn multipart(parts: &[Part<'_>]) -> Vec<u8> {
        let mut body = Vec::new();
        for part in parts {
            body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
            let mut disposition = format!("Content-Disposition: form-data; name=\"{}\"", part.name);
            if let Some(file_name) = part.file_name {
                disposition.push_str(&format!("; filename=\"{}\"", file_name));
            }
            body.extend_from_slice(disposition.as_bytes());
            body.extend_from_slice(b"\r\n");
            if let Some(content_type) = part.content_type {
                body.extend_from_slice(format!("Content-Type: {}\r\n", content_type).as_bytes());
            }
            body.extend_from_slice(b"\r\n");
            body.extend_from_slice(part.data);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
        body
    }

    async fn app() -> (TempDir, Router, AppState) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open(&dir.path().join("lb.db")).unwrap());
        let media = Arc::new(MediaStore::new(dir.path().join("img")).await.unwrap());
        let ingestor = Ingestor::new(store.clone(), media.clone(), Arc::new(ImageThumbnailer));
        let state = AppState {
            store,
            media,
            ingestor,
            base_url: BASE_URL.into(),
        };
        (dir, router(state.clone(), 1024 * 1024), state)
    }

    async fn send(app: &Router, method: Method, uri: &str, body: Body) -> (StatusCode, Vec<u8>) {
        let mut req = axum::http::Request::builder().method(method).uri(uri);
        if uri == "/post" {
            req = req.header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            );
        }
        let resp = app.clone().oneshot(req.body(body).unwrap()).await.unwrap();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        (status, bytes.to_vec())
    }

    async fn upload(app: &Router, parts: &[Part<'_>]) -> (StatusCode, Vec<u8>) {
        send(app, Method::POST, "/post", Body::from(multipart(parts))).await
    }

    async fn get_json(app: &Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let (status, body) = send(app, Method::GET, uri, Body::empty()).await;
        (status, serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null))
    }

    fn ids(value: &serde_json::Value) -> Vec<i64> {
        value
            .as_array()
            .unwrap()
            .iter()
            .map(|p| p["id"].as_i64().unwrap())
            .collect()
    }

    fn staged_count(state: &AppState) -> usize {
        std::fs::read_dir(state.media.root().join(".staging")).unwrap().count()
    }

    #[tokio::test]
    async fn upload_stores_post_and_file() {
        let (_dir, app, state) = app().await;
        let content = b"0123456789";

        let (status, body) = upload(
            &app,
            &[info(r#"{"tag_string":"x y","rating":"safe"}"#), file("ten.bin", content)],
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let record: PostRecord = serde_json::from_slice(&body).unwrap();
        let hash = hex::encode(Md5::digest(content));
        assert_eq!(record.md5, hash);
        assert_eq!(record.tag_string, "x y");
        assert_eq!(record.file_ext, "bin");
        assert_eq!(
            record.file_url,
            format!("{}/img/{}/{}/{}.bin", BASE_URL, &hash[..2], &hash[2..4], hash)
        );
        assert_eq!(
            record.large_file_url,
            format!("{}/img/{}/{}/{}.thumb.jpg", BASE_URL, &hash[..2], &hash[2..4], hash)
        );

        let stored = std::fs::read(state.media.media_path(&hash, "bin")).unwrap();
        assert_eq!(stored, content);
        assert_eq!(staged_count(&state), 0);

        // Served back from the static tree.
        let (status, served) =
            send(&app, Method::GET, &format!("/img/{}", media_key(&hash, "bin")), Body::empty()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(served, content);
    }

    #[tokio::test]
    async fn duplicate_upload_conflicts() {
        let (_dir, app, _state) = app().await;
        let parts = [info(r#"{"tags":"a","rating":"safe"}"#), file("a.png", b"same")];

        assert_eq!(upload(&app, &parts).await.0, StatusCode::CREATED);
        let (status, body) = upload(&app, &parts).await;
        assert_eq!(status, StatusCode::CONFLICT);
        let err: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!(err["error"].as_str().unwrap().contains("duplicate"));

        let (_, posts) = get_json(&app, "/posts.json").await;
        assert_eq!(ids(&posts), vec![1]);
    }

    #[tokio::test]
    async fn incomplete_uploads_are_rejected() {
        let (_dir, app, state) = app().await;

        let (status, _) = upload(&app, &[info(r#"{"tags":"a"}"#)]).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = upload(&app, &[file("a.png", b"no metadata")]).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = upload(
            &app,
            &[info("{}"), file("a.png", b"one"), file("b.png", b"two")],
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = upload(&app, &[info("not json"), file("a.png", b"x")]).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, posts) = get_json(&app, "/posts.json").await;
        assert!(ids(&posts).is_empty());
        assert_eq!(staged_count(&state), 0);
    }

    #[tokio::test]
    async fn listing_filters_and_paginates() {
        let (_dir, app, _state) = app().await;
        let uploads: [(&str, &[u8]); 3] = [
            (r#"{"tags":"a b","rating":"questionable"}"#, b"one"),
            (r#"{"tags":"a","rating":"safe"}"#, b"two"),
            (r#"{"tags":"a b c","rating":"explicit"}"#, b"three"),
        ];
        for (meta, data) in uploads {
            assert_eq!(upload(&app, &[info(meta), file("f.png", data)]).await.0, StatusCode::CREATED);
        }

        let (status, posts) = get_json(&app, "/posts.json?tags=a%20b").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(ids(&posts), vec![3, 1]);
        assert_eq!(posts[0]["tag_string"], "a b c");

        let (_, posts) = get_json(&app, "/posts.json?tags=rating:safe").await;
        assert_eq!(ids(&posts), vec![2]);

        let (_, posts) = get_json(&app, "/posts.json").await;
        assert_eq!(ids(&posts), vec![3, 2, 1]);

        let (_, posts) = get_json(&app, "/posts.json?page=1").await;
        assert!(ids(&posts).is_empty());

        let (status, _) = get_json(&app, "/posts.json?page=first").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn lookup_by_id() {
        let (_dir, app, _state) = app().await;
        upload(&app, &[info(r#"{"tags":"a"}"#), file("f.gif", b"gif")]).await;

        let (status, post) = get_json(&app, "/posts/1.json").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(post["id"], 1);
        assert_eq!(post["file_ext"], "gif");

        assert_eq!(get_json(&app, "/posts/1").await.0, StatusCode::OK);
        assert_eq!(get_json(&app, "/posts/2.json").await.0, StatusCode::NOT_FOUND);
        assert_eq!(get_json(&app, "/posts/abc.json").await.0, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn delete_removes_post_and_file() {
        let (_dir, app, state) = app().await;
        let (_, body) = upload(&app, &[info(r#"{"tags":"a"}"#), file("f.png", b"bye")]).await;
        let record: PostRecord = serde_json::from_slice(&body).unwrap();
        let path = state.media.media_path(&record.md5, "png");
        assert!(path.exists());

        let (status, _) = send(&app, Method::DELETE, "/posts/1.json", Body::empty()).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(!path.exists());
        assert_eq!(get_json(&app, "/posts/1.json").await.0, StatusCode::NOT_FOUND);

        let (status, _) = send(&app, Method::DELETE, "/posts/1.json", Body::empty()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn staging_area_is_not_served() {
        let (_dir, app, state) = app().await;
        let staged = state.media.root().join(".staging").join("uploadpending");
        std::fs::write(&staged, b"in-flight bytes").unwrap();

        for uri in [
            "/img/.staging/uploadpending",
            "/img/%2Estaging/uploadpending",
            "/img/%2estaging/uploadpending",
            "/img/%2E%73taging/uploadpending",
            "/img/ab%2F.staging/uploadpending",
        ] {
            let (status, body) = send(&app, Method::GET, uri, Body::empty()).await;
            assert_eq!(status, StatusCode::NOT_FOUND, "{}", uri);
            assert_ne!(body, b"in-flight bytes");
        }
    }

    #[test]
    fn hidden_paths() {
        assert!(is_hidden("/.staging/x"));
        assert!(is_hidden("/%2Estaging/x"));
        assert!(is_hidden("/ab/cd/%2ethumb123.jpg"));
        assert!(is_hidden("/%FF/x"));
        assert!(!is_hidden("/ab/cd/abcd.png"));
        assert!(!is_hidden("/ab/cd/abcd.thumb.jpg"));
    }

    #[tokio::test]
    async fn health_is_ok() {
        let (_dir, app, _state) = app().await;
        let (status, body) = send(&app, Method::GET, "/health", Body::empty()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"ok");
    }
}
