//! Turning an upload into a stored post.
//!
//! The file part is streamed to a staging file and hashed in the same pass.
//! The post is saved first and only then is the file renamed into its
//! content-addressed place, so a failed save never leaves a stray file. The
//! staging file is removed on every path that does not end in placement.

use std::path::Path;
use std::sync::Arc;

use axum::extract::Multipart;
use axum::extract::multipart::MultipartError;
use booru_db::{DbError, Store};
use booru_types::Post;
use booru_types::api::PostInfo;
use chrono::Utc;
use futures_util::StreamExt;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::storage::{MediaStore, StagedFile};
use crate::thumbnail::{self, Thumbnailer};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("malformed upload: {0}")]
    Malformed(String),

    #[error("duplicate content: a post with hash {0} already exists")]
    Duplicate(String),

    #[error("failed to read upload: {0}")]
    Body(#[from] MultipartError),

    #[error(transparent)]
    Db(DbError),

    #[error("failed to store media file: {0:#}")]
    File(anyhow::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("ingestion task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl From<DbError> for IngestError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::DuplicateContent(hash) => IngestError::Duplicate(hash),
            other => IngestError::Db(other),
        }
    }
}

fn malformed(msg: impl Into<String>) -> IngestError {
    IngestError::Malformed(msg.into())
}

/// A fully received upload: metadata plus the staged file.
#[derive(Debug)]
pub struct Upload {
    pub info: PostInfo,
    pub staged: StagedFile,
    pub ext: String,
}

/// Reads the `info` and `file` parts of a multipart upload, staging the file.
///
/// Exactly one of each is required; other parts are skipped.
pub async fn read_upload(media: &MediaStore, multipart: &mut Multipart) -> Result<Upload, IngestError> {
    let mut info: Option<PostInfo> = None;
    let mut file: Option<(StagedFile, String)> = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("info") => {
                if info.is_some() {
                    return Err(malformed("more than one info part"));
                }
                let bytes = field.bytes().await?;
                let parsed = serde_json::from_slice(&bytes)
                    .map_err(|e| malformed(format!("invalid info part: {}", e)))?;
                info = Some(parsed);
            }
            Some("file") => {
                if file.is_some() {
                    return Err(malformed("more than one file part"));
                }
                let ext = resolve_extension(field.file_name(), field.content_type())
                    .ok_or_else(|| malformed("cannot tell the file type from its name or content type"))?;
                let staged = media
                    .stage(field.map(|chunk| chunk.map_err(IngestError::from)))
                    .await?;
                debug!(
                    "Received file part: {} bytes, .{}, staged at {}",
                    staged.size(),
                    ext,
                    staged.path().display()
                );
                file = Some((staged, ext));
            }
            other => debug!("Skipping upload part {:?}", other),
        }
    }

    let info = info.ok_or_else(|| malformed("missing info part"))?;
    let (staged, ext) = file.ok_or_else(|| malformed("missing file part"))?;
    Ok(Upload { info, staged, ext })
}

/// File extension for an upload: the filename's extension if it has a usable
/// one, else one derived from the declared media type.
pub fn resolve_extension(file_name: Option<&str>, content_type: Option<&str>) -> Option<String> {
    let from_name = file_name
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()));
    if let Some(ext) = from_name {
        return Some(ext.to_ascii_lowercase());
    }

    let mime = content_type?.split(';').next()?.trim().to_ascii_lowercase();
    let ext = match mime.as_str() {
        "image/jpeg" => "jpg",
        "image/png" => "png",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "video/mp4" => "mp4",
        "video/webm" => "webm",
        "application/octet-stream" => return None,
        other => mime_guess::get_mime_extensions_str(other)?.first().copied()?,
    };
    Some(ext.to_string())
}

/// Commits received uploads: saves the post, places its file and kicks off
/// the thumbnail.
#[derive(Clone)]
pub struct Ingestor {
    store: Arc<Store>,
    media: Arc<MediaStore>,
    thumbnailer: Arc<dyn Thumbnailer>,
}

impl Ingestor {
    pub fn new(store: Arc<Store>, media: Arc<MediaStore>, thumbnailer: Arc<dyn Thumbnailer>) -> Self {
        Self {
            store,
            media,
            thumbnailer,
        }
    }

    pub async fn ingest(&self, upload: Upload) -> Result<Post, IngestError> {
        // Detached from the request: once saving starts, a client hanging up
        // must not leave the post without its file.
        let this = self.clone();
        tokio::spawn(async move { this.commit(upload).await }).await?
    }

    async fn commit(self, upload: Upload) -> Result<Post, IngestError> {
        let Upload { info, staged, ext } = upload;

        let mut post = info.into_post(Utc::now());
        post.hash = staged.hash().to_owned();
        post.ext = ext;

        let store = self.store.clone();
        let post = tokio::task::spawn_blocking(move || {
            store.save_post(&mut post)?;
            Ok::<_, DbError>(post)
        })
        .await??;

        let src = match self.media.place(staged, &post.ext).await {
            Ok(path) => path,
            Err(e) => {
                warn!("Could not place file for post {}, removing it: {:#}", post.id, e);
                self.forget(post.id).await;
                return Err(IngestError::File(e));
            }
        };

        info!(
            "Post {} ingested: {} ({} tags)",
            post.id,
            src.display(),
            post.tags.len()
        );

        thumbnail::spawn_derive(self.thumbnailer.clone(), src, self.media.thumb_path(&post.hash));
        Ok(post)
    }

    /// Best-effort removal of a post whose file never made it to disk.
    async fn forget(&self, id: i64) {
        let store = self.store.clone();
        match tokio::task::spawn_blocking(move || store.delete_post(id)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => error!("Post {} has no file and could not be removed: {}", id, e),
            Err(e) => error!("Post {} has no file and could not be removed: {}", id, e),
        }
    }
}
