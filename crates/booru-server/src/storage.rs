use std::path::{Path, PathBuf};

use anyhow::Result;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use md5::{Digest, Md5};
use tempfile::TempPath;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Directory under the media root that receives uploads in flight. It lives on
/// the same filesystem as the final files so placing one is a plain rename.
const STAGING_DIR: &str = ".staging";

/// Suffix of the preview image stored next to each media file.
pub const THUMB_SUFFIX: &str = "thumb.jpg";

/// `ab/cd` for a hash starting with `abcd`.
pub fn shard(hash: &str) -> String {
    let first = hash.get(..2).unwrap_or(hash);
    let second = hash.get(2..4).unwrap_or_default();
    format!("{}/{}", first, second)
}

/// Path of a post's file relative to the media root, with `/` separators.
pub fn media_key(hash: &str, ext: &str) -> String {
    format!("{}/{}.{}", shard(hash), hash, ext)
}

/// Path of a post's thumbnail relative to the media root.
pub fn thumb_key(hash: &str) -> String {
    format!("{}/{}.{}", shard(hash), hash, THUMB_SUFFIX)
}

/// An upload that has been written to the staging area.
///
/// The file is removed when this is dropped, unless it was placed first.
#[derive(Debug)]
pub struct StagedFile {
    path: TempPath,
    hash: String,
    size: u64,
}

impl StagedFile {
    /// Hex MD5 of the staged bytes.
    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Content-addressed media tree.
///
/// Files live at `{root}/{h[0..2]}/{h[2..4]}/{hash}.{ext}`, thumbnails next
/// to them as `{hash}.thumb.jpg`.
pub struct MediaStore {
    root: PathBuf,
}

impl MediaStore {
    pub async fn new(root: PathBuf) -> Result<Self> {
        fs::create_dir_all(root.join(STAGING_DIR)).await?;
        info!("Media directory: {}", root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn media_path(&self, hash: &str, ext: &str) -> PathBuf {
        self.root.join(media_key(hash, ext))
    }

    pub fn thumb_path(&self, hash: &str) -> PathBuf {
        self.root.join(thumb_key(hash))
    }

    /// Streams `body` into a staging file, hashing it on the way through.
    ///
    /// On any error the partial file is removed.
    pub async fn stage<S, E>(&self, body: S) -> Result<StagedFile, E>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: From<std::io::Error>,
    {
        let (file, path) = tempfile::Builder::new()
            .prefix("upload")
            .tempfile_in(self.root.join(STAGING_DIR))?
            .into_parts();
        let mut file = fs::File::from_std(file);

        let mut hasher = Md5::new();
        let mut size: u64 = 0;

        let mut body = std::pin::pin!(body);
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            hasher.update(&chunk);
            file.write_all(&chunk).await?;
            size += chunk.len() as u64;
        }
        file.flush().await?;
        file.sync_all().await?;

        let hash = hex::encode(hasher.finalize());
        debug!("Staged {} bytes at {} ({})", size, path.display(), hash);
        Ok(StagedFile { path, hash, size })
    }

    /// Moves a staged upload to its content-addressed location.
    pub async fn place(&self, staged: StagedFile, ext: &str) -> Result<PathBuf> {
        let dest = self.media_path(&staged.hash, ext);
        if let Some(dir) = dest.parent() {
            fs::create_dir_all(dir).await?;
        }

        let target = dest.clone();
        tokio::task::spawn_blocking(move || staged.path.persist(target)).await??;

        info!("Stored {}", dest.display());
        Ok(dest)
    }

    /// Removes a post's file and thumbnail. Missing files are not an error.
    pub async fn delete(&self, hash: &str, ext: &str) -> Result<()> {
        for path in [self.thumb_path(hash), self.media_path(hash, ext)] {
            match fs::remove_file(&path).await {
                Ok(()) => info!("Deleted {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    warn!("{} already gone", path.display());
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}
