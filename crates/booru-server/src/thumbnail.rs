use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use image::ImageFormat;
use tracing::{info, warn};

/// Bounding box for previews. Aspect ratio is kept.
pub const THUMB_WIDTH: u32 = 195;
pub const THUMB_HEIGHT: u32 = 185;

/// Renders a preview of `src` into `dst` as JPEG.
pub trait Thumbnailer: Send + Sync {
    fn render(&self, src: &Path, dst: &Path) -> Result<()>;
}

/// In-process thumbnails via the `image` crate. Still images only.
pub struct ImageThumbnailer;

impl Thumbnailer for ImageThumbnailer {
    fn render(&self, src: &Path, dst: &Path) -> Result<()> {
        let img = image::open(src).with_context(|| format!("Failed to decode {}", src.display()))?;
        img.thumbnail(THUMB_WIDTH, THUMB_HEIGHT)
            .to_rgb8()
            .save_with_format(dst, ImageFormat::Jpeg)
            .with_context(|| format!("Failed to write {}", dst.display()))?;
        Ok(())
    }
}

/// Thumbnails via ImageMagick's `convert`. Handles anything ImageMagick
/// can read; only the first frame of animations is used.
pub struct ConvertThumbnailer {
    program: String,
}

impl ConvertThumbnailer {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Thumbnailer for ConvertThumbnailer {
    fn render(&self, src: &Path, dst: &Path) -> Result<()> {
        let mut first_frame = src.as_os_str().to_owned();
        first_frame.push("[0]");

        let status = Command::new(&self.program)
            .arg(first_frame)
            .arg("-thumbnail")
            .arg(format!("{}x{}", THUMB_WIDTH, THUMB_HEIGHT))
            .arg(format!("jpg:{}", dst.display()))
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .with_context(|| format!("Failed to spawn {}", self.program))?;

        if !status.success() {
            bail!("{} exited with {}", self.program, status);
        }
        Ok(())
    }
}

/// Which thumbnailer the server uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Image,
    Convert,
}

impl FromStr for Backend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "image" => Ok(Backend::Image),
            "convert" | "imagemagick" => Ok(Backend::Convert),
            other => Err(anyhow!("unknown thumbnailer {:?} (expected image or convert)", other)),
        }
    }
}

pub fn from_backend(backend: Backend, convert_bin: &str) -> Arc<dyn Thumbnailer> {
    match backend {
        Backend::Image => Arc::new(ImageThumbnailer),
        Backend::Convert => Arc::new(ConvertThumbnailer::new(convert_bin)),
    }
}

/// Renders the thumbnail for `src` at `dst`.
///
/// The preview is written under a temporary name in the destination directory
/// and renamed into place, so a reader never sees a half-written file. If
/// `src` is deleted meanwhile, no thumbnail is left behind.
pub fn derive(thumbnailer: &dyn Thumbnailer, src: &Path, dst: &Path) -> Result<PathBuf> {
    let dir = dst
        .parent()
        .ok_or_else(|| anyhow!("{} has no parent directory", dst.display()))?;
    let tmp = tempfile::Builder::new()
        .prefix(".thumb")
        .suffix(".jpg")
        .tempfile_in(dir)?
        .into_temp_path();

    thumbnailer.render(src, &tmp)?;
    if !src.exists() {
        bail!("{} was removed while its thumbnail was rendered", src.display());
    }
    tmp.persist(dst)?;

    // A delete can still land between the check and the rename.
    if !src.exists() {
        std::fs::remove_file(dst)?;
        bail!("{} was removed while its thumbnail was stored", src.display());
    }

    info!("Thumbnail written to {}", dst.display());
    Ok(dst.to_path_buf())
}

/// Derives a thumbnail on the blocking pool without waiting for it.
///
/// A failure only costs the preview; the post itself is already stored.
pub fn spawn_derive(thumbnailer: Arc<dyn Thumbnailer>, src: PathBuf, dst: PathBuf) {
    tokio::task::spawn_blocking(move || {
        if let Err(e) = derive(thumbnailer.as_ref(), &src, &dst) {
            warn!("No thumbnail for {}: {:#}", src.display(), e);
        }
    });
}
