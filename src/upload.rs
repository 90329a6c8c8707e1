//! Pending media submission.
//!
//! The coordinator moves through `Empty -> FileSelected -> Submitting` and
//! back. Every transition that creates or discards a selection pairs with a
//! preview acquire or release.

use std::fs;
use std::io::{self, Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::ImageFormat;
use parking_lot::Mutex;
use tempfile::TempPath;
use tracing::{debug, info, warn};

use crate::data::PostService;
use crate::feed::{Feed, RefreshOutcome};
use crate::media::{MediaFile, MediaType};
use crate::session::Guard;

pub const UPLOAD_FAILED: &str = "Upload failed. Please try again.";
const PREVIEW_MAX_EDGE: u32 = 320;

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("an upload is already in progress")]
    Busy,
    #[error("select a file first")]
    NoFile,
    #[error("upload: create preview: {0}")]
    Preview(#[from] io::Error),
}

/// Local-only reference to a rendering of the selected file.
#[derive(Debug)]
pub struct Preview {
    path: PathBuf,
    handle: Option<TempPath>,
}

impl Preview {
    /// A reference the coordinator does not own on disk.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            handle: None,
        }
    }

    fn temporary(handle: TempPath) -> Self {
        Self {
            path: handle.to_path_buf(),
            handle: Some(handle),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

pub trait PreviewProvider: Send + Sync {
    fn acquire(&self, file: &MediaFile) -> io::Result<Preview>;
    fn release(&self, preview: Preview);
}

/// Writes previews into a scratch directory: a PNG thumbnail for decodable
/// images, the original bytes for everything else.
#[derive(Debug, Clone, Default)]
pub struct TempPreviews {
    dir: Option<PathBuf>,
}

impl TempPreviews {
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self { dir }
    }
}

impl PreviewProvider for TempPreviews {
    fn acquire(&self, file: &MediaFile) -> io::Result<Preview> {
        let (bytes, suffix) = match thumbnail(file) {
            Some(png) => (png, ".png".to_string()),
            None => (file.bytes.clone(), extension_suffix(&file.file_name)),
        };

        let mut builder = tempfile::Builder::new();
        builder.prefix("pixelshare-preview-").suffix(&suffix);
        let mut named = match &self.dir {
            Some(dir) => {
                fs::create_dir_all(dir)?;
                builder.tempfile_in(dir)?
            }
            None => builder.tempfile()?,
        };
        named.write_all(&bytes)?;
        named.flush()?;
        let preview = Preview::temporary(named.into_temp_path());
        debug!(path = %preview.path().display(), "upload: preview created");
        Ok(preview)
    }

    fn release(&self, preview: Preview) {
        if let Some(handle) = preview.handle {
            let path = handle.to_path_buf();
            if let Err(err) = handle.close() {
                warn!(path = %path.display(), error = %err, "upload: preview cleanup failed");
            }
        }
    }
}

fn thumbnail(file: &MediaFile) -> Option<Vec<u8>> {
    if file.media_type() != MediaType::Image {
        return None;
    }
    let decoded = image::load_from_memory(&file.bytes).ok()?;
    let thumb = decoded.thumbnail(PREVIEW_MAX_EDGE, PREVIEW_MAX_EDGE);
    let mut out = Vec::new();
    thumb
        .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
        .ok()?;
    Some(out)
}

fn extension_suffix(file_name: &str) -> String {
    Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{ext}"))
        .unwrap_or_default()
}

#[derive(Debug)]
pub struct Pending {
    pub file: Arc<MediaFile>,
    pub caption: String,
    preview: Preview,
}

impl Pending {
    pub fn preview(&self) -> &Preview {
        &self.preview
    }
}

#[derive(Debug, Default)]
pub enum UploadState {
    #[default]
    Empty,
    FileSelected(Pending),
    Submitting(Pending),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Empty,
    FileSelected,
    Submitting,
}

/// Read-only view of the coordinator for rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub phase: Phase,
    pub file: Option<Arc<MediaFile>>,
    pub caption: Option<String>,
    pub preview: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    NoFile,
    InFlight,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The post was created; the feed refresh that followed is attached.
    Committed(RefreshOutcome),
    /// Input is kept so the user can retry.
    Failed(String),
    Redirected,
    Rejected(Rejection),
}

pub struct Coordinator {
    posts: Arc<dyn PostService>,
    previews: Arc<dyn PreviewProvider>,
    guard: Arc<Guard>,
    feed: Arc<Feed>,
    state: Mutex<UploadState>,
}

impl Coordinator {
    pub fn new(
        posts: Arc<dyn PostService>,
        previews: Arc<dyn PreviewProvider>,
        guard: Arc<Guard>,
        feed: Arc<Feed>,
    ) -> Self {
        Self {
            posts,
            previews,
            guard,
            feed,
            state: Mutex::new(UploadState::Empty),
        }
    }

    pub fn phase(&self) -> Phase {
        match &*self.state.lock() {
            UploadState::Empty => Phase::Empty,
            UploadState::FileSelected(_) => Phase::FileSelected,
            UploadState::Submitting(_) => Phase::Submitting,
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        let state = self.state.lock();
        let (phase, pending) = match &*state {
            UploadState::Empty => (Phase::Empty, None),
            UploadState::FileSelected(p) => (Phase::FileSelected, Some(p)),
            UploadState::Submitting(p) => (Phase::Submitting, Some(p)),
        };
        Snapshot {
            phase,
            file: pending.map(|p| Arc::clone(&p.file)),
            caption: pending.map(|p| p.caption.clone()),
            preview: pending.map(|p| p.preview.path().to_path_buf()),
        }
    }

    /// Selecting again replaces the file and releases the previous preview;
    /// the caption carries over.
    pub fn select_file(&self, file: MediaFile) -> Result<(), UploadError> {
        let mut state = self.state.lock();
        if matches!(&*state, UploadState::Submitting(_)) {
            return Err(UploadError::Busy);
        }
        let preview = self.previews.acquire(&file)?;
        let caption = match std::mem::take(&mut *state) {
            UploadState::FileSelected(old) => {
                self.previews.release(old.preview);
                old.caption
            }
            _ => String::new(),
        };
        info!(file = %file.file_name, size = file.size(), "upload: file selected");
        *state = UploadState::FileSelected(Pending {
            file: Arc::new(file),
            caption,
            preview,
        });
        Ok(())
    }

    pub fn set_caption(&self, caption: &str) -> Result<(), UploadError> {
        match &mut *self.state.lock() {
            UploadState::FileSelected(pending) => {
                pending.caption = caption.to_string();
                Ok(())
            }
            UploadState::Submitting(_) => Err(UploadError::Busy),
            UploadState::Empty => Err(UploadError::NoFile),
        }
    }

    /// Discards the selection. Not allowed while a submission is in flight.
    pub fn cancel(&self) -> Result<(), UploadError> {
        let mut state = self.state.lock();
        match std::mem::take(&mut *state) {
            UploadState::Submitting(pending) => {
                *state = UploadState::Submitting(pending);
                Err(UploadError::Busy)
            }
            UploadState::FileSelected(pending) => {
                self.previews.release(pending.preview);
                Ok(())
            }
            UploadState::Empty => Ok(()),
        }
    }

    pub fn submit(&self) -> SubmitOutcome {
        let (file, caption) = {
            let mut state = self.state.lock();
            let pending = match std::mem::take(&mut *state) {
                UploadState::FileSelected(pending) => pending,
                other => {
                    let reason = match other {
                        UploadState::Submitting(_) => Rejection::InFlight,
                        _ => Rejection::NoFile,
                    };
                    *state = other;
                    debug!(?reason, "upload: submit rejected");
                    return SubmitOutcome::Rejected(reason);
                }
            };
            if self.guard.ensure_authenticated().is_err() {
                *state = UploadState::FileSelected(pending);
                return SubmitOutcome::Redirected;
            }
            let file = Arc::clone(&pending.file);
            let caption = pending.caption.clone();
            *state = UploadState::Submitting(pending);
            (file, caption)
        };

        let result = self.posts.upload(&file, &caption);

        let mut state = self.state.lock();
        let pending = match std::mem::take(&mut *state) {
            UploadState::Submitting(pending) => pending,
            other => {
                *state = other;
                return SubmitOutcome::Failed(UPLOAD_FAILED.to_string());
            }
        };

        match result {
            Ok(()) => {
                self.previews.release(pending.preview);
                drop(state);
                info!(file = %file.file_name, "upload: committed");
                SubmitOutcome::Committed(self.feed.refresh())
            }
            Err(err) => {
                *state = UploadState::FileSelected(pending);
                drop(state);
                warn!(error = %err, "upload: submission failed");
                if self.guard.absorb(&err) {
                    SubmitOutcome::Redirected
                } else {
                    SubmitOutcome::Failed(UPLOAD_FAILED.to_string())
                }
            }
        }
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        match std::mem::take(self.state.get_mut()) {
            UploadState::FileSelected(pending) | UploadState::Submitting(pending) => {
                self.previews.release(pending.preview);
            }
            UploadState::Empty => {}
        }
    }
}
