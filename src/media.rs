use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("media: read {}: {}", .path.display(), .source)]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("media: {} is empty", .0.display())]
    Empty(PathBuf),
    #[error("media: {} is {}, only images and videos can be shared", .path.display(), .mime)]
    Unsupported { path: PathBuf, mime: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    #[default]
    Image,
    Video,
}

impl MediaType {
    /// Anything that is not `video/*` renders as an image.
    pub fn from_mime(mime: Option<&str>) -> Self {
        match mime {
            Some(mime) if mime.trim().to_ascii_lowercase().starts_with("video/") => {
                MediaType::Video
            }
            _ => MediaType::Image,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Image => "image",
            MediaType::Video => "video",
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A local file chosen for upload.
#[derive(Clone, PartialEq, Eq)]
pub struct MediaFile {
    pub path: PathBuf,
    pub file_name: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl fmt::Debug for MediaFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaFile")
            .field("path", &self.path)
            .field("file_name", &self.file_name)
            .field("mime", &self.mime)
            .field("size", &self.bytes.len())
            .finish()
    }
}

impl MediaFile {
    pub fn open(path: &Path) -> Result<Self, MediaError> {
        let bytes = fs::read(path).map_err(|source| MediaError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        if bytes.is_empty() {
            return Err(MediaError::Empty(path.to_path_buf()));
        }
        let mime = sniff_mime(path, &bytes);
        if !is_shareable(&mime) {
            return Err(MediaError::Unsupported {
                path: path.to_path_buf(),
                mime,
            });
        }
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        Ok(Self {
            path: path.to_path_buf(),
            file_name,
            mime,
            bytes,
        })
    }

    pub fn from_bytes(file_name: &str, mime: &str, bytes: Vec<u8>) -> Self {
        Self {
            path: PathBuf::from(file_name),
            file_name: file_name.to_string(),
            mime: mime.to_string(),
            bytes,
        }
    }

    pub fn media_type(&self) -> MediaType {
        MediaType::from_mime(Some(&self.mime))
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }
}

fn is_shareable(mime: &str) -> bool {
    mime.starts_with("image/") || mime.starts_with("video/")
}

fn sniff_mime(path: &Path, bytes: &[u8]) -> String {
    let sniffed = tree_magic_mini::from_u8(bytes);
    if is_shareable(sniffed) {
        return sniffed.to_string();
    }
    mime_from_extension(path)
        .map(str::to_string)
        .unwrap_or_else(|| sniffed.to_string())
}

fn mime_from_extension(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    let mime = match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "heic" => "image/heic",
        "mp4" | "m4v" => "video/mp4",
        "mov" => "video/quicktime",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        _ => return None,
    };
    Some(mime)
}
