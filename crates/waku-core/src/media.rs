//! Media classification: kind detection, MIME types, and size limits.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, WakuError};

const MIB: u64 = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    Document,
}

impl MediaKind {
    /// Classify a file by its extension. Unknown extensions are documents.
    pub fn from_file_name(file_name: &str) -> Self {
        match extension(file_name).as_deref() {
            Some("jpg" | "jpeg" | "png" | "gif") => Self::Image,
            Some("mp4" | "avi" | "mkv") => Self::Video,
            Some("mp3" | "ogg" | "m4a") => Self::Audio,
            _ => Self::Document,
        }
    }

    /// Largest upload accepted for this kind.
    pub const fn max_size(self) -> u64 {
        match self {
            Self::Image => 16 * MIB,
            Self::Video => 64 * MIB,
            Self::Audio => 16 * MIB,
            Self::Document => 100 * MIB,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Document => "document",
        }
    }

    /// Reject payloads larger than the kind allows.
    pub fn check_size(self, size: u64) -> Result<()> {
        let max = self.max_size();
        if size > max {
            return Err(WakuError::InvalidMedia(format!(
                "file size exceeds maximum limit for {self} type ({} MB)",
                max / MIB
            )));
        }
        Ok(())
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// MIME type for a file name.
pub fn mime_type(file_name: &str) -> String {
    let known = match extension(file_name).as_deref() {
        Some("jpg" | "jpeg") => Some("image/jpeg"),
        Some("png") => Some("image/png"),
        Some("gif") => Some("image/gif"),
        Some("mp4") => Some("video/mp4"),
        Some("avi") => Some("video/x-msvideo"),
        Some("mkv") => Some("video/x-matroska"),
        Some("mp3") => Some("audio/mpeg"),
        Some("ogg") => Some("audio/ogg"),
        Some("m4a") => Some("audio/mp4"),
        Some("pdf") => Some("application/pdf"),
        Some("doc") => Some("application/msword"),
        Some("docx") => Some(
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        ),
        Some("xls") => Some("application/vnd.ms-excel"),
        Some("xlsx") => Some("application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"),
        Some("zip") => Some("application/zip"),
        _ => None,
    };

    match known {
        Some(mime) => mime.to_string(),
        None => mime_guess::from_path(file_name)
            .first_raw()
            .unwrap_or("application/octet-stream")
            .to_string(),
    }
}

fn extension(file_name: &str) -> Option<String> {
    Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}
