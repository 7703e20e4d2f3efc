//! Result assembly: package final image bytes as an inline encoded payload or
//! persist them to a filesystem path.

use std::path::{Path, PathBuf};

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use schemars::JsonSchema;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::decode::ImageResult;
use crate::error::{Error, Result};

/// Where a pipeline result should be delivered.
#[derive(Debug, Clone)]
pub enum Destination {
    /// Return the bytes as a base64 payload.
    Inline,
    /// Write the bytes to a file, creating intermediate directories as needed.
    File(PathBuf),
}

impl Destination {
    /// Convenience constructor for a file destination.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Destination::File(path.into())
    }
}

/// Inline result payload.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct InlinePayload {
    /// Base64-encoded image bytes
    pub image_data_b64: String,
    /// MIME type of the image
    pub mime_type: String,
    /// Filename extension, with leading dot
    pub extension: String,
    /// Decoded size in bytes
    pub size_bytes: u64,
    /// The model that generated the image, when one was involved
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_used: Option<String>,
}

/// Saved-file result record.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct SavedFile {
    /// Absolute path of the written file
    pub saved_path: PathBuf,
    /// MIME type of the image
    pub mime_type: String,
    /// Written size in bytes
    pub size_bytes: u64,
    /// The model that generated the image, when one was involved
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_used: Option<String>,
}

/// Uniform result record of the pipeline.
#[derive(Debug, Clone, Serialize, JsonSchema)]
#[serde(untagged)]
pub enum OutputRecord {
    /// Inline payload (inline destination)
    Inline(InlinePayload),
    /// Saved file (file destination)
    Saved(SavedFile),
}

/// Package an image for delivery.
///
/// Inline destinations encode the bytes to base64. File destinations create
/// intermediate directories, infer the file extension from the image when the
/// caller's path has none, and write through a temp file renamed into place.
///
/// # Errors
/// Returns `Error::Io` naming the path on any filesystem failure.
pub async fn assemble(image: &ImageResult, destination: &Destination) -> Result<OutputRecord> {
    match destination {
        Destination::Inline => Ok(OutputRecord::Inline(InlinePayload {
            image_data_b64: BASE64.encode(&image.bytes),
            mime_type: image.mime_type.clone(),
            extension: image.extension.clone(),
            size_bytes: image.bytes.len() as u64,
            model_used: image.model_used.clone(),
        })),
        Destination::File(requested) => {
            let path = ensure_extension(requested, &image.extension);
            write_atomic(&path, &image.bytes).await?;
            let saved_path = std::path::absolute(&path).map_err(|e| Error::io(&path, e))?;
            info!(path = %saved_path.display(), size = image.bytes.len(), "Saved image");
            Ok(OutputRecord::Saved(SavedFile {
                saved_path,
                mime_type: image.mime_type.clone(),
                size_bytes: image.bytes.len() as u64,
                model_used: image.model_used.clone(),
            }))
        }
    }
}

/// Append the image's extension when the caller's path has none.
fn ensure_extension(path: &Path, extension: &str) -> PathBuf {
    if path.extension().is_some() {
        path.to_path_buf()
    } else {
        path.with_extension(extension.trim_start_matches('.'))
    }
}

/// Write bytes to a path, creating parent directories, through a temp file
/// in the same directory renamed into place.
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::io(parent, e))?;
        }
    }

    let temp = temp_sibling(path);
    tokio::fs::write(&temp, bytes)
        .await
        .map_err(|e| Error::io(path, e))?;

    if let Err(e) = tokio::fs::rename(&temp, path).await {
        let _ = tokio::fs::remove_file(&temp).await;
        return Err(Error::io(path, e));
    }
    Ok(())
}

fn temp_sibling(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("output");
    path.with_file_name(format!(".{file_name}.{}.tmp", Uuid::new_v4()))
}
