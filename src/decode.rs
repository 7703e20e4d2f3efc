//! Response decoding.
//!
//! Extracts the first inline image part from a provider response, decodes its
//! transport encoding, and derives a filename extension from the declared
//! MIME type.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};

use crate::client::{GenerateContentResponse, InlineData};
use crate::error::{Error, Result};

/// MIME type assumed when a response part declares none.
pub const DEFAULT_MIME_TYPE: &str = "image/png";

/// A decoded image, produced once per successful generation or conversion.
///
/// Owned by the caller that requested it; nothing in the pipeline retains a
/// reference after returning one.
#[derive(Debug, Clone)]
pub struct ImageResult {
    /// Raw image bytes
    pub bytes: Vec<u8>,
    /// MIME type of the image
    pub mime_type: String,
    /// Filename extension derived from the MIME type, with leading dot
    pub extension: String,
    /// The model that generated the image; absent for file conversions
    pub model_used: Option<String>,
}

/// Derive a filename extension from a MIME type.
pub fn infer_extension(mime_type: &str) -> &'static str {
    match mime_type.to_ascii_lowercase().as_str() {
        "image/png" => ".png",
        "image/jpeg" => ".jpg",
        "image/webp" => ".webp",
        _ => ".bin",
    }
}

/// Decode a provider response into an [`ImageResult`].
///
/// # Errors
/// - `Error::EmptyResult` when no part carries inline image data
/// - `Error::Decode` when the inline payload is not valid base64
pub fn decode_response(response: &GenerateContentResponse, model_id: &str) -> Result<ImageResult> {
    let part = extract_inline_image(response).ok_or(Error::EmptyResult)?;

    let bytes = BASE64
        .decode(part.data.as_bytes())
        .map_err(|e| Error::decode(format!("unable to decode inline image data: {e}")))?;

    let mime_type = if part.mime_type.trim().is_empty() {
        DEFAULT_MIME_TYPE.to_string()
    } else {
        part.mime_type.clone()
    };

    Ok(ImageResult {
        bytes,
        extension: infer_extension(&mime_type).to_string(),
        mime_type,
        model_used: Some(model_id.to_string()),
    })
}

/// Locate the first inline image part of a response.
fn extract_inline_image(response: &GenerateContentResponse) -> Option<&InlineData> {
    response
        .candidates
        .iter()
        .filter_map(|candidate| candidate.content.as_ref())
        .flat_map(|content| content.parts.iter())
        .filter_map(|part| part.inline_data.as_ref())
        .find(|inline| !inline.data.is_empty())
}
