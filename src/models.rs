//! Model knowledge: the hardcoded fallback id, image-capability heuristics,
//! and the catalog descriptor type.
//!
//! The provider serves its own catalog; nothing here acts as an admission
//! list. The patterns below only classify catalog entries as image-capable
//! when the caller asks for a filtered listing.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Hardcoded fallback model id, used when no explicit model, runtime
/// selection, or environment default is available.
pub const DEFAULT_MODEL_ID: &str = "gemini-3-pro-image-preview";

/// Name fragments identifying models that support image generation.
pub const IMAGE_MODEL_PATTERNS: &[&str] = &[
    "gemini-2.0-flash-exp-image",
    "gemini-2.0-flash-preview-image",
    "gemini-2.5-flash-preview-image",
    "gemini-2.5-flash-image",
    "gemini-2.5-pro-exp-image",
    "gemini-3-pro-image",
    "imagen-3",
    "imagen-4",
    "image-generation",
];

/// Information about a model in the provider catalog.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ModelDescriptor {
    /// Model identifier, without the catalog's `models/` prefix
    pub id: String,
    /// Human-readable model name
    pub display_name: String,
    /// Model description from the catalog
    pub description: String,
    /// Whether the model advertises image-generation capability
    pub supports_image_generation: bool,
}

/// Check whether a catalog entry supports image generation.
///
/// A model qualifies when its name contains a known image-generation pattern,
/// or when it supports `generateContent` and its name mentions images.
pub fn is_image_generation_model(name: &str, supported_generation_methods: &[String]) -> bool {
    let name = name.to_ascii_lowercase();

    if IMAGE_MODEL_PATTERNS.iter().any(|p| name.contains(p)) {
        return true;
    }

    if supported_generation_methods.iter().any(|m| m == "generateContent")
        && (name.contains("image") || name.contains("imagen"))
    {
        return true;
    }

    false
}

/// Strip the catalog's `models/` prefix from a full resource name.
pub fn model_id_from_name(full_name: &str) -> &str {
    full_name.strip_prefix("models/").unwrap_or(full_name)
}
