//! Generation client for the Gemini image API.
//!
//! This module provides the [`GenerationClient`] struct, the request parameter
//! types, and the provider wire types. A generation call resolves its model
//! through the client's [`ModelState`], posts one `generateContent` request,
//! and applies the one deterministic correction the protocol allows: when the
//! provider rejects the requested aspect ratio for the chosen model, the
//! request is retried exactly once without it.

use std::path::Path;
use std::time::Duration;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::config::Config;
use crate::decode::{ImageResult, decode_response};
use crate::error::{Error, Result, ValidationError, validation_failure};
use crate::models::{ModelDescriptor, is_image_generation_model, model_id_from_name};
use crate::process::{ResizeSpec, resize};
use crate::selector::ModelState;

/// Maximum number of reference images per request.
pub const MAX_REFERENCE_IMAGES: usize = 3;

/// Requested width:height proportion for the generated image.
///
/// Serialized as the ratio string the provider expects; unrecognized ratios
/// are rejected at deserialization, before any request is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum AspectRatio {
    /// 1:1
    #[serde(rename = "1:1")]
    Square,
    /// 3:2
    #[serde(rename = "3:2")]
    Landscape3x2,
    /// 2:3
    #[serde(rename = "2:3")]
    Portrait2x3,
    /// 4:3
    #[serde(rename = "4:3")]
    Landscape4x3,
    /// 3:4
    #[serde(rename = "3:4")]
    Portrait3x4,
    /// 4:5
    #[serde(rename = "4:5")]
    Portrait4x5,
    /// 5:4
    #[serde(rename = "5:4")]
    Landscape5x4,
    /// 16:9
    #[serde(rename = "16:9")]
    Widescreen,
    /// 9:16
    #[serde(rename = "9:16")]
    Vertical,
    /// 21:9
    #[serde(rename = "21:9")]
    Ultrawide,
}

impl AspectRatio {
    /// All supported aspect ratios.
    pub const ALL: &'static [AspectRatio] = &[
        AspectRatio::Square,
        AspectRatio::Landscape3x2,
        AspectRatio::Portrait2x3,
        AspectRatio::Landscape4x3,
        AspectRatio::Portrait3x4,
        AspectRatio::Portrait4x5,
        AspectRatio::Landscape5x4,
        AspectRatio::Widescreen,
        AspectRatio::Vertical,
        AspectRatio::Ultrawide,
    ];

    /// The ratio string sent to the provider.
    pub fn as_str(&self) -> &'static str {
        match self {
            AspectRatio::Square => "1:1",
            AspectRatio::Landscape3x2 => "3:2",
            AspectRatio::Portrait2x3 => "2:3",
            AspectRatio::Landscape4x3 => "4:3",
            AspectRatio::Portrait3x4 => "3:4",
            AspectRatio::Portrait4x5 => "4:5",
            AspectRatio::Landscape5x4 => "5:4",
            AspectRatio::Widescreen => "16:9",
            AspectRatio::Vertical => "9:16",
            AspectRatio::Ultrawide => "21:9",
        }
    }
}

impl std::fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AspectRatio {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        AspectRatio::ALL
            .iter()
            .copied()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| format!("unsupported aspect ratio '{s}'"))
    }
}

/// An input image supplied alongside a prompt to influence generation.
///
/// The prompt decides how references are used: as style inspiration, as
/// elements to recreate faithfully, or as subjects to place inside the
/// generated scene. Editing an existing image is the one-reference case.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
pub struct ReferenceImage {
    /// Base64-encoded image data
    pub data: String,
    /// MIME type of the image (e.g. "image/png", "image/jpeg")
    pub mime_type: String,
}

impl ReferenceImage {
    /// Read a local image file into a reference.
    ///
    /// The MIME type is derived from the file extension.
    ///
    /// # Errors
    /// Returns a validation error for unsupported extensions, or an I/O error
    /// naming the path if the file cannot be read.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        let mime_type = match extension.as_str() {
            "png" => "image/png",
            "jpg" | "jpeg" => "image/jpeg",
            "webp" => "image/webp",
            "gif" => "image/gif",
            _ => {
                return Err(Error::validation(format!(
                    "Unsupported reference image format '{}' for {}. Supported: .png, .jpg, .jpeg, .webp, .gif",
                    extension,
                    path.display()
                )));
            }
        };

        let bytes = tokio::fs::read(path).await.map_err(|e| Error::io(path, e))?;
        Ok(Self {
            data: BASE64.encode(&bytes),
            mime_type: mime_type.to_string(),
        })
    }
}

/// Image generation parameters.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
pub struct GenerateParams {
    /// Text prompt describing the image to generate.
    pub prompt: String,

    /// Aspect ratio for the generated image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aspect_ratio: Option<AspectRatio>,

    /// Model to use for generation. When absent, the client's runtime model
    /// state resolves one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Up to 3 reference images, sent in order after the prompt.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reference_images: Vec<ReferenceImage>,
}

impl GenerateParams {
    /// Create parameters for a plain text-to-image request.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            aspect_ratio: None,
            model: None,
            reference_images: Vec::new(),
        }
    }

    /// Validate the parameters.
    ///
    /// # Returns
    /// - `Ok(())` if all parameters are valid
    /// - `Err(Vec<ValidationError>)` with all validation errors
    pub fn validate(&self) -> std::result::Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if self.prompt.trim().is_empty() {
            errors.push(ValidationError::new("prompt", "Prompt cannot be empty"));
        }

        if self.reference_images.len() > MAX_REFERENCE_IMAGES {
            errors.push(ValidationError::new(
                "reference_images",
                format!(
                    "A maximum of {} reference images are supported, got {}",
                    MAX_REFERENCE_IMAGES,
                    self.reference_images.len()
                ),
            ));
        }

        for (i, reference) in self.reference_images.iter().enumerate() {
            if reference.data.trim().is_empty() {
                errors.push(ValidationError::new(
                    format!("reference_images[{i}].data"),
                    "Reference image data cannot be empty",
                ));
            }
            if reference.mime_type.trim().is_empty() {
                errors.push(ValidationError::new(
                    format!("reference_images[{i}].mime_type"),
                    "Reference image mime type cannot be empty",
                ));
            }
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

// =============================================================================
// Retry protocol
// =============================================================================

/// The two states of the generation request protocol.
///
/// At most one re-attempt happens per call, and only for the deterministic
/// aspect-ratio correction; there is no backoff because the correction is not
/// a transient fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    First,
    RetryWithoutAspectRatio,
}

/// Internal outcome of a single request attempt.
#[derive(Debug)]
enum RequestFailure {
    /// The provider rejected the requested aspect ratio for this model.
    AspectRatioRejected {
        endpoint: String,
        status_code: u16,
        message: String,
    },
    /// Any failure that must be surfaced as-is.
    Fatal(Error),
}

impl RequestFailure {
    fn into_error(self) -> Error {
        match self {
            RequestFailure::AspectRatioRejected {
                endpoint,
                status_code,
                message,
            } => Error::api(endpoint, status_code, message),
            RequestFailure::Fatal(error) => error,
        }
    }
}

/// Check whether a provider error message names the aspect-ratio field.
fn mentions_aspect_ratio(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    message.contains("aspect_ratio")
        || message.contains("aspectratio")
        || message.contains("aspect ratio")
        || message.contains("image_config")
        || message.contains("imageconfig")
}

/// Classify a non-success provider response.
fn classify_rejection(endpoint: &str, status_code: u16, body: &str) -> RequestFailure {
    let parsed: Option<ApiErrorEnvelope> = serde_json::from_str(body).ok();
    let (message, api_status) = match parsed {
        Some(envelope) => (envelope.error.message, envelope.error.status),
        None => (body.chars().take(400).collect(), String::new()),
    };

    if status_code == 401
        || status_code == 403
        || api_status == "UNAUTHENTICATED"
        || api_status == "PERMISSION_DENIED"
        || message.to_ascii_lowercase().contains("api key")
    {
        return RequestFailure::Fatal(Error::auth(status_code, message));
    }

    if (status_code == 400 || api_status == "INVALID_ARGUMENT") && mentions_aspect_ratio(&message) {
        return RequestFailure::AspectRatioRejected {
            endpoint: endpoint.to_string(),
            status_code,
            message,
        };
    }

    RequestFailure::Fatal(Error::api(endpoint, status_code, message))
}

// =============================================================================
// Client
// =============================================================================

/// Client for image generation against the Gemini model API.
///
/// Owns the runtime model state for its lifetime; each call is processed
/// synchronously and independently, so a caller that wants bounded
/// concurrency bounds it outside this client. Dropping the future of an
/// in-flight call aborts the request, retry included.
pub struct GenerationClient {
    /// Pipeline configuration.
    config: Config,
    /// HTTP client for API requests.
    http: reqwest::Client,
    /// Runtime model state.
    models: ModelState,
}

impl GenerationClient {
    /// Create a new client with the given configuration.
    ///
    /// The environment-supplied default model captured in the configuration
    /// seeds the runtime model state.
    pub fn new(config: Config) -> Self {
        let models = ModelState::new(config.default_model.clone());
        Self {
            config,
            http: reqwest::Client::new(),
            models,
        }
    }

    /// Create a new client from environment configuration.
    ///
    /// # Errors
    /// Returns an error if required environment variables are missing.
    pub fn from_env() -> Result<Self> {
        Ok(Self::new(Config::from_env()?))
    }

    /// The client's configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The runtime model state owned by this client.
    pub fn models(&self) -> &ModelState {
        &self.models
    }

    /// Set the model used by subsequent calls that pass no override.
    pub fn select_model(&self, model_id: impl Into<String>) {
        self.models.select(model_id);
    }

    fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.config.timeout_secs)
    }

    /// Generate an image and return the provider's raw response.
    ///
    /// Applies the at-most-once aspect-ratio retry; every other failure is
    /// classified and surfaced without retrying.
    ///
    /// # Errors
    /// - `Error::Validation` for malformed parameters, before any network call
    /// - `Error::Transport` for network-level failures
    /// - `Error::Auth` when the provider rejects the credential
    /// - `Error::Api` for any other provider rejection
    pub async fn generate_raw(&self, params: &GenerateParams) -> Result<GenerateContentResponse> {
        Ok(self.generate_internal(params).await?.0)
    }

    /// Generate an image and decode it into an [`ImageResult`].
    ///
    /// # Errors
    /// The failures of [`GenerationClient::generate_raw`], plus
    /// `Error::EmptyResult` when the response carries no image part and
    /// `Error::Decode` when the image payload is malformed.
    pub async fn generate(&self, params: &GenerateParams) -> Result<ImageResult> {
        let (response, model_id) = self.generate_internal(params).await?;
        decode_response(&response, &model_id)
    }

    /// Generate an image, then resize/recompress it to target bounds.
    pub async fn generate_resized(
        &self,
        params: &GenerateParams,
        spec: &ResizeSpec,
    ) -> Result<ImageResult> {
        let original = self.generate(params).await?;
        resize(&original, spec)
    }

    #[instrument(level = "info", name = "generate_image", skip_all, fields(aspect_ratio = ?params.aspect_ratio))]
    async fn generate_internal(
        &self,
        params: &GenerateParams,
    ) -> Result<(GenerateContentResponse, String)> {
        params.validate().map_err(validation_failure)?;

        let model_id = self.models.resolve(params.model.as_deref());
        let endpoint = self.config.generate_endpoint(&model_id);
        info!(model_id = %model_id, "Generating image");

        let mut attempt = Attempt::First;
        loop {
            let include_aspect_ratio = attempt == Attempt::First;
            let body = build_request_body(params, include_aspect_ratio);

            match self.post_generate(&endpoint, &body).await {
                Ok(response) => return Ok((response, model_id)),
                Err(RequestFailure::AspectRatioRejected { .. })
                    if include_aspect_ratio && params.aspect_ratio.is_some() =>
                {
                    info!(
                        model_id = %model_id,
                        "Provider rejected the aspect ratio for this model, retrying once without it"
                    );
                    attempt = Attempt::RetryWithoutAspectRatio;
                }
                Err(failure) => return Err(failure.into_error()),
            }
        }
    }

    async fn post_generate(
        &self,
        endpoint: &str,
        body: &GenerateContentRequest,
    ) -> std::result::Result<GenerateContentResponse, RequestFailure> {
        debug!(endpoint = %endpoint, "Calling generateContent");

        let response = self
            .http
            .post(endpoint)
            .header("x-goog-api-key", &self.config.api_key)
            .timeout(self.request_timeout())
            .json(body)
            .send()
            .await
            .map_err(|e| RequestFailure::Fatal(transport_error(endpoint, &e, self.config.timeout_secs)))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(classify_rejection(endpoint, status.as_u16(), &body_text));
        }

        response.json::<GenerateContentResponse>().await.map_err(|e| {
            RequestFailure::Fatal(Error::api(
                endpoint,
                status.as_u16(),
                format!("Failed to parse response: {e}"),
            ))
        })
    }

    /// List the provider's model catalog.
    ///
    /// Pages through the catalog and maps each entry to a [`ModelDescriptor`].
    /// When `image_only` is set, only models advertising image-generation
    /// capability are returned. Never touches the runtime model state.
    #[instrument(level = "info", name = "list_models", skip(self))]
    pub async fn list_models(&self, image_only: bool) -> Result<Vec<ModelDescriptor>> {
        let endpoint = self.config.list_models_endpoint();
        let mut descriptors = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut url = format!("{endpoint}?pageSize=100");
            if let Some(token) = &page_token {
                url.push_str("&pageToken=");
                url.push_str(token);
            }

            let response = self
                .http
                .get(&url)
                .header("x-goog-api-key", &self.config.api_key)
                .timeout(self.request_timeout())
                .send()
                .await
                .map_err(|e| transport_error(&endpoint, &e, self.config.timeout_secs))?;

            let status = response.status();
            if !status.is_success() {
                let body_text = response.text().await.unwrap_or_default();
                return Err(classify_rejection(&endpoint, status.as_u16(), &body_text).into_error());
            }

            let page: ListModelsResponse = response.json().await.map_err(|e| {
                Error::api(&endpoint, status.as_u16(), format!("Failed to parse catalog page: {e}"))
            })?;

            for entry in page.models {
                let supports_image_generation =
                    is_image_generation_model(&entry.name, &entry.supported_generation_methods);
                if image_only && !supports_image_generation {
                    continue;
                }

                let id = model_id_from_name(&entry.name).to_string();
                descriptors.push(ModelDescriptor {
                    display_name: entry.display_name.unwrap_or_else(|| id.clone()),
                    description: entry.description.unwrap_or_default(),
                    supports_image_generation,
                    id,
                });
            }

            page_token = page.next_page_token.filter(|t| !t.is_empty());
            if page_token.is_none() {
                break;
            }
        }

        info!(count = descriptors.len(), image_only, "Listed models");
        Ok(descriptors)
    }
}

fn transport_error(endpoint: &str, error: &reqwest::Error, timeout_secs: u64) -> Error {
    let message = if error.is_timeout() {
        format!("request timed out after {timeout_secs}s")
    } else {
        error.to_string()
    };
    Error::transport(endpoint, message)
}

/// Build the `generateContent` request body.
///
/// Parts are ordered prompt first, then reference images. The aspect ratio
/// rides in `generationConfig.imageConfig` and is omitted entirely on the
/// retry attempt.
fn build_request_body(params: &GenerateParams, include_aspect_ratio: bool) -> GenerateContentRequest {
    let mut parts = vec![RequestPart::text(&params.prompt)];
    for reference in &params.reference_images {
        parts.push(RequestPart::inline(&reference.data, &reference.mime_type));
    }

    let image_config = params
        .aspect_ratio
        .filter(|_| include_aspect_ratio)
        .map(|ratio| ImageConfig {
            aspect_ratio: ratio.as_str().to_string(),
        });

    GenerateContentRequest {
        contents: vec![RequestContent { parts }],
        generation_config: GenerationConfig {
            response_modalities: vec!["TEXT".to_string(), "IMAGE".to_string()],
            image_config,
        },
    }
}

// =============================================================================
// API Request/Response Types
// =============================================================================

/// Gemini `generateContent` request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    /// Request contents (one entry: prompt plus optional reference images)
    pub contents: Vec<RequestContent>,
    /// Generation configuration
    pub generation_config: GenerationConfig,
}

/// One content entry of a request.
#[derive(Debug, Serialize)]
pub struct RequestContent {
    /// Ordered request parts
    pub parts: Vec<RequestPart>,
}

/// A single request part: text or inline image data.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestPart {
    /// Text content
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Inline image data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<InlineData>,
}

impl RequestPart {
    fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            inline_data: None,
        }
    }

    fn inline(data: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            text: None,
            inline_data: Some(InlineData {
                mime_type: mime_type.into(),
                data: data.into(),
            }),
        }
    }
}

/// Inline image data carried in a request or response part.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    /// MIME type of the image
    #[serde(default)]
    pub mime_type: String,
    /// Base64-encoded image bytes
    #[serde(default)]
    pub data: String,
}

/// Generation configuration of a request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    /// Requested response modalities
    pub response_modalities: Vec<String>,
    /// Image-specific configuration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_config: Option<ImageConfig>,
}

/// Image-specific generation configuration.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageConfig {
    /// Requested aspect ratio
    pub aspect_ratio: String,
}

/// Gemini `generateContent` response.
#[derive(Debug, Clone, Deserialize)]
pub struct GenerateContentResponse {
    /// Response candidates
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

/// One response candidate.
#[derive(Debug, Clone, Deserialize)]
pub struct Candidate {
    /// Candidate content
    #[serde(default)]
    pub content: Option<CandidateContent>,
}

/// The content of a response candidate.
#[derive(Debug, Clone, Deserialize)]
pub struct CandidateContent {
    /// Ordered response parts
    #[serde(default)]
    pub parts: Vec<ResponsePart>,
}

/// A single response part.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponsePart {
    /// Text content
    #[serde(default)]
    pub text: Option<String>,
    /// Inline image data
    #[serde(default)]
    pub inline_data: Option<InlineData>,
}

/// Structured provider error envelope.
#[derive(Debug, Deserialize)]
struct ApiErrorEnvelope {
    #[serde(default)]
    error: ApiErrorBody,
}

#[derive(Debug, Default, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
}

/// Catalog listing response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListModelsResponse {
    #[serde(default)]
    models: Vec<CatalogEntry>,
    #[serde(default)]
    next_page_token: Option<String>,
}

/// One entry of the model catalog.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CatalogEntry {
    #[serde(default)]
    name: String,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    supported_generation_methods: Vec<String>,
}
