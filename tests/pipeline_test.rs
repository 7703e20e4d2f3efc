//! End-to-end pipeline tests against a mock provider.
//!
//! These tests exercise the full generate → decode → process → assemble flow
//! over HTTP using wiremock, including the aspect-ratio retry protocol and
//! the failure classifications. No real credentials or network access are
//! required.

use std::io::Cursor;
use std::sync::Once;
use std::time::Duration;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

use gemini_imagen::{
    AspectRatio, Config, DEFAULT_MODEL_ID, Destination, Error, GenerateParams, GenerationClient,
    OutputRecord, ResizeSpec, assemble, resize,
};

/// 1x1 transparent PNG.
const TINY_PNG_B64: &str =
    "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNk+M9QDwADhgGAWjR9awAAAABJRU5ErkJggg==";

static INIT: Once = Once::new();

/// Initialize test logging once; control with RUST_LOG.
fn init_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });
}

fn test_client(server: &MockServer) -> GenerationClient {
    init_tracing();
    let config = Config::new("test-key")
        .with_base_url(format!("{}/v1beta/models", server.uri()))
        .with_timeout_secs(5);
    GenerationClient::new(config)
}

fn generate_path(model_id: &str) -> String {
    format!("/v1beta/models/{model_id}:generateContent")
}

fn image_response(mime_type: &str, data_b64: &str) -> serde_json::Value {
    json!({
        "candidates": [{
            "content": {
                "parts": [
                    {"text": "Here you go"},
                    {"inlineData": {"mimeType": mime_type, "data": data_b64}}
                ]
            }
        }]
    })
}

/// Encode a solid-color PNG of the given dimensions to base64.
fn large_png_b64(width: u32, height: u32) -> String {
    let pixels = image::RgbaImage::from_pixel(width, height, image::Rgba([180, 40, 90, 255]));
    let mut cursor = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgba8(pixels)
        .write_to(&mut cursor, image::ImageFormat::Png)
        .unwrap();
    BASE64.encode(cursor.into_inner())
}

fn request_body(request: &Request) -> serde_json::Value {
    serde_json::from_slice(&request.body).unwrap()
}

#[tokio::test]
async fn generate_decodes_inline_image() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(generate_path("test-model")))
        .and(header("x-goog-api-key", "test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(image_response("image/png", TINY_PNG_B64)))
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(&server);
    let params = GenerateParams {
        model: Some("test-model".to_string()),
        ..GenerateParams::new("a red circle")
    };
    let image = client.generate(&params).await.unwrap();

    assert_eq!(image.mime_type, "image/png");
    assert_eq!(image.extension, ".png");
    assert_eq!(image.model_used.as_deref(), Some("test-model"));
    assert_eq!(image.bytes, BASE64.decode(TINY_PNG_B64).unwrap());
}

#[tokio::test]
async fn unset_model_resolves_to_hardcoded_default_and_sends_aspect_ratio() {
    // Scenario: prompt "a red circle", aspect_ratio 1:1, model unspecified,
    // runtime state unset, environment default unset.
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(generate_path(DEFAULT_MODEL_ID)))
        .respond_with(ResponseTemplate::new(200).set_body_json(image_response("image/png", TINY_PNG_B64)))
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(&server);
    let params = GenerateParams {
        aspect_ratio: Some(AspectRatio::Square),
        ..GenerateParams::new("a red circle")
    };
    client.generate(&params).await.unwrap();

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let body = request_body(&requests[0]);
    assert_eq!(body["generationConfig"]["imageConfig"]["aspectRatio"], "1:1");
    assert_eq!(body["contents"][0]["parts"][0]["text"], "a red circle");
}

#[tokio::test]
async fn runtime_selection_applies_to_later_calls() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(generate_path("selected-model")))
        .respond_with(ResponseTemplate::new(200).set_body_json(image_response("image/png", TINY_PNG_B64)))
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(&server);
    client.select_model("selected-model");
    let image = client.generate(&GenerateParams::new("a blue square")).await.unwrap();
    assert_eq!(image.model_used.as_deref(), Some("selected-model"));
}

#[tokio::test]
async fn aspect_ratio_rejection_retries_once_without_it() {
    let server = MockServer::start().await;

    // First attempt carries imageConfig and is rejected
    Mock::given(method("POST"))
        .and(path(generate_path("test-model")))
        .and(body_partial_json(json!({
            "generationConfig": {"imageConfig": {"aspectRatio": "21:9"}}
        })))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": {
                "code": 400,
                "message": "Invalid argument: aspect_ratio is not supported for this model",
                "status": "INVALID_ARGUMENT"
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    // Retry without imageConfig succeeds
    Mock::given(method("POST"))
        .and(path(generate_path("test-model")))
        .respond_with(ResponseTemplate::new(200).set_body_json(image_response("image/png", TINY_PNG_B64)))
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(&server);
    let params = GenerateParams {
        model: Some("test-model".to_string()),
        aspect_ratio: Some(AspectRatio::Ultrawide),
        ..GenerateParams::new("a skyline at dusk")
    };
    let image = client.generate(&params).await.unwrap();
    assert_eq!(image.mime_type, "image/png");

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2, "exactly one retry");

    let first = request_body(&requests[0]);
    assert_eq!(first["generationConfig"]["imageConfig"]["aspectRatio"], "21:9");

    let second = request_body(&requests[1]);
    assert!(second["generationConfig"].get("imageConfig").is_none());
    // All other fields unchanged
    assert_eq!(second["contents"], first["contents"]);
    assert_eq!(
        second["generationConfig"]["responseModalities"],
        first["generationConfig"]["responseModalities"]
    );
}

#[tokio::test]
async fn second_rejection_is_surfaced_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(generate_path("test-model")))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": {
                "code": 400,
                "message": "Invalid argument: aspect_ratio is not supported for this model",
                "status": "INVALID_ARGUMENT"
            }
        })))
        .expect(2)
        .mount(&server)
        .await;

    let client = test_client(&server);
    let params = GenerateParams {
        model: Some("test-model".to_string()),
        aspect_ratio: Some(AspectRatio::Vertical),
        ..GenerateParams::new("a waterfall")
    };

    let err = client.generate(&params).await.unwrap_err();
    match err {
        Error::Api { status_code, message, .. } => {
            assert_eq!(status_code, 400);
            assert!(message.contains("aspect_ratio"));
        }
        other => panic!("Expected Api error, got {other:?}"),
    }

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2, "first attempt plus exactly one retry");
}

#[tokio::test]
async fn rejection_without_aspect_ratio_in_request_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(generate_path("test-model")))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": {
                "code": 400,
                "message": "Invalid argument: aspect_ratio",
                "status": "INVALID_ARGUMENT"
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(&server);
    let params = GenerateParams {
        model: Some("test-model".to_string()),
        ..GenerateParams::new("a waterfall")
    };

    // No aspect ratio was requested, so there is nothing to strip
    assert!(matches!(client.generate(&params).await, Err(Error::Api { .. })));
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn auth_rejection_is_never_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(generate_path("test-model")))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "error": {
                "code": 403,
                "message": "The caller does not have permission",
                "status": "PERMISSION_DENIED"
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(&server);
    let params = GenerateParams {
        model: Some("test-model".to_string()),
        aspect_ratio: Some(AspectRatio::Square),
        ..GenerateParams::new("a fortress")
    };

    let err = client.generate(&params).await.unwrap_err();
    assert!(matches!(err, Error::Auth { status_code: 403, .. }));
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn success_without_image_part_is_empty_result() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(generate_path("test-model")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{"content": {"parts": [{"text": "I cannot draw that"}]}}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(&server);
    let params = GenerateParams {
        model: Some("test-model".to_string()),
        ..GenerateParams::new("a paradox")
    };
    assert!(matches!(client.generate(&params).await, Err(Error::EmptyResult)));
}

#[tokio::test]
async fn validation_failure_makes_no_network_call() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let client = test_client(&server);
    let err = client.generate(&GenerateParams::new("   ")).await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
}

#[tokio::test]
async fn timeout_is_a_transport_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(generate_path("test-model")))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(image_response("image/png", TINY_PNG_B64))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let config = Config::new("test-key")
        .with_base_url(format!("{}/v1beta/models", server.uri()))
        .with_timeout_secs(1);
    let client = GenerationClient::new(config);
    let params = GenerateParams {
        model: Some("test-model".to_string()),
        ..GenerateParams::new("a slow sloth")
    };

    let err = client.generate(&params).await.unwrap_err();
    match err {
        Error::Transport { message, .. } => assert!(message.contains("timed out")),
        other => panic!("Expected Transport error, got {other:?}"),
    }
}

#[tokio::test]
async fn list_models_pages_and_filters() {
    let server = MockServer::start().await;

    // Second page, matched by its token
    Mock::given(method("GET"))
        .and(path("/v1beta/models"))
        .and(query_param("pageToken", "page-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "models": [{
                "name": "models/imagen-4.0-generate-001",
                "displayName": "Imagen 4",
                "description": "Image generation",
                "supportedGenerationMethods": ["predict"]
            }]
        })))
        .mount(&server)
        .await;

    // First page
    Mock::given(method("GET"))
        .and(path("/v1beta/models"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "models": [
                {
                    "name": "models/gemini-3-pro-image-preview",
                    "displayName": "Gemini 3 Pro Image",
                    "description": "Image generation model",
                    "supportedGenerationMethods": ["generateContent"]
                },
                {
                    "name": "models/gemini-2.5-pro",
                    "displayName": "Gemini 2.5 Pro",
                    "description": "Text model",
                    "supportedGenerationMethods": ["generateContent"]
                }
            ],
            "nextPageToken": "page-2"
        })))
        .mount(&server)
        .await;

    let client = test_client(&server);
    let models = client.list_models(true).await.unwrap();

    let ids: Vec<&str> = models.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["gemini-3-pro-image-preview", "imagen-4.0-generate-001"]);
    assert!(models.iter().all(|m| m.supports_image_generation));

    // Unfiltered listing keeps the text model too
    let all = client.list_models(false).await.unwrap();
    assert_eq!(all.len(), 3);
    assert!(all.iter().any(|m| m.id == "gemini-2.5-pro" && !m.supports_image_generation));
}

#[tokio::test]
async fn full_pipeline_generate_resize_save() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(generate_path("test-model")))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(image_response("image/png", &large_png_b64(400, 200))),
        )
        .mount(&server)
        .await;

    let client = test_client(&server);
    let params = GenerateParams {
        model: Some("test-model".to_string()),
        ..GenerateParams::new("a wide banner")
    };

    let image = client.generate(&params).await.unwrap();
    let resized = resize(&image, &ResizeSpec::bounds(100, 100)).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let record = assemble(&resized, &Destination::file(dir.path().join("banner")))
        .await
        .unwrap();

    let saved = match record {
        OutputRecord::Saved(saved) => saved,
        other => panic!("Expected saved record, got {other:?}"),
    };
    assert_eq!(saved.model_used.as_deref(), Some("test-model"));
    assert_eq!(saved.saved_path.extension().unwrap(), "png");

    let written = image::open(&saved.saved_path).unwrap();
    assert_eq!((written.width(), written.height()), (100, 50));
}

#[tokio::test]
async fn generate_resized_applies_bounds() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(generate_path("test-model")))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(image_response("image/png", &large_png_b64(300, 300))),
        )
        .mount(&server)
        .await;

    let client = test_client(&server);
    let params = GenerateParams {
        model: Some("test-model".to_string()),
        ..GenerateParams::new("a square badge")
    };
    let resized = client
        .generate_resized(&params, &ResizeSpec::bounds(64, 64))
        .await
        .unwrap();

    let decoded = image::load_from_memory(&resized.bytes).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (64, 64));
}

#[tokio::test]
async fn inline_assembly_round_trips_generated_bytes() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(generate_path("test-model")))
        .respond_with(ResponseTemplate::new(200).set_body_json(image_response("image/png", TINY_PNG_B64)))
        .mount(&server)
        .await;

    let client = test_client(&server);
    let params = GenerateParams {
        model: Some("test-model".to_string()),
        ..GenerateParams::new("a pixel")
    };
    let image = client.generate(&params).await.unwrap();
    let record = assemble(&image, &Destination::Inline).await.unwrap();

    let payload = match record {
        OutputRecord::Inline(payload) => payload,
        other => panic!("Expected inline record, got {other:?}"),
    };
    assert_eq!(BASE64.decode(&payload.image_data_b64).unwrap(), image.bytes);
    assert_eq!(payload.model_used.as_deref(), Some("test-model"));
}

#[tokio::test]
async fn reference_images_are_sent_inline() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(generate_path("test-model")))
        .respond_with(ResponseTemplate::new(200).set_body_json(image_response("image/png", TINY_PNG_B64)))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let reference_path = dir.path().join("style.png");
    tokio::fs::write(&reference_path, BASE64.decode(TINY_PNG_B64).unwrap())
        .await
        .unwrap();

    let client = test_client(&server);
    let reference = gemini_imagen::ReferenceImage::from_path(&reference_path).await.unwrap();
    assert_eq!(reference.mime_type, "image/png");

    let params = GenerateParams {
        model: Some("test-model".to_string()),
        reference_images: vec![reference],
        ..GenerateParams::new("in this style, a lighthouse")
    };
    client.generate(&params).await.unwrap();

    let requests = server.received_requests().await.unwrap();
    let body = request_body(&requests[0]);
    let parts = body["contents"][0]["parts"].as_array().unwrap();
    assert_eq!(parts.len(), 2);
    assert_eq!(parts[0]["text"], "in this style, a lighthouse");
    assert_eq!(parts[1]["inlineData"]["mimeType"], "image/png");
    assert_eq!(parts[1]["inlineData"]["data"], TINY_PNG_B64);
}
