use std::sync::Arc;

use mockup_contracts::{
    Background, EditRequest, GenerateRequest, ImageFile, ImageResult, ImageSize, OutputFormat,
};
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::client::ImageApiClient;
use crate::config::ServiceConfig;
use crate::error::{ImageApiError, ImageApiErrorKind};
use crate::keys::{generated_key, upload_key, GeneratedKind};
use crate::media::{decode_data_url, fetch_bytes, sniff_image_mime};
use crate::prompts::{base_image_prompt, enhance_prompt, BaseImagePromptArgs};
use crate::storage::{public_url, validate_key, ObjectStore};
use crate::validate::{EnhanceMockupInput, GenerateBaseImageInput, ValidationErrors};

/// Landscape framing tends to suit product views.
const MOCKUP_SIZE: ImageSize = ImageSize::Landscape;
const MOCKUP_FORMAT: OutputFormat = OutputFormat::Png;
const MOCKUP_BACKGROUND: Background = Background::Opaque;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid request body")]
    Validation(ValidationErrors),
    #[error("{0}")]
    BadRequest(String),
    #[error("File too large (max {max} bytes)")]
    PayloadTooLarge { max: usize },
    #[error(transparent)]
    ImageApi(#[from] ImageApiError),
    #[error("{0:#}")]
    Fetch(anyhow::Error),
    #[error("{0:#}")]
    Storage(anyhow::Error),
}

impl ServiceError {
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) | Self::BadRequest(_) => 400,
            Self::PayloadTooLarge { .. } => 413,
            Self::ImageApi(err) => match err.kind() {
                ImageApiErrorKind::Config => 500,
                ImageApiErrorKind::Transport if err.is_timeout() => 504,
                ImageApiErrorKind::Transport
                | ImageApiErrorKind::UpstreamHttp
                | ImageApiErrorKind::Decode => 502,
            },
            Self::Fetch(_) => 502,
            Self::Storage(_) => 500,
        }
    }

    /// `{ok: false, error}`; validation failures carry the per-field detail.
    pub fn body(&self) -> Value {
        match self {
            Self::Validation(errors) => json!({"ok": false, "error": errors}),
            other => json!({"ok": false, "error": other.to_string()}),
        }
    }
}

#[derive(Debug, Clone)]
pub struct UploadInput {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
    pub folder: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadOutcome {
    pub ok: bool,
    pub key: String,
    pub url: String,
    #[serde(rename = "contentType")]
    pub content_type: String,
    pub bytes: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BaseImageOutcome {
    pub ok: bool,
    pub url: String,
    pub key: String,
    pub view_id: String,
    pub source: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnhancedOutcome {
    pub ok: bool,
    pub url: String,
    pub key: String,
}

/// The three route operations, independent of the HTTP framework.
pub struct MockupService {
    client: ImageApiClient,
    store: Arc<dyn ObjectStore>,
    public_base_url: Option<String>,
    max_upload_bytes: usize,
}

impl MockupService {
    pub fn new(client: ImageApiClient, store: Arc<dyn ObjectStore>, config: &ServiceConfig) -> Self {
        Self {
            client,
            store,
            public_base_url: config.public_asset_base_url.clone(),
            max_upload_bytes: config.max_upload_bytes,
        }
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_bytes
    }

    pub fn upload(&self, input: UploadInput) -> Result<UploadOutcome, ServiceError> {
        if input.bytes.len() > self.max_upload_bytes {
            return Err(ServiceError::PayloadTooLarge {
                max: self.max_upload_bytes,
            });
        }
        let key = upload_key(input.folder.as_deref(), &input.file_name);
        validate_key(&key).map_err(|err| ServiceError::BadRequest(err.to_string()))?;
        let content_type = input
            .content_type
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| sniff_image_mime(&input.bytes).to_string());

        let stored = self
            .store
            .put(&key, &input.bytes, &content_type)
            .map_err(ServiceError::Storage)?;
        tracing::info!(key = %stored.key, bytes = stored.size, "stored upload");

        Ok(UploadOutcome {
            ok: true,
            url: self.url_for(&key),
            key,
            content_type,
            bytes: stored.size,
        })
    }

    pub fn generate_base_image(&self, body: &[u8]) -> Result<BaseImageOutcome, ServiceError> {
        let input = GenerateBaseImageInput::parse(body).map_err(ServiceError::Validation)?;
        let prompt = base_image_prompt(&BaseImagePromptArgs {
            product_name: &input.product_name,
            product_type: input.product_type.as_deref(),
            view_id: &input.view_id,
            decoration_method: input.decoration_method.as_deref(),
            style_hint: input.style_hint.as_deref(),
        });

        let result = self.client.generate(
            GenerateRequest::new(prompt)
                .size(MOCKUP_SIZE)
                .background(MOCKUP_BACKGROUND)
                .output_format(MOCKUP_FORMAT),
        )?;
        let key = generated_key(
            GeneratedKind::Base,
            input.product_handle.as_deref(),
            Some(&input.view_id),
            result.metadata.output_format,
        );
        self.store_result(&key, &result)?;

        Ok(BaseImageOutcome {
            ok: true,
            url: self.url_for(&key),
            key,
            view_id: input.view_id,
            source: "ai_generated",
        })
    }

    pub fn enhance_mockup(&self, body: &[u8]) -> Result<EnhancedOutcome, ServiceError> {
        let input = EnhanceMockupInput::parse(body).map_err(ServiceError::Validation)?;

        let transport = self.client.transport();
        let base = fetch_bytes(transport.as_ref(), &input.base_image_url)
            .map_err(ServiceError::Fetch)?;
        let overlay = decode_data_url(&input.overlay_png_base64)
            .map_err(|err| ServiceError::BadRequest(err.to_string()))?;
        let prompt = enhance_prompt(&input.decoration_method, &input.location);

        let result = self.client.edit(
            EditRequest::new(
                prompt,
                ImageFile::new(base.bytes, "base.png", base.mime),
                ImageFile::new(overlay.bytes, "overlay.png", overlay.mime),
            )
            .size(MOCKUP_SIZE)
            .background(MOCKUP_BACKGROUND)
            .output_format(MOCKUP_FORMAT),
        )?;
        let key = generated_key(
            GeneratedKind::Enhanced,
            input.product_handle.as_deref(),
            input.view_id.as_deref(),
            result.metadata.output_format,
        );
        self.store_result(&key, &result)?;

        Ok(EnhancedOutcome {
            ok: true,
            url: self.url_for(&key),
            key,
        })
    }

    fn store_result(&self, key: &str, result: &ImageResult) -> Result<(), ServiceError> {
        let stored = self
            .store
            .put(key, &result.bytes, &result.content_type)
            .map_err(ServiceError::Storage)?;
        tracing::info!(
            key = %stored.key,
            bytes = stored.size,
            model = %result.metadata.model,
            "stored generated image"
        );
        Ok(())
    }

    fn url_for(&self, key: &str) -> String {
        public_url(self.public_base_url.as_deref(), key, self.store.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine as _;

    use super::*;
    use crate::config::ClientConfig;
    use crate::storage::MemoryStore;
    use crate::transport::{
        FormField, HttpMethod, HttpRequest, HttpResponse, RequestBody, Transport, TransportFailure,
    };

    #[derive(Default)]
    struct RecordingTransport {
        responses: Mutex<VecDeque<HttpResponse>>,
        requests: Mutex<Vec<HttpRequest>>,
    }

    impl RecordingTransport {
        fn with(responses: Vec<HttpResponse>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn requests(&self) -> Vec<HttpRequest> {
            self.requests
                .lock()
                .map(|requests| requests.clone())
                .unwrap_or_default()
        }
    }

    impl Transport for RecordingTransport {
        fn send(
            &self,
            request: &HttpRequest,
            _timeout: Duration,
        ) -> Result<HttpResponse, TransportFailure> {
            if let Ok(mut requests) = self.requests.lock() {
                requests.push(request.clone());
            }
            self.responses
                .lock()
                .ok()
                .and_then(|mut responses| responses.pop_front())
                .ok_or_else(|| TransportFailure::other("no scripted response"))
        }
    }

    fn image_response(bytes: &[u8]) -> HttpResponse {
        let body = json!({"data": [{"b64_json": BASE64.encode(bytes)}]});
        HttpResponse::new(200, serde_json::to_vec(&body).unwrap_or_default())
    }

    fn service(
        transport: Arc<RecordingTransport>,
        store: Arc<MemoryStore>,
        config: ServiceConfig,
    ) -> MockupService {
        let client_config = ClientConfig::default()
            .with_api_key("sk-test")
            .with_retry_delay(Duration::from_millis(1))
            .with_max_jitter(Duration::ZERO);
        MockupService::new(
            ImageApiClient::with_transport(client_config, transport),
            store,
            &config,
        )
    }

    fn public_config() -> ServiceConfig {
        ServiceConfig {
            public_asset_base_url: Some("https://assets.example.com/".to_string()),
            ..ServiceConfig::default()
        }
    }

    #[test]
    fn generate_base_image_stores_png_under_sanitized_key() -> anyhow::Result<()> {
        let transport = RecordingTransport::with(vec![image_response(b"BASE")]);
        let store = Arc::new(MemoryStore::new());
        let service = service(transport.clone(), store.clone(), public_config());

        let body = serde_json::to_vec(&json!({
            "product_name": "Travel Mug",
            "product_handle": "travel mug/20oz",
            "view_id": "front",
        }))?;
        let outcome = service.generate_base_image(&body)?;

        assert!(outcome.key.starts_with("generated/base/travel-mug-20oz/front/"));
        assert!(outcome.key.ends_with(".png"));
        assert_eq!(outcome.url, format!("https://assets.example.com/{}", outcome.key));
        assert_eq!(outcome.source, "ai_generated");
        assert_eq!(
            store.get(&outcome.key),
            Some((b"BASE".to_vec(), "image/png".to_string()))
        );

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        let RequestBody::Json(payload) = &requests[0].body else {
            anyhow::bail!("generate must post JSON");
        };
        assert_eq!(payload["size"], "1536x1024");
        assert_eq!(payload["background"], "opaque");
        assert!(payload["prompt"]
            .as_str()
            .unwrap_or_default()
            .contains("Product name: Travel Mug."));
        Ok(())
    }

    #[test]
    fn invalid_generate_body_never_reaches_upstream() {
        let transport = RecordingTransport::with(Vec::new());
        let service = service(
            transport.clone(),
            Arc::new(MemoryStore::new()),
            ServiceConfig::default(),
        );

        let err = service
            .generate_base_image(br#"{"product_name": "Mug"}"#)
            .err();
        assert_eq!(err.as_ref().map(ServiceError::status_code), Some(400));
        let body = err.map(|err| err.body()).unwrap_or_default();
        assert_eq!(body["ok"], false);
        assert_eq!(body["error"]["field_errors"]["view_id"][0], "Required");
        assert!(transport.requests().is_empty());
    }

    #[test]
    fn enhance_mockup_fetches_base_and_sends_both_images() -> anyhow::Result<()> {
        let base = HttpResponse::new(200, b"JPEGBASE".to_vec()).with_header("content-type", "image/jpeg");
        let transport = RecordingTransport::with(vec![base, image_response(b"PROOF")]);
        let store = Arc::new(MemoryStore::new());
        let service = service(transport.clone(), store.clone(), ServiceConfig::default());

        let overlay = format!("data:image/png;base64,{}", BASE64.encode(b"overlay-design-bytes"));
        let body = serde_json::to_vec(&json!({
            "view_id": "left chest",
            "base_image_url": "https://cdn.example.com/tee.jpg",
            "overlay_png_base64": overlay,
            "decoration_method": "embroidery",
            "location": "left_chest",
        }))?;
        let outcome = service.enhance_mockup(&body)?;

        assert!(outcome
            .key
            .starts_with("generated/enhanced/unknown-product/left-chest/"));
        assert_eq!(outcome.url, format!("memory://{}", outcome.key));
        assert_eq!(store.get(&outcome.key).map(|(bytes, _)| bytes), Some(b"PROOF".to_vec()));

        let requests = transport.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].method, HttpMethod::Get);
        assert_eq!(requests[0].url, "https://cdn.example.com/tee.jpg");
        assert_eq!(requests[0].bearer_token, None);

        let RequestBody::Multipart(fields) = &requests[1].body else {
            anyhow::bail!("edit must post multipart");
        };
        let images = fields
            .iter()
            .filter_map(|field| match field {
                FormField::File {
                    file_name,
                    content_type,
                    bytes,
                    ..
                } => Some((file_name.clone(), content_type.clone(), bytes.clone())),
                _ => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(
            images,
            vec![
                ("base.png".to_string(), "image/jpeg".to_string(), b"JPEGBASE".to_vec()),
                (
                    "overlay.png".to_string(),
                    "image/png".to_string(),
                    b"overlay-design-bytes".to_vec()
                ),
            ]
        );
        Ok(())
    }

    #[test]
    fn enhance_mockup_reports_unreachable_base_image() {
        let transport = RecordingTransport::with(vec![HttpResponse::new(404, Vec::new())]);
        let service = service(transport.clone(), Arc::new(MemoryStore::new()), ServiceConfig::default());
        let body = serde_json::to_vec(&json!({
            "base_image_url": "https://cdn.example.com/missing.png",
            "overlay_png_base64": "data:image/png;base64,AAAAAAAAAAAAAAAA",
            "decoration_method": "print",
            "location": "front",
        }))
        .unwrap_or_default();

        let err = service.enhance_mockup(&body).err();
        assert_eq!(err.as_ref().map(ServiceError::status_code), Some(502));
        assert_eq!(
            err.map(|err| err.to_string()).as_deref(),
            Some("Failed to fetch url: 404")
        );
        assert_eq!(transport.requests().len(), 1);
    }

    #[test]
    fn enhance_mockup_rejects_empty_base_image() {
        let empty = HttpResponse::new(200, Vec::new()).with_header("content-type", "image/png");
        let transport = RecordingTransport::with(vec![empty, image_response(b"PROOF")]);
        let store = Arc::new(MemoryStore::new());
        let service = service(transport.clone(), store.clone(), ServiceConfig::default());
        let body = serde_json::to_vec(&json!({
            "base_image_url": "https://cdn.example.com/empty.png",
            "overlay_png_base64": "data:image/png;base64,AAAAAAAAAAAAAAAA",
            "decoration_method": "print",
            "location": "front",
        }))
        .unwrap_or_default();

        let err = service.enhance_mockup(&body).err();
        assert_eq!(err.as_ref().map(ServiceError::status_code), Some(502));
        assert_eq!(
            err.map(|err| err.to_string()).as_deref(),
            Some("Failed to fetch url: empty body")
        );
        assert_eq!(transport.requests().len(), 1);
        assert!(store.keys().is_empty());
    }

    #[test]
    fn upstream_failures_map_to_gateway_statuses() {
        let rejected = HttpResponse::new(
            400,
            serde_json::to_vec(&json!({"error": {"message": "bad prompt"}})).unwrap_or_default(),
        );
        let transport = RecordingTransport::with(vec![rejected]);
        let service = service(transport, Arc::new(MemoryStore::new()), ServiceConfig::default());
        let err = service
            .generate_base_image(br#"{"product_name": "Mug", "view_id": "front"}"#)
            .err();
        assert_eq!(err.as_ref().map(ServiceError::status_code), Some(502));
        assert!(err
            .map(|err| err.to_string().contains("message=bad prompt"))
            .unwrap_or(false));

        let timeout = ServiceError::ImageApi(ImageApiError::Transport {
            operation: "OpenAI edit",
            attempts: 3,
            timed_out: true,
            message: "timed out".to_string(),
        });
        assert_eq!(timeout.status_code(), 504);
        let config = ServiceError::ImageApi(ImageApiError::Config {
            message: "Missing OPENAI_API_KEY".to_string(),
        });
        assert_eq!(config.status_code(), 500);
    }

    #[test]
    fn upload_enforces_size_and_sniffs_content_type() -> anyhow::Result<()> {
        let store = Arc::new(MemoryStore::new());
        let config = ServiceConfig {
            max_upload_bytes: 16,
            ..ServiceConfig::default()
        };
        let service = service(RecordingTransport::with(Vec::new()), store.clone(), config);

        let too_big = service
            .upload(UploadInput {
                file_name: "big.png".to_string(),
                content_type: Some("image/png".to_string()),
                bytes: vec![0; 17],
                folder: None,
            })
            .err();
        assert_eq!(too_big.as_ref().map(ServiceError::status_code), Some(413));
        assert_eq!(
            too_big.map(|err| err.to_string()).as_deref(),
            Some("File too large (max 16 bytes)")
        );

        let png = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
        let outcome = service.upload(UploadInput {
            file_name: "Logo.PNG".to_string(),
            content_type: None,
            bytes: png.to_vec(),
            folder: Some("/designs/".to_string()),
        })?;
        assert!(outcome.key.starts_with("designs/"));
        assert!(outcome.key.ends_with(".png"));
        assert_eq!(outcome.content_type, "image/png");
        assert_eq!(outcome.bytes, 8);
        assert_eq!(store.keys(), vec![outcome.key.clone()]);

        let value = serde_json::to_value(&outcome)?;
        assert_eq!(value["contentType"], "image/png");
        Ok(())
    }

    #[test]
    fn upload_rejects_traversal_folders() {
        let service = service(
            RecordingTransport::with(Vec::new()),
            Arc::new(MemoryStore::new()),
            ServiceConfig::default(),
        );
        let err = service
            .upload(UploadInput {
                file_name: "x.png".to_string(),
                content_type: Some("image/png".to_string()),
                bytes: vec![1],
                folder: Some("../../etc".to_string()),
            })
            .err();
        assert_eq!(err.map(|err| err.status_code()), Some(400));
    }
}
