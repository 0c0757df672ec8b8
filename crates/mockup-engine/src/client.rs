use std::sync::Arc;
use std::thread;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use mockup_contracts::events::{EventLog, ImageRequestEvent};
use mockup_contracts::{
    EditRequest, GenerateRequest, ImageEndpoint, ImageFile, ImageMetadata, ImageResult,
};
use rand::Rng;
use serde_json::{json, Value};

use crate::config::ClientConfig;
use crate::error::{request_id_from, ImageApiError, UpstreamError};
use crate::transport::{
    FormField, HttpRequest, HttpResponse, ReqwestTransport, RequestBody, Transport,
};

/// Client for the image generations/edits API with bounded retries.
///
/// Holds only immutable configuration and a shared transport, so one
/// instance can serve concurrent calls.
#[derive(Clone)]
pub struct ImageApiClient {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    events: Option<EventLog>,
}

impl ImageApiClient {
    pub fn new(config: ClientConfig) -> Self {
        Self::with_transport(config, Arc::new(ReqwestTransport::new()))
    }

    pub fn with_transport(config: ClientConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            config,
            transport,
            events: None,
        }
    }

    pub fn with_events(mut self, events: EventLog) -> Self {
        self.events = Some(events);
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn transport(&self) -> Arc<dyn Transport> {
        Arc::clone(&self.transport)
    }

    pub fn generate(&self, request: GenerateRequest) -> Result<ImageResult, ImageApiError> {
        let endpoint = ImageEndpoint::Generations;
        let api_key = self.api_key()?;
        let url = self.endpoint_url(&endpoint);
        let model = request
            .model
            .unwrap_or_else(|| self.config.generate_model.clone());
        let payload = json!({
            "model": model,
            "prompt": request.prompt,
            "n": 1,
            "size": request.size.as_str(),
            "background": request.background.as_str(),
            "output_format": request.output_format.as_str(),
        });

        let http_request = HttpRequest::post(&url, api_key, RequestBody::Json(payload));
        let response = self.send_with_retries(&endpoint, &http_request)?;
        self.finish(
            &endpoint,
            &response,
            ImageMetadata {
                model,
                size: request.size,
                background: request.background,
                output_format: request.output_format,
                endpoint: url,
                request_id: None,
                revised_prompt: None,
            },
        )
    }

    pub fn edit(&self, request: EditRequest) -> Result<ImageResult, ImageApiError> {
        let endpoint = ImageEndpoint::Edits;
        let api_key = self.api_key()?;
        let url = self.endpoint_url(&endpoint);
        let model = request
            .model
            .unwrap_or_else(|| self.config.edit_model.clone());
        let fields = vec![
            FormField::text("model", model.clone()),
            FormField::text("prompt", request.prompt),
            FormField::text("n", "1"),
            FormField::text("size", request.size.as_str()),
            FormField::text("background", request.background.as_str()),
            FormField::text("output_format", request.output_format.as_str()),
            image_part(request.base_image),
            image_part(request.overlay_image),
        ];

        let http_request = HttpRequest::post(&url, api_key, RequestBody::Multipart(fields));
        let response = self.send_with_retries(&endpoint, &http_request)?;
        self.finish(
            &endpoint,
            &response,
            ImageMetadata {
                model,
                size: request.size,
                background: request.background,
                output_format: request.output_format,
                endpoint: url,
                request_id: None,
                revised_prompt: None,
            },
        )
    }

    fn api_key(&self) -> Result<&str, ImageApiError> {
        self.config
            .bearer_token()
            .ok_or_else(|| ImageApiError::Config {
                message: "Missing OPENAI_API_KEY".to_string(),
            })
    }

    fn endpoint_url(&self, endpoint: &ImageEndpoint) -> String {
        format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            endpoint.path()
        )
    }

    fn send_with_retries(
        &self,
        endpoint: &ImageEndpoint,
        request: &HttpRequest,
    ) -> Result<HttpResponse, ImageApiError> {
        let operation = endpoint.operation();
        let total_attempts = self.config.max_retries.saturating_add(1);

        for attempt in 0..total_attempts {
            let attempts_made = attempt + 1;
            let has_more = attempts_made < total_attempts;

            match self.transport.send(request, self.config.timeout) {
                Ok(response) if response.is_success() => return Ok(response),
                Ok(response) => {
                    if has_more && is_retryable_status(response.status) {
                        self.pause_before_retry(
                            endpoint,
                            attempt,
                            format!("HTTP {}", response.status),
                        );
                        continue;
                    }
                    let error = UpstreamError::from_response(&response);
                    self.record(ImageRequestEvent::ImageRequestFailed {
                        endpoint: endpoint.path().to_string(),
                        attempts: attempts_made,
                        status: Some(error.http_status),
                        timed_out: false,
                        request_id: error.request_id.clone(),
                        error: error.to_string(),
                    });
                    return Err(ImageApiError::UpstreamHttp { operation, error });
                }
                Err(failure) => {
                    if has_more {
                        self.pause_before_retry(endpoint, attempt, failure.message.clone());
                        continue;
                    }
                    self.record(ImageRequestEvent::ImageRequestFailed {
                        endpoint: endpoint.path().to_string(),
                        attempts: attempts_made,
                        status: None,
                        timed_out: failure.is_timeout(),
                        request_id: None,
                        error: failure.message.clone(),
                    });
                    return Err(ImageApiError::Transport {
                        operation,
                        attempts: attempts_made,
                        timed_out: failure.is_timeout(),
                        message: failure.message,
                    });
                }
            }
        }

        Err(ImageApiError::Transport {
            operation,
            attempts: total_attempts,
            timed_out: false,
            message: "request retries exhausted".to_string(),
        })
    }

    fn pause_before_retry(&self, endpoint: &ImageEndpoint, attempt: u32, reason: String) {
        let delay = self.retry_delay_for(attempt);
        tracing::warn!(
            endpoint = endpoint.path(),
            attempt = attempt + 1,
            max_retries = self.config.max_retries,
            delay_ms = delay.as_millis() as u64,
            %reason,
            "retrying image request"
        );
        self.record(ImageRequestEvent::ImageRequestRetry {
            endpoint: endpoint.path().to_string(),
            attempt: attempt + 1,
            delay_ms: delay.as_millis() as u64,
            reason,
        });
        thread::sleep(delay);
    }

    /// `retry_delay × (attempt + 1)` plus up to `max_jitter` of noise.
    fn retry_delay_for(&self, attempt: u32) -> Duration {
        let base = self.config.retry_delay.saturating_mul(attempt.saturating_add(1));
        let jitter_ms = u64::try_from(self.config.max_jitter.as_millis()).unwrap_or(u64::MAX);
        if jitter_ms == 0 {
            return base;
        }
        base.saturating_add(Duration::from_millis(
            rand::rng().random_range(0..=jitter_ms),
        ))
    }

    fn finish(
        &self,
        endpoint: &ImageEndpoint,
        response: &HttpResponse,
        mut metadata: ImageMetadata,
    ) -> Result<ImageResult, ImageApiError> {
        let decoded = decode_first_image(endpoint.operation(), &response.body)?;
        metadata.request_id = request_id_from(response);
        metadata.revised_prompt = decoded.revised_prompt;
        let content_type = metadata.output_format.content_type().to_string();

        tracing::info!(
            endpoint = endpoint.path(),
            model = %metadata.model,
            bytes = decoded.bytes.len(),
            request_id = metadata.request_id.as_deref().unwrap_or(""),
            "image request succeeded"
        );
        self.record(ImageRequestEvent::ImageRequestSucceeded {
            endpoint: endpoint.path().to_string(),
            model: metadata.model.clone(),
            size: metadata.size.as_str().to_string(),
            bytes: decoded.bytes.len(),
            request_id: metadata.request_id.clone(),
        });

        Ok(ImageResult {
            bytes: decoded.bytes,
            content_type,
            metadata,
        })
    }

    fn record(&self, event: ImageRequestEvent) {
        let Some(events) = self.events.as_ref() else {
            return;
        };
        if let Err(err) = events.record(&event) {
            tracing::warn!(error = %err, "failed to write image client event");
        }
    }
}

struct DecodedImage {
    bytes: Vec<u8>,
    revised_prompt: Option<String>,
}

fn decode_first_image(operation: &'static str, body: &[u8]) -> Result<DecodedImage, ImageApiError> {
    let payload: Value = serde_json::from_slice(body)
        .map_err(|err| ImageApiError::decode(operation, format!("invalid JSON payload: {err}")))?;
    let first = payload
        .get("data")
        .and_then(Value::as_array)
        .and_then(|rows| rows.first());
    let b64 = first
        .and_then(|row| row.get("b64_json"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ImageApiError::decode(operation, "missing image payload"))?;
    let bytes = BASE64
        .decode(b64.as_bytes())
        .map_err(|err| ImageApiError::decode(operation, format!("invalid base64 payload: {err}")))?;
    if bytes.is_empty() {
        return Err(ImageApiError::decode(operation, "missing image payload"));
    }
    let revised_prompt = first
        .and_then(|row| row.get("revised_prompt"))
        .and_then(Value::as_str)
        .map(str::to_string);
    Ok(DecodedImage {
        bytes,
        revised_prompt,
    })
}

fn image_part(file: ImageFile) -> FormField {
    FormField::File {
        name: "image".to_string(),
        file_name: file.filename,
        content_type: file.content_type,
        bytes: file.bytes,
    }
}

fn is_retryable_status(status: u16) -> bool {
    status == 429 || (500..600).contains(&status)
}
