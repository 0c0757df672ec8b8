use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use crate::transport::{HttpRequest, Transport};

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedMedia {
    pub bytes: Vec<u8>,
    pub mime: String,
}

/// Parses `data:<mime>;base64,<payload>`.
pub fn decode_data_url(data_url: &str) -> Result<DecodedMedia> {
    let rest = data_url
        .trim()
        .strip_prefix("data:")
        .ok_or_else(|| anyhow!("Invalid data URL"))?;
    let (mime, payload) = rest
        .split_once(";base64,")
        .ok_or_else(|| anyhow!("Invalid data URL"))?;
    if mime.is_empty() || payload.is_empty() {
        bail!("Invalid data URL");
    }
    let bytes = BASE64
        .decode(payload.trim().as_bytes())
        .context("Invalid data URL")?;
    Ok(DecodedMedia {
        bytes,
        mime: mime.to_string(),
    })
}

/// GETs `url` once through `transport`.
pub fn fetch_bytes(transport: &dyn Transport, url: &str) -> Result<DecodedMedia> {
    let response = transport
        .send(&HttpRequest::get(url), FETCH_TIMEOUT)
        .map_err(|failure| anyhow!("Failed to fetch url: {failure}"))?;
    if !response.is_success() {
        bail!("Failed to fetch url: {}", response.status);
    }
    if response.body.is_empty() {
        bail!("Failed to fetch url: empty body");
    }
    let mime = response
        .header("content-type")
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| sniff_image_mime(&response.body).to_string());
    Ok(DecodedMedia {
        bytes: response.body,
        mime,
    })
}

/// Content type guessed from magic bytes; octet-stream when unknown.
pub fn sniff_image_mime(bytes: &[u8]) -> &'static str {
    image::guess_format(bytes)
        .map(|format| format.to_mime_type())
        .unwrap_or(mockup_contracts::images::OCTET_STREAM)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::transport::{HttpResponse, TransportFailure};

    const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];

    struct FixedTransport(Result<HttpResponse, TransportFailure>);

    impl Transport for FixedTransport {
        fn send(
            &self,
            _request: &HttpRequest,
            _timeout: Duration,
        ) -> Result<HttpResponse, TransportFailure> {
            self.0.clone()
        }
    }

    #[test]
    fn data_url_decodes_payload_and_mime() -> anyhow::Result<()> {
        let url = format!("data:image/png;base64,{}", BASE64.encode(b"overlay"));
        let decoded = decode_data_url(&url)?;
        assert_eq!(decoded.bytes, b"overlay".to_vec());
        assert_eq!(decoded.mime, "image/png");
        Ok(())
    }

    #[test]
    fn malformed_data_urls_are_rejected() {
        for raw in [
            "image/png;base64,AAAA",
            "data:image/png,AAAA",
            "data:;base64,AAAA",
            "data:image/png;base64,***",
        ] {
            let err = decode_data_url(raw).err().map(|err| err.to_string());
            assert_eq!(err.as_deref(), Some("Invalid data URL"), "{raw}");
        }
    }

    #[test]
    fn fetch_prefers_response_content_type() -> anyhow::Result<()> {
        let transport = Arc::new(FixedTransport(Ok(HttpResponse::new(200, PNG_MAGIC.to_vec())
            .with_header("Content-Type", "image/jpeg"))));
        let fetched = fetch_bytes(transport.as_ref(), "https://cdn.test/base.jpg")?;
        assert_eq!(fetched.mime, "image/jpeg");
        assert_eq!(fetched.bytes, PNG_MAGIC.to_vec());
        Ok(())
    }

    #[test]
    fn fetch_sniffs_missing_content_type() -> anyhow::Result<()> {
        let transport = FixedTransport(Ok(HttpResponse::new(200, PNG_MAGIC.to_vec())));
        let fetched = fetch_bytes(&transport, "https://cdn.test/base")?;
        assert_eq!(fetched.mime, "image/png");
        Ok(())
    }

    #[test]
    fn fetch_reports_status_failures() {
        let transport = FixedTransport(Ok(HttpResponse::new(404, Vec::new())));
        let err = fetch_bytes(&transport, "https://cdn.test/missing.png")
            .err()
            .map(|err| err.to_string());
        assert_eq!(err.as_deref(), Some("Failed to fetch url: 404"));

        let transport = FixedTransport(Err(TransportFailure::connect("dns error")));
        let err = fetch_bytes(&transport, "https://nowhere.test/x.png")
            .err()
            .map(|err| err.to_string());
        assert_eq!(err.as_deref(), Some("Failed to fetch url: dns error"));
    }

    #[test]
    fn fetch_rejects_empty_success_body() {
        let transport = FixedTransport(Ok(
            HttpResponse::new(200, Vec::new()).with_header("content-type", "image/png")
        ));
        let err = fetch_bytes(&transport, "https://cdn.test/empty.png")
            .err()
            .map(|err| err.to_string());
        assert_eq!(err.as_deref(), Some("Failed to fetch url: empty body"));
    }

    #[test]
    fn unknown_bytes_sniff_as_octet_stream() {
        assert_eq!(sniff_image_mime(b"plain text"), "application/octet-stream");
    }
}
