use base64::Engine;
use common::{AiConfig, HttpConfig};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{ConfigError, PipelineError, UpstreamError};
use crate::llm::remote::api_error_message;
use crate::models::{GeneratedImage, ImagePrompt};

/// Client for the provider's image-generation endpoint.
pub struct ImageGenerator {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    response_format: String,
    timeout: Duration,
}

impl ImageGenerator {
    pub fn new(ai: &AiConfig, http: &HttpConfig, api_key: impl Into<String>) -> Result<Self, ConfigError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(ai.timeout_seconds.max(http.timeout_seconds)))
            .user_agent(http.user_agent.clone())
            .build()
            .map_err(|e| ConfigError::Invalid(format!("failed to build image HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: format!("{}/images/generations", ai.base_url.trim_end_matches('/')),
            api_key: api_key.into(),
            model: ai.image_model.clone(),
            response_format: ai.image_response_format.clone(),
            timeout: Duration::from_secs(ai.timeout_seconds),
        })
    }

    /// Generate one image for `prompt` and return its bytes. No retry.
    pub async fn generate(&self, prompt: &ImagePrompt) -> Result<GeneratedImage, PipelineError> {
        self.try_generate(prompt)
            .await
            .map_err(PipelineError::ImageGenerationFailed)
    }

    async fn try_generate(&self, prompt: &ImagePrompt) -> Result<GeneratedImage, UpstreamError> {
        if prompt.as_str().trim().is_empty() {
            return Err(UpstreamError::Malformed("refusing to generate from an empty prompt".to_string()));
        }

        info!(model = %self.model, "image: requesting generation");
        let req_body = ImageRequest {
            model: &self.model,
            prompt: prompt.as_str(),
            n: 1,
            response_format: &self.response_format,
        };

        let exchange = async {
            let response = self
                .client
                .post(&self.endpoint)
                .bearer_auth(&self.api_key)
                .json(&req_body)
                .send()
                .await?;

            let status = response.status();
            let body = response.text().await?;
            Ok::<_, UpstreamError>((status, body))
        };
        let (status, body) = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| UpstreamError::Timeout(self.timeout))??;

        if !status.is_success() {
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                message: api_error_message(&body),
            });
        }

        let body: ImageResponse = serde_json::from_str(&body)
            .map_err(|e| UpstreamError::Malformed(format!("failed to parse image response: {}", e)))?;

        let data = body
            .data
            .into_iter()
            .next()
            .ok_or_else(|| UpstreamError::Malformed("image response has no data".to_string()))?;

        if let Some(revised) = &data.revised_prompt {
            debug!(revised_prompt = %revised, "image: provider revised the prompt");
        }

        let image = match (data.b64_json, data.url) {
            (Some(encoded), _) => decode_inline(&encoded)?,
            (None, Some(url)) => self.download(&url).await?,
            (None, None) => {
                return Err(UpstreamError::Malformed(
                    "image response has neither url nor b64_json".to_string(),
                ))
            }
        };

        info!(bytes = image.bytes.len(), mime_type = %image.mime_type, "image: generated");
        Ok(image)
    }

    async fn download(&self, url: &str) -> Result<GeneratedImage, UpstreamError> {
        debug!(url, "image: downloading");
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                message: format!("image download from {} failed", url),
            });
        }

        let mime_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_lowercase())
            .unwrap_or_default();

        if !mime_type.starts_with("image/") {
            return Err(UpstreamError::Malformed(format!(
                "unsupported content type '{}' for generated image",
                mime_type
            )));
        }

        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Err(UpstreamError::Empty);
        }

        Ok(GeneratedImage::new(bytes.to_vec(), mime_type))
    }
}

fn decode_inline(encoded: &str) -> Result<GeneratedImage, UpstreamError> {
    // some providers send a data URL rather than bare base64
    let (mime_type, payload) = match encoded.strip_prefix("data:") {
        Some(rest) => match rest.split_once(";base64,") {
            Some((mime, payload)) => (mime.to_string(), payload),
            None => return Err(UpstreamError::Malformed("unsupported data URL encoding".to_string())),
        },
        None => (String::new(), encoded),
    };

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|e| UpstreamError::Malformed(format!("invalid base64 image: {}", e)))?;

    if bytes.is_empty() {
        return Err(UpstreamError::Empty);
    }

    let mime_type = if mime_type.is_empty() {
        sniff_mime(&bytes).to_string()
    } else {
        mime_type
    };

    if !mime_type.starts_with("image/") {
        return Err(UpstreamError::Malformed(format!(
            "unsupported content type '{}' for generated image",
            mime_type
        )));
    }

    Ok(GeneratedImage::new(bytes, mime_type))
}

/// Identify the image format from its magic bytes; JPEG when unknown.
fn sniff_mime(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(&[0x89, b'P', b'N', b'G']) {
        "image/png"
    } else if bytes.starts_with(b"GIF8") {
        "image/gif"
    } else if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        "image/webp"
    } else {
        "image/jpeg"
    }
}

#[derive(Debug, Serialize)]
struct ImageRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    n: u32,
    response_format: &'a str,
}

#[derive(Debug, Deserialize)]
struct ImageResponse {
    #[serde(default)]
    data: Vec<ImageData>,
}

#[derive(Debug, Deserialize)]
struct ImageData {
    url: Option<String>,
    b64_json: Option<String>,
    revised_prompt: Option<String>,
}
