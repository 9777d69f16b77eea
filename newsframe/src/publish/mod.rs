use common::{HttpConfig, PublishConfig, TwitterCredentials};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

use crate::error::{ConfigError, PipelineError, PublishStep, Rejection, UpstreamError};
use crate::models::{Article, Caption, GeneratedImage, PostResult};

pub mod oauth;

use oauth::OAuthSigner;

/// Writes to the social platform: media upload, then post creation.
pub struct Publisher {
    client: Client,
    signer: OAuthSigner,
    media_upload_url: String,
    posts_url: String,
    source_reply: bool,
}

impl Publisher {
    pub fn new(
        config: &PublishConfig,
        http: &HttpConfig,
        credentials: TwitterCredentials,
    ) -> Result<Self, ConfigError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(http.timeout_seconds))
            .user_agent(http.user_agent.clone())
            .build()
            .map_err(|e| ConfigError::Invalid(format!("failed to build publish HTTP client: {}", e)))?;

        Ok(Self {
            client,
            signer: OAuthSigner::new(credentials),
            media_upload_url: config.media_upload_url.clone(),
            posts_url: config.posts_url.clone(),
            source_reply: config.source_reply,
        })
    }

    pub fn source_reply_enabled(&self) -> bool {
        self.source_reply
    }

    /// Upload the image, then post the caption with it attached. The image is consumed.
    pub async fn publish(&self, image: GeneratedImage, caption: &Caption) -> Result<PostResult, PipelineError> {
        let media_id = self.upload_media(image).await?;
        let post_id = self.create_post(caption, &media_id).await?;

        Ok(PostResult {
            post_id,
            media_id,
            timestamp: chrono::Utc::now(),
        })
    }

    /// Returns the platform's media identifier.
    pub async fn upload_media(&self, image: GeneratedImage) -> Result<String, PipelineError> {
        let step = PublishStep::MediaUpload;
        info!(bytes = image.bytes.len(), mime_type = %image.mime_type, "publish: uploading media");

        let file_name = image.file_name();
        let part = Part::bytes(image.bytes)
            .file_name(file_name)
            .mime_str(&image.mime_type)
            .map_err(|e| failure(step, UpstreamError::Transport(e)))?;
        let form = Form::new().part("media", part);

        let auth = self
            .signer
            .authorization_header("POST", &self.media_upload_url)
            .map_err(|e| failure(step, e))?;

        let response = self
            .client
            .post(&self.media_upload_url)
            .header(reqwest::header::AUTHORIZATION, auth)
            .multipart(form)
            .send()
            .await
            .map_err(|e| failure(step, e.into()))?;

        let body: MediaUploadResponse = read_success(step, response).await?;
        let media_id = body
            .media_id_string
            .or_else(|| body.media_id.map(|id| id.to_string()))
            .filter(|id| !id.is_empty())
            .ok_or_else(|| failure(step, UpstreamError::Malformed("upload response has no media id".to_string())))?;

        info!(media_id = %media_id, "publish: media uploaded");
        Ok(media_id)
    }

    /// Returns the new post's identifier.
    pub async fn create_post(&self, caption: &Caption, media_id: &str) -> Result<String, PipelineError> {
        let request = PostRequest {
            text: caption.as_str(),
            media: Some(PostMedia {
                media_ids: vec![media_id],
            }),
            reply: None,
        };
        let post_id = self.send_post(&request).await?;
        info!(post_id = %post_id, "publish: post created");
        Ok(post_id)
    }

    /// Reply to `post_id` with the article's source link.
    pub async fn reply_with_source(&self, post_id: &str, article: &Article) -> Result<String, PipelineError> {
        let text = source_reply_text(article);
        let request = PostRequest {
            text: &text,
            media: None,
            reply: Some(PostReply {
                in_reply_to_tweet_id: post_id,
            }),
        };
        let reply_id = self.send_post(&request).await?;
        info!(reply_id = %reply_id, "publish: source reply posted");
        Ok(reply_id)
    }

    async fn send_post(&self, request: &PostRequest<'_>) -> Result<String, PipelineError> {
        let step = PublishStep::PostCreation;
        let auth = self
            .signer
            .authorization_header("POST", &self.posts_url)
            .map_err(|e| failure(step, e))?;

        let response = self
            .client
            .post(&self.posts_url)
            .header(reqwest::header::AUTHORIZATION, auth)
            .json(request)
            .send()
            .await
            .map_err(|e| failure(step, e.into()))?;

        let body: PostResponse = read_success(step, response).await?;
        body.data
            .map(|d| d.id)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| failure(step, UpstreamError::Malformed("post response has no id".to_string())))
    }
}

/// `[SOURCE]: title url`, url omitted when the article has none.
pub fn source_reply_text(article: &Article) -> String {
    match &article.url {
        Some(url) => format!("[SOURCE]: {} {}", article.title, url),
        None => format!("[SOURCE]: {}", article.title),
    }
}

fn failure(step: PublishStep, source: UpstreamError) -> PipelineError {
    let rejection = match &source {
        UpstreamError::Status { status, message } => Rejection::classify(Some(*status), message),
        other => Rejection::classify(other.status(), ""),
    };
    PipelineError::PublishFailed {
        step,
        rejection,
        source,
    }
}

async fn read_success<T: for<'de> Deserialize<'de>>(step: PublishStep, response: Response) -> Result<T, PipelineError> {
    let status = response.status();
    let body = response.text().await.map_err(|e| failure(step, e.into()))?;

    if !status.is_success() {
        let message = platform_error_message(&body);
        warn!(%step, status = status.as_u16(), message = %message, "publish: platform rejected request");
        return Err(failure(
            step,
            UpstreamError::Status {
                status: status.as_u16(),
                message,
            },
        ));
    }

    serde_json::from_str(&body)
        .map_err(|e| failure(step, UpstreamError::Malformed(format!("failed to parse response: {}", e))))
}

/// Pull a readable message out of either API generation's error body.
fn platform_error_message(body: &str) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        detail: Option<String>,
        title: Option<String>,
        #[serde(default)]
        errors: Vec<ErrorItem>,
    }
    #[derive(Deserialize)]
    struct ErrorItem {
        message: Option<String>,
    }

    match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) => parsed
            .detail
            .or_else(|| parsed.errors.into_iter().find_map(|e| e.message))
            .or(parsed.title)
            .unwrap_or_else(|| body.chars().take(500).collect()),
        Err(_) => body.chars().take(500).collect(),
    }
}

#[derive(Debug, Deserialize)]
struct MediaUploadResponse {
    media_id: Option<u64>,
    media_id_string: Option<String>,
}

#[derive(Debug, Serialize)]
struct PostRequest<'a> {
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    media: Option<PostMedia<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply: Option<PostReply<'a>>,
}

#[derive(Debug, Serialize)]
struct PostMedia<'a> {
    media_ids: Vec<&'a str>,
}

#[derive(Debug, Serialize)]
struct PostReply<'a> {
    in_reply_to_tweet_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct PostResponse {
    data: Option<PostData>,
}

#[derive(Debug, Deserialize)]
struct PostData {
    id: String,
}
