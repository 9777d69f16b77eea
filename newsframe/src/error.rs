//! Error taxonomy for a single run.
//!
//! Every stage failure is terminal. The variants carry enough context (stage name,
//! upstream status, upstream message) for the operator to diagnose a failed run from
//! the log line alone.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

pub use common::ConfigError;

/// Failure talking to one of the third-party services.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("upstream returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("unexpected response: {0}")]
    Malformed(String),

    #[error("response contained no usable content")]
    Empty,
}

impl UpstreamError {
    /// HTTP status reported by the upstream, if the request got that far.
    pub fn status(&self) -> Option<u16> {
        match self {
            UpstreamError::Status { status, .. } => Some(*status),
            UpstreamError::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// Which chat completion failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Prompt,
    Caption,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Prompt => "prompt",
            Stage::Caption => "caption",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The two write calls made against the social platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishStep {
    MediaUpload,
    PostCreation,
}

impl fmt::Display for PublishStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublishStep::MediaUpload => f.write_str("media upload"),
            PublishStep::PostCreation => f.write_str("post creation"),
        }
    }
}

/// Why the platform refused a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    DuplicateContent,
    OverLength,
    Unauthorized,
    Forbidden,
    RateLimited,
    Other,
}

impl Rejection {
    /// Classify a failed platform response from its status code and body.
    pub fn classify(status: Option<u16>, body: &str) -> Self {
        let body = body.to_lowercase();
        if body.contains("duplicate") {
            return Rejection::DuplicateContent;
        }
        // v2 "text is too long", v1 code 186 "needs to be a bit shorter"
        if body.contains("too long") || body.contains("bit shorter") {
            return Rejection::OverLength;
        }
        match status {
            Some(401) => Rejection::Unauthorized,
            Some(403) => Rejection::Forbidden,
            Some(429) => Rejection::RateLimited,
            _ => Rejection::Other,
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Rejection::DuplicateContent => "duplicate content",
            Rejection::OverLength => "text too long",
            Rejection::Unauthorized => "unauthorized",
            Rejection::Forbidden => "forbidden",
            Rejection::RateLimited => "rate limited",
            Rejection::Other => "rejected",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Configuration(#[from] ConfigError),

    #[error("news fetch failed: {0}")]
    NewsFetchFailed(#[source] UpstreamError),

    #[error("no usable article among {considered} headlines")]
    NoArticlesFound { considered: usize },

    #[error("{stage} generation failed: {source}")]
    GenerationFailed {
        stage: Stage,
        #[source]
        source: UpstreamError,
    },

    #[error("image generation failed: {0}")]
    ImageGenerationFailed(#[source] UpstreamError),

    #[error("{step} rejected ({rejection}): {source}")]
    PublishFailed {
        step: PublishStep,
        rejection: Rejection,
        #[source]
        source: UpstreamError,
    },
}

impl PipelineError {
    /// Stage name used in the failure log line.
    pub fn stage(&self) -> &'static str {
        match self {
            PipelineError::Configuration(_) => "config",
            PipelineError::NewsFetchFailed(_) | PipelineError::NoArticlesFound { .. } => "news",
            PipelineError::GenerationFailed { stage, .. } => stage.as_str(),
            PipelineError::ImageGenerationFailed(_) => "image",
            PipelineError::PublishFailed { .. } => "publish",
        }
    }

    pub fn upstream_status(&self) -> Option<u16> {
        match self {
            PipelineError::NewsFetchFailed(e)
            | PipelineError::GenerationFailed { source: e, .. }
            | PipelineError::ImageGenerationFailed(e)
            | PipelineError::PublishFailed { source: e, .. } => e.status(),
            PipelineError::Configuration(_) | PipelineError::NoArticlesFound { .. } => None,
        }
    }

    /// Process exit code; zero is reserved for a published post.
    pub fn exit_code(&self) -> u8 {
        match self {
            PipelineError::Configuration(_) => 2,
            PipelineError::NewsFetchFailed(_) | PipelineError::NoArticlesFound { .. } => 3,
            PipelineError::GenerationFailed { .. } => 4,
            PipelineError::ImageGenerationFailed(_) => 5,
            PipelineError::PublishFailed { .. } => 6,
        }
    }
}
