use chrono::Utc;
use common::{Config, Credentials};
use tracing::{info, warn};

use crate::error::PipelineError;
use crate::history::PostHistory;
use crate::imaging::ImageGenerator;
use crate::llm::composer::{CaptionComposer, PromptComposer};
use crate::llm::remote::RemoteLlmProvider;
use crate::llm::LlmProvider;
use crate::models::PostResult;
use crate::news::NewsFetcher;
use crate::publish::Publisher;

/// One run: news → image prompt → image → caption → post. Strictly sequential;
/// the first failing stage ends the run.
pub struct Pipeline<P: LlmProvider = RemoteLlmProvider> {
    news: NewsFetcher,
    llm: P,
    prompts: PromptComposer,
    images: ImageGenerator,
    captions: CaptionComposer,
    publisher: Publisher,
    history: Option<HistorySettings>,
}

struct HistorySettings {
    path: std::path::PathBuf,
    retention_days: i64,
}

impl Pipeline<RemoteLlmProvider> {
    /// Wire every component from configuration. Makes no network call.
    pub fn from_config(config: &Config, credentials: Credentials) -> Result<Self, PipelineError> {
        config.validate()?;
        let llm = RemoteLlmProvider::from_config(&config.ai, &config.http, credentials.ai_api_key.clone())?;
        Self::with_provider(config, credentials, llm)
    }
}

impl<P: LlmProvider> Pipeline<P> {
    /// Same wiring with a caller-supplied chat provider.
    pub fn with_provider(config: &Config, credentials: Credentials, llm: P) -> Result<Self, PipelineError> {
        let news = NewsFetcher::new(&config.news, &config.http, credentials.news_api_key.clone())?;
        let images = ImageGenerator::new(&config.ai, &config.http, credentials.ai_api_key.clone())?;
        let publisher = Publisher::new(&config.publish, &config.http, credentials.twitter)?;

        let history = config.history.path.clone().map(|path| HistorySettings {
            path,
            retention_days: config.history.retention_days,
        });

        Ok(Self {
            news,
            llm,
            prompts: PromptComposer::new(&config.prompt),
            images,
            captions: CaptionComposer::new(&config.caption),
            publisher,
            history,
        })
    }

    pub async fn run(&self) -> Result<PostResult, PipelineError> {
        let mut history = match &self.history {
            Some(settings) => Some(PostHistory::load(&settings.path, settings.retention_days, Utc::now()).await),
            None => None,
        };

        info!(stage = "news", "pipeline: fetching article");
        let article = self.news.fetch_article(history.as_ref()).await?;

        info!(stage = "prompt", "pipeline: composing image prompt");
        let prompt = self.prompts.compose(&self.llm, &article).await?;

        info!(stage = "image", "pipeline: generating image");
        let image = self.images.generate(&prompt).await?;

        info!(stage = "caption", "pipeline: composing caption");
        let caption = self.captions.compose(&self.llm, &article).await?;

        info!(stage = "publish", "pipeline: publishing");
        let result = self.publisher.publish(image, &caption).await?;

        if self.publisher.source_reply_enabled() {
            if let Err(e) = self.publisher.reply_with_source(&result.post_id, &article).await {
                // the post is already live; a missing reply is not worth failing the run
                warn!(error = %e, post_id = %result.post_id, "pipeline: source reply failed");
            }
        }

        if let (Some(history), Some(url)) = (history.as_mut(), article.url.as_deref()) {
            history.record(url, result.timestamp);
            if let Err(e) = history.save().await {
                warn!("pipeline: failed to save posted-article history: {:#}", e);
            }
        }

        Ok(result)
    }
}
