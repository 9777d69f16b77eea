use chrono::{DateTime, Utc};
use common::{HttpConfig, NewsConfig};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{ConfigError, PipelineError, UpstreamError};
use crate::history::PostHistory;
use crate::models::Article;

/// Placeholder NewsAPI returns for articles pulled by the publisher
const REMOVED_MARKER: &str = "[Removed]";

/// Client for the news provider's top-headlines endpoint.
pub struct NewsFetcher {
    client: Client,
    endpoint: String,
    country: String,
    category: String,
    page_size: Option<u32>,
    api_key: String,
}

impl NewsFetcher {
    pub fn new(config: &NewsConfig, http: &HttpConfig, api_key: impl Into<String>) -> Result<Self, ConfigError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(http.timeout_seconds))
            .user_agent(http.user_agent.clone())
            .build()
            .map_err(|e| ConfigError::Invalid(format!("failed to build news HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            country: config.country.clone(),
            category: config.category.clone(),
            page_size: config.page_size,
            api_key: api_key.into(),
        })
    }

    /// Fetch the raw headline list. One outbound call, no retry.
    pub async fn fetch_headlines(&self) -> Result<Vec<NewsArticle>, UpstreamError> {
        let mut query = vec![
            ("country", self.country.clone()),
            ("category", self.category.clone()),
        ];
        if let Some(size) = self.page_size {
            query.push(("pageSize", size.to_string()));
        }

        let response = self
            .client
            .get(&self.endpoint)
            .header("X-Api-Key", &self.api_key)
            .query(&query)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                message: provider_message(&body),
            });
        }

        let parsed: HeadlinesResponse = serde_json::from_str(&body)
            .map_err(|e| UpstreamError::Malformed(format!("failed to parse headlines: {}", e)))?;

        if parsed.status.as_deref() == Some("error") {
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                message: parsed.message.unwrap_or_else(|| "unknown error".to_string()),
            });
        }

        debug!(
            total_results = parsed.total_results.unwrap_or(0),
            returned = parsed.articles.len(),
            "news: headlines received"
        );
        Ok(parsed.articles)
    }

    /// Fetch headlines and pick the article for this run.
    pub async fn fetch_article(&self, history: Option<&PostHistory>) -> Result<Article, PipelineError> {
        info!(country = %self.country, category = %self.category, "news: fetching top headlines");
        let articles = self
            .fetch_headlines()
            .await
            .map_err(PipelineError::NewsFetchFailed)?;

        let article = select_article(articles, history)?;
        info!(title = %article.title, source = ?article.source, url = ?article.url, "news: article selected");
        Ok(article)
    }
}

/// First article with a usable description whose URL has not been posted recently.
pub fn select_article(
    articles: Vec<NewsArticle>,
    history: Option<&PostHistory>,
) -> Result<Article, PipelineError> {
    let considered = articles.len();

    for raw in articles {
        let description = match non_blank(raw.description) {
            Some(d) => d,
            None => {
                debug!(title = ?raw.title, "news: skipping article without description");
                continue;
            }
        };

        if let (Some(history), Some(url)) = (history, raw.url.as_deref()) {
            if history.contains(url) {
                debug!(url, "news: skipping recently posted article");
                continue;
            }
        }

        let published_at = raw
            .published_at
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|d| d.with_timezone(&Utc));

        return Ok(Article {
            title: non_blank(raw.title).unwrap_or_else(|| description.clone()),
            description,
            source: raw.source.and_then(|s| s.name),
            url: raw.url.filter(|u| !u.trim().is_empty()),
            published_at,
        });
    }

    warn!(considered, "news: no usable article in response");
    Err(PipelineError::NoArticlesFound { considered })
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty() && v != REMOVED_MARKER)
}

/// Pull the `message` field out of a NewsAPI error body, falling back to the raw text.
fn provider_message(body: &str) -> String {
    serde_json::from_str::<HeadlinesResponse>(body)
        .ok()
        .and_then(|r| r.message)
        .unwrap_or_else(|| body.chars().take(500).collect())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HeadlinesResponse {
    status: Option<String>,
    total_results: Option<u64>,
    message: Option<String>,
    #[serde(default)]
    articles: Vec<NewsArticle>,
}

/// Article as returned by the provider
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewsArticle {
    pub source: Option<NewsSource>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub url: Option<String>,
    pub published_at: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewsSource {
    pub id: Option<String>,
    pub name: Option<String>,
}
