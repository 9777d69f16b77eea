use chrono::Utc;
use common::{Config, Credentials};
use mockito::{Matcher, Mock, ServerGuard};
use newsframe::error::{PublishStep, Rejection, Stage};
use newsframe::history::PostHistory;
use newsframe::llm::composer::fit_to_limit;
use newsframe::{Pipeline, PipelineError};
use serde_json::json;

// 8-byte PNG signature, base64 encoded
const PNG_B64: &str = "iVBORw0KGgo=";

const PROMPT_MARKER: &str = "hyperrealistic image prompt";
const CAPTION_MARKER: &str = "Summarize as tweet";

fn test_config(server: &ServerGuard) -> Config {
    let mut config = Config::default();
    config.news.endpoint = format!("{}/v2/top-headlines", server.url());
    config.ai.base_url = format!("{}/v1", server.url());
    config.ai.image_response_format = "b64_json".to_string();
    config.ai.timeout_seconds = 5;
    config.publish.media_upload_url = format!("{}/1.1/media/upload.json", server.url());
    config.publish.posts_url = format!("{}/2/tweets", server.url());
    config
}

fn test_credentials() -> Credentials {
    Credentials::from_lookup(|name| Some(format!("test-{}", name.to_lowercase()))).unwrap()
}

fn headlines(articles: serde_json::Value) -> String {
    let count = articles.as_array().map_or(0, |a| a.len());
    json!({"status": "ok", "totalResults": count, "articles": articles}).to_string()
}

fn article(title: &str, description: Option<&str>, url: &str) -> serde_json::Value {
    json!({
        "source": {"id": null, "name": "The Verge"},
        "title": title,
        "description": description,
        "url": url,
        "publishedAt": "2024-05-01T12:30:00Z"
    })
}

fn completion(content: &str) -> String {
    json!({
        "model": "grok-4-1-fast-reasoning",
        "choices": [{"message": {"role": "assistant", "content": content}}],
        "usage": {"prompt_tokens": 40, "completion_tokens": 20, "total_tokens": 60}
    })
    .to_string()
}

async fn mock_news(server: &mut ServerGuard, body: String) -> Mock {
    server
        .mock("GET", "/v2/top-headlines")
        .match_query(Matcher::Any)
        .match_header("x-api-key", "test-news_api_key")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(body)
        .create_async()
        .await
}

async fn mock_chat(server: &mut ServerGuard, marker: &str, content: &str) -> Mock {
    server
        .mock("POST", "/v1/chat/completions")
        .match_body(Matcher::Regex(marker.to_string()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(completion(content))
        .create_async()
        .await
}

async fn mock_image(server: &mut ServerGuard) -> Mock {
    server
        .mock("POST", "/v1/images/generations")
        .match_body(Matcher::PartialJson(json!({"n": 1, "response_format": "b64_json"})))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(json!({"data": [{"b64_json": PNG_B64}]}).to_string())
        .create_async()
        .await
}

async fn mock_upload(server: &mut ServerGuard) -> Mock {
    server
        .mock("POST", "/1.1/media/upload.json")
        .match_header("authorization", Matcher::Regex("^OAuth ".to_string()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"media_id": 1234, "media_id_string": "1234"}"#)
        .create_async()
        .await
}

async fn mock_post(server: &mut ServerGuard, expected_text: &str) -> Mock {
    server
        .mock("POST", "/2/tweets")
        .match_header("authorization", Matcher::Regex("^OAuth ".to_string()))
        .match_body(Matcher::PartialJson(json!({
            "text": expected_text,
            "media": {"media_ids": ["1234"]}
        })))
        .with_status(201)
        .with_header("content-type", "application/json")
        .with_body(r#"{"data": {"id": "987654321", "text": "posted"}}"#)
        .create_async()
        .await
}

#[tokio::test]
async fn test_full_run_publishes_post() {
    let mut server = mockito::Server::new_async().await;

    let news = mock_news(
        &mut server,
        headlines(json!([article(
            "Chipmaker unveils new wafer",
            Some("A new 2nm wafer process was announced today."),
            "https://example.com/wafer"
        )])),
    )
    .await;
    let prompt = mock_chat(&mut server, PROMPT_MARKER, "Image prompt: \"A gleaming silicon wafer under studio light\"").await;
    let image = mock_image(&mut server).await;
    let caption = mock_chat(&mut server, CAPTION_MARKER, "Chipmakers just hit 2nm. https://example.com/wafer").await;
    let upload = mock_upload(&mut server).await;
    let post = mock_post(&mut server, "Chipmakers just hit 2nm. https://example.com/wafer").await;

    let config = test_config(&server);
    let pipeline = Pipeline::from_config(&config, test_credentials()).unwrap();
    let result = pipeline.run().await.unwrap();

    assert_eq!(result.post_id, "987654321");
    assert_eq!(result.media_id, "1234");
    assert!(!result.post_id.is_empty());

    news.assert_async().await;
    prompt.assert_async().await;
    image.assert_async().await;
    caption.assert_async().await;
    upload.assert_async().await;
    post.assert_async().await;
}

#[tokio::test]
async fn test_empty_headlines_stop_before_generation() {
    let mut server = mockito::Server::new_async().await;

    let news = mock_news(&mut server, headlines(json!([]))).await;
    let chat = server
        .mock("POST", "/v1/chat/completions")
        .expect(0)
        .create_async()
        .await;

    let config = test_config(&server);
    let pipeline = Pipeline::from_config(&config, test_credentials()).unwrap();
    let err = pipeline.run().await.unwrap_err();

    assert!(matches!(err, PipelineError::NoArticlesFound { considered: 0 }));
    assert_eq!(err.exit_code(), 3);
    news.assert_async().await;
    chat.assert_async().await;
}

#[tokio::test]
async fn test_article_without_description_is_not_used() {
    let mut server = mockito::Server::new_async().await;

    let _news = mock_news(
        &mut server,
        headlines(json!([
            article("Headline only", None, "https://example.com/a"),
            article("Removed", Some("[Removed]"), "https://example.com/b"),
        ])),
    )
    .await;
    let chat = server
        .mock("POST", "/v1/chat/completions")
        .expect(0)
        .create_async()
        .await;
    let image = server
        .mock("POST", "/v1/images/generations")
        .expect(0)
        .create_async()
        .await;

    let config = test_config(&server);
    let pipeline = Pipeline::from_config(&config, test_credentials()).unwrap();
    let err = pipeline.run().await.unwrap_err();

    assert!(matches!(err, PipelineError::NoArticlesFound { considered: 2 }));
    chat.assert_async().await;
    image.assert_async().await;
}

#[tokio::test]
async fn test_news_provider_error_is_reported() {
    let mut server = mockito::Server::new_async().await;

    let _news = server
        .mock("GET", "/v2/top-headlines")
        .match_query(Matcher::Any)
        .with_status(401)
        .with_header("content-type", "application/json")
        .with_body(r#"{"status":"error","code":"apiKeyInvalid","message":"Your API key is invalid."}"#)
        .create_async()
        .await;

    let config = test_config(&server);
    let pipeline = Pipeline::from_config(&config, test_credentials()).unwrap();
    let err = pipeline.run().await.unwrap_err();

    assert!(matches!(err, PipelineError::NewsFetchFailed(_)));
    assert_eq!(err.upstream_status(), Some(401));
    assert!(err.to_string().contains("Your API key is invalid."));
}

#[tokio::test]
async fn test_prompt_failure_skips_image_generation() {
    let mut server = mockito::Server::new_async().await;

    let _news = mock_news(
        &mut server,
        headlines(json!([article("Title", Some("Description"), "https://example.com/a")])),
    )
    .await;
    let _chat = server
        .mock("POST", "/v1/chat/completions")
        .with_status(500)
        .with_header("content-type", "application/json")
        .with_body(r#"{"error": {"message": "internal error"}}"#)
        .create_async()
        .await;
    let image = server
        .mock("POST", "/v1/images/generations")
        .expect(0)
        .create_async()
        .await;

    let config = test_config(&server);
    let pipeline = Pipeline::from_config(&config, test_credentials()).unwrap();
    let err = pipeline.run().await.unwrap_err();

    match &err {
        PipelineError::GenerationFailed { stage, source } => {
            assert_eq!(*stage, Stage::Prompt);
            assert_eq!(source.status(), Some(500));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(err.exit_code(), 4);
    image.assert_async().await;
}

#[tokio::test]
async fn test_image_failure_skips_publishing() {
    let mut server = mockito::Server::new_async().await;

    let _news = mock_news(
        &mut server,
        headlines(json!([article("Title", Some("Description"), "https://example.com/a")])),
    )
    .await;
    let _prompt = mock_chat(&mut server, PROMPT_MARKER, "A city skyline at dusk").await;
    let _image = server
        .mock("POST", "/v1/images/generations")
        .with_status(400)
        .with_header("content-type", "application/json")
        .with_body(r#"{"error": "content policy violation"}"#)
        .create_async()
        .await;
    let upload = server
        .mock("POST", "/1.1/media/upload.json")
        .expect(0)
        .create_async()
        .await;

    let config = test_config(&server);
    let pipeline = Pipeline::from_config(&config, test_credentials()).unwrap();
    let err = pipeline.run().await.unwrap_err();

    assert!(matches!(err, PipelineError::ImageGenerationFailed(_)));
    assert_eq!(err.exit_code(), 5);
    assert!(err.to_string().contains("content policy violation"));
    upload.assert_async().await;
}

#[tokio::test]
async fn test_over_length_caption_is_fitted_before_posting() {
    let mut server = mockito::Server::new_async().await;

    let long_caption = format!(
        "{} https://example.com/a-very-long-article-path-that-would-otherwise-count-in-full",
        "Semiconductor stocks rallied again today as investors cheered. ".repeat(6).trim_end()
    );
    let expected = fit_to_limit(&long_caption, 280);
    assert!(newsframe::llm::composer::weighted_len(&expected) <= 280);

    let _news = mock_news(
        &mut server,
        headlines(json!([article("Title", Some("Description"), "https://example.com/a")])),
    )
    .await;
    let _prompt = mock_chat(&mut server, PROMPT_MARKER, "Trading floor, dramatic light").await;
    let _image = mock_image(&mut server).await;
    let _caption = mock_chat(&mut server, CAPTION_MARKER, &long_caption).await;
    let _upload = mock_upload(&mut server).await;
    let post = mock_post(&mut server, &expected).await;

    let config = test_config(&server);
    let pipeline = Pipeline::from_config(&config, test_credentials()).unwrap();
    pipeline.run().await.unwrap();

    post.assert_async().await;
}

#[tokio::test]
async fn test_duplicate_post_is_classified() {
    let mut server = mockito::Server::new_async().await;

    let _news = mock_news(
        &mut server,
        headlines(json!([article("Title", Some("Description"), "https://example.com/a")])),
    )
    .await;
    let _prompt = mock_chat(&mut server, PROMPT_MARKER, "Newsroom at night").await;
    let _image = mock_image(&mut server).await;
    let _caption = mock_chat(&mut server, CAPTION_MARKER, "Same caption as yesterday").await;
    let _upload = mock_upload(&mut server).await;
    let _post = server
        .mock("POST", "/2/tweets")
        .with_status(403)
        .with_header("content-type", "application/problem+json")
        .with_body(
            r#"{"detail":"You are not allowed to create a Tweet with duplicate content.","type":"about:blank","title":"Forbidden","status":403}"#,
        )
        .create_async()
        .await;

    let config = test_config(&server);
    let pipeline = Pipeline::from_config(&config, test_credentials()).unwrap();
    let err = pipeline.run().await.unwrap_err();

    match &err {
        PipelineError::PublishFailed { step, rejection, source } => {
            assert_eq!(*step, PublishStep::PostCreation);
            assert_eq!(*rejection, Rejection::DuplicateContent);
            assert_eq!(source.status(), Some(403));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(err.exit_code(), 6);
}

#[tokio::test]
async fn test_media_upload_failure_skips_post_creation() {
    let mut server = mockito::Server::new_async().await;

    let _news = mock_news(
        &mut server,
        headlines(json!([article("Title", Some("Description"), "https://example.com/a")])),
    )
    .await;
    let _prompt = mock_chat(&mut server, PROMPT_MARKER, "Newsroom at night").await;
    let _image = mock_image(&mut server).await;
    let _caption = mock_chat(&mut server, CAPTION_MARKER, "A caption").await;
    let _upload = server
        .mock("POST", "/1.1/media/upload.json")
        .with_status(401)
        .with_header("content-type", "application/json")
        .with_body(r#"{"errors":[{"code":32,"message":"Could not authenticate you."}]}"#)
        .create_async()
        .await;
    let post = server.mock("POST", "/2/tweets").expect(0).create_async().await;

    let config = test_config(&server);
    let pipeline = Pipeline::from_config(&config, test_credentials()).unwrap();
    let err = pipeline.run().await.unwrap_err();

    match &err {
        PipelineError::PublishFailed { step, rejection, .. } => {
            assert_eq!(*step, PublishStep::MediaUpload);
            assert_eq!(*rejection, Rejection::Unauthorized);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    post.assert_async().await;
}

#[tokio::test]
async fn test_recently_posted_article_is_skipped_and_recorded() {
    let mut server = mockito::Server::new_async().await;
    let dir = tempfile::tempdir().unwrap();
    let history_path = dir.path().join("history.json");

    let mut history = PostHistory::load(&history_path, 7, Utc::now()).await;
    history.record("https://example.com/already-posted", Utc::now());
    history.save().await.unwrap();

    let _news = mock_news(
        &mut server,
        headlines(json!([
            article("Old story", Some("Posted yesterday"), "https://example.com/already-posted"),
            article("Fresh story", Some("Brand new development"), "https://example.com/fresh"),
        ])),
    )
    .await;
    let _prompt = mock_chat(&mut server, "Brand new development", "Fresh scene").await;
    let _image = mock_image(&mut server).await;
    let _upload = mock_upload(&mut server).await;
    let _post = mock_post(&mut server, "Fresh scene").await;

    let mut config = test_config(&server);
    config.history.path = Some(history_path.clone());
    let pipeline = Pipeline::from_config(&config, test_credentials()).unwrap();
    pipeline.run().await.unwrap();

    let reloaded = PostHistory::load(&history_path, 7, Utc::now()).await;
    assert!(reloaded.contains("https://example.com/already-posted"));
    assert!(reloaded.contains("https://example.com/fresh"));
    assert_eq!(reloaded.len(), 2);
}

#[tokio::test]
async fn test_source_reply_failure_does_not_fail_run() {
    let mut server = mockito::Server::new_async().await;

    let _news = mock_news(
        &mut server,
        headlines(json!([article("Title", Some("Description"), "https://example.com/a")])),
    )
    .await;
    let _prompt = mock_chat(&mut server, PROMPT_MARKER, "Newsroom at night").await;
    let _image = mock_image(&mut server).await;
    let _caption = mock_chat(&mut server, CAPTION_MARKER, "A caption").await;
    let _upload = mock_upload(&mut server).await;
    let _post = mock_post(&mut server, "A caption").await;
    let reply = server
        .mock("POST", "/2/tweets")
        .match_body(Matcher::PartialJson(json!({
            "text": "[SOURCE]: Title https://example.com/a",
            "reply": {"in_reply_to_tweet_id": "987654321"}
        })))
        .with_status(429)
        .with_body(r#"{"title":"Too Many Requests","status":429}"#)
        .create_async()
        .await;

    let mut config = test_config(&server);
    config.publish.source_reply = true;
    let pipeline = Pipeline::from_config(&config, test_credentials()).unwrap();
    let result = pipeline.run().await.unwrap();

    assert_eq!(result.post_id, "987654321");
    reply.assert_async().await;
}

#[tokio::test]
async fn test_invalid_config_fails_before_network() {
    let server = mockito::Server::new_async().await;

    let mut config = test_config(&server);
    config.publish.posts_url = "not a url".to_string();

    let err = match Pipeline::from_config(&config, test_credentials()) {
        Ok(_) => panic!("config should be rejected"),
        Err(e) => e,
    };
    assert!(matches!(err, PipelineError::Configuration(_)));
    assert_eq!(err.exit_code(), 2);
}
