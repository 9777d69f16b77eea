// Turns an article into the two pieces of generated text a run needs.
use common::{CaptionConfig, PromptConfig};
use tracing::{info, warn};

use super::{clean_completion, LlmProvider, LlmRequest};
use crate::error::{PipelineError, Stage, UpstreamError};
use crate::models::{Article, Caption, ImagePrompt};

/// Weight the platform gives any URL, whatever its real length
pub const URL_WEIGHT: usize = 23;

const ELLIPSIS: char = '…';

/// Asks the chat model for an image-generation prompt describing the article.
#[derive(Debug, Clone)]
pub struct PromptComposer {
    system: String,
    target_chars: usize,
    max_chars: usize,
}

impl PromptComposer {
    pub fn new(config: &PromptConfig) -> Self {
        Self {
            system: config.system.clone(),
            target_chars: config.target_chars,
            max_chars: config.max_chars,
        }
    }

    pub fn request(&self, article: &Article) -> LlmRequest {
        let prompt = format!(
            "Headline: '{}'\nNews: '{}'\n\nGenerate hyperrealistic image prompt. Requirements: photographic quality, \
             sharp focus, professional lighting, sharp details. Max {} chars. Output prompt only.",
            article.title, article.description, self.target_chars
        );

        LlmRequest {
            system: Some(self.system.clone()),
            prompt,
            ..LlmRequest::default()
        }
    }

    pub async fn compose<P: LlmProvider + ?Sized>(
        &self,
        provider: &P,
        article: &Article,
    ) -> Result<ImagePrompt, PipelineError> {
        let response = provider
            .generate(self.request(article))
            .await
            .map_err(|source| PipelineError::GenerationFailed {
                stage: Stage::Prompt,
                source,
            })?;

        let text = collapse_whitespace(&clean_completion(&response.content));
        if text.is_empty() {
            return Err(PipelineError::GenerationFailed {
                stage: Stage::Prompt,
                source: UpstreamError::Empty,
            });
        }

        let length = text.chars().count();
        let text = if length > self.max_chars {
            warn!(length, limit = self.max_chars, "prompt: completion over limit, truncating");
            truncate_at_word(&text, self.max_chars)
        } else {
            text
        };

        info!(
            model = %response.model,
            tokens = response.usage.total_tokens,
            prompt = %text,
            "prompt: image prompt composed"
        );
        Ok(ImagePrompt::new(text))
    }
}

/// Asks the chat model for a short caption and fits it to the platform limit.
#[derive(Debug, Clone)]
pub struct CaptionComposer {
    system: String,
    target_chars: usize,
    max_chars: usize,
}

impl CaptionComposer {
    pub fn new(config: &CaptionConfig) -> Self {
        Self {
            system: config.system.clone(),
            target_chars: config.target_chars,
            max_chars: config.max_chars,
        }
    }

    pub fn request(&self, article: &Article) -> LlmRequest {
        let prompt = match &article.url {
            Some(url) => format!(
                "News: '{}'\nURL: {}\n\nSummarize as tweet. Include URL when valuable (deals, guides, breaking news, \
                 resources). Style: casual journalistic. Tense: past/summary. No CTAs. Max {} chars including URL.",
                article.description, url, self.target_chars
            ),
            None => format!(
                "News: '{}'\n\nSummarize as tweet. Style: casual journalistic. Tense: past/summary. No CTAs. \
                 Max {} chars.",
                article.description, self.target_chars
            ),
        };

        LlmRequest {
            system: Some(self.system.clone()),
            prompt,
            ..LlmRequest::default()
        }
    }

    pub async fn compose<P: LlmProvider + ?Sized>(
        &self,
        provider: &P,
        article: &Article,
    ) -> Result<Caption, PipelineError> {
        let response = provider
            .generate(self.request(article))
            .await
            .map_err(|source| PipelineError::GenerationFailed {
                stage: Stage::Caption,
                source,
            })?;

        let text = tidy_lines(&clean_completion(&response.content));
        if text.is_empty() {
            return Err(PipelineError::GenerationFailed {
                stage: Stage::Caption,
                source: UpstreamError::Empty,
            });
        }

        let length = weighted_len(&text);
        let text = if length > self.max_chars {
            warn!(length, limit = self.max_chars, "caption: over platform limit, truncating");
            fit_to_limit(&text, self.max_chars)
        } else {
            text
        };

        info!(
            model = %response.model,
            tokens = response.usage.total_tokens,
            caption = %text,
            "caption: composed"
        );
        Ok(Caption::new(text))
    }
}

fn is_url(token: &str) -> bool {
    token.starts_with("http://") || token.starts_with("https://") || is_bare_domain(token)
}

/// `example.com` or `example.com/path`: the platform links these too. Loose on
/// purpose, a false positive only makes the caption shorter.
fn is_bare_domain(token: &str) -> bool {
    let token = token.trim_end_matches(|c: char| matches!(c, '.' | ',' | ';' | ':' | '!' | '?' | ')' | '"'));
    let host = token.split('/').next().unwrap_or(token);
    let Some((name, tld)) = host.rsplit_once('.') else {
        return false;
    };

    (2..=24).contains(&tld.len())
        && tld.chars().all(|c| c.is_ascii_alphabetic())
        && name
            .split('.')
            .all(|label| !label.is_empty() && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-'))
}

/// Per-character weight: Latin, common punctuation and the general
/// punctuation block count once, everything else (CJK, emoji) twice.
fn char_weight(c: char) -> usize {
    match c as u32 {
        0..=0x10FF | 0x2000..=0x200D | 0x2010..=0x201F | 0x2032..=0x2037 => 1,
        _ => 2,
    }
}

fn token_len(token: &str) -> usize {
    if is_url(token) {
        URL_WEIGHT
    } else {
        token.chars().map(char_weight).sum()
    }
}

/// Length as the platform counts it: every link weighs `URL_WEIGHT`, wide
/// characters weigh two.
pub fn weighted_len(text: &str) -> usize {
    let raw: usize = text.chars().map(char_weight).sum();
    text.split_whitespace()
        .filter(|t| is_url(t))
        .fold(raw, |len, url| len - url.chars().map(char_weight).sum::<usize>() + URL_WEIGHT)
}

/// Shorten `text` to at most `limit` weighted characters, cutting between words and
/// ending with an ellipsis unless the last kept word is a link. Links are kept whole
/// or dropped; line breaks between kept words survive.
pub fn fit_to_limit(text: &str, limit: usize) -> String {
    if weighted_len(text) <= limit {
        return text.to_string();
    }

    let ellipsis = char_weight(ELLIPSIS);
    let mut out = String::new();
    let mut used = 0;
    let mut breaks = String::new();

    'lines: for (i, line) in text.split('\n').enumerate() {
        if i > 0 {
            breaks.push('\n');
        }
        for word in line.split_whitespace() {
            let separator = match (out.is_empty(), breaks.is_empty()) {
                (true, _) => "",
                (false, true) => " ",
                (false, false) => breaks.as_str(),
            };
            let cost = token_len(word) + separator.len();
            // a kept plain word must leave room for the ellipsis
            let reserve = if is_url(word) { 0 } else { ellipsis };
            if used + cost + reserve > limit {
                if is_url(word) {
                    continue;
                }
                break 'lines;
            }
            out.push_str(separator);
            out.push_str(word);
            used += cost;
            breaks.clear();
        }
    }

    if out.is_empty() {
        // not even one word fits: cut the first plain word
        if let Some(word) = text.split_whitespace().find(|w| !is_url(w)) {
            for c in word.chars() {
                if used + char_weight(c) + ellipsis > limit {
                    break;
                }
                out.push(c);
                used += char_weight(c);
            }
        }
        out.push(ELLIPSIS);
        return out;
    }
    // an ellipsis glued to a trailing link would break it
    if !out.split_whitespace().last().map_or(false, is_url) {
        out.push(ELLIPSIS);
    }
    out
}

/// Plain character cut at a word boundary, no suffix.
pub fn truncate_at_word(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }

    let mut out = String::new();
    for word in text.split_whitespace() {
        let needed = word.chars().count() + usize::from(!out.is_empty());
        if out.chars().count() + needed > limit {
            break;
        }
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(word);
    }

    if out.is_empty() {
        text.chars().take(limit).collect()
    } else {
        out
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Trim every line and squeeze runs of blank lines.
fn tidy_lines(text: &str) -> String {
    let mut lines: Vec<&str> = Vec::new();
    for line in text.lines().map(str::trim) {
        if line.is_empty() && lines.last().map_or(true, |l| l.is_empty()) {
            continue;
        }
        lines.push(line);
    }
    while lines.last().map_or(false, |l| l.is_empty()) {
        lines.pop();
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmResponse, UsageMetadata};
    use std::sync::Mutex;

    /// Replays a fixed answer and remembers the requests it saw.
    struct ScriptedProvider {
        answer: Result<String, u16>,
        seen: Mutex<Vec<LlmRequest>>,
    }

    impl ScriptedProvider {
        fn answering(text: &str) -> Self {
            Self {
                answer: Ok(text.to_string()),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn failing(status: u16) -> Self {
            Self {
                answer: Err(status),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl LlmProvider for ScriptedProvider {
        async fn generate(&self, request: LlmRequest) -> Result<LlmResponse, UpstreamError> {
            self.seen.lock().unwrap().push(request);
            match &self.answer {
                Ok(text) => Ok(LlmResponse {
                    content: text.clone(),
                    usage: UsageMetadata::default(),
                    model: "scripted".to_string(),
                }),
                Err(status) => Err(UpstreamError::Status {
                    status: *status,
                    message: "scripted failure".to_string(),
                }),
            }
        }
    }

    fn article() -> Article {
        Article {
            title: "Chipmaker unveils 2nm process".to_string(),
            description: "The company says volume production starts next year.".to_string(),
            source: Some("Example Wire".to_string()),
            url: Some("https://news.example.com/chips/2nm-process-announcement".to_string()),
            published_at: None,
        }
    }

    #[test]
    fn weighted_len_counts_urls_as_fixed_weight() {
        let text = "Read this https://example.com/a/very/long/path/that/keeps/going/on/and/on";
        assert_eq!(weighted_len(text), "Read this ".chars().count() + URL_WEIGHT);
        assert_eq!(weighted_len("héllo"), 5);
    }

    #[test]
    fn fit_to_limit_keeps_short_text() {
        assert_eq!(fit_to_limit("short caption", 280), "short caption");
    }

    #[test]
    fn fit_to_limit_cuts_between_words() {
        let text = "one two three four five";
        let fitted = fit_to_limit(text, 12);
        assert_eq!(fitted, "one two…");
        assert!(weighted_len(&fitted) <= 12);
    }

    #[test]
    fn fit_to_limit_never_splits_a_url() {
        let text = "Breaking news about chips https://example.com/story more words after the link";
        let fitted = fit_to_limit(text, 30);
        assert_eq!(fitted, "Breaking news about chips…");
        assert!(weighted_len(&fitted) <= 30);

        let fitted = fit_to_limit(text, 50);
        assert_eq!(fitted, "Breaking news about chips https://example.com/story");
        assert!(weighted_len(&fitted) <= 50);
    }

    #[test]
    fn fit_to_limit_hard_cuts_a_single_long_word() {
        let fitted = fit_to_limit(&"x".repeat(40), 10);
        assert_eq!(fitted, format!("{}…", "x".repeat(8)));
        assert_eq!(weighted_len(&fitted), 10);
    }

    #[test]
    fn fit_to_limit_drops_a_link_that_cannot_fit() {
        let fitted = fit_to_limit("http://a.b next words here and more", 15);
        assert_eq!(fitted, "next words…");
        assert!(weighted_len(&fitted) <= 15);

        let fitted = fit_to_limit("https://example.com/only-a-link", 10);
        assert_eq!(fitted, "…");
        assert!(weighted_len(&fitted) <= 10);
    }

    #[test]
    fn fit_to_limit_keeps_line_breaks() {
        let text = format!("First paragraph here.\n\nSecond {}", "word ".repeat(80));
        let fitted = fit_to_limit(&text, 60);
        assert!(fitted.starts_with("First paragraph here.\n\nSecond word"));
        assert!(fitted.ends_with('…'));
        assert!(weighted_len(&fitted) <= 60);
    }

    #[test]
    fn weighted_len_follows_platform_weights() {
        // CJK and emoji count double
        assert_eq!(weighted_len("日本語"), 6);
        assert_eq!(weighted_len("ok 🚀"), 5);
        // bare domains are linked like full URLs
        assert_eq!(weighted_len("see example.com/some/long/path/to/an/article"), 4 + URL_WEIGHT);
        assert_eq!(weighted_len("e.g. U.S. 3.5"), 13);
    }

    #[test]
    fn fit_to_limit_counts_wide_characters_twice() {
        let text = "日本語のニュース ".repeat(30);
        let fitted = fit_to_limit(&text, 40);
        assert!(weighted_len(&fitted) <= 40);
        assert!(fitted.ends_with('…'));
    }

    #[test]
    fn truncate_at_word_respects_limit() {
        assert_eq!(truncate_at_word("alpha beta gamma", 11), "alpha beta");
        assert_eq!(truncate_at_word("alphabet", 5), "alpha");
        assert_eq!(truncate_at_word("fits", 10), "fits");
    }

    #[test]
    fn tidy_lines_squeezes_blank_runs() {
        assert_eq!(tidy_lines("  first  \n\n\n second \n\n"), "first\n\nsecond");
    }

    #[tokio::test]
    async fn prompt_is_cleaned_and_capped() {
        let provider = ScriptedProvider::answering("<think>hmm</think>\nPrompt: \"A   wafer\n under blue light\"");
        let composer = PromptComposer::new(&PromptConfig::default());

        let prompt = composer.compose(&provider, &article()).await.expect("prompt");
        assert_eq!(prompt.as_str(), "A wafer under blue light");

        let seen = provider.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].prompt.contains("Chipmaker unveils 2nm process"));
        assert!(seen[0].prompt.contains("Max 160 chars"));
        assert_eq!(seen[0].system.as_deref(), Some(PromptConfig::default().system.as_str()));
    }

    #[tokio::test]
    async fn long_prompt_is_truncated_to_hard_limit() {
        let provider = ScriptedProvider::answering(&"word ".repeat(300));
        let config = PromptConfig {
            max_chars: 50,
            ..PromptConfig::default()
        };

        let prompt = PromptComposer::new(&config).compose(&provider, &article()).await.expect("prompt");
        assert!(prompt.as_str().chars().count() <= 50);
        assert!(prompt.as_str().starts_with("word word"));
    }

    #[tokio::test]
    async fn empty_completion_is_generation_failure() {
        let provider = ScriptedProvider::answering("<think>only reasoning</think>   ");
        let err = PromptComposer::new(&PromptConfig::default())
            .compose(&provider, &article())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PipelineError::GenerationFailed {
                stage: Stage::Prompt,
                source: UpstreamError::Empty
            }
        ));
    }

    #[tokio::test]
    async fn upstream_error_names_caption_stage() {
        let provider = ScriptedProvider::failing(500);
        let err = CaptionComposer::new(&CaptionConfig::default())
            .compose(&provider, &article())
            .await
            .unwrap_err();

        assert_eq!(err.stage(), "caption");
        assert_eq!(err.upstream_status(), Some(500));
    }

    #[tokio::test]
    async fn over_length_caption_is_fitted_before_publish() {
        let long = format!("{} https://news.example.com/x", "Chip news keeps coming. ".repeat(20));
        let provider = ScriptedProvider::answering(&long);
        let composer = CaptionComposer::new(&CaptionConfig::default());

        let caption = composer.compose(&provider, &article()).await.expect("caption");
        assert!(weighted_len(caption.as_str()) <= 280);
        assert!(caption.as_str().ends_with('…'));
    }

    #[tokio::test]
    async fn caption_request_mentions_url_only_when_known() {
        let composer = CaptionComposer::new(&CaptionConfig::default());
        let with_url = composer.request(&article());
        assert!(with_url.prompt.contains("URL: https://news.example.com/chips/2nm-process-announcement"));

        let mut no_url = article();
        no_url.url = None;
        assert!(!composer.request(&no_url).prompt.contains("URL"));
    }
}
