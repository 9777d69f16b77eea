use crate::error::UpstreamError;

/// Core trait for chat-completion providers
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    /// Generate a completion for a given prompt
    async fn generate(&self, request: LlmRequest) -> Result<LlmResponse, UpstreamError>;
}

/// Request structure for LLM generation
#[derive(Debug, Clone, Default)]
pub struct LlmRequest {
    /// Optional system instruction sent ahead of the prompt
    pub system: Option<String>,
    pub prompt: String,
    pub max_tokens: Option<usize>,
    pub temperature: Option<f32>,
    pub timeout_seconds: Option<u64>,
}

/// Response from LLM generation
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content: String,
    pub usage: UsageMetadata,
    pub model: String,
}

/// Token usage metadata
#[derive(Debug, Clone, Default)]
pub struct UsageMetadata {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

pub mod composer;
pub mod remote;

const LABELS: [&str; 6] = ["image prompt:", "prompt:", "caption:", "tweet:", "post:", "output:"];

/// Remove the wrapping a chat model tends to put around its answer: reasoning blocks,
/// markdown fences, a leading label and surrounding quotes.
pub fn clean_completion(text: &str) -> String {
    let text = strip_reasoning(text);
    let text = strip_code_fence(&text);
    let mut text = text.trim();

    let labelled = LABELS
        .iter()
        .find(|l| text.get(..l.len()).map_or(false, |head| head.eq_ignore_ascii_case(l)));
    if let Some(label) = labelled {
        text = text[label.len()..].trim_start();
    }

    strip_quotes(text).trim().to_string()
}

/// Drop `<think>...</think>` blocks. A dangling closing tag means everything before it
/// was reasoning.
fn strip_reasoning(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find("<think>") {
        out.push_str(&rest[..start]);
        match rest[start..].find("</think>") {
            Some(end) => rest = &rest[start + end + "</think>".len()..],
            None => {
                rest = "";
                break;
            }
        }
    }
    out.push_str(rest);

    match out.rfind("</think>") {
        Some(end) => out[end + "</think>".len()..].to_string(),
        None => out,
    }
}

/// Keep only the body of the first fenced block, if there is one.
fn strip_code_fence(text: &str) -> String {
    if let Some(start) = text.find("```") {
        let rest = &text[start + 3..];
        // the remainder of the opening line is a language tag
        let body_start = rest.find('\n').map(|i| i + 1).unwrap_or(rest.len());
        let body = &rest[body_start..];
        if let Some(end) = body.find("```") {
            return body[..end].to_string();
        }
    }
    text.to_string()
}

fn strip_quotes(text: &str) -> &str {
    const PAIRS: [(char, char); 4] = [('"', '"'), ('\'', '\''), ('“', '”'), ('«', '»')];
    for (open, close) in PAIRS {
        if text.chars().count() >= 2 && text.starts_with(open) && text.ends_with(close) {
            return &text[open.len_utf8()..text.len() - close.len_utf8()];
        }
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_reasoning_block() {
        let text = "<think>The user wants a prompt about chips.</think>\nA macro shot of a silicon wafer";
        assert_eq!(clean_completion(text), "A macro shot of a silicon wafer");
    }

    #[test]
    fn dangling_close_tag_drops_preceding_reasoning() {
        let text = "considering options...</think>Final answer here";
        assert_eq!(clean_completion(text), "Final answer here");
    }

    #[test]
    fn strips_fence_label_and_quotes() {
        let text = "```text\nPrompt: \"A glowing server rack at dusk\"\n```";
        assert_eq!(clean_completion(text), "A glowing server rack at dusk");
    }

    #[test]
    fn leaves_plain_text_alone() {
        assert_eq!(clean_completion("  Apple shipped a new chip.  "), "Apple shipped a new chip.");
    }

    #[test]
    fn strips_typographic_quotes() {
        assert_eq!(clean_completion("Tweet: “Robots took over the fab.”"), "Robots took over the fab.");
    }

    #[test]
    fn single_quote_char_is_not_stripped() {
        assert_eq!(clean_completion("\""), "\"");
    }
}
