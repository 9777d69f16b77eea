// OAuth 1.0a HMAC-SHA1 request signing (user context)

use base64::Engine;
use common::TwitterCredentials;
use hmac::{Hmac, Mac};
use rand::distributions::Alphanumeric;
use rand::Rng;
use sha1::Sha1;

use crate::error::UpstreamError;

type HmacSha1 = Hmac<Sha1>;

/// Signs requests with the four-part user token set.
#[derive(Debug, Clone)]
pub struct OAuthSigner {
    credentials: TwitterCredentials,
}

impl OAuthSigner {
    pub fn new(credentials: TwitterCredentials) -> Self {
        Self { credentials }
    }

    /// `Authorization` header value for a request whose body is not form-encoded
    /// (JSON and multipart bodies are not part of the signature).
    pub fn authorization_header(&self, method: &str, url: &str) -> Result<String, UpstreamError> {
        let timestamp = chrono::Utc::now().timestamp().max(0) as u64;
        self.authorization_header_with(method, url, &[], &new_nonce(), timestamp)
    }

    /// Deterministic variant: form parameters, nonce and timestamp supplied by the caller.
    pub fn authorization_header_with(
        &self,
        method: &str,
        url: &str,
        form_params: &[(&str, &str)],
        nonce: &str,
        timestamp: u64,
    ) -> Result<String, UpstreamError> {
        let timestamp = timestamp.to_string();
        let mut oauth_params = vec![
            ("oauth_consumer_key", self.credentials.consumer_key.as_str()),
            ("oauth_nonce", nonce),
            ("oauth_signature_method", "HMAC-SHA1"),
            ("oauth_timestamp", timestamp.as_str()),
            ("oauth_token", self.credentials.access_token.as_str()),
            ("oauth_version", "1.0"),
        ];

        let base = signature_base_string(method, url, &oauth_params, form_params)?;
        let signature = self.sign(&base)?;
        oauth_params.push(("oauth_signature", signature.as_str()));
        oauth_params.sort();

        let fields = oauth_params
            .iter()
            .map(|(k, v)| format!("{}=\"{}\"", percent_encode(k), percent_encode(v)))
            .collect::<Vec<_>>()
            .join(", ");
        Ok(format!("OAuth {}", fields))
    }

    fn sign(&self, base: &str) -> Result<String, UpstreamError> {
        let key = format!(
            "{}&{}",
            percent_encode(&self.credentials.consumer_secret),
            percent_encode(&self.credentials.access_token_secret)
        );
        let mut mac = HmacSha1::new_from_slice(key.as_bytes())
            .map_err(|e| UpstreamError::Malformed(format!("HMAC error: {}", e)))?;
        mac.update(base.as_bytes());
        Ok(base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes()))
    }
}

/// `METHOD&base_url&params`, with query and form parameters folded into the sorted set.
pub fn signature_base_string(
    method: &str,
    url: &str,
    oauth_params: &[(&str, &str)],
    form_params: &[(&str, &str)],
) -> Result<String, UpstreamError> {
    let parsed = url::Url::parse(url)
        .map_err(|e| UpstreamError::Malformed(format!("cannot sign invalid URL '{}': {}", url, e)))?;
    let base_url = format!("{}{}", parsed.origin().ascii_serialization(), parsed.path());

    let mut params: Vec<(String, String)> = parsed
        .query_pairs()
        .map(|(k, v)| (percent_encode(&k), percent_encode(&v)))
        .chain(
            oauth_params
                .iter()
                .chain(form_params)
                .map(|(k, v)| (percent_encode(k), percent_encode(v))),
        )
        .collect();
    params.sort();

    let param_string = params
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&");

    Ok(format!(
        "{}&{}&{}",
        method.to_uppercase(),
        percent_encode(&base_url),
        percent_encode(&param_string)
    ))
}

/// RFC 3986 encoding: everything but ALPHA / DIGIT / "-" / "." / "_" / "~".
pub fn percent_encode(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}

fn new_nonce() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}
