// src/oracle/openai.rs
//! Vision chat-completion comparer. The model is asked for raw JSON
//! `{"similarity": <0..1>}` describing how alike the two faces are.

use std::time::Duration;

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{ImageComparer, OracleError};

const SYSTEM_PROMPT: &str = "You are an assistant that compares two face photos. \
Respond only with raw JSON of the form { \"similarity\": <number between 0 and 1> } \
without any markdown or code fences.";

static RE_FENCE_OPEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^```(?:json)?\s*").unwrap());
static RE_FENCE_CLOSE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s*```$").unwrap());

#[derive(Debug, Clone)]
pub struct OpenAiComparer {
    http: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiComparer {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self, OracleError> {
        let http = Client::builder()
            .user_agent("spamwatch/0.1")
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
        })
    }

    fn data_url(bytes: &[u8]) -> String {
        format!("data:image/{};base64,{}", detect_format(bytes), STANDARD.encode(bytes))
    }
}

#[async_trait]
impl ImageComparer for OpenAiComparer {
    async fn similarity(&self, a: &[u8], b: &[u8]) -> Result<f64, OracleError> {
        let request = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                {
                    "role": "user",
                    "content": [
                        { "type": "text", "text": "Image A and Image B:" },
                        { "type": "image_url", "image_url": { "url": Self::data_url(a), "detail": "low" } },
                        { "type": "image_url", "image_url": { "url": Self::data_url(b), "detail": "low" } },
                    ],
                },
            ],
        });

        let resp = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_failure(status, body));
        }

        let completion: ChatCompletion = resp.json().await?;
        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| OracleError::Malformed("no content in completion".into()))?;

        debug!(model = %self.model, answer = %content, "similarity answer");
        parse_similarity(&content)
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}

fn classify_failure(status: StatusCode, body: String) -> OracleError {
    if body.contains("insufficient_quota") {
        return OracleError::QuotaExceeded;
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
        return OracleError::RateLimited;
    }
    OracleError::Api {
        status: status.as_u16(),
        body,
    }
}

/// Parses `{"similarity": x}`, tolerating markdown fences around it.
pub fn parse_similarity(content: &str) -> Result<f64, OracleError> {
    let raw = content.trim();
    let raw = RE_FENCE_OPEN.replace(raw, "");
    let raw = RE_FENCE_CLOSE.replace(&raw, "");

    let answer: SimilarityAnswer =
        serde_json::from_str(&raw).map_err(|e| OracleError::Malformed(format!("{e}: {raw}")))?;
    Ok(answer.similarity.unwrap_or(0.0))
}

fn detect_format(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(&[0x89, 0x50, 0x4E, 0x47]) {
        "png"
    } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        "gif"
    } else if bytes.len() > 12 && bytes.starts_with(b"RIFF") && &bytes[8..12] == b"WEBP" {
        "webp"
    } else {
        "jpeg"
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SimilarityAnswer {
    similarity: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn parses_plain_and_fenced_answers() {
        assert_eq!(parse_similarity(r#"{"similarity": 0.91}"#).unwrap(), 0.91);
        assert_eq!(
            parse_similarity("```json\n{\"similarity\": 0.5}\n```").unwrap(),
            0.5
        );
        assert_eq!(parse_similarity("```\n{\"similarity\":1}```").unwrap(), 1.0);
        assert_eq!(parse_similarity(r#"{"other": 3}"#).unwrap(), 0.0);
        assert!(matches!(
            parse_similarity("they look alike"),
            Err(OracleError::Malformed(_))
        ));
    }

    #[test]
    fn failures_are_classified() {
        assert!(matches!(
            classify_failure(StatusCode::TOO_MANY_REQUESTS, "slow down".into()),
            OracleError::RateLimited
        ));
        assert!(matches!(
            classify_failure(
                StatusCode::TOO_MANY_REQUESTS,
                r#"{"error":{"type":"insufficient_quota"}}"#.into()
            ),
            OracleError::QuotaExceeded
        ));
        assert!(matches!(
            classify_failure(StatusCode::BAD_GATEWAY, String::new()),
            OracleError::Api { status: 502, .. }
        ));
    }

    #[test]
    fn data_url_carries_detected_format() {
        assert!(OpenAiComparer::data_url(&[0x89, 0x50, 0x4E, 0x47, 0, 0]).starts_with("data:image/png;base64,"));
        assert!(OpenAiComparer::data_url(&[0xFF, 0xD8, 0xFF]).starts_with("data:image/jpeg;base64,"));
    }

    #[tokio::test]
    async fn completion_round_trip_against_local_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 64 * 1024];
            let mut seen = Vec::new();
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                seen.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&seen).to_string();
                let Some(end) = text.find("\r\n\r\n") else { continue };
                let len = text[..end]
                    .lines()
                    .filter_map(|l| l.split_once(':'))
                    .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
                    .and_then(|(_, v)| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if seen.len() >= end + 4 + len {
                    break;
                }
            }
            let body = r#"{"choices":[{"message":{"role":"assistant","content":"{\"similarity\": 0.84}"}}]}"#;
            let resp = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            socket.write_all(resp.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&seen).to_string()
        });

        let cmp = OpenAiComparer::new(format!("http://{}/v1/", addr), "sk-test", "gpt-4o-mini").unwrap();
        let score = cmp.similarity(&[0xFF, 0xD8, 0xFF], &[0xFF, 0xD8, 0xFF]).await.unwrap();
        assert_eq!(score, 0.84);

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /v1/chat/completions"));
        assert!(request.to_ascii_lowercase().contains("authorization: bearer sk-test"));
    }
}
