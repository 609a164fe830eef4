//! Gemini REST implementation of [`Generator`].
//!
//! Unary calls go to `models/{model}:generateContent`; streams go to
//! `models/{model}:streamGenerateContent?alt=sse` and are decoded from
//! server-sent events line by line. The API key is read per request from the
//! environment variable named in `[generator].api_key_env`; a missing key
//! only fails the calls that need it.
//!
//! Request start-up retries 429/5xx/network failures with exponential
//! backoff (1s, 2s, 4s, …). A stream that fails midway is not retried.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use futures::stream::{self, BoxStream, StreamExt};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::time::Duration;

use super::{prompts, Generator, StreamChunk, TextStream};
use crate::config::GeneratorConfig;
use crate::error::GenerateError;
use crate::models::{Attachment, GroundingConfig, Message, Role, SearchResult};
use crate::router::Intent;

const SAFETY_FINISH_REASONS: &[&str] = &[
    "SAFETY",
    "PROHIBITED_CONTENT",
    "BLOCKLIST",
    "SPII",
    "IMAGE_SAFETY",
];

pub struct GeminiGenerator {
    client: reqwest::Client,
    base_url: String,
    api_key_env: String,
    utility_model: String,
    max_retries: u32,
    request_timeout: Duration,
}

impl GeminiGenerator {
    pub fn new(config: &GeneratorConfig) -> anyhow::Result<Self> {
        // No overall timeout on the client: it would cut long streams short.
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key_env: config.api_key_env.clone(),
            utility_model: config.utility_model.clone(),
            max_retries: config.max_retries,
            request_timeout: Duration::from_secs(config.timeout_secs),
        })
    }

    /// Read on every request so a key exported after start-up is picked up.
    fn api_key(&self) -> Result<String, GenerateError> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                GenerateError::Other(format!(
                    "{} environment variable not set",
                    self.api_key_env
                ))
            })
    }

    async fn post_with_retry(
        &self,
        url: &str,
        body: &Value,
        timeout: Option<Duration>,
    ) -> Result<reqwest::Response, GenerateError> {
        let api_key = self.api_key()?;
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let mut request = self
                .client
                .post(url)
                .header("x-goog-api-key", api_key.as_str())
                .json(body);
            if let Some(timeout) = timeout {
                request = request.timeout(timeout);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    let err = map_http_error(status.as_u16(), &body_text);
                    if err.is_retryable() {
                        tracing::debug!(attempt, status = status.as_u16(), "retrying generator request");
                        last_err = Some(err);
                        continue;
                    }
                    return Err(err);
                }
                Err(e) => {
                    last_err = Some(GenerateError::from(e));
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| GenerateError::Other("request failed after retries".into())))
    }

    async fn generate_text(&self, model: &str, body: Value) -> Result<String, GenerateError> {
        let url = format!("{}/models/{}:generateContent", self.base_url, model);
        let response = self
            .post_with_retry(&url, &body, Some(self.request_timeout))
            .await?;
        let json: Value = response
            .json()
            .await
            .map_err(|e| GenerateError::Decode(e.to_string()))?;

        let chunk = decode_response(&json)?.unwrap_or_default();
        if chunk.text.trim().is_empty() {
            return Err(GenerateError::Decode("model returned no text".into()));
        }
        Ok(chunk.text)
    }

    async fn stream(&self, model: &str, body: Value) -> Result<TextStream, GenerateError> {
        let url = format!(
            "{}/models/{}:streamGenerateContent?alt=sse",
            self.base_url, model
        );
        let response = self.post_with_retry(&url, &body, None).await?;
        let bytes = response
            .bytes_stream()
            .map(|chunk| chunk.map(|b| b.to_vec()))
            .boxed();
        Ok(sse_stream(bytes))
    }
}

#[async_trait]
impl Generator for GeminiGenerator {
    async fn classify(&self, text: &str) -> Result<Intent, GenerateError> {
        let body = json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompts::classify(text) }] }],
            "generationConfig": { "temperature": 0.0 }
        });
        let label = self.generate_text(&self.utility_model, body).await?;
        Ok(Intent::from_label(&label))
    }

    async fn rewrite(&self, text: &str) -> Result<String, GenerateError> {
        let body = json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompts::rewrite(text) }] }],
            "generationConfig": { "temperature": 0.0 }
        });
        let keywords = self.generate_text(&self.utility_model, body).await?;
        let keywords = keywords.trim().trim_matches('"').trim().to_string();
        if keywords.is_empty() {
            return Err(GenerateError::Decode("empty rewrite".into()));
        }
        Ok(keywords)
    }

    async fn stream_chit_chat(
        &self,
        model: &str,
        history: &[Message],
    ) -> Result<TextStream, GenerateError> {
        let body = json!({ "contents": history_contents(history) });
        self.stream(model, body).await
    }

    async fn stream_grounded(
        &self,
        model: &str,
        history: &[Message],
        context: &[SearchResult],
        grounding: &GroundingConfig,
    ) -> Result<TextStream, GenerateError> {
        let body = if context.is_empty() {
            let mut body = json!({
                "systemInstruction": { "parts": [{ "text": prompts::EXTERNAL_SEARCH_SYSTEM }] },
                "contents": history_contents(history),
            });
            // The API rejects an empty tool list.
            let tools = search_tools(grounding);
            if !tools.is_empty() {
                body["tools"] = Value::Array(tools);
            }
            body
        } else {
            let question = last_user_text(history);
            json!({
                "systemInstruction": { "parts": [{ "text": prompts::GROUNDED_SYSTEM }] },
                "contents": with_final_turn(history, prompts::grounded_question(question, context)),
            })
        };
        self.stream(model, body).await
    }

    async fn stream_code_edit(
        &self,
        model: &str,
        history: &[Message],
        context: &[SearchResult],
    ) -> Result<TextStream, GenerateError> {
        let request = last_user_text(history);
        let body = json!({
            "systemInstruction": { "parts": [{ "text": prompts::CODE_EDIT_SYSTEM }] },
            "contents": with_final_turn(history, prompts::code_edit_request(request, context)),
            "generationConfig": {
                "responseMimeType": "application/json",
                "responseSchema": prompts::code_edit_schema(),
            },
        });
        self.stream(model, body).await
    }
}

// ============ Request building ============

fn role_name(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Model => "model",
    }
}

fn attachment_part(attachment: &Attachment) -> Value {
    if attachment.is_text() {
        let decoded = BASE64_STANDARD
            .decode(&attachment.data)
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok());
        if let Some(text) = decoded {
            return json!({ "text": format!("Attached file {}:\n{}", attachment.name, text) });
        }
    }
    json!({ "inlineData": { "mimeType": attachment.mime_type, "data": attachment.data } })
}

fn history_contents(history: &[Message]) -> Vec<Value> {
    history
        .iter()
        .filter(|m| !m.content.trim().is_empty() || m.attachment.is_some())
        .map(|m| {
            let mut parts = Vec::new();
            if !m.content.trim().is_empty() {
                parts.push(json!({ "text": m.content }));
            }
            if let Some(attachment) = &m.attachment {
                parts.push(attachment_part(attachment));
            }
            json!({ "role": role_name(m.role), "parts": parts })
        })
        .collect()
}

fn last_user_text(history: &[Message]) -> &str {
    match history.last() {
        Some(m) if m.role == Role::User => m.content.as_str(),
        _ => "",
    }
}

/// History with the trailing user message replaced by `text`.
///
/// The user's attachment, if any, stays on the replaced turn.
fn with_final_turn(history: &[Message], text: String) -> Vec<Value> {
    let (last_user, earlier) = match history.split_last() {
        Some((last, rest)) if last.role == Role::User => (Some(last), rest),
        _ => (None, history),
    };

    let mut contents = history_contents(earlier);
    let mut parts = vec![json!({ "text": text })];
    if let Some(attachment) = last_user.and_then(|m| m.attachment.as_ref()) {
        parts.push(attachment_part(attachment));
    }
    contents.push(json!({ "role": "user", "parts": parts }));
    contents
}

fn search_tools(grounding: &GroundingConfig) -> Vec<Value> {
    let mut tools = Vec::new();
    if grounding.use_web_search {
        tools.push(json!({ "googleSearch": {} }));
    }
    if grounding.use_maps_search {
        tools.push(json!({ "googleMaps": {} }));
    }
    tools
}

// ============ Response decoding ============

fn map_http_error(status: u16, body: &str) -> GenerateError {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("error").map(error_message))
        .unwrap_or_else(|| body.to_string());

    if status == 400 && message.to_lowercase().contains("safety") {
        return GenerateError::Safety { reason: message };
    }

    GenerateError::Http { status, message }
}

fn error_message(error: &Value) -> String {
    let msg = error
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("unknown error");
    match error.get("status").and_then(Value::as_str) {
        Some(status) if !status.is_empty() => format!("{}: {}", status, msg),
        _ => msg.to_string(),
    }
}

/// Decode one `GenerateContentResponse` object.
///
/// Returns `Ok(None)` for frames that carry neither text nor grounding data.
fn decode_response(json: &Value) -> Result<Option<StreamChunk>, GenerateError> {
    if let Some(error) = json.get("error") {
        let status = error.get("code").and_then(Value::as_u64).unwrap_or(500) as u16;
        return Err(GenerateError::Http {
            status,
            message: error_message(error),
        });
    }

    if let Some(reason) = json
        .pointer("/promptFeedback/blockReason")
        .and_then(Value::as_str)
    {
        return Err(GenerateError::Safety {
            reason: reason.to_string(),
        });
    }

    let Some(candidate) = json.pointer("/candidates/0") else {
        return Ok(None);
    };

    if let Some(reason) = candidate.get("finishReason").and_then(Value::as_str) {
        if SAFETY_FINISH_REASONS.contains(&reason) {
            return Err(GenerateError::Safety {
                reason: reason.to_string(),
            });
        }
    }

    let text: String = candidate
        .pointer("/content/parts")
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter(|p| !p.get("thought").and_then(Value::as_bool).unwrap_or(false))
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect()
        })
        .unwrap_or_default();

    let metadata = if candidate.get("groundingMetadata").is_some()
        || candidate.get("citationMetadata").is_some()
    {
        Some(candidate.clone())
    } else {
        None
    };

    if text.is_empty() && metadata.is_none() {
        return Ok(None);
    }

    Ok(Some(StreamChunk { text, metadata }))
}

// ============ SSE ============

type ByteStream = BoxStream<'static, Result<Vec<u8>, reqwest::Error>>;

struct SseState {
    bytes: ByteStream,
    buffer: Vec<u8>,
    event_data: String,
    queue: VecDeque<Result<StreamChunk, GenerateError>>,
    finished: bool,
}

impl SseState {
    fn new(bytes: ByteStream) -> Self {
        Self {
            bytes,
            buffer: Vec::new(),
            event_data: String::new(),
            queue: VecDeque::new(),
            finished: false,
        }
    }

    fn push_bytes(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);

        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(|c| c == '\n' || c == '\r');

            if line.is_empty() {
                self.dispatch();
            } else if let Some(data) = line.strip_prefix("data:") {
                if !self.event_data.is_empty() {
                    self.event_data.push('\n');
                }
                self.event_data.push_str(data.trim_start());
            }
        }
    }

    fn dispatch(&mut self) {
        let payload = std::mem::take(&mut self.event_data);
        if self.finished || payload.trim().is_empty() {
            return;
        }

        let decoded = serde_json::from_str::<Value>(&payload)
            .map_err(|e| GenerateError::Decode(format!("bad stream frame: {}", e)))
            .and_then(|json| decode_response(&json));

        match decoded {
            Ok(Some(chunk)) => self.queue.push_back(Ok(chunk)),
            Ok(None) => {}
            Err(e) => {
                self.queue.push_back(Err(e));
                self.finished = true;
            }
        }
    }

    fn finish(&mut self) {
        self.push_bytes(b"\n\n");
        self.finished = true;
    }
}

fn sse_stream(bytes: ByteStream) -> TextStream {
    stream::unfold(SseState::new(bytes), |mut state| async move {
        loop {
            if let Some(item) = state.queue.pop_front() {
                return Some((item, state));
            }
            if state.finished {
                return None;
            }
            match state.bytes.next().await {
                Some(Ok(bytes)) => state.push_bytes(&bytes),
                Some(Err(e)) => {
                    state
                        .queue
                        .push_back(Err(GenerateError::Transport(format!("stream read failed: {}", e))));
                    state.finished = true;
                }
                None => state.finish(),
            }
        }
    })
    .boxed()
}
