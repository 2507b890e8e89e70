use crate::error::AnalysisError;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::time::Duration;

/// Text returned when analysis is switched off
pub const DISABLED_PLACEHOLDER: &str = "AI analysis disabled";

const SYSTEM_PROMPT: &str = "You are a senior Linux systems engineer who diagnoses incidents from \
logs. For the log excerpt you receive: 1. identify the key errors and latent problems, most \
important first; 2. explain their likely causes; 3. give concrete remediation steps such as \
commands or configuration changes; 4. for serious problems, state the impact and the urgent \
actions to take. Answer as a clear, structured report.";

/// Trait for summarization backends
pub trait Summarizer: Send + Sync {
    fn summarize<'a>(
        &'a self,
        content: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String, AnalysisError>> + Send + 'a>>;
}

/// OpenAI-compatible chat completion backend using server-sent events
///
/// The request asks for a streamed answer; every `data:` line of the response carries
/// a JSON chunk whose `choices[0].delta.content` fragments are concatenated.
pub struct ChatCompletionBackend {
    client: Client,
    api_url: String,
    api_key: String,
    model: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

/// One streamed chunk
#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<ChunkDelta>,
}

#[derive(Debug, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

impl ChatCompletionBackend {
    /// Create a backend
    ///
    /// # Arguments
    /// * `api_url` - Base URL or full `/chat/completions` endpoint
    /// * `api_key` - Bearer token
    /// * `model` - Model name
    /// * `request_timeout` - Timeout of a single HTTP request
    pub fn new(api_url: String, api_key: String, model: String, request_timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .unwrap_or_default();

        Self {
            client,
            api_url,
            api_key,
            model,
        }
    }

    /// Endpoint the request is posted to
    pub fn endpoint(&self) -> String {
        let base = self.api_url.trim_end_matches('/');
        if base.ends_with("/chat/completions") {
            base.to_string()
        } else {
            format!("{}/chat/completions", base)
        }
    }
}

/// Extract the content fragment carried by one SSE line, if any
pub fn parse_sse_line(line: &str) -> Option<String> {
    let data = line.trim_end().strip_prefix("data:")?.trim_start();
    if data.is_empty() || data == "[DONE]" {
        return None;
    }
    let chunk: ChatChunk = serde_json::from_str(data).ok()?;
    chunk
        .choices
        .into_iter()
        .next()?
        .delta?
        .content
}

impl Summarizer for ChatCompletionBackend {
    fn summarize<'a>(
        &'a self,
        content: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String, AnalysisError>> + Send + 'a>> {
        Box::pin(async move {
            let request = ChatRequest {
                model: &self.model,
                messages: vec![
                    ChatMessage {
                        role: "system",
                        content: SYSTEM_PROMPT,
                    },
                    ChatMessage {
                        role: "user",
                        content,
                    },
                ],
                stream: true,
                temperature: 0.7,
            };

            let mut response = self
                .client
                .post(self.endpoint())
                .bearer_auth(&self.api_key)
                .json(&request)
                .send()
                .await?;

            if !response.status().is_success() {
                let status = response.status();
                let error_text = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown error".to_string());
                return Err(AnalysisError::BackendError(format!(
                    "chat completion returned {}: {}",
                    status, error_text
                )));
            }

            let mut pending = Vec::new();
            let mut result = String::new();
            while let Some(chunk) = response.chunk().await? {
                pending.extend_from_slice(&chunk);
                while let Some(pos) = pending.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = pending.drain(..=pos).collect();
                    if let Some(fragment) = parse_sse_line(&String::from_utf8_lossy(&line)) {
                        result.push_str(&fragment);
                    }
                }
            }
            if let Some(fragment) = parse_sse_line(&String::from_utf8_lossy(&pending)) {
                result.push_str(&fragment);
            }

            Ok(result)
        })
    }
}

/// Backend used when analysis is switched off
#[derive(Debug, Default)]
pub struct DisabledBackend;

impl Summarizer for DisabledBackend {
    fn summarize<'a>(
        &'a self,
        _content: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String, AnalysisError>> + Send + 'a>> {
        Box::pin(async move { Ok(DISABLED_PLACEHOLDER.to_string()) })
    }
}

/// Mock backend for testing
///
/// Replies are returned in order, cycling after the last. `Err` replies become
/// [`AnalysisError::BackendError`].
pub struct MockBackend {
    responses: Vec<Result<String, String>>,
    current_index: Mutex<usize>,
    delay: Option<Duration>,
    call_count: Mutex<usize>,
    last_content: Mutex<Option<String>>,
}

impl MockBackend {
    pub fn with_responses(responses: Vec<Result<String, String>>) -> Self {
        Self {
            responses,
            current_index: Mutex::new(0),
            delay: None,
            call_count: Mutex::new(0),
            last_content: Mutex::new(None),
        }
    }

    /// Backend that always answers with `text`
    pub fn success(text: &str) -> Self {
        Self::with_responses(vec![Ok(text.to_string())])
    }

    /// Backend that always fails
    pub fn error(message: &str) -> Self {
        Self::with_responses(vec![Err(message.to_string())])
    }

    /// Delay every reply (useful for testing timeouts)
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        *self.call_count.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn last_content(&self) -> Option<String> {
        self.last_content
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl Summarizer for MockBackend {
    fn summarize<'a>(
        &'a self,
        content: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String, AnalysisError>> + Send + 'a>> {
        Box::pin(async move {
            *self.call_count.lock().unwrap_or_else(|e| e.into_inner()) += 1;
            *self.last_content.lock().unwrap_or_else(|e| e.into_inner()) = Some(content.to_string());

            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }

            if self.responses.is_empty() {
                return Err(AnalysisError::InvalidResponse("no mock responses".to_string()));
            }
            let response_index = {
                let mut index = self.current_index.lock().unwrap_or_else(|e| e.into_inner());
                let current = *index % self.responses.len();
                *index += 1;
                current
            };

            self.responses[response_index]
                .clone()
                .map_err(AnalysisError::BackendError)
        })
    }
}
