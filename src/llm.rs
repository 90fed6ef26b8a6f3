//! Chat-completion providers: one trait, two transports (a local
//! OpenAI-compatible inference server and the OpenAI cloud API), selected by
//! configuration alone.

use std::fmt;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::ValueEnum;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

/// Speaker tag on a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Instructional preamble.
    System,
    /// The person asking questions.
    User,
    /// The model's reply.
    Assistant,
}

impl Role {
    /// Wire-format name for the role.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One role-tagged message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Speaker tag.
    pub role: Role,
    /// Message body.
    pub content: String,
}

impl ChatMessage {
    /// Convenience constructor for a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// Convenience constructor for a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Failure modes on the chat-completion path. Callers above the answer
/// boundary never see these; they are folded into the fallback answer.
#[derive(Debug)]
pub enum EndpointError {
    /// The endpoint could not be reached at all.
    Unreachable(String),
    /// The request exceeded its timeout.
    Timeout,
    /// The endpoint answered with a non-success status.
    BadStatus {
        /// HTTP status code.
        status: u16,
        /// Response body, when one was readable.
        body: String,
    },
    /// The response decoded but carried no usable message.
    EmptyResponse,
}

impl fmt::Display for EndpointError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unreachable(detail) => write!(f, "chat endpoint unreachable: {detail}"),
            Self::Timeout => write!(f, "chat endpoint timed out"),
            Self::BadStatus { status, body } => {
                write!(f, "chat endpoint returned {status}: {body}")
            }
            Self::EmptyResponse => write!(f, "chat endpoint returned no message content"),
        }
    }
}

impl std::error::Error for EndpointError {}

impl From<reqwest::Error> for EndpointError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Unreachable(err.to_string())
        }
    }
}

/// Trait implemented by concrete chat-completion backends.
pub trait ChatProvider {
    /// Sends one completion request and returns the generated text.
    fn complete(&self, messages: &[ChatMessage]) -> Result<String, EndpointError>;

    /// Human-readable endpoint description for status output.
    fn describe(&self) -> String;
}

/// Which backend the session talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendKind {
    /// OpenAI-compatible server on this machine (e.g. LM Studio).
    Local,
    /// OpenAI cloud API.
    Cloud,
}

/// Generation knobs shared by both providers.
#[derive(Debug, Clone, Copy)]
pub struct GenerationLimits {
    /// Sampling temperature.
    pub temperature: f32,
    /// Maximum tokens requested from the completion model.
    pub max_tokens: usize,
}

impl Default for GenerationLimits {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 512,
        }
    }
}

/// Provider backed by a local OpenAI-compatible inference server.
pub struct LocalProvider {
    client: Client,
    endpoint: String,
    model: String,
    limits: GenerationLimits,
}

impl LocalProvider {
    /// Builds a provider for a local server; no authentication is sent.
    pub fn new(
        base_url: &str,
        model: &str,
        timeout: Duration,
        limits: GenerationLimits,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build local chat HTTP client")?;
        Ok(Self {
            client,
            endpoint: chat_endpoint(base_url),
            model: model.to_string(),
            limits,
        })
    }
}

impl ChatProvider for LocalProvider {
    fn complete(&self, messages: &[ChatMessage]) -> Result<String, EndpointError> {
        let body = CompletionRequest {
            model: &self.model,
            messages,
            temperature: self.limits.temperature,
            max_tokens: self.limits.max_tokens,
            stream: false,
        };
        let resp = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .json(&body)
            .send()?;
        extract_reply(resp)
    }

    fn describe(&self) -> String {
        format!("local server {} (model {})", self.endpoint, self.model)
    }
}

/// Provider backed by the OpenAI cloud API.
pub struct OpenAiProvider {
    client: Client,
    endpoint: String,
    model: String,
    limits: GenerationLimits,
}

impl OpenAiProvider {
    /// Builds a cloud provider with bearer authentication.
    pub fn new(
        base_url: &str,
        model: &str,
        api_key: &str,
        timeout: Duration,
        limits: GenerationLimits,
    ) -> Result<Self> {
        anyhow::ensure!(!api_key.trim().is_empty(), "missing cloud API key");
        let mut headers = HeaderMap::new();
        let auth = format!("Bearer {}", api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth).context("invalid cloud API key")?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .context("failed to build cloud chat HTTP client")?;
        Ok(Self {
            client,
            endpoint: chat_endpoint(base_url),
            model: model.to_string(),
            limits,
        })
    }
}

impl ChatProvider for OpenAiProvider {
    fn complete(&self, messages: &[ChatMessage]) -> Result<String, EndpointError> {
        let body = CompletionRequest {
            model: &self.model,
            messages,
            temperature: self.limits.temperature,
            max_tokens: self.limits.max_tokens,
            stream: false,
        };
        let resp = self.client.post(&self.endpoint).json(&body).send()?;
        extract_reply(resp)
    }

    fn describe(&self) -> String {
        format!("cloud endpoint {} (model {})", self.endpoint, self.model)
    }
}

fn chat_endpoint(base_url: &str) -> String {
    format!("{}/chat/completions", base_url.trim_end_matches('/'))
}

fn extract_reply(resp: reqwest::blocking::Response) -> Result<String, EndpointError> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp
            .text()
            .unwrap_or_else(|_| "<body unavailable>".to_string());
        return Err(EndpointError::BadStatus {
            status: status.as_u16(),
            body,
        });
    }
    let parsed: CompletionResponse = resp.json().map_err(EndpointError::from)?;
    let reply = parsed
        .choices
        .into_iter()
        .next()
        .map(|choice| choice.message.content)
        .unwrap_or_default();
    let reply = reply.trim().to_string();
    if reply.is_empty() {
        return Err(EndpointError::EmptyResponse);
    }
    Ok(reply)
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: usize,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    content: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_serialize_lowercase() {
        let msg = ChatMessage::system("stay on topic");
        let json = serde_json::to_string(&msg).expect("serialize");
        assert_eq!(json, r#"{"role":"system","content":"stay on topic"}"#);
    }

    #[test]
    fn request_body_matches_wire_shape() {
        let messages = vec![ChatMessage::user("What is the bolus volume?")];
        let body = CompletionRequest {
            model: "openhermes",
            messages: &messages,
            temperature: 0.7,
            max_tokens: 64,
            stream: false,
        };
        let json = serde_json::to_value(&body).expect("serialize");
        assert_eq!(json["model"], "openhermes");
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["stream"], false);
    }

    #[test]
    fn response_content_is_extracted() {
        let parsed: CompletionResponse = serde_json::from_str(
            r#"{"choices":[{"message":{"role":"assistant","content":"20 mL/kg"}}]}"#,
        )
        .expect("parse");
        assert_eq!(parsed.choices[0].message.content, "20 mL/kg");
    }

    #[test]
    fn unreachable_endpoint_maps_to_endpoint_error() {
        let provider = LocalProvider::new(
            "http://127.0.0.1:9",
            "openhermes",
            Duration::from_millis(100),
            GenerationLimits::default(),
        )
        .expect("provider");
        match provider.complete(&[ChatMessage::user("hello")]) {
            Err(EndpointError::Unreachable(_)) | Err(EndpointError::Timeout) => {}
            other => panic!("expected transport failure, got {other:?}"),
        }
    }
}
