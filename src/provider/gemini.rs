//! Google Generative Language (Gemini) REST provider.
//!
//! The API is stateless, so each context keeps its own turn history and
//! replays it with every request. A turn (user content plus the model's
//! reply) is appended to the history only once the reply has completed with
//! some text; an abandoned or empty stream leaves the history untouched.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use serde::{Deserialize, Serialize};

use super::{boxed_stream, ChunkStream, ConversationContext, ModelProvider, ProviderError};
use crate::config::ModelConfig;
use crate::models::{Chunk, ChunkPart, ContentPart};

/// Provider backed by `{base_url}/v1beta/models/{model}`.
pub struct GeminiProvider {
    endpoint: Arc<Endpoint>,
}

struct Endpoint {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    max_retries: u32,
}

impl Endpoint {
    fn url(&self, method: &str) -> String {
        format!(
            "{}/v1beta/models/{}:{}",
            self.base_url.trim_end_matches('/'),
            self.model,
            method
        )
    }

    fn post(&self, url: &str) -> reqwest::RequestBuilder {
        let req = self
            .client
            .post(url)
            .header("Content-Type", "application/json");
        match &self.api_key {
            Some(key) => req.header("x-goog-api-key", key),
            None => req,
        }
    }
}

impl GeminiProvider {
    /// Builds the provider from configuration.
    ///
    /// The API key is read from the environment variable named by
    /// `config.api_key_env`. A missing key is not an error here; the remote
    /// call will fail instead.
    pub fn new(config: &ModelConfig) -> Result<Self, ProviderError> {
        let api_key = std::env::var(&config.api_key_env).ok();
        if api_key.is_none() {
            tracing::warn!(
                var = %config.api_key_env,
                "API key environment variable not set; model calls will be unauthenticated"
            );
        }

        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()?;

        Ok(Self {
            endpoint: Arc::new(Endpoint {
                client,
                base_url: config.base_url.clone(),
                model: config.model.clone(),
                api_key,
                max_retries: config.max_retries,
            }),
        })
    }

    /// Replaces the API key picked up from the environment.
    pub fn with_api_key(self, api_key: impl Into<String>) -> Self {
        let endpoint = &self.endpoint;
        Self {
            endpoint: Arc::new(Endpoint {
                client: endpoint.client.clone(),
                base_url: endpoint.base_url.clone(),
                model: endpoint.model.clone(),
                api_key: Some(api_key.into()),
                max_retries: endpoint.max_retries,
            }),
        }
    }
}

#[async_trait]
impl ModelProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn model(&self) -> &str {
        &self.endpoint.model
    }

    async fn create_context(&self) -> Result<Box<dyn ConversationContext>, ProviderError> {
        Ok(Box::new(GeminiContext {
            id: uuid::Uuid::new_v4().to_string(),
            endpoint: self.endpoint.clone(),
            history: Arc::new(Mutex::new(Vec::new())),
        }))
    }
}

struct GeminiContext {
    id: String,
    endpoint: Arc<Endpoint>,
    history: Arc<Mutex<Vec<Content>>>,
}

impl GeminiContext {
    fn request_body(&self, next: &Content) -> GenerateContentRequest {
        let mut contents = self
            .history
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        contents.push(next.clone());
        GenerateContentRequest { contents }
    }
}

#[async_trait]
impl ConversationContext for GeminiContext {
    fn id(&self) -> &str {
        &self.id
    }

    async fn send(&mut self, parts: Vec<ContentPart>) -> Result<(), ProviderError> {
        let user = Content::user(parts.into_iter().map(WirePart::from).collect());
        let body = self.request_body(&user);
        let url = self.endpoint.url("generateContent");

        let mut last_err = None;

        for attempt in 0..=self.endpoint.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self.endpoint.post(&url).json(&body).send().await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let parsed: GenerateContentResponse = response
                            .json()
                            .await
                            .map_err(|e| ProviderError::Malformed(e.to_string()))?;
                        let reply = parsed.into_first_content().ok_or_else(|| {
                            ProviderError::Malformed("response contained no candidates".into())
                        })?;
                        let mut history = self
                            .history
                            .lock()
                            .unwrap_or_else(|poisoned| poisoned.into_inner());
                        history.push(user);
                        match reply.into_model().with_payload() {
                            Some(reply) => history.push(reply),
                            None => tracing::warn!(
                                context = %self.id,
                                "acknowledgement carried no content, keeping only the user turn"
                            ),
                        }
                        return Ok(());
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    let err = ProviderError::Status {
                        status: status.as_u16(),
                        body: body_text,
                    };

                    // Rate limited or server error: retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        tracing::warn!(context = %self.id, attempt, error = %err, "model call failed, retrying");
                        last_err = Some(err);
                        continue;
                    }

                    return Err(err);
                }
                Err(e) => {
                    tracing::warn!(context = %self.id, attempt, error = %e, "model request failed, retrying");
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| ProviderError::Stream("send failed after retries".into())))
    }

    async fn send_streaming(&mut self, prompt: &str) -> Result<ChunkStream, ProviderError> {
        let user = Content::user(vec![WirePart::text(prompt)]);
        let body = self.request_body(&user);
        let url = format!("{}?alt=sse", self.endpoint.url("streamGenerateContent"));

        let response = self
            .endpoint
            .post(&url)
            .header("Accept", "text/event-stream")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body: body_text,
            });
        }

        let history = self.history.clone();
        let context_id = self.id.clone();
        let mut events = Box::pin(response.bytes_stream().eventsource());

        Ok(boxed_stream(async_stream::try_stream! {
            let mut reply_text = String::new();

            while let Some(event) = events.next().await {
                let event = event.map_err(|e| ProviderError::Stream(e.to_string()))?;
                let data = event.data.trim();
                if data.is_empty() || data == "[DONE]" {
                    continue;
                }

                let parsed: GenerateContentResponse = serde_json::from_str(data)
                    .map_err(|e| ProviderError::Malformed(format!("{}: {}", e, data)))?;
                let chunk = parsed.into_chunk();
                for text in chunk.texts() {
                    reply_text.push_str(text);
                }
                yield chunk;
            }

            // An empty model turn would be rejected on every later request.
            if reply_text.is_empty() {
                tracing::warn!(context = %context_id, "reply carried no text, turn not recorded");
            } else {
                let mut history = history
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                history.push(user);
                history.push(Content::model(vec![WirePart::text(&reply_text)]));
            }
        }))
    }
}

// ============ Wire types ============

#[derive(Serialize)]
struct GenerateContentRequest {
    contents: Vec<Content>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    role: String,
    #[serde(default)]
    parts: Vec<WirePart>,
}

impl Content {
    fn user(parts: Vec<WirePart>) -> Self {
        Self {
            role: "user".to_string(),
            parts,
        }
    }

    fn model(parts: Vec<WirePart>) -> Self {
        Self {
            role: "model".to_string(),
            parts,
        }
    }

    fn into_model(self) -> Self {
        Self::model(self.parts)
    }

    /// Drops parts without text or inline data; `None` if nothing is left.
    fn with_payload(mut self) -> Option<Self> {
        self.parts.retain(WirePart::has_payload);
        (!self.parts.is_empty()).then_some(self)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
}

impl WirePart {
    fn text(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            inline_data: None,
        }
    }

    fn has_payload(&self) -> bool {
        self.text.as_deref().is_some_and(|t| !t.is_empty()) || self.inline_data.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

impl From<ContentPart> for WirePart {
    fn from(part: ContentPart) -> Self {
        match part {
            ContentPart::Text(text) => WirePart {
                text: Some(text),
                inline_data: None,
            },
            ContentPart::File { mime_type, data } => WirePart {
                text: None,
                inline_data: Some(InlineData {
                    mime_type,
                    data: base64::engine::general_purpose::STANDARD.encode(data.as_bytes()),
                }),
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

impl GenerateContentResponse {
    fn into_first_content(self) -> Option<Content> {
        self.candidates.into_iter().next().map(|c| {
            c.content.unwrap_or_else(|| Content::model(Vec::new()))
        })
    }

    fn into_chunk(self) -> Chunk {
        let parts = self
            .into_first_content()
            .map(|c| c.parts)
            .unwrap_or_default()
            .into_iter()
            .map(|p| ChunkPart { text: p.text })
            .collect();
        Chunk { parts }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_parts_are_base64_inline_data() {
        let part = WirePart::from(ContentPart::File {
            mime_type: "text/x-python".to_string(),
            data: "File: a.py\n\nx = 1".to_string(),
        });
        let json = serde_json::to_value(&part).unwrap();
        assert_eq!(json["inlineData"]["mimeType"], "text/x-python");
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(json["inlineData"]["data"].as_str().unwrap())
            .unwrap();
        assert_eq!(decoded, b"File: a.py\n\nx = 1");
        assert!(json.get("text").is_none());
    }

    #[test]
    fn chunk_keeps_non_text_parts_as_empty() {
        let parsed: GenerateContentResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"role":"model","parts":[
                {"text":"Hel"},
                {"functionCall":{"name":"f","args":{}}}
            ]}}]}"#,
        )
        .unwrap();
        let chunk = parsed.into_chunk();
        assert_eq!(chunk.parts.len(), 2);
        assert_eq!(chunk.texts().collect::<Vec<_>>(), vec!["Hel"]);
    }

    #[test]
    fn payload_filter_drops_empty_and_non_text_parts() {
        let parsed: GenerateContentResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"role":"model","parts":[
                {"text":""},
                {"functionCall":{"name":"f","args":{}}},
                {"text":"ok"}
            ]}}]}"#,
        )
        .unwrap();
        let reply = parsed.into_first_content().unwrap().with_payload().unwrap();
        assert_eq!(reply.parts.len(), 1);
        assert_eq!(reply.parts[0].text.as_deref(), Some("ok"));
    }

    #[test]
    fn blocked_candidate_has_no_payload() {
        let parsed: GenerateContentResponse =
            serde_json::from_str(r#"{"candidates":[{"finishReason":"SAFETY"}]}"#).unwrap();
        assert!(parsed.into_first_content().unwrap().with_payload().is_none());
    }

    #[test]
    fn chunk_without_candidates_is_empty() {
        let parsed: GenerateContentResponse =
            serde_json::from_str(r#"{"usageMetadata":{"totalTokenCount":3}}"#).unwrap();
        assert!(parsed.into_chunk().parts.is_empty());
    }

    #[test]
    fn urls_target_the_configured_model() {
        let provider = GeminiProvider::new(&ModelConfig {
            base_url: "http://localhost:1234/".to_string(),
            model: "gemini-test".to_string(),
            ..ModelConfig::default()
        })
        .unwrap();
        assert_eq!(
            provider.endpoint.url("generateContent"),
            "http://localhost:1234/v1beta/models/gemini-test:generateContent"
        );
    }
}
