use crate::backend::{ChatBackend, ChatRequest};
use crate::config::LlmConfig;
use crate::stream::StreamFrame;
use async_trait::async_trait;
use futures_util::StreamExt;
use quorum_core::{QuorumError, QuorumResult, Role};
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::debug;

/// OpenAI-compatible chat-completions backend.
///
/// Works with any provider that implements the OpenAI streaming API,
/// including ones that emit `reasoning_content` deltas.
pub struct OpenAiBackend {
    config: LlmConfig,
    http: reqwest::Client,
}

impl OpenAiBackend {
    pub fn new(config: LlmConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    fn build_messages(&self, request: &ChatRequest) -> Vec<serde_json::Value> {
        let mut api_messages: Vec<serde_json::Value> = Vec::new();

        if let Some(sys) = &request.system_prompt {
            api_messages.push(serde_json::json!({
                "role": "system",
                "content": sys
            }));
        }

        for m in &request.messages {
            match m.role {
                // The system prompt is assembled per turn; historic system
                // messages never reach the wire.
                Role::System => continue,
                Role::User => {
                    api_messages.push(serde_json::json!({
                        "role": "user",
                        "content": m.content
                    }));
                }
                Role::Assistant => {
                    let mut msg = serde_json::json!({
                        "role": "assistant",
                        "content": m.content
                    });
                    if !m.tool_calls.is_empty() {
                        let calls: Vec<serde_json::Value> = m
                            .tool_calls
                            .iter()
                            .map(|tc| {
                                serde_json::json!({
                                    "id": tc.id,
                                    "type": "function",
                                    "function": {
                                        "name": tc.name,
                                        "arguments": tc.arguments.to_string(),
                                    }
                                })
                            })
                            .collect();
                        msg["tool_calls"] = serde_json::json!(calls);
                    }
                    api_messages.push(msg);
                }
                Role::Tool => {
                    api_messages.push(serde_json::json!({
                        "role": "tool",
                        "tool_call_id": m.tool_call_id.clone().unwrap_or_default(),
                        "content": m.content
                    }));
                }
            }
        }

        api_messages
    }
}

#[async_trait]
impl ChatBackend for OpenAiBackend {
    async fn open_stream(
        &self,
        request: &ChatRequest,
    ) -> QuorumResult<mpsc::Receiver<QuorumResult<StreamFrame>>> {
        let url = format!(
            "{}/v1/chat/completions",
            self.config.endpoint_url.trim_end_matches('/')
        );

        let mut body = serde_json::json!({
            "model": self.config.model,
            "messages": self.build_messages(request),
            "stream": true,
        });
        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(request.tools);
        }
        if let Some(temperature) = self.config.temperature {
            body["temperature"] = serde_json::json!(temperature);
        }
        if let Some(max_tokens) = self.config.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        let resp = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| QuorumError::LlmTransport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let error_body = resp
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(QuorumError::LlmTransport(format!(
                "API error {status}: {error_body}"
            )));
        }

        let (tx, rx) = mpsc::channel::<QuorumResult<StreamFrame>>(256);
        let mut byte_stream = resp.bytes_stream();

        tokio::spawn(async move {
            let mut buffer = String::new();
            // Streaming tool calls are addressed by index; remember the id
            // each index announced.
            let mut ids_by_index: HashMap<u64, String> = HashMap::new();

            while let Some(chunk_result) = byte_stream.next().await {
                let chunk = match chunk_result {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        let _ = tx
                            .send(Err(QuorumError::LlmTransport(format!(
                                "stream read error: {e}"
                            ))))
                            .await;
                        return;
                    }
                };

                buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(line_end) = buffer.find('\n') {
                    let line = buffer[..line_end].trim().to_string();
                    buffer = buffer[line_end + 1..].to_string();

                    if line.is_empty() || line.starts_with(':') {
                        continue;
                    }
                    let Some(data) = line.strip_prefix("data: ") else {
                        continue;
                    };
                    if data == "[DONE]" {
                        let _ = tx.send(Ok(StreamFrame::Done)).await;
                        return;
                    }

                    let event: serde_json::Value = match serde_json::from_str(data) {
                        Ok(v) => v,
                        Err(e) => {
                            debug!(error = %e, "Skipping unparseable SSE line");
                            continue;
                        }
                    };
                    let delta = &event["choices"][0]["delta"];

                    if let Some(text) = delta["reasoning_content"].as_str() {
                        if !text.is_empty() {
                            let _ = tx
                                .send(Ok(StreamFrame::ReasoningDelta {
                                    text: text.to_string(),
                                }))
                                .await;
                        }
                    }

                    if let Some(text) = delta["content"].as_str() {
                        if !text.is_empty() {
                            let _ = tx
                                .send(Ok(StreamFrame::ContentDelta {
                                    text: text.to_string(),
                                }))
                                .await;
                        }
                    }

                    if let Some(tool_calls) = delta["tool_calls"].as_array() {
                        for tc in tool_calls {
                            let index = tc["index"].as_u64().unwrap_or(0);

                            if let Some(id) = tc["id"].as_str() {
                                let name = tc["function"]["name"]
                                    .as_str()
                                    .unwrap_or_default()
                                    .to_string();
                                ids_by_index.insert(index, id.to_string());
                                let _ = tx
                                    .send(Ok(StreamFrame::ToolCallStart {
                                        id: id.to_string(),
                                        name,
                                    }))
                                    .await;
                            }

                            if let Some(args_delta) = tc["function"]["arguments"].as_str() {
                                if !args_delta.is_empty() {
                                    if let Some(id) = ids_by_index.get(&index) {
                                        let _ = tx
                                            .send(Ok(StreamFrame::ToolCallDelta {
                                                id: id.clone(),
                                                arguments_delta: args_delta.to_string(),
                                            }))
                                            .await;
                                    }
                                }
                            }
                        }
                    }
                }
            }
        });

        Ok(rx)
    }
}
