use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;

use super::base::{Provider, Usage};
use super::configs::OpenAiProviderConfig;
use super::wire::{
    context_length_error, from_completion, to_wire_messages, to_wire_tools, ChatCompletion,
    ChatRequest, WireMessage,
};
use crate::models::message::Message;
use crate::models::tool::Tool;

/// Chat completions client for Groq, OpenAI and any other compatible host
pub struct OpenAiProvider {
    client: Client,
    config: OpenAiProviderConfig,
}

impl OpenAiProvider {
    pub fn new(config: OpenAiProviderConfig) -> Result<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;

        Ok(Self { client, config })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    fn url(&self) -> String {
        format!(
            "{}/v1/chat/completions",
            self.config.host.trim_end_matches('/')
        )
    }

    async fn post(&self, request: &ChatRequest<'_>) -> Result<Value> {
        let response = self
            .client
            .post(self.url())
            .bearer_auth(&self.config.api_key)
            .json(request)
            .send()
            .await?;

        match response.status() {
            // A 400 body describes the problem, e.g. an overlong history
            StatusCode::OK | StatusCode::BAD_REQUEST => Ok(response.json().await?),
            status if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() => {
                Err(anyhow!("Server error: {}", status))
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(anyhow!("Request failed: {}\nResponse: {}", status, body))
            }
        }
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    async fn complete(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[Tool],
    ) -> Result<(Message, Usage)> {
        let mut wire_messages = vec![WireMessage::System {
            content: system.to_string(),
        }];
        wire_messages.extend(to_wire_messages(messages));

        let request = ChatRequest {
            model: &self.config.model,
            messages: wire_messages,
            tools: to_wire_tools(tools)?,
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };

        let mut body = self.post(&request).await?;
        if let Some(error) = body.get("error") {
            if let Some(err) = context_length_error(error) {
                return Err(err.into());
            }
            return Err(anyhow!("Chat completion error: {}", error));
        }

        let completion: ChatCompletion = serde_json::from_value(body.take())?;
        let (message, usage) = from_completion(completion)?;
        tracing::debug!(
            model = %self.config.model,
            input_tokens = ?usage.input_tokens,
            output_tokens = ?usage.output_tokens,
            "completion received"
        );

        Ok((message, usage))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::message::MessageContent;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn setup_mock_server(status: u16, response_body: Value) -> (MockServer, OpenAiProvider) {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer test_api_key"))
            .respond_with(ResponseTemplate::new(status).set_body_json(response_body))
            .mount(&mock_server)
            .await;

        let config = OpenAiProviderConfig::groq("test_api_key")
            .with_host(mock_server.uri())
            .with_temperature(Some(0.7));

        let provider = OpenAiProvider::new(config).unwrap();
        (mock_server, provider)
    }

    #[tokio::test]
    async fn test_complete_basic() -> Result<()> {
        let response_body = json!({
            "id": "chatcmpl-123",
            "object": "chat.completion",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": "Hey! Want me to build you a playlist?",
                    "tool_calls": null
                },
                "finish_reason": "stop"
            }],
            "usage": {
                "prompt_tokens": 12,
                "completion_tokens": 15,
                "total_tokens": 27
            }
        });

        let (_, provider) = setup_mock_server(200, response_body).await;
        let messages = vec![Message::user().with_text("Hello?")];

        let (message, usage) = provider
            .complete("You are a music assistant.", &messages, &[])
            .await?;

        if let MessageContent::Text(text) = &message.content[0] {
            assert_eq!(text.text, "Hey! Want me to build you a playlist?");
        } else {
            panic!("Expected Text content");
        }
        assert_eq!(usage.input_tokens, Some(12));
        assert_eq!(usage.output_tokens, Some(15));
        assert_eq!(usage.total_tokens, Some(27));

        Ok(())
    }

    #[tokio::test]
    async fn test_complete_sends_system_prompt_and_tools() -> Result<()> {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(body_partial_json(json!({
                "model": "llama-3.3-70b-versatile",
                "messages": [{"role": "system", "content": "policy"}],
                "tools": [{"type": "function", "function": {"name": "searchSpotify"}}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant", "content": "ok"}}]
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let provider =
            OpenAiProvider::new(OpenAiProviderConfig::groq("key").with_host(mock_server.uri()))?;
        let tool = Tool::new("searchSpotify", "Search the catalog", json!({"type": "object"}));

        let (message, usage) = provider
            .complete("policy", &[Message::user().with_text("hi")], &[tool])
            .await?;

        assert_eq!(message.text(), "ok");
        assert_eq!(usage, Usage::default());
        Ok(())
    }

    #[tokio::test]
    async fn test_complete_tool_request() -> Result<()> {
        let response_body = json!({
            "id": "chatcmpl-tool",
            "object": "chat.completion",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_123",
                        "type": "function",
                        "function": {
                            "name": "searchSpotify",
                            "arguments": "{\"query\":\"Bohemian Rhapsody\",\"type\":\"track\"}"
                        }
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {
                "prompt_tokens": 20,
                "completion_tokens": 15,
                "total_tokens": 35
            }
        });

        let (_, provider) = setup_mock_server(200, response_body).await;
        let messages = vec![Message::user().with_text("Find Bohemian Rhapsody")];
        let tool = Tool::new(
            "searchSpotify",
            "Search for tracks, albums, artists or playlists",
            json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string"},
                    "type": {"type": "string", "enum": ["track", "album", "artist", "playlist"]}
                },
                "required": ["query", "type"]
            }),
        );

        let (message, usage) = provider
            .complete("You are a music assistant.", &messages, &[tool])
            .await?;

        if let MessageContent::ToolRequest(tool_request) = &message.content[0] {
            let tool_call = tool_request.tool_call.as_ref().unwrap();
            assert_eq!(tool_request.id, "call_123");
            assert_eq!(tool_call.name, "searchSpotify");
            assert_eq!(
                tool_call.arguments,
                json!({"query": "Bohemian Rhapsody", "type": "track"})
            );
        } else {
            panic!("Expected ToolRequest content");
        }
        assert_eq!(usage.total_tokens, Some(35));

        Ok(())
    }

    #[tokio::test]
    async fn test_context_length_error() {
        let (_, provider) = setup_mock_server(
            400,
            json!({"error": {"code": "context_length_exceeded", "message": "too long"}}),
        )
        .await;

        let err = provider
            .complete("system", &[Message::user().with_text("hi")], &[])
            .await
            .unwrap_err();

        assert!(err.to_string().starts_with("Context length exceeded"));
    }

    #[tokio::test]
    async fn test_server_error() {
        let (_, provider) = setup_mock_server(503, json!({})).await;

        let err = provider
            .complete("system", &[Message::user().with_text("hi")], &[])
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "Server error: 503 Service Unavailable");
    }

    #[tokio::test]
    async fn test_unauthorized_includes_body() {
        let (_, provider) =
            setup_mock_server(401, json!({"error": {"message": "Invalid API Key"}})).await;

        let err = provider
            .complete("system", &[Message::user().with_text("hi")], &[])
            .await
            .unwrap_err();

        let text = err.to_string();
        assert!(text.starts_with("Request failed: 401"));
        assert!(text.contains("Invalid API Key"));
    }
}
