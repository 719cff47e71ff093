//! Typed request and response bodies for OpenAI-compatible chat completions, and the
//! conversions between them and the conversation [`Message`] model.

use anyhow::{anyhow, Result};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::base::Usage;
use crate::errors::AgentError;
use crate::models::content::Content;
use crate::models::message::{Message, MessageContent};
use crate::models::role::Role;
use crate::models::tool::{Tool, ToolCall};

const INVALID_TOOL_CALL: &str = "invalid_tool_call";
const IMAGE_PLACEHOLDER: &str = "The tool returned an image, attached in the next message.";

lazy_static! {
    static ref NAME_FORBIDDEN: Regex = Regex::new(r"[^a-zA-Z0-9_-]").unwrap();
}

#[derive(Debug, Serialize)]
pub struct ChatRequest<'a> {
    pub model: &'a str,
    pub messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<WireTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum WireMessage {
    System {
        content: String,
    },
    User {
        content: UserContent,
    },
    Assistant {
        #[serde(skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<WireToolCall>,
    },
    Tool {
        content: String,
        tool_call_id: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum UserContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageUrl {
    url: String,
}

impl ContentPart {
    fn inline_image(data: &str, mime_type: &str) -> Self {
        ContentPart::ImageUrl {
            image_url: ImageUrl {
                url: format!("data:{};base64,{}", mime_type, data),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireToolCall {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type", default = "function_kind")]
    pub kind: String,
    pub function: WireFunctionCall,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireFunctionCall {
    #[serde(default)]
    pub name: String,
    /// JSON-encoded arguments, exactly as the model wrote them
    #[serde(default)]
    pub arguments: String,
}

fn function_kind() -> String {
    "function".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WireTool {
    #[serde(rename = "type")]
    kind: &'static str,
    function: FunctionSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct FunctionSpec {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Deserialize)]
pub struct ChatCompletion {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    prompt_tokens: Option<i32>,
    completion_tokens: Option<i32>,
    total_tokens: Option<i32>,
}

impl From<WireUsage> for Usage {
    fn from(usage: WireUsage) -> Self {
        let total = usage.total_tokens.or(match (usage.prompt_tokens, usage.completion_tokens) {
            (Some(input), Some(output)) => Some(input + output),
            _ => None,
        });
        Usage::new(usage.prompt_tokens, usage.completion_tokens, total)
    }
}

/// Flatten the history into wire messages.
///
/// Each tool response becomes its own `tool` message. Images from a tool cannot travel in a
/// `tool` message, so a placeholder is sent there and the image follows as a user message.
pub fn to_wire_messages(messages: &[Message]) -> Vec<WireMessage> {
    let mut wire = Vec::new();

    for message in messages {
        let mut texts: Vec<&str> = Vec::new();
        let mut images = Vec::new();
        let mut tool_calls = Vec::new();
        let mut trailing = Vec::new();

        for content in &message.content {
            match content {
                MessageContent::Text(text) if !text.text.is_empty() => texts.push(&text.text),
                MessageContent::Text(_) => {}
                MessageContent::Image(image) => {
                    images.push(ContentPart::inline_image(&image.data, &image.mime_type))
                }
                MessageContent::ToolRequest(request) => tool_calls.push(match &request.tool_call {
                    Ok(call) => WireToolCall {
                        id: request.id.clone(),
                        kind: function_kind(),
                        function: WireFunctionCall {
                            name: sanitize_name(&call.name),
                            arguments: call.arguments.to_string(),
                        },
                    },
                    // The id must still be declared so the failed response can refer to it
                    Err(_) => WireToolCall {
                        id: request.id.clone(),
                        kind: function_kind(),
                        function: WireFunctionCall {
                            name: INVALID_TOOL_CALL.to_string(),
                            arguments: "{}".to_string(),
                        },
                    },
                }),
                MessageContent::ToolResponse(response) => {
                    trailing.extend(tool_output(&response.id, &response.tool_result))
                }
            }
        }

        let text = (!texts.is_empty()).then(|| texts.join("\n"));
        match message.role {
            Role::Assistant if text.is_some() || !tool_calls.is_empty() => {
                wire.push(WireMessage::Assistant {
                    content: text,
                    tool_calls,
                });
            }
            // Text part first, then the images
            Role::User if !images.is_empty() => {
                let mut parts: Vec<ContentPart> = text
                    .into_iter()
                    .map(|text| ContentPart::Text { text })
                    .collect();
                parts.extend(images);
                wire.push(WireMessage::User {
                    content: UserContent::Parts(parts),
                });
            }
            Role::User => {
                if let Some(text) = text {
                    wire.push(WireMessage::User {
                        content: UserContent::Text(text),
                    });
                }
            }
            Role::Assistant => {}
        }
        wire.extend(trailing);
    }

    wire
}

fn tool_output(id: &str, result: &Result<Vec<Content>, AgentError>) -> Vec<WireMessage> {
    let contents = match result {
        Ok(contents) => contents,
        Err(e) => {
            return vec![WireMessage::Tool {
                content: format!("The tool call failed:\n{}", e),
                tool_call_id: id.to_string(),
            }]
        }
    };

    let mut lines = Vec::new();
    let mut images = Vec::new();
    for content in contents {
        match content {
            Content::Text(text) => lines.push(text.text.clone()),
            Content::Image(image) => {
                lines.push(IMAGE_PLACEHOLDER.to_string());
                images.push(WireMessage::User {
                    content: UserContent::Parts(vec![ContentPart::inline_image(
                        &image.data,
                        &image.mime_type,
                    )]),
                });
            }
        }
    }

    let mut output = vec![WireMessage::Tool {
        content: lines.join("\n"),
        tool_call_id: id.to_string(),
    }];
    output.extend(images);
    output
}

pub fn to_wire_tools(tools: &[Tool]) -> Result<Vec<WireTool>> {
    let mut seen = std::collections::HashSet::new();
    tools
        .iter()
        .map(|tool| {
            if !seen.insert(tool.name.as_str()) {
                return Err(anyhow!("Duplicate tool name: {}", tool.name));
            }
            Ok(WireTool {
                kind: "function",
                function: FunctionSpec {
                    name: tool.name.clone(),
                    description: tool.description.clone(),
                    parameters: tool.input_schema.clone(),
                },
            })
        })
        .collect()
}

/// Turn the first choice of a completion into an assistant message.
///
/// Tool calls with a bad name or unparseable arguments stay in the message as failed
/// requests, so the model learns about them on the next turn.
pub fn from_completion(completion: ChatCompletion) -> Result<(Message, Usage)> {
    let usage = completion.usage.map(Usage::from).unwrap_or_default();
    let choice = completion
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("Completion has no choices"))?;

    let mut message = Message::assistant();
    if let Some(text) = choice.message.content.filter(|text| !text.is_empty()) {
        message = message.with_text(text);
    }
    for call in choice.message.tool_calls.unwrap_or_default() {
        let request = parse_tool_call(&call);
        message = message.with_tool_request(call.id, request);
    }

    Ok((message, usage))
}

fn parse_tool_call(call: &WireToolCall) -> Result<ToolCall, AgentError> {
    let name = &call.function.name;
    if name.is_empty() || NAME_FORBIDDEN.is_match(name) {
        return Err(AgentError::ToolNotFound(format!(
            "'{}' is not a valid tool name; names may only use [a-zA-Z0-9_-]",
            name
        )));
    }

    // Some models send an empty string for a call without arguments
    let raw = call.function.arguments.trim();
    let arguments = if raw.is_empty() {
        Value::Object(Default::default())
    } else {
        serde_json::from_str(raw).map_err(|e| {
            AgentError::InvalidParameters(format!(
                "arguments for call {} are not valid JSON: {}",
                call.id, e
            ))
        })?
    };
    Ok(ToolCall::new(name, arguments))
}

fn sanitize_name(name: &str) -> String {
    NAME_FORBIDDEN.replace_all(name, "_").into_owned()
}

#[derive(Debug, thiserror::Error)]
#[error("Context length exceeded. Message: {0}")]
pub struct ContextLengthExceededError(String);

/// Recognise the error codes hosts use when the history no longer fits the model
pub fn context_length_error(error: &Value) -> Option<ContextLengthExceededError> {
    match error.get("code")?.as_str()? {
        "context_length_exceeded" | "string_above_max_length" => {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("Unknown error");
            Some(ContextLengthExceededError(message.to_string()))
        }
        _ => None,
    }
}
