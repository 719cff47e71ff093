//! Model Context Protocol client over a line-delimited JSON-RPC stdio transport.
//!
//! [`McpClient`] owns the wire: it numbers requests, routes responses back to their
//! callers, and fails every in-flight request when the server goes away.
//! [`McpSystem`] layers the MCP handshake and tool discovery on top and exposes the
//! server as a [`System`].

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::config::McpServerConfig;
use super::system::{System, SystemError};
use crate::errors::{AgentError, AgentResult};
use crate::models::content::Content;
use crate::models::tool::{Tool, ToolCall};

pub const PROTOCOL_VERSION: &str = "2024-11-05";

type Reply = Result<Value, SystemError>;
type Writer = Box<dyn AsyncWrite + Send + Unpin>;

struct Inner {
    name: String,
    writer: AsyncMutex<Writer>,
    pending: Mutex<HashMap<u64, oneshot::Sender<Reply>>>,
    next_id: AtomicU64,
    closed: AtomicBool,
    timeout: Duration,
}

/// JSON-RPC 2.0 client for a single MCP server
pub struct McpClient {
    inner: Arc<Inner>,
    reader: JoinHandle<()>,
}

impl McpClient {
    pub fn new<R, W>(name: impl Into<String>, reader: R, writer: W, timeout: Duration) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let inner = Arc::new(Inner {
            name: name.into(),
            writer: AsyncMutex::new(Box::new(writer)),
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            timeout,
        });
        let reader = tokio::spawn(Arc::clone(&inner).read_loop(reader));
        Self { inner, reader }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Send a request and wait for its response, bounded by the client timeout
    pub async fn request(&self, method: &str, params: Value) -> Result<Value, SystemError> {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.inner.pending()?.insert(id, tx);
        // Removes the entry however this future ends, including when the caller drops it
        let _registered = Registered {
            inner: self.inner.as_ref(),
            id,
        };

        // Registered before the check so a concurrent close either drains us or is seen here
        if self.is_closed() {
            return Err(SystemError::Closed);
        }

        let frame = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        self.inner.write(&frame).await?;

        match tokio::time::timeout(self.inner.timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => Err(SystemError::Closed),
            Err(_) => Err(SystemError::Timeout {
                method: method.to_string(),
                secs: self.inner.timeout.as_secs(),
            }),
        }
    }

    /// Requests sent and still waiting for an answer
    pub fn pending_count(&self) -> usize {
        self.inner.pending().map_or(0, |pending| pending.len())
    }

    /// Send a notification, which has no response
    pub async fn notify(&self, method: &str, params: Value) -> Result<(), SystemError> {
        if self.is_closed() {
            return Err(SystemError::Closed);
        }
        let frame = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
        });
        self.inner.write(&frame).await
    }
}

struct Registered<'a> {
    inner: &'a Inner,
    id: u64,
}

impl Drop for Registered<'_> {
    fn drop(&mut self) {
        self.inner.forget(self.id);
    }
}

impl Drop for McpClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

impl Inner {
    fn pending(&self) -> Result<std::sync::MutexGuard<'_, HashMap<u64, oneshot::Sender<Reply>>>, SystemError> {
        self.pending
            .lock()
            .map_err(|_| SystemError::Protocol("pending request table poisoned".to_string()))
    }

    fn forget(&self, id: u64) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(&id);
        }
    }

    async fn write(&self, frame: &Value) -> Result<(), SystemError> {
        let mut line =
            serde_json::to_vec(frame).map_err(|e| SystemError::Protocol(e.to_string()))?;
        line.push(b'\n');
        let mut writer = self.writer.lock().await;
        writer.write_all(&line).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn read_loop<R>(self: Arc<Self>, reader: R)
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<Value>(line) {
                        Ok(message) => self.dispatch(message).await,
                        Err(_) => {
                            debug!(server = %self.name, line, "skipping non-JSON output");
                        }
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(server = %self.name, error = %e, "read from tool provider failed");
                    break;
                }
            }
        }
        self.close();
    }

    async fn dispatch(&self, message: Value) {
        let id = message.get("id").and_then(Value::as_u64);
        let method = message.get("method").and_then(Value::as_str);

        match (id, method) {
            (Some(id), None) => {
                let reply = match message.get("error") {
                    Some(error) => Err(SystemError::Rpc {
                        code: error.get("code").and_then(Value::as_i64).unwrap_or(0),
                        message: error
                            .get("message")
                            .and_then(Value::as_str)
                            .unwrap_or("unknown error")
                            .to_string(),
                    }),
                    None => Ok(message.get("result").cloned().unwrap_or(Value::Null)),
                };
                let sender = self.pending().ok().and_then(|mut p| p.remove(&id));
                match sender {
                    Some(sender) => {
                        let _ = sender.send(reply);
                    }
                    None => debug!(server = %self.name, id, "response for unknown request"),
                }
            }
            // Requests from the server to us; we only answer pings
            (Some(id), Some(method)) => {
                let frame = if method == "ping" {
                    json!({"jsonrpc": "2.0", "id": id, "result": {}})
                } else {
                    json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "error": {"code": -32601, "message": format!("Method not found: {}", method)},
                    })
                };
                if let Err(e) = self.write(&frame).await {
                    warn!(server = %self.name, error = %e, "failed to answer server request");
                }
            }
            (None, Some(method)) => {
                debug!(server = %self.name, method, "notification from tool provider");
            }
            (None, None) => {
                debug!(server = %self.name, "ignoring message without id or method");
            }
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        if let Ok(mut pending) = self.pending.lock() {
            for (_, sender) in pending.drain() {
                let _ = sender.send(Err(SystemError::Closed));
            }
        }
        info!(server = %self.name, "tool provider connection closed");
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToolsPage {
    #[serde(default)]
    tools: Vec<McpTool>,
    next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct McpTool {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default = "empty_schema")]
    input_schema: Value,
}

fn empty_schema() -> Value {
    json!({"type": "object", "properties": {}})
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CallToolResult {
    #[serde(default)]
    content: Vec<Value>,
    #[serde(default)]
    is_error: bool,
}

/// An MCP server exposed as a tool provider
pub struct McpSystem {
    name: String,
    description: String,
    instructions: String,
    tools: Vec<Tool>,
    client: McpClient,
    _child: Option<Child>,
}

impl McpSystem {
    /// Launch the configured server as a child process and complete the handshake
    pub async fn spawn(name: &str, config: &McpServerConfig) -> Result<Self, SystemError> {
        let mut command = Command::new(&config.command);
        command
            .args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if let Some(cwd) = &config.cwd {
            command.current_dir(cwd);
        }

        let mut child = command.spawn().map_err(|source| SystemError::Spawn {
            command: config.command.clone(),
            source,
        })?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SystemError::Protocol("child stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SystemError::Protocol("child stdout unavailable".to_string()))?;

        let client = McpClient::new(
            name,
            stdout,
            stdin,
            Duration::from_secs(config.timeout_secs),
        );
        Self::connect(client, Some(child)).await
    }

    /// Run `initialize`, acknowledge it, and discover every tool the server offers
    pub async fn connect(client: McpClient, child: Option<Child>) -> Result<Self, SystemError> {
        let init = client
            .request(
                "initialize",
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {
                        "name": env!("CARGO_PKG_NAME"),
                        "version": env!("CARGO_PKG_VERSION"),
                    },
                }),
            )
            .await?;

        let instructions = init
            .get("instructions")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let description = match init.pointer("/serverInfo/name").and_then(Value::as_str) {
            Some(server) => {
                let version = init
                    .pointer("/serverInfo/version")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown");
                format!("{} {}", server, version)
            }
            None => client.name().to_string(),
        };

        client
            .notify("notifications/initialized", json!({}))
            .await?;

        let tools = list_tools(&client).await?;
        info!(server = client.name(), tools = tools.len(), "tool provider ready");

        Ok(Self {
            name: client.name().to_string(),
            description,
            instructions,
            tools,
            client,
            _child: child,
        })
    }
}

async fn list_tools(client: &McpClient) -> Result<Vec<Tool>, SystemError> {
    let mut tools = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let params = match &cursor {
            Some(cursor) => json!({"cursor": cursor}),
            None => json!({}),
        };
        let result = client.request("tools/list", params).await?;
        let page: ToolsPage = serde_json::from_value(result)
            .map_err(|e| SystemError::Protocol(format!("malformed tools/list result: {}", e)))?;

        tools.extend(page.tools.into_iter().map(|tool| {
            Tool::new(
                tool.name,
                tool.description.unwrap_or_default(),
                tool.input_schema,
            )
        }));

        match page.next_cursor {
            Some(next) if !next.is_empty() => cursor = Some(next),
            _ => break,
        }
    }
    Ok(tools)
}

fn content_from_mcp(item: Value) -> Content {
    match item.get("type").and_then(Value::as_str) {
        Some("text") => Content::text(item["text"].as_str().unwrap_or_default()),
        Some("image") => Content::image(
            item["data"].as_str().unwrap_or_default(),
            item["mimeType"].as_str().unwrap_or("image/png"),
        ),
        Some("resource") => {
            let resource = &item["resource"];
            match resource.get("text").and_then(Value::as_str) {
                Some(text) => Content::text(text),
                None => Content::text(resource["uri"].as_str().unwrap_or_default()),
            }
        }
        _ => Content::text(item.to_string()),
    }
}

#[async_trait]
impl System for McpSystem {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn instructions(&self) -> &str {
        &self.instructions
    }

    fn tools(&self) -> &[Tool] {
        &self.tools
    }

    async fn call(&self, tool_call: ToolCall) -> AgentResult<Vec<Content>> {
        if !self.tools.iter().any(|tool| tool.name == tool_call.name) {
            return Err(AgentError::ToolNotFound(tool_call.name));
        }

        let arguments = match tool_call.arguments {
            Value::Null => json!({}),
            other => other,
        };
        let result = self
            .client
            .request(
                "tools/call",
                json!({"name": tool_call.name, "arguments": arguments}),
            )
            .await
            .map_err(|e| AgentError::ExecutionError(e.to_string()))?;

        let result: CallToolResult = serde_json::from_value(result)
            .map_err(|e| AgentError::ExecutionError(format!("malformed tools/call result: {}", e)))?;
        let content: Vec<Content> = result.content.into_iter().map(content_from_mcp).collect();

        if result.is_error {
            let message = content
                .iter()
                .filter_map(|c| c.as_text())
                .collect::<Vec<_>>()
                .join("\n");
            return Err(AgentError::ExecutionError(message));
        }
        Ok(content)
    }
}
