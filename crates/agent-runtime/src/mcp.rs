//! MCP Tool Server Client
//!
//! Speaks newline-delimited JSON-RPC 2.0 with a Model Context Protocol server
//! running as a child process, and exposes it as both `ToolCatalog` and
//! `ToolInvoker`. Requests are strictly sequential: one request is written and
//! its response awaited before the connection is released.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};

use agent_core::{
    error::{AgentError, Result},
    tool::{ResultSegment, ToolCatalog, ToolDescriptor, ToolInvoker},
};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, warn};

const PROTOCOL_VERSION: &str = "2024-11-05";

/// JSON-RPC "method not found"
const METHOD_NOT_FOUND: i64 = -32601;

/// Errors raised by the MCP transport
#[derive(Debug, Error)]
pub enum McpError {
    #[error("failed to spawn MCP server '{server}': {source}")]
    Spawn {
        server: String,
        #[source]
        source: std::io::Error,
    },
    #[error("MCP server '{server}' transport error: {message}")]
    Transport { server: String, message: String },
    #[error("MCP server '{server}' sent invalid JSON: {source}")]
    InvalidJson {
        server: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("MCP server '{server}' returned JSON-RPC error {code}: {message}")]
    Rpc {
        server: String,
        code: i64,
        message: String,
    },
    #[error("MCP server '{server}' terminated unexpectedly")]
    Terminated { server: String },
}

impl From<McpError> for AgentError {
    fn from(err: McpError) -> Self {
        match err {
            McpError::Rpc { .. } => Self::ToolExecution(err.to_string()),
            _ => Self::ToolTransport(err.to_string()),
        }
    }
}

/// How to launch a tool server
#[derive(Clone, Debug)]
pub struct McpServerConfig {
    /// Name used in logs and errors
    pub name: String,
    /// Executable
    pub command: String,
    /// Arguments
    pub args: Vec<String>,
    /// Extra environment variables
    pub env: HashMap<String, String>,
}

impl McpServerConfig {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: Vec::new(),
            env: HashMap::new(),
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Launch a Python (`.py`) or Node (`.js`) server script
    pub fn from_script(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let command = match path.extension().and_then(|ext| ext.to_str()) {
            Some("py") => "python",
            Some("js") => "node",
            _ => {
                return Err(AgentError::Config(
                    "Server script must be a .py or .js file".into(),
                ));
            }
        };
        let name = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("mcp-server");

        Ok(Self::new(name, command).arg(path.to_string_lossy()))
    }
}

struct Connection {
    child: Child,
    writer: BufWriter<ChildStdin>,
    lines: Lines<BufReader<ChildStdout>>,
}

enum Inbound {
    Response(Option<u64>),
    Request { id: Value, method: String },
    Notification(String),
    Unknown,
}

impl Inbound {
    fn classify(value: &Value) -> Self {
        let method = value.get("method").and_then(Value::as_str).map(str::to_string);
        match (value.get("id"), method) {
            (Some(id), Some(method)) => Self::Request {
                id: id.clone(),
                method,
            },
            (Some(id), None) => Self::Response(id.as_u64()),
            (None, Some(method)) => Self::Notification(method),
            (None, None) => Self::Unknown,
        }
    }
}

/// Stdio MCP client
pub struct McpClient {
    config: McpServerConfig,
    connection: Mutex<Option<Connection>>,
    next_id: AtomicU64,
    server_name: String,
    instructions: Option<String>,
}

impl McpClient {
    /// Spawn the server and complete the initialize handshake
    pub async fn connect(config: McpServerConfig) -> std::result::Result<Self, McpError> {
        let mut child = Command::new(&config.command)
            .args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| McpError::Spawn {
                server: config.name.clone(),
                source,
            })?;

        let stdin = child.stdin.take().ok_or_else(|| McpError::Transport {
            server: config.name.clone(),
            message: "failed to capture server stdin".into(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| McpError::Transport {
            server: config.name.clone(),
            message: "failed to capture server stdout".into(),
        })?;

        let mut client = Self {
            server_name: config.name.clone(),
            config,
            connection: Mutex::new(Some(Connection {
                child,
                writer: BufWriter::new(stdin),
                lines: BufReader::new(stdout).lines(),
            })),
            next_id: AtomicU64::new(1),
            instructions: None,
        };

        let init = client
            .request(
                "initialize",
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "clientInfo": {
                        "name": env!("CARGO_PKG_NAME"),
                        "version": env!("CARGO_PKG_VERSION"),
                    },
                    "capabilities": {},
                }),
            )
            .await?;
        if let Some(name) = init.pointer("/serverInfo/name").and_then(Value::as_str) {
            client.server_name = name.to_string();
        }
        client.instructions = init
            .get("instructions")
            .and_then(Value::as_str)
            .map(str::to_string);

        client.notify("notifications/initialized", json!({})).await?;
        tracing::info!(server = %client.server_name, "MCP session initialized");
        Ok(client)
    }

    /// Name reported by the server (falls back to the configured name)
    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    /// Usage instructions sent by the server during initialization
    pub fn instructions(&self) -> Option<&str> {
        self.instructions.as_deref()
    }

    /// Kill the server process
    pub async fn shutdown(&self) {
        if let Some(mut connection) = self.connection.lock().await.take() {
            if let Err(err) = connection.child.kill().await {
                debug!(server = %self.config.name, %err, "server already exited");
            }
        }
    }

    fn transport_error(&self, message: impl Into<String>) -> McpError {
        McpError::Transport {
            server: self.config.name.clone(),
            message: message.into(),
        }
    }

    fn terminated(&self) -> McpError {
        McpError::Terminated {
            server: self.config.name.clone(),
        }
    }

    async fn write_message(&self, connection: &mut Connection, message: &Value) -> std::result::Result<(), McpError> {
        let mut encoded = serde_json::to_string(message).map_err(|source| McpError::InvalidJson {
            server: self.config.name.clone(),
            source,
        })?;
        encoded.push('\n');

        connection
            .writer
            .write_all(encoded.as_bytes())
            .await
            .map_err(|e| self.transport_error(e.to_string()))?;
        connection
            .writer
            .flush()
            .await
            .map_err(|e| self.transport_error(e.to_string()))
    }

    async fn notify(&self, method: &str, params: Value) -> std::result::Result<(), McpError> {
        let mut guard = self.connection.lock().await;
        let connection = guard.as_mut().ok_or_else(|| self.terminated())?;
        let payload = json!({"jsonrpc": "2.0", "method": method, "params": params});
        self.write_message(connection, &payload).await
    }

    /// Send one request and wait for its response, servicing anything the
    /// server sends in between
    async fn request(&self, method: &str, params: Value) -> std::result::Result<Value, McpError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut guard = self.connection.lock().await;
        let connection = guard.as_mut().ok_or_else(|| self.terminated())?;

        let payload = json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params});
        self.write_message(connection, &payload).await?;

        loop {
            let raw = connection
                .lines
                .next_line()
                .await
                .map_err(|e| self.transport_error(e.to_string()))?
                .ok_or_else(|| self.terminated())?;

            let trimmed = raw.trim();
            if trimmed.is_empty() {
                continue;
            }
            let value: Value = match serde_json::from_str(trimmed) {
                Ok(value) => value,
                Err(err) => {
                    debug!(server = %self.config.name, line = trimmed, %err, "skipping non-JSON line");
                    continue;
                }
            };

            match Inbound::classify(&value) {
                Inbound::Response(Some(response_id)) if response_id == id => {
                    return self.response_result(value);
                }
                Inbound::Response(other) => {
                    debug!(server = %self.config.name, response_id = ?other, "response for unknown request");
                }
                Inbound::Request { id: request_id, method } => {
                    let reply = if method == "ping" {
                        json!({"jsonrpc": "2.0", "id": request_id, "result": {}})
                    } else {
                        warn!(server = %self.config.name, %method, "server sent unsupported request");
                        json!({
                            "jsonrpc": "2.0",
                            "id": request_id,
                            "error": {
                                "code": METHOD_NOT_FOUND,
                                "message": format!("client does not implement method '{method}'"),
                            }
                        })
                    };
                    self.write_message(connection, &reply).await?;
                }
                Inbound::Notification(method) => {
                    debug!(server = %self.config.name, %method, "notification from server");
                }
                Inbound::Unknown => {
                    debug!(server = %self.config.name, "ignoring message without id or method");
                }
            }
        }
    }

    fn response_result(&self, mut response: Value) -> std::result::Result<Value, McpError> {
        if let Some(error) = response.get("error") {
            return Err(McpError::Rpc {
                server: self.config.name.clone(),
                code: error.get("code").and_then(Value::as_i64).unwrap_or(-32000),
                message: error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_string(),
            });
        }
        Ok(response
            .get_mut("result")
            .map(Value::take)
            .unwrap_or(Value::Null))
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct McpTool {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    input_schema: Option<Value>,
}

/// Descriptors and the pagination cursor from a `tools/list` result
fn parse_tool_list(result: &Value) -> Result<(Vec<ToolDescriptor>, Option<String>)> {
    let tools = match result.get("tools") {
        Some(tools) => Vec::<McpTool>::deserialize(tools)?,
        None => Vec::new(),
    };
    let descriptors = tools
        .into_iter()
        .map(|tool| ToolDescriptor {
            name: tool.name,
            description: tool.description.unwrap_or_default(),
            input_schema: tool
                .input_schema
                .filter(Value::is_object)
                .unwrap_or_else(|| json!({"type": "object"})),
        })
        .collect();
    let cursor = result
        .get("nextCursor")
        .and_then(Value::as_str)
        .map(str::to_string);
    Ok((descriptors, cursor))
}

/// Content items of a `tools/call` result as segments
fn parse_call_result(result: &Value) -> Vec<ResultSegment> {
    result
        .get("content")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .map(|item| match item.get("text").and_then(Value::as_str) {
                    Some(text) if item.get("type").and_then(Value::as_str) == Some("text") => {
                        ResultSegment::text(text)
                    }
                    _ => ResultSegment::text(item.to_string()),
                })
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl ToolCatalog for McpClient {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let params = cursor.map_or_else(|| json!({}), |c| json!({"cursor": c}));
            let result = self.request("tools/list", params).await?;
            let (page, next) = parse_tool_list(&result)?;
            tools.extend(page);
            match next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        Ok(tools)
    }
}

#[async_trait]
impl ToolInvoker for McpClient {
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Vec<ResultSegment>> {
        let arguments = match arguments {
            Value::Null => json!({}),
            other => other,
        };
        let result = self
            .request("tools/call", json!({"name": name, "arguments": arguments}))
            .await?;

        if result.get("isError").and_then(Value::as_bool) == Some(true) {
            warn!(server = %self.config.name, tool = name, "tool reported an error result");
        }
        Ok(parse_call_result(&result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_script() {
        let py = McpServerConfig::from_script("servers/weather.py").unwrap();
        assert_eq!(py.command, "python");
        assert_eq!(py.args, vec!["servers/weather.py".to_string()]);
        assert_eq!(py.name, "weather");

        let js = McpServerConfig::from_script("build/index.js").unwrap();
        assert_eq!(js.command, "node");

        let err = McpServerConfig::from_script("server.rb").unwrap_err();
        assert!(matches!(err, AgentError::Config(_)));
    }

    #[test]
    fn test_parse_tool_list() {
        let result = json!({
            "tools": [
                {
                    "name": "echo",
                    "description": "Echo text",
                    "inputSchema": {"type": "object", "properties": {"text": {"type": "string"}}}
                },
                {"name": "ping"}
            ],
            "nextCursor": "page-2"
        });

        let (tools, cursor) = parse_tool_list(&result).unwrap();
        assert_eq!(tools.len(), 2);
        assert_eq!(tools[0].description, "Echo text");
        assert_eq!(tools[0].input_schema["properties"]["text"]["type"], "string");
        assert_eq!(tools[1].input_schema, json!({"type": "object"}));
        assert_eq!(cursor.as_deref(), Some("page-2"));
    }

    #[test]
    fn test_parse_call_result() {
        let result = json!({
            "content": [
                {"type": "text", "text": "first"},
                {"type": "image", "data": "AAAA", "mimeType": "image/png"}
            ],
            "isError": false
        });

        let segments = parse_call_result(&result);
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0], ResultSegment::text("first"));
        assert!(segments[1].text.contains("image/png"));

        assert!(parse_call_result(&json!({})).is_empty());
    }

    #[test]
    fn test_inbound_classification() {
        assert!(matches!(
            Inbound::classify(&json!({"jsonrpc": "2.0", "id": 3, "result": {}})),
            Inbound::Response(Some(3))
        ));
        assert!(matches!(
            Inbound::classify(&json!({"jsonrpc": "2.0", "id": "s-1", "method": "ping"})),
            Inbound::Request { ref method, .. } if method == "ping"
        ));
        assert!(matches!(
            Inbound::classify(&json!({"jsonrpc": "2.0", "method": "notifications/message"})),
            Inbound::Notification(_)
        ));
    }

    #[test]
    fn test_error_conversion() {
        let rpc = McpError::Rpc {
            server: "demo".into(),
            code: -32602,
            message: "bad params".into(),
        };
        assert!(matches!(AgentError::from(rpc), AgentError::ToolExecution(_)));

        let gone = McpError::Terminated { server: "demo".into() };
        assert!(matches!(AgentError::from(gone), AgentError::ToolTransport(_)));
    }

    /// Scripted stdio server. Interleaves a banner line, a ping, an
    /// unsupported request and a notification with its responses, and
    /// reports in the first tool description whether the client answered
    /// the two server requests correctly.
    const SCRIPTED_SERVER: &str = r#"
read -r init
printf '%s\n' 'starting fake server...'
printf '%s\n' '{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2024-11-05","capabilities":{"tools":{}},"serverInfo":{"name":"fake-server","version":"0.0.1"},"instructions":"be nice"}}'
read -r initialized
read -r list1
printf '%s\n' '{"jsonrpc":"2.0","id":"srv-1","method":"ping"}'
read -r pong
printf '%s\n' '{"jsonrpc":"2.0","id":"srv-2","method":"roots/list"}'
read -r rejected
ping=bad
case "$pong" in *'"srv-1"'*) case "$pong" in *'"result":{}'*) ping=ok;; esac;; esac
roots=bad
case "$rejected" in *'"srv-2"'*) case "$rejected" in *-32601*) roots=ok;; esac;; esac
printf '%s\n' '{"jsonrpc":"2.0","method":"notifications/message","params":{}}'
printf '{"jsonrpc":"2.0","id":2,"result":{"tools":[{"name":"echo","description":"ping=%s roots=%s"}],"nextCursor":"page-2"}}\n' "$ping" "$roots"
read -r list2
second=missing_cursor
case "$list2" in *'"cursor":"page-2"'*) second=second;; esac
printf '{"jsonrpc":"2.0","id":3,"result":{"tools":[{"name":"%s"}]}}\n' "$second"
read -r call
printf '%s\n' '{"jsonrpc":"2.0","id":4,"result":{"content":[{"type":"text","text":"s0"},{"type":"text","text":"s1"}]}}'
read -r failing
printf '%s\n' '{"jsonrpc":"2.0","id":5,"error":{"code":-32602,"message":"bad"}}'
read -r rest
"#;

    fn scripted_server(script: &str) -> McpServerConfig {
        McpServerConfig::new("fake", "sh").arg("-c").arg(script)
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stdio_session_with_scripted_server() {
        let client = McpClient::connect(scripted_server(SCRIPTED_SERVER)).await.unwrap();
        assert_eq!(client.server_name(), "fake-server");
        assert_eq!(client.instructions(), Some("be nice"));

        let tools = client.list_tools().await.unwrap();
        let names: Vec<&str> = tools.iter().map(|tool| tool.name.as_str()).collect();
        assert_eq!(names, ["echo", "second"]);
        assert_eq!(tools[0].description, "ping=ok roots=ok");

        let segments = client.call_tool("echo", json!({"text": "hi"})).await.unwrap();
        assert_eq!(segments, vec![ResultSegment::text("s0"), ResultSegment::text("s1")]);

        let err = client.call_tool("echo", json!({})).await.unwrap_err();
        assert!(
            matches!(&err, AgentError::ToolExecution(msg) if msg.contains("-32602: bad")),
            "unexpected error: {err}"
        );

        client.shutdown().await;
        let err = client.list_tools().await.unwrap_err();
        assert!(matches!(err, AgentError::ToolTransport(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_server_exit_during_handshake() {
        let result = McpClient::connect(scripted_server("read -r init; exit 0")).await;
        assert!(matches!(result, Err(McpError::Terminated { ref server }) if server == "fake"));
    }
}
