//! MCP client sessions: JSON-RPC 2.0 over subprocess stdio or streaming
//! HTTP.
//!
//! Both transports speak the same handshake — `initialize`, the
//! `notifications/initialized` notification, then `tools/list` and
//! `tools/call`. Sessions are short-lived: one per discovery or call.
//!
//! The canonical output of a call is the first text-typed content part;
//! a non-text first part is stringified; an empty result reads
//! `"(no output)"`.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::debug;

/// Protocol revision sent in the handshake.
const MCP_PROTOCOL_VERSION: &str = "2025-03-26";

/// Bounded timeout for HTTP MCP requests.
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// One remote tool as reported by `tools/list`.
#[derive(Clone, Debug)]
pub struct McpToolInfo {
    pub name: String,
    pub description: String,
    /// JSON Schema of the tool's arguments.
    pub parameters: Value,
    /// Optional usage hint from the tool's metadata.
    pub usage: Option<String>,
}

// ─────────────────────────────────────────────
// Stdio transport
// ─────────────────────────────────────────────

/// A session over a spawned subprocess, newline-delimited JSON-RPC on its
/// stdio.
#[derive(Debug)]
pub struct StdioSession {
    child: Child,
    stdin: ChildStdin,
    lines: Lines<BufReader<ChildStdout>>,
    next_id: i64,
}

impl StdioSession {
    /// Spawn the server and complete the handshake.
    pub async fn connect(command: &str, args: &[String]) -> anyhow::Result<Self> {
        debug!(command, "spawning stdio MCP server");
        let mut child = Command::new(command)
            .args(args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| anyhow::anyhow!("failed to spawn '{command}': {e}"))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow::anyhow!("no stdin pipe for '{command}'"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow::anyhow!("no stdout pipe for '{command}'"))?;

        let mut session = Self {
            child,
            stdin,
            lines: BufReader::new(stdout).lines(),
            next_id: 0,
        };
        session.handshake().await?;
        Ok(session)
    }

    async fn handshake(&mut self) -> anyhow::Result<()> {
        self.request("initialize", initialize_params()).await?;
        self.notify("notifications/initialized", json!({})).await?;
        Ok(())
    }

    /// List the server's tools.
    pub async fn list_tools(&mut self) -> anyhow::Result<Vec<McpToolInfo>> {
        let result = self.request("tools/list", json!({})).await?;
        Ok(parse_tool_list(&result))
    }

    /// Invoke one tool and extract its canonical output.
    pub async fn call_tool(
        &mut self,
        name: &str,
        arguments: &HashMap<String, Value>,
    ) -> anyhow::Result<String> {
        let result = self
            .request("tools/call", json!({"name": name, "arguments": arguments}))
            .await?;
        Ok(extract_text_content(&result))
    }

    /// Tear the subprocess down.
    pub async fn shutdown(mut self) {
        drop(self.stdin);
        let _ = self.child.kill().await;
    }

    async fn request(&mut self, method: &str, params: Value) -> anyhow::Result<Value> {
        self.next_id += 1;
        let id = self.next_id;
        self.send(&json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        }))
        .await?;

        loop {
            let line = self
                .lines
                .next_line()
                .await
                .map_err(|e| anyhow::anyhow!("read from MCP server failed: {e}"))?
                .ok_or_else(|| {
                    anyhow::anyhow!("MCP server closed the stream during '{method}'")
                })?;
            if line.trim().is_empty() {
                continue;
            }
            let Ok(message) = serde_json::from_str::<Value>(&line) else {
                debug!(line = %line, "skipping non-JSON line from MCP server");
                continue;
            };
            // Server-initiated notifications and unrelated ids are skipped.
            if message.get("id").and_then(Value::as_i64) != Some(id) {
                continue;
            }
            return unpack_response(message, method);
        }
    }

    async fn notify(&mut self, method: &str, params: Value) -> anyhow::Result<()> {
        self.send(&json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
        }))
        .await
    }

    async fn send(&mut self, frame: &Value) -> anyhow::Result<()> {
        let mut line = serde_json::to_string(frame)?;
        line.push('\n');
        self.stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| anyhow::anyhow!("write to MCP server failed: {e}"))?;
        self.stdin
            .flush()
            .await
            .map_err(|e| anyhow::anyhow!("flush to MCP server failed: {e}"))?;
        Ok(())
    }
}

// ─────────────────────────────────────────────
// HTTP transport
// ─────────────────────────────────────────────

/// A session against a streamable-HTTP MCP endpoint.
///
/// HTTP/1.1 only, redirects enabled, proxies explicitly disabled. Responses
/// may be plain JSON or an SSE stream of `data:` lines; the session id
/// header is carried across requests.
pub struct HttpSession {
    client: reqwest::Client,
    url: String,
    session_id: Option<String>,
    next_id: i64,
}

impl HttpSession {
    /// Connect and complete the handshake.
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        debug!(url, "connecting to HTTP MCP server");
        let client = reqwest::Client::builder()
            .http1_only()
            .timeout(HTTP_TIMEOUT)
            .no_proxy()
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build HTTP client: {e}"))?;

        let mut session = Self {
            client,
            url: url.to_string(),
            session_id: None,
            next_id: 0,
        };
        session.request("initialize", initialize_params()).await?;
        session
            .notify("notifications/initialized", json!({}))
            .await?;
        Ok(session)
    }

    pub async fn list_tools(&mut self) -> anyhow::Result<Vec<McpToolInfo>> {
        let result = self.request("tools/list", json!({})).await?;
        Ok(parse_tool_list(&result))
    }

    pub async fn call_tool(
        &mut self,
        name: &str,
        arguments: &HashMap<String, Value>,
    ) -> anyhow::Result<String> {
        let result = self
            .request("tools/call", json!({"name": name, "arguments": arguments}))
            .await?;
        Ok(extract_text_content(&result))
    }

    async fn request(&mut self, method: &str, params: Value) -> anyhow::Result<Value> {
        self.next_id += 1;
        let id = self.next_id;
        let messages = self
            .post(&json!({
                "jsonrpc": "2.0",
                "id": id,
                "method": method,
                "params": params,
            }))
            .await?;

        for message in messages {
            if message.get("id").and_then(Value::as_i64) == Some(id) {
                return unpack_response(message, method);
            }
        }
        anyhow::bail!("no response from MCP endpoint for '{method}'")
    }

    async fn notify(&mut self, method: &str, params: Value) -> anyhow::Result<()> {
        self.post(&json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
        }))
        .await?;
        Ok(())
    }

    /// POST one JSON-RPC frame; returns every JSON-RPC message in the
    /// response body (one for JSON responses, possibly several for SSE).
    async fn post(&mut self, frame: &Value) -> anyhow::Result<Vec<Value>> {
        let mut request = self
            .client
            .post(&self.url)
            .header(reqwest::header::ACCEPT, "application/json, text/event-stream")
            .json(frame);
        if let Some(session_id) = &self.session_id {
            request = request.header("Mcp-Session-Id", session_id);
        }

        let response = request
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("MCP endpoint unreachable: {e}"))?;

        if let Some(session_id) = response
            .headers()
            .get("mcp-session-id")
            .and_then(|v| v.to_str().ok())
        {
            self.session_id = Some(session_id.to_string());
        }

        let status = response.status();
        if status == reqwest::StatusCode::ACCEPTED {
            return Ok(Vec::new());
        }
        if !status.is_success() {
            anyhow::bail!("MCP endpoint returned {status}");
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let body = response
            .text()
            .await
            .map_err(|e| anyhow::anyhow!("failed to read MCP response: {e}"))?;

        if content_type.contains("text/event-stream") {
            Ok(parse_sse_messages(&body))
        } else if body.trim().is_empty() {
            Ok(Vec::new())
        } else {
            Ok(vec![serde_json::from_str(&body)
                .map_err(|e| anyhow::anyhow!("unparseable MCP response: {e}"))?])
        }
    }
}

/// Extract each `data:` payload of an SSE body as a JSON value.
fn parse_sse_messages(body: &str) -> Vec<Value> {
    body.lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .filter_map(|data| serde_json::from_str(data.trim()).ok())
        .collect()
}

// ─────────────────────────────────────────────
// Shared frame handling
// ─────────────────────────────────────────────

fn initialize_params() -> Value {
    json!({
        "protocolVersion": MCP_PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": {
            "name": "aisbot",
            "version": env!("CARGO_PKG_VERSION"),
        },
    })
}

fn unpack_response(message: Value, method: &str) -> anyhow::Result<Value> {
    if let Some(error) = message.get("error") {
        let detail = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        anyhow::bail!("MCP '{method}' failed: {detail}");
    }
    Ok(message.get("result").cloned().unwrap_or(Value::Null))
}

fn parse_tool_list(result: &Value) -> Vec<McpToolInfo> {
    result
        .get("tools")
        .and_then(Value::as_array)
        .map(|tools| {
            tools
                .iter()
                .filter_map(|tool| {
                    let name = tool.get("name")?.as_str()?.to_string();
                    Some(McpToolInfo {
                        name,
                        description: tool
                            .get("description")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                        parameters: tool
                            .get("inputSchema")
                            .cloned()
                            .unwrap_or_else(|| json!({"type": "object", "properties": {}})),
                        usage: tool
                            .get("_meta")
                            .and_then(|meta| meta.get("usage"))
                            .and_then(Value::as_str)
                            .map(String::from),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

/// First text part → its text; other first part → stringified; nothing →
/// `"(no output)"`.
fn extract_text_content(result: &Value) -> String {
    let Some(parts) = result.get("content").and_then(Value::as_array) else {
        return "(no output)".to_string();
    };
    let Some(first) = parts.first() else {
        return "(no output)".to_string();
    };
    if first.get("type").and_then(Value::as_str) == Some("text") {
        first
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    } else {
        first.to_string()
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

    #[test]
    fn text_content_extraction_rules() {
        let text = json!({"content": [{"type": "text", "text": "3"}]});
        assert_eq!(extract_text_content(&text), "3");

        let non_text = json!({"content": [{"type": "image", "data": "…"}]});
        assert!(extract_text_content(&non_text).contains("image"));

        assert_eq!(extract_text_content(&json!({"content": []})), "(no output)");
        assert_eq!(extract_text_content(&json!({})), "(no output)");
    }

    #[test]
    fn tool_list_parsing_handles_metadata() {
        let result = json!({
            "tools": [
                {
                    "name": "add",
                    "description": "Add two numbers",
                    "inputSchema": {
                        "type": "object",
                        "properties": {"a": {"type": "number"}, "b": {"type": "number"}},
                        "required": ["a", "b"]
                    },
                    "_meta": {"usage": "add(a=1, b=2)"}
                },
                {"name": "bare"}
            ]
        });
        let tools = parse_tool_list(&result);
        assert_eq!(tools.len(), 2);
        assert_eq!(tools[0].name, "add");
        assert_eq!(tools[0].usage.as_deref(), Some("add(a=1, b=2)"));
        assert_eq!(tools[1].description, "");
        assert_eq!(tools[1].parameters["type"], "object");
    }

    #[test]
    fn sse_bodies_yield_every_data_line() {
        let body = "event: message\ndata: {\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{}}\n\n\
                    data: {\"jsonrpc\":\"2.0\",\"method\":\"notifications/progress\"}\n\n";
        let messages = parse_sse_messages(body);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["id"], 1);
    }

    // A scripted JSON-RPC responder for the HTTP transport.
    struct Scripted;

    impl Respond for Scripted {
        fn respond(&self, request: &Request) -> ResponseTemplate {
            let frame: Value = serde_json::from_slice(&request.body).unwrap();
            let id = frame.get("id").cloned();
            let method = frame["method"].as_str().unwrap_or("");
            match (method, id) {
                ("initialize", Some(id)) => ResponseTemplate::new(200)
                    .insert_header("mcp-session-id", "sess-1")
                    .set_body_json(json!({
                        "jsonrpc": "2.0", "id": id,
                        "result": {"protocolVersion": "2025-03-26", "capabilities": {}}
                    })),
                ("notifications/initialized", None) => ResponseTemplate::new(202),
                ("tools/list", Some(id)) => {
                    // Exercise the SSE path for discovery.
                    let message = json!({
                        "jsonrpc": "2.0", "id": id,
                        "result": {"tools": [{
                            "name": "add",
                            "description": "Add",
                            "inputSchema": {"type": "object", "properties": {
                                "a": {"type": "number"}, "b": {"type": "number"}
                            }, "required": ["a", "b"]}
                        }]}
                    });
                    ResponseTemplate::new(200)
                        .set_body_raw(
                            format!("event: message\ndata: {message}\n\n"),
                            "text/event-stream",
                        )
                }
                ("tools/call", Some(id)) => {
                    assert_eq!(
                        request.headers.get("mcp-session-id").unwrap().to_str().unwrap(),
                        "sess-1"
                    );
                    ResponseTemplate::new(200).set_body_json(json!({
                        "jsonrpc": "2.0", "id": id,
                        "result": {"content": [{"type": "text", "text": "3"}]}
                    }))
                }
                _ => ResponseTemplate::new(400),
            }
        }
    }

    #[tokio::test]
    async fn http_session_full_handshake_list_and_call() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/mcp"))
            .respond_with(Scripted)
            .mount(&server)
            .await;

        let mut session = HttpSession::connect(&format!("{}/mcp", server.uri()))
            .await
            .unwrap();

        let tools = session.list_tools().await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "add");

        let mut args = HashMap::new();
        args.insert("a".to_string(), json!(1));
        args.insert("b".to_string(), json!(2));
        let result = session.call_tool("add", &args).await.unwrap();
        assert_eq!(result, "3");
    }

    #[tokio::test]
    async fn http_connect_fails_cleanly_when_unreachable() {
        let result = HttpSession::connect("http://127.0.0.1:1/mcp").await;
        assert!(result.is_err());
    }

    /// A minimal stdio MCP server: pre-scripted responses for ids 1..=3,
    /// then drains stdin so writes never fail.
    fn scripted_stdio_server() -> (String, Vec<String>) {
        let init = r#"{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2025-03-26"}}"#;
        let list = r#"{"jsonrpc":"2.0","id":2,"result":{"tools":[{"name":"ping","description":"Ping","inputSchema":{"type":"object","properties":{}}}]}}"#;
        let call = r#"{"jsonrpc":"2.0","id":3,"result":{"content":[{"type":"text","text":"pong"}]}}"#;
        let script = format!(
            "printf '%s\\n' '{init}' '{list}' '{call}'; cat > /dev/null"
        );
        ("sh".to_string(), vec!["-c".to_string(), script])
    }

    #[tokio::test]
    async fn stdio_session_handshake_list_and_call() {
        let (command, args) = scripted_stdio_server();
        let mut session = StdioSession::connect(&command, &args).await.unwrap();

        let tools = session.list_tools().await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "ping");

        let result = session.call_tool("ping", &HashMap::new()).await.unwrap();
        assert_eq!(result, "pong");
        session.shutdown().await;
    }

    #[tokio::test]
    async fn stdio_connect_fails_for_missing_binary() {
        let result = StdioSession::connect("definitely-not-a-real-mcp-server", &[]).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn stdio_error_response_surfaces_message() {
        let error = r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32601,"message":"nope"}}"#;
        let script = format!("printf '%s\\n' '{error}'; cat > /dev/null");
        let result = StdioSession::connect("sh", &["-c".to_string(), script]).await;
        let err = result.unwrap_err().to_string();
        assert!(err.contains("nope"));
    }
}
