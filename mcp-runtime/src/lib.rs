use std::sync::Arc;

use clap::Subcommand;
use serde_json::{Map, Value, json};
use teams_core::args::{
    parse_channel_post_message_args, parse_channel_post_rich_message_args,
    parse_list_messages_args, parse_post_message_args, parse_update_message_args,
    validate_post_rich_message_args,
};
use teams_core::error::{ErrorCategory, ValidationError, codes};
use tokio::io::{
    self, AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};

mod auth;
mod config;
mod outbound;
mod schema;
mod util;

pub use config::{ApiVariant, McpServeArgs};

use auth::{AuthError, TokenBroker};
use config::{ConfigError, RuntimeConfig, VariantConfig};
use outbound::{BotConnector, GraphClient, SendError, TransportError};
use util::{client, to_pretty_json};

const MCP_PROTOCOL_VERSION: &str = "2024-11-05";
const MCP_SERVER_NAME: &str = "teams-mcp";
/// Largest Content-Length accepted from the client.
const MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

#[derive(Subcommand)]
pub enum McpCommands {
    /// Run the Teams MCP server over stdio
    Serve(McpServeArgs),
    /// Check configuration and credentials against the live API, then exit
    Diagnose(McpServeArgs),
}

pub async fn run(command: McpCommands) -> i32 {
    let (args, diagnose) = match command {
        McpCommands::Serve(args) => (args, false),
        McpCommands::Diagnose(args) => (args, true),
    };

    let server = match args.resolve().and_then(|config| McpServer::from_config(&config)) {
        Ok(server) => server,
        Err(err) => {
            let err = ToolError::from(err);
            tracing::error!(
                error = %err.code,
                message = %err.message,
                "startup configuration rejected"
            );
            eprintln!("{}", to_pretty_json(&err.to_value()));
            return 1;
        }
    };

    if diagnose {
        let report = server.run_diagnostics().await;
        println!("{}", to_pretty_json(&report));
        return if report.get("status").and_then(Value::as_str) == Some("ready") {
            0
        } else {
            2
        };
    }

    let mut reader = BufReader::new(io::stdin());
    let mut stdout = io::stdout();
    match server.serve(&mut reader, &mut stdout).await {
        Ok(()) => 0,
        Err(err) => {
            let payload = json!({
                "error": "mcp_server_error",
                "message": err,
            });
            eprintln!("{}", to_pretty_json(&payload));
            1
        }
    }
}

/// Outbound side of the server; exactly one variant is live per process.
enum Channel {
    Bot(BotConnector),
    Graph(GraphClient),
}

struct McpServer {
    channel: Channel,
}

impl McpServer {
    fn from_config(config: &RuntimeConfig) -> Result<Self, ConfigError> {
        let http = client(config.http_timeout)?;
        let channel = match &config.variant {
            VariantConfig::Bot(bot) => {
                let broker = Arc::new(TokenBroker::new(bot.credentials.clone(), http.clone()));
                Channel::Bot(BotConnector::new(bot, http, broker))
            }
            VariantConfig::Graph(graph) => Channel::Graph(GraphClient::new(graph, http)),
        };
        Ok(Self { channel })
    }

    fn variant(&self) -> ApiVariant {
        match self.channel {
            Channel::Bot(_) => ApiVariant::Bot,
            Channel::Graph(_) => ApiVariant::Graph,
        }
    }

    async fn serve<R, W>(&self, reader: &mut R, writer: &mut W) -> Result<(), String>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let tools: Vec<&str> = tool_definitions(self.variant())
            .iter()
            .map(|tool| tool.name)
            .collect();
        tracing::info!(
            server = MCP_SERVER_NAME,
            version = env!("CARGO_PKG_VERSION"),
            api = self.variant().as_str(),
            tools = ?tools,
            "mcp server listening on stdio"
        );

        loop {
            let frame = read_frame(reader)
                .await
                .map_err(|e| format!("Failed to read MCP message: {e}"))?;
            let Some(frame) = frame else {
                break;
            };

            let responses = match serde_json::from_slice::<Value>(&frame) {
                Ok(incoming) => self.handle_incoming_message(incoming).await,
                Err(err) => {
                    tracing::warn!(error = %err, bytes = frame.len(), "undecodable MCP frame");
                    vec![error_response(
                        Value::Null,
                        RpcError::parse_error(format!("Invalid JSON payload: {err}")),
                    )]
                }
            };
            for response in responses {
                write_framed_json(writer, &response)
                    .await
                    .map_err(|e| format!("Failed to write MCP response: {e}"))?;
            }
        }

        tracing::info!("stdin closed, shutting down");
        Ok(())
    }

    async fn handle_incoming_message(&self, incoming: Value) -> Vec<Value> {
        let mut responses = Vec::new();

        if let Some(batch) = incoming.as_array() {
            if batch.is_empty() {
                responses.push(error_response(
                    Value::Null,
                    RpcError::invalid_request("Batch request must not be empty"),
                ));
                return responses;
            }
            for item in batch {
                if let Some(response) = self.handle_single_message(item.clone()).await {
                    responses.push(response);
                }
            }
            return responses;
        }

        if let Some(response) = self.handle_single_message(incoming).await {
            responses.push(response);
        }
        responses
    }

    async fn handle_single_message(&self, incoming: Value) -> Option<Value> {
        let Some(obj) = incoming.as_object() else {
            return Some(error_response(
                Value::Null,
                RpcError::invalid_request("Request must be a JSON object"),
            ));
        };

        if obj.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
            let id = obj.get("id").cloned().unwrap_or(Value::Null);
            return Some(error_response(
                id,
                RpcError::invalid_request("jsonrpc must be '2.0'"),
            ));
        }

        // Responses from the client carry no method; the server never issues requests.
        let method = obj.get("method").and_then(Value::as_str)?;

        let params = obj.get("params").cloned().unwrap_or(Value::Null);
        match obj.get("id").cloned() {
            Some(id) => Some(match self.handle_request(method, params).await {
                Ok(payload) => success_response(id, payload),
                Err(err) => error_response(id, err),
            }),
            None => {
                tracing::debug!(method, "notification ignored");
                None
            }
        }
    }

    async fn handle_request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        match method {
            "initialize" => Ok(self.initialize_payload()),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(self.tools_list_payload()),
            "tools/call" => self.handle_tools_call(params).await,
            "resources/list" => Ok(json!({ "resources": [] })),
            "prompts/list" => Ok(json!({ "prompts": [] })),
            _ => Err(RpcError::method_not_found(method)),
        }
    }

    fn initialize_payload(&self) -> Value {
        let instructions = match self.variant() {
            ApiVariant::Bot => {
                "Posts into one Teams conversation as the configured bot. Use post_message for plain markdown, post_rich_message for an Adaptive Card (with optional fallback text) and update_message to edit a posted activity by the id it returned."
            }
            ApiVariant::Graph => {
                "Posts into Teams channels as the signed-in user. Every call names team_id and channel_id. Use post_channel_message for HTML text, post_channel_rich_message for an Adaptive Card and list_channel_messages to read recent messages."
            }
        };
        json!({
            "protocolVersion": MCP_PROTOCOL_VERSION,
            "capabilities": {
                "tools": { "listChanged": false },
                "resources": { "listChanged": false },
                "prompts": { "listChanged": false }
            },
            "serverInfo": {
                "name": MCP_SERVER_NAME,
                "version": env!("CARGO_PKG_VERSION")
            },
            "instructions": instructions
        })
    }

    fn tools_list_payload(&self) -> Value {
        let tools: Vec<Value> = tool_definitions(self.variant())
            .into_iter()
            .map(|tool| {
                json!({
                    "name": tool.name,
                    "description": tool.description,
                    "inputSchema": tool.input_schema,
                })
            })
            .collect();
        json!({ "tools": tools })
    }

    async fn handle_tools_call(&self, params: Value) -> Result<Value, RpcError> {
        let params = params
            .as_object()
            .ok_or_else(|| RpcError::invalid_params("tools/call params must be an object"))?;

        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::invalid_params("tools/call requires string field 'name'"))?;

        let args = match params.get("arguments") {
            Some(Value::Object(map)) => map.clone(),
            Some(Value::Null) | None => Map::new(),
            Some(_) => {
                return Err(RpcError::invalid_params(
                    "tools/call 'arguments' must be an object",
                ));
            }
        };

        Ok(match self.execute_tool(name, &Value::Object(args)).await {
            Ok(payload) => {
                tracing::info!(tool = name, "tool call succeeded");
                let envelope = json!({
                    "status": "ok",
                    "tool": name,
                    "data": payload
                });
                build_tool_call_response(envelope, false)
            }
            Err(err) => {
                tracing::warn!(
                    tool = name,
                    error = %err.code,
                    field = err.field.as_deref().unwrap_or_default(),
                    message = %err.message,
                    "tool call failed"
                );
                let envelope = json!({
                    "status": "error",
                    "tool": name,
                    "error": err.to_value()
                });
                build_tool_call_response(envelope, true)
            }
        })
    }

    async fn execute_tool(&self, tool_name: &str, args: &Value) -> Result<Value, ToolError> {
        match (&self.channel, tool_name) {
            (Channel::Bot(bot), "post_message") => {
                let args = parse_post_message_args(args)?;
                Ok(bot.post_message(&args).await?)
            }
            (Channel::Bot(bot), "post_rich_message") => {
                let args = validate_post_rich_message_args(args)?;
                Ok(bot.post_rich_message(&args).await?)
            }
            (Channel::Bot(bot), "update_message") => {
                let args = parse_update_message_args(args)?;
                Ok(bot.update_message(&args).await?)
            }
            (Channel::Graph(graph), "post_channel_message") => {
                let args = parse_channel_post_message_args(args)?;
                Ok(graph.post_message(&args).await?)
            }
            (Channel::Graph(graph), "post_channel_rich_message") => {
                let args = parse_channel_post_rich_message_args(args)?;
                Ok(graph.post_rich_message(&args).await?)
            }
            (Channel::Graph(graph), "list_channel_messages") => {
                let args = parse_list_messages_args(args)?;
                Ok(graph.list_messages(&args).await?)
            }
            _ => Err(ToolError::new(
                codes::UNKNOWN_TOOL,
                format!("Unknown tool '{tool_name}'"),
            )
            .with_field("name")
            .with_details(json!({
                "api": self.variant().as_str(),
                "available_tools": tool_definitions(self.variant())
                    .iter()
                    .map(|tool| tool.name)
                    .collect::<Vec<_>>()
            }))),
        }
    }

    /// One live round trip per variant: a token exchange for the bot, `/me` for Graph.
    async fn run_diagnostics(&self) -> Value {
        let check = match &self.channel {
            Channel::Bot(bot) => {
                let endpoint = bot.broker().token_endpoint();
                match bot.broker().get_token().await {
                    Ok(token) => json!({
                        "check": "token_exchange",
                        "ok": true,
                        "endpoint": endpoint,
                        "expires_at": token.expires_at.to_rfc3339(),
                    }),
                    Err(err) => json!({
                        "check": "token_exchange",
                        "ok": false,
                        "endpoint": endpoint,
                        "error": ToolError::from(err).to_value(),
                    }),
                }
            }
            Channel::Graph(graph) => match graph.whoami().await {
                Ok(me) => json!({ "check": "graph_me", "ok": true, "user": me }),
                Err(err) => json!({
                    "check": "graph_me",
                    "ok": false,
                    "error": ToolError::from(err).to_value(),
                }),
            },
        };

        let ready = check.get("ok").and_then(Value::as_bool) == Some(true);
        json!({
            "server": MCP_SERVER_NAME,
            "version": env!("CARGO_PKG_VERSION"),
            "api": self.variant().as_str(),
            "status": if ready { "ready" } else { "degraded" },
            "tools": tool_definitions(self.variant())
                .iter()
                .map(|tool| tool.name)
                .collect::<Vec<_>>(),
            "checks": [check],
        })
    }
}

fn build_tool_call_response(envelope: Value, is_error: bool) -> Value {
    // Agents read the text block, so it carries the whole envelope.
    let text = to_pretty_json(&envelope);
    if is_error {
        json!({
            "isError": true,
            "content": [{ "type": "text", "text": text }],
            "structuredContent": envelope
        })
    } else {
        json!({
            "content": [{ "type": "text", "text": text }],
            "structuredContent": envelope
        })
    }
}

#[derive(Debug)]
struct RpcError {
    code: i64,
    message: String,
}

impl RpcError {
    fn parse_error(message: impl Into<String>) -> Self {
        Self {
            code: -32700,
            message: message.into(),
        }
    }

    fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            code: -32600,
            message: message.into(),
        }
    }

    fn method_not_found(method: &str) -> Self {
        Self {
            code: -32601,
            message: format!("Method not found: {method}"),
        }
    }

    fn invalid_params(message: impl Into<String>) -> Self {
        Self {
            code: -32602,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone)]
struct ToolError {
    code: String,
    message: String,
    field: Option<String>,
    docs_hint: Option<String>,
    details: Option<Value>,
}

impl ToolError {
    fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            field: None,
            docs_hint: None,
            details: None,
        }
    }

    fn category(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self::new(category.code(), message)
    }

    fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    fn with_docs_hint(mut self, docs_hint: impl Into<String>) -> Self {
        self.docs_hint = Some(docs_hint.into());
        self
    }

    fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    fn to_value(&self) -> Value {
        let mut payload = json!({
            "error": self.code,
            "message": self.message
        });
        if let Some(field) = &self.field {
            payload["field"] = Value::String(field.clone());
        }
        if let Some(docs_hint) = &self.docs_hint {
            payload["docs_hint"] = Value::String(docs_hint.clone());
        }
        if let Some(details) = &self.details {
            payload["details"] = details.clone();
        }
        payload
    }
}

impl From<ValidationError> for ToolError {
    fn from(err: ValidationError) -> Self {
        let field = if err.path.is_empty() {
            "arguments".to_string()
        } else {
            err.path.clone()
        };
        ToolError::category(ErrorCategory::Validation, err.to_string())
            .with_docs_hint(format!(
                "Fix the value at '{field}' and call the tool again. Nothing was sent."
            ))
            .with_field(field)
            .with_details(json!({
                "expected": err.expected,
                "received": err.received
            }))
    }
}

impl From<AuthError> for ToolError {
    fn from(err: AuthError) -> Self {
        let tool_error = ToolError::category(ErrorCategory::Auth, err.to_string());
        match &err {
            AuthError::MissingCredentials => tool_error
                .with_docs_hint("Set BOT_APP_ID and BOT_APP_PASSWORD and restart the server."),
            AuthError::TokenRequestFailed { status, body } => tool_error
                .with_docs_hint(
                    "The identity platform rejected the bot credentials. Check BOT_APP_ID, BOT_APP_PASSWORD and BOT_TENANT_ID.",
                )
                .with_details(json!({ "status": status, "body": body })),
            AuthError::InvalidTokenResponse { .. } | AuthError::Network(_) => tool_error
                .with_docs_hint("Token acquisition did not complete. Retry after a short backoff."),
        }
    }
}

impl From<TransportError> for ToolError {
    fn from(err: TransportError) -> Self {
        let tool_error = ToolError::category(ErrorCategory::Transport, err.to_string());
        match err {
            TransportError::Status { url, status, body } => {
                let hint = match status {
                    401 | 403 => {
                        "The API refused the caller. Check the token and the permissions granted to it."
                    }
                    404 => "The team, channel, conversation or message does not exist or is not visible to the caller.",
                    429 => "The API is throttling requests. Retry after a backoff.",
                    _ => "The API rejected the request; the response body is included verbatim.",
                };
                tool_error
                    .with_docs_hint(hint)
                    .with_details(json!({ "url": url, "status": status, "body": body }))
            }
            TransportError::Network { url, .. } => tool_error
                .with_docs_hint("The request did not complete. Check connectivity and retry.")
                .with_details(json!({ "url": url })),
            TransportError::Url(_) => tool_error,
        }
    }
}

impl From<SendError> for ToolError {
    fn from(err: SendError) -> Self {
        match err {
            SendError::Auth(err) => err.into(),
            SendError::Transport(err) => err.into(),
        }
    }
}

impl From<ConfigError> for ToolError {
    fn from(err: ConfigError) -> Self {
        let tool_error = ToolError::category(ErrorCategory::Configuration, err.to_string());
        match err {
            ConfigError::Missing { env, .. } => tool_error
                .with_field(env)
                .with_docs_hint(format!("Set {env} in the environment or a .env file.")),
            ConfigError::Invalid { setting, .. } => tool_error.with_field(setting),
        }
    }
}

#[derive(Debug)]
struct ToolDefinition {
    name: &'static str,
    description: &'static str,
    input_schema: Value,
}

fn tool_definitions(variant: ApiVariant) -> Vec<ToolDefinition> {
    match variant {
        ApiVariant::Bot => vec![
            ToolDefinition {
                name: "post_message",
                description: "Post a markdown message into the configured conversation, optionally as a thread reply.",
                input_schema: schema::post_message_schema(),
            },
            ToolDefinition {
                name: "post_rich_message",
                description: "Post an Adaptive Card, with optional fallback text, into the configured conversation.",
                input_schema: schema::post_rich_message_schema(),
            },
            ToolDefinition {
                name: "update_message",
                description: "Replace the text and/or card of an activity the bot posted earlier.",
                input_schema: schema::update_message_schema(),
            },
        ],
        ApiVariant::Graph => vec![
            ToolDefinition {
                name: "post_channel_message",
                description: "Post an HTML message into a team channel, optionally as a reply.",
                input_schema: schema::channel_post_message_schema(),
            },
            ToolDefinition {
                name: "post_channel_rich_message",
                description: "Post an Adaptive Card, with optional text, into a team channel.",
                input_schema: schema::channel_post_rich_message_schema(),
            },
            ToolDefinition {
                name: "list_channel_messages",
                description: "List the most recent messages of a team channel.",
                input_schema: schema::list_messages_schema(),
            },
        ],
    }
}

fn success_response(id: Value, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result
    })
}

fn error_response(id: Value, error: RpcError) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": error.code,
            "message": error.message
        }
    })
}

/// Read one Content-Length framed body. `None` means the peer closed the stream
/// between frames; decoding the body is left to the caller.
async fn read_frame<R>(reader: &mut R) -> Result<Option<Vec<u8>>, std::io::Error>
where
    R: AsyncBufRead + Unpin,
{
    let mut content_length: Option<usize> = None;

    loop {
        let mut line = String::new();
        let bytes_read = reader.read_line(&mut line).await?;
        if bytes_read == 0 {
            if content_length.is_none() {
                return Ok(None);
            }
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "Unexpected EOF while reading MCP headers",
            ));
        }

        if line == "\r\n" || line == "\n" {
            break;
        }

        let line = line.trim_end_matches(['\r', '\n']);
        if line.to_ascii_lowercase().starts_with("content-length:") {
            let raw_len = line
                .split_once(':')
                .map(|(_, right)| right.trim())
                .unwrap_or_default();
            let parsed = raw_len.parse::<usize>().map_err(|_| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "Invalid Content-Length header",
                )
            })?;
            content_length = Some(parsed);
        }
    }

    let content_length = content_length.ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "Missing Content-Length header",
        )
    })?;
    if content_length > MAX_FRAME_BYTES {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("Content-Length {content_length} exceeds the {MAX_FRAME_BYTES} byte limit"),
        ));
    }
    let mut payload = vec![0_u8; content_length];
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload))
}

async fn write_framed_json<W>(writer: &mut W, value: &Value) -> Result<(), std::io::Error>
where
    W: AsyncWrite + Unpin,
{
    let body = serde_json::to_vec(value).map_err(|e| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("Failed to serialize JSON: {e}"),
        )
    })?;
    let header = format!(
        "Content-Length: {}\r\nContent-Type: application/json\r\n\r\n",
        body.len()
    );
    writer.write_all(header.as_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use url::Url;

    use crate::auth::BrokerConfig;
    use crate::config::{BotConfig, GraphConfig};
    use teams_core::card::MAX_NESTING_DEPTH;

    fn graph_server() -> McpServer {
        McpServer::from_config(&RuntimeConfig {
            http_timeout: Duration::from_secs(5),
            variant: VariantConfig::Graph(GraphConfig {
                access_token: "user-token".to_string(),
                api_url: Url::parse("http://127.0.0.1:9/v1.0").unwrap(),
            }),
        })
        .expect("graph server")
    }

    fn bot_server_without_credentials() -> McpServer {
        McpServer::from_config(&RuntimeConfig {
            http_timeout: Duration::from_secs(5),
            variant: VariantConfig::Bot(BotConfig {
                credentials: BrokerConfig {
                    client_id: None,
                    client_secret: None,
                    tenant_id: None,
                    login_url: "http://127.0.0.1:9".to_string(),
                },
                service_url: Url::parse("http://127.0.0.1:9/").unwrap(),
                conversation_id: "a:conv".to_string(),
                default_thread_id: None,
            }),
        })
        .expect("bot server")
    }

    fn frame(value: &Value) -> Vec<u8> {
        let body = serde_json::to_vec(value).unwrap();
        let mut framed = format!("Content-Length: {}\r\n\r\n", body.len()).into_bytes();
        framed.extend(body);
        framed
    }

    async fn decode_frames(output: &[u8]) -> Vec<Value> {
        let mut reader = BufReader::new(output);
        let mut decoded = Vec::new();
        while let Some(body) = read_frame(&mut reader).await.expect("well-formed output") {
            decoded.push(serde_json::from_slice(&body).expect("server writes valid JSON"));
        }
        decoded
    }

    async fn call_tool(server: &McpServer, name: &str, arguments: Value) -> Value {
        server
            .handle_tools_call(json!({ "name": name, "arguments": arguments }))
            .await
            .expect("tools/call params are well formed")
    }

    #[test]
    fn tools_list_matches_the_configured_variant() {
        let names = |server: &McpServer| -> Vec<String> {
            server.tools_list_payload()["tools"]
                .as_array()
                .unwrap()
                .iter()
                .map(|tool| tool["name"].as_str().unwrap().to_string())
                .collect()
        };
        assert_eq!(
            names(&graph_server()),
            vec![
                "post_channel_message",
                "post_channel_rich_message",
                "list_channel_messages"
            ]
        );
        assert_eq!(
            names(&bot_server_without_credentials()),
            vec!["post_message", "post_rich_message", "update_message"]
        );
    }

    #[test]
    fn every_tool_schema_is_a_closed_object() {
        for variant in [ApiVariant::Bot, ApiVariant::Graph] {
            for tool in tool_definitions(variant) {
                assert_eq!(tool.input_schema["type"], "object", "{}", tool.name);
                assert_eq!(
                    tool.input_schema["additionalProperties"], false,
                    "{}",
                    tool.name
                );
            }
        }
    }

    #[test]
    fn initialize_reports_server_info_and_capabilities() {
        let payload = graph_server().initialize_payload();
        assert_eq!(payload["protocolVersion"], MCP_PROTOCOL_VERSION);
        assert_eq!(payload["serverInfo"]["name"], "teams-mcp");
        assert_eq!(payload["capabilities"]["tools"]["listChanged"], false);
        assert!(
            payload["instructions"]
                .as_str()
                .unwrap()
                .contains("team_id")
        );
    }

    #[tokio::test]
    async fn wrong_jsonrpc_version_is_invalid_request() {
        let server = graph_server();
        let response = server
            .handle_single_message(json!({ "jsonrpc": "1.0", "id": 4, "method": "ping" }))
            .await
            .expect("error response");
        assert_eq!(response["id"], 4);
        assert_eq!(response["error"]["code"], -32600);
    }

    #[tokio::test]
    async fn notifications_and_client_responses_get_no_reply() {
        let server = graph_server();
        assert!(
            server
                .handle_single_message(
                    json!({ "jsonrpc": "2.0", "method": "notifications/initialized" })
                )
                .await
                .is_none()
        );
        assert!(
            server
                .handle_single_message(json!({ "jsonrpc": "2.0", "id": 1, "result": {} }))
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn unknown_method_is_method_not_found() {
        let server = graph_server();
        let response = server
            .handle_single_message(json!({
                "jsonrpc": "2.0",
                "id": "x",
                "method": "sampling/create"
            }))
            .await
            .unwrap();
        assert_eq!(response["error"]["code"], -32601);
    }

    #[tokio::test]
    async fn empty_batch_is_rejected_and_batches_answer_each_request() {
        let server = graph_server();
        let responses = server.handle_incoming_message(json!([])).await;
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0]["error"]["code"], -32600);

        let responses = server
            .handle_incoming_message(json!([
                { "jsonrpc": "2.0", "id": 1, "method": "ping" },
                { "jsonrpc": "2.0", "method": "notifications/initialized" },
                { "jsonrpc": "2.0", "id": 2, "method": "prompts/list" }
            ]))
            .await;
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[1]["result"], json!({ "prompts": [] }));
    }

    #[tokio::test]
    async fn tools_call_requires_object_arguments() {
        let err = graph_server()
            .handle_tools_call(json!({ "name": "list_channel_messages", "arguments": [1] }))
            .await
            .expect_err("array arguments are invalid params");
        assert_eq!(err.code, -32602);
    }

    #[tokio::test]
    async fn invalid_card_is_a_validation_failure_with_path() {
        let result = call_tool(
            &graph_server(),
            "post_channel_rich_message",
            json!({
                "team_id": "t",
                "channel_id": "c",
                "card": {
                    "type": "AdaptiveCard",
                    "body": [{ "type": "Image", "url": "not a url" }]
                }
            }),
        )
        .await;

        assert_eq!(result["isError"], true);
        let error = &result["structuredContent"]["error"];
        assert_eq!(error["error"], codes::VALIDATION_FAILED);
        assert_eq!(error["field"], "card.body[0].url");
        assert_eq!(error["details"]["expected"], "absolute URL");
    }

    #[tokio::test]
    async fn neither_text_nor_card_is_rejected() {
        let result = call_tool(
            &graph_server(),
            "post_channel_rich_message",
            json!({ "team_id": "t", "channel_id": "c" }),
        )
        .await;
        assert_eq!(
            result["structuredContent"]["error"]["field"],
            "text|card"
        );
    }

    #[tokio::test]
    async fn missing_bot_credentials_are_an_auth_failure() {
        let result = call_tool(
            &bot_server_without_credentials(),
            "post_message",
            json!({ "text": "hello" }),
        )
        .await;
        assert_eq!(result["isError"], true);
        assert_eq!(
            result["structuredContent"]["error"]["error"],
            codes::AUTH_FAILED
        );
    }

    #[tokio::test]
    async fn unreachable_api_is_a_transport_failure() {
        let result = call_tool(
            &graph_server(),
            "post_channel_message",
            json!({ "team_id": "t", "channel_id": "c", "text": "hi" }),
        )
        .await;
        let error = &result["structuredContent"]["error"];
        assert_eq!(error["error"], codes::TRANSPORT_ERROR);
        assert!(
            error["details"]["url"]
                .as_str()
                .unwrap()
                .ends_with("/v1.0/teams/t/channels/c/messages")
        );
    }

    #[tokio::test]
    async fn tools_of_the_other_variant_are_unknown() {
        let result = call_tool(&graph_server(), "post_message", json!({ "text": "hi" })).await;
        let error = &result["structuredContent"]["error"];
        assert_eq!(error["error"], codes::UNKNOWN_TOOL);
        assert_eq!(error["details"]["api"], "graph");
    }

    #[test]
    fn tool_response_inlines_envelope_as_text() {
        let envelope = json!({ "status": "ok", "tool": "post_message", "data": { "id": "1" } });
        let response = build_tool_call_response(envelope.clone(), false);
        assert!(response.get("isError").is_none());
        let text = response["content"][0]["text"].as_str().unwrap();
        assert_eq!(serde_json::from_str::<Value>(text).unwrap(), envelope);
    }

    #[test]
    fn config_errors_name_the_environment_variable() {
        let err = ToolError::from(ConfigError::Missing {
            setting: "bot app id",
            env: "BOT_APP_ID",
        });
        let value = err.to_value();
        assert_eq!(value["error"], codes::CONFIGURATION_ERROR);
        assert_eq!(value["field"], "BOT_APP_ID");
    }

    #[tokio::test]
    async fn framed_messages_round_trip_through_serve() {
        let mut input = frame(&json!({ "jsonrpc": "2.0", "id": 1, "method": "ping" }));
        input.extend(frame(
            &json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }),
        ));
        input.extend(frame(&json!({ "jsonrpc": "2.0", "id": 2, "method": "tools/list" })));

        let mut reader = BufReader::new(input.as_slice());
        let mut output = Vec::new();
        graph_server()
            .serve(&mut reader, &mut output)
            .await
            .expect("serve until EOF");

        let responses = decode_frames(&output).await;
        assert_eq!(responses.len(), 2);
        assert_eq!(
            responses[0],
            json!({ "jsonrpc": "2.0", "id": 1, "result": {} })
        );
        assert_eq!(responses[1]["id"], 2);
        assert_eq!(responses[1]["result"]["tools"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn card_past_the_depth_ceiling_is_rejected_through_serve() {
        let mut node = json!({ "type": "TextBlock", "text": "leaf" });
        for _ in 0..MAX_NESTING_DEPTH {
            node = json!({ "type": "Container", "items": [node] });
        }
        let input = frame(&json!({
            "jsonrpc": "2.0",
            "id": 7,
            "method": "tools/call",
            "params": {
                "name": "post_channel_rich_message",
                "arguments": {
                    "team_id": "t",
                    "channel_id": "c",
                    "card": { "type": "AdaptiveCard", "body": [node] }
                }
            }
        }));

        let mut reader = BufReader::new(input.as_slice());
        let mut output = Vec::new();
        graph_server()
            .serve(&mut reader, &mut output)
            .await
            .expect("deep card does not end the session");

        let responses = decode_frames(&output).await;
        assert_eq!(responses.len(), 1);
        let result = &responses[0]["result"];
        assert_eq!(result["isError"], true);
        let error = &result["structuredContent"]["error"];
        assert_eq!(error["error"], codes::VALIDATION_FAILED);
        assert_eq!(
            error["details"]["received"],
            format!("depth {}", MAX_NESTING_DEPTH + 1)
        );
    }

    #[tokio::test]
    async fn undecodable_frame_gets_parse_error_and_session_continues() {
        let mut node = json!({ "type": "TextBlock", "text": "leaf" });
        for _ in 0..70 {
            node = json!({ "type": "Container", "items": [node] });
        }
        let mut input = frame(&json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "tools/call",
            "params": {
                "name": "post_channel_rich_message",
                "arguments": {
                    "team_id": "t",
                    "channel_id": "c",
                    "card": { "type": "AdaptiveCard", "body": [node] }
                }
            }
        }));
        input.extend(b"Content-Length: 9\r\n\r\n{\"id\": 2,");
        input.extend(frame(&json!({ "jsonrpc": "2.0", "id": 3, "method": "ping" })));

        let mut reader = BufReader::new(input.as_slice());
        let mut output = Vec::new();
        graph_server()
            .serve(&mut reader, &mut output)
            .await
            .expect("decode failures do not end the session");

        let responses = decode_frames(&output).await;
        assert_eq!(responses.len(), 3);
        assert_eq!(responses[0]["error"]["code"], -32700);
        assert_eq!(responses[0]["id"], Value::Null);
        assert_eq!(responses[1]["error"]["code"], -32700);
        assert_eq!(
            responses[2],
            json!({ "jsonrpc": "2.0", "id": 3, "result": {} })
        );
    }

    #[tokio::test]
    async fn frame_without_content_length_is_invalid_data() {
        let mut reader = BufReader::new(&b"Content-Type: application/json\r\n\r\n{}"[..]);
        let err = read_frame(&mut reader)
            .await
            .expect_err("missing length");
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn oversized_content_length_is_refused_before_allocating() {
        let header = format!("Content-Length: {}\r\n\r\n", MAX_FRAME_BYTES + 1);
        let mut reader = BufReader::new(header.as_bytes());
        let err = read_frame(&mut reader)
            .await
            .expect_err("frame over the limit");
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
        assert!(err.to_string().contains("exceeds"));
    }

    #[tokio::test]
    async fn diagnostics_report_degraded_without_credentials() {
        let report = bot_server_without_credentials().run_diagnostics().await;
        assert_eq!(report["status"], "degraded");
        assert_eq!(report["checks"][0]["check"], "token_exchange");
        assert_eq!(report["checks"][0]["error"]["error"], codes::AUTH_FAILED);
    }
}
