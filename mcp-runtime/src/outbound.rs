//! Request envelopes for the two messaging APIs.
//!
//! Both variants share the card grammar; they differ only in addressing,
//! authorization and how a card is attached to the message.

use std::sync::Arc;

use reqwest::Method;
use serde_json::{Map, Value, json};
use teams_core::args::{
    ChannelPostMessageArgs, ChannelPostRichMessageArgs, ChannelTarget, ListMessagesArgs,
    PostMessageArgs, PostRichMessageArgs, RichMessage, UpdateMessageArgs,
};
use teams_core::card::ADAPTIVE_CARD_CONTENT_TYPE;
use url::Url;
use uuid::Uuid;

use crate::auth::{AuthError, TokenBroker};
use crate::config::{BotConfig, GraphConfig};
use crate::util::parse_response_body;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("request to {url} failed: {message}")]
    Network { url: String, message: String },
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16, body: Value },
    #[error("cannot build request URL: {0}")]
    Url(String),
}

/// Anything that can go wrong between validated arguments and a filtered response.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[derive(Debug)]
struct ApiCallResult {
    status: u16,
    body: Value,
}

/// Bot Connector client scoped to one conversation.
pub struct BotConnector {
    http: reqwest::Client,
    broker: Arc<TokenBroker>,
    service_url: Url,
    conversation_id: String,
    default_thread_id: Option<String>,
}

impl BotConnector {
    pub fn new(config: &BotConfig, http: reqwest::Client, broker: Arc<TokenBroker>) -> Self {
        Self {
            http,
            broker,
            service_url: config.service_url.clone(),
            conversation_id: config.conversation_id.clone(),
            default_thread_id: config.default_thread_id.clone(),
        }
    }

    pub fn broker(&self) -> &TokenBroker {
        &self.broker
    }

    pub async fn post_message(&self, args: &PostMessageArgs) -> Result<Value, SendError> {
        let message = RichMessage {
            text: Some(args.text.clone()),
            card: None,
        };
        self.post(&message, args.thread_id.as_deref()).await
    }

    pub async fn post_rich_message(&self, args: &PostRichMessageArgs) -> Result<Value, SendError> {
        self.post(&args.message, args.thread_id.as_deref()).await
    }

    pub async fn update_message(&self, args: &UpdateMessageArgs) -> Result<Value, SendError> {
        let url = self.activities_url(Some(&args.activity_id))?;
        let mut activity = bot_activity(&args.message);
        activity["id"] = json!(args.activity_id);
        let result = self.send(Method::PUT, url, &activity).await?;
        Ok(json!({
            "id": result.body.get("id").cloned().unwrap_or_else(|| json!(args.activity_id)),
            "conversation_id": self.conversation_id,
            "updated": true,
        }))
    }

    async fn post(
        &self,
        message: &RichMessage,
        thread_id: Option<&str>,
    ) -> Result<Value, SendError> {
        let thread_id = thread_id.or(self.default_thread_id.as_deref());
        let url = self.activities_url(thread_id)?;
        let result = self.send(Method::POST, url, &bot_activity(message)).await?;

        let mut filtered = json!({
            "id": result.body.get("id").cloned().unwrap_or(Value::Null),
            "conversation_id": self.conversation_id,
            "status": result.status,
        });
        if let Some(thread_id) = thread_id {
            filtered["thread_id"] = json!(thread_id);
        }
        Ok(filtered)
    }

    /// `{service}/v3/conversations/{id}/activities[/{activity}]`
    fn activities_url(&self, activity_id: Option<&str>) -> Result<Url, TransportError> {
        let mut segments = vec!["v3", "conversations", self.conversation_id.as_str(), "activities"];
        if let Some(activity_id) = activity_id {
            segments.push(activity_id);
        }
        endpoint(&self.service_url, &segments)
    }

    async fn send(
        &self,
        method: Method,
        url: Url,
        body: &Value,
    ) -> Result<ApiCallResult, SendError> {
        let token = self.broker.get_token().await?;
        let request = self
            .http
            .request(method, url.clone())
            .header("Authorization", token.authorization_header())
            .json(body);
        match execute(request, &url).await {
            // A revoked token is dropped so the next call exchanges afresh; no retry here.
            Err(err @ TransportError::Status { status: 401, .. }) => {
                tracing::warn!(url = %url, "connector rejected bearer token, clearing cache");
                self.broker.reset().await;
                Err(err.into())
            }
            result => Ok(result?),
        }
    }
}

/// Microsoft Graph client acting as the signed-in user.
pub struct GraphClient {
    http: reqwest::Client,
    access_token: String,
    api_url: Url,
}

impl GraphClient {
    pub fn new(config: &GraphConfig, http: reqwest::Client) -> Self {
        Self {
            http,
            access_token: config.access_token.clone(),
            api_url: config.api_url.clone(),
        }
    }

    pub async fn post_message(&self, args: &ChannelPostMessageArgs) -> Result<Value, SendError> {
        let message = RichMessage {
            text: Some(args.text.clone()),
            card: None,
        };
        self.post(&args.target, &message, args.reply_to_id.as_deref())
            .await
    }

    pub async fn post_rich_message(
        &self,
        args: &ChannelPostRichMessageArgs,
    ) -> Result<Value, SendError> {
        self.post(&args.target, &args.message, args.reply_to_id.as_deref())
            .await
    }

    pub async fn list_messages(&self, args: &ListMessagesArgs) -> Result<Value, SendError> {
        let mut url = self.messages_url(&args.target, None)?;
        url.set_query(Some(&format!("$top={}", args.top)));
        let result = self.send(Method::GET, url, None).await?;

        let messages: Vec<Value> = result
            .body
            .get("value")
            .and_then(Value::as_array)
            .map(|items| items.iter().map(summarize_graph_message).collect())
            .unwrap_or_default();
        Ok(json!({
            "team_id": args.target.team_id,
            "channel_id": args.target.channel_id,
            "count": messages.len(),
            "has_more": result.body.get("@odata.nextLink").is_some(),
            "messages": messages,
        }))
    }

    /// Identity behind the delegated token; used by startup diagnostics.
    pub async fn whoami(&self) -> Result<Value, SendError> {
        let url = endpoint(&self.api_url, &["me"])?;
        let result = self.send(Method::GET, url, None).await?;
        Ok(pick_fields(&result.body, &["id", "displayName", "userPrincipalName"]))
    }

    async fn post(
        &self,
        target: &ChannelTarget,
        message: &RichMessage,
        reply_to_id: Option<&str>,
    ) -> Result<Value, SendError> {
        let url = self.messages_url(target, reply_to_id)?;
        let attachment_id = Uuid::now_v7().simple().to_string();
        let payload = graph_chat_message(message, &attachment_id);
        let result = self.send(Method::POST, url, Some(&payload)).await?;

        let mut filtered = pick_fields(
            &result.body,
            &["id", "createdDateTime", "webUrl", "replyToId"],
        );
        filtered["team_id"] = json!(target.team_id);
        filtered["channel_id"] = json!(target.channel_id);
        Ok(filtered)
    }

    /// `{graph}/teams/{team}/channels/{channel}/messages[/{reply}/replies]`
    fn messages_url(
        &self,
        target: &ChannelTarget,
        reply_to_id: Option<&str>,
    ) -> Result<Url, TransportError> {
        let mut segments = vec![
            "teams",
            target.team_id.as_str(),
            "channels",
            target.channel_id.as_str(),
            "messages",
        ];
        if let Some(reply_to_id) = reply_to_id {
            segments.extend([reply_to_id, "replies"]);
        }
        endpoint(&self.api_url, &segments)
    }

    async fn send(
        &self,
        method: Method,
        url: Url,
        body: Option<&Value>,
    ) -> Result<ApiCallResult, TransportError> {
        let mut request = self
            .http
            .request(method, url.clone())
            .header("Authorization", format!("Bearer {}", self.access_token));
        if let Some(body) = body {
            request = request.json(body);
        }
        execute(request, &url).await
    }
}

/// Bot Framework message activity; the card rides along as an attachment.
fn bot_activity(message: &RichMessage) -> Value {
    let mut activity = json!({
        "type": "message",
        "textFormat": "markdown",
    });
    if let Some(text) = &message.text {
        activity["text"] = json!(text);
    }
    if let Some(card) = &message.card {
        activity["attachments"] = json!([{
            "contentType": ADAPTIVE_CARD_CONTENT_TYPE,
            "content": card.to_value(),
        }]);
    }
    activity
}

/// Graph chatMessage; cards are embedded as JSON strings and referenced from the HTML body.
fn graph_chat_message(message: &RichMessage, attachment_id: &str) -> Value {
    let mut content = message.text.clone().unwrap_or_default();
    let Some(card) = &message.card else {
        return json!({ "body": { "contentType": "html", "content": content } });
    };
    content.push_str(&format!("<attachment id=\"{attachment_id}\"></attachment>"));
    json!({
        "body": { "contentType": "html", "content": content },
        "attachments": [{
            "id": attachment_id,
            "contentType": ADAPTIVE_CARD_CONTENT_TYPE,
            "content": card.to_value().to_string(),
        }]
    })
}

fn summarize_graph_message(message: &Value) -> Value {
    let mut summary = pick_fields(message, &["id", "createdDateTime", "messageType", "replyToId"]);
    if let Some(sender) = message
        .pointer("/from/user/displayName")
        .or_else(|| message.pointer("/from/application/displayName"))
    {
        summary["from"] = sender.clone();
    }
    if let Some(content) = message.pointer("/body/content") {
        summary["content"] = content.clone();
    }
    let attachments = message
        .get("attachments")
        .and_then(Value::as_array)
        .map_or(0, Vec::len);
    if attachments > 0 {
        summary["attachment_count"] = json!(attachments);
    }
    summary
}

fn pick_fields(body: &Value, keys: &[&str]) -> Value {
    let mut out = Map::new();
    for key in keys {
        if let Some(value) = body.get(*key).filter(|v| !v.is_null()) {
            out.insert((*key).to_string(), value.clone());
        }
    }
    Value::Object(out)
}

fn endpoint(base: &Url, segments: &[&str]) -> Result<Url, TransportError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| TransportError::Url(format!("{base} cannot carry a path")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

async fn execute(
    request: reqwest::RequestBuilder,
    url: &Url,
) -> Result<ApiCallResult, TransportError> {
    let response = request.send().await.map_err(|e| TransportError::Network {
        url: url.to_string(),
        message: e.to_string(),
    })?;
    let status = response.status().as_u16();
    let bytes = response.bytes().await.map_err(|e| TransportError::Network {
        url: url.to_string(),
        message: format!("failed to read response body: {e}"),
    })?;
    let body = parse_response_body(&bytes);

    if !(200..=299).contains(&status) {
        return Err(TransportError::Status {
            url: url.to_string(),
            status,
            body,
        });
    }
    Ok(ApiCallResult { status, body })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use axum::Json;
    use axum::Router;
    use axum::extract::{Path, State};
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::{get, post};
    use teams_core::args::{
        parse_list_messages_args, parse_post_message_args, validate_post_rich_message_args,
    };

    use crate::auth::{BrokerConfig, TokenBroker};

    #[derive(Clone, Default)]
    struct Recorded {
        requests: Arc<Mutex<Vec<(String, Option<String>, Value)>>>,
    }

    async fn token(State(_): State<Recorded>) -> Json<Value> {
        Json(json!({ "access_token": "bot-token", "expires_in": 3600 }))
    }

    async fn activities(
        State(recorded): State<Recorded>,
        Path(conversation): Path<String>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> Json<Value> {
        let auth = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        recorded
            .requests
            .lock()
            .unwrap()
            .push((conversation, auth, body));
        Json(json!({ "id": "1700000000001" }))
    }

    async fn reply(
        State(recorded): State<Recorded>,
        Path((conversation, activity)): Path<(String, String)>,
        Json(body): Json<Value>,
    ) -> Json<Value> {
        recorded
            .requests
            .lock()
            .unwrap()
            .push((format!("{conversation}/{activity}"), None, body));
        Json(json!({ "id": "1700000000002" }))
    }

    async fn graph_messages(Path((_team, _channel)): Path<(String, String)>) -> Json<Value> {
        Json(json!({
            "@odata.nextLink": "https://graph.example/next",
            "value": [
                {
                    "id": "1",
                    "createdDateTime": "2024-05-01T10:00:00Z",
                    "messageType": "message",
                    "from": { "user": { "displayName": "Ada" } },
                    "body": { "contentType": "html", "content": "<p>hi</p>" },
                    "attachments": [],
                    "reactions": []
                }
            ]
        }))
    }

    async fn forbidden() -> (StatusCode, Json<Value>) {
        (
            StatusCode::FORBIDDEN,
            Json(json!({ "error": { "code": "Forbidden", "message": "Missing scope" } })),
        )
    }

    async fn unauthorized() -> (StatusCode, Json<Value>) {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "message": "Authorization has been denied for this request." })),
        )
    }

    async fn spawn(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    async fn bot_fixture(default_thread_id: Option<&str>) -> (BotConnector, Recorded) {
        let recorded = Recorded::default();
        let app = Router::new()
            .route("/{tenant}/oauth2/v2.0/token", post(token))
            .route("/v3/conversations/{conversation}/activities", post(activities))
            .route(
                "/v3/conversations/{conversation}/activities/{activity}",
                post(reply).put(reply),
            )
            .with_state(recorded.clone());
        let base = spawn(app).await;

        let http = reqwest::Client::new();
        let broker = Arc::new(TokenBroker::new(
            BrokerConfig {
                client_id: Some("app".to_string()),
                client_secret: Some("secret".to_string()),
                tenant_id: None,
                login_url: base.clone(),
            },
            http.clone(),
        ));
        let config = BotConfig {
            credentials: BrokerConfig {
                client_id: None,
                client_secret: None,
                tenant_id: None,
                login_url: base.clone(),
            },
            service_url: Url::parse(&format!("{base}/")).unwrap(),
            conversation_id: "a:conv-1".to_string(),
            default_thread_id: default_thread_id.map(str::to_string),
        };
        (BotConnector::new(&config, http, broker), recorded)
    }

    fn graph_client(base: &str) -> GraphClient {
        GraphClient::new(
            &GraphConfig {
                access_token: "user-token".to_string(),
                api_url: Url::parse(&format!("{base}/v1.0")).unwrap(),
            },
            reqwest::Client::new(),
        )
    }

    #[test]
    fn bot_activity_attaches_card_with_adaptive_content_type() {
        let args = validate_post_rich_message_args(&json!({
            "text": "fallback",
            "card": { "type": "AdaptiveCard", "body": [{ "type": "TextBlock", "text": "hi" }] }
        }))
        .unwrap();
        let activity = bot_activity(&args.message);
        assert_eq!(activity["type"], "message");
        assert_eq!(activity["text"], "fallback");
        assert_eq!(activity["textFormat"], "markdown");
        assert_eq!(
            activity["attachments"][0]["contentType"],
            ADAPTIVE_CARD_CONTENT_TYPE
        );
        assert_eq!(activity["attachments"][0]["content"]["version"], "1.4");
    }

    #[test]
    fn bot_activity_without_card_has_no_attachments() {
        let message = RichMessage {
            text: Some("plain".to_string()),
            card: None,
        };
        let activity = bot_activity(&message);
        assert!(activity.get("attachments").is_none());
    }

    #[test]
    fn graph_message_references_card_attachment_from_body() {
        let args = validate_post_rich_message_args(&json!({
            "card": { "type": "AdaptiveCard", "body": [{ "type": "TextBlock", "text": "hi" }] }
        }))
        .unwrap();
        let payload = graph_chat_message(&args.message, "att1");
        assert_eq!(payload["body"]["contentType"], "html");
        assert_eq!(
            payload["body"]["content"],
            "<attachment id=\"att1\"></attachment>"
        );
        let content = payload["attachments"][0]["content"]
            .as_str()
            .expect("graph expects card content as a JSON string");
        let card: Value = serde_json::from_str(content).unwrap();
        assert_eq!(card["type"], "AdaptiveCard");
    }

    #[test]
    fn endpoint_encodes_identifiers_as_path_segments() {
        let base = Url::parse("https://graph.microsoft.com/v1.0/").unwrap();
        let url = endpoint(&base, &["teams", "t 1", "channels", "19:x@thread.tacv2"]).unwrap();
        assert_eq!(
            url.as_str(),
            "https://graph.microsoft.com/v1.0/teams/t%201/channels/19:x@thread.tacv2"
        );
    }

    #[test]
    fn graph_summary_keeps_sender_and_content() {
        let summary = summarize_graph_message(&json!({
            "id": "9",
            "from": { "user": { "displayName": "Grace" } },
            "body": { "content": "hello" },
            "attachments": [{ "id": "a" }],
            "reactions": [{}]
        }));
        assert_eq!(
            summary,
            json!({ "id": "9", "from": "Grace", "content": "hello", "attachment_count": 1 })
        );
    }

    #[tokio::test]
    async fn bot_post_uses_broker_token_and_conversation() {
        let (connector, recorded) = bot_fixture(None).await;
        let args = parse_post_message_args(&json!({ "text": "deploy done" })).unwrap();

        let result = connector.post_message(&args).await.expect("post succeeds");
        assert_eq!(result["id"], "1700000000001");
        assert_eq!(result["conversation_id"], "a:conv-1");

        let requests = recorded.requests.lock().unwrap().clone();
        assert_eq!(requests.len(), 1);
        let (conversation, auth, body) = &requests[0];
        assert_eq!(conversation, "a:conv-1");
        assert_eq!(auth.as_deref(), Some("Bearer bot-token"));
        assert_eq!(body["text"], "deploy done");
    }

    #[tokio::test]
    async fn bot_post_falls_back_to_default_thread() {
        let (connector, recorded) = bot_fixture(Some("root-activity")).await;
        let args = parse_post_message_args(&json!({ "text": "in thread" })).unwrap();

        let result = connector.post_message(&args).await.expect("reply succeeds");
        assert_eq!(result["thread_id"], "root-activity");
        assert_eq!(
            recorded.requests.lock().unwrap()[0].0,
            "a:conv-1/root-activity"
        );
    }

    #[tokio::test]
    async fn connector_401_clears_cached_token() {
        let app = Router::new()
            .route("/{tenant}/oauth2/v2.0/token", post(token))
            .route(
                "/v3/conversations/{conversation}/activities",
                post(unauthorized),
            )
            .with_state(Recorded::default());
        let base = spawn(app).await;
        let http = reqwest::Client::new();
        let broker = Arc::new(TokenBroker::new(
            BrokerConfig {
                client_id: Some("app".to_string()),
                client_secret: Some("secret".to_string()),
                tenant_id: None,
                login_url: base.clone(),
            },
            http.clone(),
        ));
        let config = BotConfig {
            credentials: BrokerConfig {
                client_id: None,
                client_secret: None,
                tenant_id: None,
                login_url: base.clone(),
            },
            service_url: Url::parse(&format!("{base}/")).unwrap(),
            conversation_id: "a:conv-1".to_string(),
            default_thread_id: None,
        };
        let connector = BotConnector::new(&config, http, broker);
        let args = parse_post_message_args(&json!({ "text": "hi" })).unwrap();

        let err = connector
            .post_message(&args)
            .await
            .expect_err("401 should fail");
        assert!(matches!(
            err,
            SendError::Transport(TransportError::Status { status: 401, .. })
        ));
        assert_eq!(connector.broker().cached().await, None);
    }

    #[tokio::test]
    async fn bot_update_puts_activity_with_id() {
        let (connector, recorded) = bot_fixture(None).await;
        let args = teams_core::args::parse_update_message_args(&json!({
            "activity_id": "act-7",
            "text": "edited"
        }))
        .unwrap();

        let result = connector.update_message(&args).await.expect("update succeeds");
        assert_eq!(result["updated"], true);
        let (path, _, body) = recorded.requests.lock().unwrap()[0].clone();
        assert_eq!(path, "a:conv-1/act-7");
        assert_eq!(body["id"], "act-7");
    }

    #[tokio::test]
    async fn graph_list_filters_messages() {
        let app = Router::new().route(
            "/v1.0/teams/{team}/channels/{channel}/messages",
            get(graph_messages),
        );
        let base = spawn(app).await;
        let args = parse_list_messages_args(&json!({ "team_id": "t", "channel_id": "c", "top": 5 }))
            .unwrap();

        let result = graph_client(&base)
            .list_messages(&args)
            .await
            .expect("list succeeds");
        assert_eq!(result["count"], 1);
        assert_eq!(result["has_more"], true);
        assert_eq!(result["messages"][0]["from"], "Ada");
        assert!(result["messages"][0].get("reactions").is_none());
    }

    #[tokio::test]
    async fn graph_error_status_surfaces_status_and_body() {
        let app = Router::new().route(
            "/v1.0/teams/{team}/channels/{channel}/messages",
            post(forbidden),
        );
        let base = spawn(app).await;
        let args = teams_core::args::parse_channel_post_message_args(&json!({
            "team_id": "t",
            "channel_id": "c",
            "text": "hi"
        }))
        .unwrap();

        let err = graph_client(&base)
            .post_message(&args)
            .await
            .expect_err("403 should fail");
        match err {
            SendError::Transport(TransportError::Status { status, body, .. }) => {
                assert_eq!(status, 403);
                assert_eq!(body["error"]["code"], "Forbidden");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
