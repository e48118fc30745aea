use std::time::Duration;

use clap::{Args, ValueEnum};
use url::Url;

use crate::auth::{BrokerConfig, DEFAULT_LOGIN_URL};

pub const DEFAULT_GRAPH_API_URL: &str = "https://graph.microsoft.com/v1.0";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required setting {setting} (set {env})")]
    Missing {
        setting: &'static str,
        env: &'static str,
    },
    #[error("invalid {setting}: {reason}")]
    Invalid {
        setting: &'static str,
        reason: String,
    },
}

/// Which messaging API the server fronts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ApiVariant {
    /// Bot identity, one conversation fixed by configuration
    Bot,
    /// Delegated user, team and channel named per call
    Graph,
}

impl ApiVariant {
    pub fn as_str(self) -> &'static str {
        match self {
            ApiVariant::Bot => "bot",
            ApiVariant::Graph => "graph",
        }
    }
}

#[derive(Args, Clone, Debug)]
pub struct McpServeArgs {
    /// Messaging API to expose as tools
    #[arg(long, env = "TEAMS_MCP_API", value_enum, default_value_t = ApiVariant::Bot)]
    pub api: ApiVariant,
    /// Upper bound for every outbound HTTP call, in seconds
    #[arg(long, env = "TEAMS_MCP_HTTP_TIMEOUT_SECS", default_value_t = 30)]
    pub http_timeout_secs: u64,
    #[command(flatten)]
    pub bot: BotArgs,
    #[command(flatten)]
    pub graph: GraphArgs,
}

#[derive(Args, Clone, Debug, Default)]
pub struct BotArgs {
    /// Bot application (client) id
    #[arg(long, env = "BOT_APP_ID")]
    pub bot_app_id: Option<String>,
    /// Bot application secret
    #[arg(long, env = "BOT_APP_PASSWORD", hide_env_values = true)]
    pub bot_app_password: Option<String>,
    /// Tenant for single-tenant bots (default: multi-tenant botframework.com)
    #[arg(long, env = "BOT_TENANT_ID")]
    pub bot_tenant_id: Option<String>,
    /// Bot connector service URL of the conversation
    #[arg(long, env = "BOT_SERVICE_URL")]
    pub bot_service_url: Option<String>,
    /// Conversation the bot posts into
    #[arg(long, env = "BOT_CONVERSATION_ID")]
    pub bot_conversation_id: Option<String>,
    /// Activity replied to when a call names no thread
    #[arg(long, env = "BOT_DEFAULT_THREAD_ID")]
    pub bot_default_thread_id: Option<String>,
    /// Identity platform authority
    #[arg(long, env = "BOT_LOGIN_URL", default_value = DEFAULT_LOGIN_URL)]
    pub bot_login_url: String,
}

#[derive(Args, Clone, Debug, Default)]
pub struct GraphArgs {
    /// Delegated Microsoft Graph access token
    #[arg(long, env = "GRAPH_ACCESS_TOKEN", hide_env_values = true)]
    pub graph_access_token: Option<String>,
    /// Microsoft Graph base URL
    #[arg(long, env = "GRAPH_API_URL", default_value = DEFAULT_GRAPH_API_URL)]
    pub graph_api_url: String,
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub http_timeout: Duration,
    pub variant: VariantConfig,
}

#[derive(Debug, Clone)]
pub enum VariantConfig {
    Bot(BotConfig),
    Graph(GraphConfig),
}

#[derive(Debug, Clone)]
pub struct BotConfig {
    pub credentials: BrokerConfig,
    pub service_url: Url,
    pub conversation_id: String,
    pub default_thread_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GraphConfig {
    pub access_token: String,
    pub api_url: Url,
}

impl McpServeArgs {
    /// Check everything the chosen variant needs; failure here is fatal at startup.
    pub fn resolve(&self) -> Result<RuntimeConfig, ConfigError> {
        if self.http_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                setting: "TEAMS_MCP_HTTP_TIMEOUT_SECS",
                reason: "must be at least 1 second".to_string(),
            });
        }
        let variant = match self.api {
            ApiVariant::Bot => VariantConfig::Bot(self.bot.resolve()?),
            ApiVariant::Graph => VariantConfig::Graph(self.graph.resolve()?),
        };
        Ok(RuntimeConfig {
            http_timeout: Duration::from_secs(self.http_timeout_secs),
            variant,
        })
    }
}

impl BotArgs {
    fn resolve(&self) -> Result<BotConfig, ConfigError> {
        let client_id = required(&self.bot_app_id, "bot app id", "BOT_APP_ID")?;
        let client_secret =
            required(&self.bot_app_password, "bot app password", "BOT_APP_PASSWORD")?;
        let service_url = required(&self.bot_service_url, "bot service url", "BOT_SERVICE_URL")?;
        let conversation_id = required(
            &self.bot_conversation_id,
            "bot conversation id",
            "BOT_CONVERSATION_ID",
        )?;
        parse_http_url(&self.bot_login_url, "BOT_LOGIN_URL")?;

        Ok(BotConfig {
            credentials: BrokerConfig {
                client_id: Some(client_id),
                client_secret: Some(client_secret),
                tenant_id: optional(&self.bot_tenant_id),
                login_url: self.bot_login_url.clone(),
            },
            service_url: parse_http_url(&service_url, "BOT_SERVICE_URL")?,
            conversation_id,
            default_thread_id: optional(&self.bot_default_thread_id),
        })
    }
}

impl GraphArgs {
    fn resolve(&self) -> Result<GraphConfig, ConfigError> {
        Ok(GraphConfig {
            access_token: required(
                &self.graph_access_token,
                "graph access token",
                "GRAPH_ACCESS_TOKEN",
            )?,
            api_url: parse_http_url(&self.graph_api_url, "GRAPH_API_URL")?,
        })
    }
}

fn required(
    value: &Option<String>,
    setting: &'static str,
    env: &'static str,
) -> Result<String, ConfigError> {
    optional(value).ok_or(ConfigError::Missing { setting, env })
}

fn optional(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn parse_http_url(raw: &str, setting: &'static str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw.trim()).map_err(|e| ConfigError::Invalid {
        setting,
        reason: format!("'{raw}' is not a URL: {e}"),
    })?;
    if !matches!(url.scheme(), "http" | "https") || url.cannot_be_a_base() {
        return Err(ConfigError::Invalid {
            setting,
            reason: format!("'{raw}' must be an http(s) URL"),
        });
    }
    Ok(url)
}
