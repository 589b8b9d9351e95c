//! Messaging workspace API capability.
//!
//! [`MessagingClient`] is the network collaborator the live connector is
//! driven through: paginated channel listing, channel join, paginated
//! history and thread replies, and user lookup. [`HttpMessagingClient`]
//! implements it against a workspace-style REST API, wrapping every call
//! with debug-level logging and blocking rate-limit backoff (HTTP 429 +
//! `Retry-After`), so the connector's control flow never sees transient
//! throttling.
//!
//! Also home to the helpers both messaging connectors share: the channel
//! allowlist filter, message permalinks, and user-mention expansion.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::ConnectorError;
use crate::models::{Channel, Message, MessagePage};

/// Paginated list/join/history/replies/user-lookup capability of the
/// messaging workspace. Each method may fail with a source-API error
/// ([`ConnectorError::SourceApi`]), distinct from programming errors.
#[async_trait]
pub trait MessagingClient: Send + Sync {
    /// List non-archived channels, optionally including private channels
    /// the credential can see. Pages are drained internally.
    async fn list_channels(&self, include_private: bool) -> Result<Vec<Channel>>;

    /// Join a channel so its history becomes readable.
    async fn join_channel(&self, channel_id: &str) -> Result<()>;

    /// Fetch one page of channel history. `oldest`/`latest` are inclusive
    /// cursor bounds; `cursor` continues a previous page.
    async fn history_page(
        &self,
        channel_id: &str,
        oldest: Option<&str>,
        latest: Option<&str>,
        cursor: Option<&str>,
    ) -> Result<MessagePage>;

    /// Fetch the full reply chain for a thread root, draining pagination.
    async fn thread_replies(&self, channel_id: &str, root_ts: &str) -> Result<Vec<Message>>;

    /// Best-effort display name for a user id.
    async fn user_display_name(&self, user_id: &str) -> Result<Option<String>>;
}

/// REST implementation of [`MessagingClient`].
pub struct HttpMessagingClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
    max_retries: u32,
}

impl HttpMessagingClient {
    pub fn new(base_url: &str, token: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            max_retries: 5,
        }
    }

    /// Perform one API call, retrying through rate limiting.
    async fn call(&self, method: &str, params: &[(&str, String)]) -> Result<Value> {
        let url = format!("{}/{}", self.base_url, method);

        for attempt in 0..=self.max_retries {
            debug!(call = method, attempt, "messaging API call");
            let resp = self
                .http
                .get(&url)
                .bearer_auth(&self.token)
                .query(params)
                .send()
                .await
                .with_context(|| format!("request to '{}' failed", method))?;

            if resp.status() == StatusCode::TOO_MANY_REQUESTS {
                let delay = resp
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(1);
                warn!(call = method, delay_secs = delay, "rate limited, backing off");
                tokio::time::sleep(Duration::from_secs(delay)).await;
                continue;
            }

            let body: Value = resp
                .json()
                .await
                .with_context(|| format!("invalid response body from '{}'", method))?;

            if !body["ok"].as_bool().unwrap_or(false) {
                let message = body["error"].as_str().unwrap_or("unknown error").to_string();
                return Err(ConnectorError::SourceApi {
                    call: method.to_string(),
                    message,
                }
                .into());
            }
            return Ok(body);
        }

        Err(ConnectorError::SourceApi {
            call: method.to_string(),
            message: format!("still rate limited after {} retries", self.max_retries),
        }
        .into())
    }
}

fn next_cursor(body: &Value) -> Option<String> {
    body["response_metadata"]["next_cursor"]
        .as_str()
        .filter(|c| !c.is_empty())
        .map(str::to_string)
}

#[async_trait]
impl MessagingClient for HttpMessagingClient {
    async fn list_channels(&self, include_private: bool) -> Result<Vec<Channel>> {
        let types = if include_private {
            "public_channel,private_channel"
        } else {
            "public_channel"
        };

        let mut channels = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let mut params = vec![
                ("types", types.to_string()),
                ("exclude_archived", "true".to_string()),
            ];
            if let Some(c) = &cursor {
                params.push(("cursor", c.clone()));
            }
            let body = self.call("conversations.list", &params).await?;
            let page: Vec<Channel> = serde_json::from_value(body["channels"].clone())
                .context("malformed channel list in response")?;
            channels.extend(page);

            cursor = next_cursor(&body);
            if cursor.is_none() {
                break;
            }
        }
        Ok(channels)
    }

    async fn join_channel(&self, channel_id: &str) -> Result<()> {
        self.call("conversations.join", &[("channel", channel_id.to_string())])
            .await?;
        Ok(())
    }

    async fn history_page(
        &self,
        channel_id: &str,
        oldest: Option<&str>,
        latest: Option<&str>,
        cursor: Option<&str>,
    ) -> Result<MessagePage> {
        let mut params = vec![("channel", channel_id.to_string())];
        if let Some(oldest) = oldest {
            params.push(("oldest", oldest.to_string()));
        }
        if let Some(latest) = latest {
            params.push(("latest", latest.to_string()));
        }
        if let Some(cursor) = cursor {
            params.push(("cursor", cursor.to_string()));
        }

        let body = self.call("conversations.history", &params).await?;
        let messages: Vec<Message> = serde_json::from_value(body["messages"].clone())
            .context("malformed message list in response")?;
        Ok(MessagePage {
            messages,
            next_cursor: next_cursor(&body),
        })
    }

    async fn thread_replies(&self, channel_id: &str, root_ts: &str) -> Result<Vec<Message>> {
        let mut replies = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let mut params = vec![
                ("channel", channel_id.to_string()),
                ("ts", root_ts.to_string()),
            ];
            if let Some(c) = &cursor {
                params.push(("cursor", c.clone()));
            }
            let body = self.call("conversations.replies", &params).await?;
            let page: Vec<Message> = serde_json::from_value(body["messages"].clone())
                .context("malformed thread replies in response")?;
            replies.extend(page);

            cursor = next_cursor(&body);
            if cursor.is_none() {
                break;
            }
        }
        Ok(replies)
    }

    async fn user_display_name(&self, user_id: &str) -> Result<Option<String>> {
        let body = self
            .call("users.info", &[("user", user_id.to_string())])
            .await?;
        let profile = &body["user"]["profile"];
        let name = profile["display_name"]
            .as_str()
            .filter(|n| !n.is_empty())
            .or_else(|| profile["real_name"].as_str().filter(|n| !n.is_empty()))
            .or_else(|| body["user"]["name"].as_str())
            .map(str::to_string);
        Ok(name)
    }
}

/// Restrict `all_channels` to a caller-supplied name allowlist.
///
/// A requested name absent from the workspace fails loudly so the user
/// learns about a typo'd or invisible channel instead of silently syncing
/// nothing; the error enumerates the names that do exist.
pub fn filter_channels(all_channels: &[Channel], requested: Option<&[String]>) -> Result<Vec<Channel>> {
    let requested = match requested {
        Some(names) if !names.is_empty() => names,
        _ => return Ok(all_channels.to_vec()),
    };

    for name in requested {
        if !all_channels.iter().any(|c| &c.name == name) {
            let mut available: Vec<String> =
                all_channels.iter().map(|c| c.name.clone()).collect();
            available.sort();
            return Err(ConnectorError::ChannelNotFound {
                name: name.clone(),
                available,
            }
            .into());
        }
    }

    Ok(all_channels
        .iter()
        .filter(|c| requested.contains(&c.name))
        .cloned()
        .collect())
}

/// Build a web permalink for a message: the cursor token with its dot
/// stripped, in the workspace's archive URL scheme.
pub fn message_link(workspace: &str, channel_id: &str, ts: &str) -> String {
    format!(
        "https://{}/archives/{}/p{}",
        workspace,
        channel_id,
        ts.replace('.', "")
    )
}

/// Per-run cache for resolving `<@UID>` mentions to display names.
///
/// Lookup is best-effort: failures are cached as misses and the original
/// token is left in place.
pub struct UserResolver {
    client: Arc<dyn MessagingClient>,
    cache: HashMap<String, Option<String>>,
}

impl UserResolver {
    pub fn new(client: Arc<dyn MessagingClient>) -> Self {
        Self {
            client,
            cache: HashMap::new(),
        }
    }

    async fn lookup(&mut self, user_id: &str) -> Option<String> {
        if let Some(cached) = self.cache.get(user_id) {
            return cached.clone();
        }
        let resolved = match self.client.user_display_name(user_id).await {
            Ok(name) => name,
            Err(err) => {
                debug!(user_id, %err, "user lookup failed, keeping raw mention");
                None
            }
        };
        self.cache.insert(user_id.to_string(), resolved.clone());
        resolved
    }

    /// Replace every `<@UID>` token in `text` with `@display_name`,
    /// leaving unresolvable mentions untouched.
    pub async fn expand_mentions(&mut self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut rest = text;

        while let Some(start) = rest.find("<@") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            match after.find('>') {
                Some(end) => {
                    // Tolerate the legacy `<@UID|handle>` form.
                    let user_id = after[..end].split('|').next().unwrap_or("");
                    match self.lookup(user_id).await {
                        Some(name) => {
                            out.push('@');
                            out.push_str(&name);
                        }
                        None => out.push_str(&rest[start..start + end + 3]),
                    }
                    rest = &after[end + 1..];
                }
                None => {
                    out.push_str(&rest[start..]);
                    rest = "";
                    break;
                }
            }
        }
        out.push_str(rest);
        out
    }
}
