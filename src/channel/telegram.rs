//! Telegram Bot API client using raw reqwest (no framework).
//!
//! Uses long-polling via `getUpdates` and sends replies via `sendMessage`.
//! Outbound calls are retried with exponential backoff on rate limits and
//! server errors; "forbidden" answers are reported as unreachable recipients.

use super::{Channel, ChannelError, ChannelEvent, OutboundMessage};
use crate::config::TelegramConfig;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc::Sender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Maximum message length for Telegram (we chunk below this).
const MAX_MESSAGE_LEN: usize = 4000;

/// Pause after a failed `getUpdates` before polling again.
const POLL_ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// Telegram Bot API client.
pub struct TelegramChannel {
    bot_token: String,
    allowed_user_ids: Vec<i64>,
    poll_timeout_secs: u64,
    retry: TelegramConfig,
    client: reqwest::Client,
}

// --- Telegram API response types ---

#[derive(Debug, Deserialize)]
struct TgResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
    #[serde(default)]
    error_code: Option<u16>,
    #[serde(default)]
    parameters: Option<TgResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct TgResponseParameters {
    #[serde(default)]
    retry_after: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct TgUpdate {
    update_id: i64,
    message: Option<TgMessage>,
}

#[derive(Debug, Deserialize)]
struct TgMessage {
    message_id: i64,
    chat: TgChat,
    from: Option<TgUser>,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TgChat {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct TgUser {
    id: i64,
    #[serde(default)]
    first_name: String,
    #[serde(default)]
    username: Option<String>,
}

/// Outcome of a single Bot API request.
enum Attempt {
    Done(Value),
    Retry {
        error: ChannelError,
        after: Option<Duration>,
    },
    Fail(ChannelError),
}

impl TelegramChannel {
    pub fn new(config: &TelegramConfig, allowed_user_ids: Vec<i64>) -> Result<Self, ChannelError> {
        // The HTTP timeout has to outlast the long-poll timeout.
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.poll_timeout_secs + 30))
            .build()?;

        Ok(Self {
            bot_token: config.bot_token.clone(),
            allowed_user_ids,
            poll_timeout_secs: config.poll_timeout_secs,
            retry: config.clone(),
            client,
        })
    }

    fn api_url(&self, method: &str) -> String {
        format!("https://api.telegram.org/bot{}/{method}", self.bot_token)
    }

    fn is_user_allowed(&self, user_id: i64) -> bool {
        self.allowed_user_ids.is_empty() || self.allowed_user_ids.contains(&user_id)
    }

    /// Parse a message into a ChannelEvent.
    fn parse_message(msg: &TgMessage) -> Option<ChannelEvent> {
        let text = msg.text.as_deref()?.trim();
        if text.is_empty() {
            return None;
        }

        let user = msg.from.as_ref()?;
        let user_name = user
            .username
            .clone()
            .unwrap_or_else(|| user.first_name.clone());

        if let Some(rest) = text.strip_prefix('/') {
            // Split command from args: "/register abc" -> ("register", "abc")
            let (command, args) = match rest.split_once(char::is_whitespace) {
                Some((cmd, args)) => (cmd, args),
                None => (rest, ""),
            };
            // Strip @botname suffix from commands like "/register@mybot"
            let command = command.split('@').next().unwrap_or(command);
            Some(ChannelEvent::Command {
                chat_id: msg.chat.id,
                message_id: msg.message_id,
                user_id: user.id,
                user_name,
                command: command.to_owned(),
                args: args.trim().to_owned(),
            })
        } else {
            Some(ChannelEvent::Message {
                chat_id: msg.chat.id,
                message_id: msg.message_id,
                user_id: user.id,
                user_name,
                text: text.to_owned(),
            })
        }
    }

    /// Long-poll for updates from Telegram.
    async fn get_updates(&self, offset: i64) -> Result<Vec<TgUpdate>, ChannelError> {
        let resp = self
            .client
            .get(self.api_url("getUpdates"))
            .query(&[
                ("offset", offset.to_string()),
                ("timeout", self.poll_timeout_secs.to_string()),
            ])
            .send()
            .await?;

        let body: TgResponse<Vec<TgUpdate>> = resp.json().await?;

        if !body.ok {
            let desc = body.description.unwrap_or_default();
            return Err(ChannelError::Api(desc));
        }

        Ok(body.result.unwrap_or_default())
    }

    /// POST a Bot API method, retrying transient failures.
    async fn call(&self, method: &str, payload: &Value) -> Result<Value, ChannelError> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.call_once(method, payload).await {
                Attempt::Done(result) => return Ok(result),
                Attempt::Fail(error) => return Err(error),
                Attempt::Retry { error, .. } if attempt > self.retry.max_retries => {
                    return Err(error);
                }
                Attempt::Retry { error, after } => {
                    let delay = after.unwrap_or_else(|| self.retry.backoff_delay(attempt));
                    warn!(method, attempt, ?delay, error = %error, "telegram call failed, retrying");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn call_once(&self, method: &str, payload: &Value) -> Attempt {
        let resp = match self
            .client
            .post(self.api_url(method))
            .json(payload)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) if e.is_timeout() || e.is_connect() || e.is_request() => {
                return Attempt::Retry {
                    error: e.into(),
                    after: None,
                };
            }
            Err(e) => return Attempt::Fail(e.into()),
        };

        let status = resp.status();
        let body: TgResponse<Value> = match resp.json().await {
            Ok(body) => body,
            Err(e) if is_retryable_status(status) => {
                return Attempt::Retry {
                    error: e.into(),
                    after: None,
                };
            }
            Err(e) => return Attempt::Fail(e.into()),
        };

        if body.ok {
            return Attempt::Done(body.result.unwrap_or(Value::Null));
        }

        let code = body.error_code.unwrap_or(status.as_u16());
        let description = body.description.unwrap_or_default();
        let retry_after = body
            .parameters
            .and_then(|p| p.retry_after)
            .map(Duration::from_secs);
        classify_failure(code, description, retry_after)
    }

    /// Send a text message, chunking if necessary.
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<(), ChannelError> {
        for chunk in chunk_message(text) {
            let payload = serde_json::json!({
                "chat_id": chat_id,
                "text": chunk,
            });
            self.call("sendMessage", &payload).await?;
        }
        debug!(chat_id, "telegram message sent");
        Ok(())
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    matches!(status.as_u16(), 429 | 500 | 502 | 503 | 504)
}

/// Map a failed Bot API answer onto retry / permanent / plain failure.
fn classify_failure(code: u16, description: String, retry_after: Option<Duration>) -> Attempt {
    let lower = description.to_lowercase();
    if code == 403
        || lower.contains("bot was blocked")
        || lower.contains("chat not found")
        || lower.contains("user is deactivated")
    {
        return Attempt::Fail(ChannelError::Unreachable(description));
    }
    if matches!(code, 429 | 500 | 502 | 503 | 504) {
        return Attempt::Retry {
            error: ChannelError::Api(format!("{code}: {description}")),
            after: retry_after,
        };
    }
    Attempt::Fail(ChannelError::Api(format!("{code}: {description}")))
}

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &'static str {
        "telegram"
    }

    async fn run(&self, tx: Sender<ChannelEvent>, cancel: CancellationToken) {
        let mut offset: i64 = 0;
        info!("telegram polling started");

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let updates = tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.get_updates(offset) => {
                    match result {
                        Ok(updates) => updates,
                        Err(e) => {
                            error!(error = %e, "telegram poll error");
                            tokio::select! {
                                _ = cancel.cancelled() => break,
                                _ = tokio::time::sleep(POLL_ERROR_BACKOFF) => {}
                            }
                            continue;
                        }
                    }
                }
            };

            for update in updates {
                offset = update.update_id + 1;

                let Some(msg) = update.message else {
                    continue;
                };

                // Check user authorization.
                if let Some(user) = &msg.from
                    && !self.is_user_allowed(user.id)
                {
                    warn!(user_id = user.id, "ignoring message from unauthorized user");
                    continue;
                }

                if let Some(event) = Self::parse_message(&msg)
                    && tx.send(event).await.is_err()
                {
                    // Receiver dropped, shut down.
                    return;
                }
            }
        }
        info!("telegram polling stopped");
    }

    async fn send_message(&self, msg: &OutboundMessage) -> Result<(), ChannelError> {
        self.send_text(msg.chat_id, &msg.text).await
    }
}

/// Split a message into chunks that fit within Telegram's limit.
fn chunk_message(text: &str) -> Vec<&str> {
    if text.len() <= MAX_MESSAGE_LEN {
        return vec![text];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        if remaining.len() <= MAX_MESSAGE_LEN {
            chunks.push(remaining);
            break;
        }

        let mut limit = MAX_MESSAGE_LEN;
        while !remaining.is_char_boundary(limit) {
            limit -= 1;
        }

        // Try to split at a newline within the limit.
        let split_at = match remaining[..limit].rfind('\n') {
            Some(0) | None => limit,
            Some(i) => i,
        };

        let (chunk, rest) = remaining.split_at(split_at);
        chunks.push(chunk);
        // Skip the newline we split on.
        remaining = rest.strip_prefix('\n').unwrap_or(rest);
    }

    chunks
}
