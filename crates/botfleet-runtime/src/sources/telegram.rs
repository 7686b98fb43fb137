// Telegram long-polling source
//
// attach() validates the token against getMe, then the source long-polls
// getUpdates. Transient transport errors are logged and retried after a
// short backoff; cancellation happens at the worker's select boundary, so
// the retry sleep never delays a stop request.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;

use botfleet_core::{EventSource, SourceConnector, SourceError, SourceEvent};

const DEFAULT_API_BASE: &str = "https://api.telegram.org";
const LONG_POLL_SECONDS: u32 = 50;
const ERROR_BACKOFF: Duration = Duration::from_secs(2);

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    #[serde(default)]
    message: Option<Message>,
}

#[derive(Debug, Deserialize)]
struct Message {
    #[serde(default)]
    from: Option<User>,
}

#[derive(Debug, Default, Deserialize)]
struct User {
    id: i64,
    #[serde(default)]
    username: Option<String>,
}

/// Production connector over the Telegram Bot API
#[derive(Clone)]
pub struct TelegramConnector {
    http: reqwest::Client,
    api_base: String,
}

impl TelegramConnector {
    pub fn new() -> Self {
        Self::with_api_base(DEFAULT_API_BASE)
    }

    /// Point at a different API endpoint (tests, local gateways)
    pub fn with_api_base(api_base: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            // Must outlast the long-poll hold time
            .timeout(Duration::from_secs(LONG_POLL_SECONDS as u64 + 20))
            .build()
            .unwrap_or_default();
        Self {
            http,
            api_base: api_base.into(),
        }
    }
}

impl Default for TelegramConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SourceConnector for TelegramConnector {
    async fn attach(&self, token: &str) -> Result<Box<dyn EventSource>, SourceError> {
        let url = format!("{}/bot{}/getMe", self.api_base, token);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| SourceError::Attach(e.to_string()))?;
        let body: ApiResponse<User> = response
            .json()
            .await
            .map_err(|e| SourceError::Attach(e.to_string()))?;

        if !body.ok {
            return Err(SourceError::Attach(
                body.description.unwrap_or_else(|| "getMe rejected".into()),
            ));
        }

        Ok(Box::new(TelegramSource {
            http: self.http.clone(),
            bot_base: format!("{}/bot{}", self.api_base, token),
            offset: 0,
            buffered: VecDeque::new(),
        }))
    }
}

/// One worker's long-poll stream
#[derive(Debug)]
pub struct TelegramSource {
    http: reqwest::Client,
    bot_base: String,
    offset: i64,
    buffered: VecDeque<SourceEvent>,
}

#[async_trait]
impl EventSource for TelegramSource {
    async fn next_event(&mut self) -> Result<SourceEvent, SourceError> {
        loop {
            if let Some(event) = self.buffered.pop_front() {
                return Ok(event);
            }
            if let Err(e) = self.poll_once().await {
                warn!(error = %e, "long poll failed, backing off");
                tokio::time::sleep(ERROR_BACKOFF).await;
            }
        }
    }
}

impl TelegramSource {
    async fn poll_once(&mut self) -> Result<(), SourceError> {
        let url = format!(
            "{}/getUpdates?timeout={}&offset={}",
            self.bot_base, LONG_POLL_SECONDS, self.offset
        );
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| SourceError::Receive(e.to_string()))?;
        let body: ApiResponse<Vec<Update>> = response
            .json()
            .await
            .map_err(|e| SourceError::Receive(e.to_string()))?;

        if !body.ok {
            return Err(SourceError::Receive(
                body.description
                    .unwrap_or_else(|| "getUpdates rejected".into()),
            ));
        }

        for update in body.result.unwrap_or_default() {
            self.offset = self.offset.max(update.update_id + 1);
            let Some(user) = update.message.and_then(|m| m.from) else {
                continue;
            };
            let label = user
                .username
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| format!("user_{}", user.id));
            self.buffered.push_back(SourceEvent {
                subject_id: user.id,
                subject_label: label,
            });
        }

        Ok(())
    }
}
