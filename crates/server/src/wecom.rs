//! WeCom application API client.
//!
//! Holds the access token in a small `{token, expires_at}` cache behind an
//! async mutex and refreshes it transparently shortly before it expires.

use std::time::{Duration, Instant};

use serde::Deserialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::dispatch::ReplySink;

pub const DEFAULT_API_BASE: &str = "https://qyapi.weixin.qq.com/cgi-bin";

/// Refresh this long before the platform-declared expiry.
const REFRESH_MARGIN: Duration = Duration::from_secs(300);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// `errcode`s meaning the token we sent is no longer accepted.
const STALE_TOKEN_CODES: &[i64] = &[40014, 42001];

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("WeCom API error {code}: {message}")]
    Api { code: i64, message: String },

    #[error("token response did not include an access_token")]
    MissingToken,
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    errcode: i64,
    #[serde(default)]
    errmsg: String,
    access_token: Option<String>,
    #[serde(default)]
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct ApiStatus {
    #[serde(default)]
    errcode: i64,
    #[serde(default)]
    errmsg: String,
}

pub struct WeComClient {
    http: reqwest::Client,
    api_base: String,
    corp_id: String,
    agent_id: i64,
    secret: String,
    token: Mutex<Option<CachedToken>>,
}

impl WeComClient {
    pub fn new(corp_id: &str, agent_id: i64, secret: &str) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            api_base: DEFAULT_API_BASE.to_string(),
            corp_id: corp_id.to_string(),
            agent_id,
            secret: secret.to_string(),
            token: Mutex::new(None),
        })
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    /// A valid access token, fetched only when the cached one is stale.
    pub async fn access_token(&self) -> Result<String, TransportError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.expires_at {
                return Ok(token.value.clone());
            }
        }

        let resp: TokenResponse = self
            .http
            .get(format!("{}/gettoken", self.api_base))
            .query(&[
                ("corpid", self.corp_id.as_str()),
                ("corpsecret", self.secret.as_str()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if resp.errcode != 0 {
            return Err(TransportError::Api {
                code: resp.errcode,
                message: resp.errmsg,
            });
        }
        let value = resp
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or(TransportError::MissingToken)?;

        let lifetime = Duration::from_secs(resp.expires_in).saturating_sub(REFRESH_MARGIN);
        *cached = Some(CachedToken {
            value: value.clone(),
            expires_at: Instant::now() + lifetime,
        });
        info!(
            component = "wecom_client",
            event = "wecom.token_refreshed",
            expires_in = resp.expires_in,
            "Access token refreshed"
        );
        Ok(value)
    }

    /// Send one text message to `user_id`. Not retried.
    pub async fn send_message(&self, user_id: &str, content: &str) -> Result<(), TransportError> {
        let token = self.access_token().await?;
        let body = serde_json::json!({
            "touser": user_id,
            "msgtype": "text",
            "agentid": self.agent_id,
            "text": { "content": content },
            "safe": 0,
        });

        let status: ApiStatus = self
            .http
            .post(format!("{}/message/send", self.api_base))
            .query(&[("access_token", token.as_str())])
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if status.errcode != 0 {
            if STALE_TOKEN_CODES.contains(&status.errcode) {
                warn!(
                    component = "wecom_client",
                    event = "wecom.token_rejected",
                    errcode = status.errcode,
                    "Cached access token rejected, dropping it"
                );
                *self.token.lock().await = None;
            }
            return Err(TransportError::Api {
                code: status.errcode,
                message: status.errmsg,
            });
        }
        Ok(())
    }
}

impl ReplySink for WeComClient {
    async fn send_text(&self, user_id: &str, content: &str) -> Result<(), TransportError> {
        self.send_message(user_id, content).await
    }
}
