// SPDX-FileCopyrightText: 2026 Outpost Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP client for the session bridge.
//!
//! Provides [`BridgeClient`] which handles authentication, request
//! construction and mapping of bridge failures onto [`OutpostError`].

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{Response, StatusCode};
use tracing::debug;

use outpost_config::model::WhatsAppConfig;
use outpost_core::{DeliveryReceipt, OutpostError};

use crate::types::{
    BridgeErrorBody, Registration, SendText, SentMessage, SessionStatus, StartSession,
};

/// HTTP client for one bridge endpoint. Cheap to clone.
#[derive(Debug, Clone)]
pub struct BridgeClient {
    client: reqwest::Client,
    base_url: String,
}

impl BridgeClient {
    /// Builds a client from the `[whatsapp]` section.
    ///
    /// Fails if `bridge_url` is unset or the token is not a valid header value.
    pub fn new(config: &WhatsAppConfig) -> Result<Self, OutpostError> {
        let base_url = config
            .bridge_url
            .as_deref()
            .ok_or_else(|| OutpostError::Config("whatsapp.bridge_url is not set".into()))?
            .trim_end_matches('/')
            .to_string();

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(token) = &config.api_token {
            let value = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|e| {
                OutpostError::Config(format!("invalid whatsapp.api_token header value: {e}"))
            })?;
            headers.insert(AUTHORIZATION, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| OutpostError::Channel {
                message: format!("failed to build HTTP client: {e}"),
                source: Some(Box::new(e)),
            })?;

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    pub async fn start_session(&self, session_dir: &str) -> Result<(), OutpostError> {
        let response = self
            .client
            .post(self.url("/session/start"))
            .json(&StartSession { session_dir })
            .send()
            .await
            .map_err(request_failed)?;
        ensure_success(response).await.map(|_| ())
    }

    pub async fn stop_session(&self) -> Result<(), OutpostError> {
        let response = self
            .client
            .post(self.url("/session/stop"))
            .send()
            .await
            .map_err(request_failed)?;
        ensure_success(response).await.map(|_| ())
    }

    /// Current session state.
    ///
    /// A 401/403 means the bridge rejected `whatsapp.api_token`, which is
    /// reported as [`OutpostError::Config`]. The paired session itself may be
    /// perfectly healthy.
    pub async fn status(&self) -> Result<SessionStatus, OutpostError> {
        let response = self
            .client
            .get(self.url("/session/status"))
            .send()
            .await
            .map_err(request_failed)?;

        let status = response.status();
        if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            let body = response.text().await.unwrap_or_default();
            return Err(OutpostError::Config(format!(
                "bridge rejected whatsapp.api_token ({})",
                error_message(status, &body)
            )));
        }
        let response = ensure_success(response).await?;
        let session = response.json::<SessionStatus>().await.map_err(bad_body)?;
        debug!(state = %session.state, "bridge status");
        Ok(session)
    }

    pub async fn is_registered(&self, chat_id: &str) -> Result<bool, OutpostError> {
        let response = self
            .client
            .get(self.url("/contacts/registered"))
            .query(&[("chatId", chat_id)])
            .send()
            .await
            .map_err(request_failed)?;
        let response = ensure_success(response).await?;
        let registration = response.json::<Registration>().await.map_err(bad_body)?;
        Ok(registration.registered)
    }

    pub async fn send_text(&self, chat_id: &str, text: &str) -> Result<DeliveryReceipt, OutpostError> {
        let response = self
            .client
            .post(self.url("/messages"))
            .json(&SendText { chat_id, text })
            .send()
            .await
            .map_err(request_failed)?;
        let response = ensure_success(response).await?;
        let sent = response.json::<SentMessage>().await.map_err(bad_body)?;
        Ok(DeliveryReceipt(sent.id))
    }
}

/// Passes 2xx responses through; turns anything else into a channel error
/// carrying the bridge's own message so classification can see it.
async fn ensure_success(response: Response) -> Result<Response, OutpostError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(OutpostError::channel(error_message(status, &body)))
}

fn error_message(status: StatusCode, body: &str) -> String {
    match serde_json::from_str::<BridgeErrorBody>(body) {
        Ok(parsed) => format!("bridge returned {status}: {}", parsed.error),
        Err(_) if body.is_empty() => format!("bridge returned {status}"),
        Err(_) => format!("bridge returned {status}: {body}"),
    }
}

fn request_failed(e: reqwest::Error) -> OutpostError {
    let message = if e.is_timeout() {
        format!("bridge request timed out: {e}")
    } else {
        format!("bridge connection failed: {e}")
    };
    OutpostError::Channel {
        message,
        source: Some(Box::new(e)),
    }
}

fn bad_body(e: reqwest::Error) -> OutpostError {
    OutpostError::Channel {
        message: format!("failed to parse bridge response: {e}"),
        source: Some(Box::new(e)),
    }
}
