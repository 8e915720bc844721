// SPDX-FileCopyrightText: 2026 Outpost Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Bridge REST request and response bodies.

use serde::{Deserialize, Serialize};

/// Body of `POST /session/start`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSession<'a> {
    /// Where the bridge keeps the paired session between restarts.
    pub session_dir: &'a str,
}

/// Response of `GET /session/status`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    /// Provider state string: `OPENING`, `PAIRING`, `CONNECTED`, `CONFLICT`,
    /// `UNPAIRED`, `TIMEOUT`, `DISCONNECTED`, ...
    pub state: String,
    /// Pairing payload to present to the operator while `state` is `PAIRING`.
    #[serde(default)]
    pub pairing_code: Option<String>,
    /// Provider reason attached to a disconnect.
    #[serde(default)]
    pub reason: Option<String>,
}

/// Body of `POST /messages`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendText<'a> {
    pub chat_id: &'a str,
    pub text: &'a str,
}

/// Response of `POST /messages`.
#[derive(Debug, Deserialize)]
pub struct SentMessage {
    pub id: String,
}

/// Response of `GET /contacts/registered`.
#[derive(Debug, Deserialize)]
pub struct Registration {
    pub registered: bool,
}

/// Error body returned by the bridge on non-2xx responses.
#[derive(Debug, Deserialize)]
pub struct BridgeErrorBody {
    pub error: String,
}
