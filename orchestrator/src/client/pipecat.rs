use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use reqwest::header::RETRY_AFTER;
use serde::Deserialize;
use serde_json::json;

use super::bearer;
use super::join_url;
use crate::error::StartAgentError;
use crate::error::VerifyError;
use crate::job::RoomDescriptor;
use crate::report::VerificationReport;
use crate::spawner::AgentStarted;
use crate::spawner::AgentStarter;
use crate::truncation;

pub const DEFAULT_PIPECAT_API_URL: &str = "https://api.pipecat.daily.co/v1";

/// Extra sessions requested beyond the expected count when verifying.
const SESSION_LIMIT_SLACK: usize = 100;

/// Client for the agent control plane.
///
/// Starting agents uses the public key; listing sessions needs the private
/// key and is only available when one was configured.
#[derive(Clone)]
pub struct PipecatCloudClient {
    http: reqwest::Client,
    base_url: String,
    public_key: String,
    private_key: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartResponse {
    #[serde(default)]
    session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SessionsPage {
    #[serde(default)]
    total_count: usize,
    #[serde(default)]
    sessions: Vec<SessionEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionEntry {
    #[serde(default)]
    cold_start: bool,
}

impl PipecatCloudClient {
    pub fn new(base_url: impl Into<String>, public_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            public_key: public_key.into(),
            private_key: None,
        }
    }

    pub fn with_private_key(mut self, private_key: Option<String>) -> Self {
        self.private_key = private_key.filter(|key| !key.is_empty());
        self
    }

    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    pub fn can_verify(&self) -> bool {
        self.private_key.is_some()
    }

    /// Compares the control plane's active sessions with `expected`.
    ///
    /// Returns `Ok(None)` when no private key is configured.
    pub async fn verify_active_sessions(
        &self,
        agent_name: &str,
        expected: usize,
    ) -> Result<Option<VerificationReport>, VerifyError> {
        let Some(private_key) = self.private_key.as_deref() else {
            return Ok(None);
        };
        let limit = (expected + SESSION_LIMIT_SLACK).to_string();
        let response = self
            .http
            .get(join_url(
                &self.base_url,
                &format!("agents/{agent_name}/sessions"),
            ))
            .header(reqwest::header::AUTHORIZATION, bearer(private_key))
            .query(&[("status", "active"), ("limit", limit.as_str())])
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(VerifyError::Status {
                status: status.as_u16(),
                body: truncation::detail(&text),
            });
        }
        let page: SessionsPage =
            serde_json::from_str(&text).map_err(|err| VerifyError::Decode(err.to_string()))?;
        let cold_starts = page.sessions.iter().filter(|s| s.cold_start).count();
        Ok(Some(VerificationReport {
            expected,
            active: page.total_count,
            cold_starts,
            warm_starts: page.sessions.len() - cold_starts,
        }))
    }
}

#[async_trait]
impl AgentStarter for PipecatCloudClient {
    async fn start_agent(
        &self,
        room: &RoomDescriptor,
        agent_name: &str,
    ) -> Result<AgentStarted, StartAgentError> {
        let mut body = json!({ "dailyRoomUrl": room.url });
        if let Some(token) = &room.token {
            body["dailyRoomToken"] = json!(token);
        }
        let payload = json!({
            "createDailyRoom": false,
            "transport": "daily",
            "dailyRoomUrl": room.url,
            "body": body,
        });

        let response = self
            .http
            .post(join_url(
                &self.base_url,
                &format!("public/{agent_name}/start"),
            ))
            .header(reqwest::header::AUTHORIZATION, bearer(&self.public_key))
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(StartAgentError::RateLimited {
                retry_after: retry_after(response.headers(), Utc::now()),
            });
        }
        if status.is_success() {
            // A queued start may come back without a body.
            let session_id = response
                .text()
                .await
                .ok()
                .and_then(|text| serde_json::from_str::<StartResponse>(&text).ok())
                .and_then(|parsed| parsed.session_id);
            return Ok(AgentStarted { session_id });
        }

        let text = response.text().await.unwrap_or_default();
        Err(StartAgentError::Permanent {
            status: status.as_u16(),
            body: truncation::detail(&text),
        })
    }
}

/// Reads `Retry-After` as either delay seconds or an HTTP date.
fn retry_after(headers: &HeaderMap, now: DateTime<Utc>) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }
    let date = DateTime::parse_from_rfc2822(value).ok()?;
    let delay = date.with_timezone(&Utc).signed_duration_since(now);
    Some(delay.to_std().unwrap_or(Duration::ZERO))
}
