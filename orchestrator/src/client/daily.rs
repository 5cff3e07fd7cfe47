use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

use super::bearer;
use super::join_url;
use crate::error::ProvisionError;
use crate::job::RoomDescriptor;
use crate::provision::RoomBatchRequest;
use crate::provision::RoomProvisioner;
use crate::truncation;

pub const DEFAULT_DAILY_API_URL: &str = "https://api.daily.co/v1";

/// Creates rooms through Daily's `POST /batch/rooms` endpoint.
#[derive(Clone)]
pub struct DailyRoomsClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Serialize)]
struct BatchRoomsBody {
    rooms: Vec<RoomSpec>,
}

#[derive(Serialize)]
struct RoomSpec {
    name: String,
    properties: RoomProperties,
}

#[derive(Serialize)]
struct RoomProperties {
    /// Unix seconds.
    exp: i64,
}

#[derive(Deserialize)]
struct BatchRoomsResponse {
    #[serde(default)]
    data: Vec<CreatedRoom>,
}

#[derive(Deserialize)]
struct CreatedRoom {
    name: String,
    url: String,
    #[serde(default)]
    token: Option<String>,
}

impl DailyRoomsClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self::with_http_client(reqwest::Client::new(), base_url, api_key)
    }

    pub fn with_http_client(
        http: reqwest::Client,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl RoomProvisioner for DailyRoomsClient {
    async fn create_rooms(
        &self,
        request: &RoomBatchRequest,
    ) -> Result<Vec<RoomDescriptor>, ProvisionError> {
        let expires_at = request.expires_at(Utc::now());
        let body = BatchRoomsBody {
            rooms: request
                .room_names()
                .into_iter()
                .map(|name| RoomSpec {
                    name,
                    properties: RoomProperties {
                        exp: expires_at.timestamp(),
                    },
                })
                .collect(),
        };

        let response = self
            .http
            .post(join_url(&self.base_url, "batch/rooms"))
            .header(reqwest::header::AUTHORIZATION, bearer(&self.api_key))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(ProvisionError::Status {
                status: status.as_u16(),
                body: truncation::detail(&text),
            });
        }
        tracing::debug!(bytes = text.len(), "batch rooms response received");

        let parsed: BatchRoomsResponse = serde_json::from_str(&text)
            .map_err(|err| ProvisionError::Decode(err.to_string()))?;
        Ok(parsed
            .data
            .into_iter()
            .map(|room| RoomDescriptor {
                name: room.name,
                url: room.url,
                token: room.token,
                expires_at,
            })
            .collect())
    }
}
