//! ThingsBoard REST API client.
//!
//! See <https://thingsboard.io/docs/reference/rest-api/>.

use std::time::Duration;

use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ReceiveError, Result};

const AUTH_HEADER: &str = "X-Authorization";

/// Upper bound for a single REST request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Login credentials for a ThingsBoard user.
#[derive(Clone, Serialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// JWT access and refresh tokens.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenPair {
    pub token: String,
    #[serde(rename = "refreshToken")]
    pub refresh_token: String,
}

/// Device metadata returned by the device lookup.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "DeviceRecord")]
pub struct DeviceInfo {
    pub id: String,
    pub name: String,
}

#[derive(Deserialize)]
struct EntityId {
    id: String,
}

#[derive(Deserialize)]
struct DeviceRecord {
    id: EntityId,
    #[serde(default)]
    name: String,
}

impl From<DeviceRecord> for DeviceInfo {
    fn from(record: DeviceRecord) -> Self {
        Self {
            id: record.id.id,
            name: record.name,
        }
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

/// Minimal REST client for the endpoints the receiver needs.
#[derive(Debug, Clone)]
pub struct RestClient {
    http: Client,
    base: String,
}

impl RestClient {
    /// Create a client for a base URL such as `https://thingsboard.mydomain.com`.
    pub fn new(base: impl Into<String>) -> Result<Self> {
        let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            base: base.into(),
        })
    }

    /// Exchange login credentials for session tokens.
    ///
    /// Logs in to get a login token pair, then trades the login tokens for
    /// the session pair used by the websocket API.
    pub async fn fetch_tokens(&self, credentials: &Credentials) -> Result<TokenPair> {
        let response = self
            .http
            .post(format!("{}/api/auth/login", self.base))
            .json(credentials)
            .send()
            .await?;
        let login: TokenPair = match response.status() {
            StatusCode::OK => response.json().await?,
            status => return Err(auth_error("login", status, response).await),
        };
        debug!("Received login tokens");

        let response = self
            .http
            .post(format!("{}/api/auth/token", self.base))
            .header(AUTH_HEADER, bearer(&login.token))
            .json(&serde_json::json!({ "refreshToken": login.refresh_token }))
            .send()
            .await?;
        match response.status() {
            StatusCode::OK => Ok(response.json().await?),
            status => Err(auth_error("main", status, response).await),
        }
    }

    /// Look up device metadata for a batch of device ids.
    ///
    /// The response order is not guaranteed to match `ids`.
    pub async fn fetch_devices(&self, token: &str, ids: &[String]) -> Result<Vec<DeviceInfo>> {
        let response = self
            .http
            .get(format!("{}/api/devices", self.base))
            .query(&[("deviceIds", ids.join(","))])
            .header(AUTH_HEADER, bearer(token))
            .send()
            .await?;
        match response.status() {
            StatusCode::OK => Ok(response.json().await?),
            status => Err(ReceiveError::Request {
                request: "fetching device(s)",
                status: status.as_u16(),
                message: error_message(response).await,
            }),
        }
    }
}

fn bearer(token: &str) -> String {
    format!("Bearer {}", token)
}

async fn auth_error(step: &'static str, status: StatusCode, response: Response) -> ReceiveError {
    ReceiveError::Auth {
        step,
        status: status.as_u16(),
        message: error_message(response).await,
    }
}

/// The server's `message` field, or the raw body when it has none.
async fn error_message(response: Response) -> String {
    let body = response.text().await.unwrap_or_default();
    parse_error_message(&body)
}

fn parse_error_message(body: &str) -> String {
    serde_json::from_str::<ErrorBody>(body)
        .map(|e| e.message)
        .unwrap_or_else(|_| body.trim().to_string())
}
