//! HTTP side of the server: login, registration, history and uploads.

use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use reqwest::StatusCode;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;

use crate::auth::Credential;
use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::feed::{FeedEntry, WireEntry};

/// Default limit on one HTTP request, body included.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Client for the REST endpoints next to the live stream.
#[derive(Debug, Clone)]
pub struct HttpApi {
    http: reqwest::Client,
    endpoint: Endpoint,
}

impl HttpApi {
    pub fn new(endpoint: Endpoint) -> Self {
        Self::with_timeout(endpoint, DEFAULT_REQUEST_TIMEOUT)
    }

    /// A client whose requests fail once `timeout` passes without a complete
    /// response.
    pub fn with_timeout(endpoint: Endpoint, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self { http, endpoint }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Exchange a username and one-time password for an access token.
    pub async fn login(&self, username: &str, otp: &str) -> Result<String> {
        let username = username.trim();
        let otp = otp.trim();
        if username.is_empty() || otp.is_empty() {
            return Err(Error::InvalidCredential);
        }
        let form = Form::new()
            .text("username", username.to_string())
            .text("otp", otp.to_string());
        let resp = self
            .http
            .post(self.endpoint.http_url("/login"))
            .multipart(form)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            tracing::info!(%status, "login refused");
            return Err(Error::AuthenticationFailed(refusal(status, &body)));
        }
        let token: TokenResponse = resp.json().await?;
        tracing::info!(username, "logged in");
        Ok(token.access_token)
    }

    /// Enroll `username`. Returns the enrollment image (a PNG QR code).
    pub async fn register(&self, username: &str) -> Result<Vec<u8>> {
        let username = username.trim();
        if username.is_empty() {
            return Err(Error::InvalidCredential);
        }
        let form = Form::new().text("username", username.to_string());
        let resp = self
            .http
            .post(self.endpoint.http_url("/register"))
            .multipart(form)
            .send()
            .await?;
        let resp = check(resp).await?;
        Ok(resp.bytes().await?.to_vec())
    }

    /// Fetch the history snapshot, oldest first.
    ///
    /// Records that do not form a valid entry are skipped with a warning.
    pub async fn history(&self, credential: &Credential) -> Result<Vec<FeedEntry>> {
        let resp = self
            .http
            .get(self.endpoint.http_url("/history"))
            .bearer_auth(credential.token())
            .send()
            .await?;
        let resp = check(resp).await?;
        let records: Vec<serde_json::Value> = resp
            .json()
            .await
            .map_err(|e| Error::MalformedInboundPayload(format!("history body: {e}")))?;

        let received_at = Utc::now();
        let total = records.len();
        let entries: Vec<FeedEntry> = records
            .into_iter()
            .filter_map(|v| {
                let parsed = serde_json::from_value::<WireEntry>(v)
                    .map_err(|e| Error::MalformedInboundPayload(e.to_string()))
                    .and_then(|w| FeedEntry::from_wire(w, received_at));
                match parsed {
                    Ok(e) => Some(e),
                    Err(e) => {
                        tracing::warn!("skipping history record: {e}");
                        None
                    }
                }
            })
            .collect();
        tracing::debug!(total, kept = entries.len(), "history fetched");
        Ok(entries)
    }

    /// Upload a file. The resulting `file` entry arrives over the live stream.
    pub async fn upload(
        &self,
        credential: &Credential,
        filename: &str,
        content_type: Option<&str>,
        bytes: Vec<u8>,
    ) -> Result<()> {
        let size = bytes.len();
        let mut part = Part::bytes(bytes).file_name(filename.to_string());
        if let Some(ct) = content_type {
            part = part
                .mime_str(ct)
                .map_err(|_| Error::InvalidContentType(ct.to_string()))?;
        }
        let resp = self
            .http
            .post(self.endpoint.http_url("/upload"))
            .bearer_auth(credential.token())
            .multipart(Form::new().part("file", part))
            .send()
            .await?;
        check(resp).await?;
        tracing::info!(filename, size, "uploaded");
        Ok(())
    }

    /// Read `path` and upload it under its file name.
    pub async fn upload_file(
        &self,
        credential: &Credential,
        path: &Path,
        content_type: Option<&str>,
    ) -> Result<()> {
        let bytes = tokio::fs::read(path).await?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        self.upload(credential, &filename, content_type, bytes).await
    }
}

/// Map auth statuses to [`Error::AuthenticationFailed`] and any other
/// non-success status to [`Error::Http`].
async fn check(resp: reqwest::Response) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    if is_auth_status(status.as_u16()) {
        return Err(Error::AuthenticationFailed(refusal(status, &body)));
    }
    Err(Error::Http {
        status: status.as_u16(),
        body,
    })
}

/// Statuses that reject the credential itself.
pub(crate) fn is_auth_status(status: u16) -> bool {
    matches!(status, 401 | 403)
}

fn refusal(status: StatusCode, body: &str) -> String {
    // Refusals carry `{"detail": "..."}`.
    let detail = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("detail").and_then(|d| d.as_str()).map(str::to_string));
    match detail {
        Some(d) => format!("HTTP {}: {d}", status.as_u16()),
        None => format!("HTTP {}", status.as_u16()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refusal_prefers_detail() {
        assert_eq!(
            refusal(StatusCode::UNAUTHORIZED, r#"{"detail":"Invalid OTP"}"#),
            "HTTP 401: Invalid OTP"
        );
        assert_eq!(refusal(StatusCode::FORBIDDEN, "nope"), "HTTP 403");
    }

    #[test]
    fn only_401_and_403_are_auth() {
        assert!(is_auth_status(401));
        assert!(is_auth_status(403));
        assert!(!is_auth_status(500));
        assert!(!is_auth_status(404));
    }

    /// An address nothing listens on; any request to it is a transport error.
    fn unreachable() -> Endpoint {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        Endpoint::parse(&format!("http://{addr}")).unwrap()
    }

    #[tokio::test]
    async fn empty_login_fields_never_hit_the_network() {
        let api = HttpApi::new(unreachable());
        assert!(matches!(api.login("", "123456").await, Err(Error::InvalidCredential)));
        assert!(matches!(api.login("alice", "  ").await, Err(Error::InvalidCredential)));
        assert!(matches!(api.register(" ").await, Err(Error::InvalidCredential)));
    }

    #[tokio::test]
    async fn bad_content_type_is_rejected_before_sending() {
        let api = HttpApi::new(unreachable());
        let gateway = crate::auth::AuthTokenGateway::new();
        gateway.set_credential("tok", "alice").unwrap();
        let credential = gateway.credential().unwrap();

        let err = api
            .upload(&credential, "a.txt", Some("plain text"), b"hi".to_vec())
            .await
            .unwrap_err();
        assert!(matches!(&err, Error::InvalidContentType(ct) if ct == "plain text"));
        assert!(!err.is_user_visible());
    }
}
