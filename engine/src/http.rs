//! HTTP transport backed by `reqwest`.
//!
//! Maps replay outcomes onto the REST conventions of the backing API:
//! success bodies carry the updated entity including its version field, and
//! stale writes come back as `409 Conflict` with the server's current
//! representation in the body.

use crate::{Method, ReplayRequest, ReplayResponse, Transport, TransportError, VersionMarker};
use reqwest::StatusCode;

const DEFAULT_VERSION_FIELD: &str = "updated_at";
const DEFAULT_PROBE_PATH: &str = "/health";
const BASELINE_HEADER: &str = "X-Baseline-Version";

/// Coarse classification of a response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Success,
    Conflict,
    Transient,
    Rejected,
}

/// Transport that replays mutations as JSON requests against a REST API.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    base_url: String,
    version_field: String,
    probe_path: String,
    client: reqwest::Client,
}

impl HttpTransport {
    /// Create a transport for the given base URL (scheme required).
    pub fn new(base_url: impl Into<String>) -> crate::Result<Self> {
        let base_url = base_url.into();
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(crate::Error::InvalidRequest(format!(
                "base url must start with http:// or https://: {base_url}"
            )));
        }
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            version_field: DEFAULT_VERSION_FIELD.to_string(),
            probe_path: DEFAULT_PROBE_PATH.to_string(),
            client: reqwest::Client::new(),
        })
    }

    /// Override the payload field read as the version marker.
    pub fn with_version_field(mut self, field: impl Into<String>) -> Self {
        self.version_field = field.into();
        self
    }

    /// Override the path probed for reachability.
    pub fn with_probe_path(mut self, path: impl Into<String>) -> Self {
        self.probe_path = path.into();
        self
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'))
    }

    fn request(&self, method: Method, url: &str) -> reqwest::RequestBuilder {
        match method {
            Method::Post => self.client.post(url),
            Method::Put => self.client.put(url),
            Method::Patch => self.client.patch(url),
            Method::Delete => self.client.delete(url),
        }
    }
}

fn classify_status(status: StatusCode) -> Outcome {
    if status.is_success() {
        return Outcome::Success;
    }
    match status.as_u16() {
        409 => Outcome::Conflict,
        408 | 425 | 429 => Outcome::Transient,
        code if (500..600).contains(&code) => Outcome::Transient,
        _ => Outcome::Rejected,
    }
}

/// Pull the version marker out of a response body. Accepts string and
/// integer representations; integers are normalized to their decimal form.
fn extract_marker(body: &serde_json::Value, field: &str) -> Option<VersionMarker> {
    match body.get(field)? {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Human-readable description of an error response.
fn describe(status: StatusCode, body: &str) -> String {
    let detail = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .or_else(|| v.get("message"))
                .and_then(|m| m.as_str().map(str::to_string))
        });
    match detail {
        Some(detail) => format!("{status}: {detail}"),
        None => status.to_string(),
    }
}

impl Transport for HttpTransport {
    async fn replay(
        &self,
        request: ReplayRequest<'_>,
    ) -> Result<ReplayResponse, TransportError> {
        let url = self.url(request.endpoint);
        let mut builder = self.request(request.method, &url).json(request.payload);
        if let Some(baseline) = request.baseline_version {
            builder = builder.header(BASELINE_HEADER, baseline);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| TransportError::Transient(e.to_string()))?;
        let status = response.status();

        match classify_status(status) {
            Outcome::Success => {
                let body: serde_json::Value = response
                    .json()
                    .await
                    .map_err(|e| TransportError::Transient(e.to_string()))?;
                let version_marker = extract_marker(&body, &self.version_field)
                    .ok_or_else(|| {
                        TransportError::Rejected(format!(
                            "response body missing version field {:?}",
                            self.version_field
                        ))
                    })?;
                Ok(ReplayResponse::Applied {
                    payload: body,
                    version_marker,
                })
            }
            Outcome::Conflict => {
                let body: serde_json::Value = response
                    .json()
                    .await
                    .map_err(|e| TransportError::Transient(e.to_string()))?;
                let server_version = extract_marker(&body, &self.version_field)
                    .ok_or_else(|| {
                        TransportError::Rejected(format!(
                            "conflict body missing version field {:?}",
                            self.version_field
                        ))
                    })?;
                Ok(ReplayResponse::VersionMismatch {
                    server_payload: body,
                    server_version,
                })
            }
            Outcome::Transient => {
                let body = response.text().await.unwrap_or_default();
                Err(TransportError::Transient(describe(status, &body)))
            }
            Outcome::Rejected => {
                let body = response.text().await.unwrap_or_default();
                Err(TransportError::Rejected(describe(status, &body)))
            }
        }
    }

    async fn probe(&self) -> bool {
        let url = self.url(&self.probe_path);
        matches!(self.client.get(&url).send().await, Ok(r) if !r.status().is_server_error())
    }
}
