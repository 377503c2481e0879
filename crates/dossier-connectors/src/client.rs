use dossier_core::{DossierError, MediaType, Result, SearchContext};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use reqwest::StatusCode;
use std::time::Duration;
use tracing::debug;

const DEFAULT_USER_AGENT: &str = "dossier-osint/0.1 (+https://github.com/dossier-osint/dossier)";

/// Shared HTTP client for adapters: applies the search deadline, listens
/// for cancellation, and classifies transport failures into the error
/// taxonomy so the scheduler can make retry decisions.
#[derive(Clone)]
pub struct HttpClient {
    inner: reqwest::Client,
    source_name: String,
}

/// A fetched body plus the bits of the envelope adapters care about.
pub struct HttpResponse {
    pub status: StatusCode,
    pub media_type: MediaType,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn json<T: serde::de::DeserializeOwned>(&self, source: &str) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(|e| DossierError::MalformedResponse {
            source_id: source.to_string(),
            detail: e.to_string(),
        })
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

impl HttpClient {
    pub fn new(source_name: impl Into<String>) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(DEFAULT_USER_AGENT));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json, text/html;q=0.9, */*;q=0.8"));

        let inner = reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| DossierError::Internal(format!("http client: {}", e)))?;

        Ok(Self {
            inner,
            source_name: source_name.into(),
        })
    }

    /// GET with deadline and cancellation. Times out with `Timeout`, maps
    /// 429 to `RateLimited` (honoring Retry-After), 401/403 to
    /// `CredentialsInvalid`, 5xx to `UpstreamUnavailable`.
    pub async fn get(
        &self,
        url: &str,
        extra_headers: &[(&str, String)],
        ctx: &SearchContext,
    ) -> Result<HttpResponse> {
        let mut request = self.inner.get(url).timeout(ctx.timeout);
        for (name, value) in extra_headers {
            request = request.header(*name, value);
        }

        debug!(source = %self.source_name, %url, "http get");

        let response = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return Err(DossierError::Cancelled),
            outcome = request.send() => outcome.map_err(|e| self.classify(e, ctx.timeout))?,
        };

        let status = response.status();
        match status {
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after_secs = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(60);
                return Err(DossierError::RateLimited {
                    source_id: self.source_name.clone(),
                    retry_after_secs,
                });
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(DossierError::CredentialsInvalid(self.source_name.clone()));
            }
            s if s.is_server_error() => {
                return Err(DossierError::UpstreamUnavailable(format!(
                    "{}: HTTP {}",
                    self.source_name, s
                )));
            }
            s if s.is_client_error() && s != StatusCode::NOT_FOUND => {
                return Err(DossierError::MalformedResponse {
                    source_id: self.source_name.clone(),
                    detail: format!("HTTP {}", s),
                });
            }
            _ => {}
        }

        let media_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(MediaType::from_content_type)
            .unwrap_or(MediaType::Other);

        let body = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return Err(DossierError::Cancelled),
            bytes = response.bytes() => bytes.map_err(|e| self.classify(e, ctx.timeout))?.to_vec(),
        };

        Ok(HttpResponse {
            status,
            media_type,
            body,
        })
    }

    fn classify(&self, error: reqwest::Error, timeout: Duration) -> DossierError {
        if error.is_timeout() {
            DossierError::Timeout(timeout)
        } else if error.is_connect() {
            DossierError::UpstreamUnavailable(format!("{}: {}", self.source_name, error))
        } else if error.is_decode() {
            DossierError::MalformedResponse {
                source_id: self.source_name.clone(),
                detail: error.to_string(),
            }
        } else {
            DossierError::UpstreamUnavailable(format!("{}: {}", self.source_name, error))
        }
    }
}
